//! Collector management service: the control-plane application built on
//! top of `collector_db` (C1) and `collector_config` (C2).

#[macro_use]
extern crate macros;

pub mod agent;
pub mod command_file;
pub mod error;
pub mod event_log;
pub mod http;
pub mod remote;
pub mod service;
pub mod state;

pub use error::{CommandRejected, RemoteExecFailed, ServiceUnhealthy};
