//! Management database (component C1): a durable, single-writer,
//! lock-coordinated map of typed keys to strings.
//!
//! See `keys` for the closed key namespace and its per-prefix validation
//! rules, and `store` for the locking/persistence mechanics.

#[macro_use]
extern crate macros;

pub mod error;
pub mod keys;
pub mod store;

pub use error::{BadKeyOrValue, InternalInvariant, LockBusy};
pub use store::Db;

/// The default row set written by `Db::reset`, i.e. a freshly-initialized
/// (or trust-config-reloaded) collector.
pub const DEFAULT_ROWS: &[(&str, &str)] = &[
    ("collector/state", "NOT_INSTALLED"),
    ("config/election", ""),
    ("config/technical", ""),
    ("config/trust", ""),
    ("list/choices", ""),
    ("list/choices-loaded", ""),
    ("list/districts", ""),
    ("list/districts-loaded", ""),
    ("election/election-id", ""),
    ("election/electionstart", ""),
    ("election/electionstop", ""),
    ("election/servicestart", ""),
    ("election/servicestop", ""),
];
