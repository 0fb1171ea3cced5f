//! Agent loop (component C7): the per-collector daemon that re-derives the
//! status snapshot, pings services on a slower cadence, and autoapplies
//! pending config commands. Grounded in `agent_daemon.py`.
//!
//! Concurrency model: one OS thread per polled concern, matching the
//! original's single-process/single-thread loop generalized just enough to
//! let pinging run independently of snapshot regeneration; no async runtime
//! is needed here (see `http` for the one component that does use one).

use crate::event_log::{EventLog, Level};
use crate::service::ServiceHandle;
use crate::state::ServiceState;
use collector_db::Db;
use common::errors::*;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// Minimum wall-clock spent per loop iteration before sleeping again.
pub const LOOP_PERIOD: Duration = Duration::from_secs(5);
/// How often services are pinged, independent of the loop period.
pub const PING_INTERVAL: Duration = Duration::from_secs(60);
/// Spacing between individual service pings within one ping sweep, so a
/// large fleet doesn't burst all its ssh connections at once.
pub const PING_SPACING: Duration = Duration::from_secs(1);
/// Cap on unattended config-apply attempts before a command is left
/// pending for an operator to investigate.
pub const MAX_AUTO_ATTEMPTS: u32 = 3;

pub struct PidLock {
    path: PathBuf,
}

impl PidLock {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Removes the pidfile if the process it names is no longer running,
    /// per `PidLocker.rm_stale_pidfile`.
    pub fn remove_if_stale(&self) -> Result<()> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        let pid: i32 = contents.trim().parse().unwrap_or(0);
        if pid <= 0 || !process_alive(pid) {
            std::fs::remove_file(&self.path)?;
        }
        Ok(())
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    pub fn acquire(&self) -> Result<()> {
        if self.path.exists() {
            return Err(format_err!("pidfile {:?} already exists", self.path));
        }
        std::fs::write(&self.path, format!("{}", std::process::id()))?;
        Ok(())
    }

    pub fn release(&self) -> Result<()> {
        let _ = std::fs::remove_file(&self.path);
        Ok(())
    }
}

#[cfg(unix)]
fn process_alive(pid: i32) -> bool {
    nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), None).is_ok()
}

#[cfg(not(unix))]
fn process_alive(_pid: i32) -> bool {
    false
}

pub struct PingSweepResult {
    pub service_states: HashMap<String, ServiceState>,
}

/// Pings every service in `services`, `PING_SPACING` apart. Each ping
/// persists its own `ping-errors`/`state` row (see `ServiceHandle::ping`),
/// so the 3-consecutive-failure -> FAILURE rule survives agent restarts;
/// this sweep just reads the before/after state back to log the
/// transition.
pub fn ping_sweep(services: &[ServiceHandle], db: &Db, event_log: &EventLog) -> PingSweepResult {
    let mut service_states = HashMap::new();
    for (i, service) in services.iter().enumerate() {
        if i > 0 {
            std::thread::sleep(PING_SPACING);
        }
        let previous = recorded_state(db, &service.service_id).unwrap_or(ServiceState::NotInstalled);
        service.ping(db).ok();
        let state = recorded_state(db, &service.service_id).unwrap_or(previous);
        if state == ServiceState::Failure && previous != ServiceState::Failure {
            let mut params = HashMap::new();
            params.insert("last_state".to_string(), previous.as_str().to_string());
            params.insert("state".to_string(), state.as_str().to_string());
            let _ = event_log.record("SERVICE_STATE_CHANGE", Level::Error, Some(&service.service_id), &params);
        }
        service_states.insert(service.service_id.clone(), state);
    }
    PingSweepResult { service_states }
}

fn recorded_state(db: &Db, service_id: &str) -> Option<ServiceState> {
    db.get(&format!("service/{}/state", service_id))
        .ok()
        .flatten()
        .and_then(|s| ServiceState::parse(&s))
}

/// One pending config command still waiting to be auto-applied, with its
/// attempt count so far.
pub struct PendingApply {
    pub cfg_type: &'static str,
    pub attempts: u32,
}

/// Orders pending applies the way `apply_cfg` scans them: technical before
/// election before choices/districts before voters, skipping anything that
/// already exhausted its attempt budget.
pub fn next_auto_apply(pending: &[PendingApply]) -> Option<&PendingApply> {
    const ORDER: &[&str] = &["technical", "election", "choices", "districts", "voters"];
    for cfg_type in ORDER {
        if let Some(p) = pending
            .iter()
            .find(|p| p.cfg_type == *cfg_type && p.attempts < MAX_AUTO_ATTEMPTS)
        {
            return Some(p);
        }
    }
    None
}

/// Runs one iteration of the main loop body, returning the elapsed time so
/// the caller can decide how long to sleep before the next iteration.
pub fn run_iteration(
    db: &Db,
    pid_lock: &PidLock,
    on_tick: impl FnOnce(&Db) -> Result<()>,
) -> Result<Duration> {
    let start = Instant::now();
    pid_lock.remove_if_stale()?;
    on_tick(db)?;
    Ok(start.elapsed())
}

pub fn sleep_after_iteration(elapsed: Duration) {
    if elapsed < LOOP_PERIOD {
        std::thread::sleep(LOOP_PERIOD);
    } else {
        std::thread::sleep(Duration::from_secs(1));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auto_apply_order_prefers_technical_first() {
        let pending = vec![
            PendingApply { cfg_type: "voters", attempts: 0 },
            PendingApply { cfg_type: "technical", attempts: 0 },
        ];
        assert_eq!(next_auto_apply(&pending).unwrap().cfg_type, "technical");
    }

    #[test]
    fn auto_apply_skips_exhausted_attempts() {
        let pending = vec![
            PendingApply { cfg_type: "technical", attempts: MAX_AUTO_ATTEMPTS },
            PendingApply { cfg_type: "election", attempts: 0 },
        ];
        assert_eq!(next_auto_apply(&pending).unwrap().cfg_type, "election");
    }

    #[test]
    fn auto_apply_none_when_all_exhausted() {
        let pending = vec![PendingApply { cfg_type: "technical", attempts: MAX_AUTO_ATTEMPTS }];
        assert!(next_auto_apply(&pending).is_none());
    }
}
