//! `agent-daemon` — the long-running collector agent (component C7): pings
//! registered services on a slow cadence, re-derives `collector/state`, and
//! autoapplies pending config commands, guarded by a pidfile lock.
//!
//! Grounded in `agent_daemon.py`'s main loop. No async runtime is used here
//! per spec.md §5's stated concurrency model.

extern crate collector_admin;
extern crate collector_db;
#[macro_use]
extern crate macros;

use std::collections::HashMap;
use std::path::PathBuf;

use collector_admin::agent::{self, PidLock, PingSweepResult};
use collector_admin::event_log::{EventLog, Level};
use collector_admin::service::ServiceHandle;
use collector_admin::state::{self, CollectorState, ServiceRecord};
use collector_db::Db;
use common::errors::*;

#[derive(Args)]
struct Args {
    #[arg(default = false)]
    get_stats: bool,
}

fn data_dir() -> PathBuf {
    std::env::var("IVXV_ADMIN_DATA_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/var/lib/ivxv/management"))
}

fn load_service_handles(db: &Db) -> Result<Vec<ServiceHandle>> {
    let mut out = Vec::new();
    for key in db.keys(Some("service/"))? {
        let service_id = match key.strip_prefix("service/").and_then(|rest| rest.strip_suffix("/service-type")) {
            Some(id) => id,
            None => continue,
        };
        let service_type = db.get(&key)?.unwrap_or_default();
        let address = db
            .get(&format!("service/{}/ip-address", service_id))?
            .unwrap_or_default();
        out.push(ServiceHandle {
            service_id: service_id.to_string(),
            service_type,
            address,
        });
    }
    Ok(out)
}

/// Prints current ping/collector-state stats and exits, without acquiring
/// the loop's pidfile lock (`agent_daemon.py --get-stats`).
fn run_get_stats(db: &Db) -> Result<()> {
    let services = load_service_handles(db)?;
    println!("{} service(s) registered", services.len());
    for service in &services {
        let state = db
            .get(&format!("service/{}/state", service.service_id))?
            .unwrap_or_else(|| "UNKNOWN".to_string());
        println!("  {} [{}]: {}", service.service_id, service.service_type, state);
    }
    Ok(())
}

fn derive_and_persist_collector_state(db: &Db, services: &HashMap<String, ServiceRecord>) -> Result<()> {
    let recorded = db
        .get("collector/state")?
        .and_then(|s| match s.as_str() {
            "NOT_INSTALLED" => Some(CollectorState::NotInstalled),
            "INSTALLED" => Some(CollectorState::Installed),
            "CONFIGURED" => Some(CollectorState::Configured),
            "FAILURE" => Some(CollectorState::Failure),
            "PARTIAL_FAILURE" => Some(CollectorState::PartialFailure),
            _ => None,
        })
        .unwrap_or(CollectorState::NotInstalled);
    let technical_present = db.get("config/technical")?.map(|v| !v.is_empty()).unwrap_or(false);

    let derived = state::detect_collector_state(recorded, technical_present, services);
    if derived != recorded {
        db.set_safe("collector/state", derived.as_str())?;
        let log = EventLog::new(collector_admin::event_log::path_under(&data_dir()));
        let mut params = HashMap::new();
        params.insert("last_state".to_string(), recorded.as_str().to_string());
        params.insert("state".to_string(), derived.as_str().to_string());
        log.record("COLLECTOR_STATE_CHANGE", Level::Info, None, &params)?;
    }
    Ok(())
}

fn run_loop(db: &Db, pid_lock: &PidLock) -> Result<()> {
    pid_lock.remove_if_stale()?;
    if pid_lock.exists() {
        return Err(format_err!("agent-daemon already running (pidfile exists)"));
    }
    pid_lock.acquire()?;

    let log = EventLog::new(collector_admin::event_log::path_under(&data_dir()));
    let mut last_ping = std::time::Instant::now() - agent::PING_INTERVAL;

    let result = (|| -> Result<()> {
        loop {
            let elapsed = agent::run_iteration(db, pid_lock, |db| {
                if last_ping.elapsed() >= agent::PING_INTERVAL {
                    let services = load_service_handles(db)?;
                    let PingSweepResult { service_states: _ } = agent::ping_sweep(&services, db, &log);
                    last_ping = std::time::Instant::now();

                    let mut records = HashMap::new();
                    for service in &services {
                        let raw = db
                            .get(&format!("service/{}/state", service.service_id))?
                            .unwrap_or_default();
                        if let Some(s) = state::ServiceState::parse(&raw) {
                            records.insert(
                                service.service_id.clone(),
                                ServiceRecord { service_type: service.service_type.clone(), state: s },
                            );
                        }
                    }
                    derive_and_persist_collector_state(db, &records)?;
                }
                Ok(())
            })?;
            agent::sleep_after_iteration(elapsed);
        }
    })();

    pid_lock.release()?;
    result
}

fn run() -> Result<()> {
    let args = common::args::parse_args::<Args>()?;
    let db = Db::open(data_dir().join("db").join("ivxv-management.db"));

    if args.get_stats {
        return run_get_stats(&db);
    }

    let pid_lock = PidLock::new(data_dir().join("ivxv-agent-daemon.pid"));
    run_loop(&db, &pid_lock)
}

fn main() {
    if let Err(e) = run() {
        eprintln!("agent-daemon: {}", e);
        std::process::exit(1);
    }
}
