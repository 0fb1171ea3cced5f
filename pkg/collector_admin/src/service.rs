//! Service driver (component C6): the operations run against one remote
//! service instance — install, config pushes, secret loading, restart/stop,
//! and health pinging. Every operation that changes a service's standing
//! persists that change to the management database (C1), and config-apply
//! operations additionally append to a per-command progress file, per
//! spec.md §4.6.
//!
//! Grounded in `service/service.py`'s `Service` class.

use crate::error::ServiceUnhealthy;
use crate::remote;
use crate::state::ServiceState;
use collector_db::Db;
use common::errors::*;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct ServiceHandle {
    pub service_id: String,
    pub service_type: String,
    pub address: String,
}

impl ServiceHandle {
    fn host(&self) -> &str {
        self.address.split(':').next().unwrap_or(&self.address)
    }

    fn systemctl_id(&self) -> String {
        format!("ivxv-{}@{}", self.service_type, self.service_id)
    }

    fn set_state(&self, db: &Db, state: ServiceState) -> Result<()> {
        db.set(&format!("service/{}/state", self.service_id), state.as_str())
    }

    /// First-time host bring-up: installs the `ivxv-common` and
    /// service-type-specific debian packages, creates the service account,
    /// and moves the row from `NOT_INSTALLED` to `INSTALLED`, per
    /// `init_service_host`/`install_service_pkg`.
    pub fn install_host(&self, db: &Db, common_pkg: &Path, service_pkg: &Path) -> Result<()> {
        remote::scp_to(self.host(), common_pkg, "/tmp/ivxv-common.deb")?;
        remote::scp_to(self.host(), service_pkg, "/tmp/ivxv-service.deb")?;
        remote::ssh_run(
            self.host(),
            "sudo dpkg -i /tmp/ivxv-common.deb /tmp/ivxv-service.deb",
        )?;
        self.set_state(db, ServiceState::Installed)?;
        Ok(())
    }

    /// Pushes the technical config package, restarts the unit, records
    /// `technical-conf-version`, and moves the service to `CONFIGURED`, per
    /// `apply_tech_cfg`.
    pub fn apply_technical(&self, db: &Db, package: &Path, version: &str) -> Result<()> {
        let remote_path = format!("/etc/ivxv/{}/technical.yaml", self.service_id);
        remote::scp_to(self.host(), package, &remote_path)?;
        remote::ssh_run(self.host(), &format!("systemctl --user restart {}", self.systemctl_id()))?;
        db.set(&format!("service/{}/technical-conf-version", self.service_id), version)?;
        self.set_state(db, ServiceState::Configured)?;
        eprintln!("Applied technical config version {:?} to {}", version, self.service_id);
        Ok(())
    }

    /// Pushes the election config package, records `election-conf-version`,
    /// and moves the service to `CONFIGURED`, per `apply_election_cfg`.
    pub fn apply_election(&self, db: &Db, package: &Path, version: &str) -> Result<()> {
        let remote_path = format!("/etc/ivxv/{}/election.bdoc", self.service_id);
        remote::scp_to(self.host(), package, &remote_path)?;
        db.set(&format!("service/{}/election-conf-version", self.service_id), version)?;
        self.set_state(db, ServiceState::Configured)?;
        eprintln!("Applied election config version {:?} to {}", version, self.service_id);
        Ok(())
    }

    /// Pushes a choices/districts/voters list package, per `apply_list`.
    /// Voters lists are cross-checked against the service's own
    /// `voterimp --check version` report first, per §4.6's drift check —
    /// a mismatch aborts the push and is logged to `progress` rather than
    /// applied blind. Every attempt, successful or not, is appended to
    /// `progress`; the caller is responsible for persisting it afterwards.
    pub fn apply_list(
        &self,
        list_type: &str,
        package: &Path,
        changeset_no: Option<u32>,
        progress: &mut ProgressRecord,
    ) -> Result<()> {
        if list_type == "voters" {
            if let Ok(output) = remote::ssh_run(self.host(), "voterimp --check version") {
                let reported = output.trim();
                if !reported.is_empty() && reported != progress.cfg_version {
                    let msg = format!(
                        "{} reports voters list version {:?}, expected {:?}",
                        self.service_id, reported, progress.cfg_version
                    );
                    progress.record_attempt(&msg);
                    return Err(ServiceUnhealthy(msg).into());
                }
            }
        }

        let remote_path = match changeset_no {
            Some(n) => format!("/etc/ivxv/{}/{}-{}.bdoc", self.service_id, list_type, n),
            None => format!("/etc/ivxv/{}/{}.bdoc", self.service_id, list_type),
        };
        let result = remote::scp_to(self.host(), package, &remote_path);
        match &result {
            Ok(()) => progress.record_attempt(&format!("applied to {}", self.service_id)),
            Err(e) => progress.record_attempt(&format!("failed on {}: {}", self.service_id, e)),
        }
        result
    }

    /// Pushes a secret file (TLS cert/key, MID token key, TSP reg key) and
    /// records its checksum, per `load_secret_file`.
    pub fn load_secret(&self, secret_type: &str, file: &Path, target_path: &str) -> Result<String> {
        remote::scp_to(self.host(), file, target_path)?;
        let data = std::fs::read(file)?;
        let mut hasher = crypto::sha256::SHA256Hasher::default();
        use crypto::hasher::Hasher;
        let digest = hasher.finish_with(&data);
        let checksum = common::hex::encode(digest);
        eprintln!("Loaded {} to {} (sha256 {})", secret_type, self.service_id, checksum);
        Ok(checksum)
    }

    pub fn restart(&self) -> Result<()> {
        remote::ssh_run(self.host(), &format!("systemctl --user restart {}", self.systemctl_id()))?;
        Ok(())
    }

    pub fn stop(&self) -> Result<()> {
        remote::ssh_run(self.host(), &format!("systemctl --user stop {}", self.systemctl_id()))?;
        Ok(())
    }

    /// Runs the unit-status ping, persists `ping-errors`/`last-data`/`state`
    /// to the database, and forces `FAILURE` after three consecutive
    /// failures, per `ping` and the surrounding agent loop's
    /// `generate_collector_state` rule. `backup` and `log` services use a
    /// different health command than the `systemd --user` units.
    pub fn ping(&self, db: &Db) -> Result<bool> {
        let cmd = match self.service_type.as_str() {
            "backup" => "true".to_string(),
            "log" => "systemctl status rsyslog".to_string(),
            _ => format!("env LC_ALL=C systemctl status --user {}", self.systemctl_id()),
        };
        let ok = remote::ssh_run(self.host(), &cmd).is_ok();

        let errors_key = format!("service/{}/ping-errors", self.service_id);
        let current_failures: u32 = db.get(&errors_key)?.and_then(|v| v.parse().ok()).unwrap_or(0);
        let (next_failures, next_state) = next_ping_state(current_failures, ok);
        db.set(&errors_key, &next_failures.to_string())?;
        if ok {
            db.set(&format!("service/{}/last-data", self.service_id), &now_rfc3339())?;
        }
        self.set_state(db, next_state)?;
        Ok(ok)
    }

    /// Cross-checks the config version the service itself reports (via
    /// `systemctl show`/`ivxv-*imp --check version`) against the version
    /// the database expects, per `_verify_cfg_version`.
    pub fn ping_verify(&self, expected_version: &str) -> Result<()> {
        let output = remote::ssh_run(self.host(), &format!("systemctl show {} -p Version", self.systemctl_id()))?;
        let reported = output.trim().trim_start_matches("Version=");
        if reported != expected_version {
            return Err(ServiceUnhealthy(format!(
                "{} reports config version {:?}, expected {:?}",
                self.service_id, reported, expected_version
            ))
            .into());
        }
        Ok(())
    }
}

/// How many consecutive ping failures a service has logged, and the state
/// that count implies: `FAILURE` once `FAILURE_THRESHOLD` is reached,
/// `CONFIGURED` otherwise. Shared by the in-memory `PingFailureCounter` and
/// `ServiceHandle::ping`'s database-backed counter so both apply the exact
/// same rule.
pub fn next_ping_state(consecutive_failures: u32, ok: bool) -> (u32, ServiceState) {
    if ok {
        (0, ServiceState::Configured)
    } else {
        let failures = consecutive_failures + 1;
        let state = if failures >= PingFailureCounter::FAILURE_THRESHOLD {
            ServiceState::Failure
        } else {
            ServiceState::Configured
        };
        (failures, state)
    }
}

/// Tracks consecutive ping failures so the caller can apply the "3
/// consecutive failures -> FAILURE" rule from `generate_collector_state`'s
/// surrounding agent loop. In-memory only; `ServiceHandle::ping` keeps the
/// durable equivalent in `service/<id>/ping-errors`.
#[derive(Debug, Default)]
pub struct PingFailureCounter {
    consecutive_failures: u32,
}

impl PingFailureCounter {
    pub const FAILURE_THRESHOLD: u32 = 3;

    pub fn record(&mut self, ok: bool) -> ServiceState {
        let (failures, state) = next_ping_state(self.consecutive_failures, ok);
        self.consecutive_failures = failures;
        state
    }
}

/// Per-command-load progress, persisted as `<cfg_type>-<version>.json` under
/// the admin data directory's `progress/` subdirectory, per spec.md §4.6.
/// Tracks whether a config-apply run has fully succeeded for this version
/// yet, how many attempts it has taken, and a log of what happened on each
/// attempt.
#[derive(Debug, Clone)]
pub struct ProgressRecord {
    pub cfg_type: String,
    pub cfg_version: String,
    pub autoapply: bool,
    pub completed: bool,
    pub attempts: u32,
    pub log: Vec<Vec<String>>,
}

impl ProgressRecord {
    pub fn new(cfg_type: &str, cfg_version: &str, autoapply: bool) -> Self {
        Self {
            cfg_type: cfg_type.to_string(),
            cfg_version: cfg_version.to_string(),
            autoapply,
            completed: false,
            attempts: 0,
            log: Vec::new(),
        }
    }

    fn file_name(cfg_type: &str, cfg_version: &str) -> String {
        let sanitized: String = cfg_version
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        format!("{}-{}.json", cfg_type, sanitized)
    }

    fn path(progress_dir: &Path, cfg_type: &str, cfg_version: &str) -> PathBuf {
        progress_dir.join(Self::file_name(cfg_type, cfg_version))
    }

    /// Loads the progress file for this `(cfg_type, cfg_version)` pair, or
    /// starts a fresh one (attempts 0, completed false) if none exists yet.
    pub fn load_or_new(progress_dir: &Path, cfg_type: &str, cfg_version: &str, autoapply: bool) -> Result<Self> {
        let path = Self::path(progress_dir, cfg_type, cfg_version);
        if !path.exists() {
            return Ok(Self::new(cfg_type, cfg_version, autoapply));
        }
        let text = std::fs::read_to_string(&path)?;
        let value = json::parse(&text)?;
        let obj = value
            .as_object()
            .ok_or_else(|| format_err!("Malformed progress file {:?}", path))?;
        let log = obj
            .get("log")
            .and_then(|v| v.as_array())
            .map(|rows| {
                rows.iter()
                    .map(|row| {
                        row.as_array()
                            .map(|cols| {
                                cols.iter()
                                    .map(|c| c.as_str().unwrap_or("").to_string())
                                    .collect()
                            })
                            .unwrap_or_default()
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(Self {
            cfg_type: cfg_type.to_string(),
            cfg_version: cfg_version.to_string(),
            autoapply: obj.get("autoapply").and_then(|v| v.as_bool()).unwrap_or(autoapply),
            completed: obj.get("completed").and_then(|v| v.as_bool()).unwrap_or(false),
            attempts: obj.get("attempts").and_then(|v| v.as_f64()).unwrap_or(0.0) as u32,
            log,
        })
    }

    pub fn record_attempt(&mut self, message: &str) {
        self.attempts += 1;
        self.log.push(vec![now_rfc3339(), message.to_string()]);
    }

    pub fn mark_completed(&mut self) {
        self.completed = true;
    }

    pub fn save(&self, progress_dir: &Path) -> Result<()> {
        std::fs::create_dir_all(progress_dir)?;
        let mut obj = HashMap::new();
        obj.insert("cfg-type".to_string(), json::Value::String(self.cfg_type.clone()));
        obj.insert("cfg-version".to_string(), json::Value::String(self.cfg_version.clone()));
        obj.insert("autoapply".to_string(), json::Value::Bool(self.autoapply));
        obj.insert("completed".to_string(), json::Value::Bool(self.completed));
        obj.insert("attempts".to_string(), json::Value::Number(self.attempts as f64));
        obj.insert(
            "log".to_string(),
            json::Value::Array(
                self.log
                    .iter()
                    .map(|row| json::Value::Array(row.iter().cloned().map(json::Value::String).collect()))
                    .collect(),
            ),
        );
        let text = json::stringify(&json::Value::Object(obj))?;
        std::fs::write(Self::path(progress_dir, &self.cfg_type, &self.cfg_version), text)?;
        Ok(())
    }
}

fn now_rfc3339() -> String {
    chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_only_after_three_consecutive_failed_pings() {
        let mut counter = PingFailureCounter::default();
        assert_eq!(counter.record(false), ServiceState::Configured);
        assert_eq!(counter.record(false), ServiceState::Configured);
        assert_eq!(counter.record(false), ServiceState::Failure);
    }

    #[test]
    fn success_resets_the_counter() {
        let mut counter = PingFailureCounter::default();
        counter.record(false);
        counter.record(false);
        assert_eq!(counter.record(true), ServiceState::Configured);
        assert_eq!(counter.record(false), ServiceState::Configured);
    }

    #[test]
    fn host_strips_port_from_address() {
        let handle = ServiceHandle {
            service_id: "proxy0@seg0".into(),
            service_type: "proxy".into(),
            address: "10.0.0.1:443".into(),
        };
        assert_eq!(handle.host(), "10.0.0.1");
    }

    #[test]
    fn progress_record_round_trips_through_json() {
        let dir = std::env::temp_dir().join(format!(
            "collector_admin-progress-test-{}-{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        let mut record = ProgressRecord::new("technical", "ADMIN,ONE,38001010001 2024-10-01T08:00:00Z", true);
        record.record_attempt("applied to voting0");
        record.save(&dir).unwrap();

        let reloaded = ProgressRecord::load_or_new(
            &dir,
            "technical",
            "ADMIN,ONE,38001010001 2024-10-01T08:00:00Z",
            false,
        )
        .unwrap();
        assert_eq!(reloaded.attempts, 1);
        assert!(!reloaded.completed);
        assert_eq!(reloaded.log.len(), 1);
        assert_eq!(reloaded.log[0][1], "applied to voting0");

        std::fs::remove_dir_all(&dir).ok();
    }
}
