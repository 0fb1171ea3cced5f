//! Append-only JSON-lines event log. Grounded in `event_log.py`: each line
//! is one JSON object with `event`, `level`, `message`, `service`,
//! `timestamp`.

use common::errors::*;
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Info,
    Error,
}

impl Level {
    fn as_str(self) -> &'static str {
        match self {
            Level::Info => "INFO",
            Level::Error => "ERROR",
        }
    }
}

/// The closed event-name/message-template catalogue (`EVENTS` in the
/// original). `{name}`-style placeholders in the template are substituted
/// from `params`.
fn message_template(event: &str) -> Option<&'static str> {
    Some(match event {
        "COLLECTOR_INIT" => "Initialize Collector",
        "COLLECTOR_RESET" => "Reset Collector (state: 'NOT_INSTALLED')",
        "COLLECTOR_STATE_CHANGE" => "Collector state changed from {last_state} to {state}",
        "CMD_LOAD" => "Load command {cmd_type} version {version}",
        "CMD_LOADED" => "Command {cmd_type} is loaded, version {version}",
        "CMD_REMOVED" => "Command {cmd_type} is removed, version {version}",
        "VOTER_LIST_DOWNLOADED" => "Downloaded voter list changeset #{changeset_no}",
        "VOTER_LIST_DOWNLOAD_FAILED" => "Failed to download voter list changeset #{changeset_no}",
        "PERMISSION_SET" => "Add permission {permission} to user {user_cn}",
        "PERMISSION_RESET" => "Reset user {user_cn} permissions",
        "SET_ELECTION_TIME" => "Election {period} timestamp set to {timestamp}",
        "SERVICE_REGISTER" => "Add {service_type} service (state: 'NOT_INSTALLED')",
        "SERVICE_CONFIG_APPLY" => "Applied {cfg_descr} version {cfg_version}",
        "SERVICE_STATE_CHANGE" => "Service state changed from {last_state} to {state}",
        "SECRET_INSTALL" => "{secret_descr} loaded to service",
        _ => return None,
    })
}

fn render(template: &str, params: &HashMap<String, String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        rest = &rest[start + 1..];
        let end = match rest.find('}') {
            Some(e) => e,
            None => {
                out.push('{');
                break;
            }
        };
        let key = &rest[..end];
        out.push_str(params.get(key).map(|s| s.as_str()).unwrap_or(""));
        rest = &rest[end + 1..];
    }
    out.push_str(rest);
    out
}

pub struct EventLog {
    path: PathBuf,
}

impl EventLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn init(&self) -> Result<()> {
        let _ = std::fs::remove_file(&self.path);
        self.record("COLLECTOR_INIT", Level::Info, None, &HashMap::new())
    }

    pub fn record(
        &self,
        event: &str,
        level: Level,
        service: Option<&str>,
        params: &HashMap<String, String>,
    ) -> Result<()> {
        let template = message_template(event)
            .ok_or_else(|| format_err!("Unknown event name: {:?}", event))?;
        let message = render(template, params);

        let mut obj = std::collections::HashMap::new();
        obj.insert("event".to_string(), json::Value::String(event.to_string()));
        obj.insert("level".to_string(), json::Value::String(level.as_str().to_string()));
        obj.insert("message".to_string(), json::Value::String(message));
        obj.insert(
            "service".to_string(),
            json::Value::String(service.unwrap_or("management").to_string()),
        );
        obj.insert("timestamp".to_string(), json::Value::String(now_rfc3339()));

        let line = json::stringify(&json::Value::Object(obj))?;

        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        writeln!(file, "{}", line)?;
        Ok(())
    }

    pub fn dump(&self) -> Result<Vec<String>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let file = std::fs::File::open(&self.path)?;
        let reader = BufReader::new(file);
        let mut lines = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.is_empty() {
                continue;
            }
            let value = json::parse(&line)?;
            let obj = value
                .as_object()
                .ok_or_else(|| format_err!("Malformed event log line: {:?}", line))?;
            let get = |k: &str| obj.get(k).and_then(|v| v.as_str()).unwrap_or("?");
            lines.push(format!(
                "{} {} {} {} {}",
                get("timestamp"),
                get("level"),
                get("service"),
                get("event"),
                get("message"),
            ));
        }
        Ok(lines)
    }
}

fn now_rfc3339() -> String {
    chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.6f").to_string()
}

pub fn path_under(data_dir: &Path) -> PathBuf {
    data_dir.join("ivxv-management-events.log")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_placeholders() {
        let mut params = HashMap::new();
        params.insert("last_state".to_string(), "INSTALLED".to_string());
        params.insert("state".to_string(), "CONFIGURED".to_string());
        let msg = render(message_template("COLLECTOR_STATE_CHANGE").unwrap(), &params);
        assert_eq!(msg, "Collector state changed from INSTALLED to CONFIGURED");
    }

    #[test]
    fn rejects_unknown_event() {
        let log = EventLog::new(std::env::temp_dir().join("ivxv-test-events.log"));
        let err = log.record("NOT_A_REAL_EVENT", Level::Info, None, &HashMap::new());
        assert!(err.is_err());
    }
}
