//! Technical config (`config/technical`): network segments, per-service
//! instances, TLS/codec filter parameters, storage backend selection, and
//! the backup schedule.
//!
//! Grounded in `config_validator/tech_conf.py`'s `CollectorTechnicalConfigSchema`.

use crate::catalog::service_type_params;
use crate::error::invalid;
use common::errors::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

const CIPHERSUITES: &[&str] = &[
    "TLS_RSA_WITH_AES_128_CBC_SHA",
    "TLS_RSA_WITH_AES_256_CBC_SHA",
    "TLS_RSA_WITH_AES_128_GCM_SHA256",
    "TLS_RSA_WITH_AES_256_GCM_SHA384",
    "TLS_ECDHE_ECDSA_WITH_AES_128_CBC_SHA",
    "TLS_ECDHE_ECDSA_WITH_AES_256_CBC_SHA",
    "TLS_ECDHE_RSA_WITH_AES_128_CBC_SHA",
    "TLS_ECDHE_RSA_WITH_AES_256_CBC_SHA",
    "TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256",
    "TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256",
    "TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384",
    "TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceInstance {
    pub id: String,
    pub address: String,
    #[serde(default)]
    pub peeraddress: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupServiceInstance {
    pub id: String,
    pub address: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Services {
    #[serde(default)]
    pub proxy: Vec<ServiceInstance>,
    #[serde(default)]
    pub mid: Vec<ServiceInstance>,
    #[serde(default)]
    pub smartid: Vec<ServiceInstance>,
    #[serde(default)]
    pub votesorder: Vec<ServiceInstance>,
    #[serde(default)]
    pub voting: Vec<ServiceInstance>,
    #[serde(default)]
    pub choices: Vec<ServiceInstance>,
    #[serde(default)]
    pub verification: Vec<ServiceInstance>,
    #[serde(default)]
    pub storage: Vec<ServiceInstance>,
    #[serde(default)]
    pub log: Vec<ServiceInstance>,
    #[serde(default)]
    pub backup: Vec<BackupServiceInstance>,
}

impl Services {
    /// `(service_type, id, address)` for every main-service instance, used to
    /// derive per-service collector state and drive remote operations.
    pub fn main_instances(&self) -> Vec<(&'static str, &str, &str)> {
        let mut out = Vec::new();
        let mut push = |ty: &'static str, list: &[ServiceInstance]| {
            for s in list {
                out.push((ty, s.id.as_str(), s.address.as_str()));
            }
        };
        push("proxy", &self.proxy);
        push("mid", &self.mid);
        push("smartid", &self.smartid);
        push("votesorder", &self.votesorder);
        push("voting", &self.voting);
        push("choices", &self.choices);
        push("verification", &self.verification);
        push("storage", &self.storage);
        out
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsFilter {
    pub handshaketimeout: u64,
    pub ciphersuites: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodecFilter {
    pub rwtimeout: u64,
    #[serde(default)]
    pub requestsize: Option<u64>,
    #[serde(default)]
    pub logrequests: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Filter {
    pub tls: TlsFilter,
    pub codec: CodecFilter,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkSegment {
    pub id: String,
    pub services: Services,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogServer {
    pub address: String,
    #[serde(default = "default_log_port")]
    pub port: u16,
}

fn default_log_port() -> u16 {
    20514
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileStorage {
    pub wd: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EtcdStorage {
    pub ca: String,
    pub conntimeout: u64,
    pub optimeout: u64,
    pub bootstrap: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "protocol", content = "conf", rename_all = "lowercase")]
pub enum Storage {
    File(FileStorage),
    Etcd(EtcdStorage),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TechnicalConfig {
    #[serde(default)]
    pub debug: bool,
    pub snidomain: String,
    pub filter: Filter,
    pub network: Vec<NetworkSegment>,
    #[serde(default)]
    pub logging: Vec<LogServer>,
    pub storage: Storage,
    #[serde(default)]
    pub backup: Vec<String>,
}

impl TechnicalConfig {
    pub fn all_segments_services(&self) -> impl Iterator<Item = (&NetworkSegment, (&'static str, &str, &str))> {
        self.network.iter().flat_map(|seg| {
            seg.services
                .main_instances()
                .into_iter()
                .map(move |inst| (seg, inst))
        })
    }
}

pub fn parse(yaml: &str) -> Result<TechnicalConfig> {
    let cfg: TechnicalConfig =
        serde_yaml::from_str(yaml).map_err(|e| format_err!("Malformed technical config: {}", e))?;
    validate(&cfg)?;
    Ok(cfg)
}

pub fn validate(cfg: &TechnicalConfig) -> Result<()> {
    if cfg.network.is_empty() {
        return Err(invalid("/network", "at least one network segment is required"));
    }
    for suite in &cfg.filter.tls.ciphersuites {
        if !CIPHERSUITES.contains(&suite.as_str()) {
            return Err(invalid(
                "/filter/tls/ciphersuites",
                format!("unknown ciphersuite {:?}", suite),
            ));
        }
    }
    if cfg.filter.tls.ciphersuites.is_empty() {
        return Err(invalid("/filter/tls/ciphersuites", "at least one ciphersuite is required"));
    }

    let mut seen_ids: HashMap<String, &'static str> = HashMap::new();
    for (seg_idx, seg) in cfg.network.iter().enumerate() {
        for (ty, id, addr) in seg.services.main_instances() {
            if let Some(other) = seen_ids.insert(id.to_string(), ty) {
                return Err(invalid(
                    &format!("/network/{}/services/{}", seg_idx, ty),
                    format!("service id {:?} reused (also declared as {})", id, other),
                ));
            }
            if !addr.contains(':') {
                return Err(invalid(
                    &format!("/network/{}/services/{}/{}/address", seg_idx, ty, id),
                    "address must be host:port",
                ));
            }
            if service_type_params(ty).is_none() {
                return Err(invalid("/network", format!("unknown service type {:?}", ty)));
            }
        }
        if seg.services.backup.len() > 1 {
            return Err(invalid(
                &format!("/network/{}/services/backup", seg_idx),
                "at most one backup service is allowed per segment",
            ));
        }
    }

    for time in &cfg.backup {
        validate_backup_time(time)?;
    }

    if let Storage::Etcd(etcd) = &cfg.storage {
        if etcd.bootstrap.is_empty() {
            return Err(invalid("/storage/conf/bootstrap", "at least one bootstrap peer is required"));
        }
    }

    Ok(())
}

fn validate_backup_time(value: &str) -> Result<()> {
    let bad = || invalid("/backup", format!("value must be in format HH:MM (not {:?})", value));
    let mut parts = value.split(':');
    let (hour, minute) = match (parts.next(), parts.next(), parts.next()) {
        (Some(h), Some(m), None) if h.len() == 2 && m.len() == 2 => (h, m),
        _ => return Err(bad()),
    };
    let hour: u32 = hour.parse().map_err(|_| bad())?;
    let minute: u32 = minute.parse().map_err(|_| bad())?;
    if hour >= 24 {
        return Err(invalid("/backup", format!("hour must be smaller than 24 (not {:?})", value)));
    }
    if minute >= 60 {
        return Err(invalid("/backup", format!("minute must be smaller than 60 (not {:?})", value)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> &'static str {
        r#"
snidomain: ivxv.ee
filter:
  tls:
    handshaketimeout: 5000
    ciphersuites: ["TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256"]
  codec:
    rwtimeout: 5000
network:
  - id: seg0
    services:
      proxy:
        - id: "proxy0@seg0"
          address: "10.0.0.1:443"
      storage:
        - id: "storage0@seg0"
          address: "10.0.0.2:8080"
storage:
  protocol: file
  conf:
    wd: /var/lib/ivxv/storage
backup: ["02:00", "14:30"]
"#
    }

    #[test]
    fn parses_valid_config() {
        let cfg = parse(sample()).unwrap();
        assert_eq!(cfg.network.len(), 1);
        assert_eq!(cfg.backup.len(), 2);
    }

    #[test]
    fn rejects_bad_backup_time() {
        let yaml = sample().replace("14:30", "14:75");
        assert!(parse(&yaml).is_err());
    }

    #[test]
    fn rejects_duplicate_service_ids() {
        let yaml = sample().replace("storage0@seg0", "proxy0@seg0");
        assert!(parse(&yaml).is_err());
    }

    #[test]
    fn rejects_unknown_ciphersuite() {
        let yaml = sample().replace(
            "TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256",
            "TLS_MADE_UP_SUITE",
        );
        assert!(parse(&yaml).is_err());
    }
}
