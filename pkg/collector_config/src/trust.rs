//! Trust root config (`config/trust`): the container signature/verification
//! profile and the list of CNs authorized to sign command files.
//!
//! Grounded in `config_validator/trust_conf.py` and the `BDocSchema`/
//! `ContainerSchema` pair in `config_validator/schemas.py`.

use crate::error::invalid;
use common::errors::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BdocProfile {
    pub bdocsize: u64,
    pub filesize: u64,
    pub roots: Vec<String>,
    #[serde(default)]
    pub intermediates: Vec<String>,
    pub profile: String,
    #[serde(default)]
    pub ocsp_responders: Vec<String>,
    #[serde(default)]
    pub tsp_signers: Vec<String>,
    #[serde(default)]
    pub tsp_delaytime: Option<u64>,
    #[serde(default)]
    pub tsdelaytime: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DummyProfile {
    #[serde(default)]
    pub trusted: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerConfig {
    pub bdoc: Option<BdocProfile>,
    pub dummy: Option<DummyProfile>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustConfig {
    pub container: ContainerConfig,
    pub authorizations: Vec<String>,
}

pub fn parse(yaml: &str) -> Result<TrustConfig> {
    let cfg: TrustConfig =
        serde_yaml::from_str(yaml).map_err(|e| format_err!("Malformed trust config: {}", e))?;
    validate(&cfg)?;
    Ok(cfg)
}

pub fn validate(cfg: &TrustConfig) -> Result<()> {
    if cfg.authorizations.is_empty() {
        return Err(invalid("/authorizations", "at least one signer must be authorized"));
    }
    match (&cfg.container.bdoc, &cfg.container.dummy) {
        (None, None) => {
            return Err(invalid("/container", "exactly one of bdoc or dummy must be set"));
        }
        (Some(_), Some(_)) => {
            return Err(invalid("/container", "bdoc and dummy are mutually exclusive"));
        }
        (Some(bdoc), None) => validate_bdoc(bdoc)?,
        (None, Some(_)) => {}
    }
    Ok(())
}

fn validate_bdoc(bdoc: &BdocProfile) -> Result<()> {
    if bdoc.bdocsize == 0 {
        return Err(invalid("/container/bdoc/bdocsize", "must be at least 1"));
    }
    if bdoc.filesize == 0 {
        return Err(invalid("/container/bdoc/filesize", "must be at least 1"));
    }
    if bdoc.roots.is_empty() {
        return Err(invalid("/container/bdoc/roots", "at least one root certificate is required"));
    }
    match bdoc.profile.as_str() {
        "BES" | "TM" | "TS" => {}
        other => {
            return Err(invalid(
                "/container/bdoc/profile",
                format!("unknown profile {:?}, expected BES, TM or TS", other),
            ))
        }
    }
    if bdoc.profile == "TS" && bdoc.tsp_signers.is_empty() {
        return Err(invalid("/container/bdoc/tsp", "TS profile requires a tsp block"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> &'static str {
        r#"
authorizations: ["CN=Admin One", "CN=Admin Two"]
container:
  bdoc:
    bdocsize: 12000000
    filesize: 10000000
    roots: ["root-cert-pem"]
    profile: TM
"#
    }

    #[test]
    fn parses_valid_trust_config() {
        let cfg = parse(sample()).unwrap();
        assert_eq!(cfg.authorizations.len(), 2);
        assert!(cfg.container.bdoc.is_some());
    }

    #[test]
    fn rejects_ts_profile_without_tsp() {
        let yaml = sample().replace("profile: TM", "profile: TS");
        let err = parse(&yaml).unwrap_err();
        assert!(format!("{}", err).contains("tsp"));
    }

    #[test]
    fn rejects_empty_authorizations() {
        let yaml = sample().replace(r#"["CN=Admin One", "CN=Admin Two"]"#, "[]");
        assert!(parse(&yaml).is_err());
    }
}
