//! Election config (`config/election`): identifier, ballot questions,
//! verification/rate-limit parameters, the service/election timeline,
//! auth and identity methods, vote container profile, and the ordered list
//! of voter-identity qualification protocols.
//!
//! Grounded in `config_validator/election_conf.py`'s `ElectionConfigSchema`.

use crate::error::invalid;
use crate::trust::ContainerConfig;
use common::chrono::DateTime;
use common::errors::*;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verification {
    pub count: u32,
    pub minutes: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Voting {
    #[serde(default)]
    pub ratelimitstart: u32,
    #[serde(default)]
    pub ratelimitminutes: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Period {
    pub servicestart: String,
    pub electionstart: String,
    pub electionstop: String,
    pub servicestop: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoterList {
    pub key: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TicketAuth {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcspConfig {
    pub url: String,
    #[serde(default)]
    pub responders: Vec<String>,
    #[serde(default)]
    pub retry: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsAuth {
    pub roots: Vec<String>,
    #[serde(default)]
    pub intermediates: Vec<String>,
    pub ocsp: Option<OcspConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Auth {
    pub ticket: Option<TicketAuth>,
    pub tls: Option<TlsAuth>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Age {
    pub method: String,
    pub timezone: String,
    pub limit: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TspConfig {
    pub url: String,
    pub signers: Vec<String>,
    pub delaytime: u32,
    #[serde(default)]
    pub retry: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "protocol", content = "conf", rename_all = "lowercase")]
pub enum Qualification {
    Ocsp(OcspConfig),
    Ocsptm(OcspConfig),
    Tsp(TspConfig),
    Tspreg(TspConfig),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElectionConfig {
    pub identifier: String,
    pub questions: Vec<String>,
    pub verification: Verification,
    #[serde(default)]
    pub voting: Voting,
    pub period: Period,
    #[serde(default)]
    pub ignorevoterlist: Option<String>,
    pub voterlist: VoterList,
    #[serde(default)]
    pub auth: Auth,
    pub identity: String,
    pub age: Option<Age>,
    pub vote: ContainerConfig,
    #[serde(default)]
    pub qualification: Vec<Qualification>,
}

pub fn parse(yaml: &str) -> Result<ElectionConfig> {
    let cfg: ElectionConfig =
        serde_yaml::from_str(yaml).map_err(|e| format_err!("Malformed election config: {}", e))?;
    validate(&cfg)?;
    Ok(cfg)
}

pub fn validate(cfg: &ElectionConfig) -> Result<()> {
    if cfg.questions.is_empty() {
        return Err(invalid("/questions", "at least one question is required"));
    }
    let unique: HashSet<&String> = cfg.questions.iter().collect();
    if unique.len() != cfg.questions.len() {
        return Err(invalid("/questions", "election questions must be unique"));
    }

    if cfg.voting.ratelimitstart > 0 && cfg.voting.ratelimitminutes == 0 {
        return Err(invalid(
            "/voting/ratelimitminutes",
            "ratelimitstart set, but rate limiting disabled",
        ));
    }

    for (earlier, later, path) in [
        (&cfg.period.servicestart, &cfg.period.electionstart, "/period/electionstart"),
        (&cfg.period.electionstart, &cfg.period.electionstop, "/period/electionstop"),
        (&cfg.period.electionstop, &cfg.period.servicestop, "/period/servicestop"),
    ] {
        let earlier_instant = DateTime::parse_from_rfc3339(earlier)
            .map_err(|_| invalid(path, format!("{:?} is not a parseable RFC 3339 timestamp", earlier)))?;
        let later_instant = DateTime::parse_from_rfc3339(later)
            .map_err(|_| invalid(path, format!("{:?} is not a parseable RFC 3339 timestamp", later)))?;
        if earlier_instant >= later_instant {
            return Err(invalid(path, format!("{:?} is not after the preceding period bound", later)));
        }
    }

    match cfg.identity.as_str() {
        "commonname" | "serialnumber" | "pnoee" => {}
        other => {
            return Err(invalid(
                "/identity",
                format!("unknown identity method {:?}", other),
            ))
        }
    }

    if let Some(age) = &cfg.age {
        if age.method != "estpic" {
            return Err(invalid("/age/method", format!("unknown age method {:?}", age.method)));
        }
        if age.limit < 16 {
            return Err(invalid("/age/limit", "limit must be at least 16"));
        }
    }

    if cfg.vote.bdoc.is_none() && cfg.vote.dummy.is_none() {
        return Err(invalid("/vote", "exactly one of bdoc or dummy must be set"));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> &'static str {
        r#"
identifier: EP2023
questions: ["EP2023.1"]
verification:
  count: 3
  minutes: 30
period:
  servicestart: "2023-01-01T00:00:00Z"
  electionstart: "2023-01-02T00:00:00Z"
  electionstop: "2023-01-09T20:00:00Z"
  servicestop: "2023-01-10T00:00:00Z"
voterlist:
  key: "base64-pubkey"
identity: commonname
vote:
  dummy:
    trusted: ["CN=Voter"]
"#
    }

    #[test]
    fn parses_valid_config() {
        let cfg = parse(sample()).unwrap();
        assert_eq!(cfg.questions.len(), 1);
    }

    #[test]
    fn rejects_duplicate_questions() {
        let yaml = sample().replace(
            r#"questions: ["EP2023.1"]"#,
            r#"questions: ["EP2023.1", "EP2023.1"]"#,
        );
        assert!(parse(&yaml).is_err());
    }

    #[test]
    fn rejects_out_of_order_period() {
        let yaml = sample().replace("2023-01-09T20:00:00Z", "2023-01-01T12:00:00Z");
        let err = parse(&yaml).unwrap_err();
        assert!(format!("{}", err).contains("electionstop"));
    }

    #[test]
    fn rejects_ratelimit_inconsistency() {
        let yaml = format!(
            "{}\nvoting:\n  ratelimitstart: 100\n  ratelimitminutes: 0\n",
            sample()
        );
        assert!(parse(&yaml).is_err());
    }
}
