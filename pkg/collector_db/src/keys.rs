//! Validation of the closed `section/name[/field]` key namespace described
//! in spec.md section 3.
//!
//! This mirrors the field-by-field checks of the original `IVXVManagerDb.set_value`,
//! generalized to the full key set this control plane understands.

use common::chrono::DateTime;
use common::errors::*;

use crate::error::BadKeyOrValue;

pub const COLLECTOR_STATES: &[&str] = &[
    "NOT_INSTALLED",
    "INSTALLED",
    "CONFIGURED",
    "FAILURE",
    "PARTIAL_FAILURE",
];

pub const SERVICE_STATES: &[&str] = &[
    "NOT_INSTALLED",
    "INSTALLED",
    "CONFIGURED",
    "FAILURE",
    "REMOVED",
];

pub const VOTER_LIST_STATES: &[&str] = &["PENDING", "APPLIED", "INVALID", "SKIPPED"];

pub const SERVICE_TYPES: &[&str] = &[
    "backup",
    "choices",
    "log",
    "mid",
    "smartid",
    "votesorder",
    "proxy",
    "storage",
    "verification",
    "voting",
];

pub const USER_ROLES: &[&str] = &["admin", "election-conf-manager", "viewer", "none"];

const SERVICE_CONDITIONAL_SUBKEYS: &[&str] =
    &["tls-key", "tls-cert", "mid-token-key", "tspreg-key", "backup-times"];

const SERVICE_SUBKEYS: &[&str] = &[
    "service-type",
    "ip-address",
    "network",
    "state",
    "technical-conf-version",
    "election-conf-version",
    "last-data",
    "ping-errors",
    "bg_info",
];

fn is_version_string(value: &str) -> bool {
    // "<signer-CN> <RFC3339-timestamp>"
    let mut parts = value.splitn(2, ' ');
    let cn = match parts.next() {
        Some(v) if !v.is_empty() => v,
        _ => return false,
    };
    let ts = match parts.next() {
        Some(v) if !v.is_empty() => v,
        _ => return false,
    };
    // A signer CN always has the "<SURNAME>,<GIVEN NAMES>,<11-digit-id>" shape.
    if cn.matches(',').count() != 2 {
        return false;
    }
    DateTime::parse_from_rfc3339(ts).is_ok()
}

fn is_rfc3339_or_empty(value: &str) -> bool {
    value.is_empty() || DateTime::parse_from_rfc3339(value).is_ok()
}

fn is_decimal(value: &str) -> bool {
    !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit())
}

fn is_sha256_hex_or_empty(value: &str) -> bool {
    value.is_empty() || (value.len() == 64 && value.bytes().all(|b| b.is_ascii_hexdigit()))
}

/// Validates that `key` is part of the closed namespace and that `value` has
/// the shape required for that key. Returns `BadKeyOrValue` otherwise.
pub fn validate(key: &str, value: &str) -> Result<()> {
    let ok = validate_inner(key, value);
    if ok {
        Ok(())
    } else {
        Err(BadKeyOrValue(format!("{} = {:?}", key, value)).into())
    }
}

fn validate_inner(key: &str, value: &str) -> bool {
    let parts: Vec<&str> = key.split('/').collect();

    match parts.as_slice() {
        ["collector", "state"] => COLLECTOR_STATES.contains(&value),
        ["config", "trust"] | ["config", "technical"] | ["config", "election"] => {
            value.is_empty() || is_version_string(value)
        }
        ["list", "choices"] | ["list", "districts"] => value.is_empty() || is_version_string(value),
        ["list", "choices-loaded"] | ["list", "districts-loaded"] => {
            value.is_empty() || is_version_string(value)
        }
        ["list", name] if is_voters_changeset(name) => value.is_empty() || is_version_string(value),
        ["list", name] if is_voters_state(name) => VOTER_LIST_STATES.contains(&value),
        ["election", "election-id"] => true,
        ["election", "servicestart"]
        | ["election", "electionstart"]
        | ["election", "electionstop"]
        | ["election", "servicestop"] => is_rfc3339_or_empty(value),
        ["election", "auth", _method] => value == "TRUE",
        ["election", "tsp-qualification"] => value == "TRUE",
        ["host", _host, "state"] => value.is_empty() || value == "REGISTERED",
        ["service", _sid, field] => validate_service_field(field, value),
        ["user", cn] => {
            cn.matches(',').count() == 2
                && !value.is_empty()
                && value.split(',').all(|r| USER_ROLES.contains(&r))
                && !(value.split(',').any(|r| r == "none") && value.contains(','))
        }
        ["logmonitor", "address"] => true,
        ["logmonitor", "last-data"] => is_rfc3339_or_empty(value),
        _ => false,
    }
}

fn validate_service_field(field: &str, value: &str) -> bool {
    if field == "state" {
        return SERVICE_STATES.contains(&value);
    }
    if field == "service-type" {
        return SERVICE_TYPES.contains(&value);
    }
    if field == "ping-errors" {
        return is_decimal(value);
    }
    if field == "last-data" {
        return is_rfc3339_or_empty(value);
    }
    if field == "technical-conf-version" || field == "election-conf-version" {
        return value.is_empty() || is_version_string(value);
    }
    if SERVICE_CONDITIONAL_SUBKEYS.contains(&field) {
        if field == "backup-times" {
            return true;
        }
        return is_sha256_hex_or_empty(value);
    }
    SERVICE_SUBKEYS.contains(&field)
}

/// `voters0000`, `voters0001`, ...
pub fn is_voters_changeset(name: &str) -> bool {
    name.len() == 10 && name.starts_with("voters") && name[6..].bytes().all(|b| b.is_ascii_digit())
}

/// `voters0000-state`, `voters0001-state`, ...
pub fn is_voters_state(name: &str) -> bool {
    name.strip_suffix("-state")
        .map(is_voters_changeset)
        .unwrap_or(false)
}

/// Parses the 4-digit changeset number out of a `list/voters<NNNN>` key name
/// (the part after `list/`).
pub fn voters_changeset_number(name: &str) -> Option<u32> {
    if !is_voters_changeset(name) {
        return None;
    }
    name[6..].parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_known_keys() {
        assert!(validate("collector/state", "NOT_INSTALLED").is_ok());
        assert!(validate("config/trust", "").is_ok());
        assert!(validate(
            "config/trust",
            "SMITH,JOHN,39001011234 2024-10-01T08:00:00Z"
        )
        .is_ok());
        assert!(validate("list/voters0000", "").is_ok());
        assert!(validate("list/voters0000-state", "PENDING").is_ok());
        assert!(validate("service/voting1/state", "CONFIGURED").is_ok());
        assert!(validate("service/voting1/service-type", "voting").is_ok());
        assert!(validate("user/SMITH,JOHN,39001011234", "admin").is_ok());
        assert!(validate("election/electionstart", "2024-10-01T09:00:00Z").is_ok());
    }

    #[test]
    fn rejects_unknown_keys_and_bad_values() {
        assert!(validate("bogus/key", "x").is_err());
        assert!(validate("collector/state", "BOGUS").is_err());
        assert!(validate("service/voting1/state", "BOGUS").is_err());
        assert!(validate("service/voting1/service-type", "bogus").is_err());
        assert!(validate("user/SMITH,JOHN,39001011234", "none,admin").is_err());
        assert!(validate("election/electionstart", "not-a-timestamp").is_err());
    }

    #[test]
    fn voters_changeset_helpers() {
        assert!(is_voters_changeset("voters0000"));
        assert!(!is_voters_changeset("voters0000-state"));
        assert!(is_voters_state("voters0000-state"));
        assert_eq!(voters_changeset_number("voters0042"), Some(42));
    }
}
