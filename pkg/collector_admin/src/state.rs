//! Collector/election state derivation (component C4): turns the raw
//! key/value rows in the management database into the collector-state,
//! election-phase, and per-voter-list-changeset summaries the CLI/HTTP
//! surfaces report.
//!
//! Grounded in `collector_state.py`'s `detect_collector_state` and
//! `generate_election_state`.

use collector_config::catalog::{service_type_params, MAIN_SERVICE_TYPES};
use collector_db::keys;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectorState {
    NotInstalled,
    Installed,
    Configured,
    Failure,
    PartialFailure,
}

impl CollectorState {
    pub fn as_str(self) -> &'static str {
        match self {
            CollectorState::NotInstalled => "NOT_INSTALLED",
            CollectorState::Installed => "INSTALLED",
            CollectorState::Configured => "CONFIGURED",
            CollectorState::Failure => "FAILURE",
            CollectorState::PartialFailure => "PARTIAL_FAILURE",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    NotInstalled,
    Installed,
    Configured,
    Failure,
    Removed,
}

impl ServiceState {
    pub fn as_str(self) -> &'static str {
        match self {
            ServiceState::NotInstalled => "NOT_INSTALLED",
            ServiceState::Installed => "INSTALLED",
            ServiceState::Configured => "CONFIGURED",
            ServiceState::Failure => "FAILURE",
            ServiceState::Removed => "REMOVED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "NOT_INSTALLED" => ServiceState::NotInstalled,
            "INSTALLED" => ServiceState::Installed,
            "CONFIGURED" => ServiceState::Configured,
            "FAILURE" => ServiceState::Failure,
            "REMOVED" => ServiceState::Removed,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ServiceRecord {
    pub service_type: String,
    pub state: ServiceState,
}

/// `collector/state` plus every `service/<id>/state` row, used to derive
/// `CollectorState` the same way the agent loop and `collectorctl status`
/// both need to.
pub fn detect_collector_state(
    recorded_state: CollectorState,
    technical_config_present: bool,
    services: &HashMap<String, ServiceRecord>,
) -> CollectorState {
    let service_states: Vec<ServiceState> = services.values().map(|s| s.state).collect();

    if recorded_state == CollectorState::NotInstalled
        && (!technical_config_present
            || service_states.is_empty()
            || service_states.iter().any(|s| *s == ServiceState::NotInstalled))
    {
        return CollectorState::NotInstalled;
    }

    if recorded_state == CollectorState::Installed
        && service_states.iter().any(|s| *s == ServiceState::Installed)
    {
        return CollectorState::Installed;
    }

    if !service_states.iter().any(|s| *s == ServiceState::Failure) {
        return CollectorState::Configured;
    }

    let mut by_type: HashMap<&str, Vec<ServiceState>> = HashMap::new();
    for rec in services.values() {
        by_type.entry(rec.service_type.as_str()).or_default().push(rec.state);
    }

    for ty in MAIN_SERVICE_TYPES {
        let params = service_type_params(ty).expect("main service type must be in catalog");
        if !params.main_service {
            continue;
        }
        if let Some(states) = by_type.get(ty) {
            if !states.iter().any(|s| *s == ServiceState::Configured) {
                return CollectorState::Failure;
            }
        }
    }

    CollectorState::PartialFailure
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElectionPhase {
    Preparing,
    WaitingForServiceStart,
    WaitingForElectionStart,
    Election,
    WaitingForServiceStop,
    Finished,
}

impl ElectionPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            ElectionPhase::Preparing => "PREPARING",
            ElectionPhase::WaitingForServiceStart => "WAITING_FOR_SERVICE_START",
            ElectionPhase::WaitingForElectionStart => "WAITING_FOR_ELECTION_START",
            ElectionPhase::Election => "ELECTION",
            ElectionPhase::WaitingForServiceStop => "WAITING_FOR_SERVICE_STOP",
            ElectionPhase::Finished => "FINISHED",
        }
    }
}

/// Timestamps are RFC3339 strings or empty (meaning "unset"), matching the
/// `election/*` database rows.
#[derive(Debug, Clone, Default)]
pub struct ElectionTimeline {
    pub servicestart: Option<String>,
    pub electionstart: Option<String>,
    pub electionstop: Option<String>,
    pub servicestop: Option<String>,
}

/// `now` is passed in rather than read from the clock so this stays pure and
/// testable; callers pass the current RFC3339 timestamp.
pub fn generate_election_phase(timeline: &ElectionTimeline, now: &str) -> (ElectionPhase, Option<String>, Option<String>) {
    if timeline.electionstart.is_none() {
        return (ElectionPhase::Preparing, None, None);
    }

    let before = |bound: &Option<String>| bound.as_deref().map(|b| now < b).unwrap_or(false);

    if before(&timeline.servicestart) {
        return (ElectionPhase::WaitingForServiceStart, None, timeline.servicestart.clone());
    }
    if before(&timeline.electionstart) {
        return (
            ElectionPhase::WaitingForElectionStart,
            timeline.servicestart.clone(),
            timeline.electionstart.clone(),
        );
    }
    if before(&timeline.electionstop) {
        return (ElectionPhase::Election, timeline.electionstart.clone(), timeline.electionstop.clone());
    }
    if before(&timeline.servicestop) {
        return (
            ElectionPhase::WaitingForServiceStop,
            timeline.electionstop.clone(),
            timeline.servicestop.clone(),
        );
    }
    (ElectionPhase::Finished, timeline.servicestop.clone(), None)
}

/// Per-state tally over every registered `list/voters<NNNN>-state` changeset,
/// per `generate_voters_list_state`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VoterListCounts {
    pub total: u32,
    pub available: u32,
    pub pending: u32,
    pub applied: u32,
    pub invalid: u32,
    pub skipped: u32,
}

/// Scans every `list/voters<NNNN>-state` row present in `rows` (real 4-digit
/// changeset keys, per `collector_db::keys`) and tallies it by state.
/// `available` counts changesets whose `list/voters<NNNN>` version key is
/// non-empty, i.e. a payload has actually been uploaded for that changeset.
pub fn voters_list_counts(rows: &HashMap<String, String>) -> VoterListCounts {
    let mut counts = VoterListCounts::default();
    for (key, value) in rows {
        let name = match key.strip_prefix("list/") {
            Some(n) => n,
            None => continue,
        };
        let state_name = match name.strip_suffix("-state") {
            Some(n) => n,
            None => continue,
        };
        if !keys::is_voters_changeset(state_name) {
            continue;
        }
        counts.total += 1;
        match value.as_str() {
            "PENDING" => counts.pending += 1,
            "APPLIED" => counts.applied += 1,
            "INVALID" => counts.invalid += 1,
            "SKIPPED" => counts.skipped += 1,
            _ => {}
        }
        let version_key = format!("list/{}", state_name);
        if rows.get(&version_key).map(|v| !v.is_empty()).unwrap_or(false) {
            counts.available += 1;
        }
    }
    counts
}

/// All known collector states, used by snapshot rendering and validation.
pub const COLLECTOR_STATES: &[CollectorState] = &[
    CollectorState::NotInstalled,
    CollectorState::Installed,
    CollectorState::Configured,
    CollectorState::Failure,
    CollectorState::PartialFailure,
];

pub fn service_ids_by_state(services: &HashMap<String, ServiceRecord>, state: ServiceState) -> HashSet<&str> {
    services
        .iter()
        .filter(|(_, rec)| rec.state == state)
        .map(|(id, _)| id.as_str())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn services(pairs: &[(&str, &str, ServiceState)]) -> HashMap<String, ServiceRecord> {
        pairs
            .iter()
            .map(|(id, ty, state)| {
                (
                    id.to_string(),
                    ServiceRecord { service_type: ty.to_string(), state: *state },
                )
            })
            .collect()
    }

    #[test]
    fn not_installed_until_technical_config_present() {
        let result = detect_collector_state(CollectorState::NotInstalled, false, &HashMap::new());
        assert_eq!(result, CollectorState::NotInstalled);
    }

    #[test]
    fn configured_once_no_failures() {
        let svcs = services(&[("proxy0", "proxy", ServiceState::Configured)]);
        let result = detect_collector_state(CollectorState::Installed, true, &svcs);
        assert_eq!(result, CollectorState::Configured);
    }

    #[test]
    fn failure_when_all_instances_of_a_main_type_fail() {
        let svcs = services(&[("voting0", "voting", ServiceState::Failure)]);
        let result = detect_collector_state(CollectorState::Configured, true, &svcs);
        assert_eq!(result, CollectorState::Failure);
    }

    #[test]
    fn partial_failure_when_some_instance_of_type_still_configured() {
        let svcs = services(&[
            ("voting0", "voting", ServiceState::Configured),
            ("voting1", "voting", ServiceState::Failure),
        ]);
        let result = detect_collector_state(CollectorState::Configured, true, &svcs);
        assert_eq!(result, CollectorState::PartialFailure);
    }

    #[test]
    fn election_phase_preparing_without_electionstart() {
        let timeline = ElectionTimeline::default();
        let (phase, _, _) = generate_election_phase(&timeline, "2023-01-01T00:00:00Z");
        assert_eq!(phase, ElectionPhase::Preparing);
    }

    #[test]
    fn election_phase_progresses_through_timeline() {
        let timeline = ElectionTimeline {
            servicestart: Some("2023-01-01T00:00:00Z".into()),
            electionstart: Some("2023-01-02T00:00:00Z".into()),
            electionstop: Some("2023-01-09T00:00:00Z".into()),
            servicestop: Some("2023-01-10T00:00:00Z".into()),
        };
        assert_eq!(
            generate_election_phase(&timeline, "2022-12-01T00:00:00Z").0,
            ElectionPhase::WaitingForServiceStart
        );
        assert_eq!(
            generate_election_phase(&timeline, "2023-01-05T00:00:00Z").0,
            ElectionPhase::Election
        );
        assert_eq!(
            generate_election_phase(&timeline, "2023-02-01T00:00:00Z").0,
            ElectionPhase::Finished
        );
    }

    #[test]
    fn voters_list_counts_tallies_by_state() {
        let mut rows = HashMap::new();
        rows.insert(
            "list/voters0001".to_string(),
            "SMITH,JOHN,39001011234 2024-10-01T08:00:00Z".to_string(),
        );
        rows.insert("list/voters0001-state".to_string(), "APPLIED".to_string());
        rows.insert("list/voters0002".to_string(), "".to_string());
        rows.insert("list/voters0002-state".to_string(), "PENDING".to_string());
        rows.insert("list/voters0003-state".to_string(), "SKIPPED".to_string());

        let counts = voters_list_counts(&rows);
        assert_eq!(counts.total, 3);
        assert_eq!(counts.applied, 1);
        assert_eq!(counts.pending, 1);
        assert_eq!(counts.skipped, 1);
        assert_eq!(counts.available, 1);
    }
}
