//! Voters list updates (`list/voters-*`): the tab-delimited changeset text
//! format and the changeset-skip command.
//!
//! Grounded in `config_validator/voters_list.py`. The format is a 4-line
//! header (version, election id, changeset number, `from\tto` period) then
//! one record per voter, 5 tab-separated fields each, with the file required
//! to end with a trailing newline and forbidden from containing `\r`.

use crate::districts::DistrictsList;
use crate::error::invalid;
use common::errors::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoterAction {
    Add,
    Remove,
}

#[derive(Debug, Clone)]
pub struct VoterRecord {
    pub personal_code: String,
    pub name: String,
    pub action: VoterAction,
    pub adminunit_code: String,
    pub district: String,
}

#[derive(Debug, Clone)]
pub struct VotersList {
    pub version: String,
    pub election: String,
    pub changeset: u32,
    pub period_from: String,
    pub period_to: String,
    pub voters: Vec<VoterRecord>,
}

/// `list/voters-<N>/skip-voters-list` command payload (`VoterListChangesetSkip`).
#[derive(Debug, Clone)]
pub struct ChangesetSkip {
    pub election: String,
    pub skip_voter_list: String,
    pub changeset: u32,
}

pub fn parse(content: &str) -> Result<VotersList> {
    let lines: Vec<&str> = content.split('\n').collect();
    if lines.len() < 4 {
        return Err(invalid("/", format!("too few lines in voters list ({})", lines.len())));
    }

    let version = lines[0].trim_end_matches('\r').to_string();
    let election = lines[1].trim_end_matches('\r').to_string();
    let changeset_str = lines[2].trim_end_matches('\r').to_string();
    let period = lines[3].trim_end_matches('\r').to_string();

    if version != "2" {
        return Err(invalid(
            "/1",
            format!("invalid voters list version {:?} in line 1, expected 2", version),
        ));
    }
    validate_election_id(&election).map_err(|e| invalid("/2", e))?;

    let changeset: u32 = changeset_str
        .parse()
        .map_err(|_| invalid("/3", format!("unknown voters list changeset {:?}, must be an integer", changeset_str)))?;

    let mut period_fields = period.split('\t');
    let (period_from, period_to) = match (period_fields.next(), period_fields.next(), period_fields.next()) {
        (Some(from), Some(to), None) => (from.to_string(), to.to_string()),
        _ => return Err(invalid("/4", "period does not contain two tab-separated fields")),
    };
    validate_rfc3339(&period_from).map_err(|e| invalid("/4", e))?;
    validate_rfc3339(&period_to).map_err(|e| invalid("/4", e))?;

    let is_original_list = changeset == 0;
    let mut voters = Vec::new();
    let last_index = lines.len() - 1;
    for (idx, line) in lines.iter().enumerate() {
        let line_no = idx + 1;
        if idx == last_index {
            continue;
        }
        if line.contains('\r') {
            return Err(invalid(&format!("/{}", line_no), "invalid character <CR>"));
        }
        if line_no < 5 {
            continue;
        }
        let record = parse_voter_record(line, is_original_list)
            .map_err(|e| invalid(&format!("/{}", line_no), e))?;
        voters.push(record);
    }

    if lines[last_index] != "" {
        return Err(invalid(&format!("/{}", lines.len()), "must end with <LF> character"));
    }

    Ok(VotersList { version, election, changeset, period_from, period_to, voters })
}

fn parse_voter_record(line: &str, is_original_list: bool) -> std::result::Result<VoterRecord, String> {
    let fields: Vec<&str> = line.split('\t').collect();
    if fields.len() != 5 {
        return Err(format!("invalid field count {}, expected 5 fields", fields.len()));
    }
    let personal_code = fields[0];
    let name = fields[1];
    let action = fields[2];
    let adminunit_code = fields[3];
    let no_district = fields[4];

    if personal_code.len() != 11 || !personal_code.bytes().all(|b| b.is_ascii_digit()) {
        return Err(format!("invalid voter-personalcode {:?}", personal_code));
    }
    if name.is_empty() {
        return Err("voter-name is empty".to_string());
    }
    if name.chars().count() > 100 {
        return Err(format!("voter-name length {} exceeds 100 chars", name.chars().count()));
    }
    let action = match action {
        "lisamine" => VoterAction::Add,
        "kustutamine" => VoterAction::Remove,
        other => return Err(format!("unknown action {:?}, must be 'lisamine' or 'kustutamine'", other)),
    };
    if is_original_list && action != VoterAction::Add {
        return Err(format!("action {:?} is not allowed in initial list", action_str(action)));
    }
    if adminunit_code.is_empty() {
        return Err("missing adminunit-code".to_string());
    }
    if adminunit_code.chars().count() > 4 && adminunit_code != "FOREIGN" {
        return Err(format!("adminunit-code {:?} is longer than 4 chars", adminunit_code));
    }
    if no_district.is_empty() || no_district.len() > 10 || !no_district.bytes().all(|b| b.is_ascii_digit()) {
        return Err(format!("invalid no-district {:?}", no_district));
    }

    Ok(VoterRecord {
        personal_code: personal_code.to_string(),
        name: name.to_string(),
        action,
        adminunit_code: adminunit_code.to_string(),
        district: no_district.to_string(),
    })
}

fn action_str(action: VoterAction) -> &'static str {
    match action {
        VoterAction::Add => "lisamine",
        VoterAction::Remove => "kustutamine",
    }
}

fn validate_election_id(value: &str) -> std::result::Result<(), String> {
    if value.is_empty() || value.chars().count() > 28 {
        return Err("election ID length must be between 1 and 28".to_string());
    }
    if value.chars().any(|c| c.is_whitespace()) {
        return Err("election ID contains whitespace".to_string());
    }
    if !value.is_ascii() {
        return Err("election ID contains non-ASCII characters".to_string());
    }
    Ok(())
}

fn validate_rfc3339(value: &str) -> std::result::Result<(), String> {
    // Minimal structural check: YYYY-MM-DDTHH:MM:SS with an optional
    // fractional part and a trailing Z or +HH:MM/-HH:MM offset.
    let bytes = value.as_bytes();
    if bytes.len() < 20 || bytes[4] != b'-' || bytes[7] != b'-' || (bytes[10] != b'T' && bytes[10] != b't') {
        return Err(format!("period contains invalid timestamp: {:?}", value));
    }
    Ok(())
}

/// Checks the referential links a voters-list changeset depends on: every
/// `adminunit_code` (other than `FOREIGN`) must name a district in the
/// current districts list.
pub fn check_consistency(list: &VotersList, districts: &DistrictsList) -> Result<()> {
    for (idx, voter) in list.voters.iter().enumerate() {
        if voter.adminunit_code == "FOREIGN" {
            continue;
        }
        if !districts.districts.contains_key(&voter.adminunit_code) {
            return Err(invalid(
                &format!("/voters/{}", idx),
                format!("adminunit-code {:?} is not a known district", voter.adminunit_code),
            ));
        }
    }
    Ok(())
}

pub fn parse_changeset_skip(json_text: &str) -> Result<ChangesetSkip> {
    let value = json::parse(json_text).map_err(|e| format_err!("Malformed changeset-skip command: {}", e))?;
    let obj = value.as_object().ok_or_else(|| invalid("/", "must be a JSON object"))?;

    let election = obj
        .get("election")
        .and_then(|v| v.as_str())
        .ok_or_else(|| invalid("/election", "required string field missing"))?
        .to_string();
    validate_election_id(&election).map_err(|e| invalid("/election", e))?;

    let skip_voter_list = obj
        .get("skip_voter_list")
        .and_then(|v| v.as_str())
        .ok_or_else(|| invalid("/skip_voter_list", "required string field missing"))?
        .to_string();
    let mut parts = skip_voter_list.split(' ');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(a), Some(b), None) if !a.is_empty() && !b.is_empty() => {}
        _ => return Err(invalid("/skip_voter_list", "must be two space-separated tokens")),
    }

    let changeset = obj
        .get("changeset")
        .and_then(|v| v.as_f64())
        .ok_or_else(|| invalid("/changeset", "required integer field missing"))? as u32;

    Ok(ChangesetSkip { election, skip_voter_list, changeset })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> String {
        "2\nEP2023\n0\n2023-01-01T00:00:00Z\t2023-01-10T00:00:00Z\n\
         12345678901\tMari Maasikas\tlisamine\t0001\t1\n"
            .to_string()
    }

    #[test]
    fn parses_valid_list() {
        let list = parse(&sample()).unwrap();
        assert_eq!(list.changeset, 0);
        assert_eq!(list.voters.len(), 1);
        assert_eq!(list.voters[0].action, VoterAction::Add);
    }

    #[test]
    fn rejects_missing_trailing_newline() {
        let mut content = sample();
        content.pop();
        assert!(parse(&content).is_err());
    }

    #[test]
    fn rejects_carriage_return() {
        let content = sample().replace('\n', "\r\n");
        assert!(parse(&content).is_err());
    }

    #[test]
    fn rejects_removal_in_initial_list() {
        let content = sample().replace("lisamine", "kustutamine");
        assert!(parse(&content).is_err());
    }

    #[test]
    fn rejects_bad_personal_code() {
        let content = sample().replace("12345678901", "123");
        assert!(parse(&content).is_err());
    }

    #[test]
    fn accepts_foreign_adminunit_in_consistency_check() {
        let content = sample().replace('\t', "\t").replace("0001\t1", "FOREIGN\t1");
        let list = parse(&content).unwrap();
        let districts = DistrictsList {
            election: "EP2023".into(),
            districts: Default::default(),
            regions: Default::default(),
            counties: Default::default(),
        };
        assert!(check_consistency(&list, &districts).is_ok());
    }
}
