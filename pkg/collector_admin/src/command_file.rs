//! Command file loader (component C3): unpacks a signed BDOC/ZIP command
//! container, shells out to the container verifier, checks signer
//! authorization, and routes the extracted payload to its config type.
//!
//! Grounded in `command_file.py`.

use collector_config::catalog::Permission;
use common::errors::*;
use std::io::Read;
use std::path::Path;
use std::process::Command;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandType {
    Trust,
    Election,
    Technical,
    Choices,
    Districts,
    Voters,
    User,
}

impl CommandType {
    pub fn as_str(self) -> &'static str {
        match self {
            CommandType::Trust => "trust",
            CommandType::Election => "election",
            CommandType::Technical => "technical",
            CommandType::Choices => "choices",
            CommandType::Districts => "districts",
            CommandType::Voters => "voters",
            CommandType::User => "user",
        }
    }

    pub fn permission(self) -> Option<Permission> {
        Some(match self {
            CommandType::Technical => Permission::TechConf,
            CommandType::Election | CommandType::Choices | CommandType::Districts | CommandType::Voters => {
                Permission::ElectionConf
            }
            CommandType::User => Permission::UsersAdmin,
            CommandType::Trust => return None,
        })
    }
}

/// The one payload file extracted from a command container (a YAML config,
/// a JSON list, or the raw voters-list text).
pub struct ExtractedPayload {
    pub filename: String,
    pub content: String,
}

/// Unzips `path` and returns every member's name and raw bytes, dropping the
/// container's own signature/manifest bookkeeping entries.
pub fn unpack_container(path: &Path) -> Result<Vec<(String, Vec<u8>)>> {
    let file = std::fs::File::open(path).map_err(|e| format_err!("File {:?} not found: {}", path, e))?;
    let mut archive = zip::ZipArchive::new(file).map_err(|e| format_err!("File {:?} is not a valid ZIP container: {}", path, e))?;

    let skip = ["META-INF/manifest.xml", "META-INF/signatures0.xml", "mimetype"];
    let mut out = Vec::new();
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        let name = entry.name().to_string();
        if skip.contains(&name.as_str()) {
            continue;
        }
        let mut buf = Vec::new();
        entry.read_to_end(&mut buf)?;
        out.push((name, buf));
    }
    Ok(out)
}

/// Picks the payload filename out of a container's member list, following
/// the per-command-type rules in `get_command_filename`.
pub fn command_filename(cmd_type: CommandType, names: &[String]) -> Result<String> {
    match cmd_type {
        CommandType::Trust => names
            .iter()
            .find(|n| n.ends_with("trust.yaml"))
            .cloned()
            .ok_or_else(|| format_err!("Missing trust config in command file")),
        CommandType::Election => names
            .iter()
            .find(|n| n.ends_with("election.yaml"))
            .cloned()
            .ok_or_else(|| format_err!("Missing election config in command file")),
        CommandType::Technical => names
            .iter()
            .find(|n| n.ends_with("technical.yaml"))
            .cloned()
            .ok_or_else(|| format_err!("Missing technical config in command file")),
        CommandType::User => names
            .iter()
            .find(|n| n == "user.json")
            .cloned()
            .ok_or_else(|| format_err!("Missing user.json in command file")),
        CommandType::Choices | CommandType::Districts => {
            if names.len() > 1 {
                return Err(format_err!("Too many files in {} command file: {:?}", cmd_type.as_str(), names));
            }
            names
                .get(0)
                .cloned()
                .ok_or_else(|| format_err!("Missing {} list in command file", cmd_type.as_str()))
        }
        CommandType::Voters => {
            if names.len() == 1 && names[0].ends_with(".skip.yaml") {
                return Ok(names[0].clone());
            }
            if names.len() < 2 {
                return Err(format_err!("Missing voters list or signature in command file"));
            }
            if names.len() > 2 {
                return Err(format_err!("Too many files in voters command file: {:?}", names));
            }
            let mut sorted = names.to_vec();
            sorted.sort();
            let (sig, utf) = (&sorted[0], &sorted[1]);
            if utf.ends_with(".utf") && *sig == format!("{}.sig", &utf[..utf.len() - 4]) {
                Ok(utf.clone())
            } else {
                Err(format_err!(
                    "Voters list and signature file names do not match: {}, {}",
                    utf,
                    sig
                ))
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct Signature {
    pub signer: String,
    pub timestamp: String,
    pub line: String,
}

/// Exit-code contract of `ivxv-verify-container`.
fn verifier_error(code: i32) -> &'static str {
    match code {
        64 => "command was used incorrectly",
        65 => "failed to open container",
        66 => "input file did not exist or was not readable",
        74 => "failed to read trust root",
        _ => "unhandled error",
    }
}

/// Invokes the external container verifier and parses its `signer,ts`
/// stdout lines. The verifier binary itself is out of scope here; this
/// just defines the subprocess contract.
pub fn verify_container(trust_container: &Path, filepath: &Path) -> Result<Vec<Signature>> {
    let output = Command::new("ivxv-verify-container")
        .arg("-trust")
        .arg(trust_container)
        .arg(filepath)
        .output()
        .map_err(|e| format_err!("Error while executing verifier command: {}", e))?;

    if !output.status.success() {
        let code = output.status.code().unwrap_or(-1);
        return Err(format_err!(
            "Failed to execute container verifier: {}",
            verifier_error(code)
        ));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let mut signatures = Vec::new();
    for line in stdout.trim().split('\n') {
        if line.is_empty() {
            continue;
        }
        let mut parts = line.splitn(2, ' ');
        let signer = parts.next().unwrap_or("");
        let timestamp = parts.next().unwrap_or("");
        if signer.is_empty() || timestamp.is_empty() || !looks_like_signer(signer) {
            return Err(format_err!("Invalid signature line: {:?}", line));
        }
        signatures.push(Signature {
            signer: signer.to_string(),
            timestamp: timestamp.to_string(),
            line: line.to_string(),
        });
    }
    signatures.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
    Ok(signatures)
}

fn looks_like_signer(cn: &str) -> bool {
    let parts: Vec<&str> = cn.splitn(3, ',').collect();
    parts.len() == 3 && parts[2].len() == 11 && parts[2].bytes().all(|b| b.is_ascii_digit())
}

/// Filters `all_signatures` down to the ones authorized to load a command of
/// `cmd_type`: for trust commands, membership in the config's own
/// `authorizations` list; otherwise, a `user/<CN>` role granting the
/// command type's permission.
pub fn authorized_signers<'a>(
    cmd_type: CommandType,
    all_signatures: &'a [Signature],
    trusted_cns: Option<&[String]>,
    user_roles: impl Fn(&str) -> Option<String>,
) -> Vec<&'a Signature> {
    match cmd_type.permission() {
        None => all_signatures
            .iter()
            .filter(|s| trusted_cns.map(|list| list.contains(&s.signer)).unwrap_or(false))
            .collect(),
        Some(permission) => all_signatures
            .iter()
            .filter(|s| {
                user_roles(&s.signer)
                    .map(|roles| collector_config::catalog::roles_grant(&roles, permission))
                    .unwrap_or(false)
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_choices_filename_when_unambiguous() {
        let names = vec!["choices.json".to_string()];
        assert_eq!(command_filename(CommandType::Choices, &names).unwrap(), "choices.json");
    }

    #[test]
    fn rejects_too_many_choices_files() {
        let names = vec!["a.json".to_string(), "b.json".to_string()];
        assert!(command_filename(CommandType::Choices, &names).is_err());
    }

    #[test]
    fn picks_voters_list_with_matching_signature() {
        let names = vec!["voters01.utf".to_string(), "voters01.sig".to_string()];
        assert_eq!(command_filename(CommandType::Voters, &names).unwrap(), "voters01.utf");
    }

    #[test]
    fn rejects_voters_mismatched_signature() {
        let names = vec!["voters01.utf".to_string(), "other.sig".to_string()];
        assert!(command_filename(CommandType::Voters, &names).is_err());
    }

    #[test]
    fn picks_voters_skip_command_alone() {
        let names = vec!["changeset.skip.yaml".to_string()];
        assert_eq!(command_filename(CommandType::Voters, &names).unwrap(), "changeset.skip.yaml");
    }

    #[test]
    fn authorized_signers_filters_by_role_permission() {
        let sigs = vec![
            Signature { signer: "CN=Admin".into(), timestamp: "1".into(), line: "l1".into() },
            Signature { signer: "CN=Viewer".into(), timestamp: "2".into(), line: "l2".into() },
        ];
        let roles = |cn: &str| match cn {
            "CN=Admin" => Some("admin".to_string()),
            "CN=Viewer" => Some("viewer".to_string()),
            _ => None,
        };
        let authorized = authorized_signers(CommandType::Technical, &sigs, None, roles);
        assert_eq!(authorized.len(), 1);
        assert_eq!(authorized[0].signer, "CN=Admin");
    }
}
