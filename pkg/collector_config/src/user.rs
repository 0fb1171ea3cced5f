//! User role management command (`user/<CN>`): the `user-permissions`
//! command payload that rewrites a signer's role list.
//!
//! Grounded in `config_validator/user_management.py` and the `USER_ROLES`
//! table in `__init__.py`.

use crate::catalog::role_permissions;
use crate::error::invalid;
use common::errors::*;
use std::collections::HashSet;

#[derive(Debug, Clone)]
pub struct UserPermissionsCommand {
    pub cn: String,
    pub roles: Vec<String>,
}

pub fn parse(json_text: &str) -> Result<UserPermissionsCommand> {
    let value = json::parse(json_text).map_err(|e| format_err!("Malformed user command: {}", e))?;
    let obj = value.as_object().ok_or_else(|| invalid("/", "must be a JSON object"))?;

    let action = obj
        .get("action")
        .and_then(|v| v.as_str())
        .ok_or_else(|| invalid("/action", "required string field missing"))?;
    if action != "user-permissions" {
        return Err(invalid("/action", format!("unknown action {:?}", action)));
    }

    let cn = obj
        .get("cn")
        .and_then(|v| v.as_str())
        .ok_or_else(|| invalid("/cn", "required string field missing"))?
        .to_string();
    if !looks_like_cn(&cn) {
        return Err(invalid("/cn", format!("{:?} does not look like a distinguished name", cn)));
    }

    let roles = obj
        .get("roles")
        .and_then(|v| v.as_array())
        .ok_or_else(|| invalid("/roles", "required array field missing"))?
        .iter()
        .map(|v| v.as_str().map(str::to_string))
        .collect::<Option<Vec<_>>>()
        .ok_or_else(|| invalid("/roles", "value is not a list of strings"))?;

    validate_roles(&roles)?;

    Ok(UserPermissionsCommand { cn, roles })
}

fn looks_like_cn(cn: &str) -> bool {
    // "<name>,<name>,<11-digit personal code>"
    let parts: Vec<&str> = cn.splitn(3, ',').collect();
    parts.len() == 3 && parts[2].len() == 11 && parts[2].bytes().all(|b| b.is_ascii_digit())
}

pub fn validate_roles(roles: &[String]) -> Result<()> {
    for role in roles {
        if role_permissions(role).is_none() {
            return Err(invalid("/roles", format!("unknown role {:?}", role)));
        }
    }
    let unique: HashSet<&String> = roles.iter().collect();
    if unique.len() != roles.len() {
        return Err(invalid("/roles", "duplicate roles"));
    }
    if roles.iter().any(|r| r == "none") && roles.len() > 1 {
        return Err(invalid("/roles", "role \"none\" can't be used with other roles"));
    }
    Ok(())
}

/// Serializes roles the way they're stored in the `user/<CN>` row: a
/// comma-separated list, consumable by `catalog::roles_grant`.
pub fn roles_to_value(roles: &[String]) -> String {
    roles.join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> &'static str {
        r#"{"action": "user-permissions", "cn": "Jaan,Tamm,38001010001", "roles": ["admin"]}"#
    }

    #[test]
    fn parses_valid_command() {
        let cmd = parse(sample()).unwrap();
        assert_eq!(cmd.cn, "Jaan,Tamm,38001010001");
        assert_eq!(cmd.roles, vec!["admin".to_string()]);
    }

    #[test]
    fn rejects_unknown_role() {
        let json_text = sample().replace("admin", "superadmin");
        assert!(parse(&json_text).is_err());
    }

    #[test]
    fn rejects_duplicate_roles() {
        let json_text = sample().replace(r#"["admin"]"#, r#"["admin", "admin"]"#);
        assert!(parse(&json_text).is_err());
    }

    #[test]
    fn rejects_none_combined_with_other_roles() {
        let json_text = sample().replace(r#"["admin"]"#, r#"["admin", "none"]"#);
        assert!(parse(&json_text).is_err());
    }

    #[test]
    fn rejects_malformed_cn() {
        let json_text = sample().replace("Jaan,Tamm,38001010001", "not-a-dn");
        assert!(parse(&json_text).is_err());
    }
}
