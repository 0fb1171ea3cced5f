//! `collectorctl` — the CLI surface (component C9): thin subcommands wiring
//! together the management database (C1), config validator (C2), command
//! loader (C3), state model (C4), and service driver (C6).
//!
//! Grounded in the subcommand table of `ivxv_admin`'s console-scripts
//! entry points, restructured as a single binary the way `container_ctl`
//! bundles its subcommands.

extern crate collector_admin;
extern crate collector_config;
extern crate collector_db;
#[macro_use]
extern crate macros;

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use collector_admin::command_file::{self, CommandType};
use collector_admin::event_log::{EventLog, Level};
use collector_admin::remote;
use collector_admin::service::{ProgressRecord, ServiceHandle};
use collector_admin::state;
use collector_config::catalog::service_type_params;
use collector_config::election::Qualification;
use collector_db::Db;
use common::errors::*;

fn data_dir() -> PathBuf {
    std::env::var("IVXV_ADMIN_DATA_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/var/lib/ivxv/management"))
}

fn db_path(dir: &Path) -> PathBuf {
    dir.join("db").join("ivxv-management.db")
}

fn open_db() -> Db {
    Db::open(db_path(&data_dir()))
}

fn open_event_log() -> EventLog {
    EventLog::new(collector_admin::event_log::path_under(&data_dir()))
}

#[derive(Args)]
enum Args {
    #[arg(name = "create-data-dirs")]
    CreateDataDirs,

    #[arg(name = "collector-init")]
    CollectorInit,

    #[arg(name = "db")]
    Db(DbCommand),

    #[arg(name = "db-dump")]
    DbDump,

    #[arg(name = "db-reset")]
    DbReset,

    #[arg(name = "users-list")]
    UsersList,

    #[arg(name = "cmd-load")]
    CmdLoad(CmdLoadCommand),

    #[arg(name = "cmd-remove")]
    CmdRemove(CmdRemoveCommand),

    #[arg(name = "config-apply")]
    ConfigApply,

    #[arg(name = "config-validate")]
    ConfigValidate(ConfigValidateCommand),

    #[arg(name = "secret-load")]
    SecretLoad(SecretLoadCommand),

    #[arg(name = "service")]
    Service(ServiceCommand),

    #[arg(name = "status")]
    Status,

    #[arg(name = "export-votes")]
    ExportVotes,

    #[arg(name = "generate-processor-input")]
    GenerateProcessorInput,

    #[arg(name = "copy-log-to-logmon")]
    CopyLogToLogmon,

    #[arg(name = "update-packages")]
    UpdatePackages,

    #[arg(name = "voterstats")]
    VoterStats,

    #[arg(name = "voting-sessions")]
    VotingSessions,

    #[arg(name = "voter-list-download")]
    VoterListDownload(VoterListDownloadCommand),

    #[arg(name = "backup")]
    Backup,

    #[arg(name = "eventlog-dump")]
    EventlogDump,
}

#[derive(Args)]
struct DbCommand {
    key: String,

    #[arg(default = "")]
    value: String,

    #[arg(default = false)]
    delete: bool,
}

#[derive(Args)]
struct CmdLoadCommand {
    cmd_type: String,
    file: PathBuf,
}

#[derive(Args)]
struct CmdRemoveCommand {
    cmd_type: String,
}

#[derive(Args)]
struct ConfigValidateCommand {
    cmd_type: String,
    file: PathBuf,
}

#[derive(Args)]
struct SecretLoadCommand {
    service_id: String,
    secret_type: String,
    file: PathBuf,
}

#[derive(Args)]
struct ServiceCommand {
    action: String,
    service_id: String,
}

#[derive(Args)]
struct VoterListDownloadCommand {
    changeset: u32,
}

fn parse_cmd_type(s: &str) -> Result<CommandType> {
    Ok(match s {
        "trust" => CommandType::Trust,
        "election" => CommandType::Election,
        "technical" => CommandType::Technical,
        "choices" => CommandType::Choices,
        "districts" => CommandType::Districts,
        "voters" => CommandType::Voters,
        "user" => CommandType::User,
        _ => return Err(format_err!("Unknown command type: {}", s)),
    })
}

fn run_create_data_dirs() -> Result<()> {
    let dir = data_dir();
    for sub in [
        "db",
        "commands",
        "upload",
        "admin-ui-data",
        "admin-ui-permissions",
        "ballot-box",
    ] {
        std::fs::create_dir_all(dir.join(sub))?;
    }
    println!("Created data directories under {:?}", dir);
    Ok(())
}

fn run_collector_init() -> Result<()> {
    let db = open_db();
    db.reset(collector_db::DEFAULT_ROWS)?;
    let log = open_event_log();
    log.init()?;
    println!("Collector initialized (state: NOT_INSTALLED)");
    Ok(())
}

fn run_db(cmd: DbCommand) -> Result<()> {
    let db = open_db();
    if cmd.delete {
        db.delete(&cmd.key)?;
        println!("Deleted {}", cmd.key);
        return Ok(());
    }
    if cmd.value.is_empty() {
        match db.get(&cmd.key)? {
            Some(v) => println!("{}", v),
            None => println!("(unset)"),
        }
    } else {
        db.set(&cmd.key, &cmd.value)?;
        println!("{} = {}", cmd.key, cmd.value);
    }
    Ok(())
}

fn run_db_dump() -> Result<()> {
    let db = open_db();
    for (key, value) in db.all(None)? {
        println!("{}\t{}", key, value);
    }
    Ok(())
}

fn run_db_reset() -> Result<()> {
    let db = open_db();
    db.reset(collector_db::DEFAULT_ROWS)?;
    println!("Database reset to defaults");
    Ok(())
}

fn run_users_list() -> Result<()> {
    let db = open_db();
    for (key, roles) in db.all(Some("user/"))? {
        let cn = key.strip_prefix("user/").unwrap_or(&key);
        println!("{}\t{}", cn, roles);
    }
    Ok(())
}

/// Unpacks and verifies a command container, checks signer authorization,
/// routes the payload to its schema validator, and on success records the
/// new version in the database. Mirrors `command_file.py`'s `handle_*`
/// dispatch.
fn run_cmd_load(cmd: CmdLoadCommand) -> Result<()> {
    let cmd_type = parse_cmd_type(&cmd.cmd_type)?;
    let db = open_db();
    let log = open_event_log();

    let members = command_file::unpack_container(&cmd.file)?;
    let names: Vec<String> = members.iter().map(|(n, _)| n.clone()).collect();
    let payload_name = command_file::command_filename(cmd_type, &names)?;
    let payload = members
        .iter()
        .find(|(n, _)| *n == payload_name)
        .map(|(_, data)| data.clone())
        .ok_or_else(|| format_err!("Payload {:?} missing after selection", payload_name))?;

    let trust_container = std::env::var("IVXV_ADMIN_CONF")
        .map(PathBuf::from)
        .unwrap_or_else(|_| data_dir().join("trust.bdoc"));
    let signatures = command_file::verify_container(&trust_container, &cmd.file)?;
    let content = String::from_utf8_lossy(&payload).into_owned();

    // A trust command bootstraps its own signer list: a new trust config is
    // accepted when the signer is already named in the config's own
    // `authorizations`, matching the original's self-referential first load.
    let trusted_cns: Option<Vec<String>> = if cmd_type == CommandType::Trust {
        Some(collector_config::trust::parse(&content)?.authorizations)
    } else {
        None
    };
    let db_ref = &db;
    let authorized = command_file::authorized_signers(
        cmd_type,
        &signatures,
        trusted_cns.as_deref(),
        |cn| db_ref.get(&format!("user/{}", cn)).ok().flatten(),
    );

    let signer = authorized.first().ok_or_else(|| {
        collector_admin::CommandRejected(format!(
            "No authorized signer found among {} signature(s) on {:?}",
            signatures.len(),
            cmd.file
        ))
    })?;

    validate_payload(cmd_type, &content)?;

    let active = active_path(&cmd.cmd_type);
    std::fs::create_dir_all(active.parent().unwrap())?;
    std::fs::write(&active, &content)?;

    let version = format!("{} {}", signer.signer, signer.timestamp);
    apply_command_effects(cmd_type, &content, &version, &db)?;

    let mut params = HashMap::new();
    params.insert("cmd_type".to_string(), cmd.cmd_type.clone());
    params.insert("version".to_string(), version.clone());
    log.record("CMD_LOADED", Level::Info, None, &params)?;

    println!("Loaded {} command, version {:?}", cmd.cmd_type, version);
    Ok(())
}

/// The active-area file a prior `cmd-load` of `cmd_type` left behind, per
/// spec.md §3's "symbolic link to the authoritative command-history file"
/// layout, simplified here to a plain copy of the loaded payload.
fn active_path(cmd_type: &str) -> PathBuf {
    data_dir().join("active").join(cmd_type)
}

fn read_active(cmd_type: &str) -> Result<Option<String>> {
    let path = active_path(cmd_type);
    if !path.exists() {
        return Ok(None);
    }
    Ok(Some(std::fs::read_to_string(path)?))
}

/// Applies every database/filesystem side effect a command's type carries
/// beyond recording its own version string, per the per-type effect table
/// `command_file.py`'s `handle_*` functions each implement.
fn apply_command_effects(cmd_type: CommandType, content: &str, version: &str, db: &Db) -> Result<()> {
    match cmd_type {
        CommandType::Trust => {
            let trust = collector_config::trust::parse(content)?;
            db.reset(collector_db::DEFAULT_ROWS)?;
            db.set("config/trust", version)?;
            for cn in &trust.authorizations {
                db.set(&format!("user/{}", cn), "admin")?;
            }
        }
        CommandType::Technical => {
            apply_technical_effects(&collector_config::technical::parse(content)?, db)?;
            db.set("config/technical", version)?;
        }
        CommandType::Election => {
            apply_election_effects(&collector_config::election::parse(content)?, db)?;
            db.set("config/election", version)?;
        }
        CommandType::Choices => {
            db.set("list/choices", version)?;
        }
        CommandType::Districts => {
            let districts = collector_config::districts::parse(content)?;
            write_districts_snapshot(&districts)?;
            db.set("list/districts", version)?;
        }
        CommandType::Voters => {
            apply_voters_effects(content, version, db)?;
        }
        CommandType::User => {
            let user = collector_config::user::parse(content)?;
            db.set(&format!("user/{}", user.cn), &collector_config::user::roles_to_value(&user.roles))?;
        }
    }
    Ok(())
}

/// Registers/refreshes every `service/<id>/*` and `host/<host>/state` row
/// named by a technical config, and marks any previously-registered service
/// absent from the new network layout as `REMOVED`, per §4.3's technical
/// effect.
fn apply_technical_effects(cfg: &collector_config::technical::TechnicalConfig, db: &Db) -> Result<()> {
    let mut seen_ids = std::collections::HashSet::new();

    for (seg, (service_type, id, address)) in cfg.all_segments_services() {
        seen_ids.insert(id.to_string());
        seed_service_row(db, id, service_type, address, &seg.id)?;
    }
    for seg in &cfg.network {
        for inst in &seg.services.log {
            seen_ids.insert(inst.id.clone());
            seed_service_row(db, &inst.id, "log", &inst.address, &seg.id)?;
        }
        for inst in &seg.services.backup {
            seen_ids.insert(inst.id.clone());
            seed_service_row(db, &inst.id, "backup", &inst.address, &seg.id)?;
        }
    }

    for key in db.keys(Some("service/"))? {
        let id = match key.strip_prefix("service/").and_then(|rest| rest.strip_suffix("/service-type")) {
            Some(id) => id,
            None => continue,
        };
        if !seen_ids.contains(id) {
            db.set(&format!("service/{}/state", id), "REMOVED")?;
        }
    }
    Ok(())
}

fn seed_service_row(db: &Db, id: &str, service_type: &str, address: &str, network: &str) -> Result<()> {
    let prefix = format!("service/{}", id);
    let is_new = db.get(&format!("{}/service-type", prefix))?.is_none();
    db.set(&format!("{}/service-type", prefix), service_type)?;
    db.set(&format!("{}/ip-address", prefix), address)?;
    db.set(&format!("{}/network", prefix), network)?;

    if is_new {
        db.set(&format!("{}/state", prefix), "NOT_INSTALLED")?;
        db.set(&format!("{}/ping-errors", prefix), "0")?;
        db.set(&format!("{}/last-data", prefix), "")?;
        db.set(&format!("{}/technical-conf-version", prefix), "")?;
        db.set(&format!("{}/election-conf-version", prefix), "")?;
        if let Some(params) = service_type_params(service_type) {
            if params.require_tls {
                db.set(&format!("{}/tls-key", prefix), "")?;
                db.set(&format!("{}/tls-cert", prefix), "")?;
            }
            if params.mobile_id {
                db.set(&format!("{}/mid-token-key", prefix), "")?;
            }
            if params.tspreg {
                db.set(&format!("{}/tspreg-key", prefix), "")?;
            }
        }
    } else if db.get(&format!("{}/state", prefix))?.as_deref() == Some("REMOVED") {
        // Reappeared in a new network layout: start over, not CONFIGURED.
        db.set(&format!("{}/state", prefix), "NOT_INSTALLED")?;
    }

    let host = address.split(':').next().unwrap_or(address);
    db.set(&format!("host/{}/state", host), "REGISTERED")?;
    Ok(())
}

/// Writes the election timeline, and sets each `election/auth/<method>`/
/// `election/tsp-qualification` flag to `TRUE` or deletes it, since the key
/// schema has no valid "disabled" value for those two rows, per §4.3's
/// election effect.
fn apply_election_effects(cfg: &collector_config::election::ElectionConfig, db: &Db) -> Result<()> {
    db.set("election/election-id", &cfg.identifier)?;
    db.set("election/servicestart", &cfg.period.servicestart)?;
    db.set("election/electionstart", &cfg.period.electionstart)?;
    db.set("election/electionstop", &cfg.period.electionstop)?;
    db.set("election/servicestop", &cfg.period.servicestop)?;

    set_or_delete(db, "election/auth/ticket", cfg.auth.ticket.is_some())?;
    set_or_delete(db, "election/auth/tls", cfg.auth.tls.is_some())?;

    let has_tsp = cfg
        .qualification
        .iter()
        .any(|q| matches!(q, Qualification::Tsp(_) | Qualification::Tspreg(_)));
    set_or_delete(db, "election/tsp-qualification", has_tsp)?;
    Ok(())
}

fn set_or_delete(db: &Db, key: &str, present: bool) -> Result<()> {
    if present {
        db.set(key, "TRUE")
    } else {
        db.delete(key)
    }
}

/// Emits the `{id: [id, label]}` districts snapshot the admin UI reads,
/// per §4.3's districts effect.
fn write_districts_snapshot(districts: &collector_config::districts::DistrictsList) -> Result<()> {
    let mut entries = Vec::new();
    for (id, d) in &districts.districts {
        entries.push(json::Value::Array(vec![
            json::Value::String(id.clone()),
            json::Value::String(d.name.clone()),
        ]));
    }
    let out_dir = data_dir().join("admin-ui-data");
    std::fs::create_dir_all(&out_dir)?;
    let text = json::stringify(&json::Value::Array(entries))?;
    std::fs::write(out_dir.join("districts.json"), text)?;
    Ok(())
}

/// Registers the changeset's version and state (`PENDING` for a full list,
/// `SKIPPED` for a changeset-skip command), per §4.3's voters effect.
fn apply_voters_effects(content: &str, version: &str, db: &Db) -> Result<()> {
    let is_skip = content.trim_start().starts_with("election:");
    let changeset = if is_skip {
        collector_config::voters::parse_changeset_skip(content)?.changeset
    } else {
        collector_config::voters::parse(content)?.changeset
    };
    let key = format!("list/voters{:04}", changeset);
    db.set(&key, version)?;
    db.set(&format!("{}-state", key), if is_skip { "SKIPPED" } else { "PENDING" })?;
    Ok(())
}

fn validate_payload(cmd_type: CommandType, content: &str) -> Result<()> {
    match cmd_type {
        CommandType::Trust => {
            collector_config::trust::parse(content)?;
        }
        CommandType::Technical => {
            collector_config::technical::parse(content)?;
        }
        CommandType::Election => {
            let election = collector_config::election::parse(content)?;
            if let Some(choices_json) = read_active("choices")? {
                let choices = collector_config::choices::parse(&choices_json)?;
                collector_config::consistency::check_choices_against_election(&choices, &election)?;
            }
        }
        CommandType::Choices => {
            let choices = collector_config::choices::parse(content)?;
            if let Some(districts_json) = read_active("districts")? {
                let districts = collector_config::districts::parse(&districts_json)?;
                collector_config::consistency::check_choices_against_districts(&choices, &districts)?;
            }
        }
        CommandType::Districts => {
            collector_config::districts::parse(content)?;
        }
        CommandType::Voters => {
            if content.trim_start().starts_with("election:") {
                collector_config::voters::parse_changeset_skip(content)?;
            } else {
                let list = collector_config::voters::parse(content)?;
                if let Some(districts_json) = read_active("districts")? {
                    let districts = collector_config::districts::parse(&districts_json)?;
                    collector_config::voters::check_consistency(&list, &districts)?;
                }
            }
        }
        CommandType::User => {
            let user = collector_config::user::parse(content)?;
            collector_config::user::validate_roles(&user.roles)?;
        }
    }
    Ok(())
}

/// Clears the version key a loaded command occupies. Only `trust`/
/// `technical`/`election` (the `config/<type>` namespace) and `choices`/
/// `districts` (the `list/<type>` namespace) have a single version key a
/// bare command type can address; `voters`/`user` changesets are addressed
/// by changeset number/CN instead, so removal there goes through `db
/// --delete` on the specific key.
fn run_cmd_remove(cmd: CmdRemoveCommand) -> Result<()> {
    let cmd_type = parse_cmd_type(&cmd.cmd_type)?;
    let db = open_db();
    let log = open_event_log();

    let key = match cmd_type {
        CommandType::Trust => "config/trust".to_string(),
        CommandType::Technical => "config/technical".to_string(),
        CommandType::Election => "config/election".to_string(),
        CommandType::Choices => "list/choices".to_string(),
        CommandType::Districts => "list/districts".to_string(),
        CommandType::Voters | CommandType::User => {
            return Err(format_err!(
                "cmd-remove does not support {:?}: remove the specific changeset/user key with `collectorctl db --delete`",
                cmd.cmd_type
            ));
        }
    };

    let version = db.get(&key)?.unwrap_or_default();
    db.set(&key, "")?;
    let mut params = HashMap::new();
    params.insert("cmd_type".to_string(), cmd.cmd_type.clone());
    params.insert("version".to_string(), version);
    log.record("CMD_REMOVED", Level::Info, None, &params)?;
    println!("Removed {} command", cmd.cmd_type);
    Ok(())
}

fn run_config_validate(cmd: ConfigValidateCommand) -> Result<()> {
    let cmd_type = parse_cmd_type(&cmd.cmd_type)?;
    let content = std::fs::read_to_string(&cmd.file)?;
    validate_payload(cmd_type, &content)?;
    println!("{:?} is a valid {} config", cmd.file, cmd.cmd_type);
    Ok(())
}

/// Directory holding per-command-load progress files (§4.6): installs any
/// not-yet-installed service, pushes the active technical/election config to
/// any service whose recorded version is stale, pushes the active choices
/// list once per version, and finally pings every service. Per
/// `agent_daemon.py`'s `apply_cfg`.
fn progress_dir() -> PathBuf {
    data_dir().join("progress")
}

fn package_path(cfg_type: &str) -> PathBuf {
    data_dir().join("active").join(cfg_type)
}

fn run_config_apply() -> Result<()> {
    let db = open_db();
    let log = open_event_log();
    let services = load_service_handles(&db)?;

    let technical_version = db.get("config/technical")?.unwrap_or_default();
    let election_version = db.get("config/election")?.unwrap_or_default();

    for service in &services {
        let recorded_state = db
            .get(&format!("service/{}/state", service.service_id))?
            .unwrap_or_default();

        if recorded_state.is_empty() || recorded_state == "NOT_INSTALLED" {
            let common_pkg = data_dir().join("deb-pkg").join("ivxv-common.deb");
            let service_pkg = data_dir().join("deb-pkg").join(format!("ivxv-{}.deb", service.service_type));
            service.install_host(&db, &common_pkg, &service_pkg)?;
            println!("{}: installed", service.service_id);
        }

        if !technical_version.is_empty() {
            apply_config_if_stale(
                &db, &log, service, "technical", &technical_version, &package_path("technical"),
                |s, db, pkg, v| s.apply_technical(db, pkg, v),
            )?;
        }
        if !election_version.is_empty() {
            apply_config_if_stale(
                &db, &log, service, "election", &election_version, &package_path("election"),
                |s, db, pkg, v| s.apply_election(db, pkg, v),
            )?;
        }

        match service.ping(&db) {
            Ok(true) => println!("{}: reachable", service.service_id),
            Ok(false) | Err(_) => println!("{}: unreachable", service.service_id),
        }
    }

    apply_choices_list(&db, &services)?;

    let districts_version = db.get("list/districts")?.unwrap_or_default();
    if !districts_version.is_empty() {
        db.set("list/districts-loaded", &districts_version)?;
    }

    println!("Config apply pass complete over {} service(s)", services.len());
    Ok(())
}

/// Pushes `cfg_type`'s config to `service` if its recorded
/// `<cfg_type>-conf-version` doesn't match, logging the attempt (successful
/// or not) to that version's progress file.
fn apply_config_if_stale(
    db: &Db,
    log: &EventLog,
    service: &ServiceHandle,
    cfg_type: &str,
    version: &str,
    package: &Path,
    apply: impl FnOnce(&ServiceHandle, &Db, &Path, &str) -> Result<()>,
) -> Result<()> {
    let recorded = db
        .get(&format!("service/{}/{}-conf-version", service.service_id, cfg_type))?
        .unwrap_or_default();
    if recorded == version {
        return Ok(());
    }

    let mut progress = ProgressRecord::load_or_new(&progress_dir(), cfg_type, version, true)?;
    let result = apply(service, db, package, version);
    match &result {
        Ok(()) => {
            progress.record_attempt(&format!("applied to {}", service.service_id));
            progress.mark_completed();
            let mut params = HashMap::new();
            params.insert("cfg_type".to_string(), cfg_type.to_string());
            params.insert("version".to_string(), version.to_string());
            log.record("SERVICE_CONFIG_APPLY", Level::Info, Some(&service.service_id), &params)?;
            println!("{}: {} config applied", service.service_id, cfg_type);
        }
        Err(e) => progress.record_attempt(&format!("failed on {}: {}", service.service_id, e)),
    }
    progress.save(&progress_dir())?;
    result
}

/// Pushes the active choices list once per version to every `choices`
/// service, skipping the push if it's already at `list/choices-loaded`.
fn apply_choices_list(db: &Db, services: &[ServiceHandle]) -> Result<()> {
    let version = db.get("list/choices")?.unwrap_or_default();
    if version.is_empty() {
        return Ok(());
    }
    let loaded = db.get("list/choices-loaded")?.unwrap_or_default();
    if loaded == version {
        return Ok(());
    }

    let mut progress = ProgressRecord::load_or_new(&progress_dir(), "choices", &version, true)?;
    let package = package_path("choices");
    for service in services.iter().filter(|s| s.service_type == "choices") {
        service.apply_list("choices", &package, None, &mut progress)?;
    }
    progress.mark_completed();
    progress.save(&progress_dir())?;
    db.set("list/choices-loaded", &version)?;
    Ok(())
}

fn run_secret_load(cmd: SecretLoadCommand) -> Result<()> {
    let db = open_db();
    let handle = service_handle(&db, &cmd.service_id)?;
    let target = format!("/etc/ivxv/{}/secrets/{}", cmd.service_id, cmd.secret_type);
    let checksum = handle.load_secret(&cmd.secret_type, &cmd.file, &target)?;
    db.set(&format!("service/{}/{}", cmd.service_id, cmd.secret_type), &checksum)?;

    let log = open_event_log();
    let mut params = HashMap::new();
    params.insert(
        "secret_descr".to_string(),
        format!("{} for {}", cmd.secret_type, cmd.service_id),
    );
    log.record("SECRET_INSTALL", Level::Info, Some(&cmd.service_id), &params)?;
    println!("Loaded secret {} (sha256 {})", cmd.secret_type, checksum);
    Ok(())
}

fn service_handle(db: &Db, service_id: &str) -> Result<ServiceHandle> {
    let service_type = db
        .get(&format!("service/{}/service-type", service_id))?
        .ok_or_else(|| format_err!("Unknown service: {}", service_id))?;
    let address = db
        .get(&format!("service/{}/ip-address", service_id))?
        .unwrap_or_default();
    Ok(ServiceHandle {
        service_id: service_id.to_string(),
        service_type,
        address,
    })
}

fn load_service_handles(db: &Db) -> Result<Vec<ServiceHandle>> {
    let mut out = Vec::new();
    for key in db.keys(Some("service/"))? {
        if !key.ends_with("/service-type") {
            continue;
        }
        let service_id = key
            .strip_prefix("service/")
            .and_then(|rest| rest.strip_suffix("/service-type"))
            .unwrap_or("");
        if service_id.is_empty() {
            continue;
        }
        out.push(service_handle(db, service_id)?);
    }
    Ok(out)
}

fn run_service(cmd: ServiceCommand) -> Result<()> {
    let db = open_db();
    let handle = service_handle(&db, &cmd.service_id)?;
    match cmd.action.as_str() {
        "start" | "restart" => {
            handle.restart()?;
            println!("Restarted {}", cmd.service_id);
        }
        "stop" => {
            handle.stop()?;
            println!("Stopped {}", cmd.service_id);
        }
        "ping" => {
            let ok = handle.ping(&db)?;
            println!("{}: {}", cmd.service_id, if ok { "OK" } else { "UNREACHABLE" });
        }
        other => return Err(format_err!("Unknown service action: {}", other)),
    }
    Ok(())
}

/// Derives and prints the collector state, election phase, and per-service
/// summary, per `ivxv-status`.
fn run_status() -> Result<()> {
    let db = open_db();
    let recorded = db
        .get("collector/state")?
        .and_then(|s| match s.as_str() {
            "NOT_INSTALLED" => Some(state::CollectorState::NotInstalled),
            "INSTALLED" => Some(state::CollectorState::Installed),
            "CONFIGURED" => Some(state::CollectorState::Configured),
            "FAILURE" => Some(state::CollectorState::Failure),
            "PARTIAL_FAILURE" => Some(state::CollectorState::PartialFailure),
            _ => None,
        })
        .unwrap_or(state::CollectorState::NotInstalled);

    let technical_present = db
        .get("config/technical")?
        .map(|v| !v.is_empty())
        .unwrap_or(false);

    let mut services = HashMap::new();
    for key in db.keys(Some("service/"))? {
        if !key.ends_with("/state") {
            continue;
        }
        let service_id = key.strip_suffix("/state").unwrap().to_string();
        let service_type = db
            .get(&format!("{}/service-type", service_id))?
            .unwrap_or_default();
        let raw = db.get(&key)?.unwrap_or_default();
        if let Some(service_state) = state::ServiceState::parse(&raw) {
            services.insert(
                service_id,
                state::ServiceRecord { service_type, state: service_state },
            );
        }
    }

    let derived = state::detect_collector_state(recorded, technical_present, &services);
    println!("Collector state: {}", derived.as_str());

    let timeline = state::ElectionTimeline {
        servicestart: db.get("election/servicestart")?.filter(|v| !v.is_empty()),
        electionstart: db.get("election/electionstart")?.filter(|v| !v.is_empty()),
        electionstop: db.get("election/electionstop")?.filter(|v| !v.is_empty()),
        servicestop: db.get("election/servicestop")?.filter(|v| !v.is_empty()),
    };
    let (phase, _, _) = state::generate_election_phase(&timeline, &current_timestamp());
    println!("Election phase: {}", phase.as_str());

    for (id, rec) in &services {
        println!("  {} [{}]: {}", id, rec.service_type, rec.state.as_str());
    }

    Ok(())
}

fn current_timestamp() -> String {
    chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()
}

fn run_export_votes() -> Result<()> {
    let db = open_db();
    let services = load_service_handles(&db)?;
    let voting = services
        .iter()
        .find(|s| s.service_type == "storage")
        .ok_or_else(|| format_err!("No storage service registered"))?;
    let out = remote::ssh_run(voting.address.split(':').next().unwrap_or(&voting.address), "voteexp")?;
    let path = data_dir().join("ballot-box").join(format!(
        "exported-votes-{}.zip",
        current_timestamp().replace(':', "")
    ));
    std::fs::write(&path, out)?;
    println!("Exported votes to {:?}", path);
    Ok(())
}

/// Assembles the processor input package: districts list, every loaded
/// voters changeset (or its skip command), and the generated
/// `processor.yaml`, per `ivxv_admin`'s `create_processor_input`.
fn run_generate_processor_input() -> Result<()> {
    let db = open_db();
    let mut manifest: Vec<String> = db.keys(Some("list/voters"))?;
    manifest.sort();
    let out_dir = data_dir().join("admin-ui-data");
    std::fs::create_dir_all(&out_dir)?;
    let manifest_path = out_dir.join("processor-input-manifest.txt");
    std::fs::write(&manifest_path, manifest.join("\n"))?;
    println!("Wrote processor input manifest to {:?}", manifest_path);
    Ok(())
}

fn run_copy_log_to_logmon() -> Result<()> {
    let db = open_db();
    let address = db
        .get("logmonitor/address")?
        .filter(|v| !v.is_empty())
        .ok_or_else(|| format_err!("No log monitor registered"))?;
    let host = address.split(':').next().unwrap_or(&address).to_string();
    let lock_path = data_dir().join(format!("copy-log-from-{}-to-logmon.lock", host));
    if lock_path.exists() {
        return Err(format_err!("Log copy to {} already in progress", host));
    }
    std::fs::write(&lock_path, "")?;
    let result = remote::ssh_run(&host, "cat /var/log/ivxv/*.log");
    let _ = std::fs::remove_file(&lock_path);
    let output = result?;
    println!("Copied {} bytes of log data from {}", output.len(), host);
    db.set("logmonitor/last-data", &current_timestamp())?;
    Ok(())
}

fn run_update_packages() -> Result<()> {
    let db = open_db();
    for service in load_service_handles(&db)? {
        let host = service.address.split(':').next().unwrap_or(&service.address).to_string();
        remote::ssh_run(&host, "sudo apt-get update && sudo apt-get -y upgrade ivxv-common")?;
        println!("Updated packages on {}", service.service_id);
    }
    Ok(())
}

fn run_voterstats() -> Result<()> {
    let db = open_db();
    let services = load_service_handles(&db)?;
    let voting = services
        .iter()
        .find(|s| s.service_type == "voting")
        .ok_or_else(|| format_err!("No voting service registered"))?;
    let output = remote::ssh_run(
        voting.address.split(':').next().unwrap_or(&voting.address),
        "voterstats",
    )?;
    print!("{}", output);
    Ok(())
}

fn run_voting_sessions() -> Result<()> {
    let db = open_db();
    let services = load_service_handles(&db)?;
    let voting = services
        .iter()
        .find(|s| s.service_type == "voting")
        .ok_or_else(|| format_err!("No voting service registered"))?;
    let output = remote::ssh_run(
        voting.address.split(':').next().unwrap_or(&voting.address),
        "cat /var/log/ivxv/voting-sessions.csv",
    )?;
    print!("{}", output);
    Ok(())
}

fn run_voter_list_download(cmd: VoterListDownloadCommand) -> Result<()> {
    let db = open_db();
    let log = open_event_log();
    let key = format!("list/voters{:04}", cmd.changeset);
    match db.get(&key)? {
        Some(version) if !version.is_empty() => {
            let mut params = HashMap::new();
            params.insert("changeset_no".to_string(), cmd.changeset.to_string());
            log.record("VOTER_LIST_DOWNLOADED", Level::Info, None, &params)?;
            println!("Changeset #{} downloaded, version {:?}", cmd.changeset, version);
        }
        _ => {
            let mut params = HashMap::new();
            params.insert("changeset_no".to_string(), cmd.changeset.to_string());
            log.record("VOTER_LIST_DOWNLOAD_FAILED", Level::Error, None, &params)?;
            return Err(format_err!("Changeset #{} is not loaded", cmd.changeset));
        }
    }
    Ok(())
}

/// Drives the backup service over ssh, per `backup_service.py`'s
/// `trigger_backup`.
fn run_backup() -> Result<()> {
    let db = open_db();
    let services = load_service_handles(&db)?;
    let backup = services
        .iter()
        .find(|s| s.service_type == "backup")
        .ok_or_else(|| format_err!("No backup service registered"))?;
    remote::ssh_run(
        backup.address.split(':').next().unwrap_or(&backup.address),
        "ivxv-backup-trigger",
    )?;
    println!("Backup triggered on {}", backup.service_id);
    Ok(())
}

fn run_eventlog_dump() -> Result<()> {
    let log = open_event_log();
    for line in log.dump()? {
        println!("{}", line);
    }
    Ok(())
}

fn run() -> Result<()> {
    let args = common::args::parse_args::<Args>()?;
    match args {
        Args::CreateDataDirs => run_create_data_dirs(),
        Args::CollectorInit => run_collector_init(),
        Args::Db(cmd) => run_db(cmd),
        Args::DbDump => run_db_dump(),
        Args::DbReset => run_db_reset(),
        Args::UsersList => run_users_list(),
        Args::CmdLoad(cmd) => run_cmd_load(cmd),
        Args::CmdRemove(cmd) => run_cmd_remove(cmd),
        Args::ConfigApply => run_config_apply(),
        Args::ConfigValidate(cmd) => run_config_validate(cmd),
        Args::SecretLoad(cmd) => run_secret_load(cmd),
        Args::Service(cmd) => run_service(cmd),
        Args::Status => run_status(),
        Args::ExportVotes => run_export_votes(),
        Args::GenerateProcessorInput => run_generate_processor_input(),
        Args::CopyLogToLogmon => run_copy_log_to_logmon(),
        Args::UpdatePackages => run_update_packages(),
        Args::VoterStats => run_voterstats(),
        Args::VotingSessions => run_voting_sessions(),
        Args::VoterListDownload(cmd) => run_voter_list_download(cmd),
        Args::Backup => run_backup(),
        Args::EventlogDump => run_eventlog_dump(),
    }
}

fn main() {
    if let Err(e) = run() {
        eprintln!("collectorctl: {}", e);
        std::process::exit(1);
    }
}
