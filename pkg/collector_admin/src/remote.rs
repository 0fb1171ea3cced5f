//! Remote executor (component C5): thin wrappers over the `ssh`/`scp`
//! binaries. No retry policy lives here; callers (the service driver, the
//! agent loop) decide how to react to a failure.

use crate::error::RemoteExecFailed;
use common::errors::*;
use std::path::Path;
use std::process::{Command, Output};

const SSH_OPTS: &[&str] = &["-o", "PreferredAuthentications=publickey", "-o", "BatchMode=yes"];

fn log_argv(program: &str, args: &[String]) {
    eprintln!("+ {} {}", program, args.join(" "));
}

/// Runs `command` on `host` over ssh, returning stdout on success.
pub fn ssh_run(host: &str, command: &str) -> Result<String> {
    let mut args: Vec<String> = SSH_OPTS.iter().map(|s| s.to_string()).collect();
    args.push("-T".to_string());
    args.push(host.to_string());
    args.push(command.to_string());
    log_argv("ssh", &args);

    let output = Command::new("ssh")
        .args(&args)
        .output()
        .map_err(|e| format_err!("Failed to spawn ssh to {}: {}", host, e))?;

    check_status(host, &output)?;
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Copies `local` to `host:remote_path` via scp.
pub fn scp_to(host: &str, local: &Path, remote_path: &str) -> Result<()> {
    let mut args: Vec<String> = SSH_OPTS.iter().map(|s| s.to_string()).collect();
    args.push(local.to_string_lossy().into_owned());
    args.push(format!("{}:{}", host, remote_path));
    log_argv("scp", &args);

    let output = Command::new("scp")
        .args(&args)
        .output()
        .map_err(|e| format_err!("Failed to spawn scp to {}: {}", host, e))?;

    check_status(host, &output)
}

/// Copies `host:remote_path` to `local` via scp.
pub fn scp_from(host: &str, remote_path: &str, local: &Path) -> Result<()> {
    let mut args: Vec<String> = SSH_OPTS.iter().map(|s| s.to_string()).collect();
    args.push(format!("{}:{}", host, remote_path));
    args.push(local.to_string_lossy().into_owned());
    log_argv("scp", &args);

    let output = Command::new("scp")
        .args(&args)
        .output()
        .map_err(|e| format_err!("Failed to spawn scp from {}: {}", host, e))?;

    check_status(host, &output)
}

fn check_status(host: &str, output: &Output) -> Result<()> {
    if output.status.success() {
        return Ok(());
    }
    Err(RemoteExecFailed {
        host: host.to_string(),
        status: output.status.to_string(),
    }
    .into())
}
