use common::errors::*;

/// A command file failed container verification, was signed by an
/// unauthorized CN, or its payload didn't match its declared command type.
#[error]
pub struct CommandRejected(pub String);

/// A remote `ssh`/`scp` invocation exited non-zero or could not be spawned.
#[error]
pub struct RemoteExecFailed {
    pub host: String,
    pub status: String,
}

/// A service failed to reach the expected config-state after an apply
/// operation, or its ping health-check failed three times in a row.
#[error]
pub struct ServiceUnhealthy(pub String);
