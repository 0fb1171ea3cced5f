use common::errors::*;

/// A `set`/`delete` call used a key outside the closed management-database
/// namespace, or a value that fails the format check for its key's prefix.
#[error]
pub struct BadKeyOrValue(pub String);

/// The exclusive writer lock (or a reader's shared lock) could not be
/// acquired after the retry budget was exhausted.
#[error]
pub struct LockBusy;

/// A row that should be present per the invariants in spec.md section 3 was
/// missing, or an on-disk record could not be parsed.
#[error]
pub struct InternalInvariant(pub String);
