use common::errors::*;

/// A schema or cross-file consistency failure, reported with the dotted path
/// of the offending field (e.g. `/period/electionstart`) and a human
/// message. Validation never partially commits: producing this error means
/// the caller's database is left unchanged.
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub path: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn root(message: impl Into<String>) -> Self {
        Self::new("/", message)
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

impl std::error::Error for ValidationError {}

pub fn invalid(path: &str, message: impl Into<String>) -> Error {
    ValidationError::new(path, message).into()
}
