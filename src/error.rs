//! Errors returned from the public surface of the library.
//!
//! Internally, functions return `Res<T>` (an `anyhow` result) and attach context as they go. At the
//! public boundary the error is tagged with an `ErrorType` using `IntoResult::pub_result` so that
//! callers (the CLI, tests) can tell a validation problem from an unreachable backend.

use serde::{Deserialize, Serialize};
use std::fmt::{Debug, Display, Formatter};

/// The internal result type.
pub(crate) type Res<T> = std::result::Result<T, anyhow::Error>;

/// The public result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Broad categories of failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    /// The home directory or its config file is missing or invalid.
    Config,
    /// User input was rejected before anything was changed.
    Validation,
    /// The referenced bill does not exist.
    NotFound,
    /// The backend rejected our credentials.
    Auth,
    /// The backend could not be reached.
    Network,
    /// A long-running service (the backend server, the monitor) failed.
    Service,
    /// Anything else.
    Internal,
}

serde_plain::derive_display_from_serialize!(ErrorType);
serde_plain::derive_fromstr_from_deserialize!(ErrorType);

/// An error with an `ErrorType` attached.
pub struct Error {
    error_type: ErrorType,
    source: anyhow::Error,
}

impl Error {
    pub fn new(error_type: ErrorType, source: impl Into<anyhow::Error>) -> Self {
        Self {
            error_type,
            source: source.into(),
        }
    }

    pub fn error_type(&self) -> ErrorType {
        self.error_type
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.source, f)
    }
}

impl Debug for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} error: {:?}", self.error_type, self.source)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.source.as_ref())
    }
}

/// Converts any result whose error can become an `anyhow::Error` into the public `Result`.
pub(crate) trait IntoResult<T> {
    fn pub_result(self, error_type: ErrorType) -> Result<T>;
}

impl<T, E> IntoResult<T> for std::result::Result<T, E>
where
    E: Into<anyhow::Error>,
{
    fn pub_result(self, error_type: ErrorType) -> Result<T> {
        self.map_err(|e| Error::new(error_type, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_pub_result_keeps_message_and_type() {
        let res: Res<()> = Err(anyhow::anyhow!("disk on fire")).context("Unable to save");
        let err = res.pub_result(ErrorType::Config).unwrap_err();
        assert_eq!(err.error_type(), ErrorType::Config);
        assert_eq!(err.to_string(), "Unable to save");
        assert!(format!("{err:#}").contains("disk on fire"));
    }

    #[test]
    fn test_error_type_display() {
        assert_eq!(ErrorType::NotFound.to_string(), "not_found");
        assert_eq!(
            "validation".parse::<ErrorType>().unwrap(),
            ErrorType::Validation
        );
    }
}
