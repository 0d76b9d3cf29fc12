//! Failure taxonomy shared by the checksum engine, artifact store, bucket
//! client and reconciler.
//!
//! The split between permanent and transient failures decides how the
//! reconciler reacts: permanent failures are recorded as a `False` condition
//! and the attempt ends without an error, transient ones are recorded *and*
//! returned so the control loop backs off before retrying.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Secret data present but missing required credential fields.
    #[error("invalid {secret:?} secret data: required fields 'accesskey' and 'secretkey'")]
    Credential { secret: String },

    /// The referenced secret could not be read.
    #[error("failed to get secret '{reference}': {reason}")]
    AuthenticationFailed { reference: String, reason: String },

    /// The resource asks for something this build cannot do (unknown
    /// provider, malformed endpoint).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Bucket, object or local artifact absent.
    #[error("{0} not found")]
    NotFound(String),

    /// Network, timeout or server-side failure. Retry with backoff.
    #[error("{0}")]
    Transient(String),

    #[error("failed to compute checksum of {path}: {source}")]
    Checksum {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Unexpected local filesystem failure.
    #[error("storage operation on {path} failed: {source}")]
    StorageFault {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("reconciliation cancelled")]
    Cancelled,
}

impl Error {
    pub(crate) fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::StorageFault {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn transient(context: impl std::fmt::Display, source: impl std::fmt::Display) -> Self {
        Error::Transient(format!("{context}: {source}"))
    }

    /// True when the failure should be propagated to the control loop so it
    /// applies exponential backoff.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Transient(_) | Error::StorageFault { .. } | Error::Checksum { .. } | Error::Cancelled
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Error::Transient(format!("request timed out: {e}"))
        } else {
            Error::Transient(format!("request failed: {e}"))
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permanent_failures_are_not_transient() {
        assert!(!Error::Credential { secret: "dummy".into() }.is_transient());
        assert!(!Error::NotFound("bucket \"x\"".into()).is_transient());
        assert!(!Error::Configuration("unsupported provider".into()).is_transient());
        assert!(Error::Transient("connection refused".into()).is_transient());
        assert!(Error::Cancelled.is_transient());
    }

    #[test]
    fn credential_message_names_the_secret() {
        let err = Error::Credential { secret: "dummy".into() };
        assert_eq!(
            err.to_string(),
            "invalid \"dummy\" secret data: required fields 'accesskey' and 'secretkey'"
        );
    }
}
