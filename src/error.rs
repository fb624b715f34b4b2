//! Error taxonomy shared by the remote file, archive and package layers.

use std::path::PathBuf;

use thiserror::Error;

use crate::io::AuthScheme;

/// Errors reported by `vmpack`.
///
/// Nothing in the library retries on its own: every variant is surfaced to the
/// caller with enough context to decide what to do next.
#[derive(Error, Debug)]
pub enum Error {
    /// The server wants credentials. Re-open with a username and password for
    /// the given scheme.
    #[error("authentication required for {host} (realm \"{realm}\", scheme {scheme})")]
    AuthenticationRequired {
        host: String,
        realm: String,
        scheme: AuthScheme,
    },

    /// Transport or HTTP-level failure, including timeouts.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The remote resource changed after it was opened. The file that
    /// reported this is no longer usable.
    #[error("resource changed on server: {0}")]
    ResourceChanged(String),

    /// The archive or its manifest is structurally invalid.
    #[error("{message}")]
    BadContainer {
        message: String,
        detail: Option<String>,
    },

    /// Operation attempted on a file that has been closed.
    #[error("file is closed")]
    Closed,

    #[error("file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("unsupported URL: {0}")]
    UnsupportedUrl(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn protocol(msg: impl Into<String>) -> Self {
        Error::Protocol(msg.into())
    }

    pub(crate) fn bad_container(msg: impl Into<String>) -> Self {
        Error::BadContainer {
            message: msg.into(),
            detail: None,
        }
    }

    pub(crate) fn bad_container_detail(msg: impl Into<String>, detail: impl Into<String>) -> Self {
        Error::BadContainer {
            message: msg.into(),
            detail: Some(detail.into()),
        }
    }

    /// Whether the caller can fix the failure and retry the open.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::AuthenticationRequired { .. })
    }

    /// Extra diagnostic text attached to a [`Error::BadContainer`].
    pub fn detail(&self) -> Option<&str> {
        match self {
            Error::BadContainer { detail, .. } => detail.as_deref(),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Error::Protocol(format!("request timed out: {err}"))
        } else {
            Error::Protocol(err.to_string())
        }
    }
}

/// Crate-wide result type.
pub type Result<T> = std::result::Result<T, Error>;
