//! Error taxonomy of the remote-control service.

use shared::FrameError;
use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Why a handshake was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    /// No message arrived within the handshake window.
    Timeout,
    /// A `key` message carried the wrong secret.
    WrongKey,
    /// The first message was not a `key` message.
    NoKey,
}

impl AuthFailure {
    /// Reason text sent to the peer after `remote|Verification fail|`.
    pub fn reason(&self) -> &'static str {
        match self {
            AuthFailure::Timeout => "Timeout",
            AuthFailure::WrongKey => "wrong key",
            AuthFailure::NoKey => "didn't found any key",
        }
    }
}

impl fmt::Display for AuthFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.reason())
    }
}

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error(transparent)]
    Malformed(#[from] FrameError),

    #[error("verification failed: {0}")]
    Auth(AuthFailure),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("cannot read transfer source {}: {source}", path.display())]
    TransferSource {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("server process is not running")]
    ProcessUnavailable,

    #[error("process error: {message}")]
    Process { message: String },

    #[error("configuration error: {message}")]
    Config { message: String },
}

pub type Result<T> = std::result::Result<T, RemoteError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_failure_reasons() {
        assert_eq!(AuthFailure::Timeout.reason(), "Timeout");
        assert_eq!(AuthFailure::WrongKey.reason(), "wrong key");
        assert_eq!(AuthFailure::NoKey.reason(), "didn't found any key");
    }

    #[test]
    fn test_error_message_formatting() {
        let err = RemoteError::Auth(AuthFailure::WrongKey);
        assert_eq!(err.to_string(), "verification failed: wrong key");

        let err = RemoteError::TransferSource {
            path: PathBuf::from("/srv/logs/latest.log"),
            source: io::Error::new(io::ErrorKind::NotFound, "missing"),
        };
        assert_eq!(
            err.to_string(),
            "cannot read transfer source /srv/logs/latest.log: missing"
        );

        let err: RemoteError = FrameError::Malformed { fields: 1 }.into();
        assert!(err.to_string().contains("got 1"));
    }
}
