//! Error types for cliptun-core.

use thiserror::Error;

/// Main error type for cliptun operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error from underlying system calls.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration (unknown transport string, bad blocksize, ...).
    /// Fatal at startup.
    #[error("configuration error: {message}")]
    Config { message: String },

    /// Codec failure while armoring or de-armoring a packet. The channel
    /// loop drops these silently; they are never surfaced to the application.
    #[error("codec error: {message}")]
    Codec { message: String },

    /// Transport layer failure (clipboard access, child process, socket).
    #[error("transport error: {message}")]
    Transport { message: String },

    /// Invalid port forward specification.
    #[error("invalid forward spec: {message}")]
    InvalidForwardSpec { message: String },

    /// Failure in the internal SSH session.
    #[error("ssh error: {0}")]
    Ssh(#[from] russh::Error),

    /// Failure in an SFTP sub-operation.
    #[error("sftp error: {message}")]
    Sftp { message: String },

    /// Port forwarding failure.
    #[error("forward error: {message}")]
    Forward { message: String },
}

impl Error {
    pub(crate) fn codec(message: impl Into<String>) -> Self {
        Error::Codec {
            message: message.into(),
        }
    }

    pub(crate) fn transport(message: impl Into<String>) -> Self {
        Error::Transport {
            message: message.into(),
        }
    }

    pub(crate) fn config(message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
        }
    }
}

/// Convenience result type for cliptun operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_codec() {
        let err = Error::codec("cannot decrypt packet");
        assert_eq!(err.to_string(), "codec error: cannot decrypt packet");
    }

    #[test]
    fn error_display_config() {
        let err = Error::config("unknown transport method");
        assert_eq!(
            err.to_string(),
            "configuration error: unknown transport method"
        );
    }

    #[test]
    fn io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
