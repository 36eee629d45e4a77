//! Error types for the SMTP server.
//!
//! Listener-level failures are the only errors that escape [`crate::Server::serve`].
//! Everything that happens inside a session is turned into a reply code or a
//! closed connection; [`DataErrorKind`] is how the DATA phase decides which.

use std::{io, path::PathBuf};

use thiserror::Error;

/// Errors that can occur while loading or applying a TLS configuration.
#[derive(Debug, Error)]
pub enum TlsError {
    /// Failed to load TLS certificate.
    #[error("Failed to load TLS certificate from {path}: {source}")]
    CertificateLoad {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The certificate file contained no certificates.
    #[error("No certificates found in {0}")]
    NoCertificates(PathBuf),

    /// Failed to load TLS private key.
    #[error("Failed to load TLS private key from {path}: {reason}")]
    KeyLoad { path: PathBuf, reason: String },

    /// The TLS handshake with the client failed.
    #[error("TLS handshake failed: {0}")]
    Handshake(#[source] io::Error),

    /// Rustls library error.
    #[error("TLS error: {0}")]
    Rustls(String),
}

impl From<tokio_rustls::rustls::Error> for TlsError {
    fn from(err: tokio_rustls::rustls::Error) -> Self {
        Self::Rustls(err.to_string())
    }
}

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("Unable to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The configuration file is not valid TOML for [`crate::Config`].
    #[error("Invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Errors that stop a listener.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The listen address could not be bound.
    #[error("Unable to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: io::Error,
    },

    /// A non-transient error while accepting connections.
    #[error("Accept failed: {0}")]
    Accept(#[source] io::Error),

    /// TLS was requested but could not be configured.
    #[error(transparent)]
    Tls(#[from] TlsError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// The message body grew past the configured maximum.
///
/// Always carried inside an [`io::Error`] of kind `Other` when raised by the
/// body reader, so it survives any handler that propagates read errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Requested mail action aborted: exceeded storage allocation ({limit})")]
pub struct MessageTooBig {
    pub limit: usize,
}

impl From<MessageTooBig> for io::Error {
    fn from(err: MessageTooBig) -> Self {
        io::Error::other(err)
    }
}

/// How a failed DATA phase is answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataErrorKind {
    /// The client went idle; reply 421 and close.
    Timeout,
    /// The body exceeded the size ceiling; reply 552 and keep going.
    SizeExceeded { limit: usize },
    /// The peer vanished; close without a reply.
    Transport,
    /// Anything else; reply 451 with the error text.
    Handler,
}

impl DataErrorKind {
    /// Classify a failed DATA phase.
    ///
    /// `transport` is the error the connection itself reported while the
    /// body was read, if any, and takes precedence. Otherwise a
    /// [`MessageTooBig`] anywhere in the source chain makes it a size
    /// failure. Everything else, the handler's own I/O errors included, is a
    /// handler failure.
    pub fn classify(err: &anyhow::Error, transport: Option<io::ErrorKind>) -> Self {
        if let Some(kind) = transport {
            return Self::of_transport(kind);
        }

        err.chain()
            .find_map(|cause| {
                cause.downcast_ref::<MessageTooBig>().or_else(|| {
                    cause
                        .downcast_ref::<io::Error>()
                        .and_then(io::Error::get_ref)
                        .and_then(|inner| inner.downcast_ref::<MessageTooBig>())
                })
            })
            .map_or(Self::Handler, |too_big| Self::SizeExceeded {
                limit: too_big.limit,
            })
    }

    /// Classify an error reported by the connection.
    pub fn of_transport(kind: io::ErrorKind) -> Self {
        if kind == io::ErrorKind::TimedOut {
            Self::Timeout
        } else {
            Self::Transport
        }
    }
}

/// Specialized `Result` type for TLS operations.
pub type TlsResult<T> = std::result::Result<T, TlsError>;

/// Specialized `Result` type for listener operations.
pub type ServerResult<T> = std::result::Result<T, ServerError>;
