//! A small SMTP server that hands every accepted message to a [`Handler`].
//!
//! Sessions follow RFC 5321 with the SIZE, STARTTLS and ENHANCEDSTATUSCODES
//! extensions. Message bodies are streamed to the handler behind a size
//! ceiling; nothing is spooled.

pub mod config;
pub mod error;
pub mod handler;
pub mod logging;
pub mod server;
pub mod smtp;
pub mod tls;

pub use tracing;

pub use config::{Config, TlsContext};
pub use error::{ServerError, TlsError};
pub use handler::{Discard, Envelope, Handler};
pub use server::{listen_and_serve, listen_and_serve_tls, Server};
pub use smtp::mime::Headers;
