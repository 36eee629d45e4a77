#![deny(clippy::pedantic, clippy::all, clippy::nursery)]
#![allow(clippy::must_use_candidate)]

use std::path::PathBuf;

use async_trait::async_trait;
use smtpd::{internal, Config, Envelope, Handler, Headers, Server};
use tokio::io::AsyncRead;

/// Logs every message it receives and throws it away.
struct LogHandler;

#[async_trait]
impl Handler for LogHandler {
    async fn handle_message(
        &self,
        envelope: &Envelope,
        headers: &Headers,
        body: &mut (dyn AsyncRead + Send + Unpin),
    ) -> anyhow::Result<()> {
        let size = tokio::io::copy(body, &mut tokio::io::sink()).await?;

        internal!(
            level = INFO,
            "Message from <{}> ({}) for {:?}: subject {:?}, {} body bytes",
            envelope.from,
            envelope.remote_addr,
            envelope.recipients,
            headers.get("Subject").unwrap_or_default(),
            size
        );

        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    smtpd::logging::init();

    let config = match find_config_file()? {
        Some(path) => {
            internal!(level = INFO, "Loading configuration from {}", path.display());
            Config::from_file(&path)?
        }
        None => {
            internal!(level = INFO, "No configuration file found, using defaults");
            Config::default()
        }
    };

    let server = Server::new(config).with_handler(LogHandler);

    tokio::select! {
        result = server.listen_and_serve() => result?,
        _ = tokio::signal::ctrl_c() => {
            internal!(level = INFO, "Received Ctrl-C, shutting down");
        }
    }

    Ok(())
}

/// Find the configuration file using the following precedence:
/// 1. `SMTPD_CONFIG` environment variable
/// 2. ./smtpd.toml (current working directory)
/// 3. /etc/smtpd/smtpd.toml (system-wide config)
fn find_config_file() -> anyhow::Result<Option<PathBuf>> {
    if let Ok(env_path) = std::env::var("SMTPD_CONFIG") {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return Ok(Some(path));
        }
        anyhow::bail!(
            "SMTPD_CONFIG points to non-existent file: {}",
            path.display()
        );
    }

    Ok([
        PathBuf::from("./smtpd.toml"),
        PathBuf::from("/etc/smtpd/smtpd.toml"),
    ]
    .into_iter()
    .find(|path| path.exists()))
}
