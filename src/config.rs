use std::{
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Idle timeout applied when none is configured.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

const DEFAULT_ADDRESS: &str = ":25";
const DEFAULT_APPNAME: &str = "smtpd";

/// Certificate and key used to build the server's TLS configuration.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsContext {
    pub certificate: PathBuf,
    pub key: PathBuf,
}

/// Server settings.
///
/// Every field may be omitted; unset strings and a zero timeout are filled
/// in by [`Config::with_defaults`] when the server is built.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// `host:port` to listen on. A bare `:port` listens on every IPv4
    /// interface; use `[::]:port` for IPv6.
    pub address: String,
    /// Name announced in the greeting.
    pub appname: String,
    /// Host name announced in the greeting and in HELO/EHLO replies.
    pub hostname: String,
    /// Largest accepted message body in bytes, `0` for no limit.
    pub max_size: usize,
    /// Idle timeout in seconds for every read and write.
    pub timeout_secs: u64,
    /// Certificate and key; STARTTLS is only offered when present.
    pub tls: Option<TlsContext>,
    /// Perform the TLS handshake immediately on connect (SMTPS).
    pub tls_listener: bool,
    /// Refuse mail transactions until STARTTLS has succeeded.
    pub tls_required: bool,
    /// Log every line read and written.
    pub verbose: bool,
    /// Resolve the peer's host name on connect.
    pub reverse_lookup: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            address: String::new(),
            appname: String::new(),
            hostname: String::new(),
            max_size: 0,
            timeout_secs: 0,
            tls: None,
            tls_listener: false,
            tls_required: false,
            verbose: false,
            reverse_lookup: true,
        }
    }
}

impl Config {
    /// Load a TOML configuration file.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be read or is not a valid configuration.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        contents.parse()
    }

    /// Fill in every unset field.
    #[must_use]
    pub fn with_defaults(mut self) -> Self {
        if self.address.is_empty() {
            self.address = DEFAULT_ADDRESS.to_string();
        }

        if self.appname.is_empty() {
            self.appname = DEFAULT_APPNAME.to_string();
        }

        if self.hostname.is_empty() {
            self.hostname = local_hostname();
        }

        if self.timeout_secs == 0 {
            self.timeout_secs = DEFAULT_TIMEOUT.as_secs();
        }

        self
    }

    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// The address in a form [`tokio::net::TcpListener::bind`] accepts.
    ///
    /// `:port` becomes `0.0.0.0:port`. Bracketed IPv6 addresses are passed
    /// through unchanged.
    pub fn bind_address(&self) -> String {
        let address = if self.address.is_empty() {
            DEFAULT_ADDRESS
        } else {
            self.address.as_str()
        };

        if address.starts_with(':') {
            format!("0.0.0.0{address}")
        } else {
            address.to_string()
        }
    }
}

impl FromStr for Config {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(toml::from_str(s)?)
    }
}

/// The machine's host name, falling back to `$HOSTNAME` and then `localhost`.
fn local_hostname() -> String {
    let mut buf = [0u8; 256];

    // SAFETY: `buf` is valid for `buf.len()` bytes; gethostname writes at
    // most that many and the result is only read up to the first NUL.
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr().cast(), buf.len()) };
    if rc == 0 {
        let len = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
        if let Ok(name) = std::str::from_utf8(&buf[..len]) {
            if !name.is_empty() {
                return name.to_string();
            }
        }
    }

    std::env::var("HOSTNAME")
        .ok()
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}
