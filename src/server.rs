use std::{
    io,
    net::{IpAddr, SocketAddr},
    path::Path,
    sync::Arc,
    time::Duration,
};

use hickory_resolver::{name_server::TokioConnectionProvider, TokioResolver};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpListener,
};
use tokio_rustls::{rustls::ServerConfig, TlsAcceptor};

use crate::{
    config::{Config, TlsContext},
    error::{ServerError, ServerResult, TlsResult},
    handler::{Discard, Handler, LineLogger},
    internal,
    smtp::{
        connection::Connection,
        framed::Deadline,
        session::Session,
    },
    tls,
};

const UNKNOWN_HOST: &str = "unknown";

/// Everything a session reads from the server. Never mutated once serving.
pub(crate) struct Shared {
    pub(crate) config: Config,
    pub(crate) tls: Option<TlsAcceptor>,
    pub(crate) handler: Arc<dyn Handler>,
    pub(crate) log_read: Option<LineLogger>,
    pub(crate) log_write: Option<LineLogger>,
    pub(crate) resolver: Option<TokioResolver>,
}

impl Shared {
    async fn serve_connection<Stream>(self: Arc<Self>, stream: Stream, peer: SocketAddr)
    where
        Stream: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let remote_host = self.remote_host(peer.ip()).await;
        let stream = Deadline::new(stream, self.config.timeout());

        let connection = match (&self.tls, self.config.tls_listener) {
            (Some(acceptor), true) => match Connection::accept(stream, acceptor).await {
                Ok((connection, info)) => {
                    internal!(
                        level = DEBUG,
                        "TLS connection from {peer}: {} {}",
                        info.proto(),
                        info.cipher()
                    );
                    connection
                }
                Err(err) => {
                    internal!(level = WARN, "Dropping {peer}: {err}");
                    return;
                }
            },
            _ => Connection::Plain { stream },
        };

        Session::new(self, peer, remote_host, connection).run().await;
    }

    /// The peer's first PTR name, or `unknown`.
    async fn remote_host(&self, ip: IpAddr) -> String {
        let Some(resolver) = &self.resolver else {
            return UNKNOWN_HOST.to_string();
        };

        match resolver.reverse_lookup(ip).await {
            Ok(lookup) => lookup.iter().next().map_or_else(
                || UNKNOWN_HOST.to_string(),
                |name| name.to_string().trim_end_matches('.').to_string(),
            ),
            Err(err) => {
                internal!("Reverse lookup of {ip} failed: {err}");
                UNKNOWN_HOST.to_string()
            }
        }
    }
}

/// An SMTP server under construction.
///
/// Nothing is validated until [`Server::serve`] or one of its siblings is
/// called; from then on the configuration is fixed.
pub struct Server {
    config: Config,
    tls: Option<Arc<ServerConfig>>,
    handler: Option<Arc<dyn Handler>>,
    log_read: Option<LineLogger>,
    log_write: Option<LineLogger>,
}

impl Server {
    /// A server for `config`, with unset fields filled in.
    pub fn new(config: Config) -> Self {
        Self {
            config: config.with_defaults(),
            tls: None,
            handler: None,
            log_read: None,
            log_write: None,
        }
    }

    pub const fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub fn with_handler(mut self, handler: impl Handler + 'static) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    /// Receive every line read from a client while `verbose` is set.
    #[must_use]
    pub fn with_read_logger(
        mut self,
        logger: impl Fn(&str, &str, &str) + Send + Sync + 'static,
    ) -> Self {
        self.log_read = Some(Arc::new(logger));
        self
    }

    /// Receive every line written to a client while `verbose` is set.
    #[must_use]
    pub fn with_write_logger(
        mut self,
        logger: impl Fn(&str, &str, &str) + Send + Sync + 'static,
    ) -> Self {
        self.log_write = Some(Arc::new(logger));
        self
    }

    /// Load a PEM certificate chain and key and enable TLS.
    ///
    /// # Errors
    ///
    /// Fails if either file cannot be loaded.
    pub fn configure_tls(
        mut self,
        certificate: impl AsRef<Path>,
        key: impl AsRef<Path>,
    ) -> TlsResult<Self> {
        let (certificate, key) = (certificate.as_ref(), key.as_ref());

        self.tls = Some(tls::load_server_config(certificate, key)?);
        self.config.tls = Some(TlsContext {
            certificate: certificate.to_path_buf(),
            key: key.to_path_buf(),
        });
        Ok(self)
    }

    /// Enable TLS with a prepared rustls configuration.
    #[must_use]
    pub fn with_tls_config(mut self, config: Arc<ServerConfig>) -> Self {
        self.tls = Some(config);
        self
    }

    fn build(mut self) -> ServerResult<Arc<Shared>> {
        let tls = match (self.tls, &self.config.tls) {
            (Some(config), _) => Some(config),
            (None, Some(context)) => Some(tls::load_server_config(&context.certificate, &context.key)?),
            (None, None) => None,
        };

        if self.config.tls_listener && tls.is_none() {
            internal!(
                level = WARN,
                "TLS listener requested without a TLS configuration, accepting plaintext"
            );
            self.config.tls_listener = false;
        }

        let resolver = if self.config.reverse_lookup {
            match TokioResolver::builder(TokioConnectionProvider::default()) {
                Ok(builder) => Some(builder.build()),
                Err(err) => {
                    internal!(level = WARN, "Reverse lookups disabled: {err}");
                    None
                }
            }
        } else {
            None
        };

        let verbose = self.config.verbose;
        let handler = self
            .handler
            .unwrap_or_else(|| Arc::new(Discard { verbose }) as Arc<dyn Handler>);

        Ok(Arc::new(Shared {
            config: self.config,
            tls: tls.map(TlsAcceptor::from),
            handler,
            log_read: self.log_read,
            log_write: self.log_write,
            resolver,
        }))
    }

    /// Bind the configured address and serve until accepting fails.
    ///
    /// # Errors
    ///
    /// Fails if the address cannot be bound, TLS cannot be set up, or the
    /// listener hits a non-transient error.
    pub async fn listen_and_serve(self) -> ServerResult<()> {
        let address = self.config.bind_address();
        let listener = TcpListener::bind(&address)
            .await
            .map_err(|source| ServerError::Bind { address, source })?;

        self.serve(listener).await
    }

    /// Serve connections from an already bound listener.
    ///
    /// # Errors
    ///
    /// Fails if TLS cannot be set up or the listener hits a non-transient
    /// error. Errors on individual connections never end the loop.
    pub async fn serve(self, listener: TcpListener) -> ServerResult<()> {
        let shared = self.build()?;

        if let Ok(local) = listener.local_addr() {
            internal!(
                level = INFO,
                "{} listening on {local} (tls: {}, tls listener: {})",
                shared.config.appname,
                shared.tls.is_some(),
                shared.config.tls_listener
            );
        }

        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    internal!("Connection received from {peer}");
                    tokio::spawn(Arc::clone(&shared).serve_connection(stream, peer));
                }
                Err(err) if is_transient(&err) => {
                    internal!(level = WARN, "Accept failed, retrying: {err}");
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
                Err(err) => {
                    internal!(level = ERROR, "Accept failed: {err}");
                    return Err(ServerError::Accept(err));
                }
            }
        }
    }

    /// Serve a single, already accepted connection to completion.
    ///
    /// # Errors
    ///
    /// Fails only if the server's TLS configuration cannot be set up.
    pub async fn serve_connection<Stream>(self, stream: Stream, peer: SocketAddr) -> ServerResult<()>
    where
        Stream: AsyncRead + AsyncWrite + Unpin + Send,
    {
        self.build()?.serve_connection(stream, peer).await;
        Ok(())
    }
}

/// Accept errors that leave the listener usable.
fn is_transient(err: &io::Error) -> bool {
    if let Some(code) = err.raw_os_error() {
        if matches!(code, libc::EMFILE | libc::ENFILE | libc::ENOBUFS | libc::ENOMEM) {
            return true;
        }
    }

    matches!(
        err.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
    )
}

/// Serve on `address` with the given names until accepting fails.
///
/// # Errors
///
/// See [`Server::listen_and_serve`].
pub async fn listen_and_serve(
    address: &str,
    handler: impl Handler + 'static,
    appname: &str,
    hostname: &str,
) -> ServerResult<()> {
    Server::new(Config {
        address: address.to_string(),
        appname: appname.to_string(),
        hostname: hostname.to_string(),
        ..Config::default()
    })
    .with_handler(handler)
    .listen_and_serve()
    .await
}

/// Like [`listen_and_serve`], offering STARTTLS with the given certificate.
///
/// # Errors
///
/// See [`Server::listen_and_serve`]; also fails if the certificate or key
/// cannot be loaded.
pub async fn listen_and_serve_tls(
    address: &str,
    certificate: impl AsRef<Path>,
    key: impl AsRef<Path>,
    handler: impl Handler + 'static,
    appname: &str,
    hostname: &str,
) -> ServerResult<()> {
    Server::new(Config {
        address: address.to_string(),
        appname: appname.to_string(),
        hostname: hostname.to_string(),
        ..Config::default()
    })
    .configure_tls(certificate, key)?
    .with_handler(handler)
    .listen_and_serve()
    .await
}
