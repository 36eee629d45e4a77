//! A listener on a random local port plus a line-oriented SMTP client.
//!
//! ```no_run
//! let server = TestServer::start(Config::default()).await;
//! let mut client = Client::connect(server.addr).await;
//! assert!(client.reply().await.starts_with("220 "));
//! ```
#![allow(dead_code)]

use std::{
    io::Write,
    net::SocketAddr,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use smtpd::{Config, Envelope, Handler, Headers, Server};
use tempfile::NamedTempFile;
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    task::JoinHandle,
};
use tokio_rustls::{
    client::TlsStream,
    rustls::{
        pki_types::{CertificateDer, ServerName},
        ClientConfig, RootCertStore,
    },
    TlsConnector,
};

/// A message as the handler saw it.
#[derive(Clone, Debug)]
pub struct Received {
    pub envelope: Envelope,
    pub headers: Headers,
    pub body: Vec<u8>,
}

#[derive(Default)]
struct Inner {
    messages: Mutex<Vec<Received>>,
    successes: Mutex<Vec<Envelope>>,
}

/// Handler that keeps everything it is given.
#[derive(Clone, Default)]
pub struct Recorder {
    inner: Arc<Inner>,
}

impl Recorder {
    pub fn messages(&self) -> Vec<Received> {
        self.inner.messages.lock().unwrap().clone()
    }

    pub fn successes(&self) -> Vec<Envelope> {
        self.inner.successes.lock().unwrap().clone()
    }
}

#[async_trait]
impl Handler for Recorder {
    async fn handle_message(
        &self,
        envelope: &Envelope,
        headers: &Headers,
        body: &mut (dyn AsyncRead + Send + Unpin),
    ) -> anyhow::Result<()> {
        let mut content = Vec::new();
        body.read_to_end(&mut content).await?;

        self.inner.messages.lock().unwrap().push(Received {
            envelope: envelope.clone(),
            headers: headers.clone(),
            body: content,
        });
        Ok(())
    }

    fn handle_success(&self, envelope: &Envelope) {
        self.inner.successes.lock().unwrap().push(envelope.clone());
    }
}

/// A self-signed certificate for `localhost`, written to disk.
pub struct TestCertificate {
    pub certificate: NamedTempFile,
    pub key: NamedTempFile,
    pub der: CertificateDer<'static>,
}

impl TestCertificate {
    pub fn generate() -> Self {
        let certified = rcgen::generate_simple_self_signed(vec!["localhost".to_string()])
            .expect("Failed to generate certificate");

        let mut certificate = NamedTempFile::new().expect("Failed to create temp file");
        certificate
            .write_all(certified.cert.pem().as_bytes())
            .expect("Failed to write certificate");

        let mut key = NamedTempFile::new().expect("Failed to create temp file");
        key.write_all(certified.signing_key.serialize_pem().as_bytes())
            .expect("Failed to write key");

        Self {
            certificate,
            key,
            der: certified.cert.der().clone(),
        }
    }

    pub fn connector(&self) -> TlsConnector {
        let mut roots = RootCertStore::empty();
        roots
            .add(self.der.clone())
            .expect("Failed to trust test certificate");

        let config = ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();

        TlsConnector::from(Arc::new(config))
    }
}

/// A server running in the background on `127.0.0.1`.
pub struct TestServer {
    pub addr: SocketAddr,
    pub recorder: Recorder,
    task: JoinHandle<()>,
}

impl TestServer {
    pub fn config() -> Config {
        Config {
            hostname: "mx.test".to_string(),
            appname: "smtpd-test".to_string(),
            reverse_lookup: false,
            ..Config::default()
        }
    }

    pub async fn start(config: Config) -> Self {
        Self::start_with(Server::new(config)).await
    }

    pub async fn start_with(server: Server) -> Self {
        let recorder = Recorder::default();
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind test listener");
        let addr = listener.local_addr().expect("Failed to read local address");

        let server = server.with_handler(recorder.clone());
        let task = tokio::spawn(async move {
            server.serve(listener).await.expect("Server stopped");
        });

        Self {
            addr,
            recorder,
            task,
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Line-level SMTP client.
pub struct Client<S> {
    stream: BufReader<S>,
}

impl Client<TcpStream> {
    pub async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr)
            .await
            .expect("Failed to connect to test server");

        Self::new(stream)
    }

    /// Finish a STARTTLS exchange: the 220 must already have been read.
    pub async fn upgrade(self, certificate: &TestCertificate) -> Client<TlsStream<TcpStream>> {
        let stream = certificate
            .connector()
            .connect(ServerName::try_from("localhost").unwrap(), self.stream.into_inner())
            .await
            .expect("TLS handshake failed");

        Client::new(stream)
    }

    pub async fn connect_tls(
        addr: SocketAddr,
        certificate: &TestCertificate,
    ) -> Client<TlsStream<TcpStream>> {
        Self::connect(addr).await.upgrade(certificate).await
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> Client<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream: BufReader::new(stream),
        }
    }

    /// Read one reply, joining the lines of a multiline reply with `\n`.
    /// Returns an empty string once the server has closed the connection.
    pub async fn reply(&mut self) -> String {
        let mut lines = Vec::new();

        loop {
            let mut line = String::new();
            if self
                .stream
                .read_line(&mut line)
                .await
                .expect("Failed to read reply")
                == 0
            {
                break;
            }

            let line = line.trim_end().to_string();
            let last = line.as_bytes().get(3) != Some(&b'-');
            lines.push(line);
            if last {
                break;
            }
        }

        lines.join("\n")
    }

    pub async fn send(&mut self, data: &str) {
        self.stream
            .get_mut()
            .write_all(data.as_bytes())
            .await
            .expect("Failed to write");
    }

    /// Send one command line and read its reply.
    pub async fn command(&mut self, line: &str) -> String {
        self.send(&format!("{line}\r\n")).await;
        self.reply().await
    }

    /// Send a complete DATA exchange for `message`, dot-stuffing it.
    pub async fn data(&mut self, message: &str) -> String {
        let reply = self.command("DATA").await;
        assert!(reply.starts_with("354 "), "unexpected DATA reply: {reply}");

        let mut stuffed = String::new();
        for line in message.split_inclusive("\r\n") {
            if line.starts_with('.') {
                stuffed.push('.');
            }
            stuffed.push_str(line);
        }
        if !stuffed.ends_with("\r\n") {
            stuffed.push_str("\r\n");
        }
        stuffed.push_str(".\r\n");

        self.send(&stuffed).await;
        self.reply().await
    }
}
