use std::{mem, net::SocketAddr, sync::Arc};

use tokio::io::{AsyncRead, AsyncWrite, BufReader};

use crate::{
    error::DataErrorKind,
    handler::Envelope,
    incoming, internal, outgoing,
    server::Shared,
    smtp::{
        command::Command,
        connection::Connection,
        framed::{Deadline, Framed},
        fsm::exceeded_storage,
        limit::SizeLimitedReader,
        mime::read_headers,
        status::{Reply, Status},
        transaction::{Effect, Exchange, Policy, Transaction},
    },
};

/// What the session loop does after a command has been answered.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    StartTls,
    Close,
}

#[derive(Clone, Copy, Debug)]
enum Direction {
    Read,
    Wrote,
}

/// One client connection, from greeting to shutdown.
pub struct Session<Stream> {
    shared: Arc<Shared>,
    peer: SocketAddr,
    remote_ip: String,
    remote_host: String,
    client_name: Option<String>,
    framed: Framed<Connection<Deadline<Stream>>>,
    transaction: Transaction,
}

impl<Stream: AsyncRead + AsyncWrite + Unpin + Send> Session<Stream> {
    pub(crate) fn new(
        shared: Arc<Shared>,
        peer: SocketAddr,
        remote_host: String,
        connection: Connection<Deadline<Stream>>,
    ) -> Self {
        Self {
            shared,
            peer,
            remote_ip: peer.ip().to_string(),
            remote_host,
            client_name: None,
            framed: Framed::new(connection),
            transaction: Transaction::default(),
        }
    }

    pub fn is_tls(&self) -> bool {
        self.framed.get_ref().is_tls()
    }

    /// Serve the connection until the client quits, times out or goes away.
    pub async fn run(mut self) {
        internal!(
            level = DEBUG,
            "Connected: {} ({}), tls={}",
            self.peer,
            self.remote_host,
            self.is_tls()
        );

        let config = &self.shared.config;
        let greeting = Reply::new(
            Status::ServiceReady,
            format!("{} {} ESMTP Service ready", config.hostname, config.appname),
        );

        let mut flow = match self.write_reply(&greeting).await {
            Ok(()) => Flow::Continue,
            Err(_) => Flow::Close,
        };

        loop {
            flow = match flow {
                Flow::Continue => self.step().await,
                Flow::StartTls => {
                    let (session, next) = self.start_tls().await;
                    self = session;
                    next
                }
                Flow::Close => break,
            };
        }

        if let Err(err) = self.framed.shutdown().await {
            internal!(level = DEBUG, "Shutdown of {} failed: {err}", self.peer);
        }

        internal!(
            level = DEBUG,
            "Connection closed: {} (client {})",
            self.peer,
            self.client_name.as_deref().unwrap_or("unnamed")
        );
    }

    async fn step(&mut self) -> Flow {
        let line = match self.framed.read_line().await {
            Ok(line) => line,
            Err(err) => {
                internal!("Read from {} failed: {err}", self.peer);
                if DataErrorKind::of_transport(err.kind()) == DataErrorKind::Timeout {
                    let _ = self.write_reply(&self.timeout_reply()).await;
                }
                return Flow::Close;
            }
        };

        self.log_line(Direction::Read, &line);

        let (reply, effect) = self.dispatch(Command::from(line.as_str()));

        if let Some(reply) = reply {
            if self.write_reply(&reply).await.is_err() {
                return Flow::Close;
            }
        }

        match effect {
            Effect::None => Flow::Continue,
            Effect::SetClient(name) => {
                self.client_name = name;
                Flow::Continue
            }
            Effect::BeginData => self.receive_data().await,
            Effect::StartTls => Flow::StartTls,
            Effect::Close => Flow::Close,
        }
    }

    fn dispatch(&mut self, command: Command) -> (Option<Reply>, Effect) {
        let tls_active = self.is_tls();
        let config = &self.shared.config;
        let handler = &self.shared.handler;
        let peer = self.peer;
        let accept_recipient = |from: &str, to: &str| handler.accept_recipient(peer, from, to);

        let mut exchange = Exchange::new(Policy {
            hostname: &config.hostname,
            appname: &config.appname,
            max_size: config.max_size,
            tls_available: self.shared.tls.is_some(),
            tls_required: config.tls_required,
            tls_active,
            accept_recipient: &accept_recipient,
        });

        let transaction = mem::take(&mut self.transaction);
        self.transaction = transaction.transition(command, &mut exchange);

        (exchange.reply, exchange.effect)
    }

    /// Read one message body and answer it.
    ///
    /// The transaction ends here whatever the outcome.
    async fn receive_data(&mut self) -> Flow {
        let transaction = mem::take(&mut self.transaction);
        let mut envelope = Envelope {
            bytes_read: 0,
            remote_addr: self.peer,
            from: transaction.sender().unwrap_or_default().to_string(),
            recipients: transaction.recipients().to_vec(),
        };

        let shared = Arc::clone(&self.shared);
        let max_size = shared.config.max_size;

        let mut dot = self.framed.dot_reader();
        let mut body = BufReader::new(SizeLimitedReader::new(&mut dot, max_size));

        let outcome: anyhow::Result<()> = async {
            let headers = read_headers(&mut body).await?;
            envelope.bytes_read = body.get_ref().bytes_read();

            shared
                .handler
                .handle_message(&envelope, &headers, &mut body)
                .await?;

            // Whatever the handler left unread still counts against the limit.
            tokio::io::copy(&mut body, &mut tokio::io::sink()).await?;
            Ok(())
        }
        .await;

        let exceeded = body.get_ref().is_exceeded();
        envelope.bytes_read = body.get_ref().bytes_read();
        drop(body);

        let failure = match &outcome {
            Ok(()) => None,
            Err(err) => Some(match DataErrorKind::classify(err, dot.failure()) {
                DataErrorKind::Handler if exceeded => DataErrorKind::SizeExceeded { limit: max_size },
                kind => kind,
            }),
        };

        let failure = match failure {
            Some(DataErrorKind::SizeExceeded { .. } | DataErrorKind::Handler) if !dot.is_done() => {
                match dot.drain().await {
                    Ok(_) => failure,
                    Err(err) => Some(DataErrorKind::of_transport(err.kind())),
                }
            }
            other => other,
        };
        drop(dot);

        let reply = match (failure, outcome) {
            (None, _) => {
                internal!(
                    level = INFO,
                    "Accepted {} bytes from <{}> for {} recipient(s)",
                    envelope.bytes_read,
                    envelope.from,
                    envelope.recipients.len()
                );
                shared.handler.handle_success(&envelope);
                Reply::new(Status::Ok, "2.0.0 Ok: queued")
            }
            (Some(DataErrorKind::Timeout), _) => {
                let _ = self.write_reply(&self.timeout_reply()).await;
                return Flow::Close;
            }
            (Some(DataErrorKind::Transport), _) => return Flow::Close,
            (Some(DataErrorKind::SizeExceeded { limit }), _) => {
                internal!(
                    level = INFO,
                    "Rejected message from {}: larger than {limit} bytes",
                    self.peer
                );
                exceeded_storage(limit)
            }
            (Some(DataErrorKind::Handler), outcome) => {
                let detail = outcome
                    .err()
                    .map(|err| format!("{err:#}").replace(['\r', '\n'], " "))
                    .unwrap_or_default();
                internal!(level = WARN, "Handler failed for {}: {detail}", self.peer);
                Reply::new(
                    Status::ActionUnavailable,
                    format!("4.3.0 Requested action aborted: {detail}"),
                )
            }
        };

        match self.write_reply(&reply).await {
            Ok(()) => Flow::Continue,
            Err(_) => Flow::Close,
        }
    }

    /// Perform the TLS handshake after a 220 to STARTTLS.
    async fn start_tls(mut self) -> (Self, Flow) {
        let Some(acceptor) = self.shared.tls.clone() else {
            return (self, Flow::Continue);
        };

        match self.framed.into_inner().upgrade(&acceptor).await {
            Ok((connection, info)) => {
                internal!(
                    level = INFO,
                    "Connection from {} upgraded: {} {}",
                    self.peer,
                    info.proto(),
                    info.cipher()
                );

                self.framed = Framed::new(connection);
                self.client_name = None;
                self.transaction = Transaction::default();

                (self, Flow::Continue)
            }
            Err((err, connection)) => {
                internal!(level = WARN, "STARTTLS with {} failed: {err}", self.peer);
                self.framed = Framed::new(connection);

                let reply = Reply::new(Status::TlsFailed, "4.7.0 TLS handshake failed");
                let flow = match self.write_reply(&reply).await {
                    Ok(()) => Flow::Continue,
                    Err(_) => Flow::Close,
                };

                (self, flow)
            }
        }
    }

    fn timeout_reply(&self) -> Reply {
        let config = &self.shared.config;
        Reply::new(
            Status::Unavailable,
            format!(
                "4.4.2 {} {} ESMTP Service closing transmission channel after timeout exceeded",
                config.hostname, config.appname
            ),
        )
    }

    async fn write_reply(&mut self, reply: &Reply) -> std::io::Result<()> {
        for line in reply.wire_lines() {
            self.log_line(Direction::Wrote, &line);

            if let Err(err) = self.framed.write_line(&line).await {
                internal!("Write to {} failed: {err}", self.peer);
                return Err(err);
            }
        }

        Ok(())
    }

    fn log_line(&self, direction: Direction, line: &str) {
        if !self.shared.config.verbose {
            return;
        }

        match direction {
            Direction::Read => match &self.shared.log_read {
                Some(log) => log(&self.remote_ip, "READ", line),
                None => incoming!(level = DEBUG, "{} {}", self.remote_ip, line),
            },
            Direction::Wrote => match &self.shared.log_write {
                Some(log) => log(&self.remote_ip, "WROTE", line),
                None => outgoing!(level = DEBUG, "{} {}", self.remote_ip, line),
            },
        }
    }
}
