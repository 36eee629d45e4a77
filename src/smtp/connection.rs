use std::{
    io,
    pin::Pin,
    task::{Context, Poll},
};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio_rustls::{
    rustls::{ProtocolVersion, ServerConnection, SupportedCipherSuite},
    server::TlsStream,
    TlsAcceptor,
};

use crate::{error::TlsError, internal};

#[derive(Debug)]
pub struct TlsInfo {
    version: Option<ProtocolVersion>,
    ciphers: Option<SupportedCipherSuite>,
}

impl TlsInfo {
    fn of(conn: &ServerConnection) -> Self {
        Self {
            version: conn.protocol_version(),
            ciphers: conn.negotiated_cipher_suite(),
        }
    }

    pub fn proto(&self) -> String {
        self.version
            .and_then(|version| version.as_str())
            .map(str::to_string)
            .unwrap_or_default()
    }

    pub fn cipher(&self) -> String {
        self.ciphers
            .and_then(|ciphers| ciphers.suite().as_str())
            .map(str::to_string)
            .unwrap_or_default()
    }
}

/// The transport a session speaks over, before or after a TLS handshake.
pub enum Connection<Stream> {
    Plain { stream: Stream },
    Tls { stream: Box<TlsStream<Stream>> },
}

impl<Stream: AsyncRead + AsyncWrite + Unpin> Connection<Stream> {
    pub const fn is_tls(&self) -> bool {
        matches!(self, Self::Tls { .. })
    }

    /// Run a server-side handshake over a fresh stream.
    pub async fn accept(stream: Stream, acceptor: &TlsAcceptor) -> Result<(Self, TlsInfo), TlsError> {
        let stream = acceptor.accept(stream).await.map_err(TlsError::Handshake)?;
        let info = TlsInfo::of(stream.get_ref().1);

        Ok((
            Self::Tls {
                stream: Box::new(stream),
            },
            info,
        ))
    }

    /// Upgrade a plaintext connection in place.
    ///
    /// On failure the original connection is handed back alongside the
    /// error so the caller can keep talking over it.
    pub async fn upgrade(self, acceptor: &TlsAcceptor) -> Result<(Self, TlsInfo), (TlsError, Self)> {
        internal!(level = DEBUG, "Upgrading connection ...");

        match self {
            Self::Plain { stream } => match acceptor.accept(stream).into_fallible().await {
                Ok(stream) => {
                    let info = TlsInfo::of(stream.get_ref().1);

                    Ok((
                        Self::Tls {
                            stream: Box::new(stream),
                        },
                        info,
                    ))
                }
                Err((err, stream)) => Err((TlsError::Handshake(err), Self::Plain { stream })),
            },
            tls @ Self::Tls { .. } => Err((
                TlsError::Handshake(io::Error::other("connection is already encrypted")),
                tls,
            )),
        }
    }
}

impl<Stream: AsyncRead + AsyncWrite + Unpin> AsyncRead for Connection<Stream> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain { stream } => Pin::new(stream).poll_read(cx, buf),
            Self::Tls { stream } => Pin::new(stream.as_mut()).poll_read(cx, buf),
        }
    }
}

impl<Stream: AsyncRead + AsyncWrite + Unpin> AsyncWrite for Connection<Stream> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Self::Plain { stream } => Pin::new(stream).poll_write(cx, buf),
            Self::Tls { stream } => Pin::new(stream.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain { stream } => Pin::new(stream).poll_flush(cx),
            Self::Tls { stream } => Pin::new(stream.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain { stream } => Pin::new(stream).poll_shutdown(cx),
            Self::Tls { stream } => Pin::new(stream.as_mut()).poll_shutdown(cx),
        }
    }
}
