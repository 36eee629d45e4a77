use std::{
    future::Future,
    io,
    pin::Pin,
    task::{ready, Context, Poll},
    time::Duration,
};

use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, ReadBuf},
    time::Sleep,
};

/// Longest command line accepted, terminator included.
pub const MAX_LINE_LENGTH: usize = 4096;

/// Idle deadline around a duplex stream.
///
/// Each read and each write must make progress within `timeout` of first
/// being polled, otherwise it fails with [`io::ErrorKind::TimedOut`]. The
/// timer restarts with every operation. A zero timeout disables it.
#[derive(Debug)]
pub struct Deadline<S> {
    inner: S,
    timeout: Duration,
    read_timer: Option<Pin<Box<Sleep>>>,
    write_timer: Option<Pin<Box<Sleep>>>,
}

impl<S> Deadline<S> {
    pub const fn new(inner: S, timeout: Duration) -> Self {
        Self {
            inner,
            timeout,
            read_timer: None,
            write_timer: None,
        }
    }
}

fn poll_timer(
    timer: &mut Option<Pin<Box<Sleep>>>,
    timeout: Duration,
    cx: &mut Context<'_>,
) -> Poll<io::Error> {
    if timeout.is_zero() {
        return Poll::Pending;
    }

    let sleep = timer.get_or_insert_with(|| Box::pin(tokio::time::sleep(timeout)));
    ready!(sleep.as_mut().poll(cx));
    *timer = None;

    Poll::Ready(io::Error::new(
        io::ErrorKind::TimedOut,
        format!("no activity for {}s", timeout.as_secs()),
    ))
}

/// Drive `op` under `timer`, clearing the timer once `op` completes.
fn with_timer<T>(
    timer: &mut Option<Pin<Box<Sleep>>>,
    timeout: Duration,
    cx: &mut Context<'_>,
    op: Poll<io::Result<T>>,
) -> Poll<io::Result<T>> {
    if op.is_ready() {
        *timer = None;
        return op;
    }

    poll_timer(timer, timeout, cx).map(Err)
}

impl<S: AsyncRead + Unpin> AsyncRead for Deadline<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let op = Pin::new(&mut this.inner).poll_read(cx, buf);
        with_timer(&mut this.read_timer, this.timeout, cx, op)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for Deadline<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let op = Pin::new(&mut this.inner).poll_write(cx, buf);
        with_timer(&mut this.write_timer, this.timeout, cx, op)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let op = Pin::new(&mut this.inner).poll_flush(cx);
        with_timer(&mut this.write_timer, this.timeout, cx, op)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let op = Pin::new(&mut this.inner).poll_shutdown(cx);
        with_timer(&mut this.write_timer, this.timeout, cx, op)
    }
}

/// Line framing over a connection: CRLF command lines in, CRLF replies out.
pub struct Framed<S> {
    inner: BufReader<S>,
}

impl<S: AsyncRead + AsyncWrite + Unpin> Framed<S> {
    pub fn new(stream: S) -> Self {
        Self {
            inner: BufReader::new(stream),
        }
    }

    pub fn get_ref(&self) -> &S {
        self.inner.get_ref()
    }

    /// Give back the connection, discarding anything buffered.
    pub fn into_inner(self) -> S {
        self.inner.into_inner()
    }

    /// Read one line, without its terminator.
    ///
    /// Accepts CRLF or a bare LF. End of stream before a terminator is
    /// [`io::ErrorKind::UnexpectedEof`]; a line longer than
    /// [`MAX_LINE_LENGTH`] is [`io::ErrorKind::InvalidData`].
    pub async fn read_line(&mut self) -> io::Result<String> {
        let mut line = Vec::new();

        loop {
            let available = self.inner.fill_buf().await?;
            if available.is_empty() {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed mid-line",
                ));
            }

            let (chunk, done) = match available.iter().position(|&b| b == b'\n') {
                Some(idx) => (&available[..=idx], true),
                None => (available, false),
            };

            if line.len() + chunk.len() > MAX_LINE_LENGTH {
                return Err(io::Error::new(io::ErrorKind::InvalidData, "line too long"));
            }

            line.extend_from_slice(chunk);
            let consumed = chunk.len();
            self.inner.consume(consumed);

            if done {
                break;
            }
        }

        while matches!(line.last(), Some(b'\n' | b'\r')) {
            line.pop();
        }

        Ok(String::from_utf8_lossy(&line).into_owned())
    }

    /// Write `line` followed by CRLF, and flush.
    pub async fn write_line(&mut self, line: &str) -> io::Result<()> {
        let mut bytes = Vec::with_capacity(line.len() + 2);
        bytes.extend_from_slice(line.as_bytes());
        bytes.extend_from_slice(b"\r\n");

        self.inner.write_all(&bytes).await?;
        self.inner.flush().await
    }

    /// The message body that follows a 354 reply.
    pub fn dot_reader(&mut self) -> DotReader<'_, BufReader<S>> {
        DotReader::new(&mut self.inner)
    }

    pub async fn shutdown(&mut self) -> io::Result<()> {
        self.inner.shutdown().await
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum DotState {
    LineStart,
    AfterDot,
    AfterDotCr,
    Text,
    Done,
}

/// Reads a DATA body up to its `.` line, undoing dot-stuffing.
///
/// Line endings are passed through untouched, so the terminator's leading
/// CRLF is the last thing the body yields. Once the terminator has been read
/// the reader reports end of stream; running out of input first is
/// [`io::ErrorKind::UnexpectedEof`].
pub struct DotReader<'a, R> {
    inner: &'a mut R,
    state: DotState,
    failure: Option<io::ErrorKind>,
}

impl<'a, R: AsyncBufRead + Unpin> DotReader<'a, R> {
    pub fn new(inner: &'a mut R) -> Self {
        Self {
            inner,
            state: DotState::LineStart,
            failure: None,
        }
    }

    pub fn is_done(&self) -> bool {
        self.state == DotState::Done
    }

    /// The kind of error the underlying stream failed with, if it did.
    ///
    /// Distinguishes a broken connection from errors raised by whoever is
    /// consuming the body.
    pub const fn failure(&self) -> Option<io::ErrorKind> {
        self.failure
    }

    /// Discard the rest of the body, returning how many bytes were skipped.
    pub async fn drain(&mut self) -> io::Result<u64> {
        tokio::io::copy(self, &mut tokio::io::sink()).await
    }
}

impl<R: AsyncBufRead + Unpin> AsyncRead for DotReader<'_, R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();

        loop {
            if this.state == DotState::Done || buf.remaining() == 0 {
                return Poll::Ready(Ok(()));
            }

            let mut reader = Pin::new(&mut *this.inner);
            let available = match ready!(reader.as_mut().poll_fill_buf(cx)) {
                Ok([]) => {
                    this.failure = Some(io::ErrorKind::UnexpectedEof);
                    return Poll::Ready(Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "message body ended without terminator",
                    )));
                }
                Ok(available) => available,
                Err(err) => {
                    this.failure = Some(err.kind());
                    return Poll::Ready(Err(err));
                }
            };

            let mut consumed = 0;
            while consumed < available.len() && buf.remaining() > 0 {
                let byte = available[consumed];

                match this.state {
                    DotState::LineStart if byte == b'.' => {
                        this.state = DotState::AfterDot;
                        consumed += 1;
                    }
                    DotState::LineStart => this.state = DotState::Text,
                    DotState::AfterDot => match byte {
                        b'\r' => {
                            this.state = DotState::AfterDotCr;
                            consumed += 1;
                        }
                        b'\n' => {
                            this.state = DotState::Done;
                            consumed += 1;
                        }
                        // A stuffed dot: drop it and keep the rest of the line.
                        _ => this.state = DotState::Text,
                    },
                    DotState::AfterDotCr if byte == b'\n' => {
                        this.state = DotState::Done;
                        consumed += 1;
                    }
                    DotState::AfterDotCr => {
                        buf.put_slice(b"\r");
                        this.state = DotState::Text;
                    }
                    DotState::Text => {
                        let rest = &available[consumed..];
                        let line_end = rest
                            .iter()
                            .position(|&b| b == b'\n')
                            .map_or(rest.len(), |idx| idx + 1);
                        let count = line_end.min(buf.remaining());

                        buf.put_slice(&rest[..count]);
                        consumed += count;

                        if rest[count - 1] == b'\n' {
                            this.state = DotState::LineStart;
                        }
                    }
                    DotState::Done => break,
                }

                if this.state == DotState::Done {
                    break;
                }
            }

            reader.consume(consumed);

            if buf.filled().len() > before || this.state == DotState::Done {
                return Poll::Ready(Ok(()));
            }
        }
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};

    use super::{Deadline, DotReader, Framed, MAX_LINE_LENGTH};

    async fn decode(input: &[u8]) -> std::io::Result<(Vec<u8>, Vec<u8>)> {
        let mut reader = BufReader::new(input);
        let mut body = Vec::new();
        DotReader::new(&mut reader).read_to_end(&mut body).await?;

        let mut rest = Vec::new();
        reader.read_to_end(&mut rest).await?;
        Ok((body, rest))
    }

    #[tokio::test]
    async fn dot_reader_stops_at_terminator() {
        let (body, rest) = decode(b"Subject: hi\r\n\r\nbody\r\n.\r\nQUIT\r\n")
            .await
            .unwrap();

        assert_eq!(body, b"Subject: hi\r\n\r\nbody\r\n");
        assert_eq!(rest, b"QUIT\r\n");
    }

    #[tokio::test]
    async fn dot_reader_unstuffs() {
        let (body, _) = decode(b"..leading\r\n.x\r\nmid.dle\r\n...\r\n.\r\n")
            .await
            .unwrap();

        assert_eq!(body, b".leading\r\nx\r\nmid.dle\r\n..\r\n");
    }

    #[tokio::test]
    async fn dot_reader_accepts_bare_lf() {
        let (body, rest) = decode(b"one\ntwo\n.\nNOOP\n").await.unwrap();

        assert_eq!(body, b"one\ntwo\n");
        assert_eq!(rest, b"NOOP\n");
    }

    #[tokio::test]
    async fn dot_reader_empty_body() {
        let (body, rest) = decode(b".\r\n").await.unwrap();
        assert!(body.is_empty());
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn dot_reader_requires_terminator() {
        let mut reader = BufReader::new(&b"no end in sight\r\n"[..]);
        let mut dot = DotReader::new(&mut reader);
        let err = dot.drain().await.unwrap_err();

        assert_eq!(err.kind(), std::io::ErrorKind::UnexpectedEof);
        assert_eq!(dot.failure(), Some(std::io::ErrorKind::UnexpectedEof));
        assert!(!dot.is_done());
    }

    #[tokio::test]
    async fn dot_reader_small_reads() {
        let mut reader = BufReader::with_capacity(1, &b"a\r\n..b\r\n.\r\n"[..]);
        let mut dot = DotReader::new(&mut reader);
        let mut body = Vec::new();
        let mut byte = [0; 1];

        while dot.read(&mut byte).await.unwrap() == 1 {
            body.push(byte[0]);
        }

        assert!(dot.is_done());
        assert_eq!(body, b"a\r\n.b\r\n");
    }

    #[tokio::test]
    async fn framed_lines() {
        let (client, server) = tokio::io::duplex(1024);
        let mut framed = Framed::new(server);
        let (mut client_read, mut client_write) = tokio::io::split(client);

        client_write
            .write_all(b"HELO there\r\nNOOP\n")
            .await
            .unwrap();
        assert_eq!(framed.read_line().await.unwrap(), "HELO there");
        assert_eq!(framed.read_line().await.unwrap(), "NOOP");

        framed.write_line("250 Ok").await.unwrap();
        let mut buf = [0; 8];
        client_read.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"250 Ok\r\n");

        drop(client_write);
        drop(client_read);
        let err = framed.read_line().await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn framed_rejects_long_lines() {
        let (mut client, server) = tokio::io::duplex(MAX_LINE_LENGTH * 2);
        let mut framed = Framed::new(server);

        client
            .write_all(&vec![b'a'; MAX_LINE_LENGTH + 1])
            .await
            .unwrap();
        let err = framed.read_line().await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
    }

    #[tokio::test(start_paused = true)]
    async fn framed_times_out_when_idle() {
        let (_client, server) = tokio::io::duplex(64);
        let mut framed = Framed::new(Deadline::new(server, Duration::from_secs(5)));

        let err = framed.read_line().await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::TimedOut);
    }
}
