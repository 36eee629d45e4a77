use std::{
    io,
    pin::Pin,
    task::{ready, Context, Poll},
};

use tokio::io::{AsyncRead, ReadBuf};

use crate::error::MessageTooBig;

/// Counts bytes pulled from `inner` and fails once more than `limit` arrive.
///
/// Bytes past the limit are counted but never handed to the caller: the read
/// that crosses the limit is truncated to it, and every read after that
/// returns [`MessageTooBig`]. A limit of `0` never fails.
#[derive(Debug)]
pub struct SizeLimitedReader<R> {
    inner: R,
    limit: usize,
    read: usize,
}

impl<R> SizeLimitedReader<R> {
    pub const fn new(inner: R, limit: usize) -> Self {
        Self {
            inner,
            limit,
            read: 0,
        }
    }

    /// Total bytes read from the inner reader so far.
    pub const fn bytes_read(&self) -> usize {
        self.read
    }

    pub const fn is_exceeded(&self) -> bool {
        self.limit > 0 && self.read > self.limit
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for SizeLimitedReader<R> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = &mut *self;

        if this.is_exceeded() {
            return Poll::Ready(Err(MessageTooBig { limit: this.limit }.into()));
        }

        let before = buf.filled().len();
        ready!(Pin::new(&mut this.inner).poll_read(cx, buf))?;
        let read = buf.filled().len() - before;
        let delivered = this.read;
        this.read += read;

        if this.is_exceeded() {
            let allowed = this.limit.saturating_sub(delivered);
            if allowed == 0 {
                buf.set_filled(before);
                return Poll::Ready(Err(MessageTooBig { limit: this.limit }.into()));
            }

            buf.set_filled(before + allowed);
        }

        Poll::Ready(Ok(()))
    }
}

#[cfg(test)]
mod test {
    use tokio::io::AsyncReadExt;

    use super::SizeLimitedReader;
    use crate::error::{DataErrorKind, MessageTooBig};

    #[tokio::test]
    async fn unlimited_counts_everything() {
        let mut reader = SizeLimitedReader::new(&b"hello world"[..], 0);
        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();

        assert_eq!(out, b"hello world");
        assert_eq!(reader.bytes_read(), 11);
        assert!(!reader.is_exceeded());
    }

    #[tokio::test]
    async fn exactly_at_limit_is_accepted() {
        let mut reader = SizeLimitedReader::new(&b"0123456789"[..], 10);
        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();

        assert_eq!(out.len(), 10);
        assert!(!reader.is_exceeded());
    }

    #[tokio::test]
    async fn over_limit_truncates_then_fails() {
        let mut reader = SizeLimitedReader::new(&b"0123456789abcdef"[..], 10);
        let mut out = Vec::new();
        let err = reader.read_to_end(&mut out).await.unwrap_err();

        assert_eq!(out, b"0123456789");
        assert_eq!(reader.bytes_read(), 16);
        assert_eq!(
            err.get_ref()
                .and_then(|inner| inner.downcast_ref::<MessageTooBig>()),
            Some(&MessageTooBig { limit: 10 })
        );
        assert_eq!(
            DataErrorKind::classify(&anyhow::Error::from(err), None),
            DataErrorKind::SizeExceeded { limit: 10 }
        );

        // Stays failed.
        let mut buf = [0; 4];
        assert!(reader.read(&mut buf).await.is_err());
    }
}
