//! Splits a message into its top-level header block and body.
//!
//! Only the outermost headers are parsed. Multipart structure, transfer
//! encodings and nested parts stay inside the body stream for the handler.

use std::io;

use mailparse::MailParseError;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

/// Largest header block accepted before the body starts.
pub const MAX_HEADER_BYTES: usize = 256 * 1024;

#[derive(Debug, Error)]
pub enum MimeError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Malformed header: {0}")]
    Parse(#[from] MailParseError),

    #[error("Header block exceeds {0} bytes")]
    TooLarge(usize),
}

/// The top-level headers of a message, in the order they were sent.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Headers {
    fields: Vec<(String, String)>,
}

impl Headers {
    /// The first value for `name`, compared case-insensitively.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.fields
            .iter()
            .filter(move |(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl FromIterator<(String, String)> for Headers {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}

/// Read the header block from `reader`, leaving it positioned at the body.
///
/// The block ends at the first empty line, which is consumed. A message
/// that ends before any empty line is all headers and has an empty body.
/// At most one byte past [`MAX_HEADER_BYTES`] is ever buffered.
pub async fn read_headers<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<Headers, MimeError> {
    let mut block = Vec::new();

    loop {
        let start = block.len();
        let remaining = (MAX_HEADER_BYTES + 1 - start) as u64;
        if (&mut *reader)
            .take(remaining)
            .read_until(b'\n', &mut block)
            .await?
            == 0
        {
            break;
        }

        if matches!(&block[start..], b"\r\n" | b"\n") {
            block.truncate(start);
            break;
        }

        if block.len() > MAX_HEADER_BYTES {
            return Err(MimeError::TooLarge(MAX_HEADER_BYTES));
        }
    }

    let (headers, _) = mailparse::parse_headers(&block)?;

    Ok(headers
        .iter()
        .map(|header| (header.get_key(), header.get_value()))
        .collect())
}
