use core::fmt::{self, Display, Formatter};

#[repr(C, u32)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Debug)]
pub enum Status {
    ServiceReady = 220,
    GoodBye = 221,
    Ok = 250,
    StartMailInput = 354,
    TlsFailed = 403,
    Unavailable = 421,
    ActionUnavailable = 451,
    InsufficientStorage = 452,
    Unrecognised = 500,
    SyntaxError = 501,
    NotImplemented = 502,
    InvalidCommandSequence = 503,
    TlsRequired = 530,
    Error = 550,
    ExceededStorage = 552,
    Unknown(u32),
}

impl From<u32> for Status {
    fn from(value: u32) -> Self {
        match value {
            220 => Self::ServiceReady,
            221 => Self::GoodBye,
            250 => Self::Ok,
            354 => Self::StartMailInput,
            403 => Self::TlsFailed,
            421 => Self::Unavailable,
            451 => Self::ActionUnavailable,
            452 => Self::InsufficientStorage,
            500 => Self::Unrecognised,
            501 => Self::SyntaxError,
            502 => Self::NotImplemented,
            503 => Self::InvalidCommandSequence,
            530 => Self::TlsRequired,
            550 => Self::Error,
            552 => Self::ExceededStorage,
            _ => Self::Unknown(value),
        }
    }
}

impl From<Status> for u32 {
    fn from(value: Status) -> Self {
        match value {
            Status::ServiceReady => 220,
            Status::GoodBye => 221,
            Status::Ok => 250,
            Status::StartMailInput => 354,
            Status::TlsFailed => 403,
            Status::Unavailable => 421,
            Status::ActionUnavailable => 451,
            Status::InsufficientStorage => 452,
            Status::Unrecognised => 500,
            Status::SyntaxError => 501,
            Status::NotImplemented => 502,
            Status::InvalidCommandSequence => 503,
            Status::TlsRequired => 530,
            Status::Error => 550,
            Status::ExceededStorage => 552,
            Status::Unknown(v) => v,
        }
    }
}

impl Display for Status {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        write!(fmt, "{}", u32::from(*self))
    }
}

/// A complete server reply: one status and one or more text lines.
///
/// On the wire every line but the last is written as `code-text`, the last
/// as `code text`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reply {
    pub status: Status,
    pub lines: Vec<String>,
}

impl Reply {
    pub fn new(status: Status, text: impl Into<String>) -> Self {
        Self {
            status,
            lines: vec![text.into()],
        }
    }

    pub fn multiline(status: Status, lines: Vec<String>) -> Self {
        Self { status, lines }
    }

    /// The individual wire lines, without line terminators.
    pub fn wire_lines(&self) -> impl Iterator<Item = String> + '_ {
        let last = self.lines.len().saturating_sub(1);

        self.lines.iter().enumerate().map(move |(idx, line)| {
            format!(
                "{}{}{}",
                self.status,
                if idx == last { ' ' } else { '-' },
                line
            )
        })
    }
}

impl Display for Reply {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        for (idx, line) in self.wire_lines().enumerate() {
            if idx > 0 {
                fmt.write_str("\r\n")?;
            }
            fmt.write_str(&line)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::{Reply, Status};

    #[test]
    fn status_codes() {
        assert_eq!(Status::from(530), Status::TlsRequired);
        assert_eq!(Status::from(299), Status::Unknown(299));
        assert_eq!(u32::from(Status::TlsFailed), 403);
    }

    #[test]
    fn multiline_reply() {
        let reply = Reply::multiline(
            Status::Ok,
            vec![
                "mx greets client".to_string(),
                "SIZE 0".to_string(),
                "ENHANCEDSTATUSCODES".to_string(),
            ],
        );

        assert_eq!(
            reply.to_string(),
            "250-mx greets client\r\n250-SIZE 0\r\n250 ENHANCEDSTATUSCODES"
        );
    }

    #[test]
    fn single_line_reply() {
        let reply = Reply::new(Status::GoodBye, "2.0.0 Bye");
        assert_eq!(reply.wire_lines().collect::<Vec<_>>(), ["221 2.0.0 Bye"]);
    }
}
