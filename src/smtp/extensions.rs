use core::fmt::{self, Display};

/// Service extensions advertised in the EHLO response.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Extension {
    /// RFC 1870 message size declaration; `0` means no fixed limit.
    Size(usize),
    /// RFC 3207
    StartTls,
    /// RFC 2034
    EnhancedStatusCodes,
}

impl Extension {
    /// The extensions to advertise, in the order they appear on the wire.
    pub fn advertised(max_size: usize, offer_tls: bool) -> Vec<Self> {
        let mut extensions = vec![Self::Size(max_size)];

        if offer_tls {
            extensions.push(Self::StartTls);
        }

        extensions.push(Self::EnhancedStatusCodes);
        extensions
    }
}

impl Display for Extension {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        match self {
            Self::Size(size) => write!(fmt, "SIZE {size}"),
            Self::StartTls => fmt.write_str("STARTTLS"),
            Self::EnhancedStatusCodes => fmt.write_str("ENHANCEDSTATUSCODES"),
        }
    }
}
