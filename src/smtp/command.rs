use core::fmt::{self, Display, Formatter};

use thiserror::Error;

#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum Verb {
    Helo,
    Ehlo,
    Mail,
    Rcpt,
    Data,
    Rset,
    Noop,
    Quit,
    StartTls,
    Help,
    Vrfy,
    Expn,
    Auth,
    Unknown(String),
}

impl From<&str> for Verb {
    fn from(value: &str) -> Self {
        match value.to_ascii_uppercase().as_str() {
            "HELO" => Self::Helo,
            "EHLO" => Self::Ehlo,
            "MAIL" => Self::Mail,
            "RCPT" => Self::Rcpt,
            "DATA" => Self::Data,
            "RSET" => Self::Rset,
            "NOOP" => Self::Noop,
            "QUIT" => Self::Quit,
            "STARTTLS" => Self::StartTls,
            "HELP" => Self::Help,
            "VRFY" => Self::Vrfy,
            "EXPN" => Self::Expn,
            "AUTH" => Self::Auth,
            other => Self::Unknown(other.to_string()),
        }
    }
}

impl Display for Verb {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> fmt::Result {
        fmt.write_str(match self {
            Self::Helo => "HELO",
            Self::Ehlo => "EHLO",
            Self::Mail => "MAIL",
            Self::Rcpt => "RCPT",
            Self::Data => "DATA",
            Self::Rset => "RSET",
            Self::Noop => "NOOP",
            Self::Quit => "QUIT",
            Self::StartTls => "STARTTLS",
            Self::Help => "HELP",
            Self::Vrfy => "VRFY",
            Self::Expn => "EXPN",
            Self::Auth => "AUTH",
            Self::Unknown(verb) => verb,
        })
    }
}

/// A command line split into its verb and (trimmed) argument text.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Command {
    pub verb: Verb,
    pub args: String,
}

impl From<&str> for Command {
    fn from(line: &str) -> Self {
        let line = line.trim_end_matches(['\r', '\n']);

        match line.split_once(char::is_whitespace) {
            Some((verb, args)) => Self {
                verb: Verb::from(verb),
                args: args.trim().to_string(),
            },
            None => Self {
                verb: Verb::from(line),
                args: String::new(),
            },
        }
    }
}

impl Display for Command {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> fmt::Result {
        if self.args.is_empty() {
            self.verb.fmt(fmt)
        } else {
            write!(fmt, "{} {}", self.verb, self.args)
        }
    }
}

/// Why a MAIL or RCPT argument was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("invalid FROM parameter")]
    InvalidFrom,
    #[error("invalid SIZE parameter")]
    InvalidSize,
    #[error("invalid TO parameter")]
    InvalidTo,
}

/// The arguments of a `MAIL` command.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct MailFrom {
    /// The reverse path, empty for the null sender `<>`.
    pub address: String,
    /// The RFC 1870 `SIZE=` declaration, if one was sent.
    pub size: Option<usize>,
}

/// Case-insensitive search for an ASCII `needle`, returning every match offset.
fn find_all<'a>(haystack: &'a str, needle: &'a str) -> impl Iterator<Item = usize> + 'a {
    let lowered = haystack.to_ascii_lowercase();
    let needle = needle.to_ascii_lowercase();

    (0..=lowered.len().saturating_sub(needle.len()))
        .filter(move |&idx| lowered.as_bytes()[idx..].starts_with(needle.as_bytes()))
}

/// Parse `FROM:<address>` with optional ESMTP parameters.
///
/// The address runs to the last `>` on the line. Anything after that which
/// starts with whitespace is treated as a parameter list, and the only
/// parameter understood is `SIZE=<digits>`.
pub fn parse_mail_from(args: &str) -> Result<MailFrom, ParseError> {
    let start = find_all(args, "from:<")
        .next()
        .ok_or(ParseError::InvalidFrom)?
        + "from:<".len();
    let rest = &args[start..];
    let end = rest.rfind('>').ok_or(ParseError::InvalidFrom)?;

    let address = rest[..end].to_string();
    let trailer = &rest[end + 1..];

    let size = match trailer.chars().next() {
        Some(c) if c.is_whitespace() => Some(parse_size(&trailer[c.len_utf8()..])?),
        _ => None,
    };

    Ok(MailFrom { address, size })
}

fn parse_size(params: &str) -> Result<usize, ParseError> {
    find_all(params, "size=")
        .find_map(|idx| {
            let digits = &params[idx + "size=".len()..];
            let len = digits
                .bytes()
                .take_while(u8::is_ascii_digit)
                .count();

            (len > 0).then(|| &digits[..len])
        })
        .ok_or(ParseError::InvalidSize)?
        .parse()
        .map_err(|_| ParseError::InvalidSize)
}

/// Parse `TO:<address>`; the address must not be empty.
pub fn parse_rcpt_to(args: &str) -> Result<String, ParseError> {
    let start = find_all(args, "to:<").next().ok_or(ParseError::InvalidTo)? + "to:<".len();
    let rest = &args[start..];

    match rest.rfind('>') {
        Some(end) if end > 0 => Ok(rest[..end].to_string()),
        _ => Err(ParseError::InvalidTo),
    }
}

#[cfg(test)]
mod test {
    use super::{parse_mail_from, parse_rcpt_to, Command, MailFrom, ParseError, Verb};

    fn string_casing(string: &str) -> impl Iterator<Item = String> {
        let len = string.len();
        let num_cases = usize::pow(2, len as u32);

        let (upper, lower) = string.chars().fold(
            (Vec::with_capacity(len), Vec::with_capacity(len)),
            |(mut upper, mut lower), c| {
                upper.push(c.to_ascii_uppercase());
                lower.push(c.to_ascii_lowercase());
                (upper, lower)
            },
        );

        (0..num_cases).map(move |i| {
            (0..len).fold(String::with_capacity(len), |mut s, idx| {
                if (i & (1 << idx)) == 0 {
                    s.push(lower[idx]);
                } else {
                    s.push(upper[idx]);
                }
                s
            })
        })
    }

    #[test]
    fn verbs_are_case_insensitive() {
        for comm in string_casing("starttls") {
            assert_eq!(Command::from(comm.as_str()).verb, Verb::StartTls);
        }

        for comm in string_casing("ehlo") {
            let command = Command::from(format!("{comm} client.example.com").as_str());
            assert_eq!(command.verb, Verb::Ehlo);
            assert_eq!(command.args, "client.example.com");
        }
    }

    #[test]
    fn command_splitting() {
        let command = Command::from("MAIL   FROM:<a@example.com>  \r\n");
        assert_eq!(command.verb, Verb::Mail);
        assert_eq!(command.args, "FROM:<a@example.com>");

        assert_eq!(
            Command::from("XCLIENT foo").verb,
            Verb::Unknown("XCLIENT".to_string())
        );
        assert_eq!(Command::from("").verb, Verb::Unknown(String::new()));
        assert_eq!(Command::from("quit").to_string(), "QUIT");
    }

    #[test]
    fn mail_from() {
        assert_eq!(
            parse_mail_from("FROM:<sender@example.com>"),
            Ok(MailFrom {
                address: "sender@example.com".to_string(),
                size: None
            })
        );

        for from in string_casing("from") {
            assert!(parse_mail_from(&format!("{from}:<test@example.com>")).is_ok());
        }

        assert_eq!(
            parse_mail_from("FROM:<>").map(|m| m.address),
            Ok(String::new())
        );
        assert_eq!(
            parse_mail_from("FROM: <spaced@example.com>"),
            Err(ParseError::InvalidFrom)
        );
        assert_eq!(parse_mail_from(""), Err(ParseError::InvalidFrom));
        assert_eq!(
            parse_mail_from("FROM:<unterminated"),
            Err(ParseError::InvalidFrom)
        );
    }

    #[test]
    fn mail_from_size() {
        assert_eq!(
            parse_mail_from("FROM:<a@example.com> SIZE=1024"),
            Ok(MailFrom {
                address: "a@example.com".to_string(),
                size: Some(1024)
            })
        );
        assert_eq!(
            parse_mail_from("FROM:<a@example.com> BODY=8BITMIME size=77").map(|m| m.size),
            Ok(Some(77))
        );
        assert_eq!(
            parse_mail_from("FROM:<a@example.com> BODY=8BITMIME"),
            Err(ParseError::InvalidSize)
        );
        assert_eq!(
            parse_mail_from("FROM:<a@example.com> SIZE=abc"),
            Err(ParseError::InvalidSize)
        );
        assert_eq!(
            parse_mail_from("FROM:<a@example.com> SIZE=99999999999999999999999999"),
            Err(ParseError::InvalidSize)
        );
    }

    #[test]
    fn rcpt_to() {
        assert_eq!(
            parse_rcpt_to("TO:<recipient@example.com>"),
            Ok("recipient@example.com".to_string())
        );

        for to in string_casing("to") {
            assert!(parse_rcpt_to(&format!("{to}:<test@example.com>")).is_ok());
        }

        assert_eq!(parse_rcpt_to(""), Err(ParseError::InvalidTo));
        assert_eq!(parse_rcpt_to("TO:"), Err(ParseError::InvalidTo));
        assert_eq!(parse_rcpt_to("TO:<>"), Err(ParseError::InvalidTo));
        assert_eq!(
            parse_rcpt_to("TO:<a@example.com> NOTIFY=NEVER"),
            Ok("a@example.com".to_string())
        );
    }
}
