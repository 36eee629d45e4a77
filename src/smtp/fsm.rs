//! The SMTP command table.
//!
//! Every verb is handled in one `match` over the current [`Transaction`].
//! Transitions never touch the network: the reply and any follow-up work
//! (reading a body, upgrading to TLS, closing) are left in the [`Exchange`]
//! for the session to carry out.

use crate::smtp::{
    command::{parse_mail_from, parse_rcpt_to, Command, Verb},
    extensions::Extension,
    status::{Reply, Status},
    transaction::{Effect, Exchange, Transaction},
};

fn syntax_error(detail: impl core::fmt::Display) -> Reply {
    Reply::new(
        Status::SyntaxError,
        format!("5.5.4 Syntax error in parameters or arguments ({detail})"),
    )
}

fn ok(enhanced: &str) -> Reply {
    Reply::new(Status::Ok, format!("{enhanced} Ok"))
}

fn not_implemented() -> Reply {
    Reply::new(Status::NotImplemented, "5.5.1 Command not implemented")
}

/// The 552 reply for a message larger than `limit` bytes.
pub fn exceeded_storage(limit: usize) -> Reply {
    Reply::new(
        Status::ExceededStorage,
        format!("5.3.4 Requested mail action aborted: exceeded storage allocation ({limit})"),
    )
}

impl Transaction {
    /// Apply `command`, leaving the reply and effect in `exchange`.
    #[must_use]
    pub fn transition(self, command: Command, exchange: &mut Exchange<'_>) -> Self {
        dispatch(self, command, exchange)
    }
}

#[expect(clippy::too_many_lines)]
fn dispatch(transaction: Transaction, command: Command, exchange: &mut Exchange<'_>) -> Transaction {
    let policy = &exchange.policy;

    let guarded = matches!(
        command.verb,
        Verb::Mail | Verb::Rcpt | Verb::Data | Verb::Rset
    );
    if guarded && policy.requires_starttls() {
        exchange.reply = Some(Reply::new(
            Status::TlsRequired,
            "5.7.0 Must issue a STARTTLS command first",
        ));
        return transaction;
    }

    let (reply, effect, next) = match command.verb {
        Verb::Helo => (
            Reply::new(
                Status::Ok,
                format!("{} greets {}", policy.hostname, command.args),
            ),
            Effect::SetClient(Some(command.args)),
            Transaction::default(),
        ),
        Verb::Ehlo => {
            let mut lines = vec![format!("{} greets {}", policy.hostname, command.args)];
            lines.extend(
                Extension::advertised(policy.max_size, policy.offers_starttls())
                    .iter()
                    .map(ToString::to_string),
            );

            (
                Reply::multiline(Status::Ok, lines),
                Effect::SetClient(Some(command.args)),
                Transaction::default(),
            )
        }
        Verb::Mail => match parse_mail_from(&command.args) {
            Err(err) => (syntax_error(err), Effect::None, transaction.without_recipients()),
            Ok(from) => match from.size {
                Some(size) if policy.max_size > 0 && size > policy.max_size => (
                    exceeded_storage(policy.max_size),
                    Effect::None,
                    Transaction::default(),
                ),
                _ => (
                    ok("2.1.0"),
                    Effect::None,
                    Transaction::begin(from.address),
                ),
            },
        },
        Verb::Rcpt => {
            let Some(sender) = transaction.sender() else {
                exchange.reply = Some(Reply::new(
                    Status::InvalidCommandSequence,
                    "5.5.1 Bad sequence of commands (MAIL required before RCPT)",
                ));
                return transaction;
            };

            match parse_rcpt_to(&command.args) {
                Err(err) => (syntax_error(err), Effect::None, transaction),
                Ok(_) if transaction.is_full() => (
                    Reply::new(Status::InsufficientStorage, "4.5.3 Too many recipients"),
                    Effect::None,
                    transaction,
                ),
                Ok(recipient) if !(policy.accept_recipient)(sender, &recipient) => (
                    Reply::new(
                        Status::Error,
                        "5.1.0 Requested action not taken: mailbox unavailable",
                    ),
                    Effect::None,
                    transaction,
                ),
                Ok(recipient) => {
                    let mut transaction = transaction;
                    transaction.add_recipient(recipient);
                    (ok("2.1.5"), Effect::None, transaction)
                }
            }
        }
        Verb::Data if !transaction.is_ready() => (
            Reply::new(
                Status::InvalidCommandSequence,
                "5.5.1 Bad sequence of commands (MAIL & RCPT required before DATA)",
            ),
            Effect::None,
            transaction,
        ),
        Verb::Data => (
            Reply::new(
                Status::StartMailInput,
                "Start mail input; end with <CR><LF>.<CR><LF>",
            ),
            Effect::BeginData,
            transaction,
        ),
        Verb::Rset => (
            ok("2.0.0"),
            Effect::SetClient(None),
            Transaction::default(),
        ),
        Verb::Noop => (ok("2.0.0"), Effect::None, transaction),
        Verb::Quit => (
            Reply::new(
                Status::GoodBye,
                format!(
                    "2.0.0 {} {} ESMTP Service closing transmission channel",
                    policy.hostname, policy.appname
                ),
            ),
            Effect::Close,
            transaction,
        ),
        Verb::Help | Verb::Vrfy | Verb::Expn | Verb::Auth => {
            (not_implemented(), Effect::None, transaction)
        }
        Verb::StartTls if !command.args.is_empty() => (
            Reply::new(
                Status::SyntaxError,
                "5.5.2 Syntax error (no parameters allowed)",
            ),
            Effect::None,
            transaction,
        ),
        Verb::StartTls if !policy.tls_available => (not_implemented(), Effect::None, transaction),
        Verb::StartTls if policy.tls_active => (
            Reply::new(
                Status::InvalidCommandSequence,
                "5.5.1 Bad sequence of commands (TLS already in use)",
            ),
            Effect::None,
            transaction,
        ),
        Verb::StartTls => (
            Reply::new(Status::ServiceReady, "2.0.0 Ready to start TLS"),
            Effect::StartTls,
            transaction,
        ),
        Verb::Unknown(_) => (
            Reply::new(Status::Unrecognised, "5.5.2 Syntax error, command unrecognized"),
            Effect::None,
            transaction,
        ),
    };

    exchange.reply = Some(reply);
    exchange.effect = effect;
    next
}
