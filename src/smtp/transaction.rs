use crate::smtp::status::Reply;

/// RFC 5321 section 4.5.3.1.10 requires room for at least 100 recipients.
pub const MAX_RECIPIENTS: usize = 100;

/// State of the mail transaction currently in progress on a session.
///
/// `sender` is `Some` only once a MAIL command has been accepted; the null
/// reverse path is `Some(String::new())`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Transaction {
    sender: Option<String>,
    recipients: Vec<String>,
}

impl Transaction {
    pub fn sender(&self) -> Option<&str> {
        self.sender.as_deref()
    }

    pub fn recipients(&self) -> &[String] {
        &self.recipients
    }

    pub fn has_sender(&self) -> bool {
        self.sender.is_some()
    }

    /// Ready for DATA: a sender and at least one recipient.
    pub fn is_ready(&self) -> bool {
        self.sender.is_some() && !self.recipients.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.recipients.len() >= MAX_RECIPIENTS
    }

    /// Start a new transaction for `sender`, dropping any recipients.
    pub(crate) fn begin(sender: String) -> Self {
        Self {
            sender: Some(sender),
            recipients: Vec::new(),
        }
    }

    /// The same sender, if any, with no recipients.
    pub(crate) fn without_recipients(mut self) -> Self {
        self.recipients.clear();
        self
    }

    pub(crate) fn add_recipient(&mut self, recipient: String) {
        self.recipients.push(recipient);
    }
}

/// What a command asks the session to do after its reply is written.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Effect {
    None,
    /// Replace the client-declared name.
    SetClient(Option<String>),
    /// Read a message body.
    BeginData,
    /// Perform the TLS handshake.
    StartTls,
    /// End the session.
    Close,
}

/// Per-session facts a command is judged against.
pub struct Policy<'a> {
    pub hostname: &'a str,
    pub appname: &'a str,
    /// Maximum message size in bytes, `0` for unlimited.
    pub max_size: usize,
    pub tls_available: bool,
    pub tls_required: bool,
    pub tls_active: bool,
    /// Called with `(sender, candidate)` for every syntactically valid RCPT.
    pub accept_recipient: &'a (dyn Fn(&str, &str) -> bool + Send + Sync),
}

impl Policy<'_> {
    /// TLS is configured and mandatory, but not yet in use.
    pub fn requires_starttls(&self) -> bool {
        self.tls_available && self.tls_required && !self.tls_active
    }

    pub fn offers_starttls(&self) -> bool {
        self.tls_available && !self.tls_active
    }
}

/// Input and output of a single transition.
pub struct Exchange<'a> {
    pub policy: Policy<'a>,
    pub reply: Option<Reply>,
    pub effect: Effect,
}

impl<'a> Exchange<'a> {
    pub fn new(policy: Policy<'a>) -> Self {
        Self {
            policy,
            reply: None,
            effect: Effect::None,
        }
    }
}
