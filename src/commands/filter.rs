//! Prefix + command matching.

use crate::telegram::IncomingMessage;

/// A matched command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Prefix the message used.
    pub prefix: String,
    /// Command as configured (lowercase).
    pub command: String,
    /// Everything after the command, trimmed.
    pub args: String,
    /// `args` split on whitespace.
    pub argv: Vec<String>,
}

/// Decides which messages a handler reacts to.
#[derive(Debug, Clone)]
pub struct CommandFilter {
    commands: Vec<String>,
    prefixes: Vec<String>,
    me_only: bool,
}

impl CommandFilter {
    /// Creates a filter for `commands` behind any of `prefixes`.
    ///
    /// Empty prefixes are ignored; longer prefixes are tried first so that
    /// `!!` wins over `!`.
    #[must_use]
    pub fn new<C, P>(commands: C, prefixes: P) -> Self
    where
        C: IntoIterator,
        C::Item: Into<String>,
        P: IntoIterator,
        P::Item: Into<String>,
    {
        let commands = commands
            .into_iter()
            .map(|c| c.into().to_lowercase())
            .filter(|c| !c.is_empty())
            .collect();

        let mut prefixes: Vec<String> = prefixes
            .into_iter()
            .map(Into::into)
            .filter(|p| !p.is_empty())
            .collect();
        prefixes.sort_by_key(|p| std::cmp::Reverse(p.len()));

        Self {
            commands,
            prefixes,
            me_only: false,
        }
    }

    /// Restricts the filter to messages sent by the logged-in account.
    #[must_use]
    pub const fn me_only(mut self) -> Self {
        self.me_only = true;
        self
    }

    /// Configured command names.
    #[must_use]
    pub fn commands(&self) -> &[String] {
        &self.commands
    }

    /// Whether only the account's own messages match.
    #[must_use]
    pub const fn is_me_only(&self) -> bool {
        self.me_only
    }

    /// Matches a message, honouring `me_only`.
    #[must_use]
    pub fn accepts(&self, message: &IncomingMessage, me: i64) -> Option<Invocation> {
        if self.me_only && !message.outgoing && message.sender_id != Some(me) {
            return None;
        }
        self.matches(&message.text)
    }

    /// Matches raw text against the prefixes and commands.
    #[must_use]
    pub fn matches(&self, text: &str) -> Option<Invocation> {
        self.prefixes.iter().find_map(|prefix| {
            let rest = text.strip_prefix(prefix.as_str())?;
            self.commands.iter().find_map(|command| {
                let head = rest.get(..command.len())?;
                if !head.eq_ignore_ascii_case(command) {
                    return None;
                }
                let args = strip_terminator(&rest[command.len()..])?;
                Some(Invocation {
                    prefix: prefix.clone(),
                    command: command.clone(),
                    args: args.trim().to_owned(),
                    argv: args.split_whitespace().map(str::to_owned).collect(),
                })
            })
        })
    }
}

/// Accepts end of text, whitespace, or an `@username` mention after the
/// command, returning what follows.
fn strip_terminator(after: &str) -> Option<&str> {
    if after.is_empty() || after.starts_with(char::is_whitespace) {
        return Some(after);
    }

    let mention = after.strip_prefix('@')?;
    let end = mention
        .find(char::is_whitespace)
        .unwrap_or(mention.len());
    if end == 0 {
        return None;
    }
    Some(&mention[end..])
}
