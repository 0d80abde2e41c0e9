//! Snapshot of an incoming message, decoupled from the client library.

use grammers_client::update::Message;
use grammers_tl_types as tl;

/// Formatting entity kinds the plugins care about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Bold,
}

/// A formatting entity. Offsets and lengths count UTF-16 code units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextEntity {
    pub kind: EntityKind,
    pub offset: usize,
    pub length: usize,
}

impl TextEntity {
    /// Creates an entity.
    #[must_use]
    pub const fn new(kind: EntityKind, offset: usize, length: usize) -> Self {
        Self {
            kind,
            offset,
            length,
        }
    }

    /// Converts a raw Telegram entity, `None` for kinds nobody reads.
    #[must_use]
    pub fn from_tl(entity: &tl::enums::MessageEntity) -> Option<Self> {
        use tl::enums::MessageEntity as E;

        let (kind, offset, length) = match entity {
            E::Bold(e) => (EntityKind::Bold, e.offset, e.length),
            _ => return None,
        };

        Some(Self::new(
            kind,
            usize::try_from(offset).ok()?,
            usize::try_from(length).ok()?,
        ))
    }

    /// Returns the slice of `text` covered by this entity.
    #[must_use]
    pub fn slice(&self, text: &str) -> String {
        utf16_slice(text, self.offset, self.length)
    }
}

/// Slices `text` by UTF-16 code units, the unit Telegram uses for entities.
///
/// Out-of-range bounds are clamped. A cut through a surrogate pair drops
/// the broken half.
#[must_use]
pub fn utf16_slice(text: &str, offset: usize, length: usize) -> String {
    let units: Vec<u16> = text.encode_utf16().collect();
    let start = offset.min(units.len());
    let end = offset.saturating_add(length).min(units.len());

    char::decode_utf16(units[start..end].iter().copied())
        .filter_map(Result::ok)
        .collect()
}

/// Escapes text for Telegram's HTML parse mode.
#[must_use]
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(ch),
        }
    }
    out
}

/// A new message as seen by the dispatcher and the plugins.
#[derive(Clone)]
pub struct IncomingMessage {
    /// Bot-API style id of the chat the message lives in.
    pub chat_id: i64,

    /// Message id within the chat.
    pub id: i32,

    /// Id of the sender, if known.
    pub sender_id: Option<i64>,

    /// Display name of the sender (may be empty).
    pub sender_name: String,

    /// Whether the logged-in account sent this message.
    pub outgoing: bool,

    /// Text, or caption for media messages.
    pub text: String,

    /// Id of the message this one replies to.
    pub reply_to: Option<i32>,

    /// Formatting entities of `text`.
    pub entities: Vec<TextEntity>,

    /// Whether the message carries a photo.
    pub has_photo: bool,

    /// Whether the message carries a document.
    pub has_document: bool,

    /// The library message, for media access.
    pub(crate) raw: Option<Message>,
}

impl IncomingMessage {
    /// Creates a message without a library counterpart.
    #[must_use]
    pub fn detached(chat_id: i64, id: i32, text: impl Into<String>) -> Self {
        Self {
            chat_id,
            id,
            sender_id: None,
            sender_name: String::new(),
            outgoing: false,
            text: text.into(),
            reply_to: None,
            entities: Vec::new(),
            has_photo: false,
            has_document: false,
            raw: None,
        }
    }

    /// Whether the message is a captioned photo or document.
    ///
    /// Link previews are media too but do not count.
    #[must_use]
    pub fn has_caption(&self) -> bool {
        (self.has_photo || self.has_document) && !self.text.is_empty()
    }
}

impl std::fmt::Debug for IncomingMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IncomingMessage")
            .field("chat_id", &self.chat_id)
            .field("id", &self.id)
            .field("sender_id", &self.sender_id)
            .field("outgoing", &self.outgoing)
            .field("reply_to", &self.reply_to)
            .field("has_photo", &self.has_photo)
            .field("has_document", &self.has_document)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_utf16_slice_ascii() {
        assert_eq!(utf16_slice("Hello World", 6, 5), "World");
        assert_eq!(utf16_slice("Hello", 3, 100), "lo");
        assert_eq!(utf16_slice("Hello", 10, 2), "");
    }

    #[test]
    fn test_utf16_slice_counts_surrogates() {
        // the emoji takes two UTF-16 units
        let text = "🔥 Changelog";
        assert_eq!(utf16_slice(text, 3, 9), "Changelog");
        assert_eq!(utf16_slice(text, 0, 2), "🔥");
        // cutting the pair in half drops it
        assert_eq!(utf16_slice(text, 1, 2), " ");
    }

    #[test]
    fn test_entity_slice() {
        let entity = TextEntity::new(EntityKind::Bold, 2, 5);
        assert_eq!(entity.slice("• Notes\n"), "Notes");
    }

    #[test]
    fn test_escape_html() {
        assert_eq!(escape_html("a < b && c > \"d\""), "a &lt; b &amp;&amp; c &gt; &quot;d&quot;");
        assert_eq!(escape_html("plain"), "plain");
    }

    #[test]
    fn test_caption_needs_photo_or_document() {
        let mut message = IncomingMessage::detached(-100, 5, "#realme #ROM https://example.org");
        assert!(!message.has_caption());

        message.has_photo = true;
        assert!(message.has_caption());

        message.has_photo = false;
        message.has_document = true;
        assert!(message.has_caption());

        message.text.clear();
        assert!(!message.has_caption());
    }

    #[test]
    fn test_detached_message() {
        let message = IncomingMessage::detached(-100, 5, ".ping");
        assert_eq!(message.text, ".ping");
        assert!(!message.outgoing);
        assert!(!message.has_caption());
    }
}
