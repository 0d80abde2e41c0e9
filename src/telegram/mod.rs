//! Telegram client wrapper module.
//!
//! Provides the authenticated client, a library-independent view of
//! incoming messages, file id decoding for sticker sends, and the per-chat
//! rate limiter for edits.

mod client;
mod file_id;
mod message;
mod rate_limiter;

pub use client::{RawUpdatesReceiver, TelegramBot, TelegramError};
pub use file_id::{FileId, FileIdError};
pub use grammers_client::client::{LoginToken, PasswordToken};
pub use grammers_client::update::Update;
pub use message::{EntityKind, IncomingMessage, TextEntity, escape_html, utf16_slice};
pub use rate_limiter::RateLimiter;
