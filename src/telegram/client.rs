//! Telegram client wrapper used by the dispatcher and the plugins.
//!
//! Every call into the client library lives here. Plugins address chats
//! and users by their Bot-API style ids (`i64`); the wrapper turns them back
//! into library peer references, caching every peer it sees in updates.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use grammers_client::client::{LoginToken, PasswordToken, UpdateStream, UpdatesConfiguration};
use grammers_client::media::Media;
use grammers_client::update::Message;
use grammers_client::message::InputMessage;
use grammers_client::{Client, InvocationError, SenderPool, SignInError, sender};
use grammers_session::Session;
use grammers_session::storages::SqliteSession;
use grammers_session::types::{PeerId, PeerRef};
use grammers_session::updates::UpdatesLike;
use grammers_tl_types as tl;
use thiserror::Error;
use tokio::sync::{Mutex, OnceCell, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::file_id::{FileId, FileIdError};
use super::message::{IncomingMessage, TextEntity};
use super::RateLimiter;
use crate::config::TelegramConfig;

/// Minimum spacing between two edits in the same chat, in milliseconds.
const EDIT_INTERVAL_MS: u64 = 1000;

/// Receiver of raw updates produced by the sender pool.
pub type RawUpdatesReceiver = mpsc::UnboundedReceiver<UpdatesLike>;

/// Errors that can occur during Telegram operations.
#[derive(Debug, Error)]
pub enum TelegramError {
    #[error("Sign in failed: {0}")]
    SignInFailed(String),

    #[error("Password required for 2FA")]
    PasswordRequired(PasswordToken),

    #[error("Invalid password")]
    InvalidPassword(PasswordToken),

    #[error("Flood wait required: {0} seconds")]
    FloodWait(u32),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Session error: {0}")]
    Session(String),

    #[error("API invocation error: {0}")]
    Invocation(String),

    #[error("Unknown chat or user: {0}")]
    UnknownPeer(i64),

    #[error("Message {message_id} not found in chat {chat_id}")]
    MessageNotFound { chat_id: i64, message_id: i32 },

    #[error("Message has no downloadable media")]
    NoMedia,

    #[error("The update stream was already taken")]
    UpdatesTaken,

    #[error("Invalid file id: {0}")]
    FileId(#[from] FileIdError),

    #[error("File transfer failed: {0}")]
    Io(#[from] std::io::Error),
}

impl From<InvocationError> for TelegramError {
    fn from(err: InvocationError) -> Self {
        let err_str = err.to_string();

        if (err_str.contains("FLOOD_WAIT") || err_str.contains("flood"))
            && let Some(seconds) = extract_flood_wait_seconds(&err_str)
        {
            return Self::FloodWait(seconds);
        }

        Self::Invocation(err_str)
    }
}

/// Extracts flood wait seconds from an error message.
fn extract_flood_wait_seconds(err_msg: &str) -> Option<u32> {
    let patterns = ["FLOOD_WAIT_", "flood wait "];
    let lower = err_msg.to_lowercase();

    for pattern in patterns {
        if let Some(idx) = lower.find(&pattern.to_lowercase()) {
            let start = idx + pattern.len();
            let num_str: String = err_msg[start..]
                .chars()
                .take_while(char::is_ascii_digit)
                .collect();
            if let Ok(seconds) = num_str.parse() {
                return Some(seconds);
            }
        }
    }
    None
}

/// High-level Telegram client wrapper.
pub struct TelegramBot {
    /// The underlying grammers client.
    client: Client,

    /// Session storage, also used to look up peers not seen in updates.
    session: Arc<SqliteSession>,

    /// Handle to the sender pool for disconnection.
    handle: sender::SenderPoolHandle,

    /// Raw updates, handed out once to the update loop.
    updates: Mutex<Option<RawUpdatesReceiver>>,

    /// Peers seen in updates, by Bot-API id.
    peers: StdMutex<HashMap<i64, PeerRef>>,

    /// Id of the logged-in account.
    me: OnceCell<i64>,

    /// Spacing for message edits.
    edit_limiter: RateLimiter,

    /// Background task running the sender pool.
    _pool_task: JoinHandle<()>,
}

impl TelegramBot {
    /// Connects to Telegram with the given configuration.
    pub async fn connect(config: &TelegramConfig) -> Result<Self, TelegramError> {
        info!("Connecting to Telegram...");

        let session = Arc::new(
            SqliteSession::open(&config.session_path)
                .await
                .map_err(|e| TelegramError::Session(e.to_string()))?,
        );

        let SenderPool {
            runner,
            updates,
            handle,
        } = SenderPool::new(Arc::clone(&session), config.api_id);

        let client = Client::new(handle.clone());

        let pool_task = tokio::spawn(async move {
            runner.run().await;
        });

        let is_authorized = client
            .is_authorized()
            .await
            .map_err(|e| TelegramError::Connection(e.to_string()))?;

        info!("Connected to Telegram. Authorized: {}", is_authorized);

        Ok(Self {
            client,
            session,
            handle: handle.thin,
            updates: Mutex::new(Some(updates)),
            peers: StdMutex::new(HashMap::new()),
            me: OnceCell::new(),
            edit_limiter: RateLimiter::from_millis(EDIT_INTERVAL_MS),
            _pool_task: pool_task,
        })
    }

    /// Checks if the client is authorized.
    pub async fn is_authorized(&self) -> Result<bool, TelegramError> {
        self.client
            .is_authorized()
            .await
            .map_err(|e| TelegramError::Connection(e.to_string()))
    }

    /// Requests a login code to be sent to the phone number.
    pub async fn request_login_code(
        &self,
        phone: &str,
        api_hash: &str,
    ) -> Result<LoginToken, TelegramError> {
        info!("Requesting login code for phone: {}...", mask_phone(phone));

        self.client
            .request_login_code(phone, api_hash)
            .await
            .map_err(|e| TelegramError::SignInFailed(e.to_string()))
    }

    /// Signs in with the login code.
    pub async fn sign_in(&self, token: &LoginToken, code: &str) -> Result<(), TelegramError> {
        info!("Signing in with login code...");

        match self.client.sign_in(token, code).await {
            Ok(_user) => Ok(()),
            Err(SignInError::PasswordRequired(password_token)) => {
                debug!("2FA password required, hint: {:?}", password_token.hint());
                Err(TelegramError::PasswordRequired(password_token))
            }
            Err(SignInError::InvalidCode) => {
                Err(TelegramError::SignInFailed("Invalid code".to_owned()))
            }
            Err(e) => Err(TelegramError::SignInFailed(e.to_string())),
        }
    }

    /// Checks the 2FA password.
    pub async fn check_password(
        &self,
        password_token: PasswordToken,
        password: &str,
    ) -> Result<(), TelegramError> {
        info!("Checking 2FA password...");

        match self.client.check_password(password_token, password).await {
            Ok(_user) => Ok(()),
            Err(SignInError::InvalidPassword(token)) => Err(TelegramError::InvalidPassword(token)),
            Err(e) => Err(TelegramError::SignInFailed(e.to_string())),
        }
    }

    /// Turns the raw updates into a stream of new messages and other updates.
    ///
    /// Can be called once; later calls fail with [`TelegramError::UpdatesTaken`].
    pub async fn updates(&self) -> Result<UpdateStream, TelegramError> {
        let raw = self
            .updates
            .lock()
            .await
            .take()
            .ok_or(TelegramError::UpdatesTaken)?;

        let configuration = UpdatesConfiguration {
            catch_up: false,
            ..Default::default()
        };

        Ok(self.client.stream_updates(raw, configuration).await)
    }

    /// Returns the id of the logged-in account.
    pub async fn me(&self) -> Result<i64, TelegramError> {
        self.me
            .get_or_try_init(|| async {
                let request = tl::functions::users::GetUsers {
                    id: vec![tl::enums::InputUser::UserSelf],
                };
                match self.client.invoke(&request).await?.first() {
                    Some(tl::enums::User::User(user)) => {
                        debug!("Logged in as {}", user.id);
                        Ok(user.id)
                    }
                    _ => Err(TelegramError::Invocation(
                        "could not fetch the logged-in user".to_owned(),
                    )),
                }
            })
            .await
            .copied()
    }

    /// Builds the plugin-facing snapshot of a library message.
    pub fn snapshot(&self, message: &Message) -> IncomingMessage {
        self.remember_peers(message);

        let media = message.media();
        IncomingMessage {
            chat_id: message.peer_id().bot_api_dialog_id(),
            id: message.id(),
            sender_id: message.sender_id().map(|id| id.bot_api_dialog_id()),
            sender_name: message
                .sender()
                .and_then(|sender| sender.name().map(str::to_owned))
                .unwrap_or_default(),
            outgoing: message.outgoing(),
            text: message.text().to_owned(),
            reply_to: message.reply_to_message_id(),
            entities: message
                .fmt_entities()
                .map(|entities| entities.iter().filter_map(TextEntity::from_tl).collect())
                .unwrap_or_default(),
            has_photo: matches!(media, Some(Media::Photo(_))),
            has_document: matches!(media, Some(Media::Document(_) | Media::Sticker(_))),
            raw: Some(message.clone()),
        }
    }

    /// Sends an HTML-formatted text message.
    pub async fn send_html(
        &self,
        chat_id: i64,
        html: &str,
        reply_to: Option<i32>,
    ) -> Result<IncomingMessage, TelegramError> {
        let peer = self.peer(chat_id).await?;
        let sent = self
            .client
            .send_message(peer, InputMessage::new().html(html).reply_to(reply_to))
            .await?;
        Ok(self.snapshot(&sent))
    }

    /// Replaces the text of a message with HTML-formatted text.
    ///
    /// Edits in the same chat are spaced out; a flood wait pushes the next
    /// slot back before the error is returned.
    pub async fn edit_html(
        &self,
        chat_id: i64,
        message_id: i32,
        html: &str,
    ) -> Result<(), TelegramError> {
        let peer = self.peer(chat_id).await?;
        self.edit_limiter.wait_and_acquire(chat_id).await;

        match self
            .client
            .edit_message(peer, message_id, InputMessage::new().html(html))
            .await
        {
            Ok(()) => Ok(()),
            Err(e) => {
                let err: TelegramError = e.into();
                if let TelegramError::FloodWait(seconds) = &err {
                    self.edit_limiter.handle_flood_wait(chat_id, *seconds).await;
                } else if err.to_string().contains("MESSAGE_NOT_MODIFIED") {
                    return Ok(());
                }
                Err(err)
            }
        }
    }

    /// Deletes messages, returning how many were removed.
    pub async fn delete_messages(
        &self,
        chat_id: i64,
        message_ids: &[i32],
    ) -> Result<usize, TelegramError> {
        if message_ids.is_empty() {
            return Ok(0);
        }
        let peer = self.peer(chat_id).await?;
        Ok(self.client.delete_messages(peer, message_ids).await?)
    }

    /// Fetches a single message by id.
    pub async fn get_message(
        &self,
        chat_id: i64,
        message_id: i32,
    ) -> Result<IncomingMessage, TelegramError> {
        let peer = self.peer(chat_id).await?;
        let message = self
            .client
            .get_messages_by_id(peer, &[message_id])
            .await?
            .into_iter()
            .next()
            .flatten()
            .ok_or(TelegramError::MessageNotFound {
                chat_id,
                message_id,
            })?;
        Ok(self.snapshot(&message))
    }

    /// Fetches the message `message` replies to, if any.
    pub async fn get_reply(
        &self,
        message: &IncomingMessage,
    ) -> Result<Option<IncomingMessage>, TelegramError> {
        let Some(reply_to) = message.reply_to else {
            return Ok(None);
        };

        match self.get_message(message.chat_id, reply_to).await {
            Ok(reply) => Ok(Some(reply)),
            Err(TelegramError::MessageNotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Uploads a local file and sends it as a document.
    pub async fn send_document(
        &self,
        chat_id: i64,
        path: &Path,
        caption_html: &str,
        reply_to: Option<i32>,
    ) -> Result<IncomingMessage, TelegramError> {
        let peer = self.peer(chat_id).await?;
        debug!("Uploading {}", path.display());
        let uploaded = self.client.upload_file(path).await?;

        let sent = self
            .client
            .send_message(
                peer,
                InputMessage::new()
                    .html(caption_html)
                    .document(uploaded)
                    .reply_to(reply_to),
            )
            .await?;
        Ok(self.snapshot(&sent))
    }

    /// Downloads the media of `message` to `path`.
    pub async fn download_media(
        &self,
        message: &IncomingMessage,
        path: &Path,
    ) -> Result<(), TelegramError> {
        let media = message
            .raw
            .as_ref()
            .and_then(Message::media)
            .ok_or(TelegramError::NoMedia)?;

        debug!("Downloading media of message {} to {}", message.id, path.display());
        self.client.download_media(&media, path).await?;
        Ok(())
    }

    /// Re-sends a message into another chat without the forward header.
    pub async fn copy_message(
        &self,
        from_chat_id: i64,
        message_id: i32,
        to_chat_id: i64,
    ) -> Result<IncomingMessage, TelegramError> {
        let source = self.get_message(from_chat_id, message_id).await?;
        let raw = source.raw.ok_or(TelegramError::MessageNotFound {
            chat_id: from_chat_id,
            message_id,
        })?;

        let mut input = InputMessage::new()
            .text(raw.text())
            .fmt_entities(raw.fmt_entities().cloned().unwrap_or_default());
        if let Some(media) = raw.media() {
            input = input.copy_media(&media);
        }

        let peer = self.peer(to_chat_id).await?;
        let sent = self.client.send_message(peer, input).await?;
        Ok(self.snapshot(&sent))
    }

    /// Sends a sticker by its Bot-API file id, returning the new message id.
    pub async fn send_sticker(&self, chat_id: i64, file_id: &str) -> Result<i32, TelegramError> {
        let file = FileId::decode_sticker(file_id)?;
        let peer = self.peer(chat_id).await?;
        let random_id: i64 = rand::random();

        let request = tl::functions::messages::SendMedia {
            silent: false,
            background: false,
            clear_draft: false,
            noforwards: false,
            update_stickersets_order: false,
            invert_media: false,
            allow_paid_floodskip: false,
            peer: peer.into(),
            reply_to: None,
            media: tl::types::InputMediaDocument {
                spoiler: false,
                id: file.to_input_document(),
                video_cover: None,
                video_timestamp: None,
                ttl_seconds: None,
                query: None,
            }
            .into(),
            message: String::new(),
            random_id,
            reply_markup: None,
            entities: None,
            schedule_date: None,
            schedule_repeat_period: None,
            send_as: None,
            quick_reply_shortcut: None,
            effect: None,
            allow_paid_stars: None,
            suggested_post: None,
        };

        let updates = self.client.invoke(&request).await?;
        sent_message_id(&updates, random_id).ok_or_else(|| {
            TelegramError::Invocation("sticker sent but no message id returned".to_owned())
        })
    }

    /// Checks whether the account is an admin of `chat_id`.
    ///
    /// Private chats have no admins and count as admin.
    pub async fn is_admin(&self, chat_id: i64) -> Result<bool, TelegramError> {
        let peer = self.peer(chat_id).await?;
        let me = self.me().await?;

        match peer.id {
            PeerId::User(_) => Ok(true),
            PeerId::Channel(_) => {
                let request = tl::functions::channels::GetParticipant {
                    channel: peer.into(),
                    participant: tl::enums::InputPeer::PeerSelf,
                };
                let tl::enums::channels::ChannelParticipant::Participant(result) =
                    self.client.invoke(&request).await?;
                Ok(matches!(
                    result.participant,
                    tl::enums::ChannelParticipant::Admin(_)
                        | tl::enums::ChannelParticipant::Creator(_)
                ))
            }
            PeerId::Chat(id) => {
                let request = tl::functions::messages::GetFullChat { chat_id: id };
                let tl::enums::messages::ChatFull::Full(full) =
                    self.client.invoke(&request).await?;
                let tl::enums::ChatFull::Full(chat) = full.full_chat else {
                    return Ok(false);
                };
                let tl::enums::ChatParticipants::Participants(list) = chat.participants else {
                    return Ok(false);
                };
                Ok(list.participants.iter().any(|p| match p {
                    tl::enums::ChatParticipant::Admin(a) => a.user_id == me,
                    tl::enums::ChatParticipant::Creator(c) => c.user_id == me,
                    tl::enums::ChatParticipant::Participant(_) => false,
                }))
            }
        }
    }

    /// Bans a user from a group or channel.
    pub async fn ban_member(&self, chat_id: i64, user_id: i64) -> Result<(), TelegramError> {
        let chat = self.peer(chat_id).await?;
        let user = self.peer(user_id).await?;
        info!("Banning {} in {}", user_id, chat_id);
        self.client
            .set_banned_rights(chat, user)
            .view_messages(false)
            .await?;
        Ok(())
    }

    /// Lifts every restriction of a user in a group or channel.
    pub async fn unban_member(&self, chat_id: i64, user_id: i64) -> Result<(), TelegramError> {
        let chat = self.peer(chat_id).await?;
        let user = self.peer(user_id).await?;
        info!("Unbanning {} in {}", user_id, chat_id);
        self.client.set_banned_rights(chat, user).await?;
        Ok(())
    }

    /// Disconnects from Telegram.
    pub fn disconnect(&self) {
        info!("Disconnecting from Telegram...");
        self.handle.quit();
    }

    fn remember_peers(&self, message: &Message) {
        let mut peers = self.peers.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(peer) = message.peer_ref() {
            peers.insert(peer.id.bot_api_dialog_id(), peer);
        }
        if let Some(sender) = message.sender_ref() {
            peers.insert(sender.id.bot_api_dialog_id(), sender);
        }
    }

    /// Resolves a Bot-API id into a peer reference.
    async fn peer(&self, id: i64) -> Result<PeerRef, TelegramError> {
        let cached = self
            .peers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .copied();
        if let Some(peer) = cached {
            return Ok(peer);
        }

        let peer_id = PeerId::from_bot_api_dialog_id(id).ok_or(TelegramError::UnknownPeer(id))?;
        let peer = self
            .session
            .peer_ref(peer_id)
            .await
            .ok_or(TelegramError::UnknownPeer(id))?;

        self.peers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, peer);
        Ok(peer)
    }
}

impl std::fmt::Debug for TelegramBot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramBot")
            .field("me", &self.me.get())
            .field("edit_limiter", &self.edit_limiter)
            .finish_non_exhaustive()
    }
}

/// Finds the id of the message created by a send request.
fn sent_message_id(updates: &tl::enums::Updates, random_id: i64) -> Option<i32> {
    let list = match updates {
        tl::enums::Updates::Updates(u) => &u.updates,
        tl::enums::Updates::Combined(u) => &u.updates,
        tl::enums::Updates::UpdateShortSentMessage(u) => return Some(u.id),
        _ => return None,
    };

    list.iter()
        .find_map(|update| match update {
            tl::enums::Update::MessageId(u) if u.random_id == random_id => Some(u.id),
            _ => None,
        })
        .or_else(|| {
            list.iter().find_map(|update| match update {
                tl::enums::Update::NewChannelMessage(u) => message_id(&u.message),
                tl::enums::Update::NewMessage(u) => message_id(&u.message),
                _ => None,
            })
        })
}

fn message_id(message: &tl::enums::Message) -> Option<i32> {
    match message {
        tl::enums::Message::Message(m) => Some(m.id),
        tl::enums::Message::Service(m) => Some(m.id),
        tl::enums::Message::Empty(_) => None,
    }
}

/// Masks a phone number for logging (shows last 4 digits).
fn mask_phone(phone: &str) -> String {
    let digits: String = phone.chars().filter(char::is_ascii_digit).collect();
    if digits.len() > 4 {
        format!("***{}", &digits[digits.len() - 4..])
    } else {
        "****".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_phone() {
        assert_eq!(mask_phone("+1234567890"), "***7890");
        assert_eq!(mask_phone("123"), "****");
        assert_eq!(mask_phone("+7 (999) 123-45-67"), "***4567");
    }

    #[test]
    fn test_extract_flood_wait() {
        assert_eq!(extract_flood_wait_seconds("FLOOD_WAIT_120"), Some(120));
        assert_eq!(extract_flood_wait_seconds("flood wait 60 seconds"), Some(60));
        assert_eq!(extract_flood_wait_seconds("some other error"), None);
    }

    #[test]
    fn test_sent_message_id_prefers_random_id() {
        let updates: tl::enums::Updates = tl::types::Updates {
            updates: vec![
                tl::types::UpdateMessageId {
                    id: 10,
                    random_id: 1,
                }
                .into(),
                tl::types::UpdateMessageId {
                    id: 11,
                    random_id: 2,
                }
                .into(),
            ],
            users: vec![],
            chats: vec![],
            date: 0,
            seq: 0,
        }
        .into();

        assert_eq!(sent_message_id(&updates, 2), Some(11));
        assert_eq!(sent_message_id(&updates, 3), None);
    }

    #[test]
    fn test_sent_message_id_short() {
        let updates: tl::enums::Updates = tl::types::UpdateShortSentMessage {
            out: true,
            id: 77,
            pts: 0,
            pts_count: 0,
            date: 0,
            media: None,
            entities: None,
            ttl_period: None,
        }
        .into();

        assert_eq!(sent_message_id(&updates, 0), Some(77));
    }
}
