//! Plugin contract and the built-in plugins.
//!
//! A plugin declares commands through [`Handler`]s. Handlers receive a
//! [`MessageContext`] wrapping the matched message and the running client.
//! Plugins are constructed once at startup from a [`PluginContext`]; see
//! [`loader`] for how the set of plugins is decided.

pub mod loader;

mod gemini;
mod help;
mod maintenance;
mod moderation;
mod ping;
mod release;
mod solat;
mod ziptools;

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use futures::future::BoxFuture;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::commands::{CommandFilter, Invocation};
use crate::config::{BotSettings, StoreError};
use crate::telegram::{IncomingMessage, TelegramBot, TelegramError};

pub use loader::{CatalogEntry, LoadedPlugins, load_plugins};

/// Longest text Telegram accepts in one message.
pub const MAX_MESSAGE_CHARS: usize = 4096;

/// Errors raised by plugin construction, hooks and handlers.
#[derive(Debug, Error)]
pub enum PluginError {
    #[error("telegram error: {0}")]
    Telegram(#[from] TelegramError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("{0}")]
    Failed(String),
}

/// Requests sent from plugins to the main loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// Shut down gracefully and start the executable again.
    Restart,
}

/// Everything a plugin is constructed with.
#[derive(Clone)]
pub struct PluginContext {
    pub bot: Arc<TelegramBot>,
    pub settings: Arc<BotSettings>,
    /// Prefixes from the shared configuration.
    pub prefixes: Arc<Vec<String>>,
    /// Filled by the loader once every plugin is loaded.
    pub catalog: Arc<OnceLock<Vec<CatalogEntry>>>,
    pub lifecycle: mpsc::UnboundedSender<Lifecycle>,
}

impl PluginContext {
    /// Persist directory shared by all plugin stores.
    #[must_use]
    pub fn persist_dir(&self) -> &Path {
        &self.settings.persist_dir
    }

    /// Builds a filter for `commands` behind the shared prefixes.
    #[must_use]
    pub fn command<C>(&self, commands: C) -> CommandFilter
    where
        C: IntoIterator,
        C::Item: Into<String>,
    {
        CommandFilter::new(commands, self.prefixes.iter().cloned())
    }
}

impl std::fmt::Debug for PluginContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginContext")
            .field("prefixes", &self.prefixes)
            .field("persist_dir", &self.settings.persist_dir)
            .finish_non_exhaustive()
    }
}

/// A self-contained unit of chat commands.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Display name.
    fn name(&self) -> &'static str;

    /// One-line description logged at load time.
    fn description(&self) -> &'static str;

    /// Declares the commands of the plugin.
    fn register_handlers(self: Arc<Self>) -> Vec<Handler>;

    /// Runs once after every plugin is loaded and the client is ready.
    async fn on_start(&self) -> Result<(), PluginError> {
        Ok(())
    }

    /// Runs once before the client disconnects.
    async fn on_shutdown(&self) -> Result<(), PluginError> {
        Ok(())
    }
}

pub type HandlerFuture = BoxFuture<'static, Result<(), PluginError>>;
type Callback = Arc<dyn Fn(MessageContext) -> HandlerFuture + Send + Sync>;

/// A command filter bound to an async callback.
#[derive(Clone)]
pub struct Handler {
    plugin: &'static str,
    filter: CommandFilter,
    callback: Callback,
}

impl Handler {
    pub fn new<F, Fut>(filter: CommandFilter, callback: F) -> Self
    where
        F: Fn(MessageContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), PluginError>> + Send + 'static,
    {
        Self {
            plugin: "",
            filter,
            callback: Arc::new(move |ctx| Box::pin(callback(ctx))),
        }
    }

    /// Tags the handler with the plugin that registered it.
    #[must_use]
    pub const fn owned_by(mut self, plugin: &'static str) -> Self {
        self.plugin = plugin;
        self
    }

    #[must_use]
    pub const fn plugin(&self) -> &'static str {
        self.plugin
    }

    #[must_use]
    pub const fn filter(&self) -> &CommandFilter {
        &self.filter
    }

    /// Runs the callback.
    pub fn call(&self, ctx: MessageContext) -> HandlerFuture {
        (self.callback)(ctx)
    }
}

impl std::fmt::Debug for Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handler")
            .field("plugin", &self.plugin)
            .field("filter", &self.filter)
            .finish_non_exhaustive()
    }
}

/// Binds a plugin method taking `self: Arc<Self>` into a handler callback.
pub fn bind<P, F, Fut>(
    plugin: &Arc<P>,
    method: F,
) -> impl Fn(MessageContext) -> Fut + Send + Sync + 'static
where
    P: Send + Sync + 'static,
    F: Fn(Arc<P>, MessageContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), PluginError>> + Send + 'static,
{
    let plugin = Arc::clone(plugin);
    move |ctx| method(Arc::clone(&plugin), ctx)
}

/// A matched message handed to a handler.
#[derive(Debug, Clone)]
pub struct MessageContext {
    pub bot: Arc<TelegramBot>,
    pub message: IncomingMessage,
    pub invocation: Invocation,
    /// Id of the logged-in account.
    pub me: i64,
}

impl MessageContext {
    #[must_use]
    pub fn chat_id(&self) -> i64 {
        self.message.chat_id
    }

    /// Raw argument string.
    #[must_use]
    pub fn args(&self) -> &str {
        &self.invocation.args
    }

    #[must_use]
    pub fn argv(&self) -> &[String] {
        &self.invocation.argv
    }

    /// Whether the command was sent by the logged-in account.
    #[must_use]
    pub fn is_from_me(&self) -> bool {
        self.message.outgoing || self.message.sender_id == Some(self.me)
    }

    /// Fetches the message the command replies to.
    pub async fn reply_message(&self) -> Result<Option<IncomingMessage>, PluginError> {
        Ok(self.bot.get_reply(&self.message).await?)
    }

    /// Edits the command message.
    pub async fn edit(&self, html: &str) -> Result<(), PluginError> {
        self.bot
            .edit_html(self.message.chat_id, self.message.id, html)
            .await?;
        Ok(())
    }

    /// Replies to the command message.
    pub async fn reply(&self, html: &str) -> Result<IncomingMessage, PluginError> {
        Ok(self
            .bot
            .send_html(self.message.chat_id, html, Some(self.message.id))
            .await?)
    }

    /// Edits own commands and replies to everybody else's.
    ///
    /// Returns the id of the message holding the response.
    pub async fn respond(&self, html: &str) -> Result<i32, PluginError> {
        if self.is_from_me() {
            self.edit(html).await?;
            Ok(self.message.id)
        } else {
            Ok(self.reply(html).await?.id)
        }
    }

    /// Uploads a file as a reply to the command message.
    pub async fn reply_document(
        &self,
        path: &Path,
        caption_html: &str,
    ) -> Result<IncomingMessage, PluginError> {
        Ok(self
            .bot
            .send_document(
                self.message.chat_id,
                path,
                caption_html,
                Some(self.message.id),
            )
            .await?)
    }

    /// Responds with `text`, falling back to a document named `file_name`
    /// when it does not fit in a message.
    ///
    /// `text` is sent as-is in the document and escaped otherwise.
    pub async fn respond_long(&self, text: &str, file_name: &str) -> Result<(), PluginError> {
        if text.chars().count() <= MAX_MESSAGE_CHARS {
            self.respond(&crate::telegram::escape_html(text)).await?;
            return Ok(());
        }

        let dir = tempfile::tempdir()?;
        let path = write_temp(dir.path(), file_name, text).await?;
        self.reply_document(&path, "").await?;
        Ok(())
    }
}

async fn write_temp(dir: &Path, file_name: &str, text: &str) -> Result<PathBuf, PluginError> {
    let path = dir.join(file_name);
    tokio::fs::write(&path, text).await?;
    Ok(path)
}
