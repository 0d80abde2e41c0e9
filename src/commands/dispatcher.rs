//! Routes new messages to the first matching handler.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use super::Invocation;
use crate::plugins::{Handler, MessageContext};
use crate::telegram::{IncomingMessage, TelegramBot, escape_html};

/// Holds every registered handler in load order.
#[derive(Debug, Default)]
pub struct Dispatcher {
    handlers: Vec<Handler>,
}

impl Dispatcher {
    #[must_use]
    pub fn new(handlers: Vec<Handler>) -> Self {
        Self { handlers }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Finds the first handler accepting `message`.
    #[must_use]
    pub fn find(&self, message: &IncomingMessage, me: i64) -> Option<(&Handler, Invocation)> {
        self.handlers
            .iter()
            .find_map(|handler| Some((handler, handler.filter().accepts(message, me)?)))
    }

    /// Runs the matching handler, if any, on its own task.
    ///
    /// Handler errors are logged; for the account's own messages they are
    /// also shown by editing the command message.
    pub fn dispatch(
        &self,
        bot: &Arc<TelegramBot>,
        message: IncomingMessage,
        me: i64,
    ) -> Option<JoinHandle<()>> {
        let (handler, invocation) = self.find(&message, me)?;
        let handler = handler.clone();

        debug!(
            "Dispatching '{}{}' from chat {} to {}",
            invocation.prefix,
            invocation.command,
            message.chat_id,
            handler.plugin()
        );

        let ctx = MessageContext {
            bot: Arc::clone(bot),
            message,
            invocation,
            me,
        };

        Some(tokio::spawn(async move {
            let command = ctx.invocation.command.clone();
            let report = ctx.is_from_me().then(|| ctx.clone());

            if let Err(e) = handler.call(ctx).await {
                error!(
                    "Handler '{}' of plugin {} failed: {}",
                    command,
                    handler.plugin(),
                    e
                );

                if let Some(ctx) = report {
                    let text = format!(
                        "<b>error in {}</b>\n<code>{}</code>",
                        escape_html(&command),
                        escape_html(&e.to_string())
                    );
                    if let Err(e) = ctx.edit(&text).await {
                        warn!("Could not report handler error: {}", e);
                    }
                }
            }
        }))
    }
}
