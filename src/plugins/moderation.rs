//! Group and channel moderation commands.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use super::{Handler, MessageContext, Plugin, PluginContext, PluginError, bind};
use crate::telegram::{IncomingMessage, escape_html};

/// Telegram deletes at most this many messages per request.
const DELETE_CHUNK: i32 = 100;

/// How long confirmations stay visible.
const AUTO_DELETE_AFTER: Duration = Duration::from_secs(5);

pub struct Moderation {
    ctx: PluginContext,
}

pub fn load(ctx: &PluginContext) -> Result<Arc<dyn Plugin>, PluginError> {
    Ok(Arc::new(Moderation { ctx: ctx.clone() }))
}

/// Splits `first..last` into delete requests.
fn purge_chunks(first: i32, last: i32) -> Vec<Vec<i32>> {
    (first..last)
        .step_by(DELETE_CHUNK as usize)
        .map(|start| (start..last.min(start.saturating_add(DELETE_CHUNK))).collect())
        .collect()
}

/// Returns the replied message when it has a sender.
async fn replied_user(ctx: &MessageContext) -> Result<Option<(IncomingMessage, i64)>, PluginError> {
    Ok(ctx
        .reply_message()
        .await?
        .and_then(|reply| reply.sender_id.map(|sender| (reply, sender))))
}

async fn confirm_and_delete(ctx: &MessageContext, text: &str) -> Result<(), PluginError> {
    ctx.edit(text).await?;
    tokio::time::sleep(AUTO_DELETE_AFTER).await;
    ctx.bot.delete_messages(ctx.chat_id(), &[ctx.message.id]).await?;
    Ok(())
}

impl Moderation {
    async fn purge(self: Arc<Self>, ctx: MessageContext) -> Result<(), PluginError> {
        let Some(first) = ctx.message.reply_to else {
            return ctx.edit("<i>reply to a message!</i>").await;
        };

        info!("purging messages {}..{} in {}", first, ctx.message.id, ctx.chat_id());
        for ids in purge_chunks(first, ctx.message.id) {
            let deleted = ctx.bot.delete_messages(ctx.chat_id(), &ids).await?;
            info!("deleted {} of {} messages", deleted, ids.len());
        }

        let mut text = "<i>purged! this message will auto delete in 5 seconds</i>".to_owned();
        if !ctx.bot.is_admin(ctx.chat_id()).await? {
            info!("not an admin, only own messages were purged");
            text.push_str("\n<i>warning: you are not an admin, only your messages are purged</i>");
        }

        confirm_and_delete(&ctx, &text).await
    }

    async fn kick(self: Arc<Self>, ctx: MessageContext) -> Result<(), PluginError> {
        if !ctx.bot.is_admin(ctx.chat_id()).await? {
            return ctx.edit("<i>you are not an admin!</i>").await;
        }

        let Some((reply, user_id)) = replied_user(&ctx).await? else {
            return ctx.edit("<i>please reply to a message</i>").await;
        };
        let name = escape_html(&reply.sender_name);

        ctx.edit(&format!("<i>kicking {name}...</i>")).await?;

        info!("ban chat_id: {}, user_id: {}", ctx.chat_id(), user_id);
        ctx.bot.ban_member(ctx.chat_id(), user_id).await?;
        info!("unban chat_id: {}, user_id: {}", ctx.chat_id(), user_id);
        ctx.bot.unban_member(ctx.chat_id(), user_id).await?;

        ctx.edit(&format!("<i>kicked {name}</i>")).await
    }

    async fn ban(self: Arc<Self>, ctx: MessageContext) -> Result<(), PluginError> {
        let Some((_, user_id)) = replied_user(&ctx).await? else {
            return ctx.edit("<i>reply to a user message!</i>").await;
        };

        ctx.bot.ban_member(ctx.chat_id(), user_id).await?;
        confirm_and_delete(&ctx, "<i>banned</i>").await
    }

    async fn unban(self: Arc<Self>, ctx: MessageContext) -> Result<(), PluginError> {
        let Some((_, user_id)) = replied_user(&ctx).await? else {
            return ctx.edit("<i>reply to a user message!</i>").await;
        };

        ctx.bot.unban_member(ctx.chat_id(), user_id).await?;
        confirm_and_delete(&ctx, "<i>unbanned</i>").await
    }
}

#[async_trait]
impl Plugin for Moderation {
    fn name(&self) -> &'static str {
        "Moderation"
    }

    fn description(&self) -> &'static str {
        "group and channel moderation"
    }

    fn register_handlers(self: Arc<Self>) -> Vec<Handler> {
        vec![
            Handler::new(self.ctx.command(["purge"]).me_only(), bind(&self, Self::purge)),
            Handler::new(self.ctx.command(["kick"]).me_only(), bind(&self, Self::kick)),
            Handler::new(self.ctx.command(["ban"]).me_only(), bind(&self, Self::ban)),
            Handler::new(self.ctx.command(["unban"]).me_only(), bind(&self, Self::unban)),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_purge_chunks_small_range() {
        assert_eq!(purge_chunks(10, 14), vec![vec![10, 11, 12, 13]]);
    }

    #[test]
    fn test_purge_chunks_split_by_hundred() {
        let chunks = purge_chunks(1, 251);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), 100);
        assert_eq!(chunks[1][0], 101);
        assert_eq!(chunks[2], (201..251).collect::<Vec<_>>());
    }

    #[test]
    fn test_purge_chunks_excludes_command() {
        let chunks = purge_chunks(5, 6);
        assert_eq!(chunks, vec![vec![5]]);
        assert!(purge_chunks(6, 6).is_empty());
        assert!(purge_chunks(7, 6).is_empty());
    }
}
