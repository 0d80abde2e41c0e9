//! Release post moderation for the RM6785 community channel.
//!
//! Authorised users review release posts in a group: the bot lints the
//! post against the channel template, users vote on it, and once enough
//! approvals are in the post is copied to the channel after a delay.

mod auth;
mod lint;
mod posts;
mod votes;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::{Handler, MessageContext, Plugin, PluginContext, PluginError, bind};
use crate::commands::CommandFilter;
use crate::config::JsonStore;
use crate::telegram::escape_html;

use auth::{AuthList, is_superuser};
use posts::{ChannelPublisher, PostActions, PostRecord, PostRegistry, PostTiming};
use votes::{BOT_VOTER, Votes};

/// Channel receiving the approved posts.
const CHANNEL_ID: i64 = -1_001_384_382_397;

/// Announcement sticker sent before every post.
const STICKER_ID: &str =
    "CAACAgUAAx0EX9CqtwACBvdpYhcQ4xFR18TbqiDxMasDZ4EWOQACLwQAAt4AAXFVonEmaEmbIrYeBA";

const REQUIRED_APPROVALS: usize = 3;

const PREFIXES: [&str; 4] = [".", "/", ",", "!"];

pub struct Release {
    ctx: PluginContext,
    auth: Mutex<AuthList>,
    votes: Mutex<Votes>,
    saved_posts: Mutex<JsonStore>,
    posts: Arc<PostRegistry>,
    publisher: Arc<dyn PostActions>,
}

pub fn load(ctx: &PluginContext) -> Result<Arc<dyn Plugin>, PluginError> {
    let dir = ctx.persist_dir();
    Ok(Arc::new(Release {
        ctx: ctx.clone(),
        auth: Mutex::new(AuthList::open(dir)?),
        votes: Mutex::new(Votes::open(dir)?),
        saved_posts: Mutex::new(JsonStore::open(dir, posts::NAMESPACE)?),
        posts: PostRegistry::new(PostTiming::default()),
        publisher: Arc::new(ChannelPublisher {
            bot: Arc::clone(&ctx.bot),
            channel_id: CHANNEL_ID,
        }),
    }))
}

fn command<const N: usize>(commands: [&str; N], extra_prefix: Option<&str>) -> CommandFilter {
    CommandFilter::new(commands, PREFIXES.into_iter().chain(extra_prefix))
}

fn approval_count(count: usize) -> String {
    format!("approval count: {count}/{REQUIRED_APPROVALS}")
}

impl Release {
    async fn is_authorised(&self, ctx: &MessageContext) -> bool {
        let Some(sender) = ctx.message.sender_id else {
            return false;
        };
        self.auth.lock().await.is_authorised(sender)
    }

    async fn count(&self, message_id: i32) -> usize {
        self.votes.lock().await.count(message_id)
    }

    async fn auth(self: Arc<Self>, ctx: MessageContext) -> Result<(), PluginError> {
        if !ctx.message.sender_id.is_some_and(is_superuser) {
            ctx.respond("<i>You must be a superuser to do this</i>").await?;
            return Ok(());
        }

        let Some((reply, user_id)) = ctx
            .reply_message()
            .await?
            .and_then(|r| r.sender_id.map(|id| (r, id)))
        else {
            ctx.respond("<i>reply to a message</i>").await?;
            return Ok(());
        };

        let result = self.auth.lock().await.authorise(&reply.sender_name, user_id);
        let text = match result {
            Ok(()) => "<i>user is now authorised</i>".to_owned(),
            Err(e) => format!("<i>cannot auth user, error: {}</i>", escape_html(&e.to_string())),
        };
        ctx.respond(&text).await?;
        Ok(())
    }

    async fn deauth(self: Arc<Self>, ctx: MessageContext) -> Result<(), PluginError> {
        if !ctx.message.sender_id.is_some_and(is_superuser) {
            ctx.respond("<i>You must be a superuser to do this</i>").await?;
            return Ok(());
        }

        let Some(user_id) = ctx.reply_message().await?.and_then(|r| r.sender_id) else {
            ctx.respond("<i>reply to a message</i>").await?;
            return Ok(());
        };

        let result = self.auth.lock().await.deauthorise(user_id);
        let text = match result {
            Ok(()) => "<i>user is now deauthorised</i>".to_owned(),
            Err(e) => format!("<i>cannot deauth user, error: {}</i>", escape_html(&e.to_string())),
        };
        ctx.respond(&text).await?;
        Ok(())
    }

    async fn lint(self: Arc<Self>, ctx: MessageContext) -> Result<(), PluginError> {
        let Some(post) = ctx.reply_message().await? else {
            ctx.respond("<i>please reply to a message</i>").await?;
            return Ok(());
        };
        if !post.has_caption() {
            ctx.respond("<i>missing banner image</i>").await?;
            return Ok(());
        }

        let report = lint::lint_post(&post.text, &post.entities);
        ctx.respond(&report.text).await?;

        {
            let mut votes = self.votes.lock().await;
            // a repeated lint with the same result leaves the vote as is
            let result = if report.ok {
                votes.vote(BOT_VOTER, post.id)
            } else {
                votes.remove_vote(BOT_VOTER, post.id)
            };
            if let Err(e) = result {
                info!("bot vote unchanged for message {}: {}", post.id, e);
            }
        }

        let count = self.count(post.id).await;
        ctx.reply(&format!("<i>{}</i>", approval_count(count))).await?;
        Ok(())
    }

    async fn approve(self: Arc<Self>, ctx: MessageContext) -> Result<(), PluginError> {
        if !self.is_authorised(&ctx).await {
            ctx.respond("<i>you are not authorised to do this</i>").await?;
            return Ok(());
        }
        let Some(post_id) = ctx.message.reply_to else {
            ctx.respond("<i>reply to a message please</i>").await?;
            return Ok(());
        };
        let Some(voter) = ctx.message.sender_id else {
            return Ok(());
        };

        let result = self.votes.lock().await.vote(voter, post_id);
        let text = match result {
            Ok(()) => format!("<i>approved. {}</i>", approval_count(self.count(post_id).await)),
            Err(e) => format!("<i>approval failed, reason: {}</i>", escape_html(&e.to_string())),
        };
        ctx.respond(&text).await?;
        Ok(())
    }

    async fn disapprove(self: Arc<Self>, ctx: MessageContext) -> Result<(), PluginError> {
        if !self.is_authorised(&ctx).await {
            ctx.respond("<i>you are not authorised to do this</i>").await?;
            return Ok(());
        }
        let Some(post_id) = ctx.message.reply_to else {
            ctx.respond("<i>reply to a message please</i>").await?;
            return Ok(());
        };
        let Some(voter) = ctx.message.sender_id else {
            return Ok(());
        };

        let result = self.votes.lock().await.remove_vote(voter, post_id);
        let text = match result {
            Ok(()) => format!(
                "<i>approval removed. {}</i>",
                approval_count(self.count(post_id).await)
            ),
            Err(e) => format!(
                "<i>removing approval failed, reason: {}</i>",
                escape_html(&e.to_string())
            ),
        };
        ctx.respond(&text).await?;
        Ok(())
    }

    /// Sends the sticker and starts the countdown for a source post.
    async fn start_post(
        &self,
        source_chat_id: i64,
        source_message_id: i32,
        confirmation_message_id: i32,
    ) -> Result<bool, PluginError> {
        let sticker_message_id = self.ctx.bot.send_sticker(CHANNEL_ID, STICKER_ID).await?;
        let record = PostRecord {
            post_source_chat_id: source_chat_id,
            post_source_message_id: source_message_id,
            post_confirmation_message_id: confirmation_message_id,
            sticker_chat_id: CHANNEL_ID,
            sticker_message_id,
        };

        if self.posts.schedule(Arc::clone(&self.publisher), record).await {
            return Ok(true);
        }
        self.ctx
            .bot
            .delete_messages(CHANNEL_ID, &[sticker_message_id])
            .await?;
        Ok(false)
    }

    async fn post(self: Arc<Self>, ctx: MessageContext) -> Result<(), PluginError> {
        if !self.is_authorised(&ctx).await {
            ctx.respond("<i>you are not authorised to do this</i>").await?;
            return Ok(());
        }
        let Some(post_id) = ctx.message.reply_to else {
            ctx.respond("<i>reply to a message please</i>").await?;
            return Ok(());
        };

        let count = self.count(post_id).await;
        if count < REQUIRED_APPROVALS {
            ctx.respond(&format!("<i>not enough approvals. {}</i>", approval_count(count)))
                .await?;
            return Ok(());
        }

        let confirmation = ctx.respond("<i>please wait</i>").await?;
        if !self.start_post(ctx.chat_id(), post_id, confirmation).await? {
            ctx.bot
                .edit_html(ctx.chat_id(), confirmation, "<i>post is already pending</i>")
                .await?;
        }
        Ok(())
    }

    async fn cancel(self: Arc<Self>, ctx: MessageContext) -> Result<(), PluginError> {
        if !self.is_authorised(&ctx).await {
            ctx.respond("<i>you are not authorised to do this</i>").await?;
            return Ok(());
        }
        let Some(post_id) = ctx.message.reply_to else {
            ctx.respond("<i>reply to a message please</i>").await?;
            return Ok(());
        };

        let response = ctx.respond("<i>please wait</i>").await?;
        let text = match self.posts.cancel(ctx.chat_id(), post_id).await {
            Some(record) => {
                ctx.bot
                    .delete_messages(record.sticker_chat_id, &[record.sticker_message_id])
                    .await?;
                "<i>post cancelled</i>"
            }
            None => "<i>error: message was not posted</i>",
        };
        ctx.bot.edit_html(ctx.chat_id(), response, text).await?;
        Ok(())
    }
}

#[async_trait]
impl Plugin for Release {
    fn name(&self) -> &'static str {
        "RM6785"
    }

    fn description(&self) -> &'static str {
        "release post linting, voting and publishing"
    }

    fn register_handlers(self: Arc<Self>) -> Vec<Handler> {
        vec![
            Handler::new(command(["auth"], None), bind(&self, Self::auth)),
            Handler::new(command(["deauth"], None), bind(&self, Self::deauth)),
            Handler::new(command(["lint"], None), bind(&self, Self::lint)),
            Handler::new(command(["approve", "1"], Some("+")), bind(&self, Self::approve)),
            Handler::new(
                command(["disapprove", "1"], Some("-")),
                bind(&self, Self::disapprove),
            ),
            Handler::new(command(["post"], None), bind(&self, Self::post)),
            Handler::new(command(["cancel"], None), bind(&self, Self::cancel)),
        ]
    }

    async fn on_start(&self) -> Result<(), PluginError> {
        let saved = posts::load_unfinished(&*self.saved_posts.lock().await);
        if saved.is_empty() {
            return Ok(());
        }

        info!("restoring {} unfinished posts", saved.len());
        for record in saved {
            if let Err(e) = self
                .ctx
                .bot
                .delete_messages(record.sticker_chat_id, &[record.sticker_message_id])
                .await
            {
                warn!("could not delete old sticker of post {:?}: {}", record, e);
            }

            if let Err(e) = self
                .start_post(
                    record.post_source_chat_id,
                    record.post_source_message_id,
                    record.post_confirmation_message_id,
                )
                .await
            {
                warn!("could not restore post {:?}: {}", record, e);
            }
        }

        posts::save_unfinished(&mut *self.saved_posts.lock().await, &[])
    }

    async fn on_shutdown(&self) -> Result<(), PluginError> {
        let unfinished = self.posts.shutdown().await;
        if unfinished.is_empty() {
            return Ok(());
        }

        info!("saving {} unfinished posts", unfinished.len());
        posts::save_unfinished(&mut *self.saved_posts.lock().await, &unfinished)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telegram::IncomingMessage;

    fn text(text: &str) -> IncomingMessage {
        IncomingMessage::detached(-100, 1, text)
    }

    #[test]
    fn test_vote_commands_accept_sign_prefix() {
        let approve = command(["approve", "1"], Some("+"));
        assert!(approve.matches("+1").is_some());
        assert!(approve.matches(".approve").is_some());
        assert!(approve.matches("-1").is_none());

        let disapprove = command(["disapprove", "1"], Some("-"));
        assert!(disapprove.matches("-1").is_some());
        assert!(disapprove.matches("!disapprove").is_some());
        assert!(disapprove.matches("+1").is_none());
    }

    #[test]
    fn test_commands_are_open_to_everyone() {
        let filter = command(["lint"], None);
        assert!(!filter.is_me_only());
        assert!(filter.accepts(&text(",lint"), 1).is_some());
        assert!(filter.accepts(&text("lint"), 1).is_none());
    }

    #[test]
    fn test_approval_count() {
        assert_eq!(approval_count(2), "approval count: 2/3");
    }
}
