//! Delayed publishing of approved release posts.
//!
//! Each pending post runs on its own task that waits for the delay, shows
//! the remaining time on the confirmation message, and copies the source
//! post into the channel when the delay is over. A pending post can be
//! cancelled, or stopped at shutdown so it can be restored after restart.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::config::JsonStore;
use crate::plugins::PluginError;
use crate::telegram::{TelegramBot, escape_html};

/// Namespace holding posts interrupted by a shutdown.
pub const NAMESPACE: &str = "rm6785:post";
const UNFINISHED_KEY: &str = "unfinished_posts";

/// Everything needed to resume or clean up a pending post.
///
/// The confirmation message lives in the same chat as the source post.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostRecord {
    pub post_source_chat_id: i64,
    pub post_source_message_id: i32,
    pub post_confirmation_message_id: i32,
    pub sticker_chat_id: i64,
    pub sticker_message_id: i32,
}

impl PostRecord {
    fn key(&self) -> (i64, i32) {
        (self.post_source_chat_id, self.post_source_message_id)
    }
}

pub fn load_unfinished(store: &JsonStore) -> Vec<PostRecord> {
    store.get_or_default(UNFINISHED_KEY)
}

pub fn save_unfinished(store: &mut JsonStore, records: &[PostRecord]) -> Result<(), PluginError> {
    store.set(UNFINISHED_KEY, records)?;
    store.save()?;
    Ok(())
}

/// Delay before publishing and spacing of the countdown edits.
#[derive(Debug, Clone, Copy)]
pub struct PostTiming {
    pub delay: Duration,
    pub tick: Duration,
}

impl Default for PostTiming {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(5 * 60),
            tick: Duration::from_secs(2),
        }
    }
}

/// Side effects of the post workflow.
#[async_trait]
pub trait PostActions: Send + Sync + 'static {
    /// Replaces the text of the confirmation message.
    async fn show(&self, record: &PostRecord, html: &str) -> Result<(), PluginError>;

    /// Copies the source post into the channel.
    async fn publish(&self, record: &PostRecord) -> Result<(), PluginError>;
}

/// Post actions backed by the Telegram client.
pub struct ChannelPublisher {
    pub bot: Arc<TelegramBot>,
    pub channel_id: i64,
}

#[async_trait]
impl PostActions for ChannelPublisher {
    async fn show(&self, record: &PostRecord, html: &str) -> Result<(), PluginError> {
        self.bot
            .edit_html(
                record.post_source_chat_id,
                record.post_confirmation_message_id,
                html,
            )
            .await?;
        Ok(())
    }

    async fn publish(&self, record: &PostRecord) -> Result<(), PluginError> {
        self.bot
            .copy_message(
                record.post_source_chat_id,
                record.post_source_message_id,
                self.channel_id,
            )
            .await?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stop {
    Cancel,
    Shutdown,
}

#[derive(Debug, PartialEq, Eq)]
enum Outcome {
    Due,
    Cancelled,
    Stopped,
}

struct Pending {
    record: PostRecord,
    stop: oneshot::Sender<Stop>,
    task: JoinHandle<()>,
}

fn remaining_text(remaining: Duration) -> String {
    format!(
        "<i>time remaining: {:.2} minutes</i>",
        remaining.as_secs_f64() / 60.0
    )
}

/// All pending posts, keyed by source message.
pub struct PostRegistry {
    timing: PostTiming,
    pending: Mutex<HashMap<(i64, i32), Pending>>,
}

impl PostRegistry {
    #[must_use]
    pub fn new(timing: PostTiming) -> Arc<Self> {
        Arc::new(Self {
            timing,
            pending: Mutex::new(HashMap::new()),
        })
    }

    /// Starts the countdown for `record`.
    ///
    /// Returns `false` when the source post already has a pending post.
    pub async fn schedule(self: &Arc<Self>, actions: Arc<dyn PostActions>, record: PostRecord) -> bool {
        let mut pending = self.pending.lock().await;
        if pending.contains_key(&record.key()) {
            warn!("post for {:?} is already pending", record.key());
            return false;
        }

        let (stop, stop_rx) = oneshot::channel();
        let registry = Arc::clone(self);
        let task = tokio::spawn(async move {
            registry.run(actions, record, stop_rx).await;
        });

        info!("scheduled post {:?}", record);
        pending.insert(record.key(), Pending { record, stop, task });
        true
    }

    /// Cancels the pending post of a source message.
    pub async fn cancel(&self, chat_id: i64, message_id: i32) -> Option<PostRecord> {
        let pending = self.pending.lock().await.remove(&(chat_id, message_id))?;
        if pending.stop.send(Stop::Cancel).is_err() {
            // the task finished between lookup and signal
            return None;
        }
        info!("cancelled post {:?}", pending.record);
        Some(pending.record)
    }

    /// Stops every pending post and returns them for saving.
    pub async fn shutdown(&self) -> Vec<PostRecord> {
        let drained: Vec<Pending> = self.pending.lock().await.drain().map(|(_, p)| p).collect();

        let mut records = Vec::new();
        for pending in drained {
            if pending.stop.send(Stop::Shutdown).is_ok() {
                info!("found unfinished post {:?}", pending.record);
                records.push(pending.record);
            }
            if let Err(e) = pending.task.await {
                warn!("post task ended abnormally: {}", e);
            }
        }
        records
    }

    pub async fn len(&self) -> usize {
        self.pending.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.pending.lock().await.is_empty()
    }

    async fn run(
        self: Arc<Self>,
        actions: Arc<dyn PostActions>,
        record: PostRecord,
        stop: oneshot::Receiver<Stop>,
    ) {
        let outcome = countdown(actions.as_ref(), &record, self.timing, stop).await;

        let text = match outcome {
            Outcome::Due => match actions.publish(&record).await {
                Ok(()) => {
                    info!("published post {:?}", record);
                    Some("<i>posted</i>".to_owned())
                }
                Err(e) => {
                    error!("could not publish post {:?}: {}", record, e);
                    Some(format!(
                        "<i>posting failed: {}</i>",
                        escape_html(&e.to_string())
                    ))
                }
            },
            Outcome::Cancelled => Some("<i>post cancelled</i>".to_owned()),
            Outcome::Stopped => None,
        };

        if let Some(text) = text
            && let Err(e) = actions.show(&record, &text).await
        {
            warn!("could not update confirmation message: {}", e);
        }

        if outcome == Outcome::Due {
            self.pending.lock().await.remove(&record.key());
        }
    }
}

fn stop_outcome(reason: Result<Stop, oneshot::error::RecvError>) -> Outcome {
    match reason {
        Ok(Stop::Cancel) => Outcome::Cancelled,
        Ok(Stop::Shutdown) | Err(_) => Outcome::Stopped,
    }
}

/// Waits for the delay or a stop signal, showing the time left on each tick.
///
/// Countdown edits race the deadline and the stop signal, so a slow edit
/// never delays publishing or shutdown. The stop receiver is consumed, so a
/// signal sent after this returns fails.
async fn countdown(
    actions: &dyn PostActions,
    record: &PostRecord,
    timing: PostTiming,
    mut stop: oneshot::Receiver<Stop>,
) -> Outcome {
    let start = Instant::now();
    let deadline = start + timing.delay;
    let mut ticker = tokio::time::interval(timing.tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            reason = &mut stop => return stop_outcome(reason),
            () = tokio::time::sleep_until(deadline) => return Outcome::Due,
            _ = ticker.tick() => {}
        }

        let text = remaining_text(timing.delay.saturating_sub(start.elapsed()));
        tokio::select! {
            biased;
            reason = &mut stop => return stop_outcome(reason),
            () = tokio::time::sleep_until(deadline) => return Outcome::Due,
            result = actions.show(record, &text) => {
                if let Err(e) = result {
                    warn!("could not update countdown: {}", e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use super::*;

    #[derive(Default)]
    struct Recorder {
        /// How long each edit of the confirmation message takes.
        show_delay: Duration,
        shown: StdMutex<Vec<String>>,
        published: StdMutex<Vec<PostRecord>>,
    }

    impl Recorder {
        fn slow(show_delay: Duration) -> Self {
            Self {
                show_delay,
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl PostActions for Recorder {
        async fn show(&self, _record: &PostRecord, html: &str) -> Result<(), PluginError> {
            self.shown.lock().unwrap().push(html.to_owned());
            tokio::time::sleep(self.show_delay).await;
            Ok(())
        }

        async fn publish(&self, record: &PostRecord) -> Result<(), PluginError> {
            self.published.lock().unwrap().push(*record);
            Ok(())
        }
    }

    fn record(message_id: i32) -> PostRecord {
        PostRecord {
            post_source_chat_id: -100_1,
            post_source_message_id: message_id,
            post_confirmation_message_id: message_id + 1,
            sticker_chat_id: -1_001_384_382_397,
            sticker_message_id: 900,
        }
    }

    fn fast() -> PostTiming {
        PostTiming {
            delay: Duration::from_millis(150),
            tick: Duration::from_millis(40),
        }
    }

    #[test]
    fn test_remaining_text() {
        assert_eq!(
            remaining_text(Duration::from_secs(150)),
            "<i>time remaining: 2.50 minutes</i>"
        );
    }

    #[test]
    fn test_unfinished_posts_persist() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = JsonStore::open(dir.path(), NAMESPACE).unwrap();
        assert!(load_unfinished(&store).is_empty());

        save_unfinished(&mut store, &[record(10), record(20)]).unwrap();

        let reopened = JsonStore::open(dir.path(), NAMESPACE).unwrap();
        assert_eq!(load_unfinished(&reopened), vec![record(10), record(20)]);

        let raw = std::fs::read_to_string(reopened.path()).unwrap();
        assert!(raw.contains("\"post_confirmation_message_id\": 11"));
    }

    #[tokio::test]
    async fn test_post_is_published_after_delay() {
        let registry = PostRegistry::new(fast());
        let actions = Arc::new(Recorder::default());

        assert!(registry.schedule(actions.clone(), record(1)).await);
        assert!(!registry.schedule(actions.clone(), record(1)).await);
        assert_eq!(registry.len().await, 1);

        tokio::time::sleep(Duration::from_millis(400)).await;

        assert_eq!(*actions.published.lock().unwrap(), vec![record(1)]);
        let shown = actions.shown.lock().unwrap();
        assert!(shown.first().unwrap().starts_with("<i>time remaining:"));
        assert_eq!(shown.last().unwrap(), "<i>posted</i>");
        drop(shown);
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_cancel_stops_post() {
        let registry = PostRegistry::new(fast());
        let actions = Arc::new(Recorder::default());
        registry.schedule(actions.clone(), record(2)).await;

        assert_eq!(registry.cancel(-100_1, 2).await, Some(record(2)));
        assert_eq!(registry.cancel(-100_1, 2).await, None);

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(actions.published.lock().unwrap().is_empty());
        assert_eq!(
            actions.shown.lock().unwrap().last().unwrap(),
            "<i>post cancelled</i>"
        );
    }

    #[tokio::test]
    async fn test_shutdown_returns_pending_posts() {
        let registry = PostRegistry::new(PostTiming {
            delay: Duration::from_secs(60),
            tick: Duration::from_secs(1),
        });
        let actions = Arc::new(Recorder::default());
        registry.schedule(actions.clone(), record(3)).await;
        registry.schedule(actions.clone(), record(4)).await;

        let mut saved = registry.shutdown().await;
        saved.sort_by_key(|r| r.post_source_message_id);

        assert_eq!(saved, vec![record(3), record(4)]);
        assert!(registry.is_empty().await);
        assert!(actions.published.lock().unwrap().is_empty());
        assert!(
            !actions
                .shown
                .lock()
                .unwrap()
                .iter()
                .any(|s| s.contains("cancelled"))
        );
    }

    #[tokio::test]
    async fn test_slow_countdown_edit_does_not_delay_publish() {
        let registry = PostRegistry::new(PostTiming {
            delay: Duration::from_millis(200),
            tick: Duration::from_millis(50),
        });
        let actions = Arc::new(Recorder::slow(Duration::from_secs(3)));
        let started = Instant::now();
        registry.schedule(actions.clone(), record(5)).await;

        while actions.published.lock().unwrap().is_empty() {
            assert!(
                started.elapsed() < Duration::from_secs(1),
                "publish waited for the countdown edit"
            );
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(*actions.published.lock().unwrap(), vec![record(5)]);
    }

    #[tokio::test]
    async fn test_slow_countdown_edit_does_not_block_shutdown() {
        let registry = PostRegistry::new(PostTiming {
            delay: Duration::from_secs(60),
            tick: Duration::from_millis(10),
        });
        let actions = Arc::new(Recorder::slow(Duration::from_secs(5)));
        registry.schedule(actions.clone(), record(6)).await;

        // let the first countdown edit start
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(actions.shown.lock().unwrap().len(), 1);

        let saved = tokio::time::timeout(Duration::from_secs(1), registry.shutdown())
            .await
            .unwrap();
        assert_eq!(saved, vec![record(6)]);
        assert!(actions.published.lock().unwrap().is_empty());
    }
}
