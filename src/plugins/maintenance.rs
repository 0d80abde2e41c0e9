//! Self-maintenance: restart, update from git, shell access and logs.
//!
//! A restart leaves a marker in the `maintenance` namespace. The next
//! process reads it in its start hook and edits the command message to
//! report how long the restart took.

use std::process::Output;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::{Handler, Lifecycle, MessageContext, Plugin, PluginContext, PluginError, bind};
use crate::config::JsonStore;
use crate::telegram::escape_html;

const NAMESPACE: &str = "maintenance";

/// Restart bookkeeping kept across processes.
#[derive(Debug, Clone, Default, PartialEq)]
struct RestartMarker {
    begin_time: f64,
    chat_id: i64,
    message_id: i32,
    restart: bool,
    update_changelog: String,
}

impl RestartMarker {
    fn read(store: &JsonStore) -> Self {
        Self {
            begin_time: store.get_or_default("begin_time"),
            chat_id: store.get_or_default("chat_id"),
            message_id: store.get_or_default("message_id"),
            restart: store.get_or_default("restart"),
            update_changelog: store.get_or_default("update_changelog"),
        }
    }

    fn write(&self, store: &mut JsonStore) -> Result<(), PluginError> {
        store.set("begin_time", self.begin_time)?;
        store.set("chat_id", self.chat_id)?;
        store.set("message_id", self.message_id)?;
        store.set("restart", self.restart)?;
        store.set("update_changelog", &self.update_changelog)?;
        store.save()?;
        Ok(())
    }
}

fn unix_now() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

fn restart_report(elapsed: f64, changelog: &str) -> String {
    let updated = if changelog.is_empty() {
        " "
    } else {
        " updated and "
    };
    format!(
        "<i>bot{updated}restarted successfully, took {elapsed:.2}s</i>\n{}",
        escape_html(changelog)
    )
}

fn shell_report(output: &Output) -> String {
    format!(
        "stdout:\n{}\n\nstderr:\n{}\n",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    )
}

pub struct Maintenance {
    ctx: PluginContext,
    store: Mutex<JsonStore>,
    update_lock: Mutex<()>,
}

pub fn load(ctx: &PluginContext) -> Result<Arc<dyn Plugin>, PluginError> {
    let store = JsonStore::open(ctx.persist_dir(), NAMESPACE)?;
    Ok(Arc::new(Maintenance {
        ctx: ctx.clone(),
        store: Mutex::new(store),
        update_lock: Mutex::new(()),
    }))
}

impl Maintenance {
    /// Records the marker and asks the main loop to restart.
    async fn perform_restart(
        &self,
        ctx: &MessageContext,
        changelog: String,
    ) -> Result<(), PluginError> {
        let marker = RestartMarker {
            begin_time: unix_now(),
            chat_id: ctx.chat_id(),
            message_id: ctx.message.id,
            restart: true,
            update_changelog: changelog,
        };
        marker.write(&mut *self.store.lock().await)?;

        info!("restart requested from chat {}", ctx.chat_id());
        self.ctx
            .lifecycle
            .send(Lifecycle::Restart)
            .map_err(|_| PluginError::Failed("main loop is gone".to_owned()))
    }

    async fn restart(self: Arc<Self>, ctx: MessageContext) -> Result<(), PluginError> {
        let Ok(_guard) = self.update_lock.try_lock() else {
            warn!("[restart] cannot acquire lock, will not restart");
            return ctx
                .edit("<i>cannot restart because an update process is running</i>")
                .await;
        };

        ctx.edit("<i>restarting bot</i>").await?;
        self.perform_restart(&ctx, String::new()).await
    }

    async fn update(self: Arc<Self>, ctx: MessageContext) -> Result<(), PluginError> {
        let Ok(_guard) = self.update_lock.try_lock() else {
            warn!("[update] cannot acquire lock, will not update");
            return ctx.edit("<i>another update is already running</i>").await;
        };

        ctx.edit("<i>running git pull</i>").await?;
        let output = Command::new("git")
            .args(["pull", "--rebase"])
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return ctx
                .edit(&format!(
                    "<i>error when running git pull</i>, {}",
                    escape_html(&stderr)
                ))
                .await;
        }

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if stdout == "Already up to date.\n" {
            return ctx.edit("<i>bot is already up to date</i>").await;
        }

        ctx.edit("<i>restarting the bot</i>").await?;
        self.perform_restart(&ctx, stdout).await
    }

    async fn shell(self: Arc<Self>, ctx: MessageContext) -> Result<(), PluginError> {
        info!("running shell command: {}", ctx.args());
        let output = Command::new("sh").arg("-c").arg(ctx.args()).output().await?;
        ctx.respond_long(&shell_report(&output), "output.txt").await
    }

    async fn getlog(self: Arc<Self>, ctx: MessageContext) -> Result<(), PluginError> {
        ctx.edit("<i>uploading log</i>").await?;

        let Some(path) = self
            .ctx
            .settings
            .log
            .file
            .as_deref()
            .filter(|path| path.is_file())
        else {
            warn!("log file does not exist");
            return ctx.edit("<i>cannot locate log file!</i>").await;
        };

        ctx.reply_document(path, "").await?;
        ctx.edit("<i>done</i>").await
    }
}

#[async_trait]
impl Plugin for Maintenance {
    fn name(&self) -> &'static str {
        "Maintenance"
    }

    fn description(&self) -> &'static str {
        "restart, update and inspect the userbot"
    }

    fn register_handlers(self: Arc<Self>) -> Vec<Handler> {
        vec![
            Handler::new(self.ctx.command(["update"]).me_only(), bind(&self, Self::update)),
            Handler::new(self.ctx.command(["restart"]).me_only(), bind(&self, Self::restart)),
            Handler::new(self.ctx.command(["shell"]).me_only(), bind(&self, Self::shell)),
            Handler::new(self.ctx.command(["getlog"]).me_only(), bind(&self, Self::getlog)),
        ]
    }

    async fn on_start(&self) -> Result<(), PluginError> {
        let mut store = self.store.lock().await;
        let marker = RestartMarker::read(&store);
        if !marker.restart {
            return Ok(());
        }

        info!("attempting to finish restart");
        let text = restart_report(unix_now() - marker.begin_time, &marker.update_changelog);
        if let Err(e) = self
            .ctx
            .bot
            .edit_html(marker.chat_id, marker.message_id, &text)
            .await
        {
            warn!("could not report the finished restart: {}", e);
        }

        RestartMarker {
            restart: false,
            update_changelog: String::new(),
            ..marker
        }
        .write(&mut store)
    }
}
