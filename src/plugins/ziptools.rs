//! Unpacks zip archives sent to a chat.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::{debug, info};
use zip::ZipArchive;
use zip::result::ZipError;

use super::{Handler, MessageContext, Plugin, PluginContext, PluginError, bind};

pub struct ZipTools {
    ctx: PluginContext,
}

pub fn load(ctx: &PluginContext) -> Result<Arc<dyn Plugin>, PluginError> {
    Ok(Arc::new(ZipTools { ctx: ctx.clone() }))
}

/// Extracts `archive` into `dest`, returning the extracted files.
///
/// Returns `None` when the file is not a zip archive. Entries whose path
/// would escape `dest` are skipped, as are directories.
fn extract(archive: &Path, dest: &Path) -> Result<Option<Vec<PathBuf>>, PluginError> {
    let mut zip = match ZipArchive::new(File::open(archive)?) {
        Ok(zip) => zip,
        Err(ZipError::InvalidArchive(_) | ZipError::UnsupportedArchive(_)) => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let mut files = Vec::new();
    for index in 0..zip.len() {
        let mut entry = zip.by_index(index)?;
        let Some(relative) = entry.enclosed_name() else {
            info!("skipping unsafe zip entry '{}'", entry.name());
            continue;
        };
        let target = dest.join(relative);

        if entry.is_dir() {
            std::fs::create_dir_all(&target)?;
            continue;
        }
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }

        debug!("extracting '{}'", target.display());
        let mut out = File::create(&target)?;
        std::io::copy(&mut entry, &mut out)?;
        files.push(target);
    }

    Ok(Some(files))
}

impl ZipTools {
    async fn unzip(self: Arc<Self>, ctx: MessageContext) -> Result<(), PluginError> {
        let Some(reply) = ctx.reply_message().await? else {
            return ctx
                .edit("<i>reply to the file that you want to unzip</i>")
                .await;
        };
        if !reply.has_document {
            return ctx.edit("<i>please reply to a zip file</i>").await;
        }

        let archive = tempfile::Builder::new().suffix(".zip").tempfile()?;
        let dir = tempfile::tempdir()?;

        info!("downloading zip to temp file, name = '{}'", archive.path().display());
        ctx.bot.download_media(&reply, archive.path()).await?;

        ctx.edit("<i>unzipping</i>").await?;
        let start = Instant::now();

        let archive_path = archive.path().to_path_buf();
        let dest = dir.path().to_path_buf();
        let extracted = tokio::task::spawn_blocking(move || extract(&archive_path, &dest))
            .await
            .map_err(|e| PluginError::Failed(format!("extraction task failed: {e}")))??;

        let Some(files) = extracted else {
            info!("zip file is invalid");
            return ctx.edit("<i>the file provided is not a zip file</i>").await;
        };
        info!("unzip took {:?}, {} files", start.elapsed(), files.len());

        for file in &files {
            info!("uploading '{}'", file.display());
            ctx.reply_document(file, "").await?;
        }

        let took = start.elapsed().as_secs_f64();
        ctx.edit(&format!("<i>unzip finished, took {took:.3}s</i>"))
            .await
    }
}

#[async_trait]
impl Plugin for ZipTools {
    fn name(&self) -> &'static str {
        "Zip Tools"
    }

    fn description(&self) -> &'static str {
        "tools to work with zip files"
    }

    fn register_handlers(self: Arc<Self>) -> Vec<Handler> {
        vec![Handler::new(
            self.ctx.command(["unzip"]).me_only(),
            bind(&self, Self::unzip),
        )]
    }
}
