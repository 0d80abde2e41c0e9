//! Lists the loaded plugins and their commands.

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;

use super::{CatalogEntry, Handler, MessageContext, Plugin, PluginContext, PluginError, bind};
use crate::commands::CommandFilter;
use crate::telegram::escape_html;

pub struct Help {
    filter: CommandFilter,
    catalog: Arc<OnceLock<Vec<CatalogEntry>>>,
}

pub fn load(ctx: &PluginContext) -> Result<Arc<dyn Plugin>, PluginError> {
    Ok(Arc::new(Help {
        filter: ctx.command(["help"]).me_only(),
        catalog: Arc::clone(&ctx.catalog),
    }))
}

fn render(catalog: &[CatalogEntry]) -> String {
    catalog
        .iter()
        .map(|entry| {
            let mut block = format!("<b>Plugin: {}</b>", escape_html(entry.name));
            for command in &entry.commands {
                block.push('\n');
                block.push_str(&escape_html(command));
            }
            block
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

impl Help {
    async fn help(self: Arc<Self>, ctx: MessageContext) -> Result<(), PluginError> {
        let catalog = self.catalog.get().map(Vec::as_slice).unwrap_or_default();
        ctx.edit(&render(catalog)).await
    }
}

#[async_trait]
impl Plugin for Help {
    fn name(&self) -> &'static str {
        "Help"
    }

    fn description(&self) -> &'static str {
        "list plugins and their commands"
    }

    fn register_handlers(self: Arc<Self>) -> Vec<Handler> {
        vec![Handler::new(self.filter.clone(), bind(&self, Self::help))]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_catalog() {
        let catalog = vec![
            CatalogEntry {
                name: "Ping",
                commands: vec!["ping".to_owned()],
            },
            CatalogEntry {
                name: "Moderation",
                commands: vec!["purge".to_owned(), "kick".to_owned()],
            },
        ];

        assert_eq!(
            render(&catalog),
            "<b>Plugin: Ping</b>\nping\n\n<b>Plugin: Moderation</b>\npurge\nkick"
        );
    }

    #[test]
    fn test_render_escapes_commands() {
        let catalog = vec![CatalogEntry {
            name: "Votes",
            commands: vec!["<x>".to_owned()],
        }];
        assert_eq!(render(&catalog), "<b>Plugin: Votes</b>\n&lt;x&gt;");
    }

    #[test]
    fn test_render_empty() {
        assert_eq!(render(&[]), "");
    }
}
