//! Plugin discovery and lifecycle.
//!
//! Plugins are compiled in and listed in [`REGISTRY`]. Entries whose id
//! starts with `_`, or which are named in `HBOT_DISABLED_PLUGINS`, are not
//! loaded.

use std::sync::Arc;

use tracing::{error, info, warn};

use super::{Handler, Plugin, PluginContext, PluginError};
use crate::config::BotSettings;

type Constructor<C = PluginContext> = fn(&C) -> Result<Arc<dyn Plugin>, PluginError>;

/// Every plugin that can be loaded, in load order.
pub const REGISTRY: &[(&str, Constructor)] = &[
    ("ping", super::ping::load),
    ("help", super::help::load),
    ("moderation", super::moderation::load),
    ("maintenance", super::maintenance::load),
    ("ziptools", super::ziptools::load),
    ("solat", super::solat::load),
    ("gemini", super::gemini::load),
    ("rm6785", super::release::load),
];

/// Name and commands of a loaded plugin, as shown by `help`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub name: &'static str,
    pub commands: Vec<String>,
}

/// The loaded plugins and their handlers in load order.
#[derive(Default)]
pub struct LoadedPlugins {
    plugins: Vec<Arc<dyn Plugin>>,
    handlers: Vec<Handler>,
}

impl LoadedPlugins {
    #[must_use]
    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Takes the handlers out for the dispatcher.
    pub fn take_handlers(&mut self) -> Vec<Handler> {
        std::mem::take(&mut self.handlers)
    }

    /// Runs every start hook. Failures are logged and do not stop the others.
    pub async fn start_all(&self) {
        for plugin in &self.plugins {
            if let Err(e) = plugin.on_start().await {
                error!("start hook of plugin '{}' failed: {}", plugin.name(), e);
            }
        }
    }

    /// Runs every shutdown hook in reverse load order.
    pub async fn shutdown_all(&self) {
        for plugin in self.plugins.iter().rev() {
            if let Err(e) = plugin.on_shutdown().await {
                error!("shutdown hook of plugin '{}' failed: {}", plugin.name(), e);
            }
        }
    }
}

impl std::fmt::Debug for LoadedPlugins {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedPlugins")
            .field(
                "plugins",
                &self.plugins.iter().map(|p| p.name()).collect::<Vec<_>>(),
            )
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

/// Whether a registry entry should be loaded.
fn is_enabled(id: &str, settings: &BotSettings) -> bool {
    !id.starts_with('_') && !settings.is_disabled(id)
}

/// Constructs every enabled plugin and publishes the catalog.
pub fn load_plugins(ctx: &PluginContext) -> LoadedPlugins {
    let (loaded, catalog) = load_from(REGISTRY, ctx, &ctx.settings);
    if ctx.catalog.set(catalog).is_err() {
        warn!("plugin catalog was already published");
    }
    loaded
}

/// Walks `registry` in order, skipping disabled ids and failed constructors.
fn load_from<C>(
    registry: &[(&str, Constructor<C>)],
    ctx: &C,
    settings: &BotSettings,
) -> (LoadedPlugins, Vec<CatalogEntry>) {
    let mut loaded = LoadedPlugins::default();
    let mut catalog = Vec::new();

    for (id, construct) in registry {
        if !is_enabled(id, settings) {
            info!("skipping plugin '{}'", id);
            continue;
        }

        let plugin = match construct(ctx) {
            Ok(plugin) => plugin,
            Err(e) => {
                error!("could not load plugin '{}': {}", id, e);
                continue;
            }
        };

        let name = plugin.name();
        let handlers: Vec<Handler> = Arc::clone(&plugin)
            .register_handlers()
            .into_iter()
            .map(|h| h.owned_by(name))
            .collect();

        catalog.push(CatalogEntry {
            name,
            commands: handlers
                .iter()
                .flat_map(|h| h.filter().commands().iter().cloned())
                .collect(),
        });

        info!("loaded plugin '{}'. desc: '{}'", name, plugin.description());
        loaded.handlers.extend(handlers);
        loaded.plugins.push(plugin);
    }

    (loaded, catalog)
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::path::PathBuf;

    use async_trait::async_trait;

    use super::*;
    use crate::commands::CommandFilter;
    use crate::config::LogSettings;

    struct Fake {
        name: &'static str,
        commands: &'static [&'static str],
    }

    #[async_trait]
    impl Plugin for Fake {
        fn name(&self) -> &'static str {
            self.name
        }

        fn description(&self) -> &'static str {
            "test plugin"
        }

        fn register_handlers(self: Arc<Self>) -> Vec<Handler> {
            self.commands
                .iter()
                .map(|command| {
                    Handler::new(CommandFilter::new([*command], ["."]), |_ctx| async {
                        Ok(())
                    })
                })
                .collect()
        }
    }

    fn alpha(_: &()) -> Result<Arc<dyn Plugin>, PluginError> {
        Ok(Arc::new(Fake {
            name: "Alpha",
            commands: &["one", "two"],
        }))
    }

    fn broken(_: &()) -> Result<Arc<dyn Plugin>, PluginError> {
        Err(PluginError::Failed("no credentials".to_owned()))
    }

    fn beta(_: &()) -> Result<Arc<dyn Plugin>, PluginError> {
        Ok(Arc::new(Fake {
            name: "Beta",
            commands: &["three"],
        }))
    }

    const FAKE_REGISTRY: &[(&str, Constructor<()>)] =
        &[("alpha", alpha), ("broken", broken), ("beta", beta)];

    fn settings(disabled: &[&str]) -> BotSettings {
        BotSettings {
            persist_dir: PathBuf::from("persist"),
            disabled_plugins: disabled.iter().map(|s| (*s).to_owned()).collect(),
            log: LogSettings::default(),
        }
    }

    #[test]
    fn test_underscore_ids_are_skipped() {
        let settings = settings(&[]);
        assert!(is_enabled("ping", &settings));
        assert!(!is_enabled("_draft", &settings));
    }

    #[test]
    fn test_disabled_ids_are_skipped() {
        let settings = settings(&["gemini"]);
        assert!(!is_enabled("gemini", &settings));
        assert!(is_enabled("solat", &settings));
    }

    #[test]
    fn test_registry_ids_are_unique() {
        let ids: HashSet<&str> = REGISTRY.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids.len(), REGISTRY.len());
        assert!(ids.iter().all(|id| !id.starts_with('_')));
    }

    #[test]
    fn test_failed_constructor_is_skipped() {
        let (mut loaded, catalog) = load_from(FAKE_REGISTRY, &(), &settings(&[]));

        assert_eq!(loaded.len(), 2);
        assert_eq!(
            catalog,
            vec![
                CatalogEntry {
                    name: "Alpha",
                    commands: vec!["one".to_owned(), "two".to_owned()],
                },
                CatalogEntry {
                    name: "Beta",
                    commands: vec!["three".to_owned()],
                },
            ]
        );

        let handlers = loaded.take_handlers();
        let owners: Vec<(&str, &str)> = handlers
            .iter()
            .map(|h| (h.plugin(), h.filter().commands()[0].as_str()))
            .collect();
        assert_eq!(
            owners,
            vec![("Alpha", "one"), ("Alpha", "two"), ("Beta", "three")]
        );
        assert!(loaded.take_handlers().is_empty());
    }

    #[test]
    fn test_disabled_plugin_is_left_out_of_catalog() {
        let (loaded, catalog) = load_from(FAKE_REGISTRY, &(), &settings(&["alpha"]));

        assert_eq!(loaded.len(), 1);
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog[0].name, "Beta");
    }

    #[tokio::test]
    async fn test_hooks_run_for_loaded_plugins() {
        let (loaded, _) = load_from(FAKE_REGISTRY, &(), &settings(&[]));
        loaded.start_all().await;
        loaded.shutdown_all().await;
    }
}
