//! Configuration module for the userbot.
//!
//! Handles environment settings, Telegram API credentials, and the flat
//! JSON persist store shared by all plugins.

mod settings;
mod store;

pub use settings::{BotSettings, ConfigError, LogSettings, TelegramConfig};
pub use store::{JsonStore, StoreError};

/// Namespace of the shared configuration in the persist store.
pub const SHARED_NAMESPACE: &str = "config";

/// Command prefixes used when the shared configuration names none.
pub const DEFAULT_PREFIXES: [&str; 2] = [".", "/"];

/// Loads the command prefixes from the shared configuration.
///
/// Writes the defaults back on first run so they can be edited by hand.
pub fn load_prefixes(store: &mut JsonStore) -> Result<Vec<String>, StoreError> {
    let prefixes: Vec<String> = store
        .get::<Vec<String>>("prefixes")
        .unwrap_or_default()
        .into_iter()
        .filter(|p| !p.is_empty())
        .collect();

    if !prefixes.is_empty() {
        return Ok(prefixes);
    }

    let defaults: Vec<String> = DEFAULT_PREFIXES.iter().map(|p| (*p).to_owned()).collect();
    store.set("prefixes", &defaults)?;
    store.save()?;
    Ok(defaults)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefixes_default_written_on_first_run() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = JsonStore::open(dir.path(), SHARED_NAMESPACE).unwrap();

        let prefixes = load_prefixes(&mut store).unwrap();
        assert_eq!(prefixes, vec![".", "/"]);

        let reopened = JsonStore::open(dir.path(), SHARED_NAMESPACE).unwrap();
        assert_eq!(
            reopened.get::<Vec<String>>("prefixes"),
            Some(vec![".".to_owned(), "/".to_owned()])
        );
    }

    #[test]
    fn test_custom_prefixes_are_kept() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = JsonStore::open(dir.path(), SHARED_NAMESPACE).unwrap();
        store.set("prefixes", vec!["!", ""]).unwrap();

        assert_eq!(load_prefixes(&mut store).unwrap(), vec!["!"]);
    }
}
