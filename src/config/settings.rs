//! Application settings and Telegram configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Telegram API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    /// Telegram API ID (obtain from <https://my.telegram.org>).
    pub api_id: i32,

    /// Telegram API hash (obtain from <https://my.telegram.org>).
    pub api_hash: String,

    /// Path to the session file.
    #[serde(default = "default_session_path")]
    pub session_path: PathBuf,
}

fn default_session_path() -> PathBuf {
    PathBuf::from("hbot.session")
}

impl TelegramConfig {
    /// Creates a new Telegram configuration.
    #[must_use]
    pub fn new(api_id: i32, api_hash: String) -> Self {
        Self {
            api_id,
            api_hash,
            session_path: default_session_path(),
        }
    }

    /// Creates configuration from environment variables.
    ///
    /// Expects `API_ID` and `API_HASH` to be set. `TG_API_ID` and
    /// `TG_API_HASH` are accepted as fallbacks.
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_id: i32 = env_any(&["API_ID", "TG_API_ID"])
            .ok_or(ConfigError::MissingEnvVar("API_ID"))?
            .trim()
            .parse()
            .ok()
            .filter(|id| *id > 0)
            .ok_or(ConfigError::InvalidApiId)?;

        let api_hash =
            env_any(&["API_HASH", "TG_API_HASH"]).ok_or(ConfigError::MissingEnvVar("API_HASH"))?;

        let session_path =
            std::env::var("HBOT_SESSION").map_or_else(|_| default_session_path(), PathBuf::from);

        Ok(Self {
            api_id,
            api_hash,
            session_path,
        })
    }
}

/// Bot-wide settings shared with every plugin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotSettings {
    /// Directory holding the persist store files.
    pub persist_dir: PathBuf,

    /// Plugin ids that the loader must skip.
    #[serde(default)]
    pub disabled_plugins: Vec<String>,

    /// Logging configuration (also used by `getlog`).
    #[serde(default)]
    pub log: LogSettings,
}

impl BotSettings {
    /// Creates bot settings from environment variables with defaults.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            persist_dir: std::env::var("HBOT_PERSIST_DIR")
                .map_or_else(|_| PathBuf::from("persist"), PathBuf::from),
            disabled_plugins: std::env::var("HBOT_DISABLED_PLUGINS")
                .map(|raw| parse_list(&raw))
                .unwrap_or_default(),
            log: LogSettings::from_env(),
        }
    }

    /// Checks that the persist directory exists.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.persist_dir.is_dir() {
            Ok(())
        } else {
            Err(ConfigError::MissingPersistDir(self.persist_dir.clone()))
        }
    }

    /// Returns whether the loader should skip the given plugin.
    #[must_use]
    pub fn is_disabled(&self, plugin_id: &str) -> bool {
        self.disabled_plugins.iter().any(|id| id == plugin_id)
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    /// Filter level (trace, debug, info, warn, error).
    pub level: String,

    /// Whether debug logging was requested through `TGBOT_DEBUG`.
    pub debug: bool,

    /// Log file path, `None` when file logging is disabled.
    pub file: Option<PathBuf>,

    /// Size above which the log file is rotated at startup.
    pub max_bytes: u64,

    /// Number of rotated files to keep.
    pub backups: usize,

    /// Whether the console output is coloured.
    pub color: bool,
}

const DEFAULT_LOG_MAX_BYTES: u64 = 5 * 1024 * 1024;
const DEFAULT_LOG_BACKUPS: usize = 3;

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            debug: false,
            file: Some(PathBuf::from("bot.log")),
            max_bytes: DEFAULT_LOG_MAX_BYTES,
            backups: DEFAULT_LOG_BACKUPS,
            color: true,
        }
    }
}

impl LogSettings {
    /// Reads logging settings from the `HBOT_LOG_*` variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds settings from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let debug = lookup("TGBOT_DEBUG").is_some_and(|v| is_truthy(&v));

        let level = lookup("HBOT_LOG_LEVEL")
            .map_or_else(
                || if debug { "debug" } else { "info" }.to_owned(),
                |v| v.trim().to_owned(),
            )
            .to_lowercase();

        let file = match lookup("HBOT_LOG_FILE") {
            None => Some(PathBuf::from("bot.log")),
            Some(raw) => {
                let raw = raw.trim();
                if matches!(
                    raw.to_lowercase().as_str(),
                    "" | "0" | "false" | "off" | "none"
                ) {
                    None
                } else {
                    Some(PathBuf::from(raw))
                }
            }
        };

        let max_bytes = lookup("HBOT_LOG_MAX_BYTES")
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(DEFAULT_LOG_MAX_BYTES);

        let backups = lookup("HBOT_LOG_BACKUPS")
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(DEFAULT_LOG_BACKUPS);

        let color = lookup("HBOT_LOG_COLOR").is_none_or(|v| is_truthy(&v))
            && lookup("NO_COLOR").is_none();

        Self {
            level,
            debug,
            file,
            max_bytes,
            backups,
            color,
        }
    }
}

/// Returns the first set variable among `names`.
fn env_any(names: &[&str]) -> Option<String> {
    names.iter().find_map(|name| std::env::var(name).ok())
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "y" | "on"
    )
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0} (API_ID and API_HASH must be exported!)")]
    MissingEnvVar(&'static str),

    #[error("Invalid API ID format (must be a positive integer)")]
    InvalidApiId,

    #[error("Persist directory '{}' does not exist", .0.display())]
    MissingPersistDir(PathBuf),
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_telegram_config_new() {
        let config = TelegramConfig::new(12345, "abc123".to_owned());
        assert_eq!(config.api_id, 12345);
        assert_eq!(config.api_hash, "abc123");
        assert_eq!(config.session_path, PathBuf::from("hbot.session"));
    }

    #[test]
    fn test_log_settings_defaults() {
        let settings = LogSettings::from_lookup(lookup(&[]));
        assert_eq!(settings.level, "info");
        assert_eq!(settings.file, Some(PathBuf::from("bot.log")));
        assert_eq!(settings.max_bytes, 5 * 1024 * 1024);
        assert_eq!(settings.backups, 3);
        assert!(settings.color);
    }

    #[test]
    fn test_log_settings_debug_flag() {
        let settings = LogSettings::from_lookup(lookup(&[("TGBOT_DEBUG", "yes")]));
        assert!(settings.debug);
        assert_eq!(settings.level, "debug");

        let settings = LogSettings::from_lookup(lookup(&[
            ("TGBOT_DEBUG", "1"),
            ("HBOT_LOG_LEVEL", "WARN"),
        ]));
        assert_eq!(settings.level, "warn");
    }

    #[test]
    fn test_log_file_can_be_disabled() {
        for value in ["", "0", "false", "OFF", "none"] {
            let settings = LogSettings::from_lookup(lookup(&[("HBOT_LOG_FILE", value)]));
            assert_eq!(settings.file, None, "value {value:?}");
        }

        let settings = LogSettings::from_lookup(lookup(&[("HBOT_LOG_FILE", " logs/hbot.log ")]));
        assert_eq!(settings.file, Some(PathBuf::from("logs/hbot.log")));
    }

    #[test]
    fn test_log_settings_invalid_numbers_fall_back() {
        let settings = LogSettings::from_lookup(lookup(&[
            ("HBOT_LOG_MAX_BYTES", "lots"),
            ("HBOT_LOG_BACKUPS", "7"),
        ]));
        assert_eq!(settings.max_bytes, 5 * 1024 * 1024);
        assert_eq!(settings.backups, 7);
    }

    #[test]
    fn test_no_color_wins() {
        let settings = LogSettings::from_lookup(lookup(&[
            ("HBOT_LOG_COLOR", "true"),
            ("NO_COLOR", ""),
        ]));
        assert!(!settings.color);

        let settings = LogSettings::from_lookup(lookup(&[("HBOT_LOG_COLOR", "off")]));
        assert!(!settings.color);
    }

    #[test]
    fn test_parse_list() {
        assert_eq!(parse_list(" gemini, ,solat "), vec!["gemini", "solat"]);
        assert!(parse_list("").is_empty());
    }

    #[test]
    fn test_persist_dir_validation() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = BotSettings {
            persist_dir: dir.path().to_path_buf(),
            disabled_plugins: vec!["gemini".to_owned()],
            log: LogSettings::default(),
        };
        assert!(settings.validate().is_ok());
        assert!(settings.is_disabled("gemini"));
        assert!(!settings.is_disabled("ping"));

        settings.persist_dir = dir.path().join("missing");
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::MissingPersistDir(_))
        ));
    }
}
