//! Logging setup: coloured console output plus an optional JSON log file.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

use crate::config::LogSettings;

/// Library targets held at a quieter level unless debug logging is on.
const NOISY_TARGETS: [(&str, &str); 6] = [
    ("grammers_mtsender", "info"),
    ("grammers_session", "info"),
    ("grammers_client", "info"),
    ("hyper", "warn"),
    ("hyper_util", "warn"),
    ("reqwest", "warn"),
];

/// Initializes the logging subsystem.
///
/// `RUST_LOG` takes precedence over the configured level when set.
pub fn init(settings: &LogSettings) -> std::io::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directives(settings)));

    let file_layer = match &settings.file {
        Some(path) => {
            let file = RotatingFile::open(path, settings.max_bytes, settings.backups)?;
            Some(
                fmt::layer()
                    .json()
                    .with_ansi(false)
                    .with_current_span(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_ansi(settings.color).with_target(true))
        .with(file_layer)
        .init();

    info!(
        "logging initialized (level={}, file={})",
        settings.level,
        settings
            .file
            .as_deref()
            .map_or_else(|| "disabled".to_owned(), |p| p.display().to_string())
    );

    Ok(())
}

/// Builds the default filter directives for the configured level.
fn filter_directives(settings: &LogSettings) -> String {
    let mut directives = vec![settings.level.clone()];
    if !settings.debug {
        directives.extend(
            NOISY_TARGETS
                .iter()
                .map(|(target, level)| format!("{target}={level}")),
        );
    }
    directives.join(",")
}

fn open_append(path: &Path) -> std::io::Result<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

/// Append-only log file that rotates once a write would take it past
/// `max_bytes`.
///
/// A `max_bytes` of zero disables rotation.
#[derive(Debug)]
struct RotatingFile {
    path: PathBuf,
    max_bytes: u64,
    backups: usize,
    file: File,
    size: u64,
}

impl RotatingFile {
    fn open(path: &Path, max_bytes: u64, backups: usize) -> std::io::Result<Self> {
        let file = open_append(path)?;
        let size = file.metadata()?.len();
        Ok(Self {
            path: path.to_path_buf(),
            max_bytes,
            backups,
            file,
            size,
        })
    }

    fn should_rotate(&self, incoming: usize) -> bool {
        self.max_bytes > 0 && self.size > 0 && self.size + incoming as u64 > self.max_bytes
    }

    fn rotate(&mut self) -> std::io::Result<()> {
        self.file.flush()?;
        rotate(&self.path, self.backups)?;
        self.file = open_append(&self.path)?;
        self.size = 0;
        Ok(())
    }
}

impl Write for RotatingFile {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if self.should_rotate(buf.len()) {
            self.rotate()?;
        }
        let written = self.file.write(buf)?;
        self.size += written as u64;
        Ok(written)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.file.flush()
    }
}

/// Moves `path` out of the way.
///
/// `bot.log` becomes `bot.log.1`, `bot.log.1` becomes `bot.log.2` and so
/// on; anything past `backups` is dropped. With zero backups the file is
/// simply removed.
fn rotate(path: &Path, backups: usize) -> std::io::Result<()> {
    if !path.exists() {
        return Ok(());
    }

    if backups == 0 {
        return std::fs::remove_file(path);
    }

    let oldest = backup_path(path, backups);
    if oldest.exists() {
        std::fs::remove_file(&oldest)?;
    }

    for n in (1..backups).rev() {
        let from = backup_path(path, n);
        if from.exists() {
            std::fs::rename(&from, backup_path(path, n + 1))?;
        }
    }

    std::fs::rename(path, backup_path(path, 1))
}

fn backup_path(path: &Path, n: usize) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(format!(".{n}"));
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_directives_quiet_libraries() {
        let settings = LogSettings::default();
        let directives = filter_directives(&settings);
        assert!(directives.starts_with("info,"));
        assert!(directives.contains("grammers_mtsender=info"));
        assert!(directives.contains("reqwest=warn"));
    }

    #[test]
    fn test_filter_directives_debug_is_unfiltered() {
        let settings = LogSettings {
            level: "debug".to_owned(),
            debug: true,
            ..LogSettings::default()
        };
        assert_eq!(filter_directives(&settings), "debug");
    }

    #[test]
    fn test_small_writes_stay_in_one_file() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("bot.log");
        let mut file = RotatingFile::open(&log, 1024, 3).unwrap();

        file.write_all(b"short\n").unwrap();
        file.write_all(b"lines\n").unwrap();

        assert_eq!(std::fs::read_to_string(&log).unwrap(), "short\nlines\n");
        assert!(!backup_path(&log, 1).exists());
    }

    #[test]
    fn test_write_past_max_bytes_rotates() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("bot.log");
        let mut file = RotatingFile::open(&log, 16, 2).unwrap();

        file.write_all(b"first line 0001\n").unwrap();
        file.write_all(b"second line 002\n").unwrap();
        file.write_all(b"third line 0003\n").unwrap();
        file.write_all(b"fourth line 004\n").unwrap();
        file.flush().unwrap();

        assert_eq!(std::fs::read_to_string(&log).unwrap(), "fourth line 004\n");
        assert_eq!(
            std::fs::read_to_string(backup_path(&log, 1)).unwrap(),
            "third line 0003\n"
        );
        assert_eq!(
            std::fs::read_to_string(backup_path(&log, 2)).unwrap(),
            "second line 002\n"
        );
        assert!(!backup_path(&log, 3).exists());
    }

    #[test]
    fn test_existing_large_file_rotates_on_first_write() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("bot.log");
        std::fs::write(&log, "left over from last run\n").unwrap();

        let mut file = RotatingFile::open(&log, 16, 1).unwrap();
        file.write_all(b"new run\n").unwrap();

        assert_eq!(std::fs::read_to_string(&log).unwrap(), "new run\n");
        assert_eq!(
            std::fs::read_to_string(backup_path(&log, 1)).unwrap(),
            "left over from last run\n"
        );
    }

    #[test]
    fn test_zero_max_bytes_never_rotates() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("bot.log");
        let mut file = RotatingFile::open(&log, 0, 3).unwrap();

        for _ in 0..100 {
            file.write_all(b"0123456789\n").unwrap();
        }
        assert_eq!(std::fs::metadata(&log).unwrap().len(), 1100);
        assert!(!backup_path(&log, 1).exists());
    }

    #[test]
    fn test_rotate_shifts_backups() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("bot.log");
        std::fs::write(&log, "current log").unwrap();
        std::fs::write(backup_path(&log, 1), "first").unwrap();
        std::fs::write(backup_path(&log, 2), "second").unwrap();

        rotate(&log, 2).unwrap();

        assert!(!log.exists());
        assert_eq!(
            std::fs::read_to_string(backup_path(&log, 1)).unwrap(),
            "current log"
        );
        assert_eq!(std::fs::read_to_string(backup_path(&log, 2)).unwrap(), "first");
        assert!(!backup_path(&log, 3).exists());
    }

    #[test]
    fn test_rotate_without_backups_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("bot.log");
        std::fs::write(&log, "0123456789").unwrap();

        rotate(&log, 0).unwrap();
        assert!(!log.exists());
    }

    #[test]
    fn test_backup_path() {
        assert_eq!(
            backup_path(Path::new("logs/bot.log"), 2),
            PathBuf::from("logs/bot.log.2")
        );
    }
}
