use std::{
    fs::{File, OpenOptions},
    io::Write,
    path::Path,
    sync::Mutex,
};

use anyhow::{Context, Error};
use log::{LevelFilter, Log, Record};

use osutils::files;

use super::LogEntry;

/// Appends every record as one JSON line to a log file, so that the history
/// of several runs can be inspected after the fact.
pub struct BackgroundLog {
    target: Mutex<File>,
    max_level: LevelFilter,
}

impl BackgroundLog {
    pub fn open(target: impl AsRef<Path>) -> Result<Self, Error> {
        let target = target.as_ref();
        if let Some(parent) = target.parent() {
            files::create_dirs(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(target)
            .with_context(|| format!("Failed to open log file '{}'", target.display()))?;

        Ok(Self {
            target: Mutex::new(file),
            max_level: LevelFilter::Trace,
        })
    }

    pub fn with_max_level(self, max_level: LevelFilter) -> Self {
        Self { max_level, ..self }
    }

    pub fn into_logger(self) -> Box<dyn Log> {
        Box::new(self)
    }

    fn write_entry(&self, record: &Record) -> Result<(), Box<dyn std::error::Error + '_>> {
        let mut serialized = serde_json::to_string(&LogEntry::from(record))?;
        serialized.push('\n');

        let mut file = self.target.lock()?;
        file.write_all(serialized.as_bytes())?;
        Ok(())
    }
}

impl Log for BackgroundLog {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= self.max_level
    }

    fn log(&self, record: &Record) {
        // Losing a line is preferable to failing the run
        let _ = self.write_entry(record);
    }

    fn flush(&self) {
        if let Ok(mut file) = self.target.lock() {
            let _ = file.flush();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use log::Level;
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn test_filter() {
        let dir = tempdir().unwrap();
        let logger = BackgroundLog::open(dir.path().join("run.log"))
            .unwrap()
            .with_max_level(LevelFilter::Info)
            .into_logger();

        assert!(logger.enabled(&log::Metadata::builder().level(Level::Info).build()));
        assert!(!logger.enabled(&log::Metadata::builder().level(Level::Debug).build()));
    }

    #[test]
    fn test_open_fails_on_directory() {
        let dir = tempdir().unwrap();
        let error = BackgroundLog::open(dir.path()).err().unwrap();
        assert!(error.to_string().starts_with("Failed to open log file"));
    }

    #[test]
    fn test_appends_entries() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("logs/run.log");
        files::write_file(&target, 0o600, b"{\"previous\":\"run\"}\n").unwrap();

        let logger = BackgroundLog::open(&target).unwrap().into_logger();
        logger.log(
            &log::Record::builder()
                .args(format_args!("grub_config[GRUB_TIMEOUT]: created"))
                .level(Level::Info)
                .target("grubstate::engine")
                .file(Some("src/engine/mod.rs"))
                .line(Some(42))
                .build(),
        );
        logger.flush();

        let content = fs::read_to_string(target).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], "{\"previous\":\"run\"}");

        let entry: LogEntry = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(entry.level, Level::Info.into());
        assert_eq!(entry.message, "grub_config[GRUB_TIMEOUT]: created");
        assert_eq!(entry.target, "grubstate::engine");
        assert_eq!(entry.location.as_deref(), Some("src/engine/mod.rs:42"));
    }
}
