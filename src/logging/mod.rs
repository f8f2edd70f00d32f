use serde::{Deserialize, Serialize};

pub(super) mod background_log;
pub(super) mod multilog;

/// One line of the background log.
#[derive(Debug, Serialize, Deserialize)]
struct LogEntry {
    level: Level,
    target: String,
    message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    location: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Copy, Clone, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
enum Level {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<log::Level> for Level {
    fn from(value: log::Level) -> Self {
        match value {
            log::Level::Error => Level::Error,
            log::Level::Warn => Level::Warn,
            log::Level::Info => Level::Info,
            log::Level::Debug => Level::Debug,
            log::Level::Trace => Level::Trace,
        }
    }
}

impl From<&log::Record<'_>> for LogEntry {
    fn from(record: &log::Record) -> Self {
        Self {
            level: record.level().into(),
            target: record.target().to_string(),
            message: record.args().to_string(),
            location: record
                .file()
                .map(|file| match record.line() {
                    Some(line) => format!("{file}:{line}"),
                    None => file.to_string(),
                }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_entry() {
        let entry = LogEntry::from(
            &log::Record::builder()
                .args(format_args!("Regenerating the GRUB configuration"))
                .level(log::Level::Info)
                .target("grubstate::engine::context")
                .file(Some("src/engine/context.rs"))
                .line(Some(7))
                .build(),
        );

        assert_eq!(entry.level, Level::Info);
        assert_eq!(entry.message, "Regenerating the GRUB configuration");
        assert_eq!(entry.target, "grubstate::engine::context");
        assert_eq!(entry.location.as_deref(), Some("src/engine/context.rs:7"));
    }

    #[test]
    fn test_serialization() {
        let entry = LogEntry::from(
            &log::Record::builder()
                .args(format_args!("grub_user[root]: created"))
                .level(log::Level::Warn)
                .target("grubstate")
                .build(),
        );
        assert_eq!(
            serde_json::to_string(&entry).unwrap(),
            r#"{"level":"warn","target":"grubstate","message":"grub_user[root]: created"}"#
        );
    }
}
