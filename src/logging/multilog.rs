use std::collections::BTreeMap;

use log::{LevelFilter, Log, Metadata, Record};

/// Fans every record out to a set of loggers.
///
/// Records pass a global level first, then the most specific per-target
/// filter, then each logger's own `enabled` check.
pub struct MultiLogger {
    loggers: Vec<Box<dyn Log>>,
    max_level: LevelFilter,
    target_filters: BTreeMap<String, LevelFilter>,
}

impl Default for MultiLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl MultiLogger {
    pub fn new() -> Self {
        Self {
            loggers: Vec::new(),
            max_level: LevelFilter::Trace,
            target_filters: BTreeMap::new(),
        }
    }

    pub fn with_logger(mut self, logger: Box<dyn Log>) -> Self {
        self.loggers.push(logger);
        self
    }

    pub fn with_max_level(mut self, max_level: LevelFilter) -> Self {
        self.max_level = max_level;
        self
    }

    /// Caps the records of `target` and its submodules at `level`.
    pub fn with_target_filter(mut self, target: impl Into<String>, level: LevelFilter) -> Self {
        self.target_filters.insert(target.into(), level);
        self
    }

    pub fn add_logger(&mut self, logger: Box<dyn Log>) {
        self.loggers.push(logger);
    }

    pub fn init(self) -> Result<(), log::SetLoggerError> {
        log::set_max_level(self.max_level);
        log::set_boxed_logger(Box::new(self))
    }

    fn passes(&self, metadata: &Metadata) -> bool {
        if metadata.level() > self.max_level {
            return false;
        }

        let target = metadata.target();
        self.target_filters
            .iter()
            .filter(|(prefix, _)| {
                target == prefix.as_str()
                    || target
                        .strip_prefix(prefix.as_str())
                        .is_some_and(|rest| rest.starts_with("::"))
            })
            .max_by_key(|(prefix, _)| prefix.len())
            .map_or(true, |(_, level)| metadata.level() <= *level)
    }
}

impl Log for MultiLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        self.passes(metadata) && self.loggers.iter().any(|l| l.enabled(metadata))
    }

    fn log(&self, record: &Record) {
        if !self.passes(record.metadata()) {
            return;
        }
        self.loggers
            .iter()
            .filter(|l| l.enabled(record.metadata()))
            .for_each(|l| l.log(record));
    }

    fn flush(&self) {
        self.loggers.iter().for_each(|l| l.flush());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use log::Level;

    #[derive(Default)]
    struct CountingLogger {
        enabled: bool,
        records: Arc<AtomicUsize>,
    }

    impl Log for CountingLogger {
        fn enabled(&self, _: &Metadata) -> bool {
            self.enabled
        }

        fn log(&self, _: &Record) {
            self.records.fetch_add(1, Ordering::Relaxed);
        }

        fn flush(&self) {}
    }

    fn record(level: Level, target: &str, f: impl FnOnce(&Record)) {
        f(&Record::builder()
            .args(format_args!("message"))
            .level(level)
            .target(target)
            .build())
    }

    #[test]
    fn test_enabled() {
        let logger = MultiLogger::new()
            .with_logger(Box::new(CountingLogger::default()))
            .with_logger(Box::new(CountingLogger::default()));
        assert!(!logger.enabled(&Metadata::builder().level(Level::Error).build()));

        let logger = MultiLogger::new()
            .with_logger(Box::new(CountingLogger::default()))
            .with_logger(Box::new(CountingLogger {
                enabled: true,
                ..Default::default()
            }));
        assert!(logger.enabled(&Metadata::builder().level(Level::Error).build()));
    }

    #[test]
    fn test_fan_out() {
        let enabled = CountingLogger {
            enabled: true,
            ..Default::default()
        };
        let enabled_count = enabled.records.clone();
        let disabled = CountingLogger::default();
        let disabled_count = disabled.records.clone();

        let logger = MultiLogger::new()
            .with_logger(Box::new(enabled))
            .with_logger(Box::new(disabled));

        record(Level::Info, "grubstate", |r| logger.log(r));
        assert_eq!(enabled_count.load(Ordering::Relaxed), 1);
        assert_eq!(disabled_count.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_max_level() {
        let inner = CountingLogger {
            enabled: true,
            ..Default::default()
        };
        let count = inner.records.clone();
        let logger = MultiLogger::new()
            .with_logger(Box::new(inner))
            .with_max_level(LevelFilter::Info);

        record(Level::Debug, "grubstate", |r| logger.log(r));
        assert_eq!(count.load(Ordering::Relaxed), 0);
        record(Level::Warn, "grubstate", |r| logger.log(r));
        assert_eq!(count.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_target_filter() {
        let inner = CountingLogger {
            enabled: true,
            ..Default::default()
        };
        let count = inner.records.clone();
        let logger = MultiLogger::new()
            .with_logger(Box::new(inner))
            .with_target_filter("osutils", LevelFilter::Warn)
            .with_target_filter("osutils::grubby", LevelFilter::Trace);

        record(Level::Debug, "osutils::exe", |r| logger.log(r));
        assert_eq!(count.load(Ordering::Relaxed), 0, "capped by 'osutils'");

        record(Level::Debug, "osutils::grubby", |r| logger.log(r));
        assert_eq!(count.load(Ordering::Relaxed), 1, "most specific filter wins");

        record(Level::Debug, "osutilsx", |r| logger.log(r));
        assert_eq!(count.load(Ordering::Relaxed), 2, "prefix must end on a module");
    }
}
