//! Switchable global logger.
//!
//! The `log` facade allows a single logger per process. [`LOGGER_SWITCHER`] is that
//! logger and delegates to a replaceable inner one, so env_logger can be used at
//! start and DAP output once a client is connected.

use log::{LevelFilter, Log, Metadata, Record};
use once_cell::sync::Lazy;
use std::sync::{Once, RwLock};

pub static LOGGER_SWITCHER: Lazy<LoggerSwitcher> = Lazy::new(LoggerSwitcher::new);

pub struct LoggerSwitcher {
    inner: RwLock<Option<Box<dyn Log>>>,
    install: Once,
}

impl LoggerSwitcher {
    fn new() -> Self {
        Self {
            inner: RwLock::new(None),
            install: Once::new(),
        }
    }

    /// Replace the active logger.
    pub fn switch(&'static self, logger: impl Log + 'static, filter: LevelFilter) {
        self.install.call_once(|| {
            if log::set_logger(self).is_err() {
                eprintln!("another global logger is already installed");
            }
        });

        *self.inner.write().unwrap() = Some(Box::new(logger));
        log::set_max_level(filter);
    }

    /// Drop the active logger, records are discarded until the next switch.
    pub fn reset(&self) {
        *self.inner.write().unwrap() = None;
    }
}

impl Log for LoggerSwitcher {
    fn enabled(&self, metadata: &Metadata) -> bool {
        self.inner
            .read()
            .unwrap()
            .as_ref()
            .map(|l| l.enabled(metadata))
            .unwrap_or_default()
    }

    fn log(&self, record: &Record) {
        if let Some(logger) = self.inner.read().unwrap().as_ref() {
            logger.log(record)
        }
    }

    fn flush(&self) {
        if let Some(logger) = self.inner.read().unwrap().as_ref() {
            logger.flush()
        }
    }
}

/// Install env_logger configured from `RUST_LOG`.
pub fn init() {
    let logger = env_logger::Logger::from_default_env();
    let filter = logger.filter();
    LOGGER_SWITCHER.switch(logger, filter);
}
