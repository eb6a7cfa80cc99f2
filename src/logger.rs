use eyre::{Result, WrapErr};
use slog::{Drain, Level, Never, o};
use slog_term::{CompactFormat, FullFormat, PlainSyncDecorator, TermDecorator};
use std::fs::OpenOptions;
use std::io;
use std::path::Path;
use std::sync::Mutex;
use time::OffsetDateTime;

use crate::helpers::datetime::Timezone;

type BoxedDrain = Box<dyn Drain<Ok = (), Err = Never> + Send>;

/// Owns the root `slog::Logger`, components receive children of it
pub struct Logger {
    pub log_level: u8,
    logger: slog::Logger,
}

fn timestamp_local(w: &mut dyn io::Write) -> io::Result<()> {
    write!(
        w,
        "{}",
        OffsetDateTime::now_utc()
            .to_localtime()
            .to_formatted_string()
    )
}

pub fn level_from_u8(log_level: u8) -> Level {
    match log_level {
        0 => Level::Critical,
        1 => Level::Error,
        2 => Level::Warning,
        3 => Level::Info,
        4 => Level::Debug,
        5 => Level::Trace,
        // Default to debug
        _ => Level::Debug,
    }
}

fn term_drain(level: Level) -> BoxedDrain {
    let decorator = TermDecorator::new().build();
    let drain = CompactFormat::new(decorator)
        .use_custom_timestamp(timestamp_local)
        .build()
        .filter_level(level)
        .fuse();
    Box::new(drain)
}

fn file_drain(level: Level, path: &Path) -> Result<BoxedDrain> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .wrap_err_with(|| format!("Cannot open log file {:?}", path))?;
    let decorator = PlainSyncDecorator::new(file);
    let drain = FullFormat::new(decorator)
        .use_custom_timestamp(timestamp_local)
        .build()
        .filter_level(level)
        .fuse();
    Ok(Box::new(drain))
}

impl Logger {
    pub fn new(log_level: u8, log_file: Option<&Path>) -> Result<Self> {
        let level = level_from_u8(log_level);
        let drain: BoxedDrain = match log_file {
            Some(path) => Box::new(
                slog::Duplicate::new(term_drain(level), file_drain(level, path)?).ignore_res(),
            ),
            None => term_drain(level),
        };
        let logger = slog::Logger::root(
            Mutex::new(drain).fuse(),
            o!("version" => env!("CARGO_PKG_VERSION")),
        );
        Ok(Logger { log_level, logger })
    }

    /// Child logger to inject into a component
    pub fn component(&self, name: &'static str) -> slog::Logger {
        self.logger.new(o!("component" => name))
    }

    /// Route records emitted through the `log` facade (alloy, reqwest, ...)
    /// into our drain, our own components never use the global logger
    pub fn bridge_log_crate(&self) -> Result<&Self> {
        let guard = slog_scope::set_global_logger(self.logger.clone());
        // https://github.com/slog-rs/slog/issues/249
        guard.cancel_reset();
        slog_stdlog::init_with_level(log_level_filter(self.log_level))
            .map_err(|e| eyre::eyre!("log bridge init failed: {}", e))?;
        Ok(self)
    }
}

fn log_level_filter(log_level: u8) -> log::Level {
    use log::Level as L;
    match level_from_u8(log_level) {
        Level::Critical | Level::Error => L::Error,
        Level::Warning => L::Warn,
        Level::Info => L::Info,
        Level::Debug => L::Debug,
        Level::Trace => L::Trace,
    }
}
