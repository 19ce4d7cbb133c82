//! Terminal logger configuration for the demo binary.
use std::sync::Mutex;

use slog::o;
use slog::Drain;
use slog::IgnoreResult;
use slog::Logger;
use slog::OwnedKVList;
use slog::Record;
use slog_term::FullFormat;
use slog_term::TermDecorator;

/// Verbosity levels exposed on the command line.
#[derive(clap::ValueEnum, Clone, Default, Eq, PartialEq, Debug)]
pub enum LogLevel {
    Critical,
    Error,
    Warning,
    #[default]
    Info,
    Debug,
}

impl From<LogLevel> for slog::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Critical => slog::Level::Critical,
            LogLevel::Error => slog::Level::Error,
            LogLevel::Warning => slog::Level::Warning,
            LogLevel::Info => slog::Level::Info,
            LogLevel::Debug => slog::Level::Debug,
        }
    }
}

/// Same trick `repliadm` uses: `LevelFilter::Ok` is `()` rather than `Option<()>`, so the
/// filtered drain can still be the root of a [`Logger`].
struct LevelFilter<D: Drain>(D, slog::Level);

impl<D: Drain> Drain for LevelFilter<D> {
    type Ok = ();
    type Err = D::Err;

    fn log(&self, record: &Record, logger_values: &OwnedKVList) -> Result<Self::Ok, Self::Err> {
        if record.level().is_at_least(self.1) {
            self.0.log(record, logger_values)?;
        }
        Ok(())
    }
}

pub fn configure(level: LogLevel) -> Logger {
    let decorator = TermDecorator::new().stdout().build();
    let drain = FullFormat::new(decorator).build();
    let drain = Mutex::new(drain).map(IgnoreResult::new);
    let drain = LevelFilter(drain, level.into());
    Logger::root(drain, o!())
}
