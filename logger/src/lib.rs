//! Logging utilities of the Avalon client.
use std::{
    fmt::Debug,
    sync::{
        atomic::{AtomicBool, Ordering},
        OnceLock,
    },
};

pub use avalon_config::logger::{Config, Format, Level, UserLayer as UserConfigLayer};
use color_eyre::{eyre::eyre, Report, Result};
use tracing::subscriber::set_global_default;
pub use tracing::{
    debug, debug_span, error, error_span, info, info_span, instrument as log, trace, trace_span,
    warn, warn_span, Instrument,
};
pub use tracing_subscriber::reload::Error as ReloadError;
use tracing_subscriber::{
    filter::LevelFilter,
    layer::{Layered, SubscriberExt},
    registry::Registry,
    reload,
};

type LevelFiltered = Layered<reload::Layer<LevelFilter, Registry>, Registry>;

static LOGGER_SET: AtomicBool = AtomicBool::new(false);

fn try_set_logger() -> Result<()> {
    if LOGGER_SET
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        return Err(eyre!("Logger is already set."));
    }
    Ok(())
}

/// Handle to the installed global logger.
#[derive(Clone)]
pub struct LoggerHandle {
    level: reload::Handle<LevelFilter, Registry>,
}

impl Debug for LoggerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoggerHandle").finish_non_exhaustive()
    }
}

impl LoggerHandle {
    /// Reload the log level filter.
    ///
    /// # Errors
    /// If the subscriber behind the handle is gone.
    pub fn reload_level(&self, new_value: Level) -> Result<(), ReloadError> {
        let level: tracing::Level = new_value.into();
        self.level.reload(LevelFilter::from_level(level))
    }
}

/// Initializes the logger globally with given [`Config`].
///
/// Works only once per process, all subsequent invocations will fail.
///
/// For usage in tests consider [`test_logger`].
///
/// # Errors
/// If the logger is already set, raises a generic error.
pub fn init_global(configuration: &Config, terminal_colors: bool) -> Result<LoggerHandle> {
    try_set_logger()?;

    let layer = tracing_subscriber::fmt::layer()
        .with_ansi(terminal_colors)
        .with_writer(std::io::stderr);

    match configuration.format {
        Format::Full => step2(configuration, layer),
        Format::Compact => step2(configuration, layer.compact()),
        Format::Pretty => step2(configuration, layer.pretty()),
        Format::Json => step2(configuration, layer.json()),
    }
}

/// Returns once lazily initialised global logger for testing purposes.
///
/// # Panics
/// If [`init_global`] or [`disable_global`] were called first.
pub fn test_logger() -> LoggerHandle {
    static LOGGER: OnceLock<LoggerHandle> = OnceLock::new();

    LOGGER
        .get_or_init(|| {
            let config = UserConfigLayer {
                level: Some(Level::Debug),
                format: Some(Format::Pretty),
            }
            .complete();

            init_global(&config, true).expect(
                "`init_global()` or `disable_global()` should not be called before `test_logger()`",
            )
        })
        .clone()
}

/// Disables the logger globally, so that subsequent calls to [`init_global`] will fail.
///
/// # Errors
/// If global logger was already initialised/disabled.
pub fn disable_global() -> Result<()> {
    try_set_logger()
}

fn step2<L>(configuration: &Config, layer: L) -> Result<LoggerHandle>
where
    L: tracing_subscriber::Layer<LevelFiltered> + Send + Sync + 'static,
{
    let level: tracing::Level = configuration.level.into();
    let (level_filter, level_handle) = reload::Layer::new(LevelFilter::from_level(level));
    let subscriber = Registry::default()
        .with(level_filter)
        .with(layer)
        .with(tracing_error::ErrorLayer::default());
    set_global_default(subscriber)?;

    Ok(LoggerHandle {
        level: level_handle,
    })
}

/// Installs the panic hook with [`color_eyre::install`] if it isn't installed yet
///
/// # Errors
/// Fails if [`color_eyre::install`] fails
pub fn install_panic_hook() -> Result<(), Report> {
    static INSTALLED: AtomicBool = AtomicBool::new(false);
    if INSTALLED
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_ok()
    {
        color_eyre::install()
    } else {
        Ok(())
    }
}

pub mod prelude {
    //! Module with most used items. Needs to be imported when using `log` macro to avoid `tracing` crate dependency

    pub use tracing::{self, debug, error, info, instrument as log, span, trace, warn, Span};
}
