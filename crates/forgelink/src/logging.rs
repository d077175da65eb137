use clap::ValueEnum;
use tracing::level_filters::LevelFilter;

/// Shape of the CLI's own diagnostics on stderr.
#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

/// Minimum level for the CLI's own diagnostics. Engine log lines are
/// output, not diagnostics, and are never filtered by this.
#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum LogFilter {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogFilter> for LevelFilter {
    fn from(filter: LogFilter) -> Self {
        match filter {
            LogFilter::Off => LevelFilter::OFF,
            LogFilter::Error => LevelFilter::ERROR,
            LogFilter::Warn => LevelFilter::WARN,
            LogFilter::Info => LevelFilter::INFO,
            LogFilter::Debug => LevelFilter::DEBUG,
            LogFilter::Trace => LevelFilter::TRACE,
        }
    }
}

pub fn init_logging(format: LogFormat, filter: LogFilter) {
    let subscriber = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(LevelFilter::from(filter))
        .with_ansi(false)
        .with_target(false);

    // A second init (tests) keeps the first subscriber.
    let _ = match format {
        LogFormat::Text => subscriber.compact().try_init(),
        LogFormat::Json => subscriber.json().flatten_event(true).try_init(),
    };
}
