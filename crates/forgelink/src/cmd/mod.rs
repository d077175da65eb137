use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Subcommand, ValueEnum};
use forgelink_engine::{default_settings_path, EditorSettings, DEFAULT_CHANNEL};
use forgelink_frame::Framing;
use tokio_util::sync::CancellationToken;

use crate::exit::{settings_error, CliError, CliResult, INTERNAL, USAGE};
use crate::output::OutputFormat;

pub mod attach;
pub mod kill;
pub mod run;
pub mod status;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Launch the engine, connect to its pipe and stream its log.
    Run(RunArgs),
    /// Connect to an already running engine and stream its log.
    Attach(AttachArgs),
    /// Kill leftover engine processes.
    Kill(KillArgs),
    /// Report whether an engine instance is running.
    Status(StatusArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Run(args) => run::run(args, format),
        Command::Attach(args) => attach::run(args, format),
        Command::Kill(args) => kill::run(args, format),
        Command::Status(args) => status::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Clone, Copy, Debug, Default, ValueEnum)]
pub enum FramingArg {
    /// One message per pipe write: `[kind][level][text]`.
    #[default]
    Chunked,
    /// Each message preceded by a little-endian u32 length.
    LengthPrefixed,
}

impl From<FramingArg> for Framing {
    fn from(value: FramingArg) -> Self {
        match value {
            FramingArg::Chunked => Framing::Chunked,
            FramingArg::LengthPrefixed => Framing::LengthPrefixed,
        }
    }
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Engine executable. Defaults to the path in the editor settings file.
    #[arg(env = "FORGELINK_ENGINE")]
    pub exe: Option<PathBuf>,
    /// Editor settings file to read the engine path from.
    #[arg(long, value_name = "FILE")]
    pub settings: Option<PathBuf>,
    /// Pipe channel passed to the engine as `--pipe <channel>`.
    #[arg(long, env = "FORGELINK_CHANNEL", default_value = DEFAULT_CHANNEL)]
    pub channel: String,
    /// Delay between spawn and the first connect attempt (e.g. 1s, 250ms, 0).
    #[arg(long, default_value = "1s")]
    pub grace: String,
    /// Give up connecting after this long (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub connect_timeout: String,
    /// Wire framing the engine writes.
    #[arg(long, value_enum, default_value_t = FramingArg::Chunked)]
    pub framing: FramingArg,
    /// Leave processes with the engine's name alone before launching.
    #[arg(long)]
    pub no_kill_stale: bool,
    /// Do not pass the engine's stdout/stderr through.
    #[arg(long)]
    pub quiet_engine: bool,
    /// Stop the engine after printing N engine log lines.
    #[arg(long)]
    pub count: Option<usize>,
    /// Extra arguments appended after `--pipe <channel>`.
    #[arg(last = true)]
    pub engine_args: Vec<String>,
}

#[derive(Args, Debug)]
pub struct AttachArgs {
    /// Pipe channel the engine was launched with.
    #[arg(long, env = "FORGELINK_CHANNEL", default_value = DEFAULT_CHANNEL)]
    pub channel: String,
    /// Connection timeout (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
    /// Name used to tag engine lines.
    #[arg(long, default_value = "engine")]
    pub name: String,
    /// Wire framing the engine writes.
    #[arg(long, value_enum, default_value_t = FramingArg::Chunked)]
    pub framing: FramingArg,
    /// Exit after receiving N log lines.
    #[arg(long)]
    pub count: Option<usize>,
}

#[derive(Args, Debug)]
pub struct KillArgs {
    /// Engine executable whose running instances should be killed.
    #[arg(env = "FORGELINK_ENGINE")]
    pub exe: PathBuf,
    /// List matching processes without killing them.
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Engine executable to look for.
    #[arg(env = "FORGELINK_ENGINE")]
    pub exe: PathBuf,
    /// Pipe channel the engine would have been launched with.
    #[arg(long, env = "FORGELINK_CHANNEL", default_value = DEFAULT_CHANNEL)]
    pub channel: String,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// Resolve the engine path from the argument or, failing that, the editor
/// settings file.
pub(crate) fn resolve_engine(exe: Option<PathBuf>, settings: Option<PathBuf>) -> CliResult<PathBuf> {
    if let Some(exe) = exe {
        return Ok(exe);
    }

    let path = settings.or_else(default_settings_path).ok_or_else(|| {
        CliError::new(
            USAGE,
            "no engine path given and no editor settings location is known",
        )
    })?;
    let settings = EditorSettings::load_or_create(&path)
        .map_err(|err| settings_error("settings load failed", err))?;

    settings.engine_path().ok_or_else(|| {
        CliError::new(
            USAGE,
            format!(
                "no engine path given and EngineHostExePath is empty in {}",
                path.display()
            ),
        )
    })
}

pub(crate) fn parse_duration(input: &str) -> CliResult<Duration> {
    let value = parse_delay(input)?;
    if value.is_zero() {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }
    Ok(value)
}

/// Like [`parse_duration`] but accepts zero.
pub(crate) fn parse_delay(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        _ => Err(CliError::new(
            USAGE,
            format!("unsupported duration unit: {unit}"),
        )),
    }
}

pub(crate) fn block_on<F: Future>(future: F) -> CliResult<F::Output> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .map_err(|err| CliError::new(INTERNAL, format!("runtime setup failed: {err}")))?;
    Ok(runtime.block_on(future))
}

/// Cancel `token` on Ctrl-C.
pub(crate) fn install_ctrlc_handler(token: CancellationToken) -> CliResult<()> {
    ctrlc::set_handler(move || token.cancel()).map_err(|err| {
        CliError::new(INTERNAL, format!("signal handler setup failed: {err}"))
    })
}
