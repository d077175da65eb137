use forgelink_engine::{
    channel_sink, ConnectionStatus, EngineConfig, EngineConnection, LogEvent, LogOrigin,
};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::cmd::{
    block_on, install_ctrlc_handler, parse_delay, parse_duration, resolve_engine, RunArgs,
};
use crate::exit::{engine_error, transport_error, CliResult, SUCCESS};
use crate::output::{print_log, print_status, OutputFormat};

pub fn run(args: RunArgs, format: OutputFormat) -> CliResult<i32> {
    let exe = resolve_engine(args.exe, args.settings)?;
    let grace = parse_delay(&args.grace)?;
    let connect_timeout = parse_duration(&args.connect_timeout)?;

    let config = EngineConfig::new(exe)
        .with_args(args.engine_args)
        .with_channel(args.channel)
        .with_grace_delay(grace)
        .with_connect_timeout(connect_timeout)
        .with_framing(args.framing.into())
        .with_kill_stale(!args.no_kill_stale)
        .with_inherit_stdio(!args.quiet_engine);
    config
        .endpoint()
        .map_err(|err| transport_error("invalid channel", err))?;

    let cancel = CancellationToken::new();
    install_ctrlc_handler(cancel.clone())?;

    block_on(session(config, args.count, format, cancel))?
}

async fn session(
    config: EngineConfig,
    count: Option<usize>,
    format: OutputFormat,
    cancel: CancellationToken,
) -> CliResult<i32> {
    let engine_name = config.engine_name();
    let (sink, mut logs) = channel_sink();
    let engine = EngineConnection::spawn(config, sink);
    let mut statuses = engine.subscribe();

    if let Err(err) = engine.start_and_wait_connected().await {
        let _ = engine.shutdown().await;
        drain(&mut logs, &engine_name, format, true);
        return Err(engine_error("engine start failed", err));
    }

    let mut printed = 0usize;
    let mut limit_hit = false;
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("interrupted, stopping engine");
                break;
            }
            event = logs.recv() => {
                let Some(event) = event else { break };
                print_log(&event, &engine_name, format);
                if event.origin == LogOrigin::Engine {
                    printed = printed.saturating_add(1);
                    if count.is_some_and(|count| printed >= count) {
                        debug!(printed, "line count reached");
                        limit_hit = true;
                        break;
                    }
                }
            }
            status = statuses.next() => {
                let Some(status) = status else { break };
                print_status(status, format);
                if status == ConnectionStatus::Disconnected {
                    break;
                }
            }
        }
    }

    drain(&mut logs, &engine_name, format, !limit_hit);
    let report = engine
        .shutdown()
        .await
        .map_err(|err| engine_error("engine shutdown failed", err))?;
    debug!(?report, "engine session finished");
    drain(&mut logs, &engine_name, format, !limit_hit);

    Ok(SUCCESS)
}

/// Print what is already queued. Engine lines are dropped once the
/// requested count has been printed.
fn drain(
    logs: &mut UnboundedReceiver<LogEvent>,
    engine_name: &str,
    format: OutputFormat,
    engine_lines: bool,
) {
    while let Ok(event) = logs.try_recv() {
        if engine_lines || event.origin == LogOrigin::Editor {
            print_log(&event, engine_name, format);
        }
    }
}
