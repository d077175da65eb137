use std::sync::Arc;
use std::time::Duration;

use forgelink_engine::{channel_sink, LogOrigin, PipeConfig, PipeTransport};
use forgelink_frame::FrameConfig;
use forgelink_transport::Endpoint;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::cmd::{block_on, install_ctrlc_handler, parse_duration, AttachArgs};
use crate::exit::{connect_error, transport_error, CliError, CliResult, INTERNAL, SUCCESS};
use crate::output::{print_log, OutputFormat};

pub fn run(args: AttachArgs, format: OutputFormat) -> CliResult<i32> {
    let endpoint =
        Endpoint::for_channel(&args.channel).map_err(|err| transport_error("invalid channel", err))?;
    let timeout = parse_duration(&args.timeout)?;

    let cancel = CancellationToken::new();
    install_ctrlc_handler(cancel.clone())?;

    block_on(stream(args, endpoint, timeout, format, cancel))?
}

async fn stream(
    args: AttachArgs,
    endpoint: Endpoint,
    timeout: Duration,
    format: OutputFormat,
    cancel: CancellationToken,
) -> CliResult<i32> {
    let config = PipeConfig {
        frame: FrameConfig {
            framing: args.framing.into(),
            ..FrameConfig::default()
        },
        ..PipeConfig::default()
    };
    let (transport, _events) = PipeTransport::new(config);

    let id = tokio::select! {
        _ = cancel.cancelled() => return Ok(SUCCESS),
        id = transport.connect(&endpoint, timeout) => {
            id.map_err(|err| connect_error("connect failed", err))?
        }
    };
    info!(%id, %endpoint, "attached to engine");

    let (sink, mut logs) = channel_sink();
    let receive = transport
        .start_receive_loop(Arc::new(sink))
        .map_err(|err| CliError::new(INTERNAL, format!("receive failed: {err}")))?;

    let mut printed = 0usize;
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            event = logs.recv() => {
                // The receive loop drops its sink when the pipe closes.
                let Some(event) = event else { break };
                print_log(&event, &args.name, format);
                if event.origin == LogOrigin::Engine {
                    printed = printed.saturating_add(1);
                    if args.count.is_some_and(|count| printed >= count) {
                        break;
                    }
                }
            }
        }
    }

    transport.disconnect().await;
    let _ = receive.await;
    Ok(SUCCESS)
}
