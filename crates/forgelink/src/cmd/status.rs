use forgelink_engine::{find_stale, ConnectionStatus};
use forgelink_transport::Endpoint;

use crate::cmd::StatusArgs;
use crate::exit::{transport_error, CliResult, HEALTH_CHECK_FAILED, SUCCESS};
use crate::output::{print_instance, InstanceReport, OutputFormat};

pub fn run(args: StatusArgs, format: OutputFormat) -> CliResult<i32> {
    let endpoint =
        Endpoint::for_channel(&args.channel).map_err(|err| transport_error("invalid channel", err))?;

    let pids: Vec<u32> = find_stale(&args.exe)
        .into_iter()
        .map(|process| process.pid)
        .collect();
    let endpoint_present = endpoint_present(&endpoint);
    let running = !pids.is_empty();

    let report = InstanceReport {
        executable: args.exe.display().to_string(),
        running,
        pids,
        endpoint: endpoint.address(),
        endpoint_present,
        status: status_for(running, endpoint_present),
    };
    print_instance(&report, format);

    Ok(if running { SUCCESS } else { HEALTH_CHECK_FAILED })
}

/// Best guess from outside the editor: a live endpoint stands in for an open
/// pipe.
fn status_for(running: bool, endpoint_present: bool) -> ConnectionStatus {
    match (running, endpoint_present) {
        (false, _) => ConnectionStatus::Disconnected,
        (true, false) => ConnectionStatus::ProcessRunningNoPipe,
        (true, true) => ConnectionStatus::Connected,
    }
}

#[cfg(unix)]
fn endpoint_present(endpoint: &Endpoint) -> bool {
    endpoint.socket_path().exists()
}

#[cfg(windows)]
fn endpoint_present(endpoint: &Endpoint) -> bool {
    std::path::Path::new(&endpoint.pipe_path()).exists()
}
