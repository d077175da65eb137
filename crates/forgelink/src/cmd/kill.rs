use forgelink_engine::{find_stale, kill_stale};
use tracing::info;

use crate::cmd::KillArgs;
use crate::exit::{CliResult, FAILURE, SUCCESS};
use crate::output::{print_processes, OutputFormat};

pub fn run(args: KillArgs, format: OutputFormat) -> CliResult<i32> {
    let processes = if args.dry_run {
        find_stale(&args.exe)
    } else {
        kill_stale(&args.exe)
    };
    info!(
        exe = %args.exe.display(),
        matched = processes.len(),
        dry_run = args.dry_run,
        "engine instance scan finished"
    );
    print_processes(&processes, format);

    if !args.dry_run && processes.iter().any(|process| !process.killed) {
        return Ok(FAILURE);
    }
    Ok(SUCCESS)
}
