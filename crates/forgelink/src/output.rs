use std::io::{IsTerminal, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use forgelink_engine::{ConnectionStatus, LogEvent, LogOrigin, StaleProcess, StatusTone};
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Pretty
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct LogOutput<'a> {
    origin: &'static str,
    engine: &'a str,
    level: &'static str,
    level_ordinal: u8,
    text: &'a str,
    timestamp: String,
}

pub fn print_log(event: &LogEvent, engine: &str, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = LogOutput {
                origin: origin_name(event.origin),
                engine,
                level: event.level.as_str(),
                level_ordinal: event.level.as_u8(),
                text: &event.text,
                timestamp: unix_seconds(event.timestamp),
            };
            print_json(&out);
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["ORIGIN", "LEVEL", "TEXT"])
                .add_row(vec![
                    origin_name(event.origin).to_string(),
                    event.level.to_string(),
                    event.display(engine),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!("{:<5} {}", event.level.as_str(), event.display(engine));
        }
        OutputFormat::Raw => {
            // Editor-side messages go to stderr so stdout carries engine output only.
            match event.origin {
                LogOrigin::Engine => print_raw(format!("{}\n", event.display(engine)).as_bytes()),
                LogOrigin::Editor => eprintln!("{}", event.text),
            }
        }
    }
}

#[derive(Serialize)]
struct StatusOutput {
    status: ConnectionStatus,
    label: String,
    tone: StatusTone,
    timestamp: String,
}

pub fn print_status(status: ConnectionStatus, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            print_json(&StatusOutput {
                status,
                label: status.to_string(),
                tone: status.tone(),
                timestamp: unix_seconds(SystemTime::now()),
            });
        }
        // Status lines would corrupt a raw engine stream.
        OutputFormat::Raw => eprintln!("{status}"),
        OutputFormat::Table | OutputFormat::Pretty => println!("{status}"),
    }
}

pub fn print_processes(processes: &[StaleProcess], format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            for process in processes {
                print_json(process);
            }
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["PID", "NAME", "EXECUTABLE", "KILLED"]);
            for process in processes {
                table.add_row(vec![
                    process.pid.to_string(),
                    process.name.clone(),
                    exe_display(process),
                    process.killed.to_string(),
                ]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            if processes.is_empty() {
                println!("no matching processes");
            }
            for process in processes {
                println!(
                    "pid={} name={} exe={} killed={}",
                    process.pid,
                    process.name,
                    exe_display(process),
                    process.killed
                );
            }
        }
        OutputFormat::Raw => {
            for process in processes {
                println!("{}", process.pid);
            }
        }
    }
}

#[derive(Serialize)]
pub struct InstanceReport {
    pub executable: String,
    pub running: bool,
    pub pids: Vec<u32>,
    pub endpoint: String,
    pub endpoint_present: bool,
    pub status: ConnectionStatus,
}

pub fn print_instance(report: &InstanceReport, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(report),
        OutputFormat::Table => {
            let pids = join_pids(&report.pids);
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["FIELD", "VALUE"])
                .add_row(vec!["executable", report.executable.as_str()])
                .add_row(vec!["running", if report.running { "yes" } else { "no" }])
                .add_row(vec!["pids", pids.as_str()])
                .add_row(vec!["endpoint", report.endpoint.as_str()])
                .add_row(vec![
                    "endpoint_present",
                    if report.endpoint_present { "yes" } else { "no" },
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty | OutputFormat::Raw => {
            println!("{}", report.status);
            println!(
                "executable={} running={} pids={} endpoint={} endpoint_present={}",
                report.executable,
                report.running,
                join_pids(&report.pids),
                report.endpoint,
                report.endpoint_present
            );
        }
    }
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

fn origin_name(origin: LogOrigin) -> &'static str {
    match origin {
        LogOrigin::Engine => "engine",
        LogOrigin::Editor => "editor",
    }
}

fn exe_display(process: &StaleProcess) -> String {
    process
        .exe
        .as_ref()
        .map(|path| path.display().to_string())
        .unwrap_or_else(|| "-".to_string())
}

fn join_pids(pids: &[u32]) -> String {
    if pids.is_empty() {
        return "-".to_string();
    }
    pids.iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

fn unix_seconds(time: SystemTime) -> String {
    time.duration_since(UNIX_EPOCH)
        .map(|d| format!("{}.{:03}", d.as_secs(), d.subsec_millis()))
        .unwrap_or_else(|_| "0".to_string())
}
