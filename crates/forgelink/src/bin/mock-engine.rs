//! Stand-in for the engine worker.
//!
//! Opens `<channel>_engine` the way the engine does for `--pipe <channel>`,
//! accepts one editor connection and writes the given lines as log messages.
//! Used by the integration tests and for trying the CLI without an engine
//! build.

use std::time::Duration;

use bytes::BytesMut;
use clap::{Parser, ValueEnum};
use forgelink_frame::{FrameConfig, Framing, LogLevel, ReceiveBuffer};
use forgelink_transport::{Endpoint, PipeListener};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{error, info, warn};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum MockFraming {
    Chunked,
    LengthPrefixed,
}

impl From<MockFraming> for Framing {
    fn from(value: MockFraming) -> Self {
        match value {
            MockFraming::Chunked => Framing::Chunked,
            MockFraming::LengthPrefixed => Framing::LengthPrefixed,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "forgelink-mock-engine", about = "Fake engine worker for forgelink")]
struct Args {
    /// Channel name; the endpoint is `<channel>_engine`.
    #[arg(long, value_name = "CHANNEL")]
    pipe: String,
    /// Line to send once connected. Repeatable, sent in order.
    #[arg(long = "line", value_name = "TEXT")]
    lines: Vec<String>,
    /// Level ordinal written in every message.
    #[arg(long, default_value_t = 1)]
    level: u8,
    /// Wire framing to write.
    #[arg(long, value_enum, default_value_t = MockFraming::Chunked)]
    framing: MockFraming,
    /// Pause between lines, in milliseconds.
    #[arg(long, default_value_t = 50)]
    interval_ms: u64,
    /// Exit this long after the last line instead of waiting for the editor
    /// to hang up.
    #[arg(long, value_name = "MS")]
    exit_after_ms: Option<u64>,
    /// Process exit code.
    #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
    exit_code: i32,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let args = Args::parse();
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(tracing::level_filters::LevelFilter::INFO)
        .with_ansi(false)
        .with_target(false)
        .try_init();

    if let Err(err) = serve(&args).await {
        error!(error = %err, "mock engine failed");
        std::process::exit(1);
    }
    std::process::exit(args.exit_code);
}

async fn serve(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let endpoint = Endpoint::for_channel(&args.pipe)?;
    let mut listener = PipeListener::bind(&endpoint)?;
    info!(%endpoint, "mock engine listening");

    let mut stream = listener.accept().await?;
    info!("editor connected");

    let framing: Framing = args.framing.into();
    let level = LogLevel::from_u8(args.level);
    let interval = Duration::from_millis(args.interval_ms);
    let mut out = BytesMut::new();
    for line in &args.lines {
        out.clear();
        framing.encode_log(level, &format!("{line}\n"), &mut out)?;
        stream.write_all(&out).await?;
        stream.flush().await?;
        tokio::time::sleep(interval).await;
    }

    if let Some(ms) = args.exit_after_ms {
        tokio::time::sleep(Duration::from_millis(ms)).await;
        info!("mock engine exiting");
        return Ok(());
    }

    let mut buffer = ReceiveBuffer::new(FrameConfig {
        framing,
        ..FrameConfig::default()
    });
    let mut chunk = vec![0u8; 4096];
    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            info!("editor hung up");
            return Ok(());
        }
        for frame in buffer.push(&chunk[..n]) {
            match frame {
                Ok(forgelink_frame::Frame::Log { level, text }) => {
                    info!(%level, %text, "received from editor");
                }
                Err(err) => warn!(error = %err, "undecodable message from editor"),
            }
        }
    }
}
