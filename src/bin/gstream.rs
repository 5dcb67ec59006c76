use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use itertools::Itertools;
use tokio::io::{stdin, AsyncBufReadExt, BufReader};
use tracing::warn;

use cnc_stream::grbl::realtime::SpeedOverride;
use cnc_stream::stream_job::{lines_of, stream_lines};
use cnc_stream::{
    start_streamer, Severity, StreamerConfig, StreamerEvent, StreamerHandle, Units,
};

#[derive(Parser, Debug)]
#[command(version, about = "Stream G-code to a GRBL or FluidNC controller.", long_about = None)]
struct Args {
    /// Serial port the controller is attached to.
    #[arg(short, long)]
    port: String,
    #[arg(short, long, default_value_t = 115200)]
    baud: u32,
    /// JSON configuration file; defaults are used when absent.
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// G-code file to stream. Without one, reads commands from stdin.
    #[arg(short, long)]
    file: Option<PathBuf>,
}

fn print_event(event: StreamerEvent, units: Units) {
    match event {
        StreamerEvent::CommandComplete(command) if !command.generated => {
            if command.response.is_empty() {
                println!("> {}", command.text);
            } else {
                println!("> {} ({})", command.text, command.response);
            }
        }
        StreamerEvent::StatusUpdated(status) => {
            let position = status
                .work_coord
                .iter()
                .map(|value| format!("{:.3}", units.from_millimeters(*value)))
                .join(", ");
            println!("[{:?}] ({}) {}", status.state, position, units.suffix());
        }
        StreamerEvent::StateChanged { from, to } => {
            println!("state: {:?} -> {:?}", from, to);
        }
        StreamerEvent::Message { severity, text, at } => {
            let tag = match severity {
                Severity::Info => "msg",
                Severity::Warning => "warn",
                Severity::Error => "error",
            };
            println!("{} {}: {}", at.format("%H:%M:%S"), tag, text);
        }
        _ => {}
    }
}

async fn run_console(handle: &StreamerHandle) -> anyhow::Result<()> {
    let mut lines = BufReader::new(stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        let result = match line {
            "" => continue,
            "!pause" => handle.pause().await,
            "!resume" => handle.resume().await,
            "!reset" => handle.reset().await,
            "!cancel" => handle.cancel().await,
            "!reopen" => handle.reopen().await,
            "!unlock" => handle.unlock_limits().await.map(|_| ()),
            "!relock" => handle.relock_limits().await.map(|_| ()),
            "!feed+" => handle.override_speed(SpeedOverride::FeedPlusTen).await,
            "!feed-" => handle.override_speed(SpeedOverride::FeedMinusTen).await,
            text => handle.submit(text).await.map(|_| ()),
        };
        if let Err(error) = result {
            warn!(%error, "command not accepted");
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();
    let config = match &args.config {
        Some(path) => StreamerConfig::load(path)
            .with_context(|| format!("loading configuration from {:?}", path))?,
        None => StreamerConfig::default(),
    };
    let units = config.units;
    let (reader, writer) = cnc_stream::connection::open_serial(&args.port, args.baud)
        .await
        .with_context(|| format!("opening serial port {}", args.port))?;
    let handle = start_streamer(reader, writer, config);

    let mut events = handle.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            print_event(event, units);
        }
    });

    match &args.file {
        Some(path) => {
            let program = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("reading {:?}", path))?;
            let summary = stream_lines(&handle, lines_of(&program)).await?;
            println!(
                "streamed {} lines: {} ok, {} rejected, {} skipped",
                summary.submitted, summary.completed, summary.rejected, summary.skipped
            );
        }
        None => run_console(&handle).await?,
    }
    Ok(())
}
