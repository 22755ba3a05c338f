//! CTG command line: inspect, analyze and play recorded sessions

use anyhow::Context;
use clap::{Parser, Subcommand};
use ctg_processing::to_clean_json;
use ctg_stream::{CtgService, ServiceConfig, StaticPatientDirectory, StreamMessage};
use serde::Serialize;
use std::path::PathBuf;
use tracing::{info, Level};

#[derive(Parser, Debug)]
#[command(author, version, about = "CTG session pipeline")]
struct Cli {
    /// Root directory holding `{group}/{folder}/{bpm,uterus}/*.csv`
    #[arg(long)]
    data_root: PathBuf,

    /// Service configuration file (JSON)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Patient records keyed by "group/folder" (JSON)
    #[arg(long)]
    patients: Option<PathBuf>,

    /// Log debug output to stderr
    #[arg(long, short)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List discovered sessions
    Sessions,
    /// Session metadata and gap warnings
    Info {
        session_id: String,
        #[arg(long)]
        sample_rate: Option<f64>,
    },
    /// First frames of a session
    Frames {
        session_id: String,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Statistics, features and patient context
    Analyze { session_id: String },
    /// Report preview with conclusion
    Report { session_id: String },
    /// Play a session, one JSON message per line
    Stream {
        session_id: String,
        #[arg(long)]
        sample_rate: Option<f64>,
        #[arg(long)]
        speed: Option<f64>,
        #[arg(long)]
        max_frames: Option<usize>,
    },
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let json = to_clean_json(value)?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(if cli.verbose { Level::DEBUG } else { Level::INFO })
        .init();

    let mut config = match &cli.config {
        Some(path) => ServiceConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => ServiceConfig::default(),
    };
    if let Command::Stream { speed: Some(speed), .. } = &cli.command {
        config.stream = config.stream.with_playback_speed(*speed);
    }

    let patients = match &cli.patients {
        Some(path) => StaticPatientDirectory::load(path)
            .with_context(|| format!("loading patient records from {}", path.display()))?,
        None => StaticPatientDirectory::new(),
    };

    let service = CtgService::with_patients(&cli.data_root, config, patients)?;

    match cli.command {
        Command::Sessions => print_json(&service.list_sessions())?,
        Command::Info { session_id, sample_rate } => {
            print_json(&service.session_overview(&session_id, sample_rate)?)?
        }
        Command::Frames { session_id, limit } => print_json(&service.session_frames(&session_id, limit)?)?,
        Command::Analyze { session_id } => {
            let analysis = service.analysis(&session_id)?;
            println!("{}", serde_json::to_string_pretty(&analysis)?);
        }
        Command::Report { session_id } => print_json(&service.report_preview(&session_id)?)?,
        Command::Stream {
            session_id,
            sample_rate,
            max_frames,
            ..
        } => {
            let mut handle = service.open_stream(&session_id, sample_rate)?;

            let token = handle.cancel_token();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("Interrupted, stopping stream");
                    token.cancel();
                }
            });

            let mut frames = 0usize;
            while let Some(message) = handle.recv().await {
                println!("{}", serde_json::to_string(&to_clean_json(&message)?)?);

                if matches!(message, StreamMessage::Frame(_)) {
                    frames += 1;
                    if max_frames.is_some_and(|max| frames >= max) {
                        handle.cancel();
                        break;
                    }
                }
            }

            info!("Stream {} ended after {} frames", handle.id(), frames);
            handle.join().await?;
        }
    }

    Ok(())
}
