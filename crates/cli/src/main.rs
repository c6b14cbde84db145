//! CLI entry point for stillframe
//!
//! Loads image/audio pairs into slots, starts them all, prints progress while
//! they run and a summary at the end. Ctrl-C resets every slot.

use clap::Parser;
use stillframe::{
    App, BoardSnapshot, ConversionOutcome, ConversionPhase, InputPair,
};
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Progress refresh interval.
const TICK: Duration = Duration::from_millis(500);

/// stillframe - turn a still image and an audio clip into an MP4 video
#[derive(Parser, Debug)]
#[command(name = "stillframe")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (TOML); defaults apply when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory that receives finished videos (overrides output.download_dir)
    #[arg(short, long)]
    out: Option<PathBuf>,

    /// Print the final status board as JSON
    #[arg(long, default_value = "false")]
    json: bool,

    /// An image and an audio file for the next slot; repeat for more slots
    #[arg(
        long = "slot",
        num_args = 2,
        value_names = ["IMAGE", "AUDIO"],
        required = true,
        action = clap::ArgAction::Append
    )]
    slots: Vec<PathBuf>,
}

impl Args {
    fn pairs(&self) -> Vec<InputPair> {
        self.slots
            .chunks_exact(2)
            .map(|pair| InputPair {
                image: pair[0].clone(),
                audio: pair[1].clone(),
            })
            .collect()
    }
}

/// RUST_LOG when set, else the configured level, else info.
fn init_tracing(level: &str) {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(f) => f,
        Err(_) => match level.parse::<EnvFilter>() {
            Ok(f) => f,
            Err(e) => {
                eprintln!(
                    "WARN: logging.level '{}' is not a valid filter ({}); falling back to 'info'",
                    level, e
                );
                EnvFilter::new("info")
            }
        },
    };

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Print one line per running slot whose progress or status changed.
fn print_progress(snapshot: &BoardSnapshot, last: &mut HashMap<u32, (u32, String)>) {
    for slot in &snapshot.slots {
        if !slot.phase.is_processing() {
            continue;
        }
        let current = (slot.progress.floor() as u32, slot.status.clone());
        if last.get(&slot.slot) != Some(&current) {
            println!("[slot {}] {:>3}% {}", slot.slot, current.0, current.1);
            last.insert(slot.slot, current);
        }
    }
}

fn print_summary(snapshot: &BoardSnapshot) {
    for slot in &snapshot.slots {
        match slot.phase {
            ConversionPhase::Complete => {
                if let Some(output) = &slot.output {
                    println!(
                        "[slot {}] done: {} ({}, {})",
                        slot.slot, output.file_name, output.file_size, output.duration
                    );
                }
            }
            ConversionPhase::Error => {
                println!(
                    "[slot {}] failed: {}",
                    slot.slot,
                    slot.error_message.as_deref().unwrap_or("unknown error")
                );
            }
            _ => {}
        }
    }
    println!(
        "{} completed, {} failed",
        snapshot.completed, snapshot.failed
    );
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let app = match App::load(args.config.as_deref(), args.out.as_deref()) {
        Ok(app) => app,
        Err(e) => {
            eprintln!("Failed to start: {}", e);
            return ExitCode::FAILURE;
        }
    };

    init_tracing(&app.config.logging.level);
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        slots = app.orchestrator.len(),
        download_dir = %app.config.output.download_dir.display(),
        "stillframe starting"
    );

    if let Err(e) = app.load_pairs(&args.pairs()).await {
        eprintln!("Failed to load inputs: {}", e);
        return ExitCode::FAILURE;
    }

    let run = app.run_all();
    tokio::pin!(run);

    let mut ticker = tokio::time::interval(TICK);
    let mut last_printed = HashMap::new();
    let mut interrupted = false;

    let outcomes = loop {
        tokio::select! {
            outcomes = &mut run => break outcomes,
            _ = ticker.tick(), if !args.json => {
                print_progress(&app.orchestrator.snapshot(), &mut last_printed);
            }
            _ = tokio::signal::ctrl_c(), if !interrupted => {
                interrupted = true;
                eprintln!("Interrupted, resetting all slots");
                app.orchestrator.reset_all();
            }
        }
    };

    let snapshot = app.orchestrator.snapshot();
    if args.json {
        match serde_json::to_string_pretty(&snapshot) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("Failed to serialize status: {}", e);
                return ExitCode::FAILURE;
            }
        }
    } else {
        print_summary(&snapshot);
    }

    let failed = outcomes
        .iter()
        .any(|(_, outcome)| !matches!(outcome, ConversionOutcome::Completed(_)));

    if outcomes.is_empty() {
        eprintln!("No slot could start");
        ExitCode::FAILURE
    } else if failed || interrupted {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
