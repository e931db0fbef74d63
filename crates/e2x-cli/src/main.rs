//! E2X CLI - perturbation-path saliency for object detectors
//!
//! Explains every detection a network makes on a dataset folder and writes one
//! saliency dump and one rendered panel per detection.

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

mod commands;

use commands::explain::ExplainCommand;
use commands::segment::SegmentCommand;

#[derive(Parser)]
#[command(
    name = "e2x",
    version,
    about = "Explain object detector predictions with segment saliency",
    long_about = "Attributes each detection's confidence to image segments by fading every segment\n\
                  along a random perturbation path and summing gradient x input per segment.\n\n\
                  Results land in\n\
                  <results-dir>/results_<method>/<dataset>/<net>_<segmentation>_<segments>_<samples>/\n\
                  as <image>_<n>.json (saliency dump) and <image>_<n>.png (panel). Detections whose\n\
                  panel already exists are skipped, so interrupted runs can be restarted.",
    after_help = "EXAMPLES:\n  \
                  # Explain a VOC folder with the default SSD network\n  \
                  e2x explain data/voc --model-dir models\n\n  \
                  # Quick pass on CPU with a fixed seed\n  \
                  e2x explain data/voc --preset fast --gpu -1 --seed 7\n\n  \
                  # Run from a YAML file, overriding one value\n  \
                  e2x explain data/voc --config run.yaml --num-samples 64\n\n  \
                  # Inspect a segmentation before a long run\n  \
                  e2x segment image.jpg --segmentation felzenszwalb --size 300 -o segments.png\n\n\
                  For more details on a specific command:\n  \
                  e2x <COMMAND> --help"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Explain every detection in a dataset folder
    Explain(ExplainCommand),

    /// Segment one image and report the segments that would be perturbed
    Segment(SegmentCommand),

    /// List segmentation methods
    Methods,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match &cli.command {
        Commands::Methods => Level::WARN,
        _ => {
            if cli.verbose {
                Level::DEBUG
            } else {
                Level::INFO
            }
        }
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    match cli.command {
        Commands::Explain(cmd) => cmd.execute(),
        Commands::Segment(cmd) => cmd.execute(),
        Commands::Methods => {
            commands::methods::list_methods();
            Ok(())
        }
    }
}
