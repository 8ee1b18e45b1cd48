//! Stickerbatch CLI: apply one sticker to a batch of images and videos.
//!
//! Usage:
//!   stickerbatch apply --sticker <REF> <FILES>...   Sticker the files and write an archive
//!   stickerbatch check                             Check ffmpeg and configuration
//!   stickerbatch placement [show|reset]            Show or reset the saved placement

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "stickerbatch",
    about = "Put a sticker on a batch of images and videos",
    version,
    author
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply a sticker to files and write the results as one archive
    Apply {
        /// Image and video files to sticker
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Sticker image: a path or file:// URL
        #[arg(short, long)]
        sticker: String,

        /// Horizontal sticker center, percent of width [0, 100]
        #[arg(short)]
        x: Option<f64>,

        /// Vertical sticker center, percent of height [0, 100]
        #[arg(short)]
        y: Option<f64>,

        /// Sticker edge, percent of the shorter side [1, 200]
        #[arg(long)]
        size: Option<f64>,

        /// Directory the archive is written to
        #[arg(short, long, default_value = ".")]
        output: PathBuf,

        /// Files composited concurrently per batch
        #[arg(long)]
        batch_size: Option<usize>,

        /// Retry a failed run this many times
        #[arg(long, default_value = "0")]
        retries: u32,
    },

    /// Check ffmpeg availability and configuration
    Check,

    /// Show or reset the saved sticker placement
    Placement {
        #[command(subcommand)]
        action: Option<PlacementAction>,
    },
}

#[derive(Subcommand)]
enum PlacementAction {
    /// Print the saved placement
    Show {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Forget the saved placement
    Reset,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = stickerbatch_common::AppConfig::load();

    let mut logging = config.logging.clone();
    if cli.verbose {
        logging.level = "debug".to_string();
    }
    stickerbatch_common::logging::init_logging(&logging);

    match cli.command {
        Commands::Apply {
            files,
            sticker,
            x,
            y,
            size,
            output,
            batch_size,
            retries,
        } => {
            commands::apply::run(
                config,
                commands::apply::ApplyArgs {
                    files,
                    sticker,
                    x,
                    y,
                    size,
                    output,
                    batch_size,
                    retries,
                },
            )
            .await
        }
        Commands::Check => commands::check::run(&config),
        Commands::Placement { action } => match action {
            None => commands::placement::show(false),
            Some(PlacementAction::Show { json }) => commands::placement::show(json),
            Some(PlacementAction::Reset) => commands::placement::reset(),
        },
    }
}
