// SPDX-License-Identifier: GPL-3.0-only

use clap::{Parser, Subcommand};
use depthcap::Modality;
use depthcap::pipelines::scene::CloudFormat;
use std::path::PathBuf;

mod cli;

#[derive(Parser)]
#[command(name = "depthcap")]
#[command(about = "Record and inspect depth camera capture archives")]
#[command(version = env!("GIT_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the manifest summary of an archive
    Info {
        /// Archive file (.zip)
        archive: PathBuf,
    },

    /// Print which color frame belongs to each depth frame
    Align {
        /// Archive file (.zip)
        archive: PathBuf,
    },

    /// Export one archive frame as standalone images and a point cloud
    Export {
        /// Archive file (.zip)
        archive: PathBuf,

        /// Frame index
        #[arg(short, long, default_value = "0")]
        frame: usize,

        /// Output directory
        #[arg(short, long)]
        output: PathBuf,

        /// Point cloud format (ply or las)
        #[arg(long, default_value = "ply", value_parser = cli::parse_cloud_format)]
        cloud_format: CloudFormat,
    },

    /// Record a session from the virtual camera
    Record {
        /// Number of frames to capture
        #[arg(short, long, default_value = "30")]
        frames: usize,

        /// Output directory (default: ~/Pictures/depthcap)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Capture only the next frame, without an archive
        #[arg(short, long)]
        single: bool,

        /// Modalities to record, comma separated (depth, ir-left, ir-right, rgb, cloud)
        #[arg(short, long, value_delimiter = ',', value_parser = cli::parse_modality)]
        modalities: Vec<Modality>,

        /// Write raw byte dumps instead of PNG images
        #[arg(long)]
        raw: bool,

        /// Virtual camera frame rate
        #[arg(long, default_value = "30")]
        fps: u32,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    // Set RUST_LOG environment variable to control log level
    // Examples: RUST_LOG=debug, RUST_LOG=depthcap=debug, RUST_LOG=info
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(true)
        .with_level(true)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Info { archive } => cli::show_info(&archive),
        Commands::Align { archive } => cli::show_alignment(&archive),
        Commands::Export {
            archive,
            frame,
            output,
            cloud_format,
        } => cli::export_frame(&archive, frame, &output, cloud_format),
        Commands::Record {
            frames,
            output,
            single,
            modalities,
            raw,
            fps,
        } => cli::record(cli::RecordOptions {
            frames,
            output,
            single,
            modalities,
            raw,
            fps,
        }),
    }
}
