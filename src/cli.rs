// SPDX-License-Identifier: GPL-3.0-only

//! CLI commands for archive operations
//!
//! This module provides command-line functionality for:
//! - Inspecting archives and their depth/color alignment
//! - Exporting single frames
//! - Recording sessions from the virtual camera

use depthcap::Modality;
use depthcap::backends::camera::SessionSnapshot;
use depthcap::backends::camera::frame_loop::{FrameLoopController, LoopAction};
use depthcap::backends::virtual_camera::{SyntheticCamera, VirtualCameraConfig};
use depthcap::config::{Config, SaveFormat};
use depthcap::pipelines::archive::{ArchiveParser, alignment_table};
use depthcap::pipelines::capture::{
    CaptureEngine, CaptureEvent, CaptureSession, CaptureState, CaptureType, OutputSaver,
};
use depthcap::pipelines::playback::Playback;
use depthcap::pipelines::scene::CloudFormat;
use depthcap::processing::FrameProcessor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::warn;

type CliResult = Result<(), Box<dyn std::error::Error>>;

pub fn parse_modality(value: &str) -> Result<Modality, String> {
    match value.trim() {
        "cloud" | "point-cloud" => Ok(Modality::PointCloud),
        other => Modality::parse(other).ok_or_else(|| format!("unknown modality '{}'", other)),
    }
}

pub fn parse_cloud_format(value: &str) -> Result<CloudFormat, String> {
    match value.to_ascii_lowercase().as_str() {
        "ply" => Ok(CloudFormat::Ply),
        "las" => Ok(CloudFormat::Las),
        other => Err(format!("unknown point cloud format '{}'", other)),
    }
}

/// Print the manifest summary of an archive
pub fn show_info(archive: &Path) -> CliResult {
    let parser = ArchiveParser::open(archive)?;
    let manifest = parser.manifest();

    println!("Archive:     {}", archive.display());
    println!("Name:        {}", manifest.name);
    println!("Version:     {}", manifest.version);
    println!("Frames:      {}", manifest.frame_count);
    let types: Vec<&str> = manifest.data_types.iter().map(|m| m.display_name()).collect();
    println!("Data types:  {}", types.join(", "));
    println!("Format:      {}", manifest.save_format);
    println!(
        "Depth:       {}x{} scale {} range {}-{}",
        manifest.depth_resolution.width,
        manifest.depth_resolution.height,
        manifest.depth_scale,
        manifest.depth_min,
        manifest.depth_max
    );
    if manifest.has(Modality::Rgb) {
        println!(
            "RGB:         {}x{}",
            manifest.rgb_resolution.width, manifest.rgb_resolution.height
        );
    }
    if let Some(texture) = manifest.with_texture {
        println!("Texture:     {}", texture);
    }
    let timestamps = parser.timestamps();
    println!(
        "Timestamps:  {} depth, {} rgb ({})",
        timestamps.depth.len(),
        timestamps.rgb.len(),
        if parser.is_timestamps_valid() {
            "valid"
        } else {
            "invalid, aligning by index"
        }
    );
    Ok(())
}

/// Print the depth to color frame mapping
pub fn show_alignment(archive: &Path) -> CliResult {
    let parser = ArchiveParser::open(archive)?;
    let timestamps = parser.timestamps();

    if !parser.manifest().has(Modality::Rgb) {
        println!("Archive has no color frames.");
        return Ok(());
    }

    let table = if timestamps.depth.is_empty() {
        (0..parser.frame_count())
            .map(|i| parser.aligned_color_index(i))
            .collect()
    } else {
        alignment_table(timestamps, parser.is_timestamps_valid())
    };

    for (depth, rgb) in table.iter().enumerate() {
        match rgb {
            Some(rgb) => {
                let delta = match (timestamps.depth.get(depth), timestamps.rgb.get(*rgb)) {
                    (Some(&d), Some(&c)) => format!("{:+}", c as i128 - d as i128),
                    _ => "-".to_string(),
                };
                println!("{:04} -> {:04}  {}", depth, rgb, delta);
            }
            None => println!("{:04} -> none", depth),
        }
    }
    Ok(())
}

/// Export one frame of an archive
pub fn export_frame(
    archive: &Path,
    frame: usize,
    output: &Path,
    cloud_format: CloudFormat,
) -> CliResult {
    let (mut playback, _events) = Playback::new();
    playback.load(archive)?;
    let files = playback.export_frame(frame, output, cloud_format)?;
    for file in files {
        println!("Wrote {}", file.display());
    }
    Ok(())
}

/// Options of the `record` command
pub struct RecordOptions {
    pub frames: usize,
    pub output: Option<PathBuf>,
    pub single: bool,
    pub modalities: Vec<Modality>,
    pub raw: bool,
    pub fps: u32,
}

/// Record a session from the virtual camera
pub fn record(options: RecordOptions) -> CliResult {
    let config = Config::load().unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        Config::default()
    });

    let modalities = if options.modalities.is_empty() {
        vec![Modality::Depth, Modality::Rgb, Modality::PointCloud]
    } else {
        options.modalities
    };
    let with_ir = modalities
        .iter()
        .any(|m| matches!(m, Modality::InfraredLeft | Modality::InfraredRight));

    let mut camera = SyntheticCamera::new(VirtualCameraConfig {
        with_ir,
        ..Default::default()
    });
    let snapshot = SessionSnapshot::from_camera(&camera);

    let mut session = CaptureSession::from_config(&config, modalities).with_target(options.frames);
    if options.raw {
        session = session.with_save_format(SaveFormat::Raw);
    }
    if let Some(dir) = options.output {
        session.output_dir = dir;
    }
    std::fs::create_dir_all(&session.output_dir)?;

    let capture_type = if options.single {
        CaptureType::Single
    } else {
        CaptureType::Multiple
    };
    let (engine, mut events) = CaptureEngine::new(capture_type, &config, snapshot);
    let engine = Arc::new(engine);

    // Set up Ctrl+C handler
    let interrupt_engine = Arc::clone(&engine);
    ctrlc::set_handler(move || {
        interrupt_engine.interrupt();
    })?;

    println!("Recording to {} (press Ctrl+C to stop early)", session.output_dir.display());
    engine.start(session.clone())?;

    let mut processor = FrameProcessor::new(&config);
    let sink_engine = Arc::clone(&engine);
    let pace = Duration::from_secs_f64(1.0 / options.fps.max(1) as f64);
    let mut frame_loop = FrameLoopController::start(
        "virtual-camera",
        Some(pace),
        move || camera.next_bundle(),
        move |bundle| {
            let frame = processor.process(&bundle);
            sink_engine.push_processed(frame);
            if sink_engine.state() == CaptureState::Idle {
                LoopAction::Stop
            } else {
                LoopAction::Continue
            }
        },
    );

    while engine.state() != CaptureState::Idle {
        print_events(&mut events);
        if !frame_loop.is_running() && engine.state() == CaptureState::Capturing {
            warn!("Frame source stopped, interrupting capture");
            engine.interrupt();
        }
        std::thread::sleep(Duration::from_millis(100));
    }
    engine.wait();
    frame_loop.stop();
    print_events(&mut events);

    if options.single {
        let Some(frame) = engine.single_result() else {
            return Err("No frame captured".into());
        };
        let files = OutputSaver::save_single(&frame, &session, &session.output_dir)?;
        for file in files {
            println!("Saved {}", file.display());
        }
    }

    Ok(())
}

fn print_events(events: &mut UnboundedReceiver<CaptureEvent>) {
    while let Ok(event) = events.try_recv() {
        match event {
            CaptureEvent::Started {
                capture_type,
                target,
            } => println!("Started {:?} capture of {} frames", capture_type, target),
            CaptureEvent::NumberUpdated { captured, dropped } => {
                print!("\rCaptured {} frames, dropped {}", captured, dropped);
                let _ = std::io::Write::flush(&mut std::io::stdout());
            }
            CaptureEvent::Warning(message) => eprintln!("\nWarning: {}", message),
            CaptureEvent::Error(e) => eprintln!("\nError: {}", e),
            CaptureEvent::Finished { message, archive } => {
                println!();
                println!("{}", message);
                if let Some(path) = archive {
                    println!("Archive saved: {}", path.display());
                }
            }
        }
    }
}
