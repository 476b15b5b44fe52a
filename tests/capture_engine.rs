// SPDX-License-Identifier: GPL-3.0-only

//! Integration tests for the capture engine

use depthcap::backends::camera::SessionSnapshot;
use depthcap::backends::virtual_camera::{SyntheticCamera, VirtualCameraConfig};
use depthcap::pipelines::capture::{CaptureEngine, CaptureSession, CaptureState, CaptureType};
use depthcap::{ArchiveParser, CaptureEvent, Config, Modality};

fn camera() -> SyntheticCamera {
    SyntheticCamera::new(VirtualCameraConfig {
        depth_width: 24,
        depth_height: 16,
        rgb_width: 24,
        rgb_height: 16,
        ..Default::default()
    })
}

#[test]
fn test_target_never_exceeded_under_burst() {
    let dir = tempfile::tempdir().unwrap();
    let mut camera = camera();
    let mut config = Config::default();
    config.capture.max_cached_frames = 2;
    let (engine, mut events) = CaptureEngine::new(
        CaptureType::Multiple,
        &config,
        SessionSnapshot::from_camera(&camera),
    );
    let session = CaptureSession::new(vec![Modality::Depth, Modality::Rgb], dir.path().into())
        .with_base_name("burst")
        .with_target(10);
    let archive = session.archive_path();
    engine.start(session).unwrap();

    for _ in 0..50 {
        engine.push_frame(camera.next_bundle().unwrap());
        let counters = engine.counters();
        assert!(counters.captured + counters.dropped <= 10);
        assert!(counters.accepted + counters.dropped <= 10);
    }
    engine.wait();

    let counters = engine.counters();
    assert_eq!(engine.state(), CaptureState::Idle);
    assert_eq!(counters.accepted + counters.dropped, 10);
    assert_eq!(counters.captured, counters.accepted);
    assert_eq!(counters.failed, 0);

    let parser = ArchiveParser::open(&archive).unwrap();
    assert_eq!(parser.frame_count(), counters.accepted);

    // Sequence numbers follow arrival order
    let depth = &parser.timestamps().depth;
    assert_eq!(depth.len(), counters.accepted);
    assert!(depth.windows(2).all(|w| w[0] < w[1]));

    let mut dropped_events = 0;
    let mut finished = false;
    while let Ok(event) = events.try_recv() {
        match event {
            CaptureEvent::Warning(_) => dropped_events += 1,
            CaptureEvent::Finished { archive, .. } => finished = archive.is_some(),
            _ => {}
        }
    }
    assert_eq!(dropped_events, counters.dropped);
    assert!(finished);
}

#[test]
fn test_interrupt_still_writes_archive() {
    let dir = tempfile::tempdir().unwrap();
    let mut camera = camera();
    let (engine, _events) = CaptureEngine::new(
        CaptureType::Multiple,
        &Config::default(),
        SessionSnapshot::from_camera(&camera),
    );
    let session = CaptureSession::new(vec![Modality::Depth], dir.path().into())
        .with_base_name("interrupted")
        .with_target(1000);
    let archive = session.archive_path();
    engine.start(session).unwrap();

    for _ in 0..3 {
        engine.push_frame(camera.next_bundle().unwrap());
    }
    engine.interrupt();
    engine.wait();

    assert_eq!(engine.state(), CaptureState::Idle);
    let parser = ArchiveParser::open(&archive).unwrap();
    assert!(parser.frame_count() <= 3);
    assert_eq!(parser.frame_count(), engine.counters().captured);
}

#[test]
fn test_restart_after_finish() {
    let dir = tempfile::tempdir().unwrap();
    let mut camera = camera();
    let (engine, _events) = CaptureEngine::new(
        CaptureType::Multiple,
        &Config::default(),
        SessionSnapshot::from_camera(&camera),
    );

    for name in ["first", "second"] {
        let session = CaptureSession::new(vec![Modality::Rgb], dir.path().into())
            .with_base_name(name)
            .with_target(2);
        engine.start(session).unwrap();
        for _ in 0..2 {
            engine.push_frame(camera.next_bundle().unwrap());
        }
        engine.wait();
        assert_eq!(engine.counters().captured, 2);
        assert!(dir.path().join(format!("{}.zip", name)).exists());
    }
}
