// SPDX-License-Identifier: GPL-3.0-only

//! Capture engine
//!
//! ```text
//!  camera thread            consumer thread             save workers
//! ┌─────────────┐  offer  ┌────────────────┐  spawn   ┌──────────────┐
//! │ push_frame  │ ──────▶ │ dequeue+number │ ───────▶ │ OutputSaver  │
//! └─────────────┘ bounded └───────┬────────┘          └──────┬───────┘
//!                  queue          │ join all                 │ counters
//!                                 ▼                          ▼
//!                         ┌────────────────┐
//!                         │ ArchiveWriter  │
//!                         └────────────────┘
//! ```
//!
//! States run `Idle → Capturing → Finishing → Idle`. A single capture skips
//! the queue and hands the most recent frame to the caller.

mod counters;
mod queue;
mod saver;

pub use counters::{CaptureCounters, SequenceIndices};
pub use queue::{Admission, FrameQueue};
pub use saver::OutputSaver;

use crate::backends::camera::{FrameBundle, Modality, SessionSnapshot};
use crate::config::{CaptureConfig, Config, PointCloudConfig, SaveFormat};
use crate::errors::{CaptureError, CaptureResult};
use crate::pipelines::archive::{
    self, ArchiveManifest, ArchiveWriter, default_base_name,
};
use crate::processing::ProcessedFrame;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureType {
    /// Most recent frame only, no archive
    Single,
    /// Queue, worker pool and archive
    Multiple,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    Capturing,
    Finishing,
}

/// Engine notifications
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureEvent {
    Started {
        capture_type: CaptureType,
        target: usize,
    },
    NumberUpdated {
        captured: usize,
        dropped: usize,
    },
    Warning(String),
    Error(CaptureError),
    Finished {
        message: String,
        archive: Option<PathBuf>,
    },
}

/// What a capture run records and where
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureSession {
    pub target_frames: usize,
    pub modalities: Vec<Modality>,
    pub save_format: SaveFormat,
    pub output_dir: PathBuf,
    pub base_name: String,
    pub with_texture: bool,
    pub point_cloud: PointCloudConfig,
}

impl CaptureSession {
    pub fn new(modalities: Vec<Modality>, output_dir: PathBuf) -> Self {
        Self {
            target_frames: 1,
            modalities,
            save_format: SaveFormat::default(),
            output_dir,
            base_name: default_base_name(),
            with_texture: true,
            point_cloud: PointCloudConfig::default(),
        }
    }

    /// Session defaults taken from the configuration
    pub fn from_config(config: &Config, modalities: Vec<Modality>) -> Self {
        Self {
            save_format: config.capture.save_format,
            with_texture: config.point_cloud.texture,
            point_cloud: config.point_cloud,
            ..Self::new(modalities, config.capture.resolved_output_dir())
        }
    }

    pub fn with_target(mut self, frames: usize) -> Self {
        self.target_frames = frames;
        self
    }

    pub fn with_save_format(mut self, format: SaveFormat) -> Self {
        self.save_format = format;
        self
    }

    pub fn with_base_name(mut self, name: impl Into<String>) -> Self {
        self.base_name = name.into();
        self
    }

    pub fn with_texture(mut self, texture: bool) -> Self {
        self.with_texture = texture;
        self
    }

    pub fn working_dir(&self) -> PathBuf {
        archive::working_dir(&self.output_dir, &self.base_name)
    }

    pub fn archive_path(&self) -> PathBuf {
        archive::archive_path(&self.output_dir, &self.base_name)
    }
}

/// State shared with the consumer thread and save tasks
struct Shared {
    state: Mutex<CaptureState>,
    counters: Mutex<CaptureCounters>,
    queue: Mutex<Option<FrameQueue>>,
    interrupted: AtomicBool,
    latest: Mutex<Option<ProcessedFrame>>,
    single_pending: AtomicBool,
    single_result: Mutex<Option<ProcessedFrame>>,
    events: UnboundedSender<CaptureEvent>,
}

impl Shared {
    fn emit(&self, event: CaptureEvent) {
        // Receiver may be gone; the engine keeps working without listeners
        let _ = self.events.send(event);
    }

    fn set_state(&self, state: CaptureState) {
        *lock(&self.state) = state;
    }

    fn counters(&self) -> MutexGuard<'_, CaptureCounters> {
        lock(&self.counters)
    }

    /// Bookkeeping of a finished save task
    fn save_finished(&self, frame: usize, result: CaptureResult<Vec<PathBuf>>) {
        let (captured, dropped) = {
            let mut counters = self.counters();
            match &result {
                Ok(_) => counters.captured += 1,
                Err(_) => counters.failed += 1,
            }
            (counters.captured, counters.dropped)
        };
        match result {
            Ok(files) => {
                debug!(frame, files = files.len(), "Frame saved");
                self.emit(CaptureEvent::NumberUpdated { captured, dropped });
            }
            Err(e) => {
                error!(frame, error = %e, "Failed to save frame");
                self.emit(CaptureEvent::Error(e));
            }
        }
    }
}

/// Poisoned locks only mean a save task panicked; the data is still usable
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct CaptureEngine {
    capture_type: CaptureType,
    config: CaptureConfig,
    snapshot: SessionSnapshot,
    shared: Arc<Shared>,
    consumer: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for CaptureEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureEngine")
            .field("capture_type", &self.capture_type)
            .field("state", &self.state())
            .finish()
    }
}

impl CaptureEngine {
    /// Create an idle engine and the receiver of its events
    pub fn new(
        capture_type: CaptureType,
        config: &Config,
        snapshot: SessionSnapshot,
    ) -> (Self, UnboundedReceiver<CaptureEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            state: Mutex::new(CaptureState::Idle),
            counters: Mutex::new(CaptureCounters::default()),
            queue: Mutex::new(None),
            interrupted: AtomicBool::new(false),
            latest: Mutex::new(None),
            single_pending: AtomicBool::new(false),
            single_result: Mutex::new(None),
            events,
        });
        let engine = Self {
            capture_type,
            config: config.capture.clone(),
            snapshot,
            shared,
            consumer: Mutex::new(None),
        };
        (engine, receiver)
    }

    pub fn capture_type(&self) -> CaptureType {
        self.capture_type
    }

    pub fn state(&self) -> CaptureState {
        *lock(&self.shared.state)
    }

    pub fn counters(&self) -> CaptureCounters {
        self.shared.counters().clone()
    }

    /// Frame exposed by the last single capture
    pub fn single_result(&self) -> Option<ProcessedFrame> {
        lock(&self.shared.single_result).clone()
    }

    /// Begin a capture run
    pub fn start(&self, session: CaptureSession) -> CaptureResult<()> {
        let mut state = lock(&self.shared.state);
        if *state != CaptureState::Idle {
            return Err(CaptureError::Data(format!(
                "capture already running ({:?})",
                *state
            )));
        }
        if session.modalities.is_empty() {
            return Err(CaptureError::Data("no modalities requested".to_string()));
        }

        self.shared.interrupted.store(false, Ordering::SeqCst);
        *self.shared.counters() = CaptureCounters::default();

        match self.capture_type {
            CaptureType::Single => {
                *lock(&self.shared.single_result) = None;
                *state = CaptureState::Capturing;
                drop(state);
                info!(base = %session.base_name, "Single capture started");
                self.shared.emit(CaptureEvent::Started {
                    capture_type: CaptureType::Single,
                    target: 1,
                });

                let cached = lock(&self.shared.latest).clone();
                match cached {
                    Some(frame) => complete_single(&self.shared, frame),
                    None => self.shared.single_pending.store(true, Ordering::SeqCst),
                }
                Ok(())
            }
            CaptureType::Multiple => {
                if session.target_frames == 0 {
                    return Err(CaptureError::Data(
                        "frame target of a multiple capture must be at least 1".to_string(),
                    ));
                }
                let work_dir = session.working_dir();
                std::fs::create_dir_all(&work_dir).map_err(|e| {
                    CaptureError::Resource(format!("cannot create {}: {}", work_dir.display(), e))
                })?;

                let workers = self.config.worker_count();
                let runtime = tokio::runtime::Builder::new_multi_thread()
                    .worker_threads(1)
                    .max_blocking_threads(workers)
                    .thread_name("capture-save")
                    .build()
                    .map_err(|e| CaptureError::Resource(format!("save worker pool: {}", e)))?;

                let (queue, receiver) =
                    FrameQueue::bounded(self.config.max_cached_frames, session.target_frames);
                *lock(&self.shared.queue) = Some(queue);

                let target = session.target_frames;
                let consumer = Consumer {
                    shared: Arc::clone(&self.shared),
                    receiver,
                    session: Arc::new(session),
                    snapshot: self.snapshot,
                    runtime,
                    poll_interval: self.config.poll_interval(),
                };

                *state = CaptureState::Capturing;
                drop(state);
                info!(
                    target,
                    workers,
                    capacity = self.config.max_cached_frames,
                    "Multiple capture started"
                );
                self.shared.emit(CaptureEvent::Started {
                    capture_type: CaptureType::Multiple,
                    target,
                });

                let handle = std::thread::Builder::new()
                    .name("capture-consumer".to_string())
                    .spawn(move || consumer.run())
                    .map_err(|e| {
                        *lock(&self.shared.queue) = None;
                        self.shared.set_state(CaptureState::Idle);
                        CaptureError::Resource(format!("consumer thread: {}", e))
                    })?;
                *lock(&self.consumer) = Some(handle);
                Ok(())
            }
        }
    }

    /// Offer a raw bundle
    pub fn push_frame(&self, bundle: FrameBundle) -> Admission {
        self.push_processed(ProcessedFrame::raw(bundle))
    }

    /// Offer a bundle together with outputs the processors already derived
    pub fn push_processed(&self, frame: ProcessedFrame) -> Admission {
        if frame.bundle.is_empty() {
            warn!("Ignoring empty frame");
            self.shared.emit(CaptureEvent::Warning("empty frame".to_string()));
            return Admission::Discarded;
        }

        match self.capture_type {
            CaptureType::Single => {
                if self.shared.single_pending.swap(false, Ordering::SeqCst) {
                    *lock(&self.shared.latest) = Some(frame.clone());
                    complete_single(&self.shared, frame);
                    Admission::Accepted
                } else {
                    *lock(&self.shared.latest) = Some(frame);
                    Admission::Cached
                }
            }
            CaptureType::Multiple => {
                let queue = lock(&self.shared.queue);
                let Some(queue) = queue.as_ref() else {
                    return Admission::Discarded;
                };
                let (admission, captured, dropped) = {
                    let mut counters = self.shared.counters();
                    let admission = queue.offer(frame, &mut counters);
                    (admission, counters.captured, counters.dropped)
                };
                if admission == Admission::Dropped {
                    warn!(dropped, "Capture queue full, frame dropped");
                    self.shared.emit(CaptureEvent::Warning(format!(
                        "frame dropped ({} so far)",
                        dropped
                    )));
                    self.shared
                        .emit(CaptureEvent::NumberUpdated { captured, dropped });
                }
                admission
            }
        }
    }

    /// Raise the interruption flag
    ///
    /// Frames already dequeued still finish saving and the archive is still
    /// written.
    pub fn interrupt(&self) {
        self.shared.interrupted.store(true, Ordering::SeqCst);
        if self.capture_type == CaptureType::Single
            && self.shared.single_pending.swap(false, Ordering::SeqCst)
        {
            self.shared.set_state(CaptureState::Idle);
            self.shared.emit(CaptureEvent::Finished {
                message: "Single capture interrupted before a frame arrived".to_string(),
                archive: None,
            });
        }
    }

    pub fn is_interrupted(&self) -> bool {
        self.shared.interrupted.load(Ordering::SeqCst)
    }

    /// Block until the running session is back to idle
    pub fn wait(&self) {
        let handle = lock(&self.consumer).take();
        if let Some(handle) = handle
            && handle.join().is_err()
        {
            error!("Capture consumer thread panicked");
            *lock(&self.shared.queue) = None;
            self.shared.set_state(CaptureState::Idle);
        }
    }
}

impl Drop for CaptureEngine {
    fn drop(&mut self) {
        if self.state() != CaptureState::Idle {
            self.interrupt();
        }
        self.wait();
    }
}

fn complete_single(shared: &Shared, frame: ProcessedFrame) {
    shared.set_state(CaptureState::Finishing);
    *lock(&shared.single_result) = Some(frame);
    {
        let mut counters = shared.counters();
        counters.accepted = 1;
        counters.captured = 1;
    }
    shared.set_state(CaptureState::Idle);
    info!("Single capture finished");
    shared.emit(CaptureEvent::NumberUpdated {
        captured: 1,
        dropped: 0,
    });
    shared.emit(CaptureEvent::Finished {
        message: "Captured 1 frame".to_string(),
        archive: None,
    });
}

/// Dequeue loop of a multiple capture
struct Consumer {
    shared: Arc<Shared>,
    receiver: Receiver<ProcessedFrame>,
    session: Arc<CaptureSession>,
    snapshot: SessionSnapshot,
    runtime: tokio::runtime::Runtime,
    poll_interval: Duration,
}

impl Consumer {
    fn run(self) {
        let saver = Arc::new(OutputSaver::new(
            Arc::clone(&self.session),
            self.session.working_dir(),
        ));
        let target = self.session.target_frames;
        let mut tasks = Vec::new();

        loop {
            if self.shared.interrupted.load(Ordering::SeqCst) {
                info!("Capture interrupted");
                break;
            }
            {
                let counters = self.shared.counters();
                if counters.dispatched + counters.dropped >= target {
                    break;
                }
            }

            let frame = match self.receiver.recv_timeout(self.poll_interval) {
                Ok(frame) => frame,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            };

            let (frame_number, indices) = {
                let mut counters = self.shared.counters();
                let number = counters.dispatched;
                (number, counters.assign(&frame.bundle, &self.session.modalities))
            };
            let saver = Arc::clone(&saver);
            let shared = Arc::clone(&self.shared);
            tasks.push(self.runtime.spawn_blocking(move || {
                let result = saver.save(&frame, &indices);
                shared.save_finished(frame_number, result);
            }));
        }

        // No more admissions; frames still queued are abandoned
        *lock(&self.shared.queue) = None;

        debug!(pending = tasks.len(), "Waiting for save tasks");
        for result in self.runtime.block_on(futures::future::join_all(tasks)) {
            if let Err(e) = result {
                error!(error = %e, "Save task panicked");
            }
        }

        self.shared.set_state(CaptureState::Finishing);
        let counters = self.shared.counters().clone();
        let manifest = ArchiveManifest::describe(
            &self.session.base_name,
            &self.session.modalities,
            self.session.save_format,
            self.session.with_texture,
            &self.snapshot,
            &counters.totals(),
        );
        let writer = ArchiveWriter::for_session(&self.session.output_dir, &self.session.base_name);

        let finished = match writer.write(&manifest, &counters.timestamps()) {
            Ok(path) => CaptureEvent::Finished {
                message: format!(
                    "Captured {} frames ({} dropped, {} failed)",
                    counters.captured, counters.dropped, counters.failed
                ),
                archive: Some(path),
            },
            Err(e) => {
                error!(error = %e, "Failed to assemble archive");
                self.shared.emit(CaptureEvent::Error(e.clone()));
                CaptureEvent::Finished {
                    message: format!("Archive assembly failed: {}", e),
                    archive: None,
                }
            }
        };

        self.shared.set_state(CaptureState::Idle);
        info!(
            captured = counters.captured,
            dropped = counters.dropped,
            failed = counters.failed,
            "Multiple capture finished"
        );
        self.shared.emit(finished);
    }
}
