// SPDX-License-Identifier: GPL-3.0-only
//! Producer thread delivering frame bundles
//!
//! The camera/streaming side of the pipeline is a pure producer: it pulls
//! bundles from a source and hands each one to a sink (usually
//! [`CaptureEngine::push_frame`](crate::pipelines::capture::CaptureEngine::push_frame)).

use super::types::FrameBundle;
use crate::errors::CaptureResult;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Consecutive source failures after which the loop gives up
const MAX_CONSECUTIVE_ERRORS: u32 = 10;

/// Action returned by the sink to control loop behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopAction {
    /// Keep producing frames
    Continue,
    /// Stop the loop gracefully
    Stop,
}

/// Controller for a frame producer running in its own thread
pub struct FrameLoopController {
    thread_handle: Option<JoinHandle<u64>>,
    stop_signal: Arc<AtomicBool>,
    name: String,
}

impl FrameLoopController {
    /// Start producing frames
    ///
    /// `source` is polled for the next bundle; `sink` receives it. With a
    /// `pace`, the loop sleeps so that bundles are produced at most once per
    /// interval.
    pub fn start<S, F>(name: &str, pace: Option<Duration>, mut source: S, mut sink: F) -> Self
    where
        S: FnMut() -> CaptureResult<FrameBundle> + Send + 'static,
        F: FnMut(FrameBundle) -> LoopAction + Send + 'static,
    {
        let stop_signal = Arc::new(AtomicBool::new(false));
        let stop = Arc::clone(&stop_signal);
        let loop_name = name.to_string();

        info!(name = %name, "Starting frame loop");

        let thread_handle = thread::spawn(move || {
            let mut produced = 0u64;
            let mut consecutive_errors = 0u32;

            while !stop.load(Ordering::SeqCst) {
                let started = Instant::now();

                match source() {
                    Ok(bundle) => {
                        consecutive_errors = 0;
                        produced += 1;
                        if sink(bundle) == LoopAction::Stop {
                            debug!(name = %loop_name, "Sink requested stop");
                            break;
                        }
                    }
                    Err(e) => {
                        consecutive_errors += 1;
                        warn!(name = %loop_name, error = %e, "Frame source failed");
                        if consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
                            warn!(name = %loop_name, "Too many source failures, stopping");
                            break;
                        }
                    }
                }

                if let Some(interval) = pace
                    && let Some(rest) = interval.checked_sub(started.elapsed())
                {
                    thread::sleep(rest);
                }
            }

            info!(name = %loop_name, produced, "Frame loop exiting");
            produced
        });

        Self {
            thread_handle: Some(thread_handle),
            stop_signal,
            name: name.to_string(),
        }
    }

    /// Check if the loop is still running
    pub fn is_running(&self) -> bool {
        self.thread_handle
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Signal the loop to stop (non-blocking)
    pub fn request_stop(&self) {
        debug!(name = %self.name, "Requesting frame loop stop");
        self.stop_signal.store(true, Ordering::SeqCst);
    }

    /// Stop the loop and wait for it, returning the number of frames produced
    pub fn stop(&mut self) -> u64 {
        self.request_stop();
        self.join()
    }

    /// Wait for the thread to finish without sending the stop signal
    pub fn join(&mut self) -> u64 {
        match self.thread_handle.take().map(|h| h.join()) {
            Some(Ok(produced)) => produced,
            Some(Err(e)) => {
                warn!(name = %self.name, "Frame loop thread panicked: {:?}", e);
                0
            }
            None => 0,
        }
    }
}

impl Drop for FrameLoopController {
    fn drop(&mut self) {
        if self.thread_handle.is_some() {
            self.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::virtual_camera::{SyntheticCamera, VirtualCameraConfig};
    use crate::errors::CaptureError;
    use std::sync::atomic::AtomicU32;

    #[test]
    fn test_sink_stops_loop() {
        let mut camera = SyntheticCamera::new(VirtualCameraConfig::default());
        let seen = Arc::new(AtomicU32::new(0));
        let seen_clone = Arc::clone(&seen);

        let mut controller = FrameLoopController::start(
            "test-loop",
            None,
            move || camera.next_bundle(),
            move |_| {
                if seen_clone.fetch_add(1, Ordering::SeqCst) >= 4 {
                    LoopAction::Stop
                } else {
                    LoopAction::Continue
                }
            },
        );

        assert_eq!(controller.join(), 5);
        assert_eq!(seen.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn test_failing_source_gives_up() {
        let mut controller = FrameLoopController::start(
            "test-failing",
            None,
            || Err(CaptureError::Data("no frame".to_string())),
            |_| LoopAction::Continue,
        );
        assert_eq!(controller.join(), 0);
        assert!(!controller.is_running());
    }

    #[test]
    fn test_stop_signal() {
        let mut camera = SyntheticCamera::new(VirtualCameraConfig::default());
        let mut controller = FrameLoopController::start(
            "test-paced",
            Some(Duration::from_millis(5)),
            move || camera.next_bundle(),
            |_| LoopAction::Continue,
        );
        thread::sleep(Duration::from_millis(30));
        assert!(controller.stop() > 0);
    }
}
