// SPDX-License-Identifier: GPL-3.0-only

//! Bounded frame queue with drop-newest admission

use super::counters::CaptureCounters;
use crate::processing::ProcessedFrame;
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};

/// Outcome of offering a frame to the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Queued for saving
    Accepted,
    /// Rejected because the queue was full; counted as dropped
    Dropped,
    /// Ignored: session target already met or no session running
    Discarded,
    /// Kept as the most recent frame for a single capture
    Cached,
}

/// Producer half of the capture queue
#[derive(Debug, Clone)]
pub struct FrameQueue {
    sender: SyncSender<ProcessedFrame>,
    target: usize,
}

impl FrameQueue {
    /// Queue holding at most `capacity` frames for a session of `target` frames
    pub fn bounded(capacity: usize, target: usize) -> (Self, Receiver<ProcessedFrame>) {
        let (sender, receiver) = mpsc::sync_channel(capacity.max(1));
        (Self { sender, target }, receiver)
    }

    pub fn target(&self) -> usize {
        self.target
    }

    /// Try to enqueue without blocking
    ///
    /// Must be called with the session counters locked so that
    /// `accepted + dropped` never exceeds the target.
    pub fn offer(&self, frame: ProcessedFrame, counters: &mut CaptureCounters) -> Admission {
        if counters.accepted + counters.dropped >= self.target {
            return Admission::Discarded;
        }
        match self.sender.try_send(frame) {
            Ok(()) => {
                counters.accepted += 1;
                Admission::Accepted
            }
            Err(TrySendError::Full(_)) => {
                counters.dropped += 1;
                Admission::Dropped
            }
            Err(TrySendError::Disconnected(_)) => Admission::Discarded,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::virtual_camera::{SyntheticCamera, VirtualCameraConfig};

    fn frames(n: usize) -> Vec<ProcessedFrame> {
        let mut camera = SyntheticCamera::new(VirtualCameraConfig {
            depth_width: 8,
            depth_height: 8,
            with_color: false,
            ..Default::default()
        });
        (0..n)
            .map(|_| ProcessedFrame::raw(camera.next_bundle().unwrap()))
            .collect()
    }

    #[test]
    fn test_burst_drops_overflow() {
        let capacity = 4;
        let (queue, receiver) = FrameQueue::bounded(capacity, 100);
        let mut counters = CaptureCounters::default();

        let outcomes: Vec<Admission> = frames(capacity + 5)
            .into_iter()
            .map(|f| queue.offer(f, &mut counters))
            .collect();

        assert_eq!(counters.accepted, capacity);
        assert_eq!(counters.dropped, 5);
        assert!(outcomes[..capacity].iter().all(|&a| a == Admission::Accepted));
        assert!(outcomes[capacity..].iter().all(|&a| a == Admission::Dropped));
        assert_eq!(receiver.try_iter().count(), capacity);
    }

    #[test]
    fn test_target_bounds_accepted_plus_dropped() {
        let (queue, receiver) = FrameQueue::bounded(2, 5);
        let mut counters = CaptureCounters::default();

        for (i, frame) in frames(12).into_iter().enumerate() {
            queue.offer(frame, &mut counters);
            // Consumer keeps up with every third frame
            if i % 3 == 0 {
                let _ = receiver.try_recv();
            }
            assert!(counters.accepted + counters.dropped <= 5);
        }
        assert_eq!(counters.accepted + counters.dropped, 5);
    }

    #[test]
    fn test_disconnected_queue_discards() {
        let (queue, receiver) = FrameQueue::bounded(2, 5);
        drop(receiver);
        let mut counters = CaptureCounters::default();
        let outcome = queue.offer(frames(1).remove(0), &mut counters);
        assert_eq!(outcome, Admission::Discarded);
        assert_eq!(counters, CaptureCounters::default());
    }
}
