// SPDX-License-Identifier: GPL-3.0-only

//! Per-stream timestamp lists (`timestamps.txt`)
//!
//! ```text
//! [Depth Time Stamps]
//! 0000 = 1000000
//! 0001 = 1033333
//! [RGB Time Stamps]
//! 0000 = 1001200
//! ```

use crate::constants::archive::{
    DEPTH_TIMESTAMPS_HEADER, INDEX_DIGITS, INVALID_TIMESTAMP_RATIO, RGB_TIMESTAMPS_HEADER,
    TIMESTAMP_SAMPLE_COUNT,
};
use crate::errors::{CaptureError, CaptureResult};
use std::fmt::Write;

/// Depth and color timestamps indexed by per-stream sequence number
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimestampLists {
    pub depth: Vec<u64>,
    pub rgb: Vec<u64>,
}

#[derive(Clone, Copy)]
enum Section {
    Depth,
    Rgb,
}

impl TimestampLists {
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        for (header, list) in [
            (DEPTH_TIMESTAMPS_HEADER, &self.depth),
            (RGB_TIMESTAMPS_HEADER, &self.rgb),
        ] {
            out.push_str(header);
            out.push('\n');
            for (i, ts) in list.iter().enumerate() {
                let _ = writeln!(out, "{:0width$} = {}", i, ts, width = INDEX_DIGITS);
            }
        }
        out
    }

    pub fn parse(text: &str) -> CaptureResult<Self> {
        let mut lists = Self::default();
        let mut section = None;

        for (line_no, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() {
                continue;
            }
            if line == DEPTH_TIMESTAMPS_HEADER {
                section = Some(Section::Depth);
                continue;
            }
            if line == RGB_TIMESTAMPS_HEADER {
                section = Some(Section::Rgb);
                continue;
            }

            let bad_line = || {
                CaptureError::Format(format!("timestamps line {}: {:?}", line_no + 1, raw))
            };
            let section = section.ok_or_else(bad_line)?;
            let (index, value) = line.split_once('=').ok_or_else(bad_line)?;
            let index: usize = index.trim().parse().map_err(|_| bad_line())?;
            let value: u64 = value.trim().parse().map_err(|_| bad_line())?;

            let list = match section {
                Section::Depth => &mut lists.depth,
                Section::Rgb => &mut lists.rgb,
            };
            // Indices are dense and ascending, one entry per saved frame
            if index != list.len() {
                return Err(CaptureError::Format(format!(
                    "timestamps line {}: index {} out of sequence, expected {}",
                    line_no + 1,
                    index,
                    list.len()
                )));
            }
            list.push(value);
        }

        Ok(lists)
    }

    /// Whether the depth timestamps can be trusted for cross-stream alignment
    pub fn is_valid(&self) -> bool {
        timestamps_valid(&self.depth)
    }
}

/// Sample the leading timestamps; too many zeros means the clock was not running
pub fn timestamps_valid(timestamps: &[u64]) -> bool {
    let sample = &timestamps[..timestamps.len().min(TIMESTAMP_SAMPLE_COUNT)];
    if sample.is_empty() {
        return false;
    }
    let zeros = sample.iter().filter(|&&t| t == 0).count();
    (zeros as f64 / sample.len() as f64) < INVALID_TIMESTAMP_RATIO
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_layout() {
        let lists = TimestampLists {
            depth: vec![10, 20],
            rgb: vec![15],
        };
        assert_eq!(
            lists.to_text(),
            "[Depth Time Stamps]\n0000 = 10\n0001 = 20\n[RGB Time Stamps]\n0000 = 15\n"
        );
        assert_eq!(TimestampLists::parse(&lists.to_text()).unwrap(), lists);
    }

    #[test]
    fn test_line_outside_section_rejected() {
        assert!(TimestampLists::parse("0000 = 5\n").is_err());
        assert!(TimestampLists::parse("[Depth Time Stamps]\nzero = x\n").is_err());
    }

    #[test]
    fn test_index_out_of_sequence_rejected() {
        let huge = TimestampLists::parse("[Depth Time Stamps]\n99999999999999999 = 5\n");
        assert!(matches!(huge, Err(CaptureError::Format(_))));

        let gap = TimestampLists::parse("[Depth Time Stamps]\n0000 = 5\n0002 = 7\n");
        assert!(matches!(gap, Err(CaptureError::Format(_))));

        let reversed = TimestampLists::parse("[RGB Time Stamps]\n0001 = 5\n0000 = 7\n");
        assert!(matches!(reversed, Err(CaptureError::Format(_))));

        // Each section numbers from zero on its own
        let lists =
            TimestampLists::parse("[Depth Time Stamps]\n0000 = 5\n[RGB Time Stamps]\n0000 = 6\n")
                .unwrap();
        assert_eq!(lists.depth, vec![5]);
        assert_eq!(lists.rgb, vec![6]);
    }

    #[test]
    fn test_validity_threshold() {
        // 4 of 20 zero: 20% is still valid
        let mut ts: Vec<u64> = (1..=20).collect();
        for t in ts.iter_mut().take(4) {
            *t = 0;
        }
        assert!(timestamps_valid(&ts));

        // 5 of 20 zero: 25% is invalid
        ts[4] = 0;
        assert!(!timestamps_valid(&ts));
    }

    #[test]
    fn test_only_leading_samples_count() {
        let mut ts: Vec<u64> = (1..=20).collect();
        ts.extend(std::iter::repeat_n(0, 100));
        assert!(timestamps_valid(&ts));
        assert!(!timestamps_valid(&[]));
    }
}
