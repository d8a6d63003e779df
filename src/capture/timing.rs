//! Presentation timestamp gap tracking

use tracing::{trace, warn};

const MICROS_PER_SECOND: i64 = 1_000_000;

/// Detects frames missing from the encoder output
///
/// Compares consecutive presentation timestamps against the frame interval
/// of the playback rate and counts how many frames would fit in the gap.
pub struct FrameGapTracker {
    frame_rate: u32,
    last_pts_us: Option<i64>,
    skipped_total: u64,
}

impl FrameGapTracker {
    pub fn new(frame_rate: u32) -> Self {
        Self {
            frame_rate: frame_rate.max(1),
            last_pts_us: None,
            skipped_total: 0,
        }
    }

    /// Record a timestamp, returning the number of frames skipped before it
    pub fn observe(&mut self, pts_us: i64) -> u64 {
        let skipped = match self.last_pts_us {
            Some(last) if pts_us > last => {
                let frames = self.frame_rate as i64 * (pts_us - last) / MICROS_PER_SECOND - 1;
                frames.max(0) as u64
            }
            Some(last) => {
                trace!("Non-increasing pts {} after {}", pts_us, last);
                0
            }
            None => 0,
        };

        if skipped > 0 {
            warn!("Frames skipped: {}", skipped);
            self.skipped_total += skipped;
        }

        self.last_pts_us = Some(pts_us);
        skipped
    }

    /// Total frames skipped since construction or the last reset
    pub fn skipped_total(&self) -> u64 {
        self.skipped_total
    }

    pub fn last_pts_us(&self) -> Option<i64> {
        self.last_pts_us
    }

    /// Start over: forget the last timestamp and zero the total
    pub fn reset(&mut self) {
        self.last_pts_us = None;
        self.skipped_total = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_regular_cadence_skips_nothing() {
        let mut tracker = FrameGapTracker::new(30);
        for frame in 0..30 {
            assert_eq!(tracker.observe(frame * 33_334), 0);
        }
        assert_eq!(tracker.skipped_total(), 0);
    }

    #[test]
    fn test_gap_counts_missing_frames() {
        let mut tracker = FrameGapTracker::new(10);
        tracker.observe(0);
        // 400ms at 10fps = 4 intervals, 3 frames missing
        assert_eq!(tracker.observe(400_000), 3);
        assert_eq!(tracker.skipped_total(), 3);
    }

    #[test]
    fn test_backwards_pts_ignored() {
        let mut tracker = FrameGapTracker::new(10);
        tracker.observe(500_000);
        assert_eq!(tracker.observe(100_000), 0);
        assert_eq!(tracker.last_pts_us(), Some(100_000));
    }

    #[test]
    fn test_reset_starts_new_run() {
        let mut tracker = FrameGapTracker::new(10);
        tracker.observe(0);
        tracker.observe(500_000);
        assert_eq!(tracker.skipped_total(), 4);

        tracker.reset();
        assert_eq!(tracker.skipped_total(), 0);
        assert_eq!(tracker.observe(10_000_000), 0);
        assert_eq!(tracker.skipped_total(), 0);
    }
}
