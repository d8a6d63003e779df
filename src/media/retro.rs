//! Bounded FIFO of pooled samples with silent eviction

use std::collections::VecDeque;

use super::{Sample, SampleInfo, SamplePool};
use crate::error::{Result, RetroError};
use crate::sink::SampleSink;
use tracing::{debug, trace};

/// Retains the most recent encoded samples for retroactive capture
///
/// Holds at most `capacity` samples in arrival order. Inserting into a full
/// buffer drops the oldest sample first. The pool behind it has exactly
/// `capacity` slots, so the evicted slot and the slot being written are the
/// same one and no storage is allocated after construction.
pub struct RetroBuffer {
    pool: SamplePool,
    /// Pool indices, oldest first
    queue: VecDeque<usize>,
    capacity: usize,
    evicted: u64,
}

impl RetroBuffer {
    /// Create a buffer retaining `capacity` samples of up to `sample_capacity` bytes
    pub fn new(capacity: usize, sample_capacity: usize) -> Self {
        let pool = SamplePool::new(capacity, sample_capacity);
        let capacity = pool.len();

        debug!(
            "Retro buffer: {} samples x {} bytes",
            capacity, sample_capacity
        );

        Self {
            pool,
            queue: VecDeque::with_capacity(capacity),
            capacity,
            evicted: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Largest payload a single sample may carry
    pub fn sample_capacity(&self) -> usize {
        self.pool.sample_capacity()
    }

    /// Samples dropped by overflow since construction
    pub fn evicted(&self) -> u64 {
        self.evicted
    }

    /// Buffered samples, oldest first
    pub fn iter(&self) -> impl Iterator<Item = &Sample> + '_ {
        self.queue.iter().map(move |&index| self.pool.get(index))
    }

    pub fn oldest(&self) -> Option<&Sample> {
        self.queue.front().map(|&index| self.pool.get(index))
    }

    pub fn newest(&self) -> Option<&Sample> {
        self.queue.back().map(|&index| self.pool.get(index))
    }

    /// Copy a sample into the buffer, evicting the oldest when full
    ///
    /// Fails only when `payload` does not fit in a pool slot; the buffer is
    /// left untouched in that case.
    pub fn process(&mut self, payload: &[u8], info: &SampleInfo) -> Result<()> {
        let capacity = self.pool.sample_capacity();
        if payload.len() > capacity {
            return Err(RetroError::SampleTooLarge {
                size: payload.len(),
                capacity,
            });
        }

        if self.queue.len() == self.capacity {
            self.queue.pop_front();
            self.evicted += 1;
        }

        let index = self.pool.next().fill(payload, info);
        self.queue.push_back(index);

        trace!(
            "Buffered sample pts={} size={} ({} / {})",
            info.presentation_time_us,
            payload.len(),
            self.queue.len(),
            self.capacity
        );

        Ok(())
    }

    /// Forward every buffered sample, oldest first, and empty the buffer
    ///
    /// Returns the number of samples forwarded. If the sink fails, the
    /// remaining samples are dropped and the error is returned.
    pub fn drain<S: SampleSink + ?Sized>(&mut self, sink: &mut S) -> Result<usize> {
        self.drain_where(sink, false)
    }

    /// Like [`drain`](Self::drain), but skips everything before the first keyframe
    ///
    /// The forwarded sequence always starts at a keyframe. Without any
    /// buffered keyframe nothing is forwarded and the buffer is still emptied.
    pub fn drain_from_keyframe<S: SampleSink + ?Sized>(&mut self, sink: &mut S) -> Result<usize> {
        self.drain_where(sink, true)
    }

    fn drain_where<S: SampleSink + ?Sized>(
        &mut self,
        sink: &mut S,
        align_to_keyframe: bool,
    ) -> Result<usize> {
        let mut reached_keyframe = !align_to_keyframe;
        let mut skipped = 0usize;
        let mut forwarded = 0usize;

        while let Some(index) = self.queue.pop_front() {
            let sample = self.pool.get(index);

            if !reached_keyframe {
                if sample.is_keyframe() {
                    reached_keyframe = true;
                } else {
                    skipped += 1;
                    continue;
                }
            }

            if let Err(e) = sink.process(sample.payload(), sample.info()) {
                self.queue.clear();
                return Err(e);
            }
            forwarded += 1;
        }

        debug!(
            "Drained {} samples to '{}' ({} skipped before keyframe)",
            forwarded,
            sink.name(),
            skipped
        );

        Ok(forwarded)
    }

    /// Drop all buffered samples without forwarding them
    pub fn clear(&mut self) {
        self.queue.clear();
    }
}

impl SampleSink for RetroBuffer {
    fn name(&self) -> &str {
        "retro-buffer"
    }

    fn process(&mut self, payload: &[u8], info: &SampleInfo) -> Result<()> {
        RetroBuffer::process(self, payload, info)
    }
}

impl std::fmt::Debug for RetroBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetroBuffer")
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .field("evicted", &self.evicted)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::SampleFlags;
    use crate::sink::tests::CollectingSink;

    fn info(pts: i64, flags: SampleFlags) -> SampleInfo {
        SampleInfo::new(0, 1, pts, flags)
    }

    fn push(buffer: &mut RetroBuffer, pts: i64, flags: SampleFlags) {
        buffer.process(&[pts as u8], &info(pts, flags)).unwrap();
    }

    #[test]
    fn test_overflow_evicts_oldest() {
        let capacity = 4;
        let mut buffer = RetroBuffer::new(capacity, 8);

        for pts in 1..=(capacity as i64 + 1) {
            push(&mut buffer, pts, SampleFlags::NONE);
        }

        assert_eq!(buffer.len(), capacity);
        assert_eq!(buffer.evicted(), 1);
        let pts: Vec<i64> = buffer
            .iter()
            .map(|s| s.info().presentation_time_us)
            .collect();
        assert_eq!(pts, vec![2, 3, 4, 5]);
    }

    #[test]
    fn test_drain_in_insertion_order() {
        let mut buffer = RetroBuffer::new(8, 8);
        for pts in [10, 20, 30] {
            push(&mut buffer, pts, SampleFlags::NONE);
        }

        let mut sink = CollectingSink::default();
        assert_eq!(buffer.drain(&mut sink).unwrap(), 3);

        assert_eq!(sink.pts(), vec![10, 20, 30]);
        assert_eq!(buffer.len(), 0);
    }

    #[test]
    fn test_drain_empty_is_noop() {
        let mut buffer = RetroBuffer::new(4, 8);
        let mut sink = CollectingSink::default();

        assert_eq!(buffer.drain(&mut sink).unwrap(), 0);
        assert_eq!(sink.len(), 0);
    }

    #[test]
    fn test_keyframe_drain_starts_at_keyframe() {
        let mut buffer = RetroBuffer::new(8, 8);
        push(&mut buffer, 1, SampleFlags::NONE);
        push(&mut buffer, 2, SampleFlags::NONE);
        push(&mut buffer, 3, SampleFlags::KEYFRAME);
        push(&mut buffer, 4, SampleFlags::NONE);
        push(&mut buffer, 5, SampleFlags::NONE);

        let mut sink = CollectingSink::default();
        assert_eq!(buffer.drain_from_keyframe(&mut sink).unwrap(), 3);

        assert_eq!(sink.pts(), vec![3, 4, 5]);
        assert!(sink.samples.lock()[0].info.is_keyframe());
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_keyframe_drain_without_keyframe_forwards_nothing() {
        let mut buffer = RetroBuffer::new(8, 8);
        push(&mut buffer, 1, SampleFlags::NONE);
        push(&mut buffer, 2, SampleFlags::NONE);

        let mut sink = CollectingSink::default();
        assert_eq!(buffer.drain_from_keyframe(&mut sink).unwrap(), 0);

        assert_eq!(sink.len(), 0);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_keyframe_drain_keeps_later_keyframes() {
        let mut buffer = RetroBuffer::new(8, 8);
        push(&mut buffer, 1, SampleFlags::KEYFRAME);
        push(&mut buffer, 2, SampleFlags::NONE);
        push(&mut buffer, 3, SampleFlags::KEYFRAME);

        let mut sink = CollectingSink::default();
        buffer.drain_from_keyframe(&mut sink).unwrap();

        assert_eq!(sink.pts(), vec![1, 2, 3]);
    }

    #[test]
    fn test_clear_then_drain_is_empty() {
        let mut buffer = RetroBuffer::new(3, 8);
        for pts in 0..5 {
            push(&mut buffer, pts, SampleFlags::KEYFRAME);
        }

        buffer.clear();

        let mut sink = CollectingSink::default();
        assert_eq!(buffer.drain(&mut sink).unwrap(), 0);
        assert_eq!(sink.len(), 0);
    }

    #[test]
    fn test_pool_storage_reused_after_wraparound() {
        let capacity = 3;
        let mut buffer = RetroBuffer::new(capacity, 8);

        push(&mut buffer, 0, SampleFlags::NONE);
        let first_ptr = buffer.newest().unwrap().storage_ptr();

        for pts in 1..capacity as i64 {
            push(&mut buffer, pts, SampleFlags::NONE);
            assert_ne!(buffer.newest().unwrap().storage_ptr(), first_ptr);
        }

        push(&mut buffer, capacity as i64, SampleFlags::NONE);
        assert_eq!(buffer.newest().unwrap().storage_ptr(), first_ptr);
    }

    #[test]
    fn test_round_trip_preserves_sample() {
        let mut buffer = RetroBuffer::new(2, 256);
        let payload: Vec<u8> = (0..128u32).map(|i| (i * 7) as u8).collect();
        let info = SampleInfo::new(0, 128, 1000, SampleFlags::KEYFRAME);

        buffer.process(&payload, &info).unwrap();

        let mut sink = CollectingSink::default();
        buffer.drain(&mut sink).unwrap();

        let samples = sink.samples.lock();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].info.size, 128);
        assert_eq!(samples[0].info.presentation_time_us, 1000);
        assert_eq!(samples[0].info.flags, SampleFlags::KEYFRAME);
        assert_eq!(samples[0].data, payload);
    }

    #[test]
    fn test_oversize_sample_rejected_without_side_effects() {
        let mut buffer = RetroBuffer::new(2, 4);
        push(&mut buffer, 1, SampleFlags::KEYFRAME);

        let err = buffer
            .process(&[0u8; 5], &info(2, SampleFlags::NONE))
            .unwrap_err();

        assert!(matches!(
            err,
            RetroError::SampleTooLarge {
                size: 5,
                capacity: 4
            }
        ));
        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer.oldest().unwrap().info().presentation_time_us, 1);
    }

    #[test]
    fn test_eviction_after_partial_drain_keeps_order() {
        let mut buffer = RetroBuffer::new(3, 8);
        push(&mut buffer, 1, SampleFlags::NONE);
        push(&mut buffer, 2, SampleFlags::NONE);

        let mut sink = CollectingSink::default();
        buffer.drain(&mut sink).unwrap();

        for pts in 3..=7 {
            push(&mut buffer, pts, SampleFlags::NONE);
        }

        let mut sink = CollectingSink::default();
        buffer.drain(&mut sink).unwrap();
        assert_eq!(sink.pts(), vec![5, 6, 7]);
    }
}
