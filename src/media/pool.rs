//! Pre-allocated sample pool cycled by index

use super::{Sample, SampleSlot};

/// Fixed set of samples handed out round-robin
///
/// All storage is allocated in [`SamplePool::new`]; `next` never allocates.
/// The pool is sized to match the retro buffer capacity, so the slot returned
/// by `next` is always the one the buffer evicts (or has just evicted).
pub struct SamplePool {
    samples: Box<[Sample]>,
    cursor: usize,
}

impl SamplePool {
    /// Create a pool of `count` samples, each able to hold `sample_capacity` bytes
    pub fn new(count: usize, sample_capacity: usize) -> Self {
        let count = count.max(1);
        let samples = (0..count)
            .map(|_| Sample::with_capacity(sample_capacity))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self { samples, cursor: 0 }
    }

    /// Number of slots
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Pools are never empty; kept for API symmetry with `len`
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Payload capacity of each slot
    pub fn sample_capacity(&self) -> usize {
        self.samples[0].capacity()
    }

    /// Index the next call to `next` will return
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Claim the slot at the cursor and advance it, wrapping around
    pub(crate) fn next(&mut self) -> SampleSlot<'_> {
        let index = self.cursor;
        self.cursor = (self.cursor + 1) % self.samples.len();
        SampleSlot::new(&mut self.samples[index], index)
    }

    /// Read a slot by index
    pub fn get(&self, index: usize) -> &Sample {
        &self.samples[index]
    }
}

impl std::fmt::Debug for SamplePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SamplePool")
            .field("len", &self.len())
            .field("sample_capacity", &self.sample_capacity())
            .field("cursor", &self.cursor)
            .finish()
    }
}
