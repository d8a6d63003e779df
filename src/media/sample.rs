//! Fixed-capacity sample storage

use super::SampleInfo;

/// One pre-allocated slot holding an encoded payload and its metadata
///
/// The byte region is allocated once and reused for every frame written into
/// the slot. Contents are only meaningful after a full overwrite through
/// [`SampleSlot::fill`].
pub struct Sample {
    storage: Box<[u8]>,
    info: SampleInfo,
}

impl Sample {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            storage: vec![0u8; capacity].into_boxed_slice(),
            info: SampleInfo::default(),
        }
    }

    /// Maximum payload size this slot can hold
    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    /// Payload bytes of the last write
    pub fn payload(&self) -> &[u8] {
        &self.storage[..self.info.size]
    }

    pub fn info(&self) -> &SampleInfo {
        &self.info
    }

    pub fn is_keyframe(&self) -> bool {
        self.info.is_keyframe()
    }

    /// Address of the slot's backing storage, stable for the slot's lifetime
    pub fn storage_ptr(&self) -> *const u8 {
        self.storage.as_ptr()
    }
}

impl std::fmt::Debug for Sample {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sample")
            .field("capacity", &self.capacity())
            .field("info", &self.info)
            .finish()
    }
}

/// Write access to a freshly claimed pool slot
///
/// The previous contents of the slot are stale. The only way to mutate the
/// slot is [`fill`](SampleSlot::fill), which overwrites payload and metadata
/// together and consumes the handle.
pub struct SampleSlot<'a> {
    sample: &'a mut Sample,
    index: usize,
}

impl<'a> SampleSlot<'a> {
    pub(crate) fn new(sample: &'a mut Sample, index: usize) -> Self {
        Self { sample, index }
    }

    /// Pool index of this slot
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn capacity(&self) -> usize {
        self.sample.capacity()
    }

    /// Overwrite the slot with `payload` and `info`, returning the slot index
    ///
    /// The stored size is the payload length and the stored offset is 0,
    /// since the payload is copied to the start of the slot.
    ///
    /// # Panics
    /// Panics if `payload` is longer than the slot capacity. Callers check
    /// the size before claiming a slot.
    pub(crate) fn fill(self, payload: &[u8], info: &SampleInfo) -> usize {
        let size = payload.len();
        self.sample.storage[..size].copy_from_slice(payload);
        self.sample.info = SampleInfo {
            offset: 0,
            size,
            presentation_time_us: info.presentation_time_us,
            flags: info.flags,
        };
        self.index
    }
}
