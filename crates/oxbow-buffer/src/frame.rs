//! Buffer frame descriptors.

use parking_lot::{Mutex, MutexGuard};

/// Ceiling for the usage count consulted by the clock sweep. Pinning a frame
/// saturates at this value rather than growing without bound.
pub const MAX_USAGE_COUNT: u16 = 5;

/// Unique identifier for a frame in the buffer pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameId(pub u32);

impl FrameId {
    /// Invalid frame ID.
    pub const INVALID: FrameId = FrameId(u32::MAX);

    /// Returns true if this is a valid frame ID.
    pub fn is_valid(&self) -> bool {
        *self != Self::INVALID
    }

    /// Returns the frame ID as an array index.
    #[inline]
    pub fn as_usize(&self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for FrameId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "frame:{}", self.0)
    }
}

/// Mutable frame header state guarded by the per-frame lock.
#[derive(Debug, Default)]
pub struct FrameMeta {
    /// Number of active pins. A frame with pins cannot be evicted.
    pub refcount: u32,
    /// Soft touch counter consulted by the clock sweep.
    pub usage_count: u16,
}

/// Guard over a frame's header state. Victim selection returns frames with
/// this guard still held so no one else can pin them first.
pub type FrameGuard<'a> = MutexGuard<'a, FrameMeta>;

/// Descriptor for one frame of the buffer pool.
///
/// The descriptor carries only replacement-relevant bookkeeping; page
/// contents and the page-to-frame mapping belong to the buffer manager.
/// `refcount` and `usage_count` are guarded by the per-frame lock. The
/// free-list and queue links for a frame live in the pool-wide strategy
/// control, which owns their locking.
pub struct FrameDesc {
    frame_id: FrameId,
    meta: Mutex<FrameMeta>,
}

impl FrameDesc {
    /// Creates a new unpinned, untouched frame descriptor.
    pub fn new(frame_id: FrameId) -> Self {
        Self {
            frame_id,
            meta: Mutex::new(FrameMeta::default()),
        }
    }

    /// Returns the frame ID.
    #[inline]
    pub fn frame_id(&self) -> FrameId {
        self.frame_id
    }

    /// Acquires the frame header lock.
    #[inline]
    pub fn lock(&self) -> FrameGuard<'_> {
        self.meta.lock()
    }

    /// Returns the current pin count.
    #[inline]
    pub fn refcount(&self) -> u32 {
        self.meta.lock().refcount
    }

    /// Returns the current usage count.
    #[inline]
    pub fn usage_count(&self) -> u16 {
        self.meta.lock().usage_count
    }

    /// Pins the frame and bumps its usage count.
    ///
    /// Returns the new pin count.
    pub fn pin(&self) -> u32 {
        let mut meta = self.meta.lock();
        meta.refcount += 1;
        if meta.usage_count < MAX_USAGE_COUNT {
            meta.usage_count += 1;
        }
        meta.refcount
    }

    /// Drops one pin and returns the new pin count.
    ///
    /// When this returns 0 the caller is responsible for invoking
    /// `BufferStrategy::on_unpinned` so the frame becomes a replacement
    /// candidate.
    pub fn unpin(&self) -> u32 {
        let mut meta = self.meta.lock();
        if meta.refcount == 0 {
            // Underflow protection: stay at 0
            return 0;
        }
        meta.refcount -= 1;
        meta.refcount
    }

    /// Returns true if this frame is pinned.
    #[inline]
    pub fn is_pinned(&self) -> bool {
        self.meta.lock().refcount > 0
    }
}

impl std::fmt::Debug for FrameDesc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let meta = self.meta.lock();
        f.debug_struct("FrameDesc")
            .field("frame_id", &self.frame_id)
            .field("refcount", &meta.refcount)
            .field("usage_count", &meta.usage_count)
            .finish()
    }
}
