//! Per-scan ring strategies.
//!
//! A bulk scan that charged through the main pool would evict the whole
//! working set behind it. A [`ScanRing`] confines such a scan to a small
//! rotating set of frames: victim selection consults the ring first and only
//! falls back to the shared pool when the current slot is empty or its frame
//! has been touched by someone else.

use crate::frame::{FrameDesc, FrameGuard, FrameId};
use oxbow_common::{OxbowError, PAGE_SIZE};

/// How a caller intends to access the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessKind {
    /// Ordinary page access; no ring, the default pool path is used.
    Normal,
    /// Large read-only scan.
    BulkRead,
    /// Large write, e.g. loading a table.
    BulkWrite,
    /// Vacuum-style maintenance scan.
    Vacuum,
}

impl TryFrom<u8> for AccessKind {
    type Error = OxbowError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(AccessKind::Normal),
            1 => Ok(AccessKind::BulkRead),
            2 => Ok(AccessKind::BulkWrite),
            3 => Ok(AccessKind::Vacuum),
            other => Err(OxbowError::UnrecognizedAccessStrategy(other as i32)),
        }
    }
}

/// A caller-private rotating set of frames backing one bulk scan.
///
/// Slots fill lazily: a miss sends the caller to the shared pool, and the
/// frame the pool hands back is stored into the missed slot. Dropping the
/// ring releases nothing but the slot array; the frames themselves stay in
/// the pool.
pub struct ScanRing {
    kind: AccessKind,
    /// Frame per slot; `FrameId::INVALID` marks a slot not yet filled.
    slots: Box<[FrameId]>,
    /// Most recently used slot index.
    current: usize,
    /// True if the last victim handed out came from the ring itself.
    current_was_in_ring: bool,
}

impl ScanRing {
    /// Creates the ring for the given access kind, or `None` for
    /// [`AccessKind::Normal`], which uses the default pool path directly.
    ///
    /// Ring sizes come from fixed byte budgets over the page size: 256 KiB
    /// for bulk reads and vacuums, 16 MiB for bulk writes, never more than
    /// an eighth of the pool.
    pub fn new(kind: AccessKind, n_buffers: usize) -> Option<Self> {
        let bytes = match kind {
            AccessKind::Normal => return None,
            AccessKind::BulkRead | AccessKind::Vacuum => 256 * 1024,
            AccessKind::BulkWrite => 16 * 1024 * 1024,
        };
        let ring_size = (bytes / PAGE_SIZE).min(n_buffers / 8);

        Some(Self {
            kind,
            slots: vec![FrameId::INVALID; ring_size].into_boxed_slice(),
            current: 0,
            current_was_in_ring: false,
        })
    }

    /// Returns the access kind this ring was built for.
    pub fn kind(&self) -> AccessKind {
        self.kind
    }

    /// Returns the number of slots in the ring.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Advances the cursor and tries to reuse the frame in the new current
    /// slot. Returns the frame with its header lock held, or `None` if the
    /// caller must fall back to the shared pool (which will then fill the
    /// slot via [`ScanRing::push`]).
    ///
    /// A frame is only reusable while nobody has it pinned and its usage
    /// count is at most 1; usage 1 is our own previous touch, anything
    /// higher means another backend found the page useful.
    pub(crate) fn buffer_from_ring<'a>(
        &mut self,
        frames: &'a [FrameDesc],
    ) -> Option<(FrameId, FrameGuard<'a>)> {
        if self.slots.is_empty() {
            self.current_was_in_ring = false;
            return None;
        }

        self.current += 1;
        if self.current >= self.slots.len() {
            self.current = 0;
        }

        let id = self.slots[self.current];
        if !id.is_valid() {
            self.current_was_in_ring = false;
            return None;
        }

        let meta = frames[id.as_usize()].lock();
        if meta.refcount == 0 && meta.usage_count <= 1 {
            self.current_was_in_ring = true;
            return Some((id, meta));
        }
        drop(meta);

        self.current_was_in_ring = false;
        None
    }

    /// Stores a pool-allocated frame into the current slot.
    pub(crate) fn push(&mut self, id: FrameId) {
        if self.slots.is_empty() {
            return;
        }
        self.slots[self.current] = id;
    }

    /// Considers dropping a dirty victim instead of writing it out.
    ///
    /// Bulk reads would rather take a different frame than stall on a WAL
    /// flush, so if the rejected frame is the ring's own current choice the
    /// slot is cleared and the caller is told to pick another victim
    /// (returns true). Every other access kind writes and re-uses the frame
    /// (returns false).
    pub fn reject_buffer(&mut self, id: FrameId) -> bool {
        if self.kind != AccessKind::BulkRead {
            return false;
        }
        if !self.current_was_in_ring || self.slots[self.current] != id {
            return false;
        }

        // Clearing the slot also prevents an infinite loop when every ring
        // member is dirty.
        self.slots[self.current] = FrameId::INVALID;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frames(n: usize) -> Vec<FrameDesc> {
        (0..n).map(|i| FrameDesc::new(FrameId(i as u32))).collect()
    }

    #[test]
    fn test_normal_kind_has_no_ring() {
        assert!(ScanRing::new(AccessKind::Normal, 1024).is_none());
    }

    #[test]
    fn test_ring_sizes_from_byte_budgets() {
        // 256 KiB / 16 KiB pages = 16 slots
        let bulkread = ScanRing::new(AccessKind::BulkRead, 1024).unwrap();
        assert_eq!(bulkread.capacity(), 16);

        let vacuum = ScanRing::new(AccessKind::Vacuum, 1024).unwrap();
        assert_eq!(vacuum.capacity(), 16);

        // 16 MiB / 16 KiB pages = 1024 slots
        let bulkwrite = ScanRing::new(AccessKind::BulkWrite, 65536).unwrap();
        assert_eq!(bulkwrite.capacity(), 1024);
    }

    #[test]
    fn test_ring_capped_at_eighth_of_pool() {
        let ring = ScanRing::new(AccessKind::BulkRead, 32).unwrap();
        assert_eq!(ring.capacity(), 4);
    }

    #[test]
    fn test_empty_slot_is_a_miss() {
        let pool = frames(32);
        let mut ring = ScanRing::new(AccessKind::BulkRead, 32).unwrap();

        assert!(ring.buffer_from_ring(&pool).is_none());
    }

    #[test]
    fn test_push_then_hit() {
        let pool = frames(32);
        let mut ring = ScanRing::new(AccessKind::BulkRead, 32).unwrap();

        // Miss advances to slot 1; pool path fills it.
        assert!(ring.buffer_from_ring(&pool).is_none());
        ring.push(FrameId(7));

        // Our own use leaves usage_count at 1, which is still reusable.
        pool[7].pin();
        pool[7].unpin();

        // Come back around the ring to the same slot.
        for _ in 0..ring.capacity() - 1 {
            assert!(ring.buffer_from_ring(&pool).is_none());
        }
        let (id, meta) = ring.buffer_from_ring(&pool).unwrap();
        assert_eq!(id, FrameId(7));
        assert_eq!(meta.refcount, 0);
    }

    #[test]
    fn test_pinned_frame_is_a_miss() {
        let pool = frames(32);
        let mut ring = ScanRing::new(AccessKind::BulkRead, 32).unwrap();

        assert!(ring.buffer_from_ring(&pool).is_none());
        ring.push(FrameId(3));
        pool[3].pin();

        for _ in 0..ring.capacity() - 1 {
            assert!(ring.buffer_from_ring(&pool).is_none());
        }
        assert!(ring.buffer_from_ring(&pool).is_none());
    }

    #[test]
    fn test_hot_frame_is_a_miss() {
        let pool = frames(32);
        let mut ring = ScanRing::new(AccessKind::BulkRead, 32).unwrap();

        assert!(ring.buffer_from_ring(&pool).is_none());
        ring.push(FrameId(3));

        // Someone else touched the frame twice; leave it to the main pool.
        pool[3].pin();
        pool[3].pin();
        pool[3].unpin();
        pool[3].unpin();
        assert_eq!(pool[3].usage_count(), 2);

        for _ in 0..ring.capacity() - 1 {
            assert!(ring.buffer_from_ring(&pool).is_none());
        }
        assert!(ring.buffer_from_ring(&pool).is_none());
    }

    #[test]
    fn test_reject_buffer_clears_current_slot() {
        let pool = frames(32);
        let mut ring = ScanRing::new(AccessKind::BulkRead, 32).unwrap();

        assert!(ring.buffer_from_ring(&pool).is_none());
        ring.push(FrameId(9));
        for _ in 0..ring.capacity() - 1 {
            assert!(ring.buffer_from_ring(&pool).is_none());
        }
        let (id, meta) = ring.buffer_from_ring(&pool).unwrap();
        drop(meta);

        assert!(ring.reject_buffer(id));
        // Slot is now empty; the same position misses.
        for _ in 0..ring.capacity() {
            assert!(ring.buffer_from_ring(&pool).is_none());
        }
    }

    #[test]
    fn test_reject_buffer_only_for_bulk_read() {
        let pool = frames(256);
        let mut ring = ScanRing::new(AccessKind::BulkWrite, 256).unwrap();

        assert!(ring.buffer_from_ring(&pool).is_none());
        ring.push(FrameId(2));
        for _ in 0..ring.capacity() - 1 {
            assert!(ring.buffer_from_ring(&pool).is_none());
        }
        let (id, meta) = ring.buffer_from_ring(&pool).unwrap();
        drop(meta);

        assert!(!ring.reject_buffer(id));
    }

    #[test]
    fn test_reject_buffer_ignores_pool_allocated_victim() {
        let pool = frames(32);
        let mut ring = ScanRing::new(AccessKind::BulkRead, 32).unwrap();

        // Last interaction was a miss, so current_was_in_ring is false.
        assert!(ring.buffer_from_ring(&pool).is_none());
        ring.push(FrameId(4));

        assert!(!ring.reject_buffer(FrameId(4)));
    }

    #[test]
    fn test_tiny_pool_ring_always_misses() {
        let pool = frames(4);
        let mut ring = ScanRing::new(AccessKind::BulkRead, 4).unwrap();

        assert_eq!(ring.capacity(), 0);
        assert!(ring.buffer_from_ring(&pool).is_none());
        ring.push(FrameId(1));
        assert!(ring.buffer_from_ring(&pool).is_none());
        assert!(!ring.reject_buffer(FrameId(1)));
    }

    #[test]
    fn test_access_kind_try_from() {
        assert_eq!(AccessKind::try_from(0).unwrap(), AccessKind::Normal);
        assert_eq!(AccessKind::try_from(2).unwrap(), AccessKind::BulkWrite);

        let err = AccessKind::try_from(9).unwrap_err();
        assert_eq!(err.to_string(), "unrecognized buffer access strategy: 9");
    }
}
