//! Replacement strategy core: free list, victim selection, unpin tracking.
//!
//! One pool-wide lock serializes every mutation of the shared strategy state
//! (free list, clock hand, queue links, counters). Each frame additionally
//! carries its own short-held header lock over `refcount`/`usage_count`.
//! Victims are handed back with the header lock still held so nobody can pin
//! them between selection and reuse.

use crate::frame::{FrameDesc, FrameGuard, FrameId};
use crate::latch::Latch;
use crate::ring::ScanRing;
use crate::table::{BufTable, BUFFER_PARTITIONS};
use oxbow_common::{OxbowError, PoolConfig, ReplacementPolicy, Result, PAGE_SIZE};
use parking_lot::{Mutex, MutexGuard};
use std::sync::Arc;
use sysinfo::System;
use tracing::{debug, warn};

/// Free-list link of one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FreeNext {
    /// Not on the free list.
    Detached,
    /// On the free list, last element.
    End,
    /// On the free list, followed by the given frame.
    Link(FrameId),
}

/// Intrusive links of one frame. Guarded by the pool lock, not the frame's
/// own header lock, which is why they live here instead of in `FrameDesc`.
#[derive(Debug, Clone, Copy)]
struct FrameLinks {
    free_next: FreeNext,
    prev: Option<FrameId>,
    next: Option<FrameId>,
}

/// The two replacement queues threaded through `FrameLinks`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Queue {
    /// Warm LRU list of unpinned frames (LRU, MRU, and 2Q's hot tier).
    Am,
    /// 2Q's probationary FIFO of first-time unpins.
    A1,
}

/// Pool-wide shared replacement state.
#[derive(Debug)]
struct StrategyControl {
    /// Clock sweep hand: index of the next frame to consider.
    next_victim: usize,

    /// Head of the free list, `None` when empty.
    first_free: Option<FrameId>,
    /// Tail of the free list. Stale (undefined) while the list is empty.
    last_free: Option<FrameId>,

    /// Complete cycles of the clock sweep since startup.
    complete_passes: u32,
    /// Victim requests since the last sync-start read.
    num_allocs: u32,

    /// Pending background-writer wakeup, if any.
    bgwriter_latch: Option<Arc<Latch>>,

    am_head: Option<FrameId>,
    am_tail: Option<FrameId>,
    a1_head: Option<FrameId>,
    a1_tail: Option<FrameId>,

    links: Box<[FrameLinks]>,
}

impl StrategyControl {
    fn head(&self, queue: Queue) -> Option<FrameId> {
        match queue {
            Queue::Am => self.am_head,
            Queue::A1 => self.a1_head,
        }
    }

    fn tail(&self, queue: Queue) -> Option<FrameId> {
        match queue {
            Queue::Am => self.am_tail,
            Queue::A1 => self.a1_tail,
        }
    }

    fn set_head(&mut self, queue: Queue, value: Option<FrameId>) {
        match queue {
            Queue::Am => self.am_head = value,
            Queue::A1 => self.a1_head = value,
        }
    }

    fn set_tail(&mut self, queue: Queue, value: Option<FrameId>) {
        match queue {
            Queue::Am => self.am_tail = value,
            Queue::A1 => self.a1_tail = value,
        }
    }

    /// Membership by walking from the head.
    fn on_queue(&self, queue: Queue, id: FrameId) -> bool {
        let mut cur = self.head(queue);
        while let Some(c) = cur {
            if c == id {
                return true;
            }
            cur = self.links[c.as_usize()].next;
        }
        false
    }

    fn queue_len(&self, queue: Queue) -> usize {
        let mut len = 0;
        let mut cur = self.head(queue);
        while let Some(c) = cur {
            len += 1;
            cur = self.links[c.as_usize()].next;
        }
        len
    }

    /// Cheap membership test for a frame that can only be on Am: linked to a
    /// neighbor, or it is the head/tail itself (single-element case).
    fn queued_in_am(&self, id: FrameId) -> bool {
        let links = &self.links[id.as_usize()];
        links.prev.is_some()
            || links.next.is_some()
            || self.am_head == Some(id)
            || self.am_tail == Some(id)
    }

    /// Unlinks a frame known to be on `queue`, fixing up neighbors and ends.
    fn unlink(&mut self, queue: Queue, id: FrameId) {
        let FrameLinks { prev, next, .. } = self.links[id.as_usize()];

        match prev {
            Some(p) => self.links[p.as_usize()].next = next,
            None => self.set_head(queue, next),
        }
        match next {
            Some(n) => self.links[n.as_usize()].prev = prev,
            None => self.set_tail(queue, prev),
        }

        self.links[id.as_usize()].prev = None;
        self.links[id.as_usize()].next = None;
    }

    /// Appends an unlinked frame at the tail of `queue`.
    fn push_tail(&mut self, queue: Queue, id: FrameId) {
        self.links[id.as_usize()].next = None;
        match self.tail(queue) {
            Some(t) => {
                self.links[t.as_usize()].next = Some(id);
                self.links[id.as_usize()].prev = Some(t);
            }
            None => {
                self.links[id.as_usize()].prev = None;
                self.set_head(queue, Some(id));
            }
        }
        self.set_tail(queue, Some(id));
    }

    /// Prepends a frame to the free list. Idempotent when already listed.
    fn push_free_head(&mut self, id: FrameId) {
        if self.links[id.as_usize()].free_next != FreeNext::Detached {
            return;
        }
        self.links[id.as_usize()].free_next = match self.first_free {
            Some(f) => FreeNext::Link(f),
            None => FreeNext::End,
        };
        if self.first_free.is_none() {
            self.last_free = Some(id);
        }
        self.first_free = Some(id);
    }

    /// Pops the free-list head, detaching it unconditionally.
    fn pop_free_head(&mut self) -> Option<FrameId> {
        let id = self.first_free?;
        let links = &mut self.links[id.as_usize()];
        debug_assert!(links.free_next != FreeNext::Detached);

        self.first_free = match links.free_next {
            FreeNext::Link(n) => Some(n),
            _ => None,
        };
        links.free_next = FreeNext::Detached;
        Some(id)
    }

    fn free_len(&self) -> usize {
        let mut len = 0;
        let mut cur = self.first_free;
        while let Some(id) = cur {
            len += 1;
            cur = match self.links[id.as_usize()].free_next {
                FreeNext::Link(n) => Some(n),
                _ => None,
            };
        }
        len
    }
}

/// A selected victim frame.
///
/// The frame's header lock is held for the lifetime of this value, and the
/// pool lock as well whenever selection went past a caller ring. Field order
/// matters: dropping releases the header lock before the pool lock, which is
/// the release order the locking protocol requires.
#[derive(Debug)]
pub struct Victim<'a> {
    frame: &'a FrameDesc,
    meta: FrameGuard<'a>,
    pool: Option<MutexGuard<'a, StrategyControl>>,
}

impl<'a> Victim<'a> {
    /// The selected frame's descriptor.
    pub fn frame(&self) -> &'a FrameDesc {
        self.frame
    }

    /// The selected frame's ID.
    pub fn frame_id(&self) -> FrameId {
        self.frame.frame_id()
    }

    /// The frame header state, readable under the held lock.
    pub fn meta(&self) -> &crate::frame::FrameMeta {
        &self.meta
    }

    /// The frame header state, writable under the held lock. The buffer
    /// manager pins the victim through this before releasing it.
    pub fn meta_mut(&mut self) -> &mut crate::frame::FrameMeta {
        &mut self.meta
    }

    /// True if the pool lock is still held alongside the frame lock.
    pub fn pool_lock_held(&self) -> bool {
        self.pool.is_some()
    }
}

/// Counters and occupancy snapshot of the strategy state.
#[derive(Debug, Clone)]
pub struct StrategyStats {
    /// Current clock hand position.
    pub next_victim: usize,
    /// Complete clock sweeps since startup.
    pub complete_passes: u32,
    /// Victim requests since the last [`BufferStrategy::sync_start`].
    pub num_allocs: u32,
    /// Frames on the free list.
    pub free_frames: usize,
    /// Frames on the warm (Am) queue.
    pub warm_frames: usize,
    /// Frames on the probationary (A1) queue.
    pub probation_frames: usize,
}

/// Where the background writer should start its next sync cycle.
#[derive(Debug, Clone, Copy)]
pub struct SyncPoint {
    /// Frame index to start scanning from (the clock hand).
    pub start: usize,
    /// Complete clock sweeps since startup.
    pub complete_passes: u32,
    /// Victim requests since the previous sync point. Reading resets the
    /// counter.
    pub num_allocs: u32,
}

/// The buffer pool replacement strategy.
///
/// Owns the frame descriptors, the shared strategy control, and the buffer
/// lookup table. One instance serves a whole process group; concurrent
/// callers share it behind an `Arc`.
pub struct BufferStrategy {
    frames: Box<[FrameDesc]>,
    control: Mutex<StrategyControl>,
    policy: ReplacementPolicy,
    table: BufTable,
}

impl BufferStrategy {
    /// Builds the strategy state for a pool of `config.buffer_pool_pages`
    /// frames, with every frame pre-linked into the free list.
    pub fn new(config: PoolConfig) -> Result<Self> {
        let n = config.buffer_pool_pages;
        if n == 0 {
            return Err(OxbowError::InvalidParameter {
                name: "buffer_pool_pages".to_string(),
                value: "0".to_string(),
            });
        }

        let frames: Box<[FrameDesc]> = (0..n).map(|i| FrameDesc::new(FrameId(i as u32))).collect();

        // Chain the whole pool through the free list: i -> i + 1.
        let links: Box<[FrameLinks]> = (0..n)
            .map(|i| FrameLinks {
                free_next: if i + 1 < n {
                    FreeNext::Link(FrameId((i + 1) as u32))
                } else {
                    FreeNext::End
                },
                prev: None,
                next: None,
            })
            .collect();

        let control = StrategyControl {
            next_victim: 0,
            first_free: Some(FrameId(0)),
            last_free: Some(FrameId((n - 1) as u32)),
            complete_passes: 0,
            num_allocs: 0,
            bgwriter_latch: None,
            am_head: None,
            am_tail: None,
            a1_head: None,
            a1_tail: None,
            links,
        };

        debug!(
            frames = n,
            policy = config.replacement_policy.name(),
            "buffer strategy initialized"
        );

        Ok(Self {
            frames,
            control: Mutex::new(control),
            policy: config.replacement_policy,
            table: BufTable::new(n + BUFFER_PARTITIONS),
        })
    }

    /// Builds a strategy sized to 25% of available system RAM, with a floor
    /// of 1,000 frames so small machines still get useful caching.
    pub fn auto_sized(policy: ReplacementPolicy) -> Result<Self> {
        let mut sys = System::new_all();
        sys.refresh_memory();

        let target_bytes = sys.available_memory() as usize / 4;
        let buffer_pool_pages = (target_bytes / PAGE_SIZE).max(1_000);

        Self::new(PoolConfig {
            buffer_pool_pages,
            replacement_policy: policy,
        })
    }

    /// Estimated shared-memory footprint for a pool of `n_buffers` frames:
    /// the lookup table plus the aligned strategy control block.
    pub fn shmem_size(n_buffers: usize) -> usize {
        let mut size = BufTable::shmem_size(n_buffers + BUFFER_PARTITIONS);
        size += maxalign(
            std::mem::size_of::<StrategyControl>() + n_buffers * std::mem::size_of::<FrameLinks>(),
        );
        size
    }

    /// Returns the number of frames in the pool.
    pub fn num_frames(&self) -> usize {
        self.frames.len()
    }

    /// Returns the configured replacement policy.
    pub fn policy(&self) -> ReplacementPolicy {
        self.policy
    }

    /// Returns the descriptor for a frame.
    pub fn frame(&self, id: FrameId) -> &FrameDesc {
        &self.frames[id.as_usize()]
    }

    /// Returns the buffer lookup table.
    pub fn table(&self) -> &BufTable {
        &self.table
    }

    /// Selects the next victim frame.
    ///
    /// Returns the frame with its header lock held, and with the pool lock
    /// still held whenever selection went past the caller's ring (see
    /// [`Victim::pool_lock_held`]). Dropping the victim releases the header
    /// lock first, then the pool lock.
    ///
    /// Fails with [`OxbowError::NoUnpinnedBuffers`] when the chosen policy
    /// path finds every candidate pinned.
    pub fn get_victim<'a>(&'a self, mut ring: Option<&mut ScanRing>) -> Result<Victim<'a>> {
        // Ring fast path; rings don't need the pool lock.
        if let Some(r) = ring.as_deref_mut() {
            if let Some((id, meta)) = r.buffer_from_ring(&self.frames) {
                return Ok(Victim {
                    frame: &self.frames[id.as_usize()],
                    meta,
                    pool: None,
                });
            }
        }

        let mut control = self.control.lock();

        // Count allocation requests so the background writer can estimate
        // consumption. Ring recycles are intentionally not counted.
        control.num_allocs += 1;

        // A pending bgwriter wakeup may enter the kernel; never do that while
        // holding the pool lock.
        if let Some(latch) = control.bgwriter_latch.take() {
            drop(control);
            debug!("waking background writer");
            latch.set();
            control = self.control.lock();
        }

        // Free-list drain. Frames are removed unconditionally; one that got
        // pinned or touched since it was freed is simply dropped from the
        // list and skipped.
        while let Some(id) = control.pop_free_head() {
            let meta = self.frames[id.as_usize()].lock();
            if meta.refcount == 0 && meta.usage_count == 0 {
                if let Some(r) = ring.as_deref_mut() {
                    r.push(id);
                }
                return Ok(Victim {
                    frame: &self.frames[id.as_usize()],
                    meta,
                    pool: Some(control),
                });
            }
        }

        let selected = match self.policy {
            ReplacementPolicy::Clock => self.clock_sweep(&mut control, ring),
            ReplacementPolicy::Lru => self.scan_recency(&control, false),
            ReplacementPolicy::Mru => self.scan_recency(&control, true),
            ReplacementPolicy::TwoQ => self.two_q_select(&mut control),
        };

        let (id, meta) = match selected {
            Ok(found) => found,
            Err(err) => {
                warn!(
                    policy = self.policy.name(),
                    frames = self.frames.len(),
                    "victim selection failed: {err}"
                );
                return Err(err);
            }
        };

        Ok(Victim {
            frame: &self.frames[id.as_usize()],
            meta,
            pool: Some(control),
        })
    }

    /// Clock sweep with second chances: an unpinned frame spends its usage
    /// count before it can be taken. A full pass over the pool without any
    /// state change means every frame is pinned.
    fn clock_sweep<'a>(
        &'a self,
        control: &mut StrategyControl,
        mut ring: Option<&mut ScanRing>,
    ) -> Result<(FrameId, FrameGuard<'a>)> {
        let n = self.frames.len();
        let mut trycounter = n;

        loop {
            let id = FrameId(control.next_victim as u32);

            control.next_victim += 1;
            if control.next_victim >= n {
                control.next_victim = 0;
                control.complete_passes += 1;
            }

            let mut meta = self.frames[id.as_usize()].lock();
            if meta.refcount == 0 {
                if meta.usage_count > 0 {
                    meta.usage_count -= 1;
                    trycounter = n;
                } else {
                    if let Some(r) = ring.as_deref_mut() {
                        r.push(id);
                    }
                    return Ok((id, meta));
                }
            } else {
                trycounter -= 1;
                if trycounter == 0 {
                    return Err(OxbowError::NoUnpinnedBuffers);
                }
            }
        }
    }

    /// Walks the warm queue for the first unpinned frame: from the head
    /// (least recently unpinned) or from the tail (most recently unpinned).
    /// The victim stays linked; its next unpin re-positions it.
    fn scan_recency<'a>(
        &'a self,
        control: &StrategyControl,
        from_tail: bool,
    ) -> Result<(FrameId, FrameGuard<'a>)> {
        let mut cur = if from_tail {
            control.am_tail
        } else {
            control.am_head
        };

        while let Some(id) = cur {
            let meta = self.frames[id.as_usize()].lock();
            if meta.refcount == 0 {
                return Ok((id, meta));
            }
            drop(meta);

            let links = &control.links[id.as_usize()];
            cur = if from_tail { links.prev } else { links.next };
        }

        Err(OxbowError::NoUnpinnedBuffers)
    }

    /// 2Q selection: evict from the probationary FIFO once it holds at least
    /// half the pool (or the warm queue is empty), otherwise from the warm
    /// queue. Only the chosen queue is scanned; there is no fallback to the
    /// other one. The victim is unlinked.
    fn two_q_select<'a>(
        &'a self,
        control: &mut StrategyControl,
    ) -> Result<(FrameId, FrameGuard<'a>)> {
        let threshold = self.frames.len() / 2;
        let size_a1 = control.queue_len(Queue::A1);

        let source = if size_a1 >= threshold || control.am_head.is_none() {
            Queue::A1
        } else {
            Queue::Am
        };

        let mut cur = control.head(source);
        while let Some(id) = cur {
            let meta = self.frames[id.as_usize()].lock();
            if meta.refcount == 0 {
                control.unlink(source, id);
                return Ok((id, meta));
            }
            drop(meta);
            cur = control.links[id.as_usize()].next;
        }

        Err(OxbowError::NoUnpinnedBuffers)
    }

    /// Records that a frame's last pin was dropped, making it a replacement
    /// candidate.
    ///
    /// Best effort: if the pool lock is contended the update is skipped
    /// entirely. The refcount stays authoritative, so a missed update only
    /// leaves queue order slightly stale; blocking here would couple every
    /// pin release to global contention.
    pub fn on_unpinned(&self, id: FrameId) {
        let Some(mut control) = self.control.try_lock() else {
            return;
        };

        if self.policy == ReplacementPolicy::TwoQ {
            if control.on_queue(Queue::Am, id) {
                // Already warm: move to the recent end.
                control.unlink(Queue::Am, id);
                control.push_tail(Queue::Am, id);
            } else if control.on_queue(Queue::A1, id) {
                // Second unpin promotes out of probation.
                control.unlink(Queue::A1, id);
                control.push_tail(Queue::Am, id);
            } else {
                control.push_tail(Queue::A1, id);
            }
        } else {
            if control.queued_in_am(id) {
                control.unlink(Queue::Am, id);
            }
            control.push_tail(Queue::Am, id);
        }
    }

    /// Puts a frame on the free list. Calling this for a frame already
    /// listed is allowed and leaves the list unchanged.
    pub fn free_buffer(&self, id: FrameId) {
        self.control.lock().push_free_head(id);
    }

    /// Sets (or with `None`, cancels) the background-writer wakeup. The next
    /// victim request signals the latch and clears it.
    pub fn notify_bgwriter(&self, latch: Option<Arc<Latch>>) {
        self.control.lock().bgwriter_latch = latch;
    }

    /// Tells the background writer where to start syncing and how fast
    /// buffers are being consumed. Resets the allocation counter.
    pub fn sync_start(&self) -> SyncPoint {
        let mut control = self.control.lock();
        let point = SyncPoint {
            start: control.next_victim,
            complete_passes: control.complete_passes,
            num_allocs: control.num_allocs,
        };
        control.num_allocs = 0;
        point
    }

    /// Returns a consistent snapshot of counters and queue occupancy.
    pub fn stats(&self) -> StrategyStats {
        let control = self.control.lock();
        StrategyStats {
            next_victim: control.next_victim,
            complete_passes: control.complete_passes,
            num_allocs: control.num_allocs,
            free_frames: control.free_len(),
            warm_frames: control.queue_len(Queue::Am),
            probation_frames: control.queue_len(Queue::A1),
        }
    }

    /// Head and tail of the free list. The tail is meaningless while the
    /// list is empty.
    pub fn free_list_ends(&self) -> (Option<FrameId>, Option<FrameId>) {
        let control = self.control.lock();
        (control.first_free, control.last_free)
    }

    /// Free-list contents, head first.
    pub fn free_frames(&self) -> Vec<FrameId> {
        let control = self.control.lock();
        let mut out = Vec::new();
        let mut cur = control.first_free;
        while let Some(id) = cur {
            out.push(id);
            cur = match control.links[id.as_usize()].free_next {
                FreeNext::Link(n) => Some(n),
                _ => None,
            };
        }
        out
    }

    /// Warm-queue contents, least recently unpinned first.
    pub fn am_frames(&self) -> Vec<FrameId> {
        self.queue_frames(Queue::Am)
    }

    /// Probationary-queue contents, oldest admission first.
    pub fn a1_frames(&self) -> Vec<FrameId> {
        self.queue_frames(Queue::A1)
    }

    fn queue_frames(&self, queue: Queue) -> Vec<FrameId> {
        let control = self.control.lock();
        let mut out = Vec::new();
        let mut cur = control.head(queue);
        while let Some(id) = cur {
            out.push(id);
            cur = control.links[id.as_usize()].next;
        }
        out
    }
}

/// Rounds a size up to maximum alignment.
fn maxalign(size: usize) -> usize {
    (size + 7) & !7
}
