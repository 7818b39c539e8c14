// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Pre-allocated MTU-sized buffer pool for the ingest source (spec §4.K).
//!
//! Generalizes the teacher's `core::rt::SlabPool` — a lock-free, multi
//! size-class allocator guarded by an atomic bitmap per pool — down to the
//! single size class this relay actually needs (every RTP buffer is the
//! same MTU size), and swaps the bitmap CAS for a bounded
//! `crossbeam-channel` acting as a free-list of slot tokens: a slot is
//! exclusively owned by whichever caller holds its token, so handing the
//! token through the channel is the mutual-exclusion mechanism, the same
//! role the bitmap CAS plays in the teacher's pool.

use std::cell::UnsafeCell;

use crossbeam_channel::{Receiver, Sender};

struct Slot {
    data: UnsafeCell<Vec<u8>>,
}

// SAFETY: a slot's token can only be held by one `PooledBuffer` at a time
// (the channel hands out each index exactly once between an `acquire` and
// the matching `reuse`), so `&mut` access through the `UnsafeCell` is never
// aliased.
unsafe impl Sync for Slot {}

/// Fixed-capacity pool of same-size buffers (spec §4.K: "pre-allocates a
/// pool of RTP packet buffers... sized for MTU").
pub struct BufferPool {
    slots: Vec<Slot>,
    buffer_size: usize,
    free_tx: Sender<usize>,
    free_rx: Receiver<usize>,
}

impl BufferPool {
    /// Build a pool of `capacity` buffers, each `buffer_size` bytes.
    #[must_use]
    pub fn new(capacity: usize, buffer_size: usize) -> Self {
        let (free_tx, free_rx) = crossbeam_channel::bounded(capacity);
        let slots: Vec<Slot> = (0..capacity)
            .map(|_| Slot {
                data: UnsafeCell::new(vec![0u8; buffer_size]),
            })
            .collect();
        for index in 0..capacity {
            free_tx.send(index).expect("freshly bounded to capacity, cannot be full yet");
        }
        Self {
            slots,
            buffer_size,
            free_tx,
            free_rx,
        }
    }

    /// Total number of buffers this pool was built with.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Size of every buffer in the pool.
    #[must_use]
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Number of buffers currently available (not checked out).
    #[must_use]
    pub fn available(&self) -> usize {
        self.free_rx.len()
    }

    /// Check out a buffer, or `None` if every slot is currently in use.
    pub fn acquire(&self) -> Option<PooledBuffer<'_>> {
        let index = self.free_rx.try_recv().ok()?;
        Some(PooledBuffer { pool: self, index })
    }

    /// Return a buffer to the pool (spec §4.K's "reuse contract" — called
    /// once the fan-out callback for that packet has returned).
    pub fn reuse(&self, buf: PooledBuffer<'_>) {
        let index = buf.index;
        std::mem::forget(buf);
        self.free_tx
            .send(index)
            .expect("token count is fixed: every reuse() matches exactly one prior acquire()");
    }
}

/// A checked-out buffer. Must be returned via [`BufferPool::reuse`] or it is
/// permanently removed from the pool's rotation (no `Drop`-based auto
/// return — the spec's reuse contract is explicit).
pub struct PooledBuffer<'a> {
    pool: &'a BufferPool,
    index: usize,
}

impl<'a> PooledBuffer<'a> {
    /// Mutable view of the buffer, for `recv_from` to write into.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: see `Slot`'s `Sync` impl above — this index's token is
        // held exclusively by `self`.
        unsafe { &mut *self.pool.slots[self.index].data.get() }
    }

    /// Immutable view of the buffer.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: see `Slot`'s `Sync` impl above.
        unsafe { &*self.pool.slots[self.index].data.get() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquires_distinct_buffers_up_to_capacity() {
        let pool = BufferPool::new(2, 1500);
        let a = pool.acquire().expect("first acquire");
        let b = pool.acquire().expect("second acquire");
        assert_ne!(a.index, b.index);
        assert!(pool.acquire().is_none());
    }

    #[test]
    fn reuse_returns_a_slot_for_later_acquisition() {
        let pool = BufferPool::new(1, 64);
        let buf = pool.acquire().expect("acquire");
        assert!(pool.acquire().is_none());
        pool.reuse(buf);
        assert!(pool.acquire().is_some());
    }

    #[test]
    fn buffers_are_sized_for_the_requested_mtu() {
        let pool = BufferPool::new(4, 1500);
        let mut buf = pool.acquire().unwrap();
        assert_eq!(buf.as_mut_slice().len(), 1500);
        assert_eq!(pool.buffer_size(), 1500);
    }

    #[test]
    fn available_tracks_outstanding_checkouts() {
        let pool = BufferPool::new(3, 16);
        assert_eq!(pool.available(), 3);
        let a = pool.acquire().unwrap();
        assert_eq!(pool.available(), 2);
        pool.reuse(a);
        assert_eq!(pool.available(), 3);
    }
}
