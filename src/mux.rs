// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Stream multiplexer: the peer registry (spec §4.L).
//!
//! Holds every connected [`crate::peer::Peer`] behind one `ArcSwap` snapshot,
//! the same atomic-swap-instead-of-lock idiom the teacher's `RuntimeConfig`
//! uses for `PortMapping` (`config.rs`'s `ArcSwap<Option<PortMapping>>`,
//! swapped wholesale on every write, read lock-free on every broadcast).
//! Registration and removal publish a new snapshot; broadcasting never
//! blocks a writer and a writer never blocks a broadcast in progress.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;

use crate::peer::{Peer, PeerId};
use crate::rtp::RtpPacket;

/// Immutable point-in-time view of the registry. Cheap to clone (an `Arc`
/// per entry); iterating it never observes a concurrent add/remove.
type Snapshot = HashMap<PeerId, Arc<Mutex<Peer>>>;

/// Registry of connected peers, published as copy-on-write snapshots.
///
/// `Peer` itself is not `Sync` (its ICE/DTLS/SRTP state is mutated in place),
/// so each entry is `Arc<Mutex<Peer>>` — the snapshot swap makes membership
/// lock-free, while a per-peer mutex still serializes concurrent access to
/// one peer's session state (spec §4.N: "operations are serialised per peer
/// but otherwise concurrent").
pub struct Registry {
    snapshot: ArcSwap<Snapshot>,
}

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            snapshot: ArcSwap::new(Arc::new(HashMap::new())),
        }
    }

    /// Publish a new snapshot with `peer` added (or replacing an existing
    /// entry with the same id).
    pub fn insert(&self, peer: Peer) {
        let id = peer.id();
        let handle = Arc::new(Mutex::new(peer));
        self.rcu(move |current| {
            let mut next = current.clone();
            next.insert(id, handle.clone());
            next
        });
    }

    /// Publish a new snapshot with `id` removed, returning the removed peer
    /// if it was present.
    pub fn remove(&self, id: PeerId) -> Option<Arc<Mutex<Peer>>> {
        let mut removed = None;
        self.rcu(|current| {
            let mut next = current.clone();
            removed = next.remove(&id);
            next
        });
        removed
    }

    /// Look up one peer by id without taking a snapshot-wide lock.
    #[must_use]
    pub fn get(&self, id: PeerId) -> Option<Arc<Mutex<Peer>>> {
        self.snapshot.load().get(&id).cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.snapshot.load().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Protect and send one RTP packet to every connected peer (spec §4.L:
    /// "broadcast = iterate snapshot values; per-peer send is best-effort,
    /// errors on one peer do not affect others"). Returns the number of
    /// peers the packet was actually handed to (a peer without an
    /// established SRTP context is silently skipped, matching
    /// [`crate::peer::Peer::send_rtp`]'s `None` result).
    pub fn broadcast(
        &self,
        packet: &RtpPacket<'_>,
        mut send: impl FnMut(PeerId, std::net::SocketAddr, Vec<u8>),
    ) -> usize {
        let current = self.snapshot.load();
        let mut delivered = 0;
        for (&id, handle) in current.iter() {
            let mut peer = handle.lock();
            let outbound = peer.remote_addr().zip(peer.send_rtp(packet));
            drop(peer);
            if let Some((addr, bytes)) = outbound {
                send(id, addr, bytes);
                delivered += 1;
            }
        }
        delivered
    }

    /// Visit every peer in the current snapshot. Used by the housekeeping
    /// worker to tick liveness/handshake timeouts (spec §5); `f` may call
    /// [`Registry::remove`] on the same id it was handed without deadlocking
    /// (the snapshot this iterates was already loaded and is unaffected by
    /// a concurrent swap).
    pub fn for_each(&self, mut f: impl FnMut(PeerId, &Mutex<Peer>)) {
        let current = self.snapshot.load();
        for (&id, handle) in current.iter() {
            f(id, handle);
        }
    }

    /// Close every peer and empty the registry. Idempotent: closing an
    /// already-empty registry is a no-op.
    pub fn close_all(&self) {
        let current = self.snapshot.swap(Arc::new(HashMap::new()));
        for handle in current.values() {
            handle.lock().close();
        }
    }

    /// Read-copy-update: load the current snapshot, build the next one from
    /// it, and swap it in. Mirrors the teacher's `set_port_mapping`'s
    /// load-then-`store` pair but folds both steps into one call so every
    /// registry mutation goes through the same path.
    fn rcu(&self, build_next: impl FnOnce(&Snapshot) -> Snapshot) {
        let current = self.snapshot.load();
        let next = build_next(&current);
        self.snapshot.store(Arc::new(next));
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
