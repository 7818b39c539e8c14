// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Pooled UDP ingest source (spec §4.K).
//!
//! Receives the single upstream RTP media feed, parses its fixed header in
//! place inside a pooled buffer, and hands the parsed packet to a fan-out
//! callback — [`crate::mux`] broadcasting it to every connected peer.
//! Grounded on the teacher's `core::discovery::multicast::listener` receive
//! loop (blocking `recv` into a reused buffer, metrics-on-drop, "log and
//! continue" on a bad datagram), simplified to a single-socket blocking loop
//! since this relay has no discovery-style multiplexed socket set to poll.

use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};

use crate::pool::BufferPool;
use crate::rtp::RtpPacket;

/// How often a blocked `recv` wakes up to re-check `closed`, so
/// [`IngestSource::close`] takes effect within a bounded time instead of
/// waiting for the next datagram (spec §5 "ingest shutdown waits for all
/// per-peer workers to acknowledge close" — this is the ingest side of that).
const RECV_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// A bound, pooled UDP source for the upstream RTP feed.
pub struct IngestSource {
    socket: UdpSocket,
    pool: BufferPool,
    closed: bool,
}

impl IngestSource {
    /// Bind `addr` and pre-allocate `pool_capacity` buffers of `mtu` bytes
    /// each (spec §4.K: "e.g., 256, sized for MTU").
    pub fn bind(addr: SocketAddr, pool_capacity: usize, mtu: usize) -> io::Result<Self> {
        let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        socket.bind(&addr.into())?;
        socket.set_read_timeout(Some(RECV_POLL_INTERVAL))?;
        Ok(Self {
            socket: socket.into(),
            pool: BufferPool::new(pool_capacity, mtu),
            closed: false,
        })
    }

    /// Local address this source is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    #[must_use]
    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Receive and dispatch exactly one datagram. Blocks until one arrives.
    ///
    /// If the pool is momentarily exhausted, this datagram is skipped
    /// (logged) without reading the socket — the caller's next call tries
    /// again once a buffer has been returned via [`BufferPool::reuse`]. A
    /// malformed datagram is logged and dropped; both cases count as
    /// spec §4.K's "on error: log and continue", not a fatal result.
    pub fn recv_one(&mut self, fan_out: &mut dyn FnMut(&RtpPacket<'_>)) -> io::Result<()> {
        if self.closed {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "ingest source is closed",
            ));
        }
        let Some(mut buf) = self.pool.acquire() else {
            crate::warn!("[ingest] buffer pool exhausted, dropping this poll");
            return Ok(());
        };
        let len = match self.socket.recv(buf.as_mut_slice()) {
            Ok(len) => len,
            Err(err) => {
                self.pool.reuse(buf);
                if !matches!(err.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) {
                    crate::debug!("[ingest] recv error: {err}");
                }
                return Ok(());
            }
        };
        match RtpPacket::parse(&buf.as_slice()[..len]) {
            Ok((packet, _csrc)) => fan_out(&packet),
            Err(err) => {
                crate::debug!("[ingest] dropping unparsable datagram: {err}");
            }
        }
        self.pool.reuse(buf);
        Ok(())
    }

    /// Drive the receive loop until [`IngestSource::close`] has been called.
    /// Intended to run on its own dedicated thread.
    pub fn run(&mut self, mut fan_out: impl FnMut(&RtpPacket<'_>)) {
        while !self.closed {
            if let Err(err) = self.recv_one(&mut fan_out) {
                crate::debug!("[ingest] stopping: {err}");
                break;
            }
        }
    }

    /// Mark the source closed (spec §4.K: "on socket close: drain pending,
    /// release all buffers"). Every buffer is already returned to the pool
    /// at the end of each `recv_one` call, so there is nothing held across
    /// iterations to release — marking `closed` is sufficient to make
    /// further `recv_one`/`run` calls stop instead of blocking on the
    /// socket again.
    pub fn close(&mut self) {
        self.closed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn loopback(port: u16) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), port)
    }

    fn minimal_rtp_packet(seq: u16, payload: &[u8]) -> Vec<u8> {
        let mut buf = vec![0u8; 12];
        buf[0] = 0x80; // version 2, no padding, no extension, 0 CSRC
        buf[1] = 96; // no marker, payload type 96
        buf[2..4].copy_from_slice(&seq.to_be_bytes());
        buf[4..8].copy_from_slice(&0u32.to_be_bytes());
        buf[8..12].copy_from_slice(&0x1122_3344u32.to_be_bytes());
        buf.extend_from_slice(payload);
        buf
    }

    #[test]
    fn binds_to_an_ephemeral_port_and_reports_it() {
        let source = IngestSource::bind(loopback(0), 4, 1500).expect("bind should succeed");
        let addr = source.local_addr().expect("local_addr should succeed");
        assert_ne!(addr.port(), 0);
    }

    #[test]
    fn recv_one_parses_and_dispatches_a_valid_packet() {
        let mut source = IngestSource::bind(loopback(0), 4, 1500).expect("bind should succeed");
        let addr = source.local_addr().expect("local_addr should succeed");
        let sender = UdpSocket::bind(loopback(0)).expect("sender bind should succeed");
        let datagram = minimal_rtp_packet(7, b"frame-bytes");
        sender.send_to(&datagram, addr).expect("send should succeed");

        let mut received = None;
        source
            .recv_one(&mut |packet: &RtpPacket<'_>| {
                received = Some((packet.sequence_number, packet.ssrc, packet.payload.to_vec()));
            })
            .expect("recv_one should succeed");

        let (seq, ssrc, payload) = received.expect("fan-out should have been called");
        assert_eq!(seq, 7);
        assert_eq!(ssrc, 0x1122_3344);
        assert_eq!(payload, b"frame-bytes");
    }

    #[test]
    fn recv_one_drops_unparsable_datagrams_without_dispatching() {
        let mut source = IngestSource::bind(loopback(0), 4, 1500).expect("bind should succeed");
        let addr = source.local_addr().expect("local_addr should succeed");
        let sender = UdpSocket::bind(loopback(0)).expect("sender bind should succeed");
        sender.send_to(&[0xFF, 0x01], addr).expect("send should succeed");

        let mut dispatched = false;
        source
            .recv_one(&mut |_packet: &RtpPacket<'_>| {
                dispatched = true;
            })
            .expect("recv_one should succeed even for a bad datagram");
        assert!(!dispatched);
    }

    #[test]
    fn close_makes_further_recv_one_calls_fail() {
        let mut source = IngestSource::bind(loopback(0), 4, 1500).expect("bind should succeed");
        source.close();
        assert!(source.is_closed());
        let result = source.recv_one(&mut |_packet: &RtpPacket<'_>| {});
        assert!(result.is_err());
    }

    #[test]
    fn exhausted_pool_skips_without_blocking_forever() {
        let mut source = IngestSource::bind(loopback(0), 1, 64).expect("bind should succeed");
        let held = source.pool().acquire().expect("first acquire should succeed");
        let result = source.recv_one(&mut |_packet: &RtpPacket<'_>| {});
        assert!(result.is_ok());
        source.pool().reuse(held);
    }
}
