// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Peer session state machine (spec §4.J).
//!
//! Combines the ICE-lite agent, DTLS session, and SRTP sender for one WebRTC
//! peer behind a single explicit state enum. Every transition goes through
//! [`Peer::transition`], which emits a [`PeerStateChange`] event — the same
//! "explicit enum plus transition method returning old/new state" idiom the
//! teacher's discovery FSM uses for observability.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;
use openssl::ssl::SslContext;

use crate::config::{DISCONNECTED_RTO_MULTIPLIER, FAILED_RTO_MULTIPLIER};
use crate::demux::{DemuxCounters, PacketKind};
use crate::dtls::{self, Session as DtlsSession, SrtpKeyingMaterial};
use crate::ice::{Agent as IceAgent, Candidate, ConnectionState as IceConnectionState};
use crate::rtp::RtpPacket;
use crate::srtp::SenderContext;
use crate::stun::{Class, Message as StunMessage};

/// Opaque per-peer identifier, assigned by [`crate::control`] (spec §3:
/// "a 128-bit opaque id", rendered as hex in logs).
pub type PeerId = u128;

/// Peer session state (spec §4.J).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    /// Just created; no traffic received yet.
    New,
    /// At least one STUN check has been seen.
    Checking,
    /// A nominated ICE pair exists and the DTLS handshake has completed.
    Connected,
    /// Was connected but no successful check within the idle window.
    Disconnected,
    /// ICE failed outright, or DTLS failed, or the disconnected window elapsed.
    Failed,
    /// Explicitly closed. Terminal.
    Closed,
}

impl PeerState {
    fn is_terminal(self) -> bool {
        matches!(self, Self::Failed | Self::Closed)
    }
}

/// Emitted on every peer state transition (spec §4.J: "every transition is
/// observable"); consumed by [`crate::mux`] to drive transmit start/stop.
#[derive(Debug, Clone, Copy)]
pub struct PeerStateChange {
    pub peer_id: PeerId,
    pub old: PeerState,
    pub new: PeerState,
}

/// One peer's ICE/DTLS/SRTP session plus its demux counters.
pub struct Peer {
    id: PeerId,
    state: PeerState,
    ice: IceAgent,
    dtls: DtlsSession,
    srtp: Option<SenderContext>,
    local_ssrc: u32,
    demux_counters: DemuxCounters,
    events: Sender<PeerStateChange>,
    last_successful_check: Option<Instant>,
    socket_closed: bool,
    /// SHA-256 fingerprint from the remote answer's `a=fingerprint` line,
    /// set by [`crate::control`] once the answer is accepted. The DTLS
    /// handshake's peer certificate is checked against this the moment it
    /// completes (spec §4.G).
    remote_fingerprint: Option<[u8; 32]>,
    /// When this session was created, for the DTLS handshake timeout
    /// (spec §5 "DTLS timeouts").
    created_at: Instant,
}

impl Peer {
    /// Build a new peer session: one ICE-lite host candidate, a fresh
    /// DTLS-server session against the shared identity context, and no
    /// SRTP context yet (that exists only once DTLS has completed).
    pub fn new(
        id: PeerId,
        host_addr: SocketAddr,
        local_ssrc: u32,
        dtls_ctx: &SslContext,
        events: Sender<PeerStateChange>,
    ) -> Result<Self, dtls::DtlsError> {
        Ok(Self {
            id,
            state: PeerState::New,
            ice: IceAgent::with_defaults(host_addr),
            dtls: DtlsSession::accept(dtls_ctx)?,
            srtp: None,
            local_ssrc,
            demux_counters: DemuxCounters::default(),
            events,
            last_successful_check: None,
            socket_closed: false,
            remote_fingerprint: None,
            created_at: Instant::now(),
        })
    }

    /// Record the remote fingerprint extracted from the accepted answer
    /// (spec §4.N `AcceptAnswer`). Must be called before the DTLS handshake
    /// completes for the verification in [`Peer::handle_dtls`] to run.
    pub fn set_remote_fingerprint(&mut self, fingerprint: [u8; 32]) {
        self.remote_fingerprint = Some(fingerprint);
    }

    /// True once an answer has already been applied to this peer's ICE
    /// agent (spec §4.N: a second `AcceptAnswer` is `WrongSdpTypeOfferAfterOffer`).
    #[must_use]
    pub fn has_remote_description(&self) -> bool {
        self.ice.remote_ufrag.is_some()
    }

    /// Apply an accepted SDP answer (spec §4.N `AcceptAnswer`): remote ICE
    /// credentials and candidates go to the checklist, the fingerprint is
    /// recorded for [`Peer::handle_dtls`] to verify against.
    pub fn accept_answer(
        &mut self,
        remote_ufrag: String,
        remote_password: String,
        remote_candidates: &[Candidate],
        remote_fingerprint_sha256: [u8; 32],
    ) {
        self.ice.set_remote(remote_ufrag, remote_password, remote_candidates);
        self.remote_fingerprint = Some(remote_fingerprint_sha256);
    }

    #[must_use]
    pub fn id(&self) -> PeerId {
        self.id
    }

    #[must_use]
    pub fn state(&self) -> PeerState {
        self.state
    }

    #[must_use]
    pub fn ice_agent(&self) -> &IceAgent {
        &self.ice
    }

    /// The nominated pair's remote address, once ICE has nominated one —
    /// where [`crate::control`]'s fan-out worker sends protected RTP.
    #[must_use]
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.ice.nominated_pair().map(|pair| pair.remote.addr)
    }

    #[must_use]
    pub fn demux_counters(&self) -> &DemuxCounters {
        &self.demux_counters
    }

    /// Move to `new` and emit a [`PeerStateChange`] if it actually changed.
    /// A terminal state never transitions further (closing is idempotent).
    fn transition(&mut self, new: PeerState) {
        if self.state == new || self.state.is_terminal() {
            return;
        }
        let old = self.state;
        self.state = new;
        let _ = self.events.send(PeerStateChange {
            peer_id: self.id,
            old,
            new,
        });
    }

    fn recompute_connected(&mut self) {
        if self.ice.connection_state() == IceConnectionState::Connected && self.dtls.is_established() {
            self.transition(PeerState::Connected);
        }
    }

    /// Handle one inbound datagram on this peer's UDP socket (spec §4.I/§4.J).
    /// Returns any bytes that must be sent back to `from` (a signed STUN
    /// response, or a DTLS handshake flight).
    pub fn on_datagram(&mut self, datagram: &[u8], from: SocketAddr) -> Vec<u8> {
        match self.demux_counters.record(datagram) {
            PacketKind::Stun => self.handle_stun(datagram, from),
            PacketKind::Dtls => self.handle_dtls(datagram),
            PacketKind::Rtcp => {
                // RTCP feedback from the peer is accounted for but this
                // send-only relay has no sender state to react to NACK/PLI.
                Vec::new()
            }
            PacketKind::Rtp | PacketKind::Unknown => Vec::new(),
        }
    }

    fn handle_stun(&mut self, datagram: &[u8], from: SocketAddr) -> Vec<u8> {
        let Ok(msg) = StunMessage::decode(datagram) else {
            return Vec::new();
        };
        if msg.class != Class::Request {
            return Vec::new();
        }
        match self.ice.on_binding_request(&msg, datagram, from) {
            Ok(response) => {
                self.last_successful_check = Some(Instant::now());
                self.transition(PeerState::Checking);
                self.recompute_connected();
                response
            }
            Err(_) => {
                self.transition(PeerState::Failed);
                Vec::new()
            }
        }
    }

    fn handle_dtls(&mut self, datagram: &[u8]) -> Vec<u8> {
        self.transition(PeerState::Checking);
        match self.dtls.step(datagram) {
            Ok(Some(keying)) => {
                let verified = match self.remote_fingerprint {
                    Some(expected) => self.dtls.verify_peer_fingerprint(&expected).is_ok(),
                    // An answer hasn't been accepted yet; nothing to check against.
                    None => true,
                };
                if verified {
                    self.install_srtp(keying);
                    self.recompute_connected();
                } else {
                    self.transition(PeerState::Failed);
                }
            }
            Ok(None) => {}
            Err(_) => self.transition(PeerState::Failed),
        }
        self.dtls.take_outgoing()
    }

    /// Install the SRTP sender from the DTLS handshake's exported keying
    /// material. Called automatically by [`Peer::handle_dtls`] once the
    /// fingerprint check (if any remote fingerprint has been set) passes;
    /// exposed so tests can install a context directly.
    pub fn install_srtp(&mut self, keying: SrtpKeyingMaterial) {
        self.srtp = Some(SenderContext::new(&keying, self.local_ssrc));
    }

    /// Protect and return one outgoing RTP packet, if SRTP is established.
    pub fn send_rtp(&mut self, pkt: &RtpPacket<'_>) -> Option<Vec<u8>> {
        self.srtp.as_mut().and_then(|ctx| ctx.protect(pkt).ok())
    }

    /// Evaluate the idle-check liveness window (spec §5 "ICE idle timeout").
    /// `rto` is the base STUN retransmission timeout; disconnected/failed
    /// multipliers come from [`crate::config`].
    pub fn check_liveness(&mut self, now: Instant, rto: Duration) -> PeerState {
        if self.state != PeerState::Connected && self.state != PeerState::Disconnected {
            return self.state;
        }
        let Some(last) = self.last_successful_check else {
            return self.state;
        };
        let elapsed = now.saturating_duration_since(last);
        if elapsed > rto * FAILED_RTO_MULTIPLIER {
            self.transition(PeerState::Failed);
        } else if elapsed > rto * DISCONNECTED_RTO_MULTIPLIER {
            self.transition(PeerState::Disconnected);
        }
        self.state
    }

    /// Fail a peer still stuck before `Connected` once the DTLS handshake
    /// timeout has elapsed since creation (spec §4.G handshake timeout,
    /// §5 "DTLS timeouts").
    pub fn check_handshake_timeout(&mut self, now: Instant, timeout: Duration) -> PeerState {
        if matches!(self.state, PeerState::New | PeerState::Checking)
            && now.saturating_duration_since(self.created_at) > timeout
        {
            self.transition(PeerState::Failed);
        }
        self.state
    }

    /// Explicit close (spec §4.J: "terminal states close the UDP socket
    /// exactly once"). Returns `true` the first time the caller should
    /// actually close the socket.
    pub fn close(&mut self) -> bool {
        self.transition(PeerState::Closed);
        self.ice.close();
        if self.socket_closed {
            false
        } else {
            self.socket_closed = true;
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn test_ctx() -> SslContext {
        let identity = dtls::tests_support::self_signed_identity();
        dtls::build_context(&identity).expect("context should build")
    }

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), port)
    }

    #[test]
    fn new_peer_starts_in_new_state() {
        let ctx = test_ctx();
        let (tx, _rx) = crossbeam_channel::unbounded();
        let peer = Peer::new(1, addr(5000), 1234, &ctx, tx).expect("peer should build");
        assert_eq!(peer.state(), PeerState::New);
    }

    #[test]
    fn close_is_idempotent_and_emits_one_transition() {
        let ctx = test_ctx();
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut peer = Peer::new(1, addr(5000), 1234, &ctx, tx).expect("peer should build");
        assert!(peer.close());
        assert!(!peer.close());
        let mut transitions = 0;
        while rx.try_recv().is_ok() {
            transitions += 1;
        }
        assert_eq!(transitions, 1);
        assert_eq!(peer.state(), PeerState::Closed);
    }

    #[test]
    fn unknown_datagram_is_dropped_and_counted() {
        let ctx = test_ctx();
        let (tx, _rx) = crossbeam_channel::unbounded();
        let mut peer = Peer::new(1, addr(5000), 1234, &ctx, tx).expect("peer should build");
        let out = peer.on_datagram(&[64, 64], addr(6000));
        assert!(out.is_empty());
        assert_eq!(peer.demux_counters().unknown_dropped, 1);
        assert_eq!(peer.state(), PeerState::New);
    }
}
