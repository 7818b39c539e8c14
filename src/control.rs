// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Control API (spec §4.N) and the worker scaffolding of §5.
//!
//! [`Control`] is the one entry point an embedder drives: `append_client`
//! creates a peer and returns its SDP offer; `accept_answer` applies the
//! browser's answer; `stop` tears everything down. Internally it owns the
//! four kinds of OS thread §5 names — the ingest worker, the fan-out worker,
//! one per-peer I/O worker per connected peer, and a housekeeping thread —
//! wired together the way the reference codebase wires its own worker
//! threads: plain `std::thread::spawn` plus `crossbeam-channel`, no async
//! runtime.

use std::collections::HashMap;
use std::net::UdpSocket;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use openssl::ssl::SslContext;
use parking_lot::Mutex;
use rand::Rng;

use crate::config::{
    RuntimeConfig, DEFAULT_DTLS_HANDSHAKE_TIMEOUT, DEFAULT_STUN_RTO, ICE_TYPE_PREF_HOST,
    VIDEO_PAYLOAD_TYPE,
};
use crate::dtls::{self, Identity};
use crate::error::SetDescriptionResult;
use crate::ice::Candidate;
use crate::ingest::IngestSource;
use crate::mux::Registry;
use crate::peer::{Peer, PeerId, PeerState};
use crate::rtp::RtpPacket;
use crate::sdp;
use crate::sink::TcpSink;

/// How often the housekeeping thread ticks every peer's liveness and
/// handshake-timeout checks (spec §5 timer/housekeeping thread).
const HOUSEKEEPING_INTERVAL: Duration = Duration::from_millis(250);

/// Read timeout on every per-peer UDP socket, so its I/O worker notices a
/// registry removal (explicit close, or [`Control::stop`]'s `close_all`)
/// within a bounded time instead of blocking on `recv_from` forever.
const PEER_RECV_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Depth of the channel between the ingest worker and the fan-out worker.
/// Bounded so a stalled fan-out eventually pushes back on ingest rather than
/// growing memory unboundedly; sized generously above one video frame's
/// worth of packets.
const FANOUT_CHANNEL_DEPTH: usize = 512;

/// One peer's UDP socket plus the I/O worker thread reading it. Shared
/// between `append_client` (which creates it) and the fan-out worker (which
/// only ever reads `socket` to send a protected packet).
struct PeerHandle {
    socket: Arc<UdpSocket>,
    worker: JoinHandle<()>,
}

type PeerMap = Arc<Mutex<HashMap<PeerId, PeerHandle>>>;

/// Running control-plane instance (spec §4.N). One per process.
pub struct Control {
    config: Arc<RuntimeConfig>,
    dtls_identity: Identity,
    dtls_ctx: SslContext,
    registry: Arc<Registry>,
    peers: PeerMap,
    ingest_handle: Mutex<Option<JoinHandle<()>>>,
    fanout_tx: Mutex<Option<crossbeam_channel::Sender<Vec<u8>>>>,
    fanout_handle: Mutex<Option<JoinHandle<()>>>,
    housekeeping_stop: Arc<AtomicBool>,
    housekeeping_handle: Mutex<Option<JoinHandle<()>>>,
    stopped: AtomicBool,
}

impl Control {
    /// Build a new control-plane instance: mint the one process-wide DTLS
    /// identity, bind the ingest socket, and start the ingest, fan-out, and
    /// housekeeping workers. The ingest worker is started eagerly rather than
    /// lazily on the first `append_client` call — §4.N's "starts ingest if
    /// not started" is satisfied trivially since there is only ever one.
    pub fn start(config: Arc<RuntimeConfig>) -> Result<Self, crate::error::Error> {
        let dtls_identity = dtls::generate_self_signed()?;
        let dtls_ctx = dtls::build_context(&dtls_identity)?;
        let registry = Arc::new(Registry::new());
        let peers: PeerMap = Arc::new(Mutex::new(HashMap::new()));

        let mut ingest = IngestSource::bind(config.ingest_listen, config.pool_size, config.mtu)
            .map_err(|e| crate::error::Error::Io(io_fatal(&e)))?;
        let ingest_addr = ingest.local_addr().map_err(|e| crate::error::Error::Io(io_fatal(&e)))?;
        crate::info!("[control] ingest listening on {ingest_addr}");

        let sink = match TcpSink::connect(config.tcp_sink_addr, config.video_geometry) {
            Ok(sink) => Some(sink),
            Err(err) => {
                crate::warn!("[control] TCP sink unavailable at startup: {err}");
                None
            }
        };

        let (fanout_tx, fanout_rx) = crossbeam_channel::bounded::<Vec<u8>>(FANOUT_CHANNEL_DEPTH);

        let fanout_registry = Arc::clone(&registry);
        let fanout_peers = Arc::clone(&peers);
        let fanout_handle = std::thread::spawn(move || {
            run_fanout_worker(fanout_registry, fanout_peers, fanout_rx, sink);
        });

        let ingest_fanout_tx = fanout_tx.clone();
        let ingest_handle = std::thread::spawn(move || {
            ingest.run(|packet: &RtpPacket<'_>| {
                let mut buf = Vec::new();
                packet.write_to(&mut buf);
                let _ = ingest_fanout_tx.send(buf);
            });
        });

        let housekeeping_registry = Arc::clone(&registry);
        let housekeeping_stop = Arc::new(AtomicBool::new(false));
        let housekeeping_stop_thread = Arc::clone(&housekeeping_stop);
        let housekeeping_handle = std::thread::spawn(move || {
            run_housekeeping_worker(housekeeping_registry, housekeeping_stop_thread);
        });

        Ok(Self {
            config,
            dtls_identity,
            dtls_ctx,
            registry,
            peers,
            ingest_handle: Mutex::new(Some(ingest_handle)),
            fanout_tx: Mutex::new(Some(fanout_tx)),
            fanout_handle: Mutex::new(Some(fanout_handle)),
            housekeeping_stop,
            housekeeping_handle: Mutex::new(Some(housekeeping_handle)),
            stopped: AtomicBool::new(false),
        })
    }

    /// Allocate a new peer, bind its UDP socket, and return its id plus an
    /// SDP offer (spec §4.N `AppendClient`).
    pub fn append_client(&self) -> Result<(PeerId, String), crate::error::Error> {
        let peer_id: PeerId = rand::thread_rng().gen();
        let local_ssrc: u32 = rand::thread_rng().gen();

        let (socket, bound_addr) =
            bind_peer_socket(&self.config).map_err(|e| crate::error::Error::Io(io_fatal(&e)))?;
        socket
            .set_read_timeout(Some(PEER_RECV_POLL_INTERVAL))
            .map_err(|e| crate::error::Error::Io(io_fatal(&e)))?;
        let socket = Arc::new(socket);

        let (events_tx, _events_rx) = crossbeam_channel::unbounded();
        let peer = Peer::new(peer_id, bound_addr, local_ssrc, &self.dtls_ctx, events_tx)?;

        let ice_ufrag = peer.ice_agent().local_ufrag.clone();
        let ice_pwd = peer.ice_agent().local_password.clone();
        let fingerprint_hex = dtls::format_fingerprint(&self.dtls_identity.fingerprint_sha256);

        self.registry.insert(peer);

        let worker_socket = Arc::clone(&socket);
        let worker_registry = Arc::clone(&self.registry);
        let worker = std::thread::spawn(move || {
            run_peer_io_worker(peer_id, worker_socket, worker_registry);
        });
        self.peers.lock().insert(peer_id, PeerHandle { socket, worker });

        let offer = sdp::build_offer(peer_id as u64, &ice_ufrag, &ice_pwd, &fingerprint_hex, bound_addr);
        crate::info!("[control] peer {peer_id:032x} created, offer built for {bound_addr}");
        Ok((peer_id, offer))
    }

    /// Apply a browser's SDP answer to a previously created peer (spec §4.N
    /// `AcceptAnswer`).
    pub fn accept_answer(&self, peer_id: PeerId, sdp_answer: &str) -> SetDescriptionResult {
        let Some(handle) = self.registry.get(peer_id) else {
            return SetDescriptionResult::Error;
        };

        let description = match sdp::parse(sdp_answer) {
            Ok(description) => description,
            Err(sdp::SdpError::NoMediaSections) => return SetDescriptionResult::NoRemoteMedia,
            Err(_) => return SetDescriptionResult::Error,
        };

        let Some(video) = description.video() else {
            return SetDescriptionResult::NoMatchingMediaType;
        };
        if !video.payload_types.contains(&VIDEO_PAYLOAD_TYPE) {
            return SetDescriptionResult::VideoIncompatible;
        }
        let Some(fingerprint) = &video.fingerprint else {
            return SetDescriptionResult::DtlsFingerprintMissing;
        };
        if fingerprint.algorithm != "sha-256" {
            return SetDescriptionResult::DtlsFingerprintDigestNotSupported;
        }
        let Some(fingerprint_bytes) = dtls::parse_fingerprint(&fingerprint.hex) else {
            return SetDescriptionResult::Error;
        };
        let (Some(remote_ufrag), Some(remote_pwd)) = (video.ice_ufrag.clone(), video.ice_pwd.clone())
        else {
            return SetDescriptionResult::Error;
        };

        let remote_candidates: Vec<Candidate> = video
            .candidates
            .iter()
            .map(|addr| Candidate::host(*addr, ICE_TYPE_PREF_HOST))
            .collect();

        let mut peer = handle.lock();
        if peer.has_remote_description() {
            return SetDescriptionResult::WrongSdpTypeOfferAfterOffer;
        }
        peer.accept_answer(remote_ufrag, remote_pwd, &remote_candidates, fingerprint_bytes);
        SetDescriptionResult::Ok
    }

    /// Close every peer and the ingest source, and join every worker thread
    /// (spec §4.N `Stop`).
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }

        self.registry.close_all();
        self.housekeeping_stop.store(true, Ordering::SeqCst);
        drop(self.fanout_tx.lock().take());

        if let Some(handle) = self.ingest_handle.lock().take() {
            let _ = handle.join();
        }
        for (_, handle) in self.peers.lock().drain() {
            let _ = handle.worker.join();
        }
        if let Some(handle) = self.fanout_handle.lock().take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.housekeeping_handle.lock().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Control {
    fn drop(&mut self) {
        self.stop();
    }
}

fn io_fatal(err: &std::io::Error) -> crate::error::IoFatal {
    match err.kind() {
        std::io::ErrorKind::NotConnected => crate::error::IoFatal::SocketClosed,
        _ => crate::error::IoFatal::Fatal,
    }
}

/// Try every port in `config.peer_port_range`, lowest-free-first, returning
/// a bound socket and the address it landed on.
fn bind_peer_socket(config: &RuntimeConfig) -> std::io::Result<(UdpSocket, std::net::SocketAddr)> {
    let ip = config.ingest_listen.ip();
    let mut last_err = None;
    for port in config.peer_port_range.clone() {
        match UdpSocket::bind((ip, port)) {
            Ok(socket) => {
                let addr = socket.local_addr()?;
                return Ok((socket, addr));
            }
            Err(err) => last_err = Some(err),
        }
    }
    Err(last_err
        .unwrap_or_else(|| std::io::Error::new(std::io::ErrorKind::AddrInUse, "peer port range is empty")))
}

/// Per-peer I/O worker (spec §5): owns one peer's UDP socket and feeds every
/// inbound datagram to [`Peer::on_datagram`], sending back whatever bytes it
/// returns. Exits once the peer has been removed from the registry (either
/// it closed itself, or [`Control::stop`] emptied the whole registry).
fn run_peer_io_worker(peer_id: PeerId, socket: Arc<UdpSocket>, registry: Arc<Registry>) {
    let mut buf = [0u8; crate::config::DEFAULT_MTU];
    loop {
        match socket.recv_from(&mut buf) {
            Ok((len, from)) => {
                let Some(handle) = registry.get(peer_id) else {
                    break;
                };
                let mut peer = handle.lock();
                let response = peer.on_datagram(&buf[..len], from);
                let terminal = matches!(peer.state(), PeerState::Failed | PeerState::Closed);
                drop(peer);
                if !response.is_empty() {
                    let _ = socket.send_to(&response, from);
                }
                if terminal {
                    break;
                }
            }
            Err(err)
                if matches!(err.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut) =>
            {
                match registry.get(peer_id) {
                    None => break,
                    Some(handle) => {
                        if matches!(handle.lock().state(), PeerState::Failed | PeerState::Closed) {
                            break;
                        }
                    }
                }
            }
            Err(err) => {
                crate::debug!("[peer {peer_id:032x}] socket error, stopping worker: {err}");
                break;
            }
        }
    }
    registry.remove(peer_id);
}

/// Fan-out worker (spec §5): drains re-serialized ingest packets off `rx`,
/// broadcasts each to every connected peer via the registry, and forwards
/// the raw payload to the TCP sink (spec §4.M's secondary delivery path).
/// Terminates once `rx` is closed (all senders dropped by [`Control::stop`]).
fn run_fanout_worker(
    registry: Arc<Registry>,
    peers: PeerMap,
    rx: crossbeam_channel::Receiver<Vec<u8>>,
    mut sink: Option<TcpSink>,
) {
    for raw in rx {
        let Ok((packet, _csrc)) = RtpPacket::parse(&raw) else {
            continue;
        };

        if let Some(active_sink) = sink.as_mut() {
            if let Err(err) = active_sink.send_payload(packet.payload) {
                crate::warn!("[fanout] TCP sink terminated: {err}");
                sink = None;
            }
        }

        let peers = peers.lock();
        registry.broadcast(&packet, |id, addr, bytes| {
            if let Some(handle) = peers.get(&id) {
                let _ = handle.socket.send_to(&bytes, addr);
            }
        });
    }
}

/// Housekeeping worker (spec §5): periodically ticks every peer's ICE
/// liveness window and DTLS handshake timeout.
fn run_housekeeping_worker(registry: Arc<Registry>, stop: Arc<AtomicBool>) {
    while !stop.load(Ordering::SeqCst) {
        std::thread::sleep(HOUSEKEEPING_INTERVAL);
        let now = Instant::now();
        registry.for_each(|_id, handle| {
            let mut peer = handle.lock();
            peer.check_liveness(now, DEFAULT_STUN_RTO);
            peer.check_handshake_timeout(now, DEFAULT_DTLS_HANDSHAKE_TIMEOUT);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};

    fn loopback(port: u16) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), port)
    }

    fn test_config() -> Arc<RuntimeConfig> {
        let mut cfg = (*RuntimeConfig::new(loopback(0), loopback(0))).clone();
        cfg.peer_port_range = 0..=0;
        Arc::new(cfg)
    }

    #[test]
    fn append_client_returns_an_offer_containing_the_bound_port() {
        let control = Control::start(test_config()).expect("control should start");
        let (peer_id, offer) = control.append_client().expect("append_client should succeed");
        assert_ne!(peer_id, 0);
        assert!(offer.contains("m=video"));
        assert!(offer.contains("a=ice-ufrag:"));
        assert!(offer.contains("a=fingerprint:sha-256"));
        control.stop();
    }

    #[test]
    fn accept_answer_rejects_an_unknown_peer() {
        let control = Control::start(test_config()).expect("control should start");
        let result = control.accept_answer(0xDEAD_BEEF, "v=0\r\nm=video 5000 RTP/AVP 96\r\n");
        assert_eq!(result, SetDescriptionResult::Error);
        control.stop();
    }

    #[test]
    fn accept_answer_with_no_media_is_no_remote_media() {
        let control = Control::start(test_config()).expect("control should start");
        let (peer_id, _offer) = control.append_client().expect("append_client should succeed");
        let result = control.accept_answer(peer_id, "v=0\r\no=- 1 0 IN IP4 0.0.0.0\r\n");
        assert_eq!(result, SetDescriptionResult::NoRemoteMedia);
        control.stop();
    }

    #[test]
    fn accept_answer_with_missing_fingerprint_is_reported() {
        let control = Control::start(test_config()).expect("control should start");
        let (peer_id, _offer) = control.append_client().expect("append_client should succeed");
        let answer = "v=0\r\nm=video 5000 UDP/TLS/RTP/SAVPF 96\r\na=ice-ufrag:u\r\na=ice-pwd:p\r\n";
        let result = control.accept_answer(peer_id, answer);
        assert_eq!(result, SetDescriptionResult::DtlsFingerprintMissing);
        control.stop();
    }

    #[test]
    fn accept_answer_with_unsupported_digest_is_reported() {
        let control = Control::start(test_config()).expect("control should start");
        let (peer_id, _offer) = control.append_client().expect("append_client should succeed");
        let answer = "v=0\r\nm=video 5000 UDP/TLS/RTP/SAVPF 96\r\na=ice-ufrag:u\r\na=ice-pwd:p\r\na=fingerprint:sha-1 AA:BB\r\n";
        let result = control.accept_answer(peer_id, answer);
        assert_eq!(result, SetDescriptionResult::DtlsFingerprintDigestNotSupported);
        control.stop();
    }

    #[test]
    fn accept_answer_twice_is_wrong_sdp_type_offer_after_offer() {
        let control = Control::start(test_config()).expect("control should start");
        let (peer_id, _offer) = control.append_client().expect("append_client should succeed");
        let fingerprint = dtls::format_fingerprint(&[0xAB; 32]);
        let answer = format!(
            "v=0\r\nm=video 5000 UDP/TLS/RTP/SAVPF 96\r\na=ice-ufrag:u\r\na=ice-pwd:abcdefghijklmnopqrstuv\r\na=fingerprint:sha-256 {fingerprint}\r\na=candidate:1 1 udp 100 127.0.0.1 5000 typ host\r\n"
        );
        assert_eq!(control.accept_answer(peer_id, &answer), SetDescriptionResult::Ok);
        assert_eq!(
            control.accept_answer(peer_id, &answer),
            SetDescriptionResult::WrongSdpTypeOfferAfterOffer
        );
        control.stop();
    }

    #[test]
    fn stop_is_idempotent() {
        let control = Control::start(test_config()).expect("control should start");
        control.append_client().expect("append_client should succeed");
        control.stop();
        control.stop();
    }
}
