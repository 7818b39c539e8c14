// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # wrtc-relay
//!
//! A single-stream RTP-to-WebRTC relay: one upstream RTP feed comes in over
//! plain UDP, and every connected browser peer gets its own ICE-lite/DTLS-SRTP
//! session fanning the same packets back out, encrypted. A secondary
//! length-prefixed TCP sink gets the same payloads unencrypted for local
//! recording/decoding.
//!
//! ## Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use wrtc_relay::config::RuntimeConfig;
//! use wrtc_relay::control::Control;
//!
//! # fn main() -> Result<(), wrtc_relay::error::Error> {
//! let config = RuntimeConfig::new(
//!     "0.0.0.0:5000".parse().unwrap(),
//!     "127.0.0.1:9000".parse().unwrap(),
//! );
//! let relay = Control::start(config)?;
//! let (peer_id, offer) = relay.append_client()?;
//! // hand `offer` to the browser, get back an answer, then:
//! // relay.accept_answer(peer_id, &answer);
//! # let _ = (peer_id, offer);
//! relay.stop();
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! | Module | Role |
//! |--------|------|
//! | [`config`] | Protocol constants and [`config::RuntimeConfig`] |
//! | [`control`] | The public [`control::Control`] API and its worker threads |
//! | [`ingest`] | Pooled UDP source for the upstream RTP feed |
//! | [`mux`] | Peer registry and broadcast fan-out |
//! | [`peer`] | Per-peer ICE/DTLS/SRTP session state machine |
//! | [`sink`] | Length-prefixed TCP restream of raw RTP payloads |
//! | [`sdp`] | Minimal SDP offer/answer model |
//! | [`ice`] | ICE-lite connectivity-check agent |
//! | [`dtls`] | DTLS-SRTP handshake adapter over `openssl` |
//! | [`srtp`] | SRTP sender (protect-only) |
//! | [`stun`] | STUN message codec |
//! | [`rtp`] | RTP fixed-header parse/serialize |
//! | [`rtcp`] | RTCP compound packet walker |
//! | [`demux`] | First-bytes datagram classifier (STUN/DTLS/RTCP/RTP) |
//! | [`fec`] | GF(256) forward error correction decoder |
//! | [`gf256`] | GF(256) field arithmetic primitives |
//! | [`pool`] | Pre-allocated MTU-sized buffer pool |
//! | [`crc32`] | CRC-32/ISO-HDLC, used by STUN FINGERPRINT and ICE foundations |
//! | [`error`] | Crate-wide error taxonomy |
//! | [`logging`] | Compile-time configurable logging |

/// Relay configuration: protocol constants plus [`config::RuntimeConfig`].
pub mod config;
/// Control API (`Control::start`/`append_client`/`accept_answer`/`stop`) and
/// the ingest/fan-out/per-peer/housekeeping worker threads.
pub mod control;
/// CRC-32/ISO-HDLC checksum.
pub mod crc32;
/// UDP datagram first-bytes classifier (STUN/DTLS/RTCP/RTP).
pub mod demux;
/// DTLS-SRTP handshake adapter.
pub mod dtls;
/// Crate-wide error taxonomy and the `SetDescriptionResult` outcome code.
pub mod error;
/// GF(256) forward error correction decoder.
pub mod fec;
/// GF(256) field arithmetic primitives.
pub mod gf256;
/// ICE-lite connectivity-check agent.
pub mod ice;
/// Pooled UDP ingest source for the upstream RTP feed.
pub mod ingest;
/// Compile-time configurable logging.
pub mod logging;
/// Small matrix inversion helper used by the FEC decoder.
pub mod matrix;
/// Stream multiplexer: the peer registry and broadcast fan-out.
pub mod mux;
/// Per-peer ICE/DTLS/SRTP session state machine.
pub mod peer;
/// Pre-allocated MTU-sized buffer pool.
pub mod pool;
/// RTCP compound packet walker.
pub mod rtcp;
/// RTP fixed-header parse/serialize.
pub mod rtp;
/// Minimal SDP offer/answer model.
pub mod sdp;
/// Length-prefixed TCP restream of raw RTP payloads.
pub mod sink;
/// SRTP sender (protect-only).
pub mod srtp;
/// STUN message codec.
pub mod stun;

pub use config::RuntimeConfig;
pub use control::Control;
pub use error::{Error, SetDescriptionResult};
pub use peer::{Peer, PeerId, PeerState};
