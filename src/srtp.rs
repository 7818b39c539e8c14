// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! SRTP sender (RFC 3711 §4.1.1/§4.2, spec §4.H).
//!
//! This relay only ever sends SRTP — the peer never sends RTP back (spec
//! §4.I) — so there is no unprotect path, no replay window, and no need to
//! track a remote rollover counter. `aes`+`ctr` compose the AES-CM-128
//! keystream the way the RustCrypto ecosystem always does (block cipher
//! wrapped in a generic counter-mode stream cipher type), and `hmac`+`sha1`
//! produce the truncated authentication tag, matching the crate pairing
//! already used for STUN's MESSAGE-INTEGRITY in `stun.rs`.

use std::fmt;

use aes::Aes128;
use cipher::{KeyIvInit, StreamCipher};
use ctr::Ctr128BE;
use hmac::{Hmac, Mac};
use rand::Rng;
use sha1::Sha1;

use crate::dtls::SrtpKeyingMaterial;
use crate::rtp::RtpPacket;

type Aes128Ctr = Ctr128BE<Aes128>;
type HmacSha1 = Hmac<Sha1>;

/// Length of the truncated HMAC-SHA1-80 authentication tag, in bytes.
const AUTH_TAG_LEN: usize = 10;

/// SRTP failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SrtpError {
    /// The RTP packet was too short to protect (no fixed header).
    PacketTooShort,
}

impl fmt::Display for SrtpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PacketTooShort => write!(f, "RTP packet shorter than the fixed header"),
        }
    }
}

impl std::error::Error for SrtpError {}

/// This relay skips the full RFC 3711 §4.3 label-based key derivation
/// function: the DTLS-exported master key is used directly as the AES-CM
/// session key, and the HMAC-SHA1 auth key (which SHA1's 20-byte output
/// conveniently sizes for) is derived as `HMAC-SHA1(master_key, label)`.
/// There is no rekeying in this system's lifetime of a peer, so a single
/// per-session derivation is sufficient.
fn derive_auth_key(master_key: &[u8; 16]) -> [u8; 20] {
    let mut mac = HmacSha1::new_from_slice(master_key).expect("HMAC accepts any key length");
    mac.update(b"wrtc-relay srtp auth key");
    let tag = mac.finalize().into_bytes();
    let mut out = [0u8; 20];
    out.copy_from_slice(&tag);
    out
}

/// RFC 3711 §4.1.1 per-packet IV: `(k_s * 2^16) XOR (SSRC * 2^64) XOR (i * 2^16)`
/// as a 128-bit big-endian integer, where `k_s` is the 112-bit master salt and
/// `i` is the 48-bit packet index `(ROC << 16) | sequence_number`.
fn compute_iv(salt: &[u8; 14], ssrc: u32, packet_index: u64) -> [u8; 16] {
    let mut iv = [0u8; 16];
    iv[..14].copy_from_slice(salt);
    let ssrc_bytes = ssrc.to_be_bytes();
    for i in 0..4 {
        iv[4 + i] ^= ssrc_bytes[i];
    }
    let idx_bytes = packet_index.to_be_bytes();
    for i in 0..6 {
        iv[8 + i] ^= idx_bytes[2 + i];
    }
    iv
}

/// Per-peer SRTP send context: rewrites SSRC/sequence, encrypts, and signs.
pub struct SenderContext {
    enc_key: [u8; 16],
    salt: [u8; 14],
    auth_key: [u8; 20],
    local_ssrc: u32,
    base_seq_ingest: Option<u16>,
    base_seq_local: u16,
    last_seq_local: Option<u16>,
    rollover: u32,
}

impl SenderContext {
    /// Build a sender context from DTLS-exported keying material and the
    /// peer's locally-assigned outgoing SSRC (spec §4.H.1).
    #[must_use]
    pub fn new(keying: &SrtpKeyingMaterial, local_ssrc: u32) -> Self {
        let auth_key = derive_auth_key(&keying.server_write_key);
        let base_seq_local: u16 = rand::thread_rng().gen();
        Self {
            enc_key: keying.server_write_key,
            salt: keying.server_write_salt,
            auth_key,
            local_ssrc,
            base_seq_ingest: None,
            base_seq_local,
            last_seq_local: None,
            rollover: 0,
        }
    }

    /// Rebase an ingest sequence number onto this session's local numbering
    /// (spec §4.H.2), tracking rollover as the local sequence wraps.
    fn rebase_sequence(&mut self, ingest_seq: u16) -> (u16, u32) {
        let base_ingest = *self.base_seq_ingest.get_or_insert(ingest_seq);
        let delta = ingest_seq.wrapping_sub(base_ingest);
        let seq_local = self.base_seq_local.wrapping_add(delta);

        if let Some(last) = self.last_seq_local {
            // A large backward jump (> half the sequence space) means the
            // 16-bit local counter wrapped past 65535.
            if last > seq_local && (last - seq_local) as u32 > 0x8000 {
                self.rollover = self.rollover.wrapping_add(1);
            }
        }
        self.last_seq_local = Some(seq_local);
        (seq_local, self.rollover)
    }

    /// Protect one ingest RTP packet for this peer: rewrite SSRC/sequence,
    /// AES-CM-128 encrypt the payload, and append the HMAC-SHA1-80 tag.
    pub fn protect(&mut self, ingest: &RtpPacket<'_>) -> Result<Vec<u8>, SrtpError> {
        let (seq_local, roc) = self.rebase_sequence(ingest.sequence_number);
        let packet_index = (u64::from(roc) << 16) | u64::from(seq_local);

        let header_pkt = RtpPacket {
            version: 2,
            padding: false,
            extension: false,
            marker: ingest.marker,
            payload_type: ingest.payload_type,
            sequence_number: seq_local,
            timestamp: ingest.timestamp,
            ssrc: self.local_ssrc,
            csrc: &[],
            payload: &[],
        };
        let mut out = Vec::with_capacity(12 + ingest.payload.len() + AUTH_TAG_LEN);
        header_pkt.write_to(&mut out);
        let header_len = out.len();

        let mut ciphertext = ingest.payload.to_vec();
        let iv = compute_iv(&self.salt, self.local_ssrc, packet_index);
        let mut cipher = Aes128Ctr::new((&self.enc_key).into(), (&iv).into());
        cipher.apply_keystream(&mut ciphertext);
        out.extend_from_slice(&ciphertext);
        debug_assert_eq!(out.len(), header_len + ciphertext.len());

        let mut mac = HmacSha1::new_from_slice(&self.auth_key).expect("HMAC accepts any key length");
        mac.update(&out);
        mac.update(&roc.to_be_bytes());
        let tag = mac.finalize().into_bytes();
        out.extend_from_slice(&tag[..AUTH_TAG_LEN]);

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keying() -> SrtpKeyingMaterial {
        SrtpKeyingMaterial {
            client_write_key: [1u8; 16],
            client_write_salt: [2u8; 14],
            server_write_key: [3u8; 16],
            server_write_salt: [4u8; 14],
        }
    }

    #[test]
    fn protect_rewrites_ssrc_and_rebases_sequence() {
        let mut ctx = SenderContext::new(&keying(), 0xDEAD_BEEF);
        let pkt = RtpPacket {
            version: 2,
            padding: false,
            extension: false,
            marker: false,
            payload_type: 96,
            sequence_number: 1000,
            timestamp: 90_000,
            ssrc: 0x1111_1111,
            csrc: &[],
            payload: b"video-bytes",
        };
        let protected = ctx.protect(&pkt).unwrap();
        let (parsed, _) = RtpPacket::parse(&protected).unwrap();
        assert_eq!(parsed.ssrc, 0xDEAD_BEEF);
        // First packet: local sequence equals the randomly chosen base.
        assert_eq!(parsed.sequence_number, ctx.base_seq_local);
        assert_eq!(
            protected.len(),
            12 + pkt.payload.len() + AUTH_TAG_LEN
        );
    }

    #[test]
    fn protect_preserves_sequence_deltas_across_packets() {
        let mut ctx = SenderContext::new(&keying(), 42);
        let base = RtpPacket {
            version: 2,
            padding: false,
            extension: false,
            marker: false,
            payload_type: 96,
            sequence_number: 100,
            timestamp: 0,
            ssrc: 7,
            csrc: &[],
            payload: b"a",
        };
        let first = ctx.protect(&base).unwrap();
        let (first_parsed, _) = RtpPacket::parse(&first).unwrap();

        let next = RtpPacket {
            sequence_number: 105,
            ..base
        };
        let second = ctx.protect(&next).unwrap();
        let (second_parsed, _) = RtpPacket::parse(&second).unwrap();

        assert_eq!(
            second_parsed.sequence_number.wrapping_sub(first_parsed.sequence_number),
            5
        );
    }

    #[test]
    fn protect_is_deterministic_for_identical_context_state() {
        let keying = keying();
        let pkt = RtpPacket {
            version: 2,
            padding: false,
            extension: false,
            marker: false,
            payload_type: 96,
            sequence_number: 1,
            timestamp: 1,
            ssrc: 1,
            csrc: &[],
            payload: b"same-bytes",
        };
        let mut ctx_a = SenderContext::new(&keying, 99);
        ctx_a.base_seq_local = 0;
        let mut ctx_b = SenderContext::new(&keying, 99);
        ctx_b.base_seq_local = 0;

        assert_eq!(ctx_a.protect(&pkt).unwrap(), ctx_b.protect(&pkt).unwrap());
    }

    #[test]
    fn different_payloads_never_collide_in_ciphertext() {
        let keying = keying();
        let mut ctx = SenderContext::new(&keying, 1);
        ctx.base_seq_local = 0;
        let pkt_a = RtpPacket {
            version: 2,
            padding: false,
            extension: false,
            marker: false,
            payload_type: 96,
            sequence_number: 1,
            timestamp: 1,
            ssrc: 1,
            csrc: &[],
            payload: b"payload-one",
        };
        let pkt_b = RtpPacket {
            payload: b"payload-two",
            ..pkt_a
        };
        let out_a = ctx.protect(&pkt_a).unwrap();
        let out_b = ctx.protect(&pkt_b).unwrap();
        assert_ne!(out_a, out_b);
    }
}
