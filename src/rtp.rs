// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! RTP fixed-header parse/serialize (RFC 3550 §5.1, spec §4.D).
//!
//! Parsing borrows the payload as a slice of the caller's buffer — no copy —
//! so the pooled source (§4.K) can hand packets to fan-out without an
//! allocation per packet.

use std::fmt;

/// RTP parse failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RtpError {
    /// Buffer shorter than the fixed 12-byte header.
    TooShort,
    /// The version field was not 2.
    UnsupportedVersion(u8),
    /// The declared CSRC count (or header extension) runs past the buffer.
    HeaderOverrun,
}

impl fmt::Display for RtpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooShort => write!(f, "RTP packet shorter than the fixed header"),
            Self::UnsupportedVersion(v) => write!(f, "unsupported RTP version {v}"),
            Self::HeaderOverrun => write!(f, "RTP header fields run past the end of the buffer"),
        }
    }
}

impl std::error::Error for RtpError {}

const FIXED_HEADER_LEN: usize = 12;

/// A parsed RTP packet borrowing its payload from the source buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtpPacket<'a> {
    /// Always 2 after a successful parse.
    pub version: u8,
    /// Padding bit; true if the payload's trailing bytes include padding.
    pub padding: bool,
    /// True if a header extension follows the CSRC list.
    pub extension: bool,
    /// Marker bit, profile-defined (frame boundary for video).
    pub marker: bool,
    /// Payload type (RFC 3551 / negotiated dynamically).
    pub payload_type: u8,
    /// Sequence number, increments by one per packet, wraps at 65536.
    pub sequence_number: u16,
    /// Sampling-instant timestamp of the first payload octet.
    pub timestamp: u32,
    /// Synchronization source identifier.
    pub ssrc: u32,
    /// Contributing source identifiers (0-15 entries per `csrc_count`).
    pub csrc: &'a [u32],
    /// Payload bytes, excluding any header extension and declared padding.
    pub payload: &'a [u8],
}

fn u32_list_from_be_bytes(buf: &[u8]) -> Vec<u32> {
    buf.chunks_exact(4)
        .map(|c| u32::from_be_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

impl<'a> RtpPacket<'a> {
    /// Parse the fixed header plus CSRC list and header extension (if
    /// present), borrowing the remaining bytes as `payload`.
    ///
    /// CSRC identifiers are returned via an owned `Vec` rather than a slice
    /// reinterpretation, since RTP is big-endian and the buffer's native
    /// byte order cannot be assumed to match the host's.
    pub fn parse(buf: &'a [u8]) -> Result<(Self, Vec<u32>), RtpError> {
        if buf.len() < FIXED_HEADER_LEN {
            return Err(RtpError::TooShort);
        }

        let b0 = buf[0];
        let version = b0 >> 6;
        if version != 2 {
            return Err(RtpError::UnsupportedVersion(version));
        }
        let padding = (b0 & 0x20) != 0;
        let extension = (b0 & 0x10) != 0;
        let csrc_count = (b0 & 0x0F) as usize;

        let b1 = buf[1];
        let marker = (b1 & 0x80) != 0;
        let payload_type = b1 & 0x7F;

        let sequence_number = u16::from_be_bytes([buf[2], buf[3]]);
        let timestamp = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);
        let ssrc = u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]);

        let csrc_bytes_len = csrc_count * 4;
        let mut offset = FIXED_HEADER_LEN;
        if buf.len() < offset + csrc_bytes_len {
            return Err(RtpError::HeaderOverrun);
        }
        let csrc = u32_list_from_be_bytes(&buf[offset..offset + csrc_bytes_len]);
        offset += csrc_bytes_len;

        if extension {
            if buf.len() < offset + 4 {
                return Err(RtpError::HeaderOverrun);
            }
            // Extension header: 16-bit profile-specific id (ignored; unknown
            // profile ids are tolerated per spec §4.D), 16-bit length in
            // 32-bit words.
            let ext_len_words = u16::from_be_bytes([buf[offset + 2], buf[offset + 3]]) as usize;
            offset += 4;
            let ext_bytes_len = ext_len_words * 4;
            if buf.len() < offset + ext_bytes_len {
                return Err(RtpError::HeaderOverrun);
            }
            offset += ext_bytes_len;
        }

        let payload = &buf[offset..];

        Ok((
            Self {
                version,
                padding,
                extension,
                marker,
                payload_type,
                sequence_number,
                timestamp,
                ssrc,
                csrc: &[],
                payload,
            },
            csrc,
        ))
    }

    /// Serialize this packet (header extension not reproduced — only the
    /// fixed header, CSRC list, and payload are written, matching what this
    /// system ever needs to emit on the SRTP send path).
    pub fn write_to(&self, out: &mut Vec<u8>) {
        let b0 = (self.version << 6)
            | (u8::from(self.padding) << 5)
            | (u8::from(self.extension) << 4)
            | (self.csrc.len() as u8 & 0x0F);
        out.push(b0);
        out.push((u8::from(self.marker) << 7) | (self.payload_type & 0x7F));
        out.extend_from_slice(&self.sequence_number.to_be_bytes());
        out.extend_from_slice(&self.timestamp.to_be_bytes());
        out.extend_from_slice(&self.ssrc.to_be_bytes());
        for c in self.csrc {
            out.extend_from_slice(&c.to_be_bytes());
        }
        out.extend_from_slice(self.payload);
    }
}
