// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! RTCP compound packet parse/serialize (RFC 3550 §6, spec §4.D).
//!
//! A compound packet is a back-to-back sequence of individual RTCP packets,
//! each self-describing its own length. [`walk`] dispatches on the
//! packet-type byte the way a reader would scan a TLV stream; an unknown
//! type aborts the walk rather than guessing at its length.

use std::fmt;

/// RTCP parse failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RtcpError {
    /// Buffer shorter than the 4-byte RTCP header.
    TooShort,
    /// The `length` header field, once converted to bytes, runs past the buffer.
    LengthOverrun,
    /// The version field was not 2.
    UnsupportedVersion(u8),
    /// A packet-type byte this decoder does not recognize.
    UnknownPacketType(u8),
}

impl fmt::Display for RtcpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooShort => write!(f, "RTCP packet shorter than the 4-byte header"),
            Self::LengthOverrun => write!(f, "RTCP length field runs past the buffer"),
            Self::UnsupportedVersion(v) => write!(f, "unsupported RTCP version {v}"),
            Self::UnknownPacketType(t) => write!(f, "unknown RTCP packet type {t}"),
        }
    }
}

impl std::error::Error for RtcpError {}

/// RTCP packet-type byte values (RFC 3550 §12.1, RFC 4585 for feedback types).
pub mod packet_type {
    pub const SENDER_REPORT: u8 = 200;
    pub const RECEIVER_REPORT: u8 = 201;
    pub const SDES: u8 = 202;
    pub const BYE: u8 = 203;
    pub const APP: u8 = 204;
    pub const RTPFB: u8 = 205;
    pub const PSFB: u8 = 206;
    pub const XR: u8 = 207;
}

/// A per-source reception report block, common to SR and RR (RFC 3550 §6.4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceptionReport {
    /// SSRC of the source this block reports on.
    pub ssrc: u32,
    /// Fraction of packets lost since the previous report (RFC 3550 §6.4.1, 8-bit fixed-point).
    pub fraction_lost: u8,
    /// Cumulative number of packets lost (signed 24-bit, stored widened).
    pub packets_lost: i32,
    /// Highest sequence number received, extended with the rollover count.
    pub highest_sequence: u32,
    /// Interarrival jitter estimate.
    pub jitter: u32,
    /// Middle 32 bits of the NTP timestamp from the last SR received from this
    /// source, read once at RFC 3550 byte offset 16 of the report block (0 if
    /// no SR has been received yet).
    pub last_sr: u32,
    /// Delay, in units of 1/65536 seconds, since the last SR was received.
    pub delay_since_last_sr: u32,
}

const REPORT_BLOCK_LEN: usize = 24;

impl ReceptionReport {
    fn parse(buf: &[u8]) -> Result<Self, RtcpError> {
        if buf.len() < REPORT_BLOCK_LEN {
            return Err(RtcpError::LengthOverrun);
        }
        let ssrc = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
        let fraction_lost = buf[4];
        let packets_lost = i32::from_be_bytes([0, buf[5], buf[6], buf[7]]) << 8 >> 8; // sign-extend 24-bit
        let highest_sequence = u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]);
        let jitter = u32::from_be_bytes([buf[12], buf[13], buf[14], buf[15]]);
        // Byte offset 16 per the resolved open question: read once, not
        // re-derived from a second field later in the block.
        let last_sr = u32::from_be_bytes([buf[16], buf[17], buf[18], buf[19]]);
        let delay_since_last_sr = u32::from_be_bytes([buf[20], buf[21], buf[22], buf[23]]);
        Ok(Self {
            ssrc,
            fraction_lost,
            packets_lost,
            highest_sequence,
            jitter,
            last_sr,
            delay_since_last_sr,
        })
    }

    fn write_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.ssrc.to_be_bytes());
        out.push(self.fraction_lost);
        let lost_bytes = self.packets_lost.to_be_bytes();
        out.extend_from_slice(&lost_bytes[1..4]);
        out.extend_from_slice(&self.highest_sequence.to_be_bytes());
        out.extend_from_slice(&self.jitter.to_be_bytes());
        out.extend_from_slice(&self.last_sr.to_be_bytes());
        out.extend_from_slice(&self.delay_since_last_sr.to_be_bytes());
    }
}

/// Sender Report (RFC 3550 §6.4.1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SenderReport {
    /// SSRC of the report's originator.
    pub ssrc: u32,
    /// 64-bit NTP wallclock time the report was sent.
    pub ntp_time: u64,
    /// RTP-domain timestamp corresponding to `ntp_time`.
    pub rtp_time: u32,
    /// Cumulative RTP packets sent by this source.
    pub packet_count: u32,
    /// Cumulative payload octets sent by this source.
    pub octet_count: u32,
    /// Per-source reception reports.
    pub reports: Vec<ReceptionReport>,
}

/// Receiver Report (RFC 3550 §6.4.2) — identical to a Sender Report minus the
/// sender-info block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiverReport {
    /// SSRC of the report's originator (a receiver, not a sender).
    pub ssrc: u32,
    /// Per-source reception reports.
    pub reports: Vec<ReceptionReport>,
}

/// One SDES chunk: an SSRC/CSRC plus its items (only CNAME is modeled; other
/// item types are skipped but still advance the cursor correctly).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdesChunk {
    /// Source this chunk describes.
    pub source: u32,
    /// CNAME item, if present.
    pub cname: Option<String>,
}

/// Source Description (RFC 3550 §6.5).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sdes {
    /// One chunk per described source.
    pub chunks: Vec<SdesChunk>,
}

/// Goodbye (RFC 3550 §6.6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bye {
    /// Sources leaving the session.
    pub sources: Vec<u32>,
    /// Optional human-readable reason.
    pub reason: Option<String>,
}

/// Generic NACK feedback message (RFC 4585 §6.2.1, RTPFB with FMT=1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NackItem {
    /// Sequence number of the first lost packet this item reports.
    pub packet_id: u16,
    /// Bitmask of up to 16 further lost packets following `packet_id`.
    pub bitmask: u16,
}

/// Transport-layer feedback packet (RFC 4585 §6.2). Only the generic NACK
/// format is modeled; other `fmt` values are preserved as raw bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rtpfb {
    /// Feedback message type (1 = Generic NACK).
    pub fmt: u8,
    /// SSRC of the packet sender.
    pub sender_ssrc: u32,
    /// SSRC of the media source being reported on.
    pub media_ssrc: u32,
    /// Parsed NACK items, if `fmt == 1`; otherwise empty and `raw` holds the body.
    pub nacks: Vec<NackItem>,
    /// Raw feedback-control-information bytes (always populated).
    pub raw: Vec<u8>,
}

/// Payload-specific feedback packet (RFC 4585 §6.3). Only PLI (fmt=1, empty
/// body) is specially recognized; others are carried as raw bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Psfb {
    /// Feedback message type (1 = Picture Loss Indication).
    pub fmt: u8,
    /// SSRC of the packet sender.
    pub sender_ssrc: u32,
    /// SSRC of the media source being reported on.
    pub media_ssrc: u32,
    /// Raw feedback-control-information bytes.
    pub raw: Vec<u8>,
}

/// Extended Report (RFC 3611) — carried opaquely; this system neither
/// originates nor interprets XR blocks today.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtendedReport {
    /// SSRC of the report originator.
    pub ssrc: u32,
    /// Raw report-block bytes following the 4-byte SSRC.
    pub raw: Vec<u8>,
}

/// One packet within a compound RTCP buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RtcpPacket {
    /// Sender report.
    Sr(SenderReport),
    /// Receiver report.
    Rr(ReceiverReport),
    /// Source description.
    Sdes(Sdes),
    /// Goodbye.
    Bye(Bye),
    /// Transport-layer feedback (NACK).
    Rtpfb(Rtpfb),
    /// Payload-specific feedback (PLI/AFB).
    Psfb(Psfb),
    /// Extended report.
    Xr(ExtendedReport),
}

/// Decoded common RTCP header (RFC 3550 §6.1).
struct Header {
    padding: bool,
    count: u8,
    packet_type: u8,
    /// Length in bytes of this packet, including the 4-byte header
    /// (`(length_words + 1) * 4`).
    total_len: usize,
}

fn parse_header(buf: &[u8]) -> Result<Header, RtcpError> {
    if buf.len() < 4 {
        return Err(RtcpError::TooShort);
    }
    let version = buf[0] >> 6;
    if version != 2 {
        return Err(RtcpError::UnsupportedVersion(version));
    }
    let padding = (buf[0] & 0x20) != 0;
    let count = buf[0] & 0x1F;
    let packet_type = buf[1];
    let length_words = u16::from_be_bytes([buf[2], buf[3]]) as usize;
    let total_len = (length_words + 1) * 4;
    if buf.len() < total_len {
        return Err(RtcpError::LengthOverrun);
    }
    Ok(Header {
        padding,
        count,
        packet_type,
        total_len,
    })
}

fn read_cstring_item(buf: &[u8]) -> (String, usize) {
    // SDES item: 1-byte length followed by that many UTF-8 bytes (no NUL terminator).
    if buf.is_empty() {
        return (String::new(), 0);
    }
    let len = buf[0] as usize;
    let end = (1 + len).min(buf.len());
    let text = String::from_utf8_lossy(&buf[1..end]).into_owned();
    (text, end)
}

fn parse_sr(buf: &[u8], header: &Header) -> Result<SenderReport, RtcpError> {
    if buf.len() < header.total_len || header.total_len < 4 + 20 {
        return Err(RtcpError::LengthOverrun);
    }
    let body = &buf[4..header.total_len];
    if body.len() < 20 {
        return Err(RtcpError::LengthOverrun);
    }
    let ssrc = u32::from_be_bytes([body[0], body[1], body[2], body[3]]);
    let ntp_time = u64::from_be_bytes(body[4..12].try_into().unwrap());
    let rtp_time = u32::from_be_bytes([body[12], body[13], body[14], body[15]]);
    let packet_count = u32::from_be_bytes([body[16], body[17], body[18], body[19]]);
    let octet_count = u32::from_be_bytes([body[20], body[21], body[22], body[23]]);

    let mut reports = Vec::with_capacity(header.count as usize);
    let mut off = 24;
    for _ in 0..header.count {
        let block = body.get(off..).ok_or(RtcpError::LengthOverrun)?;
        reports.push(ReceptionReport::parse(block)?);
        off += REPORT_BLOCK_LEN;
    }

    Ok(SenderReport {
        ssrc,
        ntp_time,
        rtp_time,
        packet_count,
        octet_count,
        reports,
    })
}

fn parse_rr(buf: &[u8], header: &Header) -> Result<ReceiverReport, RtcpError> {
    let body = &buf[4..header.total_len];
    if body.len() < 4 {
        return Err(RtcpError::LengthOverrun);
    }
    let ssrc = u32::from_be_bytes([body[0], body[1], body[2], body[3]]);
    let mut reports = Vec::with_capacity(header.count as usize);
    let mut off = 4;
    for _ in 0..header.count {
        let block = body.get(off..).ok_or(RtcpError::LengthOverrun)?;
        reports.push(ReceptionReport::parse(block)?);
        off += REPORT_BLOCK_LEN;
    }
    Ok(ReceiverReport { ssrc, reports })
}

fn parse_sdes(buf: &[u8], header: &Header) -> Result<Sdes, RtcpError> {
    const CNAME_ITEM_TYPE: u8 = 1;
    let body = &buf[4..header.total_len];
    let mut chunks = Vec::with_capacity(header.count as usize);
    let mut off = 0;
    for _ in 0..header.count {
        if body.len() < off + 4 {
            return Err(RtcpError::LengthOverrun);
        }
        let source = u32::from_be_bytes([body[off], body[off + 1], body[off + 2], body[off + 3]]);
        off += 4;
        let mut cname = None;
        loop {
            let Some(&item_type) = body.get(off) else {
                return Err(RtcpError::LengthOverrun);
            };
            if item_type == 0 {
                off += 1;
                break;
            }
            let (text, consumed) = read_cstring_item(&body[off + 1..]);
            if item_type == CNAME_ITEM_TYPE {
                cname = Some(text);
            }
            off += 1 + consumed;
        }
        // Each chunk is padded to a 32-bit boundary.
        while off % 4 != 0 {
            off += 1;
        }
        chunks.push(SdesChunk { source, cname });
    }
    Ok(Sdes { chunks })
}

fn parse_bye(buf: &[u8], header: &Header) -> Result<Bye, RtcpError> {
    let body = &buf[4..header.total_len];
    let mut sources = Vec::with_capacity(header.count as usize);
    let mut off = 0;
    for _ in 0..header.count {
        if body.len() < off + 4 {
            return Err(RtcpError::LengthOverrun);
        }
        sources.push(u32::from_be_bytes([
            body[off],
            body[off + 1],
            body[off + 2],
            body[off + 3],
        ]));
        off += 4;
    }
    let reason = if off < body.len() {
        let (text, _) = read_cstring_item(&body[off..]);
        Some(text)
    } else {
        None
    };
    Ok(Bye { sources, reason })
}

fn parse_rtpfb(buf: &[u8], header: &Header) -> Result<Rtpfb, RtcpError> {
    const GENERIC_NACK: u8 = 1;
    let body = &buf[4..header.total_len];
    if body.len() < 8 {
        return Err(RtcpError::LengthOverrun);
    }
    let sender_ssrc = u32::from_be_bytes([body[0], body[1], body[2], body[3]]);
    let media_ssrc = u32::from_be_bytes([body[4], body[5], body[6], body[7]]);
    let fci = &body[8..];
    let mut nacks = Vec::new();
    if header.count == GENERIC_NACK {
        for chunk in fci.chunks_exact(4) {
            nacks.push(NackItem {
                packet_id: u16::from_be_bytes([chunk[0], chunk[1]]),
                bitmask: u16::from_be_bytes([chunk[2], chunk[3]]),
            });
        }
    }
    Ok(Rtpfb {
        fmt: header.count,
        sender_ssrc,
        media_ssrc,
        nacks,
        raw: fci.to_vec(),
    })
}

fn parse_psfb(buf: &[u8], header: &Header) -> Result<Psfb, RtcpError> {
    let body = &buf[4..header.total_len];
    if body.len() < 8 {
        return Err(RtcpError::LengthOverrun);
    }
    let sender_ssrc = u32::from_be_bytes([body[0], body[1], body[2], body[3]]);
    let media_ssrc = u32::from_be_bytes([body[4], body[5], body[6], body[7]]);
    Ok(Psfb {
        fmt: header.count,
        sender_ssrc,
        media_ssrc,
        raw: body[8..].to_vec(),
    })
}

fn parse_xr(buf: &[u8], header: &Header) -> Result<ExtendedReport, RtcpError> {
    let body = &buf[4..header.total_len];
    if body.len() < 4 {
        return Err(RtcpError::LengthOverrun);
    }
    let ssrc = u32::from_be_bytes([body[0], body[1], body[2], body[3]]);
    Ok(ExtendedReport {
        ssrc,
        raw: body[4..].to_vec(),
    })
}

/// Walk a compound RTCP buffer, returning every packet in order.
///
/// Per spec §4.D, an unrecognized packet type aborts the walk (the packets
/// parsed so far are still returned via the error's accompanying partial
/// state is not modeled — callers get either all packets or an error, since
/// a truncated compound buffer is itself a sign of a mis-parsed prior
/// packet and should not be treated as partially trustworthy).
pub fn walk(buf: &[u8]) -> Result<Vec<RtcpPacket>, RtcpError> {
    let mut packets = Vec::new();
    let mut offset = 0;
    while offset < buf.len() {
        let header = parse_header(&buf[offset..])?;
        let slice = &buf[offset..offset + header.total_len];
        let packet = match header.packet_type {
            packet_type::SENDER_REPORT => RtcpPacket::Sr(parse_sr(slice, &header)?),
            packet_type::RECEIVER_REPORT => RtcpPacket::Rr(parse_rr(slice, &header)?),
            packet_type::SDES => RtcpPacket::Sdes(parse_sdes(slice, &header)?),
            packet_type::BYE => RtcpPacket::Bye(parse_bye(slice, &header)?),
            packet_type::RTPFB => RtcpPacket::Rtpfb(parse_rtpfb(slice, &header)?),
            packet_type::PSFB => RtcpPacket::Psfb(parse_psfb(slice, &header)?),
            packet_type::XR => RtcpPacket::Xr(parse_xr(slice, &header)?),
            other => return Err(RtcpError::UnknownPacketType(other)),
        };
        let _ = header.padding; // padding only affects total_len, already consumed above
        packets.push(packet);
        offset += header.total_len;
    }
    Ok(packets)
}

fn write_header(out: &mut Vec<u8>, count: u8, packet_type: u8, length_words: u16) {
    out.push(0x80 | (count & 0x1F)); // version 2, no padding
    out.push(packet_type);
    out.extend_from_slice(&length_words.to_be_bytes());
}

fn pad_len(body_plus_header: usize) -> usize {
    (4 - body_plus_header % 4) % 4
}

impl SenderReport {
    /// Serialize into a standalone RTCP packet.
    pub fn write_to(&self, out: &mut Vec<u8>) {
        let start = out.len();
        write_header(out, self.reports.len() as u8, packet_type::SENDER_REPORT, 0);
        out.extend_from_slice(&self.ssrc.to_be_bytes());
        out.extend_from_slice(&self.ntp_time.to_be_bytes());
        out.extend_from_slice(&self.rtp_time.to_be_bytes());
        out.extend_from_slice(&self.packet_count.to_be_bytes());
        out.extend_from_slice(&self.octet_count.to_be_bytes());
        for r in &self.reports {
            r.write_to(out);
        }
        finalize_length(out, start);
    }
}

impl ReceiverReport {
    /// Serialize into a standalone RTCP packet.
    pub fn write_to(&self, out: &mut Vec<u8>) {
        let start = out.len();
        write_header(out, self.reports.len() as u8, packet_type::RECEIVER_REPORT, 0);
        out.extend_from_slice(&self.ssrc.to_be_bytes());
        for r in &self.reports {
            r.write_to(out);
        }
        finalize_length(out, start);
    }
}

impl Bye {
    /// Serialize into a standalone RTCP packet.
    pub fn write_to(&self, out: &mut Vec<u8>) {
        let start = out.len();
        write_header(out, self.sources.len() as u8, packet_type::BYE, 0);
        for s in &self.sources {
            out.extend_from_slice(&s.to_be_bytes());
        }
        if let Some(reason) = &self.reason {
            let bytes = reason.as_bytes();
            out.push(bytes.len() as u8);
            out.extend_from_slice(bytes);
        }
        let written = out.len() - start;
        let padding = pad_len(written);
        for _ in 0..padding {
            out.push(0);
        }
        if padding > 0 {
            set_padding_bit(out, start);
        }
        finalize_length(out, start);
    }
}

impl Sdes {
    /// Serialize into a standalone RTCP packet. CNAME is the only item type emitted.
    pub fn write_to(&self, out: &mut Vec<u8>) {
        let start = out.len();
        write_header(out, self.chunks.len() as u8, packet_type::SDES, 0);
        for chunk in &self.chunks {
            let chunk_start = out.len();
            out.extend_from_slice(&chunk.source.to_be_bytes());
            if let Some(cname) = &chunk.cname {
                let bytes = cname.as_bytes();
                out.push(1); // CNAME item type
                out.push(bytes.len() as u8);
                out.extend_from_slice(bytes);
            }
            out.push(0); // item-type terminator
            let chunk_len = out.len() - chunk_start;
            for _ in 0..pad_len(chunk_len) {
                out.push(0);
            }
        }
        finalize_length(out, start);
    }
}

fn set_padding_bit(out: &mut [u8], packet_start: usize) {
    out[packet_start] |= 0x20;
}

/// Back-patch the 16-bit length field (in 32-bit words minus one) now that
/// the packet body has been fully written.
fn finalize_length(out: &mut [u8], packet_start: usize) {
    let total = out.len() - packet_start;
    debug_assert_eq!(total % 4, 0, "RTCP packets must be a multiple of 4 bytes");
    let length_words = (total / 4 - 1) as u16;
    out[packet_start + 2..packet_start + 4].copy_from_slice(&length_words.to_be_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_sender_report_with_one_reception_report() {
        let sr = SenderReport {
            ssrc: 0x1111_2222,
            ntp_time: 0x0102_0304_0506_0708,
            rtp_time: 90_000,
            packet_count: 42,
            octet_count: 12_345,
            reports: vec![ReceptionReport {
                ssrc: 0x3333_4444,
                fraction_lost: 5,
                packets_lost: 10,
                highest_sequence: 1000,
                jitter: 3,
                last_sr: 0xAABB_CCDD,
                delay_since_last_sr: 7,
            }],
        };
        let mut buf = Vec::new();
        sr.write_to(&mut buf);

        let packets = walk(&buf).expect("should parse");
        assert_eq!(packets.len(), 1);
        match &packets[0] {
            RtcpPacket::Sr(parsed) => assert_eq!(*parsed, sr),
            other => panic!("expected Sr, got {other:?}"),
        }
    }

    #[test]
    fn negative_packets_lost_round_trips() {
        let sr = SenderReport {
            ssrc: 1,
            ntp_time: 2,
            rtp_time: 3,
            packet_count: 4,
            octet_count: 5,
            reports: vec![ReceptionReport {
                ssrc: 6,
                fraction_lost: 0,
                packets_lost: -3,
                highest_sequence: 7,
                jitter: 8,
                last_sr: 9,
                delay_since_last_sr: 10,
            }],
        };
        let mut buf = Vec::new();
        sr.write_to(&mut buf);
        let packets = walk(&buf).unwrap();
        match &packets[0] {
            RtcpPacket::Sr(parsed) => assert_eq!(parsed.reports[0].packets_lost, -3),
            _ => panic!("expected Sr"),
        }
    }

    #[test]
    fn round_trips_bye_with_reason() {
        let bye = Bye {
            sources: vec![0xAAAA_BBBB, 0xCCCC_DDDD],
            reason: Some("goodbye".to_string()),
        };
        let mut buf = Vec::new();
        bye.write_to(&mut buf);
        let packets = walk(&buf).unwrap();
        match &packets[0] {
            RtcpPacket::Bye(parsed) => assert_eq!(*parsed, bye),
            other => panic!("expected Bye, got {other:?}"),
        }
    }

    #[test]
    fn round_trips_sdes_cname() {
        let sdes = Sdes {
            chunks: vec![SdesChunk {
                source: 0x1234_5678,
                cname: Some("relay@host".to_string()),
            }],
        };
        let mut buf = Vec::new();
        sdes.write_to(&mut buf);
        let packets = walk(&buf).unwrap();
        match &packets[0] {
            RtcpPacket::Sdes(parsed) => assert_eq!(*parsed, sdes),
            other => panic!("expected Sdes, got {other:?}"),
        }
    }

    #[test]
    fn compound_packet_walks_every_entry_in_order() {
        let rr = ReceiverReport {
            ssrc: 1,
            reports: vec![],
        };
        let bye = Bye {
            sources: vec![1],
            reason: None,
        };
        let mut buf = Vec::new();
        rr.write_to(&mut buf);
        bye.write_to(&mut buf);

        let packets = walk(&buf).unwrap();
        assert_eq!(packets.len(), 2);
        assert!(matches!(packets[0], RtcpPacket::Rr(_)));
        assert!(matches!(packets[1], RtcpPacket::Bye(_)));
    }

    #[test]
    fn unknown_packet_type_aborts_the_walk() {
        let mut buf = vec![0x80, 250, 0x00, 0x00]; // type 250: not in our table
        buf.extend_from_slice(&[0u8; 0]);
        assert_eq!(
            walk(&buf).unwrap_err(),
            RtcpError::UnknownPacketType(250)
        );
    }

    #[test]
    fn parses_generic_nack_items() {
        let rtpfb = Rtpfb {
            fmt: 1,
            sender_ssrc: 10,
            media_ssrc: 20,
            nacks: vec![NackItem {
                packet_id: 100,
                bitmask: 0b1010,
            }],
            raw: vec![],
        };
        let mut buf = Vec::new();
        write_header(&mut buf, rtpfb.fmt, packet_type::RTPFB, 0);
        buf.extend_from_slice(&rtpfb.sender_ssrc.to_be_bytes());
        buf.extend_from_slice(&rtpfb.media_ssrc.to_be_bytes());
        buf.extend_from_slice(&100u16.to_be_bytes());
        buf.extend_from_slice(&0b1010u16.to_be_bytes());
        finalize_length(&mut buf, 0);

        let packets = walk(&buf).unwrap();
        match &packets[0] {
            RtcpPacket::Rtpfb(parsed) => {
                assert_eq!(parsed.sender_ssrc, 10);
                assert_eq!(parsed.media_ssrc, 20);
                assert_eq!(parsed.nacks, vec![NackItem { packet_id: 100, bitmask: 0b1010 }]);
            }
            other => panic!("expected Rtpfb, got {other:?}"),
        }
    }

    #[test]
    fn length_field_matches_byte_len_over_four_minus_one() {
        let rr = ReceiverReport {
            ssrc: 1,
            reports: vec![ReceptionReport {
                ssrc: 2,
                fraction_lost: 0,
                packets_lost: 0,
                highest_sequence: 0,
                jitter: 0,
                last_sr: 0,
                delay_since_last_sr: 0,
            }],
        };
        let mut buf = Vec::new();
        rr.write_to(&mut buf);
        let length_words = u16::from_be_bytes([buf[2], buf[3]]) as usize;
        assert_eq!(length_words, buf.len() / 4 - 1);
    }
}
