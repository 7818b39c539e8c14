// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! STUN message codec (RFC 5389, spec §4.E).
//!
//! Generalizes the teacher's client-only Binding-request/response pair into
//! a full message codec: any class/method, a generic attribute list, and the
//! two security attributes an ICE-lite agent actually needs to produce and
//! verify — MESSAGE-INTEGRITY and FINGERPRINT — which the teacher's STUN
//! client never needed since it only ever spoke to a public, unauthenticated
//! STUN server.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use hmac::{Hmac, Mac};
use sha1::Sha1;

use crate::config::{STUN_FINGERPRINT_XOR, STUN_MAGIC_COOKIE};
use crate::crc32::crc32;

type HmacSha1 = Hmac<Sha1>;

/// STUN parse/verify failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StunError {
    /// Buffer shorter than the 20-byte header.
    TooShort,
    /// Top two bits of the message-type field were not zero.
    NotStun,
    /// Magic cookie did not match `0x2112A442`.
    BadMagicCookie,
    /// The header's message-length field runs past the buffer.
    LengthOverrun,
    /// An attribute's declared length runs past the buffer.
    AttributeOverrun,
    /// MESSAGE-INTEGRITY did not match the computed HMAC-SHA1.
    IntegrityMismatch,
    /// FINGERPRINT did not match the computed CRC-32.
    FingerprintMismatch,
    /// A required attribute was absent.
    MissingAttribute(u16),
}

impl fmt::Display for StunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooShort => write!(f, "STUN message shorter than the 20-byte header"),
            Self::NotStun => write!(f, "top two bits of the message-type field were not zero"),
            Self::BadMagicCookie => write!(f, "STUN magic cookie mismatch"),
            Self::LengthOverrun => write!(f, "STUN message-length field runs past the buffer"),
            Self::AttributeOverrun => write!(f, "STUN attribute length runs past the buffer"),
            Self::IntegrityMismatch => write!(f, "STUN MESSAGE-INTEGRITY mismatch"),
            Self::FingerprintMismatch => write!(f, "STUN FINGERPRINT mismatch"),
            Self::MissingAttribute(t) => write!(f, "missing required STUN attribute 0x{t:04x}"),
        }
    }
}

impl std::error::Error for StunError {}

/// STUN attribute type values used by this codec (RFC 5389 §15, RFC 5245 §21.1).
pub mod attr {
    pub const MAPPED_ADDRESS: u16 = 0x0001;
    pub const USERNAME: u16 = 0x0006;
    pub const MESSAGE_INTEGRITY: u16 = 0x0008;
    pub const ERROR_CODE: u16 = 0x0009;
    pub const XOR_MAPPED_ADDRESS: u16 = 0x0020;
    pub const PRIORITY: u16 = 0x0024;
    pub const USE_CANDIDATE: u16 = 0x0025;
    pub const FINGERPRINT: u16 = 0x8028;
    pub const ICE_CONTROLLED: u16 = 0x8029;
    pub const ICE_CONTROLLING: u16 = 0x802A;
}

/// Message class (the two bits spread across the message-type field).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Class {
    /// Request (C1=0, C0=0).
    Request,
    /// Indication (C1=0, C0=1).
    Indication,
    /// Success response (C1=1, C0=0).
    SuccessResponse,
    /// Error response (C1=1, C0=1).
    ErrorResponse,
}

impl Class {
    fn bits(self) -> u16 {
        match self {
            Self::Request => 0b00,
            Self::Indication => 0b01,
            Self::SuccessResponse => 0b10,
            Self::ErrorResponse => 0b11,
        }
    }

    fn from_bits(bits: u16) -> Self {
        match bits {
            0b00 => Self::Request,
            0b01 => Self::Indication,
            0b10 => Self::SuccessResponse,
            _ => Self::ErrorResponse,
        }
    }
}

/// STUN method (Binding is the only method this system ever sends or parses).
pub const METHOD_BINDING: u16 = 0x001;

fn message_type(class: Class, method: u16) -> u16 {
    // RFC 5389 §6: class bits C1,C0 are interleaved into the method field at
    // bit positions 8 and 4.
    let c1 = (class.bits() >> 1) & 1;
    let c0 = class.bits() & 1;
    let m = method & 0x0FFF;
    let m_low = m & 0x000F;
    let m_mid = (m >> 4) & 0x007F;
    let m_high = (m >> 11) & 0x0001;
    (m_high << 13) | (c1 << 8) | (m_mid << 5) | (c0 << 4) | m_low
}

fn decode_message_type(raw: u16) -> (Class, u16) {
    let c1 = (raw >> 8) & 1;
    let c0 = (raw >> 4) & 1;
    let m_low = raw & 0x000F;
    let m_mid = (raw >> 5) & 0x007F;
    let m_high = (raw >> 13) & 0x0001;
    let method = (m_high << 11) | (m_mid << 4) | m_low;
    (Class::from_bits((c1 << 1) | c0), method)
}

/// A single raw TLV attribute (type, value bytes before padding).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawAttribute {
    /// Attribute type.
    pub attr_type: u16,
    /// Attribute value (unpadded).
    pub value: Vec<u8>,
}

/// A parsed or to-be-serialized STUN message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Message class.
    pub class: Class,
    /// Message method (always [`METHOD_BINDING`] in this system).
    pub method: u16,
    /// 96-bit transaction id.
    pub transaction_id: [u8; 12],
    /// Attributes in wire order, excluding MESSAGE-INTEGRITY/FINGERPRINT
    /// (those are appended by [`Message::encode_signed`]).
    pub attributes: Vec<RawAttribute>,
}

impl Message {
    /// Build a new message with an empty attribute list.
    #[must_use]
    pub fn new(class: Class, method: u16, transaction_id: [u8; 12]) -> Self {
        Self {
            class,
            method,
            transaction_id,
            attributes: Vec::new(),
        }
    }

    fn find(&self, attr_type: u16) -> Option<&RawAttribute> {
        self.attributes.iter().find(|a| a.attr_type == attr_type)
    }

    /// Parse a message header and attribute list. Does not verify
    /// MESSAGE-INTEGRITY or FINGERPRINT — use [`Message::verify_integrity`]
    /// and [`Message::verify_fingerprint`] once the message is fully parsed.
    pub fn decode(buf: &[u8]) -> Result<Self, StunError> {
        if buf.len() < 20 {
            return Err(StunError::TooShort);
        }
        let raw_type = u16::from_be_bytes([buf[0], buf[1]]);
        if raw_type & 0xC000 != 0 {
            return Err(StunError::NotStun);
        }
        let message_len = u16::from_be_bytes([buf[2], buf[3]]) as usize;
        let cookie = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);
        if cookie != STUN_MAGIC_COOKIE {
            return Err(StunError::BadMagicCookie);
        }
        if buf.len() < 20 + message_len {
            return Err(StunError::LengthOverrun);
        }
        let mut transaction_id = [0u8; 12];
        transaction_id.copy_from_slice(&buf[8..20]);

        let (class, method) = decode_message_type(raw_type);
        let mut attributes = Vec::new();
        let body = &buf[20..20 + message_len];
        let mut off = 0;
        while off + 4 <= body.len() {
            let attr_type = u16::from_be_bytes([body[off], body[off + 1]]);
            let attr_len = u16::from_be_bytes([body[off + 2], body[off + 3]]) as usize;
            let start = off + 4;
            if start + attr_len > body.len() {
                return Err(StunError::AttributeOverrun);
            }
            attributes.push(RawAttribute {
                attr_type,
                value: body[start..start + attr_len].to_vec(),
            });
            let padded = (attr_len + 3) & !3;
            off = start + padded;
        }

        Ok(Self {
            class,
            method,
            transaction_id,
            attributes,
        })
    }

    /// Encode header + attributes with no MESSAGE-INTEGRITY/FINGERPRINT.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(20);
        out.extend_from_slice(&message_type(self.class, self.method).to_be_bytes());
        out.extend_from_slice(&0u16.to_be_bytes()); // patched below
        out.extend_from_slice(&STUN_MAGIC_COOKIE.to_be_bytes());
        out.extend_from_slice(&self.transaction_id);
        for attr in &self.attributes {
            write_attr(&mut out, attr.attr_type, &attr.value);
        }
        let len = (out.len() - 20) as u16;
        out[2..4].copy_from_slice(&len.to_be_bytes());
        out
    }

    /// Encode with MESSAGE-INTEGRITY (if `key` is given) and FINGERPRINT
    /// appended, following the two-pass length-field update from spec §4.E:
    /// the header's length is written once excluding FINGERPRINT (so the
    /// HMAC covers exactly that), then again including it.
    #[must_use]
    pub fn encode_signed(&self, key: Option<&[u8]>) -> Vec<u8> {
        let mut out = Vec::with_capacity(32);
        out.extend_from_slice(&message_type(self.class, self.method).to_be_bytes());
        out.extend_from_slice(&0u16.to_be_bytes());
        out.extend_from_slice(&STUN_MAGIC_COOKIE.to_be_bytes());
        out.extend_from_slice(&self.transaction_id);
        for attr in &self.attributes {
            write_attr(&mut out, attr.attr_type, &attr.value);
        }

        if let Some(key) = key {
            // Message length up to and including the about-to-be-appended
            // MESSAGE-INTEGRITY attribute (24 bytes: 4 header + 20 value).
            let len_with_integrity = (out.len() - 20 + 24) as u16;
            out[2..4].copy_from_slice(&len_with_integrity.to_be_bytes());
            let mut mac = HmacSha1::new_from_slice(key).expect("HMAC accepts any key length");
            mac.update(&out);
            let tag = mac.finalize().into_bytes();
            write_attr(&mut out, attr::MESSAGE_INTEGRITY, &tag);
        }

        // Message length including the about-to-be-appended FINGERPRINT
        // attribute (4 header + 4 value), per the §9 resolution.
        let len_with_fingerprint = (out.len() - 20 + 8) as u16;
        out[2..4].copy_from_slice(&len_with_fingerprint.to_be_bytes());
        let crc = crc32(&out) ^ STUN_FINGERPRINT_XOR;
        write_attr(&mut out, attr::FINGERPRINT, &crc.to_be_bytes());

        out
    }

    /// Verify MESSAGE-INTEGRITY against the original buffer `raw` this
    /// message was parsed from (recomputing the HMAC requires the bytes up
    /// to, but not including, the MESSAGE-INTEGRITY attribute itself).
    pub fn verify_integrity(&self, raw: &[u8], key: &[u8]) -> Result<(), StunError> {
        let attr = self
            .find(attr::MESSAGE_INTEGRITY)
            .ok_or(StunError::MissingAttribute(attr::MESSAGE_INTEGRITY))?;
        let mi_offset = find_attr_offset(raw, attr::MESSAGE_INTEGRITY)
            .ok_or(StunError::MissingAttribute(attr::MESSAGE_INTEGRITY))?;

        // Recompute over a copy with the length field set as if
        // MESSAGE-INTEGRITY were the last attribute (matches the encoder).
        let mut signed_prefix = raw[..mi_offset].to_vec();
        let len_with_integrity = (mi_offset - 20 + 24) as u16;
        signed_prefix[2..4].copy_from_slice(&len_with_integrity.to_be_bytes());

        let mut mac = HmacSha1::new_from_slice(key).expect("HMAC accepts any key length");
        mac.update(&signed_prefix);
        mac.verify_slice(&attr.value)
            .map_err(|_| StunError::IntegrityMismatch)
    }

    /// Verify FINGERPRINT against the original buffer `raw`.
    pub fn verify_fingerprint(&self, raw: &[u8]) -> Result<(), StunError> {
        let attr = self
            .find(attr::FINGERPRINT)
            .ok_or(StunError::MissingAttribute(attr::FINGERPRINT))?;
        let fp_offset = find_attr_offset(raw, attr::FINGERPRINT)
            .ok_or(StunError::MissingAttribute(attr::FINGERPRINT))?;
        let expected = crc32(&raw[..fp_offset]) ^ STUN_FINGERPRINT_XOR;
        let actual = u32::from_be_bytes(attr.value[..4].try_into().unwrap());
        if expected == actual {
            Ok(())
        } else {
            Err(StunError::FingerprintMismatch)
        }
    }

    /// Append a raw attribute (used for USERNAME, PRIORITY, ICE-CONTROLLED/
    /// CONTROLLING, USE-CANDIDATE, ERROR-CODE — anything not security-critical).
    pub fn push_attr(&mut self, attr_type: u16, value: Vec<u8>) {
        self.attributes.push(RawAttribute { attr_type, value });
    }

    /// Decode an XOR-MAPPED-ADDRESS attribute, if present.
    pub fn xor_mapped_address(&self) -> Option<SocketAddrStun> {
        let attr = self.find(attr::XOR_MAPPED_ADDRESS)?;
        decode_xor_address(&attr.value, &self.transaction_id)
    }

    /// Append an XOR-MAPPED-ADDRESS attribute.
    pub fn push_xor_mapped_address(&mut self, addr: SocketAddrStun) {
        let value = encode_xor_address(addr, &self.transaction_id);
        self.push_attr(attr::XOR_MAPPED_ADDRESS, value);
    }

    /// USERNAME attribute as UTF-8, if present and valid.
    pub fn username(&self) -> Option<String> {
        self.find(attr::USERNAME)
            .map(|a| String::from_utf8_lossy(&a.value).into_owned())
    }

    /// PRIORITY attribute value, if present.
    pub fn priority(&self) -> Option<u32> {
        self.find(attr::PRIORITY)
            .map(|a| u32::from_be_bytes(a.value[..4].try_into().unwrap()))
    }

    /// True if USE-CANDIDATE is present.
    #[must_use]
    pub fn has_use_candidate(&self) -> bool {
        self.find(attr::USE_CANDIDATE).is_some()
    }

    /// True if ICE-CONTROLLING is present.
    #[must_use]
    pub fn has_ice_controlling(&self) -> bool {
        self.find(attr::ICE_CONTROLLING).is_some()
    }

    /// True if ICE-CONTROLLED is present.
    #[must_use]
    pub fn has_ice_controlled(&self) -> bool {
        self.find(attr::ICE_CONTROLLED).is_some()
    }
}

/// Minimal address representation for XOR-MAPPED-ADDRESS, independent of
/// `std::net::SocketAddr` so callers don't need to construct a full
/// `SocketAddr` just to sign a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SocketAddrStun {
    /// IP address, v4 or v6.
    pub ip: IpAddr,
    /// Port number.
    pub port: u16,
}

fn encode_xor_address(addr: SocketAddrStun, transaction_id: &[u8; 12]) -> Vec<u8> {
    let port_xor = addr.port ^ ((STUN_MAGIC_COOKIE >> 16) as u16);
    let mut out = Vec::with_capacity(20);
    match addr.ip {
        IpAddr::V4(v4) => {
            out.push(0);
            out.push(0x01);
            out.extend_from_slice(&port_xor.to_be_bytes());
            let addr_xor = u32::from_be_bytes(v4.octets()) ^ STUN_MAGIC_COOKIE;
            out.extend_from_slice(&addr_xor.to_be_bytes());
        }
        IpAddr::V6(v6) => {
            out.push(0);
            out.push(0x02);
            out.extend_from_slice(&port_xor.to_be_bytes());
            let mut key = [0u8; 16];
            key[..4].copy_from_slice(&STUN_MAGIC_COOKIE.to_be_bytes());
            key[4..].copy_from_slice(transaction_id);
            let octets = v6.octets();
            let mut xored = [0u8; 16];
            for i in 0..16 {
                xored[i] = octets[i] ^ key[i];
            }
            out.extend_from_slice(&xored);
        }
    }
    out
}

fn decode_xor_address(data: &[u8], transaction_id: &[u8; 12]) -> Option<SocketAddrStun> {
    if data.len() < 8 {
        return None;
    }
    let family = data[1];
    let port = u16::from_be_bytes([data[2], data[3]]) ^ ((STUN_MAGIC_COOKIE >> 16) as u16);
    match family {
        0x01 => {
            let x_addr = u32::from_be_bytes(data[4..8].try_into().ok()?);
            let addr = x_addr ^ STUN_MAGIC_COOKIE;
            Some(SocketAddrStun {
                ip: IpAddr::V4(Ipv4Addr::from(addr)),
                port,
            })
        }
        0x02 => {
            if data.len() < 20 {
                return None;
            }
            let mut key = [0u8; 16];
            key[..4].copy_from_slice(&STUN_MAGIC_COOKIE.to_be_bytes());
            key[4..].copy_from_slice(transaction_id);
            let mut octets = [0u8; 16];
            for i in 0..16 {
                octets[i] = data[4 + i] ^ key[i];
            }
            Some(SocketAddrStun {
                ip: IpAddr::V6(Ipv6Addr::from(octets)),
                port,
            })
        }
        _ => None,
    }
}

fn write_attr(out: &mut Vec<u8>, attr_type: u16, value: &[u8]) {
    out.extend_from_slice(&attr_type.to_be_bytes());
    out.extend_from_slice(&(value.len() as u16).to_be_bytes());
    out.extend_from_slice(value);
    let pad = (4 - value.len() % 4) % 4;
    out.extend(std::iter::repeat(0u8).take(pad));
}

/// Find the byte offset (from the start of `raw`) of the TLV header for
/// `attr_type`, scanning exactly like [`Message::decode`].
fn find_attr_offset(raw: &[u8], attr_type: u16) -> Option<usize> {
    if raw.len() < 20 {
        return None;
    }
    let message_len = u16::from_be_bytes([raw[2], raw[3]]) as usize;
    let body = raw.get(20..20 + message_len)?;
    let mut off = 0;
    while off + 4 <= body.len() {
        let t = u16::from_be_bytes([body[off], body[off + 1]]);
        let len = u16::from_be_bytes([body[off + 2], body[off + 3]]) as usize;
        if t == attr_type {
            return Some(20 + off);
        }
        let padded = (len + 3) & !3;
        off += 4 + padded;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_header_and_attributes() {
        let mut msg = Message::new(Class::Request, METHOD_BINDING, [7u8; 12]);
        msg.push_attr(attr::PRIORITY, 12345u32.to_be_bytes().to_vec());
        let buf = msg.encode();
        let parsed = Message::decode(&buf).unwrap();
        assert_eq!(parsed.class, Class::Request);
        assert_eq!(parsed.method, METHOD_BINDING);
        assert_eq!(parsed.priority(), Some(12345));
    }

    #[test]
    fn rejects_bad_magic_cookie() {
        let mut buf = vec![0u8; 20];
        buf[0] = 0x00;
        buf[1] = 0x01;
        assert_eq!(Message::decode(&buf).unwrap_err(), StunError::BadMagicCookie);
    }

    #[test]
    fn xor_mapped_address_round_trips_ipv4() {
        let mut msg = Message::new(Class::SuccessResponse, METHOD_BINDING, [1u8; 12]);
        let addr = SocketAddrStun {
            ip: IpAddr::V4(Ipv4Addr::new(203, 0, 113, 5)),
            port: 54321,
        };
        msg.push_xor_mapped_address(addr);
        let buf = msg.encode();
        let parsed = Message::decode(&buf).unwrap();
        assert_eq!(parsed.xor_mapped_address(), Some(addr));
    }

    #[test]
    fn message_integrity_round_trips_and_rejects_tamper() {
        let mut msg = Message::new(Class::Request, METHOD_BINDING, [2u8; 12]);
        msg.push_attr(attr::USERNAME, b"ufrag:ufrag2".to_vec());
        let key = b"password";
        let buf = msg.encode_signed(Some(key));

        let parsed = Message::decode(&buf).unwrap();
        parsed.verify_integrity(&buf, key).expect("should verify");

        let mut tampered = buf.clone();
        tampered[21] ^= 0xFF;
        let parsed_tampered = Message::decode(&tampered).unwrap();
        assert_eq!(
            parsed_tampered.verify_integrity(&tampered, key).unwrap_err(),
            StunError::IntegrityMismatch
        );
    }

    #[test]
    fn fingerprint_round_trips_and_rejects_tamper() {
        let msg = Message::new(Class::Request, METHOD_BINDING, [3u8; 12]);
        let buf = msg.encode_signed(None);
        let parsed = Message::decode(&buf).unwrap();
        parsed.verify_fingerprint(&buf).expect("should verify");

        let mut tampered = buf.clone();
        let last = tampered.len() - 1;
        tampered[last] ^= 0x01;
        let parsed_tampered = Message::decode(&tampered).unwrap();
        assert_eq!(
            parsed_tampered.verify_fingerprint(&tampered).unwrap_err(),
            StunError::FingerprintMismatch
        );
    }

    #[test]
    fn integrity_then_fingerprint_both_verify() {
        let mut msg = Message::new(Class::Request, METHOD_BINDING, [4u8; 12]);
        msg.push_attr(attr::USE_CANDIDATE, vec![]);
        let key = b"shortpwd";
        let buf = msg.encode_signed(Some(key));
        let parsed = Message::decode(&buf).unwrap();
        assert!(parsed.has_use_candidate());
        parsed.verify_integrity(&buf, key).unwrap();
        parsed.verify_fingerprint(&buf).unwrap();
    }

    #[test]
    fn message_type_bits_round_trip_for_every_class() {
        for class in [
            Class::Request,
            Class::Indication,
            Class::SuccessResponse,
            Class::ErrorResponse,
        ] {
            let raw = message_type(class, METHOD_BINDING);
            let (decoded_class, decoded_method) = decode_message_type(raw);
            assert_eq!(decoded_class, class);
            assert_eq!(decoded_method, METHOD_BINDING);
        }
    }
}
