// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Minimal SDP offer/answer model (spec §10.1).
//!
//! Not a general SDP library: builds and parses exactly the fields the
//! minimal video answer profile (spec §6) uses — one media section, ICE
//! credentials, a DTLS fingerprint, a setup role, and host candidate lines.
//! Parsing is explicit line-by-line offset tracking (the style the
//! WebRTC-adjacent reference material uses for this same narrow job), not a
//! general SDP grammar.

use std::fmt;
use std::net::SocketAddr;

use crate::config::{ICE_TYPE_PREF_HOST, VIDEO_CLOCK_RATE, VIDEO_PAYLOAD_TYPE};
use crate::ice::Candidate;

/// Failures parsing an incoming SDP text blob. Semantic acceptance (is the
/// media section compatible, is the fingerprint digest supported) is
/// [`crate::control`]'s job — this only reports syntax it could not read at
/// all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SdpError {
    /// No `m=` line was found anywhere in the text.
    NoMediaSections,
    /// An `m=` line did not have at least `<kind> <port> <proto> <fmt>`.
    MalformedMediaLine(String),
    /// An `a=candidate:` line did not parse as `<...> <address> <port> typ <type> ...`.
    MalformedCandidateLine(String),
    /// An `a=fingerprint:` line did not parse as `<algorithm> <hex>`.
    MalformedFingerprintLine(String),
}

impl fmt::Display for SdpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoMediaSections => write!(f, "SDP text has no m= line"),
            Self::MalformedMediaLine(line) => write!(f, "malformed m= line: {line}"),
            Self::MalformedCandidateLine(line) => write!(f, "malformed a=candidate line: {line}"),
            Self::MalformedFingerprintLine(line) => write!(f, "malformed a=fingerprint line: {line}"),
        }
    }
}

impl std::error::Error for SdpError {}

/// Media kind named on an `m=` line. Only `Video` is ever accepted by this
/// relay; the others are modeled so [`crate::control`] can reject them with
/// the right [`crate::error::SetDescriptionResult`] variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Audio,
    Video,
    Application,
    Other,
}

impl MediaKind {
    fn parse(token: &str) -> Self {
        match token {
            "audio" => Self::Audio,
            "video" => Self::Video,
            "application" => Self::Application,
            _ => Self::Other,
        }
    }
}

/// DTLS certificate fingerprint as carried on an `a=fingerprint:` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    pub algorithm: String,
    pub hex: String,
}

/// `a=setup:` role (RFC 8122).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupRole {
    Active,
    Passive,
    ActPass,
}

impl SetupRole {
    fn parse(token: &str) -> Option<Self> {
        match token {
            "active" => Some(Self::Active),
            "passive" => Some(Self::Passive),
            "actpass" => Some(Self::ActPass),
            _ => None,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Passive => "passive",
            Self::ActPass => "actpass",
        }
    }
}

/// One `m=` section plus the attributes this system reads from it.
#[derive(Debug, Clone, Default)]
pub struct MediaSection {
    pub kind: Option<MediaKind>,
    pub payload_types: Vec<u8>,
    pub ice_ufrag: Option<String>,
    pub ice_pwd: Option<String>,
    pub setup: Option<SetupRole>,
    pub fingerprint: Option<Fingerprint>,
    pub candidates: Vec<SocketAddr>,
}

/// A parsed SDP offer or answer: every media section found, in order.
#[derive(Debug, Clone, Default)]
pub struct SessionDescription {
    pub media: Vec<MediaSection>,
}

impl SessionDescription {
    /// The first video media section, if any.
    #[must_use]
    pub fn video(&self) -> Option<&MediaSection> {
        self.media.iter().find(|m| m.kind == Some(MediaKind::Video))
    }
}

fn parse_candidate_line(rest: &str) -> Result<SocketAddr, SdpError> {
    // "<foundation> <component> <transport> <priority> <address> <port> typ <type> ..."
    let fields: Vec<&str> = rest.split_whitespace().collect();
    if fields.len() < 6 {
        return Err(SdpError::MalformedCandidateLine(rest.to_string()));
    }
    let address = fields[4];
    let port: u16 = fields[5]
        .parse()
        .map_err(|_| SdpError::MalformedCandidateLine(rest.to_string()))?;
    let ip: std::net::IpAddr = address
        .parse()
        .map_err(|_| SdpError::MalformedCandidateLine(rest.to_string()))?;
    Ok(SocketAddr::new(ip, port))
}

fn parse_fingerprint_line(rest: &str) -> Result<Fingerprint, SdpError> {
    let mut parts = rest.split_whitespace();
    let algorithm = parts
        .next()
        .ok_or_else(|| SdpError::MalformedFingerprintLine(rest.to_string()))?;
    let hex = parts
        .next()
        .ok_or_else(|| SdpError::MalformedFingerprintLine(rest.to_string()))?;
    Ok(Fingerprint {
        algorithm: algorithm.to_string(),
        hex: hex.to_string(),
    })
}

/// Parse raw SDP text into every media section's fields this system reads.
/// Session-level attributes (ones appearing before the first `m=` line)
/// seed every media section that doesn't override them.
pub fn parse(text: &str) -> Result<SessionDescription, SdpError> {
    let mut session_ufrag = None;
    let mut session_pwd = None;
    let mut session_fingerprint = None;
    let mut session_setup = None;
    let mut media = Vec::new();

    for raw_line in text.lines() {
        let line = raw_line.trim_end_matches('\r');
        if let Some(rest) = line.strip_prefix("m=") {
            let fields: Vec<&str> = rest.split_whitespace().collect();
            if fields.len() < 4 {
                return Err(SdpError::MalformedMediaLine(line.to_string()));
            }
            let payload_types = fields[3..]
                .iter()
                .filter_map(|f| f.parse::<u8>().ok())
                .collect();
            media.push(MediaSection {
                kind: Some(MediaKind::parse(fields[0])),
                payload_types,
                ice_ufrag: session_ufrag.clone(),
                ice_pwd: session_pwd.clone(),
                setup: session_setup,
                fingerprint: session_fingerprint.clone(),
                candidates: Vec::new(),
            });
        } else if let Some(rest) = line.strip_prefix("a=ice-ufrag:") {
            match media.last_mut() {
                Some(section) => section.ice_ufrag = Some(rest.to_string()),
                None => session_ufrag = Some(rest.to_string()),
            }
        } else if let Some(rest) = line.strip_prefix("a=ice-pwd:") {
            match media.last_mut() {
                Some(section) => section.ice_pwd = Some(rest.to_string()),
                None => session_pwd = Some(rest.to_string()),
            }
        } else if let Some(rest) = line.strip_prefix("a=setup:") {
            let role = SetupRole::parse(rest.trim());
            match media.last_mut() {
                Some(section) => section.setup = role,
                None => session_setup = role,
            }
        } else if let Some(rest) = line.strip_prefix("a=fingerprint:") {
            let fp = parse_fingerprint_line(rest)?;
            match media.last_mut() {
                Some(section) => section.fingerprint = Some(fp),
                None => session_fingerprint = Some(fp),
            }
        } else if let Some(rest) = line.strip_prefix("a=candidate:") {
            let addr = parse_candidate_line(rest)?;
            if let Some(section) = media.last_mut() {
                section.candidates.push(addr);
            }
        }
    }

    if media.is_empty() {
        return Err(SdpError::NoMediaSections);
    }
    Ok(SessionDescription { media })
}

/// Build this relay's video offer (spec §4.N/§6): one `m=video` line for
/// H.264/90000 at [`VIDEO_PAYLOAD_TYPE`], `a=rtcp-mux`, `a=setup:passive`
/// (this relay is always the DTLS server), `a=ice-lite`, the given ICE
/// credentials and fingerprint, and one host candidate line.
#[must_use]
pub fn build_offer(
    session_id: u64,
    ice_ufrag: &str,
    ice_pwd: &str,
    fingerprint_hex: &str,
    candidate_addr: SocketAddr,
) -> String {
    let candidate = Candidate::host(candidate_addr, ICE_TYPE_PREF_HOST);
    let ip = candidate_addr.ip();
    let family = if ip.is_ipv4() { "IP4" } else { "IP6" };
    let mut sdp = String::new();
    sdp.push_str("v=0\r\n");
    sdp.push_str(&format!(
        "o=- {session_id} 0 IN {family} {ip}\r\n",
        session_id = session_id,
        family = family,
        ip = ip
    ));
    sdp.push_str("s=-\r\n");
    sdp.push_str("t=0 0\r\n");
    sdp.push_str("a=ice-lite\r\n");
    sdp.push_str(&format!(
        "m=video {port} UDP/TLS/RTP/SAVPF {payload_type}\r\n",
        port = candidate_addr.port(),
        payload_type = VIDEO_PAYLOAD_TYPE
    ));
    sdp.push_str(&format!("c=IN {family} {ip}\r\n", family = family, ip = ip));
    sdp.push_str("a=rtcp-mux\r\n");
    sdp.push_str(&format!("a=ice-ufrag:{ice_ufrag}\r\n"));
    sdp.push_str(&format!("a=ice-pwd:{ice_pwd}\r\n"));
    sdp.push_str(&format!("a=setup:{}\r\n", SetupRole::Passive.as_str()));
    sdp.push_str(&format!("a=fingerprint:sha-256 {fingerprint_hex}\r\n"));
    sdp.push_str(&format!(
        "a=rtpmap:{payload_type} H264/{clock_rate}\r\n",
        payload_type = VIDEO_PAYLOAD_TYPE,
        clock_rate = VIDEO_CLOCK_RATE
    ));
    sdp.push_str(&format!(
        "a=candidate:{foundation} 1 udp {priority} {ip} {port} typ host\r\n",
        foundation = candidate.foundation,
        priority = candidate.priority,
        ip = ip,
        port = candidate_addr.port()
    ));
    sdp
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), port)
    }

    #[test]
    fn build_offer_contains_every_required_line() {
        let text = build_offer(1, "ufrag", "pwd", "AA:BB:CC", addr(5000));
        assert!(text.contains("m=video 5000 UDP/TLS/RTP/SAVPF 96"));
        assert!(text.contains("a=rtcp-mux"));
        assert!(text.contains("a=setup:passive"));
        assert!(text.contains("a=ice-lite"));
        assert!(text.contains("a=ice-ufrag:ufrag"));
        assert!(text.contains("a=ice-pwd:pwd"));
        assert!(text.contains("a=fingerprint:sha-256 AA:BB:CC"));
        assert!(text.contains("typ host"));
    }

    #[test]
    fn parse_reads_back_an_offer_this_relay_just_built() {
        let text = build_offer(1, "ufrag", "pwd", "AA:BB:CC", addr(5000));
        let parsed = parse(&text).expect("own offer should parse");
        let video = parsed.video().expect("should have a video section");
        assert_eq!(video.ice_ufrag.as_deref(), Some("ufrag"));
        assert_eq!(video.ice_pwd.as_deref(), Some("pwd"));
        assert_eq!(video.setup, Some(SetupRole::Passive));
        assert_eq!(
            video.fingerprint,
            Some(Fingerprint {
                algorithm: "sha-256".to_string(),
                hex: "AA:BB:CC".to_string(),
            })
        );
        assert_eq!(video.candidates, vec![addr(5000)]);
        assert_eq!(video.payload_types, vec![96]);
    }

    #[test]
    fn parse_rejects_text_with_no_media_section() {
        let err = parse("v=0\r\no=- 1 0 IN IP4 0.0.0.0\r\n").unwrap_err();
        assert_eq!(err, SdpError::NoMediaSections);
    }

    #[test]
    fn parse_distinguishes_audio_from_video_sections() {
        let text = "v=0\r\nm=audio 4000 RTP/AVP 0\r\nm=video 5000 RTP/AVP 96\r\na=ice-ufrag:abcd\r\n";
        let parsed = parse(text).expect("should parse");
        assert_eq!(parsed.media.len(), 2);
        assert_eq!(parsed.media[0].kind, Some(MediaKind::Audio));
        let video = parsed.video().expect("should find video section");
        assert_eq!(video.ice_ufrag.as_deref(), Some("abcd"));
    }

    #[test]
    fn malformed_candidate_line_is_reported() {
        let text = "v=0\r\nm=video 5000 RTP/AVP 96\r\na=candidate:1 2 udp\r\n";
        let err = parse(text).unwrap_err();
        assert!(matches!(err, SdpError::MalformedCandidateLine(_)));
    }
}
