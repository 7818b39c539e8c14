// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error taxonomy for the relay.
//!
//! Each component gets its own hand-rolled enum with a `Display` and
//! `std::error::Error` impl. [`Error`] wraps them for the control-API boundary
//! and maps to [`SetDescriptionResult`], the caller-facing outcome code.

use std::fmt;

use crate::dtls::DtlsError;
use crate::fec::FecError;
use crate::ice::IceError;
use crate::rtcp::RtcpError;
use crate::rtp::RtpError;
use crate::stun::StunError;

/// I/O failure severity for transport-owning workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoFatal {
    /// The socket was closed (by us or the peer) and the owning worker must stop.
    SocketClosed,
    /// A recv/send call failed in a way that is not recoverable (not `WouldBlock`).
    Fatal,
}

impl fmt::Display for IoFatal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SocketClosed => write!(f, "socket closed"),
            Self::Fatal => write!(f, "fatal I/O error"),
        }
    }
}

impl std::error::Error for IoFatal {}

/// Top-level error wrapping every component's error type.
#[derive(Debug)]
pub enum Error {
    /// RTP parse failure.
    Rtp(RtpError),
    /// RTCP parse failure.
    Rtcp(RtcpError),
    /// STUN parse/verify failure.
    Stun(StunError),
    /// ICE connectivity-check failure.
    Ice(IceError),
    /// DTLS handshake or fingerprint failure.
    Dtls(DtlsError),
    /// FEC reconstruction failure.
    Fec(FecError),
    /// Fatal transport I/O.
    Io(IoFatal),
    /// Malformed or incomplete SDP.
    Sdp(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rtp(e) => write!(f, "RTP error: {e}"),
            Self::Rtcp(e) => write!(f, "RTCP error: {e}"),
            Self::Stun(e) => write!(f, "STUN error: {e}"),
            Self::Ice(e) => write!(f, "ICE error: {e}"),
            Self::Dtls(e) => write!(f, "DTLS error: {e}"),
            Self::Fec(e) => write!(f, "FEC error: {e}"),
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::Sdp(msg) => write!(f, "SDP error: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<DtlsError> for Error {
    fn from(e: DtlsError) -> Self {
        Self::Dtls(e)
    }
}

impl From<IceError> for Error {
    fn from(e: IceError) -> Self {
        Self::Ice(e)
    }
}

impl From<StunError> for Error {
    fn from(e: StunError) -> Self {
        Self::Stun(e)
    }
}

/// Outcome of `AcceptAnswer`, surfaced to the control API caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetDescriptionResult {
    /// The answer was accepted.
    Ok,
    /// No audio media section and the offer required one (unused — this system is video-only).
    AudioIncompatible,
    /// The video media section is incompatible (wrong codec/payload type).
    VideoIncompatible,
    /// The answer carried no media sections at all.
    NoRemoteMedia,
    /// None of the offered media types matched.
    NoMatchingMediaType,
    /// Unclassified parse/processing failure.
    Error,
    /// The answer's media section had no `a=fingerprint` attribute.
    DtlsFingerprintMissing,
    /// The answer's fingerprint used an unsupported digest algorithm.
    DtlsFingerprintDigestNotSupported,
    /// The answer requested a data channel transport; unsupported.
    DataChannelTransportNotSupported,
    /// A second offer arrived while one was already outstanding.
    WrongSdpTypeOfferAfterOffer,
}

impl SetDescriptionResult {
    /// True if this outcome means the answer was applied successfully.
    #[must_use]
    pub fn is_ok(self) -> bool {
        matches!(self, Self::Ok)
    }
}
