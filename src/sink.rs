// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! TCP raw sink (spec §4.M).
//!
//! Restreams decoded RTP payloads over a single plain TCP connection as a
//! length-prefixed byte stream, the same shape as the teacher's
//! `transport::tcp::FrameCodec` (`[length][payload]` framing over a stream
//! socket) but little-endian per this wire format, preceded by a fixed
//! 16-byte startup header instead of a per-connection handshake message.

use std::fmt;
use std::io::{self, Write};
use std::net::{TcpStream, ToSocketAddrs};

use crate::config::VideoGeometry;

/// Magic value identifying the startup header (spec §9 resolution #1: four
/// non-overlapping little-endian `u32` fields at offsets 0, 4, 8, 12).
pub const STARTUP_MAGIC: u32 = 0x0004_2069;

/// Sink failures. A write failure is always fatal (spec §4.M: "on write
/// failure: terminate the sink").
#[derive(Debug)]
pub enum SinkError {
    Connect(io::Error),
    Write(io::Error),
}

impl fmt::Display for SinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connect(err) => write!(f, "failed to connect TCP sink: {err}"),
            Self::Write(err) => write!(f, "TCP sink write failed: {err}"),
        }
    }
}

impl std::error::Error for SinkError {}

/// Build the 16-byte startup header for `geometry`.
#[must_use]
pub fn startup_header(geometry: VideoGeometry) -> [u8; 16] {
    let mut header = [0u8; 16];
    header[0..4].copy_from_slice(&STARTUP_MAGIC.to_le_bytes());
    header[4..8].copy_from_slice(&geometry.width.to_le_bytes());
    header[8..12].copy_from_slice(&geometry.height.to_le_bytes());
    header[12..16].copy_from_slice(&geometry.fps.to_le_bytes());
    header
}

/// A single outbound TCP connection carrying the length-prefixed RTP
/// payload stream. Terminal once a write fails — there is no reconnect
/// logic here (spec §4.M names no retry behavior).
pub struct TcpSink {
    stream: TcpStream,
    terminated: bool,
}

impl TcpSink {
    /// Connect to `addr`, send the startup header, and return a sink ready
    /// for [`TcpSink::send_payload`] calls.
    pub fn connect(addr: impl ToSocketAddrs, geometry: VideoGeometry) -> Result<Self, SinkError> {
        let mut stream = TcpStream::connect(addr).map_err(SinkError::Connect)?;
        stream
            .write_all(&startup_header(geometry))
            .map_err(SinkError::Write)?;
        Ok(Self {
            stream,
            terminated: false,
        })
    }

    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Write one length-prefixed RTP payload. Blocks the caller's thread
    /// for back-pressure (spec §4.M: "back-pressure: blocking writes").
    /// Once a write fails the sink is marked terminated and every
    /// subsequent call returns the same error without touching the socket.
    pub fn send_payload(&mut self, payload: &[u8]) -> Result<(), SinkError> {
        if self.terminated {
            return Err(SinkError::Write(io::Error::new(
                io::ErrorKind::NotConnected,
                "sink already terminated by a prior write failure",
            )));
        }
        let len = payload.len() as u32;
        let result = self
            .stream
            .write_all(&len.to_le_bytes())
            .and_then(|()| self.stream.write_all(payload));
        if let Err(err) = result {
            self.terminated = true;
            return Err(SinkError::Write(err));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::net::TcpListener;
    use std::thread;

    #[test]
    fn startup_header_layout_matches_the_resolved_wire_format() {
        let header = startup_header(VideoGeometry {
            width: 1280,
            height: 720,
            fps: 60,
        });
        assert_eq!(
            u32::from_le_bytes(header[0..4].try_into().unwrap()),
            STARTUP_MAGIC
        );
        assert_eq!(u32::from_le_bytes(header[4..8].try_into().unwrap()), 1280);
        assert_eq!(u32::from_le_bytes(header[8..12].try_into().unwrap()), 720);
        assert_eq!(u32::from_le_bytes(header[12..16].try_into().unwrap()), 60);
    }

    #[test]
    fn connect_sends_the_startup_header_then_payloads_are_length_prefixed() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind should succeed");
        let addr = listener.local_addr().expect("local_addr should succeed");

        let server = thread::spawn(move || {
            let (mut conn, _) = listener.accept().expect("accept should succeed");
            let mut header = [0u8; 16];
            conn.read_exact(&mut header).expect("header read should succeed");
            let mut len_buf = [0u8; 4];
            conn.read_exact(&mut len_buf).expect("len read should succeed");
            let len = u32::from_le_bytes(len_buf) as usize;
            let mut payload = vec![0u8; len];
            conn.read_exact(&mut payload).expect("payload read should succeed");
            (header, payload)
        });

        let mut sink = TcpSink::connect(addr, VideoGeometry::default()).expect("connect should succeed");
        sink.send_payload(b"nal-unit-bytes").expect("send should succeed");

        let (header, payload) = server.join().expect("server thread should not panic");
        assert_eq!(
            u32::from_le_bytes(header[0..4].try_into().unwrap()),
            STARTUP_MAGIC
        );
        assert_eq!(payload, b"nal-unit-bytes");
    }

    #[test]
    fn send_after_termination_fails_without_reconnecting() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind should succeed");
        let addr = listener.local_addr().expect("local_addr should succeed");
        let server = thread::spawn(move || {
            let (conn, _) = listener.accept().expect("accept should succeed");
            drop(conn);
        });
        let mut sink = TcpSink::connect(addr, VideoGeometry::default()).expect("connect should succeed");
        server.join().expect("server thread should not panic");

        // Keep writing until the dropped peer causes a failure (a broken
        // pipe may take a couple of writes to surface on some platforms).
        let mut last_result = Ok(());
        for _ in 0..20 {
            last_result = sink.send_payload(b"x");
            if last_result.is_err() {
                break;
            }
        }
        assert!(last_result.is_err());
        assert!(sink.is_terminated());
        assert!(sink.send_payload(b"y").is_err());
    }
}
