//! Protocol predicate adapters.
//!
//! Each adapter turns a raw wire-level message into a `key=value ...` line
//! the driver loads into a [`crate::state::State`] before calling
//! `evaluate_one_step`. Every adapter shares the same contract: a
//! `reset_session`, a `build_request_pred_line` (client → server), and a
//! `build_response_pred_line` (server → client).
//!
//! Direction is always supplied by the caller, never inferred from the
//! packet bytes. An earlier design in the reference implementation guessed
//! direction from header bits and produced permanent false violations
//! (a server-only enum value written in response to mutated client bytes
//! would stick forever under an `H(...)` operator); the request builder
//! therefore always forces the response-enum field to its `NotSet`
//! sentinel and vice versa.

pub mod dns;
pub mod dtls;
pub mod ftp;
pub mod rtsp;
pub mod sip;
pub mod ssh;

use std::fmt::Write as _;

/// Which side of the connection a packet travelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// client → server
    C2S,
    /// server → client
    S2C,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::C2S => "C2S",
            Direction::S2C => "S2C",
        }
    }
}

/// Appends at most this many bytes of packet trace as hex, mirroring the
/// reference adapters' `append_packet_trace` truncation.
const TRACE_MAX_BYTES: usize = 256;

/// Incremental `key=value key=value ...` line builder shared by every
/// adapter, with the trailing ` msg_id=N dir=C2S|S2C trace=HEX` debug
/// suffix factored out so each protocol module only has to describe its
/// own predicate vocabulary.
#[derive(Debug, Default)]
pub struct PredicateLine {
    buf: String,
}

impl PredicateLine {
    pub fn new() -> Self {
        PredicateLine { buf: String::new() }
    }

    /// Appends `key=value`, space-separated from whatever came before.
    pub fn field(&mut self, key: &str, value: impl std::fmt::Display) -> &mut Self {
        if !self.buf.is_empty() {
            self.buf.push(' ');
        }
        let _ = write!(self.buf, "{key}={value}");
        self
    }

    /// Appends the `msg_id=N dir=... trace=HEX` debug suffix and returns the
    /// finished line. The driver strips these reserved keys before handing
    /// the line to the evaluator; the violation logger re-reads them from
    /// the raw session buffer for its recent-packet window.
    pub fn finish_with_trace(mut self, msg_id: u64, dir: Direction, bytes: &[u8]) -> String {
        let _ = write!(self.buf, " msg_id={msg_id} dir={}", dir.as_str());
        self.buf.push_str(" trace=");
        for byte in bytes.iter().take(TRACE_MAX_BYTES) {
            let _ = write!(self.buf, "{byte:02x}");
        }
        self.buf
    }

    pub fn finish(self) -> String {
        self.buf
    }
}

/// Reads a big-endian u16 at `bytes[offset..offset+2]`, or `None` if out of
/// range. Shared by every binary-framed adapter (DTLS, DNS, SSH).
pub(crate) fn read_u16_be(bytes: &[u8], offset: usize) -> Option<u16> {
    let slice = bytes.get(offset..offset + 2)?;
    Some(u16::from_be_bytes([slice[0], slice[1]]))
}

pub(crate) fn read_u24_be(bytes: &[u8], offset: usize) -> Option<u32> {
    let slice = bytes.get(offset..offset + 3)?;
    Some(u32::from_be_bytes([0, slice[0], slice[1], slice[2]]))
}

pub(crate) fn read_u32_be(bytes: &[u8], offset: usize) -> Option<u32> {
    let slice = bytes.get(offset..offset + 4)?;
    Some(u32::from_be_bytes([slice[0], slice[1], slice[2], slice[3]]))
}
