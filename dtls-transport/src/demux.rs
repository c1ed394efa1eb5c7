//! Packet classification for the shared ICE component
//!
//! DTLS, SRTP and SRTCP all arrive on the same 5-tuple, so the first byte
//! decides where a datagram goes (RFC 7983):
//!
//! ```text
//!   [0..3]     STUN (consumed by the ICE connection)
//!   [20..63]   DTLS
//!   [128..191] RTP / RTCP
//! ```
// Copyright 2025 Francisco F. Pinochet
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

/// Outcome of [`classify`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    /// DTLS record, handed to the DTLS session
    Dtls,
    /// Anything else (SRTP/SRTCP once keyed)
    Other,
}

/// First byte range of a DTLS record
const DTLS_FIRST_BYTE: std::ops::RangeInclusive<u8> = 20..=63;

/// RTCP packet types occupy 192..=223 in the second byte (RFC 5761 Section 4)
const RTCP_SECOND_BYTE: std::ops::RangeInclusive<u8> = 192..=223;

/// Classify a raw datagram.
pub fn classify(buf: &[u8]) -> PacketKind {
    match buf.first() {
        Some(b) if DTLS_FIRST_BYTE.contains(b) => PacketKind::Dtls,
        _ => PacketKind::Other,
    }
}

/// Shorthand for `classify(buf) == PacketKind::Dtls`
pub fn is_dtls(buf: &[u8]) -> bool {
    classify(buf) == PacketKind::Dtls
}

/// Whether an RTP-range record is RTCP, judged by its payload type byte.
pub fn is_rtcp(buf: &[u8]) -> bool {
    buf.len() >= 2 && RTCP_SECOND_BYTE.contains(&buf[1])
}
