//! DTLS session interface consumed by the transport
//!
//! The handshake itself (record layer, cipher negotiation, certificates)
//! belongs to the DTLS collaborator. The transport hands each session a
//! [`DtlsReceiver`] bound to the session's component whenever it drives
//! the session, so sessions never hold a pointer back to the transport.
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

use crate::srtp::SrtpProfile;
use bytes::Bytes;
use sha2::{Digest, Sha256};

/// Keying material produced by a completed DTLS-SRTP handshake (RFC 5764 Section 4.2)
///
/// The session orients the keys for the local role: `client_key` protects
/// traffic this side sends, `server_key` unprotects what the peer sends.
#[derive(Clone, PartialEq, Eq)]
pub struct HandshakeKeys {
    /// Outbound master key and salt
    pub client_key: Vec<u8>,
    /// Inbound master key and salt
    pub server_key: Vec<u8>,
    /// Negotiated protection profile
    pub profile: SrtpProfile,
}

impl std::fmt::Debug for HandshakeKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandshakeKeys")
            .field("client_key", &format_args!("[{} bytes]", self.client_key.len()))
            .field("server_key", &format_args!("[{} bytes]", self.server_key.len()))
            .field("profile", &self.profile)
            .finish()
    }
}

/// Callbacks a DTLS session drives while it runs.
pub trait DtlsReceiver {
    /// Transmit a handshake flight on the session's component
    fn send_handshake_flight(&mut self, flight: Bytes);

    /// The handshake finished and exported SRTP keys
    fn handshake_completed(&mut self, keys: HandshakeKeys);
}

/// DTLS session collaborator, one per component
pub trait DtlsSession: Send {
    /// Begin (or restart) the handshake
    fn start(&mut self, receiver: &mut dyn DtlsReceiver);

    /// Feed one inbound DTLS record
    fn read(&mut self, record: &[u8], receiver: &mut dyn DtlsReceiver);

    /// Whether `start` has been called
    fn is_started(&self) -> bool;

    /// Local certificate fingerprint, e.g. `sha-256 AB:CD:...`
    fn fingerprint(&self) -> String;
}

/// Format a DER certificate's SHA-256 fingerprint the way SDP carries it (RFC 8122)
pub fn certificate_fingerprint(der: &[u8]) -> String {
    let digest = Sha256::digest(der);
    let hex = hex::encode_upper(digest);

    let mut out = String::with_capacity(8 + hex.len() + hex.len() / 2);
    out.push_str("sha-256 ");
    for (i, pair) in hex.as_bytes().chunks(2).enumerate() {
        if i > 0 {
            out.push(':');
        }
        // Output of hex::encode_upper is ASCII
        out.push(pair[0] as char);
        out.push(pair[1] as char);
    }
    out
}
