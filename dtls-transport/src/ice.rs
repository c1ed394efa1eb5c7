//! ICE connection interface consumed by the transport
//!
//! Connectivity checks, STUN/TURN and candidate gathering are done by the
//! ICE collaborator; this module only describes what the transport needs
//! from it and how local candidates are rendered into SDP (RFC 8839).
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

use crate::component::Component;
use crate::error::TransportResult;
use async_trait::async_trait;
use bytes::Bytes;
use std::fmt::Write as _;
use std::net::SocketAddr;
use std::sync::Weak;

/// ICE candidate type (RFC 8445 Section 5.1.1)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IceCandidateType {
    /// Host candidate (directly connected interface)
    Host,
    /// Server reflexive candidate (via STUN server)
    ServerReflexive,
    /// Peer reflexive candidate (discovered during connectivity checks)
    PeerReflexive,
    /// Relayed candidate (via TURN server)
    Relayed,
}

impl IceCandidateType {
    /// Token used after `typ` in a candidate line
    pub fn sdp_name(self) -> &'static str {
        match self {
            IceCandidateType::Host => "host",
            IceCandidateType::ServerReflexive => "srflx",
            IceCandidateType::PeerReflexive => "prflx",
            IceCandidateType::Relayed => "relay",
        }
    }

    /// Whether `raddr`/`rport` are emitted for this type
    fn carries_related_address(self) -> bool {
        matches!(self, IceCandidateType::ServerReflexive | IceCandidateType::Relayed)
    }
}

/// Local ICE candidate (RFC 8445 Section 5.1)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IceCandidate {
    /// Foundation
    pub foundation: String,
    /// Component ID (1 for RTP, 2 for RTCP)
    pub component: u32,
    /// Transport protocol (udp, tcp)
    pub protocol: String,
    /// Priority
    pub priority: u32,
    /// Candidate address
    pub address: SocketAddr,
    /// Candidate type
    pub candidate_type: IceCandidateType,
    /// Related address (for srflx/relay candidates)
    pub related_address: Option<SocketAddr>,
}

impl IceCandidate {
    /// Calculate candidate priority per RFC 8445 Section 5.1.2.1
    pub fn calculate_priority(candidate_type: IceCandidateType, component: u32) -> u32 {
        let type_preference: u32 = match candidate_type {
            IceCandidateType::Host => 126,
            IceCandidateType::PeerReflexive => 110,
            IceCandidateType::ServerReflexive => 100,
            IceCandidateType::Relayed => 0,
        };
        let local_preference: u32 = 65535;
        let component_preference = 256u32.saturating_sub(component);

        (type_preference << 24) | (local_preference << 8) | component_preference
    }

    /// Create a host candidate
    pub fn new_host(foundation: impl Into<String>, component: u32, address: SocketAddr) -> Self {
        IceCandidate {
            foundation: foundation.into(),
            component,
            protocol: "udp".to_string(),
            priority: Self::calculate_priority(IceCandidateType::Host, component),
            address,
            candidate_type: IceCandidateType::Host,
            related_address: None,
        }
    }

    /// Create a server reflexive candidate (from STUN)
    pub fn new_server_reflexive(
        foundation: impl Into<String>,
        component: u32,
        address: SocketAddr,
        related_address: SocketAddr,
    ) -> Self {
        IceCandidate {
            foundation: foundation.into(),
            component,
            protocol: "udp".to_string(),
            priority: Self::calculate_priority(IceCandidateType::ServerReflexive, component),
            address,
            candidate_type: IceCandidateType::ServerReflexive,
            related_address: Some(related_address),
        }
    }

    /// Create a relayed candidate (from TURN)
    pub fn new_relayed(
        foundation: impl Into<String>,
        component: u32,
        address: SocketAddr,
        related_address: SocketAddr,
    ) -> Self {
        IceCandidate {
            foundation: foundation.into(),
            component,
            protocol: "udp".to_string(),
            priority: Self::calculate_priority(IceCandidateType::Relayed, component),
            address,
            candidate_type: IceCandidateType::Relayed,
            related_address: Some(related_address),
        }
    }
}

/// Render a local candidate as an SDP attribute line.
///
/// `a=candidate:<foundation> <component> <proto> <priority> <addr> <port> typ <type> [raddr <addr> rport <port>] generation 0`
pub fn candidate_to_sdp_line(candidate: &IceCandidate) -> String {
    let mut line = format!(
        "a=candidate:{} {} {} {} {} {} typ {}",
        candidate.foundation,
        candidate.component,
        candidate.protocol,
        candidate.priority,
        candidate.address.ip(),
        candidate.address.port(),
        candidate.candidate_type.sdp_name(),
    );

    if candidate.candidate_type.carries_related_address() {
        if let Some(related) = candidate.related_address {
            // Writing to a String cannot fail
            let _ = write!(line, " raddr {} rport {}", related.ip(), related.port());
        }
    }

    line.push_str(" generation 0");
    line
}

/// ICE connection state as reported by the collaborator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IceState {
    /// Agent created, gathering not finished
    Initial,
    /// Local candidates gathered
    CandidatesGathered,
    /// Remote candidates received, checks running
    CandidatesReceived,
    /// A pair is selected and usable
    Ready,
    /// All pairs failed or connectivity was lost
    Failed,
}

/// Local ICE credentials
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IceCredentials {
    /// Username fragment
    pub ufrag: String,
    /// Password
    pub pwd: String,
}

/// Datagram pulled from the ICE connection
#[derive(Debug, Clone)]
pub struct IcePacket {
    /// Component the datagram arrived on
    pub component: Component,
    /// Payload
    pub data: Bytes,
}

/// Notifications the ICE connection delivers to its owner
pub trait IceConnectionListener: Send + Sync {
    /// Connectivity state changed
    fn on_ice_state_change(&self, state: IceState);

    /// A local candidate was gathered
    fn on_candidate(&self, candidate: &IceCandidate);
}

/// ICE connection collaborator
#[async_trait]
pub trait IceConnection: Send + Sync {
    /// Begin gathering and connectivity checks
    fn start(&self) -> TransportResult<()>;

    /// Send one datagram on a component, returning the bytes written
    fn send_data(&self, component: Component, data: &[u8]) -> TransportResult<usize>;

    /// Pull the next inbound datagram.
    ///
    /// `None` means the connection is permanently finished.
    async fn recv_packet(&self) -> Option<IcePacket>;

    /// Close the connection; a pending `recv_packet` must then return `None`
    async fn close(&self);

    /// Local username fragment and password
    fn local_credentials(&self) -> IceCredentials;

    /// Current connectivity state
    fn check_state(&self) -> IceState;

    /// Register the listener notified of state changes and candidates
    fn set_listener(&self, listener: Weak<dyn IceConnectionListener>);
}
