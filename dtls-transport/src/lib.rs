//! DTLS-SRTP transport over an ICE connection
//!
//! This crate provides the secure media transport for one media leg:
//! - Demultiplexing of DTLS and SRTP/SRTCP sharing an ICE component
//! - Handshake flight retransmission
//! - Secure channels keyed from DTLS-SRTP handshakes
//! - The transport state machine tying ICE, DTLS and SRTP together
//!
//! ICE, DTLS and the SRTP packet transform are collaborators behind the
//! traits in [`ice`], [`dtls`] and [`srtp`]. An `AEAD_AES_128_GCM` transform
//! is bundled in [`srtp_pipeline`].
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

pub mod component;
pub mod demux;
pub mod dtls;
pub mod error;
pub mod ice;
pub mod resender;
pub mod sdp;
pub mod srtp;
pub mod srtp_pipeline;
pub mod transport;

// Re-export main types
pub use component::Component;
pub use demux::{classify, is_dtls, is_rtcp, PacketKind};
pub use dtls::{certificate_fingerprint, DtlsReceiver, DtlsSession, HandshakeKeys};
pub use error::{TransportError, TransportResult};
pub use ice::{
    candidate_to_sdp_line, IceCandidate, IceCandidateType, IceConnection, IceConnectionListener,
    IceCredentials, IcePacket, IceState,
};
pub use resender::{ResendStatus, Resender, DEFAULT_RESEND_DELAY};
pub use sdp::{Attribute, LocalDescription};
pub use srtp::{SecureChannel, SrtpChannel, SrtpChannelFactory, SrtpProfile};
pub use srtp_pipeline::{GcmSrtpChannel, GcmSrtpFactory};
pub use transport::{
    MediaType, Transport, TransportConfig, TransportListener, TransportParts, TransportState,
};

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a mutex, recovering the data if a holder panicked
pub(crate) fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
