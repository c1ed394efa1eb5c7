//! DTLS-SRTP transport state machine
//!
//! A [`Transport`] owns one media leg: it pulls datagrams from the ICE
//! connection, hands DTLS records to the component's DTLS session, keys a
//! [`SecureChannel`] per component once its handshake completes, and moves
//! SRTP/SRTCP between the wire and the media session.
//!
//! ```text
//!   INITIAL --connectivity--> STARTED --all components keyed--> READY
//!      \                         |                                 |
//!       +-------------------- FAILED <----- connectivity lost -----+
//! ```
//!
//! Lock order is DTLS session, then resender slot or channels, then state.
//! Listener callbacks run after every internal lock is released.
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
use crate::demux::{classify, is_rtcp, PacketKind};
use crate::dtls::{DtlsReceiver, DtlsSession, HandshakeKeys};
use crate::error::{TransportError, TransportResult};
use crate::ice::{candidate_to_sdp_line, IceCandidate, IceConnection, IceConnectionListener, IceState};
use crate::lock;
use crate::resender::{ResendStatus, Resender, DEFAULT_RESEND_DELAY};
use crate::sdp::LocalDescription;
use crate::srtp::{SecureChannel, SrtpChannelFactory};
use bytes::Bytes;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use transport_config::{TransportSettings, DEFAULT_MAX_PACKET_SIZE};
use uuid::Uuid;

/// Protected records this short are never sent
const MIN_PROTECTED_LEN: usize = 10;

/// Transport lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    /// Created, no connectivity signal yet
    Initial,
    /// Connectivity in progress, handshakes not finished
    Started,
    /// Every required component is keyed
    Ready,
    /// Connectivity lost or keying failed (terminal)
    Failed,
}

impl TransportState {
    fn can_transition_to(self, next: TransportState) -> bool {
        matches!(
            (self, next),
            (TransportState::Initial, TransportState::Started)
                | (TransportState::Started, TransportState::Ready)
                | (TransportState::Initial, TransportState::Failed)
                | (TransportState::Started, TransportState::Failed)
                | (TransportState::Ready, TransportState::Failed)
        )
    }
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransportState::Initial => "initial",
            TransportState::Started => "started",
            TransportState::Ready => "ready",
            TransportState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Media type carried by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaType {
    Audio,
    Video,
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaType::Audio => f.write_str("audio"),
            MediaType::Video => f.write_str("video"),
        }
    }
}

/// Transport configuration
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Name used in logs
    pub name: String,
    pub media_type: MediaType,
    /// Whether the leg is part of a BUNDLE group
    pub bundle: bool,
    /// RTCP shares the RTP component (RFC 5761)
    pub rtcp_mux: bool,
    /// Delay before a handshake flight is resent
    pub resend_delay: Duration,
    /// Largest plaintext or protected record accepted
    pub max_packet_size: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            name: "transport".to_string(),
            media_type: MediaType::Audio,
            bundle: false,
            rtcp_mux: true,
            resend_delay: DEFAULT_RESEND_DELAY,
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
        }
    }
}

impl TransportConfig {
    /// Build from environment settings for one media type
    pub fn from_settings(settings: &TransportSettings, media_type: MediaType) -> Self {
        Self {
            name: settings.name.clone(),
            media_type,
            bundle: settings.bundle,
            rtcp_mux: settings.rtcp_mux,
            resend_delay: Duration::from_millis(settings.resend_delay_ms),
            max_packet_size: settings.max_packet_size,
        }
    }
}

/// Upward notifications to the media session
pub trait TransportListener: Send + Sync {
    /// Decrypted RTP or RTCP record
    fn on_transport_data(&self, data: &[u8]);

    /// Local candidate rendered as an `a=candidate:` line
    fn on_candidate(&self, sdp_line: &str);

    /// Transport state changed
    fn on_transport_state_change(&self, state: TransportState);
}

/// Collaborators a transport is built from
pub struct TransportParts {
    pub ice: Arc<dyn IceConnection>,
    /// Session for component 1
    pub dtls_rtp: Box<dyn DtlsSession>,
    /// Session for component 2; present iff rtcp-mux is off
    pub dtls_rtcp: Option<Box<dyn DtlsSession>>,
    pub srtp: Arc<dyn SrtpChannelFactory>,
    pub listener: Arc<dyn TransportListener>,
}

#[derive(Default)]
struct Channels {
    rtp: Option<SecureChannel>,
    rtcp: Option<SecureChannel>,
}

impl Channels {
    fn slot(&mut self, component: Component) -> &mut Option<SecureChannel> {
        match component {
            Component::Rtp => &mut self.rtp,
            Component::Rtcp => &mut self.rtcp,
        }
    }
}

struct TransportInner {
    id: Uuid,
    config: TransportConfig,
    ice: Arc<dyn IceConnection>,
    srtp: Arc<dyn SrtpChannelFactory>,
    listener: Arc<dyn TransportListener>,
    /// Indexed by [`Component::index`]
    sessions: [Option<Mutex<Box<dyn DtlsSession>>>; 2],
    resenders: [Mutex<Option<Resender>>; 2],
    channels: Mutex<Channels>,
    state: Mutex<TransportState>,
    stopped: AtomicBool,
    receive_token: CancellationToken,
    receive_task: Mutex<Option<JoinHandle<()>>>,
    runtime: Handle,
}

/// DTLS-SRTP transport for one media leg
pub struct Transport {
    inner: Arc<TransportInner>,
}

impl Transport {
    /// Create a transport, register it with the ICE connection, start the
    /// connection and spawn the receive worker.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(config: TransportConfig, parts: TransportParts) -> TransportResult<Self> {
        match (config.rtcp_mux, parts.dtls_rtcp.is_some()) {
            (true, true) => {
                return Err(TransportError::ConfigError(
                    "RTCP DTLS session given with rtcp-mux enabled".to_string(),
                ))
            }
            (false, false) => {
                return Err(TransportError::ConfigError(
                    "RTCP DTLS session required without rtcp-mux".to_string(),
                ))
            }
            _ => {}
        }
        if config.max_packet_size == 0 {
            return Err(TransportError::ConfigError(
                "max packet size must be positive".to_string(),
            ));
        }

        let runtime = Handle::try_current()
            .map_err(|e| TransportError::ConfigError(format!("No tokio runtime: {}", e)))?;

        let inner = Arc::new(TransportInner {
            id: Uuid::new_v4(),
            config,
            ice: parts.ice,
            srtp: parts.srtp,
            listener: parts.listener,
            sessions: [Some(Mutex::new(parts.dtls_rtp)), parts.dtls_rtcp.map(Mutex::new)],
            resenders: [Mutex::new(None), Mutex::new(None)],
            channels: Mutex::new(Channels::default()),
            state: Mutex::new(TransportState::Initial),
            stopped: AtomicBool::new(false),
            receive_token: CancellationToken::new(),
            receive_task: Mutex::new(None),
            runtime,
        });

        let weak = Arc::downgrade(&inner);
        let ice_listener: Weak<dyn IceConnectionListener> = weak;
        inner.ice.set_listener(ice_listener);

        let task = inner.runtime.spawn(receive_loop(
            inner.ice.clone(),
            Arc::downgrade(&inner),
            inner.receive_token.clone(),
        ));
        *lock(&inner.receive_task) = Some(task);

        info!(
            transport = %inner.config.name,
            id = %inner.id,
            media = %inner.config.media_type,
            rtcp_mux = inner.config.rtcp_mux,
            bundle = inner.config.bundle,
            "Transport created"
        );

        if let Err(e) = inner.ice.start() {
            inner.receive_token.cancel();
            return Err(e);
        }

        Ok(Transport { inner })
    }

    /// Feed one inbound datagram from the ICE connection
    pub fn on_datagram(&self, component: Component, data: &[u8]) {
        self.inner.on_datagram(component, data);
    }

    /// Protect and send one plaintext RTP or RTCP record
    pub fn write(&self, data: &[u8]) {
        self.inner.write(data);
    }

    /// React to an ICE connectivity change
    pub fn on_connectivity_state_change(&self, state: IceState) {
        self.inner.on_connectivity_state_change(state);
    }

    /// Forward a gathered local candidate to the media session
    pub fn on_candidate(&self, candidate: &IceCandidate) {
        self.inner.on_candidate(candidate);
    }

    /// Local certificate fingerprint of the RTP DTLS session
    pub fn fingerprint(&self) -> String {
        self.inner.fingerprint()
    }

    /// Fingerprint and ICE credentials for the local session description
    pub fn local_description(&self) -> LocalDescription {
        let credentials = self.inner.ice.local_credentials();
        LocalDescription {
            fingerprint: self.inner.fingerprint(),
            ice_ufrag: credentials.ufrag,
            ice_pwd: credentials.pwd,
        }
    }

    pub fn state(&self) -> TransportState {
        self.inner.state()
    }

    pub fn is_ready(&self) -> bool {
        self.inner.state() == TransportState::Ready
    }

    /// Status of the component's most recent handshake resend, if any
    pub fn resend_status(&self, component: Component) -> Option<ResendStatus> {
        lock(&self.inner.resenders[component.index()])
            .as_ref()
            .map(Resender::status)
    }

    /// Whether the receive worker is still pulling datagrams
    pub fn is_receiving(&self) -> bool {
        lock(&self.inner.receive_task)
            .as_ref()
            .map_or(false, |task| !task.is_finished())
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    pub fn media_type(&self) -> MediaType {
        self.inner.config.media_type
    }

    pub fn is_bundle(&self) -> bool {
        self.inner.config.bundle
    }

    pub fn is_rtcp_mux(&self) -> bool {
        self.inner.config.rtcp_mux
    }

    /// Stop the receive worker and resenders, close the ICE connection and
    /// release the secure channels.
    pub async fn close(&self) {
        let inner = &self.inner;
        if inner.stopped.swap(true, Ordering::SeqCst) {
            return;
        }

        inner.receive_token.cancel();
        inner.ice.close().await;

        let task = lock(&inner.receive_task).take();
        if let Some(task) = task {
            let _ = task.await;
        }

        for slot in &inner.resenders {
            let resender = lock(slot).take();
            if let Some(mut resender) = resender {
                resender.stop().await;
            }
        }

        {
            let mut channels = lock(&inner.channels);
            channels.rtp = None;
            channels.rtcp = None;
        }

        info!(transport = %inner.config.name, id = %inner.id, "Transport closed");
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        let inner = &self.inner;
        if inner.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        inner.receive_token.cancel();
        if let Some(task) = lock(&inner.receive_task).take() {
            task.abort();
        }
        for slot in &inner.resenders {
            drop(lock(slot).take());
        }

        // close() is async; finish it on the runtime
        let ice = inner.ice.clone();
        inner.runtime.spawn(async move { ice.close().await });
        debug!(transport = %inner.config.name, id = %inner.id, "Transport dropped");
    }
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport")
            .field("id", &self.inner.id)
            .field("name", &self.inner.config.name)
            .field("state", &self.inner.state())
            .finish_non_exhaustive()
    }
}

impl TransportInner {
    fn state(&self) -> TransportState {
        *lock(&self.state)
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Component whose DTLS session and channel serve `component`
    fn route(&self, component: Component) -> Component {
        if component == Component::Rtcp && !self.config.rtcp_mux {
            Component::Rtcp
        } else {
            Component::Rtp
        }
    }

    fn components(&self) -> &'static [Component] {
        if self.config.rtcp_mux {
            &[Component::Rtp]
        } else {
            &[Component::Rtp, Component::Rtcp]
        }
    }

    /// Apply a transition, recording it for later notification
    fn advance(&self, state: &mut TransportState, next: TransportState, changes: &mut Vec<TransportState>) -> bool {
        let from = *state;
        if !from.can_transition_to(next) {
            if from != next {
                warn!(transport = %self.config.name, from = %from, to = %next, "Rejected state transition");
            }
            return false;
        }
        debug!(transport = %self.config.name, from = %from, to = %next, "Transport state changed");
        *state = next;
        changes.push(next);
        true
    }

    fn notify(&self, changes: Vec<TransportState>) {
        for state in changes {
            self.listener.on_transport_state_change(state);
        }
    }

    fn fail(&self, changes: &mut Vec<TransportState>) {
        {
            let mut state = lock(&self.state);
            self.advance(&mut state, TransportState::Failed, changes);
        }
        self.receive_token.cancel();
        // Nothing goes downward once failed
        for slot in &self.resenders {
            drop(lock(slot).take());
        }
    }

    /// Run `f` against the component's DTLS session, then deliver any
    /// state changes it produced.
    fn with_session(&self, component: Component, f: impl FnOnce(&mut dyn DtlsSession, &mut SessionLink<'_>)) {
        let Some(session) = &self.sessions[component.index()] else {
            trace!(transport = %self.config.name, component = %component, "No DTLS session for component");
            return;
        };

        let mut link = SessionLink {
            inner: self,
            component,
            changes: Vec::new(),
        };
        {
            let mut session = lock(session);
            f(&mut **session, &mut link);
        }
        self.notify(link.changes);
    }

    fn on_datagram(&self, component: Component, data: &[u8]) {
        if self.is_stopped() || self.state() == TransportState::Failed {
            trace!(transport = %self.config.name, len = data.len(), "Dropping datagram on failed transport");
            return;
        }

        let component = self.route(component);

        if classify(data) == PacketKind::Dtls {
            // The peer answered our last flight
            if let Some(resender) = lock(&self.resenders[component.index()]).as_ref() {
                resender.cancel();
            }
            trace!(transport = %self.config.name, component = %component, len = data.len(), "DTLS record");
            self.with_session(component, |session, link| session.read(data, link));
            return;
        }

        let plaintext = {
            let mut channels = lock(&self.channels);
            if self.state() != TransportState::Ready {
                trace!(transport = %self.config.name, len = data.len(), "Dropping media before ready");
                return;
            }
            let Some(channel) = channels.slot(component).as_mut() else {
                trace!(transport = %self.config.name, component = %component, "No secure channel");
                return;
            };
            match channel.unprotect(data, self.config.max_packet_size) {
                Ok(plaintext) => plaintext,
                Err(e) => {
                    trace!(transport = %self.config.name, component = %component, error = %e, "Dropping undecryptable packet");
                    return;
                }
            }
        };

        if plaintext.is_empty() {
            trace!(transport = %self.config.name, component = %component, "Dropping empty packet");
            return;
        }
        self.listener.on_transport_data(&plaintext);
    }

    fn write(&self, data: &[u8]) {
        if self.is_stopped() {
            return;
        }

        let component = if is_rtcp(data) {
            self.route(Component::Rtcp)
        } else {
            Component::Rtp
        };

        // Before protect: a dropped write must not advance SRTP state
        if self.ice.check_state() != IceState::Ready {
            trace!(transport = %self.config.name, "ICE not ready, dropping write");
            return;
        }

        let protected = {
            let mut channels = lock(&self.channels);
            if self.state() != TransportState::Ready {
                trace!(transport = %self.config.name, len = data.len(), "Dropping write before ready");
                return;
            }
            let Some(channel) = channels.slot(component).as_mut() else {
                return;
            };
            match channel.protect(data, self.config.max_packet_size) {
                Ok(protected) => protected,
                Err(e) => {
                    trace!(transport = %self.config.name, component = %component, error = %e, "Failed to protect packet");
                    return;
                }
            }
        };

        if protected.len() <= MIN_PROTECTED_LEN {
            trace!(transport = %self.config.name, len = protected.len(), "Dropping degenerate protected packet");
            return;
        }
        if let Err(e) = self.ice.send_data(component, &protected) {
            debug!(transport = %self.config.name, component = %component, error = %e, "Send failed");
        }
    }

    fn send_handshake_flight(&self, component: Component, flight: Bytes) {
        // State is read under the slot lock so a concurrent fail() cannot miss this arming
        let mut slot = lock(&self.resenders[component.index()]);
        if self.is_stopped() || self.state() == TransportState::Failed {
            return;
        }

        if let Err(e) = self.ice.send_data(component, &flight) {
            debug!(transport = %self.config.name, component = %component, error = %e, "Handshake flight send failed");
        }

        // Retire the previous flight's timer before arming a new one
        drop(slot.take());
        let mut resender = Resender::new(
            self.ice.clone(),
            component,
            flight,
            self.config.resend_delay,
            self.runtime.clone(),
        );
        resender.start();
        *slot = Some(resender);
    }

    fn on_handshake_complete(&self, component: Component, keys: HandshakeKeys, changes: &mut Vec<TransportState>) {
        let mut channels = lock(&self.channels);
        if self.is_stopped() || self.state() == TransportState::Failed {
            return;
        }
        if channels.slot(component).is_some() {
            warn!(transport = %self.config.name, component = %component, "Ignoring repeated handshake completion");
            return;
        }

        match SecureChannel::establish(component, self.srtp.as_ref(), &keys) {
            Ok(channel) => {
                debug!(
                    transport = %self.config.name,
                    component = %component,
                    profile = %keys.profile,
                    "Secure channel established"
                );
                *channels.slot(component) = Some(channel);

                let keyed = self
                    .components()
                    .iter()
                    .all(|&c| channels.slot(c).is_some());
                if keyed {
                    let mut state = lock(&self.state);
                    if *state == TransportState::Initial {
                        self.advance(&mut state, TransportState::Started, changes);
                    }
                    self.advance(&mut state, TransportState::Ready, changes);
                }
            }
            Err(e) => {
                warn!(transport = %self.config.name, component = %component, error = %e, "Key derivation failed");
                drop(channels);
                self.fail(changes);
            }
        }
    }

    fn on_connectivity_state_change(&self, ice_state: IceState) {
        if self.is_stopped() {
            return;
        }
        debug!(transport = %self.config.name, ice_state = ?ice_state, "ICE state changed");

        let mut changes = Vec::new();
        if ice_state == IceState::Failed {
            self.fail(&mut changes);
            self.notify(changes);
            return;
        }

        {
            let mut state = lock(&self.state);
            if *state == TransportState::Initial {
                self.advance(&mut state, TransportState::Started, &mut changes);
            }
        }
        self.notify(changes);

        if ice_state == IceState::Ready {
            for &component in self.components() {
                self.start_session_if_needed(component);
            }
        }
    }

    /// (Re)start a handshake that never started or whose last resend failed
    fn start_session_if_needed(&self, component: Component) {
        if self.state() == TransportState::Failed {
            return;
        }

        let resend_failed = lock(&self.resenders[component.index()])
            .as_ref()
            .map_or(false, |r| r.status() == ResendStatus::Failed);

        self.with_session(component, |session, link| {
            if !session.is_started() || resend_failed {
                debug!(
                    transport = %self.config.name,
                    component = %component,
                    restart = resend_failed,
                    "Starting DTLS handshake"
                );
                session.start(link);
            }
        });
    }

    fn on_candidate(&self, candidate: &IceCandidate) {
        if self.is_stopped() {
            return;
        }
        self.listener.on_candidate(&candidate_to_sdp_line(candidate));
    }

    fn fingerprint(&self) -> String {
        match &self.sessions[Component::Rtp.index()] {
            Some(session) => lock(session).fingerprint(),
            None => String::new(),
        }
    }
}

impl IceConnectionListener for TransportInner {
    fn on_ice_state_change(&self, state: IceState) {
        self.on_connectivity_state_change(state);
    }

    fn on_candidate(&self, candidate: &IceCandidate) {
        TransportInner::on_candidate(self, candidate);
    }
}

/// Receiver capability handed to a DTLS session for one call
struct SessionLink<'a> {
    inner: &'a TransportInner,
    component: Component,
    changes: Vec<TransportState>,
}

impl DtlsReceiver for SessionLink<'_> {
    fn send_handshake_flight(&mut self, flight: Bytes) {
        self.inner.send_handshake_flight(self.component, flight);
    }

    fn handshake_completed(&mut self, keys: HandshakeKeys) {
        self.inner
            .on_handshake_complete(self.component, keys, &mut self.changes);
    }
}

async fn receive_loop(ice: Arc<dyn IceConnection>, inner: Weak<TransportInner>, token: CancellationToken) {
    loop {
        let packet = tokio::select! {
            _ = token.cancelled() => break,
            packet = ice.recv_packet() => packet,
        };

        let Some(packet) = packet else {
            debug!("ICE connection reached end of stream");
            break;
        };
        if packet.data.is_empty() {
            continue;
        }

        let Some(transport) = inner.upgrade() else {
            break;
        };
        transport.on_datagram(packet.component, &packet.data);
    }
    trace!("Receive worker stopped");
}
