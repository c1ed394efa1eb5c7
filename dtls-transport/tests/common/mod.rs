//! Shared fakes for transport integration tests
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

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use dtls_transport::{
    certificate_fingerprint, is_rtcp, Component, DtlsReceiver, DtlsSession, HandshakeKeys,
    IceCandidate, IceConnection, IceConnectionListener, IceCredentials, IcePacket, IceState,
    SrtpChannel, SrtpChannelFactory, SrtpProfile, Transport, TransportConfig, TransportError,
    TransportListener, TransportParts, TransportResult, TransportState,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Flight a session sends when its handshake starts
pub const CLIENT_HELLO: &[u8] = &[22, 0xfe, 0xfd, 0x01];
/// Peer flight the session answers with [`REPLY_FLIGHT`]
pub const SERVER_FLIGHT: &[u8] = &[22, 0xfe, 0xfd, 0x02];
pub const REPLY_FLIGHT: &[u8] = &[22, 0xfe, 0xfd, 0x03];
/// Peer record that completes the handshake
pub const FINISHED: &[u8] = &[22, 0xfe, 0xfd, 0x14];

pub const OUTBOUND_KEY: u8 = 0x11;
pub const INBOUND_KEY: u8 = 0x22;

const XOR_TAG: &[u8] = b"TAG!";

// ---------------------------------------------------------------------------
// ICE
// ---------------------------------------------------------------------------

pub struct FakeIce {
    sent: Mutex<Vec<(Component, Vec<u8>)>>,
    state: Mutex<IceState>,
    listener: Mutex<Option<Weak<dyn IceConnectionListener>>>,
    inbound_tx: mpsc::UnboundedSender<IcePacket>,
    inbound_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<IcePacket>>,
    closed: CancellationToken,
    started: AtomicBool,
    fail_sends: AtomicBool,
}

impl FakeIce {
    pub fn new() -> Arc<Self> {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        Arc::new(FakeIce {
            sent: Mutex::new(Vec::new()),
            state: Mutex::new(IceState::Initial),
            listener: Mutex::new(None),
            inbound_tx,
            inbound_rx: tokio::sync::Mutex::new(inbound_rx),
            closed: CancellationToken::new(),
            started: AtomicBool::new(false),
            fail_sends: AtomicBool::new(false),
        })
    }

    pub fn sent(&self) -> Vec<(Component, Vec<u8>)> {
        self.sent.lock().unwrap().clone()
    }

    /// Sent datagrams carrying SRTP or SRTCP
    pub fn media_sent(&self) -> Vec<(Component, Vec<u8>)> {
        self.sent()
            .into_iter()
            .filter(|(_, data)| matches!(data.first().copied(), Some(128..=191)))
            .collect()
    }

    /// Sent datagrams carrying DTLS
    pub fn handshake_sent(&self) -> Vec<(Component, Vec<u8>)> {
        self.sent()
            .into_iter()
            .filter(|(_, data)| matches!(data.first().copied(), Some(20..=63)))
            .collect()
    }

    /// Change the connectivity state and notify the registered listener
    pub fn set_state(&self, state: IceState) {
        self.set_state_silently(state);
        if let Some(listener) = self.listener() {
            listener.on_ice_state_change(state);
        }
    }

    /// Change the state reported by `check_state` without notifying
    pub fn set_state_silently(&self, state: IceState) {
        *self.state.lock().unwrap() = state;
    }

    pub fn gather(&self, candidate: &IceCandidate) {
        if let Some(listener) = self.listener() {
            listener.on_candidate(candidate);
        }
    }

    pub fn push_inbound(&self, component: Component, data: &[u8]) {
        let _ = self.inbound_tx.send(IcePacket {
            component,
            data: Bytes::copy_from_slice(data),
        });
    }

    pub fn set_fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    fn listener(&self) -> Option<Arc<dyn IceConnectionListener>> {
        self.listener.lock().unwrap().as_ref().and_then(Weak::upgrade)
    }
}

#[async_trait]
impl IceConnection for FakeIce {
    fn start(&self) -> TransportResult<()> {
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn send_data(&self, component: Component, data: &[u8]) -> TransportResult<usize> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(TransportError::NetworkError("no route".to_string()));
        }
        self.sent.lock().unwrap().push((component, data.to_vec()));
        Ok(data.len())
    }

    async fn recv_packet(&self) -> Option<IcePacket> {
        let mut inbound = self.inbound_rx.lock().await;
        tokio::select! {
            _ = self.closed.cancelled() => None,
            packet = inbound.recv() => packet,
        }
    }

    async fn close(&self) {
        self.closed.cancel();
    }

    fn local_credentials(&self) -> IceCredentials {
        IceCredentials {
            ufrag: "F7gI".to_string(),
            pwd: "x9cml/YzichV2+XlhiMu8g".to_string(),
        }
    }

    fn check_state(&self) -> IceState {
        *self.state.lock().unwrap()
    }

    fn set_listener(&self, listener: Weak<dyn IceConnectionListener>) {
        *self.listener.lock().unwrap() = Some(listener);
    }
}

// ---------------------------------------------------------------------------
// DTLS
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct DtlsLog {
    pub starts: usize,
    pub reads: Vec<Vec<u8>>,
}

/// Scripted DTLS session driven by the record constants above
pub struct FakeDtls {
    log: Arc<Mutex<DtlsLog>>,
    keys: HandshakeKeys,
    started: bool,
}

impl FakeDtls {
    pub fn new(keys: HandshakeKeys) -> (Self, Arc<Mutex<DtlsLog>>) {
        let log = Arc::new(Mutex::new(DtlsLog::default()));
        (
            FakeDtls {
                log: log.clone(),
                keys,
                started: false,
            },
            log,
        )
    }
}

impl DtlsSession for FakeDtls {
    fn start(&mut self, receiver: &mut dyn DtlsReceiver) {
        self.started = true;
        self.log.lock().unwrap().starts += 1;
        receiver.send_handshake_flight(Bytes::from_static(CLIENT_HELLO));
    }

    fn read(&mut self, record: &[u8], receiver: &mut dyn DtlsReceiver) {
        self.log.lock().unwrap().reads.push(record.to_vec());
        if record == FINISHED {
            receiver.handshake_completed(self.keys.clone());
        } else if record == SERVER_FLIGHT {
            receiver.send_handshake_flight(Bytes::from_static(REPLY_FLIGHT));
        }
    }

    fn is_started(&self) -> bool {
        self.started
    }

    fn fingerprint(&self) -> String {
        certificate_fingerprint(b"fake certificate")
    }
}

pub fn xor_keys() -> HandshakeKeys {
    HandshakeKeys {
        client_key: vec![OUTBOUND_KEY; 28],
        server_key: vec![INBOUND_KEY; 28],
        profile: SrtpProfile::AeadAes128Gcm,
    }
}

// ---------------------------------------------------------------------------
// SRTP
// ---------------------------------------------------------------------------

/// XORs everything past the header with a key byte and appends a tag
pub struct XorChannel {
    outbound: Option<u8>,
    inbound: Option<u8>,
}

fn xor_from(packet: &mut [u8], offset: usize, key: u8) {
    let offset = offset.min(packet.len());
    for byte in &mut packet[offset..] {
        *byte ^= key;
    }
}

fn xor_protect(packet: &mut BytesMut, offset: usize, key: Option<u8>) -> TransportResult<()> {
    let key = key.ok_or_else(|| TransportError::SrtpError("no keys".to_string()))?;
    xor_from(packet, offset, key);
    packet.extend_from_slice(XOR_TAG);
    Ok(())
}

fn xor_unprotect(packet: &mut BytesMut, offset: usize, key: Option<u8>) -> TransportResult<()> {
    let key = key.ok_or_else(|| TransportError::SrtpError("no keys".to_string()))?;
    if !packet.ends_with(XOR_TAG) {
        return Err(TransportError::SrtpError("bad tag".to_string()));
    }
    packet.truncate(packet.len() - XOR_TAG.len());
    xor_from(packet, offset, key);
    Ok(())
}

impl SrtpChannel for XorChannel {
    fn set_keys(&mut self, client_key: &[u8], server_key: &[u8]) -> TransportResult<()> {
        match (client_key.first(), server_key.first()) {
            (Some(&out), Some(&inb)) => {
                self.outbound = Some(out);
                self.inbound = Some(inb);
                Ok(())
            }
            _ => Err(TransportError::SrtpError("empty keys".to_string())),
        }
    }

    fn protect_rtp(&mut self, packet: &mut BytesMut) -> TransportResult<()> {
        xor_protect(packet, 12, self.outbound)
    }

    fn protect_rtcp(&mut self, packet: &mut BytesMut) -> TransportResult<()> {
        xor_protect(packet, 8, self.outbound)
    }

    fn unprotect_rtp(&mut self, packet: &mut BytesMut) -> TransportResult<()> {
        xor_unprotect(packet, 12, self.inbound)
    }

    fn unprotect_rtcp(&mut self, packet: &mut BytesMut) -> TransportResult<()> {
        xor_unprotect(packet, 8, self.inbound)
    }
}

pub struct XorSrtpFactory;

impl SrtpChannelFactory for XorSrtpFactory {
    fn create(&self, _profile: SrtpProfile) -> TransportResult<Box<dyn SrtpChannel>> {
        Ok(Box::new(XorChannel {
            outbound: None,
            inbound: None,
        }))
    }
}

fn header_len(data: &[u8]) -> usize {
    if is_rtcp(data) {
        8
    } else {
        12
    }
}

/// What the peer puts on the wire for `data`
pub fn peer_protect(data: &[u8]) -> Vec<u8> {
    let mut packet = BytesMut::from(data);
    let offset = header_len(data);
    let _ = xor_protect(&mut packet, offset, Some(INBOUND_KEY));
    packet.to_vec()
}

/// What the peer recovers from a datagram we sent
pub fn peer_unprotect(data: &[u8]) -> Option<Vec<u8>> {
    let mut packet = BytesMut::from(data);
    let offset = header_len(data);
    xor_unprotect(&mut packet, offset, Some(OUTBOUND_KEY)).ok()?;
    Some(packet.to_vec())
}

pub fn rtp_packet(seq: u16, payload: &[u8]) -> Vec<u8> {
    let mut packet = vec![0x80, 111];
    packet.extend_from_slice(&seq.to_be_bytes());
    packet.extend_from_slice(&[0, 0, 0x03, 0xe8]);
    packet.extend_from_slice(&[0x12, 0x34, 0x56, 0x78]);
    packet.extend_from_slice(payload);
    packet
}

pub fn rtcp_packet() -> Vec<u8> {
    // Receiver report with one block
    let mut packet = vec![0x81, 201, 0x00, 0x07];
    packet.extend_from_slice(&[0xde, 0xad, 0xbe, 0xef]);
    packet.extend_from_slice(&[0x42; 24]);
    packet
}

// ---------------------------------------------------------------------------
// Media session
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct RecordingListener {
    data: Mutex<Vec<Vec<u8>>>,
    candidates: Mutex<Vec<String>>,
    states: Mutex<Vec<TransportState>>,
}

impl RecordingListener {
    pub fn data(&self) -> Vec<Vec<u8>> {
        self.data.lock().unwrap().clone()
    }

    pub fn candidates(&self) -> Vec<String> {
        self.candidates.lock().unwrap().clone()
    }

    pub fn states(&self) -> Vec<TransportState> {
        self.states.lock().unwrap().clone()
    }
}

impl TransportListener for RecordingListener {
    fn on_transport_data(&self, data: &[u8]) {
        self.data.lock().unwrap().push(data.to_vec());
    }

    fn on_candidate(&self, sdp_line: &str) {
        self.candidates.lock().unwrap().push(sdp_line.to_string());
    }

    fn on_transport_state_change(&self, state: TransportState) {
        self.states.lock().unwrap().push(state);
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub transport: Transport,
    pub ice: Arc<FakeIce>,
    pub listener: Arc<RecordingListener>,
    pub rtp_log: Arc<Mutex<DtlsLog>>,
    pub rtcp_log: Option<Arc<Mutex<DtlsLog>>>,
}

pub fn config(rtcp_mux: bool) -> TransportConfig {
    TransportConfig {
        name: "test-leg".to_string(),
        rtcp_mux,
        ..TransportConfig::default()
    }
}

/// Transport over fakes with the XOR channel
pub fn harness(rtcp_mux: bool) -> Harness {
    harness_with(config(rtcp_mux), Arc::new(XorSrtpFactory), xor_keys(), xor_keys())
}

pub fn harness_with(
    config: TransportConfig,
    srtp: Arc<dyn SrtpChannelFactory>,
    rtp_keys: HandshakeKeys,
    rtcp_keys: HandshakeKeys,
) -> Harness {
    transport_logging::try_init_test_logging("debug");

    let ice = FakeIce::new();
    let listener = Arc::new(RecordingListener::default());
    let (dtls_rtp, rtp_log) = FakeDtls::new(rtp_keys);
    let (dtls_rtcp, rtcp_log) = if config.rtcp_mux {
        (None, None)
    } else {
        let (session, log) = FakeDtls::new(rtcp_keys);
        (Some(Box::new(session) as Box<dyn DtlsSession>), Some(log))
    };

    let transport = Transport::new(
        config,
        TransportParts {
            ice: ice.clone(),
            dtls_rtp: Box::new(dtls_rtp),
            dtls_rtcp,
            srtp,
            listener: listener.clone(),
        },
    )
    .expect("transport");

    Harness {
        transport,
        ice,
        listener,
        rtp_log,
        rtcp_log,
    }
}

impl Harness {
    /// Connect ICE and complete every handshake
    pub fn make_ready(&self) {
        self.ice.set_state(IceState::Ready);
        self.transport.on_datagram(Component::Rtp, FINISHED);
        if self.rtcp_log.is_some() {
            self.transport.on_datagram(Component::Rtcp, FINISHED);
        }
        assert!(self.transport.is_ready());
    }

    pub fn rtp_reads(&self) -> usize {
        self.rtp_log.lock().unwrap().reads.len()
    }

    pub fn rtp_starts(&self) -> usize {
        self.rtp_log.lock().unwrap().starts
    }
}

/// Poll `condition` until it holds or a second passes
pub async fn wait_until(condition: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    condition()
}
