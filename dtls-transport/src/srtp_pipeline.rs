//! AEAD_AES_128_GCM SRTP channel
//!
//! Implements the RFC 7714 packet transform for SRTP and SRTCP, with session
//! keys derived from the DTLS-exported master key and salt through the
//! RFC 3711 Section 4.3 key derivation function. Replay protection is left
//! to the media layer.
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

use crate::error::{TransportError, TransportResult};
use crate::srtp::{SrtpChannel, SrtpChannelFactory, SrtpProfile};
use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    aes::{cipher::BlockEncrypt, Aes128, Block},
    Aes128Gcm, Nonce,
};
use bytes::BytesMut;
use std::collections::HashMap;

/// GCM authentication tag length
const TAG_LEN: usize = 16;
/// Fixed RTP header length
const RTP_HEADER_MIN: usize = 12;
/// RTCP header plus sender SSRC
const RTCP_HEADER_LEN: usize = 8;
/// E flag plus 31 bit SRTCP index
const SRTCP_INDEX_LEN: usize = 4;
const SRTCP_E_FLAG: u32 = 0x8000_0000;
const SRTCP_INDEX_MASK: u32 = 0x7fff_ffff;

/// KDF labels (RFC 3711 Section 4.3.2)
const LABEL_RTP_ENCRYPTION: u8 = 0x00;
const LABEL_RTP_SALT: u8 = 0x02;
const LABEL_RTCP_ENCRYPTION: u8 = 0x03;
const LABEL_RTCP_SALT: u8 = 0x05;

const MASTER_KEY_LEN: usize = 16;
const SALT_LEN: usize = 12;

/// Session cipher and salt for one direction of one stream type
struct SessionKeys {
    cipher: Aes128Gcm,
    salt: [u8; SALT_LEN],
}

impl SessionKeys {
    fn derive(kdf: &Aes128, master_salt: &[u8], key_label: u8, salt_label: u8) -> TransportResult<Self> {
        let mut session_key = [0u8; MASTER_KEY_LEN];
        derive_key(kdf, master_salt, key_label, &mut session_key);

        let mut salt = [0u8; SALT_LEN];
        derive_key(kdf, master_salt, salt_label, &mut salt);

        let cipher = Aes128Gcm::new_from_slice(&session_key)
            .map_err(|e| TransportError::SrtpError(format!("Cipher init error: {}", e)))?;

        Ok(SessionKeys { cipher, salt })
    }
}

/// RTP and RTCP session keys for one direction
struct DirectionKeys {
    rtp: SessionKeys,
    rtcp: SessionKeys,
}

impl DirectionKeys {
    fn from_material(material: &[u8]) -> TransportResult<Self> {
        let expected = SrtpProfile::AeadAes128Gcm.keying_material_len();
        if material.len() != expected {
            return Err(TransportError::SrtpError(format!(
                "Keying material must be {} bytes, got {}",
                expected,
                material.len()
            )));
        }
        let (master_key, master_salt) = material.split_at(MASTER_KEY_LEN);

        let kdf = Aes128::new_from_slice(master_key)
            .map_err(|e| TransportError::SrtpError(format!("KDF init error: {}", e)))?;

        Ok(DirectionKeys {
            rtp: SessionKeys::derive(&kdf, master_salt, LABEL_RTP_ENCRYPTION, LABEL_RTP_SALT)?,
            rtcp: SessionKeys::derive(&kdf, master_salt, LABEL_RTCP_ENCRYPTION, LABEL_RTCP_SALT)?,
        })
    }
}

/// Rollover tracking for one SSRC
#[derive(Debug, Clone, Copy)]
struct RolloverState {
    roc: u32,
    highest_seq: u16,
}

/// SRTP channel for the `SRTP_AEAD_AES_128_GCM` profile
pub struct GcmSrtpChannel {
    outbound: Option<DirectionKeys>,
    inbound: Option<DirectionKeys>,
    outbound_rollover: HashMap<u32, RolloverState>,
    inbound_rollover: HashMap<u32, RolloverState>,
    /// Next SRTCP index to send
    srtcp_index: u32,
}

impl GcmSrtpChannel {
    /// Create an unkeyed channel
    pub fn new() -> Self {
        GcmSrtpChannel {
            outbound: None,
            inbound: None,
            outbound_rollover: HashMap::new(),
            inbound_rollover: HashMap::new(),
            srtcp_index: 0,
        }
    }

    /// Rollover counter to use for an outbound packet
    fn outbound_roc(&mut self, ssrc: u32, seq: u16) -> u32 {
        let state = self
            .outbound_rollover
            .entry(ssrc)
            .or_insert(RolloverState { roc: 0, highest_seq: seq });

        if seq < state.highest_seq && state.highest_seq - seq > 0x8000 {
            // Sequence number wrapped
            state.roc = state.roc.wrapping_add(1);
            state.highest_seq = seq;
        } else if seq > state.highest_seq {
            state.highest_seq = seq;
        }
        state.roc
    }

    /// Guess the sender's rollover counter (RFC 3711 Appendix A)
    fn estimate_inbound_roc(&self, ssrc: u32, seq: u16) -> u32 {
        let Some(state) = self.inbound_rollover.get(&ssrc) else {
            return 0;
        };
        let s_l = state.highest_seq as i32;
        let seq = seq as i32;

        if s_l < 32768 {
            if seq - s_l > 32768 {
                state.roc.wrapping_sub(1)
            } else {
                state.roc
            }
        } else if s_l - 32768 > seq {
            state.roc.wrapping_add(1)
        } else {
            state.roc
        }
    }

    fn accept_inbound(&mut self, ssrc: u32, roc: u32, seq: u16) {
        let state = self
            .inbound_rollover
            .entry(ssrc)
            .or_insert(RolloverState { roc, highest_seq: seq });

        let index = ((roc as u64) << 16) | seq as u64;
        let highest = ((state.roc as u64) << 16) | state.highest_seq as u64;
        if index > highest {
            state.roc = roc;
            state.highest_seq = seq;
        }
    }
}

impl Default for GcmSrtpChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl SrtpChannel for GcmSrtpChannel {
    fn set_keys(&mut self, client_key: &[u8], server_key: &[u8]) -> TransportResult<()> {
        let outbound = DirectionKeys::from_material(client_key)?;
        let inbound = DirectionKeys::from_material(server_key)?;
        self.outbound = Some(outbound);
        self.inbound = Some(inbound);
        Ok(())
    }

    fn protect_rtp(&mut self, packet: &mut BytesMut) -> TransportResult<()> {
        if self.outbound.is_none() {
            return Err(not_keyed());
        }
        let header_len = rtp_header_len(packet)?;
        let (ssrc, seq) = rtp_ssrc_seq(packet);
        let roc = self.outbound_roc(ssrc, seq);

        let keys = self.outbound.as_ref().ok_or_else(not_keyed)?;
        let iv = rtp_iv(&keys.rtp.salt, ssrc, roc, seq);
        let ciphertext = keys
            .rtp
            .cipher
            .encrypt(
                Nonce::from_slice(&iv),
                Payload {
                    msg: &packet[header_len..],
                    aad: &packet[..header_len],
                },
            )
            .map_err(|e| TransportError::SrtpError(format!("Encryption error: {}", e)))?;

        packet.truncate(header_len);
        packet.extend_from_slice(&ciphertext);
        Ok(())
    }

    fn protect_rtcp(&mut self, packet: &mut BytesMut) -> TransportResult<()> {
        if packet.len() < RTCP_HEADER_LEN {
            return Err(TransportError::InvalidPacket(format!(
                "RTCP packet too short: {} bytes",
                packet.len()
            )));
        }
        let keys = self.outbound.as_ref().ok_or_else(not_keyed)?;

        let ssrc = u32::from_be_bytes([packet[4], packet[5], packet[6], packet[7]]);
        let index = self.srtcp_index & SRTCP_INDEX_MASK;
        let trailer = (SRTCP_E_FLAG | index).to_be_bytes();

        let iv = rtcp_iv(&keys.rtcp.salt, ssrc, index);
        let aad = rtcp_aad(&packet[..RTCP_HEADER_LEN], &trailer);
        let ciphertext = keys
            .rtcp
            .cipher
            .encrypt(
                Nonce::from_slice(&iv),
                Payload {
                    msg: &packet[RTCP_HEADER_LEN..],
                    aad: &aad,
                },
            )
            .map_err(|e| TransportError::SrtpError(format!("Encryption error: {}", e)))?;

        self.srtcp_index = (index + 1) & SRTCP_INDEX_MASK;

        packet.truncate(RTCP_HEADER_LEN);
        packet.extend_from_slice(&ciphertext);
        packet.extend_from_slice(&trailer);
        Ok(())
    }

    fn unprotect_rtp(&mut self, packet: &mut BytesMut) -> TransportResult<()> {
        if self.inbound.is_none() {
            return Err(not_keyed());
        }
        let header_len = rtp_header_len(packet)?;
        if packet.len() < header_len + TAG_LEN {
            return Err(TransportError::SrtpError(
                "SRTP packet too short for authentication tag".to_string(),
            ));
        }
        let (ssrc, seq) = rtp_ssrc_seq(packet);
        let roc = self.estimate_inbound_roc(ssrc, seq);

        let keys = self.inbound.as_ref().ok_or_else(not_keyed)?;
        let iv = rtp_iv(&keys.rtp.salt, ssrc, roc, seq);
        let plaintext = keys
            .rtp
            .cipher
            .decrypt(
                Nonce::from_slice(&iv),
                Payload {
                    msg: &packet[header_len..],
                    aad: &packet[..header_len],
                },
            )
            .map_err(|e| TransportError::SrtpError(format!("Decryption error: {}", e)))?;

        self.accept_inbound(ssrc, roc, seq);

        packet.truncate(header_len);
        packet.extend_from_slice(&plaintext);
        Ok(())
    }

    fn unprotect_rtcp(&mut self, packet: &mut BytesMut) -> TransportResult<()> {
        let len = packet.len();
        if len < RTCP_HEADER_LEN + TAG_LEN + SRTCP_INDEX_LEN {
            return Err(TransportError::SrtpError(format!(
                "SRTCP packet too short: {} bytes",
                len
            )));
        }
        let keys = self.inbound.as_ref().ok_or_else(not_keyed)?;

        let trailer_start = len - SRTCP_INDEX_LEN;
        let mut trailer = [0u8; SRTCP_INDEX_LEN];
        trailer.copy_from_slice(&packet[trailer_start..]);
        let e_index = u32::from_be_bytes(trailer);
        if e_index & SRTCP_E_FLAG == 0 {
            return Err(TransportError::SrtpError(
                "Unencrypted SRTCP is not supported".to_string(),
            ));
        }
        let index = e_index & SRTCP_INDEX_MASK;
        let ssrc = u32::from_be_bytes([packet[4], packet[5], packet[6], packet[7]]);

        let iv = rtcp_iv(&keys.rtcp.salt, ssrc, index);
        let aad = rtcp_aad(&packet[..RTCP_HEADER_LEN], &trailer);
        let plaintext = keys
            .rtcp
            .cipher
            .decrypt(
                Nonce::from_slice(&iv),
                Payload {
                    msg: &packet[RTCP_HEADER_LEN..trailer_start],
                    aad: &aad,
                },
            )
            .map_err(|e| TransportError::SrtpError(format!("Decryption error: {}", e)))?;

        packet.truncate(RTCP_HEADER_LEN);
        packet.extend_from_slice(&plaintext);
        Ok(())
    }
}

/// Factory for [`GcmSrtpChannel`]; refuses every other profile
#[derive(Debug, Clone, Copy, Default)]
pub struct GcmSrtpFactory;

impl SrtpChannelFactory for GcmSrtpFactory {
    fn create(&self, profile: SrtpProfile) -> TransportResult<Box<dyn SrtpChannel>> {
        match profile {
            SrtpProfile::AeadAes128Gcm => Ok(Box::new(GcmSrtpChannel::new())),
            other => Err(TransportError::SrtpError(format!(
                "Unsupported SRTP profile: {}",
                other
            ))),
        }
    }
}

fn not_keyed() -> TransportError {
    TransportError::SrtpError("SRTP channel has no keys".to_string())
}

/// AES-CM PRF (RFC 3711 Section 4.3.3) with a zero key derivation rate.
///
/// Salts shorter than 14 bytes are zero padded.
fn derive_key(kdf: &Aes128, master_salt: &[u8], label: u8, out: &mut [u8]) {
    let mut iv = [0u8; 16];
    let salt_len = master_salt.len().min(14);
    iv[..salt_len].copy_from_slice(&master_salt[..salt_len]);
    iv[7] ^= label;

    for (counter, chunk) in out.chunks_mut(16).enumerate() {
        let mut block = Block::clone_from_slice(&iv);
        block[14..].copy_from_slice(&(counter as u16).to_be_bytes());
        kdf.encrypt_block(&mut block);
        chunk.copy_from_slice(&block[..chunk.len()]);
    }
}

/// Length of the RTP header including CSRCs and the extension
fn rtp_header_len(packet: &[u8]) -> TransportResult<usize> {
    if packet.len() < RTP_HEADER_MIN {
        return Err(TransportError::InvalidPacket(format!(
            "RTP header too short: {} bytes",
            packet.len()
        )));
    }
    let version = packet[0] >> 6;
    if version != 2 {
        return Err(TransportError::InvalidPacket(format!(
            "Invalid RTP version: {}",
            version
        )));
    }

    let csrc_count = (packet[0] & 0x0f) as usize;
    let mut len = RTP_HEADER_MIN + 4 * csrc_count;

    if packet[0] & 0x10 != 0 {
        if packet.len() < len + 4 {
            return Err(TransportError::InvalidPacket(
                "Incomplete extension header".to_string(),
            ));
        }
        let words = u16::from_be_bytes([packet[len + 2], packet[len + 3]]) as usize;
        len += 4 + 4 * words;
    }

    if packet.len() < len {
        return Err(TransportError::InvalidPacket(format!(
            "RTP header claims {} bytes, packet has {}",
            len,
            packet.len()
        )));
    }
    Ok(len)
}

fn rtp_ssrc_seq(packet: &[u8]) -> (u32, u16) {
    let seq = u16::from_be_bytes([packet[2], packet[3]]);
    let ssrc = u32::from_be_bytes([packet[8], packet[9], packet[10], packet[11]]);
    (ssrc, seq)
}

/// IV = (0x0000 || SSRC || ROC || SEQ) XOR salt (RFC 7714 Section 8.1)
fn rtp_iv(salt: &[u8; SALT_LEN], ssrc: u32, roc: u32, seq: u16) -> [u8; SALT_LEN] {
    let mut iv = [0u8; SALT_LEN];
    iv[2..6].copy_from_slice(&ssrc.to_be_bytes());
    iv[6..10].copy_from_slice(&roc.to_be_bytes());
    iv[10..12].copy_from_slice(&seq.to_be_bytes());
    xor_in_place(&mut iv, salt);
    iv
}

/// IV = (0x0000 || SSRC || 0x0000 || 0 || SRTCP index) XOR salt (RFC 7714 Section 9.1)
fn rtcp_iv(salt: &[u8; SALT_LEN], ssrc: u32, index: u32) -> [u8; SALT_LEN] {
    let mut iv = [0u8; SALT_LEN];
    iv[2..6].copy_from_slice(&ssrc.to_be_bytes());
    iv[8..12].copy_from_slice(&(index & SRTCP_INDEX_MASK).to_be_bytes());
    xor_in_place(&mut iv, salt);
    iv
}

fn rtcp_aad(header: &[u8], trailer: &[u8; SRTCP_INDEX_LEN]) -> [u8; RTCP_HEADER_LEN + SRTCP_INDEX_LEN] {
    let mut aad = [0u8; RTCP_HEADER_LEN + SRTCP_INDEX_LEN];
    aad[..RTCP_HEADER_LEN].copy_from_slice(header);
    aad[RTCP_HEADER_LEN..].copy_from_slice(trailer);
    aad
}

fn xor_in_place(dst: &mut [u8; SALT_LEN], salt: &[u8; SALT_LEN]) {
    for (d, s) in dst.iter_mut().zip(salt.iter()) {
        *d ^= s;
    }
}
