//! Secure channels: SRTP/SRTCP protection keyed by a DTLS handshake
//!
//! The packet transform is supplied through [`SrtpChannel`]; the transport
//! only ever touches it through a [`SecureChannel`], which is keyed exactly
//! once and cannot be rekeyed.
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
use crate::demux::is_rtcp;
use crate::dtls::HandshakeKeys;
use crate::error::{TransportError, TransportResult};
use bytes::BytesMut;
use std::fmt;

/// Largest expansion a protect call may add (16 byte tag + 4 byte SRTCP index)
pub const SRTP_MAX_TRAILER_LEN: usize = 20;

/// DTLS-SRTP protection profile (RFC 5764 Section 4.1.2, RFC 7714 Section 14.2)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SrtpProfile {
    Aes128CmSha1_80,
    Aes128CmSha1_32,
    AeadAes128Gcm,
    AeadAes256Gcm,
}

impl SrtpProfile {
    /// Parse the profile name a DTLS stack reports
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "SRTP_AES128_CM_SHA1_80" => Some(SrtpProfile::Aes128CmSha1_80),
            "SRTP_AES128_CM_SHA1_32" => Some(SrtpProfile::Aes128CmSha1_32),
            "SRTP_AEAD_AES_128_GCM" => Some(SrtpProfile::AeadAes128Gcm),
            "SRTP_AEAD_AES_256_GCM" => Some(SrtpProfile::AeadAes256Gcm),
            _ => None,
        }
    }

    /// IANA profile name
    pub fn name(self) -> &'static str {
        match self {
            SrtpProfile::Aes128CmSha1_80 => "SRTP_AES128_CM_SHA1_80",
            SrtpProfile::Aes128CmSha1_32 => "SRTP_AES128_CM_SHA1_32",
            SrtpProfile::AeadAes128Gcm => "SRTP_AEAD_AES_128_GCM",
            SrtpProfile::AeadAes256Gcm => "SRTP_AEAD_AES_256_GCM",
        }
    }

    /// Master key length in bytes
    pub fn master_key_len(self) -> usize {
        match self {
            SrtpProfile::AeadAes256Gcm => 32,
            _ => 16,
        }
    }

    /// Master salt length in bytes
    pub fn master_salt_len(self) -> usize {
        match self {
            SrtpProfile::Aes128CmSha1_80 | SrtpProfile::Aes128CmSha1_32 => 14,
            SrtpProfile::AeadAes128Gcm | SrtpProfile::AeadAes256Gcm => 12,
        }
    }

    /// Keying material per direction (key followed by salt)
    pub fn keying_material_len(self) -> usize {
        self.master_key_len() + self.master_salt_len()
    }
}

impl fmt::Display for SrtpProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// SRTP packet transform collaborator.
///
/// All operations work in place: on success `packet` holds the protected
/// (or recovered) record.
pub trait SrtpChannel: Send {
    /// Install outbound (`client_key`) and inbound (`server_key`) keying material
    fn set_keys(&mut self, client_key: &[u8], server_key: &[u8]) -> TransportResult<()>;

    fn protect_rtp(&mut self, packet: &mut BytesMut) -> TransportResult<()>;

    fn protect_rtcp(&mut self, packet: &mut BytesMut) -> TransportResult<()>;

    fn unprotect_rtp(&mut self, packet: &mut BytesMut) -> TransportResult<()>;

    fn unprotect_rtcp(&mut self, packet: &mut BytesMut) -> TransportResult<()>;
}

/// Builds an unkeyed [`SrtpChannel`] for a negotiated profile
pub trait SrtpChannelFactory: Send + Sync {
    fn create(&self, profile: SrtpProfile) -> TransportResult<Box<dyn SrtpChannel>>;
}

/// A keyed SRTP channel bound to one component
pub struct SecureChannel {
    component: Component,
    profile: SrtpProfile,
    channel: Box<dyn SrtpChannel>,
}

impl SecureChannel {
    /// Create and key a channel from a completed handshake.
    ///
    /// Any failure is reported as [`TransportError::KeyDerivation`].
    pub fn establish(
        component: Component,
        factory: &dyn SrtpChannelFactory,
        keys: &HandshakeKeys,
    ) -> TransportResult<Self> {
        let mut channel = factory
            .create(keys.profile)
            .map_err(|e| TransportError::KeyDerivation(format!("{} channel: {}", component, e)))?;

        channel
            .set_keys(&keys.client_key, &keys.server_key)
            .map_err(|e| TransportError::KeyDerivation(format!("{} keys: {}", component, e)))?;

        Ok(SecureChannel {
            component,
            profile: keys.profile,
            channel,
        })
    }

    /// Protect an outbound RTP or RTCP record, routed by its header
    pub fn protect(&mut self, data: &[u8], max_packet_size: usize) -> TransportResult<BytesMut> {
        let mut packet = packet_buffer(data, max_packet_size)?;
        if is_rtcp(data) {
            self.channel.protect_rtcp(&mut packet)?;
        } else {
            self.channel.protect_rtp(&mut packet)?;
        }
        Ok(packet)
    }

    /// Unprotect an inbound SRTP or SRTCP record, routed by its header
    pub fn unprotect(&mut self, data: &[u8], max_packet_size: usize) -> TransportResult<BytesMut> {
        let mut packet = packet_buffer(data, max_packet_size)?;
        if is_rtcp(data) {
            self.channel.unprotect_rtcp(&mut packet)?;
        } else {
            self.channel.unprotect_rtp(&mut packet)?;
        }
        Ok(packet)
    }
}

impl fmt::Debug for SecureChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecureChannel")
            .field("component", &self.component)
            .field("profile", &self.profile)
            .finish_non_exhaustive()
    }
}

/// Per-call scratch buffer with room for the SRTP trailer
fn packet_buffer(data: &[u8], max_packet_size: usize) -> TransportResult<BytesMut> {
    if data.len() > max_packet_size {
        return Err(TransportError::BufferError(format!(
            "packet of {} bytes exceeds limit of {}",
            data.len(),
            max_packet_size
        )));
    }
    let mut packet = BytesMut::with_capacity(data.len() + SRTP_MAX_TRAILER_LEN);
    packet.extend_from_slice(data);
    Ok(packet)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Marks protected packets with a trailing byte per kind.
    struct TaggingChannel {
        keyed: bool,
    }

    impl SrtpChannel for TaggingChannel {
        fn set_keys(&mut self, client_key: &[u8], _server_key: &[u8]) -> TransportResult<()> {
            if client_key.is_empty() {
                return Err(TransportError::SrtpError("empty key".to_string()));
            }
            self.keyed = true;
            Ok(())
        }

        fn protect_rtp(&mut self, packet: &mut BytesMut) -> TransportResult<()> {
            if !self.keyed {
                return Err(TransportError::SrtpError("not keyed".to_string()));
            }
            packet.extend_from_slice(b"P");
            Ok(())
        }

        fn protect_rtcp(&mut self, packet: &mut BytesMut) -> TransportResult<()> {
            packet.extend_from_slice(b"C");
            Ok(())
        }

        fn unprotect_rtp(&mut self, packet: &mut BytesMut) -> TransportResult<()> {
            packet.truncate(packet.len().saturating_sub(1));
            Ok(())
        }

        fn unprotect_rtcp(&mut self, _packet: &mut BytesMut) -> TransportResult<()> {
            Err(TransportError::SrtpError("bad tag".to_string()))
        }
    }

    struct TaggingFactory;

    impl SrtpChannelFactory for TaggingFactory {
        fn create(&self, profile: SrtpProfile) -> TransportResult<Box<dyn SrtpChannel>> {
            match profile {
                SrtpProfile::Aes128CmSha1_80 => Ok(Box::new(TaggingChannel { keyed: false })),
                other => Err(TransportError::SrtpError(format!("unsupported {}", other))),
            }
        }
    }

    fn keys(profile: SrtpProfile, client_key: Vec<u8>) -> HandshakeKeys {
        HandshakeKeys {
            client_key,
            server_key: vec![2u8; 30],
            profile,
        }
    }

    #[test]
    fn test_profile_names_round_trip() {
        for profile in [
            SrtpProfile::Aes128CmSha1_80,
            SrtpProfile::Aes128CmSha1_32,
            SrtpProfile::AeadAes128Gcm,
            SrtpProfile::AeadAes256Gcm,
        ] {
            assert_eq!(SrtpProfile::from_name(profile.name()), Some(profile));
        }
        assert_eq!(SrtpProfile::from_name("SRTP_NULL_NULL"), None);
        assert_eq!(SrtpProfile::Aes128CmSha1_80.keying_material_len(), 30);
        assert_eq!(SrtpProfile::AeadAes128Gcm.keying_material_len(), 28);
    }

    #[test]
    fn test_establish_routes_by_header() {
        let mut channel = SecureChannel::establish(
            Component::Rtp,
            &TaggingFactory,
            &keys(SrtpProfile::Aes128CmSha1_80, vec![1u8; 30]),
        )
        .unwrap();

        let rtp = [0x80u8, 111, 0, 1];
        let rtcp = [0x80u8, 200, 0, 1];
        assert_eq!(&channel.protect(&rtp, 1500).unwrap()[..], b"\x80\x6f\x00\x01P");
        assert_eq!(&channel.protect(&rtcp, 1500).unwrap()[..], b"\x80\xc8\x00\x01C");
        assert_eq!(&channel.unprotect(b"\x80\x6f\x00\x01P", 1500).unwrap()[..], &rtp);
        assert!(channel.unprotect(&rtcp, 1500).is_err());
    }

    #[test]
    fn test_establish_failures_are_key_derivation() {
        let unsupported = SecureChannel::establish(
            Component::Rtcp,
            &TaggingFactory,
            &keys(SrtpProfile::AeadAes256Gcm, vec![1u8; 44]),
        );
        assert!(matches!(unsupported, Err(TransportError::KeyDerivation(_))));

        let bad_keys = SecureChannel::establish(
            Component::Rtp,
            &TaggingFactory,
            &keys(SrtpProfile::Aes128CmSha1_80, Vec::new()),
        );
        assert!(matches!(bad_keys, Err(TransportError::KeyDerivation(_))));
    }

    #[test]
    fn test_oversized_packet_rejected() {
        let mut channel = SecureChannel::establish(
            Component::Rtp,
            &TaggingFactory,
            &keys(SrtpProfile::Aes128CmSha1_80, vec![1u8; 30]),
        )
        .unwrap();

        let big = vec![0x80u8; 1501];
        assert!(matches!(channel.protect(&big, 1500), Err(TransportError::BufferError(_))));
        assert!(channel.protect(&big[..1500], 1500).is_ok());
    }
}
