//! Error types for the DTLS-SRTP transport
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


use thiserror::Error;

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

/// Errors that can occur in the transport
#[derive(Error, Debug)]
pub enum TransportError {
    /// ICE connection send/receive error
    #[error("Network error: {0}")]
    NetworkError(String),

    /// SRTP protect/unprotect error
    #[error("SRTP error: {0}")]
    SrtpError(String),

    /// Secure channel could not be keyed from the handshake result
    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    /// Invalid packet format
    #[error("Invalid packet format: {0}")]
    InvalidPacket(String),

    /// Buffer error
    #[error("Buffer error: {0}")]
    BufferError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        TransportError::NetworkError(err.to_string())
    }
}
