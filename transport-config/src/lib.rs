//! Configuration management for the DTLS-SRTP transport
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


use serde::Deserialize;
use std::env;
use std::str::FromStr;

/// Default delay before a DTLS flight is resent
pub const DEFAULT_RESEND_DELAY_MS: u64 = 3000;

/// Default upper bound for a single media datagram
pub const DEFAULT_MAX_PACKET_SIZE: usize = 5000;

/// Transport settings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TransportSettings {
    /// Name used to tag log lines
    pub name: String,
    /// Transport carries several media sections (BUNDLE)
    pub bundle: bool,
    /// RTCP is multiplexed on the RTP component
    pub rtcp_mux: bool,
    /// DTLS flight resend delay in milliseconds
    pub resend_delay_ms: u64,
    /// Largest accepted media datagram
    pub max_packet_size: usize,
    pub log_level: Option<String>,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            name: "transport".to_string(),
            bundle: false,
            rtcp_mux: true,
            resend_delay_ms: DEFAULT_RESEND_DELAY_MS,
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
            log_level: Some("info".to_string()),
        }
    }
}

impl TransportSettings {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, config::ConfigError> {
        // Load .env file if it exists
        let _ = dotenvy::dotenv();

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, config::ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        Ok(Self {
            name: lookup("TRANSPORT_NAME").unwrap_or(defaults.name),
            bundle: parse_or(&lookup, "TRANSPORT_BUNDLE", defaults.bundle)?,
            rtcp_mux: parse_or(&lookup, "TRANSPORT_RTCP_MUX", defaults.rtcp_mux)?,
            resend_delay_ms: parse_or(&lookup, "DTLS_RESEND_DELAY_MS", defaults.resend_delay_ms)?,
            max_packet_size: parse_or(&lookup, "TRANSPORT_MAX_PACKET_SIZE", defaults.max_packet_size)?,
            log_level: Some(lookup("LOG_LEVEL").unwrap_or_else(|| "info".to_string())),
        })
    }

    /// Get log level, defaulting to "info"
    pub fn log_level(&self) -> &str {
        self.log_level.as_deref().unwrap_or("info")
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, config::ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| {
            config::ConfigError::Message(format!("invalid value for {}: {:?}", key, raw))
        }),
    }
}
