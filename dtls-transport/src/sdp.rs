//! Transport-level SDP attributes (RFC 8839, RFC 8122)
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

use std::fmt;

/// SDP attribute (RFC 4566 Section 5.13)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    /// Attribute name
    pub name: String,
    /// Attribute value (optional)
    pub value: Option<String>,
}

impl Attribute {
    /// Attribute with a value
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Attribute {
            name: name.into(),
            value: Some(value.into()),
        }
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            Some(value) => write!(f, "a={}:{}", self.name, value),
            None => write!(f, "a={}", self.name),
        }
    }
}

/// What a transport contributes to the local session description
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalDescription {
    /// DTLS certificate fingerprint, e.g. `sha-256 AB:CD:...`
    pub fingerprint: String,
    /// ICE username fragment
    pub ice_ufrag: String,
    /// ICE password
    pub ice_pwd: String,
}

impl LocalDescription {
    /// `fingerprint`, `ice-ufrag` and `ice-pwd` attributes
    pub fn attributes(&self) -> Vec<Attribute> {
        vec![
            Attribute::new("fingerprint", self.fingerprint.clone()),
            Attribute::new("ice-ufrag", self.ice_ufrag.clone()),
            Attribute::new("ice-pwd", self.ice_pwd.clone()),
        ]
    }

    /// Rendered `a=` lines
    pub fn attribute_lines(&self) -> Vec<String> {
        self.attributes().iter().map(ToString::to_string).collect()
    }
}
