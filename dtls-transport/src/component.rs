//! Logical sub-streams of a transport
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

/// ICE component carrying a logical sub-stream.
///
/// With rtcp-mux only [`Component::Rtp`] exists; otherwise RTCP travels on
/// its own ICE component with its own DTLS session and SRTP keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Component {
    /// RTP (ICE component 1)
    Rtp,
    /// RTCP (ICE component 2)
    Rtcp,
}

impl Component {
    /// ICE component id
    pub fn id(self) -> u32 {
        match self {
            Component::Rtp => 1,
            Component::Rtcp => 2,
        }
    }

    /// Map an ICE component id back to a component
    pub fn from_id(id: u32) -> Option<Self> {
        match id {
            1 => Some(Component::Rtp),
            2 => Some(Component::Rtcp),
            _ => None,
        }
    }

    pub(crate) fn index(self) -> usize {
        match self {
            Component::Rtp => 0,
            Component::Rtcp => 1,
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Component::Rtp => write!(f, "rtp"),
            Component::Rtcp => write!(f, "rtcp"),
        }
    }
}
