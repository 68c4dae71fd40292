// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 U.S. Federal Government (in countries where recognized)
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

//! CA capabilities returned by `GetCACaps`.
//!
//! The body of a `GetCACaps` response is a list of newline-separated
//! keywords. Unknown keywords are ignored so that newer servers keep working
//! with this client.

use std::fmt;
use std::str::FromStr;

use crate::error::{Result, ScepError};

use super::{ContentEncryptionAlgorithm, HashAlgorithm};

/// A capability keyword advertised by a SCEP server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CaCapability {
    /// AES content encryption.
    Aes,
    /// Triple DES content encryption.
    Des3,
    /// CA rollover via `GetNextCACert`.
    GetNextCaCert,
    /// PKIOperation may be sent with HTTP POST.
    PostPkiOperation,
    /// RenewalReq messages.
    Renewal,
    /// SHA-1 digests.
    Sha1,
    /// SHA-256 digests.
    Sha256,
    /// SHA-512 digests.
    Sha512,
    /// UpdateReq messages (draft-gutmann-scep).
    Update,
    /// RFC 8894 baseline: implies AES, POSTPKIOperation and SHA-256.
    ScepStandard,
}

impl CaCapability {
    /// All known capabilities.
    pub const ALL: [CaCapability; 10] = [
        Self::Aes,
        Self::Des3,
        Self::GetNextCaCert,
        Self::PostPkiOperation,
        Self::Renewal,
        Self::Sha1,
        Self::Sha256,
        Self::Sha512,
        Self::Update,
        Self::ScepStandard,
    ];

    /// The keyword as written by servers.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Aes => "AES",
            Self::Des3 => "DES3",
            Self::GetNextCaCert => "GetNextCACert",
            Self::PostPkiOperation => "POSTPKIOperation",
            Self::Renewal => "Renewal",
            Self::Sha1 => "SHA-1",
            Self::Sha256 => "SHA-256",
            Self::Sha512 => "SHA-512",
            Self::Update => "Update",
            Self::ScepStandard => "SCEPStandard",
        }
    }

    /// Parse a single keyword, ignoring case. Returns `None` for unknown keywords.
    pub fn from_keyword(keyword: &str) -> Option<Self> {
        let keyword = keyword.trim();
        match keyword.to_ascii_uppercase().as_str() {
            "AES" => Some(Self::Aes),
            "DES3" => Some(Self::Des3),
            "GETNEXTCACERT" => Some(Self::GetNextCaCert),
            "POSTPKIOPERATION" => Some(Self::PostPkiOperation),
            "RENEWAL" => Some(Self::Renewal),
            "SHA-1" | "SHA1" => Some(Self::Sha1),
            "SHA-256" | "SHA256" => Some(Self::Sha256),
            "SHA-512" | "SHA512" => Some(Self::Sha512),
            "UPDATE" => Some(Self::Update),
            "SCEPSTANDARD" => Some(Self::ScepStandard),
            _ => None,
        }
    }

    fn bit(&self) -> u16 {
        1 << (*self as u16)
    }
}

impl fmt::Display for CaCapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The set of capabilities advertised by a CA.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct CaCaps {
    bits: u16,
}

impl CaCaps {
    /// An empty capability set (a legacy draft-nourse server).
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse the body of a `GetCACaps` response.
    pub fn parse(text: &str) -> Self {
        let mut caps = Self::new();
        for keyword in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
            match CaCapability::from_keyword(keyword) {
                Some(cap) => caps.insert(cap),
                None => tracing::debug!(keyword, "ignoring unknown CA capability"),
            }
        }
        caps
    }

    /// Add a capability. `SCEPStandard` also adds the capabilities it implies.
    pub fn insert(&mut self, cap: CaCapability) {
        self.bits |= cap.bit();
        if cap == CaCapability::ScepStandard {
            self.bits |= CaCapability::Aes.bit()
                | CaCapability::PostPkiOperation.bit()
                | CaCapability::Sha256.bit();
        }
    }

    /// Returns a copy with `cap` added.
    pub fn with(mut self, cap: CaCapability) -> Self {
        self.insert(cap);
        self
    }

    /// Remove a capability.
    pub fn remove(&mut self, cap: CaCapability) {
        self.bits &= !cap.bit();
    }

    /// Returns true if the capability is present.
    pub fn contains(&self, cap: CaCapability) -> bool {
        self.bits & cap.bit() != 0
    }

    /// Returns true if no capability is present.
    pub fn is_empty(&self) -> bool {
        self.bits == 0
    }

    /// Iterate over the capabilities present.
    pub fn iter(&self) -> impl Iterator<Item = CaCapability> + '_ {
        CaCapability::ALL.into_iter().filter(|c| self.contains(*c))
    }

    /// PKIOperation may be sent with POST.
    pub fn supports_post(&self) -> bool {
        self.contains(CaCapability::PostPkiOperation)
    }

    /// AES content encryption is supported.
    pub fn supports_aes(&self) -> bool {
        self.contains(CaCapability::Aes)
    }

    /// Triple DES content encryption is supported.
    pub fn supports_des3(&self) -> bool {
        self.contains(CaCapability::Des3)
    }

    /// RenewalReq is supported.
    pub fn supports_renewal(&self) -> bool {
        self.contains(CaCapability::Renewal)
    }

    /// UpdateReq is supported.
    pub fn supports_update(&self) -> bool {
        self.contains(CaCapability::Update)
    }

    /// GetNextCACert is supported.
    pub fn supports_get_next_ca_cert(&self) -> bool {
        self.contains(CaCapability::GetNextCaCert)
    }

    /// The strongest advertised digest algorithm, SHA-1 when none is advertised.
    pub fn most_secure_hash_algorithm(&self) -> HashAlgorithm {
        if self.contains(CaCapability::Sha512) {
            HashAlgorithm::Sha512
        } else if self.contains(CaCapability::Sha256) {
            HashAlgorithm::Sha256
        } else {
            HashAlgorithm::Sha1
        }
    }

    /// The strongest advertised content encryption algorithm.
    ///
    /// DES-CBC is only returned when `use_insecure` is set.
    ///
    /// # Errors
    ///
    /// Returns [`ScepError::UnsupportedAlgorithm`] when neither AES nor DES3
    /// is advertised and insecure algorithms are not allowed.
    pub fn strongest_cipher(&self, use_insecure: bool) -> Result<ContentEncryptionAlgorithm> {
        if self.supports_aes() {
            Ok(ContentEncryptionAlgorithm::Aes128Cbc)
        } else if self.supports_des3() {
            Ok(ContentEncryptionAlgorithm::DesEde3Cbc)
        } else if use_insecure {
            Ok(ContentEncryptionAlgorithm::DesCbc)
        } else {
            Err(ScepError::unsupported_algorithm(
                "CA supports neither AES nor DES3 and insecure algorithms are disabled",
            ))
        }
    }
}

impl FromStr for CaCaps {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

impl FromIterator<CaCapability> for CaCaps {
    fn from_iter<I: IntoIterator<Item = CaCapability>>(iter: I) -> Self {
        let mut caps = Self::new();
        for cap in iter {
            caps.insert(cap);
        }
        caps
    }
}

impl fmt::Display for CaCaps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for cap in self.iter() {
            if !first {
                f.write_str("\n")?;
            }
            f.write_str(cap.as_str())?;
            first = false;
        }
        Ok(())
    }
}
