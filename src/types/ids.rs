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

//! Transaction identifiers and nonces.

use std::fmt;

use der::Encode;
use rand::rngs::OsRng;
use rand::RngCore;
use spki::SubjectPublicKeyInfoOwned;

use crate::error::{Result, ScepError};

use super::HashAlgorithm;

/// Size of a SCEP nonce in bytes.
pub const NONCE_LEN: usize = 16;

/// Correlates all messages that belong to one enrolment.
///
/// Encoded as a PrintableString on the wire. Requests that carry a CSR derive
/// the identifier from the subject public key so that the CA can detect
/// resubmissions; other requests use a random value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransactionId(String);

impl TransactionId {
    /// Wrap an existing transaction identifier.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is empty or not a valid PrintableString.
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(ScepError::invalid_argument("transaction ID must not be empty"));
        }
        if !id.bytes().all(is_printable) {
            return Err(ScepError::invalid_argument(format!(
                "transaction ID '{}' is not a PrintableString",
                id
            )));
        }
        Ok(Self(id))
    }

    /// A random transaction identifier (hex of 16 random bytes).
    pub fn random() -> Self {
        let mut bytes = [0u8; 16];
        OsRng.fill_bytes(&mut bytes);
        Self(hex::encode_upper(bytes))
    }

    /// Derive the identifier from a subject public key: uppercase hex of the
    /// SHA-1 digest of the DER-encoded SubjectPublicKeyInfo.
    pub fn from_public_key(spki: &SubjectPublicKeyInfoOwned) -> Result<Self> {
        let der = spki.to_der()?;
        Ok(Self(hex::encode_upper(HashAlgorithm::Sha1.digest(&der))))
    }

    /// Get the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// X.680 PrintableString alphabet.
fn is_printable(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b" '()+,-./:=?".contains(&b)
}

/// A 16-byte random value binding one request to its response.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Nonce([u8; NONCE_LEN]);

impl Nonce {
    /// Generate a fresh nonce from the operating system RNG.
    pub fn random() -> Self {
        let mut bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Build a nonce from received bytes.
    ///
    /// # Errors
    ///
    /// Returns [`ScepError::MalformedCms`] if the value is not 16 bytes long.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let bytes: [u8; NONCE_LEN] = bytes.try_into().map_err(|_| {
            ScepError::malformed_cms(format!(
                "nonce must be {} bytes, got {}",
                NONCE_LEN,
                bytes.len()
            ))
        })?;
        Ok(Self(bytes))
    }

    /// Get the raw nonce bytes.
    pub fn as_bytes(&self) -> &[u8; NONCE_LEN] {
        &self.0
    }
}

impl From<[u8; NONCE_LEN]> for Nonce {
    fn from(bytes: [u8; NONCE_LEN]) -> Self {
        Self(bytes)
    }
}

impl fmt::Debug for Nonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Nonce({})", hex::encode(self.0))
    }
}
