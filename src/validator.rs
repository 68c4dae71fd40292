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

//! Trust decisions for the CA certificate returned by `GetCACert`.
//!
//! SCEP runs over plain HTTP, so the CA certificate must be authenticated out
//! of band. The client asks a [`CaCertValidator`] before using it.
//!
//! # Example
//!
//! ```
//! use scep_client::FingerprintCaCertValidator;
//!
//! let validator = FingerprintCaCertValidator::new()
//!     .with_sha256("4F:9C:1A:0B:77:10:2E:5D:3C:88:AA:01:F2:6B:90:DE:13:47:5A:C0:8E:6F:21:9B:44:D1:0C:7A:E3:58:B6:02")
//!     .unwrap();
//! ```

use der::Encode;
use x509_cert::Certificate;

use crate::error::{Result, ScepError};
use crate::types::HashAlgorithm;

/// Decides whether a CA certificate is trusted.
pub trait CaCertValidator: Send + Sync {
    /// Returns true if the client may use `cert` as its CA certificate.
    fn is_trusted(&self, cert: &Certificate) -> bool;
}

impl<F> CaCertValidator for F
where
    F: Fn(&Certificate) -> bool + Send + Sync,
{
    fn is_trusted(&self, cert: &Certificate) -> bool {
        self(cert)
    }
}

/// Trusts CA certificates equal to one of a pre-provisioned set.
#[derive(Debug, Clone, Default)]
pub struct PreprovisionedCaCertValidator {
    certs: Vec<Certificate>,
}

impl PreprovisionedCaCertValidator {
    /// Trust exactly the given certificates.
    pub fn new(certs: Vec<Certificate>) -> Self {
        Self { certs }
    }

    /// Trust the certificates of a PEM bundle.
    pub fn from_pem(pem: &[u8]) -> Result<Self> {
        let certs = Certificate::load_pem_chain(pem)?;
        if certs.is_empty() {
            return Err(ScepError::config("PEM bundle contains no certificates"));
        }
        Ok(Self { certs })
    }
}

impl CaCertValidator for PreprovisionedCaCertValidator {
    fn is_trusted(&self, cert: &Certificate) -> bool {
        self.certs.iter().any(|c| c == cert)
    }
}

/// Trusts CA certificates whose SHA-1 or SHA-256 fingerprint is known.
///
/// The fingerprint is computed over the DER encoding of the certificate, as
/// printed by `openssl x509 -fingerprint`.
#[derive(Debug, Clone, Default)]
pub struct FingerprintCaCertValidator {
    fingerprints: Vec<(HashAlgorithm, Vec<u8>)>,
}

impl FingerprintCaCertValidator {
    /// Create a validator that trusts nothing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Trust a certificate by its SHA-256 fingerprint.
    pub fn with_sha256(self, fingerprint: &str) -> Result<Self> {
        self.with_fingerprint(HashAlgorithm::Sha256, fingerprint)
    }

    /// Trust a certificate by its SHA-1 fingerprint.
    pub fn with_sha1(self, fingerprint: &str) -> Result<Self> {
        self.with_fingerprint(HashAlgorithm::Sha1, fingerprint)
    }

    fn with_fingerprint(mut self, hash: HashAlgorithm, fingerprint: &str) -> Result<Self> {
        let bytes = parse_fingerprint(fingerprint)?;
        let expected = hash.digest(&[]).len();
        if bytes.len() != expected {
            return Err(ScepError::config(format!(
                "{} fingerprint must be {} bytes, got {}",
                hash,
                expected,
                bytes.len()
            )));
        }
        self.fingerprints.push((hash, bytes));
        Ok(self)
    }

    /// Compute the fingerprint of a certificate.
    pub fn compute_fingerprint(cert: &Certificate, hash: HashAlgorithm) -> Result<Vec<u8>> {
        Ok(hash.digest(&cert.to_der()?))
    }
}

impl CaCertValidator for FingerprintCaCertValidator {
    fn is_trusted(&self, cert: &Certificate) -> bool {
        let der = match cert.to_der() {
            Ok(der) => der,
            Err(e) => {
                tracing::warn!("Cannot encode CA certificate: {}", e);
                return false;
            }
        };

        self.fingerprints
            .iter()
            .any(|(hash, expected)| hash.digest(&der) == *expected)
    }
}

/// Format a fingerprint as colon-separated uppercase hex.
pub fn format_fingerprint(fp: &[u8]) -> String {
    fp.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(":")
}

/// Parse a fingerprint from colon-separated or plain hex.
pub fn parse_fingerprint(s: &str) -> Result<Vec<u8>> {
    let hex: String = s
        .chars()
        .filter(|c| !matches!(c, ':' | ' ' | '-'))
        .collect();
    hex::decode(hex).map_err(|_| ScepError::config("Invalid fingerprint format"))
}
