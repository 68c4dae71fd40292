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

//! Public key operations used by the SCEP message codec.
//!
//! The codec builds and parses the CMS structures itself and delegates every
//! asymmetric operation to a [`ScepCrypto`] provider: signing with the
//! identity key, verifying the authority signature, and transporting the
//! content encryption key to and from the recipient.
//!
//! [`RsaCrypto`] is the built-in provider. SCEP deployments are RSA-only in
//! practice because the key transport step needs an encryption-capable key.
//!
//! # Example
//!
//! ```no_run
//! use scep_client::crypto::{RsaCrypto, ScepCrypto};
//! use scep_client::types::HashAlgorithm;
//! use rsa::pkcs8::DecodePrivateKey;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let key = rsa::RsaPrivateKey::from_pkcs8_pem(&std::fs::read_to_string("key.pem")?)?;
//! let crypto = RsaCrypto::new();
//!
//! let signature = crypto.sign(&key, HashAlgorithm::Sha256, b"data to sign")?;
//! # Ok(())
//! # }
//! ```

mod rsa;

pub use self::rsa::RsaCrypto;

use der::Encode;
use spki::{AlgorithmIdentifierOwned, SubjectPublicKeyInfoOwned};
use x509_cert::Certificate;

use crate::error::{Result, ScepError};
use crate::types::HashAlgorithm;

/// Asymmetric operations needed to build and open SCEP messages.
pub trait ScepCrypto: Send + Sync {
    /// Private key type accepted by this provider.
    type PrivateKey: Send + Sync;

    /// AlgorithmIdentifier describing signatures made by `key` with `hash`.
    fn signature_algorithm(
        &self,
        key: &Self::PrivateKey,
        hash: HashAlgorithm,
    ) -> Result<AlgorithmIdentifierOwned>;

    /// Sign `data` with `key`, digesting it with `hash` first.
    fn sign(&self, key: &Self::PrivateKey, hash: HashAlgorithm, data: &[u8]) -> Result<Vec<u8>>;

    /// Verify `signature` over `data` with the given public key.
    ///
    /// `hash` is the digest algorithm that was applied to `data`. Returns
    /// `Ok(false)` for a well-formed signature that does not verify.
    fn verify(
        &self,
        public_key: &SubjectPublicKeyInfoOwned,
        algorithm: &AlgorithmIdentifierOwned,
        hash: HashAlgorithm,
        data: &[u8],
        signature: &[u8],
    ) -> Result<bool>;

    /// Encrypt a content encryption key for `recipient`.
    ///
    /// Returns the key encryption AlgorithmIdentifier and the encrypted key.
    fn encrypt_key(
        &self,
        recipient: &Certificate,
        content_key: &[u8],
    ) -> Result<(AlgorithmIdentifierOwned, Vec<u8>)>;

    /// Recover a content encryption key with the recipient private key.
    fn decrypt_key(
        &self,
        key: &Self::PrivateKey,
        algorithm: &AlgorithmIdentifierOwned,
        encrypted_key: &[u8],
    ) -> Result<Vec<u8>>;

    /// Returns true if `cert` names `issuer` as its issuer and its signature
    /// verifies under the issuer's public key.
    ///
    /// A signature algorithm the provider cannot verify counts as not issued.
    fn is_issued_by(&self, cert: &Certificate, issuer: &Certificate) -> Result<bool> {
        if cert.tbs_certificate.issuer != issuer.tbs_certificate.subject {
            return Ok(false);
        }

        let algorithm = &cert.signature_algorithm;
        let Some(hash) = HashAlgorithm::from_signature_oid(&algorithm.oid) else {
            tracing::debug!(
                oid = %algorithm.oid,
                "cannot verify certificate signature algorithm"
            );
            return Ok(false);
        };
        let tbs = cert.tbs_certificate.to_der()?;
        let signature = cert
            .signature
            .as_bytes()
            .ok_or_else(|| ScepError::crypto("certificate signature has unused bits"))?;

        self.verify(
            &issuer.tbs_certificate.subject_public_key_info,
            algorithm,
            hash,
            &tbs,
            signature,
        )
    }

    /// Returns true if `cert` is self-signed.
    fn is_self_signed(&self, cert: &Certificate) -> Result<bool> {
        self.is_issued_by(cert, cert)
    }
}
