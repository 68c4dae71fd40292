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

//! RSA crypto provider built on the RustCrypto `rsa` crate.

use ::rsa::pkcs8::DecodePublicKey;
use ::rsa::{Pkcs1v15Encrypt, Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};
use der::{Any, Encode};
use rand::rngs::OsRng;
use sha1::Sha1;
use sha2::{Sha256, Sha384, Sha512};
use spki::{AlgorithmIdentifierOwned, SubjectPublicKeyInfoOwned};
use x509_cert::Certificate;

use crate::error::{Result, ScepError};
use crate::types::{oids, HashAlgorithm};

use super::ScepCrypto;

/// PKCS#1 v1.5 signatures and key transport with software RSA keys.
#[derive(Debug, Clone, Copy, Default)]
pub struct RsaCrypto;

impl RsaCrypto {
    /// Create a new RSA provider.
    pub fn new() -> Self {
        Self
    }

    fn padding(hash: HashAlgorithm) -> Pkcs1v15Sign {
        match hash {
            HashAlgorithm::Sha1 => Pkcs1v15Sign::new::<Sha1>(),
            HashAlgorithm::Sha256 => Pkcs1v15Sign::new::<Sha256>(),
            HashAlgorithm::Sha384 => Pkcs1v15Sign::new::<Sha384>(),
            HashAlgorithm::Sha512 => Pkcs1v15Sign::new::<Sha512>(),
        }
    }

    fn public_key(spki: &SubjectPublicKeyInfoOwned) -> Result<RsaPublicKey> {
        if spki.algorithm.oid != oids::RSA_ENCRYPTION {
            return Err(ScepError::unsupported_algorithm(format!(
                "public key algorithm {} is not RSA",
                spki.algorithm.oid
            )));
        }
        RsaPublicKey::from_public_key_der(&spki.to_der()?)
            .map_err(|e| ScepError::crypto(format!("Invalid RSA public key: {}", e)))
    }
}

impl ScepCrypto for RsaCrypto {
    type PrivateKey = RsaPrivateKey;

    fn signature_algorithm(
        &self,
        _key: &RsaPrivateKey,
        hash: HashAlgorithm,
    ) -> Result<AlgorithmIdentifierOwned> {
        let oid = match hash {
            HashAlgorithm::Sha1 => oids::SHA1_WITH_RSA,
            HashAlgorithm::Sha256 => oids::SHA256_WITH_RSA,
            HashAlgorithm::Sha384 => oids::SHA384_WITH_RSA,
            HashAlgorithm::Sha512 => oids::SHA512_WITH_RSA,
        };
        Ok(AlgorithmIdentifierOwned {
            oid,
            parameters: Some(Any::null()),
        })
    }

    fn sign(&self, key: &RsaPrivateKey, hash: HashAlgorithm, data: &[u8]) -> Result<Vec<u8>> {
        let digest = hash.digest(data);
        key.sign(Self::padding(hash), &digest)
            .map_err(|e| ScepError::crypto(format!("RSA signing failed: {}", e)))
    }

    fn verify(
        &self,
        public_key: &SubjectPublicKeyInfoOwned,
        algorithm: &AlgorithmIdentifierOwned,
        hash: HashAlgorithm,
        data: &[u8],
        signature: &[u8],
    ) -> Result<bool> {
        // rsaEncryption leaves the digest to the digestAlgorithm field
        if algorithm.oid != oids::RSA_ENCRYPTION {
            match HashAlgorithm::from_signature_oid(&algorithm.oid) {
                Some(implied) if implied == hash => {}
                Some(implied) => {
                    tracing::debug!(
                        "signature algorithm digest {} does not match {}",
                        implied,
                        hash
                    );
                    return Ok(false);
                }
                None => {
                    return Err(ScepError::unsupported_algorithm(format!(
                        "signature algorithm {}",
                        algorithm.oid
                    )))
                }
            }
        }

        let public_key = Self::public_key(public_key)?;
        let digest = hash.digest(data);
        Ok(public_key
            .verify(Self::padding(hash), &digest, signature)
            .is_ok())
    }

    fn encrypt_key(
        &self,
        recipient: &Certificate,
        content_key: &[u8],
    ) -> Result<(AlgorithmIdentifierOwned, Vec<u8>)> {
        let public_key = Self::public_key(&recipient.tbs_certificate.subject_public_key_info)?;
        let encrypted = public_key
            .encrypt(&mut OsRng, Pkcs1v15Encrypt, content_key)
            .map_err(|e| ScepError::crypto(format!("RSA key transport failed: {}", e)))?;

        let algorithm = AlgorithmIdentifierOwned {
            oid: oids::RSA_ENCRYPTION,
            parameters: Some(Any::null()),
        };
        Ok((algorithm, encrypted))
    }

    fn decrypt_key(
        &self,
        key: &RsaPrivateKey,
        algorithm: &AlgorithmIdentifierOwned,
        encrypted_key: &[u8],
    ) -> Result<Vec<u8>> {
        if algorithm.oid != oids::RSA_ENCRYPTION {
            return Err(ScepError::unsupported_algorithm(format!(
                "key encryption algorithm {}",
                algorithm.oid
            )));
        }
        key.decrypt(Pkcs1v15Encrypt, encrypted_key)
            .map_err(|e| ScepError::crypto(format!("RSA key recovery failed: {}", e)))
    }
}
