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

//! Digest and content encryption algorithms negotiated with the CA.

use const_oid::ObjectIdentifier;
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha384, Sha512};
use spki::AlgorithmIdentifierOwned;

use super::oids;

/// Digest algorithms used for message digests and signatures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashAlgorithm {
    /// SHA-1
    Sha1,
    /// SHA-256
    Sha256,
    /// SHA-384 (accepted on inbound certificates only)
    Sha384,
    /// SHA-512
    Sha512,
}

impl HashAlgorithm {
    /// Digest algorithm OID.
    pub fn oid(&self) -> ObjectIdentifier {
        match self {
            Self::Sha1 => oids::SHA1,
            Self::Sha256 => oids::SHA256,
            Self::Sha384 => oids::SHA384,
            Self::Sha512 => oids::SHA512,
        }
    }

    /// Look up a digest algorithm by its OID.
    pub fn from_oid(oid: &ObjectIdentifier) -> Option<Self> {
        match *oid {
            oids::SHA1 => Some(Self::Sha1),
            oids::SHA256 => Some(Self::Sha256),
            oids::SHA384 => Some(Self::Sha384),
            oids::SHA512 => Some(Self::Sha512),
            _ => None,
        }
    }

    /// Digest algorithm implied by an RSA signature algorithm OID.
    pub fn from_signature_oid(oid: &ObjectIdentifier) -> Option<Self> {
        match *oid {
            oids::SHA1_WITH_RSA => Some(Self::Sha1),
            oids::SHA256_WITH_RSA => Some(Self::Sha256),
            oids::SHA384_WITH_RSA => Some(Self::Sha384),
            oids::SHA512_WITH_RSA => Some(Self::Sha512),
            _ => None,
        }
    }

    /// AlgorithmIdentifier for the digestAlgorithm fields (parameters absent).
    pub fn algorithm_identifier(&self) -> AlgorithmIdentifierOwned {
        AlgorithmIdentifierOwned {
            oid: self.oid(),
            parameters: None,
        }
    }

    /// Compute the digest of `data`.
    pub fn digest(&self, data: &[u8]) -> Vec<u8> {
        match self {
            Self::Sha1 => Sha1::digest(data).to_vec(),
            Self::Sha256 => Sha256::digest(data).to_vec(),
            Self::Sha384 => Sha384::digest(data).to_vec(),
            Self::Sha512 => Sha512::digest(data).to_vec(),
        }
    }

    /// Get the algorithm name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sha1 => "SHA-1",
            Self::Sha256 => "SHA-256",
            Self::Sha384 => "SHA-384",
            Self::Sha512 => "SHA-512",
        }
    }
}

impl std::fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Content encryption algorithms for the EnvelopedData layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentEncryptionAlgorithm {
    /// AES-128-CBC
    Aes128Cbc,
    /// AES-192-CBC (decryption only)
    Aes192Cbc,
    /// AES-256-CBC (decryption only)
    Aes256Cbc,
    /// DES-EDE3-CBC
    DesEde3Cbc,
    /// DES-CBC, only used when insecure algorithms are allowed
    DesCbc,
}

impl ContentEncryptionAlgorithm {
    /// Get the key size in bytes.
    pub fn key_size(&self) -> usize {
        match self {
            Self::Aes128Cbc => 16,
            Self::Aes192Cbc => 24,
            Self::Aes256Cbc => 32,
            Self::DesEde3Cbc => 24,
            Self::DesCbc => 8,
        }
    }

    /// Get the block (and IV) size in bytes.
    pub fn block_size(&self) -> usize {
        match self {
            Self::Aes128Cbc | Self::Aes192Cbc | Self::Aes256Cbc => 16,
            Self::DesEde3Cbc | Self::DesCbc => 8,
        }
    }

    /// Algorithm OID.
    pub fn oid(&self) -> ObjectIdentifier {
        match self {
            Self::Aes128Cbc => oids::AES_128_CBC,
            Self::Aes192Cbc => oids::AES_192_CBC,
            Self::Aes256Cbc => oids::AES_256_CBC,
            Self::DesEde3Cbc => oids::DES_EDE3_CBC,
            Self::DesCbc => oids::DES_CBC,
        }
    }

    /// Look up a content encryption algorithm by its OID.
    pub fn from_oid(oid: &ObjectIdentifier) -> Option<Self> {
        match *oid {
            oids::AES_128_CBC => Some(Self::Aes128Cbc),
            oids::AES_192_CBC => Some(Self::Aes192Cbc),
            oids::AES_256_CBC => Some(Self::Aes256Cbc),
            oids::DES_EDE3_CBC => Some(Self::DesEde3Cbc),
            oids::DES_CBC => Some(Self::DesCbc),
            _ => None,
        }
    }

    /// Get the algorithm name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Aes128Cbc => "AES-128-CBC",
            Self::Aes192Cbc => "AES-192-CBC",
            Self::Aes256Cbc => "AES-256-CBC",
            Self::DesEde3Cbc => "DES-EDE3-CBC",
            Self::DesCbc => "DES-CBC",
        }
    }
}

impl std::fmt::Display for ContentEncryptionAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
