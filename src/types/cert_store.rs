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

//! Authority certificates: the CA certificate and optional RA certificates.
//!
//! When a CA delegates message handling to a Registration Authority, the RA
//! signs responses and receives the encrypted requests. Either role may be
//! served by a distinct RA certificate, chosen by key usage.

use const_oid::AssociatedOid;
use der::Decode;
use x509_cert::ext::pkix::{BasicConstraints, KeyUsage, KeyUsages, SubjectKeyIdentifier};
use x509_cert::Certificate;

use crate::crypto::ScepCrypto;
use crate::error::{Result, ScepError};

/// CA certificate plus the certificates that sign and decrypt SCEP messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorityCertStore {
    /// The CA handles messages itself.
    CaOnly {
        /// The CA certificate.
        ca_cert: Certificate,
    },
    /// An RA handles messages on behalf of the CA.
    CaWithRa {
        /// The CA certificate.
        ca_cert: Certificate,
        /// RA certificate that signs responses.
        signature_cert: Certificate,
        /// RA certificate that requests are encrypted for.
        encryption_cert: Certificate,
    },
}

impl AuthorityCertStore {
    /// A store for a CA without RA.
    pub fn ca_only(ca_cert: Certificate) -> Self {
        Self::CaOnly { ca_cert }
    }

    /// A store for a CA with RA certificates.
    ///
    /// The signing RA certificate is the one with the `digitalSignature` key
    /// usage, the encryption RA certificate the one with `keyEncipherment` or
    /// `dataEncipherment`. A certificate without a key usage extension may
    /// serve both roles, as does a lone RA certificate. Every RA certificate
    /// must be issued by the CA.
    ///
    /// # Errors
    ///
    /// Returns [`ScepError::InvalidCaResponse`] if no RA certificate fits a
    /// role or an RA certificate is not issued by the CA.
    pub fn with_ra<C: ScepCrypto + ?Sized>(
        crypto: &C,
        ca_cert: Certificate,
        ra_certs: Vec<Certificate>,
    ) -> Result<Self> {
        if ra_certs.is_empty() {
            return Err(ScepError::invalid_ca_response("no RA certificate supplied"));
        }

        for ra in &ra_certs {
            if !crypto.is_issued_by(ra, &ca_cert)? {
                return Err(ScepError::invalid_ca_response(format!(
                    "RA certificate '{}' is not issued by the CA '{}'",
                    ra.tbs_certificate.subject, ca_cert.tbs_certificate.subject
                )));
            }
        }

        if let [ra] = ra_certs.as_slice() {
            return Ok(Self::CaWithRa {
                ca_cert,
                signature_cert: ra.clone(),
                encryption_cert: ra.clone(),
            });
        }

        let signature_cert = select_ra(&ra_certs, &[KeyUsages::DigitalSignature])
            .ok_or_else(|| ScepError::invalid_ca_response("no RA certificate for signing"))?;
        let encryption_cert = select_ra(
            &ra_certs,
            &[KeyUsages::KeyEncipherment, KeyUsages::DataEncipherment],
        )
        .ok_or_else(|| ScepError::invalid_ca_response("no RA certificate for encryption"))?;

        Ok(Self::CaWithRa {
            ca_cert,
            signature_cert,
            encryption_cert,
        })
    }

    /// Build a store from the certificates of a `GetCACert` (or
    /// `GetNextCACert`) degenerate SignedData.
    ///
    /// A single CA certificate makes a CA-only store. Otherwise exactly one of
    /// the certificates must be a CA certificate and the rest are RA
    /// certificates.
    pub fn from_certificates<C: ScepCrypto + ?Sized>(
        crypto: &C,
        certs: Vec<Certificate>,
    ) -> Result<Self> {
        let (mut cas, ras): (Vec<_>, Vec<_>) = certs.into_iter().partition(is_ca);

        if cas.len() != 1 {
            return Err(ScepError::invalid_ca_response(format!(
                "expected exactly one CA certificate, got {}",
                cas.len()
            )));
        }
        let ca_cert = cas.remove(0);

        if ras.is_empty() {
            Ok(Self::ca_only(ca_cert))
        } else {
            Self::with_ra(crypto, ca_cert, ras)
        }
    }

    /// The CA certificate.
    pub fn ca_cert(&self) -> &Certificate {
        match self {
            Self::CaOnly { ca_cert } | Self::CaWithRa { ca_cert, .. } => ca_cert,
        }
    }

    /// Certificate expected to sign responses.
    pub fn signature_cert(&self) -> &Certificate {
        match self {
            Self::CaOnly { ca_cert } => ca_cert,
            Self::CaWithRa { signature_cert, .. } => signature_cert,
        }
    }

    /// Certificate requests are encrypted for.
    pub fn encryption_cert(&self) -> &Certificate {
        match self {
            Self::CaOnly { ca_cert } => ca_cert,
            Self::CaWithRa {
                encryption_cert, ..
            } => encryption_cert,
        }
    }

    /// Returns true if an RA handles messages for the CA.
    pub fn has_ra(&self) -> bool {
        matches!(self, Self::CaWithRa { .. })
    }
}

fn select_ra(ra_certs: &[Certificate], usages: &[KeyUsages]) -> Option<Certificate> {
    let with_usage = ra_certs.iter().find(|cert| match key_usage(cert) {
        Some(ku) => usages.iter().any(|u| ku.0.contains(*u)),
        None => false,
    });

    with_usage
        .or_else(|| ra_certs.iter().find(|cert| key_usage(cert).is_none()))
        .cloned()
}

/// Returns true if the certificate has BasicConstraints with cA set.
pub fn is_ca(cert: &Certificate) -> bool {
    find_extension::<BasicConstraints>(cert)
        .map(|bc| bc.ca)
        .unwrap_or(false)
}

/// The certificate's KeyUsage extension, if present and well-formed.
pub fn key_usage(cert: &Certificate) -> Option<KeyUsage> {
    find_extension::<KeyUsage>(cert)
}

pub(crate) fn subject_key_identifier(cert: &Certificate) -> Option<SubjectKeyIdentifier> {
    find_extension::<SubjectKeyIdentifier>(cert)
}

fn find_extension<T>(cert: &Certificate) -> Option<T>
where
    T: AssociatedOid + for<'a> Decode<'a>,
{
    let extensions = cert.tbs_certificate.extensions.as_ref()?;
    let ext = extensions.iter().find(|ext| ext.extn_id == T::OID)?;

    match T::from_der(ext.extn_value.as_bytes()) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!("Ignoring malformed {} extension: {}", T::OID, e);
            None
        }
    }
}
