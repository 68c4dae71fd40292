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

//! SCEP message types and parsing utilities.
//!
//! This module provides the protocol enumerations, capability and
//! authority certificate types, and the PKCS#7/CMS helpers used by the
//! message codec.

mod algorithms;
mod caps;
mod cert_store;
mod ids;
mod message;
pub mod oids;
pub mod pkcs7;

pub use algorithms::{ContentEncryptionAlgorithm, HashAlgorithm};
pub use caps::{CaCapability, CaCaps};
pub use cert_store::{is_ca, key_usage, AuthorityCertStore};
pub(crate) use cert_store::subject_key_identifier;
pub use ids::{Nonce, TransactionId, NONCE_LEN};
pub use message::{DecodedPkiMessage, IssuerAndSubject, MessageData, PkiMessage};

use std::fmt;

use x509_cert::Certificate;

use crate::error::{Result, ScepError};

/// SCEP messageType attribute values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// Response to any request.
    CertRep = 3,
    /// Renewal of a certificate issued by the same CA.
    RenewalReq = 17,
    /// Update with a certificate issued by another CA.
    UpdateReq = 18,
    /// Initial enrolment.
    PkcsReq = 19,
    /// Poll for a pending enrolment.
    CertPoll = 20,
    /// Retrieve a certificate.
    GetCert = 21,
    /// Retrieve a CRL.
    GetCrl = 22,
}

impl MessageType {
    /// Wire value.
    pub fn code(&self) -> u8 {
        *self as u8
    }

    /// Look up a message type by its wire value.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            3 => Some(Self::CertRep),
            17 => Some(Self::RenewalReq),
            18 => Some(Self::UpdateReq),
            19 => Some(Self::PkcsReq),
            20 => Some(Self::CertPoll),
            21 => Some(Self::GetCert),
            22 => Some(Self::GetCrl),
            _ => None,
        }
    }

    /// Returns true for requests that carry a PKCS#10 request.
    pub fn carries_csr(&self) -> bool {
        matches!(self, Self::PkcsReq | Self::RenewalReq | Self::UpdateReq)
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::CertRep => "CertRep",
            Self::RenewalReq => "RenewalReq",
            Self::UpdateReq => "UpdateReq",
            Self::PkcsReq => "PKCSReq",
            Self::CertPoll => "CertPoll",
            Self::GetCert => "GetCert",
            Self::GetCrl => "GetCRL",
        };
        f.write_str(name)
    }
}

/// SCEP pkiStatus attribute values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PkiStatus {
    /// Request granted.
    Success = 0,
    /// Request rejected.
    Failure = 2,
    /// Request awaits manual approval.
    Pending = 3,
}

impl PkiStatus {
    /// Wire value.
    pub fn code(&self) -> u8 {
        *self as u8
    }

    /// Look up a status by its wire value.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Success),
            2 => Some(Self::Failure),
            3 => Some(Self::Pending),
            _ => None,
        }
    }
}

impl fmt::Display for PkiStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Success => "SUCCESS",
            Self::Failure => "FAILURE",
            Self::Pending => "PENDING",
        };
        f.write_str(name)
    }
}

/// SCEP failInfo attribute values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailInfo {
    /// Unrecognized or unsupported algorithm.
    BadAlg = 0,
    /// Integrity check (signature verification) failed.
    BadMessageCheck = 1,
    /// Transaction not permitted or supported.
    BadRequest = 2,
    /// signingTime was not close enough to the server's time.
    BadTime = 3,
    /// No certificate matched the provided criteria.
    BadCertId = 4,
}

impl FailInfo {
    /// Wire value.
    pub fn code(&self) -> u8 {
        *self as u8
    }

    /// Look up a failure reason by its wire value.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::BadAlg),
            1 => Some(Self::BadMessageCheck),
            2 => Some(Self::BadRequest),
            3 => Some(Self::BadTime),
            4 => Some(Self::BadCertId),
            _ => None,
        }
    }
}

impl fmt::Display for FailInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::BadAlg => "badAlg",
            Self::BadMessageCheck => "badMessageCheck",
            Self::BadRequest => "badRequest",
            Self::BadTime => "badTime",
            Self::BadCertId => "badCertId",
        };
        f.write_str(name)
    }
}

/// SCEP HTTP operations (the `operation` query parameter).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Query the CA capabilities.
    GetCaCaps,
    /// Fetch the CA (and RA) certificates.
    GetCaCert,
    /// Fetch the rollover CA certificates.
    GetNextCaCert,
    /// Send a pkiMessage.
    PkiOperation,
}

impl Operation {
    /// Query parameter value.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GetCaCaps => "GetCACaps",
            Self::GetCaCert => "GetCACert",
            Self::GetNextCaCert => "GetNextCACert",
            Self::PkiOperation => "PKIOperation",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of an enrolment or poll request.
///
/// Non-success statuses are data here, not errors: a `PENDING` reply means
/// the caller should poll later with the same transaction ID.
#[derive(Debug, Clone)]
pub struct EnrolmentResponse {
    transaction_id: TransactionId,
    pki_status: PkiStatus,
    fail_info: Option<FailInfo>,
    fail_info_text: Option<String>,
    certificates: Vec<Certificate>,
    message_data: Option<Vec<u8>>,
}

impl EnrolmentResponse {
    /// Interpret a validated CertRep.
    ///
    /// # Errors
    ///
    /// Returns an error if the reply has no status, or a SUCCESS reply does
    /// not carry a parsable certificate chain.
    pub fn from_decoded(response: DecodedPkiMessage) -> Result<Self> {
        let pki_status = response
            .pki_status
            .ok_or_else(|| ScepError::protocol_failure("CertRep without pkiStatus"))?;

        let certificates = match (pki_status, &response.message_data) {
            (PkiStatus::Success, Some(data)) => pkcs7::parse_certs_only(data)?,
            (PkiStatus::Success, None) => {
                return Err(ScepError::malformed_cms("SUCCESS reply without content"))
            }
            _ => Vec::new(),
        };

        Ok(Self {
            transaction_id: response.transaction_id,
            pki_status,
            fail_info: response.fail_info,
            fail_info_text: response.fail_info_text,
            certificates,
            message_data: response.message_data,
        })
    }

    /// Status reported by the CA.
    pub fn pki_status(&self) -> PkiStatus {
        self.pki_status
    }

    /// Returns true if the certificate was issued.
    pub fn is_success(&self) -> bool {
        self.pki_status == PkiStatus::Success
    }

    /// Returns true if the request awaits approval.
    pub fn is_pending(&self) -> bool {
        self.pki_status == PkiStatus::Pending
    }

    /// Returns true if the request was rejected.
    pub fn is_failure(&self) -> bool {
        self.pki_status == PkiStatus::Failure
    }

    /// Transaction ID to use when polling.
    pub fn transaction_id(&self) -> &TransactionId {
        &self.transaction_id
    }

    /// Failure reason of a rejected request.
    pub fn fail_info(&self) -> Option<FailInfo> {
        self.fail_info
    }

    /// Free-form failure text, if the CA sent one.
    pub fn fail_info_text(&self) -> Option<&str> {
        self.fail_info_text.as_deref()
    }

    /// Certificates returned with a SUCCESS reply.
    pub fn certificates(&self) -> &[Certificate] {
        &self.certificates
    }

    /// The decrypted messageData (a degenerate SignedData), if any.
    pub fn message_data(&self) -> Option<&[u8]> {
        self.message_data.as_deref()
    }
}

/// Content types used in SCEP protocol.
pub mod content_types {
    /// GetCACaps response.
    pub const TEXT_PLAIN: &str = "text/plain";

    /// GetCACert response carrying a single CA certificate.
    pub const X509_CA_CERT: &str = "application/x-x509-ca-cert";

    /// GetCACert response carrying CA and RA certificates.
    pub const X509_CA_RA_CERT: &str = "application/x-x509-ca-ra-cert";

    /// GetNextCACert response.
    pub const X509_NEXT_CA_CERT: &str = "application/x-x509-next-ca-cert";

    /// PKIOperation response.
    pub const PKI_MESSAGE: &str = "application/x-pki-message";

    /// PKIOperation POST request body.
    pub const OCTET_STREAM: &str = "application/octet-stream";

    /// Compare content types ignoring case and parameters.
    pub fn matches(actual: &str, expected: &str) -> bool {
        let essence = actual.split(';').next().unwrap_or_default().trim();
        essence.eq_ignore_ascii_case(expected)
    }
}
