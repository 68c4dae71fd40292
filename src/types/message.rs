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

//! SCEP pkiMessage contents, outbound and decoded.

use std::time::SystemTime;

use cms::cert::IssuerAndSerialNumber;
use der::{Encode, Sequence};
use x509_cert::name::Name;
use x509_cert::request::CertReq;
use x509_cert::serial_number::SerialNumber;
use x509_cert::Certificate;

use crate::error::Result;

use super::{
    ContentEncryptionAlgorithm, FailInfo, HashAlgorithm, MessageType, Nonce, PkiStatus,
    TransactionId,
};

/// Issuer and subject names identifying a pending certificate (CertPoll).
///
/// ```text
/// IssuerAndSubject ::= SEQUENCE {
///     issuer     Name,
///     subject    Name }
/// ```
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct IssuerAndSubject {
    /// Issuer name (the CA).
    pub issuer: Name,
    /// Subject name of the requested certificate.
    pub subject: Name,
}

/// The content carried, encrypted, inside a pkiMessage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageData {
    /// PKCS#10 request for PKCSReq, RenewalReq and UpdateReq.
    CertificationRequest(CertReq),
    /// Certificate or CRL issuer and serial for GetCert and GetCRL.
    IssuerAndSerialNumber(IssuerAndSerialNumber),
    /// Names of a pending request for CertPoll.
    IssuerAndSubject(IssuerAndSubject),
    /// Pre-encoded DER, such as the degenerate SignedData of a CertRep.
    Der(Vec<u8>),
}

impl MessageData {
    /// Identify a certificate or CRL by issuer and serial number.
    pub fn issuer_and_serial(issuer: Name, serial_number: SerialNumber) -> Self {
        Self::IssuerAndSerialNumber(IssuerAndSerialNumber {
            issuer,
            serial_number,
        })
    }

    /// Identify a pending request by issuer and subject.
    pub fn issuer_and_subject(issuer: Name, subject: Name) -> Self {
        Self::IssuerAndSubject(IssuerAndSubject { issuer, subject })
    }

    /// DER encoding of the content.
    pub fn to_der(&self) -> Result<Vec<u8>> {
        Ok(match self {
            Self::CertificationRequest(csr) => csr.to_der()?,
            Self::IssuerAndSerialNumber(isn) => isn.to_der()?,
            Self::IssuerAndSubject(ias) => ias.to_der()?,
            Self::Der(der) => der.clone(),
        })
    }
}

/// An outbound SCEP message before encryption and signing.
#[derive(Debug, Clone)]
pub struct PkiMessage {
    /// Transaction the message belongs to.
    pub transaction_id: TransactionId,
    /// Message type.
    pub message_type: MessageType,
    /// Fresh nonce of the sender.
    pub sender_nonce: Nonce,
    /// Nonce being answered (CertRep only).
    pub recipient_nonce: Option<Nonce>,
    /// Status of the request (CertRep only).
    pub pki_status: Option<PkiStatus>,
    /// Failure reason (CertRep with FAILURE only).
    pub fail_info: Option<FailInfo>,
    /// Free-form failure text (CertRep with FAILURE only).
    pub fail_info_text: Option<String>,
    /// Content to encrypt, absent for PENDING and FAILURE replies.
    pub message_data: Option<MessageData>,
}

impl PkiMessage {
    /// Create a message with a fresh sender nonce.
    pub fn new(transaction_id: TransactionId, message_type: MessageType) -> Self {
        Self {
            transaction_id,
            message_type,
            sender_nonce: Nonce::random(),
            recipient_nonce: None,
            pki_status: None,
            fail_info: None,
            fail_info_text: None,
            message_data: None,
        }
    }

    /// Set the message content.
    pub fn with_message_data(mut self, data: MessageData) -> Self {
        self.message_data = Some(data);
        self
    }

    /// Create the CertRep answering `request`.
    pub fn cert_rep(request: &DecodedPkiMessage, status: PkiStatus) -> Self {
        let mut reply = Self::new(request.transaction_id.clone(), MessageType::CertRep);
        reply.recipient_nonce = Some(request.sender_nonce);
        reply.pki_status = Some(status);
        reply
    }
}

/// A SCEP message after signature verification and decryption.
///
/// Crypto-validity problems are reported through the flags rather than as
/// errors so that the caller applies one policy to all of them.
#[derive(Debug, Clone)]
pub struct DecodedPkiMessage {
    /// Transaction the message belongs to.
    pub transaction_id: TransactionId,
    /// Message type.
    pub message_type: MessageType,
    /// Request status (CertRep only).
    pub pki_status: Option<PkiStatus>,
    /// Failure reason.
    pub fail_info: Option<FailInfo>,
    /// Free-form failure text.
    pub fail_info_text: Option<String>,
    /// Nonce of the sender.
    pub sender_nonce: Nonce,
    /// Nonce being answered.
    pub recipient_nonce: Option<Nonce>,
    /// signingTime attribute.
    pub signing_time: Option<SystemTime>,
    /// Certificate that matched the SignerInfo, if any.
    pub signature_cert: Option<Certificate>,
    /// Certificates embedded in the SignedData.
    pub certificates: Vec<Certificate>,
    /// True if the signer was found and the signature verified.
    pub signature_valid: bool,
    /// Digest algorithm of the SignerInfo, if recognised.
    pub digest_algorithm: Option<HashAlgorithm>,
    /// Cipher of the enveloped content, if it was decrypted.
    pub content_encryption: Option<ContentEncryptionAlgorithm>,
    /// `None` when there was no enveloped content to decrypt.
    pub decryption_successful: Option<bool>,
    /// Decrypted content (DER).
    pub message_data: Option<Vec<u8>>,
    /// Set when the message is structurally valid CMS but not a usable SCEP
    /// message.
    pub failure_message: Option<String>,
}
