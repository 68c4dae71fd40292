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

//! SCEP pkiMessage encoding and decoding.
//!
//! A pkiMessage is a CMS SignedData whose content is an EnvelopedData:
//!
//! ```text
//! ContentInfo(SignedData {
//!     eContent = ContentInfo(EnvelopedData { messageData }),
//!     signedAttrs = { contentType, signingTime, messageDigest,
//!                     transactionID, messageType, senderNonce, ... },
//! })
//! ```
//!
//! Decoding never fails on signature or decryption problems. They are
//! reported through [`DecodedPkiMessage::signature_valid`] and
//! [`DecodedPkiMessage::decryption_successful`] so that the client applies
//! a single validation policy.

use std::time::SystemTime;

use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockCipher, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use cms::cert::{CertificateChoices, IssuerAndSerialNumber};
use cms::content_info::{CmsVersion, ContentInfo};
use cms::signed_data::{
    CertificateSet, EncapsulatedContentInfo, SignedData, SignerIdentifier, SignerInfo,
    SignerInfos,
};
use const_oid::ObjectIdentifier;
use der::asn1::{OctetString, PrintableStringRef, SetOfVec, UtcTime};
use der::{
    Any, AnyRef, Choice, Decode, Encode, Reader, Sequence, SliceReader, Tag, TagNumber, Tagged,
};
use rand::rngs::OsRng;
use rand::RngCore;
use spki::AlgorithmIdentifierOwned;
use x509_cert::attr::Attribute;
use x509_cert::time::Time;
use x509_cert::Certificate;

use crate::crypto::ScepCrypto;
use crate::error::{Result, ScepError};
use crate::types::{
    oids, pkcs7, ContentEncryptionAlgorithm, DecodedPkiMessage, FailInfo, HashAlgorithm,
    MessageType, Nonce, PkiMessage, PkiStatus, TransactionId,
};

/// How the outer SignedData is signed.
#[derive(Debug, Clone, Copy)]
pub struct SignerOptions<'a> {
    /// Certificate of the signing key, embedded in the SignedData.
    pub cert: &'a Certificate,
    /// Further certificates to embed (for example the signer's chain).
    pub chain: &'a [Certificate],
    /// Digest algorithm.
    pub hash: HashAlgorithm,
    /// signingTime attribute, the current time when `None`.
    pub signing_time: Option<SystemTime>,
}

impl<'a> SignerOptions<'a> {
    /// Sign with `cert` using `hash` at the current time.
    pub fn new(cert: &'a Certificate, hash: HashAlgorithm) -> Self {
        Self {
            cert,
            chain: &[],
            hash,
            signing_time: None,
        }
    }
}

/// Encrypt `message` for `recipient` and sign it.
///
/// The messageData, when present, is encrypted with a fresh `cipher` key that
/// is transported to `recipient`. Messages without messageData (CertRep with
/// PENDING or FAILURE) carry no content.
pub fn encode_pki_message<C: ScepCrypto + ?Sized>(
    crypto: &C,
    message: &PkiMessage,
    signer_key: &C::PrivateKey,
    signer: &SignerOptions<'_>,
    recipient: &Certificate,
    cipher: ContentEncryptionAlgorithm,
) -> Result<Vec<u8>> {
    let envelope = match &message.message_data {
        Some(data) => Some(seal_envelope(crypto, &data.to_der()?, recipient, cipher)?),
        None => None,
    };

    let mut attributes = vec![
        attribute(
            oids::SCEP_TRANSACTION_ID,
            printable(message.transaction_id.as_str())?,
        )?,
        attribute(
            oids::SCEP_MESSAGE_TYPE,
            printable(&message.message_type.code().to_string())?,
        )?,
        attribute(
            oids::SCEP_SENDER_NONCE,
            octets(message.sender_nonce.as_bytes())?,
        )?,
    ];
    if let Some(nonce) = &message.recipient_nonce {
        attributes.push(attribute(
            oids::SCEP_RECIPIENT_NONCE,
            octets(nonce.as_bytes())?,
        )?);
    }
    if let Some(status) = message.pki_status {
        attributes.push(attribute(
            oids::SCEP_PKI_STATUS,
            printable(&status.code().to_string())?,
        )?);
    }
    if let Some(fail_info) = message.fail_info {
        attributes.push(attribute(
            oids::SCEP_FAIL_INFO,
            printable(&fail_info.code().to_string())?,
        )?);
    }
    if let Some(text) = &message.fail_info_text {
        attributes.push(attribute(
            oids::SCEP_FAIL_INFO_TEXT,
            Any::new(Tag::Utf8String, text.as_bytes().to_vec())?,
        )?);
    }

    tracing::trace!(
        message_type = %message.message_type,
        transaction_id = %message.transaction_id,
        "encoding pkiMessage"
    );

    sign_content(crypto, envelope, signer_key, signer, attributes)
}

/// Verify and decrypt a pkiMessage.
///
/// `signer_certs` are the certificates the message may be signed by. A
/// signer outside this list leaves `signature_valid` false.
///
/// # Errors
///
/// Returns [`ScepError::MalformedCms`] if the message is not a SignedData
/// with exactly one SignerInfo, or lacks the transactionID, messageType or
/// senderNonce attributes.
pub fn decode_pki_message<C: ScepCrypto + ?Sized>(
    crypto: &C,
    message: &[u8],
    recipient_key: &C::PrivateKey,
    recipient_cert: &Certificate,
    signer_certs: &[Certificate],
) -> Result<DecodedPkiMessage> {
    let verified = verify_signed_data(crypto, message, signer_certs)?;
    let attrs = &verified.attributes;

    let transaction_id = TransactionId::new(
        attrs
            .string(oids::SCEP_TRANSACTION_ID)?
            .ok_or_else(|| ScepError::malformed_cms("missing transactionID attribute"))?,
    )
    .map_err(|e| ScepError::malformed_cms(format!("invalid transactionID: {}", e)))?;

    let message_type = attrs
        .number(oids::SCEP_MESSAGE_TYPE)?
        .ok_or_else(|| ScepError::malformed_cms("missing messageType attribute"))?;
    let message_type = MessageType::from_code(message_type).ok_or_else(|| {
        ScepError::malformed_cms(format!("unknown messageType {}", message_type))
    })?;

    let sender_nonce = attrs
        .octets(oids::SCEP_SENDER_NONCE)?
        .ok_or_else(|| ScepError::malformed_cms("missing senderNonce attribute"))?;
    let sender_nonce = Nonce::from_slice(&sender_nonce)?;

    // A recipientNonce of the wrong size cannot echo any senderNonce
    let recipient_nonce = match attrs.octets(oids::SCEP_RECIPIENT_NONCE)? {
        Some(bytes) => Nonce::from_slice(&bytes)
            .map_err(|e| tracing::debug!("ignoring recipientNonce: {}", e))
            .ok(),
        None => None,
    };

    let mut failure_message = None;

    let pki_status = match attrs.number(oids::SCEP_PKI_STATUS)? {
        Some(code) => match PkiStatus::from_code(code) {
            Some(status) => Some(status),
            None => {
                failure_message = Some(format!("unknown pkiStatus {}", code));
                None
            }
        },
        None => None,
    };

    let fail_info = match attrs.number(oids::SCEP_FAIL_INFO)? {
        Some(code) => match FailInfo::from_code(code) {
            Some(info) => Some(info),
            None => {
                failure_message = Some(format!("unknown failInfo {}", code));
                None
            }
        },
        None => None,
    };
    let fail_info_text = attrs.string(oids::SCEP_FAIL_INFO_TEXT)?;

    if failure_message.is_none() && message_type == MessageType::CertRep {
        match pki_status {
            None => failure_message = Some("CertRep without pkiStatus".to_string()),
            Some(PkiStatus::Failure) if fail_info.is_none() => {
                failure_message = Some("FAILURE reply without failInfo".to_string())
            }
            Some(PkiStatus::Success) if verified.content.is_none() => {
                failure_message = Some("SUCCESS reply without content".to_string())
            }
            _ => {}
        }
    }

    let (message_data, content_encryption, decryption_successful) = match &verified.content {
        None => (None, None, None),
        Some(envelope) => match open_envelope(crypto, envelope, recipient_key, recipient_cert) {
            Ok((data, cipher)) => (Some(data), Some(cipher), Some(true)),
            Err(e) => {
                tracing::debug!("could not open enveloped content: {}", e);
                (None, None, Some(false))
            }
        },
    };

    Ok(DecodedPkiMessage {
        transaction_id,
        message_type,
        pki_status,
        fail_info,
        fail_info_text,
        sender_nonce,
        recipient_nonce,
        signing_time: verified.signing_time,
        signature_cert: verified.signature_cert,
        certificates: verified.certificates,
        signature_valid: verified.signature_valid,
        digest_algorithm: verified.digest_algorithm,
        content_encryption,
        decryption_successful,
        message_data,
        failure_message,
    })
}

/// A `GetNextCACert` response after signature verification.
#[derive(Debug, Clone)]
pub struct DecodedNextCaMessage {
    /// signingTime attribute.
    pub signing_time: Option<SystemTime>,
    /// Certificate that matched the SignerInfo, if any.
    pub signature_cert: Option<Certificate>,
    /// True if the signer was found and the signature verified.
    pub signature_valid: bool,
    /// Certificates of the next CA (and its RAs).
    pub certificates: Vec<Certificate>,
    /// Set when the signed content is missing.
    pub failure_message: Option<String>,
}

/// Sign a degenerate SignedData holding the next CA certificates.
pub fn encode_next_ca_message<C: ScepCrypto + ?Sized>(
    crypto: &C,
    certificates: &[Certificate],
    signer_key: &C::PrivateKey,
    signer: &SignerOptions<'_>,
) -> Result<Vec<u8>> {
    let content = pkcs7::build_certs_only(certificates, &[])?;
    sign_content(crypto, Some(content), signer_key, signer, Vec::new())
}

/// Verify a `GetNextCACert` response signed by one of `signer_certs`.
pub fn decode_next_ca_message<C: ScepCrypto + ?Sized>(
    crypto: &C,
    message: &[u8],
    signer_certs: &[Certificate],
) -> Result<DecodedNextCaMessage> {
    let verified = verify_signed_data(crypto, message, signer_certs)?;

    let (certificates, failure_message) = match &verified.content {
        Some(content) => (pkcs7::parse_certs_only(content)?, None),
        None => (
            Vec::new(),
            Some("GetNextCACert response without content".to_string()),
        ),
    };

    Ok(DecodedNextCaMessage {
        signing_time: verified.signing_time,
        signature_cert: verified.signature_cert,
        signature_valid: verified.signature_valid,
        certificates,
        failure_message,
    })
}

// ============================================================================
// SignedData
// ============================================================================

fn sign_content<C: ScepCrypto + ?Sized>(
    crypto: &C,
    content: Option<Vec<u8>>,
    signer_key: &C::PrivateKey,
    signer: &SignerOptions<'_>,
    scep_attributes: Vec<Attribute>,
) -> Result<Vec<u8>> {
    let signing_time = signer.signing_time.unwrap_or_else(SystemTime::now);
    let digest = signer.hash.digest(content.as_deref().unwrap_or_default());

    let mut attributes = vec![
        attribute(oids::CONTENT_TYPE, Any::encode_from(&oids::ID_DATA)?)?,
        attribute(
            oids::SIGNING_TIME,
            Any::encode_from(&Time::UtcTime(UtcTime::from_system_time(signing_time)?))?,
        )?,
        attribute(oids::MESSAGE_DIGEST, octets(&digest)?)?,
    ];
    attributes.extend(scep_attributes);
    let signed_attrs = SetOfVec::try_from(attributes)?;

    // The signature covers the DER SET OF encoding of the attributes
    let signature = crypto.sign(signer_key, signer.hash, &signed_attrs.to_der()?)?;

    let signer_info = SignerInfo {
        version: CmsVersion::V1,
        sid: SignerIdentifier::IssuerAndSerialNumber(issuer_and_serial(signer.cert)),
        digest_alg: signer.hash.algorithm_identifier(),
        signed_attrs: Some(signed_attrs),
        signature_algorithm: crypto.signature_algorithm(signer_key, signer.hash)?,
        signature: OctetString::new(signature)?,
        unsigned_attrs: None,
    };

    let mut certificates = vec![CertificateChoices::Certificate(signer.cert.clone())];
    for cert in signer.chain.iter().filter(|c| *c != signer.cert) {
        certificates.push(CertificateChoices::Certificate(cert.clone()));
    }

    let signed_data = SignedData {
        version: CmsVersion::V1,
        digest_algorithms: SetOfVec::try_from(vec![signer.hash.algorithm_identifier()])?,
        encap_content_info: EncapsulatedContentInfo {
            econtent_type: oids::ID_DATA,
            econtent: content
                .map(|c| Any::new(Tag::OctetString, c))
                .transpose()?,
        },
        certificates: Some(CertificateSet(SetOfVec::try_from(certificates)?)),
        crls: None,
        signer_infos: SignerInfos(SetOfVec::try_from(vec![signer_info])?),
    };

    let content_info = ContentInfo {
        content_type: oids::ID_SIGNED_DATA,
        content: Any::encode_from(&signed_data)?,
    };

    Ok(content_info.to_der()?)
}

struct VerifiedSignedData {
    attributes: SignedAttributes,
    signing_time: Option<SystemTime>,
    signature_cert: Option<Certificate>,
    signature_valid: bool,
    digest_algorithm: Option<HashAlgorithm>,
    certificates: Vec<Certificate>,
    content: Option<Vec<u8>>,
}

fn verify_signed_data<C: ScepCrypto + ?Sized>(
    crypto: &C,
    message: &[u8],
    signer_certs: &[Certificate],
) -> Result<VerifiedSignedData> {
    let signed_data = pkcs7::parse_signed_data(message)?;
    let signer_infos = &signed_data.signer_infos.0;
    if signer_infos.len() != 1 {
        return Err(ScepError::malformed_cms(format!(
            "expected exactly one SignerInfo, got {}",
            signer_infos.len()
        )));
    }
    let signer_info = signer_infos
        .iter()
        .next()
        .ok_or_else(|| ScepError::malformed_cms("missing SignerInfo"))?;

    let content = match &signed_data.encap_content_info.econtent {
        Some(econtent) if econtent.tag() == Tag::OctetString => Some(econtent.value().to_vec()),
        Some(econtent) => {
            return Err(ScepError::malformed_cms(format!(
                "unexpected eContent tag {}",
                econtent.tag()
            )))
        }
        None => None,
    };

    let signed_attrs = signer_info
        .signed_attrs
        .as_ref()
        .ok_or_else(|| ScepError::malformed_cms("SignerInfo without signed attributes"))?;
    let attributes = SignedAttributes(signed_attrs.iter().cloned().collect());

    let signing_time = attributes.time(oids::SIGNING_TIME)?;

    let signature_cert = signer_certs
        .iter()
        .find(|cert| signer_matches(&signer_info.sid, cert))
        .cloned();

    let signature_valid = match &signature_cert {
        Some(cert) => {
            let encoded_attrs = encoded_signed_attributes(message)?;
            check_signature(
                crypto,
                signer_info,
                &attributes,
                &encoded_attrs,
                content.as_deref(),
                cert,
            )?
        }
        None => {
            tracing::debug!("SignerInfo does not match any expected signer certificate");
            false
        }
    };

    Ok(VerifiedSignedData {
        attributes,
        signing_time,
        signature_cert,
        signature_valid,
        digest_algorithm: HashAlgorithm::from_oid(&signer_info.digest_alg.oid),
        certificates: pkcs7::extract_certificates(&signed_data)?,
        content,
    })
}

fn check_signature<C: ScepCrypto + ?Sized>(
    crypto: &C,
    signer_info: &SignerInfo,
    attributes: &SignedAttributes,
    encoded_attrs: &[u8],
    content: Option<&[u8]>,
    cert: &Certificate,
) -> Result<bool> {
    let Some(hash) = HashAlgorithm::from_oid(&signer_info.digest_alg.oid) else {
        tracing::warn!(
            "unsupported digest algorithm {}",
            signer_info.digest_alg.oid
        );
        return Ok(false);
    };

    let Some(expected) = attributes.octets(oids::MESSAGE_DIGEST)? else {
        tracing::debug!("SignerInfo without messageDigest attribute");
        return Ok(false);
    };
    if hash.digest(content.unwrap_or_default()) != expected {
        tracing::debug!("messageDigest does not match the content");
        return Ok(false);
    }

    match crypto.verify(
        &cert.tbs_certificate.subject_public_key_info,
        &signer_info.signature_algorithm,
        hash,
        encoded_attrs,
        signer_info.signature.as_bytes(),
    ) {
        Ok(valid) => Ok(valid),
        Err(e) => {
            tracing::debug!("signature verification error: {}", e);
            Ok(false)
        }
    }
}

/// The signed attributes of the single SignerInfo exactly as received,
/// retagged from `[0] IMPLICIT` to SET OF.
///
/// Decoding the attributes into a `SetOfVec` sorts them, so re-encoding is
/// not enough for signers that emit them in insertion order.
fn encoded_signed_attributes(message: &[u8]) -> Result<Vec<u8>> {
    let content_info = ContentInfo::from_der(message)?;

    // version, digestAlgorithms, encapContentInfo, [0] certificates,
    // [1] crls, signerInfos
    let mut reader = SliceReader::new(content_info.content.value())?;
    let mut signer_infos = None;
    while !reader.is_finished() {
        signer_infos = Some(AnyRef::decode(&mut reader)?);
    }
    let signer_infos = signer_infos
        .filter(|field| field.tag() == Tag::Set)
        .ok_or_else(|| ScepError::malformed_cms("SignedData without signerInfos"))?;

    let mut reader = SliceReader::new(signer_infos.value())?;
    let signer_info = AnyRef::decode(&mut reader)?;

    // version, sid, digestAlgorithm, [0] signedAttrs
    let mut reader = SliceReader::new(signer_info.value())?;
    for _ in 0..3 {
        AnyRef::decode(&mut reader)?;
    }
    let signed_attrs = AnyRef::decode(&mut reader)?;
    if signed_attrs.tag() != SIGNED_ATTRS_TAG {
        return Err(ScepError::malformed_cms("SignerInfo without signed attributes"));
    }

    Ok(AnyRef::new(Tag::Set, signed_attrs.value())?.to_der()?)
}

const SIGNED_ATTRS_TAG: Tag = Tag::ContextSpecific {
    constructed: true,
    number: TagNumber::N0,
};

fn signer_matches(sid: &SignerIdentifier, cert: &Certificate) -> bool {
    match sid {
        SignerIdentifier::IssuerAndSerialNumber(isn) => {
            isn.issuer == cert.tbs_certificate.issuer
                && isn.serial_number == cert.tbs_certificate.serial_number
        }
        SignerIdentifier::SubjectKeyIdentifier(ski) => {
            crate::types::subject_key_identifier(cert).as_ref() == Some(ski)
        }
    }
}

fn issuer_and_serial(cert: &Certificate) -> IssuerAndSerialNumber {
    IssuerAndSerialNumber {
        issuer: cert.tbs_certificate.issuer.clone(),
        serial_number: cert.tbs_certificate.serial_number.clone(),
    }
}

// ============================================================================
// Signed attributes
// ============================================================================

fn attribute(oid: ObjectIdentifier, value: Any) -> Result<Attribute> {
    Ok(Attribute {
        oid,
        values: SetOfVec::try_from(vec![value])?,
    })
}

fn printable(value: &str) -> Result<Any> {
    Ok(Any::encode_from(&PrintableStringRef::new(value)?)?)
}

fn octets(value: &[u8]) -> Result<Any> {
    Ok(Any::new(Tag::OctetString, value.to_vec())?)
}

struct SignedAttributes(Vec<Attribute>);

impl SignedAttributes {
    fn value(&self, oid: ObjectIdentifier) -> Option<&Any> {
        self.0
            .iter()
            .find(|attr| attr.oid == oid)
            .and_then(|attr| attr.values.iter().next())
    }

    fn string(&self, oid: ObjectIdentifier) -> Result<Option<String>> {
        let Some(value) = self.value(oid) else {
            return Ok(None);
        };
        match value.tag() {
            Tag::PrintableString | Tag::Utf8String | Tag::Ia5String => {
                let s = std::str::from_utf8(value.value()).map_err(|_| {
                    ScepError::malformed_cms(format!("attribute {} is not valid text", oid))
                })?;
                Ok(Some(s.to_string()))
            }
            tag => Err(ScepError::malformed_cms(format!(
                "attribute {} has unexpected tag {}",
                oid, tag
            ))),
        }
    }

    fn number(&self, oid: ObjectIdentifier) -> Result<Option<u8>> {
        match self.string(oid)? {
            Some(s) => s.trim().parse().map(Some).map_err(|_| {
                ScepError::malformed_cms(format!("attribute {} is not a number: '{}'", oid, s))
            }),
            None => Ok(None),
        }
    }

    fn octets(&self, oid: ObjectIdentifier) -> Result<Option<Vec<u8>>> {
        match self.value(oid) {
            Some(value) if value.tag() == Tag::OctetString => Ok(Some(value.value().to_vec())),
            Some(value) => Err(ScepError::malformed_cms(format!(
                "attribute {} has unexpected tag {}",
                oid,
                value.tag()
            ))),
            None => Ok(None),
        }
    }

    fn time(&self, oid: ObjectIdentifier) -> Result<Option<SystemTime>> {
        match self.value(oid) {
            Some(value) => {
                let time = Time::from_der(&value.to_der()?)
                    .map_err(|e| ScepError::malformed_cms(format!("invalid signingTime: {}", e)))?;
                Ok(Some(time.to_system_time()))
            }
            None => Ok(None),
        }
    }
}

// ============================================================================
// EnvelopedData
// ============================================================================

// originatorInfo and unprotectedAttrs are never used by SCEP and are not
// modelled; only key transport recipients are supported.
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
struct EnvelopedData {
    version: u8,
    recipient_infos: Any,
    encrypted_content_info: EncryptedContentInfo,
}

#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
struct KeyTransRecipientInfo {
    version: u8,
    rid: RecipientIdentifier,
    key_encryption_algorithm: AlgorithmIdentifierOwned,
    encrypted_key: OctetString,
}

#[derive(Clone, Debug, Eq, PartialEq, Choice)]
enum RecipientIdentifier {
    IssuerAndSerialNumber(IssuerAndSerialNumber),
    #[asn1(context_specific = "0", tag_mode = "IMPLICIT")]
    SubjectKeyIdentifier(OctetString),
}

impl RecipientIdentifier {
    fn matches(&self, cert: &Certificate) -> bool {
        match self {
            Self::IssuerAndSerialNumber(isn) => *isn == issuer_and_serial(cert),
            Self::SubjectKeyIdentifier(ski) => crate::types::subject_key_identifier(cert)
                .map(|id| id.0 == *ski)
                .unwrap_or(false),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
struct EncryptedContentInfo {
    content_type: ObjectIdentifier,
    content_encryption_algorithm: AlgorithmIdentifierOwned,
    #[asn1(context_specific = "0", tag_mode = "IMPLICIT", optional = "true")]
    encrypted_content: Option<OctetString>,
}

fn seal_envelope<C: ScepCrypto + ?Sized>(
    crypto: &C,
    content: &[u8],
    recipient: &Certificate,
    cipher: ContentEncryptionAlgorithm,
) -> Result<Vec<u8>> {
    let mut content_key = vec![0u8; cipher.key_size()];
    OsRng.fill_bytes(&mut content_key);
    let mut iv = vec![0u8; cipher.block_size()];
    OsRng.fill_bytes(&mut iv);

    let encrypted_content = encrypt_content(cipher, &content_key, &iv, content)?;
    let (key_encryption_algorithm, encrypted_key) = crypto.encrypt_key(recipient, &content_key)?;

    let recipient_info = KeyTransRecipientInfo {
        version: 0,
        rid: RecipientIdentifier::IssuerAndSerialNumber(issuer_and_serial(recipient)),
        key_encryption_algorithm,
        encrypted_key: OctetString::new(encrypted_key)?,
    };

    let enveloped = EnvelopedData {
        version: 0,
        recipient_infos: Any::new(Tag::Set, recipient_info.to_der()?)?,
        encrypted_content_info: EncryptedContentInfo {
            content_type: oids::ID_DATA,
            content_encryption_algorithm: AlgorithmIdentifierOwned {
                oid: cipher.oid(),
                parameters: Some(Any::new(Tag::OctetString, iv)?),
            },
            encrypted_content: Some(OctetString::new(encrypted_content)?),
        },
    };

    let content_info = ContentInfo {
        content_type: oids::ID_ENVELOPED_DATA,
        content: Any::encode_from(&enveloped)?,
    };

    Ok(content_info.to_der()?)
}

fn open_envelope<C: ScepCrypto + ?Sized>(
    crypto: &C,
    envelope: &[u8],
    recipient_key: &C::PrivateKey,
    recipient_cert: &Certificate,
) -> Result<(Vec<u8>, ContentEncryptionAlgorithm)> {
    let content_info = ContentInfo::from_der(envelope)
        .map_err(|e| ScepError::malformed_cms(format!("Failed to parse ContentInfo: {}", e)))?;
    if content_info.content_type != oids::ID_ENVELOPED_DATA {
        return Err(ScepError::malformed_cms(format!(
            "Expected EnvelopedData OID, got {}",
            content_info.content_type
        )));
    }
    let enveloped = EnvelopedData::from_der(&content_info.content.to_der()?)
        .map_err(|e| ScepError::malformed_cms(format!("Failed to parse EnvelopedData: {}", e)))?;

    let recipients = recipient_infos(&enveloped.recipient_infos)?;
    let recipient = match recipients.iter().find(|ri| ri.rid.matches(recipient_cert)) {
        Some(ri) => ri,
        None if recipients.len() == 1 => &recipients[0],
        None => {
            return Err(ScepError::malformed_cms(
                "no RecipientInfo for the recipient certificate",
            ))
        }
    };

    let content_key = crypto.decrypt_key(
        recipient_key,
        &recipient.key_encryption_algorithm,
        recipient.encrypted_key.as_bytes(),
    )?;

    let eci = &enveloped.encrypted_content_info;
    let cipher = ContentEncryptionAlgorithm::from_oid(&eci.content_encryption_algorithm.oid)
        .ok_or_else(|| {
            ScepError::unsupported_algorithm(format!(
                "content encryption algorithm {}",
                eci.content_encryption_algorithm.oid
            ))
        })?;
    let iv = match &eci.content_encryption_algorithm.parameters {
        Some(params) if params.tag() == Tag::OctetString => params.value(),
        _ => return Err(ScepError::malformed_cms("missing content encryption IV")),
    };
    let encrypted = eci
        .encrypted_content
        .as_ref()
        .ok_or_else(|| ScepError::malformed_cms("EnvelopedData without encrypted content"))?;

    let content = decrypt_content(cipher, &content_key, iv, encrypted.as_bytes())?;
    Ok((content, cipher))
}

fn recipient_infos(set: &Any) -> Result<Vec<KeyTransRecipientInfo>> {
    if set.tag() != Tag::Set {
        return Err(ScepError::malformed_cms("RecipientInfos is not a SET"));
    }

    let mut reader = SliceReader::new(set.value())?;
    let mut recipients = Vec::new();
    while !reader.is_finished() {
        recipients.push(reader.decode::<KeyTransRecipientInfo>()?);
    }
    Ok(recipients)
}

// ============================================================================
// Content encryption
// ============================================================================

fn encrypt_content(
    algorithm: ContentEncryptionAlgorithm,
    key: &[u8],
    iv: &[u8],
    plaintext: &[u8],
) -> Result<Vec<u8>> {
    match algorithm {
        ContentEncryptionAlgorithm::Aes128Cbc => cbc_encrypt::<aes::Aes128>(key, iv, plaintext),
        ContentEncryptionAlgorithm::Aes192Cbc => cbc_encrypt::<aes::Aes192>(key, iv, plaintext),
        ContentEncryptionAlgorithm::Aes256Cbc => cbc_encrypt::<aes::Aes256>(key, iv, plaintext),
        ContentEncryptionAlgorithm::DesEde3Cbc => cbc_encrypt::<des::TdesEde3>(key, iv, plaintext),
        ContentEncryptionAlgorithm::DesCbc => cbc_encrypt::<des::Des>(key, iv, plaintext),
    }
}

fn decrypt_content(
    algorithm: ContentEncryptionAlgorithm,
    key: &[u8],
    iv: &[u8],
    ciphertext: &[u8],
) -> Result<Vec<u8>> {
    if iv.len() != algorithm.block_size() {
        return Err(ScepError::malformed_cms(format!(
            "Invalid IV size: expected {}, got {}",
            algorithm.block_size(),
            iv.len()
        )));
    }

    match algorithm {
        ContentEncryptionAlgorithm::Aes128Cbc => cbc_decrypt::<aes::Aes128>(key, iv, ciphertext),
        ContentEncryptionAlgorithm::Aes192Cbc => cbc_decrypt::<aes::Aes192>(key, iv, ciphertext),
        ContentEncryptionAlgorithm::Aes256Cbc => cbc_decrypt::<aes::Aes256>(key, iv, ciphertext),
        ContentEncryptionAlgorithm::DesEde3Cbc => {
            cbc_decrypt::<des::TdesEde3>(key, iv, ciphertext)
        }
        ContentEncryptionAlgorithm::DesCbc => cbc_decrypt::<des::Des>(key, iv, ciphertext),
    }
}

fn cbc_encrypt<B>(key: &[u8], iv: &[u8], plaintext: &[u8]) -> Result<Vec<u8>>
where
    B: BlockEncryptMut + BlockCipher,
    cbc::Encryptor<B>: KeyIvInit + BlockEncryptMut,
{
    let cipher = cbc::Encryptor::<B>::new_from_slices(key, iv)
        .map_err(|e| ScepError::crypto(format!("Failed to create cipher: {}", e)))?;

    let block_size = iv.len();
    let mut buffer = vec![0u8; (plaintext.len() / block_size + 1) * block_size];
    buffer[..plaintext.len()].copy_from_slice(plaintext);

    let len = cipher
        .encrypt_padded_mut::<Pkcs7>(&mut buffer, plaintext.len())
        .map_err(|e| ScepError::crypto(format!("Encryption failed: {:?}", e)))?
        .len();
    buffer.truncate(len);
    Ok(buffer)
}

fn cbc_decrypt<B>(key: &[u8], iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>>
where
    B: BlockDecryptMut + BlockCipher,
    cbc::Decryptor<B>: KeyIvInit + BlockDecryptMut,
{
    let cipher = cbc::Decryptor::<B>::new_from_slices(key, iv)
        .map_err(|e| ScepError::crypto(format!("Failed to create cipher: {}", e)))?;

    let mut buffer = ciphertext.to_vec();
    let len = cipher
        .decrypt_padded_mut::<Pkcs7>(&mut buffer)
        .map_err(|e| ScepError::crypto(format!("Decryption failed: {}", e)))?
        .len();
    buffer.truncate(len);
    Ok(buffer)
}
