//! PKCS#7/CMS degenerate SignedData utilities.
//!
//! SCEP uses the "certs-only" SignedData format (no signers, no content) to
//! carry certificate chains and CRLs: in `GetCACert` responses for CA/RA
//! chains, inside `GetNextCACert` payloads, and as the decrypted content of
//! `CertRep` messages.

use cms::cert::CertificateChoices;
use cms::content_info::{CmsVersion, ContentInfo};
use cms::revocation::{RevocationInfoChoice, RevocationInfoChoices};
use cms::signed_data::{CertificateSet, EncapsulatedContentInfo, SignedData, SignerInfos};
use der::asn1::SetOfVec;
use der::{Any, Decode, Encode};
use x509_cert::crl::CertificateList;
use x509_cert::Certificate;

use crate::error::{Result, ScepError};

use super::oids;

/// Parse a DER-encoded degenerate SignedData and return its certificates.
pub fn parse_certs_only(der_bytes: &[u8]) -> Result<Vec<Certificate>> {
    let signed_data = parse_signed_data(der_bytes)?;
    extract_certificates(&signed_data)
}

/// Parse a DER-encoded degenerate SignedData and return its CRLs.
pub fn parse_crls(der_bytes: &[u8]) -> Result<Vec<CertificateList>> {
    let signed_data = parse_signed_data(der_bytes)?;
    extract_crls(&signed_data)
}

/// Build a DER-encoded degenerate SignedData ContentInfo.
pub fn build_certs_only(certs: &[Certificate], crls: &[CertificateList]) -> Result<Vec<u8>> {
    let certificates = if certs.is_empty() {
        None
    } else {
        let choices: Vec<CertificateChoices> = certs
            .iter()
            .cloned()
            .map(CertificateChoices::Certificate)
            .collect();
        Some(CertificateSet(SetOfVec::try_from(choices)?))
    };

    let crls = if crls.is_empty() {
        None
    } else {
        let choices: Vec<RevocationInfoChoice> =
            crls.iter().cloned().map(RevocationInfoChoice::Crl).collect();
        Some(RevocationInfoChoices(SetOfVec::try_from(choices)?))
    };

    let signed_data = SignedData {
        version: CmsVersion::V1,
        digest_algorithms: SetOfVec::new(),
        encap_content_info: EncapsulatedContentInfo {
            econtent_type: oids::ID_DATA,
            econtent: None,
        },
        certificates,
        crls,
        signer_infos: SignerInfos(SetOfVec::new()),
    };

    let content_info = ContentInfo {
        content_type: oids::ID_SIGNED_DATA,
        content: Any::encode_from(&signed_data)?,
    };

    Ok(content_info.to_der()?)
}

/// Parse a DER-encoded ContentInfo that must wrap SignedData.
pub(crate) fn parse_signed_data(der_bytes: &[u8]) -> Result<SignedData> {
    let content_info = ContentInfo::from_der(der_bytes)
        .map_err(|e| ScepError::malformed_cms(format!("Failed to parse ContentInfo: {}", e)))?;

    extract_signed_data(&content_info)
}

/// Extract SignedData from ContentInfo.
pub(crate) fn extract_signed_data(content_info: &ContentInfo) -> Result<SignedData> {
    if content_info.content_type != oids::ID_SIGNED_DATA {
        return Err(ScepError::malformed_cms(format!(
            "Expected SignedData OID, got {}",
            content_info.content_type
        )));
    }

    let content = content_info
        .content
        .to_der()
        .map_err(|e| ScepError::malformed_cms(format!("Failed to encode content: {}", e)))?;

    SignedData::from_der(&content)
        .map_err(|e| ScepError::malformed_cms(format!("Failed to parse SignedData: {}", e)))
}

/// Extract certificates from SignedData.
pub(crate) fn extract_certificates(signed_data: &SignedData) -> Result<Vec<Certificate>> {
    let cert_set = match &signed_data.certificates {
        Some(certs) => certs,
        None => return Ok(Vec::new()),
    };

    let mut certificates = Vec::new();

    for cert_choice in cert_set.0.iter() {
        // Only plain X.509 certificates are of interest
        let cert_der = cert_choice.to_der().map_err(|e| {
            ScepError::malformed_cms(format!("Failed to encode certificate: {}", e))
        })?;

        match Certificate::from_der(&cert_der) {
            Ok(cert) => certificates.push(cert),
            Err(e) => {
                tracing::warn!("Skipping non-X.509 certificate: {}", e);
            }
        }
    }

    Ok(certificates)
}

/// Extract CRLs from SignedData.
fn extract_crls(signed_data: &SignedData) -> Result<Vec<CertificateList>> {
    let crl_set = match &signed_data.crls {
        Some(crls) => crls,
        None => return Ok(Vec::new()),
    };

    let mut crls = Vec::new();

    for choice in crl_set.0.iter() {
        let crl_der = choice
            .to_der()
            .map_err(|e| ScepError::malformed_cms(format!("Failed to encode CRL: {}", e)))?;

        match CertificateList::from_der(&crl_der) {
            Ok(crl) => crls.push(crl),
            Err(e) => {
                tracing::warn!("Skipping non-X.509 revocation info: {}", e);
            }
        }
    }

    Ok(crls)
}
