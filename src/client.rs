//! SCEP client implementation.
//!
//! This module provides the main `ScepClient` struct for enrolling and
//! retrieving certificates from a SCEP CA according to RFC 8894.

use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

use base64::prelude::*;
use der::Decode;
use tokio::sync::RwLock;
use x509_cert::crl::CertificateList;
use x509_cert::name::Name;
use x509_cert::request::CertReq;
use x509_cert::serial_number::SerialNumber;
use x509_cert::Certificate;

use crate::codec::{self, SignerOptions};
use crate::config::{CaIdentifier, ScepClientConfig};
use crate::crypto::{RsaCrypto, ScepCrypto};
use crate::error::{Result, ScepError};
use crate::transport::{HttpTransport, ScepHttpResponse, ScepTransport};
use crate::types::{
    content_types, is_ca, pkcs7, AuthorityCertStore, CaCapability, CaCaps, DecodedPkiMessage,
    EnrolmentResponse, MessageData, MessageType, Operation, PkiMessage, PkiStatus, TransactionId,
};
use crate::validator::CaCertValidator;

/// Capabilities and certificates of the CA, replaced as a whole on refresh.
#[derive(Debug)]
struct AuthorityState {
    caps: CaCaps,
    cert_store: AuthorityCertStore,
}

/// SCEP client for certificate enrolment operations.
///
/// The `ScepClient` provides the SCEP operations defined in RFC 8894:
/// - CA capability and certificate retrieval (lazily, on first use)
/// - Enrolment (`PKCSReq`), renewal (`RenewalReq`) and update (`UpdateReq`)
/// - Polling of pending requests (`CertPoll`)
/// - Certificate and CRL retrieval (`GetCert`, `GetCRL`)
/// - CA rollover (`GetNextCACert`)
///
/// Every response is checked for a valid signature by the CA (or RA) signing
/// certificate, the echoed nonce and transaction ID, and a signing time
/// within the configured window.
///
/// # Example
///
/// ```no_run
/// use scep_client::{PreprovisionedCaCertValidator, ScepClient, ScepClientConfig};
/// use x509_cert::Certificate;
///
/// # async fn example(
/// #     ca_cert: Certificate,
/// #     csr: x509_cert::request::CertReq,
/// #     key: rsa::RsaPrivateKey,
/// #     self_signed: Certificate,
/// # ) -> Result<(), Box<dyn std::error::Error>> {
/// let config = ScepClientConfig::builder()
///     .ca_url("http://ca.example.com/scep")?
///     .build()?;
///
/// let client = ScepClient::new(config, PreprovisionedCaCertValidator::new(vec![ca_cert]))?;
///
/// let response = client.scep_enrol(&csr, &key, &self_signed).await?;
/// if response.is_pending() {
///     println!("Poll later with transaction {}", response.transaction_id());
/// }
/// # Ok(())
/// # }
/// ```
pub struct ScepClient<C: ScepCrypto = RsaCrypto> {
    config: ScepClientConfig,
    transport: Arc<dyn ScepTransport>,
    validator: Arc<dyn CaCertValidator>,
    crypto: Arc<C>,
    authority: RwLock<Option<Arc<AuthorityState>>>,
}

impl<C: ScepCrypto> fmt::Debug for ScepClient<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScepClient")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ScepClient<RsaCrypto> {
    /// Create a client with the built-in HTTP transport and RSA crypto.
    ///
    /// No request is sent until the first operation.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(
        config: ScepClientConfig,
        validator: impl CaCertValidator + 'static,
    ) -> Result<Self> {
        let transport = HttpTransport::new(&config)?;
        Ok(Self::with_transport(
            config,
            transport,
            validator,
            RsaCrypto::new(),
        ))
    }
}

impl<C: ScepCrypto> ScepClient<C> {
    /// Create a client with a custom transport and crypto provider.
    pub fn with_transport(
        config: ScepClientConfig,
        transport: impl ScepTransport + 'static,
        validator: impl CaCertValidator + 'static,
        crypto: C,
    ) -> Self {
        Self {
            config,
            transport: Arc::new(transport),
            validator: Arc::new(validator),
            crypto: Arc::new(crypto),
            authority: RwLock::new(None),
        }
    }

    /// Get the client configuration.
    pub fn config(&self) -> &ScepClientConfig {
        &self.config
    }

    // =========================================================================
    // CA state
    // =========================================================================

    /// Fetch the CA capabilities and certificates unless already done.
    pub async fn init(&self) -> Result<()> {
        self.state().await.map(|_| ())
    }

    /// Re-fetch the CA capabilities and certificates.
    ///
    /// The new state replaces the old one only if both requests and all
    /// checks succeed.
    pub async fn refresh(&self) -> Result<()> {
        let state = Arc::new(self.fetch_authority().await?);
        *self.authority.write().await = Some(state);
        Ok(())
    }

    /// The CA certificate, if the client has been initialized.
    pub async fn ca_cert(&self) -> Option<Certificate> {
        self.authority
            .read()
            .await
            .as_ref()
            .map(|state| state.cert_store.ca_cert().clone())
    }

    /// The CA capabilities, initializing the client if needed.
    pub async fn ca_caps(&self) -> Result<CaCaps> {
        Ok(self.state().await?.caps)
    }

    /// The CA and RA certificates, initializing the client if needed.
    pub async fn authority_cert_store(&self) -> Result<AuthorityCertStore> {
        Ok(self.state().await?.cert_store.clone())
    }

    /// The CA identifier, initializing the client if needed.
    pub async fn ca_id(&self) -> Result<&CaIdentifier> {
        self.init().await?;
        Ok(&self.config.ca_id)
    }

    async fn state(&self) -> Result<Arc<AuthorityState>> {
        if let Some(state) = self.authority.read().await.as_ref() {
            return Ok(Arc::clone(state));
        }

        let mut guard = self.authority.write().await;
        if let Some(state) = guard.as_ref() {
            return Ok(Arc::clone(state));
        }

        let state = Arc::new(self.fetch_authority().await?);
        *guard = Some(Arc::clone(&state));
        Ok(state)
    }

    async fn fetch_authority(&self) -> Result<AuthorityState> {
        let caps = self.fetch_ca_caps().await?;
        let cert_store = self.fetch_ca_certs().await?;

        tracing::info!(
            ca = %self.config.ca_id,
            subject = %cert_store.ca_cert().tbs_certificate.subject,
            ra = cert_store.has_ra(),
            caps = %caps.iter().map(|c| c.as_str()).collect::<Vec<_>>().join(","),
            "SCEP CA initialized"
        );

        Ok(AuthorityState { caps, cert_store })
    }

    async fn fetch_ca_caps(&self) -> Result<CaCaps> {
        let response = self.http_get(Operation::GetCaCaps).await?;

        if !content_types::matches(&response.content_type, content_types::TEXT_PLAIN) {
            tracing::warn!(
                "GetCACaps returned content-type '{}', parsing anyway",
                response.content_type
            );
        }

        Ok(CaCaps::parse(&String::from_utf8_lossy(&response.body)))
    }

    async fn fetch_ca_certs(&self) -> Result<AuthorityCertStore> {
        let response = self.http_get(Operation::GetCaCert).await?;

        if content_types::matches(&response.content_type, content_types::X509_CA_CERT) {
            let ca_cert = Certificate::from_der(&response.body).map_err(|e| {
                ScepError::invalid_ca_response(format!("invalid CA certificate: {}", e))
            })?;
            self.check_trusted(&ca_cert)?;
            return Ok(AuthorityCertStore::ca_only(ca_cert));
        }

        if content_types::matches(&response.content_type, content_types::X509_CA_RA_CERT) {
            let certs = pkcs7::parse_certs_only(&response.body).map_err(|e| {
                ScepError::invalid_ca_response(format!("invalid CA/RA certificates: {}", e))
            })?;
            if certs.len() < 2 {
                return Err(ScepError::invalid_ca_response(format!(
                    "expected CA and RA certificates, got {} certificate(s)",
                    certs.len()
                )));
            }

            let (mut cas, ras): (Vec<_>, Vec<_>) = certs.into_iter().partition(is_ca);
            if cas.len() != 1 {
                return Err(ScepError::invalid_ca_response(format!(
                    "expected exactly one CA certificate, got {}",
                    cas.len()
                )));
            }
            let ca_cert = cas.remove(0);
            self.check_trusted(&ca_cert)?;

            return AuthorityCertStore::with_ra(self.crypto.as_ref(), ca_cert, ras);
        }

        Err(ScepError::invalid_ca_response(format!(
            "unexpected GetCACert content-type '{}'",
            response.content_type
        )))
    }

    fn check_trusted(&self, ca_cert: &Certificate) -> Result<()> {
        if self.validator.is_trusted(ca_cert) {
            Ok(())
        } else {
            Err(ScepError::untrusted_ca(ca_cert.tbs_certificate.subject.to_string()))
        }
    }

    // =========================================================================
    // Enrolment
    // =========================================================================

    /// Enrol, renew or update a certificate depending on the identity
    /// certificate.
    ///
    /// With a CA that advertises `AES` or `Update` (draft-gutmann-scep and
    /// RFC 8894):
    /// - a self-signed identity certificate makes a `PKCSReq`,
    /// - a certificate issued by this CA makes a `RenewalReq` if supported,
    /// - a certificate issued by another CA makes an `UpdateReq` if supported,
    ///
    /// and a `PKCSReq` otherwise. Older CAs always get a `PKCSReq`.
    pub async fn scep_enrol(
        &self,
        csr: &CertReq,
        identity_key: &C::PrivateKey,
        identity_cert: &Certificate,
    ) -> Result<EnrolmentResponse> {
        let state = self.state().await?;
        let caps = state.caps;

        let gutmann = caps.contains(CaCapability::Aes) || caps.contains(CaCapability::Update);
        if gutmann && !self.crypto.is_self_signed(identity_cert)? {
            let ca_cert = state.cert_store.ca_cert();
            if self.crypto.is_issued_by(identity_cert, ca_cert)? {
                if caps.supports_renewal() {
                    return self.scep_renewal_req(csr, identity_key, identity_cert).await;
                }
            } else if caps.supports_update() {
                return self.scep_update_req(csr, identity_key, identity_cert).await;
            }
        }

        self.scep_pkcs_req(csr, identity_key, identity_cert).await
    }

    /// Initial enrolment (`PKCSReq`).
    ///
    /// # Errors
    ///
    /// Returns [`ScepError::InvalidArgument`] if `identity_cert` is not
    /// self-signed.
    pub async fn scep_pkcs_req(
        &self,
        csr: &CertReq,
        identity_key: &C::PrivateKey,
        identity_cert: &Certificate,
    ) -> Result<EnrolmentResponse> {
        let state = self.state().await?;

        if !self.crypto.is_self_signed(identity_cert)? {
            return Err(ScepError::invalid_argument(
                "identity certificate is not self-signed",
            ));
        }

        self.enrol(&state, MessageType::PkcsReq, csr, identity_key, identity_cert)
            .await
    }

    /// Renewal with a certificate issued by this CA (`RenewalReq`).
    ///
    /// # Errors
    ///
    /// Returns [`ScepError::UnsupportedOperation`] if the CA does not
    /// advertise `Renewal`, and [`ScepError::InvalidArgument`] if
    /// `identity_cert` is self-signed or not issued by the CA.
    pub async fn scep_renewal_req(
        &self,
        csr: &CertReq,
        identity_key: &C::PrivateKey,
        identity_cert: &Certificate,
    ) -> Result<EnrolmentResponse> {
        let state = self.state().await?;

        if !state.caps.supports_renewal() {
            return Err(ScepError::unsupported_operation(format!(
                "messageType {}",
                MessageType::RenewalReq
            )));
        }
        if self.crypto.is_self_signed(identity_cert)? {
            return Err(ScepError::invalid_argument(
                "identity certificate must not be self-signed",
            ));
        }
        if !self
            .crypto
            .is_issued_by(identity_cert, state.cert_store.ca_cert())?
        {
            return Err(ScepError::invalid_argument(
                "identity certificate is not issued by the CA",
            ));
        }

        self.enrol(&state, MessageType::RenewalReq, csr, identity_key, identity_cert)
            .await
    }

    /// Update with a certificate issued by another CA (`UpdateReq`).
    ///
    /// # Errors
    ///
    /// Returns [`ScepError::UnsupportedOperation`] if the CA does not
    /// advertise `Update`, and [`ScepError::InvalidArgument`] if
    /// `identity_cert` is self-signed.
    pub async fn scep_update_req(
        &self,
        csr: &CertReq,
        identity_key: &C::PrivateKey,
        identity_cert: &Certificate,
    ) -> Result<EnrolmentResponse> {
        let state = self.state().await?;

        if !state.caps.supports_update() {
            return Err(ScepError::unsupported_operation(format!(
                "messageType {}",
                MessageType::UpdateReq
            )));
        }
        if self.crypto.is_self_signed(identity_cert)? {
            return Err(ScepError::invalid_argument(
                "identity certificate must not be self-signed",
            ));
        }

        self.enrol(&state, MessageType::UpdateReq, csr, identity_key, identity_cert)
            .await
    }

    async fn enrol(
        &self,
        state: &AuthorityState,
        message_type: MessageType,
        csr: &CertReq,
        identity_key: &C::PrivateKey,
        identity_cert: &Certificate,
    ) -> Result<EnrolmentResponse> {
        let transaction_id = TransactionId::from_public_key(&csr.info.public_key)?;
        let request = PkiMessage::new(transaction_id, message_type)
            .with_message_data(MessageData::CertificationRequest(csr.clone()));

        let response = self
            .transact(state, &request, identity_key, identity_cert)
            .await?;
        EnrolmentResponse::from_decoded(response)
    }

    /// Poll for a pending enrolment (`CertPoll`).
    ///
    /// `transaction_id` is the ID of the original request, `issuer` the CA
    /// name and `subject` the subject of the requested certificate.
    pub async fn scep_cert_poll(
        &self,
        identity_key: &C::PrivateKey,
        identity_cert: &Certificate,
        transaction_id: &TransactionId,
        issuer: &Name,
        subject: &Name,
    ) -> Result<EnrolmentResponse> {
        let state = self.state().await?;

        let request = PkiMessage::new(transaction_id.clone(), MessageType::CertPoll)
            .with_message_data(MessageData::issuer_and_subject(
                issuer.clone(),
                subject.clone(),
            ));

        let response = self
            .transact(&state, &request, identity_key, identity_cert)
            .await?;
        EnrolmentResponse::from_decoded(response)
    }

    /// Poll for a pending enrolment of `csr`.
    ///
    /// The transaction ID and subject are taken from the request.
    pub async fn scep_cert_poll_for_csr(
        &self,
        identity_key: &C::PrivateKey,
        identity_cert: &Certificate,
        csr: &CertReq,
        issuer: &Name,
    ) -> Result<EnrolmentResponse> {
        let transaction_id = TransactionId::from_public_key(&csr.info.public_key)?;
        self.scep_cert_poll(
            identity_key,
            identity_cert,
            &transaction_id,
            issuer,
            &csr.info.subject,
        )
        .await
    }

    // =========================================================================
    // Certificate and CRL retrieval
    // =========================================================================

    /// Retrieve a certificate by issuer and serial number (`GetCert`).
    ///
    /// # Errors
    ///
    /// Returns [`ScepError::ServerStatus`] if the CA does not answer with
    /// SUCCESS.
    pub async fn scep_get_cert(
        &self,
        identity_key: &C::PrivateKey,
        identity_cert: &Certificate,
        issuer: &Name,
        serial_number: &SerialNumber,
    ) -> Result<Vec<Certificate>> {
        let data = self
            .retrieve(
                MessageType::GetCert,
                identity_key,
                identity_cert,
                issuer,
                serial_number,
            )
            .await?;
        pkcs7::parse_certs_only(&data)
    }

    /// Retrieve the CRL covering a certificate (`GetCRL`).
    ///
    /// # Errors
    ///
    /// Returns [`ScepError::ServerStatus`] if the CA does not answer with
    /// SUCCESS.
    pub async fn scep_get_crl(
        &self,
        identity_key: &C::PrivateKey,
        identity_cert: &Certificate,
        issuer: &Name,
        serial_number: &SerialNumber,
    ) -> Result<CertificateList> {
        let data = self
            .retrieve(
                MessageType::GetCrl,
                identity_key,
                identity_cert,
                issuer,
                serial_number,
            )
            .await?;
        pkcs7::parse_crls(&data)?
            .into_iter()
            .next()
            .ok_or_else(|| ScepError::malformed_cms("GetCRL reply contains no CRL"))
    }

    async fn retrieve(
        &self,
        message_type: MessageType,
        identity_key: &C::PrivateKey,
        identity_cert: &Certificate,
        issuer: &Name,
        serial_number: &SerialNumber,
    ) -> Result<Vec<u8>> {
        let state = self.state().await?;

        let request = PkiMessage::new(TransactionId::random(), message_type).with_message_data(
            MessageData::issuer_and_serial(issuer.clone(), serial_number.clone()),
        );

        let response = self
            .transact(&state, &request, identity_key, identity_cert)
            .await?;

        match response.pki_status {
            Some(PkiStatus::Success) => response.message_data.ok_or_else(|| {
                ScepError::malformed_cms(format!("{} reply without content", message_type))
            }),
            Some(status) => Err(ScepError::server_status(
                status,
                response.fail_info,
                response.fail_info_text,
            )),
            None => Err(ScepError::protocol_failure("CertRep without pkiStatus")),
        }
    }

    // =========================================================================
    // CA rollover
    // =========================================================================

    /// Retrieve the certificates of the next CA (`GetNextCACert`).
    ///
    /// The response must be signed by the current signing certificate. The
    /// client keeps using the current CA.
    ///
    /// # Errors
    ///
    /// Returns [`ScepError::UnsupportedOperation`] if the CA does not
    /// advertise `GetNextCACert`.
    pub async fn scep_next_ca_cert(&self) -> Result<AuthorityCertStore> {
        let state = self.state().await?;

        if !state.caps.supports_get_next_ca_cert() {
            return Err(ScepError::unsupported_operation(format!(
                "operation {}",
                Operation::GetNextCaCert
            )));
        }

        let response = self.http_get(Operation::GetNextCaCert).await?;
        expect_content_type(&response, content_types::X509_NEXT_CA_CERT)?;

        let signature_cert = state.cert_store.signature_cert();
        let decoded = codec::decode_next_ca_message(
            self.crypto.as_ref(),
            &response.body,
            std::slice::from_ref(signature_cert),
        )?;

        if let Some(message) = decoded.failure_message {
            return Err(ScepError::protocol_failure(message));
        }
        if !decoded.signature_valid {
            return Err(ScepError::BadSignature);
        }
        self.check_signing_time(decoded.signing_time)?;
        check_signer(decoded.signature_cert.as_ref(), signature_cert)?;

        let next = AuthorityCertStore::from_certificates(self.crypto.as_ref(), decoded.certificates)?;
        tracing::info!(
            subject = %next.ca_cert().tbs_certificate.subject,
            "Retrieved next CA certificate"
        );
        Ok(next)
    }

    // =========================================================================
    // Request pipeline
    // =========================================================================

    async fn transact(
        &self,
        state: &AuthorityState,
        request: &PkiMessage,
        identity_key: &C::PrivateKey,
        identity_cert: &Certificate,
    ) -> Result<DecodedPkiMessage> {
        let hash = state.caps.most_secure_hash_algorithm();
        let cipher = state
            .caps
            .strongest_cipher(self.config.use_insecure_algorithms)?;

        tracing::debug!(
            message_type = %request.message_type,
            transaction_id = %request.transaction_id,
            %hash,
            %cipher,
            "Sending pkiMessage"
        );

        let message = codec::encode_pki_message(
            self.crypto.as_ref(),
            request,
            identity_key,
            &SignerOptions::new(identity_cert, hash),
            state.cert_store.encryption_cert(),
            cipher,
        )?;

        let response = self.http_pki_operation(&state.caps, message).await?;
        expect_content_type(&response, content_types::PKI_MESSAGE)?;

        let signature_cert = state.cert_store.signature_cert();
        let decoded = codec::decode_pki_message(
            self.crypto.as_ref(),
            &response.body,
            identity_key,
            identity_cert,
            std::slice::from_ref(signature_cert),
        )?;

        self.validate_response(request, &decoded, signature_cert)?;

        tracing::debug!(
            transaction_id = %decoded.transaction_id,
            status = ?decoded.pki_status,
            "Received valid CertRep"
        );
        Ok(decoded)
    }

    fn validate_response(
        &self,
        request: &PkiMessage,
        response: &DecodedPkiMessage,
        signature_cert: &Certificate,
    ) -> Result<()> {
        if let Some(message) = &response.failure_message {
            return Err(ScepError::protocol_failure(message.clone()));
        }
        if !response.signature_valid {
            return Err(ScepError::BadSignature);
        }
        if response.decryption_successful == Some(false) {
            return Err(ScepError::DecryptionFailed);
        }
        self.check_signing_time(response.signing_time)?;
        check_signer(response.signature_cert.as_ref(), signature_cert)?;

        if response.message_type != MessageType::CertRep {
            return Err(ScepError::protocol_failure(format!(
                "expected CertRep, got {}",
                response.message_type
            )));
        }
        if response.transaction_id != request.transaction_id {
            return Err(ScepError::TransactionIdMismatch {
                expected: request.transaction_id.to_string(),
                actual: response.transaction_id.to_string(),
            });
        }
        if response.recipient_nonce.as_ref() != Some(&request.sender_nonce) {
            tracing::warn!(
                transaction_id = %request.transaction_id,
                "recipientNonce does not echo senderNonce"
            );
            return Err(ScepError::NonceMismatch);
        }

        Ok(())
    }

    fn check_signing_time(&self, signing_time: Option<SystemTime>) -> Result<()> {
        let Some(bias) = self.config.max_signing_time_bias else {
            return Ok(());
        };
        let signing_time = signing_time
            .ok_or_else(|| ScepError::signing_time_out_of_range("signingTime is missing"))?;

        let now = SystemTime::now();
        let skew = now
            .duration_since(signing_time)
            .unwrap_or_else(|e| e.duration());

        if skew > bias {
            return Err(ScepError::signing_time_out_of_range(format!(
                "signingTime differs from local time by {}s, at most {}s allowed",
                skew.as_secs(),
                bias.as_secs()
            )));
        }
        Ok(())
    }

    async fn http_get(&self, operation: Operation) -> Result<ScepHttpResponse> {
        let url = self
            .config
            .ca_id
            .build_get_url(operation, self.config.ca_id.profile());
        tracing::debug!(%operation, %url, "SCEP request");
        self.transport.get(&url).await
    }

    async fn http_pki_operation(&self, caps: &CaCaps, message: Vec<u8>) -> Result<ScepHttpResponse> {
        let ca_id = &self.config.ca_id;

        if caps.supports_post() && !self.config.http_get_only {
            let url = ca_id.build_post_url(Operation::PkiOperation);
            tracing::debug!(operation = %Operation::PkiOperation, %url, "SCEP request (POST)");
            self.transport
                .post(&url, content_types::OCTET_STREAM, message)
                .await
        } else {
            let encoded = BASE64_STANDARD.encode(&message);
            let url = ca_id.build_get_url(Operation::PkiOperation, Some(&encoded));
            tracing::debug!(operation = %Operation::PkiOperation, "SCEP request (GET)");
            self.transport.get(&url).await
        }
    }
}

fn expect_content_type(response: &ScepHttpResponse, expected: &str) -> Result<()> {
    if content_types::matches(&response.content_type, expected) {
        Ok(())
    } else {
        Err(ScepError::invalid_content_type(
            expected,
            response.content_type.clone(),
        ))
    }
}

fn check_signer(actual: Option<&Certificate>, expected: &Certificate) -> Result<()> {
    match actual {
        Some(cert) if cert == expected => Ok(()),
        _ => Err(ScepError::UntrustedSigner),
    }
}
