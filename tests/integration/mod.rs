//! Integration test utilities and helpers
//!
//! This module provides a mock SCEP CA built on wiremock. GetCACaps and
//! GetCACert are served statically; PKIOperation requests are decoded with
//! the library codec and answered with a signed and encrypted CertRep.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use base64::prelude::*;
use der::Encode;
use rsa::RsaPrivateKey;
use scep_client::codec::{self, SignerOptions};
use scep_client::types::{
    content_types, oids, pkcs7, ContentEncryptionAlgorithm, HashAlgorithm, MessageData, Nonce,
    PkiMessage,
};
use scep_client::{
    Certificate, FailInfo, MessageType, PkiStatus, PreprovisionedCaCertValidator, RsaCrypto,
    ScepClient, ScepClientConfig, ScepClientConfigBuilder, ScepError, TransactionId,
};
use wiremock::matchers::{method, query_param};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

/// Path of the SCEP endpoint on the mock server
pub const SCEP_PATH: &str = "/scep";

/// Install a test log subscriber, honouring `RUST_LOG`
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Test fixtures loaded from `tests/fixtures`
pub mod fixtures {
    use der::{Decode, DecodePem};
    use rsa::pkcs8::DecodePrivateKey;
    use rsa::RsaPrivateKey;
    use std::fs;
    use x509_cert::crl::CertificateList;
    use x509_cert::request::CertReq;
    use x509_cert::Certificate;

    /// Load a PKCS#8 PEM private key
    pub fn key(name: &str) -> RsaPrivateKey {
        let pem = fs::read_to_string(format!("tests/fixtures/{}", name))
            .expect("Failed to load key fixture");
        RsaPrivateKey::from_pkcs8_pem(&pem).expect("Invalid key fixture")
    }

    /// Load a PEM certificate
    pub fn cert(name: &str) -> Certificate {
        let pem = fs::read_to_string(format!("tests/fixtures/{}", name))
            .expect("Failed to load certificate fixture");
        Certificate::from_pem(&pem).expect("Invalid certificate fixture")
    }

    /// The CSR for `CN=alice`, matching `client-key.pem`
    pub fn csr() -> CertReq {
        let der = fs::read("tests/fixtures/alice-csr.der").expect("Failed to load CSR fixture");
        CertReq::from_der(&der).expect("Invalid CSR fixture")
    }

    /// The CRL of the test CA
    pub fn crl() -> CertificateList {
        let der = fs::read("tests/fixtures/ca-crl.der").expect("Failed to load CRL fixture");
        CertificateList::from_der(&der).expect("Invalid CRL fixture")
    }

    /// Client key shared by all client certificates
    pub fn client_key() -> RsaPrivateKey {
        key("client-key.pem")
    }

    /// Self-signed identity for initial enrolment
    pub fn self_signed() -> Certificate {
        cert("client-selfsigned.pem")
    }

    /// Certificate issued to the client by the test CA
    pub fn issued() -> Certificate {
        cert("client-issued.pem")
    }

    /// Certificate issued to the client by an unrelated CA
    pub fn issued_by_other_ca() -> Certificate {
        cert("client-other-ca.pem")
    }

    /// The test CA certificate
    pub fn ca() -> Certificate {
        cert("ca.pem")
    }
}

/// How the mock CA answers the next PKIOperation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    /// SUCCESS with the issued certificate (or CRL for GetCRL)
    Success,
    /// PENDING
    Pending,
    /// FAILURE with the given reason
    Failure(FailInfo),
}

impl Reply {
    fn status(&self) -> PkiStatus {
        match self {
            Self::Success => PkiStatus::Success,
            Self::Pending => PkiStatus::Pending,
            Self::Failure(_) => PkiStatus::Failure,
        }
    }
}

/// Defects the mock CA can introduce into a CertRep
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Malformed {
    /// Encrypt the messageData for a certificate other than the requester's
    WrongRecipient,
    /// Leave out the pkiStatus attribute
    NoPkiStatus,
    /// Replace the pkiStatus value with an undefined code
    UnknownPkiStatus,
    /// FAILURE without a failInfo attribute
    FailureWithoutFailInfo,
    /// SUCCESS without messageData
    SuccessWithoutContent,
    /// Use another messageType than CertRep
    MessageType(MessageType),
}

/// Certificates served by GetCACert
#[derive(Debug, Clone)]
pub enum CaCertReply {
    /// A single CA certificate; the CA handles messages itself
    CaOnly,
    /// CA plus signing and encryption RA certificates
    CaWithRa,
    /// A fixed body and content type
    Raw {
        /// Content-Type header
        content_type: &'static str,
        /// Response body
        body: Vec<u8>,
    },
}

/// A PKIOperation request as seen by the mock CA
#[derive(Debug, Clone)]
pub struct ObservedRequest {
    /// HTTP method used
    pub method: String,
    /// messageType of the request
    pub message_type: MessageType,
    /// transactionID of the request
    pub transaction_id: TransactionId,
    /// Digest algorithm the client signed with
    pub digest_algorithm: Option<HashAlgorithm>,
    /// Cipher the client encrypted with
    pub content_encryption: Option<ContentEncryptionAlgorithm>,
    /// True if the client signature verified against its embedded certificate
    pub signature_valid: bool,
    /// Certificate that signed the request
    pub signer: Option<Certificate>,
    /// Decrypted messageData
    pub message_data: Option<Vec<u8>>,
}

struct Authority {
    signer_key: RsaPrivateKey,
    signer_cert: Certificate,
    decrypt_key: RsaPrivateKey,
    decrypt_cert: Certificate,
}

#[derive(Default)]
struct Behaviour {
    replies: VecDeque<Reply>,
    tamper_nonce: bool,
    tamper_transaction_id: bool,
    signing_time_skew: Option<Duration>,
    rogue_signer: bool,
    content_type: Option<&'static str>,
    malformed: Option<Malformed>,
    requests: Vec<ObservedRequest>,
}

/// Mock SCEP CA for integration tests
pub struct MockScepServer {
    server: MockServer,
    authority: Arc<Authority>,
    behaviour: Arc<Mutex<Behaviour>>,
}

impl MockScepServer {
    /// Start a CA without RA advertising `caps`
    pub async fn start(caps: &str) -> Self {
        Self::start_with(caps, CaCertReply::CaOnly).await
    }

    /// Start a CA advertising `caps` whose GetCACert answers with `ca_certs`
    pub async fn start_with(caps: &str, ca_certs: CaCertReply) -> Self {
        init_tracing();
        let server = MockServer::start().await;

        let authority = match ca_certs {
            CaCertReply::CaWithRa => Authority {
                signer_key: fixtures::key("ra-sign-key.pem"),
                signer_cert: fixtures::cert("ra-sign.pem"),
                decrypt_key: fixtures::key("ra-enc-key.pem"),
                decrypt_cert: fixtures::cert("ra-enc.pem"),
            },
            _ => Authority {
                signer_key: fixtures::key("ca-key.pem"),
                signer_cert: fixtures::ca(),
                decrypt_key: fixtures::key("ca-key.pem"),
                decrypt_cert: fixtures::ca(),
            },
        };

        let (ca_content_type, ca_body) = match ca_certs {
            CaCertReply::CaOnly => (
                content_types::X509_CA_CERT,
                fixtures::ca().to_der().expect("CA encodes"),
            ),
            CaCertReply::CaWithRa => (
                content_types::X509_CA_RA_CERT,
                pkcs7::build_certs_only(
                    &[
                        fixtures::ca(),
                        fixtures::cert("ra-sign.pem"),
                        fixtures::cert("ra-enc.pem"),
                    ],
                    &[],
                )
                .expect("CA/RA bundle encodes"),
            ),
            CaCertReply::Raw { content_type, body } => (content_type, body),
        };

        Mock::given(method("GET"))
            .and(query_param("operation", "GetCACaps"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                caps.as_bytes().to_vec(),
                content_types::TEXT_PLAIN,
            ))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(query_param("operation", "GetCACert"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(ca_body, ca_content_type))
            .mount(&server)
            .await;

        let authority = Arc::new(authority);
        let behaviour = Arc::new(Mutex::new(Behaviour::default()));

        Mock::given(query_param("operation", "PKIOperation"))
            .respond_with(PkiOperationResponder {
                authority: Arc::clone(&authority),
                behaviour: Arc::clone(&behaviour),
            })
            .mount(&server)
            .await;

        Self {
            server,
            authority,
            behaviour,
        }
    }

    /// Get the SCEP URL of the mock server
    pub fn url(&self) -> String {
        format!("{}{}", self.server.uri(), SCEP_PATH)
    }

    /// Get a reference to the inner MockServer for custom mocking
    pub fn inner(&self) -> &MockServer {
        &self.server
    }

    /// Queue replies for the next PKIOperations; SUCCESS once exhausted
    pub fn reply_with(&self, replies: &[Reply]) {
        self.behaviour.lock().unwrap().replies.extend(replies.iter().copied());
    }

    /// Answer with a fresh recipientNonce instead of echoing the senderNonce
    pub fn tamper_nonce(&self) {
        self.behaviour.lock().unwrap().tamper_nonce = true;
    }

    /// Answer with a different transactionID
    pub fn tamper_transaction_id(&self) {
        self.behaviour.lock().unwrap().tamper_transaction_id = true;
    }

    /// Backdate the signingTime of replies
    pub fn skew_signing_time(&self, skew: Duration) {
        self.behaviour.lock().unwrap().signing_time_skew = Some(skew);
    }

    /// Sign replies with a certificate the client does not know
    pub fn sign_with_rogue_key(&self) {
        self.behaviour.lock().unwrap().rogue_signer = true;
    }

    /// Use a different Content-Type for PKIOperation replies
    pub fn reply_content_type(&self, content_type: &'static str) {
        self.behaviour.lock().unwrap().content_type = Some(content_type);
    }

    /// Introduce `defect` into every following CertRep
    pub fn malform(&self, defect: Malformed) {
        self.behaviour.lock().unwrap().malformed = Some(defect);
    }

    /// PKIOperation requests received so far
    pub fn requests(&self) -> Vec<ObservedRequest> {
        self.behaviour.lock().unwrap().requests.clone()
    }

    /// Number of HTTP requests for `operation`
    pub async fn count(&self, operation: &str) -> usize {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|r| {
                r.url
                    .query_pairs()
                    .any(|(k, v)| k == "operation" && v == operation)
            })
            .count()
    }

    /// Mock GetNextCACert signed by the current signing certificate
    pub async fn mock_next_ca_cert(&self, next: &[Certificate]) {
        let body = codec::encode_next_ca_message(
            &RsaCrypto::new(),
            next,
            &self.authority.signer_key,
            &SignerOptions::new(&self.authority.signer_cert, HashAlgorithm::Sha256),
        )
        .expect("GetNextCACert reply encodes");
        self.mock_next_ca_cert_raw(content_types::X509_NEXT_CA_CERT, body)
            .await;
    }

    /// Mock GetNextCACert signed by `key`/`cert`
    pub async fn mock_next_ca_cert_signed_by(
        &self,
        next: &[Certificate],
        key: &RsaPrivateKey,
        cert: &Certificate,
    ) {
        let body = codec::encode_next_ca_message(
            &RsaCrypto::new(),
            next,
            key,
            &SignerOptions::new(cert, HashAlgorithm::Sha256),
        )
        .expect("GetNextCACert reply encodes");
        self.mock_next_ca_cert_raw(content_types::X509_NEXT_CA_CERT, body)
            .await;
    }

    /// Mock GetNextCACert with a fixed body
    pub async fn mock_next_ca_cert_raw(&self, content_type: &str, body: Vec<u8>) {
        Mock::given(method("GET"))
            .and(query_param("operation", "GetNextCACert"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, content_type))
            .mount(&self.server)
            .await;
    }

    /// Client configuration pointing at this server
    pub fn config(&self) -> ScepClientConfigBuilder {
        ScepClientConfig::builder()
            .ca_url(self.url())
            .expect("Valid URL")
    }

    /// Client trusting the test CA
    pub fn client(&self) -> ScepClient {
        self.client_with(self.config())
    }

    /// Client trusting the test CA with a customised configuration
    pub fn client_with(&self, config: ScepClientConfigBuilder) -> ScepClient {
        let config = config.build().expect("Valid config");
        ScepClient::new(
            config,
            PreprovisionedCaCertValidator::new(vec![fixtures::ca()]),
        )
        .expect("Client creation failed")
    }
}

/// Decodes PKIOperation requests and answers with a CertRep
struct PkiOperationResponder {
    authority: Arc<Authority>,
    behaviour: Arc<Mutex<Behaviour>>,
}

impl Respond for PkiOperationResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        match self.handle(request) {
            Ok(response) => response,
            Err(e) => ResponseTemplate::new(400).set_body_string(e.to_string()),
        }
    }
}

impl PkiOperationResponder {
    fn handle(&self, request: &Request) -> scep_client::Result<ResponseTemplate> {
        let http_method = request.method.to_string();
        let message = if http_method == "POST" {
            request.body.clone()
        } else {
            let encoded = request
                .url
                .query_pairs()
                .find(|(k, _)| k == "message")
                .map(|(_, v)| v.into_owned())
                .ok_or_else(|| ScepError::protocol_failure("missing message parameter"))?;
            BASE64_STANDARD.decode(encoded)?
        };

        let crypto = RsaCrypto::new();
        let authority = &self.authority;

        // The client is only known through the certificate it embeds
        let embedded = codec::decode_pki_message(
            &crypto,
            &message,
            &authority.decrypt_key,
            &authority.decrypt_cert,
            &[],
        )?;
        let decoded = codec::decode_pki_message(
            &crypto,
            &message,
            &authority.decrypt_key,
            &authority.decrypt_cert,
            &embedded.certificates,
        )?;
        let client_cert = decoded
            .signature_cert
            .clone()
            .ok_or_else(|| ScepError::protocol_failure("request signer not embedded"))?;

        let mut behaviour = self.behaviour.lock().unwrap();
        behaviour.requests.push(ObservedRequest {
            method: http_method,
            message_type: decoded.message_type,
            transaction_id: decoded.transaction_id.clone(),
            digest_algorithm: decoded.digest_algorithm,
            content_encryption: decoded.content_encryption,
            signature_valid: decoded.signature_valid,
            signer: decoded.signature_cert.clone(),
            message_data: decoded.message_data.clone(),
        });

        let next = behaviour.replies.pop_front().unwrap_or(Reply::Success);
        let mut reply = PkiMessage::cert_rep(&decoded, next.status());
        match next {
            Reply::Success => {
                let content = match decoded.message_type {
                    MessageType::GetCrl => pkcs7::build_certs_only(&[], &[fixtures::crl()])?,
                    _ => pkcs7::build_certs_only(&[fixtures::issued()], &[])?,
                };
                reply.message_data = Some(MessageData::Der(content));
            }
            Reply::Failure(fail_info) => {
                reply.fail_info = Some(fail_info);
                reply.fail_info_text = Some("rejected by test CA".to_string());
            }
            Reply::Pending => {}
        }

        if behaviour.tamper_nonce {
            reply.recipient_nonce = Some(Nonce::random());
        }
        if behaviour.tamper_transaction_id {
            reply.transaction_id = TransactionId::random();
        }
        match behaviour.malformed {
            Some(Malformed::NoPkiStatus) => reply.pki_status = None,
            Some(Malformed::FailureWithoutFailInfo) => {
                reply.pki_status = Some(PkiStatus::Failure);
                reply.fail_info = None;
                reply.message_data = None;
            }
            Some(Malformed::SuccessWithoutContent) => {
                reply.pki_status = Some(PkiStatus::Success);
                reply.message_data = None;
            }
            Some(Malformed::MessageType(message_type)) => reply.message_type = message_type,
            _ => {}
        }
        let recipient = match behaviour.malformed {
            Some(Malformed::WrongRecipient) => fixtures::cert("other-ca.pem"),
            _ => client_cert,
        };

        let rogue = (
            fixtures::key("rogue-key.pem"),
            fixtures::cert("rogue-ra.pem"),
        );
        let (signer_key, signer_cert) = if behaviour.rogue_signer {
            (&rogue.0, &rogue.1)
        } else {
            (&authority.signer_key, &authority.signer_cert)
        };

        let mut signer = SignerOptions::new(signer_cert, HashAlgorithm::Sha256);
        signer.signing_time = behaviour
            .signing_time_skew
            .map(|skew| SystemTime::now() - skew);

        let mut body = codec::encode_pki_message(
            &crypto,
            &reply,
            signer_key,
            &signer,
            &recipient,
            decoded
                .content_encryption
                .unwrap_or(ContentEncryptionAlgorithm::Aes128Cbc),
        )?;
        if behaviour.malformed == Some(Malformed::UnknownPkiStatus) {
            overwrite_pki_status(&mut body, b'7')?;
        }

        let content_type = behaviour.content_type.unwrap_or(content_types::PKI_MESSAGE);
        Ok(ResponseTemplate::new(200).set_body_raw(body, content_type))
    }
}

/// Overwrite the single-digit pkiStatus value in an encoded pkiMessage
///
/// The signature no longer verifies afterwards.
fn overwrite_pki_status(message: &mut [u8], code: u8) -> scep_client::Result<()> {
    let oid = oids::SCEP_PKI_STATUS.as_bytes();
    let mut pattern = vec![0x06, oid.len() as u8];
    pattern.extend_from_slice(oid);
    // SET { PrintableString (1 byte) }
    pattern.extend_from_slice(&[0x31, 0x03, 0x13, 0x01]);

    let position = message
        .windows(pattern.len())
        .position(|window| window == pattern.as_slice())
        .ok_or_else(|| ScepError::protocol_failure("pkiStatus attribute not found"))?;
    message[position + pattern.len()] = code;
    Ok(())
}

#[tokio::test]
async fn test_mock_server_serves_caps() {
    let mock = MockScepServer::start("AES\nPOSTPKIOperation\nSHA-256").await;

    let response = reqwest::get(format!("{}?operation=GetCACaps", mock.url()))
        .await
        .unwrap();
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        content_types::TEXT_PLAIN
    );
    assert_eq!(response.text().await.unwrap(), "AES\nPOSTPKIOperation\nSHA-256");
}

#[tokio::test]
async fn test_fixtures_load() {
    let csr = fixtures::csr();
    assert_eq!(
        csr.info.subject,
        fixtures::self_signed().tbs_certificate.subject
    );
    assert_eq!(
        fixtures::crl().tbs_cert_list.issuer,
        fixtures::ca().tbs_certificate.subject
    );
}
