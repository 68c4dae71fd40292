//! Error types for the SCEP client.
//!
//! This module defines all error types that can occur during SCEP operations,
//! including transport errors, CMS parsing errors, and the protocol and trust
//! failures raised while validating CA responses.

use thiserror::Error;

use crate::types::{FailInfo, PkiStatus};

/// Result type alias using [`ScepError`].
pub type Result<T> = std::result::Result<T, ScepError>;

/// Errors that can occur during SCEP client operations.
#[derive(Debug, Error)]
pub enum ScepError {
    /// The server answered with a non-success HTTP status.
    #[error("Transport error: {0}")]
    Transport(String),

    /// HTTP request or response error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Response Content-Type header does not match the operation.
    #[error("Invalid content-type: expected '{expected}', got '{actual}'")]
    InvalidContentType {
        /// Expected content-type.
        expected: String,
        /// Actual content-type received.
        actual: String,
    },

    /// Failed to parse a CMS/PKCS#7 structure.
    #[error("Malformed CMS: {0}")]
    MalformedCms(String),

    /// The response signer is unknown or its signature does not verify.
    #[error("Response signature is invalid or the signer is unknown")]
    BadSignature,

    /// The enveloped content could not be opened with the recipient key.
    #[error("Could not decrypt the enveloped response content")]
    DecryptionFailed,

    /// The response recipientNonce does not echo the request senderNonce.
    #[error("Response recipientNonce does not match the request senderNonce")]
    NonceMismatch,

    /// The response transactionID differs from the request.
    #[error("Transaction ID mismatch: expected '{expected}', got '{actual}'")]
    TransactionIdMismatch {
        /// Transaction ID sent in the request.
        expected: String,
        /// Transaction ID received in the response.
        actual: String,
    },

    /// The response signingTime is missing or outside the permitted window.
    #[error("Response signing time out of range: {0}")]
    SigningTimeOutOfRange(String),

    /// The CA certificate validator rejected the CA certificate.
    #[error("CA certificate is not trusted: {0}")]
    UntrustedCa(String),

    /// The response was signed by a certificate other than the pinned signer.
    #[error("Response signer is not the authority signature certificate")]
    UntrustedSigner,

    /// GetCACert or GetNextCACert returned unusable content.
    #[error("Invalid CA response: {0}")]
    InvalidCaResponse(String),

    /// The CA has not advertised the capability required by the operation.
    #[error("Operation not supported by the CA: {0}")]
    UnsupportedOperation(String),

    /// No acceptable content encryption or signature algorithm is available.
    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// The response could not be interpreted as a SCEP message.
    #[error("Protocol failure: {0}")]
    ProtocolFailure(String),

    /// The server returned a non-success status for a non-enrolment operation.
    #[error("Server returned status {status}{}", fail_info.map(|f| format!(" ({})", f)).unwrap_or_default())]
    ServerStatus {
        /// Status returned by the server.
        status: PkiStatus,
        /// Failure reason, if provided.
        fail_info: Option<FailInfo>,
        /// Free-form failure text, if provided.
        fail_info_text: Option<String>,
    },

    /// A caller-supplied argument violates an operation precondition.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Failure inside the crypto provider.
    #[error("Crypto error: {0}")]
    Crypto(String),

    /// Configuration could not be parsed or is incomplete.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Base64 decoding error.
    #[error("Base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),

    /// DER encoding/decoding error.
    #[error("DER error: {0}")]
    Der(#[from] der::Error),

    /// URL parsing error.
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),
}

impl ScepError {
    /// Create a transport error with the given message.
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Create an invalid content-type error.
    pub fn invalid_content_type(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::InvalidContentType {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Create a malformed CMS error with the given message.
    pub fn malformed_cms(msg: impl Into<String>) -> Self {
        Self::MalformedCms(msg.into())
    }

    /// Create a signing time error with the given message.
    pub fn signing_time_out_of_range(msg: impl Into<String>) -> Self {
        Self::SigningTimeOutOfRange(msg.into())
    }

    /// Create an untrusted CA error with the given message.
    pub fn untrusted_ca(msg: impl Into<String>) -> Self {
        Self::UntrustedCa(msg.into())
    }

    /// Create an invalid CA response error with the given message.
    pub fn invalid_ca_response(msg: impl Into<String>) -> Self {
        Self::InvalidCaResponse(msg.into())
    }

    /// Create an unsupported operation error.
    pub fn unsupported_operation(operation: impl Into<String>) -> Self {
        Self::UnsupportedOperation(operation.into())
    }

    /// Create an unsupported algorithm error.
    pub fn unsupported_algorithm(msg: impl Into<String>) -> Self {
        Self::UnsupportedAlgorithm(msg.into())
    }

    /// Create a protocol failure error.
    pub fn protocol_failure(msg: impl Into<String>) -> Self {
        Self::ProtocolFailure(msg.into())
    }

    /// Create a server status error.
    pub fn server_status(
        status: PkiStatus,
        fail_info: Option<FailInfo>,
        fail_info_text: Option<String>,
    ) -> Self {
        Self::ServerStatus {
            status,
            fail_info,
            fail_info_text,
        }
    }

    /// Create an invalid argument error.
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create a crypto error.
    pub fn crypto(msg: impl Into<String>) -> Self {
        Self::Crypto(msg.into())
    }

    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Returns true if the error originated in the HTTP layer.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Http(_))
    }

    /// Returns true if a response failed an authenticity or trust check.
    ///
    /// These errors must never be retried blindly against the same server.
    pub fn is_security_failure(&self) -> bool {
        matches!(
            self,
            Self::BadSignature
                | Self::DecryptionFailed
                | Self::NonceMismatch
                | Self::TransactionIdMismatch { .. }
                | Self::SigningTimeOutOfRange(_)
                | Self::UntrustedCa(_)
                | Self::UntrustedSigner
        )
    }

    /// Returns the server status if this is a `ServerStatus` error.
    pub fn pki_status(&self) -> Option<PkiStatus> {
        match self {
            Self::ServerStatus { status, .. } => Some(*status),
            _ => None,
        }
    }
}
