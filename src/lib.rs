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

//! # scep-client
//!
//! A Rust implementation of an RFC 8894 SCEP (Simple Certificate Enrolment
//! Protocol) client.
//!
//! SCEP carries PKCS#7/CMS signed-and-enveloped messages over plain HTTP.
//! This library negotiates capabilities with the CA, validates the CA and RA
//! certificates, and runs the enrolment state machine with transaction IDs
//! and nonces.
//!
//! ## Features
//!
//! - **Async-first design** using Tokio
//! - **All SCEP operations**: GetCACaps, GetCACert, GetNextCACert, PKCSReq,
//!   RenewalReq, UpdateReq, CertPoll, GetCert, GetCRL
//! - **Capability negotiation**: POST vs. GET, AES/3DES/DES, SHA-1/SHA-2
//! - **Response checks**: signer pinning, nonce and transaction correlation,
//!   signing-time window
//! - **Pluggable ports** for HTTP transport, CA trust and private key
//!   operations
//!
//! ## Quick Start
//!
//! ```no_run
//! use scep_client::{FingerprintCaCertValidator, ScepClient, ScepClientConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ScepClientConfig::builder()
//!         .ca_url("http://ca.example.com/scep")?
//!         .build()?;
//!
//!     // Trust the CA certificate with this fingerprint
//!     let validator = FingerprintCaCertValidator::new().with_sha256(
//!         "4F:9C:1A:0B:77:10:2E:5D:3C:88:AA:01:F2:6B:90:DE:13:47:5A:C0:8E:6F:21:9B:44:D1:0C:7A:E3:58:B6:02",
//!     )?;
//!
//!     let client = ScepClient::new(config, validator)?;
//!
//!     let caps = client.ca_caps().await?;
//!     println!("CA capabilities: {}", caps);
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Enrolment and polling
//!
//! ```no_run
//! use scep_client::{ScepClient, ScepClientConfig};
//! use x509_cert::request::CertReq;
//! use x509_cert::Certificate;
//!
//! # async fn example(
//! #     client: ScepClient,
//! #     csr: CertReq,
//! #     key: rsa::RsaPrivateKey,
//! #     self_signed: Certificate,
//! # ) -> Result<(), Box<dyn std::error::Error>> {
//! let mut response = client.scep_enrol(&csr, &key, &self_signed).await?;
//!
//! while response.is_pending() {
//!     tokio::time::sleep(std::time::Duration::from_secs(60)).await;
//!     let issuer = client.ca_cert().await.unwrap().tbs_certificate.subject;
//!     response = client
//!         .scep_cert_poll_for_csr(&key, &self_signed, &csr, &issuer)
//!         .await?;
//! }
//!
//! if response.is_success() {
//!     println!("Issued {} certificate(s)", response.certificates().len());
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod client;
pub mod codec;
pub mod config;
pub mod crypto;
pub mod error;
pub mod transport;
pub mod types;
pub mod validator;

// Re-export main types at crate root for convenience
pub use client::ScepClient;
pub use config::{CaIdentifier, ScepClientConfig, ScepClientConfigBuilder};
pub use crypto::{RsaCrypto, ScepCrypto};
pub use error::{Result, ScepError};
pub use transport::{HttpTransport, ScepHttpResponse, ScepTransport};
pub use types::{
    AuthorityCertStore, CaCapability, CaCaps, EnrolmentResponse, FailInfo, MessageType,
    Operation, PkiStatus, TransactionId,
};
pub use validator::{CaCertValidator, FingerprintCaCertValidator, PreprovisionedCaCertValidator};

// Re-export x509_cert::Certificate for convenience
pub use x509_cert::Certificate;

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// User-Agent string for HTTP requests.
pub const USER_AGENT: &str = concat!("scep-client/", env!("CARGO_PKG_VERSION"));
