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

//! Integration tests for GetCACaps and GetCACert

use crate::integration::{fixtures, CaCertReply, MockScepServer};
use der::Encode;
use scep_client::types::{content_types, pkcs7, HashAlgorithm};
use scep_client::validator::format_fingerprint;
use scep_client::{
    CaCapability, FingerprintCaCertValidator, ScepClient, ScepClientConfig, ScepError,
};
use wiremock::MockServer;

const CAPS: &str = "AES\nPOSTPKIOperation\nRenewal\nSHA-256\nGetNextCACert";

#[tokio::test]
async fn test_lazy_initialization() {
    let mock = MockScepServer::start(CAPS).await;
    let client = mock.client();

    // Nothing is fetched until an operation needs it
    assert!(client.ca_cert().await.is_none());
    assert_eq!(mock.count("GetCACaps").await, 0);

    let caps = client.ca_caps().await.expect("GetCACaps failed");
    assert!(caps.contains(CaCapability::Aes));
    assert!(caps.contains(CaCapability::Renewal));
    assert!(caps.supports_post());
    assert_eq!(caps.most_secure_hash_algorithm(), HashAlgorithm::Sha256);

    assert_eq!(client.ca_cert().await, Some(fixtures::ca()));

    client.authority_cert_store().await.unwrap();
    client.init().await.unwrap();
    assert_eq!(mock.count("GetCACaps").await, 1);
    assert_eq!(mock.count("GetCACert").await, 1);
}

#[tokio::test]
async fn test_ca_only_store() {
    let mock = MockScepServer::start(CAPS).await;
    let client = mock.client();

    let store = client.authority_cert_store().await.unwrap();
    assert!(!store.has_ra());
    assert_eq!(store.ca_cert(), &fixtures::ca());
    assert_eq!(store.signature_cert(), &fixtures::ca());
    assert_eq!(store.encryption_cert(), &fixtures::ca());
}

#[tokio::test]
async fn test_ca_with_ra_store() {
    let mock = MockScepServer::start_with(CAPS, CaCertReply::CaWithRa).await;
    let client = mock.client();

    let store = client.authority_cert_store().await.unwrap();
    assert!(store.has_ra());
    assert_eq!(store.ca_cert(), &fixtures::ca());
    assert_eq!(store.signature_cert(), &fixtures::cert("ra-sign.pem"));
    assert_eq!(store.encryption_cert(), &fixtures::cert("ra-enc.pem"));
}

#[tokio::test]
async fn test_ra_not_issued_by_ca() {
    let body = pkcs7::build_certs_only(&[fixtures::ca(), fixtures::cert("rogue-ra.pem")], &[])
        .unwrap();
    let mock = MockScepServer::start_with(
        CAPS,
        CaCertReply::Raw {
            content_type: content_types::X509_CA_RA_CERT,
            body,
        },
    )
    .await;

    let result = mock.client().init().await;
    assert!(
        matches!(result, Err(ScepError::InvalidCaResponse(_))),
        "unexpected result: {:?}",
        result
    );
}

#[tokio::test]
async fn test_ca_ra_bundle_without_ra() {
    let body = pkcs7::build_certs_only(&[fixtures::ca()], &[]).unwrap();
    let mock = MockScepServer::start_with(
        CAPS,
        CaCertReply::Raw {
            content_type: content_types::X509_CA_RA_CERT,
            body,
        },
    )
    .await;

    let result = mock.client().init().await;
    assert!(matches!(result, Err(ScepError::InvalidCaResponse(_))));
}

#[tokio::test]
async fn test_ca_ra_bundle_with_two_cas() {
    let body =
        pkcs7::build_certs_only(&[fixtures::ca(), fixtures::cert("other-ca.pem")], &[]).unwrap();
    let mock = MockScepServer::start_with(
        CAPS,
        CaCertReply::Raw {
            content_type: content_types::X509_CA_RA_CERT,
            body,
        },
    )
    .await;

    let result = mock.client().init().await;
    assert!(matches!(result, Err(ScepError::InvalidCaResponse(_))));
}

#[tokio::test]
async fn test_untrusted_ca() {
    let mock = MockScepServer::start_with(
        CAPS,
        CaCertReply::Raw {
            content_type: content_types::X509_CA_CERT,
            body: fixtures::cert("other-ca.pem").to_der().unwrap(),
        },
    )
    .await;
    let client = mock.client();

    let result = client.init().await;
    match result {
        Err(ScepError::UntrustedCa(subject)) => assert!(subject.contains("Other Test CA")),
        other => panic!("Expected UntrustedCa, got {:?}", other),
    }

    // A failed initialization leaves the client uninitialized
    assert!(client.ca_cert().await.is_none());
}

#[tokio::test]
async fn test_unexpected_ca_cert_content_type() {
    let mock = MockScepServer::start_with(
        CAPS,
        CaCertReply::Raw {
            content_type: "application/pkcs7-mime",
            body: fixtures::ca().to_der().unwrap(),
        },
    )
    .await;

    let result = mock.client().init().await;
    assert!(matches!(result, Err(ScepError::InvalidCaResponse(_))));
}

#[tokio::test]
async fn test_refresh_replaces_state() {
    let mock = MockScepServer::start(CAPS).await;
    let client = mock.client();

    let before = client.authority_cert_store().await.unwrap();
    client.refresh().await.unwrap();
    client.refresh().await.unwrap();
    let after = client.authority_cert_store().await.unwrap();

    assert_eq!(before, after);
    assert!(client.ca_caps().await.unwrap().supports_renewal());
    assert_eq!(mock.count("GetCACaps").await, 3);
    assert_eq!(mock.count("GetCACert").await, 3);
}

#[tokio::test]
async fn test_profile_sent_with_get_operations() {
    let mock = MockScepServer::start(CAPS).await;
    let client = mock.client_with(mock.config().profile("tls-server"));

    client.init().await.unwrap();
    assert_eq!(client.ca_id().await.unwrap().profile(), Some("tls-server"));

    let requests = mock.inner().received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);
    for request in requests {
        let message = request
            .url
            .query_pairs()
            .find(|(k, _)| k == "message")
            .map(|(_, v)| v.into_owned());
        assert_eq!(message.as_deref(), Some("tls-server"));
    }
}

#[tokio::test]
async fn test_base_url_query_kept() {
    let mock = MockScepServer::start(CAPS).await;
    let config = ScepClientConfig::builder()
        .ca_url(format!("{}?tenant=acme", mock.url()))
        .unwrap();
    let client = mock.client_with(config);

    client.init().await.unwrap();

    let requests = mock.inner().received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);
    for request in requests {
        let tenant = request
            .url
            .query_pairs()
            .find(|(k, _)| k == "tenant")
            .map(|(_, v)| v.into_owned());
        assert_eq!(tenant.as_deref(), Some("acme"));
    }
}

#[tokio::test]
async fn test_fingerprint_validator() {
    let mock = MockScepServer::start(CAPS).await;

    let fingerprint =
        FingerprintCaCertValidator::compute_fingerprint(&fixtures::ca(), HashAlgorithm::Sha256)
            .unwrap();
    let validator = FingerprintCaCertValidator::new()
        .with_sha256(&format_fingerprint(&fingerprint))
        .unwrap();

    let config = mock.config().build().unwrap();
    let client = ScepClient::new(config, validator).unwrap();

    client.init().await.expect("CA should be trusted by fingerprint");
    assert_eq!(client.ca_cert().await, Some(fixtures::ca()));
}

#[tokio::test]
async fn test_http_error_is_transport_error() {
    // No mocks mounted: every request gets a 404
    let server = MockServer::start().await;
    let config = ScepClientConfig::builder()
        .ca_url(format!("{}/scep", server.uri()))
        .unwrap()
        .build()
        .unwrap();
    let client = ScepClient::new(config, |_: &scep_client::Certificate| true).unwrap();

    let err = client.init().await.unwrap_err();
    assert!(err.is_transport(), "unexpected error: {:?}", err);
}
