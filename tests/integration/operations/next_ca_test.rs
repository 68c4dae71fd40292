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

//! Integration tests for GetNextCACert

use crate::integration::{fixtures, CaCertReply, MockScepServer};
use scep_client::types::{content_types, pkcs7};
use scep_client::ScepError;

const CAPS: &str = "AES\nPOSTPKIOperation\nSHA-256\nGetNextCACert";

#[tokio::test]
async fn test_next_ca_cert() {
    let mock = MockScepServer::start(CAPS).await;
    let next_ca = fixtures::cert("next-ca.pem");
    mock.mock_next_ca_cert(std::slice::from_ref(&next_ca)).await;
    let client = mock.client();

    let next = client.scep_next_ca_cert().await.expect("GetNextCACert failed");
    assert_eq!(next.ca_cert(), &next_ca);
    assert!(!next.has_ra());

    // The client keeps using the current CA
    assert_eq!(client.ca_cert().await, Some(fixtures::ca()));
    assert_eq!(
        client.authority_cert_store().await.unwrap().ca_cert(),
        &fixtures::ca()
    );
}

#[tokio::test]
async fn test_next_ca_cert_signed_by_ra() {
    let mock = MockScepServer::start_with(CAPS, CaCertReply::CaWithRa).await;
    let next_ca = fixtures::cert("next-ca.pem");
    mock.mock_next_ca_cert(std::slice::from_ref(&next_ca)).await;

    let next = mock.client().scep_next_ca_cert().await.unwrap();
    assert_eq!(next.ca_cert(), &next_ca);
}

#[tokio::test]
async fn test_next_ca_cert_requires_capability() {
    let mock = MockScepServer::start("AES\nPOSTPKIOperation\nSHA-256").await;
    mock.mock_next_ca_cert(&[fixtures::cert("next-ca.pem")]).await;

    let result = mock.client().scep_next_ca_cert().await;
    assert!(matches!(result, Err(ScepError::UnsupportedOperation(_))));
    assert_eq!(mock.count("GetNextCACert").await, 0);
}

#[tokio::test]
async fn test_next_ca_cert_signed_by_unknown_key() {
    let mock = MockScepServer::start(CAPS).await;
    let next_ca = fixtures::cert("next-ca.pem");
    mock.mock_next_ca_cert_signed_by(
        std::slice::from_ref(&next_ca),
        &fixtures::key("next-ca-key.pem"),
        &next_ca,
    )
    .await;

    let result = mock.client().scep_next_ca_cert().await;
    assert!(
        matches!(result, Err(ScepError::BadSignature)),
        "unexpected result: {:?}",
        result
    );
}

#[tokio::test]
async fn test_next_ca_cert_wrong_content_type() {
    let mock = MockScepServer::start(CAPS).await;
    let body = pkcs7::build_certs_only(&[fixtures::cert("next-ca.pem")], &[]).unwrap();
    mock.mock_next_ca_cert_raw(content_types::X509_CA_RA_CERT, body)
        .await;

    let result = mock.client().scep_next_ca_cert().await;
    assert!(matches!(
        result,
        Err(ScepError::InvalidContentType { .. })
    ));
}
