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

//! Integration tests for GetCert and GetCRL

use crate::integration::{fixtures, MockScepServer, Reply};
use scep_client::types::MessageData;
use scep_client::{FailInfo, MessageType, PkiStatus, ScepError, TransactionId};

const CAPS: &str = "AES\nPOSTPKIOperation\nSHA-256";

#[tokio::test]
async fn test_get_cert() {
    let mock = MockScepServer::start(CAPS).await;
    let client = mock.client();
    let issued = fixtures::issued();

    let certs = client
        .scep_get_cert(
            &fixtures::client_key(),
            &issued,
            &issued.tbs_certificate.issuer,
            &issued.tbs_certificate.serial_number,
        )
        .await
        .expect("GetCert failed");
    assert_eq!(certs, vec![issued.clone()]);

    let request = &mock.requests()[0];
    assert_eq!(request.message_type, MessageType::GetCert);
    let expected = MessageData::issuer_and_serial(
        issued.tbs_certificate.issuer.clone(),
        issued.tbs_certificate.serial_number.clone(),
    )
    .to_der()
    .unwrap();
    assert_eq!(request.message_data, Some(expected));

    // Retrieval uses a random transaction ID
    let key_id =
        TransactionId::from_public_key(&issued.tbs_certificate.subject_public_key_info).unwrap();
    assert_ne!(request.transaction_id, key_id);
}

#[tokio::test]
async fn test_get_crl() {
    let mock = MockScepServer::start(CAPS).await;
    let client = mock.client();
    let issued = fixtures::issued();

    let crl = client
        .scep_get_crl(
            &fixtures::client_key(),
            &issued,
            &issued.tbs_certificate.issuer,
            &issued.tbs_certificate.serial_number,
        )
        .await
        .expect("GetCRL failed");

    assert_eq!(crl, fixtures::crl());
    assert_eq!(mock.requests()[0].message_type, MessageType::GetCrl);
}

#[tokio::test]
async fn test_get_cert_failure_is_an_error() {
    let mock = MockScepServer::start(CAPS).await;
    mock.reply_with(&[Reply::Failure(FailInfo::BadCertId)]);
    let client = mock.client();
    let issued = fixtures::issued();

    let err = client
        .scep_get_cert(
            &fixtures::client_key(),
            &issued,
            &issued.tbs_certificate.issuer,
            &issued.tbs_certificate.serial_number,
        )
        .await
        .unwrap_err();

    match &err {
        ScepError::ServerStatus {
            status,
            fail_info,
            fail_info_text,
        } => {
            assert_eq!(*status, PkiStatus::Failure);
            assert_eq!(*fail_info, Some(FailInfo::BadCertId));
            assert_eq!(fail_info_text.as_deref(), Some("rejected by test CA"));
        }
        other => panic!("Expected ServerStatus, got {:?}", other),
    }
    assert_eq!(err.pki_status(), Some(PkiStatus::Failure));
}

#[tokio::test]
async fn test_get_crl_pending_is_an_error() {
    let mock = MockScepServer::start(CAPS).await;
    mock.reply_with(&[Reply::Pending]);
    let client = mock.client();
    let issued = fixtures::issued();

    let err = client
        .scep_get_crl(
            &fixtures::client_key(),
            &issued,
            &issued.tbs_certificate.issuer,
            &issued.tbs_certificate.serial_number,
        )
        .await
        .unwrap_err();

    assert_eq!(err.pki_status(), Some(PkiStatus::Pending));
}
