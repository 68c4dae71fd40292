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

//! Integration tests for CertPoll

use crate::integration::{fixtures, MockScepServer, Reply};
use scep_client::types::MessageData;
use scep_client::{FailInfo, MessageType};

const CAPS: &str = "AES\nPOSTPKIOperation\nSHA-256";

#[tokio::test]
async fn test_pending_then_issued() {
    let mock = MockScepServer::start(CAPS).await;
    mock.reply_with(&[Reply::Pending, Reply::Pending, Reply::Success]);
    let client = mock.client();

    let key = fixtures::client_key();
    let identity = fixtures::self_signed();
    let csr = fixtures::csr();

    let response = client.scep_enrol(&csr, &key, &identity).await.unwrap();
    assert!(response.is_pending());
    assert!(response.certificates().is_empty());
    let transaction_id = response.transaction_id().clone();

    let issuer = client.ca_cert().await.unwrap().tbs_certificate.subject;

    // Poll using the original request
    let response = client
        .scep_cert_poll_for_csr(&key, &identity, &csr, &issuer)
        .await
        .unwrap();
    assert!(response.is_pending());
    assert_eq!(response.transaction_id(), &transaction_id);

    // Poll using the transaction ID and names
    let response = client
        .scep_cert_poll(&key, &identity, &transaction_id, &issuer, &csr.info.subject)
        .await
        .unwrap();
    assert!(response.is_success());
    assert_eq!(response.certificates(), &[fixtures::issued()]);

    let requests = mock.requests();
    let types: Vec<_> = requests.iter().map(|r| r.message_type).collect();
    assert_eq!(
        types,
        vec![
            MessageType::PkcsReq,
            MessageType::CertPoll,
            MessageType::CertPoll
        ]
    );
    assert!(requests.iter().all(|r| r.transaction_id == transaction_id));

    let expected = MessageData::issuer_and_subject(issuer, csr.info.subject.clone())
        .to_der()
        .unwrap();
    assert_eq!(requests[1].message_data.as_ref(), Some(&expected));
    assert_eq!(requests[2].message_data.as_ref(), Some(&expected));
}

#[tokio::test]
async fn test_poll_rejected() {
    let mock = MockScepServer::start(CAPS).await;
    mock.reply_with(&[Reply::Failure(FailInfo::BadCertId)]);
    let client = mock.client();

    let csr = fixtures::csr();
    let response = client
        .scep_cert_poll_for_csr(
            &fixtures::client_key(),
            &fixtures::self_signed(),
            &csr,
            &fixtures::ca().tbs_certificate.subject,
        )
        .await
        .unwrap();

    assert!(response.is_failure());
    assert_eq!(response.fail_info(), Some(FailInfo::BadCertId));
}
