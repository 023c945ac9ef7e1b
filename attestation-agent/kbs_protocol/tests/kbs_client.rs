// Copyright (c) 2024 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

use std::{sync::atomic::Ordering, time::Duration};

use kbs_protocol::{
    evidence_provider::MockedEvidenceProvider, Error, KbsClient, KbsClientBuilder, ProtocolMode,
    RetryPolicy,
};
use resource_uri::ResourceUri;
use rstest::rstest;
use test_utils::{MockKbs, MockKbsConfig, ResourceReply};

const KEY: &[u8] = b"0123456789abcdef0123456789abcdef";

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        initial_backoff: Duration::from_millis(5),
        max_backoff: Duration::from_millis(20),
        ..Default::default()
    }
}

fn client(kbs: &MockKbs, provider: MockedEvidenceProvider) -> KbsClientBuilder {
    KbsClientBuilder::with_evidence_provider(Box::new(provider), &kbs.url())
        .set_retry_policy(fast_retry())
}

fn key_uri() -> ResourceUri {
    ResourceUri::from_resource_path("default/key/encryption-key").unwrap()
}

async fn fetch(client: &KbsClient) -> kbs_protocol::Result<Vec<u8>> {
    client
        .fetch_resource(&key_uri())
        .await
        .map(|r| r.as_bytes().to_vec())
}

#[rstest]
#[case::modes_absent(None)]
#[case::background_check_only(Some(vec!["background-check"]))]
#[tokio::test]
async fn background_check_releases_key(#[case] modes: Option<Vec<&str>>) {
    let mut config = MockKbsConfig::with_payload(KEY);
    if let Some(modes) = modes {
        config = config.modes(&modes);
    }
    let kbs = MockKbs::start(config);
    let client = client(&kbs, MockedEvidenceProvider::default()).build().unwrap();

    assert_eq!(fetch(&client).await.unwrap(), KEY);

    let stats = kbs.stats();
    assert_eq!((stats.auth, stats.attest, stats.resource), (1, 1, 1));
    assert_eq!(kbs.resource_paths(), vec!["default/key/encryption-key"]);
}

#[tokio::test]
async fn passport_token_is_redeemed_at_the_kbs() {
    let kbs = MockKbs::start(MockKbsConfig {
        issue_token: true,
        ..MockKbsConfig::with_payload(KEY).modes(&["passport"])
    });
    let client = client(&kbs, MockedEvidenceProvider::default()).build().unwrap();

    assert_eq!(fetch(&client).await.unwrap(), KEY);
    assert_eq!(kbs.stats().attest, 1);
}

#[tokio::test]
async fn unknown_advertised_modes_are_skipped() {
    let kbs = MockKbs::start(MockKbsConfig {
        issue_token: true,
        ..MockKbsConfig::with_payload(KEY).modes(&["future-mode", "passport"])
    });
    let client = client(&kbs, MockedEvidenceProvider::default())
        .set_protocol_mode(ProtocolMode::Passport)
        .build()
        .unwrap();

    assert_eq!(fetch(&client).await.unwrap(), KEY);
    assert_eq!(kbs.stats().attest, 1);
}

#[tokio::test]
async fn passport_token_from_separate_issuer() {
    let issuer = MockKbs::start(MockKbsConfig {
        issue_token: true,
        ..Default::default()
    });
    let kbs = MockKbs::start(MockKbsConfig::with_payload(KEY).modes(&["passport"]));
    let client = client(&kbs, MockedEvidenceProvider::default())
        .set_protocol_mode(ProtocolMode::Passport)
        .set_token_issuer_url(&issuer.url())
        .build()
        .unwrap();

    assert_eq!(fetch(&client).await.unwrap(), KEY);

    // evidence went to the issuer only
    assert_eq!(kbs.stats().attest, 0);
    assert_eq!(issuer.stats().attest, 1);
    assert_eq!(kbs.stats().resource, 1);
}

#[tokio::test]
async fn unadvertised_mode_fails_before_evidence() {
    let kbs = MockKbs::start(MockKbsConfig::with_payload(KEY).modes(&["background-check"]));
    let provider = MockedEvidenceProvider::default();
    let evidence_calls = provider.calls();
    let client = client(&kbs, provider)
        .set_protocol_mode(ProtocolMode::Passport)
        .build()
        .unwrap();

    let err = fetch(&client).await.unwrap_err();
    match err {
        Error::ProtocolModeMismatch {
            requested,
            advertised,
        } => {
            assert_eq!(requested, ProtocolMode::Passport);
            assert_eq!(advertised, vec![ProtocolMode::BackgroundCheck]);
        }
        other => panic!("unexpected error {other}"),
    }

    assert_eq!(evidence_calls.load(Ordering::SeqCst), 0);
    let stats = kbs.stats();
    assert_eq!((stats.attest, stats.resource), (0, 0));
}

#[tokio::test]
async fn issuer_without_token_is_a_mode_mismatch() {
    let kbs = MockKbs::start(MockKbsConfig::with_payload(KEY).modes(&["passport"]));
    let client = client(&kbs, MockedEvidenceProvider::default()).build().unwrap();

    let err = fetch(&client).await.unwrap_err();
    assert!(
        matches!(err, Error::ProtocolModeMismatch { requested: ProtocolMode::Passport, .. }),
        "{err}"
    );
    assert_eq!(kbs.stats().resource, 0);
}

#[tokio::test]
async fn expired_token_is_not_presented() {
    let kbs = MockKbs::start(MockKbsConfig {
        issue_token: true,
        expired_tokens: true,
        ..MockKbsConfig::with_payload(KEY).modes(&["passport"])
    });
    let client = client(&kbs, MockedEvidenceProvider::default()).build().unwrap();

    assert!(matches!(
        fetch(&client).await.unwrap_err(),
        Error::InvalidToken(_)
    ));
    assert_eq!(kbs.stats().resource, 0);
}

#[rstest]
#[case::empty_body(ResourceReply::EmptyBody)]
#[case::empty_payload(ResourceReply::EmptyPayload)]
#[tokio::test]
async fn empty_resource_is_an_error(#[case] reply: ResourceReply) {
    let kbs = MockKbs::start(MockKbsConfig {
        resource: reply,
        ..Default::default()
    });
    let client = client(&kbs, MockedEvidenceProvider::default()).build().unwrap();

    assert!(matches!(
        fetch(&client).await.unwrap_err(),
        Error::EmptyResource(_)
    ));
}

#[tokio::test]
async fn transient_failures_are_retried_with_fresh_evidence() {
    let kbs = MockKbs::start(MockKbsConfig {
        transient_failures: 2,
        ..MockKbsConfig::with_payload(KEY)
    });
    let client = client(&kbs, MockedEvidenceProvider::default()).build().unwrap();

    assert_eq!(fetch(&client).await.unwrap(), KEY);
    assert_eq!(kbs.stats().auth, 3);
}

#[tokio::test]
async fn retry_budget_is_bounded() {
    let kbs = MockKbs::start(MockKbsConfig {
        transient_failures: 10,
        ..MockKbsConfig::with_payload(KEY)
    });
    let client = client(&kbs, MockedEvidenceProvider::default()).build().unwrap();

    assert!(matches!(
        fetch(&client).await.unwrap_err(),
        Error::NetworkTransient(_)
    ));
    assert_eq!(kbs.stats().auth, 3);
}

#[tokio::test]
async fn each_attempt_binds_a_new_nonce() {
    let kbs = MockKbs::start(MockKbsConfig {
        resource: ResourceReply::Status(503),
        ..Default::default()
    });
    let provider = MockedEvidenceProvider::default();
    let evidence_calls = provider.calls();
    let client = client(&kbs, provider).build().unwrap();

    assert!(fetch(&client).await.unwrap_err().is_transient());

    let nonces = kbs.nonces_attested();
    assert_eq!(nonces.len(), 3);
    assert_ne!(nonces[0], nonces[1]);
    assert_ne!(nonces[1], nonces[2]);
    assert_eq!(evidence_calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn rejection_is_terminal() {
    let kbs = MockKbs::start(MockKbsConfig {
        reject_attestation: true,
        ..MockKbsConfig::with_payload(KEY)
    });
    let client = client(&kbs, MockedEvidenceProvider::default()).build().unwrap();

    let err = fetch(&client).await.unwrap_err();
    match &err {
        Error::AttestationRejected { info, .. } => {
            assert!(info.contains("evidence does not satisfy the policy"), "{info}")
        }
        other => panic!("unexpected error {other}"),
    }
    assert_eq!(kbs.stats().attest, 1);
    assert_eq!(kbs.stats().resource, 0);
}

#[rstest]
#[case::not_found(ResourceReply::NotFound)]
#[case::server_error(ResourceReply::Status(500))]
#[tokio::test]
async fn resource_failures_are_not_retried(#[case] reply: ResourceReply) {
    let kbs = MockKbs::start(MockKbsConfig {
        resource: reply.clone(),
        ..Default::default()
    });
    let client = client(&kbs, MockedEvidenceProvider::default()).build().unwrap();

    let err = fetch(&client).await.unwrap_err();
    match reply {
        ResourceReply::NotFound => assert!(matches!(err, Error::ResourceNotFound(_))),
        _ => assert!(matches!(err, Error::KbsInternalError(_))),
    }
    assert_eq!(kbs.stats().resource, 1);
}

#[tokio::test]
async fn unreachable_kbs_is_transient() {
    // bind and drop to get a port nobody listens on
    let url = {
        let kbs = MockKbs::start(MockKbsConfig::default());
        kbs.url()
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let client = KbsClientBuilder::with_evidence_provider(
        Box::<MockedEvidenceProvider>::default(),
        &url,
    )
    .set_retry_policy(fast_retry())
    .build()
    .unwrap();

    assert!(fetch(&client).await.unwrap_err().is_transient());
}
