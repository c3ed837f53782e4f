#![cfg(feature = "service-tests")]

//! End-to-end wallet tests against a running service.
//!
//! Requires `paystack-stub` and `cowry-wallet` to be up; see the crate
//! docs in `src/lib.rs` for the exact invocations.

use std::time::Instant;

use cowry_common::api::ErrorCode;
use cowry_common::wallet::EntryKind;
use cowry_wallet_integration::harness::{Participant, TestHarness};
use cowry_wallet_integration::{mint_expired_token, service_url};

#[tokio::test]
async fn provisioning_is_idempotent_end_to_end() {
    let harness = TestHarness::setup().await;

    // Participant::connect already provisioned; a replayed trigger is a no-op.
    assert!(!harness.alice.provision().await);
    let wallet = harness.alice.wallet().await;
    assert_eq!(wallet.balance, 0);
    assert_eq!(wallet.uid, harness.alice.uid);
}

#[tokio::test]
async fn missing_and_expired_tokens_are_rejected() {
    let harness = TestHarness::setup().await;
    let http = reqwest::Client::new();

    let resp = http
        .get(format!("{}/wallet", service_url()))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);

    let resp = http
        .get(format!("{}/wallet", service_url()))
        .bearer_auth(mint_expired_token(&harness.alice.uid))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
}

#[tokio::test]
async fn topup_flow_credits_exactly_once() {
    let harness = TestHarness::setup().await;
    let alice = &harness.alice;

    let session = alice.initialize_topup(50_000).await.unwrap();
    let verified = alice.verify_topup(&session.reference, 50_000).await.unwrap();
    assert!(verified.success && !verified.already_credited);
    assert_eq!(alice.wallet().await.balance, 50_000);

    // Retry after a "dropped response": acknowledged, not re-credited.
    let replay = alice.verify_topup(&session.reference, 50_000).await.unwrap();
    assert!(replay.success && replay.already_credited);
    assert_eq!(alice.wallet().await.balance, 50_000);

    let topups: Vec<_> = alice
        .transactions()
        .await
        .into_iter()
        .filter(|e| e.reference.as_deref() == Some(session.reference.as_str()))
        .collect();
    assert_eq!(topups.len(), 1);
    assert_eq!(topups[0].kind, EntryKind::Topup);
}

#[tokio::test]
async fn claimed_amount_must_match_captured_amount() {
    let harness = TestHarness::setup().await;
    let alice = &harness.alice;

    let session = alice.initialize_topup(50_000).await.unwrap();
    let err = alice.verify_topup(&session.reference, 60_000).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::FailedPrecondition);
    assert_eq!(alice.wallet().await.balance, 0);
}

#[tokio::test]
async fn unknown_reference_never_credits() {
    let harness = TestHarness::setup().await;
    let err = harness
        .alice
        .verify_topup("ref-never-issued", 50_000)
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::FailedPrecondition);
    assert_eq!(harness.alice.wallet().await.balance, 0);
}

#[tokio::test]
async fn transfer_flow_end_to_end() {
    let harness = TestHarness::setup().await;
    harness.alice.fund(500).await;

    let resp = harness.alice.transfer(&harness.bob, 500).await.unwrap();
    assert_eq!(harness.alice.wallet().await.balance, 0);
    assert_eq!(harness.bob.wallet().await.balance, 500);

    let entries = harness.bob.transactions().await;
    let entry = entries
        .iter()
        .find(|e| e.id == resp.transaction_id)
        .expect("transfer entry visible to recipient");
    assert_eq!(entry.kind, EntryKind::Transfer);
    assert_eq!(entry.sender.as_deref(), Some(harness.alice.uid.as_str()));
    assert_eq!(entry.recipient, harness.bob.uid);
    assert_eq!(entry.amount, 500);

    // Nothing left to send.
    let err = harness.alice.transfer(&harness.bob, 1).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::FailedPrecondition);
}

#[tokio::test]
async fn degenerate_requests_are_invalid_arguments() {
    let harness = TestHarness::setup().await;
    harness.alice.fund(500).await;

    let err = harness.alice.transfer(&harness.alice, 100).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidArgument);

    let err = harness.alice.transfer(&harness.bob, 0).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidArgument);

    let err = harness.alice.initialize_topup(-5).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidArgument);
}

#[tokio::test]
async fn concurrent_transfers_settle_exactly() {
    const N: usize = 10;
    const A: i64 = 100;

    let harness = TestHarness::setup().await;
    harness.alice.fund(N as i64 * A).await;

    let started = Instant::now();
    let mut handles = Vec::new();
    for _ in 0..N {
        let alice = harness.alice.clone();
        let bob = harness.bob.clone();
        handles.push(tokio::spawn(async move { alice.transfer(&bob, A).await }));
    }
    for handle in handles {
        handle.await.unwrap().expect("concurrent transfer");
    }
    println!(
        "  [LATENCY] concurrent_transfers | {N} transfers | {:.3}s",
        started.elapsed().as_secs_f64()
    );

    assert_eq!(harness.alice.wallet().await.balance, 0);
    assert_eq!(harness.bob.wallet().await.balance, (N as i64 * A) as u64);
    let transfer_count = harness
        .bob
        .transactions()
        .await
        .iter()
        .filter(|e| e.kind == EntryKind::Transfer)
        .count();
    assert_eq!(transfer_count, N);
}

#[tokio::test]
async fn subscription_pushes_balance_and_transaction_events() {
    let harness = TestHarness::setup().await;
    harness.alice.fund(300).await;

    let mut subscription = harness.bob.subscribe().await;
    // Hello is answered with a snapshot of the current balance.
    let snapshot = subscription.recv_balance().await;
    assert_eq!(snapshot.balance, 0);

    harness.alice.transfer(&harness.bob, 300).await.unwrap();

    let updated = subscription.recv_balance().await;
    assert_eq!(updated.balance, 300);
    let entry = subscription.recv_transaction().await;
    assert_eq!(entry.sender.as_deref(), Some(harness.alice.uid.as_str()));
    assert_eq!(entry.amount, 300);
}

#[tokio::test]
async fn participants_only_see_their_own_history() {
    let harness = TestHarness::setup().await;
    let carol = Participant::connect("carol").await;

    harness.alice.fund(1_000).await;
    harness.alice.transfer(&harness.bob, 400).await.unwrap();

    // Carol was not a participant in any of it.
    assert!(carol.transactions().await.is_empty());
    assert_eq!(carol.wallet().await.balance, 0);
}
