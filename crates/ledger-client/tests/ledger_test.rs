//! Ledger trait behaviour through a trait object, as the service uses it

use ledger_client::{Confirmation, Ledger, MockLedger, SubmitOutcome};
use pharmachain_common::AnchorMemo;
use std::sync::Arc;

#[tokio::test]
async fn test_memo_survives_submission() {
    let mock = Arc::new(MockLedger::new());
    let ledger: Arc<dyn Ledger> = mock.clone();

    let memo = AnchorMemo::new("PharmaChain", "rx-42", "ab".repeat(32), 1_700_000_000_000);
    let receipt = match ledger.submit(&memo.to_bytes().unwrap()).await {
        SubmitOutcome::Confirmed(receipt) => receipt,
        other => panic!("unexpected outcome: {:?}", other),
    };

    let stored = mock.memo(&receipt).await.expect("memo should be stored");
    assert_eq!(AnchorMemo::from_bytes(&stored).unwrap(), memo);

    assert_eq!(ledger.confirmation(&receipt).await, Confirmation::Confirmed);
    assert!(ledger
        .explorer_url(&receipt)
        .starts_with("https://explorer.solana.com/tx/"));
}

#[tokio::test]
async fn test_funding_after_insufficient_funds() {
    let mock = Arc::new(MockLedger::with_balance(0));
    let ledger: Arc<dyn Ledger> = mock.clone();

    assert!(matches!(
        ledger.submit(b"memo").await,
        SubmitOutcome::InsufficientFunds { .. }
    ));

    mock.set_balance(5_000);

    assert!(ledger.submit(b"memo").await.receipt().is_some());
}
