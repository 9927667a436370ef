mod common;

use std::sync::Arc;

use common::{PanickingTransport, coordinator_with, load_fixture, moderator};
use phasekeeper::error::WorkerError;
use phasekeeper::phase::Phase;
use phasekeeper::worker::{AccountId, AccountStatus};

// ============================================================================
// One account failing never affects another
// ============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn panicking_account_goes_to_error_while_others_keep_running() {
    let (transport, mut outbound) = PanickingTransport::new("alt");
    let coordinator = coordinator_with(load_fixture("game.yaml"), Arc::new(transport));
    let main = AccountId::new("main");
    let alt = AccountId::new("alt");
    coordinator.start_account(&main).unwrap();
    coordinator.start_account(&alt).unwrap();
    assert_eq!(coordinator.running_count(), 2);

    // main joins a round before alt fails
    coordinator
        .dispatch(
            &main,
            moderator("Registration is open!").with_join_token("r1"),
        )
        .unwrap();
    let sent = tokio::time::timeout(common::DEFAULT_TIMEOUT, outbound.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(sent.command.payload(), "/start r1");
    coordinator
        .dispatch(&main, moderator("You joined the game."))
        .unwrap();
    let mut main_report = coordinator.subscribe(&main);
    let before = tokio::time::timeout(
        common::DEFAULT_TIMEOUT,
        main_report.wait_for(|r| r.phase == Some(Phase::JoinConfirmation)),
    )
    .await
    .expect("main never confirmed its join")
    .unwrap()
    .clone();
    assert_eq!(before.join_attempts, 1);

    let mut alt_report = coordinator.subscribe(&alt);
    coordinator
        .dispatch(
            &alt,
            moderator("time to vote").with_buttons(["alice", "bob"]),
        )
        .unwrap();
    let report = tokio::time::timeout(
        common::DEFAULT_TIMEOUT,
        alt_report.wait_for(|r| r.status == AccountStatus::Error),
    )
    .await
    .expect("alt never reached error status")
    .unwrap()
    .clone();
    let reason = report.reason.unwrap_or_default();
    assert!(
        reason.contains("worker panicked") && reason.contains("transport exploded"),
        "unexpected reason: {reason}"
    );

    // main's phase and join counters are untouched
    let after = coordinator.status(&main).unwrap();
    assert_eq!(after.status, AccountStatus::Running);
    assert_eq!(after.phase, Some(Phase::JoinConfirmation));
    assert_eq!(after.join_attempts, 1);
    assert!(!after.join_abandoned);
    assert_eq!(after.messages_processed, before.messages_processed);

    coordinator
        .dispatch(
            &main,
            moderator("time to vote").with_buttons(["mallory", "alice"]),
        )
        .unwrap();
    let sent = tokio::time::timeout(common::DEFAULT_TIMEOUT, outbound.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(sent.account, main);
    assert_eq!(sent.command.payload(), "alice");
    let after = coordinator.status(&main).unwrap();
    assert_eq!(after.status, AccountStatus::Running);
    assert_eq!(after.phase, Some(Phase::JoinConfirmation));
    assert_eq!(after.join_attempts, 1);
    assert_eq!(coordinator.running_count(), 1);

    // the failed account refuses messages until restarted
    assert!(matches!(
        coordinator.dispatch(&alt, moderator("time to vote")),
        Err(WorkerError::NotRunning(_))
    ));
    coordinator.restart_account(&alt).await.unwrap();
    assert_eq!(
        coordinator.status(&alt).unwrap().status,
        AccountStatus::Running
    );
    assert_eq!(coordinator.running_count(), 2);

    coordinator.shutdown().await;
    assert_eq!(coordinator.running_count(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn stopping_one_account_leaves_the_other_running() {
    let (transport, mut outbound) = PanickingTransport::new("nobody");
    let coordinator = coordinator_with(load_fixture("game.yaml"), Arc::new(transport));
    let main = AccountId::new("main");
    let alt = AccountId::new("alt");
    coordinator.start_account(&main).unwrap();
    coordinator.start_account(&alt).unwrap();

    coordinator.stop_account(&main).await.unwrap();
    assert_eq!(
        coordinator.status(&main).unwrap().status,
        AccountStatus::Stopped
    );

    coordinator
        .dispatch(&alt, moderator("time to vote").with_buttons(["alice", "bob"]))
        .unwrap();
    let sent = tokio::time::timeout(common::DEFAULT_TIMEOUT, outbound.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(sent.account, alt);
    // alt overrides the vote priority list
    assert_eq!(sent.command.payload(), "bob");

    coordinator.shutdown().await;
}
