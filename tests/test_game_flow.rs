mod common;

use common::{Harness, load_fixture, moderator};
use phasekeeper::phase::Phase;
use phasekeeper::transport::Command;
use phasekeeper::worker::{AccountId, AccountStatus};

fn click(choice: &str) -> Command {
    Command::Click {
        choice: choice.to_string(),
    }
}

// ============================================================================
// Join and phases
// ============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn join_then_play_a_round() {
    let mut h = Harness::new(load_fixture("game.yaml"));
    let main = AccountId::new("main");
    h.coordinator.start_account(&main).unwrap();

    h.coordinator
        .dispatch(
            &main,
            moderator("Registration is open!").with_join_token("round1"),
        )
        .unwrap();
    assert_eq!(
        h.next_command().await.command,
        Command::Text {
            text: "/start round1".to_string()
        }
    );

    h.coordinator
        .dispatch(&main, moderator("You joined the game."))
        .unwrap();
    h.coordinator
        .dispatch(&main, moderator("The game begins now"))
        .unwrap();
    let report = h
        .wait_for_report(&main, |r| r.phase == Some(Phase::GameStart))
        .await;
    assert_eq!(report.join_attempts, 1);
    assert!(!report.join_abandoned);

    h.coordinator
        .dispatch(&main, moderator("Morning has come"))
        .unwrap();
    assert_eq!(
        h.next_command().await.command,
        Command::Text {
            text: "good morning".to_string()
        }
    );

    h.coordinator
        .dispatch(
            &main,
            moderator("Hang them?").with_buttons(["Yes", "No"]),
        )
        .unwrap();
    assert_eq!(h.next_command().await.command, click("Yes"));

    h.coordinator
        .dispatch(&main, moderator("The game is over"))
        .unwrap();
    let report = h
        .wait_for_report(&main, |r| r.phase == Some(Phase::GameEnd))
        .await;
    assert_eq!(report.join_attempts, 0);
    assert_eq!(report.messages_processed, 6);

    h.coordinator.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn messages_from_other_senders_are_ignored() {
    let mut h = Harness::new(load_fixture("game.yaml"));
    let main = AccountId::new("main");
    h.coordinator.start_account(&main).unwrap();

    h.coordinator
        .dispatch(
            &main,
            phasekeeper::transport::InboundMessage::new(1, "time to vote")
                .with_buttons(["alice"]),
        )
        .unwrap();
    h.wait_for_report(&main, |r| r.messages_processed == 1).await;
    assert!(h.outbound.try_recv().is_err());

    h.coordinator.shutdown().await;
}

// ============================================================================
// Targeting
// ============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn per_account_overrides_choose_different_targets() {
    let mut h = Harness::new(load_fixture("game.yaml"));
    let main = AccountId::new("main");
    let alt = AccountId::new("alt");
    h.coordinator.start_account(&main).unwrap();
    h.coordinator.start_account(&alt).unwrap();

    h.coordinator
        .dispatch(&main, moderator("Time to vote").with_buttons(["bob", "alice"]))
        .unwrap();
    let first = h.next_command().await;
    assert_eq!(first.account, main);
    assert_eq!(first.command, click("alice"));

    h.coordinator
        .dispatch(&alt, moderator("Time to vote").with_buttons(["bob", "alice"]))
        .unwrap();
    let second = h.next_command().await;
    assert_eq!(second.account, alt);
    assert_eq!(second.command, click("bob"));

    h.coordinator.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn random_fallback_never_picks_blacklisted() {
    let mut h = Harness::new(load_fixture("game.yaml"));
    let main = AccountId::new("main");
    h.coordinator.start_account(&main).unwrap();

    for _ in 0..5 {
        h.coordinator
            .dispatch(
                &main,
                moderator("time to vote").with_buttons(["mallory", "zed", "yuri"]),
            )
            .unwrap();
        let sent = h.next_command().await;
        assert_ne!(sent.command.payload(), "mallory");
    }

    // only blacklisted players: no command is sent
    h.coordinator
        .dispatch(&main, moderator("time to vote").with_buttons(["mallory"]))
        .unwrap();
    h.wait_for_report(&main, |r| r.messages_processed == 6).await;
    assert!(h.outbound.try_recv().is_err());

    h.coordinator.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn two_step_action_picks_both_sides_of_the_pair() {
    let mut h = Harness::new(load_fixture("game.yaml"));
    let main = AccountId::new("main");
    h.coordinator.start_account(&main).unwrap();

    // a second step without a first one is left unanswered
    h.coordinator
        .dispatch(
            &main,
            moderator("Choose the second lover").with_buttons(["dave"]),
        )
        .unwrap();
    h.wait_for_report(&main, |r| r.messages_processed == 1).await;
    assert!(h.outbound.try_recv().is_err());

    h.coordinator
        .dispatch(
            &main,
            moderator("Choose the first lover").with_buttons(["erin", "carol"]),
        )
        .unwrap();
    assert_eq!(h.next_command().await.command, click("carol"));

    h.coordinator
        .dispatch(
            &main,
            moderator("Choose the second lover").with_buttons(["erin", "dave"]),
        )
        .unwrap();
    assert_eq!(h.next_command().await.command, click("dave"));

    h.coordinator.shutdown().await;
}

// ============================================================================
// Safety stops
// ============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn ban_warning_abandons_next_join_and_errors_account() {
    let mut h = Harness::new(load_fixture("game.yaml"));
    let main = AccountId::new("main");
    h.coordinator.start_account(&main).unwrap();

    h.coordinator
        .dispatch(&main, moderator("This is your LAST WARNING"))
        .unwrap();
    h.coordinator
        .dispatch(
            &main,
            moderator("Registration is open").with_join_token("t"),
        )
        .unwrap();

    let report = h
        .wait_for_report(&main, |r| r.status == AccountStatus::Error)
        .await;
    assert!(report.join_abandoned);
    assert_eq!(
        report.reason.as_deref(),
        Some("join abandoned: ban warning detected")
    );
    assert!(h.outbound.try_recv().is_err());
    assert_eq!(h.coordinator.running_count(), 0);

    // a restart gets a fresh join policy
    h.coordinator.restart_account(&main).await.unwrap();
    h.coordinator
        .dispatch(
            &main,
            moderator("Registration is open").with_join_token("t2"),
        )
        .unwrap();
    assert_eq!(h.next_command().await.command.payload(), "/start t2");

    h.coordinator.shutdown().await;
}
