//! Interrupting the assistant: energy barge-in, spoken barge-in, echo.

use crate::helpers::{Harness, pump_proposal};
use fieldvoice::config::{EngineConfig, PromptConfig};
use fieldvoice::runtime::BargeInSource;
use fieldvoice::{DialogueState, RuntimeEvent};
use std::time::Duration;

/// Start, say one line and wait until the (long) reply is playing.
async fn speaking_harness(reply: &str) -> Harness {
    let h = Harness::new();
    h.synth.set_duration(Duration::from_secs(10));
    h.chat.push_reply(reply);
    h.start().await;
    h.capture.say("ポンプから異音がします");
    h.wait_for(|s| s.state == DialogueState::Speaking).await;
    h
}

#[tokio::test(start_paused = true)]
async fn loud_microphone_after_calibration_interrupts() {
    let mut h = speaking_harness("吸込側のストレーナを点検してください。").await;
    let starts = h.capture.starts();

    // Baseline 8 over the warm-up puts the threshold at 25.
    tokio::time::sleep(Duration::from_millis(1_600)).await;
    assert_eq!(h.handle.snapshot().state, DialogueState::Speaking);
    h.level.set(26.0);

    let event = h
        .next_event(|e| matches!(e, RuntimeEvent::BargeIn { .. }))
        .await;
    assert!(matches!(
        event,
        RuntimeEvent::BargeIn {
            source: BargeInSource::Energy
        }
    ));
    let snap = h.handle.snapshot();
    assert_eq!(snap.state, DialogueState::Listening);
    assert_eq!(h.synth.stops(), 1);
    // Recognition keeps running through the interruption.
    assert_eq!(h.capture.starts(), starts);
    assert!(h.capture_is_active());
}

#[tokio::test(start_paused = true)]
async fn level_at_threshold_does_not_interrupt() {
    let h = speaking_harness("吸込側のストレーナを点検してください。").await;
    tokio::time::sleep(Duration::from_millis(1_600)).await;
    h.level.set(25.0);

    h.wait_listening(2).await;
    assert_eq!(h.synth.stops(), 0);
}

#[tokio::test(start_paused = true)]
async fn loud_warmup_raises_threshold() {
    let h = Harness::new();
    h.level.set(40.0);
    h.synth.set_duration(Duration::from_secs(4));
    h.start().await;
    h.capture.say("ポンプから異音がします");
    h.wait_for(|s| s.state == DialogueState::Speaking).await;

    // Baseline 40 gives a threshold of 100; 60 is still echo.
    tokio::time::sleep(Duration::from_millis(1_600)).await;
    h.level.set(60.0);
    h.wait_listening(2).await;
    assert_eq!(h.synth.stops(), 0);
}

#[tokio::test(start_paused = true)]
async fn disabled_barge_in_never_samples() {
    let mut config = EngineConfig::default();
    config.barge_in.enabled = false;
    let h = Harness::with_config(config);
    h.level.set(200.0);
    h.synth.set_duration(Duration::from_secs(3));
    h.start().await;

    h.exchange("ポンプから異音がします").await;
    assert_eq!(h.synth.stops(), 0);
}

#[tokio::test(start_paused = true)]
async fn echo_of_reply_does_not_interrupt() {
    let h = speaking_harness("フィルターの詰まりを確認してください。").await;

    h.capture.partial("フィルターの詰まりを");
    tokio::time::sleep(Duration::from_millis(500)).await;
    h.capture.partial("フィルターの詰まりを確認");
    tokio::time::sleep(Duration::from_secs(3)).await;

    assert_eq!(h.handle.snapshot().state, DialogueState::Speaking);
    assert_eq!(h.synth.stops(), 0);
    assert_eq!(h.chat.requests().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn genuine_speech_interrupts_and_becomes_next_turn() {
    let mut h = speaking_harness("フィルターの詰まりを確認してください。").await;

    h.capture.say("ちょっと待って、電源が落ちました");
    let event = h
        .next_event(|e| matches!(e, RuntimeEvent::BargeIn { .. }))
        .await;
    assert!(matches!(
        event,
        RuntimeEvent::BargeIn {
            source: BargeInSource::Speech
        }
    ));
    assert_eq!(h.synth.stops(), 1);

    h.wait_listening(4).await;
    let requests = h.chat.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[1].message, "ちょっと待って、電源が落ちました");
}

#[tokio::test(start_paused = true)]
async fn barge_in_cancels_closing() {
    let mut h = Harness::new();
    h.synth.set_duration(Duration::from_secs(10));
    h.start().await;

    h.capture.say("以上です");
    h.wait_for(|s| s.state == DialogueState::Ending).await;
    tokio::time::sleep(Duration::from_millis(1_600)).await;
    h.level.set(90.0);

    h.next_event(|e| matches!(e, RuntimeEvent::BargeIn { .. }))
        .await;
    let snap = h.handle.snapshot();
    assert_eq!(snap.state, DialogueState::Listening);
    assert!(!snap.ending);

    // The conversation carries on instead of ending.
    h.level.set(8.0);
    tokio::time::sleep(Duration::from_secs(15)).await;
    assert_eq!(h.handle.snapshot().state, DialogueState::Listening);
}

#[tokio::test(start_paused = true)]
async fn queued_proposal_is_asked_after_silent_barge_in() {
    let mut h = Harness::new();
    h.analysis.propose(pump_proposal());
    h.start().await;
    h.exchange("ポンプから異音がします").await;
    h.exchange("吸込側のストレーナが詰まっていました").await;

    h.synth.set_duration(Duration::from_secs(10));
    h.capture.say("清掃したら音は止まりました");
    h.next_event(|e| matches!(e, RuntimeEvent::ProposalReady(_)))
        .await;

    // A cough during the reply, then nothing more from the user.
    tokio::time::sleep(Duration::from_millis(1_600)).await;
    h.level.set(90.0);
    h.next_event(|e| matches!(e, RuntimeEvent::BargeIn { .. }))
        .await;
    h.level.set(8.0);

    let snap = h
        .wait_for(|s| s.state == DialogueState::ConfirmingRegistration)
        .await;
    assert_eq!(snap.turns, 7);
    assert_eq!(
        h.synth.spoken().last().unwrap(),
        &PromptConfig::default()
            .proposal
            .replace("{title}", "ポンプ異音の一次対応")
    );
    assert_eq!(h.chat.requests().len(), 3);
}
