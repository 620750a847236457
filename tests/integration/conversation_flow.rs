//! End-to-end conversation turns: debounce, chat, playback, closing.

use crate::helpers::Harness;
use fieldvoice::pipeline::messages::{CaptureEvent, RecognitionEvent};
use fieldvoice::session::{Role, SessionStatus};
use fieldvoice::{DialogueState, RuntimeEvent};
use std::time::Duration;
use tokio::time::Instant;

#[tokio::test(start_paused = true)]
async fn single_exchange_round_trip() {
    let h = Harness::new();
    h.start().await;
    let t0 = Instant::now();

    h.capture.say("ポンプから異音がします");
    h.wait_for(|s| s.state == DialogueState::Speaking).await;
    // Commit waits out the silence window.
    assert!(t0.elapsed() >= Duration::from_millis(2_500));

    let snap = h.wait_listening(2).await;
    let requests = h.chat.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].message, "ポンプから異音がします");
    assert!(requests[0].history.is_empty());
    assert_eq!(requests[0].hint, None);
    assert_eq!(h.synth.spoken(), vec!["1番目の質問について確認します。"]);

    let id = snap.session_id.expect("session created");
    let stored = h.stored_session(&id, |s| s.turns.len() == 2).await;
    assert_eq!(stored.turns[0].role, Role::User);
    assert_eq!(stored.turns[1].role, Role::Assistant);
    assert_eq!(stored.status, SessionStatus::Active);
}

#[tokio::test(start_paused = true)]
async fn corrected_text_is_sent_and_raw_kept() {
    let h = Harness::new();
    h.start().await;
    h.exchange("ばるぶを閉めました").await;

    assert_eq!(h.chat.requests()[0].message, "バルブを閉めました");
    let id = h.handle.snapshot().session_id.unwrap();
    let stored = h.stored_session(&id, |s| s.turns.len() == 2).await;
    assert_eq!(stored.turns[0].content, "バルブを閉めました");
    assert_eq!(
        stored.turns[0].raw_content.as_deref(),
        Some("ばるぶを閉めました")
    );
}

#[tokio::test(start_paused = true)]
async fn history_carries_earlier_turns() {
    let h = Harness::new();
    h.start().await;
    h.exchange("ポンプから異音がします").await;
    h.exchange("吸込側のストレーナが詰まっていました").await;

    let requests = h.chat.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[1].history.len(), 2);
    assert_eq!(requests[1].history[0].content, "ポンプから異音がします");
    assert!(requests[1].session_id.is_some());
}

#[tokio::test(start_paused = true)]
async fn segments_accumulate_into_one_utterance() {
    let h = Harness::new();
    h.start().await;

    h.capture.say("配管から");
    tokio::time::sleep(Duration::from_millis(2_000)).await;
    h.capture.partial("水漏れが");
    tokio::time::sleep(Duration::from_millis(2_000)).await;
    h.capture.say("水漏れがあります");
    h.wait_listening(2).await;

    let requests = h.chat.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].message, "配管から水漏れがあります");
}

#[tokio::test(start_paused = true)]
async fn finalize_now_skips_the_silence_window() {
    let h = Harness::new();
    h.start().await;
    let t0 = Instant::now();

    h.capture.partial("バルブの開度は半分です");
    tokio::time::sleep(Duration::from_millis(100)).await;
    h.handle.finalize_now().unwrap();
    h.wait_for(|s| s.state == DialogueState::Speaking).await;

    assert!(t0.elapsed() < Duration::from_millis(2_500));
    assert_eq!(h.chat.requests()[0].message, "バルブの開度は半分です");
}

#[tokio::test(start_paused = true)]
async fn only_one_utterance_in_flight() {
    let h = Harness::new();
    h.chat.set_delay(Duration::from_secs(5));
    h.start().await;

    h.capture.say("最初の報告です");
    h.wait_for(|s| s.state == DialogueState::Processing).await;

    // A late recognizer result while the first turn is pending.
    h.capture.say("二つ目の報告です");
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(h.chat.requests().len(), 1);

    h.wait_listening(2).await;
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(h.chat.requests().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn strong_closing_completes_session() {
    let mut h = Harness::new();
    h.start().await;
    h.exchange("今日はポンプの点検をしました").await;

    h.capture.say("ありがとうございました");
    let ended = h
        .next_event(|e| matches!(e, RuntimeEvent::ConversationEnded { .. }))
        .await;
    let RuntimeEvent::ConversationEnded {
        session_id,
        completed,
    } = ended
    else {
        unreachable!()
    };
    assert!(completed);

    let requests = h.chat.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[1].hint.as_deref(), Some("closing"));
    assert_eq!(requests[1].history.len(), 2);
    // The closing reply is spoken before ending.
    assert_eq!(h.synth.spoken().len(), 2);

    assert_eq!(h.handle.snapshot().state, DialogueState::Idle);
    assert!(h.level.closes() >= 1);

    let id = session_id.expect("session id");
    let stored = h
        .stored_session(&id, |s| s.status == SessionStatus::Completed)
        .await;
    assert_eq!(stored.turns.len(), 4);
}

#[tokio::test(start_paused = true)]
async fn closing_reply_is_reported_as_ending() {
    let h = Harness::new();
    h.synth.set_duration(Duration::from_secs(3));
    h.start().await;

    h.capture.say("以上です");
    let snap = h.wait_for(|s| s.state == DialogueState::Ending).await;
    assert!(snap.ending);
    h.wait_for(|s| s.state == DialogueState::Idle).await;
}

#[tokio::test(start_paused = true)]
async fn soft_closing_inside_long_sentence_is_chat() {
    let h = Harness::new();
    h.start().await;
    h.exchange("わかりました、それでは次にバルブの開度を調整する手順も教えてください")
        .await;

    assert_eq!(h.chat.requests()[0].hint, None);
    let snap = h.handle.snapshot();
    assert_eq!(snap.state, DialogueState::Listening);
    assert!(!snap.ending);
}

#[tokio::test(start_paused = true)]
async fn short_soft_closing_ends_conversation() {
    let h = Harness::new();
    h.start().await;
    h.exchange("ポンプから異音がします").await;

    h.capture.say("わかりました");
    h.wait_for(|s| s.state == DialogueState::Idle).await;
    assert_eq!(h.chat.requests()[1].hint.as_deref(), Some("closing"));
}

#[tokio::test(start_paused = true)]
async fn stop_completes_session_and_ignores_late_reply() {
    let mut h = Harness::new();
    h.chat.set_delay(Duration::from_secs(5));
    h.start().await;

    h.capture.say("点検を始めます");
    h.wait_for(|s| s.state == DialogueState::Processing).await;
    let id = h
        .wait_for(|s| s.session_id.is_some())
        .await
        .session_id
        .unwrap();

    h.handle.stop().unwrap();
    let ended = h
        .next_event(|e| matches!(e, RuntimeEvent::ConversationEnded { .. }))
        .await;
    assert!(matches!(
        ended,
        RuntimeEvent::ConversationEnded {
            completed: true,
            ..
        }
    ));

    // The chat reply lands after the stop and must go nowhere.
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(h.handle.snapshot().state, DialogueState::Idle);
    assert!(h.synth.spoken().is_empty());
    assert!(!h.capture_is_active());

    let stored = h
        .stored_session(&id, |s| s.status == SessionStatus::Completed)
        .await;
    assert_eq!(stored.turns.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn discard_deletes_session() {
    let h = Harness::new();
    h.start().await;
    h.exchange("メモだけ残します").await;
    assert_eq!(h.sessions.len().await, 1);

    h.handle.discard().unwrap();
    h.wait_for(|s| s.state == DialogueState::Idle).await;
    tokio::time::timeout(Duration::from_secs(10), async {
        while !h.sessions.is_empty().await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("session deleted");
}

#[tokio::test(start_paused = true)]
async fn conversation_can_restart_after_ending() {
    let h = Harness::new();
    h.start().await;
    h.exchange("一件目です").await;
    h.handle.stop().unwrap();
    h.wait_for(|s| s.state == DialogueState::Idle).await;

    h.start().await;
    h.exchange("二件目です").await;
    assert_eq!(h.sessions.len().await, 2);
    assert_eq!(h.chat.requests()[1].history.len(), 0);
}

#[tokio::test(start_paused = true)]
async fn blank_recognition_never_commits() {
    let h = Harness::new();
    h.start().await;
    h.capture
        .emit(CaptureEvent::Recognition(RecognitionEvent::final_text("   ")));
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(h.chat.requests().is_empty());
    assert_eq!(h.handle.snapshot().state, DialogueState::Listening);
}
