//! Shared fakes and a harness driving a real orchestrator.
//!
//! All tests run on a paused tokio clock, so debounce windows, barge-in
//! sampling and synthesis durations cost no wall time.

use async_trait::async_trait;
use fieldvoice::audio::AudioLevelSource;
use fieldvoice::config::EngineConfig;
use fieldvoice::pipeline::messages::{CaptureEvent, RecognitionEvent};
use fieldvoice::registration::{Article, NewArticle, RegistrationProposal};
use fieldvoice::services::memory::{MemoryKnowledgeStore, MemorySessionStore, StoredSession};
use fieldvoice::services::{
    AnalysisResult, AnalysisService, ChatReply, ChatRequest, ChatService, CorrectionService,
    KnowledgeStore, Services, SpeechCapture, SpeechSynthesizer,
};
use fieldvoice::session::Turn;
use fieldvoice::{
    DialogueOrchestrator, DialogueState, EngineError, EngineSnapshot, OrchestratorHandle,
    RuntimeEvent,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};

const WAIT: Duration = Duration::from_secs(120);

// ── capture ─────────────────────────────────────────────────────────────

#[derive(Default)]
pub(crate) struct FakeCapture {
    sink: Mutex<Option<mpsc::UnboundedSender<CaptureEvent>>>,
    active: AtomicBool,
    starts: AtomicUsize,
    pub(crate) deny: AtomicBool,
}

impl FakeCapture {
    /// Deliver a final recognition result.
    pub(crate) fn say(&self, text: &str) {
        self.emit(CaptureEvent::Recognition(RecognitionEvent::final_text(text)));
    }

    /// Deliver an interim recognition result.
    pub(crate) fn partial(&self, text: &str) {
        self.emit(CaptureEvent::Recognition(RecognitionEvent::partial(text)));
    }

    /// Deliver any capture event. Errors and end-of-stream deactivate the
    /// stream the way a real recognizer does.
    pub(crate) fn emit(&self, event: CaptureEvent) {
        if matches!(event, CaptureEvent::Error(_) | CaptureEvent::Ended) {
            self.active.store(false, Ordering::SeqCst);
        }
        if let Some(tx) = self.sink.lock().unwrap().as_ref() {
            let _ = tx.send(event);
        }
    }

    pub(crate) fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }
}

impl SpeechCapture for FakeCapture {
    fn start(&self, events: mpsc::UnboundedSender<CaptureEvent>) -> fieldvoice::Result<()> {
        if self.deny.load(Ordering::SeqCst) {
            return Err(EngineError::PermissionDenied("microphone blocked".into()));
        }
        *self.sink.lock().unwrap() = Some(events);
        self.active.store(true, Ordering::SeqCst);
        self.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&self) {
        self.active.store(false, Ordering::SeqCst);
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

// ── synthesis ───────────────────────────────────────────────────────────

pub(crate) struct FakeSynth {
    spoken: Mutex<Vec<String>>,
    duration: Mutex<Duration>,
    pub(crate) fail: AtomicBool,
    stops: AtomicUsize,
}

impl FakeSynth {
    pub(crate) fn new(duration: Duration) -> Self {
        Self {
            spoken: Mutex::new(Vec::new()),
            duration: Mutex::new(duration),
            fail: AtomicBool::new(false),
            stops: AtomicUsize::new(0),
        }
    }

    pub(crate) fn set_duration(&self, duration: Duration) {
        *self.duration.lock().unwrap() = duration;
    }

    pub(crate) fn spoken(&self) -> Vec<String> {
        self.spoken.lock().unwrap().clone()
    }

    pub(crate) fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SpeechSynthesizer for FakeSynth {
    async fn speak(&self, text: &str) -> fieldvoice::Result<()> {
        self.spoken.lock().unwrap().push(text.to_owned());
        if self.fail.load(Ordering::SeqCst) {
            return Err(EngineError::Synthesis("voice unavailable".into()));
        }
        let duration = *self.duration.lock().unwrap();
        tokio::time::sleep(duration).await;
        Ok(())
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

// ── chat / analysis / correction ────────────────────────────────────────

pub(crate) struct FakeChat {
    requests: Mutex<Vec<ChatRequest>>,
    replies: Mutex<VecDeque<String>>,
    delay: Mutex<Duration>,
    failures: AtomicUsize,
}

impl FakeChat {
    fn new() -> Self {
        Self {
            requests: Mutex::new(Vec::new()),
            replies: Mutex::new(VecDeque::new()),
            delay: Mutex::new(Duration::from_millis(200)),
            failures: AtomicUsize::new(0),
        }
    }

    /// Queue a specific reply; otherwise a numbered default is returned.
    pub(crate) fn push_reply(&self, reply: &str) {
        self.replies.lock().unwrap().push_back(reply.to_owned());
    }

    pub(crate) fn fail_next(&self, n: usize) {
        self.failures.store(n, Ordering::SeqCst);
    }

    pub(crate) fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub(crate) fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatService for FakeChat {
    async fn chat(&self, request: ChatRequest) -> fieldvoice::Result<ChatReply> {
        let n = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(request);
            requests.len()
        };
        let delay = *self.delay.lock().unwrap();
        tokio::time::sleep(delay).await;
        if self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |f| f.checked_sub(1))
            .is_ok()
        {
            return Err(EngineError::Chat("upstream timeout".into()));
        }
        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| format!("{n}番目の質問について確認します。"));
        Ok(ChatReply {
            reply_text: reply,
            related_references: vec![],
        })
    }
}

pub(crate) struct FakeAnalysis {
    calls: AtomicUsize,
    result: Mutex<AnalysisResult>,
}

impl FakeAnalysis {
    pub(crate) fn propose(&self, proposal: RegistrationProposal) {
        *self.result.lock().unwrap() = AnalysisResult {
            should_register: true,
            extracted: Some(proposal),
        };
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AnalysisService for FakeAnalysis {
    async fn analyze(&self, _turns: &[Turn]) -> fieldvoice::Result<AnalysisResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.result.lock().unwrap().clone())
    }
}

/// Fixes one well-known mishearing.
pub(crate) struct FakeCorrection;

#[async_trait]
impl CorrectionService for FakeCorrection {
    async fn correct(&self, text: &str) -> fieldvoice::Result<String> {
        Ok(text.replace("ばるぶ", "バルブ"))
    }
}

// ── knowledge ───────────────────────────────────────────────────────────

/// In-memory knowledge store that can be told to reject writes.
pub(crate) struct FlakyKnowledge {
    inner: MemoryKnowledgeStore,
    pub(crate) fail: AtomicBool,
}

#[async_trait]
impl KnowledgeStore for FlakyKnowledge {
    async fn create(&self, article: &NewArticle) -> fieldvoice::Result<String> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(EngineError::Knowledge("503 Service Unavailable".into()));
        }
        self.inner.create(article).await
    }

    async fn get(&self, id: &str) -> fieldvoice::Result<Article> {
        self.inner.get(id).await
    }

    fn invalidate_cache(&self) {
        self.inner.invalidate_cache();
    }
}

// ── microphone level ────────────────────────────────────────────────────

pub(crate) struct FakeLevel {
    level: Mutex<f32>,
    opens: AtomicUsize,
    closes: AtomicUsize,
    pub(crate) deny: AtomicBool,
}

impl FakeLevel {
    pub(crate) fn set(&self, level: f32) {
        *self.level.lock().unwrap() = level;
    }

    pub(crate) fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

impl AudioLevelSource for FakeLevel {
    fn open(&self) -> fieldvoice::Result<()> {
        if self.deny.load(Ordering::SeqCst) {
            return Err(EngineError::PermissionDenied("microphone blocked".into()));
        }
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }

    fn level(&self) -> f32 {
        *self.level.lock().unwrap()
    }
}

// ── harness ─────────────────────────────────────────────────────────────

pub(crate) struct Harness {
    pub(crate) handle: OrchestratorHandle,
    pub(crate) events: broadcast::Receiver<RuntimeEvent>,
    pub(crate) capture: Arc<FakeCapture>,
    pub(crate) synth: Arc<FakeSynth>,
    pub(crate) fallback: Arc<FakeSynth>,
    pub(crate) chat: Arc<FakeChat>,
    pub(crate) analysis: Arc<FakeAnalysis>,
    pub(crate) sessions: MemorySessionStore,
    pub(crate) knowledge: MemoryKnowledgeStore,
    pub(crate) knowledge_writes: Arc<FlakyKnowledge>,
    pub(crate) level: Arc<FakeLevel>,
}

impl Harness {
    pub(crate) fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub(crate) fn with_config(config: EngineConfig) -> Self {
        let capture = Arc::new(FakeCapture::default());
        let synth = Arc::new(FakeSynth::new(Duration::from_secs(1)));
        let fallback = Arc::new(FakeSynth::new(Duration::from_secs(1)));
        let chat = Arc::new(FakeChat::new());
        let analysis = Arc::new(FakeAnalysis {
            calls: AtomicUsize::new(0),
            result: Mutex::new(AnalysisResult::default()),
        });
        let sessions = MemorySessionStore::new();
        let knowledge = MemoryKnowledgeStore::new();
        let knowledge_writes = Arc::new(FlakyKnowledge {
            inner: knowledge.clone(),
            fail: AtomicBool::new(false),
        });
        let level = Arc::new(FakeLevel {
            level: Mutex::new(8.0),
            opens: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
            deny: AtomicBool::new(false),
        });

        let services = Services {
            capture: capture.clone(),
            synthesizer: synth.clone(),
            fallback_synthesizer: fallback.clone(),
            chat: chat.clone(),
            analysis: analysis.clone(),
            correction: Arc::new(FakeCorrection),
            sessions: Arc::new(sessions.clone()),
            knowledge: knowledge_writes.clone(),
            microphone: level.clone(),
        };
        let orchestrator = DialogueOrchestrator::new(config, services).expect("valid config");
        let handle = orchestrator.handle();
        let events = handle.subscribe();
        tokio::spawn(orchestrator.run());

        Self {
            handle,
            events,
            capture,
            synth,
            fallback,
            chat,
            analysis,
            sessions,
            knowledge,
            knowledge_writes,
            level,
        }
    }

    pub(crate) fn capture_is_active(&self) -> bool {
        self.capture.is_active()
    }

    /// Start a conversation and wait until it is listening.
    pub(crate) async fn start(&self) {
        self.handle.start().unwrap();
        self.wait_for(|s| s.state == DialogueState::Listening).await;
    }

    /// Wait until the published snapshot satisfies `pred`.
    pub(crate) async fn wait_for(
        &self,
        mut pred: impl FnMut(&EngineSnapshot) -> bool,
    ) -> EngineSnapshot {
        let mut rx = self.handle.watch();
        tokio::time::timeout(WAIT, rx.wait_for(|s| pred(s)))
            .await
            .expect("timed out waiting for snapshot")
            .expect("orchestrator stopped")
            .clone()
    }

    /// Wait until the conversation is listening with `turns` turns.
    pub(crate) async fn wait_listening(&self, turns: usize) -> EngineSnapshot {
        self.wait_for(|s| s.state == DialogueState::Listening && s.turns == turns)
            .await
    }

    /// Say something and wait for the reply to finish playing.
    pub(crate) async fn exchange(&self, text: &str) {
        let before = self.handle.snapshot().turns;
        self.capture.say(text);
        self.wait_listening(before + 2).await;
    }

    /// Wait for the next runtime event matching `pred`.
    pub(crate) async fn next_event(
        &mut self,
        pred: impl Fn(&RuntimeEvent) -> bool,
    ) -> RuntimeEvent {
        tokio::time::timeout(WAIT, async {
            loop {
                match self.events.recv().await {
                    Ok(event) if pred(&event) => return event,
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => panic!("event stream closed"),
                }
            }
        })
        .await
        .expect("timed out waiting for event")
    }

    /// Wait until the stored session satisfies `pred`.
    pub(crate) async fn stored_session(
        &self,
        id: &str,
        pred: impl Fn(&StoredSession) -> bool,
    ) -> StoredSession {
        tokio::time::timeout(WAIT, async {
            loop {
                if let Some(session) = self.sessions.get(id).await
                    && pred(&session)
                {
                    return session;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("timed out waiting for stored session")
    }
}

/// Fresh fakes for tests that never run a conversation.
pub(crate) fn idle_services() -> Services {
    Services {
        capture: Arc::new(FakeCapture::default()),
        synthesizer: Arc::new(FakeSynth::new(Duration::ZERO)),
        fallback_synthesizer: Arc::new(FakeSynth::new(Duration::ZERO)),
        chat: Arc::new(FakeChat::new()),
        analysis: Arc::new(FakeAnalysis {
            calls: AtomicUsize::new(0),
            result: Mutex::new(AnalysisResult::default()),
        }),
        correction: Arc::new(FakeCorrection),
        sessions: Arc::new(MemorySessionStore::new()),
        knowledge: Arc::new(MemoryKnowledgeStore::new()),
        microphone: Arc::new(FakeLevel {
            level: Mutex::new(0.0),
            opens: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
            deny: AtomicBool::new(false),
        }),
    }
}

pub(crate) fn pump_proposal() -> RegistrationProposal {
    RegistrationProposal {
        title: "ポンプ異音の一次対応".into(),
        summary: "異音がしたら吸込側の詰まりを確認する".into(),
        tags: vec!["ポンプ".into(), "異音".into()],
        category: "保守".into(),
        risk_level: "高".into(),
        content: "1. 運転を止める\n2. 吸込側ストレーナを確認する".into(),
    }
}
