//! The dialogue orchestrator.
//!
//! A single task owns every piece of conversation state. Service calls run
//! on spawned tasks and post their completions back to the orchestrator's
//! event channel, tagged with the conversation epoch so late results from a
//! torn-down conversation are dropped. Timers (silence debounce, barge-in
//! sampling, echo tail, recognition restart) are plain deadlines folded
//! into the same `select!` loop.

use super::assembler::{AssemblerOutcome, UtteranceAssembler};
use super::messages::{
    CaptureError, CaptureEvent, CommittedUtterance, ConversationCommand, RecognitionEvent,
};
use super::recorder::SessionRecorder;
use crate::config::EngineConfig;
use crate::echo::{EchoClassifier, SpokenText};
use crate::error::{EngineError, Result};
use crate::intent::{Intent, IntentMatcher};
use crate::registration::{ArticleStatus, RegistrationProposal, reference_token};
use crate::runtime::{BargeInSource, DialogueState, RuntimeEvent};
use crate::services::{AnalysisResult, ChatReply, ChatRequest, Services, SpeechSynthesizer};
use crate::session::{ConversationSession, SessionId, Turn, TurnMetadata};
use crate::speech::to_speech_text;
use crate::vad::{BargeInDetector, VadDecision};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const RUNTIME_EVENT_CAPACITY: usize = 256;

/// Point-in-time view of the orchestrator, published after every step.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineSnapshot {
    /// Observable state.
    pub state: DialogueState,
    /// Persisted session id, once created.
    pub session_id: Option<SessionId>,
    /// Turns in the current conversation.
    pub turns: usize,
    /// Proposal awaiting the user's answer.
    pub proposal: Option<RegistrationProposal>,
    /// Whether the conversation is winding down.
    pub ending: bool,
}

/// Cloneable front-end handle to a running orchestrator.
#[derive(Clone)]
pub struct OrchestratorHandle {
    commands: mpsc::UnboundedSender<ConversationCommand>,
    runtime_tx: broadcast::Sender<RuntimeEvent>,
    snapshot_rx: watch::Receiver<EngineSnapshot>,
    cancel: CancellationToken,
}

impl OrchestratorHandle {
    /// Send a command.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Channel`] if the orchestrator has stopped.
    pub fn send(&self, command: ConversationCommand) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| EngineError::Channel("orchestrator stopped".into()))
    }

    /// Start a conversation.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Channel`] if the orchestrator has stopped.
    pub fn start(&self) -> Result<()> {
        self.send(ConversationCommand::Start)
    }

    /// Stop the conversation, keeping its history.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Channel`] if the orchestrator has stopped.
    pub fn stop(&self) -> Result<()> {
        self.send(ConversationCommand::Stop)
    }

    /// Stop the conversation and delete its history.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Channel`] if the orchestrator has stopped.
    pub fn discard(&self) -> Result<()> {
        self.send(ConversationCommand::Discard)
    }

    /// Commit the pending transcript without waiting for silence.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Channel`] if the orchestrator has stopped.
    pub fn finalize_now(&self) -> Result<()> {
        self.send(ConversationCommand::FinalizeNow)
    }

    /// Subscribe to runtime events.
    pub fn subscribe(&self) -> broadcast::Receiver<RuntimeEvent> {
        self.runtime_tx.subscribe()
    }

    /// Latest snapshot.
    pub fn snapshot(&self) -> EngineSnapshot {
        self.snapshot_rx.borrow().clone()
    }

    /// Watch snapshots as they change.
    pub fn watch(&self) -> watch::Receiver<EngineSnapshot> {
        self.snapshot_rx.clone()
    }

    /// Tear down any conversation and stop the orchestrator task.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

/// Completions posted back by spawned tasks.
enum EngineEvent {
    Capture(CaptureEvent),
    SessionCreated(SessionId),
    Corrected {
        raw: String,
        result: Result<String>,
    },
    ChatReplied(Result<ChatReply>),
    Analyzed(Result<AnalysisResult>),
    ArticleCreated {
        status: ArticleStatus,
        result: Result<String>,
    },
    PlaybackFinished {
        id: u64,
        outcome: PlaybackOutcome,
    },
}

type TaggedEvent = (u64, EngineEvent);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PlaybackOutcome {
    Completed,
    Interrupted,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SpeechKind {
    /// Ordinary reply; recognition and barge-in stay live.
    Reply,
    /// Final remark with the microphone already off.
    Closing,
}

struct Playback {
    id: u64,
    cancel: CancellationToken,
    kind: SpeechKind,
}

/// Everything scoped to one conversation. Dropped on every exit path.
struct Conversation {
    session: ConversationSession,
    recorder: SessionRecorder,
    assembler: UtteranceAssembler,
    spoken: SpokenText,
    capture_tx: mpsc::UnboundedSender<CaptureEvent>,
    cancel: CancellationToken,
    capture_wanted: bool,
    capture_restart_at: Option<Instant>,
    vad: Option<BargeInDetector>,
    vad_next_at: Option<Instant>,
    playback: Option<Playback>,
    proposal: Option<RegistrationProposal>,
    /// Assistant line to speak at the next quiet moment.
    announcement: Option<String>,
    ending: bool,
    analyzed: bool,
    analysis_in_flight: bool,
    explicit_request: bool,
    session_requested: bool,
}

impl Conversation {
    /// A proposal is pending and its question has been asked.
    fn confirming(&self) -> bool {
        self.proposal.is_some() && self.announcement.is_none()
    }
}

enum Step {
    Command(Option<ConversationCommand>),
    Event(u64, EngineEvent),
    Deadline,
    Shutdown,
}

/// Drives hands-free conversations against the configured [`Services`].
pub struct DialogueOrchestrator {
    config: EngineConfig,
    services: Services,
    matcher: IntentMatcher,
    commands_tx: mpsc::UnboundedSender<ConversationCommand>,
    commands_rx: mpsc::UnboundedReceiver<ConversationCommand>,
    events_tx: mpsc::UnboundedSender<TaggedEvent>,
    events_rx: mpsc::UnboundedReceiver<TaggedEvent>,
    runtime_tx: broadcast::Sender<RuntimeEvent>,
    snapshot_tx: watch::Sender<EngineSnapshot>,
    snapshot_rx: watch::Receiver<EngineSnapshot>,
    cancel: CancellationToken,
    state: DialogueState,
    observed: DialogueState,
    epoch: u64,
    next_playback: u64,
    conversation: Option<Conversation>,
}

impl DialogueOrchestrator {
    /// Create an orchestrator.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Config`] if the configuration is invalid.
    pub fn new(config: EngineConfig, services: Services) -> Result<Self> {
        config.validate()?;
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (runtime_tx, _) = broadcast::channel(RUNTIME_EVENT_CAPACITY);
        let (snapshot_tx, snapshot_rx) = watch::channel(EngineSnapshot::default());
        Ok(Self {
            matcher: IntentMatcher::new(&config.intents),
            config,
            services,
            commands_tx,
            commands_rx,
            events_tx,
            events_rx,
            runtime_tx,
            snapshot_tx,
            snapshot_rx,
            cancel: CancellationToken::new(),
            state: DialogueState::Idle,
            observed: DialogueState::Idle,
            epoch: 0,
            next_playback: 0,
            conversation: None,
        })
    }

    /// A handle for the presentation layer.
    pub fn handle(&self) -> OrchestratorHandle {
        OrchestratorHandle {
            commands: self.commands_tx.clone(),
            runtime_tx: self.runtime_tx.clone(),
            snapshot_rx: self.snapshot_rx.clone(),
            cancel: self.cancel.clone(),
        }
    }

    /// Run until shut down through a handle.
    pub async fn run(mut self) {
        info!("dialogue orchestrator running");
        loop {
            let deadline = self.next_deadline();
            let step = tokio::select! {
                biased;
                () = self.cancel.cancelled() => Step::Shutdown,
                command = self.commands_rx.recv() => Step::Command(command),
                Some((epoch, event)) = self.events_rx.recv() => Step::Event(epoch, event),
                () = sleep_until_deadline(deadline) => Step::Deadline,
            };

            match step {
                Step::Shutdown | Step::Command(None) => {
                    self.stop_conversation(true);
                    self.publish();
                    break;
                }
                Step::Command(Some(command)) => self.handle_command(command),
                Step::Event(epoch, event) if epoch == self.epoch => self.handle_event(event),
                Step::Event(..) => debug!("dropping event from a finished conversation"),
                Step::Deadline => self.handle_deadlines(Instant::now()),
            }
            self.publish();
        }
        info!("dialogue orchestrator stopped");
    }

    // ── commands ────────────────────────────────────────────────────────

    fn handle_command(&mut self, command: ConversationCommand) {
        debug!("command: {command:?}");
        match command {
            ConversationCommand::Start => self.start_conversation(),
            ConversationCommand::Stop => self.stop_conversation(true),
            ConversationCommand::Discard => self.stop_conversation(false),
            ConversationCommand::FinalizeNow => self.finalize_now(),
        }
    }

    fn start_conversation(&mut self) {
        if self.conversation.is_some() {
            debug!("conversation already running");
            return;
        }
        self.epoch += 1;

        if let Err(e) = self.services.microphone.open() {
            self.abort_conversation(&e);
            return;
        }

        let (capture_tx, capture_rx) = mpsc::unbounded_channel();
        let cancel = self.cancel.child_token();
        tokio::spawn(forward_capture(
            self.epoch,
            capture_rx,
            self.events_tx.clone(),
            cancel.clone(),
        ));

        self.conversation = Some(Conversation {
            session: ConversationSession::new(self.config.turn.session_mode.clone()),
            recorder: SessionRecorder::spawn(Arc::clone(&self.services.sessions)),
            assembler: UtteranceAssembler::new(
                EchoClassifier::new(&self.config.echo),
                Duration::from_millis(self.config.turn.silence_ms),
            ),
            spoken: SpokenText::default(),
            capture_tx,
            cancel,
            capture_wanted: true,
            capture_restart_at: None,
            vad: None,
            vad_next_at: None,
            playback: None,
            proposal: None,
            announcement: None,
            ending: false,
            analyzed: false,
            analysis_in_flight: false,
            explicit_request: false,
            session_requested: false,
        });
        self.state = DialogueState::Listening;
        info!("conversation started");
        self.ensure_capture();
    }

    /// Tear the conversation down. `keep` completes the session, otherwise
    /// it is deleted.
    fn stop_conversation(&mut self, keep: bool) {
        let Some(mut conversation) = self.conversation.take() else {
            return;
        };
        let keep = keep && !conversation.session.is_empty();
        if conversation.session_requested {
            if keep {
                conversation.session.complete();
                conversation.recorder.complete();
            } else {
                conversation.recorder.delete();
            }
        }
        let session_id = conversation.session.id.clone();
        self.release(conversation);
        info!("conversation stopped");
        self.emit(RuntimeEvent::ConversationEnded {
            session_id,
            completed: keep,
        });
    }

    /// End after a closing remark or closing reply has played.
    fn finish_conversation(&mut self) {
        let Some(mut conversation) = self.conversation.take() else {
            return;
        };
        conversation.session.complete();
        if conversation.session_requested {
            conversation.recorder.complete();
        }
        let session_id = conversation.session.id.clone();
        self.release(conversation);
        info!("conversation finished");
        self.emit(RuntimeEvent::ConversationEnded {
            session_id,
            completed: true,
        });
    }

    /// Surface a fatal error and tear the conversation down.
    fn abort_conversation(&mut self, err: &EngineError) {
        error!("conversation aborted: {err}");
        self.emit(RuntimeEvent::Error {
            message: err.to_string(),
            fatal: true,
        });
        if self.conversation.is_some() {
            self.stop_conversation(true);
        } else {
            self.services.microphone.close();
            self.state = DialogueState::Idle;
        }
    }

    fn release(&mut self, conversation: Conversation) {
        conversation.cancel.cancel();
        if conversation.playback.is_some() {
            self.services.synthesizer.stop();
            self.services.fallback_synthesizer.stop();
        }
        self.services.capture.stop();
        self.services.microphone.close();
        // The recorder task drains its queue after the handle drops.
        drop(conversation);
        self.epoch += 1;
        self.state = DialogueState::Idle;
    }

    fn finalize_now(&mut self) {
        if self.is_sending() {
            warn!("finalize rejected: an utterance is already in flight");
            return;
        }
        let now = Instant::now();
        let Some(conversation) = self.conversation.as_mut() else {
            return;
        };
        let Some(utterance) = conversation.assembler.finalize_now(now) else {
            return;
        };
        if self.state == DialogueState::Speaking {
            self.interrupt_playback(BargeInSource::Manual, now);
        }
        self.commit(utterance);
    }

    // ── timers ──────────────────────────────────────────────────────────

    fn next_deadline(&self) -> Option<Instant> {
        let conversation = self.conversation.as_ref()?;
        [
            conversation.assembler.deadline(),
            conversation.spoken.clear_deadline(),
            conversation.capture_restart_at,
            conversation.vad_next_at,
        ]
        .into_iter()
        .flatten()
        .min()
    }

    fn handle_deadlines(&mut self, now: Instant) {
        let Some(conversation) = self.conversation.as_mut() else {
            return;
        };
        if conversation.spoken.expire(now) {
            debug!("echo tail expired");
            // A barge-in the user never followed up leaves the floor free.
            self.announce_if_quiet();
        }

        let Some(conversation) = self.conversation.as_mut() else {
            return;
        };
        if conversation.vad_next_at.is_some_and(|at| now >= at) {
            self.sample_barge_in(now);
        }

        let Some(conversation) = self.conversation.as_mut() else {
            return;
        };
        if conversation.capture_restart_at.is_some_and(|at| now >= at) {
            conversation.capture_restart_at = None;
            // Speaking always re-arms recognition before playback.
            if !self.is_sending() {
                self.ensure_capture();
            }
        }

        let Some(conversation) = self.conversation.as_mut() else {
            return;
        };
        if let Some(utterance) = conversation.assembler.poll(now) {
            self.commit(utterance);
        }
    }

    fn sample_barge_in(&mut self, now: Instant) {
        let interval = Duration::from_millis(self.config.barge_in.sample_interval_ms);
        let level = self.services.microphone.level();
        let Some(conversation) = self.conversation.as_mut() else {
            return;
        };
        let Some(vad) = conversation.vad.as_mut() else {
            conversation.vad_next_at = None;
            return;
        };
        match vad.observe(level) {
            VadDecision::BargeIn { level, threshold } => {
                info!("barge-in: level {level:.1} over threshold {threshold:.1}");
                self.interrupt_playback(BargeInSource::Energy, now);
            }
            VadDecision::Calibrated(cal) => {
                debug!(
                    "barge-in calibrated: baseline {:.1}, threshold {:.1}",
                    cal.baseline, cal.threshold
                );
                conversation.vad_next_at = Some(now + interval);
            }
            VadDecision::Stopped => conversation.vad_next_at = None,
            VadDecision::Calibrating | VadDecision::Quiet => {
                conversation.vad_next_at = Some(now + interval);
            }
        }
    }

    // ── recognition ─────────────────────────────────────────────────────

    fn ensure_capture(&mut self) {
        let delay = self.restart_delay();
        let capture = Arc::clone(&self.services.capture);
        let Some(conversation) = self.conversation.as_mut() else {
            return;
        };
        if !conversation.capture_wanted || capture.is_active() {
            return;
        }
        conversation.capture_restart_at = None;
        let Err(e) = capture.start(conversation.capture_tx.clone()) else {
            debug!("recognition started");
            return;
        };
        if e.is_fatal() {
            self.abort_conversation(&e);
        } else {
            warn!("recognition start failed, retrying: {e}");
            conversation.capture_restart_at = Some(Instant::now() + delay);
        }
    }

    fn schedule_capture_restart(&mut self) {
        let at = Instant::now() + self.restart_delay();
        if let Some(conversation) = self.conversation.as_mut()
            && conversation.capture_wanted
            && conversation.capture_restart_at.is_none()
        {
            conversation.capture_restart_at = Some(at);
        }
    }

    fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.config.turn.capture_restart_delay_ms)
    }

    fn on_capture(&mut self, event: CaptureEvent) {
        match event {
            CaptureEvent::Recognition(recognition) => self.on_recognition(&recognition),
            CaptureEvent::Error(err) if err.is_fatal() => {
                let message = match err {
                    CaptureError::PermissionDenied(m) => m,
                    other => format!("{other:?}"),
                };
                self.abort_conversation(&EngineError::PermissionDenied(message));
            }
            CaptureEvent::Error(err) => {
                debug!("recognition error {err:?}, restarting");
                self.schedule_capture_restart();
            }
            CaptureEvent::Ended => {
                debug!("recognition ended, restarting");
                self.schedule_capture_restart();
            }
        }
    }

    fn on_recognition(&mut self, event: &RecognitionEvent) {
        if self.is_sending() {
            debug!("ignoring recognition while an utterance is in flight");
            return;
        }
        let now = Instant::now();
        let speaking = self.state == DialogueState::Speaking;
        let Some(conversation) = self.conversation.as_mut() else {
            return;
        };
        if !conversation.capture_wanted {
            return;
        }
        let spoken = conversation.spoken.as_str().to_owned();
        match conversation.assembler.offer(event, &spoken, now) {
            AssemblerOutcome::Ignored => {}
            AssemblerOutcome::Echo => debug!("echo discarded: {}", event.text),
            AssemblerOutcome::Speech { transcript } => {
                self.emit(RuntimeEvent::Transcript { text: transcript });
                if speaking {
                    self.interrupt_playback(BargeInSource::Speech, now);
                }
            }
        }
    }

    fn commit(&mut self, utterance: CommittedUtterance) {
        if self.is_sending() {
            warn!("commit rejected: an utterance is already in flight");
            return;
        }
        let epoch = self.epoch;
        let mode = self.config.turn.session_mode.clone();
        let events_tx = self.events_tx.clone();
        let Some(conversation) = self.conversation.as_mut() else {
            return;
        };
        info!("committed utterance ({} chars)", utterance.text.chars().count());
        self.state = DialogueState::Committing;
        self.services.capture.stop();
        conversation.capture_restart_at = None;

        if !conversation.session_requested {
            conversation.session_requested = true;
            let tx = events_tx.clone();
            conversation.recorder.create(&mode, move |id| {
                let _ = tx.send((epoch, EngineEvent::SessionCreated(id)));
            });
        }

        let correction = Arc::clone(&self.services.correction);
        let raw = utterance.text;
        tokio::spawn(async move {
            let result = correction.correct(&raw).await;
            let _ = events_tx.send((epoch, EngineEvent::Corrected { raw, result }));
        });
    }

    // ── service completions ─────────────────────────────────────────────

    fn handle_event(&mut self, event: EngineEvent) {
        if self.conversation.is_none() {
            return;
        }
        match event {
            EngineEvent::Capture(event) => self.on_capture(event),
            EngineEvent::SessionCreated(id) => {
                if let Some(conversation) = self.conversation.as_mut() {
                    conversation.session.id = Some(id);
                }
            }
            EngineEvent::Corrected { raw, result } => self.on_corrected(raw, result),
            EngineEvent::ChatReplied(result) => self.on_chat_replied(result),
            EngineEvent::Analyzed(result) => self.on_analyzed(result),
            EngineEvent::ArticleCreated { status, result } => {
                self.on_article_created(status, result);
            }
            EngineEvent::PlaybackFinished { id, outcome } => self.on_playback_finished(id, outcome),
        }
    }

    fn on_corrected(&mut self, raw: String, result: Result<String>) {
        if self.state != DialogueState::Committing {
            return;
        }
        let text = match result {
            Ok(corrected) if !corrected.trim().is_empty() => corrected.trim().to_owned(),
            Ok(_) => raw.clone(),
            Err(e) => {
                warn!("speech correction failed, using raw transcript: {e}");
                raw.clone()
            }
        };
        let Some(conversation) = self.conversation.as_ref() else {
            return;
        };
        let confirming = conversation.confirming();
        let pending = conversation.proposal.is_some();
        let prior_turns = conversation.session.len();
        let intent = self.matcher.classify(&text, confirming);
        info!("user turn routed as {intent:?}");

        self.record(Turn::user(text.clone(), Some(raw)));

        match intent {
            Intent::SaveDraft => self.confirm_registration(ArticleStatus::Draft),
            Intent::Publish | Intent::RegisterRequest if confirming => {
                self.confirm_registration(ArticleStatus::Published);
            }
            Intent::Dismiss | Intent::Closing { .. } if confirming => self.dismiss_proposal(),
            Intent::RegisterRequest if pending => {
                // The proposal question is still queued; ask it now.
                info!("registration requested with a proposal pending");
                self.enter_listening();
            }
            Intent::Publish | Intent::Dismiss | Intent::Chat => self.send_chat(text, None),
            Intent::Closing { strong } => {
                info!("closing phrase detected (strong: {strong})");
                if let Some(conversation) = self.conversation.as_mut() {
                    conversation.ending = true;
                }
                let hint = self.config.prompts.closing_hint.clone();
                self.send_chat(text, Some(hint));
            }
            Intent::RegisterRequest => self.request_registration(prior_turns),
        }
    }

    fn send_chat(&mut self, message: String, hint: Option<String>) {
        let epoch = self.epoch;
        let Some(conversation) = self.conversation.as_ref() else {
            return;
        };
        let turns = conversation.session.turns();
        let request = ChatRequest {
            message,
            history: turns[..turns.len().saturating_sub(1)].to_vec(),
            session_id: conversation.session.id.clone(),
            hint,
        };
        self.state = DialogueState::Processing;

        let chat = Arc::clone(&self.services.chat);
        let events_tx = self.events_tx.clone();
        tokio::spawn(async move {
            let result = chat.chat(request).await;
            let _ = events_tx.send((epoch, EngineEvent::ChatReplied(result)));
        });
    }

    fn on_chat_replied(&mut self, result: Result<ChatReply>) {
        if self.state != DialogueState::Processing {
            debug!("dropping late chat reply");
            return;
        }
        let reply = match result {
            Ok(reply) if !reply.reply_text.trim().is_empty() => reply,
            Ok(_) => {
                self.on_chat_failed(&EngineError::Chat("empty reply".into()));
                return;
            }
            Err(e) => {
                self.on_chat_failed(&e);
                return;
            }
        };

        let text = reply.reply_text.trim().to_owned();
        self.record(Turn::assistant(text.clone()).with_metadata(TurnMetadata {
            knowledge_refs: reply.related_references,
            created_article_id: None,
        }));
        self.maybe_analyze(false);
        self.speak(&text, SpeechKind::Reply);
    }

    fn on_chat_failed(&mut self, err: &EngineError) {
        warn!("chat failed: {err}");
        self.emit(RuntimeEvent::Error {
            message: err.to_string(),
            fatal: false,
        });
        let apology = self.config.prompts.apology.clone();
        self.record(Turn::assistant(apology));
        if self.conversation.as_ref().is_some_and(|c| c.ending) {
            self.finish_conversation();
        } else {
            self.enter_listening();
        }
    }

    // ── registration ────────────────────────────────────────────────────

    /// Start analysis if the conversation qualifies. `forced` skips the
    /// turn-count and already-analyzed checks. Returns whether a call was
    /// started.
    fn maybe_analyze(&mut self, forced: bool) -> bool {
        let epoch = self.epoch;
        let min_turns = self.config.registration.analysis_min_turns;
        let Some(conversation) = self.conversation.as_mut() else {
            return false;
        };
        if conversation.analysis_in_flight || conversation.proposal.is_some() || conversation.ending
        {
            return false;
        }
        if !forced && (conversation.analyzed || conversation.session.len() < min_turns) {
            return false;
        }
        conversation.analyzed = true;
        conversation.analysis_in_flight = true;
        let turns = conversation.session.turns().to_vec();
        debug!("analyzing conversation ({} turns)", turns.len());

        let analysis = Arc::clone(&self.services.analysis);
        let events_tx = self.events_tx.clone();
        tokio::spawn(async move {
            let result = analysis.analyze(&turns).await;
            let _ = events_tx.send((epoch, EngineEvent::Analyzed(result)));
        });
        true
    }

    fn request_registration(&mut self, prior_turns: usize) {
        if prior_turns < self.config.registration.guidance_min_turns {
            info!("registration requested after {prior_turns} turns, giving guidance");
            let guidance = self.config.prompts.guidance.clone();
            self.say(guidance);
            return;
        }
        let in_flight = self
            .conversation
            .as_ref()
            .is_some_and(|c| c.analysis_in_flight);
        if !in_flight && !self.maybe_analyze(true) {
            debug!("registration requested but analysis cannot run now");
            let nothing = self.config.prompts.nothing_to_register.clone();
            self.say(nothing);
            return;
        }
        // A running automatic analysis now answers this request.
        if let Some(conversation) = self.conversation.as_mut() {
            conversation.explicit_request = true;
        }
        let analyzing = self.config.prompts.analyzing.clone();
        self.say(analyzing);
    }

    fn on_analyzed(&mut self, result: Result<AnalysisResult>) {
        let nothing = self.config.prompts.nothing_to_register.clone();
        let template = self.config.prompts.proposal.clone();
        let Some(conversation) = self.conversation.as_mut() else {
            return;
        };
        conversation.analysis_in_flight = false;
        let explicit = std::mem::take(&mut conversation.explicit_request);

        let proposal = match result {
            Ok(result) if result.should_register => {
                result.extracted.filter(RegistrationProposal::is_usable)
            }
            Ok(_) => None,
            Err(e) => {
                warn!("conversation analysis failed: {e}");
                None
            }
        };

        match proposal {
            Some(proposal) if !conversation.ending && conversation.proposal.is_none() => {
                info!("registration proposed: {}", proposal.title);
                conversation.announcement = Some(proposal.prompt(&template));
                conversation.proposal = Some(proposal.clone());
                self.emit(RuntimeEvent::ProposalReady(proposal));
                self.announce_if_quiet();
            }
            Some(_) => debug!("proposal arrived too late, ignoring"),
            None => {
                conversation.analyzed = false;
                if explicit && !conversation.ending {
                    conversation.announcement = Some(nothing);
                    self.announce_if_quiet();
                }
            }
        }
    }

    fn confirm_registration(&mut self, status: ArticleStatus) {
        let epoch = self.epoch;
        let Some(conversation) = self.conversation.as_mut() else {
            return;
        };
        let Some(proposal) = conversation.proposal.clone() else {
            warn!("confirmation without a pending proposal");
            self.enter_listening();
            return;
        };
        info!("saving '{}' as {}", proposal.title, status.as_str());
        self.state = DialogueState::Processing;
        conversation.capture_wanted = false;
        conversation.capture_restart_at = None;
        self.services.capture.stop();
        self.services.microphone.close();

        let article = proposal.to_article(status, &self.config.registration);
        let knowledge = Arc::clone(&self.services.knowledge);
        let events_tx = self.events_tx.clone();
        tokio::spawn(async move {
            let result = knowledge.create(&article).await;
            let _ = events_tx.send((epoch, EngineEvent::ArticleCreated { status, result }));
        });
    }

    fn on_article_created(&mut self, status: ArticleStatus, result: Result<String>) {
        if self.state != DialogueState::Processing {
            return;
        }
        match result {
            Ok(id) => {
                info!("article {id} saved as {}", status.as_str());
                self.services.knowledge.invalidate_cache();
                let remark = match status {
                    ArticleStatus::Published => self.config.prompts.published.clone(),
                    ArticleStatus::Draft => self.config.prompts.drafted.clone(),
                };
                if let Some(conversation) = self.conversation.as_mut() {
                    conversation.proposal = None;
                    conversation.announcement = None;
                    conversation.ending = true;
                }
                self.record(
                    Turn::assistant(format!("{remark} {}", reference_token(&id))).with_metadata(
                        TurnMetadata {
                            knowledge_refs: Vec::new(),
                            created_article_id: Some(id.clone()),
                        },
                    ),
                );
                self.emit(RuntimeEvent::ArticleCreated { id, status });
                self.speak(&remark, SpeechKind::Closing);
            }
            Err(e) => {
                warn!("article creation failed, proposal kept: {e}");
                self.emit(RuntimeEvent::Error {
                    message: e.to_string(),
                    fatal: false,
                });
                if let Some(conversation) = self.conversation.as_mut() {
                    conversation.capture_wanted = true;
                }
                if let Err(e) = self.services.microphone.open() {
                    self.abort_conversation(&e);
                    return;
                }
                let failed = self.config.prompts.save_failed.clone();
                self.say(failed);
            }
        }
    }

    fn dismiss_proposal(&mut self) {
        let note = self.config.prompts.skipped_note.clone();
        let remark = self.config.prompts.dismissed.clone();
        let Some(conversation) = self.conversation.as_mut() else {
            return;
        };
        info!("registration dismissed");
        conversation.proposal = None;
        conversation.announcement = None;
        conversation.ending = true;
        conversation.capture_wanted = false;
        conversation.capture_restart_at = None;
        self.services.capture.stop();
        self.services.microphone.close();
        self.record(Turn::assistant(note));
        self.speak(&remark, SpeechKind::Closing);
    }

    // ── speech output ───────────────────────────────────────────────────

    /// Record an assistant line and speak it.
    fn say(&mut self, text: String) {
        self.record(Turn::assistant(text.clone()));
        self.speak(&text, SpeechKind::Reply);
    }

    fn announce_if_quiet(&mut self) {
        if self.state != DialogueState::Listening {
            return;
        }
        let Some(conversation) = self.conversation.as_mut() else {
            return;
        };
        if conversation.assembler.has_pending() {
            return;
        }
        if let Some(text) = conversation.announcement.take() {
            self.say(text);
        }
    }

    fn enter_listening(&mut self) {
        self.state = DialogueState::Listening;
        let announcement = self
            .conversation
            .as_mut()
            .and_then(|c| c.announcement.take());
        match announcement {
            Some(text) => self.say(text),
            None => self.ensure_capture(),
        }
    }

    fn speak(&mut self, text: &str, kind: SpeechKind) {
        let plain = to_speech_text(text);
        if plain.is_empty() {
            self.after_playback(kind);
            return;
        }
        if kind == SpeechKind::Reply {
            // Recognition must be live before playback so barge-in works.
            self.ensure_capture();
        }

        let epoch = self.epoch;
        let now = Instant::now();
        let interval = Duration::from_millis(self.config.barge_in.sample_interval_ms);
        let barge_in = self.config.barge_in.clone();
        self.next_playback += 1;
        let id = self.next_playback;
        let Some(conversation) = self.conversation.as_mut() else {
            return;
        };

        conversation.spoken.set(&plain);
        if kind == SpeechKind::Reply && barge_in.enabled {
            conversation.vad = Some(BargeInDetector::new(&barge_in));
            conversation.vad_next_at = Some(now + interval);
        } else {
            conversation.vad = None;
            conversation.vad_next_at = None;
        }
        let cancel = conversation.cancel.child_token();
        conversation.playback = Some(Playback {
            id,
            cancel: cancel.clone(),
            kind,
        });
        self.state = DialogueState::Speaking;
        debug!("speaking: {plain}");

        let primary = Arc::clone(&self.services.synthesizer);
        let fallback = Arc::clone(&self.services.fallback_synthesizer);
        let events_tx = self.events_tx.clone();
        let spoken = plain.clone();
        tokio::spawn(async move {
            let outcome = tokio::select! {
                () = cancel.cancelled() => PlaybackOutcome::Interrupted,
                outcome = synthesize(primary, fallback, &spoken) => outcome,
            };
            let _ = events_tx.send((epoch, EngineEvent::PlaybackFinished { id, outcome }));
        });
        self.emit(RuntimeEvent::Speaking { text: plain });
    }

    fn on_playback_finished(&mut self, id: u64, outcome: PlaybackOutcome) {
        let tail = Duration::from_millis(self.config.echo.tail_ms);
        let Some(conversation) = self.conversation.as_mut() else {
            return;
        };
        let Some(playback) = conversation.playback.take_if(|p| p.id == id) else {
            debug!("ignoring stale playback completion");
            return;
        };
        conversation.vad = None;
        conversation.vad_next_at = None;
        conversation.spoken.clear_after(Instant::now() + tail);

        if outcome == PlaybackOutcome::Failed {
            self.emit(RuntimeEvent::Error {
                message: "speech synthesis unavailable".into(),
                fatal: false,
            });
        }
        self.after_playback(playback.kind);
    }

    fn after_playback(&mut self, kind: SpeechKind) {
        let ending = self.conversation.as_ref().is_some_and(|c| c.ending);
        if kind == SpeechKind::Closing || ending {
            self.finish_conversation();
        } else {
            self.enter_listening();
        }
    }

    fn interrupt_playback(&mut self, source: BargeInSource, now: Instant) {
        let tail = Duration::from_millis(self.config.echo.tail_ms);
        let Some(conversation) = self.conversation.as_mut() else {
            return;
        };
        let Some(playback) = conversation.playback.take() else {
            return;
        };
        playback.cancel.cancel();
        self.services.synthesizer.stop();
        self.services.fallback_synthesizer.stop();
        conversation.vad = None;
        conversation.vad_next_at = None;
        conversation.spoken.clear_after(now + tail);
        if conversation.ending {
            info!("barge-in cancelled the conversation close");
            conversation.ending = false;
        }
        // Recognition keeps running; the user is mid-sentence.
        self.state = DialogueState::Listening;
        info!("playback interrupted ({source:?})");
        self.emit(RuntimeEvent::BargeIn { source });
    }

    // ── bookkeeping ─────────────────────────────────────────────────────

    fn record(&mut self, turn: Turn) {
        let Some(conversation) = self.conversation.as_mut() else {
            return;
        };
        if !conversation.session.push(turn.clone()) {
            warn!("turn dropped: session already completed");
            return;
        }
        conversation.recorder.append(vec![turn.clone()]);
        let event = match turn.role {
            crate::session::Role::User => RuntimeEvent::UserTurn(turn),
            crate::session::Role::Assistant => RuntimeEvent::AssistantTurn(turn),
        };
        self.emit(event);
    }

    fn is_sending(&self) -> bool {
        matches!(
            self.state,
            DialogueState::Committing | DialogueState::Processing
        )
    }

    fn observed_state(&self) -> DialogueState {
        let Some(conversation) = self.conversation.as_ref() else {
            return DialogueState::Idle;
        };
        match self.state {
            DialogueState::Listening if conversation.confirming() => {
                DialogueState::ConfirmingRegistration
            }
            DialogueState::Speaking if conversation.ending => DialogueState::Ending,
            state => state,
        }
    }

    fn publish(&mut self) {
        let observed = self.observed_state();
        if observed != self.observed {
            debug!("state: {:?} -> {observed:?}", self.observed);
            self.observed = observed;
            self.emit(RuntimeEvent::StateChanged(observed));
        }
        let snapshot = match self.conversation.as_ref() {
            Some(conversation) => EngineSnapshot {
                state: observed,
                session_id: conversation.session.id.clone(),
                turns: conversation.session.len(),
                proposal: conversation.proposal.clone(),
                ending: conversation.ending,
            },
            None => EngineSnapshot::default(),
        };
        self.snapshot_tx.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });
    }

    fn emit(&self, event: RuntimeEvent) {
        // No subscribers is fine.
        let _ = self.runtime_tx.send(event);
    }
}

async fn synthesize(
    primary: Arc<dyn SpeechSynthesizer>,
    fallback: Arc<dyn SpeechSynthesizer>,
    text: &str,
) -> PlaybackOutcome {
    match primary.speak(text).await {
        Ok(()) => return PlaybackOutcome::Completed,
        Err(e) => warn!("synthesis failed, trying fallback: {e}"),
    }
    match fallback.speak(text).await {
        Ok(()) => PlaybackOutcome::Completed,
        Err(e) => {
            warn!("fallback synthesis failed, continuing without audio: {e}");
            PlaybackOutcome::Failed
        }
    }
}

async fn forward_capture(
    epoch: u64,
    mut rx: mpsc::UnboundedReceiver<CaptureEvent>,
    tx: mpsc::UnboundedSender<TaggedEvent>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            event = rx.recv() => match event {
                Some(event) => {
                    if tx.send((epoch, EngineEvent::Capture(event))).is_err() {
                        break;
                    }
                }
                None => break,
            },
        }
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
