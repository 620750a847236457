//! Spoken command detection.
//!
//! Committed utterances are checked against ordered phrase families before
//! they reach the chat service. Matching is substring-based on normalized
//! text and the first matching family wins.
//!
//! | Family | Active | Result |
//! |---|---|---|
//! | draft / dismiss / confirm | only while a proposal awaits an answer | [`Intent::SaveDraft`], [`Intent::Dismiss`], [`Intent::Publish`] |
//! | strong closing | always | [`Intent::Closing`] |
//! | soft closing | utterance shorter than the configured limit | [`Intent::Closing`] |
//! | registration trigger | always | [`Intent::RegisterRequest`] |

use crate::config::IntentConfig;
use crate::echo::normalize;

/// What a committed utterance asks the engine to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    /// Ordinary conversation; forward to the chat service.
    Chat,
    /// The user is wrapping up the conversation.
    Closing {
        /// Matched the strong (length-independent) set.
        strong: bool,
    },
    /// "Save this as knowledge."
    RegisterRequest,
    /// Confirmation sub-state: publish the proposal.
    Publish,
    /// Confirmation sub-state: save the proposal as a draft.
    SaveDraft,
    /// Confirmation sub-state: discard the proposal.
    Dismiss,
}

/// Phrase-family matcher.
#[derive(Debug, Clone)]
pub struct IntentMatcher {
    strong_closing: Vec<String>,
    soft_closing: Vec<String>,
    soft_closing_max_chars: usize,
    registration_triggers: Vec<String>,
    draft: Vec<String>,
    confirm: Vec<String>,
    dismiss: Vec<String>,
}

fn normalized_list(list: &[String]) -> Vec<String> {
    list.iter()
        .map(|p| normalize(p))
        .filter(|p| !p.is_empty())
        .collect()
}

fn contains_any(text: &str, phrases: &[String]) -> bool {
    phrases.iter().any(|p| text.contains(p.as_str()))
}

impl IntentMatcher {
    /// Build a matcher, normalizing every configured phrase once.
    pub fn new(config: &IntentConfig) -> Self {
        Self {
            strong_closing: normalized_list(&config.strong_closing),
            soft_closing: normalized_list(&config.soft_closing),
            soft_closing_max_chars: config.soft_closing_max_chars,
            registration_triggers: normalized_list(&config.registration_triggers),
            draft: normalized_list(&config.draft),
            confirm: normalized_list(&config.confirm),
            dismiss: normalized_list(&config.dismiss),
        }
    }

    /// Classify a committed utterance.
    ///
    /// `confirming` is true while a registration proposal awaits an answer;
    /// only then are the draft / dismiss / confirm sets consulted, and they
    /// are consulted before every other family. Dismiss is checked before
    /// confirm so that negated confirmations ("登録しない") are not read as
    /// a yes.
    pub fn classify(&self, utterance: &str, confirming: bool) -> Intent {
        let text = normalize(utterance);
        if text.is_empty() {
            return Intent::Chat;
        }

        if confirming {
            if contains_any(&text, &self.draft) {
                return Intent::SaveDraft;
            }
            if contains_any(&text, &self.dismiss) {
                return Intent::Dismiss;
            }
            if contains_any(&text, &self.confirm) {
                return Intent::Publish;
            }
        }

        if let Some(closing) = self.closing(utterance, &text) {
            return closing;
        }

        if contains_any(&text, &self.registration_triggers) {
            return Intent::RegisterRequest;
        }

        Intent::Chat
    }

    fn closing(&self, utterance: &str, text: &str) -> Option<Intent> {
        if contains_any(text, &self.strong_closing) {
            return Some(Intent::Closing { strong: true });
        }
        let length = utterance.trim().chars().count();
        if length < self.soft_closing_max_chars && contains_any(text, &self.soft_closing) {
            return Some(Intent::Closing { strong: false });
        }
        None
    }
}

impl Default for IntentMatcher {
    fn default() -> Self {
        Self::new(&IntentConfig::default())
    }
}
