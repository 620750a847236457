//! Configuration types for the voice conversation engine.
//!
//! Every tunable constant of the engine (debounce window, echo overlap
//! threshold, VAD multiplier, phrase lists, spoken prompts) lives here so
//! deployments can adjust them from a TOML file without recompiling.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Top-level configuration for the conversation engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Turn-taking timings.
    pub turn: TurnConfig,
    /// Self-echo rejection.
    pub echo: EchoConfig,
    /// Energy-based barge-in while the assistant is speaking.
    pub barge_in: BargeInConfig,
    /// Phrase families recognized by the intent matcher.
    pub intents: IntentConfig,
    /// Knowledge registration sub-dialogue.
    pub registration: RegistrationConfig,
    /// Fixed sentences the assistant speaks without asking the chat service.
    pub prompts: PromptConfig,
    /// REST service endpoint settings.
    pub service: ServiceConfig,
    /// Microphone level metering.
    pub audio: AudioConfig,
}

/// Turn-taking configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TurnConfig {
    /// Silence (ms) after the last genuine recognition event before the
    /// accumulated text is committed as the user's turn.
    pub silence_ms: u64,
    /// Delay (ms) before restarting recognition after a recoverable
    /// capture error or an unexpected end of the stream.
    pub capture_restart_delay_ms: u64,
    /// Mode tag stored with each persisted conversation session.
    pub session_mode: String,
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            silence_ms: 2_500,
            capture_restart_delay_ms: 300,
            session_mode: "voice".to_owned(),
        }
    }
}

/// Echo classifier configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EchoConfig {
    /// Candidates shorter than this (normalized chars) are never echo.
    pub min_chars: usize,
    /// Character n-gram size used for fuzzy overlap.
    pub ngram: usize,
    /// Fraction of the candidate's n-grams that must appear in the spoken
    /// text for the candidate to be classified as echo.
    pub overlap_threshold: f32,
    /// How long (ms) the spoken-text buffer is retained after playback ends
    /// or is interrupted, to suppress the residual acoustic tail.
    pub tail_ms: u64,
}

impl Default for EchoConfig {
    fn default() -> Self {
        Self {
            min_chars: 2,
            ngram: 3,
            overlap_threshold: 0.35,
            tail_ms: 1_000,
        }
    }
}

/// Barge-in detector configuration.
///
/// Energies are on the 0–255 scale produced by [`crate::audio::meter`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BargeInConfig {
    /// Whether energy-based barge-in runs during playback.
    pub enabled: bool,
    /// Sampling period (ms) of the activity meter while speaking.
    pub sample_interval_ms: u64,
    /// Number of samples averaged into the echo baseline.
    pub calibration_samples: usize,
    /// Threshold candidate: `baseline * multiplier`.
    pub multiplier: f32,
    /// Threshold candidate: `baseline + offset`.
    pub offset: f32,
    /// Absolute minimum threshold.
    pub floor: f32,
}

impl Default for BargeInConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sample_interval_ms: 100,
            calibration_samples: 15,
            multiplier: 2.5,
            offset: 15.0,
            floor: 25.0,
        }
    }
}

/// Phrase families for the intent matcher.
///
/// All phrases are matched as substrings of the normalized utterance
/// (lowercased, whitespace and punctuation removed).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IntentConfig {
    /// Closing phrases that end the conversation at any utterance length.
    pub strong_closing: Vec<String>,
    /// Closing phrases honored only in short utterances.
    pub soft_closing: Vec<String>,
    /// Soft closing phrases only match utterances shorter than this (chars).
    pub soft_closing_max_chars: usize,
    /// "Save this as knowledge" variants.
    pub registration_triggers: Vec<String>,
    /// Confirmation sub-state: save the proposal as a draft.
    pub draft: Vec<String>,
    /// Confirmation sub-state: publish the proposal.
    pub confirm: Vec<String>,
    /// Confirmation sub-state: discard the proposal.
    pub dismiss: Vec<String>,
}

fn owned(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| (*s).to_owned()).collect()
}

impl Default for IntentConfig {
    fn default() -> Self {
        Self {
            strong_closing: owned(&[
                "ありがとうございました",
                "終わります",
                "終了します",
                "以上です",
                "おしまい",
                "これで終わり",
                "会話を終了",
            ]),
            soft_closing: owned(&[
                "大丈夫です",
                "ありがとう",
                "了解です",
                "わかりました",
                "もういいです",
                "結構です",
            ]),
            soft_closing_max_chars: 25,
            registration_triggers: owned(&[
                "記録して",
                "登録して",
                "保存して",
                "ナレッジにして",
                "ナレッジに登録",
                "残しておいて",
                "記録しておいて",
            ]),
            draft: owned(&["下書き", "ドラフト", "一時保存"]),
            confirm: owned(&["登録", "はい", "お願い", "公開", "それで", "いいよ"]),
            dismiss: owned(&["キャンセル", "いいえ", "やめ", "不要", "しない", "いらない"]),
        }
    }
}

/// Knowledge registration configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrationConfig {
    /// Conversation analysis starts once the session holds this many turns.
    pub analysis_min_turns: usize,
    /// Below this many turns an explicit registration request gets a
    /// guidance reply instead of an analysis call.
    pub guidance_min_turns: usize,
    /// Controlled category vocabulary.
    pub categories: Vec<String>,
    /// Category used when the proposal's value is not in the vocabulary.
    pub default_category: String,
    /// Controlled risk-level vocabulary.
    pub risk_levels: Vec<String>,
    /// Risk level used when the proposal's value is not in the vocabulary.
    pub default_risk_level: String,
    /// Aliases mapped onto vocabulary entries (e.g. localized labels).
    pub aliases: BTreeMap<String, String>,
    /// Work type recorded on articles created from voice conversations.
    pub work_type: String,
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        let aliases = [
            ("安全", "safety"),
            ("保守", "maintenance"),
            ("点検", "maintenance"),
            ("品質", "quality"),
            ("手順", "procedure"),
            ("トラブル", "troubleshooting"),
            ("低", "low"),
            ("中", "medium"),
            ("高", "high"),
            ("重大", "critical"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_owned(), v.to_owned()))
        .collect();
        Self {
            analysis_min_turns: 5,
            guidance_min_turns: 4,
            categories: owned(&[
                "safety",
                "maintenance",
                "quality",
                "procedure",
                "troubleshooting",
                "other",
            ]),
            default_category: "other".to_owned(),
            risk_levels: owned(&["low", "medium", "high", "critical"]),
            default_risk_level: "medium".to_owned(),
            aliases,
            work_type: "voice-conversation".to_owned(),
        }
    }
}

/// Sentences spoken by the engine itself.
///
/// `{title}` in [`PromptConfig::proposal`] is replaced with the proposed
/// article title.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptConfig {
    /// Reply to a registration request on a conversation that is too short.
    pub guidance: String,
    /// Acknowledgement while an explicit registration request is analyzed.
    pub analyzing: String,
    /// Reply when analysis finds nothing worth registering.
    pub nothing_to_register: String,
    /// Question asked when a registration proposal is ready.
    pub proposal: String,
    /// Closing remark after publishing an article.
    pub published: String,
    /// Closing remark after saving a draft.
    pub drafted: String,
    /// Closing remark after the proposal is dismissed.
    pub dismissed: String,
    /// Turn text recorded when a proposal is dismissed.
    pub skipped_note: String,
    /// Reply when article creation fails.
    pub save_failed: String,
    /// Reply appended when the chat service fails.
    pub apology: String,
    /// Hint passed to the chat service for the final reply.
    pub closing_hint: String,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            guidance: "もう少しお話を聞かせてください。内容が集まったら記録を提案します。"
                .to_owned(),
            analyzing: "会話の内容を整理しています。少々お待ちください。".to_owned(),
            nothing_to_register: "今のところ記録できる内容が見つかりませんでした。続けてどうぞ。"
                .to_owned(),
            proposal: "「{title}」としてナレッジに登録しますか？登録、下書き、キャンセルでお答えください。"
                .to_owned(),
            published: "ナレッジとして登録しました。お疲れさまでした。".to_owned(),
            drafted: "下書きとして保存しました。お疲れさまでした。".to_owned(),
            dismissed: "登録はしませんでした。お疲れさまでした。".to_owned(),
            skipped_note: "ナレッジ登録をスキップしました。".to_owned(),
            save_failed: "登録に失敗しました。もう一度お試しいただくか、キャンセルと言ってください。"
                .to_owned(),
            apology: "すみません、うまく応答できませんでした。もう一度お願いします。".to_owned(),
            closing_hint: "closing".to_owned(),
        }
    }
}

/// REST service configuration for [`crate::services::http::HttpBackend`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Base URL of the application API (no trailing slash needed).
    pub base_url: String,
    /// Optional bearer token sent with every request.
    pub api_token: Option<String>,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".to_owned(),
            api_token: None,
            timeout_secs: 30,
        }
    }
}

/// Microphone level metering configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Input device name (None = system default).
    pub input_device: Option<String>,
    /// Number of recent audio chunks averaged into the reported level.
    pub meter_window: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            input_device: None,
            meter_window: 3,
        }
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file, falling back to defaults for missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| crate::error::EngineError::Config(e.to_string()))
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &std::path::Path) -> crate::error::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::error::EngineError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path: `<config dir>/fieldvoice/config.toml`.
    pub fn default_config_path() -> PathBuf {
        if let Some(config) = std::env::var_os("XDG_CONFIG_HOME") {
            PathBuf::from(config).join("fieldvoice").join("config.toml")
        } else if let Some(dir) = dirs::config_dir() {
            dir.join("fieldvoice").join("config.toml")
        } else {
            PathBuf::from("/tmp/fieldvoice-config/config.toml")
        }
    }

    /// Check values that would otherwise make the state machine misbehave.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::EngineError::Config`] describing the first invalid value.
    pub fn validate(&self) -> crate::error::Result<()> {
        use crate::error::EngineError;

        if self.turn.silence_ms == 0 {
            return Err(EngineError::Config("turn.silence_ms must be > 0".into()));
        }
        if self.echo.ngram == 0 {
            return Err(EngineError::Config("echo.ngram must be > 0".into()));
        }
        if !(0.0..=1.0).contains(&self.echo.overlap_threshold) {
            return Err(EngineError::Config(
                "echo.overlap_threshold must be within 0.0..=1.0".into(),
            ));
        }
        if self.barge_in.sample_interval_ms == 0 || self.barge_in.calibration_samples == 0 {
            return Err(EngineError::Config(
                "barge_in sampling interval and calibration samples must be > 0".into(),
            ));
        }
        if !self
            .registration
            .categories
            .contains(&self.registration.default_category)
        {
            return Err(EngineError::Config(format!(
                "registration.default_category '{}' is not in the category vocabulary",
                self.registration.default_category
            )));
        }
        if !self
            .registration
            .risk_levels
            .contains(&self.registration.default_risk_level)
        {
            return Err(EngineError::Config(format!(
                "registration.default_risk_level '{}' is not in the risk vocabulary",
                self.registration.default_risk_level
            )));
        }
        Ok(())
    }
}
