//! Console front end for fieldvoice.
//!
//! Typed lines stand in for recognized speech and replies are printed
//! instead of spoken. The chat, analysis, correction, session and
//! knowledge services are the backend REST API.

use async_trait::async_trait;
use clap::{Parser, Subcommand};
use fieldvoice::audio::AudioLevelSource;
use fieldvoice::audio::meter::ActivityMeter;
use fieldvoice::pipeline::messages::{CaptureEvent, ConversationCommand, RecognitionEvent};
use fieldvoice::services::http::HttpBackend;
use fieldvoice::services::memory::SilentSynthesizer;
use fieldvoice::services::{SpeechCapture, SpeechSynthesizer};
use fieldvoice::{DialogueOrchestrator, EngineConfig, RuntimeEvent, Services};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::info;

/// Hands-free voice conversation engine, driven from a terminal.
#[derive(Parser)]
#[command(name = "fieldvoice-console", version, about)]
struct Cli {
    /// Path to TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Backend base URL (overrides the config file).
    #[arg(long)]
    base_url: Option<String>,

    /// Meter the real microphone for barge-in (needs the `cpal` feature).
    #[arg(long)]
    mic: bool,

    /// Subcommand to run.
    #[command(subcommand)]
    command: Option<Command>,
}

/// Available commands.
#[derive(Subcommand)]
enum Command {
    /// Start a conversation on stdin/stdout.
    Chat,

    /// Write the default configuration to the config path.
    InitConfig,

    /// List available input devices.
    Devices,
}

/// Stdin lines become final recognition results while capture is active.
#[derive(Default)]
struct StdinCapture {
    sink: Mutex<Option<mpsc::UnboundedSender<CaptureEvent>>>,
    active: AtomicBool,
}

impl StdinCapture {
    fn deliver(&self, text: &str) {
        if !self.active.load(Ordering::SeqCst) {
            println!("(not listening)");
            return;
        }
        let Ok(sink) = self.sink.lock() else {
            return;
        };
        if let Some(tx) = sink.as_ref() {
            let _ = tx.send(CaptureEvent::Recognition(RecognitionEvent::final_text(text)));
        }
    }
}

impl SpeechCapture for StdinCapture {
    fn start(&self, events: mpsc::UnboundedSender<CaptureEvent>) -> fieldvoice::Result<()> {
        if let Ok(mut sink) = self.sink.lock() {
            *sink = Some(events);
        }
        self.active.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&self) {
        self.active.store(false, Ordering::SeqCst);
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

/// Prints replies and holds for roughly the time they would take to say.
struct ConsoleSynthesizer;

#[async_trait]
impl SpeechSynthesizer for ConsoleSynthesizer {
    async fn speak(&self, text: &str) -> fieldvoice::Result<()> {
        println!("assistant> {text}");
        let millis = (text.chars().count() as u64 * 40).min(6_000);
        tokio::time::sleep(Duration::from_millis(millis)).await;
        Ok(())
    }

    fn stop(&self) {
        println!("(interrupted)");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fieldvoice::logging::init();

    let cli = Cli::parse();
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(EngineConfig::default_config_path);

    match cli.command {
        Some(Command::InitConfig) => {
            EngineConfig::default().save_to_file(&config_path)?;
            println!("wrote {}", config_path.display());
            Ok(())
        }
        Some(Command::Devices) => list_devices(),
        Some(Command::Chat) | None => {
            let mut config = if config_path.exists() {
                EngineConfig::from_file(&config_path)?
            } else {
                EngineConfig::default()
            };
            if let Some(url) = cli.base_url {
                config.service.base_url = url;
            }
            if let Ok(token) = std::env::var("FIELDVOICE_API_TOKEN") {
                config.service.api_token = Some(token);
            }
            run_chat(config, cli.mic).await
        }
    }
}

async fn run_chat(config: EngineConfig, use_mic: bool) -> anyhow::Result<()> {
    println!("fieldvoice v{}", env!("CARGO_PKG_VERSION"));

    let backend = Arc::new(HttpBackend::new(&config.service)?);
    let capture = Arc::new(StdinCapture::default());
    let services = Services {
        capture: capture.clone(),
        synthesizer: Arc::new(ConsoleSynthesizer),
        fallback_synthesizer: Arc::new(SilentSynthesizer),
        chat: backend.clone(),
        analysis: backend.clone(),
        correction: backend.clone(),
        sessions: backend.clone(),
        knowledge: backend,
        microphone: microphone(&config, use_mic)?,
    };

    let orchestrator = DialogueOrchestrator::new(config, services)?;
    let handle = orchestrator.handle();
    let mut events = handle.subscribe();
    let task = tokio::spawn(orchestrator.run());

    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                RuntimeEvent::StateChanged(state) => info!("state: {state:?}"),
                RuntimeEvent::ProposalReady(p) => println!("(proposal: {})", p.title),
                RuntimeEvent::ArticleCreated { id, status } => {
                    println!("(article {id} saved as {})", status.as_str());
                }
                RuntimeEvent::Error { message, .. } => eprintln!("error: {message}"),
                RuntimeEvent::ConversationEnded { .. } => {
                    println!("(conversation ended, type /start to begin again)");
                }
                _ => {}
            }
        }
    });

    let shutdown = handle.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received Ctrl+C, shutting down...");
            shutdown.shutdown();
        }
    });

    println!("Type to talk. Commands: /start /send /stop /discard /quit\n");
    handle.start()?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        let command = match line {
            "" => continue,
            "/quit" => break,
            "/start" => ConversationCommand::Start,
            "/send" => ConversationCommand::FinalizeNow,
            "/stop" => ConversationCommand::Stop,
            "/discard" => ConversationCommand::Discard,
            text => {
                capture.deliver(text);
                continue;
            }
        };
        handle.send(command)?;
    }

    handle.shutdown();
    task.await?;
    Ok(())
}

#[cfg(feature = "cpal")]
fn microphone(config: &EngineConfig, use_mic: bool) -> anyhow::Result<Arc<dyn AudioLevelSource>> {
    if use_mic {
        return Ok(Arc::new(fieldvoice::audio::capture::CpalMicrophone::new(
            &config.audio,
        )));
    }
    Ok(Arc::new(ActivityMeter::new(config.audio.meter_window)))
}

#[cfg(not(feature = "cpal"))]
fn microphone(config: &EngineConfig, use_mic: bool) -> anyhow::Result<Arc<dyn AudioLevelSource>> {
    if use_mic {
        anyhow::bail!("--mic needs a build with the `cpal` feature");
    }
    Ok(Arc::new(ActivityMeter::new(config.audio.meter_window)))
}

#[cfg(feature = "cpal")]
fn list_devices() -> anyhow::Result<()> {
    println!("Input devices:");
    for name in fieldvoice::audio::capture::CpalMicrophone::list_input_devices()? {
        println!("  - {name}");
    }
    Ok(())
}

#[cfg(not(feature = "cpal"))]
fn list_devices() -> anyhow::Result<()> {
    anyhow::bail!("device listing needs a build with the `cpal` feature")
}
