//! Microphone level feed using cpal.
//!
//! Opens the input device on a dedicated thread (cpal streams are not
//! `Send`), downmixes to mono and pushes every callback buffer into an
//! [`ActivityMeter`].

use super::AudioLevelSource;
use super::meter::ActivityMeter;
use crate::config::AudioConfig;
use crate::error::{EngineError, Result};
use cpal::StreamConfig;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use tracing::{error, info};

/// Running capture thread and the channel that stops it.
struct Feed {
    stop_tx: std_mpsc::Sender<()>,
    thread: JoinHandle<()>,
}

/// Microphone-backed [`AudioLevelSource`].
pub struct CpalMicrophone {
    input_device: Option<String>,
    meter: Arc<ActivityMeter>,
    feed: Mutex<Option<Feed>>,
}

impl CpalMicrophone {
    /// Create a microphone source. The device is not opened until
    /// [`AudioLevelSource::open`].
    pub fn new(config: &AudioConfig) -> Self {
        Self {
            input_device: config.input_device.clone(),
            meter: Arc::new(ActivityMeter::new(config.meter_window)),
            feed: Mutex::new(None),
        }
    }

    /// List available input devices.
    ///
    /// # Errors
    ///
    /// Returns an error if devices cannot be enumerated.
    pub fn list_input_devices() -> Result<Vec<String>> {
        let host = cpal::default_host();
        let devices = host
            .input_devices()
            .map_err(|e| EngineError::Capture(format!("cannot enumerate devices: {e}")))?;

        let mut names = Vec::new();
        for device in devices {
            if let Ok(desc) = device.description() {
                names.push(desc.name().to_owned());
            }
        }
        Ok(names)
    }
}

impl AudioLevelSource for CpalMicrophone {
    fn open(&self) -> Result<()> {
        let mut feed = self
            .feed
            .lock()
            .map_err(|_| EngineError::Capture("microphone state poisoned".into()))?;
        if feed.is_some() {
            return Ok(());
        }

        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
        let (ready_tx, ready_rx) = std_mpsc::channel::<Result<()>>();
        let meter = Arc::clone(&self.meter);
        let device_name = self.input_device.clone();

        let thread = std::thread::Builder::new()
            .name("fieldvoice-mic".into())
            .spawn(move || {
                let stream = match build_stream(device_name.as_deref(), meter) {
                    Ok(s) => s,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));
                // Hold the stream alive until told to stop.
                let _ = stop_rx.recv();
                drop(stream);
                info!("microphone released");
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                *feed = Some(Feed { stop_tx, thread });
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread.join();
                Err(EngineError::Capture("microphone thread exited early".into()))
            }
        }
    }

    fn close(&self) {
        let Ok(mut feed) = self.feed.lock() else {
            return;
        };
        if let Some(f) = feed.take() {
            let _ = f.stop_tx.send(());
            let _ = f.thread.join();
        }
        self.meter.reset();
    }

    fn level(&self) -> f32 {
        self.meter.level()
    }
}

impl Drop for CpalMicrophone {
    fn drop(&mut self) {
        self.close();
    }
}

fn build_stream(device_name: Option<&str>, meter: Arc<ActivityMeter>) -> Result<cpal::Stream> {
    let host = cpal::default_host();

    let device = if let Some(name) = device_name {
        host.input_devices()
            .map_err(|e| EngineError::Capture(format!("cannot enumerate devices: {e}")))?
            .find(|d| {
                d.description()
                    .ok()
                    .map(|desc| desc.name() == name)
                    .unwrap_or(false)
            })
            .ok_or_else(|| EngineError::Capture(format!("input device '{name}' not found")))?
    } else {
        host.default_input_device()
            .ok_or_else(|| EngineError::PermissionDenied("no default input device".into()))?
    };

    let default_config = device
        .default_input_config()
        .map_err(|e| EngineError::PermissionDenied(format!("no default input config: {e}")))?;
    let channels = default_config.channels();
    let stream_config = StreamConfig {
        channels,
        sample_rate: default_config.sample_rate(),
        buffer_size: cpal::BufferSize::Default,
    };

    let stream = device
        .build_input_stream(
            &stream_config,
            move |data: &[f32], _info: &cpal::InputCallbackInfo| {
                if channels > 1 {
                    meter.push_samples(&to_mono(data, channels));
                } else {
                    meter.push_samples(data);
                }
            },
            move |err| {
                error!("audio input stream error: {err}");
            },
            None,
        )
        .map_err(|e| EngineError::Capture(format!("failed to build input stream: {e}")))?;

    stream
        .play()
        .map_err(|e| EngineError::Capture(format!("failed to start input stream: {e}")))?;
    info!("microphone level feed started ({channels} channels)");
    Ok(stream)
}

/// Convert interleaved multi-channel audio to mono by averaging channels.
fn to_mono(data: &[f32], channels: u16) -> Vec<f32> {
    let ch = channels as usize;
    data.chunks_exact(ch)
        .map(|frame| frame.iter().sum::<f32>() / ch as f32)
        .collect()
}
