//! Microphone capture and speaker playback through PulseAudio's simple API.
//!
//! Each device runs on its own OS thread since `Simple` blocks.

use super::{AudioBackend, CaptureSource, PlaybackSink, PLAYBACK_SAMPLE_RATE};
use crate::error::{RealtimeError, Result};
use libpulse_binding::sample::{Format, Spec};
use libpulse_binding::stream::Direction;
use libpulse_simple_binding::Simple;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

const APP_NAME: &str = "rtvoice";

/// 100 ms of 24 kHz mono PCM16
const CAPTURE_CHUNK_BYTES: usize = 4800;

fn spec(rate: u32) -> Spec {
    Spec {
        format: Format::S16le,
        channels: 1,
        rate,
    }
}

fn open(direction: Direction, description: &str, rate: u32, device: Option<&str>) -> Result<Simple> {
    let spec = spec(rate);
    if !spec.is_valid() {
        return Err(RealtimeError::Audio(format!("invalid sample spec at {} Hz", rate)));
    }
    Simple::new(None, APP_NAME, direction, device, description, &spec, None, None)
        .map_err(|e| RealtimeError::Audio(format!("failed to open {}: {}", description, e)))
}

/// Records from the default (or a named) PulseAudio source.
pub struct PulseCapture {
    device: Option<String>,
    shutdown: Arc<AtomicBool>,
}

impl PulseCapture {
    pub fn new(device: Option<String>) -> Self {
        Self {
            device,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl CaptureSource for PulseCapture {
    fn start(&mut self, tx: mpsc::Sender<Vec<u8>>) -> Result<()> {
        self.shutdown = Arc::new(AtomicBool::new(false));
        let shutdown = self.shutdown.clone();
        let device = self.device.clone();
        let (ready_tx, ready_rx) = std_mpsc::sync_channel::<Result<()>>(1);

        std::thread::spawn(move || {
            let simple = match open(Direction::Record, "record", PLAYBACK_SAMPLE_RATE, device.as_deref()) {
                Ok(simple) => {
                    let _ = ready_tx.send(Ok(()));
                    simple
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
            info!("Microphone capture started");

            let mut buffer = vec![0u8; CAPTURE_CHUNK_BYTES];
            while !shutdown.load(Ordering::Relaxed) {
                if let Err(e) = simple.read(&mut buffer) {
                    error!("Microphone read failed: {}", e);
                    break;
                }
                if tx.blocking_send(buffer.clone()).is_err() {
                    break;
                }
            }
            debug!("Microphone capture stopped");
        });

        ready_rx
            .recv()
            .map_err(|_| RealtimeError::Audio("capture thread exited during startup".to_string()))?
    }

    fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }
}

impl Drop for PulseCapture {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }
}

enum PlaybackCommand {
    /// Bytes tagged with the generation they were queued in
    Play(u64, Vec<u8>),
    Clear,
}

/// Plays model audio on the default PulseAudio sink.
#[derive(Default)]
pub struct PulsePlayback {
    commands: Option<std_mpsc::Sender<PlaybackCommand>>,
    /// Bumped on every clear; queued audio from older generations is skipped
    generation: Arc<AtomicU64>,
}

impl PlaybackSink for PulsePlayback {
    fn init(&mut self, sample_rate: u32) -> Result<()> {
        let (cmd_tx, cmd_rx) = std_mpsc::channel::<PlaybackCommand>();
        let (ready_tx, ready_rx) = std_mpsc::sync_channel::<Result<()>>(1);
        let generation = self.generation.clone();

        std::thread::spawn(move || {
            let simple = match open(Direction::Playback, "playback", sample_rate, None) {
                Ok(simple) => {
                    let _ = ready_tx.send(Ok(()));
                    simple
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };

            while let Ok(command) = cmd_rx.recv() {
                match command {
                    PlaybackCommand::Play(queued_in, bytes) => {
                        if queued_in != generation.load(Ordering::SeqCst) {
                            continue;
                        }
                        if let Err(e) = simple.write(&bytes) {
                            warn!("Speaker write failed: {}", e);
                        }
                    }
                    PlaybackCommand::Clear => {
                        if let Err(e) = simple.flush() {
                            warn!("Speaker flush failed: {}", e);
                        }
                    }
                }
            }
            debug!("Speaker thread exiting");
        });

        ready_rx
            .recv()
            .map_err(|_| RealtimeError::Audio("playback thread exited during startup".to_string()))??;
        self.commands = Some(cmd_tx);
        info!("Speaker playback initialised at {} Hz", sample_rate);
        Ok(())
    }

    fn play(&mut self, samples: &[i16]) -> Result<()> {
        let commands = self
            .commands
            .as_ref()
            .ok_or_else(|| RealtimeError::Audio("playback used before init".to_string()))?;
        commands
            .send(PlaybackCommand::Play(
                self.generation.load(Ordering::SeqCst),
                super::encode_pcm16(samples),
            ))
            .map_err(|_| RealtimeError::Audio("speaker thread is gone".to_string()))
    }

    fn clear(&mut self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(commands) = &self.commands {
            let _ = commands.send(PlaybackCommand::Clear);
        }
    }
}

/// Live microphone and speaker
#[derive(Debug, Clone, Default)]
pub struct PulseAudio {
    pub input_device: Option<String>,
}

impl AudioBackend for PulseAudio {
    fn capture(&self) -> Result<Box<dyn CaptureSource>> {
        Ok(Box::new(PulseCapture::new(self.input_device.clone())))
    }

    fn playback(&self) -> Result<Box<dyn PlaybackSink>> {
        Ok(Box::new(PulsePlayback::default()))
    }
}
