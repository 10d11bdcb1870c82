//! WAV file stand-ins for a microphone and a speaker.

use super::{encode_pcm16, AudioBackend, CaptureSource, NullCapture, NullPlayback, PlaybackSink};
use crate::error::{RealtimeError, Result};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Streams a PCM16 mono WAV file as if it were being recorded.
pub struct WavCapture {
    path: PathBuf,
    /// Delay between 100 ms chunks; `None` delivers as fast as possible
    pacing: Option<Duration>,
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl WavCapture {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            pacing: Some(Duration::from_millis(100)),
            shutdown: Arc::new(AtomicBool::new(false)),
            handle: None,
        }
    }

    pub fn with_pacing(mut self, pacing: Option<Duration>) -> Self {
        self.pacing = pacing;
        self
    }

    fn read_samples(path: &Path) -> Result<(u32, Vec<i16>)> {
        let mut reader = hound::WavReader::open(path)?;
        let spec = reader.spec();
        if spec.channels != 1
            || spec.bits_per_sample != 16
            || spec.sample_format != hound::SampleFormat::Int
        {
            return Err(RealtimeError::Audio(format!(
                "{} must be 16-bit mono PCM, found {} channels at {} bits",
                path.display(),
                spec.channels,
                spec.bits_per_sample
            )));
        }
        if spec.sample_rate != super::PLAYBACK_SAMPLE_RATE {
            warn!(
                "{} is {} Hz, the model expects {} Hz",
                path.display(),
                spec.sample_rate,
                super::PLAYBACK_SAMPLE_RATE
            );
        }
        let samples = reader.samples::<i16>().collect::<std::result::Result<Vec<_>, _>>()?;
        Ok((spec.sample_rate, samples))
    }
}

impl CaptureSource for WavCapture {
    fn start(&mut self, tx: mpsc::Sender<Vec<u8>>) -> Result<()> {
        let (sample_rate, samples) = Self::read_samples(&self.path)?;
        info!("Capturing {} samples from {}", samples.len(), self.path.display());

        self.shutdown.store(false, Ordering::Relaxed);
        let shutdown = self.shutdown.clone();
        let pacing = self.pacing;
        let chunk_samples = (sample_rate / 10).max(1) as usize;

        self.handle = Some(std::thread::spawn(move || {
            for chunk in samples.chunks(chunk_samples) {
                if shutdown.load(Ordering::Relaxed) {
                    break;
                }
                if tx.blocking_send(encode_pcm16(chunk)).is_err() {
                    debug!("Capture receiver dropped");
                    break;
                }
                if let Some(delay) = pacing {
                    std::thread::sleep(delay);
                }
            }
            debug!("WAV capture finished");
        }));
        Ok(())
    }

    fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        // The thread notices the flag after at most one pacing delay
        self.handle.take();
    }
}

impl Drop for WavCapture {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }
}

/// Writes model audio to a WAV file. Cleared audio has already been written.
pub struct WavPlayback {
    path: PathBuf,
    writer: Option<hound::WavWriter<BufWriter<File>>>,
    cleared: usize,
}

impl WavPlayback {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            writer: None,
            cleared: 0,
        }
    }

    /// Number of times playback was interrupted.
    pub fn clear_count(&self) -> usize {
        self.cleared
    }

    /// Flush the header and close the file.
    pub fn finish(&mut self) -> Result<()> {
        if let Some(writer) = self.writer.take() {
            writer.finalize()?;
            info!("Wrote model audio to {}", self.path.display());
        }
        Ok(())
    }
}

impl PlaybackSink for WavPlayback {
    fn init(&mut self, sample_rate: u32) -> Result<()> {
        self.finish()?;
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        self.writer = Some(hound::WavWriter::create(&self.path, spec)?);
        Ok(())
    }

    fn play(&mut self, samples: &[i16]) -> Result<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| RealtimeError::Audio("playback used before init".to_string()))?;
        for sample in samples {
            writer.write_sample(*sample)?;
        }
        Ok(())
    }

    fn clear(&mut self) {
        self.cleared += 1;
        debug!("Playback cleared ({} so far)", self.cleared);
    }
}

impl Drop for WavPlayback {
    fn drop(&mut self) {
        if let Err(e) = self.finish() {
            error!("Failed to finalize {}: {}", self.path.display(), e);
        }
    }
}

/// File-backed devices. A missing path falls back to the null device.
#[derive(Debug, Clone, Default)]
pub struct WavBackend {
    pub input: Option<PathBuf>,
    pub output: Option<PathBuf>,
    pub pacing: Option<Duration>,
}

impl WavBackend {
    pub fn new(input: Option<PathBuf>, output: Option<PathBuf>) -> Self {
        Self {
            input,
            output,
            pacing: Some(Duration::from_millis(100)),
        }
    }
}

impl AudioBackend for WavBackend {
    fn capture(&self) -> Result<Box<dyn CaptureSource>> {
        Ok(match &self.input {
            Some(path) => Box::new(WavCapture::new(path).with_pacing(self.pacing)),
            None => Box::new(NullCapture::default()),
        })
    }

    fn playback(&self) -> Result<Box<dyn PlaybackSink>> {
        Ok(match &self.output {
            Some(path) => Box::new(WavPlayback::new(path)),
            None => Box::new(NullPlayback),
        })
    }
}
