//! Audio input and output seams.
//!
//! The session only ever sees [`CaptureSource`] and [`PlaybackSink`]. Live
//! devices sit behind the `pulse` feature; WAV files and null devices are
//! always available.

use crate::error::Result;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use tokio::sync::mpsc;
use tracing::{debug, warn};

#[cfg(feature = "pulse")]
pub mod pulse;
pub mod wav;

#[cfg(feature = "pulse")]
pub use pulse::PulseAudio;
pub use wav::{WavBackend, WavCapture, WavPlayback};

/// Sample rate of model audio, and of the audio we capture
pub const PLAYBACK_SAMPLE_RATE: u32 = 24_000;

/// Receives model audio for playback.
pub trait PlaybackSink: Send {
    /// Prepare for PCM16 mono audio at `sample_rate`.
    fn init(&mut self, sample_rate: u32) -> Result<()>;

    /// Queue samples behind anything already queued.
    fn play(&mut self, samples: &[i16]) -> Result<()>;

    /// Drop everything queued but not yet played.
    fn clear(&mut self);
}

/// Produces raw little-endian PCM16 mono audio.
pub trait CaptureSource: Send {
    /// Start delivering captured bytes on `tx`.
    fn start(&mut self, tx: mpsc::Sender<Vec<u8>>) -> Result<()>;

    fn stop(&mut self);
}

/// Opens the devices for one session.
pub trait AudioBackend: Send + Sync {
    fn capture(&self) -> Result<Box<dyn CaptureSource>>;
    fn playback(&self) -> Result<Box<dyn PlaybackSink>>;
}

/// Decode a base64 PCM16 payload into samples. A trailing odd byte is dropped.
pub fn decode_pcm16(payload: &str) -> Result<Vec<i16>> {
    let bytes = STANDARD.decode(payload)?;
    if bytes.len() % 2 != 0 {
        warn!("Audio payload has an odd length ({} bytes), dropping last byte", bytes.len());
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect())
}

/// Serialize samples as little-endian PCM16 bytes.
pub fn encode_pcm16(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

#[derive(Debug, Default)]
pub struct NullPlayback;

impl PlaybackSink for NullPlayback {
    fn init(&mut self, sample_rate: u32) -> Result<()> {
        debug!("Null playback initialised at {} Hz", sample_rate);
        Ok(())
    }

    fn play(&mut self, _samples: &[i16]) -> Result<()> {
        Ok(())
    }

    fn clear(&mut self) {}
}

/// Capture source that never produces audio
#[derive(Debug, Default)]
pub struct NullCapture {
    tx: Option<mpsc::Sender<Vec<u8>>>,
}

impl CaptureSource for NullCapture {
    fn start(&mut self, tx: mpsc::Sender<Vec<u8>>) -> Result<()> {
        self.tx = Some(tx);
        Ok(())
    }

    fn stop(&mut self) {
        self.tx = None;
    }
}

#[derive(Debug, Default)]
pub struct NullAudio;

impl AudioBackend for NullAudio {
    fn capture(&self) -> Result<Box<dyn CaptureSource>> {
        Ok(Box::new(NullCapture::default()))
    }

    fn playback(&self) -> Result<Box<dyn PlaybackSink>> {
        Ok(Box::new(NullPlayback))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_pcm16() {
        let payload = STANDARD.encode(encode_pcm16(&[0, 1, -1, i16::MAX, i16::MIN]));
        assert_eq!(
            decode_pcm16(&payload).unwrap(),
            vec![0, 1, -1, i16::MAX, i16::MIN]
        );
    }

    #[test]
    fn test_decode_odd_length_drops_last_byte() {
        let payload = STANDARD.encode([0x01, 0x00, 0x7f]);
        assert_eq!(decode_pcm16(&payload).unwrap(), vec![1]);
    }

    #[test]
    fn test_decode_invalid_base64() {
        assert!(decode_pcm16("***").is_err());
    }
}
