//! Accumulates captured PCM16 audio and cuts it into fixed-size frames for
//! `input_audio_buffer.append`.

use crate::protocol::ClientMessage;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use smallvec::SmallVec;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::trace;

/// Bytes of raw PCM16 per append frame (100 ms of 24 kHz mono)
pub const FRAME_BYTES: usize = 4800;

/// Shared switch saying whether captured audio should reach the server.
#[derive(Debug, Clone, Default)]
pub struct RecordingFlag(Arc<AtomicBool>);

impl RecordingFlag {
    pub fn new(active: bool) -> Self {
        Self(Arc::new(AtomicBool::new(active)))
    }

    pub fn set(&self, active: bool) {
        self.0.store(active, Ordering::SeqCst);
    }

    pub fn is_active(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
pub struct Chunker {
    buffer: Vec<u8>,
    recording: RecordingFlag,
}

impl Chunker {
    pub fn new(recording: RecordingFlag) -> Self {
        Self {
            buffer: Vec::with_capacity(FRAME_BYTES * 2),
            recording,
        }
    }

    /// Buffer `data` and return one append message per complete frame.
    ///
    /// While recording is off, complete frames are still taken off the buffer
    /// but are dropped instead of returned.
    pub fn append(&mut self, data: &[u8]) -> SmallVec<[ClientMessage; 2]> {
        let mut frames = SmallVec::new();
        self.buffer.extend_from_slice(data);

        while self.buffer.len() >= FRAME_BYTES {
            let frame: Vec<u8> = self.buffer.drain(..FRAME_BYTES).collect();
            if !self.recording.is_active() {
                continue;
            }
            frames.push(ClientMessage::InputAudioBufferAppend {
                audio: STANDARD.encode(&frame),
            });
        }
        trace!("Chunker emitted {} frames, {} bytes pending", frames.len(), self.buffer.len());
        frames
    }

    /// Bytes waiting for a full frame.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Discard the partial frame.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}
