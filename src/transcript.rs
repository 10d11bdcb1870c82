//! Display model of the conversation: an ordered list of text blocks and turn
//! separators, mirrored to the front end as [`UiEvent`]s.

use crate::events::{Ui, UiEvent};

pub const SESSION_STARTED: &str = "<< Session Started >>";
pub const SPEECH_STARTED: &str = "<< Speech Started >>";
pub const FUNCTION_CALL_REQUEST: &str = "<< Function Call Request >>";
pub const SENDING_TEXT: &str = "<< Sending text content >>";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Block {
    Text(String),
    Separator,
}

impl Block {
    pub fn text(&self) -> Option<&str> {
        match self {
            Block::Text(text) => Some(text),
            Block::Separator => None,
        }
    }
}

#[derive(Debug, Default)]
pub struct Transcript {
    blocks: Vec<Block>,
    /// Block that receives the finalized user transcript
    latest_speech: Option<usize>,
    ui: Ui,
}

impl Transcript {
    pub fn new(ui: Ui) -> Self {
        Self {
            blocks: Vec::new(),
            latest_speech: None,
            ui,
        }
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Text of the last block, if it is a text block.
    pub fn open_block(&self) -> Option<&str> {
        self.blocks.last().and_then(Block::text)
    }

    pub fn latest_speech_block(&self) -> Option<&str> {
        self.latest_speech
            .and_then(|i| self.blocks.get(i))
            .and_then(Block::text)
    }

    pub fn clear(&mut self) {
        self.blocks.clear();
        self.latest_speech = None;
        self.ui.emit(UiEvent::TranscriptCleared);
    }

    /// Append a new text block and return its index.
    pub fn new_block(&mut self, text: impl Into<String>) -> usize {
        let text = text.into();
        let index = self.blocks.len();
        self.blocks.push(Block::Text(text.clone()));
        self.ui.emit(UiEvent::BlockAdded { index, text });
        index
    }

    /// Append to the open block, opening one if the last block is not text.
    pub fn append(&mut self, text: &str) {
        let index = match self.blocks.last() {
            Some(Block::Text(_)) => self.blocks.len() - 1,
            _ => self.new_block(String::new()),
        };
        self.append_at(index, text);
    }

    fn append_at(&mut self, index: usize, text: &str) {
        if let Some(Block::Text(block)) = self.blocks.get_mut(index) {
            block.push_str(text);
            let text = block.clone();
            self.ui.emit(UiEvent::BlockUpdated { index, text });
        }
    }

    /// Add the speech-started marker, remember it, and open a fresh block for
    /// what follows.
    pub fn mark_speech_started(&mut self) {
        self.latest_speech = Some(self.new_block(SPEECH_STARTED));
        self.new_block(String::new());
    }

    /// Attach a finalized user transcript to the latest speech marker.
    pub fn append_user_transcript(&mut self, transcript: &str) {
        let text = format!(" User: {}", transcript);
        match self.latest_speech {
            Some(index) => self.append_at(index, &text),
            None => self.append(&text),
        }
    }

    pub fn separator(&mut self) {
        let index = self.blocks.len();
        self.blocks.push(Block::Separator);
        self.ui.emit(UiEvent::SeparatorAdded { index });
    }
}
