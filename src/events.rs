//! Events flowing from the session to whatever front end renders it.

use crate::tools::LightState;
use tokio::sync::mpsc::UnboundedSender;

/// Which controls the front end should offer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputState {
    /// A start or stop is in progress
    Working,
    /// No session; a new one may be started
    ReadyToStart,
    /// A session is live and may be stopped
    ReadyToStop,
}

#[derive(Debug, Clone, PartialEq)]
pub enum UiEvent {
    /// All transcript blocks were removed
    TranscriptCleared,
    /// A new text block was appended at `index`
    BlockAdded { index: usize, text: String },
    /// Block `index` now reads `text`
    BlockUpdated { index: usize, text: String },
    /// A turn separator was appended at `index`
    SeparatorAdded { index: usize },
    InputState(InputState),
    LightChanged(LightState),
    /// A message outside the transcript (device or startup problems)
    Notice(String),
}

/// Cheap handle for emitting [`UiEvent`]s. A detached handle drops them.
#[derive(Debug, Clone, Default)]
pub struct Ui {
    tx: Option<UnboundedSender<UiEvent>>,
}

impl Ui {
    pub fn new(tx: UnboundedSender<UiEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    /// A handle with no front end attached.
    pub fn detached() -> Self {
        Self::default()
    }

    pub fn emit(&self, event: UiEvent) {
        if let Some(tx) = &self.tx {
            // The front end going away must never disturb the session
            let _ = tx.send(event);
        }
    }

    pub fn input_state(&self, state: InputState) {
        self.emit(UiEvent::InputState(state));
    }

    pub fn notice(&self, text: impl Into<String>) {
        self.emit(UiEvent::Notice(text.into()));
    }
}
