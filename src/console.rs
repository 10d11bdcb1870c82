//! Terminal front end: renders [`UiEvent`]s on stdout and turns stdin lines
//! into [`Command`]s.

use crate::events::{InputState, UiEvent};
use crate::runner::Command;
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::debug;

/// Map one line of input to a command. Blank lines map to nothing.
pub fn parse_command(line: &str) -> Option<Command> {
    let line = line.trim();
    match line {
        "" => None,
        "/start" => Some(Command::Start),
        "/stop" => Some(Command::Stop),
        "/quit" | "/exit" => Some(Command::Quit),
        text => Some(Command::SendText(text.to_string())),
    }
}

/// Forward stdin lines as commands until EOF.
pub async fn read_commands(tx: mpsc::Sender<Command>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if let Some(cmd) = parse_command(&line) {
                    if tx.send(cmd).await.is_err() {
                        break;
                    }
                }
            }
            Ok(None) => {
                let _ = tx.send(Command::Quit).await;
                break;
            }
            Err(e) => {
                debug!("stdin closed: {}", e);
                break;
            }
        }
    }
}

/// Streams transcript changes to a writer as they happen.
///
/// Updates to the block being written print only the new suffix; updates to
/// an earlier block (a late user transcript) reprint that block on its own line.
pub struct Renderer<W: Write> {
    out: W,
    /// Printed length of each text block
    printed: Vec<usize>,
    current: Option<usize>,
}

impl<W: Write> Renderer<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            printed: Vec::new(),
            current: None,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    pub fn render(&mut self, event: &UiEvent) -> std::io::Result<()> {
        match event {
            UiEvent::TranscriptCleared => {
                self.printed.clear();
                self.current = None;
            }
            UiEvent::BlockAdded { index, text } => {
                self.track(*index, text.len());
                self.current = Some(*index);
                write!(self.out, "\n{}", text)?;
            }
            UiEvent::BlockUpdated { index, text } => {
                let printed = self.printed.get(*index).copied().unwrap_or(0);
                if self.current == Some(*index) && printed <= text.len() && text.is_char_boundary(printed) {
                    write!(self.out, "{}", &text[printed..])?;
                } else {
                    write!(self.out, "\n[{}] {}", index, text)?;
                    self.current = None;
                }
                self.track(*index, text.len());
            }
            UiEvent::SeparatorAdded { index } => {
                self.track(*index, 0);
                self.current = None;
                write!(self.out, "\n----------------")?;
            }
            UiEvent::InputState(state) => {
                let hint = match state {
                    InputState::Working => "...",
                    InputState::ReadyToStart => "[type /start to begin, /quit to exit]",
                    InputState::ReadyToStop => "[listening; type to send text, /stop to end]",
                };
                write!(self.out, "\n{}", hint)?;
                self.current = None;
            }
            UiEvent::LightChanged(state) => {
                write!(
                    self.out,
                    "\n[light: {}, color {}]",
                    if state.on { "on" } else { "off" },
                    state.color.as_deref().unwrap_or("default")
                )?;
                self.current = None;
            }
            UiEvent::Notice(text) => {
                write!(self.out, "\n[{}]", text)?;
                self.current = None;
            }
        }
        self.out.flush()
    }

    fn track(&mut self, index: usize, len: usize) {
        if self.printed.len() <= index {
            self.printed.resize(index + 1, 0);
        }
        self.printed[index] = len;
    }
}

/// Render events to stdout until the channel closes.
pub async fn render_events(mut rx: mpsc::UnboundedReceiver<UiEvent>) {
    let mut renderer = Renderer::new(std::io::stdout());
    while let Some(event) = rx.recv().await {
        if let Err(e) = renderer.render(&event) {
            debug!("stdout closed: {}", e);
            break;
        }
    }
    let _ = writeln!(renderer.into_inner());
}
