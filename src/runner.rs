//! Session runner - connects user commands, the socket and the audio uplink
//! to the protocol state machine.

use crate::audio::AudioBackend;
use crate::client::{Endpoint, RealtimeClient};
use crate::error::Result;
use crate::events::{InputState, Ui};
use crate::outbox::Outbox;
use crate::protocol::{ServerMessage, SessionOptions};
use crate::session::{Session, SessionAudio, SessionState, UnknownToolPolicy};
use crate::tools::{ToolRegistry, ToolSchema};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Requests from the front end
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Stop,
    SendText(String),
    Quit,
}

/// Everything needed to open a session
#[derive(Debug, Clone)]
pub struct Settings {
    pub endpoint: Endpoint,
    pub options: SessionOptions,
    /// Start capture as soon as the session is created
    pub record: bool,
    pub unknown_tools: UnknownToolPolicy,
    /// Tool list to advertise; `None` advertises every registered tool
    pub advertised_tools: Option<Vec<ToolSchema>>,
}

/// A connected session and its channels
struct LiveSession {
    session: Session,
    client: RealtimeClient,
    inbound: mpsc::Receiver<ServerMessage>,
    captured: mpsc::Receiver<Vec<u8>>,
    writer: JoinHandle<()>,
}

enum Event {
    Command(Option<Command>),
    Inbound(Option<ServerMessage>),
    Captured(Vec<u8>),
}

pub struct SessionRunner {
    settings: Settings,
    tools: Arc<ToolRegistry>,
    advertised: Vec<ToolSchema>,
    audio: Arc<dyn AudioBackend>,
    ui: Ui,
    live: Option<LiveSession>,
}

impl SessionRunner {
    /// Create a runner. Fails if the advertised tool list does not match the
    /// registered handlers.
    pub fn new(settings: Settings, tools: ToolRegistry, audio: Arc<dyn AudioBackend>, ui: Ui) -> Result<Self> {
        let advertised = match &settings.advertised_tools {
            Some(list) => list.clone(),
            None => tools.schemas(),
        };
        tools.verify_advertised(&advertised)?;
        info!("{} tools ready", tools.len());

        Ok(Self {
            settings,
            tools: Arc::new(tools),
            advertised,
            audio,
            ui,
            live: None,
        })
    }

    /// State of the current session, if any.
    pub fn state(&self) -> Option<SessionState> {
        self.live.as_ref().map(|live| live.session.state())
    }

    /// Process commands until `Quit` or until the command channel closes.
    pub async fn run(mut self, mut commands: mpsc::Receiver<Command>) -> Result<()> {
        self.ui.input_state(InputState::ReadyToStart);

        loop {
            let event = match self.live.as_mut() {
                Some(live) => tokio::select! {
                    cmd = commands.recv() => Event::Command(cmd),
                    msg = live.inbound.recv() => Event::Inbound(msg),
                    Some(chunk) = live.captured.recv() => Event::Captured(chunk),
                },
                None => Event::Command(commands.recv().await),
            };

            match event {
                Event::Command(None) | Event::Command(Some(Command::Quit)) => {
                    self.stop().await;
                    break;
                }
                Event::Command(Some(Command::Start)) => self.start().await,
                Event::Command(Some(Command::Stop)) => self.stop().await,
                Event::Command(Some(Command::SendText(text))) => match self.live.as_mut() {
                    Some(live) => {
                        if let Err(e) = live.session.send_text(&text) {
                            warn!("Failed to send text: {}", e);
                        }
                    }
                    None => debug!("No session, text input ignored"),
                },
                Event::Inbound(Some(msg)) => {
                    if let Some(live) = self.live.as_mut() {
                        live.session.handle(msg);
                    }
                }
                Event::Inbound(None) => {
                    if let Some(live) = self.live.as_mut() {
                        if live.session.state() == SessionState::Configuring {
                            error!("Connection closed before the session was created");
                            live.session.connection_failed();
                        } else {
                            info!("Server ended the session");
                        }
                    }
                    self.stop().await;
                }
                Event::Captured(chunk) => {
                    if let Some(live) = self.live.as_mut() {
                        if let Err(e) = live.session.captured(&chunk) {
                            warn!("Failed to queue captured audio: {}", e);
                        }
                    }
                }
            }
        }

        info!("Runner finished");
        Ok(())
    }

    /// Open a new session, releasing any previous one first.
    async fn start(&mut self) {
        self.stop().await;
        self.ui.input_state(InputState::Working);

        let (capture_tx, captured) = mpsc::channel(32);
        let audio = match self.open_audio(capture_tx) {
            Ok(audio) => audio,
            Err(e) => {
                error!("Failed to open audio devices: {}", e);
                self.ui.notice(format!("Audio devices unavailable: {}", e));
                self.ui.input_state(InputState::ReadyToStart);
                return;
            }
        };

        let (outbox, outbox_rx) = Outbox::channel();
        let mut session = match Session::new(outbox, self.tools.clone(), audio, self.ui.clone()) {
            Ok(session) => session
                .with_options(self.settings.options.clone())
                .with_advertised_tools(self.advertised.clone())
                .with_recording(self.settings.record)
                .with_unknown_tool_policy(self.settings.unknown_tools),
            Err(e) => {
                error!("Failed to initialise playback: {}", e);
                self.ui.notice(format!("Playback unavailable: {}", e));
                self.ui.input_state(InputState::ReadyToStart);
                return;
            }
        };

        let config = session.begin();
        let (client, inbound) = match RealtimeClient::connect(&self.settings.endpoint).await {
            Ok(connected) => connected,
            Err(e) => {
                error!("Connection failed: {}", e);
                session.connection_failed();
                return;
            }
        };

        if let Err(e) = client.send(&config).await {
            error!("Failed to send session configuration: {}", e);
            session.connection_failed();
            client.close().await;
            return;
        }

        let writer = client.spawn_writer(outbox_rx);
        self.live = Some(LiveSession {
            session,
            client,
            inbound,
            captured,
            writer,
        });
    }

    fn open_audio(&self, capture_tx: mpsc::Sender<Vec<u8>>) -> Result<SessionAudio> {
        Ok(SessionAudio {
            playback: self.audio.playback()?,
            capture: self.audio.capture()?,
            capture_tx,
        })
    }

    /// Tear down the current session, if any.
    async fn stop(&mut self) {
        let Some(mut live) = self.live.take() else {
            return;
        };
        if live.session.state() != SessionState::Closed {
            self.ui.input_state(InputState::Working);
        }
        // Nothing may reach the socket once the session starts closing
        live.writer.abort();
        live.session.stop();
        live.client.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::NullAudio;
    use crate::client::Provider;
    use crate::error::RealtimeError;
    use crate::helper::HelperClient;
    use crate::tools::{builtin_tools, Lights};

    fn settings(advertised_tools: Option<Vec<ToolSchema>>) -> Settings {
        Settings {
            endpoint: Endpoint {
                provider: Provider::OpenAi {
                    base_url: None,
                    model: "m".to_string(),
                },
                api_key: "k".to_string(),
            },
            options: SessionOptions::default(),
            record: true,
            unknown_tools: UnknownToolPolicy::Ignore,
            advertised_tools,
        }
    }

    fn demo_tools() -> ToolRegistry {
        builtin_tools(
            Lights::default(),
            HelperClient::new("http://localhost:5099/windowssettings").unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn test_registered_tools_are_advertised_by_default() {
        let runner = SessionRunner::new(settings(None), demo_tools(), Arc::new(NullAudio), Ui::detached()).unwrap();
        assert_eq!(runner.advertised.len(), 8);
        assert!(runner.state().is_none());
    }

    #[test]
    fn test_advertised_list_missing_a_tool_is_rejected() {
        let tools = demo_tools();
        let mut advertised = tools.schemas();
        advertised.pop();

        let err = SessionRunner::new(settings(Some(advertised)), tools, Arc::new(NullAudio), Ui::detached())
            .err()
            .expect("mismatched list accepted");
        assert!(matches!(err, RealtimeError::ToolRegistry(_)), "got {:?}", err);
    }

    #[test]
    fn test_advertised_list_with_unknown_tool_is_rejected() {
        let tools = demo_tools();
        let mut advertised = tools.schemas();
        advertised[0].name = "dimLights".to_string();

        let err = SessionRunner::new(settings(Some(advertised)), tools, Arc::new(NullAudio), Ui::detached())
            .err()
            .expect("unknown tool accepted");
        assert!(matches!(err, RealtimeError::ToolRegistry(_)), "got {:?}", err);
    }

    #[test]
    fn test_reordered_advertised_list_is_accepted() {
        let tools = demo_tools();
        let mut advertised = tools.schemas();
        advertised.reverse();

        let runner =
            SessionRunner::new(settings(Some(advertised)), tools, Arc::new(NullAudio), Ui::detached()).unwrap();
        assert_eq!(runner.advertised.last().map(|t| t.name.as_str()), Some("switchLights"));
    }
}
