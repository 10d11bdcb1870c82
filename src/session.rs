//! Protocol state machine for one realtime session.
//!
//! A [`Session`] consumes server events strictly in arrival order, drives the
//! transcript and the playback sink, and answers function calls through the
//! [`Outbox`]. It never touches the socket directly, so every transition can
//! be exercised without a network.

use crate::audio::{decode_pcm16, CaptureSource, PlaybackSink, PLAYBACK_SAMPLE_RATE};
use crate::chunker::{Chunker, RecordingFlag};
use crate::error::Result;
use crate::events::{InputState, Ui};
use crate::outbox::Outbox;
use crate::protocol::{ClientMessage, ServerMessage, SessionConfig, SessionOptions};
use crate::tools::{Dispatch, ToolRegistry, ToolSchema};
use crate::transcript::{Transcript, FUNCTION_CALL_REQUEST, SENDING_TEXT, SESSION_STARTED};
use futures_util::FutureExt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

pub const CONNECTION_ERROR: &str = "[Connection error]: Unable to send initial config message. Please check your endpoint and authentication details.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Configuring,
    Active,
    Closing,
    Closed,
}

/// What to do with a function call naming a tool we do not have
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UnknownToolPolicy {
    /// Log it and send nothing
    #[default]
    Ignore,
    /// Answer with an `unknown function` output so the turn can finish
    Reject,
}

/// Devices owned by one session
pub struct SessionAudio {
    pub playback: Box<dyn PlaybackSink>,
    pub capture: Box<dyn CaptureSource>,
    /// Handed to the capture source when recording starts
    pub capture_tx: mpsc::Sender<Vec<u8>>,
}

pub struct Session {
    state: SessionState,
    outbox: Outbox,
    tools: Arc<ToolRegistry>,
    advertised: Vec<ToolSchema>,
    options: SessionOptions,
    playback: Box<dyn PlaybackSink>,
    capture: Box<dyn CaptureSource>,
    capture_tx: mpsc::Sender<Vec<u8>>,
    record_on_start: bool,
    recording: RecordingFlag,
    chunker: Chunker,
    unknown_tools: UnknownToolPolicy,
    transcript: Transcript,
    ui: Ui,
}

impl Session {
    /// Create an idle session and initialise playback.
    pub fn new(outbox: Outbox, tools: Arc<ToolRegistry>, audio: SessionAudio, ui: Ui) -> Result<Self> {
        let SessionAudio {
            mut playback,
            capture,
            capture_tx,
        } = audio;
        playback.init(PLAYBACK_SAMPLE_RATE)?;

        let recording = RecordingFlag::default();
        Ok(Self {
            state: SessionState::Idle,
            outbox,
            advertised: tools.schemas(),
            tools,
            options: SessionOptions::default(),
            playback,
            capture,
            capture_tx,
            record_on_start: true,
            chunker: Chunker::new(recording.clone()),
            recording,
            unknown_tools: UnknownToolPolicy::default(),
            transcript: Transcript::new(ui.clone()),
            ui,
        })
    }

    pub fn with_options(mut self, options: SessionOptions) -> Self {
        self.options = options;
        self
    }

    /// Tool list sent in `session.update`; defaults to the registry's schemas.
    pub fn with_advertised_tools(mut self, advertised: Vec<ToolSchema>) -> Self {
        self.advertised = advertised;
        self
    }

    pub fn with_unknown_tool_policy(mut self, policy: UnknownToolPolicy) -> Self {
        self.unknown_tools = policy;
        self
    }

    /// Whether capture starts when the server confirms the session.
    pub fn with_recording(mut self, record: bool) -> Self {
        self.record_on_start = record;
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_recording(&self) -> bool {
        self.recording.is_active()
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    /// Session configuration advertised to the server.
    pub fn config(&self) -> SessionConfig {
        SessionConfig::new(self.advertised.clone(), &self.options)
    }

    /// Move to `Configuring` and return the `session.update` to send first.
    pub fn begin(&mut self) -> ClientMessage {
        info!("Configuring session with {} tools", self.advertised.len());
        self.state = SessionState::Configuring;
        ClientMessage::SessionUpdate {
            session: self.config(),
        }
    }

    /// The transport could not be opened or the configuration could not be
    /// sent. The attempt is over; a new session may be started.
    pub fn connection_failed(&mut self) {
        error!("Session setup failed");
        self.outbox.close();
        self.transcript.new_block(CONNECTION_ERROR);
        self.state = SessionState::Closed;
        self.ui.input_state(InputState::ReadyToStart);
    }

    /// Consume one server event.
    pub fn handle(&mut self, msg: ServerMessage) {
        if let ServerMessage::SessionCreated { .. } = msg {
            if self.state == SessionState::Configuring {
                self.activate();
            } else {
                debug!("Ignoring session.created in state {:?}", self.state);
            }
            return;
        }

        if self.state != SessionState::Active {
            debug!("Ignoring {} in state {:?}", msg.kind(), self.state);
            return;
        }

        match msg {
            ServerMessage::AudioTranscriptDelta { delta } => self.transcript.append(&delta),
            ServerMessage::AudioDelta { delta } => match decode_pcm16(&delta) {
                Ok(samples) => {
                    if let Err(e) = self.playback.play(&samples) {
                        warn!("Playback failed: {}", e);
                    }
                }
                Err(e) => warn!("Undecodable audio delta: {}", e),
            },
            ServerMessage::SpeechStarted { .. } => {
                self.playback.clear();
                self.transcript.mark_speech_started();
            }
            ServerMessage::InputTranscriptionCompleted { transcript, .. } => {
                self.transcript.append_user_transcript(&transcript)
            }
            ServerMessage::ResponseDone { .. } => self.transcript.separator(),
            ServerMessage::FunctionCallArgumentsDone {
                call_id,
                name,
                arguments,
            } => self.function_call(call_id, name, arguments),
            ServerMessage::Error { error } => warn!("Server error: {}", error),
            ServerMessage::Other { kind, .. } => debug!("Unhandled server event {}", kind),
            ServerMessage::SessionCreated { .. } => {}
        }
    }

    fn activate(&mut self) {
        info!("Session created");
        self.transcript.clear();
        self.state = SessionState::Active;
        self.ui.input_state(InputState::ReadyToStop);

        if self.record_on_start {
            match self.capture.start(self.capture_tx.clone()) {
                Ok(()) => self.recording.set(true),
                Err(e) => {
                    error!("Failed to start audio capture: {}", e);
                    self.ui.notice(format!("Audio capture unavailable: {}", e));
                }
            }
        }

        self.transcript.new_block(SESSION_STARTED);
        self.transcript.new_block(String::new());
    }

    fn function_call(&mut self, call_id: String, name: String, arguments: String) {
        self.transcript.new_block(FUNCTION_CALL_REQUEST);
        self.transcript
            .new_block(format!("Calling {} with arguments {} ...", name, arguments));

        match self.tools.dispatch(&name, &arguments) {
            Dispatch::Unknown => match self.unknown_tools {
                UnknownToolPolicy::Ignore => warn!("No tool named {}, call {} dropped", name, call_id),
                UnknownToolPolicy::Reject => {
                    warn!("No tool named {}, rejecting call {}", name, call_id);
                    respond(&self.outbox, &call_id, format!("unknown function: {}", name));
                }
            },
            Dispatch::Rejected(reason) => respond(&self.outbox, &call_id, reason),
            Dispatch::Call(mut pending) => {
                let ready = (&mut pending).now_or_never();
                match ready {
                    Some(output) => respond(&self.outbox, &call_id, output),
                    None => {
                        debug!("Tool {} pending, call {} continues in background", name, call_id);
                        let outbox = self.outbox.clone();
                        tokio::spawn(async move {
                            let output = pending.await;
                            respond(&outbox, &call_id, output);
                        });
                    }
                }
            }
        }
    }

    /// Feed captured audio through the chunker and queue complete frames.
    pub fn captured(&mut self, data: &[u8]) -> Result<usize> {
        let frames = self.chunker.append(data);
        let count = frames.len();
        for frame in frames {
            self.outbox.send(frame)?;
        }
        Ok(count)
    }

    /// Send a typed user message. Only allowed while recording.
    pub fn send_text(&mut self, text: &str) -> Result<bool> {
        if !self.recording.is_active() {
            debug!("Not recording, text input ignored");
            return Ok(false);
        }
        self.transcript.new_block(SENDING_TEXT);
        self.outbox.send(ClientMessage::user_text(text))
    }

    /// Tear the session down. Outstanding tool calls keep running but their
    /// results are discarded.
    pub fn stop(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        info!("Stopping session");
        self.state = SessionState::Closing;
        self.recording.set(false);
        self.capture.stop();
        self.playback.clear();
        self.chunker.clear();
        self.outbox.close();
        self.state = SessionState::Closed;
        self.ui.input_state(InputState::ReadyToStart);
    }
}

/// Send the tool output followed by a `response.create`, unless the session
/// has been closed in the meantime.
fn respond(outbox: &Outbox, call_id: &str, output: String) {
    debug!("Function call {} resolved: {}", call_id, output);
    let answer = [
        ClientMessage::function_call_output(call_id, output),
        ClientMessage::ResponseCreate {},
    ];
    match outbox.send_all(answer) {
        Ok(true) => {}
        Ok(false) => debug!("Session closed, result of {} dropped", call_id),
        Err(e) => warn!("Failed to send result of {}: {}", call_id, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::FRAME_BYTES;
    use crate::events::UiEvent;
    use crate::tools::{builtin_tools, JsonType, Lights, ParameterSchema, ToolFuture, ToolSchema};
    use crate::helper::HelperClient;
    use crate::transcript::{Block, SPEECH_STARTED};
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde_json::Value;
    use std::sync::Mutex;
    use tokio::sync::mpsc::UnboundedReceiver;
    use tokio::sync::oneshot;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Debug, Clone, PartialEq)]
    enum Played {
        Init(u32),
        Samples(Vec<i16>),
        Clear,
    }

    #[derive(Clone, Default)]
    struct FakePlayback(Arc<Mutex<Vec<Played>>>);

    impl PlaybackSink for FakePlayback {
        fn init(&mut self, sample_rate: u32) -> Result<()> {
            self.0.lock().unwrap().push(Played::Init(sample_rate));
            Ok(())
        }

        fn play(&mut self, samples: &[i16]) -> Result<()> {
            self.0.lock().unwrap().push(Played::Samples(samples.to_vec()));
            Ok(())
        }

        fn clear(&mut self) {
            self.0.lock().unwrap().push(Played::Clear);
        }
    }

    #[derive(Clone, Default)]
    struct FakeCapture {
        started: Arc<Mutex<usize>>,
        stopped: Arc<Mutex<usize>>,
    }

    impl CaptureSource for FakeCapture {
        fn start(&mut self, _tx: mpsc::Sender<Vec<u8>>) -> Result<()> {
            *self.started.lock().unwrap() += 1;
            Ok(())
        }

        fn stop(&mut self) {
            *self.stopped.lock().unwrap() += 1;
        }
    }

    struct Harness {
        session: Session,
        sent: UnboundedReceiver<ClientMessage>,
        played: FakePlayback,
        capture: FakeCapture,
    }

    impl Harness {
        fn sent(&mut self) -> Vec<ClientMessage> {
            let mut messages = Vec::new();
            while let Ok(msg) = self.sent.try_recv() {
                messages.push(msg);
            }
            messages
        }

        fn played(&self) -> Vec<Played> {
            self.played.0.lock().unwrap().clone()
        }
    }

    fn harness_with(tools: ToolRegistry, ui: Ui) -> Harness {
        let (outbox, sent) = Outbox::channel();
        let played = FakePlayback::default();
        let capture = FakeCapture::default();
        let (capture_tx, _capture_rx) = mpsc::channel(8);
        let session = Session::new(
            outbox,
            Arc::new(tools),
            SessionAudio {
                playback: Box::new(played.clone()),
                capture: Box::new(capture.clone()),
                capture_tx,
            },
            ui,
        )
        .unwrap();
        Harness {
            session,
            sent,
            played,
            capture,
        }
    }

    fn demo_tools() -> ToolRegistry {
        builtin_tools(
            Lights::default(),
            HelperClient::new("http://localhost:5099/windowssettings").unwrap(),
        )
        .unwrap()
    }

    fn active(tools: ToolRegistry) -> Harness {
        let mut h = harness_with(tools, Ui::detached());
        h.session.begin();
        h.session.handle(ServerMessage::SessionCreated { session: Value::Null });
        h
    }

    fn function_call(call_id: &str, name: &str, arguments: &str) -> ServerMessage {
        ServerMessage::FunctionCallArgumentsDone {
            call_id: call_id.to_string(),
            name: name.to_string(),
            arguments: arguments.to_string(),
        }
    }

    fn assert_answered(messages: &[ClientMessage], call_id: &str, output: &str) {
        assert_eq!(messages.len(), 2, "got {:?}", messages);
        assert_eq!(messages[0], ClientMessage::function_call_output(call_id, output));
        assert_eq!(messages[1], ClientMessage::ResponseCreate {});
    }

    #[test]
    fn test_new_session_initialises_playback() {
        let h = harness_with(ToolRegistry::new(), Ui::detached());
        assert_eq!(h.session.state(), SessionState::Idle);
        assert_eq!(h.played(), vec![Played::Init(24_000)]);
    }

    #[test]
    fn test_begin_sends_configuration() {
        let mut h = harness_with(demo_tools(), Ui::detached());
        let msg = h.session.begin();
        assert_eq!(h.session.state(), SessionState::Configuring);

        let ClientMessage::SessionUpdate { session } = msg else {
            panic!("Expected session.update");
        };
        assert_eq!(session.tools.len(), 8);
        assert_eq!(session.tools[0].name, "switchLights");
        assert!(session.instructions.is_none());
    }

    #[test]
    fn test_configuration_uses_advertised_list() {
        let tools = demo_tools();
        let mut advertised = tools.schemas();
        advertised.reverse();
        let Harness { session, .. } = harness_with(tools, Ui::detached());
        let mut session = session.with_advertised_tools(advertised);

        let ClientMessage::SessionUpdate { session } = session.begin() else {
            panic!("Expected session.update");
        };
        assert_eq!(session.tools.len(), 8);
        assert_ne!(session.tools[0].name, "switchLights");
        assert_eq!(session.tools[7].name, "switchLights");
    }

    #[test]
    fn test_session_created_activates() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut h = harness_with(ToolRegistry::new(), Ui::new(tx));
        h.session.begin();
        h.session.handle(ServerMessage::SessionCreated { session: Value::Null });

        assert_eq!(h.session.state(), SessionState::Active);
        assert!(h.session.is_recording());
        assert_eq!(*h.capture.started.lock().unwrap(), 1);
        assert_eq!(
            h.session.transcript().blocks(),
            &[Block::Text(SESSION_STARTED.into()), Block::Text(String::new())]
        );

        let events: Vec<UiEvent> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        assert_eq!(events[0], UiEvent::TranscriptCleared);
        assert!(events.contains(&UiEvent::InputState(InputState::ReadyToStop)));
    }

    #[test]
    fn test_session_created_without_recording() {
        let mut h = harness_with(ToolRegistry::new(), Ui::detached());
        h.session = h.session.with_recording(false);
        h.session.begin();
        h.session.handle(ServerMessage::SessionCreated { session: Value::Null });

        assert_eq!(h.session.state(), SessionState::Active);
        assert!(!h.session.is_recording());
        assert_eq!(*h.capture.started.lock().unwrap(), 0);
    }

    #[test]
    fn test_transcript_deltas_concatenate() {
        let mut h = active(ToolRegistry::new());
        h.session.handle(ServerMessage::AudioTranscriptDelta { delta: "Hello".into() });
        h.session.handle(ServerMessage::AudioTranscriptDelta { delta: " world".into() });
        assert_eq!(h.session.transcript().open_block(), Some("Hello world"));
    }

    #[test]
    fn test_messages_before_session_created_are_ignored() {
        let mut h = harness_with(ToolRegistry::new(), Ui::detached());
        h.session.begin();
        h.session.handle(ServerMessage::AudioTranscriptDelta { delta: "early".into() });
        assert!(h.session.transcript().is_empty());
        assert_eq!(h.session.state(), SessionState::Configuring);
    }

    #[test]
    fn test_audio_delta_is_played() {
        let mut h = active(ToolRegistry::new());
        let payload = STANDARD.encode([0x01, 0x00, 0xff, 0xff]);
        h.session.handle(ServerMessage::AudioDelta { delta: payload });
        h.session.handle(ServerMessage::AudioDelta { delta: "not base64!".into() });

        assert_eq!(
            h.played(),
            vec![Played::Init(24_000), Played::Samples(vec![1, -1])]
        );
    }

    #[test]
    fn test_speech_started_clears_playback_before_later_audio() {
        let mut h = active(ToolRegistry::new());
        let audio = STANDARD.encode([0x02, 0x00]);
        h.session.handle(ServerMessage::AudioDelta { delta: audio.clone() });
        h.session.handle(ServerMessage::SpeechStarted {
            audio_start_ms: Some(100),
            item_id: None,
        });
        h.session.handle(ServerMessage::AudioDelta { delta: audio });

        assert_eq!(
            h.played(),
            vec![
                Played::Init(24_000),
                Played::Samples(vec![2]),
                Played::Clear,
                Played::Samples(vec![2]),
            ]
        );
        assert_eq!(h.session.transcript().latest_speech_block(), Some(SPEECH_STARTED));
    }

    #[test]
    fn test_user_transcript_and_response_done() {
        let mut h = active(ToolRegistry::new());
        h.session.handle(ServerMessage::SpeechStarted {
            audio_start_ms: None,
            item_id: None,
        });
        h.session.handle(ServerMessage::AudioTranscriptDelta { delta: "Sure.".into() });
        h.session.handle(ServerMessage::InputTranscriptionCompleted {
            transcript: "lights on".into(),
            item_id: None,
        });
        h.session.handle(ServerMessage::ResponseDone { response: Value::Null });

        let blocks = h.session.transcript().blocks();
        assert_eq!(blocks.last(), Some(&Block::Separator));
        assert_eq!(
            h.session.transcript().latest_speech_block(),
            Some("<< Speech Started >> User: lights on")
        );
        assert!(blocks.contains(&Block::Text("Sure.".into())));
    }

    #[tokio::test]
    async fn test_switch_lights_call_is_answered() {
        let mut h = active(demo_tools());
        h.session
            .handle(function_call("call_1", "switchLights", r#"{"turnOn":true}"#));

        assert_answered(&h.sent(), "call_1", "Light state changed.");
        let blocks = h.session.transcript().blocks();
        let n = blocks.len();
        assert_eq!(blocks[n - 2], Block::Text(FUNCTION_CALL_REQUEST.into()));
        assert_eq!(
            blocks[n - 1],
            Block::Text(r#"Calling switchLights with arguments {"turnOn":true} ..."#.into())
        );
    }

    #[tokio::test]
    async fn test_helper_error_is_still_answered() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/windowssettings/settheme/"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let tools = builtin_tools(
            Lights::default(),
            HelperClient::new(&format!("{}/windowssettings", server.uri())).unwrap(),
        )
        .unwrap();
        let mut h = active(tools);
        h.session
            .handle(function_call("call_2", "setWindowsTheme", r#"{"theme":"Dark"}"#));

        let first = h.sent.recv().await.unwrap();
        let second = h.sent.recv().await.unwrap();
        assert_answered(&[first, second], "call_2", "http request failed with 500");
    }

    #[tokio::test]
    async fn test_invalid_arguments_are_answered() {
        let mut h = active(demo_tools());
        h.session
            .handle(function_call("call_3", "switchLights", r#"{"turnOn":"yes"}"#));

        let sent = h.sent();
        assert_answered(
            &sent,
            "call_3",
            "invalid arguments for switchLights: property `turnOn` must be a boolean",
        );
    }

    #[tokio::test]
    async fn test_unknown_tool_policies() {
        let mut h = active(demo_tools());
        h.session.handle(function_call("call_4", "openPodBayDoors", "{}"));
        assert!(h.sent().is_empty());

        let mut h = active(demo_tools());
        h.session = h.session.with_unknown_tool_policy(UnknownToolPolicy::Reject);
        h.session.handle(function_call("call_5", "openPodBayDoors", "{}"));
        assert_answered(&h.sent(), "call_5", "unknown function: openPodBayDoors");
    }

    fn gated_tool(gate: oneshot::Receiver<String>) -> ToolRegistry {
        let gate = Mutex::new(Some(gate));
        let mut tools = ToolRegistry::new();
        tools
            .register(
                ToolSchema::function(
                    "slow",
                    "Waits for the test",
                    ParameterSchema::new().optional("x", JsonType::Number, "unused"),
                ),
                move |_args: Value| -> ToolFuture {
                    let rx = gate.lock().unwrap().take().unwrap();
                    async move { rx.await.unwrap_or_default() }.boxed()
                },
            )
            .unwrap();
        tools
    }

    #[tokio::test]
    async fn test_pending_call_does_not_block_messages() {
        let (release, gate) = oneshot::channel();
        let mut h = active(gated_tool(gate));
        h.session.handle(function_call("call_6", "slow", ""));
        h.session.handle(ServerMessage::AudioTranscriptDelta { delta: "still here".into() });
        assert_eq!(h.session.transcript().open_block(), Some("still here"));
        assert!(h.sent().is_empty());

        release.send("done".to_string()).unwrap();
        let first = h.sent.recv().await.unwrap();
        let second = h.sent.recv().await.unwrap();
        assert_answered(&[first, second], "call_6", "done");
    }

    #[tokio::test]
    async fn test_late_result_after_stop_is_dropped() {
        let (release, gate) = oneshot::channel();
        let mut h = active(gated_tool(gate));
        h.session.handle(function_call("call_7", "slow", "{}"));
        h.session.stop();

        release.send("too late".to_string()).unwrap();
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(h.sent().is_empty());
    }

    #[test]
    fn test_captured_audio_is_framed() {
        let mut h = active(ToolRegistry::new());
        assert_eq!(h.session.captured(&vec![1u8; 5000]).unwrap(), 1);
        assert_eq!(h.session.captured(&vec![2u8; 4600]).unwrap(), 1);

        let sent = h.sent();
        assert_eq!(sent.len(), 2);
        for msg in &sent {
            let ClientMessage::InputAudioBufferAppend { audio } = msg else {
                panic!("Expected an append, got {:?}", msg);
            };
            assert_eq!(STANDARD.decode(audio).unwrap().len(), FRAME_BYTES);
        }
    }

    #[test]
    fn test_no_frames_without_recording() {
        let mut h = harness_with(ToolRegistry::new(), Ui::detached());
        h.session = h.session.with_recording(false);
        h.session.begin();
        h.session.handle(ServerMessage::SessionCreated { session: Value::Null });
        assert_eq!(h.session.captured(&vec![0u8; FRAME_BYTES * 3]).unwrap(), 0);
        assert!(h.sent().is_empty());
    }

    #[test]
    fn test_send_text_only_while_recording() {
        let mut h = harness_with(ToolRegistry::new(), Ui::detached());
        assert!(!h.session.send_text("ignored").unwrap());

        h.session.begin();
        h.session.handle(ServerMessage::SessionCreated { session: Value::Null });
        assert!(h.session.send_text("hello").unwrap());
        assert_eq!(h.sent(), vec![ClientMessage::user_text("hello")]);
        assert_eq!(h.session.transcript().open_block(), Some(SENDING_TEXT));
    }

    #[test]
    fn test_stop_releases_everything() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut h = harness_with(ToolRegistry::new(), Ui::new(tx));
        h.session.begin();
        h.session.handle(ServerMessage::SessionCreated { session: Value::Null });
        h.session.stop();

        assert_eq!(h.session.state(), SessionState::Closed);
        assert!(!h.session.is_recording());
        assert_eq!(*h.capture.stopped.lock().unwrap(), 1);
        assert_eq!(h.played().last(), Some(&Played::Clear));

        let events: Vec<UiEvent> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        assert_eq!(events.last(), Some(&UiEvent::InputState(InputState::ReadyToStart)));

        // Nothing is handled once closed
        h.session.handle(ServerMessage::AudioTranscriptDelta { delta: "x".into() });
        assert_eq!(h.session.transcript().open_block(), Some(""));
        h.session.stop();
        assert_eq!(*h.capture.stopped.lock().unwrap(), 1);
    }

    #[test]
    fn test_connection_failed() {
        let mut h = harness_with(ToolRegistry::new(), Ui::detached());
        h.session.begin();
        h.session.connection_failed();

        assert_eq!(h.session.state(), SessionState::Closed);
        assert_eq!(h.session.transcript().open_block(), Some(CONNECTION_ERROR));
        assert!(!h.session.send_text("x").unwrap());
    }

    #[test]
    fn test_server_error_and_unknown_events_do_not_change_state() {
        let mut h = active(ToolRegistry::new());
        h.session.handle(
            ServerMessage::parse(r#"{"type":"error","error":{"message":"oops"}}"#).unwrap(),
        );
        h.session
            .handle(ServerMessage::parse(r#"{"type":"rate_limits.updated"}"#).unwrap());
        assert_eq!(h.session.state(), SessionState::Active);
    }
}
