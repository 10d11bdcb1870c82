//! WebSocket transport for the realtime API
//!
//! The socket is split: a reader task parses server events into an mpsc
//! channel, and a writer task drains the [`Outbox`](crate::outbox::Outbox)
//! channel into the shared sink.

use crate::error::{RealtimeError, Result};
use crate::protocol::{ClientMessage, ServerMessage};
use futures_util::{SinkExt, StreamExt};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderValue, Request};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};
use url::Url;

/// Azure OpenAI API version used for realtime
pub const AZURE_API_VERSION: &str = "2024-10-01-preview";
pub const OPENAI_REALTIME_URL: &str = "wss://api.openai.com/v1/realtime";

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;
type WsSink = Arc<Mutex<futures_util::stream::SplitSink<WsStream, Message>>>;

/// Where the realtime service lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Provider {
    Azure { endpoint: String, deployment: String },
    OpenAi { base_url: Option<String>, model: String },
}

impl Provider {
    /// Endpoints mentioning azure are assumed to be Azure OpenAI.
    pub fn looks_like_azure(endpoint: &str) -> bool {
        endpoint.to_ascii_lowercase().contains("azure")
    }
}

/// Provider plus credentials
#[derive(Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub provider: Provider,
    pub api_key: String,
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("provider", &self.provider)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

impl Endpoint {
    /// WebSocket URL for this endpoint.
    pub fn url(&self) -> Result<Url> {
        match &self.provider {
            Provider::Azure { endpoint, deployment } => {
                let mut url = Url::parse(endpoint)?;
                let scheme = match url.scheme() {
                    "https" | "wss" => "wss",
                    "http" | "ws" => "ws",
                    other => {
                        return Err(RealtimeError::Config(format!(
                            "unsupported endpoint scheme `{}`",
                            other
                        )))
                    }
                };
                url.set_scheme(scheme)
                    .map_err(|()| RealtimeError::Config(format!("cannot use {} as a WebSocket URL", endpoint)))?;
                url.set_path("/openai/realtime");
                url.query_pairs_mut()
                    .clear()
                    .append_pair("api-version", AZURE_API_VERSION)
                    .append_pair("deployment", deployment);
                Ok(url)
            }
            Provider::OpenAi { base_url, model } => {
                let mut url = Url::parse(base_url.as_deref().unwrap_or(OPENAI_REALTIME_URL))?;
                url.query_pairs_mut().append_pair("model", model);
                Ok(url)
            }
        }
    }

    /// Handshake request with the provider's auth headers.
    pub fn request(&self) -> Result<Request<()>> {
        let mut request = self.url()?.as_str().into_client_request()?;
        let headers = request.headers_mut();
        match self.provider {
            Provider::Azure { .. } => {
                headers.insert("api-key", HeaderValue::from_str(&self.api_key)?);
            }
            Provider::OpenAi { .. } => {
                headers.insert(
                    "Authorization",
                    HeaderValue::from_str(&format!("Bearer {}", self.api_key))?,
                );
                headers.insert("OpenAI-Beta", HeaderValue::from_static("realtime=v1"));
            }
        }
        Ok(request)
    }
}

/// Connected realtime socket
pub struct RealtimeClient {
    sink: WsSink,
    reader: JoinHandle<()>,
}

impl RealtimeClient {
    /// Connect and start the reader task. Server events arrive on the returned
    /// receiver, which ends when the socket closes.
    pub async fn connect(endpoint: &Endpoint) -> Result<(Self, mpsc::Receiver<ServerMessage>)> {
        let request = endpoint.request()?;
        info!("Connecting to {}", request.uri());

        let (ws_stream, response) = connect_async(request).await?;
        debug!("WebSocket handshake status: {}", response.status());

        let (sink, stream) = ws_stream.split();
        let (tx, rx) = mpsc::channel(100);
        let reader = tokio::spawn(read_messages(stream, tx));

        Ok((
            Self {
                sink: Arc::new(Mutex::new(sink)),
                reader,
            },
            rx,
        ))
    }

    /// Send one message directly, bypassing the writer task.
    pub async fn send(&self, msg: &ClientMessage) -> Result<()> {
        send_message(&self.sink, msg).await
    }

    /// Start draining `rx` into the socket in order.
    pub fn spawn_writer(&self, rx: UnboundedReceiver<ClientMessage>) -> JoinHandle<()> {
        tokio::spawn(run_writer(self.sink.clone(), rx))
    }

    /// Close the socket and stop reading.
    pub async fn close(self) {
        let mut sink = self.sink.lock().await;
        if let Err(e) = sink.send(Message::Close(None)).await {
            debug!("Close frame not sent: {}", e);
        }
        let _ = sink.close().await;
        self.reader.abort();
        info!("Connection closed");
    }
}

async fn send_message(sink: &WsSink, msg: &ClientMessage) -> Result<()> {
    let json = serde_json::to_string(msg)?;
    debug!("Sending {}", msg.kind());
    sink.lock().await.send(Message::Text(json.into())).await?;
    Ok(())
}

async fn run_writer(sink: WsSink, mut rx: UnboundedReceiver<ClientMessage>) {
    while let Some(msg) = rx.recv().await {
        if let Err(e) = send_message(&sink, &msg).await {
            error!("Failed to send {}: {}", msg.kind(), e);
            break;
        }
    }
    debug!("Writer task finished");
}

async fn read_messages(mut stream: futures_util::stream::SplitStream<WsStream>, tx: mpsc::Sender<ServerMessage>) {
    while let Some(frame) = stream.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text.as_str().to_string(),
            Ok(Message::Binary(bytes)) => match String::from_utf8(bytes.to_vec()) {
                Ok(text) => text,
                Err(_) => {
                    warn!("Skipping non UTF-8 binary frame ({} bytes)", bytes.len());
                    continue;
                }
            },
            Ok(Message::Close(frame)) => {
                info!("Server closed the connection: {:?}", frame);
                break;
            }
            Ok(_) => continue,
            Err(e) => {
                error!("WebSocket read error: {}", e);
                break;
            }
        };

        match ServerMessage::parse(&text) {
            Ok(msg) => {
                if tx.send(msg).await.is_err() {
                    break;
                }
            }
            Err(e) => warn!("Skipping malformed server message: {} ({})", e, text),
        }
    }
    debug!("Reader task finished");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn azure(endpoint: &str) -> Endpoint {
        Endpoint {
            provider: Provider::Azure {
                endpoint: endpoint.to_string(),
                deployment: "gpt-4o-realtime-preview".to_string(),
            },
            api_key: "secret".to_string(),
        }
    }

    #[test]
    fn test_azure_url() {
        let url = azure("https://myres.openai.azure.com/").url().unwrap();
        assert_eq!(
            url.as_str(),
            "wss://myres.openai.azure.com/openai/realtime?api-version=2024-10-01-preview&deployment=gpt-4o-realtime-preview"
        );

        let url = azure("http://localhost:8080").url().unwrap();
        assert_eq!(url.scheme(), "ws");
        assert_eq!(url.port(), Some(8080));
    }

    #[test]
    fn test_azure_rejects_other_schemes() {
        assert!(matches!(
            azure("ftp://myres.openai.azure.com").url(),
            Err(RealtimeError::Config(_))
        ));
    }

    #[test]
    fn test_openai_url_and_headers() {
        let endpoint = Endpoint {
            provider: Provider::OpenAi {
                base_url: None,
                model: "gpt-4o-realtime-preview-2024-10-01".to_string(),
            },
            api_key: "sk-test".to_string(),
        };
        assert_eq!(
            endpoint.url().unwrap().as_str(),
            "wss://api.openai.com/v1/realtime?model=gpt-4o-realtime-preview-2024-10-01"
        );

        let request = endpoint.request().unwrap();
        assert_eq!(request.headers()["Authorization"], "Bearer sk-test");
        assert_eq!(request.headers()["OpenAI-Beta"], "realtime=v1");
        assert!(request.headers().get("api-key").is_none());
    }

    #[test]
    fn test_azure_headers() {
        let request = azure("https://myres.openai.azure.com").request().unwrap();
        assert_eq!(request.headers()["api-key"], "secret");
        assert!(request.headers().get("Authorization").is_none());
    }

    #[test]
    fn test_debug_redacts_key() {
        let printed = format!("{:?}", azure("https://myres.openai.azure.com"));
        assert!(!printed.contains("secret"));
    }

    #[test]
    fn test_azure_guess() {
        assert!(Provider::looks_like_azure("https://x.openai.Azure.com"));
        assert!(!Provider::looks_like_azure("wss://api.openai.com/v1/realtime"));
    }
}
