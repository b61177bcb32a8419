//! WebSocket transport for the dispatch channel.

use ambulink_core::channel::{ChannelConnector, ChannelError, ChannelLink, ClientMessage, HubMessage};
use ambulink_core::util::sanitize_error;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header, HeaderValue};
use tokio_tungstenite::tungstenite::Message;

const OUTBOUND_BUFFER: usize = 32;
const INBOUND_BUFFER: usize = 256;

pub struct WebSocketConnector {
    url: String,
    api_token: Option<String>,
}

impl WebSocketConnector {
    pub const fn new(url: String, api_token: Option<String>) -> Self {
        Self { url, api_token }
    }
}

#[async_trait]
impl ChannelConnector for WebSocketConnector {
    async fn connect(&self) -> Result<ChannelLink, ChannelError> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|error| ChannelError::Protocol(sanitize_error(&error)))?;
        if let Some(token) = &self.api_token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|error| ChannelError::Protocol(sanitize_error(&error)))?;
            request.headers_mut().insert(header::AUTHORIZATION, value);
        }

        let (socket, _) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|error| ChannelError::Dropped(sanitize_error(&error)))?;
        tracing::debug!(url = %self.url, "Channel socket open");

        let (mut sink, mut stream) = socket.split();
        let (outbound, mut outbound_rx) = mpsc::channel::<ClientMessage>(OUTBOUND_BUFFER);
        let (inbound_tx, inbound) = mpsc::channel::<HubMessage>(INBOUND_BUFFER);

        tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                let payload = match serde_json::to_string(&message) {
                    Ok(payload) => payload,
                    Err(error) => {
                        tracing::warn!(%error, "failed to serialize channel message");
                        continue;
                    }
                };
                if sink.send(Message::Text(payload.into())).await.is_err() {
                    break;
                }
            }
            // Sender dropped: the session closed this link
            let _ = sink.close().await;
        });

        tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                match frame {
                    Ok(Message::Text(text)) => match serde_json::from_str::<HubMessage>(text.as_str()) {
                        Ok(message) => {
                            if inbound_tx.send(message).await.is_err() {
                                break;
                            }
                        }
                        Err(error) => tracing::warn!(%error, "Ignoring malformed hub frame"),
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(error) => {
                        tracing::debug!(%error, "Channel socket failed");
                        break;
                    }
                }
            }
        });

        Ok(ChannelLink { outbound, inbound })
    }
}
