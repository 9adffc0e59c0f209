//! Live socket transport.
//!
//! A [`Connector`] opens one bidirectional link to the messaging backend and
//! hands it back as a pair of typed channels. The connection manager only
//! ever sees [`SocketLink`]s, which keeps the reconnect logic independent of
//! the wire and lets tests drive it with in-memory channels.

use std::future::Future;

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{HeaderValue, AUTHORIZATION};
use tokio_tungstenite::tungstenite::Message as Frame;
use tracing::{debug, info, warn};

use portal_shared::constants::CHANNEL_CAPACITY;
use portal_shared::{ClientEvent, Room, ServerEvent};

use crate::error::{ChatError, Result};

/// One open socket connection.
///
/// Dropping `outbound` closes the socket; `inbound` yields `None` once the
/// remote side goes away.
#[derive(Debug)]
pub struct SocketLink {
    pub outbound: mpsc::Sender<ClientEvent>,
    pub inbound: mpsc::Receiver<ServerEvent>,
}

/// Opens socket links for a room.
pub trait Connector: Send + Sync + 'static {
    fn connect(&self, room: &Room) -> impl Future<Output = Result<SocketLink>> + Send;
}

/// WebSocket connector speaking the JSON event envelope.
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
    auth_token: Option<String>,
}

impl WsConnector {
    pub fn new(url: impl Into<String>, auth_token: Option<String>) -> Self {
        Self {
            url: url.into(),
            auth_token,
        }
    }
}

impl Connector for WsConnector {
    async fn connect(&self, room: &Room) -> Result<SocketLink> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| ChatError::Config(format!("Invalid socket URL {}: {e}", self.url)))?;

        if let Some(token) = &self.auth_token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| ChatError::Config(format!("Invalid auth token: {e}")))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        let (ws_stream, _response) = connect_async(request)
            .await
            .map_err(|e| ChatError::Connection(e.to_string()))?;

        info!(url = %self.url, room = %room, "WebSocket connected");

        let (mut write, mut read) = ws_stream.split();
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<ClientEvent>(CHANNEL_CAPACITY);
        let (inbound_tx, inbound_rx) = mpsc::channel::<ServerEvent>(CHANNEL_CAPACITY);

        let reader = tokio::spawn(async move {
            while let Some(frame) = read.next().await {
                match frame {
                    Ok(Frame::Text(text)) => match ServerEvent::from_json(&text) {
                        Ok(event) => {
                            if inbound_tx.send(event).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => debug!(error = %e, "Ignoring undecodable socket frame"),
                    },
                    Ok(Frame::Close(_)) => {
                        debug!("Socket closed by server");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "Socket read error");
                        break;
                    }
                }
            }
        });

        tokio::spawn(async move {
            while let Some(event) = outbound_rx.recv().await {
                let json = match event.to_json() {
                    Ok(json) => json,
                    Err(e) => {
                        warn!(event = event.name(), error = %e, "Failed to encode socket event");
                        continue;
                    }
                };
                if let Err(e) = write.send(Frame::Text(json.into())).await {
                    warn!(error = %e, "Socket write error");
                    break;
                }
            }
            let _ = write.close().await;
            reader.abort();
            debug!("Socket writer finished");
        });

        Ok(SocketLink {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}
