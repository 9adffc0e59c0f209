//! Request/response calls to the portal REST backend.
//!
//! The socket is only a best-effort fan-out; persistence always goes through
//! these calls.

use std::future::Future;

use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use serde::Serialize;
use tracing::debug;

use portal_shared::{Message, Room, TemporaryId, ThreadId, UserId};

use crate::config::ChatConfig;
use crate::error::{BackendError, ChatError};

/// Body of a send request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingMessage {
    pub sender_id: UserId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receiver_id: Option<UserId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<ThreadId>,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temporary_id: Option<TemporaryId>,
}

impl OutgoingMessage {
    pub fn from_provisional(message: &Message) -> Self {
        Self {
            sender_id: message.sender_id.clone(),
            receiver_id: message.receiver_id.clone(),
            thread_id: message.thread_id.clone(),
            content: message.content.clone(),
            temporary_id: message.temporary_id.clone(),
        }
    }
}

/// Body of a mark-seen request.
///
/// For a direct room the pair is (peer → local): everything the peer sent
/// to the local user is now seen. For a thread, the local user is the
/// reader of the thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeenRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<UserId>,
    pub receiver_id: UserId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<ThreadId>,
}

impl SeenRequest {
    pub fn for_room(room: &Room) -> Self {
        Self {
            sender_id: room.peer().cloned(),
            receiver_id: room.local().clone(),
            thread_id: room.thread_id().cloned(),
        }
    }
}

/// The backend operations the chat client depends on.
pub trait MessageBackend: Send + Sync + 'static {
    /// Persist a message; returns the stored record with server id and time.
    fn send_message(
        &self,
        message: &OutgoingMessage,
    ) -> impl Future<Output = Result<Message, BackendError>> + Send;

    /// Fetch the conversation history, oldest first.
    fn fetch_history(
        &self,
        room: &Room,
    ) -> impl Future<Output = Result<Vec<Message>, BackendError>> + Send;

    fn mark_seen(&self, room: &Room) -> impl Future<Output = Result<(), BackendError>> + Send;
}

/// [`MessageBackend`] over HTTP/JSON.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: Client,
    base_url: Url,
    auth_token: Option<String>,
}

impl HttpBackend {
    pub fn new(config: &ChatConfig) -> Result<Self, ChatError> {
        let base_url = Url::parse(&config.api_base_url)
            .map_err(|e| ChatError::Config(format!("Invalid API URL {}: {e}", config.api_base_url)))?;
        if base_url.cannot_be_a_base() {
            return Err(ChatError::Config(format!(
                "API URL cannot be a base: {}",
                config.api_base_url
            )));
        }

        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ChatError::Config(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url,
            auth_token: config.auth_token.clone(),
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn history_url(&self, room: &Room) -> Url {
        match room {
            Room::Direct { local, peer } => {
                self.endpoint(&["messages", local.as_str(), peer.as_str()])
            }
            Room::Thread { thread, .. } => self.endpoint(&["threads", thread.as_str(), "messages"]),
        }
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.auth_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

impl MessageBackend for HttpBackend {
    async fn send_message(&self, message: &OutgoingMessage) -> Result<Message, BackendError> {
        let url = self.endpoint(&["messages"]);
        debug!(url = %url, temp_id = ?message.temporary_id, "POST message");
        let response = self
            .authorize(self.client.post(url))
            .json(message)
            .send()
            .await?;
        Ok(check_status(response).await?.json::<Message>().await?)
    }

    async fn fetch_history(&self, room: &Room) -> Result<Vec<Message>, BackendError> {
        let url = self.history_url(room);
        debug!(url = %url, room = %room, "GET history");
        let response = self.authorize(self.client.get(url)).send().await?;
        Ok(check_status(response).await?.json::<Vec<Message>>().await?)
    }

    async fn mark_seen(&self, room: &Room) -> Result<(), BackendError> {
        let url = self.endpoint(&["messages", "seen"]);
        debug!(url = %url, room = %room, "PUT seen");
        let response = self
            .authorize(self.client.put(url))
            .json(&SeenRequest::for_room(room))
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }
}

async fn check_status(response: Response) -> Result<Response, BackendError> {
    let status = response.status();
    if status == StatusCode::NOT_FOUND {
        return Err(BackendError::NotFound);
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(BackendError::Status {
            status: status.as_u16(),
            body,
        });
    }
    Ok(response)
}
