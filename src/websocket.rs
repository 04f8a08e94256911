//! Home Assistant WebSocket API client
//!
//! Only the registry listings are needed here; the REST API has no entity
//! registry and its area registry endpoint is not available on every hub.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use crate::api::AreaEntry;
use crate::config::HassSettings;
use crate::error::RemoteError;

/// WebSocket message types from Home Assistant
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
pub enum WsMessage {
    AuthRequired {
        #[serde(default)]
        ha_version: String,
    },
    AuthOk {
        #[serde(default)]
        ha_version: String,
    },
    AuthInvalid {
        #[serde(default)]
        message: String,
    },
    Result {
        id: u64,
        success: bool,
        #[serde(default)]
        result: Value,
        #[serde(default)]
        error: Option<WsError>,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsError {
    pub code: String,
    pub message: String,
}

/// Entity registry row; only the fields used for area resolution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityRegistryEntry {
    pub entity_id: String,
    #[serde(default)]
    pub area_id: Option<String>,
}

/// Home Assistant WebSocket client
pub struct WsClient {
    sender: mpsc::Sender<String>,
    receiver: mpsc::Receiver<WsMessage>,
    msg_id: u64,
}

impl WsClient {
    /// Connect and authenticate
    pub async fn connect(settings: &HassSettings) -> Result<Self, RemoteError> {
        let ws_url = websocket_url(&settings.server);
        // The TLS connector always verifies certificates; callers fall back
        // to REST or go without registry data
        if settings.insecure && ws_url.starts_with("wss://") {
            return Err(RemoteError::Config(
                "--insecure does not apply to the WebSocket API; registry data unavailable"
                    .to_string(),
            ));
        }
        log::debug!("Connecting to WebSocket: {}", ws_url);

        let (ws_stream, _) = connect_async(ws_url.as_str()).await?;
        let (mut write, mut read) = ws_stream.split();

        let (tx_send, mut rx_send) = mpsc::channel::<String>(32);
        let (tx_recv, rx_recv) = mpsc::channel::<WsMessage>(32);

        tokio::spawn(async move {
            while let Some(msg) = rx_send.recv().await {
                if write.send(Message::Text(msg)).await.is_err() {
                    return;
                }
            }
            // Client dropped; let the server end the read side too.
            let _ = write.close().await;
        });

        tokio::spawn(async move {
            while let Some(Ok(msg)) = read.next().await {
                if let Message::Text(text) = msg {
                    match serde_json::from_str::<WsMessage>(&text) {
                        Ok(ws_msg) => {
                            if tx_recv.send(ws_msg).await.is_err() {
                                break;
                            }
                        }
                        Err(err) => log::debug!("Ignoring unparseable WebSocket message: {err}"),
                    }
                }
            }
        });

        let mut client = Self {
            sender: tx_send,
            receiver: rx_recv,
            msg_id: 0,
        };

        match client.receive().await? {
            WsMessage::AuthRequired { ha_version } => {
                log::debug!("Connected to Home Assistant {}", ha_version);
            }
            other => {
                return Err(RemoteError::Protocol(format!(
                    "expected auth_required, got {other:?}"
                )))
            }
        }

        let auth_msg = json!({
            "type": "auth",
            "access_token": settings.token,
        });
        client.send_raw(auth_msg.to_string()).await?;

        match client.receive().await? {
            WsMessage::AuthOk { ha_version } => {
                log::debug!("Authenticated with Home Assistant {}", ha_version);
            }
            WsMessage::AuthInvalid { message } => return Err(RemoteError::Auth(message)),
            other => {
                return Err(RemoteError::Protocol(format!(
                    "expected auth_ok, got {other:?}"
                )))
            }
        }

        Ok(client)
    }

    async fn send_raw(&self, msg: String) -> Result<(), RemoteError> {
        self.sender
            .send(msg)
            .await
            .map_err(|_| RemoteError::Transport("WebSocket connection closed".to_string()))
    }

    fn next_id(&mut self) -> u64 {
        self.msg_id += 1;
        self.msg_id
    }

    async fn receive(&mut self) -> Result<WsMessage, RemoteError> {
        self.receiver
            .recv()
            .await
            .ok_or_else(|| RemoteError::Transport("WebSocket connection closed".to_string()))
    }

    /// Send a command and wait for its `result`
    pub async fn request(&mut self, command: &str) -> Result<Value, RemoteError> {
        let id = self.next_id();
        let msg = json!({ "id": id, "type": command });
        self.send_raw(msg.to_string()).await?;

        loop {
            match self.receive().await? {
                WsMessage::Result {
                    id: reply_id,
                    success,
                    result,
                    error,
                } if reply_id == id => {
                    if success {
                        return Ok(result);
                    }
                    let reason = error
                        .map(|e| format!("{}: {}", e.code, e.message))
                        .unwrap_or_else(|| "no error detail".to_string());
                    return Err(RemoteError::Protocol(format!("{command} failed: {reason}")));
                }
                _ => continue,
            }
        }
    }

    async fn list<T: DeserializeOwned>(&mut self, command: &str) -> Result<Vec<T>, RemoteError> {
        let result = self.request(command).await?;
        Ok(serde_json::from_value(result)?)
    }
}

/// Fetch the entity registry on a dedicated connection
pub async fn list_entity_registry(
    settings: &HassSettings,
) -> Result<Vec<EntityRegistryEntry>, RemoteError> {
    with_timeout(settings, async {
        let mut client = WsClient::connect(settings).await?;
        client.list("config/entity_registry/list").await
    })
    .await
}

/// Fetch the area registry on a dedicated connection
pub async fn list_areas(settings: &HassSettings) -> Result<Vec<AreaEntry>, RemoteError> {
    with_timeout(settings, async {
        let mut client = WsClient::connect(settings).await?;
        client.list("config/area_registry/list").await
    })
    .await
}

async fn with_timeout<T>(
    settings: &HassSettings,
    fut: impl std::future::Future<Output = Result<T, RemoteError>>,
) -> Result<T, RemoteError> {
    tokio::time::timeout(Duration::from_secs(settings.timeout), fut)
        .await
        .map_err(|_| RemoteError::Transport("WebSocket request timed out".to_string()))?
}

fn websocket_url(server: &str) -> String {
    let ws_url = server
        .replacen("http://", "ws://", 1)
        .replacen("https://", "wss://", 1);
    format!("{}/api/websocket", ws_url.trim_end_matches('/'))
}
