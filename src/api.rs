//! Home Assistant REST API client
//!
//! Handles all HTTP communication with the Home Assistant REST API.

use std::time::Duration;

use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

use crate::config::HassSettings;
use crate::error::RemoteError;

/// Home Assistant REST API client
#[derive(Debug, Clone)]
pub struct HassClient {
    client: Client,
    base_url: String,
    token: String,
}

impl HassClient {
    pub fn new(settings: &HassSettings) -> Result<Self, RemoteError> {
        let mut builder = Client::builder()
            .timeout(Duration::from_secs(settings.timeout))
            .user_agent(format!("launchpad/{}", env!("CARGO_PKG_VERSION")));

        if settings.insecure {
            builder = builder.danger_accept_invalid_certs(true);
        }

        let client = builder
            .build()
            .map_err(|e| RemoteError::Config(format!("building HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: settings.server.trim_end_matches('/').to_string(),
            token: settings.token.clone(),
        })
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, RemoteError> {
        let url = format!("{}/api{}", self.base_url, path);
        log::debug!("GET {}", url);

        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await?;

        Self::handle_response(response).await
    }

    async fn post<T: DeserializeOwned>(&self, path: &str, body: &Value) -> Result<T, RemoteError> {
        let url = format!("{}/api{}", self.base_url, path);
        log::debug!("POST {} {}", url, body);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await?;

        Self::handle_response(response).await
    }

    async fn handle_response<T: DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, RemoteError> {
        let status = response.status();
        let url = response.url().to_string();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RemoteError::Status { status, url, body });
        }

        let text = response.text().await?;
        serde_json::from_str(&text)
            .map_err(|e| RemoteError::Protocol(format!("parsing response from {url}: {e}")))
    }

    /// Get all entity states
    pub async fn get_states(&self) -> Result<Vec<EntityState>, RemoteError> {
        self.get("/states").await
    }

    /// Area registry over REST, for hubs where the realtime API is unreachable
    pub async fn get_area_registry(&self) -> Result<Vec<AreaEntry>, RemoteError> {
        self.get("/config/area_registry").await
    }

    /// Call a service
    pub async fn call_service(
        &self,
        domain: &str,
        service: &str,
        data: &Value,
    ) -> Result<Value, RemoteError> {
        self.post(&format!("/services/{domain}/{service}"), data)
            .await
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityState {
    pub entity_id: String,
    pub state: String,
    #[serde(default)]
    pub attributes: Value,
}

impl EntityState {
    pub fn friendly_name(&self) -> Option<&str> {
        self.attributes.get("friendly_name").and_then(|v| v.as_str())
    }

    pub fn area_id(&self) -> Option<&str> {
        self.attributes.get("area_id").and_then(|v| v.as_str())
    }
}

/// One row of the area registry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AreaEntry {
    pub area_id: String,
    pub name: String,
}
