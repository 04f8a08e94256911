//! Failures talking to the Home Assistant hub
//!
//! Remote calls never raise into request handling. They return
//! [`RemoteError`] and the caller picks a fallback with [`Degrade`].

use reqwest::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("authentication rejected: {0}")]
    Auth(String),

    #[error("HTTP {status} from {url}{}", hint_suffix(.status, .body))]
    Status {
        status: StatusCode,
        url: String,
        body: String,
    },

    #[error("protocol error: {0}")]
    Protocol(String),
}

impl RemoteError {
    pub fn is_auth(&self) -> bool {
        match self {
            Self::Auth(_) => true,
            Self::Status { status, .. } => {
                *status == StatusCode::UNAUTHORIZED || *status == StatusCode::FORBIDDEN
            }
            _ => false,
        }
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Protocol(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for RemoteError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for RemoteError {
    fn from(err: serde_json::Error) -> Self {
        Self::Protocol(err.to_string())
    }
}

fn hint_suffix(status: &StatusCode, body: &str) -> String {
    let hint = match *status {
        StatusCode::UNAUTHORIZED => "check the access token (HA_TOKEN or --token)",
        StatusCode::FORBIDDEN => "the token may not have sufficient permissions",
        StatusCode::NOT_FOUND => "the requested resource was not found",
        StatusCode::SERVICE_UNAVAILABLE => "Home Assistant may be starting up or restarting",
        _ => "",
    };

    match (body.is_empty(), hint.is_empty()) {
        (true, true) => String::new(),
        (true, false) => format!(" (hint: {hint})"),
        (false, true) => format!(": {body}"),
        (false, false) => format!(": {body} (hint: {hint})"),
    }
}

/// Explicit fallback at a remote-call boundary.
pub trait Degrade<T> {
    /// Return the data, or log the failure and return `fallback`.
    fn or_degrade(self, what: &str, fallback: T) -> T;
}

impl<T> Degrade<T> for Result<T, RemoteError> {
    fn or_degrade(self, what: &str, fallback: T) -> T {
        match self {
            Ok(value) => value,
            Err(err) => {
                if err.is_auth() {
                    log::error!("{what}: {err}");
                } else {
                    log::warn!("{what}: {err}");
                }
                fallback
            }
        }
    }
}
