//! Notification channel: a single live LISTEN session against the store.
//!
//! [`NotificationSource`] is the transport seam (PostgreSQL in production, a
//! scripted source in tests). [`NotificationChannel`] owns one source and adds
//! subscription bookkeeping, batch draining and the reconnect policy.

pub mod backoff;
#[cfg(feature = "storage-postgres")]
pub mod postgres;
pub mod session;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

pub use backoff::ReconnectPolicy;
pub use session::NotificationChannel;

/// A notification as delivered by the store. Transient; never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationEvent {
    pub channel: String,
    pub payload: String,
}

impl NotificationEvent {
    pub fn new(channel: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            payload: payload.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    /// Reconnect attempts exhausted; terminal
    Failed,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = match self {
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Reconnecting => "reconnecting",
            ConnectionStatus::Failed => "failed",
        };
        f.write_str(status)
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("failed to connect: {0}")]
    Connect(String),

    #[error("failed to subscribe to {channel}: {reason}")]
    Subscribe { channel: String, reason: String },

    #[error("connection lost: {0}")]
    Lost(String),

    #[error("not connected")]
    NotConnected,

    #[error("reconnect failed after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },
}

/// Transport that delivers notifications for subscribed channels
#[async_trait]
pub trait NotificationSource: Send {
    /// Open a fresh session, dropping any previous one
    async fn connect(&mut self) -> Result<(), ConnectionError>;

    /// Subscribe the current session to `channel`
    async fn listen(&mut self, channel: &str) -> Result<(), ConnectionError>;

    /// Wait up to `timeout` for the next notification.
    ///
    /// `Ok(None)` on timeout; an error means the session is gone.
    async fn recv(&mut self, timeout: Duration) -> Result<Option<NotificationEvent>, ConnectionError>;

    /// Next notification that has already arrived, without waiting
    fn next_buffered(&mut self) -> Option<NotificationEvent>;

    async fn disconnect(&mut self);
}
