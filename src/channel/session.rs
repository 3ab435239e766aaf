use std::time::Duration;

use tracing::{debug, error, info, instrument, warn};

use super::{ConnectionError, ConnectionStatus, NotificationEvent, NotificationSource, ReconnectPolicy};

/// A subscription session with reconnect handling.
///
/// The channel list survives reconnects: every successful reconnect issues
/// LISTEN for all subscribed channels again.
pub struct NotificationChannel<S> {
    source: S,
    channels: Vec<String>,
    policy: ReconnectPolicy,
    status: ConnectionStatus,
}

impl<S: NotificationSource> NotificationChannel<S> {
    pub fn new(source: S, policy: ReconnectPolicy) -> Self {
        Self {
            source,
            channels: Vec::new(),
            policy,
            status: ConnectionStatus::Disconnected,
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn channels(&self) -> &[String] {
        &self.channels
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    fn set_status(&mut self, status: ConnectionStatus) {
        if self.status != status {
            debug!("connection status: {} -> {status}", self.status);
            self.status = status;
        }
    }

    #[instrument(skip(self))]
    pub async fn connect(&mut self) -> Result<(), ConnectionError> {
        self.set_status(ConnectionStatus::Connecting);
        match self.open_session().await {
            Ok(()) => {
                self.set_status(ConnectionStatus::Connected);
                info!("connected to notification source");
                Ok(())
            }
            Err(e) => {
                self.set_status(ConnectionStatus::Disconnected);
                Err(e)
            }
        }
    }

    /// Connect and re-issue LISTEN for every known channel
    async fn open_session(&mut self) -> Result<(), ConnectionError> {
        self.source.connect().await?;
        for channel in &self.channels {
            self.source.listen(channel).await?;
        }
        Ok(())
    }

    /// Subscribe to `channels` in addition to the current ones
    pub async fn subscribe(&mut self, channels: &[String]) -> Result<(), ConnectionError> {
        if self.status != ConnectionStatus::Connected {
            return Err(ConnectionError::NotConnected);
        }
        for channel in channels {
            if self.channels.contains(channel) {
                continue;
            }
            self.source.listen(channel).await?;
            info!("listening on channel: {channel}");
            self.channels.push(channel.clone());
        }
        Ok(())
    }

    /// Wait up to `timeout` for notifications.
    ///
    /// Returns an empty batch on timeout. Once the first notification arrives
    /// everything already buffered is drained with it, in arrival order.
    pub async fn poll(&mut self, timeout: Duration) -> Result<Vec<NotificationEvent>, ConnectionError> {
        if self.status != ConnectionStatus::Connected {
            return Err(ConnectionError::NotConnected);
        }

        match self.source.recv(timeout).await {
            Ok(None) => Ok(Vec::new()),
            Ok(Some(first)) => {
                let mut batch = vec![first];
                while let Some(event) = self.source.next_buffered() {
                    batch.push(event);
                }
                Ok(batch)
            }
            Err(e) => {
                warn!("notification connection lost: {e}");
                self.set_status(ConnectionStatus::Disconnected);
                Err(e)
            }
        }
    }

    /// Re-establish the session with exponential backoff.
    ///
    /// Sleeps before every attempt. When all attempts fail the channel ends
    /// in the terminal [`ConnectionStatus::Failed`] status.
    #[instrument(skip(self))]
    pub async fn reconnect(&mut self) -> Result<(), ConnectionError> {
        self.set_status(ConnectionStatus::Reconnecting);
        self.source.disconnect().await;

        for (attempt, delay) in self.policy.delays().enumerate() {
            let attempt = attempt as u32 + 1;
            info!(
                "reconnect attempt {attempt}/{} in {delay:?}",
                self.policy.max_retries
            );
            tokio::time::sleep(delay).await;

            match self.open_session().await {
                Ok(()) => {
                    self.set_status(ConnectionStatus::Connected);
                    info!("reconnected after {attempt} attempt(s)");
                    return Ok(());
                }
                Err(e) => warn!("reconnect attempt {attempt} failed: {e}"),
            }
        }

        self.set_status(ConnectionStatus::Failed);
        error!(
            "giving up after {} reconnect attempts",
            self.policy.max_retries
        );
        Err(ConnectionError::RetriesExhausted {
            attempts: self.policy.max_retries,
        })
    }

    pub async fn disconnect(&mut self) {
        self.source.disconnect().await;
        self.set_status(ConnectionStatus::Disconnected);
        info!("disconnected from notification source");
    }
}
