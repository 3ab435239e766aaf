//! LISTEN/NOTIFY transport backed by `sqlx::postgres::PgListener`.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgListener, PgNotification, PgPool};
use tracing::{debug, trace};

use super::{ConnectionError, NotificationEvent, NotificationSource};

/// Dedicated listener connection opened with the pool's connect options
pub struct PgNotificationSource {
    pool: PgPool,
    listener: Option<PgListener>,
}

impl PgNotificationSource {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            listener: None,
        }
    }

    fn listener(&mut self) -> Result<&mut PgListener, ConnectionError> {
        self.listener.as_mut().ok_or(ConnectionError::NotConnected)
    }
}

fn to_event(notification: PgNotification) -> NotificationEvent {
    NotificationEvent::new(notification.channel(), notification.payload())
}

#[async_trait]
impl NotificationSource for PgNotificationSource {
    async fn connect(&mut self) -> Result<(), ConnectionError> {
        self.listener = None;
        let listener = PgListener::connect_with(&self.pool)
            .await
            .map_err(|e| ConnectionError::Connect(e.to_string()))?;
        debug!("listener connection established");
        self.listener = Some(listener);
        Ok(())
    }

    async fn listen(&mut self, channel: &str) -> Result<(), ConnectionError> {
        self.listener()?
            .listen(channel)
            .await
            .map_err(|e| ConnectionError::Subscribe {
                channel: channel.to_string(),
                reason: e.to_string(),
            })
    }

    async fn recv(&mut self, timeout: Duration) -> Result<Option<NotificationEvent>, ConnectionError> {
        let listener = self.listener()?;

        // `try_recv` yields Ok(None) once the connection closes. The listener
        // would silently reconnect on the next call; drop it instead so the
        // session's reconnect policy applies.
        match tokio::time::timeout(timeout, listener.try_recv()).await {
            Err(_elapsed) => Ok(None),
            Ok(Ok(Some(notification))) => {
                trace!("notification on {}", notification.channel());
                Ok(Some(to_event(notification)))
            }
            Ok(Ok(None)) => {
                self.listener = None;
                Err(ConnectionError::Lost("listener connection closed".to_string()))
            }
            Ok(Err(e)) => {
                self.listener = None;
                Err(ConnectionError::Lost(e.to_string()))
            }
        }
    }

    fn next_buffered(&mut self) -> Option<NotificationEvent> {
        self.listener.as_mut()?.next_buffered().map(to_event)
    }

    async fn disconnect(&mut self) {
        if let Some(mut listener) = self.listener.take() {
            if let Err(e) = listener.unlisten_all().await {
                debug!("unlisten failed during disconnect: {e}");
            }
        }
    }
}
