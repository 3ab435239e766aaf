//! Channel → handler dispatch with an append-only audit trail.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::{debug, error, trace, warn};

use super::{EventKind, EventPayload, HandlerError};
use crate::channel::NotificationEvent;
use crate::clock::Clock;
use crate::config::ChannelNames;
use crate::storage::{EventLogEntry, StorageBackend};

#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &EventPayload) -> Result<(), HandlerError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Handled,
    Failed,
    /// Unknown channel, bad payload or no handler; nothing was invoked
    Dropped,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub handled: usize,
    pub failed: usize,
    pub dropped: usize,
}

impl DispatchReport {
    fn record(&mut self, outcome: DispatchOutcome) {
        match outcome {
            DispatchOutcome::Handled => self.handled += 1,
            DispatchOutcome::Failed => self.failed += 1,
            DispatchOutcome::Dropped => self.dropped += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.handled + self.failed + self.dropped
    }
}

pub struct EventRouter {
    channel_names: ChannelNames,
    handlers: HashMap<String, Arc<dyn EventHandler>>,
    store: Arc<dyn StorageBackend>,
    clock: Arc<dyn Clock>,
}

impl EventRouter {
    pub fn new(
        channel_names: ChannelNames,
        store: Arc<dyn StorageBackend>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            channel_names,
            handlers: HashMap::new(),
            store,
            clock,
        }
    }

    /// Register `handler` for `channel`, replacing any previous one
    pub fn register_handler(&mut self, channel: impl Into<String>, handler: Arc<dyn EventHandler>) {
        let channel = channel.into();
        if self.handlers.insert(channel.clone(), handler).is_some() {
            debug!("replaced handler for channel {channel}");
        }
    }

    /// Channels with a registered handler
    pub fn channels(&self) -> Vec<String> {
        let mut channels: Vec<String> = self.handlers.keys().cloned().collect();
        channels.sort();
        channels
    }

    /// Dispatch one notification. Never fails: every problem is logged and
    /// reflected in the outcome.
    pub async fn dispatch(&self, event: &NotificationEvent) -> DispatchOutcome {
        let Some(kind) = EventKind::from_channel(&event.channel, &self.channel_names) else {
            warn!("notification on unknown channel {}, dropped", event.channel);
            return DispatchOutcome::Dropped;
        };

        let snapshot = match EventPayload::parse_object(&event.payload) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("dropping {kind} notification: {e}");
                return DispatchOutcome::Dropped;
            }
        };
        let payload = match EventPayload::from_value(kind, &snapshot) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("dropping {kind} notification: {e}");
                return DispatchOutcome::Dropped;
            }
        };

        // Aliased channel names fall back to the handler of the configured name
        let handler = self
            .handlers
            .get(&event.channel)
            .or_else(|| self.handlers.get(kind.channel(&self.channel_names)));
        let Some(handler) = handler else {
            warn!("no handler registered for channel {}, dropped", event.channel);
            return DispatchOutcome::Dropped;
        };

        trace!("dispatching {kind} notification");
        let started = Instant::now();
        let result = handler.handle(&payload).await;
        let elapsed = started.elapsed();

        let outcome = match result {
            Ok(()) => DispatchOutcome::Handled,
            Err(e) => {
                error!("handler for {kind} failed: {e}");
                DispatchOutcome::Failed
            }
        };

        let entry = EventLogEntry {
            event_type: kind.as_str().to_string(),
            payload: snapshot,
            processed_at: self.clock.now(),
            processing_duration_ms: i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX),
        };
        if let Err(e) = self.store.append_event_log(entry).await {
            warn!("failed to append event log entry for {kind}: {e}");
        }

        outcome
    }

    /// Dispatch a batch strictly in order
    pub async fn dispatch_batch(&self, batch: &[NotificationEvent]) -> DispatchReport {
        let mut report = DispatchReport::default();
        for event in batch {
            report.record(self.dispatch(event).await);
        }
        if report.total() > 0 {
            debug!(
                "batch dispatched: {} handled, {} failed, {} dropped",
                report.handled, report.failed, report.dropped
            );
        }
        report
    }
}
