//! Message types for the listener actor
//!
//! Commands travel over an mpsc channel into the actor's select loop; replies
//! come back on a oneshot channel carried inside the command.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::oneshot;

use crate::alerts::{AlertResult, MaintenanceReport};
use crate::channel::ConnectionStatus;
use crate::events::ProcessingStats;

/// Commands that can be sent to the ListenerActor
#[derive(Debug)]
pub enum ListenerCommand {
    /// Run an alert maintenance pass now, outside the ticker schedule
    RunMaintenance {
        respond_to: oneshot::Sender<AlertResult<MaintenanceReport>>,
    },

    /// Snapshot of the listener's counters
    GetStats {
        respond_to: oneshot::Sender<ListenerStats>,
    },

    /// Stop after the current batch. An in-flight poll is cancelled; an
    /// in-flight handler is not.
    Shutdown,
}

/// Listener statistics
#[derive(Debug, Clone, Serialize)]
pub struct ListenerStats {
    pub status: ConnectionStatus,

    /// Notifications handed to the router, whatever the outcome
    pub events_received: u64,
    pub events_handled: u64,
    pub events_failed: u64,
    pub events_dropped: u64,

    /// Successful reconnects since start
    pub reconnects: u64,

    pub last_event_at: Option<DateTime<Utc>>,

    pub processing: ProcessingStats,
}
