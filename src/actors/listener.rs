//! ListenerActor - owns the notification session and drives the pipeline
//!
//! ## Message Flow
//!
//! ```text
//! poll(timeout) → batch → EventRouter::dispatch_batch → EventProcessor
//!     ↑
//!     ├─── Maintenance ticker (auto-resolve + retention)
//!     └─── Commands (RunMaintenance, GetStats, Shutdown)
//! ```
//!
//! Everything runs inside one task, so events are processed strictly one at
//! a time and the dedup read-then-write never races with itself.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

use super::messages::{ListenerCommand, ListenerStats};
use crate::alerts::MaintenanceReport;
use crate::clock::Clock;
use crate::channel::{
    ConnectionError, ConnectionStatus, NotificationChannel, NotificationSource, ReconnectPolicy,
};
use crate::pipeline::Pipeline;

#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("failed to start listener: {0}")]
    Startup(#[source] ConnectionError),

    #[error("notification session failed: {0}")]
    Session(#[source] ConnectionError),
}

pub type ListenerResult<T> = Result<T, ListenerError>;

pub struct ListenerActor<S> {
    channel: NotificationChannel<S>,
    pipeline: Arc<Pipeline>,
    command_rx: mpsc::Receiver<ListenerCommand>,
    poll_timeout: Duration,
    maintenance_interval: Duration,

    events_received: u64,
    events_handled: u64,
    events_failed: u64,
    events_dropped: u64,
    reconnects: u64,
    last_event_at: Option<chrono::DateTime<Utc>>,
}

impl<S: NotificationSource> ListenerActor<S> {
    pub fn new(
        source: S,
        pipeline: Arc<Pipeline>,
        command_rx: mpsc::Receiver<ListenerCommand>,
    ) -> Self {
        let config = pipeline.config();
        let policy = ReconnectPolicy::new(config.events.reconnect_delay(), config.events.max_retries);
        let poll_timeout = config.events.poll_timeout();
        let maintenance_interval = config.alerts.maintenance_interval();

        Self {
            channel: NotificationChannel::new(source, policy),
            pipeline,
            command_rx,
            poll_timeout,
            maintenance_interval,
            events_received: 0,
            events_handled: 0,
            events_failed: 0,
            events_dropped: 0,
            reconnects: 0,
            last_event_at: None,
        }
    }

    /// Connect and subscribe to every configured channel
    async fn start(&mut self) -> Result<(), ConnectionError> {
        self.channel.connect().await?;
        self.channel.subscribe(&self.pipeline.channels()).await
    }

    /// Run the actor's main loop
    ///
    /// Returns `Ok` after a Shutdown command or once every handle is gone.
    /// Fails at startup when the store is unreachable, and later when the
    /// reconnect attempts are exhausted.
    #[instrument(skip(self))]
    pub async fn run(mut self) -> ListenerResult<()> {
        debug!("starting listener actor");
        self.start().await.map_err(ListenerError::Startup)?;
        info!(
            "listening for events on {} channels",
            self.channel.channels().len()
        );

        let mut maintenance = time::interval_at(
            Instant::now() + self.maintenance_interval,
            self.maintenance_interval,
        );
        maintenance.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                cmd = self.command_rx.recv() => {
                    match cmd {
                        Some(ListenerCommand::RunMaintenance { respond_to }) => {
                            debug!("received RunMaintenance command");
                            let result = self.pipeline.alerts().run_maintenance().await;
                            let _ = respond_to.send(result);
                        }
                        Some(ListenerCommand::GetStats { respond_to }) => {
                            let _ = respond_to.send(self.stats());
                        }
                        Some(ListenerCommand::Shutdown) => {
                            debug!("received shutdown command");
                            break;
                        }
                        None => {
                            warn!("command channel closed, shutting down");
                            break;
                        }
                    }
                }

                _ = maintenance.tick() => {
                    self.run_maintenance().await;
                }

                result = self.channel.poll(self.poll_timeout) => {
                    match result {
                        Ok(batch) if batch.is_empty() => {}
                        Ok(batch) => {
                            self.events_received += batch.len() as u64;
                            self.last_event_at = Some(self.pipeline.clock().now());
                            let report = self.pipeline.router().dispatch_batch(&batch).await;
                            self.events_handled += report.handled as u64;
                            self.events_failed += report.failed as u64;
                            self.events_dropped += report.dropped as u64;
                        }
                        Err(e) => {
                            warn!("listener lost its session: {e}");
                            self.channel.reconnect().await.map_err(ListenerError::Session)?;
                            self.reconnects += 1;
                        }
                    }
                }
            }
        }

        self.channel.disconnect().await;
        debug!("listener actor stopped");
        Ok(())
    }

    async fn run_maintenance(&self) {
        debug!("scheduled alert maintenance triggered");
        match self.pipeline.alerts().run_maintenance().await {
            Ok(MaintenanceReport { resolved, cleaned }) => {
                if resolved > 0 || cleaned > 0 {
                    info!("alert maintenance: {resolved} resolved, {cleaned} cleaned");
                }
            }
            Err(e) => error!("alert maintenance failed: {e}"),
        }
    }

    fn stats(&self) -> ListenerStats {
        ListenerStats {
            status: self.channel.status(),
            events_received: self.events_received,
            events_handled: self.events_handled,
            events_failed: self.events_failed,
            events_dropped: self.events_dropped,
            reconnects: self.reconnects,
            last_event_at: self.last_event_at,
            processing: self.pipeline.processor().stats(),
        }
    }
}

/// Handle for controlling the ListenerActor
#[derive(Clone)]
pub struct ListenerHandle {
    sender: mpsc::Sender<ListenerCommand>,
}

impl ListenerHandle {
    /// Spawn a listener over `source`. The join handle resolves with the
    /// actor's exit result.
    pub fn spawn<S>(source: S, pipeline: Arc<Pipeline>) -> (Self, JoinHandle<ListenerResult<()>>)
    where
        S: NotificationSource + Send + Sync + 'static,
    {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let actor = ListenerActor::new(source, pipeline, cmd_rx);
        let join = tokio::spawn(actor.run());
        (Self { sender: cmd_tx }, join)
    }

    /// Run a maintenance pass inside the listener task
    pub async fn run_maintenance(&self) -> anyhow::Result<MaintenanceReport> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ListenerCommand::RunMaintenance { respond_to: tx })
            .await
            .context("listener is not running")?;

        Ok(rx.await.context("listener dropped the request")??)
    }

    pub async fn get_stats(&self) -> Option<ListenerStats> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ListenerCommand::GetStats { respond_to: tx })
            .await
            .ok()?;

        rx.await.ok()
    }

    /// Connection status, or `None` once the listener has stopped
    pub async fn status(&self) -> Option<ConnectionStatus> {
        self.get_stats().await.map(|stats| stats.status)
    }

    pub async fn shutdown(&self) {
        let _ = self.sender.send(ListenerCommand::Shutdown).await;
    }
}
