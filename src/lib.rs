//! Event-driven alerting pipeline for procurement data.
//!
//! A single worker listens on PostgreSQL notification channels, routes every
//! notification to the [`events::processor::EventProcessor`], and raises,
//! deduplicates and auto-resolves alerts through the [`alerts`] engine.
//!
//! ```text
//! NotificationChannel → EventRouter → EventProcessor → AlertManager → AlertService
//! ```

pub mod actors;
pub mod alerts;
pub mod channel;
pub mod clock;
pub mod config;
pub mod events;
pub mod ml;
pub mod pipeline;
pub mod storage;

pub use clock::{Clock, ManualClock, SystemClock};
pub use pipeline::Pipeline;
