//! Event routing and per-kind processing.

pub mod payload;
pub mod processor;
pub mod router;

use thiserror::Error;

use crate::alerts::AlertError;
use crate::storage::StorageError;

pub use payload::{EventKind, EventPayload, PayloadError};
pub use processor::{EventProcessor, ProcessingStats};
pub use router::{DispatchOutcome, DispatchReport, EventHandler, EventRouter};

/// A handler could not finish processing an event. The event is abandoned;
/// the session carries on.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("store error: {0}")]
    Store(#[from] StorageError),

    #[error(transparent)]
    Alert(#[from] AlertError),
}
