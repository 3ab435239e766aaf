//! Actor-based event listener
//!
//! A single [`ListenerActor`](listener::ListenerActor) task owns the
//! notification session, the router and the processor. Everything else talks
//! to it through a cloneable [`ListenerHandle`](listener::ListenerHandle).
//!
//! ## Architecture Overview
//!
//! ```text
//!      ┌──────────────────┐   commands (mpsc)   ┌─────────────────────┐
//!      │ ListenerHandle   ├────────────────────►│  ListenerActor      │
//!      │ (main, CLI)      │◄────────────────────┤  select! loop       │
//!      └──────────────────┘   replies (oneshot) └──────────┬──────────┘
//!                                                          │ batches
//!                                               ┌──────────▼──────────┐
//!                                               │ EventRouter         │
//!                                               │  → EventProcessor   │
//!                                               │  → AlertService     │
//!                                               └─────────────────────┘
//! ```
//!
//! ## Communication Patterns
//!
//! 1. **Commands**: mpsc channel into the actor's select loop
//! 2. **Request/Response**: oneshot channels carried inside commands
//! 3. **Shutdown**: a `Shutdown` command; the main task joins the worker

pub mod listener;
pub mod messages;

pub use listener::{ListenerActor, ListenerError, ListenerHandle, ListenerResult};
pub use messages::{ListenerCommand, ListenerStats};
