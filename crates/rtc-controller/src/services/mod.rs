//! Service layer for the RTC Controller.
//!
//! # Components
//!
//! - `room_registry` - room sessions and participants
//! - `task_engine` - recording and transcription task lifecycle
//! - `webhook` - audit and reconciliation of provider callbacks
//! - `operations` - per-kind start/stop/probe dispatch onto the gateway
//! - `gateway` - provider RTC API client
//! - `credentials` - signed participant and bot credentials
//! - `artifacts` - rehosting of recording files into the file store

pub mod artifacts;
pub mod credentials;
pub mod gateway;
pub mod operations;
pub mod room_registry;
pub mod task_engine;
pub mod webhook;

pub use room_registry::RoomRegistry;
pub use task_engine::TaskEngine;
pub use webhook::{WebhookOutcome, WebhookReconciler};
