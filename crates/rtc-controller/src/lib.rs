//! RTC Controller Library
//!
//! Stateful coordinator between an application and a hosted real-time
//! communication provider:
//!
//! - Room sessions and their participant maps
//! - Signed participant credentials
//! - Cloud recording and AI transcription tasks
//! - Reconciliation of provider webhooks into task results
//!
//! # Architecture
//!
//! Handler -> Service -> Repository:
//!
//! ```text
//! routes/mod.rs -> handlers/*.rs -> services/*.rs -> repositories/*.rs
//! ```
//!
//! The provider, the credential signer, the artifact store and the ledger
//! each sit behind a trait so tests swap them for in-process doubles.
//!
//! # Modules
//!
//! - `config` - Service configuration from environment
//! - `errors` - Error types with HTTP status code mapping
//! - `handlers` - HTTP request handlers
//! - `middleware` - HTTP metrics middleware
//! - `models` - Ledger records and API bodies
//! - `observability` - Prometheus metrics
//! - `repositories` - Ledger persistence (PostgreSQL or in-memory)
//! - `routes` - Axum router setup
//! - `services` - Room registry, task engine, webhook reconciler and external clients

pub mod config;
pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod observability;
pub mod repositories;
pub mod routes;
pub mod services;
