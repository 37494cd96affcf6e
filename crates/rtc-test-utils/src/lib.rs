//! # RTC Test Utilities
//!
//! Shared test utilities for the RTC Controller.
//!
//! - `server_harness` - `TestRtcServer`, a real HTTP server on a random port
//!   backed by an in-memory ledger (or a `#[sqlx::test]` pool) and a mock
//!   provider gateway
//! - `fixtures` - provider webhook envelopes
//!
//! ## Usage
//!
//! ```rust,ignore
//! use rtc_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() -> Result<(), anyhow::Error> {
//!     let server = TestRtcServer::spawn().await?;
//!     let client = reqwest::Client::new();
//!
//!     let response = client
//!         .post(format!("{}/api/v1/rooms/r1/join", server.url()))
//!         .json(&serde_json::json!({ "userId": "u1" }))
//!         .send()
//!         .await?;
//!
//!     assert_eq!(response.status(), 200);
//!     Ok(())
//! }
//! ```

pub mod fixtures;
pub mod server_harness;

pub use fixtures::*;
pub use server_harness::*;
