//! Observability module for the RTC Controller.
//!
//! Provides metrics definitions and the Prometheus recorder setup.

pub mod metrics;
