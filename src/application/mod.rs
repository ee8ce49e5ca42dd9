//! Application layer - orchestration of domain logic.
//!
//! This layer turns the pure domain state machines into stateful
//! components backed by a [`ports::KeyStore`]:
//! - Rate limiter (quota decisions)
//! - Circuit breaker (per-tracker failure isolation)
//! - Violation monitor (outcome aggregation and anomaly signals)
//! - Admission controller (orchestration of the three)
//!
//! ## Ports
//!
//! The application layer defines ports (traits) that infrastructure
//! adapters must implement. This keeps the application layer independent
//! from infrastructure details.

pub mod circuit_breaker;
pub mod config;
pub mod controller;
pub mod metrics;
pub mod monitor;
pub mod ports;
pub mod rate_limiter;
pub mod records;
