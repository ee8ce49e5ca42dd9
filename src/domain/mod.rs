//! Domain layer - pure admission logic with no I/O.
//!
//! This layer contains the core concepts and invariants of admission control:
//! - Named rate-limit policies
//! - Tracker key resolution
//! - Fixed-window and sliding-window counting
//! - The circuit breaker state machine
//! - The decision returned to callers
//!
//! All types in this layer are pure and easily testable.

pub mod circuit;
pub mod decision;
pub mod policy;
pub mod tracker;
pub mod window;
