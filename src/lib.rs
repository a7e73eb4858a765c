//! dbguard - Operation Governance for Database Clients
//!
//! This crate gates database operations issued by a client. It decides
//! whether an operation may run now (per-class token buckets), bounds how
//! long it may run (deadline scopes), turns failures into classified and
//! redacted client-safe errors, and records a structured audit trail.
//!
//! The components are independent; [`governor::Governor`] composes them in
//! the admission, execution, classification, audit order.

pub mod audit;
pub mod config;
pub mod error;
pub mod governor;
pub mod ratelimit;
pub mod sanitize;
pub mod severity;
pub mod timeout;
