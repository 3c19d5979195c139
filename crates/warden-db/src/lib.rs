//! Warden Database Layer
//!
//! Stores shared by the pipeline: circuit-breaker counters, durable cleanup state and
//! upload records. Each store has a Postgres implementation and an in-memory one used
//! when no `DATABASE_URL` is configured (single-process deployments and tests).

pub mod db;

pub use db::*;
