//! Queue + delivery engine for the courier message service.
//!
//! # Purpose
//! This crate owns everything between "an authenticated request was accepted"
//! and "a provider verdict was recorded": the durable message state machine,
//! the concurrency-safe claim protocol, retry/backoff/dead-letter policy,
//! quota and rate-limit admission, the idempotency guard, usage accounting,
//! and the retention janitor. The HTTP transport and the worker process are
//! separate service crates that compose these pieces.
//!
//! # Consistency model
//! The relational database is the only shared mutable state. Workers
//! coordinate exclusively through row-level locks taken by the claim query
//! (skip-locked semantics); counters use atomic upserts; idempotency races
//! are settled by a unique index rather than application locks.
//!
//! Delivery is at-least-once: provider calls happen inside the poll
//! transaction, before commit. If a commit fails after a provider accepted a
//! message, the claim dissolves and the message is re-delivered.

pub mod dispatch;
pub mod enqueue;
pub mod idempotency;
pub mod janitor;
pub mod model;
pub mod provider;
pub mod quota;
pub mod rate_limit;
pub mod retry;
pub mod store;
pub mod supervisor;
pub mod usage;
