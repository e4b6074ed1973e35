//! Courier delivery worker service library.
//!
//! The worker is a thin host around the engine supervisor: configuration,
//! log/metrics bootstrap, store selection, and provider registration live
//! here; the polling loop, janitor, and drain logic live in
//! `courier_engine::supervisor`.

pub mod config;
pub mod observability;
