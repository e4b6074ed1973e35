//! Courier ingestion API service library.
//!
//! # Purpose
//! Exposes the HTTP surface (message ingestion, tenant-scoped reads, the
//! admin plane), bearer-key authentication, the audit channel, configuration,
//! and observability wiring for use by the binary and the integration tests.

pub mod api;
pub mod app;
pub mod audit;
pub mod auth;
pub mod config;
pub mod observability;
