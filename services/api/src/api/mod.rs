//! HTTP API surface: handlers, payload types, and error helpers.
//!
//! Module boundaries mirror the routes: ingestion and reads under
//! `messages`, tenant usage under `usage`, the admin plane under `admin`.

pub mod admin;
pub mod error;
pub mod messages;
pub mod openapi;
pub mod system;
pub mod types;
pub mod usage;
