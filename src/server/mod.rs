//! HTTP relay server.
//!
//! - [`api`]: Router, shared state and route handlers
//! - [`catalog`]: Model list shaping
//! - [`relay`]: Streaming completion body
//! - [`error`]: Pre-stream error responses

pub mod api;
pub mod catalog;
pub mod error;
pub mod relay;
