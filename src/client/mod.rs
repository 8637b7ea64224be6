//! Chat client: session state and the streaming consumption loop.
//!
//! - [`session`]: `SessionState` and its transitions, token-budget guard
//! - [`controller`]: `ChatController`, talks to the relay over HTTP
//! - [`decoder`]: incremental UTF-8 decoding of body chunks
//! - [`tokens`]: whitespace token estimate

pub mod controller;
pub mod decoder;
pub mod session;
pub mod tokens;
