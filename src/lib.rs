//! stream-relay: streams LLM chat completions to a browser.
//!
//! A relay server forwards a prompt to an OpenAI-compatible provider and
//! re-emits the generated text as a raw chunked body while it is produced.
//! The client half holds the chat session and renders the answer chunk by
//! chunk as it arrives.

pub mod client;
pub mod config;
pub mod contract;
pub mod server;
pub mod upstream;
