//! Confab holds multi-character chats against a locally supervised
//! llama.cpp server.
//!
//! The crate is organized around a small set of collaborating layers:
//! - [`server`] owns the single `llama-server` child process: launch
//!   arguments, readiness detection, the server log, and status.
//! - [`api`] speaks the server's native HTTP endpoints, including the
//!   streamed `/completion` call.
//! - [`core`] holds the chat model (messages with swipe versions, prompt
//!   templates, presets), the storage boundary, and the generation pipeline
//!   that assembles prompts, picks a speaker, and relays streamed text.
//! - [`character`] defines chat participants.
//!
//! Runtime entrypoints live in the binary crate (`src/main.rs`) and route
//! through [`crate::cli::main`].

pub mod api;
pub mod character;
pub mod cli;
pub mod core;
pub mod logging;
pub mod server;
pub mod utils;
