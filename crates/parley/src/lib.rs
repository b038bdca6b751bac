//! Parley - chat reply pipeline for OpenAI-compatible providers
//!
//! This crate turns a conversation transcript into one assistant reply. It
//! picks between an OpenAI and a Perplexity provider, can fold live web
//! search results into the system prompt, retries with exponential backoff
//! and streams replies over SSE while stripping `<think>` reasoning spans.
//! The `parley` binary serves the pipeline as a JSON chat service.

pub mod backend;
pub mod chat;
pub mod config;
pub mod error;
pub mod logging;
pub mod orchestrator;
pub mod providers;
pub mod reasoning;
pub mod retry;
pub mod search;
pub mod server;
pub mod sse;
pub mod stream;

pub use error::ParleyError;
