//! Murmur: a multi-conversation LLM chat service.
//!
//! An axum HTTP server persists users, conversations, and messages in
//! `SQLite`, relays streaming chat completions from an OpenRouter-style
//! upstream, and stores each user's upstream API key encrypted at rest.
//! The [`client`] module carries the turn orchestrator that drives a full
//! chat turn against the API.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod client;
pub mod config;
pub mod crypto;
pub mod relay;
pub mod server;
pub mod start_server;
pub mod store;
