//! Troupe is a terminal client for chat backends that stream replies over
//! Server-Sent Events, including multi-agent "team" replies that can pause to
//! ask the user for feedback.
//!
//! The crate is organized around a small set of collaborating layers:
//! - [`core`] owns the stream decoder, event parser, conversation reducer,
//!   agent gating, session registry and turn orchestration.
//! - [`api`] defines the request bodies and wire payloads the backend speaks.
//! - [`commands`] implements slash-command parsing for the interactive chat.
//! - [`cli`] parses arguments and drives the interactive and one-shot modes.
//! - [`utils`] holds URL helpers and the transcript log.
//!
//! The binary (`src/main.rs`) routes through [`crate::cli::main`].

pub mod api;
pub mod cli;
pub mod commands;
pub mod core;
pub mod utils;
