//! # eventgate-core
//!
//! Foundation types for the EventGate dispatch server.
//!
//! This crate provides the shared vocabulary the server crates depend on:
//!
//! - **Envelopes**: [`envelope::ClientEnvelope`] / [`envelope::ServerEnvelope`]
//!   wire messages, request/response/subscription/event payloads, and the
//!   closed [`envelope::Verb`] enum
//! - **Filters**: [`filter::QueryFilter`] structural predicates and the
//!   [`filter::matches`] evaluator used during event fan-out
//! - **Errors**: [`errors::GateError`] hierarchy via `thiserror`, with
//!   status-code mapping for the response pipeline
//! - **Log fan-out**: [`logging::LogSink`], the level-tagged broadcast side
//!   channel injected into the dispatcher
//!
//! ## Crate Position
//!
//! Foundation crate. Depended on by `eventgate-settings`, `eventgate-server`,
//! and the `eventgate` binary.

#![deny(unsafe_code)]

pub mod envelope;
pub mod errors;
pub mod filter;
pub mod logging;
