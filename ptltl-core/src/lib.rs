//! `ptltl-core`: a runtime monitor for stateful network protocols.
//!
//! Consumes a stream of events emitted by a fuzzing harness — each event
//! describing one wire-level protocol message — and checks whether the
//! observed interleaving satisfies a collection of past-time Linear
//! Temporal Logic (ptLTL) properties. The pipeline, leaves first:
//!
//! - [`compiler`] — lexer, AST, parser, type checker, and preprocessor for
//!   the ptLTL specification language.
//! - [`evaluator`] — the incremental two-bitvector ptLTL evaluator.
//! - [`state`] — the per-event labeling function the evaluator consumes.
//! - [`adapters`] — one direction-aware predicate adapter per protocol
//!   (DTLS, RTSP, SIP, FTP, DNS, SSH).
//! - [`driver`] — the event-stream loop tying the above together, plus the
//!   per-protocol violation filter.
//! - [`violation`] — the append-only violation log writer.
//! - [`bridge`] — a subprocess harness helper for embedding the monitor as
//!   a child process of a fuzzing engine.
//! - [`error`] — the typed error taxonomy shared across the crate.

pub mod adapters;
pub mod bitvector;
pub mod bridge;
pub mod compiler;
pub mod driver;
pub mod error;
pub mod evaluator;
pub mod state;
pub mod violation;

pub use compiler::compile;
pub use error::{MonitorError, Result};
pub use evaluator::Evaluator;
pub use state::State;
