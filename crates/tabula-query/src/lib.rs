//! Aggregate queries for Tabula.
//!
//! The [`Aggregator`] asks a [`QuerySynthesizer`] for query text, validates
//! and executes it against a [`NumericStore`](tabula_core::store::NumericStore),
//! and keeps the latest result per user.

pub mod aggregate;
pub mod error;
pub mod synthesizer;

pub use aggregate::{Aggregator, ComputeOutcome};
pub use error::{QueryExecutionError, SynthesisError, UNSUPPORTED_QUERY};
pub use synthesizer::{ChatConfig, ChatSynthesizer, GuardedSynthesizer, QuerySynthesizer};

#[cfg(test)]
mod tests;
