//! Core types and trait definitions for Tabula.
//!
//! This crate is deliberately free of HTTP, file-format and database
//! dependencies. Every other crate depends on it.

// We intentionally use native `async fn` in traits (stabilised in Rust 1.75).
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod aggregate;
pub mod error;
pub mod job;
pub mod observation;
pub mod query;
pub mod queue;
pub mod result;
pub mod store;

pub use error::{Error, Result};
