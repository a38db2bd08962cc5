//! Core types and pipeline stages for the Finpack canonical fact ledger.
//!
//! Raw observations extracted from monthly financial packs flow through
//! independent resolution stages (taxonomy, period, scale, value type), are
//! persisted as hash-keyed [`fact::Fact`]s, and are later reduced to a best
//! view and corroborated across documents.
//!
//! This crate is deliberately free of HTTP and database dependencies. Storage
//! backends implement [`store::FactStore`].

// We intentionally use native `async fn` in traits (stabilised in Rust 1.75).
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod best_view;
pub mod config;
pub mod corroboration;
pub mod error;
pub mod fact;
pub mod finding;
pub mod observation;
pub mod period;
pub mod pipeline;
pub mod rejection;
pub mod scale;
pub mod store;
pub mod taxonomy;
pub mod value_type;

mod hashing;
mod id;

pub use error::{Error, Result};
