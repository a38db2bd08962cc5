//! SQLite backend for the Finpack fact store.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on a dedicated thread
//! without blocking the async runtime. Fact uniqueness is enforced by a
//! `UNIQUE` constraint on the content hash.

mod encode;
mod schema;
mod store;

pub mod error;

pub use error::{Error, Result};
pub use store::SqliteStore;

#[cfg(test)]
mod tests;

#[cfg(test)]
mod pipeline_tests;
