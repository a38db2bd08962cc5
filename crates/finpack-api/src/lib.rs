//! JSON REST API for Finpack.
//!
//! Exposes an axum [`Router`] backed by any [`finpack_core::store::FactStore`]
//! and a shared [`Pipeline`]. Auth, TLS, and transport concerns are the
//! caller's responsibility.
//!
//! # Mounting
//!
//! ```rust,ignore
//! .nest("/api", finpack_api::api_router(store.clone(), pipeline.clone()))
//! ```

pub mod companies;
pub mod documents;
pub mod error;
pub mod facts;
pub mod rejections;

use std::sync::Arc;

use axum::{
  Router,
  routing::{get, post},
};
use finpack_core::{pipeline::Pipeline, store::FactStore};

pub use error::ApiError;

/// Shared state threaded through all handlers.
pub struct ApiState<S> {
  pub store:    Arc<S>,
  pub pipeline: Arc<Pipeline>,
}

impl<S> Clone for ApiState<S> {
  fn clone(&self) -> Self {
    Self { store: Arc::clone(&self.store), pipeline: Arc::clone(&self.pipeline) }
  }
}

/// Build a fully-materialised API router for `store`.
///
/// The returned `Router<()>` can be nested into any parent router regardless
/// of its own state type.
pub fn api_router<S>(store: Arc<S>, pipeline: Arc<Pipeline>) -> Router<()>
where
  S: FactStore + 'static,
{
  Router::new()
    // Facts
    .route("/facts", get(facts::list::<S>))
    .route("/facts/{hash}/revisions", get(facts::revisions::<S>))
    .route("/best-view", get(facts::best_view::<S>))
    // Ingestion
    .route("/documents", post(documents::ingest::<S>))
    .route("/rejections", get(rejections::list::<S>))
    // Corroboration
    .route("/companies/{company}/findings", get(companies::findings::<S>))
    .route("/companies/{company}/corroborate", post(companies::corroborate::<S>))
    .route(
      "/companies/{company}/periods/{label}/close",
      post(companies::close_period::<S>),
    )
    .with_state(ApiState { store, pipeline })
}
