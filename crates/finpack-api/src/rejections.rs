//! Handler for `GET /rejections`.

use axum::{
  Json,
  extract::{Query, State},
};
use finpack_core::{
  observation::{CompanyId, DocumentId},
  rejection::{Rejection, RejectionReason},
  store::{FactStore, RejectionQuery},
};
use serde::Deserialize;

use crate::{ApiState, error::ApiError};

#[derive(Debug, Default, Deserialize)]
pub struct RejectionParams {
  pub company_id:  Option<CompanyId>,
  /// Reason code, e.g. `taxonomy_unmapped`.
  pub reason:      Option<RejectionReason>,
  pub document_id: Option<DocumentId>,
}

/// `GET /rejections[?company_id=...][&reason=...][&document_id=...]`
pub async fn list<S: FactStore>(
  State(state): State<ApiState<S>>,
  Query(params): Query<RejectionParams>,
) -> Result<Json<Vec<Rejection>>, ApiError> {
  let query = RejectionQuery {
    company_id:  params.company_id,
    reason:      params.reason,
    document_id: params.document_id,
  };
  let rejections = state.store.list_rejections(&query).await.map_err(ApiError::store)?;
  Ok(Json(rejections))
}
