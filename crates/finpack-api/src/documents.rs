//! Handler for `POST /documents`: submit one document's extractor output.

use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use chrono::{DateTime, Utc};
use finpack_core::{
  observation::{CompanyId, DocumentId, RawObservation, SourceDocument},
  store::FactStore,
};
use serde::Deserialize;

use crate::{ApiState, error::ApiError};

/// JSON body accepted by `POST /documents`.
#[derive(Debug, Deserialize)]
pub struct IngestBody {
  pub company_id:   CompanyId,
  pub document_id:  DocumentId,
  pub filename:     Option<String>,
  /// Defaults to the time of the request.
  pub ingested_at:  Option<DateTime<Utc>>,
  /// Extractor output. Observations may omit `document_id`.
  #[serde(default)]
  pub observations: Vec<RawObservation>,
}

/// `POST /documents`: returns 201 and the [`IngestReport`](finpack_core::pipeline::IngestReport).
pub async fn ingest<S: FactStore>(
  State(state): State<ApiState<S>>,
  Json(body): Json<IngestBody>,
) -> Result<impl IntoResponse, ApiError> {
  if body.company_id.is_empty() || body.document_id.is_empty() {
    return Err(ApiError::BadRequest("company_id and document_id are required".into()));
  }

  let document = SourceDocument {
    document_id: body.document_id,
    company_id:  body.company_id,
    filename:    body.filename,
    ingested_at: body.ingested_at.unwrap_or_else(Utc::now),
  };
  let report = state
    .pipeline
    .ingest(state.store.as_ref(), document, body.observations)
    .await?;
  Ok((StatusCode::CREATED, Json(report)))
}
