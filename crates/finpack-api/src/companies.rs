//! Per-company corroboration endpoints.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`  | `/companies/{company}/findings` | Active findings; `?include_superseded=true` for history |
//! | `POST` | `/companies/{company}/corroborate` | Optional `?as_of=` (RFC 3339) |
//! | `POST` | `/companies/{company}/periods/{label}/close` | Idempotent; returns 204 |

use axum::{
  Json,
  extract::{Path, Query, State},
  http::StatusCode,
};
use chrono::{DateTime, Utc};
use finpack_core::{
  finding::Finding, observation::CompanyId, pipeline::CorroborationReport, store::FactStore,
};
use serde::Deserialize;

use crate::{ApiState, error::ApiError};

#[derive(Debug, Default, Deserialize)]
pub struct FindingParams {
  #[serde(default)]
  pub include_superseded: bool,
}

/// `GET /companies/{company}/findings[?include_superseded=true]`
pub async fn findings<S: FactStore>(
  State(state): State<ApiState<S>>,
  Path(company): Path<CompanyId>,
  Query(params): Query<FindingParams>,
) -> Result<Json<Vec<Finding>>, ApiError> {
  let findings = state
    .store
    .list_findings(company, params.include_superseded)
    .await
    .map_err(ApiError::store)?;
  Ok(Json(findings))
}

#[derive(Debug, Default, Deserialize)]
pub struct CorroborateParams {
  pub as_of: Option<DateTime<Utc>>,
}

/// `POST /companies/{company}/corroborate[?as_of=...]`
pub async fn corroborate<S: FactStore>(
  State(state): State<ApiState<S>>,
  Path(company): Path<CompanyId>,
  Query(params): Query<CorroborateParams>,
) -> Result<Json<CorroborationReport>, ApiError> {
  let as_of = params.as_of.unwrap_or_else(Utc::now);
  let report = state
    .pipeline
    .corroborate(state.store.as_ref(), &company, as_of)
    .await?;
  Ok(Json(report))
}

/// `POST /companies/{company}/periods/{label}/close`
pub async fn close_period<S: FactStore>(
  State(state): State<ApiState<S>>,
  Path((company, label)): Path<(CompanyId, String)>,
) -> Result<StatusCode, ApiError> {
  if label.trim().is_empty() {
    return Err(ApiError::BadRequest("period label is empty".into()));
  }
  tracing::info!(%company, %label, "closing period");
  state
    .store
    .close_period(company, label)
    .await
    .map_err(ApiError::store)?;
  Ok(StatusCode::NO_CONTENT)
}
