//! Handlers for fact queries.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`  | `/facts` | Optional `company_id`, `line_item_id`, `value_type`, `period_id`, `period_from`, `period_to` |
//! | `GET`  | `/facts/{hash}/revisions` | Value history of one fact |
//! | `GET`  | `/best-view` | Required `company_id`, `period_id`, `line_item_id`; `value_type` defaults to `actual` |

use axum::{
  Json,
  extract::{Path, Query, State},
};
use chrono::NaiveDate;
use finpack_core::{
  best_view::BestView,
  fact::{Fact, FactHash, FactKey, FactRevision},
  observation::CompanyId,
  period::PeriodId,
  store::{FactQuery, FactStore},
  taxonomy::LineItemId,
  value_type::ValueType,
};
use serde::Deserialize;

use crate::{ApiState, error::ApiError};

// ─── List ────────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
  pub company_id:   Option<CompanyId>,
  pub line_item_id: Option<LineItemId>,
  pub value_type:   Option<ValueType>,
  pub period_id:    Option<PeriodId>,
  /// Inclusive bound on period end dates, `YYYY-MM-DD`.
  pub period_from:  Option<NaiveDate>,
  pub period_to:    Option<NaiveDate>,
}

/// `GET /facts[?company_id=...][&line_item_id=...][&period_from=...]`
pub async fn list<S: FactStore>(
  State(state): State<ApiState<S>>,
  Query(params): Query<ListParams>,
) -> Result<Json<Vec<Fact>>, ApiError> {
  if let (Some(from), Some(to)) = (params.period_from, params.period_to)
    && from > to
  {
    return Err(ApiError::BadRequest(format!("period_from {from} is after period_to {to}")));
  }

  let query = FactQuery {
    company_id:   params.company_id,
    line_item_id: params.line_item_id,
    value_type:   params.value_type,
    period_id:    params.period_id,
    period_from:  params.period_from,
    period_to:    params.period_to,
  };
  let facts = state.store.list_facts(&query).await.map_err(ApiError::store)?;
  Ok(Json(facts))
}

// ─── Revisions ───────────────────────────────────────────────────────────────

/// `GET /facts/{hash}/revisions`
pub async fn revisions<S: FactStore>(
  State(state): State<ApiState<S>>,
  Path(hash): Path<FactHash>,
) -> Result<Json<Vec<FactRevision>>, ApiError> {
  state
    .store
    .get_fact(hash.clone())
    .await
    .map_err(ApiError::store)?
    .ok_or_else(|| ApiError::NotFound(format!("fact {hash} not found")))?;
  let revisions = state.store.fact_revisions(hash).await.map_err(ApiError::store)?;
  Ok(Json(revisions))
}

// ─── Best view ───────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct BestViewParams {
  pub company_id:   CompanyId,
  pub period_id:    PeriodId,
  pub line_item_id: LineItemId,
  #[serde(default)]
  pub value_type:   Option<ValueType>,
}

/// `GET /best-view?company_id=...&period_id=...&line_item_id=...`
///
/// A key with no facts answers `200` with `"status": "insufficient_evidence"`.
pub async fn best_view<S: FactStore>(
  State(state): State<ApiState<S>>,
  Query(params): Query<BestViewParams>,
) -> Result<Json<BestView>, ApiError> {
  let key = FactKey {
    company_id:   params.company_id,
    period_id:    params.period_id,
    line_item_id: params.line_item_id,
    value_type:   params.value_type.unwrap_or(ValueType::Actual),
  };
  let view = state.pipeline.best_view(state.store.as_ref(), &key).await?;
  Ok(Json(view))
}
