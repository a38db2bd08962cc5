//! Value types and their classification from column context.

use std::{collections::BTreeSet, fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{
  Error,
  rejection::{RejectionReason, StageRejection, StageResult},
};

/// Whether a figure is an actual, a budget, a prior-period comparative, or a
/// forecast.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
  Actual,
  Budget,
  Prior,
  Forecast,
}

impl ValueType {
  pub const ALL: [Self; 4] =
    [Self::Actual, Self::Budget, Self::Prior, Self::Forecast];

  pub fn as_str(self) -> &'static str {
    match self {
      Self::Actual => "actual",
      Self::Budget => "budget",
      Self::Prior => "prior",
      Self::Forecast => "forecast",
    }
  }
}

impl fmt::Display for ValueType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for ValueType {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Self::ALL
      .into_iter()
      .find(|v| v.as_str() == s)
      .ok_or_else(|| Error::UnknownDiscriminant {
        kind:  "value type",
        value: s.to_owned(),
      })
  }
}

// ─── Classification ──────────────────────────────────────────────────────────

fn marker(token: &str) -> Option<ValueType> {
  match token {
    "actual" | "actuals" | "act" => Some(ValueType::Actual),
    "budget" | "budgets" | "bud" | "bgt" | "plan" => Some(ValueType::Budget),
    "forecast" | "fcst" | "reforecast" | "outlook" | "projected" => {
      Some(ValueType::Forecast)
    }
    "prior" | "py" | "ly" | "comparative" => Some(ValueType::Prior),
    _ => None,
  }
}

/// Decide the value type of an observation.
///
/// An explicit type from the extractor wins. Otherwise every context string is
/// scanned for markers; one distinct marker decides, none means
/// [`ValueType::Actual`], and several are rejected. Variance columns are
/// derived figures and are always rejected.
pub fn classify_value_type(
  explicit: Option<ValueType>,
  context: &[Option<&str>],
) -> StageResult<ValueType> {
  if let Some(value_type) = explicit {
    return Ok(value_type);
  }

  let mut found = BTreeSet::new();
  for text in context.iter().flatten() {
    let lowered = text.to_lowercase();
    let tokens: Vec<&str> = lowered
      .split(|c: char| !c.is_alphanumeric())
      .filter(|t| !t.is_empty())
      .collect();

    if tokens.iter().any(|t| matches!(*t, "variance" | "var" | "diff")) {
      return Err(StageRejection::new(
        RejectionReason::ValueTypeAmbiguous,
        format!("variance column {text:?}"),
      ));
    }

    found.extend(tokens.iter().filter_map(|t| marker(t)));
    for pair in tokens.windows(2) {
      if matches!(pair, ["last" | "previous", "year" | "month" | "period"]) {
        found.insert(ValueType::Prior);
      }
    }
  }

  let mut markers = found.into_iter();
  match (markers.next(), markers.next()) {
    (None, _) => Ok(ValueType::Actual),
    (Some(only), None) => Ok(only),
    (Some(a), Some(b)) => Err(StageRejection::new(
      RejectionReason::ValueTypeAmbiguous,
      format!("conflicting value-type markers ({a}, {b})"),
    )),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn explicit_type_wins() {
    let got =
      classify_value_type(Some(ValueType::Budget), &[Some("Actual Feb 2025")]);
    assert_eq!(got, Ok(ValueType::Budget));
  }

  #[test]
  fn defaults_to_actual() {
    assert_eq!(
      classify_value_type(None, &[Some("Feb 2025"), None]),
      Ok(ValueType::Actual)
    );
  }

  #[test]
  fn reads_header_markers() {
    assert_eq!(
      classify_value_type(None, &[Some("Feb 2025 Bud")]),
      Ok(ValueType::Budget)
    );
    assert_eq!(
      classify_value_type(None, &[Some("Last year")]),
      Ok(ValueType::Prior)
    );
    assert_eq!(
      classify_value_type(None, &[Some("FY25 Fcst")]),
      Ok(ValueType::Forecast)
    );
  }

  #[test]
  fn conflicting_markers_are_rejected() {
    let err = classify_value_type(None, &[Some("Actual vs Budget")])
      .unwrap_err();
    assert_eq!(err.reason, RejectionReason::ValueTypeAmbiguous);
  }

  #[test]
  fn variance_columns_are_rejected() {
    let err = classify_value_type(None, &[Some("Variance")]).unwrap_err();
    assert_eq!(err.reason, RejectionReason::ValueTypeAmbiguous);
  }
}
