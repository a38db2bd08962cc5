//! Corroboration and restatement detection.
//!
//! For every fact key reported by two or more documents, each pair of values
//! is compared by relative difference. Pairs beyond tolerance become
//! findings; the severity is escalated to [`Severity::Restatement`] when the
//! period is closed under the configured [`ClosurePolicy`].
//!
//! This module is pure. Loading facts and persisting the run is the
//! pipeline's job.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, Days, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
  Error, Result,
  config::CorroborationConfig,
  fact::{CorroborationStatus, Fact, FactHash, FactKey},
  finding::{Finding, FindingEvidence, FindingKind, FindingRun, Severity},
  observation::CompanyId,
  period::{Period, PeriodId},
  scale::ScaleConfidence,
  taxonomy::LineItemId,
};

fn default_grace_days() -> u32 { 45 }

/// How a period comes to count as closed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum ClosurePolicy {
  /// Closed once its end date is more than `grace_days` in the past.
  GraceWindow {
    #[serde(default = "default_grace_days")]
    grace_days: u32,
  },
  /// Closed only once a user has confirmed it.
  Confirmed,
  /// Closed by either rule.
  Either {
    #[serde(default = "default_grace_days")]
    grace_days: u32,
  },
}

impl Default for ClosurePolicy {
  fn default() -> Self { Self::GraceWindow { grace_days: default_grace_days() } }
}

/// Period labels a user has confirmed closed for one company.
#[derive(Debug, Clone, Default)]
pub struct ClosedPeriods(pub HashSet<String>);

impl ClosedPeriods {
  pub fn contains(&self, label: &str) -> bool { self.0.contains(label) }
}

// ─── Settings ────────────────────────────────────────────────────────────────

/// Validated tolerances and closure policy.
#[derive(Debug, Clone)]
pub struct CorroborationSettings {
  default_tolerance: f64,
  assumed_factor:    f64,
  per_line_item:     HashMap<LineItemId, f64>,
  closure:           ClosurePolicy,
}

fn check_tolerance(value: f64) -> Result<f64> {
  if value.is_finite() && value >= 0.0 {
    Ok(value)
  } else {
    Err(Error::InvalidTolerance(value))
  }
}

impl CorroborationSettings {
  pub fn new(
    config: &CorroborationConfig,
    per_line_item: HashMap<LineItemId, f64>,
  ) -> Result<Self> {
    for tolerance in per_line_item.values() {
      check_tolerance(*tolerance)?;
    }
    Ok(Self {
      default_tolerance: check_tolerance(config.default_tolerance)?,
      assumed_factor: check_tolerance(config.assumed_scale_tolerance_factor)?,
      per_line_item,
      closure: config.closure.clone(),
    })
  }

  /// Relative tolerance for a line item before any assumed-scale tightening.
  pub fn tolerance_for(&self, line_item: &LineItemId) -> f64 {
    self
      .per_line_item
      .get(line_item)
      .copied()
      .unwrap_or(self.default_tolerance)
  }

  pub fn closure(&self) -> &ClosurePolicy { &self.closure }

  fn pair_tolerance(&self, a: &Fact, b: &Fact) -> f64 {
    let base = self.tolerance_for(&a.line_item_id);
    let assumed = [a, b]
      .iter()
      .any(|f| f.scale_confidence == ScaleConfidence::AssumedDefault);
    if assumed { base * self.assumed_factor } else { base }
  }

  /// Whether `period` counts as closed at `as_of`.
  pub fn is_closed(
    &self,
    period: &Period,
    confirmed: &ClosedPeriods,
    as_of: DateTime<Utc>,
  ) -> bool {
    // A window reaching past the calendar's end never elapses.
    let past_grace = |days: u32| {
      period
        .end
        .checked_add_days(Days::new(u64::from(days)))
        .is_some_and(|deadline| deadline < as_of.date_naive())
    };
    match self.closure {
      ClosurePolicy::GraceWindow { grace_days } => past_grace(grace_days),
      ClosurePolicy::Confirmed => confirmed.contains(&period.label),
      ClosurePolicy::Either { grace_days } => {
        confirmed.contains(&period.label) || past_grace(grace_days)
      }
    }
  }
}

// ─── Engine ──────────────────────────────────────────────────────────────────

/// Everything one corroboration run looks at.
#[derive(Debug, Clone, Copy)]
pub struct CorroborationInput<'a> {
  pub company_id: &'a CompanyId,
  pub facts:      &'a [Fact],
  pub periods:    &'a HashMap<PeriodId, Period>,
  pub closed:     &'a ClosedPeriods,
  pub as_of:      DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CorroborationOutcome {
  pub run:           FindingRun,
  /// New status for every input fact.
  pub statuses:      Vec<(FactHash, CorroborationStatus)>,
  /// Keys reported by two or more documents.
  pub keys_compared: usize,
  /// Keys reported by exactly one document.
  pub single_source: usize,
}

/// Relative difference, `0` when both values are zero.
pub fn relative_difference(a: f64, b: f64) -> f64 {
  let denominator = a.abs().max(b.abs());
  if denominator == 0.0 { 0.0 } else { (a - b).abs() / denominator }
}

pub fn corroborate(
  input: &CorroborationInput<'_>,
  settings: &CorroborationSettings,
) -> CorroborationOutcome {
  let run_id = Uuid::new_v4();
  let created_at = Utc::now();

  let mut groups: BTreeMap<FactKey, Vec<&Fact>> = BTreeMap::new();
  for fact in input.facts.iter().filter(|f| &f.company_id == input.company_id) {
    groups.entry(fact.key()).or_default().push(fact);
  }

  let mut findings = Vec::new();
  let mut statuses = Vec::with_capacity(input.facts.len());
  let mut keys_compared = 0;
  let mut single_source = 0;

  for (key, mut group) in groups {
    group.sort_by(|a, b| {
      a.document_id()
        .cmp(b.document_id())
        .then_with(|| a.content_hash.cmp(&b.content_hash))
    });

    if let [only] = group.as_slice() {
      single_source += 1;
      statuses.push((only.content_hash.clone(), CorroborationStatus::Uncorroborated));
      continue;
    }
    keys_compared += 1;

    let severity = match input.periods.get(&key.period_id) {
      Some(period) if settings.is_closed(period, input.closed, input.as_of) => {
        Severity::Restatement
      }
      Some(_) => Severity::Normal,
      None => {
        tracing::warn!(period = %key.period_id, "period missing; treating as open");
        Severity::Normal
      }
    };

    let mut disputed: HashSet<&FactHash> = HashSet::new();
    for (i, a) in group.iter().enumerate() {
      for b in &group[i + 1..] {
        let magnitude = relative_difference(a.value, b.value);
        let tolerance = settings.pair_tolerance(a, b);
        if magnitude <= tolerance {
          continue;
        }

        disputed.insert(&a.content_hash);
        disputed.insert(&b.content_hash);
        findings.push(Finding {
          finding_key: Finding::key_for(&a.content_hash, &b.content_hash),
          run_id,
          company_id: key.company_id.clone(),
          period_id: key.period_id.clone(),
          line_item_id: key.line_item_id.clone(),
          value_type: key.value_type,
          kind: FindingKind::CrossDocumentDisagreement,
          severity,
          magnitude,
          absolute_difference: (a.value - b.value).abs(),
          tolerance,
          evidence: vec![FindingEvidence::from(*a), FindingEvidence::from(*b)],
          created_at,
          superseded_by: None,
        });
      }
    }

    for fact in &group {
      let status = if disputed.contains(&fact.content_hash) {
        CorroborationStatus::Disputed
      } else {
        CorroborationStatus::Corroborated
      };
      statuses.push((fact.content_hash.clone(), status));
    }
  }

  tracing::debug!(
    company = %input.company_id,
    keys_compared,
    single_source,
    findings = findings.len(),
    "corroboration computed"
  );

  CorroborationOutcome {
    run: FindingRun {
      run_id,
      company_id: input.company_id.clone(),
      as_of: input.as_of,
      findings,
    },
    statuses,
    keys_compared,
    single_source,
  }
}
