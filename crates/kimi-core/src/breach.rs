//! Breach state and alert deduplication.
//!
//! For every `(subject, key)` pair we remember whether the subject is
//! currently considered outside. An alert is raised only on the transition
//! from "inside or unknown" to "outside"; coming back inside re-arms the key
//! so the next exit alerts again.
//!
//! The functions here are pure. Persisting the table, and making sure the
//! flag is only set once the alert itself is stored, is the recorder's job.

use std::{collections::HashMap, fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
  Error,
  alert::NewAlert,
  evaluate::{Evaluation, Violation},
  fix::PositionFix,
  subject::Subject,
};

// ─── BreachKey ───────────────────────────────────────────────────────────────

/// What a breach flag is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "zone_id", rename_all = "snake_case")]
pub enum BreachKey {
  /// Outside the given safe zone.
  Zone(Uuid),
  /// Device battery below the configured threshold.
  LowBattery,
}

impl fmt::Display for BreachKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Zone(id) => write!(f, "zone:{}", id.hyphenated()),
      Self::LowBattery => f.write_str("low_battery"),
    }
  }
}

impl FromStr for BreachKey {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    if s == "low_battery" {
      return Ok(Self::LowBattery);
    }
    s.strip_prefix("zone:")
      .and_then(|id| Uuid::parse_str(id).ok())
      .map(Self::Zone)
      .ok_or_else(|| Error::UnknownBreachKey(s.to_owned()))
  }
}

// ─── BreachTable ─────────────────────────────────────────────────────────────

/// The breach flags of a single subject. Absent keys read as "not breached".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BreachTable {
  flags: HashMap<BreachKey, bool>,
}

impl BreachTable {
  pub fn new() -> Self { Self::default() }

  pub fn is_breached(&self, key: BreachKey) -> bool {
    self.flags.get(&key).copied().unwrap_or(false)
  }

  pub fn mark_breached(&mut self, key: BreachKey) { self.flags.insert(key, true); }

  pub fn clear(&mut self, key: BreachKey) { self.flags.insert(key, false); }

  /// Keys currently flagged as breached.
  pub fn breached(&self) -> impl Iterator<Item = BreachKey> + '_ {
    self.flags.iter().filter(|(_, b)| **b).map(|(k, _)| *k)
  }
}

impl FromIterator<(BreachKey, bool)> for BreachTable {
  fn from_iter<I: IntoIterator<Item = (BreachKey, bool)>>(iter: I) -> Self {
    Self { flags: iter.into_iter().collect() }
  }
}

// ─── Planning ────────────────────────────────────────────────────────────────

/// The transitions implied by one evaluation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BreachPlan {
  /// Violations that are new breaches and need an alert.
  pub raise: Vec<Violation>,
  /// Keys to reset because the subject is back inside.
  pub rearm: Vec<BreachKey>,
}

impl BreachPlan {
  pub fn is_empty(&self) -> bool { self.raise.is_empty() && self.rearm.is_empty() }
}

/// Compare `evaluation` with the current flags. Violations of zones already
/// flagged are continuations and are suppressed.
pub fn plan_zone_transitions(
  evaluation: &Evaluation,
  table: &BreachTable,
) -> BreachPlan {
  let raise = evaluation
    .violated_zones
    .iter()
    .filter(|v| !table.is_breached(BreachKey::Zone(v.safe_zone_id)))
    .cloned()
    .collect();

  let rearm = evaluation
    .contained_zones
    .iter()
    .map(|id| BreachKey::Zone(*id))
    .filter(|k| table.is_breached(*k))
    .collect();

  BreachPlan { raise, rearm }
}

/// What the battery reading of a fix means for the `LowBattery` flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatteryTransition {
  /// Newly below threshold; raise an alert at this level.
  Raise(u8),
  /// Back at or above threshold after a low period.
  Rearm,
  Unchanged,
}

pub fn plan_battery_transition(
  fix: &PositionFix,
  threshold: u8,
  table: &BreachTable,
) -> BatteryTransition {
  let Some(level) = fix.battery_level else {
    return BatteryTransition::Unchanged;
  };
  let flagged = table.is_breached(BreachKey::LowBattery);
  match (level < threshold, flagged) {
    (true, false) => BatteryTransition::Raise(level),
    (false, true) => BatteryTransition::Rearm,
    _ => BatteryTransition::Unchanged,
  }
}

/// Apply the zone transitions for one fix to an in-memory table and return
/// the alerts to record.
///
/// This marks keys as consumed immediately. Callers that persist alerts must
/// instead use [`plan_zone_transitions`] and only flag a key once its alert
/// has been stored.
pub fn record_breach_if_new(
  subject: &Subject,
  fix: &PositionFix,
  evaluation: &Evaluation,
  table: &mut BreachTable,
) -> Vec<NewAlert> {
  let plan = plan_zone_transitions(evaluation, table);

  for key in plan.rearm {
    table.clear(key);
  }

  plan
    .raise
    .iter()
    .map(|violation| {
      table.mark_breached(BreachKey::Zone(violation.safe_zone_id));
      NewAlert::geofence_breach(subject, fix, violation)
    })
    .collect()
}
