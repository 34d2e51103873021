// Merge of a new extract into accumulated history.
//
// The reconciled set is keyed on (date, facility, measure, procedure).
// When both inputs carry a record for the same key the incoming one wins,
// since it is the newer (possibly corrected) submission.
use crate::error::{HacError, Result};
use crate::types::{Observation, ObservationKey};
use log::{info, warn};
use serde::Serialize;
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};

/// Condition worth flagging that still lets the run continue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ReconcileWarning {
    /// The incoming extract was empty; history is passed through unchanged.
    NoIncomingData,
    /// There was no history; likely a first run.
    NoHistory,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub history_rows: usize,
    pub incoming_rows: usize,
    /// Keys present in both inputs, resolved in favour of the incoming row.
    pub replaced: usize,
    /// Duplicate keys inside a single input that were dropped.
    pub dropped_duplicates: usize,
    pub output_rows: usize,
    pub warning: Option<ReconcileWarning>,
}

#[derive(Debug, Clone)]
pub struct Reconciliation {
    /// Reconciled observations ordered by key.
    pub observations: Vec<Observation>,
    pub report: ReconcileReport,
}

/// Union of `history` and `incoming` with exactly one observation per key.
///
/// Fails only when both inputs are empty.
pub fn reconcile(history: &[Observation], incoming: &[Observation]) -> Result<Reconciliation> {
    let mut report = ReconcileReport {
        history_rows: history.len(),
        incoming_rows: incoming.len(),
        ..ReconcileReport::default()
    };

    match (history.is_empty(), incoming.is_empty()) {
        (true, true) => return Err(HacError::NothingToReconcile),
        (false, true) => {
            warn!("No new data received; passing {} history rows through.", history.len());
            report.warning = Some(ReconcileWarning::NoIncomingData);
        }
        (true, false) => {
            warn!("No history present; treating incoming extract as the baseline (first run?).");
            report.warning = Some(ReconcileWarning::NoHistory);
        }
        (false, false) => {}
    }

    let mut merged: BTreeMap<ObservationKey, Observation> = BTreeMap::new();
    for obs in incoming {
        match merged.entry(obs.key()) {
            Entry::Vacant(v) => {
                v.insert(obs.clone());
            }
            Entry::Occupied(_) => report.dropped_duplicates += 1,
        }
    }

    let mut seen_history: BTreeSet<ObservationKey> = BTreeSet::new();
    for obs in history {
        let key = obs.key();
        if !seen_history.insert(key.clone()) {
            report.dropped_duplicates += 1;
            continue;
        }
        match merged.entry(key) {
            Entry::Vacant(v) => {
                v.insert(obs.clone());
            }
            Entry::Occupied(_) => report.replaced += 1,
        }
    }

    let observations: Vec<Observation> = merged.into_values().collect();
    report.output_rows = observations.len();
    info!(
        "Reconciled {} history + {} incoming rows into {} ({} replaced by newer data)",
        report.history_rows, report.incoming_rows, report.output_rows, report.replaced
    );
    Ok(Reconciliation { observations, report })
}
