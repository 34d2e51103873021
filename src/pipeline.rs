use crate::config::ReferenceData;
use crate::error::Result;
use crate::gaps::find_missing;
use crate::loader::LoadReport;
use crate::metrics::{compute_all, groups_in, PeriodMode};
use crate::reconcile::{reconcile, ReconcileReport};
use crate::types::{MetricRow, Observation};
use chrono::NaiveDate;
use log::info;
use serde::Serialize;

/// Counters describing one run, written alongside the metric table.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub period: PeriodMode,
    pub as_of: NaiveDate,
    pub load: LoadReport,
    pub reconcile: ReconcileReport,
    pub placeholders: usize,
    pub groups: usize,
    pub metric_rows: usize,
    /// Metric rows whose normalization fields are undefined.
    pub undefined_rows: usize,
}

#[derive(Debug, Clone)]
pub struct PipelineOutput {
    /// Reconciled observations to keep as history for the next run.
    /// Placeholders are never part of it.
    pub history: Vec<Observation>,
    pub placeholders: Vec<Observation>,
    pub metrics: Vec<MetricRow>,
    pub report: RunReport,
}

/// Reconcile `incoming` into `history`, fill reporting gaps up to `as_of`,
/// and compute the metric table. `load` carries the cleaning counters for
/// both inputs into the run report.
///
/// Fails only when there is nothing to reconcile.
pub fn run(
    history: &[Observation],
    incoming: &[Observation],
    load: LoadReport,
    reference: &ReferenceData,
    period: PeriodMode,
    as_of: NaiveDate,
) -> Result<PipelineOutput> {
    let reconciled = reconcile(history, incoming)?;
    let placeholders = find_missing(&reconciled.observations, as_of, reference);

    let mut working = reconciled.observations.clone();
    working.extend(placeholders.iter().cloned());

    let groups = groups_in(&working, reference).len();
    let metrics = compute_all(&working, reference, period);
    let undefined_rows = metrics.iter().filter(|r| !r.is_normalized()).count();
    info!(
        "Computed {} metric rows for {} groups ({} without normalization)",
        metrics.len(),
        groups,
        undefined_rows
    );

    let report = RunReport {
        period,
        as_of,
        load,
        reconcile: reconciled.report,
        placeholders: placeholders.len(),
        groups,
        metric_rows: metrics.len(),
        undefined_rows,
    };
    Ok(PipelineOutput {
        history: reconciled.observations,
        placeholders,
        metrics,
        report,
    })
}
