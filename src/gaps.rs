// Detection of missing reporting months and synthesis of placeholder rows.
//
// Every missing month is filled with a zero-event row carrying the series'
// mean denominator.
use crate::config::ReferenceData;
use crate::types::{group_series, Observation};
use crate::util::{average, from_month_index, month_index};
use chrono::NaiveDate;
use log::{debug, info};
use std::collections::BTreeSet;

/// Placeholder rows for the months missing from one group's `series`.
///
/// Covers every month from the first observation up to, but not including,
/// the month of `as_of`: interior holes as well as the months after the
/// latest submission. An empty series yields nothing, since there is no
/// baseline period to extrapolate from.
///
/// The returned rows are only the placeholders; the caller appends them.
pub fn fill_gaps(series: &[Observation], as_of: NaiveDate) -> Vec<Observation> {
    let Some(template) = series.first() else {
        debug!("Empty series; no placeholders synthesized.");
        return Vec::new();
    };

    let present: BTreeSet<i32> = series.iter().map(|o| month_index(o.date)).collect();
    let (Some(&first), Some(&last)) = (present.first(), present.last()) else {
        return Vec::new();
    };
    let current = month_index(as_of);
    let denominators: Vec<f64> = series.iter().map(|o| o.denominator).collect();
    let mean_denominator = average(&denominators);

    let placeholders: Vec<Observation> = (first + 1..current)
        .filter(|idx| !present.contains(idx))
        .filter_map(from_month_index)
        .map(|date| Observation {
            date,
            facility: template.facility.clone(),
            measure: template.measure,
            procedure: template.procedure.clone(),
            numerator: 0.0,
            denominator: mean_denominator,
            units: 0.0,
        })
        .collect();

    if !placeholders.is_empty() {
        debug!(
            "{}: {} missing months (latest submission {}), mean denominator {:.4}",
            template.group(),
            placeholders.len(),
            from_month_index(last).map(|d| d.to_string()).unwrap_or_default(),
            mean_denominator
        );
    }
    placeholders
}

/// Placeholders for every granular group in `observations`.
///
/// Aggregate-labeled groups are skipped.
pub fn find_missing(
    observations: &[Observation],
    as_of: NaiveDate,
    reference: &ReferenceData,
) -> Vec<Observation> {
    let missing: Vec<Observation> = group_series(observations)
        .into_iter()
        .filter(|(key, _)| !reference.is_aggregate(&key.facility))
        .flat_map(|(_, series)| fill_gaps(&series, as_of))
        .collect();
    info!("Synthesized {} placeholder rows for missing months", missing.len());
    missing
}
