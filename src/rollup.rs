// The synthetic all-facilities group.
//
// Aggregate-labeled rows in an extract are regional sums that include
// facilities outside the scorecard. The aggregate series is always rebuilt
// from the granular facility rows.
use crate::config::ReferenceData;
use crate::types::{GroupKey, Observation};
use chrono::NaiveDate;
use std::collections::BTreeMap;

/// One summed observation per month across every granular facility with
/// the measure and procedure of `group`. Pre-existing aggregate rows are
/// ignored.
pub fn rollup<'a, I>(observations: I, group: &GroupKey, reference: &ReferenceData) -> Vec<Observation>
where
    I: IntoIterator<Item = &'a Observation>,
{
    let mut by_month: BTreeMap<NaiveDate, (f64, f64, f64)> = BTreeMap::new();
    for o in observations.into_iter().filter(|o| {
        !reference.is_aggregate(&o.facility)
            && o.measure == group.measure
            && o.procedure == group.procedure
    }) {
        let e = by_month.entry(o.date).or_insert((0.0, 0.0, 0.0));
        e.0 += o.numerator;
        e.1 += o.denominator;
        e.2 += o.units;
    }

    by_month
        .into_iter()
        .map(|(date, (numerator, denominator, units))| Observation {
            date,
            facility: reference.aggregate(),
            measure: group.measure,
            procedure: group.procedure.clone(),
            numerator,
            denominator,
            units,
        })
        .collect()
}

/// The date-ordered series the metrics engine works on for `group`, looked
/// up in the per-group map built by [`group_series`](crate::types::group_series).
pub fn select_series(
    series: &BTreeMap<GroupKey, Vec<Observation>>,
    group: &GroupKey,
    reference: &ReferenceData,
) -> Vec<Observation> {
    if reference.is_aggregate(&group.facility) {
        let members = series
            .iter()
            .filter(|(key, _)| key.measure == group.measure && key.procedure == group.procedure)
            .flat_map(|(_, rows)| rows);
        return rollup(members, group, reference);
    }
    series.get(group).cloned().unwrap_or_default()
}
