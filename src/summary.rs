use crate::pipeline::RunReport;
use crate::types::{GroupKey, MetricRow, ScorecardRow};
use crate::util::{average, format_number, format_optional};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};

fn latest_rows(metrics: &[MetricRow]) -> BTreeMap<GroupKey, &MetricRow> {
    let mut latest: BTreeMap<GroupKey, &MetricRow> = BTreeMap::new();
    for row in metrics {
        let key = GroupKey::new(row.facility.clone(), row.measure, row.procedure.clone());
        let e = latest.entry(key).or_insert(row);
        if row.date > e.date {
            *e = row;
        }
    }
    latest
}

/// Latest month of every group, one scorecard line each, ordered by
/// facility, measure and procedure.
pub fn scorecard(metrics: &[MetricRow]) -> Vec<ScorecardRow> {
    let latest = latest_rows(metrics);
    latest
        .into_values()
        .map(|r| ScorecardRow {
            facility: r.facility.to_string(),
            measure: r.measure.to_string(),
            procedure: r.procedure.to_string(),
            date: r.date.format("%Y-%m").to_string(),
            pptd: format_number(r.pptd, 3),
            trend: format_number(r.trend, 3),
            percentile: format_optional(r.percentile.map(|p| p * 100.0), 1),
            achievement_points: r
                .achievement_points
                .map(|p| p.to_string())
                .unwrap_or_else(|| "-".to_string()),
            residual: format_optional(r.residual, 0),
            anthem_points: r.anthem_points,
        })
        .collect()
}

#[derive(Debug, Serialize)]
pub struct RunSummary {
    pub report: RunReport,
    pub total_facilities: usize,
    pub total_measures: usize,
    /// Groups whose latest month earned bonus points.
    pub groups_earning_bonus: usize,
    /// Mean latest-month percentile over groups where it is defined.
    pub avg_latest_percentile: Option<f64>,
}

pub fn generate_summary(metrics: &[MetricRow], report: RunReport) -> RunSummary {
    let facilities: HashSet<&str> = metrics.iter().map(|r| r.facility.as_str()).collect();
    let measures: HashSet<_> = metrics.iter().map(|r| r.measure).collect();

    let latest = latest_rows(metrics);
    let percentiles: Vec<f64> = latest.values().filter_map(|r| r.percentile).collect();

    RunSummary {
        report,
        total_facilities: facilities.len(),
        total_measures: measures.len(),
        groups_earning_bonus: latest.values().filter(|r| r.anthem_points > 0).count(),
        avg_latest_percentile: (!percentiles.is_empty()).then(|| average(&percentiles)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Facility, Measure, Procedure};
    use chrono::NaiveDate;

    fn row(facility: &str, month: u32, percentile: Option<f64>, bonus: i64) -> MetricRow {
        MetricRow {
            date: NaiveDate::from_ymd_opt(2023, month, 1).unwrap(),
            facility: Facility::new(facility),
            measure: Measure::Clabsi,
            procedure: Procedure::None,
            numerator: 1.0,
            denominator: 2.0,
            units: 10.0,
            score: 0.5,
            pptd_numerator: 1.0,
            pptd_denominator: 2.0,
            pptd: 0.5,
            trend_numerator: 1.0,
            trend_denominator: 2.0,
            trend: 0.5,
            z_score: percentile.map(|_| 0.0),
            cum_z_score: percentile.map(|_| 0.0),
            win_z_score: percentile.map(|_| 0.0),
            win_cum_z_score: percentile.map(|_| 0.0),
            percentile,
            achievement_points: None,
            projected_denominator: None,
            residual: Some(3.0),
            anthem_points: bonus,
        }
    }

    #[test]
    fn scorecard_keeps_latest_month_per_group() {
        let metrics = vec![
            row("FacB", 2, Some(0.25), 0),
            row("FacA", 3, None, 0),
            row("FacA", 1, Some(0.5), 0),
        ];
        let card = scorecard(&metrics);
        assert_eq!(card.len(), 2);
        assert_eq!(card[0].facility, "FacA");
        assert_eq!(card[0].date, "2023-03");
        assert_eq!(card[0].percentile, "-");
        assert_eq!(card[1].percentile, "25.0");
        assert_eq!(card[1].residual, "3");
    }

    #[test]
    fn summary_counts_latest_rows() {
        let metrics = vec![
            row("FacA", 1, Some(0.2), 3),
            row("FacA", 2, Some(0.4), 0),
            row("FacB", 2, Some(0.6), 3),
        ];
        let report = RunReport {
            period: crate::metrics::PeriodMode::CalendarYear,
            as_of: NaiveDate::from_ymd_opt(2023, 3, 1).unwrap(),
            load: Default::default(),
            reconcile: Default::default(),
            placeholders: 0,
            groups: 2,
            metric_rows: 3,
            undefined_rows: 0,
        };
        let s = generate_summary(&metrics, report);
        assert_eq!(s.total_facilities, 2);
        assert_eq!(s.total_measures, 1);
        assert_eq!(s.groups_earning_bonus, 1);
        assert!((s.avg_latest_percentile.unwrap() - 0.5).abs() < 1e-12);
    }
}
