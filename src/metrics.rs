// Scorecard metrics for one (facility, measure, procedure) series.
//
// Per month, in order: SIR score, performance-period-to-date (PPTD)
// cumulative ratio, 3-month trend, then, only when the trailing 12-month
// volume guard passes, z-score normalization, achievement points and the
// residual-to-target projection. Bonus points are a plain threshold test
// and ignore the guard.
use crate::config::ReferenceData;
use crate::error::HacError;
use crate::rollup::select_series;
use crate::types::{group_series, GroupKey, MetricRow, Observation, PopulationBaseline};
use crate::util::{average, month_index, ratio, round_half_even, shifted_year_month};
use chrono::{Datelike, NaiveDate};
use log::{debug, info, warn};
use rayon::prelude::*;
use serde::Serialize;
use statrs::distribution::{ContinuousCDF, Normal};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

const FISCAL_YEAR_SHIFT_MONTHS: i32 = 6;
const GUARD_WINDOW_MONTHS: i32 = 12;
const MIN_GUARD_DENOMINATOR: f64 = 1.0;
const TREND_WINDOW: usize = 3;
const MONTHS_PER_PERIOD: u32 = 12;
const ACHIEVEMENT_SCALE: f64 = 9.0;

/// Reset cycle for the cumulative (PPTD) sums.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PeriodMode {
    /// Resets every January.
    CalendarYear,
    /// Resets every July (date shifted back six months before taking the year).
    FiscalYear,
    /// Trailing 12 months ending at the latest observation of the series.
    Rolling,
}

impl PeriodMode {
    pub fn code(&self) -> &'static str {
        match self {
            PeriodMode::CalendarYear => "CY",
            PeriodMode::FiscalYear => "FY",
            PeriodMode::Rolling => "ROLL",
        }
    }

    /// Months to shift a date back by before reading the period year and
    /// period month from it.
    fn shift(&self, latest: NaiveDate) -> i32 {
        match self {
            PeriodMode::CalendarYear => 0,
            PeriodMode::FiscalYear => FISCAL_YEAR_SHIFT_MONTHS,
            PeriodMode::Rolling => latest.month() as i32,
        }
    }
}

impl fmt::Display for PeriodMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for PeriodMode {
    type Err = HacError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase().replace(|c: char| c == '-' || c == ' ', "_");
        match upper.as_str() {
            "CY" | "CALENDAR" | "CALENDAR_YEAR" => Ok(PeriodMode::CalendarYear),
            "FY" | "FISCAL" | "FISCAL_YEAR" => Ok(PeriodMode::FiscalYear),
            "ROLL" | "ROLLING" | "ROLLING_12" => Ok(PeriodMode::Rolling),
            _ => Err(HacError::UnknownPeriodMode(s.trim().to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct MonthTotals {
    numerator: f64,
    denominator: f64,
    units: f64,
}

/// Sum rows that share a date so every month appears once.
fn totals_by_month(series: &[Observation]) -> BTreeMap<NaiveDate, MonthTotals> {
    let mut months: BTreeMap<NaiveDate, MonthTotals> = BTreeMap::new();
    for o in series {
        let t = months.entry(o.date).or_default();
        t.numerator += o.numerator;
        t.denominator += o.denominator;
        t.units += o.units;
    }
    months
}

/// Whether the group has enough predicted volume over the 12 months ending
/// at its latest observation for normalized statistics to mean anything.
fn volume_guard(months: &BTreeMap<NaiveDate, MonthTotals>, latest: NaiveDate) -> bool {
    let window_start = month_index(latest) - GUARD_WINDOW_MONTHS;
    let volume: f64 = months
        .iter()
        .filter(|(date, _)| month_index(**date) > window_start)
        .map(|(_, t)| t.denominator)
        .sum();
    volume >= MIN_GUARD_DENOMINATOR
}

fn clamp_z(z: f64, (min, max): (f64, f64)) -> f64 {
    if z > max {
        max
    } else if z < min {
        min
    } else {
        z
    }
}

/// Compute one [`MetricRow`] per month for `group`.
///
/// `series` may hold several rows per month; they are summed first. Rows are
/// returned in date order. A missing `baseline` leaves the z-score fields
/// undefined, a missing `target` leaves achievement and residual undefined
/// and the bonus at 0.
pub fn compute(
    group: &GroupKey,
    series: &[Observation],
    period: PeriodMode,
    baseline: Option<&PopulationBaseline>,
    target: Option<f64>,
    anthem_points: i64,
) -> Vec<MetricRow> {
    let months = totals_by_month(series);
    let Some(&latest) = months.keys().next_back() else {
        return Vec::new();
    };

    let shift = period.shift(latest);
    let guard = volume_guard(&months, latest);
    if !guard {
        debug!("{}: trailing 12-month volume below {}; normalization undefined", group, MIN_GUARD_DENOMINATOR);
    }
    let normalizer = baseline.filter(|_| guard).map(|b| (b, b.z_bounds()));
    let goal = target.filter(|_| guard);
    let months: Vec<(NaiveDate, MonthTotals)> = months.into_iter().collect();
    let avg_denominator = average(&months.iter().map(|(_, t)| t.denominator).collect::<Vec<_>>());
    let standard_normal = Normal::new(0.0, 1.0).ok();

    let mut rows = Vec::with_capacity(months.len());
    let mut current_period: Option<i32> = None;
    let (mut pptd_num, mut pptd_den) = (0.0, 0.0);

    for (i, &(date, totals)) in months.iter().enumerate() {
        let score = ratio(totals.numerator, totals.denominator);

        let (period_year, period_month) = shifted_year_month(date, shift);
        if current_period != Some(period_year) {
            current_period = Some(period_year);
            pptd_num = 0.0;
            pptd_den = 0.0;
        }
        pptd_num += totals.numerator;
        pptd_den += totals.denominator;
        let pptd = ratio(pptd_num, pptd_den);

        let window = &months[(i + 1).saturating_sub(TREND_WINDOW)..=i];
        let trend_num: f64 = window.iter().map(|(_, m)| m.numerator).sum();
        let trend_den: f64 = window.iter().map(|(_, m)| m.denominator).sum();
        let trend = ratio(trend_num, trend_den);

        let z = normalizer.map(|(b, bounds)| {
            let z_score = (score - b.mean) / b.std;
            let cum_z_score = (pptd - b.mean) / b.std;
            let win_cum = clamp_z(cum_z_score, bounds);
            let percentile = standard_normal.as_ref().map(|n| n.cdf(win_cum));
            (z_score, cum_z_score, clamp_z(z_score, bounds), win_cum, percentile)
        });

        let achievement_points = goal
            .filter(|t| *t != 0.0)
            .map(|t| round_half_even(ACHIEVEMENT_SCALE * (pptd - t) / (-t) + 0.5) as i64);

        let projection = goal.map(|t| {
            let remaining = MONTHS_PER_PERIOD.saturating_sub(period_month) as f64;
            let projected = pptd_den + avg_denominator * remaining;
            (projected, round_half_even(t * projected) - pptd_num)
        });

        let bonus = match target {
            Some(t) if pptd >= t => anthem_points,
            _ => 0,
        };

        rows.push(MetricRow {
            date,
            facility: group.facility.clone(),
            measure: group.measure,
            procedure: group.procedure.clone(),
            numerator: totals.numerator,
            denominator: totals.denominator,
            units: totals.units,
            score,
            pptd_numerator: pptd_num,
            pptd_denominator: pptd_den,
            pptd,
            trend_numerator: trend_num,
            trend_denominator: trend_den,
            trend,
            z_score: z.map(|z| z.0),
            cum_z_score: z.map(|z| z.1),
            win_z_score: z.map(|z| z.2),
            win_cum_z_score: z.map(|z| z.3),
            percentile: z.and_then(|z| z.4),
            achievement_points,
            projected_denominator: projection.map(|p| p.0),
            residual: projection.map(|p| p.1),
            anthem_points: bonus,
        });
    }
    rows
}

/// Every group the dataset supports: each granular triple that has data,
/// plus one aggregate group per (measure, procedure) that has facility data.
pub fn groups_in(observations: &[Observation], reference: &ReferenceData) -> Vec<GroupKey> {
    let mut groups: BTreeSet<GroupKey> = BTreeSet::new();
    for o in observations.iter().filter(|o| !reference.is_aggregate(&o.facility)) {
        groups.insert(o.group());
        groups.insert(GroupKey::new(reference.aggregate(), o.measure, o.procedure.clone()));
    }
    groups.into_iter().collect()
}

/// Run [`compute`] for every group in parallel and return all rows sorted
/// by (date, facility, measure, procedure).
pub fn compute_all(observations: &[Observation], reference: &ReferenceData, period: PeriodMode) -> Vec<MetricRow> {
    let series_by_group = group_series(observations);
    let groups = groups_in(observations, reference);
    info!("Running calculations for {} groups ({} periods)", groups.len(), period);

    let mut rows: Vec<MetricRow> = groups
        .par_iter()
        .flat_map(|group| {
            let series = select_series(&series_by_group, group, reference);
            let baseline = reference.baseline(group.measure);
            if baseline.is_none() {
                warn!("No population baseline for {}; z-scores left undefined for {}", group.measure, group);
            }
            let target = reference.target(group);
            if target.is_none() {
                debug!("No target found for {}", group);
            }
            let points = reference.anthem_points(group.measure, &group.procedure);
            compute(group, &series, period, baseline, target, points)
        })
        .collect();

    rows.sort_by(|a, b| a.key().cmp(&b.key()));
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Facility, Measure, Procedure, Target};
    use approx::assert_abs_diff_eq;
    use proptest::prelude::*;

    const CAUTI: PopulationBaseline = PopulationBaseline {
        mean: 0.9131,
        std: 0.5986,
        top_five: 0.0,
        bottom_five: 2.2,
    };

    fn ym(y: i32, m: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, 1).unwrap()
    }

    fn group() -> GroupKey {
        GroupKey::new(Facility::new("FacA"), Measure::Cauti, Procedure::None)
    }

    fn obs(date: NaiveDate, n: f64, d: f64) -> Observation {
        Observation {
            date,
            facility: Facility::new("FacA"),
            measure: Measure::Cauti,
            procedure: Procedure::None,
            numerator: n,
            denominator: d,
            units: 100.0,
        }
    }

    fn monthly(start: NaiveDate, values: &[(f64, f64)]) -> Vec<Observation> {
        values
            .iter()
            .enumerate()
            .map(|(i, &(n, d))| {
                let date = crate::util::from_month_index(month_index(start) + i as i32).unwrap();
                obs(date, n, d)
            })
            .collect()
    }

    #[test]
    fn parses_period_modes() {
        assert_eq!("cy".parse::<PeriodMode>().unwrap(), PeriodMode::CalendarYear);
        assert_eq!("Fiscal Year".parse::<PeriodMode>().unwrap(), PeriodMode::FiscalYear);
        assert_eq!("ROLL".parse::<PeriodMode>().unwrap(), PeriodMode::Rolling);
        assert!(matches!("QTR".parse::<PeriodMode>(), Err(HacError::UnknownPeriodMode(m)) if m == "QTR"));
    }

    #[test]
    fn score_at_population_mean_has_zero_z() {
        let rows = compute(&group(), &[obs(ym(2023, 1), 9.131, 10.0)], PeriodMode::CalendarYear, Some(&CAUTI), None, 0);
        assert_abs_diff_eq!(rows[0].z_score.unwrap(), 0.0, epsilon = 1e-9);
        assert_abs_diff_eq!(rows[0].percentile.unwrap(), 0.5, epsilon = 1e-9);
    }

    #[test]
    fn zero_events_and_zero_denominator_score_zero() {
        let rows = compute(
            &group(),
            &[obs(ym(2023, 1), 0.0, 5.0), obs(ym(2023, 2), 3.0, 0.0)],
            PeriodMode::CalendarYear,
            Some(&CAUTI),
            None,
            0,
        );
        assert_eq!(rows[0].score, 0.0);
        assert_eq!(rows[1].score, 0.0);
        assert!(rows[1].score.is_finite());
    }

    #[test]
    fn same_month_rows_are_summed_first() {
        let rows = compute(
            &group(),
            &[obs(ym(2023, 1), 1.0, 2.0), obs(ym(2023, 1), 3.0, 6.0)],
            PeriodMode::CalendarYear,
            None,
            None,
            0,
        );
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].numerator, 4.0);
        assert_eq!(rows[0].denominator, 8.0);
        assert_eq!(rows[0].units, 200.0);
        assert_eq!(rows[0].score, 0.5);
    }

    #[test]
    fn calendar_year_resets_in_january() {
        let series = monthly(ym(2022, 11), &[(1.0, 2.0), (1.0, 2.0), (2.0, 4.0), (1.0, 4.0)]);
        let rows = compute(&group(), &series, PeriodMode::CalendarYear, None, None, 0);
        let dens: Vec<f64> = rows.iter().map(|r| r.pptd_denominator).collect();
        let nums: Vec<f64> = rows.iter().map(|r| r.pptd_numerator).collect();
        assert_eq!(dens, vec![2.0, 4.0, 4.0, 8.0]);
        assert_eq!(nums, vec![1.0, 2.0, 2.0, 3.0]);
        assert_eq!(rows[3].pptd, 3.0 / 8.0);
    }

    #[test]
    fn fiscal_year_resets_in_july() {
        let series = monthly(ym(2023, 5), &[(1.0, 1.0), (1.0, 1.0), (1.0, 1.0), (1.0, 1.0)]);
        let rows = compute(&group(), &series, PeriodMode::FiscalYear, None, None, 0);
        let dens: Vec<f64> = rows.iter().map(|r| r.pptd_denominator).collect();
        assert_eq!(dens, vec![1.0, 2.0, 1.0, 2.0]);
    }

    #[test]
    fn rolling_period_is_anchored_to_latest_month() {
        // Jan 2022 .. Mar 2023: the rolling year runs Apr 2022 .. Mar 2023.
        let series = monthly(ym(2022, 1), &[(0.0, 1.0); 15]);
        let rows = compute(&group(), &series, PeriodMode::Rolling, None, Some(1.0), 0);
        assert_eq!(rows[2].date, ym(2022, 3));
        assert_eq!(rows[2].pptd_denominator, 3.0);
        assert_eq!(rows[3].date, ym(2022, 4));
        assert_eq!(rows[3].pptd_denominator, 1.0);
        assert_eq!(rows[14].pptd_denominator, 12.0);
        // Last month of the rolling year has nothing left to project.
        assert_eq!(rows[14].projected_denominator, Some(12.0));
    }

    #[test]
    fn trend_uses_up_to_three_months() {
        let series = monthly(ym(2023, 1), &[(1.0, 2.0), (2.0, 2.0), (0.0, 4.0), (3.0, 2.0)]);
        let rows = compute(&group(), &series, PeriodMode::CalendarYear, None, None, 0);
        assert_eq!((rows[0].trend_numerator, rows[0].trend_denominator), (1.0, 2.0));
        assert_eq!((rows[1].trend_numerator, rows[1].trend_denominator), (3.0, 4.0));
        assert_eq!((rows[2].trend_numerator, rows[2].trend_denominator), (3.0, 8.0));
        assert_eq!((rows[3].trend_numerator, rows[3].trend_denominator), (5.0, 8.0));
        assert_eq!(rows[3].trend, 5.0 / 8.0);
    }

    #[test]
    fn volume_guard_leaves_statistics_undefined() {
        let series = monthly(ym(2023, 1), &[(0.0, 0.2), (1.0, 0.2), (0.0, 0.2)]);
        let rows = compute(&group(), &series, PeriodMode::CalendarYear, Some(&CAUTI), Some(0.8), 4);
        for r in &rows {
            assert!(r.z_score.is_none());
            assert!(r.cum_z_score.is_none());
            assert!(r.win_z_score.is_none());
            assert!(r.win_cum_z_score.is_none());
            assert!(r.percentile.is_none());
            assert!(r.achievement_points.is_none());
            assert!(r.projected_denominator.is_none());
            assert!(r.residual.is_none());
        }
        // Bonus points are a direct threshold test and ignore the guard.
        assert_eq!(rows[1].anthem_points, 4);
        assert_eq!(rows[0].anthem_points, 0);
    }

    #[test]
    fn volume_guard_only_counts_the_last_twelve_months() {
        let mut values = vec![(0.0, 50.0)];
        values.extend(std::iter::repeat((0.0, 0.05)).take(12));
        let series = monthly(ym(2022, 1), &values);
        let rows = compute(&group(), &series, PeriodMode::CalendarYear, Some(&CAUTI), None, 0);
        assert!(rows.iter().all(|r| r.z_score.is_none()));
    }

    #[test]
    fn winsorizes_to_population_bounds() {
        let rows = compute(&group(), &[obs(ym(2023, 1), 40.0, 2.0)], PeriodMode::CalendarYear, Some(&CAUTI), None, 0);
        let (lo, hi) = CAUTI.z_bounds();
        let r = &rows[0];
        assert!(r.z_score.unwrap() > hi);
        assert_eq!(r.win_z_score, Some(hi));
        assert_eq!(r.win_cum_z_score, Some(hi));

        let rows = compute(&group(), &[obs(ym(2023, 1), 0.0, 2.0)], PeriodMode::CalendarYear, Some(&CAUTI), None, 0);
        assert_eq!(rows[0].win_z_score, Some(lo));
    }

    #[test]
    fn missing_baseline_or_target_is_not_fatal() {
        let series = monthly(ym(2023, 1), &[(1.0, 2.0), (0.0, 4.0)]);
        let rows = compute(&group(), &series, PeriodMode::CalendarYear, None, None, 5);
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.z_score.is_none() && r.achievement_points.is_none()));
        assert!(rows.iter().all(|r| r.anthem_points == 0));
        assert_eq!(rows[1].pptd, 1.0 / 6.0);
    }

    #[test]
    fn achievement_and_residual_against_target() {
        let series = monthly(ym(2023, 1), &[(1.0, 2.0), (0.0, 4.0)]);
        let rows = compute(&group(), &series, PeriodMode::CalendarYear, Some(&CAUTI), Some(1.0), 2);
        // Jan: PPTD 0.5 -> 9 * 0.5 + 0.5 = 5
        assert_eq!(rows[0].achievement_points, Some(5));
        // Feb: projected = 6 + 3 * 10 = 36, residual = 36 - 1
        assert_eq!(rows[1].projected_denominator, Some(36.0));
        assert_eq!(rows[1].residual, Some(35.0));
        assert_eq!(rows[1].anthem_points, 0);

        // PPTD 0 with target 1 -> 9.5 rounds half to even.
        let rows = compute(&group(), &[obs(ym(2023, 1), 0.0, 4.0)], PeriodMode::CalendarYear, None, Some(1.0), 0);
        assert_eq!(rows[0].achievement_points, Some(10));
    }

    #[test]
    fn fiscal_year_projection_counts_months_from_july() {
        let series = monthly(ym(2023, 1), &[(0.0, 1.0); 12]);
        let rows = compute(&group(), &series, PeriodMode::FiscalYear, None, Some(1.0), 0);
        let projected: Vec<f64> = rows.iter().map(|r| r.projected_denominator.unwrap()).collect();
        assert_eq!(projected[..6], [6.0; 6]);
        assert_eq!(projected[6..], [12.0; 6]);
        // June closes the fiscal year, July starts a new one.
        assert_eq!(rows[5].pptd_denominator, 6.0);
        assert_eq!(rows[6].pptd_denominator, 1.0);
        assert_eq!(rows[11].residual, Some(12.0));
    }

    #[test]
    fn compute_all_builds_aggregate_from_facilities() {
        let reference = ReferenceData {
            targets: vec![Target {
                facility: Facility::new("FacA"),
                measure: Measure::Cauti,
                procedure: Procedure::None,
                target: 0.9,
            }],
            ..ReferenceData::default()
        };
        let mut data = vec![obs(ym(2023, 1), 1.0, 2.0)];
        let mut fac_b = obs(ym(2023, 1), 3.0, 4.0);
        fac_b.facility = Facility::new("FacB");
        data.push(fac_b);
        let mut regional = obs(ym(2023, 1), 100.0, 100.0);
        regional.facility = reference.aggregate();
        data.push(regional);

        let rows = compute_all(&data, &reference, PeriodMode::CalendarYear);
        let facilities: Vec<&str> = rows.iter().map(|r| r.facility.as_str()).collect();
        assert_eq!(facilities, vec!["All Facilities", "FacA", "FacB"]);
        assert_eq!(rows[0].numerator, 4.0);
        assert_eq!(rows[0].denominator, 6.0);
        assert!(rows[1].achievement_points.is_some());
        assert!(rows[2].achievement_points.is_none());
    }

    proptest! {
        #[test]
        fn winsorized_z_scores_stay_in_bounds(
            values in prop::collection::vec((0.0f64..500.0, 0.0f64..50.0), 1..30)
        ) {
            let series = monthly(ym(2021, 1), &values);
            let (lo, hi) = CAUTI.z_bounds();
            for r in compute(&group(), &series, PeriodMode::CalendarYear, Some(&CAUTI), None, 0) {
                if let (Some(w), Some(wc)) = (r.win_z_score, r.win_cum_z_score) {
                    prop_assert!(w >= lo && w <= hi);
                    prop_assert!(wc >= lo && wc <= hi);
                }
            }
        }

        #[test]
        fn pptd_is_monotonic_within_a_period(
            values in prop::collection::vec((0.0f64..10.0, 0.0f64..10.0), 1..40),
            mode in prop::sample::select(vec![PeriodMode::CalendarYear, PeriodMode::FiscalYear, PeriodMode::Rolling]),
        ) {
            let series = monthly(ym(2020, 3), &values);
            let rows = compute(&group(), &series, mode, None, None, 0);
            for pair in rows.windows(2) {
                let (prev, cur) = (&pair[0], &pair[1]);
                let reset = cur.pptd_numerator == cur.numerator && cur.pptd_denominator == cur.denominator;
                let grew = cur.pptd_numerator >= prev.pptd_numerator && cur.pptd_denominator >= prev.pptd_denominator;
                prop_assert!(reset || grew);
            }
        }
    }
}
