use crate::config::ReferenceData;
use crate::error::Result;
use crate::types::{AnthemPoints, GroupKey, Measure, Observation, Procedure, RawRow, Target};
use crate::util::{parse_month, parse_numeric, Numeric};
use csv::ReaderBuilder;
use log::{debug, warn};
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;

/// Data-quality counters for one cleaning pass. None of these abort a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    pub total_rows: usize,
    pub kept_rows: usize,
    /// Rows dropped because the date or measure could not be read.
    pub rejected_rows: usize,
    /// Numeric cells that were present but not a valid count.
    pub numeric_errors: usize,
    /// Rows whose facility could not be resolved and were assigned to the aggregate.
    pub unmapped_facilities: usize,
    pub imputed_denominators: usize,
}

impl LoadReport {
    pub fn warnings(&self) -> usize {
        self.rejected_rows + self.numeric_errors + self.unmapped_facilities
    }

    pub fn merge(&mut self, other: &LoadReport) {
        self.total_rows += other.total_rows;
        self.kept_rows += other.kept_rows;
        self.rejected_rows += other.rejected_rows;
        self.numeric_errors += other.numeric_errors;
        self.unmapped_facilities += other.unmapped_facilities;
        self.imputed_denominators += other.imputed_denominators;
    }
}

struct Prelim {
    obs: Observation,
    denominator: Option<f64>,
}

/// Turn raw extract rows into cleaned observations.
///
/// Numerator and units default to 0 when missing. A missing denominator is
/// imputed with the mean denominator of the row's (facility, measure,
/// procedure) group, falling back to the measure-wide mean, since it is used
/// as a divisor downstream.
pub fn clean_rows<I>(rows: I, reference: &ReferenceData) -> (Vec<Observation>, LoadReport)
where
    I: IntoIterator<Item = RawRow>,
{
    let mut report = LoadReport::default();
    let mut prelim: Vec<Prelim> = Vec::new();

    for row in rows {
        report.total_rows += 1;

        let Some(date) = parse_month(row.date.as_deref()) else {
            debug!("Rejecting row with unreadable date {:?}", row.date);
            report.rejected_rows += 1;
            continue;
        };
        let measure = match row.measure.as_deref().map(str::parse::<Measure>) {
            Some(Ok(m)) => m,
            _ => {
                debug!("Rejecting row with unknown measure {:?}", row.measure);
                report.rejected_rows += 1;
                continue;
            }
        };

        let facility = match reference.resolve_facility(row.facility.as_deref()) {
            Some(f) => f,
            None => {
                report.unmapped_facilities += 1;
                reference.aggregate()
            }
        };
        let procedure = if measure.has_procedures() {
            row.procedure.as_deref().map(Procedure::from).unwrap_or(Procedure::None)
        } else {
            Procedure::None
        };

        let mut coerce = |cell: Option<&str>| match parse_numeric(cell) {
            Numeric::Value(v) => Some(v),
            Numeric::Missing => None,
            Numeric::Malformed => {
                report.numeric_errors += 1;
                None
            }
        };
        let numerator = coerce(row.numerator.as_deref()).unwrap_or(0.0);
        let units = coerce(row.units.as_deref()).unwrap_or(0.0);
        let denominator = coerce(row.denominator.as_deref());

        prelim.push(Prelim {
            obs: Observation {
                date,
                facility,
                measure,
                procedure,
                numerator,
                denominator: denominator.unwrap_or(0.0),
                units,
            },
            denominator,
        });
    }

    // Group and measure averages for imputation
    let mut by_group: HashMap<GroupKey, (f64, usize)> = HashMap::new();
    let mut by_measure: HashMap<Measure, (f64, usize)> = HashMap::new();
    for p in &prelim {
        if let Some(d) = p.denominator {
            let e = by_group.entry(p.obs.group()).or_insert((0.0, 0));
            e.0 += d;
            e.1 += 1;
            let e = by_measure.entry(p.obs.measure).or_insert((0.0, 0));
            e.0 += d;
            e.1 += 1;
        }
    }
    let mean = |acc: Option<&(f64, usize)>| acc.filter(|(_, c)| *c > 0).map(|(s, c)| s / *c as f64);

    let mut cleaned = Vec::with_capacity(prelim.len());
    for mut p in prelim {
        if p.denominator.is_none() {
            match mean(by_group.get(&p.obs.group())).or_else(|| mean(by_measure.get(&p.obs.measure))) {
                Some(m) => p.obs.denominator = m,
                None => warn!("No denominator available to impute for {} {}", p.obs.group(), p.obs.date),
            }
            report.imputed_denominators += 1;
        }
        cleaned.push(p.obs);
    }

    report.kept_rows = cleaned.len();
    if report.warnings() > 0 {
        warn!(
            "Cleaning: {} rows rejected, {} malformed numeric cells, {} unmapped facilities",
            report.rejected_rows, report.numeric_errors, report.unmapped_facilities
        );
    }
    (cleaned, report)
}

/// Read and clean an observation table from CSV.
pub fn load_observations(
    path: impl AsRef<Path>,
    reference: &ReferenceData,
) -> Result<(Vec<Observation>, LoadReport)> {
    let mut rdr = ReaderBuilder::new().flexible(true).from_path(path)?;
    let mut undecodable = 0usize;
    let mut rows = Vec::new();
    for result in rdr.deserialize::<RawRow>() {
        match result {
            Ok(r) => rows.push(r),
            Err(e) => {
                debug!("Skipping undecodable row: {}", e);
                undecodable += 1;
            }
        }
    }
    let (observations, mut report) = clean_rows(rows, reference);
    report.total_rows += undecodable;
    report.rejected_rows += undecodable;
    Ok((observations, report))
}

pub fn load_targets(path: impl AsRef<Path>) -> Result<Vec<Target>> {
    read_table(path)
}

pub fn load_anthem_points(path: impl AsRef<Path>) -> Result<Vec<AnthemPoints>> {
    read_table(path)
}

fn read_table<T: serde::de::DeserializeOwned>(path: impl AsRef<Path>) -> Result<Vec<T>> {
    let mut rdr = ReaderBuilder::new().flexible(true).from_path(path)?;
    let mut out = Vec::new();
    for result in rdr.deserialize::<T>() {
        out.push(result?);
    }
    Ok(out)
}
