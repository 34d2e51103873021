use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tabled::Tabled;

/// Name used for the synthetic "all facilities" group unless the reference
/// data overrides it.
pub const DEFAULT_AGGREGATE_FACILITY: &str = "All Facilities";

/// Reserved procedure value for measures without surgical sub-types.
pub const NO_PROCEDURE: &str = "NA";

/// Facility identifier. The set of valid names is reference data, so this is
/// a plain string wrapper rather than an enum.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Facility(pub String);

impl Facility {
    pub fn new(name: impl Into<String>) -> Self {
        Facility(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Facility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Infection / quality measure codes reported to NHSN.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Measure {
    #[serde(rename = "CAUTI")]
    Cauti,
    #[serde(rename = "CLABSI")]
    Clabsi,
    #[serde(rename = "CDIFF")]
    Cdiff,
    #[serde(rename = "MRSA")]
    Mrsa,
    #[serde(rename = "SSI")]
    Ssi,
    #[serde(rename = "PSI_90", alias = "PSI_90: Composite")]
    Psi90,
}

impl Measure {
    pub fn code(&self) -> &'static str {
        match self {
            Measure::Cauti => "CAUTI",
            Measure::Clabsi => "CLABSI",
            Measure::Cdiff => "CDIFF",
            Measure::Mrsa => "MRSA",
            Measure::Ssi => "SSI",
            Measure::Psi90 => "PSI_90",
        }
    }

    /// Whether the measure is broken down by surgical procedure.
    pub fn has_procedures(&self) -> bool {
        matches!(self, Measure::Ssi)
    }
}

impl fmt::Display for Measure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Measure {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        match upper.as_str() {
            "CAUTI" => Ok(Measure::Cauti),
            "CLABSI" => Ok(Measure::Clabsi),
            "CDIFF" | "CDI" => Ok(Measure::Cdiff),
            "MRSA" => Ok(Measure::Mrsa),
            "SSI" => Ok(Measure::Ssi),
            "PSI_90" | "PSI90" | "PSI_90: COMPOSITE" => Ok(Measure::Psi90),
            _ => Err(format!("unknown measure '{}'", s.trim())),
        }
    }
}

/// Surgical procedure sub-type. `None` is the reserved "NA" value used by
/// every measure that has no procedure breakdown.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Procedure {
    None,
    Colo,
    Hyst,
    Other(String),
}

impl Procedure {
    pub fn code(&self) -> &str {
        match self {
            Procedure::None => NO_PROCEDURE,
            Procedure::Colo => "COLO",
            Procedure::Hyst => "HYST",
            Procedure::Other(code) => code,
        }
    }
}

impl From<&str> for Procedure {
    fn from(s: &str) -> Self {
        let upper = s.trim().to_ascii_uppercase();
        match upper.as_str() {
            "" | "NA" | "N/A" | "NAN" | "NONE" => Procedure::None,
            "COLO" => Procedure::Colo,
            "HYST" => Procedure::Hyst,
            _ => Procedure::Other(upper),
        }
    }
}

impl From<String> for Procedure {
    fn from(s: String) -> Self {
        Procedure::from(s.as_str())
    }
}

impl From<Procedure> for String {
    fn from(p: Procedure) -> Self {
        p.code().to_string()
    }
}

impl fmt::Display for Procedure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// One (facility, measure, procedure) series.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GroupKey {
    pub facility: Facility,
    pub measure: Measure,
    pub procedure: Procedure,
}

impl GroupKey {
    pub fn new(facility: Facility, measure: Measure, procedure: Procedure) -> Self {
        GroupKey { facility, measure, procedure }
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.facility, self.measure, self.procedure)
    }
}

/// Uniqueness key of a reconciled observation. Field order gives the
/// (date, facility, measure, procedure) sort order used for output.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObservationKey {
    pub date: NaiveDate,
    pub facility: Facility,
    pub measure: Measure,
    pub procedure: Procedure,
}

/// Raw extract row as it comes off disk. Every cell is kept as text so the
/// cleaning step can decide what counts as missing versus malformed.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawRow {
    #[serde(rename = "Date", alias = "summaryYM")]
    pub date: Option<String>,
    #[serde(rename = "Facility", alias = "orgID")]
    pub facility: Option<String>,
    #[serde(rename = "Measure")]
    pub measure: Option<String>,
    #[serde(rename = "Procedure", default)]
    pub procedure: Option<String>,
    #[serde(rename = "Numerator")]
    pub numerator: Option<String>,
    #[serde(rename = "Denominator")]
    pub denominator: Option<String>,
    #[serde(rename = "Units")]
    pub units: Option<String>,
}

/// One cleaned reporting-period record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    #[serde(rename = "Date")]
    pub date: NaiveDate,
    #[serde(rename = "Facility")]
    pub facility: Facility,
    #[serde(rename = "Measure")]
    pub measure: Measure,
    #[serde(rename = "Procedure")]
    pub procedure: Procedure,
    #[serde(rename = "Numerator")]
    pub numerator: f64,
    #[serde(rename = "Denominator")]
    pub denominator: f64,
    #[serde(rename = "Units")]
    pub units: f64,
}

impl Observation {
    pub fn key(&self) -> ObservationKey {
        ObservationKey {
            date: self.date,
            facility: self.facility.clone(),
            measure: self.measure,
            procedure: self.procedure.clone(),
        }
    }

    pub fn group(&self) -> GroupKey {
        GroupKey::new(self.facility.clone(), self.measure, self.procedure.clone())
    }
}

/// Split observations into per-group series, each sorted by date.
pub fn group_series<'a, I>(observations: I) -> BTreeMap<GroupKey, Vec<Observation>>
where
    I: IntoIterator<Item = &'a Observation>,
{
    let mut groups: BTreeMap<GroupKey, Vec<Observation>> = BTreeMap::new();
    for obs in observations {
        groups.entry(obs.group()).or_default().push(obs.clone());
    }
    for series in groups.values_mut() {
        series.sort_by_key(|o| o.date);
    }
    groups
}

/// Population normalization constants for one measure.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PopulationBaseline {
    pub mean: f64,
    pub std: f64,
    /// 5th-percentile SIR (best performers).
    #[serde(rename = "topFive")]
    pub top_five: f64,
    /// 95th-percentile SIR (worst performers).
    #[serde(rename = "bottomFive")]
    pub bottom_five: f64,
}

impl PopulationBaseline {
    /// Winsorization bounds in z-score space, `(min, max)`.
    pub fn z_bounds(&self) -> (f64, f64) {
        (
            (self.top_five - self.mean) / self.std,
            (self.bottom_five - self.mean) / self.std,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Target {
    #[serde(rename = "Facility")]
    pub facility: Facility,
    #[serde(rename = "Measure")]
    pub measure: Measure,
    #[serde(rename = "Procedure", default = "no_procedure")]
    pub procedure: Procedure,
    #[serde(rename = "Target", alias = "VBP Target")]
    pub target: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnthemPoints {
    #[serde(rename = "Measure")]
    pub measure: Measure,
    #[serde(rename = "Procedure", default = "no_procedure")]
    pub procedure: Procedure,
    #[serde(rename = "Points")]
    pub points: i64,
}

fn no_procedure() -> Procedure {
    Procedure::None
}

/// Computed scorecard metrics for one group and one month. `None` marks a
/// value that is undefined for the period (volume guard failed, or the
/// reference data it depends on is missing).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricRow {
    #[serde(rename = "Date")]
    pub date: NaiveDate,
    #[serde(rename = "Facility")]
    pub facility: Facility,
    #[serde(rename = "Measure")]
    pub measure: Measure,
    #[serde(rename = "Procedure")]
    pub procedure: Procedure,
    #[serde(rename = "Numerator")]
    pub numerator: f64,
    #[serde(rename = "Denominator")]
    pub denominator: f64,
    #[serde(rename = "Units")]
    pub units: f64,
    #[serde(rename = "Score")]
    pub score: f64,
    #[serde(rename = "PPTD_NUM")]
    pub pptd_numerator: f64,
    #[serde(rename = "PPTD_DEN")]
    pub pptd_denominator: f64,
    #[serde(rename = "PPTD")]
    pub pptd: f64,
    #[serde(rename = "CUMSUM_NUM3")]
    pub trend_numerator: f64,
    #[serde(rename = "CUMSUM_DEN3")]
    pub trend_denominator: f64,
    #[serde(rename = "Trend_3")]
    pub trend: f64,
    #[serde(rename = "ZScore")]
    pub z_score: Option<f64>,
    #[serde(rename = "cumZScore")]
    pub cum_z_score: Option<f64>,
    #[serde(rename = "winZScore")]
    pub win_z_score: Option<f64>,
    #[serde(rename = "winCumZScore")]
    pub win_cum_z_score: Option<f64>,
    #[serde(rename = "Percentile")]
    pub percentile: Option<f64>,
    #[serde(rename = "CumAchievementPts")]
    pub achievement_points: Option<i64>,
    #[serde(rename = "ProjectedDen")]
    pub projected_denominator: Option<f64>,
    #[serde(rename = "ResidualVBP")]
    pub residual: Option<f64>,
    #[serde(rename = "AnthemPoints")]
    pub anthem_points: i64,
}

impl MetricRow {
    pub fn key(&self) -> ObservationKey {
        ObservationKey {
            date: self.date,
            facility: self.facility.clone(),
            measure: self.measure,
            procedure: self.procedure.clone(),
        }
    }

    /// True when the volume guard (or missing baseline) left the
    /// normalization fields undefined.
    pub fn is_normalized(&self) -> bool {
        self.z_score.is_some()
    }
}

/// Latest-period view of one group, used for the console preview.
#[derive(Debug, Clone, Serialize, Tabled)]
pub struct ScorecardRow {
    #[serde(rename = "Facility")]
    #[tabled(rename = "Facility")]
    pub facility: String,
    #[serde(rename = "Measure")]
    #[tabled(rename = "Measure")]
    pub measure: String,
    #[serde(rename = "Procedure")]
    #[tabled(rename = "Procedure")]
    pub procedure: String,
    #[serde(rename = "Date")]
    #[tabled(rename = "Date")]
    pub date: String,
    #[serde(rename = "PPTD")]
    #[tabled(rename = "PPTD")]
    pub pptd: String,
    #[serde(rename = "Trend_3")]
    #[tabled(rename = "Trend_3")]
    pub trend: String,
    #[serde(rename = "Percentile")]
    #[tabled(rename = "Percentile")]
    pub percentile: String,
    #[serde(rename = "AchievementPts")]
    #[tabled(rename = "AchievementPts")]
    pub achievement_points: String,
    #[serde(rename = "ResidualVBP")]
    #[tabled(rename = "ResidualVBP")]
    pub residual: String,
    #[serde(rename = "AnthemPoints")]
    #[tabled(rename = "AnthemPoints")]
    pub anthem_points: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn procedure_parsing_maps_blanks_to_reserved_value() {
        assert_eq!(Procedure::from(""), Procedure::None);
        assert_eq!(Procedure::from("na"), Procedure::None);
        assert_eq!(Procedure::from(" colo "), Procedure::Colo);
        assert_eq!(Procedure::from("knee"), Procedure::Other("KNEE".to_string()));
        assert_eq!(String::from(Procedure::None), "NA");
    }

    #[test]
    fn measure_parsing_accepts_long_psi_name() {
        assert_eq!("cauti".parse::<Measure>(), Ok(Measure::Cauti));
        assert_eq!("PSI_90: Composite".parse::<Measure>(), Ok(Measure::Psi90));
        assert!("VAE".parse::<Measure>().is_err());
        assert!(Measure::Ssi.has_procedures());
        assert!(!Measure::Mrsa.has_procedures());
    }

    #[test]
    fn z_bounds_follow_percentile_thresholds() {
        let b = PopulationBaseline { mean: 0.9131, std: 0.5986, top_five: 0.0, bottom_five: 2.2 };
        let (lo, hi) = b.z_bounds();
        assert!((lo - (-0.9131 / 0.5986)).abs() < 1e-12);
        assert!((hi - ((2.2 - 0.9131) / 0.5986)).abs() < 1e-12);
    }
}
