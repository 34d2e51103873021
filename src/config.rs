use crate::error::Result;
use crate::types::{
    AnthemPoints, Facility, GroupKey, Measure, PopulationBaseline, Procedure, Target,
    DEFAULT_AGGREGATE_FACILITY,
};
use log::warn;
use once_cell::sync::Lazy;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Published national population constants per measure.
pub static DEFAULT_BASELINES: Lazy<BTreeMap<Measure, PopulationBaseline>> = Lazy::new(|| {
    let b = |mean, std, top_five, bottom_five| PopulationBaseline { mean, std, top_five, bottom_five };
    BTreeMap::from([
        (Measure::Psi90, b(0.999, 0.1151, 0.8021, 1.2668)),
        (Measure::Clabsi, b(0.8934, 0.5913, 0.0, 2.191)),
        (Measure::Cauti, b(0.9131, 0.5986, 0.0, 2.2)),
        (Measure::Mrsa, b(0.938, 0.6447, 0.0, 2.3715)),
        (Measure::Cdiff, b(0.8955, 0.3915, 0.128, 1.663)),
        (Measure::Ssi, b(0.8435, 0.5827, 0.0, 2.082)),
    ])
});

/// Read-only reference tables the engine consults: facility lookup,
/// population baselines, targets and bonus points.
///
/// Every field is optional in the JSON file; absent fields take the
/// defaults below.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReferenceData {
    /// Identifier of the synthetic all-facilities group.
    pub aggregate_facility: String,
    /// Known facility identifiers. Empty means any non-blank name is accepted.
    pub facilities: Vec<String>,
    /// Source facility code (e.g. NHSN orgID) to facility identifier.
    pub facility_codes: BTreeMap<String, String>,
    /// Overrides layered over [`DEFAULT_BASELINES`]; measures not listed
    /// keep their default constants.
    #[serde(deserialize_with = "baselines_over_defaults")]
    pub baselines: BTreeMap<Measure, PopulationBaseline>,
    pub targets: Vec<Target>,
    pub anthem_points: Vec<AnthemPoints>,
}

impl Default for ReferenceData {
    fn default() -> Self {
        ReferenceData {
            aggregate_facility: DEFAULT_AGGREGATE_FACILITY.to_string(),
            facilities: Vec::new(),
            facility_codes: BTreeMap::new(),
            baselines: DEFAULT_BASELINES.clone(),
            targets: Vec::new(),
            anthem_points: Vec::new(),
        }
    }
}

fn baselines_over_defaults<'de, D>(deserializer: D) -> std::result::Result<BTreeMap<Measure, PopulationBaseline>, D::Error>
where
    D: Deserializer<'de>,
{
    let overrides = BTreeMap::<Measure, PopulationBaseline>::deserialize(deserializer)?;
    let mut baselines = DEFAULT_BASELINES.clone();
    baselines.extend(overrides);
    Ok(baselines)
}

impl ReferenceData {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }

    pub fn aggregate(&self) -> Facility {
        Facility::new(self.aggregate_facility.clone())
    }

    pub fn is_aggregate(&self, facility: &Facility) -> bool {
        facility.as_str() == self.aggregate_facility
    }

    /// Map a raw facility cell to a facility identifier. `None` means the
    /// value could not be resolved; callers fall back to the aggregate.
    pub fn resolve_facility(&self, raw: Option<&str>) -> Option<Facility> {
        let raw = raw?.trim();
        if raw.is_empty() {
            return None;
        }
        if raw == self.aggregate_facility {
            return Some(self.aggregate());
        }
        // Spreadsheet exports often render integer codes as `10159.0`.
        let code = raw.strip_suffix(".0").unwrap_or(raw);
        if let Some(name) = self.facility_codes.get(code) {
            return Some(Facility::new(name.clone()));
        }
        let known = (self.facilities.is_empty() && code.parse::<f64>().is_err())
            || self.facilities.iter().any(|f| f == raw);
        known.then(|| Facility::new(raw))
    }

    /// Baseline for `measure`, if one exists and is usable as a divisor.
    pub fn baseline(&self, measure: Measure) -> Option<&PopulationBaseline> {
        match self.baselines.get(&measure) {
            Some(b) if b.std > 0.0 => Some(b),
            Some(_) => {
                warn!("Population baseline for {} has non-positive std; ignoring.", measure);
                None
            }
            None => None,
        }
    }

    pub fn target(&self, group: &GroupKey) -> Option<f64> {
        self.targets
            .iter()
            .find(|t| {
                t.facility == group.facility
                    && t.measure == group.measure
                    && t.procedure == group.procedure
            })
            .map(|t| t.target)
    }

    pub fn anthem_points(&self, measure: Measure, procedure: &Procedure) -> i64 {
        self.anthem_points
            .iter()
            .find(|p| p.measure == measure && &p.procedure == procedure)
            .map(|p| p.points)
            .unwrap_or(0)
    }

    /// Merge targets read from a separate table; later entries replace
    /// earlier ones with the same key.
    pub fn merge_targets(&mut self, targets: Vec<Target>) {
        for t in targets {
            self.targets.retain(|existing| {
                !(existing.facility == t.facility
                    && existing.measure == t.measure
                    && existing.procedure == t.procedure)
            });
            self.targets.push(t);
        }
    }

    pub fn merge_anthem_points(&mut self, points: Vec<AnthemPoints>) {
        for p in points {
            self.anthem_points
                .retain(|existing| !(existing.measure == p.measure && existing.procedure == p.procedure));
            self.anthem_points.push(p);
        }
    }
}
