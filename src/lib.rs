//! Healthcare-acquired-condition scorecard engine.
//!
//! Merges periodic NHSN surveillance extracts into accumulated history,
//! fills reporting gaps, and computes the scorecard metric table
//! (SIR, performance-period-to-date ratios, trends, z-score percentiles,
//! achievement points and residual-to-target projections) per
//! facility, measure and procedure.

pub mod config;
pub mod error;
pub mod gaps;
pub mod loader;
pub mod metrics;
pub mod output;
pub mod pipeline;
pub mod reconcile;
pub mod rollup;
pub mod summary;
pub mod types;
pub mod util;

pub use config::ReferenceData;
pub use error::{HacError, Result};
pub use metrics::{compute, compute_all, PeriodMode};
pub use pipeline::{run, PipelineOutput, RunReport};
pub use reconcile::reconcile;
pub use types::{Facility, GroupKey, Measure, MetricRow, Observation, PopulationBaseline, Procedure};
