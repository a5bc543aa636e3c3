// src/lib.rs
pub mod config;
pub mod drivers;
pub mod types;

pub use config::BodeConfig;
pub use types::{CutoffResult, MeasurementSample, SweepDataset, SweepPlan, SweepStepResult, SweepSummary};
