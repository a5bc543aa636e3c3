// src/types.rs
use serde::{Deserialize, Serialize};

use crate::drivers::error::{MeasurementQualityError, SweepError};

/// One reading from the instrument: channel 1 is the generator drive, channel 2 the circuit output.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MeasurementSample {
    pub input_freq_hz: f64,
    pub input_ampl_vpp: f64,
    pub output_freq_hz: f64,
    pub output_ampl_vpp: f64,
    pub phase_diff_deg: f64,
}

/// Accepted sweep step with its derived gain.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SweepStepResult {
    pub sample: MeasurementSample,
    pub gain_db: f64,
}

impl SweepStepResult {
    /// Computes `20·log10(out / in)`. Rejects samples whose gain would be undefined.
    pub fn from_sample(sample: MeasurementSample) -> Result<Self, MeasurementQualityError> {
        // Written negated so NaN amplitudes are rejected too.
        if !(sample.input_ampl_vpp > 0.0) {
            return Err(MeasurementQualityError::NonPositiveInput {
                ampl_vpp: sample.input_ampl_vpp,
            });
        }
        let gain_db = gain_db(sample.input_ampl_vpp, sample.output_ampl_vpp);
        if !gain_db.is_finite() {
            return Err(MeasurementQualityError::NonFiniteGain {
                output_ampl_vpp: sample.output_ampl_vpp,
            });
        }
        Ok(Self { sample, gain_db })
    }
}

pub fn gain_db(input_ampl_vpp: f64, output_ampl_vpp: f64) -> f64 {
    20.0 * (output_ampl_vpp / input_ampl_vpp).log10()
}

/// Ordered rows of one sweep. Row order is the x-axis of every downstream consumer.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SweepDataset {
    rows: Vec<SweepStepResult>,
}

impl SweepDataset {
    pub fn from_rows(rows: Vec<SweepStepResult>) -> Self {
        Self { rows }
    }
    pub(crate) fn push(&mut self, row: SweepStepResult) {
        self.rows.push(row);
    }
    pub fn rows(&self) -> &[SweepStepResult] {
        &self.rows
    }
    pub fn len(&self) -> usize {
        self.rows.len()
    }
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
    pub fn iter(&self) -> impl Iterator<Item = &SweepStepResult> {
        self.rows.iter()
    }
    pub fn frequencies_hz(&self) -> Vec<f64> {
        self.rows.iter().map(|r| r.sample.input_freq_hz).collect()
    }
    pub fn gains_db(&self) -> Vec<f64> {
        self.rows.iter().map(|r| r.gain_db).collect()
    }
    pub fn phases_deg(&self) -> Vec<f64> {
        self.rows.iter().map(|r| r.sample.phase_diff_deg).collect()
    }
}

impl FromIterator<SweepStepResult> for SweepDataset {
    fn from_iter<I: IntoIterator<Item = SweepStepResult>>(iter: I) -> Self {
        Self {
            rows: iter.into_iter().collect(),
        }
    }
}

/// Sweep request: linear progression from start to stop in `step_count` points.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepPlan {
    pub start_freq_hz: f64,
    pub stop_freq_hz: f64,
    pub step_count: usize,
}

impl Default for SweepPlan {
    fn default() -> Self {
        Self {
            start_freq_hz: 100.0,
            stop_freq_hz: 10_000.0,
            step_count: 25,
        }
    }
}

impl SweepPlan {
    pub fn new(start_freq_hz: f64, stop_freq_hz: f64, step_count: usize) -> Self {
        Self {
            start_freq_hz,
            stop_freq_hz,
            step_count,
        }
    }
    pub fn validate(&self) -> Result<(), SweepError> {
        if self.step_count < 2 {
            return Err(SweepError::InvalidPlan(format!(
                "step count must be at least 2, got {}",
                self.step_count
            )));
        }
        if !self.start_freq_hz.is_finite() || self.start_freq_hz <= 0.0 {
            return Err(SweepError::InvalidPlan(format!(
                "start frequency must be a positive number of Hz, got {}",
                self.start_freq_hz
            )));
        }
        if !self.stop_freq_hz.is_finite() || self.stop_freq_hz <= self.start_freq_hz {
            return Err(SweepError::InvalidPlan(format!(
                "stop frequency ({}) must be above start frequency ({})",
                self.stop_freq_hz, self.start_freq_hz
            )));
        }
        Ok(())
    }
    pub fn frequency_step(&self) -> f64 {
        (self.stop_freq_hz - self.start_freq_hz) / (self.step_count - 1) as f64
    }
}

/// The -3 dB point picked by the analyzer.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CutoffResult {
    pub cutoff_index: usize,
    pub cutoff_freq_hz: f64,
    pub cutoff_gain_db: f64,
    pub cutoff_phase_deg: f64,
    /// Maximum gain of the sweep, used as the 0 dB reference.
    pub reference_gain_db: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SweepSummary {
    pub row_count: usize,
    pub start_freq_hz: f64,
    pub stop_freq_hz: f64,
    pub min_gain_db: f64,
    pub max_gain_db: f64,
    pub min_phase_deg: f64,
    pub max_phase_deg: f64,
    pub cutoff: CutoffResult,
}

// 扫频控制器状态
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum SweepState {
    Idle,
    Priming,
    Stepping,
    Retrying,
    Advancing,
    Completed,
    Aborted,
}
