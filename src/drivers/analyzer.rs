//! Bode analysis over a completed sweep.
//!
//! - Reference gain is the sweep maximum and stands in for 0 dB.
//! - The cutoff is the row whose gain is closest to `reference - 3 dB`, by
//!   absolute difference. The first row wins a tie.
//! - Rows are taken in sweep order; nothing is interpolated.
use crate::drivers::error::AnalysisError;
use crate::types::{CutoffResult, SweepDataset, SweepSummary};

/// Drop from the reference gain that defines the cutoff point (dB).
pub const CUTOFF_DROP_DB: f64 = 3.0;

pub struct BodeAnalyzer;

impl BodeAnalyzer {
    pub fn cutoff(dataset: &SweepDataset) -> Result<CutoffResult, AnalysisError> {
        if dataset.len() < 2 {
            return Err(AnalysisError::InsufficientData {
                rows: dataset.len(),
            });
        }
        let rows = dataset.rows();
        let reference_gain_db = rows
            .iter()
            .map(|r| r.gain_db)
            .fold(f64::NEG_INFINITY, f64::max);
        let target = reference_gain_db - CUTOFF_DROP_DB;

        let mut cutoff_index = 0;
        let mut best = f64::INFINITY;
        for (idx, row) in rows.iter().enumerate() {
            let distance = (row.gain_db - target).abs();
            if distance < best {
                best = distance;
                cutoff_index = idx;
            }
        }
        let row = &rows[cutoff_index];
        Ok(CutoffResult {
            cutoff_index,
            cutoff_freq_hz: row.sample.input_freq_hz,
            cutoff_gain_db: row.gain_db,
            cutoff_phase_deg: row.sample.phase_diff_deg,
            reference_gain_db,
        })
    }

    pub fn summary(dataset: &SweepDataset) -> Result<SweepSummary, AnalysisError> {
        let cutoff = Self::cutoff(dataset)?;
        let (min_gain_db, max_gain_db) = min_max(dataset.iter().map(|r| r.gain_db));
        let (min_phase_deg, max_phase_deg) = min_max(dataset.iter().map(|r| r.sample.phase_diff_deg));
        let (start_freq_hz, stop_freq_hz) = min_max(dataset.iter().map(|r| r.sample.input_freq_hz));
        Ok(SweepSummary {
            row_count: dataset.len(),
            start_freq_hz,
            stop_freq_hz,
            min_gain_db,
            max_gain_db,
            min_phase_deg,
            max_phase_deg,
            cutoff,
        })
    }
}

fn min_max(values: impl Iterator<Item = f64>) -> (f64, f64) {
    values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
        (lo.min(v), hi.max(v))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MeasurementSample, SweepStepResult};

    fn dataset(gains: &[f64]) -> SweepDataset {
        gains
            .iter()
            .enumerate()
            .map(|(i, &g)| SweepStepResult {
                sample: MeasurementSample {
                    input_freq_hz: 100.0 * (i + 1) as f64,
                    input_ampl_vpp: 1.0,
                    output_freq_hz: 100.0 * (i + 1) as f64,
                    output_ampl_vpp: 10f64.powf(g / 20.0),
                    phase_diff_deg: -10.0 * i as f64,
                },
                gain_db: g,
            })
            .collect()
    }

    #[test]
    fn picks_row_nearest_three_db_down() {
        let result = BodeAnalyzer::cutoff(&dataset(&[0.0, -1.0, -3.0, -6.0, -9.0])).unwrap();
        assert_eq!(result.reference_gain_db, 0.0);
        assert_eq!(result.cutoff_index, 2);
        assert_eq!(result.cutoff_gain_db, -3.0);
        assert_eq!(result.cutoff_phase_deg, -20.0);
        assert_eq!(result.cutoff_freq_hz, 300.0);
    }

    #[test]
    fn reference_is_maximum_not_first_row() {
        // Band-pass shape: the peak sits in the middle.
        let result = BodeAnalyzer::cutoff(&dataset(&[-10.0, 2.0, 6.0, 3.2, -4.0])).unwrap();
        assert_eq!(result.reference_gain_db, 6.0);
        assert_eq!(result.cutoff_index, 3);
    }

    #[test]
    fn first_row_wins_a_tie() {
        let result = BodeAnalyzer::cutoff(&dataset(&[0.0, -2.0, -4.0])).unwrap();
        assert_eq!(result.cutoff_index, 1);
    }

    #[test]
    fn too_few_rows_is_an_error() {
        assert_eq!(
            BodeAnalyzer::cutoff(&dataset(&[])),
            Err(AnalysisError::InsufficientData { rows: 0 })
        );
        assert_eq!(
            BodeAnalyzer::cutoff(&dataset(&[-1.0])),
            Err(AnalysisError::InsufficientData { rows: 1 })
        );
    }

    #[test]
    fn summary_reports_spans() {
        let summary = BodeAnalyzer::summary(&dataset(&[0.0, -1.0, -3.0, -6.0])).unwrap();
        assert_eq!(summary.row_count, 4);
        assert_eq!(summary.start_freq_hz, 100.0);
        assert_eq!(summary.stop_freq_hz, 400.0);
        assert_eq!(summary.max_gain_db, 0.0);
        assert_eq!(summary.min_gain_db, -6.0);
        assert_eq!(summary.min_phase_deg, -30.0);
        assert_eq!(summary.max_phase_deg, 0.0);
        assert_eq!(summary.cutoff.cutoff_index, 2);
    }
}
