//! Files produced from a sweep: the CSV dataset, a JSON summary next to it and
//! the Bode image under the image directory, all sharing one name.
//!
//! A sweep that stopped early still gets its rows saved, and they are analysed
//! and plotted as long as there are enough of them to define a cutoff.
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::{info, warn};

use crate::config::OutputSettings;
use crate::drivers::analyzer::BodeAnalyzer;
use crate::drivers::error::SweepError;
use crate::drivers::plot::{save_bode_png, PlotStyle};
use crate::drivers::store::DatasetStore;
use crate::types::{SweepDataset, SweepSummary};

#[derive(Clone, Debug, PartialEq)]
pub struct ReportFiles {
    pub summary: SweepSummary,
    pub summary_path: PathBuf,
    pub image_path: Option<PathBuf>,
}

/// Saves whatever a sweep produced under `name`. Returns `None` when there was
/// nothing to analyse.
pub fn persist_sweep(
    outcome: &Result<SweepDataset, SweepError>,
    output: &OutputSettings,
    style: &PlotStyle,
    name: &str,
) -> Result<Option<ReportFiles>> {
    let dataset = match outcome {
        Ok(dataset) => dataset,
        Err(err) => match err.partial() {
            Some(partial) if !partial.is_empty() => partial,
            _ => return Ok(None),
        },
    };
    DatasetStore::new(&output.data_dir)
        .save(dataset, name)
        .with_context(|| format!("failed to save dataset {name}"))?;
    if outcome.is_err() {
        info!("Saved {} rows collected before the sweep stopped", dataset.len());
    }
    if dataset.len() < 2 {
        warn!("{} row(s) recorded, too few to locate a cutoff", dataset.len());
        return Ok(None);
    }
    write_report(dataset, output, style, name).map(Some)
}

/// Reloads a saved dataset and writes its summary and image again.
pub fn replot(output: &OutputSettings, style: &PlotStyle, name: &str) -> Result<ReportFiles> {
    let store = DatasetStore::new(&output.data_dir);
    let dataset = store
        .load(name)
        .with_context(|| format!("failed to load {}", store.path_for(name).display()))?;
    info!("Loaded {} rows from {}", dataset.len(), store.path_for(name).display());
    write_report(&dataset, output, style, name)
}

pub fn write_report(
    dataset: &SweepDataset,
    output: &OutputSettings,
    style: &PlotStyle,
    name: &str,
) -> Result<ReportFiles> {
    let summary = BodeAnalyzer::summary(dataset)?;
    let cutoff = summary.cutoff;
    info!(
        "Cutoff (-3 dB) near {:.2} Hz: gain {:.3} dB (reference {:.3} dB), phase {:.2} deg",
        cutoff.cutoff_freq_hz, cutoff.cutoff_gain_db, cutoff.reference_gain_db, cutoff.cutoff_phase_deg
    );

    let summary_path = output.data_dir.join(format!("{name}.json"));
    write_summary(&summary_path, &summary)?;

    let image_path = if output.render_plot {
        let path = output.image_dir.join(format!("{name}.png"));
        save_bode_png(&path, dataset, &cutoff, style)
            .with_context(|| format!("failed to render {}", path.display()))?;
        Some(path)
    } else {
        None
    };
    Ok(ReportFiles {
        summary,
        summary_path,
        image_path,
    })
}

pub fn write_summary(path: &Path, summary: &SweepSummary) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let file = File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, summary)
        .with_context(|| format!("failed to write {}", path.display()))?;
    // 确保缓冲内容真正落盘
    writer
        .flush()
        .with_context(|| format!("failed to flush {}", path.display()))?;
    info!("Summary saved to path: {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MeasurementSample, SweepStepResult};

    fn low_pass(rows: usize) -> SweepDataset {
        (0..rows)
            .map(|k| {
                let f = 100.0 + 412.5 * k as f64;
                let ratio = 1.0 / (1.0 + (f / 2987.5).powi(2)).sqrt();
                SweepStepResult::from_sample(MeasurementSample {
                    input_freq_hz: f,
                    input_ampl_vpp: 1.0,
                    output_freq_hz: f,
                    output_ampl_vpp: ratio,
                    phase_diff_deg: -(f / 2987.5).atan().to_degrees(),
                })
                .unwrap()
            })
            .collect()
    }

    fn output(root: &Path) -> OutputSettings {
        OutputSettings {
            data_dir: root.join("Data"),
            image_dir: root.join("Img"),
            render_plot: true,
        }
    }

    fn aborted(partial: SweepDataset) -> Result<SweepDataset, SweepError> {
        Err(SweepError::Aborted {
            error_count: 5,
            failed_at_hz: 5050.0,
            suggested_start_hz: 100.0,
            suggested_stop_hz: 4637.5,
            partial,
        })
    }

    #[test]
    fn aborted_sweep_is_saved_analysed_and_plotted() {
        let dir = tempfile::tempdir().expect("tempdir");
        let output = output(dir.path());
        let files = persist_sweep(&aborted(low_pass(12)), &output, &PlotStyle::plain(), "Bode_partial")
            .unwrap()
            .expect("partial rows are analysed");

        assert_eq!(files.summary.row_count, 12);
        assert_eq!(files.summary.cutoff.cutoff_index, 7);
        assert!(output.data_dir.join("Bode_partial.csv").is_file());
        let json = fs::read_to_string(&files.summary_path).unwrap();
        let reread: SweepSummary = serde_json::from_str(&json).unwrap();
        assert_eq!(reread, files.summary);
        let png = fs::read(files.image_path.unwrap()).unwrap();
        assert_eq!(&png[..8], b"\x89PNG\r\n\x1a\n");
    }

    #[test]
    fn single_partial_row_is_saved_but_not_analysed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let output = output(dir.path());
        let files = persist_sweep(&aborted(low_pass(1)), &output, &PlotStyle::plain(), "Bode_one").unwrap();
        assert!(files.is_none());
        assert_eq!(DatasetStore::new(&output.data_dir).load("Bode_one").unwrap().len(), 1);
        assert!(!output.data_dir.join("Bode_one.json").exists());
        assert!(!output.image_dir.exists());
    }

    #[test]
    fn rejected_plan_writes_nothing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let output = output(dir.path());
        let outcome = Err(SweepError::InvalidPlan("step count must be at least 2, got 1".into()));
        assert!(persist_sweep(&outcome, &output, &PlotStyle::plain(), "Bode_none")
            .unwrap()
            .is_none());
        assert!(!output.data_dir.exists());
    }

    #[test]
    fn replot_reloads_saved_dataset() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut output = output(dir.path());
        let dataset = low_pass(25);
        DatasetStore::new(&output.data_dir).save(&dataset, "Bode_saved").unwrap();

        let files = replot(&output, &PlotStyle::plain(), "Bode_saved").unwrap();
        assert_eq!(files.summary.cutoff, BodeAnalyzer::cutoff(&dataset).unwrap());
        assert_eq!(files.image_path, Some(output.image_dir.join("Bode_saved.png")));
        assert!(output.image_dir.join("Bode_saved.png").is_file());

        output.render_plot = false;
        let files = replot(&output, &PlotStyle::plain(), "Bode_saved").unwrap();
        assert!(files.image_path.is_none());
        assert!(replot(&output, &PlotStyle::plain(), "Bode_missing").is_err());
    }
}
