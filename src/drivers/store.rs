use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use log::{debug, info};

use crate::types::{MeasurementSample, SweepDataset, SweepStepResult};

pub const HEADER: &str =
    "CH1_FREQ [Hz], CH1_AMPL [Vpp], CH2_FREQ [Hz], CH2_AMPL [Vpp], PHASE_DIFF [Deg], GAIN [dB]";
const SEPARATOR: &str = ", ";

/// Persists sweeps as `<dir>/<name>.csv`, one header row plus one row per step.
pub struct DatasetStore {
    dir: PathBuf,
}

impl DatasetStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.csv"))
    }

    pub fn save(&self, dataset: &SweepDataset, name: &str) -> io::Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path_for(name);
        let mut writer = BufWriter::new(File::create(&path)?);
        write_dataset(dataset, &mut writer)?;
        writer.flush()?;
        info!("Measurement data saved to path: {}", path.display());
        Ok(path)
    }

    pub fn load(&self, name: &str) -> io::Result<SweepDataset> {
        let file = File::open(self.path_for(name))?;
        read_dataset(BufReader::new(file))
    }

    /// Names of the saved datasets (file stems of `*.csv`), sorted. A missing
    /// directory simply has none.
    pub fn list(&self) -> io::Result<Vec<String>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut names = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "csv") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    names.push(stem.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }
}

/// `Bode_<unix seconds>`, the default dataset name.
pub fn timestamped_name() -> String {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    format!("Bode_{secs}")
}

pub fn write_dataset<W: Write>(dataset: &SweepDataset, writer: &mut W) -> io::Result<()> {
    // 写入 CSV 表头
    writeln!(writer, "{HEADER}")?;
    for row in dataset.iter() {
        let s = &row.sample;
        // `{}` on f64 prints the shortest text that parses back to the same value.
        writeln!(
            writer,
            "{}, {}, {}, {}, {}, {}",
            s.input_freq_hz, s.input_ampl_vpp, s.output_freq_hz, s.output_ampl_vpp, s.phase_diff_deg, row.gain_db
        )?;
    }
    Ok(())
}

/// Reads rows back in file order. The header and any malformed row are skipped,
/// including lines that are not valid UTF-8.
pub fn read_dataset<R: BufRead>(reader: R) -> io::Result<SweepDataset> {
    let mut rows = Vec::new();
    for (lineno, line) in reader.split(b'\n').enumerate() {
        let line = line?;
        match std::str::from_utf8(&line).ok().and_then(parse_row) {
            Some(row) => rows.push(row),
            None => debug!(
                "skipping line {}: '{}'",
                lineno + 1,
                String::from_utf8_lossy(&line).trim_end()
            ),
        }
    }
    Ok(SweepDataset::from_rows(rows))
}

fn parse_row(line: &str) -> Option<SweepStepResult> {
    let fields: Vec<f64> = line
        .trim_end_matches(['\r', '\n'])
        .split(SEPARATOR)
        .map(|f| f.trim().parse::<f64>().ok())
        .collect::<Option<_>>()?;
    let [input_freq_hz, input_ampl_vpp, output_freq_hz, output_ampl_vpp, phase_diff_deg, gain_db] =
        fields[..]
    else {
        return None;
    };
    Some(SweepStepResult {
        sample: MeasurementSample {
            input_freq_hz,
            input_ampl_vpp,
            output_freq_hz,
            output_ampl_vpp,
            phase_diff_deg,
        },
        gain_db,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::analyzer::BodeAnalyzer;
    use std::io::Cursor;

    fn dataset() -> SweepDataset {
        [(100.0, 0.98), (1000.0, 0.7071), (10000.0, 0.0995)]
            .iter()
            .map(|&(f, out)| {
                SweepStepResult::from_sample(MeasurementSample {
                    input_freq_hz: f,
                    input_ampl_vpp: 1.01,
                    output_freq_hz: f * 1.0003,
                    output_ampl_vpp: out,
                    phase_diff_deg: -45.123456789,
                })
                .unwrap()
            })
            .collect()
    }

    #[test]
    fn writes_header_and_six_columns() {
        let mut out = Vec::new();
        write_dataset(&dataset(), &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], HEADER);
        assert!(lines[1].starts_with("100, 1.01, "));
        assert_eq!(lines[1].split(", ").count(), 6);
    }

    #[test]
    fn reload_preserves_rows_exactly() {
        let original = dataset();
        let mut out = Vec::new();
        write_dataset(&original, &mut out).unwrap();
        let reloaded = read_dataset(Cursor::new(out)).unwrap();
        assert_eq!(reloaded, original);
        assert_eq!(
            BodeAnalyzer::cutoff(&reloaded).unwrap(),
            BodeAnalyzer::cutoff(&original).unwrap()
        );
    }

    #[test]
    fn malformed_rows_are_skipped() {
        let text = format!(
            "{HEADER}\n100, 1, 100, 1, 0, 0\nnot, a, row\n200, 1, 200\n\n300, 1, 300, 0.5, -30, oops\n400, 1, 400, 0.5, -40, -6.02\r\n"
        );
        let reloaded = read_dataset(Cursor::new(text)).unwrap();
        assert_eq!(reloaded.frequencies_hz(), vec![100.0, 400.0]);
        assert_eq!(reloaded.gains_db(), vec![0.0, -6.02]);
    }

    #[test]
    fn invalid_utf8_line_is_skipped_like_any_malformed_row() {
        let mut bytes = format!("{HEADER}\n100, 1, 100, 1, 0, 0\n").into_bytes();
        bytes.extend_from_slice(b"\xff\xfe garbage\n");
        bytes.extend_from_slice(b"400, 1, 400, 0.5, -40, -6.02\n");
        let reloaded = read_dataset(Cursor::new(bytes)).unwrap();
        assert_eq!(reloaded.len(), 2);
        assert_eq!(reloaded.frequencies_hz(), vec![100.0, 400.0]);
    }

    #[test]
    fn save_and_load_through_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = DatasetStore::new(dir.path().join("Data"));
        let path = store.save(&dataset(), "Bode_test").unwrap();
        assert!(path.ends_with("Bode_test.csv"));
        assert_eq!(store.load("Bode_test").unwrap(), dataset());
    }

    #[test]
    fn list_returns_saved_names_only() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = DatasetStore::new(dir.path());
        assert!(DatasetStore::new(dir.path().join("missing")).list().unwrap().is_empty());
        store.save(&dataset(), "Bode_2").unwrap();
        store.save(&dataset(), "Bode_1").unwrap();
        fs::write(dir.path().join("Bode_1.png"), b"not a dataset").unwrap();
        assert_eq!(store.list().unwrap(), vec!["Bode_1", "Bode_2"]);
    }

    #[test]
    fn timestamped_names_have_prefix() {
        assert!(timestamped_name().starts_with("Bode_"));
    }
}
