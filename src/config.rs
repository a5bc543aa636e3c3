// src/config.rs
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::types::SweepPlan;

/// Waveform generator output, fixed for the whole sweep.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorSettings {
    pub amplitude_vpp: f64,
    pub offset_v: f64,
}

impl Default for GeneratorSettings {
    fn default() -> Self {
        Self {
            amplitude_vpp: 1.0,
            offset_v: 0.0,
        }
    }
}

/// Blocking waits of the sweep loop.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingSettings {
    /// After the generator is programmed for the first time.
    pub settle_ms: u64,
    /// After every accepted step, lets the acquisition pipeline drain.
    pub inter_step_ms: u64,
    /// After `*RST` during initialisation.
    pub reset_settle_ms: u64,
}

impl Default for TimingSettings {
    fn default() -> Self {
        Self {
            settle_ms: 3000,
            inter_step_ms: 750,
            reset_settle_ms: 1000,
        }
    }
}

impl TimingSettings {
    /// No waiting at all; used with simulated instruments.
    pub fn immediate() -> Self {
        Self {
            settle_ms: 0,
            inter_step_ms: 0,
            reset_settle_ms: 0,
        }
    }
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
    pub fn inter_step(&self) -> Duration {
        Duration::from_millis(self.inter_step_ms)
    }
    pub fn reset_settle(&self) -> Duration {
        Duration::from_millis(self.reset_settle_ms)
    }
}

/// Data-quality guards and the retry policy for erroneous readings.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualitySettings {
    /// Output frequency above `divergence_ratio × input` marks a mis-trigger.
    pub divergence_ratio: f64,
    /// Input frequency or amplitude above this is a fault sentinel, not a reading.
    pub fault_ceiling: f64,
    /// The sweep aborts once the cumulative error count exceeds this.
    pub max_errors: u32,
    /// Frequency nudge applied before retrying an erroneous step.
    pub nudge_hz: f64,
}

impl Default for QualitySettings {
    fn default() -> Self {
        Self {
            divergence_ratio: 1.5,
            fault_ceiling: 1e10,
            max_errors: 4,
            nudge_hz: 2.0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialSettings {
    pub path: Option<String>,
    pub baud_rate: u32,
    pub timeout_ms: u64,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            path: None,
            baud_rate: 9600,
            timeout_ms: 15_000,
        }
    }
}

impl SerialSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSettings {
    pub data_dir: PathBuf,
    pub image_dir: PathBuf,
    pub render_plot: bool,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("Data"),
            image_dir: PathBuf::from("Img"),
            render_plot: true,
        }
    }
}

// 总配置：JSON 文件中缺省的字段使用默认值
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BodeConfig {
    pub plan: SweepPlan,
    pub generator: GeneratorSettings,
    pub timing: TimingSettings,
    pub quality: QualitySettings,
    pub serial: SerialSettings,
    pub output: OutputSettings,
}

impl BodeConfig {
    pub fn from_json_str(text: &str) -> Result<Self> {
        serde_json::from_str(text).context("invalid sweep configuration")
    }
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::from_json_str(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    #[test]
    fn missing_sections_fall_back_to_defaults() {
        let cfg = BodeConfig::from_json_str(r#"{"plan":{"step_count":10},"serial":{"path":"/dev/ttyUSB0"}}"#)
            .unwrap();
        assert_eq!(cfg.plan.step_count, 10);
        assert_eq!(cfg.plan.start_freq_hz, 100.0);
        assert_eq!(cfg.plan.stop_freq_hz, 10_000.0);
        assert_eq!(cfg.serial.path.as_deref(), Some("/dev/ttyUSB0"));
        assert_eq!(cfg.serial.baud_rate, 9600);
        assert_eq!(cfg.quality, QualitySettings::default());
        assert_eq!(cfg.timing.settle(), Duration::from_secs(3));
    }
    #[test]
    fn rejects_malformed_json() {
        assert!(BodeConfig::from_json_str("{plan:").is_err());
    }
}
