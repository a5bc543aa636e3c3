use thiserror::Error;

use crate::types::SweepDataset;

/// Session failure or non-zero instrument error code, tagged with the command that caused it.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("instrument error '{message}' after command '{command}'")]
pub struct TransportError {
    pub message: String,
    pub command: String,
}

impl TransportError {
    pub fn new(message: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            command: command.into(),
        }
    }
    pub fn io(command: &str, err: std::io::Error) -> Self {
        Self::new(format!("i/o failure: {err}"), command)
    }
}

/// A reading that came back from the instrument but cannot be trusted.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum MeasurementQualityError {
    #[error("output frequency {output_hz} Hz diverges from input frequency {input_hz} Hz")]
    FrequencyDivergence { input_hz: f64, output_hz: f64 },
    #[error("input frequency {freq_hz} Hz is a fault reading")]
    FrequencyOutOfRange { freq_hz: f64 },
    #[error("input amplitude {ampl_vpp} Vpp is a fault reading")]
    AmplitudeOutOfRange { ampl_vpp: f64 },
    #[error("input amplitude {ampl_vpp} Vpp must be positive to compute gain")]
    NonPositiveInput { ampl_vpp: f64 },
    #[error("output amplitude {output_ampl_vpp} Vpp gives an undefined gain")]
    NonFiniteGain { output_ampl_vpp: f64 },
}

#[derive(Debug, Error)]
pub enum SweepError {
    #[error("invalid sweep plan: {0}")]
    InvalidPlan(String),
    #[error("sweep stopped by transport failure: {source}")]
    Transport {
        #[source]
        source: TransportError,
        partial: SweepDataset,
    },
    #[error(
        "sweep aborted after {error_count} erroneous readings, unable to read signal at \
         {failed_at_hz:.2} Hz; suggested range {suggested_start_hz:.0} Hz - {suggested_stop_hz:.0} Hz"
    )]
    Aborted {
        error_count: u32,
        failed_at_hz: f64,
        suggested_start_hz: f64,
        suggested_stop_hz: f64,
        partial: SweepDataset,
    },
    #[error("sweep cancelled after {} recorded steps", .partial.len())]
    Cancelled { partial: SweepDataset },
}

impl SweepError {
    /// Rows collected before the sweep stopped, if it got past validation.
    pub fn partial(&self) -> Option<&SweepDataset> {
        match self {
            SweepError::InvalidPlan(_) => None,
            SweepError::Transport { partial, .. }
            | SweepError::Aborted { partial, .. }
            | SweepError::Cancelled { partial } => Some(partial),
        }
    }
    pub fn into_partial(self) -> Option<SweepDataset> {
        match self {
            SweepError::InvalidPlan(_) => None,
            SweepError::Transport { partial, .. }
            | SweepError::Aborted { partial, .. }
            | SweepError::Cancelled { partial } => Some(partial),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum AnalysisError {
    #[error("cutoff analysis needs at least 2 rows, dataset has {rows}")]
    InsufficientData { rows: usize },
}

#[derive(Debug, Error)]
pub enum PlotError {
    #[error("nothing to plot: {0}")]
    Analysis(#[from] AnalysisError),
    #[error("failed to render plot: {0}")]
    Plot(String),
}

impl<E: std::error::Error + Send + Sync + 'static> From<plotters::drawing::DrawingAreaErrorKind<E>>
    for PlotError
{
    fn from(value: plotters::drawing::DrawingAreaErrorKind<E>) -> Self {
        PlotError::Plot(format!("{value:?}"))
    }
}

impl From<image::ImageError> for PlotError {
    fn from(value: image::ImageError) -> Self {
        PlotError::Plot(value.to_string())
    }
}
