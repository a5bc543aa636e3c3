use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};

use crate::config::{BodeConfig, QualitySettings};
use crate::drivers::error::{MeasurementQualityError, SweepError, TransportError};
use crate::drivers::executor::{pause, SweepStepExecutor};
use crate::drivers::port::MeasurementPort;
use crate::types::{MeasurementSample, SweepDataset, SweepPlan, SweepState, SweepStepResult};

/// Shared flag a caller can raise to stop a sweep at the next step boundary.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Decides whether a returned sample is a physical reading and derives its gain.
///
/// Output amplitude is not checked against the fault ceiling; only
/// the input channel and the frequency ratio are guarded.
pub fn classify(
    sample: MeasurementSample,
    limits: &QualitySettings,
) -> Result<SweepStepResult, MeasurementQualityError> {
    if sample.output_freq_hz > limits.divergence_ratio * sample.input_freq_hz {
        return Err(MeasurementQualityError::FrequencyDivergence {
            input_hz: sample.input_freq_hz,
            output_hz: sample.output_freq_hz,
        });
    }
    if sample.input_freq_hz > limits.fault_ceiling {
        return Err(MeasurementQualityError::FrequencyOutOfRange {
            freq_hz: sample.input_freq_hz,
        });
    }
    if sample.input_ampl_vpp > limits.fault_ceiling {
        return Err(MeasurementQualityError::AmplitudeOutOfRange {
            ampl_vpp: sample.input_ampl_vpp,
        });
    }
    SweepStepResult::from_sample(sample)
}

/// Drives one sweep at a time over a single instrument session.
///
/// Readings that fail [`classify`] are retried a little higher in frequency;
/// the error count is cumulative over the whole sweep. Transport errors end the
/// sweep immediately. Whatever happens, the rows recorded so far are handed back
/// (inside the error when the sweep did not complete) and the generator is
/// switched off.
pub struct SweepController<P: MeasurementPort> {
    executor: SweepStepExecutor<P>,
    quality: QualitySettings,
    inter_step: Duration,
    state: SweepState,
    error_count: u32,
    cancel: Option<CancelToken>,
}

impl<P: MeasurementPort> SweepController<P> {
    pub fn new(executor: SweepStepExecutor<P>, quality: QualitySettings, inter_step: Duration) -> Self {
        Self {
            executor,
            quality,
            inter_step,
            state: SweepState::Idle,
            error_count: 0,
            cancel: None,
        }
    }

    pub fn from_config(port: P, config: &BodeConfig) -> Self {
        let executor = SweepStepExecutor::new(port, config.generator, config.timing.settle());
        Self::new(executor, config.quality, config.timing.inter_step())
    }

    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn state(&self) -> SweepState {
        self.state
    }

    /// Erroneous readings seen during the current (or last) sweep.
    pub fn error_count(&self) -> u32 {
        self.error_count
    }

    pub fn executor(&self) -> &SweepStepExecutor<P> {
        &self.executor
    }

    pub fn executor_mut(&mut self) -> &mut SweepStepExecutor<P> {
        &mut self.executor
    }

    pub fn run(&mut self, plan: &SweepPlan) -> Result<SweepDataset, SweepError> {
        plan.validate()?;
        self.error_count = 0;
        let outcome = self.sweep(plan);
        if let Err(err) = self.executor.release() {
            warn!("failed to switch generator off: {err}");
        }
        outcome
    }

    fn sweep(&mut self, plan: &SweepPlan) -> Result<SweepDataset, SweepError> {
        let mut dataset = SweepDataset::default();
        let step = plan.frequency_step();

        // 预热采集：结果丢弃，只为让仪器进入稳定状态
        self.state = SweepState::Priming;
        if let Err(source) = self.prime(plan.start_freq_hz) {
            return Err(self.transport_failure(source, dataset));
        }

        // Tolerance keeps accumulated rounding from dropping the final step.
        let limit = plan.stop_freq_hz + step * 1e-9;
        let mut accepted = 0usize;
        let mut nudge_hz = 0.0;
        let mut last_good_hz: Option<f64> = None;
        loop {
            let current_hz = plan.start_freq_hz + accepted as f64 * step + nudge_hz;
            if current_hz > limit {
                break;
            }
            if self.cancel.as_ref().is_some_and(CancelToken::is_cancelled) {
                warn!("sweep cancelled at {current_hz:.2} Hz");
                self.state = SweepState::Aborted;
                return Err(SweepError::Cancelled { partial: dataset });
            }
            self.state = SweepState::Stepping;
            info!("STEP [{}/{}] : {:.2} Hz", accepted + 1, plan.step_count, current_hz);

            let sample = match self.executor.execute(current_hz) {
                Ok(sample) => sample,
                Err(source) => return Err(self.transport_failure(source, dataset)),
            };

            match classify(sample, &self.quality) {
                Ok(row) => {
                    self.state = SweepState::Advancing;
                    dataset.push(row);
                    last_good_hz = Some(current_hz);
                    accepted += 1;
                    pause(self.inter_step);
                }
                Err(issue) => {
                    // 错误计数在整个扫频过程中累计，不按步重置
                    self.state = SweepState::Retrying;
                    self.error_count += 1;
                    nudge_hz += self.quality.nudge_hz;
                    warn!("Erroneous signal detected at {current_hz:.2} Hz: {issue}");
                    if self.error_count > self.quality.max_errors {
                        self.state = SweepState::Aborted;
                        let suggested_stop_hz = last_good_hz.unwrap_or(plan.start_freq_hz);
                        error!(
                            "Unable to read signal at {current_hz:.2} Hz; suggested range {:.0} Hz - {suggested_stop_hz:.0} Hz",
                            plan.start_freq_hz
                        );
                        return Err(SweepError::Aborted {
                            error_count: self.error_count,
                            failed_at_hz: current_hz,
                            suggested_start_hz: plan.start_freq_hz,
                            suggested_stop_hz,
                            partial: dataset,
                        });
                    }
                    info!("Retrying at {:.0} Hz...", current_hz + self.quality.nudge_hz);
                }
            }
        }

        self.state = SweepState::Completed;
        info!(
            "sweep completed with {} rows and {} erroneous readings",
            dataset.len(),
            self.error_count
        );
        Ok(dataset)
    }

    /// Warm-up acquisition at the start frequency; the reading is discarded.
    fn prime(&mut self, start_freq_hz: f64) -> Result<(), TransportError> {
        self.executor.program_generator(start_freq_hz)?;
        self.executor.autoscale()?;
        self.executor.capture()?;
        Ok(())
    }

    fn transport_failure(&mut self, source: TransportError, partial: SweepDataset) -> SweepError {
        error!("{source}");
        self.state = SweepState::Aborted;
        SweepError::Transport { source, partial }
    }
}
