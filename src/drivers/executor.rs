use std::thread;
use std::time::Duration;

use log::{debug, info};

use crate::config::GeneratorSettings;
use crate::drivers::error::TransportError;
use crate::drivers::port::MeasurementPort;
use crate::types::MeasurementSample;

/// SCPI dialect of the InfiniiVision oscilloscope family with the WGEN option.
pub mod scpi {
    pub const QUERY_IDN: &str = "*IDN?";
    pub const CLEAR_STATUS: &str = "*CLS";
    pub const RESET: &str = "*RST";
    pub const AUTOSCALE: &str = ":AUToscale";
    pub const SINGLE: &str = ":SINGLE";
    pub const ACQUIRE_NORMAL: &str = ":ACQuire:TYPE NORMal";
    pub const QUERY_ACQUIRE_TYPE: &str = ":ACQuire:TYPE?";
    pub const DIGITIZE: &str = ":DIGitize CHANnel1,CHANnel2";
    pub const MEASURE_SOURCE: &str = ":MEASure:SOURce CHANnel1,CHANnel2";
    pub const QUERY_MEASURE_SOURCE: &str = ":MEASure:SOURce?";
    pub const SELECT_FREQ_CH1: &str = ":MEASure:FREQuency CHANnel1";
    pub const QUERY_FREQ_CH1: &str = ":MEASure:FREQuency? CHANnel1";
    pub const SELECT_VPP_CH1: &str = ":MEASure:VPP CHANnel1";
    pub const QUERY_VPP_CH1: &str = ":MEASure:VPP? CHANnel1";
    pub const SELECT_FREQ_CH2: &str = ":MEASure:FREQuency CHANnel2";
    pub const QUERY_FREQ_CH2: &str = ":MEASure:FREQuency? CHANnel2";
    pub const SELECT_VPP_CH2: &str = ":MEASure:VPP CHANnel2";
    pub const QUERY_VPP_CH2: &str = ":MEASure:VPP? CHANnel2";
    pub const SELECT_PHASE: &str = ":MEASure:PHASe CHANnel2,CHANnel1";
    pub const QUERY_PHASE: &str = ":MEASure:PHASe? CHANnel2,CHANnel1";
    pub const WGEN_OUTPUT_ON: &str = ":WGEN:OUTput 1";
    pub const WGEN_OUTPUT_OFF: &str = ":WGEN:OUTput 0";
    pub const WGEN_SINE: &str = ":WGEN:FUNCtion SIN";
}

/// Programs the generator and captures one [`MeasurementSample`] per call.
///
/// Owns the instrument session for the lifetime of a sweep. Performs no retries:
/// every [`TransportError`] is handed straight back to the caller. Dropping the
/// executor switches the generator output off.
pub struct SweepStepExecutor<P: MeasurementPort> {
    port: P,
    generator: GeneratorSettings,
    settle: Duration,
    programmed: bool,
}

impl<P: MeasurementPort> SweepStepExecutor<P> {
    pub fn new(port: P, generator: GeneratorSettings, settle: Duration) -> Self {
        Self {
            port,
            generator,
            settle,
            programmed: false,
        }
    }

    pub fn port(&self) -> &P {
        &self.port
    }

    /// Identifies the instrument, clears its status and loads the default setup.
    pub fn initialize(&mut self, reset_settle: Duration) -> Result<String, TransportError> {
        let idn = self.port.send_query(scpi::QUERY_IDN)?;
        info!("Identification string '{idn}'");
        self.port.send_command(scpi::CLEAR_STATUS)?;
        self.port.send_command(scpi::RESET)?;
        pause(reset_settle);
        Ok(idn)
    }

    /// Sine output at `freq_hz` with the configured amplitude and offset. The
    /// first call after construction or [`release`](Self::release) waits for the
    /// waveform to settle.
    pub fn program_generator(&mut self, freq_hz: f64) -> Result<(), TransportError> {
        self.port.send_command(scpi::WGEN_OUTPUT_ON)?;
        self.port.send_command(scpi::WGEN_SINE)?;
        self.port
            .send_command(&format!(":WGEN:VOLTage {:.3}", self.generator.amplitude_vpp))?;
        self.port
            .send_command(&format!(":WGEN:FREQuency {freq_hz:.3}"))?;
        self.port
            .send_command(&format!(":WGEN:VOLTage:OFFset {:.3}", self.generator.offset_v))?;
        if !self.programmed {
            self.programmed = true;
            pause(self.settle);
        }
        Ok(())
    }

    pub fn autoscale(&mut self) -> Result<(), TransportError> {
        self.port.send_command(scpi::AUTOSCALE)
    }

    /// Single acquisition of both channels followed by the five measurements.
    pub fn capture(&mut self) -> Result<MeasurementSample, TransportError> {
        // 单次触发，两个通道同时采集
        self.port.send_command(scpi::SINGLE)?;
        self.port.send_command(scpi::ACQUIRE_NORMAL)?;
        let acquire = self.port.send_query(scpi::QUERY_ACQUIRE_TYPE)?;
        self.port.send_command(scpi::DIGITIZE)?;
        self.port.send_command(scpi::MEASURE_SOURCE)?;
        let source = self.port.send_query(scpi::QUERY_MEASURE_SOURCE)?;
        debug!("acquire type {acquire}, measure source {source}");

        let sample = MeasurementSample {
            input_freq_hz: self.measure(scpi::SELECT_FREQ_CH1, scpi::QUERY_FREQ_CH1)?,
            input_ampl_vpp: self.measure(scpi::SELECT_VPP_CH1, scpi::QUERY_VPP_CH1)?,
            output_freq_hz: self.measure(scpi::SELECT_FREQ_CH2, scpi::QUERY_FREQ_CH2)?,
            output_ampl_vpp: self.measure(scpi::SELECT_VPP_CH2, scpi::QUERY_VPP_CH2)?,
            phase_diff_deg: self.measure(scpi::SELECT_PHASE, scpi::QUERY_PHASE)?,
        };
        debug!(
            "CH1 {:.3} Hz {:.3} Vpp | CH2 {:.3} Hz {:.3} Vpp | phase {:.3} deg",
            sample.input_freq_hz,
            sample.input_ampl_vpp,
            sample.output_freq_hz,
            sample.output_ampl_vpp,
            sample.phase_diff_deg
        );
        Ok(sample)
    }

    /// Program, auto-scale, then capture at `target_freq_hz`.
    pub fn execute(&mut self, target_freq_hz: f64) -> Result<MeasurementSample, TransportError> {
        self.program_generator(target_freq_hz)?;
        self.autoscale()?;
        self.capture()
    }

    /// Switches the generator output off. Safe to call more than once.
    pub fn release(&mut self) -> Result<(), TransportError> {
        if self.programmed {
            self.programmed = false;
            self.port.send_command(scpi::WGEN_OUTPUT_OFF)?;
        }
        Ok(())
    }

    fn measure(&mut self, select: &str, query: &str) -> Result<f64, TransportError> {
        self.port.send_command(select)?;
        self.port.query_number(query)
    }
}

impl<P: MeasurementPort> Drop for SweepStepExecutor<P> {
    fn drop(&mut self) {
        let _ = self.release();
    }
}

pub(crate) fn pause(duration: Duration) {
    if !duration.is_zero() {
        thread::sleep(duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::port::ManualPort;

    fn reading() -> MeasurementSample {
        MeasurementSample {
            input_freq_hz: 1000.0,
            input_ampl_vpp: 1.02,
            output_freq_hz: 1000.0,
            output_ampl_vpp: 0.71,
            phase_diff_deg: -45.0,
        }
    }

    #[test]
    fn execute_programs_then_autoscales_then_measures() {
        let mut exec =
            SweepStepExecutor::new(ManualPort::new([reading()]), GeneratorSettings::default(), Duration::ZERO);
        let sample = exec.execute(1000.0).unwrap();
        assert_eq!(sample, reading());
        let log = exec.port().log();
        let pos = |cmd: &str| log.iter().position(|l| l == cmd).unwrap();
        assert!(log.contains(&":WGEN:FREQuency 1000.000".to_string()));
        assert!(log.contains(&":WGEN:VOLTage 1.000".to_string()));
        assert!(pos(":WGEN:FREQuency 1000.000") < pos(scpi::AUTOSCALE));
        assert!(pos(scpi::AUTOSCALE) < pos(scpi::DIGITIZE));
        assert!(pos(scpi::DIGITIZE) < pos(scpi::QUERY_FREQ_CH1));
        assert!(pos(scpi::SELECT_PHASE) < pos(scpi::QUERY_PHASE));
    }

    #[test]
    fn transport_errors_pass_through_unchanged() {
        let port = ManualPort::new([reading()]).fail_on(":AUToscale");
        let mut exec = SweepStepExecutor::new(port, GeneratorSettings::default(), Duration::ZERO);
        let err = exec.execute(1000.0).unwrap_err();
        assert_eq!(err.command, scpi::AUTOSCALE);
        assert!(!exec.port().log().iter().any(|l| l == scpi::DIGITIZE));
    }

    #[test]
    fn release_turns_generator_off_once() {
        let mut exec =
            SweepStepExecutor::new(ManualPort::new([reading()]), GeneratorSettings::default(), Duration::ZERO);
        exec.program_generator(200.0).unwrap();
        exec.release().unwrap();
        exec.release().unwrap();
        let offs = exec
            .port()
            .log()
            .iter()
            .filter(|l| l.as_str() == scpi::WGEN_OUTPUT_OFF)
            .count();
        assert_eq!(offs, 1);
    }

    #[test]
    fn initialize_identifies_and_resets() {
        let mut exec =
            SweepStepExecutor::new(ManualPort::new([]), GeneratorSettings::default(), Duration::ZERO);
        let idn = exec.initialize(Duration::ZERO).unwrap();
        assert!(idn.starts_with("MANUAL"));
        assert_eq!(exec.port().log(), &["*IDN?", "*CLS", "*RST"]);
    }
}
