//! Software stand-in for the oscilloscope + waveform generator.
//!
//! Speaks the same SCPI lines as the real instrument (long-form headers only),
//! keeps an error queue for `:SYSTem:ERRor?`, and measures a first-order
//! low-pass circuit wired between generator output (CH1) and CH2:
//! `|H| = G / sqrt(1 + (f/fc)^2)`, `phase = -atan(f/fc)`.
//!
//! Faults can be injected to exercise the sweep policy: mis-triggered
//! acquisitions (CH2 frequency reads double), unreadable signal above a
//! frequency (`9.9E+37` sentinel, as the real scope reports), and rejected
//! commands (non-zero error code in the queue).
use std::collections::{HashSet, VecDeque};
use std::io;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::drivers::port::ScpiLink;
use crate::types::MeasurementSample;

/// Value the instrument returns when a measurement cannot be made.
pub const INVALID_MEASUREMENT: f64 = 9.9e37;

const NO_ERROR: &str = "+0,\"No error\"";
const UNDEFINED_HEADER: &str = "-113,\"Undefined header\"";
const DATA_OUT_OF_RANGE: &str = "-222,\"Data out of range\"";

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LowPassCircuit {
    pub cutoff_hz: f64,
    pub passband_gain: f64,
}

impl LowPassCircuit {
    pub fn new(cutoff_hz: f64) -> Self {
        Self {
            cutoff_hz,
            passband_gain: 1.0,
        }
    }
    /// Amplitude ratio and phase (degrees) at `freq_hz`.
    pub fn response(&self, freq_hz: f64) -> (f64, f64) {
        let x = freq_hz / self.cutoff_hz;
        let ratio = self.passband_gain / (1.0 + x * x).sqrt();
        (ratio, -x.atan().to_degrees())
    }
}

struct Rejection {
    header: String,
    skip: usize,
    seen: usize,
}

pub struct SimulatedScope {
    circuit: LowPassCircuit,
    output_on: bool,
    generator_freq_hz: f64,
    generator_ampl_vpp: f64,
    generator_offset_v: f64,
    noise: f64,
    rng: StdRng,
    acquisitions: u64,
    mistriggers: HashSet<u64>,
    unreadable_above_hz: Option<f64>,
    rejections: Vec<Rejection>,
    measured: Option<MeasurementSample>,
    replies: VecDeque<String>,
    errors: VecDeque<String>,
    history: Vec<String>,
}

impl SimulatedScope {
    pub fn new(circuit: LowPassCircuit) -> Self {
        Self {
            circuit,
            output_on: false,
            generator_freq_hz: 1000.0,
            generator_ampl_vpp: 0.5,
            generator_offset_v: 0.0,
            noise: 0.0,
            rng: StdRng::seed_from_u64(0x5eed),
            acquisitions: 0,
            mistriggers: HashSet::new(),
            unreadable_above_hz: None,
            rejections: Vec::new(),
            measured: None,
            replies: VecDeque::new(),
            errors: VecDeque::new(),
            history: Vec::new(),
        }
    }

    /// Relative amplitude/frequency jitter, uniformly distributed in `±fraction`.
    /// A non-finite fraction means no jitter.
    pub fn with_noise(mut self, fraction: f64, seed: u64) -> Self {
        self.noise = if fraction.is_finite() { fraction.abs() } else { 0.0 };
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Acquisitions (1-based, counting every `:DIGitize`) on which CH2 reads twice the drive frequency.
    pub fn with_mistriggers(mut self, acquisitions: impl IntoIterator<Item = u64>) -> Self {
        self.mistriggers.extend(acquisitions);
        self
    }

    /// CH1 reads the invalid-measurement sentinel when driven above `freq_hz`.
    pub fn unreadable_above(mut self, freq_hz: f64) -> Self {
        self.unreadable_above_hz = Some(freq_hz);
        self
    }

    /// Accept `skip` commands with this header, then answer every later one with an error code.
    pub fn rejecting(mut self, header: &str, skip: usize) -> Self {
        self.rejections.push(Rejection {
            header: header.to_ascii_uppercase(),
            skip,
            seen: 0,
        });
        self
    }

    pub fn acquisitions(&self) -> u64 {
        self.acquisitions
    }

    pub fn output_on(&self) -> bool {
        self.output_on
    }

    /// Programmed generator frequency, amplitude and DC offset.
    pub fn generator(&self) -> (f64, f64, f64) {
        (
            self.generator_freq_hz,
            self.generator_ampl_vpp,
            self.generator_offset_v,
        )
    }

    pub fn history(&self) -> &[String] {
        &self.history
    }

    fn handle(&mut self, line: &str) {
        let (header, args) = match line.split_once(char::is_whitespace) {
            Some((h, a)) => (h.to_ascii_uppercase(), a.trim()),
            None => (line.to_ascii_uppercase(), ""),
        };
        if header != ":SYSTEM:ERROR?" && self.rejected(&header) {
            self.errors.push_back(DATA_OUT_OF_RANGE.into());
            return;
        }
        match header.as_str() {
            "*IDN?" => self.reply("AGILENT TECHNOLOGIES,DSO-X 3012A,SIM00000,02.41".into()),
            "*CLS" => self.errors.clear(),
            "*RST" => {
                self.output_on = false;
                self.generator_freq_hz = 1000.0;
                self.generator_ampl_vpp = 0.5;
                self.generator_offset_v = 0.0;
                self.measured = None;
            }
            ":SYSTEM:ERROR?" => {
                let entry = self.errors.pop_front().unwrap_or_else(|| NO_ERROR.into());
                self.reply(entry);
            }
            ":WGEN:OUTPUT" => match args {
                "1" | "ON" => self.output_on = true,
                "0" | "OFF" => self.output_on = false,
                _ => self.errors.push_back(DATA_OUT_OF_RANGE.into()),
            },
            ":WGEN:FUNCTION" => {
                if !args.eq_ignore_ascii_case("SIN") && !args.eq_ignore_ascii_case("SINUSOID") {
                    self.errors.push_back(DATA_OUT_OF_RANGE.into());
                }
            }
            ":WGEN:VOLTAGE" => self.set_number(args, |s, v| s.generator_ampl_vpp = v),
            ":WGEN:VOLTAGE:OFFSET" => self.set_number(args, |s, v| s.generator_offset_v = v),
            ":WGEN:FREQUENCY" => self.set_number(args, |s, v| s.generator_freq_hz = v),
            ":AUTOSCALE" | ":SINGLE" | ":ACQUIRE:TYPE" | ":MEASURE:SOURCE" | ":MEASURE:FREQUENCY"
            | ":MEASURE:VPP" | ":MEASURE:PHASE" => {}
            ":ACQUIRE:TYPE?" => self.reply("NORM".into()),
            ":MEASURE:SOURCE?" => self.reply("CHAN1,CHAN2".into()),
            ":DIGITIZE" => self.acquire(),
            ":MEASURE:FREQUENCY?" => {
                let value = self.channel_value(args, |m| m.input_freq_hz, |m| m.output_freq_hz);
                self.reply_number(value);
            }
            ":MEASURE:VPP?" => {
                let value = self.channel_value(args, |m| m.input_ampl_vpp, |m| m.output_ampl_vpp);
                self.reply_number(value);
            }
            ":MEASURE:PHASE?" => {
                let value = self
                    .measured
                    .map(|m| m.phase_diff_deg)
                    .unwrap_or(INVALID_MEASUREMENT);
                self.reply_number(value);
            }
            _ => self.errors.push_back(UNDEFINED_HEADER.into()),
        }
    }

    fn rejected(&mut self, header: &str) -> bool {
        for rule in self.rejections.iter_mut().filter(|r| r.header == header) {
            rule.seen += 1;
            if rule.seen > rule.skip {
                return true;
            }
        }
        false
    }

    fn set_number(&mut self, args: &str, apply: impl FnOnce(&mut Self, f64)) {
        match args.parse::<f64>() {
            Ok(value) => apply(self, value),
            Err(_) => self.errors.push_back(DATA_OUT_OF_RANGE.into()),
        }
    }

    fn acquire(&mut self) {
        // 发生器未开启时，示波器只能返回无效值
        self.acquisitions += 1;
        if !self.output_on {
            self.measured = Some(MeasurementSample {
                input_freq_hz: INVALID_MEASUREMENT,
                input_ampl_vpp: INVALID_MEASUREMENT,
                output_freq_hz: INVALID_MEASUREMENT,
                output_ampl_vpp: INVALID_MEASUREMENT,
                phase_diff_deg: INVALID_MEASUREMENT,
            });
            return;
        }
        let f = self.generator_freq_hz;
        let (ratio, phase) = self.circuit.response(f);
        let mut sample = MeasurementSample {
            input_freq_hz: f * self.jitter(),
            input_ampl_vpp: self.generator_ampl_vpp * self.jitter(),
            output_freq_hz: f * self.jitter(),
            output_ampl_vpp: self.generator_ampl_vpp * ratio * self.jitter(),
            phase_diff_deg: phase * self.jitter(),
        };
        if self.mistriggers.contains(&self.acquisitions) {
            sample.output_freq_hz = 2.0 * f;
        }
        if self.unreadable_above_hz.is_some_and(|limit| f > limit) {
            sample.input_freq_hz = INVALID_MEASUREMENT;
            sample.input_ampl_vpp = INVALID_MEASUREMENT;
        }
        self.measured = Some(sample);
    }

    fn jitter(&mut self) -> f64 {
        if self.noise == 0.0 {
            1.0
        } else {
            1.0 + self.rng.gen_range(-self.noise..=self.noise)
        }
    }

    fn channel_value(
        &mut self,
        args: &str,
        ch1: impl Fn(&MeasurementSample) -> f64,
        ch2: impl Fn(&MeasurementSample) -> f64,
    ) -> f64 {
        let Some(measured) = self.measured else {
            return INVALID_MEASUREMENT;
        };
        match args.to_ascii_uppercase().as_str() {
            "CHANNEL1" => ch1(&measured),
            "CHANNEL2" => ch2(&measured),
            _ => {
                self.errors.push_back(DATA_OUT_OF_RANGE.into());
                INVALID_MEASUREMENT
            }
        }
    }

    fn reply(&mut self, text: String) {
        self.replies.push_back(text);
    }

    fn reply_number(&mut self, value: f64) {
        self.reply(format!("{value:+.6E}"));
    }
}

impl ScpiLink for SimulatedScope {
    fn write_line(&mut self, line: &str) -> io::Result<()> {
        let line = line.trim();
        self.history.push(line.to_string());
        self.handle(line);
        Ok(())
    }

    fn read_line(&mut self) -> io::Result<String> {
        self.replies
            .pop_front()
            .map(|r| r + "\n")
            .ok_or_else(|| io::Error::new(io::ErrorKind::TimedOut, "query timed out"))
    }
}
