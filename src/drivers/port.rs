use std::collections::VecDeque;
use std::io;

use log::{debug, trace};

use crate::drivers::error::TransportError;
use crate::drivers::executor::scpi;
use crate::types::MeasurementSample;

const ERROR_QUERY: &str = ":SYSTem:ERRor?";

/// Command/query channel to the instrument. Every call is checked against the
/// instrument's error queue before it returns.
pub trait MeasurementPort {
    fn send_command(&mut self, command: &str) -> Result<(), TransportError>;
    fn send_query(&mut self, query: &str) -> Result<String, TransportError>;

    fn query_number(&mut self, query: &str) -> Result<f64, TransportError> {
        let reply = self.send_query(query)?;
        parse_number(&reply, query)
    }

    /// Replies like `1.0,2.5;3` are split on both separators.
    fn query_numbers(&mut self, query: &str) -> Result<Vec<f64>, TransportError> {
        let reply = self.send_query(query)?;
        reply
            .split([',', ';'])
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| parse_number(s, query))
            .collect()
    }
}

impl<P: MeasurementPort + ?Sized> MeasurementPort for Box<P> {
    fn send_command(&mut self, command: &str) -> Result<(), TransportError> {
        (**self).send_command(command)
    }
    fn send_query(&mut self, query: &str) -> Result<String, TransportError> {
        (**self).send_query(query)
    }
}

fn parse_number(reply: &str, query: &str) -> Result<f64, TransportError> {
    reply
        .trim()
        .parse::<f64>()
        .map_err(|_| TransportError::new(format!("expected a number, got '{}'", reply.trim()), query))
}

/// Line-oriented byte transport underneath an SCPI session.
pub trait ScpiLink {
    fn write_line(&mut self, line: &str) -> io::Result<()>;
    fn read_line(&mut self) -> io::Result<String>;
}

/// SCPI session over any [`ScpiLink`]: every command and query is followed by
/// `:SYSTem:ERRor?`, and a non-zero code becomes a [`TransportError`].
pub struct ScpiPort<L: ScpiLink> {
    link: L,
}

impl<L: ScpiLink> ScpiPort<L> {
    pub fn new(link: L) -> Self {
        Self { link }
    }
    pub fn link(&self) -> &L {
        &self.link
    }
    pub fn into_link(self) -> L {
        self.link
    }
    fn check_instrument_errors(&mut self, command: &str) -> Result<(), TransportError> {
        self.link
            .write_line(ERROR_QUERY)
            .map_err(|e| TransportError::io(command, e))?;
        let reply = self
            .link
            .read_line()
            .map_err(|e| TransportError::io(command, e))?;
        let reply = reply.trim();
        trace!("{ERROR_QUERY} -> {reply}");
        if reply.is_empty() {
            return Err(TransportError::new(
                format!("{ERROR_QUERY} returned nothing"),
                command,
            ));
        }
        match error_code(reply) {
            Some(0) => Ok(()),
            _ => Err(TransportError::new(reply, command)),
        }
    }
}

/// Leading integer of an error-queue entry such as `+0,"No error"`.
fn error_code(reply: &str) -> Option<i32> {
    reply.split(',').next()?.trim().parse().ok()
}

impl<L: ScpiLink> MeasurementPort for ScpiPort<L> {
    fn send_command(&mut self, command: &str) -> Result<(), TransportError> {
        debug!("> {command}");
        self.link
            .write_line(command)
            .map_err(|e| TransportError::io(command, e))?;
        self.check_instrument_errors(command)
    }
    fn send_query(&mut self, query: &str) -> Result<String, TransportError> {
        self.link
            .write_line(query)
            .map_err(|e| TransportError::io(query, e))?;
        let reply = self
            .link
            .read_line()
            .map_err(|e| TransportError::io(query, e))?;
        self.check_instrument_errors(query)?;
        let reply = reply.trim().to_string();
        debug!("> {query} -> {reply}");
        Ok(reply)
    }
}

/// In-memory port that plays back prepared readings, one per acquisition.
/// Useful for tests and deterministic replays.
#[derive(Default)]
pub struct ManualPort {
    readings: VecDeque<MeasurementSample>,
    current: Option<MeasurementSample>,
    fail_prefix: Option<String>,
    log: Vec<String>,
}

impl ManualPort {
    pub fn new(readings: impl IntoIterator<Item = MeasurementSample>) -> Self {
        Self {
            readings: readings.into_iter().collect(),
            ..Self::default()
        }
    }
    /// Any command starting with `prefix` is answered with an instrument error.
    pub fn fail_on(mut self, prefix: impl Into<String>) -> Self {
        self.fail_prefix = Some(prefix.into());
        self
    }
    /// Every command and query seen so far, in order.
    pub fn log(&self) -> &[String] {
        &self.log
    }
    pub fn remaining(&self) -> usize {
        self.readings.len()
    }
    fn record(&mut self, line: &str) -> Result<(), TransportError> {
        self.log.push(line.to_string());
        match &self.fail_prefix {
            Some(prefix) if line.starts_with(prefix.as_str()) => Err(TransportError::new(
                "-222,\"Data out of range\"",
                line,
            )),
            _ => Ok(()),
        }
    }
    fn current(&self, query: &str) -> Result<&MeasurementSample, TransportError> {
        self.current
            .as_ref()
            .ok_or_else(|| TransportError::new("no acquisition has been digitized", query))
    }
}

impl MeasurementPort for ManualPort {
    fn send_command(&mut self, command: &str) -> Result<(), TransportError> {
        self.record(command)?;
        if command.starts_with(scpi::DIGITIZE) {
            let next = self
                .readings
                .pop_front()
                .ok_or_else(|| TransportError::new("no more prepared readings", command))?;
            self.current = Some(next);
        }
        Ok(())
    }
    fn send_query(&mut self, query: &str) -> Result<String, TransportError> {
        self.record(query)?;
        let value = match query {
            scpi::QUERY_IDN => return Ok("MANUAL,PLAYBACK,0,0".into()),
            scpi::QUERY_ACQUIRE_TYPE => return Ok("NORM".into()),
            scpi::QUERY_MEASURE_SOURCE => return Ok("CHAN1,CHAN2".into()),
            scpi::QUERY_FREQ_CH1 => self.current(query)?.input_freq_hz,
            scpi::QUERY_VPP_CH1 => self.current(query)?.input_ampl_vpp,
            scpi::QUERY_FREQ_CH2 => self.current(query)?.output_freq_hz,
            scpi::QUERY_VPP_CH2 => self.current(query)?.output_ampl_vpp,
            scpi::QUERY_PHASE => self.current(query)?.phase_diff_deg,
            _ => {
                return Err(TransportError::new(
                    "-113,\"Undefined header\"",
                    query,
                ))
            }
        };
        Ok(format!("{value:E}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Link that answers from a fixed script and records what was written.
    struct ScriptedLink {
        replies: VecDeque<String>,
        written: Vec<String>,
    }
    impl ScriptedLink {
        fn new(replies: &[&str]) -> Self {
            Self {
                replies: replies.iter().map(|s| s.to_string()).collect(),
                written: Vec::new(),
            }
        }
    }
    impl ScpiLink for ScriptedLink {
        fn write_line(&mut self, line: &str) -> io::Result<()> {
            self.written.push(line.to_string());
            Ok(())
        }
        fn read_line(&mut self) -> io::Result<String> {
            self.replies
                .pop_front()
                .ok_or_else(|| io::Error::new(io::ErrorKind::TimedOut, "read timed out"))
        }
    }

    #[test]
    fn every_command_is_followed_by_error_check() {
        let mut port = ScpiPort::new(ScriptedLink::new(&["+0,\"No error\"\n"]));
        port.send_command(":AUToscale").unwrap();
        assert_eq!(port.link().written, vec![":AUToscale", ERROR_QUERY]);
    }

    #[test]
    fn query_reply_is_parsed_after_error_check() {
        let mut port = ScpiPort::new(ScriptedLink::new(&["+1.00000E+03\n", "+0,\"No error\"\n"]));
        let value = port.query_number(":MEASure:FREQuency? CHANnel1").unwrap();
        assert_eq!(value, 1000.0);
        assert_eq!(port.link().written.len(), 2);
    }

    #[test]
    fn instrument_error_code_names_offending_command() {
        let mut port = ScpiPort::new(ScriptedLink::new(&["-113,\"Undefined header\"\n"]));
        let err = port.send_command(":BOGus").unwrap_err();
        assert_eq!(err.command, ":BOGus");
        assert!(err.message.contains("Undefined header"));
    }

    #[test]
    fn empty_error_reply_is_fatal() {
        let mut port = ScpiPort::new(ScriptedLink::new(&["\n"]));
        let err = port.send_command("*CLS").unwrap_err();
        assert!(err.message.contains("returned nothing"));
    }

    #[test]
    fn read_timeout_becomes_transport_error() {
        let mut port = ScpiPort::new(ScriptedLink::new(&[]));
        let err = port.send_query("*IDN?").unwrap_err();
        assert_eq!(err.command, "*IDN?");
        assert!(err.message.contains("timed out"));
    }

    #[test]
    fn number_lists_accept_both_separators() {
        let mut port = ScpiPort::new(ScriptedLink::new(&["1.5,2.5;3\n", "+0,\"No error\"\n"]));
        assert_eq!(port.query_numbers(":WAVeform:DATA?").unwrap(), vec![1.5, 2.5, 3.0]);
    }

    #[test]
    fn manual_port_plays_back_per_acquisition() {
        let sample = MeasurementSample {
            input_freq_hz: 500.0,
            input_ampl_vpp: 1.0,
            output_freq_hz: 500.0,
            output_ampl_vpp: 0.5,
            phase_diff_deg: -12.5,
        };
        let mut port = ManualPort::new([sample]);
        assert!(port.query_number(scpi::QUERY_FREQ_CH1).is_err());
        port.send_command(scpi::DIGITIZE).unwrap();
        assert_eq!(port.query_number(scpi::QUERY_FREQ_CH1).unwrap(), 500.0);
        assert_eq!(port.query_number(scpi::QUERY_PHASE).unwrap(), -12.5);
        assert!(port.send_command(scpi::DIGITIZE).is_err());
    }
}
