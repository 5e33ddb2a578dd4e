//! A scripted SourceMeter that answers the commands this crate sends.

use super::Mock;
use crate::block::encode_definite_block;
use std::collections::VecDeque;

/// The identity reported by default.
const DEFAULT_IDENTITY: &str = "KEITHLEY INSTRUMENTS,MODEL 2450,04400000,1.7.12b";
/// The record returned when the event log is empty.
const NO_ERROR: &str = "0,\"No error;0;0000/00/00 00:00:00.000\"";

/// A simulated SourceMeter, for driving a [`Session`](crate::session::Session)
/// over a [`Mock`] backend in tests.
///
/// The simulated device has a resistor connected to its terminals. Sweeps
/// produce source levels spaced exactly as the `LINEAR` sweep command asks,
/// and readings that follow Ohm's law.
///
/// Queries that the simulator does not recognize, or that it was told to
/// ignore, go unanswered.
///
/// ## Example
///
/// ```rust
/// # use sourcemeter::backend::SimulatedSourceMeter;
/// let mock = SimulatedSourceMeter::new()
///     .resistance(1_000.0)
///     .into_mock();
/// ```
#[derive(Debug, Clone)]
pub struct SimulatedSourceMeter {
    identity: String,
    resistance: f64,
    status_byte: u8,
    events: VecDeque<String>,
    reported_count: Option<usize>,
    ignored: Vec<String>,
    source_voltage: bool,
    sweep: Option<(f64, f64, usize, bool)>,
    buffer: Vec<(f64, f64)>,
}

impl SimulatedSourceMeter {
    /// Create an idle simulator with a 100 Ω resistor and an empty event log.
    pub fn new() -> Self {
        SimulatedSourceMeter {
            identity: DEFAULT_IDENTITY.to_string(),
            resistance: 100.0,
            status_byte: 0,
            events: VecDeque::new(),
            reported_count: None,
            ignored: Vec::new(),
            source_voltage: true,
            sweep: None,
            buffer: Vec::new(),
        }
    }

    /// Set the response to `*IDN?`.
    pub fn identity(mut self, identity: &str) -> Self {
        self.identity = identity.to_string();
        self
    }

    /// Set the resistance connected to the terminals.
    pub fn resistance(mut self, ohms: f64) -> Self {
        self.resistance = ohms;
        self
    }

    /// Set the value reported by `*STB?`. It is cleared by `*CLS` and `*RST`.
    pub fn status_byte(mut self, value: u8) -> Self {
        self.status_byte = value;
        self
    }

    /// Queue a record, of the form `<code>,"<description>;<category>;<timestamp>"`,
    /// in the event log.
    pub fn event(mut self, record: &str) -> Self {
        self.events.push_back(record.to_string());
        self
    }

    /// Report this many samples from `:TRACE:ACTUAL?`, regardless of how
    /// many were captured.
    pub fn reported_count(mut self, count: usize) -> Self {
        self.reported_count = Some(count);
        self
    }

    /// Never answer `query`.
    pub fn ignore(mut self, query: &str) -> Self {
        self.ignored.push(query.to_string());
        self
    }

    /// Create a [`Mock`] backend driven by this simulator.
    pub fn into_mock(mut self) -> Mock {
        Mock::with_responder(move |line| self.respond(line))
    }

    /// Produce the response, if any, to one line.
    pub fn respond(&mut self, line: &str) -> Option<Vec<u8>> {
        let line = line.trim();
        if self.ignored.iter().any(|ignored| ignored == line) {
            return None;
        }
        let upper = line.to_ascii_uppercase();
        let reply = match upper.as_str() {
            "*IDN?" => self.identity.clone(),
            "*OPC?" => "1".to_string(),
            "*STB?" => self.status_byte.to_string(),
            ":SYSTEM:EVENTLOG:NEXT?" => self
                .events
                .pop_front()
                .unwrap_or_else(|| NO_ERROR.to_string()),
            ":TRACE:ACTUAL?" => self
                .reported_count
                .unwrap_or(self.buffer.len())
                .to_string(),
            _ if upper.starts_with("TRACE:DATA?") || upper.starts_with(":TRACE:DATA?") => {
                return Some(self.trace_data(&upper));
            }
            _ => {
                self.execute(&upper);
                return None;
            }
        };
        Some(format!("{reply}\n").into_bytes())
    }

    /// Apply a command that has no response.
    fn execute(&mut self, command: &str) {
        match command {
            "*RST" => {
                *self = SimulatedSourceMeter {
                    identity: std::mem::take(&mut self.identity),
                    resistance: self.resistance,
                    events: std::mem::take(&mut self.events),
                    reported_count: self.reported_count,
                    ignored: std::mem::take(&mut self.ignored),
                    ..SimulatedSourceMeter::new()
                };
            }
            "*CLS" => {
                self.status_byte = 0;
                self.events.clear();
            }
            ":SYSTEM:CLEAR" => self.events.clear(),
            ":TRACE:CLEAR" => self.buffer.clear(),
            ":SOURCE1:FUNCTION VOLTAGE" => self.source_voltage = true,
            ":SOURCE1:FUNCTION CURRENT" => self.source_voltage = false,
            ":INITIATE:IMMEDIATE" => self.run_sweep(),
            _ => {
                if let Some((_, args)) = command.split_once(":LINEAR ") {
                    self.sweep = parse_linear(args);
                }
            }
        }
    }

    /// Fill the buffer with the configured sweep.
    fn run_sweep(&mut self) {
        let Some((start, end, points, dual)) = self.sweep else {
            return;
        };
        let step = (end - start) / (points - 1) as f64;
        let mut levels: Vec<f64> = (0..points).map(|i| start + step * i as f64).collect();
        if dual {
            let reverse: Vec<f64> = levels.iter().rev().skip(1).copied().collect();
            levels.extend(reverse);
        }
        let resistance = self.resistance;
        let source_voltage = self.source_voltage;
        self.buffer.extend(levels.into_iter().map(|level| {
            let reading = if source_voltage {
                level / resistance
            } else {
                level * resistance
            };
            (level, reading)
        }));
    }

    /// Encode the requested span of the buffer as `source, reading` pairs.
    fn trace_data(&self, query: &str) -> Vec<u8> {
        let mut args = query
            .split_once('?')
            .map_or("", |(_, args)| args)
            .split(',')
            .map(str::trim);
        let first = args.next().and_then(|a| a.parse::<usize>().ok()).unwrap_or(1);
        let last = args
            .next()
            .and_then(|a| a.parse::<usize>().ok())
            .unwrap_or(self.buffer.len());
        let values: Vec<f64> = self
            .buffer
            .iter()
            .skip(first.saturating_sub(1))
            .take((last + 1).saturating_sub(first))
            .flat_map(|&(source, reading)| [source, reading])
            .collect();
        let mut response = encode_definite_block(&values);
        response.push(b'\n');
        response
    }
}

impl Default for SimulatedSourceMeter {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse the arguments of a `LINEAR` sweep command.
fn parse_linear(args: &str) -> Option<(f64, f64, usize, bool)> {
    let args: Vec<&str> = args.split(',').map(str::trim).collect();
    let start = args.first()?.parse().ok()?;
    let end = args.get(1)?.parse().ok()?;
    let points = args.get(2)?.parse().ok().filter(|&n| n >= 2)?;
    let dual = args.get(7).is_some_and(|&dual| dual == "ON");
    Some((start, end, points, dual))
}
