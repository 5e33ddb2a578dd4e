use super::*;
use crate::{
    backend::{Mock, SimulatedSourceMeter},
    block::encode_definite_block,
    error::*,
    session::Session,
};

/// Create a session over a simulated instrument with a short timeout.
fn simulated(sim: SimulatedSourceMeter) -> Session<Mock> {
    let mut session = Session::open_mock(sim.into_mock());
    session.set_timeout(Duration::from_millis(100));
    session
}

fn written(session: &Session<Mock>) -> Vec<String> {
    session.backend().written_lines()
}

fn assert_close(actual: &[f64], expected: &[f64]) {
    assert_eq!(actual.len(), expected.len(), "{actual:?} != {expected:?}");
    for (a, e) in actual.iter().zip(expected) {
        assert!((a - e).abs() < 1e-12, "{actual:?} != {expected:?}");
    }
}

#[test]
fn four_wire_sweep_end_to_end() {
    let mut session = simulated(SimulatedSourceMeter::new().resistance(50.0));
    let mut params = SweepParameters::voltage(-1.0, -0.5, 21);
    params.four_wire(true);

    configure(&mut session, &params).unwrap();
    trigger(&mut session).unwrap();
    let result = fetch(&mut session, &params).unwrap();

    let forward = result.forward();
    assert_eq!(forward.len(), 21);
    assert!(result.reverse().is_none());
    assert_eq!(result.samples(), 21);
    for pair in forward.source().windows(2) {
        assert!(pair[1] > pair[0]);
        assert!((pair[1] - pair[0] - 0.025).abs() < 1e-9, "{pair:?}");
    }
    assert!((forward.source()[0] + 1.0).abs() < 1e-12);
    assert!((forward.source()[20] + 0.5).abs() < 1e-9);
    for (v, i) in forward.iter() {
        assert!((i - v / 50.0).abs() < 1e-12);
    }

    let lines = written(&session);
    assert!(lines.iter().any(|line| line == ":SENSE1:CURRENT:RSENSE ON"));
    assert!(lines
        .iter()
        .any(|line| line == ":SOURCE1:SWEEP:VOLTAGE:LINEAR -1, -0.5, 21, -1, 1, BEST, OFF, OFF, \"defbuffer1\""));
    assert!(lines
        .iter()
        .any(|line| line == "TRACE:DATA? 1, 21, \"defbuffer1\", SOUR, READ"));
    assert_eq!(lines.last().map(String::as_str), Some(":TRACE:CLEAR"));
}

#[test]
fn configure_sends_commands_in_order() {
    let mut session = simulated(SimulatedSourceMeter::new());
    let mut params = SweepParameters::voltage(-0.003, 0.002, 101);
    params
        .limit(0.01)
        .step_delay(StepDelay::Seconds(0.005))
        .nplc(0.1)
        .auto_zero(false)
        .readback(false)
        .range_mode(RangeMode::Fixed)
        .abort_on_limit(true);

    configure(&mut session, &params).unwrap();

    assert_eq!(
        written(&session),
        [
            ":TRACE:CLEAR",
            ":SOURCE1:FUNCTION VOLTAGE",
            ":SOURCE1:VOLTAGE:RANGE 0.003",
            ":SOURCE1:VOLTAGE:ILIMIT 0.01",
            ":SENSE1:FUNCTION \"CURRENT\"",
            ":SENSE1:CURRENT:RANGE 0.01",
            ":SENSE1:CURRENT:RSENSE OFF",
            ":ROUTE:TERMINALS FRONT",
            ":SOURCE1:VOLTAGE:LEVEL:IMMEDIATE:AMPLITUDE -0.003",
            ":SENSE1:AZERO:ONCE",
            ":SENSE1:CURRENT:AZERO OFF",
            "*WAI",
            "*OPC?",
            ":SENSE1:CURRENT:NPLC 0.1",
            ":SOURCE1:VOLTAGE:READ:BACK OFF",
            ":OUTPUT1:STATE ON",
            "*WAI",
            "*OPC?",
            "*STB?",
            ":SOURCE1:SWEEP:VOLTAGE:LINEAR -0.003, 0.002, 101, 0.005, 1, FIXED, ON, OFF, \"defbuffer1\"",
            "*STB?",
        ]
    );
    assert_eq!(session.timeout(), Duration::from_millis(100));
}

#[test]
fn configure_current_sweep_limits_voltage() {
    let mut session = simulated(SimulatedSourceMeter::new());
    let params = SweepParameters::current(0.0, 1e-3, 11);

    configure(&mut session, &params).unwrap();

    let lines = written(&session);
    assert_eq!(lines[0], ":TRACE:CLEAR");
    assert_eq!(lines[1], ":SOURCE1:FUNCTION CURRENT");
    assert!(lines.iter().any(|line| line == ":SOURCE1:CURRENT:VLIMIT 2"));
    assert!(lines.iter().any(|line| line == ":SENSE1:FUNCTION \"VOLTAGE\""));
    assert!(lines.iter().any(|line| line == ":SENSE1:VOLTAGE:AZERO ON"));
    assert!(!lines.iter().any(|line| line.contains("READ:BACK")));
}

#[test]
fn invalid_parameters_send_nothing() {
    let mut session = simulated(SimulatedSourceMeter::new());
    let params = SweepParameters::voltage(0.5, 0.5, 11);

    let err = configure(&mut session, &params).unwrap_err();

    assert!(matches!(err, Error::InvalidParameter(_)), "{err}");
    assert!(written(&session).is_empty());
}

#[test]
fn validation() {
    assert!(SweepParameters::voltage(-1.0, 1.0, 2).validate().is_ok());
    assert!(SweepParameters::voltage(1.0, 1.0, 11).validate().is_err());
    assert!(SweepParameters::voltage(-1.0, 1.0, 1).validate().is_err());
    assert!(SweepParameters::voltage(f64::NAN, 1.0, 11).validate().is_err());
    assert!(SweepParameters::voltage(-1.0, 1.0, 11).limit(0.0).validate().is_err());
    assert!(SweepParameters::voltage(-1.0, 1.0, 11).nplc(-1.0).validate().is_err());
    assert!(SweepParameters::voltage(-1.0, 1.0, 11)
        .step_delay(StepDelay::Seconds(-0.1))
        .validate()
        .is_err());
    assert!(SweepParameters::voltage(-1.0, 1.0, 11)
        .step_delay(StepDelay::Seconds(f64::INFINITY))
        .validate()
        .is_err());
}

#[test]
fn expected_samples_and_reversal() {
    let mut params = SweepParameters::voltage(-1.0, 2.0, 101);
    assert_eq!(params.expected_samples(), 101);
    params.mode(SweepMode::DualDirection);
    assert_eq!(params.expected_samples(), 201);
    params.mode(SweepMode::ResistanceProbe);
    assert_eq!(params.expected_samples(), 101);

    let reversed = params.reversed();
    assert_eq!(reversed.start(), 2.0);
    assert_eq!(reversed.end(), -1.0);
    assert_eq!(reversed.points(), 101);
    assert_eq!(reversed.get_mode(), SweepMode::ResistanceProbe);
}

#[test]
fn estimate_with_automatic_delay() {
    let estimator = TimeoutEstimator::new();
    // 500 ms + 101 * (1 / 50 Hz * 4)
    assert_eq!(
        estimator.estimate(101, StepDelay::Auto, 1.0),
        Duration::from_millis(8580)
    );
    assert_eq!(
        estimator.estimate(101, StepDelay::Seconds(0.01), 1.0),
        Duration::from_millis(9590)
    );
    assert_eq!(
        estimator.estimate(0, StepDelay::Auto, 1.0),
        Duration::from_millis(500)
    );
    assert_eq!(
        SweepParameters::voltage(-1.0, 1.0, 101).timeout_estimate(),
        Duration::from_millis(8580)
    );
}

#[test]
fn estimate_is_monotonic() {
    let estimator = TimeoutEstimator::default();
    let delays = [0.0, 0.001, 0.01, 0.5];
    let nplcs = [0.01, 0.1, 1.0, 10.0];
    for n in [1, 2, 10, 101, 1000] {
        for &delay in &delays {
            for &nplc in &nplcs {
                let base = estimator.estimate(n, StepDelay::Seconds(delay), nplc);
                assert!(estimator.estimate(n + 1, StepDelay::Seconds(delay), nplc) >= base);
                assert!(estimator.estimate(n, StepDelay::Seconds(delay * 2.0 + 0.001), nplc) >= base);
                assert!(estimator.estimate(n, StepDelay::Seconds(delay), nplc * 2.0) >= base);
            }
        }
        assert_eq!(
            estimator.estimate(n, StepDelay::Auto, 1.0),
            estimator.estimate(n, StepDelay::Seconds(0.0), 1.0)
        );
    }
}

#[test]
fn estimator_settings() {
    let mut estimator = TimeoutEstimator::new();
    estimator
        .line_frequency_hz(60.0)
        .fudge_factor(1.0)
        .setup_overhead(Duration::ZERO);
    assert!((estimator.measurement_time(6.0) - 0.1).abs() < 1e-12);
    assert_eq!(
        estimator.estimate(10, StepDelay::Auto, 6.0),
        Duration::from_millis(1000)
    );
}

#[test]
fn mismatched_count_reports_both_counts() {
    let mut session = simulated(
        SimulatedSourceMeter::new()
            .reported_count(99)
            .event("-113,\"Undefined header;1;2024/05/01 12:00:00.000\""),
    );
    let params = SweepParameters::voltage(-0.003, 0.003, 101);

    let err = run(&mut session, &params).unwrap_err();

    let err = MismatchedCountError::try_from(err).unwrap();
    assert_eq!(err.expected(), 101);
    assert_eq!(err.actual(), 99);
    assert_eq!(err.events().len(), 1);
    assert_eq!(err.events()[0].code(), -113);
    let lines = written(&session);
    assert!(!lines.iter().any(|line| line.starts_with("TRACE:DATA?")));
    assert_eq!(lines.last().map(String::as_str), Some(":TRACE:CLEAR"));
}

#[test]
fn odd_value_count_is_reported_in_samples() {
    let mut block = encode_definite_block(&[0.0, 0.0, 1.0, 0.01, 2.0]);
    block.push(b'\n');
    let mock = Mock::with_responder(move |line| match line {
        "*OPC?" => Some(b"1\n".to_vec()),
        ":TRACE:ACTUAL?" => Some(b"3\n".to_vec()),
        ":SYSTEM:EVENTLOG:NEXT?" => {
            Some(b"0,\"No error;0;0000/00/00 00:00:00.000\"\n".to_vec())
        }
        _ if line.starts_with("TRACE:DATA?") => Some(block.clone()),
        _ => None,
    });
    let mut session = Session::open_mock(mock);
    session.set_timeout(Duration::from_millis(100));
    let params = SweepParameters::voltage(0.0, 2.0, 3);

    let err = fetch(&mut session, &params).unwrap_err();

    let err = MismatchedCountError::try_from(err).unwrap();
    assert_eq!(err.expected(), 3);
    assert_eq!(err.actual(), 2);
    assert!(err.has_unpaired_value());
    assert!(err.to_string().contains("unpaired"), "{err}");
    assert_eq!(
        written(&session).last().map(String::as_str),
        Some(":TRACE:CLEAR")
    );
}

#[test]
fn sweep_after_an_abandoned_sweep() {
    let mut session = simulated(SimulatedSourceMeter::new());
    let params = SweepParameters::voltage(0.0, 1.0, 5);

    configure(&mut session, &params).unwrap();
    trigger(&mut session).unwrap();
    // The first sweep's samples are never fetched.
    let result = run(&mut session, &params).unwrap();

    assert_eq!(result.samples(), 5);
    assert_close(result.forward().source(), &[0.0, 0.25, 0.5, 0.75, 1.0]);
}

#[test]
fn dual_direction_shares_the_vertex() {
    let mut session = simulated(SimulatedSourceMeter::new());
    let mut params = SweepParameters::voltage(0.0, 1.0, 3);
    params.mode(SweepMode::DualDirection);

    let result = run(&mut session, &params).unwrap();

    assert_eq!(result.samples(), 5);
    assert_close(result.forward().source(), &[0.0, 0.5, 1.0]);
    let reverse = result.reverse().unwrap();
    assert_close(reverse.source(), &[1.0, 0.5, 0.0]);
    assert_close(reverse.measured(), &[0.01, 0.005, 0.0]);
    assert!(written(&session)
        .iter()
        .any(|line| line.ends_with("BEST, OFF, ON, \"defbuffer1\"")));
}

#[test]
fn resistance_probe_sweeps_both_ways() {
    let mut session = simulated(SimulatedSourceMeter::new());
    let mut params = SweepParameters::voltage(-0.5, 0.5, 3);
    params.mode(SweepMode::ResistanceProbe);

    let result = run(&mut session, &params).unwrap();

    assert_eq!(result.samples(), 6);
    assert_close(result.forward().source(), &[-0.5, 0.0, 0.5]);
    assert_close(result.reverse().unwrap().source(), &[0.5, 0.0, -0.5]);
    let sweeps: Vec<String> = written(&session)
        .into_iter()
        .filter(|line| line.starts_with(":SOURCE1:SWEEP:"))
        .collect();
    assert_eq!(
        sweeps,
        [
            ":SOURCE1:SWEEP:VOLTAGE:LINEAR -0.5, 0.5, 3, -1, 1, BEST, OFF, OFF, \"defbuffer1\"",
            ":SOURCE1:SWEEP:VOLTAGE:LINEAR 0.5, -0.5, 3, -1, 1, BEST, OFF, OFF, \"defbuffer1\"",
        ]
    );
}

#[test]
fn fetch_times_out_after_the_estimate() {
    let mut session = simulated(SimulatedSourceMeter::new().ignore("*OPC?"));
    let mut params = SweepParameters::voltage(0.0, 1.0, 2);
    params.nplc(0.01);
    let estimate = params.timeout_estimate();

    trigger(&mut session).unwrap();
    let err = fetch(&mut session, &params).unwrap_err();

    assert!(err.is_timeout());
    let err = TimeoutError::try_from(err).unwrap();
    assert_eq!(err.operation(), "*OPC?");
    assert_eq!(err.timeout(), estimate);
    assert_eq!(session.timeout(), Duration::from_millis(100));
}

#[test]
fn trigger_refuses_an_anomalous_instrument() {
    let mut session = simulated(
        SimulatedSourceMeter::new()
            .status_byte(4)
            .event("-222,\"Parameter data out of range;1;2024/05/01 12:00:00.000\""),
    );

    let err = trigger(&mut session).unwrap_err();

    assert_eq!(err.events().len(), 1);
    let err = StatusAnomalyError::try_from(err).unwrap();
    assert_eq!(err.status().get(), 4);
    assert!(!written(&session).iter().any(|line| line == ":INITIATE:IMMEDIATE"));
}

#[test]
fn sample_rate() {
    let trace: Trace = [(0.0, 0.0), (1.0, 0.01)].into_iter().collect();
    let params = SweepParameters::voltage(0.0, 1.0, 2);
    let result = SweepResult::from_samples(&params, trace.clone(), Duration::from_millis(500));
    assert_eq!(result.sample_rate(), Some(4.0));
    let result = SweepResult::from_samples(&params, trace, Duration::ZERO);
    assert_eq!(result.sample_rate(), None);
}
