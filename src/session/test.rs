use super::*;
use crate::{
	backend::{Mock, SimulatedSourceMeter},
	block::encode_definite_block,
	error::*,
	status::EventCategory,
};
use std::sync::{Arc, Mutex};

/// Create a session over a simulated instrument with a short timeout.
fn simulated(sim: SimulatedSourceMeter) -> Session<Mock> {
	let mut session = Session::open_mock(sim.into_mock());
	session.set_timeout(Duration::from_millis(100));
	session
}

/// Count the lines written to the session's backend that equal `line`.
fn count_written(session: &Session<Mock>, line: &str) -> usize {
	session
		.backend()
		.written_lines()
		.iter()
		.filter(|written| *written == line)
		.count()
}

static_assertions::assert_impl_all!(Session<TcpStream>: Send);
static_assertions::assert_impl_all!(Session<Serial>: Send);
static_assertions::assert_impl_all!(Session<DynBackend>: Send);
static_assertions::assert_impl_all!(Session<Mock>: Send);

#[test]
fn query_trims_and_keeps_extra_bytes() {
	let mut session = Session::open_mock(Mock::new());
	session.backend_mut().append_data(b" 42 \r\n7\n");
	assert_eq!(session.query(":TRACE:ACTUAL?").unwrap(), "42");
	assert_eq!(session.query(":TRACE:ACTUAL?").unwrap(), "7");
	assert_eq!(
		session.backend().written_lines(),
		[":TRACE:ACTUAL?", ":TRACE:ACTUAL?"]
	);
}

#[test]
fn query_times_out() {
	let mut session = Session::open_mock(Mock::new());
	session.set_timeout(Duration::from_millis(30));
	let err = session.query("*IDN?").unwrap_err();
	assert!(err.is_timeout());
	let err = TimeoutError::try_from(err).unwrap();
	assert_eq!(err.operation(), "*IDN?");
	assert_eq!(err.timeout(), Duration::from_millis(30));
}

#[test]
fn write_failures_are_returned() {
	let mut session = Session::open_mock(Mock::new());
	session
		.backend_mut()
		.write_error(Some(io::Error::new(io::ErrorKind::BrokenPipe, "unplugged")));
	let err = session.write("*CLS").unwrap_err();
	match err {
		Error::Io(e) => assert_eq!(e.kind(), io::ErrorKind::BrokenPipe),
		other => panic!("unexpected error {other:?}"),
	}
}

#[test]
fn read_failures_are_returned() {
	let mut session = Session::open_mock(Mock::new());
	session
		.backend_mut()
		.read_error(Some(io::Error::new(io::ErrorKind::ConnectionReset, "reset")));
	let err = session.query("*STB?").unwrap_err();
	assert!(matches!(err, Error::Io(ref e) if e.kind() == io::ErrorKind::ConnectionReset));
}

#[test]
fn query_binary_definite_block() {
	let values = [1.5, -2.25, 1e-9, 0.0];
	let mut session = Session::open_mock(Mock::new());
	let mut response = encode_definite_block(&values);
	response.push(b'\n');
	response.extend_from_slice(b"1\n");
	session.backend_mut().append_data(response);

	assert_eq!(session.query_binary("TRACE:DATA? 1, 2").unwrap(), values);
	// The terminator after the block must not be mistaken for an empty line.
	assert_eq!(session.query("*OPC?").unwrap(), "1");
}

#[test]
fn query_binary_terminator_arrives_late() {
	let values = [3.0, 4.0];
	let mut session = Session::open_mock(Mock::new());
	session.backend_mut().append_data(encode_definite_block(&values));
	assert_eq!(session.query_binary("TRACE:DATA? 1, 1").unwrap(), values);

	session.backend_mut().append_data(b"\n1\n");
	assert_eq!(session.query("*OPC?").unwrap(), "1");
}

#[test]
fn query_binary_indefinite_and_bare_payloads() {
	// A `\n` byte at an unaligned offset is part of a value, not a delimiter.
	let tricky = f64::from_le_bytes([0, 0x0A, 0, 0, 0, 0, 0xF0, 0x3F]);
	let values = [10.0, tricky];
	let payload: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();

	let mut session = Session::open_mock(Mock::new());
	let mut response = b"#0".to_vec();
	response.extend_from_slice(&payload);
	response.push(b'\n');
	session.backend_mut().append_data(&response);
	let decoded = session.query_binary("FETCH?").unwrap();
	assert_eq!(decoded[1].to_bits(), tricky.to_bits());

	let mut response = payload.clone();
	response.push(b'\n');
	session.backend_mut().append_data(&response);
	assert_eq!(session.query_binary("FETCH?").unwrap().len(), 2);
}

#[test]
fn query_binary_rejects_partial_values() {
	let mut session = Session::open_mock(Mock::new());
	session.backend_mut().append_data(b"#17abcdefg\n");
	let err = session.query_binary("FETCH?").unwrap_err();
	let err = DecodeError::try_from(err).unwrap();
	assert_eq!(err.len(), 7);

	session.backend_mut().append_data(b"#x\n");
	assert!(matches!(
		session.query_binary("FETCH?"),
		Err(Error::Decode(_))
	));
}

/// Encode `values` as a bare little-endian payload followed by `\n`.
fn bare_payload(values: &[f64]) -> Vec<u8> {
	let mut payload: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
	payload.push(b'\n');
	payload
}

#[test]
fn query_binary_values_reads_aligned_terminator_bytes_as_data() {
	// The first byte of this value is `\n`.
	let aligned = f64::from_le_bytes([0x0A, 0, 0, 0, 0, 0, 0xF0, 0x3F]);
	let values = [10.0, aligned, 2.0];

	let mut session = Session::open_mock(Mock::new());
	session.backend_mut().append_data(bare_payload(&values));
	session.backend_mut().append_data(b"1\n");
	let decoded = session.query_binary_values("FETCH?", 3).unwrap();
	assert_eq!(decoded.len(), 3);
	assert_eq!(decoded[0], 10.0);
	assert_eq!(decoded[1].to_bits(), aligned.to_bits());
	assert_eq!(decoded[2], 2.0);
	assert_eq!(session.query("*OPC?").unwrap(), "1");

	let mut response = b"#0".to_vec();
	response.extend_from_slice(&bare_payload(&values));
	response.extend_from_slice(b"1\n");
	session.backend_mut().append_data(&response);
	let decoded = session.query_binary_values("FETCH?", 3).unwrap();
	assert_eq!(decoded[1].to_bits(), aligned.to_bits());
	assert_eq!(session.query("*OPC?").unwrap(), "1");
}

#[test]
fn query_binary_values_discards_a_short_payload() {
	let mut session = Session::open_mock(Mock::new());
	session.set_timeout(Duration::from_millis(30));
	session.backend_mut().append_data(bare_payload(&[1.0, 2.0, 3.0]));

	let err = session.query_binary_values("FETCH?", 4).unwrap_err();
	assert!(err.is_timeout(), "{err}");

	session.backend_mut().append_data(b"1\n");
	assert_eq!(session.query("*OPC?").unwrap(), "1");
}

#[test]
fn query_binary_values_rejects_a_long_payload() {
	let mut session = Session::open_mock(Mock::new());
	session.set_timeout(Duration::from_millis(30));
	session.backend_mut().append_data(bare_payload(&[1.0, 2.0, 3.0]));

	let err = session.query_binary_values("FETCH?", 2).unwrap_err();
	assert!(matches!(err, Error::Decode(_)), "{err}");

	session.backend_mut().append_data(b"1\n");
	assert_eq!(session.query("*OPC?").unwrap(), "1");
}

#[test]
fn draining_an_empty_log_clears_it_once() {
	let mut session = simulated(SimulatedSourceMeter::new());
	assert_eq!(session.drain_event_log().unwrap(), Vec::new());
	assert_eq!(count_written(&session, ":SYSTEM:CLEAR"), 1);
	assert_eq!(count_written(&session, ":SYSTEM:EVENTLOG:NEXT?"), 1);
}

#[test]
fn drain_event_log_in_order() {
	let mut session = simulated(
		SimulatedSourceMeter::new()
			.event("-113,\"Undefined header;1;2024/01/01 00:00:00.000\"")
			.event("5074,\"Output enabled;4;2024/01/01 00:00:01.000\""),
	);
	let events = session.drain_event_log().unwrap();
	assert_eq!(events.len(), 2);
	assert_eq!(events[0].code(), -113);
	assert_eq!(events[0].category(), EventCategory::Error);
	assert_eq!(events[1].code(), 5074);
	assert_eq!(events[1].category(), EventCategory::Information);
	assert_eq!(count_written(&session, ":SYSTEM:CLEAR"), 1);

	// The log is consumed
	assert!(session.drain_event_log().unwrap().is_empty());
}

#[test]
fn drain_event_log_is_bounded() {
	let mut session = Session::open_mock(Mock::with_responder(|line| {
		(line == ":SYSTEM:EVENTLOG:NEXT?").then(|| b"100,\"Again;2;now\"\n".to_vec())
	}));
	let err = session.drain_event_log().unwrap_err();
	assert!(matches!(err, Error::MalformedResponse(_)));
	assert_eq!(
		count_written(&session, ":SYSTEM:EVENTLOG:NEXT?"),
		MAX_DRAINED_EVENTS + 1
	);
	assert_eq!(count_written(&session, ":SYSTEM:CLEAR"), 1);
}

#[test]
fn check_status_idle() {
	for value in [0, 64, 128] {
		let mut session = simulated(SimulatedSourceMeter::new().status_byte(value));
		assert_eq!(session.check_status().unwrap(), StatusByte::new(value));
		assert_eq!(count_written(&session, ":SYSTEM:EVENTLOG:NEXT?"), 0);
	}
}

/// Generate a test checking that `check_status` reports the status byte
/// `$value` as an anomaly, with the drained event log attached.
macro_rules! anomalous_status_test {
	($($value:literal),+ $(,)?) => {
		$(
			paste::paste! { // For generating new identifiers
				#[test]
				fn [<anomalous_status_ $value>]() {
					let mut session = simulated(
						SimulatedSourceMeter::new()
							.status_byte($value)
							.event("-285,\"Program syntax error;1;now\""),
					);
					let err = session.check_status().unwrap_err();
					assert_eq!(err.events().len(), 1);
					assert_eq!(err.events()[0].code(), -285);
					let err = StatusAnomalyError::try_from(err).unwrap();
					assert_eq!(err.status(), StatusByte::new($value));
					assert_eq!(count_written(&session, ":SYSTEM:CLEAR"), 1);
				}
			}
		)+
	};
}

anomalous_status_test!(1, 4, 20, 68, 192, 255);

#[test]
fn check_status_rejects_garbage() {
	let mut session = Session::open_mock(Mock::new());
	session.backend_mut().append_data(b"ready\n");
	assert!(matches!(
		session.check_status(),
		Err(Error::MalformedResponse(_))
	));
}

#[test]
fn scoped_timeout_restores_on_error() {
	let mut session = Session::open_mock(Mock::new());
	session.set_timeout(Duration::from_millis(20));
	let result = session.scoped_timeout(Duration::from_millis(40), |session| {
		assert_eq!(session.timeout(), Duration::from_millis(40));
		session.query("*OPC?")
	});
	let err = TimeoutError::try_from(result.unwrap_err()).unwrap();
	assert_eq!(err.timeout(), Duration::from_millis(40));
	assert_eq!(session.timeout(), Duration::from_millis(20));
}

#[test]
fn wait_for_operation_complete() {
	let mut session = simulated(SimulatedSourceMeter::new());
	session.wait_for_operation_complete().unwrap();
	assert_eq!(session.backend().written_lines(), ["*WAI", "*OPC?"]);

	let mut session = Session::open_mock(Mock::new());
	session.backend_mut().append_data(b"0\n");
	assert!(matches!(
		session.wait_for_operation_complete(),
		Err(Error::MalformedResponse(_))
	));
}

#[test]
fn close_is_idempotent() {
	let mut session = simulated(SimulatedSourceMeter::new());
	session.close().unwrap();
	session.close().unwrap();
	assert!(session.is_closed());
	assert_eq!(count_written(&session, ":OUTPUT1:STATE OFF"), 1);
	assert_eq!(session.backend().close_count(), 1);

	let err = session.query("*IDN?").unwrap_err();
	assert!(matches!(err, Error::Io(ref e) if e.kind() == io::ErrorKind::NotConnected));
	assert!(session.write("*CLS").is_err());
}

#[test]
fn drop_turns_output_off() {
	let written = Arc::new(Mutex::new(Vec::new()));
	{
		let written = Arc::clone(&written);
		let mut session = Session::open_mock(Mock::new());
		session.set_packet_handler(move |frame, dir| {
			if dir == Direction::Tx {
				written
					.lock()
					.unwrap()
					.push(String::from_utf8_lossy(frame).into_owned());
			}
		});
	}
	assert_eq!(*written.lock().unwrap(), [":OUTPUT1:STATE OFF\n"]);
}

#[test]
fn connect_resets_and_identifies() {
	let mock = SimulatedSourceMeter::new()
		.identity("KEITHLEY INSTRUMENTS,MODEL 2450,04412345,1.7.3c")
		.into_mock();
	let session = Session::connect(mock, "simulated", b'\n', Duration::from_millis(100)).unwrap();

	assert_eq!(
		session.backend().written_lines(),
		[
			"*RST",
			":TRACE:CLEAR",
			"*CLS",
			"*SRE 20",
			"*LANG SCPI",
			":FORMAT:DATA REAL",
			"*IDN?",
		]
	);
	let identity = session.identity();
	assert_eq!(identity.manufacturer(), "KEITHLEY INSTRUMENTS");
	assert_eq!(identity.model(), "MODEL 2450");
	assert_eq!(identity.serial_number(), "04412345");
	assert_eq!(identity.firmware(), "1.7.3c");
}

#[test]
fn connect_reports_failed_stage() {
	let mock = SimulatedSourceMeter::new().ignore("*IDN?").into_mock();
	let err = Session::connect(mock, "simulated", b'\n', Duration::from_millis(30)).unwrap_err();
	assert_eq!(err.stage(), ConnectStage::Identifying);
	assert_eq!(err.address(), "simulated");

	let mock = SimulatedSourceMeter::new().identity("not an identity").into_mock();
	let err = Session::connect(mock, "simulated", b'\n', Duration::from_millis(30)).unwrap_err();
	assert_eq!(err.stage(), ConnectStage::Identifying);

	let mut mock = Mock::new();
	mock.write_error(Some(io::Error::new(io::ErrorKind::BrokenPipe, "unplugged")));
	let err = Session::connect(mock, "simulated", b'\n', Duration::from_millis(30)).unwrap_err();
	assert_eq!(err.stage(), ConnectStage::Resetting);
}

#[test]
fn connect_fails_without_a_listener() {
	let closed = {
		let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
		listener.local_addr().unwrap()
	};
	let err = Session::open_tcp_options()
		.probe(false)
		.timeout(Duration::from_millis(200))
		.open(&closed.to_string())
		.unwrap_err();
	assert_eq!(err.stage(), ConnectStage::Connecting);

	let err = Session::open("not a resource").unwrap_err();
	assert_eq!(err.stage(), ConnectStage::Uninit);
}

#[test]
fn connect_over_tcp() {
	use std::io::{BufRead, BufReader, Write as _};

	let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
	let address = listener.local_addr().unwrap();
	let server = std::thread::spawn(move || {
		let (stream, _) = listener.accept().unwrap();
		let mut writer = stream.try_clone().unwrap();
		let mut sim = SimulatedSourceMeter::new();
		for line in BufReader::new(stream).lines() {
			let Ok(line) = line else { break };
			if let Some(response) = sim.respond(&line) {
				writer.write_all(&response).unwrap();
			}
		}
	});

	let mut session = Session::open_tcp_options()
		.probe(false)
		.open(&address.to_string())
		.unwrap();
	assert_eq!(session.identity().model(), "MODEL 2450");
	assert_eq!(session.status_byte().unwrap(), StatusByte::new(0));
	session.close().unwrap();
	drop(session);
	server.join().unwrap();
}

#[test]
fn handlers_see_frames_and_records() {
	let frames = Arc::new(Mutex::new(Vec::new()));
	let records = Arc::new(Mutex::new(Vec::new()));
	let mut session = simulated(SimulatedSourceMeter::new());
	{
		let frames = Arc::clone(&frames);
		session.set_packet_handler(move |frame, dir| {
			frames.lock().unwrap().push((dir, frame.to_vec()));
		});
		let records = Arc::clone(&records);
		session.set_record_handler(move |record| {
			records.lock().unwrap().push(record.clone());
		});
	}
	session.query("*IDN?").unwrap();
	session.write("*CLS").unwrap();

	let frames = frames.lock().unwrap();
	assert_eq!(frames.len(), 3);
	assert_eq!(frames[0], (Direction::Tx, b"*IDN?\n".to_vec()));
	assert_eq!(frames[1].0, Direction::Recv);
	assert_eq!(frames[2], (Direction::Tx, b"*CLS\n".to_vec()));

	let records = records.lock().unwrap();
	let operations: Vec<u64> = records.iter().map(LogRecord::operation).collect();
	assert_eq!(operations, [1, 1, 2]);
	assert!(records[0].message().contains("*IDN?"));
	assert_eq!(session.operation_count(), 2);

	drop(frames);
	assert!(session.clear_packet_handler().is_some());
	assert!(session.clear_record_handler().is_some());
}
