//! Types for opening and using a session with a SCPI instrument.
//!
//! A [`Session`] owns one [`Backend`] and drives the instrument's
//! line-oriented command/query protocol over it: commands, text and binary
//! queries, the status byte, and the event log.
//!
//! ## Opening a session
//!
//! Sessions are opened with a resource string,
//!
//! ```rust
//! # use sourcemeter::session::Session;
//! # fn wrapper() -> Result<(), Box<dyn std::error::Error>> {
//! let mut session = Session::open("TCPIP::192.168.1.20::INSTR")?;
//! println!("connected to {}", session.identity());
//! # Ok(())
//! # }
//! ```
//!
//! or, to customize how the transport is opened, with [`OpenTcpOptions`] and
//! [`OpenSerialOptions`]. Opening a session resets the instrument and reads
//! its identity. If any step fails no session is produced and the returned
//! [`ConnectError`] names the [`ConnectStage`] that failed.
//!
//! ## Timeouts
//!
//! Every read is bounded by the session's timeout. Long operations can raise
//! it temporarily with [`Session::timeout_guard`] or
//! [`Session::scoped_timeout`]; the previous timeout is restored however the
//! scope is left.
//!
//! ## Closing
//!
//! [`Session::close`] turns the instrument's output off and releases the
//! backend. Dropping an open session does the same on a best-effort basis.

mod address;
pub mod handlers;
mod options;
#[cfg(test)]
mod test;

#[cfg(any(test, feature = "mock"))]
use crate::backend::Mock;
use crate::{
	backend::{Backend, Serial, UNKNOWN_BACKEND_NAME},
	block::{self, BlockLength},
	error::{
		ConnectError, DecodeError, Error, MalformedResponseError, StatusAnomalyError,
		TimeoutError,
	},
	poll::{self, Polled},
	status::{self, StatusByte, StatusEvent},
	timeout_guard::TimeoutGuard,
};
pub use address::*;
use handlers::{Handlers, LogRecord};
pub use options::*;
use std::{
	io::{self, Read as _, Write as _},
	net::TcpStream,
	ops::Range,
	time::Duration,
};

/// The longest a single read may block the backend.
pub(crate) const POLL_SLICE: Duration = Duration::from_millis(100);
/// How long to sleep between reads that returned no data.
const POLL_INTERVAL: Duration = Duration::from_millis(5);
/// The most event log records drained at once.
pub const MAX_DRAINED_EVENTS: usize = 256;

/// Commands sent to reset the instrument while connecting.
const RESET_COMMANDS: [&str; 6] = [
	"*RST",
	":TRACE:CLEAR",
	"*CLS",
	// Summarize errors (bit 2) and available messages (bit 4) in the status byte
	"*SRE 20",
	"*LANG SCPI",
	":FORMAT:DATA REAL",
];
const IDENTIFY: &str = "*IDN?";
const STATUS_BYTE: &str = "*STB?";
const CLEAR_EVENT_LOG: &str = ":SYSTEM:CLEAR";
const WAIT: &str = "*WAI";
const OPERATION_COMPLETE: &str = "*OPC?";
const OUTPUT_OFF: &str = ":OUTPUT1:STATE OFF";

/// The direction a frame was sent.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Direction {
	/// The frame was transmitted to the instrument.
	Tx,
	/// The frame was received from the instrument.
	Recv,
}

/// The stages of connecting to an instrument, in order.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ConnectStage {
	/// Nothing has been attempted. Failures here are invalid addresses.
	Uninit,
	/// Probing the auxiliary ports of a networked instrument.
	Probing,
	/// Opening the transport.
	Connecting,
	/// Resetting the instrument to a known state.
	Resetting,
	/// Reading the instrument's identity.
	Identifying,
	/// The session is ready for use.
	Ready,
}

impl std::fmt::Display for ConnectStage {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let stage = match self {
			ConnectStage::Uninit => "parsing the address",
			ConnectStage::Probing => "probing auxiliary ports",
			ConnectStage::Connecting => "opening the transport",
			ConnectStage::Resetting => "resetting the instrument",
			ConnectStage::Identifying => "identifying the instrument",
			ConnectStage::Ready => "ready",
		};
		f.write_str(stage)
	}
}

/// The identity an instrument reports in response to `*IDN?`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Identity {
	manufacturer: String,
	model: String,
	serial_number: String,
	firmware: String,
}

impl Identity {
	/// Parse the response to `*IDN?`.
	pub(crate) fn parse(response: &str) -> Result<Self, MalformedResponseError> {
		let fields: Vec<&str> = response.trim().splitn(4, ',').map(str::trim).collect();
		match fields.as_slice() {
			[manufacturer, model, serial_number, firmware] => Ok(Identity {
				manufacturer: (*manufacturer).to_string(),
				model: (*model).to_string(),
				serial_number: (*serial_number).to_string(),
				firmware: (*firmware).to_string(),
			}),
			_ => Err(MalformedResponseError::new(
				IDENTIFY,
				response,
				"expected `<manufacturer>,<model>,<serial number>,<firmware>`",
			)),
		}
	}

	/// The manufacturer.
	pub fn manufacturer(&self) -> &str {
		&self.manufacturer
	}

	/// The model.
	pub fn model(&self) -> &str {
		&self.model
	}

	/// The serial number.
	pub fn serial_number(&self) -> &str {
		&self.serial_number
	}

	/// The firmware version.
	pub fn firmware(&self) -> &str {
		&self.firmware
	}
}

impl std::fmt::Display for Identity {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(
			f,
			"{} {} (serial number {}, firmware {})",
			self.manufacturer, self.model, self.serial_number, self.firmware
		)
	}
}

/// The location of a complete binary frame at the start of the receive buffer.
#[derive(Debug, PartialEq, Eq)]
struct BinaryFrame {
	/// Where the payload lies in the frame.
	payload: Range<usize>,
	/// The number of bytes the frame occupies.
	len: usize,
	/// Whether a terminator may still follow the frame.
	terminator_pending: bool,
}

/// Find a complete binary frame at the start of `rx`.
///
/// Frames are either IEEE-488.2 blocks or payloads delimited by
/// `terminator`. When the number of `values` is known, a delimited payload
/// is exactly that many 8-byte values followed by the terminator. Otherwise it
/// ends at the first terminator at an 8-byte boundary of the payload, which a
/// value whose first byte equals the terminator will cut short.
fn find_binary_frame(
	rx: &[u8],
	terminator: u8,
	values: Option<usize>,
) -> Result<Option<BinaryFrame>, DecodeError> {
	if rx.is_empty() {
		return Ok(None);
	}
	if rx[0] != block::BLOCK_START {
		return find_delimited_frame(rx, 0, terminator, values);
	}
	match block::parse_header(rx)? {
		None => Ok(None),
		Some((BlockLength::Indefinite, header)) => find_delimited_frame(rx, header, terminator, values),
		Some((BlockLength::Definite(len), header)) => {
			let end = header
				.checked_add(len)
				.ok_or_else(|| DecodeError::new("block length overflows", rx.len()))?;
			if rx.len() < end {
				return Ok(None);
			}
			let has_terminator = rx.get(end) == Some(&terminator);
			Ok(Some(BinaryFrame {
				payload: header..end,
				len: end + usize::from(has_terminator),
				terminator_pending: !has_terminator,
			}))
		}
	}
}

/// Find a payload starting at `start` and ending with the terminator.
fn find_delimited_frame(
	rx: &[u8],
	start: usize,
	terminator: u8,
	values: Option<usize>,
) -> Result<Option<BinaryFrame>, DecodeError> {
	let Some(values) = values else {
		return Ok(rx[start..]
			.iter()
			.enumerate()
			.find(|&(i, &b)| b == terminator && i % 8 == 0)
			.map(|(i, _)| BinaryFrame {
				payload: start..start + i,
				len: start + i + 1,
				terminator_pending: false,
			}));
	};
	let end = values
		.checked_mul(8)
		.and_then(|len| len.checked_add(start))
		.ok_or_else(|| DecodeError::new("payload length overflows", rx.len()))?;
	match rx.get(end) {
		None => Ok(None),
		Some(&b) if b == terminator => Ok(Some(BinaryFrame {
			payload: start..end,
			len: end + 1,
			terminator_pending: false,
		})),
		Some(_) => Err(DecodeError::new(
			"the payload holds more than the expected number of values",
			end + 1 - start,
		)),
	}
}

/// A session with a SCPI instrument.
///
/// See the [`session`](crate::session) module-level documentation for an
/// overview.
///
/// A session is parameterized by the type of [`Backend`] used to exchange
/// bytes with the instrument. Use [`Session::open`] to open a session with a
/// dynamic backend from a resource string, [`Session::open_tcp`] and
/// [`Session::open_serial`] for concrete backends, or [`Session::connect`]
/// with any backend.
///
/// All operations take `&mut self`, so there is only ever one operation in
/// flight. A session implements `Send` when its backend does.
pub struct Session<B: Backend> {
	/// The underlying backend
	backend: B,
	/// The byte that ends every command and response.
	terminator: u8,
	/// Bytes received but not yet consumed.
	rx: Vec<u8>,
	/// Whether the terminator that may follow a binary block has not arrived yet.
	terminator_pending: bool,
	/// How long to wait for a response.
	timeout: Duration,
	/// The identity read while connecting.
	identity: Identity,
	/// The id of the current operation.
	operation: u64,
	/// Whether the session was closed.
	closed: bool,
	/// User supplied event handlers
	handlers: Handlers,
}

impl<B: Backend> std::fmt::Debug for Session<B> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Session")
			.field("name", &self.backend.name())
			.field("timeout", &self.timeout)
			.field("closed", &self.closed)
			.finish_non_exhaustive()
	}
}

impl Session<DynBackend> {
	/// Open a session with the instrument at the specified resource, using
	/// the default options for its transport.
	///
	/// See [`ResourceAddress::parse`] for the accepted resource strings.
	///
	/// ## Example
	///
	/// ```rust
	/// # use sourcemeter::session::Session;
	/// # fn wrapper() -> Result<(), Box<dyn std::error::Error>> {
	/// let mut session = Session::open("TCPIP::192.168.1.20::5025::SOCKET")?;
	/// let mut session = Session::open("ASRL/dev/ttyUSB0::INSTR")?;
	/// # Ok(())
	/// # }
	/// ```
	pub fn open(resource: &str) -> Result<Session<DynBackend>, ConnectError> {
		match ResourceAddress::parse(resource)? {
			ResourceAddress::Tcp { host, port } => {
				OpenTcpOptions::new().open_dyn(&format!("{host}:{port}"))
			}
			ResourceAddress::Serial { path } => OpenSerialOptions::new().open_dyn(&path),
		}
	}
}

impl Session<Serial> {
	/// Open a session over the serial port at the specified path using the
	/// default options.
	///
	/// Alternatively, use [`Session::open_serial_options`] to customize how
	/// the port is opened.
	pub fn open_serial(path: &str) -> Result<Session<Serial>, ConnectError> {
		OpenSerialOptions::new().open(path)
	}

	/// Get an [`OpenSerialOptions`] to customize how a serial port is opened.
	pub fn open_serial_options() -> OpenSerialOptions {
		OpenSerialOptions::default()
	}
}

impl Session<TcpStream> {
	/// Open a session over TCP at the specified `<host>:<port>` address
	/// using the default options.
	///
	/// Alternatively, use [`Session::open_tcp_options`] to customize how the
	/// connection is opened.
	pub fn open_tcp(address: &str) -> Result<Session<TcpStream>, ConnectError> {
		OpenTcpOptions::new().open(address)
	}

	/// Get an [`OpenTcpOptions`] to customize how a TCP connection is opened.
	pub fn open_tcp_options() -> OpenTcpOptions {
		OpenTcpOptions::default()
	}
}

#[cfg(any(test, feature = "mock"))]
impl Session<Mock> {
	/// Create a session over a [`Mock`] backend without connecting.
	///
	/// No commands are sent. The terminator is `\n` and the timeout is 1 second.
	pub fn open_mock(backend: Mock) -> Session<Mock> {
		Session::from_backend(backend, b'\n', DEFAULT_TIMEOUT)
	}
}

impl<B: Backend> Session<B> {
	/// Create a `Session` from a [`Backend`] type.
	fn from_backend(backend: B, terminator: u8, timeout: Duration) -> Self {
		Session {
			backend,
			terminator,
			rx: Vec::new(),
			terminator_pending: false,
			timeout,
			identity: Identity::default(),
			operation: 0,
			closed: false,
			handlers: Handlers::default(),
		}
	}

	/// Connect to the instrument on the other end of an open backend.
	///
	/// The instrument is reset to a known state and its identity is read. On
	/// failure the backend is released and the stage that failed is reported.
	/// `address` is only used for diagnostics.
	pub fn connect(
		backend: B,
		address: &str,
		terminator: u8,
		timeout: Duration,
	) -> Result<Self, ConnectError> {
		let mut session = Session::from_backend(backend, terminator, timeout);
		let mut stage = ConnectStage::Resetting;
		let result = (|| -> Result<(), Error> {
			log::info!("{address}: {stage}");
			for command in RESET_COMMANDS {
				session.write(command)?;
			}
			stage = ConnectStage::Identifying;
			log::info!("{address}: {stage}");
			let response = session.query(IDENTIFY)?;
			session.identity = Identity::parse(&response)?;
			Ok(())
		})();

		match result {
			Ok(()) => {
				log::info!("{address}: {}, {}", ConnectStage::Ready, session.identity);
				Ok(session)
			}
			Err(e) => {
				session.release();
				Err(ConnectError::new(stage, address, e))
			}
		}
	}

	/// Check that the session has not been closed.
	fn check_open(&self) -> Result<(), io::Error> {
		if self.closed {
			Err(io::Error::new(io::ErrorKind::NotConnected, "session closed"))
		} else {
			Ok(())
		}
	}

	/// Start a new operation.
	fn begin_operation(&mut self) -> Result<(), io::Error> {
		self.check_open()?;
		self.operation += 1;
		Ok(())
	}

	/// Emit a log record through the `log` crate and the record handler.
	fn record(&mut self, level: log::Level, args: std::fmt::Arguments<'_>) {
		let name = self
			.backend
			.name()
			.unwrap_or_else(|| UNKNOWN_BACKEND_NAME.to_string());
		log::log!(level, "{} [op {}] {}", name, self.operation, args);
		if let Some(callback) = self.handlers.record.as_mut() {
			(callback)(&LogRecord::new(level, self.operation, args.to_string()));
		}
	}

	/// Transmit a command followed by the terminator.
	fn send(&mut self, command: &str) -> Result<(), io::Error> {
		let mut buffer = Vec::with_capacity(command.len() + 1);
		buffer.extend_from_slice(command.as_bytes());
		buffer.push(self.terminator);
		self.record(log::Level::Debug, format_args!("TX:   {command}"));
		self.backend.write_all(&buffer)?;
		self.backend.flush()?;
		if let Some(callback) = self.handlers.packet.as_mut() {
			(callback)(&buffer, Direction::Tx);
		}
		Ok(())
	}

	/// Read whatever the backend has available into the receive buffer.
	///
	/// Returns whether any bytes were read.
	fn receive_available(&mut self) -> Result<bool, io::Error> {
		let mut buf = [0u8; 4096];
		match self.backend.read(&mut buf) {
			Ok(0) => Err(io::Error::new(
				io::ErrorKind::UnexpectedEof,
				"the instrument closed the connection",
			)),
			Ok(n) => {
				self.rx.extend_from_slice(&buf[..n]);
				Ok(true)
			}
			Err(e)
				if matches!(
					e.kind(),
					io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
				) =>
			{
				Ok(false)
			}
			Err(e) => Err(e),
		}
	}

	/// Drop the terminator that followed the previous binary block, if it has arrived.
	fn skip_pending_terminator(&mut self) {
		if self.terminator_pending {
			if let Some(&first) = self.rx.first() {
				if first == self.terminator {
					self.rx.remove(0);
				}
				self.terminator_pending = false;
			}
		}
	}

	/// Take a terminated line from the receive buffer, if there is one.
	fn take_line(&mut self) -> Option<Vec<u8>> {
		self.skip_pending_terminator();
		let end = self.rx.iter().position(|&b| b == self.terminator)?;
		Some(self.rx.drain(..=end).collect())
	}

	/// Take a binary frame from the receive buffer, if there is one.
	///
	/// Returns the raw frame and the location of its payload.
	fn take_binary_frame(
		&mut self,
		values: Option<usize>,
	) -> Result<Option<(Vec<u8>, Range<usize>)>, DecodeError> {
		self.skip_pending_terminator();
		let Some(frame) = find_binary_frame(&self.rx, self.terminator, values)? else {
			return Ok(None);
		};
		self.terminator_pending = frame.terminator_pending;
		Ok(Some((self.rx.drain(..frame.len).collect(), frame.payload)))
	}

	/// Receive until `take` produces a frame or the timeout elapses.
	fn receive<T, F>(&mut self, command: &str, mut take: F) -> Result<T, Error>
	where
		F: FnMut(&mut Self) -> Result<Option<T>, Error>,
	{
		let timeout = self.timeout;
		let polled = poll::until_deadline(timeout, POLL_INTERVAL, || -> Result<Option<T>, Error> {
			if let Some(frame) = take(&mut *self)? {
				return Ok(Some(frame));
			}
			if self.receive_available()? {
				take(&mut *self)
			} else {
				Ok(None)
			}
		})?;
		match polled {
			Polled::Ready(frame) => Ok(frame),
			Polled::TimedOut => {
				self.record(
					log::Level::Warn,
					format_args!("no response to `{command}` within {} ms", timeout.as_millis()),
				);
				Err(TimeoutError::new(command, timeout).into())
			}
		}
	}

	/// Receive one terminated line.
	fn receive_line(&mut self, command: &str) -> Result<String, Error> {
		let raw = self.receive(command, |session| Ok(session.take_line()))?;
		let line = String::from_utf8_lossy(&raw);
		self.record(log::Level::Debug, format_args!("RECV: {}", line.trim_end()));
		if let Some(callback) = self.handlers.packet.as_mut() {
			(callback)(&raw, Direction::Recv);
		}
		Ok(line.trim().to_string())
	}

	/// Transmit a command that has no response.
	///
	/// Transport failures are returned, never dropped.
	///
	/// ## Example
	///
	/// ```rust
	/// # use sourcemeter::{backend::Backend, session::Session};
	/// # fn wrapper<B: Backend>(mut session: Session<B>) -> Result<(), Box<dyn std::error::Error>> {
	/// session.write(":ROUTE:TERMINALS FRONT")?;
	/// # Ok(())
	/// # }
	/// ```
	pub fn write(&mut self, command: &str) -> Result<(), Error> {
		self.begin_operation()?;
		Ok(self.send(command)?)
	}

	/// Transmit a query and receive its response, without the terminator or
	/// surrounding whitespace.
	///
	/// Fails with a [`TimeoutError`] if no response arrives within the
	/// session's timeout.
	///
	/// ## Example
	///
	/// ```rust
	/// # use sourcemeter::{backend::Backend, session::Session};
	/// # fn wrapper<B: Backend>(mut session: Session<B>) -> Result<(), Box<dyn std::error::Error>> {
	/// let count: usize = session.query(":TRACE:ACTUAL?")?.parse()?;
	/// # Ok(())
	/// # }
	/// ```
	pub fn query(&mut self, command: &str) -> Result<String, Error> {
		self.begin_operation()?;
		self.send(command)?;
		self.receive_line(command)
	}

	/// Transmit a query and receive a binary response of packed
	/// little-endian `f64` values.
	///
	/// The response may be an IEEE-488.2 definite-length block
	/// (`#<d><len><bytes>`), an indefinite-length block (`#0<bytes>`) or bare
	/// bytes, the latter two ending with the terminator. A terminator
	/// following a definite-length block is consumed.
	///
	/// Without a length header the end of the payload is ambiguous, because
	/// any value may contain the terminator byte. Use
	/// [`query_binary_values`](Session::query_binary_values) when the number
	/// of values is known.
	pub fn query_binary(&mut self, command: &str) -> Result<Vec<f64>, Error> {
		self.query_binary_frame(command, None)
	}

	/// Transmit a query and receive a binary response of `count` packed
	/// little-endian `f64` values.
	///
	/// Responses without a length header are read as exactly `count` values
	/// followed by the terminator. A definite-length block is read as long as
	/// its header says, so callers should still check the number of values
	/// returned.
	///
	/// If the response does not arrive in time or is longer than `count`
	/// values, any unread input is discarded so that it is not mistaken for
	/// the response to a later query.
	pub fn query_binary_values(&mut self, command: &str, count: usize) -> Result<Vec<f64>, Error> {
		self.query_binary_frame(command, Some(count))
	}

	fn query_binary_frame(&mut self, command: &str, values: Option<usize>) -> Result<Vec<f64>, Error> {
		self.begin_operation()?;
		self.send(command)?;
		let received = self.receive(command, |session| Ok(session.take_binary_frame(values)?));
		let (raw, payload) = match received {
			Ok(frame) => frame,
			Err(e) => {
				if matches!(e, Error::Timeout(_) | Error::Decode(_)) {
					self.discard_input();
				}
				return Err(e);
			}
		};
		self.record(
			log::Level::Debug,
			format_args!("RECV: <{} byte binary payload>", payload.len()),
		);
		if let Some(callback) = self.handlers.packet.as_mut() {
			(callback)(&raw, Direction::Recv);
		}
		Ok(block::decode_f64_le(&raw[payload])?)
	}

	/// Discard everything received so far and whatever the backend has
	/// buffered, reading until it goes quiet for a poll slice.
	fn discard_input(&mut self) {
		let mut discarded = std::mem::take(&mut self.rx).len();
		self.terminator_pending = false;
		let drained = poll::until_deadline(self.timeout, Duration::ZERO, || -> Result<Option<()>, io::Error> {
			let before = self.rx.len();
			if self.receive_available()? {
				discarded += self.rx.len() - before;
				self.rx.clear();
				Ok(None)
			} else {
				Ok(Some(()))
			}
		});
		self.record(
			log::Level::Warn,
			format_args!("discarded {discarded} unread bytes"),
		);
		if let Err(e) = drained {
			self.record(log::Level::Warn, format_args!("failed to discard input: {e}"));
		}
	}

	/// Read the status byte.
	pub fn status_byte(&mut self) -> Result<StatusByte, Error> {
		let response = self.query(STATUS_BYTE)?;
		Ok(StatusByte::parse(STATUS_BYTE, &response)?)
	}

	/// Read the status byte and check that the instrument is idle.
	///
	/// If it is not, the event log is drained and a [`StatusAnomalyError`]
	/// carrying the status byte and the drained events is returned. The
	/// operation is never retried.
	pub fn check_status(&mut self) -> Result<StatusByte, Error> {
		let status = self.status_byte()?;
		if status.is_idle() {
			return Ok(status);
		}
		self.record(log::Level::Warn, format_args!("status byte {status} is not idle"));
		let events = self.drain_event_log()?;
		Err(StatusAnomalyError::new(status, events).into())
	}

	/// Read and remove every record in the instrument's event log, oldest first.
	///
	/// The log is cleared afterwards, even if it was empty. At most
	/// [`MAX_DRAINED_EVENTS`] records are read; a log that does not end by
	/// then is reported as a malformed response.
	pub fn drain_event_log(&mut self) -> Result<Vec<StatusEvent>, Error> {
		let mut events = Vec::new();
		let mut overflow = None;
		loop {
			let record = self.query(status::EVENT_LOG_NEXT)?;
			let event = StatusEvent::parse(&record)?;
			if event.is_end_of_log() {
				break;
			}
			if events.len() == MAX_DRAINED_EVENTS {
				overflow = Some(record);
				break;
			}
			let level = match event.category() {
				status::EventCategory::Error => log::Level::Error,
				status::EventCategory::Warning => log::Level::Warn,
				_ => log::Level::Info,
			};
			self.record(level, format_args!("event: {event}"));
			events.push(event);
		}
		self.write(CLEAR_EVENT_LOG)?;
		match overflow {
			Some(record) => Err(MalformedResponseError::new(
				status::EVENT_LOG_NEXT,
				&record,
				"the event log did not end",
			)
			.into()),
			None => Ok(events),
		}
	}

	/// Block until the instrument has finished all pending operations.
	///
	/// This sends `*WAI` and then waits, within the session's timeout, for
	/// `*OPC?` to answer `1`.
	pub fn wait_for_operation_complete(&mut self) -> Result<(), Error> {
		self.write(WAIT)?;
		let response = self.query(OPERATION_COMPLETE)?;
		if response == "1" {
			Ok(())
		} else {
			Err(MalformedResponseError::new(OPERATION_COMPLETE, &response, "expected `1`").into())
		}
	}

	/// Update the session's timeout and return a [`TimeoutGuard`] that will
	/// restore the previous timeout when it goes out of scope.
	///
	/// ## Example
	/// ```rust
	/// # use sourcemeter::{backend::Backend, error::Error, session::Session};
	/// # use std::time::Duration;
	/// # fn helper<B: Backend>(mut session: Session<B>) -> Result<(), Error> {
	/// {
	///     let mut guard = session.timeout_guard(Duration::from_secs(5));
	///     // All queries within this scope will use a 5 second timeout
	///     guard.wait_for_operation_complete()?;
	///
	/// }  // The guard is dropped and the timeout is reset.
	///
	/// // This query uses the original timeout
	/// session.query("*STB?")?;
	/// # Ok(())
	/// # }
	/// ```
	pub fn timeout_guard(&mut self, timeout: Duration) -> TimeoutGuard<'_, B> {
		TimeoutGuard::new(self, timeout)
	}

	/// Run `body` with the session's timeout set to `timeout`.
	///
	/// The previous timeout is restored however `body` exits, including by
	/// returning an error or panicking.
	pub fn scoped_timeout<R, F>(&mut self, timeout: Duration, body: F) -> R
	where
		F: FnOnce(&mut Self) -> R,
	{
		let mut guard = self.timeout_guard(timeout);
		body(&mut *guard)
	}

	/// Set the timeout for receiving responses.
	///
	/// The previous value is returned.
	pub fn set_timeout(&mut self, timeout: Duration) -> Duration {
		std::mem::replace(&mut self.timeout, timeout)
	}

	/// Get the timeout for receiving responses.
	pub fn timeout(&self) -> Duration {
		self.timeout
	}

	/// The identity the instrument reported while connecting.
	///
	/// Sessions created without connecting have an empty identity.
	pub fn identity(&self) -> &Identity {
		&self.identity
	}

	/// The line terminator.
	pub fn terminator(&self) -> u8 {
		self.terminator
	}

	/// The number of operations performed so far, which is also the id of
	/// the latest operation.
	pub fn operation_count(&self) -> u64 {
		self.operation
	}

	/// Get the name of the underlying backend.
	pub fn name(&self) -> Option<String> {
		self.backend.name()
	}

	/// Get a reference to the underlying backend.
	pub fn backend(&self) -> &B {
		&self.backend
	}

	/// Get a mutable reference to the underlying backend.
	///
	/// Note that writing to or reading from the backend directly may cause
	/// the session to misbehave.
	pub fn backend_mut(&mut self) -> &mut B {
		&mut self.backend
	}

	/// Whether the session has been closed.
	pub fn is_closed(&self) -> bool {
		self.closed
	}

	/// Turn the instrument's output off and release the backend.
	///
	/// Closing is idempotent. Afterwards every operation fails with an I/O
	/// error of kind [`NotConnected`](io::ErrorKind::NotConnected).
	pub fn close(&mut self) -> Result<(), Error> {
		if self.closed {
			return Ok(());
		}
		self.operation += 1;
		let output_off = self.send(OUTPUT_OFF);
		self.release();
		output_off?;
		Ok(())
	}

	/// Release the backend without sending anything.
	fn release(&mut self) {
		self.closed = true;
		if let Err(e) = self.backend.close() {
			self.record(log::Level::Warn, format_args!("failed to release the backend: {e}"));
		}
	}

	/// Set a callback that will be called whenever a frame is transmitted or
	/// received.
	///
	/// If a previous callback was set, it is returned.
	///
	/// Note, the session already logs frames via the [`log`] crate, so
	/// logging is best handled via a log handler, such as
	/// [`simple_logger`](https://crates.io/crates/simple_logger), rather than
	/// a packet callback. However, there are instances when you need access
	/// to the frames directly (for instance, to show them in an application),
	/// which is when a packet callback is most useful.
	///
	/// ## Example
	///
	/// ```
	/// # use sourcemeter::session::Session;
	/// # use std::sync::{Arc, Mutex};
	/// #
	/// # fn wrapper() -> Result<(), Box<dyn std::error::Error>> {
	/// let frames = Arc::new(Mutex::new(Vec::new()));
	/// let mut session = Session::open("TCPIP::192.168.1.20::INSTR")?;
	/// let frames_clone = Arc::clone(&frames);
	/// session.set_packet_handler(move |frame, dir| {
	///     if let Ok(mut frames) = frames_clone.lock() {
	///         frames.push((dir, String::from_utf8_lossy(frame).into_owned()));
	///     }
	/// });
	/// # Ok(())
	/// # }
	/// ```
	pub fn set_packet_handler<F>(&mut self, callback: F) -> Option<handlers::PacketHandler>
	where
		F: FnMut(&[u8], Direction) + Send + 'static,
	{
		self.handlers.packet.replace(Box::new(callback))
	}

	/// Clear any callback registered via [`set_packet_handler`](Session::set_packet_handler) and return it.
	pub fn clear_packet_handler(&mut self) -> Option<handlers::PacketHandler> {
		self.handlers.packet.take()
	}

	/// Set a callback that will be called with every [`LogRecord`] the
	/// session emits.
	///
	/// Records carry the id of the operation that emitted them, so that
	/// related records can be grouped. If a previous callback was set, it is
	/// returned.
	pub fn set_record_handler<F>(&mut self, callback: F) -> Option<handlers::RecordHandler>
	where
		F: FnMut(&LogRecord) + Send + 'static,
	{
		self.handlers.record.replace(Box::new(callback))
	}

	/// Clear any callback registered via [`set_record_handler`](Session::set_record_handler) and return it.
	pub fn clear_record_handler(&mut self) -> Option<handlers::RecordHandler> {
		self.handlers.record.take()
	}
}

impl<B: Backend> Drop for Session<B> {
	fn drop(&mut self) {
		if let Err(e) = self.close() {
			log::warn!(
				"{}: failed to close session: {e}",
				self.backend
					.name()
					.unwrap_or_else(|| UNKNOWN_BACKEND_NAME.to_string())
			);
		}
	}
}
