//! Types that can exchange (read/write) bytes with a connected instrument.
//!
//! The [`Backend`] trait represents all such types. Transports the crate does
//! not provide, such as a vendor's instrument driver, can carry a
//! [`Session`](crate::session::Session) by implementing it.

use std::io;
use std::time::Duration;

use serialport as sp;

#[cfg(windows)]
use sp::COMPort as ExternSerial;
use sp::SerialPort;
#[cfg(unix)]
use sp::TTYPort as ExternSerial;

#[cfg(any(test, feature = "mock"))]
mod simulator;
#[cfg(any(test, feature = "mock"))]
pub use simulator::SimulatedSourceMeter;

/// The placeholder name for a backend that doesn't have a name.
pub(crate) const UNKNOWN_BACKEND_NAME: &str = "<unknown backend>";

/// Types that allow reading and writing bytes with a connected instrument.
pub trait Backend: io::Read + io::Write {
	/// Set the read timeout.
	///
	/// If timeout is `None`, reads will block indefinitely.
	fn set_read_timeout(&mut self, timeout: Option<Duration>) -> Result<(), io::Error>;

	/// Get the read timeout.
	///
	/// If timeout is `None`, reads will block indefinitely.
	fn read_timeout(&self) -> Result<Option<Duration>, io::Error>;

	/// Get the "name" of the backend.
	///
	/// This can be in any format, but should uniquely identify the backend
	/// instance.
	fn name(&self) -> Option<String>;

	/// Release the underlying handle.
	///
	/// Calling this more than once must not fail. Handles that are released
	/// when dropped need not do anything here.
	fn close(&mut self) -> Result<(), io::Error> {
		Ok(())
	}
}

impl<C: Backend + ?Sized> Backend for Box<C> {
	fn set_read_timeout(&mut self, timeout: Option<Duration>) -> Result<(), io::Error> {
		(**self).set_read_timeout(timeout)
	}
	fn read_timeout(&self) -> Result<Option<Duration>, io::Error> {
		(**self).read_timeout()
	}
	fn name(&self) -> Option<String> {
		(**self).name()
	}
	fn close(&mut self) -> Result<(), io::Error> {
		(**self).close()
	}
}

impl<C: Backend + ?Sized> Backend for &mut C {
	fn set_read_timeout(&mut self, timeout: Option<Duration>) -> Result<(), io::Error> {
		(**self).set_read_timeout(timeout)
	}
	fn read_timeout(&self) -> Result<Option<Duration>, io::Error> {
		(**self).read_timeout()
	}
	fn name(&self) -> Option<String> {
		(**self).name()
	}
	fn close(&mut self) -> Result<(), io::Error> {
		(**self).close()
	}
}

impl Backend for std::net::TcpStream {
	fn set_read_timeout(&mut self, timeout: Option<Duration>) -> Result<(), io::Error> {
		std::net::TcpStream::set_read_timeout(self, timeout)
	}
	fn read_timeout(&self) -> Result<Option<Duration>, io::Error> {
		std::net::TcpStream::read_timeout(self)
	}
	fn name(&self) -> Option<String> {
		self.peer_addr().map(|addr| format!("{addr}")).ok()
	}
	fn close(&mut self) -> Result<(), io::Error> {
		match self.shutdown(std::net::Shutdown::Both) {
			// Already shut down
			Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
			result => result,
		}
	}
}

/// A platform agnostic serial port backend.
//
// The `serialport` crate exposes two platform specific serial ports, `COMPort`
// and `TTYPort` for windows and unix, respectively. Wrapping whichever one the
// platform uses in a new type keeps platform specific types out of the API
// without dynamic dispatch or an extra type parameter.
#[derive(Debug)]
pub struct Serial(pub(crate) ExternSerial);

impl io::Read for Serial {
	fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
		self.0.read(buf)
	}
}

impl io::Write for Serial {
	fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
		self.0.write(buf)
	}

	fn flush(&mut self) -> io::Result<()> {
		self.0.flush()
	}
}

impl Backend for Serial {
	fn set_read_timeout(&mut self, timeout: Option<Duration>) -> Result<(), io::Error> {
		// The serialport API does not support infinite timeouts, so simply set
		// the timeout to the largest possible duration if `timeout` is `None`,
		// which is practically infinite.
		Ok(self.0.set_timeout(timeout.unwrap_or(Duration::MAX))?)
	}
	fn read_timeout(&self) -> Result<Option<Duration>, io::Error> {
		Ok(Some(self.0.timeout()))
	}
	fn name(&self) -> Option<String> {
		self.0.name()
	}
}

/// A function that produces the instrument's response to a line written to a [`Mock`].
#[cfg(any(test, feature = "mock"))]
pub type Responder = Box<dyn FnMut(&str) -> Option<Vec<u8>> + Send>;

/// A mock backend for use in testing.
///
/// It has the following features:
///   * It records all data written to it.
///   * It can be filled with data for reading, either directly or by a
///     responder that is called with each complete line written to it.
///   * Specific errors can be inserted for calls to `read`, `write`, `flush`,
///     and `set_read_timeout`.
///
/// When there is no data to read, reads fail immediately with
/// [`io::ErrorKind::TimedOut`], as a real transport would after its read
/// timeout.
#[cfg(any(test, feature = "mock"))]
pub struct Mock {
	/// The buffer data is read from
	buffer: io::Cursor<Vec<u8>>,
	/// Everything written to the mock.
	written: Vec<u8>,
	/// The written bytes that have not yet formed a complete line.
	partial_line: Vec<u8>,
	/// The function generating responses to complete lines, if any.
	responder: Option<Responder>,
	/// The error to surface on the next read, if any. It is only surfaced once.
	read_error: Option<io::Error>,
	/// The error to surface on the next write, if any. It is only surfaced once.
	write_error: Option<io::Error>,
	/// The error to surface on the next flush, if any. It is only surfaced once.
	flush_error: Option<io::Error>,
	/// The error to surface on the next set_read_timeout, if any. It is only surfaced once.
	set_read_timeout_error: Option<io::Error>,
	/// The read timeout, which is ignored.
	ignored_read_timeout: Option<Duration>,
	/// The number of times `close` was called.
	close_count: usize,
}

#[cfg(any(test, feature = "mock"))]
impl Mock {
	/// Create a new Mock backend.
	pub fn new() -> Self {
		Mock {
			buffer: io::Cursor::new(Vec::new()),
			written: Vec::new(),
			partial_line: Vec::new(),
			responder: None,
			read_error: None,
			write_error: None,
			flush_error: None,
			set_read_timeout_error: None,
			ignored_read_timeout: Some(Duration::ZERO),
			close_count: 0,
		}
	}
	/// Create a new Mock backend that answers each complete line written to it
	/// with the output of `responder`.
	///
	/// Lines are terminated by either `\n` or `\r`, and are passed to the
	/// responder without the terminator.
	pub fn with_responder<F>(responder: F) -> Self
	where
		F: FnMut(&str) -> Option<Vec<u8>> + Send + 'static,
	{
		Mock {
			responder: Some(Box::new(responder)),
			..Mock::new()
		}
	}
	/// Append data to the read buffer.
	///
	/// The data is not validated in any way.
	pub fn append_data<T: AsRef<[u8]>>(&mut self, bytes: T) {
		self.buffer.get_mut().extend_from_slice(bytes.as_ref());
	}
	/// Clear the read buffer.
	pub fn clear_buffer(&mut self) {
		self.buffer.get_mut().clear();
		self.buffer.set_position(0);
	}
	/// Whether the mock has any data available or not
	pub fn is_empty(&self) -> bool {
		self.buffer.position() as usize >= self.buffer.get_ref().len()
	}
	/// All bytes written to the mock.
	pub fn written(&self) -> &[u8] {
		&self.written
	}
	/// The lines written to the mock, without terminators.
	pub fn written_lines(&self) -> Vec<String> {
		String::from_utf8_lossy(&self.written)
			.split(['\n', '\r'])
			.filter(|line| !line.is_empty())
			.map(str::to_string)
			.collect()
	}
	/// Forget everything written to the mock so far.
	pub fn clear_written(&mut self) {
		self.written.clear();
	}
	/// The number of times the backend was closed.
	pub fn close_count(&self) -> usize {
		self.close_count
	}
	/// Set the error for the next `read`, if any.
	pub fn read_error(&mut self, err: Option<io::Error>) {
		self.read_error = err;
	}
	/// Set the error for the next `write`, if any.
	pub fn write_error(&mut self, err: Option<io::Error>) {
		self.write_error = err;
	}
	/// Set the error for the next `flush`, if any.
	pub fn flush_error(&mut self, err: Option<io::Error>) {
		self.flush_error = err;
	}
	/// Set the error for the next `set_read_timeout`, if any.
	pub fn set_read_timeout_error(&mut self, err: Option<io::Error>) {
		self.set_read_timeout_error = err;
	}
	/// Pass complete lines in `partial_line` to the responder.
	fn respond_to_lines(&mut self) {
		while let Some(end) = self
			.partial_line
			.iter()
			.position(|&b| b == b'\n' || b == b'\r')
		{
			let line: Vec<u8> = self.partial_line.drain(..=end).collect();
			let line = String::from_utf8_lossy(&line[..end]).into_owned();
			if line.is_empty() {
				continue;
			}
			if let Some(responder) = self.responder.as_mut() {
				if let Some(response) = (responder)(&line) {
					self.append_data(response);
				}
			}
		}
	}
}

#[cfg(any(test, feature = "mock"))]
impl Default for Mock {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(any(test, feature = "mock"))]
impl std::fmt::Debug for Mock {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Mock")
			.field("buffer", &self.buffer)
			.field("written", &String::from_utf8_lossy(&self.written))
			.field("responder", &self.responder.is_some())
			.field("close_count", &self.close_count)
			.finish_non_exhaustive()
	}
}

#[cfg(any(test, feature = "mock"))]
impl Backend for Mock {
	fn set_read_timeout(&mut self, timeout: Option<Duration>) -> Result<(), io::Error> {
		if let Some(err) = self.set_read_timeout_error.take() {
			Err(err)
		} else {
			self.ignored_read_timeout = timeout;
			Ok(())
		}
	}

	fn read_timeout(&self) -> Result<Option<Duration>, io::Error> {
		Ok(self.ignored_read_timeout)
	}

	fn name(&self) -> Option<String> {
		Some(format!("<mock 0x{:x}>", self as *const Mock as usize))
	}

	fn close(&mut self) -> Result<(), io::Error> {
		self.close_count += 1;
		Ok(())
	}
}

#[cfg(any(test, feature = "mock"))]
impl io::Read for Mock {
	fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
		if let Some(err) = self.read_error.take() {
			Err(err)
		} else if self.is_empty() {
			// For a real device, having no data ready would result in a wait
			// and then eventual timeout error. However, as our data is in
			// memory that does not happen here. So simulate that behaviour by
			// returning a timeout error immediately.
			Err(io::Error::new(
				io::ErrorKind::TimedOut,
				"Simulated timeout error",
			))
		} else {
			self.buffer.read(buf)
		}
	}
}

#[cfg(any(test, feature = "mock"))]
impl io::Write for Mock {
	fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
		if let Some(err) = self.write_error.take() {
			Err(err)
		} else {
			self.written.extend_from_slice(buf);
			self.partial_line.extend_from_slice(buf);
			self.respond_to_lines();
			Ok(buf.len())
		}
	}

	fn flush(&mut self) -> io::Result<()> {
		if let Some(err) = self.flush_error.take() {
			Err(err)
		} else {
			Ok(())
		}
	}
}
