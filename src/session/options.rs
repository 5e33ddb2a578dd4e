//! Types defining the different options when opening a session.

use super::{address::probe_auxiliary_ports, ConnectStage, Session, POLL_SLICE};
use crate::{
    backend::{Backend, Serial},
    error::{ConnectError, Error},
};
use serialport as sp;
use std::{
    net::{SocketAddr, TcpStream, ToSocketAddrs},
    time::Duration,
};

/// The default timeout for a single query: 1 second.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(1000);

/// A boxed backend that can be moved to another thread.
pub type DynBackend = Box<dyn Backend + Send>;

/// Options for configuring and opening a session over a serial port.
///
/// ## Example
///
/// ```rust
/// # use sourcemeter::session::OpenSerialOptions;
/// # use std::time::Duration;
/// # fn wrapper() -> Result<(), Box<dyn std::error::Error>> {
/// let mut session = OpenSerialOptions::new()
///     .timeout(Duration::from_millis(2000))
///     .open("/dev/ttyUSB0")?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct OpenSerialOptions {
    /// The custom baud rate
    baud_rate: u32,
    /// The custom timeout
    timeout: Duration,
    /// The byte that ends every command and response.
    terminator: u8,
}

impl OpenSerialOptions {
    /// The default baud rate: 57,600.
    pub const DEFAULT_BAUD_RATE: u32 = 57_600;
    /// The default line terminator: carriage return.
    pub const DEFAULT_TERMINATOR: u8 = b'\r';

    /// Create a blank set of options ready for configuration.
    ///
    /// The default baud rate, timeout and terminator are 57,600, 1 second and
    /// `\r`, respectively.
    ///
    /// Equivalent to [`default`](OpenSerialOptions::default).
    pub fn new() -> Self {
        OpenSerialOptions {
            baud_rate: OpenSerialOptions::DEFAULT_BAUD_RATE,
            timeout: DEFAULT_TIMEOUT,
            terminator: OpenSerialOptions::DEFAULT_TERMINATOR,
        }
    }

    /// Set a custom baud rate.
    ///
    /// The default is 57,600.
    pub fn baud_rate(&mut self, baud_rate: u32) -> &mut Self {
        self.baud_rate = baud_rate;
        self
    }

    /// Set a custom timeout for each query.
    ///
    /// The default is 1 second.
    pub fn timeout(&mut self, duration: Duration) -> &mut Self {
        self.timeout = duration;
        self
    }

    /// Set the line terminator.
    ///
    /// The default is `\r`.
    pub fn terminator(&mut self, terminator: u8) -> &mut Self {
        self.terminator = terminator;
        self
    }

    /// Open a [`Serial`] port at the specified path.
    fn open_serial_port(&self, path: &str) -> Result<Serial, ConnectError> {
        log::info!("{path}: {}", ConnectStage::Connecting);
        // The baud rate passed to `new` is ignored by some platforms. It must
        // be defined using the `baud_rate` method below.
        sp::new(path, OpenSerialOptions::DEFAULT_BAUD_RATE)
            .data_bits(sp::DataBits::Eight)
            .parity(sp::Parity::None)
            .flow_control(sp::FlowControl::None)
            .stop_bits(sp::StopBits::One)
            .timeout(POLL_SLICE)
            .baud_rate(self.baud_rate)
            .open_native()
            .map(Serial)
            .map_err(|e| ConnectError::new(ConnectStage::Connecting, path, Error::from(e)))
    }

    /// Open a session with the instrument at the specified path.
    pub fn open(&self, path: &str) -> Result<Session<Serial>, ConnectError> {
        Session::connect(
            self.open_serial_port(path)?,
            path,
            self.terminator,
            self.timeout,
        )
    }

    /// Open a session with the instrument at the specified path.
    ///
    /// The type of the underlying backend is erased via dynamic dispatch,
    /// which does have runtime overhead. [`OpenSerialOptions::open`] should
    /// generally be used instead, except when the type of the underlying
    /// backend may not be known at compile time.
    pub fn open_dyn(&self, path: &str) -> Result<Session<DynBackend>, ConnectError> {
        let backend: DynBackend = Box::new(self.open_serial_port(path)?);
        Session::connect(
            backend,
            path,
            self.terminator,
            self.timeout,
        )
    }
}

impl Default for OpenSerialOptions {
    fn default() -> Self {
        OpenSerialOptions::new()
    }
}

/// Options for configuring and opening a session over TCP.
///
/// ## Example
///
/// ```rust
/// # use sourcemeter::session::OpenTcpOptions;
/// # use std::time::Duration;
/// # fn wrapper() -> Result<(), Box<dyn std::error::Error>> {
/// let mut session = OpenTcpOptions::new()
///     .timeout(Duration::from_millis(2000))
///     .probe(false)
///     .open("192.168.0.1:5025")?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct OpenTcpOptions {
    /// The custom timeout
    timeout: Duration,
    /// The byte that ends every command and response.
    terminator: u8,
    /// Whether to probe the auxiliary ports before connecting.
    probe: bool,
}

impl OpenTcpOptions {
    /// The default line terminator: line feed.
    pub const DEFAULT_TERMINATOR: u8 = b'\n';

    /// Create a blank set of options ready for configuration.
    ///
    /// The default timeout and terminator are 1 second and `\n`,
    /// respectively. The auxiliary ports are probed by default.
    ///
    /// Equivalent to [`default`](OpenTcpOptions::default).
    pub fn new() -> Self {
        OpenTcpOptions {
            timeout: DEFAULT_TIMEOUT,
            terminator: OpenTcpOptions::DEFAULT_TERMINATOR,
            probe: true,
        }
    }

    /// Set a custom timeout for each query, which is also used when
    /// establishing connections.
    ///
    /// The default is 1 second.
    pub fn timeout(&mut self, duration: Duration) -> &mut Self {
        self.timeout = duration;
        self
    }

    /// Set the line terminator.
    ///
    /// The default is `\n`.
    pub fn terminator(&mut self, terminator: u8) -> &mut Self {
        self.terminator = terminator;
        self
    }

    /// Set whether the auxiliary ports, [`PROBE_PORTS`](super::PROBE_PORTS),
    /// are probed before connecting, to release a session abandoned by a
    /// previous client.
    ///
    /// The default is `true`.
    pub fn probe(&mut self, probe: bool) -> &mut Self {
        self.probe = probe;
        self
    }

    /// Open a [`TcpStream`] to the specified address, probing first if configured.
    fn open_tcp_stream(&self, address: &str) -> Result<(TcpStream, String), ConnectError> {
        let socket_address: SocketAddr = address
            .to_socket_addrs()
            .and_then(|mut addresses| {
                addresses.next().ok_or_else(|| {
                    std::io::Error::new(
                        std::io::ErrorKind::AddrNotAvailable,
                        "the address did not resolve",
                    )
                })
            })
            .map_err(|e| ConnectError::new(ConnectStage::Uninit, address, e))?;

        if self.probe {
            log::info!("{address}: {}", ConnectStage::Probing);
            probe_auxiliary_ports(socket_address, self.timeout)?;
        }

        log::info!("{address}: {}", ConnectStage::Connecting);
        let connecting = |e: std::io::Error| ConnectError::new(ConnectStage::Connecting, address, e);
        let stream = TcpStream::connect_timeout(&socket_address, self.timeout).map_err(connecting)?;
        stream.set_read_timeout(Some(POLL_SLICE)).map_err(connecting)?;
        stream.set_nodelay(true).map_err(connecting)?;
        Ok((stream, socket_address.to_string()))
    }

    /// Open a session with the instrument at the specified `<host>:<port>` address.
    pub fn open(&self, address: &str) -> Result<Session<TcpStream>, ConnectError> {
        let (stream, address) = self.open_tcp_stream(address)?;
        Session::connect(stream, &address, self.terminator, self.timeout)
    }

    /// Open a session with the instrument at the specified `<host>:<port>` address.
    ///
    /// The type of the underlying backend is erased via dynamic dispatch,
    /// which does have runtime overhead. [`OpenTcpOptions::open`] should
    /// generally be used instead, except when the type of the underlying
    /// backend may not be known at compile time.
    pub fn open_dyn(&self, address: &str) -> Result<Session<DynBackend>, ConnectError> {
        let (stream, address) = self.open_tcp_stream(address)?;
        let backend: DynBackend = Box::new(stream);
        Session::connect(backend, &address, self.terminator, self.timeout)
    }
}

impl Default for OpenTcpOptions {
    fn default() -> Self {
        OpenTcpOptions::new()
    }
}
