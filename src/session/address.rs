//! Instrument resource addresses and the pre-connect probe.

use super::ConnectStage;
use crate::error::ConnectError;
use std::{
    io,
    net::{Shutdown, SocketAddr, TcpStream},
    time::Duration,
};

/// The raw SCPI socket port used for `TCPIP::<host>::INSTR` resources.
pub const SCPI_SOCKET_PORT: u16 = 5025;

/// The auxiliary ports probed, in order, before a network connection is opened.
///
/// Opening and closing these ports makes the instrument release a session
/// left behind by a previous client that went away without closing it.
pub const PROBE_PORTS: [u16; 2] = [1024, 111];

/// The location of an instrument.
///
/// ## Example
///
/// ```rust
/// # use sourcemeter::session::ResourceAddress;
/// let address = ResourceAddress::parse("TCPIP::192.168.1.20::INSTR")?;
/// assert_eq!(
///     address,
///     ResourceAddress::Tcp { host: "192.168.1.20".into(), port: 5025 }
/// );
/// # Ok::<(), sourcemeter::error::ConnectError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResourceAddress {
    /// A raw socket on a networked instrument.
    Tcp {
        /// The host name or IP address.
        host: String,
        /// The port.
        port: u16,
    },
    /// A serial device.
    Serial {
        /// The path of the device, e.g. `/dev/ttyUSB0` or `COM3`.
        path: String,
    },
}

impl ResourceAddress {
    /// Parse a resource string.
    ///
    /// The accepted forms are:
    ///   * `TCPIP::<host>::<port>::SOCKET`
    ///   * `TCPIP[n]::<host>[::<device>]::INSTR`, which uses the raw SCPI socket port 5025
    ///   * `ASRL<path>::INSTR`, where a numeric path `n` means `COMn`
    ///   * `<host>:<port>`
    ///   * a device path starting with `/` or of the form `COMn`
    pub fn parse(resource: &str) -> Result<Self, ConnectError> {
        let invalid = |reason: &str| {
            ConnectError::new(
                ConnectStage::Uninit,
                resource,
                io::Error::new(io::ErrorKind::InvalidInput, reason.to_string()),
            )
        };
        let trimmed = resource.trim();
        let upper = trimmed.to_ascii_uppercase();

        if upper.starts_with("TCPIP") {
            let parts: Vec<&str> = trimmed.split("::").collect();
            let kind = parts.last().map(|kind| kind.to_ascii_uppercase());
            return match (kind.as_deref(), parts.len()) {
                (Some("SOCKET"), 4) => Ok(ResourceAddress::Tcp {
                    host: parts[1].to_string(),
                    port: parts[2]
                        .parse()
                        .map_err(|_| invalid("socket port is not a number"))?,
                }),
                (Some("INSTR"), 3 | 4) => Ok(ResourceAddress::Tcp {
                    host: parts[1].to_string(),
                    port: SCPI_SOCKET_PORT,
                }),
                _ => Err(invalid("expected a `::SOCKET` or `::INSTR` TCPIP resource")),
            };
        }

        if upper.starts_with("ASRL") {
            let path = upper
                .ends_with("::INSTR")
                .then(|| &trimmed[4..trimmed.len() - "::INSTR".len()])
                .filter(|path| !path.is_empty())
                .ok_or_else(|| invalid("expected `ASRL<path>::INSTR`"))?;
            let path = if path.bytes().all(|b| b.is_ascii_digit()) {
                format!("COM{path}")
            } else {
                path.to_string()
            };
            return Ok(ResourceAddress::Serial { path });
        }

        if trimmed.starts_with('/') || is_com_port(&upper) {
            return Ok(ResourceAddress::Serial {
                path: trimmed.to_string(),
            });
        }

        if let Some((host, port)) = trimmed.rsplit_once(':') {
            if !host.is_empty() {
                if let Ok(port) = port.parse() {
                    return Ok(ResourceAddress::Tcp {
                        host: host.to_string(),
                        port,
                    });
                }
            }
        }

        Err(invalid("unrecognized resource string"))
    }

    /// Whether the instrument is reached over the network.
    pub fn is_network(&self) -> bool {
        matches!(self, ResourceAddress::Tcp { .. })
    }
}

impl std::str::FromStr for ResourceAddress {
    type Err = ConnectError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ResourceAddress::parse(s)
    }
}

impl std::fmt::Display for ResourceAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceAddress::Tcp { host, port } => write!(f, "TCPIP::{host}::{port}::SOCKET"),
            ResourceAddress::Serial { path } => write!(f, "ASRL{path}::INSTR"),
        }
    }
}

/// Whether `name` is of the form `COMn`.
fn is_com_port(name: &str) -> bool {
    name.strip_prefix("COM")
        .is_some_and(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
}

/// Open and immediately shut down connections to the [`PROBE_PORTS`] on the
/// host at `address`, in order.
///
/// A failed probe is logged and tolerated, unless `address` uses the probed
/// port itself.
pub(crate) fn probe_auxiliary_ports(
    address: SocketAddr,
    timeout: Duration,
) -> Result<(), ConnectError> {
    for port in PROBE_PORTS {
        let mut probe = address;
        probe.set_port(port);
        log::debug!("{address}: probing {probe}");
        let result = TcpStream::connect_timeout(&probe, timeout)
            .and_then(|stream| stream.shutdown(Shutdown::Both));
        match result {
            Ok(()) => {}
            Err(e) if port == address.port() => {
                return Err(ConnectError::new(
                    ConnectStage::Probing,
                    &address.to_string(),
                    e,
                ));
            }
            Err(e) => log::debug!("{address}: probe of {probe} failed, ignoring: {e}"),
        }
    }
    Ok(())
}
