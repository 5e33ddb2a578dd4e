//! Handlers for events on a session.
#[cfg(doc)]
use super::Session;
use super::Direction;

/// A callback that is called after a frame is either transmitted or received.
///
/// See [`Session::set_packet_handler`] for more details.
pub type PacketHandler = Box<dyn FnMut(&[u8], Direction) + Send>;

/// A callback that is called with every log record the session emits.
///
/// See [`Session::set_record_handler`] for more details.
pub type RecordHandler = Box<dyn FnMut(&LogRecord) + Send>;

/// A log record emitted by a session.
///
/// The same records are also emitted through the [`log`] crate.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LogRecord {
    level: log::Level,
    operation: u64,
    message: String,
}

impl LogRecord {
    pub(crate) fn new(level: log::Level, operation: u64, message: String) -> Self {
        LogRecord {
            level,
            operation,
            message,
        }
    }

    /// The severity of the record.
    pub fn level(&self) -> log::Level {
        self.level
    }

    /// The id of the session operation that emitted the record.
    ///
    /// Ids increase monotonically over the life of a session, so records
    /// that share an id belong to the same operation.
    pub fn operation(&self) -> u64 {
        self.operation
    }

    /// The message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl std::fmt::Display for LogRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{} op {}] {}", self.level, self.operation, self.message)
    }
}

/// The event handlers registered on a session.
#[derive(Default)]
pub(super) struct Handlers {
    pub(super) packet: Option<PacketHandler>,
    pub(super) record: Option<RecordHandler>,
}

impl std::fmt::Debug for Handlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handlers")
            .field("packet", &self.packet.is_some())
            .field("record", &self.record.is_some())
            .finish()
    }
}
