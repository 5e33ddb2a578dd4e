//! The instrument's status byte and event log records.
//!
//! Both are decoded once, where they enter the crate, into typed values. The
//! rest of the crate never compares raw strings from the instrument.

use crate::error::MalformedResponseError;

/// The query that returns the next record of the event log.
pub(crate) const EVENT_LOG_NEXT: &str = ":SYSTEM:EVENTLOG:NEXT?";

/// The IEEE-488.2 status byte, as returned by `*STB?`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct StatusByte(u8);

/// Define the named bits of the status byte.
///
/// Each bit is written as `<bit>: <name words>`. A constant and an accessor
/// are generated for each bit, named after the words.
macro_rules! status_bits {
    (
        $(
            $bit:literal: $($word:ident)+
        ),+
        $(,)?
    ) => {
        paste::paste! {
            status_bits!{@main $( $bit, $($word)+, [< $($word:camel)+ >] ),+ }
        }
    };

    (@main $( $bit:literal, $($word:ident)+, $name:ident ),+ ) => {
        paste::paste! {
            impl StatusByte {
                $(
                    #[doc = "A status byte with only the `" $name "` bit (bit " $bit ") set."]
                    pub const [< $name:snake:upper >]: StatusByte = StatusByte(1 << $bit);

                    #[doc = "Whether the `" $name "` bit (bit " $bit ") is set."]
                    pub fn [< $name:snake >](self) -> bool {
                        self.0 & (1 << $bit) != 0
                    }
                )+

                /// The names of the bits that are set, from least to most significant.
                pub fn set_bit_names(self) -> impl Iterator<Item = &'static str> {
                    [$( ($bit, stringify!($($word)+)) ),+]
                        .into_iter()
                        .filter(move |(bit, _)| self.0 & (1 << bit) != 0)
                        .map(|(_, name)| name)
                }
            }
        }
    };
}

status_bits! {
    0: measurement summary,
    2: error available,
    3: questionable summary,
    4: message available,
    5: event summary,
    6: master summary,
    7: operation summary,
}

impl StatusByte {
    /// The status bytes that indicate an idle instrument with nothing to report.
    ///
    /// Besides zero, the instrument may report only the master summary bit or
    /// only the operation summary bit while idle.
    pub const IDLE: [StatusByte; 3] = [
        StatusByte(0),
        StatusByte::MASTER_SUMMARY,
        StatusByte::OPERATION_SUMMARY,
    ];

    /// Create a status byte from its raw value.
    pub const fn new(value: u8) -> Self {
        StatusByte(value)
    }

    /// The raw value of the status byte.
    pub const fn get(self) -> u8 {
        self.0
    }

    /// Whether the status byte indicates an idle instrument.
    ///
    /// Anything else is an anomaly and the event log should be inspected.
    pub fn is_idle(self) -> bool {
        StatusByte::IDLE.contains(&self)
    }

    /// Parse the response to `*STB?`.
    pub(crate) fn parse(command: &str, response: &str) -> Result<Self, MalformedResponseError> {
        // Some firmware reports the byte as a float, e.g. "64.0".
        let trimmed = response.trim();
        if let Ok(value) = trimmed.parse::<u8>() {
            return Ok(StatusByte(value));
        }
        match trimmed.parse::<f64>() {
            Ok(value) if value.fract() == 0.0 && (0.0..=255.0).contains(&value) => {
                Ok(StatusByte(value as u8))
            }
            _ => Err(MalformedResponseError::new(
                command,
                response,
                "expected an integer between 0 and 255",
            )),
        }
    }
}

impl From<u8> for StatusByte {
    fn from(value: u8) -> Self {
        StatusByte(value)
    }
}

impl std::fmt::Display for StatusByte {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)?;
        let mut names = self.set_bit_names().peekable();
        if names.peek().is_some() {
            write!(f, " (")?;
            for (i, name) in names.enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{name}")?;
            }
            write!(f, ")")?;
        }
        Ok(())
    }
}

/// The category of an event log record.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum EventCategory {
    /// An error occurred.
    Error,
    /// Something happened that may need attention.
    Warning,
    /// Informational only.
    Information,
    /// A category the crate does not recognize, with its raw code.
    Other(u32),
}

impl From<u32> for EventCategory {
    fn from(code: u32) -> Self {
        match code {
            1 => EventCategory::Error,
            2 => EventCategory::Warning,
            4 => EventCategory::Information,
            other => EventCategory::Other(other),
        }
    }
}

impl std::fmt::Display for EventCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventCategory::Error => write!(f, "error"),
            EventCategory::Warning => write!(f, "warning"),
            EventCategory::Information => write!(f, "information"),
            EventCategory::Other(code) => write!(f, "category {code}"),
        }
    }
}

/// A record drained from the instrument's event log.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StatusEvent {
    code: i32,
    description: String,
    category: EventCategory,
    timestamp: String,
}

impl StatusEvent {
    /// Create an event.
    pub fn new<D, T>(code: i32, description: D, category: EventCategory, timestamp: T) -> Self
    where
        D: Into<String>,
        T: Into<String>,
    {
        StatusEvent {
            code,
            description: description.into(),
            category,
            timestamp: timestamp.into(),
        }
    }

    /// Parse a record of the form `<code>,"<description>;<category>;<timestamp>"`.
    pub(crate) fn parse(record: &str) -> Result<Self, MalformedResponseError> {
        let malformed = |reason| MalformedResponseError::new(EVENT_LOG_NEXT, record, reason);

        let (code, message) = record
            .trim()
            .split_once(',')
            .ok_or_else(|| malformed("expected `<code>,\"<message>\"`"))?;
        let code = code
            .trim()
            .parse::<i32>()
            .map_err(|_| malformed("event code is not an integer"))?;
        let message = message.trim().trim_matches('"');

        let mut fields = message.splitn(3, ';');
        let description = fields.next().unwrap_or_default().trim();
        let category = match fields.next() {
            Some(category) => category
                .trim()
                .parse::<u32>()
                .map_err(|_| malformed("event category is not an integer"))?,
            None => 0,
        };
        let timestamp = fields.next().unwrap_or_default().trim();

        Ok(StatusEvent::new(
            code,
            description,
            EventCategory::from(category),
            timestamp,
        ))
    }

    /// The event code. Zero means the log is empty.
    pub fn code(&self) -> i32 {
        self.code
    }

    /// Whether this record marks the end of the log.
    pub fn is_end_of_log(&self) -> bool {
        self.code == 0
    }

    /// The description of the event.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// The category of the event.
    pub fn category(&self) -> EventCategory {
        self.category
    }

    /// When the event occurred, as reported by the instrument.
    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }
}

impl std::fmt::Display for StatusEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {} ({}", self.code, self.description, self.category)?;
        if !self.timestamp.is_empty() {
            write!(f, ", {}", self.timestamp)?;
        }
        write!(f, ")")
    }
}
