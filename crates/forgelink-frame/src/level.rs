use std::fmt;

/// Severity carried in byte 1 of every log message.
///
/// Ordinals match the editor's console levels. Unknown ordinals are kept so
/// a newer engine never loses lines on an older editor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogLevel {
    Trace,
    Info,
    Warn,
    Error,
    Fatal,
    Unknown(u8),
}

impl LogLevel {
    /// Highest ordinal with a named level.
    pub const MAX_KNOWN: u8 = 4;

    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => LogLevel::Trace,
            1 => LogLevel::Info,
            2 => LogLevel::Warn,
            3 => LogLevel::Error,
            4 => LogLevel::Fatal,
            other => LogLevel::Unknown(other),
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            LogLevel::Trace => 0,
            LogLevel::Info => 1,
            LogLevel::Warn => 2,
            LogLevel::Error => 3,
            LogLevel::Fatal => 4,
            LogLevel::Unknown(other) => other,
        }
    }

    pub fn is_known(self) -> bool {
        !matches!(self, LogLevel::Unknown(_))
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
            LogLevel::Fatal => "fatal",
            LogLevel::Unknown(_) => "unknown",
        }
    }
}

impl From<u8> for LogLevel {
    fn from(value: u8) -> Self {
        Self::from_u8(value)
    }
}

impl From<LogLevel> for u8 {
    fn from(level: LogLevel) -> Self {
        level.as_u8()
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Unknown(value) => write!(f, "level({value})"),
            known => f.write_str(known.as_str()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordinals_are_stable() {
        for value in 0..=LogLevel::MAX_KNOWN {
            let level = LogLevel::from_u8(value);
            assert!(level.is_known());
            assert_eq!(level.as_u8(), value);
        }
        assert_eq!(LogLevel::from_u8(1), LogLevel::Info);
        assert_eq!(LogLevel::from_u8(2), LogLevel::Warn);
    }

    #[test]
    fn unknown_ordinals_survive() {
        let level = LogLevel::from(9);
        assert_eq!(level, LogLevel::Unknown(9));
        assert_eq!(u8::from(level), 9);
        assert_eq!(level.to_string(), "level(9)");
    }
}
