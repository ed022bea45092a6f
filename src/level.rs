use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Severity of a log record, ordered from least to most verbose.
///
/// A logger configured with a maximum level admits a record iff the record's
/// level is no more verbose than that maximum, i.e. `level <= max_level`.
///
/// ```
/// # use fault_logger::Level;
/// assert!(Level::Error < Level::Warning);
/// assert!(Level::InfoHigh < Level::Debug);
/// assert!(Level::Warning.admits(Level::Error));
/// assert!(!Level::Warning.admits(Level::InfoLow));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Level {
    Error = 0,
    Warning = 1,
    /// Low-noise informational output.
    InfoLow = 2,
    /// Medium-noise informational output.
    InfoMedium = 3,
    /// High-noise informational output.
    InfoHigh = 4,
    Debug = 5,
}

impl Level {
    pub const ALL: [Level; 6] = [
        Level::Error,
        Level::Warning,
        Level::InfoLow,
        Level::InfoMedium,
        Level::InfoHigh,
        Level::Debug,
    ];

    /// Name printed in the record header.
    pub const fn as_str(self) -> &'static str {
        match self {
            Level::Error => "Error",
            Level::Warning => "Warning",
            Level::InfoLow => "InfoV1",
            Level::InfoMedium => "InfoV2",
            Level::InfoHigh => "InfoV3",
            Level::Debug => "Debug",
        }
    }

    pub const fn from_u8(value: u8) -> Option<Level> {
        match value {
            0 => Some(Level::Error),
            1 => Some(Level::Warning),
            2 => Some(Level::InfoLow),
            3 => Some(Level::InfoMedium),
            4 => Some(Level::InfoHigh),
            5 => Some(Level::Debug),
            _ => None,
        }
    }

    /// Returns true if a record at `level` passes a threshold of `self`.
    #[inline(always)]
    pub fn admits(self, level: Level) -> bool {
        level <= self
    }

    /// Closest `log` crate filter, used when bridging the `log` facade.
    pub fn to_level_filter(self) -> log::LevelFilter {
        match self {
            Level::Error => log::LevelFilter::Error,
            Level::Warning => log::LevelFilter::Warn,
            Level::InfoLow | Level::InfoMedium | Level::InfoHigh => log::LevelFilter::Info,
            Level::Debug => log::LevelFilter::Trace,
        }
    }
}

impl From<log::Level> for Level {
    fn from(level: log::Level) -> Self {
        match level {
            log::Level::Error => Level::Error,
            log::Level::Warn => Level::Warning,
            log::Level::Info => Level::InfoLow,
            log::Level::Debug | log::Level::Trace => Level::Debug,
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Level {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let level = match s.trim().to_ascii_lowercase().as_str() {
            "error" | "err" => Level::Error,
            "warning" | "warn" => Level::Warning,
            "info" | "infolow" | "infov1" => Level::InfoLow,
            "infomedium" | "infov2" => Level::InfoMedium,
            "infohigh" | "infov3" | "verbose" => Level::InfoHigh,
            "debug" => Level::Debug,
            _ => return Err(Error::InvalidLevel(s.to_string())),
        };
        Ok(level)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordering_matches_verbosity() {
        for pair in Level::ALL.windows(2) {
            assert!(pair[0] < pair[1]);
        }
    }

    #[test]
    fn test_threshold_admits() {
        assert!(Level::Debug.admits(Level::Debug));
        assert!(Level::Debug.admits(Level::Error));
        assert!(Level::Error.admits(Level::Error));
        assert!(!Level::Error.admits(Level::Warning));
        assert!(!Level::InfoMedium.admits(Level::InfoHigh));
    }

    #[test]
    fn test_parse_names() {
        assert_eq!("Error".parse::<Level>().unwrap(), Level::Error);
        assert_eq!("warn".parse::<Level>().unwrap(), Level::Warning);
        assert_eq!("InfoV2".parse::<Level>().unwrap(), Level::InfoMedium);
        assert_eq!(" verbose ".parse::<Level>().unwrap(), Level::InfoHigh);
        assert!("loud".parse::<Level>().is_err());
    }

    #[test]
    fn test_round_trip_through_u8() {
        for level in Level::ALL {
            assert_eq!(Level::from_u8(level as u8), Some(level));
        }
        assert_eq!(Level::from_u8(6), None);
    }
}
