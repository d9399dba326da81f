use std::{error::Error, fmt::Display, num::ParseFloatError, ops::Range, str::FromStr};

use serde::{Deserialize, Serialize};

/// A retention time window in the units of the source file, usually minutes
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: f64,
    pub end: f64,
}

impl TimeRange {
    pub fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, time: f64) -> bool {
        self.start <= time && time <= self.end
    }

    /// Whether `time` lies past the end of the window, after which no later scan can match
    pub fn is_past(&self, time: f64) -> bool {
        time > self.end
    }
}

impl Default for TimeRange {
    fn default() -> Self {
        Self {
            start: 0.0,
            end: f64::INFINITY,
        }
    }
}

impl Display for TimeRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.end.is_finite() {
            write!(f, "{}-{}", self.start, self.end)
        } else {
            write!(f, "{}-", self.start)
        }
    }
}

#[derive(Debug)]
pub enum TimeRangeParseError {
    MalformedStart(ParseFloatError),
    MalformedEnd(ParseFloatError),
    Inverted(f64, f64),
}

impl Display for TimeRangeParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TimeRangeParseError::MalformedStart(e) => {
                write!(f, "Failed to parse time range start {e}")
            }
            TimeRangeParseError::MalformedEnd(e) => {
                write!(f, "Failed to parse time range end {e}")
            }
            TimeRangeParseError::Inverted(start, end) => {
                write!(f, "The time range start {start} is after its end {end}")
            }
        }
    }
}

impl Error for TimeRangeParseError {}

impl FromStr for TimeRange {
    type Err = TimeRangeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let mut tokens = if s.contains(' ') {
            s.split(' ')
        } else if s.contains(':') {
            s.split(':')
        } else if s.contains('-') {
            s.split('-')
        } else {
            s.split(' ')
        };
        let start_s = tokens.next().unwrap_or_default();
        let start_t = if start_s.is_empty() {
            0.0
        } else {
            start_s.parse().map_err(TimeRangeParseError::MalformedStart)?
        };
        let end_s = tokens.next().unwrap_or_default();
        let end_t = if end_s.is_empty() {
            f64::INFINITY
        } else {
            end_s.parse().map_err(TimeRangeParseError::MalformedEnd)?
        };
        if start_t > end_t {
            return Err(TimeRangeParseError::Inverted(start_t, end_t));
        }
        Ok(TimeRange {
            start: start_t,
            end: end_t,
        })
    }
}

impl From<Range<f64>> for TimeRange {
    fn from(value: Range<f64>) -> Self {
        Self::new(value.start, value.end)
    }
}

impl From<(f64, f64)> for TimeRange {
    fn from(value: (f64, f64)) -> Self {
        Self::new(value.0, value.1)
    }
}
