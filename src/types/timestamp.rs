//! Timestamp record formatting

use chrono::{DateTime, Local, TimeZone};
use std::fmt::{Display, Write};

/// Renders `<tag><formatted time>\n` records for the log
#[derive(Debug, Clone)]
pub struct TimestampFormat {
    tag: String,
    time_format: String,
}

impl TimestampFormat {
    /// Create a formatter from a literal tag and a strftime pattern
    pub fn new(tag: impl Into<String>, time_format: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            time_format: time_format.into(),
        }
    }

    /// Record for the given instant. Returns None if the pattern cannot be rendered.
    pub fn record_at<Tz>(&self, time: &DateTime<Tz>) -> Option<String>
    where
        Tz: TimeZone,
        Tz::Offset: Display,
    {
        let mut record = String::with_capacity(self.tag.len() + 40);
        record.push_str(&self.tag);
        write!(record, "{}", time.format(&self.time_format)).ok()?;
        record.push('\n');
        Some(record)
    }

    /// Record for the current local wall-clock time
    pub fn record_now(&self) -> Option<String> {
        self.record_at(&Local::now())
    }
}
