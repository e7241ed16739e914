use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// Rendering of the timestamp prepended to every captured output line.
///
/// Parsed from config as a keyword; anything unrecognized is treated as a
/// strftime pattern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TimestampFormat {
    Iso8601,
    Rfc3339,
    UnixSeconds,
    UnixMillis,
    UnixNanos,
    Custom(String),
}

impl Default for TimestampFormat {
    fn default() -> Self {
        Self::Iso8601
    }
}

impl From<String> for TimestampFormat {
    fn from(value: String) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "" | "iso8601" => Self::Iso8601,
            "rfc3339" => Self::Rfc3339,
            "unix" => Self::UnixSeconds,
            "unix-ms" | "unixms" => Self::UnixMillis,
            "unix-nano" | "unixnano" => Self::UnixNanos,
            _ => Self::Custom(value),
        }
    }
}

impl From<TimestampFormat> for String {
    fn from(value: TimestampFormat) -> Self {
        match value {
            TimestampFormat::Iso8601 => "iso8601".to_string(),
            TimestampFormat::Rfc3339 => "rfc3339".to_string(),
            TimestampFormat::UnixSeconds => "unix".to_string(),
            TimestampFormat::UnixMillis => "unix-ms".to_string(),
            TimestampFormat::UnixNanos => "unix-nano".to_string(),
            TimestampFormat::Custom(pattern) => pattern,
        }
    }
}

impl TimestampFormat {
    pub fn render(&self, at: DateTime<Local>) -> String {
        match self {
            Self::Iso8601 => at.format("%Y-%m-%dT%H:%M:%S%.3f%:z").to_string(),
            Self::Rfc3339 => at.to_rfc3339(),
            Self::UnixSeconds => at.timestamp().to_string(),
            Self::UnixMillis => at.timestamp_millis().to_string(),
            Self::UnixNanos => at
                .timestamp_nanos_opt()
                .unwrap_or_default()
                .to_string(),
            Self::Custom(pattern) => at.format(pattern).to_string(),
        }
    }

    pub fn now(&self) -> String {
        self.render(Local::now())
    }
}
