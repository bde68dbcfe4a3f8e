//! Envelope parsing for raw server console lines.
//!
//! A line looks like `[2024.05.01-18.22.31:417][ 92]LogBrickadia: payload`.
//! Both the bracketed header and the `Generator: ` prefix are optional, console
//! command output (`0) BP_Ruleset_C ...`) usually carries neither.

use chrono::NaiveDateTime;
use regex::Regex;
use std::sync::LazyLock;

static ENVELOPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?:\[(?<date>\d{4}\.\d{2}\.\d{2}-\d{2}\.\d{2}\.\d{2}:\d{3})\]\[\s*(?<counter>\d+)\])?(?:(?<generator>\w+): )?(?<data>.*)$",
    )
    .expect("log envelope pattern is valid")
});

const TIMESTAMP_FORMAT: &str = "%Y.%m.%d-%H.%M.%S:%3f";

/// One console line split into its envelope parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    /// Embedded timestamp in Unix epoch milliseconds (UTC)
    pub timestamp: Option<i64>,
    /// Engine frame counter
    pub counter: Option<u64>,
    /// Subsystem tag such as `LogBrickadia`
    pub generator: Option<String>,
    /// Free text payload
    pub data: String,
}

impl LogLine {
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim_end_matches(['\r', '\n']);
        let Some(caps) = ENVELOPE.captures(raw) else {
            return Self::bare(raw);
        };

        Self {
            timestamp: caps.name("date").and_then(|m| parse_timestamp(m.as_str())),
            counter: caps.name("counter").and_then(|m| m.as_str().parse().ok()),
            generator: caps.name("generator").map(|m| m.as_str().to_string()),
            data: caps
                .name("data")
                .map(|m| m.as_str().to_string())
                .unwrap_or_default(),
        }
    }

    fn bare(raw: &str) -> Self {
        Self {
            timestamp: None,
            counter: None,
            generator: None,
            data: raw.to_string(),
        }
    }

    pub fn is_from(&self, generator: &str) -> bool {
        self.generator.as_deref() == Some(generator)
    }
}

/// Parse `2024.05.01-18.22.31:417` into epoch milliseconds.
pub fn parse_timestamp(date: &str) -> Option<i64> {
    NaiveDateTime::parse_from_str(date, TIMESTAMP_FORMAT)
        .ok()
        .map(|dt| dt.and_utc().timestamp_millis())
}
