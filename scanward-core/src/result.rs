//! Scanner output document.
//!
//! masscan writes a JSON array of host objects. An idle scan may leave the
//! file empty, and some builds emit a trailing comma before the closing
//! bracket; both are tolerated.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};

static TRAILING_COMMA: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r",\s*\]\s*$").expect("trailing comma regex should compile")
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostRecord {
    pub ip: String,
    #[serde(
        default,
        deserialize_with = "timestamp_as_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub ports: Vec<PortRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRecord {
    pub port: u16,
    #[serde(default)]
    pub proto: String,
    #[serde(default)]
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<u32>,
}

// masscan emits the timestamp as a quoted string, other producers as a number.
fn timestamp_as_string<'de, D>(
    deserializer: D,
) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(serde_json::Number),
    }

    Ok(Option::<Raw>::deserialize(deserializer)?.map(|raw| match raw {
        Raw::Text(text) => text,
        Raw::Number(number) => number.to_string(),
    }))
}

/// Parses the scanner output document into host records.
pub fn parse_scan_output(
    raw: &str,
) -> Result<Vec<HostRecord>, serde_json::Error> {
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }

    match serde_json::from_str(raw) {
        Ok(hosts) => Ok(hosts),
        Err(err) => {
            let repaired = TRAILING_COMMA.replace(raw, "]");
            if repaired == raw {
                return Err(err);
            }
            serde_json::from_str(&repaired)
        }
    }
}
