//! Admission checks for scan requests.
//!
//! Everything here is pure: a request either becomes a normalised
//! [`ScanParameters`] or is rejected with the first [`ValidationError`]
//! encountered, in the order required fields, targets, ports, rate.

use std::{fmt, net::Ipv4Addr};

use ipnetwork::Ipv4Network;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::config::RateBounds;

static TARGET_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d{1,3})\.(\d{1,3})\.(\d{1,3})\.(\d{1,3})(?:/(\d{1,2}))?$")
        .expect("target regex should compile")
});

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("IP range and ports are required")]
    MissingFields,
    #[error("Invalid IP range format")]
    InvalidTargets,
    #[error("Invalid ports format")]
    InvalidPorts,
    #[error("Rate must be an integer")]
    RateNotInteger,
    #[error("Rate must be between {min} and {max}")]
    RateOutOfBounds { min: u32, max: u32 },
}

/// Raw submission as received from a client.
///
/// `ip_range` and `ports` are accepted as aliases so older clients keep
/// working.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScanRequest {
    #[serde(default, alias = "ip_range")]
    pub target_spec: Option<String>,
    #[serde(default, alias = "ports")]
    pub port_spec: Option<String>,
    #[serde(default)]
    pub rate: Option<Value>,
}

impl ScanRequest {
    pub fn new(
        target_spec: impl Into<String>,
        port_spec: impl Into<String>,
        rate: Option<u32>,
    ) -> Self {
        Self {
            target_spec: Some(target_spec.into()),
            port_spec: Some(port_spec.into()),
            rate: rate.map(Value::from),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortRange {
    pub start: u16,
    pub end: u16,
}

impl PortRange {
    pub fn single(port: u16) -> Self {
        Self {
            start: port,
            end: port,
        }
    }

    pub fn port_count(&self) -> u32 {
        u32::from(self.end) - u32::from(self.start) + 1
    }
}

impl fmt::Display for PortRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}-{}", self.start, self.end)
        }
    }
}

/// Validated, normalised scan parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanParameters {
    pub targets: Vec<Ipv4Network>,
    pub ports: Vec<PortRange>,
    /// Targets re-joined with `,` after trimming each element.
    pub target_spec: String,
    /// Ports re-joined with `,` after trimming each element.
    pub port_spec: String,
    pub rate: u32,
}

pub fn validate(
    request: &ScanRequest,
    bounds: &RateBounds,
) -> Result<ScanParameters, ValidationError> {
    let target_spec = required(request.target_spec.as_deref());
    let port_spec = required(request.port_spec.as_deref());
    let (Some(target_spec), Some(port_spec)) = (target_spec, port_spec) else {
        return Err(ValidationError::MissingFields);
    };

    let (targets, target_spec) = parse_targets(target_spec)?;
    let (ports, port_spec) = parse_ports(port_spec)?;
    let rate = parse_rate(request.rate.as_ref(), bounds)?;

    Ok(ScanParameters {
        targets,
        ports,
        target_spec,
        port_spec,
        rate,
    })
}

fn required(value: Option<&str>) -> Option<&str> {
    value.filter(|raw| !raw.trim().is_empty())
}

/// Parses a comma-separated list of IPv4 addresses or CIDR blocks.
///
/// Returns the parsed networks and the normalised spec string.
pub fn parse_targets(
    spec: &str,
) -> Result<(Vec<Ipv4Network>, String), ValidationError> {
    let mut networks = Vec::new();
    let mut normalised = Vec::new();

    for element in spec.split(',') {
        let element = element.trim();
        let network = parse_target(element)?;
        networks.push(network);
        normalised.push(element);
    }

    Ok((networks, normalised.join(",")))
}

fn parse_target(element: &str) -> Result<Ipv4Network, ValidationError> {
    let captures = TARGET_PATTERN
        .captures(element)
        .ok_or(ValidationError::InvalidTargets)?;

    let mut octets = [0u8; 4];
    for (index, octet) in octets.iter_mut().enumerate() {
        *octet = captures[index + 1]
            .parse::<u8>()
            .map_err(|_| ValidationError::InvalidTargets)?;
    }

    let prefix = match captures.get(5) {
        Some(raw) => raw
            .as_str()
            .parse::<u8>()
            .map_err(|_| ValidationError::InvalidTargets)?,
        None => 32,
    };

    Ipv4Network::new(Ipv4Addr::from(octets), prefix)
        .map_err(|_| ValidationError::InvalidTargets)
}

/// Parses a comma-separated list of ports and inclusive `lo-hi` ranges.
pub fn parse_ports(
    spec: &str,
) -> Result<(Vec<PortRange>, String), ValidationError> {
    let ranges = spec
        .split(',')
        .map(|element| parse_port_element(element.trim()))
        .collect::<Result<Vec<_>, _>>()?;
    let normalised = ranges
        .iter()
        .map(PortRange::to_string)
        .collect::<Vec<_>>()
        .join(",");

    Ok((ranges, normalised))
}

fn parse_port_element(element: &str) -> Result<PortRange, ValidationError> {
    match element.split_once('-') {
        Some((lo, hi)) => {
            let start = parse_port(lo)?;
            let end = parse_port(hi)?;
            if start > end {
                return Err(ValidationError::InvalidPorts);
            }
            Ok(PortRange { start, end })
        }
        None => parse_port(element).map(PortRange::single),
    }
}

fn parse_port(raw: &str) -> Result<u16, ValidationError> {
    let raw = raw.trim();
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ValidationError::InvalidPorts);
    }
    raw.parse::<u16>().map_err(|_| ValidationError::InvalidPorts)
}

/// Accepts a JSON integer, an integral float or a numeric string.
pub fn parse_rate(
    rate: Option<&Value>,
    bounds: &RateBounds,
) -> Result<u32, ValidationError> {
    let value = match rate {
        None | Some(Value::Null) => return Ok(bounds.default),
        Some(Value::Number(number)) => number
            .as_i64()
            .or_else(|| number.as_u64().map(|_| i64::MAX))
            .or_else(|| {
                number
                    .as_f64()
                    .filter(|float| float.fract() == 0.0 && float.is_finite())
                    .map(|float| float as i64)
            }),
        Some(Value::String(raw)) => raw.trim().parse::<i64>().ok(),
        Some(_) => None,
    }
    .ok_or(ValidationError::RateNotInteger)?;

    if !bounds.contains(value) {
        return Err(ValidationError::RateOutOfBounds {
            min: bounds.min,
            max: bounds.max,
        });
    }

    u32::try_from(value).map_err(|_| ValidationError::RateOutOfBounds {
        min: bounds.min,
        max: bounds.max,
    })
}
