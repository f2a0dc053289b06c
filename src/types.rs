use std::fmt;
use std::net::IpAddr;

use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;

use crate::{Error, Result};

/// Round to the nearest half degree, ties going up (18.25 -> 18.5).
pub fn round_half(value: f64) -> f64 {
    (value * 2.0 + 0.5).floor() / 2.0
}

/// Closed interval of setpoints a thermostat accepts, in Celsius.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TemperatureBounds {
    pub min: f64,
    pub max: f64,
}

impl TemperatureBounds {
    pub const LOCAL: Self = Self { min: 4.0, max: 27.0 };
    pub const PORTAL: Self = Self { min: 4.0, max: 30.0 };

    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// Validate the requested target and snap it to the half-degree grid.
    pub fn setpoint(&self, target: f64) -> Result<f64> {
        if !(self.min..=self.max).contains(&target) {
            return Err(Error::IllegalArgument(format!(
                "Device temperature out of bounds: {target}. Needs to be between {} (inclusive) and {} (inclusive)",
                self.min, self.max
            )));
        }
        Ok(round_half(target))
    }
}

/// A thermostat found by discovery or named by configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    pub address: IpAddr,
    pub device_id: Option<String>,
}

/// The machine running this client, as presented to the thermostat when pairing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalPeerIdentity {
    pub host_name: String,
    pub local_ip: IpAddr,
    pub hardware_address: String,
}

impl LocalPeerIdentity {
    /// Name shown on the thermostat display while it asks for approval.
    pub fn device_name(&self) -> String {
        let short = self.host_name.split('.').next().unwrap_or_default();
        format!("{short} atag-one API")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorizationStatus {
    Pending,
    Accepted,
    Denied,
}

impl AuthorizationStatus {
    pub fn from_code(code: i64) -> Result<Self> {
        match code {
            1 => Ok(AuthorizationStatus::Pending),
            2 => Ok(AuthorizationStatus::Accepted),
            3 => Ok(AuthorizationStatus::Denied),
            other => Err(Error::Protocol(format!("unknown acc_status code {other}"))),
        }
    }
}

/// Type requested when extracting a scalar from a loosely structured response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Flag,
    Integer,
    Decimal,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(String),
    Flag(bool),
    Integer(i64),
    Decimal(f64),
}

impl FieldValue {
    pub fn as_decimal(&self) -> Option<f64> {
        match self {
            FieldValue::Decimal(d) => Some(*d),
            FieldValue::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Text(s) => write!(f, "{s}"),
            FieldValue::Flag(b) => write!(f, "{b}"),
            FieldValue::Integer(i) => write!(f, "{i}"),
            FieldValue::Decimal(d) => write!(f, "{d}"),
        }
    }
}

impl Serialize for FieldValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            FieldValue::Text(s) => serializer.serialize_str(s),
            FieldValue::Flag(b) => serializer.serialize_bool(*b),
            FieldValue::Integer(i) => serializer.serialize_i64(*i),
            FieldValue::Decimal(d) => serializer.serialize_f64(*d),
        }
    }
}

/// Ordered field map built from one report. A field the device did not send
/// is kept as an absent entry so the layout stays stable between runs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiagnosticsSnapshot {
    fields: Vec<(String, Option<FieldValue>)>,
}

impl DiagnosticsSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace, keeping the original position on replace.
    pub fn insert(&mut self, name: impl Into<String>, value: Option<FieldValue>) {
        let name = name.into();
        match self.fields.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = value,
            None => self.fields.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .and_then(|(_, v)| v.as_ref())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.iter().any(|(n, _)| n == name)
    }

    pub fn decimal(&self, name: &str) -> Option<f64> {
        self.get(name).and_then(FieldValue::as_decimal)
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(FieldValue::as_text)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&FieldValue>)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v.as_ref()))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl Serialize for DiagnosticsSnapshot {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (name, value) in &self.fields {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}
