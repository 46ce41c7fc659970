//! # Field Descriptors
//!
//! A thermostat's memory (the DCB) is described by a table of logical fields,
//! each placed at a stable "unique" address that does not depend on the
//! device model. [`FieldTable`] is built once from one or more table fragments
//! and hands out closed [`FieldId`] indices, ordered by unique address.
//!
//! Values of one and two byte fields are numbers ([`FieldValue::Int`]); the
//! clock and the schedules are opaque byte sequences ([`FieldValue::Raw`]).
//! Two byte fields arrive high byte first but are written low byte first.

use crate::error::{ConfigError, FieldError, ValidationError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

/// Field lengths the codec understands.
pub const SUPPORTED_LENGTHS: [usize; 5] = [1, 2, 4, 12, 16];

/// Inclusive range of accepted values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueRange {
    pub min: u16,
    pub max: u16,
}

impl ValueRange {
    pub const fn new(min: u16, max: u16) -> Self {
        ValueRange { min, max }
    }

    pub fn contains(&self, value: u16) -> bool {
        value >= self.min && value <= self.max
    }
}

/// What the device reports after a particular value was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteEcho {
    pub written: u16,
    /// `None` when the resulting value cannot be known without a read.
    pub reads_as: Option<u16>,
}

/// Static description of one logical quantity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub name: String,
    /// Model-independent address.
    pub address: u16,
    pub length: usize,
    #[serde(default = "default_divisor")]
    pub divisor: u16,
    /// Empty means unchecked. Shorter than a byte sequence means cyclic.
    #[serde(default)]
    pub ranges: Vec<ValueRange>,
    #[serde(default)]
    pub writable: bool,
    #[serde(with = "secs", default = "default_max_age")]
    pub max_age: Duration,
    #[serde(default)]
    pub write_echo: Vec<WriteEcho>,
}

fn default_divisor() -> u16 {
    1
}

fn default_max_age() -> Duration {
    Duration::from_secs(86_400)
}

impl FieldDescriptor {
    pub fn new(name: &str, address: u16, length: usize, max_age: Duration) -> Self {
        FieldDescriptor {
            name: name.to_string(),
            address,
            length,
            divisor: 1,
            ranges: Vec::new(),
            writable: false,
            max_age,
            write_echo: Vec::new(),
        }
    }

    pub fn with_range(mut self, min: u16, max: u16) -> Self {
        self.ranges = vec![ValueRange::new(min, max)];
        self
    }

    pub fn with_ranges(mut self, ranges: &[(u16, u16)]) -> Self {
        self.ranges = ranges.iter().map(|&(a, b)| ValueRange::new(a, b)).collect();
        self
    }

    pub fn with_divisor(mut self, divisor: u16) -> Self {
        self.divisor = divisor;
        self
    }

    pub fn writable(mut self) -> Self {
        self.writable = true;
        self
    }

    pub fn with_write_echo(mut self, echo: &[(u16, Option<u16>)]) -> Self {
        self.write_echo = echo
            .iter()
            .map(|&(written, reads_as)| WriteEcho { written, reads_as })
            .collect();
        self
    }

    /// Last unique address covered by the field, `None` past the address space.
    pub fn end_address(&self) -> Option<u16> {
        let extra = u16::try_from(self.length).ok()?.checked_sub(1)?;
        self.address.checked_add(extra)
    }

    pub fn is_numeric(&self) -> bool {
        self.length <= 2
    }

    /// Largest number the field can hold.
    fn numeric_max(&self) -> u16 {
        if self.length == 1 {
            u8::MAX as u16
        } else {
            u16::MAX
        }
    }

    /// Decodes the field from exactly `length` bytes and range-checks it.
    pub fn decode(&self, data: &[u8]) -> Result<FieldValue, FieldError> {
        if data.len() < self.length {
            return Err(FieldError::Missing {
                field: self.name.clone(),
                received: data.len(),
            });
        }
        let data = &data[..self.length];
        let value = match self.length {
            1 => FieldValue::Int(data[0] as u16),
            2 => FieldValue::Int(u16::from_be_bytes([data[0], data[1]])),
            _ => FieldValue::Raw(data.to_vec()),
        };
        if let Some((value, range)) = self.first_violation(&value) {
            return Err(FieldError::OutOfRange {
                field: self.name.clone(),
                value,
                min: range.min,
                max: range.max,
            });
        }
        Ok(value)
    }

    /// Checks a value for writing and returns the bytes to send.
    pub fn encode_write(&self, value: &FieldValue) -> Result<Vec<u8>, ValidationError> {
        if !self.writable {
            return Err(ValidationError::NotWritable(self.name.clone()));
        }
        match (self.is_numeric(), value) {
            (true, FieldValue::Int(_)) => {}
            (false, FieldValue::Raw(bytes)) if bytes.len() == self.length => {}
            (_, other) => {
                return Err(ValidationError::WrongLength {
                    field: self.name.clone(),
                    expected: if self.is_numeric() { 1 } else { self.length },
                    received: other.len(),
                })
            }
        }
        if let FieldValue::Int(v) = value {
            if *v > self.numeric_max() {
                return Err(ValidationError::OutOfRange {
                    field: self.name.clone(),
                    value: *v,
                    min: 0,
                    max: self.numeric_max(),
                });
            }
        }
        if let Some((v, range)) = self.first_violation(value) {
            return Err(ValidationError::OutOfRange {
                field: self.name.clone(),
                value: v,
                min: range.min,
                max: range.max,
            });
        }
        Ok(match value {
            FieldValue::Int(v) if self.length == 1 => vec![*v as u8],
            FieldValue::Int(v) => v.to_le_bytes().to_vec(),
            FieldValue::Raw(bytes) => bytes.clone(),
        })
    }

    fn first_violation(&self, value: &FieldValue) -> Option<(u16, ValueRange)> {
        if self.ranges.is_empty() {
            return None;
        }
        match value {
            FieldValue::Int(v) => {
                let range = self.ranges[0];
                (!range.contains(*v)).then_some((*v, range))
            }
            FieldValue::Raw(bytes) => bytes.iter().enumerate().find_map(|(i, &b)| {
                let range = self.ranges[i % self.ranges.len()];
                (!range.contains(b as u16)).then_some((b as u16, range))
            }),
        }
    }

    /// The value the device reports after `written`; `None` when unknown.
    pub fn echoed(&self, written: &FieldValue) -> Option<FieldValue> {
        if let FieldValue::Int(v) = written {
            if let Some(echo) = self.write_echo.iter().find(|e| e.written == *v) {
                return echo.reads_as.map(FieldValue::Int);
            }
        }
        Some(written.clone())
    }

    /// Value divided by the field's divisor.
    pub fn scaled(&self, value: &FieldValue) -> Option<f64> {
        value.as_int().map(|v| v as f64 / self.divisor as f64)
    }
}

/// A decoded or to-be-written field value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Int(u16),
    Raw(Vec<u8>),
}

impl FieldValue {
    pub fn as_int(&self) -> Option<u16> {
        match self {
            FieldValue::Int(v) => Some(*v),
            FieldValue::Raw(_) => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            FieldValue::Raw(b) => Some(b),
            FieldValue::Int(_) => None,
        }
    }

    fn len(&self) -> usize {
        match self {
            FieldValue::Int(_) => 1,
            FieldValue::Raw(b) => b.len(),
        }
    }
}

impl From<u16> for FieldValue {
    fn from(v: u16) -> Self {
        FieldValue::Int(v)
    }
}

impl From<Vec<u8>> for FieldValue {
    fn from(v: Vec<u8>) -> Self {
        FieldValue::Raw(v)
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Int(v) => write!(f, "{}", v),
            FieldValue::Raw(bytes) => {
                let parts: Vec<String> = bytes.iter().map(|b| b.to_string()).collect();
                write!(f, "[{}]", parts.join(", "))
            }
        }
    }
}

/// Index of a field within its [`FieldTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FieldId(pub usize);

/// Fields of one device, sorted by unique address.
#[derive(Debug, Clone)]
pub struct FieldTable {
    fields: Vec<FieldDescriptor>,
    by_name: HashMap<String, FieldId>,
}

impl FieldTable {
    /// Joins fragments into one table, rejecting duplicates and overlaps.
    pub fn from_fragments(fragments: &[&[FieldDescriptor]]) -> Result<Self, ConfigError> {
        let mut fields: Vec<FieldDescriptor> =
            fragments.iter().flat_map(|f| f.iter().cloned()).collect();
        fields.sort_by_key(|f| f.address);

        let mut by_name = HashMap::with_capacity(fields.len());
        for (i, field) in fields.iter().enumerate() {
            if !SUPPORTED_LENGTHS.contains(&field.length) {
                return Err(ConfigError::UnsupportedLength {
                    field: field.name.clone(),
                    length: field.length,
                });
            }
            if field.end_address().is_none() {
                return Err(ConfigError::AddressOverflow {
                    field: field.name.clone(),
                    address: field.address,
                });
            }
            if by_name.insert(field.name.clone(), FieldId(i)).is_some() {
                return Err(ConfigError::DuplicateField(field.name.clone()));
            }
        }
        for pair in fields.windows(2) {
            if pair[0].end_address().map_or(true, |end| end >= pair[1].address) {
                return Err(ConfigError::OverlappingFields {
                    first: pair[0].name.clone(),
                    second: pair[1].name.clone(),
                });
            }
        }
        Ok(FieldTable { fields, by_name })
    }

    pub fn get(&self, id: FieldId) -> &FieldDescriptor {
        &self.fields[id.0]
    }

    pub fn id(&self, name: &str) -> Option<FieldId> {
        self.by_name.get(name).copied()
    }

    /// Looks a field up by name for a caller request.
    pub fn lookup(&self, name: &str) -> Result<FieldId, ValidationError> {
        self.id(name)
            .ok_or_else(|| ValidationError::UnknownField(name.to_string()))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = FieldId> {
        (0..self.fields.len()).map(FieldId)
    }

    pub fn iter(&self) -> impl Iterator<Item = (FieldId, &FieldDescriptor)> {
        self.fields.iter().enumerate().map(|(i, f)| (FieldId(i), f))
    }

    /// Highest unique address any field occupies.
    pub fn max_address(&self) -> Option<u16> {
        self.fields.last().and_then(|f| f.end_address())
    }
}

mod secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const AGE: Duration = Duration::from_secs(60);

    #[test]
    fn test_decode_two_bytes_high_first() {
        let field = FieldDescriptor::new("airtemp", 32, 2, AGE).with_divisor(10);
        let value = field.decode(&[0, 220]).unwrap();
        assert_eq!(value, FieldValue::Int(220));
        assert_eq!(field.scaled(&value), Some(22.0));
    }

    #[test]
    fn test_decode_range_violation() {
        let field = FieldDescriptor::new("model", 4, 1, AGE).with_range(0, 1);
        assert!(field.decode(&[1]).is_ok());
        assert!(matches!(
            field.decode(&[3]),
            Err(FieldError::OutOfRange { value: 3, .. })
        ));
    }

    #[test]
    fn test_cyclic_ranges_apply_per_byte() {
        let field =
            FieldDescriptor::new("wday_heat", 41, 12, AGE).with_ranges(&[(0, 24), (0, 59), (5, 35)]);
        let good = vec![7, 0, 19, 9, 30, 10, 17, 0, 19, 21, 30, 10];
        assert!(field.decode(&good).is_ok());
        let mut bad = good.clone();
        bad[5] = 40;
        assert!(matches!(
            field.decode(&bad),
            Err(FieldError::OutOfRange { value: 40, min: 5, max: 35, .. })
        ));
    }

    #[test]
    fn test_encode_two_bytes_low_first() {
        let field = FieldDescriptor::new("holidayhours", 24, 2, AGE)
            .with_range(0, 720)
            .writable();
        assert_eq!(field.encode_write(&FieldValue::Int(300)).unwrap(), vec![44, 1]);
    }

    #[test]
    fn test_encode_rejects_bad_input() {
        let ro = FieldDescriptor::new("airtemp", 32, 2, AGE);
        assert!(matches!(
            ro.encode_write(&FieldValue::Int(1)),
            Err(ValidationError::NotWritable(_))
        ));

        let sched = FieldDescriptor::new("wday_heat", 41, 12, AGE).writable();
        assert!(matches!(
            sched.encode_write(&FieldValue::Raw(vec![0; 11])),
            Err(ValidationError::WrongLength { expected: 12, received: 11, .. })
        ));
        assert!(matches!(
            sched.encode_write(&FieldValue::Int(1)),
            Err(ValidationError::WrongLength { .. })
        ));

        let byte = FieldDescriptor::new("keylock", 22, 1, AGE).writable();
        assert!(matches!(
            byte.encode_write(&FieldValue::Int(256)),
            Err(ValidationError::OutOfRange { max: 255, .. })
        ));
    }

    #[test]
    fn test_write_echo() {
        let field = FieldDescriptor::new("hotwaterdemand", 36, 1, AGE)
            .writable()
            .with_write_echo(&[(0, None), (2, Some(0))]);
        assert_eq!(field.echoed(&FieldValue::Int(0)), None);
        assert_eq!(field.echoed(&FieldValue::Int(2)), Some(FieldValue::Int(0)));
        assert_eq!(field.echoed(&FieldValue::Int(1)), Some(FieldValue::Int(1)));
    }

    #[test]
    fn test_table_sorted_and_checked() {
        let a = [FieldDescriptor::new("b", 4, 1, AGE)];
        let b = [FieldDescriptor::new("a", 0, 2, AGE)];
        let table = FieldTable::from_fragments(&[&a, &b]).unwrap();
        assert_eq!(table.id("a"), Some(FieldId(0)));
        assert_eq!(table.max_address(), Some(4));

        let overlap = [FieldDescriptor::new("c", 1, 1, AGE)];
        assert!(matches!(
            FieldTable::from_fragments(&[&b, &overlap]),
            Err(ConfigError::OverlappingFields { .. })
        ));

        let odd = [FieldDescriptor::new("d", 9, 3, AGE)];
        assert!(matches!(
            FieldTable::from_fragments(&[&odd]),
            Err(ConfigError::UnsupportedLength { length: 3, .. })
        ));

        let wraps = [FieldDescriptor::new("e", u16::MAX, 2, AGE)];
        assert_eq!(wraps[0].end_address(), None);
        assert_eq!(
            FieldTable::from_fragments(&[&wraps]).unwrap_err(),
            ConfigError::AddressOverflow {
                field: "e".to_string(),
                address: u16::MAX
            }
        );
        let last = [FieldDescriptor::new("f", u16::MAX - 1, 2, AGE)];
        assert_eq!(last[0].end_address(), Some(u16::MAX));
    }

    #[test]
    fn test_descriptor_from_json() {
        let field: FieldDescriptor = serde_json::from_str(
            r#"{ "name": "frosttemp", "address": 17, "length": 1,
                 "ranges": [{ "min": 7, "max": 17 }], "writable": true, "max_age": 3600 }"#,
        )
        .unwrap();
        assert_eq!(field.divisor, 1);
        assert_eq!(field.max_age, Duration::from_secs(3600));
        assert!(field.writable);
    }
}
