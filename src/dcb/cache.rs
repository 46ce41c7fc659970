//! Per-device freshness cache.
//!
//! A [`Snapshot`] keeps the raw DCB bytes and, per field, the last decoded
//! value with the time it was read. Every field decoded from one reply shares
//! that reply's completion time.

use crate::dcb::address_map::AddressMap;
use crate::dcb::field::{FieldDescriptor, FieldId, FieldTable, FieldValue};
use crate::error::FieldError;
use chrono::{DateTime, Local};
use log::{debug, warn};
use std::collections::HashMap;
use std::time::Duration;

/// How old a cached value may be before it is fetched again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MaxAge {
    /// Always fetch.
    Always,
    /// Any cached value will do.
    PresenceOnly,
    /// Use the field's own maximum age.
    #[default]
    Default,
    Within(Duration),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldState {
    pub value: Option<FieldValue>,
    pub read_at: Option<DateTime<Local>>,
}

/// Checks applied while decoding a reply.
#[derive(Debug, Clone, Default)]
pub struct DecodeChecks {
    /// Fields that must decode to a known value, such as the model number.
    pub expected: Vec<(FieldId, u16)>,
    /// Bits kept from a field before it is checked and stored.
    pub masks: Vec<(FieldId, u16)>,
}

#[derive(Debug, Clone)]
pub struct Snapshot {
    raw: Vec<u8>,
    fields: Vec<FieldState>,
    last_full_read: Option<DateTime<Local>>,
}

impl Snapshot {
    pub fn new(field_count: usize, dcb_length: usize) -> Self {
        Snapshot {
            raw: vec![0; dcb_length],
            fields: vec![FieldState::default(); field_count],
            last_full_read: None,
        }
    }

    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    pub fn state(&self, id: FieldId) -> &FieldState {
        &self.fields[id.0]
    }

    pub fn value(&self, id: FieldId) -> Option<&FieldValue> {
        self.fields[id.0].value.as_ref()
    }

    pub fn read_at(&self, id: FieldId) -> Option<DateTime<Local>> {
        self.fields[id.0].read_at
    }

    pub fn last_full_read(&self) -> Option<DateTime<Local>> {
        self.last_full_read
    }

    /// Whether the cached value of `id` satisfies `max_age` at `now`.
    pub fn is_fresh(
        &self,
        id: FieldId,
        field: &FieldDescriptor,
        max_age: MaxAge,
        now: DateTime<Local>,
    ) -> bool {
        let Some(read_at) = self.fields[id.0].read_at else {
            return false;
        };
        let limit = match max_age {
            MaxAge::Always => return false,
            MaxAge::PresenceOnly => return true,
            MaxAge::Default => field.max_age,
            MaxAge::Within(limit) => limit,
        };
        // a clock stepping backwards makes the value look new, which is acceptable
        let elapsed = (now - read_at).to_std().unwrap_or(Duration::ZERO);
        elapsed < limit
    }

    /// The subset of `ids` that must be fetched.
    pub fn stale(
        &self,
        table: &FieldTable,
        ids: &[FieldId],
        max_age: MaxAge,
        now: DateTime<Local>,
    ) -> Vec<FieldId> {
        let mut stale: Vec<FieldId> = ids
            .iter()
            .copied()
            .filter(|&id| !self.is_fresh(id, table.get(id), max_age, now))
            .collect();
        stale.sort();
        stale.dedup();
        stale
    }

    /// Decodes `data`, read from physical offset `start`, into the cache.
    ///
    /// Fields that fail to decode are skipped and returned; absent fields
    /// between the decoded ones are cleared.
    pub fn apply_block(
        &mut self,
        table: &FieldTable,
        map: &AddressMap,
        start: u16,
        data: &[u8],
        read_at: DateTime<Local>,
        checks: &DecodeChecks,
    ) -> Vec<FieldError> {
        let start = start as usize;
        let end = start + data.len();
        if start < self.raw.len() {
            let stop = end.min(self.raw.len());
            self.raw[start..stop].copy_from_slice(&data[..stop - start]);
        }
        if start == 0 && data.len() >= self.raw.len() {
            self.last_full_read = Some(read_at);
        }

        let mut errors = Vec::new();
        let mut decoded_span: Option<(u16, u16)> = None;
        for (id, field) in table.iter() {
            let Some(offset) = map.resolve(field.address).map(usize::from) else {
                continue;
            };
            if offset < start || offset >= end {
                continue;
            }
            decoded_span = Some(match decoded_span {
                None => (field.address, field.address),
                Some((lo, _)) => (lo, field.address),
            });
            match decode_checked(id, field, &data[offset - start..], checks) {
                Ok(value) => {
                    debug!("Field {} = {}", field.name, value);
                    self.fields[id.0] = FieldState {
                        value: Some(value),
                        read_at: Some(read_at),
                    };
                }
                Err(e) => {
                    warn!("Field {} skipped: {}", field.name, e);
                    errors.push(e);
                }
            }
        }

        if let Some((lo, hi)) = decoded_span {
            for (id, field) in table.iter() {
                if field.address > lo && field.address < hi && map.resolve(field.address).is_none() {
                    self.fields[id.0] = FieldState::default();
                }
            }
        }
        errors
    }

    /// Records a value the device accepted; `None` forgets the field.
    pub fn set_written(&mut self, id: FieldId, value: Option<FieldValue>, at: DateTime<Local>) {
        self.fields[id.0] = match value {
            Some(value) => FieldState {
                value: Some(value),
                read_at: Some(at),
            },
            None => FieldState::default(),
        };
    }
}

fn decode_checked(
    id: FieldId,
    field: &FieldDescriptor,
    data: &[u8],
    checks: &DecodeChecks,
) -> Result<FieldValue, FieldError> {
    let mut value = field.decode(data)?;
    if let (Some(&(_, mask)), FieldValue::Int(v)) =
        (checks.masks.iter().find(|(m, _)| *m == id), &mut value)
    {
        *v &= mask;
    }
    if let Some(&(_, expected)) = checks.expected.iter().find(|(e, _)| *e == id) {
        if value.as_int() != Some(expected) {
            return Err(FieldError::Unexpected {
                field: field.name.clone(),
                expected,
                actual: value.as_int().unwrap_or_default(),
            });
        }
    }
    Ok(value)
}

/// Destination for raw schedule bytes decoded from a device.
pub trait ScheduleStore: Send {
    fn store(&mut self, name: &str, bytes: &[u8]);

    fn load(&self, name: &str) -> Option<Vec<u8>>;
}

/// Keeps schedules in memory, keyed by field name.
#[derive(Debug, Clone, Default)]
pub struct MemoryScheduleStore {
    entries: HashMap<String, Vec<u8>>,
}

impl MemoryScheduleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl ScheduleStore for MemoryScheduleStore {
    fn store(&mut self, name: &str, bytes: &[u8]) {
        self.entries.insert(name.to_string(), bytes.to_vec());
    }

    fn load(&self, name: &str) -> Option<Vec<u8>> {
        self.entries.get(name).cloned()
    }
}
