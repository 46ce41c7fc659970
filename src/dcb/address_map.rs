//! Translation from unique field addresses to physical DCB offsets.
//!
//! A map is a list of `(bound, offset)` entries with strictly increasing
//! bounds. A unique address uses the first entry whose bound is not below
//! it; the physical offset is the unique address minus the entry's offset,
//! unless the entry marks the range as absent on this device.

use crate::dcb::field::FieldTable;
use crate::error::ConfigError;

/// One range of the map. `offset` is `None` where the device has no memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapEntry {
    pub bound: u16,
    pub offset: Option<u16>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressMap {
    entries: Vec<MapEntry>,
}

impl AddressMap {
    /// Builds a map, rejecting unordered bounds and offsets that would take
    /// an address of the entry's range below zero.
    pub fn new(entries: &[(u16, Option<u16>)]) -> Result<Self, ConfigError> {
        if entries.is_empty() {
            return Err(ConfigError::EmptyMap);
        }
        for pair in entries.windows(2) {
            if pair[1].0 <= pair[0].0 {
                return Err(ConfigError::UnorderedMap {
                    previous: pair[0].0,
                    next: pair[1].0,
                });
            }
        }
        let mut first = 0;
        for &(bound, offset) in entries {
            if let Some(offset) = offset.filter(|&o| o > first) {
                return Err(ConfigError::OffsetBeyondRange { bound, offset, first });
            }
            first = bound.saturating_add(1);
        }
        Ok(AddressMap {
            entries: entries
                .iter()
                .map(|&(bound, offset)| MapEntry { bound, offset })
                .collect(),
        })
    }

    /// Identity map used when no model layout applies, such as for broadcasts.
    pub fn straight() -> Self {
        AddressMap {
            entries: vec![MapEntry {
                bound: u16::MAX,
                offset: Some(0),
            }],
        }
    }

    pub fn entries(&self) -> &[MapEntry] {
        &self.entries
    }

    /// Physical offset of `unique`, or `None` if the device lacks it.
    pub fn resolve(&self, unique: u16) -> Option<u16> {
        let entry = self.entries.iter().find(|e| e.bound >= unique)?;
        entry.offset.map(|offset| unique - offset)
    }

    /// Length of the device's DCB.
    ///
    /// Taken from the highest entry, or from the one below when the highest
    /// range is absent.
    pub fn dcb_length(&self) -> Result<usize, ConfigError> {
        self.entries
            .iter()
            .rev()
            .take(2)
            .find_map(|e| e.offset.map(|offset| (e.bound - offset) as usize + 1))
            .ok_or(ConfigError::UnresolvableLength)
    }

    /// Checks that every field of `table` lies within the map's bounds.
    pub fn validate_covers(&self, table: &FieldTable) -> Result<(), ConfigError> {
        let limit = self.entries.last().map(|e| e.bound).unwrap_or(0);
        match table
            .iter()
            .find(|(_, f)| f.end_address().map_or(true, |end| end > limit))
        {
            Some((_, field)) => Err(ConfigError::FieldOutsideMap {
                field: field.name.clone(),
                address: field.address,
            }),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dcb::field::FieldDescriptor;
    use std::time::Duration;

    #[test]
    fn test_resolve_with_gap() {
        let map = AddressMap::new(&[(35, Some(0)), (36, None), (64, Some(1))]).unwrap();
        assert_eq!(map.resolve(0), Some(0));
        assert_eq!(map.resolve(35), Some(35));
        assert_eq!(map.resolve(36), None);
        assert_eq!(map.resolve(37), Some(36));
        assert_eq!(map.resolve(64), Some(63));
        assert_eq!(map.resolve(65), None);
    }

    #[test]
    fn test_length_from_second_entry() {
        let map = AddressMap::new(&[(24, Some(0)), (26, None)]).unwrap();
        assert_eq!(map.resolve(24), Some(24));
        assert_eq!(map.resolve(25), None);
        assert_eq!(map.dcb_length(), Ok(25));
    }

    #[test]
    fn test_length_from_highest_entry() {
        let map = AddressMap::new(&[(35, Some(0)), (36, None), (180, Some(33))]).unwrap();
        assert_eq!(map.dcb_length(), Ok(148));
    }

    #[test]
    fn test_unresolvable_length() {
        let map = AddressMap::new(&[(10, None), (20, None)]).unwrap();
        assert_eq!(map.dcb_length(), Err(ConfigError::UnresolvableLength));
    }

    #[test]
    fn test_construction_errors() {
        assert_eq!(AddressMap::new(&[]), Err(ConfigError::EmptyMap));
        assert_eq!(
            AddressMap::new(&[(20, Some(0)), (20, None)]),
            Err(ConfigError::UnorderedMap {
                previous: 20,
                next: 20
            })
        );
        // unique 0..=4 would map below offset zero
        assert_eq!(
            AddressMap::new(&[(5, Some(5)), (200, Some(0))]),
            Err(ConfigError::OffsetBeyondRange {
                bound: 5,
                offset: 5,
                first: 0
            })
        );
        assert_eq!(
            AddressMap::new(&[(35, Some(0)), (64, Some(37))]),
            Err(ConfigError::OffsetBeyondRange {
                bound: 64,
                offset: 37,
                first: 36
            })
        );
        assert!(AddressMap::new(&[(35, Some(0)), (64, Some(36))]).is_ok());
    }

    #[test]
    fn test_validate_covers() {
        let fields = [
            FieldDescriptor::new("a", 0, 2, Duration::from_secs(1)),
            FieldDescriptor::new("b", 24, 2, Duration::from_secs(1)),
        ];
        let table = FieldTable::from_fragments(&[&fields]).unwrap();
        assert!(AddressMap::new(&[(25, Some(0))]).unwrap().validate_covers(&table).is_ok());
        assert_eq!(
            AddressMap::new(&[(24, Some(0))]).unwrap().validate_covers(&table),
            Err(ConfigError::FieldOutsideMap {
                field: "b".into(),
                address: 24
            })
        );
    }
}
