//! Participant table backed by a BPF map pinned on the BPF filesystem

use aya::maps::{Array, Map, MapData, MapError};
use std::path::Path;
use std::sync::{Mutex, PoisonError};

use super::table::{ParticipantTable, SlotRecord, TableError};

// SAFETY: `SlotRecord` is `repr(C)`, `Copy`, and made only of integers with
// explicit padding, so every bit pattern is valid.
unsafe impl aya::Pod for SlotRecord {}

/// The classifier's map, opened by path. The classifier loader owns the map's
/// lifetime; this side only reads and writes slots.
pub struct PinnedMapTable {
    map: Mutex<Array<MapData, SlotRecord>>,
}

impl PinnedMapTable {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, TableError> {
        let path = path.as_ref();

        let data = MapData::from_pin(path).map_err(|e| TableError::NotFound {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        // Array access only issues lookups and updates keyed by u32, which
        // also works when the loader created a hash map
        let map = Array::try_from(Map::Array(data)).map_err(map_error)?;

        Ok(Self {
            map: Mutex::new(map),
        })
    }
}

fn map_error(e: MapError) -> TableError {
    TableError::Map(e.to_string())
}

impl ParticipantTable for PinnedMapTable {
    fn capacity(&self) -> u32 {
        self.map.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn put(&self, index: u32, record: SlotRecord) -> Result<(), TableError> {
        let mut map = self.map.lock().unwrap_or_else(PoisonError::into_inner);
        let capacity = map.len();
        if index >= capacity {
            return Err(TableError::OutOfRange { index, capacity });
        }
        map.set(index, record, 0).map_err(map_error)
    }

    fn entries(&self) -> Result<Vec<(u32, SlotRecord)>, TableError> {
        let map = self.map.lock().unwrap_or_else(PoisonError::into_inner);

        (0..map.len())
            .map(|index| match map.get(&index, 0) {
                Ok(record) => Ok((index, record)),
                Err(MapError::KeyNotFound) => Ok((index, SlotRecord::EMPTY)),
                Err(e) => Err(map_error(e)),
            })
            .collect()
    }
}
