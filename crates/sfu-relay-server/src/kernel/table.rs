//! Fixed-layout participant records and the table that holds them

use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::{Mutex, PoisonError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TableError {
    #[error("slot {index} out of range (capacity {capacity})")]
    OutOfRange { index: u32, capacity: u32 },

    #[error("participant table not found at {path}: {reason}")]
    NotFound { path: String, reason: String },

    #[error("participant table operation failed: {0}")]
    Map(String),
}

/// One slot of the kernel participant registry.
///
/// Layout matches the classifier's value type: a 32-bit address holding the
/// numeric value of the dotted quad, a 16-bit port in network byte order, and
/// two bytes of padding. An all-zero record marks an empty slot.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SlotRecord {
    pub address: u32,
    pub port: u16,
    _pad: [u8; 2],
}

impl SlotRecord {
    pub const EMPTY: SlotRecord = SlotRecord {
        address: 0,
        port: 0,
        _pad: [0; 2],
    };

    pub fn from_addr(addr: SocketAddrV4) -> Self {
        Self {
            address: u32::from(*addr.ip()),
            port: addr.port().to_be(),
            _pad: [0; 2],
        }
    }

    pub fn to_addr(&self) -> SocketAddrV4 {
        SocketAddrV4::new(Ipv4Addr::from(self.address), u16::from_be(self.port))
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::EMPTY
    }
}

/// The kernel-side lookup table, keyed by slot index
pub trait ParticipantTable: Send + Sync {
    fn capacity(&self) -> u32;

    fn put(&self, index: u32, record: SlotRecord) -> Result<(), TableError>;

    /// Every slot in index order, empty ones included
    fn entries(&self) -> Result<Vec<(u32, SlotRecord)>, TableError>;

    /// Occupied slots only, for display
    fn occupied(&self) -> Result<Vec<(u32, SlotRecord)>, TableError> {
        Ok(self
            .entries()?
            .into_iter()
            .filter(|(_, record)| !record.is_empty())
            .collect())
    }
}

/// Process-local table with the same semantics as the pinned map. Used when
/// no kernel classifier is attached and in tests.
pub struct InMemoryTable {
    slots: Mutex<Vec<SlotRecord>>,
}

impl InMemoryTable {
    pub fn new(capacity: u32) -> Self {
        Self {
            slots: Mutex::new(vec![SlotRecord::EMPTY; capacity as usize]),
        }
    }

    pub fn get(&self, index: u32) -> Option<SlotRecord> {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(index as usize)
            .copied()
    }
}

impl ParticipantTable for InMemoryTable {
    fn capacity(&self) -> u32 {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner).len() as u32
    }

    fn put(&self, index: u32, record: SlotRecord) -> Result<(), TableError> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let capacity = slots.len() as u32;

        let slot = slots
            .get_mut(index as usize)
            .ok_or(TableError::OutOfRange { index, capacity })?;
        *slot = record;
        Ok(())
    }

    fn entries(&self) -> Result<Vec<(u32, SlotRecord)>, TableError> {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(slots
            .iter()
            .enumerate()
            .map(|(i, record)| (i as u32, *record))
            .collect())
    }
}
