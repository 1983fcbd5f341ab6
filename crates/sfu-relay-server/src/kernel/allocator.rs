//! Bounded slot allocator for the kernel participant registry

use sfu_relay_protocol::PeerId;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocatorError {
    #[error("no free registry slot")]
    PoolExhausted,
}

struct Slots {
    /// Released indices, oldest release at the front
    recycled: VecDeque<u32>,
    /// Indices in `[next_fresh, capacity)` have never been handed out
    next_fresh: u32,
    assigned: HashMap<PeerId, u32>,
}

impl Slots {
    fn free_count(&self, capacity: u32) -> usize {
        self.recycled.len() + (capacity - self.next_fresh) as usize
    }
}

/// Maps active participants onto indices in `[0, capacity)`.
///
/// The free list is the queue of released indices followed by the never
/// used tail of the range. Released indices join the back of that queue, so
/// the least recently freed index is handed out first. Free plus assigned
/// always equals the capacity.
pub struct IndexAllocator {
    capacity: u32,
    slots: Mutex<Slots>,
}

impl IndexAllocator {
    pub fn new(capacity: u32) -> Self {
        Self {
            capacity,
            slots: Mutex::new(Slots {
                recycled: VecDeque::new(),
                next_fresh: 0,
                assigned: HashMap::new(),
            }),
        }
    }

    fn slots(&self) -> MutexGuard<'_, Slots> {
        // Critical sections never panic mid-update
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Bind `peer` to a slot. Returns the existing slot if already bound.
    pub fn assign(&self, peer: &PeerId) -> Result<u32, AllocatorError> {
        let mut slots = self.slots();

        if let Some(&index) = slots.assigned.get(peer) {
            return Ok(index);
        }

        let index = match slots.recycled.pop_front() {
            Some(index) => index,
            None if slots.next_fresh < self.capacity => {
                slots.next_fresh += 1;
                slots.next_fresh - 1
            }
            None => return Err(AllocatorError::PoolExhausted),
        };
        slots.assigned.insert(peer.clone(), index);
        Ok(index)
    }

    /// Unbind `peer`, returning the slot it held
    pub fn release(&self, peer: &PeerId) -> Option<u32> {
        let mut slots = self.slots();

        let index = slots.assigned.remove(peer)?;
        slots.recycled.push_back(index);
        Some(index)
    }

    pub fn index_of(&self, peer: &PeerId) -> Option<u32> {
        self.slots().assigned.get(peer).copied()
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Number of free slots
    pub fn available(&self) -> usize {
        self.slots().free_count(self.capacity)
    }

    /// Number of bound slots
    pub fn assigned(&self) -> usize {
        self.slots().assigned.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    fn peer(id: &str) -> PeerId {
        PeerId::new(id)
    }

    fn assert_bijection(alloc: &IndexAllocator) {
        let slots = alloc.slots();
        assert_eq!(
            slots.free_count(alloc.capacity()) + slots.assigned.len(),
            alloc.capacity() as usize
        );

        let bound: HashSet<u32> = slots.assigned.values().copied().collect();
        assert_eq!(bound.len(), slots.assigned.len(), "index bound twice");

        let free: Vec<u32> = slots
            .recycled
            .iter()
            .copied()
            .chain(slots.next_fresh..alloc.capacity())
            .collect();
        assert!(free.iter().all(|i| !bound.contains(i)));
        assert!(bound.iter().chain(free.iter()).all(|&i| i < alloc.capacity()));
    }

    #[test]
    fn test_fifo_reuse() {
        let alloc = IndexAllocator::new(10);

        assert_eq!(alloc.assign(&peer("p1")), Ok(0));
        assert_eq!(alloc.assign(&peer("p2")), Ok(1));
        assert_eq!(alloc.release(&peer("p1")), Some(0));
        assert_eq!(alloc.assign(&peer("p3")), Ok(0));
        assert_eq!(alloc.assign(&peer("p4")), Ok(2));
        assert_bijection(&alloc);
    }

    #[test]
    fn test_least_recently_freed_goes_first() {
        let alloc = IndexAllocator::new(4);

        for id in ["p0", "p1", "p2"] {
            alloc.assign(&peer(id)).unwrap();
        }
        alloc.release(&peer("p2"));
        alloc.release(&peer("p0"));

        assert_eq!(alloc.assign(&peer("a")), Ok(2));
        assert_eq!(alloc.assign(&peer("b")), Ok(0));
        assert_eq!(alloc.assign(&peer("c")), Ok(3));
    }

    #[test]
    fn test_assign_is_idempotent() {
        let alloc = IndexAllocator::new(4);

        let first = alloc.assign(&peer("p1")).unwrap();
        let second = alloc.assign(&peer("p1")).unwrap();
        assert_eq!(first, second);
        assert_eq!(alloc.assigned(), 1);
        assert_eq!(alloc.available(), 3);
    }

    #[test]
    fn test_zero_capacity_always_exhausted() {
        let alloc = IndexAllocator::new(0);

        for id in ["p1", "p2", "p1"] {
            assert_eq!(alloc.assign(&peer(id)), Err(AllocatorError::PoolExhausted));
        }
        assert_bijection(&alloc);
    }

    #[test]
    fn test_exhaustion_then_release() {
        let alloc = IndexAllocator::new(1);

        assert_eq!(alloc.assign(&peer("p1")), Ok(0));
        assert_eq!(alloc.assign(&peer("p2")), Err(AllocatorError::PoolExhausted));
        alloc.release(&peer("p1"));
        assert_eq!(alloc.assign(&peer("p2")), Ok(0));
    }

    #[test]
    fn test_release_unknown_is_noop() {
        let alloc = IndexAllocator::new(3);

        assert_eq!(alloc.release(&peer("ghost")), None);
        assert_eq!(alloc.available(), 3);
        assert_bijection(&alloc);
    }

    #[test]
    fn test_bijection_holds_over_mixed_sequence() {
        let alloc = IndexAllocator::new(5);
        let ids: Vec<PeerId> = (0..8).map(|i| peer(&format!("p{}", i))).collect();

        // Deterministic pseudo-random walk over assign/release
        let mut x: u32 = 7;
        for _ in 0..500 {
            x = x.wrapping_mul(1_103_515_245).wrapping_add(12_345);
            let id = &ids[(x >> 16) as usize % ids.len()];
            if (x >> 8) & 1 == 0 {
                let _ = alloc.assign(id);
            } else {
                alloc.release(id);
            }
            assert_bijection(&alloc);
        }
    }

    #[test]
    fn test_concurrent_assign_release() {
        let alloc = Arc::new(IndexAllocator::new(16));

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let alloc = alloc.clone();
                std::thread::spawn(move || {
                    for round in 0..200 {
                        let id = peer(&format!("t{}-{}", t, round % 3));
                        if alloc.assign(&id).is_ok() && round % 2 == 0 {
                            alloc.release(&id);
                        }
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_bijection(&alloc);
    }
}
