//! Out-of-line inline caches
//!
//! Instructions are immutable, so every cache lives in a per-function
//! feedback vector addressed by the instruction's `CacheSlot` operand. A slot
//! adopts the state of the one site that owns it: property read, property
//! write, or global access. Caches key on shape identity tokens; they never
//! walk property maps on a hit.

use parking_lot::Mutex;
use smallvec::SmallVec;
use std::sync::Arc;

use marten_vm_bytecode::CacheSlot;

use crate::shape::Shape;

/// Generic lookups a read site performs before its cache starts filling
pub const READ_CACHE_MIN_FILL_COUNT: u32 = 3;

/// Maximum read-cache entries before the site goes permanently generic
pub const READ_CACHE_MAX_ENTRIES: usize = 10;

/// Miss budget shared by read and write sites
pub const CACHE_MISS_LIMIT: u32 = 16;

/// Shape-id chain from the receiver along its prototypes
pub type ShapeChain = SmallVec<[u64; 4]>;

/// One memoized read: a chain of shape ids and where the walk ended
#[derive(Debug, Clone)]
pub struct ReadCacheEntry {
    /// Shape ids, receiver first; the terminal id belongs to the holder
    pub chain: ShapeChain,
    /// Slot index in the holder, or None when the property was confirmed
    /// absent along the whole chain
    pub slot: Option<u32>,
}

/// Cache state of a property-read site
#[derive(Debug, Default)]
pub struct ReadCache {
    /// Generic executions observed (gates the first fill)
    pub execute_count: u32,
    /// Misses since the site was created
    pub miss_count: u32,
    /// Memoized entries, most recent first
    pub entries: Vec<ReadCacheEntry>,
}

/// What a write site memoized
#[derive(Debug, Clone)]
pub enum WriteCacheKind {
    /// Existing plain writable own data slot
    Slot {
        /// Receiver shape id
        shape_id: u64,
        /// Slot index
        slot: u32,
    },
    /// Property addition: validate the chain, then adopt the target shape
    Transition {
        /// Pre-transition shape ids, receiver first, then every prototype
        chain: ShapeChain,
        /// Shape the receiver adopts on a hit
        target: Arc<Shape>,
    },
}

/// Cache state of a property-write site
#[derive(Debug, Default)]
pub struct WriteCache {
    /// Misses since the site was created
    pub miss_count: u32,
    /// Memoized fast path, absent while invalidated
    pub kind: Option<WriteCacheKind>,
}

/// Cache state of a global read or write site
#[derive(Debug, Clone)]
pub enum GlobalCache {
    /// Nothing observed yet
    Unset,
    /// Plain data property at a known slot of the global object
    Cached {
        /// Global object shape id at memoization time
        shape_id: u64,
        /// Slot index
        slot: u32,
    },
    /// Accessor or non-plain property: this site stays on the slow path
    Uncacheable,
}

/// State of one feedback slot
#[derive(Debug)]
pub enum CacheState {
    /// Never executed
    Uninitialized,
    /// Property-read site
    Read(ReadCache),
    /// Property-write site
    Write(WriteCache),
    /// Global access site
    Global(GlobalCache),
    /// Permanent generic fallback after exhausting the miss budget
    Generic,
}

/// Per-function cache storage, owned by the context
pub struct FeedbackVector {
    slots: Vec<Mutex<CacheState>>,
}

impl FeedbackVector {
    /// Allocate a vector with `count` uninitialized slots
    pub fn new(count: u32) -> Arc<Self> {
        let mut slots = Vec::with_capacity(count as usize);
        for _ in 0..count {
            slots.push(Mutex::new(CacheState::Uninitialized));
        }
        Arc::new(Self { slots })
    }

    /// Access a slot
    #[inline]
    pub fn slot(&self, slot: CacheSlot) -> &Mutex<CacheState> {
        &self.slots[slot.index() as usize]
    }

    /// Number of slots
    #[inline]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the vector has no slots
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl std::fmt::Debug for FeedbackVector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedbackVector")
            .field("len", &self.slots.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slots_start_uninitialized() {
        let vector = FeedbackVector::new(3);
        assert_eq!(vector.len(), 3);
        for i in 0..3 {
            assert!(matches!(
                *vector.slot(CacheSlot(i)).lock(),
                CacheState::Uninitialized
            ));
        }
    }

    #[test]
    fn test_slot_state_transition() {
        let vector = FeedbackVector::new(1);
        {
            let mut slot = vector.slot(CacheSlot(0)).lock();
            *slot = CacheState::Read(ReadCache::default());
        }
        let slot = vector.slot(CacheSlot(0)).lock();
        match &*slot {
            CacheState::Read(cache) => {
                assert_eq!(cache.execute_count, 0);
                assert!(cache.entries.is_empty());
            }
            other => panic!("unexpected state: {other:?}"),
        }
    }
}
