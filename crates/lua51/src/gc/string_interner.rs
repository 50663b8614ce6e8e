use ahash::RandomState;
use std::collections::HashMap;
use std::hash::BuildHasher;

use crate::gc::StringId;
use crate::gc::gc_object::{GcHeader, GcString};
use crate::gc::object_pool::Pool;

/// Global string table - every Lua string is interned
/// - Same content always returns the same StringId, so equality is identity
/// - Buckets are keyed by the ahash content hash
/// - The collector sweeps dead strings out of both the pool and the buckets
pub struct StringInterner {
    map: HashMap<u64, Vec<StringId>, RandomState>,
    hashbuilder: RandomState,
}

impl Default for StringInterner {
    fn default() -> Self {
        Self::new()
    }
}

impl StringInterner {
    pub fn new() -> Self {
        Self {
            map: HashMap::with_capacity_and_hasher(256, RandomState::new()),
            hashbuilder: RandomState::new(),
        }
    }

    #[inline(always)]
    fn hash_bytes(&self, s: &[u8]) -> u64 {
        self.hashbuilder.hash_one(s)
    }

    /// Returns the interned id and whether a new object was allocated.
    /// A string found dead but not yet swept is resurrected.
    pub fn intern(
        &mut self,
        pool: &mut Pool<GcString>,
        s: &[u8],
        current_white: u8,
    ) -> (StringId, bool) {
        let hash = self.hash_bytes(s);
        if let Some(ids) = self.map.get(&hash) {
            let other_white = GcHeader::otherwhite(current_white);
            for &id in ids {
                if let Some(gc_str) = pool.get_mut(id.index, id.generation) {
                    if &*gc_str.data == s {
                        if gc_str.header.is_dead(other_white) {
                            gc_str.header.make_white(current_white);
                        }
                        return (id, false);
                    }
                }
            }
        }

        let size = (std::mem::size_of::<GcString>() + s.len()) as u32;
        let (index, generation) = pool.insert(GcString {
            header: GcHeader::with_white(current_white, size),
            data: s.into(),
            hash,
        });
        let id = StringId::new(index, generation);
        self.map.entry(hash).or_default().push(id);
        (id, true)
    }

    /// Lookup without allocating
    pub fn find(&self, pool: &Pool<GcString>, s: &[u8]) -> Option<StringId> {
        let hash = self.hash_bytes(s);
        self.map.get(&hash)?.iter().copied().find(|id| {
            pool.get(id.index, id.generation)
                .is_some_and(|gc_str| &*gc_str.data == s)
        })
    }

    /// Drop a swept string from its bucket
    pub fn remove_dead_intern(&mut self, id: StringId, hash: u64) {
        if let Some(ids) = self.map.get_mut(&hash) {
            ids.retain(|&i| i != id);
            if ids.is_empty() {
                self.map.remove(&hash);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.map.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}
