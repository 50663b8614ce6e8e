// Object pool - one slot arena per object type
//
// - IDs are (slot index, generation) pairs
// - Freed slots go on a free list and bump their generation
// - GC headers are embedded in the objects, the collector sweeps by slot

use std::ops::{Index, IndexMut};

use crate::gc::gc_object::{
    GcFunction, GcHeader, GcString, GcTable, GcThread, GcUpvalue, GcUserdata,
};
use crate::gc::{FunctionId, StringId, TableId, ThreadId, UpvalueId, UserdataId};

/// Access to the embedded header, used by the generic sweep
pub trait HasHeader {
    fn header(&self) -> &GcHeader;
    fn header_mut(&mut self) -> &mut GcHeader;
}

macro_rules! impl_has_header {
    ($($ty:ty),*) => {
        $(
            impl HasHeader for $ty {
                #[inline(always)]
                fn header(&self) -> &GcHeader {
                    &self.header
                }

                #[inline(always)]
                fn header_mut(&mut self) -> &mut GcHeader {
                    &mut self.header
                }
            }
        )*
    };
}

impl_has_header!(GcString, GcTable, GcFunction, GcUpvalue, GcUserdata, GcThread);

struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

pub struct Pool<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    live: usize,
}

impl<T> Default for Pool<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Pool<T> {
    pub fn new() -> Self {
        Pool {
            slots: Vec::new(),
            free: Vec::new(),
            live: 0,
        }
    }

    /// Returns (index, generation) of the new object
    pub fn insert(&mut self, value: T) -> (u32, u32) {
        self.live += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.value = Some(value);
            (index, slot.generation)
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Slot {
                generation: 0,
                value: Some(value),
            });
            (index, 0)
        }
    }

    #[inline(always)]
    pub fn get(&self, index: u32, generation: u32) -> Option<&T> {
        match self.slots.get(index as usize) {
            Some(slot) if slot.generation == generation => slot.value.as_ref(),
            _ => None,
        }
    }

    #[inline(always)]
    pub fn get_mut(&mut self, index: u32, generation: u32) -> Option<&mut T> {
        match self.slots.get_mut(index as usize) {
            Some(slot) if slot.generation == generation => slot.value.as_mut(),
            _ => None,
        }
    }

    /// Slot access for the sweeper, which walks by index
    #[inline]
    pub fn slot_mut(&mut self, index: u32) -> Option<(u32, &mut T)> {
        let slot = self.slots.get_mut(index as usize)?;
        let generation = slot.generation;
        slot.value.as_mut().map(|v| (generation, v))
    }

    pub fn remove(&mut self, index: u32) -> Option<T> {
        let slot = self.slots.get_mut(index as usize)?;
        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(index);
        self.live -= 1;
        Some(value)
    }

    #[inline]
    pub fn slot_count(&self) -> u32 {
        self.slots.len() as u32
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.live
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, u32, &T)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.value.as_ref().map(|v| (i as u32, s.generation, v)))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (u32, u32, &mut T)> {
        self.slots
            .iter_mut()
            .enumerate()
            .filter_map(|(i, s)| {
                let generation = s.generation;
                s.value.as_mut().map(|v| (i as u32, generation, v))
            })
    }
}

/// All heap objects of one runtime instance
#[derive(Default)]
pub struct ObjectPool {
    pub(crate) strings: Pool<GcString>,
    pub(crate) tables: Pool<GcTable>,
    pub(crate) functions: Pool<GcFunction>,
    pub(crate) upvalues: Pool<GcUpvalue>,
    pub(crate) userdata: Pool<GcUserdata>,
    pub(crate) threads: Pool<GcThread>,
}

impl ObjectPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_table(&mut self, table: GcTable) -> TableId {
        let (index, generation) = self.tables.insert(table);
        TableId::new(index, generation)
    }

    pub fn insert_function(&mut self, function: GcFunction) -> FunctionId {
        let (index, generation) = self.functions.insert(function);
        FunctionId::new(index, generation)
    }

    pub fn insert_upvalue(&mut self, upvalue: GcUpvalue) -> UpvalueId {
        let (index, generation) = self.upvalues.insert(upvalue);
        UpvalueId::new(index, generation)
    }

    pub fn insert_userdata(&mut self, userdata: GcUserdata) -> UserdataId {
        let (index, generation) = self.userdata.insert(userdata);
        UserdataId::new(index, generation)
    }

    pub fn insert_thread(&mut self, thread: GcThread) -> ThreadId {
        let (index, generation) = self.threads.insert(thread);
        ThreadId::new(index, generation)
    }

    #[inline]
    pub fn string(&self, id: StringId) -> Option<&GcString> {
        self.strings.get(id.index, id.generation)
    }

    #[inline]
    pub fn table(&self, id: TableId) -> Option<&GcTable> {
        self.tables.get(id.index, id.generation)
    }

    #[inline]
    pub fn table_mut(&mut self, id: TableId) -> Option<&mut GcTable> {
        self.tables.get_mut(id.index, id.generation)
    }

    #[inline]
    pub fn upvalue_mut(&mut self, id: UpvalueId) -> Option<&mut GcUpvalue> {
        self.upvalues.get_mut(id.index, id.generation)
    }

    #[inline]
    pub fn thread_mut(&mut self, id: ThreadId) -> Option<&mut GcThread> {
        self.threads.get_mut(id.index, id.generation)
    }

    /// Number of live objects across all pools
    pub fn object_count(&self) -> usize {
        self.strings.len()
            + self.tables.len()
            + self.functions.len()
            + self.upvalues.len()
            + self.userdata.len()
            + self.threads.len()
    }
}

// Handles held by reachable values are always live; indexing through a
// stale handle is an invariant violation, reported like an out-of-bounds
// slice index.
macro_rules! impl_pool_index {
    ($id:ty, $ty:ty, $field:ident, $what:literal) => {
        impl Index<$id> for ObjectPool {
            type Output = $ty;

            #[inline(always)]
            fn index(&self, id: $id) -> &$ty {
                match self.$field.get(id.index, id.generation) {
                    Some(obj) => obj,
                    None => panic!(concat!("dangling ", $what, " handle {:?}"), id),
                }
            }
        }

        impl IndexMut<$id> for ObjectPool {
            #[inline(always)]
            fn index_mut(&mut self, id: $id) -> &mut $ty {
                match self.$field.get_mut(id.index, id.generation) {
                    Some(obj) => obj,
                    None => panic!(concat!("dangling ", $what, " handle {:?}"), id),
                }
            }
        }
    };
}

impl_pool_index!(StringId, GcString, strings, "string");
impl_pool_index!(TableId, GcTable, tables, "table");
impl_pool_index!(FunctionId, GcFunction, functions, "function");
impl_pool_index!(UpvalueId, GcUpvalue, upvalues, "upvalue");
impl_pool_index!(UserdataId, GcUserdata, userdata, "userdata");
impl_pool_index!(ThreadId, GcThread, threads, "thread");
