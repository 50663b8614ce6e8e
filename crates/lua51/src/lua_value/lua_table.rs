// Hybrid table: a dense array part for keys 1..n plus a chained scatter
// hash part with Brent's variation (colliding nodes that are not in their
// main position get moved out of the way).

use std::cell::Cell;

use crate::gc::TableId;
use crate::lua_value::LuaValue;
use crate::lua_value::number::{as_integer, ceil_log2};

/// Largest array part is 2^MAXBITS
const MAXBITS: usize = 26;
const MAXASIZE: usize = 1 << MAXBITS;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TableError {
    #[error("table index is nil")]
    NilIndex,
    #[error("table index is NaN")]
    NanIndex,
    #[error("invalid key to 'next'")]
    InvalidNextKey,
    #[error("new key inserted during traversal")]
    KeyInsertedDuringNext,
}

#[derive(Debug, Clone, Copy)]
struct Node {
    key: LuaValue,
    value: LuaValue,
    next: i32,
}

const EMPTY_NODE: Node = Node {
    key: LuaValue::Nil,
    value: LuaValue::Nil,
    next: -1,
};

pub struct LuaTable {
    array: Vec<LuaValue>,
    /// Power-of-two sized, or empty
    node: Vec<Node>,
    /// Free slots are searched downward from here
    last_free: usize,
    pub metatable: Option<TableId>,
    /// Bit set = the metamethod with that index is known to be absent
    pub flags: u8,
    /// Bumped whenever a key gains a value
    inserts: u32,
    /// `inserts` as of the `next(nil)` that started the open traversal
    traversal: Cell<Option<u32>>,
}

#[inline(always)]
fn fmix64(mut x: u64) -> u64 {
    x ^= x >> 33;
    x = x.wrapping_mul(0xff51_afd7_ed55_8ccd);
    x ^= x >> 33;
    x = x.wrapping_mul(0xc4ce_b9fe_1a85_ec53);
    x ^= x >> 33;
    x
}

#[inline(always)]
fn handle_hash(tag: u64, index: u32, generation: u32) -> u64 {
    fmix64((tag << 56) ^ ((index as u64) << 24) ^ generation as u64)
}

fn key_hash(key: &LuaValue) -> u64 {
    match *key {
        LuaValue::Nil => 0,
        LuaValue::Boolean(b) => b as u64,
        // adding 0.0 folds -0 into +0
        LuaValue::Number(n) => fmix64((n + 0.0).to_bits()),
        LuaValue::String(id) => handle_hash(1, id.index, id.generation),
        LuaValue::Table(id) => handle_hash(2, id.index, id.generation),
        LuaValue::Function(id) => handle_hash(3, id.index, id.generation),
        LuaValue::Userdata(id) => handle_hash(4, id.index, id.generation),
        LuaValue::LightUserdata(p) => fmix64(p as u64 ^ (5 << 56)),
        LuaValue::Thread(id) => handle_hash(6, id.index, id.generation),
    }
}

/// Array index for a key, when the key is an integer in 1..=MAXASIZE
#[inline(always)]
fn array_index(key: &LuaValue) -> Option<usize> {
    if let LuaValue::Number(n) = key {
        if let Some(k) = as_integer(*n) {
            if k >= 1 && (k as usize) <= MAXASIZE {
                return Some(k as usize);
            }
        }
    }
    None
}

impl Default for LuaTable {
    fn default() -> Self {
        Self::new(0, 0)
    }
}

impl LuaTable {
    pub fn new(narray: usize, nhash: usize) -> Self {
        let mut t = LuaTable {
            array: vec![LuaValue::Nil; narray],
            node: Vec::new(),
            last_free: 0,
            metatable: None,
            flags: 0,
            inserts: 0,
            traversal: Cell::new(None),
        };
        t.set_node_vector(nhash);
        t
    }

    fn set_node_vector(&mut self, size: usize) {
        if size == 0 {
            self.node = Vec::new();
            self.last_free = 0;
        } else {
            let size = 1usize << ceil_log2(size);
            self.node = vec![EMPTY_NODE; size];
            self.last_free = size;
        }
    }

    #[inline(always)]
    fn main_position(&self, key: &LuaValue) -> usize {
        (key_hash(key) as usize) & (self.node.len() - 1)
    }

    pub fn array_len(&self) -> usize {
        self.array.len()
    }

    pub fn hash_size(&self) -> usize {
        self.node.len()
    }

    /// Estimated memory footprint
    pub fn byte_size(&self) -> usize {
        std::mem::size_of::<LuaTable>()
            + self.array.len() * std::mem::size_of::<LuaValue>()
            + self.node.len() * std::mem::size_of::<Node>()
    }

    fn find_node(&self, key: &LuaValue) -> Option<usize> {
        if self.node.is_empty() {
            return None;
        }
        let mut n = self.main_position(key) as i32;
        loop {
            let node = &self.node[n as usize];
            if node.key == *key {
                return Some(n as usize);
            }
            n = node.next;
            if n < 0 {
                return None;
            }
        }
    }

    pub fn get(&self, key: &LuaValue) -> LuaValue {
        match key {
            LuaValue::Nil => LuaValue::Nil,
            LuaValue::Number(n) => match as_integer(*n) {
                Some(k) if k >= 1 && (k as usize) <= self.array.len() => self.array[k as usize - 1],
                _ => self.get_from_hash(key),
            },
            _ => self.get_from_hash(key),
        }
    }

    #[inline]
    fn get_from_hash(&self, key: &LuaValue) -> LuaValue {
        match self.find_node(key) {
            Some(i) => self.node[i].value,
            None => LuaValue::Nil,
        }
    }

    pub fn get_int(&self, k: i64) -> LuaValue {
        if k >= 1 && (k as usize) <= self.array.len() {
            self.array[k as usize - 1]
        } else {
            self.get_from_hash(&LuaValue::Number(k as f64))
        }
    }

    fn find_slot_mut(&mut self, key: &LuaValue) -> Option<&mut LuaValue> {
        if let Some(k) = array_index(key) {
            if k <= self.array.len() {
                return Some(&mut self.array[k - 1]);
            }
        }
        match self.find_node(key) {
            Some(i) => Some(&mut self.node[i].value),
            None => None,
        }
    }

    /// Store `value` under `key`. Assigning nil to an existing key leaves
    /// the key in place as a dead entry until the next rehash.
    pub fn set(&mut self, key: LuaValue, value: LuaValue) -> Result<(), TableError> {
        self.flags = 0;
        if key.is_nil() {
            return Err(TableError::NilIndex);
        }
        if let Some(slot) = self.find_slot_mut(&key) {
            let revived = slot.is_nil() && !value.is_nil();
            *slot = value;
            if revived {
                self.inserts = self.inserts.wrapping_add(1);
            }
            return Ok(());
        }
        if let LuaValue::Number(n) = key {
            if n.is_nan() {
                return Err(TableError::NanIndex);
            }
        }
        if !value.is_nil() {
            self.inserts = self.inserts.wrapping_add(1);
            self.new_key(key, value);
        }
        Ok(())
    }

    pub fn set_int(&mut self, k: i64, value: LuaValue) {
        self.flags = 0;
        if k >= 1 && (k as usize) <= self.array.len() {
            let slot = &mut self.array[k as usize - 1];
            if slot.is_nil() && !value.is_nil() {
                self.inserts = self.inserts.wrapping_add(1);
            }
            *slot = value;
            return;
        }
        let key = LuaValue::Number(k as f64);
        if let Some(i) = self.find_node(&key) {
            if self.node[i].value.is_nil() && !value.is_nil() {
                self.inserts = self.inserts.wrapping_add(1);
            }
            self.node[i].value = value;
        } else if !value.is_nil() {
            self.inserts = self.inserts.wrapping_add(1);
            self.new_key(key, value);
        }
    }

    fn get_free_pos(&mut self) -> Option<usize> {
        while self.last_free > 0 {
            self.last_free -= 1;
            if self.node[self.last_free].key.is_nil() {
                return Some(self.last_free);
            }
        }
        None
    }

    /// Insert a key known to be absent
    fn new_key(&mut self, key: LuaValue, value: LuaValue) {
        if self.node.is_empty() {
            self.rehash(&key);
            self.insert_after_rehash(key, value);
            return;
        }
        let mut mp = self.main_position(&key);
        if !self.node[mp].value.is_nil() {
            let Some(free) = self.get_free_pos() else {
                self.rehash(&key);
                self.insert_after_rehash(key, value);
                return;
            };
            let other = self.main_position(&self.node[mp].key);
            if other != mp {
                // colliding node is out of its main position: move it
                let mut prev = other;
                while self.node[prev].next as usize != mp {
                    prev = self.node[prev].next as usize;
                }
                self.node[prev].next = free as i32;
                self.node[free] = self.node[mp];
                self.node[mp].next = -1;
                self.node[mp].value = LuaValue::Nil;
            } else {
                // colliding node is in its own main position: chain the new one
                self.node[free].next = self.node[mp].next;
                self.node[mp].next = free as i32;
                mp = free;
            }
        }
        self.node[mp].key = key;
        self.node[mp].value = value;
    }

    fn insert_after_rehash(&mut self, key: LuaValue, value: LuaValue) {
        if let Some(k) = array_index(&key) {
            if k <= self.array.len() {
                self.array[k - 1] = value;
                return;
            }
        }
        self.new_key(key, value);
    }

    fn rehash(&mut self, extra: &LuaValue) {
        let mut nums = [0usize; MAXBITS + 1];
        let mut nasize = self.num_use_array(&mut nums);
        let mut total = nasize;
        total += self.num_use_hash(&mut nums, &mut nasize);
        if let Some(k) = array_index(extra) {
            nums[ceil_log2(k) as usize] += 1;
            nasize += 1;
        }
        total += 1;
        let (array_size, in_array) = compute_sizes(&nums, nasize);
        self.resize(array_size, total - in_array);
    }

    fn num_use_array(&self, nums: &mut [usize; MAXBITS + 1]) -> usize {
        let mut ause = 0;
        let mut i = 1;
        let mut ttlg = 1;
        for lg in 0..=MAXBITS {
            let mut lc = 0;
            let mut lim = ttlg;
            if lim > self.array.len() {
                lim = self.array.len();
                if i > lim {
                    break;
                }
            }
            while i <= lim {
                if !self.array[i - 1].is_nil() {
                    lc += 1;
                }
                i += 1;
            }
            nums[lg] += lc;
            ause += lc;
            ttlg *= 2;
        }
        ause
    }

    fn num_use_hash(&self, nums: &mut [usize; MAXBITS + 1], nasize: &mut usize) -> usize {
        let mut total = 0;
        for node in &self.node {
            if !node.value.is_nil() {
                if let Some(k) = array_index(&node.key) {
                    nums[ceil_log2(k) as usize] += 1;
                    *nasize += 1;
                }
                total += 1;
            }
        }
        total
    }

    fn resize(&mut self, nasize: usize, nhsize: usize) {
        let old_nodes = std::mem::take(&mut self.node);
        if nasize > self.array.len() {
            self.array.resize(nasize, LuaValue::Nil);
        }
        self.set_node_vector(nhsize);
        if nasize < self.array.len() {
            let extra = self.array.split_off(nasize);
            for (i, v) in extra.into_iter().enumerate() {
                if !v.is_nil() {
                    self.insert_after_rehash(LuaValue::Number((nasize + i + 1) as f64), v);
                }
            }
        }
        for node in old_nodes.into_iter().rev() {
            if !node.value.is_nil() {
                self.insert_after_rehash(node.key, node.value);
            }
        }
    }

    /// Grow the array part to `nasize`, keeping the hash size
    pub fn resize_array(&mut self, nasize: usize) {
        let nhsize = self.node.len();
        self.resize(nasize, nhsize);
    }

    /// A border: `t[n] ~= nil and t[n+1] == nil`, or 0. With holes any
    /// border may be returned.
    pub fn length(&self) -> usize {
        let mut j = self.array.len();
        if j > 0 && self.array[j - 1].is_nil() {
            let mut i = 0;
            while j - i > 1 {
                let m = (i + j) / 2;
                if self.array[m - 1].is_nil() {
                    j = m;
                } else {
                    i = m;
                }
            }
            return i;
        }
        if self.node.is_empty() {
            return j;
        }
        self.unbound_search(j)
    }

    fn unbound_search(&self, mut j: usize) -> usize {
        let mut i = j;
        j += 1;
        while !self.get_int(j as i64).is_nil() {
            i = j;
            if j > (i32::MAX as usize) / 2 {
                // pathological table: linear search
                let mut i = 1;
                while !self.get_int(i as i64).is_nil() {
                    i += 1;
                }
                return i - 1;
            }
            j *= 2;
        }
        while j - i > 1 {
            let m = (i + j) / 2;
            if self.get_int(m as i64).is_nil() {
                j = m;
            } else {
                i = m;
            }
        }
        i
    }

    /// Traversal position following `key` (0 = before the first entry)
    fn find_index(&self, key: &LuaValue) -> Result<usize, TableError> {
        if key.is_nil() {
            return Ok(0);
        }
        if let Some(k) = array_index(key) {
            if k <= self.array.len() {
                return Ok(k);
            }
        }
        match self.find_node(key) {
            Some(i) => Ok(self.array.len() + i + 1),
            None => Err(TableError::InvalidNextKey),
        }
    }

    /// Array part first, then the hash part. Keys whose value was set to
    /// nil stay findable, so deleting during traversal is allowed. A key
    /// gaining a value between `next(nil)` and a later step of the same
    /// traversal is an error.
    pub fn next(&self, key: &LuaValue) -> Result<Option<(LuaValue, LuaValue)>, TableError> {
        if key.is_nil() {
            self.traversal.set(Some(self.inserts));
        } else if self.traversal.get().is_some_and(|stamp| stamp != self.inserts) {
            self.traversal.set(None);
            return Err(TableError::KeyInsertedDuringNext);
        }
        let entry = self.next_entry(key)?;
        if entry.is_none() {
            self.traversal.set(None);
        }
        Ok(entry)
    }

    fn next_entry(&self, key: &LuaValue) -> Result<Option<(LuaValue, LuaValue)>, TableError> {
        let mut i = self.find_index(key)?;
        while i < self.array.len() {
            if !self.array[i].is_nil() {
                return Ok(Some((LuaValue::Number((i + 1) as f64), self.array[i])));
            }
            i += 1;
        }
        let mut n = i - self.array.len();
        while n < self.node.len() {
            let node = &self.node[n];
            if !node.value.is_nil() {
                return Ok(Some((node.key, node.value)));
            }
            n += 1;
        }
        Ok(None)
    }

    // ============ Collector access ============

    pub(crate) fn array_values(&self) -> &[LuaValue] {
        &self.array
    }

    pub(crate) fn array_values_mut(&mut self) -> &mut [LuaValue] {
        &mut self.array
    }

    /// Live (non-nil valued) hash entries
    pub(crate) fn hash_entries(&self) -> impl Iterator<Item = (&LuaValue, &LuaValue)> {
        self.node
            .iter()
            .filter(|n| !n.value.is_nil())
            .map(|n| (&n.key, &n.value))
    }

    /// Key and value of hash node `i`
    pub(crate) fn node_at(&self, i: usize) -> (LuaValue, LuaValue) {
        let n = &self.node[i];
        (n.key, n.value)
    }

    /// Drop the value of hash node `i`, leaving its key as a dead entry
    pub(crate) fn clear_node_value(&mut self, i: usize) {
        self.node[i].value = LuaValue::Nil;
    }
}

/// Optimal array size: the largest n such that more than half of 1..n is
/// in use. Returns (array size, number of keys that land in it).
fn compute_sizes(nums: &[usize; MAXBITS + 1], narray: usize) -> (usize, usize) {
    let mut a = 0;
    let mut na = 0;
    let mut n = 0;
    let mut twotoi = 1usize;
    let mut i = 0;
    while i <= MAXBITS && twotoi / 2 < narray {
        if nums[i] > 0 {
            a += nums[i];
            if a > twotoi / 2 {
                n = twotoi;
                na = a;
            }
        }
        if a == narray {
            break;
        }
        i += 1;
        twotoi *= 2;
    }
    (n, na)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn num(n: f64) -> LuaValue {
        LuaValue::Number(n)
    }

    #[test]
    fn test_sequence_goes_to_array_part() {
        let mut t = LuaTable::new(0, 0);
        for i in 1..=100 {
            t.set(num(i as f64), num(i as f64 * 2.0)).unwrap();
        }
        assert_eq!(t.length(), 100);
        assert!(t.array_len() >= 64);
        assert_eq!(t.get(&num(37.0)), num(74.0));
    }

    #[test]
    fn test_nil_and_nan_keys_rejected() {
        let mut t = LuaTable::new(0, 0);
        assert_eq!(t.set(LuaValue::Nil, num(1.0)), Err(TableError::NilIndex));
        assert_eq!(t.set(num(f64::NAN), num(1.0)), Err(TableError::NanIndex));
        assert_eq!(t.get(&LuaValue::Nil), LuaValue::Nil);
    }

    #[test]
    fn test_border_with_holes_is_a_border() {
        let mut t = LuaTable::new(0, 0);
        for i in [1, 2, 3, 5, 6, 9, 10, 11, 20] {
            t.set(num(i as f64), LuaValue::Boolean(true)).unwrap();
        }
        let n = t.length() as i64;
        assert!(n == 0 || !t.get_int(n).is_nil());
        assert!(t.get_int(n + 1).is_nil());
    }

    #[test]
    fn test_next_visits_every_key_once() {
        let mut t = LuaTable::new(0, 0);
        for i in 1..=10 {
            t.set(num(i as f64), num(0.0)).unwrap();
        }
        for i in 0..20 {
            t.set(num(i as f64 + 0.5), num(1.0)).unwrap();
        }
        t.set(LuaValue::Boolean(true), num(2.0)).unwrap();
        let mut count = 0;
        let mut key = LuaValue::Nil;
        let mut seen_array_after_hash = false;
        let mut in_hash = false;
        while let Some((k, _)) = t.next(&key).unwrap() {
            let is_array_key = matches!(k, LuaValue::Number(n) if n.fract() == 0.0 && n >= 1.0 && n as usize <= t.array_len());
            if in_hash && is_array_key {
                seen_array_after_hash = true;
            }
            if !is_array_key {
                in_hash = true;
            }
            count += 1;
            key = k;
        }
        assert_eq!(count, 31);
        assert!(!seen_array_after_hash);
    }

    #[test]
    fn test_delete_during_traversal() {
        let mut t = LuaTable::new(0, 0);
        for i in 0..16 {
            t.set(num(i as f64 + 0.25), num(1.0)).unwrap();
        }
        let mut key = LuaValue::Nil;
        let mut count = 0;
        while let Some((k, _)) = t.next(&key).unwrap() {
            t.set(k, LuaValue::Nil).unwrap();
            count += 1;
            key = k;
        }
        assert_eq!(count, 16);
        assert_eq!(t.next(&LuaValue::Nil).unwrap(), None);
    }

    #[test]
    fn test_insert_during_traversal_is_rejected() {
        let mut t = LuaTable::new(0, 0);
        for i in 0..4 {
            t.set(num(i as f64 + 0.5), num(1.0)).unwrap();
        }
        let (k, _) = t.next(&LuaValue::Nil).unwrap().unwrap();
        t.set(num(100.5), num(1.0)).unwrap();
        assert_eq!(t.next(&k), Err(TableError::KeyInsertedDuringNext));

        // a fresh traversal starts clean, and updates are not insertions
        let mut key = LuaValue::Nil;
        let mut count = 0;
        while let Some((k, _)) = t.next(&key).unwrap() {
            t.set(k, num(2.0)).unwrap();
            count += 1;
            key = k;
        }
        assert_eq!(count, 5);

        // after a finished traversal, inserting is unrestricted
        t.set(num(200.5), num(1.0)).unwrap();
        assert!(t.next(&num(100.5)).is_ok());
    }

    #[test]
    fn test_next_with_unknown_key() {
        let t = LuaTable::new(0, 0);
        assert_eq!(t.next(&num(42.5)), Err(TableError::InvalidNextKey));
    }

    #[test]
    fn test_float_keys_normalize() {
        let mut t = LuaTable::new(0, 0);
        t.set(num(2.0), num(20.0)).unwrap();
        assert_eq!(t.get_int(2), num(20.0));
        t.set(num(-0.0), num(5.0)).unwrap();
        assert_eq!(t.get(&num(0.0)), num(5.0));
    }
}
