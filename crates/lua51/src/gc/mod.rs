// Incremental mark & sweep collector
//
// GC states, one cycle:
// - Pause: waiting for the allocation threshold, then marks the roots
// - Propagate: pops one gray object per step and scans it
// - SweepString / Sweep: frees dead objects, a bounded number per step,
//   first the strings then every other pool
// - Finalize: hands separated userdata to the VM, one `__gc` call per step
//
// Tri-color invariant: a black object never points to a white object.
// Mutators keep it with the forward barrier (mark the stored value) or
// the backward barrier (turn a black table gray again).

mod gc_id;
mod gc_object;
mod object_pool;
mod string_interner;

use std::collections::VecDeque;
use std::rc::Rc;

pub use gc_id::*;
pub use gc_object::*;
pub use object_pool::*;
pub use string_interner::*;

use crate::lua_value::{FunctionBody, LuaValue, Proto, Upvalue};
use crate::lua_vm::LuaState;
use crate::lua_vm::lua_limits::{
    DEFAULT_GC_PAUSE, DEFAULT_GC_STEPMUL, GCFINALIZECOST, GCSTEPSIZE, GCSWEEPMAX,
};

const GCSWEEPCOST: usize = 10;

/// Pools swept in the Sweep state, in order (strings have their own state)
const SWEEP_ORDER: [GcType; 5] = [
    GcType::Table,
    GcType::Function,
    GcType::Upvalue,
    GcType::Userdata,
    GcType::Thread,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GcState {
    Pause,
    Propagate,
    SweepString,
    Sweep,
    Finalize,
}

/// Everything the collector needs from the VM besides the object pool
pub struct GcRoots<'a> {
    /// Registry, main thread, running thread, error object, type metatables
    pub values: &'a [LuaValue],
    /// State of the running thread, checked out of its `GcThread`
    pub running: &'a mut LuaState,
    pub running_thread: ThreadId,
    pub mode_name: StringId,
    pub gc_name: StringId,
}

#[derive(Debug, Clone, Copy)]
struct WeakTable {
    table: TableId,
    weak_keys: bool,
    weak_values: bool,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct GcStats {
    pub cycles: usize,
    pub bytes_freed: usize,
    pub objects_freed: usize,
}

pub struct GC {
    pub(crate) current_white: u8,
    pub(crate) state: GcState,
    gray: Vec<GcId>,
    grayagain: Vec<GcId>,
    weak: Vec<WeakTable>,
    /// Separated userdata waiting for their finalizer
    tmudata: VecDeque<UserdataId>,
    /// Finalizers released to the VM but not run yet
    to_finalize: VecDeque<UserdataId>,
    sweep_pool: usize,
    sweep_index: u32,
    pub(crate) total_bytes: usize,
    pub(crate) threshold: usize,
    /// Live bytes after the last atomic phase
    pub(crate) estimate: usize,
    debt: usize,
    pub(crate) pause: usize,
    pub(crate) stepmul: usize,
    scratch: Vec<GcId>,
    stats: GcStats,
}

impl Default for GC {
    fn default() -> Self {
        Self::new()
    }
}

impl GC {
    pub fn new() -> Self {
        GC {
            current_white: 0,
            state: GcState::Pause,
            gray: Vec::new(),
            grayagain: Vec::new(),
            weak: Vec::new(),
            tmudata: VecDeque::new(),
            to_finalize: VecDeque::new(),
            sweep_pool: 0,
            sweep_index: 0,
            total_bytes: 0,
            threshold: 4 * GCSTEPSIZE,
            estimate: 0,
            debt: 0,
            pause: DEFAULT_GC_PAUSE,
            stepmul: DEFAULT_GC_STEPMUL,
            scratch: Vec::new(),
            stats: GcStats::default(),
        }
    }

    #[inline(always)]
    pub fn track_alloc(&mut self, size: usize) {
        self.total_bytes += size;
    }

    #[inline(always)]
    pub fn track_free(&mut self, size: usize) {
        self.total_bytes = self.total_bytes.saturating_sub(size);
    }

    #[inline(always)]
    pub fn should_step(&self) -> bool {
        self.total_bytes >= self.threshold
    }

    pub fn stats(&self) -> &GcStats {
        &self.stats
    }

    /// `collectgarbage("stop")`
    pub fn stop(&mut self) {
        self.threshold = usize::MAX;
    }

    /// `collectgarbage("restart")`
    pub fn restart(&mut self) {
        self.threshold = self.total_bytes;
    }

    fn set_threshold(&mut self) {
        self.threshold = (self.estimate / 100).saturating_mul(self.pause);
    }

    /// Next userdata whose `__gc` should run now
    pub fn next_finalizer(&mut self) -> Option<UserdataId> {
        self.to_finalize.pop_front()
    }

    pub fn has_pending_finalizers(&self) -> bool {
        !self.to_finalize.is_empty()
    }

    // ============ Marking ============

    fn mark_object(&mut self, pool: &mut ObjectPool, id: GcId) {
        match id {
            GcId::StringId(id) => {
                if let Some(s) = pool.strings.get_mut(id.index, id.generation) {
                    if s.header.is_white() {
                        // no children: gray is as good as black
                        s.header.make_gray();
                    }
                }
            }
            GcId::TableId(id) => {
                if let Some(t) = pool.tables.get_mut(id.index, id.generation) {
                    if t.header.is_white() {
                        t.header.make_gray();
                        self.gray.push(GcId::TableId(id));
                    }
                }
            }
            GcId::FunctionId(id) => {
                if let Some(f) = pool.functions.get_mut(id.index, id.generation) {
                    if f.header.is_white() {
                        f.header.make_gray();
                        self.gray.push(GcId::FunctionId(id));
                    }
                }
            }
            GcId::ThreadId(id) => {
                if let Some(t) = pool.threads.get_mut(id.index, id.generation) {
                    if t.header.is_white() {
                        t.header.make_gray();
                        self.gray.push(GcId::ThreadId(id));
                    }
                }
            }
            GcId::UpvalueId(id) => {
                let Some(uv) = pool.upvalues.get_mut(id.index, id.generation) else {
                    return;
                };
                if !uv.header.is_white() {
                    return;
                }
                uv.header.make_gray();
                // open upvalues stay gray: their value lives on a stack
                if let Upvalue::Closed(v) = uv.value {
                    uv.header.make_black();
                    self.mark_value(pool, v);
                }
            }
            GcId::UserdataId(id) => {
                let Some(ud) = pool.userdata.get_mut(id.index, id.generation) else {
                    return;
                };
                if !ud.header.is_white() {
                    return;
                }
                ud.header.make_black();
                let (metatable, env) = (ud.metatable, ud.env);
                if let Some(mt) = metatable {
                    self.mark_object(pool, GcId::TableId(mt));
                }
                self.mark_object(pool, GcId::TableId(env));
            }
        }
    }

    #[inline]
    fn mark_value(&mut self, pool: &mut ObjectPool, v: LuaValue) {
        if let Some(id) = v.gc_id() {
            self.mark_object(pool, id);
        }
    }

    fn mark_roots(&mut self, pool: &mut ObjectPool, roots: &GcRoots) {
        for v in roots.values {
            self.mark_value(pool, *v);
        }
        self.mark_object(pool, GcId::ThreadId(roots.running_thread));
    }

    /// Start a cycle: gray the roots
    fn mark_root(&mut self, pool: &mut ObjectPool, roots: &GcRoots) {
        self.gray.clear();
        self.grayagain.clear();
        self.weak.clear();
        self.mark_roots(pool, roots);
        let pending: Vec<UserdataId> = self.to_finalize.iter().copied().collect();
        for ud in pending {
            self.mark_object(pool, GcId::UserdataId(ud));
        }
        self.state = GcState::Propagate;
        tracing::debug!(total_bytes = self.total_bytes, "gc cycle start");
    }

    /// Scan one gray object. Returns an estimate of the work done.
    fn propagate_mark(&mut self, pool: &mut ObjectPool, roots: &mut GcRoots) -> usize {
        let Some(id) = self.gray.pop() else {
            return 0;
        };
        match id {
            GcId::TableId(t) => self.traverse_table(pool, roots, t),
            GcId::FunctionId(f) => self.traverse_function(pool, f),
            GcId::ThreadId(th) => self.traverse_thread(pool, roots, th),
            _ => 0,
        }
    }

    fn propagate_all(&mut self, pool: &mut ObjectPool, roots: &mut GcRoots) -> usize {
        let mut work = 0;
        while !self.gray.is_empty() {
            work += self.propagate_mark(pool, roots);
        }
        work
    }

    fn traverse_table(&mut self, pool: &mut ObjectPool, roots: &GcRoots, id: TableId) -> usize {
        let Some(gt) = pool.tables.get_mut(id.index, id.generation) else {
            return 0;
        };
        gt.header.make_black();
        let size = gt.header.size as usize;
        let metatable = gt.table.metatable;
        let (weak_keys, weak_values) = match metatable {
            Some(mt) => weak_mode(pool, mt, roots.mode_name),
            None => (false, false),
        };

        let mut scratch = std::mem::take(&mut self.scratch);
        scratch.clear();
        let table = &pool[id].table;
        if !weak_values {
            scratch.extend(table.array_values().iter().filter_map(|v| v.gc_id()));
        }
        for (k, v) in table.hash_entries() {
            if !weak_keys {
                if let Some(kid) = k.gc_id() {
                    scratch.push(kid);
                }
            }
            if !weak_values {
                if let Some(vid) = v.gc_id() {
                    scratch.push(vid);
                }
            }
        }
        if let Some(mt) = metatable {
            scratch.push(GcId::TableId(mt));
        }
        for child in scratch.drain(..) {
            self.mark_object(pool, child);
        }
        self.scratch = scratch;

        if weak_keys || weak_values {
            pool[id].header.make_gray();
            self.weak.push(WeakTable {
                table: id,
                weak_keys,
                weak_values,
            });
        }
        size
    }

    fn traverse_function(&mut self, pool: &mut ObjectPool, id: FunctionId) -> usize {
        let Some(f) = pool.functions.get_mut(id.index, id.generation) else {
            return 0;
        };
        f.header.make_black();
        let size = f.header.size as usize;

        let mut scratch = std::mem::take(&mut self.scratch);
        scratch.clear();
        scratch.push(GcId::TableId(f.env));
        match &f.body {
            FunctionBody::Lua { proto, upvalues } => {
                scratch.extend(upvalues.iter().map(|&uv| GcId::UpvalueId(uv)));
                collect_proto_constants(proto, &mut scratch);
            }
            FunctionBody::Native { upvalues, .. } => {
                scratch.extend(upvalues.iter().filter_map(|v| v.gc_id()));
            }
        }
        for child in scratch.drain(..) {
            self.mark_object(pool, child);
        }
        self.scratch = scratch;
        size
    }

    /// Threads stay gray: their stacks change without barriers, so they
    /// are scanned again in the atomic phase.
    fn traverse_thread(&mut self, pool: &mut ObjectPool, roots: &mut GcRoots, id: ThreadId) -> usize {
        let mut scratch = std::mem::take(&mut self.scratch);
        scratch.clear();

        let size = {
            let state: &mut LuaState = if id == roots.running_thread {
                &mut *roots.running
            } else {
                match pool.threads.get_mut(id.index, id.generation) {
                    Some(GcThread {
                        state: Some(state), ..
                    }) => &mut **state,
                    _ => {
                        self.scratch = scratch;
                        return 0;
                    }
                }
            };
            collect_stack(state, &mut scratch);
            std::mem::size_of::<LuaState>() + state.stack.len() * std::mem::size_of::<LuaValue>()
        };
        if let Some(t) = pool.threads.get_mut(id.index, id.generation) {
            t.header.make_gray();
        }
        self.grayagain.push(GcId::ThreadId(id));

        for child in scratch.drain(..) {
            self.mark_object(pool, child);
        }
        self.scratch = scratch;
        size
    }

    /// Open upvalues of unmarked threads may still be reachable through
    /// closures; their values live on a stack nobody scans.
    fn remark_upvalues(&mut self, pool: &mut ObjectPool) {
        let mut values = Vec::new();
        for (_, _, thread) in pool.threads.iter() {
            if !thread.header.is_white() {
                continue;
            }
            let Some(state) = &thread.state else {
                continue;
            };
            for &(slot, uv) in &state.open_upvalues {
                let marked = pool
                    .upvalues
                    .get(uv.index, uv.generation)
                    .is_some_and(|u| u.header.is_gray());
                if marked {
                    values.push(state.stack[slot]);
                }
            }
        }
        for v in values {
            self.mark_value(pool, v);
        }
    }

    fn atomic(&mut self, pool: &mut ObjectPool, roots: &mut GcRoots) {
        self.remark_upvalues(pool);
        self.propagate_all(pool, roots);

        // weak tables are scanned again for their strong parts
        let weak = std::mem::take(&mut self.weak);
        self.gray.extend(weak.iter().map(|w| GcId::TableId(w.table)));
        self.mark_roots(pool, roots);
        self.propagate_all(pool, roots);

        let mut again = std::mem::take(&mut self.grayagain);
        self.gray.append(&mut again);
        self.propagate_all(pool, roots);

        let mut udsize = self.separate_userdata(pool, roots.gc_name, false);
        let pending: Vec<UserdataId> = self
            .tmudata
            .iter()
            .chain(self.to_finalize.iter())
            .copied()
            .collect();
        for ud in pending {
            self.mark_object(pool, GcId::UserdataId(ud));
        }
        udsize += self.propagate_all(pool, roots);

        self.clear_weak_tables(pool);
        self.grayagain.clear();

        self.current_white ^= 1;
        self.sweep_pool = 0;
        self.sweep_index = 0;
        self.state = GcState::SweepString;
        self.estimate = self.total_bytes.saturating_sub(udsize);
        tracing::debug!(
            estimate = self.estimate,
            finalizers = self.tmudata.len(),
            "gc atomic phase done"
        );
    }

    /// Move unreachable userdata with a `__gc` metamethod to the
    /// finalization queue. With `all`, every userdata not finalized yet.
    /// Returns the bytes moved.
    pub(crate) fn separate_userdata(
        &mut self,
        pool: &mut ObjectPool,
        gc_name: StringId,
        all: bool,
    ) -> usize {
        let ObjectPool {
            userdata, tables, ..
        } = pool;
        let mut moved = 0;
        let mut separated = Vec::new();
        for (index, generation, ud) in userdata.iter_mut() {
            if !(all || ud.header.is_white()) || ud.header.is_finalized() {
                continue;
            }
            let has_gc = ud.metatable.is_some_and(|mt| {
                tables
                    .get(mt.index, mt.generation)
                    .is_some_and(|t| !t.table.get(&LuaValue::String(gc_name)).is_nil())
            });
            ud.header.set_finalized();
            if has_gc {
                moved += ud.header.size as usize;
                separated.push(UserdataId::new(index, generation));
            }
        }
        // newest first
        separated.reverse();
        self.tmudata.extend(separated);
        moved
    }

    /// Queue every remaining userdata for finalization (VM shutdown)
    pub(crate) fn separate_all(&mut self, pool: &mut ObjectPool, gc_name: StringId) {
        self.separate_userdata(pool, gc_name, true);
        let queued = std::mem::take(&mut self.tmudata);
        self.to_finalize.extend(queued);
    }

    fn clear_weak_tables(&mut self, pool: &mut ObjectPool) {
        let weak = std::mem::take(&mut self.weak);
        for w in &weak {
            let Some(gt) = pool.tables.get(w.table.index, w.table.generation) else {
                continue;
            };
            let array: Vec<(usize, LuaValue)> = if w.weak_values {
                gt.table
                    .array_values()
                    .iter()
                    .enumerate()
                    .filter(|(_, v)| v.is_collectable())
                    .map(|(i, v)| (i, *v))
                    .collect()
            } else {
                Vec::new()
            };
            let nodes: Vec<(usize, LuaValue, LuaValue)> = (0..gt.table.hash_size())
                .map(|i| {
                    let (k, v) = gt.table.node_at(i);
                    (i, k, v)
                })
                .filter(|(_, k, v)| !v.is_nil() && (k.is_collectable() || v.is_collectable()))
                .collect();

            let dead_slots: Vec<usize> = array
                .into_iter()
                .filter(|(_, v)| is_cleared(pool, *v, false))
                .map(|(i, _)| i)
                .collect();
            let dead_nodes: Vec<usize> = nodes
                .into_iter()
                .filter(|(_, k, v)| is_cleared(pool, *k, true) || is_cleared(pool, *v, false))
                .map(|(i, _, _)| i)
                .collect();

            let table = &mut pool[w.table].table;
            let values = table.array_values_mut();
            for i in dead_slots {
                values[i] = LuaValue::Nil;
            }
            for i in dead_nodes {
                table.clear_node_value(i);
            }
        }
    }

    // ============ Sweeping ============

    /// Free up to `budget` dead objects of the current sweep pool.
    /// Returns true when the pool is exhausted.
    fn sweep_pool_step(
        &mut self,
        pool: &mut ObjectPool,
        interner: &mut StringInterner,
        kind: GcType,
        budget: usize,
    ) -> bool {
        let other_white = GcHeader::otherwhite(self.current_white);
        let current_white = self.current_white;
        let mut count = 0;
        let end = slot_count(pool, kind);
        while self.sweep_index < end && count < budget {
            let index = self.sweep_index;
            self.sweep_index += 1;
            count += 1;
            let Some(header) = header_mut(pool, kind, index) else {
                continue;
            };
            if !header.is_dead(other_white) {
                // fixed objects are whitened too, or the next mark skips them
                header.make_white(current_white);
                continue;
            }
            let size = header.size as usize;
            self.free_object(pool, interner, kind, index);
            self.track_free(size);
            self.stats.bytes_freed += size;
            self.stats.objects_freed += 1;
        }
        self.sweep_index >= end
    }

    fn free_object(
        &mut self,
        pool: &mut ObjectPool,
        interner: &mut StringInterner,
        kind: GcType,
        index: u32,
    ) {
        match kind {
            GcType::String => {
                if let Some((generation, s)) = pool.strings.slot_mut(index) {
                    let hash = s.hash;
                    interner.remove_dead_intern(StringId::new(index, generation), hash);
                }
                pool.strings.remove(index);
            }
            GcType::Table => {
                pool.tables.remove(index);
            }
            GcType::Function => {
                pool.functions.remove(index);
            }
            GcType::Upvalue => {
                pool.upvalues.remove(index);
            }
            GcType::Userdata => {
                pool.userdata.remove(index);
            }
            GcType::Thread => {
                // closures may outlive the thread: close its open upvalues
                if let Some(thread) = pool.threads.remove(index) {
                    if let Some(state) = thread.state {
                        for &(slot, uv) in &state.open_upvalues {
                            if let Some(u) = pool.upvalues.get_mut(uv.index, uv.generation) {
                                u.value = Upvalue::Closed(state.stack[slot]);
                            }
                        }
                    }
                }
            }
        }
    }

    // ============ Stepping ============

    fn single_step(
        &mut self,
        pool: &mut ObjectPool,
        interner: &mut StringInterner,
        roots: &mut GcRoots,
    ) -> usize {
        match self.state {
            GcState::Pause => {
                self.mark_root(pool, roots);
                0
            }
            GcState::Propagate => {
                if !self.gray.is_empty() {
                    self.propagate_mark(pool, roots)
                } else {
                    self.atomic(pool, roots);
                    0
                }
            }
            GcState::SweepString => {
                let old = self.total_bytes;
                if self.sweep_pool_step(pool, interner, GcType::String, GCSWEEPMAX) {
                    self.state = GcState::Sweep;
                    self.sweep_pool = 0;
                    self.sweep_index = 0;
                }
                self.estimate = self.estimate.saturating_sub(old - self.total_bytes);
                GCSWEEPMAX * GCSWEEPCOST
            }
            GcState::Sweep => {
                let old = self.total_bytes;
                let kind = SWEEP_ORDER[self.sweep_pool];
                if self.sweep_pool_step(pool, interner, kind, GCSWEEPMAX) {
                    self.sweep_pool += 1;
                    self.sweep_index = 0;
                    if self.sweep_pool == SWEEP_ORDER.len() {
                        self.state = GcState::Finalize;
                        self.stats.cycles += 1;
                        tracing::debug!(
                            total_bytes = self.total_bytes,
                            bytes_freed = self.stats.bytes_freed,
                            "gc sweep done"
                        );
                    }
                }
                self.estimate = self.estimate.saturating_sub(old - self.total_bytes);
                GCSWEEPMAX * GCSWEEPCOST
            }
            GcState::Finalize => {
                if let Some(ud) = self.tmudata.pop_front() {
                    self.to_finalize.push_back(ud);
                    self.estimate = self.estimate.saturating_sub(GCFINALIZECOST);
                    GCFINALIZECOST
                } else {
                    self.state = GcState::Pause;
                    self.debt = 0;
                    0
                }
            }
        }
    }

    /// One incremental step, paid for by the allocation since the last one
    pub fn step(
        &mut self,
        pool: &mut ObjectPool,
        interner: &mut StringInterner,
        roots: &mut GcRoots,
    ) {
        let mut lim = ((GCSTEPSIZE / 100) * self.stepmul) as isize;
        if lim == 0 {
            lim = isize::MAX / 2;
        }
        self.debt += self.total_bytes.saturating_sub(self.threshold);
        loop {
            lim -= self.single_step(pool, interner, roots) as isize;
            if self.state == GcState::Pause || lim <= 0 {
                break;
            }
        }
        if self.state != GcState::Pause {
            if self.debt < GCSTEPSIZE {
                self.threshold = self.total_bytes + GCSTEPSIZE;
            } else {
                self.debt -= GCSTEPSIZE;
                self.threshold = self.total_bytes;
            }
        } else {
            self.set_threshold();
        }
    }

    /// Run a whole cycle synchronously
    pub fn full_gc(
        &mut self,
        pool: &mut ObjectPool,
        interner: &mut StringInterner,
        roots: &mut GcRoots,
    ) {
        if matches!(self.state, GcState::Pause | GcState::Propagate) {
            // abandon the marking: sweep with the current white keeps everything
            self.sweep_pool = 0;
            self.sweep_index = 0;
            self.gray.clear();
            self.grayagain.clear();
            self.weak.clear();
            self.state = GcState::SweepString;
        }
        while self.state != GcState::Finalize {
            self.single_step(pool, interner, roots);
        }
        self.mark_root(pool, roots);
        while self.state != GcState::Pause {
            self.single_step(pool, interner, roots);
        }
        self.set_threshold();
    }

    // ============ Barriers ============

    /// Forward barrier: `parent` (black) now references `child`
    pub fn barrier(&mut self, pool: &mut ObjectPool, parent: GcId, child: LuaValue) {
        let Some(child_id) = child.gc_id() else {
            return;
        };
        let parent_black = header_of(pool, parent).is_some_and(|h| h.is_black());
        if !parent_black || !header_of(pool, child_id).is_some_and(|h| h.is_white()) {
            return;
        }
        if self.state == GcState::Propagate {
            self.mark_object(pool, child_id);
        } else if let Some(h) = header_of_mut(pool, parent) {
            // sweeping: whiten the parent so it stops triggering barriers
            h.make_white(self.current_white);
        }
    }

    /// Backward barrier: a black table was written with a white key or value
    pub fn barrier_back(&mut self, pool: &mut ObjectPool, table: TableId, v: LuaValue) {
        let Some(vid) = v.gc_id() else {
            return;
        };
        let Some(gt) = pool.tables.get(table.index, table.generation) else {
            return;
        };
        if !gt.header.is_black() || !header_of(pool, vid).is_some_and(|h| h.is_white()) {
            return;
        }
        pool[table].header.make_gray();
        self.grayagain.push(GcId::TableId(table));
    }

    /// An open upvalue was closed: keep the invariant for its new value
    pub fn close_upvalue_barrier(&mut self, pool: &mut ObjectPool, uv: UpvalueId) {
        let Some(u) = pool.upvalues.get_mut(uv.index, uv.generation) else {
            return;
        };
        if !u.header.is_gray() {
            return;
        }
        if self.state == GcState::Propagate {
            u.header.make_black();
            if let Upvalue::Closed(v) = u.value {
                self.barrier(pool, GcId::UpvalueId(uv), v);
            }
        } else {
            u.header.make_white(self.current_white);
        }
    }
}

fn collect_proto_constants(proto: &Rc<Proto>, out: &mut Vec<GcId>) {
    out.extend(proto.constants.iter().filter_map(|k| k.gc_id()));
    for p in &proto.protos {
        collect_proto_constants(p, out);
    }
}

/// Children of a thread. Dead slots between `top` and the highest frame
/// top are cleared so stale values do not keep objects alive.
fn collect_stack(state: &mut LuaState, out: &mut Vec<GcId>) {
    out.push(GcId::TableId(state.globals));
    let top = state.stack_top.min(state.stack.len());
    out.extend(state.stack[..top].iter().filter_map(|v| v.gc_id()));
    let lim = state
        .call_stack
        .iter()
        .map(|ci| ci.top)
        .max()
        .unwrap_or(top)
        .clamp(top, state.stack.len());
    for slot in &mut state.stack[top..lim] {
        *slot = LuaValue::Nil;
    }
    out.extend(state.open_upvalues.iter().map(|&(_, uv)| GcId::UpvalueId(uv)));
}

fn weak_mode(pool: &ObjectPool, mt: TableId, mode_name: StringId) -> (bool, bool) {
    let Some(gt) = pool.tables.get(mt.index, mt.generation) else {
        return (false, false);
    };
    match gt.table.get(&LuaValue::String(mode_name)) {
        LuaValue::String(s) => {
            let bytes = pool[s].as_bytes();
            (bytes.contains(&b'k'), bytes.contains(&b'v'))
        }
        _ => (false, false),
    }
}

/// Whether a weak entry must go. Strings are values here: they are
/// marked instead of cleared.
fn is_cleared(pool: &mut ObjectPool, v: LuaValue, is_key: bool) -> bool {
    match v {
        LuaValue::String(id) => {
            if let Some(s) = pool.strings.get_mut(id.index, id.generation) {
                if s.header.is_white() {
                    s.header.make_gray();
                }
            }
            false
        }
        LuaValue::Userdata(id) => pool
            .userdata
            .get(id.index, id.generation)
            .is_some_and(|u| u.header.is_white() || (!is_key && u.header.is_finalized())),
        _ => match v.gc_id() {
            Some(id) => header_of(pool, id).is_some_and(|h| h.is_white()),
            None => false,
        },
    }
}

fn slot_count(pool: &ObjectPool, kind: GcType) -> u32 {
    match kind {
        GcType::String => pool.strings.slot_count(),
        GcType::Table => pool.tables.slot_count(),
        GcType::Function => pool.functions.slot_count(),
        GcType::Upvalue => pool.upvalues.slot_count(),
        GcType::Userdata => pool.userdata.slot_count(),
        GcType::Thread => pool.threads.slot_count(),
    }
}

fn header_mut(pool: &mut ObjectPool, kind: GcType, index: u32) -> Option<&mut GcHeader> {
    match kind {
        GcType::String => pool.strings.slot_mut(index).map(|(_, o)| o.header_mut()),
        GcType::Table => pool.tables.slot_mut(index).map(|(_, o)| o.header_mut()),
        GcType::Function => pool.functions.slot_mut(index).map(|(_, o)| o.header_mut()),
        GcType::Upvalue => pool.upvalues.slot_mut(index).map(|(_, o)| o.header_mut()),
        GcType::Userdata => pool.userdata.slot_mut(index).map(|(_, o)| o.header_mut()),
        GcType::Thread => pool.threads.slot_mut(index).map(|(_, o)| o.header_mut()),
    }
}

pub(crate) fn header_of(pool: &ObjectPool, id: GcId) -> Option<&GcHeader> {
    match id {
        GcId::StringId(i) => pool.strings.get(i.index, i.generation).map(|o| &o.header),
        GcId::TableId(i) => pool.tables.get(i.index, i.generation).map(|o| &o.header),
        GcId::FunctionId(i) => pool.functions.get(i.index, i.generation).map(|o| &o.header),
        GcId::UpvalueId(i) => pool.upvalues.get(i.index, i.generation).map(|o| &o.header),
        GcId::UserdataId(i) => pool.userdata.get(i.index, i.generation).map(|o| &o.header),
        GcId::ThreadId(i) => pool.threads.get(i.index, i.generation).map(|o| &o.header),
    }
}

pub(crate) fn header_of_mut(pool: &mut ObjectPool, id: GcId) -> Option<&mut GcHeader> {
    match id {
        GcId::StringId(i) => pool.strings.get_mut(i.index, i.generation).map(|o| &mut o.header),
        GcId::TableId(i) => pool.tables.get_mut(i.index, i.generation).map(|o| &mut o.header),
        GcId::FunctionId(i) => pool
            .functions
            .get_mut(i.index, i.generation)
            .map(|o| &mut o.header),
        GcId::UpvalueId(i) => pool
            .upvalues
            .get_mut(i.index, i.generation)
            .map(|o| &mut o.header),
        GcId::UserdataId(i) => pool
            .userdata
            .get_mut(i.index, i.generation)
            .map(|o| &mut o.header),
        GcId::ThreadId(i) => pool.threads.get_mut(i.index, i.generation).map(|o| &mut o.header),
    }
}
