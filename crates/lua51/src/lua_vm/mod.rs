// Lua Virtual Machine
// Global state shared by every thread of one runtime instance: the object
// pool, the string table, the collector, the registry and the per-type
// metatables. The running thread's `LuaState` is checked out into
// `LuaVM::state`; every other thread keeps its state in its `GcThread`.
pub mod api;
mod call_info;
pub mod debug;
mod execute;
mod lua_error;
pub mod lua_limits;
mod lua_state;
pub mod opcode;
mod safe_option;

use std::any::Any;
use std::rc::Rc;

use crate::compiler;
use crate::gc::{
    FunctionId, GC, GcFunction, GcHeader, GcId, GcRoots, GcString, GcTable, GcThread, GcUpvalue,
    GcUserdata, ObjectPool, StringId, StringInterner, TableId, ThreadId, UpvalueId, UserdataId,
};
use crate::lua_value::number::{number2str, str2number};
use crate::lua_value::{
    FunctionBody, LuaTable, LuaValue, NUM_TYPES, Proto, Upvalue, dump_proto, undump_proto,
};
use crate::stdlib::{self, Stdlib};

pub use call_info::{CallInfo, call_status};
pub use debug::{DebugInfo, HookEvent, HookFn, HookMask};
pub use execute::TmKind;
pub use lua_error::{LuaError, LuaResult, ThreadStatus};
pub use lua_state::{CoStatus, LuaState};
pub use opcode::{Instruction, OpCode};
pub use safe_option::SafeOption;

use execute::TM_N;
use lua_limits::LUA_MULTRET;

/// Native function. Arguments are the values between the frame base and
/// the stack top; the function pushes its results and returns how many.
pub type CFunction = fn(&mut LuaVM) -> LuaResult<usize>;

/// `collectgarbage` / `lua_gc` requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GcOp {
    Stop,
    Restart,
    Collect,
    /// Kilobytes in use
    Count,
    /// Remainder of `Count` in bytes
    CountBytes,
    /// Step of `data` kilobytes; answers 1 when a cycle finished
    Step,
    SetPause,
    SetStepMul,
}

pub struct LuaVM {
    pub(crate) pool: ObjectPool,
    pub(crate) interner: StringInterner,
    pub(crate) gc: GC,

    /// State of the running thread
    pub(crate) state: Box<LuaState>,
    pub(crate) current_thread: ThreadId,
    pub(crate) main_thread: ThreadId,

    pub(crate) registry: TableId,
    /// Metatables for non-table, non-userdata types, indexed by `LuaType`
    pub(crate) type_metatables: [Option<TableId>; NUM_TYPES],
    /// Interned metamethod names, indexed by `TmKind`
    pub(crate) tm_names: [StringId; TM_N],
    pub(crate) memory_error_name: StringId,

    /// Value of the error being raised
    pub(crate) error_object: LuaValue,
    /// Nested native-level calls
    pub(crate) n_ccalls: usize,
    pub(crate) option: SafeOption,
    /// Values the host keeps alive across collections
    pinned: Vec<LuaValue>,
    in_finalizer: bool,
    closed: bool,
}

fn alloc_table(pool: &mut ObjectPool, gc: &mut GC, narr: usize, nrec: usize) -> TableId {
    let table = LuaTable::new(narr, nrec);
    let size = std::mem::size_of::<GcTable>() + table.byte_size();
    gc.track_alloc(size);
    pool.insert_table(GcTable {
        header: GcHeader::with_white(gc.current_white, size as u32),
        table,
    })
}

fn intern_fixed(
    pool: &mut ObjectPool,
    interner: &mut StringInterner,
    gc: &mut GC,
    s: &str,
) -> StringId {
    let (id, new) = interner.intern(&mut pool.strings, s.as_bytes(), gc.current_white);
    if new {
        gc.track_alloc(pool[id].header.size as usize);
    }
    pool[id].header.set_fixed();
    id
}

impl LuaVM {
    pub fn new(option: SafeOption) -> Self {
        let mut pool = ObjectPool::new();
        let mut interner = StringInterner::new();
        let mut gc = GC::new();

        let registry = alloc_table(&mut pool, &mut gc, 0, 2);
        pool[registry].header.set_fixed();
        let globals = alloc_table(&mut pool, &mut gc, 0, 32);

        let tm_names = TmKind::ALL.map(|tm| intern_fixed(&mut pool, &mut interner, &mut gc, tm.name()));
        let memory_error_name =
            intern_fixed(&mut pool, &mut interner, &mut gc, "not enough memory");

        let size = std::mem::size_of::<GcThread>() + std::mem::size_of::<LuaState>();
        gc.track_alloc(size);
        let main_thread = pool.insert_thread(GcThread {
            header: GcHeader::with_white(gc.current_white, size as u32),
            state: None,
        });
        pool[main_thread].header.set_fixed();

        let mut vm = LuaVM {
            pool,
            interner,
            gc,
            state: Box::new(LuaState::new(globals)),
            current_thread: main_thread,
            main_thread,
            registry,
            type_metatables: [None; NUM_TYPES],
            tm_names,
            memory_error_name,
            error_object: LuaValue::Nil,
            n_ccalls: 0,
            option,
            pinned: Vec::new(),
            in_finalizer: false,
            closed: false,
        };
        vm.gc.estimate = vm.gc.total_bytes;
        vm
    }

    pub fn open_stdlib(&mut self, lib: Stdlib) -> LuaResult<()> {
        stdlib::open(self, lib)
    }

    // ============ Allocation ============

    pub fn intern(&mut self, bytes: &[u8]) -> StringId {
        let (id, new) = self
            .interner
            .intern(&mut self.pool.strings, bytes, self.gc.current_white);
        if new {
            let size = self.pool[id].header.size as usize;
            self.gc.track_alloc(size);
        }
        id
    }

    pub fn create_string(&mut self, s: &str) -> LuaValue {
        LuaValue::String(self.intern(s.as_bytes()))
    }

    pub fn create_bytes(&mut self, bytes: &[u8]) -> LuaValue {
        LuaValue::String(self.intern(bytes))
    }

    pub fn create_table(&mut self, narr: usize, nrec: usize) -> TableId {
        alloc_table(&mut self.pool, &mut self.gc, narr, nrec)
    }

    pub fn create_lua_closure(
        &mut self,
        proto: Rc<Proto>,
        upvalues: Vec<UpvalueId>,
        env: TableId,
    ) -> FunctionId {
        let size = std::mem::size_of::<GcFunction>()
            + upvalues.len() * std::mem::size_of::<UpvalueId>();
        self.gc.track_alloc(size);
        self.pool.insert_function(GcFunction {
            header: GcHeader::with_white(self.gc.current_white, size as u32),
            env,
            body: FunctionBody::Lua { proto, upvalues },
        })
    }

    /// Native closure with the environment of the running function
    pub fn create_native_closure(&mut self, func: CFunction, upvalues: Vec<LuaValue>) -> FunctionId {
        let size = std::mem::size_of::<GcFunction>()
            + upvalues.len() * std::mem::size_of::<LuaValue>();
        self.gc.track_alloc(size);
        let env = self.current_env();
        self.pool.insert_function(GcFunction {
            header: GcHeader::with_white(self.gc.current_white, size as u32),
            env,
            body: FunctionBody::Native { func, upvalues },
        })
    }

    pub fn create_function(&mut self, func: CFunction) -> LuaValue {
        LuaValue::Function(self.create_native_closure(func, Vec::new()))
    }

    pub fn create_userdata(&mut self, data: Box<dyn Any>) -> UserdataId {
        let size = std::mem::size_of::<GcUserdata>() + std::mem::size_of_val(&*data);
        self.gc.track_alloc(size);
        let env = self.current_env();
        self.pool.insert_userdata(GcUserdata {
            header: GcHeader::with_white(self.gc.current_white, size as u32),
            metatable: None,
            env,
            data,
        })
    }

    pub(crate) fn create_thread(&mut self, state: LuaState) -> ThreadId {
        let size = std::mem::size_of::<GcThread>()
            + std::mem::size_of::<LuaState>()
            + state.stack.len() * std::mem::size_of::<LuaValue>();
        self.gc.track_alloc(size);
        self.pool.insert_thread(GcThread {
            header: GcHeader::with_white(self.gc.current_white, size as u32),
            state: Some(Box::new(state)),
        })
    }

    fn new_closed_upvalue(&mut self) -> UpvalueId {
        let size = std::mem::size_of::<GcUpvalue>();
        self.gc.track_alloc(size);
        self.pool.insert_upvalue(GcUpvalue {
            header: GcHeader::with_white(self.gc.current_white, size as u32),
            value: Upvalue::Closed(LuaValue::Nil),
        })
    }

    /// Environment of the running function, or the thread globals at the
    /// base level
    pub(crate) fn current_env(&self) -> TableId {
        if self.state.call_depth() == 1 {
            return self.state.globals;
        }
        match self.state.stack[self.state.ci().func] {
            LuaValue::Function(f) => self.pool[f].env,
            _ => self.state.globals,
        }
    }

    pub fn globals(&self) -> TableId {
        self.state.globals
    }

    pub fn registry(&self) -> TableId {
        self.registry
    }

    // ============ Raw table access ============

    pub fn raw_get(&self, t: TableId, key: &LuaValue) -> LuaValue {
        self.pool[t].table.get(key)
    }

    pub fn raw_get_int(&self, t: TableId, k: i64) -> LuaValue {
        self.pool[t].table.get_int(k)
    }

    fn account_table_resize(&mut self, t: TableId, before: usize) {
        let after = self.pool[t].table.byte_size();
        if after != before {
            let header = &mut self.pool[t].header;
            header.size = (header.size as usize + after).saturating_sub(before) as u32;
            if after > before {
                self.gc.track_alloc(after - before);
            } else {
                self.gc.track_free(before - after);
            }
        }
    }

    pub fn raw_set(&mut self, t: TableId, key: LuaValue, value: LuaValue) -> LuaResult<()> {
        let before = self.pool[t].table.byte_size();
        if let Err(e) = self.pool[t].table.set(key, value) {
            return Err(self.runtime_error(e.to_string()));
        }
        self.account_table_resize(t, before);
        self.gc.barrier_back(&mut self.pool, t, key);
        self.gc.barrier_back(&mut self.pool, t, value);
        Ok(())
    }

    pub fn raw_set_int(&mut self, t: TableId, k: i64, value: LuaValue) {
        let before = self.pool[t].table.byte_size();
        self.pool[t].table.set_int(k, value);
        self.account_table_resize(t, before);
        self.gc.barrier_back(&mut self.pool, t, value);
    }

    /// Grow the array part to at least `n` slots
    pub(crate) fn resize_array(&mut self, t: TableId, n: usize) {
        if n > self.pool[t].table.array_len() {
            let before = self.pool[t].table.byte_size();
            self.pool[t].table.resize_array(n);
            self.account_table_resize(t, before);
        }
    }

    pub fn table_next(
        &mut self,
        t: TableId,
        key: &LuaValue,
    ) -> LuaResult<Option<(LuaValue, LuaValue)>> {
        match self.pool[t].table.next(key) {
            Ok(entry) => Ok(entry),
            Err(e) => Err(self.runtime_error(e.to_string())),
        }
    }

    pub fn set_table_metatable(&mut self, t: TableId, mt: Option<TableId>) {
        self.pool[t].table.metatable = mt;
        if let Some(mt) = mt {
            self.gc
                .barrier(&mut self.pool, GcId::TableId(t), LuaValue::Table(mt));
        }
    }

    pub fn set_userdata_metatable(&mut self, u: UserdataId, mt: Option<TableId>) {
        self.pool[u].metatable = mt;
        if let Some(mt) = mt {
            self.gc
                .barrier(&mut self.pool, GcId::UserdataId(u), LuaValue::Table(mt));
        }
    }

    /// Environment of a closure; native functions see the thread globals
    pub fn function_env(&self, f: FunctionId) -> TableId {
        let func = &self.pool[f];
        if func.body.is_native() {
            self.state.globals
        } else {
            func.env
        }
    }

    /// Replace the environment of a Lua closure. False for native functions.
    pub fn set_function_env(&mut self, f: FunctionId, env: TableId) -> bool {
        if self.pool[f].body.is_native() {
            return false;
        }
        self.pool[f].env = env;
        self.gc
            .barrier(&mut self.pool, GcId::FunctionId(f), LuaValue::Table(env));
        true
    }

    /// Metatable shared by all values of a basic type
    pub fn set_type_metatable(&mut self, ty: crate::lua_value::LuaType, mt: Option<TableId>) {
        if ty as i8 >= 0 {
            self.type_metatables[ty as usize] = mt;
        }
    }

    // ============ Upvalues ============

    pub(crate) fn get_upvalue(&self, uv: UpvalueId) -> LuaValue {
        match self.pool[uv].value {
            Upvalue::Closed(v) => v,
            Upvalue::Open { thread, slot } => {
                if thread == self.current_thread {
                    self.state.stack[slot]
                } else {
                    match &self.pool[thread].state {
                        Some(state) => state.stack[slot],
                        None => LuaValue::Nil,
                    }
                }
            }
        }
    }

    pub(crate) fn set_upvalue(&mut self, uv: UpvalueId, v: LuaValue) {
        match self.pool[uv].value {
            Upvalue::Closed(_) => {
                self.pool[uv].value = Upvalue::Closed(v);
                self.gc.barrier(&mut self.pool, GcId::UpvalueId(uv), v);
            }
            Upvalue::Open { thread, slot } => {
                if thread == self.current_thread {
                    self.state.stack[slot] = v;
                } else if let Some(state) = self.pool[thread].state.as_mut() {
                    state.stack[slot] = v;
                }
            }
        }
    }

    /// Open upvalue for a stack slot of the running thread, shared with
    /// every closure that already captured it
    pub(crate) fn find_upvalue(&mut self, slot: usize) -> UpvalueId {
        match self.state.find_open_upvalue(slot) {
            Ok(pos) => self.state.open_upvalues[pos].1,
            Err(pos) => {
                let size = std::mem::size_of::<GcUpvalue>();
                self.gc.track_alloc(size);
                let uv = self.pool.insert_upvalue(GcUpvalue {
                    header: GcHeader::with_white(self.gc.current_white, size as u32),
                    value: Upvalue::Open {
                        thread: self.current_thread,
                        slot,
                    },
                });
                self.state.open_upvalues.insert(pos, (slot, uv));
                uv
            }
        }
    }

    /// Close every open upvalue at or above `level`
    pub(crate) fn close_upvalues(&mut self, level: usize) {
        while let Some(&(slot, uv)) = self.state.open_upvalues.last() {
            if slot < level {
                break;
            }
            self.state.open_upvalues.pop();
            let v = self.state.stack[slot];
            self.pool[uv].value = Upvalue::Closed(v);
            self.gc.close_upvalue_barrier(&mut self.pool, uv);
        }
    }

    // ============ Coercions ============

    /// Number value, converting strings with the numeral grammar
    pub fn to_number(&self, v: &LuaValue) -> Option<f64> {
        match v {
            LuaValue::Number(n) => Some(*n),
            LuaValue::String(s) => str2number(self.pool[*s].as_bytes()),
            _ => None,
        }
    }

    /// String contents of a string or number
    pub fn to_str(&self, v: &LuaValue) -> Option<String> {
        match v {
            LuaValue::String(s) => Some(self.pool[*s].to_str_lossy().into_owned()),
            LuaValue::Number(n) => Some(number2str(*n)),
            _ => None,
        }
    }

    pub fn string_bytes(&self, s: StringId) -> &[u8] {
        self.pool[s].as_bytes()
    }

    // ============ Collector ============

    fn gc_values(&self) -> Vec<LuaValue> {
        let mut values = Vec::with_capacity(4 + NUM_TYPES + self.pinned.len());
        values.push(LuaValue::Table(self.registry));
        values.push(LuaValue::Thread(self.main_thread));
        values.push(LuaValue::Thread(self.current_thread));
        values.push(self.error_object);
        values.extend(self.type_metatables.iter().flatten().map(|&mt| LuaValue::Table(mt)));
        values.extend_from_slice(&self.pinned);
        values
    }

    /// Keep `value` alive until a matching `unpin`. Pins nest: a value
    /// pinned twice needs two `unpin` calls.
    pub fn pin(&mut self, value: LuaValue) {
        if value.is_collectable() {
            self.pinned.push(value);
        }
    }

    /// Drop one pin of `value`. False when it was not pinned.
    pub fn unpin(&mut self, value: &LuaValue) -> bool {
        match self.pinned.iter().rposition(|v| v == value) {
            Some(i) => {
                self.pinned.swap_remove(i);
                true
            }
            None => false,
        }
    }

    fn gc_step(&mut self) {
        let values = self.gc_values();
        let mut roots = GcRoots {
            values: &values,
            running: &mut self.state,
            running_thread: self.current_thread,
            mode_name: self.tm_names[TmKind::Mode as usize],
            gc_name: self.tm_names[TmKind::Gc as usize],
        };
        self.gc.step(&mut self.pool, &mut self.interner, &mut roots);
    }

    /// Run a whole collection cycle, then the finalizers it released
    pub fn full_gc(&mut self) -> LuaResult<()> {
        let values = self.gc_values();
        let mut roots = GcRoots {
            values: &values,
            running: &mut self.state,
            running_thread: self.current_thread,
            mode_name: self.tm_names[TmKind::Mode as usize],
            gc_name: self.tm_names[TmKind::Gc as usize],
        };
        self.gc.full_gc(&mut self.pool, &mut self.interner, &mut roots);
        self.run_finalizers()
    }

    /// Collector checkpoint: step when the allocation threshold is crossed
    pub(crate) fn check_gc(&mut self) -> LuaResult<()> {
        if self.gc.total_bytes > self.option.max_memory_limit && !self.in_finalizer {
            self.full_gc()?;
            if self.gc.total_bytes > self.option.max_memory_limit {
                self.error_object = LuaValue::String(self.memory_error_name);
                return Err(LuaError::MemoryError);
            }
        }
        if self.gc.should_step() {
            self.gc_step();
        }
        self.run_finalizers()
    }

    /// Call `__gc` for each userdata the collector released. Errors are
    /// logged and dropped.
    fn run_finalizers(&mut self) -> LuaResult<()> {
        if self.in_finalizer {
            return Ok(());
        }
        self.in_finalizer = true;
        while let Some(ud) = self.gc.next_finalizer() {
            let mt = self.pool.userdata.get(ud.index, ud.generation).and_then(|u| u.metatable);
            let tm = self.fast_tm(mt, TmKind::Gc);
            if !tm.is_function() {
                continue;
            }
            let old_threshold = self.gc.threshold;
            self.gc.threshold = self.gc.total_bytes.saturating_mul(2);
            let old_allow_hook = self.state.allow_hook;
            self.state.allow_hook = false;

            let top = self.state.stack_top;
            self.state.push(tm);
            self.state.push(LuaValue::Userdata(ud));
            let result = self.pcall(top, None, |vm| vm.call(top, 0));
            if let Err(e) = result {
                let msg = self.value_message(self.state.stack[top]);
                tracing::warn!(error = %e, message = %msg, "error in __gc metamethod");
            }
            self.state.stack_top = top;

            self.state.allow_hook = old_allow_hook;
            self.gc.threshold = old_threshold;
        }
        self.in_finalizer = false;
        Ok(())
    }

    pub fn gc_control(&mut self, op: GcOp, data: usize) -> LuaResult<usize> {
        match op {
            GcOp::Stop => self.gc.stop(),
            GcOp::Restart => self.gc.restart(),
            GcOp::Collect => self.full_gc()?,
            GcOp::Count => return Ok(self.gc.total_bytes >> 10),
            GcOp::CountBytes => return Ok(self.gc.total_bytes & 0x3ff),
            GcOp::Step => {
                let kb = data << 10;
                self.gc.threshold = self.gc.total_bytes.saturating_sub(kb);
                let before = self.gc.stats().cycles;
                self.gc_step();
                self.run_finalizers()?;
                let finished = self.gc.stats().cycles > before
                    || self.gc.state == crate::gc::GcState::Pause;
                return Ok(finished as usize);
            }
            GcOp::SetPause => {
                let old = self.gc.pause;
                self.gc.pause = data;
                return Ok(old);
            }
            GcOp::SetStepMul => {
                let old = self.gc.stepmul;
                self.gc.stepmul = data;
                return Ok(old);
            }
        }
        Ok(0)
    }

    /// Bytes currently accounted by the collector
    pub fn gc_total_bytes(&self) -> usize {
        self.gc.total_bytes
    }

    pub fn gc_stats(&self) -> crate::gc::GcStats {
        *self.gc.stats()
    }

    pub fn object_count(&self) -> usize {
        self.pool.object_count()
    }

    // ============ Loading and running ============

    /// Compile source text, or undump a binary chunk, into a closure over
    /// the thread globals. On failure the message is the error value.
    ///
    /// The closure comes back pinned, so it survives any collection the
    /// host triggers before calling it. `unpin` it once it is no longer
    /// needed.
    pub fn load(&mut self, chunk: &[u8], chunkname: &str) -> LuaResult<LuaValue> {
        let f = self.load_chunk(chunk, chunkname)?;
        self.pin(f);
        Ok(f)
    }

    /// `load` without the pin, for callers that put the closure on the
    /// stack before the next collector checkpoint
    pub(crate) fn load_chunk(&mut self, chunk: &[u8], chunkname: &str) -> LuaResult<LuaValue> {
        let result = if chunk.first() == Some(&0x1b) {
            undump_proto(self, chunk, chunkname)
        } else {
            compiler::compile(self, chunk, chunkname)
        };
        match result {
            Ok(proto) => {
                let upvalues = (0..proto.num_upvalues).map(|_| self.new_closed_upvalue()).collect();
                let env = self.state.globals;
                Ok(LuaValue::Function(self.create_lua_closure(proto, upvalues, env)))
            }
            Err(msg) => {
                self.error_object = self.create_string(&msg);
                Err(LuaError::SyntaxError)
            }
        }
    }

    /// Run a chunk of source code and return its results
    pub fn execute(&mut self, source: &str) -> LuaResult<Vec<LuaValue>> {
        let f = self.load_chunk(source.as_bytes(), source)?;
        self.call_function(f, &[])
    }

    /// Protected call of `f` from the host. The results are not pinned:
    /// collectable ones stay valid until the next call into the runtime
    /// unless the host pins them or stores them somewhere reachable.
    pub fn call_function(&mut self, f: LuaValue, args: &[LuaValue]) -> LuaResult<Vec<LuaValue>> {
        let func = self.state.stack_top;
        self.state.push(f);
        for v in args {
            self.state.push(*v);
        }
        let result = self.pcall(func, None, |vm| vm.call(func, LUA_MULTRET));
        match result {
            Ok(()) => {
                let results = self.state.stack[func..self.state.stack_top].to_vec();
                self.state.stack_top = func;
                Ok(results)
            }
            Err(e) => {
                self.error_object = self.state.stack[func];
                self.state.stack_top = func;
                Err(e)
            }
        }
    }

    pub fn get_global(&mut self, name: &str) -> LuaValue {
        let key = self.create_string(name);
        self.raw_get(self.state.globals, &key)
    }

    pub fn set_global(&mut self, name: &str, value: LuaValue) -> LuaResult<()> {
        let key = self.create_string(name);
        let globals = self.state.globals;
        self.raw_set(globals, key, value)
    }

    pub fn register_function(&mut self, name: &str, func: CFunction) -> LuaResult<()> {
        let f = self.create_function(func);
        self.set_global(name, f)
    }

    /// Binary chunk of a Lua function
    pub fn dump(&self, f: &LuaValue, strip: bool) -> Option<Vec<u8>> {
        let LuaValue::Function(id) = f else {
            return None;
        };
        let proto = self.pool[*id].body.proto()?;
        Some(dump_proto(self, proto, strip))
    }

    fn value_message(&self, v: LuaValue) -> String {
        match v {
            LuaValue::String(_) | LuaValue::Number(_) => self.to_str(&v).unwrap_or_default(),
            LuaValue::Nil => "nil".to_string(),
            _ => format!("(error object is a {} value)", v.type_name()),
        }
    }

    /// Text of the last error raised out of `execute`, `call_function` or `load`
    pub fn get_error_message(&self, e: LuaError) -> String {
        match e {
            LuaError::MemoryError => "not enough memory".to_string(),
            _ => self.value_message(self.error_object),
        }
    }

    /// Run the finalizers of every remaining userdata. Further use of the
    /// runtime after closing is allowed but nothing is finalized twice.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.close_upvalues(0);
        let gc_name = self.tm_names[TmKind::Gc as usize];
        self.gc.separate_all(&mut self.pool, gc_name);
        if let Err(e) = self.run_finalizers() {
            tracing::warn!(error = %e, "error while closing the runtime");
        }
    }
}

impl Drop for LuaVM {
    fn drop(&mut self) {
        self.close();
    }
}

impl GcString {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
