// Stack-based embedding API
//
// Indices follow the usual convention: positive indices count from the
// first argument of the running native frame (1-based), negative indices
// count down from the top, and the pseudo-indices below name the registry,
// the environment of the running function, the thread globals and the
// upvalues of the running native closure.

use crate::gc::{StringId, TableId};
use crate::lua_value::{FunctionBody, LuaType, LuaValue};
use crate::lua_vm::lua_limits::LUA_MULTRET;
use crate::lua_vm::{CFunction, LuaError, LuaResult, LuaVM, ThreadStatus};

pub const LUA_REGISTRYINDEX: i32 = -10000;
pub const LUA_ENVIRONINDEX: i32 = -10001;
pub const LUA_GLOBALSINDEX: i32 = -10002;

/// Pseudo-index of the `i`-th (1-based) upvalue of the running native closure
#[inline]
pub const fn upvalue_index(i: i32) -> i32 {
    LUA_GLOBALSINDEX - i
}

impl LuaVM {
    // ============ Stack manipulation ============

    #[inline]
    fn frame_base(&self) -> usize {
        self.state.ci().base
    }

    /// Stack slot of a real (non pseudo) index
    pub(crate) fn index2slot(&self, idx: i32) -> Option<usize> {
        if idx > 0 {
            let slot = self.frame_base() + idx as usize - 1;
            (slot < self.state.stack_top).then_some(slot)
        } else if idx > LUA_REGISTRYINDEX && idx != 0 {
            let back = (-idx) as usize;
            let slot = self.state.stack_top.checked_sub(back)?;
            (slot >= self.frame_base()).then_some(slot)
        } else {
            None
        }
    }

    /// Value at `idx`, `None` for an acceptable index with no value
    pub fn value_at(&self, idx: i32) -> Option<LuaValue> {
        match idx {
            LUA_REGISTRYINDEX => Some(LuaValue::Table(self.registry)),
            LUA_ENVIRONINDEX => Some(LuaValue::Table(self.current_env())),
            LUA_GLOBALSINDEX => Some(LuaValue::Table(self.state.globals)),
            i if i < LUA_GLOBALSINDEX => {
                let n = (LUA_GLOBALSINDEX - i) as usize;
                let LuaValue::Function(f) = self.state.stack[self.state.ci().func] else {
                    return None;
                };
                match &self.pool[f].body {
                    FunctionBody::Native { upvalues, .. } => upvalues.get(n - 1).copied(),
                    FunctionBody::Lua { .. } => None,
                }
            }
            _ => self.index2slot(idx).map(|slot| self.state.stack[slot]),
        }
    }

    /// Value at `idx`, nil when there is none
    #[inline]
    pub fn index2value(&self, idx: i32) -> LuaValue {
        self.value_at(idx).unwrap_or_default()
    }

    pub fn get_top(&self) -> usize {
        self.state.stack_top - self.frame_base()
    }

    /// Set the top to `idx`. Growing fills with nil; negative values count
    /// from the current top.
    pub fn set_top(&mut self, idx: i32) {
        if idx >= 0 {
            let base = self.frame_base();
            self.state.set_top(base + idx as usize);
        } else {
            let back = (-idx - 1) as usize;
            self.state.stack_top -= back;
        }
    }

    pub fn pop(&mut self, n: usize) {
        self.state.stack_top -= n;
    }

    pub fn push_value(&mut self, idx: i32) {
        let v = self.index2value(idx);
        self.state.push(v);
    }

    pub fn remove(&mut self, idx: i32) {
        if let Some(slot) = self.index2slot(idx) {
            let top = self.state.stack_top;
            self.state.stack.copy_within(slot + 1..top, slot);
            self.state.stack_top -= 1;
        }
    }

    /// Move the top value into `idx`, shifting the values above it up
    pub fn insert(&mut self, idx: i32) {
        if let Some(slot) = self.index2slot(idx) {
            let top = self.state.stack_top;
            let v = self.state.stack[top - 1];
            self.state.stack.copy_within(slot..top - 1, slot + 1);
            self.state.stack[slot] = v;
        }
    }

    /// Pop the top value into `idx`
    pub fn replace(&mut self, idx: i32) -> LuaResult<()> {
        let v = self.state.pop();
        match idx {
            LUA_ENVIRONINDEX | LUA_GLOBALSINDEX => {
                let LuaValue::Table(t) = v else {
                    return Err(self.error("environment must be a table"));
                };
                if idx == LUA_GLOBALSINDEX {
                    self.state.globals = t;
                } else if let LuaValue::Function(f) = self.state.stack[self.state.ci().func] {
                    self.pool[f].env = t;
                    self.gc
                        .barrier(&mut self.pool, crate::gc::GcId::FunctionId(f), v);
                }
            }
            i if i < LUA_GLOBALSINDEX => {
                let n = (LUA_GLOBALSINDEX - i) as usize;
                if let LuaValue::Function(f) = self.state.stack[self.state.ci().func] {
                    if let FunctionBody::Native { upvalues, .. } = &mut self.pool[f].body {
                        if let Some(slot) = upvalues.get_mut(n - 1) {
                            *slot = v;
                        }
                    }
                    self.gc
                        .barrier(&mut self.pool, crate::gc::GcId::FunctionId(f), v);
                }
            }
            _ => {
                if let Some(slot) = self.index2slot(idx) {
                    self.state.stack[slot] = v;
                }
            }
        }
        Ok(())
    }

    // ============ Type queries ============

    pub fn value_type(&self, idx: i32) -> LuaType {
        match self.value_at(idx) {
            Some(v) => v.type_of(),
            None => LuaType::None,
        }
    }

    pub fn type_name_at(&self, idx: i32) -> &'static str {
        self.value_type(idx).name()
    }

    pub fn is_none_or_nil(&self, idx: i32) -> bool {
        self.index2value(idx).is_nil()
    }

    // ============ Push ============

    pub fn push_nil(&mut self) {
        self.state.push(LuaValue::Nil);
    }

    pub fn push_number(&mut self, n: f64) {
        self.state.push(LuaValue::Number(n));
    }

    pub fn push_boolean(&mut self, b: bool) {
        self.state.push(LuaValue::Boolean(b));
    }

    pub fn push_string(&mut self, s: &str) {
        let v = self.create_string(s);
        self.state.push(v);
    }

    pub fn push_bytes(&mut self, bytes: &[u8]) {
        let v = self.create_bytes(bytes);
        self.state.push(v);
    }

    pub fn push(&mut self, v: LuaValue) {
        self.state.push(v);
    }

    pub fn push_function(&mut self, f: CFunction) {
        let v = self.create_function(f);
        self.state.push(v);
    }

    /// Pop `n` values and push a native closure holding them as upvalues
    pub fn push_closure(&mut self, f: CFunction, n: usize) {
        let top = self.state.stack_top;
        let upvalues = self.state.stack[top - n..top].to_vec();
        self.state.stack_top -= n;
        let id = self.create_native_closure(f, upvalues);
        self.state.push(LuaValue::Function(id));
    }

    // ============ Conversions ============

    pub fn to_number_at(&self, idx: i32) -> Option<f64> {
        self.to_number(&self.index2value(idx))
    }

    pub fn to_boolean(&self, idx: i32) -> bool {
        self.index2value(idx).is_truthy()
    }

    /// String at `idx`, converting a number in place
    pub fn to_string_id(&mut self, idx: i32) -> Option<StringId> {
        match self.value_at(idx)? {
            LuaValue::String(s) => Some(s),
            LuaValue::Number(_) => {
                let slot = self.index2slot(idx)?;
                self.tostring_slot(slot);
                self.state.stack[slot].as_string_id()
            }
            _ => None,
        }
    }

    pub fn to_string_at(&mut self, idx: i32) -> Option<String> {
        let s = self.to_string_id(idx)?;
        Some(self.pool[s].to_str_lossy().into_owned())
    }

    // ============ Tables ============

    /// Push `t[k]` for the table at `idx`, honouring `__index`
    pub fn get_field(&mut self, idx: i32, name: &str) -> LuaResult<()> {
        let t = self.index2value(idx);
        let key = self.create_string(name);
        let v = self.get_table(t, key, self.index2slot(idx))?;
        self.state.push(v);
        Ok(())
    }

    /// `t[name] = top`, popping the value
    pub fn set_field(&mut self, idx: i32, name: &str) -> LuaResult<()> {
        let t = self.index2value(idx);
        let key = self.create_string(name);
        let v = self.state.pop();
        self.set_table(t, key, v, self.index2slot(idx))
    }

    /// Replace the key on top by `t[key]`
    pub fn get_table_at(&mut self, idx: i32) -> LuaResult<()> {
        let t = self.index2value(idx);
        let key = self.state.pop();
        let v = self.get_table(t, key, self.index2slot(idx))?;
        self.state.push(v);
        Ok(())
    }

    /// `t[k] = v` with `k` and `v` the two top values, popping both
    pub fn set_table_at(&mut self, idx: i32) -> LuaResult<()> {
        let t = self.index2value(idx);
        let v = self.state.pop();
        let key = self.state.pop();
        self.set_table(t, key, v, self.index2slot(idx))
    }

    fn table_at(&mut self, idx: i32) -> LuaResult<TableId> {
        match self.index2value(idx) {
            LuaValue::Table(t) => Ok(t),
            _ => Err(self.error("table expected")),
        }
    }

    pub fn raw_get_at(&mut self, idx: i32) -> LuaResult<()> {
        let t = self.table_at(idx)?;
        let key = self.state.pop();
        let v = self.raw_get(t, &key);
        self.state.push(v);
        Ok(())
    }

    pub fn raw_set_at(&mut self, idx: i32) -> LuaResult<()> {
        let t = self.table_at(idx)?;
        let v = self.state.pop();
        let key = self.state.pop();
        self.raw_set(t, key, v)
    }

    pub fn raw_geti(&mut self, idx: i32, n: i64) -> LuaResult<()> {
        let t = self.table_at(idx)?;
        let v = self.raw_get_int(t, n);
        self.state.push(v);
        Ok(())
    }

    pub fn raw_seti(&mut self, idx: i32, n: i64) -> LuaResult<()> {
        let t = self.table_at(idx)?;
        let v = self.state.pop();
        self.raw_set_int(t, n, v);
        Ok(())
    }

    pub fn create_table_at(&mut self, narr: usize, nrec: usize) {
        let t = self.create_table(narr, nrec);
        self.state.push(LuaValue::Table(t));
    }

    /// Push the metatable of the value at `idx`; false (nothing pushed)
    /// when it has none
    pub fn get_metatable_at(&mut self, idx: i32) -> bool {
        let v = self.index2value(idx);
        match self.get_metatable(&v) {
            Some(mt) => {
                self.state.push(LuaValue::Table(mt));
                true
            }
            None => false,
        }
    }

    /// Pop a table (or nil) and make it the metatable of the value at `idx`
    pub fn set_metatable_at(&mut self, idx: i32) -> LuaResult<()> {
        let v = self.index2value(idx);
        let mt = match self.state.pop() {
            LuaValue::Nil => None,
            LuaValue::Table(t) => Some(t),
            _ => return Err(self.error("table expected")),
        };
        match v {
            LuaValue::Table(t) => self.set_table_metatable(t, mt),
            LuaValue::Userdata(u) => self.set_userdata_metatable(u, mt),
            other => self.set_type_metatable(other.type_of(), mt),
        }
        Ok(())
    }

    // ============ Calls ============

    /// Call the function below the top `nargs` values. `nresults` of -1
    /// keeps every result.
    pub fn call_at(&mut self, nargs: usize, nresults: i32) -> LuaResult<()> {
        let func = self.state.stack_top - nargs - 1;
        self.call(func, nresults)?;
        if nresults == LUA_MULTRET {
            let top = self.state.stack_top;
            if self.state.ci().top < top {
                self.state.ci_mut().top = top;
            }
        }
        Ok(())
    }

    /// Protected `call_at`. `errfunc` is the stack index of a message
    /// handler, 0 for none. On failure the error value replaces the
    /// function and its arguments.
    pub fn pcall_at(&mut self, nargs: usize, nresults: i32, errfunc: i32) -> ThreadStatus {
        let func = self.state.stack_top - nargs - 1;
        let ef = if errfunc == 0 {
            None
        } else {
            self.index2slot(errfunc)
        };
        match self.pcall(func, ef, |vm| vm.call(func, nresults)) {
            Ok(()) => ThreadStatus::Ok,
            Err(e) => ThreadStatus::from(e),
        }
    }

    /// Raise the value on top as an error
    pub fn raise_error(&mut self) -> LuaError {
        let v = self.state.pop();
        self.throw(v)
    }

    // ============ Argument helpers for native functions ============

    #[inline]
    pub fn arg_count(&self) -> usize {
        self.get_top()
    }

    /// Argument `n` (1-based), `None` past the last one
    #[inline]
    pub fn get_arg(&self, n: usize) -> Option<LuaValue> {
        let slot = self.frame_base() + n - 1;
        (slot < self.state.stack_top).then(|| self.state.stack[slot])
    }

    pub fn check_any(&mut self, n: usize) -> LuaResult<LuaValue> {
        match self.get_arg(n) {
            Some(v) => Ok(v),
            None => Err(self.arg_error(n, "value expected")),
        }
    }

    pub fn check_type(&mut self, n: usize, ty: LuaType) -> LuaResult<LuaValue> {
        match self.get_arg(n) {
            Some(v) if v.type_of() == ty => Ok(v),
            _ => Err(self.type_arg_error(n, ty.name())),
        }
    }

    pub fn check_number(&mut self, n: usize) -> LuaResult<f64> {
        let v = self.get_arg(n).unwrap_or_default();
        match self.to_number(&v) {
            Some(x) => Ok(x),
            None => Err(self.type_arg_error(n, "number")),
        }
    }

    pub fn check_integer(&mut self, n: usize) -> LuaResult<i64> {
        Ok(self.check_number(n)? as i64)
    }

    pub fn opt_number(&mut self, n: usize, default: f64) -> LuaResult<f64> {
        if self.get_arg(n).unwrap_or_default().is_nil() {
            Ok(default)
        } else {
            self.check_number(n)
        }
    }

    pub fn opt_integer(&mut self, n: usize, default: i64) -> LuaResult<i64> {
        if self.get_arg(n).unwrap_or_default().is_nil() {
            Ok(default)
        } else {
            self.check_integer(n)
        }
    }

    /// String argument, converting a number in place
    pub fn check_string_id(&mut self, n: usize) -> LuaResult<StringId> {
        match self.to_string_id(n as i32) {
            Some(s) if self.get_arg(n).is_some() => Ok(s),
            _ => Err(self.type_arg_error(n, "string")),
        }
    }

    pub fn check_string(&mut self, n: usize) -> LuaResult<String> {
        let s = self.check_string_id(n)?;
        Ok(self.pool[s].to_str_lossy().into_owned())
    }

    pub fn opt_string(&mut self, n: usize, default: &str) -> LuaResult<String> {
        if self.get_arg(n).unwrap_or_default().is_nil() {
            Ok(default.to_string())
        } else {
            self.check_string(n)
        }
    }

    pub fn check_table(&mut self, n: usize) -> LuaResult<TableId> {
        match self.get_arg(n) {
            Some(LuaValue::Table(t)) => Ok(t),
            _ => Err(self.type_arg_error(n, "table")),
        }
    }
}
