/// Function call machinery
///
/// - `precall`: enter a function. Lua functions get a frame and return to
///   the dispatch loop (no Rust recursion); native functions run to
///   completion right here.
/// - `poscall`: leave the current frame, moving its results to where
///   the caller's function slot was.
/// - `call`: `precall` plus a nested dispatch loop, used from native code
///   and metamethods. Counts native nesting.
/// - `pcall`: error-recovery boundary that restores the thread state.
use crate::gc::FunctionId;
use crate::lua_value::{FunctionBody, LuaValue};
use crate::lua_vm::debug::{HookEvent, HookMask, call_hook};
use crate::lua_vm::execute::{self, TmKind};
use crate::lua_vm::lua_limits::{
    LUA_MINSTACK, LUA_MULTRET, LUAI_MAXCCALLS, STACK_GROW_SIZE, STACK_RED_ZONE,
};
use crate::lua_vm::{CFunction, CallInfo, LuaError, LuaResult, LuaVM};

pub enum PreCall {
    /// A Lua frame was pushed; the dispatch loop must run it
    Lua,
    /// A native function ran and its results are in place
    Native,
}

enum Callee {
    Lua {
        max_stack: usize,
        num_params: usize,
        is_vararg: bool,
    },
    Native(CFunction),
}

impl LuaVM {
    /// Ensure `n` free slots above the top
    pub(crate) fn check_stack(&mut self, n: usize) -> LuaResult<()> {
        let needed = self.state.stack_top + n;
        if needed > self.option.max_stack_size {
            return Err(self.runtime_error("stack overflow"));
        }
        self.state.grow_to(needed);
        Ok(())
    }

    /// Replace a non-function at `func` by its `__call` handler, shifting
    /// the original value into the first argument
    fn try_call_tm(&mut self, func: usize) -> LuaResult<FunctionId> {
        let v = self.state.stack[func];
        let tm = self.get_tm_by_obj(&v, TmKind::Call);
        let LuaValue::Function(id) = tm else {
            return Err(self.type_error(v, Some(func), "call"));
        };
        let top = self.state.stack_top;
        self.state.push(LuaValue::Nil);
        self.state.stack.copy_within(func..top, func + 1);
        self.state.stack[func] = tm;
        Ok(id)
    }

    /// Move the fixed parameters above the actual arguments, leaving the
    /// extra ones below the new base for VARARG
    fn adjust_varargs(&mut self, func: usize, num_params: usize) -> usize {
        let mut actual = self.state.stack_top - func - 1;
        while actual < num_params {
            self.state.push(LuaValue::Nil);
            actual += 1;
        }
        let fixed = self.state.stack_top - actual;
        let base = self.state.stack_top;
        for i in 0..num_params {
            let v = self.state.stack[fixed + i];
            self.state.push(v);
            self.state.stack[fixed + i] = LuaValue::Nil;
        }
        base
    }

    pub(crate) fn precall(&mut self, func: usize, nresults: i32) -> LuaResult<PreCall> {
        let fid = match self.state.stack[func] {
            LuaValue::Function(id) => id,
            _ => self.try_call_tm(func)?,
        };

        let depth = self.state.call_depth();
        let max_depth = self.option.max_call_depth;
        if depth >= max_depth {
            if !self.state.depth_overflow {
                self.state.depth_overflow = true;
                return Err(self.runtime_error("stack overflow"));
            }
            // overflow while handling overflow
            if depth >= max_depth + LUAI_MAXCCALLS {
                return Err(LuaError::ErrorHandlingError);
            }
        }

        let callee = match &self.pool[fid].body {
            FunctionBody::Lua { proto, .. } => Callee::Lua {
                max_stack: proto.max_stack_size as usize,
                num_params: proto.num_params as usize,
                is_vararg: proto.is_vararg(),
            },
            FunctionBody::Native { func, .. } => Callee::Native(*func),
        };

        match callee {
            Callee::Lua {
                max_stack,
                num_params,
                is_vararg,
            } => {
                self.check_stack(max_stack)?;
                let base = if is_vararg {
                    self.adjust_varargs(func, num_params)
                } else {
                    let base = func + 1;
                    if self.state.stack_top > base + num_params {
                        self.state.stack_top = base + num_params;
                    }
                    base
                };
                let top = base + max_stack;
                self.state.set_top(top);
                self.state
                    .call_stack
                    .push(CallInfo::new_lua(func, base, top, nresults));
                if self.state.hook_mask & HookMask::CALL != 0 {
                    // hooks see the pc already past the first instruction
                    self.state.ci_mut().saved_pc = 1;
                    call_hook(self, HookEvent::Call)?;
                    self.state.ci_mut().saved_pc = 0;
                }
                Ok(PreCall::Lua)
            }
            Callee::Native(f) => {
                self.check_stack(LUA_MINSTACK)?;
                let top = self.state.stack_top + LUA_MINSTACK;
                self.state
                    .call_stack
                    .push(CallInfo::new_c(func, func + 1, top, nresults));
                if self.state.hook_mask & HookMask::CALL != 0 {
                    call_hook(self, HookEvent::Call)?;
                }
                let n = f(self)?;
                let first = self.state.stack_top - n;
                self.poscall(first)?;
                Ok(PreCall::Native)
            }
        }
    }

    fn return_hooks(&mut self) -> LuaResult<()> {
        call_hook(self, HookEvent::Return)?;
        if self.state.ci().is_lua() {
            while self.state.hook_mask & HookMask::RETURN != 0 && self.state.ci().tailcalls > 0 {
                self.state.ci_mut().tailcalls -= 1;
                call_hook(self, HookEvent::TailReturn)?;
            }
        }
        Ok(())
    }

    /// Pop the current frame and move its results, starting at
    /// `first_result`, down to the function slot. Returns false when the
    /// caller wanted all results (the top then marks their end).
    pub(crate) fn poscall(&mut self, first_result: usize) -> LuaResult<bool> {
        if self.state.hook_mask & HookMask::RETURN != 0 {
            self.return_hooks()?;
        }
        let ci = *self.state.ci();
        self.state.call_stack.pop();

        let wanted = ci.nresults;
        let top = self.state.stack_top;
        let mut res = ci.func;
        let mut src = first_result;
        let mut i = wanted;
        while i != 0 && src < top {
            self.state.stack[res] = self.state.stack[src];
            res += 1;
            src += 1;
            i -= 1;
        }
        if i > 0 {
            self.state.grow_to(res + i as usize);
            while i > 0 {
                self.state.stack[res] = LuaValue::Nil;
                res += 1;
                i -= 1;
            }
        }
        self.state.stack_top = res;
        Ok(wanted != LUA_MULTRET)
    }

    /// Call the function at `func` with the values above it as arguments.
    /// Results replace the function and arguments.
    pub fn call(&mut self, func: usize, nresults: i32) -> LuaResult<()> {
        self.n_ccalls += 1;
        let max = self.option.max_c_calls;
        if self.n_ccalls >= max {
            if self.n_ccalls == max {
                let e = self.runtime_error("C stack overflow");
                self.n_ccalls -= 1;
                return Err(e);
            }
            if self.n_ccalls >= max + (max >> 3) {
                self.n_ccalls -= 1;
                return Err(LuaError::ErrorHandlingError);
            }
        }

        let depth = self.state.call_depth();
        // every nested level re-enters the interpreter on the native stack
        let result = stacker::maybe_grow(STACK_RED_ZONE, STACK_GROW_SIZE, || {
            match self.precall(func, nresults) {
                Ok(PreCall::Lua) => execute::execute(self, depth),
                Ok(PreCall::Native) => Ok(()),
                Err(e) => Err(e),
            }
        });
        self.n_ccalls -= 1;
        result?;
        self.check_gc()
    }

    /// Run `f` under an error boundary. On failure every frame above the
    /// entry depth is dropped, upvalues down to `old_top` are closed and the
    /// error value is left at `old_top`, which becomes the last slot.
    pub(crate) fn pcall<F>(&mut self, old_top: usize, errfunc: Option<usize>, f: F) -> LuaResult<()>
    where
        F: FnOnce(&mut LuaVM) -> LuaResult<()>,
    {
        let old_depth = self.state.call_depth();
        let old_ccalls = self.n_ccalls;
        let old_allow_hook = self.state.allow_hook;
        let old_errfunc = self.state.errfunc;
        self.state.errfunc = errfunc;

        let result = f(self);
        if let Err(e) = result {
            self.close_upvalues(old_top);
            let err = self.error_value_for(e);
            self.state.grow_to(old_top + 1);
            self.state.stack[old_top] = err;
            self.state.stack_top = old_top + 1;
            self.state.call_stack.truncate(old_depth);
            if old_depth < self.option.max_call_depth {
                self.state.depth_overflow = false;
            }
            self.n_ccalls = old_ccalls;
            self.state.allow_hook = old_allow_hook;
        }
        self.state.errfunc = old_errfunc;
        result
    }

    /// The value a caught error leaves on the stack
    pub(crate) fn error_value_for(&mut self, e: LuaError) -> LuaValue {
        match e {
            LuaError::MemoryError => LuaValue::String(self.memory_error_name),
            LuaError::ErrorHandlingError => self.create_string("error in error handling"),
            _ => self.error_object,
        }
    }

    /// Raise `value`, first passing it through the message handler of the
    /// innermost protected call when there is one
    pub fn throw(&mut self, value: LuaValue) -> LuaError {
        self.error_object = value;
        let Some(ef) = self.state.errfunc else {
            return LuaError::RuntimeError;
        };
        let handler = self.state.stack[ef];
        if !handler.is_function() {
            return LuaError::ErrorHandlingError;
        }

        let top = self.state.stack_top;
        self.state.push(handler);
        self.state.push(value);
        self.state.errfunc = None;
        let result = self.call(top, 1);
        self.state.errfunc = Some(ef);
        match result {
            Ok(()) => {
                self.error_object = self.state.pop();
                LuaError::RuntimeError
            }
            Err(LuaError::MemoryError) => LuaError::MemoryError,
            Err(_) => LuaError::ErrorHandlingError,
        }
    }
}
