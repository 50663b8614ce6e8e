// Per-thread execution state (the lua_State of the embedding model)
// plus coroutine resume/yield, which swap states in and out of the VM.
//
// Stack layout: slot 0 holds a nil placeholder for the base frame, whose
// registers start at 1. The stack is a grow-only Vec addressed by index,
// so frames, open upvalues and saved tops never need relocation.

use crate::gc::{TableId, ThreadId, UpvalueId};
use crate::lua_value::LuaValue;
use crate::lua_vm::debug::HookFn;
use crate::lua_vm::execute::{self, call::PreCall};
use crate::lua_vm::lua_limits::{
    BASIC_STACK_SIZE, EXTRA_STACK, LUA_MINSTACK, LUA_MULTRET, STACK_GROW_SIZE, STACK_RED_ZONE,
};
use crate::lua_vm::{CallInfo, LuaError, LuaResult, LuaVM, ThreadStatus, call_status};

pub struct LuaState {
    pub(crate) stack: Vec<LuaValue>,
    /// First free slot
    pub(crate) stack_top: usize,
    /// `call_stack[0]` is the base frame and is never popped
    pub(crate) call_stack: Vec<CallInfo>,
    /// Open upvalues sorted by stack slot, ascending
    pub(crate) open_upvalues: Vec<(usize, UpvalueId)>,
    pub(crate) status: ThreadStatus,
    /// Native-call level at which this coroutine was resumed
    pub(crate) base_ccalls: usize,
    /// Stack slot of the active message handler
    pub(crate) errfunc: Option<usize>,
    pub(crate) globals: TableId,
    /// Values passed to the pending yield
    pub(crate) nyield: usize,
    pub(crate) hook: Option<HookFn>,
    pub(crate) hook_mask: u8,
    pub(crate) base_hook_count: u32,
    pub(crate) hook_count: u32,
    pub(crate) allow_hook: bool,
    /// Set once "stack overflow" was raised; frames past the depth limit
    /// are then granted to error handlers until the stack unwinds
    pub(crate) depth_overflow: bool,
}

impl LuaState {
    pub fn new(globals: TableId) -> Self {
        LuaState {
            stack: vec![LuaValue::Nil; BASIC_STACK_SIZE + EXTRA_STACK],
            stack_top: 1,
            call_stack: vec![CallInfo::new_c(0, 1, 1 + LUA_MINSTACK, 0)],
            open_upvalues: Vec::new(),
            status: ThreadStatus::Ok,
            base_ccalls: 0,
            errfunc: None,
            globals,
            nyield: 0,
            hook: None,
            hook_mask: 0,
            base_hook_count: 0,
            hook_count: 0,
            allow_hook: true,
            depth_overflow: false,
        }
    }

    #[inline(always)]
    pub(crate) fn ci(&self) -> &CallInfo {
        let n = self.call_stack.len();
        &self.call_stack[n - 1]
    }

    #[inline(always)]
    pub(crate) fn ci_mut(&mut self) -> &mut CallInfo {
        let n = self.call_stack.len();
        &mut self.call_stack[n - 1]
    }

    #[inline(always)]
    pub(crate) fn call_depth(&self) -> usize {
        self.call_stack.len()
    }

    /// Make sure slots up to `needed` (exclusive) exist, plus the slack
    /// metamethod calls rely on
    #[inline]
    pub(crate) fn grow_to(&mut self, needed: usize) {
        let wanted = needed + EXTRA_STACK;
        if wanted > self.stack.len() {
            let new_len = wanted.max(self.stack.len() * 2);
            self.stack.resize(new_len, LuaValue::Nil);
        }
    }

    #[inline(always)]
    pub(crate) fn push(&mut self, v: LuaValue) {
        if self.stack_top >= self.stack.len() {
            self.grow_to(self.stack_top + 1);
        }
        self.stack[self.stack_top] = v;
        self.stack_top += 1;
    }

    #[inline(always)]
    pub(crate) fn pop(&mut self) -> LuaValue {
        self.stack_top -= 1;
        self.stack[self.stack_top]
    }

    #[inline(always)]
    pub(crate) fn top_value(&self) -> LuaValue {
        self.stack[self.stack_top - 1]
    }

    /// Set the top, nil-filling the slots that become visible
    pub(crate) fn set_top(&mut self, new_top: usize) {
        self.grow_to(new_top);
        for slot in self.stack_top..new_top {
            self.stack[slot] = LuaValue::Nil;
        }
        self.stack_top = new_top;
    }

    /// Position of the open upvalue for `slot`, or where to insert it
    #[inline]
    pub(crate) fn find_open_upvalue(&self, slot: usize) -> Result<usize, usize> {
        self.open_upvalues.binary_search_by_key(&slot, |&(s, _)| s)
    }

    pub(crate) fn hook_rearm(&mut self) {
        self.hook_count = self.base_hook_count;
    }
}

/// `coroutine.status` answers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoStatus {
    Running,
    Suspended,
    Normal,
    Dead,
}

impl CoStatus {
    pub fn name(self) -> &'static str {
        match self {
            CoStatus::Running => "running",
            CoStatus::Suspended => "suspended",
            CoStatus::Normal => "normal",
            CoStatus::Dead => "dead",
        }
    }
}

impl LuaVM {
    /// New coroutine sharing this thread's globals and hook
    pub fn new_thread(&mut self) -> ThreadId {
        let mut state = LuaState::new(self.state.globals);
        state.hook = self.state.hook.clone();
        state.hook_mask = self.state.hook_mask;
        state.base_hook_count = self.state.base_hook_count;
        state.hook_rearm();
        self.create_thread(state)
    }

    pub fn co_status(&self, co: ThreadId) -> CoStatus {
        if co == self.current_thread {
            return CoStatus::Running;
        }
        let Some(state) = self.pool[co].state.as_deref() else {
            return CoStatus::Running;
        };
        match state.status {
            ThreadStatus::Yield => CoStatus::Suspended,
            ThreadStatus::Ok => {
                if state.call_stack.len() > 1 {
                    CoStatus::Normal
                } else if state.stack_top == 1 {
                    CoStatus::Dead
                } else {
                    CoStatus::Suspended
                }
            }
            _ => CoStatus::Dead,
        }
    }

    /// Put `co`'s state into `self.state`, parking the running one
    fn switch_thread(&mut self, co: ThreadId) {
        let Some(incoming) = self.pool[co].state.take() else {
            return;
        };
        let outgoing = std::mem::replace(&mut self.state, incoming);
        let current = self.current_thread;
        self.pool[current].state = Some(outgoing);
        self.current_thread = co;
    }

    /// Resume `co` with the top `nargs` values of the running stack.
    ///
    /// On `Ok`/`Yield` the results replace the arguments on the running
    /// stack and their count is returned. On failure exactly one value, the
    /// error, is pushed and the count is 1.
    pub fn resume(&mut self, co: ThreadId, nargs: usize) -> (ThreadStatus, usize) {
        let status = self.co_status(co);
        if status != CoStatus::Suspended {
            self.state.stack_top -= nargs;
            let msg = format!("cannot resume {} coroutine", status.name());
            let v = self.create_string(&msg);
            self.state.push(v);
            return (ThreadStatus::RuntimeError, 1);
        }
        if self.n_ccalls >= self.option.max_c_calls {
            self.state.stack_top -= nargs;
            let v = self.create_string("C stack overflow");
            self.state.push(v);
            return (ThreadStatus::RuntimeError, 1);
        }

        let first = self.state.stack_top - nargs;
        let args: Vec<LuaValue> = self.state.stack[first..self.state.stack_top].to_vec();
        self.state.stack_top = first;

        let caller = self.current_thread;
        let saved_ccalls = self.n_ccalls;
        self.switch_thread(co);
        tracing::trace!(thread = co.index(), nargs, "resume");

        let first_arg = self.state.stack_top;
        for v in args {
            self.state.push(v);
        }
        self.n_ccalls += 1;
        self.state.base_ccalls = self.n_ccalls;

        let result = stacker::maybe_grow(STACK_RED_ZONE, STACK_GROW_SIZE, || {
            self.resume_inner(first_arg)
        });

        let (status, results) = match result {
            Ok(()) => {
                let results: Vec<LuaValue> = self.state.stack[1..self.state.stack_top].to_vec();
                self.state.stack_top = 1;
                (ThreadStatus::Ok, results)
            }
            Err(LuaError::Yield) => {
                let n = self.state.nyield;
                let start = self.state.stack_top - n;
                let results: Vec<LuaValue> = self.state.stack[start..self.state.stack_top].to_vec();
                self.state.stack_top = start;
                tracing::trace!(thread = co.index(), nresults = n, "yield");
                (ThreadStatus::Yield, results)
            }
            Err(e) => {
                let status = ThreadStatus::from(e);
                self.state.status = status;
                let err = self.error_value_for(e);
                let top = self.state.stack_top;
                self.state.ci_mut().top = top;
                (status, vec![err])
            }
        };

        self.n_ccalls = saved_ccalls;
        self.switch_thread(caller);
        let n = results.len();
        for v in results {
            self.state.push(v);
        }
        (status, n)
    }

    fn resume_inner(&mut self, first_arg: usize) -> LuaResult<()> {
        if self.state.status == ThreadStatus::Ok {
            // first resume: the body sits just below the arguments
            let func = first_arg - 1;
            if let PreCall::Lua = self.precall(func, LUA_MULTRET)? {
                execute::execute(self, 1)?;
            }
            return Ok(());
        }

        self.state.status = ThreadStatus::Ok;
        if !self.state.ci().is_lua() {
            // finish the native call that yielded
            self.state.ci_mut().call_status &= !call_status::CIST_YIELDED;
            if self.poscall(first_arg)? {
                let top = self.state.ci().top;
                self.state.stack_top = top;
            }
        }
        if self.state.call_depth() > 1 {
            execute::execute(self, 1)?;
        }
        Ok(())
    }

    /// Suspend the running coroutine with its top `nresults` values. The
    /// returned error must be propagated out of the native function.
    pub fn yield_values(&mut self, nresults: usize) -> LuaError {
        if self.current_thread == self.main_thread {
            return self.error("attempt to yield from outside a coroutine");
        }
        if self.n_ccalls > self.state.base_ccalls {
            return self.error("attempt to yield across metamethod/C-call boundary");
        }
        self.state.nyield = nresults;
        self.state.status = ThreadStatus::Yield;
        self.state.ci_mut().call_status |= call_status::CIST_YIELDED;
        LuaError::Yield
    }

    /// Coroutine currently running, `None` on the main thread
    pub fn running_coroutine(&self) -> Option<ThreadId> {
        if self.current_thread == self.main_thread {
            None
        } else {
            Some(self.current_thread)
        }
    }
}
