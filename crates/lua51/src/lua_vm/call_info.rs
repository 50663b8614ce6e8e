// CallInfo - one activation record of a thread's call stack

/// Call status flags
pub mod call_status {
    /// Lua function (has bytecode)
    pub const CIST_LUA: u8 = 1 << 0;
    /// Native function
    pub const CIST_C: u8 = 1 << 1;
    /// Frame was reused by a tail call
    pub const CIST_TAIL: u8 = 1 << 2;
    /// Native frame suspended by a yield; its results arrive on resume
    pub const CIST_YIELDED: u8 = 1 << 3;
}

#[derive(Debug, Clone, Copy)]
pub struct CallInfo {
    /// Stack index of the called function
    pub func: usize,
    /// First register (or first argument, for native frames)
    pub base: usize,
    /// Frame limit: registers of a Lua frame live in base..top
    pub top: usize,
    /// Next instruction (Lua frames only)
    pub saved_pc: usize,
    /// Results wanted by the caller, -1 = all of them
    pub nresults: i32,
    /// Tail calls that replaced this frame, for debug info
    pub tailcalls: u32,
    pub call_status: u8,
}

impl CallInfo {
    pub fn new_lua(func: usize, base: usize, top: usize, nresults: i32) -> Self {
        Self {
            func,
            base,
            top,
            saved_pc: 0,
            nresults,
            tailcalls: 0,
            call_status: call_status::CIST_LUA,
        }
    }

    pub fn new_c(func: usize, base: usize, top: usize, nresults: i32) -> Self {
        Self {
            func,
            base,
            top,
            saved_pc: 0,
            nresults,
            tailcalls: 0,
            call_status: call_status::CIST_C,
        }
    }

    #[inline(always)]
    pub fn is_lua(&self) -> bool {
        self.call_status & call_status::CIST_LUA != 0
    }

    #[inline(always)]
    pub fn is_tail(&self) -> bool {
        self.call_status & call_status::CIST_TAIL != 0
    }

    /// Index of the instruction being executed
    #[inline]
    pub fn current_pc(&self) -> usize {
        self.saved_pc.saturating_sub(1)
    }
}
