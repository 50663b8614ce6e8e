use crate::lua_vm::lua_limits::{LUAI_MAXCALLS, LUAI_MAXCCALLS, LUAI_MAXSTACK};

/// Resource limits of one runtime instance
#[derive(Debug, Clone)]
pub struct SafeOption {
    /// Maximum stack slots per thread
    pub max_stack_size: usize,
    /// Maximum nested Lua and native frames per thread
    pub max_call_depth: usize,
    /// Maximum nested native-level calls (metamethods, pcall, resume, parser)
    pub max_c_calls: usize,
    /// Allocation ceiling in bytes; crossing it raises "not enough memory"
    pub max_memory_limit: usize,
}

impl Default for SafeOption {
    fn default() -> Self {
        Self {
            max_stack_size: LUAI_MAXSTACK,
            max_call_depth: LUAI_MAXCALLS,
            max_c_calls: LUAI_MAXCCALLS,
            max_memory_limit: usize::MAX,
        }
    }
}
