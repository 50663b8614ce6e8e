// Lua 5.1 Runtime
// Bytecode compiler, register VM and incremental GC, with the base and
// coroutine libraries

#[cfg(test)]
mod test;

pub mod compiler;
pub mod gc;
pub mod lib_registry;
pub mod lua_value;
pub mod lua_vm;
pub mod stdlib;

pub use gc::*;
pub use lib_registry::LibraryRegistry;
pub use lua_value::{LuaTable, LuaType, LuaValue, Proto};
pub use lua_vm::{
    CFunction, CoStatus, DebugInfo, GcOp, HookEvent, HookFn, HookMask, Instruction, LuaError,
    LuaResult, LuaVM, OpCode, SafeOption, ThreadStatus,
};
pub use stdlib::Stdlib;
