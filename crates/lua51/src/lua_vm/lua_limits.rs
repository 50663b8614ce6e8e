//! Limits and tuning constants of the runtime, collected in one place.

// ===== Stack =====

/// Minimum free slots guaranteed to a native function
pub const LUA_MINSTACK: usize = 20;

/// Slack kept above every frame's top for metamethod calls
pub const EXTRA_STACK: usize = 5;

/// Initial stack size of a new thread
pub const BASIC_STACK_SIZE: usize = 2 * LUA_MINSTACK;

/// Default ceiling on stack slots per thread
pub const LUAI_MAXSTACK: usize = 1_000_000;

// ===== Calls =====

/// Nested native-level calls (including the parser's recursion)
pub const LUAI_MAXCCALLS: usize = 200;

/// Native stack left when a nested call switches to a fresh segment
pub const STACK_RED_ZONE: usize = 128 * 1024;

/// Size of each extra native stack segment
pub const STACK_GROW_SIZE: usize = 4 * 1024 * 1024;

/// Nested frames per thread
pub const LUAI_MAXCALLS: usize = 20000;

/// `LUA_MULTRET`: keep all results
pub const LUA_MULTRET: i32 = -1;

// ===== Metamethods =====

/// Maximum length of an `__index` / `__newindex` chain
pub const MAXTAGLOOP: usize = 100;

// ===== Compiler =====

pub const MAXVARS: usize = 200;

pub const MAXUPVALUES: usize = 60;

/// Maximum registers of a function
pub const MAXSTACK: usize = 250;

/// Array items stored per SETLIST
pub const LFIELDS_PER_FLUSH: usize = 50;

/// Maximum length of a chunk id in messages
pub const LUA_IDSIZE: usize = 60;

// ===== Collector =====

/// Bytes of allocation that buy one unit of collector work
pub const GCSTEPSIZE: usize = 1024;

/// Objects freed per sweep step
pub const GCSWEEPMAX: usize = 40;

/// Cost charged for each finalizer run
pub const GCFINALIZECOST: usize = 100;

/// Start a new cycle when memory reaches pause% of the live estimate
pub const DEFAULT_GC_PAUSE: usize = 200;

/// Collector speed relative to allocation, in percent
pub const DEFAULT_GC_STEPMUL: usize = 200;
