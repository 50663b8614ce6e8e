use std::rc::Rc;

use smol_str::SmolStr;

use crate::gc::{ThreadId, UpvalueId};
use crate::lua_value::LuaValue;
use crate::lua_vm::CFunction;

pub const VARARG_HASARG: u8 = 1;
pub const VARARG_ISVARARG: u8 = 2;
pub const VARARG_NEEDSARG: u8 = 4;

/// Debug record of a local variable's live range
#[derive(Debug, Clone)]
pub struct LocVar {
    pub name: SmolStr,
    pub start_pc: u32,
    pub end_pc: u32,
}

/// Compiled function prototype. Immutable once built; shared by every
/// closure instantiated from it.
#[derive(Debug, Clone, Default)]
pub struct Proto {
    pub code: Vec<u32>,
    /// Numbers, booleans, nil and interned strings only
    pub constants: Vec<LuaValue>,
    pub protos: Vec<Rc<Proto>>,
    /// Source line per instruction (empty when stripped)
    pub line_info: Vec<u32>,
    pub loc_vars: Vec<LocVar>,
    pub upvalue_names: Vec<SmolStr>,
    pub source: SmolStr,
    pub line_defined: u32,
    pub last_line_defined: u32,
    pub num_upvalues: u8,
    pub num_params: u8,
    pub is_vararg: u8,
    pub max_stack_size: u8,
}

impl Proto {
    #[inline]
    pub fn is_vararg(&self) -> bool {
        self.is_vararg & VARARG_ISVARARG != 0
    }

    /// Line of the instruction at `pc`, 0 when there is no line info
    #[inline]
    pub fn line_at(&self, pc: usize) -> u32 {
        self.line_info.get(pc).copied().unwrap_or(0)
    }

    /// Name of the `n`-th (1-based) local active at `pc`
    pub fn local_name(&self, mut n: usize, pc: usize) -> Option<&str> {
        for var in &self.loc_vars {
            if var.start_pc as usize > pc {
                break;
            }
            if pc < var.end_pc as usize {
                n -= 1;
                if n == 0 {
                    return Some(var.name.as_str());
                }
            }
        }
        None
    }

    pub fn byte_size(&self) -> usize {
        std::mem::size_of::<Proto>()
            + self.code.len() * 4
            + self.constants.len() * std::mem::size_of::<LuaValue>()
            + self.line_info.len() * 4
            + self.loc_vars.len() * std::mem::size_of::<LocVar>()
            + self.protos.iter().map(|p| p.byte_size()).sum::<usize>()
    }
}

pub enum FunctionBody {
    Lua {
        proto: Rc<Proto>,
        upvalues: Vec<UpvalueId>,
    },
    /// Native function with its own upvalue slots
    Native {
        func: CFunction,
        upvalues: Vec<LuaValue>,
    },
}

impl FunctionBody {
    #[inline(always)]
    pub fn is_native(&self) -> bool {
        matches!(self, FunctionBody::Native { .. })
    }

    #[inline(always)]
    pub fn proto(&self) -> Option<&Rc<Proto>> {
        match self {
            FunctionBody::Lua { proto, .. } => Some(proto),
            FunctionBody::Native { .. } => None,
        }
    }
}

/// Captured variable. Open while the enclosing frame is live (the value
/// is the stack slot of `thread`), closed once it returns.
#[derive(Debug, Clone, Copy)]
pub enum Upvalue {
    Open { thread: ThreadId, slot: usize },
    Closed(LuaValue),
}

impl Upvalue {
    #[inline]
    pub fn is_open(&self) -> bool {
        matches!(self, Upvalue::Open { .. })
    }
}
