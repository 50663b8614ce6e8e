mod chunk_serializer;
mod lua_function;
mod lua_table;
pub mod number;

pub use chunk_serializer::{dump_proto, undump_proto};
pub use lua_function::{
    FunctionBody, LocVar, Proto, Upvalue, VARARG_HASARG, VARARG_ISVARARG, VARARG_NEEDSARG,
};
pub use lua_table::{LuaTable, TableError};

use crate::gc::{FunctionId, GcId, StringId, TableId, ThreadId, UserdataId};

/// Basic type tags, in the order used by the embedding API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i8)]
pub enum LuaType {
    None = -1,
    Nil = 0,
    Boolean = 1,
    LightUserdata = 2,
    Number = 3,
    String = 4,
    Table = 5,
    Function = 6,
    Userdata = 7,
    Thread = 8,
}

pub const NUM_TYPES: usize = 9;

impl LuaType {
    pub fn name(self) -> &'static str {
        match self {
            LuaType::None => "no value",
            LuaType::Nil => "nil",
            LuaType::Boolean => "boolean",
            LuaType::LightUserdata | LuaType::Userdata => "userdata",
            LuaType::Number => "number",
            LuaType::String => "string",
            LuaType::Table => "table",
            LuaType::Function => "function",
            LuaType::Thread => "thread",
        }
    }
}

/// A Lua value. Heap types are handles into the object pool; copying a
/// value never copies the object.
///
/// `PartialEq` is raw equality: identity for heap objects, IEEE equality for
/// numbers (so NaN is never equal to itself).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum LuaValue {
    #[default]
    Nil,
    Boolean(bool),
    Number(f64),
    String(StringId),
    Table(TableId),
    Function(FunctionId),
    Userdata(UserdataId),
    LightUserdata(usize),
    Thread(ThreadId),
}

impl LuaValue {
    #[inline(always)]
    pub fn nil() -> Self {
        LuaValue::Nil
    }

    #[inline(always)]
    pub fn boolean(b: bool) -> Self {
        LuaValue::Boolean(b)
    }

    #[inline(always)]
    pub fn number(n: f64) -> Self {
        LuaValue::Number(n)
    }

    #[inline(always)]
    pub fn is_nil(&self) -> bool {
        matches!(self, LuaValue::Nil)
    }

    /// `nil` and `false` are the only false values
    #[inline(always)]
    pub fn is_falsy(&self) -> bool {
        matches!(self, LuaValue::Nil | LuaValue::Boolean(false))
    }

    #[inline(always)]
    pub fn is_truthy(&self) -> bool {
        !self.is_falsy()
    }

    #[inline(always)]
    pub fn is_number(&self) -> bool {
        matches!(self, LuaValue::Number(_))
    }

    #[inline(always)]
    pub fn is_string(&self) -> bool {
        matches!(self, LuaValue::String(_))
    }

    #[inline(always)]
    pub fn is_table(&self) -> bool {
        matches!(self, LuaValue::Table(_))
    }

    #[inline(always)]
    pub fn is_function(&self) -> bool {
        matches!(self, LuaValue::Function(_))
    }

    #[inline(always)]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            LuaValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    #[inline(always)]
    pub fn as_string_id(&self) -> Option<StringId> {
        match self {
            LuaValue::String(id) => Some(*id),
            _ => None,
        }
    }

    #[inline(always)]
    pub fn as_table_id(&self) -> Option<TableId> {
        match self {
            LuaValue::Table(id) => Some(*id),
            _ => None,
        }
    }

    #[inline(always)]
    pub fn as_function_id(&self) -> Option<FunctionId> {
        match self {
            LuaValue::Function(id) => Some(*id),
            _ => None,
        }
    }

    #[inline(always)]
    pub fn as_userdata_id(&self) -> Option<UserdataId> {
        match self {
            LuaValue::Userdata(id) => Some(*id),
            _ => None,
        }
    }

    #[inline(always)]
    pub fn as_thread_id(&self) -> Option<ThreadId> {
        match self {
            LuaValue::Thread(id) => Some(*id),
            _ => None,
        }
    }

    pub fn type_of(&self) -> LuaType {
        match self {
            LuaValue::Nil => LuaType::Nil,
            LuaValue::Boolean(_) => LuaType::Boolean,
            LuaValue::Number(_) => LuaType::Number,
            LuaValue::String(_) => LuaType::String,
            LuaValue::Table(_) => LuaType::Table,
            LuaValue::Function(_) => LuaType::Function,
            LuaValue::Userdata(_) => LuaType::Userdata,
            LuaValue::LightUserdata(_) => LuaType::LightUserdata,
            LuaValue::Thread(_) => LuaType::Thread,
        }
    }

    #[inline]
    pub fn type_name(&self) -> &'static str {
        self.type_of().name()
    }

    /// GC handle of a collectable value
    #[inline]
    pub fn gc_id(&self) -> Option<GcId> {
        match *self {
            LuaValue::String(id) => Some(GcId::StringId(id)),
            LuaValue::Table(id) => Some(GcId::TableId(id)),
            LuaValue::Function(id) => Some(GcId::FunctionId(id)),
            LuaValue::Userdata(id) => Some(GcId::UserdataId(id)),
            LuaValue::Thread(id) => Some(GcId::ThreadId(id)),
            _ => None,
        }
    }

    #[inline(always)]
    pub fn is_collectable(&self) -> bool {
        self.gc_id().is_some()
    }
}
