use std::any::Any;

use crate::gc::TableId;
use crate::lua_value::{FunctionBody, LuaTable, Upvalue};
use crate::lua_vm::LuaState;

// Layout of `marked`:
// - Bit 0: WHITE0BIT
// - Bit 1: WHITE1BIT
// - Bit 2: BLACKBIT
// - Bit 3: FINALIZEDBIT (userdata whose finalizer was already scheduled)
// - Bit 5: FIXEDBIT (never collected: reserved words, metamethod names)
//
// Gray is implicit: no white bit and no black bit.
pub const WHITE0BIT: u8 = 0;
pub const WHITE1BIT: u8 = 1;
pub const BLACKBIT: u8 = 2;
pub const FINALIZEDBIT: u8 = 3;
pub const FIXEDBIT: u8 = 5;

pub const WHITEBITS: u8 = (1 << WHITE0BIT) | (1 << WHITE1BIT);
pub const MASKCOLORS: u8 = WHITEBITS | (1 << BLACKBIT);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GcHeader {
    pub marked: u8,
    /// Estimated footprint in bytes, subtracted from the collector's total on free
    pub size: u32,
}

impl GcHeader {
    /// New objects are born with the current white
    #[inline(always)]
    pub fn with_white(current_white: u8, size: u32) -> Self {
        debug_assert!(current_white == 0 || current_white == 1);
        GcHeader {
            marked: 1 << (WHITE0BIT + current_white),
            size,
        }
    }

    #[inline(always)]
    pub fn is_white(&self) -> bool {
        (self.marked & WHITEBITS) != 0
    }

    #[inline(always)]
    pub fn is_black(&self) -> bool {
        (self.marked & (1 << BLACKBIT)) != 0
    }

    #[inline(always)]
    pub fn is_gray(&self) -> bool {
        (self.marked & MASKCOLORS) == 0
    }

    #[inline(always)]
    pub fn make_gray(&mut self) {
        self.marked &= !MASKCOLORS;
    }

    #[inline(always)]
    pub fn make_black(&mut self) {
        self.marked = (self.marked & !WHITEBITS) | (1 << BLACKBIT);
    }

    #[inline(always)]
    pub fn make_white(&mut self, current_white: u8) {
        self.marked = (self.marked & !MASKCOLORS) | (1 << (WHITE0BIT + current_white));
    }

    /// Dead objects carry the white that is not current
    #[inline(always)]
    pub fn is_dead(&self, other_white: u8) -> bool {
        !self.is_fixed() && (self.marked & (1 << (WHITE0BIT + other_white))) != 0
    }

    #[inline(always)]
    pub fn otherwhite(current_white: u8) -> u8 {
        current_white ^ 1
    }

    #[inline(always)]
    pub fn is_fixed(&self) -> bool {
        (self.marked & (1 << FIXEDBIT)) != 0
    }

    #[inline(always)]
    pub fn set_fixed(&mut self) {
        self.marked |= 1 << FIXEDBIT;
    }

    #[inline(always)]
    pub fn is_finalized(&self) -> bool {
        (self.marked & (1 << FINALIZEDBIT)) != 0
    }

    #[inline(always)]
    pub fn set_finalized(&mut self) {
        self.marked |= 1 << FINALIZEDBIT;
    }
}

pub struct GcString {
    pub header: GcHeader,
    pub data: Box<[u8]>,
    pub hash: u64,
}

impl GcString {
    #[inline(always)]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn to_str_lossy(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.data)
    }
}

pub struct GcTable {
    pub header: GcHeader,
    pub table: LuaTable,
}

pub struct GcFunction {
    pub header: GcHeader,
    /// Environment used for global access
    pub env: TableId,
    pub body: FunctionBody,
}

pub struct GcUpvalue {
    pub header: GcHeader,
    pub value: Upvalue,
}

pub struct GcUserdata {
    pub header: GcHeader,
    pub metatable: Option<TableId>,
    pub env: TableId,
    pub data: Box<dyn Any>,
}

/// A coroutine. `state` is `None` while the thread is the running one:
/// its `LuaState` is then checked out into `LuaVM::state`.
pub struct GcThread {
    pub header: GcHeader,
    pub state: Option<Box<LuaState>>,
}
