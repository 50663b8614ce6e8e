// Per-function compilation state

use std::collections::HashMap;

use ahash::RandomState;

use super::expdesc::{ExpKind, NO_JUMP};
use crate::gc::StringId;
use crate::lua_value::Proto;

/// Block control structure
#[derive(Debug, Clone, Copy)]
pub(crate) struct BlockCnt {
    /// List of jumps out of this loop
    pub breaklist: i32,
    /// Active locals outside the block
    pub nactvar: u32,
    /// Some variable in the block is captured as an upvalue
    pub upval: bool,
    /// The block is a loop
    pub isbreakable: bool,
}

/// Where an upvalue of the function comes from in the enclosing one
#[derive(Debug, Clone, Copy)]
pub(crate) struct UpvalDesc {
    /// `VLocal` (a register of the parent) or `VUpval` (a parent upvalue)
    pub kind: ExpKind,
    pub info: u32,
    pub name: StringId,
}

/// Constant-table key. Numbers are keyed by bit pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum ConstKey {
    Nil,
    Boolean(bool),
    Number(u64),
    String(StringId),
}

pub(crate) struct FuncState {
    pub f: Proto,
    pub constants: HashMap<ConstKey, u32, RandomState>,
    pub blocks: Vec<BlockCnt>,
    /// pc of the last jump target
    pub lasttarget: i32,
    /// Jumps pending to the next instruction
    pub jpc: i32,
    /// First free register
    pub freereg: u32,
    pub nactvar: u32,
    pub upvalues: Vec<UpvalDesc>,
    /// `loc_vars` index of each active local, by register
    pub actvar: Vec<u16>,
    /// Interned name of each `loc_vars` entry
    pub var_names: Vec<StringId>,
    /// Limit broken while emitting code, reported after the statement
    pub overflow: Option<&'static str>,
}

impl FuncState {
    pub fn new(source: &str, line_defined: u32) -> Self {
        let f = Proto {
            source: source.into(),
            line_defined,
            max_stack_size: 2,
            ..Proto::default()
        };
        FuncState {
            f,
            constants: HashMap::with_hasher(RandomState::new()),
            blocks: Vec::new(),
            lasttarget: -1,
            jpc: NO_JUMP,
            freereg: 0,
            nactvar: 0,
            upvalues: Vec::new(),
            actvar: Vec::new(),
            var_names: Vec::new(),
            overflow: None,
        }
    }

    #[inline]
    pub fn pc(&self) -> usize {
        self.f.code.len()
    }

    /// Register of the innermost active local called `name`
    pub fn search_var(&self, name: StringId) -> Option<u32> {
        (0..self.nactvar as usize)
            .rev()
            .find(|&i| self.var_names[self.actvar[i] as usize] == name)
            .map(|i| i as u32)
    }

    /// Flag the block owning local `level` as having a captured variable
    pub fn mark_upval(&mut self, level: u32) {
        if let Some(bl) = self.blocks.iter_mut().rev().find(|bl| bl.nactvar <= level) {
            bl.upval = true;
        }
    }

    /// Debug record of the `i`-th active local
    pub fn loc_var_mut(&mut self, i: u32) -> &mut crate::lua_value::LocVar {
        let idx = self.actvar[i as usize] as usize;
        &mut self.f.loc_vars[idx]
    }
}
