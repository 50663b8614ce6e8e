/// Expression descriptor - tracks expression evaluation state
/// Code generation is delayed until the parser knows where the value is
/// wanted, which allows register reuse and constant folding

/// Expression kind - determines how the expression value is represented
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ExpKind {
    /// No value (empty expression list)
    VVoid,
    VNil,
    VTrue,
    VFalse,
    /// Constant in the constant table (info = index)
    VK,
    /// Number literal (nval)
    VKNum,
    /// Local variable (info = register)
    VLocal,
    /// Upvalue (info = upvalue index)
    VUpval,
    /// Global variable (info = constant index of the name)
    VGlobal,
    /// Indexed variable (info = table register, aux = RK key)
    VIndexed,
    /// Comparison or test (info = pc of the jump)
    VJmp,
    /// Value can go to any register (info = pc of the instruction)
    VReloc,
    /// Value sits in a fixed register (info = register)
    VNonReloc,
    /// Function call (info = pc of the CALL)
    VCall,
    /// Vararg expression (info = pc of the VARARG)
    VVararg,
}

pub const NO_JUMP: i32 = -1;

/// Expression descriptor
#[derive(Debug, Clone, Copy)]
pub struct ExpDesc {
    pub kind: ExpKind,
    /// Generic info field - meaning depends on kind
    pub info: u32,
    pub aux: u32,
    pub nval: f64,
    /// Patch list for 'exit when true' jumps
    pub t: i32,
    /// Patch list for 'exit when false' jumps
    pub f: i32,
}

impl ExpDesc {
    pub fn new(kind: ExpKind, info: u32) -> Self {
        ExpDesc {
            kind,
            info,
            aux: 0,
            nval: 0.0,
            t: NO_JUMP,
            f: NO_JUMP,
        }
    }

    pub fn void() -> Self {
        Self::new(ExpKind::VVoid, 0)
    }

    pub fn number(n: f64) -> Self {
        let mut e = Self::new(ExpKind::VKNum, 0);
        e.nval = n;
        e
    }

    #[inline]
    pub fn has_jumps(&self) -> bool {
        self.t != self.f
    }

    /// A number literal with no pending jumps, eligible for folding
    #[inline]
    pub fn is_numeral(&self) -> bool {
        self.kind == ExpKind::VKNum && self.t == NO_JUMP && self.f == NO_JUMP
    }

    /// Open call or vararg, whose result count is decided by the context
    #[inline]
    pub fn has_multret(&self) -> bool {
        matches!(self.kind, ExpKind::VCall | ExpKind::VVararg)
    }
}
