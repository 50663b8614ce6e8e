mod instruction;

pub use instruction::Instruction;

/// Instruction format modes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpMode {
    IABC,
    IABx,
    IAsBx,
}

/// How an operand is used, for bytecode verification and symbolic execution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpArgMask {
    /// argument is not used
    N,
    /// argument is used
    U,
    /// argument is a register or a jump offset
    R,
    /// argument is a constant or register/constant
    K,
}

/// The 38 opcodes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpCode {
    Move = 0,  // A B     R(A) := R(B)
    LoadK,     // A Bx    R(A) := Kst(Bx)
    LoadBool,  // A B C   R(A) := (Bool)B; if (C) pc++
    LoadNil,   // A B     R(A) := ... := R(B) := nil
    GetUpval,  // A B     R(A) := UpValue[B]
    GetGlobal, // A Bx    R(A) := Gbl[Kst(Bx)]
    GetTable,  // A B C   R(A) := R(B)[RK(C)]
    SetGlobal, // A Bx    Gbl[Kst(Bx)] := R(A)
    SetUpval,  // A B     UpValue[B] := R(A)
    SetTable,  // A B C   R(A)[RK(B)] := RK(C)
    NewTable,  // A B C   R(A) := {} (size = B,C)
    Self_,     // A B C   R(A+1) := R(B); R(A) := R(B)[RK(C)]
    Add,       // A B C   R(A) := RK(B) + RK(C)
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Unm,      // A B     R(A) := -R(B)
    Not,      // A B     R(A) := not R(B)
    Len,      // A B     R(A) := length of R(B)
    Concat,   // A B C   R(A) := R(B).. ... ..R(C)
    Jmp,      // sBx     pc+=sBx
    Eq,       // A B C   if ((RK(B) == RK(C)) ~= A) then pc++
    Lt,       // A B C   if ((RK(B) <  RK(C)) ~= A) then pc++
    Le,       // A B C   if ((RK(B) <= RK(C)) ~= A) then pc++
    Test,     // A C     if not (R(A) <=> C) then pc++
    TestSet,  // A B C   if (R(B) <=> C) then R(A) := R(B) else pc++
    Call,     // A B C   R(A), ... ,R(A+C-2) := R(A)(R(A+1), ... ,R(A+B-1))
    TailCall, // A B C   return R(A)(R(A+1), ... ,R(A+B-1))
    Return,   // A B     return R(A), ... ,R(A+B-2)
    ForLoop,  // A sBx   R(A)+=R(A+2); if R(A) <?= R(A+1) then { pc+=sBx; R(A+3)=R(A) }
    ForPrep,  // A sBx   R(A)-=R(A+2); pc+=sBx
    TForLoop, // A C     R(A+3), ... ,R(A+2+C) := R(A)(R(A+1), R(A+2)); if R(A+3) ~= nil then R(A+2)=R(A+3) else pc++
    SetList,  // A B C   R(A)[(C-1)*FPF+i] := R(A+i), 1 <= i <= B
    Close,    // A       close all variables in the stack up to (>=) R(A)
    Closure,  // A Bx    R(A) := closure(KPROTO[Bx], R(A), ... ,R(A+n))
    VarArg,   // A B     R(A), R(A+1), ..., R(A+B-1) = vararg
}

pub const NUM_OPCODES: usize = 38;

const OPCODES: [OpCode; NUM_OPCODES] = [
    OpCode::Move,
    OpCode::LoadK,
    OpCode::LoadBool,
    OpCode::LoadNil,
    OpCode::GetUpval,
    OpCode::GetGlobal,
    OpCode::GetTable,
    OpCode::SetGlobal,
    OpCode::SetUpval,
    OpCode::SetTable,
    OpCode::NewTable,
    OpCode::Self_,
    OpCode::Add,
    OpCode::Sub,
    OpCode::Mul,
    OpCode::Div,
    OpCode::Mod,
    OpCode::Pow,
    OpCode::Unm,
    OpCode::Not,
    OpCode::Len,
    OpCode::Concat,
    OpCode::Jmp,
    OpCode::Eq,
    OpCode::Lt,
    OpCode::Le,
    OpCode::Test,
    OpCode::TestSet,
    OpCode::Call,
    OpCode::TailCall,
    OpCode::Return,
    OpCode::ForLoop,
    OpCode::ForPrep,
    OpCode::TForLoop,
    OpCode::SetList,
    OpCode::Close,
    OpCode::Closure,
    OpCode::VarArg,
];

/// (test flag, sets A, B mode, C mode, format)
const fn props(op: OpCode) -> (bool, bool, OpArgMask, OpArgMask, OpMode) {
    use OpArgMask::*;
    use OpMode::*;
    match op {
        OpCode::Move => (false, true, R, N, IABC),
        OpCode::LoadK => (false, true, K, N, IABx),
        OpCode::LoadBool => (false, true, U, U, IABC),
        OpCode::LoadNil => (false, true, R, N, IABC),
        OpCode::GetUpval => (false, true, U, N, IABC),
        OpCode::GetGlobal => (false, true, K, N, IABx),
        OpCode::GetTable => (false, true, R, K, IABC),
        OpCode::SetGlobal => (false, false, K, N, IABx),
        OpCode::SetUpval => (false, false, U, N, IABC),
        OpCode::SetTable => (false, false, K, K, IABC),
        OpCode::NewTable => (false, true, U, U, IABC),
        OpCode::Self_ => (false, true, R, K, IABC),
        OpCode::Add
        | OpCode::Sub
        | OpCode::Mul
        | OpCode::Div
        | OpCode::Mod
        | OpCode::Pow => (false, true, K, K, IABC),
        OpCode::Unm | OpCode::Not | OpCode::Len => (false, true, R, N, IABC),
        OpCode::Concat => (false, true, R, R, IABC),
        OpCode::Jmp => (false, false, R, N, IAsBx),
        OpCode::Eq | OpCode::Lt | OpCode::Le => (true, false, K, K, IABC),
        OpCode::Test => (true, true, R, U, IABC),
        OpCode::TestSet => (true, true, R, U, IABC),
        OpCode::Call | OpCode::TailCall => (false, true, U, U, IABC),
        OpCode::Return => (false, false, U, N, IABC),
        OpCode::ForLoop | OpCode::ForPrep => (false, true, R, N, IAsBx),
        OpCode::TForLoop => (true, false, N, U, IABC),
        OpCode::SetList => (false, false, U, U, IABC),
        OpCode::Close => (false, false, N, N, IABC),
        OpCode::Closure => (false, true, U, N, IABx),
        OpCode::VarArg => (false, true, U, N, IABC),
    }
}

impl OpCode {
    /// Decode an opcode known to be valid (compiler output or verified bytecode)
    #[inline(always)]
    pub fn from_u8(byte: u8) -> Self {
        OPCODES[byte as usize]
    }

    pub fn try_from_u8(byte: u8) -> Option<Self> {
        OPCODES.get(byte as usize).copied()
    }

    #[inline]
    pub fn get_mode(self) -> OpMode {
        props(self).4
    }

    #[inline]
    pub fn get_b_mode(self) -> OpArgMask {
        props(self).2
    }

    #[inline]
    pub fn get_c_mode(self) -> OpArgMask {
        props(self).3
    }

    /// Instruction is a test: the next one must be a jump
    #[inline]
    pub fn is_test(self) -> bool {
        props(self).0
    }

    /// Instruction writes register A
    #[inline]
    pub fn sets_a(self) -> bool {
        props(self).1
    }

    pub fn name(self) -> &'static str {
        const NAMES: [&str; NUM_OPCODES] = [
            "MOVE", "LOADK", "LOADBOOL", "LOADNIL", "GETUPVAL", "GETGLOBAL", "GETTABLE",
            "SETGLOBAL", "SETUPVAL", "SETTABLE", "NEWTABLE", "SELF", "ADD", "SUB", "MUL", "DIV",
            "MOD", "POW", "UNM", "NOT", "LEN", "CONCAT", "JMP", "EQ", "LT", "LE", "TEST",
            "TESTSET", "CALL", "TAILCALL", "RETURN", "FORLOOP", "FORPREP", "TFORLOOP", "SETLIST",
            "CLOSE", "CLOSURE", "VARARG",
        ];
        NAMES[self as usize]
    }
}
