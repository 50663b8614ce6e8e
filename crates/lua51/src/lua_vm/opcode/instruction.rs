/*----------------------------------------------------------------------
  Instruction format (32-bit), opcode in the low 6 bits:

  iABC    B(9)  |  C(9)  |  A(8)  |  Op(6)
  iABx        Bx(18)     |  A(8)  |  Op(6)
  iAsBx      sBx(18)     |  A(8)  |  Op(6)

  sBx is stored in excess-K form: Bx - MAXARG_SBX.
  B and C operands with the BITRK bit set index the constant table (RK).
----------------------------------------------------------------------*/

use crate::lua_vm::OpCode;

/// Encoding/decoding helpers over raw `u32` instructions
pub struct Instruction;

impl Instruction {
    pub const SIZE_OP: u32 = 6;
    pub const SIZE_A: u32 = 8;
    pub const SIZE_B: u32 = 9;
    pub const SIZE_C: u32 = 9;
    pub const SIZE_BX: u32 = Self::SIZE_C + Self::SIZE_B;

    pub const POS_OP: u32 = 0;
    pub const POS_A: u32 = Self::POS_OP + Self::SIZE_OP;
    pub const POS_C: u32 = Self::POS_A + Self::SIZE_A;
    pub const POS_B: u32 = Self::POS_C + Self::SIZE_C;
    pub const POS_BX: u32 = Self::POS_C;

    pub const MAX_A: u32 = (1 << Self::SIZE_A) - 1;
    pub const MAX_B: u32 = (1 << Self::SIZE_B) - 1;
    pub const MAX_C: u32 = (1 << Self::SIZE_C) - 1;
    pub const MAX_BX: u32 = (1 << Self::SIZE_BX) - 1;
    pub const MAX_SBX: i32 = (Self::MAX_BX >> 1) as i32;

    /// Constant-index marker for RK operands
    pub const BITRK: u32 = 1 << (Self::SIZE_B - 1);
    pub const MAXINDEXRK: u32 = Self::BITRK - 1;

    /// Jump-list terminator used by the code generator
    pub const NO_JUMP: i32 = -1;

    #[inline(always)]
    pub fn get_opcode(i: u32) -> OpCode {
        OpCode::from_u8((i & 0x3f) as u8)
    }

    #[inline(always)]
    pub fn get_a(i: u32) -> u32 {
        (i >> Self::POS_A) & Self::MAX_A
    }

    #[inline(always)]
    pub fn get_b(i: u32) -> u32 {
        (i >> Self::POS_B) & Self::MAX_B
    }

    #[inline(always)]
    pub fn get_c(i: u32) -> u32 {
        (i >> Self::POS_C) & Self::MAX_C
    }

    #[inline(always)]
    pub fn get_bx(i: u32) -> u32 {
        (i >> Self::POS_BX) & Self::MAX_BX
    }

    #[inline(always)]
    pub fn get_sbx(i: u32) -> i32 {
        Self::get_bx(i) as i32 - Self::MAX_SBX
    }

    #[inline(always)]
    pub fn set_opcode(i: &mut u32, op: OpCode) {
        *i = (*i & !0x3f) | (op as u32);
    }

    #[inline(always)]
    pub fn set_a(i: &mut u32, a: u32) {
        *i = (*i & !(Self::MAX_A << Self::POS_A)) | ((a & Self::MAX_A) << Self::POS_A);
    }

    #[inline(always)]
    pub fn set_b(i: &mut u32, b: u32) {
        *i = (*i & !(Self::MAX_B << Self::POS_B)) | ((b & Self::MAX_B) << Self::POS_B);
    }

    #[inline(always)]
    pub fn set_c(i: &mut u32, c: u32) {
        *i = (*i & !(Self::MAX_C << Self::POS_C)) | ((c & Self::MAX_C) << Self::POS_C);
    }

    #[inline(always)]
    pub fn set_bx(i: &mut u32, bx: u32) {
        *i = (*i & !(Self::MAX_BX << Self::POS_BX)) | ((bx & Self::MAX_BX) << Self::POS_BX);
    }

    #[inline(always)]
    pub fn set_sbx(i: &mut u32, sbx: i32) {
        Self::set_bx(i, (sbx + Self::MAX_SBX) as u32);
    }

    #[inline(always)]
    pub fn create_abc(op: OpCode, a: u32, b: u32, c: u32) -> u32 {
        (op as u32) | (a << Self::POS_A) | (b << Self::POS_B) | (c << Self::POS_C)
    }

    #[inline(always)]
    pub fn create_abx(op: OpCode, a: u32, bx: u32) -> u32 {
        (op as u32) | (a << Self::POS_A) | (bx << Self::POS_BX)
    }

    #[inline(always)]
    pub fn create_asbx(op: OpCode, a: u32, sbx: i32) -> u32 {
        Self::create_abx(op, a, (sbx + Self::MAX_SBX) as u32)
    }

    #[inline(always)]
    pub fn is_k(x: u32) -> bool {
        x & Self::BITRK != 0
    }

    #[inline(always)]
    pub fn index_k(x: u32) -> usize {
        (x & !Self::BITRK) as usize
    }

    #[inline(always)]
    pub fn rk_as_k(x: u32) -> u32 {
        x | Self::BITRK
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_roundtrip_extremes() {
        let i = Instruction::create_abc(OpCode::Call, 255, 511, 300);
        assert_eq!(Instruction::get_opcode(i), OpCode::Call);
        assert_eq!(Instruction::get_a(i), 255);
        assert_eq!(Instruction::get_b(i), 511);
        assert_eq!(Instruction::get_c(i), 300);

        let j = Instruction::create_asbx(OpCode::Jmp, 0, -Instruction::MAX_SBX);
        assert_eq!(Instruction::get_sbx(j), -131071);
        let mut k = Instruction::create_asbx(OpCode::ForLoop, 3, 0);
        Instruction::set_sbx(&mut k, 77);
        assert_eq!(Instruction::get_sbx(k), 77);
        assert_eq!(Instruction::get_a(k), 3);
    }
}
