// Code generator: instruction emission, jump lists, register allocation
// and expression discharge

use super::expdesc::{ExpDesc, ExpKind, NO_JUMP};
use super::func_state::ConstKey;
use super::{CResult, Parser};
use crate::gc::StringId;
use crate::lua_value::LuaValue;
use crate::lua_value::number::lua_mod;
use crate::lua_vm::lua_limits::{LFIELDS_PER_FLUSH, LUA_MULTRET, MAXSTACK};
use crate::lua_vm::opcode::{Instruction, OpCode};

/// Marks the absence of a register in TESTSET patching
pub(crate) const NO_REG: u32 = Instruction::MAX_A;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BinOpr {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Concat,
    Ne,
    Eq,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinOpr {
    /// (left, right) priority
    pub fn priority(self) -> (u8, u8) {
        match self {
            BinOpr::Add | BinOpr::Sub => (6, 6),
            BinOpr::Mul | BinOpr::Div | BinOpr::Mod => (7, 7),
            BinOpr::Pow => (10, 9),
            BinOpr::Concat => (5, 4),
            BinOpr::Ne | BinOpr::Eq | BinOpr::Lt | BinOpr::Le | BinOpr::Gt | BinOpr::Ge => (3, 3),
            BinOpr::And => (2, 2),
            BinOpr::Or => (1, 1),
        }
    }

    fn arith_op(self) -> Option<OpCode> {
        Some(match self {
            BinOpr::Add => OpCode::Add,
            BinOpr::Sub => OpCode::Sub,
            BinOpr::Mul => OpCode::Mul,
            BinOpr::Div => OpCode::Div,
            BinOpr::Mod => OpCode::Mod,
            BinOpr::Pow => OpCode::Pow,
            _ => return None,
        })
    }
}

pub(crate) const UNARY_PRIORITY: u8 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UnOpr {
    Minus,
    Not,
    Len,
}

impl Parser<'_> {
    // ============ Emission ============

    fn code(&mut self, i: u32, line: u32) -> usize {
        self.discharge_jpc();
        self.fs.f.code.push(i);
        self.fs.f.line_info.push(line);
        self.fs.pc() - 1
    }

    pub(crate) fn code_abc(&mut self, op: OpCode, a: u32, b: u32, c: u32) -> usize {
        let line = self.lex.last_line;
        self.code(Instruction::create_abc(op, a, b, c), line)
    }

    pub(crate) fn code_abx(&mut self, op: OpCode, a: u32, bx: u32) -> usize {
        let line = self.lex.last_line;
        self.code(Instruction::create_abx(op, a, bx), line)
    }

    pub(crate) fn code_asbx(&mut self, op: OpCode, a: u32, sbx: i32) -> usize {
        let line = self.lex.last_line;
        self.code(Instruction::create_asbx(op, a, sbx), line)
    }

    /// Emit a raw word (the extra count of a large SETLIST)
    fn code_raw(&mut self, word: u32) -> usize {
        let line = self.lex.last_line;
        self.code(word, line)
    }

    pub(crate) fn fix_line(&mut self, line: u32) {
        if let Some(last) = self.fs.f.line_info.last_mut() {
            *last = line;
        }
    }

    #[inline]
    fn instr_mut(&mut self, pc: usize) -> &mut u32 {
        &mut self.fs.f.code[pc]
    }

    fn exp_instr_mut(&mut self, e: &ExpDesc) -> &mut u32 {
        self.instr_mut(e.info as usize)
    }

    pub(crate) fn code_nil(&mut self, from: u32, n: u32) {
        let pc = self.fs.pc();
        if pc as i32 > self.fs.lasttarget {
            if pc == 0 {
                if from >= self.fs.nactvar {
                    // fresh registers are already nil
                    return;
                }
            } else {
                let prev = self.instr_mut(pc - 1);
                if Instruction::get_opcode(*prev) == OpCode::LoadNil {
                    let pfrom = Instruction::get_a(*prev);
                    let pto = Instruction::get_b(*prev);
                    if pfrom <= from && from <= pto + 1 {
                        if from + n - 1 > pto {
                            Instruction::set_b(prev, from + n - 1);
                        }
                        return;
                    }
                }
            }
        }
        self.code_abc(OpCode::LoadNil, from, from + n - 1, 0);
    }

    pub(crate) fn ret(&mut self, first: u32, nret: i32) {
        self.code_abc(OpCode::Return, first, (nret + 1) as u32, 0);
    }

    // ============ Jump lists ============

    pub(crate) fn jump(&mut self) -> i32 {
        let jpc = self.fs.jpc;
        self.fs.jpc = NO_JUMP;
        let mut j = self.code_asbx(OpCode::Jmp, 0, NO_JUMP) as i32;
        self.concat(&mut j, jpc);
        j
    }

    fn cond_jump(&mut self, op: OpCode, a: u32, b: u32, c: u32) -> i32 {
        self.code_abc(op, a, b, c);
        self.jump()
    }

    fn fix_jump(&mut self, pc: i32, dest: i32) {
        let offset = dest - (pc + 1);
        if offset.abs() > Instruction::MAX_SBX {
            self.fs.overflow = Some("control structure too long");
            return;
        }
        Instruction::set_sbx(self.instr_mut(pc as usize), offset);
    }

    /// Mark the current pc as a jump target and return it
    pub(crate) fn get_label(&mut self) -> i32 {
        let pc = self.fs.pc() as i32;
        self.fs.lasttarget = pc;
        pc
    }

    fn get_jump(&self, pc: i32) -> i32 {
        let offset = Instruction::get_sbx(self.fs.f.code[pc as usize]);
        if offset == NO_JUMP {
            NO_JUMP
        } else {
            pc + 1 + offset
        }
    }

    /// The instruction controlling a jump: the test before it, if any
    fn jump_control(&self, pc: i32) -> usize {
        let pc = pc as usize;
        if pc >= 1 && Instruction::get_opcode(self.fs.f.code[pc - 1]).is_test() {
            pc - 1
        } else {
            pc
        }
    }

    /// Some jump in the list does not produce a value
    fn need_value(&self, mut list: i32) -> bool {
        while list != NO_JUMP {
            let i = self.fs.f.code[self.jump_control(list)];
            if Instruction::get_opcode(i) != OpCode::TestSet {
                return true;
            }
            list = self.get_jump(list);
        }
        false
    }

    fn patch_test_reg(&mut self, node: i32, reg: u32) -> bool {
        let pc = self.jump_control(node);
        let i = self.instr_mut(pc);
        if Instruction::get_opcode(*i) != OpCode::TestSet {
            return false;
        }
        if reg != NO_REG && reg != Instruction::get_b(*i) {
            Instruction::set_a(i, reg);
        } else {
            // no register to put the value in, or it is already there
            *i = Instruction::create_abc(
                OpCode::Test,
                Instruction::get_b(*i),
                0,
                Instruction::get_c(*i),
            );
        }
        true
    }

    fn remove_values(&mut self, mut list: i32) {
        while list != NO_JUMP {
            self.patch_test_reg(list, NO_REG);
            list = self.get_jump(list);
        }
    }

    fn patch_list_aux(&mut self, mut list: i32, vtarget: i32, reg: u32, dtarget: i32) {
        while list != NO_JUMP {
            let next = self.get_jump(list);
            if self.patch_test_reg(list, reg) {
                self.fix_jump(list, vtarget);
            } else {
                self.fix_jump(list, dtarget);
            }
            list = next;
        }
    }

    fn discharge_jpc(&mut self) {
        let pc = self.fs.pc() as i32;
        let jpc = self.fs.jpc;
        self.patch_list_aux(jpc, pc, NO_REG, pc);
        self.fs.jpc = NO_JUMP;
    }

    pub(crate) fn patch_list(&mut self, list: i32, target: i32) {
        if target == self.fs.pc() as i32 {
            self.patch_to_here(list);
        } else {
            self.patch_list_aux(list, target, NO_REG, target);
        }
    }

    pub(crate) fn patch_to_here(&mut self, list: i32) {
        self.get_label();
        let mut jpc = self.fs.jpc;
        self.concat(&mut jpc, list);
        self.fs.jpc = jpc;
    }

    pub(crate) fn concat(&mut self, l1: &mut i32, l2: i32) {
        if l2 == NO_JUMP {
            return;
        }
        if *l1 == NO_JUMP {
            *l1 = l2;
            return;
        }
        let mut list = *l1;
        loop {
            let next = self.get_jump(list);
            if next == NO_JUMP {
                break;
            }
            list = next;
        }
        self.fix_jump(list, l2);
    }

    // ============ Registers ============

    pub(crate) fn check_stack(&mut self, n: u32) -> CResult<()> {
        let newstack = self.fs.freereg + n;
        if newstack > self.fs.f.max_stack_size as u32 {
            if newstack as usize >= MAXSTACK {
                return Err(self.lex.syntax_error("function or expression too complex"));
            }
            self.fs.f.max_stack_size = newstack as u8;
        }
        Ok(())
    }

    pub(crate) fn reserve_regs(&mut self, n: u32) -> CResult<()> {
        self.check_stack(n)?;
        self.fs.freereg += n;
        Ok(())
    }

    fn free_reg(&mut self, reg: u32) {
        if !Instruction::is_k(reg) && reg >= self.fs.nactvar {
            self.fs.freereg -= 1;
        }
    }

    fn free_exp(&mut self, e: &ExpDesc) {
        if e.kind == ExpKind::VNonReloc {
            self.free_reg(e.info);
        }
    }

    // ============ Constants ============

    fn add_k(&mut self, key: ConstKey, v: LuaValue) -> u32 {
        if let Some(&idx) = self.fs.constants.get(&key) {
            return idx;
        }
        let idx = self.fs.f.constants.len() as u32;
        if idx >= Instruction::MAX_BX {
            self.fs.overflow = Some("constant table overflow");
        }
        self.fs.f.constants.push(v);
        self.fs.constants.insert(key, idx);
        idx
    }

    pub(crate) fn string_k(&mut self, s: StringId) -> u32 {
        self.add_k(ConstKey::String(s), LuaValue::String(s))
    }

    pub(crate) fn number_k(&mut self, n: f64) -> u32 {
        self.add_k(ConstKey::Number(n.to_bits()), LuaValue::Number(n))
    }

    fn bool_k(&mut self, b: bool) -> u32 {
        self.add_k(ConstKey::Boolean(b), LuaValue::Boolean(b))
    }

    fn nil_k(&mut self) -> u32 {
        self.add_k(ConstKey::Nil, LuaValue::Nil)
    }

    // ============ Discharge ============

    pub(crate) fn set_returns(&mut self, e: &ExpDesc, nresults: i32) -> CResult<()> {
        match e.kind {
            ExpKind::VCall => {
                Instruction::set_c(self.exp_instr_mut(e), (nresults + 1) as u32);
            }
            ExpKind::VVararg => {
                let freereg = self.fs.freereg;
                let i = self.exp_instr_mut(e);
                Instruction::set_b(i, (nresults + 1) as u32);
                Instruction::set_a(i, freereg);
                self.reserve_regs(1)?;
            }
            _ => {}
        }
        Ok(())
    }

    pub(crate) fn set_one_ret(&mut self, e: &mut ExpDesc) {
        match e.kind {
            ExpKind::VCall => {
                e.kind = ExpKind::VNonReloc;
                e.info = Instruction::get_a(self.fs.f.code[e.info as usize]);
            }
            ExpKind::VVararg => {
                Instruction::set_b(self.exp_instr_mut(e), 2);
                e.kind = ExpKind::VReloc;
            }
            _ => {}
        }
    }

    pub(crate) fn discharge_vars(&mut self, e: &mut ExpDesc) {
        match e.kind {
            ExpKind::VLocal => e.kind = ExpKind::VNonReloc,
            ExpKind::VUpval => {
                e.info = self.code_abc(OpCode::GetUpval, 0, e.info, 0) as u32;
                e.kind = ExpKind::VReloc;
            }
            ExpKind::VGlobal => {
                e.info = self.code_abx(OpCode::GetGlobal, 0, e.info) as u32;
                e.kind = ExpKind::VReloc;
            }
            ExpKind::VIndexed => {
                self.free_reg(e.aux);
                self.free_reg(e.info);
                e.info = self.code_abc(OpCode::GetTable, 0, e.info, e.aux) as u32;
                e.kind = ExpKind::VReloc;
            }
            ExpKind::VVararg | ExpKind::VCall => self.set_one_ret(e),
            _ => {}
        }
    }

    fn code_label(&mut self, a: u32, b: u32, jump: u32) -> i32 {
        self.get_label();
        self.code_abc(OpCode::LoadBool, a, b, jump) as i32
    }

    fn discharge2reg(&mut self, e: &mut ExpDesc, reg: u32) {
        self.discharge_vars(e);
        match e.kind {
            ExpKind::VNil => self.code_nil(reg, 1),
            ExpKind::VFalse | ExpKind::VTrue => {
                let b = (e.kind == ExpKind::VTrue) as u32;
                self.code_abc(OpCode::LoadBool, reg, b, 0);
            }
            ExpKind::VK => {
                self.code_abx(OpCode::LoadK, reg, e.info);
            }
            ExpKind::VKNum => {
                let k = self.number_k(e.nval);
                self.code_abx(OpCode::LoadK, reg, k);
            }
            ExpKind::VReloc => {
                Instruction::set_a(self.exp_instr_mut(e), reg);
            }
            ExpKind::VNonReloc => {
                if reg != e.info {
                    self.code_abc(OpCode::Move, reg, e.info, 0);
                }
            }
            _ => return,
        }
        e.info = reg;
        e.kind = ExpKind::VNonReloc;
    }

    fn discharge2anyreg(&mut self, e: &mut ExpDesc) -> CResult<()> {
        if e.kind != ExpKind::VNonReloc {
            self.reserve_regs(1)?;
            let reg = self.fs.freereg - 1;
            self.discharge2reg(e, reg);
        }
        Ok(())
    }

    fn exp2reg(&mut self, e: &mut ExpDesc, reg: u32) {
        self.discharge2reg(e, reg);
        if e.kind == ExpKind::VJmp {
            let info = e.info as i32;
            self.concat(&mut e.t, info);
        }
        if e.has_jumps() {
            let mut p_f = NO_JUMP;
            let mut p_t = NO_JUMP;
            if self.need_value(e.t) || self.need_value(e.f) {
                let fj = if e.kind == ExpKind::VJmp {
                    NO_JUMP
                } else {
                    self.jump()
                };
                p_f = self.code_label(reg, 0, 1);
                p_t = self.code_label(reg, 1, 0);
                self.patch_to_here(fj);
            }
            let end = self.get_label();
            self.patch_list_aux(e.f, end, reg, p_f);
            self.patch_list_aux(e.t, end, reg, p_t);
        }
        e.f = NO_JUMP;
        e.t = NO_JUMP;
        e.info = reg;
        e.kind = ExpKind::VNonReloc;
    }

    pub(crate) fn exp2nextreg(&mut self, e: &mut ExpDesc) -> CResult<()> {
        self.discharge_vars(e);
        self.free_exp(e);
        self.reserve_regs(1)?;
        let reg = self.fs.freereg - 1;
        self.exp2reg(e, reg);
        Ok(())
    }

    pub(crate) fn exp2anyreg(&mut self, e: &mut ExpDesc) -> CResult<u32> {
        self.discharge_vars(e);
        if e.kind == ExpKind::VNonReloc {
            if !e.has_jumps() {
                return Ok(e.info);
            }
            if e.info >= self.fs.nactvar {
                let reg = e.info;
                self.exp2reg(e, reg);
                return Ok(e.info);
            }
        }
        self.exp2nextreg(e)?;
        Ok(e.info)
    }

    pub(crate) fn exp2val(&mut self, e: &mut ExpDesc) -> CResult<()> {
        if e.has_jumps() {
            self.exp2anyreg(e)?;
        } else {
            self.discharge_vars(e);
        }
        Ok(())
    }

    /// Operand as a register or an RK-encoded constant
    pub(crate) fn exp2rk(&mut self, e: &mut ExpDesc) -> CResult<u32> {
        self.exp2val(e)?;
        match e.kind {
            ExpKind::VKNum | ExpKind::VTrue | ExpKind::VFalse | ExpKind::VNil => {
                if self.fs.f.constants.len() <= Instruction::MAXINDEXRK as usize {
                    e.info = match e.kind {
                        ExpKind::VNil => self.nil_k(),
                        ExpKind::VKNum => self.number_k(e.nval),
                        _ => self.bool_k(e.kind == ExpKind::VTrue),
                    };
                    e.kind = ExpKind::VK;
                    return Ok(Instruction::rk_as_k(e.info));
                }
            }
            ExpKind::VK => {
                if e.info <= Instruction::MAXINDEXRK {
                    return Ok(Instruction::rk_as_k(e.info));
                }
            }
            _ => {}
        }
        self.exp2anyreg(e)
    }

    pub(crate) fn store_var(&mut self, var: &ExpDesc, ex: &mut ExpDesc) -> CResult<()> {
        match var.kind {
            ExpKind::VLocal => {
                self.free_exp(ex);
                self.exp2reg(ex, var.info);
                return Ok(());
            }
            ExpKind::VUpval => {
                let e = self.exp2anyreg(ex)?;
                self.code_abc(OpCode::SetUpval, e, var.info, 0);
            }
            ExpKind::VGlobal => {
                let e = self.exp2anyreg(ex)?;
                self.code_abx(OpCode::SetGlobal, e, var.info);
            }
            ExpKind::VIndexed => {
                let e = self.exp2rk(ex)?;
                self.code_abc(OpCode::SetTable, var.info, var.aux, e);
            }
            _ => {}
        }
        self.free_exp(ex);
        Ok(())
    }

    pub(crate) fn code_self(&mut self, e: &mut ExpDesc, key: &mut ExpDesc) -> CResult<()> {
        self.exp2anyreg(e)?;
        self.free_exp(e);
        let func = self.fs.freereg;
        self.reserve_regs(2)?;
        let k = self.exp2rk(key)?;
        self.code_abc(OpCode::Self_, func, e.info, k);
        self.free_exp(key);
        e.info = func;
        e.kind = ExpKind::VNonReloc;
        Ok(())
    }

    fn invert_jump(&mut self, e: &ExpDesc) {
        let pc = self.jump_control(e.info as i32);
        let i = self.instr_mut(pc);
        let a = Instruction::get_a(*i);
        Instruction::set_a(i, (a == 0) as u32);
    }

    fn jump_on_cond(&mut self, e: &mut ExpDesc, cond: bool) -> CResult<i32> {
        if e.kind == ExpKind::VReloc {
            let ie = self.fs.f.code[e.info as usize];
            if Instruction::get_opcode(ie) == OpCode::Not {
                // drop the NOT and test its operand the other way round
                self.fs.f.code.pop();
                self.fs.f.line_info.pop();
                return Ok(self.cond_jump(OpCode::Test, Instruction::get_b(ie), 0, (!cond) as u32));
            }
        }
        self.discharge2anyreg(e)?;
        self.free_exp(e);
        Ok(self.cond_jump(OpCode::TestSet, NO_REG, e.info, cond as u32))
    }

    pub(crate) fn go_if_true(&mut self, e: &mut ExpDesc) -> CResult<()> {
        self.discharge_vars(e);
        let pc = match e.kind {
            ExpKind::VK | ExpKind::VKNum | ExpKind::VTrue => NO_JUMP,
            ExpKind::VFalse => self.jump(),
            ExpKind::VJmp => {
                self.invert_jump(e);
                e.info as i32
            }
            _ => self.jump_on_cond(e, false)?,
        };
        self.concat(&mut e.f, pc);
        self.patch_to_here(e.t);
        e.t = NO_JUMP;
        Ok(())
    }

    pub(crate) fn go_if_false(&mut self, e: &mut ExpDesc) -> CResult<()> {
        self.discharge_vars(e);
        let pc = match e.kind {
            ExpKind::VNil | ExpKind::VFalse => NO_JUMP,
            ExpKind::VTrue => self.jump(),
            ExpKind::VJmp => e.info as i32,
            _ => self.jump_on_cond(e, true)?,
        };
        self.concat(&mut e.t, pc);
        self.patch_to_here(e.f);
        e.f = NO_JUMP;
        Ok(())
    }

    fn code_not(&mut self, e: &mut ExpDesc) -> CResult<()> {
        self.discharge_vars(e);
        match e.kind {
            ExpKind::VNil | ExpKind::VFalse => e.kind = ExpKind::VTrue,
            ExpKind::VK | ExpKind::VKNum | ExpKind::VTrue => e.kind = ExpKind::VFalse,
            ExpKind::VJmp => self.invert_jump(e),
            ExpKind::VReloc | ExpKind::VNonReloc => {
                self.discharge2anyreg(e)?;
                self.free_exp(e);
                e.info = self.code_abc(OpCode::Not, 0, e.info, 0) as u32;
                e.kind = ExpKind::VReloc;
            }
            _ => {}
        }
        std::mem::swap(&mut e.f, &mut e.t);
        self.remove_values(e.f);
        self.remove_values(e.t);
        Ok(())
    }

    pub(crate) fn indexed(&mut self, t: &mut ExpDesc, k: &mut ExpDesc) -> CResult<()> {
        t.aux = self.exp2rk(k)?;
        t.kind = ExpKind::VIndexed;
        Ok(())
    }

    fn const_folding(op: OpCode, e1: &mut ExpDesc, e2: &ExpDesc) -> bool {
        if !e1.is_numeral() || !e2.is_numeral() {
            return false;
        }
        let (v1, v2) = (e1.nval, e2.nval);
        let r = match op {
            OpCode::Add => v1 + v2,
            OpCode::Sub => v1 - v2,
            OpCode::Mul => v1 * v2,
            OpCode::Div => {
                if v2 == 0.0 {
                    return false;
                }
                v1 / v2
            }
            OpCode::Mod => {
                if v2 == 0.0 {
                    return false;
                }
                lua_mod(v1, v2)
            }
            OpCode::Pow => v1.powf(v2),
            OpCode::Unm => -v1,
            _ => return false,
        };
        if r.is_nan() {
            return false;
        }
        e1.nval = r;
        true
    }

    fn code_arith(&mut self, op: OpCode, e1: &mut ExpDesc, e2: &mut ExpDesc) -> CResult<()> {
        if Self::const_folding(op, e1, e2) {
            return Ok(());
        }
        let o2 = if op != OpCode::Unm && op != OpCode::Len {
            self.exp2rk(e2)?
        } else {
            0
        };
        let o1 = self.exp2rk(e1)?;
        if o1 > o2 {
            self.free_exp(e1);
            self.free_exp(e2);
        } else {
            self.free_exp(e2);
            self.free_exp(e1);
        }
        e1.info = self.code_abc(op, 0, o1, o2) as u32;
        e1.kind = ExpKind::VReloc;
        Ok(())
    }

    fn code_comp(
        &mut self,
        op: OpCode,
        cond: bool,
        e1: &mut ExpDesc,
        e2: &mut ExpDesc,
    ) -> CResult<()> {
        let mut o1 = self.exp2rk(e1)?;
        let mut o2 = self.exp2rk(e2)?;
        self.free_exp(e2);
        self.free_exp(e1);
        let mut cond = cond;
        if !cond && op != OpCode::Eq {
            // a > b becomes b < a, a >= b becomes b <= a
            std::mem::swap(&mut o1, &mut o2);
            cond = true;
        }
        e1.info = self.cond_jump(op, cond as u32, o1, o2) as u32;
        e1.kind = ExpKind::VJmp;
        Ok(())
    }

    pub(crate) fn prefix(&mut self, op: UnOpr, e: &mut ExpDesc) -> CResult<()> {
        let mut e2 = ExpDesc::number(0.0);
        match op {
            UnOpr::Minus => {
                if !e.is_numeral() {
                    self.exp2anyreg(e)?;
                }
                self.code_arith(OpCode::Unm, e, &mut e2)
            }
            UnOpr::Not => self.code_not(e),
            UnOpr::Len => {
                self.exp2anyreg(e)?;
                self.code_arith(OpCode::Len, e, &mut e2)
            }
        }
    }

    pub(crate) fn infix(&mut self, op: BinOpr, v: &mut ExpDesc) -> CResult<()> {
        match op {
            BinOpr::And => self.go_if_true(v),
            BinOpr::Or => self.go_if_false(v),
            BinOpr::Concat => self.exp2nextreg(v),
            BinOpr::Add | BinOpr::Sub | BinOpr::Mul | BinOpr::Div | BinOpr::Mod | BinOpr::Pow => {
                if !v.is_numeral() {
                    self.exp2rk(v)?;
                }
                Ok(())
            }
            _ => {
                self.exp2rk(v)?;
                Ok(())
            }
        }
    }

    pub(crate) fn posfix(&mut self, op: BinOpr, e1: &mut ExpDesc, e2: &mut ExpDesc) -> CResult<()> {
        match op {
            BinOpr::And => {
                self.discharge_vars(e2);
                self.concat(&mut e2.f, e1.f);
                *e1 = *e2;
            }
            BinOpr::Or => {
                self.discharge_vars(e2);
                self.concat(&mut e2.t, e1.t);
                *e1 = *e2;
            }
            BinOpr::Concat => {
                self.exp2val(e2)?;
                let chained = e2.kind == ExpKind::VReloc
                    && Instruction::get_opcode(self.fs.f.code[e2.info as usize]) == OpCode::Concat;
                if chained {
                    self.free_exp(e1);
                    let first = e1.info;
                    Instruction::set_b(self.exp_instr_mut(e2), first);
                    e1.kind = ExpKind::VReloc;
                    e1.info = e2.info;
                } else {
                    self.exp2nextreg(e2)?;
                    self.code_arith(OpCode::Concat, e1, e2)?;
                }
            }
            BinOpr::Eq => self.code_comp(OpCode::Eq, true, e1, e2)?,
            BinOpr::Ne => self.code_comp(OpCode::Eq, false, e1, e2)?,
            BinOpr::Lt => self.code_comp(OpCode::Lt, true, e1, e2)?,
            BinOpr::Le => self.code_comp(OpCode::Le, true, e1, e2)?,
            BinOpr::Gt => self.code_comp(OpCode::Lt, false, e1, e2)?,
            BinOpr::Ge => self.code_comp(OpCode::Le, false, e1, e2)?,
            arith => {
                if let Some(op) = arith.arith_op() {
                    self.code_arith(op, e1, e2)?;
                }
            }
        }
        Ok(())
    }

    pub(crate) fn set_list(&mut self, base: u32, nelems: u32, tostore: i32) {
        let c = (nelems - 1) / LFIELDS_PER_FLUSH as u32 + 1;
        let b = if tostore == LUA_MULTRET { 0 } else { tostore as u32 };
        if c <= Instruction::MAX_C {
            self.code_abc(OpCode::SetList, base, b, c);
        } else {
            self.code_abc(OpCode::SetList, base, b, 0);
            self.code_raw(c);
        }
        self.fs.freereg = base + 1;
    }
}
