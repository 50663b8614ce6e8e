// Statement parsing

use super::expdesc::{ExpDesc, ExpKind, NO_JUMP};
use super::lexer::LuaTokenKind;
use super::{CResult, Parser};
use crate::gc::StringId;
use crate::lua_vm::lua_limits::{LUA_MULTRET, LUAI_MAXCCALLS};
use crate::lua_vm::opcode::{Instruction, OpCode};

fn block_follow(token: LuaTokenKind) -> bool {
    matches!(
        token,
        LuaTokenKind::Else
            | LuaTokenKind::Elseif
            | LuaTokenKind::End
            | LuaTokenKind::Until
            | LuaTokenKind::Eos
    )
}

impl Parser<'_> {
    /// chunk -> { stat [`;`] }
    pub(crate) fn chunk(&mut self) -> CResult<()> {
        let mut islast = false;
        self.enter_level()?;
        while !islast && !block_follow(self.lex.token) {
            islast = self.statement()?;
            self.test_next(LuaTokenKind::Char(b';'))?;
            if let Some(msg) = self.fs.overflow.take() {
                return Err(self.lex.syntax_error(msg));
            }
            debug_assert!(self.fs.f.max_stack_size as u32 >= self.fs.freereg);
            self.fs.freereg = self.fs.nactvar;
        }
        self.leave_level();
        Ok(())
    }

    fn block(&mut self) -> CResult<()> {
        self.enter_block(false);
        self.chunk()?;
        self.leave_block();
        Ok(())
    }

    /// Returns true for statements that must end a block
    fn statement(&mut self) -> CResult<bool> {
        let line = self.lex.line;
        match self.lex.token {
            LuaTokenKind::If => self.ifstat(line)?,
            LuaTokenKind::While => self.whilestat(line)?,
            LuaTokenKind::Do => {
                self.next()?;
                self.block()?;
                self.check_match(LuaTokenKind::End, LuaTokenKind::Do, line)?;
            }
            LuaTokenKind::For => self.forstat(line)?,
            LuaTokenKind::Repeat => self.repeatstat(line)?,
            LuaTokenKind::Function => self.funcstat(line)?,
            LuaTokenKind::Local => {
                self.next()?;
                if self.test_next(LuaTokenKind::Function)? {
                    self.localfunc()?;
                } else {
                    self.localstat()?;
                }
            }
            LuaTokenKind::Return => {
                self.retstat()?;
                return Ok(true);
            }
            LuaTokenKind::Break => {
                self.next()?;
                self.breakstat()?;
                return Ok(true);
            }
            _ => self.exprstat()?,
        }
        Ok(false)
    }

    // ============ Assignment ============

    /// Values must be copied out of a local about to be assigned when an
    /// earlier target of the same statement indexes through it
    fn check_conflict(&mut self, targets: &mut [ExpDesc], v: &ExpDesc) -> CResult<()> {
        let extra = self.fs.freereg;
        let mut conflict = false;
        for lh in targets.iter_mut() {
            if lh.kind == ExpKind::VIndexed {
                if lh.info == v.info {
                    conflict = true;
                    lh.info = extra;
                }
                if lh.aux == v.info {
                    conflict = true;
                    lh.aux = extra;
                }
            }
        }
        if conflict {
            self.code_abc(OpCode::Move, extra, v.info, 0);
            self.reserve_regs(1)?;
        }
        Ok(())
    }

    fn adjust_assign(&mut self, nvars: u32, nexps: u32, e: &mut ExpDesc) -> CResult<()> {
        let mut extra = nvars as i32 - nexps as i32;
        if e.has_multret() {
            extra += 1;
            if extra < 0 {
                extra = 0;
            }
            self.set_returns(e, extra)?;
            if extra > 1 {
                self.reserve_regs((extra - 1) as u32)?;
            }
        } else {
            if e.kind != ExpKind::VVoid {
                self.exp2nextreg(e)?;
            }
            if extra > 0 {
                let reg = self.fs.freereg;
                self.reserve_regs(extra as u32)?;
                self.code_nil(reg, extra as u32);
            }
        }
        Ok(())
    }

    fn assignment(&mut self, targets: &mut Vec<ExpDesc>, nvars: u32) -> CResult<()> {
        let lh = targets[nvars as usize - 1];
        if !matches!(
            lh.kind,
            ExpKind::VLocal | ExpKind::VUpval | ExpKind::VGlobal | ExpKind::VIndexed
        ) {
            return Err(self.lex.syntax_error("syntax error"));
        }
        if self.test_next(LuaTokenKind::Char(b','))? {
            let mut nv = ExpDesc::void();
            self.primaryexp(&mut nv)?;
            if nv.kind == ExpKind::VLocal {
                self.check_conflict(targets, &nv)?;
            }
            self.check_limit(
                nvars as usize,
                LUAI_MAXCCALLS.saturating_sub(self.depth()),
                "variables in assignment",
            )?;
            targets.push(nv);
            self.assignment(targets, nvars + 1)?;
        } else {
            self.check_char(b'=')?;
            let mut e = ExpDesc::void();
            let nexps = self.explist1(&mut e)?;
            if nexps != nvars {
                self.adjust_assign(nvars, nexps, &mut e)?;
                if nexps > nvars {
                    // remove extra values
                    self.fs.freereg -= nexps - nvars;
                }
            } else {
                self.set_one_ret(&mut e);
                return self.store_var(&lh, &mut e);
            }
        }
        // conflicts may have moved this target's registers
        let lh = targets[nvars as usize - 1];
        let mut e = ExpDesc::new(ExpKind::VNonReloc, self.fs.freereg - 1);
        self.store_var(&lh, &mut e)
    }

    /// stat -> func | assignment
    fn exprstat(&mut self) -> CResult<()> {
        let mut v = ExpDesc::void();
        self.primaryexp(&mut v)?;
        if v.kind == ExpKind::VCall {
            // statement call discards all results
            Instruction::set_c(&mut self.fs.f.code[v.info as usize], 1);
            Ok(())
        } else {
            let mut targets = vec![v];
            self.assignment(&mut targets, 1)
        }
    }

    // ============ Control flow ============

    fn cond(&mut self) -> CResult<i32> {
        let mut v = ExpDesc::void();
        self.expr(&mut v)?;
        // `falses` are all equal here
        if v.kind == ExpKind::VNil {
            v.kind = ExpKind::VFalse;
        }
        self.go_if_true(&mut v)?;
        Ok(v.f)
    }

    fn breakstat(&mut self) -> CResult<()> {
        let mut upval = false;
        let mut found = None;
        for (i, bl) in self.fs.blocks.iter().enumerate().rev() {
            if bl.isbreakable {
                found = Some(i);
                break;
            }
            upval |= bl.upval;
        }
        let Some(i) = found else {
            return Err(self.lex.syntax_error("no loop to break"));
        };
        if upval {
            let nactvar = self.fs.blocks[i].nactvar;
            self.code_abc(OpCode::Close, nactvar, 0, 0);
        }
        let j = self.jump();
        let mut list = self.fs.blocks[i].breaklist;
        self.concat(&mut list, j);
        self.fs.blocks[i].breaklist = list;
        Ok(())
    }

    fn whilestat(&mut self, line: u32) -> CResult<()> {
        self.next()?;
        let whileinit = self.get_label();
        let condexit = self.cond()?;
        self.enter_block(true);
        self.check_next(LuaTokenKind::Do)?;
        self.block()?;
        let j = self.jump();
        self.patch_list(j, whileinit);
        self.check_match(LuaTokenKind::End, LuaTokenKind::While, line)?;
        self.leave_block();
        self.patch_to_here(condexit);
        Ok(())
    }

    fn repeatstat(&mut self, line: u32) -> CResult<()> {
        let repeat_init = self.get_label();
        // loop block, then scope block
        self.enter_block(true);
        self.enter_block(false);
        self.next()?;
        self.chunk()?;
        self.check_match(LuaTokenKind::Until, LuaTokenKind::Repeat, line)?;
        let condexit = self.cond()?;
        let upval = self.fs.blocks.last().is_some_and(|bl| bl.upval);
        if !upval {
            self.leave_block();
            self.patch_list(condexit, repeat_init);
        } else {
            // upvalues must be closed on every iteration: exit through a break
            self.breakstat()?;
            self.patch_to_here(condexit);
            self.leave_block();
            let j = self.jump();
            self.patch_list(j, repeat_init);
        }
        self.leave_block();
        Ok(())
    }

    fn exp1(&mut self) -> CResult<ExpKind> {
        let mut e = ExpDesc::void();
        self.expr(&mut e)?;
        let kind = e.kind;
        self.exp2nextreg(&mut e)?;
        Ok(kind)
    }

    fn forbody(&mut self, base: u32, line: u32, nvars: u32, isnum: bool) -> CResult<()> {
        // control variables
        self.adjust_local_vars(3);
        self.check_next(LuaTokenKind::Do)?;
        let prep = if isnum {
            self.code_asbx(OpCode::ForPrep, base, NO_JUMP) as i32
        } else {
            self.jump()
        };
        self.enter_block(false);
        self.adjust_local_vars(nvars);
        self.reserve_regs(nvars)?;
        self.block()?;
        self.leave_block();
        self.patch_to_here(prep);
        let endfor = if isnum {
            self.code_asbx(OpCode::ForLoop, base, NO_JUMP) as i32
        } else {
            self.code_abc(OpCode::TForLoop, base, 0, nvars) as i32
        };
        self.fix_line(line);
        let back = if isnum { endfor } else { self.jump() };
        self.patch_list(back, prep + 1);
        Ok(())
    }

    fn fornum(&mut self, varname: StringId, line: u32) -> CResult<()> {
        let base = self.fs.freereg;
        self.new_local_literal("(for index)", 0)?;
        self.new_local_literal("(for limit)", 1)?;
        self.new_local_literal("(for step)", 2)?;
        self.new_local_var(varname, 3)?;
        self.check_char(b'=')?;
        self.exp1()?;
        self.check_char(b',')?;
        self.exp1()?;
        if self.test_next(LuaTokenKind::Char(b','))? {
            self.exp1()?;
        } else {
            // default step = 1
            let k = self.number_k(1.0);
            self.code_abx(OpCode::LoadK, self.fs.freereg, k);
            self.reserve_regs(1)?;
        }
        self.forbody(base, line, 1, true)
    }

    fn forlist(&mut self, indexname: StringId) -> CResult<()> {
        let base = self.fs.freereg;
        self.new_local_literal("(for generator)", 0)?;
        self.new_local_literal("(for state)", 1)?;
        self.new_local_literal("(for control)", 2)?;
        self.new_local_var(indexname, 3)?;
        let mut nvars = 4;
        while self.test_next(LuaTokenKind::Char(b','))? {
            let name = self.str_checkname()?;
            self.new_local_var(name, nvars)?;
            nvars += 1;
        }
        self.check_next(LuaTokenKind::In)?;
        let line = self.lex.line;
        let mut e = ExpDesc::void();
        let nexps = self.explist1(&mut e)?;
        self.adjust_assign(3, nexps, &mut e)?;
        // extra space to call the generator
        self.check_stack(3)?;
        self.forbody(base, line, nvars - 3, false)
    }

    fn forstat(&mut self, line: u32) -> CResult<()> {
        // scope for the loop and control variables
        self.enter_block(true);
        self.next()?;
        let varname = self.str_checkname()?;
        match self.lex.token {
            LuaTokenKind::Char(b'=') => self.fornum(varname, line)?,
            LuaTokenKind::Char(b',') | LuaTokenKind::In => self.forlist(varname)?,
            _ => return Err(self.lex.syntax_error("'=' or 'in' expected")),
        }
        self.check_match(LuaTokenKind::End, LuaTokenKind::For, line)?;
        self.leave_block();
        Ok(())
    }

    fn test_then_block(&mut self) -> CResult<i32> {
        // skip IF or ELSEIF
        self.next()?;
        let condexit = self.cond()?;
        self.check_next(LuaTokenKind::Then)?;
        self.block()?;
        Ok(condexit)
    }

    fn ifstat(&mut self, line: u32) -> CResult<()> {
        let mut escapelist = NO_JUMP;
        let mut flist = self.test_then_block()?;
        while self.lex.token == LuaTokenKind::Elseif {
            let j = self.jump();
            self.concat(&mut escapelist, j);
            self.patch_to_here(flist);
            flist = self.test_then_block()?;
        }
        if self.lex.token == LuaTokenKind::Else {
            let j = self.jump();
            self.concat(&mut escapelist, j);
            self.patch_to_here(flist);
            self.next()?;
            self.block()?;
        } else {
            self.concat(&mut escapelist, flist);
        }
        self.patch_to_here(escapelist);
        self.check_match(LuaTokenKind::End, LuaTokenKind::If, line)
    }

    // ============ Declarations ============

    fn localfunc(&mut self) -> CResult<()> {
        let name = self.str_checkname()?;
        self.new_local_var(name, 0)?;
        let v = ExpDesc::new(ExpKind::VLocal, self.fs.freereg);
        self.reserve_regs(1)?;
        // visible inside its own body, for recursion
        self.adjust_local_vars(1);
        let mut b = ExpDesc::void();
        let line = self.lex.line;
        self.body(&mut b, false, line)?;
        self.store_var(&v, &mut b)?;
        // debug information only sees the variable after this point
        let pc = self.fs.pc() as u32;
        let level = self.fs.nactvar - 1;
        self.fs.loc_var_mut(level).start_pc = pc;
        Ok(())
    }

    fn localstat(&mut self) -> CResult<()> {
        let mut nvars = 0;
        loop {
            let name = self.str_checkname()?;
            self.new_local_var(name, nvars)?;
            nvars += 1;
            if !self.test_next(LuaTokenKind::Char(b','))? {
                break;
            }
        }
        let mut e = ExpDesc::void();
        let nexps = if self.test_next(LuaTokenKind::Char(b'='))? {
            self.explist1(&mut e)?
        } else {
            0
        };
        self.adjust_assign(nvars, nexps, &mut e)?;
        self.adjust_local_vars(nvars);
        Ok(())
    }

    /// funcname -> NAME { `.` NAME } [ `:` NAME ]; true for methods
    fn funcname(&mut self, v: &mut ExpDesc) -> CResult<bool> {
        *v = self.single_var()?;
        while self.is_char(b'.') {
            self.field(v)?;
        }
        if self.is_char(b':') {
            self.field(v)?;
            return Ok(true);
        }
        Ok(false)
    }

    fn funcstat(&mut self, line: u32) -> CResult<()> {
        self.next()?;
        let mut v = ExpDesc::void();
        let needself = self.funcname(&mut v)?;
        let mut b = ExpDesc::void();
        self.body(&mut b, needself, line)?;
        self.store_var(&v, &mut b)?;
        // definition happens in the first line
        self.fix_line(line);
        Ok(())
    }

    fn retstat(&mut self) -> CResult<()> {
        // skip RETURN
        self.next()?;
        let (first, nret) = if block_follow(self.lex.token) || self.is_char(b';') {
            (0, 0)
        } else {
            let mut e = ExpDesc::void();
            let nret = self.explist1(&mut e)?;
            if e.has_multret() {
                self.set_returns(&e, LUA_MULTRET)?;
                if e.kind == ExpKind::VCall && nret == 1 {
                    Instruction::set_opcode(&mut self.fs.f.code[e.info as usize], OpCode::TailCall);
                    debug_assert_eq!(
                        Instruction::get_a(self.fs.f.code[e.info as usize]),
                        self.fs.nactvar
                    );
                }
                (self.fs.nactvar, LUA_MULTRET)
            } else if nret == 1 {
                (self.exp2anyreg(&mut e)?, 1)
            } else {
                // values must go to the stack
                self.exp2nextreg(&mut e)?;
                (self.fs.nactvar, nret as i32)
            }
        };
        self.ret(first, nret);
        Ok(())
    }
}
