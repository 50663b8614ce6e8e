// Expression parsing

use super::code::{BinOpr, UNARY_PRIORITY, UnOpr};
use super::expdesc::{ExpDesc, ExpKind};
use super::lexer::LuaTokenKind;
use super::{CResult, Parser};
use crate::lua_value::number::int2fb;
use crate::lua_value::{VARARG_ISVARARG, VARARG_NEEDSARG};
use crate::lua_vm::lua_limits::{LFIELDS_PER_FLUSH, LUA_MULTRET};
use crate::lua_vm::opcode::{Instruction, OpCode};

/// State of a table constructor being parsed
struct ConsControl {
    /// Last list item read
    v: ExpDesc,
    /// Table register
    table: u32,
    /// Record fields
    nh: u32,
    /// Array items
    na: u32,
    /// Array items pending a SETLIST
    tostore: u32,
}

impl Parser<'_> {
    pub(crate) fn expr(&mut self, v: &mut ExpDesc) -> CResult<()> {
        self.subexpr(v, 0)?;
        Ok(())
    }

    /// Parse a comma-separated list, leaving all but the last value in
    /// consecutive registers. Returns the number of expressions.
    pub(crate) fn explist1(&mut self, v: &mut ExpDesc) -> CResult<u32> {
        let mut n = 1;
        self.expr(v)?;
        while self.test_next(LuaTokenKind::Char(b','))? {
            self.exp2nextreg(v)?;
            self.expr(v)?;
            n += 1;
        }
        Ok(n)
    }

    fn code_string(&mut self, s: crate::gc::StringId) -> ExpDesc {
        ExpDesc::new(ExpKind::VK, self.string_k(s))
    }

    pub(crate) fn check_name_k(&mut self) -> CResult<ExpDesc> {
        let name = self.str_checkname()?;
        Ok(self.code_string(name))
    }

    /// `.name` or `:name` applied to `v`
    pub(crate) fn field(&mut self, v: &mut ExpDesc) -> CResult<()> {
        self.exp2anyreg(v)?;
        self.next()?;
        let mut key = self.check_name_k()?;
        self.indexed(v, &mut key)
    }

    /// `[exp]`
    fn yindex(&mut self, v: &mut ExpDesc) -> CResult<()> {
        self.next()?;
        self.expr(v)?;
        self.exp2val(v)?;
        self.check_char(b']')
    }

    // ============ Table constructors ============

    fn rec_field(&mut self, cc: &mut ConsControl) -> CResult<()> {
        let reg = self.fs.freereg;
        let mut key = if let LuaTokenKind::Name(_) = self.lex.token {
            self.check_limit(cc.nh as usize, i32::MAX as usize - 2, "items in a constructor")?;
            self.check_name_k()?
        } else {
            let mut key = ExpDesc::void();
            self.yindex(&mut key)?;
            key
        };
        cc.nh += 1;
        self.check_char(b'=')?;
        let rkkey = self.exp2rk(&mut key)?;
        let mut val = ExpDesc::void();
        self.expr(&mut val)?;
        let rkval = self.exp2rk(&mut val)?;
        self.code_abc(OpCode::SetTable, cc.table, rkkey, rkval);
        self.fs.freereg = reg;
        Ok(())
    }

    fn close_list_field(&mut self, cc: &mut ConsControl) -> CResult<()> {
        if cc.v.kind == ExpKind::VVoid {
            return Ok(());
        }
        self.exp2nextreg(&mut cc.v)?;
        cc.v.kind = ExpKind::VVoid;
        if cc.tostore as usize == LFIELDS_PER_FLUSH {
            self.set_list(cc.table, cc.na, cc.tostore as i32);
            cc.tostore = 0;
        }
        Ok(())
    }

    fn last_list_field(&mut self, cc: &mut ConsControl) -> CResult<()> {
        if cc.tostore == 0 {
            return Ok(());
        }
        if cc.v.has_multret() {
            self.set_returns(&cc.v, LUA_MULTRET)?;
            self.set_list(cc.table, cc.na, LUA_MULTRET);
            cc.na -= 1;
        } else {
            if cc.v.kind != ExpKind::VVoid {
                self.exp2nextreg(&mut cc.v)?;
            }
            self.set_list(cc.table, cc.na, cc.tostore as i32);
        }
        Ok(())
    }

    fn list_field(&mut self, cc: &mut ConsControl) -> CResult<()> {
        self.expr(&mut cc.v)?;
        self.check_limit(cc.na as usize, i32::MAX as usize - 2, "items in a constructor")?;
        cc.na += 1;
        cc.tostore += 1;
        Ok(())
    }

    pub(crate) fn constructor(&mut self, t: &mut ExpDesc) -> CResult<()> {
        let line = self.lex.line;
        let pc = self.code_abc(OpCode::NewTable, 0, 0, 0);
        *t = ExpDesc::new(ExpKind::VReloc, pc as u32);
        self.exp2nextreg(t)?;
        let mut cc = ConsControl {
            v: ExpDesc::void(),
            table: t.info,
            nh: 0,
            na: 0,
            tostore: 0,
        };
        self.check_char(b'{')?;
        loop {
            if self.is_char(b'}') {
                break;
            }
            self.close_list_field(&mut cc)?;
            match self.lex.token {
                LuaTokenKind::Name(_) => {
                    if self.lex.lookahead(self.vm)? != LuaTokenKind::Char(b'=') {
                        self.list_field(&mut cc)?;
                    } else {
                        self.rec_field(&mut cc)?;
                    }
                }
                LuaTokenKind::Char(b'[') => self.rec_field(&mut cc)?,
                _ => self.list_field(&mut cc)?,
            }
            if !self.test_next(LuaTokenKind::Char(b','))?
                && !self.test_next(LuaTokenKind::Char(b';'))?
            {
                break;
            }
        }
        self.check_match(LuaTokenKind::Char(b'}'), LuaTokenKind::Char(b'{'), line)?;
        self.last_list_field(&mut cc)?;
        let code = &mut self.fs.f.code[pc];
        Instruction::set_b(code, int2fb(cc.na));
        Instruction::set_c(code, int2fb(cc.nh));
        Ok(())
    }

    // ============ Functions ============

    fn parlist(&mut self) -> CResult<()> {
        let mut nparams = 0;
        let mut is_vararg = false;
        if !self.is_char(b')') {
            loop {
                match self.lex.token {
                    LuaTokenKind::Name(_) => {
                        let name = self.str_checkname()?;
                        self.new_local_var(name, nparams)?;
                        nparams += 1;
                    }
                    LuaTokenKind::Dots => {
                        self.next()?;
                        is_vararg = true;
                    }
                    _ => return Err(self.lex.syntax_error("<name> or '...' expected")),
                }
                if is_vararg || !self.test_next(LuaTokenKind::Char(b','))? {
                    break;
                }
            }
        }
        if is_vararg {
            self.fs.f.is_vararg = VARARG_ISVARARG;
        }
        self.adjust_local_vars(nparams);
        self.fs.f.num_params = self.fs.nactvar as u8;
        self.reserve_regs(self.fs.nactvar)
    }

    /// Function body after `function`; the closure lands in `e`
    pub(crate) fn body(&mut self, e: &mut ExpDesc, needself: bool, line: u32) -> CResult<()> {
        self.open_func(line);
        self.check_char(b'(')?;
        if needself {
            self.new_local_literal("self", 0)?;
            self.adjust_local_vars(1);
        }
        self.parlist()?;
        self.check_char(b')')?;
        self.chunk()?;
        self.fs.f.last_line_defined = self.lex.line;
        self.check_match(LuaTokenKind::End, LuaTokenKind::Function, line)?;
        let func = self.close_func()?;
        self.push_closure(func, e)
    }

    fn funcargs(&mut self, f: &mut ExpDesc) -> CResult<()> {
        let line = self.lex.line;
        let mut args = ExpDesc::void();
        match self.lex.token {
            LuaTokenKind::Char(b'(') => {
                if line != self.lex.last_line {
                    return Err(self
                        .lex
                        .syntax_error("ambiguous syntax (function call x new statement)"));
                }
                self.next()?;
                if !self.is_char(b')') {
                    self.explist1(&mut args)?;
                    self.set_returns(&args, LUA_MULTRET)?;
                }
                self.check_match(LuaTokenKind::Char(b')'), LuaTokenKind::Char(b'('), line)?;
            }
            LuaTokenKind::Char(b'{') => self.constructor(&mut args)?,
            LuaTokenKind::String(s) => {
                args = self.code_string(s);
                self.next()?;
            }
            _ => return Err(self.lex.syntax_error("function arguments expected")),
        }
        debug_assert_eq!(f.kind, ExpKind::VNonReloc);
        let base = f.info;
        let nparams = if args.has_multret() {
            LUA_MULTRET
        } else {
            if args.kind != ExpKind::VVoid {
                self.exp2nextreg(&mut args)?;
            }
            (self.fs.freereg - (base + 1)) as i32
        };
        let pc = self.code_abc(OpCode::Call, base, (nparams + 1) as u32, 2);
        *f = ExpDesc::new(ExpKind::VCall, pc as u32);
        self.fix_line(line);
        // the call removes the function and its arguments, leaving one result
        self.fs.freereg = base + 1;
        Ok(())
    }

    // ============ Primary and simple expressions ============

    fn prefixexp(&mut self, v: &mut ExpDesc) -> CResult<()> {
        match self.lex.token {
            LuaTokenKind::Char(b'(') => {
                let line = self.lex.line;
                self.next()?;
                self.expr(v)?;
                self.check_match(LuaTokenKind::Char(b')'), LuaTokenKind::Char(b'('), line)?;
                self.discharge_vars(v);
                Ok(())
            }
            LuaTokenKind::Name(_) => {
                *v = self.single_var()?;
                Ok(())
            }
            _ => Err(self.lex.syntax_error("unexpected symbol")),
        }
    }

    /// prefixexp { `.` NAME | `[` exp `]` | `:` NAME funcargs | funcargs }
    pub(crate) fn primaryexp(&mut self, v: &mut ExpDesc) -> CResult<()> {
        self.prefixexp(v)?;
        loop {
            match self.lex.token {
                LuaTokenKind::Char(b'.') => self.field(v)?,
                LuaTokenKind::Char(b'[') => {
                    self.exp2anyreg(v)?;
                    let mut key = ExpDesc::void();
                    self.yindex(&mut key)?;
                    self.indexed(v, &mut key)?;
                }
                LuaTokenKind::Char(b':') => {
                    self.next()?;
                    let mut key = self.check_name_k()?;
                    self.code_self(v, &mut key)?;
                    self.funcargs(v)?;
                }
                LuaTokenKind::Char(b'(') | LuaTokenKind::Char(b'{') | LuaTokenKind::String(_) => {
                    self.exp2nextreg(v)?;
                    self.funcargs(v)?;
                }
                _ => return Ok(()),
            }
        }
    }

    fn simpleexp(&mut self, v: &mut ExpDesc) -> CResult<()> {
        match self.lex.token {
            LuaTokenKind::Number(n) => *v = ExpDesc::number(n),
            LuaTokenKind::String(s) => *v = self.code_string(s),
            LuaTokenKind::Nil => *v = ExpDesc::new(ExpKind::VNil, 0),
            LuaTokenKind::True => *v = ExpDesc::new(ExpKind::VTrue, 0),
            LuaTokenKind::False => *v = ExpDesc::new(ExpKind::VFalse, 0),
            LuaTokenKind::Dots => {
                if self.fs.f.is_vararg & VARARG_ISVARARG == 0 {
                    return Err(self
                        .lex
                        .syntax_error("cannot use '...' outside a vararg function"));
                }
                self.fs.f.is_vararg &= !VARARG_NEEDSARG;
                let pc = self.code_abc(OpCode::VarArg, 0, 1, 0);
                *v = ExpDesc::new(ExpKind::VVararg, pc as u32);
            }
            LuaTokenKind::Char(b'{') => return self.constructor(v),
            LuaTokenKind::Function => {
                self.next()?;
                let line = self.lex.line;
                return self.body(v, false, line);
            }
            _ => return self.primaryexp(v),
        }
        self.next()
    }

    // ============ Operators ============

    fn unary_op(token: LuaTokenKind) -> Option<UnOpr> {
        match token {
            LuaTokenKind::Not => Some(UnOpr::Not),
            LuaTokenKind::Char(b'-') => Some(UnOpr::Minus),
            LuaTokenKind::Char(b'#') => Some(UnOpr::Len),
            _ => None,
        }
    }

    fn binary_op(token: LuaTokenKind) -> Option<BinOpr> {
        Some(match token {
            LuaTokenKind::Char(b'+') => BinOpr::Add,
            LuaTokenKind::Char(b'-') => BinOpr::Sub,
            LuaTokenKind::Char(b'*') => BinOpr::Mul,
            LuaTokenKind::Char(b'/') => BinOpr::Div,
            LuaTokenKind::Char(b'%') => BinOpr::Mod,
            LuaTokenKind::Char(b'^') => BinOpr::Pow,
            LuaTokenKind::Concat => BinOpr::Concat,
            LuaTokenKind::Ne => BinOpr::Ne,
            LuaTokenKind::Eq => BinOpr::Eq,
            LuaTokenKind::Char(b'<') => BinOpr::Lt,
            LuaTokenKind::Le => BinOpr::Le,
            LuaTokenKind::Char(b'>') => BinOpr::Gt,
            LuaTokenKind::Ge => BinOpr::Ge,
            LuaTokenKind::And => BinOpr::And,
            LuaTokenKind::Or => BinOpr::Or,
            _ => return None,
        })
    }

    /// subexpr -> (simpleexp | unop subexpr) { binop subexpr }
    /// where `binop` is any binary operator with priority above `limit`.
    /// Returns the first operator not consumed.
    fn subexpr(&mut self, v: &mut ExpDesc, limit: u8) -> CResult<Option<BinOpr>> {
        self.enter_level()?;
        if let Some(uop) = Self::unary_op(self.lex.token) {
            self.next()?;
            self.subexpr(v, UNARY_PRIORITY)?;
            self.prefix(uop, v)?;
        } else {
            self.simpleexp(v)?;
        }
        let mut op = Self::binary_op(self.lex.token);
        while let Some(bop) = op {
            let (left, right) = bop.priority();
            if left <= limit {
                break;
            }
            self.next()?;
            self.infix(bop, v)?;
            let mut v2 = ExpDesc::void();
            let nextop = self.subexpr(&mut v2, right)?;
            self.posfix(bop, v, &mut v2)?;
            op = nextop;
        }
        self.leave_level();
        Ok(op)
    }
}
