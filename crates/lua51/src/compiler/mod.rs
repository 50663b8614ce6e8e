//! Single-pass compiler from Lua 5.1 source to [`Proto`]s.
//!
//! The parser drives code generation directly: every syntactic construct
//! is turned into instructions as soon as it is recognised, with
//! [`ExpDesc`] delaying the placement of expression values.

mod code;
mod expdesc;
mod expr;
mod func_state;
mod lexer;
mod stmt;

use std::rc::Rc;

use smol_str::SmolStr;

use crate::gc::StringId;
use crate::lua_value::{LocVar, Proto, VARARG_ISVARARG};
use crate::lua_vm::LuaVM;
use crate::lua_vm::lua_limits::{LUAI_MAXCCALLS, MAXUPVALUES, MAXVARS};
use crate::lua_vm::opcode::OpCode;
use code::NO_REG;
use expdesc::{ExpDesc, ExpKind};
use func_state::{BlockCnt, FuncState, UpvalDesc};
pub use lexer::{LuaLexer, LuaTokenKind};

pub(crate) type CResult<T> = Result<T, String>;

pub(crate) struct Parser<'a> {
    pub vm: &'a mut LuaVM,
    pub lex: LuaLexer<'a>,
    /// Function being compiled
    pub fs: FuncState,
    /// Enclosing functions, outermost first
    pub prev: Vec<FuncState>,
    /// Syntactic nesting depth
    depth: usize,
}

/// Compile a source chunk into the prototype of its main function.
/// Errors carry the full `chunk:line: message` text.
pub fn compile(vm: &mut LuaVM, source: &[u8], chunkname: &str) -> Result<Rc<Proto>, String> {
    let lex = LuaLexer::new(vm, source, chunkname);
    let mut parser = Parser {
        vm,
        lex,
        fs: FuncState::new(chunkname, 0),
        prev: Vec::new(),
        depth: 0,
    };
    parser.fs.f.is_vararg = VARARG_ISVARARG;
    parser.lex.next(parser.vm)?;
    parser.chunk()?;
    parser.check(LuaTokenKind::Eos)?;
    let fs = parser.close_func()?;
    debug_assert!(parser.prev.is_empty());
    debug_assert_eq!(fs.upvalues.len(), 0);
    Ok(Rc::new(fs.f))
}

impl<'a> Parser<'a> {
    // ============ Token helpers ============

    pub(crate) fn next(&mut self) -> CResult<()> {
        self.lex.next(self.vm)
    }

    fn error_expected(&self, token: LuaTokenKind) -> String {
        self.lex.syntax_error(&format!("'{}' expected", token.text()))
    }

    pub(crate) fn test_next(&mut self, token: LuaTokenKind) -> CResult<bool> {
        if self.lex.token.same_kind(token) {
            self.next()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    pub(crate) fn check(&self, token: LuaTokenKind) -> CResult<()> {
        if self.lex.token.same_kind(token) {
            Ok(())
        } else {
            Err(self.error_expected(token))
        }
    }

    pub(crate) fn check_next(&mut self, token: LuaTokenKind) -> CResult<()> {
        self.check(token)?;
        self.next()
    }

    pub(crate) fn check_char(&mut self, c: u8) -> CResult<()> {
        self.check_next(LuaTokenKind::Char(c))
    }

    pub(crate) fn is_char(&self, c: u8) -> bool {
        self.lex.token == LuaTokenKind::Char(c)
    }

    /// Expect `what` closing the construct `who` opened at `line`
    pub(crate) fn check_match(
        &mut self,
        what: LuaTokenKind,
        who: LuaTokenKind,
        line: u32,
    ) -> CResult<()> {
        if self.test_next(what)? {
            return Ok(());
        }
        if line == self.lex.line {
            Err(self.error_expected(what))
        } else {
            Err(self.lex.syntax_error(&format!(
                "'{}' expected (to close '{}' at line {})",
                what.text(),
                who.text(),
                line
            )))
        }
    }

    pub(crate) fn str_checkname(&mut self) -> CResult<StringId> {
        match self.lex.token {
            LuaTokenKind::Name(s) => {
                self.next()?;
                Ok(s)
            }
            _ => Err(self.lex.syntax_error("'<name>' expected")),
        }
    }

    pub(crate) fn enter_level(&mut self) -> CResult<()> {
        self.depth += 1;
        if self.depth > LUAI_MAXCCALLS {
            return Err(self.lex.error_at("chunk has too many syntax levels", None));
        }
        Ok(())
    }

    pub(crate) fn leave_level(&mut self) {
        self.depth -= 1;
    }

    pub(crate) fn depth(&self) -> usize {
        self.depth
    }

    // ============ Limits ============

    fn error_limit(&self, line_defined: u32, limit: usize, what: &str) -> String {
        let msg = if line_defined == 0 {
            format!("main function has more than {} {}", limit, what)
        } else {
            format!("function at line {} has more than {} {}", line_defined, limit, what)
        };
        self.lex.error_at(&msg, None)
    }

    pub(crate) fn check_limit(&self, v: usize, limit: usize, what: &str) -> CResult<()> {
        if v > limit {
            Err(self.error_limit(self.fs.f.line_defined, limit, what))
        } else {
            Ok(())
        }
    }

    // ============ Variables ============

    fn register_local_var(&mut self, name: StringId) -> CResult<u16> {
        if self.fs.f.loc_vars.len() >= i16::MAX as usize {
            return Err(self.lex.error_at("too many local variables", None));
        }
        let text = SmolStr::new(String::from_utf8_lossy(self.vm.string_bytes(name)));
        self.fs.f.loc_vars.push(LocVar {
            name: text,
            start_pc: 0,
            end_pc: 0,
        });
        self.fs.var_names.push(name);
        Ok((self.fs.f.loc_vars.len() - 1) as u16)
    }

    /// Declare the `n`-th pending local; it becomes visible on `adjust_local_vars`
    pub(crate) fn new_local_var(&mut self, name: StringId, n: u32) -> CResult<()> {
        self.check_limit((self.fs.nactvar + n + 1) as usize, MAXVARS, "local variables")?;
        let idx = self.register_local_var(name)?;
        let slot = (self.fs.nactvar + n) as usize;
        if self.fs.actvar.len() <= slot {
            self.fs.actvar.resize(slot + 1, 0);
        }
        self.fs.actvar[slot] = idx;
        Ok(())
    }

    pub(crate) fn new_local_literal(&mut self, name: &str, n: u32) -> CResult<()> {
        let id = self.vm.intern(name.as_bytes());
        self.new_local_var(id, n)
    }

    pub(crate) fn adjust_local_vars(&mut self, nvars: u32) {
        let pc = self.fs.pc() as u32;
        self.fs.nactvar += nvars;
        for i in (1..=nvars).rev() {
            let level = self.fs.nactvar - i;
            self.fs.loc_var_mut(level).start_pc = pc;
        }
    }

    pub(crate) fn remove_vars(&mut self, tolevel: u32) {
        let pc = self.fs.pc() as u32;
        while self.fs.nactvar > tolevel {
            self.fs.nactvar -= 1;
            let level = self.fs.nactvar;
            self.fs.loc_var_mut(level).end_pc = pc;
        }
    }

    /// `level` 0 is the current function, 1 its parent and so on
    fn fs_at(&self, level: usize) -> Option<&FuncState> {
        if level == 0 {
            Some(&self.fs)
        } else {
            let n = self.prev.len();
            (level <= n).then(|| &self.prev[n - level])
        }
    }

    fn fs_at_mut(&mut self, level: usize) -> Option<&mut FuncState> {
        if level == 0 {
            Some(&mut self.fs)
        } else {
            let n = self.prev.len();
            if level <= n { Some(&mut self.prev[n - level]) } else { None }
        }
    }

    fn index_upvalue(&mut self, level: usize, name: StringId, v: &ExpDesc) -> CResult<u32> {
        let Some(fs) = self.fs_at(level) else {
            return Ok(0);
        };
        if let Some(i) = fs
            .upvalues
            .iter()
            .position(|up| up.kind == v.kind && up.info == v.info)
        {
            return Ok(i as u32);
        }
        let nups = fs.upvalues.len();
        if nups + 1 > MAXUPVALUES {
            return Err(self.error_limit(fs.f.line_defined, MAXUPVALUES, "upvalues"));
        }
        let text = SmolStr::new(String::from_utf8_lossy(self.vm.string_bytes(name)));
        if let Some(fs) = self.fs_at_mut(level) {
            fs.upvalues.push(UpvalDesc {
                kind: v.kind,
                info: v.info,
                name,
            });
            fs.f.upvalue_names.push(text);
        }
        Ok(nups as u32)
    }

    fn single_var_aux(&mut self, level: usize, name: StringId, base: bool) -> CResult<ExpDesc> {
        let Some(fs) = self.fs_at_mut(level) else {
            return Ok(ExpDesc::new(ExpKind::VGlobal, NO_REG));
        };
        if let Some(v) = fs.search_var(name) {
            if !base {
                fs.mark_upval(v);
            }
            return Ok(ExpDesc::new(ExpKind::VLocal, v));
        }
        let up = self.single_var_aux(level + 1, name, false)?;
        if up.kind == ExpKind::VGlobal {
            return Ok(up);
        }
        let idx = self.index_upvalue(level, name, &up)?;
        Ok(ExpDesc::new(ExpKind::VUpval, idx))
    }

    pub(crate) fn single_var(&mut self) -> CResult<ExpDesc> {
        let name = self.str_checkname()?;
        let mut var = self.single_var_aux(0, name, true)?;
        if var.kind == ExpKind::VGlobal {
            var.info = self.string_k(name);
        }
        Ok(var)
    }

    // ============ Blocks ============

    pub(crate) fn enter_block(&mut self, isbreakable: bool) {
        self.fs.blocks.push(BlockCnt {
            breaklist: expdesc::NO_JUMP,
            nactvar: self.fs.nactvar,
            upval: false,
            isbreakable,
        });
    }

    pub(crate) fn leave_block(&mut self) {
        let Some(bl) = self.fs.blocks.pop() else {
            return;
        };
        self.remove_vars(bl.nactvar);
        if bl.upval {
            self.code_abc(OpCode::Close, bl.nactvar, 0, 0);
        }
        self.fs.freereg = self.fs.nactvar;
        self.patch_to_here(bl.breaklist);
    }

    // ============ Functions ============

    pub(crate) fn open_func(&mut self, line_defined: u32) {
        let fs = FuncState::new(&self.lex.source, line_defined);
        let parent = std::mem::replace(&mut self.fs, fs);
        self.prev.push(parent);
    }

    /// Finish the current function and return to the enclosing one
    pub(crate) fn close_func(&mut self) -> CResult<FuncState> {
        self.remove_vars(0);
        self.ret(0, 0);
        if let Some(msg) = self.fs.overflow.take() {
            return Err(self.lex.syntax_error(msg));
        }
        self.fs.f.num_upvalues = self.fs.upvalues.len() as u8;
        let fs = match self.prev.pop() {
            Some(parent) => std::mem::replace(&mut self.fs, parent),
            None => std::mem::replace(&mut self.fs, FuncState::new("", 0)),
        };
        Ok(fs)
    }

    /// Store a nested function and emit the CLOSURE that instantiates it
    pub(crate) fn push_closure(&mut self, func: FuncState, v: &mut ExpDesc) -> CResult<()> {
        let idx = self.fs.f.protos.len();
        if idx >= crate::lua_vm::opcode::Instruction::MAX_BX as usize {
            return Err(self.lex.syntax_error("too many nested functions"));
        }
        let upvalues = func.upvalues.clone();
        self.fs.f.protos.push(Rc::new(func.f));
        *v = ExpDesc::new(
            ExpKind::VReloc,
            self.code_abx(OpCode::Closure, 0, idx as u32) as u32,
        );
        for up in upvalues {
            let op = if up.kind == ExpKind::VLocal {
                OpCode::Move
            } else {
                OpCode::GetUpval
            };
            self.code_abc(op, 0, up.info, 0);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lua_vm::SafeOption;

    fn compile_str(src: &str) -> Result<Rc<Proto>, String> {
        let mut vm = LuaVM::new(SafeOption::default());
        compile(&mut vm, src.as_bytes(), "=test")
    }

    fn ops(p: &Proto) -> Vec<OpCode> {
        p.code
            .iter()
            .map(|&i| crate::lua_vm::opcode::Instruction::get_opcode(i))
            .collect()
    }

    #[test]
    fn test_empty_chunk() {
        let p = compile_str("").unwrap();
        assert_eq!(ops(&p), vec![OpCode::Return]);
        assert!(p.is_vararg());
        assert_eq!(p.max_stack_size, 2);
    }

    #[test]
    fn test_constant_folding() {
        let p = compile_str("local a = 2 * 3 + 1").unwrap();
        assert_eq!(ops(&p), vec![OpCode::LoadK, OpCode::Return]);
        assert_eq!(p.constants.len(), 1);
        // division by zero is left to run time
        let p = compile_str("local a = 1 / 0").unwrap();
        assert_eq!(ops(&p)[0], OpCode::Div);
    }

    #[test]
    fn test_tail_call() {
        let p = compile_str("return f(1)").unwrap();
        assert!(ops(&p).contains(&OpCode::TailCall));
        let p = compile_str("return (f(1))").unwrap();
        assert!(!ops(&p).contains(&OpCode::TailCall));
    }

    #[test]
    fn test_closure_upvalues() {
        let p = compile_str("local x; local function f() return x end").unwrap();
        assert_eq!(p.protos.len(), 1);
        assert_eq!(p.protos[0].num_upvalues, 1);
        assert_eq!(p.protos[0].upvalue_names[0].as_str(), "x");
        let code = ops(&p);
        let at = code.iter().position(|&op| op == OpCode::Closure).unwrap();
        assert_eq!(code[at + 1], OpCode::Move);
    }

    #[test]
    fn test_local_names() {
        let p = compile_str("local a, b = 1, 2 do local c end").unwrap();
        let names: Vec<&str> = p.loc_vars.iter().map(|v| v.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_syntax_errors() {
        let e = compile_str("x = = 1").unwrap_err();
        assert_eq!(e, "test:1: unexpected symbol near '='");
        let e = compile_str("if x then").unwrap_err();
        assert_eq!(e, "test:1: 'end' expected near '<eof>'");
        let e = compile_str("while true do\n\nx = 1").unwrap_err();
        assert_eq!(e, "test:3: 'end' expected (to close 'while' at line 1) near '<eof>'");
        let e = compile_str("break").unwrap_err();
        assert_eq!(e, "test:1: no loop to break near '<eof>'");
        let e = compile_str("function f() return ... end").unwrap_err();
        assert!(e.contains("cannot use '...' outside a vararg function"));
        let e = compile_str("x").unwrap_err();
        assert_eq!(e, "test:1: '=' expected near '<eof>'");
        let e = compile_str("(x) = 1").unwrap_err();
        assert_eq!(e, "test:1: syntax error near '='");
    }

    #[test]
    fn test_ambiguous_call() {
        let e = compile_str("local f = g\n(h)()").unwrap_err();
        assert!(e.contains("ambiguous syntax (function call x new statement)"));
    }

    #[test]
    fn test_too_many_locals() {
        let mut src = String::new();
        for i in 0..201 {
            src.push_str(&format!("local v{}\n", i));
        }
        let e = compile_str(&src).unwrap_err();
        assert!(e.contains("main function has more than 200 local variables"));
    }
}
