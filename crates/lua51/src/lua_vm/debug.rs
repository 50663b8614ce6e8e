// Debug support: hooks, stack-frame introspection, and the naming of
// values in error messages ("attempt to index local 't' (a nil value)")

use std::rc::Rc;

use crate::lua_value::{LuaValue, Proto};
use crate::lua_vm::lua_limits::{LUA_IDSIZE, LUA_MINSTACK};
use crate::lua_vm::opcode::{Instruction, OpCode};
use crate::lua_vm::{LuaError, LuaResult, LuaVM};

/// Event passed to a debug hook
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookEvent {
    Call,
    Return,
    /// Return of a frame that was replaced by a tail call
    TailReturn,
    /// Entering a new source line
    Line(u32),
    /// The instruction counter ran out
    Count,
}

/// Event selection bits for `LuaVM::set_hook`
pub struct HookMask;

impl HookMask {
    pub const CALL: u8 = 1 << 0;
    pub const RETURN: u8 = 1 << 1;
    pub const LINE: u8 = 1 << 2;
    pub const COUNT: u8 = 1 << 3;
}

/// A debug hook. Returning `Err` raises that error at the point where
/// the hook fired.
pub type HookFn = Rc<dyn Fn(&mut LuaVM, HookEvent) -> LuaResult<()>>;

/// Frame description, the `lua_Debug` of the embedding model
#[derive(Debug, Clone, Default)]
pub struct DebugInfo {
    pub source: String,
    pub short_src: String,
    /// "Lua", "C" or "main"
    pub what: &'static str,
    pub current_line: Option<u32>,
    pub line_defined: u32,
    pub name: Option<String>,
    /// "global", "local", "method", "field", "upvalue" or ""
    pub namewhat: &'static str,
}

/// Run the hook for `event` if hooks are allowed. The hook gets
/// `LUA_MINSTACK` free slots above the current top; both the top and the
/// frame limit are restored afterwards.
pub(crate) fn call_hook(vm: &mut LuaVM, event: HookEvent) -> LuaResult<()> {
    if !vm.state.allow_hook {
        return Ok(());
    }
    let Some(hook) = vm.state.hook.clone() else {
        return Ok(());
    };
    let top = vm.state.stack_top;
    let ci_top = vm.state.ci().top;
    vm.state.grow_to(top + LUA_MINSTACK);
    vm.state.ci_mut().top = top + LUA_MINSTACK;
    vm.state.allow_hook = false;
    let result = hook(vm, event);
    vm.state.allow_hook = true;
    vm.state.ci_mut().top = ci_top;
    vm.state.stack_top = top;
    result
}

/// Line and count hooks, called by the dispatch loop before the
/// instruction at `pc - 1` runs. `old_pc` is the previously saved pc.
pub(crate) fn trace_exec(vm: &mut LuaVM, old_pc: usize, pc: usize) -> LuaResult<()> {
    let mask = vm.state.hook_mask;
    if mask & HookMask::COUNT != 0 && vm.state.hook_count == 0 {
        vm.state.hook_rearm();
        call_hook(vm, HookEvent::Count)?;
    }
    if mask & HookMask::LINE != 0 {
        let Some(proto) = vm.current_proto() else {
            return Ok(());
        };
        let npc = pc - 1;
        let new_line = proto.line_at(npc);
        // new function, backward jump, or new line
        if npc == 0 || pc <= old_pc || new_line != proto.line_at(old_pc.saturating_sub(1)) {
            call_hook(vm, HookEvent::Line(new_line))?;
        }
    }
    Ok(())
}

/// Printable chunk name: `=name` verbatim, `@file` as a (possibly
/// truncated) file name, anything else as `[string "first line..."]`
pub fn chunk_id(source: &str) -> String {
    if let Some(rest) = source.strip_prefix('=') {
        return rest.chars().take(LUA_IDSIZE - 1).collect();
    }
    if let Some(file) = source.strip_prefix('@') {
        let room = LUA_IDSIZE - " '...' ".len() - 1;
        let len = file.chars().count();
        if len > room {
            let tail: String = file.chars().skip(len - room).collect();
            return format!("...{}", tail);
        }
        return file.to_string();
    }
    let room = LUA_IDSIZE - " [string \"...\"] ".len() - 1;
    let first_line = source.split(['\n', '\r']).next().unwrap_or("");
    let truncated = first_line.len() < source.len() || first_line.chars().count() > room;
    if truncated {
        let head: String = first_line.chars().take(room).collect();
        format!("[string \"{}...\"]", head)
    } else {
        format!("[string \"{}\"]", source)
    }
}

/// Last instruction before `last_pc` that wrote `reg`, if it can be known
/// without following jumps
fn find_set_reg(proto: &Proto, last_pc: usize, reg: usize) -> Option<usize> {
    let mut set_pc = None;
    let mut jump_target = 0;
    let mut pc = 0;
    while pc < last_pc {
        let i = proto.code[pc];
        let op = Instruction::get_opcode(i);
        let a = Instruction::get_a(i) as usize;
        let mut skip = 0;
        let changes = match op {
            OpCode::LoadNil => a <= reg && reg <= Instruction::get_b(i) as usize,
            OpCode::TForLoop => reg >= a + 3,
            OpCode::Call | OpCode::TailCall => reg >= a,
            OpCode::Test => false,
            OpCode::Jmp => {
                let dest = pc as i64 + 1 + Instruction::get_sbx(i) as i64;
                if (pc as i64) < dest && dest <= last_pc as i64 && dest as usize > jump_target {
                    jump_target = dest as usize;
                }
                false
            }
            OpCode::Closure => {
                // the upvalue pseudo-instructions follow
                let bx = Instruction::get_bx(i) as usize;
                skip = proto.protos.get(bx).map_or(0, |p| p.num_upvalues as usize);
                reg == a
            }
            OpCode::SetList => {
                if Instruction::get_c(i) == 0 {
                    skip = 1;
                }
                false
            }
            _ => op.sets_a() && reg == a,
        };
        if changes {
            set_pc = if pc < jump_target { None } else { Some(pc) };
        }
        pc += 1 + skip;
    }
    set_pc
}

impl LuaVM {
    /// Install (or with `None`, remove) the debug hook of the running thread
    pub fn set_hook(&mut self, hook: Option<HookFn>, mask: u8, count: u32) {
        let mut mask = mask;
        if count == 0 {
            mask &= !HookMask::COUNT;
        }
        if hook.is_none() || mask == 0 {
            self.state.hook = None;
            self.state.hook_mask = 0;
        } else {
            self.state.hook = hook;
            self.state.hook_mask = mask;
        }
        self.state.base_hook_count = count;
        self.state.hook_rearm();
    }

    pub fn hook_mask(&self) -> u8 {
        self.state.hook_mask
    }

    /// Proto of the running frame, when it is a Lua frame
    pub(crate) fn current_proto(&self) -> Option<Rc<Proto>> {
        let ci = self.state.ci();
        if !ci.is_lua() {
            return None;
        }
        self.frame_proto(self.state.call_stack.len() - 1)
    }

    fn frame_proto(&self, ci_index: usize) -> Option<Rc<Proto>> {
        let ci = &self.state.call_stack[ci_index];
        match self.state.stack[ci.func] {
            LuaValue::Function(id) => self.pool[id].body.proto().cloned(),
            _ => None,
        }
    }

    /// Call-stack index of the frame `level` levels below the running one
    fn level_index(&self, level: usize) -> Option<usize> {
        let n = self.state.call_stack.len();
        if level + 1 < n { Some(n - 1 - level) } else { None }
    }

    /// Function running at `level` (0 = running function)
    pub(crate) fn function_at(&self, level: usize) -> Option<LuaValue> {
        let index = self.level_index(level)?;
        Some(self.state.stack[self.state.call_stack[index].func])
    }

    fn frame_line(&self, ci_index: usize) -> Option<u32> {
        let ci = &self.state.call_stack[ci_index];
        if !ci.is_lua() {
            return None;
        }
        let proto = self.frame_proto(ci_index)?;
        Some(proto.line_at(ci.current_pc()))
    }

    /// Current line of the function at `level` (0 = running function)
    pub fn current_line(&self, level: usize) -> Option<u32> {
        self.frame_line(self.level_index(level)?)
    }

    pub fn get_info(&self, level: usize) -> Option<DebugInfo> {
        let index = self.level_index(level)?;
        let ci = &self.state.call_stack[index];
        let mut info = DebugInfo::default();
        match self.frame_proto(index) {
            Some(proto) => {
                info.source = proto.source.to_string();
                info.short_src = chunk_id(&proto.source);
                info.line_defined = proto.line_defined;
                info.what = if proto.line_defined == 0 { "main" } else { "Lua" };
                info.current_line = Some(proto.line_at(ci.current_pc()));
            }
            None => {
                info.source = "=[C]".to_string();
                info.short_src = "[C]".to_string();
                info.what = "C";
            }
        }
        if let Some((namewhat, name)) = self.func_name(index) {
            info.namewhat = namewhat;
            info.name = Some(name);
        }
        Some(info)
    }

    /// `chunk:line:` prefix for the function at `level`, empty when it is
    /// not a Lua function
    pub fn where_(&self, level: usize) -> String {
        let Some(index) = self.level_index(level) else {
            return String::new();
        };
        let Some(proto) = self.frame_proto(index) else {
            return String::new();
        };
        if !self.state.call_stack[index].is_lua() {
            return String::new();
        }
        let line = proto.line_at(self.state.call_stack[index].current_pc());
        if line == 0 {
            return String::new();
        }
        format!("{}:{}: ", chunk_id(&proto.source), line)
    }

    /// Stack traceback starting at `level`
    pub fn traceback(&self, level: usize) -> String {
        let mut out = String::from("stack traceback:");
        let mut level = level;
        while let Some(info) = self.get_info(level) {
            out.push_str("\n\t");
            out.push_str(&info.short_src);
            out.push(':');
            if let Some(line) = info.current_line {
                out.push_str(&format!("{}:", line));
            }
            match (&info.name, info.what) {
                (Some(name), _) => out.push_str(&format!(" in function '{}'", name)),
                (None, "main") => out.push_str(" in main chunk"),
                (None, "C") => out.push_str(" ?"),
                (None, _) => out.push_str(&format!(" in function <{}:{}>", info.short_src, info.line_defined)),
            }
            level += 1;
        }
        out
    }

    fn constant_name(&self, proto: &Proto, rk: u32) -> String {
        if Instruction::is_k(rk) {
            if let Some(LuaValue::String(s)) = proto.constants.get(Instruction::index_k(rk)) {
                return self.pool[*s].to_str_lossy().into_owned();
            }
        }
        "?".to_string()
    }

    /// How register `reg` of a Lua frame got its value at `pc`
    fn obj_name(&self, proto: &Proto, pc: usize, reg: usize) -> Option<(&'static str, String)> {
        if let Some(name) = proto.local_name(reg + 1, pc) {
            return Some(("local", name.to_string()));
        }
        let set_pc = find_set_reg(proto, pc, reg)?;
        let i = proto.code[set_pc];
        match Instruction::get_opcode(i) {
            OpCode::GetGlobal => match proto.constants.get(Instruction::get_bx(i) as usize) {
                Some(LuaValue::String(s)) => {
                    Some(("global", self.pool[*s].to_str_lossy().into_owned()))
                }
                _ => None,
            },
            OpCode::Move => {
                let a = Instruction::get_a(i) as usize;
                let b = Instruction::get_b(i) as usize;
                if b < a { self.obj_name(proto, pc, b) } else { None }
            }
            OpCode::GetTable => Some(("field", self.constant_name(proto, Instruction::get_c(i)))),
            OpCode::GetUpval => {
                let name = proto
                    .upvalue_names
                    .get(Instruction::get_b(i) as usize)
                    .map_or_else(|| "?".to_string(), |n| n.to_string());
                Some(("upvalue", name))
            }
            OpCode::Self_ => Some(("method", self.constant_name(proto, Instruction::get_c(i)))),
            _ => None,
        }
    }

    /// Name of the function running in frame `ci_index`, as seen from the
    /// call instruction of its caller
    fn func_name(&self, ci_index: usize) -> Option<(&'static str, String)> {
        let ci = &self.state.call_stack[ci_index];
        if (ci.is_lua() && ci.tailcalls > 0) || ci_index < 2 {
            return None;
        }
        let caller = &self.state.call_stack[ci_index - 1];
        if !caller.is_lua() {
            return None;
        }
        let proto = self.frame_proto(ci_index - 1)?;
        let pc = caller.current_pc();
        let i = *proto.code.get(pc)?;
        match Instruction::get_opcode(i) {
            OpCode::Call | OpCode::TailCall | OpCode::TForLoop => {
                self.obj_name(&proto, pc, Instruction::get_a(i) as usize)
            }
            _ => None,
        }
    }

    /// Raise a runtime error from inside the VM. The message gets the
    /// position of the running Lua function, if that is what is running.
    pub fn runtime_error(&mut self, msg: impl AsRef<str>) -> LuaError {
        let msg = msg.as_ref();
        let text = if self.state.ci().is_lua() {
            let index = self.state.call_stack.len() - 1;
            match self.frame_proto(index) {
                Some(proto) => {
                    let line = proto.line_at(self.state.ci().current_pc());
                    format!("{}:{}: {}", chunk_id(&proto.source), line, msg)
                }
                None => msg.to_string(),
            }
        } else {
            msg.to_string()
        };
        let v = self.create_string(&text);
        self.throw(v)
    }

    /// Raise an error from a native function: the message is prefixed
    /// with the position of the Lua code that called it
    pub fn error(&mut self, msg: impl AsRef<str>) -> LuaError {
        let text = format!("{}{}", self.where_(1), msg.as_ref());
        let v = self.create_string(&text);
        self.throw(v)
    }

    /// `attempt to <op> a <type> value`, naming the culprit when `slot`
    /// is a register of the running Lua frame
    pub(crate) fn type_error(&mut self, v: LuaValue, slot: Option<usize>, op: &str) -> LuaError {
        let type_name = v.type_name();
        let named = slot.and_then(|slot| {
            let ci = self.state.ci();
            if !ci.is_lua() || slot < ci.base || slot >= ci.top {
                return None;
            }
            let (base, pc) = (ci.base, ci.current_pc());
            let proto = self.current_proto()?;
            self.obj_name(&proto, pc, slot - base)
        });
        match named {
            Some((kind, name)) => self.runtime_error(format!(
                "attempt to {} {} '{}' (a {} value)",
                op, kind, name, type_name
            )),
            None => self.runtime_error(format!("attempt to {} a {} value", op, type_name)),
        }
    }

    /// Arithmetic on operands that are not numbers: blame the first one
    /// that does not convert
    pub(crate) fn arith_error(
        &mut self,
        a: LuaValue,
        a_slot: Option<usize>,
        b: LuaValue,
        b_slot: Option<usize>,
    ) -> LuaError {
        if self.to_number(&a).is_none() {
            self.type_error(a, a_slot, "perform arithmetic on")
        } else {
            self.type_error(b, b_slot, "perform arithmetic on")
        }
    }

    pub(crate) fn concat_error(
        &mut self,
        a: LuaValue,
        a_slot: usize,
        b: LuaValue,
        b_slot: usize,
    ) -> LuaError {
        if a.is_string() || a.is_number() {
            self.type_error(b, Some(b_slot), "concatenate")
        } else {
            self.type_error(a, Some(a_slot), "concatenate")
        }
    }

    pub(crate) fn order_error(&mut self, a: LuaValue, b: LuaValue) -> LuaError {
        let (t1, t2) = (a.type_name(), b.type_name());
        if t1 == t2 {
            self.runtime_error(format!("attempt to compare two {} values", t1))
        } else {
            self.runtime_error(format!("attempt to compare {} with {}", t1, t2))
        }
    }

    /// `bad argument #n to 'f' (msg)` for the running native function
    pub fn arg_error(&mut self, narg: usize, extramsg: &str) -> LuaError {
        let index = self.state.call_stack.len() - 1;
        let (namewhat, name) = match self.func_name(index) {
            Some((namewhat, name)) => (namewhat, name),
            None => ("", "?".to_string()),
        };
        let mut narg = narg;
        if namewhat == "method" {
            narg -= 1;
            if narg == 0 {
                return self.error(format!("calling '{}' on bad self ({})", name, extramsg));
            }
        }
        self.error(format!("bad argument #{} to '{}' ({})", narg, name, extramsg))
    }

    /// `bad argument #n to 'f' (<expected> expected, got <type>)`
    pub fn type_arg_error(&mut self, narg: usize, expected: &str) -> LuaError {
        let got = self.type_name_at(narg as i32);
        let msg = format!("{} expected, got {}", expected, got);
        self.arg_error(narg, &msg)
    }
}
