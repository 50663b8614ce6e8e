// Chunk serializer/deserializer for string.dump/load
// Standard Lua 5.1 binary chunk format (little endian, 4-byte int,
// 8-byte size_t, 8-byte double)

use std::io::{Cursor, Read};
use std::rc::Rc;

use smol_str::SmolStr;

use super::{LocVar, LuaValue, Proto, VARARG_HASARG, VARARG_ISVARARG, VARARG_NEEDSARG};
use crate::lua_vm::LuaVM;
use crate::lua_vm::lua_limits::MAXSTACK;
use crate::lua_vm::opcode::{Instruction, OpArgMask, OpCode, OpMode};

const LUA_SIGNATURE: &[u8] = b"\x1bLua";
const LUAC_VERSION: u8 = 0x51;
const LUAC_FORMAT: u8 = 0;
const LUAC_HEADERSIZE: usize = 12;

const TAG_NIL: u8 = 0;
const TAG_BOOLEAN: u8 = 1;
const TAG_NUMBER: u8 = 3;
const TAG_STRING: u8 = 4;

fn header() -> [u8; LUAC_HEADERSIZE] {
    [
        LUA_SIGNATURE[0],
        LUA_SIGNATURE[1],
        LUA_SIGNATURE[2],
        LUA_SIGNATURE[3],
        LUAC_VERSION,
        LUAC_FORMAT,
        1, // little endian
        4, // sizeof(int)
        8, // sizeof(size_t)
        4, // sizeof(Instruction)
        8, // sizeof(lua_Number)
        0, // floating point numbers
    ]
}

/// Serialize a function prototype tree. With `strip` set, line info,
/// local names, upvalue names and source names are left out.
pub fn dump_proto(vm: &LuaVM, proto: &Proto, strip: bool) -> Vec<u8> {
    let mut buf = Vec::with_capacity(64 + proto.code.len() * 4);
    buf.extend_from_slice(&header());
    write_function(vm, &mut buf, proto, None, strip);
    buf
}

fn write_int(buf: &mut Vec<u8>, n: u32) {
    buf.extend_from_slice(&n.to_le_bytes());
}

fn write_string(buf: &mut Vec<u8>, s: Option<&[u8]>) {
    match s {
        None => buf.extend_from_slice(&0u64.to_le_bytes()),
        Some(bytes) => {
            // length includes the trailing NUL
            buf.extend_from_slice(&(bytes.len() as u64 + 1).to_le_bytes());
            buf.extend_from_slice(bytes);
            buf.push(0);
        }
    }
}

fn write_function(
    vm: &LuaVM,
    buf: &mut Vec<u8>,
    f: &Proto,
    parent_source: Option<&str>,
    strip: bool,
) {
    if strip || parent_source == Some(f.source.as_str()) {
        write_string(buf, None);
    } else {
        write_string(buf, Some(f.source.as_bytes()));
    }
    write_int(buf, f.line_defined);
    write_int(buf, f.last_line_defined);
    buf.push(f.num_upvalues);
    buf.push(f.num_params);
    buf.push(f.is_vararg);
    buf.push(f.max_stack_size);

    write_int(buf, f.code.len() as u32);
    for &i in &f.code {
        write_int(buf, i);
    }

    write_int(buf, f.constants.len() as u32);
    for k in &f.constants {
        match k {
            LuaValue::Boolean(b) => {
                buf.push(TAG_BOOLEAN);
                buf.push(*b as u8);
            }
            LuaValue::Number(n) => {
                buf.push(TAG_NUMBER);
                buf.extend_from_slice(&n.to_le_bytes());
            }
            LuaValue::String(s) => {
                buf.push(TAG_STRING);
                write_string(buf, Some(vm.string_bytes(*s)));
            }
            _ => buf.push(TAG_NIL),
        }
    }
    write_int(buf, f.protos.len() as u32);
    for p in &f.protos {
        write_function(vm, buf, p, Some(f.source.as_str()), strip);
    }

    if strip {
        write_int(buf, 0);
        write_int(buf, 0);
        write_int(buf, 0);
        return;
    }
    write_int(buf, f.line_info.len() as u32);
    for &line in &f.line_info {
        write_int(buf, line);
    }
    write_int(buf, f.loc_vars.len() as u32);
    for var in &f.loc_vars {
        write_string(buf, Some(var.name.as_bytes()));
        write_int(buf, var.start_pc);
        write_int(buf, var.end_pc);
    }
    write_int(buf, f.upvalue_names.len() as u32);
    for name in &f.upvalue_names {
        write_string(buf, Some(name.as_bytes()));
    }
}

struct ChunkReader<'a, 'vm> {
    vm: &'vm mut LuaVM,
    cursor: Cursor<&'a [u8]>,
    name: String,
}

/// Load a binary chunk. Errors are fully formatted messages.
pub fn undump_proto(vm: &mut LuaVM, data: &[u8], chunkname: &str) -> Result<Rc<Proto>, String> {
    let name = match chunkname.as_bytes().first() {
        Some(b'@') | Some(b'=') => chunkname[1..].to_string(),
        Some(&c) if c == LUA_SIGNATURE[0] => "binary string".to_string(),
        _ => chunkname.to_string(),
    };
    let mut reader = ChunkReader {
        vm,
        cursor: Cursor::new(data),
        name,
    };
    reader.read_header()?;
    let proto = reader.read_function(&SmolStr::new("=?"))?;
    Ok(Rc::new(proto))
}

impl ChunkReader<'_, '_> {
    fn fail(&self, why: &str) -> String {
        format!("{}: {} in precompiled chunk", self.name, why)
    }

    fn read_bytes(&mut self, n: usize) -> Result<Vec<u8>, String> {
        let remaining = self.cursor.get_ref().len() as u64 - self.cursor.position();
        if (n as u64) > remaining {
            return Err(self.fail("unexpected end"));
        }
        let mut bytes = vec![0u8; n];
        self.cursor
            .read_exact(&mut bytes)
            .map_err(|_| self.fail("unexpected end"))?;
        Ok(bytes)
    }

    fn read_byte(&mut self) -> Result<u8, String> {
        let mut b = [0u8; 1];
        self.cursor
            .read_exact(&mut b)
            .map_err(|_| self.fail("unexpected end"))?;
        Ok(b[0])
    }

    fn read_int(&mut self) -> Result<u32, String> {
        let mut b = [0u8; 4];
        self.cursor
            .read_exact(&mut b)
            .map_err(|_| self.fail("unexpected end"))?;
        let n = i32::from_le_bytes(b);
        if n < 0 {
            return Err(self.fail("bad integer"));
        }
        Ok(n as u32)
    }

    fn read_size(&mut self) -> Result<usize, String> {
        let mut b = [0u8; 8];
        self.cursor
            .read_exact(&mut b)
            .map_err(|_| self.fail("unexpected end"))?;
        Ok(u64::from_le_bytes(b) as usize)
    }

    fn read_number(&mut self) -> Result<f64, String> {
        let mut b = [0u8; 8];
        self.cursor
            .read_exact(&mut b)
            .map_err(|_| self.fail("unexpected end"))?;
        Ok(f64::from_le_bytes(b))
    }

    /// Raw string bytes without the trailing NUL; `None` for a null string
    fn read_string(&mut self) -> Result<Option<Vec<u8>>, String> {
        let size = self.read_size()?;
        if size == 0 {
            return Ok(None);
        }
        let mut bytes = self.read_bytes(size)?;
        bytes.pop();
        Ok(Some(bytes))
    }

    fn read_name(&mut self) -> Result<Option<SmolStr>, String> {
        Ok(self
            .read_string()?
            .map(|b| SmolStr::new(String::from_utf8_lossy(&b))))
    }

    fn read_header(&mut self) -> Result<(), String> {
        let bytes = self.read_bytes(LUAC_HEADERSIZE)?;
        if bytes[..] != header()[..] {
            return Err(self.fail("bad header"));
        }
        Ok(())
    }

    fn read_function(&mut self, parent_source: &SmolStr) -> Result<Proto, String> {
        let source = self.read_name()?.unwrap_or_else(|| parent_source.clone());
        let mut f = Proto {
            source,
            line_defined: self.read_int()?,
            last_line_defined: self.read_int()?,
            num_upvalues: self.read_byte()?,
            num_params: self.read_byte()?,
            is_vararg: self.read_byte()?,
            max_stack_size: self.read_byte()?,
            ..Proto::default()
        };

        let n = self.read_int()? as usize;
        f.code = Vec::with_capacity(n.min(1 << 16));
        for _ in 0..n {
            f.code.push(self.read_int_raw()?);
        }

        let n = self.read_int()? as usize;
        for _ in 0..n {
            let k = match self.read_byte()? {
                TAG_NIL => LuaValue::Nil,
                TAG_BOOLEAN => LuaValue::Boolean(self.read_byte()? != 0),
                TAG_NUMBER => LuaValue::Number(self.read_number()?),
                TAG_STRING => {
                    let bytes = self.read_string()?.unwrap_or_default();
                    self.vm.create_bytes(&bytes)
                }
                _ => return Err(self.fail("bad constant")),
            };
            f.constants.push(k);
        }
        let n = self.read_int()? as usize;
        for _ in 0..n {
            let child = self.read_function(&f.source)?;
            f.protos.push(Rc::new(child));
        }

        let n = self.read_int()? as usize;
        for _ in 0..n {
            f.line_info.push(self.read_int_raw()?);
        }
        let n = self.read_int()? as usize;
        for _ in 0..n {
            let name = self.read_name()?.unwrap_or_default();
            f.loc_vars.push(LocVar {
                name,
                start_pc: self.read_int()?,
                end_pc: self.read_int()?,
            });
        }
        let n = self.read_int()? as usize;
        for _ in 0..n {
            let name = self.read_name()?.unwrap_or_default();
            f.upvalue_names.push(name);
        }

        if !check_code(&f) {
            return Err(self.fail("bad code"));
        }
        Ok(f)
    }

    /// Instructions and line numbers use the full 32 bits
    fn read_int_raw(&mut self) -> Result<u32, String> {
        let mut b = [0u8; 4];
        self.cursor
            .read_exact(&mut b)
            .map_err(|_| self.fail("unexpected end"))?;
        Ok(u32::from_le_bytes(b))
    }
}

// ===== Bytecode verification =====

fn check_reg(f: &Proto, r: u32) -> bool {
    (r as usize) < f.max_stack_size as usize
}

fn check_rk(f: &Proto, r: u32) -> bool {
    if Instruction::is_k(r) {
        Instruction::index_k(r) < f.constants.len()
    } else {
        check_reg(f, r)
    }
}

fn op_at(f: &Proto, pc: usize) -> Option<OpCode> {
    let i = *f.code.get(pc)?;
    OpCode::try_from_u8((i & 0x3f) as u8)
}

fn check_arg(f: &Proto, mode: OpArgMask, v: u32) -> bool {
    match mode {
        OpArgMask::N => v == 0,
        OpArgMask::U => true,
        OpArgMask::R => check_reg(f, v),
        OpArgMask::K => check_rk(f, v),
    }
}

/// Structural check of one prototype: every operand in range, jumps
/// inside the code, tests followed by jumps, closure pseudo-instructions
/// well formed, and a final RETURN
pub(crate) fn check_code(f: &Proto) -> bool {
    let size = f.code.len();
    if f.max_stack_size as usize > MAXSTACK {
        return false;
    }
    let needs_arg = if f.is_vararg & VARARG_HASARG != 0 { 1 } else { 0 };
    if (f.num_params as usize + needs_arg) > f.max_stack_size as usize {
        return false;
    }
    if f.is_vararg & VARARG_NEEDSARG != 0 && f.is_vararg & VARARG_ISVARARG == 0 {
        return false;
    }
    if f.upvalue_names.len() > f.num_upvalues as usize {
        return false;
    }
    if !(f.line_info.is_empty() || f.line_info.len() == size) {
        return false;
    }
    if size == 0 || op_at(f, size - 1) != Some(OpCode::Return) {
        return false;
    }

    // slots that hold data rather than instructions, never to be jumped into
    let mut pseudo = vec![false; size];
    let mut pc = 0;
    while pc < size {
        let i = f.code[pc];
        let Some(op) = op_at(f, pc) else {
            return false;
        };
        let a = Instruction::get_a(i);
        let a_is_reg = !matches!(
            op,
            OpCode::Eq | OpCode::Lt | OpCode::Le | OpCode::Jmp | OpCode::Close | OpCode::Return
        );
        if a_is_reg && !check_reg(f, a) {
            return false;
        }
        match op.get_mode() {
            OpMode::IABC => {
                if !check_arg(f, op.get_b_mode(), Instruction::get_b(i))
                    || !check_arg(f, op.get_c_mode(), Instruction::get_c(i))
                {
                    return false;
                }
            }
            OpMode::IABx => {
                if op.get_b_mode() == OpArgMask::K
                    && Instruction::get_bx(i) as usize >= f.constants.len()
                {
                    return false;
                }
            }
            OpMode::IAsBx => {
                let target = pc as i64 + 1 + Instruction::get_sbx(i) as i64;
                if target < 0 || target as usize >= size {
                    return false;
                }
            }
        }
        if op.is_test() && op_at(f, pc + 1) != Some(OpCode::Jmp) {
            return false;
        }

        match op {
            OpCode::LoadBool => {
                if Instruction::get_c(i) != 0 && pc + 2 >= size {
                    return false;
                }
            }
            OpCode::LoadNil => {
                if Instruction::get_b(i) < a {
                    return false;
                }
            }
            OpCode::GetUpval | OpCode::SetUpval => {
                if Instruction::get_b(i) >= f.num_upvalues as u32 {
                    return false;
                }
            }
            OpCode::GetGlobal | OpCode::SetGlobal => {
                if !f.constants[Instruction::get_bx(i) as usize].is_string() {
                    return false;
                }
            }
            OpCode::Self_ => {
                if !check_reg(f, a + 1) {
                    return false;
                }
            }
            OpCode::Concat => {
                if Instruction::get_b(i) >= Instruction::get_c(i) {
                    return false;
                }
            }
            OpCode::TForLoop => {
                if Instruction::get_c(i) < 1 || !check_reg(f, a + 2 + Instruction::get_c(i)) {
                    return false;
                }
            }
            OpCode::ForLoop | OpCode::ForPrep => {
                if !check_reg(f, a + 3) {
                    return false;
                }
            }
            OpCode::Call | OpCode::TailCall => {
                let b = Instruction::get_b(i);
                if b != 0 && !check_reg(f, a + b - 1) {
                    return false;
                }
                let c = Instruction::get_c(i);
                if c > 1 && !check_reg(f, a + c - 2) {
                    return false;
                }
            }
            OpCode::Return => {
                let b = Instruction::get_b(i);
                if b > 1 && !check_reg(f, a + b - 2) {
                    return false;
                }
            }
            OpCode::SetList => {
                let b = Instruction::get_b(i);
                if b > 0 && !check_reg(f, a + b) {
                    return false;
                }
                if Instruction::get_c(i) == 0 {
                    if pc + 1 >= size {
                        return false;
                    }
                    pc += 1;
                    pseudo[pc] = true;
                }
            }
            OpCode::Closure => {
                let bx = Instruction::get_bx(i) as usize;
                let Some(child) = f.protos.get(bx) else {
                    return false;
                };
                let nup = child.num_upvalues as usize;
                if pc + nup >= size {
                    return false;
                }
                for j in 1..=nup {
                    let pi = f.code[pc + j];
                    let b = Instruction::get_b(pi);
                    let ok = match op_at(f, pc + j) {
                        Some(OpCode::Move) => check_reg(f, b),
                        Some(OpCode::GetUpval) => b < f.num_upvalues as u32,
                        _ => false,
                    };
                    if !ok {
                        return false;
                    }
                    pseudo[pc + j] = true;
                }
                pc += nup;
            }
            OpCode::VarArg => {
                if f.is_vararg & VARARG_ISVARARG == 0 {
                    return false;
                }
                let b = Instruction::get_b(i);
                if b > 1 && !check_reg(f, a + b - 2) {
                    return false;
                }
            }
            _ => {}
        }
        pc += 1;
    }

    // no jump may land on a closure or SETLIST operand
    for (pc, &i) in f.code.iter().enumerate() {
        if pseudo[pc] {
            continue;
        }
        let op = Instruction::get_opcode(i);
        if op.get_mode() == OpMode::IAsBx {
            let target = (pc as i64 + 1 + Instruction::get_sbx(i) as i64) as usize;
            if pseudo[target] {
                return false;
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lua_vm::SafeOption;

    fn compile(vm: &mut LuaVM, src: &str) -> LuaValue {
        vm.load(src.as_bytes(), "=test").unwrap()
    }

    #[test]
    fn test_dump_starts_with_header() {
        let mut vm = LuaVM::new(SafeOption::default());
        let f = compile(&mut vm, "return 1");
        let bytes = vm.dump(&f, false).unwrap();
        assert_eq!(&bytes[..LUAC_HEADERSIZE], &header()[..]);
    }

    #[test]
    fn test_undump_rejects_bad_header() {
        let mut vm = LuaVM::new(SafeOption::default());
        let f = compile(&mut vm, "return 1");
        let mut bytes = vm.dump(&f, false).unwrap();
        bytes[7] = 8;
        let err = undump_proto(&mut vm, &bytes, "=x").unwrap_err();
        assert!(err.contains("bad header"));
    }

    #[test]
    fn test_undump_rejects_truncated_chunk() {
        let mut vm = LuaVM::new(SafeOption::default());
        let f = compile(&mut vm, "local a = 1 return a + 2");
        let bytes = vm.dump(&f, false).unwrap();
        let err = undump_proto(&mut vm, &bytes[..bytes.len() - 3], "=x").unwrap_err();
        assert!(err.contains("unexpected end"));
    }

    #[test]
    fn test_verifier_rejects_out_of_range_register() {
        let mut vm = LuaVM::new(SafeOption::default());
        let f = compile(&mut vm, "local a = 1 return a");
        let LuaValue::Function(id) = f else { panic!() };
        let proto = vm.pool[id].body.proto().unwrap().clone();
        assert!(check_code(&proto));

        let mut broken = (*proto).clone();
        broken.code[0] = Instruction::create_abx(OpCode::LoadK, 200, 0);
        assert!(!check_code(&broken));

        let mut broken = (*proto).clone();
        let last = broken.code.len() - 1;
        broken.code[last] = Instruction::create_asbx(OpCode::Jmp, 0, 10);
        assert!(!check_code(&broken));
    }

    #[test]
    fn test_stripped_chunk_has_no_debug_info() {
        let mut vm = LuaVM::new(SafeOption::default());
        let f = compile(&mut vm, "local x = 'k' return x");
        let full = vm.dump(&f, false).unwrap();
        let stripped = vm.dump(&f, true).unwrap();
        assert!(stripped.len() < full.len());
        let proto = undump_proto(&mut vm, &stripped, "=x").unwrap();
        assert!(proto.line_info.is_empty());
        assert!(proto.loc_vars.is_empty());
        assert_eq!(proto.source.as_str(), "=?");
    }
}
