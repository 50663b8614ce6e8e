/*----------------------------------------------------------------------
  Lua 5.1 VM Execution Engine

  - Single dispatch loop: Lua-to-Lua calls and returns switch frames by
    jumping back to 'startfunc, so Lua recursion costs no Rust stack
  - Native functions and metamethods re-enter through `LuaVM::call`,
    which runs a nested loop that stops at its own depth
  - Registers are addressed as `base + n` in a grow-only stack, so no
    pointer is ever invalidated by a call

  Frame invariant: while a Lua frame runs, `stack_top == ci.top` except
  in the window between an instruction that leaves a variable number of
  values (CALL with C == 0, VARARG with B == 0) and the instruction that
  consumes them.
----------------------------------------------------------------------*/

pub mod call;
mod concat;
mod metamethod;

use call::PreCall;

use crate::gc::{FunctionId, UpvalueId};
use crate::lua_value::number::fb2int;
use crate::lua_value::{FunctionBody, LuaValue, Proto};
use crate::lua_vm::debug::{HookMask, trace_exec};
use crate::lua_vm::lua_limits::{LFIELDS_PER_FLUSH, LUA_MULTRET};
use crate::lua_vm::opcode::{Instruction, OpCode};
use crate::lua_vm::{LuaResult, LuaVM, call_status};

pub(crate) use metamethod::arith_op;
pub use metamethod::{TM_N, TmKind};

use std::rc::Rc;

/// Prototype and closure running in the given frame
fn frame_closure(vm: &LuaVM, func: usize) -> Option<(FunctionId, Rc<Proto>)> {
    let LuaValue::Function(id) = vm.state.stack[func] else {
        return None;
    };
    match &vm.pool[id].body {
        FunctionBody::Lua { proto, .. } => Some((id, proto.clone())),
        FunctionBody::Native { .. } => None,
    }
}

#[inline]
fn closure_upvalue(vm: &LuaVM, f: FunctionId, n: usize) -> Option<UpvalueId> {
    match &vm.pool[f].body {
        FunctionBody::Lua { upvalues, .. } => upvalues.get(n).copied(),
        FunctionBody::Native { .. } => None,
    }
}

/// Execute until the call stack is back to `stop_depth` frames
pub fn execute(vm: &mut LuaVM, stop_depth: usize) -> LuaResult<()> {
    'startfunc: loop {
        let depth = vm.state.call_depth();
        if depth <= stop_depth {
            return Ok(());
        }
        let ci_index = depth - 1;
        let ci = vm.state.call_stack[ci_index];
        let Some((cl, proto)) = frame_closure(vm, ci.func) else {
            return Err(vm.runtime_error("attempt to execute a non-Lua frame"));
        };
        let base = ci.base;
        let mut pc = ci.saved_pc;
        let code = &proto.code;
        let k = &proto.constants;

        macro_rules! save_pc {
            () => {
                vm.state.call_stack[ci_index].saved_pc = pc;
            };
        }

        macro_rules! reg {
            ($n:expr) => {
                vm.state.stack[base + $n as usize]
            };
        }

        macro_rules! rk {
            ($x:expr) => {
                if Instruction::is_k($x) {
                    k[Instruction::index_k($x)]
                } else {
                    vm.state.stack[base + $x as usize]
                }
            };
        }

        // register slot of an RK operand, for error messages
        macro_rules! rk_slot {
            ($x:expr) => {
                if Instruction::is_k($x) {
                    None
                } else {
                    Some(base + $x as usize)
                }
            };
        }

        // the jump stored in the instruction after a test
        macro_rules! skip_or_jump {
            ($taken:expr) => {
                if $taken {
                    let next = code[pc];
                    pc = (pc as i64 + 1 + Instruction::get_sbx(next) as i64) as usize;
                } else {
                    pc += 1;
                }
            };
        }

        macro_rules! arith {
            ($i:expr, $tm:expr) => {{
                let a = Instruction::get_a($i);
                let b = Instruction::get_b($i);
                let c = Instruction::get_c($i);
                let rb = rk!(b);
                let rc = rk!(c);
                let v = match (rb, rc) {
                    (LuaValue::Number(x), LuaValue::Number(y)) => {
                        LuaValue::Number(arith_op($tm, x, y))
                    }
                    _ => {
                        save_pc!();
                        vm.arith($tm, rb, rc, rk_slot!(b), rk_slot!(c))?
                    }
                };
                reg!(a) = v;
            }};
        }

        loop {
            let i = code[pc];
            pc += 1;

            if vm.state.hook_mask & (HookMask::LINE | HookMask::COUNT) != 0 {
                let mask = vm.state.hook_mask;
                let mut fire = mask & HookMask::LINE != 0;
                if mask & HookMask::COUNT != 0 {
                    vm.state.hook_count = vm.state.hook_count.saturating_sub(1);
                    fire |= vm.state.hook_count == 0;
                }
                if fire {
                    let old_pc = vm.state.call_stack[ci_index].saved_pc;
                    save_pc!();
                    trace_exec(vm, old_pc, pc)?;
                }
            }

            match Instruction::get_opcode(i) {
                OpCode::Move => {
                    // R(A) := R(B)
                    let b = Instruction::get_b(i);
                    reg!(Instruction::get_a(i)) = reg!(b);
                }
                OpCode::LoadK => {
                    // R(A) := K(Bx)
                    reg!(Instruction::get_a(i)) = k[Instruction::get_bx(i) as usize];
                }
                OpCode::LoadBool => {
                    // R(A) := (Bool)B; if (C) pc++
                    reg!(Instruction::get_a(i)) = LuaValue::Boolean(Instruction::get_b(i) != 0);
                    if Instruction::get_c(i) != 0 {
                        pc += 1;
                    }
                }
                OpCode::LoadNil => {
                    // R(A) := ... := R(B) := nil
                    let a = Instruction::get_a(i) as usize;
                    let b = Instruction::get_b(i) as usize;
                    for r in a..=b {
                        reg!(r) = LuaValue::Nil;
                    }
                }
                OpCode::GetUpval => {
                    // R(A) := UpValue[B]
                    let v = match closure_upvalue(vm, cl, Instruction::get_b(i) as usize) {
                        Some(uv) => vm.get_upvalue(uv),
                        None => LuaValue::Nil,
                    };
                    reg!(Instruction::get_a(i)) = v;
                }
                OpCode::GetGlobal => {
                    // R(A) := Gbl[K(Bx)]
                    let key = k[Instruction::get_bx(i) as usize];
                    let env = LuaValue::Table(vm.pool[cl].env);
                    save_pc!();
                    let v = vm.get_table(env, key, None)?;
                    reg!(Instruction::get_a(i)) = v;
                }
                OpCode::GetTable => {
                    // R(A) := R(B)[RK(C)]
                    let b = Instruction::get_b(i);
                    let t = reg!(b);
                    let key = rk!(Instruction::get_c(i));
                    let v = match t {
                        LuaValue::Table(id) if vm.pool[id].table.metatable.is_none() => {
                            vm.pool[id].table.get(&key)
                        }
                        _ => {
                            save_pc!();
                            vm.get_table(t, key, Some(base + b as usize))?
                        }
                    };
                    reg!(Instruction::get_a(i)) = v;
                }
                OpCode::SetGlobal => {
                    // Gbl[K(Bx)] := R(A)
                    let key = k[Instruction::get_bx(i) as usize];
                    let env = LuaValue::Table(vm.pool[cl].env);
                    let v = reg!(Instruction::get_a(i));
                    save_pc!();
                    vm.set_table(env, key, v, None)?;
                }
                OpCode::SetUpval => {
                    // UpValue[B] := R(A)
                    let v = reg!(Instruction::get_a(i));
                    if let Some(uv) = closure_upvalue(vm, cl, Instruction::get_b(i) as usize) {
                        vm.set_upvalue(uv, v);
                    }
                }
                OpCode::SetTable => {
                    // R(A)[RK(B)] := RK(C)
                    let a = Instruction::get_a(i);
                    let t = reg!(a);
                    let key = rk!(Instruction::get_b(i));
                    let v = rk!(Instruction::get_c(i));
                    save_pc!();
                    vm.set_table(t, key, v, Some(base + a as usize))?;
                }
                OpCode::NewTable => {
                    // R(A) := {} (size = B,C)
                    let narr = fb2int(Instruction::get_b(i));
                    let nrec = fb2int(Instruction::get_c(i));
                    let t = vm.create_table(narr, nrec);
                    reg!(Instruction::get_a(i)) = LuaValue::Table(t);
                    save_pc!();
                    vm.state.stack_top = ci.top;
                    vm.check_gc()?;
                }
                OpCode::Self_ => {
                    // R(A+1) := R(B); R(A) := R(B)[RK(C)]
                    let a = Instruction::get_a(i) as usize;
                    let b = Instruction::get_b(i);
                    let obj = reg!(b);
                    let key = rk!(Instruction::get_c(i));
                    reg!(a + 1) = obj;
                    save_pc!();
                    let v = vm.get_table(obj, key, Some(base + b as usize))?;
                    reg!(a) = v;
                }
                OpCode::Add => arith!(i, TmKind::Add),
                OpCode::Sub => arith!(i, TmKind::Sub),
                OpCode::Mul => arith!(i, TmKind::Mul),
                OpCode::Div => arith!(i, TmKind::Div),
                OpCode::Mod => arith!(i, TmKind::Mod),
                OpCode::Pow => arith!(i, TmKind::Pow),
                OpCode::Unm => {
                    // R(A) := -R(B)
                    let b = Instruction::get_b(i);
                    let rb = reg!(b);
                    let v = match rb {
                        LuaValue::Number(n) => LuaValue::Number(-n),
                        _ => {
                            save_pc!();
                            let slot = Some(base + b as usize);
                            vm.arith(TmKind::Unm, rb, rb, slot, slot)?
                        }
                    };
                    reg!(Instruction::get_a(i)) = v;
                }
                OpCode::Not => {
                    // R(A) := not R(B)
                    let v = reg!(Instruction::get_b(i)).is_falsy();
                    reg!(Instruction::get_a(i)) = LuaValue::Boolean(v);
                }
                OpCode::Len => {
                    // R(A) := length of R(B)
                    let b = Instruction::get_b(i);
                    save_pc!();
                    let v = vm.obj_len(reg!(b), Some(base + b as usize))?;
                    reg!(Instruction::get_a(i)) = v;
                }
                OpCode::Concat => {
                    // R(A) := R(B).. ... ..R(C)
                    let b = Instruction::get_b(i) as usize;
                    let c = Instruction::get_c(i) as usize;
                    save_pc!();
                    vm.concat(c - b + 1, base + c)?;
                    vm.state.stack_top = ci.top;
                    vm.check_gc()?;
                    reg!(Instruction::get_a(i)) = reg!(b);
                }
                OpCode::Jmp => {
                    // pc += sBx
                    pc = (pc as i64 + Instruction::get_sbx(i) as i64) as usize;
                }
                OpCode::Eq => {
                    // if ((RK(B) == RK(C)) ~= A) then pc++
                    let rb = rk!(Instruction::get_b(i));
                    let rc = rk!(Instruction::get_c(i));
                    save_pc!();
                    let res = vm.equals(rb, rc)?;
                    skip_or_jump!(res == (Instruction::get_a(i) != 0));
                }
                OpCode::Lt => {
                    // if ((RK(B) < RK(C)) ~= A) then pc++
                    let rb = rk!(Instruction::get_b(i));
                    let rc = rk!(Instruction::get_c(i));
                    save_pc!();
                    let res = vm.less_than(rb, rc)?;
                    skip_or_jump!(res == (Instruction::get_a(i) != 0));
                }
                OpCode::Le => {
                    // if ((RK(B) <= RK(C)) ~= A) then pc++
                    let rb = rk!(Instruction::get_b(i));
                    let rc = rk!(Instruction::get_c(i));
                    save_pc!();
                    let res = vm.less_equal(rb, rc)?;
                    skip_or_jump!(res == (Instruction::get_a(i) != 0));
                }
                OpCode::Test => {
                    // if not (R(A) <=> C) then pc++
                    let ra = reg!(Instruction::get_a(i));
                    skip_or_jump!(ra.is_falsy() != (Instruction::get_c(i) != 0));
                }
                OpCode::TestSet => {
                    // if (R(B) <=> C) then R(A) := R(B) else pc++
                    let rb = reg!(Instruction::get_b(i));
                    let taken = rb.is_falsy() != (Instruction::get_c(i) != 0);
                    if taken {
                        reg!(Instruction::get_a(i)) = rb;
                    }
                    skip_or_jump!(taken);
                }
                OpCode::Call => {
                    // R(A), ... ,R(A+C-2) := R(A)(R(A+1), ... ,R(A+B-1))
                    let ra = base + Instruction::get_a(i) as usize;
                    let b = Instruction::get_b(i) as usize;
                    let nresults = Instruction::get_c(i) as i32 - 1;
                    if b != 0 {
                        vm.state.stack_top = ra + b;
                    }
                    save_pc!();
                    match vm.precall(ra, nresults)? {
                        PreCall::Lua => continue 'startfunc,
                        PreCall::Native => {
                            if nresults >= 0 {
                                vm.state.stack_top = ci.top;
                            }
                            vm.check_gc()?;
                        }
                    }
                }
                OpCode::TailCall => {
                    // return R(A)(R(A+1), ... ,R(A+B-1))
                    let ra = base + Instruction::get_a(i) as usize;
                    let b = Instruction::get_b(i) as usize;
                    if b != 0 {
                        vm.state.stack_top = ra + b;
                    }
                    save_pc!();
                    match vm.precall(ra, LUA_MULTRET)? {
                        PreCall::Lua => {
                            reuse_frame(vm, ci_index);
                            continue 'startfunc;
                        }
                        // results are on the stack; the RETURN that follows takes them
                        PreCall::Native => {}
                    }
                }
                OpCode::Return => {
                    // return R(A), ... ,R(A+B-2)
                    let ra = base + Instruction::get_a(i) as usize;
                    let b = Instruction::get_b(i) as usize;
                    if b != 0 {
                        vm.state.stack_top = ra + b - 1;
                    }
                    vm.close_upvalues(base);
                    save_pc!();
                    let fixed = vm.poscall(ra)?;
                    if vm.state.call_depth() <= stop_depth {
                        return Ok(());
                    }
                    if fixed {
                        vm.state.stack_top = vm.state.ci().top;
                    }
                    continue 'startfunc;
                }
                OpCode::ForLoop => {
                    // R(A) += R(A+2); if R(A) <?= R(A+1) then { pc += sBx; R(A+3) = R(A) }
                    let a = Instruction::get_a(i) as usize;
                    let step = reg!(a + 2).as_number().unwrap_or(0.0);
                    let idx = reg!(a).as_number().unwrap_or(0.0) + step;
                    let limit = reg!(a + 1).as_number().unwrap_or(0.0);
                    let continues = if step > 0.0 { idx <= limit } else { limit <= idx };
                    if continues {
                        pc = (pc as i64 + Instruction::get_sbx(i) as i64) as usize;
                        reg!(a) = LuaValue::Number(idx);
                        reg!(a + 3) = LuaValue::Number(idx);
                    }
                }
                OpCode::ForPrep => {
                    // R(A) -= R(A+2); pc += sBx
                    let a = Instruction::get_a(i) as usize;
                    save_pc!();
                    let Some(init) = vm.to_number(&reg!(a)) else {
                        return Err(vm.runtime_error("'for' initial value must be a number"));
                    };
                    let Some(limit) = vm.to_number(&reg!(a + 1)) else {
                        return Err(vm.runtime_error("'for' limit must be a number"));
                    };
                    let Some(step) = vm.to_number(&reg!(a + 2)) else {
                        return Err(vm.runtime_error("'for' step must be a number"));
                    };
                    reg!(a) = LuaValue::Number(init - step);
                    reg!(a + 1) = LuaValue::Number(limit);
                    reg!(a + 2) = LuaValue::Number(step);
                    pc = (pc as i64 + Instruction::get_sbx(i) as i64) as usize;
                }
                OpCode::TForLoop => {
                    // R(A+3), ... ,R(A+2+C) := R(A)(R(A+1), R(A+2))
                    // if R(A+3) ~= nil then R(A+2) = R(A+3) else pc++
                    let ra = base + Instruction::get_a(i) as usize;
                    let cb = ra + 3;
                    vm.state.stack[cb + 2] = vm.state.stack[ra + 2];
                    vm.state.stack[cb + 1] = vm.state.stack[ra + 1];
                    vm.state.stack[cb] = vm.state.stack[ra];
                    vm.state.stack_top = cb + 3;
                    save_pc!();
                    vm.call(cb, Instruction::get_c(i) as i32)?;
                    vm.state.stack_top = ci.top;
                    let first = vm.state.stack[cb];
                    if !first.is_nil() {
                        vm.state.stack[cb - 1] = first;
                    }
                    skip_or_jump!(!first.is_nil());
                }
                OpCode::SetList => {
                    // R(A)[(C-1)*FPF+i] := R(A+i), 1 <= i <= B
                    let ra = base + Instruction::get_a(i) as usize;
                    let mut n = Instruction::get_b(i) as usize;
                    let mut c = Instruction::get_c(i) as usize;
                    if n == 0 {
                        n = vm.state.stack_top - ra - 1;
                        vm.state.stack_top = ci.top;
                    }
                    if c == 0 {
                        c = code[pc] as usize;
                        pc += 1;
                    }
                    let LuaValue::Table(t) = vm.state.stack[ra] else {
                        save_pc!();
                        return Err(vm.runtime_error("SETLIST target is not a table"));
                    };
                    let last = (c - 1) * LFIELDS_PER_FLUSH + n;
                    vm.resize_array(t, last);
                    for j in 1..=n {
                        let v = vm.state.stack[ra + j];
                        let key = ((c - 1) * LFIELDS_PER_FLUSH + j) as i64;
                        vm.raw_set_int(t, key, v);
                    }
                }
                OpCode::Close => {
                    // close all variables in the stack up to (>=) R(A)
                    vm.close_upvalues(base + Instruction::get_a(i) as usize);
                }
                OpCode::Closure => {
                    // R(A) := closure(KPROTO[Bx], R(A), ... ,R(A+n))
                    let Some(p) = proto.protos.get(Instruction::get_bx(i) as usize).cloned() else {
                        save_pc!();
                        return Err(vm.runtime_error("bad function prototype index"));
                    };
                    let nup = p.num_upvalues as usize;
                    let mut upvalues = Vec::with_capacity(nup);
                    for _ in 0..nup {
                        let pseudo = code[pc];
                        pc += 1;
                        let b = Instruction::get_b(pseudo) as usize;
                        let uv = if Instruction::get_opcode(pseudo) == OpCode::GetUpval {
                            closure_upvalue(vm, cl, b)
                        } else {
                            Some(vm.find_upvalue(base + b))
                        };
                        if let Some(uv) = uv {
                            upvalues.push(uv);
                        }
                    }
                    let env = vm.pool[cl].env;
                    let f = vm.create_lua_closure(p, upvalues, env);
                    reg!(Instruction::get_a(i)) = LuaValue::Function(f);
                    save_pc!();
                    vm.state.stack_top = ci.top;
                    vm.check_gc()?;
                }
                OpCode::VarArg => {
                    // R(A), R(A+1), ..., R(A+B-1) = vararg
                    let ra = base + Instruction::get_a(i) as usize;
                    let wanted = Instruction::get_b(i) as i32 - 1;
                    let n = ci.base - ci.func - 1 - proto.num_params as usize;
                    let count = if wanted == LUA_MULTRET {
                        save_pc!();
                        vm.state.stack_top = ra;
                        vm.check_stack(n)?;
                        vm.state.stack_top = ra + n;
                        n
                    } else {
                        wanted as usize
                    };
                    for j in 0..count {
                        vm.state.stack[ra + j] = if j < n {
                            vm.state.stack[ci.base - n + j]
                        } else {
                            LuaValue::Nil
                        };
                    }
                }
            }
        }
    }
}

/// Tail call into a Lua function: slide the new frame down over the
/// caller's and drop the caller's activation record
fn reuse_frame(vm: &mut LuaVM, ci_index: usize) {
    let new_ci = vm.state.call_stack[ci_index + 1];
    let old_func = vm.state.call_stack[ci_index].func;
    let old_base = vm.state.call_stack[ci_index].base;
    vm.close_upvalues(old_base);

    let top = vm.state.stack_top;
    let pfunc = new_ci.func;
    vm.state.stack.copy_within(pfunc..top, old_func);
    let new_top = old_func + (top - pfunc);
    vm.state.stack_top = new_top;

    let ci = &mut vm.state.call_stack[ci_index];
    ci.base = old_func + (new_ci.base - pfunc);
    ci.top = new_top;
    ci.saved_pc = new_ci.saved_pc;
    ci.tailcalls += 1;
    ci.call_status |= call_status::CIST_TAIL;
    vm.state.call_stack.pop();
}
