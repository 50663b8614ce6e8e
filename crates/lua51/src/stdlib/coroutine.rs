// Coroutine library
// Implements: create, resume, yield, status, wrap, running

use crate::gc::ThreadId;
use crate::lib_module;
use crate::lib_registry::LibraryModule;
use crate::lua_value::LuaValue;
use crate::lua_vm::api::upvalue_index;
use crate::lua_vm::{LuaResult, LuaVM, ThreadStatus};

pub fn create_coroutine_lib() -> LibraryModule {
    lib_module!("coroutine", {
        "create" => coroutine_create,
        "resume" => coroutine_resume,
        "yield" => coroutine_yield,
        "status" => coroutine_status,
        "wrap" => coroutine_wrap,
        "running" => coroutine_running,
    })
}

fn check_coroutine(vm: &mut LuaVM, n: usize) -> LuaResult<ThreadId> {
    match vm.get_arg(n) {
        Some(LuaValue::Thread(co)) => Ok(co),
        _ => Err(vm.arg_error(n, "coroutine expected")),
    }
}

/// coroutine.create(f) - New suspended coroutine running `f`
fn coroutine_create(vm: &mut LuaVM) -> LuaResult<usize> {
    let f = match vm.get_arg(1) {
        Some(f @ LuaValue::Function(id)) if !vm.pool[id].body.is_native() => f,
        _ => return Err(vm.arg_error(1, "Lua function expected")),
    };
    let co = vm.new_thread();
    if let Some(state) = vm.pool[co].state.as_mut() {
        state.push(f);
    }
    vm.push(LuaValue::Thread(co));
    Ok(1)
}

/// coroutine.resume(co, ...) - `true, values...` or `false, error`
fn coroutine_resume(vm: &mut LuaVM) -> LuaResult<usize> {
    let co = check_coroutine(vm, 1)?;
    let nargs = vm.arg_count() - 1;
    let (status, n) = vm.resume(co, nargs);
    match status {
        ThreadStatus::Ok | ThreadStatus::Yield => {
            vm.push_boolean(true);
            vm.insert(-(n as i32) - 1);
            Ok(n + 1)
        }
        _ => {
            vm.push_boolean(false);
            vm.insert(-2);
            Ok(2)
        }
    }
}

/// coroutine.yield(...) - Suspend the running coroutine
fn coroutine_yield(vm: &mut LuaVM) -> LuaResult<usize> {
    let n = vm.arg_count();
    Err(vm.yield_values(n))
}

/// coroutine.status(co) - "running", "suspended", "normal" or "dead"
fn coroutine_status(vm: &mut LuaVM) -> LuaResult<usize> {
    let co = check_coroutine(vm, 1)?;
    let status = vm.co_status(co);
    vm.push_string(status.name());
    Ok(1)
}

/// coroutine.running() - The running coroutine, nil on the main thread
fn coroutine_running(vm: &mut LuaVM) -> LuaResult<usize> {
    match vm.running_coroutine() {
        Some(co) => vm.push(LuaValue::Thread(co)),
        None => vm.push_nil(),
    }
    Ok(1)
}

/// coroutine.wrap(f) - Function resuming a new coroutine on each call
fn coroutine_wrap(vm: &mut LuaVM) -> LuaResult<usize> {
    coroutine_create(vm)?;
    vm.push_closure(auxwrap, 1);
    Ok(1)
}

fn auxwrap(vm: &mut LuaVM) -> LuaResult<usize> {
    let LuaValue::Thread(co) = vm.index2value(upvalue_index(1)) else {
        return Err(vm.error("cannot resume non-suspended coroutine"));
    };
    let nargs = vm.arg_count();
    let (status, n) = vm.resume(co, nargs);
    match status {
        ThreadStatus::Ok | ThreadStatus::Yield => Ok(n),
        _ => {
            let err = vm.index2value(-1);
            vm.pop(1);
            let err = match err {
                LuaValue::String(_) | LuaValue::Number(_) => {
                    let mut text = vm.where_(1).into_bytes();
                    match vm.to_str(&err) {
                        Some(s) => text.extend_from_slice(s.as_bytes()),
                        None => text.extend_from_slice(b"?"),
                    }
                    vm.create_bytes(&text)
                }
                other => other,
            };
            Err(vm.throw(err))
        }
    }
}
