// Basic library (_G global functions)
// Implements: assert, collectgarbage, dofile, error, gcinfo, getfenv,
// getmetatable, load, loadfile, loadstring, next, ipairs, pairs, pcall,
// print, rawequal, rawget, rawset, select, setfenv, setmetatable,
// tonumber, tostring, type, unpack, xpcall, newproxy

use std::io::{Read, Write};

use crate::lib_registry::{LibraryEntry, LibraryModule};
use crate::lua_value::number::number2str;
use crate::lua_value::{LuaType, LuaValue};
use crate::lua_vm::api::upvalue_index;
use crate::lua_vm::lua_limits::LUA_MULTRET;
use crate::lua_vm::{GcOp, LuaError, LuaResult, LuaVM, ThreadStatus};

pub fn create_basic_lib() -> LibraryModule {
    let mut module = LibraryModule::new("_G");

    // Functions
    module.entries.push(("assert", LibraryEntry::Function(lua_assert)));
    module.entries.push(("collectgarbage", LibraryEntry::Function(lua_collectgarbage)));
    module.entries.push(("dofile", LibraryEntry::Function(lua_dofile)));
    module.entries.push(("error", LibraryEntry::Function(lua_error)));
    module.entries.push(("gcinfo", LibraryEntry::Function(lua_gcinfo)));
    module.entries.push(("getfenv", LibraryEntry::Function(lua_getfenv)));
    module.entries.push(("getmetatable", LibraryEntry::Function(lua_getmetatable)));
    module.entries.push(("loadfile", LibraryEntry::Function(lua_loadfile)));
    module.entries.push(("load", LibraryEntry::Function(lua_load)));
    module.entries.push(("loadstring", LibraryEntry::Function(lua_loadstring)));
    module.entries.push(("next", LibraryEntry::Function(lua_next)));
    module.entries.push(("pcall", LibraryEntry::Function(lua_pcall)));
    module.entries.push(("print", LibraryEntry::Function(lua_print)));
    module.entries.push(("rawequal", LibraryEntry::Function(lua_rawequal)));
    module.entries.push(("rawget", LibraryEntry::Function(lua_rawget)));
    module.entries.push(("rawset", LibraryEntry::Function(lua_rawset)));
    module.entries.push(("select", LibraryEntry::Function(lua_select)));
    module.entries.push(("setfenv", LibraryEntry::Function(lua_setfenv)));
    module.entries.push(("setmetatable", LibraryEntry::Function(lua_setmetatable)));
    module.entries.push(("tonumber", LibraryEntry::Function(lua_tonumber)));
    module.entries.push(("tostring", LibraryEntry::Function(lua_tostring)));
    module.entries.push(("type", LibraryEntry::Function(lua_type)));
    module.entries.push(("unpack", LibraryEntry::Function(lua_unpack)));
    module.entries.push(("xpcall", LibraryEntry::Function(lua_xpcall)));

    // Functions holding upvalues
    module.entries.push(("ipairs", LibraryEntry::Value(ipairs_init)));
    module.entries.push(("pairs", LibraryEntry::Value(pairs_init)));
    module.entries.push(("newproxy", LibraryEntry::Value(newproxy_init)));

    // Values
    module.entries.push(("_G", LibraryEntry::Value(|vm| LuaValue::Table(vm.globals()))));
    module.entries.push(("_VERSION", LibraryEntry::Value(|vm| vm.create_string("Lua 5.1"))));

    module
}

/// print(...) - Write the `tostring` of every argument to stdout
fn lua_print(vm: &mut LuaVM) -> LuaResult<usize> {
    let n = vm.arg_count();
    let tostring = vm.get_global("tostring");
    let mut out = Vec::new();
    for i in 1..=n {
        let v = vm.index2value(i as i32);
        vm.push(tostring);
        vm.push(v);
        vm.call_at(1, 1)?;
        let Some(s) = vm.to_string_id(-1) else {
            return Err(vm.error("'tostring' must return a string to 'print'"));
        };
        if i > 1 {
            out.push(b'\t');
        }
        out.extend_from_slice(vm.string_bytes(s));
        vm.pop(1);
    }
    out.push(b'\n');
    let mut stdout = std::io::stdout().lock();
    if let Err(e) = stdout.write_all(&out).and_then(|_| stdout.flush()) {
        tracing::warn!(error = %e, "print failed to write to stdout");
    }
    Ok(0)
}

/// type(v) - Name of the type of `v`
fn lua_type(vm: &mut LuaVM) -> LuaResult<usize> {
    let v = vm.check_any(1)?;
    vm.push_string(v.type_name());
    Ok(1)
}

/// assert(v [, message]) - Raise an error when `v` is false, else return all arguments
fn lua_assert(vm: &mut LuaVM) -> LuaResult<usize> {
    let v = vm.check_any(1)?;
    if v.is_falsy() {
        let msg = vm.opt_string(2, "assertion failed!")?;
        return Err(vm.error(msg));
    }
    Ok(vm.arg_count())
}

/// error(message [, level]) - Raise `message`, prefixed with the position
/// of the function at `level` when it is a string
fn lua_error(vm: &mut LuaVM) -> LuaResult<usize> {
    let level = vm.opt_integer(2, 1)?;
    vm.set_top(1);
    let msg = vm.index2value(1);
    if let LuaValue::String(s) = msg
        && level > 0
    {
        let mut text = vm.where_(level as usize).into_bytes();
        text.extend_from_slice(vm.string_bytes(s));
        let v = vm.create_bytes(&text);
        return Err(vm.throw(v));
    }
    Err(vm.throw(msg))
}

/// tonumber(e [, base]) - Convert to a number, `nil` when not convertible
fn lua_tonumber(vm: &mut LuaVM) -> LuaResult<usize> {
    let base = vm.opt_integer(2, 10)?;
    if base == 10 {
        let v = vm.check_any(1)?;
        match vm.to_number(&v) {
            Some(n) => vm.push_number(n),
            None => vm.push_nil(),
        }
        return Ok(1);
    }
    let s = vm.check_string_id(1)?;
    if !(2..=36).contains(&base) {
        return Err(vm.arg_error(2, "base out of range"));
    }
    match parse_int_base(vm.string_bytes(s), base as u32) {
        Some(n) => vm.push_number(n),
        None => vm.push_nil(),
    }
    Ok(1)
}

/// Whole-string integer numeral in `base`, surrounded by optional spaces
fn parse_int_base(s: &[u8], base: u32) -> Option<f64> {
    let text = std::str::from_utf8(s).ok()?.trim();
    let (negative, digits) = match text.as_bytes().first() {
        Some(b'-') => (true, &text[1..]),
        Some(b'+') => (false, &text[1..]),
        _ => (false, text),
    };
    if digits.is_empty() {
        return None;
    }
    let mut n = 0.0;
    for c in digits.chars() {
        n = n * base as f64 + c.to_digit(base)? as f64;
    }
    Some(if negative { -n } else { n })
}

/// tostring(v) - Convert to a string, honouring `__tostring`
fn lua_tostring(vm: &mut LuaVM) -> LuaResult<usize> {
    let v = vm.check_any(1)?;
    let s = tostring_value(vm, v)?;
    vm.push(s);
    Ok(1)
}

pub(crate) fn tostring_value(vm: &mut LuaVM, v: LuaValue) -> LuaResult<LuaValue> {
    if let Some(mt) = vm.get_metatable(&v) {
        let key = vm.create_string("__tostring");
        let tm = vm.raw_get(mt, &key);
        if !tm.is_nil() {
            vm.push(tm);
            vm.push(v);
            vm.call_at(1, 1)?;
            let res = vm.index2value(-1);
            vm.pop(1);
            return Ok(res);
        }
    }
    Ok(match v {
        LuaValue::String(_) => v,
        LuaValue::Number(n) => vm.create_string(&number2str(n)),
        LuaValue::Boolean(b) => vm.create_string(if b { "true" } else { "false" }),
        LuaValue::Nil => vm.create_string("nil"),
        other => {
            let text = format!("{}: 0x{:08x}", other.type_name(), object_address(&other));
            vm.create_string(&text)
        }
    })
}

/// Stable identity of a heap value while it is alive
fn object_address(v: &LuaValue) -> usize {
    let (index, generation) = match *v {
        LuaValue::Table(id) => (id.index, id.generation),
        LuaValue::Function(id) => (id.index, id.generation),
        LuaValue::Userdata(id) => (id.index, id.generation),
        LuaValue::Thread(id) => (id.index, id.generation),
        LuaValue::String(id) => (id.index, id.generation),
        LuaValue::LightUserdata(p) => return p,
        _ => return 0,
    };
    ((index as usize + 1) << 16) | (generation as usize & 0xffff)
}

/// select(n, ...) - Arguments after the `n`-th, or their count for `'#'`
fn lua_select(vm: &mut LuaVM) -> LuaResult<usize> {
    let n = vm.arg_count() as i64;
    if let Some(LuaValue::String(s)) = vm.get_arg(1)
        && vm.string_bytes(s).first() == Some(&b'#')
    {
        vm.push_number((n - 1) as f64);
        return Ok(1);
    }
    let mut i = vm.check_integer(1)?;
    if i < 0 {
        i += n;
    } else if i > n {
        i = n;
    }
    if i < 1 {
        return Err(vm.arg_error(1, "index out of range"));
    }
    Ok((n - i) as usize)
}

fn ipairs_init(vm: &mut LuaVM) -> LuaValue {
    let aux = vm.create_function(ipairs_aux);
    LuaValue::Function(vm.create_native_closure(lua_ipairs, vec![aux]))
}

/// ipairs(t) - Iterator over `t[1]`, `t[2]`, ... up to the first nil
fn lua_ipairs(vm: &mut LuaVM) -> LuaResult<usize> {
    vm.check_table(1)?;
    let aux = vm.index2value(upvalue_index(1));
    vm.push(aux);
    vm.push_value(1);
    vm.push_number(0.0);
    Ok(3)
}

fn ipairs_aux(vm: &mut LuaVM) -> LuaResult<usize> {
    let t = vm.check_table(1)?;
    let i = vm.check_integer(2)? + 1;
    let v = vm.raw_get_int(t, i);
    if v.is_nil() {
        return Ok(0);
    }
    vm.push_number(i as f64);
    vm.push(v);
    Ok(2)
}

fn pairs_init(vm: &mut LuaVM) -> LuaValue {
    let next = vm.create_function(lua_next);
    LuaValue::Function(vm.create_native_closure(lua_pairs, vec![next]))
}

/// pairs(t) - `next, t, nil`
fn lua_pairs(vm: &mut LuaVM) -> LuaResult<usize> {
    vm.check_table(1)?;
    let next = vm.index2value(upvalue_index(1));
    vm.push(next);
    vm.push_value(1);
    vm.push_nil();
    Ok(3)
}

/// next(t [, k]) - Entry following `k` in the traversal order of `t`
fn lua_next(vm: &mut LuaVM) -> LuaResult<usize> {
    let t = vm.check_table(1)?;
    vm.set_top(2);
    let key = vm.index2value(2);
    match vm.table_next(t, &key)? {
        Some((k, v)) => {
            vm.push(k);
            vm.push(v);
            Ok(2)
        }
        None => {
            vm.push_nil();
            Ok(1)
        }
    }
}

/// pcall(f, ...) - Call `f` in protected mode: `true, results...` or `false, error`
fn lua_pcall(vm: &mut LuaVM) -> LuaResult<usize> {
    vm.check_any(1)?;
    let nargs = vm.arg_count() - 1;
    let status = vm.pcall_at(nargs, LUA_MULTRET, 0);
    vm.push_boolean(status == ThreadStatus::Ok);
    vm.insert(1);
    Ok(vm.get_top())
}

/// xpcall(f, handler) - Like pcall, passing errors through `handler`
fn lua_xpcall(vm: &mut LuaVM) -> LuaResult<usize> {
    vm.check_any(2)?;
    vm.set_top(2);
    // handler goes below the function
    vm.insert(1);
    let status = vm.pcall_at(0, LUA_MULTRET, 1);
    vm.push_boolean(status == ThreadStatus::Ok);
    vm.replace(1)?;
    Ok(vm.get_top())
}

/// getmetatable(obj) - The metatable, or its `__metatable` field when set
fn lua_getmetatable(vm: &mut LuaVM) -> LuaResult<usize> {
    let v = vm.check_any(1)?;
    let Some(mt) = vm.get_metatable(&v) else {
        vm.push_nil();
        return Ok(1);
    };
    let key = vm.create_string("__metatable");
    let protected = vm.raw_get(mt, &key);
    if protected.is_nil() {
        vm.push(LuaValue::Table(mt));
    } else {
        vm.push(protected);
    }
    Ok(1)
}

/// setmetatable(t, mt) - Set (or with nil, remove) the metatable of a table
fn lua_setmetatable(vm: &mut LuaVM) -> LuaResult<usize> {
    let t = vm.check_table(1)?;
    let mt = match vm.get_arg(2) {
        Some(LuaValue::Nil) => None,
        Some(LuaValue::Table(mt)) => Some(mt),
        _ => return Err(vm.arg_error(2, "nil or table expected")),
    };
    if let Some(old) = vm.get_metatable(&LuaValue::Table(t)) {
        let key = vm.create_string("__metatable");
        if !vm.raw_get(old, &key).is_nil() {
            return Err(vm.error("cannot change a protected metatable"));
        }
    }
    vm.set_table_metatable(t, mt);
    vm.set_top(1);
    Ok(1)
}

/// Function named by argument 1: a function, or a stack level counted
/// from the caller. `None` stands for level 0, the thread globals.
fn get_func(vm: &mut LuaVM, optional: bool) -> LuaResult<Option<LuaValue>> {
    let v = vm.get_arg(1).unwrap_or_default();
    if v.is_function() {
        return Ok(Some(v));
    }
    let level = if optional {
        vm.opt_integer(1, 1)?
    } else {
        vm.check_integer(1)?
    };
    if level < 0 {
        return Err(vm.arg_error(1, "level must be non-negative"));
    }
    if level == 0 {
        return Ok(None);
    }
    match vm.function_at(level as usize) {
        Some(f) => Ok(Some(f)),
        None => Err(vm.arg_error(1, "invalid level")),
    }
}

/// getfenv([f]) - Environment of a function or stack level
fn lua_getfenv(vm: &mut LuaVM) -> LuaResult<usize> {
    let env = match get_func(vm, true)? {
        Some(LuaValue::Function(f)) => vm.function_env(f),
        _ => vm.globals(),
    };
    vm.push(LuaValue::Table(env));
    Ok(1)
}

/// setfenv(f, table) - Set the environment of a function or stack level
fn lua_setfenv(vm: &mut LuaVM) -> LuaResult<usize> {
    let t = vm.check_table(2)?;
    match get_func(vm, false)? {
        None => {
            vm.state.globals = t;
            Ok(0)
        }
        Some(f @ LuaValue::Function(id)) => {
            if !vm.set_function_env(id, t) {
                return Err(vm.error("'setfenv' cannot change environment of given object"));
            }
            vm.push(f);
            Ok(1)
        }
        _ => Err(vm.error("'setfenv' cannot change environment of given object")),
    }
}

fn lua_rawequal(vm: &mut LuaVM) -> LuaResult<usize> {
    let a = vm.check_any(1)?;
    let b = vm.check_any(2)?;
    vm.push_boolean(a == b);
    Ok(1)
}

fn lua_rawget(vm: &mut LuaVM) -> LuaResult<usize> {
    let t = vm.check_table(1)?;
    let key = vm.check_any(2)?;
    let v = vm.raw_get(t, &key);
    vm.push(v);
    Ok(1)
}

fn lua_rawset(vm: &mut LuaVM) -> LuaResult<usize> {
    let t = vm.check_table(1)?;
    let key = vm.check_any(2)?;
    let v = vm.check_any(3)?;
    vm.raw_set(t, key, v)?;
    vm.set_top(1);
    Ok(1)
}

/// unpack(t [, i [, j]]) - `t[i], ..., t[j]`
fn lua_unpack(vm: &mut LuaVM) -> LuaResult<usize> {
    let t = vm.check_table(1)?;
    let i = vm.opt_integer(2, 1)?;
    let e = if vm.is_none_or_nil(3) {
        vm.pool[t].table.length() as i64
    } else {
        vm.check_integer(3)?
    };
    if i > e {
        return Ok(0);
    }
    let n = e - i + 1;
    if n <= 0 || n >= i32::MAX as i64 || vm.check_stack(n as usize).is_err() {
        return Err(vm.error("too many results to unpack"));
    }
    for k in i..=e {
        let v = vm.raw_get_int(t, k);
        vm.push(v);
    }
    Ok(n as usize)
}

/// collectgarbage([opt [, arg]]) - Collector control
fn lua_collectgarbage(vm: &mut LuaVM) -> LuaResult<usize> {
    let opt = vm.opt_string(1, "collect")?;
    let data = vm.opt_integer(2, 0)?;
    let op = match opt.as_str() {
        "stop" => GcOp::Stop,
        "restart" => GcOp::Restart,
        "collect" => GcOp::Collect,
        "count" => GcOp::Count,
        "step" => GcOp::Step,
        "setpause" => GcOp::SetPause,
        "setstepmul" => GcOp::SetStepMul,
        _ => return Err(vm.arg_error(1, &format!("invalid option '{}'", opt))),
    };
    let res = vm.gc_control(op, data.max(0) as usize)?;
    match op {
        GcOp::Count => {
            let bytes = vm.gc_control(GcOp::CountBytes, 0)?;
            vm.push_number(res as f64 + bytes as f64 / 1024.0);
        }
        GcOp::Step => vm.push_boolean(res != 0),
        _ => vm.push_number(res as f64),
    }
    Ok(1)
}

/// gcinfo() - Kilobytes in use
fn lua_gcinfo(vm: &mut LuaVM) -> LuaResult<usize> {
    let kb = vm.gc_control(GcOp::Count, 0)?;
    vm.push_number(kb as f64);
    Ok(1)
}

/// Push the loaded function, or `nil` and the message
fn load_aux(vm: &mut LuaVM, chunk: &[u8], chunkname: &str) -> LuaResult<usize> {
    match vm.load_chunk(chunk, chunkname) {
        Ok(f) => {
            vm.push(f);
            Ok(1)
        }
        Err(LuaError::SyntaxError) | Err(LuaError::MemoryError) => {
            let msg = vm.error_object;
            vm.push_nil();
            vm.push(msg);
            Ok(2)
        }
        Err(e) => Err(e),
    }
}

/// loadstring(s [, chunkname])
fn lua_loadstring(vm: &mut LuaVM) -> LuaResult<usize> {
    let s = vm.check_string_id(1)?;
    let chunk = vm.string_bytes(s).to_vec();
    let default_name = String::from_utf8_lossy(&chunk).into_owned();
    let chunkname = vm.opt_string(2, &default_name)?;
    load_aux(vm, &chunk, &chunkname)
}

/// load(func [, chunkname]) - Load a chunk whose pieces come from
/// repeated calls to `func`, until it returns nil or an empty string
fn lua_load(vm: &mut LuaVM) -> LuaResult<usize> {
    let reader = vm.check_type(1, LuaType::Function)?;
    let chunkname = vm.opt_string(2, "=(load)")?;
    let mut chunk = Vec::new();
    loop {
        vm.push(reader);
        if vm.pcall_at(0, 1, 0) != ThreadStatus::Ok {
            let msg = vm.index2value(-1);
            vm.pop(1);
            vm.push_nil();
            vm.push(msg);
            return Ok(2);
        }
        let piece = vm.index2value(-1);
        vm.pop(1);
        match piece {
            LuaValue::Nil => break,
            LuaValue::String(s) => {
                let bytes = vm.string_bytes(s);
                if bytes.is_empty() {
                    break;
                }
                chunk.extend_from_slice(bytes);
            }
            _ => {
                vm.push_nil();
                vm.push_string("reader function must return a string");
                return Ok(2);
            }
        }
    }
    load_aux(vm, &chunk, &chunkname)
}

/// Load a file, or stdin when `fname` is `None`
fn load_file(vm: &mut LuaVM, fname: Option<&str>) -> LuaResult<usize> {
    let (chunkname, data) = match fname {
        Some(name) => (format!("@{}", name), std::fs::read(name)),
        None => {
            let mut buf = Vec::new();
            let res = std::io::stdin().read_to_end(&mut buf).map(|_| buf);
            ("=stdin".to_string(), res)
        }
    };
    match data {
        Ok(data) => load_aux(vm, &data, &chunkname),
        Err(e) => {
            let msg = format!("cannot read {}: {}", fname.unwrap_or("stdin"), e);
            vm.push_nil();
            vm.push_string(&msg);
            Ok(2)
        }
    }
}

/// loadfile([filename])
fn lua_loadfile(vm: &mut LuaVM) -> LuaResult<usize> {
    let fname = optional_name(vm)?;
    load_file(vm, fname.as_deref())
}

/// dofile([filename]) - Run a file, propagating its errors and results
fn lua_dofile(vm: &mut LuaVM) -> LuaResult<usize> {
    let fname = optional_name(vm)?;
    let n = vm.get_top();
    if load_file(vm, fname.as_deref())? == 2 {
        return Err(vm.raise_error());
    }
    vm.call_at(0, LUA_MULTRET)?;
    Ok(vm.get_top() - n)
}

fn optional_name(vm: &mut LuaVM) -> LuaResult<Option<String>> {
    if vm.is_none_or_nil(1) {
        Ok(None)
    } else {
        vm.check_string(1).map(Some)
    }
}

fn newproxy_init(vm: &mut LuaVM) -> LuaValue {
    // metatables created by newproxy(true), as weak keys
    let proxies = vm.create_table(0, 1);
    let mt = vm.create_table(0, 1);
    let mode = vm.create_string("__mode");
    let keys = vm.create_string("k");
    if vm.raw_set(mt, mode, keys).is_ok() {
        vm.set_table_metatable(proxies, Some(mt));
    }
    let proxies = LuaValue::Table(proxies);
    LuaValue::Function(vm.create_native_closure(lua_newproxy, vec![proxies]))
}

/// newproxy([true | proxy]) - Empty userdata, optionally with a fresh
/// metatable or sharing the metatable of another proxy
fn lua_newproxy(vm: &mut LuaVM) -> LuaResult<usize> {
    vm.set_top(1);
    let arg = vm.index2value(1);
    let LuaValue::Table(proxies) = vm.index2value(upvalue_index(1)) else {
        return Err(vm.error("newproxy: proxy table lost"));
    };
    let ud = vm.create_userdata(Box::new(()));
    vm.push(LuaValue::Userdata(ud));
    if arg.is_falsy() {
        return Ok(1);
    }
    let mt = if arg == LuaValue::Boolean(true) {
        let mt = vm.create_table(0, 0);
        vm.raw_set(proxies, LuaValue::Table(mt), LuaValue::Boolean(true))?;
        mt
    } else {
        let valid = vm
            .get_metatable(&arg)
            .filter(|mt| vm.raw_get(proxies, &LuaValue::Table(*mt)).is_truthy());
        match valid {
            Some(mt) => mt,
            None => return Err(vm.arg_error(1, "boolean or proxy expected")),
        }
    };
    vm.set_userdata_metatable(ud, Some(mt));
    Ok(1)
}
