// Tests for binary chunks loaded back through the public entry points
use crate::*;

fn new_vm() -> LuaVM {
    let mut vm = LuaVM::new(SafeOption::default());
    vm.open_stdlib(crate::stdlib::Stdlib::All).unwrap();
    vm
}

const PROGRAM: &str = r#"
    local n = ...
    local function fib(k) if k < 2 then return k end return fib(k - 1) + fib(k - 2) end
    local parts = {}
    for i = 1, n do parts[#parts + 1] = fib(i) end
    local function sum(...)
        local s = 0
        for _, v in ipairs({...}) do s = s + v end
        return s
    end
    return sum(unpack(parts)), "done", 0.1, 1e300, parts[n]
"#;

#[test]
fn test_binary_chunk_behaves_like_source() {
    let mut vm = new_vm();
    let f = vm.load(PROGRAM.as_bytes(), "=prog").unwrap();
    let bytes = vm.dump(&f, false).unwrap();
    assert_eq!(bytes[0], 0x1b);
    assert_eq!(&bytes[1..4], b"Lua");

    let g = vm.load(&bytes, "=bin").unwrap();
    let arg = LuaValue::Number(10.0);
    let expected = vm.call_function(f, &[arg]).unwrap();
    let actual = vm.call_function(g, &[arg]).unwrap();
    assert_eq!(expected.len(), 5);
    assert_eq!(expected[0], LuaValue::Number(143.0));
    assert_eq!(actual[0], expected[0]);
    assert_eq!(vm.to_str(&actual[1]).as_deref(), Some("done"));
    assert_eq!(actual[2], LuaValue::Number(0.1));
    assert_eq!(actual[3], LuaValue::Number(1e300));
    assert_eq!(actual[4], LuaValue::Number(55.0));
}

#[test]
fn test_stripped_chunk_still_runs() {
    let mut vm = new_vm();
    let f = vm.load(PROGRAM.as_bytes(), "=prog").unwrap();
    let full = vm.dump(&f, false).unwrap();
    let stripped = vm.dump(&f, true).unwrap();
    assert!(stripped.len() < full.len());
    let g = vm.load(&stripped, "=stripped").unwrap();
    let results = vm.call_function(g, &[LuaValue::Number(5.0)]).unwrap();
    assert_eq!(results[0], LuaValue::Number(12.0));
}

#[test]
fn test_loadstring_accepts_binary_chunks() {
    let mut vm = new_vm();
    let f = vm
        .load(b"local a, b = ... return a * b", "=mul")
        .unwrap();
    let bytes = vm.dump(&f, false).unwrap();
    let blob = vm.intern(&bytes);
    vm.set_global("blob", LuaValue::String(blob)).unwrap();
    let results = vm
        .execute("local f = assert(loadstring(blob)) return f(6, 7)")
        .unwrap();
    assert_eq!(results, vec![LuaValue::Number(42.0)]);
}

#[test]
fn test_corrupt_binary_chunks_are_rejected() {
    let mut vm = new_vm();
    let f = vm.load(b"return 'payload'", "=payload").unwrap();
    let bytes = vm.dump(&f, false).unwrap();

    let err = vm.load(&bytes[..bytes.len() / 2], "=cut").unwrap_err();
    assert_eq!(err, LuaError::SyntaxError);
    let msg = vm.get_error_message(err);
    assert!(msg.contains("precompiled chunk"), "got {}", msg);

    // through the library: nil plus the message
    let cut = vm.intern(&bytes[..bytes.len() - 1]);
    vm.set_global("cut", LuaValue::String(cut)).unwrap();
    let results = vm
        .execute("local f, e = loadstring(cut) return f, e")
        .unwrap();
    assert_eq!(results[0], LuaValue::Nil);
    let msg = vm.to_str(&results[1]).unwrap_or_default();
    assert!(msg.contains("unexpected end"), "got {}", msg);
}

#[test]
fn test_only_lua_functions_dump() {
    let mut vm = new_vm();
    let print = vm.get_global("print");
    assert!(vm.dump(&print, false).is_none());
    assert!(vm.dump(&LuaValue::Number(1.0), false).is_none());
}

#[test]
fn test_dumped_closure_gets_fresh_upvalues() {
    let mut vm = new_vm();
    let results = vm
        .execute("local u = 5 return function() return u end")
        .unwrap();
    let closure = results[0];
    assert_eq!(vm.call_function(closure, &[]).unwrap(), vec![LuaValue::Number(5.0)]);
    let bytes = vm.dump(&closure, false).unwrap();
    let copy = vm.load(&bytes, "=copy").unwrap();
    assert_eq!(vm.call_function(copy, &[]).unwrap(), vec![LuaValue::Nil]);
}
