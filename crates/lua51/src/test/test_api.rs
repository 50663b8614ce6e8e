// Tests for the stack-based embedding API
use crate::lua_vm::api::{LUA_GLOBALSINDEX, LUA_REGISTRYINDEX, upvalue_index};
use crate::*;

fn new_vm() -> LuaVM {
    let mut vm = LuaVM::new(SafeOption::default());
    vm.open_stdlib(crate::stdlib::Stdlib::All).unwrap();
    vm
}

fn error_of(vm: &mut LuaVM, code: &str) -> String {
    match vm.execute(code) {
        Ok(_) => panic!("expected an error from {}", code),
        Err(e) => vm.get_error_message(e),
    }
}

fn sum(vm: &mut LuaVM) -> LuaResult<usize> {
    let mut total = 0.0;
    for i in 1..=vm.arg_count() {
        total += vm.check_number(i)?;
    }
    vm.push_number(total);
    Ok(1)
}

fn counter(vm: &mut LuaVM) -> LuaResult<usize> {
    let n = vm.to_number_at(upvalue_index(1)).unwrap_or(0.0) + 1.0;
    vm.push_number(n);
    vm.replace(upvalue_index(1))?;
    vm.push_number(n);
    Ok(1)
}

fn handler(vm: &mut LuaVM) -> LuaResult<usize> {
    let msg = vm.to_string_at(1).unwrap_or_default();
    vm.push_string(&format!("handled: {}", msg));
    Ok(1)
}

#[test]
fn test_native_function_arguments() {
    let mut vm = new_vm();
    vm.register_function("sum", sum).unwrap();
    let results = vm.execute("return sum(1, 2, '3'), sum()").unwrap();
    assert_eq!(results, vec![LuaValue::Number(6.0), LuaValue::Number(0.0)]);

    let msg = error_of(&mut vm, "local r = sum(1, {}) return r");
    assert!(
        msg.contains("bad argument #2 to 'sum' (number expected, got table)"),
        "got {}",
        msg
    );
    let msg = error_of(&mut vm, "local t = {f = sum} local r = t.f(nil) return r");
    assert!(
        msg.contains("bad argument #1 to 'f' (number expected, got nil)"),
        "got {}",
        msg
    );
}

#[test]
fn test_stack_manipulation() {
    let mut vm = new_vm();
    assert_eq!(vm.get_top(), 0);
    vm.push_number(1.0);
    vm.push_number(2.0);
    vm.push_number(3.0);
    vm.insert(1);
    assert_eq!(vm.to_number_at(1), Some(3.0));
    assert_eq!(vm.to_number_at(2), Some(1.0));
    assert_eq!(vm.to_number_at(3), Some(2.0));

    vm.remove(2);
    assert_eq!(vm.get_top(), 2);
    assert_eq!(vm.to_number_at(-1), Some(2.0));

    vm.push_string("x");
    vm.replace(1).unwrap();
    assert_eq!(vm.get_top(), 2);
    assert_eq!(vm.to_string_at(1).as_deref(), Some("x"));

    vm.set_top(4);
    assert_eq!(vm.value_type(3), LuaType::Nil);
    assert_eq!(vm.value_type(4), LuaType::Nil);
    assert_eq!(vm.value_type(5), LuaType::None);
    vm.set_top(-2);
    assert_eq!(vm.get_top(), 3);

    vm.push_value(1);
    assert_eq!(vm.to_string_at(-1).as_deref(), Some("x"));
    vm.set_top(0);
    assert_eq!(vm.get_top(), 0);
}

#[test]
fn test_numbers_convert_to_strings_in_place() {
    let mut vm = new_vm();
    vm.push_number(12.0);
    assert_eq!(vm.value_type(-1), LuaType::Number);
    assert_eq!(vm.to_string_at(-1).as_deref(), Some("12"));
    assert_eq!(vm.value_type(-1), LuaType::String);
    vm.push_boolean(true);
    assert_eq!(vm.to_string_at(-1), None);
    assert!(vm.to_boolean(-1));
    vm.pop(2);
}

#[test]
fn test_table_access_through_the_stack() {
    let mut vm = new_vm();
    vm.create_table_at(0, 0);
    vm.push_number(5.0);
    vm.set_field(-2, "x").unwrap();
    vm.get_field(-1, "x").unwrap();
    assert_eq!(vm.to_number_at(-1), Some(5.0));
    vm.pop(1);

    vm.push_string("v1");
    vm.raw_seti(-2, 1).unwrap();
    vm.raw_geti(-1, 1).unwrap();
    assert_eq!(vm.to_string_at(-1).as_deref(), Some("v1"));
    vm.pop(1);

    vm.push_string("k");
    vm.push_boolean(true);
    vm.set_table_at(-3).unwrap();
    vm.push_string("k");
    vm.get_table_at(-2).unwrap();
    assert_eq!(vm.index2value(-1), LuaValue::Boolean(true));
    vm.pop(1);

    assert!(!vm.get_metatable_at(-1));
    let t = vm.index2value(-1);
    vm.set_global("built", t).unwrap();
    vm.pop(1);
    let results = vm.execute("return built.x, built[1], built.k").unwrap();
    assert_eq!(results[0], LuaValue::Number(5.0));
    assert_eq!(vm.to_str(&results[1]).as_deref(), Some("v1"));
    assert_eq!(results[2], LuaValue::Boolean(true));
}

#[test]
fn test_metatables_through_the_stack() {
    let mut vm = new_vm();
    vm.create_table_at(0, 0);
    vm.create_table_at(0, 1);
    vm.create_table_at(0, 1);
    vm.push_number(99.0);
    vm.set_field(-2, "fallback").unwrap();
    vm.set_field(-2, "__index").unwrap();
    vm.set_metatable_at(-2).unwrap();
    assert!(vm.get_metatable_at(-1));
    vm.pop(1);
    vm.get_field(-1, "fallback").unwrap();
    assert_eq!(vm.to_number_at(-1), Some(99.0));
    vm.pop(2);
    assert_eq!(vm.get_top(), 0);
}

#[test]
fn test_native_closure_upvalues() {
    let mut vm = new_vm();
    vm.push_number(0.0);
    vm.push_closure(counter, 1);
    let f = vm.index2value(-1);
    vm.set_global("counter", f).unwrap();
    vm.pop(1);
    let results = vm.execute("counter() counter() return counter()").unwrap();
    assert_eq!(results, vec![LuaValue::Number(3.0)]);

    // each closure owns its upvalues
    vm.push_number(10.0);
    vm.push_closure(counter, 1);
    let g = vm.index2value(-1);
    vm.pop(1);
    assert_eq!(vm.call_function(g, &[]).unwrap(), vec![LuaValue::Number(11.0)]);
    assert_eq!(vm.call_function(f, &[]).unwrap(), vec![LuaValue::Number(4.0)]);
}

#[test]
fn test_registry_and_globals_pseudo_indices() {
    let mut vm = new_vm();
    vm.push_string("secret");
    vm.set_field(LUA_REGISTRYINDEX, "key").unwrap();
    vm.get_field(LUA_REGISTRYINDEX, "key").unwrap();
    assert_eq!(vm.to_string_at(-1).as_deref(), Some("secret"));
    vm.pop(1);
    let results = vm.execute("return key").unwrap();
    assert_eq!(results, vec![LuaValue::Nil]);

    vm.get_field(LUA_GLOBALSINDEX, "print").unwrap();
    assert_eq!(vm.value_type(-1), LuaType::Function);
    vm.pop(1);
    vm.push_number(7.0);
    vm.set_field(LUA_GLOBALSINDEX, "seven").unwrap();
    assert_eq!(vm.get_global("seven"), LuaValue::Number(7.0));
    assert_eq!(vm.index2value(LUA_REGISTRYINDEX), LuaValue::Table(vm.registry()));
}

#[test]
fn test_call_at_leaves_results_on_the_stack() {
    let mut vm = new_vm();
    let f = vm.load(b"local a, b = ... return a + b, a * b", "=pair").unwrap();
    vm.push(f);
    vm.push_number(3.0);
    vm.push_number(4.0);
    vm.call_at(2, -1).unwrap();
    assert_eq!(vm.get_top(), 2);
    assert_eq!(vm.to_number_at(1), Some(7.0));
    assert_eq!(vm.to_number_at(2), Some(12.0));
    vm.pop(2);

    vm.push(f);
    vm.push_number(1.0);
    vm.push_number(1.0);
    vm.call_at(2, 3).unwrap();
    assert_eq!(vm.get_top(), 3);
    assert_eq!(vm.value_type(3), LuaType::Nil);
    vm.set_top(0);
}

#[test]
fn test_pcall_at_with_message_handler() {
    let mut vm = new_vm();
    vm.push_function(handler);
    let f = vm.load(b"error('boom', 0)", "=fail").unwrap();
    vm.push(f);
    let status = vm.pcall_at(0, 1, 1);
    assert_eq!(status, ThreadStatus::RuntimeError);
    assert_eq!(vm.get_top(), 2);
    assert_eq!(vm.to_string_at(-1).as_deref(), Some("handled: boom"));
    vm.set_top(0);

    // without a handler the raw value comes back
    vm.push(f);
    assert_eq!(vm.pcall_at(0, 0, 0), ThreadStatus::RuntimeError);
    assert_eq!(vm.to_string_at(-1).as_deref(), Some("boom"));
    vm.pop(1);
    assert_eq!(vm.get_top(), 0);
}
