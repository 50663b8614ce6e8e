// Tests for calls, returns, tail calls and stack limits
use crate::*;

fn new_vm() -> LuaVM {
    let mut vm = LuaVM::new(SafeOption::default());
    vm.open_stdlib(crate::stdlib::Stdlib::All).unwrap();
    vm
}

fn run(vm: &mut LuaVM, code: &str) {
    let result = vm.execute(code);
    if let Err(e) = &result {
        eprintln!("Error message: {}", vm.get_error_message(*e));
    }
    assert!(result.is_ok());
}

fn error_of(vm: &mut LuaVM, code: &str) -> String {
    match vm.execute(code) {
        Ok(_) => panic!("expected an error from {}", code),
        Err(e) => vm.get_error_message(e),
    }
}

#[test]
fn test_recursive_fib_leaves_stack_balanced() {
    let mut vm = new_vm();
    let f = vm
        .load(
            b"local function fib(n) if n < 2 then return n end return fib(n - 1) + fib(n - 2) end\n\
              return fib(10)",
            "=fib",
        )
        .unwrap();
    vm.push_number(1.0);
    vm.push_boolean(true);
    let before = vm.get_top();
    vm.push(f);
    vm.call_at(0, 1).unwrap();
    assert_eq!(vm.get_top(), before + 1);
    assert_eq!(vm.to_number_at(-1), Some(55.0));
    vm.pop(1);
    assert_eq!(vm.get_top(), before);
    assert_eq!(vm.index2value(1), LuaValue::Number(1.0));
    assert_eq!(vm.index2value(2), LuaValue::Boolean(true));
}

#[test]
fn test_multiple_results_adjust() {
    let mut vm = new_vm();
    run(
        &mut vm,
        r##"
        local function three() return 1, 2, 3 end
        local a, b, c, d = three()
        assert(a == 1 and b == 2 and c == 3 and d == nil)
        local x, y = (three())
        assert(x == 1 and y == nil)
        local function none() end
        local p, q = none()
        assert(p == nil and q == nil)
        local function pass(...) return ... end
        assert(select("#", pass(three())) == 3)
        assert(select("#", pass(three(), 10)) == 2)
    "##,
    );
}

#[test]
fn test_call_results_to_host() {
    let mut vm = new_vm();
    let results = vm.execute("return 1, 'two', nil, true").unwrap();
    assert_eq!(results.len(), 4);
    assert_eq!(results[0], LuaValue::Number(1.0));
    assert_eq!(vm.to_str(&results[1]).as_deref(), Some("two"));
    assert_eq!(results[2], LuaValue::Nil);
    assert_eq!(results[3], LuaValue::Boolean(true));

    let f = vm.load(b"local a, b = ... return a - b", "=sub").unwrap();
    let results = vm
        .call_function(f, &[LuaValue::Number(10.0), LuaValue::Number(4.0)])
        .unwrap();
    assert_eq!(results, vec![LuaValue::Number(6.0)]);
}

#[test]
fn test_tail_calls_run_in_constant_stack() {
    let mut vm = new_vm();
    run(
        &mut vm,
        r#"
        local function loop(n)
            if n == 0 then return "done" end
            return loop(n - 1)
        end
        assert(loop(1000000) == "done")

        local even, odd
        function even(n) if n == 0 then return true end return odd(n - 1) end
        function odd(n) if n == 0 then return false end return even(n - 1) end
        assert(even(100001) == false)
    "#,
    );
}

#[test]
fn test_deep_recursion_grows_stack_and_keeps_upvalues() {
    let mut vm = new_vm();
    run(
        &mut vm,
        r#"
        local captured = "kept"
        local function depth(n)
            if n == 0 then return captured end
            local a, b, c, d, e, f, g, h = n, n, n, n, n, n, n, n
            local r = depth(n - 1)
            assert(a + h == 2 * n)
            return r
        end
        assert(depth(5000) == "kept")

        -- an open upvalue keeps pointing at its slot across stack growth
        local function outer(n)
            local x = n
            local get = function() return x end
            if n > 0 then
                local inner = outer(n - 1)
                assert(inner ~= nil)
            end
            x = x + 1000
            return get() == n + 1000
        end
        assert(outer(3000))
    "#,
    );
}

#[test]
fn test_infinite_recursion_is_a_stack_overflow() {
    let mut vm = new_vm();
    let msg = error_of(&mut vm, "local function f() return 1 + f() end f()");
    assert!(msg.contains("stack overflow"), "got {}", msg);

    // the runtime stays usable afterwards
    run(&mut vm, "local function g(n) if n == 0 then return 0 end return 1 + g(n - 1) end assert(g(100) == 100)");
}

#[test]
fn test_stack_overflow_is_catchable() {
    let mut vm = new_vm();
    run(
        &mut vm,
        r#"
        local function f() return 1 + f() end
        local ok, e = pcall(f)
        assert(not ok)
        assert(type(e) == "string")
    "#,
    );
}

#[test]
fn test_call_depth_limit_from_options() {
    let mut vm = LuaVM::new(SafeOption {
        max_call_depth: 100,
        ..SafeOption::default()
    });
    vm.open_stdlib(crate::stdlib::Stdlib::All).unwrap();
    run(
        &mut vm,
        r#"
        local function f(n) if n == 0 then return 0 end return 1 + f(n - 1) end
        assert(f(50) == 50)
        assert(not pcall(f, 200))
    "#,
    );
}

#[test]
fn test_calling_non_functions() {
    let mut vm = new_vm();
    let msg = error_of(&mut vm, "({})()");
    assert!(msg.ends_with("attempt to call a table value"), "got {}", msg);

    let msg = error_of(&mut vm, "undefined_function()");
    assert!(msg.contains("attempt to call global 'undefined_function' (a nil value)"), "got {}", msg);

    let msg = error_of(&mut vm, "local x = 5 x()");
    assert!(msg.contains("attempt to call local 'x' (a number value)"), "got {}", msg);

    let msg = error_of(&mut vm, "local t = {} t.method()");
    assert!(msg.contains("attempt to call field 'method' (a nil value)"), "got {}", msg);

    let msg = error_of(&mut vm, "local t = {} t:method()");
    assert!(msg.contains("attempt to call method 'method' (a nil value)"), "got {}", msg);
}

#[test]
fn test_error_messages_name_variables() {
    let mut vm = new_vm();
    let msg = error_of(&mut vm, "local t = nil local y = t.x");
    assert!(msg.contains("attempt to index local 't' (a nil value)"), "got {}", msg);

    let msg = error_of(&mut vm, "local y = missing.field");
    assert!(msg.contains("attempt to index global 'missing' (a nil value)"), "got {}", msg);

    let msg = error_of(&mut vm, "local t = {} local y = t + 1");
    assert!(msg.contains("attempt to perform arithmetic on local 't' (a table value)"), "got {}", msg);

    let msg = error_of(&mut vm, "local y = {} < {}");
    assert!(msg.contains("attempt to compare two table values"), "got {}", msg);

    let msg = error_of(&mut vm, "local y = 1 < 'x'");
    assert!(msg.contains("attempt to compare number with string"), "got {}", msg);

    let msg = error_of(&mut vm, "local y = 'a' .. {}");
    assert!(msg.contains("attempt to concatenate a table value"), "got {}", msg);

    let msg = error_of(&mut vm, "local y = #nil");
    assert!(msg.contains("attempt to get length of a nil value"), "got {}", msg);
}

#[test]
fn test_error_position_prefix() {
    let mut vm = new_vm();
    let f = vm.load(b"local a = 1\nlocal b = nil\nreturn a + b", "=chunk").unwrap();
    let err = vm.call_function(f, &[]).unwrap_err();
    assert_eq!(err, LuaError::RuntimeError);
    assert_eq!(
        vm.get_error_message(err),
        "chunk:3: attempt to perform arithmetic on local 'b' (a nil value)"
    );
}

#[test]
fn test_pcall_restores_host_stack() {
    let mut vm = new_vm();
    vm.push_string("sentinel");
    let before = vm.get_top();

    let f = vm.load(b"error('failure')", "=err").unwrap();
    vm.push(f);
    let status = vm.pcall_at(0, 0, 0);
    assert_eq!(status, ThreadStatus::RuntimeError);
    assert_eq!(vm.get_top(), before + 1);
    assert_eq!(vm.to_string_at(-1).as_deref(), Some("err:1: failure"));
    vm.pop(1);

    let g = vm.load(b"return 1, 2", "=ok").unwrap();
    vm.push(g);
    let status = vm.pcall_at(0, 2, 0);
    assert_eq!(status, ThreadStatus::Ok);
    assert_eq!(vm.get_top(), before + 2);
    vm.pop(2);
    assert_eq!(vm.get_top(), before);
    assert_eq!(vm.to_string_at(1).as_deref(), Some("sentinel"));
}

#[test]
fn test_nested_pcall_recovery() {
    let mut vm = new_vm();
    run(
        &mut vm,
        r#"
        local log = {}
        local ok, e = pcall(function()
            local ok2, e2 = pcall(function() error("inner", 0) end)
            log[#log + 1] = e2
            error("outer", 0)
        end)
        assert(not ok and e == "outer")
        assert(log[1] == "inner")

        -- locals captured before the error stay intact
        local counter = 0
        local function bump() counter = counter + 1 error("stop") end
        for i = 1, 5 do pcall(bump) end
        assert(counter == 5)
    "#,
    );
}

#[test]
fn test_method_calls() {
    let mut vm = new_vm();
    run(
        &mut vm,
        r#"
        local Account = {balance = 0}
        function Account:deposit(v) self.balance = self.balance + v return self end
        function Account.new(b) return setmetatable({balance = b}, {__index = Account}) end
        local acc = Account.new(10)
        acc:deposit(5):deposit(7)
        assert(acc.balance == 22)
        assert(Account.balance == 0)
    "#,
    );
}

#[test]
fn test_message_handler_sees_stack_overflow() {
    let mut vm = new_vm();
    let results = vm
        .execute(
            r#"
            local function f() return f() + 1 end
            return xpcall(f, function(m) return "H:" .. tostring(m) end)
        "#,
        )
        .unwrap();
    assert_eq!(results[0], LuaValue::Boolean(false));
    let msg = vm.to_str(&results[1]).unwrap_or_default();
    assert!(msg.starts_with("H:"), "got {}", msg);
    assert!(msg.contains("stack overflow"), "got {}", msg);

    // a second overflow after recovery is reported the same way
    let results = vm
        .execute(
            r#"
            local function g() return g() + 1 end
            return xpcall(g, function(m) return "again:" .. tostring(m) end)
        "#,
        )
        .unwrap();
    let msg = vm.to_str(&results[1]).unwrap_or_default();
    assert!(msg.starts_with("again:") && msg.contains("stack overflow"), "got {}", msg);
}

#[test]
fn test_overflowing_handler_escalates() {
    let mut vm = new_vm();
    let results = vm
        .execute(
            r#"
            local function f() return f() + 1 end
            local function h(m) return h(m) .. "" end
            return xpcall(f, h)
        "#,
        )
        .unwrap();
    assert_eq!(results[0], LuaValue::Boolean(false));
    assert_eq!(vm.to_str(&results[1]).as_deref(), Some("error in error handling"));
}

#[test]
fn test_recursive_metamethods_hit_the_native_limit() {
    let mut vm = new_vm();
    let results = vm
        .execute(
            r#"
            local t = setmetatable({}, {})
            getmetatable(t).__index = function(self, k) return self[k] end
            return pcall(function() return t.missing end)
        "#,
        )
        .unwrap();
    assert_eq!(results[0], LuaValue::Boolean(false));
    let msg = vm.to_str(&results[1]).unwrap_or_default();
    assert!(msg.contains("C stack overflow"), "got {}", msg);

    let results = vm
        .execute(
            r#"
            local mt = {}
            mt.__tostring = function(v) return tostring(v) end
            return pcall(tostring, setmetatable({}, mt))
        "#,
        )
        .unwrap();
    assert_eq!(results[0], LuaValue::Boolean(false));
    let msg = vm.to_str(&results[1]).unwrap_or_default();
    assert!(msg.contains("C stack overflow"), "got {}", msg);
}
