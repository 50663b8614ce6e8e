// Tests for basic library functions
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

/// Run `code` and return its first result as a string
fn run_str(vm: &mut LuaVM, code: &str) -> String {
    let result = vm.execute(code);
    match result {
        Ok(values) => values
            .first()
            .and_then(|v| vm.to_str(v))
            .unwrap_or_default(),
        Err(e) => panic!("{}", vm.get_error_message(e)),
    }
}

#[test]
fn test_print() {
    let mut vm = new_vm();
    run(
        &mut vm,
        r#"
        print("Hello, World!")
        print(1, 2, 3)
        print(nil, true, {})
        print()
    "#,
    );
}

#[test]
fn test_type() {
    let mut vm = new_vm();
    run(
        &mut vm,
        r#"
        assert(type(nil) == "nil")
        assert(type(true) == "boolean")
        assert(type(42) == "number")
        assert(type(3.14) == "number")
        assert(type("hello") == "string")
        assert(type({}) == "table")
        assert(type(print) == "function")
        assert(type(function() end) == "function")
        assert(type(coroutine.create(function() end)) == "thread")
        assert(type(newproxy()) == "userdata")
    "#,
    );
}

#[test]
fn test_tonumber() {
    let mut vm = new_vm();
    run(
        &mut vm,
        r#"
        assert(tonumber("123") == 123)
        assert(tonumber("3.14") == 3.14)
        assert(tonumber("  12  ") == 12)
        assert(tonumber("0x10") == 16)
        assert(tonumber("1e2") == 100)
        assert(tonumber("FF", 16) == 255)
        assert(tonumber("777", 8) == 511)
        assert(tonumber("zz", 36) == 1295)
        assert(tonumber("invalid") == nil)
        assert(tonumber("") == nil)
        assert(tonumber("1e") == nil)
        assert(tonumber(42) == 42)
        assert(tonumber({}) == nil)
    "#,
    );
}

#[test]
fn test_tostring() {
    let mut vm = new_vm();
    run(
        &mut vm,
        r#"
        assert(tostring(nil) == "nil")
        assert(tostring(true) == "true")
        assert(tostring(false) == "false")
        assert(tostring(10 / 2) == "5")
        assert(tostring(0.1) == "0.1")
        assert(tostring(3.25) == "3.25")
        assert(tostring(1e15) == "1e+15")
        assert(tostring(-7) == "-7")
        assert(tostring("x") == "x")
    "#,
    );
    let s = run_str(&mut vm, "return tostring({})");
    assert!(s.starts_with("table: "), "got {}", s);
    let s = run_str(&mut vm, "return tostring(print)");
    assert!(s.starts_with("function: "), "got {}", s);
}

#[test]
fn test_string_number_coercion() {
    let mut vm = new_vm();
    run(
        &mut vm,
        r#"
        assert("10" + 1 == 11)
        assert("3" * "4" == 12)
        assert(10 .. 20 == "1020")
        assert(1 .. "" == "1")
        assert("0x10" + 0 == 16)
        assert(-"2" == -2)
        -- equality never coerces
        assert("1" ~= 1)
    "#,
    );
}

#[test]
fn test_concat_converts_every_number() {
    let mut vm = new_vm();
    let results = vm
        .execute("local x = 7 return 10 .. 20, 1 .. 'x', 'a' .. 2 .. 'b', x .. x .. x, 1.5 .. ''")
        .unwrap();
    let texts: Vec<String> = results.iter().filter_map(|v| vm.to_str(v)).collect();
    assert_eq!(texts, vec!["1020", "1x", "a2b", "777", "1.5"]);
}

#[test]
fn test_arithmetic() {
    let mut vm = new_vm();
    run(
        &mut vm,
        r#"
        assert(7 % 3 == 1)
        assert(-7 % 3 == 2)
        assert(7 % -3 == -2)
        assert(5.5 % 2 == 1.5)
        assert(2 ^ 10 == 1024)
        assert(2 ^ 3 ^ 2 == 512)
        assert(-2 ^ 2 == -4)
        assert(1 / 0 > 1e308)
        assert(-1 / 0 < -1e308)
        local nan = 0 / 0
        assert(nan ~= nan)
        assert(10 - 2 - 3 == 5)
        assert(2 + 3 * 4 == 14)
        assert((2 + 3) * 4 == 20)
    "#,
    );
}

#[test]
fn test_comparison_and_logic() {
    let mut vm = new_vm();
    run(
        &mut vm,
        r#"
        assert(1 < 2 and 2 <= 2 and 3 > 2 and 3 >= 3)
        assert("a" < "b" and "abc" < "abd" and "" < "a")
        assert("Z" < "a")
        assert(not nil and not false)
        assert((nil or 5) == 5)
        assert((false and error("unreachable")) == false)
        assert((1 and 2) == 2)
        assert((nil and 1) == nil)
        local x = nil
        local y = x or "default"
        assert(y == "default")
        assert(0 and true)
        assert("" and true)
    "#,
    );
}

#[test]
fn test_control_flow() {
    let mut vm = new_vm();
    run(
        &mut vm,
        r#"
        local sum = 0
        for i = 1, 10 do sum = sum + i end
        assert(sum == 55)

        sum = 0
        for i = 10, 1, -2 do sum = sum + i end
        assert(sum == 30)

        sum = 0
        for i = 1, 0 do sum = sum + 1 end
        assert(sum == 0)

        local n = 0
        while true do
            n = n + 1
            if n == 5 then break end
        end
        assert(n == 5)

        local m = 0
        repeat
            local done = m >= 3
            m = m + 1
        until done
        assert(m == 4)

        local r
        if n > 10 then r = "big" elseif n > 3 then r = "mid" else r = "small" end
        assert(r == "mid")
    "#,
    );
}

#[test]
fn test_select_and_varargs() {
    let mut vm = new_vm();
    run(
        &mut vm,
        r##"
        assert(select("#") == 0)
        assert(select("#", nil, nil) == 2)
        assert(select(2, "a", "b", "c") == "b")
        assert(select(-1, "a", "b", "c") == "c")
        local function count(...) return select("#", ...) end
        assert(count(1, nil, 3, nil) == 4)
        local function pack(...) return {...} end
        local t = pack(1, 2, 3)
        assert(t[1] == 1 and t[3] == 3)
        local function first(...)
            local a = ...
            return a
        end
        assert(first(9, 8, 7) == 9)
    "##,
    );
    let result = vm.execute("local x = select(0, 1)");
    assert!(result.is_err());
    let msg = vm.get_error_message(result.unwrap_err());
    assert!(msg.contains("bad argument #1 to 'select' (index out of range)"), "got {}", msg);
}

#[test]
fn test_unpack() {
    let mut vm = new_vm();
    run(
        &mut vm,
        r##"
        local a, b, c = unpack({1, 2, 3})
        assert(a == 1 and b == 2 and c == 3)
        local x, y = unpack({1, 2, 3}, 2)
        assert(x == 2 and y == 3)
        local p, q = unpack({1, 2, 3}, 2, 2)
        assert(p == 2 and q == nil)
        assert(select("#", unpack({}, 1, 3)) == 3)
        assert(select("#", unpack({}, 3, 1)) == 0)
    "##,
    );
}

#[test]
fn test_raw_access() {
    let mut vm = new_vm();
    run(
        &mut vm,
        r#"
        local t = setmetatable({}, {
            __index = function() return "meta" end,
            __newindex = function() error("blocked") end,
            __eq = function() return true end,
        })
        assert(t.x == "meta")
        assert(rawget(t, "x") == nil)
        rawset(t, "x", 1)
        assert(t.x == 1)
        local u = setmetatable({}, getmetatable(t))
        assert(t == u)
        assert(not rawequal(t, u))
        assert(rawequal(t, t))
        assert(not pcall(function() t.y = 2 end))
    "#,
    );
}

#[test]
fn test_metatable_protection() {
    let mut vm = new_vm();
    run(
        &mut vm,
        r#"
        local t = setmetatable({}, {__metatable = "locked"})
        assert(getmetatable(t) == "locked")
        local ok = pcall(setmetatable, t, {})
        assert(not ok)
        assert(getmetatable("abc") == nil)
    "#,
    );
}

#[test]
fn test_error_values() {
    let mut vm = new_vm();
    run(
        &mut vm,
        r#"
        local ok, e = pcall(error, {code = 42})
        assert(not ok and e.code == 42)

        local ok2, e2 = pcall(error, "plain", 0)
        assert(not ok2 and e2 == "plain")

        local ok3, e3 = pcall(error)
        assert(not ok3 and e3 == nil)

        local ok4, a, b = pcall(function(x, y) return x + y, x * y end, 3, 4)
        assert(ok4 and a == 7 and b == 12)
    "#,
    );

    let msg = run_str(
        &mut vm,
        r#"
        local ok, e = pcall(function() error("boom") end)
        return e
    "#,
    );
    assert!(msg.ends_with(":2: boom"), "got {}", msg);
    assert!(msg.starts_with("[string "), "got {}", msg);

    // level 2 blames the caller of the erroring function
    let msg = run_str(
        &mut vm,
        "local function check(x) if not x then error('bad input', 2) end end\n\
         local ok, e = pcall(function()\n\
             check(false)\n\
         end)\n\
         return e",
    );
    assert!(msg.ends_with(":3: bad input"), "got {}", msg);
}

#[test]
fn test_xpcall() {
    let mut vm = new_vm();
    let msg = run_str(
        &mut vm,
        r#"
        local ok, e = xpcall(function() error("boom") end, function(m) return "handled: " .. m end)
        assert(ok == false)
        return e
    "#,
    );
    assert!(msg.starts_with("handled: "), "got {}", msg);
    assert!(msg.ends_with("boom"), "got {}", msg);

    run(
        &mut vm,
        r#"
        local ok, v = xpcall(function() return 7 end, print)
        assert(ok and v == 7)
    "#,
    );
}

#[test]
fn test_error_in_message_handler() {
    let mut vm = new_vm();
    let msg = run_str(
        &mut vm,
        r#"
        local ok, e = xpcall(function() error("first") end, function(m) error("second") end)
        assert(not ok)
        return e
    "#,
    );
    assert_eq!(msg, "error in error handling");
}

#[test]
fn test_assert() {
    let mut vm = new_vm();
    run(
        &mut vm,
        r#"
        local a, b = assert(1, 2)
        assert(a == 1 and b == 2)
        local ok, e = pcall(assert, false, "custom message")
        assert(not ok and e == "custom message")
        local ok2, e2 = pcall(assert, nil)
        assert(not ok2)
    "#,
    );
    let msg = run_str(&mut vm, "local ok, e = pcall(assert, false) return e");
    assert!(msg.contains("assertion failed!"), "got {}", msg);
}

#[test]
fn test_loadstring() {
    let mut vm = new_vm();
    run(
        &mut vm,
        r#"
        local f = loadstring("return 1 + 2")
        assert(f() == 3)
        local g = loadstring("local a, b = ... return a .. b")
        assert(g("x", "y") == "xy")
        local bad, msg = loadstring("return +")
        assert(bad == nil and type(msg) == "string")
        local parts = {"return ", "4", " * 5"}
        local i = 0
        local h = load(function() i = i + 1 return parts[i] end)
        assert(h() == 20)
    "#,
    );
    let msg = run_str(&mut vm, "local f, e = loadstring('x = = 1', '=chunk') return e");
    assert_eq!(msg, "chunk:1: unexpected symbol near '='");
}

#[test]
fn test_environments() {
    let mut vm = new_vm();
    run(
        &mut vm,
        r#"
        x = "global"
        local function get_x() return x end
        assert(get_x() == "global")
        setfenv(get_x, {x = "sandboxed"})
        assert(get_x() == "sandboxed")
        assert(getfenv(get_x).x == "sandboxed")
        assert(getfenv(0) == _G)
        assert(getfenv().x == "global")

        local f = loadstring("y = 10")
        local env = {}
        setfenv(f, env)
        f()
        assert(env.y == 10 and y == nil)
    "#,
    );
}

#[test]
fn test_globals_table() {
    let mut vm = new_vm();
    run(
        &mut vm,
        r#"
        assert(_G._G == _G)
        assert(_VERSION == "Lua 5.1")
        some_global = 5
        assert(_G.some_global == 5)
        _G.other = 6
        assert(other == 6)
    "#,
    );
    assert_eq!(vm.get_global("other"), LuaValue::Number(6.0));
}

#[test]
fn test_long_strings_and_escapes() {
    let mut vm = new_vm();
    run(
        &mut vm,
        "local s = [[\nline1\nline2]]\n\
         assert(s == 'line1\\nline2')\n\
         local t = [==[a]]b]==]\n\
         assert(t == 'a]]b')\n\
         assert('\\65\\066' == 'AB')\n\
         assert(\"tab\\there\" == 'tab' .. '\\t' .. 'here')\n\
         --[[ block\n comment ]] assert(true)\n",
    );
}
