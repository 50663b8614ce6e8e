// Tests for metatables and metamethod dispatch
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
fn test_arithmetic_metamethods() {
    let mut vm = new_vm();
    run(
        &mut vm,
        r#"
        local V = {}
        V.__index = V
        local function new(x) return setmetatable({x = x}, V) end
        V.__add = function(a, b) return new(a.x + b.x) end
        V.__sub = function(a, b) return new(a.x - b.x) end
        V.__mul = function(a, b)
            if type(a) == "number" then return new(a * b.x) end
            if type(b) == "number" then return new(a.x * b) end
            return new(a.x * b.x)
        end
        V.__div = function(a, b) return new(a.x / b.x) end
        V.__mod = function(a, b) return new(a.x % b.x) end
        V.__pow = function(a, b) return new(a.x ^ b.x) end
        V.__unm = function(a) return new(-a.x) end

        local a, b = new(6), new(4)
        assert((a + b).x == 10)
        assert((a - b).x == 2)
        assert((a * b).x == 24)
        assert((2 * a).x == 12)
        assert((a * 3).x == 18)
        assert((a / b).x == 1.5)
        assert((a % b).x == 2)
        assert((b ^ new(2)).x == 16)
        assert((-a).x == -6)
    "#,
    );
}

#[test]
fn test_comparison_metamethods() {
    let mut vm = new_vm();
    run(
        &mut vm,
        r#"
        local mt = {}
        mt.__eq = function(a, b) return a.v == b.v end
        mt.__lt = function(a, b) return a.v < b.v end
        mt.__le = function(a, b) return a.v <= b.v end
        local function new(v) return setmetatable({v = v}, mt) end
        local a, b, c = new(1), new(2), new(1)
        assert(a == c and a ~= b)
        assert(a < b and not (b < a))
        assert(a <= c and a <= b and not (b <= a))
        assert(b > a and b >= a)

        -- __eq only runs for two tables sharing the handler
        local other = setmetatable({v = 1}, {__eq = function() return true end})
        assert(a ~= other)
        assert(a ~= 1)

        -- without __le, a <= b is not (b < a)
        local only_lt = {__lt = function(x, y) return x.v < y.v end}
        local p, q = setmetatable({v = 1}, only_lt), setmetatable({v = 2}, only_lt)
        assert(p <= q and not (q <= p))
    "#,
    );
}

#[test]
fn test_concat_metamethod() {
    let mut vm = new_vm();
    run(
        &mut vm,
        r#"
        local mt = {__concat = function(a, b)
            local l = type(a) == "table" and a.s or a
            local r = type(b) == "table" and b.s or b
            return l .. "+" .. r
        end}
        local w = setmetatable({s = "w"}, mt)
        assert(w .. "x" == "w+x")
        assert("x" .. w == "x+w")
        assert("a" .. "b" .. w == "ab+w")
        assert(1 .. 2 .. 3 == "123")
    "#,
    );
}

#[test]
fn test_index_and_newindex() {
    let mut vm = new_vm();
    run(
        &mut vm,
        r#"
        local defaults = {color = "red", size = 1}
        local obj = setmetatable({}, {__index = defaults})
        assert(obj.color == "red")
        obj.color = "blue"
        assert(obj.color == "blue" and defaults.color == "red")

        local chain = setmetatable({}, {__index = obj})
        assert(chain.size == 1 and chain.color == "blue")

        local log = {}
        local proxy = setmetatable({}, {
            __index = function(t, k) return k .. "!" end,
            __newindex = log,
        })
        assert(proxy.foo == "foo!")
        proxy.bar = 5
        assert(rawget(proxy, "bar") == nil and log.bar == 5)

        local writes = 0
        local counted = setmetatable({}, {__newindex = function(t, k, v)
            writes = writes + 1
            rawset(t, k, v)
        end})
        counted.a = 1
        counted.a = 2
        assert(writes == 1 and counted.a == 2)
    "#,
    );
}

#[test]
fn test_index_loop_is_detected() {
    let mut vm = new_vm();
    let msg = error_of(
        &mut vm,
        r#"
        local t = setmetatable({}, {})
        getmetatable(t).__index = t
        local y = t.missing
    "#,
    );
    assert!(msg.contains("loop in gettable"), "got {}", msg);

    let msg = error_of(
        &mut vm,
        r#"
        local t = setmetatable({}, {})
        getmetatable(t).__newindex = t
        t.missing = 1
    "#,
    );
    assert!(msg.contains("loop in settable"), "got {}", msg);
}

#[test]
fn test_long_index_chain_within_limit() {
    let mut vm = new_vm();
    run(
        &mut vm,
        r#"
        local base = {found = true}
        local current = base
        for i = 1, 50 do
            current = setmetatable({}, {__index = current})
        end
        assert(current.found == true)
    "#,
    );
}

#[test]
fn test_call_metamethod() {
    let mut vm = new_vm();
    run(
        &mut vm,
        r##"
        local callable = setmetatable({base = 10}, {
            __call = function(self, a, b) return self.base + a + b, "second" end
        })
        local r, s = callable(1, 2)
        assert(r == 13 and s == "second")
        assert(select("#", callable(0, 0)) == 2)
        local function tail() return callable(5, 5) end
        assert(tail() == 20)
        assert(pcall(callable, 1, 1))
    "##,
    );
}

#[test]
fn test_call_without_handler_names_the_type() {
    let mut vm = new_vm();
    let msg = error_of(&mut vm, "local t = setmetatable({}, {}) t()");
    assert!(msg.contains("attempt to call local 't' (a table value)"), "got {}", msg);

    let msg = error_of(&mut vm, "local ok = true local y = (ok)()");
    assert!(msg.contains("a boolean value"), "got {}", msg);
}

#[test]
fn test_tostring_metamethod() {
    let mut vm = new_vm();
    run(
        &mut vm,
        r#"
        local p = setmetatable({x = 1, y = 2}, {
            __tostring = function(self) return "(" .. self.x .. ", " .. self.y .. ")" end
        })
        assert(tostring(p) == "(1, 2)")
        print(p)
    "#,
    );
}

#[test]
fn test_len_metamethod_on_userdata() {
    let mut vm = new_vm();
    run(
        &mut vm,
        r#"
        local u = newproxy(true)
        getmetatable(u).__len = function() return 99 end
        assert(#u == 99)
        -- tables use their own length
        local t = setmetatable({1, 2}, {__len = function() return 99 end})
        assert(#t == 2)
    "#,
    );
}

#[test]
fn test_userdata_index_metamethod() {
    let mut vm = new_vm();
    run(
        &mut vm,
        r#"
        local u = newproxy(true)
        local store = {}
        getmetatable(u).__index = function(_, k) return store[k] end
        getmetatable(u).__newindex = function(_, k, v) store[k] = v end
        u.value = 7
        assert(u.value == 7 and store.value == 7)
    "#,
    );
}

#[test]
fn test_metamethod_errors_propagate() {
    let mut vm = new_vm();
    run(
        &mut vm,
        r#"
        local t = setmetatable({}, {__add = function() error("no adding", 0) end})
        local ok, e = pcall(function() return t + 1 end)
        assert(not ok and e == "no adding")
    "#,
    );
}

#[test]
fn test_type_metatables_from_host() {
    let mut vm = new_vm();
    let mt = vm.create_table(0, 1);
    let index = vm.create_table(0, 1);
    let key = vm.create_string("twice");
    let f = vm
        .load(b"local n = ... return n * 2", "=twice")
        .unwrap();
    vm.raw_set(index, key, f).unwrap();
    let index_key = vm.create_string("__index");
    vm.raw_set(mt, index_key, LuaValue::Table(index)).unwrap();
    vm.set_type_metatable(LuaType::Number, Some(mt));
    run(&mut vm, "local n = 21 assert(n:twice() == 42)");
    vm.set_type_metatable(LuaType::Number, None);
    let msg = error_of(&mut vm, "local n = 21 return n:twice()");
    assert!(msg.contains("attempt to index local 'n' (a number value)"), "got {}", msg);
}
