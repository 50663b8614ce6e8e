/// Closure and upvalue tests
use crate::*;

fn run(code: &str) {
    let mut vm = LuaVM::new(SafeOption::default());
    vm.open_stdlib(crate::stdlib::Stdlib::All).unwrap();
    let result = vm.execute(code);
    if let Err(e) = &result {
        eprintln!("Error message: {}", vm.get_error_message(*e));
    }
    assert!(result.is_ok());
}

#[test]
fn test_simple_closure() {
    run(r#"
        local function make_counter()
            local count = 0
            return function()
                count = count + 1
                return count
            end
        end
        local counter = make_counter()
        assert(counter() == 1)
        assert(counter() == 2)
        assert(counter() == 3)
        local other = make_counter()
        assert(other() == 1)
        assert(counter() == 4)
    "#);
}

#[test]
fn test_multiple_closures_share_upvalue() {
    run(r#"
        local function make_getset()
            local value = 10
            local function get() return value end
            local function set(v) value = v end
            return get, set
        end
        local get, set = make_getset()
        assert(get() == 10)
        set(20)
        assert(get() == 20)
    "#);
}

#[test]
fn test_open_upvalue_sees_local_writes() {
    run(r#"
        local x = 1
        local function read() return x end
        x = 2
        assert(read() == 2)
        local function write(v) x = v end
        write(3)
        assert(x == 3)
    "#);
}

#[test]
fn test_loop_variables_are_fresh_per_iteration() {
    run(r#"
        local fns = {}
        for i = 1, 3 do
            fns[i] = function() return i end
        end
        assert(fns[1]() == 1 and fns[2]() == 2 and fns[3]() == 3)

        local gens = {}
        for _, name in ipairs({"a", "b"}) do
            gens[#gens + 1] = function() return name end
        end
        assert(gens[1]() == "a" and gens[2]() == "b")

        local ws = {}
        local j = 0
        while j < 3 do
            j = j + 1
            local captured = j
            ws[j] = function() return captured end
        end
        assert(ws[1]() == 1 and ws[3]() == 3)
    "#);
}

#[test]
fn test_upvalue_closed_on_break() {
    run(r#"
        local f
        for i = 1, 10 do
            local v = i * 10
            f = function() return v end
            if i == 4 then break end
        end
        assert(f() == 40)
    "#);
}

#[test]
fn test_nested_upvalues() {
    run(r#"
        local function level1()
            local a = 1
            return function()
                local b = 2
                return function()
                    a = a + 1
                    return a + b
                end
            end
        end
        local f = level1()()
        assert(f() == 4)
        assert(f() == 5)
    "#);
}

#[test]
fn test_recursive_local_function() {
    run(r#"
        local function fact(n)
            if n <= 1 then return 1 end
            return n * fact(n - 1)
        end
        assert(fact(10) == 3628800)
    "#);
}

#[test]
fn test_upvalue_survives_collection() {
    run(r#"
        local function make()
            local data = {n = 0}
            return function() data.n = data.n + 1 return data.n end
        end
        local f = make()
        f()
        collectgarbage()
        collectgarbage()
        assert(f() == 2)
    "#);
}

#[test]
fn test_closures_in_coroutines_share_state() {
    run(r#"
        local total = 0
        local co = coroutine.wrap(function()
            for i = 1, 3 do
                total = total + i
                coroutine.yield(total)
            end
        end)
        assert(co() == 1)
        total = total + 100
        assert(co() == 103)
        assert(co() == 106)
        assert(total == 106)
    "#);
}
