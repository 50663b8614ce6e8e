// Tests for table semantics: length, traversal, keys
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

#[test]
fn test_length_grows_with_sequence() {
    let mut vm = new_vm();
    run(
        &mut vm,
        r#"
        local T = {}
        T[1] = 10
        T[2] = 20
        T[3] = 30
        assert(#T == 3)
        assert(T[4] == nil)
        T[4] = 40
        assert(#T == 4)
        T[4] = nil
        assert(#T == 3)
    "#,
    );
}

#[test]
fn test_length_from_host() {
    let mut vm = new_vm();
    let t = vm.create_table(0, 0);
    for (i, v) in [10.0, 20.0, 30.0].into_iter().enumerate() {
        vm.raw_set_int(t, i as i64 + 1, LuaValue::Number(v));
    }
    assert_eq!(vm.raw_get_int(t, 4), LuaValue::Nil);
    vm.set_global("T", LuaValue::Table(t)).unwrap();
    run(&mut vm, "assert(#T == 3) T[4] = 40 assert(#T == 4)");
    assert_eq!(vm.raw_get_int(t, 4), LuaValue::Number(40.0));
}

#[test]
fn test_length_with_hole_is_a_border() {
    let mut vm = new_vm();
    run(
        &mut vm,
        r#"
        local t = {1, 2, nil, 4}
        local n = #t
        assert(n == 2 or n == 4)
        assert(t[n] ~= nil and t[n + 1] == nil)

        local empty = {}
        assert(#empty == 0)
        local only_hash = {x = 1}
        assert(#only_hash == 0)
    "#,
    );
}

#[test]
fn test_constructor_forms() {
    let mut vm = new_vm();
    run(
        &mut vm,
        r#"
        local function three() return 1, 2, 3 end
        local t = {three()}
        assert(#t == 3)
        local u = {three(), three()}
        assert(#u == 4 and u[1] == 1 and u[2] == 1 and u[4] == 3)
        local v = {(three())}
        assert(#v == 1)
        local w = {x = 1, ["y z"] = 2, [10] = 3; 4, 5}
        assert(w.x == 1 and w["y z"] == 2 and w[10] == 3 and w[1] == 4 and w[2] == 5)
        local big = {}
        for i = 1, 120 do big[#big + 1] = i end
        assert(#big == 120 and big[120] == 120)
        local listed = {1,2,3,4,5,6,7,8,9,10,11,12,13,14,15,16,17,18,19,20,
                        21,22,23,24,25,26,27,28,29,30,31,32,33,34,35,36,37,38,39,40,
                        41,42,43,44,45,46,47,48,49,50,51,52,53,54,55}
        assert(#listed == 55 and listed[51] == 51)
    "#,
    );
}

#[test]
fn test_number_keys_normalize() {
    let mut vm = new_vm();
    run(
        &mut vm,
        r#"
        local t = {}
        t[1] = "a"
        assert(t[1.0] == "a")
        t[2^53] = "big"
        assert(t[2^53] == "big")
        t[1.5] = "half"
        assert(t[1.5] == "half" and t[1] == "a")
        t["1"] = "string key"
        assert(t[1] == "a" and t["1"] == "string key")
        t[-1] = "neg"
        t[0] = "zero"
        assert(t[-1] == "neg" and t[0] == "zero")
    "#,
    );
}

#[test]
fn test_invalid_keys() {
    let mut vm = new_vm();
    run(
        &mut vm,
        r#"
        local t = {}
        assert(t[nil] == nil)
        local ok, e = pcall(function() t[nil] = 1 end)
        assert(not ok)
        local ok2 = pcall(function() t[0/0] = 1 end)
        assert(not ok2)
        local ok3 = pcall(rawset, t, nil, 1)
        assert(not ok3)
    "#,
    );
    let result = vm.execute("local t = {} t[nil] = 1");
    let msg = vm.get_error_message(result.unwrap_err());
    assert!(msg.contains("table index is nil"), "got {}", msg);
    let result = vm.execute("local t = {} t[0/0] = 1");
    let msg = vm.get_error_message(result.unwrap_err());
    assert!(msg.contains("table index is NaN"), "got {}", msg);
}

#[test]
fn test_pairs_visits_everything_once() {
    let mut vm = new_vm();
    run(
        &mut vm,
        r#"
        local t = {10, 20, 30, x = 1, y = 2, [100] = 3}
        local seen, count = {}, 0
        for k, v in pairs(t) do
            assert(seen[k] == nil)
            seen[k] = v
            count = count + 1
        end
        assert(count == 6)
        assert(seen[1] == 10 and seen.x == 1 and seen[100] == 3)

        local n = 0
        for i, v in ipairs({5, 6, 7, nil, 9}) do
            n = n + 1
            assert(v == i + 4)
        end
        assert(n == 3)
    "#,
    );
}

#[test]
fn test_clearing_during_traversal() {
    let mut vm = new_vm();
    run(
        &mut vm,
        r#"
        local t = {}
        for i = 1, 50 do t["k" .. i] = i end
        for i = 1, 50 do t[i] = i end
        for k in pairs(t) do t[k] = nil end
        assert(next(t) == nil)
    "#,
    );
}

#[test]
fn test_next_errors_on_unknown_key() {
    let mut vm = new_vm();
    run(
        &mut vm,
        r#"
        local t = {a = 1}
        assert(next({}) == nil)
        local k, v = next(t)
        assert(k == "a" and v == 1)
        assert(next(t, "a") == nil)
        local ok = pcall(next, t, "missing")
        assert(not ok)
    "#,
    );
    let result = vm.execute("local x = next({a = 1}, 'zzz')");
    let msg = vm.get_error_message(result.unwrap_err());
    assert!(msg.contains("invalid key to 'next'"), "got {}", msg);
}

#[test]
fn test_insertion_during_traversal_raises() {
    let mut vm = new_vm();
    let results = vm
        .execute(
            r#"
            local t = {a = 1, b = 2, c = 3}
            return pcall(function()
                for k in pairs(t) do t[k .. "x"] = 1 end
            end)
        "#,
        )
        .unwrap();
    assert_eq!(results[0], LuaValue::Boolean(false));
    let msg = vm.to_str(&results[1]).unwrap_or_default();
    assert!(msg.contains("new key inserted during traversal"), "got {}", msg);

    run(
        &mut vm,
        r#"
        -- updating and clearing existing keys stays legal
        local u = {1, 2, 3, x = 1, y = 2}
        for k, v in pairs(u) do u[k] = v * 10 end
        assert(u[1] == 10 and u.y == 20)
        for k in pairs(u) do u[k] = nil end
        assert(next(u) == nil)

        -- a finished traversal leaves the table free to grow
        local w = {p = 1}
        for k in pairs(w) do end
        w.q = 2
        assert(next(w, "p") ~= nil or next(w, "q") ~= nil)
    "#,
    );
}

#[test]
fn test_table_keys_by_identity() {
    let mut vm = new_vm();
    run(
        &mut vm,
        r#"
        local a, b = {}, {}
        local t = {[a] = "a", [b] = "b", [true] = "yes", [print] = "fn"}
        assert(t[a] == "a" and t[b] == "b")
        assert(t[true] == "yes" and t[false] == nil)
        assert(t[print] == "fn")
    "#,
    );
}

#[test]
fn test_rehash_keeps_entries() {
    let mut vm = new_vm();
    run(
        &mut vm,
        r#"
        local t = {}
        for i = 1, 1000 do t[i * 3] = i end
        for i = 1, 1000 do t["s" .. i] = i end
        for i = 1, 1000 do
            assert(t[i * 3] == i)
            assert(t["s" .. i] == i)
        end
        for i = 1, 1000, 2 do t[i * 3] = nil end
        local count = 0
        for k in pairs(t) do count = count + 1 end
        assert(count == 1500)
    "#,
    );
}
