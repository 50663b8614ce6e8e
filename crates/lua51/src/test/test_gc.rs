// Tests for the collector: reachability, weak tables, finalizers
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
fn test_full_collection_is_idempotent() {
    let mut vm = new_vm();
    run(
        &mut vm,
        r#"
        local junk = {}
        for i = 1, 500 do junk[i] = {i, tostring(i)} end
        junk = nil
        keep = {1, 2, 3}
    "#,
    );
    vm.full_gc().unwrap();
    let objects = vm.object_count();
    vm.full_gc().unwrap();
    assert_eq!(vm.object_count(), objects);
}

#[test]
fn test_collection_frees_garbage() {
    let mut vm = new_vm();
    // the first compilation fixes the reserved words in the string table
    run(&mut vm, "local warmup = 1");
    vm.full_gc().unwrap();
    let baseline = vm.object_count();
    run(
        &mut vm,
        r#"
        for i = 1, 1000 do local t = {x = i} end
    "#,
    );
    vm.full_gc().unwrap();
    assert_eq!(vm.object_count(), baseline);
    let stats = vm.gc_stats();
    assert!(stats.cycles >= 2);
    assert!(stats.objects_freed >= 1000);
}

#[test]
fn test_reachable_objects_survive() {
    let mut vm = new_vm();
    run(
        &mut vm,
        r#"
        data = {list = {}, name = "root"}
        for i = 1, 100 do data.list[i] = {value = i} end
        local cycle = {}
        cycle.self = cycle
        data.cycle = cycle
    "#,
    );
    vm.full_gc().unwrap();
    vm.full_gc().unwrap();
    run(
        &mut vm,
        r#"
        assert(data.name == "root")
        for i = 1, 100 do assert(data.list[i].value == i) end
        assert(data.cycle.self == data.cycle)
    "#,
    );
}

#[test]
fn test_cycles_are_collected() {
    let mut vm = new_vm();
    // the first compilation fixes the reserved words in the string table
    run(&mut vm, "local warmup = 1");
    vm.full_gc().unwrap();
    let baseline = vm.object_count();
    run(
        &mut vm,
        r#"
        local a, b = {}, {}
        a.other = b
        b.other = a
        local f
        f = function() return f end
    "#,
    );
    vm.full_gc().unwrap();
    assert_eq!(vm.object_count(), baseline);
}

#[test]
fn test_incremental_steps_finish_a_cycle() {
    let mut vm = new_vm();
    run(
        &mut vm,
        r#"
        local t = {}
        for i = 1, 2000 do t[i] = {i} end
        local finished = false
        for i = 1, 100000 do
            if collectgarbage("step", 1) then finished = true break end
        end
        assert(finished)
        for i = 1, 2000 do assert(t[i][1] == i) end
    "#,
    );
}

#[test]
fn test_allocation_drives_collection() {
    let mut vm = new_vm();
    let before = vm.gc_stats().cycles;
    run(
        &mut vm,
        r#"
        for i = 1, 200000 do local t = {i, i + 1} end
    "#,
    );
    assert!(vm.gc_stats().cycles > before);
    // garbage does not pile up while the collector keeps pace
    assert!(vm.gc_total_bytes() < 64 * 1024 * 1024);
}

#[test]
fn test_stop_and_restart() {
    let mut vm = new_vm();
    run(
        &mut vm,
        r#"
        collectgarbage("stop")
        local before = collectgarbage("count")
        for i = 1, 5000 do local t = {} end
        assert(collectgarbage("count") > before)
        collectgarbage("restart")
        collectgarbage()
        assert(collectgarbage("count") < before + 64)
        local old = collectgarbage("setpause", 150)
        assert(old == 200)
        assert(collectgarbage("setpause", old) == 150)
        local oldmul = collectgarbage("setstepmul", 400)
        assert(oldmul == 200)
        collectgarbage("setstepmul", oldmul)
        assert(type(gcinfo()) == "number")
        assert(not pcall(collectgarbage, "bogus"))
    "#,
    );
}

#[test]
fn test_weak_keys() {
    let mut vm = new_vm();
    run(
        &mut vm,
        r#"
        local t = setmetatable({}, {__mode = "k"})
        t[{}] = 1
        local strong = {}
        t[strong] = 2
        collectgarbage()
        local n = 0
        for k, v in pairs(t) do n = n + 1 end
        assert(n == 1)
        assert(t[strong] == 2)
    "#,
    );
}

#[test]
fn test_weak_values() {
    let mut vm = new_vm();
    run(
        &mut vm,
        r#"
        local cache = setmetatable({}, {__mode = "v"})
        cache[1] = {}
        cache[2] = "strings are not collected from weak tables"
        cache[3] = 42
        local held = {}
        cache[4] = held
        collectgarbage()
        assert(cache[1] == nil)
        assert(cache[2] == "strings are not collected from weak tables")
        assert(cache[3] == 42)
        assert(cache[4] == held)
    "#,
    );
}

#[test]
fn test_weak_keys_and_values() {
    let mut vm = new_vm();
    run(
        &mut vm,
        r#"
        local t = setmetatable({}, {__mode = "kv"})
        local k = {}
        t[k] = {}
        t[{}] = k
        t.name = {}
        collectgarbage()
        assert(next(t) == nil)
    "#,
    );
}

#[test]
fn test_finalizer_runs_once() {
    let mut vm = new_vm();
    run(
        &mut vm,
        r#"
        local count = 0
        do
            local p = newproxy(true)
            getmetatable(p).__gc = function(u)
                assert(type(u) == "userdata")
                count = count + 1
            end
        end
        collectgarbage()
        collectgarbage()
        collectgarbage()
        assert(count == 1)
    "#,
    );
}

#[test]
fn test_finalizer_can_resurrect() {
    let mut vm = new_vm();
    run(
        &mut vm,
        r#"
        local saved
        do
            local p = newproxy(true)
            getmetatable(p).__gc = function(u) saved = u end
        end
        collectgarbage()
        assert(type(saved) == "userdata")
        collectgarbage()
        assert(type(saved) == "userdata")
    "#,
    );
}

#[test]
fn test_finalizer_errors_are_contained() {
    let mut vm = new_vm();
    run(
        &mut vm,
        r#"
        local after = false
        do
            local p = newproxy(true)
            getmetatable(p).__gc = function() error("finalizer failure") end
        end
        collectgarbage()
        after = true
        assert(after)
    "#,
    );
}

#[test]
fn test_proxies_share_metatables() {
    let mut vm = new_vm();
    run(
        &mut vm,
        r#"
        local a = newproxy(true)
        local b = newproxy(a)
        assert(getmetatable(a) == getmetatable(b))
        assert(not pcall(newproxy, {}))
    "#,
    );
}

#[test]
fn test_close_runs_pending_finalizers() {
    let mut vm = new_vm();
    run(
        &mut vm,
        r#"
        keep = newproxy(true)
        getmetatable(keep).__gc = function() finalized = true end
    "#,
    );
    assert_eq!(vm.get_global("finalized"), LuaValue::Nil);
    vm.close();
    assert_eq!(vm.get_global("finalized"), LuaValue::Boolean(true));
}

#[test]
fn test_host_userdata() {
    let mut vm = new_vm();
    let ud = vm.create_userdata(Box::new(41_i32));
    vm.set_global("handle", LuaValue::Userdata(ud)).unwrap();
    run(&mut vm, "assert(type(handle) == 'userdata')");
    vm.full_gc().unwrap();
    let data = vm.pool[ud].data.downcast_ref::<i32>().copied();
    assert_eq!(data, Some(41));
}

#[test]
fn test_string_interning() {
    let mut vm = new_vm();
    let a = vm.intern(b"hello");
    let b = vm.intern(b"hello");
    assert_eq!(a, b);
    let c = vm.intern(b"world");
    assert_ne!(a, c);

    let results = vm.execute("local h = 'hel' return h .. 'lo'").unwrap();
    assert_eq!(results[0], LuaValue::String(a));

    // interning survives collection while referenced, and equal bytes
    // map to one object afterwards too
    vm.set_global("greeting", LuaValue::String(a)).unwrap();
    vm.full_gc().unwrap();
    assert_eq!(vm.intern(b"hello"), a);
    assert_eq!(vm.string_bytes(a), b"hello");
}

#[test]
fn test_strings_with_embedded_zeros() {
    let mut vm = new_vm();
    let a = vm.intern(b"a\0b");
    let b = vm.intern(b"a\0c");
    assert_ne!(a, b);
    assert_eq!(vm.string_bytes(a).len(), 3);
    run(&mut vm, "local s = 'x\\0y' assert(s ~= 'x') assert(s == 'x\\0y')");
}

#[test]
fn test_memory_limit_raises_not_enough_memory() {
    let mut vm = LuaVM::new(SafeOption {
        max_memory_limit: 2 * 1024 * 1024,
        ..SafeOption::default()
    });
    vm.open_stdlib(crate::stdlib::Stdlib::All).unwrap();
    let result = vm.execute("local t = {} for i = 1, 1e7 do t[i] = {} end");
    let err = result.unwrap_err();
    assert_eq!(err, LuaError::MemoryError);
    assert_eq!(vm.get_error_message(err), "not enough memory");

    // the runtime recovers once the garbage is gone
    run(&mut vm, "local x = {1, 2, 3} assert(#x == 3)");

    let results = vm
        .execute("local ok, e = pcall(function() local t = {} for i = 1, 1e7 do t[i] = {} end end) return e")
        .unwrap();
    assert_eq!(vm.to_str(&results[0]).as_deref(), Some("not enough memory"));
}

#[test]
fn test_roots_survive_repeated_cycles() {
    let mut vm = new_vm();
    run(&mut vm, "counter = {n = 0}");
    for _ in 0..4 {
        vm.full_gc().unwrap();
    }
    run(
        &mut vm,
        r#"
        local keep = {value = 42}
        collectgarbage()
        collectgarbage()
        collectgarbage()
        for i = 1, 200000 do local t = {i} end
        assert(keep.value == 42)
        assert(type(print) == "function")
        counter.n = counter.n + 1
    "#,
    );
    for _ in 0..3 {
        vm.full_gc().unwrap();
        run(&mut vm, "counter.n = counter.n + 1 assert(tostring(counter.n) ~= nil)");
    }
    let results = vm.execute("return counter.n, type(print)").unwrap();
    assert_eq!(results[0], LuaValue::Number(4.0));
    assert_eq!(vm.to_str(&results[1]).as_deref(), Some("function"));
    assert!(vm.gc_stats().cycles >= 10);
}

#[test]
fn test_loaded_chunk_outlives_collection() {
    let mut vm = new_vm();
    let g = vm.load(b"return 'still here'", "=g").unwrap();
    run(&mut vm, "for i = 1, 200000 do local t = {i} end");
    vm.full_gc().unwrap();
    vm.full_gc().unwrap();
    let results = vm.call_function(g, &[]).unwrap();
    assert_eq!(vm.to_str(&results[0]).as_deref(), Some("still here"));

    // once released it is ordinary garbage
    let LuaValue::Function(id) = g else {
        panic!("load returned {:?}", g);
    };
    assert!(vm.unpin(&g));
    assert!(!vm.unpin(&g));
    vm.full_gc().unwrap();
    assert!(vm.pool.functions.get(id.index, id.generation).is_none());
}

#[test]
fn test_pinned_host_values() {
    let mut vm = new_vm();
    let t = vm.create_table(0, 1);
    let key = vm.create_string("answer");
    vm.raw_set(t, key, LuaValue::Number(42.0)).unwrap();
    let value = LuaValue::Table(t);
    vm.pin(value);
    vm.pin(value);
    run(&mut vm, "for i = 1, 100000 do local t = {i} end");
    vm.full_gc().unwrap();
    assert!(vm.unpin(&value));
    vm.full_gc().unwrap();
    let key = vm.create_string("answer");
    assert_eq!(vm.raw_get(t, &key), LuaValue::Number(42.0));
    assert!(vm.unpin(&value));
    vm.full_gc().unwrap();
    assert!(vm.pool.tables.get(t.index, t.generation).is_none());

    // non-collectable values need no pin
    vm.pin(LuaValue::Number(1.0));
    assert!(!vm.unpin(&LuaValue::Number(1.0)));
}
