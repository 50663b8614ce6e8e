// Lua 5.1 standard libraries: the base library and coroutines

pub mod basic;
pub mod coroutine;

use crate::lib_registry::create_standard_registry;
use crate::lua_vm::{LuaResult, LuaVM};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stdlib {
    Basic,
    Coroutine,

    All,
}

impl Stdlib {
    fn module_name(self) -> Option<&'static str> {
        match self {
            Stdlib::Basic => Some("_G"),
            Stdlib::Coroutine => Some("coroutine"),
            Stdlib::All => None,
        }
    }
}

pub fn open(vm: &mut LuaVM, lib: Stdlib) -> LuaResult<()> {
    let registry = create_standard_registry();
    match lib.module_name() {
        None => registry.load_all(vm),
        Some(name) => match registry.get_module(name) {
            Some(module) => registry.load_module(vm, module),
            None => Ok(()),
        },
    }
}
