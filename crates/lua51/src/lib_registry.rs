// Library registration system for the standard libraries
// Provides a clean way to register Rust functions as Lua libraries

use crate::lua_value::LuaValue;
use crate::lua_vm::{CFunction, LuaResult, LuaVM};
use crate::stdlib;

/// Type for value initializers - functions that create values when the module loads
pub type ValueInitializer = fn(&mut LuaVM) -> LuaValue;

/// Entry in a library module - can be a function or a value
pub enum LibraryEntry {
    Function(CFunction),
    Value(ValueInitializer),
}

/// A library module containing multiple functions and values
pub struct LibraryModule {
    pub name: &'static str,
    pub entries: Vec<(&'static str, LibraryEntry)>,
}

impl LibraryModule {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            entries: Vec::new(),
        }
    }
}

/// Builder for creating library modules from a list of functions
#[macro_export]
macro_rules! lib_module {
    ($name:expr, {
        $($item_name:expr => $item:expr),* $(,)?
    }) => {{
        let mut module = $crate::lib_registry::LibraryModule::new($name);
        $(
            module.entries.push(($item_name, $crate::lib_registry::LibraryEntry::Function($item)));
        )*
        module
    }};
}

/// Registry for the standard libraries
pub struct LibraryRegistry {
    modules: Vec<LibraryModule>, // Use Vec to preserve insertion order
}

impl LibraryRegistry {
    pub fn new() -> Self {
        Self {
            modules: Vec::new(),
        }
    }

    pub fn register(&mut self, module: LibraryModule) {
        self.modules.push(module);
    }

    /// Load all registered libraries into a VM
    pub fn load_all(&self, vm: &mut LuaVM) -> LuaResult<()> {
        for module in &self.modules {
            self.load_module(vm, module)?;
        }
        Ok(())
    }

    /// Load one module. `_G` entries go straight into the globals; any
    /// other module becomes a global table, also recorded in the
    /// registry's `_LOADED` table.
    pub fn load_module(&self, vm: &mut LuaVM, module: &LibraryModule) -> LuaResult<()> {
        let target = if module.name == "_G" {
            vm.globals()
        } else {
            let lib_table = vm.create_table(0, module.entries.len());
            vm.set_global(module.name, LuaValue::Table(lib_table))?;
            let loaded = loaded_table(vm)?;
            let mod_key = vm.create_string(module.name);
            vm.raw_set(loaded, mod_key, LuaValue::Table(lib_table))?;
            lib_table
        };

        for (name, entry) in &module.entries {
            let value = match entry {
                LibraryEntry::Function(func) => vm.create_function(*func),
                LibraryEntry::Value(value_init) => value_init(vm),
            };
            let name_key = vm.create_string(name);
            vm.raw_set(target, name_key, value)?;
        }
        tracing::debug!(module = module.name, entries = module.entries.len(), "library loaded");
        Ok(())
    }

    pub fn get_module(&self, name: &str) -> Option<&LibraryModule> {
        self.modules.iter().find(|m| m.name == name)
    }
}

impl Default for LibraryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// `registry._LOADED`, created on first use
fn loaded_table(vm: &mut LuaVM) -> LuaResult<crate::gc::TableId> {
    let registry = vm.registry();
    let key = vm.create_string("_LOADED");
    if let LuaValue::Table(t) = vm.raw_get(registry, &key) {
        return Ok(t);
    }
    let t = vm.create_table(0, 2);
    vm.raw_set(registry, key, LuaValue::Table(t))?;
    Ok(t)
}

/// Registry holding the base and coroutine libraries
pub fn create_standard_registry() -> LibraryRegistry {
    let mut registry = LibraryRegistry::new();
    registry.register(stdlib::basic::create_basic_lib());
    registry.register(stdlib::coroutine::create_coroutine_lib());
    registry
}
