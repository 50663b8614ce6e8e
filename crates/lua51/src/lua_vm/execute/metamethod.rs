/// Metamethod dispatch
///
/// Indexing with the bounded `__index`/`__newindex` chain, arithmetic
/// fallbacks, comparisons and length.
use crate::gc::TableId;
use crate::lua_value::LuaValue;
use crate::lua_value::number::lua_mod;
use crate::lua_vm::lua_limits::MAXTAGLOOP;
use crate::lua_vm::{LuaResult, LuaVM};

/// Tag method events, in the order their names are interned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TmKind {
    Index = 0,
    NewIndex,
    Gc,
    Mode,
    Eq,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Unm,
    Len,
    Lt,
    Le,
    Concat,
    Call,
}

pub const TM_N: usize = 17;

/// Events up to `Eq` are cached as absent in the table flags
const TM_FAST_LAST: u8 = TmKind::Eq as u8;

impl TmKind {
    pub const ALL: [TmKind; TM_N] = [
        TmKind::Index,
        TmKind::NewIndex,
        TmKind::Gc,
        TmKind::Mode,
        TmKind::Eq,
        TmKind::Add,
        TmKind::Sub,
        TmKind::Mul,
        TmKind::Div,
        TmKind::Mod,
        TmKind::Pow,
        TmKind::Unm,
        TmKind::Len,
        TmKind::Lt,
        TmKind::Le,
        TmKind::Concat,
        TmKind::Call,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            TmKind::Index => "__index",
            TmKind::NewIndex => "__newindex",
            TmKind::Gc => "__gc",
            TmKind::Mode => "__mode",
            TmKind::Eq => "__eq",
            TmKind::Add => "__add",
            TmKind::Sub => "__sub",
            TmKind::Mul => "__mul",
            TmKind::Div => "__div",
            TmKind::Mod => "__mod",
            TmKind::Pow => "__pow",
            TmKind::Unm => "__unm",
            TmKind::Len => "__len",
            TmKind::Lt => "__lt",
            TmKind::Le => "__le",
            TmKind::Concat => "__concat",
            TmKind::Call => "__call",
        }
    }
}

/// Numeric result of an arithmetic event
#[inline]
pub(crate) fn arith_op(op: TmKind, a: f64, b: f64) -> f64 {
    match op {
        TmKind::Add => a + b,
        TmKind::Sub => a - b,
        TmKind::Mul => a * b,
        TmKind::Div => a / b,
        TmKind::Mod => lua_mod(a, b),
        TmKind::Pow => a.powf(b),
        TmKind::Unm => -a,
        _ => f64::NAN,
    }
}

impl LuaVM {
    pub fn get_metatable(&self, v: &LuaValue) -> Option<TableId> {
        match v {
            LuaValue::Table(t) => self.pool[*t].table.metatable,
            LuaValue::Userdata(u) => self.pool[*u].metatable,
            _ => self.type_metatables[v.type_of() as usize],
        }
    }

    /// Metamethod lookup for the cached events; remembers misses in the
    /// table flags (any raw write to the metatable clears them)
    pub(crate) fn fast_tm(&mut self, mt: Option<TableId>, event: TmKind) -> LuaValue {
        let Some(mt) = mt else {
            return LuaValue::Nil;
        };
        let name = LuaValue::String(self.tm_names[event as usize]);
        let table = &mut self.pool[mt].table;
        if event as u8 > TM_FAST_LAST {
            return table.get(&name);
        }
        let bit = 1u8 << (event as u8);
        if table.flags & bit != 0 {
            return LuaValue::Nil;
        }
        let tm = table.get(&name);
        if tm.is_nil() {
            table.flags |= bit;
        }
        tm
    }

    pub(crate) fn get_tm_by_obj(&self, v: &LuaValue, event: TmKind) -> LuaValue {
        match self.get_metatable(v) {
            Some(mt) => {
                let name = LuaValue::String(self.tm_names[event as usize]);
                self.pool[mt].table.get(&name)
            }
            None => LuaValue::Nil,
        }
    }

    /// Call `f(a, b)` and return its first result
    pub(crate) fn call_tm_res(
        &mut self,
        f: LuaValue,
        a: LuaValue,
        b: LuaValue,
    ) -> LuaResult<LuaValue> {
        let func = self.state.stack_top;
        self.state.push(f);
        self.state.push(a);
        self.state.push(b);
        self.call(func, 1)?;
        Ok(self.state.pop())
    }

    fn call_tm(&mut self, f: LuaValue, a: LuaValue, b: LuaValue, c: LuaValue) -> LuaResult<()> {
        let func = self.state.stack_top;
        self.state.push(f);
        self.state.push(a);
        self.state.push(b);
        self.state.push(c);
        self.call(func, 0)
    }

    /// `t[key]` with `__index` handling. `slot` is the stack slot `t` came
    /// from, for error messages.
    pub fn get_table(
        &mut self,
        t: LuaValue,
        key: LuaValue,
        slot: Option<usize>,
    ) -> LuaResult<LuaValue> {
        let mut t = t;
        let mut slot = slot;
        for _ in 0..MAXTAGLOOP {
            let tm = if let LuaValue::Table(id) = t {
                let res = self.pool[id].table.get(&key);
                if !res.is_nil() {
                    return Ok(res);
                }
                let mt = self.pool[id].table.metatable;
                let tm = self.fast_tm(mt, TmKind::Index);
                if tm.is_nil() {
                    return Ok(LuaValue::Nil);
                }
                tm
            } else {
                let tm = self.get_tm_by_obj(&t, TmKind::Index);
                if tm.is_nil() {
                    return Err(self.type_error(t, slot, "index"));
                }
                tm
            };
            if tm.is_function() {
                return self.call_tm_res(tm, t, key);
            }
            t = tm;
            slot = None;
        }
        Err(self.runtime_error("loop in gettable"))
    }

    /// `t[key] = value` with `__newindex` handling
    pub fn set_table(
        &mut self,
        t: LuaValue,
        key: LuaValue,
        value: LuaValue,
        slot: Option<usize>,
    ) -> LuaResult<()> {
        let mut t = t;
        let mut slot = slot;
        for _ in 0..MAXTAGLOOP {
            let tm = if let LuaValue::Table(id) = t {
                let old = self.pool[id].table.get(&key);
                let mt = self.pool[id].table.metatable;
                let tm = if old.is_nil() {
                    self.fast_tm(mt, TmKind::NewIndex)
                } else {
                    LuaValue::Nil
                };
                if tm.is_nil() {
                    return self.raw_set(id, key, value);
                }
                tm
            } else {
                let tm = self.get_tm_by_obj(&t, TmKind::NewIndex);
                if tm.is_nil() {
                    return Err(self.type_error(t, slot, "index"));
                }
                tm
            };
            if tm.is_function() {
                return self.call_tm(tm, t, key, value);
            }
            t = tm;
            slot = None;
        }
        Err(self.runtime_error("loop in settable"))
    }

    /// Binary event handler from the first operand, else the second
    fn bin_tm(&self, a: &LuaValue, b: &LuaValue, event: TmKind) -> LuaValue {
        let tm = self.get_tm_by_obj(a, event);
        if tm.is_nil() {
            self.get_tm_by_obj(b, event)
        } else {
            tm
        }
    }

    /// Arithmetic with string coercion and metamethod fallback
    pub(crate) fn arith(
        &mut self,
        op: TmKind,
        a: LuaValue,
        b: LuaValue,
        a_slot: Option<usize>,
        b_slot: Option<usize>,
    ) -> LuaResult<LuaValue> {
        if let (Some(x), Some(y)) = (self.to_number(&a), self.to_number(&b)) {
            return Ok(LuaValue::Number(arith_op(op, x, y)));
        }
        let tm = self.bin_tm(&a, &b, op);
        if tm.is_nil() {
            return Err(self.arith_error(a, a_slot, b, b_slot));
        }
        self.call_tm_res(tm, a, b)
    }

    /// `#v` for values other than strings and tables
    pub(crate) fn obj_len(&mut self, v: LuaValue, slot: Option<usize>) -> LuaResult<LuaValue> {
        match v {
            LuaValue::Table(t) => Ok(LuaValue::Number(self.pool[t].table.length() as f64)),
            LuaValue::String(s) => Ok(LuaValue::Number(self.pool[s].as_bytes().len() as f64)),
            _ => {
                let tm = self.bin_tm(&v, &LuaValue::Nil, TmKind::Len);
                if tm.is_nil() {
                    return Err(self.type_error(v, slot, "get length of"));
                }
                self.call_tm_res(tm, v, LuaValue::Nil)
            }
        }
    }

    /// `__eq` handler shared by both operands' metatables
    fn equal_tm(&mut self, mt1: Option<TableId>, mt2: Option<TableId>) -> LuaValue {
        let tm1 = self.fast_tm(mt1, TmKind::Eq);
        if tm1.is_nil() {
            return LuaValue::Nil;
        }
        if mt1 == mt2 {
            return tm1;
        }
        let tm2 = self.fast_tm(mt2, TmKind::Eq);
        if tm2.is_nil() || tm1 != tm2 {
            return LuaValue::Nil;
        }
        tm1
    }

    /// `a == b`: raw equality, then `__eq` for two tables or two userdata
    pub fn equals(&mut self, a: LuaValue, b: LuaValue) -> LuaResult<bool> {
        let tm = match (a, b) {
            (LuaValue::Table(x), LuaValue::Table(y)) => {
                if x == y {
                    return Ok(true);
                }
                let (mt1, mt2) = (self.pool[x].table.metatable, self.pool[y].table.metatable);
                self.equal_tm(mt1, mt2)
            }
            (LuaValue::Userdata(x), LuaValue::Userdata(y)) => {
                if x == y {
                    return Ok(true);
                }
                let (mt1, mt2) = (self.pool[x].metatable, self.pool[y].metatable);
                self.equal_tm(mt1, mt2)
            }
            _ => return Ok(a == b),
        };
        if tm.is_nil() {
            return Ok(false);
        }
        Ok(self.call_tm_res(tm, a, b)?.is_truthy())
    }

    /// Result of an order event, when both operands share the handler
    fn call_order_tm(&mut self, a: LuaValue, b: LuaValue, event: TmKind) -> LuaResult<Option<bool>> {
        let tm1 = self.get_tm_by_obj(&a, event);
        if tm1.is_nil() {
            return Ok(None);
        }
        let tm2 = self.get_tm_by_obj(&b, event);
        if tm1 != tm2 {
            return Ok(None);
        }
        Ok(Some(self.call_tm_res(tm1, a, b)?.is_truthy()))
    }

    fn str_cmp(&self, a: crate::gc::StringId, b: crate::gc::StringId) -> std::cmp::Ordering {
        self.pool[a].as_bytes().cmp(self.pool[b].as_bytes())
    }

    pub fn less_than(&mut self, a: LuaValue, b: LuaValue) -> LuaResult<bool> {
        match (a, b) {
            (LuaValue::Number(x), LuaValue::Number(y)) => Ok(x < y),
            (LuaValue::String(x), LuaValue::String(y)) => Ok(self.str_cmp(x, y).is_lt()),
            _ if a.type_of() == b.type_of() => match self.call_order_tm(a, b, TmKind::Lt)? {
                Some(res) => Ok(res),
                None => Err(self.order_error(a, b)),
            },
            _ => Err(self.order_error(a, b)),
        }
    }

    /// `a <= b`, falling back to `not (b < a)` when only `__lt` exists
    pub fn less_equal(&mut self, a: LuaValue, b: LuaValue) -> LuaResult<bool> {
        match (a, b) {
            (LuaValue::Number(x), LuaValue::Number(y)) => Ok(x <= y),
            (LuaValue::String(x), LuaValue::String(y)) => Ok(self.str_cmp(x, y).is_le()),
            _ if a.type_of() == b.type_of() => {
                if let Some(res) = self.call_order_tm(a, b, TmKind::Le)? {
                    return Ok(res);
                }
                match self.call_order_tm(b, a, TmKind::Lt)? {
                    Some(res) => Ok(!res),
                    None => Err(self.order_error(a, b)),
                }
            }
            _ => Err(self.order_error(a, b)),
        }
    }
}
