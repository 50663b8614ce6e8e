use crate::lua_value::LuaValue;
use crate::lua_value::number::number2str;
use crate::lua_vm::execute::TmKind;
use crate::lua_vm::{LuaResult, LuaVM};

impl LuaVM {
    /// Convert a number in `slot` to a string in place. False when the
    /// value is neither.
    pub(crate) fn tostring_slot(&mut self, slot: usize) -> bool {
        match self.state.stack[slot] {
            LuaValue::String(_) => true,
            LuaValue::Number(n) => {
                let s = number2str(n);
                self.state.stack[slot] = self.create_string(&s);
                true
            }
            _ => false,
        }
    }

    /// Concatenate the `total` values ending at stack slot `last`
    /// (inclusive), right to left. The result lands in the first slot.
    pub(crate) fn concat(&mut self, total: usize, last: usize) -> LuaResult<()> {
        let mut total = total;
        let mut last = last;
        while total > 1 {
            let top = last + 1;
            let mut n = 2;
            let left = self.state.stack[top - 2];
            if !(left.is_string() || left.is_number()) || !self.tostring_slot(top - 1) {
                let right = self.state.stack[top - 1];
                let tm = {
                    let tm = self.get_tm_by_obj(&left, TmKind::Concat);
                    if tm.is_nil() {
                        self.get_tm_by_obj(&right, TmKind::Concat)
                    } else {
                        tm
                    }
                };
                if tm.is_nil() {
                    return Err(self.concat_error(left, top - 2, right, top - 1));
                }
                let res = self.call_tm_res(tm, left, right)?;
                self.state.stack[top - 2] = res;
            } else if self.string_len(self.state.stack[top - 1]) == 0 {
                self.tostring_slot(top - 2);
            } else {
                self.tostring_slot(top - 2);
                while n < total && self.tostring_slot(top - n - 1) {
                    n += 1;
                }
                let mut buf = Vec::new();
                for slot in top - n..top {
                    if let LuaValue::String(s) = self.state.stack[slot] {
                        buf.extend_from_slice(self.pool[s].as_bytes());
                    }
                }
                self.state.stack[top - n] = self.create_bytes(&buf);
            }
            total -= n - 1;
            last -= n - 1;
        }
        Ok(())
    }

    fn string_len(&self, v: LuaValue) -> usize {
        match v {
            LuaValue::String(s) => self.pool[s].as_bytes().len(),
            _ => 0,
        }
    }
}
