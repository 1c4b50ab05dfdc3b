//! Universe builtin functions and value rendering.

use super::{GasCategory, Machine, VmError};
use crate::object::{ObjectBody, Value};
use crate::preprocess::Universal;
use crate::realm::Banker;
use crate::types::address::Address;

/// Nesting past which [`Machine::render`] elides values.
const MAX_RENDER_DEPTH: usize = 8;

impl Machine<'_, '_> {
    pub(super) fn call_builtin(&mut self, u: Universal, args: Vec<Value>) -> Result<Value, VmError> {
        let args = super::spread(args, u.arity().unwrap_or(usize::MAX));
        if let Some(n) = u.arity()
            && args.len() != n
        {
            return Err(VmError::InvalidCall {
                reason: format!("{} takes {n} arguments, got {}", u.name(), args.len()),
            });
        }
        match u {
            Universal::Len => self.builtin_len(&args[0]),
            Universal::Append => self.builtin_append(args),
            Universal::Panic => Err(VmError::Panic(self.render(&args[0])?)),
            Universal::Crossing => Ok(Value::Tuple(Vec::new())),
            Universal::Cross => Err(VmError::InvalidCall {
                reason: "cross can only wrap the function of a call".into(),
            }),
            Universal::CurrentRealm => {
                self.gas.charge_units(GasCategory::Builtin, 1)?;
                Ok(Value::String(self.realms.current().address.to_string()))
            }
            Universal::PreviousRealm => {
                self.gas.charge_units(GasCategory::Builtin, 1)?;
                Ok(Value::String(self.realms.previous()?.address.to_string()))
            }
            Universal::SendCoins => {
                self.gas.charge_units(GasCategory::Builtin, 1)?;
                let from = parse_address(&args[0])?;
                let to = parse_address(&args[1])?;
                let Value::Int(amount) = args[2] else {
                    return Err(VmError::invalid("sendCoins amount must be an int"));
                };
                Banker::new(self.store.kv_mut()).send_coins(&self.realms, &from, &to, amount)?;
                Ok(Value::Tuple(Vec::new()))
            }
            Universal::BalanceOf => {
                self.gas.charge_units(GasCategory::Builtin, 1)?;
                let address = parse_address(&args[0])?;
                let balance = Banker::new(self.store.kv_mut()).balance(&address)?;
                Ok(Value::Int(i64::try_from(balance).map_err(|_| VmError::Overflow)?))
            }
            other => Err(VmError::InvalidCall {
                reason: format!("{} is not a function", other.name()),
            }),
        }
    }

    fn builtin_len(&mut self, v: &Value) -> Result<Value, VmError> {
        let n = match v {
            Value::Nil => 0,
            Value::String(s) => s.len(),
            Value::Slice { len, .. } => *len as usize,
            Value::Array(h) | Value::Map(h) => self.store.len(*h)?,
            other => return Err(VmError::invalid(format!("invalid argument of kind {} for len", other.kind()))),
        };
        Ok(Value::Int(n as i64))
    }

    /// Appends in place when the slice ends at the end of its list, and
    /// copies into a new list otherwise.
    fn builtin_append(&mut self, mut args: Vec<Value>) -> Result<Value, VmError> {
        if args.is_empty() {
            return Err(VmError::InvalidCall {
                reason: "append needs a slice".into(),
            });
        }
        let base = args.remove(0);
        let extra = args
            .into_iter()
            .map(|v| self.copy_value(v))
            .collect::<Result<Vec<_>, _>>()?;
        match base {
            Value::Nil => {
                let len = extra.len() as u32;
                let list = self.alloc(ObjectBody::List { elems: extra })?;
                Ok(Value::Slice { list, offset: 0, len })
            }
            Value::Slice { list, offset, len } => {
                let total = self.store.len(list)?;
                if (offset + len) as usize == total {
                    self.check_write(list)?;
                    self.gas
                        .charge_units(GasCategory::Allocation, extra.len() as u64)?;
                    let added = extra.len() as u32;
                    for v in extra {
                        self.store.list_push(list, v)?;
                    }
                    return Ok(Value::Slice {
                        list,
                        offset,
                        len: len + added,
                    });
                }
                let ObjectBody::List { elems } = self.store.body(list)? else {
                    return Err(VmError::invalid("slice over a non-list object"));
                };
                let mut elems = elems
                    .get(offset as usize..(offset + len) as usize)
                    .ok_or(VmError::IndexOutOfRange {
                        index: (offset + len) as i64,
                        len: elems.len(),
                    })?
                    .to_vec();
                elems.extend(extra);
                let len = elems.len() as u32;
                let list = self.alloc(ObjectBody::List { elems })?;
                Ok(Value::Slice { list, offset: 0, len })
            }
            other => Err(VmError::invalid(format!("first argument to append is a {}", other.kind()))),
        }
    }

    /// Human-readable form of a value, as shown in receipts and panics.
    pub fn render(&mut self, v: &Value) -> Result<String, VmError> {
        let mut out = String::new();
        self.render_into(v, &mut out, 0)?;
        Ok(out)
    }

    fn render_into(&mut self, v: &Value, out: &mut String, depth: usize) -> Result<(), VmError> {
        if depth > MAX_RENDER_DEPTH {
            out.push_str("...");
            return Ok(());
        }
        match v {
            Value::Nil => out.push_str("nil"),
            Value::Bool(b) => out.push_str(&b.to_string()),
            Value::Int(n) => out.push_str(&n.to_string()),
            Value::String(s) => out.push_str(s),
            Value::Struct(h) => {
                let ObjectBody::Struct { fields, .. } = self.store.body(*h)?.clone() else {
                    return Err(VmError::invalid("struct value without a struct object"));
                };
                out.push('{');
                self.render_list(&fields, out, depth)?;
                out.push('}');
            }
            Value::Array(h) => {
                let ObjectBody::Array { elems } = self.store.body(*h)?.clone() else {
                    return Err(VmError::invalid("array value without an array object"));
                };
                out.push('[');
                self.render_list(&elems, out, depth)?;
                out.push(']');
            }
            Value::Slice { list, offset, len } => {
                let ObjectBody::List { elems } = self.store.body(*list)? else {
                    return Err(VmError::invalid("slice over a non-list object"));
                };
                let window = elems
                    .get(*offset as usize..(*offset + *len) as usize)
                    .unwrap_or_default()
                    .to_vec();
                out.push('[');
                self.render_list(&window, out, depth)?;
                out.push(']');
            }
            Value::Map(h) => {
                out.push_str("map[");
                for (i, (k, v)) in self.store.map_entries(*h)?.into_iter().enumerate() {
                    if i > 0 {
                        out.push(' ');
                    }
                    self.render_into(&k.to_value(), out, depth + 1)?;
                    out.push(':');
                    self.render_into(&v, out, depth + 1)?;
                }
                out.push(']');
            }
            Value::Pointer { base, index } => {
                out.push('&');
                let target = self.store.elem(*base, *index)?;
                self.render_into(&target, out, depth + 1)?;
            }
            Value::HeapItem(cell) => {
                let inner = self.store.elem(*cell, 0)?;
                self.render_into(&inner, out, depth)?;
            }
            Value::Closure(_) | Value::Func { .. } | Value::Bound { .. } => out.push_str("func"),
            Value::Builtin(u) => out.push_str(u.name()),
            Value::Package(path) => {
                out.push_str("package ");
                out.push_str(path);
            }
            Value::Type(t) => out.push_str(&t.to_string()),
            Value::Tuple(items) => {
                out.push('(');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    self.render_into(item, out, depth + 1)?;
                }
                out.push(')');
            }
        }
        Ok(())
    }

    fn render_list(&mut self, items: &[Value], out: &mut String, depth: usize) -> Result<(), VmError> {
        for (i, item) in items.iter().enumerate() {
            if i > 0 {
                out.push(' ');
            }
            self.render_into(item, out, depth + 1)?;
        }
        Ok(())
    }
}

fn parse_address(v: &Value) -> Result<Address, VmError> {
    match v {
        Value::String(s) => Address::parse(s).ok_or_else(|| VmError::invalid(format!("invalid address {s:?}"))),
        other => Err(VmError::invalid(format!("address must be a string, got {}", other.kind()))),
    }
}
