//! Statement execution.

use super::{Deferred, Flow, Frame, Machine, Place, VmError};
use crate::ast::{AssignOp, BinaryOp, BranchOp, Decl, Expr, IncDecOp, NameKind, NodeId, Stmt};
use crate::object::{Handle, MapKey, ObjectBody, Value};

impl Machine<'_, '_> {
    pub(super) fn exec_list(&mut self, frame: &Frame, stmts: &[NodeId]) -> Result<Flow, VmError> {
        for &s in stmts {
            match self.exec(frame, s)? {
                Flow::Normal => {}
                other => return Ok(other),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec(&mut self, frame: &Frame, id: NodeId) -> Result<Flow, VmError> {
        self.step()?;
        let pkg = frame.pkg.clone();
        let Some(stmt) = pkg.tree.stmt(id) else {
            return Err(VmError::invalid(format!("{id} is not a statement")));
        };
        match stmt {
            Stmt::Assign { lhs, op, rhs } => {
                self.exec_assign(frame, lhs, *op, rhs)?;
                Ok(Flow::Normal)
            }
            Stmt::Block { body } | Stmt::IfCase { body } | Stmt::SwitchClause { body, .. } => {
                let inner = self.enter_block(frame, id)?;
                self.exec_list(&inner, body)
            }
            Stmt::Branch { op, depth, .. } => Ok(match op {
                BranchOp::Break => Flow::Break(*depth),
                BranchOp::Continue => Flow::Continue(*depth),
            }),
            Stmt::Decl { decls } => {
                for &d in decls {
                    match pkg.tree.decl(d) {
                        Some(Decl::Value { names, ty, values, .. }) => {
                            self.exec_value_decl(frame, names, *ty, values)?;
                        }
                        Some(Decl::Import { .. }) => {}
                        _ => return Err(VmError::invalid("only var and const declarations may appear in a function")),
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::Defer { call } => {
                let Some(Expr::Call {
                    func,
                    args,
                    with_cross,
                }) = pkg.tree.expr(*call)
                else {
                    return Err(VmError::invalid("defer requires a function call"));
                };
                let callee = self.eval(frame, *func)?;
                let args = self.eval_args(frame, args)?;
                let deferred = Deferred {
                    callee,
                    args,
                    with_cross: *with_cross,
                };
                self.defers
                    .last_mut()
                    .ok_or_else(|| VmError::invalid("defer outside of a function"))?
                    .push(deferred);
                Ok(Flow::Normal)
            }
            Stmt::Empty => Ok(Flow::Normal),
            Stmt::Expr { x } => {
                self.eval(frame, *x)?;
                Ok(Flow::Normal)
            }
            Stmt::For {
                init,
                cond,
                post,
                body,
                loop_vars,
            } => self.exec_for(frame, id, *init, *cond, *post, body, *loop_vars),
            Stmt::If { init, cond, then, els } => {
                let inner = self.enter_block(frame, id)?;
                if let Some(init) = init {
                    self.exec(&inner, *init)?;
                }
                if self.eval_bool(&inner, *cond)? {
                    self.exec(&inner, *then)
                } else if let Some(els) = els {
                    self.exec(&inner, *els)
                } else {
                    Ok(Flow::Normal)
                }
            }
            Stmt::IncDec { x, op } => {
                let place = self.eval_place(frame, *x)?;
                let Value::Int(n) = self.load(&place)? else {
                    return Err(VmError::invalid("++ and -- need an int operand"));
                };
                let next = match op {
                    IncDecOp::Inc => n.checked_add(1),
                    IncDecOp::Dec => n.checked_sub(1),
                }
                .ok_or(VmError::Overflow)?;
                self.store_at(&place, Value::Int(next))?;
                Ok(Flow::Normal)
            }
            Stmt::Range {
                x,
                key,
                value,
                define,
                body,
            } => self.exec_range(frame, id, *x, *key, *value, *define, body),
            Stmt::Return { results } => {
                let mut values = self.eval_args(frame, results)?;
                if let [Value::Tuple(items)] = values.as_mut_slice() {
                    values = std::mem::take(items);
                }
                let values = values
                    .into_iter()
                    .map(|v| self.copy_value(v))
                    .collect::<Result<_, _>>()?;
                Ok(Flow::Return(values))
            }
            Stmt::Switch { init, x, clauses } => self.exec_switch(frame, id, *init, *x, clauses),
        }
    }

    fn exec_assign(&mut self, frame: &Frame, lhs: &[NodeId], op: AssignOp, rhs: &[NodeId]) -> Result<(), VmError> {
        let arith = match op {
            AssignOp::AddAssign => Some(BinaryOp::Add),
            AssignOp::SubAssign => Some(BinaryOp::Sub),
            AssignOp::MulAssign => Some(BinaryOp::Mul),
            AssignOp::Assign | AssignOp::Define => None,
        };
        if let Some(bop) = arith {
            let (&[target], &[operand]) = (lhs, rhs) else {
                return Err(VmError::invalid("compound assignment takes one operand on each side"));
            };
            let place = self.eval_place(frame, target)?;
            let current = self.load(&place)?;
            let operand = self.eval(frame, operand)?;
            let next = self.binary(bop, current, operand)?;
            return self.store_at(&place, next);
        }

        let values = self.eval_multi(frame, lhs.len(), rhs)?;
        for (&target, value) in lhs.iter().zip(values) {
            self.assign_to(frame, target, value)?;
        }
        Ok(())
    }

    /// Evaluates the right-hand side of an assignment or declaration of
    /// `n` names, expanding comma-ok forms and multi-value calls.
    fn eval_multi(&mut self, frame: &Frame, n: usize, rhs: &[NodeId]) -> Result<Vec<Value>, VmError> {
        let values = if n == 2 && rhs.len() == 1 {
            match self.eval_comma_ok(frame, rhs[0])? {
                Some((v, ok)) => vec![v, Value::Bool(ok)],
                None => self.eval_tuple(frame, rhs[0])?,
            }
        } else if n > 1 && rhs.len() == 1 {
            self.eval_tuple(frame, rhs[0])?
        } else {
            self.eval_args(frame, rhs)?
        };
        if values.len() != n {
            return Err(VmError::invalid(format!(
                "assignment mismatch: {n} variables but {} values",
                values.len()
            )));
        }
        values.into_iter().map(|v| self.copy_value(v)).collect()
    }

    fn eval_tuple(&mut self, frame: &Frame, id: NodeId) -> Result<Vec<Value>, VmError> {
        match self.eval(frame, id)? {
            Value::Tuple(items) => Ok(items),
            single => Ok(vec![single]),
        }
    }

    pub(super) fn exec_value_decl(
        &mut self,
        frame: &Frame,
        names: &[NodeId],
        ty: Option<NodeId>,
        values: &[NodeId],
    ) -> Result<(), VmError> {
        let values = if values.is_empty() {
            let ty = match ty {
                Some(t) => self.eval_type(frame, t)?,
                None => return Err(VmError::invalid("declaration without type or value")),
            };
            names.iter().map(|_| self.zero(&ty)).collect::<Result<Vec<_>, _>>()?
        } else {
            self.eval_multi(frame, names.len(), values)?
        };
        for (&name, value) in names.iter().zip(values) {
            self.assign_to(frame, name, value)?;
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn exec_for(
        &mut self,
        frame: &Frame,
        id: NodeId,
        init: Option<NodeId>,
        cond: Option<NodeId>,
        post: Option<NodeId>,
        body: &[NodeId],
        loop_vars: u16,
    ) -> Result<Flow, VmError> {
        let inner = self.enter_block(frame, id)?;
        if let Some(init) = init {
            self.exec(&inner, init)?;
        }
        loop {
            self.step()?;
            if let Some(cond) = cond
                && !self.eval_bool(&inner, cond)?
            {
                break;
            }
            match self.exec_list(&inner, body)? {
                Flow::Normal | Flow::Continue(0) => {}
                Flow::Break(0) => break,
                Flow::Break(d) => return Ok(Flow::Break(d - 1)),
                Flow::Continue(d) => return Ok(Flow::Continue(d - 1)),
                ret @ Flow::Return(_) => return Ok(ret),
            }
            self.rebox_loop_vars(&inner, id, loop_vars)?;
            if let Some(post) = post {
                self.exec(&inner, post)?;
            }
        }
        Ok(Flow::Normal)
    }

    /// Gives each boxed loop variable a fresh cell holding its current
    /// value, so closures from earlier iterations keep their own copy.
    fn rebox_loop_vars(&mut self, frame: &Frame, id: NodeId, loop_vars: u16) -> Result<(), VmError> {
        let block = self.frame_block(frame)?;
        let scope = self.scope_of(&frame.pkg, id)?;
        for i in 0..loop_vars {
            let boxed = frame.pkg.scopes.slot(scope, i).is_some_and(|s| s.heap_item);
            if !boxed {
                continue;
            }
            if let Value::HeapItem(cell) = self.store.elem(block, i as u32)? {
                let current = self.store.elem(cell, 0)?;
                let fresh = self.alloc(ObjectBody::HeapItem { value: current })?;
                let slot = Place::Slot {
                    base: block,
                    index: i as u32,
                };
                self.store_at(&slot, Value::HeapItem(fresh))?;
            }
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn exec_range(
        &mut self,
        frame: &Frame,
        id: NodeId,
        x: NodeId,
        key: Option<NodeId>,
        value: Option<NodeId>,
        define: bool,
        body: &[NodeId],
    ) -> Result<Flow, VmError> {
        let inner = self.enter_block(frame, id)?;
        let subject = self.eval(&inner, x)?;
        let items = self.range_items(subject)?;
        for i in 0..items.len() {
            self.step()?;
            let (k, v) = self.range_item(&items, i)?;
            for (target, v) in [(key, k), (value, v)] {
                let Some(target) = target else {
                    continue;
                };
                let v = self.copy_value(v)?;
                if define {
                    self.assign_to(&inner, target, v)?;
                } else {
                    let place = self.eval_place(&inner, target)?;
                    self.store_at(&place, v)?;
                }
            }
            match self.exec_list(&inner, body)? {
                Flow::Normal | Flow::Continue(0) => {}
                Flow::Break(0) => break,
                Flow::Break(d) => return Ok(Flow::Break(d - 1)),
                Flow::Continue(d) => return Ok(Flow::Continue(d - 1)),
                ret @ Flow::Return(_) => return Ok(ret),
            }
        }
        Ok(Flow::Normal)
    }

    fn range_items(&mut self, subject: Value) -> Result<RangeItems, VmError> {
        Ok(match subject {
            Value::Nil => RangeItems::Pairs(Vec::new()),
            Value::Int(n) => RangeItems::Count(n.max(0)),
            Value::String(s) => RangeItems::Pairs(
                s.char_indices()
                    .map(|(i, c)| (Value::Int(i as i64), Value::Int(c as i64)))
                    .collect(),
            ),
            Value::Slice { list, offset, len } => RangeItems::Elems {
                base: list,
                offset,
                len,
            },
            Value::Array(h) => RangeItems::Elems {
                base: h,
                offset: 0,
                len: self.store.len(h)? as u32,
            },
            Value::Map(h) => RangeItems::Pairs(
                self.store
                    .map_entries(h)?
                    .into_iter()
                    .map(|(k, v)| (MapKey::to_value(&k), v))
                    .collect(),
            ),
            Value::Pointer { .. } => {
                let target = self.deref(&subject)?;
                return self.range_items(target);
            }
            other => return Err(VmError::invalid(format!("cannot range over {}", other.kind()))),
        })
    }

    fn range_item(&mut self, items: &RangeItems, i: usize) -> Result<(Value, Value), VmError> {
        Ok(match items {
            RangeItems::Count(_) => (Value::Int(i as i64), Value::Int(i as i64)),
            RangeItems::Elems { base, offset, .. } => (Value::Int(i as i64), self.store.elem(*base, offset + i as u32)?),
            RangeItems::Pairs(pairs) => pairs[i].clone(),
        })
    }

    fn exec_switch(
        &mut self,
        frame: &Frame,
        id: NodeId,
        init: Option<NodeId>,
        tag: Option<NodeId>,
        clauses: &[NodeId],
    ) -> Result<Flow, VmError> {
        let inner = self.enter_block(frame, id)?;
        if let Some(init) = init {
            self.exec(&inner, init)?;
        }
        let tag = match tag {
            Some(t) => Some(self.eval(&inner, t)?),
            None => None,
        };

        let pkg = frame.pkg.clone();
        let mut chosen = None;
        let mut default = None;
        'clauses: for &c in clauses {
            let Some(Stmt::SwitchClause { cases, .. }) = pkg.tree.stmt(c) else {
                return Err(VmError::invalid("switch clause expected"));
            };
            if cases.is_empty() {
                default = Some(c);
                continue;
            }
            for &case in cases {
                let hit = match &tag {
                    Some(tag) => {
                        let v = self.eval(&inner, case)?;
                        self.values_equal(tag, &v)?
                    }
                    None => self.eval_bool(&inner, case)?,
                };
                if hit {
                    chosen = Some(c);
                    break 'clauses;
                }
            }
        }

        let Some(clause) = chosen.or(default) else {
            return Ok(Flow::Normal);
        };
        Ok(match self.exec(&inner, clause)? {
            Flow::Break(0) => Flow::Normal,
            Flow::Break(d) => Flow::Break(d - 1),
            other => other,
        })
    }

    /// Binds `value` to an assignment target. Defining occurrences write
    /// the slot directly; boxed definitions get a fresh cell.
    pub(super) fn assign_to(&mut self, frame: &Frame, target: NodeId, value: Value) -> Result<(), VmError> {
        let pkg = frame.pkg.clone();
        if let Some(name) = pkg.tree.name_expr(target) {
            let path = name
                .path
                .as_ref()
                .ok_or_else(|| VmError::invalid(format!("unresolved name {}", name.name)))?;
            if path.is_blank() {
                return Ok(());
            }
            match name.kind {
                NameKind::Define => {
                    let place = self.locate(frame, path.depth, path.index)?;
                    return self.store_at(&place, value);
                }
                NameKind::HeapDefine => {
                    let cell = self.alloc(ObjectBody::HeapItem { value })?;
                    let place = self.locate(frame, path.depth, path.index)?;
                    return self.store_at(&place, Value::HeapItem(cell));
                }
                NameKind::Normal | NameKind::HeapUse | NameKind::HeapClosure => {}
            }
        }
        let place = self.eval_place(frame, target)?;
        self.store_at(&place, value)
    }

    pub(super) fn eval_args(&mut self, frame: &Frame, args: &[NodeId]) -> Result<Vec<Value>, VmError> {
        args.iter().map(|&a| self.eval(frame, a)).collect()
    }

    pub(super) fn eval_bool(&mut self, frame: &Frame, id: NodeId) -> Result<bool, VmError> {
        match self.eval(frame, id)? {
            Value::Bool(b) => Ok(b),
            other => Err(VmError::invalid(format!("non-boolean condition of kind {}", other.kind()))),
        }
    }
}

/// What a range statement iterates over, fixed when the loop starts.
enum RangeItems {
    Count(i64),
    Elems { base: Handle, offset: u32, len: u32 },
    Pairs(Vec<(Value, Value)>),
}

impl RangeItems {
    fn len(&self) -> usize {
        match self {
            RangeItems::Count(n) => *n as usize,
            RangeItems::Elems { len, .. } => *len as usize,
            RangeItems::Pairs(pairs) => pairs.len(),
        }
    }
}
