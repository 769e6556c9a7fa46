//! Tree-walking evaluator.
//!
//! Non-local control flow travels as the error side of [`EvalResult`]:
//! `raise` as [`Exc::Raise`], and `break`, `next` and `return` as jumps that
//! are caught by the loop, block call or method activation they target.
use std::{cell::RefCell, rc::Rc};

use log::trace;

use crate::{
    Aspec, ClassKind, Method, ObjRef, Object, ProcData, RawValue, Scope, State, Sym,
    ast::{AssignOp, Begin, BlockArg, BlockBody, Call, ConstPath, ConstScope, MethodDef, Node, NodeKind, Params},
    primitives::PrimitiveContext,
    span::Pos,
    state::{CallInfo, LiveFrame, MAX_CALL_DEPTH},
};

/// Where a `break` returns to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakTarget {
    /// A `while`/`until` loop, by its unique id.
    Loop(u64),
    /// The call that received the literal block, by the block's proc.
    Proc(ObjRef),
}

/// Abrupt completion of an evaluation.
#[derive(Debug, Clone, PartialEq)]
pub enum Exc {
    Raise(ObjRef),
    Break { value: RawValue, target: BreakTarget },
    Next(RawValue),
    Return { value: RawValue, home: u64 },
}

impl Exc {
    /// The value carried by the jump, or the exception object.
    pub fn value(&self) -> RawValue {
        match *self {
            Exc::Raise(obj) => obj.into(),
            Exc::Break { value, .. } | Exc::Next(value) | Exc::Return { value, .. } => value,
        }
    }
}

pub type EvalResult = Result<RawValue, Exc>;

/// Lexical and dynamic environment of the body being evaluated.
#[derive(Clone)]
pub(crate) struct Context {
    pub self_value: RawValue,
    pub scope: Rc<RefCell<Scope>>,
    /// Class that `def` defines into.
    pub definee: ObjRef,
    /// Enclosing `class`/`module` bodies, outermost first.
    pub nesting: Rc<[ObjRef]>,
    pub block: Option<RawValue>,
    /// Method activation that `return` leaves.
    pub home: u64,
    pub break_target: Option<BreakTarget>,
}

impl State {
    // ── Calls ─────────────────────────────────────────────────

    /// Dynamic dispatch of `mid` on `receiver`.
    pub fn send(
        &mut self,
        receiver: RawValue,
        mid: Sym,
        args: Vec<RawValue>,
        block: Option<RawValue>,
    ) -> EvalResult {
        let class = self.class_of(receiver);
        match self.find_method(class, mid) {
            Some((method, owner)) => self.invoke(receiver, mid, method, owner, args, block),
            None => Err(self.no_method_error(receiver, mid, false)),
        }
    }

    fn no_method_error(&mut self, receiver: RawValue, mid: Sym, variable_like: bool) -> Exc {
        let name = self.sym_name(mid);
        let description = self.describe_receiver(receiver);
        if variable_like {
            let message = format!("undefined local variable or method '{name}' for {description}");
            return self.name_error(message);
        }
        let message = format!("undefined method '{name}' for {description}");
        self.error(self.core.no_method_error, message)
    }

    fn describe_receiver(&mut self, receiver: RawValue) -> String {
        match receiver {
            RawValue::Nil | RawValue::True | RawValue::False => self.inspect(receiver),
            _ if receiver == self.top_self => "main".to_owned(),
            RawValue::Object(obj) if self.class_data(obj).is_some() => self.class_name(obj),
            _ => format!("an instance of {}", self.class_name(self.real_class(receiver))),
        }
    }

    pub(crate) fn invoke(
        &mut self,
        receiver: RawValue,
        mid: Sym,
        method: Method,
        owner: ObjRef,
        args: Vec<RawValue>,
        block: Option<RawValue>,
    ) -> EvalResult {
        if self.frames.len() >= MAX_CALL_DEPTH {
            return Err(self.error(self.core.system_stack_error, "stack level too deep"));
        }
        trace!("invoke {}#{}", self.class_name(owner), self.sym_name(mid));
        self.frames.push(CallInfo {
            mid,
            target_class: owner,
            receiver,
            argv: args.clone(),
            block,
        });
        let result = match method {
            Method::Primitive { func, aspec } => self.check_arity(aspec, args.len(), block).and_then(|()| {
                func(&mut PrimitiveContext {
                    state: self,
                    receiver,
                    arguments: args,
                    block,
                })
            }),
            Method::Native { func, aspec } => self
                .check_arity(aspec, args.len(), block)
                .and_then(|()| self.invoke_native(func, receiver)),
            Method::Script { def, nesting } => self.invoke_script(&def, nesting, owner, receiver, args, block),
        };
        self.frames.pop();
        result
    }

    fn check_arity(&mut self, aspec: Aspec, argc: usize, block: Option<RawValue>) -> Result<(), Exc> {
        aspec.check(argc, block.is_some()).map_err(|mismatch| match mismatch {
            crate::ArityMismatch::MissingBlock => {
                self.error(self.core.local_jump_error, mismatch.to_string())
            }
            crate::ArityMismatch::Count { .. } => self.argument_error(mismatch.to_string()),
        })
    }

    fn invoke_native(&mut self, func: crate::NativeFn, receiver: RawValue) -> EvalResult {
        let outer = self.exc.take();
        let value = func(self, receiver);
        let raised = std::mem::replace(&mut self.exc, outer);
        if let Some(jump) = self.pending_jump.take() {
            return Err(jump);
        }
        match raised {
            Some(exc) => Err(Exc::Raise(exc)),
            None => Ok(value),
        }
    }

    fn invoke_script(
        &mut self,
        def: &MethodDef,
        nesting: Rc<[ObjRef]>,
        owner: ObjRef,
        receiver: RawValue,
        args: Vec<RawValue>,
        block: Option<RawValue>,
    ) -> EvalResult {
        let activation = self.next_activation();
        let ctx = Context {
            self_value: receiver,
            scope: Scope::new_root(),
            definee: owner,
            nesting,
            block,
            home: activation,
            break_target: None,
        };
        self.with_live_frame(&ctx, |state| {
            state.bind_method_params(&def.params, &ctx, args, block)?;
            match state.eval(&def.body, &ctx) {
                Err(Exc::Return { value, home }) if home == activation => Ok(value),
                Err(Exc::Next(value)) => Ok(value),
                other => other,
            }
        })
    }

    fn with_live_frame<T>(&mut self, ctx: &Context, body: impl FnOnce(&mut State) -> T) -> T {
        self.live.push(LiveFrame {
            self_value: ctx.self_value,
            scope: ctx.scope.clone(),
            block: ctx.block,
        });
        let result = body(self);
        self.live.pop();
        result
    }

    fn bind_method_params(
        &mut self,
        params: &Params,
        ctx: &Context,
        args: Vec<RawValue>,
        block: Option<RawValue>,
    ) -> Result<(), Exc> {
        let mut aspec = Aspec::arg(params.required.len() as u32, params.optional.len() as u32);
        if params.rest.is_some() {
            aspec = aspec | Aspec::ANY;
        }
        if let Err(mismatch) = aspec.check(args.len(), true) {
            return Err(self.argument_error(mismatch.to_string()));
        }
        self.bind_params(params, ctx, args, block)
    }

    /// Assigns `args` to `params`. Missing required parameters become `nil`
    /// and extra arguments without a rest parameter are dropped.
    fn bind_params(
        &mut self,
        params: &Params,
        ctx: &Context,
        args: Vec<RawValue>,
        block: Option<RawValue>,
    ) -> Result<(), Exc> {
        let mut args = args.into_iter();
        for &name in &params.required {
            Scope::set(&ctx.scope, name, args.next().unwrap_or_default());
        }
        for (name, default) in &params.optional {
            let value = match args.next() {
                Some(value) => value,
                None => self.eval(default, ctx)?,
            };
            Scope::set(&ctx.scope, *name, value);
        }
        if let Some(rest) = params.rest {
            let remaining = self.new_array(args.collect());
            Scope::set(&ctx.scope, rest, remaining);
        }
        if let Some(name) = params.block {
            Scope::set(&ctx.scope, name, block.unwrap_or_default());
        }
        Ok(())
    }

    /// Calls a proc. `self_value` replaces the receiver captured by the proc.
    pub(crate) fn call_block(
        &mut self,
        block: RawValue,
        args: Vec<RawValue>,
        block_arg: Option<RawValue>,
        self_value: Option<RawValue>,
    ) -> EvalResult {
        let Some(proc) = self.proc_data(block) else {
            let class = self.class_name(self.real_class(block));
            return Err(self.type_error(format!("wrong argument type {class} (expected Proc)")));
        };
        let body = proc.body.clone();
        let ctx = Context {
            self_value: self_value.unwrap_or(proc.receiver),
            scope: Scope::new_child(&proc.scope),
            definee: proc.target_class,
            nesting: proc.nesting.clone(),
            block: proc.outer_block,
            home: proc.home,
            break_target: block.as_object().map(BreakTarget::Proc),
        };
        let params = &body.params;
        let splatted = match args.as_slice() {
            [single] if params.required.len() + params.optional.len() > 1 => {
                self.array_items(*single).cloned()
            }
            _ => None,
        };
        let args = splatted.unwrap_or(args);
        self.with_live_frame(&ctx, |state| {
            state.bind_params(params, &ctx, args, block_arg)?;
            match state.eval(&body.body, &ctx) {
                Err(Exc::Next(value)) => Ok(value),
                other => other,
            }
        })
    }

    fn make_proc(&mut self, body: Rc<BlockBody>, ctx: &Context) -> ObjRef {
        self.heap.allocate(Object::Proc(ProcData {
            body,
            scope: ctx.scope.clone(),
            receiver: ctx.self_value,
            target_class: ctx.definee,
            nesting: ctx.nesting.clone(),
            outer_block: ctx.block,
            home: ctx.home,
        }))
    }

    /// `&:name`: a proc that sends `name` to its first argument.
    pub(crate) fn symbol_proc(&mut self, name: Sym) -> ObjRef {
        let it = self.intern("it");
        let pos = Pos::origin();
        let call = Call {
            receiver: Some(Node::new(NodeKind::Local(it), pos)),
            method: name,
            args: Vec::new(),
            block: None,
        };
        let body = Rc::new(BlockBody {
            params: Params {
                required: vec![it],
                ..Params::default()
            },
            body: Node::new(NodeKind::Call(Box::new(call)), pos),
        });
        self.heap.allocate(Object::Proc(ProcData {
            body,
            scope: Scope::new_root(),
            receiver: self.top_self,
            target_class: self.core.object,
            nesting: Rc::from(Vec::new()),
            outer_block: None,
            home: 0,
        }))
    }

    // ── Evaluation ────────────────────────────────────────────

    pub(crate) fn eval(&mut self, node: &Node, ctx: &Context) -> EvalResult {
        match &node.kind {
            NodeKind::Nil => Ok(RawValue::Nil),
            NodeKind::True => Ok(RawValue::True),
            NodeKind::False => Ok(RawValue::False),
            NodeKind::SelfRef => Ok(ctx.self_value),
            NodeKind::Integer(n) => Ok(RawValue::Fixnum(*n)),
            NodeKind::Float(f) => Ok(RawValue::Float(*f)),
            NodeKind::String(s) => Ok(self.new_string(s)),
            NodeKind::Interpolated(parts) => {
                let mut out = String::new();
                for part in parts {
                    let value = self.eval(part, ctx)?;
                    out.push_str(&self.stringify(value)?);
                }
                Ok(self.new_string(&out))
            }
            NodeKind::Symbol(sym) => Ok(RawValue::Symbol(*sym)),
            NodeKind::Array(items) => {
                let items = self.eval_list(items, ctx)?;
                Ok(self.new_array(items))
            }
            NodeKind::Hash(pairs) => {
                let hash = self.new_hash();
                for (key, value) in pairs {
                    let key = self.eval(key, ctx)?;
                    let value = self.eval(value, ctx)?;
                    self.hash_set(hash, key, value);
                }
                Ok(hash)
            }

            NodeKind::Local(name) => Ok(Scope::get(&ctx.scope, *name).unwrap_or_default()),
            NodeKind::LocalSet(name, value) => {
                let value = self.eval(value, ctx)?;
                Scope::set(&ctx.scope, *name, value);
                Ok(value)
            }
            NodeKind::IVar(name) => Ok(self.ivar_get(ctx.self_value, *name)),
            NodeKind::IVarSet(name, value) => {
                let value = self.eval(value, ctx)?;
                self.ivar_set(ctx.self_value, *name, value)?;
                Ok(value)
            }
            NodeKind::GVar(name) => Ok(self.globals.get(name).copied().unwrap_or_default()),
            NodeKind::GVarSet(name, value) => {
                let value = self.eval(value, ctx)?;
                self.globals.insert(*name, value);
                Ok(value)
            }
            NodeKind::Const(path) => self.eval_const(path, ctx),
            NodeKind::ConstSet(path, value) => {
                let outer = self.const_scope(&path.scope, ctx)?;
                let value = self.eval(value, ctx)?;
                self.const_set(outer, path.name, value);
                Ok(value)
            }

            NodeKind::Call(call) => self.eval_call(call, ctx),
            NodeKind::Splat(inner) => {
                let value = self.eval(inner, ctx)?;
                let items = self.splat(value);
                Ok(self.new_array(items))
            }
            NodeKind::Yield(args) => {
                let Some(block) = ctx.block else {
                    return Err(self.error(self.core.local_jump_error, "no block given (yield)"));
                };
                let args = self.eval_list(args, ctx)?;
                self.call_block(block, args, None, None)
            }

            NodeKind::Seq(statements) => self.eval_seq(statements, ctx),
            NodeKind::And(left, right) => {
                let left = self.eval(left, ctx)?;
                if left.is_truthy() { self.eval(right, ctx) } else { Ok(left) }
            }
            NodeKind::Or(left, right) => {
                let left = self.eval(left, ctx)?;
                if left.is_truthy() { Ok(left) } else { self.eval(right, ctx) }
            }
            NodeKind::Not(operand) => {
                let value = self.eval(operand, ctx)?;
                Ok(RawValue::from_bool(!value.is_truthy()))
            }
            NodeKind::If { cond, then, otherwise } => {
                if self.eval(cond, ctx)?.is_truthy() {
                    self.eval(then, ctx)
                } else {
                    self.eval(otherwise, ctx)
                }
            }
            NodeKind::While { cond, body, negate } => self.eval_while(cond, body, *negate, ctx),
            NodeKind::Begin(begin) => self.eval_begin(begin, ctx),
            NodeKind::Return(value) => {
                let value = self.eval_optional(value.as_deref(), ctx)?;
                Err(Exc::Return { value, home: ctx.home })
            }
            NodeKind::Break(value) => {
                let value = self.eval_optional(value.as_deref(), ctx)?;
                match ctx.break_target {
                    Some(target) => Err(Exc::Break { value, target }),
                    None => Err(self.error(self.core.local_jump_error, "break from proc-closure")),
                }
            }
            NodeKind::Next(value) => {
                let value = self.eval_optional(value.as_deref(), ctx)?;
                Err(Exc::Next(value))
            }
            NodeKind::OpAssign { target, op, value } => self.eval_op_assign(target, *op, value, ctx),

            NodeKind::Def { singleton, def } => {
                let class = match singleton {
                    Some(target) => {
                        let target = self.eval(target, ctx)?;
                        match target.as_object().and_then(|obj| self.singleton_class(obj)) {
                            Some(meta) => meta,
                            None => {
                                let description = self.inspect(target);
                                return Err(self.type_error(format!("can't define singleton method for {description}")));
                            }
                        }
                    }
                    None => ctx.definee,
                };
                trace!("def {}#{}", self.class_name(class), self.sym_name(def.name));
                self.define_method_raw(
                    class,
                    def.name,
                    Method::Script {
                        def: def.clone(),
                        nesting: ctx.nesting.clone(),
                    },
                );
                Ok(RawValue::Symbol(def.name))
            }
            NodeKind::ClassDef { path, superclass, body } => {
                let outer = self.const_scope(&path.scope, ctx)?;
                let superclass = match superclass {
                    Some(node) => {
                        let value = self.eval(node, ctx)?;
                        match value.as_object() {
                            Some(obj) if self.class_kind(obj) == Some(ClassKind::Class) => Some(obj),
                            _ => return Err(self.type_error("superclass must be a Class")),
                        }
                    }
                    None => None,
                };
                let class = self.open_class(outer, path.name, superclass)?;
                self.eval_class_body(class, body, ctx)
            }
            NodeKind::ModuleDef { path, body } => {
                let outer = self.const_scope(&path.scope, ctx)?;
                let module = self.open_module(outer, path.name)?;
                self.eval_class_body(module, body, ctx)
            }
        }
    }

    fn eval_optional(&mut self, node: Option<&Node>, ctx: &Context) -> EvalResult {
        match node {
            Some(node) => self.eval(node, ctx),
            None => Ok(RawValue::Nil),
        }
    }

    /// Statements are evaluated in order. Temporaries of finished statements
    /// are unpinned, so only values reachable from locals survive a
    /// collection between them.
    fn eval_seq(&mut self, statements: &[Node], ctx: &Context) -> EvalResult {
        let arena = self.arena_save();
        let mut last = RawValue::Nil;
        for (i, statement) in statements.iter().enumerate() {
            if i > 0 {
                self.arena_restore(arena);
            }
            last = self.eval(statement, ctx)?;
        }
        self.arena_restore(arena);
        self.protect(last);
        Ok(last)
    }

    /// Evaluates an argument or element list, expanding splats.
    fn eval_list(&mut self, nodes: &[Node], ctx: &Context) -> Result<Vec<RawValue>, Exc> {
        let mut values = Vec::with_capacity(nodes.len());
        for node in nodes {
            match &node.kind {
                NodeKind::Splat(inner) => {
                    let value = self.eval(inner, ctx)?;
                    values.extend(self.splat(value));
                }
                _ => values.push(self.eval(node, ctx)?),
            }
        }
        Ok(values)
    }

    fn splat(&self, value: RawValue) -> Vec<RawValue> {
        match self.array_items(value) {
            Some(items) => items.clone(),
            None if value.is_nil() => Vec::new(),
            None => vec![value],
        }
    }

    fn eval_while(&mut self, cond: &Node, body: &Node, negate: bool, ctx: &Context) -> EvalResult {
        let id = self.next_activation();
        let target = BreakTarget::Loop(id);
        let loop_ctx = Context {
            break_target: Some(target),
            ..ctx.clone()
        };
        let arena = self.arena_save();
        loop {
            self.arena_restore(arena);
            if self.eval(cond, &loop_ctx)?.is_truthy() == negate {
                return Ok(RawValue::Nil);
            }
            match self.eval(body, &loop_ctx) {
                Ok(_) | Err(Exc::Next(_)) => {}
                Err(Exc::Break { value, target: t }) if t == target => {
                    self.arena_restore(arena);
                    self.protect(value);
                    return Ok(value);
                }
                Err(other) => return Err(other),
            }
        }
    }

    fn eval_begin(&mut self, begin: &Begin, ctx: &Context) -> EvalResult {
        let result = match (self.eval(&begin.body, ctx), &begin.otherwise) {
            (Err(Exc::Raise(exc)), _) => self.rescue(begin, exc, ctx),
            (Ok(_), Some(otherwise)) => self.eval(otherwise, ctx),
            (other, _) => other,
        };
        if let Some(ensure) = &begin.ensure {
            self.eval(ensure, ctx)?;
        }
        result
    }

    fn rescue(&mut self, begin: &Begin, exc: ObjRef, ctx: &Context) -> EvalResult {
        for clause in &begin.rescues {
            let classes = if clause.classes.is_empty() {
                vec![self.core.standard_error.into()]
            } else {
                self.eval_list(&clause.classes, ctx)?
            };
            let matched = classes.into_iter().any(|class| {
                class
                    .as_object()
                    .is_some_and(|class| self.is_a(exc.into(), class))
            });
            if !matched {
                continue;
            }
            trace!("rescued {}", self.exception_message(exc));
            if let Some(binding) = clause.binding {
                Scope::set(&ctx.scope, binding, exc.into());
            }
            let bang = self.intern("!");
            self.globals.insert(bang, exc.into());
            return self.eval(&clause.body, ctx);
        }
        Err(Exc::Raise(exc))
    }

    fn eval_op_assign(&mut self, target: &Node, op: AssignOp, value: &Node, ctx: &Context) -> EvalResult {
        // Attribute and index targets evaluate receiver and arguments once.
        if let NodeKind::Call(call) = &target.kind {
            let receiver = match &call.receiver {
                Some(receiver) => self.eval(receiver, ctx)?,
                None => ctx.self_value,
            };
            let args = self.eval_list(&call.args, ctx)?;
            let current = self.send(receiver, call.method, args.clone(), None)?;
            let Some(updated) = self.combine(current, op, value, ctx)? else {
                return Ok(current);
            };
            let name = self.sym_name(call.method);
            let setter = if &*name == "[]" { self.intern("[]=") } else { self.intern(&format!("{name}=")) };
            let mut setter_args = args;
            setter_args.push(updated);
            self.send(receiver, setter, setter_args, None)?;
            return Ok(updated);
        }

        let current = self.eval(target, ctx)?;
        let Some(updated) = self.combine(current, op, value, ctx)? else {
            return Ok(current);
        };
        match &target.kind {
            NodeKind::Local(name) => Scope::set(&ctx.scope, *name, updated),
            NodeKind::IVar(name) => self.ivar_set(ctx.self_value, *name, updated)?,
            NodeKind::GVar(name) => {
                self.globals.insert(*name, updated);
            }
            NodeKind::Const(path) => {
                let outer = self.const_scope(&path.scope, ctx)?;
                self.const_set(outer, path.name, updated);
            }
            _ => return Err(self.runtime_error("unsupported assignment target")),
        }
        Ok(updated)
    }

    /// New value for a compound assignment, or `None` when `||=`/`&&=`
    /// leaves the target alone.
    fn combine(&mut self, current: RawValue, op: AssignOp, value: &Node, ctx: &Context) -> Result<Option<RawValue>, Exc> {
        Ok(match op {
            AssignOp::Or if current.is_truthy() => None,
            AssignOp::And if !current.is_truthy() => None,
            AssignOp::Or | AssignOp::And => Some(self.eval(value, ctx)?),
            AssignOp::Binary(method) => {
                let operand = self.eval(value, ctx)?;
                Some(self.send(current, method, vec![operand], None)?)
            }
        })
    }

    fn eval_class_body(&mut self, class: ObjRef, body: &Node, ctx: &Context) -> EvalResult {
        let mut nesting = ctx.nesting.to_vec();
        nesting.push(class);
        let class_ctx = Context {
            self_value: class.into(),
            scope: Scope::new_root(),
            definee: class,
            nesting: Rc::from(nesting),
            block: None,
            home: ctx.home,
            break_target: None,
        };
        self.with_live_frame(&class_ctx, |state| state.eval(body, &class_ctx))
    }

    // ── Constants ─────────────────────────────────────────────

    /// Class or module a constant path is resolved under.
    fn const_scope(&mut self, scope: &ConstScope, ctx: &Context) -> Result<ObjRef, Exc> {
        match scope {
            ConstScope::Lexical => Ok(ctx.nesting.last().copied().unwrap_or(self.core.object)),
            ConstScope::Top => Ok(self.core.object),
            ConstScope::Under(node) => {
                let value = self.eval(node, ctx)?;
                match value.as_object() {
                    Some(obj) if self.class_data(obj).is_some() => Ok(obj),
                    _ => {
                        let description = self.inspect(value);
                        Err(self.type_error(format!("{description} is not a class/module")))
                    }
                }
            }
        }
    }

    fn eval_const(&mut self, path: &ConstPath, ctx: &Context) -> EvalResult {
        let found = match &path.scope {
            ConstScope::Lexical => self.lookup_lexical_const(path.name, ctx),
            scope => {
                let outer = self.const_scope(scope, ctx)?;
                self.const_get_inherited(outer, path.name)
            }
        };
        match found {
            Some(value) => Ok(value),
            None => {
                let name = self.sym_name(path.name);
                let qualified = match &path.scope {
                    ConstScope::Under(_) => {
                        let outer = self.const_scope(&path.scope, ctx)?;
                        format!("{}::{name}", self.class_name(outer))
                    }
                    _ => name.to_string(),
                };
                Err(self.name_error(format!("uninitialized constant {qualified}")))
            }
        }
    }

    fn lookup_lexical_const(&self, name: Sym, ctx: &Context) -> Option<RawValue> {
        ctx.nesting
            .iter()
            .rev()
            .find_map(|&class| self.const_get(class, name))
            .or_else(|| {
                let innermost = ctx.nesting.last().copied().unwrap_or(ctx.definee);
                self.const_get_inherited(innermost, name)
            })
            .or_else(|| self.const_get(self.core.object, name))
    }

    // ── Call sites ────────────────────────────────────────────

    fn eval_call(&mut self, call: &Call, ctx: &Context) -> EvalResult {
        let receiverless = call.receiver.is_none();
        if receiverless && call.args.is_empty() && call.block.is_none() {
            let name = self.sym_name(call.method);
            if &*name == "block_given?" {
                return Ok(RawValue::from_bool(ctx.block.is_some()));
            }
        }
        let receiver = match &call.receiver {
            Some(receiver) => self.eval(receiver, ctx)?,
            None => ctx.self_value,
        };
        let args = self.eval_list(&call.args, ctx)?;
        let (block, literal) = match &call.block {
            None => (None, None),
            Some(BlockArg::Literal(body)) => {
                let proc = self.make_proc(body.clone(), ctx);
                (Some(proc.into()), Some(proc))
            }
            Some(BlockArg::Pass(node)) => {
                let value = self.eval(node, ctx)?;
                (self.block_from_value(value)?, None)
            }
        };

        let class = self.class_of(receiver);
        let Some((method, owner)) = self.find_method(class, call.method) else {
            let variable_like = receiverless && call.args.is_empty() && call.block.is_none();
            return Err(self.no_method_error(receiver, call.method, variable_like));
        };
        match self.invoke(receiver, call.method, method, owner, args, block) {
            Err(Exc::Break { value, target: BreakTarget::Proc(proc) }) if Some(proc) == literal => Ok(value),
            other => other,
        }
    }

    /// Converts the operand of `&expr` into a block.
    fn block_from_value(&mut self, value: RawValue) -> Result<Option<RawValue>, Exc> {
        match value {
            RawValue::Nil => Ok(None),
            RawValue::Symbol(name) => Ok(Some(self.symbol_proc(name).into())),
            _ if self.proc_data(value).is_some() => Ok(Some(value)),
            _ => {
                let class = self.class_name(self.real_class(value));
                Err(self.type_error(format!("wrong argument type {class} (expected Proc)")))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{RawValue, State};

    fn eval(state: &mut State, code: &str) -> RawValue {
        let value = state.load_string(code);
        if let Some(exc) = state.exc {
            panic!("{code}: {}", state.exception_message(exc));
        }
        value
    }

    fn eval_int(code: &str) -> i64 {
        let mut state = State::new();
        eval(&mut state, code).as_fixnum().expect("integer result")
    }

    fn eval_inspect(code: &str) -> String {
        let mut state = State::new();
        let value = eval(&mut state, code);
        state.inspect(value)
    }

    fn error_of(code: &str) -> String {
        let mut state = State::new();
        state.load_string(code);
        let exc = state.take_exception().expect("expected an exception");
        let class = state.class_name(state.real_class(exc.into()));
        format!("{class}: {}", state.exception_message(exc))
    }

    // ── Basics ────────────────────────────────────────────────

    #[test]
    fn arithmetic_and_locals() {
        assert_eq!(eval_int("x = 3\ny = 4\nx * y + 1"), 13);
        assert_eq!(eval_int("a = 10; a -= 3; a *= 2; a"), 14);
        assert_eq!(eval_int("x = nil; x ||= 5; x ||= 6; x"), 5);
    }

    #[test]
    fn conditionals_and_loops() {
        assert_eq!(eval_int("i = 0\nsum = 0\nwhile i < 5\n i += 1\n sum += i\nend\nsum"), 15);
        assert_eq!(eval_int("i = 0\nuntil i == 3 do i += 1 end\ni"), 3);
        assert_eq!(eval_int("x = 7\nif x > 5 then 1 elsif x > 2 then 2 else 3 end"), 1);
        assert_eq!(eval_int("x = 0\nx += 1 unless false\nx"), 1);
        assert_eq!(eval_int("i = 0\nwhile true\n i += 1\n break if i == 4\nend\ni"), 4);
    }

    #[test]
    fn string_interpolation() {
        assert_eq!(eval_inspect("n = 2\n\"#{n} + #{n} = #{n + n}\""), "\"2 + 2 = 4\"");
    }

    // ── Methods and blocks ────────────────────────────────────

    #[test]
    fn methods_with_defaults_and_rest() {
        let code = "def f(a, b = 10, *rest)\n a + b + rest.size\nend\nf(1) + f(1, 2) + f(1, 2, 3, 4)";
        assert_eq!(eval_int(code), 11 + 3 + 5);
    }

    #[test]
    fn method_arity_errors() {
        assert_eq!(
            error_of("def f(a); end\nf(1, 2)"),
            "ArgumentError: wrong number of arguments (given 2, expected 1)"
        );
    }

    #[test]
    fn blocks_close_over_locals() {
        assert_eq!(eval_int("total = 0\n[1, 2, 3].each { |x| total += x }\ntotal"), 6);
        assert_eq!(eval_int("def twice\n yield(1) + yield(2)\nend\ntwice { |x| x * 10 }"), 30);
    }

    #[test]
    fn break_next_and_return() {
        assert_eq!(eval_int("[1, 2, 3, 4].each { |x| break x * 100 if x == 3 }"), 300);
        assert_eq!(eval_inspect("[1, 2, 3].map { |x| next 0 if x == 2; x }"), "[1, 0, 3]");
        let code = "def find_two(list)\n list.each { |x| return x if x == 2 }\n nil\nend\nfind_two([1, 2, 3])";
        assert_eq!(eval_int(code), 2);
    }

    #[test]
    fn block_params_splat_single_array() {
        assert_eq!(eval_int("sum = 0\n[[1, 2], [3, 4]].each { |a, b| sum += a * b }\nsum"), 14);
    }

    #[test]
    fn symbol_to_proc() {
        assert_eq!(eval_inspect("[1, 2, 3].map(&:to_s)"), "[\"1\", \"2\", \"3\"]");
    }

    #[test]
    fn yield_without_block() {
        assert_eq!(error_of("def f; yield; end\nf"), "LocalJumpError: no block given (yield)");
        assert_eq!(eval_inspect("def f; block_given?; end\n[f, f { }]"), "[false, true]");
    }

    // ── Exceptions ────────────────────────────────────────────

    #[test]
    fn rescue_else_ensure() {
        let code = "log = []\nbegin\n raise ArgumentError, 'bad'\nrescue TypeError\n log << :type\nrescue ArgumentError => e\n log << e.message\nelse\n log << :else\nensure\n log << :ensure\nend\nlog";
        assert_eq!(eval_inspect(code), "[\"bad\", :ensure]");
        let code = "log = []\nbegin\n 1\nrescue\n log << :rescue\nelse\n log << :else\nend\nlog";
        assert_eq!(eval_inspect(code), "[:else]");
    }

    #[test]
    fn rescue_modifier_and_unrescued() {
        assert_eq!(eval_int("(raise 'x') rescue 5"), 5);
        assert_eq!(error_of("raise 'boom'"), "RuntimeError: boom");
        assert_eq!(error_of("1 / 0"), "ZeroDivisionError: divided by 0");
    }

    #[test]
    fn undefined_names() {
        assert_eq!(
            error_of("foo"),
            "NameError: undefined local variable or method 'foo' for main"
        );
        assert_eq!(error_of("nil.bar"), "NoMethodError: undefined method 'bar' for nil");
        assert_eq!(error_of("Missing"), "NameError: uninitialized constant Missing");
    }

    #[test]
    fn deep_recursion_raises() {
        let handle = std::thread::Builder::new()
            .stack_size(256 * 1024 * 1024)
            .spawn(|| error_of("def down(n); down(n + 1); end\ndown(0)"))
            .expect("spawn");
        assert_eq!(handle.join().expect("join"), "SystemStackError: stack level too deep");
    }

    // ── Classes ───────────────────────────────────────────────

    #[test]
    fn classes_ivars_and_inheritance() {
        let code = "class Animal\n attr_reader :name\n def initialize(name)\n  @name = name\n end\n def speak\n  \"#{name} makes a sound\"\n end\nend\nclass Dog < Animal\n def speak\n  \"#{name} barks\"\n end\nend\n[Animal.new('cat').speak, Dog.new('rex').speak]";
        assert_eq!(eval_inspect(code), "[\"cat makes a sound\", \"rex barks\"]");
    }

    #[test]
    fn class_methods_and_constants() {
        let code = "module Outer\n LIMIT = 3\n class Inner\n  def self.limit\n   LIMIT * 2\n  end\n end\nend\nOuter::Inner.limit";
        assert_eq!(eval_int(code), 6);
    }

    #[test]
    fn superclass_mismatch() {
        assert_eq!(
            error_of("class A; end\nclass B; end\nclass C < A; end\nclass C < B; end"),
            "TypeError: superclass mismatch for class C"
        );
    }

    #[test]
    fn modules_are_mixed_in() {
        let code = "module Greeter\n def greet\n  \"hi #{who}\"\n end\nend\nclass P\n include Greeter\n def who; 'bob'; end\nend\nP.new.greet";
        assert_eq!(eval_inspect(code), "\"hi bob\"");
    }

    #[test]
    fn inspect_instances() {
        assert_eq!(
            eval_inspect("class Foo\n def initialize; @a = 1; @b = 'x'; end\nend\nFoo.new"),
            "#<Foo @a=1, @b=\"x\">"
        );
    }
}
