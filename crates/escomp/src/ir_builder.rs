//! Lowers an analyzed program into a [`crate::ir::Module`].
//!
//! Lowering is per function and mirrors the shape the analyzer already
//! walked: a function scope owns a block list, a stack of exception-action
//! templates (what runs when the instruction just emitted fails), and a
//! stack of epilogues (what a `break`/`continue`/`return` must re-lower on
//! its way out, e.g. a `with`'s `ctx_leave` or a `try`'s `finally` body).
//! Expression lowering returns a [`ValueRef`] directly for concrete values;
//! anything that resolves to a binding or property goes through a
//! [`Reference`], which `expand_ref_get`/`expand_ref_put` turn into the
//! actual get/put instructions.

use std::rc::Rc;

use ahash::AHashMap;

use crate::analyzer::{AnalysisResult, AnalyzedFunction, BindingKind, NodeId, StorageClass as AStorage, PROGRAM_FUNCTION_ID};
use crate::ast::{
    AccessorKind, AssignOp, BinaryOp, CatchClause, Declaration, DeclarationKind, Expression, ForInTarget, ForInit,
    ObjectProperty, Program, PropertyAccessKey, PropertyKey, Statement, SwitchCase, UnaryOp, UpdateOp,
};
use crate::intern::StringId;
use crate::ir::instr::{Constant, DeclKind, EsBinaryOp, EsUnaryOp, Instruction, Opcode, PropertyKeyOperand, RawBinaryOp};
use crate::ir::{BlockId, Function, IrType, Module, StorageClass, StringResource, ValueRef};
use crate::source_loc::SourceSpan;

/// What an identifier or property expression lowers to before a get/put
/// decides how to touch it.
#[derive(Clone)]
enum Reference {
    /// A `local`/`local-extra` binding: "returns that local directly", with
    /// no load instruction standing between the read and its slot.
    Value(ValueRef),
    /// `meta_ctx_load(name)`: an unresolved context binding.
    Context(StringId),
    /// `meta_prp_load(object, key)`: an unresolved property access.
    Property(ValueRef, PropertyKeyOperand),
}

/// A composable action inflated into a fresh block when an instruction
/// reports failure.
#[derive(Clone)]
enum ExceptionAction {
    ReturnFalse,
    Jump(BlockId),
    LeaveContext,
    Multi(Vec<ExceptionAction>),
}

/// Something a normal (non-exceptional) `break`/`continue`/`return` must
/// replay on its way out of a lexical region it's unwinding through.
#[derive(Clone)]
enum Epilogue {
    LeaveContext,
    Finally(Rc<[Statement]>),
}

/// A `break`/`continue` destination, pushed for every iteration statement
/// (and, break-only, every `switch`).
struct LoopTarget {
    labels: Vec<String>,
    continue_block: Option<BlockId>,
    break_block: BlockId,
    /// `ctx.epilogues` length when this target was pushed; unwinding to it
    /// only replays epilogues entered since, not ones that stay active
    /// after the jump (an enclosing `with`, say).
    base_depth: usize,
}

const CONTEXT_CACHE_CAPACITY: u16 = 4096;

struct FunctionCtx {
    id: NodeId,
    module_index: usize,
    current_block: BlockId,
    temp_counter: u32,
    exception_actions: Vec<ExceptionAction>,
    epilogues: Vec<Epilogue>,
    loop_targets: Vec<LoopTarget>,
    in_epilogue: bool,
    context_cache_map: AHashMap<StringId, u16>,
    next_context_cache: u16,
}

struct Builder<'a> {
    pool: &'a mut crate::intern::InternPool,
    analyzed: &'a AHashMap<NodeId, AnalyzedFunction>,
    module: Module,
}

/// Builds the IR module for a whole program from its parsed form and the
/// analyzer's storage classification.
#[must_use]
pub fn build(program: &Program, analysis: &mut AnalysisResult) -> Module {
    let mut builder = Builder { pool: &mut analysis.pool, analyzed: &analysis.functions, module: Module::new() };
    builder.lower_program(program);
    let resources: Vec<StringResource> =
        builder.pool.resources().map(|(id, s)| StringResource { id, utf16: s.units().to_vec() }).collect();
    builder.module.resources = resources;
    builder.module
}

impl<'a> Builder<'a> {
    fn func(&self, idx: usize) -> &Function {
        &self.module.functions[idx]
    }

    fn func_mut(&mut self, idx: usize) -> &mut Function {
        &mut self.module.functions[idx]
    }

    fn new_block(&mut self, ctx: &FunctionCtx) -> BlockId {
        self.func_mut(ctx.module_index).push_block()
    }

    fn set_current(&self, ctx: &mut FunctionCtx, block: BlockId) {
        ctx.current_block = block;
    }

    fn current_block_terminated(&self, ctx: &FunctionCtx) -> bool {
        self.func(ctx.module_index).block(ctx.current_block).is_terminated()
    }

    fn push(&mut self, ctx: &mut FunctionCtx, instr: Instruction) -> u32 {
        let block = ctx.current_block;
        self.func_mut(ctx.module_index).push_instruction(block, instr)
    }

    fn terminate_branch(&mut self, ctx: &mut FunctionCtx, cond: ValueRef, if_true: BlockId, if_false: BlockId) {
        let block = ctx.current_block;
        self.push(ctx, Instruction::new(Opcode::Branch { cond, if_true, if_false }, IrType::Void));
        self.func_mut(ctx.module_index).add_referrer(if_true, block);
        self.func_mut(ctx.module_index).add_referrer(if_false, block);
    }

    fn terminate_jump(&mut self, ctx: &mut FunctionCtx, target: BlockId) {
        let block = ctx.current_block;
        self.push(ctx, Instruction::new(Opcode::Jump { target }, IrType::Void));
        self.func_mut(ctx.module_index).add_referrer(target, block);
    }

    fn emit_return(&mut self, ctx: &mut FunctionCtx, success: bool) {
        self.push(ctx, Instruction::new(Opcode::Return { success }, IrType::Void));
    }

    fn fresh_temp(&mut self, ctx: &mut FunctionCtx) -> StringId {
        let name = format!("$t{}", ctx.temp_counter);
        ctx.temp_counter += 1;
        self.pool.intern(&name)
    }

    fn context_cache(&mut self, ctx: &mut FunctionCtx, name: StringId) -> u16 {
        if let Some(&id) = ctx.context_cache_map.get(&name) {
            return id;
        }
        let id = ctx.next_context_cache;
        ctx.next_context_cache = (ctx.next_context_cache + 1) % CONTEXT_CACHE_CAPACITY;
        ctx.context_cache_map.insert(name, id);
        id
    }

    // -- exception-action / epilogue plumbing --------------------------

    /// Branches away to a freshly inflated exception block if `cond` (a
    /// boolean success flag) is false, otherwise falls through.
    fn branch_on_failure(&mut self, ctx: &mut FunctionCtx, cond: ValueRef) {
        let cont = self.new_block(ctx);
        let fail = self.new_block(ctx);
        self.terminate_branch(ctx, cond, cont, fail);
        self.set_current(ctx, fail);
        self.inflate_exception_action(ctx);
        self.set_current(ctx, cont);
    }

    fn inflate_exception_action(&mut self, ctx: &mut FunctionCtx) {
        let action = ctx.exception_actions.last().cloned().expect("the function-level default action is never popped");
        self.inflate_action(ctx, &action);
    }

    fn inflate_action(&mut self, ctx: &mut FunctionCtx, action: &ExceptionAction) {
        match action {
            ExceptionAction::ReturnFalse => self.emit_return(ctx, false),
            ExceptionAction::Jump(target) => self.terminate_jump(ctx, *target),
            ExceptionAction::LeaveContext => {
                self.push(ctx, Instruction::new(Opcode::CtxLeave, IrType::Void));
            }
            ExceptionAction::Multi(actions) => {
                for a in actions {
                    self.inflate_action(ctx, a);
                }
            }
        }
    }

    /// Replays epilogues entered since `base` (innermost first), guarded so
    /// a `return`/`break` inside a finally body being replayed here doesn't
    /// recursively unwind the same templates again.
    fn inflate_epilogues_from(&mut self, ctx: &mut FunctionCtx, base: usize) {
        if ctx.in_epilogue {
            return;
        }
        ctx.in_epilogue = true;
        let epilogues: Vec<Epilogue> = ctx.epilogues[base..].to_vec();
        for epilogue in epilogues.iter().rev() {
            match epilogue {
                Epilogue::LeaveContext => {
                    self.push(ctx, Instruction::new(Opcode::CtxLeave, IrType::Void));
                }
                Epilogue::Finally(body) => {
                    self.push(ctx, Instruction::new(Opcode::ExSaveState, IrType::Void));
                    for s in body.iter() {
                        self.lower_statement(ctx, s);
                    }
                    if !self.current_block_terminated(ctx) {
                        self.push(ctx, Instruction::new(Opcode::ExLoadState, IrType::Void));
                    }
                }
            }
        }
        ctx.in_epilogue = false;
    }

    fn find_break_target(&self, ctx: &FunctionCtx, label: Option<&str>) -> (BlockId, usize) {
        for lt in ctx.loop_targets.iter().rev() {
            if label.is_none() || lt.labels.iter().any(|l| Some(l.as_str()) == label) {
                return (lt.break_block, lt.base_depth);
            }
        }
        unreachable!("the parser already rejected an unresolvable break target")
    }

    fn find_continue_target(&self, ctx: &FunctionCtx, label: Option<&str>) -> (BlockId, usize) {
        for lt in ctx.loop_targets.iter().rev() {
            if label.is_none() || lt.labels.iter().any(|l| Some(l.as_str()) == label) {
                if let Some(cont) = lt.continue_block {
                    return (cont, lt.base_depth);
                }
            }
        }
        unreachable!("the parser already rejected an unresolvable continue target")
    }

    // -- function-level lowering -----------------------------------------

    fn lower_program(&mut self, program: &Program) {
        self.lower_function(
            PROGRAM_FUNCTION_ID,
            true,
            None,
            &[],
            &program.declarations,
            &program.body,
            program.strict,
            program.span,
        );
    }

    #[allow(clippy::too_many_arguments)]
    fn lower_function(
        &mut self,
        id: NodeId,
        is_global: bool,
        name: Option<&str>,
        params: &[String],
        declarations: &[Declaration],
        body: &[Statement],
        strict: bool,
        span: SourceSpan,
    ) -> usize {
        let name_id = name.map(|n| self.pool.intern(n));
        let mut func = Function::new(name_id, is_global, span);
        func.param_count = params.len() as u32;
        let module_index = self.module.functions.len();
        self.module.functions.push(func);

        let analyzed: &'a AnalyzedFunction =
            self.analyzed.get(&id).expect("every function literal has a matching analyzed entry");
        self.func_mut(module_index).needs_arguments_object = analyzed.needs_arguments_object;

        let mut ctx = FunctionCtx {
            id,
            module_index,
            current_block: 0,
            temp_counter: 0,
            exception_actions: vec![ExceptionAction::ReturnFalse],
            epilogues: Vec::new(),
            loop_targets: Vec::new(),
            in_epilogue: false,
            context_cache_map: AHashMap::new(),
            next_context_cache: 0,
        };

        self.push(&mut ctx, Instruction::new(Opcode::CtxSetStrict(strict), IrType::Void));
        self.lower_function_body(&mut ctx, analyzed, params, declarations, body);

        if !self.current_block_terminated(&ctx) {
            self.emit_return(&mut ctx, true);
        }

        let func = self.func_mut(module_index);
        for sid in analyzed.param_order.iter().chain(analyzed.declaration_order.iter()) {
            if let Some(var) = analyzed.variables.get(sid) {
                func.variable_storage.insert(*sid, map_storage(var.storage));
            }
        }
        for (sid, var) in &analyzed.variables {
            if var.kind == BindingKind::CalleeName {
                func.variable_storage.insert(*sid, map_storage(var.storage));
            }
        }

        module_index
    }

    fn lower_function_body(
        &mut self,
        ctx: &mut FunctionCtx,
        analyzed: &'a AnalyzedFunction,
        params: &[String],
        declarations: &[Declaration],
        body: &[Statement],
    ) {
        let extra_count = analyzed.variables.values().filter(|v| v.storage == AStorage::LocalExtra).count() as u32;
        if extra_count > 0 {
            self.push(
                ctx,
                Instruction::new(Opcode::BindExtraInit { count: extra_count }, IrType::Pointer(Box::new(IrType::Opaque("extras"))))
                    .persistent(),
            );
            let mut hops: Vec<u32> = analyzed.referenced_scopes.iter().copied().collect();
            hops.sort_unstable();
            for hop in hops {
                self.push(
                    ctx,
                    Instruction::new(Opcode::BindExtraPtr { hops: hop }, IrType::Pointer(Box::new(IrType::Opaque("scope")))),
                );
            }
        }

        for (index, pname) in params.iter().enumerate() {
            let sid = self.pool.intern(pname);
            let storage = analyzed.variables.get(&sid).map_or(AStorage::Unallocated, |v| v.storage);
            match storage {
                AStorage::Local => {
                    if analyzed.eval_tainted || pname == "arguments" {
                        self.push(
                            ctx,
                            Instruction::new(
                                Opcode::Link { kind: DeclKind::Parameter, name: sid, slot: ValueRef::Slot(sid) },
                                IrType::Void,
                            ),
                        );
                    }
                }
                AStorage::LocalExtra => {
                    self.push(
                        ctx,
                        Instruction::new(Opcode::Link { kind: DeclKind::Parameter, name: sid, slot: ValueRef::Slot(sid) }, IrType::Void),
                    );
                }
                AStorage::Context => {
                    let decl = self.push(ctx, Instruction::new(Opcode::Declare { kind: DeclKind::Parameter, name: sid }, IrType::Boolean));
                    self.branch_on_failure(ctx, ValueRef::Instruction(decl));
                }
                AStorage::Unallocated => {}
            }
            let _ = index;
        }

        if analyzed.needs_arguments_object {
            self.push(ctx, Instruction::new(Opcode::InitArguments, IrType::Void));
            let args_obj = self.push(
                ctx,
                Instruction::new(Opcode::ArgsObjInit { extras: ValueRef::Constant(Constant::FramePointer) }, IrType::Value)
                    .persistent(),
            );
            let args_sid = self.pool.intern("arguments");
            self.push(
                ctx,
                Instruction::new(Opcode::MemStore { dest: ValueRef::Slot(args_sid), value: ValueRef::Instruction(args_obj) }, IrType::Void),
            );
            for (index, pname) in params.iter().enumerate() {
                let sid = self.pool.intern(pname);
                if analyzed.variables.get(&sid).map(|v| v.storage) == Some(AStorage::LocalExtra) {
                    self.push(
                        ctx,
                        Instruction::new(Opcode::ArgsObjLink { param_index: index as u32, extra_slot: index as u32 }, IrType::Void),
                    );
                }
            }
        }

        for decl in declarations.iter().filter(|d| d.kind == DeclarationKind::Function) {
            let sid = self.pool.intern(&decl.name.name);
            let function = decl.function.as_ref().expect("a function-kind declaration always carries its literal");
            let nested_index = self.lower_function(
                function.id,
                false,
                function.name.as_deref(),
                &function.params,
                &function.declarations,
                &function.body,
                function.strict,
                function.span,
            );
            let value =
                self.push(ctx, Instruction::new(Opcode::NewFunctionDeclaration { function_index: nested_index as u32 }, IrType::Value));
            let storage = analyzed.variables.get(&sid).map_or(AStorage::Unallocated, |v| v.storage);
            if storage == AStorage::Context {
                self.push(ctx, Instruction::new(Opcode::Declare { kind: DeclKind::Function, name: sid }, IrType::Boolean));
                let cache = self.context_cache(ctx, sid);
                self.push(
                    ctx,
                    Instruction::new(Opcode::CtxPut { name: sid, cache, value: ValueRef::Instruction(value) }, IrType::Boolean),
                );
            } else {
                self.push(ctx, Instruction::new(Opcode::MemStore { dest: ValueRef::Slot(sid), value: ValueRef::Instruction(value) }, IrType::Void));
            }
        }
        for decl in declarations.iter().filter(|d| d.kind == DeclarationKind::Variable) {
            let sid = self.pool.intern(&decl.name.name);
            let storage = analyzed.variables.get(&sid).map_or(AStorage::Unallocated, |v| v.storage);
            if storage == AStorage::Context {
                self.push(ctx, Instruction::new(Opcode::Declare { kind: DeclKind::Variable, name: sid }, IrType::Boolean));
            }
        }

        for stmt in body {
            self.lower_statement(ctx, stmt);
        }
    }

    // -- reference resolution ---------------------------------------------

    fn resolve_identifier(&mut self, ctx: &FunctionCtx, name: &str) -> Reference {
        let sid = self.pool.intern(name);
        let owner = self.analyzed.get(&ctx.id).expect("every lowering context has a matching analyzed entry");
        // `arguments` is never inherited from an enclosing function -- it
        // always names the innermost real function's own reified object,
        // unless a parameter or declared binding of that name shadows it
        // (caught by the `variables` lookup below before this ever fires).
        if name == "arguments" && owner.needs_arguments_object && !owner.variables.contains_key(&sid) {
            return Reference::Value(ValueRef::Slot(sid));
        }
        let mut fid = ctx.id;
        loop {
            let Some(func) = self.analyzed.get(&fid) else { break };
            if let Some(var) = func.variables.get(&sid) {
                return match var.storage {
                    AStorage::Context | AStorage::Unallocated => Reference::Context(sid),
                    AStorage::Local | AStorage::LocalExtra => Reference::Value(ValueRef::Slot(sid)),
                };
            }
            match func.parent {
                Some(parent) => fid = parent,
                None => break,
            }
        }
        Reference::Context(sid)
    }

    fn lower_reference(&mut self, ctx: &mut FunctionCtx, expr: &Expression) -> Reference {
        match expr {
            Expression::Identifier { name, .. } => self.resolve_identifier(ctx, name),
            Expression::Property { object, key, .. } => {
                let obj = self.lower_expression(ctx, object);
                let key = self.property_access_key(ctx, key);
                Reference::Property(obj, key)
            }
            _ => unreachable!("the parser only accepts identifiers or property accesses as assignment/update targets"),
        }
    }

    fn expand_ref_get(&mut self, ctx: &mut FunctionCtx, reference: Reference) -> ValueRef {
        match reference {
            Reference::Value(v) => v,
            Reference::Context(name) => {
                let cache = self.context_cache(ctx, name);
                let id = self.push(ctx, Instruction::new(Opcode::CtxGet { name, cache }, IrType::Value));
                self.branch_on_failure(ctx, ValueRef::Instruction(id));
                ValueRef::Instruction(id)
            }
            Reference::Property(object, key) => match key {
                PropertyKeyOperand::Dynamic(k) => {
                    let id = self.push(ctx, Instruction::new(Opcode::PropGetSlow { object, key: k }, IrType::Value));
                    self.branch_on_failure(ctx, ValueRef::Instruction(id));
                    ValueRef::Instruction(id)
                }
                _ => {
                    let id = self.push(ctx, Instruction::new(Opcode::PropGet { object, key, cache: 0 }, IrType::Value));
                    self.branch_on_failure(ctx, ValueRef::Instruction(id));
                    ValueRef::Instruction(id)
                }
            },
        }
    }

    fn expand_ref_put(&mut self, ctx: &mut FunctionCtx, reference: Reference, value: ValueRef) {
        match reference {
            Reference::Value(ValueRef::Slot(sid)) => {
                self.push(ctx, Instruction::new(Opcode::MemStore { dest: ValueRef::Slot(sid), value }, IrType::Void));
            }
            Reference::Value(_) => unreachable!("a `local`/`local-extra` reference is always a named slot"),
            Reference::Context(name) => {
                let cache = self.context_cache(ctx, name);
                let id = self.push(ctx, Instruction::new(Opcode::CtxPut { name, cache, value }, IrType::Boolean));
                self.branch_on_failure(ctx, ValueRef::Instruction(id));
            }
            Reference::Property(object, key) => match key {
                PropertyKeyOperand::Dynamic(k) => {
                    let id = self.push(ctx, Instruction::new(Opcode::PropPutSlow { object, key: k, value }, IrType::Boolean));
                    self.branch_on_failure(ctx, ValueRef::Instruction(id));
                }
                _ => {
                    let id = self.push(ctx, Instruction::new(Opcode::PropPut { object, key, cache: 0, value }, IrType::Boolean));
                    self.branch_on_failure(ctx, ValueRef::Instruction(id));
                }
            },
        }
    }

    fn static_property_key(&mut self, key: &PropertyKey) -> PropertyKeyOperand {
        match key {
            PropertyKey::Identifier(name) | PropertyKey::String(name) => PropertyKeyOperand::Named(self.pool.intern(name)),
            PropertyKey::Number(n) => {
                if n.fract() == 0.0 && *n >= 0.0 && *n <= f64::from(u32::MAX) {
                    PropertyKeyOperand::Indexed(*n as u32)
                } else {
                    PropertyKeyOperand::Named(self.pool.intern(&n.to_string()))
                }
            }
        }
    }

    fn property_access_key(&mut self, ctx: &mut FunctionCtx, key: &PropertyAccessKey) -> PropertyKeyOperand {
        match key {
            PropertyAccessKey::Static(k) => self.static_property_key(k),
            PropertyAccessKey::Computed(expr) => match expr.as_ref() {
                Expression::String { value, .. } => PropertyKeyOperand::Named(self.pool.intern(value)),
                Expression::Number { value, .. } if value.fract() == 0.0 && *value >= 0.0 && *value <= f64::from(u32::MAX) => {
                    PropertyKeyOperand::Indexed(*value as u32)
                }
                _ => {
                    let v = self.lower_expression(ctx, expr);
                    PropertyKeyOperand::Dynamic(v)
                }
            },
        }
    }

    // -- expression lowering ------------------------------------------------

    fn lower_expression(&mut self, ctx: &mut FunctionCtx, expr: &Expression) -> ValueRef {
        match expr {
            Expression::This { .. } => ValueRef::Constant(Constant::TaggedValue("this")),
            Expression::Null { .. } => ValueRef::Constant(Constant::TypedNull(IrType::Value)),
            Expression::Boolean { value, .. } => {
                let id = self.push(ctx, Instruction::new(Opcode::ValFromBoolean(ValueRef::Constant(Constant::Boolean(*value))), IrType::Value));
                ValueRef::Instruction(id)
            }
            Expression::Number { value, .. } => {
                let id = self.push(ctx, Instruction::new(Opcode::ValFromDouble(ValueRef::Constant(Constant::Double(*value))), IrType::Value));
                ValueRef::Instruction(id)
            }
            Expression::String { value, .. } => {
                let sid = self.pool.intern(value);
                let id = self.push(ctx, Instruction::new(Opcode::ValFromString(ValueRef::Constant(Constant::InternedString(sid))), IrType::Value));
                ValueRef::Instruction(id)
            }
            Expression::Regex { pattern, flags, .. } => {
                let p = self.pool.intern(pattern);
                let f = self.pool.intern(flags);
                let id = self.push(ctx, Instruction::new(Opcode::NewRegex { pattern: p, flags: f }, IrType::Value));
                ValueRef::Instruction(id)
            }
            Expression::Identifier { name, .. } => {
                let reference = self.resolve_identifier(ctx, name);
                self.expand_ref_get(ctx, reference)
            }
            Expression::Array { elements, .. } => {
                let vals = elements.iter().map(|e| e.as_ref().map(|e| self.lower_expression(ctx, e))).collect();
                let id = self.push(ctx, Instruction::new(Opcode::NewArray { elements: vals }, IrType::Value));
                ValueRef::Instruction(id)
            }
            Expression::Object { properties, .. } => self.lower_object_literal(ctx, properties),
            Expression::FunctionExpression { function } => {
                let nested_index = self.lower_function(
                    function.id,
                    false,
                    function.name.as_deref(),
                    &function.params,
                    &function.declarations,
                    &function.body,
                    function.strict,
                    function.span,
                );
                let id = self.push(ctx, Instruction::new(Opcode::NewFunctionExpression { function_index: nested_index as u32 }, IrType::Value));
                ValueRef::Instruction(id)
            }
            Expression::Binary { op, left, right, span } => self.lower_binary(ctx, *op, left, right, *span),
            Expression::Unary { op, argument, span } => self.lower_unary(ctx, *op, argument, *span),
            Expression::Update { op, prefix, argument, .. } => self.lower_update(ctx, *op, *prefix, argument),
            Expression::Assignment { op, target, value, .. } => self.lower_assignment(ctx, *op, target, value),
            Expression::Conditional { test, consequent, alternate, .. } => self.lower_conditional(ctx, test, consequent, alternate),
            Expression::Property { object, key, .. } => {
                let obj = self.lower_expression(ctx, object);
                let key = self.property_access_key(ctx, key);
                self.expand_ref_get(ctx, Reference::Property(obj, key))
            }
            Expression::Call { callee, arguments, .. } => self.lower_call(ctx, callee, arguments),
            Expression::CallNew { callee, arguments, .. } => self.lower_new(ctx, callee, arguments),
            Expression::Nothing => ValueRef::Constant(Constant::TaggedValue("undefined")),
        }
    }

    fn lower_binary(&mut self, ctx: &mut FunctionCtx, op: BinaryOp, left: &Expression, right: &Expression, span: SourceSpan) -> ValueRef {
        let _ = span;
        match op {
            BinaryOp::LogicalAnd | BinaryOp::LogicalOr => self.lower_logical(ctx, op, left, right),
            BinaryOp::Comma => {
                self.lower_expression(ctx, left);
                self.lower_expression(ctx, right)
            }
            _ => {
                let lhs = self.lower_expression(ctx, left);
                let rhs = self.lower_expression(ctx, right);
                let id = self.push(ctx, Instruction::new(Opcode::BinaryEs { op: map_es_binary_op(op), lhs, rhs }, IrType::Value));
                self.branch_on_failure(ctx, ValueRef::Instruction(id));
                ValueRef::Instruction(id)
            }
        }
    }

    fn lower_logical(&mut self, ctx: &mut FunctionCtx, op: BinaryOp, left: &Expression, right: &Expression) -> ValueRef {
        let dest = self.fresh_temp(ctx);
        let lhs = self.lower_expression(ctx, left);
        self.push(ctx, Instruction::new(Opcode::MemStore { dest: ValueRef::Slot(dest), value: lhs.clone() }, IrType::Void));
        let truthy = self.push(ctx, Instruction::new(Opcode::ValToBoolean(lhs), IrType::Boolean));
        let rhs_block = self.new_block(ctx);
        let done_block = self.new_block(ctx);
        let (if_true, if_false) = match op {
            BinaryOp::LogicalAnd => (rhs_block, done_block),
            BinaryOp::LogicalOr => (done_block, rhs_block),
            _ => unreachable!("lower_logical only handles && and ||"),
        };
        self.terminate_branch(ctx, ValueRef::Instruction(truthy), if_true, if_false);
        self.set_current(ctx, rhs_block);
        let rhs = self.lower_expression(ctx, right);
        self.push(ctx, Instruction::new(Opcode::MemStore { dest: ValueRef::Slot(dest), value: rhs }, IrType::Void));
        self.terminate_jump(ctx, done_block);
        self.set_current(ctx, done_block);
        ValueRef::Slot(dest)
    }

    fn lower_conditional(&mut self, ctx: &mut FunctionCtx, test: &Expression, consequent: &Expression, alternate: &Expression) -> ValueRef {
        let test_val = self.lower_expression(ctx, test);
        let truthy = self.push(ctx, Instruction::new(Opcode::ValToBoolean(test_val), IrType::Boolean));
        let then_block = self.new_block(ctx);
        let else_block = self.new_block(ctx);
        let done_block = self.new_block(ctx);
        self.terminate_branch(ctx, ValueRef::Instruction(truthy), then_block, else_block);
        let dest = self.fresh_temp(ctx);
        self.set_current(ctx, then_block);
        let then_val = self.lower_expression(ctx, consequent);
        self.push(ctx, Instruction::new(Opcode::MemStore { dest: ValueRef::Slot(dest), value: then_val }, IrType::Void));
        self.terminate_jump(ctx, done_block);
        self.set_current(ctx, else_block);
        let else_val = self.lower_expression(ctx, alternate);
        self.push(ctx, Instruction::new(Opcode::MemStore { dest: ValueRef::Slot(dest), value: else_val }, IrType::Void));
        self.terminate_jump(ctx, done_block);
        self.set_current(ctx, done_block);
        ValueRef::Slot(dest)
    }

    fn lower_unary(&mut self, ctx: &mut FunctionCtx, op: UnaryOp, argument: &Expression, span: SourceSpan) -> ValueRef {
        let _ = span;
        match op {
            UnaryOp::Delete => self.lower_delete(ctx, argument),
            UnaryOp::Void => {
                self.lower_expression(ctx, argument);
                ValueRef::Constant(Constant::TaggedValue("undefined"))
            }
            UnaryOp::Typeof => self.lower_typeof(ctx, argument),
            UnaryOp::Plus => {
                let v = self.lower_expression(ctx, argument);
                let d = self.push(ctx, Instruction::new(Opcode::ValToDouble(v), IrType::Double));
                let id = self.push(ctx, Instruction::new(Opcode::ValFromDouble(ValueRef::Instruction(d)), IrType::Value));
                ValueRef::Instruction(id)
            }
            UnaryOp::Minus => {
                let v = self.lower_expression(ctx, argument);
                let id = self.push(ctx, Instruction::new(Opcode::UnaryEs { op: EsUnaryOp::Neg, operand: v }, IrType::Value));
                self.branch_on_failure(ctx, ValueRef::Instruction(id));
                ValueRef::Instruction(id)
            }
            UnaryOp::BitNot => {
                let v = self.lower_expression(ctx, argument);
                let id = self.push(ctx, Instruction::new(Opcode::UnaryEs { op: EsUnaryOp::BitNot, operand: v }, IrType::Value));
                self.branch_on_failure(ctx, ValueRef::Instruction(id));
                ValueRef::Instruction(id)
            }
            UnaryOp::LogicalNot => {
                let v = self.lower_expression(ctx, argument);
                let b = self.push(ctx, Instruction::new(Opcode::ValToBoolean(v), IrType::Boolean));
                let id = self.push(ctx, Instruction::new(Opcode::UnaryEs { op: EsUnaryOp::LogNot, operand: ValueRef::Instruction(b) }, IrType::Value));
                ValueRef::Instruction(id)
            }
        }
    }

    /// `delete` of a bare identifier resolving to a `local` statically
    /// folds to `false`: declarative bindings are non-configurable in
    /// ES5.1, so there's no runtime check left to emit.
    fn lower_delete(&mut self, ctx: &mut FunctionCtx, argument: &Expression) -> ValueRef {
        match argument {
            Expression::Property { object, key, .. } => {
                let obj = self.lower_expression(ctx, object);
                let key = self.property_access_key(ctx, key);
                let id = match key {
                    PropertyKeyOperand::Dynamic(k) => self.push(ctx, Instruction::new(Opcode::PropDeleteSlow { object: obj, key: k }, IrType::Boolean)),
                    _ => self.push(ctx, Instruction::new(Opcode::PropDelete { object: obj, key, cache: 0 }, IrType::Boolean)),
                };
                let bool_id = self.push(ctx, Instruction::new(Opcode::ValFromBoolean(ValueRef::Instruction(id)), IrType::Value));
                ValueRef::Instruction(bool_id)
            }
            Expression::Identifier { name, .. } => match self.resolve_identifier(ctx, name) {
                Reference::Value(_) => {
                    let id = self.push(ctx, Instruction::new(Opcode::ValFromBoolean(ValueRef::Constant(Constant::Boolean(false))), IrType::Value));
                    ValueRef::Instruction(id)
                }
                Reference::Context(sid) => {
                    let del = self.push(ctx, Instruction::new(Opcode::CtxDelete { name: sid }, IrType::Boolean));
                    let id = self.push(ctx, Instruction::new(Opcode::ValFromBoolean(ValueRef::Instruction(del)), IrType::Value));
                    ValueRef::Instruction(id)
                }
                Reference::Property(..) => unreachable!("resolving a bare identifier never yields a property reference"),
            },
            _ => {
                self.lower_expression(ctx, argument);
                let id = self.push(ctx, Instruction::new(Opcode::ValFromBoolean(ValueRef::Constant(Constant::Boolean(true))), IrType::Value));
                ValueRef::Instruction(id)
            }
        }
    }

    /// `typeof` on an identifier catches a failed context lookup, clears
    /// the pending exception, and substitutes `"undefined"` instead of
    /// propagating -- the one place ES5.1 treats an unresolved reference as
    /// benign rather than a `ReferenceError`.
    fn lower_typeof(&mut self, ctx: &mut FunctionCtx, argument: &Expression) -> ValueRef {
        if let Expression::Identifier { name, .. } = argument {
            if let Reference::Context(sid) = self.resolve_identifier(ctx, name) {
                let cache = self.context_cache(ctx, sid);
                let id = self.push(ctx, Instruction::new(Opcode::CtxGet { name: sid, cache }, IrType::Value));
                let ok_block = self.new_block(ctx);
                let undef_block = self.new_block(ctx);
                let done_block = self.new_block(ctx);
                self.terminate_branch(ctx, ValueRef::Instruction(id), ok_block, undef_block);
                let dest = self.fresh_temp(ctx);

                self.set_current(ctx, ok_block);
                let typeof_id = self.push(ctx, Instruction::new(Opcode::UnaryEs { op: EsUnaryOp::Typeof, operand: ValueRef::Instruction(id) }, IrType::Value));
                self.push(ctx, Instruction::new(Opcode::MemStore { dest: ValueRef::Slot(dest), value: ValueRef::Instruction(typeof_id) }, IrType::Void));
                self.terminate_jump(ctx, done_block);

                self.set_current(ctx, undef_block);
                self.push(ctx, Instruction::new(Opcode::ExClear, IrType::Void));
                let undef_sid = self.pool.intern("undefined");
                let str_id = self.push(ctx, Instruction::new(Opcode::ValFromString(ValueRef::Constant(Constant::InternedString(undef_sid))), IrType::Value));
                self.push(ctx, Instruction::new(Opcode::MemStore { dest: ValueRef::Slot(dest), value: ValueRef::Instruction(str_id) }, IrType::Void));
                self.terminate_jump(ctx, done_block);

                self.set_current(ctx, done_block);
                return ValueRef::Slot(dest);
            }
        }
        let v = self.lower_expression(ctx, argument);
        let id = self.push(ctx, Instruction::new(Opcode::UnaryEs { op: EsUnaryOp::Typeof, operand: v }, IrType::Value));
        ValueRef::Instruction(id)
    }

    fn lower_update(&mut self, ctx: &mut FunctionCtx, op: UpdateOp, prefix: bool, argument: &Expression) -> ValueRef {
        let reference = self.lower_reference(ctx, argument);
        let old = self.expand_ref_get(ctx, reference.clone());
        let old_double = self.push(ctx, Instruction::new(Opcode::ValToDouble(old), IrType::Double));
        let raw_op = match op {
            UpdateOp::Increment => RawBinaryOp::Add,
            UpdateOp::Decrement => RawBinaryOp::Sub,
        };
        let new_double = self.push(
            ctx,
            Instruction::new(Opcode::BinaryRaw { op: raw_op, lhs: ValueRef::Instruction(old_double), rhs: ValueRef::Constant(Constant::Double(1.0)) }, IrType::Double),
        );
        let new_value_id = self.push(ctx, Instruction::new(Opcode::ValFromDouble(ValueRef::Instruction(new_double)), IrType::Value));
        let new_value = ValueRef::Instruction(new_value_id);
        self.expand_ref_put(ctx, reference, new_value.clone());
        if prefix {
            new_value
        } else {
            let old_id = self.push(ctx, Instruction::new(Opcode::ValFromDouble(ValueRef::Instruction(old_double)), IrType::Value));
            ValueRef::Instruction(old_id)
        }
    }

    fn lower_assignment(&mut self, ctx: &mut FunctionCtx, op: AssignOp, target: &Expression, value: &Expression) -> ValueRef {
        if op == AssignOp::Assign {
            let reference = self.lower_reference(ctx, target);
            let v = self.lower_expression(ctx, value);
            self.expand_ref_put(ctx, reference, v.clone());
            return v;
        }
        let reference = self.lower_reference(ctx, target);
        let old = self.expand_ref_get(ctx, reference.clone());
        let rhs = self.lower_expression(ctx, value);
        let id = self.push(ctx, Instruction::new(Opcode::BinaryEs { op: map_compound_op(op), lhs: old, rhs }, IrType::Value));
        self.branch_on_failure(ctx, ValueRef::Instruction(id));
        let result = ValueRef::Instruction(id);
        self.expand_ref_put(ctx, reference, result.clone());
        result
    }

    fn lower_object_literal(&mut self, ctx: &mut FunctionCtx, properties: &[ObjectProperty]) -> ValueRef {
        let id = self.push(ctx, Instruction::new(Opcode::NewObject, IrType::Value));
        let object = ValueRef::Instruction(id);
        for property in properties {
            match property {
                ObjectProperty::Data { key, value } => {
                    let key_operand = self.static_property_key(key);
                    let v = self.lower_expression(ctx, value);
                    self.push(ctx, Instruction::new(Opcode::PropDefineData { object: object.clone(), key: key_operand, value: v }, IrType::Void));
                }
                ObjectProperty::Accessor { key, kind, function } => {
                    let key_operand = self.static_property_key(key);
                    let nested_index = self.lower_function(
                        function.id,
                        false,
                        function.name.as_deref(),
                        &function.params,
                        &function.declarations,
                        &function.body,
                        function.strict,
                        function.span,
                    );
                    let func_id = self.push(ctx, Instruction::new(Opcode::NewFunctionExpression { function_index: nested_index as u32 }, IrType::Value));
                    let (getter, setter) = match kind {
                        AccessorKind::Get => (Some(ValueRef::Instruction(func_id)), None),
                        AccessorKind::Set => (None, Some(ValueRef::Instruction(func_id))),
                    };
                    self.push(ctx, Instruction::new(Opcode::PropDefineAccessor { object: object.clone(), key: key_operand, getter, setter }, IrType::Void));
                }
            }
        }
        object
    }

    fn lower_call(&mut self, ctx: &mut FunctionCtx, callee: &Expression, arguments: &[Expression]) -> ValueRef {
        let id = match callee {
            Expression::Property { object, key, .. } => {
                let obj = self.lower_expression(ctx, object);
                let key_operand = self.property_access_key(ctx, key);
                let args: Vec<ValueRef> = arguments.iter().map(|a| self.lower_expression(ctx, a)).collect();
                match key_operand {
                    PropertyKeyOperand::Dynamic(k) => self.push(ctx, Instruction::new(Opcode::CallKeyedSlow { object: obj, key: k, args }, IrType::Value)),
                    _ => self.push(ctx, Instruction::new(Opcode::CallKeyed { object: obj, key: key_operand, args }, IrType::Value)),
                }
            }
            Expression::Identifier { name, .. } => match self.resolve_identifier(ctx, name) {
                Reference::Context(sid) => {
                    let args: Vec<ValueRef> = arguments.iter().map(|a| self.lower_expression(ctx, a)).collect();
                    self.push(ctx, Instruction::new(Opcode::CallNamed { name: sid, args }, IrType::Value))
                }
                Reference::Value(callee_val) => {
                    let args: Vec<ValueRef> = arguments.iter().map(|a| self.lower_expression(ctx, a)).collect();
                    self.push(
                        ctx,
                        Instruction::new(Opcode::CallNormal { callee: callee_val, this_val: ValueRef::Constant(Constant::TaggedValue("undefined")), args }, IrType::Value),
                    )
                }
                Reference::Property(..) => unreachable!("resolving a bare identifier never yields a property reference"),
            },
            _ => {
                let callee_val = self.lower_expression(ctx, callee);
                let args: Vec<ValueRef> = arguments.iter().map(|a| self.lower_expression(ctx, a)).collect();
                self.push(
                    ctx,
                    Instruction::new(Opcode::CallNormal { callee: callee_val, this_val: ValueRef::Constant(Constant::TaggedValue("undefined")), args }, IrType::Value),
                )
            }
        };
        self.branch_on_failure(ctx, ValueRef::Instruction(id));
        ValueRef::Instruction(id)
    }

    fn lower_new(&mut self, ctx: &mut FunctionCtx, callee: &Expression, arguments: &[Expression]) -> ValueRef {
        let callee_val = self.lower_expression(ctx, callee);
        let args: Vec<ValueRef> = arguments.iter().map(|a| self.lower_expression(ctx, a)).collect();
        let id = self.push(ctx, Instruction::new(Opcode::CallNew { callee: callee_val, args }, IrType::Value));
        self.branch_on_failure(ctx, ValueRef::Instruction(id));
        ValueRef::Instruction(id)
    }

    // -- statement lowering ------------------------------------------------

    fn lower_statement(&mut self, ctx: &mut FunctionCtx, stmt: &Statement) {
        match stmt {
            Statement::Empty { .. } | Statement::Debugger { .. } => {}
            Statement::Expression { expr, .. } => {
                self.lower_expression(ctx, expr);
            }
            Statement::Block { body, .. } => {
                for s in body {
                    self.lower_statement(ctx, s);
                }
            }
            Statement::VariableDeclaration { decls, .. } => {
                for (name, init) in decls {
                    if let Some(init) = init {
                        let reference = self.resolve_identifier(ctx, &name.name);
                        let v = self.lower_expression(ctx, init);
                        self.expand_ref_put(ctx, reference, v);
                    }
                }
            }
            // Hoisted and linked during the declarations-phase pass in
            // `lower_function_body`; nothing left to do at its original
            // source position.
            Statement::FunctionDeclaration { .. } => {}
            Statement::If { test, consequent, alternate, .. } => self.lower_if(ctx, test, consequent, alternate.as_deref()),
            Statement::DoWhile { body, test, labels, .. } => self.lower_do_while(ctx, body, test, labels),
            Statement::While { test, body, labels, .. } => self.lower_while(ctx, test, body, labels),
            Statement::For { init, test, update, body, labels, .. } => {
                self.lower_for(ctx, init, test.as_ref(), update.as_ref(), body, labels);
            }
            Statement::ForIn { target, object, body, labels, .. } => self.lower_for_in(ctx, target, object, body, labels),
            Statement::Continue { label, .. } => self.lower_continue(ctx, label.as_deref()),
            Statement::Break { label, .. } => self.lower_break(ctx, label.as_deref()),
            Statement::Return { argument, .. } => self.lower_return_stmt(ctx, argument.as_ref()),
            Statement::With { object, body, .. } => self.lower_with(ctx, object, body),
            Statement::Switch { discriminant, cases, labels, .. } => self.lower_switch(ctx, discriminant, cases, labels),
            Statement::Throw { argument, .. } => self.lower_throw(ctx, argument),
            Statement::Try { block, handler, finalizer, .. } => self.lower_try(ctx, block, handler.as_ref(), finalizer.as_deref()),
            Statement::Labeled { body, .. } => self.lower_statement(ctx, body),
        }
    }

    fn lower_if(&mut self, ctx: &mut FunctionCtx, test: &Expression, consequent: &Statement, alternate: Option<&Statement>) {
        let test_val = self.lower_expression(ctx, test);
        let truthy = self.push(ctx, Instruction::new(Opcode::ValToBoolean(test_val), IrType::Boolean));
        let then_block = self.new_block(ctx);
        let done_block = self.new_block(ctx);
        let else_block = if alternate.is_some() { self.new_block(ctx) } else { done_block };
        self.terminate_branch(ctx, ValueRef::Instruction(truthy), then_block, else_block);

        self.set_current(ctx, then_block);
        self.lower_statement(ctx, consequent);
        if !self.current_block_terminated(ctx) {
            self.terminate_jump(ctx, done_block);
        }

        if let Some(alt) = alternate {
            self.set_current(ctx, else_block);
            self.lower_statement(ctx, alt);
            if !self.current_block_terminated(ctx) {
                self.terminate_jump(ctx, done_block);
            }
        }
        self.set_current(ctx, done_block);
    }

    fn lower_while(&mut self, ctx: &mut FunctionCtx, test: &Expression, body: &Statement, labels: &[String]) {
        let test_block = self.new_block(ctx);
        let body_block = self.new_block(ctx);
        let done_block = self.new_block(ctx);
        self.terminate_jump(ctx, test_block);

        self.set_current(ctx, test_block);
        let test_val = self.lower_expression(ctx, test);
        let truthy = self.push(ctx, Instruction::new(Opcode::ValToBoolean(test_val), IrType::Boolean));
        self.terminate_branch(ctx, ValueRef::Instruction(truthy), body_block, done_block);

        self.set_current(ctx, body_block);
        ctx.loop_targets.push(LoopTarget { labels: labels.to_vec(), continue_block: Some(test_block), break_block: done_block, base_depth: ctx.epilogues.len() });
        self.lower_statement(ctx, body);
        ctx.loop_targets.pop();
        if !self.current_block_terminated(ctx) {
            self.terminate_jump(ctx, test_block);
        }
        self.set_current(ctx, done_block);
    }

    fn lower_do_while(&mut self, ctx: &mut FunctionCtx, body: &Statement, test: &Expression, labels: &[String]) {
        let body_block = self.new_block(ctx);
        let test_block = self.new_block(ctx);
        let done_block = self.new_block(ctx);
        self.terminate_jump(ctx, body_block);

        self.set_current(ctx, body_block);
        ctx.loop_targets.push(LoopTarget { labels: labels.to_vec(), continue_block: Some(test_block), break_block: done_block, base_depth: ctx.epilogues.len() });
        self.lower_statement(ctx, body);
        ctx.loop_targets.pop();
        if !self.current_block_terminated(ctx) {
            self.terminate_jump(ctx, test_block);
        }

        self.set_current(ctx, test_block);
        let test_val = self.lower_expression(ctx, test);
        let truthy = self.push(ctx, Instruction::new(Opcode::ValToBoolean(test_val), IrType::Boolean));
        self.terminate_branch(ctx, ValueRef::Instruction(truthy), body_block, done_block);
        self.set_current(ctx, done_block);
    }

    fn lower_for(&mut self, ctx: &mut FunctionCtx, init: &ForInit, test: Option<&Expression>, update: Option<&Expression>, body: &Statement, labels: &[String]) {
        match init {
            ForInit::Expression(e) => {
                self.lower_expression(ctx, e);
            }
            ForInit::VarDeclarations(decls) => {
                for (name, init) in decls {
                    if let Some(init) = init {
                        let reference = self.resolve_identifier(ctx, &name.name);
                        let v = self.lower_expression(ctx, init);
                        self.expand_ref_put(ctx, reference, v);
                    }
                }
            }
            ForInit::None => {}
        }

        let test_block = self.new_block(ctx);
        let body_block = self.new_block(ctx);
        let update_block = self.new_block(ctx);
        let done_block = self.new_block(ctx);
        self.terminate_jump(ctx, test_block);

        self.set_current(ctx, test_block);
        if let Some(test) = test {
            let test_val = self.lower_expression(ctx, test);
            let truthy = self.push(ctx, Instruction::new(Opcode::ValToBoolean(test_val), IrType::Boolean));
            self.terminate_branch(ctx, ValueRef::Instruction(truthy), body_block, done_block);
        } else {
            self.terminate_jump(ctx, body_block);
        }

        self.set_current(ctx, body_block);
        ctx.loop_targets.push(LoopTarget { labels: labels.to_vec(), continue_block: Some(update_block), break_block: done_block, base_depth: ctx.epilogues.len() });
        self.lower_statement(ctx, body);
        ctx.loop_targets.pop();
        if !self.current_block_terminated(ctx) {
            self.terminate_jump(ctx, update_block);
        }

        self.set_current(ctx, update_block);
        if let Some(update) = update {
            self.lower_expression(ctx, update);
        }
        self.terminate_jump(ctx, test_block);
        self.set_current(ctx, done_block);
    }

    fn lower_for_in(&mut self, ctx: &mut FunctionCtx, target: &ForInTarget, object: &Expression, body: &Statement, labels: &[String]) {
        let obj = self.lower_expression(ctx, object);
        let is_null = self.push(ctx, Instruction::new(Opcode::ValIsNull(obj.clone()), IrType::Boolean));
        let is_undef = self.push(ctx, Instruction::new(Opcode::ValIsUndefined(obj.clone()), IrType::Boolean));
        let skip = self.push(
            ctx,
            Instruction::new(Opcode::BinaryRaw { op: RawBinaryOp::Or, lhs: ValueRef::Instruction(is_null), rhs: ValueRef::Instruction(is_undef) }, IrType::Boolean),
        );
        let iter_block = self.new_block(ctx);
        let done_block = self.new_block(ctx);
        self.terminate_branch(ctx, ValueRef::Instruction(skip), done_block, iter_block);

        self.set_current(ctx, iter_block);
        let iter = self.push(ctx, Instruction::new(Opcode::PropIteratorNew { object: obj }, IrType::Opaque("prp_it")));

        let test_block = self.new_block(ctx);
        let body_block = self.new_block(ctx);
        self.terminate_jump(ctx, test_block);

        self.set_current(ctx, test_block);
        // `prp_it_next`'s own success flag doubles as the loop condition
        // here; the real ABI writes the next key through a separate
        // out-parameter, elided for the same reason as the get/put family.
        let next = self.push(ctx, Instruction::new(Opcode::PropIteratorNext { iterator: ValueRef::Instruction(iter) }, IrType::Value));
        self.terminate_branch(ctx, ValueRef::Instruction(next), body_block, done_block);

        self.set_current(ctx, body_block);
        let reference = match target {
            ForInTarget::Expression(e) => self.lower_reference(ctx, e),
            ForInTarget::VarDeclaration(name) => self.resolve_identifier(ctx, &name.name),
        };
        self.expand_ref_put(ctx, reference, ValueRef::Instruction(next));
        ctx.loop_targets.push(LoopTarget { labels: labels.to_vec(), continue_block: Some(test_block), break_block: done_block, base_depth: ctx.epilogues.len() });
        self.lower_statement(ctx, body);
        ctx.loop_targets.pop();
        if !self.current_block_terminated(ctx) {
            self.terminate_jump(ctx, test_block);
        }
        self.set_current(ctx, done_block);
    }

    fn lower_continue(&mut self, ctx: &mut FunctionCtx, label: Option<&str>) {
        let (target, base_depth) = self.find_continue_target(ctx, label);
        self.inflate_epilogues_from(ctx, base_depth);
        // a finally body replayed above may itself have returned/broken out,
        // terminating this block already.
        if !self.current_block_terminated(ctx) {
            self.terminate_jump(ctx, target);
        }
    }

    fn lower_break(&mut self, ctx: &mut FunctionCtx, label: Option<&str>) {
        let (target, base_depth) = self.find_break_target(ctx, label);
        self.inflate_epilogues_from(ctx, base_depth);
        if !self.current_block_terminated(ctx) {
            self.terminate_jump(ctx, target);
        }
    }

    fn lower_return_stmt(&mut self, ctx: &mut FunctionCtx, argument: Option<&Expression>) {
        if let Some(arg) = argument {
            let v = self.lower_expression(ctx, arg);
            self.push(ctx, Instruction::new(Opcode::MemStore { dest: ValueRef::Constant(Constant::ValuePointer), value: v }, IrType::Void));
        }
        self.inflate_epilogues_from(ctx, 0);
        if !self.current_block_terminated(ctx) {
            self.emit_return(ctx, true);
        }
    }

    fn lower_with(&mut self, ctx: &mut FunctionCtx, object: &Expression, body: &Statement) {
        let obj = self.lower_expression(ctx, object);
        let entered = self.push(ctx, Instruction::new(Opcode::CtxEnterWith { object: obj }, IrType::Boolean));
        self.branch_on_failure(ctx, ValueRef::Instruction(entered));

        ctx.epilogues.push(Epilogue::LeaveContext);
        let prev = ctx.exception_actions.last().cloned().expect("the function-level default action is never popped");
        ctx.exception_actions.push(ExceptionAction::Multi(vec![ExceptionAction::LeaveContext, prev]));

        self.lower_statement(ctx, body);

        ctx.exception_actions.pop();
        ctx.epilogues.pop();
        self.push(ctx, Instruction::new(Opcode::CtxLeave, IrType::Void));
    }

    fn lower_switch(&mut self, ctx: &mut FunctionCtx, discriminant: &Expression, cases: &[SwitchCase], labels: &[String]) {
        let disc = self.lower_expression(ctx, discriminant);
        let done_block = self.new_block(ctx);
        ctx.loop_targets.push(LoopTarget { labels: labels.to_vec(), continue_block: None, break_block: done_block, base_depth: ctx.epilogues.len() });

        let case_blocks: Vec<BlockId> = cases.iter().map(|_| self.new_block(ctx)).collect();
        let default_index = cases.iter().position(|c| c.test.is_none());

        for (i, case) in cases.iter().enumerate() {
            let Some(test) = &case.test else { continue };
            let test_val = self.lower_expression(ctx, test);
            let eq = self.push(ctx, Instruction::new(Opcode::BinaryEs { op: EsBinaryOp::StrictEq, lhs: disc.clone(), rhs: test_val }, IrType::Value));
            let truthy = self.push(ctx, Instruction::new(Opcode::ValToBoolean(ValueRef::Instruction(eq)), IrType::Boolean));
            let matched_block = self.new_block(ctx);
            let next_test_block = self.new_block(ctx);
            self.terminate_branch(ctx, ValueRef::Instruction(truthy), matched_block, next_test_block);
            self.set_current(ctx, matched_block);
            self.terminate_jump(ctx, case_blocks[i]);
            self.set_current(ctx, next_test_block);
        }
        // No case matched: go straight to the default clause's body (if
        // any) instead of the source's "walk the case list again" shape --
        // a jump reaches the same clause either way.
        match default_index {
            Some(default_index) => self.terminate_jump(ctx, case_blocks[default_index]),
            None => self.terminate_jump(ctx, done_block),
        }

        for (i, case) in cases.iter().enumerate() {
            self.set_current(ctx, case_blocks[i]);
            for s in &case.consequent {
                self.lower_statement(ctx, s);
            }
            let fallthrough = case_blocks.get(i + 1).copied().unwrap_or(done_block);
            if !self.current_block_terminated(ctx) {
                self.terminate_jump(ctx, fallthrough);
            }
        }

        ctx.loop_targets.pop();
        self.set_current(ctx, done_block);
    }

    fn lower_throw(&mut self, ctx: &mut FunctionCtx, argument: &Expression) {
        let v = self.lower_expression(ctx, argument);
        self.push(ctx, Instruction::new(Opcode::ExSet(v), IrType::Void));
        self.inflate_exception_action(ctx);
    }

    fn lower_try(&mut self, ctx: &mut FunctionCtx, block: &[Statement], handler: Option<&CatchClause>, finalizer: Option<&[Statement]>) {
        let fail_block = self.new_block(ctx);
        let after_try_block = self.new_block(ctx);
        let failed = self.fresh_temp(ctx);
        self.push(ctx, Instruction::new(Opcode::MemStore { dest: ValueRef::Slot(failed), value: ValueRef::Constant(Constant::Boolean(false)) }, IrType::Void));

        if let Some(body) = finalizer {
            ctx.epilogues.push(Epilogue::Finally(Rc::from(body.to_vec())));
        }

        ctx.exception_actions.push(ExceptionAction::Jump(fail_block));
        for s in block {
            self.lower_statement(ctx, s);
        }
        ctx.exception_actions.pop();
        if !self.current_block_terminated(ctx) {
            self.terminate_jump(ctx, after_try_block);
        }

        self.set_current(ctx, fail_block);
        self.push(ctx, Instruction::new(Opcode::MemStore { dest: ValueRef::Slot(failed), value: ValueRef::Constant(Constant::Boolean(true)) }, IrType::Void));
        if let Some(handler) = handler {
            let entered = self.push(ctx, Instruction::new(Opcode::CtxEnterCatch { exception: ValueRef::Constant(Constant::ValuePointer) }, IrType::Boolean));
            self.branch_on_failure(ctx, ValueRef::Instruction(entered));
            let param_sid = self.pool.intern(&handler.param);
            self.push(ctx, Instruction::new(Opcode::Declare { kind: DeclKind::Variable, name: param_sid }, IrType::Boolean));
            let param_cache = self.context_cache(ctx, param_sid);
            self.push(
                ctx,
                Instruction::new(Opcode::CtxPut { name: param_sid, cache: param_cache, value: ValueRef::Constant(Constant::ValuePointer) }, IrType::Boolean),
            );
            let prev = ctx.exception_actions.last().cloned().expect("the function-level default action is never popped");
            ctx.exception_actions.push(ExceptionAction::Multi(vec![ExceptionAction::LeaveContext, prev]));
            for s in &handler.body {
                self.lower_statement(ctx, s);
            }
            ctx.exception_actions.pop();
            if !self.current_block_terminated(ctx) {
                self.push(ctx, Instruction::new(Opcode::CtxLeave, IrType::Void));
                self.push(ctx, Instruction::new(Opcode::MemStore { dest: ValueRef::Slot(failed), value: ValueRef::Constant(Constant::Boolean(false)) }, IrType::Void));
                self.terminate_jump(ctx, after_try_block);
            }
        } else if !self.current_block_terminated(ctx) {
            self.terminate_jump(ctx, after_try_block);
        }

        self.set_current(ctx, after_try_block);
        if let Some(body) = finalizer {
            ctx.epilogues.pop();
            self.push(ctx, Instruction::new(Opcode::ExSaveState, IrType::Void));
            for s in body {
                self.lower_statement(ctx, s);
            }
            self.push(ctx, Instruction::new(Opcode::ExLoadState, IrType::Void));

            let still_failed_block = self.new_block(ctx);
            let done_block = self.new_block(ctx);
            self.terminate_branch(ctx, ValueRef::Slot(failed), still_failed_block, done_block);
            self.set_current(ctx, still_failed_block);
            self.inflate_exception_action(ctx);
            self.set_current(ctx, done_block);
        }
    }
}

fn map_storage(s: AStorage) -> StorageClass {
    match s {
        AStorage::Local | AStorage::Unallocated => StorageClass::Local,
        AStorage::LocalExtra => StorageClass::LocalExtra,
        AStorage::Context => StorageClass::Context,
    }
}

fn map_es_binary_op(op: BinaryOp) -> EsBinaryOp {
    match op {
        BinaryOp::Add => EsBinaryOp::Add,
        BinaryOp::Sub => EsBinaryOp::Sub,
        BinaryOp::Mul => EsBinaryOp::Mul,
        BinaryOp::Div => EsBinaryOp::Div,
        BinaryOp::Mod => EsBinaryOp::Mod,
        BinaryOp::Lt => EsBinaryOp::Lt,
        BinaryOp::Gt => EsBinaryOp::Gt,
        BinaryOp::LtEq => EsBinaryOp::LtEq,
        BinaryOp::GtEq => EsBinaryOp::GtEq,
        BinaryOp::Eq => EsBinaryOp::Eq,
        BinaryOp::NotEq => EsBinaryOp::NotEq,
        BinaryOp::StrictEq => EsBinaryOp::StrictEq,
        BinaryOp::StrictNotEq => EsBinaryOp::StrictNotEq,
        BinaryOp::BitAnd => EsBinaryOp::BitAnd,
        BinaryOp::BitOr => EsBinaryOp::BitOr,
        BinaryOp::BitXor => EsBinaryOp::BitXor,
        BinaryOp::Shl => EsBinaryOp::Shl,
        BinaryOp::Shr => EsBinaryOp::ShrSigned,
        BinaryOp::UShr => EsBinaryOp::ShrUnsigned,
        BinaryOp::In => EsBinaryOp::In,
        BinaryOp::Instanceof => EsBinaryOp::Instanceof,
        BinaryOp::LogicalAnd | BinaryOp::LogicalOr | BinaryOp::Comma => {
            unreachable!("logical and comma operators are handled before reaching a binary-op lowering")
        }
    }
}

fn map_compound_op(op: AssignOp) -> EsBinaryOp {
    match op {
        AssignOp::AddAssign => EsBinaryOp::Add,
        AssignOp::SubAssign => EsBinaryOp::Sub,
        AssignOp::MulAssign => EsBinaryOp::Mul,
        AssignOp::DivAssign => EsBinaryOp::Div,
        AssignOp::ModAssign => EsBinaryOp::Mod,
        AssignOp::ShlAssign => EsBinaryOp::Shl,
        AssignOp::ShrAssign => EsBinaryOp::ShrSigned,
        AssignOp::UShrAssign => EsBinaryOp::ShrUnsigned,
        AssignOp::BitAndAssign => EsBinaryOp::BitAnd,
        AssignOp::BitOrAssign => EsBinaryOp::BitOr,
        AssignOp::BitXorAssign => EsBinaryOp::BitXor,
        AssignOp::Assign => unreachable!("plain assignment never reaches the compound-op path"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer;
    use crate::parser::Parser;

    fn build_module(src: &str) -> Module {
        let program = Parser::parse_program(src).expect("parse should succeed");
        let mut analysis = analyzer::analyze(&program);
        build(&program, &mut analysis)
    }

    #[test]
    fn every_function_is_well_formed() {
        let module = build_module("var x = 1; function f(a) { return a + x; } f(2);");
        for function in &module.functions {
            assert!(function.is_well_formed(), "{:?}", function);
        }
    }

    #[test]
    fn program_function_always_ends_in_a_terminator() {
        let module = build_module("1 + 1;");
        let program_fn = &module.functions[0];
        let last_block = (program_fn.blocks.len() - 1) as BlockId;
        assert!(program_fn.block(last_block).is_terminated());
    }

    #[test]
    fn nested_function_declaration_gets_its_own_module_entry() {
        let module = build_module("function outer() { function inner() { return 1; } return inner(); }");
        assert_eq!(module.functions.len(), 3);
    }

    #[test]
    fn arguments_object_init_emitted_when_needed() {
        let module = build_module("function f() { return arguments.length; }");
        let inner = &module.functions[1];
        assert!(inner.needs_arguments_object);
        let has_args_init = inner.blocks.iter().any(|b| b.instructions.iter().any(|i| matches!(i.opcode, Opcode::ArgsObjInit { .. })));
        assert!(has_args_init);
    }

    #[test]
    fn delete_of_local_folds_to_constant_false() {
        let module = build_module("function f() { var x; return delete x; }");
        let inner = &module.functions[1];
        let has_ctx_delete = inner.blocks.iter().any(|b| b.instructions.iter().any(|i| matches!(i.opcode, Opcode::CtxDelete { .. })));
        assert!(!has_ctx_delete);
    }

    #[test]
    fn try_finally_emits_save_and_load_state() {
        let module = build_module("function f() { try { throw 1; } finally { 2; } }");
        let inner = &module.functions[1];
        let saves = inner.blocks.iter().flat_map(|b| b.instructions.iter()).filter(|i| matches!(i.opcode, Opcode::ExSaveState)).count();
        let loads = inner.blocks.iter().flat_map(|b| b.instructions.iter()).filter(|i| matches!(i.opcode, Opcode::ExLoadState)).count();
        assert!(saves >= 1 && saves == loads);
    }
}
