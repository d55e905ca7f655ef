//! Variable-storage classification.
//!
//! Walks a parsed [`Program`], builds one [`AnalyzedFunction`] per function
//! (plus a synthetic one for the program itself), and assigns each binding a
//! [`StorageClass`]: whether it lives in a stack slot, a heap-bound "extra"
//! slot reachable from a captured scope chain, or a reified context binding
//! an environment record owns. The IR builder consumes this table directly;
//! it never re-derives storage decisions.

use ahash::{AHashMap, AHashSet};

use crate::ast::{
    Declaration, DeclarationKind, Expression, ForInTarget, ForInit, FunctionLiteral, ObjectProperty, Program,
    PropertyAccessKey, Statement,
};
use crate::intern::{InternPool, StringId};

pub type NodeId = u32;

/// Identifies the program's implicit top-level function, which owns hoisted
/// `var`/`function` declarations the way any other function does.
pub const PROGRAM_FUNCTION_ID: NodeId = u32::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageClass {
    Unallocated,
    Local,
    LocalExtra,
    Context,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingKind {
    Parameter,
    Variable,
    FunctionDeclaration,
    /// A named function expression's own name, visible only inside its own
    /// body for self-recursive reference.
    CalleeName,
}

#[derive(Debug, Clone)]
pub struct AnalyzedVariable {
    pub kind: BindingKind,
    pub parameter_index: Option<usize>,
    pub storage: StorageClass,
}

#[derive(Debug)]
pub struct AnalyzedFunction {
    pub parent: Option<NodeId>,
    pub eval_tainted: bool,
    pub needs_arguments_object: bool,
    /// Hop distances (1 = immediate parent) to outer functions this function
    /// reaches through a `local-extra` binding.
    pub referenced_scopes: AHashSet<u32>,
    pub variables: AHashMap<StringId, AnalyzedVariable>,
    pub param_order: Vec<StringId>,
    /// Hoisted declarations in registration order: all `var`s, then all
    /// nested `function`s, matching the order the IR builder emits
    /// `decl_var`/`decl_fun`.
    pub declaration_order: Vec<StringId>,
}

impl AnalyzedFunction {
    fn new(parent: Option<NodeId>, needs_arguments_object: bool) -> Self {
        Self {
            parent,
            eval_tainted: false,
            needs_arguments_object,
            referenced_scopes: AHashSet::new(),
            variables: AHashMap::new(),
            param_order: Vec::new(),
            declaration_order: Vec::new(),
        }
    }
}

pub struct AnalysisResult {
    pub pool: InternPool,
    pub functions: AHashMap<NodeId, AnalyzedFunction>,
}

enum ScopeFrame {
    Function(NodeId),
    With,
}

pub struct Analyzer {
    pool: InternPool,
    functions: AHashMap<NodeId, AnalyzedFunction>,
    scopes: Vec<ScopeFrame>,
    function_chain: Vec<NodeId>,
}

impl Analyzer {
    #[must_use]
    pub fn new() -> Self {
        Self {
            pool: InternPool::new(),
            functions: AHashMap::new(),
            scopes: Vec::new(),
            function_chain: Vec::new(),
        }
    }

    pub fn analyze(mut self, program: &Program) -> AnalysisResult {
        self.enter_function(PROGRAM_FUNCTION_ID, None, false, &[], &program.declarations);
        for stmt in &program.body {
            self.walk_statement(stmt);
        }
        self.leave_function();
        self.promote_eval_tainted_scopes();
        AnalysisResult { pool: self.pool, functions: self.functions }
    }

    fn current_function(&self) -> NodeId {
        *self.function_chain.last().expect("analyzer always has an active function")
    }

    fn enter_function(
        &mut self,
        id: NodeId,
        parent: Option<NodeId>,
        needs_arguments_object: bool,
        params: &[String],
        declarations: &[Declaration],
    ) {
        self.enter_function_named(id, parent, needs_arguments_object, params, declarations, None);
    }

    fn enter_function_named(
        &mut self,
        id: NodeId,
        parent: Option<NodeId>,
        needs_arguments_object: bool,
        params: &[String],
        declarations: &[Declaration],
        callee_name: Option<&str>,
    ) {
        let mut function = AnalyzedFunction::new(parent, needs_arguments_object);
        let param_storage = if needs_arguments_object { StorageClass::LocalExtra } else { StorageClass::Unallocated };
        for (index, name) in params.iter().enumerate() {
            let sid = self.pool.intern(name);
            function.param_order.push(sid);
            function.variables.insert(
                sid,
                AnalyzedVariable { kind: BindingKind::Parameter, parameter_index: Some(index), storage: param_storage },
            );
        }
        // Hoist `var`s first, then nested `function`s, mirroring the
        // declaration order the IR builder relies on for `decl_var`/`decl_fun`.
        for decl in declarations.iter().filter(|d| d.kind == DeclarationKind::Variable) {
            let sid = self.pool.intern(&decl.name.name);
            function.declaration_order.push(sid);
            function.variables.entry(sid).or_insert(AnalyzedVariable {
                kind: BindingKind::Variable,
                parameter_index: None,
                storage: StorageClass::Unallocated,
            });
        }
        for decl in declarations.iter().filter(|d| d.kind == DeclarationKind::Function) {
            let sid = self.pool.intern(&decl.name.name);
            function.declaration_order.push(sid);
            function.variables.insert(
                sid,
                AnalyzedVariable { kind: BindingKind::FunctionDeclaration, parameter_index: None, storage: StorageClass::Unallocated },
            );
        }
        if let Some(name) = callee_name {
            let sid = self.pool.intern(name);
            function.variables.entry(sid).or_insert(AnalyzedVariable {
                kind: BindingKind::CalleeName,
                parameter_index: None,
                storage: StorageClass::Unallocated,
            });
        }
        self.functions.insert(id, function);
        self.scopes.push(ScopeFrame::Function(id));
        self.function_chain.push(id);
    }

    fn leave_function(&mut self) {
        self.scopes.pop();
        self.function_chain.pop();
    }

    fn walk_function_literal(&mut self, literal: &FunctionLiteral, parent: NodeId) {
        use crate::ast::FunctionKind;
        let callee_name = match literal.kind {
            FunctionKind::Expression => literal.name.as_deref(),
            FunctionKind::Declaration => None,
        };
        self.enter_function_named(
            literal.id,
            Some(parent),
            literal.needs_arguments_object,
            &literal.params,
            &literal.declarations,
            callee_name,
        );
        for stmt in &literal.body {
            self.walk_statement(stmt);
        }
        self.leave_function();
    }

    fn walk_statement(&mut self, stmt: &Statement) {
        match stmt {
            Statement::Expression { expr, .. } => self.walk_expression(expr),
            Statement::Block { body, .. } => {
                for s in body {
                    self.walk_statement(s);
                }
            }
            Statement::VariableDeclaration { decls, .. } => {
                for (name, init) in decls {
                    self.resolve(&name.name);
                    if let Some(init) = init {
                        self.walk_expression(init);
                    }
                }
            }
            Statement::FunctionDeclaration { function } => {
                let parent = self.current_function();
                self.walk_function_literal(function, parent);
            }
            Statement::If { test, consequent, alternate, .. } => {
                self.walk_expression(test);
                self.walk_statement(consequent);
                if let Some(alt) = alternate {
                    self.walk_statement(alt);
                }
            }
            Statement::DoWhile { body, test, .. } => {
                self.walk_statement(body);
                self.walk_expression(test);
            }
            Statement::While { test, body, .. } => {
                self.walk_expression(test);
                self.walk_statement(body);
            }
            Statement::For { init, test, update, body, .. } => {
                match init {
                    ForInit::Expression(e) => self.walk_expression(e),
                    ForInit::VarDeclarations(decls) => {
                        for (name, init) in decls {
                            self.resolve(&name.name);
                            if let Some(init) = init {
                                self.walk_expression(init);
                            }
                        }
                    }
                    ForInit::None => {}
                }
                if let Some(test) = test {
                    self.walk_expression(test);
                }
                if let Some(update) = update {
                    self.walk_expression(update);
                }
                self.walk_statement(body);
            }
            Statement::ForIn { target, object, body, .. } => {
                match target {
                    ForInTarget::Expression(e) => self.walk_expression(e),
                    ForInTarget::VarDeclaration(name) => self.resolve(&name.name),
                }
                self.walk_expression(object);
                self.walk_statement(body);
            }
            Statement::Continue { .. } | Statement::Break { .. } | Statement::Empty { .. } | Statement::Debugger { .. } => {}
            Statement::Return { argument, .. } => {
                if let Some(argument) = argument {
                    self.walk_expression(argument);
                }
            }
            Statement::With { object, body, .. } => {
                self.walk_expression(object);
                self.scopes.push(ScopeFrame::With);
                self.walk_statement(body);
                self.scopes.pop();
            }
            Statement::Switch { discriminant, cases, .. } => {
                self.walk_expression(discriminant);
                for case in cases {
                    if let Some(test) = &case.test {
                        self.walk_expression(test);
                    }
                    for s in &case.consequent {
                        self.walk_statement(s);
                    }
                }
            }
            Statement::Throw { argument, .. } => self.walk_expression(argument),
            Statement::Try { block, handler, finalizer, .. } => {
                for s in block {
                    self.walk_statement(s);
                }
                if let Some(handler) = handler {
                    // The catch parameter is itself an object-environment
                    // binding (ctx_enter_catch installs it); there is no
                    // `var`-style declaration to register for it.
                    for s in &handler.body {
                        self.walk_statement(s);
                    }
                }
                if let Some(finalizer) = finalizer {
                    for s in finalizer {
                        self.walk_statement(s);
                    }
                }
            }
            Statement::Labeled { body, .. } => self.walk_statement(body),
        }
    }

    fn walk_expression(&mut self, expr: &Expression) {
        match expr {
            Expression::Identifier { name, .. } => self.resolve(name),
            Expression::This { .. } | Expression::Null { .. } | Expression::Boolean { .. } | Expression::Number { .. } => {}
            Expression::String { .. } | Expression::Regex { .. } | Expression::Nothing => {}
            Expression::Array { elements, .. } => {
                for element in elements.iter().flatten() {
                    self.walk_expression(element);
                }
            }
            Expression::Object { properties, .. } => {
                for property in properties {
                    match property {
                        ObjectProperty::Data { value, .. } => self.walk_expression(value),
                        ObjectProperty::Accessor { function, .. } => {
                            let parent = self.current_function();
                            self.walk_function_literal(function, parent);
                        }
                    }
                }
            }
            Expression::FunctionExpression { function } => {
                let parent = self.current_function();
                self.walk_function_literal(function, parent);
            }
            Expression::Binary { left, right, .. } => {
                self.walk_expression(left);
                self.walk_expression(right);
            }
            Expression::Unary { argument, .. } | Expression::Update { argument, .. } => self.walk_expression(argument),
            Expression::Assignment { target, value, .. } => {
                self.walk_expression(target);
                self.walk_expression(value);
            }
            Expression::Conditional { test, consequent, alternate, .. } => {
                self.walk_expression(test);
                self.walk_expression(consequent);
                self.walk_expression(alternate);
            }
            Expression::Property { object, key, .. } => {
                self.walk_expression(object);
                if let PropertyAccessKey::Computed(index) = key {
                    self.walk_expression(index);
                }
            }
            Expression::Call { callee, arguments, .. } | Expression::CallNew { callee, arguments, .. } => {
                self.walk_expression(callee);
                for arg in arguments {
                    self.walk_expression(arg);
                }
            }
        }
    }

    /// Resolves a single identifier use against the active scope stack,
    /// updating eval taint, storage class, and escape bookkeeping.
    fn resolve(&mut self, name: &str) {
        let sid = self.pool.intern(name);
        let using_function = self.current_function();

        if name == "eval" {
            for &fid in &self.function_chain {
                if let Some(f) = self.functions.get_mut(&fid) {
                    f.eval_tainted = true;
                }
            }
        }

        let mut passed_object_env = false;
        let mut hops = 0u32;
        let mut declaring: Option<NodeId> = None;
        for frame in self.scopes.iter().rev() {
            match frame {
                ScopeFrame::With => passed_object_env = true,
                ScopeFrame::Function(fid) => {
                    let has_binding = self.functions.get(fid).is_some_and(|f| f.variables.contains_key(&sid));
                    if has_binding {
                        declaring = Some(*fid);
                        break;
                    }
                    hops += 1;
                }
            }
        }

        let Some(declaring_fid) = declaring else {
            // Unbound identifier: an implicit global-object property
            // reference with no declared binding to classify.
            return;
        };

        if passed_object_env {
            self.set_storage(declaring_fid, sid, StorageClass::Context);
            return;
        }

        if declaring_fid == using_function {
            self.promote_unallocated(declaring_fid, sid, StorageClass::Local);
        } else {
            self.promote_unallocated(declaring_fid, sid, StorageClass::LocalExtra);
            if let Some(f) = self.functions.get_mut(&using_function) {
                f.referenced_scopes.insert(hops.max(1));
            }
        }
    }

    /// Sets storage unconditionally, used when an object environment forces
    /// `context` regardless of the binding's current classification.
    fn set_storage(&mut self, fid: NodeId, sid: StringId, storage: StorageClass) {
        if let Some(f) = self.functions.get_mut(&fid) {
            if let Some(var) = f.variables.get_mut(&sid) {
                var.storage = storage;
            }
        }
    }

    /// Assigns `storage` only if the binding hasn't already been promoted to
    /// something stronger than `Unallocated` (a binding already `context`
    /// stays `context`; escaping through one call site doesn't downgrade a
    /// binding another call site already forced to `local-extra`).
    fn promote_unallocated(&mut self, fid: NodeId, sid: StringId, storage: StorageClass) {
        if let Some(f) = self.functions.get_mut(&fid) {
            if let Some(var) = f.variables.get_mut(&sid) {
                if var.storage == StorageClass::Unallocated {
                    var.storage = storage;
                } else if var.storage == StorageClass::Local && storage == StorageClass::LocalExtra {
                    var.storage = StorageClass::LocalExtra;
                }
            }
        }
    }

    /// Eval-tainted functions (and the program scope) reify every binding,
    /// since `eval` may introspect or rebind them dynamically.
    fn promote_eval_tainted_scopes(&mut self) {
        for (&fid, function) in &mut self.functions {
            if function.eval_tainted || fid == PROGRAM_FUNCTION_ID {
                for var in function.variables.values_mut() {
                    var.storage = StorageClass::Context;
                }
            }
        }
    }
}

impl Default for Analyzer {
    fn default() -> Self {
        Self::new()
    }
}

#[must_use]
pub fn analyze(program: &Program) -> AnalysisResult {
    Analyzer::new().analyze(program)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;

    fn analyze_source(src: &str) -> AnalysisResult {
        let program = Parser::parse_program(src).expect("parse should succeed");
        analyze(&program)
    }

    #[test]
    fn unused_local_is_unallocated() {
        let result = analyze_source("var x;");
        let program = &result.functions[&PROGRAM_FUNCTION_ID];
        let sid = result.pool.lookup(program.declaration_order[0]).unwrap();
        assert_eq!(sid.to_utf8(), "x");
    }

    #[test]
    fn var_used_only_locally_is_local() {
        let result = analyze_source("function f() { var x = 1; return x; }");
        let inner = result.functions.values().find(|f| f.parent == Some(PROGRAM_FUNCTION_ID)).unwrap();
        let sid = inner.declaration_order[0];
        assert_eq!(inner.variables[&sid].storage, StorageClass::Local);
    }

    #[test]
    fn var_captured_by_nested_function_is_local_extra() {
        let result = analyze_source("function f() { var x = 1; function g() { return x; } return g; }");
        let outer = result.functions.values().find(|f| f.parent == Some(PROGRAM_FUNCTION_ID)).unwrap();
        let sid = outer.declaration_order[0];
        assert_eq!(outer.variables[&sid].storage, StorageClass::LocalExtra);
        let inner = result.functions.values().find(|f| f.parent.is_some() && f.parent != Some(PROGRAM_FUNCTION_ID)).unwrap();
        assert!(!inner.referenced_scopes.is_empty());
    }

    #[test]
    fn binding_under_with_is_context() {
        let result = analyze_source("function f(o) { with (o) { x = 1; } var x; }");
        let f = result.functions.values().find(|fun| fun.parent == Some(PROGRAM_FUNCTION_ID)).unwrap();
        let sid = f.declaration_order[0];
        assert_eq!(f.variables[&sid].storage, StorageClass::Context);
    }

    #[test]
    fn eval_taint_promotes_every_binding_to_context() {
        let result = analyze_source("function f() { var x = 1; eval('x'); return x; }");
        let f = result.functions.values().find(|fun| fun.parent == Some(PROGRAM_FUNCTION_ID)).unwrap();
        assert!(f.eval_tainted);
        for var in f.variables.values() {
            assert_eq!(var.storage, StorageClass::Context);
        }
    }

    #[test]
    fn program_scope_bindings_are_always_context() {
        let result = analyze_source("var x = 1;");
        let program = &result.functions[&PROGRAM_FUNCTION_ID];
        for var in program.variables.values() {
            assert_eq!(var.storage, StorageClass::Context);
        }
    }

    #[test]
    fn arguments_object_forces_parameters_local_extra_upfront() {
        let result = analyze_source("function f(a) { return arguments.length + a; }");
        let f = result.functions.values().find(|fun| fun.parent == Some(PROGRAM_FUNCTION_ID)).unwrap();
        let sid = f.param_order[0];
        assert_eq!(f.variables[&sid].storage, StorageClass::LocalExtra);
    }
}
