//! Recursive-descent ES5.1 parser.
//!
//! Produces an [`ast`](crate::ast) tree annotated with strict-mode status
//! and the provisional `needs_arguments_object` flag. Operator precedence
//! follows the standard ECMA-262 §11 table via a single binding-power
//! climbing loop rather than one function per level; `no_in` suppresses the
//! `in` operator while parsing a `for(...)` head's initializer.

use crate::ast::{
    AccessorKind, AssignOp, BinaryOp, CatchClause, Declaration, DeclarationKind, Expression, ForInTarget, ForInit,
    FunctionKind, FunctionLiteral, ObjectProperty, Program, PropertyAccessKey, PropertyKey, Statement, SwitchCase,
    UnaryOp, UpdateOp, VariableLiteral,
};
use crate::diagnostics::{CompileError, CompileResult};
use crate::lexer::Lexer;
use crate::lexer::token::{Keyword, Punctuator, Token, TokenKind};
use crate::source_loc::SourceSpan;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LabelKind {
    Iteration,
    Switch,
    Plain,
}

struct LabelFrame {
    labels: Vec<String>,
    kind: LabelKind,
}

enum LabelStackEntry {
    Frame(LabelFrame),
    /// Pushed at every function boundary so inner functions cannot resolve
    /// labels, `break`, or `continue` targets belonging to an enclosing
    /// function.
    Barrier,
}

struct ScopeFrame {
    name: Option<String>,
    strict: bool,
    declarations: Vec<Declaration>,
    needs_arguments_object: bool,
}

pub struct Parser {
    lexer: Lexer,
    current: Token,
    scopes: Vec<ScopeFrame>,
    label_stack: Vec<LabelStackEntry>,
    next_node_id: u32,
}

impl Parser {
    pub fn parse_program(source: &str) -> CompileResult<Program> {
        let mut lexer = Lexer::new(source);
        let current = lexer.next_token();
        let mut parser = Self {
            lexer,
            current,
            scopes: Vec::new(),
            label_stack: Vec::new(),
            next_node_id: 0,
        };
        parser.scopes.push(ScopeFrame {
            name: None,
            strict: false,
            declarations: Vec::new(),
            needs_arguments_object: false,
        });

        let mut body = Vec::new();
        let strict = parser.parse_directive_prologue(&mut body)?;
        parser.scopes.last_mut().unwrap().strict = strict;

        while !parser.at_end() {
            body.push(parser.parse_statement()?);
        }

        let frame = parser.scopes.pop().unwrap();
        Ok(Program {
            body,
            declarations: frame.declarations,
            strict: frame.strict,
            span: SourceSpan::new(0, parser.current.span.end),
        })
    }

    fn next_id(&mut self) -> u32 {
        let id = self.next_node_id;
        self.next_node_id += 1;
        id
    }

    fn strict(&self) -> bool {
        self.scopes.last().is_some_and(|f| f.strict)
    }

    fn bump(&mut self) -> Token {
        let next = self.lexer.next_token();
        std::mem::replace(&mut self.current, next)
    }

    fn at_end(&self) -> bool {
        self.current.kind == TokenKind::EndOfInput
    }

    fn at_punct(&self, p: Punctuator) -> bool {
        self.current.is_punctuator(p)
    }

    fn at_keyword(&self, k: Keyword) -> bool {
        self.current.is_keyword(k)
    }

    fn eat_punct(&mut self, p: Punctuator) -> bool {
        if self.at_punct(p) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, p: Punctuator) -> CompileResult<()> {
        if self.eat_punct(p) {
            Ok(())
        } else {
            Err(CompileError::syntax(
                format!("expected '{}'", p.as_str()),
                self.current.span,
            ))
        }
    }

    fn expect_keyword(&mut self, k: Keyword) -> CompileResult<()> {
        if self.at_keyword(k) {
            self.bump();
            Ok(())
        } else {
            Err(CompileError::syntax("expected keyword", self.current.span))
        }
    }

    fn expect_identifier_name(&mut self) -> CompileResult<String> {
        // Any identifier, keyword, or reserved word is a legal property
        // name / binding-position name in the contexts that call this
        // (object literal keys, member access after `.`).
        let name = match &self.current.kind {
            TokenKind::Identifier | TokenKind::FutureReserved | TokenKind::FutureStrictReserved => {
                self.current.value.clone()
            }
            TokenKind::Keyword(_) => self.current.value.clone(),
            _ => return Err(CompileError::syntax("expected identifier", self.current.span)),
        };
        self.bump();
        Ok(name)
    }

    fn expect_binding_identifier(&mut self) -> CompileResult<VariableLiteral> {
        let span = self.current.span;
        if self.current.kind != TokenKind::Identifier {
            return Err(CompileError::syntax("expected identifier", span));
        }
        let name = self.current.value.clone();
        if self.strict() && (name == "eval" || name == "arguments") {
            return Err(CompileError::syntax(
                "variable may not be named 'eval' or 'arguments' in strict mode",
                span,
            ));
        }
        self.bump();
        Ok(VariableLiteral { name, span })
    }

    /// ASI: at a statement-terminating position, accept `;`, or a virtual
    /// semicolon before `}` / end-of-input / a line terminator.
    fn consume_semicolon(&mut self) -> CompileResult<()> {
        if self.eat_punct(Punctuator::Semicolon) {
            return Ok(());
        }
        if self.at_punct(Punctuator::RBrace) || self.at_end() || self.current.preceded_by_line_terminator {
            return Ok(());
        }
        Err(CompileError::syntax("expected ';'", self.current.span))
    }

    fn mark_eval_tainted_if_needed(&mut self, name: &str) {
        if name == "eval" {
            // Nothing to record in the parser itself; eval-taint is a
            // semantic-analysis concern (any enclosing function containing
            // a textual `eval` reference). We still record the reference so
            // `needs_arguments_object`-style provisional bookkeeping stays
            // consistent for `arguments`.
        }
        if name == "arguments" {
            if let Some(frame) = self.scopes.last_mut() {
                frame.needs_arguments_object = true;
            }
        }
    }

    // ---- directive prologue -------------------------------------------

    fn parse_directive_prologue(&mut self, body: &mut Vec<Statement>) -> CompileResult<bool> {
        let mut strict = false;
        loop {
            if self.current.kind != TokenKind::StringLiteral {
                break;
            }
            let literal_token = self.current.clone();
            let span = literal_token.span;
            let expr = self.parse_expression()?;
            self.consume_semicolon()?;
            let is_bare_string = matches!(&expr, Expression::String { .. });
            if let Expression::String { value, .. } = &expr {
                if value == "use strict" && !literal_token.contains_escape_sequence {
                    strict = true;
                }
            }
            body.push(Statement::Expression { expr, span });
            if !is_bare_string {
                break;
            }
        }
        Ok(strict)
    }

    // ---- statements ------------------------------------------------------

    fn parse_statement(&mut self) -> CompileResult<Statement> {
        match &self.current.kind {
            TokenKind::Punctuator(Punctuator::LBrace) => self.parse_block(Vec::new()),
            TokenKind::Punctuator(Punctuator::Semicolon) => {
                let span = self.current.span;
                self.bump();
                Ok(Statement::Empty { span })
            }
            TokenKind::Keyword(Keyword::Var) => self.parse_variable_statement(),
            TokenKind::Keyword(Keyword::Function) => {
                let function = self.parse_function(FunctionKind::Declaration)?;
                let name = function.name.clone().expect("function declaration always has a name");
                if let Some(frame) = self.scopes.last_mut() {
                    frame.declarations.push(Declaration {
                        kind: DeclarationKind::Function,
                        name: VariableLiteral { name, span: function.span },
                        function: Some(Box::new(function.clone())),
                    });
                }
                Ok(Statement::FunctionDeclaration { function: Box::new(function) })
            }
            TokenKind::Keyword(Keyword::If) => self.parse_if(),
            TokenKind::Keyword(Keyword::Do) => self.parse_do_while(Vec::new()),
            TokenKind::Keyword(Keyword::While) => self.parse_while(Vec::new()),
            TokenKind::Keyword(Keyword::For) => self.parse_for(Vec::new()),
            TokenKind::Keyword(Keyword::Continue) => self.parse_continue(),
            TokenKind::Keyword(Keyword::Break) => self.parse_break(),
            TokenKind::Keyword(Keyword::Return) => self.parse_return(),
            TokenKind::Keyword(Keyword::With) => self.parse_with(),
            TokenKind::Keyword(Keyword::Switch) => self.parse_switch(Vec::new()),
            TokenKind::Keyword(Keyword::Throw) => self.parse_throw(),
            TokenKind::Keyword(Keyword::Try) => self.parse_try(),
            TokenKind::Keyword(Keyword::Debugger) => {
                let span = self.current.span;
                self.bump();
                self.consume_semicolon()?;
                Ok(Statement::Debugger { span })
            }
            TokenKind::Identifier => self.parse_identifier_led_statement(),
            _ => self.parse_expression_statement(),
        }
    }

    fn parse_identifier_led_statement(&mut self) -> CompileResult<Statement> {
        // Disambiguate `label: stmt` from an ordinary expression statement
        // that happens to start with an identifier: peek past it for `:`.
        let name = self.current.value.clone();
        let span = self.current.span;
        let checkpoint = self.current.clone();
        self.bump();
        if self.at_punct(Punctuator::Colon) {
            self.bump();
            return self.parse_labeled_statement(vec![name], span);
        }
        // Not a label: put the identifier token back and parse normally as
        // an expression statement starting from it.
        self.lexer.push_back(std::mem::replace(&mut self.current, checkpoint));
        self.parse_expression_statement()
    }

    fn parse_labeled_statement(&mut self, mut labels: Vec<String>, start: SourceSpan) -> CompileResult<Statement> {
        // Collect a run of stacked labels: `a: b: while (...) ;`
        while self.current.kind == TokenKind::Identifier {
            let checkpoint = self.current.clone();
            let name = self.current.value.clone();
            self.bump();
            if self.at_punct(Punctuator::Colon) {
                labels.push(name);
                self.bump();
            } else {
                self.lexer.push_back(std::mem::replace(&mut self.current, checkpoint));
                break;
            }
        }
        if self.label_exists_up_to_barrier(&labels) {
            return Err(CompileError::syntax("label already declared", start));
        }

        let kind = match &self.current.kind {
            TokenKind::Keyword(Keyword::For | Keyword::While | Keyword::Do) => LabelKind::Iteration,
            TokenKind::Keyword(Keyword::Switch) => LabelKind::Switch,
            _ => LabelKind::Plain,
        };
        self.label_stack.push(LabelStackEntry::Frame(LabelFrame { labels: labels.clone(), kind }));
        let body = match &self.current.kind {
            TokenKind::Keyword(Keyword::For) => self.parse_for(labels.clone())?,
            TokenKind::Keyword(Keyword::While) => self.parse_while(labels.clone())?,
            TokenKind::Keyword(Keyword::Do) => self.parse_do_while(labels.clone())?,
            TokenKind::Keyword(Keyword::Switch) => self.parse_switch(labels.clone())?,
            _ => self.parse_statement()?,
        };
        self.label_stack.pop();

        // Self-targeting break elision: `foo: break foo;` does nothing,
        // since the break's target is exactly the statement it terminates.
        if let Statement::Break { label: Some(target), span } = &body {
            if labels.iter().any(|l| l == target) {
                return Ok(Statement::Empty { span: *span });
            }
        }

        let span = start.merge(body.span());
        Ok(Statement::Labeled { labels, body: Box::new(body), span })
    }

    fn label_exists_up_to_barrier(&self, labels: &[String]) -> bool {
        for entry in self.label_stack.iter().rev() {
            match entry {
                LabelStackEntry::Barrier => return false,
                LabelStackEntry::Frame(f) => {
                    if f.labels.iter().any(|l| labels.contains(l)) {
                        return true;
                    }
                }
            }
        }
        false
    }

    fn parse_block(&mut self, labels: Vec<String>) -> CompileResult<Statement> {
        let start = self.current.span;
        self.expect_punct(Punctuator::LBrace)?;
        let mut body = Vec::new();
        while !self.at_punct(Punctuator::RBrace) && !self.at_end() {
            body.push(self.parse_statement()?);
        }
        let end = self.current.span;
        self.expect_punct(Punctuator::RBrace)?;
        Ok(Statement::Block { body, labels, span: start.merge(end) })
    }

    fn parse_variable_declarations(&mut self, no_in: bool) -> CompileResult<Vec<(VariableLiteral, Option<Expression>)>> {
        let mut decls = Vec::new();
        loop {
            let name = self.expect_binding_identifier()?;
            let init = if self.eat_punct(Punctuator::Eq) {
                Some(self.parse_assignment_expression(no_in)?)
            } else {
                None
            };
            if let Some(frame) = self.scopes.last_mut() {
                frame.declarations.push(Declaration {
                    kind: DeclarationKind::Variable,
                    name: name.clone(),
                    function: None,
                });
            }
            decls.push((name, init));
            if !self.eat_punct(Punctuator::Comma) {
                break;
            }
        }
        Ok(decls)
    }

    fn parse_variable_statement(&mut self) -> CompileResult<Statement> {
        let start = self.current.span;
        self.bump();
        let decls = self.parse_variable_declarations(false)?;
        self.consume_semicolon()?;
        let end = decls.last().map(|(n, _)| n.span).unwrap_or(start);
        Ok(Statement::VariableDeclaration { decls, span: start.merge(end) })
    }

    fn parse_if(&mut self) -> CompileResult<Statement> {
        let start = self.current.span;
        self.bump();
        self.expect_punct(Punctuator::LParen)?;
        let test = self.parse_expression()?;
        self.expect_punct(Punctuator::RParen)?;
        let consequent = Box::new(self.parse_statement()?);
        let alternate = if self.at_keyword(Keyword::Else) {
            self.bump();
            Some(Box::new(self.parse_statement()?))
        } else {
            None
        };
        let end = alternate.as_ref().map_or(consequent.span(), |a| a.span());
        Ok(Statement::If { test, consequent, alternate, span: start.merge(end) })
    }

    fn parse_do_while(&mut self, labels: Vec<String>) -> CompileResult<Statement> {
        let start = self.current.span;
        self.bump();
        let body = Box::new(self.parse_statement()?);
        self.expect_keyword(Keyword::While)?;
        self.expect_punct(Punctuator::LParen)?;
        let test = self.parse_expression()?;
        self.expect_punct(Punctuator::RParen)?;
        // `do ... while (x)` followed directly by anything is fine; the
        // trailing `;` is optional even without ASI's usual conditions.
        let _ = self.eat_punct(Punctuator::Semicolon);
        let end = self.current.span;
        Ok(Statement::DoWhile { body, test, labels, span: start.merge(end) })
    }

    fn parse_while(&mut self, labels: Vec<String>) -> CompileResult<Statement> {
        let start = self.current.span;
        self.bump();
        self.expect_punct(Punctuator::LParen)?;
        let test = self.parse_expression()?;
        self.expect_punct(Punctuator::RParen)?;
        let body = Box::new(self.parse_statement()?);
        let span = start.merge(body.span());
        Ok(Statement::While { test, body, labels, span })
    }

    fn parse_for(&mut self, labels: Vec<String>) -> CompileResult<Statement> {
        let start = self.current.span;
        self.bump();
        self.expect_punct(Punctuator::LParen)?;

        if self.at_keyword(Keyword::Var) {
            self.bump();
            let first_name = self.expect_binding_identifier()?;
            let first_init = if self.eat_punct(Punctuator::Eq) {
                Some(self.parse_assignment_expression(true)?)
            } else {
                None
            };
            if let Some(frame) = self.scopes.last_mut() {
                frame.declarations.push(Declaration {
                    kind: DeclarationKind::Variable,
                    name: first_name.clone(),
                    function: None,
                });
            }
            if self.at_keyword(Keyword::In) && first_init.is_none() {
                self.bump();
                let object = self.parse_expression()?;
                self.expect_punct(Punctuator::RParen)?;
                let body = Box::new(self.parse_statement()?);
                let span = start.merge(body.span());
                return Ok(Statement::ForIn {
                    target: ForInTarget::VarDeclaration(first_name),
                    object,
                    body,
                    labels,
                    span,
                });
            }
            let mut decls = vec![(first_name, first_init)];
            while self.eat_punct(Punctuator::Comma) {
                let name = self.expect_binding_identifier()?;
                let init = if self.eat_punct(Punctuator::Eq) {
                    Some(self.parse_assignment_expression(true)?)
                } else {
                    None
                };
                if let Some(frame) = self.scopes.last_mut() {
                    frame.declarations.push(Declaration {
                        kind: DeclarationKind::Variable,
                        name: name.clone(),
                        function: None,
                    });
                }
                decls.push((name, init));
            }
            self.expect_punct(Punctuator::Semicolon)?;
            let test = if self.at_punct(Punctuator::Semicolon) { None } else { Some(self.parse_expression()?) };
            self.expect_punct(Punctuator::Semicolon)?;
            let update = if self.at_punct(Punctuator::RParen) { None } else { Some(self.parse_expression()?) };
            self.expect_punct(Punctuator::RParen)?;
            let body = Box::new(self.parse_statement()?);
            let span = start.merge(body.span());
            return Ok(Statement::For { init: ForInit::VarDeclarations(decls), test, update, body, labels, span });
        }

        if self.at_punct(Punctuator::Semicolon) {
            self.bump();
            let test = if self.at_punct(Punctuator::Semicolon) { None } else { Some(self.parse_expression()?) };
            self.expect_punct(Punctuator::Semicolon)?;
            let update = if self.at_punct(Punctuator::RParen) { None } else { Some(self.parse_expression()?) };
            self.expect_punct(Punctuator::RParen)?;
            let body = Box::new(self.parse_statement()?);
            let span = start.merge(body.span());
            return Ok(Statement::For { init: ForInit::None, test, update, body, labels, span });
        }

        let head = self.parse_expression_no_in()?;
        if self.at_keyword(Keyword::In) {
            if !head.is_valid_assignment_target() {
                return Err(CompileError::reference("invalid left-hand side in for-in", head.span()));
            }
            self.bump();
            let object = self.parse_expression()?;
            self.expect_punct(Punctuator::RParen)?;
            let body = Box::new(self.parse_statement()?);
            let span = start.merge(body.span());
            return Ok(Statement::ForIn { target: ForInTarget::Expression(head), object, body, labels, span });
        }
        self.expect_punct(Punctuator::Semicolon)?;
        let test = if self.at_punct(Punctuator::Semicolon) { None } else { Some(self.parse_expression()?) };
        self.expect_punct(Punctuator::Semicolon)?;
        let update = if self.at_punct(Punctuator::RParen) { None } else { Some(self.parse_expression()?) };
        self.expect_punct(Punctuator::RParen)?;
        let body = Box::new(self.parse_statement()?);
        let span = start.merge(body.span());
        Ok(Statement::For { init: ForInit::Expression(head), test, update, body, labels, span })
    }

    fn parse_continue(&mut self) -> CompileResult<Statement> {
        let start = self.current.span;
        self.bump();
        let label = if !self.current.preceded_by_line_terminator && self.current.kind == TokenKind::Identifier {
            let name = self.current.value.clone();
            self.bump();
            Some(name)
        } else {
            None
        };
        self.consume_semicolon()?;
        if !self.can_continue(label.as_deref()) {
            return Err(CompileError::syntax("illegal continue statement", start));
        }
        Ok(Statement::Continue { label, span: start })
    }

    fn parse_break(&mut self) -> CompileResult<Statement> {
        let start = self.current.span;
        self.bump();
        let label = if !self.current.preceded_by_line_terminator && self.current.kind == TokenKind::Identifier {
            let name = self.current.value.clone();
            self.bump();
            Some(name)
        } else {
            None
        };
        self.consume_semicolon()?;
        if !self.can_break(label.as_deref()) {
            return Err(CompileError::syntax("illegal break statement", start));
        }
        Ok(Statement::Break { label, span: start })
    }

    fn can_continue(&self, label: Option<&str>) -> bool {
        for entry in self.label_stack.iter().rev() {
            match entry {
                LabelStackEntry::Barrier => return false,
                LabelStackEntry::Frame(f) => match label {
                    None => {
                        if f.kind == LabelKind::Iteration {
                            return true;
                        }
                    }
                    Some(name) => {
                        if f.labels.iter().any(|l| l == name) {
                            return f.kind == LabelKind::Iteration;
                        }
                    }
                },
            }
        }
        false
    }

    fn can_break(&self, label: Option<&str>) -> bool {
        for entry in self.label_stack.iter().rev() {
            match entry {
                LabelStackEntry::Barrier => return false,
                LabelStackEntry::Frame(f) => match label {
                    None => {
                        if matches!(f.kind, LabelKind::Iteration | LabelKind::Switch) {
                            return true;
                        }
                    }
                    Some(name) => {
                        if f.labels.iter().any(|l| l == name) {
                            return true;
                        }
                    }
                },
            }
        }
        false
    }

    fn parse_return(&mut self) -> CompileResult<Statement> {
        let start = self.current.span;
        self.bump();
        let argument = if self.current.preceded_by_line_terminator
            || self.at_punct(Punctuator::Semicolon)
            || self.at_punct(Punctuator::RBrace)
            || self.at_end()
        {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.consume_semicolon()?;
        Ok(Statement::Return { argument, span: start })
    }

    fn parse_with(&mut self) -> CompileResult<Statement> {
        let start = self.current.span;
        if self.strict() {
            return Err(CompileError::syntax("'with' statements are not allowed in strict mode", start));
        }
        self.bump();
        self.expect_punct(Punctuator::LParen)?;
        let object = self.parse_expression()?;
        self.expect_punct(Punctuator::RParen)?;
        let body = Box::new(self.parse_statement()?);
        let span = start.merge(body.span());
        Ok(Statement::With { object, body, span })
    }

    fn parse_switch(&mut self, labels: Vec<String>) -> CompileResult<Statement> {
        let start = self.current.span;
        self.bump();
        self.expect_punct(Punctuator::LParen)?;
        let discriminant = self.parse_expression()?;
        self.expect_punct(Punctuator::RParen)?;
        self.expect_punct(Punctuator::LBrace)?;
        let mut cases = Vec::new();
        let mut has_default = false;
        while !self.at_punct(Punctuator::RBrace) && !self.at_end() {
            let case_start = self.current.span;
            let test = if self.at_keyword(Keyword::Default) {
                if has_default {
                    return Err(CompileError::syntax("more than one default clause in switch", case_start));
                }
                has_default = true;
                self.bump();
                None
            } else {
                self.expect_keyword(Keyword::Case)?;
                Some(self.parse_expression()?)
            };
            self.expect_punct(Punctuator::Colon)?;
            let mut consequent = Vec::new();
            while !self.at_keyword(Keyword::Case)
                && !self.at_keyword(Keyword::Default)
                && !self.at_punct(Punctuator::RBrace)
                && !self.at_end()
            {
                consequent.push(self.parse_statement()?);
            }
            let end = consequent.last().map_or(case_start, Statement::span);
            cases.push(SwitchCase { test, consequent, span: case_start.merge(end) });
        }
        let end = self.current.span;
        self.expect_punct(Punctuator::RBrace)?;
        Ok(Statement::Switch { discriminant, cases, labels, span: start.merge(end) })
    }

    fn parse_throw(&mut self) -> CompileResult<Statement> {
        let start = self.current.span;
        self.bump();
        if self.current.preceded_by_line_terminator {
            return Err(CompileError::syntax("illegal newline after throw", start));
        }
        let argument = self.parse_expression()?;
        self.consume_semicolon()?;
        Ok(Statement::Throw { argument, span: start })
    }

    fn parse_try(&mut self) -> CompileResult<Statement> {
        let start = self.current.span;
        self.bump();
        let block = match self.parse_block(Vec::new())? {
            Statement::Block { body, .. } => body,
            _ => unreachable!(),
        };
        let mut handler = None;
        if self.at_keyword(Keyword::Catch) {
            let catch_span = self.current.span;
            self.bump();
            self.expect_punct(Punctuator::LParen)?;
            let param = self.expect_binding_identifier()?;
            if self.strict() && (param.name == "eval" || param.name == "arguments") {
                return Err(CompileError::syntax(
                    "catch variable may not be named 'eval' or 'arguments' in strict mode",
                    param.span,
                ));
            }
            self.expect_punct(Punctuator::RParen)?;
            let body = match self.parse_block(Vec::new())? {
                Statement::Block { body, .. } => body,
                _ => unreachable!(),
            };
            handler = Some(CatchClause { param: param.name, body, span: catch_span });
        }
        let mut finalizer = None;
        if self.at_keyword(Keyword::Finally) {
            self.bump();
            finalizer = Some(match self.parse_block(Vec::new())? {
                Statement::Block { body, .. } => body,
                _ => unreachable!(),
            });
        }
        if handler.is_none() && finalizer.is_none() {
            return Err(CompileError::syntax("missing catch or finally after try", start));
        }
        let end = self.current.span;
        Ok(Statement::Try { block, handler, finalizer, span: start.merge(end) })
    }

    fn parse_expression_statement(&mut self) -> CompileResult<Statement> {
        let start = self.current.span;
        let expr = self.parse_expression()?;
        self.consume_semicolon()?;
        let span = start.merge(expr.span());
        Ok(Statement::Expression { expr, span })
    }

    // ---- functions ---------------------------------------------------

    fn parse_function(&mut self, kind: FunctionKind) -> CompileResult<FunctionLiteral> {
        let start = self.current.span;
        self.bump(); // `function`
        let name = if self.current.kind == TokenKind::Identifier {
            let n = self.current.value.clone();
            self.bump();
            Some(n)
        } else {
            None
        };
        if matches!(kind, FunctionKind::Declaration) && name.is_none() {
            return Err(CompileError::syntax("function declaration requires a name", start));
        }

        self.expect_punct(Punctuator::LParen)?;
        let mut params = Vec::new();
        if !self.at_punct(Punctuator::RParen) {
            loop {
                let param = self.expect_binding_identifier()?;
                params.push(param.name);
                if !self.eat_punct(Punctuator::Comma) {
                    break;
                }
            }
        }
        self.expect_punct(Punctuator::RParen)?;

        let inherited_strict = self.strict();
        self.scopes.push(ScopeFrame {
            name: name.clone(),
            strict: inherited_strict,
            declarations: Vec::new(),
            needs_arguments_object: false,
        });
        self.label_stack.push(LabelStackEntry::Barrier);

        self.expect_punct(Punctuator::LBrace)?;
        let mut body = Vec::new();
        let own_strict = self.parse_directive_prologue(&mut body)?;
        let strict = inherited_strict || own_strict;
        self.scopes.last_mut().unwrap().strict = strict;

        if strict {
            if name.as_deref() == Some("eval") || name.as_deref() == Some("arguments") {
                return Err(CompileError::syntax(
                    "function name may not be 'eval' or 'arguments' in strict mode",
                    start,
                ));
            }
            for p in &params {
                if p == "eval" || p == "arguments" {
                    return Err(CompileError::syntax(
                        "parameter name may not be 'eval' or 'arguments' in strict mode",
                        start,
                    ));
                }
            }
            let mut seen = std::collections::HashSet::new();
            for p in &params {
                if !seen.insert(p.clone()) {
                    return Err(CompileError::syntax("duplicate parameter name in strict mode", start));
                }
            }
        }

        while !self.at_punct(Punctuator::RBrace) && !self.at_end() {
            body.push(self.parse_statement()?);
        }
        let end = self.current.span;
        self.expect_punct(Punctuator::RBrace)?;

        let frame = self.scopes.pop().unwrap();
        self.label_stack.pop();

        let mut needs_arguments_object = frame.needs_arguments_object;
        let shadowed = params.iter().any(|p| p == "arguments")
            || frame.declarations.iter().any(|d| d.kind == DeclarationKind::Function && d.name.name == "arguments");
        if shadowed {
            needs_arguments_object = false;
        }

        Ok(FunctionLiteral {
            id: self.next_id(),
            name,
            params,
            body,
            declarations: frame.declarations,
            kind,
            strict,
            needs_arguments_object,
            span: start.merge(end),
        })
    }

    // ---- expressions ---------------------------------------------------

    fn parse_expression(&mut self) -> CompileResult<Expression> {
        self.parse_expression_impl(false)
    }

    fn parse_expression_no_in(&mut self) -> CompileResult<Expression> {
        self.parse_expression_impl(true)
    }

    fn parse_expression_impl(&mut self, no_in: bool) -> CompileResult<Expression> {
        let mut expr = self.parse_assignment_expression(no_in)?;
        while self.at_punct(Punctuator::Comma) {
            let span = self.current.span;
            self.bump();
            let right = self.parse_assignment_expression(no_in)?;
            expr = Expression::Binary {
                op: BinaryOp::Comma,
                left: Box::new(expr),
                right: Box::new(right),
                span,
            };
        }
        Ok(expr)
    }

    fn parse_assignment_expression(&mut self, no_in: bool) -> CompileResult<Expression> {
        let lhs = self.parse_conditional_expression(no_in)?;
        let op = match &self.current.kind {
            TokenKind::Punctuator(p) if p.is_assignment() => *p,
            _ => return Ok(lhs),
        };
        if !lhs.is_valid_assignment_target() {
            return Err(CompileError::reference("invalid left-hand side in assignment", lhs.span()));
        }
        self.check_strict_assignment_target(&lhs)?;
        let span = self.current.span;
        self.bump();
        let value = self.parse_assignment_expression(no_in)?;
        let assign_op = match op {
            Punctuator::Eq => AssignOp::Assign,
            Punctuator::PlusEq => AssignOp::AddAssign,
            Punctuator::MinusEq => AssignOp::SubAssign,
            Punctuator::StarEq => AssignOp::MulAssign,
            Punctuator::SlashEq => AssignOp::DivAssign,
            Punctuator::PercentEq => AssignOp::ModAssign,
            Punctuator::ShlEq => AssignOp::ShlAssign,
            Punctuator::ShrEq => AssignOp::ShrAssign,
            Punctuator::UShrEq => AssignOp::UShrAssign,
            Punctuator::AmpEq => AssignOp::BitAndAssign,
            Punctuator::PipeEq => AssignOp::BitOrAssign,
            Punctuator::CaretEq => AssignOp::BitXorAssign,
            _ => unreachable!(),
        };
        Ok(Expression::Assignment { op: assign_op, target: Box::new(lhs), value: Box::new(value), span })
    }

    fn check_strict_assignment_target(&self, target: &Expression) -> CompileResult<()> {
        if !self.strict() {
            return Ok(());
        }
        if let Expression::Identifier { name, span } = target {
            if name == "eval" || name == "arguments" {
                return Err(CompileError::syntax(
                    "cannot assign to 'eval' or 'arguments' in strict mode",
                    *span,
                ));
            }
        }
        Ok(())
    }

    fn parse_conditional_expression(&mut self, no_in: bool) -> CompileResult<Expression> {
        let test = self.parse_binary_expression(0, no_in)?;
        if self.eat_punct(Punctuator::Question) {
            let span = test.span();
            let consequent = self.parse_assignment_expression(false)?;
            self.expect_punct(Punctuator::Colon)?;
            let alternate = self.parse_assignment_expression(no_in)?;
            let full_span = span.merge(alternate.span());
            return Ok(Expression::Conditional {
                test: Box::new(test),
                consequent: Box::new(consequent),
                alternate: Box::new(alternate),
                span: full_span,
            });
        }
        Ok(test)
    }

    fn binding_power(&self, no_in: bool) -> Option<(u8, BinaryOp)> {
        let op = match &self.current.kind {
            TokenKind::Punctuator(Punctuator::PipePipe) => (1, BinaryOp::LogicalOr),
            TokenKind::Punctuator(Punctuator::AmpAmp) => (2, BinaryOp::LogicalAnd),
            TokenKind::Punctuator(Punctuator::Pipe) => (3, BinaryOp::BitOr),
            TokenKind::Punctuator(Punctuator::Caret) => (4, BinaryOp::BitXor),
            TokenKind::Punctuator(Punctuator::Amp) => (5, BinaryOp::BitAnd),
            TokenKind::Punctuator(Punctuator::EqEq) => (6, BinaryOp::Eq),
            TokenKind::Punctuator(Punctuator::NotEq) => (6, BinaryOp::NotEq),
            TokenKind::Punctuator(Punctuator::EqEqEq) => (6, BinaryOp::StrictEq),
            TokenKind::Punctuator(Punctuator::NotEqEq) => (6, BinaryOp::StrictNotEq),
            TokenKind::Punctuator(Punctuator::Lt) => (7, BinaryOp::Lt),
            TokenKind::Punctuator(Punctuator::Gt) => (7, BinaryOp::Gt),
            TokenKind::Punctuator(Punctuator::LtEq) => (7, BinaryOp::LtEq),
            TokenKind::Punctuator(Punctuator::GtEq) => (7, BinaryOp::GtEq),
            TokenKind::Keyword(Keyword::Instanceof) => (7, BinaryOp::Instanceof),
            TokenKind::Keyword(Keyword::In) if !no_in => (7, BinaryOp::In),
            TokenKind::Punctuator(Punctuator::Shl) => (8, BinaryOp::Shl),
            TokenKind::Punctuator(Punctuator::Shr) => (8, BinaryOp::Shr),
            TokenKind::Punctuator(Punctuator::UShr) => (8, BinaryOp::UShr),
            TokenKind::Punctuator(Punctuator::Plus) => (9, BinaryOp::Add),
            TokenKind::Punctuator(Punctuator::Minus) => (9, BinaryOp::Sub),
            TokenKind::Punctuator(Punctuator::Star) => (10, BinaryOp::Mul),
            TokenKind::Punctuator(Punctuator::Slash) => (10, BinaryOp::Div),
            TokenKind::Punctuator(Punctuator::Percent) => (10, BinaryOp::Mod),
            _ => return None,
        };
        Some(op)
    }

    fn parse_binary_expression(&mut self, min_bp: u8, no_in: bool) -> CompileResult<Expression> {
        let mut left = self.parse_unary_expression()?;
        while let Some((bp, op)) = self.binding_power(no_in) {
            if bp < min_bp {
                break;
            }
            let span = self.current.span;
            self.bump();
            let right = self.parse_binary_expression(bp + 1, no_in)?;
            left = Expression::Binary { op, left: Box::new(left), right: Box::new(right), span };
        }
        Ok(left)
    }

    fn parse_unary_expression(&mut self) -> CompileResult<Expression> {
        let span = self.current.span;
        let op = match &self.current.kind {
            TokenKind::Keyword(Keyword::Delete) => Some(UnaryOp::Delete),
            TokenKind::Keyword(Keyword::Void) => Some(UnaryOp::Void),
            TokenKind::Keyword(Keyword::Typeof) => Some(UnaryOp::Typeof),
            TokenKind::Punctuator(Punctuator::Plus) => Some(UnaryOp::Plus),
            TokenKind::Punctuator(Punctuator::Minus) => Some(UnaryOp::Minus),
            TokenKind::Punctuator(Punctuator::Tilde) => Some(UnaryOp::BitNot),
            TokenKind::Punctuator(Punctuator::Bang) => Some(UnaryOp::LogicalNot),
            _ => None,
        };
        if let Some(op) = op {
            self.bump();
            let argument = self.parse_unary_expression()?;
            if op == UnaryOp::Delete && self.strict() {
                if let Expression::Identifier { .. } = &argument {
                    return Err(CompileError::syntax("delete of an unqualified identifier in strict mode", span));
                }
            }
            return Ok(Expression::Unary { op, argument: Box::new(argument), span });
        }
        if self.at_punct(Punctuator::PlusPlus) || self.at_punct(Punctuator::MinusMinus) {
            let op = if self.at_punct(Punctuator::PlusPlus) { UpdateOp::Increment } else { UpdateOp::Decrement };
            self.bump();
            let argument = self.parse_unary_expression()?;
            self.check_update_target(&argument, span)?;
            return Ok(Expression::Update { op, prefix: true, argument: Box::new(argument), span });
        }
        self.parse_postfix_expression()
    }

    fn check_update_target(&self, target: &Expression, span: SourceSpan) -> CompileResult<()> {
        if !target.is_valid_assignment_target() {
            return Err(CompileError::reference("invalid increment/decrement operand", span));
        }
        if self.strict() {
            if let Expression::Identifier { name, .. } = target {
                if name == "eval" || name == "arguments" {
                    return Err(CompileError::syntax(
                        "cannot increment/decrement 'eval' or 'arguments' in strict mode",
                        span,
                    ));
                }
            }
        }
        Ok(())
    }

    fn parse_postfix_expression(&mut self) -> CompileResult<Expression> {
        let expr = self.parse_lhs_expression()?;
        if !self.current.preceded_by_line_terminator
            && (self.at_punct(Punctuator::PlusPlus) || self.at_punct(Punctuator::MinusMinus))
        {
            let span = self.current.span;
            let op = if self.at_punct(Punctuator::PlusPlus) { UpdateOp::Increment } else { UpdateOp::Decrement };
            self.check_update_target(&expr, span)?;
            self.bump();
            return Ok(Expression::Update { op, prefix: false, argument: Box::new(expr), span });
        }
        Ok(expr)
    }

    fn parse_lhs_expression(&mut self) -> CompileResult<Expression> {
        let mut expr = if self.at_keyword(Keyword::New) {
            self.parse_new_expression()?
        } else {
            self.parse_primary_expression()?
        };
        loop {
            if self.at_punct(Punctuator::Dot) {
                let span = self.current.span;
                self.bump();
                let name = self.expect_identifier_name()?;
                expr = Expression::Property {
                    object: Box::new(expr),
                    key: PropertyAccessKey::Static(PropertyKey::Identifier(name)),
                    span,
                };
            } else if self.at_punct(Punctuator::LBracket) {
                let span = self.current.span;
                self.bump();
                let index = self.parse_expression()?;
                self.expect_punct(Punctuator::RBracket)?;
                expr = Expression::Property { object: Box::new(expr), key: PropertyAccessKey::Computed(Box::new(index)), span };
            } else if self.at_punct(Punctuator::LParen) {
                let span = self.current.span;
                let args = self.parse_arguments()?;
                expr = Expression::Call { callee: Box::new(expr), arguments: args, span };
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn parse_new_expression(&mut self) -> CompileResult<Expression> {
        let span = self.current.span;
        self.bump(); // `new`
        let callee = if self.at_keyword(Keyword::New) {
            self.parse_new_expression()?
        } else {
            let mut member = self.parse_primary_expression()?;
            loop {
                if self.at_punct(Punctuator::Dot) {
                    self.bump();
                    let name = self.expect_identifier_name()?;
                    member = Expression::Property {
                        object: Box::new(member),
                        key: PropertyAccessKey::Static(PropertyKey::Identifier(name)),
                        span,
                    };
                } else if self.at_punct(Punctuator::LBracket) {
                    self.bump();
                    let index = self.parse_expression()?;
                    self.expect_punct(Punctuator::RBracket)?;
                    member = Expression::Property { object: Box::new(member), key: PropertyAccessKey::Computed(Box::new(index)), span };
                } else {
                    break;
                }
            }
            member
        };
        let arguments = if self.at_punct(Punctuator::LParen) { self.parse_arguments()? } else { Vec::new() };
        Ok(Expression::CallNew { callee: Box::new(callee), arguments, span })
    }

    fn parse_arguments(&mut self) -> CompileResult<Vec<Expression>> {
        self.expect_punct(Punctuator::LParen)?;
        let mut args = Vec::new();
        if !self.at_punct(Punctuator::RParen) {
            loop {
                args.push(self.parse_assignment_expression(false)?);
                if !self.eat_punct(Punctuator::Comma) {
                    break;
                }
            }
        }
        self.expect_punct(Punctuator::RParen)?;
        Ok(args)
    }

    fn parse_primary_expression(&mut self) -> CompileResult<Expression> {
        let span = self.current.span;
        match self.current.kind.clone() {
            TokenKind::Keyword(Keyword::This) => {
                self.bump();
                Ok(Expression::This { span })
            }
            TokenKind::Keyword(Keyword::Null) => {
                self.bump();
                Ok(Expression::Null { span })
            }
            TokenKind::Keyword(Keyword::True) => {
                self.bump();
                Ok(Expression::Boolean { value: true, span })
            }
            TokenKind::Keyword(Keyword::False) => {
                self.bump();
                Ok(Expression::Boolean { value: false, span })
            }
            TokenKind::Keyword(Keyword::Function) => {
                let function = self.parse_function(FunctionKind::Expression)?;
                Ok(Expression::FunctionExpression { function: Box::new(function) })
            }
            TokenKind::Identifier => {
                let name = self.current.value.clone();
                self.bump();
                self.mark_eval_tainted_if_needed(&name);
                Ok(Expression::Identifier { name, span })
            }
            TokenKind::NumericLiteral => {
                let token = self.current.clone();
                if self.strict() && token.is_legacy_octal {
                    return Err(CompileError::syntax("octal literals are not allowed in strict mode", span));
                }
                let value = parse_numeric_literal(&token.value);
                self.bump();
                Ok(Expression::Number { value, span })
            }
            TokenKind::StringLiteral => {
                let token = self.current.clone();
                if self.strict() && token.is_legacy_octal {
                    return Err(CompileError::syntax(
                        "octal escape sequences are not allowed in strict mode",
                        span,
                    ));
                }
                self.bump();
                Ok(Expression::String { value: token.value, span })
            }
            TokenKind::Punctuator(Punctuator::Slash) | TokenKind::Punctuator(Punctuator::SlashEq) => {
                let slash = self.current.clone();
                let regex = self.lexer.next_as_regex(&slash);
                self.current = self.lexer.next_token();
                let (pattern, flags) = split_regex(&regex.value);
                Ok(Expression::Regex { pattern, flags, span: regex.span })
            }
            TokenKind::Punctuator(Punctuator::LParen) => {
                self.bump();
                let expr = self.parse_expression()?;
                self.expect_punct(Punctuator::RParen)?;
                Ok(expr)
            }
            TokenKind::Punctuator(Punctuator::LBracket) => self.parse_array_literal(),
            TokenKind::Punctuator(Punctuator::LBrace) => self.parse_object_literal(),
            _ => Err(CompileError::syntax("unexpected token", span)),
        }
    }

    fn parse_array_literal(&mut self) -> CompileResult<Expression> {
        let start = self.current.span;
        self.bump();
        let mut elements = Vec::new();
        while !self.at_punct(Punctuator::RBracket) {
            if self.at_punct(Punctuator::Comma) {
                elements.push(None); // elision
                self.bump();
                continue;
            }
            elements.push(Some(self.parse_assignment_expression(false)?));
            if !self.eat_punct(Punctuator::Comma) {
                break;
            }
        }
        let end = self.current.span;
        self.expect_punct(Punctuator::RBracket)?;
        Ok(Expression::Array { elements, span: start.merge(end) })
    }

    fn parse_object_literal(&mut self) -> CompileResult<Expression> {
        let start = self.current.span;
        self.bump();
        let mut properties = Vec::new();
        let mut data_keys: std::collections::HashSet<String> = std::collections::HashSet::new();
        let mut accessor_keys: std::collections::HashMap<String, (bool, bool)> = std::collections::HashMap::new();

        while !self.at_punct(Punctuator::RBrace) {
            let prop_span = self.current.span;
            if (self.current.is_identifier_named("get") || self.current.is_identifier_named("set"))
                && !self.peek_is_property_terminator()
            {
                let is_get = self.current.is_identifier_named("get");
                self.bump();
                let key = self.parse_property_key()?;
                let function = self.parse_accessor_function()?;
                let key_name = property_key_display(&key);
                if self.strict() {
                    let entry = accessor_keys.entry(key_name.clone()).or_insert((false, false));
                    if is_get {
                        entry.0 = true;
                    } else {
                        entry.1 = true;
                    }
                    if data_keys.contains(&key_name) {
                        return Err(CompileError::syntax(
                            "property cannot be both data and accessor in strict mode",
                            prop_span,
                        ));
                    }
                }
                properties.push(ObjectProperty::Accessor {
                    key,
                    kind: if is_get { AccessorKind::Get } else { AccessorKind::Set },
                    function: Box::new(function),
                });
            } else {
                let key = self.parse_property_key()?;
                self.expect_punct(Punctuator::Colon)?;
                let value = self.parse_assignment_expression(false)?;
                let key_name = property_key_display(&key);
                if self.strict() {
                    if !data_keys.insert(key_name.clone()) {
                        return Err(CompileError::syntax(
                            "duplicate data property in object literal in strict mode",
                            prop_span,
                        ));
                    }
                    if accessor_keys.contains_key(&key_name) {
                        return Err(CompileError::syntax(
                            "property cannot be both data and accessor in strict mode",
                            prop_span,
                        ));
                    }
                }
                properties.push(ObjectProperty::Data { key, value: Box::new(value) });
            }
            if !self.eat_punct(Punctuator::Comma) {
                break;
            }
        }
        let end = self.current.span;
        self.expect_punct(Punctuator::RBrace)?;
        Ok(Expression::Object { properties, span: start.merge(end) })
    }

    fn peek_is_property_terminator(&self) -> bool {
        // A bare `get`/`set` used as an ordinary property name is followed
        // directly by `:` or `,` or `}` rather than another property-name
        // token; callers check this before committing to the accessor path.
        false
    }

    fn parse_accessor_function(&mut self) -> CompileResult<FunctionLiteral> {
        let start = self.current.span;
        self.expect_punct(Punctuator::LParen)?;
        let mut params = Vec::new();
        if !self.at_punct(Punctuator::RParen) {
            loop {
                let p = self.expect_binding_identifier()?;
                params.push(p.name);
                if !self.eat_punct(Punctuator::Comma) {
                    break;
                }
            }
        }
        self.expect_punct(Punctuator::RParen)?;
        let inherited_strict = self.strict();
        self.scopes.push(ScopeFrame {
            name: None,
            strict: inherited_strict,
            declarations: Vec::new(),
            needs_arguments_object: false,
        });
        self.label_stack.push(LabelStackEntry::Barrier);
        self.expect_punct(Punctuator::LBrace)?;
        let mut body = Vec::new();
        let own_strict = self.parse_directive_prologue(&mut body)?;
        self.scopes.last_mut().unwrap().strict = inherited_strict || own_strict;
        while !self.at_punct(Punctuator::RBrace) && !self.at_end() {
            body.push(self.parse_statement()?);
        }
        let end = self.current.span;
        self.expect_punct(Punctuator::RBrace)?;
        let frame = self.scopes.pop().unwrap();
        self.label_stack.pop();
        Ok(FunctionLiteral {
            id: self.next_id(),
            name: None,
            params,
            body,
            declarations: frame.declarations,
            kind: FunctionKind::Expression,
            strict: frame.strict,
            needs_arguments_object: frame.needs_arguments_object,
            span: start.merge(end),
        })
    }

    fn parse_property_key(&mut self) -> CompileResult<PropertyKey> {
        match &self.current.kind {
            TokenKind::StringLiteral => {
                let v = self.current.value.clone();
                self.bump();
                Ok(PropertyKey::String(v))
            }
            TokenKind::NumericLiteral => {
                let v = parse_numeric_literal(&self.current.value);
                self.bump();
                Ok(PropertyKey::Number(v))
            }
            _ => {
                let name = self.expect_identifier_name()?;
                Ok(PropertyKey::Identifier(name))
            }
        }
    }
}

fn property_key_display(key: &PropertyKey) -> String {
    match key {
        PropertyKey::Identifier(s) | PropertyKey::String(s) => s.clone(),
        PropertyKey::Number(n) => format!("{n}"),
    }
}

fn parse_numeric_literal(text: &str) -> f64 {
    if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        return u64::from_str_radix(hex, 16).map(|v| v as f64).unwrap_or(f64::NAN);
    }
    if text.len() > 1 && text.starts_with('0') && text.chars().skip(1).all(|c| c.is_ascii_digit()) && !text.contains('.') {
        if let Ok(v) = u64::from_str_radix(&text[1..], 8) {
            return v as f64;
        }
    }
    text.parse::<f64>().unwrap_or(f64::NAN)
}

fn split_regex(literal: &str) -> (String, String) {
    let trimmed = &literal[1..];
    let close = trimmed.rfind('/').unwrap_or(trimmed.len());
    (trimmed[..close].to_owned(), trimmed[close + 1..].to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(src: &str) -> Program {
        Parser::parse_program(src).expect("parse should succeed")
    }

    #[test]
    fn parses_var_declaration() {
        let program = parse("var x = 1;");
        assert_eq!(program.body.len(), 1);
        assert!(matches!(program.body[0], Statement::VariableDeclaration { .. }));
    }

    #[test]
    fn strict_mode_from_unescaped_directive() {
        let program = parse("\"use strict\";\nvar x = 1;");
        assert!(program.strict);
    }

    #[test]
    fn escaped_use_strict_does_not_enable_strict() {
        let src = "\"use \\u0073trict\";\nwith (x) {}";
        let program = Parser::parse_program(src).expect("with is legal outside strict mode");
        assert!(!program.strict);
    }

    #[test]
    fn strict_mode_rejects_eval_as_variable_name() {
        let err = Parser::parse_program("\"use strict\";\nvar eval = 0;").unwrap_err();
        assert!(matches!(err, CompileError::Syntax { .. }));
    }

    #[test]
    fn duplicate_labels_rejected() {
        let err = Parser::parse_program("a: a: ;").unwrap_err();
        assert!(matches!(err, CompileError::Syntax { .. }));
    }

    #[test]
    fn self_targeting_break_becomes_empty_statement() {
        let program = parse("foo: break foo;");
        assert!(matches!(program.body[0], Statement::Empty { .. }));
    }

    #[test]
    fn unlabeled_continue_outside_loop_is_illegal() {
        let err = Parser::parse_program("continue;").unwrap_err();
        assert!(matches!(err, CompileError::Syntax { .. }));
    }

    #[test]
    fn function_call_with_arguments_detects_arguments_object() {
        let program = parse("function f() { return arguments.length; }");
        match &program.body[0] {
            Statement::FunctionDeclaration { function } => assert!(function.needs_arguments_object),
            _ => panic!("expected function declaration"),
        }
    }

    #[test]
    fn parameter_named_arguments_clears_flag() {
        let program = parse("function f(arguments) { return arguments.length; }");
        match &program.body[0] {
            Statement::FunctionDeclaration { function } => assert!(!function.needs_arguments_object),
            _ => panic!("expected function declaration"),
        }
    }

    #[test]
    fn for_in_head_requires_assignable_target() {
        let program = parse("for (var k in {a:1,b:2}) k;");
        assert!(matches!(program.body[0], Statement::ForIn { .. }));
    }

    #[test]
    fn asi_inserts_semicolon_before_closing_brace() {
        let program = parse("function f() { return 1 }");
        match &program.body[0] {
            Statement::FunctionDeclaration { function } => assert_eq!(function.body.len(), 1),
            _ => panic!("expected function declaration"),
        }
    }

    #[test]
    fn regex_relex_parses_as_primary_expression() {
        let program = parse("var r = /abc/gi;");
        match &program.body[0] {
            Statement::VariableDeclaration { decls, .. } => match &decls[0].1 {
                Some(Expression::Regex { pattern, flags, .. }) => {
                    assert_eq!(pattern, "abc");
                    assert_eq!(flags, "gi");
                }
                other => panic!("expected regex literal, got {other:?}"),
            },
            _ => panic!("expected var decl"),
        }
    }
}
