#![expect(clippy::cast_possible_truncation, reason = "numeric narrowing is checked at call sites")]
#![expect(clippy::cast_sign_loss, reason = "sign-changing casts are intentional")]
#![expect(clippy::too_many_arguments, reason = "lowering signatures mirror the AST shapes they consume")]
#![expect(clippy::unreadable_literal, reason = "bit-pattern constants keep their canonical forms")]

//! An ahead-of-time ECMAScript 5.1 to C compiler.
//!
//! The pipeline is: [`unicode_stream`] decodes raw bytes, [`lexer`]
//! tokenizes, [`parser`] builds an [`ast`], [`analyzer`] classifies every
//! binding's storage class, [`ir_builder`] lowers the annotated AST into the
//! typed CFG defined by [`ir`], [`optimizer`] drops unreachable blocks, and
//! [`emit`] assigns caches and prints target C source. [`diagnostics`] is the
//! error type every stage returns; [`intern`] is the shared string pool
//! threaded through all of them.

pub mod analyzer;
pub mod ast;
pub mod diagnostics;
pub mod emit;
pub mod intern;
pub mod ir;
pub mod ir_builder;
pub mod lexer;
pub mod optimizer;
pub mod parser;
pub mod source_loc;
pub mod unicode_stream;

pub use analyzer::{analyze, AnalysisResult};
pub use diagnostics::{CompileError, CompileResult};
pub use ir::Module;
pub use parser::Parser;

/// Runs the full pipeline from source text to an optimized, cache-assigned
/// module ready for [`emit::print_module`].
pub fn compile(source: &str) -> CompileResult<Module> {
    let program = Parser::parse_program(source)?;
    let mut analysis = analyzer::analyze(&program);
    let mut module = ir_builder::build(&program, &mut analysis);
    optimizer::run(&mut module);
    emit::finalize(&mut module);
    Ok(module)
}
