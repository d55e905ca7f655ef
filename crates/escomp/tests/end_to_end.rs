use escomp::analyze;
use escomp::emit::{emit_target_source, finalize, print_module};
use escomp::ir::instr::Opcode;
use escomp::ir_builder::build;
use escomp::optimizer;
use escomp::Parser;

fn compile(src: &str) -> escomp::Module {
    let program = Parser::parse_program(src).expect("parses");
    let mut analysis = analyze(&program);
    let mut module = build(&program, &mut analysis);
    optimizer::run(&mut module);
    finalize(&mut module);
    module
}

#[test]
fn simple_declaration_and_reference_allocates_one_stack_slot() {
    let module = compile("var x = 1; x;");
    let program_fn = &module.functions[0];
    assert_eq!(program_fn.stack_slots.get(), program_fn.blocks.iter().map(|b| b.instructions.len() as u32).sum());
    assert!(program_fn.is_well_formed());
}

#[test]
fn iife_with_arguments_gets_its_own_arguments_object() {
    let module = compile("(function(){ return arguments.length; })(1,2,3);");
    let inner = module.functions.iter().find(|f| !f.is_global).expect("has an inner function");
    assert!(inner.needs_arguments_object);
    let has_args_init = inner.blocks.iter().flat_map(|b| &b.instructions).any(|i| matches!(i.opcode, Opcode::ArgsObjInit { .. }));
    assert!(has_args_init);
}

#[test]
fn try_catch_finally_wraps_finally_body_in_save_and_load_state() {
    let module = compile("try { throw 1; } catch(e) { e } finally { 2 }");
    let program_fn = &module.functions[0];
    let saves = program_fn.blocks.iter().flat_map(|b| &b.instructions).filter(|i| matches!(i.opcode, Opcode::ExSaveState)).count();
    let loads = program_fn.blocks.iter().flat_map(|b| &b.instructions).filter(|i| matches!(i.opcode, Opcode::ExLoadState)).count();
    assert_eq!(saves, loads);
    assert!(saves >= 1, "finally body must be inflated on at least the exception path");
    let has_catch_enter = program_fn.blocks.iter().flat_map(|b| &b.instructions).any(|i| matches!(i.opcode, Opcode::CtxEnterCatch { .. }));
    assert!(has_catch_enter);
}

#[test]
fn for_in_short_circuits_on_null_and_undefined() {
    let module = compile("for (var k in {a:1,b:2}) k;");
    let program_fn = &module.functions[0];
    let has_iterator = program_fn.blocks.iter().flat_map(|b| &b.instructions).any(|i| matches!(i.opcode, Opcode::PropIteratorNew { .. }));
    assert!(has_iterator);
    let has_null_check = program_fn.blocks.iter().flat_map(|b| &b.instructions).any(|i| matches!(i.opcode, Opcode::ValIsNull(_)));
    assert!(has_null_check);
}

#[test]
fn strict_mode_rejects_eval_and_arguments_as_binding_names() {
    let result = Parser::parse_program("\"use strict\"; var eval = 0;");
    assert!(result.is_err(), "binding 'eval' in strict mode must be a syntax error");
}

#[test]
fn delete_of_a_local_folds_to_a_constant_without_emitting_ctx_delete() {
    let module = compile("function f() { var x = 1; delete x; } f();");
    let inner = module.functions.iter().find(|f| !f.is_global).expect("has the declared function");
    let has_ctx_delete = inner.blocks.iter().flat_map(|b| &b.instructions).any(|i| matches!(i.opcode, Opcode::CtxDelete { .. }));
    assert!(!has_ctx_delete, "deleting a local binding never needs ctx_del");
}

#[test]
fn emitted_output_references_the_runtime_entry_points() {
    let module = compile("function add(a, b) { return a + b; } add(1, 2);");
    let source = emit_target_source(&module);
    assert!(source.declarations.contains("__es_main"));
    assert!(source.definitions.contains("__es_main"));

    let ir_text = print_module(&module);
    assert!(ir_text.contains("bin_es.Add") || ir_text.contains("bb"));
}
