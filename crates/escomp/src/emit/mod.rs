//! Final pipeline stage: resolve the stack-size promises the IR builder
//! left behind, assign real property-cache ids, then print either the IR
//! listing or the target C source.

pub mod printer;
pub mod regalloc;
pub mod target;

pub use printer::print_module;
pub use target::{emit_module as emit_target_source, EmittedSource};

use crate::ir::instr::Opcode;
use crate::ir::Module;

/// Property-cache ids wrap at the same capacity as a function's context
/// cache; both are 16-bit ids handed out by a counter that resets per
/// module, matching the "global mutable counters are module-scoped" design
/// note.
const PROPERTY_CACHE_CAPACITY: u16 = 4096;

/// Resolves every function's `stk_alloc` promise and assigns property-cache
/// ids. Must run once, after the optimizer, before either printer is used.
pub fn finalize(module: &mut Module) {
    for function in &mut module.functions {
        let allocation = regalloc::allocate(function);
        function.stack_slots.resolve(allocation.stack_size);
    }
    assign_property_caches(module);
}

fn assign_property_caches(module: &mut Module) {
    let mut next_cache: u16 = 0;
    for function in &mut module.functions {
        for block in &mut function.blocks {
            for instr in &mut block.instructions {
                let cache = match &mut instr.opcode {
                    Opcode::PropGet { cache, .. } | Opcode::PropPut { cache, .. } | Opcode::PropDelete { cache, .. } => Some(cache),
                    _ => None,
                };
                if let Some(cache) = cache {
                    *cache = next_cache;
                    next_cache = (next_cache + 1) % PROPERTY_CACHE_CAPACITY;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer;
    use crate::ir_builder::build;
    use crate::optimizer;
    use crate::parser::Parser;

    fn compiled(src: &str) -> Module {
        let program = Parser::parse_program(src).expect("parses");
        let mut analysis = analyzer::analyze(&program);
        let mut module = build(&program, &mut analysis);
        optimizer::run(&mut module);
        finalize(&mut module);
        module
    }

    #[test]
    fn stack_slot_promises_are_resolved() {
        let module = compiled("var x = 1; x;");
        for function in &module.functions {
            let _ = function.stack_slots.get();
        }
    }

    #[test]
    fn property_cache_ids_are_distinct_within_capacity() {
        let module = compiled("var o = {}; o.a; o.b; o.c;");
        let mut seen = Vec::new();
        for function in &module.functions {
            for block in &function.blocks {
                for instr in &block.instructions {
                    if let Opcode::PropGet { cache, .. } = instr.opcode {
                        seen.push(cache);
                    }
                }
            }
        }
        assert!(seen.windows(2).all(|w| w[0] != w[1]));
    }

    #[test]
    fn printer_and_target_emit_without_panicking() {
        let module = compiled("function f(a) { return a + 1; } f(2);");
        let ir_text = print_module(&module);
        assert!(ir_text.contains("function @"));
        let source = emit_target_source(&module);
        assert!(source.definitions.contains("__es_main"));
    }
}
