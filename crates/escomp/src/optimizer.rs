//! Dead-block elimination.
//!
//! A near-empty visitor shell: the only transform performed is dropping
//! blocks beyond the first that no terminator refers to. Everything else is
//! a no-op in this revision, left as an extension point for future passes.

use crate::ir::{BlockId, Function, Instruction, Module, Opcode};

pub fn run(module: &mut Module) {
    for function in &mut module.functions {
        remove_unreferenced_blocks(function);
    }
}

/// Entry block (index 0) is kept unconditionally even though it has no
/// referrers of its own; everything else needs at least one incoming edge
/// to stay reachable.
fn remove_unreferenced_blocks(function: &mut Function) {
    let live: Vec<BlockId> = (0..function.blocks.len() as BlockId)
        .filter(|&id| id == function.entry || !function.block(id).referrers.is_empty())
        .collect();
    if live.len() == function.blocks.len() {
        return;
    }

    let mut remap = vec![None; function.blocks.len()];
    for (new_id, &old_id) in live.iter().enumerate() {
        remap[old_id as usize] = Some(new_id as BlockId);
    }

    let mut blocks = Vec::with_capacity(live.len());
    for &old_id in &live {
        let mut block = std::mem::take(function.block_mut(old_id));
        block.referrers = block.referrers.iter().filter_map(|r| remap[*r as usize]).collect();
        for instr in &mut block.instructions {
            retarget(instr, &remap);
        }
        blocks.push(block);
    }

    function.entry = remap[function.entry as usize].expect("entry block is always kept live");
    function.blocks = blocks;
}

fn retarget(instr: &mut Instruction, remap: &[Option<BlockId>]) {
    match &mut instr.opcode {
        Opcode::Jump { target } => *target = remap[*target as usize].expect("jump target was dropped"),
        Opcode::Branch { if_true, if_false, .. } => {
            *if_true = remap[*if_true as usize].expect("branch target was dropped");
            *if_false = remap[*if_false as usize].expect("branch target was dropped");
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer;
    use crate::ir_builder::build;
    use crate::parser::Parser;

    fn build_module(src: &str) -> Module {
        let program = Parser::parse_program(src).expect("parses");
        let mut analysis = analyzer::analyze(&program);
        build(&program, &mut analysis)
    }

    #[test]
    fn drops_unreferenced_trailing_blocks() {
        let mut module = build_module("if (true) { 1; } else { 2; } 3;");
        let before = module.functions[0].blocks.len();
        run(&mut module);
        assert!(module.functions[0].blocks.len() <= before);
        assert!(module.functions[0].is_well_formed());
    }

    #[test]
    fn keeps_well_formed_module_well_formed() {
        let mut module = build_module("function f(a, b) { return a + b; } f(1, 2);");
        run(&mut module);
        for function in &module.functions {
            assert!(function.is_well_formed());
        }
    }
}
