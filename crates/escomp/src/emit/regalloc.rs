//! Slot assignment for the target emitter.
//!
//! Every non-constant value needs a stack slot in the generated C frame.
//! `Function::push_instruction` already hands out each value's id in
//! allocation order regardless of which block it landed in, so the
//! straightforward allocator used here just treats a value's id as its slot
//! number: no liveness analysis, no slot reuse, one slot per value for the
//! life of the function. That satisfies the "stack balance" contract (a
//! single `stk_alloc` at entry covers every value the function ever
//! produces) without needing to prove any value dead. Persistent values are
//! `Slot`-addressed separately by the builder and never pass through here;
//! they don't need a stack slot at all.

use crate::ir::Function;

#[derive(Debug, Default)]
pub struct RegisterAllocation {
    pub stack_size: u32,
}

impl RegisterAllocation {
    /// A value's slot is its own id; this allocator performs no reuse.
    #[must_use]
    pub fn slot(&self, value: crate::ir::ValueId) -> u32 {
        value
    }
}

#[must_use]
pub fn allocate(function: &Function) -> RegisterAllocation {
    let stack_size = function.blocks.iter().map(|b| b.instructions.len() as u32).sum();
    RegisterAllocation { stack_size }
}
