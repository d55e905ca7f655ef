//! Typed control-flow-graph intermediate representation.
//!
//! Blocks and functions are held in flat arenas and referenced by index
//! rather than through intrusive pointers, so the graph's natural cycles
//! (a block's terminator targets a successor; that successor's referrer set
//! points back) never need reference counting or a GC.

pub mod instr;

use ahash::AHashSet;
use indexmap::IndexMap;

use crate::intern::StringId;

pub use instr::{Constant, Instruction, Opcode};

#[derive(Debug, Clone, PartialEq)]
pub enum IrType {
    Void,
    Boolean,
    Double,
    StringRef,
    /// A tagged ES value as the runtime represents it.
    Value,
    /// An unresolved binding; only ever produced by the two meta
    /// instructions and consumed by `expand_ref_get`/`expand_ref_put`.
    Reference,
    Array(Box<IrType>, u32),
    Pointer(Box<IrType>),
    Opaque(&'static str),
}

pub type BlockId = u32;
pub type ValueId = u32;

/// A reference to an IR value: an instruction's result, a pool-interned
/// constant, or a `local`/`local-extra` binding's own storage slot.
///
/// The last form is what "an identifier that resolves to a local returns
/// that local directly" means in practice -- no load instruction stands
/// between a read and the slot that holds the value, so reading one twice
/// and writing it once are both just this same handle.
#[derive(Debug, Clone, PartialEq)]
pub enum ValueRef {
    Instruction(ValueId),
    Constant(Constant),
    Slot(StringId),
}

/// One instruction in a block, with its statically known result type and
/// the persistence bit the register allocator reads.
#[derive(Debug, Clone)]
pub struct ValueSlot {
    pub opcode: Opcode,
    pub ty: IrType,
    /// Forces a function-lifetime register slot instead of one reused by
    /// liveness; set for values that must survive across block boundaries
    /// the allocator can't easily prove dead (e.g. the extras pointer).
    pub persistent: bool,
}

#[derive(Debug, Default)]
pub struct Block {
    pub instructions: Vec<Instruction>,
    /// Terminators (by block id) that branch or jump to this block.
    pub referrers: AHashSet<BlockId>,
}

impl Block {
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.instructions.last().is_some_and(Instruction::is_terminator)
    }
}

/// A late-bound count filled in once lowering finishes, read by the emitter
/// at serialization time. Avoids back-patching the instruction stream when
/// the final `stk_alloc` count depends on the whole function body.
#[derive(Debug, Default, Clone, Copy)]
pub struct CountPromise(Option<u32>);

impl CountPromise {
    #[must_use]
    pub const fn unresolved() -> Self {
        Self(None)
    }

    pub fn resolve(&mut self, count: u32) {
        debug_assert!(self.0.is_none(), "stack-size promise resolved twice");
        self.0 = Some(count);
    }

    #[must_use]
    pub fn get(self) -> u32 {
        self.0.expect("stack-size promise read before it was resolved")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageClass {
    Local,
    LocalExtra,
    Context,
}

#[derive(Debug)]
pub struct Function {
    pub name: Option<StringId>,
    pub is_global: bool,
    pub blocks: Vec<Block>,
    pub entry: BlockId,
    /// Index into `blocks` for the value-area stack-slot count, resolved
    /// after the whole body is lowered.
    pub stack_slots: CountPromise,
    pub param_count: u32,
    pub needs_arguments_object: bool,
    /// Declared bindings' final storage classes, keyed by name, for the
    /// emitter's slot-address decisions (`fp[i]` / extras / context).
    pub variable_storage: IndexMap<StringId, StorageClass, ahash::RandomState>,
    /// `ValueId -> (block, index within block)`, appended in allocation
    /// order by [`Self::push_instruction`]; lets a `ValueRef::Instruction`
    /// be dereferenced without scanning every block.
    value_locations: Vec<(BlockId, u32)>,
    pub source_span: crate::source_loc::SourceSpan,
}

impl Function {
    #[must_use]
    pub fn new(name: Option<StringId>, is_global: bool, source_span: crate::source_loc::SourceSpan) -> Self {
        let mut blocks = Vec::new();
        blocks.push(Block::default());
        Self {
            name,
            is_global,
            blocks,
            entry: 0,
            stack_slots: CountPromise::unresolved(),
            param_count: 0,
            needs_arguments_object: false,
            variable_storage: IndexMap::default(),
            value_locations: Vec::new(),
            source_span,
        }
    }

    pub fn push_block(&mut self) -> BlockId {
        self.blocks.push(Block::default());
        (self.blocks.len() - 1) as BlockId
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut Block {
        &mut self.blocks[id as usize]
    }

    #[must_use]
    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id as usize]
    }

    pub fn add_referrer(&mut self, target: BlockId, from: BlockId) {
        self.blocks[target as usize].referrers.insert(from);
    }

    /// Appends `instr` to `block` and hands back the `ValueId` other
    /// instructions can reference it by.
    pub fn push_instruction(&mut self, block: BlockId, instr: Instruction) -> ValueId {
        let index = self.blocks[block as usize].instructions.len() as u32;
        self.blocks[block as usize].instructions.push(instr);
        self.value_locations.push((block, index));
        (self.value_locations.len() - 1) as ValueId
    }

    #[must_use]
    pub fn value(&self, id: ValueId) -> &Instruction {
        let (block, index) = self.value_locations[id as usize];
        &self.blocks[block as usize].instructions[index as usize]
    }

    /// True when every block is non-empty, terminated, and every
    /// terminator's targets record this block among their referrers.
    #[must_use]
    pub fn is_well_formed(&self) -> bool {
        for (id, block) in self.blocks.iter().enumerate() {
            if block.instructions.is_empty() || !block.is_terminated() {
                return false;
            }
            let Some(terminator) = block.instructions.last() else { return false };
            for target in terminator.targets() {
                if !self.blocks[target as usize].referrers.contains(&(id as BlockId)) {
                    return false;
                }
            }
        }
        true
    }
}

#[derive(Debug, Clone)]
pub struct StringResource {
    pub id: StringId,
    pub utf16: Vec<u16>,
}

#[derive(Debug, Default)]
pub struct Module {
    pub functions: Vec<Function>,
    pub resources: Vec<StringResource>,
}

impl Module {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}
