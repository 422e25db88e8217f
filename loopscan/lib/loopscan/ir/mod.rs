pub mod cfg;
mod dom;
pub mod expanded;
pub mod expr;
pub mod instruction;
pub mod var_state;
pub mod variable;

use smallvec::SmallVec;
use static_assertions::const_assert_eq;
use std::collections::BTreeSet;
use std::ops::Range;

pub use dom::{DomTree, CFG};
pub use expanded::{Evaluated, ExpandedExpr, ExpandedKind, Term};
pub use expr::{BinaryOp, Expr, UnaryOp};
pub use instruction::{Access, Instruction, Opcode, Operand};
pub use var_state::{Dependant, VarState};
pub use variable::{ShiftKind, VarKind, Variable};

/** Index of a `VarState` in the function's SSA arena. */
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VarStateId(pub(crate) u32);

/** Index of an `Expr` in the function's expression arena. */
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExprId(pub(crate) u32);

const_assert_eq!(std::mem::size_of::<VarStateId>(), 4);
const_assert_eq!(std::mem::size_of::<ExprId>(), 4);

impl VarStateId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl ExprId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/**
 * A basic block.
 * The parent function owns the instruction arena and the BasicBlock
 * only stores the respective indices.
 **/
#[derive(Clone, Debug)]
pub struct BasicBlock {
    pub id: usize,
    pub instructions: Range<usize>,
    pub(crate) predecessors: SmallVec<[usize; 4]>,
    pub(crate) successors: SmallVec<[usize; 4]>,
    /** The block falls through into its successor without a terminator. */
    pub(crate) fake: bool,
}

#[derive(Clone, Debug)]
pub struct Function {
    pub id: usize,
    pub name: String,
    pub entry: u64,
    pub instructions: Vec<Instruction>,
    pub basic_blocks: Vec<BasicBlock>,
    /** Functions called directly from this one. */
    pub(crate) calls: BTreeSet<usize>,
    /** Transitive closure of `calls`, filled in after every function has been built. */
    pub(crate) sub_calls: BTreeSet<usize>,
    pub(crate) unrecognised: BTreeSet<usize>,
    pub(crate) terminations: BTreeSet<usize>,
    pub(crate) return_blocks: BTreeSet<usize>,
    /** Instruction ids at which oversized blocks were split. */
    pub(crate) block_splits: Vec<usize>,
}

impl BasicBlock {
    pub const ENTRY_INDEX: usize = 0;

    pub fn new(id: usize, instructions: Range<usize>) -> BasicBlock {
        Self {
            id,
            instructions,
            predecessors: SmallVec::new(),
            successors: SmallVec::new(),
            fake: false,
        }
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn predecessors(&self) -> &[usize] {
        self.predecessors.as_slice()
    }

    pub fn successors(&self) -> &[usize] {
        self.successors.as_slice()
    }

    pub fn instructions<'a>(&self, parent: &'a Function) -> &'a [Instruction] {
        &parent.instructions[self.instructions.clone()]
    }

    pub fn last_instruction<'a>(&self, parent: &'a Function) -> Option<&'a Instruction> {
        self.instructions(parent).last()
    }
}

impl Function {
    pub fn new(id: usize, name: &str, entry: u64, instructions: Vec<Instruction>) -> Function {
        Self {
            id,
            name: name.to_string(),
            entry,
            instructions,
            basic_blocks: vec![],
            calls: BTreeSet::new(),
            sub_calls: BTreeSet::new(),
            unrecognised: BTreeSet::new(),
            terminations: BTreeSet::new(),
            return_blocks: BTreeSet::new(),
            block_splits: vec![],
        }
    }

    pub fn calls(&self) -> &BTreeSet<usize> {
        &self.calls
    }

    pub fn sub_calls(&self) -> &BTreeSet<usize> {
        &self.sub_calls
    }

    pub fn unrecognised(&self) -> &BTreeSet<usize> {
        &self.unrecognised
    }

    pub fn terminations(&self) -> &BTreeSet<usize> {
        &self.terminations
    }

    pub fn block_splits(&self) -> &[usize] {
        self.block_splits.as_slice()
    }

    pub fn block_of(&self, instr: usize) -> usize {
        self.instructions[instr].block
    }
}
