use crate::ir::{ExprId, VarStateId, Variable};
use smallvec::SmallVec;
use std::collections::BTreeSet;

/** A reverse-use edge of a `VarState`. */
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Dependant {
    Instruction(usize),
    State(VarStateId),
}

/**
 * One SSA definition of a `Variable`.
 *
 * `pred` holds the incoming values of a phi node, or the base / index components of an
 * address or shifted operand. The instruction that reads a compound operand is recorded
 * in `user`; `def` is only set for values an instruction writes.
 **/
#[derive(Clone, Debug)]
pub struct VarState {
    pub id: VarStateId,
    pub var: Variable,
    pub version: u32,
    pub is_phi: bool,
    pub not_used: bool,
    pub block: usize,
    pub def: Option<usize>,
    pub user: Option<usize>,
    pub pred: SmallVec<[VarStateId; 2]>,
    pub dependants: BTreeSet<Dependant>,
    pub expr: Option<ExprId>,
    /** Innermost loop (function-local index) in which the value is invariant. */
    pub const_loop: Option<usize>,
}

impl VarState {
    pub(crate) fn new(id: VarStateId, var: Variable, version: u32, block: usize) -> VarState {
        Self {
            id,
            var,
            version,
            is_phi: false,
            not_used: false,
            block,
            def: None,
            user: None,
            pred: SmallVec::new(),
            dependants: BTreeSet::new(),
            expr: None,
            const_loop: None,
        }
    }

    /// A value that flows into the function from outside: no phi, no defining instruction,
    /// and not an operand-local state.
    pub fn is_input(&self) -> bool {
        !self.is_phi && self.def.is_none() && self.user.is_none()
    }
}
