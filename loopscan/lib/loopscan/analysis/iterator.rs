use crate::analysis::{Expander, Loop};
use crate::error::AnalysisError;
use crate::ir::{Evaluated, ExpandedExpr, ExpandedKind, ExprId, Function, Opcode, Term, VarStateId, Variable};
use crate::support::safe_math::exact_div;
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IteratorKind {
    /// `i = i + k` for an integer `k`.
    InductionImmStride,
    /// `i = i + n` for a loop-invariant value `n`.
    InductionVarStride,
    /// A recurrence whose stride is an invariant expression wider than one value.
    Generic,
    /// The value is accumulated from data read in the loop.
    Reduction,
}

/**
 * An iterator parameter in the most concrete form available: an integer, a single SSA
 * value, an expanded expression, or the unexpanded arena expression as a last resort.
 **/
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IterValue {
    Int(i64),
    Var(VarStateId),
    Expr(ExprId),
    Expanded(ExpandedExpr),
}

impl IterValue {
    pub fn from_expanded(x: ExpandedExpr) -> IterValue {
        match x.evaluate() {
            Some(Evaluated::Int(v)) => IterValue::Int(v),
            Some(Evaluated::Var(Term::Var(vs))) => IterValue::Var(vs),
            _ => IterValue::Expanded(x),
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            IterValue::Int(v) => Some(*v),
            _ => None,
        }
    }
}

impl Display for IterValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            IterValue::Int(v) => write!(f, "{}", v),
            IterValue::Var(vs) => write!(f, "v{}", vs.index()),
            IterValue::Expr(e) => write!(f, "e{}", e.index()),
            IterValue::Expanded(x) => write!(f, "{}", x),
        }
    }
}

/**
 * A header phi whose value follows `init, init + stride, ...` across iterations.
 *
 * `final_value` is the value of the phi in the last iteration, which is only known for
 * the main iterator, i.e. the one tested by the exit condition.
 **/
#[derive(Clone, Debug)]
pub struct LoopIterator {
    pub phi: VarStateId,
    pub var: Variable,
    pub loop_index: usize,
    pub kind: IteratorKind,
    pub init: IterValue,
    pub stride: IterValue,
    pub final_value: Option<IterValue>,
    pub main: bool,
    /** The value the main iterator is compared against. */
    pub check_state: Option<VarStateId>,
    /** `AddRec` node, attached once init and stride could be expanded. */
    pub scev: Option<ExprId>,
}

impl LoopIterator {
    pub fn new(phi: VarStateId, var: Variable, loop_index: usize, init: IterValue, stride: IterValue) -> LoopIterator {
        let kind = match stride {
            IterValue::Int(_) => IteratorKind::InductionImmStride,
            IterValue::Var(_) => IteratorKind::InductionVarStride,
            _ => IteratorKind::Generic,
        };
        Self {
            phi,
            var,
            loop_index,
            kind,
            init,
            stride,
            final_value: None,
            main: false,
            check_state: None,
            scev: None,
        }
    }

    pub fn stride_imm(&self) -> Option<i64> {
        self.stride.as_int()
    }

    pub fn is_induction(&self) -> bool {
        matches!(
            self.kind,
            IteratorKind::InductionImmStride | IteratorKind::InductionVarStride
        )
    }
}

impl Display for LoopIterator {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {{{}, +, {}}} {:?}",
            self.var, self.init, self.stride, self.kind
        )?;
        if let Some(x) = &self.final_value {
            write!(f, " final {}", x)?;
        }
        if self.main {
            write!(f, " (main)")?;
        }
        Ok(())
    }
}

/// Outcome of solving the exit condition of a loop.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExitCondition {
    pub main: VarStateId,
    pub final_value: Option<IterValue>,
    pub check_state: Option<VarStateId>,
}

/**
 * Picks the main iterator from the comparison that controls the single check block, and
 * solves `A * iter + B = 0` for the value of the iterator in the last iteration.
 *
 * The branch condition itself is not inspected, so `final_value` is the boundary value of
 * the comparison. When the comparison is against an updated copy of the phi (`i + 1 < n`),
 * the solution is expressed in terms of the phi, which gives `n - 1`.
 **/
pub fn exit_condition(
    func: &Function,
    ex: &Expander,
    l: &Loop,
    iterators: &BTreeMap<VarStateId, LoopIterator>,
) -> Result<ExitCondition, AnalysisError> {
    let check = match l.check.iter().next() {
        Some(bb) if l.check.len() == 1 => *bb,
        _ => return Err(AnalysisError::MultipleCheckBlocks(l.check.len())),
    };
    let ssa = ex.ssa();
    let branch = func.basic_blocks[check]
        .last_instruction(func)
        .filter(|i| i.opcode == Opcode::ConditionalBranch)
        .ok_or(AnalysisError::UnsupportedExitCondition)?;
    let flag = ssa
        .inputs(branch.id)
        .first()
        .ok_or(AnalysisError::UnsupportedExitCondition)?;
    let cmp = ssa
        .state(*flag)
        .def
        .filter(|d| matches!(func.instructions[*d].opcode, Opcode::Compare | Opcode::Sub))
        .ok_or(AnalysisError::UnsupportedExitCondition)?;
    let (s1, s2) = match ssa.inputs(cmp) {
        [a, b] => (*a, *b),
        _ => return Err(AnalysisError::UnsupportedExitCondition),
    };

    let expand = |s| {
        ex.state_in_loop(s, l)
            .filter(|x| !matches!(x.kind(), ExpandedKind::Sensi | ExpandedKind::Phi))
            .ok_or(AnalysisError::UnsupportedExitCondition)
    };
    let op1 = expand(s1)?;
    let op2 = expand(s2)?;
    let mut bound = op1.clone();
    bound.subtract(&op2);
    if !bound.is_sum() {
        return Err(AnalysisError::UnsupportedExitCondition);
    }

    let (main, a) = iterators
        .keys()
        .find_map(|vs| {
            bound
                .coefficient(&Term::Var(*vs))
                .filter(|c| *c != 0)
                .map(|c| (*vs, c))
        })
        .ok_or(AnalysisError::NoMainIterator)?;
    let mut rest = bound;
    rest.remove_term(&Term::Var(main));

    let final_value = match rest.evaluate() {
        Some(Evaluated::Int(b)) => b.checked_neg().and_then(|b| exact_div(b, a)).map(IterValue::Int),
        _ => match a {
            1 => Some(IterValue::from_expanded(rest.negated())),
            -1 => Some(IterValue::from_expanded(rest)),
            _ => None,
        },
    };
    let check_state = if op1.coefficient(&Term::Var(main)).map_or(false, |c| c != 0) {
        Some(s2)
    } else {
        Some(s1)
    };
    log::debug!(
        "loop {}: main iterator v{}, final value {:?}",
        l.id,
        main.index(),
        final_value
    );
    Ok(ExitCondition {
        main,
        final_value,
        check_state,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::pipeline;
    use crate::tests::programs::{counted_loop, Bound};

    #[test]
    fn test_immediate_bound() {
        let fa = pipeline(counted_loop(Bound::Immediate(100)));
        let l = &fa.loops.loops()[0];
        assert_eq!(1, l.iterators().len());
        let it = l.main_iterator().expect("main iterator");
        assert_eq!(Variable::register(0), it.var);
        assert_eq!(IteratorKind::InductionImmStride, it.kind);
        assert_eq!(IterValue::Int(0), it.init);
        assert_eq!(Some(1), it.stride_imm());
        assert_eq!(Some(IterValue::Int(99)), it.final_value);
        assert!(it.check_state.is_some());
        assert_eq!(100, l.static_iter_count());
    }

    #[test]
    fn test_symbolic_bound() {
        let fa = pipeline(counted_loop(Bound::Register(5)));
        let l = &fa.loops.loops()[0];
        let it = l.main_iterator().expect("main iterator");
        let n = fa.ssa.entry_state(&Variable::register(5)).expect("r5");
        let mut expected = ExpandedExpr::var(n);
        expected.add_term(Term::One, -1);
        assert_eq!(Some(IterValue::Expanded(expected)), it.final_value);
        assert_eq!(Some(n), it.check_state);
        assert_eq!(0, l.static_iter_count());
    }

    #[test]
    fn test_value_forms() {
        assert_eq!(IterValue::Int(3), IterValue::from_expanded(ExpandedExpr::integer(3)));
        let v = VarStateId(4);
        assert_eq!(IterValue::Var(v), IterValue::from_expanded(ExpandedExpr::var(v)));
        let mut x = ExpandedExpr::var(v);
        x.add_term(Term::One, 2);
        assert!(matches!(IterValue::from_expanded(x), IterValue::Expanded(_)));
    }
}
