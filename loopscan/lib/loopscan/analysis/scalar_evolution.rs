use crate::analysis::dependence::{classify_phi, PhiClass};
use crate::analysis::iterator::{IterValue, IteratorKind, LoopIterator};
use crate::analysis::{Expander, Loop};
use crate::error::AnalysisError;
use crate::ir::expr::ExprArena;
use crate::ir::{Dependant, Evaluated, ExpandedExpr, Expr, Function, VarStateId, Variable};
use crate::support::safe_math::exact_div;
use std::collections::{BTreeMap, BTreeSet};

/// Everything pass 2 learns about a loop, applied by the caller in one step.
#[derive(Clone, Debug, Default)]
pub struct PostIteratorResult {
    /** Iterators decided on the retry. */
    pub iterators: BTreeMap<VarStateId, LoopIterator>,
    pub reductions: BTreeMap<VarStateId, LoopIterator>,
    pub register_to_conditional_merge: BTreeSet<Variable>,
    pub stack_to_conditional_merge: BTreeSet<Variable>,
    pub static_iter_count: i64,
    /** Closed forms `(iterator, start, stride)` of the loop's iterators. */
    pub scevs: Vec<(VarStateId, ExpandedExpr, ExpandedExpr)>,
    pub failures: Vec<AnalysisError>,
}

/// Whether the value of `phi` reaches an instruction of `l`, directly or through other
/// phis of the body.
fn is_read_in_loop(func: &Function, ex: &Expander, l: &Loop, phi: VarStateId) -> bool {
    let ssa = ex.ssa();
    let mut seen = BTreeSet::from([phi]);
    let mut work_list = vec![phi];
    while let Some(s) = work_list.pop() {
        for d in ssa.state(s).dependants.iter() {
            match d {
                Dependant::Instruction(i) if l.contains(func.block_of(*i)) => return true,
                Dependant::State(x) => {
                    let xs = ssa.state(*x);
                    if xs.is_phi && l.contains(xs.block) && seen.insert(*x) {
                        work_list.push(*x);
                    }
                }
                _ => {}
            }
        }
    }
    false
}

fn reduction(ex: &Expander, l: &Loop, phi: VarStateId) -> Option<LoopIterator> {
    let ssa = ex.ssa();
    let s = ssa.state(phi);
    let (mut init, mut update) = (None, None);
    for p in s.pred.iter() {
        let ps = ssa.state(*p);
        if !ps.is_input() && l.contains(ps.block) {
            update = ps.expr;
        } else {
            init = Some(*p);
        }
    }
    let init = init.and_then(|x| {
        ex.state_in_function(x, Some(l))
            .map(IterValue::from_expanded)
            .or_else(|| ssa.state(x).expr.map(IterValue::Expr))
    })?;
    let mut it = LoopIterator::new(phi, s.var, l.index(), init, IterValue::Expr(update?));
    it.kind = IteratorKind::Reduction;
    Some(it)
}

/// `(final - init) / stride + 1`, or 0 when the count is not a known positive integer.
fn static_iter_count(ex: &Expander, it: &LoopIterator) -> i64 {
    let stride = match it.stride_imm() {
        Some(s) if s != 0 => s,
        _ => return 0,
    };
    let fv = match &it.final_value {
        Some(x) => x,
        None => return 0,
    };
    let distance = match (it.init.as_int(), fv.as_int()) {
        (Some(i), Some(f)) => f.checked_sub(i),
        _ => {
            let init = ex.iter_value(&it.init, None);
            let fv = ex.iter_value(fv, None);
            init.zip(fv).and_then(|(i, mut f)| {
                f.subtract(&i);
                match f.evaluate() {
                    Some(Evaluated::Int(d)) => Some(d),
                    _ => None,
                }
            })
        }
    };
    distance
        .and_then(|d| exact_div(d, stride))
        .and_then(|x| x.checked_add(1))
        .filter(|x| *x > 0)
        .unwrap_or(0)
}

/**
 * Second pass over a loop whose own iterators and those of every nested loop are known.
 *
 * Phis left undecided by the first pass are walked again. Those that are still undecided
 * are harmless when their value is only ever overwritten in the loop; they are kept for a
 * conditional merge at the exit. A phi whose value is read back fails the loop.
 **/
pub fn post_iterator_analysis(func: &Function, ex: &Expander, l: &Loop) -> PostIteratorResult {
    let mut r = PostIteratorResult::default();
    for phi in l.undecided_phis.iter().copied() {
        if let PhiClass::Iterator(it) = classify_phi(ex, l, phi) {
            r.iterators.insert(phi, it);
            continue;
        }
        let var = ex.ssa().state(phi).var;
        if !is_read_in_loop(func, ex, l, phi) {
            if var.is_stack() {
                r.stack_to_conditional_merge.insert(var);
            } else if var.is_named_storage() {
                r.register_to_conditional_merge.insert(var);
            }
            continue;
        }
        log::debug!("loop {}: {} is read across iterations", l.id, var);
        if let Some(it) = reduction(ex, l, phi) {
            r.reductions.insert(phi, it);
        }
        r.failures.push(AnalysisError::ReductionVariable(phi.index()));
    }

    let main = match l.main_iterator() {
        Some(m) => m,
        None => {
            r.failures.push(AnalysisError::NoMainIterator);
            return r;
        }
    };
    r.static_iter_count = static_iter_count(ex, main);

    for it in l.iterators.values().chain(r.iterators.values()) {
        let start = ex.iter_value(&it.init, Some(l));
        let stride = ex.iter_value(&it.stride, Some(l));
        if let (Some(start), Some(stride)) = (start, stride) {
            r.scevs.push((it.phi, start, stride));
        }
    }
    r
}

/// Records `{start, +, stride}` for `it` in the arena.
pub fn attach_scev(arena: &mut ExprArena, it: &mut LoopIterator, start: ExpandedExpr, stride: ExpandedExpr) {
    let base = arena.push(Expr::Expanded(start), None);
    let stride = arena.push(Expr::Expanded(stride), None);
    it.scev = Some(arena.push(
        Expr::AddRec {
            base,
            stride,
            iterator: it.phi,
        },
        None,
    ));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::report::Verdict;
    use crate::tests::pipeline;
    use crate::tests::programs::{counted_loop, reduction_loop, Bound};

    #[test]
    fn test_overwritten_value_is_merged() {
        let fa = pipeline(counted_loop(Bound::Immediate(100)));
        let l = &fa.loops.loops()[0];
        // r1 is loaded in every iteration and never read back
        assert!(l.register_to_conditional_merge.contains(&Variable::register(1)));
        assert!(!l.is_unsafe());
        let it = l.main_iterator().expect("main iterator");
        match it.scev.map(|e| fa.arena.get(e)) {
            Some(Expr::AddRec { base, stride, iterator }) => {
                assert_eq!(it.phi, *iterator);
                assert_eq!(&Expr::Expanded(ExpandedExpr::integer(0)), fa.arena.get(*base));
                assert_eq!(&Expr::Expanded(ExpandedExpr::integer(1)), fa.arena.get(*stride));
            }
            e => panic!("unexpected {:?}", e),
        }
    }

    #[test]
    fn test_reduction_fails_loop() {
        let fa = pipeline(reduction_loop());
        let l = &fa.loops.loops()[0];
        assert!(l.is_unsafe());
        assert_eq!(Some(Verdict::Unsafe), l.verdict());
        let acc = fa.ssa.phi_of(1, &Variable::register(3)).expect("phi");
        assert_eq!(IteratorKind::Reduction, l.iterators()[&acc].kind);
        assert_eq!(64, l.static_iter_count());
    }

    #[test]
    fn test_static_iter_count() {
        let fa = pipeline(counted_loop(Bound::Immediate(100)));
        let ex = Expander::new(&fa.ssa, &fa.arena, &fa.loops);
        let mut it = LoopIterator::new(VarStateId(0), Variable::register(0), 0, IterValue::Int(10), IterValue::Int(4));
        it.final_value = Some(IterValue::Int(30));
        assert_eq!(6, static_iter_count(&ex, &it));
        it.final_value = Some(IterValue::Int(31));
        assert_eq!(0, static_iter_count(&ex, &it));
        it.final_value = Some(IterValue::Int(2));
        assert_eq!(0, static_iter_count(&ex, &it));

        // counts without an i64 value
        let mut wide = LoopIterator::new(VarStateId(0), Variable::register(0), 0, IterValue::Int(i64::MIN), IterValue::Int(1));
        wide.final_value = Some(IterValue::Int(i64::MAX));
        assert_eq!(0, static_iter_count(&ex, &wide));
        wide.init = IterValue::Int(0);
        assert_eq!(0, static_iter_count(&ex, &wide));
        wide.final_value = Some(IterValue::Int(i64::MAX - 1));
        assert_eq!(i64::MAX, static_iter_count(&ex, &wide));
    }
}
