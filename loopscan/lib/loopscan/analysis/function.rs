use crate::analysis::alias::{alias_analysis, IterationSpace};
use crate::analysis::dependence::classify_phis;
use crate::analysis::iterator::{exit_condition, IteratorKind};
use crate::analysis::liveness::Liveness;
use crate::analysis::memory_location::{self, MemoryAccesses};
use crate::analysis::report::{self, UpdateOp, VarProfile, Verdict};
use crate::analysis::scalar_evolution::{attach_scev, post_iterator_analysis};
use crate::analysis::{ast, variable, DomFrontier, Expander, Loop, LoopAnalysis, SSAGraph};
use crate::context::AnalysisOptions;
use crate::error::{AnalysisError, Error, Result};
use crate::ir::expr::ExprArena;
use crate::ir::{DomTree, Evaluated, Function, Opcode, Term};
use crate::support::diagnostic::{DiagnosticContext, Remark};
use std::collections::{BTreeSet, HashMap};

/**
 * Everything computed for one function. The per-function phases run in `new`; the loop
 * passes run in `analyze_loops` once the call graph barrier has filled in the call
 * information.
 **/
pub struct FunctionAnalysis {
    pub func: Function,
    pub dom: DomTree,
    pub pdom: DomTree,
    pub df: DomFrontier,
    pub ssa: SSAGraph,
    pub arena: ExprArena,
    pub loops: LoopAnalysis,
    pub liveness: Liveness,
}

impl FunctionAnalysis {
    pub fn new(
        func: Function,
        first_loop_id: usize,
        options: &AnalysisOptions,
        diag: &DiagnosticContext,
    ) -> Result<FunctionAnalysis> {
        let limit = options.fixpoint_limit;
        let dom = DomTree::analyze(&func, limit)?;
        let pdom = DomTree::analyze_post(&func, limit)?;
        let df = DomFrontier::new(&dom);
        let mut ssa = SSAGraph::build(&func, &dom, &df, &options.calling_convention);
        let arena = ast::build(&func, &mut ssa);
        let mut loops = LoopAnalysis::analyze(&func, &dom, first_loop_id, limit, diag);
        let liveness = Liveness::analyze(&func, options.return_register, limit)?;

        for idx in loops.innermost_first() {
            let l = &mut loops.loops[idx];
            match variable::analyze(&func, &ssa, l, limit) {
                Ok(info) => {
                    for s in info.const_states.iter() {
                        let st = &mut ssa.states[s.index()];
                        if st.const_loop.is_none() {
                            st.const_loop = Some(idx);
                        }
                    }
                    l.init_vars = info.init_vars;
                    l.const_states = info.const_states;
                    l.private_vars = info.private_vars;
                }
                Err(e) => {
                    l.is_unsafe = true;
                    diag.record(Remark::loop_(&func.name, l.id, e.into()));
                }
            }
            l.live_out_registers = liveness.live_across(&l.exit);
            if let Some(bb) = l.body.iter().copied().find(|bb| func.unrecognised.contains(bb)) {
                l.is_unsafe = true;
                diag.record(Remark::loop_(
                    &func.name,
                    l.id,
                    Error::AnalysisError(AnalysisError::UnrecognisedBlock(bb)),
                ));
            }
        }

        Ok(FunctionAnalysis {
            func,
            dom,
            pdom,
            df,
            ssa,
            arena,
            loops,
            liveness,
        })
    }

    /**
     * Applies the result of the call graph closure. A loop that calls out of its body
     * cannot be reasoned about and is marked as synchronising.
     **/
    pub fn set_call_info(
        &mut self,
        entries: &HashMap<u64, usize>,
        closure: &[BTreeSet<usize>],
        diag: &DiagnosticContext,
    ) {
        self.func.sub_calls = closure.get(self.func.id).cloned().unwrap_or_default();
        let func = &self.func;
        for l in self.loops.loops.iter_mut() {
            let direct = l
                .body
                .iter()
                .flat_map(|bb| func.basic_blocks[*bb].instructions(func))
                .filter(|i| i.opcode == Opcode::Call)
                .filter_map(|i| i.target.and_then(|pc| entries.get(&pc)).copied())
                .collect::<BTreeSet<_>>();
            for callee in direct.iter() {
                l.sub_calls.insert(*callee);
                l.sub_calls.extend(closure.get(*callee).into_iter().flatten().copied());
                diag.record(Remark::loop_(
                    &func.name,
                    l.id,
                    Error::AnalysisError(AnalysisError::CallInLoop(*callee)),
                ));
            }
            l.sync |= !direct.is_empty();
        }
    }

    fn fail(&mut self, idx: usize, err: AnalysisError, diag: &DiagnosticContext) {
        let l = &mut self.loops.loops[idx];
        l.is_unsafe = true;
        diag.record(Remark::loop_(&self.func.name, l.id, Error::AnalysisError(err)));
    }

    /// Pass 1: iterator candidates and the exit condition.
    fn iterator_analysis(&mut self, idx: usize, diag: &DiagnosticContext) {
        let phis = {
            let ex = Expander::new(&self.ssa, &self.arena, &self.loops);
            classify_phis(&ex, &self.loops.loops[idx])
        };
        let l = &mut self.loops.loops[idx];
        l.iterators = phis.iterators;
        l.undecided_phis = phis.undecided;

        let exit = {
            let ex = Expander::new(&self.ssa, &self.arena, &self.loops);
            let l = &self.loops.loops[idx];
            exit_condition(&self.func, &ex, l, &l.iterators)
        };
        match exit {
            Ok(c) => {
                let l = &mut self.loops.loops[idx];
                l.main_iterator = Some(c.main);
                if let Some(it) = l.iterators.get_mut(&c.main) {
                    it.main = true;
                    it.final_value = c.final_value;
                    it.check_state = c.check_state;
                }
            }
            Err(e) => self.fail(idx, e, diag),
        }
    }

    /// Pass 2: undecided phis, trip count and closed forms.
    fn post_iterator_analysis(&mut self, idx: usize, diag: &DiagnosticContext) {
        let r = {
            let ex = Expander::new(&self.ssa, &self.arena, &self.loops);
            post_iterator_analysis(&self.func, &ex, &self.loops.loops[idx])
        };
        let l = &mut self.loops.loops[idx];
        for phi in r.iterators.keys().chain(r.reductions.keys()) {
            l.undecided_phis.remove(phi);
        }
        l.iterators.extend(r.iterators);
        l.iterators.extend(r.reductions);
        l.register_to_conditional_merge = r.register_to_conditional_merge;
        l.stack_to_conditional_merge = r.stack_to_conditional_merge;
        l.static_iter_count = r.static_iter_count;
        for (phi, start, stride) in r.scevs {
            if let Some(it) = l.iterators.get_mut(&phi) {
                attach_scev(&mut self.arena, it, start, stride);
            }
        }
        for e in r.failures {
            self.fail(idx, e, diag);
        }
    }

    /// Pass 3: memory locations, dependence tests and the verdict.
    fn dependence_analysis(&mut self, idx: usize, diag: &DiagnosticContext) {
        let (acc, alias, profiles) = {
            let ex = Expander::new(&self.ssa, &self.arena, &self.loops);
            let l = &self.loops.loops[idx];
            let acc = memory_location::build(&self.func, &ex, l);
            let space = IterationSpace {
                iterators: l
                    .iterators
                    .iter()
                    .filter(|(_, it)| it.kind != IteratorKind::Reduction)
                    .map(|(vs, _)| *vs)
                    .collect(),
                count: Some(l.static_iter_count).filter(|c| *c > 0),
            };
            let main_stride = l.main_iterator().and_then(|it| it.stride_imm());
            let alias = alias_analysis(&acc, &space, main_stride);
            let profiles = encoded_variables(&ex, l, &acc);
            (acc, alias, profiles)
        };
        let l = &mut self.loops.loops[idx];
        for (w, m) in alias.undecided.iter() {
            let (a, b) = (&acc.locations[*w], &acc.locations[*m]);
            diag.record(Remark::loop_(
                &self.func.name,
                l.id,
                Error::AnalysisError(AnalysisError::UndecidedMemoryAccess(
                    a.first_instruction().unwrap_or(usize::MAX),
                    b.first_instruction().unwrap_or(usize::MAX),
                )),
            ));
        }
        l.memory = acc;
        l.alias = alias;
        l.encoded_variables = profiles;
    }

    /**
     * Runs the three loop passes innermost first, so that the iterators of nested loops are
     * known when their parents are walked. Removed loops keep their discovery data only.
     **/
    pub fn analyze_loops(&mut self, diag: &DiagnosticContext) {
        let order = self.loops.innermost_first();
        let active = order
            .iter()
            .copied()
            .filter(|idx| !self.loops.loops[*idx].removed)
            .collect::<Vec<_>>();
        for idx in active.iter() {
            self.iterator_analysis(*idx, diag);
        }
        for idx in active.iter() {
            self.post_iterator_analysis(*idx, diag);
        }
        for idx in active.iter() {
            self.dependence_analysis(*idx, diag);
        }
        for idx in order {
            let l = &mut self.loops.loops[idx];
            let v = report::verdict(l);
            l.verdict = Some(v);
            if v != Verdict::Removed {
                log::info!("{}: loop {} at block {} is {}", self.func.name, l.id, l.start, v);
            }
        }
    }

    pub fn loops(&self) -> &[Loop] {
        self.loops.loops()
    }
}

/**
 * Induction profiles for iterators with an immediate stride, and array profiles for every
 * base that is a single register value. The range of an array is the distance its
 * accesses move over the whole loop.
 **/
fn encoded_variables(ex: &Expander, l: &Loop, acc: &MemoryAccesses) -> Vec<VarProfile> {
    let ssa = ex.ssa();
    let mut r = l
        .iterators
        .values()
        .filter(|it| it.is_induction())
        .filter_map(|it| {
            it.stride_imm().map(|stride| VarProfile::Induction {
                var: it.var,
                op: UpdateOp::Add,
                stride,
                check: it.check_state.map(|s| ssa.state(s).var),
                init: it.init.clone(),
            })
        })
        .collect::<Vec<_>>();

    if l.static_iter_count <= 0 {
        return r;
    }
    for (base, locs) in acc.array_accesses.iter() {
        let vs = match base.evaluate() {
            Some(Evaluated::Var(Term::Var(vs))) => vs,
            _ => continue,
        };
        let max_range = locs
            .iter()
            .filter_map(|x| acc.locations[*x].escev.as_ref())
            .filter_map(|s| s.integer_strides())
            .map(|strides| {
                strides
                    .iter()
                    .filter(|(it, _)| l.iterators.contains_key(it))
                    .map(|(_, s)| s.saturating_abs().saturating_mul(l.static_iter_count))
                    .fold(0i64, i64::saturating_add)
            })
            .max();
        if let Some(max_range) = max_range {
            r.push(VarProfile::Array {
                base: ssa.state(vs).var,
                max_range,
            });
        }
    }
    r
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::iterator::IterValue;
    use crate::ir::Variable;
    use crate::tests::pipeline;
    use crate::tests::programs::{
        copy_loop, counted_loop, imm, nested_loop, r, scaled_index_loop, Bound, FunctionBuilder,
    };

    #[test]
    fn test_counted_loop_profiles() {
        let fa = pipeline(counted_loop(Bound::Immediate(100)));
        let l = &fa.loops()[0];
        assert_eq!(Some(Verdict::Doall), l.verdict());
        assert!(l.encoded_variables().contains(&VarProfile::Induction {
            var: Variable::register(0),
            op: UpdateOp::Add,
            stride: 1,
            check: Some(Variable::constant(100)),
            init: IterValue::Int(0),
        }));
        assert!(l.encoded_variables().contains(&VarProfile::Array {
            base: Variable::register(2),
            max_range: 400,
        }));
        // r0 is read by the return
        assert!(l.live_out_registers().contains(&Variable::register(0)));
    }

    #[test]
    fn test_symbolic_count_has_no_array_profile() {
        let fa = pipeline(copy_loop());
        let l = &fa.loops()[0];
        assert_eq!(0, l.static_iter_count());
        assert!(!l
            .encoded_variables()
            .iter()
            .any(|p| matches!(p, VarProfile::Array { .. })));
    }

    #[test]
    fn test_nested_verdicts() {
        let fa = pipeline(nested_loop());
        assert_eq!(2, fa.loops().len());
        for l in fa.loops() {
            assert_eq!(Some(Verdict::Doall), l.verdict(), "loop {}", l.id);
        }
        let inner = fa.loops.loop_for(2).expect("inner");
        assert_eq!(10, inner.static_iter_count());
        let outer = fa.loops.loop_for(1).expect("outer");
        assert_eq!(20, outer.static_iter_count());
    }

    #[test]
    fn test_bounds_at_the_i64_limits() {
        // the distance to i64::MIN has no i64 value
        let fa = pipeline(counted_loop(Bound::Immediate(i64::MIN)));
        let l = &fa.loops()[0];
        assert!(l.main_iterator().is_none());
        assert_eq!(0, l.static_iter_count());
        assert_eq!(Some(Verdict::Unsafe), l.verdict());

        let fa = pipeline(counted_loop(Bound::Immediate(i64::MAX)));
        let l = &fa.loops()[0];
        assert_eq!(i64::MAX, l.static_iter_count());
        assert_eq!(Some(Verdict::Doall), l.verdict());
        assert!(l.encoded_variables().contains(&VarProfile::Array {
            base: Variable::register(2),
            max_range: i64::MAX,
        }));
    }

    #[test]
    fn test_overflowing_index_is_not_parallel() {
        let fa = pipeline(scaled_index_loop());
        let l = &fa.loops()[0];
        assert_eq!(100, l.static_iter_count());
        let store = l
            .memory()
            .locations
            .iter()
            .find(|m| m.is_write())
            .expect("store");
        assert!(store.escev.is_none());
        assert_ne!(Some(Verdict::Doall), l.verdict());
    }

    #[test]
    fn test_call_in_loop() {
        // 0: mov r10, 0; 1: call 0x100; 2: add r10, 1; 3: cmp r10, 8; 4: jcc 1; 5: ret
        let mut b = FunctionBuilder::new("caller", 0);
        b.mov(10, imm(0))
            .call(Some(0x100))
            .binary(Opcode::Add, 10, imm(1))
            .cmp(r(10), imm(8))
            .jcc(1)
            .ret();
        let entries = HashMap::from([(0, 0), (0x100, 1)]);
        let func = b.build_with(&entries);

        let diag = DiagnosticContext::default();
        let options = AnalysisOptions::default();
        let mut fa = FunctionAnalysis::new(func, 0, &options, &diag).expect("analysis");
        let closure = vec![BTreeSet::from([1]), BTreeSet::from([2]), BTreeSet::new()];
        fa.set_call_info(&entries, &closure, &diag);
        fa.analyze_loops(&diag);
        let l = &fa.loops()[0];
        assert_eq!(&BTreeSet::from([1, 2]), &l.sub_calls);
        assert_eq!(Some(Verdict::Unsafe), l.verdict());
        assert!(diag
            .remarks()
            .iter()
            .any(|r| matches!(r.error(), Error::AnalysisError(AnalysisError::CallInLoop(1)))));
    }

    #[test]
    fn test_removed_loop_is_skipped() {
        let diag = DiagnosticContext::default();
        let options = AnalysisOptions::default();
        let mut fa = FunctionAnalysis::new(counted_loop(Bound::Immediate(100)), 0, &options, &diag)
            .expect("analysis");
        fa.loops.loops[0].removed = true;
        fa.analyze_loops(&diag);
        let l = &fa.loops()[0];
        assert!(l.iterators().is_empty());
        assert_eq!(Some(Verdict::Removed), l.verdict());
    }
}
