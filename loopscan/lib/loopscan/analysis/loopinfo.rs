use crate::analysis::alias::AliasResult;
use crate::analysis::iterator::LoopIterator;
use crate::analysis::memory_location::MemoryAccesses;
use crate::analysis::report::{VarProfile, Verdict};
use crate::analysis::{variable, SSAGraph};
use crate::adt::fixpoint;
use crate::error::{AnalysisError, Error, NonConvergence};
use crate::ir::{DomTree, Function, VarStateId, Variable, CFG};
use crate::support::diagnostic::{DiagnosticContext, Remark};
use petgraph::visit::{depth_first_search, DfsEvent};
use std::collections::{BTreeMap, BTreeSet};

/**
 * A natural loop together with everything the later passes learn about it.
 *
 * The block partitions follow the usual shape: `init` holds the outside predecessors of
 * `start`, `end` the latches, `check` the body blocks with an edge leaving the loop and
 * `exit` the targets of those edges.
 **/
#[derive(Clone, Debug)]
pub struct Loop {
    /** Module-wide id. */
    pub id: usize,
    /** Position in the owning `LoopAnalysis`. */
    pub(crate) index: usize,
    pub start: usize,
    pub init: BTreeSet<usize>,
    pub body: BTreeSet<usize>,
    pub end: BTreeSet<usize>,
    pub check: BTreeSet<usize>,
    pub exit: BTreeSet<usize>,

    pub(crate) ancestors: BTreeSet<usize>,
    pub(crate) descendants: BTreeSet<usize>,
    pub(crate) sub_loops: BTreeSet<usize>,
    pub(crate) parent: Option<usize>,
    pub(crate) level: Option<usize>,

    pub(crate) init_vars: BTreeSet<VarStateId>,
    pub(crate) const_states: BTreeSet<VarStateId>,
    pub(crate) private_vars: BTreeSet<Variable>,

    pub(crate) iterators: BTreeMap<VarStateId, LoopIterator>,
    pub(crate) main_iterator: Option<VarStateId>,
    pub(crate) undecided_phis: BTreeSet<VarStateId>,
    pub(crate) register_to_conditional_merge: BTreeSet<Variable>,
    pub(crate) stack_to_conditional_merge: BTreeSet<Variable>,
    /** Number of iterations, or 0 when it cannot be decided statically. */
    pub(crate) static_iter_count: i64,

    pub(crate) memory: MemoryAccesses,
    pub(crate) alias: AliasResult,

    pub(crate) sub_calls: BTreeSet<usize>,
    pub(crate) live_out_registers: BTreeSet<Variable>,
    pub(crate) encoded_variables: Vec<VarProfile>,
    pub(crate) is_unsafe: bool,
    /** The body calls out of the analysed code. */
    pub(crate) sync: bool,
    pub(crate) removed: bool,
    pub(crate) verdict: Option<Verdict>,
}

impl Loop {
    fn new(index: usize, id: usize, start: usize) -> Loop {
        Self {
            id,
            index,
            start,
            init: BTreeSet::new(),
            body: BTreeSet::new(),
            end: BTreeSet::new(),
            check: BTreeSet::new(),
            exit: BTreeSet::new(),
            ancestors: BTreeSet::new(),
            descendants: BTreeSet::new(),
            sub_loops: BTreeSet::new(),
            parent: None,
            level: None,
            init_vars: BTreeSet::new(),
            const_states: BTreeSet::new(),
            private_vars: BTreeSet::new(),
            iterators: BTreeMap::new(),
            main_iterator: None,
            undecided_phis: BTreeSet::new(),
            register_to_conditional_merge: BTreeSet::new(),
            stack_to_conditional_merge: BTreeSet::new(),
            static_iter_count: 0,
            memory: MemoryAccesses::default(),
            alias: AliasResult::default(),
            sub_calls: BTreeSet::new(),
            live_out_registers: BTreeSet::new(),
            encoded_variables: vec![],
            is_unsafe: false,
            sync: false,
            removed: false,
            verdict: None,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn contains(&self, bb: usize) -> bool {
        self.body.contains(&bb)
    }

    pub fn is_ancestor_of(&self, other: usize) -> bool {
        self.descendants.contains(&other)
    }

    pub fn is_descendant_of(&self, other: usize) -> bool {
        self.ancestors.contains(&other)
    }

    pub fn parent(&self) -> Option<usize> {
        self.parent
    }

    pub fn level(&self) -> Option<usize> {
        self.level
    }

    pub fn sub_loops(&self) -> &BTreeSet<usize> {
        &self.sub_loops
    }

    pub fn iterators(&self) -> &BTreeMap<VarStateId, LoopIterator> {
        &self.iterators
    }

    pub fn main_iterator(&self) -> Option<&LoopIterator> {
        self.main_iterator.and_then(|x| self.iterators.get(&x))
    }

    pub fn static_iter_count(&self) -> i64 {
        self.static_iter_count
    }

    pub fn memory(&self) -> &MemoryAccesses {
        &self.memory
    }

    pub fn alias(&self) -> &AliasResult {
        &self.alias
    }

    pub fn private_vars(&self) -> &BTreeSet<Variable> {
        &self.private_vars
    }

    pub fn live_out_registers(&self) -> &BTreeSet<Variable> {
        &self.live_out_registers
    }

    pub fn encoded_variables(&self) -> &[VarProfile] {
        self.encoded_variables.as_slice()
    }

    pub fn is_unsafe(&self) -> bool {
        self.is_unsafe
    }

    pub fn is_removed(&self) -> bool {
        self.removed
    }

    pub fn verdict(&self) -> Option<Verdict> {
        self.verdict
    }

    /**
     * Whether the value of `vs` is the same in every iteration of this loop. A value read
     * back from memory may be reported as constant even if the loop writes that memory.
     **/
    pub fn is_constant(&self, ssa: &SSAGraph, vs: VarStateId) -> bool {
        variable::is_constant_in(&self.body, &self.const_states, ssa, vs)
    }
}

/**
 * Loop nest of one function. Loops are kept in discovery order; `block_loop` maps every
 * block to its innermost enclosing loop.
 **/
#[derive(Clone, Debug, Default)]
pub struct LoopAnalysis {
    pub(crate) loops: Vec<Loop>,
    block_loop: Vec<Option<usize>>,
}

impl LoopAnalysis {
    pub fn analyze(
        func: &Function,
        dom: &DomTree,
        first_id: usize,
        limit: usize,
        diag: &DiagnosticContext,
    ) -> LoopAnalysis {
        let mut la = LoopAnalysis {
            loops: vec![],
            block_loop: vec![None; func.basic_blocks.len()],
        };
        if dom.is_empty() {
            return la;
        }
        for start in Self::back_edge_targets(func, dom) {
            let index = la.loops.len();
            let l = Self::build_loop(func, dom, Loop::new(index, first_id + index, start));
            log::debug!(
                "{}: loop {} at block {}, {} blocks",
                func.name,
                l.id,
                start,
                l.body.len()
            );
            la.loops.push(l);
        }
        la.compute_relations();
        match la.assign_levels(limit) {
            Ok(true) => {}
            Ok(false) => diag.record(Remark::function(
                &func.name,
                func.entry,
                Error::AnalysisError(AnalysisError::CyclicLoopRelation),
            )),
            Err(e) => diag.record(Remark::function(&func.name, func.entry, Error::NonConvergence(e))),
        }
        la.stamp_blocks();
        la
    }

    /**
     * Targets of back edges. An edge `bb -> succ` closes a loop when `succ` is discovered
     * no later than `bb` and finishes no earlier than it, and `succ` dominates `bb`.
     **/
    fn back_edge_targets(func: &Function, dom: &DomTree) -> BTreeSet<usize> {
        let n = func.basic_blocks.len();
        let mut first_visit = vec![usize::MAX; n];
        let mut second_visit = vec![usize::MAX; n];
        let cfg = &CFG::new(func);
        depth_first_search(cfg, Some(0), |event| match event {
            DfsEvent::Discover(bb, t) => first_visit[bb] = t.0,
            DfsEvent::Finish(bb, t) => second_visit[bb] = t.0,
            _ => {}
        });

        let mut targets = BTreeSet::new();
        for bb in func.basic_blocks.iter() {
            if first_visit[bb.id] == usize::MAX {
                continue;
            }
            for succ in bb.successors() {
                let bracketed = first_visit[*succ] <= first_visit[bb.id]
                    && second_visit[bb.id] <= second_visit[*succ];
                if bracketed && dom.dominates(*succ, bb.id) {
                    targets.insert(*succ);
                }
            }
        }
        targets
    }

    fn build_loop(func: &Function, dom: &DomTree, mut l: Loop) -> Loop {
        let start = l.start;
        for p in func.basic_blocks[start].predecessors() {
            if dom.dominates(start, *p) {
                l.end.insert(*p);
            } else if dom.is_reachable_from_entry(*p) {
                l.init.insert(*p);
            }
        }

        l.body.insert(start);
        let mut work_list = l.end.iter().copied().collect::<Vec<_>>();
        while let Some(bb) = work_list.pop() {
            if !l.body.insert(bb) {
                continue;
            }
            work_list.extend(
                func.basic_blocks[bb]
                    .predecessors()
                    .iter()
                    .filter(|p| dom.dominates(start, **p) && !l.body.contains(*p)),
            );
        }

        for bb in l.body.iter() {
            for s in func.basic_blocks[*bb].successors() {
                if !l.body.contains(s) {
                    l.check.insert(*bb);
                    l.exit.insert(*s);
                }
            }
        }
        l
    }

    fn compute_relations(&mut self) {
        let n = self.loops.len();
        for i in 0..n {
            for j in 0..n {
                if i != j && self.loops[i].contains(self.loops[j].start) {
                    self.loops[i].descendants.insert(j);
                    self.loops[j].ancestors.insert(i);
                }
            }
        }
    }

    /**
     * A loop's level is one more than the deepest of its ancestors. Returns false if some
     * loops are caught in a cyclic relation and stay unassigned. Loops still unassigned
     * when the round limit is hit are unsafe as well.
     **/
    fn assign_levels(&mut self, limit: usize) -> Result<bool, NonConvergence> {
        let n = self.loops.len();
        let rounds = fixpoint::iterate("loop levels", limit, || {
            let mut changed = false;
            for i in 0..n {
                if self.loops[i].level.is_some() {
                    continue;
                }
                let levels = self.loops[i]
                    .ancestors
                    .iter()
                    .map(|a| self.loops[*a].level)
                    .collect::<Option<Vec<_>>>();
                if let Some(levels) = levels {
                    let level = levels.iter().max().map_or(0, |x| x + 1);
                    self.loops[i].level = Some(level);
                    self.loops[i].parent = level.checked_sub(1).and_then(|up| {
                        self.loops[i]
                            .ancestors
                            .iter()
                            .copied()
                            .find(|a| self.loops[*a].level == Some(up))
                    });
                    changed = true;
                }
            }
            changed
        });
        for i in 0..n {
            if let Some(p) = self.loops[i].parent {
                self.loops[p].sub_loops.insert(i);
            }
        }
        let mut complete = true;
        for l in self.loops.iter_mut().filter(|l| l.level.is_none()) {
            l.is_unsafe = true;
            complete = false;
        }
        rounds.map(|_| complete)
    }

    fn stamp_blocks(&mut self) {
        for l in self.loops.iter() {
            for bb in l.body.iter() {
                let innermost = match self.block_loop[*bb] {
                    Some(other) => self.loops[other].level < l.level,
                    None => true,
                };
                if innermost {
                    self.block_loop[*bb] = Some(l.index);
                }
            }
        }
    }

    pub fn loops(&self) -> &[Loop] {
        self.loops.as_slice()
    }

    pub fn get(&self, index: usize) -> Option<&Loop> {
        self.loops.get(index)
    }

    pub fn len(&self) -> usize {
        self.loops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loops.is_empty()
    }

    pub fn loop_for(&self, bb: usize) -> Option<&Loop> {
        self.block_loop
            .get(bb)
            .copied()
            .flatten()
            .map(|x| &self.loops[x])
    }

    /// Loop indices ordered so that every loop comes after all of its descendants.
    pub fn innermost_first(&self) -> Vec<usize> {
        let mut order = (0..self.loops.len()).collect::<Vec<_>>();
        order.sort_by_key(|x| self.loops[*x].descendants.len());
        order
    }

    /// The loop whose header phi `vs` is an iterator of.
    pub fn iterator_of(&self, vs: VarStateId) -> Option<(&Loop, &LoopIterator)> {
        self.loops
            .iter()
            .find_map(|l| l.iterators.get(&vs).map(|it| (l, it)))
    }
}
