use crate::analysis::DomFrontier;
use crate::ir::{Dependant, DomTree, Function, Instruction, Opcode, VarState, VarStateId, Variable};
use smallvec::SmallVec;
use std::collections::{BTreeMap, BTreeSet, VecDeque};

type Definitions = BTreeMap<Variable, VarStateId>;

/**
 * The SSA value graph of one function. Every operand occurrence of every instruction is
 * linked to exactly one `VarState`.
 **/
#[derive(Clone, Debug, Default)]
pub struct SSAGraph {
    pub(crate) states: Vec<VarState>,
    inputs: Vec<SmallVec<[VarStateId; 4]>>,
    outputs: Vec<SmallVec<[VarStateId; 2]>>,
    phis: Vec<Definitions>,
    entry_states: Definitions,
}

impl SSAGraph {
    pub fn build(
        func: &Function,
        dom: &DomTree,
        df: &DomFrontier,
        calling_convention: &[u32],
    ) -> SSAGraph {
        let mut b = SSABuilder {
            func,
            graph: SSAGraph {
                states: vec![],
                inputs: vec![SmallVec::new(); func.instructions.len()],
                outputs: vec![SmallVec::new(); func.instructions.len()],
                phis: vec![Definitions::new(); func.basic_blocks.len()],
                entry_states: Definitions::new(),
            },
            versions: BTreeMap::new(),
            last: vec![None; func.basic_blocks.len()],
            calling_convention,
        };
        b.insert_phi_nodes(dom, df);
        b.rename();
        b.link_dependants();
        b.mark_unused();
        log::debug!(
            "{}: {} SSA states, {} phi nodes",
            func.name,
            b.graph.states.len(),
            b.graph.phis.iter().map(|x| x.len()).sum::<usize>()
        );
        b.graph
    }

    pub fn state(&self, id: VarStateId) -> &VarState {
        &self.states[id.index()]
    }

    pub fn states(&self) -> &[VarState] {
        self.states.as_slice()
    }

    pub fn inputs(&self, instr: usize) -> &[VarStateId] {
        self.inputs[instr].as_slice()
    }

    pub fn outputs(&self, instr: usize) -> &[VarStateId] {
        self.outputs[instr].as_slice()
    }

    pub fn phi_nodes(&self, bb: usize) -> impl Iterator<Item = VarStateId> + '_ {
        self.phis[bb].values().copied()
    }

    pub fn phi_of(&self, bb: usize, var: &Variable) -> Option<VarStateId> {
        self.phis[bb].get(var).copied()
    }

    pub fn entry_state(&self, var: &Variable) -> Option<VarStateId> {
        self.entry_states.get(var).copied()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

struct SSABuilder<'a> {
    func: &'a Function,
    graph: SSAGraph,
    versions: BTreeMap<Variable, u32>,
    /** Definitions live at the end of each block once it has been renamed. */
    last: Vec<Option<Definitions>>,
    calling_convention: &'a [u32],
}

impl<'a> SSABuilder<'a> {
    fn new_state(&mut self, var: Variable, block: usize) -> VarStateId {
        let version = self.versions.entry(var).or_insert(0);
        *version += 1;
        let id = VarStateId(self.graph.states.len() as u32);
        self.graph.states.push(VarState::new(id, var, *version, block));
        id
    }

    fn state_mut(&mut self, id: VarStateId) -> &mut VarState {
        &mut self.graph.states[id.index()]
    }

    /// The value a variable has on entry to the function.
    fn entry_state(&mut self, var: Variable) -> VarStateId {
        if let Some(s) = self.graph.entry_states.get(&var) {
            return *s;
        }
        let s = self.new_state(var, 0);
        self.graph.entry_states.insert(var, s);
        s
    }

    fn insert_phi_nodes(&mut self, dom: &DomTree, df: &DomFrontier) {
        let mut defs: BTreeMap<Variable, BTreeSet<usize>> = BTreeMap::new();
        for instr in self.func.instructions.iter() {
            for var in instr.outputs().filter(|v| v.is_named_storage()) {
                defs.entry(*var).or_default().insert(instr.block);
            }
        }
        for (var, blocks) in defs {
            for bb in df.closure(blocks) {
                if !dom.is_reachable_from_entry(bb) {
                    continue;
                }
                let phi = self.new_state(var, bb);
                self.state_mut(phi).is_phi = true;
                self.graph.phis[bb].insert(var, phi);
            }
        }
    }

    fn rename(&mut self) {
        if self.func.basic_blocks.is_empty() {
            return;
        }
        let mut visited = vec![false; self.func.basic_blocks.len()];
        let mut queue = VecDeque::from([(None, 0usize)]);
        while let Some((prev, bb)) = queue.pop_front() {
            if let Some(p) = prev {
                self.update_phi_nodes(p, bb);
            }
            if visited[bb] {
                continue;
            }
            visited[bb] = true;

            let mut curr = prev
                .and_then(|p| self.last[p].clone())
                .unwrap_or_default();
            for (var, phi) in self.graph.phis[bb].iter() {
                curr.insert(*var, *phi);
            }
            let func = self.func;
            for instr in func.basic_blocks[bb].instructions(func) {
                self.rename_instruction(instr, &mut curr);
            }
            self.last[bb] = Some(curr);
            for s in func.basic_blocks[bb].successors() {
                queue.push_back((Some(bb), *s));
            }
        }
    }

    /// Wires the definitions live out of `pred` into the phi nodes of `bb`. This runs for
    /// every visit of the edge, including back edges into blocks that were already renamed.
    fn update_phi_nodes(&mut self, pred: usize, bb: usize) {
        let incoming = self.graph.phis[bb]
            .iter()
            .map(|(var, phi)| {
                let def = self.last[pred].as_ref().and_then(|l| l.get(var)).copied();
                (*var, *phi, def)
            })
            .collect::<Vec<_>>();
        for (var, phi, def) in incoming {
            let s = match def {
                Some(s) => s,
                None => self.entry_state(var),
            };
            if s != phi && !self.graph.states[phi.index()].pred.contains(&s) {
                self.state_mut(phi).pred.push(s);
            }
        }
    }

    /// Resolves a read of `var`. Compound operands get a fresh state wired to the states of
    /// their components.
    fn lookup(&mut self, var: Variable, curr: &mut Definitions, bb: usize, instr: usize) -> VarStateId {
        if var.is_named_storage() {
            return match curr.get(&var) {
                Some(s) => *s,
                None => self.entry_state(var),
            };
        }
        let s = self.new_state(var, bb);
        self.state_mut(s).user = Some(instr);
        self.link_components(s, curr, bb, instr);
        s
    }

    fn link_components(&mut self, s: VarStateId, curr: &mut Definitions, bb: usize, instr: usize) {
        let var = self.graph.states[s.index()].var;
        let (base, index) = var.address_registers();
        for r in [base, index].into_iter().flatten() {
            let p = self.lookup(r, curr, bb, instr);
            self.state_mut(s).pred.push(p);
        }
    }

    fn rename_instruction(&mut self, instr: &Instruction, curr: &mut Definitions) {
        let bb = instr.block;
        let mut inputs = SmallVec::<[VarStateId; 4]>::new();
        for var in instr.inputs() {
            inputs.push(self.lookup(*var, curr, bb, instr.id));
        }
        if instr.opcode == Opcode::Call {
            for r in self.calling_convention.iter() {
                if let Some(s) = curr.get(&Variable::register(*r)) {
                    let st = &self.graph.states[s.index()];
                    if st.def.is_some() || (st.is_phi && st.pred.len() >= 2) {
                        inputs.push(*s);
                    }
                }
            }
        }

        let mut outputs = SmallVec::<[VarStateId; 2]>::new();
        for var in instr.outputs() {
            let s = self.new_state(*var, bb);
            self.state_mut(s).def = Some(instr.id);
            if var.is_compound() {
                self.link_components(s, curr, bb, instr.id);
            } else if var.is_named_storage() {
                curr.insert(*var, s);
            }
            outputs.push(s);
        }
        self.graph.inputs[instr.id] = inputs;
        self.graph.outputs[instr.id] = outputs;
    }

    fn link_dependants(&mut self) {
        for i in 0..self.graph.states.len() {
            let s = VarStateId(i as u32);
            for p in self.graph.states[i].pred.clone() {
                self.state_mut(p).dependants.insert(Dependant::State(s));
            }
        }
        for instr in 0..self.graph.inputs.len() {
            let used = self.graph.inputs[instr]
                .iter()
                .chain(self.graph.outputs[instr].iter())
                .copied()
                .collect::<Vec<_>>();
            for s in used {
                let is_input = self.graph.inputs[instr].contains(&s);
                if is_input {
                    self.state_mut(s).dependants.insert(Dependant::Instruction(instr));
                }
                if self.graph.states[s.index()].var.is_compound() {
                    for p in self.graph.states[s.index()].pred.clone() {
                        self.state_mut(p).dependants.insert(Dependant::Instruction(instr));
                    }
                }
            }
        }
    }

    /// Everything that no instruction input or memory write reaches backwards is dead.
    fn mark_unused(&mut self) {
        let mut used = vec![false; self.graph.states.len()];
        let mut work_list = vec![];
        for instr in 0..self.graph.inputs.len() {
            work_list.extend(self.graph.inputs[instr].iter().copied());
            work_list.extend(
                self.graph.outputs[instr]
                    .iter()
                    .filter(|s| self.graph.states[s.index()].var.is_compound())
                    .copied(),
            );
        }
        while let Some(s) = work_list.pop() {
            if !used[s.index()] {
                used[s.index()] = true;
                work_list.extend(self.graph.states[s.index()].pred.iter().copied());
            }
        }
        for (s, u) in self.graph.states.iter_mut().zip(used) {
            s.not_used = !u;
        }
    }
}
