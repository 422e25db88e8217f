use crate::adt::bitvector::BitVector;
use crate::adt::fixpoint;
use crate::error::NonConvergence;
use crate::ir::{Function, VarKind, Variable};
use std::collections::{BTreeMap, BTreeSet};

/**
 * Register and flag liveness at block boundaries.
 *
 * Registers read by an address or a shifted operand count as uses. A termination keeps the
 * return register alive; a block the decoder could not follow keeps everything alive.
 **/
#[derive(Clone, Debug, Default)]
pub struct Liveness {
    registers: Vec<Variable>,
    live_in: Vec<BitVector>,
    live_out: Vec<BitVector>,
}

fn slot(index: &mut BTreeMap<Variable, usize>, v: Variable) -> usize {
    let n = index.len();
    *index.entry(v).or_insert(n)
}

fn used_registers(var: &Variable) -> impl Iterator<Item = Variable> {
    let direct = match var.kind {
        VarKind::Register(_) | VarKind::ControlFlag(_) => Some(*var),
        _ => None,
    };
    let (base, index) = var.address_registers();
    direct.into_iter().chain(base).chain(index)
}

impl Liveness {
    pub fn analyze(func: &Function, return_register: Option<u32>, limit: usize) -> Result<Liveness, NonConvergence> {
        let mut index: BTreeMap<Variable, usize> = BTreeMap::new();
        for instr in func.instructions.iter() {
            for op in instr.operands.iter() {
                for r in used_registers(&op.var) {
                    slot(&mut index, r);
                }
            }
        }
        if let Some(r) = return_register {
            slot(&mut index, Variable::register(r));
        }
        let n = index.len();
        let nblocks = func.basic_blocks.len();

        let mut uses = vec![BitVector::new(n); nblocks];
        let mut defs = vec![BitVector::new(n); nblocks];
        for (bb, block) in func.basic_blocks.iter().enumerate() {
            for instr in block.instructions(func) {
                for v in instr.inputs().flat_map(used_registers) {
                    let x = index[&v];
                    if !defs[bb].contains(x) {
                        uses[bb].insert(x);
                    }
                }
                // address registers of a written operand are read
                for v in instr.outputs().filter(|v| v.is_compound()).flat_map(used_registers) {
                    let x = index[&v];
                    if !defs[bb].contains(x) {
                        uses[bb].insert(x);
                    }
                }
                for v in instr.outputs().filter(|v| v.is_register_like()) {
                    defs[bb].insert(index[v]);
                }
            }
        }

        let mut exit_live = vec![BitVector::new(n); nblocks];
        for bb in func.unrecognised.iter().filter(|bb| **bb < nblocks) {
            exit_live[*bb] = BitVector::full(n);
        }
        if let Some(r) = return_register.and_then(|r| index.get(&Variable::register(r))) {
            for bb in func.terminations.iter().filter(|bb| **bb < nblocks) {
                exit_live[*bb].insert(*r);
            }
        }

        let mut live_in = uses.clone();
        let mut live_out = exit_live.clone();
        fixpoint::iterate("liveness", limit, || {
            let mut changed = false;
            for bb in (0..nblocks).rev() {
                let mut out = exit_live[bb].clone();
                for s in func.basic_blocks[bb].successors() {
                    out.union_with(&live_in[*s]);
                }
                let mut inp = uses[bb].clone();
                for x in out.iter().filter(|x| !defs[bb].contains(*x)) {
                    inp.insert(x);
                }
                if out != live_out[bb] || inp != live_in[bb] {
                    changed = true;
                    live_out[bb] = out;
                    live_in[bb] = inp;
                }
            }
            changed
        })?;

        let mut registers = vec![Variable::register(0); n];
        for (v, x) in index {
            registers[x] = v;
        }
        Ok(Liveness {
            registers,
            live_in,
            live_out,
        })
    }

    fn names(&self, bits: &BitVector) -> BTreeSet<Variable> {
        bits.iter().map(|x| self.registers[x]).collect()
    }

    pub fn live_in(&self, bb: usize) -> BTreeSet<Variable> {
        self.live_in.get(bb).map(|b| self.names(b)).unwrap_or_default()
    }

    pub fn live_out(&self, bb: usize) -> BTreeSet<Variable> {
        self.live_out.get(bb).map(|b| self.names(b)).unwrap_or_default()
    }

    /// Registers read after leaving the loop through any of the `exit` blocks.
    pub fn live_across<'a, I: IntoIterator<Item = &'a usize>>(&self, exit: I) -> BTreeSet<Variable> {
        exit.into_iter().flat_map(|bb| self.live_in(*bb)).collect()
    }
}
