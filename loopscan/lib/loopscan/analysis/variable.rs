use crate::adt::fixpoint;
use crate::analysis::{Loop, SSAGraph};
use crate::error::NonConvergence;
use crate::ir::{Dependant, Function, Opcode, VarKind, VarStateId, Variable};
use std::collections::BTreeSet;

/// Per-loop facts about scalar variables.
#[derive(Clone, Debug, Default)]
pub struct VariableInfo {
    /** Values defined outside the body and read inside it. */
    pub init_vars: BTreeSet<VarStateId>,
    /** Values defined inside the body that do not change across iterations. */
    pub const_states: BTreeSet<VarStateId>,
    /** Storage written in the body whose previous-iteration value is never read. */
    pub private_vars: BTreeSet<Variable>,
}

pub(crate) fn is_constant_in(
    body: &BTreeSet<usize>,
    consts: &BTreeSet<VarStateId>,
    ssa: &SSAGraph,
    vs: VarStateId,
) -> bool {
    let s = ssa.state(vs);
    match s.var.kind {
        VarKind::Constant(_) | VarKind::ShiftedConstant { .. } => true,
        VarKind::Unknown => false,
        _ if s.var.is_compound() => s
            .pred
            .iter()
            .all(|p| is_constant_in(body, consts, ssa, *p)),
        _ if s.is_phi => !body.contains(&s.block),
        _ => s.is_input() || !body.contains(&s.block) || consts.contains(&vs),
    }
}

fn body_instructions<'a>(func: &'a Function, l: &'a Loop) -> impl Iterator<Item = usize> + 'a {
    l.body
        .iter()
        .flat_map(move |bb| func.basic_blocks[*bb].instructions.clone())
}

pub fn analyze(func: &Function, ssa: &SSAGraph, l: &Loop, limit: usize) -> Result<VariableInfo, NonConvergence> {
    let mut info = VariableInfo::default();

    for i in body_instructions(func, l) {
        for s in ssa.inputs(i).iter().chain(ssa.outputs(i)) {
            let st = ssa.state(*s);
            let components = if st.var.is_compound() {
                st.pred.to_vec()
            } else {
                vec![*s]
            };
            for c in components {
                let cs = ssa.state(c);
                if cs.var.is_named_storage() && (cs.is_input() || !l.contains(cs.block)) {
                    info.init_vars.insert(c);
                }
            }
        }
    }
    for phi in ssa.phi_nodes(l.start) {
        for p in ssa.state(phi).pred.iter() {
            if !l.contains(ssa.state(*p).block) || ssa.state(*p).is_input() {
                info.init_vars.insert(*p);
            }
        }
    }

    let mut consts = BTreeSet::new();
    fixpoint::iterate("constant propagation", limit, || {
        let mut changed = false;
        for i in body_instructions(func, l) {
            let instr = &func.instructions[i];
            if instr.opcode == Opcode::Call || instr.opcode.is_control_flow() {
                continue;
            }
            let inputs = ssa.inputs(i);
            if inputs.is_empty()
                || !inputs
                    .iter()
                    .all(|s| is_constant_in(&l.body, &consts, ssa, *s))
            {
                continue;
            }
            // an update of one of the operands in place is never invariant
            let in_place = instr
                .outputs()
                .any(|o| instr.inputs().any(|x| x == o));
            if in_place {
                continue;
            }
            for out in ssa.outputs(i) {
                let v = ssa.state(*out).var;
                if v.is_named_storage() && !v.is_compound() {
                    changed |= consts.insert(*out);
                }
            }
        }
        changed
    })?;
    info.const_states = consts;

    for i in body_instructions(func, l) {
        for out in ssa.outputs(i) {
            let v = ssa.state(*out).var;
            if !v.is_named_storage() || matches!(v.kind, VarKind::ControlFlag(_)) {
                continue;
            }
            let carried = ssa.phi_of(l.start, &v).map_or(false, |phi| {
                ssa.state(phi).dependants.iter().any(|d| match d {
                    Dependant::Instruction(x) => l.contains(func.block_of(*x)),
                    Dependant::State(_) => false,
                })
            });
            if !carried {
                info.private_vars.insert(v);
            }
        }
    }
    Ok(info)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::programs::{counted_loop, invariant_loop, Bound};
    use crate::tests::pipeline;

    #[test]
    fn test_init_vars() {
        let fa = pipeline(counted_loop(Bound::Immediate(100)));
        let l = &fa.loops.loops()[0];
        let names = l
            .init_vars
            .iter()
            .map(|s| fa.ssa.state(*s).var)
            .collect::<BTreeSet<_>>();
        // the array base and the initial value of the counter
        assert!(names.contains(&Variable::register(2)));
        assert!(names.contains(&Variable::register(0)));
        assert!(l.const_states.is_empty());
    }

    #[test]
    fn test_invariant_values() {
        let fa = pipeline(invariant_loop());
        let l = &fa.loops.loops()[0];
        // add r5, r2, 8
        let r5 = fa.ssa.outputs(1)[0];
        assert!(l.const_states.contains(&r5));
        assert!(l.is_constant(&fa.ssa, r5));
        assert_eq!(Some(l.index()), fa.ssa.state(r5).const_loop);
        // add r0, r0, 1 updates its operand in place
        let r0 = fa.ssa.outputs(2)[0];
        assert!(!l.is_constant(&fa.ssa, r0));

        assert!(l.private_vars().contains(&Variable::register(5)));
        assert!(!l.private_vars().contains(&Variable::register(0)));
        assert!(!l.private_vars().contains(&Variable::flag(0)));
    }
}
