use crate::error::{AnalysisError, Error, Result, StructuralError};
use crate::ir::{BasicBlock, Function, Opcode};
use crate::support::diagnostic::{DiagnosticContext, Remark};
use std::collections::HashMap;

/**
 * Partitions the linear instruction stream of `func` into basic blocks and wires the edges.
 *
 * `entries` maps the entry pc of every function in the module to its id, and is used to
 * resolve calls and tail jumps. Unresolvable targets are not fatal: the block is recorded as
 * unrecognised and a remark is emitted.
 **/
pub fn build(
    func: &mut Function,
    entries: &HashMap<u64, usize>,
    max_block_instructions: usize,
    diag: &DiagnosticContext,
) -> Result<()> {
    let n = func.instructions.len();
    if n == 0 {
        return Err(StructuralError::EmptyFunction.into());
    }
    func.calls.clear();
    func.unrecognised.clear();
    func.terminations.clear();
    func.return_blocks.clear();
    func.block_splits.clear();
    let mut pc_index = HashMap::new();
    let mut prev_pc = None;
    for (i, instr) in func.instructions.iter_mut().enumerate() {
        instr.id = i;
        if prev_pc.map_or(false, |pc| pc >= instr.pc) {
            return Err(StructuralError::UnorderedInstructions(instr.pc).into());
        }
        prev_pc = Some(instr.pc);
        pc_index.insert(instr.pc, i);
    }

    // next_non_nop[i]: the first non-nop instruction at or after i
    let mut next_non_nop = vec![None; n + 1];
    for i in (0..n).rev() {
        next_non_nop[i] = if func.instructions[i].is_nop() {
            next_non_nop[i + 1]
        } else {
            Some(i)
        };
    }

    let mut leader = vec![false; n];
    let mut terminator = vec![false; n];
    leader[0] = true;
    for (i, instr) in func.instructions.iter().enumerate() {
        if !instr.opcode.is_control_flow() {
            continue;
        }
        terminator[i] = true;
        if let Some(x) = next_non_nop[i + 1] {
            leader[x] = true;
        }
        if instr.opcode == Opcode::ConditionalBranch && i + 1 < n {
            leader[i + 1] = true;
        }
        if instr.opcode.is_branch() {
            if let Some(t) = instr.target.and_then(|pc| pc_index.get(&pc)) {
                leader[*t] = true;
            }
        }
    }
    terminator[n - 1] = true;

    let max = max_block_instructions.max(1);
    let mut blocks = vec![];
    let mut start = 0;
    for i in 0..n {
        let end_here = terminator[i] || i + 1 == n || leader[i + 1];
        let oversized = i + 1 - start >= max;
        if end_here || oversized {
            if !end_here {
                func.block_splits.push(i + 1);
            }
            if start > i {
                return Err(StructuralError::InvalidBlockRange(start, i + 1).into());
            }
            blocks.push(BasicBlock::new(blocks.len(), start..i + 1));
            start = i + 1;
        }
    }
    for bb in blocks.iter() {
        for x in bb.instructions.clone() {
            func.instructions[x].block = bb.id;
        }
    }

    let mut edges = vec![];
    for bb in blocks.iter_mut() {
        let last = bb.instructions.end - 1;
        let instr = &func.instructions[last];
        let fall_through = next_non_nop[last + 1].map(|x| func.instructions[x].block);
        let local_target = instr
            .target
            .and_then(|pc| pc_index.get(&pc))
            .map(|t| func.instructions[*t].block);
        let mut unresolved = false;
        match instr.opcode {
            Opcode::DirectBranch => {
                if let Some(t) = local_target {
                    edges.push((bb.id, t));
                } else if let Some(f) = instr.target.and_then(|pc| entries.get(&pc)) {
                    // tail call
                    func.calls.insert(*f);
                    func.terminations.insert(bb.id);
                } else {
                    unresolved = true;
                }
            }
            Opcode::ConditionalBranch => {
                if last + 1 < n {
                    edges.push((bb.id, func.instructions[last + 1].block));
                }
                match local_target {
                    Some(t) => edges.push((bb.id, t)),
                    None => unresolved = true,
                }
            }
            Opcode::Call => {
                match instr.target.and_then(|pc| entries.get(&pc)) {
                    Some(f) => {
                        func.calls.insert(*f);
                    }
                    None => unresolved = true,
                }
                match fall_through {
                    Some(t) => edges.push((bb.id, t)),
                    None => {
                        func.terminations.insert(bb.id);
                    }
                }
            }
            Opcode::Return => {
                func.terminations.insert(bb.id);
                func.return_blocks.insert(bb.id);
            }
            Opcode::Interrupt => {
                func.terminations.insert(bb.id);
            }
            _ => match fall_through {
                Some(t) => {
                    bb.fake = true;
                    edges.push((bb.id, t));
                }
                None => {
                    func.terminations.insert(bb.id);
                }
            },
        }
        if unresolved {
            func.unrecognised.insert(bb.id);
            diag.record(Remark::function(
                &func.name,
                instr.pc,
                Error::AnalysisError(AnalysisError::UnresolvedTarget(instr.target.unwrap_or(0))),
            ));
        }
    }

    for (from, to) in edges {
        if !blocks[from].successors.contains(&to) {
            blocks[from].successors.push(to);
            blocks[to].predecessors.push(from);
        }
    }
    for bb in blocks.iter_mut() {
        bb.successors.sort_unstable();
        bb.predecessors.sort_unstable();
    }
    log::debug!(
        "{}: {} blocks, {} splits, {} unrecognised",
        func.name,
        blocks.len(),
        func.block_splits.len(),
        func.unrecognised.len()
    );
    func.basic_blocks = blocks;
    Ok(())
}
