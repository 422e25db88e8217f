use crate::adt::bitvector::BitVector;
use crate::adt::fixpoint;
use crate::error::NonConvergence;
use std::collections::BTreeSet;

/**
 * Transitive closure of the direct call relation. `calls[f]` are the functions `f` calls;
 * ids outside the table are ignored. The result for `f` contains every function reachable
 * from `f`, including `f` itself when it is recursive.
 **/
pub fn transitive_calls(calls: &[BTreeSet<usize>], limit: usize) -> Result<Vec<BTreeSet<usize>>, NonConvergence> {
    let n = calls.len();
    let direct = calls
        .iter()
        .map(|c| {
            let mut b = BitVector::new(n);
            c.iter().filter(|x| **x < n).for_each(|x| {
                b.insert(*x);
            });
            b
        })
        .collect::<Vec<_>>();
    let mut closure = direct.clone();
    fixpoint::iterate("call graph closure", limit, || {
        let mut changed = false;
        for f in 0..n {
            for callee in direct[f].iter() {
                if callee != f {
                    let reach = closure[callee].clone();
                    changed |= closure[f].union_with(&reach);
                }
            }
        }
        changed
    })?;
    Ok(closure.iter().map(|b| b.iter().collect()).collect())
}
