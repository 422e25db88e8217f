use crate::adt::bitvector::BitVector;
use crate::adt::fixpoint;
use crate::error::NonConvergence;
use crate::ir::Function;
use petgraph::prelude::DfsPostOrder;
use petgraph::visit::{GraphBase, IntoNeighbors, Visitable};
use smallvec::SmallVec;
use std::collections::HashSet;
use std::iter::Iterator;
use std::slice::Iter;

/**
 * Dominator (or post-dominator) tree computed with the iterative bit-vector formulation.
 * The post-dominator tree of a function with several terminations is rooted at a
 * synthetic exit node whose index is `basic_blocks.len()`.
 **/
#[derive(Clone, Debug)]
pub struct DomTree {
    root: Option<usize>,
    sets: Vec<BitVector>,
    nodes: Vec<DomNode>,
    /** Edges of the graph the tree was computed on (reversed for post-dominance). */
    succs: Vec<SmallVec<[usize; 4]>>,
    synthetic_exit: Option<usize>,
}

pub struct CFG<'a>(&'a Function);

#[derive(Clone, Debug, Default)]
pub struct DomNode {
    parent: Option<usize>,
    children: SmallVec<[usize; 4]>,
}

impl<'a> GraphBase for CFG<'a> {
    type EdgeId = usize;
    type NodeId = usize;
}

pub struct DomTreePostOrderIter<'b> {
    g: &'b DomTree,
    post_order: DfsPostOrder<usize, HashSet<usize>>,
}

impl Iterator for DomTreePostOrderIter<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<Self::Item> {
        self.post_order.next(self.g)
    }
}

impl GraphBase for DomTree {
    type EdgeId = usize;
    type NodeId = usize;
}

impl Visitable for DomTree {
    type Map = HashSet<usize>;

    fn visit_map(&self) -> Self::Map {
        Self::Map::new()
    }

    fn reset_map(&self, map: &mut Self::Map) {
        map.clear()
    }
}

pub struct NeighborIter<'a, T> {
    iter: std::slice::Iter<'a, T>,
}

impl<'a, T> Iterator for NeighborIter<'a, T>
where
    T: Copy,
{
    type Item = T;

    fn next(&mut self) -> Option<Self::Item> {
        self.iter.next().copied()
    }
}

impl<'b> IntoNeighbors for &'b DomTree {
    type Neighbors = NeighborIter<'b, usize>;

    fn neighbors(self, n: Self::NodeId) -> Self::Neighbors {
        NeighborIter {
            iter: self.nodes[n].children.iter(),
        }
    }
}

impl<'a, 'b> IntoNeighbors for &'b CFG<'a> {
    type Neighbors = NeighborIter<'a, usize>;

    fn neighbors(self, n: Self::NodeId) -> Self::Neighbors {
        NeighborIter {
            iter: self.0.basic_blocks[n].successors.iter(),
        }
    }
}

impl Visitable for CFG<'_> {
    type Map = HashSet<usize>;

    fn visit_map(&self) -> Self::Map {
        Self::Map::new()
    }

    fn reset_map(&self, map: &mut Self::Map) {
        map.clear()
    }
}

impl<'a> CFG<'a> {
    pub fn new(func: &'a Function) -> CFG<'a> {
        CFG(func)
    }

    pub fn func(&self) -> &'a Function {
        self.0
    }
}

impl DomTree {
    fn empty(n: usize) -> DomTree {
        DomTree {
            root: None,
            sets: vec![BitVector::new(n); n],
            nodes: vec![DomNode::default(); n],
            succs: vec![SmallVec::new(); n],
            synthetic_exit: None,
        }
    }

    pub fn analyze(func: &Function, limit: usize) -> Result<DomTree, NonConvergence> {
        let n = func.basic_blocks.len();
        if n <= 1 {
            return Ok(Self::empty(n));
        }
        let succs = func
            .basic_blocks
            .iter()
            .map(|bb| bb.successors.clone())
            .collect::<Vec<_>>();
        Self::compute(succs, 0, limit, None)
    }

    /**
     * Post-dominance over the reversed CFG. Several terminations are joined by a synthetic
     * exit node; a function without terminations gets an empty tree.
     **/
    pub fn analyze_post(func: &Function, limit: usize) -> Result<DomTree, NonConvergence> {
        let n = func.basic_blocks.len();
        if n <= 1 || func.terminations.is_empty() {
            return Ok(Self::empty(n));
        }
        let mut succs = func
            .basic_blocks
            .iter()
            .map(|bb| bb.predecessors.clone())
            .collect::<Vec<_>>();
        if func.terminations.len() == 1 {
            let exit = *func.terminations.iter().next().unwrap_or(&0);
            Self::compute(succs, exit, limit, None)
        } else {
            succs.push(func.terminations.iter().copied().collect());
            Self::compute(succs, n, limit, Some(n))
        }
    }

    fn compute(
        succs: Vec<SmallVec<[usize; 4]>>,
        entry: usize,
        limit: usize,
        synthetic_exit: Option<usize>,
    ) -> Result<DomTree, NonConvergence> {
        let n = succs.len();
        let mut preds: Vec<SmallVec<[usize; 4]>> = vec![SmallVec::new(); n];
        for (from, ss) in succs.iter().enumerate() {
            ss.iter().for_each(|to| preds[*to].push(from));
        }

        let mut reachable = BitVector::new(n);
        let mut stack = vec![entry];
        while let Some(x) = stack.pop() {
            if reachable.insert(x) {
                stack.extend(succs[x].iter().copied());
            }
        }

        let mut sets = (0..n)
            .map(|x| {
                if x == entry {
                    BitVector::singleton(n, entry)
                } else if reachable.contains(x) {
                    BitVector::full(n)
                } else {
                    BitVector::new(n)
                }
            })
            .collect::<Vec<_>>();

        fixpoint::iterate("dominance", limit, || {
            let mut changed = false;
            for x in (0..n).filter(|x| *x != entry && reachable.contains(*x)) {
                let mut s = BitVector::full(n);
                preds[x]
                    .iter()
                    .filter(|p| reachable.contains(**p))
                    .for_each(|p| {
                        s.intersect_with(&sets[*p]);
                    });
                s.insert(x);
                if s != sets[x] {
                    sets[x] = s;
                    changed = true;
                }
            }
            changed
        })?;

        let mut nodes = vec![DomNode::default(); n];
        for x in 0..n {
            let size = sets[x].count();
            let idom = sets[x]
                .iter()
                .find(|d| *d != x && sets[*d].count() + 1 == size);
            if let Some(p) = idom {
                nodes[x].parent = Some(p);
                nodes[p].children.push(x);
            }
        }

        Ok(DomTree {
            root: Some(entry),
            sets,
            nodes,
            succs,
            synthetic_exit,
        })
    }

    pub fn root(&self) -> Option<usize> {
        self.root
    }

    pub fn synthetic_exit(&self) -> Option<usize> {
        self.synthetic_exit
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /**
     * Return true if a dominates b. Unreachable blocks are dominated by nothing.
     **/
    pub fn dominates(&self, a: usize, b: usize) -> bool {
        self.sets.get(b).map_or(false, |s| s.contains(a))
    }

    /// properlyDominates - Returns true iff A dominates B and A != B.
    pub fn properly_dominates(&self, a: usize, b: usize) -> bool {
        a != b && self.dominates(a, b)
    }

    /// Empty for blocks the tree does not know about.
    pub fn dominators(&self, node: usize) -> impl Iterator<Item = usize> + '_ {
        self.sets.get(node).into_iter().flat_map(|s| s.iter())
    }

    pub fn immediate_dominator(&self, node: usize) -> Option<usize> {
        self.nodes.get(node).and_then(|n| n.parent)
    }

    pub fn post_order_iter(&self, node: usize) -> DomTreePostOrderIter {
        DomTreePostOrderIter {
            g: self,
            post_order: DfsPostOrder::new(self, node),
        }
    }

    pub fn is_reachable_from_entry(&self, node: usize) -> bool {
        self.root == Some(node) || self.immediate_dominator(node).is_some()
    }

    pub fn get_node(&self, node: usize) -> Option<&DomNode> {
        self.nodes.get(node)
    }

    pub fn successors(&self, node: usize) -> &[usize] {
        self.succs[node].as_slice()
    }
}

impl DomNode {
    pub fn parent(&self) -> Option<usize> {
        self.parent
    }

    pub fn children_iter(&self) -> Iter<'_, usize> {
        self.children.iter()
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::cfg::{diamond_with_loop, function_from_edges};

    #[test]
    fn test_dominance_soundness() {
        let func = diamond_with_loop();
        let dom = DomTree::analyze(&func, 100).expect("dominance");
        for bb in func.basic_blocks.iter() {
            assert!(dom.dominates(bb.id, bb.id));
            assert!(dom.dominates(0, bb.id));
            if let Some(idom) = dom.immediate_dominator(bb.id) {
                for p in bb.predecessors() {
                    if !dom.dominates(bb.id, *p) {
                        assert!(dom.dominates(idom, *p), "idom({}) = {}", bb.id, idom);
                    }
                }
            }
        }
        // 0 -> 1 -> {2, 3} -> 4 -> 1, 4 -> 5
        assert_eq!(Some(1), dom.immediate_dominator(4));
        assert_eq!(Some(4), dom.immediate_dominator(5));
        assert!(!dom.dominates(2, 4));
        assert_eq!(vec![0, 1, 4, 5], dom.dominators(5).collect::<Vec<_>>());
        let post_order = dom.post_order_iter(0).collect::<Vec<_>>();
        assert_eq!(Some(&0), post_order.last());
    }

    #[test]
    fn test_post_dominance() {
        let func = diamond_with_loop();
        let pdom = DomTree::analyze_post(&func, 100).expect("post-dominance");
        assert_eq!(None, pdom.synthetic_exit());
        assert_eq!(Some(5), pdom.root());
        assert_eq!(Some(4), pdom.immediate_dominator(2));
        assert_eq!(Some(4), pdom.immediate_dominator(1));
        assert!(pdom.dominates(5, 0));
    }

    #[test]
    fn test_synthetic_exit() {
        // 0 -> {1, 2}, both terminate
        let func = function_from_edges(3, &[(0, 1), (0, 2)], &[1, 2]);
        let pdom = DomTree::analyze_post(&func, 100).expect("post-dominance");
        assert_eq!(Some(3), pdom.synthetic_exit());
        assert_eq!(Some(3), pdom.immediate_dominator(1));
        assert_eq!(Some(3), pdom.immediate_dominator(0));
    }

    #[test]
    fn test_degenerate_functions() {
        let single = function_from_edges(1, &[], &[0]);
        assert!(DomTree::analyze(&single, 10).expect("dom").is_empty());
        let endless = function_from_edges(2, &[(0, 1), (1, 1)], &[]);
        assert!(DomTree::analyze_post(&endless, 10).expect("pdom").is_empty());
    }

    #[test]
    fn test_unreachable_block() {
        // block 2 is unreachable but jumps into 1
        let func = function_from_edges(3, &[(0, 1), (2, 1)], &[1]);
        let dom = DomTree::analyze(&func, 100).expect("dominance");
        assert_eq!(Some(0), dom.immediate_dominator(1));
        assert!(!dom.is_reachable_from_entry(2));
        assert_eq!(0, dom.dominators(2).count());
        assert_eq!(vec![0, 1], dom.dominators(1).collect::<Vec<_>>());
    }

    #[test]
    fn test_out_of_range_queries() {
        let func = diamond_with_loop();
        let dom = DomTree::analyze(&func, 100).expect("dominance");
        let n = func.basic_blocks.len();
        assert_eq!(0, dom.dominators(n).count());
        assert_eq!(0, dom.dominators(99).count());
        assert!(!dom.dominates(0, 99));
        assert_eq!(None, dom.immediate_dominator(99));

        let single = function_from_edges(1, &[], &[0]);
        let empty = DomTree::analyze(&single, 10).expect("dom");
        assert_eq!(0, empty.dominators(0).count());
    }
}
