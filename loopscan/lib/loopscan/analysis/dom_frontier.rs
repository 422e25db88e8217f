use crate::ir::DomTree;
use std::collections::{BTreeSet, HashMap, HashSet};

/**
 * Dominance frontiers of a (post-)dominator tree. For a post-dominator tree this yields the
 * post-dominance frontiers, since the tree carries the reversed edges it was built on.
 **/
#[derive(Clone, Debug)]
pub struct DomFrontier {
    pub(crate) frontiers: HashMap<usize, HashSet<usize>>,
}

impl DomFrontier {
    pub fn new(dom: &DomTree) -> DomFrontier {
        Self {
            frontiers: Self::analyze(dom),
        }
    }

    pub fn get_frontier(&self, bb_idx: usize) -> Option<&HashSet<usize>> {
        self.frontiers.get(&bb_idx)
    }

    /**
     * The iterated dominance frontier of `blocks`: the blocks that need a phi node for a
     * variable defined in every block of `blocks`.
     **/
    pub fn closure<I: IntoIterator<Item = usize>>(&self, blocks: I) -> BTreeSet<usize> {
        let mut result = BTreeSet::new();
        let mut work_list: Vec<usize> = blocks.into_iter().collect();
        let mut queued: HashSet<usize> = work_list.iter().copied().collect();
        while let Some(bb) = work_list.pop() {
            if let Some(df) = self.frontiers.get(&bb) {
                for y in df.iter() {
                    result.insert(*y);
                    if queued.insert(*y) {
                        work_list.push(*y);
                    }
                }
            }
        }
        result
    }

    fn analyze(dt: &DomTree) -> HashMap<usize, HashSet<usize>> {
        #[derive(Copy, Clone)]
        struct WorkItem {
            curr_bb: usize,
            parent_bb: Option<usize>,
        }

        impl WorkItem {
            fn new(curr_bb: usize, parent_bb: Option<usize>) -> Self {
                Self { curr_bb, parent_bb }
            }
        }

        let mut frontiers: HashMap<usize, HashSet<usize>> = HashMap::new();
        let root = match dt.root() {
            Some(r) => r,
            None => return frontiers,
        };
        let mut visited = HashSet::new();
        let mut work_list = vec![WorkItem::new(root, None)];

        while let Some(w) = work_list.last().cloned() {
            let (bb_idx, parent_bb_idx) = (w.curr_bb, w.parent_bb);
            if visited.insert(bb_idx) {
                // DFlocal: successors that are not immediately dominated by this block.
                let ds: HashSet<usize> = dt
                    .successors(bb_idx)
                    .iter()
                    .filter(|s| dt.immediate_dominator(**s) != Some(bb_idx))
                    .copied()
                    .collect();
                frontiers.entry(bb_idx).or_default().extend(ds);
            }

            let children = dt
                .get_node(bb_idx)
                .map(|n| {
                    n.children_iter()
                        .filter(|x| !visited.contains(*x))
                        .map(|child| WorkItem::new(*child, Some(bb_idx)))
                        .collect::<Vec<_>>()
                })
                .unwrap_or_default();

            // Once every child has been visited, fold DFup of this block into its parent.
            if children.is_empty() {
                if let Some(parent) = parent_bb_idx {
                    let up = frontiers
                        .get(&bb_idx)
                        .map(|c| {
                            c.iter()
                                .filter(|child| !dt.properly_dominates(parent, **child))
                                .copied()
                                .collect::<HashSet<usize>>()
                        })
                        .unwrap_or_default();
                    frontiers.entry(parent).or_default().extend(up);
                } else {
                    break;
                }
                work_list.pop();
            } else {
                work_list.extend(children);
            }
        }
        frontiers
    }
}

#[cfg(test)]
mod tests {
    use crate::analysis::dom_frontier::DomFrontier;
    use crate::ir::DomTree;
    use crate::tests::cfg::function_from_edges;
    use std::collections::{BTreeSet, HashMap, HashSet};

    #[test]
    fn test_dom_frontier() {
        // Test case from https://people.cs.pitt.edu/~jmisurda/teaching/cs1622/slides/cs2210-ssa.pdf
        let func = function_from_edges(
            7,
            &[(0, 1), (1, 2), (2, 3), (2, 6), (3, 4), (3, 5), (4, 5), (5, 2)],
            &[6],
        );
        let dom = DomTree::analyze(&func, 100).expect("dominance");
        let dt = DomFrontier::new(&dom);
        const EXPECTED: &[(usize, &[usize])] = &[
            (0, &[]),
            (1, &[]),
            (2, &[2]),
            (3, &[2]),
            (4, &[5]),
            (5, &[2]),
            (6, &[]),
        ];
        let expected = EXPECTED
            .iter()
            .map(|(bb_idx, frontiers)| (*bb_idx, frontiers.iter().copied().collect::<HashSet<usize>>()))
            .collect::<HashMap<usize, HashSet<usize>>>();
        assert_eq!(expected, dt.frontiers);

        // A definition in block 4 needs phis in 5 and then 2.
        assert_eq!(BTreeSet::from([2, 5]), dt.closure([4]));
        assert!(dt.closure([0]).is_empty());
    }

    #[test]
    fn test_post_dom_frontier() {
        // 0 -> {1, 2} -> 3: block 0 is the only control dependence of 1 and 2
        let func = function_from_edges(4, &[(0, 1), (0, 2), (1, 3), (2, 3)], &[3]);
        let pdom = DomTree::analyze_post(&func, 100).expect("post-dominance");
        let pdf = DomFrontier::new(&pdom);
        assert_eq!(Some(&HashSet::from([0])), pdf.get_frontier(1));
        assert_eq!(Some(&HashSet::from([0])), pdf.get_frontier(2));
        assert_eq!(Some(&HashSet::new()), pdf.get_frontier(3));
    }
}
