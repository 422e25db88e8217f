use crate::adt::interval::Interval;
use crate::analysis::memory_location::{ExpandedSCEV, MemoryAccesses, MemoryLocation};
use crate::ir::{Evaluated, ExpandedExpr, VarStateId};
use crate::support::safe_math::{exact_div, gcd};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AliasType {
    MustAlias,
    MustNotAlias,
    UnknownAlias,
}

impl AliasType {
    /// Combines the verdicts of the two orientations of a directed test.
    pub fn either(self, other: AliasType) -> AliasType {
        use AliasType::*;
        match (self, other) {
            (MustAlias, _) | (_, MustAlias) => MustAlias,
            (MustNotAlias, MustNotAlias) => MustNotAlias,
            _ => UnknownAlias,
        }
    }
}

/** The iterators of the loop under test and its trip count, if known. */
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IterationSpace {
    pub iterators: BTreeSet<VarStateId>,
    pub count: Option<i64>,
}

#[derive(Clone, Debug, Default)]
pub struct AliasResult {
    /** Write location to the locations it conflicts with across iterations. */
    pub dependences: BTreeMap<usize, BTreeSet<usize>>,
    pub undecided: BTreeSet<(usize, usize)>,
    /** Writes whose address does not move with the loop. */
    pub privatise: BTreeSet<usize>,
    /** Array bases that are written in the loop. */
    pub arrays_to_check: BTreeSet<ExpandedExpr>,
}

impl AliasResult {
    pub fn has_dependences(&self) -> bool {
        self.dependences.values().any(|x| !x.is_empty())
    }

    fn record(&mut self, w: usize, m: usize, r: AliasType) {
        match r {
            AliasType::MustAlias => {
                self.dependences.entry(w).or_default().insert(m);
            }
            AliasType::UnknownAlias => {
                self.undecided.insert((w, m));
            }
            AliasType::MustNotAlias => {}
        }
    }
}

/// `e1 - e2`, term by term and stride by stride.
pub fn range_diff(e1: &ExpandedSCEV, e2: &ExpandedSCEV) -> ExpandedSCEV {
    let mut start = e1.start.clone();
    start.subtract(&e2.start);
    start.simplify();
    let mut strides = e1.strides.clone();
    for (vs, s) in e2.strides.iter() {
        match strides.get_mut(vs) {
            Some(x) => x.subtract(s),
            None => {
                strides.insert(*vs, s.negated());
            }
        }
    }
    strides.values_mut().for_each(|s| s.simplify());
    strides.retain(|_, s| !s.is_empty());
    ExpandedSCEV { start, strides }
}

fn single_stride(e: &ExpandedSCEV) -> Option<(VarStateId, i64)> {
    let mut it = e.strides.iter();
    match (it.next(), it.next()) {
        (Some((vs, s)), None) => match s.evaluate() {
            Some(Evaluated::Int(k)) if k != 0 => Some((*vs, k)),
            _ => None,
        },
        _ => None,
    }
}

fn constant_distance(diff: &ExpandedSCEV) -> Option<i64> {
    match diff.start.evaluate() {
        Some(Evaluated::Int(d)) => Some(d),
        _ => None,
    }
}

/**
 * Lamport test for `e1 = a·i + c1` against `e2 = a·i + c2`, where `i` is an iterator of the
 * loop under test. The location `e1` touches in iteration `i` is touched by `e2` in
 * iteration `i + (c1 - c2) / a`; there is a dependence from `e1` to `e2` when that distance
 * is a whole number of iterations inside the iteration space.
 **/
pub fn lamport_test(e1: &ExpandedSCEV, e2: &ExpandedSCEV, diff: &ExpandedSCEV, space: &IterationSpace) -> AliasType {
    let (i1, a1) = match single_stride(e1) {
        Some(x) => x,
        None => return AliasType::UnknownAlias,
    };
    match single_stride(e2) {
        Some((i2, a2)) if i1 == i2 && a1 == a2 => {}
        _ => return AliasType::UnknownAlias,
    }
    if !space.iterators.contains(&i1) || !diff.strides.is_empty() {
        return AliasType::UnknownAlias;
    }
    let d = match constant_distance(diff) {
        Some(d) => d,
        None => return AliasType::UnknownAlias,
    };
    let distance = match exact_div(d, a1) {
        Some(x) => x,
        None => return AliasType::MustNotAlias,
    };
    if distance <= 0 {
        return AliasType::MustNotAlias;
    }
    match space.count {
        Some(n) if !Interval::iteration_distances(n).contains(distance) => AliasType::MustNotAlias,
        _ => AliasType::MustAlias,
    }
}

/**
 * GCD test: `Σ a_k·i_k - Σ b_k·j_k = c2 - c1` has an integer solution only if the gcd of
 * all strides divides the distance. When every stride belongs to the loop under test and
 * the trip count is known, distances beyond the range the strides can cover are ruled out
 * as well; for a single stride this is `|distance| / gcd >= count`.
 **/
pub fn gcd_test(e1: &ExpandedSCEV, e2: &ExpandedSCEV, diff: &ExpandedSCEV, space: &IterationSpace) -> AliasType {
    let (s1, s2) = match (e1.integer_strides(), e2.integer_strides()) {
        (Some(a), Some(b)) => (a, b),
        _ => return AliasType::UnknownAlias,
    };
    let d = match constant_distance(diff) {
        Some(d) => d,
        None => return AliasType::UnknownAlias,
    };
    let g = match s1.values().chain(s2.values()).try_fold(0, |g, x| gcd(g, *x)) {
        Some(g) => g,
        None => return AliasType::UnknownAlias,
    };
    if g == 0 {
        return if d == 0 {
            AliasType::MustAlias
        } else {
            AliasType::MustNotAlias
        };
    }
    if d == 0 {
        let same_iteration = s1 == s2 && s1.len() == 1 && s1.keys().all(|vs| space.iterators.contains(vs));
        return if same_iteration {
            AliasType::MustNotAlias
        } else {
            AliasType::MustAlias
        };
    }
    if d % g != 0 {
        return AliasType::MustNotAlias;
    }
    let local = s1.keys().chain(s2.keys()).all(|vs| space.iterators.contains(vs));
    if let (true, Some(n)) = (local, space.count) {
        let mut reach: i64 = 0;
        let keys = s1.keys().chain(s2.keys()).collect::<BTreeSet<_>>();
        for vs in keys {
            let a = s1.get(vs).copied().unwrap_or(0);
            let b = s2.get(vs).copied().unwrap_or(0);
            let span = if a.signum() * b.signum() > 0 {
                a.saturating_abs().max(b.saturating_abs())
            } else {
                a.saturating_abs().saturating_add(b.saturating_abs())
            };
            reach = reach.saturating_add(span.saturating_mul(n - 1));
        }
        if d.saturating_abs() > reach {
            return AliasType::MustNotAlias;
        }
    }
    AliasType::MustAlias
}

/// Not implemented: never decides a pair.
pub fn banerjee_test(_e1: &ExpandedSCEV, _e2: &ExpandedSCEV, _diff: &ExpandedSCEV, _space: &IterationSpace) -> AliasType {
    AliasType::UnknownAlias
}

/// Decides whether `m1` and `m2` may touch the same address in different iterations.
pub fn check_alias_relation(
    m1: &MemoryLocation,
    m2: &MemoryLocation,
    space: &IterationSpace,
    main_stride: Option<i64>,
) -> AliasType {
    if let (Some(e1), Some(e2)) = (&m1.escev, &m2.escev) {
        let forward = range_diff(e1, e2);
        let backward = range_diff(e2, e1);
        let r = lamport_test(e1, e2, &forward, space).either(lamport_test(e2, e1, &backward, space));
        if r != AliasType::UnknownAlias {
            return r;
        }
        let r = gcd_test(e1, e2, &forward, space);
        if r != AliasType::UnknownAlias {
            return r;
        }
        return banerjee_test(e1, e2, &forward, space);
    }

    let (a, b) = match (&m1.expr, &m2.expr) {
        (Some(a), Some(b)) => (a, b),
        _ => return AliasType::UnknownAlias,
    };
    let mut diff = a.clone();
    diff.subtract(b);
    diff.simplify();
    match diff.evaluate() {
        Some(Evaluated::Int(0)) => AliasType::MustNotAlias,
        Some(Evaluated::Int(d)) => match (main_stride, space.count) {
            (Some(s), Some(n)) if d.saturating_abs() >= s.saturating_mul(n).saturating_abs() => AliasType::MustNotAlias,
            (Some(_), Some(_)) => AliasType::MustAlias,
            _ => AliasType::UnknownAlias,
        },
        _ if diff.is_empty() => AliasType::MustNotAlias,
        _ => AliasType::UnknownAlias,
    }
}

/**
 * Pairs every write of the loop with every access to the same array base.
 *
 * A write whose address does not move with the loop conflicts with itself and is recorded
 * for privatisation. Locations without a usable address are undecided against every
 * write, including themselves.
 **/
pub fn alias_analysis(acc: &MemoryAccesses, space: &IterationSpace, main_stride: Option<i64>) -> AliasResult {
    let mut r = AliasResult::default();
    let unbucketed = (0..acc.locations.len())
        .filter(|x| acc.locations[*x].base.is_none())
        .collect::<Vec<_>>();

    for w in acc.writes.iter().copied() {
        let loc = &acc.locations[w];
        let base = match &loc.base {
            Some(b) => b,
            None => {
                for m in 0..acc.locations.len() {
                    r.record(w, m, AliasType::UnknownAlias);
                }
                continue;
            }
        };
        r.arrays_to_check.insert(base.clone());
        if !loc.depends_on(&space.iterators) {
            r.record(w, w, AliasType::MustAlias);
            r.privatise.insert(w);
            continue;
        }
        match &loc.escev {
            Some(s) if s.strides.len() == 1 => {}
            Some(_) => r.record(w, w, check_alias_relation(loc, loc, space, main_stride)),
            None => r.record(w, w, AliasType::UnknownAlias),
        }
        for m in acc.array_accesses.get(base).into_iter().flatten().copied() {
            if m != w {
                r.record(w, m, check_alias_relation(loc, &acc.locations[m], space, main_stride));
            }
        }
        for m in unbucketed.iter().copied() {
            r.record(w, m, AliasType::UnknownAlias);
        }
    }
    log::debug!(
        "{} dependences, {} undecided pairs, {} written bases",
        r.dependences.values().map(|x| x.len()).sum::<usize>(),
        r.undecided.len(),
        r.arrays_to_check.len()
    );
    r
}
