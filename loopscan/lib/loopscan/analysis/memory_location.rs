use crate::analysis::iterator::IteratorKind;
use crate::analysis::{Expander, Loop};
use crate::ir::{Evaluated, ExpandedExpr, Expr, Function, Opcode, Term, VarStateId};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AccessType {
    /// Affine in exactly one iterator.
    Affine1D,
    /// Affine in several iterators.
    AffineND,
    /// The same address in every iteration.
    Constant,
    /// The address has a model, but not an affine one.
    Complex,
    /// The address could not be expanded.
    Unknown,
}

/**
 * `start + Σ stride(i) · i` over the iterators `i` an address depends on, where `start` is
 * the address at the first iteration of every loop involved.
 **/
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExpandedSCEV {
    pub start: ExpandedExpr,
    pub strides: BTreeMap<VarStateId, ExpandedExpr>,
}

impl ExpandedSCEV {
    pub fn integer_strides(&self) -> Option<BTreeMap<VarStateId, i64>> {
        self.strides
            .iter()
            .map(|(vs, s)| match s.evaluate() {
                Some(Evaluated::Int(k)) => Some((*vs, k)),
                _ => None,
            })
            .collect()
    }
}

#[derive(Clone, Debug)]
pub struct MemoryLocation {
    /** The address in loop scope. */
    pub expr: Option<ExpandedExpr>,
    pub kind: AccessType,
    pub read_by: BTreeSet<usize>,
    pub write_from: BTreeSet<usize>,
    pub escev: Option<ExpandedSCEV>,
    pub base: Option<ExpandedExpr>,
}

/**
 * Every memory access of one loop body. Accesses with structurally equal addresses share a
 * location; locations are bucketed by array base in `array_accesses`.
 **/
#[derive(Clone, Debug, Default)]
pub struct MemoryAccesses {
    pub locations: Vec<MemoryLocation>,
    pub reads: BTreeSet<usize>,
    pub writes: BTreeSet<usize>,
    pub array_accesses: BTreeMap<ExpandedExpr, Vec<usize>>,
}

impl MemoryLocation {
    fn new(expr: Option<ExpandedExpr>) -> MemoryLocation {
        Self {
            expr,
            kind: AccessType::Unknown,
            read_by: BTreeSet::new(),
            write_from: BTreeSet::new(),
            escev: None,
            base: None,
        }
    }

    pub fn is_write(&self) -> bool {
        !self.write_from.is_empty()
    }

    /// The instruction the location is reported by.
    pub fn first_instruction(&self) -> Option<usize> {
        self.read_by.iter().chain(self.write_from.iter()).min().copied()
    }

    /// Whether the address moves with any of `iterators`.
    pub fn depends_on(&self, iterators: &BTreeSet<VarStateId>) -> bool {
        match (&self.escev, &self.expr) {
            (Some(s), _) => s.strides.keys().any(|vs| iterators.contains(vs)),
            (None, Some(e)) => e
                .leaf_terms()
                .iter()
                .any(|t| matches!(t, Term::Var(vs) if iterators.contains(vs))),
            (None, None) => false,
        }
    }
}

impl Display for MemoryLocation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.expr {
            Some(e) => write!(f, "[{}] {:?}", e, self.kind)?,
            None => write!(f, "[?] {:?}", self.kind)?,
        }
        write!(f, " read by {:?} written by {:?}", self.read_by, self.write_from)
    }
}

/**
 * Rewrites the iterator terms of `expr` into `start + Σ stride · i`. Iterators of nested
 * loops contribute their own start through their initial value, which may in turn refer to
 * iterators of enclosing loops.
 **/
pub fn expanded_scev(ex: &Expander, l: &Loop, expr: &ExpandedExpr) -> Option<ExpandedSCEV> {
    if !expr.is_sum() {
        return None;
    }
    let loops = ex.loops();
    let mut start = expr.clone();
    let mut strides: BTreeMap<VarStateId, ExpandedExpr> = BTreeMap::new();
    let mut budget = 4 * (loops.len() + 1);
    loop {
        let next = start.terms().find_map(|(t, _)| match t {
            Term::Var(vs) => loops
                .iterator_of(*vs)
                .filter(|(_, it)| it.kind != IteratorKind::Reduction)
                .map(|(owner, it)| (*vs, owner, it)),
            _ => None,
        });
        let (vs, owner, it) = match next {
            Some(x) => x,
            None => break,
        };
        if budget == 0 {
            return None;
        }
        budget -= 1;

        let c = start.remove_term(&Term::Var(vs))?;
        let context = if owner.index() == l.index() || owner.is_descendant_of(l.index()) {
            owner
        } else {
            l
        };
        let mut stride = ex.iter_value(&it.stride, Some(context))?;
        let mut init = ex.iter_value(&it.init, Some(context))?;
        stride.multiply(c);
        init.multiply(c);
        match strides.get_mut(&vs) {
            Some(s) => s.merge(&stride),
            None => {
                strides.insert(vs, stride);
            }
        }
        start.merge(&init);
        if !start.is_sum() || strides.values().any(|s| !s.is_sum()) {
            return None;
        }
    }
    strides.values_mut().for_each(|s| s.simplify());
    strides.retain(|_, s| !s.is_empty());
    start.simplify();
    Some(ExpandedSCEV { start, strides })
}

/// The invariant part of an address: everything except the constant offset.
pub fn array_base(escev: &ExpandedSCEV) -> ExpandedExpr {
    let mut base = escev.start.clone();
    base.remove_immediate();
    base
}

fn classify(escev: &Option<ExpandedSCEV>, expr: &Option<ExpandedExpr>) -> AccessType {
    match (escev, expr) {
        (_, None) => AccessType::Unknown,
        (None, Some(_)) => AccessType::Complex,
        (Some(s), Some(_)) => {
            if s.integer_strides().is_none() {
                return AccessType::Complex;
            }
            match s.strides.len() {
                0 => AccessType::Constant,
                1 => AccessType::Affine1D,
                _ => AccessType::AffineND,
            }
        }
    }
}

/**
 * Collects the memory operands of every instruction in the body of `l`. Address
 * computations (`lea`) are not accesses.
 **/
pub fn build(func: &Function, ex: &Expander, l: &Loop) -> MemoryAccesses {
    let ssa = ex.ssa();
    let arena = ex.arena();
    let mut acc = MemoryAccesses::default();
    let mut index_of: BTreeMap<ExpandedExpr, usize> = BTreeMap::new();

    let mut instrs = l
        .body
        .iter()
        .flat_map(|bb| func.basic_blocks[*bb].instructions.clone())
        .collect::<Vec<_>>();
    instrs.sort_unstable();

    for i in instrs {
        if func.instructions[i].opcode == Opcode::GetPointer {
            continue;
        }
        let accesses = ssa
            .inputs(i)
            .iter()
            .map(|s| (*s, false))
            .chain(ssa.outputs(i).iter().map(|s| (*s, true)));
        for (s, is_write) in accesses {
            let st = ssa.state(s);
            if !st.var.is_memory() {
                continue;
            }
            let addr = st.expr.and_then(|e| match arena.get(e) {
                Expr::Mem(a) => ex.expand_in_loop(*a, l),
                _ => None,
            });
            let idx = match addr.as_ref().and_then(|a| index_of.get(a)) {
                Some(x) => *x,
                None => {
                    let x = acc.locations.len();
                    if let Some(a) = &addr {
                        index_of.insert(a.clone(), x);
                    }
                    acc.locations.push(MemoryLocation::new(addr));
                    x
                }
            };
            let loc = &mut acc.locations[idx];
            if is_write {
                loc.write_from.insert(i);
                acc.writes.insert(idx);
            } else {
                loc.read_by.insert(i);
                acc.reads.insert(idx);
            }
        }
    }

    for (idx, loc) in acc.locations.iter_mut().enumerate() {
        loc.escev = loc.expr.as_ref().and_then(|e| expanded_scev(ex, l, e));
        loc.kind = classify(&loc.escev, &loc.expr);
        loc.base = match (&loc.escev, &loc.expr) {
            (Some(s), _) => Some(array_base(s)),
            (None, Some(e)) if e.is_sum() => {
                let mut b = e.clone();
                b.remove_immediate();
                Some(b)
            }
            _ => None,
        };
        if let Some(b) = &loc.base {
            acc.array_accesses.entry(b.clone()).or_default().push(idx);
        }
    }
    log::debug!(
        "loop {}: {} memory locations, {} bases",
        l.id,
        acc.locations.len(),
        acc.array_accesses.len()
    );
    acc
}
