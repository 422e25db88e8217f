use crate::analysis::iterator::{IterValue, LoopIterator};
use crate::analysis::{Expander, Loop};
use crate::ir::{BinaryOp, Evaluated, ExpandedExpr, Expr, ExprId, UnaryOp, VarKind, VarStateId};
use crate::support::safe_math::shl_factor;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CyclicStatus {
    /// The walk came back to the phi; `sum` is what one iteration adds to it.
    Cyclic,
    /// The value does not depend on the phi; `sum` is the value.
    Const,
    /// Both incoming values are the phi itself.
    ConstPhi,
    /// The value depends on a phi that is not decided yet.
    UndecidedPhi,
    Error,
}

/** The cyclic expression of a header phi: one status and the accumulated side terms. */
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CyclicExpr {
    pub status: CyclicStatus,
    pub sum: ExpandedExpr,
}

impl CyclicExpr {
    fn of(status: CyclicStatus) -> CyclicExpr {
        Self {
            status,
            sum: ExpandedExpr::sum(),
        }
    }

    fn constant(sum: ExpandedExpr) -> CyclicExpr {
        Self {
            status: CyclicStatus::Const,
            sum,
        }
    }

    fn error() -> CyclicExpr {
        Self::of(CyclicStatus::Error)
    }

    fn negated(self) -> CyclicExpr {
        match self.status {
            CyclicStatus::Const => Self::constant(self.sum.negated()),
            CyclicStatus::Cyclic => Self::error(),
            _ => self,
        }
    }

    /// The sum of two walks. At most one side may carry the phi.
    fn add(self, other: CyclicExpr) -> CyclicExpr {
        use CyclicStatus::*;
        match (self.status, other.status) {
            (Error, _) | (_, Error) | (ConstPhi, _) | (_, ConstPhi) => Self::error(),
            (UndecidedPhi, _) | (_, UndecidedPhi) => Self::of(UndecidedPhi),
            (Cyclic, Cyclic) => Self::error(),
            (s, _) => {
                let mut sum = self.sum;
                sum.merge(&other.sum);
                let status = if s == Cyclic || other.status == Cyclic {
                    Cyclic
                } else {
                    Const
                };
                Self { status, sum }
            }
        }
    }
}

/// Header phis of one loop, sorted by what pass 1 could prove about them.
#[derive(Clone, Debug, Default)]
pub struct PhiClassification {
    pub iterators: BTreeMap<VarStateId, LoopIterator>,
    pub undecided: BTreeSet<VarStateId>,
    pub const_phis: BTreeSet<VarStateId>,
}

struct CyclicWalker<'a, 'b> {
    ex: &'b Expander<'a>,
    l: &'b Loop,
    target: VarStateId,
    // None while the phi is still being walked
    memo: BTreeMap<VarStateId, Option<CyclicExpr>>,
}

impl<'a, 'b> CyclicWalker<'a, 'b> {
    fn state(&mut self, vs: VarStateId) -> CyclicExpr {
        match self.ex.ssa().state(vs).expr {
            Some(e) => self.owned(vs, e),
            None => CyclicExpr::error(),
        }
    }

    fn owned(&mut self, vs: VarStateId, e: ExprId) -> CyclicExpr {
        if let Expr::Integer(v) = self.ex.arena().get(e) {
            return CyclicExpr::constant(ExpandedExpr::integer(*v));
        }
        if vs == self.target {
            return CyclicExpr::of(CyclicStatus::Cyclic);
        }
        let ssa = self.ex.ssa();
        if self.l.is_constant(ssa, vs) {
            return CyclicExpr::constant(ExpandedExpr::var(vs));
        }
        if ssa.state(vs).is_phi {
            return self.phi(vs);
        }
        self.expr(e)
    }

    /// Every use of an in-body phi contributes the same walk, so a phi read twice is
    /// counted twice. A phi reached again through itself is not a recurrence we model.
    fn phi(&mut self, vs: VarStateId) -> CyclicExpr {
        match self.memo.get(&vs) {
            Some(Some(done)) => return done.clone(),
            Some(None) => return CyclicExpr::error(),
            None => {}
        }
        self.memo.insert(vs, None);
        let r = self.walk_phi(vs);
        self.memo.insert(vs, Some(r.clone()));
        r
    }

    fn walk_phi(&mut self, vs: VarStateId) -> CyclicExpr {
        let loops = self.ex.loops();
        if let Some((owner, it)) = loops.iterator_of(vs) {
            if owner.index() == self.l.index() {
                return CyclicExpr::error();
            }
            if owner.is_descendant_of(self.l.index()) {
                // an inner loop leaves its iterator at the final value
                return match it.final_value.as_ref().filter(|_| it.main) {
                    Some(fv) => match self.ex.iter_value(fv, Some(self.l)) {
                        Some(x) => CyclicExpr::constant(x),
                        None => CyclicExpr::of(CyclicStatus::UndecidedPhi),
                    },
                    None => CyclicExpr::of(CyclicStatus::UndecidedPhi),
                };
            }
            if owner.is_ancestor_of(self.l.index()) {
                return CyclicExpr::constant(ExpandedExpr::var(vs));
            }
            return CyclicExpr::of(CyclicStatus::UndecidedPhi);
        }
        let s = self.ex.ssa().state(vs);
        if s.block == self.l.start {
            return CyclicExpr::error();
        }
        if s.pred.len() < 2 {
            log::warn!(
                "phi v{} in block {} has {} operands",
                vs.index(),
                s.block,
                s.pred.len()
            );
            return CyclicExpr::error();
        }
        let inner = loops
            .loop_for(s.block)
            .filter(|x| x.index() != self.l.index() && x.start == s.block);
        if inner.is_some() {
            // header of a nested loop without a modelled iterator
            return CyclicExpr::of(CyclicStatus::UndecidedPhi);
        }
        let results = s.pred.clone().into_iter().map(|p| self.state(p)).collect::<Vec<_>>();
        join(results)
    }

    fn expr(&mut self, e: ExprId) -> CyclicExpr {
        match self.ex.arena().get(e) {
            Expr::Integer(v) => CyclicExpr::constant(ExpandedExpr::integer(*v)),
            Expr::Expanded(x) => CyclicExpr::constant(x.clone()),
            Expr::Unary { op, e } => {
                let x = self.child(*e);
                match op {
                    UnaryOp::Mov => x,
                    UnaryOp::Neg => x.negated(),
                }
            }
            Expr::Binary { op, e1, e2 } => {
                let a = self.child(*e1);
                let b = self.child(*e2);
                match op {
                    BinaryOp::Add => a.add(b),
                    BinaryOp::Sub => a.add(b.negated()),
                    BinaryOp::Mul => scale(a, b, Some, true),
                    BinaryOp::Shl => scale(a, b, shl_factor, false),
                    BinaryOp::Div | BinaryOp::Lsr | BinaryOp::Asr => CyclicExpr::error(),
                }
            }
            Expr::None | Expr::Var(_) | Expr::Mem(_) | Expr::Phi { .. } | Expr::AddRec { .. } => {
                CyclicExpr::error()
            }
        }
    }

    fn child(&mut self, e: ExprId) -> CyclicExpr {
        match self.ex.arena().owner(e) {
            Some(vs) => self.owned(vs, e),
            None => self.expr(e),
        }
    }
}

/// `a * f(b)` where neither side may carry the phi. Only a true product may keep a
/// symbolic factor.
fn scale<F>(a: CyclicExpr, b: CyclicExpr, factor: F, symbolic: bool) -> CyclicExpr
where
    F: Fn(i64) -> Option<i64>,
{
    use CyclicStatus::*;
    match (a.status, b.status) {
        (Const, Const) => match b.sum.evaluate() {
            Some(Evaluated::Int(k)) => match factor(k) {
                Some(k) => {
                    let mut sum = a.sum;
                    sum.multiply(k);
                    CyclicExpr::constant(sum)
                }
                None => CyclicExpr::error(),
            },
            _ if symbolic => CyclicExpr::constant(ExpandedExpr::product(&a.sum, &b.sum)),
            _ => CyclicExpr::error(),
        },
        (UndecidedPhi, _) | (_, UndecidedPhi) => CyclicExpr::of(UndecidedPhi),
        _ => CyclicExpr::error(),
    }
}

/// Joins the walks of the incoming values of an in-body phi.
fn join(results: Vec<CyclicExpr>) -> CyclicExpr {
    use CyclicStatus::*;
    if results.iter().any(|r| r.status == Error) {
        return CyclicExpr::error();
    }
    if results.iter().any(|r| r.status == UndecidedPhi) {
        return CyclicExpr::of(UndecidedPhi);
    }
    let mut it = results.into_iter();
    let first = match it.next() {
        Some(x) => x,
        None => return CyclicExpr::error(),
    };
    it.try_fold(first, |acc, r| match (acc.status, r.status) {
        (Cyclic, Cyclic) if acc.sum == r.sum => Some(acc),
        (Const, Const) => Some(CyclicExpr::constant(ExpandedExpr::phi(acc.sum, r.sum))),
        _ => None,
    })
    .unwrap_or_else(CyclicExpr::error)
}

/// What the cyclic walk proved about one header phi.
#[derive(Clone, Debug)]
pub enum PhiClass {
    Iterator(LoopIterator),
    ConstPhi,
    Undecided,
}

/**
 * Builds the cyclic expression of the header phi `phi` of `l`. A phi that adds the same
 * invariant amount in every iteration is an iterator candidate.
 **/
pub fn classify_phi(ex: &Expander, l: &Loop, phi: VarStateId) -> PhiClass {
    let ssa = ex.ssa();
    let s = ssa.state(phi);
    let (inside, outside): (Vec<VarStateId>, Vec<VarStateId>) = s.pred.iter().copied().partition(|p| {
        let ps = ssa.state(*p);
        !ps.is_input() && l.contains(ps.block)
    });
    let init = match outside.as_slice() {
        [x] if !inside.is_empty() => *x,
        _ => {
            if s.pred.len() < 2 {
                log::warn!("header phi v{} has {} operands", phi.index(), s.pred.len());
            }
            return PhiClass::Undecided;
        }
    };

    let mut w = CyclicWalker {
        ex,
        l,
        target: phi,
        memo: BTreeMap::new(),
    };
    let walks = inside.iter().map(|p| w.state(*p)).collect::<Vec<_>>();
    let c = join(walks);
    let status = match c.status {
        CyclicStatus::Cyclic if c.sum.is_empty() => CyclicStatus::ConstPhi,
        other => other,
    };
    match status {
        CyclicStatus::ConstPhi => PhiClass::ConstPhi,
        CyclicStatus::Cyclic if c.sum.is_sum() => {
            let init_value = match ex.state_in_function(init, Some(l)) {
                Some(x) => IterValue::from_expanded(x),
                None => match ssa.state(init).expr {
                    Some(e) => IterValue::Expr(e),
                    None => return PhiClass::Undecided,
                },
            };
            let stride = IterValue::from_expanded(c.sum);
            PhiClass::Iterator(LoopIterator::new(phi, s.var, l.index(), init_value, stride))
        }
        _ => PhiClass::Undecided,
    }
}

/**
 * Classifies every header phi of `l` except flags. Loops entered from more than one block
 * are not analysed; all of their phis stay undecided.
 **/
pub fn classify_phis(ex: &Expander, l: &Loop) -> PhiClassification {
    let mut r = PhiClassification::default();
    let ssa = ex.ssa();
    let phis = ssa
        .phi_nodes(l.start)
        .filter(|p| !matches!(ssa.state(*p).var.kind, VarKind::ControlFlag(_)))
        .collect::<Vec<_>>();
    if l.init.len() > 1 {
        r.undecided.extend(phis);
        return r;
    }
    for phi in phis {
        match classify_phi(ex, l, phi) {
            PhiClass::Iterator(it) => {
                log::debug!("loop {}: iterator {}", l.id, it);
                r.iterators.insert(phi, it);
            }
            PhiClass::ConstPhi => {
                r.const_phis.insert(phi);
            }
            PhiClass::Undecided => {
                r.undecided.insert(phi);
            }
        }
    }
    r
}
