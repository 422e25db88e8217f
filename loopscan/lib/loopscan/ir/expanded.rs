use crate::ir::{ExprId, VarStateId};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

/**
 * A leaf of an expanded expression. `One` is the synthetic term that carries the folded
 * integer part of a sum.
 **/
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Term {
    One,
    Var(VarStateId),
    Mem(ExprId),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ExpandedKind {
    /// `Σ coefficient · term`
    Sum,
    /// One of several sums, depending on the path taken.
    Phi,
    /// `coefficient(One) · Π term^coefficient`
    Mul,
    /// Only the set of terms the value depends on is known.
    Sensi,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Evaluated {
    Int(i64),
    Var(Term),
}

/**
 * Canonical form of a scalar expression: a map from leaf terms to integer coefficients.
 **/
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ExpandedExpr {
    kind: ExpandedKind,
    terms: BTreeMap<Term, i64>,
    options: Vec<ExpandedExpr>,
}

const MAX_PHI_OPTIONS: usize = 8;

impl Default for ExpandedExpr {
    fn default() -> Self {
        Self::sum()
    }
}

impl ExpandedExpr {
    pub fn sum() -> ExpandedExpr {
        Self {
            kind: ExpandedKind::Sum,
            terms: BTreeMap::new(),
            options: vec![],
        }
    }

    pub fn integer(v: i64) -> ExpandedExpr {
        Self::term(Term::One, v)
    }

    pub fn term(t: Term, coeff: i64) -> ExpandedExpr {
        let mut r = Self::sum();
        r.add_term(t, coeff);
        r
    }

    pub fn var(vs: VarStateId) -> ExpandedExpr {
        Self::term(Term::Var(vs), 1)
    }

    pub fn sensitivity<I: IntoIterator<Item = Term>>(terms: I) -> ExpandedExpr {
        Self {
            kind: ExpandedKind::Sensi,
            terms: terms
                .into_iter()
                .filter(|t| *t != Term::One)
                .map(|t| (t, 1))
                .collect(),
            options: vec![],
        }
    }

    /// Either `a` or `b`, depending on the incoming edge.
    pub fn phi(a: ExpandedExpr, b: ExpandedExpr) -> ExpandedExpr {
        if a == b {
            return a;
        }
        if a.kind == ExpandedKind::Sensi || b.kind == ExpandedKind::Sensi {
            return Self::sensitivity(a.leaf_terms().into_iter().chain(b.leaf_terms()));
        }
        let mut options = vec![];
        for x in [a, b] {
            if x.kind == ExpandedKind::Phi {
                options.extend(x.options);
            } else {
                options.push(x);
            }
        }
        let mut r = Self {
            kind: ExpandedKind::Phi,
            terms: BTreeMap::new(),
            options,
        };
        r.simplify();
        r
    }

    /// The product of two single-term sums; anything wider only keeps its sensitivity list.
    pub fn product(a: &ExpandedExpr, b: &ExpandedExpr) -> ExpandedExpr {
        if let Some(Evaluated::Int(k)) = a.evaluate() {
            let mut r = b.clone();
            r.multiply(k);
            return r;
        }
        if let Some(Evaluated::Int(k)) = b.evaluate() {
            let mut r = a.clone();
            r.multiply(k);
            return r;
        }
        match (a.single_term(), b.single_term()) {
            (Some((ta, ca)), Some((tb, cb))) => {
                let ca = match ca.checked_mul(cb) {
                    Some(c) => c,
                    None => return Self::sensitivity([ta, tb]),
                };
                let mut terms = BTreeMap::new();
                terms.insert(Term::One, ca);
                *terms.entry(ta).or_insert(0) += 1;
                *terms.entry(tb).or_insert(0) += 1;
                Self {
                    kind: ExpandedKind::Mul,
                    terms,
                    options: vec![],
                }
            }
            _ => Self::sensitivity(a.leaf_terms().into_iter().chain(b.leaf_terms())),
        }
    }

    fn single_term(&self) -> Option<(Term, i64)> {
        if self.kind != ExpandedKind::Sum || self.terms.len() != 1 {
            return None;
        }
        self.terms
            .iter()
            .next()
            .filter(|(t, _)| **t != Term::One)
            .map(|(t, c)| (*t, *c))
    }

    pub fn kind(&self) -> ExpandedKind {
        self.kind
    }

    pub fn terms(&self) -> impl Iterator<Item = (&Term, &i64)> + '_ {
        self.terms.iter()
    }

    pub fn options(&self) -> &[ExpandedExpr] {
        self.options.as_slice()
    }

    pub fn coefficient(&self, t: &Term) -> Option<i64> {
        self.terms.get(t).copied()
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kind == ExpandedKind::Sum && self.terms.is_empty()
    }

    pub fn is_sum(&self) -> bool {
        self.kind == ExpandedKind::Sum
    }

    /// Every term the value depends on, including those inside phi options.
    pub fn leaf_terms(&self) -> Vec<Term> {
        let mut r: Vec<Term> = self
            .terms
            .keys()
            .filter(|t| **t != Term::One)
            .copied()
            .collect();
        for o in self.options.iter() {
            r.extend(o.leaf_terms());
        }
        r.sort();
        r.dedup();
        r
    }

    pub fn add_term(&mut self, t: Term, coeff: i64) {
        match self.kind {
            ExpandedKind::Sum => {
                let c = self.terms.get(&t).copied().unwrap_or(0);
                match c.checked_add(coeff) {
                    Some(c) => {
                        self.terms.insert(t, c);
                    }
                    None => self.overflowed(Some(t)),
                }
            }
            ExpandedKind::Phi => {
                self.options.iter_mut().for_each(|o| o.add_term(t, coeff));
                self.simplify();
            }
            ExpandedKind::Mul => {
                let mut keys = self.leaf_terms();
                keys.push(t);
                *self = Self::sensitivity(keys);
            }
            ExpandedKind::Sensi => {
                if t != Term::One {
                    self.terms.insert(t, 1);
                }
            }
        }
    }

    /// Adds `other` to `self`.
    pub fn merge(&mut self, other: &ExpandedExpr) {
        use ExpandedKind::*;
        match (self.kind, other.kind) {
            (Sum, Sum) => other.terms.iter().for_each(|(t, c)| self.add_term(*t, *c)),
            (Sum, Phi) => {
                let base = std::mem::take(self);
                let mut options = other.options.clone();
                options.iter_mut().for_each(|o| o.merge(&base));
                *self = Self {
                    kind: Phi,
                    terms: BTreeMap::new(),
                    options,
                };
            }
            (Phi, Sum) => self.options.iter_mut().for_each(|o| o.merge(other)),
            (Phi, Phi) if self.options.len() * other.options.len() <= MAX_PHI_OPTIONS => {
                let mut options = vec![];
                for a in self.options.iter() {
                    for b in other.options.iter() {
                        let mut x = a.clone();
                        x.merge(b);
                        options.push(x);
                    }
                }
                self.options = options;
            }
            (Sum, Mul) if self.is_empty() => *self = other.clone(),
            (Mul, Sum) if other.is_empty() => {}
            (Mul, Mul) if self.same_factors(other) => match self.immediate().checked_add(other.immediate()) {
                Some(c) => {
                    self.terms.insert(Term::One, c);
                }
                None => self.overflowed(None),
            },
            (Sensi, _) | (_, Sensi) => {
                let keys = self.leaf_terms().into_iter().chain(other.leaf_terms());
                *self = Self::sensitivity(keys);
            }
            _ => {
                log::warn!("incompatible merge of {:?} into {:?}", other.kind, self.kind);
                let keys = self.leaf_terms().into_iter().chain(other.leaf_terms());
                *self = Self::sensitivity(keys);
            }
        }
        self.simplify();
    }

    fn same_factors(&self, other: &ExpandedExpr) -> bool {
        let factors = |x: &ExpandedExpr| {
            x.terms
                .iter()
                .filter(|(t, _)| **t != Term::One)
                .map(|(t, c)| (*t, *c))
                .collect::<Vec<_>>()
        };
        factors(self) == factors(other)
    }

    pub fn negated(&self) -> ExpandedExpr {
        let mut r = self.clone();
        r.multiply(-1);
        r
    }

    /// `self -= other`. The difference of an expression with itself is the empty sum even
    /// when the expression is path dependent.
    pub fn subtract(&mut self, other: &ExpandedExpr) {
        if self == other {
            *self = Self::sum();
            return;
        }
        self.merge(&other.negated());
    }

    pub fn multiply(&mut self, k: i64) {
        if k == 0 && self.kind != ExpandedKind::Sensi {
            *self = Self::sum();
            return;
        }
        match self.kind {
            ExpandedKind::Sum => {
                let scaled = self
                    .terms
                    .iter()
                    .map(|(t, c)| c.checked_mul(k).map(|c| (*t, c)))
                    .collect::<Option<BTreeMap<_, _>>>();
                match scaled {
                    Some(terms) => self.terms = terms,
                    None => self.overflowed(None),
                }
            }
            ExpandedKind::Phi => {
                self.options.iter_mut().for_each(|o| o.multiply(k));
                self.simplify();
            }
            ExpandedKind::Mul => match self.terms.get(&Term::One).copied().unwrap_or(1).checked_mul(k) {
                Some(c) => {
                    self.terms.insert(Term::One, c);
                }
                None => self.overflowed(None),
            },
            ExpandedKind::Sensi => {}
        }
    }

    /// A coefficient left the i64 range: the value is unknown, only its dependences survive.
    fn overflowed(&mut self, extra: Option<Term>) {
        log::debug!("coefficient overflow in {}", self);
        let keys = self.leaf_terms().into_iter().chain(extra);
        *self = Self::sensitivity(keys);
    }

    pub fn immediate(&self) -> i64 {
        self.terms.get(&Term::One).copied().unwrap_or(0)
    }

    pub fn remove_immediate(&mut self) {
        if self.kind == ExpandedKind::Sum {
            self.terms.remove(&Term::One);
        }
    }

    pub fn remove_term(&mut self, t: &Term) -> Option<i64> {
        if self.kind == ExpandedKind::Sum {
            self.terms.remove(t)
        } else {
            None
        }
    }

    /// Replaces `t` in a sum with `with`, scaled by the coefficient of `t`.
    pub fn substitute(&mut self, t: &Term, with: &ExpandedExpr) {
        if let Some(c) = self.remove_term(t) {
            let mut w = with.clone();
            w.multiply(c);
            self.merge(&w);
        }
    }

    pub fn evaluate(&self) -> Option<Evaluated> {
        if self.kind != ExpandedKind::Sum {
            return None;
        }
        let mut it = self.terms.iter().filter(|(_, c)| **c != 0);
        match (it.next(), it.next()) {
            (None, _) => Some(Evaluated::Int(0)),
            (Some((Term::One, c)), None) => Some(Evaluated::Int(*c)),
            (Some((t, 1)), None) => Some(Evaluated::Var(*t)),
            _ => None,
        }
    }

    pub fn simplify(&mut self) {
        match self.kind {
            ExpandedKind::Sum => self.terms.retain(|_, c| *c != 0),
            ExpandedKind::Phi => {
                self.options.iter_mut().for_each(|o| o.simplify());
                if self.options.iter().any(|o| o.kind == ExpandedKind::Sensi) {
                    *self = Self::sensitivity(self.leaf_terms());
                    return;
                }
                self.options.sort();
                self.options.dedup();
                if self.options.len() == 1 {
                    if let Some(x) = self.options.pop() {
                        *self = x;
                    }
                } else if self.options.is_empty() {
                    *self = Self::sum();
                }
            }
            ExpandedKind::Mul => {
                if self.immediate() == 0 {
                    *self = Self::sum();
                } else {
                    self.terms.retain(|t, c| *t == Term::One || *c != 0);
                }
            }
            ExpandedKind::Sensi => {}
        }
    }
}

impl Display for Term {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Term::One => f.pad("1"),
            Term::Var(vs) => write!(f, "v{}", vs.0),
            Term::Mem(e) => write!(f, "mem{}", e.0),
        }
    }
}

impl Display for ExpandedExpr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let sum = |f: &mut Formatter<'_>, x: &ExpandedExpr, sep: &str| -> std::fmt::Result {
            if x.terms.is_empty() {
                return write!(f, "0");
            }
            for (i, (t, c)) in x.terms.iter().enumerate() {
                if i > 0 {
                    write!(f, "{}", sep)?;
                }
                match t {
                    Term::One => write!(f, "{}", c)?,
                    _ => write!(f, "{}*{}", c, t)?,
                }
            }
            Ok(())
        };
        match self.kind {
            ExpandedKind::Sum => sum(f, self, " + "),
            ExpandedKind::Mul => sum(f, self, " x "),
            ExpandedKind::Sensi => {
                write!(f, "sensi(")?;
                sum(f, self, ", ")?;
                write!(f, ")")
            }
            ExpandedKind::Phi => {
                write!(f, "phi(")?;
                for (i, o) in self.options.iter().enumerate() {
                    if i > 0 {
                        write!(f, " | ")?;
                    }
                    write!(f, "{}", o)?;
                }
                write!(f, ")")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(x: u32) -> Term {
        Term::Var(VarStateId(x))
    }

    fn sample() -> Vec<ExpandedExpr> {
        let mut a = ExpandedExpr::term(v(1), 4);
        a.add_term(Term::One, 8);
        a.add_term(v(2), 0);
        let phi = ExpandedExpr::phi(a.clone(), ExpandedExpr::term(v(3), -1));
        let mul = ExpandedExpr::product(&ExpandedExpr::var(VarStateId(1)), &ExpandedExpr::var(VarStateId(2)));
        let sensi = ExpandedExpr::sensitivity([v(4), Term::One]);
        vec![a, phi, mul, sensi, ExpandedExpr::sum()]
    }

    #[test]
    fn test_integer_folding() {
        let mut e = ExpandedExpr::integer(3);
        e.merge(&ExpandedExpr::integer(4));
        assert_eq!(Some(Evaluated::Int(7)), e.evaluate());
        e.add_term(v(1), 1);
        e.add_term(Term::One, -7);
        e.simplify();
        assert_eq!(Some(Evaluated::Var(v(1))), e.evaluate());
    }

    #[test]
    fn test_simplify_idempotent() {
        for mut e in sample() {
            e.simplify();
            let once = e.clone();
            e.simplify();
            assert_eq!(once, e);
        }
    }

    #[test]
    fn test_self_difference_is_empty() {
        for e in sample() {
            let mut d = e.clone();
            d.subtract(&e);
            d.simplify();
            assert!(d.is_empty(), "{} - itself = {}", e, d);
        }
        let mut a = ExpandedExpr::term(v(1), 4);
        a.add_term(Term::One, 4);
        let mut b = a.clone();
        b.merge(&ExpandedExpr::sum());
        a.subtract(&b);
        assert!(a.is_empty());
    }

    #[test]
    fn test_phi_distribution() {
        let mut s = ExpandedExpr::integer(1);
        let p = ExpandedExpr::phi(ExpandedExpr::var(VarStateId(1)), ExpandedExpr::integer(2));
        s.merge(&p);
        assert_eq!(ExpandedKind::Phi, s.kind());
        assert_eq!(2, s.options().len());
        assert!(s.options().contains(&ExpandedExpr::integer(3)));

        let same = ExpandedExpr::phi(ExpandedExpr::integer(5), ExpandedExpr::integer(5));
        assert_eq!(ExpandedExpr::integer(5), same);
    }

    #[test]
    fn test_incompatible_merge_keeps_sensitivity() {
        let mut m = ExpandedExpr::product(&ExpandedExpr::var(VarStateId(1)), &ExpandedExpr::var(VarStateId(2)));
        m.merge(&ExpandedExpr::var(VarStateId(3)));
        assert_eq!(ExpandedKind::Sensi, m.kind());
        assert_eq!(vec![v(1), v(2), v(3)], m.leaf_terms());
        assert_eq!(None, m.evaluate());
    }

    #[test]
    fn test_substitute() {
        let mut e = ExpandedExpr::term(v(1), 4);
        e.add_term(v(2), 1);
        let mut init = ExpandedExpr::var(VarStateId(7));
        init.add_term(Term::One, 2);
        e.substitute(&v(1), &init);
        assert_eq!(Some(4), e.coefficient(&v(7)));
        assert_eq!(8, e.immediate());
        assert_eq!(None, e.coefficient(&v(1)));
    }

    #[test]
    fn test_coefficient_overflow_is_sensitivity() {
        let mut e = ExpandedExpr::term(v(1), i64::MAX);
        e.add_term(Term::One, 3);
        e.multiply(2);
        assert_eq!(ExpandedKind::Sensi, e.kind());
        assert_eq!(vec![v(1)], e.leaf_terms());
        assert_eq!(None, e.evaluate());

        let m = ExpandedExpr::integer(i64::MIN).negated();
        assert_eq!(ExpandedKind::Sensi, m.kind());
        assert!(!m.is_empty());

        let mut a = ExpandedExpr::term(v(2), i64::MAX);
        a.add_term(v(2), 1);
        assert_eq!(ExpandedKind::Sensi, a.kind());
        assert_eq!(vec![v(2)], a.leaf_terms());

        let mut b = ExpandedExpr::integer(1);
        b.subtract(&ExpandedExpr::integer(i64::MIN));
        assert!(!b.is_sum());

        let mut p = ExpandedExpr::phi(ExpandedExpr::term(v(5), i64::MAX), ExpandedExpr::integer(1));
        p.multiply(4);
        assert_eq!(ExpandedKind::Sensi, p.kind());
        assert_eq!(vec![v(5)], p.leaf_terms());

        let wide = ExpandedExpr::term(v(3), 1 << 40);
        let p = ExpandedExpr::product(&wide, &ExpandedExpr::term(v(4), 1 << 40));
        assert_eq!(ExpandedKind::Sensi, p.kind());
        assert_eq!(vec![v(3), v(4)], p.leaf_terms());
    }
}
