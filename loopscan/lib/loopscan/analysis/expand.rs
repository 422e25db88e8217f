use crate::analysis::iterator::IterValue;
use crate::analysis::{Loop, LoopAnalysis, SSAGraph};
use crate::ir::expr::ExprArena;
use crate::ir::{BinaryOp, Evaluated, ExpandedExpr, Expr, ExprId, Term, UnaryOp, VarStateId};
use crate::support::safe_math::shl_factor;
use std::cell::RefCell;
use std::collections::HashMap;

/**
 * Rewrites arena expressions into `ExpandedExpr` form.
 *
 * In loop scope the walk stops at values that are invariant in the loop and at iterator
 * phis. In function scope it stops at header phis of the context loop and its ancestors,
 * and replaces iterators of other loops with their final values. Any part without a
 * model makes the whole expansion fail.
 **/
pub struct Expander<'a> {
    ssa: &'a SSAGraph,
    arena: &'a ExprArena,
    loops: &'a LoopAnalysis,
    loop_cache: RefCell<HashMap<(ExprId, usize), Option<ExpandedExpr>>>,
    func_cache: RefCell<HashMap<(ExprId, Option<usize>), Option<ExpandedExpr>>>,
}

impl<'a> Expander<'a> {
    pub fn new(ssa: &'a SSAGraph, arena: &'a ExprArena, loops: &'a LoopAnalysis) -> Expander<'a> {
        Self {
            ssa,
            arena,
            loops,
            loop_cache: RefCell::new(HashMap::new()),
            func_cache: RefCell::new(HashMap::new()),
        }
    }

    pub fn arena(&self) -> &'a ExprArena {
        self.arena
    }

    pub fn ssa(&self) -> &'a SSAGraph {
        self.ssa
    }

    pub fn loops(&self) -> &'a LoopAnalysis {
        self.loops
    }

    pub fn expand_in_loop(&self, e: ExprId, l: &Loop) -> Option<ExpandedExpr> {
        if let Some(r) = self.loop_cache.borrow().get(&(e, l.index)) {
            return r.clone();
        }
        let r = self.loop_expr(e, l, &mut vec![]).map(|mut x| {
            x.simplify();
            x
        });
        self.loop_cache.borrow_mut().insert((e, l.index), r.clone());
        r
    }

    pub fn expand_in_function(&self, e: ExprId, context: Option<&Loop>) -> Option<ExpandedExpr> {
        let key = (e, context.map(|l| l.index));
        if let Some(r) = self.func_cache.borrow().get(&key) {
            return r.clone();
        }
        let r = self.func_expr(e, context, &mut vec![]).map(|mut x| {
            x.simplify();
            x
        });
        self.func_cache.borrow_mut().insert(key, r.clone());
        r
    }

    pub fn state_in_loop(&self, vs: VarStateId, l: &Loop) -> Option<ExpandedExpr> {
        self.ssa.state(vs).expr.and_then(|e| self.expand_in_loop(e, l))
    }

    pub fn state_in_function(&self, vs: VarStateId, context: Option<&Loop>) -> Option<ExpandedExpr> {
        self.ssa
            .state(vs)
            .expr
            .and_then(|e| self.expand_in_function(e, context))
    }

    pub fn iter_value(&self, v: &IterValue, context: Option<&Loop>) -> Option<ExpandedExpr> {
        self.iter_value_rec(v, context, &mut vec![])
    }

    fn iter_value_rec(
        &self,
        v: &IterValue,
        context: Option<&Loop>,
        visiting: &mut Vec<ExprId>,
    ) -> Option<ExpandedExpr> {
        match v {
            IterValue::Int(x) => Some(ExpandedExpr::integer(*x)),
            IterValue::Var(vs) => Some(ExpandedExpr::var(*vs)),
            IterValue::Expanded(x) => Some(x.clone()),
            IterValue::Expr(e) => self.func_expr(*e, context, visiting),
        }
    }

    fn loop_expr(&self, e: ExprId, l: &Loop, visiting: &mut Vec<ExprId>) -> Option<ExpandedExpr> {
        let expr = self.arena.get(e);
        if let Expr::Integer(v) = expr {
            return Some(ExpandedExpr::integer(*v));
        }
        if let Some(vs) = self.arena.owner(e) {
            if l.is_constant(self.ssa, vs) || self.loops.iterator_of(vs).is_some() {
                return Some(ExpandedExpr::var(vs));
            }
        }
        match expr {
            Expr::Phi { e1, e2 } => {
                if visiting.contains(&e) {
                    return None;
                }
                visiting.push(e);
                let r = self
                    .loop_expr(*e1, l, visiting)
                    .zip(self.loop_expr(*e2, l, visiting))
                    .map(|(a, b)| ExpandedExpr::phi(a, b));
                visiting.pop();
                r
            }
            _ => self.structural(expr, e, &mut |x| self.loop_expr(x, l, visiting)),
        }
    }

    fn func_expr(&self, e: ExprId, context: Option<&Loop>, visiting: &mut Vec<ExprId>) -> Option<ExpandedExpr> {
        let expr = self.arena.get(e);
        if let Expr::Integer(v) = expr {
            return Some(ExpandedExpr::integer(*v));
        }
        if let Some(vs) = self.arena.owner(e) {
            let s = self.ssa.state(vs);
            if s.is_phi {
                if let Some(c) = context {
                    let enclosing = c.start == s.block
                        || c
                            .ancestors
                            .iter()
                            .any(|a| self.loops.loops[*a].start == s.block);
                    if enclosing {
                        return Some(ExpandedExpr::var(vs));
                    }
                }
                if let Some((_, it)) = self.loops.iterator_of(vs) {
                    if !it.main {
                        return None;
                    }
                    let fv = it.final_value.as_ref()?;
                    if visiting.contains(&e) {
                        return None;
                    }
                    visiting.push(e);
                    let r = self.iter_value_rec(fv, context, visiting);
                    visiting.pop();
                    return r;
                }
            }
        }
        match expr {
            Expr::Phi { e1, e2 } => {
                if visiting.contains(&e) {
                    return None;
                }
                visiting.push(e);
                let r = self
                    .func_expr(*e1, context, visiting)
                    .zip(self.func_expr(*e2, context, visiting))
                    .map(|(a, b)| ExpandedExpr::phi(a, b));
                visiting.pop();
                r
            }
            _ => self.structural(expr, e, &mut |x| self.func_expr(x, context, visiting)),
        }
    }

    /// The scope-independent cases, with `rec` expanding the children.
    fn structural<F>(&self, expr: &Expr, e: ExprId, rec: &mut F) -> Option<ExpandedExpr>
    where
        F: FnMut(ExprId) -> Option<ExpandedExpr>,
    {
        match expr {
            Expr::None | Expr::AddRec { .. } | Expr::Phi { .. } => None,
            Expr::Integer(v) => Some(ExpandedExpr::integer(*v)),
            Expr::Var(vs) => Some(ExpandedExpr::var(*vs)),
            Expr::Mem(_) => Some(ExpandedExpr::term(Term::Mem(e), 1)),
            Expr::Expanded(x) => Some(x.clone()),
            Expr::Unary { op, e } => {
                let x = rec(*e)?;
                match op {
                    UnaryOp::Mov => Some(x),
                    UnaryOp::Neg => Some(x.negated()),
                }
            }
            Expr::Binary { op, e1, e2 } => {
                let mut a = rec(*e1)?;
                let b = rec(*e2)?;
                match op {
                    BinaryOp::Add => {
                        a.merge(&b);
                        Some(a)
                    }
                    BinaryOp::Sub => {
                        a.subtract(&b);
                        Some(a)
                    }
                    BinaryOp::Shl => match b.evaluate() {
                        Some(Evaluated::Int(k)) => {
                            a.multiply(shl_factor(k)?);
                            Some(a)
                        }
                        _ => None,
                    },
                    BinaryOp::Mul => match (a.evaluate(), b.evaluate()) {
                        (_, Some(Evaluated::Int(k))) => {
                            a.multiply(k);
                            Some(a)
                        }
                        (Some(Evaluated::Int(k)), _) => {
                            let mut b = b;
                            b.multiply(k);
                            Some(b)
                        }
                        _ => None,
                    },
                    BinaryOp::Div | BinaryOp::Lsr | BinaryOp::Asr => None,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{ExpandedKind, Variable};
    use crate::tests::pipeline;
    use crate::tests::programs::{counted_loop, diamond_assign, Bound};

    #[test]
    fn test_loop_scope() {
        let fa = pipeline(counted_loop(Bound::Immediate(100)));
        let ex = Expander::new(&fa.ssa, &fa.arena, &fa.loops);
        let l = &fa.loops.loops()[0];
        let phi = fa.ssa.phi_of(1, &Variable::register(0)).expect("phi");

        // add r0, r0, 1
        let inc = ex.state_in_loop(fa.ssa.outputs(2)[0], l).expect("expansion");
        let mut expected = ExpandedExpr::var(phi);
        expected.add_term(Term::One, 1);
        assert_eq!(expected, inc);

        // [r2 + r0 * 4]
        let mem = fa.ssa.inputs(1)[0];
        let addr = match fa.arena.get(fa.ssa.state(mem).expr.expect("slot")) {
            Expr::Mem(a) => *a,
            e => panic!("unexpected {:?}", e),
        };
        let addr = ex.expand_in_loop(addr, l).expect("address");
        let base = fa.ssa.entry_state(&Variable::register(2)).expect("r2");
        assert_eq!(Some(1), addr.coefficient(&Term::Var(base)));
        assert_eq!(Some(4), addr.coefficient(&Term::Var(phi)));
        assert_eq!(0, addr.immediate());
    }

    #[test]
    fn test_function_scope() {
        let fa = pipeline(counted_loop(Bound::Immediate(100)));
        let ex = Expander::new(&fa.ssa, &fa.arena, &fa.loops);
        let l = &fa.loops.loops()[0];
        let phi = fa.ssa.phi_of(1, &Variable::register(0)).expect("phi");
        // inside its own loop the header phi stays symbolic
        assert_eq!(Some(ExpandedExpr::var(phi)), ex.state_in_function(phi, Some(l)));
        // outside, the iterator is replaced by its final value
        assert_eq!(Some(ExpandedExpr::integer(99)), ex.state_in_function(phi, None));
        // mov r0, 0
        assert_eq!(
            Some(ExpandedExpr::integer(0)),
            ex.state_in_function(fa.ssa.outputs(0)[0], None)
        );
    }

    #[test]
    fn test_conditional_value() {
        let fa = pipeline(diamond_assign());
        let ex = Expander::new(&fa.ssa, &fa.arena, &fa.loops);
        let phi = fa.ssa.phi_of(3, &Variable::register(0)).expect("phi");
        let v = ex.state_in_function(phi, None).expect("expansion");
        assert_eq!(ExpandedKind::Phi, v.kind());
        assert_eq!(2, v.options().len());
    }
}
