use crate::ir::{ExpandedExpr, ExprId, VarStateId};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Mov,
    Neg,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Shl,
    Lsr,
    Asr,
}

/**
 * Symbolic form of a scalar value. `None` is the unknown value: consumers must treat it as
 * neither constant nor an iterator.
 **/
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Expr {
    None,
    Integer(i64),
    Var(VarStateId),
    Mem(ExprId),
    Unary {
        op: UnaryOp,
        e: ExprId,
    },
    Binary {
        op: BinaryOp,
        e1: ExprId,
        e2: ExprId,
    },
    Phi {
        e1: ExprId,
        e2: ExprId,
    },
    AddRec {
        base: ExprId,
        stride: ExprId,
        iterator: VarStateId,
    },
    Expanded(ExpandedExpr),
}

/**
 * Arena of expressions. Every `VarState` owns exactly one slot; the remaining slots are
 * interior nodes synthesized for addresses, shifts and closed forms.
 **/
#[derive(Clone, Debug, Default)]
pub struct ExprArena {
    exprs: Vec<Expr>,
    owner: Vec<Option<VarStateId>>,
}

impl ExprArena {
    pub fn push(&mut self, expr: Expr, owner: Option<VarStateId>) -> ExprId {
        self.exprs.push(expr);
        self.owner.push(owner);
        ExprId((self.exprs.len() - 1) as u32)
    }

    pub fn get(&self, id: ExprId) -> &Expr {
        &self.exprs[id.index()]
    }

    pub(crate) fn set(&mut self, id: ExprId, expr: Expr) {
        self.exprs[id.index()] = expr;
    }

    /// The SSA value whose expression slot `id` is.
    pub fn owner(&self, id: ExprId) -> Option<VarStateId> {
        self.owner[id.index()]
    }

    pub fn len(&self) -> usize {
        self.exprs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exprs.is_empty()
    }
}

impl Expr {
    /// Leaves terminate an expansion walk.
    pub fn is_leaf(&self) -> bool {
        matches!(
            self,
            Expr::Integer(_) | Expr::None | Expr::Mem(_) | Expr::AddRec { .. } | Expr::Var(_)
        )
    }
}
