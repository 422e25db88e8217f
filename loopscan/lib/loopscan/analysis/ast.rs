use crate::analysis::SSAGraph;
use crate::ir::expr::ExprArena;
use crate::ir::{BinaryOp, Expr, ExprId, Function, Opcode, ShiftKind, UnaryOp, VarKind, VarStateId};

/**
 * Attaches an expression to every SSA value. Each `VarState` owns one arena slot; the slot of
 * a value is filled by pattern-matching the opcode of its defining instruction against the
 * slots of the instruction inputs.
 **/
pub fn build(func: &Function, ssa: &mut SSAGraph) -> ExprArena {
    let mut arena = ExprArena::default();
    for s in ssa.states.iter_mut() {
        s.expr = Some(arena.push(Expr::None, Some(s.id)));
    }
    let mut b = ASTBuilder {
        func,
        ssa,
        arena: &mut arena,
    };
    for i in 0..b.ssa.states.len() {
        let id = VarStateId(i as u32);
        let e = b.state_expr(id);
        b.arena.set(b.slot(id), e);
    }
    arena
}

struct ASTBuilder<'a> {
    func: &'a Function,
    ssa: &'a SSAGraph,
    arena: &'a mut ExprArena,
}

fn shift_op(shift: ShiftKind) -> BinaryOp {
    match shift {
        ShiftKind::Lsl => BinaryOp::Shl,
        ShiftKind::Lsr => BinaryOp::Lsr,
        ShiftKind::Asr => BinaryOp::Asr,
    }
}

impl<'a> ASTBuilder<'a> {
    fn slot(&self, s: VarStateId) -> ExprId {
        // slots are allocated in state order
        ExprId(s.0)
    }

    fn int(&mut self, v: i64) -> ExprId {
        self.arena.push(Expr::Integer(v), None)
    }

    fn binary(&mut self, op: BinaryOp, e1: ExprId, e2: ExprId) -> ExprId {
        self.arena.push(Expr::Binary { op, e1, e2 }, None)
    }

    fn state_expr(&mut self, id: VarStateId) -> Expr {
        let s = self.ssa.state(id);
        if s.is_phi {
            return match s.pred.as_slice() {
                [a, b] => Expr::Phi {
                    e1: self.slot(*a),
                    e2: self.slot(*b),
                },
                _ => Expr::None,
            };
        }
        match s.var.kind {
            VarKind::Constant(v) => Expr::Integer(v),
            VarKind::Memory { .. } => Expr::Mem(self.address(id)),
            VarKind::Polynomial { .. } => Expr::Unary {
                op: UnaryOp::Mov,
                e: self.address(id),
            },
            VarKind::ShiftedRegister { shift, amount, .. } => match s.pred.first() {
                Some(r) => {
                    let r = self.slot(*r);
                    let amount = self.int(amount as i64);
                    Expr::Binary {
                        op: shift_op(shift),
                        e1: r,
                        e2: amount,
                    }
                }
                None => Expr::None,
            },
            VarKind::ShiftedConstant {
                value,
                shift,
                amount,
            } => {
                let v = self.int(value);
                let amount = self.int(amount as i64);
                Expr::Binary {
                    op: shift_op(shift),
                    e1: v,
                    e2: amount,
                }
            }
            VarKind::Unknown => Expr::None,
            _ => match s.def {
                Some(instr) => self.instruction_expr(id, instr),
                None => Expr::Var(id),
            },
        }
    }

    /// `base + (index * scale + disp)` with the absent parts left out.
    fn address(&mut self, id: VarStateId) -> ExprId {
        let s = self.ssa.state(id);
        let (scale, disp) = match s.var.kind {
            VarKind::Memory { scale, disp, .. } | VarKind::Polynomial { scale, disp, .. } => {
                (scale, disp)
            }
            _ => (1, 0),
        };
        let (base, index) = s.var.address_registers();
        let mut preds = s.pred.iter().copied();
        let base = base.and_then(|_| preds.next()).map(|p| self.slot(p));
        let index = index.and_then(|_| preds.next()).map(|p| self.slot(p));

        let disp = self.int(disp);
        let scaled = index.map(|i| {
            let scale = self.int(scale as i64);
            let m = self.binary(BinaryOp::Mul, i, scale);
            self.binary(BinaryOp::Add, m, disp)
        });
        match (base, scaled) {
            (Some(b), Some(x)) => self.binary(BinaryOp::Add, b, x),
            (Some(b), None) => self.binary(BinaryOp::Add, b, disp),
            (None, Some(x)) => x,
            (None, None) => disp,
        }
    }

    fn instruction_expr(&mut self, out: VarStateId, instr: usize) -> Expr {
        let opcode = self.func.instructions[instr].opcode;
        let inputs = self.ssa.inputs(instr);
        let e1 = inputs.first().map(|x| self.slot(*x));
        let e2 = inputs.get(1).map(|x| self.slot(*x));
        let op = match opcode {
            Opcode::Add => Some(BinaryOp::Add),
            Opcode::Sub => Some(BinaryOp::Sub),
            Opcode::Mul => Some(BinaryOp::Mul),
            Opcode::Div => Some(BinaryOp::Div),
            Opcode::Shl => Some(BinaryOp::Shl),
            _ => None,
        };
        if let Some(op) = op {
            // an arithmetic instruction with one decoded source has no known value
            return match (e1, e2) {
                (Some(e1), Some(e2)) => Expr::Binary { op, e1, e2 },
                _ => Expr::None,
            };
        }
        match (opcode, e1) {
            (Opcode::Mov | Opcode::Load | Opcode::Store, Some(e)) => Expr::Unary {
                op: UnaryOp::Mov,
                e,
            },
            (Opcode::Neg, Some(e)) => Expr::Unary {
                op: UnaryOp::Neg,
                e,
            },
            (Opcode::GetPointer, _) => {
                let operand = inputs.iter().copied().find(|x| {
                    matches!(
                        self.ssa.state(*x).var.kind,
                        VarKind::Polynomial { .. } | VarKind::Memory { .. }
                    )
                });
                match operand {
                    Some(p) => Expr::Unary {
                        op: UnaryOp::Mov,
                        e: self.address(p),
                    },
                    None => Expr::None,
                }
            }
            (Opcode::Call, _) => Expr::Var(out),
            _ => Expr::None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Variable;
    use crate::ir::Operand;
    use crate::tests::programs::{counted_loop, pointer_arithmetic, r, Bound, FunctionBuilder};
    use crate::tests::ssa_for;

    #[test]
    fn test_counted_loop_exprs() {
        let func = counted_loop(Bound::Immediate(100));
        let (_, mut ssa) = ssa_for(&func);
        let arena = build(&func, &mut ssa);
        let phi = ssa.phi_of(1, &Variable::register(0)).expect("phi");
        let phi_slot = ssa.state(phi).expr.expect("slot");
        assert!(matches!(arena.get(phi_slot), Expr::Phi { .. }));
        assert_eq!(Some(phi), arena.owner(phi_slot));

        // add r0, r0, 1
        let inc = ssa.state(ssa.outputs(2)[0]).expr.expect("slot");
        match arena.get(inc) {
            Expr::Binary {
                op: BinaryOp::Add,
                e1,
                e2,
            } => {
                assert_eq!(phi_slot, *e1);
                assert_eq!(&Expr::Integer(1), arena.get(*e2));
            }
            e => panic!("unexpected {:?}", e),
        }

        // load r1, [r2 + r0 * 4]
        let loaded = ssa.state(ssa.outputs(1)[0]).expr.expect("slot");
        let mem = match arena.get(loaded) {
            Expr::Unary { op: UnaryOp::Mov, e } => *e,
            e => panic!("unexpected {:?}", e),
        };
        let addr = match arena.get(mem) {
            Expr::Mem(a) => *a,
            e => panic!("unexpected {:?}", e),
        };
        assert!(matches!(arena.get(addr), Expr::Binary { op: BinaryOp::Add, .. }));

        // the comparison has no modelled value
        let flag = ssa.state(ssa.outputs(3)[0]).expr.expect("slot");
        assert_eq!(&Expr::None, arena.get(flag));
    }

    #[test]
    fn test_pointer_and_shift_exprs() {
        let func = pointer_arithmetic();
        let (_, mut ssa) = ssa_for(&func);
        let arena = build(&func, &mut ssa);
        // lea r3, [r2 + 16]
        let lea = ssa.state(ssa.outputs(0)[0]).expr.expect("slot");
        let inner = match arena.get(lea) {
            Expr::Unary { op: UnaryOp::Mov, e } => *e,
            e => panic!("unexpected {:?}", e),
        };
        match arena.get(inner) {
            Expr::Binary {
                op: BinaryOp::Add,
                e2,
                ..
            } => assert_eq!(&Expr::Integer(16), arena.get(*e2)),
            e => panic!("unexpected {:?}", e),
        }
        // add r4, r3, r1 lsl 2
        let shifted = ssa.inputs(1)[1];
        let shifted = ssa.state(shifted).expr.expect("slot");
        assert!(matches!(
            arena.get(shifted),
            Expr::Binary {
                op: BinaryOp::Shl,
                ..
            }
        ));
        // call leaves an opaque value
        let ret = ssa.state(ssa.outputs(2)[0]);
        assert_eq!(&Expr::Var(ret.id), arena.get(ret.expr.expect("slot")));
    }

    #[test]
    fn test_single_source_arithmetic_is_opaque() {
        // sub r1; add r3, r1; mul r4, r3, 2
        let mut b = FunctionBuilder::new("single_source", 0xa000);
        b.op(Opcode::Sub, &[Operand::read_write(r(1))])
            .op(Opcode::Add, &[Operand::write(r(3)), Operand::read(r(1))])
            .op(
                Opcode::Mul,
                &[Operand::write(r(4)), Operand::read(r(3)), Operand::read(Variable::constant(2))],
            )
            .ret();
        let func = b.build();
        let (_, mut ssa) = ssa_for(&func);
        let arena = build(&func, &mut ssa);
        for instr in [0, 1] {
            let out = ssa.state(ssa.outputs(instr)[0]).expr.expect("slot");
            assert_eq!(&Expr::None, arena.get(out), "instruction {}", instr);
        }
        let out = ssa.state(ssa.outputs(2)[0]).expr.expect("slot");
        assert!(matches!(arena.get(out), Expr::Binary { op: BinaryOp::Mul, .. }));
    }
}
