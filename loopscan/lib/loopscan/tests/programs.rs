use crate::ir::{cfg, Function, Instruction, Opcode, Operand, ShiftKind, VarKind, Variable};
use crate::support::diagnostic::DiagnosticContext;
use std::collections::HashMap;

pub(crate) const fn r(reg: u32) -> Variable {
    Variable::register(reg)
}

pub(crate) const fn imm(v: i64) -> Variable {
    Variable::constant(v)
}

pub(crate) const fn mem(base: u32, index: Option<u32>, scale: u8, disp: i64) -> Variable {
    Variable::memory(Some(base), index, scale, disp)
}

pub(crate) enum Bound {
    Immediate(i64),
    Register(u32),
}

impl Bound {
    fn var(&self) -> Variable {
        match self {
            Bound::Immediate(x) => imm(*x),
            Bound::Register(x) => r(*x),
        }
    }
}

/**
 * Assembles a listing one instruction at a time. Instruction `i` sits at `entry + 4 * i`,
 * and branch targets are given as instruction indices.
 **/
pub(crate) struct FunctionBuilder {
    name: String,
    entry: u64,
    instrs: Vec<Instruction>,
}

impl FunctionBuilder {
    pub(crate) fn new(name: &str, entry: u64) -> FunctionBuilder {
        Self {
            name: name.to_string(),
            entry,
            instrs: vec![],
        }
    }

    fn pc(&self, idx: usize) -> u64 {
        self.entry + 4 * idx as u64
    }

    fn push(&mut self, instr: Instruction) -> &mut Self {
        self.instrs.push(instr);
        self
    }

    pub(crate) fn op(&mut self, opcode: Opcode, operands: &[Operand]) -> &mut Self {
        let id = self.instrs.len();
        let pc = self.pc(id);
        self.push(Instruction::new(id, pc, opcode, operands))
    }

    pub(crate) fn mov(&mut self, dst: u32, src: Variable) -> &mut Self {
        self.op(Opcode::Mov, &[Operand::write(r(dst)), Operand::read(src)])
    }

    /// `dst = dst <op> src`
    pub(crate) fn binary(&mut self, opcode: Opcode, dst: u32, src: Variable) -> &mut Self {
        self.op(opcode, &[Operand::read_write(r(dst)), Operand::read(src)])
    }

    pub(crate) fn load(&mut self, dst: u32, addr: Variable) -> &mut Self {
        self.op(Opcode::Load, &[Operand::write(r(dst)), Operand::read(addr)])
    }

    pub(crate) fn store(&mut self, addr: Variable, src: u32) -> &mut Self {
        self.op(Opcode::Store, &[Operand::write(addr), Operand::read(r(src))])
    }

    pub(crate) fn cmp(&mut self, a: Variable, b: Variable) -> &mut Self {
        self.op(
            Opcode::Compare,
            &[Operand::write(Variable::flag(0)), Operand::read(a), Operand::read(b)],
        )
    }

    pub(crate) fn jcc(&mut self, target: usize) -> &mut Self {
        let id = self.instrs.len();
        let instr = Instruction::new(
            id,
            self.pc(id),
            Opcode::ConditionalBranch,
            &[Operand::read(Variable::flag(0))],
        );
        let target = self.pc(target);
        self.push(instr.with_target(target))
    }

    pub(crate) fn jmp(&mut self, target: usize) -> &mut Self {
        let id = self.instrs.len();
        let instr = Instruction::new(id, self.pc(id), Opcode::DirectBranch, &[]);
        let target = self.pc(target);
        self.push(instr.with_target(target))
    }

    pub(crate) fn call(&mut self, target: Option<u64>) -> &mut Self {
        let id = self.instrs.len();
        let instr = Instruction::new(id, self.pc(id), Opcode::Call, &[Operand::write(r(0))]);
        self.push(match target {
            Some(t) => instr.with_target(t),
            None => instr,
        })
    }

    pub(crate) fn ret(&mut self) -> &mut Self {
        self.op(Opcode::Return, &[])
    }

    pub(crate) fn build(&self) -> Function {
        self.build_with(&HashMap::from([(self.entry, 0)]))
    }

    pub(crate) fn build_with(&self, entries: &HashMap<u64, usize>) -> Function {
        let mut func = Function::new(0, &self.name, self.entry, self.instrs.clone());
        cfg::build(&mut func, entries, 1024, &DiagnosticContext::default())
            .expect("Failed to build the CFG");
        func
    }
}

/// `for (i = 0; i < bound; i++) r1 = a[i]` over 4-byte elements at r2.
pub(crate) fn counted_loop(bound: Bound) -> Function {
    let mut b = FunctionBuilder::new("counted_loop", 0x1000);
    b.mov(0, imm(0))
        .load(1, mem(2, Some(0), 4, 0))
        .binary(Opcode::Add, 0, imm(1))
        .cmp(r(0), bound.var())
        .jcc(1)
        .ret();
    b.build()
}

/// r0 is 2 or 3 depending on the flag, then r1 = r0 + 1.
pub(crate) fn diamond_assign() -> Function {
    let mut b = FunctionBuilder::new("diamond_assign", 0x2000);
    b.mov(0, imm(1))
        .jcc(4)
        .mov(0, imm(2))
        .jmp(5)
        .mov(0, imm(3))
        .op(
            Opcode::Add,
            &[Operand::write(r(1)), Operand::read(r(0)), Operand::read(imm(1))],
        )
        .ret();
    b.build()
}

/// Twenty rows of ten 4-byte elements, both at r2.
pub(crate) fn nested_loop() -> Function {
    let mut b = FunctionBuilder::new("nested_loop", 0x3000);
    b.mov(0, imm(0))
        .mov(1, imm(0))
        .load(4, mem(2, Some(1), 4, 0))
        .binary(Opcode::Add, 1, imm(1))
        .cmp(r(1), imm(10))
        .jcc(2)
        .binary(Opcode::Add, 0, imm(1))
        .cmp(r(0), imm(20))
        .jcc(1)
        .ret();
    b.build()
}

/// r5 = r2 + 8 is recomputed on every iteration but never changes.
pub(crate) fn invariant_loop() -> Function {
    let mut b = FunctionBuilder::new("invariant_loop", 0x4000);
    b.mov(0, imm(0))
        .op(
            Opcode::Add,
            &[Operand::write(r(5)), Operand::read(r(2)), Operand::read(imm(8))],
        )
        .binary(Opcode::Add, 0, imm(1))
        .cmp(r(0), imm(100))
        .jcc(1)
        .ret();
    b.build()
}

/// lea r3, [r2 + 16]; add r4, r3, r1 lsl 2; call
pub(crate) fn pointer_arithmetic() -> Function {
    let poly = Variable::new(
        VarKind::Polynomial {
            base: Some(2),
            index: None,
            scale: 1,
            disp: 16,
        },
        8,
    );
    let shifted = Variable::new(
        VarKind::ShiftedRegister {
            reg: 1,
            shift: ShiftKind::Lsl,
            amount: 2,
        },
        8,
    );
    let mut b = FunctionBuilder::new("pointer_arithmetic", 0x5000);
    b.op(Opcode::GetPointer, &[Operand::write(r(3)), Operand::read(poly)])
        .op(
            Opcode::Add,
            &[Operand::write(r(4)), Operand::read(r(3)), Operand::read(shifted)],
        )
        .call(None)
        .ret();
    b.build()
}

/// `for (i = 0; i < r3; i++) a[i] += 1` over 8-byte elements at r2.
pub(crate) fn copy_loop() -> Function {
    let mut b = FunctionBuilder::new("copy_loop", 0x6000);
    b.mov(0, imm(0))
        .load(1, mem(2, Some(0), 8, 0))
        .binary(Opcode::Add, 1, imm(1))
        .store(mem(2, Some(0), 8, 0), 1)
        .binary(Opcode::Add, 0, imm(1))
        .cmp(r(0), r(3))
        .jcc(1)
        .ret();
    b.build()
}

/// Writes a[i] and a[i + 1]: iteration i + 1 overwrites what iteration i wrote.
pub(crate) fn shifted_write_loop() -> Function {
    let mut b = FunctionBuilder::new("shifted_write_loop", 0x7000);
    b.mov(0, imm(0))
        .store(mem(2, Some(0), 4, 0), 1)
        .store(mem(2, Some(0), 4, 4), 1)
        .binary(Opcode::Add, 0, imm(1))
        .cmp(r(0), imm(100))
        .jcc(1)
        .ret();
    b.build()
}

/// r3 accumulates the 8-byte elements at r2.
pub(crate) fn reduction_loop() -> Function {
    let mut b = FunctionBuilder::new("reduction_loop", 0x8000);
    b.mov(0, imm(0))
        .mov(3, imm(0))
        .load(1, mem(2, Some(0), 8, 0))
        .binary(Opcode::Add, 3, r(1))
        .binary(Opcode::Add, 0, imm(1))
        .cmp(r(0), imm(64))
        .jcc(2)
        .ret();
    b.build()
}

/// Writes a[i] and reads a[i * r5]; the read index is not affine in a known stride.
pub(crate) fn opaque_index_loop() -> Function {
    let mut b = FunctionBuilder::new("opaque_index_loop", 0x9000);
    b.mov(0, imm(0))
        .store(mem(2, Some(0), 4, 0), 1)
        .op(
            Opcode::Mul,
            &[Operand::write(r(6)), Operand::read(r(0)), Operand::read(r(5))],
        )
        .load(7, mem(2, Some(6), 1, 0))
        .binary(Opcode::Add, 0, imm(1))
        .cmp(r(0), imm(100))
        .jcc(1)
        .ret();
    b.build()
}

/// `x = 2x; a[i] = x`: both arms copy r0 to r1, then add r1, r1 and copy it back.
pub(crate) fn doubling_loop() -> Function {
    let mut b = FunctionBuilder::new("doubling_loop", 0xb000);
    b.mov(0, imm(1))
        .mov(4, imm(0))
        .cmp(r(5), imm(0))
        .jcc(6)
        .mov(1, r(0))
        .jmp(7)
        .mov(1, r(0))
        .binary(Opcode::Add, 1, r(1))
        .mov(0, r(1))
        .store(mem(2, Some(4), 4, 0), 0)
        .binary(Opcode::Add, 4, imm(1))
        .cmp(r(4), imm(100))
        .jcc(2)
        .ret();
    b.build()
}

/// Writes a[i << 62] over 4-byte elements: the byte offset leaves the i64 range.
pub(crate) fn scaled_index_loop() -> Function {
    let mut b = FunctionBuilder::new("scaled_index_loop", 0xc000);
    b.mov(0, imm(0))
        .op(
            Opcode::Mul,
            &[Operand::write(r(6)), Operand::read(r(0)), Operand::read(imm(1 << 62))],
        )
        .store(mem(2, Some(6), 4, 0), 1)
        .binary(Opcode::Add, 0, imm(1))
        .cmp(r(0), imm(100))
        .jcc(1)
        .ret();
    b.build()
}
