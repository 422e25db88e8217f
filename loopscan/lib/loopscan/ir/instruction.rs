use crate::error::ListingError;
use crate::ir::variable::Variable;
use bitflags::bitflags;
use smallvec::SmallVec;
use std::str::FromStr;

bitflags! {
    pub struct Access: u8 {
        const READ = 0b01;
        const WRITE = 0b10;
    }
}

/**
 * The architecture-neutral opcode classes the decoder lifts machine instructions to.
 **/
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Opcode {
    Undefined,
    DirectBranch,
    ConditionalBranch,
    Call,
    Return,
    Interrupt,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Shl,
    LShr,
    AShr,
    And,
    Or,
    Xor,
    Mov,
    Neg,
    Not,
    Load,
    Store,
    Fence,
    GetPointer,
    Compare,
    Nop,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Operand {
    pub var: Variable,
    pub access: Access,
}

#[derive(Clone, Debug)]
pub struct Instruction {
    pub id: usize,
    pub pc: u64,
    pub opcode: Opcode,
    pub operands: SmallVec<[Operand; 4]>,
    /** Branch or call target as a program counter, if the decoder resolved one. */
    pub target: Option<u64>,
    pub(crate) block: usize,
}

impl Opcode {
    pub fn is_control_flow(self) -> bool {
        matches!(
            self,
            Opcode::DirectBranch
                | Opcode::ConditionalBranch
                | Opcode::Call
                | Opcode::Return
                | Opcode::Interrupt
        )
    }

    pub fn is_branch(self) -> bool {
        matches!(self, Opcode::DirectBranch | Opcode::ConditionalBranch)
    }
}

impl FromStr for Opcode {
    type Err = ListingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let op = match s {
            "undefined" => Opcode::Undefined,
            "jmp" | "direct_branch" => Opcode::DirectBranch,
            "jcc" | "conditional_branch" => Opcode::ConditionalBranch,
            "call" => Opcode::Call,
            "ret" | "return" => Opcode::Return,
            "int" | "interrupt" => Opcode::Interrupt,
            "add" => Opcode::Add,
            "sub" => Opcode::Sub,
            "mul" => Opcode::Mul,
            "div" => Opcode::Div,
            "rem" => Opcode::Rem,
            "shl" => Opcode::Shl,
            "lshr" => Opcode::LShr,
            "ashr" => Opcode::AShr,
            "and" => Opcode::And,
            "or" => Opcode::Or,
            "xor" => Opcode::Xor,
            "mov" => Opcode::Mov,
            "neg" => Opcode::Neg,
            "not" => Opcode::Not,
            "load" => Opcode::Load,
            "store" => Opcode::Store,
            "fence" => Opcode::Fence,
            "lea" | "get_pointer" => Opcode::GetPointer,
            "cmp" | "compare" => Opcode::Compare,
            "nop" => Opcode::Nop,
            _ => return Err(ListingError::InvalidOpcode(s.to_string())),
        };
        Ok(op)
    }
}

impl FromStr for Access {
    type Err = ListingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "r" => Ok(Access::READ),
            "w" => Ok(Access::WRITE),
            "rw" => Ok(Access::READ | Access::WRITE),
            _ => Err(ListingError::InvalidAccess(s.to_string())),
        }
    }
}

impl Operand {
    pub const fn read(var: Variable) -> Operand {
        Self {
            var,
            access: Access::READ,
        }
    }

    pub const fn write(var: Variable) -> Operand {
        Self {
            var,
            access: Access::WRITE,
        }
    }

    pub fn read_write(var: Variable) -> Operand {
        Self {
            var,
            access: Access::READ | Access::WRITE,
        }
    }
}

impl Instruction {
    pub fn new(id: usize, pc: u64, opcode: Opcode, operands: &[Operand]) -> Instruction {
        Self {
            id,
            pc,
            opcode,
            operands: operands.iter().copied().collect(),
            target: None,
            block: 0,
        }
    }

    pub fn with_target(mut self, target: u64) -> Instruction {
        self.target = Some(target);
        self
    }

    /// Operands read by the instruction, in operand order.
    pub fn inputs(&self) -> impl Iterator<Item = &Variable> + '_ {
        self.operands
            .iter()
            .filter(|o| o.access.contains(Access::READ))
            .map(|o| &o.var)
    }

    pub fn outputs(&self) -> impl Iterator<Item = &Variable> + '_ {
        self.operands
            .iter()
            .filter(|o| o.access.contains(Access::WRITE))
            .map(|o| &o.var)
    }

    pub fn block(&self) -> usize {
        self.block
    }

    pub fn is_nop(&self) -> bool {
        self.opcode == Opcode::Nop
    }
}
