use std::cmp::Ordering;
use std::fmt::{Display, Formatter};
use std::hash::{Hash, Hasher};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ShiftKind {
    Lsl,
    Lsr,
    Asr,
}

/**
 * The storage a machine operand refers to. Register numbers are whatever the decoder uses;
 * they are only compared for identity.
 **/
#[derive(Copy, Clone, Debug)]
pub enum VarKind {
    Register(u32),
    StackSlot(i64),
    StackFrameSlot(i64),
    Memory {
        base: Option<u32>,
        index: Option<u32>,
        scale: u8,
        disp: i64,
    },
    Absolute(u64),
    Constant(i64),
    ControlFlag(u32),
    ShiftedRegister {
        reg: u32,
        shift: ShiftKind,
        amount: u8,
    },
    ShiftedConstant {
        value: i64,
        shift: ShiftKind,
        amount: u8,
    },
    Polynomial {
        base: Option<u32>,
        index: Option<u32>,
        scale: u8,
        disp: i64,
    },
    Unknown,
}

/**
 * A machine-level variable. Equality, ordering and hashing ignore `size` for every kind
 * except stack slots: two stack accesses of different widths at one offset are distinct.
 **/
#[derive(Copy, Clone, Debug)]
pub struct Variable {
    pub kind: VarKind,
    pub size: u8,
}

type Key = (u8, i64, i64, i64, i64, u8);

const NO_REG: i64 = -1;

fn reg(r: Option<u32>) -> i64 {
    r.map_or(NO_REG, i64::from)
}

impl Variable {
    pub const fn new(kind: VarKind, size: u8) -> Variable {
        Self { kind, size }
    }

    pub const fn register(r: u32) -> Variable {
        Self::new(VarKind::Register(r), 8)
    }

    pub const fn constant(v: i64) -> Variable {
        Self::new(VarKind::Constant(v), 8)
    }

    pub const fn flag(f: u32) -> Variable {
        Self::new(VarKind::ControlFlag(f), 1)
    }

    pub const fn memory(base: Option<u32>, index: Option<u32>, scale: u8, disp: i64) -> Variable {
        Self::new(
            VarKind::Memory {
                base,
                index,
                scale,
                disp,
            },
            8,
        )
    }

    pub const fn stack(offset: i64, size: u8) -> Variable {
        Self::new(VarKind::StackSlot(offset), size)
    }

    fn key(&self) -> Key {
        let size = if matches!(self.kind, VarKind::StackSlot(_)) {
            self.size
        } else {
            0
        };
        match self.kind {
            VarKind::Register(r) => (0, r as i64, 0, 0, 0, size),
            VarKind::StackSlot(o) => (1, o, 0, 0, 0, size),
            VarKind::StackFrameSlot(o) => (2, o, 0, 0, 0, size),
            VarKind::Memory {
                base,
                index,
                scale,
                disp,
            } => (3, reg(base), reg(index), scale as i64, disp, size),
            VarKind::Absolute(a) => (4, a as i64, 0, 0, 0, size),
            VarKind::Constant(v) => (5, v, 0, 0, 0, size),
            VarKind::ControlFlag(f) => (6, f as i64, 0, 0, 0, size),
            VarKind::ShiftedRegister { reg, shift, amount } => {
                (7, reg as i64, shift as i64, amount as i64, 0, size)
            }
            VarKind::ShiftedConstant {
                value,
                shift,
                amount,
            } => (8, value, shift as i64, amount as i64, 0, size),
            VarKind::Polynomial {
                base,
                index,
                scale,
                disp,
            } => (9, reg(base), reg(index), scale as i64, disp, size),
            VarKind::Unknown => (10, 0, 0, 0, 0, size),
        }
    }

    /// Storage that is tracked by name and may receive a phi node.
    pub fn is_named_storage(&self) -> bool {
        matches!(
            self.kind,
            VarKind::Register(_)
                | VarKind::StackSlot(_)
                | VarKind::StackFrameSlot(_)
                | VarKind::Absolute(_)
                | VarKind::ControlFlag(_)
        )
    }

    /// Operands that get a fresh state at every occurrence instead of a by-name lookup.
    pub fn is_compound(&self) -> bool {
        matches!(
            self.kind,
            VarKind::Memory { .. }
                | VarKind::Polynomial { .. }
                | VarKind::ShiftedRegister { .. }
                | VarKind::ShiftedConstant { .. }
        )
    }

    pub fn is_memory(&self) -> bool {
        matches!(self.kind, VarKind::Memory { .. })
    }

    pub fn is_register_like(&self) -> bool {
        matches!(self.kind, VarKind::Register(_) | VarKind::ControlFlag(_))
    }

    pub fn is_stack(&self) -> bool {
        matches!(self.kind, VarKind::StackSlot(_) | VarKind::StackFrameSlot(_))
    }

    pub fn constant_value(&self) -> Option<i64> {
        match self.kind {
            VarKind::Constant(v) => Some(v),
            _ => None,
        }
    }

    /// The registers an address operand is computed from, in `(base, index)` order.
    pub fn address_registers(&self) -> (Option<Variable>, Option<Variable>) {
        match self.kind {
            VarKind::Memory { base, index, .. } | VarKind::Polynomial { base, index, .. } => {
                (base.map(Variable::register), index.map(Variable::register))
            }
            VarKind::ShiftedRegister { reg, .. } => (Some(Variable::register(reg)), None),
            _ => (None, None),
        }
    }
}

impl PartialEq for Variable {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Variable {}

impl PartialOrd for Variable {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Variable {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

impl Hash for Variable {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state)
    }
}

impl Display for ShiftKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ShiftKind::Lsl => f.pad("lsl"),
            ShiftKind::Lsr => f.pad("lsr"),
            ShiftKind::Asr => f.pad("asr"),
        }
    }
}

impl Display for Variable {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        fn addr(
            f: &mut Formatter<'_>,
            base: Option<u32>,
            index: Option<u32>,
            scale: u8,
            disp: i64,
        ) -> std::fmt::Result {
            write!(f, "[")?;
            if let Some(b) = base {
                write!(f, "r{}+", b)?;
            }
            if let Some(i) = index {
                write!(f, "r{}*{}+", i, scale)?;
            }
            write!(f, "{}]", disp)
        }
        match self.kind {
            VarKind::Register(r) => write!(f, "r{}", r),
            VarKind::StackSlot(o) => write!(f, "stack[{}]", o),
            VarKind::StackFrameSlot(o) => write!(f, "frame[{}]", o),
            VarKind::Memory {
                base,
                index,
                scale,
                disp,
            } => addr(f, base, index, scale, disp),
            VarKind::Absolute(a) => write!(f, "abs[{:#x}]", a),
            VarKind::Constant(v) => write!(f, "{}", v),
            VarKind::ControlFlag(x) => write!(f, "flag{}", x),
            VarKind::ShiftedRegister { reg, shift, amount } => {
                write!(f, "r{} {} {}", reg, shift, amount)
            }
            VarKind::ShiftedConstant {
                value,
                shift,
                amount,
            } => write!(f, "{} {} {}", value, shift, amount),
            VarKind::Polynomial {
                base,
                index,
                scale,
                disp,
            } => {
                write!(f, "&")?;
                addr(f, base, index, scale, disp)
            }
            VarKind::Unknown => f.pad("?"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    #[test]
    fn test_size_insensitive_identity() {
        let wide = Variable::new(VarKind::Register(3), 8);
        let narrow = Variable::new(VarKind::Register(3), 4);
        assert_eq!(wide, narrow);

        let s8 = Variable::stack(-16, 8);
        let s4 = Variable::stack(-16, 4);
        assert_ne!(s8, s4);

        let set: BTreeSet<Variable> = [wide, narrow, s8, s4].into_iter().collect();
        assert_eq!(3, set.len());
    }

    #[test]
    fn test_address_registers() {
        let m = Variable::memory(Some(2), Some(0), 4, 8);
        let (b, i) = m.address_registers();
        assert_eq!(Some(Variable::register(2)), b);
        assert_eq!(Some(Variable::register(0)), i);
        assert!(m.is_compound());
        assert!(!m.is_named_storage());
        assert_eq!("[r2+r0*4+8]", m.to_string());
    }
}
