use crate::analysis::iterator::IterValue;
use crate::analysis::Loop;
use crate::ir::Variable;
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Verdict {
    /// No dependence across iterations.
    Doall,
    /// Safe if the written arrays do not overlap at run time.
    NeedsRuntimeCheck,
    /// Safe only if the undecided access pairs turn out to be independent.
    NeedsProfiling,
    Unsafe,
    /// Skipped by the profiling gate or the manual selection.
    Removed,
}

impl Display for Verdict {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Verdict::Doall => f.pad("DOALL"),
            Verdict::NeedsRuntimeCheck => f.pad("needs-runtime-check"),
            Verdict::NeedsProfiling => f.pad("needs-profiling"),
            Verdict::Unsafe => f.pad("unsafe"),
            Verdict::Removed => f.pad("removed"),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum UpdateOp {
    Add,
}

/// What a parallel schedule needs to know about the variables of a loop.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VarProfile {
    Induction {
        var: Variable,
        op: UpdateOp,
        stride: i64,
        /** The operand the exit condition compares the iterator against. */
        check: Option<Variable>,
        init: IterValue,
    },
    Array {
        base: Variable,
        /** Bytes covered by all iterations. */
        max_range: i64,
    },
}

impl Display for VarProfile {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            VarProfile::Induction {
                var,
                stride,
                check,
                init,
                ..
            } => {
                write!(f, "induction {} = {} step {}", var, init, stride)?;
                if let Some(c) = check {
                    write!(f, " until {}", c)?;
                }
                Ok(())
            }
            VarProfile::Array { base, max_range } => write!(f, "array [{}] range {}", base, max_range),
        }
    }
}

pub fn verdict(l: &Loop) -> Verdict {
    if l.removed {
        return Verdict::Removed;
    }
    if l.is_unsafe || l.sync || l.alias.has_dependences() {
        return Verdict::Unsafe;
    }
    if !l.alias.undecided.is_empty() {
        return Verdict::NeedsProfiling;
    }
    let bases = l.memory.array_accesses.len();
    if l.alias.arrays_to_check.len() * bases.saturating_sub(1) > 0 {
        return Verdict::NeedsRuntimeCheck;
    }
    Verdict::Doall
}

#[derive(Clone, Debug)]
pub struct LoopSummary {
    pub id: usize,
    pub function: String,
    pub start_pc: u64,
    pub level: Option<usize>,
    pub verdict: Verdict,
    pub iterators: usize,
    pub static_iter_count: i64,
    pub runtime_checks: usize,
    pub profiles: Vec<VarProfile>,
}

/** Per-loop verdicts of a whole run, with a count per verdict. */
#[derive(Clone, Debug, Default)]
pub struct Report {
    pub loops: Vec<LoopSummary>,
    counts: BTreeMap<Verdict, usize>,
    pub unavailable: Vec<String>,
}

impl Report {
    pub fn add(&mut self, s: LoopSummary) {
        *self.counts.entry(s.verdict).or_insert(0) += 1;
        self.loops.push(s);
    }

    pub fn count(&self, v: Verdict) -> usize {
        self.counts.get(&v).copied().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.loops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loops.is_empty()
    }
}

impl Display for LoopSummary {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "loop {} in {} at {:#x}: {}, {} iterators",
            self.id, self.function, self.start_pc, self.verdict, self.iterators
        )?;
        if let Some(l) = self.level {
            write!(f, ", level {}", l)?;
        }
        if self.static_iter_count > 0 {
            write!(f, ", {} iterations", self.static_iter_count)?;
        }
        if self.runtime_checks > 0 {
            write!(f, ", {} runtime checks", self.runtime_checks)?;
        }
        for p in self.profiles.iter() {
            write!(f, "\n\t{}", p)?;
        }
        Ok(())
    }
}

impl Display for Report {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for l in self.loops.iter() {
            writeln!(f, "{}", l)?;
        }
        for name in self.unavailable.iter() {
            writeln!(f, "function {} is not available", name)?;
        }
        write!(f, "{} loops:", self.loops.len())?;
        for v in [
            Verdict::Doall,
            Verdict::NeedsRuntimeCheck,
            Verdict::NeedsProfiling,
            Verdict::Unsafe,
            Verdict::Removed,
        ] {
            write!(f, " {} {}", self.count(v), v)?;
        }
        Ok(())
    }
}
