use std::fmt::{Display, Formatter};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Listing error: {0}")]
    ListingError(#[from] ListingError),
    #[error("Structural error: {0}")]
    StructuralError(#[from] StructuralError),
    #[error("Analysis error: {0}")]
    AnalysisError(#[from] AnalysisError),
    #[error("{0}")]
    NonConvergence(#[from] NonConvergence),
}

#[derive(Debug)]
pub enum ListingError {
    InvalidJson,
    MissingField(&'static str),
    InvalidOpcode(String),
    InvalidOperand(String),
    InvalidAccess(String),
}

#[derive(Debug)]
pub enum StructuralError {
    EmptyFunction,
    UnorderedInstructions(u64),
    InvalidBlockRange(usize, usize),
}

/**
 * Non-fatal findings. They never abort the run: the affected loop or function is degraded
 * and the finding is recorded as a remark.
 **/
#[derive(Debug, Clone)]
pub enum AnalysisError {
    UnresolvedTarget(u64),
    UnrecognisedBlock(usize),
    CyclicLoopRelation,
    IncompatibleMerge,
    MissingPhiOperands(usize),
    MultipleCheckBlocks(usize),
    UnsupportedExitCondition,
    NoMainIterator,
    UndecidedPhi(usize),
    ReductionVariable(usize),
    UndecidedMemoryAccess(usize, usize),
    CallInLoop(usize),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct NonConvergence {
    pub phase: &'static str,
    pub limit: usize,
}

impl std::error::Error for ListingError {}

impl Display for ListingError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ListingError::InvalidJson => f.pad("Invalid JSON data"),
            ListingError::MissingField(name) => write!(f, "missing field `{}`", name),
            ListingError::InvalidOpcode(op) => write!(f, "invalid opcode `{}`", op),
            ListingError::InvalidOperand(kind) => write!(f, "invalid operand `{}`", kind),
            ListingError::InvalidAccess(acc) => write!(f, "invalid access `{}`", acc),
        }
    }
}

impl std::error::Error for StructuralError {}

impl Display for StructuralError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            StructuralError::EmptyFunction => f.pad("Function has no instructions"),
            StructuralError::UnorderedInstructions(pc) => {
                write!(f, "instruction at {:#x} is out of order", pc)
            }
            StructuralError::InvalidBlockRange(start, end) => {
                write!(f, "basic block ends before it starts ({} >= {})", start, end)
            }
        }
    }
}

impl std::error::Error for AnalysisError {}

impl Display for AnalysisError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            AnalysisError::UnresolvedTarget(pc) => write!(f, "unresolved target at {:#x}", pc),
            AnalysisError::UnrecognisedBlock(bb) => write!(f, "unrecognised block {}", bb),
            AnalysisError::CyclicLoopRelation => f.pad("Cyclic loop relation"),
            AnalysisError::IncompatibleMerge => f.pad("Incompatible expression merge"),
            AnalysisError::MissingPhiOperands(bb) => {
                write!(f, "phi node in block {} has fewer than two operands", bb)
            }
            AnalysisError::MultipleCheckBlocks(n) => write!(f, "loop has {} check blocks", n),
            AnalysisError::UnsupportedExitCondition => f.pad("Unsupported loop exit condition"),
            AnalysisError::NoMainIterator => f.pad("No main iterator"),
            AnalysisError::UndecidedPhi(id) => write!(f, "undecided phi variable {}", id),
            AnalysisError::ReductionVariable(id) => write!(f, "reduction variable {}", id),
            AnalysisError::UndecidedMemoryAccess(a, b) => {
                write!(f, "undecided memory access pair ({}, {})", a, b)
            }
            AnalysisError::CallInLoop(func) => write!(f, "loop calls function {}", func),
        }
    }
}

impl std::error::Error for NonConvergence {}

impl Display for NonConvergence {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} did not converge within {} iterations",
            self.phase, self.limit
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
