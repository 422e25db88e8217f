pub mod alias;
pub(crate) mod ast;
pub mod callgraph;
pub mod dependence;
mod dom_frontier;
mod expand;
mod function;
pub mod iterator;
pub mod liveness;
mod loopinfo;
pub mod memory_location;
pub mod report;
pub mod scalar_evolution;
mod ssa;
pub mod variable;

pub use dom_frontier::DomFrontier;
pub use expand::Expander;
pub use function::FunctionAnalysis;
pub use loopinfo::{Loop, LoopAnalysis};
pub use report::{Report, Verdict};
pub use ssa::SSAGraph;
