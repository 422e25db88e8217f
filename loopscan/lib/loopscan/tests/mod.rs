use crate::analysis::{DomFrontier, FunctionAnalysis, SSAGraph};
use crate::context::AnalysisOptions;
use crate::ir::{DomTree, Function};
use crate::support::diagnostic::DiagnosticContext;

pub(crate) mod programs;

pub(crate) fn ssa_for(func: &Function) -> (DomFrontier, SSAGraph) {
    let options = AnalysisOptions::default();
    let dom = DomTree::analyze(func, options.fixpoint_limit).expect("Failed to compute dominance");
    let df = DomFrontier::new(&dom);
    let ssa = SSAGraph::build(func, &dom, &df, &options.calling_convention);
    (df, ssa)
}

/// Runs every phase on a single function, with no callees.
pub(crate) fn pipeline(func: Function) -> FunctionAnalysis {
    let diag = DiagnosticContext::default();
    let mut fa = FunctionAnalysis::new(func, 0, &AnalysisOptions::default(), &diag)
        .expect("Failed to analyze the function");
    fa.analyze_loops(&diag);
    fa
}
