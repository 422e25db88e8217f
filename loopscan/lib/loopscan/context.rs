use crate::analysis::callgraph::transitive_calls;
use crate::analysis::report::LoopSummary;
use crate::analysis::{FunctionAnalysis, Loop, Report, Verdict};
use crate::error::Error;
use crate::ir::{cfg, Function};
use crate::support::diagnostic::{DiagnosticContext, Remark};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Knobs of one run. `Default` gives the values the command line starts from.
#[derive(Clone, Debug)]
pub struct AnalysisOptions {
    /** Basic blocks longer than this are split. */
    pub max_block_instructions: usize,
    /** Iteration cap of every fixpoint. */
    pub fixpoint_limit: usize,
    /** Loops at or below this coverage (percent) are removed. */
    pub coverage_threshold: f64,
    /** Loops at or below this many iterations per invocation are removed. */
    pub min_iteration_count: f64,
    pub selected_loops: Option<BTreeSet<usize>>,
    /** Argument registers, in order, assumed to be read by a call. */
    pub calling_convention: Vec<u32>,
    pub return_register: Option<u32>,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            max_block_instructions: 1024,
            fixpoint_limit: 10000,
            coverage_threshold: 1.0,
            min_iteration_count: 15.0,
            selected_loops: None,
            // rdi, rsi, rdx, rcx, r8, r9
            calling_convention: vec![7, 6, 2, 1, 8, 9],
            return_register: Some(0),
        }
    }
}

/// Run-time measurements of one loop.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct LoopProfile {
    pub id: usize,
    pub coverage: f64,
    pub invocations: u64,
    pub iterations: u64,
}

impl LoopProfile {
    pub fn average_iterations(&self) -> f64 {
        if self.invocations == 0 {
            0.0
        } else {
            self.iterations as f64 / self.invocations as f64
        }
    }
}

/**
 * State of one whole-module run. Per-function phases run first; the call graph closure
 * runs as a barrier once every function is built; the loop passes run last.
 **/
#[derive(Default)]
pub struct AnalysisContext {
    pub options: AnalysisOptions,
    pub diag: DiagnosticContext,
    pub functions: Vec<FunctionAnalysis>,
    /** Functions whose analysis failed, by id. */
    pub unavailable: BTreeMap<usize, String>,
    profiles: Option<BTreeMap<usize, LoopProfile>>,
}

impl AnalysisContext {
    pub fn new(options: AnalysisOptions) -> AnalysisContext {
        Self {
            options,
            ..Default::default()
        }
    }

    pub fn with_profiles(mut self, profiles: Vec<LoopProfile>) -> AnalysisContext {
        self.profiles = Some(profiles.into_iter().map(|p| (p.id, p)).collect());
        self
    }

    /// Whether `l` is skipped by the profiling gate or the manual selection.
    fn is_removed(&self, l: &Loop) -> bool {
        if let Some(sel) = &self.options.selected_loops {
            if !sel.contains(&l.id) {
                return true;
            }
        }
        match &self.profiles {
            None => false,
            Some(p) => match p.get(&l.id) {
                Some(x) => {
                    x.coverage <= self.options.coverage_threshold
                        || x.average_iterations() <= self.options.min_iteration_count
                }
                None => true,
            },
        }
    }

    pub fn run(&mut self, mut funcs: Vec<Function>) -> Report {
        let mut entries = HashMap::new();
        for (id, f) in funcs.iter_mut().enumerate() {
            f.id = id;
            entries.entry(f.entry).or_insert(id);
        }
        let n = funcs.len();
        let mut calls = vec![BTreeSet::new(); n];
        let mut next_loop_id = 0;

        for mut f in funcs {
            let (id, name, entry) = (f.id, f.name.clone(), f.entry);
            let built = cfg::build(&mut f, &entries, self.options.max_block_instructions, &self.diag)
                .and_then(|_| {
                    calls[id] = f.calls.clone();
                    FunctionAnalysis::new(f, next_loop_id, &self.options, &self.diag)
                });
            match built {
                Ok(fa) => {
                    log::debug!("{}: {} loops", name, fa.loops.len());
                    next_loop_id += fa.loops.len();
                    self.functions.push(fa);
                }
                Err(e) => {
                    self.diag.record(Remark::function(&name, entry, e));
                    self.unavailable.insert(id, name);
                }
            }
        }

        let closure = match transitive_calls(&calls, self.options.fixpoint_limit) {
            Ok(c) => c,
            Err(e) => {
                self.diag.record(Remark::listing(Error::NonConvergence(e), None));
                calls
            }
        };
        for fa in self.functions.iter_mut() {
            fa.set_call_info(&entries, &closure, &self.diag);
        }

        let removed = self
            .functions
            .iter()
            .map(|fa| fa.loops.loops().iter().map(|l| self.is_removed(l)).collect::<Vec<_>>())
            .collect::<Vec<_>>();
        for (fa, removed) in self.functions.iter_mut().zip(removed) {
            for (l, r) in fa.loops.loops.iter_mut().zip(removed) {
                l.removed = r;
            }
            fa.analyze_loops(&self.diag);
        }
        self.report()
    }

    pub fn report(&self) -> Report {
        let mut r = Report::default();
        for fa in self.functions.iter() {
            for l in fa.loops.loops() {
                let verdict = l.verdict().unwrap_or(Verdict::Unsafe);
                let start_pc = fa.func.basic_blocks[l.start]
                    .instructions(&fa.func)
                    .first()
                    .map_or(fa.func.entry, |i| i.pc);
                r.add(LoopSummary {
                    id: l.id,
                    function: fa.func.name.clone(),
                    start_pc,
                    level: l.level(),
                    verdict,
                    iterators: l.iterators().len(),
                    static_iter_count: l.static_iter_count(),
                    runtime_checks: if verdict == Verdict::NeedsRuntimeCheck {
                        l.alias().arrays_to_check.len()
                    } else {
                        0
                    },
                    profiles: l.encoded_variables().to_vec(),
                });
            }
        }
        r.unavailable = self.unavailable.values().cloned().collect();
        r
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StructuralError;
    use crate::tests::programs::{copy_loop, counted_loop, shifted_write_loop, Bound};

    fn profile(id: usize, coverage: f64, invocations: u64, iterations: u64) -> LoopProfile {
        LoopProfile {
            id,
            coverage,
            invocations,
            iterations,
        }
    }

    #[test]
    fn test_global_loop_ids() {
        let mut ctx = AnalysisContext::new(AnalysisOptions::default());
        let report = ctx.run(vec![copy_loop(), shifted_write_loop(), counted_loop(Bound::Immediate(100))]);
        assert_eq!(3, report.len());
        let ids = report.loops.iter().map(|l| (l.id, l.function.as_str())).collect::<Vec<_>>();
        assert_eq!(vec![(0, "copy_loop"), (1, "shifted_write_loop"), (2, "counted_loop")], ids);
        assert_eq!(2, report.count(Verdict::Doall));
        assert_eq!(1, report.count(Verdict::Unsafe));
    }

    #[test]
    fn test_profiling_gate() {
        let mut ctx = AnalysisContext::new(AnalysisOptions::default()).with_profiles(vec![
            profile(0, 30.0, 10, 1000),
            profile(1, 0.5, 10, 1000),
            profile(2, 30.0, 10, 100),
        ]);
        let report = ctx.run(vec![copy_loop(), copy_loop(), copy_loop(), copy_loop()]);
        let verdicts = report.loops.iter().map(|l| l.verdict).collect::<Vec<_>>();
        // low coverage, few iterations per call, and no measurement at all
        assert_eq!(
            vec![Verdict::Doall, Verdict::Removed, Verdict::Removed, Verdict::Removed],
            verdicts
        );
    }

    #[test]
    fn test_manual_selection() {
        let options = AnalysisOptions {
            selected_loops: Some(BTreeSet::from([1])),
            ..Default::default()
        };
        let mut ctx = AnalysisContext::new(options);
        let report = ctx.run(vec![copy_loop(), copy_loop()]);
        assert_eq!(Verdict::Removed, report.loops[0].verdict);
        assert_eq!(Verdict::Doall, report.loops[1].verdict);
    }

    #[test]
    fn test_broken_function_is_unavailable() {
        let mut ctx = AnalysisContext::new(AnalysisOptions::default());
        let report = ctx.run(vec![Function::new(0, "empty", 0x800, vec![]), copy_loop()]);
        assert_eq!(vec!["empty".to_string()], report.unavailable);
        assert_eq!(1, report.count(Verdict::Doall));
        let remarks = ctx.diag.remarks();
        assert!(remarks
            .iter()
            .any(|r| matches!(r.error(), Error::StructuralError(StructuralError::EmptyFunction))));
    }
}
