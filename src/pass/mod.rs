//! Pass manager (§4.4): registration, the pipeline DSL, and fixed-point
//! scheduling of passes over an IR module.

pub mod dsl;

use crate::common::fx_hash::FxHashMap;
use crate::ir::context::Context;
use crate::ir::function::FuncId;
use crate::ir::module::Module;

pub use dsl::{parse_pipeline, pipeline_for_opt_level};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassCategory {
    Simplification,
    Optimization,
    Analysis,
    Other,
}

/// Operates on one IR function; returns whether it changed anything (§4.5:
/// "must either leave the function structurally unchanged and return
/// false, or leave it well-formed and return true").
pub trait FunctionPass {
    fn name(&self) -> &'static str;
    fn category(&self) -> PassCategory {
        PassCategory::Optimization
    }
    fn run(&self, cx: &mut Context, module: &mut Module, func: FuncId) -> bool;
}

/// Operates on a whole module, typically by dispatching function passes via
/// `forEach` (§4.4).
pub trait ModulePass {
    fn name(&self) -> &'static str;
    fn category(&self) -> PassCategory {
        PassCategory::Optimization
    }
    fn run(&self, cx: &mut Context, module: &mut Module) -> bool;
}

/// Runs `pass` over every non-foreign function in `module`; used both as
/// the default module-pass dispatch and directly by the pipeline executor.
pub fn for_each_function(cx: &mut Context, module: &mut Module, pass: &dyn FunctionPass) -> bool {
    let mut changed = false;
    for id in module.function_ids().collect::<Vec<_>>() {
        if module.function(id).is_foreign {
            continue;
        }
        if pass.run(cx, module, id) {
            changed = true;
        }
    }
    changed
}

pub(crate) enum PassEntry {
    Function(fn() -> Box<dyn FunctionPass>),
    /// A module pass that may be parameterized by a nested sub-pipeline,
    /// e.g. `inline(sroa, memtoreg)` (§6 "Pipeline DSL").
    Module(fn(Option<Pipeline>) -> Box<dyn ModulePass>),
}

/// Process-wide pass registry (§9 "Global mutable state": "a rewrite should
/// initialize it once at startup via a single registration step and keep it
/// immutable thereafter").
pub struct PassRegistry {
    entries: FxHashMap<&'static str, PassEntry>,
}

impl PassRegistry {
    fn new() -> Self {
        let mut entries: FxHashMap<&'static str, PassEntry> = FxHashMap::default();
        entries.insert("canonicalize", PassEntry::Function(|| Box::new(crate::opt::canonicalize::Canonicalize)));
        entries.insert("sroa", PassEntry::Function(|| Box::new(crate::opt::sroa::Sroa)));
        entries.insert("memtoreg", PassEntry::Function(|| Box::new(crate::opt::mem2reg::Mem2Reg)));
        entries.insert("instcombine", PassEntry::Function(|| Box::new(crate::opt::instcombine::InstCombine)));
        entries.insert("gvn", PassEntry::Function(|| Box::new(crate::opt::gvn::Gvn)));
        entries.insert("dce", PassEntry::Function(|| Box::new(crate::opt::dce::Dce)));
        entries.insert("looprotate", PassEntry::Function(|| Box::new(crate::opt::loop_rotate::LoopRotate)));
        entries.insert("tailcall", PassEntry::Function(|| Box::new(crate::opt::tailcall::TailCallMark)));
        entries.insert(
            "inline",
            PassEntry::Module(|sub| Box::new(crate::opt::inline::Inline::new(sub))),
        );
        Self { entries }
    }

    pub fn global() -> &'static PassRegistry {
        static REGISTRY: std::sync::OnceLock<PassRegistry> = std::sync::OnceLock::new();
        REGISTRY.get_or_init(PassRegistry::new)
    }

    pub fn has(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub(crate) fn entry(&self, name: &str) -> Option<&PassEntry> {
        self.entries.get(name)
    }
}

/// One node of an executable pipeline: either a function pass run over
/// every function, or a module pass (possibly carrying its own nested
/// sub-pipeline, e.g. the inliner's argument list).
pub(crate) enum Step {
    Function(Box<dyn FunctionPass>),
    Module(Box<dyn ModulePass>),
}

/// A composed, executable sequence of passes (§4.4 "Pipeline").
pub struct Pipeline {
    steps: Vec<Step>,
}

impl Pipeline {
    pub fn empty() -> Self {
        Self { steps: Vec::new() }
    }

    pub(crate) fn from_steps(steps: Vec<Step>) -> Self {
        Self { steps }
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Runs every step once, in textual order, over `module`. Returns
    /// whether anything changed (§4.4 "Execution guarantees": "passes run
    /// sequentially on a single thread; each pass sees the module in a
    /// consistent state").
    pub fn run_once(&self, cx: &mut Context, module: &mut Module) -> bool {
        let mut changed = false;
        for step in &self.steps {
            let step_changed = match step {
                Step::Function(p) => for_each_function(cx, module, p.as_ref()),
                Step::Module(p) => p.run(cx, module),
            };
            changed |= step_changed;
        }
        changed
    }

    /// Runs the whole pipeline repeatedly until a fixed point: a full pass
    /// over every step reports no change (§4.4: "a pass that reports no
    /// change after another pass reported no change terminates any outer
    /// fixed-point loop").
    pub fn run_to_fixpoint(&self, cx: &mut Context, module: &mut Module, max_iters: u32) -> bool {
        let mut changed_ever = false;
        for _ in 0..max_iters {
            if !self.run_once(cx, module) {
                break;
            }
            changed_ever = true;
        }
        changed_ever
    }
}

