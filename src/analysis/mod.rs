//! Analyses over IR functions (§4.3): dominance, loop-nesting, and pointer
//! provenance. SSA-register liveness is computed later, over MIR, in
//! [`crate::mir::liveness`] (see §4.7's "Input: MIR function in SSA form
//! with liveness computed").

pub mod dominance;
pub mod loopnest;
pub mod provenance;

use crate::ir::function::{FuncId, Function};

/// Returns (computing if necessary) the dominator tree, caching it on the
/// function until the next structural mutation (§4.2).
pub fn dominance_of<'f>(f: &'f mut Function) -> &'f dominance::DomTree {
    let version = f.analyses.version;
    if f.analyses.dominance.as_ref().map(|(v, _)| *v) != Some(version) {
        let dt = dominance::dominance_tree(f);
        f.analyses.dominance = Some((version, dt));
    }
    &f.analyses.dominance.as_ref().unwrap().1
}

pub fn post_dominance_of<'f>(f: &'f mut Function) -> &'f dominance::DomTree {
    let version = f.analyses.version;
    if f.analyses.post_dominance.as_ref().map(|(v, _)| *v) != Some(version) {
        let dt = dominance::post_dominance_tree(f);
        f.analyses.post_dominance = Some((version, dt));
    }
    &f.analyses.post_dominance.as_ref().unwrap().1
}

pub fn loop_forest_of<'f>(f: &'f mut Function) -> &'f loopnest::LoopForest {
    let version = f.analyses.version;
    if f.analyses.loop_forest.as_ref().map(|(v, _)| *v) != Some(version) {
        let lnf = loopnest::loop_forest(f);
        f.analyses.loop_forest = Some((version, lnf));
    }
    &f.analyses.loop_forest.as_ref().unwrap().1
}

pub fn analyze_provenance(func_id: FuncId, f: &mut Function) {
    provenance::analyze(func_id, f);
}
