//! Step 2 (§4.8): interference graph construction. Nodes are virtual
//! registers; an edge connects two registers whose live ranges overlap.
//! Built directly from [`crate::mir::live_interval::compute_live_range`]
//! (recomputed here post-two-address-conversion, since inserted copies
//! shift program points) using the same
//! [`crate::mir::live_interval::interferes`] sweep the live-interval module
//! already exposes.

use crate::common::fx_hash::{FxHashMap, FxHashSet};
use crate::mir::function::MirFunction;
use crate::mir::instruction::MirOpcode;
use crate::mir::live_interval::{interferes, LiveInterval};
use crate::mir::register::{RegisterId, RegisterPool};

/// A copy's source and destination, recorded as a coalescing hint
/// (§4.8 step 2: "copies are treated as coalescing hints").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoalesceHint {
    pub a: RegisterId,
    pub b: RegisterId,
}

#[derive(Clone)]
pub struct InterferenceGraph {
    pub nodes: Vec<RegisterId>,
    edges: FxHashMap<RegisterId, FxHashSet<RegisterId>>,
    pub hints: Vec<CoalesceHint>,
    pub fixed: FxHashMap<RegisterId, u32>,
}

impl InterferenceGraph {
    pub fn neighbors(&self, r: RegisterId) -> impl Iterator<Item = &RegisterId> {
        self.edges.get(&r).into_iter().flatten()
    }

    pub fn degree(&self, r: RegisterId) -> usize {
        self.edges.get(&r).map_or(0, |s| s.len())
    }

    pub fn interferes(&self, a: RegisterId, b: RegisterId) -> bool {
        self.edges.get(&a).is_some_and(|s| s.contains(&b))
    }

    fn add_edge(&mut self, a: RegisterId, b: RegisterId) {
        if a == b {
            return;
        }
        self.edges.entry(a).or_default().insert(b);
        self.edges.entry(b).or_default().insert(a);
    }

    fn remove_node(&mut self, r: RegisterId) {
        if let Some(neighbors) = self.edges.remove(&r) {
            for n in neighbors {
                if let Some(set) = self.edges.get_mut(&n) {
                    set.remove(&r);
                }
            }
        }
    }

    /// Merges `b`'s edges into `a`, used by coalescing when a non-interfering
    /// copy's source and destination are unified into one node.
    fn merge_into(&mut self, a: RegisterId, b: RegisterId) {
        if let Some(b_neighbors) = self.edges.remove(&b) {
            for n in b_neighbors {
                if let Some(set) = self.edges.get_mut(&n) {
                    set.remove(&b);
                }
                if n != a {
                    self.add_edge(a, n);
                }
            }
        }
    }
}

/// Virtual registers only: the callee and hardware banks are not colored
/// by this allocator (callee registers get hardware slots directly in
/// `regalloc::allocate_callee_registers`; fixed virtual registers pin their
/// node's color instead of being excluded, since a call argument still
/// needs to interfere with whatever else is live across the call).
pub fn build_interference_graph(f: &MirFunction) -> InterferenceGraph {
    let intervals = crate::mir::live_interval::compute_live_range(f);
    // Every virtual register gets a node, even one with no live interval (a
    // call result the caller never reads): giving it an empty-edge node
    // here means select-phase coloring hands it the cheapest color instead
    // of `Coloring::color_of`'s raw-index fallback wasting a hardware slot.
    let vcount = f.regs.count(RegisterPool::Virtual) as u32;
    let virtuals: Vec<RegisterId> = (0..vcount).map(|i| RegisterId::new(RegisterPool::Virtual, i)).collect();

    let mut graph = InterferenceGraph { nodes: virtuals.clone(), edges: FxHashMap::default(), hints: Vec::new(), fixed: FxHashMap::default() };
    for &r in &virtuals {
        graph.edges.entry(r).or_default();
        if f.regs.is_fixed(r) {
            graph.fixed.insert(r, r.index);
        }
    }

    for i in 0..virtuals.len() {
        for j in (i + 1)..virtuals.len() {
            let (a, b) = (virtuals[i], virtuals[j]);
            let empty: Vec<LiveInterval> = Vec::new();
            let ia = intervals.get(&a).unwrap_or(&empty);
            let ib = intervals.get(&b).unwrap_or(&empty);
            if interferes(ia, ib) {
                graph.add_edge(a, b);
            }
        }
    }

    for (_, inst) in f.all_insts() {
        if matches!(inst.opcode, MirOpcode::Copy) {
            if let (Some(src), Some(&dst)) = (inst.operands.first().and_then(|o| o.as_reg()), inst.dests.first()) {
                if src.pool == RegisterPool::Virtual && dst.pool == RegisterPool::Virtual {
                    graph.hints.push(CoalesceHint { a: src, b: dst });
                }
            }
        }
    }

    graph
}

pub(super) fn merge_coalesced(graph: &mut InterferenceGraph, keep: RegisterId, drop: RegisterId) {
    graph.merge_into(keep, drop);
    graph.nodes.retain(|&r| r != drop);
}

pub(super) fn remove_for_simplify(graph: &mut InterferenceGraph, r: RegisterId) {
    graph.remove_node(r);
}
