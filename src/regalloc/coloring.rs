//! Steps 2 (coalescing half) and 3 (§4.8): Chaitin-style simplify/select
//! coloring with move coalescing. There is no fixed color budget here (the
//! VM has no bounded hardware-register file; §4.8 step 3: "the resulting
//! color count determines the function's hardware-register bank size"), so
//! simplification never needs to spill — every node is eventually
//! removable. The only fixed constraint is that a register marked `fixed`
//! (an ABI argument/return slot) must receive the color equal to its own
//! index, since those positions are meaningful to callers.

use crate::common::fx_hash::FxHashMap;
use crate::mir::function::MirFunction;
use crate::mir::register::RegisterId;
use crate::regalloc::interference::{merge_coalesced, remove_for_simplify, InterferenceGraph};

pub struct Coloring {
    colors: FxHashMap<RegisterId, u32>,
    num_colors: u32,
}

impl Coloring {
    pub fn color_of(&self, r: RegisterId) -> u32 {
        self.colors.get(&r).copied().unwrap_or(r.index)
    }

    pub fn num_colors(&self) -> u32 {
        self.num_colors
    }
}

fn find(union: &FxHashMap<RegisterId, RegisterId>, mut r: RegisterId) -> RegisterId {
    while let Some(&next) = union.get(&r) {
        if next == r {
            break;
        }
        r = next;
    }
    r
}

/// Greedily coalesces every copy-derived hint whose endpoints do not
/// interfere, merging `b` into `a` (§4.8 step 2: "copies are treated as
/// coalescing hints"). Returns a union-find map from every dropped
/// register to the node it was merged into (possibly several hops, since a
/// surviving node of one merge may itself later be dropped into another).
fn coalesce(graph: &mut InterferenceGraph) -> FxHashMap<RegisterId, RegisterId> {
    let mut union: FxHashMap<RegisterId, RegisterId> = FxHashMap::default();

    let hints = graph.hints.clone();
    for hint in hints {
        let a = find(&union, hint.a);
        let b = find(&union, hint.b);
        if a == b {
            continue;
        }
        if graph.fixed.contains_key(&a) && graph.fixed.contains_key(&b) {
            // Both pinned to distinct ABI slots; the copy must stay.
            continue;
        }
        if graph.interferes(a, b) {
            continue;
        }
        let (keep, drop) = if graph.fixed.contains_key(&b) { (b, a) } else { (a, b) };
        merge_coalesced(graph, keep, drop);
        union.insert(drop, keep);
    }
    union
}

/// Step 3: push every node onto a stack in ascending-degree order (nothing
/// here bounds the color count, so every node is always simplifiable —
/// there is no spill case to fall back to); pop in reverse and assign each
/// the lowest color not already taken by a neighbor that was colored
/// earlier in the pop order.
pub fn coalesce_and_color(f: &MirFunction, graph_in: &InterferenceGraph) -> Coloring {
    let mut graph = graph_in.clone();
    let union = coalesce(&mut graph);

    // Snapshot the post-coalesce adjacency before simplify starts removing
    // nodes from `graph`; select-phase neighbor lookups need the full
    // (coalesced) graph, not the node's degree-reduced state at push time.
    let snapshot: FxHashMap<RegisterId, Vec<RegisterId>> = graph.nodes.iter().map(|&r| (r, graph.neighbors(r).copied().collect())).collect();

    let mut colors: FxHashMap<RegisterId, u32> = FxHashMap::default();
    for (&r, &idx) in &graph.fixed {
        colors.insert(r, idx);
    }

    let mut stack = Vec::new();
    let mut remaining: Vec<RegisterId> = graph.nodes.iter().copied().filter(|r| !graph.fixed.contains_key(r)).collect();
    while let Some(pos) = remaining.iter().enumerate().min_by_key(|(_, &r)| graph.degree(r)).map(|(i, _)| i) {
        let r = remaining.remove(pos);
        stack.push(r);
        remove_for_simplify(&mut graph, r);
    }

    while let Some(r) = stack.pop() {
        let used: std::collections::BTreeSet<u32> = snapshot.get(&r).into_iter().flatten().filter_map(|n| colors.get(n).copied()).collect();
        let mut color = 0u32;
        while used.contains(&color) {
            color += 1;
        }
        colors.insert(r, color);
    }

    // Propagate colors to every coalesced-away register via its surviving
    // representative.
    for &dropped in union.keys() {
        let root = find(&union, dropped);
        let color = colors.get(&root).copied().unwrap_or(0);
        colors.insert(dropped, color);
    }

    let num_colors = colors.values().copied().max().map_or(0, |m| m + 1);
    let _ = f;
    Coloring { colors, num_colors }
}
