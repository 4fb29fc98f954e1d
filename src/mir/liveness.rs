//! SSA-form liveness over MIR (§4.3 "Liveness", §9 Open Question: grounded
//! on the original `lib/CodeGen/DataFlow.cc`, the canonical path per the
//! resolved ambiguity in §9 being `MIR/LiveInterval::computeLiveRange` for
//! the final per-register ranges; this module produces the block-level
//! `liveIn`/`liveOut` sets that feed that computation and SSA destruction
//! (§4.7 "Input: MIR function in SSA form with liveness computed").

use crate::common::fx_hash::{FxHashMap, FxHashSet};
use crate::mir::function::{MirBlockId, MirFunction};
use crate::mir::instruction::MirOpcode;
use crate::mir::register::RegisterId;

fn phi_dests(f: &MirFunction, block: MirBlockId) -> FxHashSet<RegisterId> {
    let mut out = FxHashSet::default();
    for &inst_id in &f.block(block).insts {
        let inst = f.inst(inst_id);
        if matches!(inst.opcode, MirOpcode::Phi { .. }) {
            out.extend(inst.dests.iter().copied());
        } else {
            break;
        }
    }
    out
}

/// Registers this block's own phi instructions use on the edge coming
/// specifically from `pred` (the value selected for that predecessor).
fn phi_uses_from(f: &MirFunction, block: MirBlockId, pred: MirBlockId) -> FxHashSet<RegisterId> {
    let mut out = FxHashSet::default();
    for &inst_id in &f.block(block).insts {
        let inst = f.inst(inst_id);
        if let MirOpcode::Phi { incoming } = &inst.opcode {
            for (slot, &from) in incoming.iter().enumerate() {
                if from == pred {
                    if let Some(r) = inst.operands.get(slot).and_then(|o| o.as_reg()) {
                        out.insert(r);
                    }
                }
            }
        } else {
            break;
        }
    }
    out
}

/// All registers any phi in `block` reads, regardless of predecessor
/// (used for "phi-uses in this block" in the liveOut formula of §4.3).
fn all_phi_uses(f: &MirFunction, block: MirBlockId) -> FxHashSet<RegisterId> {
    let mut out = FxHashSet::default();
    for &inst_id in &f.block(block).insts {
        let inst = f.inst(inst_id);
        if matches!(inst.opcode, MirOpcode::Phi { .. }) {
            for op in &inst.operands {
                if let Some(r) = op.as_reg() {
                    out.insert(r);
                }
            }
        } else {
            break;
        }
    }
    out
}

fn reverse_postorder(f: &MirFunction) -> Vec<MirBlockId> {
    let Some(entry) = f.entry() else { return Vec::new() };
    let mut visited = FxHashSet::default();
    let mut post = Vec::new();
    let mut stack = vec![(entry, false)];
    while let Some((b, done)) = stack.pop() {
        if done {
            post.push(b);
            continue;
        }
        if !visited.insert(b) {
            continue;
        }
        stack.push((b, true));
        for &s in &f.block(b).succs {
            if !visited.contains(&s) {
                stack.push((s, false));
            }
        }
    }
    post.reverse();
    post
}

/// Back edges `(tail, header)` and, for each header, the set of blocks in
/// its natural loop body (needed by pass two, §4.3).
fn loops(f: &MirFunction) -> Vec<(MirBlockId, FxHashSet<MirBlockId>)> {
    let Some(entry) = f.entry() else { return Vec::new() };
    let mut visited = FxHashSet::default();
    let mut on_stack = FxHashSet::default();
    let mut back_edges = Vec::new();

    fn dfs(
        f: &MirFunction,
        node: MirBlockId,
        visited: &mut FxHashSet<MirBlockId>,
        on_stack: &mut FxHashSet<MirBlockId>,
        back_edges: &mut Vec<(MirBlockId, MirBlockId)>,
    ) {
        visited.insert(node);
        on_stack.insert(node);
        for &s in &f.block(node).succs {
            if on_stack.contains(&s) {
                back_edges.push((node, s));
            } else if !visited.contains(&s) {
                dfs(f, s, visited, on_stack, back_edges);
            }
        }
        on_stack.remove(&node);
    }
    dfs(f, entry, &mut visited, &mut on_stack, &mut back_edges);

    let mut by_header: FxHashMap<MirBlockId, FxHashSet<MirBlockId>> = FxHashMap::default();
    for (tail, header) in back_edges {
        let body = by_header.entry(header).or_default();
        body.insert(header);
        let mut stack = vec![tail];
        while let Some(n) = stack.pop() {
            if body.insert(n) {
                if n != header {
                    for &p in &f.block(n).preds {
                        stack.push(p);
                    }
                }
            }
        }
    }
    by_header.into_iter().collect()
}

/// Computes and writes `live_in`/`live_out` on every block (§4.3: pass one
/// is an iterative fixed point over reverse post-order — required because
/// loop back edges make a single backward sweep insufficient; pass two
/// then widens liveness across each loop body).
pub fn compute(f: &mut MirFunction) {
    let order = reverse_postorder(f);
    if order.is_empty() {
        return;
    }

    let phi_dests_by_block: FxHashMap<MirBlockId, FxHashSet<RegisterId>> =
        order.iter().map(|&b| (b, phi_dests(f, b))).collect();
    let phi_uses_by_block: FxHashMap<MirBlockId, FxHashSet<RegisterId>> =
        order.iter().map(|&b| (b, all_phi_uses(f, b))).collect();

    let mut live_in: FxHashMap<MirBlockId, FxHashSet<RegisterId>> =
        order.iter().map(|&b| (b, FxHashSet::default())).collect();
    let mut live_out: FxHashMap<MirBlockId, FxHashSet<RegisterId>> =
        order.iter().map(|&b| (b, FxHashSet::default())).collect();

    let mut changed = true;
    while changed {
        changed = false;
        for &b in order.iter().rev() {
            // liveOut(B) = phi-uses(B) U phi-uses-from-B-in-successors U
            // return-operands(B) U (liveIn(S) - phiDests(S)) for S in succ(B)
            let mut out: FxHashSet<RegisterId> = phi_uses_by_block[&b].clone();
            for &s in &f.block(b).succs {
                out.extend(phi_uses_from(f, s, b));
                let s_in = &live_in[&s];
                let s_phi_dests = &phi_dests_by_block[&s];
                out.extend(s_in.iter().filter(|r| !s_phi_dests.contains(r)).copied());
            }
            if let Some(term) = f.block(b).terminator() {
                if matches!(f.inst(term).opcode, MirOpcode::Return) {
                    for op in &f.inst(term).operands {
                        if let Some(r) = op.as_reg() {
                            out.insert(r);
                        }
                    }
                }
            }

            // liveIn(B) = (liveOut(B) - defs(B)) + uses(B), reverse walk,
            // plus B's own phi destinations.
            let mut cur = out.clone();
            for &inst_id in f.block(b).insts.iter().rev() {
                let inst = f.inst(inst_id);
                if matches!(inst.opcode, MirOpcode::Phi { .. }) {
                    continue;
                }
                for &d in &inst.dests {
                    cur.remove(&d);
                }
                for op in &inst.operands {
                    if let Some(r) = op.as_reg() {
                        cur.insert(r);
                    }
                }
            }
            cur.extend(phi_dests_by_block[&b].iter().copied());

            if out != live_out[&b] {
                live_out.insert(b, out);
                changed = true;
            }
            if cur != live_in[&b] {
                live_in.insert(b, cur);
                changed = true;
            }
        }
    }

    // Pass two (§4.3): for every loop header, widen liveness across the
    // whole loop body by the header's own incoming liveness minus its phi
    // destinations (registers that must stay live for the back edge).
    for (header, body) in loops(f) {
        let widen: FxHashSet<RegisterId> = live_in[&header]
            .iter()
            .filter(|r| !phi_dests_by_block[&header].contains(r))
            .copied()
            .collect();
        for &b in &body {
            live_in.get_mut(&b).unwrap().extend(widen.iter().copied());
            live_out.get_mut(&b).unwrap().extend(widen.iter().copied());
        }
    }

    for &b in order.iter() {
        f.block_mut(b).live_in = live_in.remove(&b).unwrap_or_default();
        f.block_mut(b).live_out = live_out.remove(&b).unwrap_or_default();
    }
}
