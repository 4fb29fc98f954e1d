//! Live intervals (§3 "Live interval", §4.7 step 7, §9 Open Question: "the
//! canonical path is `MIR/LiveInterval` via `computeLiveRange`").
//!
//! A half-open integer range `[begin, end)` over a per-function linear
//! program-point numbering; two intervals interfere iff they overlap. This
//! is the input to register allocation's interference graph (§4.8.2).

use crate::common::fx_hash::{FxHashMap, FxHashSet};
use crate::mir::function::MirFunction;
use crate::mir::register::RegisterId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct LiveInterval {
    pub begin: u32,
    pub end: u32,
}

impl LiveInterval {
    pub fn overlaps(&self, other: &LiveInterval) -> bool {
        self.begin < other.end && other.begin < self.end
    }

    pub fn contains(&self, point: u32) -> bool {
        self.begin <= point && point < self.end
    }
}

/// Assigns every instruction a program point by walking `block_order`
/// linearly; returns the point immediately following the function's last
/// instruction (used as a block's "live past the exit" marker).
pub fn linearize(f: &MirFunction) -> (FxHashMap<crate::mir::function::MirBlockId, (u32, u32)>, u32) {
    let mut ranges = FxHashMap::default();
    let mut point = 0u32;
    for block in f.blocks_in_order() {
        let start = point;
        point += block.insts.len() as u32;
        ranges.insert(block.id, (start, point));
    }
    (ranges, point)
}

/// Two interfering registers cannot share a color (§4.8.2). This walks the
/// function once, marking every program point at which a register is live
/// (from the block-level `live_in`/`live_out` sets populated by
/// [`crate::mir::liveness`], refined by per-instruction def/use), then
/// collapses each register's marked points into maximal half-open
/// intervals.
pub fn compute_live_range(f: &MirFunction) -> FxHashMap<RegisterId, Vec<LiveInterval>> {
    let (block_ranges, _total) = linearize(f);
    let mut points: FxHashMap<RegisterId, FxHashSet<u32>> = FxHashMap::default();

    for block in f.blocks_in_order() {
        let (start, end) = block_ranges[&block.id];
        for &r in &block.live_in {
            points.entry(r).or_default().insert(start);
        }
        for (idx, &inst_id) in block.insts.iter().enumerate() {
            let p = start + idx as u32;
            let inst = f.inst(inst_id);
            for op in &inst.operands {
                if let Some(r) = op.as_reg() {
                    points.entry(r).or_default().insert(p);
                }
            }
            for &d in &inst.dests {
                points.entry(d).or_default().insert(p);
            }
        }
        for &r in &block.live_out {
            points.entry(r).or_default().insert(end);
        }
        let _ = end;
    }

    let mut result = FxHashMap::default();
    for (reg, pts) in points {
        let mut sorted: Vec<u32> = pts.into_iter().collect();
        sorted.sort_unstable();
        let mut intervals = Vec::new();
        let mut iter = sorted.into_iter();
        if let Some(first) = iter.next() {
            let mut begin = first;
            let mut end = first + 1;
            for p in iter {
                if p <= end {
                    end = p + 1;
                } else {
                    intervals.push(LiveInterval { begin, end });
                    begin = p;
                    end = p + 1;
                }
            }
            intervals.push(LiveInterval { begin, end });
        }
        result.insert(reg, intervals);
    }
    result
}

/// Do the live ranges of `a` and `b` interfere (overlap anywhere)?
pub fn interferes(a: &[LiveInterval], b: &[LiveInterval]) -> bool {
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        if a[i].overlaps(&b[j]) {
            return true;
        }
        if a[i].end <= b[j].end {
            i += 1;
        } else {
            j += 1;
        }
    }
    false
}
