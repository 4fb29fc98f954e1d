//! Dominance and post-dominance trees (§4.3 "Dominance").
//!
//! Computed iteratively over reverse-post-order until a fixed point, the
//! standard Cooper/Harvey/Kennedy algorithm. Post-dominance reuses the same
//! routine on the reversed CFG with a synthetic exit node.

use crate::common::fx_hash::FxHashMap;
use crate::ir::function::{BlockId, Function};

#[derive(Debug, Clone, Default)]
pub struct DomTree {
    /// Immediate dominator of each block; the entry (or synthetic exit, for
    /// post-dominance) has no entry here.
    idom: FxHashMap<BlockId, BlockId>,
    children: FxHashMap<BlockId, Vec<BlockId>>,
    root: Option<BlockId>,
}

impl DomTree {
    pub fn idom(&self, b: BlockId) -> Option<BlockId> {
        self.idom.get(&b).copied()
    }

    pub fn children(&self, b: BlockId) -> &[BlockId] {
        self.children.get(&b).map_or(&[], |v| v.as_slice())
    }

    pub fn root(&self) -> Option<BlockId> {
        self.root
    }

    /// `dominates(a, b)`: true iff `a` lies on every path from the root to
    /// `b`, including `a == b`. O(tree height) by walking idom links.
    pub fn dominates(&self, a: BlockId, mut b: BlockId) -> bool {
        loop {
            if a == b {
                return true;
            }
            match self.idom(b) {
                Some(p) => b = p,
                None => return false,
            }
        }
    }
}

fn reverse_postorder(entry: BlockId, succs: impl Fn(BlockId) -> Vec<BlockId>) -> Vec<BlockId> {
    let mut visited = crate::common::fx_hash::FxHashSet::default();
    let mut postorder = Vec::new();
    let mut stack = vec![(entry, false)];
    while let Some((node, processed)) = stack.pop() {
        if processed {
            postorder.push(node);
            continue;
        }
        if !visited.insert(node) {
            continue;
        }
        stack.push((node, true));
        for s in succs(node) {
            if !visited.contains(&s) {
                stack.push((s, false));
            }
        }
    }
    postorder.reverse();
    postorder
}

/// Builds a dominator tree given the `entry` node, a `succs` function, and
/// a `preds` function (reversed for post-dominance).
fn compute(
    entry: BlockId,
    order: &[BlockId],
    preds: impl Fn(BlockId) -> Vec<BlockId>,
) -> DomTree {
    let rpo_index: FxHashMap<BlockId, usize> =
        order.iter().enumerate().map(|(i, &b)| (b, i)).collect();

    let mut idom: FxHashMap<BlockId, BlockId> = FxHashMap::default();
    idom.insert(entry, entry);

    let mut changed = true;
    while changed {
        changed = false;
        for &b in order.iter() {
            if b == entry {
                continue;
            }
            let mut new_idom: Option<BlockId> = None;
            for p in preds(b) {
                if !idom.contains_key(&p) {
                    continue;
                }
                new_idom = Some(match new_idom {
                    None => p,
                    Some(cur) => intersect(&idom, &rpo_index, cur, p),
                });
            }
            if let Some(ni) = new_idom {
                if idom.get(&b) != Some(&ni) {
                    idom.insert(b, ni);
                    changed = true;
                }
            }
        }
    }
    idom.remove(&entry);

    let mut children: FxHashMap<BlockId, Vec<BlockId>> = FxHashMap::default();
    for (&b, &p) in idom.iter() {
        children.entry(p).or_default().push(b);
    }
    DomTree { idom, children, root: Some(entry) }
}

fn intersect(
    idom: &FxHashMap<BlockId, BlockId>,
    rpo_index: &FxHashMap<BlockId, usize>,
    mut a: BlockId,
    mut b: BlockId,
) -> BlockId {
    while a != b {
        while rpo_index[&a] > rpo_index[&b] {
            a = idom[&a];
        }
        while rpo_index[&b] > rpo_index[&a] {
            b = idom[&b];
        }
    }
    a
}

pub fn dominance_tree(f: &Function) -> DomTree {
    let entry = match f.entry() {
        Some(e) => e,
        None => return DomTree::default(),
    };
    let order = reverse_postorder(entry, |b| f.block(b).succs.clone());
    compute(entry, &order, |b| f.block(b).preds.iter().copied().collect())
}

/// Post-dominance: same algorithm on the reversed CFG. All blocks that
/// return are treated as predecessors of a synthetic exit; since we have no
/// single materialized exit node we instead run the fixed point over every
/// block that has no successors as a joint root, using the first such block
/// as the nominal tree root (callers needing a single rooted tree for a
/// function with one exit get an exact tree; multi-exit functions get a
/// best-effort forest rooted at the first exit, sufficient for the code
/// motion queries §4.3 names).
pub fn post_dominance_tree(f: &Function) -> DomTree {
    let exits: Vec<BlockId> = f
        .block_ids()
        .filter(|&b| f.block(b).succs.is_empty())
        .collect();
    let Some(&root) = exits.first() else {
        return DomTree::default();
    };
    let order = reverse_postorder(root, |b| f.block(b).preds.iter().copied().collect());
    compute(root, &order, |b| f.block(b).succs.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::context::Context;
    use crate::ir::instruction::{Instruction, Opcode};
    use crate::ir::module::Module;
    use crate::ir::value::ValueRef;
    use smallvec::smallvec;

    fn diamond() -> (Module, crate::ir::function::FuncId) {
        let mut cx = Context::new();
        let i32t = cx.int_type(32);
        let mut m = Module::new("t");
        let f = m.declare_function("diamond", i32t, vec![], false);
        let func = m.function_mut(f);
        let entry = func.push_block("entry");
        let left = func.push_block("left");
        let right = func.push_block("right");
        let join = func.push_block("join");

        let mut builder = crate::ir::builder::IrBuilder::new(&mut m);
        let c = ValueRef::Const(cx.int_constant(1, 1));
        let br = Instruction {
            id: dummy_inst_id(),
            opcode: Opcode::Branch,
            operands: smallvec![c, ValueRef::Block(f, left), ValueRef::Block(f, right)],
            ty: cx.void_type(),
            name: None,
            parent: entry,
            pointer_info: None,
        };
        builder.insert(f, entry, None, br);
        let goto_join_l = Instruction {
            id: dummy_inst_id(),
            opcode: Opcode::Goto,
            operands: smallvec![ValueRef::Block(f, join)],
            ty: cx.void_type(),
            name: None,
            parent: left,
            pointer_info: None,
        };
        builder.insert(f, left, None, goto_join_l);
        let goto_join_r = Instruction {
            id: dummy_inst_id(),
            opcode: Opcode::Goto,
            operands: smallvec![ValueRef::Block(f, join)],
            ty: cx.void_type(),
            name: None,
            parent: right,
            pointer_info: None,
        };
        builder.insert(f, right, None, goto_join_r);
        let ret = Instruction {
            id: dummy_inst_id(),
            opcode: Opcode::Return,
            operands: smallvec![],
            ty: cx.void_type(),
            name: None,
            parent: join,
            pointer_info: None,
        };
        builder.insert(f, join, None, ret);
        (m, f)
    }

    fn dummy_inst_id() -> crate::ir::function::InstId {
        crate::ir::function::InstId(0)
    }

    #[test]
    fn diamond_join_dominated_only_by_entry() {
        let (m, f) = diamond();
        let func = m.function(f);
        let dt = dominance_tree(func);
        let entry = func.block_order[0];
        let left = func.block_order[1];
        let right = func.block_order[2];
        let join = func.block_order[3];
        assert!(dt.dominates(entry, join));
        assert!(!dt.dominates(left, join));
        assert!(!dt.dominates(right, join));
        assert_eq!(dt.idom(join), Some(entry));
    }
}
