//! Loop-nesting forest (§4.3 "Loop-Nesting Forest (LNF)").
//!
//! Each node is either a loop header (the target of a back edge) or an
//! ordinary block; headers own the set of blocks in their loop body and a
//! list of nested child loops. Computed via DFS with back-edge detection.

use crate::common::fx_hash::{FxHashMap, FxHashSet};
use crate::ir::function::{BlockId, Function};

#[derive(Debug, Clone)]
pub struct LoopNode {
    pub header: BlockId,
    /// All blocks belonging to this loop, including nested loops' blocks.
    pub body: FxHashSet<BlockId>,
    pub children: Vec<BlockId>,
    pub parent: Option<BlockId>,
}

/// Partitions a function's blocks: the `roots` are the outermost loop
/// headers and top-level non-loop blocks; `nodes` holds loop data for every
/// header.
#[derive(Debug, Clone, Default)]
pub struct LoopForest {
    nodes: FxHashMap<BlockId, LoopNode>,
    /// Maps every block to its innermost enclosing loop header, if any.
    enclosing: FxHashMap<BlockId, BlockId>,
}

impl LoopForest {
    pub fn is_loop_header(&self, b: BlockId) -> bool {
        self.nodes.contains_key(&b)
    }

    pub fn loop_of(&self, b: BlockId) -> Option<&LoopNode> {
        self.enclosing.get(&b).and_then(|h| self.nodes.get(h))
    }

    pub fn headers(&self) -> impl Iterator<Item = BlockId> + '_ {
        self.nodes.keys().copied()
    }

    pub fn node(&self, header: BlockId) -> Option<&LoopNode> {
        self.nodes.get(&header)
    }

    pub fn depth(&self, b: BlockId) -> u32 {
        let mut depth = 0;
        let mut cur = self.enclosing.get(&b).copied();
        while let Some(h) = cur {
            depth += 1;
            cur = self.nodes.get(&h).and_then(|n| n.parent);
        }
        depth
    }
}

/// DFS over the CFG, classifying edges to blocks already on the current
/// stack as back edges; the back-edge target is a loop header.
pub fn loop_forest(f: &Function) -> LoopForest {
    let Some(entry) = f.entry() else {
        return LoopForest::default();
    };

    let mut on_stack = FxHashSet::default();
    let mut visited = FxHashSet::default();
    let mut back_edges: Vec<(BlockId, BlockId)> = Vec::new(); // (tail, header)

    fn dfs(
        f: &Function,
        node: BlockId,
        visited: &mut FxHashSet<BlockId>,
        on_stack: &mut FxHashSet<BlockId>,
        back_edges: &mut Vec<(BlockId, BlockId)>,
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

    // Natural loop body of header h: every block that can reach a back-edge
    // tail without passing through h again, plus h itself.
    let mut bodies: FxHashMap<BlockId, FxHashSet<BlockId>> = FxHashMap::default();
    for (tail, header) in &back_edges {
        let body = bodies.entry(*header).or_default();
        body.insert(*header);
        let mut stack = vec![*tail];
        while let Some(n) = stack.pop() {
            if body.insert(n) {
                if n != *header {
                    for &p in &f.block(n).preds {
                        stack.push(p);
                    }
                }
            }
        }
    }

    // Nesting: header A is a child of header B if A's body is a strict
    // subset of B's body (the smallest enclosing superset).
    let mut headers: Vec<BlockId> = bodies.keys().copied().collect();
    headers.sort_by_key(|h| bodies[h].len());

    let mut enclosing: FxHashMap<BlockId, BlockId> = FxHashMap::default();
    let mut parent_of_header: FxHashMap<BlockId, BlockId> = FxHashMap::default();
    for &h in &headers {
        for &b in bodies[&h].clone().iter() {
            if b == h {
                continue;
            }
            // Record (or refine) the innermost enclosing loop for b.
            let refine = match enclosing.get(&b) {
                None => true,
                Some(cur) => bodies[&h].len() < bodies[cur].len(),
            };
            if refine {
                enclosing.insert(b, h);
            }
        }
    }
    for &h in &headers {
        let refine = match enclosing.get(&h) {
            None => true,
            Some(cur) => *cur != h && bodies[cur].len() > bodies[&h].len(),
        };
        // A header's own parent is the innermost *other* header whose body
        // contains it.
        let mut best: Option<BlockId> = None;
        for &other in &headers {
            if other == h {
                continue;
            }
            if bodies[&other].contains(&h) {
                best = Some(match best {
                    None => other,
                    Some(cur) => {
                        if bodies[&other].len() < bodies[&cur].len() {
                            other
                        } else {
                            cur
                        }
                    }
                });
            }
        }
        if let Some(p) = best {
            parent_of_header.insert(h, p);
            enclosing.insert(h, p);
        }
        let _ = refine;
    }

    let mut nodes: FxHashMap<BlockId, LoopNode> = FxHashMap::default();
    for &h in &headers {
        nodes.insert(
            h,
            LoopNode {
                header: h,
                body: bodies[&h].clone(),
                children: Vec::new(),
                parent: parent_of_header.get(&h).copied(),
            },
        );
    }
    let header_list: Vec<BlockId> = headers.clone();
    for h in header_list {
        if let Some(p) = nodes[&h].parent {
            nodes.get_mut(&p).unwrap().children.push(h);
        }
    }

    LoopForest { nodes, enclosing }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::context::Context;
    use crate::ir::function::InstId;
    use crate::ir::instruction::{Instruction, Opcode};
    use crate::ir::module::Module;
    use crate::ir::value::ValueRef;
    use smallvec::smallvec;

    #[test]
    fn single_loop_detected() {
        let mut cx = Context::new();
        let i32t = cx.int_type(32);
        let mut m = Module::new("t");
        let f = m.declare_function("loopfn", i32t, vec![], false);
        let (entry, header, body, exit) = {
            let func = m.function_mut(f);
            (
                func.push_block("entry"),
                func.push_block("header"),
                func.push_block("body"),
                func.push_block("exit"),
            )
        };
        let mut b = crate::ir::builder::IrBuilder::new(&mut m);
        let void = cx.void_type();
        let mk = |opcode, operands, parent| Instruction {
            id: InstId(0),
            opcode,
            operands,
            ty: void,
            name: None,
            parent,
            pointer_info: None,
        };
        b.insert(f, entry, None, mk(Opcode::Goto, smallvec![ValueRef::Block(f, header)], entry));
        let cond = ValueRef::Const(cx.int_constant(1, 1));
        b.insert(
            f,
            header,
            None,
            mk(Opcode::Branch, smallvec![cond, ValueRef::Block(f, body), ValueRef::Block(f, exit)], header),
        );
        b.insert(f, body, None, mk(Opcode::Goto, smallvec![ValueRef::Block(f, header)], body));
        b.insert(f, exit, None, mk(Opcode::Return, smallvec![], exit));

        let lnf = loop_forest(m.function(f));
        assert!(lnf.is_loop_header(header));
        assert!(lnf.loop_of(body).is_some());
        assert_eq!(lnf.loop_of(body).unwrap().header, header);
        assert!(lnf.loop_of(exit).is_none());
    }
}
