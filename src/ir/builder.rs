//! Primary IR mutators (§4.2). Every method here preserves the use/def and
//! CFG-edge invariants atomically; nothing outside this module should touch
//! `Instruction::operands` or `BasicBlock::{preds,succs}` directly.

use crate::ir::function::{BasicBlock, BlockId, FuncId, InstId};
use crate::ir::instruction::{Instruction, Opcode};
use crate::ir::module::Module;
use crate::ir::value::ValueRef;

/// Block targets named by a terminator's operands, used to keep
/// predecessor/successor sets in sync.
fn terminator_targets(inst: &Instruction) -> Vec<BlockId> {
    match &inst.opcode {
        Opcode::Goto => inst.operands.iter().filter_map(block_of).collect(),
        Opcode::Branch => inst.operands.iter().skip(1).filter_map(block_of).collect(),
        _ => Vec::new(),
    }
}

fn block_of(v: &ValueRef) -> Option<BlockId> {
    match v {
        ValueRef::Block(_, b) => Some(*b),
        _ => None,
    }
}

pub struct IrBuilder<'m> {
    pub module: &'m mut Module,
}

impl<'m> IrBuilder<'m> {
    pub fn new(module: &'m mut Module) -> Self {
        Self { module }
    }

    /// `Instruction::setOperandAt` (§4.2): removes the use edge from the old
    /// operand, adds it to the new one, and rewrites the slot.
    pub fn set_operand_at(&mut self, func: FuncId, inst_id: InstId, index: usize, new: ValueRef) {
        let old = {
            let f = self.module.function(func);
            f.inst(inst_id).operands[index]
        };
        if old == new {
            return;
        }
        self.module.remove_use(old, (func, inst_id));
        self.module.add_use(new, (func, inst_id));
        let f = self.module.function_mut(func);
        let was_terminator = f.inst(inst_id).is_terminator();
        f.inst_mut(inst_id).operands[index] = new;
        if was_terminator {
            self.resync_terminator_edges(func, inst_id);
        }
    }

    /// `Instruction::replaceOperand` (§4.2): applies `set_operand_at` for
    /// every slot currently holding `old`.
    pub fn replace_operand(&mut self, func: FuncId, inst_id: InstId, old: ValueRef, new: ValueRef) {
        let count = self.module.function(func).inst(inst_id).operands.len();
        for i in 0..count {
            let cur = self.module.function(func).inst(inst_id).operands[i];
            if cur == old {
                self.set_operand_at(func, inst_id, i, new);
            }
        }
    }

    /// `Value::replaceAllUsesWith` (§4.2): snapshots the use set first so
    /// the loop is safe even though each iteration mutates that same set.
    pub fn replace_all_uses_with(&mut self, old: ValueRef, new: ValueRef) {
        if old == new {
            return;
        }
        let users = self.module.snapshot_uses(old);
        for (func, inst_id) in users {
            self.replace_operand(func, inst_id, old, new);
        }
    }

    /// Inserts `inst` into `block` immediately before `before`, or at the
    /// end of the block if `before` is `None`.
    pub fn insert(&mut self, func: FuncId, block: BlockId, before: Option<InstId>, mut inst: Instruction) -> InstId {
        inst.parent = block;
        let f = self.module.function_mut(func);
        let id = f.alloc_inst(inst);
        let bb = f.block_mut(block);
        match before {
            Some(b) => {
                let pos = bb.insts.iter().position(|&i| i == b).expect("before not in block");
                bb.insts.insert(pos, id);
            }
            None => bb.insts.push(id),
        }
        // Register use edges for the newly inserted instruction's operands.
        let operands: Vec<ValueRef> = f.inst(id).operands.to_vec();
        for op in operands {
            self.module.add_use(op, (func, id));
        }
        let is_term = self.module.function(func).inst(id).is_terminator();
        if is_term {
            self.resync_terminator_edges(func, id);
        }
        self.module.function_mut(func).analyses.invalidate();
        id
    }

    /// Removes `inst` from its parent block, detaching every use/def edge
    /// it participates in (§3 "Instruction": "must detach it from both its
    /// parent block and every use/def edge").
    pub fn erase(&mut self, func: FuncId, inst_id: InstId) {
        let was_terminator;
        let operands: Vec<ValueRef>;
        let block;
        {
            let f = self.module.function(func);
            let inst = f.inst(inst_id);
            was_terminator = inst.is_terminator();
            operands = inst.operands.to_vec();
            block = inst.parent;
        }
        for op in operands {
            self.module.remove_use(op, (func, inst_id));
        }
        let f = self.module.function_mut(func);
        f.block_mut(block).insts.retain(|&i| i != inst_id);
        f.insts[inst_id.index()] = None;
        if was_terminator {
            self.remove_terminator_edges(func, block);
        }
        self.module.function_mut(func).analyses.invalidate();
    }

    /// After a terminator's operands change, rebuild `block`'s successor
    /// list and fix the neighbors' predecessor sets to match (§4.2
    /// "Function::insert, Function::erase ... fix predecessor/successor
    /// edges of neighbors").
    fn resync_terminator_edges(&mut self, func: FuncId, inst_id: InstId) {
        let block = self.module.function(func).inst(inst_id).parent;
        self.remove_terminator_edges(func, block);
        let new_targets = terminator_targets(self.module.function(func).inst(inst_id));
        let f = self.module.function_mut(func);
        f.block_mut(block).succs = new_targets.clone();
        for t in new_targets {
            f.block_mut(t).preds.insert(block);
        }
    }

    fn remove_terminator_edges(&mut self, func: FuncId, block: BlockId) {
        let f = self.module.function_mut(func);
        let old_succs = std::mem::take(&mut f.block_mut(block).succs);
        for s in old_succs {
            f.block_mut(s).preds.remove(&block);
        }
    }

    /// `Function::insert` for basic blocks (§4.2): allocates a new, empty
    /// block and orders it immediately before `before`, or at the end of
    /// the function if `before` is `None`. A freshly allocated block has no
    /// terminator and no neighbor references it yet, so there is nothing to
    /// fix up here; splicing it into the CFG (redirecting a predecessor's
    /// terminator to it via `set_operand_at`, giving it its own terminator
    /// via `insert`) fixes the neighbors' `preds`/`succs` automatically
    /// through `resync_terminator_edges`, the same as any other terminator
    /// rewrite. This is the primitive behind critical-edge splitting
    /// (§4.7) and preheader insertion.
    pub fn insert_block(&mut self, func: FuncId, before: Option<BlockId>, name: impl Into<String>) -> BlockId {
        let f = self.module.function_mut(func);
        let id = BlockId(f.blocks.len() as u32);
        f.blocks.push(Some(BasicBlock {
            id,
            name: name.into(),
            ..Default::default()
        }));
        match before {
            Some(b) => {
                let pos = f.block_order.iter().position(|&x| x == b).expect("before block not in function");
                f.block_order.insert(pos, id);
            }
            None => f.block_order.push(id),
        }
        f.analyses.invalidate();
        id
    }

    /// `Function::erase` for basic blocks (§4.2): tears down every
    /// instruction still in `block` (releasing their use/def edges, and,
    /// for the terminator, this block's own successor edges), then removes
    /// `block` from its remaining predecessors' `succs` so no neighbor is
    /// left pointing at a block that no longer exists. Callers are expected
    /// to have already redirected any predecessor's terminator away from
    /// `block`, the same precondition `erase` already has for instruction
    /// results still in use.
    pub fn erase_block(&mut self, func: FuncId, block: BlockId) {
        let inst_ids: Vec<InstId> = self.module.function(func).block(block).insts.clone();
        for inst_id in inst_ids.into_iter().rev() {
            self.erase(func, inst_id);
        }
        let preds: Vec<BlockId> = self.module.function(func).block(block).preds.iter().copied().collect();
        let f = self.module.function_mut(func);
        for p in preds {
            f.block_mut(p).succs.retain(|&s| s != block);
        }
        f.block_order.retain(|&b| b != block);
        f.blocks[block.index()] = None;
        f.analyses.invalidate();
    }
}
