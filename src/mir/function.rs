//! MIR basic blocks and functions (§3 "MIR Module / Function").

use crate::common::fx_hash::{FxHashMap, FxHashSet};
use crate::ir::function::FuncId;
use crate::mir::instruction::MirInst;
use crate::mir::register::{RegisterFile, RegisterId, RegisterPhase};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MirBlockId(pub(crate) u32);

impl MirBlockId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MirInstId(pub(crate) u32);

impl MirInstId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Default)]
pub struct MirBlock {
    pub id: MirBlockId,
    pub name: String,
    pub insts: Vec<MirInstId>,
    pub preds: FxHashSet<MirBlockId>,
    pub succs: Vec<MirBlockId>,
    pub live_in: FxHashSet<RegisterId>,
    pub live_out: FxHashSet<RegisterId>,
}

impl MirBlock {
    pub fn terminator(&self) -> Option<MirInstId> {
        self.insts.last().copied()
    }
}

/// A MIR function (§3). Owns its basic blocks, instructions, and register
/// pools; `phase` gates which operations are legal and only ever advances
/// (SSA -> Virtual -> Hardware).
#[derive(Debug)]
pub struct MirFunction {
    pub ir_func: FuncId,
    pub name: String,
    pub is_foreign: bool,
    pub num_args: u32,
    pub num_rets: u32,
    pub regs: RegisterFile,
    pub phase: RegisterPhase,
    blocks: Vec<Option<MirBlock>>,
    insts: Vec<Option<MirInst>>,
    pub block_order: Vec<MirBlockId>,
    /// Per-register sorted live intervals, populated by
    /// [`crate::mir::live_interval::compute_live_range`] (§4.7 step 7).
    pub live_intervals: FxHashMap<RegisterId, Vec<crate::mir::live_interval::LiveInterval>>,
}

impl MirFunction {
    pub fn new(ir_func: FuncId, name: String) -> Self {
        Self {
            ir_func,
            name,
            is_foreign: false,
            num_args: 0,
            num_rets: 0,
            regs: RegisterFile::new(),
            phase: RegisterPhase::Ssa,
            blocks: Vec::new(),
            insts: Vec::new(),
            block_order: Vec::new(),
            live_intervals: FxHashMap::default(),
        }
    }

    pub fn entry(&self) -> Option<MirBlockId> {
        self.block_order.first().copied()
    }

    pub fn push_block(&mut self, name: impl Into<String>) -> MirBlockId {
        let id = MirBlockId(self.blocks.len() as u32);
        self.blocks.push(Some(MirBlock { id, name: name.into(), ..Default::default() }));
        self.block_order.push(id);
        id
    }

    pub fn block(&self, id: MirBlockId) -> &MirBlock {
        self.blocks[id.index()].as_ref().expect("dangling MirBlockId")
    }

    pub fn block_mut(&mut self, id: MirBlockId) -> &mut MirBlock {
        self.blocks[id.index()].as_mut().expect("dangling MirBlockId")
    }

    pub fn alloc_inst(&mut self, inst: MirInst) -> MirInstId {
        let id = MirInstId(self.insts.len() as u32);
        self.insts.push(Some(inst));
        id
    }

    pub fn inst(&self, id: MirInstId) -> &MirInst {
        self.insts[id.index()].as_ref().expect("dangling MirInstId")
    }

    pub fn inst_mut(&mut self, id: MirInstId) -> &mut MirInst {
        self.insts[id.index()].as_mut().expect("dangling MirInstId")
    }

    pub fn try_inst(&self, id: MirInstId) -> Option<&MirInst> {
        self.insts.get(id.index()).and_then(|o| o.as_ref())
    }

    /// Inserts `inst` in `block` before `before`, or at the end if `None`,
    /// wiring up successor/predecessor edges if it is a terminator.
    pub fn insert(&mut self, block: MirBlockId, before: Option<MirInstId>, inst: MirInst) -> MirInstId {
        let is_term = inst.is_terminator();
        let targets = terminator_targets(&inst);
        let id = self.alloc_inst(inst);
        let bb = self.block_mut(block);
        match before {
            Some(b) => {
                let pos = bb.insts.iter().position(|&i| i == b).expect("before not in block");
                bb.insts.insert(pos, id);
            }
            None => bb.insts.push(id),
        }
        if is_term {
            let old_succs = std::mem::take(&mut self.block_mut(block).succs);
            for s in old_succs {
                self.block_mut(s).preds.remove(&block);
            }
            self.block_mut(block).succs = targets.clone();
            for t in targets {
                self.block_mut(t).preds.insert(block);
            }
        }
        id
    }

    pub fn erase(&mut self, block: MirBlockId, inst_id: MirInstId) {
        self.block_mut(block).insts.retain(|&i| i != inst_id);
        self.insts[inst_id.index()] = None;
    }

    pub fn blocks_in_order(&self) -> impl Iterator<Item = &MirBlock> {
        self.block_order.iter().map(move |id| self.block(*id))
    }

    pub fn block_ids(&self) -> impl Iterator<Item = MirBlockId> + '_ {
        self.block_order.iter().copied()
    }

    pub fn all_insts(&self) -> impl Iterator<Item = (MirInstId, &MirInst)> {
        self.insts.iter().enumerate().filter_map(|(i, o)| o.as_ref().map(|inst| (MirInstId(i as u32), inst)))
    }
}

fn terminator_targets(inst: &MirInst) -> Vec<MirBlockId> {
    match &inst.opcode {
        crate::mir::instruction::MirOpcode::Jump => {
            inst.operands.iter().find_map(block_of).into_iter().collect()
        }
        crate::mir::instruction::MirOpcode::CondJump { then_target, else_target, .. } => {
            vec![*then_target, *else_target]
        }
        _ => Vec::new(),
    }
}

fn block_of(op: &crate::mir::instruction::MirOperand) -> Option<MirBlockId> {
    match op {
        crate::mir::instruction::MirOperand::Block(b) => Some(*b),
        _ => None,
    }
}
