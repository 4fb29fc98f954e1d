//! Basic blocks and functions (§3 "Basic Block", "Function (IR)").

use crate::common::fx_hash::FxHashSet;
use crate::ir::instruction::Instruction;
use crate::ir::types::TypeId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FuncId(pub(crate) u32);

impl FuncId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub(crate) u32);

impl BlockId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstId(pub(crate) u32);

impl InstId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone)]
pub struct Param {
    pub ty: TypeId,
    pub name: String,
    /// `byval(<type>)` / `valret(<type>)` attributes (§6 "Parameter
    /// attributes"). `None` for an ordinary by-register parameter.
    pub attribute: Option<ParamAttribute>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamAttribute {
    ByVal(TypeId),
    ValRet(TypeId),
}

/// Ordered instruction list terminated by exactly one terminator (§3,
/// testable property 4). Predecessor/successor sets are kept in sync with
/// the terminator's operands by [`crate::ir::builder`].
#[derive(Debug, Clone, Default)]
pub struct BasicBlock {
    pub id: BlockId,
    pub name: String,
    pub insts: Vec<InstId>,
    pub preds: FxHashSet<BlockId>,
    pub succs: Vec<BlockId>,
    /// Populated by liveness analysis (§4.3); empty until then.
    pub live_in: FxHashSet<crate::ir::value::ValueRef>,
    pub live_out: FxHashSet<crate::ir::value::ValueRef>,
}

impl BasicBlock {
    pub fn terminator(&self) -> Option<InstId> {
        self.insts.last().copied()
    }
}

/// Cached dominance/loop analyses, invalidated whenever the CFG is mutated
/// (§4.2 "Every structural mutation invalidates cached analyses").
#[derive(Debug, Default)]
pub struct AnalysisCache {
    pub version: u64,
    pub dominance: Option<(u64, crate::analysis::dominance::DomTree)>,
    pub post_dominance: Option<(u64, crate::analysis::dominance::DomTree)>,
    pub loop_forest: Option<(u64, crate::analysis::loopnest::LoopForest)>,
}

impl AnalysisCache {
    pub fn invalidate(&mut self) {
        self.version += 1;
        self.dominance = None;
        self.post_dominance = None;
        self.loop_forest = None;
    }
}

/// A named callable (§3 "Function (IR)"). Owns its basic blocks and
/// instructions via flat arenas; `block_order` gives insertion order with
/// the entry block always first.
#[derive(Debug)]
pub struct Function {
    pub id: FuncId,
    pub name: String,
    pub ret_ty: TypeId,
    pub params: Vec<Param>,
    pub is_foreign: bool,
    pub(crate) blocks: Vec<Option<BasicBlock>>,
    pub(crate) insts: Vec<Option<Instruction>>,
    pub block_order: Vec<BlockId>,
    pub analyses: AnalysisCache,
    /// Calls structurally shaped like a tail call (directly followed by a
    /// return of their result), recorded by
    /// [`crate::opt::tailcall::TailCallMark`]. Advisory only: SSA
    /// destruction (§4.7 step 2) re-derives the same pattern independently
    /// and does not consult this set.
    pub tail_call_candidates: FxHashSet<InstId>,
}

impl Function {
    pub fn new(id: FuncId, name: String, ret_ty: TypeId, params: Vec<Param>) -> Self {
        Self {
            id,
            name,
            ret_ty,
            params,
            is_foreign: false,
            blocks: Vec::new(),
            insts: Vec::new(),
            block_order: Vec::new(),
            analyses: AnalysisCache::default(),
            tail_call_candidates: FxHashSet::default(),
        }
    }

    pub fn entry(&self) -> Option<BlockId> {
        self.block_order.first().copied()
    }

    pub fn block(&self, id: BlockId) -> &BasicBlock {
        self.blocks[id.index()].as_ref().expect("dangling BlockId")
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut BasicBlock {
        self.blocks[id.index()].as_mut().expect("dangling BlockId")
    }

    pub fn inst(&self, id: InstId) -> &Instruction {
        self.insts[id.index()].as_ref().expect("dangling InstId")
    }

    pub fn inst_mut(&mut self, id: InstId) -> &mut Instruction {
        self.insts[id.index()].as_mut().expect("dangling InstId")
    }

    pub fn try_inst(&self, id: InstId) -> Option<&Instruction> {
        self.insts.get(id.index()).and_then(|o| o.as_ref())
    }

    /// Creates a new empty block, appending it to `block_order`. Does not
    /// wire up predecessor/successor edges; use
    /// [`crate::ir::builder::IrBuilder`] for that.
    pub fn push_block(&mut self, name: impl Into<String>) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(Some(BasicBlock {
            id,
            name: name.into(),
            ..Default::default()
        }));
        self.block_order.push(id);
        self.analyses.invalidate();
        id
    }

    pub fn alloc_inst(&mut self, inst: Instruction) -> InstId {
        let id = InstId(self.insts.len() as u32);
        let mut inst = inst;
        inst.id = id;
        self.insts.push(Some(inst));
        id
    }

    pub fn blocks_in_order(&self) -> impl Iterator<Item = &BasicBlock> {
        self.block_order.iter().map(move |id| self.block(*id))
    }

    pub fn block_ids(&self) -> impl Iterator<Item = BlockId> + '_ {
        self.block_order.iter().copied()
    }

    /// Total registers needed to hold this function's values if lowered
    /// 1:1 — used by ISel as a capacity hint, not a hard limit.
    pub fn instruction_count(&self) -> usize {
        self.insts.iter().filter(|i| i.is_some()).count()
    }
}
