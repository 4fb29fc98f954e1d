//! Mem-to-reg (§4.5 pass suite). Promotes scalar `alloca`s whose only uses
//! are direct `load`/`store` on the alloca itself into SSA registers,
//! inserting `phi` nodes at the iterated dominance frontier of the stores
//! (the standard Cytron et al. construction).

use crate::common::fx_hash::{FxHashMap, FxHashSet};
use crate::ir::context::Context;
use crate::ir::function::{BlockId, FuncId, InstId};
use crate::ir::instruction::{Instruction, Opcode};
use crate::ir::module::Module;
use crate::ir::value::ValueRef;
use crate::pass::{FunctionPass, PassCategory};
use smallvec::smallvec;

pub struct Mem2Reg;

impl FunctionPass for Mem2Reg {
    fn name(&self) -> &'static str {
        "memtoreg"
    }

    fn category(&self) -> PassCategory {
        PassCategory::Simplification
    }

    fn run(&self, cx: &mut Context, module: &mut Module, func: FuncId) -> bool {
        let candidates = find_promotable(module, func);
        if candidates.is_empty() {
            return false;
        }
        let dom_tree = crate::analysis::dominance_of(module.function_mut(func)).clone();
        let df = dominance_frontier(module.function(func), &dom_tree);

        for alloca_id in candidates {
            promote_one(cx, module, func, alloca_id, &dom_tree, &df);
        }
        true
    }
}

/// An alloca is promotable iff every use is a `Load` whose address is the
/// alloca itself, or a `Store` whose *address* operand (not value operand)
/// is the alloca itself, and the alloca holds a single non-aggregate
/// element (`count == 1`, scalar `elem_ty`).
fn find_promotable(module: &Module, func: FuncId) -> Vec<InstId> {
    let f = module.function(func);
    let mut out = Vec::new();
    for block in f.blocks_in_order() {
        for &inst_id in &block.insts {
            let inst = f.inst(inst_id);
            let Opcode::Alloca { count, .. } = &inst.opcode else { continue };
            if *count != 1 {
                continue;
            }
            let v = ValueRef::Inst(func, inst_id);
            let mut ok = true;
            for (uf, ui) in module.uses_of(v) {
                if uf != func {
                    ok = false;
                    break;
                }
                let user = f.inst(ui);
                match &user.opcode {
                    Opcode::Load => {}
                    Opcode::Store if user.operands[1] == v => {}
                    _ => {
                        ok = false;
                        break;
                    }
                }
            }
            if ok {
                out.push(inst_id);
            }
        }
    }
    out
}

fn dominance_frontier(
    f: &crate::ir::function::Function,
    dom_tree: &crate::analysis::dominance::DomTree,
) -> FxHashMap<BlockId, Vec<BlockId>> {
    let mut df: FxHashMap<BlockId, Vec<BlockId>> = FxHashMap::default();
    for b in f.block_ids() {
        let preds: Vec<BlockId> = f.block(b).preds.iter().copied().collect();
        if preds.len() < 2 {
            continue;
        }
        let Some(idom_b) = dom_tree.idom(b) else { continue };
        for p in preds {
            let mut runner = p;
            while runner != idom_b {
                df.entry(runner).or_default().push(b);
                match dom_tree.idom(runner) {
                    Some(next) => runner = next,
                    None => break,
                }
            }
        }
    }
    df
}

fn iterated_df(defs: &FxHashSet<BlockId>, df: &FxHashMap<BlockId, Vec<BlockId>>) -> FxHashSet<BlockId> {
    let mut result = FxHashSet::default();
    let mut worklist: Vec<BlockId> = defs.iter().copied().collect();
    while let Some(b) = worklist.pop() {
        if let Some(list) = df.get(&b) {
            for &d in list {
                if result.insert(d) {
                    worklist.push(d);
                }
            }
        }
    }
    result
}

fn promote_one(
    cx: &mut Context,
    module: &mut Module,
    func: FuncId,
    alloca_id: InstId,
    dom_tree: &crate::analysis::dominance::DomTree,
    df: &FxHashMap<BlockId, Vec<BlockId>>,
) {
    let alloca_ref = ValueRef::Inst(func, alloca_id);
    let elem_ty = match &module.function(func).inst(alloca_id).opcode {
        Opcode::Alloca { elem_ty, .. } => *elem_ty,
        _ => unreachable!(),
    };

    let def_blocks: FxHashSet<BlockId> = {
        let f = module.function(func);
        module
            .uses_of(alloca_ref)
            .filter(|(uf, ui)| *uf == func && matches!(f.inst(*ui).opcode, Opcode::Store))
            .map(|(_, ui)| f.inst(ui).parent)
            .collect()
    };

    let phi_blocks = iterated_df(&def_blocks, df);

    // Insert empty phis (operands filled during renaming) at every block in
    // the iterated dominance frontier that is reachable (has predecessors).
    let mut phi_inst: FxHashMap<BlockId, InstId> = FxHashMap::default();
    let mut phi_preds: FxHashMap<BlockId, Vec<BlockId>> = FxHashMap::default();
    for b in phi_blocks {
        let mut preds: Vec<BlockId> = module.function(func).block(b).preds.iter().copied().collect();
        preds.sort();
        if preds.is_empty() {
            continue;
        }
        let undef = ValueRef::Const(cx.undef(elem_ty));
        let operands = smallvec![undef; preds.len()];
        let inst = Instruction {
            id: InstId(0),
            opcode: Opcode::Phi { incoming: preds.clone() },
            operands,
            ty: elem_ty,
            name: None,
            parent: b,
            pointer_info: None,
        };
        let first = module.function(func).block(b).insts.first().copied();
        let mut builder = crate::ir::builder::IrBuilder::new(module);
        let id = builder.insert(func, b, first, inst);
        phi_inst.insert(b, id);
        phi_preds.insert(b, preds);
    }

    let entry = module.function(func).entry().expect("promotable alloca requires an entry block");
    let undef_init = ValueRef::Const(cx.undef(elem_ty));
    rename_block(module, func, entry, undef_init, alloca_ref, dom_tree, &phi_inst, &phi_preds);

    // Every load/store on the alloca has been rewritten or erased by the
    // recursive rename walk; the alloca itself is now unused and will be
    // swept by the next DCE pass.
}

fn rename_block(
    module: &mut Module,
    func: FuncId,
    block: BlockId,
    mut current: ValueRef,
    alloca_ref: ValueRef,
    dom_tree: &crate::analysis::dominance::DomTree,
    phi_inst: &FxHashMap<BlockId, InstId>,
    phi_preds: &FxHashMap<BlockId, Vec<BlockId>>,
) {
    if let Some(&phi_id) = phi_inst.get(&block) {
        current = ValueRef::Inst(func, phi_id);
    }

    let inst_ids: Vec<InstId> = module.function(func).block(block).insts.clone();
    for inst_id in inst_ids {
        let f = module.function(func);
        let Some(inst) = f.try_inst(inst_id) else { continue };
        match &inst.opcode {
            Opcode::Load if inst.operands.get(0) == Some(&alloca_ref) => {
                let result_ref = ValueRef::Inst(func, inst_id);
                let mut builder = crate::ir::builder::IrBuilder::new(module);
                builder.replace_all_uses_with(result_ref, current);
                let mut builder = crate::ir::builder::IrBuilder::new(module);
                builder.erase(func, inst_id);
            }
            Opcode::Store if inst.operands.get(1) == Some(&alloca_ref) => {
                current = inst.operands[0];
                let mut builder = crate::ir::builder::IrBuilder::new(module);
                builder.erase(func, inst_id);
            }
            _ => {}
        }
    }

    for succ in module.function(func).block(block).succs.clone() {
        if let (Some(&phi_id), Some(preds)) = (phi_inst.get(&succ), phi_preds.get(&succ)) {
            if let Some(slot) = preds.iter().position(|&p| p == block) {
                let mut builder = crate::ir::builder::IrBuilder::new(module);
                builder.set_operand_at(func, phi_id, slot, current);
            }
        }
    }

    let children: Vec<BlockId> = dom_tree.children(block).to_vec();
    for child in children {
        rename_block(module, func, child, current, alloca_ref, dom_tree, phi_inst, phi_preds);
    }
}
