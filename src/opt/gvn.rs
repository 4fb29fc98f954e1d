//! Global value numbering (§4.5 pass suite).
//!
//! Dominator-tree-scoped common subexpression elimination: a scoped hash
//! table of `(opcode, operands) -> value` is carried down the dominator
//! tree (entries pushed on entry to a block, popped on return), so a
//! redundant computation is recognized only when an earlier, dominating
//! computation of the same expression is in scope. Converges in one call
//! once no further duplicates exist (§8 "Idempotence").

use crate::common::fx_hash::FxHashMap;
use crate::ir::context::Context;
use crate::ir::function::{BlockId, FuncId, InstId};
use crate::ir::instruction::Opcode;
use crate::ir::module::Module;
use crate::ir::value::ValueRef;
use crate::pass::{FunctionPass, PassCategory};

pub struct Gvn;

impl FunctionPass for Gvn {
    fn name(&self) -> &'static str {
        "gvn"
    }

    fn category(&self) -> PassCategory {
        PassCategory::Optimization
    }

    fn run(&self, _cx: &mut Context, module: &mut Module, func: FuncId) -> bool {
        let Some(entry) = module.function(func).entry() else { return false };
        let dom_tree = crate::analysis::dominance_of(module.function_mut(func)).clone();
        let mut table: FxHashMap<(String, Vec<ValueRef>), ValueRef> = FxHashMap::default();
        let mut changed = false;
        visit(module, func, entry, &dom_tree, &mut table, &mut changed);
        changed
    }
}

/// Pure, side-effect-free, deterministic opcodes are eligible for value
/// numbering; memory, control flow, and calls are not (a second `load` may
/// observe a different value even with identical operands).
fn is_eligible(op: &Opcode) -> bool {
    !matches!(
        op,
        Opcode::Load
            | Opcode::Store
            | Opcode::Alloca { .. }
            | Opcode::Call
            | Opcode::Phi { .. }
            | Opcode::Goto
            | Opcode::Branch
            | Opcode::Return
    )
}

fn visit(
    module: &mut Module,
    func: FuncId,
    block: BlockId,
    dom_tree: &crate::analysis::dominance::DomTree,
    table: &mut FxHashMap<(String, Vec<ValueRef>), ValueRef>,
    changed: &mut bool,
) {
    let mut inserted_keys: Vec<(String, Vec<ValueRef>)> = Vec::new();
    let inst_ids: Vec<InstId> = module.function(func).block(block).insts.clone();
    for inst_id in inst_ids {
        let f = module.function(func);
        let Some(inst) = f.try_inst(inst_id) else { continue };
        if !is_eligible(&inst.opcode) {
            continue;
        }
        let key = (format!("{:?}", inst.opcode), inst.operands.to_vec());
        if let Some(&existing) = table.get(&key) {
            let old_ref = ValueRef::Inst(func, inst_id);
            let mut builder = crate::ir::builder::IrBuilder::new(module);
            builder.replace_all_uses_with(old_ref, existing);
            let mut builder = crate::ir::builder::IrBuilder::new(module);
            builder.erase(func, inst_id);
            *changed = true;
        } else {
            table.insert(key.clone(), ValueRef::Inst(func, inst_id));
            inserted_keys.push(key);
        }
    }

    for child in dom_tree.children(block).to_vec() {
        visit(module, func, child, dom_tree, table, changed);
    }

    for key in inserted_keys {
        table.remove(&key);
    }
}
