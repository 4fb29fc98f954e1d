//! Loop rotation (§4.5 pass suite, "used by liveness and loop rotation"
//! hook in §4.3's loop-nesting forest description).
//!
//! Rewrites a `while`-shaped natural loop (test at the top, taken on every
//! iteration including the zeroth) into a `do-while` shape by cloning the
//! header's trip-count test into the preheader, so the steady-state loop
//! body no longer re-enters through a block with a redundant entry check.
//! Scoped conservatively to loops whose header is *only* a test — one or
//! more phis feeding exactly one pure condition instruction that nothing
//! else in the function observes — so rotating never requires threading
//! new phis through the loop body; any header that doesn't match this
//! shape is left untouched.

use crate::common::fx_hash::FxHashMap;
use crate::ir::context::Context;
use crate::ir::function::{BlockId, FuncId, InstId};
use crate::ir::instruction::{Instruction, Opcode};
use crate::ir::module::Module;
use crate::ir::value::ValueRef;
use crate::pass::{FunctionPass, PassCategory};

pub struct LoopRotate;

impl FunctionPass for LoopRotate {
    fn name(&self) -> &'static str {
        "looprotate"
    }

    fn category(&self) -> PassCategory {
        PassCategory::Optimization
    }

    fn run(&self, cx: &mut Context, module: &mut Module, func: FuncId) -> bool {
        let headers: Vec<BlockId> = crate::analysis::loop_forest_of(module.function_mut(func)).headers().collect();
        let mut changed = false;
        for header in headers {
            if try_rotate(cx, module, func, header) {
                changed = true;
            }
        }
        changed
    }
}

struct Candidate {
    preheader: BlockId,
    latch: BlockId,
    cond_inst: InstId,
    branch_inst: InstId,
}

fn find_candidate(module: &Module, func: FuncId, header: BlockId) -> Option<Candidate> {
    let f = module.function(func);
    let preds: Vec<BlockId> = f.block(header).preds.iter().copied().collect();
    if preds.len() != 2 {
        return None;
    }
    let lnf = f.analyses.loop_forest.as_ref()?.1.clone();
    let (mut preheader, mut latch) = (None, None);
    for p in preds {
        if lnf.loop_of(p).map(|n| n.header) == Some(header) || p == header {
            latch = Some(p);
        } else {
            preheader = Some(p);
        }
    }
    let (preheader, latch) = (preheader?, latch?);

    let insts = &f.block(header).insts;
    let branch_id = *insts.last()?;
    let branch = f.inst(branch_id);
    if !matches!(branch.opcode, Opcode::Branch) {
        return None;
    }
    let cond_ref = *branch.operands.first()?;
    let ValueRef::Inst(cond_func, cond_id) = cond_ref else { return None };
    if cond_func != func || f.inst(cond_id).parent != header {
        return None;
    }
    if f.inst(cond_id).opcode.has_side_effects() {
        return None;
    }

    // Every other instruction in the header must be a phi consumed
    // exclusively by the condition instruction.
    for &id in insts {
        if id == branch_id || id == cond_id {
            continue;
        }
        let inst = f.inst(id);
        if !matches!(inst.opcode, Opcode::Phi { .. }) {
            return None;
        }
        let phi_ref = ValueRef::Inst(func, id);
        let uses: Vec<_> = module.uses_of(phi_ref).collect();
        if uses.len() != 1 || uses[0] != (func, cond_id) {
            return None;
        }
    }

    Some(Candidate { preheader, latch, cond_inst: cond_id, branch_inst: branch_id })
}

fn try_rotate(cx: &mut Context, module: &mut Module, func: FuncId, header: BlockId) -> bool {
    let Some(candidate) = find_candidate(module, func, header) else { return false };
    let Candidate { preheader, latch, cond_inst, branch_inst } = candidate;

    let mut entry_val: FxHashMap<InstId, ValueRef> = FxHashMap::default();
    for &id in &module.function(func).block(header).insts {
        let inst = module.function(func).inst(id);
        let Opcode::Phi { incoming } = &inst.opcode else { continue };
        let Some(slot) = incoming.iter().position(|&b| b == preheader) else { return false };
        entry_val.insert(id, inst.operands[slot]);
    }

    let cond = module.function(func).inst(cond_inst).clone();
    let remapped_operands: smallvec::SmallVec<[ValueRef; 3]> = cond
        .operands
        .iter()
        .map(|&v| match v {
            ValueRef::Inst(f, id) if f == func => entry_val.get(&id).copied().unwrap_or(v),
            other => other,
        })
        .collect();
    let cloned_cond = Instruction {
        id: InstId(0),
        opcode: cond.opcode.clone(),
        operands: remapped_operands,
        ty: cond.ty,
        name: None,
        parent: preheader,
        pointer_info: cond.pointer_info.clone(),
    };

    let branch = module.function(func).inst(branch_inst).clone();
    let (then_target, else_target) = (branch.operands[1], branch.operands[2]);

    let old_terminator = *module.function(func).block(preheader).insts.last().expect("preheader has a terminator");
    if !matches!(module.function(func).inst(old_terminator).opcode, Opcode::Goto) {
        return false;
    }

    // Erase the preheader's old unconditional jump to the header *before*
    // inserting the rotated test, so the block never transiently holds two
    // terminator-shaped instructions (which would desync `erase`'s and
    // `insert`'s successor/predecessor bookkeeping).
    let mut builder = crate::ir::builder::IrBuilder::new(module);
    builder.erase(func, old_terminator);
    let cloned_id = builder.insert(func, preheader, None, cloned_cond);
    let new_branch = Instruction {
        id: InstId(0),
        opcode: Opcode::Branch,
        operands: smallvec::smallvec![ValueRef::Inst(func, cloned_id), then_target, else_target],
        ty: cx.void_type(),
        name: None,
        parent: preheader,
        pointer_info: None,
    };
    builder.insert(func, preheader, None, new_branch);

    // The header is reachable only from the latch now; shrink every phi's
    // incoming list to drop the preheader slot.
    for &id in &module.function(func).block(header).insts.clone() {
        let remove_slot = {
            let f = module.function_mut(func);
            let inst = f.inst_mut(id);
            let Opcode::Phi { incoming } = &mut inst.opcode else { continue };
            let slot = incoming.iter().position(|&b| b == preheader).expect("checked above");
            incoming.remove(slot);
            let removed = inst.operands.remove(slot);
            Some((id, removed))
        };
        if let Some((id, removed)) = remove_slot {
            module.remove_use(removed, (func, id));
        }
    }

    let _ = latch;
    let _ = branch_inst;
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::function::Param;
    use crate::ir::instruction::IntPredicate;
    use crate::pass::for_each_function;
    use smallvec::smallvec;

    #[test]
    fn rotates_a_pure_trip_count_loop() {
        let mut cx = Context::new();
        let mut module = Module::new("test");
        let i32t = cx.int_type(32);
        let void = cx.void_type();
        let func = module.declare_function(
            "countdown",
            void,
            vec![Param { ty: i32t, name: "n".into(), attribute: None }],
            false,
        );
        let (entry, header, body, exit) = {
            let f = module.function_mut(func);
            (f.push_block("entry"), f.push_block("header"), f.push_block("body"), f.push_block("exit"))
        };

        let mut b = crate::ir::builder::IrBuilder::new(&mut module);
        let mk = |opcode, operands, ty, parent| Instruction {
            id: InstId(0),
            opcode,
            operands,
            ty,
            name: None,
            parent,
            pointer_info: None,
        };
        b.insert(func, entry, None, mk(Opcode::Goto, smallvec![ValueRef::Block(func, header)], void, entry));

        let zero = ValueRef::Const(cx.int_constant(32, 0));
        let phi = b.insert(
            func,
            header,
            None,
            mk(Opcode::Phi { incoming: vec![entry, body] }, smallvec![ValueRef::Param(func, 0), zero], i32t, header),
        );
        let cmp = b.insert(
            func,
            header,
            None,
            mk(
                Opcode::ICmp(IntPredicate::Ne),
                smallvec![ValueRef::Inst(func, phi), zero],
                cx.int_type(1),
                header,
            ),
        );
        b.insert(
            func,
            header,
            None,
            mk(
                Opcode::Branch,
                smallvec![ValueRef::Inst(func, cmp), ValueRef::Block(func, body), ValueRef::Block(func, exit)],
                void,
                header,
            ),
        );

        let one = ValueRef::Const(cx.int_constant(32, 1));
        let dec = b.insert(
            func,
            body,
            None,
            mk(Opcode::Sub, smallvec![ValueRef::Inst(func, phi), one], i32t, body),
        );
        b.insert(func, body, None, mk(Opcode::Goto, smallvec![ValueRef::Block(func, header)], void, body));
        b.insert(func, exit, None, mk(Opcode::Return, smallvec![], void, exit));
        let _ = dec;

        let changed = for_each_function(&mut cx, &mut module, &LoopRotate);
        assert!(changed);

        let entry_insts = &module.function(func).block(entry).insts;
        let has_branch = entry_insts
            .iter()
            .any(|&id| matches!(module.function(func).inst(id).opcode, Opcode::Branch));
        assert!(has_branch);

        let Opcode::Phi { incoming } = &module.function(func).inst(phi).opcode else { panic!("expected phi") };
        assert_eq!(incoming.len(), 1);
        assert_eq!(incoming[0], body);
    }
}
