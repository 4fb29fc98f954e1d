//! SSA destruction (§4.7): the hardest step in the pipeline. Takes an MIR
//! function in SSA form with liveness already computed and produces a
//! virtual-register-form MIR function honoring the VM's two-address
//! convention and calling convention, ready for register allocation.

use std::collections::VecDeque;

use smallvec::{smallvec, SmallVec};

use crate::common::fx_hash::{FxHashMap, FxHashSet};
use crate::mir::function::{MirBlockId, MirFunction, MirInstId};
use crate::mir::instruction::{CallShape, MirInst, MirOpcode, MirOperand};
use crate::mir::register::{RegisterId, RegisterPhase, RegisterPool, RegisterRenaming};

/// Fixed metadata registers reserved at the bottom of a call's callee bank,
/// ahead of its argument/result slots (§4.7 step 2: "fixed count per ABI").
/// The VM's calling convention is out of scope (§1); like `isel::TargetInfo`
/// models the immediate-offset limit, this models that count as a constant
/// rather than inventing undocumented ABI detail.
const CALL_METADATA_REGISTERS: u32 = 0;

/// Runs every step of §4.7 over `f` in place.
pub fn destroy_ssa(f: &mut MirFunction) {
    let renaming = map_to_virtual_registers(f);
    rename_all(f, &renaming);
    rewrite_calls(f);
    rewrite_returns(f);
    rewrite_phis(f);
    mark_call_clobbers(f);
    f.phase.advance_to(RegisterPhase::Virtual);
    crate::mir::liveness::compute(f);
    f.live_intervals = crate::mir::live_interval::compute_live_range(f);
}

/// Step 1: one virtual register per SSA register, except that the
/// argument-passing and return-value slots at the bottom of the bank are the
/// same registers (a function's register bank holds its incoming arguments
/// on entry and its results on exit at the same positions). The first
/// `max(numArgs, numRetVals)` virtual registers are fixed.
fn map_to_virtual_registers(f: &mut MirFunction) -> RegisterRenaming {
    let ssa_count = f.regs.count(RegisterPool::Ssa) as u32;
    let num_param_regs = (0..ssa_count)
        .filter(|&i| f.regs.is_fixed(RegisterId::new(RegisterPool::Ssa, i)))
        .count() as u32;
    let fixed_slots = num_param_regs.max(f.num_rets);

    let mut renaming = RegisterRenaming::default();

    for i in 0..fixed_slots {
        let width = if i < num_param_regs { f.regs.byte_width(RegisterId::new(RegisterPool::Ssa, i)) } else { 8 };
        let v = f.regs.alloc(RegisterPool::Virtual, width, true);
        if i < num_param_regs {
            renaming.insert(RegisterId::new(RegisterPool::Ssa, i), v);
        }
    }
    for i in num_param_regs..ssa_count {
        let old = RegisterId::new(RegisterPool::Ssa, i);
        let width = f.regs.byte_width(old);
        let v = f.regs.alloc(RegisterPool::Virtual, width, false);
        renaming.insert(old, v);
    }

    renaming
}

fn rename_operand(op: MirOperand, renaming: &RegisterRenaming) -> MirOperand {
    match op {
        MirOperand::Reg(r) => MirOperand::Reg(renaming.get(r)),
        MirOperand::Address(mut addr) => {
            addr.base = renaming.get(addr.base);
            addr.dyn_offset = addr.dyn_offset.map(|r| renaming.get(r));
            MirOperand::Address(addr)
        }
        other => other,
    }
}

fn rename_opcode(op: &mut MirOpcode, renaming: &RegisterRenaming) {
    match op {
        MirOpcode::CondCopy { condition, .. } => *condition = renaming.get(*condition),
        MirOpcode::CondJump { condition, .. } => *condition = renaming.get(*condition),
        MirOpcode::LoadAddress(addr) => {
            addr.base = renaming.get(addr.base);
            addr.dyn_offset = addr.dyn_offset.map(|r| renaming.get(r));
        }
        _ => {}
    }
}

/// Applies `renaming` everywhere a register can appear: instruction
/// operands/dests, opcode payload fields, and block live sets. Reused both
/// for the bulk SSA->Virtual rename (step 1) and, one register at a time,
/// by phi rewriting (step 4).
pub(crate) fn rename_all(f: &mut MirFunction, renaming: &RegisterRenaming) {
    let inst_ids: Vec<MirInstId> = f.all_insts().map(|(id, _)| id).collect();
    for id in inst_ids {
        let inst = f.inst_mut(id);
        for op in inst.operands.iter_mut() {
            *op = rename_operand(*op, renaming);
        }
        for d in inst.dests.iter_mut() {
            *d = renaming.get(*d);
        }
        rename_opcode(&mut inst.opcode, renaming);
    }
    for bid in f.block_ids().collect::<Vec<_>>() {
        let block = f.block_mut(bid);
        block.live_in = block.live_in.iter().map(|&r| renaming.get(r)).collect();
        block.live_out = block.live_out.iter().map(|&r| renaming.get(r)).collect();
    }
}

/// Sequentializes a simultaneous-assignment set of register-to-register
/// moves (all destinations distinct) into an ordered list of ordinary
/// copies, introducing one scratch register per cycle (§4.7 step 2:
/// "a scratch-register dance when a source register is also a destination
/// earlier in the sequence"). Standard out-of-SSA parallel-copy
/// sequentialization: resolve every move whose source is not itself pending
/// as someone else's destination, freeing its predecessor in turn; a move
/// stuck in a cycle is broken by first shunting its value to a scratch
/// register.
fn sequentialize_copies(f: &mut MirFunction, moves: &[(RegisterId, RegisterId)]) -> Vec<(RegisterId, RegisterId)> {
    let moves: Vec<(RegisterId, RegisterId)> = moves.iter().copied().filter(|&(dst, src)| dst != src).collect();
    if moves.is_empty() {
        return Vec::new();
    }

    let mut pred: FxHashMap<RegisterId, RegisterId> = FxHashMap::default();
    let mut loc: FxHashMap<RegisterId, RegisterId> = FxHashMap::default();
    let mut todo: VecDeque<RegisterId> = VecDeque::new();
    let mut ready: VecDeque<RegisterId> = VecDeque::new();

    for &(dst, src) in &moves {
        pred.insert(dst, src);
        loc.entry(dst).or_insert(dst);
        loc.entry(src).or_insert(src);
        todo.push_back(dst);
    }
    let srcs: FxHashSet<RegisterId> = moves.iter().map(|&(_, s)| s).collect();
    for &(dst, _) in &moves {
        if !srcs.contains(&dst) {
            ready.push_back(dst);
        }
    }

    let mut result = Vec::new();
    while !todo.is_empty() || !ready.is_empty() {
        while let Some(b) = ready.pop_front() {
            let a = pred[&b];
            let c = loc[&a];
            result.push((b, c));
            loc.insert(a, b);
            if a == c && pred.contains_key(&a) {
                ready.push_back(a);
            }
        }
        if let Some(b) = todo.pop_front() {
            if loc[&b] == b && pred.contains_key(&b) {
                let scratch = f.regs.alloc(RegisterPool::Virtual, 8, false);
                result.push((scratch, b));
                loc.insert(b, scratch);
                ready.push_back(b);
            }
        }
    }
    result
}

/// Step 2. Converts a call immediately followed by a return of its own
/// results into a tail call, and rewrites every remaining call through the
/// callee register bank.
fn rewrite_calls(f: &mut MirFunction) {
    for bid in f.block_ids().collect::<Vec<_>>() {
        try_convert_tail_call(f, bid);
    }

    let mut done: FxHashSet<MirInstId> = FxHashSet::default();
    loop {
        let next = f
            .block_ids()
            .collect::<Vec<_>>()
            .into_iter()
            .flat_map(|bid| f.block(bid).insts.clone().into_iter().map(move |i| (bid, i)))
            .find(|&(_, id)| matches!(f.inst(id).opcode, MirOpcode::Call { .. }) && !done.contains(&id));
        match next {
            Some((bid, id)) => {
                rewrite_nontail_call(f, bid, id);
                done.insert(id);
            }
            None => break,
        }
    }
}

fn try_convert_tail_call(f: &mut MirFunction, block: MirBlockId) {
    let insts = f.block(block).insts.clone();
    if insts.len() < 2 {
        return;
    }
    let term_id = insts[insts.len() - 1];
    let call_id = insts[insts.len() - 2];
    let call_inst = f.inst(call_id).clone();
    let MirOpcode::Call { shape: CallShape::Direct, .. } = call_inst.opcode else { return };
    let term_inst = f.inst(term_id).clone();
    if !matches!(term_inst.opcode, MirOpcode::Return) {
        return;
    }
    let returned: Vec<Option<RegisterId>> = term_inst.operands.iter().map(|o| o.as_reg()).collect();
    let produced: Vec<Option<RegisterId>> = call_inst.dests.iter().map(|&d| Some(d)).collect();
    if returned != produced {
        return;
    }
    convert_to_tail_call(f, block, call_id, term_id, &call_inst);
}

/// Direct-only per §9.1 ("tail calls: direct callee only"): an indirect
/// call matching the same shape never reaches this function, since
/// `try_convert_tail_call` already filtered on `CallShape::Direct`.
fn convert_to_tail_call(f: &mut MirFunction, block: MirBlockId, call_id: MirInstId, term_id: MirInstId, call_inst: &MirInst) {
    let MirOpcode::Call { shape, .. } = call_inst.opcode else { unreachable!() };
    let callee_operand = call_inst.operands[0];
    let args: Vec<MirOperand> = call_inst.operands[1..].to_vec();

    // Register-sourced arguments may collide with the target slots (the
    // callee's own argument convention starts at virtual register 0, same
    // as this function's), so they go through the cycle-safe shuffle first.
    let moves: Vec<(RegisterId, RegisterId)> = args
        .iter()
        .enumerate()
        .filter_map(|(i, op)| op.as_reg().map(|r| (RegisterId::new(RegisterPool::Virtual, i as u32), r)))
        .collect();
    for (dst, src) in sequentialize_copies(f, &moves) {
        f.insert(
            block,
            Some(term_id),
            MirInst { opcode: MirOpcode::Copy, operands: smallvec![MirOperand::Reg(src)], dests: smallvec![dst], byte_width: 8 },
        );
    }
    // Immediate/global/function-address arguments carry no ordering hazard
    // and are written after the shuffle settles every register-sourced slot.
    for (i, op) in args.iter().enumerate() {
        if op.as_reg().is_none() {
            let dest = RegisterId::new(RegisterPool::Virtual, i as u32);
            f.insert(block, Some(term_id), MirInst { opcode: MirOpcode::Copy, operands: smallvec![*op], dests: smallvec![dest], byte_width: 8 });
        }
    }

    let new_operands: SmallVec<[MirOperand; 3]> = std::iter::once(callee_operand)
        .chain((0..args.len()).map(|i| MirOperand::Reg(RegisterId::new(RegisterPool::Virtual, i as u32))))
        .collect();

    f.erase(block, term_id);
    f.erase(block, call_id);
    f.insert(block, None, MirInst { opcode: MirOpcode::TailCall { shape }, operands: new_operands, dests: smallvec![], byte_width: 0 });
}

/// The "otherwise" branch of step 2: allocate a fresh callee bank, copy
/// arguments in, rewrite the call to address that bank, and copy results
/// back out to the call's original destinations.
fn rewrite_nontail_call(f: &mut MirFunction, block: MirBlockId, call_id: MirInstId) {
    let call_inst = f.inst(call_id).clone();
    let MirOpcode::Call { shape, .. } = call_inst.opcode else { unreachable!() };
    let callee_operand = call_inst.operands[0];
    let args: Vec<MirOperand> = call_inst.operands[1..].to_vec();
    let orig_dests: Vec<RegisterId> = call_inst.dests.to_vec();

    let bank_size = CALL_METADATA_REGISTERS + (args.len() as u32).max(orig_dests.len() as u32);
    let base = f.regs.count(RegisterPool::Callee) as u32;
    let callee_regs: Vec<RegisterId> = (0..bank_size).map(|_| f.regs.alloc(RegisterPool::Callee, 8, true)).collect();

    let insts = f.block(block).insts.clone();
    let pos = insts.iter().position(|&i| i == call_id).expect("call must be in its own block");
    let next_id = insts.get(pos + 1).copied();

    for (i, &op) in args.iter().enumerate() {
        let dest = callee_regs[CALL_METADATA_REGISTERS as usize + i];
        f.insert(block, Some(call_id), MirInst { opcode: MirOpcode::Copy, operands: smallvec![op], dests: smallvec![dest], byte_width: 8 });
    }

    let new_operands: SmallVec<[MirOperand; 3]> = std::iter::once(callee_operand)
        .chain((0..args.len()).map(|i| MirOperand::Reg(callee_regs[CALL_METADATA_REGISTERS as usize + i])))
        .collect();
    let result_regs: SmallVec<[RegisterId; 2]> =
        (0..orig_dests.len()).map(|i| callee_regs[CALL_METADATA_REGISTERS as usize + i]).collect();

    {
        let inst = f.inst_mut(call_id);
        inst.operands = new_operands;
        inst.dests = result_regs.clone();
        inst.opcode = MirOpcode::Call { shape, register_offset: base };
    }

    for (i, &orig_dest) in orig_dests.iter().enumerate() {
        f.insert(
            block,
            next_id,
            MirInst { opcode: MirOpcode::Copy, operands: smallvec![MirOperand::Reg(result_regs[i])], dests: smallvec![orig_dest], byte_width: 8 },
        );
    }
}

/// Step 3: copy each return operand into its return-value virtual register
/// (the same slots a call's arguments occupy, reused per step 1).
fn rewrite_returns(f: &mut MirFunction) {
    for bid in f.block_ids().collect::<Vec<_>>() {
        let Some(term_id) = f.block(bid).terminator() else { continue };
        if !matches!(f.inst(term_id).opcode, MirOpcode::Return) {
            continue;
        }
        let operands = f.inst(term_id).operands.clone();
        if operands.is_empty() {
            continue;
        }
        let mut new_operands: SmallVec<[MirOperand; 3]> = SmallVec::new();
        for (i, op) in operands.iter().enumerate() {
            let dest = RegisterId::new(RegisterPool::Virtual, i as u32);
            f.insert(bid, Some(term_id), MirInst { opcode: MirOpcode::Copy, operands: smallvec![*op], dests: smallvec![dest], byte_width: 8 });
            new_operands.push(MirOperand::Reg(dest));
            f.block_mut(bid).live_out.insert(dest);
        }
        f.inst_mut(term_id).operands = new_operands;
    }
}

/// Step 4. Every phi destination `d` is copied to a fresh register `t`
/// immediately, and every other use of `d` is renamed to `t`; predecessors
/// then write their incoming value directly into `d`. Applied unconditionally
/// rather than only on a critical edge or a shared destination as §4.7's
/// prose describes: the indirection is always safe, and a later register
/// allocation post-pass drops the resulting copy when source and destination
/// coincide, so restricting it to the narrower case buys nothing.
fn rewrite_phis(f: &mut MirFunction) {
    for bid in f.block_ids().collect::<Vec<_>>() {
        loop {
            let phi_id = f.block(bid).insts.iter().copied().find(|&i| matches!(f.inst(i).opcode, MirOpcode::Phi { .. }));
            let Some(phi_id) = phi_id else { break };
            let d = f.inst(phi_id).dests[0];
            let width = f.regs.byte_width(d);
            let t = f.regs.alloc(RegisterPool::Virtual, width, false);

            let mut renaming = RegisterRenaming::default();
            renaming.insert(d, t);
            rename_all(f, &renaming);

            let phi_after = f.inst(phi_id).clone();
            f.insert(bid, Some(phi_id), MirInst { opcode: MirOpcode::Copy, operands: smallvec![MirOperand::Reg(d)], dests: smallvec![t], byte_width: width });
            f.erase(bid, phi_id);

            if let MirOpcode::Phi { incoming } = &phi_after.opcode {
                for (slot, &pred) in incoming.iter().enumerate() {
                    let value = phi_after.operands[slot];
                    let Some(pred_term) = f.block(pred).terminator() else { continue };
                    f.insert(pred, Some(pred_term), MirInst { opcode: MirOpcode::Copy, operands: smallvec![value], dests: smallvec![d], byte_width: width });
                    f.block_mut(pred).live_out.insert(d);
                }
            }
        }
    }
}

/// Step 6: a call clobbers its entire callee bank, not only the slots it
/// happened to use for this call's own args/results, since the bank's
/// positions are shared ABI-wide. Materialized only now because the bank's
/// extent (`register_offset` plus its size) is finalized by step 2.
fn mark_call_clobbers(f: &mut MirFunction) {
    let call_ids: Vec<MirInstId> = f.all_insts().filter(|(_, inst)| matches!(inst.opcode, MirOpcode::Call { .. })).map(|(id, _)| id).collect();
    for id in call_ids {
        let inst = f.inst(id);
        let MirOpcode::Call { register_offset, .. } = inst.opcode else { unreachable!() };
        let bank_size = CALL_METADATA_REGISTERS + (inst.operands.len() as u32 - 1).max(inst.dests.len() as u32);
        let extra: Vec<RegisterId> = (0..bank_size).map(|i| RegisterId::new(RegisterPool::Callee, register_offset + i)).collect();
        let inst = f.inst_mut(id);
        for r in extra {
            if !inst.dests.contains(&r) {
                inst.dests.push(r);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::builder::IrBuilder;
    use crate::ir::context::Context;
    use crate::ir::function::{FuncId, InstId, Param};
    use crate::ir::instruction::{Instruction, Opcode};
    use crate::ir::module::Module;
    use crate::ir::value::ValueRef;
    use crate::isel::{lower_module, TargetInfo};
    use smallvec::smallvec;

    fn placeholder_inst(opcode: Opcode, operands: SmallVec<[ValueRef; 3]>, ty: crate::ir::types::TypeId, parent: crate::ir::function::BlockId) -> Instruction {
        Instruction { id: InstId(0), opcode, operands, ty, name: None, parent, pointer_info: None }
    }

    #[test]
    fn add_and_return_reuses_arg_slot_for_the_result() {
        let mut cx = Context::new();
        let mut module = Module::new("test");
        let i32t = cx.int_type(32);
        let f = module.declare_function(
            "add_two",
            i32t,
            vec![Param { ty: i32t, name: "a".into(), attribute: None }, Param { ty: i32t, name: "b".into(), attribute: None }],
            false,
        );
        let entry = module.function_mut(f).push_block("entry");
        let mut b = IrBuilder::new(&mut module);
        let add = b.insert(f, entry, None, placeholder_inst(Opcode::Add, smallvec![ValueRef::Param(f, 0), ValueRef::Param(f, 1)], i32t, entry));
        b.insert(f, entry, None, placeholder_inst(Opcode::Return, smallvec![ValueRef::Inst(f, add)], i32t, entry));

        let target = TargetInfo::default();
        let mut mir = lower_module(&cx, &module, &target);
        let mf = mir.function_mut(f);
        destroy_ssa(mf);

        assert_eq!(mf.phase, RegisterPhase::Virtual);
        let entry_mb = mf.entry().unwrap();
        let opcodes: Vec<&MirOpcode> = mf.block(entry_mb).insts.iter().map(|&id| &mf.inst(id).opcode).collect();
        assert_eq!(opcodes.len(), 3);
        assert!(matches!(opcodes[0], MirOpcode::Add));
        let term = mf.inst(*mf.block(entry_mb).insts.last().unwrap());
        assert!(matches!(term.opcode, MirOpcode::Return));
        assert_eq!(term.operands[0], MirOperand::Reg(RegisterId::new(RegisterPool::Virtual, 0)));
        assert!(mf.regs.is_fixed(RegisterId::new(RegisterPool::Virtual, 0)));
    }

    #[test]
    fn a_call_followed_by_a_matching_return_becomes_a_tail_call() {
        let mut cx = Context::new();
        let mut module = Module::new("test");
        let i32t = cx.int_type(32);

        let callee = module.declare_function("callee", i32t, vec![Param { ty: i32t, name: "x".into(), attribute: None }], false);
        let callee_entry = module.function_mut(callee).push_block("entry");
        let mut cb = IrBuilder::new(&mut module);
        cb.insert(callee, callee_entry, None, placeholder_inst(Opcode::Return, smallvec![ValueRef::Param(callee, 0)], i32t, callee_entry));

        let caller = module.declare_function("caller", i32t, vec![Param { ty: i32t, name: "y".into(), attribute: None }], false);
        let caller_entry = module.function_mut(caller).push_block("entry");
        let mut b = IrBuilder::new(&mut module);
        let call = b.insert(
            caller,
            caller_entry,
            None,
            placeholder_inst(Opcode::Call, smallvec![ValueRef::Function(callee), ValueRef::Param(caller, 0)], i32t, caller_entry),
        );
        b.insert(caller, caller_entry, None, placeholder_inst(Opcode::Return, smallvec![ValueRef::Inst(caller, call)], i32t, caller_entry));

        let target = TargetInfo::default();
        let mut mir = lower_module(&cx, &module, &target);
        let mf = mir.function_mut(caller);
        destroy_ssa(mf);

        let entry_mb = mf.entry().unwrap();
        let insts = &mf.block(entry_mb).insts;
        assert!(!insts.is_empty());
        let last = mf.inst(*insts.last().unwrap());
        assert!(matches!(last.opcode, MirOpcode::TailCall { shape: CallShape::Direct }));
        assert!(insts.iter().all(|&id| !matches!(mf.inst(id).opcode, MirOpcode::Call { .. } | MirOpcode::Return)));
    }

    #[test]
    fn phi_elimination_leaves_no_phi_and_threads_a_copy_into_each_predecessor() {
        let mut cx = Context::new();
        let mut module = Module::new("test");
        let i32t = cx.int_type(32);
        let f = module.declare_function("diamond", i32t, vec![Param { ty: i32t, name: "cond".into(), attribute: None }], false);
        let entry = module.function_mut(f).push_block("entry");
        let then_bb = module.function_mut(f).push_block("then");
        let else_bb = module.function_mut(f).push_block("else");
        let merge = module.function_mut(f).push_block("merge");

        let mut b = IrBuilder::new(&mut module);
        b.insert(
            f,
            entry,
            None,
            placeholder_inst(Opcode::Branch, smallvec![ValueRef::Param(f, 0), ValueRef::Block(f, then_bb), ValueRef::Block(f, else_bb)], i32t, entry),
        );
        b.insert(f, then_bb, None, placeholder_inst(Opcode::Goto, smallvec![ValueRef::Block(f, merge)], i32t, then_bb));
        b.insert(f, else_bb, None, placeholder_inst(Opcode::Goto, smallvec![ValueRef::Block(f, merge)], i32t, else_bb));

        let c1 = cx.int_constant_of_type(i32t, 1);
        let c2 = cx.int_constant_of_type(i32t, 2);
        let phi = b.insert(
            f,
            merge,
            None,
            Instruction {
                id: InstId(0),
                opcode: Opcode::Phi { incoming: vec![then_bb, else_bb] },
                operands: smallvec![ValueRef::Const(c1), ValueRef::Const(c2)],
                ty: i32t,
                name: None,
                parent: merge,
                pointer_info: None,
            },
        );
        b.insert(f, merge, None, placeholder_inst(Opcode::Return, smallvec![ValueRef::Inst(f, phi)], i32t, merge));

        let target = TargetInfo::default();
        let mut mir = lower_module(&cx, &module, &target);
        let mf = mir.function_mut(f);
        destroy_ssa(mf);

        for (_, inst) in mf.all_insts() {
            assert!(!matches!(inst.opcode, MirOpcode::Phi { .. }));
        }
        for pred in [mf.blocks_in_order().find(|b| b.name == "then").unwrap().id, mf.blocks_in_order().find(|b| b.name == "else").unwrap().id] {
            let insts = &mf.block(pred).insts;
            assert_eq!(insts.len(), 2, "expected a copy threaded before the jump to the merge block");
            assert!(matches!(mf.inst(insts[0]).opcode, MirOpcode::Copy));
            assert!(matches!(mf.inst(insts[1]).opcode, MirOpcode::Jump));
        }
    }
}
