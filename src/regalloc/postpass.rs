//! Step 5 (§4.8): the cleanup passes that run once every register is
//! hardware. Grounded directly on `evictCopyInstructions` and
//! `evictUnusedInstructions` in the original `RegisterAllocator.cc`.

use crate::common::fx_hash::FxHashSet;
use crate::mir::function::MirFunction;
use crate::mir::instruction::{MirOpcode, MirOperand};
use crate::mir::register::RegisterId;

/// Drop any copy whose source and destination coincide — routine after
/// hardware-register rewriting collapses what were distinct virtual
/// registers onto the same color.
pub fn drop_identity_copies(f: &mut MirFunction) {
    for bid in f.block_ids().collect::<Vec<_>>() {
        for inst_id in f.block(bid).insts.clone() {
            let inst = f.inst(inst_id);
            if matches!(inst.opcode, MirOpcode::Copy) {
                if let (Some(MirOperand::Reg(src)), Some(&dst)) = (inst.operands.first(), inst.dests.first()) {
                    if *src == dst {
                        f.erase(bid, inst_id);
                    }
                }
            }
        }
    }
}

/// A copy of the literal zero into a register wider than 2 bytes is
/// shortened to a self-XOR: two register operands encode smaller than a
/// wide immediate.
pub fn xor_self_for_zero(f: &mut MirFunction) {
    for bid in f.block_ids().collect::<Vec<_>>() {
        for inst_id in f.block(bid).insts.clone() {
            let inst = f.inst(inst_id).clone();
            if !matches!(inst.opcode, MirOpcode::Copy) || inst.byte_width <= 2 {
                continue;
            }
            let Some(MirOperand::ImmInt(0)) = inst.operands.first() else { continue };
            let Some(&dst) = inst.dests.first() else { continue };
            let replaced = f.inst_mut(inst_id);
            replaced.opcode = MirOpcode::Xorself;
            replaced.operands = smallvec::smallvec![MirOperand::Reg(dst), MirOperand::Reg(dst)];
        }
    }
}

/// Scans each block in reverse, tracking which registers are live at the
/// current point, and deletes any instruction with no side effects whose
/// destinations are all dead there. A `CondCopy` does not unconditionally
/// kill its destination's prior liveness (the copy may not execute), so it
/// never removes a register from the running live set even when its own
/// destination happens to be dead at this point (mirrors the original's
/// exclusion of `CondCopyInst` from the "defs kill liveness" step).
pub fn evict_dead_instructions(f: &mut MirFunction) {
    for bid in f.block_ids().collect::<Vec<_>>() {
        let mut live: FxHashSet<RegisterId> = f.block(bid).live_out.clone();
        let mut to_erase = Vec::new();
        for &inst_id in f.block(bid).insts.clone().iter().rev() {
            let inst = f.inst(inst_id).clone();
            let is_callee_dest = inst.dests.iter().any(|d| matches!(d.pool, crate::mir::register::RegisterPool::Callee));
            let all_dead = inst.dests.iter().all(|d| !live.contains(d));
            if !inst.opcode.has_side_effects() && !is_callee_dest && all_dead {
                to_erase.push(inst_id);
                continue;
            }
            if !matches!(inst.opcode, MirOpcode::CondCopy { .. }) {
                for d in &inst.dests {
                    live.remove(d);
                }
            }
            for op in &inst.operands {
                if let Some(r) = op.as_reg() {
                    live.insert(r);
                }
            }
        }
        for inst_id in to_erase {
            f.erase(bid, inst_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::function::FuncId;
    use crate::mir::instruction::MirInst;
    use crate::mir::register::RegisterPool;

    #[test]
    fn identity_copy_is_dropped() {
        let mut f = MirFunction::new(FuncId(0), "f".into());
        let bid = f.push_block("entry");
        let r = f.regs.alloc(RegisterPool::Hardware, 8, false);
        f.insert(bid, None, MirInst { opcode: MirOpcode::Copy, operands: smallvec::smallvec![MirOperand::Reg(r)], dests: smallvec::smallvec![r], byte_width: 8 });
        drop_identity_copies(&mut f);
        assert!(f.block(bid).insts.is_empty());
    }

    #[test]
    fn zero_copy_into_a_wide_register_becomes_a_self_xor() {
        let mut f = MirFunction::new(FuncId(0), "f".into());
        let bid = f.push_block("entry");
        let r = f.regs.alloc(RegisterPool::Hardware, 8, false);
        f.insert(bid, None, MirInst { opcode: MirOpcode::Copy, operands: smallvec::smallvec![MirOperand::ImmInt(0)], dests: smallvec::smallvec![r], byte_width: 8 });
        xor_self_for_zero(&mut f);
        let inst = f.inst(f.block(bid).insts[0]);
        assert!(matches!(inst.opcode, MirOpcode::Xorself));
    }

    #[test]
    fn a_dead_side_effect_free_def_is_evicted() {
        let mut f = MirFunction::new(FuncId(0), "f".into());
        let bid = f.push_block("entry");
        let a = f.regs.alloc(RegisterPool::Hardware, 8, false);
        let dead = f.regs.alloc(RegisterPool::Hardware, 8, false);
        f.insert(bid, None, MirInst { opcode: MirOpcode::Add, operands: smallvec::smallvec![MirOperand::Reg(a), MirOperand::Reg(a)], dests: smallvec::smallvec![dead], byte_width: 8 });
        f.insert(bid, None, MirInst { opcode: MirOpcode::Return, operands: smallvec::smallvec![MirOperand::Reg(a)], dests: smallvec::smallvec![], byte_width: 8 });
        evict_dead_instructions(&mut f);
        assert_eq!(f.block(bid).insts.len(), 1);
        assert!(matches!(f.inst(f.block(bid).insts[0]).opcode, MirOpcode::Return));
    }
}
