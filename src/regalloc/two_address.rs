//! Step 1 (§4.8): three-to-two-address conversion. The VM's instructions
//! are two-address (destination doubles as the first operand); MIR as
//! produced by ISel and SSA destruction is still three-address. Grounded
//! directly on the original `convertToTwoAddressMode` in
//! `RegisterAllocator.cc`.

use crate::mir::function::MirFunction;
use crate::mir::instruction::{MirInst, MirOpcode, MirOperand};
use crate::mir::register::RegisterPool;

/// Opcodes with exactly one destination and (at least) two register/value
/// operands where operand 0 must equal the destination on the VM. Compares
/// and casts are excluded: they do not clobber an operand register
/// in-place on this VM (their destination is a fresh boolean/converted
/// value), matching the original's `Filter<UnaryArithmeticInst,
/// ArithmeticInst, ConversionInst>` — arithmetic only.
fn is_two_address_op(op: &MirOpcode) -> bool {
    matches!(
        op,
        MirOpcode::Add
            | MirOpcode::Sub
            | MirOpcode::Mul
            | MirOpcode::SDiv
            | MirOpcode::UDiv
            | MirOpcode::SRem
            | MirOpcode::URem
            | MirOpcode::And
            | MirOpcode::Or
            | MirOpcode::Xor
            | MirOpcode::Shl
            | MirOpcode::LShr
            | MirOpcode::AShr
            | MirOpcode::Neg
            | MirOpcode::Not
            | MirOpcode::FAdd
            | MirOpcode::FSub
            | MirOpcode::FMul
            | MirOpcode::FDiv
            | MirOpcode::FNeg
    )
}

fn is_commutative(op: &MirOpcode) -> bool {
    matches!(op, MirOpcode::Add | MirOpcode::Mul | MirOpcode::And | MirOpcode::Or | MirOpcode::Xor | MirOpcode::FAdd | MirOpcode::FMul)
}

/// For every arithmetic/unary instruction whose destination is not already
/// its first operand: if commutative and operand 1 already equals the
/// destination, swap the operands (cheaper than a copy); otherwise insert a
/// copy from operand 0 into the destination ahead of the instruction and
/// repoint operand 0 at the destination.
pub fn convert_to_two_address(f: &mut MirFunction) {
    for bid in f.block_ids().collect::<Vec<_>>() {
        for inst_id in f.block(bid).insts.clone() {
            let inst = f.inst(inst_id).clone();
            if !is_two_address_op(&inst.opcode) || inst.dests.is_empty() {
                continue;
            }
            let dest = inst.dests[0];
            let Some(op0) = inst.operands.first().and_then(|o| o.as_reg()) else { continue };
            if op0 == dest {
                continue;
            }
            if inst.operands.len() > 1 && is_commutative(&inst.opcode) {
                if let Some(op1) = inst.operands[1].as_reg() {
                    if op1 == dest {
                        f.inst_mut(inst_id).operands.swap(0, 1);
                        continue;
                    }
                }
            }
            // Any other register operand still reading `dest` at this point
            // would be clobbered by the copy; not possible here since `dest`
            // is a fresh virtual register that only this instruction defines
            // (SSA-derived), so only `op0` can coincide with it.
            f.insert(
                bid,
                Some(inst_id),
                MirInst { opcode: MirOpcode::Copy, operands: smallvec::smallvec![inst.operands[0]], dests: smallvec::smallvec![dest], byte_width: inst.byte_width },
            );
            f.inst_mut(inst_id).operands[0] = MirOperand::Reg(dest);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mir::function::MirBlockId;

    fn dummy_function_with_one_sub() -> (MirFunction, MirBlockId) {
        use crate::ir::function::FuncId;
        let mut f = MirFunction::new(FuncId(0), "f".into());
        let bid = f.push_block("entry");
        let a = f.regs.alloc(RegisterPool::Virtual, 8, true);
        let b = f.regs.alloc(RegisterPool::Virtual, 8, true);
        let d = f.regs.alloc(RegisterPool::Virtual, 8, false);
        f.insert(bid, None, MirInst { opcode: MirOpcode::Sub, operands: smallvec::smallvec![MirOperand::Reg(a), MirOperand::Reg(b)], dests: smallvec::smallvec![d], byte_width: 8 });
        f.insert(bid, None, MirInst { opcode: MirOpcode::Return, operands: smallvec::smallvec![MirOperand::Reg(d)], dests: smallvec::smallvec![], byte_width: 8 });
        (f, bid)
    }

    #[test]
    fn non_commutative_mismatch_inserts_a_copy_and_repoints_operand_zero() {
        let (mut f, bid) = dummy_function_with_one_sub();
        convert_to_two_address(&mut f);
        let insts = &f.block(bid).insts;
        assert_eq!(insts.len(), 3, "expected an inserted copy ahead of the sub");
        assert!(matches!(f.inst(insts[0]).opcode, MirOpcode::Copy));
        let sub = f.inst(insts[1]);
        assert_eq!(sub.operands[0].as_reg(), sub.dests.first().copied());
    }

    #[test]
    fn commutative_op_with_dest_in_operand_one_swaps_instead_of_copying() {
        use crate::ir::function::FuncId;
        let mut f = MirFunction::new(FuncId(0), "f".into());
        let bid = f.push_block("entry");
        let a = f.regs.alloc(RegisterPool::Virtual, 8, true);
        let d = f.regs.alloc(RegisterPool::Virtual, 8, false);
        // d = a + d -- commutative, dest already in operand 1: swap, no copy.
        f.insert(bid, None, MirInst { opcode: MirOpcode::Add, operands: smallvec::smallvec![MirOperand::Reg(a), MirOperand::Reg(d)], dests: smallvec::smallvec![d], byte_width: 8 });
        convert_to_two_address(&mut f);
        let insts = &f.block(bid).insts;
        assert_eq!(insts.len(), 1, "swap must not insert a copy");
        let add = f.inst(insts[0]);
        assert_eq!(add.operands[0], MirOperand::Reg(d));
        assert_eq!(add.operands[1], MirOperand::Reg(a));
    }
}
