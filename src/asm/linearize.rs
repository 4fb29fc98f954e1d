//! Block linearization (§4.9: "choose a block order minimizing fall-through
//! jumps ... the contract is that at most one jump per terminator is
//! emitted"). A greedy DFS that always visits a `Jump`'s sole target or a
//! `CondJump`'s `then_target` next, when not already placed, keeps that
//! edge a fall-through; any edge left unplaced when the block is finally
//! emitted becomes a real jump instruction.

use crate::common::fx_hash::FxHashSet;
use crate::mir::function::{MirBlockId, MirFunction};
use crate::mir::instruction::MirOpcode;

pub fn order_blocks(f: &MirFunction) -> Vec<MirBlockId> {
    let Some(entry) = f.entry() else { return Vec::new() };
    let mut order = Vec::new();
    let mut placed: FxHashSet<MirBlockId> = FxHashSet::default();
    let mut stack = vec![entry];

    while let Some(b) = stack.pop() {
        if !placed.insert(b) {
            continue;
        }
        order.push(b);
        // Push the preferred fall-through target last so it pops next,
        // keeping this chain contiguous in the final order.
        let Some(term_id) = f.block(b).terminator() else { continue };
        match &f.inst(term_id).opcode {
            MirOpcode::Jump => {
                if let Some(target) = jump_target(f, term_id) {
                    if !placed.contains(&target) {
                        stack.push(target);
                    }
                }
            }
            MirOpcode::CondJump { then_target, else_target, .. } => {
                if !placed.contains(else_target) {
                    stack.push(*else_target);
                }
                if !placed.contains(then_target) {
                    stack.push(*then_target);
                }
            }
            _ => {}
        }
    }

    // Any block unreachable from entry by the preference walk (e.g. a loop
    // header only reached via a back edge already claimed by its own
    // body) still needs a slot; append in function order.
    for b in f.block_ids() {
        if placed.insert(b) {
            order.push(b);
        }
    }

    order
}

fn jump_target(f: &MirFunction, term_id: crate::mir::function::MirInstId) -> Option<MirBlockId> {
    use crate::mir::instruction::MirOperand;
    f.inst(term_id).operands.iter().find_map(|op| match op {
        MirOperand::Block(b) => Some(*b),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::function::FuncId;
    use crate::mir::instruction::{MirInst, MirOperand};
    use smallvec::smallvec;

    #[test]
    fn an_unconditional_jump_chain_lands_contiguous() {
        let mut f = MirFunction::new(FuncId(0), "f".into());
        let a = f.push_block("a");
        let b = f.push_block("b");
        let c = f.push_block("c");
        f.insert(a, None, MirInst { opcode: MirOpcode::Jump, operands: smallvec![MirOperand::Block(b)], dests: smallvec![], byte_width: 0 });
        f.insert(b, None, MirInst { opcode: MirOpcode::Jump, operands: smallvec![MirOperand::Block(c)], dests: smallvec![], byte_width: 0 });
        f.insert(c, None, MirInst { opcode: MirOpcode::Return, operands: smallvec![], dests: smallvec![], byte_width: 0 });

        assert_eq!(order_blocks(&f), vec![a, b, c]);
    }
}
