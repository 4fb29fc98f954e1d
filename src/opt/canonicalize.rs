//! Canonicalization (§4.5 pass suite). Puts commutative binary operations
//! into a fixed operand order (constant on the right) so later passes
//! (instcombine, GVN) only need to match one shape.

use crate::ir::context::Context;
use crate::ir::function::FuncId;
use crate::ir::instruction::Opcode;
use crate::ir::module::Module;
use crate::pass::{FunctionPass, PassCategory};

pub struct Canonicalize;

fn is_commutative(op: &Opcode) -> bool {
    matches!(
        op,
        Opcode::Add | Opcode::Mul | Opcode::And | Opcode::Or | Opcode::Xor | Opcode::FAdd | Opcode::FMul
    )
}

impl FunctionPass for Canonicalize {
    fn name(&self) -> &'static str {
        "canonicalize"
    }

    fn category(&self) -> PassCategory {
        PassCategory::Simplification
    }

    fn run(&self, _cx: &mut Context, module: &mut Module, func: FuncId) -> bool {
        let mut changed = false;
        let inst_ids: Vec<_> = module
            .function(func)
            .blocks_in_order()
            .flat_map(|b| b.insts.clone())
            .collect();
        for inst_id in inst_ids {
            let f = module.function_mut(func);
            let inst = f.inst_mut(inst_id);
            if is_commutative(&inst.opcode) && inst.operands.len() == 2 {
                let lhs_const = inst.operands[0].is_constant();
                let rhs_const = inst.operands[1].is_constant();
                if lhs_const && !rhs_const {
                    inst.operands.swap(0, 1);
                    changed = true;
                }
            }
        }
        changed
    }
}
