//! Tail-call marking (§4.5 pass suite).
//!
//! A pure analysis pass: it never mutates the CFG, only records which
//! `call` instructions are structurally shaped like a tail call (directly
//! followed by a `return` of exactly the call's result) into
//! [`crate::ir::function::Function::tail_call_candidates`]. SSA destruction
//! (§4.7 step 2, direct-only per §9.1) re-derives the same pattern on MIR
//! independently and does not read this set; it exists for diagnostics and
//! for tests that want to assert the shape survived the optimizer without
//! having to re-walk every block.

use crate::ir::context::Context;
use crate::ir::function::FuncId;
use crate::ir::instruction::Opcode;
use crate::ir::module::Module;
use crate::ir::value::ValueRef;
use crate::pass::{FunctionPass, PassCategory};

pub struct TailCallMark;

impl FunctionPass for TailCallMark {
    fn name(&self) -> &'static str {
        "tailcall"
    }

    fn category(&self) -> PassCategory {
        PassCategory::Analysis
    }

    fn run(&self, _cx: &mut Context, module: &mut Module, func: FuncId) -> bool {
        let mut candidates = Vec::new();
        {
            let f = module.function(func);
            for block in f.blocks_in_order() {
                for pair in block.insts.windows(2) {
                    let (call_id, ret_id) = (pair[0], pair[1]);
                    let call = f.inst(call_id);
                    let ret = f.inst(ret_id);
                    if !matches!(call.opcode, Opcode::Call) || !matches!(ret.opcode, Opcode::Return) {
                        continue;
                    }
                    let call_ref = ValueRef::Inst(func, call_id);
                    let matches_result = match ret.operands.first() {
                        Some(&v) => v == call_ref,
                        None => !call.has_result(),
                    };
                    if matches_result {
                        candidates.push(call_id);
                    }
                }
            }
        }
        if candidates.is_empty() {
            return false;
        }
        let f = module.function_mut(func);
        let before = f.tail_call_candidates.len();
        f.tail_call_candidates.extend(candidates);
        f.tail_call_candidates.len() != before
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::function::Param;
    use crate::ir::instruction::Instruction;
    use smallvec::smallvec;

    #[test]
    fn marks_call_immediately_followed_by_matching_return() {
        let mut cx = Context::new();
        let mut module = Module::new("test");
        let i32t = cx.int_type(32);
        let callee = module.declare_function("f", i32t, vec![], false);
        let caller = module.declare_function(
            "g",
            i32t,
            vec![Param { ty: i32t, name: "x".into(), attribute: None }],
            false,
        );
        let entry = module.function_mut(caller).push_block("entry");
        let mut builder = crate::ir::builder::IrBuilder::new(&mut module);
        let call = builder.insert(
            caller,
            entry,
            None,
            Instruction {
                id: crate::ir::function::InstId(0),
                opcode: Opcode::Call,
                operands: smallvec![ValueRef::Function(callee)],
                ty: i32t,
                name: None,
                parent: entry,
                pointer_info: None,
            },
        );
        builder.insert(
            caller,
            entry,
            None,
            Instruction {
                id: crate::ir::function::InstId(0),
                opcode: Opcode::Return,
                operands: smallvec![ValueRef::Inst(caller, call)],
                ty: i32t,
                name: None,
                parent: entry,
                pointer_info: None,
            },
        );

        let changed = TailCallMark.run(&mut cx, &mut module, caller);
        assert!(changed);
        assert!(module.function(caller).tail_call_candidates.contains(&call));
    }

    #[test]
    fn does_not_mark_call_whose_result_is_not_returned() {
        let mut cx = Context::new();
        let mut module = Module::new("test");
        let i32t = cx.int_type(32);
        let callee = module.declare_function("f", i32t, vec![], false);
        let caller = module.declare_function("g", i32t, vec![], false);
        let entry = module.function_mut(caller).push_block("entry");
        let mut builder = crate::ir::builder::IrBuilder::new(&mut module);
        builder.insert(
            caller,
            entry,
            None,
            Instruction {
                id: crate::ir::function::InstId(0),
                opcode: Opcode::Call,
                operands: smallvec![ValueRef::Function(callee)],
                ty: i32t,
                name: None,
                parent: entry,
                pointer_info: None,
            },
        );
        let zero = ValueRef::Const(cx.int_constant(32, 0));
        builder.insert(
            caller,
            entry,
            None,
            Instruction {
                id: crate::ir::function::InstId(0),
                opcode: Opcode::Return,
                operands: smallvec![zero],
                ty: i32t,
                name: None,
                parent: entry,
                pointer_info: None,
            },
        );

        let changed = TailCallMark.run(&mut cx, &mut module, caller);
        assert!(!changed);
    }
}
