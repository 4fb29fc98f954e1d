//! Dead code elimination (§4.5 pass suite). Scans each block in reverse,
//! removing any instruction with no side effects whose result has zero
//! uses; iterates to a local fixed point so a chain of now-dead producers
//! collapses in one pass invocation.

use crate::ir::context::Context;
use crate::ir::function::FuncId;
use crate::ir::module::Module;
use crate::ir::value::ValueRef;
use crate::pass::{FunctionPass, PassCategory};

pub struct Dce;

impl FunctionPass for Dce {
    fn name(&self) -> &'static str {
        "dce"
    }

    fn category(&self) -> PassCategory {
        PassCategory::Simplification
    }

    fn run(&self, _cx: &mut Context, module: &mut Module, func: FuncId) -> bool {
        let mut changed = false;
        let mut progress = true;
        while progress {
            progress = false;
            let block_ids: Vec<_> = module.function(func).block_ids().collect();
            for block_id in block_ids {
                let inst_ids: Vec<_> = module.function(func).block(block_id).insts.clone();
                for inst_id in inst_ids.into_iter().rev() {
                    let f = module.function(func);
                    let Some(inst) = f.try_inst(inst_id) else { continue };
                    if inst.opcode.has_side_effects() {
                        continue;
                    }
                    if module.use_count(ValueRef::Inst(func, inst_id)) > 0 {
                        continue;
                    }
                    let mut builder = crate::ir::builder::IrBuilder::new(module);
                    builder.erase(func, inst_id);
                    changed = true;
                    progress = true;
                }
            }
        }
        changed
    }
}
