//! Assembly emission (§4.9): the last MIR-to-bytes pass. Takes a fully
//! allocated (`RegisterPhase::Hardware`) [`MirModule`] and produces a
//! [`stream::AssemblyStream`] — a byte vector, a symbol table, and an
//! unresolved-reference list for the (out-of-scope) linker to patch. Split
//! into `linearize` (block order), `encode` (per-instruction bytes), and
//! `stream` (the output shape and module-wide linking), splitting the
//! writer from its output types.

pub mod encode;
pub mod linearize;
pub mod stream;

use crate::ir::module::Module as IrModule;
use crate::mir::module::MirModule;
use crate::mir::register::RegisterPhase;

pub use stream::{AssemblyStream, FunctionRecord, UnresolvedReference};

/// Assembles every non-foreign function in `module` and links the results
/// into one module-wide stream.
pub fn assemble(module: &MirModule, ir_module: &IrModule) -> AssemblyStream {
    let records: Vec<FunctionRecord> = module
        .functions()
        .map(|f| {
            assert_eq!(f.phase, RegisterPhase::Hardware, "assembly emission requires hardware-register form");
            encode::encode_function(f, module, ir_module)
        })
        .collect();
    AssemblyStream::link_functions(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::builder::IrBuilder;
    use crate::ir::context::Context;
    use crate::ir::function::{FuncId, InstId, Param};
    use crate::ir::instruction::{Instruction, Opcode};
    use crate::ir::value::ValueRef;
    use crate::isel::{lower_module, TargetInfo};
    use smallvec::smallvec;

    fn placeholder_inst(opcode: Opcode, operands: smallvec::SmallVec<[ValueRef; 3]>, ty: crate::ir::types::TypeId, parent: crate::ir::function::BlockId) -> Instruction {
        Instruction { id: InstId(0), opcode, operands, ty, name: None, parent, pointer_info: None }
    }

    #[test]
    fn a_function_returning_a_constant_assembles_to_a_nonempty_stream_with_its_symbol() {
        let mut cx = Context::new();
        let mut module = IrModule::new("test");
        let i32t = cx.int_type(32);
        let f = module.declare_function("main", i32t, vec![], false);
        let entry = module.function_mut(f).push_block("entry");
        let mut b = IrBuilder::new(&mut module);
        let c = cx.int_constant(32, 7);
        b.insert(f, entry, None, placeholder_inst(Opcode::Return, smallvec![ValueRef::Const(c)], i32t, entry));

        let target = TargetInfo::default();
        let mut mir = lower_module(&cx, &module, &target);
        let mf = mir.function_mut(f);
        crate::ssadestruct::destroy_ssa(mf);
        crate::regalloc::allocate_registers(mf);

        let stream = assemble(&mir, &module);
        assert!(!stream.bytes.is_empty());
        assert_eq!(stream.symbols.get("main"), Some(&0));
        assert!(stream.unresolved.is_empty());
    }

    #[test]
    fn a_foreign_function_assembles_to_an_empty_body() {
        let mut cx = Context::new();
        let mut module = IrModule::new("test");
        let i32t = cx.int_type(32);
        let f = module.declare_function("puts", i32t, vec![Param { ty: i32t, name: "s".into(), attribute: None }], true);
        let target = TargetInfo::default();
        let mir = lower_module(&cx, &module, &target);
        let stream = assemble(&mir, &module);
        assert_eq!(stream.symbols.get("puts"), Some(&0));
        assert!(stream.bytes.is_empty());
    }
}
