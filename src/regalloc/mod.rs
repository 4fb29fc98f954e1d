//! Register allocation (§4.8): the last MIR-to-MIR pass before assembly
//! emission. Converts the three-address virtual-register form SSA
//! destruction leaves behind into the VM's two-address hardware-register
//! form: lower to two-address shape, build an interference graph over live
//! ranges, Chaitin-color it, rewrite virtual registers to their assigned
//! colors, then run the cleanup post-passes that shrink the resulting code.
//!
//! Grounded on the original `src/scatha/CodeGen/RegisterAllocator.cc`
//! (`convertToTwoAddressMode`, `allocateRegisters`'s top-level sequence),
//! split one file per concern with a `mod.rs` that sequences them.

mod coloring;
mod interference;
mod postpass;
mod two_address;

use crate::mir::function::MirFunction;
use crate::mir::register::{RegisterPhase, RegisterPool};

pub use coloring::{coalesce_and_color, Coloring};
pub use interference::{build_interference_graph, InterferenceGraph};

/// Placeholder for a future spill-to-stack path (§7.1: "`regalloc::AllocError`
/// ... in practice infallible by construction ... kept as a typed
/// placeholder for future spill-to-stack support"). Never constructed by
/// anything in this module today: the coalescing coloring pass always
/// finds a color for every node because nothing here bounds the hardware
/// register count below the graph's chromatic number.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AllocError {
    #[error("spilling is not implemented: {0} registers needed, {1} available")]
    SpillNeeded(u32, u32),
}

/// Runs every step of §4.8 over `f` in place.
pub fn allocate_registers(f: &mut MirFunction) {
    assert_eq!(f.phase, RegisterPhase::Virtual, "register allocation requires virtual-register form");

    two_address::convert_to_two_address(f);

    let graph = interference::build_interference_graph(f);
    let coloring = coloring::coalesce_and_color(f, &graph);
    let num_colors = coloring.num_colors();

    rewrite_to_hardware_registers(f, &coloring);
    f.regs.hardware_bank_size = num_colors;

    postpass::drop_identity_copies(f);
    postpass::xor_self_for_zero(f);
    postpass::evict_dead_instructions(f);
    allocate_callee_registers(f);

    f.phase.advance_to(RegisterPhase::Hardware);
    crate::mir::liveness::compute(f);
    f.live_intervals = crate::mir::live_interval::compute_live_range(f);
}

/// Step 4: replace every virtual register with the hardware register of
/// its assigned color, everywhere a register can appear (operands, dests,
/// opcode payload fields, live sets) — the same renaming machinery SSA
/// destruction's step 1 uses (§4.7 step 1, reused here per §4.8 step 4:
/// "update live sets identically to step 1 of §4.7").
fn rewrite_to_hardware_registers(f: &mut MirFunction, coloring: &Coloring) {
    use crate::mir::register::{RegisterId, RegisterRenaming};

    let mut renaming = RegisterRenaming::default();
    let vcount = f.regs.count(RegisterPool::Virtual) as u32;
    for i in 0..vcount {
        let v = RegisterId::new(RegisterPool::Virtual, i);
        let color = coloring.color_of(v);
        let hw = hardware_register_for_color(f, color);
        renaming.insert(v, hw);
    }
    crate::ssadestruct::rename_all(f, &renaming);
}

/// Colors are assigned densely from 0; a hardware register is allocated
/// lazily the first time a color is seen so the bank ends up exactly
/// `numColors` registers wide (§4.8 step 3: "the resulting color count
/// determines the function's hardware-register bank size").
fn hardware_register_for_color(f: &mut MirFunction, color: u32) -> crate::mir::register::RegisterId {
    use crate::mir::register::RegisterId;
    while f.regs.count(RegisterPool::Hardware) <= color as usize {
        f.regs.alloc(RegisterPool::Hardware, 8, false);
    }
    RegisterId::new(RegisterPool::Hardware, color)
}

/// Step 5's last bullet and step 6's setup: callee registers live in
/// hardware space above the function's own registers (§4.8 step 5: "Place
/// callee registers in hardware space above the function's own registers;
/// set every call's register-offset to point to the start of its callee
/// frame").
fn allocate_callee_registers(f: &mut MirFunction) {
    use crate::mir::instruction::MirOpcode;
    use crate::mir::register::RegisterId;

    let base = f.regs.count(RegisterPool::Hardware) as u32;
    let callee_count = f.regs.count(RegisterPool::Callee) as u32;
    let mut renaming = crate::mir::register::RegisterRenaming::default();
    for i in 0..callee_count {
        let c = RegisterId::new(RegisterPool::Callee, i);
        let hw = f.regs.alloc(RegisterPool::Hardware, 8, true);
        assert_eq!(hw.index, base + i);
        renaming.insert(c, hw);
    }
    crate::ssadestruct::rename_all(f, &renaming);

    let call_ids: Vec<_> = f.all_insts().filter(|(_, inst)| matches!(inst.opcode, MirOpcode::Call { .. })).map(|(id, _)| id).collect();
    for id in call_ids {
        let inst = f.inst_mut(id);
        if let MirOpcode::Call { shape, .. } = inst.opcode {
            inst.opcode = MirOpcode::Call { shape, register_offset: base };
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
    use crate::mir::instruction::{MirOperand, MirOpcode};
    use crate::mir::register::RegisterPool;
    use smallvec::smallvec;

    fn placeholder_inst(opcode: Opcode, operands: smallvec::SmallVec<[ValueRef; 3]>, ty: crate::ir::types::TypeId, parent: crate::ir::function::BlockId) -> Instruction {
        Instruction { id: InstId(0), opcode, operands, ty, name: None, parent, pointer_info: None }
    }

    #[test]
    fn add_and_return_allocates_disjoint_hardware_registers_for_disjoint_ranges() {
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
        crate::ssadestruct::destroy_ssa(mf);
        allocate_registers(mf);

        assert_eq!(mf.phase, RegisterPhase::Hardware);
        for (_, inst) in mf.all_insts() {
            for op in &inst.operands {
                if let MirOperand::Reg(r) = op {
                    assert_eq!(r.pool, RegisterPool::Hardware, "no virtual registers may survive allocation");
                }
            }
            for d in &inst.dests {
                assert_eq!(d.pool, RegisterPool::Hardware);
            }
        }
    }

    #[test]
    fn two_address_lowering_inserts_a_copy_before_a_non_matching_destination() {
        let mut cx = Context::new();
        let mut module = Module::new("test");
        let i32t = cx.int_type(32);
        let f = module.declare_function(
            "f",
            i32t,
            vec![Param { ty: i32t, name: "a".into(), attribute: None }, Param { ty: i32t, name: "b".into(), attribute: None }, Param { ty: i32t, name: "c".into(), attribute: None }],
            false,
        );
        let entry = module.function_mut(f).push_block("entry");
        let mut b = IrBuilder::new(&mut module);
        // (a - b) - c: Sub is non-commutative, both Subs need a scratch/copy.
        let sub1 = b.insert(f, entry, None, placeholder_inst(Opcode::Sub, smallvec![ValueRef::Param(f, 0), ValueRef::Param(f, 1)], i32t, entry));
        let sub2 = b.insert(f, entry, None, placeholder_inst(Opcode::Sub, smallvec![ValueRef::Inst(f, sub1), ValueRef::Param(f, 2)], i32t, entry));
        b.insert(f, entry, None, placeholder_inst(Opcode::Return, smallvec![ValueRef::Inst(f, sub2)], i32t, entry));

        let target = TargetInfo::default();
        let mut mir = lower_module(&cx, &module, &target);
        let mf = mir.function_mut(f);
        crate::ssadestruct::destroy_ssa(mf);
        allocate_registers(mf);

        for (_, inst) in mf.all_insts() {
            if matches!(inst.opcode, MirOpcode::Sub) {
                assert_eq!(inst.operands[0].as_reg(), inst.dests.first().copied(), "two-address form: dest must equal operand 0");
            }
        }
    }
}
