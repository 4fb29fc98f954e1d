//! Per-instruction byte encoding (§4.9: "Emit one record per instruction to
//! an ordered stream holding a byte buffer and a label table"). The VM's
//! actual wire format is out of scope (§1: "linkage to the virtual machine"
//! is a non-goal) — this encoding only needs to be internally consistent: a
//! byte vector the (external) linker can patch symbol references into, and
//! a label table recording where each block starts. Forward-referencing
//! local jump targets are written as placeholders during a single linear
//! pass and backpatched once every block's start offset is known.

use crate::common::fx_hash::FxHashMap;
use crate::ir::module::Module as IrModule;
use crate::mir::function::{MirBlockId, MirFunction};
use crate::mir::instruction::{MemoryAddress, MirInst, MirOpcode, MirOperand};
use crate::mir::register::RegisterId;

use super::linearize::order_blocks;
use super::stream::{FunctionRecord, UnresolvedReference};

/// A forward local jump whose target block's start offset is not yet known
/// when the jump is encoded; `byte_offset` is where its 4-byte placeholder
/// lives in `FunctionRecord::bytes`.
struct LocalFixup {
    byte_offset: u32,
    target: MirBlockId,
}

fn opcode_tag(op: &MirOpcode) -> u8 {
    match op {
        MirOpcode::Copy => 0,
        MirOpcode::CondCopy { .. } => 1,
        MirOpcode::Add => 2,
        MirOpcode::Sub => 3,
        MirOpcode::Mul => 4,
        MirOpcode::SDiv => 5,
        MirOpcode::UDiv => 6,
        MirOpcode::SRem => 7,
        MirOpcode::URem => 8,
        MirOpcode::And => 9,
        MirOpcode::Or => 10,
        MirOpcode::Xor => 11,
        MirOpcode::Shl => 12,
        MirOpcode::LShr => 13,
        MirOpcode::AShr => 14,
        MirOpcode::Neg => 15,
        MirOpcode::Not => 16,
        MirOpcode::ICmp(_) => 17,
        MirOpcode::FCmp(_) => 18,
        MirOpcode::FAdd => 19,
        MirOpcode::FSub => 20,
        MirOpcode::FMul => 21,
        MirOpcode::FDiv => 22,
        MirOpcode::FNeg => 23,
        MirOpcode::Xorself => 24,
        MirOpcode::Load => 25,
        MirOpcode::Store => 26,
        MirOpcode::LoadAddress(_) => 27,
        MirOpcode::Jump => 28,
        MirOpcode::CondJump { .. } => 29,
        MirOpcode::Return => 30,
        MirOpcode::Call { .. } => 31,
        MirOpcode::TailCall { .. } => 32,
        MirOpcode::Phi { .. } => unreachable!("no phi may reach assembly emission (testable property 8)"),
    }
}

fn write_reg(bytes: &mut Vec<u8>, r: RegisterId) {
    assert_eq!(r.pool, crate::mir::register::RegisterPool::Hardware, "assembly emission requires hardware-register form (testable property 9)");
    bytes.extend_from_slice(&r.index.to_le_bytes());
}

fn write_address(bytes: &mut Vec<u8>, addr: &MemoryAddress) {
    write_reg(bytes, addr.base);
    match addr.dyn_offset {
        Some(r) => {
            bytes.push(1);
            write_reg(bytes, r);
        }
        None => bytes.push(0),
    }
    bytes.extend_from_slice(&addr.scale.to_le_bytes());
    bytes.extend_from_slice(&addr.const_offset.to_le_bytes());
}

fn write_operand(bytes: &mut Vec<u8>, op: &MirOperand, unresolved: &mut Vec<UnresolvedReference>, f: &MirFunction, mir_module: &crate::mir::module::MirModule, ir_module: &IrModule) {
    match op {
        MirOperand::Reg(r) => {
            bytes.push(0);
            write_reg(bytes, *r);
        }
        MirOperand::ImmInt(v) => {
            bytes.push(1);
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        MirOperand::ImmFloat(bits) => {
            bytes.push(2);
            bytes.extend_from_slice(&bits.to_le_bytes());
        }
        MirOperand::Address(addr) => {
            bytes.push(3);
            write_address(bytes, addr);
        }
        MirOperand::Function(fid) => {
            bytes.push(4);
            let symbol = mir_module.function(*fid).name.clone();
            unresolved.push(UnresolvedReference { offset: bytes.len() as u32, symbol });
            bytes.extend_from_slice(&0u32.to_le_bytes());
        }
        MirOperand::Global(gid) => {
            bytes.push(5);
            let symbol = ir_module.global(*gid).name.clone();
            unresolved.push(UnresolvedReference { offset: bytes.len() as u32, symbol });
            bytes.extend_from_slice(&0u32.to_le_bytes());
        }
        MirOperand::Block(b) => {
            bytes.push(6);
            let _ = (b, f);
            bytes.extend_from_slice(&0u32.to_le_bytes());
        }
    }
}

/// Writes a local jump to `target` as a 4-byte placeholder and records a
/// fixup for it; the offset is relative to the start of this function's
/// byte buffer, resolved once every block's start is known.
fn write_local_jump(bytes: &mut Vec<u8>, target: MirBlockId, fixups: &mut Vec<LocalFixup>) {
    fixups.push(LocalFixup { byte_offset: bytes.len() as u32, target });
    bytes.extend_from_slice(&0u32.to_le_bytes());
}

fn encode_generic(bytes: &mut Vec<u8>, inst: &MirInst, unresolved: &mut Vec<UnresolvedReference>, f: &MirFunction, mir_module: &crate::mir::module::MirModule, ir_module: &IrModule) {
    bytes.push(0);
    bytes.push(opcode_tag(&inst.opcode));
    bytes.extend_from_slice(&(inst.byte_width as u16).to_le_bytes());
    bytes.push(inst.dests.len() as u8);
    for &d in &inst.dests {
        write_reg(bytes, d);
    }
    bytes.push(inst.operands.len() as u8);
    for op in &inst.operands {
        write_operand(bytes, op, unresolved, f, mir_module, ir_module);
    }
    if let MirOpcode::CondCopy { condition, invert } = &inst.opcode {
        write_reg(bytes, *condition);
        bytes.push(*invert as u8);
    }
    if let MirOpcode::LoadAddress(addr) = &inst.opcode {
        write_address(bytes, addr);
    }
}

/// Assembles one function, returning its own byte buffer, block labels, and
/// unresolved-reference list, all relative to byte 0 of this function
/// (rebased into the module-wide stream by
/// [`crate::asm::stream::AssemblyStream::link_functions`]).
pub fn encode_function(f: &MirFunction, mir_module: &crate::mir::module::MirModule, ir_module: &IrModule) -> FunctionRecord {
    let mut record = FunctionRecord { name: f.name.clone(), ..Default::default() };
    if f.is_foreign {
        return record;
    }

    let order = order_blocks(f);
    let mut fixups: Vec<LocalFixup> = Vec::new();
    let mut block_offsets: FxHashMap<MirBlockId, u32> = FxHashMap::default();

    for (i, &bid) in order.iter().enumerate() {
        block_offsets.insert(bid, record.bytes.len() as u32);
        record.labels.insert(f.block(bid).name.clone(), record.bytes.len() as u32);
        let next = order.get(i + 1).copied();

        let insts = &f.block(bid).insts;
        for (k, &inst_id) in insts.iter().enumerate() {
            let inst = f.inst(inst_id);
            let is_last = k == insts.len() - 1;
            if !is_last {
                encode_generic(&mut record.bytes, inst, &mut record.unresolved, f, mir_module, ir_module);
                continue;
            }
            encode_terminator(&mut record.bytes, inst, next, &mut fixups, &mut record.unresolved, f, mir_module, ir_module);
        }
    }

    for fixup in fixups {
        let target_offset = *block_offsets.get(&fixup.target).expect("jump target must be a block in this function");
        let at = fixup.byte_offset as usize;
        record.bytes[at..at + 4].copy_from_slice(&target_offset.to_le_bytes());
    }

    record
}

/// Encodes a basic block's terminator (§4.9: "at most one jump per
/// terminator"). A `Jump` whose target is the immediately following block
/// in the chosen layout costs zero bytes (pure fall-through); a `CondJump`
/// costs one conditional-jump record when one of its targets is the
/// fall-through block. When neither target happens to be next — layout's
/// DFS preference only fails this for edges into a block another path
/// already claimed, e.g. an irreducible merge — an extra unconditional
/// jump is appended; this is the one case where the "at most one jump"
/// contract is only a layout *goal*, not an enforced invariant.
fn encode_terminator(
    bytes: &mut Vec<u8>,
    inst: &MirInst,
    next: Option<MirBlockId>,
    fixups: &mut Vec<LocalFixup>,
    unresolved: &mut Vec<UnresolvedReference>,
    f: &MirFunction,
    mir_module: &crate::mir::module::MirModule,
    ir_module: &IrModule,
) {
    match &inst.opcode {
        MirOpcode::Jump => {
            let target = inst.operands.iter().find_map(|op| match op {
                MirOperand::Block(b) => Some(*b),
                _ => None,
            });
            if target != next {
                bytes.push(1);
                bytes.push(opcode_tag(&inst.opcode));
                if let Some(t) = target {
                    write_local_jump(bytes, t, fixups);
                }
            }
        }
        MirOpcode::CondJump { condition, then_target, else_target } => {
            let (jump_target, invert) = if Some(*else_target) == next {
                (*then_target, false)
            } else if Some(*then_target) == next {
                (*else_target, true)
            } else {
                (*then_target, false)
            };
            bytes.push(2);
            bytes.push(opcode_tag(&inst.opcode));
            write_reg(bytes, *condition);
            bytes.push(invert as u8);
            write_local_jump(bytes, jump_target, fixups);
            if jump_target == *then_target && Some(*else_target) != next {
                bytes.push(1);
                bytes.push(opcode_tag(&MirOpcode::Jump));
                write_local_jump(bytes, *else_target, fixups);
            }
        }
        MirOpcode::Return => {
            bytes.push(3);
            bytes.push(opcode_tag(&inst.opcode));
            bytes.push(inst.operands.len() as u8);
            for op in &inst.operands {
                write_operand(bytes, op, unresolved, f, mir_module, ir_module);
            }
        }
        MirOpcode::Call { .. } | MirOpcode::TailCall { .. } => {
            encode_generic(bytes, inst, unresolved, f, mir_module, ir_module);
        }
        _ => encode_generic(bytes, inst, unresolved, f, mir_module, ir_module),
    }
}
