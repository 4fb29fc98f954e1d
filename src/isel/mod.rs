//! IR → MIR instruction selection (§4.6).
//!
//! For every non-foreign IR function, builds a parallel [`MirFunction`] by
//! visiting each instruction once in block order. Every IR value resolves to
//! one or more consecutive SSA registers — more than one only for
//! aggregate-typed values, which are sliced into 8-byte words for the
//! duration of lowering (the VM itself only ever sees word-sized registers).
//! Destination registers for every instruction with a result, and for every
//! parameter, are pre-allocated in a first pass so that forward references
//! (a phi reading a value defined later in a loop) resolve to a stable
//! register before the instruction that defines it is ever visited.

use smallvec::{smallvec, SmallVec};

use crate::common::fx_hash::FxHashMap;
use crate::ir::context::Context;
use crate::ir::function::{BlockId, FuncId, InstId};
use crate::ir::instruction::{GepIndex, Opcode};
use crate::ir::module::Module;
use crate::ir::types::{Type, TypeId};
use crate::ir::value::{Constant, ConstId, ValueRef};
use crate::mir::function::{MirBlockId, MirFunction};
use crate::mir::instruction::{CallShape, MemoryAddress, MirInst, MirOpcode, MirOperand};
use crate::mir::module::MirModule;
use crate::mir::register::{RegisterId, RegisterPool};

/// Target parameters the lowering needs that the VM (out of scope, §1)
/// would otherwise own (§9.1 "Constant-offset limit": "modeled as a
/// `TargetInfo::max_immediate_offset` parameter ... not a hardcoded
/// constant").
#[derive(Debug, Clone, Copy)]
pub struct TargetInfo {
    pub max_immediate_offset: i64,
    pub word_size: u32,
}

impl Default for TargetInfo {
    fn default() -> Self {
        Self { max_immediate_offset: 255, word_size: 8 }
    }
}

/// Byte widths of the consecutive registers an aggregate value of `ty`
/// decomposes into; a single entry for any scalar type.
fn slice_byte_widths(cx: &Context, ty: TypeId) -> Vec<u32> {
    let (size, _) = cx.size_align(ty);
    if size <= 8 {
        return vec![size.max(1) as u32];
    }
    let mut remaining = size;
    let mut out = Vec::new();
    while remaining > 0 {
        let chunk = remaining.min(8);
        out.push(chunk as u32);
        remaining -= chunk;
    }
    out
}

fn slice_count(cx: &Context, ty: TypeId) -> u32 {
    slice_byte_widths(cx, ty).len() as u32
}

/// Flattens a (possibly nested) record constant into its scalar leaves, in
/// layout order. Arrays and structs share the `Record` representation, so
/// this single recursion handles both (§4.6 "Record and array constants
/// lower to a sequence of MIR copy instructions").
fn flatten_const(cx: &Context, id: ConstId, out: &mut Vec<ConstId>) {
    match cx.constant(id) {
        Constant::Record { elements, .. } => {
            for &e in elements {
                flatten_const(cx, e, out);
            }
        }
        _ => out.push(id),
    }
}

fn binary_mir_opcode(op: &Opcode) -> MirOpcode {
    match op {
        Opcode::Add => MirOpcode::Add,
        Opcode::Sub => MirOpcode::Sub,
        Opcode::Mul => MirOpcode::Mul,
        Opcode::SDiv => MirOpcode::SDiv,
        Opcode::UDiv => MirOpcode::UDiv,
        Opcode::SRem => MirOpcode::SRem,
        Opcode::URem => MirOpcode::URem,
        Opcode::And => MirOpcode::And,
        Opcode::Or => MirOpcode::Or,
        Opcode::Xor => MirOpcode::Xor,
        Opcode::Shl => MirOpcode::Shl,
        Opcode::LShr => MirOpcode::LShr,
        Opcode::AShr => MirOpcode::AShr,
        Opcode::FAdd => MirOpcode::FAdd,
        Opcode::FSub => MirOpcode::FSub,
        Opcode::FMul => MirOpcode::FMul,
        Opcode::FDiv => MirOpcode::FDiv,
        other => unreachable!("{other:?} is not a binary opcode"),
    }
}

fn unary_mir_opcode(op: &Opcode) -> MirOpcode {
    match op {
        Opcode::Neg => MirOpcode::Neg,
        Opcode::FNeg => MirOpcode::FNeg,
        Opcode::Not => MirOpcode::Not,
        other => unreachable!("{other:?} is not a unary opcode"),
    }
}

/// Per-function lowering state: the value resolver cache plus the
/// in-progress [`MirFunction`].
struct FuncLowering<'a> {
    cx: &'a Context,
    module: &'a Module,
    target: &'a TargetInfo,
    mir: MirFunction,
    blocks: FxHashMap<BlockId, MirBlockId>,
    regs: FxHashMap<ValueRef, SmallVec<[RegisterId; 1]>>,
}

impl<'a> FuncLowering<'a> {
    fn width(&self, ty: TypeId) -> u32 {
        self.cx.size_align(ty).0.max(1).min(8) as u32
    }

    fn fresh(&mut self, byte_width: u32) -> RegisterId {
        self.mir.regs.alloc(RegisterPool::Ssa, byte_width, false)
    }

    fn emit(
        &mut self,
        block: MirBlockId,
        opcode: MirOpcode,
        operands: SmallVec<[MirOperand; 3]>,
        dests: SmallVec<[RegisterId; 2]>,
        byte_width: u32,
    ) {
        self.mir.insert(block, None, MirInst { opcode, operands, dests, byte_width });
    }

    fn block_of(&self, v: ValueRef) -> MirBlockId {
        match v {
            ValueRef::Block(_, b) => self.blocks[&b],
            other => unreachable!("expected a block operand, got {other:?}"),
        }
    }

    fn value_type(&self, v: ValueRef) -> TypeId {
        match v {
            ValueRef::Inst(f, i) => self.module.function(f).inst(i).ty,
            ValueRef::Param(f, i) => self.module.function(f).params[i as usize].ty,
            ValueRef::Const(c) => self.cx.constant_type(c),
            ValueRef::Global(g) => self.module.global(g).ty,
            ValueRef::Function(_) | ValueRef::Block(_, _) => {
                unreachable!("no scalar type for a function or block reference")
            }
        }
    }

    /// Materializes a constant into one register per 8-byte slice, caching
    /// the result.
    fn materialize_const(&mut self, cid: ConstId, block: MirBlockId) -> SmallVec<[RegisterId; 1]> {
        let mut leaves = Vec::new();
        flatten_const(self.cx, cid, &mut leaves);
        leaves
            .into_iter()
            .map(|leaf| {
                let (op, width) = match self.cx.constant(leaf) {
                    Constant::Int { ty, value } => (MirOperand::ImmInt(*value as i64), self.width(*ty)),
                    Constant::Float { bits, .. } => (MirOperand::ImmFloat(*bits), 8),
                    Constant::Null { .. } => (MirOperand::ImmInt(0), 8),
                    Constant::Undef { .. } => (MirOperand::ImmInt(0), 8),
                    Constant::Record { .. } => unreachable!("flatten_const never yields a record leaf"),
                };
                let r = self.fresh(width);
                self.emit(block, MirOpcode::Copy, smallvec![op], smallvec![r], width);
                r
            })
            .collect()
    }

    /// Resolves `v` to its register list, materializing constants, globals,
    /// and function addresses lazily on first use.
    fn regs_of(&mut self, v: ValueRef, block: MirBlockId) -> SmallVec<[RegisterId; 1]> {
        if let Some(r) = self.regs.get(&v) {
            return r.clone();
        }
        let result: SmallVec<[RegisterId; 1]> = match v {
            ValueRef::Const(cid) => self.materialize_const(cid, block),
            ValueRef::Global(gid) => {
                let r = self.fresh(8);
                self.emit(block, MirOpcode::Copy, smallvec![MirOperand::Global(gid)], smallvec![r], 8);
                smallvec![r]
            }
            ValueRef::Function(fid) => {
                let r = self.fresh(8);
                self.emit(block, MirOpcode::Copy, smallvec![MirOperand::Function(fid)], smallvec![r], 8);
                smallvec![r]
            }
            ValueRef::Inst(..) | ValueRef::Param(..) => {
                panic!("{v:?} should have been pre-allocated a register")
            }
            ValueRef::Block(..) => unreachable!("a block is not a register value"),
        };
        self.regs.insert(v, result.clone());
        result
    }

    /// The cheap path for a scalar-typed operand slot: scalar constants
    /// lower directly to an immediate (§4.6 "Constants narrower than 64
    /// bits lower to MIR constants of the same byte width"), avoiding a
    /// `Copy` when none is needed.
    fn scalar_operand(&mut self, v: ValueRef, block: MirBlockId) -> MirOperand {
        match v {
            ValueRef::Const(cid) => match self.cx.constant(cid) {
                Constant::Int { value, .. } => MirOperand::ImmInt(*value as i64),
                Constant::Float { bits, .. } => MirOperand::ImmFloat(*bits),
                Constant::Null { .. } => MirOperand::ImmInt(0),
                Constant::Undef { .. } => MirOperand::ImmInt(0),
                Constant::Record { .. } => MirOperand::Reg(self.regs_of(v, block)[0]),
            },
            ValueRef::Global(gid) => MirOperand::Global(gid),
            ValueRef::Function(fid) => MirOperand::Function(fid),
            ValueRef::Block(_, _) => unreachable!("a block is not a scalar operand"),
            ValueRef::Inst(..) | ValueRef::Param(..) => MirOperand::Reg(self.regs_of(v, block)[0]),
        }
    }

    /// Forces `v` into an actual register, materializing immediates,
    /// globals, or function addresses that would otherwise stay inline.
    /// Needed wherever the MIR shape demands a bare `RegisterId` (a
    /// `MemoryAddress` base, a branch condition).
    fn reg_operand(&mut self, v: ValueRef, block: MirBlockId) -> RegisterId {
        match self.scalar_operand(v, block) {
            MirOperand::Reg(r) => r,
            MirOperand::ImmInt(i) => {
                let r = self.fresh(8);
                self.emit(block, MirOpcode::Copy, smallvec![MirOperand::ImmInt(i)], smallvec![r], 8);
                r
            }
            MirOperand::ImmFloat(b) => {
                let r = self.fresh(8);
                self.emit(block, MirOpcode::Copy, smallvec![MirOperand::ImmFloat(b)], smallvec![r], 8);
                r
            }
            MirOperand::Global(g) => {
                let r = self.fresh(8);
                self.emit(block, MirOpcode::Copy, smallvec![MirOperand::Global(g)], smallvec![r], 8);
                r
            }
            MirOperand::Function(f) => {
                let r = self.fresh(8);
                self.emit(block, MirOpcode::Copy, smallvec![MirOperand::Function(f)], smallvec![r], 8);
                r
            }
            MirOperand::Address(_) | MirOperand::Block(_) => unreachable!(),
        }
    }

    /// Combines more than one scaled dynamic GEP index into a single
    /// register via a `Mul`/`Add` sequence, since [`MemoryAddress`] only
    /// holds one dynamic offset.
    fn combine_dynamic(&mut self, parts: Vec<(i64, RegisterId)>, block: MirBlockId) -> Option<(RegisterId, i64)> {
        if parts.is_empty() {
            return None;
        }
        if parts.len() == 1 {
            let (scale, reg) = parts[0];
            return Some((reg, scale));
        }
        let mut acc: Option<RegisterId> = None;
        for (scale, reg) in parts {
            let scaled = if scale == 1 {
                reg
            } else {
                let r = self.fresh(8);
                self.emit(
                    block,
                    MirOpcode::Mul,
                    smallvec![MirOperand::Reg(reg), MirOperand::ImmInt(scale)],
                    smallvec![r],
                    8,
                );
                r
            };
            acc = Some(match acc {
                None => scaled,
                Some(prev) => {
                    let r = self.fresh(8);
                    self.emit(
                        block,
                        MirOpcode::Add,
                        smallvec![MirOperand::Reg(prev), MirOperand::Reg(scaled)],
                        smallvec![r],
                        8,
                    );
                    r
                }
            });
        }
        acc.map(|r| (r, 1))
    }

    /// Walks a GEP's index list, folding constant steps and scale factors
    /// into one [`MemoryAddress`] (§4.6). Struct steps must be constant (a
    /// member index can never be dynamic); array/pointer steps may be
    /// either and contribute a scaled dynamic term.
    fn fold_gep(&mut self, base_reg: RegisterId, elem_ty: TypeId, indices: &[GepIndex], block: MirBlockId) -> MemoryAddress {
        let mut const_offset: i64 = 0;
        let mut dynamic: Vec<(i64, RegisterId)> = Vec::new();
        let mut cur_ty = elem_ty;
        for idx in indices {
            let ty = self.cx.type_of(cur_ty).clone();
            match ty {
                Type::Struct { members, .. } => match idx {
                    GepIndex::Constant(c) => {
                        let m = members[*c as usize];
                        const_offset += m.offset as i64;
                        cur_ty = m.ty;
                    }
                    GepIndex::Dynamic(_) => panic!("a struct member index must be constant"),
                },
                Type::Array { elem, .. } => {
                    let esize = self.cx.size_align(elem).0 as i64;
                    match idx {
                        GepIndex::Constant(c) => const_offset += c * esize,
                        GepIndex::Dynamic(v) => {
                            let r = self.reg_operand(*v, block);
                            dynamic.push((esize, r));
                        }
                    }
                    cur_ty = elem;
                }
                _ => {
                    let esize = self.cx.size_align(cur_ty).0 as i64;
                    match idx {
                        GepIndex::Constant(c) => const_offset += c * esize,
                        GepIndex::Dynamic(v) => {
                            let r = self.reg_operand(*v, block);
                            dynamic.push((esize, r));
                        }
                    }
                }
            }
        }

        let (mut dyn_offset, mut scale) = match self.combine_dynamic(dynamic, block) {
            Some((r, s)) => (Some(r), s),
            None => (None, 1),
        };

        if const_offset.abs() > self.target.max_immediate_offset {
            let overflow = match dyn_offset {
                Some(r) => {
                    let acc = self.fresh(8);
                    self.emit(
                        block,
                        MirOpcode::Add,
                        smallvec![MirOperand::Reg(r), MirOperand::ImmInt(const_offset)],
                        smallvec![acc],
                        8,
                    );
                    acc
                }
                None => {
                    let acc = self.fresh(8);
                    self.emit(block, MirOpcode::Copy, smallvec![MirOperand::ImmInt(const_offset)], smallvec![acc], 8);
                    acc
                }
            };
            dyn_offset = Some(overflow);
            scale = 1;
            const_offset = 0;
        }

        MemoryAddress { base: base_reg, dyn_offset, scale: scale as u32, const_offset }
    }

    /// Byte offset and leaf type of the member reached by `indices` inside
    /// `ty`, mirroring GEP's own struct/array traversal (used by
    /// `extract_value`/`insert_value`).
    fn member_path(&self, mut ty: TypeId, indices: &[u32]) -> (u32, TypeId) {
        let mut offset = 0u32;
        for &idx in indices {
            match self.cx.type_of(ty) {
                Type::Struct { members, .. } => {
                    let m = members[idx as usize];
                    offset += m.offset;
                    ty = m.ty;
                }
                Type::Array { elem, .. } => {
                    let esize = self.cx.size_align(*elem).0 as u32;
                    offset += idx * esize;
                    ty = *elem;
                }
                other => panic!("index path into non-aggregate type {other:?}"),
            }
        }
        (offset, ty)
    }

    fn lower_inst(&mut self, func: FuncId, block: MirBlockId, inst_id: InstId) {
        let inst = self.module.function(func).inst(inst_id).clone();
        let dest_regs = self.regs.get(&ValueRef::Inst(func, inst_id)).cloned().unwrap_or_default();
        let dests: SmallVec<[RegisterId; 2]> = dest_regs.iter().copied().collect();

        match &inst.opcode {
            Opcode::Add
            | Opcode::Sub
            | Opcode::Mul
            | Opcode::SDiv
            | Opcode::UDiv
            | Opcode::SRem
            | Opcode::URem
            | Opcode::And
            | Opcode::Or
            | Opcode::Xor
            | Opcode::Shl
            | Opcode::LShr
            | Opcode::AShr
            | Opcode::FAdd
            | Opcode::FSub
            | Opcode::FMul
            | Opcode::FDiv => {
                let op = binary_mir_opcode(&inst.opcode);
                let lhs = self.scalar_operand(inst.operands[0], block);
                let rhs = self.scalar_operand(inst.operands[1], block);
                let w = self.width(inst.ty);
                self.emit(block, op, smallvec![lhs, rhs], dests, w);
            }
            Opcode::Neg | Opcode::FNeg | Opcode::Not => {
                let op = unary_mir_opcode(&inst.opcode);
                let v = self.scalar_operand(inst.operands[0], block);
                let w = self.width(inst.ty);
                self.emit(block, op, smallvec![v], dests, w);
            }
            Opcode::ICmp(pred) => {
                let lhs = self.scalar_operand(inst.operands[0], block);
                let rhs = self.scalar_operand(inst.operands[1], block);
                self.emit(block, MirOpcode::ICmp(*pred), smallvec![lhs, rhs], dests, 1);
            }
            Opcode::FCmp(pred) => {
                let lhs = self.scalar_operand(inst.operands[0], block);
                let rhs = self.scalar_operand(inst.operands[1], block);
                self.emit(block, MirOpcode::FCmp(*pred), smallvec![lhs, rhs], dests, 1);
            }
            // The VM's registers are uniformly word-sized, so narrowing and
            // widening conversions (besides sign extension) carry no
            // runtime effect: the underlying bit pattern is unchanged.
            Opcode::Trunc
            | Opcode::ZExt
            | Opcode::FPTrunc
            | Opcode::FPExt
            | Opcode::FToUI
            | Opcode::FToSI
            | Opcode::UIToF
            | Opcode::SIToF
            | Opcode::Bitcast
            | Opcode::PtrToInt
            | Opcode::IntToPtr => {
                let v = self.scalar_operand(inst.operands[0], block);
                let w = self.width(inst.ty);
                self.emit(block, MirOpcode::Copy, smallvec![v], dests, w);
            }
            Opcode::SExt => {
                let src_ty = self.value_type(inst.operands[0]);
                let src_bits = self.cx.type_of(src_ty).as_int_bits().unwrap_or(64) as i64;
                let shift = 64 - src_bits;
                let v = self.scalar_operand(inst.operands[0], block);
                if shift <= 0 {
                    self.emit(block, MirOpcode::Copy, smallvec![v], dests, self.width(inst.ty));
                } else {
                    let tmp = self.fresh(8);
                    self.emit(block, MirOpcode::Shl, smallvec![v, MirOperand::ImmInt(shift)], smallvec![tmp], 8);
                    let w = self.width(inst.ty);
                    self.emit(
                        block,
                        MirOpcode::AShr,
                        smallvec![MirOperand::Reg(tmp), MirOperand::ImmInt(shift)],
                        dests,
                        w,
                    );
                }
            }
            Opcode::Alloca { .. } => {
                let dest = dests[0];
                self.emit(block, MirOpcode::LoadAddress(MemoryAddress::direct(dest)), smallvec![], smallvec![dest], 8);
            }
            Opcode::GetElementPointer { elem_ty, indices } => {
                let base = self.reg_operand(inst.operands[0], block);
                let addr = self.fold_gep(base, *elem_ty, indices, block);
                let mut ops: SmallVec<[MirOperand; 3]> = smallvec![MirOperand::Reg(addr.base)];
                if let Some(d) = addr.dyn_offset {
                    ops.push(MirOperand::Reg(d));
                }
                self.emit(block, MirOpcode::LoadAddress(addr), ops, dests, 8);
            }
            Opcode::Load => {
                let count = slice_count(self.cx, inst.ty) as i64;
                let addr_reg = self.reg_operand(inst.operands[0], block);
                if count == 1 {
                    self.emit(block, MirOpcode::Load, smallvec![MirOperand::Reg(addr_reg)], dests, self.width(inst.ty));
                } else {
                    for i in 0..count {
                        let slot = if i == 0 {
                            addr_reg
                        } else {
                            let addr = MemoryAddress { base: addr_reg, dyn_offset: None, scale: 1, const_offset: i * 8 };
                            let r = self.fresh(8);
                            self.emit(
                                block,
                                MirOpcode::LoadAddress(addr),
                                smallvec![MirOperand::Reg(addr_reg)],
                                smallvec![r],
                                8,
                            );
                            r
                        };
                        self.emit(
                            block,
                            MirOpcode::Load,
                            smallvec![MirOperand::Reg(slot)],
                            smallvec![dests[i as usize]],
                            8,
                        );
                    }
                }
            }
            Opcode::Store => {
                let value_ty = self.value_type(inst.operands[0]);
                let count = slice_count(self.cx, value_ty) as i64;
                let addr_reg = self.reg_operand(inst.operands[1], block);
                if count == 1 {
                    let v = self.scalar_operand(inst.operands[0], block);
                    self.emit(block, MirOpcode::Store, smallvec![MirOperand::Reg(addr_reg), v], smallvec![], self.width(value_ty));
                } else {
                    let slices = self.regs_of(inst.operands[0], block);
                    for i in 0..count {
                        let slot = if i == 0 {
                            addr_reg
                        } else {
                            let addr = MemoryAddress { base: addr_reg, dyn_offset: None, scale: 1, const_offset: i * 8 };
                            let r = self.fresh(8);
                            self.emit(
                                block,
                                MirOpcode::LoadAddress(addr),
                                smallvec![MirOperand::Reg(addr_reg)],
                                smallvec![r],
                                8,
                            );
                            r
                        };
                        self.emit(
                            block,
                            MirOpcode::Store,
                            smallvec![MirOperand::Reg(slot), MirOperand::Reg(slices[i as usize])],
                            smallvec![],
                            8,
                        );
                    }
                }
            }
            Opcode::ExtractValue { indices } => {
                let base_ty = self.value_type(inst.operands[0]);
                let (offset, _leaf_ty) = self.member_path(base_ty, indices);
                let start = (offset / 8) as usize;
                let base_regs = self.regs_of(inst.operands[0], block);
                for (i, &d) in dests.iter().enumerate() {
                    self.emit(block, MirOpcode::Copy, smallvec![MirOperand::Reg(base_regs[start + i])], smallvec![d], 8);
                }
            }
            Opcode::InsertValue { indices } => {
                let base_ty = self.value_type(inst.operands[0]);
                let (offset, _leaf_ty) = self.member_path(base_ty, indices);
                let start = (offset / 8) as usize;
                let base_regs = self.regs_of(inst.operands[0], block);
                let value_regs = self.regs_of(inst.operands[1], block);
                for (i, &d) in dests.iter().enumerate() {
                    let src = if i >= start && i < start + value_regs.len() { value_regs[i - start] } else { base_regs[i] };
                    self.emit(block, MirOpcode::Copy, smallvec![MirOperand::Reg(src)], smallvec![d], 8);
                }
            }
            Opcode::Goto => {
                let target = self.block_of(inst.operands[0]);
                self.emit(block, MirOpcode::Jump, smallvec![MirOperand::Block(target)], smallvec![], 0);
            }
            Opcode::Branch => {
                let cond = self.reg_operand(inst.operands[0], block);
                let then_target = self.block_of(inst.operands[1]);
                let else_target = self.block_of(inst.operands[2]);
                self.emit(
                    block,
                    MirOpcode::CondJump { condition: cond, then_target, else_target },
                    smallvec![MirOperand::Reg(cond)],
                    smallvec![],
                    0,
                );
            }
            Opcode::Return => {
                let ops: SmallVec<[MirOperand; 3]> = match inst.operands.first() {
                    Some(&v) => smallvec![self.scalar_operand(v, block)],
                    None => smallvec![],
                };
                self.emit(block, MirOpcode::Return, ops, smallvec![], 0);
            }
            Opcode::Phi { incoming } => {
                let targets: Vec<MirBlockId> = incoming.iter().map(|b| self.blocks[b]).collect();
                let count = dests.len();
                for slot in 0..count {
                    let mut ops: SmallVec<[MirOperand; 3]> = SmallVec::new();
                    for &v in &inst.operands {
                        let o = if count == 1 { self.scalar_operand(v, block) } else { MirOperand::Reg(self.regs_of(v, block)[slot]) };
                        ops.push(o);
                    }
                    self.emit(block, MirOpcode::Phi { incoming: targets.clone() }, ops, smallvec![dests[slot]], 8);
                }
            }
            // No MIR opcode represents `select` directly; it is expanded
            // here into the copy/conditional-copy pair that §4.7 step 5
            // otherwise assigns to SSA destruction. Doing it at selection
            // time means no select survives into MIR, so that step has
            // nothing left to rewrite.
            Opcode::Select => {
                let cond = self.reg_operand(inst.operands[0], block);
                let count = dests.len();
                if count == 1 {
                    let then_v = self.scalar_operand(inst.operands[1], block);
                    let else_v = self.scalar_operand(inst.operands[2], block);
                    self.emit(block, MirOpcode::Copy, smallvec![then_v], smallvec![dests[0]], 8);
                    self.emit(
                        block,
                        MirOpcode::CondCopy { condition: cond, invert: true },
                        smallvec![else_v, MirOperand::Reg(cond)],
                        smallvec![dests[0]],
                        8,
                    );
                } else {
                    let then_regs = self.regs_of(inst.operands[1], block);
                    let else_regs = self.regs_of(inst.operands[2], block);
                    for i in 0..count {
                        self.emit(block, MirOpcode::Copy, smallvec![MirOperand::Reg(then_regs[i])], smallvec![dests[i]], 8);
                        self.emit(
                            block,
                            MirOpcode::CondCopy { condition: cond, invert: true },
                            smallvec![MirOperand::Reg(else_regs[i]), MirOperand::Reg(cond)],
                            smallvec![dests[i]],
                            8,
                        );
                    }
                }
            }
            Opcode::Call => {
                let callee = inst.operands[0];
                let (shape, callee_operand) = match callee {
                    ValueRef::Function(fid) => (CallShape::Direct, MirOperand::Function(fid)),
                    other => (CallShape::Indirect, MirOperand::Reg(self.reg_operand(other, block))),
                };
                let mut ops: SmallVec<[MirOperand; 3]> = smallvec![callee_operand];
                for &a in &inst.operands[1..] {
                    ops.push(self.scalar_operand(a, block));
                }
                let w = if inst.has_result() { self.width(inst.ty) } else { 0 };
                // `register_offset` is a placeholder; it is only meaningful
                // once SSA destruction (§4.7 step 2) allocates the callee
                // register bank this call's arguments and results live in.
                self.emit(block, MirOpcode::Call { shape, register_offset: 0 }, ops, dests, w);
            }
        }
    }
}

fn lower_function(cx: &Context, module: &Module, target: &TargetInfo, func_id: FuncId) -> MirFunction {
    let f = module.function(func_id);
    let mut mir = MirFunction::new(func_id, f.name.clone());
    mir.num_args = f.params.len() as u32;
    mir.num_rets = if cx.type_of(f.ret_ty).is_void() { 0 } else { 1 };

    if f.is_foreign {
        mir.is_foreign = true;
        return mir;
    }

    let mut lowering = FuncLowering {
        cx,
        module,
        target,
        mir,
        blocks: FxHashMap::default(),
        regs: FxHashMap::default(),
    };

    for bid in f.block_ids() {
        let mbid = lowering.mir.push_block(f.block(bid).name.clone());
        lowering.blocks.insert(bid, mbid);
    }

    for (i, p) in f.params.iter().enumerate() {
        let widths = slice_byte_widths(cx, p.ty);
        let regs: SmallVec<[RegisterId; 1]> = widths.iter().map(|&w| lowering.mir.regs.alloc(RegisterPool::Ssa, w, true)).collect();
        lowering.regs.insert(ValueRef::Param(func_id, i as u32), regs);
    }

    for bid in f.block_ids() {
        for &inst_id in &f.block(bid).insts {
            let inst = f.inst(inst_id);
            if inst.has_result() {
                let widths = slice_byte_widths(cx, inst.ty);
                let regs: SmallVec<[RegisterId; 1]> =
                    widths.iter().map(|&w| lowering.mir.regs.alloc(RegisterPool::Ssa, w, false)).collect();
                lowering.regs.insert(ValueRef::Inst(func_id, inst_id), regs);
            }
        }
    }

    for bid in f.block_ids() {
        let mbid = lowering.blocks[&bid];
        let insts: Vec<InstId> = f.block(bid).insts.clone();
        for inst_id in insts {
            lowering.lower_inst(func_id, mbid, inst_id);
        }
    }

    lowering.mir
}

/// Lowers every function in `module` into a parallel [`MirModule`] (§4.6).
pub fn lower_module(cx: &Context, module: &Module, target: &TargetInfo) -> MirModule {
    let mut mir_module = MirModule::new(module.name.clone());
    for func_id in module.function_ids() {
        let mir_func = lower_function(cx, module, target, func_id);
        mir_module.push(mir_func);
    }
    mir_module
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::builder::IrBuilder;
    use crate::ir::function::Param;
    use crate::ir::instruction::Instruction;
    use crate::ir::module::Module;
    use crate::mir::register::RegisterPool;

    fn build_add_and_return() -> (Context, Module, FuncId) {
        let mut cx = Context::new();
        let mut module = Module::new("test");
        let i32t = cx.int_type(32);
        let f = module.declare_function(
            "add_two",
            i32t,
            vec![
                Param { ty: i32t, name: "a".into(), attribute: None },
                Param { ty: i32t, name: "b".into(), attribute: None },
            ],
            false,
        );
        let entry = module.function_mut(f).push_block("entry");
        let mut builder = IrBuilder::new(&mut module);
        let add = builder.insert(
            f,
            entry,
            None,
            Instruction {
                id: crate::ir::function::InstId(0),
                opcode: Opcode::Add,
                operands: smallvec![ValueRef::Param(f, 0), ValueRef::Param(f, 1)],
                ty: i32t,
                name: Some("sum".into()),
                parent: entry,
                pointer_info: None,
            },
        );
        builder.insert(
            f,
            entry,
            None,
            Instruction {
                id: crate::ir::function::InstId(0),
                opcode: Opcode::Return,
                operands: smallvec![ValueRef::Inst(f, add)],
                ty: i32t,
                name: None,
                parent: entry,
                pointer_info: None,
            },
        );
        (cx, module, f)
    }

    #[test]
    fn params_become_fixed_ssa_registers() {
        let (cx, module, f) = build_add_and_return();
        let target = TargetInfo::default();
        let mir = lower_module(&cx, &module, &target);
        let mf = mir.function(f);
        assert_eq!(mf.num_args, 2);
        assert!(mf.regs.count(RegisterPool::Ssa) >= 2);
        assert!(mf.regs.is_fixed(RegisterId::new(RegisterPool::Ssa, 0)));
        assert!(mf.regs.is_fixed(RegisterId::new(RegisterPool::Ssa, 1)));
    }

    #[test]
    fn add_lowers_to_a_single_add_followed_by_return() {
        let (cx, module, f) = build_add_and_return();
        let target = TargetInfo::default();
        let mir = lower_module(&cx, &module, &target);
        let mf = mir.function(f);
        let entry = mf.entry().unwrap();
        let opcodes: Vec<&MirOpcode> = mf.block(entry).insts.iter().map(|&id| &mf.inst(id).opcode).collect();
        assert_eq!(opcodes.len(), 2);
        assert!(matches!(opcodes[0], MirOpcode::Add));
        assert!(matches!(opcodes[1], MirOpcode::Return));
    }

    #[test]
    fn foreign_function_lowers_to_a_stub() {
        let mut cx = Context::new();
        let mut module = Module::new("test");
        let i32t = cx.int_type(32);
        let f = module.declare_function("puts", i32t, vec![Param { ty: i32t, name: "s".into(), attribute: None }], true);
        let target = TargetInfo::default();
        let mir = lower_module(&cx, &module, &target);
        assert!(mir.function(f).is_foreign);
    }
}
