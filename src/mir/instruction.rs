//! MIR instructions (§3 "MIR Instruction", §4.6, §4.7).
//!
//! Same shape as an IR instruction, but destinations are explicit registers
//! (zero, one, or several consecutive) rather than an implicit SSA result,
//! and operands may be immediates or addressing modes as well as registers.

use smallvec::SmallVec;

use crate::ir::instruction::{FloatPredicate, IntPredicate};
use crate::ir::function::FuncId;
use crate::ir::module::GlobalId;
use crate::mir::function::MirBlockId;
use crate::mir::register::RegisterId;

/// A symbolic address computed by `GetElementPointer` lowering (§4.6):
/// `base + dyn_offset * scale + const_offset`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MemoryAddress {
    pub base: RegisterId,
    pub dyn_offset: Option<RegisterId>,
    pub scale: u32,
    pub const_offset: i64,
}

impl MemoryAddress {
    pub fn direct(base: RegisterId) -> Self {
        Self { base, dyn_offset: None, scale: 1, const_offset: 0 }
    }
}

/// An MIR operand: a register, an immediate, an address, or a reference to
/// a cross-function/cross-module entity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MirOperand {
    Reg(RegisterId),
    ImmInt(i64),
    ImmFloat(u64),
    Address(MemoryAddress),
    Function(FuncId),
    Global(GlobalId),
    Block(MirBlockId),
}

impl MirOperand {
    pub fn as_reg(&self) -> Option<RegisterId> {
        match self {
            MirOperand::Reg(r) => Some(*r),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallShape {
    Direct,
    Indirect,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MirOpcode {
    /// Register-to-register or immediate-to-register move. Lowering of
    /// IR constants narrower than 64 bits, of record/array constants (one
    /// `Copy` per 8-byte slice, §4.6), and of SSA-destruction phi/tail-call
    /// argument shuffling all produce this opcode.
    Copy,
    /// Copy executed only if the (inverted, for the else-arm) condition
    /// register holds a nonzero value — the select-lowering primitive of
    /// §4.7 step 5.
    CondCopy { condition: RegisterId, invert: bool },

    Add,
    Sub,
    Mul,
    SDiv,
    UDiv,
    SRem,
    URem,
    And,
    Or,
    Xor,
    Shl,
    LShr,
    AShr,
    Neg,
    Not,
    ICmp(IntPredicate),
    FCmp(FloatPredicate),
    FAdd,
    FSub,
    FMul,
    FDiv,
    FNeg,

    /// Self-XOR used by the zero-materialization post-pass (§4.8.5).
    Xorself,

    Load,
    Store,
    /// Materializes a [`MemoryAddress`] into the destination register
    /// (`GetElementPointer` lowering, §4.6).
    LoadAddress(MemoryAddress),

    Jump,
    /// `condition` selects `then_target` / `else_target`.
    CondJump { condition: RegisterId, then_target: MirBlockId, else_target: MirBlockId },
    Return,

    Call { shape: CallShape, register_offset: u32 },

    /// A call immediately followed by a return of its results, collapsed by
    /// SSA destruction (§4.7 step 2) into a single terminator: the callee is
    /// entered in place of returning to this frame. Only ever `Direct` (§9.1
    /// "tail calls: direct callee only").
    TailCall { shape: CallShape },

    /// Present only before SSA destruction (§4.7, testable property 8: "no
    /// phi instructions remain" afterward).
    Phi { incoming: Vec<MirBlockId> },
}

impl MirOpcode {
    pub fn is_terminator(&self) -> bool {
        matches!(self, MirOpcode::Jump | MirOpcode::CondJump { .. } | MirOpcode::Return | MirOpcode::TailCall { .. })
    }

    pub fn is_call(&self) -> bool {
        matches!(self, MirOpcode::Call { .. } | MirOpcode::TailCall { .. })
    }

    pub fn has_side_effects(&self) -> bool {
        matches!(
            self,
            MirOpcode::Store
                | MirOpcode::Call { .. }
                | MirOpcode::TailCall { .. }
                | MirOpcode::Jump
                | MirOpcode::CondJump { .. }
                | MirOpcode::Return
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            MirOpcode::Copy => "mov",
            MirOpcode::CondCopy { .. } => "cmov",
            MirOpcode::Add => "add",
            MirOpcode::Sub => "sub",
            MirOpcode::Mul => "mul",
            MirOpcode::SDiv => "sdiv",
            MirOpcode::UDiv => "udiv",
            MirOpcode::SRem => "srem",
            MirOpcode::URem => "urem",
            MirOpcode::And => "and",
            MirOpcode::Or => "or",
            MirOpcode::Xor => "xor",
            MirOpcode::Shl => "shl",
            MirOpcode::LShr => "lshr",
            MirOpcode::AShr => "ashr",
            MirOpcode::Neg => "neg",
            MirOpcode::Not => "not",
            MirOpcode::ICmp(_) => "icmp",
            MirOpcode::FCmp(_) => "fcmp",
            MirOpcode::FAdd => "fadd",
            MirOpcode::FSub => "fsub",
            MirOpcode::FMul => "fmul",
            MirOpcode::FDiv => "fdiv",
            MirOpcode::FNeg => "fneg",
            MirOpcode::Xorself => "xorself",
            MirOpcode::Load => "load",
            MirOpcode::Store => "store",
            MirOpcode::LoadAddress(_) => "lea",
            MirOpcode::Jump => "jmp",
            MirOpcode::CondJump { .. } => "jcc",
            MirOpcode::Return => "ret",
            MirOpcode::Call { .. } => "call",
            MirOpcode::TailCall { .. } => "tailcall",
            MirOpcode::Phi { .. } => "phi",
        }
    }
}

/// A single MIR instruction. `dests` holds zero, one, or several
/// consecutive destination registers (§3: call instructions may define
/// several result registers at once; multi-register constants lower to
/// several `Copy`s, each with one destination).
#[derive(Debug, Clone)]
pub struct MirInst {
    pub opcode: MirOpcode,
    pub operands: SmallVec<[MirOperand; 3]>,
    pub dests: SmallVec<[RegisterId; 2]>,
    /// Byte width of the operation (§3 "Carries a byte width").
    pub byte_width: u32,
}

impl MirInst {
    pub fn is_terminator(&self) -> bool {
        self.opcode.is_terminator()
    }
}
