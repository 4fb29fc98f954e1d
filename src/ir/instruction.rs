//! SSA instructions (§3 "Instruction", §4.2).

use smallvec::SmallVec;

use crate::analysis::provenance::PointerInfo;
use crate::ir::function::{BlockId, InstId};
use crate::ir::types::TypeId;
use crate::ir::value::ValueRef;

/// Integer comparison predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntPredicate {
    Eq,
    Ne,
    SLt,
    SLe,
    SGt,
    SGe,
    ULt,
    ULe,
    UGt,
    UGe,
}

impl IntPredicate {
    pub fn invert(self) -> Self {
        use IntPredicate::*;
        match self {
            Eq => Ne,
            Ne => Eq,
            SLt => SGe,
            SGe => SLt,
            SLe => SGt,
            SGt => SLe,
            ULt => UGe,
            UGe => ULt,
            ULe => UGt,
            UGt => ULe,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FloatPredicate {
    OEq,
    ONe,
    OLt,
    OLe,
    OGt,
    OGe,
}

/// Offset list for a `GetElementPointer`, mirroring C-style `a[i].field`
/// chains: each element either indexes an array by a dynamic/constant
/// amount, or selects a struct member by constant index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GepIndex {
    Constant(i64),
    Dynamic(ValueRef),
}

/// Opcode and its operand/attribute payload. Operands referenced from a
/// payload field (not the generic `operands` list) are still present in
/// `Instruction::operands` in the same order they appear in the variant;
/// the payload exists only to name them.
#[derive(Debug, Clone, PartialEq)]
pub enum Opcode {
    // -- arithmetic --------------------------------------------------------
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
    FAdd,
    FSub,
    FMul,
    FDiv,
    Neg,
    FNeg,
    Not,

    // -- comparisons ---------------------------------------------------------
    ICmp(IntPredicate),
    FCmp(FloatPredicate),

    // -- conversions --------------------------------------------------------
    Trunc,
    ZExt,
    SExt,
    FPTrunc,
    FPExt,
    FToUI,
    FToSI,
    UIToF,
    SIToF,
    Bitcast,
    PtrToInt,
    IntToPtr,

    // -- memory ---------------------------------------------------------
    /// Allocates `count` contiguous elements of `elem_ty` on the stack.
    Alloca { elem_ty: TypeId, count: u64 },
    /// `operands[0]` is the address.
    Load,
    /// `operands[0]` is the value being stored, `operands[1]` the address.
    Store,
    /// `base` is `operands[0]`; `indices` names the rest, one per GEP step.
    GetElementPointer { elem_ty: TypeId, indices: Vec<GepIndex> },

    // -- aggregates -------------------------------------------------------
    ExtractValue { indices: Vec<u32> },
    InsertValue { indices: Vec<u32> },

    // -- control flow -------------------------------------------------
    /// Unconditional jump; `operands[0]` is the target block.
    Goto,
    /// `operands[0]` is the condition, `operands[1]`/`operands[2]` the
    /// then/else targets.
    Branch,
    /// `operands` is zero or one return value.
    Return,
    /// One operand per predecessor, `incoming[i]` names which predecessor
    /// block `operands[i]` flows from.
    Phi { incoming: Vec<BlockId> },
    /// `operands[0]` is the condition, `operands[1]`/`operands[2]` the
    /// then/else values.
    Select,

    // -- calls ----------------------------------------------------------
    /// `operands[0]` is the callee (a `Function` or indirect pointer
    /// value), the rest are arguments.
    Call,
}

impl Opcode {
    pub fn is_terminator(&self) -> bool {
        matches!(self, Opcode::Goto | Opcode::Branch | Opcode::Return)
    }

    pub fn has_side_effects(&self) -> bool {
        matches!(
            self,
            Opcode::Store | Opcode::Call | Opcode::Goto | Opcode::Branch | Opcode::Return
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            Opcode::Add => "add",
            Opcode::Sub => "sub",
            Opcode::Mul => "mul",
            Opcode::SDiv => "sdiv",
            Opcode::UDiv => "udiv",
            Opcode::SRem => "srem",
            Opcode::URem => "urem",
            Opcode::And => "and",
            Opcode::Or => "or",
            Opcode::Xor => "xor",
            Opcode::Shl => "shl",
            Opcode::LShr => "lshr",
            Opcode::AShr => "ashr",
            Opcode::FAdd => "fadd",
            Opcode::FSub => "fsub",
            Opcode::FMul => "fmul",
            Opcode::FDiv => "fdiv",
            Opcode::Neg => "neg",
            Opcode::FNeg => "fneg",
            Opcode::Not => "not",
            Opcode::ICmp(_) => "icmp",
            Opcode::FCmp(_) => "fcmp",
            Opcode::Trunc => "trunc",
            Opcode::ZExt => "zext",
            Opcode::SExt => "sext",
            Opcode::FPTrunc => "fptrunc",
            Opcode::FPExt => "fpext",
            Opcode::FToUI => "ftoui",
            Opcode::FToSI => "ftosi",
            Opcode::UIToF => "uitof",
            Opcode::SIToF => "sitof",
            Opcode::Bitcast => "bitcast",
            Opcode::PtrToInt => "ptrtoint",
            Opcode::IntToPtr => "inttoptr",
            Opcode::Alloca { .. } => "alloca",
            Opcode::Load => "load",
            Opcode::Store => "store",
            Opcode::GetElementPointer { .. } => "gep",
            Opcode::ExtractValue { .. } => "extract_value",
            Opcode::InsertValue { .. } => "insert_value",
            Opcode::Goto => "goto",
            Opcode::Branch => "branch",
            Opcode::Return => "return",
            Opcode::Phi { .. } => "phi",
            Opcode::Select => "select",
            Opcode::Call => "call",
        }
    }
}

/// A single SSA instruction, owned by its parent [`crate::ir::function::BasicBlock`].
#[derive(Debug, Clone)]
pub struct Instruction {
    pub id: InstId,
    pub opcode: Opcode,
    /// Ordered operand list; every entry is a non-owning [`ValueRef`].
    pub operands: SmallVec<[ValueRef; 3]>,
    /// Result type. `Void` for instructions with no result (store, branch).
    pub ty: TypeId,
    pub name: Option<String>,
    pub parent: BlockId,
    /// Pointer provenance metadata (§4.3), present only on pointer-typed
    /// results.
    pub pointer_info: Option<PointerInfo>,
}

impl Instruction {
    pub fn has_result(&self) -> bool {
        !matches!(
            self.opcode,
            Opcode::Store | Opcode::Goto | Opcode::Branch | Opcode::Return
        )
    }

    pub fn is_terminator(&self) -> bool {
        self.opcode.is_terminator()
    }

    pub fn is_phi(&self) -> bool {
        matches!(self.opcode, Opcode::Phi { .. })
    }
}
