//! Pointer provenance analysis (§4.3 "Pointer Provenance", §6 "Pointer
//! metadata", scenario S6).
//!
//! Metadata attached to pointer-typed instructions; propagated through
//! `gep`, `phi`, `select`, and casts, and used to fold pointer comparisons
//! (distinct allocations never alias) and null checks.

use crate::ir::function::{FuncId, Function, InstId};
use crate::ir::instruction::Opcode;
use crate::ir::value::ValueRef;

/// The originating allocation of a pointer, if known. Two pointers with
/// different, known provenances can never alias.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provenance {
    /// Traces back to a specific `alloca` instruction.
    Alloca(FuncId, InstId),
    /// Traces back to a specific global variable.
    Global(crate::ir::module::GlobalId),
    /// Unknown origin (e.g. an FFI pointer, or a `load`ed pointer).
    Unknown,
}

/// Metadata textually rendered as `#ptr(align: N, validsize: N,
/// provenance: <val>, offset: N, nonnull, noescape, static)` (§6).
#[derive(Debug, Clone, PartialEq)]
pub struct PointerInfo {
    pub align: u64,
    /// Known-valid byte range from the pointer's current position, if any.
    pub valid_size: Option<u64>,
    pub provenance: Provenance,
    /// Constant byte offset from `provenance`'s base, if staticaly known.
    pub static_offset: Option<i64>,
    pub non_null: bool,
    pub no_escape: bool,
}

impl PointerInfo {
    pub fn unknown() -> Self {
        Self {
            align: 1,
            valid_size: None,
            provenance: Provenance::Unknown,
            static_offset: None,
            non_null: false,
            no_escape: false,
        }
    }

    pub fn for_alloca(func: FuncId, inst: InstId, align: u64, size: u64) -> Self {
        Self {
            align,
            valid_size: Some(size),
            provenance: Provenance::Alloca(func, inst),
            static_offset: Some(0),
            non_null: true,
            no_escape: true,
        }
    }

    /// Offsets this pointer by a constant amount, e.g. through a GEP with
    /// all-constant indices.
    pub fn offset_by(&self, delta: i64) -> Self {
        Self {
            align: gcd_align(self.align, delta),
            valid_size: self.valid_size.map(|v| v.saturating_sub(delta.unsigned_abs())),
            provenance: self.provenance,
            static_offset: self.static_offset.map(|o| o + delta),
            non_null: self.non_null,
            no_escape: self.no_escape,
        }
    }

    /// Drops static knowledge a dynamic offset would invalidate, keeping
    /// provenance and non-null status (a dynamically offset pointer from a
    /// non-null base is still non-null as long as it isn't itself null,
    /// which the source language's GEP semantics already assume).
    pub fn offset_dynamically(&self) -> Self {
        Self {
            align: 1,
            valid_size: None,
            provenance: self.provenance,
            static_offset: None,
            non_null: self.non_null,
            no_escape: false,
        }
    }

    /// Merges provenance at a control-flow join (`phi`/`select`): only
    /// facts both operands agree on survive.
    pub fn merge(a: &PointerInfo, b: &PointerInfo) -> PointerInfo {
        PointerInfo {
            align: gcd(a.align.max(1), b.align.max(1)),
            valid_size: match (a.valid_size, b.valid_size) {
                (Some(x), Some(y)) => Some(x.min(y)),
                _ => None,
            },
            provenance: if a.provenance == b.provenance { a.provenance } else { Provenance::Unknown },
            static_offset: if a.static_offset == b.static_offset { a.static_offset } else { None },
            non_null: a.non_null && b.non_null,
            no_escape: a.no_escape && b.no_escape,
        }
    }

    /// §8 scenario S6: two pointers with distinct *known* provenance never
    /// compare equal; a non-null pointer never compares equal to null.
    pub fn definitely_distinct(a: &PointerInfo, b: &PointerInfo) -> bool {
        match (a.provenance, b.provenance) {
            (Provenance::Unknown, _) | (_, Provenance::Unknown) => false,
            (pa, pb) => pa != pb,
        }
    }
}

fn gcd_align(a: u64, b: i64) -> u64 {
    let b = b.unsigned_abs().max(1);
    gcd(a.max(1), b)
}

fn gcd(a: u64, b: u64) -> u64 {
    if b == 0 { a } else { gcd(b, a % b) }
}

/// Recomputes provenance for every pointer-typed instruction in `f`,
/// propagating through GEP (constant-offset case), phi, select, and
/// bitcast. Non-pointer, FFI-sourced, or loaded pointers get
/// [`PointerInfo::unknown`].
pub fn analyze(func_id: FuncId, f: &mut Function) {
    for id in f.block_ids().collect::<Vec<_>>() {
        let inst_ids: Vec<InstId> = f.block(id).insts.clone();
        for inst_id in inst_ids {
            let info = compute_for(func_id, f, inst_id);
            if let Some(info) = info {
                f.inst_mut(inst_id).pointer_info = Some(info);
            }
        }
    }
}

fn compute_for(func_id: FuncId, f: &Function, inst_id: InstId) -> Option<PointerInfo> {
    let inst = f.inst(inst_id);
    match &inst.opcode {
        Opcode::Alloca { .. } => {
            let (size, align) = (8, 8); // conservative; exact size owned by caller layout pass
            Some(PointerInfo::for_alloca(func_id, inst_id, align, size))
        }
        Opcode::GetElementPointer { indices, .. } => {
            let base_info = info_of(f, inst.operands[0]);
            let mut all_const = true;
            let mut total: i64 = 0;
            for idx in indices {
                match idx {
                    crate::ir::instruction::GepIndex::Constant(c) => total += c,
                    crate::ir::instruction::GepIndex::Dynamic(_) => all_const = false,
                }
            }
            let base = base_info.unwrap_or_else(PointerInfo::unknown);
            Some(if all_const { base.offset_by(total) } else { base.offset_dynamically() })
        }
        Opcode::Bitcast => info_of(f, inst.operands[0]),
        Opcode::Phi { .. } => {
            let mut acc: Option<PointerInfo> = None;
            for op in &inst.operands {
                let info = info_of(f, *op).unwrap_or_else(PointerInfo::unknown);
                acc = Some(match acc {
                    None => info,
                    Some(cur) => PointerInfo::merge(&cur, &info),
                });
            }
            acc
        }
        Opcode::Select => {
            let then_info = info_of(f, inst.operands[1]).unwrap_or_else(PointerInfo::unknown);
            let else_info = info_of(f, inst.operands[2]).unwrap_or_else(PointerInfo::unknown);
            Some(PointerInfo::merge(&then_info, &else_info))
        }
        _ => None,
    }
}

pub(crate) fn info_of(f: &Function, v: ValueRef) -> Option<PointerInfo> {
    match v {
        ValueRef::Inst(_, id) => f.try_inst(id).and_then(|i| i.pointer_info.clone()),
        ValueRef::Const(_) => None,
        ValueRef::Global(g) => Some(PointerInfo {
            align: 1,
            valid_size: None,
            provenance: Provenance::Global(g),
            static_offset: Some(0),
            non_null: true,
            no_escape: false,
        }),
        _ => None,
    }
}

