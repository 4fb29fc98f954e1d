//! Constant values (§3 "Context", value kind "constant") and the polymorphic
//! value-reference type used throughout the IR (§9 "Polymorphism": a closed
//! sum type dispatched by pattern matching rather than a class hierarchy).

use crate::common::fx_hash::FxHashMap;
use crate::ir::function::{BlockId, FuncId, InstId};
use crate::ir::module::GlobalId;
use crate::ir::types::TypeId;

/// An interned constant handle, analogous to [`TypeId`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConstId(pub(crate) u32);

impl ConstId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum ConstKey {
    Int(TypeId, u64),
    Float(TypeId, u64),
    Null(TypeId),
    Record(TypeId, Vec<ConstId>),
    Undef(TypeId),
}

/// A constant value. Every variant carries its [`TypeId`].
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    /// Integer constant, stored two's-complement in a 64-bit word; bits
    /// beyond the type's width are zero.
    Int { ty: TypeId, value: u64 },
    /// Float constant, stored as its raw bit pattern (`f64::to_bits`,
    /// truncated for `f32`) so that `PartialEq`/`Hash` are well defined even
    /// for NaN payloads produced by constant folding.
    Float { ty: TypeId, bits: u64 },
    Null { ty: TypeId },
    Record { ty: TypeId, elements: Vec<ConstId> },
    Undef { ty: TypeId },
}

impl Constant {
    pub fn ty(&self) -> TypeId {
        match self {
            Constant::Int { ty, .. }
            | Constant::Float { ty, .. }
            | Constant::Null { ty }
            | Constant::Record { ty, .. }
            | Constant::Undef { ty } => *ty,
        }
    }

    pub fn as_int(&self) -> Option<u64> {
        match self {
            Constant::Int { value, .. } => Some(*value),
            _ => None,
        }
    }
}

/// Owns every distinct [`Constant`] produced during a compilation.
#[derive(Debug, Default)]
pub struct ConstantTable {
    consts: Vec<Constant>,
    by_key: FxHashMap<ConstKey, ConstId>,
}

impl ConstantTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: ConstId) -> &Constant {
        &self.consts[id.index()]
    }

    fn intern(&mut self, key: ConstKey, make: impl FnOnce() -> Constant) -> ConstId {
        if let Some(id) = self.by_key.get(&key) {
            return *id;
        }
        let id = ConstId(self.consts.len() as u32);
        self.consts.push(make());
        self.by_key.insert(key, id);
        id
    }

    pub fn int_constant(&mut self, ty: TypeId, bits: u32, value: u64) -> ConstId {
        let mask = if bits >= 64 { u64::MAX } else { (1u64 << bits) - 1 };
        let value = value & mask;
        self.intern(ConstKey::Int(ty, value), || Constant::Int { ty, value })
    }

    pub fn float_constant(&mut self, ty: TypeId, bits: u64) -> ConstId {
        self.intern(ConstKey::Float(ty, bits), || Constant::Float { ty, bits })
    }

    pub fn null_constant(&mut self, ty: TypeId) -> ConstId {
        self.intern(ConstKey::Null(ty), || Constant::Null { ty })
    }

    pub fn record_constant(&mut self, ty: TypeId, elements: Vec<ConstId>) -> ConstId {
        let key = ConstKey::Record(ty, elements.clone());
        self.intern(key, || Constant::Record { ty, elements })
    }

    pub fn undef(&mut self, ty: TypeId) -> ConstId {
        self.intern(ConstKey::Undef(ty), || Constant::Undef { ty })
    }
}

/// A reference to any IR value. Instructions hold operand lists of these;
/// the module-level use/def table (§3 "Use graph") is keyed by the same
/// type so cross-function edges (a call referencing another function) and
/// intra-function edges (an add referencing a prior instruction) are
/// handled uniformly.
///
/// Every instruction is addressed fully qualified as `(FuncId, InstId)`
/// because globals and functions can be used from many functions at once;
/// this is the "generational arena indices" encoding called for in §9.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueRef {
    Inst(FuncId, InstId),
    /// A function parameter, addressed by its index in the parameter list.
    Param(FuncId, u32),
    /// A basic block used as a branch target.
    Block(FuncId, BlockId),
    Const(ConstId),
    Global(GlobalId),
    /// A function used as a callee or address-of-function constant.
    Function(FuncId),
}

impl ValueRef {
    pub fn as_inst(&self) -> Option<(FuncId, InstId)> {
        match self {
            ValueRef::Inst(f, i) => Some((*f, *i)),
            _ => None,
        }
    }

    pub fn is_constant(&self) -> bool {
        matches!(self, ValueRef::Const(_))
    }
}
