//! Process-wide interner (§3 "Context", §4.1).
//!
//! One `Context` is created per compilation and threaded by reference into
//! every pass. It is the single owner of types and constants; everything
//! else holds non-owning [`TypeId`]/[`ConstId`] handles into it.

use crate::ir::types::{FloatPrecision, Type, TypeId, TypeTable};
use crate::ir::value::{Constant, ConstId, ConstantTable};

#[derive(Debug, Default)]
pub struct Context {
    types: TypeTable,
    consts: ConstantTable,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    // -- types ------------------------------------------------------------

    pub fn int_type(&mut self, bits: u32) -> TypeId {
        self.types.int_type(bits)
    }

    pub fn float_type(&mut self, prec: FloatPrecision) -> TypeId {
        self.types.float_type(prec)
    }

    pub fn ptr_type(&mut self) -> TypeId {
        self.types.ptr_type()
    }

    pub fn void_type(&mut self) -> TypeId {
        self.types.void_type()
    }

    pub fn anonymous_struct(&mut self, members: Vec<TypeId>) -> TypeId {
        self.types.anonymous_struct(members)
    }

    pub fn named_struct(&mut self, name: impl Into<String>, members: Vec<TypeId>) -> TypeId {
        self.types.named_struct(name.into(), members)
    }

    pub fn array_type(&mut self, elem: TypeId, count: u64) -> TypeId {
        self.types.array_type(elem, count)
    }

    pub fn type_of(&self, id: TypeId) -> &Type {
        self.types.get(id)
    }

    pub fn all_types(&self) -> impl Iterator<Item = (TypeId, &Type)> {
        self.types.all()
    }

    pub fn size_align(&self, id: TypeId) -> (u64, u64) {
        self.types.size_align(id)
    }

    pub fn type_size(&self, id: TypeId) -> u64 {
        self.types.size_align(id).0
    }

    // -- constants ----------------------------------------------------------

    pub fn int_constant(&mut self, bits: u32, value: u64) -> ConstId {
        let ty = self.int_type(bits);
        self.consts.int_constant(ty, bits, value)
    }

    pub fn int_constant_of_type(&mut self, ty: TypeId, value: u64) -> ConstId {
        let bits = self.types.get(ty).as_int_bits().unwrap_or(64);
        self.consts.int_constant(ty, bits, value)
    }

    pub fn float_constant(&mut self, prec: FloatPrecision, value: f64) -> ConstId {
        let ty = self.float_type(prec);
        let bits = match prec {
            FloatPrecision::F32 => (value as f32).to_bits() as u64,
            FloatPrecision::F64 => value.to_bits(),
        };
        self.consts.float_constant(ty, bits)
    }

    pub fn null_constant(&mut self) -> ConstId {
        let ty = self.ptr_type();
        self.consts.null_constant(ty)
    }

    pub fn record_constant(&mut self, ty: TypeId, elements: Vec<ConstId>) -> ConstId {
        self.consts.record_constant(ty, elements)
    }

    pub fn undef(&mut self, ty: TypeId) -> ConstId {
        self.consts.undef(ty)
    }

    pub fn constant(&self, id: ConstId) -> &Constant {
        self.consts.get(id)
    }

    pub fn constant_type(&self, id: ConstId) -> TypeId {
        self.consts.get(id).ty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_int_constant_same_id() {
        let mut cx = Context::new();
        let a = cx.int_constant(32, 42);
        let b = cx.int_constant(32, 42);
        assert_eq!(a, b);
        let c = cx.int_constant(32, 43);
        assert_ne!(a, c);
    }

    #[test]
    fn int_constant_is_masked_to_width() {
        let mut cx = Context::new();
        let a = cx.int_constant(8, 0x1FF);
        let b = cx.int_constant(8, 0xFF);
        assert_eq!(a, b);
    }

    #[test]
    fn null_is_a_single_pointer_constant() {
        let mut cx = Context::new();
        let n1 = cx.null_constant();
        let n2 = cx.null_constant();
        assert_eq!(n1, n2);
    }
}
