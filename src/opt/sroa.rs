//! Scalar replacement of aggregates (§4.5 pass suite, scenario S3).
//!
//! Splits an `alloca` of a struct/array whose every use is a `load`/`store`
//! reached through a chain of *constant-index* `GetElementPointer`s into one
//! fresh scalar `alloca` per distinct access path, redirecting every
//! load/store's address operand to the matching new alloca. The original
//! alloca and the now-dead GEP chain are left for DCE to remove. Allocas
//! touched by any dynamic-index GEP, or whose path does not bottom out at a
//! scalar leaf, are left untouched.

use crate::common::fx_hash::FxHashMap;
use crate::ir::context::Context;
use crate::ir::function::{FuncId, Function, InstId};
use crate::ir::instruction::{GepIndex, Instruction, Opcode};
use crate::ir::module::Module;
use crate::ir::types::{Type, TypeId};
use crate::ir::value::ValueRef;
use crate::pass::{FunctionPass, PassCategory};

pub struct Sroa;

impl FunctionPass for Sroa {
    fn name(&self) -> &'static str {
        "sroa"
    }

    fn category(&self) -> PassCategory {
        PassCategory::Simplification
    }

    fn run(&self, cx: &mut Context, module: &mut Module, func: FuncId) -> bool {
        let candidates: Vec<InstId> = module
            .function(func)
            .blocks_in_order()
            .flat_map(|b| b.insts.clone())
            .filter(|&id| matches!(module.function(func).inst(id).opcode, Opcode::Alloca { .. }))
            .collect();

        let mut changed = false;
        for alloca_id in candidates {
            if try_split(cx, module, func, alloca_id) {
                changed = true;
            }
        }
        changed
    }
}

fn resolve_leaf(cx: &Context, mut ty: TypeId, path: &[u64]) -> Option<TypeId> {
    for &idx in path {
        match cx.type_of(ty) {
            Type::Array { elem, count } => {
                if idx >= *count {
                    return None;
                }
                ty = *elem;
            }
            Type::Struct { members, .. } => {
                ty = members.get(idx as usize)?.ty;
            }
            _ => return None,
        }
    }
    match cx.type_of(ty) {
        Type::Struct { .. } | Type::Array { .. } => None,
        _ => Some(ty),
    }
}

/// Walks every use of `value` (initially the alloca itself), accumulating
/// constant GEP indices into a path, recording a `(path, user, is_store)`
/// triple at each terminal load/store. Returns `None` if any use is not a
/// load, a store-through-this-address, or an all-constant GEP.
fn collect_accesses(
    module: &Module,
    func: FuncId,
    f: &Function,
    value: ValueRef,
    path: Vec<u64>,
    out: &mut Vec<(Vec<u64>, InstId, bool)>,
) -> bool {
    for (uf, ui) in module.uses_of(value).collect::<Vec<_>>() {
        if uf != func {
            return false;
        }
        let user = f.inst(ui);
        match &user.opcode {
            Opcode::Load if user.operands[0] == value => out.push((path.clone(), ui, false)),
            Opcode::Store if user.operands.get(1) == Some(&value) => out.push((path.clone(), ui, true)),
            Opcode::GetElementPointer { indices, .. } => {
                let mut new_path = path.clone();
                for idx in indices {
                    match idx {
                        GepIndex::Constant(c) if *c >= 0 => new_path.push(*c as u64),
                        _ => return false,
                    }
                }
                if !collect_accesses(module, func, f, ValueRef::Inst(func, ui), new_path, out) {
                    return false;
                }
            }
            _ => return false,
        }
    }
    true
}

fn try_split(cx: &mut Context, module: &mut Module, func: FuncId, alloca_id: InstId) -> bool {
    let (elem_ty, count) = match &module.function(func).inst(alloca_id).opcode {
        Opcode::Alloca { elem_ty, count } => (*elem_ty, *count),
        _ => return false,
    };
    if count != 1 {
        return false;
    }
    // Only aggregates are worth splitting; mem2reg already handles scalars.
    if !matches!(cx.type_of(elem_ty), Type::Struct { .. } | Type::Array { .. }) {
        return false;
    }

    let alloca_ref = ValueRef::Inst(func, alloca_id);
    let mut accesses = Vec::new();
    let f = module.function(func);
    if !collect_accesses(module, func, f, alloca_ref, Vec::new(), &mut accesses) {
        return false;
    }
    if accesses.is_empty() {
        return false;
    }
    for (path, _, _) in &accesses {
        if resolve_leaf(cx, elem_ty, path).is_none() {
            return false;
        }
    }

    let entry = module.function(func).entry().expect("alloca requires an entry block");
    let mut sub_allocas: FxHashMap<Vec<u64>, ValueRef> = FxHashMap::default();
    for (path, _, _) in &accesses {
        if sub_allocas.contains_key(path) {
            continue;
        }
        let leaf_ty = resolve_leaf(cx, elem_ty, path).unwrap();
        let new_alloca = Instruction {
            id: InstId(0),
            opcode: Opcode::Alloca { elem_ty: leaf_ty, count: 1 },
            operands: smallvec::smallvec![],
            ty: cx.ptr_type(),
            name: None,
            parent: entry,
            pointer_info: None,
        };
        let first = module.function(func).block(entry).insts.first().copied();
        let mut builder = crate::ir::builder::IrBuilder::new(module);
        let id = builder.insert(func, entry, first, new_alloca);
        sub_allocas.insert(path.clone(), ValueRef::Inst(func, id));
    }

    for (path, user, is_store) in &accesses {
        let new_addr = sub_allocas[path];
        let slot = if *is_store { 1 } else { 0 };
        let mut builder = crate::ir::builder::IrBuilder::new(module);
        builder.set_operand_at(func, *user, slot, new_addr);
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::function::Param;
    use crate::ir::instruction::{GepIndex, Instruction, Opcode};
    use crate::ir::module::Module;
    use crate::pass::for_each_function;

    fn build_two_field_struct_fn(cx: &mut Context, module: &mut Module) -> FuncId {
        let i32t = cx.int_type(32);
        let struct_ty = cx.anonymous_struct(vec![i32t, i32t]);
        let ptr = cx.ptr_type();
        let func = module.declare_function(
            "example",
            i32t,
            vec![Param { ty: i32t, name: "v".into(), attribute: None }],
            false,
        );
        let entry = module.function_mut(func).push_block("entry");

        let mut builder = crate::ir::builder::IrBuilder::new(module);
        let alloca = builder.insert(
            func,
            entry,
            None,
            Instruction {
                id: crate::ir::function::InstId(0),
                opcode: Opcode::Alloca { elem_ty: struct_ty, count: 1 },
                operands: smallvec::smallvec![],
                ty: ptr,
                name: None,
                parent: entry,
                pointer_info: None,
            },
        );
        let alloca_ref = ValueRef::Inst(func, alloca);

        let gep0 = builder.insert(
            func,
            entry,
            None,
            Instruction {
                id: crate::ir::function::InstId(0),
                opcode: Opcode::GetElementPointer { elem_ty: struct_ty, indices: vec![GepIndex::Constant(0)] },
                operands: smallvec::smallvec![alloca_ref],
                ty: ptr,
                name: None,
                parent: entry,
                pointer_info: None,
            },
        );
        let gep0_ref = ValueRef::Inst(func, gep0);
        let param_ref = ValueRef::Param(func, 0);
        builder.insert(
            func,
            entry,
            None,
            Instruction {
                id: crate::ir::function::InstId(0),
                opcode: Opcode::Store,
                operands: smallvec::smallvec![param_ref, gep0_ref],
                ty: cx.void_type(),
                name: None,
                parent: entry,
                pointer_info: None,
            },
        );

        let gep1 = builder.insert(
            func,
            entry,
            None,
            Instruction {
                id: crate::ir::function::InstId(0),
                opcode: Opcode::GetElementPointer { elem_ty: struct_ty, indices: vec![GepIndex::Constant(1)] },
                operands: smallvec::smallvec![alloca_ref],
                ty: ptr,
                name: None,
                parent: entry,
                pointer_info: None,
            },
        );
        let gep1_ref = ValueRef::Inst(func, gep1);
        builder.insert(
            func,
            entry,
            None,
            Instruction {
                id: crate::ir::function::InstId(0),
                opcode: Opcode::Load,
                operands: smallvec::smallvec![gep1_ref],
                ty: i32t,
                name: None,
                parent: entry,
                pointer_info: None,
            },
        );
        builder.insert(
            func,
            entry,
            None,
            Instruction {
                id: crate::ir::function::InstId(0),
                opcode: Opcode::Return,
                operands: smallvec::smallvec![],
                ty: cx.void_type(),
                name: None,
                parent: entry,
                pointer_info: None,
            },
        );
        func
    }

    #[test]
    fn splits_struct_alloca_reached_through_constant_geps() {
        let mut cx = Context::new();
        let mut module = Module::new("test");
        let func = build_two_field_struct_fn(&mut cx, &mut module);

        let changed = for_each_function(&mut cx, &mut module, &Sroa);
        assert!(changed);

        let f = module.function(func);
        let alloca_count = f
            .blocks_in_order()
            .flat_map(|b| b.insts.iter())
            .filter(|&&id| matches!(f.inst(id).opcode, Opcode::Alloca { .. }))
            .count();
        // original struct alloca plus two new scalar allocas (one per field).
        assert_eq!(alloca_count, 3);
    }

    #[test]
    fn leaves_dynamically_indexed_alloca_untouched() {
        let mut cx = Context::new();
        let mut module = Module::new("test");
        let i32t = cx.int_type(32);
        let arr_ty = cx.array_type(i32t, 4);
        let ptr = cx.ptr_type();
        let void_ty = cx.void_type();
        let func = module.declare_function(
            "dyn_index",
            void_ty,
            vec![Param { ty: i32t, name: "idx".into(), attribute: None }],
            false,
        );
        let entry = module.function_mut(func).push_block("entry");

        let mut builder = crate::ir::builder::IrBuilder::new(&mut module);
        let alloca = builder.insert(
            func,
            entry,
            None,
            Instruction {
                id: crate::ir::function::InstId(0),
                opcode: Opcode::Alloca { elem_ty: arr_ty, count: 1 },
                operands: smallvec::smallvec![],
                ty: ptr,
                name: None,
                parent: entry,
                pointer_info: None,
            },
        );
        let alloca_ref = ValueRef::Inst(func, alloca);
        let param_ref = ValueRef::Param(func, 0);
        builder.insert(
            func,
            entry,
            None,
            Instruction {
                id: crate::ir::function::InstId(0),
                opcode: Opcode::GetElementPointer {
                    elem_ty: arr_ty,
                    indices: vec![GepIndex::Dynamic(param_ref)],
                },
                operands: smallvec::smallvec![alloca_ref, param_ref],
                ty: ptr,
                name: None,
                parent: entry,
                pointer_info: None,
            },
        );

        let changed = for_each_function(&mut cx, &mut module, &Sroa);
        assert!(!changed);
    }
}
