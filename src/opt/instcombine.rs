//! Instruction combining (§4.5 pass suite, scenarios S5, S6).
//!
//! A single sweep per invocation that folds constant-constant arithmetic,
//! algebraic identities (`x+0`, `x*1`, `x*0`, double negation), short
//! reassociation chains (`(x+c1)+c2 -> x+(c1+c2)`, `(-a)-(-b) -> b-a`), and
//! pointer comparisons provably false/true from provenance (§8 "S6 —
//! Pointer provenance"): two pointers with distinct known provenance never
//! compare equal, and a non-null pointer never compares equal to null.
//! Idempotent: a converged function returns `false` on the next call (§8
//! "Idempotence").

use smallvec::SmallVec;

use crate::analysis::provenance::{self, PointerInfo};
use crate::ir::context::Context;
use crate::ir::function::{FuncId, Function, InstId};
use crate::ir::instruction::{Instruction, IntPredicate, Opcode};
use crate::ir::module::Module;
use crate::ir::types::Type;
use crate::ir::value::{Constant, ValueRef};
use crate::pass::{FunctionPass, PassCategory};

pub struct InstCombine;

/// What to replace a folded instruction with: an existing value, or a new,
/// simpler instruction to insert in its place.
enum Fold {
    Value(ValueRef),
    NewInst { opcode: Opcode, operands: SmallVec<[ValueRef; 3]> },
}

impl FunctionPass for InstCombine {
    fn name(&self) -> &'static str {
        "instcombine"
    }

    fn category(&self) -> PassCategory {
        PassCategory::Simplification
    }

    fn run(&self, cx: &mut Context, module: &mut Module, func: FuncId) -> bool {
        // Recomputed on every invocation rather than cached: it's a cheap
        // single pass, and simpler than threading invalidation through
        // whichever pass ran since the last recompute.
        crate::analysis::analyze_provenance(func, module.function_mut(func));
        let mut changed = false;
        let inst_ids: Vec<InstId> = module
            .function(func)
            .blocks_in_order()
            .flat_map(|b| b.insts.clone())
            .collect();
        for inst_id in inst_ids {
            let f = module.function(func);
            let Some(inst) = f.try_inst(inst_id) else { continue };
            let Some(fold_result) = fold(cx, f, inst) else { continue };

            let replacement = match fold_result {
                Fold::Value(v) => v,
                Fold::NewInst { opcode, operands } => {
                    let ty = module.function(func).inst(inst_id).ty;
                    let parent = module.function(func).inst(inst_id).parent;
                    let new_inst = Instruction {
                        id: InstId(0),
                        opcode,
                        operands,
                        ty,
                        name: None,
                        parent,
                        pointer_info: None,
                    };
                    let mut builder = crate::ir::builder::IrBuilder::new(module);
                    let new_id = builder.insert(func, parent, Some(inst_id), new_inst);
                    ValueRef::Inst(func, new_id)
                }
            };

            let old_ref = ValueRef::Inst(func, inst_id);
            let mut builder = crate::ir::builder::IrBuilder::new(module);
            builder.replace_all_uses_with(old_ref, replacement);
            let mut builder = crate::ir::builder::IrBuilder::new(module);
            builder.erase(func, inst_id);
            changed = true;
        }
        changed
    }
}

/// Looks up the integer value of `v` if it is an integer constant.
fn const_val(cx: &Context, v: ValueRef) -> Option<u64> {
    match v {
        ValueRef::Const(id) => match cx.constant(id) {
            Constant::Int { value, .. } => Some(*value),
            _ => None,
        },
        _ => None,
    }
}

/// If `v` is the result of an instruction in `f` with the same opcode
/// discriminant as `op`, returns its operands.
fn as_inst_with<'f>(f: &'f Function, v: ValueRef, op: &Opcode) -> Option<&'f [ValueRef]> {
    if let ValueRef::Inst(_, id) = v {
        let i = f.try_inst(id)?;
        if std::mem::discriminant(&i.opcode) == std::mem::discriminant(op) {
            return Some(&i.operands);
        }
    }
    None
}

fn mask(bits: u32, v: u64) -> u64 {
    if bits >= 64 {
        v
    } else {
        v & ((1u64 << bits) - 1)
    }
}

fn fold(cx: &mut Context, f: &Function, inst: &Instruction) -> Option<Fold> {
    let ty = inst.ty;
    let bits = cx.type_of(ty).as_int_bits().unwrap_or(64);

    match &inst.opcode {
        Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::And | Opcode::Or | Opcode::Xor => {
            let a = inst.operands[0];
            let b = inst.operands[1];
            if let (Some(av), Some(bv)) = (const_val(cx, a), const_val(cx, b)) {
                let result = match inst.opcode {
                    Opcode::Add => av.wrapping_add(bv),
                    Opcode::Sub => av.wrapping_sub(bv),
                    Opcode::Mul => av.wrapping_mul(bv),
                    Opcode::And => av & bv,
                    Opcode::Or => av | bv,
                    Opcode::Xor => av ^ bv,
                    _ => unreachable!(),
                };
                return Some(Fold::Value(ValueRef::Const(cx.int_constant_of_type(ty, mask(bits, result)))));
            }

            if matches!(inst.opcode, Opcode::Add | Opcode::Sub) {
                if const_val(cx, b) == Some(0) {
                    return Some(Fold::Value(a));
                }
            }
            if matches!(inst.opcode, Opcode::Mul) {
                match const_val(cx, b) {
                    Some(1) => return Some(Fold::Value(a)),
                    Some(0) => return Some(Fold::Value(ValueRef::Const(cx.int_constant_of_type(ty, 0)))),
                    _ => {}
                }
            }

            // (x + c1) +/- c2  ->  x + (c1 +/- c2).
            if matches!(inst.opcode, Opcode::Add | Opcode::Sub) {
                if let Some(inner) = as_inst_with(f, a, &Opcode::Add) {
                    if let (Some(c1), Some(c2)) = (const_val(cx, inner[1]), const_val(cx, b)) {
                        let combined = match inst.opcode {
                            Opcode::Add => c1.wrapping_add(c2),
                            Opcode::Sub => c1.wrapping_sub(c2),
                            _ => unreachable!(),
                        };
                        let new_const = ValueRef::Const(cx.int_constant_of_type(ty, mask(bits, combined)));
                        return Some(Fold::NewInst {
                            opcode: Opcode::Add,
                            operands: smallvec::smallvec![inner[0], new_const],
                        });
                    }
                }
            }

            // sub (neg a) (neg b)  ->  sub b a.
            if matches!(inst.opcode, Opcode::Sub) {
                if let (Some(na), Some(nb)) =
                    (as_inst_with(f, a, &Opcode::Neg), as_inst_with(f, b, &Opcode::Neg))
                {
                    return Some(Fold::NewInst {
                        opcode: Opcode::Sub,
                        operands: smallvec::smallvec![nb[0], na[0]],
                    });
                }
            }
            None
        }
        Opcode::ICmp(pred) => fold_icmp(cx, f, inst, *pred),
        Opcode::Neg => {
            let a = inst.operands[0];
            if let Some(av) = const_val(cx, a) {
                return Some(Fold::Value(ValueRef::Const(
                    cx.int_constant_of_type(ty, mask(bits, 0u64.wrapping_sub(av))),
                )));
            }
            if let Some(inner) = as_inst_with(f, a, &Opcode::Neg) {
                return Some(Fold::Value(inner[0]));
            }
            None
        }
        _ => None,
    }
}

/// Folds an `icmp`: constant-constant comparisons evaluate directly; a
/// comparison with at least one pointer-typed operand consults provenance
/// (§8 scenario S6).
fn fold_icmp(cx: &mut Context, f: &Function, inst: &Instruction, pred: IntPredicate) -> Option<Fold> {
    let a = inst.operands[0];
    let b = inst.operands[1];

    if let (Some(av), Some(bv)) = (const_val(cx, a), const_val(cx, b)) {
        let cmp_bits = operand_int_bits(f, cx, a);
        return Some(Fold::Value(bool_const(cx, eval_icmp(pred, cmp_bits, av, bv))));
    }

    if is_pointer_value(f, cx, a) || is_pointer_value(f, cx, b) {
        if let Some(result) = fold_pointer_cmp(f, cx, pred, a, b) {
            return Some(Fold::Value(bool_const(cx, result)));
        }
    }

    None
}

/// §8 scenario S6: `%a == %b` folds to false for two pointers with distinct
/// known provenance, and any pointer known non-null compared to `null`
/// folds to false (so its `ne` counterpart folds to true).
fn fold_pointer_cmp(f: &Function, cx: &Context, pred: IntPredicate, a: ValueRef, b: ValueRef) -> Option<bool> {
    if !matches!(pred, IntPredicate::Eq | IntPredicate::Ne) {
        return None;
    }
    let is_null = |v: ValueRef| matches!(v, ValueRef::Const(c) if matches!(cx.constant(c), Constant::Null { .. }));
    let distinct = if is_null(a) {
        provenance::info_of(f, b)?.non_null
    } else if is_null(b) {
        provenance::info_of(f, a)?.non_null
    } else {
        let ia = provenance::info_of(f, a)?;
        let ib = provenance::info_of(f, b)?;
        PointerInfo::definitely_distinct(&ia, &ib)
    };
    distinct.then(|| matches!(pred, IntPredicate::Ne))
}

fn eval_icmp(pred: IntPredicate, bits: u32, a: u64, b: u64) -> bool {
    use IntPredicate::*;
    match pred {
        Eq => a == b,
        Ne => a != b,
        ULt => a < b,
        ULe => a <= b,
        UGt => a > b,
        UGe => a >= b,
        SLt | SLe | SGt | SGe => {
            let (sa, sb) = (sign_extend(bits, a), sign_extend(bits, b));
            match pred {
                SLt => sa < sb,
                SLe => sa <= sb,
                SGt => sa > sb,
                SGe => sa >= sb,
                _ => unreachable!(),
            }
        }
    }
}

fn sign_extend(bits: u32, v: u64) -> i64 {
    if bits == 0 || bits >= 64 {
        return v as i64;
    }
    let shift = 64 - bits;
    ((v << shift) as i64) >> shift
}

fn bool_const(cx: &mut Context, v: bool) -> ValueRef {
    let bool_ty = cx.int_type(1);
    ValueRef::Const(cx.int_constant_of_type(bool_ty, v as u64))
}

/// The integer bit width of a value reference's declared type, used to
/// sign-extend operands of a signed comparison predicate.
fn operand_int_bits(f: &Function, cx: &Context, v: ValueRef) -> u32 {
    let ty = match v {
        ValueRef::Inst(_, id) => f.inst(id).ty,
        ValueRef::Param(_, idx) => f.params[idx as usize].ty,
        ValueRef::Const(c) => cx.constant_type(c),
        ValueRef::Global(_) | ValueRef::Function(_) | ValueRef::Block(_, _) => return 64,
    };
    cx.type_of(ty).as_int_bits().unwrap_or(64)
}

/// Whether `v`'s declared type is a pointer (function/block references never
/// are).
fn is_pointer_value(f: &Function, cx: &Context, v: ValueRef) -> bool {
    let ty = match v {
        ValueRef::Inst(_, id) => f.inst(id).ty,
        ValueRef::Param(_, idx) => f.params[idx as usize].ty,
        ValueRef::Const(c) => cx.constant_type(c),
        ValueRef::Global(_) => return true,
        ValueRef::Function(_) | ValueRef::Block(_, _) => return false,
    };
    matches!(cx.type_of(ty), Type::Ptr)
}
