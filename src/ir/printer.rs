//! Textual IR printer (§6 "IR textual format").
//!
//! Produces the grammar described in §6: `func <ret> @name(<params>) { ... }`,
//! `ext func ...` for foreign functions, `@name = (global|constant) ...` for
//! globals, `struct @name { ... }`, and one `%name = opcode type operand, ...`
//! line per instruction. [`crate::ir::parser`] parses this back; the
//! print-then-parse round trip (§8) is exercised in `tests/roundtrip.rs`.

use std::fmt::Write;

use crate::ir::context::Context;
use crate::ir::function::{BlockId, Function, ParamAttribute};
use crate::ir::instruction::{FloatPredicate, GepIndex, Instruction, IntPredicate, Opcode};
use crate::ir::module::{GlobalVariable, Module, Mutability};
use crate::ir::types::Type;
use crate::ir::value::{Constant, ValueRef};

pub fn print_module(module: &Module, cx: &Context) -> String {
    let mut out = String::new();
    for (id, ty) in cx.all_types() {
        if let Type::Struct { name: Some(name), members, .. } = ty {
            let parts: Vec<String> = members.iter().map(|m| type_name(m.ty, cx)).collect();
            let _ = writeln!(out, "struct @{} {{ {} }}", name, parts.join(", "));
        }
        let _ = id; // id unused; kept for parity with a future ordered-struct-table print
    }
    for g in module.globals() {
        print_global(&mut out, g, cx);
        out.push('\n');
    }
    for f in module.functions() {
        print_function(&mut out, f, module, cx);
        out.push('\n');
    }
    out
}

fn print_global(out: &mut String, g: &GlobalVariable, cx: &Context) {
    let kind = match g.mutability {
        Mutability::Constant => "constant",
        Mutability::Mutable => "global",
    };
    let _ = write!(
        out,
        "@{} = {} {} {}\n",
        g.name,
        kind,
        type_name(g.ty, cx),
        constant_text(g.initializer, cx)
    );
}

pub fn type_name(ty: crate::ir::types::TypeId, cx: &Context) -> String {
    match cx.type_of(ty) {
        Type::Int { bits } => format!("i{bits}"),
        Type::Float(p) => match p {
            crate::ir::types::FloatPrecision::F32 => "f32".to_string(),
            crate::ir::types::FloatPrecision::F64 => "f64".to_string(),
        },
        Type::Ptr => "ptr".to_string(),
        Type::Void => "void".to_string(),
        Type::Struct { name: Some(n), .. } => format!("@{n}"),
        Type::Struct { name: None, members, .. } => {
            let parts: Vec<String> = members.iter().map(|m| type_name(m.ty, cx)).collect();
            format!("{{{}}}", parts.join(", "))
        }
        Type::Array { elem, count } => format!("[{} x {}]", count, type_name(*elem, cx)),
    }
}

fn constant_text(id: crate::ir::value::ConstId, cx: &Context) -> String {
    match cx.constant(id) {
        Constant::Int { ty, value } => format!("{} {}", type_name(*ty, cx), *value as i64),
        Constant::Float { ty, bits } => {
            let v = f64::from_bits(*bits);
            format!("{} {}", type_name(*ty, cx), v)
        }
        Constant::Null { ty } => format!("{} null", type_name(*ty, cx)),
        Constant::Undef { ty } => format!("{} undef", type_name(*ty, cx)),
        Constant::Record { ty, elements } => {
            let parts: Vec<String> = elements.iter().map(|e| constant_text(*e, cx)).collect();
            format!("{} {{{}}}", type_name(*ty, cx), parts.join(", "))
        }
    }
}

fn print_function(out: &mut String, f: &Function, module: &Module, cx: &Context) {
    if f.is_foreign {
        let _ = write!(out, "ext func {} @{}(", type_name(f.ret_ty, cx), f.name);
        let params: Vec<String> = f.params.iter().map(|p| type_name(p.ty, cx)).collect();
        let _ = write!(out, "{})\n", params.join(", "));
        return;
    }
    let _ = write!(out, "func {} @{}(", type_name(f.ret_ty, cx), f.name);
    let params: Vec<String> = f
        .params
        .iter()
        .enumerate()
        .map(|(i, p)| {
            let mut s = format!("{} %{}", type_name(p.ty, cx), i);
            match &p.attribute {
                Some(ParamAttribute::ByVal(t)) => {
                    let _ = write!(s, " byval({})", type_name(*t, cx));
                }
                Some(ParamAttribute::ValRet(t)) => {
                    let _ = write!(s, " valret({})", type_name(*t, cx));
                }
                None => {}
            }
            s
        })
        .collect();
    let _ = write!(out, "{}) {{\n", params.join(", "));
    for block in f.blocks_in_order() {
        print_block(out, f, module, block.id, cx);
    }
    out.push_str("}\n");
}

fn print_block(out: &mut String, f: &Function, module: &Module, id: BlockId, cx: &Context) {
    let block = f.block(id);
    let _ = write!(out, "{}:\n", block.name);
    for &inst_id in &block.insts {
        print_inst(out, f, module, f.inst(inst_id), cx);
    }
}

fn int_predicate_name(p: IntPredicate) -> &'static str {
    match p {
        IntPredicate::Eq => "eq",
        IntPredicate::Ne => "ne",
        IntPredicate::SLt => "slt",
        IntPredicate::SLe => "sle",
        IntPredicate::SGt => "sgt",
        IntPredicate::SGe => "sge",
        IntPredicate::ULt => "ult",
        IntPredicate::ULe => "ule",
        IntPredicate::UGt => "ugt",
        IntPredicate::UGe => "uge",
    }
}

fn float_predicate_name(p: FloatPredicate) -> &'static str {
    match p {
        FloatPredicate::OEq => "oeq",
        FloatPredicate::ONe => "one",
        FloatPredicate::OLt => "olt",
        FloatPredicate::OLe => "ole",
        FloatPredicate::OGt => "ogt",
        FloatPredicate::OGe => "oge",
    }
}

fn print_inst(out: &mut String, f: &Function, module: &Module, inst: &Instruction, cx: &Context) {
    out.push_str("  ");
    if inst.has_result() {
        let name = inst.name.clone().unwrap_or_else(|| format!("t{}", inst.id.index()));
        let _ = write!(out, "%{} = ", name);
    }
    let opname = match &inst.opcode {
        Opcode::ICmp(p) => format!("icmp {}", int_predicate_name(*p)),
        Opcode::FCmp(p) => format!("fcmp {}", float_predicate_name(*p)),
        other => other.name().to_string(),
    };
    let _ = write!(out, "{} {}", opname, type_name(inst.ty, cx));
    let operand_strs: Vec<String> = inst
        .operands
        .iter()
        .map(|op| operand_text(f, module, *op, cx))
        .collect();
    match &inst.opcode {
        Opcode::Phi { incoming } => {
            let parts: Vec<String> = incoming
                .iter()
                .zip(inst.operands.iter())
                .map(|(b, v)| format!("[{}, {}]", operand_text(f, module, *v, cx), f.block(*b).name))
                .collect();
            let _ = write!(out, " {}", parts.join(", "));
        }
        Opcode::Alloca { elem_ty, count } => {
            let _ = write!(out, " {}, {}", type_name(*elem_ty, cx), count);
        }
        Opcode::GetElementPointer { elem_ty, indices } => {
            let _ = write!(out, " {}, {}", type_name(*elem_ty, cx), operand_text(f, module, inst.operands[0], cx));
            for idx in indices {
                match idx {
                    GepIndex::Constant(c) => {
                        let _ = write!(out, ", {c}");
                    }
                    GepIndex::Dynamic(v) => {
                        let _ = write!(out, ", {}", operand_text(f, module, *v, cx));
                    }
                }
            }
        }
        Opcode::ExtractValue { indices } | Opcode::InsertValue { indices } => {
            if !operand_strs.is_empty() {
                let _ = write!(out, " {}", operand_strs.join(", "));
            }
            for idx in indices {
                let _ = write!(out, ", {idx}");
            }
        }
        _ if !operand_strs.is_empty() => {
            let _ = write!(out, " {}", operand_strs.join(", "));
        }
        _ => {}
    }
    if let Some(info) = &inst.pointer_info {
        let _ = write!(
            out,
            " #ptr(align: {}, nonnull: {}, noescape: {})",
            info.align, info.non_null, info.no_escape
        );
    }
    out.push('\n');
}

fn operand_text(f: &Function, module: &Module, v: ValueRef, cx: &Context) -> String {
    match v {
        ValueRef::Inst(_, id) => {
            let i = f.inst(id);
            match &i.name {
                Some(n) => format!("%{n}"),
                None => format!("%t{}", id.index()),
            }
        }
        ValueRef::Param(_, idx) => format!("%{idx}"),
        ValueRef::Block(_, b) => f.block(b).name.clone(),
        ValueRef::Const(c) => constant_text(c, cx),
        ValueRef::Global(g) => format!("@{}", module.global(g).name),
        ValueRef::Function(fid) => format!("@{}", module.function(fid).name),
    }
}
