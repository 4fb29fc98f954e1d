//! Textual MIR format (§6 "MIR textual format"): not a long-term
//! interchange format, used for debugging and test fixtures. Registers are
//! displayed with their pool tag and index, e.g. `%ssa3`, `%v7`, `%callee0`,
//! `%hw2`.

use std::fmt::Write;

use crate::mir::function::MirFunction;
use crate::mir::instruction::{MirInst, MirOperand, MirOpcode};
use crate::mir::module::MirModule;
use crate::mir::register::{RegisterId, RegisterPool};

fn pool_tag(p: RegisterPool) -> &'static str {
    match p {
        RegisterPool::Ssa => "ssa",
        RegisterPool::Virtual => "v",
        RegisterPool::Callee => "callee",
        RegisterPool::Hardware => "hw",
    }
}

pub fn print_register(r: RegisterId) -> String {
    format!("%{}{}", pool_tag(r.pool), r.index)
}

pub fn print_module(m: &MirModule) -> String {
    let mut out = String::new();
    for f in m.functions() {
        print_function(&mut out, f);
        out.push('\n');
    }
    out
}

fn print_function(out: &mut String, f: &MirFunction) {
    if f.is_foreign {
        let _ = writeln!(out, "ext mir func @{}", f.name);
        return;
    }
    let _ = writeln!(out, "mir func @{} {{", f.name);
    for block in f.blocks_in_order() {
        let _ = writeln!(out, "{}:", block.name);
        for &inst_id in &block.insts {
            print_inst(out, f.inst(inst_id));
        }
    }
    out.push_str("}\n");
}

fn print_inst(out: &mut String, inst: &MirInst) {
    out.push_str("  ");
    if !inst.dests.is_empty() {
        let dests: Vec<String> = inst.dests.iter().map(|&d| print_register(d)).collect();
        let _ = write!(out, "{} = ", dests.join(", "));
    }
    let _ = write!(out, "{}", inst.opcode.name());
    match &inst.opcode {
        MirOpcode::CondJump { condition, then_target: _, else_target: _ } => {
            let _ = write!(out, " {}", print_register(*condition));
        }
        MirOpcode::CondCopy { condition, invert } => {
            let _ = write!(out, " {}{}", if *invert { "!" } else { "" }, print_register(*condition));
        }
        _ => {}
    }
    let operand_strs: Vec<String> = inst.operands.iter().map(print_operand).collect();
    if !operand_strs.is_empty() {
        let _ = write!(out, " {}", operand_strs.join(", "));
    }
    let _ = writeln!(out, " : {}", inst.byte_width);
}

fn print_operand(op: &MirOperand) -> String {
    match op {
        MirOperand::Reg(r) => print_register(*r),
        MirOperand::ImmInt(v) => v.to_string(),
        MirOperand::ImmFloat(bits) => format!("{}", f64::from_bits(*bits)),
        MirOperand::Address(a) => {
            let mut s = print_register(a.base);
            if let Some(d) = a.dyn_offset {
                s.push_str(&format!(" + {}*{}", print_register(d), a.scale));
            }
            if a.const_offset != 0 {
                s.push_str(&format!(" + {}", a.const_offset));
            }
            format!("[{s}]")
        }
        MirOperand::Function(_) => "@func".to_string(),
        MirOperand::Global(_) => "@global".to_string(),
        MirOperand::Block(_) => "<block>".to_string(),
    }
}
