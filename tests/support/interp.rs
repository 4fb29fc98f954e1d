//! A tree-walking reference interpreter over parsed IR, used as an oracle
//! in the black-box pipeline tests: each scenario's expected result is
//! computed here, on the *unoptimized* module, and checked against
//! structural properties of what the real pipeline produces from the same
//! source. Calls are evaluated by direct recursion (no call stack
//! materialized beyond the host's), and memory is a single growable byte
//! buffer — there is no address space layout to get right since nothing
//! here crosses the VM boundary (out of scope).

use std::cell::RefCell;

use scatha::common::fx_hash::FxHashMap;
use scatha::ir::context::Context;
use scatha::ir::function::{BlockId, FuncId, Function, InstId};
use scatha::ir::instruction::{GepIndex, IntPredicate, Opcode};
use scatha::ir::module::Module;
use scatha::ir::types::{Type, TypeId};
use scatha::ir::value::{Constant, ValueRef};

pub struct Interp<'a> {
    cx: &'a Context,
    module: &'a Module,
    memory: RefCell<Vec<u8>>,
}

impl<'a> Interp<'a> {
    pub fn new(cx: &'a Context, module: &'a Module) -> Self {
        Self { cx, module, memory: RefCell::new(Vec::new()) }
    }

    pub fn call(&self, name: &str, args: &[i64]) -> i64 {
        let func = self.module.find_function(name).unwrap_or_else(|| panic!("no such function `{name}`"));
        self.exec(func, args)
    }

    fn exec(&self, func_id: FuncId, args: &[i64]) -> i64 {
        let f = self.module.function(func_id);
        let mut env: FxHashMap<InstId, i64> = FxHashMap::default();
        let mut prev: Option<BlockId> = None;
        let mut cur = f.entry().expect("function has no entry block");

        loop {
            let block = f.block(cur);
            let mut next: Option<BlockId> = None;
            let mut ret: Option<i64> = None;

            for &inst_id in &block.insts {
                let inst = f.inst(inst_id);
                match &inst.opcode {
                    Opcode::Phi { incoming } => {
                        let slot = incoming
                            .iter()
                            .position(|&b| Some(b) == prev)
                            .expect("phi has no incoming slot for the predecessor we arrived from");
                        let v = self.eval(f, inst.operands[slot], &env, args);
                        env.insert(inst_id, v);
                    }
                    Opcode::Goto => next = Some(self.block_operand(inst.operands[0])),
                    Opcode::Branch => {
                        let cond = self.eval(f, inst.operands[0], &env, args);
                        let target = if cond != 0 { inst.operands[1] } else { inst.operands[2] };
                        next = Some(self.block_operand(target));
                    }
                    Opcode::Return => {
                        ret = Some(match inst.operands.first() {
                            Some(&v) => self.eval(f, v, &env, args),
                            None => 0,
                        });
                    }
                    Opcode::Call => {
                        let ValueRef::Function(callee) = inst.operands[0] else {
                            panic!("the reference interpreter only evaluates direct calls")
                        };
                        let call_args: Vec<i64> =
                            inst.operands[1..].iter().map(|&v| self.eval(f, v, &env, args)).collect();
                        env.insert(inst_id, self.exec(callee, &call_args));
                    }
                    Opcode::Alloca { elem_ty, count } => {
                        let (size, align) = self.cx.size_align(*elem_ty);
                        let base = self.allocate(align, (size * count) as usize);
                        env.insert(inst_id, base as i64);
                    }
                    Opcode::GetElementPointer { elem_ty, indices } => {
                        let base = self.eval(f, inst.operands[0], &env, args);
                        env.insert(inst_id, self.eval_gep(f, base, *elem_ty, indices, &env, args));
                    }
                    Opcode::Load => {
                        let addr = self.eval(f, inst.operands[0], &env, args);
                        let width = self.cx.size_align(inst.ty).0 as usize;
                        env.insert(inst_id, self.read(addr as usize, width));
                    }
                    Opcode::Store => {
                        let value = self.eval(f, inst.operands[0], &env, args);
                        let addr = self.eval(f, inst.operands[1], &env, args);
                        // Byte width comes from the stored value's own type, matching
                        // `isel`'s lowering rather than `Store`'s own (void) result type.
                        let width = self.cx.size_align(self.operand_type(f, inst.operands[0])).0 as usize;
                        self.write(addr as usize, width, value);
                    }
                    Opcode::Select => {
                        let cond = self.eval(f, inst.operands[0], &env, args);
                        let v = if cond != 0 { inst.operands[1] } else { inst.operands[2] };
                        env.insert(inst_id, self.eval(f, v, &env, args));
                    }
                    Opcode::Neg => {
                        let a = self.eval(f, inst.operands[0], &env, args);
                        env.insert(inst_id, self.truncate(inst.ty, 0i64.wrapping_sub(a)));
                    }
                    Opcode::Not => {
                        let a = self.eval(f, inst.operands[0], &env, args);
                        env.insert(inst_id, self.truncate(inst.ty, !a));
                    }
                    Opcode::ICmp(pred) => {
                        let a = self.eval(f, inst.operands[0], &env, args);
                        let b = self.eval(f, inst.operands[1], &env, args);
                        let bits = self.int_bits(self.operand_type(f, inst.operands[0]));
                        env.insert(inst_id, eval_icmp(*pred, bits, a, b) as i64);
                    }
                    op @ (Opcode::Add
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
                    | Opcode::AShr) => {
                        let a = self.eval(f, inst.operands[0], &env, args);
                        let b = self.eval(f, inst.operands[1], &env, args);
                        let bits = self.int_bits(inst.ty);
                        env.insert(inst_id, eval_binop(op, bits, a, b));
                    }
                    other => panic!("reference interpreter does not model opcode `{}`", other.name()),
                }
            }

            if let Some(r) = ret {
                return r;
            }
            prev = Some(cur);
            cur = next.expect("block falls off the end with no terminator the interpreter understands");
        }
    }

    fn eval(&self, f: &Function, v: ValueRef, env: &FxHashMap<InstId, i64>, args: &[i64]) -> i64 {
        match v {
            ValueRef::Inst(_, id) => *env.get(&id).unwrap_or_else(|| panic!("use of {id:?} before its definition ran")),
            ValueRef::Param(_, idx) => args[idx as usize],
            ValueRef::Const(c) => match self.cx.constant(c) {
                Constant::Int { value, .. } => *value as i64,
                Constant::Null { .. } | Constant::Undef { .. } => 0,
                Constant::Float { .. } => panic!("reference interpreter does not model floating-point values"),
                Constant::Record { .. } => panic!("reference interpreter does not model aggregate-valued operands"),
            },
            ValueRef::Global(_) => panic!("reference interpreter does not model globals"),
            ValueRef::Function(_) | ValueRef::Block(_, _) => {
                let _ = f;
                panic!("not a scalar value")
            }
        }
    }

    fn block_operand(&self, v: ValueRef) -> BlockId {
        match v {
            ValueRef::Block(_, b) => b,
            _ => panic!("expected a block operand"),
        }
    }

    fn operand_type(&self, f: &Function, v: ValueRef) -> TypeId {
        match v {
            ValueRef::Inst(_, id) => f.inst(id).ty,
            ValueRef::Param(_, idx) => f.params[idx as usize].ty,
            ValueRef::Const(c) => self.cx.constant_type(c),
            ValueRef::Global(g) => self.module.global(g).ty,
            ValueRef::Function(_) | ValueRef::Block(_, _) => panic!("no scalar type for a function or block reference"),
        }
    }

    fn int_bits(&self, ty: TypeId) -> u32 {
        self.cx.type_of(ty).as_int_bits().unwrap_or(64)
    }

    fn truncate(&self, ty: TypeId, v: i64) -> i64 {
        mask(self.int_bits(ty), v)
    }

    /// Mirrors `isel::fold_gep`'s struct/array/scalar type walk exactly, so
    /// an address computed here lands on the same byte offset the real
    /// lowering would pick.
    fn eval_gep(
        &self,
        f: &Function,
        base: i64,
        elem_ty: TypeId,
        indices: &[GepIndex],
        env: &FxHashMap<InstId, i64>,
        args: &[i64],
    ) -> i64 {
        let mut offset: i64 = 0;
        let mut cur_ty = elem_ty;
        for idx in indices {
            match self.cx.type_of(cur_ty) {
                Type::Struct { members, .. } => {
                    let GepIndex::Constant(c) = idx else { panic!("a struct member index must be constant") };
                    let m = members[*c as usize];
                    offset += m.offset as i64;
                    cur_ty = m.ty;
                }
                Type::Array { elem, .. } => {
                    let esize = self.cx.size_align(*elem).0 as i64;
                    offset += match idx {
                        GepIndex::Constant(c) => c * esize,
                        GepIndex::Dynamic(v) => self.eval(f, *v, env, args) * esize,
                    };
                    cur_ty = *elem;
                }
                _ => {
                    let esize = self.cx.size_align(cur_ty).0 as i64;
                    offset += match idx {
                        GepIndex::Constant(c) => c * esize,
                        GepIndex::Dynamic(v) => self.eval(f, *v, env, args) * esize,
                    };
                }
            }
        }
        base + offset
    }

    fn allocate(&self, align: u64, size: usize) -> usize {
        let mut mem = self.memory.borrow_mut();
        let align = align.max(1) as usize;
        let pad = (align - (mem.len() % align)) % align;
        mem.resize(mem.len() + pad, 0);
        let base = mem.len();
        mem.resize(base + size.max(1), 0);
        base
    }

    fn read(&self, addr: usize, width: usize) -> i64 {
        let mem = self.memory.borrow();
        let mut bytes = [0u8; 8];
        bytes[..width].copy_from_slice(&mem[addr..addr + width]);
        i64::from_le_bytes(bytes)
    }

    fn write(&self, addr: usize, width: usize, value: i64) {
        let mut mem = self.memory.borrow_mut();
        if mem.len() < addr + width {
            mem.resize(addr + width, 0);
        }
        let bytes = value.to_le_bytes();
        mem[addr..addr + width].copy_from_slice(&bytes[..width]);
    }
}

fn mask(bits: u32, v: i64) -> i64 {
    if bits == 0 || bits >= 64 {
        v
    } else {
        (v as u64 & ((1u64 << bits) - 1)) as i64
    }
}

fn sign_extend(bits: u32, v: u64) -> i64 {
    if bits == 0 || bits >= 64 {
        return v as i64;
    }
    let shift = 64 - bits;
    ((v << shift) as i64) >> shift
}

fn eval_binop(op: &Opcode, bits: u32, a: i64, b: i64) -> i64 {
    let (au, bu) = (a as u64, b as u64);
    let raw: u64 = match op {
        Opcode::Add => au.wrapping_add(bu),
        Opcode::Sub => au.wrapping_sub(bu),
        Opcode::Mul => au.wrapping_mul(bu),
        Opcode::And => au & bu,
        Opcode::Or => au | bu,
        Opcode::Xor => au ^ bu,
        Opcode::Shl => au.wrapping_shl(bu as u32),
        Opcode::LShr => au.wrapping_shr(bu as u32),
        Opcode::AShr => (sign_extend(bits, au) >> (bu as u32)) as u64,
        Opcode::SDiv => (sign_extend(bits, au) / sign_extend(bits, bu)) as u64,
        Opcode::UDiv => au / bu,
        Opcode::SRem => (sign_extend(bits, au) % sign_extend(bits, bu)) as u64,
        Opcode::URem => au % bu,
        _ => unreachable!("not a binary arithmetic opcode"),
    };
    mask(bits, raw as i64)
}

fn eval_icmp(pred: IntPredicate, bits: u32, a: i64, b: i64) -> bool {
    use IntPredicate::*;
    let (au, bu) = (a as u64, b as u64);
    match pred {
        Eq => au == bu,
        Ne => au != bu,
        ULt => au < bu,
        ULe => au <= bu,
        UGt => au > bu,
        UGe => au >= bu,
        SLt | SLe | SGt | SGe => {
            let (sa, sb) = (sign_extend(bits, au), sign_extend(bits, bu));
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
