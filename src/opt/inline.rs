//! Function inlining (§4.5 pass suite).
//!
//! A module pass since it rewrites call sites across the whole call graph
//! rather than a single function in isolation. Direct calls to small,
//! non-foreign, non-recursive callees are spliced into the caller: the
//! caller's block is split at the call site, the callee's blocks are cloned
//! in, every `return` becomes a `goto` to the split-off continuation block,
//! and (if the callee returns a value) a `phi` in the continuation block
//! gathers the per-return-site value. Accepts an optional sub-pipeline (the
//! DSL's `inline(sroa, memtoreg)` form) run to a local fixed point on the
//! caller after every round of inlining, so the freshly spliced-in code is
//! simplified before the next pass sees it.

use smallvec::smallvec;

use crate::common::fx_hash::FxHashMap;
use crate::ir::context::Context;
use crate::ir::function::{BlockId, FuncId, InstId};
use crate::ir::instruction::{GepIndex, Instruction, Opcode};
use crate::ir::module::Module;
use crate::ir::value::ValueRef;
use crate::pass::{ModulePass, PassCategory, Pipeline};

/// Callees larger than this (in instruction count) are never inlined.
const INLINE_THRESHOLD: usize = 32;
/// Defensive cap on inlines performed per function per `run` call, so a
/// pathological call graph cannot make a single pass invocation unbounded.
const MAX_INLINES_PER_FUNCTION: usize = 64;

pub struct Inline {
    sub: Option<Pipeline>,
}

impl Inline {
    pub fn new(sub: Option<Pipeline>) -> Self {
        Self { sub }
    }
}

impl ModulePass for Inline {
    fn name(&self) -> &'static str {
        "inline"
    }

    fn category(&self) -> PassCategory {
        PassCategory::Optimization
    }

    fn run(&self, cx: &mut Context, module: &mut Module) -> bool {
        let mut changed = false;
        for func in module.function_ids().collect::<Vec<_>>() {
            if module.function(func).is_foreign {
                continue;
            }
            let mut rounds = 0;
            while rounds < MAX_INLINES_PER_FUNCTION {
                let Some(call_id) = find_inline_candidate(module, func) else { break };
                inline_call(cx, module, func, call_id);
                changed = true;
                rounds += 1;
                log::debug!("inline: spliced a call into {}", module.function(func).name);
            }
        }
        if changed {
            if let Some(sub) = &self.sub {
                sub.run_to_fixpoint(cx, module, 8);
            }
        }
        changed
    }
}

fn find_inline_candidate(module: &Module, func: FuncId) -> Option<InstId> {
    let f = module.function(func);
    for block in f.blocks_in_order() {
        for &inst_id in &block.insts {
            let inst = f.inst(inst_id);
            let Opcode::Call = inst.opcode else { continue };
            let Some(&ValueRef::Function(callee)) = inst.operands.first() else { continue };
            if callee == func {
                continue;
            }
            let callee_fn = module.function(callee);
            if callee_fn.is_foreign || callee_fn.instruction_count() > INLINE_THRESHOLD {
                continue;
            }
            if calls_function(module, callee, func) {
                continue;
            }
            return Some(inst_id);
        }
    }
    None
}

/// Whether `haystack` contains a direct call to `needle` anywhere in its
/// body; used to veto inlining that would immediately introduce a
/// caller-calls-callee-calls-caller cycle.
fn calls_function(module: &Module, haystack: FuncId, needle: FuncId) -> bool {
    let f = module.function(haystack);
    f.blocks_in_order().flat_map(|b| b.insts.iter()).any(|&id| {
        let inst = f.inst(id);
        matches!(inst.opcode, Opcode::Call) && inst.operands.first() == Some(&ValueRef::Function(needle))
    })
}

fn remap_value(
    v: ValueRef,
    callee: FuncId,
    caller: FuncId,
    args: &[ValueRef],
    inst_map: &FxHashMap<InstId, InstId>,
    block_map: &FxHashMap<BlockId, BlockId>,
) -> ValueRef {
    match v {
        ValueRef::Param(f, idx) if f == callee => args[idx as usize],
        ValueRef::Inst(f, id) if f == callee => ValueRef::Inst(caller, inst_map[&id]),
        ValueRef::Block(f, b) if f == callee => ValueRef::Block(caller, block_map[&b]),
        other => other,
    }
}

fn remap_opcode(
    opcode: &Opcode,
    callee: FuncId,
    caller: FuncId,
    args: &[ValueRef],
    inst_map: &FxHashMap<InstId, InstId>,
    block_map: &FxHashMap<BlockId, BlockId>,
) -> Opcode {
    match opcode {
        Opcode::GetElementPointer { elem_ty, indices } => Opcode::GetElementPointer {
            elem_ty: *elem_ty,
            indices: indices
                .iter()
                .map(|i| match i {
                    GepIndex::Constant(c) => GepIndex::Constant(*c),
                    GepIndex::Dynamic(v) => {
                        GepIndex::Dynamic(remap_value(*v, callee, caller, args, inst_map, block_map))
                    }
                })
                .collect(),
        },
        Opcode::Phi { incoming } => Opcode::Phi { incoming: incoming.iter().map(|b| block_map[b]).collect() },
        other => other.clone(),
    }
}

fn inline_call(cx: &mut Context, module: &mut Module, caller: FuncId, call_id: InstId) {
    let (callee, args, ret_ty) = {
        let inst = module.function(caller).inst(call_id);
        let callee = match inst.operands[0] {
            ValueRef::Function(f) => f,
            _ => unreachable!("inline candidate must be a direct call"),
        };
        (callee, inst.operands[1..].to_vec(), inst.ty)
    };

    let original_block = module.function(caller).inst(call_id).parent;
    let pos = module
        .function(caller)
        .block(original_block)
        .insts
        .iter()
        .position(|&i| i == call_id)
        .expect("call must be in its parent block");

    let tail: Vec<InstId> = {
        let f = module.function_mut(caller);
        f.block_mut(original_block).insts.split_off(pos + 1)
    };

    let continuation = module.function_mut(caller).push_block(format!("{}.cont", module.function(callee).name));
    {
        let f = module.function_mut(caller);
        for &id in &tail {
            f.inst_mut(id).parent = continuation;
        }
        f.block_mut(continuation).insts = tail;
        let old_succs = f.block(original_block).succs.clone();
        f.block_mut(continuation).succs = old_succs.clone();
        for s in old_succs {
            f.block_mut(s).preds.remove(&original_block);
            f.block_mut(s).preds.insert(continuation);
        }
    }

    let mut block_map: FxHashMap<BlockId, BlockId> = FxHashMap::default();
    for b in module.function(callee).block_ids().collect::<Vec<_>>() {
        let name = module.function(callee).block(b).name.clone();
        let new_b = module.function_mut(caller).push_block(name);
        block_map.insert(b, new_b);
    }

    let mut inst_map: FxHashMap<InstId, InstId> = FxHashMap::default();
    let mut incoming_returns: Vec<(BlockId, Option<ValueRef>)> = Vec::new();
    let callee_blocks: Vec<BlockId> = module.function(callee).block_ids().collect();

    for b in &callee_blocks {
        let new_block = block_map[b];
        let old_insts: Vec<InstId> = module.function(callee).block(*b).insts.clone();
        for old_id in old_insts {
            let old_inst = module.function(callee).inst(old_id).clone();

            if let Opcode::Phi { .. } = old_inst.opcode {
                let remapped_opcode =
                    remap_opcode(&old_inst.opcode, callee, caller, &args, &inst_map, &block_map);
                let arity = match &remapped_opcode {
                    Opcode::Phi { incoming } => incoming.len(),
                    _ => unreachable!(),
                };
                let undef = ValueRef::Const(cx.undef(old_inst.ty));
                let new_inst = Instruction {
                    id: InstId(0),
                    opcode: remapped_opcode,
                    operands: smallvec![undef; arity],
                    ty: old_inst.ty,
                    name: old_inst.name.clone(),
                    parent: new_block,
                    pointer_info: old_inst.pointer_info.clone(),
                };
                let f = module.function_mut(caller);
                let new_id = f.alloc_inst(new_inst);
                f.block_mut(new_block).insts.push(new_id);
                inst_map.insert(old_id, new_id);
                continue;
            }

            if let Opcode::Return = old_inst.opcode {
                let remapped_value = old_inst
                    .operands
                    .first()
                    .map(|&v| remap_value(v, callee, caller, &args, &inst_map, &block_map));
                incoming_returns.push((new_block, remapped_value));
                let goto = Instruction {
                    id: InstId(0),
                    opcode: Opcode::Goto,
                    operands: smallvec![ValueRef::Block(caller, continuation)],
                    ty: cx.void_type(),
                    name: None,
                    parent: new_block,
                    pointer_info: None,
                };
                let mut builder = crate::ir::builder::IrBuilder::new(module);
                let new_id = builder.insert(caller, new_block, None, goto);
                inst_map.insert(old_id, new_id);
                continue;
            }

            let remapped_operands: smallvec::SmallVec<[ValueRef; 3]> = old_inst
                .operands
                .iter()
                .map(|&v| remap_value(v, callee, caller, &args, &inst_map, &block_map))
                .collect();
            let remapped_opcode = remap_opcode(&old_inst.opcode, callee, caller, &args, &inst_map, &block_map);
            let new_inst = Instruction {
                id: InstId(0),
                opcode: remapped_opcode,
                operands: remapped_operands,
                ty: old_inst.ty,
                name: old_inst.name.clone(),
                parent: new_block,
                pointer_info: old_inst.pointer_info.clone(),
            };
            let mut builder = crate::ir::builder::IrBuilder::new(module);
            let new_id = builder.insert(caller, new_block, None, new_inst);
            inst_map.insert(old_id, new_id);
        }
    }

    // Second pass: phi operands, which may reference instructions that had
    // not yet been cloned (loop back-edges) when the phi itself was cloned.
    for b in &callee_blocks {
        let old_insts: Vec<InstId> = module.function(callee).block(*b).insts.clone();
        for old_id in old_insts {
            let old_inst = module.function(callee).inst(old_id).clone();
            let Opcode::Phi { .. } = old_inst.opcode else { continue };
            let new_id = inst_map[&old_id];
            for (slot, &old_operand) in old_inst.operands.iter().enumerate() {
                let new_val = remap_value(old_operand, callee, caller, &args, &inst_map, &block_map);
                let mut builder = crate::ir::builder::IrBuilder::new(module);
                builder.set_operand_at(caller, new_id, slot, new_val);
            }
        }
    }

    let mapped_entry = block_map[&module.function(callee).entry().expect("callee must have an entry block")];
    let jump_in = Instruction {
        id: InstId(0),
        opcode: Opcode::Goto,
        operands: smallvec![ValueRef::Block(caller, mapped_entry)],
        ty: cx.void_type(),
        name: None,
        parent: original_block,
        pointer_info: None,
    };
    {
        let mut builder = crate::ir::builder::IrBuilder::new(module);
        builder.insert(caller, original_block, None, jump_in);
    }

    let call_ref = ValueRef::Inst(caller, call_id);
    if !cx.type_of(ret_ty).is_void() && !incoming_returns.is_empty() {
        let incoming_blocks: Vec<BlockId> = incoming_returns.iter().map(|(b, _)| *b).collect();
        let operands: smallvec::SmallVec<[ValueRef; 3]> = incoming_returns
            .iter()
            .map(|(_, v)| v.unwrap_or(ValueRef::Const(cx.undef(ret_ty))))
            .collect();
        let phi = Instruction {
            id: InstId(0),
            opcode: Opcode::Phi { incoming: incoming_blocks },
            operands,
            ty: ret_ty,
            name: None,
            parent: continuation,
            pointer_info: None,
        };
        let first = module.function(caller).block(continuation).insts.first().copied();
        let phi_id = {
            let mut builder = crate::ir::builder::IrBuilder::new(module);
            builder.insert(caller, continuation, first, phi)
        };
        let mut builder = crate::ir::builder::IrBuilder::new(module);
        builder.replace_all_uses_with(call_ref, ValueRef::Inst(caller, phi_id));
    }

    let mut builder = crate::ir::builder::IrBuilder::new(module);
    builder.erase(caller, call_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::function::Param;

    fn build_callee(cx: &mut Context, module: &mut Module) -> FuncId {
        let i32t = cx.int_type(32);
        let func = module.declare_function(
            "add_one",
            i32t,
            vec![Param { ty: i32t, name: "x".into(), attribute: None }],
            false,
        );
        let entry = module.function_mut(func).push_block("entry");
        let one = ValueRef::Const(cx.int_constant(32, 1));
        let mut builder = crate::ir::builder::IrBuilder::new(module);
        let add = builder.insert(
            func,
            entry,
            None,
            Instruction {
                id: InstId(0),
                opcode: Opcode::Add,
                operands: smallvec![ValueRef::Param(func, 0), one],
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
                id: InstId(0),
                opcode: Opcode::Return,
                operands: smallvec![ValueRef::Inst(func, add)],
                ty: i32t,
                name: None,
                parent: entry,
                pointer_info: None,
            },
        );
        func
    }

    #[test]
    fn inlines_a_direct_call_and_rewrites_result_uses() {
        let mut cx = Context::new();
        let mut module = Module::new("test");
        let callee = build_callee(&mut cx, &mut module);

        let i32t = cx.int_type(32);
        let caller = module.declare_function("main", i32t, vec![], false);
        let entry = module.function_mut(caller).push_block("entry");
        let arg = ValueRef::Const(cx.int_constant(32, 41));
        let mut builder = crate::ir::builder::IrBuilder::new(&mut module);
        let call = builder.insert(
            caller,
            entry,
            None,
            Instruction {
                id: InstId(0),
                opcode: Opcode::Call,
                operands: smallvec![ValueRef::Function(callee), arg],
                ty: i32t,
                name: None,
                parent: entry,
                pointer_info: None,
            },
        );
        builder.insert(
            caller,
            entry,
            None,
            Instruction {
                id: InstId(0),
                opcode: Opcode::Return,
                operands: smallvec![ValueRef::Inst(caller, call)],
                ty: i32t,
                name: None,
                parent: entry,
                pointer_info: None,
            },
        );

        let changed = Inline::new(None).run(&mut cx, &mut module);
        assert!(changed);

        let has_call = module
            .function(caller)
            .blocks_in_order()
            .flat_map(|b| b.insts.iter())
            .any(|&id| matches!(module.function(caller).inst(id).opcode, Opcode::Call));
        assert!(!has_call);

        let returns_phi = module.function(caller).blocks_in_order().any(|b| {
            b.insts
                .iter()
                .any(|&id| matches!(module.function(caller).inst(id).opcode, Opcode::Phi { .. }))
        });
        assert!(returns_phi);
    }

    #[test]
    fn does_not_inline_self_recursive_call() {
        let mut cx = Context::new();
        let mut module = Module::new("test");
        let i32t = cx.int_type(32);
        let func = module.declare_function("rec", i32t, vec![], false);
        let entry = module.function_mut(func).push_block("entry");
        let mut builder = crate::ir::builder::IrBuilder::new(&mut module);
        let call = builder.insert(
            func,
            entry,
            None,
            Instruction {
                id: InstId(0),
                opcode: Opcode::Call,
                operands: smallvec![ValueRef::Function(func)],
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
                id: InstId(0),
                opcode: Opcode::Return,
                operands: smallvec![ValueRef::Inst(func, call)],
                ty: i32t,
                name: None,
                parent: entry,
                pointer_info: None,
            },
        );

        let changed = Inline::new(None).run(&mut cx, &mut module);
        assert!(!changed);
    }
}
