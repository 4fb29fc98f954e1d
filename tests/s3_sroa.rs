//! Scenario S3: SROA of a two-field aggregate stored inside an array of
//! ten, then read back. After SROA (and mem-to-reg promoting the
//! resulting scalar allocas), no `alloca`/`load`/`store`/`gep` should
//! remain; the function should just compute the constant sum directly.

mod support;

use scatha::ir::instruction::Opcode;
use scatha::pass::for_each_function;
use support::interp::Interp;

const SOURCE: &str = r#"
struct @pair { i64, i64 }

func i64 @s3() {
entry:
  %arr = alloca ptr [10 x @pair], 1
  %g0 = gep ptr [10 x @pair], %arr, 3, 0
  store i64 i64 100, %g0
  %g1 = gep ptr [10 x @pair], %arr, 3, 1
  store i64 i64 23, %g1
  %l0 = load i64 %g0
  %l1 = load i64 %g1
  %sum = add i64 %l0, %l1
  return i64 %sum
}
"#;

#[test]
fn the_interpreter_computes_the_stored_sum() {
    let (cx, module) = scatha::ir::parser::parse_module(SOURCE, "s3.scir").expect("fixture parses");
    let interp = Interp::new(&cx, &module);
    assert_eq!(interp.call("s3", &[]), 123);
}

#[test]
fn sroa_then_mem2reg_eliminates_every_memory_operation_and_keeps_the_same_answer() {
    let (mut cx, mut module) = scatha::ir::parser::parse_module(SOURCE, "s3.scir").expect("fixture parses");
    let func = module.find_function("s3").expect("s3 is declared");

    let mut changed = true;
    while changed {
        changed = false;
        changed |= for_each_function(&mut cx, &mut module, &scatha::opt::sroa::Sroa);
        changed |= for_each_function(&mut cx, &mut module, &scatha::opt::mem2reg::Mem2Reg);
        changed |= for_each_function(&mut cx, &mut module, &scatha::opt::dce::Dce);
    }

    let interp = Interp::new(&cx, &module);
    assert_eq!(interp.call("s3", &[]), 123);

    let f = module.function(func);
    for (_, inst) in f.blocks_in_order().flat_map(|b| b.insts.iter().map(|&id| (id, f.inst(id)))) {
        assert!(
            !matches!(
                inst.opcode,
                Opcode::Alloca { .. } | Opcode::Load | Opcode::Store | Opcode::GetElementPointer { .. }
            ),
            "no memory operation should survive SROA + mem2reg + DCE, found {:?}",
            inst.opcode
        );
    }
}
