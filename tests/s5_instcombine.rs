//! Scenario S5: InstCombine arithmetic folding, end to end through the
//! full optimizing pipeline run to a fixed point (a single `instcombine`
//! sweep only collapses one reassociation step at a time; the pipeline's
//! repeated passes are what fully converge the three-deep chain).

mod support;

use scatha::ir::instruction::Opcode;
use support::interp::Interp;

const REASSOC_SOURCE: &str = r#"
func i32 @f(i32 %0) {
entry:
  %t1 = add i32 %0, i32 1
  %t2 = add i32 %t1, i32 1
  %t3 = add i32 %t2, i32 1
  %t4 = sub i32 %t3, i32 2
  return i32 %t4
}
"#;

#[test]
fn reassociation_chain_collapses_to_a_single_add_of_one() {
    let (cx, module) = scatha::ir::parser::parse_module(REASSOC_SOURCE, "s5a.scir").expect("fixture parses");
    let oracle = Interp::new(&cx, &module);
    assert_eq!(oracle.call("f", &[5]), 6);
    assert_eq!(oracle.call("f", &[0]), 1);

    let (mut cx, mut module) = scatha::ir::parser::parse_module(REASSOC_SOURCE, "s5a.scir").expect("fixture parses");
    let pipeline = scatha::pass::pipeline_for_opt_level(3);
    pipeline.run_to_fixpoint(&mut cx, &mut module, 32);

    let interp = Interp::new(&cx, &module);
    assert_eq!(interp.call("f", &[5]), 6);
    assert_eq!(interp.call("f", &[0]), 1);

    let func = module.find_function("f").expect("f is declared");
    let f = module.function(func);
    let arithmetic_insts: Vec<&Opcode> = f
        .blocks_in_order()
        .flat_map(|b| b.insts.iter())
        .map(|&id| &f.inst(id).opcode)
        .filter(|op| matches!(op, Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Neg))
        .collect();
    assert_eq!(arithmetic_insts.len(), 1, "the chain should collapse to exactly one arithmetic instruction");
    assert!(matches!(arithmetic_insts[0], Opcode::Add), "the surviving instruction should be the folded add");
}

const DOUBLE_NEG_SOURCE: &str = r#"
func i32 @g(i32 %0, i32 %1) {
entry:
  %na = neg i32 %0
  %nb = neg i32 %1
  %r = sub i32 %na, %nb
  return i32 %r
}
"#;

#[test]
fn negated_operands_of_a_subtraction_swap_and_drop_the_negations() {
    let (cx, module) = scatha::ir::parser::parse_module(DOUBLE_NEG_SOURCE, "s5b.scir").expect("fixture parses");
    let oracle = Interp::new(&cx, &module);
    assert_eq!(oracle.call("g", &[3, 7]), 4);

    let (mut cx, mut module) = scatha::ir::parser::parse_module(DOUBLE_NEG_SOURCE, "s5b.scir").expect("fixture parses");
    let pipeline = scatha::pass::pipeline_for_opt_level(3);
    pipeline.run_to_fixpoint(&mut cx, &mut module, 32);

    let interp = Interp::new(&cx, &module);
    assert_eq!(interp.call("g", &[3, 7]), 4);
    assert_eq!(interp.call("g", &[10, 1]), -9);

    let func = module.find_function("g").expect("g is declared");
    let f = module.function(func);
    assert!(
        f.blocks_in_order().flat_map(|b| b.insts.iter()).all(|&id| !matches!(f.inst(id).opcode, Opcode::Neg)),
        "both negations should have folded away"
    );
}
