//! Scenario S1: a tail-recursive `gcd`, end to end. The reference
//! interpreter gives the expected result on the unoptimized module; the
//! real pipeline is then checked to have actually converted the recursive
//! call into a `tailcall` terminator, not just computed the right answer.

mod support;

use scatha::isel::TargetInfo;
use scatha::mir::instruction::{CallShape, MirOpcode};
use support::interp::Interp;

const SOURCE: &str = r#"
func i32 @gcd(i32 %0, i32 %1) {
entry:
  %iszero = icmp eq i1 %1, i32 0
  branch void %iszero, base, rec
base:
  return i32 %0
rec:
  %r = srem i32 %0, %1
  %call = call i32 @gcd, %1, %r
  return i32 %call
}
"#;

#[test]
fn the_interpreter_computes_the_expected_gcd() {
    let (cx, module) = scatha::ir::parser::parse_module(SOURCE, "s1.scir").expect("fixture parses");
    let interp = Interp::new(&cx, &module);
    assert_eq!(interp.call("gcd", &[54, 24]), 6);
    assert_eq!(interp.call("gcd", &[17, 5]), 1);
    assert_eq!(interp.call("gcd", &[0, 9]), 9);
}

#[test]
fn ssa_destruction_collapses_the_recursive_call_into_a_tailcall() {
    let (mut cx, mut module) = scatha::ir::parser::parse_module(SOURCE, "s1.scir").expect("fixture parses");
    let pipeline = scatha::pass::pipeline_for_opt_level(3);
    pipeline.run_to_fixpoint(&mut cx, &mut module, 32);

    let target = TargetInfo::default();
    let mut mir = scatha::isel::lower_module(&cx, &module, &target);
    let func = module.find_function("gcd").expect("gcd is declared");
    let mf = mir.function_mut(func);
    scatha::ssadestruct::destroy_ssa(mf);

    let has_direct_tailcall =
        mf.all_insts().any(|(_, inst)| matches!(inst.opcode, MirOpcode::TailCall { shape: CallShape::Direct }));
    assert!(has_direct_tailcall, "the recursive call should have become a direct tail call");

    let has_ordinary_call = mf.all_insts().any(|(_, inst)| matches!(inst.opcode, MirOpcode::Call { .. }));
    assert!(!has_ordinary_call, "the recursive call site should not remain an ordinary call once tail-called");
}
