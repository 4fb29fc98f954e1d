//! Scenario S2: a counting loop with a nested break. The oracle checks both
//! the normal-completion and early-break paths; the structural check then
//! runs loop rotation directly and asserts the header's trip-count test got
//! cloned into the preheader, shrinking the header phi to a single
//! incoming edge (the same invariant `loop_rotate`'s own unit test checks).

mod support;

use scatha::ir::instruction::Opcode;
use scatha::pass::for_each_function;
use support::interp::Interp;

const SOURCE: &str = r#"
func i32 @testFn(i32 %0) {
entry:
  goto void header
header:
  %i = phi i32 [i32 0, entry], [%i1, latch]
  %inloop = icmp ult i1 %i, %0
  branch void %inloop, body, done
body:
  %over = icmp uge i1 %i, i32 50
  branch void %over, brk, cont
brk:
  goto void done
cont:
  %i1 = add i32 %i, i32 1
  goto void latch
latch:
  goto void header
done:
  %broke = icmp uge i1 %i, i32 50
  %result = select i32 %broke, i32 0, %0
  return i32 %result
}
"#;

#[test]
fn the_interpreter_matches_both_the_completed_and_broken_paths() {
    let (cx, module) = scatha::ir::parser::parse_module(SOURCE, "s2.scir").expect("fixture parses");
    let interp = Interp::new(&cx, &module);
    assert_eq!(interp.call("testFn", &[42]), 42);
    assert_eq!(interp.call("testFn", &[100]), 0);
}

#[test]
fn loop_rotation_clones_the_trip_count_test_into_the_preheader() {
    let (mut cx, mut module) = scatha::ir::parser::parse_module(SOURCE, "s2.scir").expect("fixture parses");
    let func = module.find_function("testFn").expect("testFn is declared");

    let changed = for_each_function(&mut cx, &mut module, &scatha::opt::loop_rotate::LoopRotate);
    assert!(changed, "the header is a pure trip-count test and should rotate");

    let f = module.function(func);
    let entry = f.entry().expect("function has an entry block");
    let entry_has_branch = f.block(entry).insts.iter().any(|&id| matches!(f.inst(id).opcode, Opcode::Branch));
    assert!(entry_has_branch, "the preheader should now end in the cloned trip-count branch");

    let header = f.blocks_in_order().find(|b| b.name == "header").map(|b| b.id).expect("header block still exists");
    let phi_id = f.block(header).insts[0];
    let Opcode::Phi { incoming } = &f.inst(phi_id).opcode else { panic!("first header instruction should still be the phi") };
    assert_eq!(incoming.len(), 1, "rotation should have dropped the preheader's incoming slot");
}
