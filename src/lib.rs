// Several lowering/allocation paths keep fields that are read only by
// printers or by later pipeline stages not every test exercises.
#![allow(dead_code, unused_variables, unused_imports, unreachable_patterns)]

pub mod common;
pub mod ir;
pub mod analysis;
pub mod mir;
pub mod pass;
pub mod opt;
pub mod isel;
pub mod ssadestruct;
pub mod regalloc;
pub mod asm;
pub mod invocation;
