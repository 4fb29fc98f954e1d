//! Machine IR (§3 "MIR Module / Function", §4.6-§4.9): the parallel,
//! mostly-two-address hierarchy that [`crate::isel`] lowers IR into,
//! [`crate::ssadestruct`] destroys SSA form on, [`crate::regalloc`] colors,
//! and [`crate::asm`] linearizes to bytes.

pub mod function;
pub mod instruction;
pub mod live_interval;
pub mod liveness;
pub mod module;
pub mod printer;
pub mod register;
