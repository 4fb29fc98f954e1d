//! The SSA intermediate representation (§3, §4.1-§4.2): context/interning,
//! the type system, the module/function/block/instruction CFG hierarchy,
//! the builder that keeps use/def and CFG edges consistent, and the
//! textual format (§6 "IR textual format") in both directions.

pub mod builder;
pub mod context;
pub mod function;
pub mod instruction;
pub mod module;
pub mod parser;
pub mod printer;
pub mod types;
pub mod value;
