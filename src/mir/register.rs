//! MIR register pools (§3 "MIR Module / Function", "Register phase").
//!
//! A function owns four register pools; a [`RegisterId`] is a pool tag plus
//! an index local to that pool. "Fixed" registers have ABI meaning (e.g. the
//! argument/return-value slots) and may never be renamed by allocation.

use crate::common::fx_hash::FxHashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RegisterPool {
    /// One register per IR SSA value, before SSA destruction.
    Ssa,
    /// One register per value after SSA destruction, before allocation.
    Virtual,
    /// Locations in a called frame, materialized during SSA destruction for
    /// non-tail calls.
    Callee,
    /// Physical machine registers, assigned by register allocation.
    Hardware,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegisterId {
    pub pool: RegisterPool,
    pub index: u32,
}

impl RegisterId {
    pub fn new(pool: RegisterPool, index: u32) -> Self {
        Self { pool, index }
    }
}

/// Per-function gate on which operations are legal (§3 "Register phase").
/// Transitions are monotonic: Ssa -> Virtual -> Hardware, never backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RegisterPhase {
    Ssa,
    Virtual,
    Hardware,
}

impl RegisterPhase {
    /// Panics (an invariant violation per §7 "Invariant violations ... abort
    /// the process") if `next` would move the phase backwards.
    pub fn advance_to(&mut self, next: RegisterPhase) {
        assert!(next >= *self, "register phase must advance monotonically");
        *self = next;
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RegisterData {
    pub index: u32,
    pub fixed: bool,
    pub byte_width: u32,
}

/// Owns one function's four register pools (§3 "Ownership summary":
/// "Function owns basic blocks and register pools").
#[derive(Debug, Clone, Default)]
pub struct RegisterFile {
    ssa: Vec<RegisterData>,
    virt: Vec<RegisterData>,
    callee: Vec<RegisterData>,
    hardware: Vec<RegisterData>,
    /// Maps a hardware color index back to how many distinct colors are in
    /// use; populated once register allocation finishes (§4.8.3).
    pub hardware_bank_size: u32,
}

impl RegisterFile {
    pub fn new() -> Self {
        Self::default()
    }

    fn pool_mut(&mut self, pool: RegisterPool) -> &mut Vec<RegisterData> {
        match pool {
            RegisterPool::Ssa => &mut self.ssa,
            RegisterPool::Virtual => &mut self.virt,
            RegisterPool::Callee => &mut self.callee,
            RegisterPool::Hardware => &mut self.hardware,
        }
    }

    pub fn pool(&self, pool: RegisterPool) -> &[RegisterData] {
        match pool {
            RegisterPool::Ssa => &self.ssa,
            RegisterPool::Virtual => &self.virt,
            RegisterPool::Callee => &self.callee,
            RegisterPool::Hardware => &self.hardware,
        }
    }

    pub fn alloc(&mut self, pool: RegisterPool, byte_width: u32, fixed: bool) -> RegisterId {
        let bucket = self.pool_mut(pool);
        let index = bucket.len() as u32;
        bucket.push(RegisterData { index, fixed, byte_width });
        RegisterId::new(pool, index)
    }

    pub fn is_fixed(&self, r: RegisterId) -> bool {
        self.pool(r.pool)[r.index as usize].fixed
    }

    pub fn byte_width(&self, r: RegisterId) -> u32 {
        self.pool(r.pool)[r.index as usize].byte_width
    }

    pub fn count(&self, pool: RegisterPool) -> usize {
        self.pool(pool).len()
    }

    pub fn mark_fixed(&mut self, r: RegisterId) {
        self.pool_mut(r.pool)[r.index as usize].fixed = true;
    }
}

/// A mapping from one pool's registers to another, used when SSA
/// destruction retires the SSA pool in favor of the virtual pool, and again
/// when register allocation retires the virtual pool in favor of hardware.
#[derive(Debug, Clone, Default)]
pub struct RegisterRenaming(pub FxHashMap<RegisterId, RegisterId>);

impl RegisterRenaming {
    pub fn get(&self, r: RegisterId) -> RegisterId {
        self.0.get(&r).copied().unwrap_or(r)
    }

    pub fn insert(&mut self, from: RegisterId, to: RegisterId) {
        self.0.insert(from, to);
    }
}
