//! Modules (§3 "Module") and the module-level use/def graph (§3 "Use
//! graph").

use indexmap::IndexMap;

use crate::common::fx_hash::{FxHashMap, FxHashSet};
use crate::ir::function::{FuncId, Function, InstId};
use crate::ir::types::TypeId;
use crate::ir::value::{ConstId, ValueRef};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GlobalId(pub(crate) u32);

impl GlobalId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mutability {
    Constant,
    Mutable,
}

#[derive(Debug, Clone)]
pub struct GlobalVariable {
    pub id: GlobalId,
    pub name: String,
    pub ty: TypeId,
    pub mutability: Mutability,
    pub initializer: ConstId,
}

/// Ordered collection of global objects (§3 "Module"). Owns its functions;
/// the use/def table lives here (not on `Function`) because calls and
/// global references cross function boundaries.
///
/// Functions and globals are each kept in one name-keyed `IndexMap`: a
/// `FuncId`/`GlobalId` is that entry's index, so lookup by id is the map's
/// O(1) `get_index`, lookup by name is its O(1) `get_index_of`, and
/// iteration in declaration order falls out of insertion order — no
/// separate order vector or name table to keep in sync.
#[derive(Debug, Default)]
pub struct Module {
    pub name: String,
    functions: IndexMap<String, Function>,
    globals: IndexMap<String, GlobalVariable>,
    /// For every value, the set of instructions (fully qualified) that use
    /// it as an operand. Invariant (§3, testable property 1/2):
    /// `I in uses(v)` iff `v in operands(I)`.
    uses: FxHashMap<ValueRef, FxHashSet<(FuncId, InstId)>>,
}

impl Module {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn declare_function(
        &mut self,
        name: impl Into<String>,
        ret_ty: TypeId,
        params: Vec<crate::ir::function::Param>,
        is_foreign: bool,
    ) -> FuncId {
        let name = name.into();
        if let Some(idx) = self.functions.get_index_of(&name) {
            return FuncId(idx as u32);
        }
        let id = FuncId(self.functions.len() as u32);
        let mut f = Function::new(id, name.clone(), ret_ty, params);
        f.is_foreign = is_foreign;
        self.functions.insert(name, f);
        id
    }

    pub fn declare_global(
        &mut self,
        name: impl Into<String>,
        ty: TypeId,
        mutability: Mutability,
        initializer: ConstId,
    ) -> GlobalId {
        let name = name.into();
        let id = self
            .globals
            .get_index_of(&name)
            .map(|idx| GlobalId(idx as u32))
            .unwrap_or(GlobalId(self.globals.len() as u32));
        self.globals.insert(name.clone(), GlobalVariable { id, name, ty, mutability, initializer });
        id
    }

    pub fn function(&self, id: FuncId) -> &Function {
        self.functions.get_index(id.index()).map(|(_, f)| f).expect("dangling FuncId")
    }

    pub fn function_mut(&mut self, id: FuncId) -> &mut Function {
        self.functions.get_index_mut(id.index()).map(|(_, f)| f).expect("dangling FuncId")
    }

    pub fn global(&self, id: GlobalId) -> &GlobalVariable {
        self.globals.get_index(id.index()).map(|(_, g)| g).expect("dangling GlobalId")
    }

    pub fn find_function(&self, name: &str) -> Option<FuncId> {
        self.functions.get_index_of(name).map(|idx| FuncId(idx as u32))
    }

    pub fn find_global(&self, name: &str) -> Option<GlobalId> {
        self.globals.get_index_of(name).map(|idx| GlobalId(idx as u32))
    }

    pub fn functions(&self) -> impl Iterator<Item = &Function> {
        self.functions.values()
    }

    pub fn function_ids(&self) -> impl Iterator<Item = FuncId> + '_ {
        (0..self.functions.len() as u32).map(FuncId)
    }

    pub fn globals(&self) -> impl Iterator<Item = &GlobalVariable> {
        self.globals.values()
    }

    // -- use/def table -----------------------------------------------------

    pub fn uses_of(&self, v: ValueRef) -> impl Iterator<Item = (FuncId, InstId)> + '_ {
        self.uses.get(&v).into_iter().flatten().copied()
    }

    pub fn use_count(&self, v: ValueRef) -> usize {
        self.uses.get(&v).map_or(0, |s| s.len())
    }

    pub(crate) fn add_use(&mut self, v: ValueRef, user: (FuncId, InstId)) {
        self.uses.entry(v).or_default().insert(user);
    }

    pub(crate) fn remove_use(&mut self, v: ValueRef, user: (FuncId, InstId)) {
        if let Some(set) = self.uses.get_mut(&v) {
            set.remove(&user);
            if set.is_empty() {
                self.uses.remove(&v);
            }
        }
    }

    /// Snapshot of the current user set for `v`; must be used (rather than
    /// iterating `uses_of` live) whenever the loop body may itself mutate
    /// the use set, e.g. replace-all-uses-with (§3 "Use graph", §5
    /// "Resource discipline").
    pub fn snapshot_uses(&self, v: ValueRef) -> Vec<(FuncId, InstId)> {
        self.uses_of(v).collect()
    }
}
