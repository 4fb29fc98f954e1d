//! MIR-level module (§3 "MIR Module / Function"): parallel hierarchy to
//! [`crate::ir::module::Module`], produced by [`crate::isel`].

use crate::ir::function::FuncId;
use crate::mir::function::MirFunction;

#[derive(Debug, Default)]
pub struct MirModule {
    pub name: String,
    functions: Vec<Option<MirFunction>>,
    order: Vec<FuncId>,
}

impl MirModule {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Default::default() }
    }

    pub fn push(&mut self, func: MirFunction) -> FuncId {
        let id = func.ir_func;
        let idx = id.index();
        if self.functions.len() <= idx {
            self.functions.resize_with(idx + 1, || None);
        }
        self.functions[idx] = Some(func);
        self.order.push(id);
        id
    }

    pub fn function(&self, id: FuncId) -> &MirFunction {
        self.functions[id.index()].as_ref().expect("dangling FuncId")
    }

    pub fn function_mut(&mut self, id: FuncId) -> &mut MirFunction {
        self.functions[id.index()].as_mut().expect("dangling FuncId")
    }

    pub fn functions(&self) -> impl Iterator<Item = &MirFunction> {
        self.order.iter().map(move |id| self.function(*id))
    }

    pub fn functions_mut(&mut self) -> impl Iterator<Item = &mut MirFunction> {
        let order = self.order.clone();
        self.functions.iter_mut().filter_map(|o| o.as_mut())
    }

    pub fn function_ids(&self) -> impl Iterator<Item = FuncId> + '_ {
        self.order.iter().copied()
    }
}
