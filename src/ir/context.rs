use std::collections::HashMap;

use educe::Educe;
use typed_generational_arena::SmallSlab;

use super::{
    BasicBlock, BlockIndex, ConstIndex, ContextId, FnIndex, Function, Global, GlobalIndex, Handle,
    IrError, Module, ModuleIndex, Type, TypeIndex,
};

/// The isolation domain of the IR.
///
/// A context owns every type, constant, module, function, block and global
/// created through it. Nothing here is shared between contexts: handles carry
/// the id of the context that minted them and are rejected anywhere else.
/// Dropping the context releases everything at once; handles that outlive it
/// can't resolve against any other context.
#[derive(Educe)]
#[educe(Debug)]
pub struct Context {
    id: ContextId,
    pub(crate) types: SmallSlab<Type>,
    pub(crate) constants: SmallSlab<Constant>,
    pub(crate) modules: SmallSlab<Module>,
    pub(crate) functions: SmallSlab<Function>,
    pub(crate) blocks: SmallSlab<BasicBlock>,
    pub(crate) globals: SmallSlab<Global>,
    #[educe(Debug(ignore))]
    pub(crate) type_cache: HashMap<Type, TypeIndex>,
    #[educe(Debug(ignore))]
    pub(crate) const_cache: HashMap<Constant, ConstIndex>,
}

/// Constant data, uniqued per context.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Constant {
    pub ty: TypeIndex,
    pub value: ConstValue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConstValue {
    Int(i128),
    /// The bit pattern of a `f64`, so constants stay hashable.
    Float(u64),
}

impl ConstValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ConstValue::Float(bits) => Some(f64::from_bits(*bits)),
            ConstValue::Int(_) => None,
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl Context {
    pub fn new() -> Self {
        let id = ContextId::fresh();
        tracing::debug!("created context {}", id);
        Self {
            id,
            types: SmallSlab::new(),
            constants: SmallSlab::new(),
            modules: SmallSlab::new(),
            functions: SmallSlab::new(),
            blocks: SmallSlab::new(),
            globals: SmallSlab::new(),
            type_cache: HashMap::new(),
            const_cache: HashMap::new(),
        }
    }

    pub fn id(&self) -> ContextId {
        self.id
    }

    /// Releases the context and everything it owns.
    ///
    /// Equivalent to dropping it, but makes the end of the scope explicit at
    /// call sites.
    pub fn dispose(self) {
        tracing::debug!(
            "disposing context {} ({} modules, {} functions, {} types)",
            self.id,
            self.modules.len(),
            self.functions.len(),
            self.types.len()
        );
    }

    /// Whether `handle` was created by this context.
    pub fn owns<T>(&self, handle: Handle<T>) -> bool {
        handle.context() == self.id
    }

    pub(crate) fn check_owned<T>(
        &self,
        handle: Handle<T>,
        what: &'static str,
    ) -> Result<(), IrError> {
        if self.owns(handle) {
            Ok(())
        } else {
            Err(IrError::CrossContextReference {
                what,
                expected: self.id,
                found: handle.context(),
            })
        }
    }

    pub fn ty(&self, idx: TypeIndex) -> Result<&Type, IrError> {
        lookup(self.id, &self.types, idx, "type")
    }

    pub fn constant(&self, idx: ConstIndex) -> Result<&Constant, IrError> {
        lookup(self.id, &self.constants, idx, "constant")
    }

    pub fn module(&self, idx: ModuleIndex) -> Result<&Module, IrError> {
        lookup(self.id, &self.modules, idx, "module")
    }

    pub fn function(&self, idx: FnIndex) -> Result<&Function, IrError> {
        lookup(self.id, &self.functions, idx, "function")
    }

    pub fn block(&self, idx: BlockIndex) -> Result<&BasicBlock, IrError> {
        lookup(self.id, &self.blocks, idx, "basic block")
    }

    pub fn global(&self, idx: GlobalIndex) -> Result<&Global, IrError> {
        lookup(self.id, &self.globals, idx, "global")
    }

    pub(crate) fn module_mut(&mut self, idx: ModuleIndex) -> Result<&mut Module, IrError> {
        lookup_mut(self.id, &mut self.modules, idx, "module")
    }

    pub(crate) fn function_mut(&mut self, idx: FnIndex) -> Result<&mut Function, IrError> {
        lookup_mut(self.id, &mut self.functions, idx, "function")
    }

    pub(crate) fn block_mut(&mut self, idx: BlockIndex) -> Result<&mut BasicBlock, IrError> {
        lookup_mut(self.id, &mut self.blocks, idx, "basic block")
    }

    /// Get the integer constant `value` of type `ty`.
    pub fn const_int(&mut self, ty: TypeIndex, value: i128) -> Result<ConstIndex, IrError> {
        match self.ty(ty)? {
            Type::Int(int_ty) if int_ty.fits(value) => {}
            Type::Int(_) => {
                return Err(IrError::TypeMismatch {
                    site: format!("integer constant {value}"),
                    expected: format!("a value that fits in {}", self.type_name(ty)),
                    found: "an out of range value".to_string(),
                });
            }
            _ => {
                return Err(IrError::TypeMismatch {
                    site: format!("integer constant {value}"),
                    expected: "an integer type".to_string(),
                    found: self.type_name(ty),
                });
            }
        }

        Ok(self.intern_constant(Constant {
            ty,
            value: ConstValue::Int(value),
        }))
    }

    /// Get the floating point constant `value` of type `ty`.
    pub fn const_float(&mut self, ty: TypeIndex, value: f64) -> Result<ConstIndex, IrError> {
        if !self.ty(ty)?.is_float() {
            return Err(IrError::TypeMismatch {
                site: format!("float constant {value}"),
                expected: "a floating point type".to_string(),
                found: self.type_name(ty),
            });
        }

        Ok(self.intern_constant(Constant {
            ty,
            value: ConstValue::Float(value.to_bits()),
        }))
    }

    fn intern_constant(&mut self, constant: Constant) -> ConstIndex {
        if let Some(idx) = self.const_cache.get(&constant) {
            return *idx;
        }

        let idx = Handle::new(self.id, self.constants.insert(constant.clone()));
        self.const_cache.insert(constant, idx);
        idx
    }
}

fn lookup<'a, T>(
    id: ContextId,
    arena: &'a SmallSlab<T>,
    idx: Handle<T>,
    what: &'static str,
) -> Result<&'a T, IrError> {
    if idx.context() != id {
        return Err(IrError::CrossContextReference {
            what,
            expected: id,
            found: idx.context(),
        });
    }

    arena
        .get(idx.slot())
        .ok_or(IrError::InvalidReference { what, context: id })
}

fn lookup_mut<'a, T>(
    id: ContextId,
    arena: &'a mut SmallSlab<T>,
    idx: Handle<T>,
    what: &'static str,
) -> Result<&'a mut T, IrError> {
    if idx.context() != id {
        return Err(IrError::CrossContextReference {
            what,
            expected: id,
            found: idx.context(),
        });
    }

    arena
        .get_mut(idx.slot())
        .ok_or(IrError::InvalidReference { what, context: id })
}
