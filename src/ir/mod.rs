//! The Uranium IR.
//!
//! Everything is owned by a [`Context`]: types, constants, modules, functions,
//! basic blocks and globals live in flat arenas inside it, and the rest of the
//! program refers to them through small `Copy` handles. Each handle remembers
//! which context minted it, so using it with another context is reported as an
//! [`IrError::CrossContextReference`] instead of silently reading foreign data.
//!
//! Instructions are appended through a [`Builder`], which is a relocatable
//! cursor over a block and never owns anything.

use std::{
    fmt,
    hash::{Hash, Hasher},
    sync::atomic::{AtomicU64, Ordering},
};

use typed_generational_arena::SmallSlabIndex;

mod block;
mod builder;
mod context;
mod errors;
mod module;
mod types;
pub mod verify;

pub use block::{BasicBlock, BinOp, InstIndex, Instruction, InstructionKind, Value};
pub use builder::Builder;
pub use context::{ConstValue, Constant, Context};
pub use errors::IrError;
pub use module::{Function, Global, Linkage, Module, Symbol};
pub use types::{FloatTy, FunctionType, IntTy, Type};

pub type TypeIndex = Handle<Type>;
pub type ConstIndex = Handle<Constant>;
pub type ModuleIndex = Handle<Module>;
pub type FnIndex = Handle<Function>;
pub type BlockIndex = Handle<BasicBlock>;
pub type GlobalIndex = Handle<Global>;

/// Identifies one [`Context`] for the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContextId(u64);

impl ContextId {
    pub(crate) fn fresh() -> Self {
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);
        Self(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A non-owning reference to an entity stored in a [`Context`].
pub struct Handle<T> {
    context: ContextId,
    slot: SmallSlabIndex<T>,
}

impl<T> Handle<T> {
    pub(crate) fn new(context: ContextId, slot: SmallSlabIndex<T>) -> Self {
        Self { context, slot }
    }

    /// The context this handle was created by.
    pub fn context(&self) -> ContextId {
        self.context
    }

    pub(crate) fn slot(&self) -> SmallSlabIndex<T> {
        self.slot
    }
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.context == other.context && self.slot == other.slot
    }
}

impl<T> Eq for Handle<T> {}

impl<T> Hash for Handle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.context.hash(state);
        self.slot.hash(state);
    }
}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.context, self.slot.to_idx())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_print_their_context() {
        let mut ctx = Context::new();
        ctx.void_type();
        let ptr = ctx.ptr_type();

        assert_eq!(format!("{:?}", ptr), format!("{}:1", ctx.id()));
        assert_eq!(ptr.context(), ctx.id());
    }
}
