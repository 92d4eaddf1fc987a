use std::collections::HashMap;

use super::{
    BasicBlock, BlockIndex, ConstIndex, Context, FnIndex, GlobalIndex, Handle, IrError,
    ModuleIndex, Type, TypeIndex, Value,
};

/// A compilation unit.
#[derive(Debug, Clone)]
pub struct Module {
    /// The name of the module.
    pub name: String,
    /// The source file this module was generated from, if set.
    pub source_file: Option<String>,
    /// Functions in declaration order.
    pub functions: Vec<FnIndex>,
    /// Globals in declaration order.
    pub globals: Vec<GlobalIndex>,
    /// Functions and globals share a single namespace.
    pub symbols: HashMap<String, Symbol>,
}

impl Module {
    /// The source file name, falling back to the module name when unset.
    pub fn source_name(&self) -> &str {
        self.source_file.as_deref().unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Symbol {
    Function(FnIndex),
    Global(GlobalIndex),
}

/// Whether a symbol is visible to the link stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Linkage {
    #[default]
    Exported,
    Internal,
}

#[derive(Debug, Clone)]
pub struct Function {
    /// The name of this function
    pub name: String,
    /// Always a [`Type::Function`].
    pub ty: TypeIndex,
    pub linkage: Linkage,
    pub module: ModuleIndex,
    /// Blocks in creation order. Empty for declarations.
    pub blocks: Vec<BlockIndex>,
}

impl Function {
    pub fn is_declaration(&self) -> bool {
        self.blocks.is_empty()
    }
}

/// Global data.
#[derive(Debug, Clone)]
pub struct Global {
    pub name: String,
    /// The type of the stored value.
    pub ty: TypeIndex,
    pub linkage: Linkage,
    pub module: ModuleIndex,
    /// A global without initializer is defined elsewhere.
    pub initializer: Option<ConstIndex>,
}

impl Context {
    pub fn create_module(&mut self, name: impl Into<String>) -> ModuleIndex {
        let name = name.into();
        tracing::debug!("creating module {:?}", name);
        let slot = self.modules.insert(Module {
            name,
            source_file: None,
            functions: Vec::new(),
            globals: Vec::new(),
            symbols: HashMap::new(),
        });
        Handle::new(self.id(), slot)
    }

    /// Records the source file the module comes from. Pure metadata.
    pub fn set_source_name(
        &mut self,
        module: ModuleIndex,
        name: impl Into<String>,
    ) -> Result<(), IrError> {
        self.module_mut(module)?.source_file = Some(name.into());
        Ok(())
    }

    pub fn get_function(
        &self,
        module: ModuleIndex,
        name: &str,
    ) -> Result<Option<FnIndex>, IrError> {
        Ok(match self.module(module)?.symbols.get(name) {
            Some(Symbol::Function(idx)) => Some(*idx),
            _ => None,
        })
    }

    /// Declares a function in `module`.
    ///
    /// Redeclaring a name with the same function type returns the existing
    /// function untouched, including its linkage. Redeclaring it with another
    /// type, or reusing the name of a global, is an error.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn declare_function(
        &mut self,
        module: ModuleIndex,
        name: &str,
        ty: TypeIndex,
        linkage: Linkage,
    ) -> Result<FnIndex, IrError> {
        let module_body = self.module(module)?;

        if self.ty(ty)?.as_function().is_none() {
            return Err(IrError::TypeMismatch {
                site: format!("declaration of function {name:?}"),
                expected: "a function type".to_string(),
                found: self.type_name(ty),
            });
        }

        match module_body.symbols.get(name) {
            Some(Symbol::Function(existing)) => {
                let existing_fn = self.function(*existing)?;
                if existing_fn.ty == ty {
                    tracing::debug!("function {:?} already declared with the same type", name);
                    return Ok(*existing);
                }
                return Err(IrError::DuplicateIncompatibleDeclaration {
                    module: module_body.name.clone(),
                    name: name.to_string(),
                    existing: self.type_name(existing_fn.ty),
                    requested: self.type_name(ty),
                });
            }
            Some(Symbol::Global(existing)) => {
                let existing_global = self.global(*existing)?;
                return Err(IrError::DuplicateIncompatibleDeclaration {
                    module: module_body.name.clone(),
                    name: name.to_string(),
                    existing: format!("global {}", self.type_name(existing_global.ty)),
                    requested: self.type_name(ty),
                });
            }
            None => {}
        }

        let slot = self.functions.insert(Function {
            name: name.to_string(),
            ty,
            linkage,
            module,
            blocks: Vec::new(),
        });
        let idx = Handle::new(self.id(), slot);

        let module_body = self.module_mut(module)?;
        module_body.functions.push(idx);
        module_body
            .symbols
            .insert(name.to_string(), Symbol::Function(idx));

        Ok(idx)
    }

    /// Adds a global variable to `module`.
    pub fn add_global(
        &mut self,
        module: ModuleIndex,
        name: &str,
        ty: TypeIndex,
        linkage: Linkage,
        initializer: Option<ConstIndex>,
    ) -> Result<GlobalIndex, IrError> {
        let module_body = self.module(module)?;

        if !self.ty(ty)?.is_first_class() {
            return Err(IrError::TypeMismatch {
                site: format!("global {name:?}"),
                expected: "a first-class type".to_string(),
                found: self.type_name(ty),
            });
        }

        if let Some(init) = initializer {
            let init_ty = self.constant(init)?.ty;
            if init_ty != ty {
                return Err(IrError::TypeMismatch {
                    site: format!("initializer of global {name:?}"),
                    expected: self.type_name(ty),
                    found: self.type_name(init_ty),
                });
            }
        }

        if let Some(symbol) = module_body.symbols.get(name) {
            let existing = match symbol {
                Symbol::Function(idx) => self.type_name(self.function(*idx)?.ty),
                Symbol::Global(idx) => format!("global {}", self.type_name(self.global(*idx)?.ty)),
            };
            return Err(IrError::DuplicateIncompatibleDeclaration {
                module: module_body.name.clone(),
                name: name.to_string(),
                existing,
                requested: format!("global {}", self.type_name(ty)),
            });
        }

        let slot = self.globals.insert(Global {
            name: name.to_string(),
            ty,
            linkage,
            module,
            initializer,
        });
        let idx = Handle::new(self.id(), slot);

        let module_body = self.module_mut(module)?;
        module_body.globals.push(idx);
        module_body
            .symbols
            .insert(name.to_string(), Symbol::Global(idx));

        Ok(idx)
    }

    /// Creates a block at the end of `function`.
    pub fn append_block(
        &mut self,
        function: FnIndex,
        label: Option<&str>,
    ) -> Result<BlockIndex, IrError> {
        self.function(function)?;

        let slot = self.blocks.insert(BasicBlock {
            label: label.map(str::to_string),
            function,
            instructions: Vec::new(),
        });
        let idx = Handle::new(self.id(), slot);
        self.function_mut(function)?.blocks.push(idx);

        Ok(idx)
    }

    /// The `index`-th parameter of `function`, as an operand.
    pub fn param(&self, function: FnIndex, index: usize) -> Result<Value, IrError> {
        let func = self.function(function)?;
        let count = match self.ty(func.ty)? {
            Type::Function(fn_ty) => fn_ty.params.len(),
            _ => 0,
        };

        if index >= count {
            return Err(IrError::ParamOutOfRange {
                function: func.name.clone(),
                index,
                count,
            });
        }

        Ok(Value::Param(function, index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::IntTy;

    #[test]
    fn source_name_defaults_to_module_name() {
        let mut ctx = Context::new();
        let module = ctx.create_module("uranium_module");

        assert_eq!(ctx.module(module).unwrap().source_name(), "uranium_module");

        ctx.set_source_name(module, "main.ura").unwrap();
        ctx.set_source_name(module, "main.ura").unwrap();
        assert_eq!(ctx.module(module).unwrap().source_name(), "main.ura");
        assert_eq!(ctx.module(module).unwrap().name, "uranium_module");
    }

    #[test]
    fn redeclaration_with_same_type_is_merged() {
        let mut ctx = Context::new();
        let module = ctx.create_module("m");
        let void = ctx.void_type();
        let fn_ty = ctx.function_type(void, &[], false).unwrap();

        let a = ctx
            .declare_function(module, "f", fn_ty, Linkage::Exported)
            .unwrap();
        let b = ctx
            .declare_function(module, "f", fn_ty, Linkage::Internal)
            .unwrap();

        assert_eq!(a, b);
        assert_eq!(ctx.module(module).unwrap().functions.len(), 1);
        assert_eq!(ctx.function(a).unwrap().linkage, Linkage::Exported);
    }

    #[test]
    fn declare_requires_function_type() {
        let mut ctx = Context::new();
        let module = ctx.create_module("m");
        let i32_ty = ctx.int_type(IntTy::I32);

        let error = ctx
            .declare_function(module, "f", i32_ty, Linkage::Exported)
            .unwrap_err();
        assert!(matches!(error, IrError::TypeMismatch { .. }), "{:#?}", error);
        assert!(ctx.module(module).unwrap().functions.is_empty());
    }

    #[test]
    fn globals_share_the_function_namespace() {
        let mut ctx = Context::new();
        let module = ctx.create_module("m");
        let void = ctx.void_type();
        let i32_ty = ctx.int_type(IntTy::I32);
        let fn_ty = ctx.function_type(void, &[], false).unwrap();
        let seven = ctx.const_int(i32_ty, 7).unwrap();

        ctx.add_global(module, "g", i32_ty, Linkage::Exported, Some(seven))
            .unwrap();

        let error = ctx
            .declare_function(module, "g", fn_ty, Linkage::Exported)
            .unwrap_err();
        assert!(
            matches!(
                &error,
                IrError::DuplicateIncompatibleDeclaration { existing, .. }
                    if existing == "global i32"
            ),
            "{:#?}",
            error
        );

        ctx.declare_function(module, "f", fn_ty, Linkage::Exported)
            .unwrap();
        assert!(matches!(
            ctx.add_global(module, "f", i32_ty, Linkage::Internal, None),
            Err(IrError::DuplicateIncompatibleDeclaration { .. })
        ));
        assert_eq!(ctx.module(module).unwrap().globals.len(), 1);
    }

    #[test]
    fn global_initializer_must_match() {
        let mut ctx = Context::new();
        let module = ctx.create_module("m");
        let i32_ty = ctx.int_type(IntTy::I32);
        let i64_ty = ctx.int_type(IntTy::I64);
        let seven = ctx.const_int(i64_ty, 7).unwrap();

        assert!(matches!(
            ctx.add_global(module, "g", i32_ty, Linkage::Exported, Some(seven)),
            Err(IrError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn blocks_keep_creation_order() {
        let mut ctx = Context::new();
        let module = ctx.create_module("m");
        let void = ctx.void_type();
        let fn_ty = ctx.function_type(void, &[], false).unwrap();
        let f = ctx
            .declare_function(module, "f", fn_ty, Linkage::Exported)
            .unwrap();

        assert!(ctx.function(f).unwrap().is_declaration());

        let exit = ctx.append_block(f, Some("exit")).unwrap();
        let entry = ctx.append_block(f, Some("entry")).unwrap();
        let anonymous = ctx.append_block(f, None).unwrap();

        assert_eq!(ctx.function(f).unwrap().blocks, vec![exit, entry, anonymous]);
        assert_eq!(ctx.block(anonymous).unwrap().label, None);
        assert_eq!(ctx.block(entry).unwrap().function, f);
    }

    #[test]
    fn params_are_bounds_checked() {
        let mut ctx = Context::new();
        let module = ctx.create_module("m");
        let i32_ty = ctx.int_type(IntTy::I32);
        let fn_ty = ctx.function_type(i32_ty, &[i32_ty], false).unwrap();
        let f = ctx
            .declare_function(module, "id", fn_ty, Linkage::Internal)
            .unwrap();

        assert_eq!(ctx.param(f, 0).unwrap(), Value::Param(f, 0));
        assert!(matches!(
            ctx.param(f, 1),
            Err(IrError::ParamOutOfRange { index: 1, count: 1, .. })
        ));
    }
}
