use std::fmt::Write;

use itertools::Itertools;

use super::{Context, Handle, IrError, TypeIndex};

/// A IR type, uniqued per context.
///
/// Composite types refer to their components by [`TypeIndex`], so two
/// structurally equal types always hash and compare equal once their
/// components are uniqued.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    Void,
    Int(IntTy),
    Float(FloatTy),
    /// An opaque pointer.
    Ptr,
    Function(FunctionType),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FunctionType {
    pub ret: TypeIndex,
    pub params: Vec<TypeIndex>,
    pub variadic: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum IntTy {
    I1,
    I8,
    I16,
    I32,
    I64,
    I128,
}

impl IntTy {
    pub fn bit_width(self) -> u32 {
        match self {
            IntTy::I1 => 1,
            IntTy::I8 => 8,
            IntTy::I16 => 16,
            IntTy::I32 => 32,
            IntTy::I64 => 64,
            IntTy::I128 => 128,
        }
    }

    /// Whether `value` can be stored in this type, read either as signed or
    /// as unsigned.
    pub fn fits(self, value: i128) -> bool {
        match self {
            IntTy::I128 => true,
            ty => {
                let bits = ty.bit_width();
                let min = -(1i128 << (bits - 1));
                let max = (1i128 << bits) - 1;
                (min..=max).contains(&value)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FloatTy {
    F32,
    F64,
}

impl Type {
    pub fn is_void(&self) -> bool {
        matches!(self, Type::Void)
    }

    pub fn is_int(&self) -> bool {
        matches!(self, Type::Int(_))
    }

    pub fn is_float(&self) -> bool {
        matches!(self, Type::Float(_))
    }

    /// Types a value can have: everything except `void` and function types.
    pub fn is_first_class(&self) -> bool {
        matches!(self, Type::Int(_) | Type::Float(_) | Type::Ptr)
    }

    pub fn as_function(&self) -> Option<&FunctionType> {
        match self {
            Type::Function(fn_ty) => Some(fn_ty),
            _ => None,
        }
    }
}

impl Context {
    fn intern_type(&mut self, ty: Type) -> TypeIndex {
        if let Some(idx) = self.type_cache.get(&ty) {
            return *idx;
        }

        let idx = Handle::new(self.id(), self.types.insert(ty.clone()));
        tracing::trace!("interned type {:?} as {:?}", ty, idx);
        self.type_cache.insert(ty, idx);
        idx
    }

    /// Get the `void` type.
    pub fn void_type(&mut self) -> TypeIndex {
        self.intern_type(Type::Void)
    }

    pub fn int_type(&mut self, ty: IntTy) -> TypeIndex {
        self.intern_type(Type::Int(ty))
    }

    pub fn float_type(&mut self, ty: FloatTy) -> TypeIndex {
        self.intern_type(Type::Float(ty))
    }

    pub fn ptr_type(&mut self) -> TypeIndex {
        self.intern_type(Type::Ptr)
    }

    /// Get the function type with the given signature.
    ///
    /// The return type must be `void` or a first-class type, parameters must
    /// be first-class types, and all of them must come from this context.
    pub fn function_type(
        &mut self,
        ret: TypeIndex,
        params: &[TypeIndex],
        variadic: bool,
    ) -> Result<TypeIndex, IrError> {
        let ret_ty = self.ty(ret)?;
        if !(ret_ty.is_void() || ret_ty.is_first_class()) {
            return Err(IrError::TypeMismatch {
                site: "function return type".to_string(),
                expected: "void or a first-class type".to_string(),
                found: self.type_name(ret),
            });
        }

        for (i, param) in params.iter().enumerate() {
            if !self.ty(*param)?.is_first_class() {
                return Err(IrError::TypeMismatch {
                    site: format!("function parameter {i}"),
                    expected: "a first-class type".to_string(),
                    found: self.type_name(*param),
                });
            }
        }

        Ok(self.intern_type(Type::Function(FunctionType {
            ret,
            params: params.to_vec(),
            variadic,
        })))
    }

    /// Writes the textual form of a type, e.g. `void (i32, ...)`.
    pub fn display_type(&self, ty: TypeIndex) -> Result<String, IrError> {
        let mut f = String::new();
        match self.ty(ty)? {
            Type::Void => f.push_str("void"),
            Type::Int(int_ty) => {
                let _ = write!(f, "i{}", int_ty.bit_width());
            }
            Type::Float(FloatTy::F32) => f.push_str("float"),
            Type::Float(FloatTy::F64) => f.push_str("double"),
            Type::Ptr => f.push_str("ptr"),
            Type::Function(fn_ty) => {
                let mut params: Vec<String> = fn_ty
                    .params
                    .iter()
                    .map(|param| self.display_type(*param))
                    .collect::<Result<_, _>>()?;
                if fn_ty.variadic {
                    params.push("...".to_string());
                }
                let _ = write!(
                    f,
                    "{} ({})",
                    self.display_type(fn_ty.ret)?,
                    params.iter().join(", ")
                );
            }
        }

        Ok(f)
    }

    /// Like [`Context::display_type`], but never fails. Used in diagnostics.
    pub fn type_name(&self, ty: TypeIndex) -> String {
        self.display_type(ty)
            .unwrap_or_else(|_| format!("<unresolved type {ty:?}>"))
    }
}
