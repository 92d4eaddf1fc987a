//! Lowering of a finished module to LLVM, through the C API.
//!
//! Only modules that pass [`verify_module`] are lowered: the IR is translated
//! one to one, LLVM's own verifier runs on the result, and the module can
//! then be printed as LLVM assembly or written out as bitcode.

use std::{
    collections::HashMap,
    ffi::{CStr, CString, c_char},
    path::Path,
    ptr::null_mut,
};

use llvm_sys::{
    LLVMLinkage,
    analysis::{LLVMVerifierFailureAction, LLVMVerifyModule},
    bit_writer::LLVMWriteBitcodeToFile,
    core::{
        LLVMAddFunction, LLVMAddGlobal, LLVMAppendBasicBlockInContext, LLVMBuildAdd, LLVMBuildBr,
        LLVMBuildMul, LLVMBuildRet, LLVMBuildRetVoid, LLVMBuildSub, LLVMBuildUnreachable,
        LLVMConstInt, LLVMConstIntOfArbitraryPrecision, LLVMConstReal, LLVMContextCreate,
        LLVMContextDispose, LLVMCreateBuilderInContext, LLVMDisposeBuilder, LLVMDisposeMessage,
        LLVMDisposeModule, LLVMDoubleTypeInContext, LLVMFloatTypeInContext, LLVMFunctionType,
        LLVMGetParam, LLVMIntTypeInContext, LLVMModuleCreateWithNameInContext,
        LLVMPointerTypeInContext, LLVMPositionBuilderAtEnd, LLVMPrintModuleToString,
        LLVMSetInitializer, LLVMSetLinkage, LLVMSetSourceFileName, LLVMVoidTypeInContext,
    },
    prelude::{
        LLVMBasicBlockRef, LLVMBuilderRef, LLVMContextRef, LLVMModuleRef, LLVMTypeRef,
        LLVMValueRef,
    },
};

use crate::ir::{
    BinOp, BlockIndex, ConstIndex, ConstValue, Context, FloatTy, FnIndex, Function, GlobalIndex,
    InstIndex, InstructionKind, Linkage, ModuleIndex, Type, TypeIndex, Value,
    verify::verify_module,
};

pub use errors::CodegenError;

pub mod errors;

/// An LLVM module together with the LLVM context that owns it.
#[derive(Debug)]
pub struct LlvmModule {
    context: LLVMContextRef,
    module: LLVMModuleRef,
}

impl Drop for LlvmModule {
    fn drop(&mut self) {
        unsafe {
            LLVMDisposeModule(self.module);
            LLVMContextDispose(self.context);
        }
    }
}

impl LlvmModule {
    /// Lowers `module` into a fresh LLVM context.
    #[tracing::instrument(level = "debug", skip(ctx))]
    pub fn lower(ctx: &Context, module: ModuleIndex) -> Result<Self, CodegenError> {
        verify_module(ctx, module).map_err(CodegenError::Malformed)?;

        let module_body = ctx.module(module)?;
        let name = CString::new(module_body.name.as_str())?;
        let source_name = module_body.source_name();

        let llvm_module = unsafe {
            let context = LLVMContextCreate();
            let module = LLVMModuleCreateWithNameInContext(name.as_ptr(), context);
            LLVMSetSourceFileName(module, source_name.as_ptr().cast(), source_name.len());
            Self { context, module }
        };

        let mut lowering = Lowering {
            ctx,
            context: llvm_module.context,
            module: llvm_module.module,
            functions: HashMap::new(),
        };

        for global in &module_body.globals {
            lowering.lower_global(*global)?;
        }
        for function in &module_body.functions {
            lowering.declare_function(*function)?;
        }
        for function in &module_body.functions {
            lowering.define_function(*function)?;
        }

        llvm_module.verify()?;
        tracing::debug!("lowered module {:?} to llvm", module_body.name);

        Ok(llvm_module)
    }

    fn verify(&self) -> Result<(), CodegenError> {
        let mut message = null_mut();
        let failed = unsafe {
            LLVMVerifyModule(
                self.module,
                LLVMVerifierFailureAction::LLVMReturnStatusAction,
                &mut message,
            )
        };
        let message = unsafe { take_message(message) };

        if failed != 0 {
            tracing::error!("llvm verifier failed: {}", message);
            return Err(CodegenError::LLVMCompileError(message));
        }

        Ok(())
    }

    /// The module as LLVM assembly.
    pub fn to_ir_string(&self) -> String {
        unsafe { take_message(LLVMPrintModuleToString(self.module)) }
    }

    /// Writes the module as LLVM bitcode.
    pub fn write_bitcode(&self, path: &Path) -> Result<(), CodegenError> {
        let filename = CString::new(path.as_os_str().to_string_lossy().as_bytes())?;
        tracing::debug!("writing bitcode to {:?}", filename);

        if unsafe { LLVMWriteBitcodeToFile(self.module, filename.as_ptr()) } != 0 {
            return Err(CodegenError::LLVMCompileError(format!(
                "failed to write bitcode to {}",
                path.display()
            )));
        }

        Ok(())
    }
}

/// Copies and frees a message allocated by LLVM.
///
/// # Safety
/// `message` must be null or a string returned by LLVM that is not used
/// afterwards.
unsafe fn take_message(message: *mut c_char) -> String {
    if message.is_null() {
        return String::new();
    }

    unsafe {
        let text = CStr::from_ptr(message).to_string_lossy().into_owned();
        LLVMDisposeMessage(message);
        text
    }
}

struct Lowering<'a> {
    ctx: &'a Context,
    context: LLVMContextRef,
    module: LLVMModuleRef,
    functions: HashMap<FnIndex, LLVMValueRef>,
}

impl Lowering<'_> {
    fn lower_type(&self, ty: TypeIndex) -> Result<LLVMTypeRef, CodegenError> {
        Ok(match self.ctx.ty(ty)? {
            Type::Void => unsafe { LLVMVoidTypeInContext(self.context) },
            Type::Int(int_ty) => unsafe { LLVMIntTypeInContext(self.context, int_ty.bit_width()) },
            Type::Float(FloatTy::F32) => unsafe { LLVMFloatTypeInContext(self.context) },
            Type::Float(FloatTy::F64) => unsafe { LLVMDoubleTypeInContext(self.context) },
            Type::Ptr => unsafe { LLVMPointerTypeInContext(self.context, 0) },
            Type::Function(fn_ty) => {
                let ret = self.lower_type(fn_ty.ret)?;
                let mut params = fn_ty
                    .params
                    .iter()
                    .map(|param| self.lower_type(*param))
                    .collect::<Result<Vec<_>, _>>()?;
                unsafe {
                    LLVMFunctionType(
                        ret,
                        params.as_mut_ptr(),
                        params.len() as u32,
                        fn_ty.variadic as i32,
                    )
                }
            }
        })
    }

    fn lower_const(&self, idx: ConstIndex) -> Result<LLVMValueRef, CodegenError> {
        let constant = self.ctx.constant(idx)?;
        let ty = self.lower_type(constant.ty)?;

        Ok(match constant.value {
            ConstValue::Int(value) => match i64::try_from(value) {
                Ok(small) => unsafe { LLVMConstInt(ty, small as u64, 1) },
                Err(_) => {
                    let words = [value as u64, (value >> 64) as u64];
                    unsafe { LLVMConstIntOfArbitraryPrecision(ty, 2, words.as_ptr()) }
                }
            },
            ConstValue::Float(bits) => unsafe { LLVMConstReal(ty, f64::from_bits(bits)) },
        })
    }

    fn lower_global(&mut self, idx: GlobalIndex) -> Result<(), CodegenError> {
        let global = self.ctx.global(idx)?;
        let name = CString::new(global.name.as_str())?;
        let ty = self.lower_type(global.ty)?;
        let initializer = global
            .initializer
            .map(|init| self.lower_const(init))
            .transpose()?;

        unsafe {
            let value = LLVMAddGlobal(self.module, ty, name.as_ptr());
            if let Some(initializer) = initializer {
                LLVMSetInitializer(value, initializer);
            }
            if global.linkage == Linkage::Internal {
                LLVMSetLinkage(value, LLVMLinkage::LLVMInternalLinkage);
            }
        }

        Ok(())
    }

    fn declare_function(&mut self, idx: FnIndex) -> Result<(), CodegenError> {
        let func = self.ctx.function(idx)?;
        let name = CString::new(func.name.as_str())?;
        let fn_ty = self.lower_type(func.ty)?;

        let value = unsafe {
            let value = LLVMAddFunction(self.module, name.as_ptr(), fn_ty);
            if func.linkage == Linkage::Internal {
                LLVMSetLinkage(value, LLVMLinkage::LLVMInternalLinkage);
            }
            value
        };
        self.functions.insert(idx, value);

        Ok(())
    }

    fn define_function(&mut self, idx: FnIndex) -> Result<(), CodegenError> {
        let func = self.ctx.function(idx)?;
        if func.is_declaration() {
            return Ok(());
        }

        let llvm_fn = self.functions.get(&idx).copied().ok_or_else(|| {
            CodegenError::LLVMCompileError(format!("function {:?} was not declared", func.name))
        })?;

        let mut blocks = HashMap::new();
        for block_idx in &func.blocks {
            let name = CString::new(self.ctx.block_name(*block_idx))?;
            let block =
                unsafe { LLVMAppendBasicBlockInContext(self.context, llvm_fn, name.as_ptr()) };
            blocks.insert(*block_idx, block);
        }

        // Operands must be lowered before their uses, whatever order the
        // blocks were created in.
        let order = self.ctx.reverse_post_order(idx)?;

        let builder = unsafe { LLVMCreateBuilderInContext(self.context) };
        let result = self.emit_blocks(func, &order, llvm_fn, builder, &blocks);
        unsafe { LLVMDisposeBuilder(builder) };

        result
    }

    fn emit_blocks(
        &self,
        func: &Function,
        order: &[BlockIndex],
        llvm_fn: LLVMValueRef,
        builder: LLVMBuilderRef,
        blocks: &HashMap<BlockIndex, LLVMBasicBlockRef>,
    ) -> Result<(), CodegenError> {
        let mut results: HashMap<InstIndex, LLVMValueRef> = HashMap::new();
        let llvm_block = |idx: &BlockIndex| {
            blocks.get(idx).copied().ok_or_else(|| {
                CodegenError::LLVMCompileError(format!(
                    "block {} is not part of function {:?}",
                    self.ctx.block_name(*idx),
                    func.name
                ))
            })
        };

        for block_idx in order {
            let block = self.ctx.block(*block_idx)?;
            unsafe { LLVMPositionBuilderAtEnd(builder, llvm_block(block_idx)?) };

            for (position, inst) in block.instructions.iter().enumerate() {
                let value = match &inst.kind {
                    InstructionKind::ReturnVoid => unsafe { LLVMBuildRetVoid(builder) },
                    InstructionKind::Return(value) => {
                        let value = self.lower_value(llvm_fn, &results, *value)?;
                        unsafe { LLVMBuildRet(builder, value) }
                    }
                    InstructionKind::Branch(target) => {
                        let target = llvm_block(target)?;
                        unsafe { LLVMBuildBr(builder, target) }
                    }
                    InstructionKind::Unreachable => unsafe { LLVMBuildUnreachable(builder) },
                    InstructionKind::Binary(op, lhs, rhs) => {
                        let lhs = self.lower_value(llvm_fn, &results, *lhs)?;
                        let rhs = self.lower_value(llvm_fn, &results, *rhs)?;
                        let name = c"".as_ptr();
                        unsafe {
                            match op {
                                BinOp::Add => LLVMBuildAdd(builder, lhs, rhs, name),
                                BinOp::Sub => LLVMBuildSub(builder, lhs, rhs, name),
                                BinOp::Mul => LLVMBuildMul(builder, lhs, rhs, name),
                            }
                        }
                    }
                };

                results.insert(
                    InstIndex {
                        block: *block_idx,
                        position,
                    },
                    value,
                );
            }
        }

        Ok(())
    }

    fn lower_value(
        &self,
        llvm_fn: LLVMValueRef,
        results: &HashMap<InstIndex, LLVMValueRef>,
        value: Value,
    ) -> Result<LLVMValueRef, CodegenError> {
        match value {
            Value::Const(idx) => self.lower_const(idx),
            Value::Param(_, index) => Ok(unsafe { LLVMGetParam(llvm_fn, index as u32) }),
            Value::Inst(idx) => results.get(&idx).copied().ok_or_else(|| {
                CodegenError::LLVMCompileError(format!(
                    "value {:?} is used before the block defining it",
                    idx
                ))
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        driver::build_entry_module,
        ir::{Builder, IntTy},
    };

    #[test]
    fn lowers_entry_module() {
        let mut ctx = Context::new();
        let module = build_entry_module(&mut ctx, "uranium_module", Some("main.ura")).unwrap();

        let llvm_module = LlvmModule::lower(&ctx, module).unwrap();
        let ir = llvm_module.to_ir_string();

        assert!(ir.contains("source_filename = \"main.ura\""), "{ir}");
        assert!(ir.contains("define void @main()"), "{ir}");
        assert!(ir.contains("ret void"), "{ir}");
    }

    #[test]
    fn lowers_arithmetic() {
        let mut ctx = Context::new();
        let module = ctx.create_module("calc");
        let i64_ty = ctx.int_type(IntTy::I64);
        let fn_ty = ctx.function_type(i64_ty, &[i64_ty], false).unwrap();
        let f = ctx
            .declare_function(module, "inc", fn_ty, Linkage::Internal)
            .unwrap();
        let entry = ctx.append_block(f, Some("entry")).unwrap();
        let a = ctx.param(f, 0).unwrap();
        let one = Value::Const(ctx.const_int(i64_ty, 1).unwrap());

        let builder = Builder::at_end(entry);
        let sum = builder.build_int_add(&mut ctx, a, one).unwrap();
        builder.build_return(&mut ctx, sum).unwrap();

        let ir = LlvmModule::lower(&ctx, module).unwrap().to_ir_string();
        assert!(ir.contains("define internal i64 @inc(i64"), "{ir}");
        assert!(ir.contains("add i64"), "{ir}");
    }

    #[test]
    fn lowers_blocks_created_out_of_order() {
        let mut ctx = Context::new();
        let module = ctx.create_module("m");
        let i32_ty = ctx.int_type(IntTy::I32);
        let fn_ty = ctx.function_type(i32_ty, &[i32_ty], false).unwrap();
        let f = ctx
            .declare_function(module, "twice", fn_ty, Linkage::Exported)
            .unwrap();
        let entry = ctx.append_block(f, Some("entry")).unwrap();
        let exit = ctx.append_block(f, Some("exit")).unwrap();
        let mid = ctx.append_block(f, Some("mid")).unwrap();
        let a = ctx.param(f, 0).unwrap();

        let mut builder = Builder::at_end(entry);
        builder.build_branch(&mut ctx, mid).unwrap();
        builder.position_at_end(mid);
        let sum = builder.build_int_add(&mut ctx, a, a).unwrap();
        builder.build_branch(&mut ctx, exit).unwrap();
        builder.position_at_end(exit);
        builder.build_return(&mut ctx, sum).unwrap();

        let ir = LlvmModule::lower(&ctx, module).unwrap().to_ir_string();
        assert!(ir.contains("add i32"), "{ir}");
        assert!(ir.contains("br label %mid"), "{ir}");
        assert!(ir.contains("br label %exit"), "{ir}");
    }

    #[test]
    fn refuses_malformed_modules() {
        let mut ctx = Context::new();
        let module = ctx.create_module("m");
        let void = ctx.void_type();
        let fn_ty = ctx.function_type(void, &[], false).unwrap();
        let f = ctx
            .declare_function(module, "main", fn_ty, Linkage::Exported)
            .unwrap();
        ctx.append_block(f, Some("entry")).unwrap();

        assert!(matches!(
            LlvmModule::lower(&ctx, module),
            Err(CodegenError::Malformed(_))
        ));
    }

    #[test]
    fn writes_bitcode() {
        let mut ctx = Context::new();
        let module = build_entry_module(&mut ctx, "main", None).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("main.bc");

        LlvmModule::lower(&ctx, module)
            .unwrap()
            .write_bitcode(&path)
            .unwrap();

        assert!(std::fs::metadata(&path).unwrap().len() > 0);
    }
}
