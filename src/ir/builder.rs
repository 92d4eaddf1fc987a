use super::{
    BinOp, BlockIndex, Context, FnIndex, InstIndex, Instruction, InstructionKind, IrError,
    TypeIndex, Value,
};

/// The instruction cursor.
///
/// A builder points at (the end of) one basic block and appends instructions
/// to it. It holds a plain handle and owns nothing, so it can be moved between
/// blocks and functions freely; every append re-validates the target against
/// the context it is given.
///
/// Appends check, in order: that an insertion point is set, that the block
/// belongs to `ctx`, that the block is still open, and finally the operands.
/// A failed append leaves the block unchanged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Builder {
    block: Option<BlockIndex>,
}

impl Builder {
    pub fn new() -> Self {
        Self::default()
    }

    /// A builder already positioned at the end of `block`.
    pub fn at_end(block: BlockIndex) -> Self {
        Self { block: Some(block) }
    }

    /// Moves the insertion point to the end of `block`.
    pub fn position_at_end(&mut self, block: BlockIndex) {
        self.block = Some(block);
    }

    pub fn clear_insertion_position(&mut self) {
        self.block = None;
    }

    /// The block instructions are currently appended to.
    pub fn insert_block(&self) -> Option<BlockIndex> {
        self.block
    }

    /// Returns the target block and its function, if the block can take one
    /// more instruction.
    fn open_block(&self, ctx: &Context) -> Result<(BlockIndex, FnIndex), IrError> {
        let block_idx = self.block.ok_or(IrError::NoInsertionPoint)?;
        let block = ctx.block(block_idx)?;

        if block.is_terminated() {
            return Err(IrError::BlockAlreadyTerminated {
                function: ctx.function(block.function)?.name.clone(),
                block: ctx.block_name(block_idx),
            });
        }

        Ok((block_idx, block.function))
    }

    /// Checks that `value` can be used as an operand inside `function` and
    /// returns its type.
    fn operand(
        &self,
        ctx: &Context,
        function: FnIndex,
        value: Value,
    ) -> Result<TypeIndex, IrError> {
        let value_fn = match value {
            Value::Const(idx) => {
                ctx.check_owned(idx, "constant")?;
                None
            }
            Value::Param(owner, _) => Some(owner),
            Value::Inst(idx) => Some(ctx.block(idx.block)?.function),
        };

        if let Some(owner) = value_fn {
            ctx.check_owned(owner, "function")?;
            if owner != function {
                return Err(IrError::ValueOutsideFunction {
                    function: ctx.function(function)?.name.clone(),
                    value: format!("{value:?}"),
                });
            }
        }

        ctx.value_type(value)
    }

    fn append(
        &self,
        ctx: &mut Context,
        block: BlockIndex,
        kind: InstructionKind,
        ty: Option<TypeIndex>,
    ) -> Result<InstIndex, IrError> {
        tracing::trace!("appending {:?} to block {}", kind, ctx.block_name(block));
        ctx.push_instruction(block, Instruction { kind, ty })
    }

    /// Appends `ret void`, closing the block.
    pub fn build_return_void(&self, ctx: &mut Context) -> Result<InstIndex, IrError> {
        let (block, function) = self.open_block(ctx)?;

        let ret = ctx.return_type(function)?;
        if !ctx.ty(ret)?.is_void() {
            return Err(IrError::TypeMismatch {
                site: format!("return from {:?}", ctx.function(function)?.name),
                expected: ctx.type_name(ret),
                found: "void".to_string(),
            });
        }

        self.append(ctx, block, InstructionKind::ReturnVoid, None)
    }

    /// Appends `ret <value>`, closing the block.
    pub fn build_return(&self, ctx: &mut Context, value: Value) -> Result<InstIndex, IrError> {
        let (block, function) = self.open_block(ctx)?;

        let value_ty = self.operand(ctx, function, value)?;
        let ret = ctx.return_type(function)?;
        if value_ty != ret {
            return Err(IrError::TypeMismatch {
                site: format!("return from {:?}", ctx.function(function)?.name),
                expected: ctx.type_name(ret),
                found: ctx.type_name(value_ty),
            });
        }

        self.append(ctx, block, InstructionKind::Return(value), None)
    }

    /// Appends an unconditional branch to `target`, closing the block.
    pub fn build_branch(
        &self,
        ctx: &mut Context,
        target: BlockIndex,
    ) -> Result<InstIndex, IrError> {
        let (block, function) = self.open_block(ctx)?;

        if ctx.block(target)?.function != function {
            return Err(IrError::BlockOutsideFunction {
                function: ctx.function(function)?.name.clone(),
                block: ctx.block_name(target),
            });
        }

        self.append(ctx, block, InstructionKind::Branch(target), None)
    }

    /// Appends `unreachable`, closing the block.
    pub fn build_unreachable(&self, ctx: &mut Context) -> Result<InstIndex, IrError> {
        let (block, _) = self.open_block(ctx)?;
        self.append(ctx, block, InstructionKind::Unreachable, None)
    }

    pub fn build_int_add(
        &self,
        ctx: &mut Context,
        lhs: Value,
        rhs: Value,
    ) -> Result<Value, IrError> {
        self.build_binary(ctx, BinOp::Add, lhs, rhs)
    }

    pub fn build_int_sub(
        &self,
        ctx: &mut Context,
        lhs: Value,
        rhs: Value,
    ) -> Result<Value, IrError> {
        self.build_binary(ctx, BinOp::Sub, lhs, rhs)
    }

    pub fn build_int_mul(
        &self,
        ctx: &mut Context,
        lhs: Value,
        rhs: Value,
    ) -> Result<Value, IrError> {
        self.build_binary(ctx, BinOp::Mul, lhs, rhs)
    }

    fn build_binary(
        &self,
        ctx: &mut Context,
        op: BinOp,
        lhs: Value,
        rhs: Value,
    ) -> Result<Value, IrError> {
        let (block, function) = self.open_block(ctx)?;

        let lhs_ty = self.operand(ctx, function, lhs)?;
        let rhs_ty = self.operand(ctx, function, rhs)?;

        if !ctx.ty(lhs_ty)?.is_int() {
            return Err(IrError::TypeMismatch {
                site: format!("{op:?} lhs"),
                expected: "an integer type".to_string(),
                found: ctx.type_name(lhs_ty),
            });
        }
        if lhs_ty != rhs_ty {
            return Err(IrError::TypeMismatch {
                site: format!("{op:?} rhs"),
                expected: ctx.type_name(lhs_ty),
                found: ctx.type_name(rhs_ty),
            });
        }

        let idx = self.append(ctx, block, InstructionKind::Binary(op, lhs, rhs), Some(lhs_ty))?;
        Ok(Value::Inst(idx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{IntTy, Linkage, ModuleIndex};

    fn setup(ctx: &mut Context, ret: TypeIndex, params: &[TypeIndex]) -> (ModuleIndex, FnIndex) {
        let module = ctx.create_module("m");
        let fn_ty = ctx.function_type(ret, params, false).unwrap();
        let f = ctx
            .declare_function(module, "f", fn_ty, Linkage::Exported)
            .unwrap();
        (module, f)
    }

    #[test]
    fn append_without_insertion_point() {
        let mut ctx = Context::new();
        let void = ctx.void_type();
        let (_, f) = setup(&mut ctx, void, &[]);
        let entry = ctx.append_block(f, Some("entry")).unwrap();

        let mut builder = Builder::new();
        assert_eq!(builder.build_return_void(&mut ctx), Err(IrError::NoInsertionPoint));

        builder.position_at_end(entry);
        builder.clear_insertion_position();
        assert_eq!(builder.build_unreachable(&mut ctx), Err(IrError::NoInsertionPoint));
        assert!(ctx.block(entry).unwrap().is_empty());
    }

    #[test]
    fn return_void_closes_the_block() {
        let mut ctx = Context::new();
        let void = ctx.void_type();
        let (_, f) = setup(&mut ctx, void, &[]);
        let entry = ctx.append_block(f, Some("entry")).unwrap();

        let builder = Builder::at_end(entry);
        assert!(!ctx.is_block_terminated(entry).unwrap());
        builder.build_return_void(&mut ctx).unwrap();
        assert!(ctx.is_block_terminated(entry).unwrap());

        let error = builder.build_unreachable(&mut ctx).unwrap_err();
        assert!(
            matches!(
                &error,
                IrError::BlockAlreadyTerminated { function, block }
                    if function == "f" && block == "entry"
            ),
            "{:#?}",
            error
        );
        assert_eq!(ctx.block(entry).unwrap().len(), 1);
    }

    #[test]
    fn closed_block_is_reported_before_type_errors() {
        let mut ctx = Context::new();
        let i32_ty = ctx.int_type(IntTy::I32);
        let (_, f) = setup(&mut ctx, i32_ty, &[]);
        let entry = ctx.append_block(f, None).unwrap();

        let builder = Builder::at_end(entry);
        builder.build_unreachable(&mut ctx).unwrap();

        assert!(matches!(
            builder.build_return_void(&mut ctx),
            Err(IrError::BlockAlreadyTerminated { .. })
        ));
    }

    #[test]
    fn return_void_requires_void_function() {
        let mut ctx = Context::new();
        let i32_ty = ctx.int_type(IntTy::I32);
        let (_, f) = setup(&mut ctx, i32_ty, &[]);
        let entry = ctx.append_block(f, None).unwrap();

        let builder = Builder::at_end(entry);
        let error = builder.build_return_void(&mut ctx).unwrap_err();
        assert!(
            matches!(
                &error,
                IrError::TypeMismatch { expected, found, .. }
                    if expected == "i32" && found == "void"
            ),
            "{:#?}",
            error
        );
        assert!(!ctx.is_block_terminated(entry).unwrap());
    }

    #[test]
    fn arithmetic_on_params() {
        let mut ctx = Context::new();
        let i32_ty = ctx.int_type(IntTy::I32);
        let (_, f) = setup(&mut ctx, i32_ty, &[i32_ty, i32_ty]);
        let entry = ctx.append_block(f, Some("entry")).unwrap();

        let a = ctx.param(f, 0).unwrap();
        let b = ctx.param(f, 1).unwrap();
        let two = Value::Const(ctx.const_int(i32_ty, 2).unwrap());

        let builder = Builder::at_end(entry);
        let sum = builder.build_int_add(&mut ctx, a, b).unwrap();
        let doubled = builder.build_int_mul(&mut ctx, sum, two).unwrap();
        builder.build_return(&mut ctx, doubled).unwrap();

        assert_eq!(ctx.value_type(doubled).unwrap(), i32_ty);
        assert!(ctx.is_well_formed(f).unwrap());
        let block = ctx.block(entry).unwrap();
        assert_eq!(block.len(), 3);
        assert!(block.instructions[0].kind.produces_value());
        assert!(!block.instructions[0].kind.is_terminator());
    }

    #[test]
    fn arithmetic_checks_operand_types() {
        let mut ctx = Context::new();
        let i32_ty = ctx.int_type(IntTy::I32);
        let i64_ty = ctx.int_type(IntTy::I64);
        let (_, f) = setup(&mut ctx, i32_ty, &[i32_ty]);
        let entry = ctx.append_block(f, None).unwrap();

        let a = ctx.param(f, 0).unwrap();
        let wide = Value::Const(ctx.const_int(i64_ty, 1).unwrap());

        let builder = Builder::at_end(entry);
        assert!(matches!(
            builder.build_int_sub(&mut ctx, a, wide),
            Err(IrError::TypeMismatch { .. })
        ));
        assert!(matches!(
            builder.build_return(&mut ctx, wide),
            Err(IrError::TypeMismatch { .. })
        ));
        assert!(ctx.block(entry).unwrap().is_empty());
    }

    #[test]
    fn operands_must_come_from_the_same_function() {
        let mut ctx = Context::new();
        let i32_ty = ctx.int_type(IntTy::I32);
        let (module, f) = setup(&mut ctx, i32_ty, &[i32_ty]);
        let fn_ty = ctx.function_type(i32_ty, &[i32_ty], false).unwrap();
        let g = ctx
            .declare_function(module, "g", fn_ty, Linkage::Internal)
            .unwrap();
        let g_entry = ctx.append_block(g, None).unwrap();
        let f_entry = ctx.append_block(f, None).unwrap();

        let f_param = ctx.param(f, 0).unwrap();
        let builder = Builder::at_end(g_entry);
        assert!(matches!(
            builder.build_return(&mut ctx, f_param),
            Err(IrError::ValueOutsideFunction { .. })
        ));
        assert!(matches!(
            builder.build_branch(&mut ctx, f_entry),
            Err(IrError::BlockOutsideFunction { .. })
        ));
    }

    #[test]
    fn branches_between_blocks() {
        let mut ctx = Context::new();
        let void = ctx.void_type();
        let (_, f) = setup(&mut ctx, void, &[]);
        let entry = ctx.append_block(f, Some("entry")).unwrap();
        let exit = ctx.append_block(f, Some("exit")).unwrap();

        let mut builder = Builder::at_end(entry);
        builder.build_branch(&mut ctx, exit).unwrap();
        assert!(!ctx.is_well_formed(f).unwrap());

        builder.position_at_end(exit);
        builder.build_return_void(&mut ctx).unwrap();
        assert!(ctx.is_well_formed(f).unwrap());
        assert_eq!(builder.insert_block(), Some(exit));
    }

    #[test]
    fn foreign_blocks_are_rejected() {
        let mut ctx = Context::new();
        let mut other = Context::new();
        let void = other.void_type();
        let (_, f) = setup(&mut other, void, &[]);
        let foreign = other.append_block(f, None).unwrap();

        let builder = Builder::at_end(foreign);
        assert!(matches!(
            builder.build_return_void(&mut ctx),
            Err(IrError::CrossContextReference { what: "basic block", .. })
        ));
        assert!(other.block(foreign).unwrap().is_empty());
    }
}
