use std::collections::HashSet;

use super::{BlockIndex, ConstIndex, Context, FnIndex, IrError, Type, TypeIndex};

/// A straight-line sequence of instructions.
///
/// A block is open while it has no terminator and closed afterwards; the
/// [`Builder`](super::Builder) refuses to append to a closed block, so a
/// terminator is always the last instruction.
#[derive(Debug, Clone)]
pub struct BasicBlock {
    pub label: Option<String>,
    /// The function owning this block.
    pub function: FnIndex,
    pub instructions: Vec<Instruction>,
}

impl BasicBlock {
    pub fn terminator(&self) -> Option<&Instruction> {
        self.instructions
            .last()
            .filter(|inst| inst.kind.is_terminator())
    }

    pub fn is_terminated(&self) -> bool {
        self.terminator().is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    /// Blocks control can flow to from this one.
    pub fn successors(&self) -> impl Iterator<Item = BlockIndex> {
        let target = match self.terminator().map(|inst| &inst.kind) {
            Some(InstructionKind::Branch(target)) => Some(*target),
            _ => None,
        };
        target.into_iter()
    }
}

#[derive(Debug, Clone)]
pub struct Instruction {
    pub kind: InstructionKind,
    /// The type of the produced value, `None` if it produces nothing.
    pub ty: Option<TypeIndex>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstructionKind {
    /// Return from a function returning `void`.
    ReturnVoid,
    /// Return a value.
    Return(Value),
    /// Unconditional branch to a block of the same function.
    Branch(BlockIndex),
    Unreachable,
    /// Integer arithmetic on two operands of the same type.
    Binary(BinOp, Value, Value),
}

impl InstructionKind {
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            InstructionKind::ReturnVoid
                | InstructionKind::Return(_)
                | InstructionKind::Branch(_)
                | InstructionKind::Unreachable
        )
    }

    pub fn produces_value(&self) -> bool {
        matches!(self, InstructionKind::Binary(..))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
}

/// Position of an instruction inside its block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstIndex {
    pub block: BlockIndex,
    pub position: usize,
}

/// An instruction operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Value {
    Const(ConstIndex),
    /// A function parameter, by position.
    Param(FnIndex, usize),
    /// The result of an instruction.
    Inst(InstIndex),
}

impl Context {
    pub fn instruction(&self, idx: InstIndex) -> Result<&Instruction, IrError> {
        self.block(idx.block)?
            .instructions
            .get(idx.position)
            .ok_or(IrError::InvalidReference {
                what: "instruction",
                context: self.id(),
            })
    }

    /// Name of a block for diagnostics: its label, or its position in the
    /// function.
    pub fn block_name(&self, idx: BlockIndex) -> String {
        let Ok(block) = self.block(idx) else {
            return format!("<unresolved block {idx:?}>");
        };

        if let Some(label) = &block.label {
            return label.clone();
        }

        let position = self
            .function(block.function)
            .ok()
            .and_then(|f| f.blocks.iter().position(|b| *b == idx))
            .unwrap_or(0);
        format!("bb{position}")
    }

    /// Blocks of `function` in reverse post-order over branch edges, starting
    /// from its first block. Blocks not reachable from there follow, each
    /// unvisited one starting a new walk in creation order.
    ///
    /// Every block comes after the blocks that branch into it, unless it sits
    /// on a cycle.
    pub fn reverse_post_order(&self, function: FnIndex) -> Result<Vec<BlockIndex>, IrError> {
        let func = self.function(function)?;
        let mut visited = HashSet::with_capacity(func.blocks.len());
        let mut order = Vec::with_capacity(func.blocks.len());

        for root in &func.blocks {
            if visited.contains(root) {
                continue;
            }

            let mut post_order = Vec::new();
            let mut stack = vec![(*root, false)];
            while let Some((block, expanded)) = stack.pop() {
                if expanded {
                    post_order.push(block);
                    continue;
                }
                if !visited.insert(block) {
                    continue;
                }

                stack.push((block, true));
                for succ in self.block(block)?.successors() {
                    if !visited.contains(&succ) {
                        stack.push((succ, false));
                    }
                }
            }

            order.extend(post_order.into_iter().rev());
        }

        Ok(order)
    }

    pub fn is_block_terminated(&self, idx: BlockIndex) -> Result<bool, IrError> {
        Ok(self.block(idx)?.is_terminated())
    }

    /// A function is well-formed once every block it owns ends in a
    /// terminator. Declarations have no blocks and are always well-formed.
    pub fn is_well_formed(&self, function: FnIndex) -> Result<bool, IrError> {
        for block in &self.function(function)?.blocks {
            if !self.is_block_terminated(*block)? {
                return Ok(false);
            }
        }

        Ok(true)
    }

    /// The return type of `function`.
    pub fn return_type(&self, function: FnIndex) -> Result<TypeIndex, IrError> {
        let func = self.function(function)?;
        match self.ty(func.ty)? {
            Type::Function(fn_ty) => Ok(fn_ty.ret),
            _ => Err(IrError::TypeMismatch {
                site: format!("function {:?}", func.name),
                expected: "a function type".to_string(),
                found: self.type_name(func.ty),
            }),
        }
    }

    /// The type of an operand.
    pub fn value_type(&self, value: Value) -> Result<TypeIndex, IrError> {
        match value {
            Value::Const(idx) => Ok(self.constant(idx)?.ty),
            Value::Param(function, index) => {
                let func = self.function(function)?;
                let fn_ty = self.ty(func.ty)?.as_function();
                fn_ty
                    .and_then(|fn_ty| fn_ty.params.get(index).copied())
                    .ok_or_else(|| IrError::ParamOutOfRange {
                        function: func.name.clone(),
                        index,
                        count: fn_ty.map(|fn_ty| fn_ty.params.len()).unwrap_or(0),
                    })
            }
            Value::Inst(idx) => {
                let inst = self.instruction(idx)?;
                inst.ty.ok_or_else(|| IrError::TypeMismatch {
                    site: "operand".to_string(),
                    expected: "an instruction producing a value".to_string(),
                    found: format!("{:?}", inst.kind),
                })
            }
        }
    }

    /// Appends to a block. Only the builder calls this, after checking every
    /// precondition.
    pub(crate) fn push_instruction(
        &mut self,
        idx: BlockIndex,
        instruction: Instruction,
    ) -> Result<InstIndex, IrError> {
        let block = self.block_mut(idx)?;
        block.instructions.push(instruction);
        Ok(InstIndex {
            block: idx,
            position: block.instructions.len() - 1,
        })
    }
}
