//! Textual dump of a module.
//!
//! The output follows the LLVM assembly layout closely enough to be familiar:
//!
//! ```text
//! ; ModuleID = 'm'
//! source_filename = "m"
//!
//! define void @main() {
//! entry:
//!   ret void
//! }
//! ```
//!
//! Rendering never mutates the IR and never repairs it. Blocks that are empty
//! or lack a terminator are printed with an explicit marker comment so the
//! problem is visible in the dump.

use std::{
    borrow::Cow,
    collections::{HashMap, HashSet},
    fmt::Write,
};

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ir::{
    BinOp, BlockIndex, ConstIndex, ConstValue, Context, FnIndex, Function, GlobalIndex, InstIndex,
    InstructionKind, IrError, Linkage, ModuleIndex, Type, Value,
};

pub const EMPTY_BLOCK_MARKER: &str = "; <empty block>";
pub const MISSING_TERMINATOR_MARKER: &str = "; <missing terminator>";

/// Render time options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Emit the `; ModuleID` comment line.
    pub header: bool,
    /// Spaces before each instruction.
    pub indent: usize,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            header: true,
            indent: 2,
        }
    }
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error(transparent)]
    Ir(#[from] IrError),
    #[error(transparent)]
    Fmt(#[from] std::fmt::Error),
}

/// Renders `module` with the given configuration.
#[tracing::instrument(level = "debug", skip(ctx, config))]
pub fn render_module(
    ctx: &Context,
    module: ModuleIndex,
    config: &RenderConfig,
) -> Result<String, RenderError> {
    let module_body = ctx.module(module)?;
    let mut out = String::new();

    if config.header {
        writeln!(out, "; ModuleID = '{}'", escape(&module_body.name))?;
    }
    writeln!(
        out,
        "source_filename = \"{}\"",
        escape(module_body.source_name())
    )?;

    if !module_body.globals.is_empty() {
        writeln!(out)?;
        for global in &module_body.globals {
            render_global(ctx, *global, &mut out)?;
        }
    }

    for function in &module_body.functions {
        writeln!(out)?;
        render_function(ctx, *function, config, &mut out)?;
    }

    Ok(out)
}

fn render_global(ctx: &Context, idx: GlobalIndex, out: &mut String) -> Result<(), RenderError> {
    let global = ctx.global(idx)?;
    let ty = ctx.display_type(global.ty)?;

    let linkage = match (global.linkage, global.initializer) {
        (Linkage::Internal, _) => "internal ",
        (Linkage::Exported, None) => "external ",
        (Linkage::Exported, Some(_)) => "",
    };

    write!(out, "@{} = {linkage}global {ty}", quote_name(&global.name))?;
    if let Some(init) = global.initializer {
        write!(out, " {}", render_const(ctx, init)?)?;
    }
    writeln!(out)?;

    Ok(())
}

fn render_function(
    ctx: &Context,
    idx: FnIndex,
    config: &RenderConfig,
    out: &mut String,
) -> Result<(), RenderError> {
    let func = ctx.function(idx)?;
    let Type::Function(fn_ty) = ctx.ty(func.ty)? else {
        return Err(IrError::TypeMismatch {
            site: format!("function {:?}", func.name),
            expected: "a function type".to_string(),
            found: ctx.type_name(func.ty),
        }
        .into());
    };

    let linkage = match func.linkage {
        Linkage::Exported => "",
        Linkage::Internal => "internal ",
    };
    let ret = ctx.display_type(fn_ty.ret)?;

    let mut params = Vec::with_capacity(fn_ty.params.len() + 1);
    for (i, param) in fn_ty.params.iter().enumerate() {
        let param_ty = ctx.display_type(*param)?;
        if func.is_declaration() {
            params.push(param_ty);
        } else {
            params.push(format!("{param_ty} %p{i}"));
        }
    }
    if fn_ty.variadic {
        params.push("...".to_string());
    }
    let params = params.iter().join(", ");

    if func.is_declaration() {
        writeln!(
            out,
            "declare {linkage}{ret} @{}({params})",
            quote_name(&func.name)
        )?;
        return Ok(());
    }

    if !ctx.is_well_formed(idx)? {
        tracing::warn!("rendering function {:?} which is not well-formed", func.name);
    }

    // Number instruction results in block order, like LLVM numbers its
    // unnamed values.
    let mut results: HashMap<InstIndex, usize> = HashMap::new();
    for block_idx in &func.blocks {
        for (position, inst) in ctx.block(*block_idx)?.instructions.iter().enumerate() {
            if inst.kind.produces_value() {
                let next = results.len();
                results.insert(
                    InstIndex {
                        block: *block_idx,
                        position,
                    },
                    next,
                );
            }
        }
    }

    let labels = block_labels(ctx, func);
    let label = |idx: BlockIndex| match labels.get(&idx) {
        Some(label) => label.clone(),
        None => quote_name(&ctx.block_name(idx)).into_owned(),
    };

    let indent = " ".repeat(config.indent);
    writeln!(
        out,
        "define {linkage}{ret} @{}({params}) {{",
        quote_name(&func.name)
    )?;

    for (i, block_idx) in func.blocks.iter().enumerate() {
        let block = ctx.block(*block_idx)?;
        if i > 0 {
            writeln!(out)?;
        }
        writeln!(out, "{}:", label(*block_idx))?;

        if block.is_empty() {
            writeln!(out, "{indent}{EMPTY_BLOCK_MARKER}")?;
            continue;
        }

        for (position, inst) in block.instructions.iter().enumerate() {
            let operand = |value: Value| render_value(ctx, &results, value);

            let text = match &inst.kind {
                InstructionKind::ReturnVoid => "ret void".to_string(),
                InstructionKind::Return(value) => {
                    let ty = ctx.display_type(ctx.value_type(*value)?)?;
                    format!("ret {ty} {}", operand(*value)?)
                }
                InstructionKind::Branch(target) => {
                    format!("br label %{}", label(*target))
                }
                InstructionKind::Unreachable => "unreachable".to_string(),
                InstructionKind::Binary(op, lhs, rhs) => {
                    let result = render_value(
                        ctx,
                        &results,
                        Value::Inst(InstIndex {
                            block: *block_idx,
                            position,
                        }),
                    )?;
                    let op = match op {
                        BinOp::Add => "add",
                        BinOp::Sub => "sub",
                        BinOp::Mul => "mul",
                    };
                    let ty = ctx.display_type(ctx.value_type(*lhs)?)?;
                    format!("{result} = {op} {ty} {}, {}", operand(*lhs)?, operand(*rhs)?)
                }
            };
            writeln!(out, "{indent}{text}")?;
        }

        if !block.is_terminated() {
            writeln!(out, "{indent}{MISSING_TERMINATOR_MARKER}")?;
        }
    }

    writeln!(out, "}}")?;

    Ok(())
}

/// One label per block of `func`, in block order. A name that is already
/// taken gets the first free numeric suffix, like LLVM renames clashing
/// values (`x`, `x1`, `x2`).
fn block_labels(ctx: &Context, func: &Function) -> HashMap<BlockIndex, String> {
    let mut taken = HashSet::with_capacity(func.blocks.len());
    let mut labels = HashMap::with_capacity(func.blocks.len());

    for block_idx in &func.blocks {
        let base = ctx.block_name(*block_idx);
        let mut name = base.clone();
        let mut suffix = 1;
        while !taken.insert(name.clone()) {
            name = format!("{base}{suffix}");
            suffix += 1;
        }
        labels.insert(*block_idx, quote_name(&name).into_owned());
    }

    labels
}

/// Names matching `[-a-zA-Z$._][-a-zA-Z$._0-9]*` are printed bare, anything
/// else is quoted and escaped.
fn quote_name(name: &str) -> Cow<'_, str> {
    let is_name_char = |c: char| c.is_ascii_alphanumeric() || matches!(c, '-' | '$' | '.' | '_');
    let mut chars = name.chars();
    let plain = match chars.next() {
        Some(first) => !first.is_ascii_digit() && is_name_char(first) && chars.all(is_name_char),
        None => false,
    };

    if plain {
        Cow::Borrowed(name)
    } else {
        Cow::Owned(format!("\"{}\"", escape(name)))
    }
}

/// Escapes quotes, backslashes and non printable bytes as `\XX`.
fn escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for byte in text.bytes() {
        let printable = byte == b' ' || byte.is_ascii_graphic();
        if printable && byte != b'"' && byte != b'\\' {
            escaped.push(char::from(byte));
        } else {
            let _ = write!(escaped, "\\{byte:02X}");
        }
    }
    escaped
}

fn render_value(
    ctx: &Context,
    results: &HashMap<InstIndex, usize>,
    value: Value,
) -> Result<String, RenderError> {
    Ok(match value {
        Value::Const(idx) => render_const(ctx, idx)?,
        Value::Param(_, i) => format!("%p{i}"),
        Value::Inst(idx) => match results.get(&idx) {
            Some(n) => format!("%v{n}"),
            None => {
                return Err(IrError::InvalidReference {
                    what: "instruction result",
                    context: ctx.id(),
                }
                .into());
            }
        },
    })
}

fn render_const(ctx: &Context, idx: ConstIndex) -> Result<String, RenderError> {
    let constant = ctx.constant(idx)?;
    Ok(match constant.value {
        ConstValue::Int(value) => value.to_string(),
        ConstValue::Float(bits) => format!("{:?}", f64::from_bits(bits)),
    })
}
