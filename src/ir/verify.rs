//! Structural checks run before a module is handed to a later stage.

use thiserror::Error;

use super::{Context, FnIndex, IrError, Linkage, ModuleIndex};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VerifyError {
    #[error("block {block} of function {function:?} has no instructions")]
    EmptyBlock { function: String, block: String },
    #[error("block {block} of function {function:?} does not end in a terminator")]
    MissingTerminator { function: String, block: String },
    #[error("symbol {symbol:?} has internal linkage but is not defined")]
    InternalDeclaration { symbol: String },
    #[error(transparent)]
    Ir(#[from] IrError),
}

/// Checks a single function, collecting every problem found.
pub fn verify_function(ctx: &Context, function: FnIndex) -> Vec<VerifyError> {
    let func = match ctx.function(function) {
        Ok(func) => func,
        Err(e) => return vec![e.into()],
    };

    let mut errors = Vec::new();

    if func.is_declaration() && func.linkage == Linkage::Internal {
        errors.push(VerifyError::InternalDeclaration {
            symbol: func.name.clone(),
        });
    }

    for block_idx in &func.blocks {
        let block = match ctx.block(*block_idx) {
            Ok(block) => block,
            Err(e) => {
                errors.push(e.into());
                continue;
            }
        };

        if block.is_empty() {
            errors.push(VerifyError::EmptyBlock {
                function: func.name.clone(),
                block: ctx.block_name(*block_idx),
            });
        } else if !block.is_terminated() {
            errors.push(VerifyError::MissingTerminator {
                function: func.name.clone(),
                block: ctx.block_name(*block_idx),
            });
        }
    }

    errors
}

/// Checks every global and function of `module`.
#[tracing::instrument(level = "debug", skip(ctx))]
pub fn verify_module(ctx: &Context, module: ModuleIndex) -> Result<(), Vec<VerifyError>> {
    let module_body = ctx.module(module).map_err(|e| vec![e.into()])?;

    let mut errors = Vec::new();
    for global in &module_body.globals {
        match ctx.global(*global) {
            Ok(global) if global.linkage == Linkage::Internal && global.initializer.is_none() => {
                errors.push(VerifyError::InternalDeclaration {
                    symbol: global.name.clone(),
                });
            }
            Ok(_) => {}
            Err(e) => errors.push(e.into()),
        }
    }
    errors.extend(
        module_body
            .functions
            .iter()
            .flat_map(|function| verify_function(ctx, *function)),
    );

    if errors.is_empty() {
        Ok(())
    } else {
        tracing::debug!("module {:?} has {} problems", module_body.name, errors.len());
        Err(errors)
    }
}
