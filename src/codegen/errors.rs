use std::ffi::NulError;

use itertools::Itertools;
use thiserror::Error;

use crate::ir::{IrError, verify::VerifyError};

#[derive(Debug, Error)]
pub enum CodegenError {
    #[error("llvm compile error: {0}")]
    LLVMCompileError(String),
    #[error("module is not well-formed: {}", .0.iter().join("; "))]
    Malformed(Vec<VerifyError>),
    #[error("name contains a nul byte")]
    InvalidName(#[from] NulError),
    #[error(transparent)]
    Ir(#[from] IrError),
}
