use thiserror::Error;

use super::ContextId;

/// Misuse of the IR construction protocol.
///
/// Every variant is a caller error: the offending operation is rejected and
/// the IR built so far is left untouched for inspection.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IrError {
    #[error("{what} belongs to context {found}, but it was used with context {expected}")]
    CrossContextReference {
        what: &'static str,
        expected: ContextId,
        found: ContextId,
    },
    #[error("{what} does not resolve in context {context}")]
    InvalidReference {
        what: &'static str,
        context: ContextId,
    },
    #[error(
        "symbol {name:?} is already declared in module {module:?} as {existing}, can't redeclare it as {requested}"
    )]
    DuplicateIncompatibleDeclaration {
        module: String,
        name: String,
        existing: String,
        requested: String,
    },
    #[error("block {block} of function {function:?} already ends in a terminator")]
    BlockAlreadyTerminated { function: String, block: String },
    #[error("the builder has no insertion point")]
    NoInsertionPoint,
    #[error("type mismatch in {site}: expected {expected}, found {found}")]
    TypeMismatch {
        site: String,
        expected: String,
        found: String,
    },
    #[error("function {function:?} has {count} parameters, parameter {index} does not exist")]
    ParamOutOfRange {
        function: String,
        index: usize,
        count: usize,
    },
    #[error("block {block} is not part of function {function:?}")]
    BlockOutsideFunction { function: String, block: String },
    #[error("value {value} is not available in function {function:?}")]
    ValueOutsideFunction { function: String, value: String },
}
