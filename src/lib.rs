#[cfg(feature = "llvm")]
pub mod codegen;
pub mod driver;
pub mod ir;
pub mod render;
