//! Operation rewriting: unsafe operations expanded into safe multi-step
//! equivalents, and the SQL construction helpers they rely on.

pub mod compiler;
pub mod rewriter;
pub mod sql;

pub use compiler::compile;
pub use rewriter::{IdAllocator, OperationRewriter, RewriteError};
pub use sql::SqlStatement;
