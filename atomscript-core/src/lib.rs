//! atomscript language compiler and expression runtime.
//!
//! The front end of an embedded scripting language for an interactive
//! molecular-visualization application: a character-level lexer, a
//! flow-aware statement compiler, an expression compiler with an
//! atom-selection mini-grammar, a tagged-value data model, and a
//! stack-based expression evaluator. Rendering and model side effects
//! stay behind the collaborator traits in [`context`].

pub mod bitset;
pub mod compiler;
pub mod context;
pub mod error;
pub mod keywords;
pub mod lexer;
pub mod ops;
pub mod program;
pub mod rpn;
pub mod token;
pub mod value;
pub mod walker;

pub use compiler::{compile, compile_with_sink, CompileOptions};
pub use error::{CompileError, EvalError};
pub use program::CompiledProgram;
pub use value::{Value, Var};
