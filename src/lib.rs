//! Front-end and mid-end for the Saby language: semantic analysis, SSA
//! construction, peephole optimization, and symbol-table serialization. The
//! lexer, parser, and native code generator are out of scope; this crate
//! picks up at the AST (see [`ast`]) and stops at a finished [`ssa::Module`].

pub mod analyzer;
pub mod ast;
pub mod compiler;
pub mod diag;
pub mod env;
pub mod optimizer;
pub mod ssa;
pub mod symbol;
pub mod symtab;
pub mod types;
