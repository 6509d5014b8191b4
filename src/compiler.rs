//! The top-level driver: runs the semantic analyzer over a whole program,
//! then (errors permitting) the SSA builder, mirroring §7's "abort codegen
//! once any phase reports `errors > 0`, but finish the offending phase
//! first" policy.

use crate::analyzer::{Analyzer, CompilerPaths};
use crate::ast::AstNode;
use crate::diag::Diagnostics;
use crate::env::Env;
use crate::optimizer::Optimizer;
use crate::ssa::{self, Module};
use crate::symbol::Interner;

/// One compilation's outputs: the accumulated diagnostics, and — only if
/// analysis reported zero errors — the built module.
pub struct CompileResult {
    pub diags: Diagnostics,
    pub module: Option<Module>,
}

pub struct Compiler {
    pub paths: CompilerPaths,
    pub optimize: bool,
}

impl Compiler {
    pub fn new(paths: CompilerPaths, optimize: bool) -> Self {
        Compiler { paths, optimize }
    }

    /// Analyzes every top-level statement (accumulating as many errors as
    /// possible across the whole program, per §7), then builds SSA only if
    /// that pass came back clean.
    pub fn compile(&self, program: &[AstNode], interner: &mut Interner) -> CompileResult {
        let mut diags = Diagnostics::new();
        let root = Env::root();
        {
            let mut analyzer = Analyzer { diags: &mut diags, interner, paths: &self.paths };
            for stmt in program {
                analyzer.analyze(stmt, &root);
            }
        }
        if diags.has_errors() {
            return CompileResult { diags, module: None };
        }
        let optimizer = Optimizer::new(self.optimize);
        let module = ssa::build(program, &optimizer, &mut diags, interner, &root);
        CompileResult { diags, module: Some(module) }
    }
}
