//! C5: the semantic analyzer.
//!
//! Walks the AST post-order, annotating every node with a [`TypeValue`] and
//! its enclosing [`Env`], enforcing the typing rules of Table T1. Grounded
//! on `original_source/src/analyzer.cpp`; diagnostics follow the
//! accumulate-and-continue policy of §7.

use crate::ast::{Ast, AstKind, BinOp, BinaryForm, CtrlKind, ExternKind, IdentifierRole, UnOp};
use crate::diag::{DiagKind, Diagnostics};
use crate::env::{Env, LoadSymbols};
use crate::symbol::{Interner, Symbol};
use crate::types::{self, prim, TypeValue, FUNC_MAX_ARG_NUM, TYPE_ERROR};
use std::path::{Path, PathBuf};

/// Where import/export directives read and write `.sym` files (§6: `lib_path`
/// a directory beside the binary, `sym_path` the input's own `.sym` path).
pub struct CompilerPaths {
    pub lib_path: PathBuf,
    pub sym_path: PathBuf,
}

pub struct Analyzer<'a> {
    pub diags: &'a mut Diagnostics,
    pub interner: &'a mut Interner,
    pub paths: &'a CompilerPaths,
}

fn is_lvalue(node: &Ast) -> bool {
    matches!(node.kind, AstKind::Identifier { role: IdentifierRole::Reference, .. })
}

fn binop_permits(op: BinOp, ty: TypeValue) -> bool {
    match op {
        BinOp::And | BinOp::Xor | BinOp::Or | BinOp::Shl | BinOp::Shr | BinOp::Mod => ty == prim::NUMBER,
        BinOp::Add | BinOp::Equal | BinOp::NotEqual => {
            matches!(ty, prim::NUMBER | prim::FLOAT | prim::STRING | prim::LIST)
        }
        BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Less | BinOp::LessEq | BinOp::Greater | BinOp::GreaterEq => {
            matches!(ty, prim::NUMBER | prim::FLOAT)
        }
        BinOp::Pow => ty == prim::FLOAT,
    }
}

fn unop_permits(op: UnOp, ty: TypeValue) -> bool {
    match op {
        UnOp::Not => ty == prim::NUMBER,
        UnOp::Neg | UnOp::Inc | UnOp::Dec => matches!(ty, prim::NUMBER | prim::FLOAT),
        UnOp::ConvNum => matches!(ty, prim::FLOAT | prim::STRING | prim::VAR),
        UnOp::ConvDec => matches!(ty, prim::NUMBER | prim::STRING | prim::VAR),
        UnOp::ConvStr => matches!(ty, prim::NUMBER | prim::FLOAT | prim::VAR),
    }
}

fn is_comparison(op: BinOp) -> bool {
    matches!(op, BinOp::Less | BinOp::LessEq | BinOp::Greater | BinOp::GreaterEq | BinOp::Equal | BinOp::NotEqual)
}

/// Treats any concrete function signature generically as `Function`, the
/// way `AnalyzeCall`/`AnalyzeCtrlFlow` compare signature-bearing types.
fn generalize(ty: TypeValue) -> TypeValue {
    if types::is_concrete_function(ty) {
        prim::FUNCTION
    } else {
        ty
    }
}

/// Scans a function body for a `return` statement, not descending into
/// nested function literals (their own `return`s belong to them).
fn contains_return(node: &Ast) -> bool {
    match &node.kind {
        AstKind::ControlFlow { kind: CtrlKind::Return, .. } => true,
        AstKind::Block(stmts) => stmts.iter().any(|s| contains_return(s)),
        AstKind::If { then, else_then, .. } => {
            contains_return(then) || else_then.as_ref().is_some_and(|e| contains_return(e))
        }
        AstKind::While { body, .. } => contains_return(body),
        AstKind::Function { .. } => false,
        _ => false,
    }
}

impl<'a> Analyzer<'a> {
    pub fn analyze(&mut self, node: &Ast, env: &Env) -> TypeValue {
        node.set_env(env.clone());
        let ty = self.analyze_kind(node, env);
        node.set_ty(ty);
        ty
    }

    fn err(&mut self, node: &Ast, kind: DiagKind, message: impl Into<String>, ident: Option<Symbol>) -> TypeValue {
        let ident_str = ident.map(|s| self.interner.resolve(s).to_owned());
        self.diags.report(kind, node.line, message, ident_str.as_deref());
        TYPE_ERROR
    }

    fn analyze_kind(&mut self, node: &Ast, env: &Env) -> TypeValue {
        match &node.kind {
            AstKind::Number(_) => prim::NUMBER,
            AstKind::Decimal(_) => prim::FLOAT,
            AstKind::String(_) => prim::STRING,

            AstKind::Identifier { name, role } => match role {
                IdentifierRole::Reference => match env.lookup(*name, true) {
                    Some(t) => t,
                    None => self.err(node, DiagKind::UndefinedIdentifier, "has not been defined", Some(*name)),
                },
                IdentifierRole::ArgDecl(ty) => {
                    env.insert(*name, *ty);
                    *ty
                }
            },

            AstKind::Variable { defs, declared } => {
                for def in defs {
                    if self.interner.resolve(def.name) == "@" {
                        self.err(node, DiagKind::Redefinition, "'@' is a reserved name", Some(def.name));
                        continue;
                    }
                    if env.lookup(def.name, false).is_some() {
                        self.err(node, DiagKind::Redefinition, "already defined in this scope", Some(def.name));
                        continue;
                    }
                    let init_ty = self.analyze(&def.init, env);
                    if init_ty == TYPE_ERROR {
                        continue;
                    }
                    let final_ty = if *declared == prim::VAR {
                        if matches!(init_ty, prim::VAR | prim::VOID) {
                            self.err(
                                node,
                                DiagKind::TypeMismatch,
                                "cannot deduce a 'var' declaration from a var/void initializer",
                                Some(def.name),
                            )
                        } else {
                            init_ty
                        }
                    } else if *declared == prim::FUNCTION {
                        if types::is_concrete_function(init_ty) {
                            init_ty
                        } else {
                            self.err(node, DiagKind::TypeMismatch, "expected a function initializer", Some(def.name))
                        }
                    } else if init_ty == *declared {
                        *declared
                    } else {
                        self.err(node, DiagKind::TypeMismatch, "initializer type does not match declaration", Some(def.name))
                    };
                    env.insert(def.name, final_ty);
                }
                prim::VOID
            }

            AstKind::Binary { form, lhs, rhs } => self.analyze_binary(node, *form, lhs, rhs, env),

            AstKind::Unary { op, operand } => {
                let oty = self.analyze(operand, env);
                if oty == TYPE_ERROR {
                    return TYPE_ERROR;
                }
                if matches!(op, UnOp::Inc | UnOp::Dec) && !is_lvalue(operand) {
                    return self.err(node, DiagKind::NonLvalueTarget, "increment/decrement target must be an identifier", None);
                }
                if !unop_permits(*op, oty) {
                    return self.err(node, DiagKind::BadOperatorOperand, "operator not defined for operand type", None);
                }
                match op {
                    UnOp::ConvNum => prim::NUMBER,
                    UnOp::ConvDec => prim::FLOAT,
                    UnOp::ConvStr => prim::STRING,
                    _ => oty,
                }
            }

            AstKind::Call { callee, args } => self.analyze_call(node, callee, args, env),

            AstKind::Block(stmts) => {
                let child = env.new_child();
                for s in stmts {
                    self.analyze(s, &child);
                }
                prim::VOID
            }

            AstKind::Function { args, return_type, body } => self.analyze_function(node, args, *return_type, body, env),

            AstKind::Asm(_) => prim::VOID,

            AstKind::If { cond, then, else_then } => {
                self.analyze(cond, env);
                self.analyze(then, env);
                if let Some(e) = else_then {
                    self.analyze(e, env);
                }
                prim::VOID
            }

            AstKind::While { cond, body } => {
                self.analyze(cond, env);
                self.analyze(body, env);
                prim::VOID
            }

            AstKind::ControlFlow { kind, value } => self.analyze_ctrlflow(node, *kind, value, env),

            AstKind::External { kind, libs, wildcard } => self.analyze_extern(node, *kind, libs, *wildcard, env),
        }
    }

    fn analyze_binary(&mut self, node: &Ast, form: BinaryForm, lhs: &Ast, rhs: &Ast, env: &Env) -> TypeValue {
        let lty = self.analyze(lhs, env);
        let rty = self.analyze(rhs, env);
        if lty == TYPE_ERROR || rty == TYPE_ERROR {
            return TYPE_ERROR;
        }
        match form {
            BinaryForm::Assign => {
                if !is_lvalue(lhs) {
                    return self.err(node, DiagKind::NonLvalueTarget, "assignment target must be an identifier", None);
                }
                if rty == prim::VAR || rty == lty {
                    lty
                } else {
                    self.err(node, DiagKind::TypeMismatch, "assigned value does not match target type", None)
                }
            }
            BinaryForm::CompoundAssign(op) => {
                if !is_lvalue(lhs) {
                    return self.err(node, DiagKind::NonLvalueTarget, "assignment target must be an identifier", None);
                }
                if !binop_permits(op, lty) {
                    return self.err(node, DiagKind::BadOperatorOperand, "operator not defined for operand type", None);
                }
                if lty != rty {
                    return self.err(node, DiagKind::TypeMismatch, "operand types do not match", None);
                }
                lty
            }
            BinaryForm::Plain(op) => {
                if lty != rty {
                    return self.err(node, DiagKind::TypeMismatch, "operand types do not match", None);
                }
                if !binop_permits(op, lty) {
                    return self.err(node, DiagKind::BadOperatorOperand, "operator not defined for operand type", None);
                }
                if is_comparison(op) {
                    prim::NUMBER
                } else {
                    lty
                }
            }
        }
    }

    fn analyze_call(&mut self, node: &Ast, callee: &Ast, args: &[crate::ast::AstNode], env: &Env) -> TypeValue {
        let cty = self.analyze(callee, env);
        let mut arg_tys = Vec::with_capacity(args.len());
        let mut saw_error = cty == TYPE_ERROR;
        for a in args {
            let t = self.analyze(a, env);
            saw_error |= t == TYPE_ERROR;
            arg_tys.push(t);
        }
        if saw_error {
            return TYPE_ERROR;
        }
        if cty == prim::FUNCTION || cty == prim::VAR {
            self.diags.report(
                DiagKind::CallThroughOpaque,
                node.line,
                "calling through an opaque function/var type is not checked statically",
                None,
            );
            return prim::VAR;
        }
        if !types::is_concrete_function(cty) {
            return self.err(node, DiagKind::BadOperatorOperand, "callee is not callable", None);
        }
        let expected = types::args_of(cty);
        let actual = types::hash_args(&arg_tys);
        if expected != actual {
            return self.err(node, DiagKind::TypeMismatch, "argument types do not match the callee's signature", None);
        }
        types::ret_of(cty)
    }

    fn analyze_function(&mut self, node: &Ast, args: &[crate::ast::AstNode], return_type: TypeValue, body: &Ast, env: &Env) -> TypeValue {
        if args.len() > FUNC_MAX_ARG_NUM {
            self.err(node, DiagKind::ArityOverflow, "function declares more than the maximum number of arguments", None);
        }
        let fn_env = env.new_child();
        let mut arg_types = types::ArgTypes::new();
        for a in args {
            if let AstKind::Identifier { name, role: IdentifierRole::ArgDecl(ty) } = &a.kind {
                a.set_env(fn_env.clone());
                a.set_ty(*ty);
                fn_env.insert(*name, *ty);
                let _ = arg_types.try_push(*ty);
            }
        }
        let func_ty = types::encode_function(&arg_types, return_type);
        let at_sym = self.interner.intern("@");
        fn_env.insert(at_sym, func_ty);
        self.analyze(body, &fn_env);
        if return_type != prim::VOID && !contains_return(body) {
            self.err(node, DiagKind::ReturnTypeMismatch, "non-void function has no return statement", None);
        }
        func_ty
    }

    fn analyze_ctrlflow(&mut self, node: &Ast, kind: CtrlKind, value: &Option<crate::ast::AstNode>, env: &Env) -> TypeValue {
        match kind {
            CtrlKind::Return => {
                let at_sym = self.interner.intern("@");
                let func_ty = match env.lookup(at_sym, true) {
                    Some(t) => t,
                    None => return self.err(node, DiagKind::ReturnOutsideFunction, "cannot return outside of a function", None),
                };
                let expected = generalize(types::ret_of(func_ty));
                let actual = match value {
                    Some(v) => self.analyze(v, env),
                    None => prim::VOID,
                };
                if actual == TYPE_ERROR {
                    return TYPE_ERROR;
                }
                if generalize(actual) != expected {
                    return self.err(node, DiagKind::ReturnTypeMismatch, "return value does not match function's return type", None);
                }
                prim::VOID
            }
            CtrlKind::Break | CtrlKind::Continue => {
                if let Some(v) = value {
                    self.analyze(v, env);
                }
                prim::VOID
            }
        }
    }

    fn analyze_extern(&mut self, node: &Ast, kind: ExternKind, libs: &[Symbol], wildcard: bool, env: &Env) -> TypeValue {
        if env.outer().is_some() {
            return self.err(node, DiagKind::ExternOutsideTopScope, "import/export is only allowed at the top scope", None);
        }
        match kind {
            ExternKind::Import => {
                for &lib in libs {
                    let lib_name = self.interner.resolve(lib).to_owned();
                    let path = lib_path_for(&self.paths.lib_path, &lib_name);
                    if paths_equal(&path, &self.paths.sym_path) {
                        self.diags.report(DiagKind::SelfImport, node.line, "module imports its own symbol file", Some(&lib_name));
                        continue;
                    }
                    match env.outermost().load_symbols(&path, &lib_name, self.interner) {
                        LoadSymbols::Success => {}
                        LoadSymbols::LibConflicted => {
                            self.diags.report(DiagKind::DuplicateImport, node.line, "library already imported", Some(&lib_name));
                        }
                        LoadSymbols::FuncConflicted => {
                            self.diags.report(DiagKind::FuncConflicted, node.line, "one or more imported names conflict with an existing binding", Some(&lib_name));
                        }
                        LoadSymbols::FileError => {
                            self.err(node, DiagKind::SymbolFileMissingOrCorrupted, "cannot be imported", Some(lib));
                        }
                    }
                }
            }
            ExternKind::Export => {
                for &name in libs {
                    env.outermost().record_export(name);
                }
                let resolve = |s: Symbol| self.interner.resolve(s).to_owned();
                let ok = env
                    .outermost()
                    .save_symbols(&self.paths.sym_path, libs, wildcard, resolve)
                    .unwrap_or(false);
                if !ok {
                    self.err(node, DiagKind::SymbolFileMissingOrCorrupted, "cannot export symbol table", None);
                }
            }
        }
        prim::VOID
    }
}

fn lib_path_for(lib_dir: &Path, lib_name: &str) -> PathBuf {
    lib_dir.join(format!("{lib_name}.saby.sym"))
}

fn paths_equal(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Ast, AstKind, VarDef};

    fn paths() -> CompilerPaths {
        CompilerPaths { lib_path: PathBuf::from("/tmp/lib"), sym_path: PathBuf::from("/tmp/mod.saby.sym") }
    }

    #[test]
    fn constant_folding_input_typechecks_as_number() {
        let mut diags = Diagnostics::new();
        let mut interner = Interner::new();
        let paths = paths();
        let mut az = Analyzer { diags: &mut diags, interner: &mut interner, paths: &paths };
        let env = Env::root();
        let two = Ast::new(1, AstKind::Number(2));
        let three = Ast::new(1, AstKind::Number(3));
        let four = Ast::new(1, AstKind::Number(4));
        let mul = Ast::new(1, AstKind::Binary { form: BinaryForm::Plain(BinOp::Mul), lhs: three, rhs: four });
        let add = Ast::new(1, AstKind::Binary { form: BinaryForm::Plain(BinOp::Add), lhs: two, rhs: mul });
        let ty = az.analyze(&add, &env);
        assert_eq!(ty, prim::NUMBER);
        assert_eq!(diags.errors(), 0);
    }

    #[test]
    fn redefinition_in_same_scope_is_an_error() {
        let mut diags = Diagnostics::new();
        let mut interner = Interner::new();
        let paths = paths();
        let a = interner.intern("a");
        let mut az = Analyzer { diags: &mut diags, interner: &mut interner, paths: &paths };
        let env = Env::root();
        let def1 = Ast::new(1, AstKind::Variable {
            defs: vec![VarDef { name: a, init: Ast::new(1, AstKind::Number(1)) }],
            declared: prim::NUMBER,
        });
        let def2 = Ast::new(2, AstKind::Variable {
            defs: vec![VarDef { name: a, init: Ast::new(2, AstKind::Number(2)) }],
            declared: prim::NUMBER,
        });
        let block = Ast::new(1, AstKind::Block(vec![def1, def2]));
        az.analyze(&block, &env);
        assert_eq!(diags.errors(), 1);
    }

    #[test]
    fn return_outside_function_is_an_error() {
        let mut diags = Diagnostics::new();
        let mut interner = Interner::new();
        let paths = paths();
        let mut az = Analyzer { diags: &mut diags, interner: &mut interner, paths: &paths };
        let env = Env::root();
        let ret = Ast::new(1, AstKind::ControlFlow { kind: CtrlKind::Return, value: None });
        az.analyze(&ret, &env);
        assert_eq!(diags.errors(), 1);
    }

    #[test]
    fn function_return_type_mismatch_is_caught() {
        let mut diags = Diagnostics::new();
        let mut interner = Interner::new();
        let paths = paths();
        let mut az = Analyzer { diags: &mut diags, interner: &mut interner, paths: &paths };
        let env = Env::root();
        let ret = Ast::new(2, AstKind::ControlFlow {
            kind: CtrlKind::Return,
            value: Some(Ast::new(2, AstKind::String("oops".into()))),
        });
        let body = Ast::new(1, AstKind::Block(vec![ret]));
        let func = Ast::new(1, AstKind::Function { args: vec![], return_type: prim::NUMBER, body });
        az.analyze(&func, &env);
        assert_eq!(diags.errors(), 1);
    }

    #[test]
    fn well_typed_function_with_matching_return_has_no_errors() {
        let mut diags = Diagnostics::new();
        let mut interner = Interner::new();
        let paths = paths();
        let mut az = Analyzer { diags: &mut diags, interner: &mut interner, paths: &paths };
        let env = Env::root();
        let ret = Ast::new(2, AstKind::ControlFlow {
            kind: CtrlKind::Return,
            value: Some(Ast::new(2, AstKind::Number(1))),
        });
        let body = Ast::new(1, AstKind::Block(vec![ret]));
        let func = Ast::new(1, AstKind::Function { args: vec![], return_type: prim::NUMBER, body });
        let ty = az.analyze(&func, &env);
        assert_eq!(diags.errors(), 0);
        assert!(types::is_concrete_function(ty));
        assert_eq!(types::ret_of(ty), prim::NUMBER);
    }

    #[test]
    fn call_through_opaque_var_is_a_warning_not_an_error() {
        let mut diags = Diagnostics::new();
        let mut interner = Interner::new();
        let paths = paths();
        let f = interner.intern("f");
        let mut az = Analyzer { diags: &mut diags, interner: &mut interner, paths: &paths };
        let env = Env::root();
        env.insert(f, prim::VAR);
        let callee = Ast::new(1, AstKind::Identifier { name: f, role: IdentifierRole::Reference });
        let call = Ast::new(1, AstKind::Call { callee, args: vec![] });
        let ty = az.analyze(&call, &env);
        assert_eq!(ty, prim::VAR);
        assert_eq!(diags.errors(), 0);
        assert_eq!(diags.warnings(), 1);
    }
}
