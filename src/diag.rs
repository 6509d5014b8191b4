//! Diagnostic accumulation.
//!
//! `original_source/src/analyzer.cpp::PrintError` writes one ANSI-coloured
//! line per error, bumps a running counter, and keeps going so as many
//! errors as possible surface in one pass. The colour escapes are peripheral
//! terminal plumbing (out of scope); the accumulate-and-count shape is kept.

use crate::symbol::Line;
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

/// Every diagnosable condition named in the error-handling design, plus the
/// two warning kinds the original prints but never formalises as errors.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DiagKind {
    UndefinedIdentifier,
    Redefinition,
    TypeMismatch,
    BadOperatorOperand,
    NonLvalueTarget,
    ReturnOutsideFunction,
    ReturnTypeMismatch,
    ArityOverflow,
    ExternOutsideTopScope,
    SymbolFileMissingOrCorrupted,
    CallThroughOpaque,
    SelfImport,
    DuplicateImport,
    FuncConflicted,
    CtrlFlowOutsideLoop,
}

impl DiagKind {
    fn severity(&self) -> Severity {
        match self {
            DiagKind::CallThroughOpaque
            | DiagKind::SelfImport
            | DiagKind::DuplicateImport
            | DiagKind::FuncConflicted => Severity::Warning,
            _ => Severity::Error,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Diagnostic {
    pub kind: DiagKind,
    pub line: Line,
    pub message: String,
    pub ident: Option<String>,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.kind.severity() {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        write!(f, "(line {}): {}: {}", self.line, tag, self.message)?;
        if let Some(id) = &self.ident {
            write!(f, " '{id}'")?;
        }
        Ok(())
    }
}

/// Accumulates diagnostics for one compilation. Mirrors `Analyzer`'s
/// `error_num_` counter, split into errors/warnings per spec so the driver
/// can distinguish "halt codegen" from "print and continue".
#[derive(Default)]
pub struct Diagnostics {
    items: Vec<Diagnostic>,
    errors: u32,
    warnings: u32,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn report(&mut self, kind: DiagKind, line: Line, message: impl Into<String>, ident: Option<&str>) {
        let severity = kind.severity();
        match severity {
            Severity::Error => self.errors += 1,
            Severity::Warning => self.warnings += 1,
        }
        self.items.push(Diagnostic {
            kind,
            line,
            message: message.into(),
            ident: ident.map(str::to_owned),
        });
    }

    pub fn errors(&self) -> u32 {
        self.errors
    }

    pub fn warnings(&self) -> u32 {
        self.warnings
    }

    pub fn has_errors(&self) -> bool {
        self.errors > 0
    }

    pub fn items(&self) -> &[Diagnostic] {
        &self.items
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn warnings_do_not_count_as_errors() {
        let mut d = Diagnostics::new();
        d.report(DiagKind::SelfImport, 1, "module imports itself", Some("io"));
        assert_eq!(d.errors(), 0);
        assert_eq!(d.warnings(), 1);
        assert!(!d.has_errors());
    }

    #[test]
    fn errors_accumulate_and_continue() {
        let mut d = Diagnostics::new();
        d.report(DiagKind::UndefinedIdentifier, 3, "has not been defined", Some("x"));
        d.report(DiagKind::TypeMismatch, 4, "type mismatch", Some("y"));
        assert_eq!(d.errors(), 2);
        assert!(d.has_errors());
        assert_eq!(d.items().len(), 2);
    }
}
