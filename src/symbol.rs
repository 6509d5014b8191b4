//! Interned identifiers and source spans.
//!
//! Mirrors the role of `mmcc`'s `Symbol`/span machinery: every identifier
//! seen by the analyzer or builder is interned once so that later
//! comparisons and hash-map lookups are a `u32` compare instead of a string
//! compare.

use hashbrown::HashMap;
use std::fmt;

/// An interned identifier. Cheap to copy, compare and hash.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Symbol(u32);

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Symbol({})", self.0)
    }
}

/// String interner. Both the analyzer's environments and the builder's
/// per-block definition maps key on `Symbol` rather than `String` so that
/// cloning a scope (`im::HashMap`) never touches heap-allocated text.
#[derive(Default)]
pub struct Interner {
    names: Vec<Box<str>>,
    ids: HashMap<Box<str>, Symbol>,
}

impl Interner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&mut self, s: &str) -> Symbol {
        if let Some(&sym) = self.ids.get(s) {
            return sym;
        }
        let sym = Symbol(self.names.len() as u32);
        let boxed: Box<str> = s.into();
        self.names.push(boxed.clone());
        self.ids.insert(boxed, sym);
        sym
    }

    pub fn resolve(&self, sym: Symbol) -> &str {
        &self.names[sym.0 as usize]
    }
}

/// A 1-based source line number, the only span granularity the original
/// diagnostics carry (`Lexer::line_pos`). `Ast` and `Diagnostic` both carry
/// this directly rather than through a wrapper type.
pub type Line = u32;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_is_idempotent() {
        let mut it = Interner::new();
        let a = it.intern("foo");
        let b = it.intern("bar");
        let c = it.intern("foo");
        assert_eq!(a, c);
        assert_ne!(a, b);
        assert_eq!(it.resolve(a), "foo");
        assert_eq!(it.resolve(b), "bar");
    }
}
