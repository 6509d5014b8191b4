//! C2: lexically scoped environments.
//!
//! A chain of scopes with a parent link, as `original_source/src/symbol.h`
//! describes (`Environment::outer_`). `im::HashMap` gives each child scope a
//! structurally-shared copy of its parent's table instead of the original's
//! shared-pointer chain walk, which matters once nested blocks and
//! functions are entered/left at high frequency during SSA construction.

use crate::ssa::NodeId;
use crate::symbol::Symbol;
use crate::symtab::{self, SymError, SymRecord};
use crate::types::{self, TypeValue};
use hashbrown::{HashMap, HashSet};
use itertools::Itertools;
use std::cell::RefCell;
use std::fs::File;
use std::hash::{Hash, Hasher};
use std::io::BufWriter;
use std::path::Path;
use std::rc::Rc;

/// Outcome of `load_symbols`, matching `original_source`'s `LoadEnvReturn`.
#[derive(Debug, PartialEq, Eq)]
pub enum LoadSymbols {
    Success,
    FileError,
    LibConflicted,
    FuncConflicted,
}

/// Metadata only the outermost scope in a compilation carries: import-file
/// de-duplication, the list of imported qualified names, and the list of
/// names an `export` directive should serialize.
#[derive(Default)]
struct TopMeta {
    lib_hashes: HashSet<u64>,
    imported: Vec<String>,
    exported: Vec<Symbol>,
}

struct EnvData {
    outer: Option<Env>,
    table: im::HashMap<Symbol, TypeValue>,
    ssa_ids: HashMap<Symbol, NodeId>,
    top: Option<TopMeta>,
}

/// A scope handle. Cheap to clone (an `Rc`); scopes are created on block or
/// function entry and simply dropped on exit, except the outermost scope,
/// which lives for the whole compilation (§3).
#[derive(Clone)]
pub struct Env(Rc<RefCell<EnvData>>);

impl Env {
    /// Creates the outermost, cross-module scope.
    pub fn root() -> Self {
        Env(Rc::new(RefCell::new(EnvData {
            outer: None,
            table: im::HashMap::new(),
            ssa_ids: HashMap::new(),
            top: Some(TopMeta::default()),
        })))
    }

    /// Opens a nested scope (block or function body entry).
    pub fn new_child(&self) -> Env {
        Env(Rc::new(RefCell::new(EnvData {
            outer: Some(self.clone()),
            table: im::HashMap::new(),
            ssa_ids: HashMap::new(),
            top: None,
        })))
    }

    pub fn outer(&self) -> Option<Env> {
        self.0.borrow().outer.clone()
    }

    /// Recursively walks to the scope with no parent.
    pub fn outermost(&self) -> Env {
        match self.outer() {
            Some(o) => o.outermost(),
            None => self.clone(),
        }
    }

    /// Binds `id` in this scope (shadowing any outer binding of the same
    /// name). The analyzer is responsible for rejecting redefinition in the
    /// *current* scope before calling this; `insert` itself is unconditional.
    pub fn insert(&self, id: Symbol, ty: TypeValue) {
        self.0.borrow_mut().table.insert(id, ty);
    }

    /// Looks up `id`. With `recursive = false`, only the current scope's own
    /// table is consulted (used by redefinition checks); with `recursive =
    /// true`, walks outward until found.
    pub fn lookup(&self, id: Symbol, recursive: bool) -> Option<TypeValue> {
        if let Some(&t) = self.0.borrow().table.get(&id) {
            return Some(t);
        }
        if recursive {
            if let Some(outer) = self.outer() {
                return outer.lookup(id, true);
            }
        }
        None
    }

    /// Rewrites `id`'s binding in the nearest enclosing scope that has one.
    /// A no-op if no scope on the chain binds `id` (§4.2).
    pub fn assign(&self, id: Symbol, ty: TypeValue) {
        if self.0.borrow().table.contains_key(&id) {
            self.0.borrow_mut().table.insert(id, ty);
            return;
        }
        if let Some(outer) = self.outer() {
            outer.assign(id, ty);
        }
    }

    /// The per-variable SSA node identity binding used by the builder (the
    /// synthetic `"@"` self-reference in particular — see §B.6 of the
    /// expanded specification). Recursive like `lookup`.
    pub fn id_binding(&self, id: Symbol) -> Option<NodeId> {
        if let Some(&n) = self.0.borrow().ssa_ids.get(&id) {
            return Some(n);
        }
        self.outer().and_then(|o| o.id_binding(id))
    }

    pub fn bind_id(&self, id: Symbol, node: NodeId) {
        self.0.borrow_mut().ssa_ids.insert(id, node);
    }

    fn with_top<T>(&self, f: impl FnOnce(&mut TopMeta) -> T) -> T {
        let top = self.outermost();
        let mut data = top.0.borrow_mut();
        f(data.top.as_mut().expect("outermost scope always carries TopMeta"))
    }

    pub fn record_export(&self, name: Symbol) {
        self.with_top(|t| t.exported.push(name));
    }

    pub fn exported_names(&self) -> Vec<Symbol> {
        self.with_top(|t| t.exported.clone())
    }

    /// Writes `names` (or, on an empty list standing for `*`, every binding
    /// whose type is a concrete function signature) to `path` as a `.sym`
    /// file (C8). `wildcard` selects the `export *` behaviour explicitly
    /// rather than overloading an empty `names` list, so `export` with a
    /// genuinely empty list (a no-op program) never silently dumps the
    /// whole table.
    pub fn save_symbols(&self, path: &Path, names: &[Symbol], wildcard: bool, resolve: impl Fn(Symbol) -> String) -> Result<bool, SymError> {
        let mut records = Vec::new();
        if wildcard {
            // `im::HashMap` iteration order isn't deterministic across runs;
            // a `.sym` file should be stable byte-for-byte given the same
            // source, so the wildcard sweep sorts by name before writing.
            let funcs = self.0.borrow().table.iter()
                .filter(|(_, &ty)| types::is_concrete_function(ty))
                .map(|(&sym, &ty)| (resolve(sym), ty))
                .sorted_by(|a, b| a.0.cmp(&b.0))
                .collect::<Vec<_>>();
            for (name, ty) in funcs {
                records.push(SymRecord { name, ty });
            }
        } else {
            for &name in names {
                match self.lookup(name, false) {
                    Some(ty) => records.push(SymRecord { name: resolve(name), ty }),
                    None => return Ok(false),
                }
            }
        }
        let file = File::create(path)?;
        let mut w = BufWriter::new(file);
        symtab::write_symbols(&mut w, &records)?;
        Ok(true)
    }

    /// Loads `path`'s records into the outermost scope, namespaced under
    /// `lib_name.`. Refuses to re-load a path already imported (hashed via
    /// `DefaultHasher` over the absolute path, mirroring
    /// `std::hash<std::string>` over the path string in the original).
    /// Qualified names are interned through `interner` as they're read,
    /// since the environment holds only `Symbol`s, never raw text.
    pub fn load_symbols(&self, path: &Path, lib_name: &str, interner: &mut crate::symbol::Interner) -> LoadSymbols {
        let top = self.outermost();
        let canon = match path.canonicalize() {
            Ok(p) => p,
            Err(_) => return LoadSymbols::FileError,
        };
        let hash = {
            let mut h = std::collections::hash_map::DefaultHasher::new();
            canon.to_string_lossy().hash(&mut h);
            h.finish()
        };
        {
            let mut data = top.0.borrow_mut();
            let meta = data.top.as_mut().expect("outermost scope always carries TopMeta");
            if !meta.lib_hashes.insert(hash) {
                return LoadSymbols::LibConflicted;
            }
        }
        let file = match File::open(&canon) {
            Ok(f) => f,
            Err(_) => return LoadSymbols::FileError,
        };
        let mut r = std::io::BufReader::new(file);
        let records = match symtab::read_symbols(&mut r) {
            Ok(r) => r,
            Err(_) => return LoadSymbols::FileError,
        };
        let mut conflicted = false;
        {
            let mut data = top.0.borrow_mut();
            for rec in &records {
                let qualified = format!("{lib_name}.{}", rec.name);
                let sym = interner.intern(&qualified);
                if data.table.contains_key(&sym) {
                    conflicted = true;
                    continue;
                }
                data.table.insert(sym, rec.ty);
            }
            let meta = data.top.as_mut().unwrap();
            for rec in &records {
                meta.imported.push(format!("{lib_name}.{}", rec.name));
            }
        }
        if conflicted {
            LoadSymbols::FuncConflicted
        } else {
            LoadSymbols::Success
        }
    }

    pub fn imported_names(&self) -> Vec<String> {
        self.with_top(|t| t.imported.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbol::Interner;
    use crate::types::prim;

    #[test]
    fn lookup_is_recursive_and_respects_shadowing() {
        let mut it = Interner::new();
        let x = it.intern("x");
        let root = Env::root();
        root.insert(x, prim::NUMBER);
        let child = root.new_child();
        assert_eq!(child.lookup(x, true), Some(prim::NUMBER));
        assert_eq!(child.lookup(x, false), None);
        child.insert(x, prim::FLOAT);
        assert_eq!(child.lookup(x, false), Some(prim::FLOAT));
        assert_eq!(root.lookup(x, true), Some(prim::NUMBER));
    }

    #[test]
    fn assign_rewrites_nearest_enclosing_binding() {
        let mut it = Interner::new();
        let x = it.intern("x");
        let root = Env::root();
        root.insert(x, prim::NUMBER);
        let child = root.new_child();
        child.assign(x, prim::FLOAT);
        assert_eq!(root.lookup(x, true), Some(prim::FLOAT));
        assert_eq!(child.lookup(x, false), None);
    }

    #[test]
    fn assign_is_noop_when_unbound_anywhere() {
        let mut it = Interner::new();
        let y = it.intern("y");
        let root = Env::root();
        root.assign(y, prim::NUMBER);
        assert_eq!(root.lookup(y, true), None);
    }

    #[test]
    fn outermost_walks_to_the_root() {
        let root = Env::root();
        let a = root.new_child();
        let b = a.new_child();
        assert!(Rc::ptr_eq(&b.outermost().0, &root.0));
    }

    #[test]
    fn export_wildcard_then_import_round_trips_function_symbols() {
        let mut it = Interner::new();
        let print_fn = it.intern("print");
        let answer = it.intern("answer");
        let root = Env::root();
        let sig = crate::types::encode_function(&[prim::STRING], prim::VOID);
        root.insert(print_fn, sig);
        root.insert(answer, prim::NUMBER);

        let dir = tempfile::tempdir().unwrap();
        let sym_path = dir.path().join("io.saby.sym");
        let ok = root
            .save_symbols(&sym_path, &[], true, |s| it.resolve(s).to_owned())
            .unwrap();
        assert!(ok);

        let importer = Env::root();
        let status = importer.load_symbols(&sym_path, "io", &mut it);
        assert_eq!(status, LoadSymbols::Success);
        let qualified = it.intern("io.print");
        assert_eq!(importer.lookup(qualified, true), Some(sig));
        assert_eq!(importer.lookup(it.intern("io.answer"), true), None);
    }

    #[test]
    fn re_importing_the_same_path_is_reported_as_conflicted() {
        let mut it = Interner::new();
        let root = Env::root();
        let dir = tempfile::tempdir().unwrap();
        let sym_path = dir.path().join("io.saby.sym");
        root.save_symbols(&sym_path, &[], true, |s| it.resolve(s).to_owned()).unwrap();
        assert_eq!(root.load_symbols(&sym_path, "io", &mut it), LoadSymbols::Success);
        assert_eq!(root.load_symbols(&sym_path, "io", &mut it), LoadSymbols::LibConflicted);
    }
}
