//! C6: the SSA builder.
//!
//! Implements Braun, Buchwald, Hack, Leißa, Mallon, Zwinkau, *Simple and
//! Efficient Construction of Static Single Assignment Form*, verbatim per
//! spec.md §4.5: on-the-fly φ insertion via `read_variable`/
//! `read_variable_recursive`, block sealing, and trivial-φ elimination.
//! AST→SSA dispatch is grounded on `original_source/src/genir.cpp`
//! (`*AST::GenIR`), corrected against spec.md's normative description where
//! the two disagree — notably the if/else-if merge-block wiring, which
//! spec.md states explicitly uses each arm's *tail* block as the predecessor
//! of the join, not its entry (`original_source`'s `irbuilder.cpp` carries a
//! `// TODO: rewrite this file` header and is demonstrably stale there).

use crate::ast::{Ast, AstKind, BinaryForm, CtrlKind, ExternKind, IdentifierRole, UnOp};
use crate::diag::{DiagKind, Diagnostics};
use crate::env::Env;
use crate::optimizer::Optimizer;
use crate::ssa::arena::{Arena, Lit, NodeId, NodeKind, QuadOp};
use crate::symbol::{Interner, Line, Symbol};
use crate::types::{prim, TypeValue};
use bit_set::BitSet;
use hashbrown::HashMap;
use if_chain::if_chain;
use smallvec::SmallVec;

/// The finished translation unit: the node arena, the top-level entry block,
/// and the names `export` selected (empty unless the program exported
/// something).
pub struct Module {
    pub arena: Arena,
    pub entry: NodeId,
    pub exports: Vec<Symbol>,
}

/// Builder state threaded explicitly through generation rather than carried
/// in thread-local/global channels (§9 design note). `current_def`/
/// `incomplete_phis` are the two-level `(block, name) -> value` maps §4.5
/// describes; `sealed` tracks sealed blocks as a dense bitset over arena
/// indices, since block ids are small and allocated densely.
struct Builder<'a> {
    arena: Arena,
    optimizer: &'a Optimizer,
    diags: &'a mut Diagnostics,
    interner: &'a mut Interner,
    env: Env,
    current_def: HashMap<(NodeId, Symbol), NodeId>,
    incomplete_phis: HashMap<(NodeId, Symbol), NodeId>,
    sealed: BitSet,
    current_block: NodeId,
    pred_value: Option<NodeId>,
    break_continue: Vec<(NodeId, NodeId)>,
    exports: Vec<Symbol>,
}

fn zero_lit(ty: TypeValue) -> Lit {
    if ty == prim::FLOAT { Lit::Float(0.0) } else { Lit::Number(0) }
}

fn one_lit(ty: TypeValue) -> Lit {
    if ty == prim::FLOAT { Lit::Float(1.0) } else { Lit::Number(1) }
}

fn lhs_name(node: &Ast) -> Symbol {
    match &node.kind {
        AstKind::Identifier { name, role: IdentifierRole::Reference } => *name,
        _ => unreachable!("the analyzer only accepts an Identifier as an lvalue"),
    }
}

impl<'a> Builder<'a> {
    fn emit(&mut self, node: NodeId) {
        let block = self.current_block;
        self.arena.push_block_insn(block, node);
    }

    fn emit_to(&mut self, block: NodeId, node: NodeId) {
        self.arena.push_block_insn(block, node);
    }

    fn new_block(&mut self) -> NodeId {
        self.arena.alloc(NodeKind::Block {
            is_function: false,
            preds: SmallVec::new(),
            phis: Vec::new(),
            insns: Vec::new(),
        })
    }

    /// `opt_assign` runs over every fresh binding (not only plain `a = b`),
    /// matching how the optimizer is "consulted before every new Quad is
    /// attached" generalised to every new `Variable` (§4.6's `opt_assign`
    /// entrypoint exists precisely for this).
    fn new_variable(&mut self, name: Symbol, value: NodeId) -> NodeId {
        let value = self.optimizer.opt_assign(&mut self.arena, value).unwrap_or(value);
        let var = self.arena.alloc_with_uses(NodeKind::Variable { name, def: value });
        self.write_variable(name, self.current_block, var);
        var
    }

    fn write_variable(&mut self, name: Symbol, block: NodeId, value: NodeId) {
        self.current_def.insert((block, name), value);
    }

    fn read_variable(&mut self, name: Symbol, block: NodeId) -> NodeId {
        if let Some(&v) = self.current_def.get(&(block, name)) {
            return v;
        }
        self.read_variable_recursive(name, block)
    }

    fn read_variable_recursive(&mut self, name: Symbol, block: NodeId) -> NodeId {
        let value = if !self.sealed.contains(block.idx()) {
            if let Some(&existing) = self.incomplete_phis.get(&(block, name)) {
                existing
            } else {
                let phi = self.arena.alloc(NodeKind::Phi { block, operands: SmallVec::new() });
                self.arena.push_block_phi(block, phi);
                self.incomplete_phis.insert((block, name), phi);
                phi
            }
        } else {
            let preds: SmallVec<[NodeId; 2]> = self.arena.preds(block).into();
            if preds.len() == 1 {
                self.read_variable(name, preds[0])
            } else {
                let phi = self.arena.alloc(NodeKind::Phi { block, operands: SmallVec::new() });
                self.arena.push_block_phi(block, phi);
                self.write_variable(name, block, phi);
                self.add_phi_operands(name, phi)
            }
        };
        self.write_variable(name, block, value);
        value
    }

    fn add_phi_operands(&mut self, name: Symbol, phi: NodeId) -> NodeId {
        let block = match self.arena.kind(phi) {
            NodeKind::Phi { block, .. } => *block,
            _ => unreachable!("add_phi_operands on a non-Phi node"),
        };
        let preds: SmallVec<[NodeId; 2]> = self.arena.preds(block).into();
        for pred in preds {
            let v = self.read_variable(name, pred);
            self.arena.add_phi_operand(phi, v);
        }
        self.try_remove_trivial_phi(phi)
    }

    /// Braun et al.'s trivial-φ elimination. `phi` may itself no longer be a
    /// live φ by the time a recursive call reaches it (its users were
    /// snapshotted before any rerouting); matching on its current kind rather
    /// than assuming `Phi` guards against revisiting an already-collapsed node.
    fn try_remove_trivial_phi(&mut self, phi: NodeId) -> NodeId {
        let (block, operands) = match self.arena.kind(phi) {
            NodeKind::Phi { block, operands } => (*block, operands.clone()),
            _ => return phi,
        };
        let mut same: Option<NodeId> = None;
        for op in operands {
            if Some(op) == same || op == phi {
                continue;
            }
            if same.is_some() {
                return phi; // merges at least two distinct values: not trivial
            }
            same = Some(op);
        }
        let same = same.unwrap_or_else(|| self.arena.alloc(NodeKind::Undef));
        let users: Vec<NodeId> =
            self.arena.uses(phi).iter().map(|u| u.user).filter(|&u| u != phi).collect();
        self.arena.replace_all_uses_with(phi, same);
        self.arena.remove_block_phi(block, phi);
        for user in users {
            if self.arena.kind(user).is_phi() {
                self.try_remove_trivial_phi(user);
            }
        }
        same
    }

    /// Sealing an already-sealed block is a no-op (Testable Property 5).
    fn seal_block(&mut self, block: NodeId) {
        let idx = block.idx();
        if self.sealed.contains(idx) {
            return;
        }
        let pending: Vec<Symbol> = self
            .incomplete_phis
            .keys()
            .filter(|(b, _)| *b == block)
            .map(|(_, n)| *n)
            .collect();
        for name in pending {
            if let Some(&phi) = self.incomplete_phis.get(&(block, name)) {
                self.add_phi_operands(name, phi);
            }
        }
        self.sealed.insert(idx);
    }

    fn tmp_name(&mut self) -> Symbol {
        self.interner.intern("__tmp")
    }

    fn gen(&mut self, node: &Ast) -> Option<NodeId> {
        match &node.kind {
            AstKind::Identifier { name, role } => match role {
                IdentifierRole::Reference => {
                    let block = self.current_block;
                    Some(self.read_variable(*name, block))
                }
                IdentifierRole::ArgDecl(_) => None,
            },

            AstKind::Variable { defs, .. } => {
                for def in defs {
                    let init = self
                        .gen(&def.init)
                        .expect("a well-typed initializer always produces a value");
                    let var = self.new_variable(def.name, init);
                    self.emit(var);
                }
                None
            }

            AstKind::Number(n) => Some(self.arena.alloc(NodeKind::Value(Lit::Number(*n)))),
            AstKind::Decimal(f) => Some(self.arena.alloc(NodeKind::Value(Lit::Float(*f)))),
            AstKind::String(s) => Some(self.arena.alloc(NodeKind::Value(Lit::String(s.clone())))),

            AstKind::Binary { form, lhs, rhs } => self.gen_binary(*form, lhs, rhs),
            AstKind::Unary { op, operand } => self.gen_unary(*op, operand),
            AstKind::Call { callee, args } => self.gen_call(callee, args, node.ty()),
            AstKind::Block(stmts) => self.gen_block(stmts),
            AstKind::Function { args, body, .. } => self.gen_function(args, body),

            AstKind::Asm(text) => {
                let n = self.arena.alloc(NodeKind::Asm { text: text.clone() });
                self.emit(n);
                None
            }

            AstKind::If { cond, then, else_then } => self.gen_if(cond, then, else_then.as_deref()),
            AstKind::While { cond, body } => self.gen_while(cond, body),
            AstKind::ControlFlow { kind, value } => {
                self.gen_ctrlflow(node.line, *kind, value.as_deref())
            }
            AstKind::External { kind, libs, wildcard } => self.gen_external(*kind, libs, *wildcard),
        }
    }

    fn gen_binary(&mut self, form: BinaryForm, lhs: &Ast, rhs: &Ast) -> Option<NodeId> {
        match form {
            BinaryForm::Assign => {
                let name = lhs_name(lhs);
                let rv = self.gen(rhs)?;
                let var = self.new_variable(name, rv);
                self.emit(var);
                Some(var)
            }
            BinaryForm::CompoundAssign(op) => {
                let name = lhs_name(lhs);
                let block = self.current_block;
                let old = self.read_variable(name, block);
                let rv = self.gen(rhs)?;
                let qop = op.to_quad_op();
                let ty = lhs.ty();
                let value = self
                    .optimizer
                    .opt_binary(&mut self.arena, qop, old, rv, ty)
                    .unwrap_or_else(|| self.arena.alloc_with_uses(NodeKind::Quad { op: qop, lhs: old, rhs: Some(rv) }));
                let var = self.new_variable(name, value);
                self.emit(var);
                Some(var)
            }
            BinaryForm::Plain(op) => {
                let lv = self.gen(lhs)?;
                let rv = self.gen(rhs)?;
                let qop = op.to_quad_op();
                let ty = lhs.ty();
                let value = self
                    .optimizer
                    .opt_binary(&mut self.arena, qop, lv, rv, ty)
                    .unwrap_or_else(|| self.arena.alloc_with_uses(NodeKind::Quad { op: qop, lhs: lv, rhs: Some(rv) }));
                let tmp = self.tmp_name();
                let var = self.new_variable(tmp, value);
                self.emit(var);
                Some(var)
            }
        }
    }

    fn gen_unary(&mut self, op: UnOp, operand: &Ast) -> Option<NodeId> {
        match op {
            UnOp::ConvNum | UnOp::ConvDec | UnOp::ConvStr | UnOp::Not => {
                let opval = self.gen(operand)?;
                let qop = match op {
                    UnOp::ConvNum => QuadOp::ConvNum,
                    UnOp::ConvDec => QuadOp::ConvDec,
                    UnOp::ConvStr => QuadOp::ConvStr,
                    UnOp::Not => QuadOp::Not,
                    _ => unreachable!(),
                };
                let value = self
                    .optimizer
                    .opt_unary(&mut self.arena, qop, opval)
                    .unwrap_or_else(|| self.arena.alloc_with_uses(NodeKind::Quad { op: qop, lhs: opval, rhs: None }));
                let tmp = self.tmp_name();
                let var = self.new_variable(tmp, value);
                self.emit(var);
                Some(var)
            }
            UnOp::Neg => {
                let opval = self.gen(operand)?;
                let ty = operand.ty();
                let zero = self.arena.alloc(NodeKind::Value(zero_lit(ty)));
                let value = self
                    .optimizer
                    .opt_binary(&mut self.arena, QuadOp::Sub, zero, opval, ty)
                    .unwrap_or_else(|| self.arena.alloc_with_uses(NodeKind::Quad { op: QuadOp::Sub, lhs: zero, rhs: Some(opval) }));
                let tmp = self.tmp_name();
                let var = self.new_variable(tmp, value);
                self.emit(var);
                Some(var)
            }
            UnOp::Inc | UnOp::Dec => {
                let name = lhs_name(operand);
                let block = self.current_block;
                let old = self.read_variable(name, block);
                let ty = operand.ty();
                let one = self.arena.alloc(NodeKind::Value(one_lit(ty)));
                let qop = if op == UnOp::Inc { QuadOp::Add } else { QuadOp::Sub };
                let value = self
                    .optimizer
                    .opt_binary(&mut self.arena, qop, old, one, ty)
                    .unwrap_or_else(|| self.arena.alloc_with_uses(NodeKind::Quad { op: qop, lhs: old, rhs: Some(one) }));
                let var = self.new_variable(name, value);
                self.emit(var);
                Some(var)
            }
        }
    }

    fn gen_call(&mut self, callee: &Ast, args: &[crate::ast::AstNode], ret_ty: TypeValue) -> Option<NodeId> {
        let callee_val = self.gen(callee)?;
        let mut setters: SmallVec<[NodeId; 4]> = SmallVec::new();
        for (i, a) in args.iter().enumerate() {
            let av = self.gen(a)?;
            let setter = self.arena.alloc_with_uses(NodeKind::ArgSetter { index: i as u32, operand: av });
            self.emit(setter);
            setters.push(setter);
        }
        let call = self.arena.alloc_with_uses(NodeKind::Call { callee: callee_val, args: setters });
        self.emit(call);
        if ret_ty == prim::VOID {
            None
        } else {
            let getter = self.arena.alloc_with_uses(NodeKind::RtnGetter { call });
            let tmp = self.interner.intern("__rtn");
            let var = self.new_variable(tmp, getter);
            self.emit(var);
            Some(var)
        }
    }

    /// Always creates a fresh block, optionally wiring (and sealing) the
    /// pending predecessor passed through `pred_value` by the enclosing
    /// if/while/function dispatch. Returns the new block's own id; the
    /// *tail* block reached after lowering `stmts` (which may differ, if a
    /// nested `if`/`while` moved `current_block` onward) is read back by the
    /// caller via `self.current_block`.
    fn gen_block(&mut self, stmts: &[crate::ast::AstNode]) -> Option<NodeId> {
        let block = self.new_block();
        self.current_block = block;
        if let Some(pred) = self.pred_value.take() {
            self.arena.add_pred(block, pred);
            self.seal_block(block);
        }
        for s in stmts {
            self.gen(s);
        }
        Some(block)
    }

    fn gen_function(&mut self, args: &[crate::ast::AstNode], body: &Ast) -> Option<NodeId> {
        let old_block = self.current_block;
        let old_pred = self.pred_value.take();
        let entry = self.new_block();
        self.seal_block(entry);
        self.current_block = entry;

        for (i, a) in args.iter().enumerate() {
            if let AstKind::Identifier { name, role: IdentifierRole::ArgDecl(_) } = &a.kind {
                let getter = self.arena.alloc_with_uses(NodeKind::ArgGetter { index: i as u32 });
                let var = self.new_variable(*name, getter);
                self.emit(var);
            }
        }

        let at_sym = self.interner.intern("@");
        let at_var = self.new_variable(at_sym, entry);
        self.emit(at_var);
        if let Some(fn_env) = body.env() {
            fn_env.bind_id(at_sym, at_var);
        }

        self.pred_value = Some(entry);
        let body_entry = self.gen(body).expect("a function body is always a Block node");
        let body_tail = self.current_block;
        self.pred_value = old_pred;

        let jump_to_body = self.arena.alloc_with_uses(NodeKind::Jump { target: body_entry, cond: None });
        self.emit_to(entry, jump_to_body);

        // Unconditionally appended, matching `genir.cpp`'s own "add 'return'
        // in the end of function anyway" — even a body already ending in a
        // `Return` gets a second, unreachable one after it.
        let ret = self.arena.alloc_with_uses(NodeKind::Return { value: None });
        self.emit_to(body_tail, ret);

        self.arena.set_is_function(entry, true);
        self.current_block = old_block;
        Some(entry)
    }

    /// `if`/`else if`/`else` lowering, merging at a join block whose
    /// predecessors are each arm's *tail* (spec.md §4.5), synthesising an
    /// intermediate sealed block for an `else if` so the nested `If`'s own
    /// "current block" lands there instead of a redundant extra block.
    fn gen_if(&mut self, cond: &Ast, then: &Ast, else_then: Option<&Ast>) -> Option<NodeId> {
        let entry = self.current_block;
        let cond_val = self.gen(cond)?;

        self.pred_value = Some(entry);
        let if_block = self.gen(then)?;
        let if_tail = self.current_block;
        self.pred_value = None;

        let (else_block, else_tail) = if let Some(e) = else_then {
            if_chain! {
                if let AstKind::If { .. } = &e.kind;
                then {
                    let synth = self.new_block();
                    self.arena.add_pred(synth, entry);
                    self.seal_block(synth);
                    self.current_block = synth;
                    let tail = self.gen(e).expect("an If node always yields its end block");
                    (Some(synth), tail)
                } else {
                    self.pred_value = Some(entry);
                    let else_entry = self.gen(e).expect("an else-branch Block always yields its entry");
                    let tail = self.current_block;
                    self.pred_value = None;
                    (Some(else_entry), tail)
                }
            }
        } else {
            (None, entry)
        };

        let end = self.new_block();
        self.arena.add_pred(end, if_tail);
        self.arena.add_pred(end, else_tail);
        self.seal_block(end);

        let jump_cond = self.arena.alloc_with_uses(NodeKind::Jump { target: if_block, cond: Some(cond_val) });
        self.emit_to(entry, jump_cond);
        let jump_if_to_end = self.arena.alloc_with_uses(NodeKind::Jump { target: end, cond: None });
        self.emit_to(if_tail, jump_if_to_end);

        if let Some(eb) = else_block {
            let jump_else = self.arena.alloc_with_uses(NodeKind::Jump { target: eb, cond: None });
            self.emit_to(entry, jump_else);
            let jump_else_to_end = self.arena.alloc_with_uses(NodeKind::Jump { target: end, cond: None });
            self.emit_to(else_tail, jump_else_to_end);
        } else {
            let jump_entry_to_end = self.arena.alloc_with_uses(NodeKind::Jump { target: end, cond: None });
            self.emit_to(entry, jump_entry_to_end);
        }

        self.current_block = end;
        Some(end)
    }

    fn gen_while(&mut self, cond: &Ast, body: &Ast) -> Option<NodeId> {
        let cur = self.current_block;
        let entry = self.new_block();
        self.arena.add_pred(entry, cur);
        self.current_block = entry;
        let cond_val = self.gen(cond)?;

        // Neither `entry` (the loop header, which also gains a back-edge
        // pred from the body and possibly `continue`s) nor `end` (which
        // gains a pred per `break`) may be sealed until the whole body has
        // been walked and every such edge is registered.
        let end = self.new_block();
        self.arena.add_pred(end, entry);

        self.pred_value = Some(entry);
        self.break_continue.push((end, entry));
        let body_block = self.gen(body).expect("a while body is always a Block node");
        let body_tail = self.current_block;
        self.break_continue.pop();
        self.pred_value = None;

        self.arena.add_pred(entry, body_tail);
        self.seal_block(entry);
        self.seal_block(end);

        let jump_to_entry = self.arena.alloc_with_uses(NodeKind::Jump { target: entry, cond: None });
        self.emit_to(cur, jump_to_entry);
        let jump_body = self.arena.alloc_with_uses(NodeKind::Jump { target: body_block, cond: Some(cond_val) });
        self.emit_to(entry, jump_body);
        let jump_end = self.arena.alloc_with_uses(NodeKind::Jump { target: end, cond: None });
        self.emit_to(entry, jump_end);
        let jump_back = self.arena.alloc_with_uses(NodeKind::Jump { target: entry, cond: None });
        self.emit_to(body_tail, jump_back);

        self.current_block = end;
        None
    }

    fn gen_ctrlflow(&mut self, line: Line, kind: CtrlKind, value: Option<&Ast>) -> Option<NodeId> {
        match kind {
            CtrlKind::Return => {
                let v = value.and_then(|v| self.gen(v));
                let node = self.arena.alloc_with_uses(NodeKind::Return { value: v });
                self.emit(node);
            }
            CtrlKind::Break => match self.break_continue.last() {
                Some(&(end, _)) => {
                    self.arena.add_pred(end, self.current_block);
                    let j = self.arena.alloc_with_uses(NodeKind::Jump { target: end, cond: None });
                    self.emit(j);
                }
                None => {
                    self.diags.report(DiagKind::CtrlFlowOutsideLoop, line, "'break' outside of a loop", None);
                }
            },
            CtrlKind::Continue => match self.break_continue.last() {
                Some(&(_, entry)) => {
                    self.arena.add_pred(entry, self.current_block);
                    let j = self.arena.alloc_with_uses(NodeKind::Jump { target: entry, cond: None });
                    self.emit(j);
                }
                None => {
                    self.diags.report(DiagKind::CtrlFlowOutsideLoop, line, "'continue' outside of a loop", None);
                }
            },
        }
        None
    }

    /// Per `original_source/src/genir.cpp::ExternalAST::GenIR`: an `import`
    /// re-walks every qualified name loaded so far (not only the libraries
    /// this particular statement names) and (re-)materialises an
    /// `ExternFunc` + bound `Variable` for each. The `Variable`'s *displayed*
    /// name is the short form (everything after the first `.`, §B.5), but
    /// the SSA definition is written back under the full qualified symbol:
    /// `Environment::load_symbols` (C2) binds the analyzer's type table under
    /// `lib.name` specifically to keep two libraries exporting the same
    /// short name from colliding (§4.2), so a call site's callee `Identifier`
    /// — resolved against that same environment — always carries the
    /// qualified name, and `read_variable` must be able to find this
    /// definition under that same key. `export` copies the analyzer-recorded
    /// export list into the module.
    fn gen_external(&mut self, kind: ExternKind, _libs: &[Symbol], _wildcard: bool) -> Option<NodeId> {
        match kind {
            ExternKind::Import => {
                let qualified_names = self.env.imported_names();
                for qualified in qualified_names {
                    let short = qualified.split_once('.').map_or(qualified.as_str(), |(_, rest)| rest);
                    let short_sym = self.interner.intern(short);
                    let qualified_sym = self.interner.intern(&qualified);
                    let ext = self.arena.alloc(NodeKind::ExternFunc { qualified_name: qualified });
                    let value = self.optimizer.opt_assign(&mut self.arena, ext).unwrap_or(ext);
                    let var = self.arena.alloc_with_uses(NodeKind::Variable { name: short_sym, def: value });
                    self.write_variable(qualified_sym, self.current_block, var);
                    self.emit(var);
                }
            }
            ExternKind::Export => {
                self.exports = self.env.exported_names();
            }
        }
        None
    }
}

/// Translates a type-checked, analyzer-annotated top-level statement list
/// into one [`Module`]. `env` must be the same root [`Env`] the analyzer ran
/// the program's semantic pass over, so that `gen_external` sees the same
/// import/export bookkeeping C5 recorded.
pub fn build(
    program: &[crate::ast::AstNode],
    optimizer: &Optimizer,
    diags: &mut Diagnostics,
    interner: &mut Interner,
    env: &Env,
) -> Module {
    let mut arena = Arena::new();
    let entry = arena.alloc(NodeKind::Block {
        is_function: false,
        preds: SmallVec::new(),
        phis: Vec::new(),
        insns: Vec::new(),
    });
    let mut b = Builder {
        arena,
        optimizer,
        diags,
        interner,
        env: env.clone(),
        current_def: HashMap::new(),
        incomplete_phis: HashMap::new(),
        sealed: BitSet::new(),
        current_block: entry,
        pred_value: None,
        break_continue: Vec::new(),
        exports: Vec::new(),
    };
    b.seal_block(entry);
    for stmt in program {
        b.gen(stmt);
    }
    Module { arena: b.arena, entry, exports: b.exports }
}
