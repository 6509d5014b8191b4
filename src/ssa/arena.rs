//! The SSA node arena: C4's closed variant set plus C3's use-def bookkeeping.

use crate::symbol::Symbol;
use crate::types::TypeValue;
use smallvec::{smallvec, SmallVec};

/// Index into an [`Arena`]. `u32` keeps nodes dense and `Copy`, matching the
/// handle pattern `dejavu`'s `back::ssa` module uses for its own IR values.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    pub(crate) fn idx(self) -> usize {
        self.0 as usize
    }

    /// Only for iterating every id an arena currently holds (tests, the
    /// builder's sealed-block bitset key).
    pub(crate) fn from_raw(i: u32) -> Self {
        NodeId(i)
    }
}

impl std::fmt::Debug for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// A literal immediate. Literals are not block-resident (§3: "not block-
/// resident" for literals) — they exist purely as operands.
#[derive(Clone, Debug, PartialEq)]
pub enum Lit {
    Number(i64),
    Float(f64),
    String(String),
}

/// The fixed operator set a `Quad` may carry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QuadOp {
    ConvNum,
    ConvDec,
    ConvStr,
    And,
    Xor,
    Or,
    Not,
    Shl,
    Shr,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Less,
    LessEq,
    Greater,
    GreaterEq,
    Equal,
    NotEqual,
}

impl QuadOp {
    pub fn is_unary(self) -> bool {
        matches!(self, QuadOp::ConvNum | QuadOp::ConvDec | QuadOp::ConvStr | QuadOp::Not)
    }
}

/// The closed SSA node variant set from §3. `Block` and `Phi` live
/// side-by-side with the other variants in the same arena rather than as
/// distinct owner types; `Block::phis` is the header list, `Block::insns`
/// the insertion-ordered body.
#[derive(Clone, Debug)]
pub enum NodeKind {
    Value(Lit),
    ArgGetter { index: u32 },
    ArgSetter { index: u32, operand: NodeId },
    ExternFunc { qualified_name: String },
    Phi { block: NodeId, operands: SmallVec<[NodeId; 4]> },
    Block { is_function: bool, preds: SmallVec<[NodeId; 2]>, phis: Vec<NodeId>, insns: Vec<NodeId> },
    Jump { target: NodeId, cond: Option<NodeId> },
    Call { callee: NodeId, args: SmallVec<[NodeId; 4]> },
    RtnGetter { call: NodeId },
    Return { value: Option<NodeId> },
    Quad { op: QuadOp, lhs: NodeId, rhs: Option<NodeId> },
    Variable { name: Symbol, def: NodeId },
    Asm { text: String },
    Undef,
}

impl NodeKind {
    /// The data-operand list of this node, in the order `UseEdge::index`
    /// addresses. Structural block links (`preds`, `phis`, `insns`) are not
    /// data uses and are excluded.
    pub fn operands(&self) -> SmallVec<[NodeId; 4]> {
        match self {
            NodeKind::ArgSetter { operand, .. } => smallvec![*operand],
            NodeKind::Phi { operands, .. } => operands.clone(),
            NodeKind::Jump { target, cond } => {
                let mut v: SmallVec<[NodeId; 4]> = smallvec![*target];
                if let Some(c) = cond {
                    v.push(*c);
                }
                v
            }
            NodeKind::Call { callee, args } => {
                let mut v: SmallVec<[NodeId; 4]> = smallvec![*callee];
                v.extend(args.iter().copied());
                v
            }
            NodeKind::RtnGetter { call } => smallvec![*call],
            NodeKind::Return { value } => value.iter().copied().collect(),
            NodeKind::Quad { lhs, rhs, .. } => {
                let mut v: SmallVec<[NodeId; 4]> = smallvec![*lhs];
                if let Some(r) = rhs {
                    v.push(*r);
                }
                v
            }
            NodeKind::Variable { def, .. } => smallvec![*def],
            _ => SmallVec::new(),
        }
    }

    fn set_operand(&mut self, index: usize, new: NodeId) {
        match self {
            NodeKind::ArgSetter { operand, .. } => *operand = new,
            NodeKind::Phi { operands, .. } => operands[index] = new,
            NodeKind::Jump { target, cond } => {
                if index == 0 {
                    *target = new;
                } else if cond.is_some() {
                    *cond = Some(new);
                }
            }
            NodeKind::Call { callee, args } => {
                if index == 0 {
                    *callee = new;
                } else {
                    args[index - 1] = new;
                }
            }
            NodeKind::RtnGetter { call } => *call = new,
            NodeKind::Return { value } => *value = Some(new),
            NodeKind::Quad { lhs, rhs, .. } => {
                if index == 0 {
                    *lhs = new;
                } else if rhs.is_some() {
                    *rhs = Some(new);
                }
            }
            NodeKind::Variable { def, .. } => *def = new,
            _ => {}
        }
    }

    pub fn is_phi(&self) -> bool {
        matches!(self, NodeKind::Phi { .. })
    }

    pub fn as_literal(&self) -> Option<&Lit> {
        match self {
            NodeKind::Value(lit) => Some(lit),
            _ => None,
        }
    }
}

/// A back-edge from a value to one of its uses: `(user, operand index)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UseEdge {
    pub user: NodeId,
    pub index: u32,
}

#[derive(Debug)]
pub struct Node {
    pub kind: NodeKind,
    uses: SmallVec<[UseEdge; 4]>,
}

/// Owns every SSA node produced during a compilation. Dropping the arena
/// drops every node at once, sidestepping the reference-cycle teardown the
/// original's weak self-handles exist to break (§5).
#[derive(Default)]
pub struct Arena {
    nodes: Vec<Node>,
}

impl Arena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc(&mut self, kind: NodeKind) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node { kind, uses: SmallVec::new() });
        id
    }

    /// Allocates `kind` and registers a use edge for each of its operands in
    /// one step; used whenever a node's operands are all already known at
    /// construction time (everything except `Phi`, which grows operands
    /// incrementally via [`Arena::add_phi_operand`]).
    pub fn alloc_with_uses(&mut self, kind: NodeKind) -> NodeId {
        let id = self.alloc(kind);
        self.register_uses(id);
        id
    }

    fn register_uses(&mut self, user: NodeId) {
        let operands = self.nodes[user.idx()].kind.operands();
        for (i, v) in operands.into_iter().enumerate() {
            self.add_use(v, user, i as u32);
        }
    }

    pub fn kind(&self, id: NodeId) -> &NodeKind {
        &self.nodes[id.idx()].kind
    }

    pub fn kind_mut(&mut self, id: NodeId) -> &mut NodeKind {
        &mut self.nodes[id.idx()].kind
    }

    pub fn uses(&self, id: NodeId) -> &[UseEdge] {
        &self.nodes[id.idx()].uses
    }

    pub fn add_use(&mut self, value: NodeId, user: NodeId, index: u32) {
        self.nodes[value.idx()].uses.push(UseEdge { user, index });
    }

    pub fn remove_use(&mut self, value: NodeId, user: NodeId, index: u32) {
        let uses = &mut self.nodes[value.idx()].uses;
        if let Some(pos) = uses.iter().position(|u| u.user == user && u.index == index) {
            uses.swap_remove(pos);
        }
    }

    /// Appends `value` as a new operand of the φ `phi`, registering the use.
    pub fn add_phi_operand(&mut self, phi: NodeId, value: NodeId) {
        let index = match &mut self.nodes[phi.idx()].kind {
            NodeKind::Phi { operands, .. } => {
                operands.push(value);
                operands.len() - 1
            }
            _ => panic!("add_phi_operand on a non-Phi node"),
        };
        self.add_use(value, phi, index as u32);
    }

    /// Rewrites one existing operand slot of `user`, keeping use edges
    /// consistent (de-registers the old target, registers the new one).
    pub fn replace_operand(&mut self, user: NodeId, index: usize, new_value: NodeId) {
        let old = self.nodes[user.idx()].kind.operands()[index];
        self.remove_use(old, user, index as u32);
        self.nodes[user.idx()].kind.set_operand(index, new_value);
        self.add_use(new_value, user, index as u32);
    }

    /// C3's `replace_all_uses_with`: empties `value`'s use list and patches
    /// every former user's operand slot to point at `new` instead. The use
    /// list is snapshotted (via `mem::take`) before any user is touched, so
    /// mutating those users' own operand lists mid-loop can't invalidate the
    /// iteration.
    pub fn replace_all_uses_with(&mut self, value: NodeId, new: NodeId) {
        let uses: SmallVec<[UseEdge; 4]> = std::mem::take(&mut self.nodes[value.idx()].uses);
        for u in uses {
            self.nodes[u.user.idx()].kind.set_operand(u.index as usize, new);
            self.add_use(new, u.user, u.index);
        }
    }

    pub fn push_block_insn(&mut self, block: NodeId, insn: NodeId) {
        match &mut self.nodes[block.idx()].kind {
            NodeKind::Block { insns, .. } => insns.push(insn),
            _ => panic!("push_block_insn on a non-Block node"),
        }
    }

    pub fn push_block_phi(&mut self, block: NodeId, phi: NodeId) {
        match &mut self.nodes[block.idx()].kind {
            NodeKind::Block { phis, .. } => phis.push(phi),
            _ => panic!("push_block_phi on a non-Block node"),
        }
    }

    /// Drops a collapsed phi from its owning block's header list once
    /// trivial-elimination has rerouted its uses away. `block` is read off
    /// the phi's own `NodeKind::Phi` rather than passed separately, since the
    /// caller already has one in hand from matching on it.
    pub fn remove_block_phi(&mut self, block: NodeId, phi: NodeId) {
        match &mut self.nodes[block.idx()].kind {
            NodeKind::Block { phis, .. } => phis.retain(|&p| p != phi),
            _ => panic!("remove_block_phi on a non-Block node"),
        }
    }

    pub fn add_pred(&mut self, block: NodeId, pred: NodeId) {
        match &mut self.nodes[block.idx()].kind {
            NodeKind::Block { preds, .. } => preds.push(pred),
            _ => panic!("add_pred on a non-Block node"),
        }
    }

    pub fn preds(&self, block: NodeId) -> &[NodeId] {
        match &self.nodes[block.idx()].kind {
            NodeKind::Block { preds, .. } => preds,
            _ => panic!("preds on a non-Block node"),
        }
    }

    pub fn phis(&self, block: NodeId) -> &[NodeId] {
        match &self.nodes[block.idx()].kind {
            NodeKind::Block { phis, .. } => phis,
            _ => panic!("phis on a non-Block node"),
        }
    }

    pub fn set_is_function(&mut self, block: NodeId, is_function: bool) {
        match &mut self.nodes[block.idx()].kind {
            NodeKind::Block { is_function: f, .. } => *f = is_function,
            _ => panic!("set_is_function on a non-Block node"),
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Numeric and type helpers shared by the builder and optimizer for
/// classifying a node's result kind without re-matching everywhere.
pub fn value_type_tag(lit: &Lit) -> TypeValue {
    match lit {
        Lit::Number(_) => crate::types::prim::NUMBER,
        Lit::Float(_) => crate::types::prim::FLOAT,
        Lit::String(_) => crate::types::prim::STRING,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mk_block(a: &mut Arena) -> NodeId {
        a.alloc(NodeKind::Block { is_function: false, preds: SmallVec::new(), phis: Vec::new(), insns: Vec::new() })
    }

    #[test]
    fn use_def_closure_holds_after_construction() {
        let mut a = Arena::new();
        let lhs = a.alloc(NodeKind::Value(Lit::Number(1)));
        let rhs = a.alloc(NodeKind::Value(Lit::Number(2)));
        let quad = a.alloc_with_uses(NodeKind::Quad { op: QuadOp::Add, lhs, rhs: Some(rhs) });
        let operands = a.kind(quad).operands();
        for (i, v) in operands.iter().enumerate() {
            assert!(a.uses(*v).iter().any(|u| u.user == quad && u.index as usize == i));
        }
    }

    #[test]
    fn replace_all_uses_with_empties_source_and_repoints_users() {
        let mut a = Arena::new();
        let old = a.alloc(NodeKind::Value(Lit::Number(1)));
        let new = a.alloc(NodeKind::Value(Lit::Number(2)));
        let block = mk_block(&mut a);
        let user1 = a.alloc_with_uses(NodeKind::Return { value: Some(old) });
        let user2 = a.alloc_with_uses(NodeKind::RtnGetter { call: old });
        a.push_block_insn(block, user1);
        a.push_block_insn(block, user2);

        a.replace_all_uses_with(old, new);

        assert!(a.uses(old).is_empty());
        assert_eq!(a.uses(new).len(), 2);
        assert_eq!(a.kind(user1).operands()[0], new);
        assert_eq!(a.kind(user2).operands()[0], new);
    }

    #[test]
    fn phi_operand_count_matches_pred_count_when_fully_built() {
        let mut a = Arena::new();
        let b1 = mk_block(&mut a);
        let b2 = mk_block(&mut a);
        let join = mk_block(&mut a);
        a.add_pred(join, b1);
        a.add_pred(join, b2);
        let phi = a.alloc(NodeKind::Phi { block: join, operands: SmallVec::new() });
        let v1 = a.alloc(NodeKind::Value(Lit::Number(1)));
        let v2 = a.alloc(NodeKind::Value(Lit::Number(2)));
        a.add_phi_operand(phi, v1);
        a.add_phi_operand(phi, v2);
        match a.kind(phi) {
            NodeKind::Phi { operands, .. } => assert_eq!(operands.len(), a.preds(join).len()),
            _ => unreachable!(),
        }
    }
}
