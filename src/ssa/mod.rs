//! C3 (use-def graph) and C4 (the closed SSA node variant set), modelled as
//! an arena of nodes indexed by `NodeId` rather than the original's
//! reference-counted pointer graph — the alternative spec.md's own design
//! notes offer, and the shape `dejavu`'s `back::ssa::Function` uses for its
//! `Value(u32)`/`HandleMap` arena.

pub mod arena;
pub mod builder;

pub use arena::{Arena, Lit, Node, NodeId, NodeKind, QuadOp, UseEdge};
pub use builder::{build, Module};
