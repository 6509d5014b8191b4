//! C7: the peephole optimizer.
//!
//! Consulted by the builder before every `Quad` is attached to a block.
//! Grounded on `original_source/src/optimizer.cpp`: constant folding,
//! algebraic simplification (Table T2), strength reduction, and copy
//! propagation, applied in that order for binary operations.

use crate::ssa::{Arena, Lit, NodeId, NodeKind, QuadOp};
use crate::types::{prim, TypeValue};

/// Toggles the whole optimizer off wholesale (§4.6: "all three entrypoints
/// return null and the builder emits the raw Quad").
pub struct Optimizer {
    pub enabled: bool,
}

impl Optimizer {
    pub fn new(enabled: bool) -> Self {
        Optimizer { enabled }
    }

    /// `opt_binary(op, lhs, rhs, type) -> Value?`. `type` is the shared
    /// operand type (both operands agree on it by the time the analyzer
    /// has type-checked the expression), needed to synthesize a same-kind
    /// zero/one/bool literal for the identities in Table T2.
    pub fn opt_binary(&self, arena: &mut Arena, op: QuadOp, lhs: NodeId, rhs: NodeId, ty: TypeValue) -> Option<NodeId> {
        if !self.enabled {
            return None;
        }
        let lhs = self.copy_prop(arena, lhs).unwrap_or(lhs);
        let rhs = self.copy_prop(arena, rhs).unwrap_or(rhs);
        self.const_fold_binary(arena, op, lhs, rhs)
            .or_else(|| self.algebraic_simplify(arena, op, lhs, rhs, ty))
            .or_else(|| self.strength_reduce(arena, op, lhs, rhs, ty))
    }

    /// `opt_unary(op, operand) -> Value?`.
    pub fn opt_unary(&self, arena: &mut Arena, op: QuadOp, operand: NodeId) -> Option<NodeId> {
        if !self.enabled {
            return None;
        }
        let operand = self.copy_prop(arena, operand).unwrap_or(operand);
        self.const_fold_unary(arena, op, operand)
    }

    /// `opt_assign(rhs) -> Value?` — copy propagation alone, consulted when
    /// binding a new `Variable`.
    pub fn opt_assign(&self, arena: &mut Arena, rhs: NodeId) -> Option<NodeId> {
        if !self.enabled {
            return None;
        }
        self.copy_prop(arena, rhs)
    }

    /// Follows a `Variable`'s sole operand through a chain of further
    /// `Variable`s, stopping at a literal, `ArgGetter`, `ExternFunc`, or
    /// `Block`. A chain through anything else (a `Phi` in particular) is
    /// not propagated. Terminates because the definition chain is acyclic.
    fn copy_prop(&self, arena: &Arena, value: NodeId) -> Option<NodeId> {
        let def = match arena.kind(value) {
            NodeKind::Variable { def, .. } => *def,
            _ => return None,
        };
        match arena.kind(def) {
            NodeKind::Value(_) | NodeKind::ArgGetter { .. } | NodeKind::ExternFunc { .. } | NodeKind::Block { .. } => Some(def),
            NodeKind::Variable { .. } => Some(self.copy_prop(arena, def).unwrap_or(def)),
            _ => None,
        }
    }

    fn const_fold_binary(&self, arena: &mut Arena, op: QuadOp, lhs: NodeId, rhs: NodeId) -> Option<NodeId> {
        let l = arena.kind(lhs).as_literal()?.clone();
        let r = arena.kind(rhs).as_literal()?.clone();
        let result = match (&l, &r) {
            (Lit::Number(a), Lit::Number(b)) => fold_number(op, *a, *b)?,
            (Lit::Float(a), Lit::Float(b)) => fold_float(op, *a, *b)?,
            (Lit::String(a), Lit::String(b)) => fold_string(op, a, b)?,
            _ => return None,
        };
        Some(arena.alloc(NodeKind::Value(result)))
    }

    fn const_fold_unary(&self, arena: &mut Arena, op: QuadOp, operand: NodeId) -> Option<NodeId> {
        let lit = arena.kind(operand).as_literal()?.clone();
        let result = match (op, &lit) {
            (QuadOp::ConvNum, Lit::Float(f)) => Lit::Number(*f as i64),
            (QuadOp::ConvNum, Lit::String(s)) => Lit::Number(s.trim().parse().ok()?),
            (QuadOp::ConvNum, Lit::Number(n)) => Lit::Number(*n),
            (QuadOp::ConvDec, Lit::Number(n)) => Lit::Float(*n as f64),
            (QuadOp::ConvDec, Lit::String(s)) => Lit::Float(s.trim().parse().ok()?),
            (QuadOp::ConvDec, Lit::Float(f)) => Lit::Float(*f),
            (QuadOp::ConvStr, Lit::Number(n)) => Lit::String(n.to_string()),
            (QuadOp::ConvStr, Lit::Float(f)) => Lit::String(f.to_string()),
            (QuadOp::ConvStr, Lit::String(s)) => Lit::String(s.clone()),
            (QuadOp::Not, Lit::Number(n)) => Lit::Number(!n),
            _ => return None,
        };
        Some(arena.alloc(NodeKind::Value(result)))
    }

    fn algebraic_simplify(&self, arena: &mut Arena, op: QuadOp, lhs: NodeId, rhs: NodeId, ty: TypeValue) -> Option<NodeId> {
        if lhs == rhs {
            return match op {
                QuadOp::And | QuadOp::Or => Some(lhs),
                QuadOp::Xor | QuadOp::Sub | QuadOp::Mod => Some(self.lit(arena, lit_zero(ty))),
                QuadOp::Div => Some(self.lit(arena, lit_one(ty))),
                QuadOp::Less | QuadOp::Greater => Some(self.lit(arena, lit_bool(false))),
                QuadOp::LessEq | QuadOp::GreaterEq | QuadOp::Equal => Some(self.lit(arena, lit_bool(true))),
                QuadOp::NotEqual => Some(self.lit(arena, lit_bool(false))),
                _ => None,
            };
        }

        let l = as_number(arena, lhs);
        let r = as_number(arena, rhs);
        let lf = as_float(arena, lhs);
        let rf = as_float(arena, rhs);
        let rstr = as_string(arena, rhs);
        let lstr = as_string(arena, lhs);

        match op {
            QuadOp::And => {
                if r == Some(0) || l == Some(0) {
                    return Some(self.lit(arena, lit_zero(prim::NUMBER)));
                }
                if r == Some(-1) {
                    return Some(lhs);
                }
                if l == Some(-1) {
                    return Some(rhs);
                }
            }
            QuadOp::Xor => {
                if r == Some(0) {
                    return Some(lhs);
                }
                if l == Some(0) {
                    return Some(rhs);
                }
            }
            QuadOp::Or => {
                if r == Some(0) {
                    return Some(lhs);
                }
                if l == Some(0) {
                    return Some(rhs);
                }
                if r == Some(-1) {
                    return Some(rhs);
                }
                if l == Some(-1) {
                    return Some(lhs);
                }
            }
            QuadOp::Shl | QuadOp::Shr => {
                if r == Some(0) {
                    return Some(lhs);
                }
                if l == Some(0) {
                    return Some(lhs);
                }
                if op == QuadOp::Shr && l == Some(-1) {
                    return Some(lhs);
                }
            }
            QuadOp::Add => {
                if is_zero_value(rf, r, &rstr) {
                    return Some(lhs);
                }
                if is_zero_value(lf, l, &lstr) {
                    return Some(rhs);
                }
            }
            QuadOp::Sub => {
                if is_zero_value(rf, r, &None) {
                    return Some(lhs);
                }
            }
            QuadOp::Mul => {
                if is_zero_value(lf, l, &None) {
                    return Some(lhs);
                }
                if is_zero_value(rf, r, &None) {
                    return Some(rhs);
                }
                if is_one_value(rf, r) {
                    return Some(lhs);
                }
                if is_one_value(lf, l) {
                    return Some(rhs);
                }
            }
            QuadOp::Div => {
                if is_zero_value(lf, l, &None) {
                    return Some(lhs);
                }
                if is_one_value(rf, r) {
                    return Some(lhs);
                }
            }
            QuadOp::Mod => {
                if l == Some(0) {
                    return Some(lhs);
                }
                if r == Some(1) {
                    return Some(self.lit(arena, lit_zero(prim::NUMBER)));
                }
            }
            QuadOp::Pow => {
                if rf == Some(0.0) {
                    return Some(self.lit(arena, Lit::Float(1.0)));
                }
                if rf == Some(1.0) {
                    return Some(lhs);
                }
                if lf == Some(0.0) {
                    return Some(lhs);
                }
                if lf == Some(1.0) {
                    return Some(lhs);
                }
            }
            // Comparison against the type's representable min/max folds to
            // 0 or 1 regardless of the other operand's value.
            QuadOp::Less => {
                if l == Some(i64::MAX) || lf == Some(f64::MAX) || r == Some(i64::MIN) || rf == Some(f64::MIN) {
                    return Some(self.lit(arena, lit_bool(false)));
                }
            }
            QuadOp::LessEq => {
                if l == Some(i64::MIN) || lf == Some(f64::MIN) || r == Some(i64::MAX) || rf == Some(f64::MAX) {
                    return Some(self.lit(arena, lit_bool(true)));
                }
            }
            QuadOp::Greater => {
                if l == Some(i64::MIN) || lf == Some(f64::MIN) || r == Some(i64::MAX) || rf == Some(f64::MAX) {
                    return Some(self.lit(arena, lit_bool(false)));
                }
            }
            QuadOp::GreaterEq => {
                if l == Some(i64::MAX) || lf == Some(f64::MAX) || r == Some(i64::MIN) || rf == Some(f64::MIN) {
                    return Some(self.lit(arena, lit_bool(true)));
                }
            }
            _ => {}
        }
        None
    }

    /// Strength reduction: `v + v -> v << 1`, `v * 2^n -> v << n`,
    /// `v / 2^n -> v >> n`. Number only; Mod/Pow are deliberately not
    /// reduced (the original notes this would slow its target VM).
    fn strength_reduce(&self, arena: &mut Arena, op: QuadOp, lhs: NodeId, rhs: NodeId, ty: TypeValue) -> Option<NodeId> {
        if ty != prim::NUMBER {
            return None;
        }
        match op {
            QuadOp::Add if lhs == rhs => {
                let one = arena.alloc(NodeKind::Value(Lit::Number(1)));
                Some(arena.alloc_with_uses(NodeKind::Quad { op: QuadOp::Shl, lhs, rhs: Some(one) }))
            }
            QuadOp::Mul => {
                if let Some(n) = as_number(arena, rhs).and_then(pow2_exp) {
                    let shift = arena.alloc(NodeKind::Value(Lit::Number(n as i64)));
                    Some(arena.alloc_with_uses(NodeKind::Quad { op: QuadOp::Shl, lhs, rhs: Some(shift) }))
                } else if let Some(n) = as_number(arena, lhs).and_then(pow2_exp) {
                    let shift = arena.alloc(NodeKind::Value(Lit::Number(n as i64)));
                    Some(arena.alloc_with_uses(NodeKind::Quad { op: QuadOp::Shl, lhs: rhs, rhs: Some(shift) }))
                } else {
                    None
                }
            }
            QuadOp::Div => {
                if let Some(n) = as_number(arena, rhs).and_then(pow2_exp) {
                    let shift = arena.alloc(NodeKind::Value(Lit::Number(n as i64)));
                    Some(arena.alloc_with_uses(NodeKind::Quad { op: QuadOp::Shr, lhs, rhs: Some(shift) }))
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    fn lit(&self, arena: &mut Arena, lit: Lit) -> NodeId {
        arena.alloc(NodeKind::Value(lit))
    }
}

fn lit_zero(ty: TypeValue) -> Lit {
    if ty == prim::FLOAT {
        Lit::Float(0.0)
    } else {
        Lit::Number(0)
    }
}

fn lit_one(ty: TypeValue) -> Lit {
    if ty == prim::FLOAT {
        Lit::Float(1.0)
    } else {
        Lit::Number(1)
    }
}

fn lit_bool(b: bool) -> Lit {
    Lit::Number(b as i64)
}

fn as_number(arena: &Arena, id: NodeId) -> Option<i64> {
    match arena.kind(id).as_literal() {
        Some(Lit::Number(n)) => Some(*n),
        _ => None,
    }
}

fn as_float(arena: &Arena, id: NodeId) -> Option<f64> {
    match arena.kind(id).as_literal() {
        Some(Lit::Float(f)) => Some(*f),
        _ => None,
    }
}

fn as_string(arena: &Arena, id: NodeId) -> Option<String> {
    match arena.kind(id).as_literal() {
        Some(Lit::String(s)) => Some(s.clone()),
        _ => None,
    }
}

fn is_zero_value(f: Option<f64>, n: Option<i64>, s: &Option<String>) -> bool {
    f == Some(0.0) || n == Some(0) || s.as_deref() == Some("")
}

fn is_one_value(f: Option<f64>, n: Option<i64>) -> bool {
    f == Some(1.0) || n == Some(1)
}

fn pow2_exp(n: i64) -> Option<u32> {
    if n > 0 && (n & (n - 1)) == 0 {
        Some(n.trailing_zeros())
    } else {
        None
    }
}

fn fold_number(op: QuadOp, a: i64, b: i64) -> Option<Lit> {
    use QuadOp::*;
    Some(match op {
        And => Lit::Number(a & b),
        Xor => Lit::Number(a ^ b),
        Or => Lit::Number(a | b),
        Shl => Lit::Number(a << (b as u32 & 63)),
        Shr => Lit::Number(a >> (b as u32 & 63)),
        Add => Lit::Number(a.wrapping_add(b)),
        Sub => Lit::Number(a.wrapping_sub(b)),
        Mul => Lit::Number(a.wrapping_mul(b)),
        Div if b != 0 => Lit::Number(a / b),
        Mod if b != 0 => Lit::Number(a % b),
        Less => lit_bool(a < b),
        LessEq => lit_bool(a <= b),
        Greater => lit_bool(a > b),
        GreaterEq => lit_bool(a >= b),
        Equal => lit_bool(a == b),
        NotEqual => lit_bool(a != b),
        _ => return None,
    })
}

fn fold_float(op: QuadOp, a: f64, b: f64) -> Option<Lit> {
    use QuadOp::*;
    Some(match op {
        Add => Lit::Float(a + b),
        Sub => Lit::Float(a - b),
        Mul => Lit::Float(a * b),
        Div => Lit::Float(a / b),
        Pow => Lit::Float(a.powf(b)),
        Less => lit_bool(a < b),
        LessEq => lit_bool(a <= b),
        Greater => lit_bool(a > b),
        GreaterEq => lit_bool(a >= b),
        Equal => lit_bool(a == b),
        NotEqual => lit_bool(a != b),
        _ => return None,
    })
}

fn fold_string(op: QuadOp, a: &str, b: &str) -> Option<Lit> {
    match op {
        QuadOp::Add => Some(Lit::String(format!("{a}{b}"))),
        QuadOp::Equal => Some(lit_bool(a == b)),
        QuadOp::NotEqual => Some(lit_bool(a != b)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ssa::NodeKind;

    fn num(arena: &mut Arena, n: i64) -> NodeId {
        arena.alloc(NodeKind::Value(Lit::Number(n)))
    }

    #[test]
    fn constant_folds_two_plus_three_times_four() {
        let mut arena = Arena::new();
        let opt = Optimizer::new(true);
        let two = num(&mut arena, 2);
        let three = num(&mut arena, 3);
        let four = num(&mut arena, 4);
        let mul = opt.opt_binary(&mut arena, QuadOp::Mul, three, four, prim::NUMBER).unwrap();
        assert!(matches!(arena.kind(mul).as_literal(), Some(Lit::Number(12))));
        let add = opt.opt_binary(&mut arena, QuadOp::Add, two, mul, prim::NUMBER).unwrap();
        assert!(matches!(arena.kind(add).as_literal(), Some(Lit::Number(14))));
    }

    #[test]
    fn disabled_optimizer_never_folds() {
        let mut arena = Arena::new();
        let opt = Optimizer::new(false);
        let a = num(&mut arena, 1);
        let b = num(&mut arena, 2);
        assert!(opt.opt_binary(&mut arena, QuadOp::Add, a, b, prim::NUMBER).is_none());
        assert!(opt.opt_assign(&mut arena, a).is_none());
    }

    #[test]
    fn self_subtraction_and_self_division_identities() {
        let mut arena = Arena::new();
        let opt = Optimizer::new(true);
        let v = arena.alloc(NodeKind::Variable { name: crate::symbol::Interner::new().intern("x"), def: num(&mut arena, 0) });
        let sub = opt.opt_binary(&mut arena, QuadOp::Sub, v, v, prim::NUMBER).unwrap();
        assert!(matches!(arena.kind(sub).as_literal(), Some(Lit::Number(0))));
        let div = opt.opt_binary(&mut arena, QuadOp::Div, v, v, prim::NUMBER).unwrap();
        assert!(matches!(arena.kind(div).as_literal(), Some(Lit::Number(1))));
    }

    #[test]
    fn strength_reduces_multiply_by_power_of_two() {
        let mut arena = Arena::new();
        let opt = Optimizer::new(true);
        // Non-literal so ConstFold can't fold it away first.
        let non_const = arena.alloc(NodeKind::ArgGetter { index: 0 });
        let eight = num(&mut arena, 8);
        let reduced = opt.opt_binary(&mut arena, QuadOp::Mul, non_const, eight, prim::NUMBER).unwrap();
        match arena.kind(reduced) {
            NodeKind::Quad { op: QuadOp::Shl, rhs: Some(shift), .. } => {
                assert!(matches!(arena.kind(*shift).as_literal(), Some(Lit::Number(3))));
            }
            other => panic!("expected a Shl quad, got {other:?}"),
        }
    }

    #[test]
    fn copy_propagation_chases_two_assignment_hops() {
        let mut arena = Arena::new();
        let opt = Optimizer::new(true);
        let mut interner = crate::symbol::Interner::new();
        let a_name = interner.intern("a");
        let b_name = interner.intern("b");
        let seven = num(&mut arena, 7);
        let a_var = arena.alloc(NodeKind::Variable { name: a_name, def: seven });
        let b_var = arena.alloc(NodeKind::Variable { name: b_name, def: a_var });
        let propagated = opt.opt_assign(&mut arena, b_var).unwrap();
        assert_eq!(propagated, seven);
    }

    #[test]
    fn zero_pow_zero_is_pinned_to_one() {
        let mut arena = Arena::new();
        let opt = Optimizer::new(true);
        let zero = arena.alloc(NodeKind::Value(Lit::Float(0.0)));
        let result = opt.opt_binary(&mut arena, QuadOp::Pow, zero, zero, prim::FLOAT).unwrap();
        assert!(matches!(arena.kind(result).as_literal(), Some(Lit::Float(f)) if *f == 1.0));
    }
}
