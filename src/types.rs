//! C1: the function-signature codec.
//!
//! `TypeValue` is a signed 64-bit integer. Primitive ordinals are fixed by
//! `original_source/src/lexer.h`'s `Keyword` enum declaration order; the
//! function-signature hash is the positional base-131 fold from
//! `original_source/src/analyzer.cpp::GetFunctionType`.

use arrayvec::ArrayVec;

pub type TypeValue = i64;

/// The error sentinel; propagates through every codec operation it touches.
pub const TYPE_ERROR: TypeValue = -1;

/// Positional base used to fold an argument list into one integer.
pub const FUNC_TYPE_BASE: TypeValue = 131;

/// `original_source` caps a signature at 6 arguments; `args_of` plus
/// signed-64-bit headroom makes this the practical limit (§9 design note:
/// "an implementer should assert this invariant rather than rely on it
/// silently").
pub const FUNC_MAX_ARG_NUM: usize = 6;

/// Primitive type ordinals, fixed by the original `Keyword` enum order.
pub mod prim {
    use super::TypeValue;

    pub const NUMBER: TypeValue = 0;
    pub const FLOAT: TypeValue = 1;
    pub const FUNCTION: TypeValue = 2;
    pub const STRING: TypeValue = 3;
    pub const LIST: TypeValue = 4;
    pub const VOID: TypeValue = 5;
    pub const VAR: TypeValue = 6;
}

/// A fixed-capacity argument-type list, bounded by `FUNC_MAX_ARG_NUM` the
/// way the original's six-argument call sites are bounded.
pub type ArgTypes = ArrayVec<TypeValue, { FUNC_MAX_ARG_NUM }>;

/// A signature is a concrete function type once its encoded value reaches
/// `FUNC_TYPE_BASE`; below that the value is one of the primitive ordinals.
pub fn is_concrete_function(t: TypeValue) -> bool {
    t >= FUNC_TYPE_BASE
}

/// Folds `args` left to right, `func_type = func_type * B + (arg + 1)`, then
/// finishes with `* B + ret + B`. Any `TYPE_ERROR` operand poisons the whole
/// signature immediately, matching `GetFunctionType`'s early return.
pub fn encode_function(args: &[TypeValue], ret: TypeValue) -> TypeValue {
    if ret == TYPE_ERROR {
        return TYPE_ERROR;
    }
    let mut acc: TypeValue = 0;
    for &a in args {
        if a == TYPE_ERROR {
            return TYPE_ERROR;
        }
        acc = acc * FUNC_TYPE_BASE + (a + 1);
    }
    acc * FUNC_TYPE_BASE + ret + FUNC_TYPE_BASE
}

/// `(value - B) mod B`, the return type of a concrete signature.
pub fn ret_of(t: TypeValue) -> TypeValue {
    (t - FUNC_TYPE_BASE).rem_euclid(FUNC_TYPE_BASE)
}

/// `(value - ret - B) / B`, the still-folded argument-pattern integer. The
/// analyzer compares this bit-for-bit against a re-hash of the actual call
/// arguments rather than unfolding it further.
pub fn args_of(t: TypeValue) -> TypeValue {
    (t - ret_of(t) - FUNC_TYPE_BASE) / FUNC_TYPE_BASE
}

/// Re-folds an actual argument-type vector the same way `encode_function`
/// does, for comparison against `args_of(callee)` at a call site. Any
/// `Function`-typed argument is treated generically as `prim::FUNCTION`
/// before folding, matching the original's call-site generalisation of
/// concrete callee/argument function types.
pub fn hash_args(args: &[TypeValue]) -> TypeValue {
    let mut acc: TypeValue = 0;
    for &a in args {
        let a = if is_concrete_function(a) { prim::FUNCTION } else { a };
        acc = acc * FUNC_TYPE_BASE + (a + 1);
    }
    acc
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_return_and_args() {
        let args = [prim::NUMBER, prim::FLOAT];
        let ret = prim::STRING;
        let t = encode_function(&args, ret);
        assert!(is_concrete_function(t));
        assert_eq!(ret_of(t), ret);
        assert_eq!(args_of(t), hash_args(&args));
    }

    #[test]
    fn nullary_function_is_still_concrete() {
        let t = encode_function(&[], prim::VOID);
        assert!(is_concrete_function(t));
        assert_eq!(ret_of(t), prim::VOID);
        assert_eq!(args_of(t), hash_args(&[]));
    }

    #[test]
    fn error_operand_poisons_signature() {
        assert_eq!(encode_function(&[prim::NUMBER, TYPE_ERROR], prim::VOID), TYPE_ERROR);
        assert_eq!(encode_function(&[prim::NUMBER], TYPE_ERROR), TYPE_ERROR);
    }

    #[test]
    fn distinct_signatures_do_not_collide() {
        let a = encode_function(&[prim::NUMBER], prim::VOID);
        let b = encode_function(&[prim::FLOAT], prim::VOID);
        let c = encode_function(&[prim::NUMBER, prim::NUMBER], prim::VOID);
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_ne!(b, c);
    }

    #[test]
    fn six_number_args_stay_in_range() {
        let args = [prim::NUMBER; FUNC_MAX_ARG_NUM];
        let t = encode_function(&args, prim::NUMBER);
        assert!(t > 0);
        assert_eq!(ret_of(t), prim::NUMBER);
        assert_eq!(args_of(t), hash_args(&args));
    }
}
