//! Expression-building visitor protocol.
//!
//! The engine keeps its predicate in whatever representation it likes; when a scan is built
//! it walks that representation and calls the `visit_expression_*` functions below, which
//! assemble kernel [`Expression`]s inside a [`KernelExpressionVisitorState`]. Every visit
//! returns an opaque id for the sub-expression it built; visits that combine children consume
//! the children's ids. Id `0` means the sub-expression could not be built, and poisons any
//! visit it is passed to.

use std::collections::HashMap;
use std::ffi::c_void;

use slate_kernel::expressions::{BinaryOperator, Expression};

use crate::{KernelStringSlice, TryFromStringSlice};

/// An engine-owned predicate plus the visitor that knows how to walk it.
#[repr(C)]
pub struct EnginePredicate {
    pub predicate: *mut c_void,
    pub visitor:
        extern "C" fn(predicate: *mut c_void, state: &mut KernelExpressionVisitorState) -> usize,
}

/// Accumulates sub-expressions while the engine walks its predicate. Ids start at 1 so that 0
/// can stand for "failed to build".
pub struct KernelExpressionVisitorState {
    inflight_expressions: HashMap<usize, Expression>,
    next_id: usize,
}

impl KernelExpressionVisitorState {
    pub fn new() -> Self {
        Self {
            inflight_expressions: HashMap::new(),
            next_id: 1,
        }
    }
}

impl Default for KernelExpressionVisitorState {
    fn default() -> Self {
        Self::new()
    }
}

fn wrap_expression(state: &mut KernelExpressionVisitorState, expr: Expression) -> usize {
    let id = state.next_id;
    state.next_id += 1;
    state.inflight_expressions.insert(id, expr);
    id
}

/// Take the finished expression with the given id out of the visitor state. Returns `None`
/// for id 0 and for ids already consumed by a combining visit.
pub fn unwrap_kernel_expression(
    state: &mut KernelExpressionVisitorState,
    exprid: usize,
) -> Option<Expression> {
    state.inflight_expressions.remove(&exprid)
}

fn visit_expression_binary(
    state: &mut KernelExpressionVisitorState,
    op: BinaryOperator,
    a: usize,
    b: usize,
) -> usize {
    let left = unwrap_kernel_expression(state, a);
    let right = unwrap_kernel_expression(state, b);
    match (left, right) {
        (Some(left), Some(right)) => wrap_expression(state, Expression::binary(op, left, right)),
        _ => 0,
    }
}

#[no_mangle]
pub extern "C" fn visit_expression_and(
    state: &mut KernelExpressionVisitorState,
    a: usize,
    b: usize,
) -> usize {
    visit_expression_binary(state, BinaryOperator::And, a, b)
}

#[no_mangle]
pub extern "C" fn visit_expression_or(
    state: &mut KernelExpressionVisitorState,
    a: usize,
    b: usize,
) -> usize {
    visit_expression_binary(state, BinaryOperator::Or, a, b)
}

#[no_mangle]
pub extern "C" fn visit_expression_lt(
    state: &mut KernelExpressionVisitorState,
    a: usize,
    b: usize,
) -> usize {
    visit_expression_binary(state, BinaryOperator::LessThan, a, b)
}

#[no_mangle]
pub extern "C" fn visit_expression_le(
    state: &mut KernelExpressionVisitorState,
    a: usize,
    b: usize,
) -> usize {
    visit_expression_binary(state, BinaryOperator::LessThanOrEqual, a, b)
}

#[no_mangle]
pub extern "C" fn visit_expression_gt(
    state: &mut KernelExpressionVisitorState,
    a: usize,
    b: usize,
) -> usize {
    visit_expression_binary(state, BinaryOperator::GreaterThan, a, b)
}

#[no_mangle]
pub extern "C" fn visit_expression_ge(
    state: &mut KernelExpressionVisitorState,
    a: usize,
    b: usize,
) -> usize {
    visit_expression_binary(state, BinaryOperator::GreaterThanOrEqual, a, b)
}

#[no_mangle]
pub extern "C" fn visit_expression_eq(
    state: &mut KernelExpressionVisitorState,
    a: usize,
    b: usize,
) -> usize {
    visit_expression_binary(state, BinaryOperator::Equal, a, b)
}

#[no_mangle]
pub extern "C" fn visit_expression_ne(
    state: &mut KernelExpressionVisitorState,
    a: usize,
    b: usize,
) -> usize {
    visit_expression_binary(state, BinaryOperator::NotEqual, a, b)
}

/// # Safety
/// The name slice must be valid for the duration of the call.
#[no_mangle]
pub unsafe extern "C" fn visit_expression_column(
    state: &mut KernelExpressionVisitorState,
    name: KernelStringSlice,
) -> usize {
    match unsafe { String::try_from_slice(name) } {
        Ok(name) => wrap_expression(state, Expression::column(name)),
        Err(_) => 0,
    }
}

/// # Safety
/// The value slice must be valid for the duration of the call.
#[no_mangle]
pub unsafe extern "C" fn visit_expression_literal_string(
    state: &mut KernelExpressionVisitorState,
    value: KernelStringSlice,
) -> usize {
    match unsafe { String::try_from_slice(value) } {
        Ok(value) => wrap_expression(state, Expression::literal(value.as_str())),
        Err(_) => 0,
    }
}

#[no_mangle]
pub extern "C" fn visit_expression_literal_long(
    state: &mut KernelExpressionVisitorState,
    value: i64,
) -> usize {
    wrap_expression(state, Expression::literal(value))
}

#[no_mangle]
pub extern "C" fn visit_expression_literal_bool(
    state: &mut KernelExpressionVisitorState,
    value: bool,
) -> usize {
    wrap_expression(state, Expression::literal(value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn visits_assemble_a_comparison() {
        let mut state = KernelExpressionVisitorState::new();
        let col = unsafe { visit_expression_column(&mut state, "score".into()) };
        let lit = visit_expression_literal_long(&mut state, 4);
        let cmp = visit_expression_lt(&mut state, col, lit);
        assert_ne!(cmp, 0);
        let expr = unwrap_kernel_expression(&mut state, cmp).unwrap();
        assert_eq!(format!("{expr}"), "(Column(score) < 4)");
    }

    #[test]
    fn conjunction_consumes_its_children() {
        let mut state = KernelExpressionVisitorState::new();
        let left = {
            let col = unsafe { visit_expression_column(&mut state, "region".into()) };
            let lit = unsafe { visit_expression_literal_string(&mut state, "emea".into()) };
            visit_expression_eq(&mut state, col, lit)
        };
        let right = {
            let col = unsafe { visit_expression_column(&mut state, "active".into()) };
            let lit = visit_expression_literal_bool(&mut state, true);
            visit_expression_eq(&mut state, col, lit)
        };
        let both = visit_expression_and(&mut state, left, right);
        assert_ne!(both, 0);
        assert!(unwrap_kernel_expression(&mut state, left).is_none());
        assert!(unwrap_kernel_expression(&mut state, right).is_none());
        assert!(unwrap_kernel_expression(&mut state, both).is_some());
    }

    #[test]
    fn failure_ids_poison_their_parents() {
        let mut state = KernelExpressionVisitorState::new();
        let lit = visit_expression_literal_long(&mut state, 10);
        assert_eq!(visit_expression_and(&mut state, 0, lit), 0);
        // the good child was consumed by the failed combine
        assert!(unwrap_kernel_expression(&mut state, lit).is_none());
    }
}
