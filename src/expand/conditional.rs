//! Ordered condition/value arms with first-true-wins selection.

use crate::error::Error;
use crate::scope::Scope;
use crate::wrapper::BoolExpr;

/// A collection of alternatives guarded by boolean expressions.
///
/// Arms keep document order. Selection walks them in that order and
/// returns the first whose condition holds, so later arms act as
/// fallbacks for earlier ones.
#[derive(Debug, Clone)]
pub struct Conditional<T> {
    arms: Vec<(BoolExpr, T)>,
}

impl<T> Conditional<T> {
    pub fn new() -> Conditional<T> {
        Conditional { arms: Vec::new() }
    }

    /// Appends an arm after all existing ones.
    pub fn push(&mut self, condition: BoolExpr, value: T) {
        self.arms.push((condition, value));
    }

    pub fn arms(&self) -> &[(BoolExpr, T)] {
        &self.arms
    }

    pub fn len(&self) -> usize {
        self.arms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arms.is_empty()
    }

    /// Picks the first arm whose condition evaluates to true.
    ///
    /// A condition that fails to evaluate is recorded in `errors` and
    /// counted as true, so a broken guard selects its arm rather than
    /// silently skipping it.
    pub fn select(&self, scope: &Scope, errors: &mut Vec<Error>) -> Option<&T> {
        for (condition, value) in &self.arms {
            match condition.value(scope) {
                Ok(true) => return Some(value),
                Ok(false) => {}
                Err(err) => {
                    errors.push(err);
                    return Some(value);
                }
            }
        }
        None
    }
}

impl<T> Default for Conditional<T> {
    fn default() -> Conditional<T> {
        Conditional::new()
    }
}
