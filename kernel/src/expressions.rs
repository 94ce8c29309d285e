//! A minimal expression tree for scan predicates.
//!
//! The kernel never evaluates these. A scan stores the predicate it was planned
//! with and exposes it back to the host engine, which owns all evaluation and
//! pushdown; see [`crate::scan::Scan::predicate`].

use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    String(String),
    Long(i64),
    Boolean(bool),
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::String(s) => write!(f, "'{s}'"),
            Scalar::Long(v) => write!(f, "{v}"),
            Scalar::Boolean(b) => write!(f, "{b}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperator {
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    Equal,
    NotEqual,
    And,
    Or,
}

impl fmt::Display for BinaryOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self {
            BinaryOperator::LessThan => "<",
            BinaryOperator::LessThanOrEqual => "<=",
            BinaryOperator::GreaterThan => ">",
            BinaryOperator::GreaterThanOrEqual => ">=",
            BinaryOperator::Equal => "=",
            BinaryOperator::NotEqual => "!=",
            BinaryOperator::And => "AND",
            BinaryOperator::Or => "OR",
        };
        write!(f, "{op}")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    /// A literal value.
    Literal(Scalar),
    /// A column reference, by name.
    Column(String),
    /// A binary operation over two sub-expressions.
    Binary {
        op: BinaryOperator,
        left: Box<Expression>,
        right: Box<Expression>,
    },
}

impl Expression {
    pub fn column(name: impl Into<String>) -> Self {
        Expression::Column(name.into())
    }

    pub fn literal(value: impl Into<Scalar>) -> Self {
        Expression::Literal(value.into())
    }

    pub fn binary(op: BinaryOperator, left: Expression, right: Expression) -> Self {
        Expression::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn eq(self, other: Expression) -> Self {
        Expression::binary(BinaryOperator::Equal, self, other)
    }

    pub fn lt(self, other: Expression) -> Self {
        Expression::binary(BinaryOperator::LessThan, self, other)
    }

    pub fn and(self, other: Expression) -> Self {
        Expression::binary(BinaryOperator::And, self, other)
    }
}

impl From<i64> for Scalar {
    fn from(value: i64) -> Self {
        Scalar::Long(value)
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Scalar::String(value.to_string())
    }
}

impl From<bool> for Scalar {
    fn from(value: bool) -> Self {
        Scalar::Boolean(value)
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::Literal(s) => write!(f, "{s}"),
            Expression::Column(name) => write!(f, "Column({name})"),
            Expression::Binary { op, left, right } => write!(f, "({left} {op} {right})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_roundtrip_shape() {
        let expr = Expression::column("x")
            .lt(Expression::literal(4))
            .and(Expression::column("y").eq(Expression::literal("a")));
        assert_eq!(
            expr.to_string(),
            "((Column(x) < 4) AND (Column(y) = 'a'))"
        );
    }
}
