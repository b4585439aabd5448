//! Row predicates for `filter`.
//!
//! ```rust,ignore
//! use lakeflow::frame::{col, Value};
//!
//! let predicate = col("batch_id").gt(Value::Int64(3)).and(col("id").is_not_null());
//! let filtered = df.filter(&predicate)?;
//! ```

use std::cmp::Ordering;
use std::fmt;

use super::schema::Schema;
use super::value::Value;
use crate::error::FrameResult;

/// Comparison operator against a literal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    NotEq,
    Gt,
    GtEq,
    Lt,
    LtEq,
}

impl CompareOp {
    fn holds(self, ordering: Ordering) -> bool {
        match self {
            CompareOp::Eq => ordering == Ordering::Equal,
            CompareOp::NotEq => ordering != Ordering::Equal,
            CompareOp::Gt => ordering == Ordering::Greater,
            CompareOp::GtEq => ordering != Ordering::Less,
            CompareOp::Lt => ordering == Ordering::Less,
            CompareOp::LtEq => ordering != Ordering::Greater,
        }
    }

    fn symbol(self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::NotEq => "!=",
            CompareOp::Gt => ">",
            CompareOp::GtEq => ">=",
            CompareOp::Lt => "<",
            CompareOp::LtEq => "<=",
        }
    }
}

/// Boolean row predicate. Comparisons involving null are never true.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Compare {
        column: String,
        op: CompareOp,
        value: Value,
    },
    IsNull(String),
    IsNotNull(String),
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    pub fn and(self, other: Predicate) -> Predicate {
        match self {
            Predicate::And(mut parts) => {
                parts.push(other);
                Predicate::And(parts)
            }
            first => Predicate::And(vec![first, other]),
        }
    }

    pub fn or(self, other: Predicate) -> Predicate {
        match self {
            Predicate::Or(mut parts) => {
                parts.push(other);
                Predicate::Or(parts)
            }
            first => Predicate::Or(vec![first, other]),
        }
    }

    pub fn negate(self) -> Predicate {
        Predicate::Not(Box::new(self))
    }

    /// Every column the predicate reads.
    pub fn columns(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_columns(&mut out);
        out
    }

    fn collect_columns<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Predicate::Compare { column, .. }
            | Predicate::IsNull(column)
            | Predicate::IsNotNull(column) => out.push(column),
            Predicate::And(parts) | Predicate::Or(parts) => {
                parts.iter().for_each(|p| p.collect_columns(out))
            }
            Predicate::Not(inner) => inner.collect_columns(out),
        }
    }

    /// Check that every referenced column exists in `schema`.
    pub fn validate(&self, schema: &Schema) -> FrameResult<()> {
        schema.require(&self.columns())
    }

    /// Evaluate against one row; `lookup` resolves a column name to its value.
    pub fn evaluate<'v, F>(&self, lookup: &F) -> bool
    where
        F: Fn(&str) -> Option<&'v Value>,
    {
        match self {
            Predicate::Compare { column, op, value } => lookup(column)
                .and_then(|v| v.compare(value))
                .is_some_and(|ordering| op.holds(ordering)),
            Predicate::IsNull(column) => lookup(column).map_or(true, Value::is_null),
            Predicate::IsNotNull(column) => lookup(column).is_some_and(|v| !v.is_null()),
            Predicate::And(parts) => parts.iter().all(|p| p.evaluate(lookup)),
            Predicate::Or(parts) => parts.iter().any(|p| p.evaluate(lookup)),
            Predicate::Not(inner) => !inner.evaluate(lookup),
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::Compare { column, op, value } => {
                write!(f, "{} {} {}", column, op.symbol(), value)
            }
            Predicate::IsNull(column) => write!(f, "{} IS NULL", column),
            Predicate::IsNotNull(column) => write!(f, "{} IS NOT NULL", column),
            Predicate::And(parts) | Predicate::Or(parts) => {
                let joiner = if matches!(self, Predicate::And(_)) { " AND " } else { " OR " };
                let rendered: Vec<String> = parts.iter().map(|p| format!("({})", p)).collect();
                f.write_str(&rendered.join(joiner))
            }
            Predicate::Not(inner) => write!(f, "NOT ({})", inner),
        }
    }
}

/// Column reference used to build predicates.
#[derive(Debug, Clone)]
pub struct ColumnExpr {
    name: String,
}

/// Start a predicate on the named column.
pub fn col(name: impl Into<String>) -> ColumnExpr {
    ColumnExpr { name: name.into() }
}

impl ColumnExpr {
    fn compare(self, op: CompareOp, value: impl Into<Value>) -> Predicate {
        Predicate::Compare {
            column: self.name,
            op,
            value: value.into(),
        }
    }

    pub fn eq(self, value: impl Into<Value>) -> Predicate {
        self.compare(CompareOp::Eq, value)
    }

    pub fn not_eq(self, value: impl Into<Value>) -> Predicate {
        self.compare(CompareOp::NotEq, value)
    }

    pub fn gt(self, value: impl Into<Value>) -> Predicate {
        self.compare(CompareOp::Gt, value)
    }

    pub fn gt_eq(self, value: impl Into<Value>) -> Predicate {
        self.compare(CompareOp::GtEq, value)
    }

    pub fn lt(self, value: impl Into<Value>) -> Predicate {
        self.compare(CompareOp::Lt, value)
    }

    pub fn lt_eq(self, value: impl Into<Value>) -> Predicate {
        self.compare(CompareOp::LtEq, value)
    }

    pub fn is_null(self) -> Predicate {
        Predicate::IsNull(self.name)
    }

    pub fn is_not_null(self) -> Predicate {
        Predicate::IsNotNull(self.name)
    }
}
