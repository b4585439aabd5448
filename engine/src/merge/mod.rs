//! Merge predicate builders.
//!
//! A merge joins an incoming `source` row against an existing `target` row.
//! The builders here return a [`MergeExpr`] tree that renders as SQL text
//! (for logs and commit metadata) and is evaluated directly by the sinks:
//!
//! ```text
//! build_merge_predicate(["id", "region"])
//!   => (target."id" = source."id") AND (target."region" = source."region")
//!
//! build_when_matched_update_predicate(["name"])
//!   => ((target."name" != source."name")
//!        OR (target."name" IS NULL AND source."name" IS NOT NULL)
//!        OR (target."name" IS NOT NULL AND source."name" IS NULL))
//! ```
//!
//! Equality never holds when either side is null, so null keys never match.

use std::cmp::Ordering;
use std::fmt;

use crate::frame::Value;
use crate::helpers::{quote_identifier, DEFAULT_QUOTE};

/// Which side of the merge a column belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeAlias {
    Target,
    Source,
}

impl fmt::Display for MergeAlias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MergeAlias::Target => f.write_str("target"),
            MergeAlias::Source => f.write_str("source"),
        }
    }
}

/// An aliased column, rendered as `target."name"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnRef {
    pub alias: MergeAlias,
    pub column: String,
}

impl ColumnRef {
    pub fn target(column: impl Into<String>) -> Self {
        Self {
            alias: MergeAlias::Target,
            column: column.into(),
        }
    }

    pub fn source(column: impl Into<String>) -> Self {
        Self {
            alias: MergeAlias::Source,
            column: column.into(),
        }
    }
}

impl fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.alias, quote_identifier(&self.column, DEFAULT_QUOTE))
    }
}

/// Boolean expression over a pair of rows.
#[derive(Debug, Clone, PartialEq)]
pub enum MergeExpr {
    Eq(ColumnRef, ColumnRef),
    NotEq(ColumnRef, ColumnRef),
    IsNull(ColumnRef),
    IsNotNull(ColumnRef),
    And(Vec<MergeExpr>),
    Or(Vec<MergeExpr>),
}

impl MergeExpr {
    /// Evaluate against one target row and one source row.
    pub fn evaluate<'v, T, S>(&self, target: &T, source: &S) -> bool
    where
        T: Fn(&str) -> Option<&'v Value>,
        S: Fn(&str) -> Option<&'v Value>,
    {
        let resolve = |r: &ColumnRef| {
            let value = match r.alias {
                MergeAlias::Target => target(&r.column),
                MergeAlias::Source => source(&r.column),
            };
            value.filter(|v| !v.is_null())
        };
        match self {
            MergeExpr::Eq(left, right) => match (resolve(left), resolve(right)) {
                (Some(a), Some(b)) => a.compare(b) == Some(Ordering::Equal),
                _ => false,
            },
            MergeExpr::NotEq(left, right) => match (resolve(left), resolve(right)) {
                (Some(a), Some(b)) => a.compare(b) != Some(Ordering::Equal),
                _ => false,
            },
            MergeExpr::IsNull(r) => resolve(r).is_none(),
            MergeExpr::IsNotNull(r) => resolve(r).is_some(),
            MergeExpr::And(parts) => parts.iter().all(|p| p.evaluate(target, source)),
            MergeExpr::Or(parts) => parts.iter().any(|p| p.evaluate(target, source)),
        }
    }

    fn is_compound(&self) -> bool {
        matches!(self, MergeExpr::And(_) | MergeExpr::Or(_))
    }
}

impl fmt::Display for MergeExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MergeExpr::Eq(l, r) => write!(f, "({} = {})", l, r),
            MergeExpr::NotEq(l, r) => write!(f, "({} != {})", l, r),
            MergeExpr::IsNull(c) => write!(f, "{} IS NULL", c),
            MergeExpr::IsNotNull(c) => write!(f, "{} IS NOT NULL", c),
            MergeExpr::And(parts) | MergeExpr::Or(parts) => {
                let joiner = if matches!(self, MergeExpr::And(_)) { " AND " } else { " OR " };
                let rendered: Vec<String> = parts
                    .iter()
                    .map(|p| if p.is_compound() { format!("({})", p) } else { p.to_string() })
                    .collect();
                f.write_str(&rendered.join(joiner))
            }
        }
    }
}

/// Match condition: every key column equal on both sides.
pub fn build_merge_predicate<S: AsRef<str>>(columns: &[S]) -> MergeExpr {
    MergeExpr::And(
        columns
            .iter()
            .map(|c| MergeExpr::Eq(ColumnRef::target(c.as_ref()), ColumnRef::source(c.as_ref())))
            .collect(),
    )
}

/// Update condition: any column differs, counting null versus non-null.
pub fn build_when_matched_update_predicate<S: AsRef<str>>(columns: &[S]) -> MergeExpr {
    MergeExpr::Or(
        columns
            .iter()
            .map(|c| {
                let (t, s) = (ColumnRef::target(c.as_ref()), ColumnRef::source(c.as_ref()));
                MergeExpr::Or(vec![
                    MergeExpr::NotEq(t.clone(), s.clone()),
                    MergeExpr::And(vec![MergeExpr::IsNull(t.clone()), MergeExpr::IsNotNull(s.clone())]),
                    MergeExpr::And(vec![MergeExpr::IsNotNull(t), MergeExpr::IsNull(s)]),
                ])
            })
            .collect(),
    )
}

/// Update assignments `target."c" = source."c"` for each column.
pub fn build_when_matched_update_columns<S: AsRef<str>>(columns: &[S]) -> Vec<(ColumnRef, ColumnRef)> {
    columns
        .iter()
        .map(|c| (ColumnRef::target(c.as_ref()), ColumnRef::source(c.as_ref())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn row(pairs: &[(&str, Value)]) -> HashMap<String, Value> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn test_build_merge_predicate() {
        let predicate = build_merge_predicate(&["column1", "column2"]);
        assert_eq!(
            predicate.to_string(),
            r#"(target."column1" = source."column1") AND (target."column2" = source."column2")"#
        );
    }

    #[test]
    fn test_build_when_matched_update_predicate() {
        let predicate = build_when_matched_update_predicate(&["column1", "column2"]);
        let group = |c: &str| {
            format!(
                r#"((target."{c}" != source."{c}") OR (target."{c}" IS NULL AND source."{c}" IS NOT NULL) OR (target."{c}" IS NOT NULL AND source."{c}" IS NULL))"#
            )
        };
        assert_eq!(
            predicate.to_string(),
            format!("{} OR {}", group("column1"), group("column2"))
        );
    }

    #[test]
    fn test_build_when_matched_update_columns() {
        let rendered: Vec<(String, String)> = build_when_matched_update_columns(&["column1", "column2"])
            .into_iter()
            .map(|(t, s)| (t.to_string(), s.to_string()))
            .collect();
        assert_eq!(
            rendered,
            vec![
                (r#"target."column1""#.to_string(), r#"source."column1""#.to_string()),
                (r#"target."column2""#.to_string(), r#"source."column2""#.to_string()),
            ]
        );
    }

    #[test]
    fn test_null_keys_never_match() {
        let predicate = build_merge_predicate(&["id"]);
        let target = row(&[("id", Value::Null)]);
        let source = row(&[("id", Value::Null)]);
        assert!(!predicate.evaluate(&|c: &str| target.get(c), &|c: &str| source.get(c)));

        let source = row(&[("id", Value::Int64(1))]);
        let target = row(&[("id", Value::Int64(1))]);
        assert!(predicate.evaluate(&|c: &str| target.get(c), &|c: &str| source.get(c)));
    }

    #[test]
    fn test_update_predicate_detects_null_transitions() {
        let predicate = build_when_matched_update_predicate(&["name"]);
        let same = row(&[("name", Value::from("a"))]);
        let null = row(&[("name", Value::Null)]);
        let other = row(&[("name", Value::from("b"))]);

        let changed = |t: &HashMap<String, Value>, s: &HashMap<String, Value>| {
            predicate.evaluate(&|c: &str| t.get(c), &|c: &str| s.get(c))
        };
        assert!(!changed(&same, &same));
        assert!(!changed(&null, &null));
        assert!(changed(&same, &other));
        assert!(changed(&null, &same));
        assert!(changed(&same, &null));
    }
}
