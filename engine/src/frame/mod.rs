//! Tabular frames.
//!
//! This module provides the in-memory table model the ETL core runs on:
//! - `value`: scalar [`Value`]s and [`DataType`]s
//! - `schema`: ordered, uniquely named [`Field`]s
//! - `expr`: row [`Predicate`]s for filtering
//! - `lazy`: deferred [`LazyFrame`]s
//!
//! [`Frame`] is the capability every source, transform and sink works
//! with: either an eager [`DataFrame`] or a [`LazyFrame`], materialized
//! explicitly with [`Frame::collect`].

pub mod expr;
pub mod lazy;
pub mod schema;
pub mod value;

use std::collections::HashMap;

pub use expr::{col, ColumnExpr, CompareOp, Predicate};
pub use lazy::LazyFrame;
pub use schema::{Field, Schema};
pub use value::{now_micros, DataType, KeyValue, Value};

use crate::error::{EtlResult, FrameError, FrameResult};

// =============================================================================
// Column
// =============================================================================

/// A named, typed vector of values.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    name: String,
    data_type: DataType,
    values: Vec<Value>,
}

impl Column {
    /// Build a column, checking every value against `data_type`.
    pub fn new(name: impl Into<String>, data_type: DataType, values: Vec<Value>) -> FrameResult<Self> {
        let name = name.into();
        if let Some(bad) = values.iter().find(|v| !v.fits(data_type)) {
            return Err(FrameError::TypeMismatch {
                column: name,
                expected: data_type.to_string(),
                actual: bad.data_type().map(|t| t.to_string()).unwrap_or_default(),
            });
        }
        Ok(Self {
            name,
            data_type,
            values,
        })
    }

    /// A column of `len` copies of `value` (or nulls).
    pub fn full(name: impl Into<String>, data_type: DataType, value: Value, len: usize) -> FrameResult<Self> {
        Self::new(name, data_type, vec![value; len])
    }

    // Typed constructors coerce what they can (ints into float columns,
    // anything into text) and store null for values that do not fit.

    pub fn int64<I, T>(name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Value>,
    {
        Self::typed(name, DataType::Int64, values.into_iter().map(Into::into))
    }

    pub fn float64<I, T>(name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Value>,
    {
        Self::typed(name, DataType::Float64, values.into_iter().map(Into::into))
    }

    pub fn boolean<I, T>(name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Value>,
    {
        Self::typed(name, DataType::Boolean, values.into_iter().map(Into::into))
    }

    pub fn utf8<I, T>(name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Value>,
    {
        Self::typed(name, DataType::Utf8, values.into_iter().map(Into::into))
    }

    pub fn timestamp<I, T>(name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Value>,
    {
        Self::typed(name, DataType::Timestamp, values.into_iter().map(Into::into))
    }

    fn typed(name: impl Into<String>, data_type: DataType, values: impl IntoIterator<Item = Value>) -> Self {
        let values = values
            .into_iter()
            .map(|v| match (v, data_type) {
                (Value::Int64(i), DataType::Float64) => Value::Float64(i as f64),
                (Value::Null, DataType::Utf8) => Value::Null,
                (Value::Utf8(s), DataType::Utf8) => Value::Utf8(s),
                (other, DataType::Utf8) => Value::Utf8(other.to_string()),
                (v, dt) if v.fits(dt) => v,
                _ => Value::Null,
            })
            .collect();
        Self {
            name: name.into(),
            data_type,
            values,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn field(&self) -> Field {
        Field::new(self.name.clone(), self.data_type)
    }

    pub fn null_count(&self) -> usize {
        self.values.iter().filter(|v| v.is_null()).count()
    }

    /// Largest non-null value.
    pub fn max(&self) -> Option<&Value> {
        self.values
            .iter()
            .filter(|v| !v.is_null())
            .max_by(|a, b| a.sort_cmp(b))
    }

    pub fn rename(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    fn take(&self, indices: &[usize]) -> Self {
        Self {
            name: self.name.clone(),
            data_type: self.data_type,
            values: indices.iter().map(|&i| self.values[i].clone()).collect(),
        }
    }
}

// =============================================================================
// DataFrame
// =============================================================================

/// An eager, materialized table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataFrame {
    columns: Vec<Column>,
    height: usize,
}

impl DataFrame {
    /// Build a frame, enforcing unique names and uniform length.
    pub fn new(columns: Vec<Column>) -> FrameResult<Self> {
        let height = columns.first().map_or(0, Column::len);
        for (i, column) in columns.iter().enumerate() {
            if columns[..i].iter().any(|c| c.name == column.name) {
                return Err(FrameError::DuplicateColumn(column.name.clone()));
            }
            if column.len() != height {
                return Err(FrameError::LengthMismatch {
                    column: column.name.clone(),
                    expected: height,
                    actual: column.len(),
                });
            }
        }
        Ok(Self { columns, height })
    }

    /// Zero-row frame with the given schema.
    pub fn empty(schema: &Schema) -> Self {
        let columns = schema
            .fields()
            .iter()
            .map(|f| Column::typed(f.name.clone(), f.data_type, Vec::new()))
            .collect();
        Self { columns, height: 0 }
    }

    /// Build from row-major values in schema order.
    pub fn from_rows(schema: &Schema, rows: Vec<Vec<Value>>) -> FrameResult<Self> {
        let mut buffers: Vec<Vec<Value>> = vec![Vec::with_capacity(rows.len()); schema.len()];
        for row in rows {
            if row.len() != schema.len() {
                return Err(FrameError::InvalidArgument(format!(
                    "row has {} values, schema has {} fields",
                    row.len(),
                    schema.len()
                )));
            }
            for (buffer, value) in buffers.iter_mut().zip(row) {
                buffer.push(value);
            }
        }
        let columns = schema
            .fields()
            .iter()
            .zip(buffers)
            .map(|(f, values)| Column::new(f.name.clone(), f.data_type, values))
            .collect::<FrameResult<Vec<_>>>()?;
        Self::new(columns)
    }

    pub fn schema(&self) -> Schema {
        Schema::new(self.columns.iter().map(Column::field).collect()).unwrap_or_default()
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.height == 0
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn column(&self, name: &str) -> FrameResult<&Column> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .ok_or_else(|| FrameError::ColumnNotFound(name.to_string()))
    }

    /// Values of row `index` in column order.
    pub fn row(&self, index: usize) -> Vec<Value> {
        self.columns.iter().map(|c| c.values[index].clone()).collect()
    }

    /// Value at (`index`, `name`), if both exist.
    pub fn value(&self, index: usize, name: &str) -> Option<&Value> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .and_then(|c| c.values.get(index))
    }

    /// Hashable key tuple of row `index` over `positions`.
    pub fn key_at(&self, index: usize, positions: &[usize]) -> Vec<KeyValue> {
        positions
            .iter()
            .map(|&p| self.columns[p].values[index].key())
            .collect()
    }

    /// Resolve column names to positions.
    pub fn positions<S: AsRef<str>>(&self, names: &[S]) -> FrameResult<Vec<usize>> {
        names
            .iter()
            .map(|n| {
                self.index_of(n.as_ref())
                    .ok_or_else(|| FrameError::ColumnNotFound(n.as_ref().to_string()))
            })
            .collect()
    }

    /// Rows at `indices`, in that order.
    pub fn take(&self, indices: &[usize]) -> Self {
        Self {
            columns: self.columns.iter().map(|c| c.take(indices)).collect(),
            height: indices.len(),
        }
    }

    pub fn filter(&self, predicate: &Predicate) -> FrameResult<Self> {
        predicate.validate(&self.schema())?;
        let lookup_index: HashMap<&str, usize> = self
            .columns
            .iter()
            .enumerate()
            .map(|(i, c)| (c.name.as_str(), i))
            .collect();
        let keep: Vec<usize> = (0..self.height)
            .filter(|&row| {
                let lookup = |name: &str| {
                    lookup_index
                        .get(name)
                        .map(|&i| &self.columns[i].values[row])
                };
                predicate.evaluate(&lookup)
            })
            .collect();
        Ok(self.take(&keep))
    }

    pub fn select<S: AsRef<str>>(&self, names: &[S]) -> FrameResult<Self> {
        let columns = names
            .iter()
            .map(|n| self.column(n.as_ref()).cloned())
            .collect::<FrameResult<Vec<_>>>()?;
        Self::new(columns)
    }

    pub fn drop<S: AsRef<str>>(&self, names: &[S]) -> FrameResult<Self> {
        self.schema().require(names)?;
        let columns = self
            .columns
            .iter()
            .filter(|c| !names.iter().any(|n| n.as_ref() == c.name))
            .cloned()
            .collect();
        Self::new(columns)
    }

    /// Append a column of matching length.
    pub fn with_column(mut self, column: Column) -> FrameResult<Self> {
        if self.index_of(&column.name).is_some() {
            return Err(FrameError::DuplicateColumn(column.name));
        }
        let len = column.len();
        if !self.columns.is_empty() && len != self.height {
            return Err(FrameError::LengthMismatch {
                column: column.name,
                expected: self.height,
                actual: len,
            });
        }
        self.height = column.len();
        self.columns.push(column);
        Ok(self)
    }

    /// Replace the values of an existing column.
    pub fn replace_column(mut self, column: Column) -> FrameResult<Self> {
        let index = self
            .index_of(&column.name)
            .ok_or_else(|| FrameError::ColumnNotFound(column.name.clone()))?;
        let len = column.len();
        if len != self.height {
            return Err(FrameError::LengthMismatch {
                column: column.name,
                expected: self.height,
                actual: len,
            });
        }
        self.columns[index] = column;
        Ok(self)
    }

    /// Rename every column through `rename`; collisions are rejected.
    pub fn rename_columns<F>(self, rename: F) -> FrameResult<Self>
    where
        F: Fn(&str) -> String,
    {
        let columns = self
            .columns
            .into_iter()
            .map(|c| {
                let name = rename(&c.name);
                c.rename(name)
            })
            .collect();
        Self::new(columns)
    }

    /// Append the rows of `other`, matching columns by name.
    pub fn vstack(&self, other: &DataFrame) -> FrameResult<Self> {
        if self.width() == 0 && self.height == 0 {
            return Ok(other.clone());
        }
        let mut columns = Vec::with_capacity(self.columns.len());
        for column in &self.columns {
            let theirs = other.column(&column.name)?;
            if theirs.data_type != column.data_type {
                return Err(FrameError::TypeMismatch {
                    column: column.name.clone(),
                    expected: column.data_type.to_string(),
                    actual: theirs.data_type.to_string(),
                });
            }
            let mut values = column.values.clone();
            values.extend(theirs.values.iter().cloned());
            columns.push(Column::typed(column.name.clone(), column.data_type, values));
        }
        if other.width() != self.width() {
            let extra = other
                .column_names()
                .into_iter()
                .find(|n| self.index_of(n).is_none())
                .unwrap_or_default();
            return Err(FrameError::ColumnNotFound(extra.to_string()));
        }
        Self::new(columns)
    }

    /// Stable sort of row indices by `(position, descending)` keys.
    pub fn sorted_indices(&self, keys: &[(usize, bool)]) -> Vec<usize> {
        let mut indices: Vec<usize> = (0..self.height).collect();
        indices.sort_by(|&a, &b| {
            for &(position, descending) in keys {
                let values = &self.columns[position].values;
                let ordering = values[a].sort_cmp(&values[b]);
                let ordering = if descending { ordering.reverse() } else { ordering };
                if ordering != std::cmp::Ordering::Equal {
                    return ordering;
                }
            }
            std::cmp::Ordering::Equal
        });
        indices
    }
}

// =============================================================================
// Frame
// =============================================================================

/// Eager or deferred table, as produced by sources and consumed by sinks.
#[derive(Debug)]
pub enum Frame {
    Eager(DataFrame),
    Lazy(LazyFrame),
}

impl Frame {
    pub fn schema(&self) -> Schema {
        match self {
            Frame::Eager(df) => df.schema(),
            Frame::Lazy(lf) => lf.collect_schema().clone(),
        }
    }

    pub fn is_lazy(&self) -> bool {
        matches!(self, Frame::Lazy(_))
    }

    /// Materialize the frame.
    pub fn collect(self) -> EtlResult<DataFrame> {
        match self {
            Frame::Eager(df) => Ok(df),
            Frame::Lazy(lf) => lf.collect(),
        }
    }

    pub fn filter(self, predicate: Predicate) -> EtlResult<Frame> {
        match self {
            Frame::Eager(df) => Ok(Frame::Eager(df.filter(&predicate)?)),
            Frame::Lazy(lf) => Ok(Frame::Lazy(lf.filter(predicate)?)),
        }
    }

    /// Apply `op`, which must turn a frame of this schema into one of
    /// `schema`. Eager frames run it now; lazy frames defer it.
    pub fn map<F>(self, schema: Schema, label: &str, op: F) -> EtlResult<Frame>
    where
        F: FnOnce(DataFrame) -> EtlResult<DataFrame> + 'static,
    {
        match self {
            Frame::Eager(df) => Ok(Frame::Eager(op(df)?)),
            Frame::Lazy(lf) => Ok(Frame::Lazy(lf.map(schema, label, op))),
        }
    }
}

impl From<DataFrame> for Frame {
    fn from(df: DataFrame) -> Self {
        Frame::Eager(df)
    }
}

impl From<LazyFrame> for Frame {
    fn from(lf: LazyFrame) -> Self {
        Frame::Lazy(lf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> DataFrame {
        DataFrame::new(vec![
            Column::int64("id", [1, 2, 3]),
            Column::utf8("name", ["a", "b", "c"]),
        ])
        .unwrap()
    }

    #[test]
    fn test_length_mismatch_rejected() {
        let err = DataFrame::new(vec![
            Column::int64("id", [1, 2]),
            Column::utf8("name", ["a"]),
        ])
        .unwrap_err();
        assert!(matches!(err, FrameError::LengthMismatch { .. }));
    }

    #[test]
    fn test_added_column_length_checked() {
        let err = sample().with_column(Column::int64("extra", [1])).unwrap_err();
        assert_eq!(
            err,
            FrameError::LengthMismatch {
                column: "extra".into(),
                expected: 3,
                actual: 1,
            }
        );

        let err = sample().replace_column(Column::utf8("name", ["x", "y"])).unwrap_err();
        assert_eq!(
            err,
            FrameError::LengthMismatch {
                column: "name".into(),
                expected: 3,
                actual: 2,
            }
        );
    }

    #[test]
    fn test_column_type_checked() {
        let err = Column::new("id", DataType::Int64, vec![Value::from("x")]).unwrap_err();
        assert!(matches!(err, FrameError::TypeMismatch { .. }));
    }

    #[test]
    fn test_filter_and_select() {
        let df = sample().filter(&col("id").gt_eq(2)).unwrap();
        assert_eq!(df.height(), 2);
        let names = df.select(&["name"]).unwrap();
        assert_eq!(names.column("name").unwrap().values(), &[Value::from("b"), Value::from("c")]);
    }

    #[test]
    fn test_missing_column_is_reported() {
        assert_eq!(
            sample().column("nope").unwrap_err(),
            FrameError::ColumnNotFound("nope".into())
        );
    }

    #[test]
    fn test_vstack_aligns_by_name() {
        let other = DataFrame::new(vec![
            Column::utf8("name", ["d"]),
            Column::int64("id", [4]),
        ])
        .unwrap();
        let stacked = sample().vstack(&other).unwrap();
        assert_eq!(stacked.height(), 4);
        assert_eq!(stacked.row(3), vec![Value::Int64(4), Value::from("d")]);
    }

    #[test]
    fn test_rename_collision_rejected() {
        let err = sample().rename_columns(|_| "x".to_string()).unwrap_err();
        assert_eq!(err, FrameError::DuplicateColumn("x".into()));
    }

    #[test]
    fn test_sorted_indices_is_stable() {
        let df = DataFrame::new(vec![
            Column::int64("k", [2, 1, 2, 1]),
            Column::utf8("tag", ["a", "b", "c", "d"]),
        ])
        .unwrap();
        assert_eq!(df.sorted_indices(&[(0, true)]), vec![0, 2, 1, 3]);
        assert_eq!(df.sorted_indices(&[(0, false)]), vec![1, 3, 0, 2]);
    }

    #[test]
    fn test_max_ignores_nulls() {
        let c = Column::int64("v", [Some(3), None, Some(7)]);
        assert_eq!(c.max(), Some(&Value::Int64(7)));
        assert_eq!(c.null_count(), 1);
    }
}
