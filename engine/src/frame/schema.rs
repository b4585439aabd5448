//! Frame schemas.

use serde::{Deserialize, Serialize};

use super::value::DataType;
use crate::error::{FrameError, FrameResult};

/// A named, typed column slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub data_type: DataType,
}

impl Field {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
        }
    }
}

/// Ordered list of fields with unique names.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Schema {
    fields: Vec<Field>,
}

impl Schema {
    /// Build a schema, rejecting duplicate names.
    pub fn new(fields: Vec<Field>) -> FrameResult<Self> {
        for (i, field) in fields.iter().enumerate() {
            if fields[..i].iter().any(|f| f.name == field.name) {
                return Err(FrameError::DuplicateColumn(field.name.clone()));
            }
        }
        Ok(Self { fields })
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index_of(name).is_some()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    pub fn get(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Fails with [`FrameError::ColumnNotFound`] for the first absent name.
    pub fn require<S: AsRef<str>>(&self, names: &[S]) -> FrameResult<()> {
        match names.iter().find(|n| !self.contains(n.as_ref())) {
            Some(missing) => Err(FrameError::ColumnNotFound(missing.as_ref().to_string())),
            None => Ok(()),
        }
    }

    /// Append a field, rejecting duplicates.
    pub fn with_field(mut self, field: Field) -> FrameResult<Self> {
        if self.contains(&field.name) {
            return Err(FrameError::DuplicateColumn(field.name));
        }
        self.fields.push(field);
        Ok(self)
    }

    /// Same set of fields, ignoring order.
    pub fn same_fields(&self, other: &Schema) -> bool {
        self.len() == other.len() && self.fields.iter().all(|f| other.get(&f.name) == Some(f))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_names_rejected() {
        let result = Schema::new(vec![
            Field::new("id", DataType::Int64),
            Field::new("id", DataType::Utf8),
        ]);
        assert_eq!(result, Err(FrameError::DuplicateColumn("id".into())));
    }

    #[test]
    fn test_require_reports_missing() {
        let schema = Schema::new(vec![Field::new("id", DataType::Int64)]).unwrap();
        assert!(schema.require(&["id"]).is_ok());
        assert_eq!(
            schema.require(&["id", "name"]),
            Err(FrameError::ColumnNotFound("name".into()))
        );
    }

    #[test]
    fn test_same_fields_ignores_order() {
        let a = Schema::new(vec![
            Field::new("a", DataType::Int64),
            Field::new("b", DataType::Utf8),
        ])
        .unwrap();
        let b = Schema::new(vec![
            Field::new("b", DataType::Utf8),
            Field::new("a", DataType::Int64),
        ])
        .unwrap();
        assert!(a.same_fields(&b));
    }
}
