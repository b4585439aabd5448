//! Deferred frames.
//!
//! A [`LazyFrame`] pairs a declared [`Schema`] with a computation that is
//! only run on [`LazyFrame::collect`]. Operations compose the computation and
//! propagate the schema eagerly, so schema introspection never touches data.

use std::fmt;

use super::expr::Predicate;
use super::schema::Schema;
use super::DataFrame;
use crate::error::{EtlResult, SchemaError};

type Plan = Box<dyn FnOnce() -> EtlResult<DataFrame>>;

pub struct LazyFrame {
    schema: Schema,
    plan: Plan,
    steps: Vec<String>,
}

impl LazyFrame {
    /// Defer `scan`, which must produce a frame with `schema`.
    pub fn new<F>(schema: Schema, label: impl Into<String>, scan: F) -> Self
    where
        F: FnOnce() -> EtlResult<DataFrame> + 'static,
    {
        Self {
            schema,
            plan: Box::new(scan),
            steps: vec![label.into()],
        }
    }

    /// Wrap an already materialized frame.
    pub fn from_frame(df: DataFrame) -> Self {
        let schema = df.schema();
        Self::new(schema, "frame", move || Ok(df))
    }

    /// Declared output schema.
    pub fn collect_schema(&self) -> &Schema {
        &self.schema
    }

    /// Human-readable list of the deferred steps.
    pub fn describe_plan(&self) -> String {
        self.steps.join(" -> ")
    }

    /// Append a step producing `schema` from the current output.
    pub fn map<F>(self, schema: Schema, label: impl Into<String>, op: F) -> Self
    where
        F: FnOnce(DataFrame) -> EtlResult<DataFrame> + 'static,
    {
        let LazyFrame {
            plan, mut steps, ..
        } = self;
        steps.push(label.into());
        Self {
            schema,
            plan: Box::new(move || plan().and_then(op)),
            steps,
        }
    }

    /// Defer a row filter. Referenced columns are checked immediately.
    pub fn filter(self, predicate: Predicate) -> EtlResult<Self> {
        predicate.validate(&self.schema)?;
        let schema = self.schema.clone();
        let label = format!("filter({})", predicate);
        Ok(self.map(schema, label, move |df| Ok(df.filter(&predicate)?)))
    }

    /// Run the plan and verify the produced schema.
    pub fn collect(self) -> EtlResult<DataFrame> {
        let expected = self.schema;
        let df = (self.plan)()?;
        let actual = df.schema();
        if actual != expected {
            return Err(SchemaError::PlanMismatch {
                expected: describe(&expected),
                actual: describe(&actual),
            }
            .into());
        }
        Ok(df)
    }
}

fn describe(schema: &Schema) -> String {
    schema
        .fields()
        .iter()
        .map(|f| format!("{}: {}", f.name, f.data_type))
        .collect::<Vec<_>>()
        .join(", ")
}

impl fmt::Debug for LazyFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyFrame")
            .field("schema", &self.schema)
            .field("plan", &self.describe_plan())
            .finish()
    }
}
