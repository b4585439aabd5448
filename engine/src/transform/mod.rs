//! Transformation library.
//!
//! Frame-to-frame functions used as flow post-transforms or inside custom
//! transforms:
//! - `dedup`: one row per primary key
//! - `normalize`: snake_case column names
//! - `audit`: created/modified/valid-from stamps
//! - `scd`: SCD type 2 history stitching
//! - `dimension`: surrogate key lookups
//! - `reorder`: column ordering
//!
//! Functions taking a [`crate::frame::Frame`] keep lazy inputs lazy.

pub mod audit;
pub mod dedup;
pub mod dimension;
pub mod normalize;
pub mod reorder;
pub mod scd;

pub use audit::{add_audit_columns, add_audit_columns_at};
pub use dedup::{deduplicate, NO_ORDER};
pub use dimension::{get_dimension_historical_surrogate_key, get_dimension_surrogate_key};
pub use normalize::{character_translation, normalize_column_names, normalize_column_names_default, to_snake_case};
pub use reorder::reorder_columns;
pub use scd::apply_scd_type_2;
