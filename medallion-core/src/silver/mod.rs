//! Silver layer: row validation and feature engineering.

pub mod rules;
pub mod transform;
pub mod validate;

pub use rules::{ReasonCode, RowRule};
pub use transform::{FeatureMethod, FeatureTransform, TransformReport, default_features};
pub use validate::{Rejection, ValidationOutcome, ValidationSummary, Validator};
