//! Gold layer: final modeling table and reproducible split.

pub mod build;
pub mod split;
pub mod version;

pub use build::{GoldReport, GoldTables, build_gold};
pub use split::{SplitAssignment, SplitPolicy, hash_fraction};
pub use version::DataVersion;
