//! Bronze layer: append-only raw store with a manifest of ingested batches.

pub mod ingest;
pub mod manifest;

pub use ingest::{IngestReport, batch_id, list_batches};
pub use manifest::{IngestManifest, ManifestEntry};
