//! Harvest module - the per-file ingestion stages.
//!
//! - **Fetch**: [`fetch::HttpContentFetcher`] pulls a contents envelope and
//!   decodes its base64 payload
//! - **Decode**: [`decode::decode_reports`] turns the payload into scan reports
//! - **Write**: [`writer::VulnerabilityWriter`] persists one file per transaction
//! - **Pipeline**: [`pipeline::IngestPipeline`] chains the stages for one file

pub mod decode;
pub mod fetch;
pub mod pipeline;
pub mod writer;

pub use decode::{decode_reports, first_report_vulnerabilities};
pub use fetch::{decode_envelope, HttpContentFetcher};
pub use pipeline::{IngestPipeline, Outcome, TaskReport, TaskState};
pub use writer::{VulnerabilityWriter, WriteSummary, EMPTY_RISK_FACTORS};
