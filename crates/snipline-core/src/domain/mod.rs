//! Domain types shared across the pipeline.

pub mod error;
pub mod request;

pub use error::{PipelineError, Result};
pub use request::{PipelineSummary, RunReport, SubmitRequest};
