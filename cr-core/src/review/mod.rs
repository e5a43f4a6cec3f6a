//! Automated review: citation validation and the one-shot pipeline

pub mod citations;
mod pipeline;

pub use citations::{parse_raw_citations, repair_citation, LineCounts};
pub use pipeline::ReviewPipeline;
