//! Failure description sent to providers, and the analysis they return.

mod request;
mod result;

pub use request::{AnalysisRequest, SYSTEM_PROMPT};
pub use result::AnalysisResult;
