pub mod cache;
pub mod heuristics;
pub mod service;
pub mod types;

pub use cache::AnalysisCache;
pub use service::{AnalysisError, AnalysisService};
pub use types::{AnalysisPayload, AnalysisRequest, AnalysisResult, AnalysisSource, Operation};
