pub mod builder;
pub mod knowledge_base;
pub mod validation;

pub use builder::{BuildOptions, BuildSummary, IndexBuilder};
pub use knowledge_base::KnowledgeBase;
pub use validation::{IntegrityIssue, IntegrityReport, validate_knowledge_base};
