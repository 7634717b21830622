//! Keyword filtering: pattern compilation, the streaming job, and the
//! registry that tracks running jobs.

pub mod job;
pub mod keywords;
pub mod pattern;
pub mod registry;

pub use job::{run_filter_job, spawn_filter_job, FilterOutcome, FilterPlan};
pub use keywords::{list_keyword_configs, KeywordConfig};
pub use pattern::{normalize_keywords, Matcher, PatternSet};
pub use registry::{JobHandle, JobRegistry, JobState, JobStatus, JobUpdate};
