//! Data models for issuegrade-service

pub mod feedback;
pub mod item;
pub mod job;

pub use feedback::{DeliveryStats, FeedbackRecord, Narrative, RecordDetails, RevisionSummary};
pub use item::Item;
pub use job::{Job, JobOptions, JobStatus, ScoreSummary, MAX_ITEMS_LIMIT};
