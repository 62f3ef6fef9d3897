//! Syndic - content distribution scheduling and publishing
//!
//! This library provides the core engine for scheduling approved content
//! for release to social platforms: the content state machine, the
//! distribution scheduler with retries, pluggable platform publishers, and
//! OAuth credential management.

pub mod audit;
pub mod config;
pub mod content;
pub mod error;
pub mod events;
pub mod logging;
pub mod platforms;
pub mod retry;
pub mod scheduler;
pub mod state;
pub mod store;
pub mod timeparse;
pub mod tokens;
pub mod types;

// Re-export commonly used types
pub use audit::{AuditSink, OperationContext};
pub use config::Config;
pub use error::{Result, SyndicError};
pub use events::{Event, EventBus};
pub use scheduler::Scheduler;
pub use store::Store;
pub use types::{
    ContentDistribution, ContentItem, ContentStatus, DistributionStatus, Platform, PublishReport,
    PublishingWindow,
};
