pub mod api;
pub mod batch;
pub mod config;
pub mod database;
pub mod delta;
pub mod fingerprint;
pub mod loader;
pub mod merge;
pub mod models;
pub mod pager;
pub mod quota;
pub mod source;
pub mod synchronizer;

pub use models::{ClosedPosition, FilterState, HistoryPage, HistoryQuery, PageMeta, Quota, SortSpec, Subject};
pub use source::HistorySource;
pub use synchronizer::{Phase, SkipReason, SyncOutcome, SyncSnapshot, Synchronizer};
