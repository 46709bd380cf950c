//! Bucketed query planner: filter → view resolution, the resumable cursor
//! protocol, and adaptive bucket-scan pagination.

pub mod cursor;
pub mod filter;
pub mod planner;

use filter::SortOrder;
use std::fmt;

/// Client-input errors rejected synchronously, never silently degraded.
#[derive(Debug)]
pub enum QueryError {
    InvalidCursor { detail: String },
    CursorKindMismatch { expected: &'static str, got: String },
    CursorSortMismatch { expected: SortOrder, got: SortOrder },
    Timeout,
    Backend { detail: String },
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryError::InvalidCursor { detail } => write!(f, "invalid cursor: {detail}"),
            QueryError::CursorKindMismatch { expected, got } => write!(
                f,
                "invalid cursor: expected cursor of type {expected} but got {got}"
            ),
            QueryError::CursorSortMismatch { expected, got } => write!(
                f,
                "invalid cursor: expected sort order {expected} but got cursor of {got}"
            ),
            QueryError::Timeout => {
                write!(f, "query timeout: please use more specific filters")
            }
            QueryError::Backend { detail } => write!(f, "query backend error: {detail}"),
        }
    }
}

impl std::error::Error for QueryError {}
