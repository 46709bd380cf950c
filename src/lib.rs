pub mod chain;
pub mod query;
pub mod runtime;
pub mod store;
pub mod sync;

pub use chain::types::{Block, BlockHash, NodeInfo, Tag, Transaction};
pub use chain::{ChainError, ChainSource, HttpChainSource};
pub use query::cursor::Cursor;
pub use query::filter::{BlockRange, SortOrder, TagFilter, TxQueryParams};
pub use query::planner::{TxPage, TxSearchHit, TxSearcher};
pub use query::QueryError;
pub use runtime::config::{GatewayConfig, GatewayConfigBuilder};
pub use runtime::runner::GatewayRunner;
pub use runtime::telemetry::{init_tracing, Telemetry, TelemetrySnapshot};
pub use store::memory::MemoryStore;
pub use store::GatewayStore;
pub use sync::coordinator::ImportCoordinator;
pub use sync::engine::SyncEngine;
pub use sync::gaps::{find_missing_blocks, UnsyncedBlock};
pub use sync::session::{SessionState, SyncSession};
