//! SQLite-backed durable store: deduplicated inserts, FTS5 search and tiered
//! restoration queries.

mod schema;
pub mod search;
pub mod store;
pub mod tiers;

pub use search::{SearchOptions, rewrite_query};
pub use store::{ContextStore, RecordSink, SessionStats, StoredRecord, content_hash};
pub use tiers::{Restoration, RestorationLimits, Tier1, Tier2, estimate_tokens};
