//! Order book matching engine: price-time priority matching with direct,
//! mint, and merge match types over YES/NO contract pairs.
//!
//! ```text
//! API Handler
//!   └→ MatchingEngine::place_order (one serializable transaction)
//!        ├→ ledger primitives (reserve/charge/credit)
//!        ├→ SQL candidate selection (FOR UPDATE SKIP LOCKED)
//!        └→ Orderbook depth cache (read-path mirror, updated after commit)
//! ```

pub mod engine;
pub mod orderbook;
pub mod types;

pub use engine::MatchingEngine;
pub use orderbook::{Orderbook, OrderbookRegistry};
pub use types::*;
