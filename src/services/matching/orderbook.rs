//! In-memory depth cache, one per market, built and kept current by the
//! matching engine after every commit. Serves `get_orderbook` without a
//! database round trip; never the source of truth for a matching decision.

use dashmap::DashMap;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use uuid::Uuid;

use super::types::{DepthLevel, OrderbookSnapshot, RestingOrder};
use crate::models::ContractType;

/// Bids are keyed so iteration from `next_back()` yields the highest
/// price first; asks so `next()` yields the lowest price first — both
/// plain ascending `i32` orderings, just read from opposite ends.
type Book = RwLock<BTreeMap<i32, VecDeque<RestingOrder>>>;

pub struct Orderbook {
    pub market_id: Uuid,
    yes_bids: Book,
    yes_asks: Book,
    no_bids: Book,
    no_asks: Book,
    sequence: AtomicU64,
}

impl Orderbook {
    pub fn new(market_id: Uuid) -> Self {
        Self {
            market_id,
            yes_bids: RwLock::new(BTreeMap::new()),
            yes_asks: RwLock::new(BTreeMap::new()),
            no_bids: RwLock::new(BTreeMap::new()),
            no_asks: RwLock::new(BTreeMap::new()),
            sequence: AtomicU64::new(0),
        }
    }

    fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, AtomicOrdering::Relaxed)
    }

    fn book(&self, contract: ContractType, is_bid: bool) -> &Book {
        match (contract, is_bid) {
            (ContractType::Yes, true) => &self.yes_bids,
            (ContractType::Yes, false) => &self.yes_asks,
            (ContractType::No, true) => &self.no_bids,
            (ContractType::No, false) => &self.no_asks,
        }
    }

    pub fn insert(
        &self,
        contract: ContractType,
        is_bid: bool,
        order_id: Uuid,
        user_id: Uuid,
        price_cents: i32,
        remaining: Decimal,
        created_at: chrono::DateTime<chrono::Utc>,
    ) {
        if remaining.is_zero() {
            return;
        }
        let entry = RestingOrder {
            order_id,
            user_id,
            price_cents,
            remaining,
            created_at,
            sequence: self.next_sequence(),
        };
        let mut book = self.book(contract, is_bid).write();
        book.entry(price_cents).or_insert_with(VecDeque::new).push_back(entry);
    }

    /// Updates or removes the resting entry for `order_id` to reflect its
    /// new remaining quantity (zero removes it), without changing price.
    pub fn update_remaining(
        &self,
        contract: ContractType,
        is_bid: bool,
        price_cents: i32,
        order_id: Uuid,
        new_remaining: Decimal,
    ) {
        let mut book = self.book(contract, is_bid).write();
        if let Some(level) = book.get_mut(&price_cents) {
            if new_remaining.is_zero() {
                level.retain(|o| o.order_id != order_id);
            } else if let Some(entry) = level.iter_mut().find(|o| o.order_id == order_id) {
                entry.remaining = new_remaining;
            }
            if level.is_empty() {
                book.remove(&price_cents);
            }
        }
    }

    pub fn remove(&self, contract: ContractType, is_bid: bool, price_cents: i32, order_id: Uuid) {
        self.update_remaining(contract, is_bid, price_cents, order_id, Decimal::ZERO);
    }

    fn aggregate(book: &Book, best_first: bool, depth: usize) -> Vec<DepthLevel> {
        let guard = book.read();
        let mut levels: Vec<DepthLevel> = guard
            .iter()
            .map(|(price, entries)| DepthLevel {
                price_cents: *price,
                quantity: entries.iter().map(|o| o.remaining).sum(),
            })
            .collect();
        if best_first {
            levels.reverse();
        }
        levels.truncate(depth);
        levels
    }

    pub fn snapshot(&self, depth: usize) -> OrderbookSnapshot {
        OrderbookSnapshot {
            market_id: self.market_id,
            yes_bids: Self::aggregate(&self.yes_bids, true, depth),
            yes_asks: Self::aggregate(&self.yes_asks, false, depth),
            no_bids: Self::aggregate(&self.no_bids, true, depth),
            no_asks: Self::aggregate(&self.no_asks, false, depth),
        }
    }

    pub fn best_bid(&self, contract: ContractType) -> Option<i32> {
        self.book(contract, true).read().keys().next_back().copied()
    }

    pub fn best_ask(&self, contract: ContractType) -> Option<i32> {
        self.book(contract, false).read().keys().next().copied()
    }
}

/// Registry of per-market depth caches, keyed by market id. Lock-free
/// reads/writes across markets via `DashMap`.
#[derive(Default)]
pub struct OrderbookRegistry {
    books: DashMap<Uuid, Orderbook>,
}

impl OrderbookRegistry {
    pub fn new() -> Self {
        Self { books: DashMap::new() }
    }

    pub fn get_or_create(&self, market_id: Uuid) -> dashmap::mapref::one::Ref<'_, Uuid, Orderbook> {
        self.books.entry(market_id).or_insert_with(|| Orderbook::new(market_id));
        self.books.get(&market_id).expect("just inserted")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    #[test]
    fn bids_aggregate_best_price_first() {
        let book = Orderbook::new(Uuid::new_v4());
        book.insert(ContractType::Yes, true, Uuid::new_v4(), Uuid::new_v4(), 40, dec!(5), Utc::now());
        book.insert(ContractType::Yes, true, Uuid::new_v4(), Uuid::new_v4(), 60, dec!(3), Utc::now());
        let snap = book.snapshot(10);
        assert_eq!(snap.yes_bids[0].price_cents, 60);
        assert_eq!(snap.yes_bids[1].price_cents, 40);
    }

    #[test]
    fn update_remaining_to_zero_removes_level() {
        let order_id = Uuid::new_v4();
        let book = Orderbook::new(Uuid::new_v4());
        book.insert(ContractType::No, false, order_id, Uuid::new_v4(), 55, dec!(10), Utc::now());
        book.update_remaining(ContractType::No, false, 55, order_id, Decimal::ZERO);
        assert!(book.snapshot(10).no_asks.is_empty());
    }
}
