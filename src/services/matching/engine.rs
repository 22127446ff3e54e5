//! The order book matching engine: `place_order` and `cancel_order`.
//!
//! Matching runs entirely inside one SERIALIZABLE transaction per call
//! (see [`crate::db::tx::with_serializable_retry`]). Candidate resting
//! orders are selected straight from Postgres with `FOR UPDATE SKIP
//! LOCKED`, so correctness does not depend on any in-memory structure;
//! the [`super::orderbook::OrderbookRegistry`] depth cache is updated
//! only after a commit succeeds, purely to serve `get_orderbook` cheaply.

use chrono::Utc;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::db::Database;
use crate::error::{EngineError, ServiceError};
use crate::models::{
    ContractType, Event, Market, Order, OrderSide, OrderStatus, OrderType, Trade, TradeType,
    TransactionType,
};
use crate::services::ledger;
use crate::services::matching::orderbook::OrderbookRegistry;
use crate::services::matching::types::{MatchCandidate, PlaceOrderResult};
use crate::utils::money;

pub struct MatchingEngine {
    pub db: Database,
    pub books: std::sync::Arc<OrderbookRegistry>,
    pub config: AppConfig,
}

impl MatchingEngine {
    pub fn new(db: Database, config: AppConfig, books: std::sync::Arc<OrderbookRegistry>) -> Self {
        Self { db, books, config }
    }

    /// Validates preconditions, reserves funds
    /// or shares, inserts the order, then repeatedly attempts direct,
    /// then mint, then merge matches against resting orders until the
    /// order is fully filled or no candidate remains.
    pub async fn place_order(
        &self,
        market_id: Uuid,
        user_id: Uuid,
        side: OrderSide,
        contract_type: ContractType,
        order_type: OrderType,
        price: Option<Decimal>,
        quantity: Decimal,
    ) -> Result<PlaceOrderResult, ServiceError> {
        if quantity < Decimal::ONE {
            return Err(EngineError::InvalidQuantity { value: quantity }.into());
        }
        if order_type == OrderType::Limit {
            let p = price.ok_or(EngineError::InvalidPrice { value: Decimal::ZERO })?;
            if p < Decimal::new(1, 2) || p > Decimal::new(99, 2) {
                return Err(EngineError::InvalidPrice { value: p }.into());
            }
        }

        let fee_rate = self.config.matching_fee_percentage;
        let max_attempts = self.config.max_retry_attempts;
        let base_delay = std::time::Duration::from_millis(self.config.base_retry_delay_ms);

        // MintSet/RedeemSet don't cross against the book at all: they're
        // queued here and executed directly against the ledger by the
        // background loop's drain_mint_redeem, which also marks them Filled.
        if matches!(order_type, OrderType::MintSet | OrderType::RedeemSet) {
            let order = crate::db::tx::with_serializable_retry(
                &self.db.pool, max_attempts, base_delay,
                |tx| Box::pin(async move {
                    let market = sqlx::query_as::<_, Market>("SELECT * FROM markets WHERE id = $1 FOR UPDATE")
                        .bind(market_id)
                        .fetch_one(&mut **tx)
                        .await?;
                    if market.status != crate::models::MarketStatus::Active {
                        return Err(ServiceError::Domain(EngineError::MarketNotActive {
                            market_id,
                            status: format!("{:?}", market.status),
                        }));
                    }
                    let now = Utc::now();
                    let queued_side = if order_type == OrderType::MintSet { OrderSide::Buy } else { OrderSide::Sell };
                    let order = Order {
                        id: Uuid::new_v4(),
                        market_id,
                        user_id,
                        side: queued_side,
                        contract_type,
                        order_type,
                        price: Decimal::ONE,
                        quantity,
                        filled_quantity: Decimal::ZERO,
                        status: OrderStatus::Open,
                        created_at: now,
                        updated_at: now,
                    };
                    insert_order(tx, &order).await?;
                    Ok(order)
                }),
            )
            .await?;
            return Ok(PlaceOrderResult { order, trades: Vec::new() });
        }

        let result = crate::db::tx::with_serializable_retry(
            &self.db.pool,
            max_attempts,
            base_delay,
            |tx| {
                let price = price;
                Box::pin(async move {
                    let market = sqlx::query_as::<_, Market>(
                        "SELECT * FROM markets WHERE id = $1 FOR UPDATE",
                    )
                    .bind(market_id)
                    .fetch_one(&mut **tx)
                    .await?;

                    let event = sqlx::query_as::<_, Event>("SELECT * FROM events WHERE id = $1")
                        .bind(market.event_id)
                        .fetch_one(&mut **tx)
                        .await?;

                    if !market.is_trading_active(&event, Utc::now()) {
                        return Err(ServiceError::Domain(EngineError::MarketNotActive {
                            market_id,
                            status: format!("{:?}", market.status),
                        }));
                    }

                    let price_cents = match order_type {
                        OrderType::Limit => money::price_to_cents(price.unwrap()),
                        OrderType::Market => {
                            derive_market_order_price(tx, &market, side, contract_type).await?
                        }
                        OrderType::MintSet | OrderType::RedeemSet => unreachable!("handled above"),
                    };

                    let mut account = ledger::lock_account(tx, user_id).await?;
                    let mut position = ledger::lock_position(tx, user_id, market_id).await?;

                    let stored_price = money::cents_to_price(price_cents);
                    match side {
                        OrderSide::Buy => {
                            let reserve_amount = stored_price * quantity;
                            ledger::reserve_funds(tx, &mut account, reserve_amount, None, Some(market_id))
                                .await?;
                        }
                        OrderSide::Sell => {
                            ledger::reserve_shares(&mut position, contract_type, quantity)?;
                            ledger::write_position(tx, &position).await?;
                        }
                    }

                    let now = Utc::now();
                    let mut order = Order {
                        id: Uuid::new_v4(),
                        market_id,
                        user_id,
                        side,
                        contract_type,
                        order_type,
                        price: stored_price,
                        quantity,
                        filled_quantity: Decimal::ZERO,
                        status: OrderStatus::Open,
                        created_at: now,
                        updated_at: now,
                    };
                    insert_order(tx, &order).await?;

                    // Re-lock the account/position after the buy-side reservation
                    // wrote them; subsequent fills re-fetch per-counterparty rows.
                    let mut trades = Vec::new();
                    let mut market = market;

                    loop {
                        let remaining = order.remaining();
                        if remaining.is_zero() {
                            break;
                        }

                        let attempt = attempt_one_match(
                            tx, &mut market, &mut order, fee_rate, user_id,
                        )
                        .await?;

                        match attempt {
                            Some(fill) => trades.push(fill),
                            None => break,
                        }
                    }

                    order.status = if order.filled_quantity.is_zero() {
                        OrderStatus::Open
                    } else if order.remaining().is_zero() {
                        OrderStatus::Filled
                    } else {
                        OrderStatus::PartiallyFilled
                    };
                    order.updated_at = Utc::now();
                    update_order(tx, &order).await?;

                    recompute_market_quotes(tx, &mut market).await?;
                    write_market(tx, &market).await?;

                    Ok(PlaceOrderResult { order, trades })
                })
            },
        )
        .await?;

        self.refresh_depth_cache(market_id).await;
        Ok(result)
    }

    /// Re-enters the matching loop for every resting Limit/Market order in
    /// `market_id`, oldest first — the background loop's hook for clearing
    /// crosses that arose after one order's reservation but before its own
    /// match attempt exhausted the book (e.g. a third order placed in
    /// between). Each order gets its own transaction so one stuck lock
    /// doesn't block the rest of the sweep.
    pub async fn resweep_market(&self, market_id: Uuid) -> Result<usize, ServiceError> {
        let ids: Vec<Uuid> = sqlx::query_scalar(
            "SELECT id FROM orders WHERE market_id = $1 AND status IN ('open','partially_filled')
             AND order_type IN ('limit','market') ORDER BY created_at ASC, id ASC",
        )
        .bind(market_id)
        .fetch_all(&self.db.pool)
        .await?;

        let fee_rate = self.config.matching_fee_percentage;
        let max_attempts = self.config.max_retry_attempts;
        let base_delay = std::time::Duration::from_millis(self.config.base_retry_delay_ms);
        let mut fills = 0usize;

        for order_id in ids {
            let trades = crate::db::tx::with_serializable_retry(
                &self.db.pool, max_attempts, base_delay,
                |tx| Box::pin(async move {
                    let mut order = sqlx::query_as::<_, Order>(
                        "SELECT * FROM orders WHERE id = $1 AND status IN ('open','partially_filled') FOR UPDATE",
                    )
                    .bind(order_id)
                    .fetch_optional(&mut **tx)
                    .await?;
                    let Some(order) = order.as_mut() else { return Ok(Vec::new()) };

                    let mut market = sqlx::query_as::<_, Market>("SELECT * FROM markets WHERE id = $1 FOR UPDATE")
                        .bind(market_id)
                        .fetch_one(&mut **tx)
                        .await?;
                    if market.status != crate::models::MarketStatus::Active {
                        return Ok(Vec::new());
                    }

                    let mut trades = Vec::new();
                    loop {
                        if order.remaining().is_zero() {
                            break;
                        }
                        match attempt_one_match(tx, &mut market, order, fee_rate, order.user_id).await? {
                            Some(fill) => trades.push(fill),
                            None => break,
                        }
                    }
                    if !trades.is_empty() {
                        order.status = if order.remaining().is_zero() {
                            OrderStatus::Filled
                        } else {
                            OrderStatus::PartiallyFilled
                        };
                        order.updated_at = Utc::now();
                        update_order(tx, order).await?;
                        recompute_market_quotes(tx, &mut market).await?;
                        write_market(tx, &market).await?;
                    }
                    Ok(trades)
                }),
            )
            .await?;
            fills += trades.len();
        }

        if fills > 0 {
            self.refresh_depth_cache(market_id).await;
        }
        Ok(fills)
    }

    /// Drains queued MintSet/RedeemSet orders for `market_id`: executes
    /// each against the ledger via [`crate::services::settlement::SettlementService`]'s
    /// logic and marks it Filled. An order that fails (e.g. the user no
    /// longer has the funds) is left Open and logged for retry on the next
    /// sweep, rather than cancelled, since the failure may be transient.
    pub async fn drain_mint_redeem(
        &self,
        market_id: Uuid,
        settlement: &crate::services::settlement::SettlementService,
    ) -> Result<usize, ServiceError> {
        let orders: Vec<Order> = sqlx::query_as(
            "SELECT * FROM orders WHERE market_id = $1 AND status = 'open'
             AND order_type IN ('mint_set','redeem_set') ORDER BY created_at ASC, id ASC",
        )
        .bind(market_id)
        .fetch_all(&self.db.pool)
        .await?;

        let mut drained = 0usize;
        for mut order in orders {
            let outcome = match order.order_type {
                OrderType::MintSet => settlement.mint_complete_set(market_id, order.user_id, order.quantity).await.map(|_| ()),
                OrderType::RedeemSet => settlement.redeem_complete_set(market_id, order.user_id, order.quantity).await.map(|_| ()),
                _ => unreachable!(),
            };
            match outcome {
                Ok(()) => {
                    order.status = OrderStatus::Filled;
                    order.filled_quantity = order.quantity;
                    order.updated_at = Utc::now();
                    update_order_status(&self.db, &order).await?;
                    drained += 1;
                }
                Err(ServiceError::Domain(e)) => {
                    tracing::warn!(order_id = %order.id, error = %e, "mint/redeem order left open for retry");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(drained)
    }

    /// Releases whatever the resting order had reserved and marks it cancelled.
    pub async fn cancel_order(&self, order_id: Uuid, user_id: Uuid) -> Result<Order, ServiceError> {
        let max_attempts = self.config.max_retry_attempts;
        let base_delay = std::time::Duration::from_millis(self.config.base_retry_delay_ms);

        let order = crate::db::tx::with_serializable_retry(
            &self.db.pool,
            max_attempts,
            base_delay,
            |tx| {
                Box::pin(async move {
                    let mut order = sqlx::query_as::<_, Order>(
                        "SELECT * FROM orders WHERE id = $1 FOR UPDATE",
                    )
                    .bind(order_id)
                    .fetch_one(&mut **tx)
                    .await?;

                    if order.user_id != user_id {
                        return Err(ServiceError::Domain(EngineError::OrderCancellation {
                            id: order_id,
                            reason: "not the order owner".to_string(),
                        }));
                    }
                    if !order.status.is_resting() {
                        return Err(ServiceError::Domain(EngineError::OrderCancellation {
                            id: order_id,
                            reason: format!("order is {:?}", order.status),
                        }));
                    }

                    let mut account = ledger::lock_account(tx, user_id).await?;
                    let remaining = order.remaining();

                    match order.side {
                        OrderSide::Buy => {
                            let refund = order.price * remaining;
                            ledger::release_funds(tx, &mut account, refund, Some(order.id), Some(order.market_id))
                                .await?;
                        }
                        OrderSide::Sell => {
                            let mut position =
                                ledger::lock_position(tx, user_id, order.market_id).await?;
                            ledger::release_shares(&mut position, order.contract_type, remaining);
                            ledger::write_position(tx, &position).await?;
                        }
                    }

                    order.status = OrderStatus::Cancelled;
                    order.updated_at = Utc::now();
                    update_order(tx, &order).await?;

                    let mut market = sqlx::query_as::<_, Market>(
                        "SELECT * FROM markets WHERE id = $1 FOR UPDATE",
                    )
                    .bind(order.market_id)
                    .fetch_one(&mut **tx)
                    .await?;
                    recompute_market_quotes(tx, &mut market).await?;
                    write_market(tx, &market).await?;

                    Ok(order)
                })
            },
        )
        .await?;

        self.refresh_depth_cache(order.market_id).await;
        Ok(order)
    }

    /// Rebuilds the depth cache for `market_id` from the database. Called
    /// after every commit; cheap relative to the transaction it follows
    /// and keeps `get_orderbook` honest without coupling it to matching.
    async fn refresh_depth_cache(&self, market_id: Uuid) {
        let book = self.books.get_or_create(market_id);
        let rows = sqlx::query_as::<_, MatchCandidate>(
            "SELECT id, user_id, side, contract_type, price, quantity, filled_quantity, created_at
             FROM orders WHERE market_id = $1 AND status IN ('open','partially_filled')",
        )
        .bind(market_id)
        .fetch_all(&self.db.pool)
        .await
        .unwrap_or_default();

        for row in rows {
            let is_bid = row.side == OrderSide::Buy;
            book.insert(
                row.contract_type,
                is_bid,
                row.id,
                row.user_id,
                row.price_cents(),
                row.remaining(),
                row.created_at,
            );
        }
    }
}

/// Derives the effective price for a Market order: best opposite quote,
/// falling back to the market's last traded price for that side, falling
/// back to 50c.
async fn derive_market_order_price(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    market: &Market,
    side: OrderSide,
    contract_type: ContractType,
) -> Result<i32, ServiceError> {
    let opposite_side = match side {
        OrderSide::Buy => OrderSide::Sell,
        OrderSide::Sell => OrderSide::Buy,
    };
    let order_by = match side {
        OrderSide::Buy => "price ASC",
        OrderSide::Sell => "price DESC",
    };
    let query = format!(
        "SELECT price FROM orders WHERE market_id = $1 AND contract_type = $2 AND side = $3
         AND status IN ('open','partially_filled') ORDER BY {order_by} LIMIT 1"
    );
    let best: Option<Decimal> = sqlx::query_scalar(&query)
        .bind(market.id)
        .bind(contract_type)
        .bind(opposite_side)
        .fetch_optional(&mut **tx)
        .await?;

    if let Some(price) = best {
        return Ok(money::price_to_cents(price));
    }

    let last = match contract_type {
        ContractType::Yes => market.last_yes_price,
        ContractType::No => market.last_no_price,
    };
    if last >= money::MIN_PRICE_CENTS && last <= money::MAX_PRICE_CENTS {
        return Ok(last);
    }
    Ok(50)
}

/// Attempts direct, then (if incoming is a Buy) mint, then (if incoming
/// is a Sell) merge, returning the first fill found or `None` if no
/// candidate crosses.
async fn attempt_one_match(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    market: &mut Market,
    order: &mut Order,
    fee_rate: Decimal,
    self_user_id: Uuid,
) -> Result<Option<Trade>, ServiceError> {
    if let Some(candidate) = find_direct_candidate(tx, order, self_user_id).await? {
        let trade = execute_direct_fill(tx, market, order, candidate, fee_rate).await?;
        return Ok(Some(trade));
    }

    if order.side == OrderSide::Buy {
        if let Some(candidate) = find_mint_candidate(tx, order, self_user_id).await? {
            let trade = execute_mint_fill(tx, market, order, candidate, fee_rate).await?;
            return Ok(Some(trade));
        }
    } else if let Some(candidate) = find_merge_candidate(tx, order, self_user_id).await? {
        let trade = execute_merge_fill(tx, market, order, candidate, fee_rate).await?;
        return Ok(Some(trade));
    }

    Ok(None)
}

async fn find_direct_candidate(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    order: &Order,
    self_user_id: Uuid,
) -> Result<Option<MatchCandidate>, sqlx::Error> {
    let (opposite_side, order_by): (OrderSide, &str) = match order.side {
        OrderSide::Buy => (OrderSide::Sell, "price ASC, created_at ASC, id ASC"),
        OrderSide::Sell => (OrderSide::Buy, "price DESC, created_at ASC, id ASC"),
    };
    let price_cmp = match order.side {
        OrderSide::Buy => "price <= $4",
        OrderSide::Sell => "price >= $4",
    };
    let query = format!(
        "SELECT id, user_id, side, contract_type, price, quantity, filled_quantity, created_at
         FROM orders
         WHERE market_id = $1 AND contract_type = $2 AND side = $3 AND user_id <> $5
           AND status IN ('open','partially_filled') AND {price_cmp}
         ORDER BY {order_by} LIMIT 1 FOR UPDATE SKIP LOCKED"
    );
    sqlx::query_as::<_, MatchCandidate>(&query)
        .bind(order.market_id)
        .bind(order.contract_type)
        .bind(opposite_side)
        .bind(order.price)
        .bind(self_user_id)
        .fetch_optional(&mut **tx)
        .await
}

async fn find_mint_candidate(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    order: &Order,
    self_user_id: Uuid,
) -> Result<Option<MatchCandidate>, sqlx::Error> {
    let min_resting_price = Decimal::ONE - order.price;
    let query = "SELECT id, user_id, side, contract_type, price, quantity, filled_quantity, created_at
         FROM orders
         WHERE market_id = $1 AND contract_type = $2 AND side = 'buy' AND user_id <> $4
           AND status IN ('open','partially_filled') AND price >= $3
         ORDER BY price DESC, created_at ASC, id ASC LIMIT 1 FOR UPDATE SKIP LOCKED";
    sqlx::query_as::<_, MatchCandidate>(query)
        .bind(order.market_id)
        .bind(order.contract_type.opposite())
        .bind(min_resting_price)
        .bind(self_user_id)
        .fetch_optional(&mut **tx)
        .await
}

async fn find_merge_candidate(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    order: &Order,
    self_user_id: Uuid,
) -> Result<Option<MatchCandidate>, sqlx::Error> {
    let max_resting_price = Decimal::ONE - order.price;
    let query = "SELECT id, user_id, side, contract_type, price, quantity, filled_quantity, created_at
         FROM orders
         WHERE market_id = $1 AND contract_type = $2 AND side = 'sell' AND user_id <> $4
           AND status IN ('open','partially_filled') AND price <= $3
         ORDER BY price ASC, created_at ASC, id ASC LIMIT 1 FOR UPDATE SKIP LOCKED";
    sqlx::query_as::<_, MatchCandidate>(query)
        .bind(order.market_id)
        .bind(order.contract_type.opposite())
        .bind(max_resting_price)
        .bind(self_user_id)
        .fetch_optional(&mut **tx)
        .await
}

/// Locks two accounts and two positions in the deterministic global order
/// (sorted by id) required to avoid deadlock across concurrent matches.
async fn lock_two_participants(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    market_id: Uuid,
    a_user: Uuid,
    b_user: Uuid,
) -> Result<
    (
        crate::models::Account,
        crate::models::Account,
        crate::models::Position,
        crate::models::Position,
    ),
    sqlx::Error,
> {
    let (first, second) = if a_user <= b_user { (a_user, b_user) } else { (b_user, a_user) };
    let first_account = ledger::lock_account(tx, first).await.map_err(to_sqlx)?;
    let second_account = ledger::lock_account(tx, second).await.map_err(to_sqlx)?;
    let first_position = ledger::lock_position(tx, first, market_id).await.map_err(to_sqlx)?;
    let second_position = ledger::lock_position(tx, second, market_id).await.map_err(to_sqlx)?;

    if first == a_user {
        Ok((first_account, second_account, first_position, second_position))
    } else {
        Ok((second_account, first_account, second_position, first_position))
    }
}

fn to_sqlx(e: ServiceError) -> sqlx::Error {
    match e {
        ServiceError::Db(db) => db,
        ServiceError::Domain(domain) => sqlx::Error::Protocol(domain.to_string()),
    }
}

async fn execute_direct_fill(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    market: &mut Market,
    incoming: &mut Order,
    mut resting: MatchCandidate,
    fee_rate: Decimal,
) -> Result<Trade, ServiceError> {
    let fill_qty = incoming.remaining().min(resting.remaining());
    // Direct trades always clear at the maker's (resting order's) price.
    let maker_price_cents = resting.price_cents();

    let (buyer_id, seller_id, buy_order_id, sell_order_id, buyer_own_price) = match incoming.side {
        OrderSide::Buy => (incoming.user_id, resting.user_id, incoming.id, resting.id, incoming.price),
        OrderSide::Sell => (resting.user_id, incoming.user_id, resting.id, incoming.id, resting.price),
    };

    let (mut account_a, mut account_b, mut position_a, mut position_b) =
        lock_two_participants(tx, incoming.market_id, incoming.user_id, resting.user_id).await?;
    let (buyer_account, seller_account, buyer_position, seller_position) =
        reorder_by_user(buyer_id, &mut account_a, &mut account_b, &mut position_a, &mut position_b);

    let cost = Decimal::from(maker_price_cents) / Decimal::from(100) * fill_qty;
    let fee = cost * fee_rate;

    // The buyer's reservation was made at their own order's price (the
    // taker price if incoming, the maker price if resting); release it
    // before charging the actual execution cost out of the free balance.
    let reserved_amount = buyer_own_price * fill_qty;
    ledger::release_funds(tx, buyer_account, reserved_amount, Some(buy_order_id), Some(market.id)).await?;
    ledger::charge(
        tx, buyer_account, cost, TransactionType::TradeBuy,
        Some(buy_order_id), None, Some(market.id), "direct match buy",
    )
    .await?;

    let net_to_seller = cost - fee;
    ledger::credit(
        tx, seller_account, net_to_seller, TransactionType::TradeSell,
        Some(sell_order_id), None, Some(market.id), "direct match sell",
    )
    .await?;
    market.fees_collected += fee;

    // `release_shares` drains only the reserved pool; `apply_sell_fill` is
    // what actually removes the shares from the seller's holding, so the
    // quantity is decremented exactly once.
    ledger::release_shares(seller_position, incoming.contract_type, fill_qty);
    buyer_position.apply_buy_fill(incoming.contract_type, fill_qty, Decimal::from(maker_price_cents));
    seller_position.apply_sell_fill(incoming.contract_type, fill_qty, Decimal::from(maker_price_cents));

    ledger::write_position(tx, buyer_position).await?;
    ledger::write_position(tx, seller_position).await?;

    apply_fill_to_order(incoming, fill_qty);
    resting.filled_quantity += fill_qty;
    persist_candidate_fill(tx, &resting).await?;

    market.total_volume += fill_qty;
    update_market_last_price(market, incoming.contract_type, maker_price_cents);

    let trade = Trade {
        id: Uuid::new_v4(),
        market_id: market.id,
        buy_order_id,
        sell_order_id,
        buyer_id,
        seller_id,
        contract_type: incoming.contract_type,
        price_cents: maker_price_cents,
        quantity: fill_qty,
        trade_type: TradeType::Direct,
        executed_at: Utc::now(),
    };
    insert_trade(tx, &trade).await?;
    Ok(trade)
}

async fn execute_mint_fill(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    market: &mut Market,
    incoming: &mut Order,
    mut resting: MatchCandidate,
    fee_rate: Decimal,
) -> Result<Trade, ServiceError> {
    let fill_qty = incoming.remaining().min(resting.remaining());
    let incoming_price_cents = incoming.price_cents();
    let resting_price_cents = resting.price_cents();

    let (mut incoming_account, mut resting_account, mut incoming_position, mut resting_position) =
        lock_two_participants(tx, incoming.market_id, incoming.user_id, resting.user_id).await?;
    let (incoming_account, resting_account, incoming_position, resting_position) =
        reorder_by_user(incoming.user_id, &mut incoming_account, &mut resting_account, &mut incoming_position, &mut resting_position);

    let incoming_cost = incoming.price * fill_qty;
    let resting_cost = resting.price * fill_qty;
    let incoming_fee = incoming_cost * fee_rate;
    let resting_fee = resting_cost * fee_rate;

    ledger::release_funds(tx, incoming_account, incoming_cost, Some(incoming.id), Some(market.id)).await?;
    ledger::charge(
        tx, incoming_account, incoming_cost + incoming_fee, TransactionType::MintMatch,
        Some(incoming.id), None, Some(market.id), "mint match",
    )
    .await?;
    ledger::release_funds(tx, resting_account, resting_cost, Some(resting.id), Some(market.id)).await?;
    ledger::charge(
        tx, resting_account, resting_cost + resting_fee, TransactionType::MintMatch,
        Some(resting.id), None, Some(market.id), "mint match",
    )
    .await?;
    market.fees_collected += incoming_fee + resting_fee;

    incoming_position.apply_buy_fill(incoming.contract_type, fill_qty, Decimal::from(incoming_price_cents));
    resting_position.apply_buy_fill(incoming.contract_type.opposite(), fill_qty, Decimal::from(resting_price_cents));

    ledger::write_position(tx, incoming_position).await?;
    ledger::write_position(tx, resting_position).await?;

    apply_fill_to_order(incoming, fill_qty);
    resting.filled_quantity += fill_qty;
    persist_candidate_fill(tx, &resting).await?;

    market.total_shares_outstanding += fill_qty;
    market.total_volume += fill_qty;

    let trade = Trade {
        id: Uuid::new_v4(),
        market_id: market.id,
        buy_order_id: incoming.id,
        sell_order_id: resting.id,
        buyer_id: incoming.user_id,
        seller_id: resting.user_id,
        contract_type: incoming.contract_type,
        price_cents: incoming_price_cents,
        quantity: fill_qty,
        trade_type: TradeType::Mint,
        executed_at: Utc::now(),
    };
    insert_trade(tx, &trade).await?;
    Ok(trade)
}

async fn execute_merge_fill(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    market: &mut Market,
    incoming: &mut Order,
    mut resting: MatchCandidate,
    fee_rate: Decimal,
) -> Result<Trade, ServiceError> {
    let fill_qty = incoming.remaining().min(resting.remaining());
    let incoming_price_cents = incoming.price_cents();
    let resting_price_cents = resting.price_cents();

    let (mut incoming_account, mut resting_account, mut incoming_position, mut resting_position) =
        lock_two_participants(tx, incoming.market_id, incoming.user_id, resting.user_id).await?;
    let (incoming_account, resting_account, incoming_position, resting_position) =
        reorder_by_user(incoming.user_id, &mut incoming_account, &mut resting_account, &mut incoming_position, &mut resting_position);

    let incoming_payout = incoming.price * fill_qty;
    let resting_payout = resting.price * fill_qty;
    let incoming_fee = incoming_payout * fee_rate;
    let resting_fee = resting_payout * fee_rate;

    // As in the direct-match path, `release_shares` only drains the
    // reserved pool; `apply_sell_fill` below performs the one and only
    // decrement of the held quantity.
    ledger::release_shares(incoming_position, incoming.contract_type, fill_qty);
    ledger::release_shares(resting_position, incoming.contract_type.opposite(), fill_qty);

    ledger::credit(
        tx, incoming_account, incoming_payout - incoming_fee, TransactionType::MergeMatch,
        Some(incoming.id), None, Some(market.id), "merge match",
    )
    .await?;
    ledger::credit(
        tx, resting_account, resting_payout - resting_fee, TransactionType::MergeMatch,
        Some(resting.id), None, Some(market.id), "merge match",
    )
    .await?;
    market.fees_collected += incoming_fee + resting_fee;

    incoming_position.apply_sell_fill(incoming.contract_type, fill_qty, Decimal::from(incoming_price_cents));
    resting_position.apply_sell_fill(incoming.contract_type.opposite(), fill_qty, Decimal::from(resting_price_cents));

    ledger::write_position(tx, incoming_position).await?;
    ledger::write_position(tx, resting_position).await?;

    apply_fill_to_order(incoming, fill_qty);
    resting.filled_quantity += fill_qty;
    persist_candidate_fill(tx, &resting).await?;

    market.total_shares_outstanding -= fill_qty;
    market.total_volume += fill_qty;

    let trade = Trade {
        id: Uuid::new_v4(),
        market_id: market.id,
        buy_order_id: incoming.id,
        sell_order_id: resting.id,
        buyer_id: incoming.user_id,
        seller_id: resting.user_id,
        contract_type: incoming.contract_type,
        price_cents: incoming_price_cents,
        quantity: fill_qty,
        trade_type: TradeType::Merge,
        executed_at: Utc::now(),
    };
    insert_trade(tx, &trade).await?;
    Ok(trade)
}

fn reorder_by_user<'a>(
    incoming_user_id: Uuid,
    a: &'a mut crate::models::Account,
    b: &'a mut crate::models::Account,
    pa: &'a mut crate::models::Position,
    pb: &'a mut crate::models::Position,
) -> (
    &'a mut crate::models::Account,
    &'a mut crate::models::Account,
    &'a mut crate::models::Position,
    &'a mut crate::models::Position,
) {
    if a.id == incoming_user_id {
        (a, b, pa, pb)
    } else {
        (b, a, pb, pa)
    }
}

fn apply_fill_to_order(order: &mut Order, fill_qty: Decimal) {
    order.filled_quantity += fill_qty;
}

fn update_market_last_price(market: &mut Market, contract_type: ContractType, price_cents: i32) {
    match contract_type {
        ContractType::Yes => {
            market.last_yes_price = price_cents;
            market.last_no_price = 100 - price_cents;
        }
        ContractType::No => {
            market.last_no_price = price_cents;
            market.last_yes_price = 100 - price_cents;
        }
    }
}

async fn insert_order(tx: &mut sqlx::Transaction<'_, sqlx::Postgres>, order: &Order) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO orders (id, market_id, user_id, side, contract_type, order_type, price,
            quantity, filled_quantity, status, created_at, updated_at)
         VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12)",
    )
    .bind(order.id)
    .bind(order.market_id)
    .bind(order.user_id)
    .bind(order.side)
    .bind(order.contract_type)
    .bind(order.order_type)
    .bind(order.price)
    .bind(order.quantity)
    .bind(order.filled_quantity)
    .bind(order.status)
    .bind(order.created_at)
    .bind(order.updated_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn update_order_status(db: &Database, order: &Order) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE orders SET filled_quantity = $1, status = $2, updated_at = $3 WHERE id = $4",
    )
    .bind(order.filled_quantity)
    .bind(order.status)
    .bind(order.updated_at)
    .bind(order.id)
    .execute(&db.pool)
    .await?;
    Ok(())
}

async fn update_order(tx: &mut sqlx::Transaction<'_, sqlx::Postgres>, order: &Order) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE orders SET filled_quantity = $1, status = $2, updated_at = $3 WHERE id = $4",
    )
    .bind(order.filled_quantity)
    .bind(order.status)
    .bind(order.updated_at)
    .bind(order.id)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn persist_candidate_fill(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    candidate: &MatchCandidate,
) -> Result<(), sqlx::Error> {
    let status = if candidate.remaining().is_zero() {
        OrderStatus::Filled
    } else {
        OrderStatus::PartiallyFilled
    };
    sqlx::query("UPDATE orders SET filled_quantity = $1, status = $2, updated_at = now() WHERE id = $3")
        .bind(candidate.filled_quantity)
        .bind(status)
        .bind(candidate.id)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

async fn insert_trade(tx: &mut sqlx::Transaction<'_, sqlx::Postgres>, trade: &Trade) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO trades (id, market_id, buy_order_id, sell_order_id, buyer_id, seller_id,
            contract_type, price_cents, quantity, trade_type, executed_at)
         VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11)",
    )
    .bind(trade.id)
    .bind(trade.market_id)
    .bind(trade.buy_order_id)
    .bind(trade.sell_order_id)
    .bind(trade.buyer_id)
    .bind(trade.seller_id)
    .bind(trade.contract_type)
    .bind(trade.price_cents)
    .bind(trade.quantity)
    .bind(trade.trade_type)
    .bind(trade.executed_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn write_market(tx: &mut sqlx::Transaction<'_, sqlx::Postgres>, market: &Market) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE markets SET last_yes_price = $1, last_no_price = $2,
            best_yes_bid = $3, best_yes_ask = $4, best_no_bid = $5, best_no_ask = $6,
            total_volume = $7, total_shares_outstanding = $8, fees_collected = $9, updated_at = $10
         WHERE id = $11",
    )
    .bind(market.last_yes_price)
    .bind(market.last_no_price)
    .bind(market.best_yes_bid)
    .bind(market.best_yes_ask)
    .bind(market.best_no_bid)
    .bind(market.best_no_ask)
    .bind(market.total_volume)
    .bind(market.total_shares_outstanding)
    .bind(market.fees_collected)
    .bind(Utc::now())
    .bind(market.id)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Recomputes the market's cached best-bid/ask quotes from the resting
/// order book, run once
/// per transaction rather than per fill.
async fn recompute_market_quotes(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    market: &mut Market,
) -> Result<(), sqlx::Error> {
    market.best_yes_bid = best_quote(tx, market.id, ContractType::Yes, OrderSide::Buy).await?;
    market.best_yes_ask = best_quote(tx, market.id, ContractType::Yes, OrderSide::Sell).await?;
    market.best_no_bid = best_quote(tx, market.id, ContractType::No, OrderSide::Buy).await?;
    market.best_no_ask = best_quote(tx, market.id, ContractType::No, OrderSide::Sell).await?;
    Ok(())
}

async fn best_quote(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    market_id: Uuid,
    contract_type: ContractType,
    side: OrderSide,
) -> Result<Option<i32>, sqlx::Error> {
    let order_by = match side {
        OrderSide::Buy => "price DESC",
        OrderSide::Sell => "price ASC",
    };
    let query = format!(
        "SELECT price FROM orders WHERE market_id = $1 AND contract_type = $2 AND side = $3
         AND status IN ('open','partially_filled') ORDER BY {order_by} LIMIT 1"
    );
    let price: Option<Decimal> = sqlx::query_scalar(&query)
        .bind(market_id)
        .bind(contract_type)
        .bind(side)
        .fetch_optional(&mut **tx)
        .await?;
    Ok(price.map(money::price_to_cents))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn make_order(quantity: Decimal, filled: Decimal) -> Order {
        Order {
            id: Uuid::new_v4(),
            market_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            side: OrderSide::Buy,
            contract_type: ContractType::Yes,
            order_type: OrderType::Limit,
            price: dec!(0.5),
            quantity,
            filled_quantity: filled,
            status: OrderStatus::Open,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn apply_fill_accumulates_filled_quantity() {
        let mut order = make_order(dec!(10), dec!(3));
        apply_fill_to_order(&mut order, dec!(2));
        assert_eq!(order.filled_quantity, dec!(5));
        assert_eq!(order.remaining(), dec!(5));
    }

    #[test]
    fn yes_and_no_last_prices_always_sum_to_one_hundred_cents() {
        let mut market = Market {
            id: Uuid::new_v4(),
            event_id: Uuid::new_v4(),
            question: "will it happen".into(),
            status: crate::models::MarketStatus::Active,
            winning_outcome: None,
            last_yes_price: 50,
            last_no_price: 50,
            best_yes_bid: None,
            best_yes_ask: None,
            best_no_bid: None,
            best_no_ask: None,
            total_volume: Decimal::ZERO,
            total_shares_outstanding: Decimal::ZERO,
            fees_collected: Decimal::ZERO,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        update_market_last_price(&mut market, ContractType::Yes, 73);
        assert_eq!(market.last_yes_price, 73);
        assert_eq!(market.last_no_price, 27);

        update_market_last_price(&mut market, ContractType::No, 40);
        assert_eq!(market.last_no_price, 40);
        assert_eq!(market.last_yes_price, 60);
    }

    fn make_account(id: Uuid) -> crate::models::Account {
        crate::models::Account {
            id,
            username: "trader".into(),
            balance: dec!(0),
            reserved: dec!(0),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn reorder_by_user_puts_incoming_participant_first() {
        let incoming_id = Uuid::new_v4();
        let market_id = Uuid::new_v4();
        let mut a = make_account(incoming_id);
        let mut b = make_account(Uuid::new_v4());
        let mut pa = crate::models::Position::new(incoming_id, market_id);
        let mut pb = crate::models::Position::new(b.id, market_id);

        let (first, _second, first_pos, _second_pos) =
            reorder_by_user(incoming_id, &mut a, &mut b, &mut pa, &mut pb);
        assert_eq!(first.id, incoming_id);
        assert_eq!(first_pos.user_id, incoming_id);
    }
}
