//! SQLite engine store implementation.
//!
//! Persists bots, deals, and orders through Diesel. The two composite
//! writes run inside a single transaction so a deal's aggregate never
//! becomes observable half-updated.

use async_trait::async_trait;
use diesel::prelude::*;

use crate::adapter::sqlite::connection::DbPool;
use crate::adapter::sqlite::model::{BotRow, DealRow, OrderRow};
use crate::adapter::sqlite::schema::{bots, deals, orders};
use crate::domain::{
    Bot, BotId, BotStatus, Deal, DealId, ExternalOrderId, Order, OrderId, OrderType,
};
use crate::error::{Error, Result};
use crate::port::Store;

const OPEN_DEAL_STATUSES: [&str; 2] = ["PENDING", "ACTIVE"];
const LIVE_ORDER_STATUSES: [&str; 2] = ["PLACED", "PARTIALLY_FILLED"];

/// SQLite-backed engine store.
pub struct SqliteStore {
    pool: DbPool,
}

impl SqliteStore {
    /// Create a new SQLite store with the given connection pool.
    #[must_use]
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn conn(
        &self,
    ) -> Result<diesel::r2d2::PooledConnection<diesel::r2d2::ConnectionManager<SqliteConnection>>>
    {
        self.pool.get().map_err(|e| Error::Connection(e.to_string()))
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn insert_bot(&self, bot: &Bot) -> Result<()> {
        let row = BotRow::from_domain(bot);
        let mut conn = self.conn()?;
        diesel::insert_into(bots::table)
            .values(&row)
            .execute(&mut conn)
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(())
    }

    async fn bot(&self, id: &BotId) -> Result<Option<Bot>> {
        let mut conn = self.conn()?;
        let row: Option<BotRow> = bots::table
            .find(id.to_string())
            .first(&mut conn)
            .optional()
            .map_err(|e| Error::Database(e.to_string()))?;
        row.map(BotRow::into_domain).transpose()
    }

    async fn set_bot_status(&self, id: &BotId, status: BotStatus) -> Result<()> {
        let mut conn = self.conn()?;
        let updated = diesel::update(bots::table.find(id.to_string()))
            .set(bots::status.eq(status.as_str()))
            .execute(&mut conn)
            .map_err(|e| Error::Database(e.to_string()))?;
        if updated == 0 {
            return Err(Error::NotFound {
                kind: "bot",
                id: id.to_string(),
            });
        }
        Ok(())
    }

    async fn running_bots(&self) -> Result<Vec<Bot>> {
        let mut conn = self.conn()?;
        let rows: Vec<BotRow> = bots::table
            .filter(bots::status.eq(BotStatus::Running.as_str()))
            .load(&mut conn)
            .map_err(|e| Error::Database(e.to_string()))?;
        rows.into_iter().map(BotRow::into_domain).collect()
    }

    async fn insert_deal(&self, deal: &Deal) -> Result<()> {
        let row = DealRow::from_domain(deal);
        let mut conn = self.conn()?;
        diesel::insert_into(deals::table)
            .values(&row)
            .execute(&mut conn)
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(())
    }

    async fn deal(&self, id: &DealId) -> Result<Option<Deal>> {
        let mut conn = self.conn()?;
        let row: Option<DealRow> = deals::table
            .find(id.to_string())
            .first(&mut conn)
            .optional()
            .map_err(|e| Error::Database(e.to_string()))?;
        row.map(DealRow::into_domain).transpose()
    }

    async fn update_deal(&self, deal: &Deal) -> Result<()> {
        let row = DealRow::from_domain(deal);
        let mut conn = self.conn()?;
        diesel::replace_into(deals::table)
            .values(&row)
            .execute(&mut conn)
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(())
    }

    async fn open_deal_for_bot(&self, bot_id: &BotId) -> Result<Option<Deal>> {
        let mut conn = self.conn()?;
        let row: Option<DealRow> = deals::table
            .filter(deals::bot_id.eq(bot_id.to_string()))
            .filter(deals::status.eq_any(OPEN_DEAL_STATUSES))
            .first(&mut conn)
            .optional()
            .map_err(|e| Error::Database(e.to_string()))?;
        row.map(DealRow::into_domain).transpose()
    }

    async fn open_deals(&self) -> Result<Vec<Deal>> {
        let mut conn = self.conn()?;
        let rows: Vec<DealRow> = deals::table
            .filter(deals::status.eq_any(OPEN_DEAL_STATUSES))
            .order(deals::started_at.asc())
            .load(&mut conn)
            .map_err(|e| Error::Database(e.to_string()))?;
        rows.into_iter().map(DealRow::into_domain).collect()
    }

    async fn insert_order(&self, order: &Order) -> Result<()> {
        let row = OrderRow::from_domain(order);
        let mut conn = self.conn()?;
        diesel::insert_into(orders::table)
            .values(&row)
            .execute(&mut conn)
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(())
    }

    async fn order(&self, id: &OrderId) -> Result<Option<Order>> {
        let mut conn = self.conn()?;
        let row: Option<OrderRow> = orders::table
            .find(id.to_string())
            .first(&mut conn)
            .optional()
            .map_err(|e| Error::Database(e.to_string()))?;
        row.map(OrderRow::into_domain).transpose()
    }

    async fn order_by_external(
        &self,
        external_id: &ExternalOrderId,
        symbol: &str,
    ) -> Result<Option<Order>> {
        let mut conn = self.conn()?;
        let row: Option<OrderRow> = orders::table
            .filter(orders::external_id.eq(external_id.as_str()))
            .filter(orders::symbol.eq(symbol))
            .first(&mut conn)
            .optional()
            .map_err(|e| Error::Database(e.to_string()))?;
        row.map(OrderRow::into_domain).transpose()
    }

    async fn update_order(&self, order: &Order) -> Result<()> {
        let row = OrderRow::from_domain(order);
        let mut conn = self.conn()?;
        diesel::replace_into(orders::table)
            .values(&row)
            .execute(&mut conn)
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(())
    }

    async fn orders_for_deal(&self, deal_id: &DealId) -> Result<Vec<Order>> {
        let mut conn = self.conn()?;
        let rows: Vec<OrderRow> = orders::table
            .filter(orders::deal_id.eq(deal_id.to_string()))
            .order(orders::created_at.asc())
            .load(&mut conn)
            .map_err(|e| Error::Database(e.to_string()))?;
        rows.into_iter().map(OrderRow::into_domain).collect()
    }

    async fn live_take_profit(&self, deal_id: &DealId) -> Result<Option<Order>> {
        let mut conn = self.conn()?;
        let row: Option<OrderRow> = orders::table
            .filter(orders::deal_id.eq(deal_id.to_string()))
            .filter(orders::order_type.eq(OrderType::TakeProfit.as_str()))
            .filter(orders::status.eq_any(LIVE_ORDER_STATUSES))
            .first(&mut conn)
            .optional()
            .map_err(|e| Error::Database(e.to_string()))?;
        row.map(OrderRow::into_domain).transpose()
    }

    async fn apply_fill(&self, order: &Order, deal: &Deal) -> Result<()> {
        let order_row = OrderRow::from_domain(order);
        let deal_row = DealRow::from_domain(deal);
        let mut conn = self.conn()?;
        conn.transaction::<_, diesel::result::Error, _>(|conn| {
            diesel::replace_into(orders::table)
                .values(&order_row)
                .execute(conn)?;
            diesel::replace_into(deals::table)
                .values(&deal_row)
                .execute(conn)?;
            Ok(())
        })
        .map_err(|e| Error::Database(e.to_string()))?;
        Ok(())
    }

    async fn replace_take_profit(
        &self,
        cancelled: &Order,
        replacement: &Order,
        deal: &Deal,
    ) -> Result<()> {
        let cancelled_row = OrderRow::from_domain(cancelled);
        let replacement_row = OrderRow::from_domain(replacement);
        let deal_row = DealRow::from_domain(deal);
        let mut conn = self.conn()?;
        conn.transaction::<_, diesel::result::Error, _>(|conn| {
            diesel::replace_into(orders::table)
                .values(&cancelled_row)
                .execute(conn)?;
            diesel::insert_into(orders::table)
                .values(&replacement_row)
                .execute(conn)?;
            diesel::replace_into(deals::table)
                .values(&deal_row)
                .execute(conn)?;
            Ok(())
        })
        .map_err(|e| Error::Database(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::sqlite::connection::{create_pool, DbPool, MIGRATIONS};
    use crate::domain::{DealStatus, NetworkMode, OrderSide, OrderStatus, TradingPair};
    use chrono::Utc;
    use diesel_migrations::MigrationHarness;
    use rust_decimal_macros::dec;

    fn setup_test_db() -> DbPool {
        let pool = create_pool(":memory:").expect("Failed to create pool");
        let mut conn = pool.get().expect("Failed to get connection");
        conn.run_pending_migrations(MIGRATIONS)
            .expect("Failed to run migrations");
        pool
    }

    fn sample_bot() -> Bot {
        Bot {
            id: BotId::generate(),
            name: "btc-accumulator".into(),
            exchange: "binance".into(),
            network: NetworkMode::Testnet,
            pair: TradingPair {
                symbol: "BTCUSDT".into(),
                base_asset: "BTC".into(),
                quote_asset: "USDT".into(),
                quantity_increment: dec!(0.00001),
            },
            base_order_size: dec!(20),
            max_safety_orders: 3,
            price_deviation: dec!(1),
            safety_order_size: dec!(20),
            safety_order_price_step: dec!(1.07),
            safety_order_volume_step: dec!(1.5),
            take_profit: dec!(3),
            status: BotStatus::Stopped,
        }
    }

    fn sample_order(deal_id: &DealId, external: &str) -> Order {
        Order::placed(
            deal_id.clone(),
            OrderType::Safety,
            OrderSide::Buy,
            "BTCUSDT",
            dec!(0.202),
            dec!(99),
            ExternalOrderId::new(external),
        )
    }

    #[tokio::test]
    async fn bot_roundtrip_and_status_update() {
        let store = SqliteStore::new(setup_test_db());
        let bot = sample_bot();

        store.insert_bot(&bot).await.unwrap();
        let loaded = store.bot(&bot.id).await.unwrap().unwrap();
        assert_eq!(loaded.name, "btc-accumulator");
        assert_eq!(loaded.take_profit, dec!(3));
        assert_eq!(loaded.status, BotStatus::Stopped);

        store.set_bot_status(&bot.id, BotStatus::Running).await.unwrap();
        let loaded = store.bot(&bot.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, BotStatus::Running);

        let running = store.running_bots().await.unwrap();
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].id, bot.id);
    }

    #[tokio::test]
    async fn set_status_on_missing_bot_is_not_found() {
        let store = SqliteStore::new(setup_test_db());
        let err = store
            .set_bot_status(&BotId::generate(), BotStatus::Running)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { kind: "bot", .. }));
    }

    #[tokio::test]
    async fn open_deal_lookup_excludes_terminal_deals() {
        let store = SqliteStore::new(setup_test_db());
        let bot = sample_bot();
        store.insert_bot(&bot).await.unwrap();

        let mut closed = Deal::open(bot.id.clone());
        closed.activate(dec!(1), dec!(10), dec!(10)).unwrap();
        closed.complete(dec!(10.3), Utc::now()).unwrap();
        store.insert_deal(&closed).await.unwrap();

        assert!(store.open_deal_for_bot(&bot.id).await.unwrap().is_none());

        let open = Deal::open(bot.id.clone());
        store.insert_deal(&open).await.unwrap();

        let found = store.open_deal_for_bot(&bot.id).await.unwrap().unwrap();
        assert_eq!(found.id, open.id);
        assert_eq!(found.status, DealStatus::Pending);

        let all_open = store.open_deals().await.unwrap();
        assert_eq!(all_open.len(), 1);
    }

    #[tokio::test]
    async fn order_lookup_by_external_id_is_symbol_scoped() {
        let store = SqliteStore::new(setup_test_db());
        let bot = sample_bot();
        store.insert_bot(&bot).await.unwrap();
        let deal = Deal::open(bot.id.clone());
        store.insert_deal(&deal).await.unwrap();

        let order = sample_order(&deal.id, "ext-77");
        store.insert_order(&order).await.unwrap();

        let found = store
            .order_by_external(&ExternalOrderId::new("ext-77"), "BTCUSDT")
            .await
            .unwrap();
        assert_eq!(found.unwrap().id, order.id);

        let wrong_symbol = store
            .order_by_external(&ExternalOrderId::new("ext-77"), "ETHUSDT")
            .await
            .unwrap();
        assert!(wrong_symbol.is_none());
    }

    #[tokio::test]
    async fn deal_for_missing_bot_is_rejected() {
        let store = SqliteStore::new(setup_test_db());
        let orphan = Deal::open(BotId::generate());
        assert!(matches!(
            store.insert_deal(&orphan).await,
            Err(Error::Database(_))
        ));
    }

    #[tokio::test]
    async fn duplicate_external_id_per_symbol_is_rejected() {
        let store = SqliteStore::new(setup_test_db());
        let bot = sample_bot();
        store.insert_bot(&bot).await.unwrap();
        let deal = Deal::open(bot.id.clone());
        store.insert_deal(&deal).await.unwrap();

        store.insert_order(&sample_order(&deal.id, "dup-1")).await.unwrap();
        let err = store.insert_order(&sample_order(&deal.id, "dup-1")).await;
        assert!(matches!(err, Err(Error::Database(_))));
    }

    #[tokio::test]
    async fn apply_fill_persists_order_and_deal_together() {
        let store = SqliteStore::new(setup_test_db());
        let bot = sample_bot();
        store.insert_bot(&bot).await.unwrap();
        let mut deal = Deal::open(bot.id.clone());
        store.insert_deal(&deal).await.unwrap();

        let mut order = sample_order(&deal.id, "fill-1");
        store.insert_order(&order).await.unwrap();

        assert!(order.apply_update(OrderStatus::Filled, dec!(0.202), Some(dec!(99)), Utc::now()));
        deal.activate(dec!(0.202), dec!(99), dec!(19.998)).unwrap();

        store.apply_fill(&order, &deal).await.unwrap();

        let loaded_order = store.order(&order.id).await.unwrap().unwrap();
        assert_eq!(loaded_order.status, OrderStatus::Filled);
        assert_eq!(loaded_order.filled, dec!(0.202));

        let loaded_deal = store.deal(&deal.id).await.unwrap().unwrap();
        assert_eq!(loaded_deal.status, DealStatus::Active);
        assert_eq!(loaded_deal.average_price, dec!(99));
    }

    #[tokio::test]
    async fn replace_take_profit_keeps_one_live() {
        let store = SqliteStore::new(setup_test_db());
        let bot = sample_bot();
        store.insert_bot(&bot).await.unwrap();
        let mut deal = Deal::open(bot.id.clone());
        deal.activate(dec!(0.2), dec!(100), dec!(20)).unwrap();
        store.insert_deal(&deal).await.unwrap();

        let mut old_tp = Order::placed(
            deal.id.clone(),
            OrderType::TakeProfit,
            OrderSide::Sell,
            "BTCUSDT",
            dec!(0.2),
            dec!(103),
            ExternalOrderId::new("tp-1"),
        );
        store.insert_order(&old_tp).await.unwrap();
        assert_eq!(
            store.live_take_profit(&deal.id).await.unwrap().unwrap().id,
            old_tp.id
        );

        assert!(old_tp.mark_cancelled(Some("superseded after averaging down".into())));
        let new_tp = Order::placed(
            deal.id.clone(),
            OrderType::TakeProfit,
            OrderSide::Sell,
            "BTCUSDT",
            dec!(0.5),
            dec!(99.91),
            ExternalOrderId::new("tp-2"),
        );
        store.replace_take_profit(&old_tp, &new_tp, &deal).await.unwrap();

        let live = store.live_take_profit(&deal.id).await.unwrap().unwrap();
        assert_eq!(live.id, new_tp.id);
        assert_eq!(live.price, Some(dec!(99.91)));

        let orders = store.orders_for_deal(&deal.id).await.unwrap();
        assert_eq!(orders.len(), 2);
    }
}
