//! Reconciliation against scripted exchange snapshots: the four
//! discrepancy situations, the out-of-band-cancel override, and the
//! dry-run mode.

mod support;

use std::sync::Arc;

use rust_decimal_macros::dec;

use dcabot::domain::{
    Bot, BotStatus, Deal, DealStatus, OrderStatus, OrderType,
};
use dcabot::engine::{DryRunEffects, ReconcileAction, ReconcileSituation};
use dcabot::port::Store;
use dcabot::testkit::{scenario_bot, PaperGateway};

async fn placed_deal(
    name: &str,
    bot_status: BotStatus,
) -> (
    Arc<PaperGateway>,
    Arc<dcabot::adapter::sqlite::SqliteStore>,
    support::TestEngine,
    Bot,
    Deal,
) {
    let gateway = Arc::new(PaperGateway::new(dec!(100)));
    let store = support::memory_store(name);
    let engine = support::engine(Arc::clone(&gateway), Arc::clone(&store));

    let mut bot = scenario_bot();
    bot.status = bot_status;
    store.insert_bot(&bot).await.unwrap();

    let deal = engine.place_base_order(&bot).await.unwrap();
    (gateway, store, engine, bot, deal)
}

fn has_action(actions: &[ReconcileAction], matcher: impl Fn(&ReconcileAction) -> bool) -> bool {
    actions.iter().any(matcher)
}

#[tokio::test]
async fn consistent_deal_yields_no_actions() {
    let (gateway, store, engine, _bot, deal) =
        placed_deal("reconcile-consistent", BotStatus::Stopped).await;
    let effects = support::effects(Arc::clone(&gateway), Arc::clone(&store));

    let report = engine.check_deal(&deal.id, &effects).await.unwrap();
    assert_eq!(report.situation, ReconcileSituation::Consistent);
    assert!(!report.changed);
    assert!(report.actions.is_empty());
}

#[tokio::test]
async fn missed_safety_fill_replaces_take_profit() {
    let (gateway, store, engine, _bot, deal) =
        placed_deal("reconcile-state2", BotStatus::Stopped).await;
    let effects = support::effects(Arc::clone(&gateway), Arc::clone(&store));

    let orders = store.orders_for_deal(&deal.id).await.unwrap();
    let safety = orders
        .iter()
        .find(|o| o.order_type == OrderType::Safety && o.price == Some(dec!(99)))
        .unwrap();
    let old_tp = store.live_take_profit(&deal.id).await.unwrap().unwrap();

    gateway.script_snapshot(&safety.external_id, support::filled_snapshot(safety));

    let report = engine.check_deal(&deal.id, &effects).await.unwrap();
    assert_eq!(report.situation, ReconcileSituation::SafetyFilledTakeProfitOpen);
    assert!(has_action(&report.actions, |a| {
        matches!(a, ReconcileAction::OrderMarkedFilled { .. })
    }));
    assert!(has_action(&report.actions, |a| {
        matches!(a, ReconcileAction::TakeProfitCancelled { .. })
    }));
    assert!(has_action(&report.actions, |a| {
        matches!(a, ReconcileAction::TakeProfitPlaced { .. })
    }));

    let deal = store.deal(&deal.id).await.unwrap().unwrap();
    assert_eq!(deal.status, DealStatus::Active);
    assert_eq!(deal.actual_safety_orders, 1);
    assert_eq!(deal.current_quantity, dec!(0.40202));

    assert!(gateway.cancelled_orders().contains(&old_tp.external_id));
    let live_tp = store.live_take_profit(&deal.id).await.unwrap().unwrap();
    assert_ne!(live_tp.id, old_tp.id);
    assert_eq!(live_tp.quantity, dec!(0.40202));

    // A second pass finds nothing left to repair.
    let again = engine.check_deal(&deal.id, &effects).await.unwrap();
    assert_eq!(again.situation, ReconcileSituation::Consistent);
    assert!(!again.changed);
}

#[tokio::test]
async fn missing_take_profit_is_replaced_on_active_deal() {
    let (gateway, store, engine, _bot, deal) =
        placed_deal("reconcile-missing-tp", BotStatus::Stopped).await;
    let effects = support::effects(Arc::clone(&gateway), Arc::clone(&store));

    // The previous replacement attempt cancelled the take-profit but
    // died before placing the new one.
    let mut tp = store.live_take_profit(&deal.id).await.unwrap().unwrap();
    tp.mark_cancelled(Some("superseded after position change".into()));
    store.update_order(&tp).await.unwrap();

    let report = engine.check_deal(&deal.id, &effects).await.unwrap();
    assert_eq!(report.situation, ReconcileSituation::SafetyFilledTakeProfitOpen);
    assert!(has_action(&report.actions, |a| {
        matches!(a, ReconcileAction::TakeProfitPlaced { .. })
    }));
    assert!(!has_action(&report.actions, |a| {
        matches!(a, ReconcileAction::TakeProfitCancelled { .. })
    }));

    let live_tp = store.live_take_profit(&deal.id).await.unwrap();
    assert!(live_tp.is_some());
}

#[tokio::test]
async fn post_only_rejection_falls_back_to_market_sell() {
    let (gateway, store, engine, _bot, deal) =
        placed_deal("reconcile-fallback", BotStatus::Stopped).await;
    let effects = support::effects(Arc::clone(&gateway), Arc::clone(&store));

    let orders = store.orders_for_deal(&deal.id).await.unwrap();
    let safety = orders
        .iter()
        .find(|o| o.order_type == OrderType::Safety && o.price == Some(dec!(99)))
        .unwrap();
    gateway.script_snapshot(&safety.external_id, support::filled_snapshot(safety));
    gateway.fail_next_limit_order(dcabot::error::GatewayError::PostOnlyWouldFill);

    let report = engine.check_deal(&deal.id, &effects).await.unwrap();
    assert_eq!(report.situation, ReconcileSituation::SafetyFilledTakeProfitOpen);
    assert!(has_action(&report.actions, |a| {
        matches!(a, ReconcileAction::MarketSellFallback { .. })
    }));
    assert!(has_action(&report.actions, |a| {
        matches!(a, ReconcileAction::DealCompleted { .. })
    }));

    let deal = store.deal(&deal.id).await.unwrap().unwrap();
    assert_eq!(deal.status, DealStatus::Completed);
    assert!(deal.completed_at.is_some());

    // Last submission was the market sell of the whole position.
    let last = gateway.submitted_orders().into_iter().last().unwrap();
    assert!(last.is_market);
    assert_eq!(last.quantity, dec!(0.40202));
}

#[tokio::test]
async fn both_filled_closes_deal_and_flags_stranded_inventory() {
    let (gateway, store, engine, _bot, deal) =
        placed_deal("reconcile-state1", BotStatus::Stopped).await;
    let effects = support::effects(Arc::clone(&gateway), Arc::clone(&store));

    let orders = store.orders_for_deal(&deal.id).await.unwrap();
    let safety = orders
        .iter()
        .find(|o| o.order_type == OrderType::Safety && o.price == Some(dec!(99)))
        .unwrap();
    let tp = store.live_take_profit(&deal.id).await.unwrap().unwrap();
    gateway.script_snapshot(&safety.external_id, support::filled_snapshot(safety));
    gateway.script_snapshot(&tp.external_id, support::filled_snapshot(&tp));

    let report = engine.check_deal(&deal.id, &effects).await.unwrap();
    assert_eq!(report.situation, ReconcileSituation::SafetyAndTakeProfitFilled);
    assert!(has_action(&report.actions, |a| {
        matches!(a, ReconcileAction::WarningAttached { .. })
    }));
    assert!(has_action(&report.actions, |a| {
        matches!(a, ReconcileAction::DealCompleted { .. })
    }));

    let deal = store.deal(&deal.id).await.unwrap().unwrap();
    assert_eq!(deal.status, DealStatus::Completed);
    // The take-profit sold the base 0.2 but the position grew to 0.40202.
    let warning = deal.warning_message.unwrap();
    assert!(warning.contains("0.20202"), "warning was: {warning}");
    assert!(warning.contains("BTC"), "warning was: {warning}");
}

#[tokio::test]
async fn take_profit_fill_sweeps_leftover_safety_orders() {
    let (gateway, store, engine, _bot, deal) =
        placed_deal("reconcile-state3", BotStatus::Stopped).await;
    let effects = support::effects(Arc::clone(&gateway), Arc::clone(&store));

    let tp = store.live_take_profit(&deal.id).await.unwrap().unwrap();
    gateway.script_snapshot(&tp.external_id, support::filled_snapshot(&tp));

    let report = engine.check_deal(&deal.id, &effects).await.unwrap();
    assert_eq!(report.situation, ReconcileSituation::TakeProfitFilledOnly);
    assert_eq!(
        report
            .actions
            .iter()
            .filter(|a| matches!(a, ReconcileAction::SafetyOrderCancelled { .. }))
            .count(),
        3
    );

    let deal = store.deal(&deal.id).await.unwrap().unwrap();
    assert_eq!(deal.status, DealStatus::Completed);
    assert_eq!(deal.current_profit, dec!(0.6));

    let orders = store.orders_for_deal(&deal.id).await.unwrap();
    for safety in orders.iter().filter(|o| o.order_type == OrderType::Safety) {
        assert_eq!(safety.status, OrderStatus::Cancelled);
    }
    assert_eq!(gateway.cancelled_orders().len(), 3);
}

#[tokio::test]
async fn out_of_band_cancel_fails_the_deal_untouched() {
    let (gateway, store, engine, _bot, deal) =
        placed_deal("reconcile-oob-cancel", BotStatus::Running).await;
    let effects = support::effects(Arc::clone(&gateway), Arc::clone(&store));

    let orders = store.orders_for_deal(&deal.id).await.unwrap();
    let safety = orders
        .iter()
        .find(|o| o.order_type == OrderType::Safety && o.price == Some(dec!(99)))
        .unwrap();
    gateway.script_snapshot(&safety.external_id, support::cancelled_snapshot(safety));

    let report = engine.check_deal(&deal.id, &effects).await.unwrap();
    assert_eq!(report.situation, ReconcileSituation::Unrecoverable);
    assert_eq!(report.actions.len(), 1);
    assert!(matches!(report.actions[0], ReconcileAction::DealFailed));

    let deal = store.deal(&deal.id).await.unwrap().unwrap();
    assert_eq!(deal.status, DealStatus::Failed);

    // No order was mutated and no new cycle opened, even for a running bot.
    let fresh = store.orders_for_deal(&deal.id).await.unwrap();
    for (before, after) in orders.iter().zip(&fresh) {
        assert_eq!(before.status, after.status);
    }
    assert!(store
        .open_deal_for_bot(&deal.bot_id)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn dry_run_reports_without_mutating_anything() {
    let (gateway, store, engine, _bot, deal) =
        placed_deal("reconcile-dry-run", BotStatus::Running).await;

    let orders = store.orders_for_deal(&deal.id).await.unwrap();
    let safety = orders
        .iter()
        .find(|o| o.order_type == OrderType::Safety && o.price == Some(dec!(99)))
        .unwrap();
    gateway.script_snapshot(&safety.external_id, support::filled_snapshot(safety));
    let submitted_before = gateway.submitted_orders().len();

    let report = engine
        .check_deal(&deal.id, &DryRunEffects::new())
        .await
        .unwrap();
    assert_eq!(report.situation, ReconcileSituation::SafetyFilledTakeProfitOpen);
    assert!(report.changed);

    let deal = store.deal(&deal.id).await.unwrap().unwrap();
    assert_eq!(deal.status, DealStatus::Active);
    assert_eq!(deal.actual_safety_orders, 0);
    assert_eq!(deal.current_quantity, dec!(0.2));

    let safety = store.order(&safety.id).await.unwrap().unwrap();
    assert_eq!(safety.status, OrderStatus::Placed);
    assert!(gateway.cancelled_orders().is_empty());
    assert_eq!(gateway.submitted_orders().len(), submitted_before);
}

#[tokio::test]
async fn completed_cycle_restarts_running_bot() {
    let (gateway, store, engine, bot, deal) =
        placed_deal("reconcile-restart", BotStatus::Running).await;
    let effects = support::effects(Arc::clone(&gateway), Arc::clone(&store));

    let tp = store.live_take_profit(&deal.id).await.unwrap().unwrap();
    gateway.script_snapshot(&tp.external_id, support::filled_snapshot(&tp));

    let report = engine.check_deal(&deal.id, &effects).await.unwrap();
    assert!(has_action(&report.actions, |a| {
        matches!(a, ReconcileAction::CycleRestarted { .. })
    }));

    let next = store.open_deal_for_bot(&bot.id).await.unwrap().unwrap();
    assert_ne!(next.id, deal.id);
    assert_eq!(next.status, DealStatus::Active);
}

#[tokio::test]
async fn sweep_repairs_each_open_deal_independently() {
    let (gateway, store, engine, _bot, deal) =
        placed_deal("reconcile-sweep", BotStatus::Stopped).await;
    let effects = support::effects(Arc::clone(&gateway), Arc::clone(&store));

    let orders = store.orders_for_deal(&deal.id).await.unwrap();
    let safety = orders
        .iter()
        .find(|o| o.order_type == OrderType::Safety && o.price == Some(dec!(99)))
        .unwrap();
    gateway.script_snapshot(&safety.external_id, support::filled_snapshot(safety));

    let repaired = engine.reconcile_open_deals(&effects).await.unwrap();
    assert_eq!(repaired, 1);

    // Nothing left on the second sweep.
    assert_eq!(engine.reconcile_open_deals(&effects).await.unwrap(), 0);
}

#[tokio::test]
async fn terminal_deal_is_never_reconciled() {
    let (gateway, store, engine, _bot, deal) =
        placed_deal("reconcile-terminal", BotStatus::Stopped).await;
    let effects = support::effects(Arc::clone(&gateway), Arc::clone(&store));

    let tp = store.live_take_profit(&deal.id).await.unwrap().unwrap();
    engine.ingest_event(support::fill_event(&tp)).await.unwrap();
    assert_eq!(
        store.deal(&deal.id).await.unwrap().unwrap().status,
        DealStatus::Completed
    );

    let report = engine.check_deal(&deal.id, &effects).await.unwrap();
    assert_eq!(report.situation, ReconcileSituation::Consistent);
    assert!(!report.changed);
}
