//! Integration Tests for Sessions
//! Market-price trades, portfolio summaries, and the shared ranking view

mod common;

use common::{RecordingPublisher, RecordingSink, ScriptedGateway};
use portfolio_core::engine::{TradeRequest, TradeSide};
use portfolio_core::market::{MarketDataGateway, PriceCacheConfig};
use portfolio_core::persistence::PersistenceSink;
use portfolio_core::session::{SessionConfig, SessionDeps, SessionError, SessionManager};
use portfolio_core::valuation::{RankingPublisher, RankingTable, SchedulerConfig};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

struct Harness {
    gateway: Arc<ScriptedGateway>,
    publisher: Arc<RecordingPublisher>,
    manager: SessionManager,
}

fn harness() -> Harness {
    let gateway = Arc::new(
        ScriptedGateway::new()
            .with_price("AAPL", dec!(150))
            .with_price("MSFT", dec!(300)),
    );
    let publisher = Arc::new(RecordingPublisher::default());
    let deps = SessionDeps {
        gateway: gateway.clone() as Arc<dyn MarketDataGateway>,
        breaker: None,
        publisher: publisher.clone() as Arc<dyn RankingPublisher>,
        persistence: Arc::new(RecordingSink::default()) as Arc<dyn PersistenceSink>,
    };
    let config = SessionConfig {
        initial_cash: dec!(10000),
        price_cache: PriceCacheConfig {
            ttl: Duration::from_secs(300),
            fetch_timeout: Duration::from_secs(5),
        },
        scheduler: SchedulerConfig {
            period: Duration::from_secs(300),
        },
    };

    Harness {
        gateway,
        publisher,
        manager: SessionManager::new(config, Arc::new(RankingTable::new()), deps),
    }
}

fn market_order(symbol: &str, side: TradeSide, quantity: i64) -> TradeRequest {
    TradeRequest {
        symbol: symbol.to_string(),
        side,
        quantity,
        price_hint: None,
    }
}

#[tokio::test]
async fn test_new_session_is_announced() {
    let h = harness();

    let session = h.manager.session("u1", Some("Ada")).await;

    assert_eq!(session.display_name(), "Ada");
    assert!(session.scheduler().is_running());
    assert_eq!(h.publisher.count(), 1);

    let standing = h.manager.ranking().standing("u1").await.unwrap();
    assert_eq!(standing.portfolio_value, dec!(10000));
    assert_eq!(standing.label(), "#1. Ada");

    h.manager.shutdown().await;
}

#[tokio::test]
async fn test_session_lookup_reuses_existing() {
    let h = harness();

    let first = h.manager.session("u1", None).await;
    let again = h.manager.session("u1", Some("Renamed")).await;

    assert!(Arc::ptr_eq(&first, &again));
    assert_eq!(again.display_name(), "u1");
    assert_eq!(h.manager.len().await, 1);
    assert_eq!(h.publisher.count(), 1);

    h.manager.shutdown().await;
}

#[tokio::test]
async fn test_market_order_uses_cached_price() {
    let h = harness();
    let session = h.manager.session("u1", None).await;

    let receipt = assert_ok!(session.trade(market_order("aapl", TradeSide::Buy, 10)).await);

    assert_eq!(receipt.transaction.price, dec!(150));
    assert_eq!(receipt.cash_balance, dec!(8500));

    assert_ok!(session.trade(market_order("AAPL", TradeSide::Sell, 4)).await);
    assert_eq!(h.gateway.calls(), 1);

    h.manager.shutdown().await;
}

#[tokio::test]
async fn test_price_hint_skips_lookup() {
    let h = harness();
    let session = h.manager.session("u1", None).await;

    let request = TradeRequest {
        price_hint: Some(dec!(10)),
        ..market_order("UNLISTED", TradeSide::Buy, 3)
    };
    let receipt = assert_ok!(session.trade(request).await);

    assert_eq!(receipt.cash_balance, dec!(9970));
    assert_eq!(h.gateway.calls(), 0);

    h.manager.shutdown().await;
}

#[tokio::test]
async fn test_market_order_without_price_rejected() {
    let h = harness();
    let session = h.manager.session("u1", None).await;

    let err = assert_err!(session.trade(market_order("NOPE", TradeSide::Buy, 1)).await);

    assert!(matches!(err, SessionError::Price(_)));
    assert_eq!(err.code(), "price_unavailable");
    assert_eq!(session.engine().cash_balance().await, dec!(10000));

    h.manager.shutdown().await;
}

#[tokio::test]
async fn test_trade_errors_surface_through_session() {
    let h = harness();
    let session = h.manager.session("u1", None).await;

    let err = assert_err!(session.trade(market_order("MSFT", TradeSide::Buy, 100)).await);

    assert_eq!(err.code(), "insufficient_funds");

    h.manager.shutdown().await;
}

#[tokio::test]
async fn test_summary_prices_through_cache() {
    let h = harness();
    let session = h.manager.session("u1", None).await;
    assert_ok!(session.trade(market_order("AAPL", TradeSide::Buy, 10)).await);
    assert_ok!(session.trade(market_order("MSFT", TradeSide::Buy, 5)).await);

    // Cached quotes are still fresh, so the new gateway price is not seen yet
    h.gateway.set_price("AAPL", dec!(165));
    let summary = session.summary().await;

    assert_eq!(summary.cash_balance, dec!(7000));
    assert_eq!(summary.total_invested, dec!(3000));
    assert_eq!(summary.holdings_value, dec!(3000));
    assert_eq!(summary.unrealized_pnl, Decimal::ZERO);
    assert_eq!(summary.portfolio_value, dec!(10000));
    assert_eq!(summary.holdings.len(), 2);
    assert_eq!(summary.holdings[0].symbol, "AAPL");
    assert_eq!(summary.holdings[0].market_value, Some(dec!(1500)));
    assert_eq!(h.gateway.calls(), 2);

    h.manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_summary_with_unpriced_holding() {
    let h = harness();
    let session = h.manager.session("u1", None).await;
    assert_ok!(session.trade(market_order("AAPL", TradeSide::Buy, 10)).await);
    assert_ok!(session.trade(market_order("MSFT", TradeSide::Buy, 5)).await);

    h.gateway.set_price("AAPL", dec!(165));
    h.gateway.fail_symbol("MSFT");
    tokio::time::advance(Duration::from_secs(301)).await;

    let summary = session.summary().await;

    let aapl = &summary.holdings[0];
    assert_eq!(aapl.current_price, Some(dec!(165)));
    assert_eq!(aapl.unrealized_pnl, Some(dec!(150)));
    assert_eq!(aapl.unrealized_pnl_percent, Some(dec!(10)));

    let msft = &summary.holdings[1];
    assert_eq!(msft.current_price, None);
    assert_eq!(msft.market_value, None);

    assert_eq!(summary.holdings_value, dec!(1650));
    assert_eq!(summary.unrealized_pnl, dec!(150));
    assert_eq!(summary.portfolio_value, dec!(8650));

    h.manager.shutdown().await;
}

#[tokio::test]
async fn test_users_ranked_against_each_other() {
    let h = harness();
    let ada = h.manager.session("ada", Some("Ada")).await;
    let bob = h.manager.session("bob", Some("Bob")).await;

    assert_ok!(ada.trade(market_order("AAPL", TradeSide::Buy, 10)).await);
    // Bob overpays: 4,000 for shares the market values at 3,000
    let overpaid = TradeRequest {
        price_hint: Some(dec!(400)),
        ..market_order("MSFT", TradeSide::Buy, 10)
    };
    assert_ok!(bob.trade(overpaid).await);

    bob.scheduler().run_once().await;
    ada.scheduler().run_once().await;

    let ranked = h.manager.ranking().rank().await;
    assert_eq!(ranked.len(), 2);
    assert_eq!(ranked[0].user_id, "ada");
    assert_eq!(ranked[0].portfolio_value, dec!(10000));
    assert_eq!(ranked[1].user_id, "bob");
    assert_eq!(ranked[1].portfolio_value, dec!(9000));
    assert_eq!(h.manager.ranking().position_of("bob").await, Some(2));

    h.manager.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_stops_every_scheduler() {
    let h = harness();
    let a = h.manager.session("a", None).await;
    let b = h.manager.session("b", None).await;

    h.manager.shutdown().await;

    assert!(!a.scheduler().is_running());
    assert!(!b.scheduler().is_running());
}
