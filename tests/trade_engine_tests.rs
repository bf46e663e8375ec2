//! Integration Tests for the Trade Engine
//! Atomic buy/sell, rejection without side effects, realized P/L, and the
//! records handed to persistence.

mod common;

use common::RecordingSink;
use portfolio_core::engine::{TradeEngine, TradeError, TradeRequest, TradeSide};
use portfolio_core::persistence::{PersistenceRecord, PersistenceSink};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use tokio_test::{assert_err, assert_ok};

fn engine_with(cash: Decimal) -> (Arc<TradeEngine>, Arc<RecordingSink>) {
    let sink = Arc::new(RecordingSink::default());
    let engine = Arc::new(TradeEngine::new(
        "user-1",
        cash,
        sink.clone() as Arc<dyn PersistenceSink>,
    ));
    (engine, sink)
}

#[tokio::test]
async fn test_buy_debits_cash_and_opens_position() {
    let (engine, _) = engine_with(dec!(10000));

    let receipt = assert_ok!(engine.buy("AAPL", 10, dec!(100)).await);

    assert_eq!(receipt.cash_balance, dec!(9000));
    assert_eq!(receipt.transaction.side, TradeSide::Buy);
    assert_eq!(receipt.transaction.total_value, dec!(1000));
    assert!(receipt.transaction.profit_loss.is_none());

    let position = engine.position("AAPL").await.unwrap();
    assert_eq!(position.quantity, 10);
    assert_eq!(position.avg_cost, dec!(100));
    assert_eq!(engine.cash_balance().await, dec!(9000));
    assert_eq!(engine.transactions().await.len(), 1);
}

#[tokio::test]
async fn test_buy_beyond_cash_rejected_without_side_effects() {
    let (engine, sink) = engine_with(dec!(500));

    let err = assert_err!(engine.buy("AAPL", 10, dec!(100)).await);

    assert_eq!(
        err,
        TradeError::InsufficientFunds {
            required: dec!(1000),
            available: dec!(500),
        }
    );
    assert_eq!(engine.cash_balance().await, dec!(500));
    assert!(engine.positions().await.is_empty());
    assert!(engine.transactions().await.is_empty());
    assert!(sink.records().is_empty());
}

#[tokio::test]
async fn test_buy_spending_exact_cash_succeeds() {
    let (engine, _) = engine_with(dec!(1000));

    assert_ok!(engine.buy("AAPL", 10, dec!(100)).await);
    assert_eq!(engine.cash_balance().await, Decimal::ZERO);
}

#[tokio::test]
async fn test_invalid_orders_rejected() {
    let (engine, _) = engine_with(dec!(10000));

    for (qty, price) in [(0, dec!(10)), (-5, dec!(10)), (5, dec!(0)), (5, dec!(-2))] {
        let err = assert_err!(engine.buy("AAPL", qty, price).await);
        assert!(matches!(err, TradeError::InvalidOrder(_)), "qty={} price={}", qty, price);
        let err = assert_err!(engine.sell("AAPL", qty, price).await);
        assert!(matches!(err, TradeError::InvalidOrder(_)), "qty={} price={}", qty, price);
    }

    let err = assert_err!(engine.buy("", 1, dec!(10)).await);
    assert_eq!(err.code(), "invalid_order");
    for symbol in ["AA PL", "A*", "market.>"] {
        let err = assert_err!(engine.buy(symbol, 1, dec!(10)).await);
        assert_eq!(err.code(), "invalid_order", "{:?}", symbol);
    }
    assert_eq!(engine.cash_balance().await, dec!(10000));
    assert!(engine.transactions().await.is_empty());

    // Class-share tickers stay valid
    assert_ok!(engine.buy("brk.b", 1, dec!(10)).await);
    assert_eq!(engine.position("BRK.B").await.map(|p| p.quantity), Some(1));
}

#[tokio::test]
async fn test_oversell_rejected_without_side_effects() {
    let (engine, sink) = engine_with(dec!(10000));
    assert_ok!(engine.buy("AAPL", 5, dec!(100)).await);
    let records_before = sink.records().len();

    let err = assert_err!(engine.sell("AAPL", 6, dec!(120)).await);

    assert!(matches!(
        err,
        TradeError::InsufficientShares { requested: 6, held: 5, .. }
    ));
    assert_eq!(engine.cash_balance().await, dec!(9500));
    assert_eq!(engine.position("AAPL").await.unwrap().quantity, 5);
    assert_eq!(engine.transactions().await.len(), 1);
    assert_eq!(sink.records().len(), records_before);
}

#[tokio::test]
async fn test_round_trip_at_same_price_restores_cash() {
    let (engine, _) = engine_with(dec!(10000));

    assert_ok!(engine.buy("AAPL", 10, dec!(100)).await);
    let receipt = assert_ok!(engine.sell("AAPL", 10, dec!(100)).await);

    assert_eq!(receipt.transaction.profit_loss, Some(Decimal::ZERO));
    assert_eq!(receipt.transaction.profit_loss_percent, Some(Decimal::ZERO));
    assert!(receipt.position.is_none());
    assert_eq!(engine.cash_balance().await, dec!(10000));
    assert!(engine.position("AAPL").await.is_none());
}

#[tokio::test]
async fn test_sell_realizes_pnl_against_blended_cost() {
    let (engine, _) = engine_with(dec!(10000));
    assert_ok!(engine.buy("AAPL", 10, dec!(100)).await);
    assert_ok!(engine.buy("AAPL", 10, dec!(120)).await);

    // avg cost 110
    let receipt = assert_ok!(engine.sell("AAPL", 5, dec!(130)).await);
    let tx = receipt.transaction;

    assert_eq!(tx.side, TradeSide::Sell);
    assert_eq!(tx.profit_loss, Some(dec!(100)));
    assert_eq!(tx.profit_loss_percent.unwrap().round_dp(2), dec!(18.18));

    let remaining = receipt.position.unwrap();
    assert_eq!(remaining.quantity, 15);
    assert_eq!(remaining.avg_cost, dec!(110));
    assert_eq!(engine.realized_pnl().await, dec!(100));
}

#[tokio::test]
async fn test_cash_plus_invested_tracks_realized_pnl() {
    let initial = dec!(10000);
    let (engine, _) = engine_with(initial);

    assert_ok!(engine.buy("AAPL", 10, dec!(100)).await);
    assert_ok!(engine.buy("MSFT", 4, dec!(250)).await);
    assert_ok!(engine.sell("AAPL", 5, dec!(90)).await);
    assert_ok!(engine.buy("AAPL", 5, dec!(80)).await);
    assert_ok!(engine.sell("MSFT", 2, dec!(300)).await);

    let snapshot = engine.snapshot().await;
    let invested: Decimal = snapshot.positions.iter().map(|p| p.invested_amount).sum();

    assert_eq!(snapshot.cash_balance + invested, initial + snapshot.realized_pnl);
    // -50 on AAPL, +100 on MSFT
    assert_eq!(snapshot.realized_pnl, dec!(50));
}

#[tokio::test]
async fn test_losing_sell_reports_negative_pnl() {
    let (engine, _) = engine_with(dec!(10000));
    assert_ok!(engine.buy("TSLA", 4, dec!(200)).await);

    let receipt = assert_ok!(engine.sell("TSLA", 4, dec!(150)).await);

    assert_eq!(receipt.transaction.profit_loss, Some(dec!(-200)));
    assert_eq!(receipt.transaction.profit_loss_percent, Some(dec!(-25)));
}

#[tokio::test]
async fn test_execute_requires_price() {
    let (engine, _) = engine_with(dec!(10000));
    let request = TradeRequest {
        symbol: "AAPL".into(),
        side: TradeSide::Buy,
        quantity: 1,
        price_hint: None,
    };

    let err = assert_err!(engine.execute(&request).await);
    assert!(matches!(err, TradeError::InvalidOrder(_)));

    let priced = TradeRequest {
        price_hint: Some(dec!(50)),
        ..request
    };
    let receipt = assert_ok!(engine.execute(&priced).await);
    assert_eq!(receipt.cash_balance, dec!(9950));
}

#[tokio::test]
async fn test_trade_request_accepts_wire_shape() {
    let request: TradeRequest =
        serde_json::from_str(r#"{"symbol":"aapl","side":"SELL","quantity":3,"price":"101.5"}"#)
            .unwrap();

    assert_eq!(request.side, TradeSide::Sell);
    assert_eq!(request.quantity, 3);
    assert_eq!(request.price_hint, Some(dec!(101.5)));
}

#[tokio::test]
async fn test_history_queries() {
    let (engine, _) = engine_with(dec!(10000));
    assert_ok!(engine.buy("AAPL", 1, dec!(100)).await);
    assert_ok!(engine.buy("MSFT", 1, dec!(200)).await);
    assert_ok!(engine.sell("aapl", 1, dec!(110)).await);

    let history = engine.transaction_history().await;
    assert_eq!(history.len(), 3);
    assert_eq!(history[0].side, TradeSide::Sell);
    assert_eq!(history[2].symbol, "AAPL");

    let aapl = engine.transactions_for("aapl").await;
    assert_eq!(aapl.len(), 2);
    assert!(aapl.iter().all(|t| t.symbol == "AAPL"));
}

#[tokio::test]
async fn test_committed_trades_emit_position_and_transaction_records() {
    let (engine, sink) = engine_with(dec!(10000));

    assert_ok!(engine.buy("AAPL", 10, dec!(100)).await);
    assert_ok!(engine.sell("AAPL", 10, dec!(105)).await);

    assert_eq!(sink.kinds(), vec!["position", "transaction", "position", "transaction"]);

    let records = sink.records();
    assert_eq!(
        records[0],
        PersistenceRecord::Position {
            user_id: "user-1".into(),
            symbol: "AAPL".into(),
            quantity: 10,
            avg_cost: dec!(100),
            invested_amount: dec!(1000),
        }
    );
    // Closed position is signalled with quantity 0
    assert!(matches!(&records[2], PersistenceRecord::Position { quantity: 0, .. }));
    match &records[3] {
        PersistenceRecord::Transaction { user_id, transaction } => {
            assert_eq!(user_id, "user-1");
            assert_eq!(transaction.profit_loss, Some(dec!(50)));
        }
        other => panic!("expected transaction record, got {:?}", other),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_buys_never_overspend() {
    let (engine, _) = engine_with(dec!(10000));

    let mut handles = Vec::new();
    for _ in 0..20 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move { engine.buy("AAPL", 1, dec!(1000)).await }));
    }

    let mut filled = 0;
    let mut rejected = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => filled += 1,
            Err(TradeError::InsufficientFunds { .. }) => rejected += 1,
            Err(e) => panic!("unexpected error: {}", e),
        }
    }

    assert_eq!(filled, 10);
    assert_eq!(rejected, 10);
    assert_eq!(engine.cash_balance().await, Decimal::ZERO);
    assert_eq!(engine.position("AAPL").await.unwrap().quantity, 10);
    assert_eq!(engine.transactions().await.len(), 10);
}
