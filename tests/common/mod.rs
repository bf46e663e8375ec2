//! Shared test doubles: scripted market data gateway, recording sinks

#![allow(dead_code)]

use async_trait::async_trait;
use portfolio_core::market::{GatewayError, GatewayQuote, MarketDataGateway};
use portfolio_core::persistence::{PersistenceRecord, PersistenceSink};
use portfolio_core::valuation::{RankingEntry, RankingPublisher};
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// In-memory gateway with per-symbol prices, optional latency and failures
#[derive(Default)]
pub struct ScriptedGateway {
    prices: Mutex<HashMap<String, Decimal>>,
    failing_symbols: Mutex<HashSet<String>>,
    fail_all: AtomicBool,
    delay: Mutex<Duration>,
    calls: AtomicUsize,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_price(self, symbol: &str, price: Decimal) -> Self {
        self.set_price(symbol, price);
        self
    }

    pub fn set_price(&self, symbol: &str, price: Decimal) {
        self.prices.lock().unwrap().insert(symbol.to_string(), price);
    }

    pub fn fail_symbol(&self, symbol: &str) {
        self.failing_symbols.lock().unwrap().insert(symbol.to_string());
    }

    pub fn set_fail_all(&self, fail: bool) {
        self.fail_all.store(fail, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MarketDataGateway for ScriptedGateway {
    async fn fetch_price(&self, symbol: &str) -> Result<GatewayQuote, GatewayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if self.fail_all.load(Ordering::SeqCst)
            || self.failing_symbols.lock().unwrap().contains(symbol)
        {
            return Err(GatewayError::Transport("connection refused".into()));
        }

        let price = self.prices.lock().unwrap().get(symbol).copied();
        match price {
            Some(price) => Ok(GatewayQuote {
                price,
                previous_close: None,
            }),
            None => Err(GatewayError::NoQuote(symbol.to_string())),
        }
    }
}

/// Persistence sink that keeps every record
#[derive(Default)]
pub struct RecordingSink {
    records: Mutex<Vec<PersistenceRecord>>,
}

impl RecordingSink {
    pub fn records(&self) -> Vec<PersistenceRecord> {
        self.records.lock().unwrap().clone()
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        self.records.lock().unwrap().iter().map(|r| r.kind()).collect()
    }
}

impl PersistenceSink for RecordingSink {
    fn emit(&self, record: PersistenceRecord) {
        self.records.lock().unwrap().push(record);
    }
}

/// Ranking publisher that keeps every published entry
#[derive(Default)]
pub struct RecordingPublisher {
    entries: Mutex<Vec<RankingEntry>>,
}

impl RecordingPublisher {
    pub fn entries(&self) -> Vec<RankingEntry> {
        self.entries.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}

#[async_trait]
impl RankingPublisher for RecordingPublisher {
    async fn publish(&self, entry: RankingEntry) {
        self.entries.lock().unwrap().push(entry);
    }
}
