//! Time-bounded Price Cache
//! One entry per symbol, newest wins. Bridges gateway fetches into async
//! callers, callback callers, and blocking callers with a bounded wait.

use crate::market::gateway::{GatewayError, MarketDataGateway};
use crate::observability::metrics::metrics;
use crate::resilience::{block_on_bounded, BoundedCallError, CircuitBreaker};

use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

#[derive(Debug, Clone)]
pub struct PriceCacheConfig {
    /// Maximum age of a quote that is still served without a fetch
    pub ttl: Duration,
    /// Upper bound on a single gateway fetch
    pub fetch_timeout: Duration,
}

impl Default for PriceCacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(5 * 60),
            fetch_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Quote {
    pub symbol: String,
    pub price: Decimal,
    pub previous_close: Option<Decimal>,
    pub captured_at: Instant,
}

impl Quote {
    pub fn is_fresh(&self, ttl: Duration) -> bool {
        self.captured_at.elapsed() < ttl
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PriceError {
    #[error("price unavailable for {symbol}: {reason}")]
    Unavailable { symbol: String, reason: String },
}

impl PriceError {
    fn unavailable(symbol: &str, reason: impl ToString) -> Self {
        PriceError::Unavailable {
            symbol: symbol.to_string(),
            reason: reason.to_string(),
        }
    }
}

#[derive(Clone, Copy)]
enum LookupPath {
    Async,
    Blocking,
}

impl LookupPath {
    fn label(self) -> &'static str {
        match self {
            LookupPath::Async => "async",
            LookupPath::Blocking => "blocking",
        }
    }
}

/// Session-owned price cache. Clones share the same entries.
#[derive(Clone)]
pub struct PriceCache {
    gateway: Arc<dyn MarketDataGateway>,
    breaker: Option<Arc<CircuitBreaker>>,
    entries: Arc<RwLock<HashMap<String, Quote>>>,
    config: PriceCacheConfig,
    runtime: Option<Handle>,
}

impl PriceCache {
    /// Captures the current tokio runtime, if any, for the blocking path
    pub fn new(gateway: Arc<dyn MarketDataGateway>, config: PriceCacheConfig) -> Self {
        Self {
            gateway,
            breaker: None,
            entries: Arc::new(RwLock::new(HashMap::new())),
            config,
            runtime: Handle::try_current().ok(),
        }
    }

    pub fn with_circuit_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.breaker = Some(breaker);
        self
    }

    /// Runtime used to drive fetches requested from blocking callers
    pub fn with_runtime(mut self, handle: Handle) -> Self {
        self.runtime = Some(handle);
        self
    }

    pub fn config(&self) -> &PriceCacheConfig {
        &self.config
    }

    // =====================================================
    // READS WITHOUT FETCHING
    // =====================================================

    /// Latest entry for `symbol`, fresh or stale
    pub fn cached(&self, symbol: &str) -> Option<Quote> {
        self.read().get(&cache_key(symbol)).cloned()
    }

    /// Cached price if it is still within the TTL
    pub fn fresh_price(&self, symbol: &str) -> Option<Decimal> {
        self.read()
            .get(&cache_key(symbol))
            .filter(|q| q.is_fresh(self.config.ttl))
            .map(|q| q.price)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    // =====================================================
    // GET OR FETCH
    // =====================================================

    /// Fresh cached price, or a gateway fetch bounded by `fetch_timeout`.
    /// A failed fetch leaves any stale entry in place.
    #[instrument(skip(self))]
    pub async fn get(&self, symbol: &str) -> Result<Decimal, PriceError> {
        if let Some(price) = self.fresh_price(symbol) {
            record_lookup(LookupPath::Async, "hit");
            return Ok(price);
        }

        let result = self.fetch(&cache_key(symbol)).await.map(|q| q.price);
        record_lookup(LookupPath::Async, outcome_label(&result));
        result
    }

    /// Callback form of [`PriceCache::get`]. A fresh hit invokes `on_result`
    /// before returning; otherwise the fetch runs on the runtime and the
    /// callback fires when it resolves.
    pub fn get_async<F>(&self, symbol: &str, on_result: F)
    where
        F: FnOnce(Result<Decimal, PriceError>) + Send + 'static,
    {
        if let Some(price) = self.fresh_price(symbol) {
            record_lookup(LookupPath::Async, "hit");
            on_result(Ok(price));
            return;
        }

        let Some(handle) = self.runtime_handle() else {
            record_lookup(LookupPath::Async, "unavailable");
            on_result(Err(PriceError::unavailable(symbol, "no async runtime")));
            return;
        };

        let cache = self.clone();
        let key = cache_key(symbol);
        handle.spawn(async move {
            let result = cache.fetch(&key).await.map(|q| q.price);
            record_lookup(LookupPath::Async, outcome_label(&result));
            on_result(result);
        });
    }

    /// Blocking form for synchronous call sites. Waits at most `timeout`
    /// and always resolves.
    pub fn get_sync(&self, symbol: &str, timeout: Duration) -> Result<Decimal, PriceError> {
        if let Some(price) = self.fresh_price(symbol) {
            record_lookup(LookupPath::Blocking, "hit");
            return Ok(price);
        }

        let Some(handle) = self.runtime_handle() else {
            record_lookup(LookupPath::Blocking, "unavailable");
            return Err(PriceError::unavailable(symbol, "no async runtime"));
        };

        let cache = self.clone();
        let key = cache_key(symbol);
        let result = match block_on_bounded(&handle, timeout, async move { cache.fetch(&key).await }) {
            Ok(fetched) => fetched.map(|q| q.price),
            Err(BoundedCallError::TimedOut(waited)) => {
                warn!(symbol = %symbol, waited_ms = waited.as_millis() as u64, "Blocking price fetch timed out");
                Err(PriceError::unavailable(symbol, format!("timed out after {:?}", waited)))
            }
            Err(e) => Err(PriceError::unavailable(symbol, e)),
        };

        record_lookup(LookupPath::Blocking, outcome_label(&result));
        result
    }

    // =====================================================
    // FETCH
    // =====================================================

    async fn fetch(&self, symbol: &str) -> Result<Quote, PriceError> {
        // Dropped unsettled if this future is aborted mid-fetch
        let permit = match &self.breaker {
            Some(breaker) => match breaker.try_call() {
                Some(permit) => Some(permit),
                None => {
                    debug!(symbol = %symbol, breaker = breaker.name(), "Circuit open, skipping fetch");
                    return Err(PriceError::unavailable(symbol, "market data circuit open"));
                }
            },
            None => None,
        };

        let fetched = match tokio::time::timeout(
            self.config.fetch_timeout,
            self.gateway.fetch_price(symbol),
        )
        .await
        {
            Ok(Ok(quote)) if quote.price > Decimal::ZERO => Ok(quote),
            Ok(Ok(quote)) => Err(GatewayError::Malformed(format!(
                "non-positive price {} for {}",
                quote.price, symbol
            ))),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(GatewayError::Timeout(self.config.fetch_timeout)),
        };

        match fetched {
            Ok(gateway_quote) => {
                if let Some(permit) = permit {
                    permit.success();
                }
                let quote = Quote {
                    symbol: symbol.to_string(),
                    price: gateway_quote.price,
                    previous_close: gateway_quote.previous_close,
                    captured_at: Instant::now(),
                };
                self.store(quote.clone());
                debug!(symbol = %symbol, price = %quote.price, "Quote refreshed");
                Ok(quote)
            }
            Err(e) => {
                if let Some(permit) = permit {
                    permit.failure();
                }
                warn!(symbol = %symbol, error = %e, "Price fetch failed");
                Err(PriceError::unavailable(symbol, e))
            }
        }
    }

    /// Replace the entry for the quote's symbol unless a newer one landed first
    fn store(&self, quote: Quote) {
        let mut entries = self.write();
        match entries.get(&quote.symbol) {
            Some(existing) if existing.captured_at > quote.captured_at => {}
            _ => {
                entries.insert(quote.symbol.clone(), quote);
            }
        }
    }

    fn runtime_handle(&self) -> Option<Handle> {
        self.runtime.clone().or_else(|| Handle::try_current().ok())
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Quote>> {
        self.entries.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Quote>> {
        self.entries.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn cache_key(symbol: &str) -> String {
    symbol.trim().to_ascii_uppercase()
}

fn outcome_label<T>(result: &Result<T, PriceError>) -> &'static str {
    if result.is_ok() {
        "fetched"
    } else {
        "unavailable"
    }
}

fn record_lookup(path: LookupPath, outcome: &str) {
    if let Some(m) = metrics() {
        m.price_lookups_total
            .with_label_values(&[path.label(), outcome])
            .inc();
    }
}
