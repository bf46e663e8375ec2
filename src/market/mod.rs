//! Market data: gateway seam and the per-session price cache

pub mod gateway;
pub mod price_cache;

pub use gateway::{GatewayError, GatewayQuote, MarketDataGateway};
pub use price_cache::{PriceCache, PriceCacheConfig, PriceError, Quote};
