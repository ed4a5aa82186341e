use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::sync::RwLock;
use tracing::warn;

use crate::constants::{
    FALLBACK_BONUS_TOKEN_PRICE_USD, FALLBACK_EVM_NATIVE_PRICE_USD, FALLBACK_SOLANA_NATIVE_PRICE_USD,
    FALLBACK_STABLE_PRICE_USD, PRICE_CACHE_TTL_SECS,
};
use crate::error::CoordinatorError;
use crate::scheduler::Clock;
use crate::types::Network;

/// Current USD prices for a chain's settlement currencies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PricePair {
    pub native: Decimal,
    pub stable: Decimal,
}

/// Price source consumed by the pipeline and the settlement engine. The
/// settlement engine reads the bonus token price at settlement time, not
/// purchase time; bonus-token price drift between the two is expected.
#[async_trait]
pub trait PriceOracle: Send + Sync {
    async fn prices(&self, network: Network) -> PricePair;
    async fn bonus_token_price(&self) -> Decimal;
}

/// Upstream feed the caching adapter wraps. Implementations live outside
/// this crate (price aggregator HTTP APIs, pyth, a test stub).
#[async_trait]
pub trait PriceFetcher: Send + Sync {
    async fn fetch_prices(&self, network: Network) -> Result<PricePair, CoordinatorError>;
    async fn fetch_bonus_token_price(&self) -> Result<Decimal, CoordinatorError>;
}

fn fallback_prices(network: Network) -> PricePair {
    PricePair {
        native: match network {
            Network::Evm => FALLBACK_EVM_NATIVE_PRICE_USD,
            Network::Solana => FALLBACK_SOLANA_NATIVE_PRICE_USD,
        },
        stable: FALLBACK_STABLE_PRICE_USD,
    }
}

#[derive(Clone, Copy)]
struct CachedPrice<T> {
    value: T,
    fetched_at: i64,
}

/// Caching adapter over a [`PriceFetcher`]: prices are held for five minutes
/// and fetch failures fall back to hardcoded values so a dead feed never
/// blocks a purchase.
pub struct CachedPriceOracle {
    fetcher: Arc<dyn PriceFetcher>,
    clock: Arc<dyn Clock>,
    pairs: RwLock<HashMap<Network, CachedPrice<PricePair>>>,
    bonus: RwLock<Option<CachedPrice<Decimal>>>,
}

impl CachedPriceOracle {
    pub fn new(fetcher: Arc<dyn PriceFetcher>, clock: Arc<dyn Clock>) -> Self {
        Self {
            fetcher,
            clock,
            pairs: RwLock::new(HashMap::new()),
            bonus: RwLock::new(None),
        }
    }

    fn is_fresh(&self, fetched_at: i64) -> bool {
        self.clock.now_unix() - fetched_at < PRICE_CACHE_TTL_SECS
    }
}

#[async_trait]
impl PriceOracle for CachedPriceOracle {
    async fn prices(&self, network: Network) -> PricePair {
        if let Some(cached) = self.pairs.read().await.get(&network) {
            if self.is_fresh(cached.fetched_at) {
                return cached.value;
            }
        }

        match self.fetcher.fetch_prices(network).await {
            Ok(pair) => {
                self.pairs.write().await.insert(
                    network,
                    CachedPrice {
                        value: pair,
                        fetched_at: self.clock.now_unix(),
                    },
                );
                pair
            }
            Err(err) => {
                warn!(%network, %err, "price fetch failed, using fallback prices");
                fallback_prices(network)
            }
        }
    }

    async fn bonus_token_price(&self) -> Decimal {
        if let Some(cached) = *self.bonus.read().await {
            if self.is_fresh(cached.fetched_at) {
                return cached.value;
            }
        }

        match self.fetcher.fetch_bonus_token_price().await {
            Ok(price) => {
                *self.bonus.write().await = Some(CachedPrice {
                    value: price,
                    fetched_at: self.clock.now_unix(),
                });
                price
            }
            Err(err) => {
                warn!(%err, "bonus token price fetch failed, using fallback");
                FALLBACK_BONUS_TOKEN_PRICE_USD
            }
        }
    }
}
