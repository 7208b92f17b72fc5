// Exchange adapter: the trait the strategy runner trades through, and the
// Bitget implementation of it
pub mod bitget;
pub mod market;
pub mod signing;

pub use bitget::BitgetClient;
pub use market::MarketInfo;
pub use signing::RequestSigner;

use crate::config::MarginMode;
use crate::models::{Balance, Candle, OpenOrder, OrderSide, PlacedOrder, Position, TriggerOrder};
use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Exchange rejected request ({code}): {msg}")]
    Api { code: String, msg: String },

    #[error("Malformed response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Unexpected response: {0}")]
    Unexpected(String),

    #[error("Unknown market: {0}")]
    UnknownMarket(String),

    #[error("Unsupported timeframe: {0}")]
    UnsupportedTimeframe(String),

    #[error("Signing failed: {0}")]
    Signing(String),

    #[error("Missing credentials for a private endpoint")]
    Unauthenticated,
}

/// Everything the strategy needs from a derivatives exchange
///
/// Symbols are passed in generic form (`SOL/USDT:USDT`); implementations map
/// them to their native identifiers. Every call is a single attempt: errors are
/// returned to the caller, which decides whether the cycle can continue.
#[async_trait]
pub trait Exchange: Send + Sync {
    /// Minimum order size for the symbol, in contracts
    async fn fetch_min_tradable_amount(&self, symbol: &str) -> Result<f64, ExchangeError>;

    async fn fetch_open_orders(&self, symbol: &str) -> Result<Vec<OpenOrder>, ExchangeError>;

    async fn fetch_open_trigger_orders(
        &self,
        symbol: &str,
    ) -> Result<Vec<TriggerOrder>, ExchangeError>;

    /// Trigger orders that fired recently (cancelled ones are not included)
    async fn fetch_closed_trigger_orders(
        &self,
        symbol: &str,
    ) -> Result<Vec<TriggerOrder>, ExchangeError>;

    async fn cancel_order(&self, id: &str, symbol: &str) -> Result<(), ExchangeError>;

    async fn cancel_trigger_order(&self, id: &str, symbol: &str) -> Result<(), ExchangeError>;

    /// Open positions with a nonzero size
    async fn fetch_open_positions(&self, symbol: &str) -> Result<Vec<Position>, ExchangeError>;

    async fn place_trigger_limit_order(
        &self,
        symbol: &str,
        side: OrderSide,
        amount: f64,
        trigger_price: f64,
        price: f64,
        reduce_only: bool,
    ) -> Result<PlacedOrder, ExchangeError>;

    async fn place_trigger_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        amount: f64,
        trigger_price: f64,
        reduce_only: bool,
    ) -> Result<PlacedOrder, ExchangeError>;

    /// Close a whole position at market
    async fn close_position(
        &self,
        symbol: &str,
        position: &Position,
    ) -> Result<PlacedOrder, ExchangeError>;

    async fn set_margin_mode(&self, symbol: &str, mode: MarginMode) -> Result<(), ExchangeError>;

    async fn set_leverage(
        &self,
        symbol: &str,
        mode: MarginMode,
        leverage: u32,
    ) -> Result<(), ExchangeError>;

    async fn fetch_balance(&self, coin: &str) -> Result<Balance, ExchangeError>;

    /// Most recent candles, oldest first
    async fn fetch_recent_candles(
        &self,
        symbol: &str,
        timeframe: &str,
        limit: usize,
    ) -> Result<Vec<Candle>, ExchangeError>;
}

/// Static mapping from generic symbols to exchange-native identifiers
#[derive(Debug, Clone)]
pub struct SymbolMap {
    native: HashMap<String, String>,
}

impl SymbolMap {
    pub fn new() -> Self {
        let mut native = HashMap::new();
        native.insert("SOL/USDT:USDT".to_string(), "SOLUSDT_UMCBL".to_string());
        native.insert("BTC/USDT:USDT".to_string(), "BTCUSDT_UMCBL".to_string());
        native.insert("ETH/USDT:USDT".to_string(), "ETHUSDT_UMCBL".to_string());
        Self { native }
    }

    pub fn insert(&mut self, symbol: &str, native: &str) {
        self.native.insert(symbol.to_string(), native.to_string());
    }

    /// Native identifier for `symbol`, or `symbol` itself when unmapped
    pub fn to_native<'a>(&'a self, symbol: &'a str) -> &'a str {
        self.native.get(symbol).map(String::as_str).unwrap_or(symbol)
    }
}

impl Default for SymbolMap {
    fn default() -> Self {
        Self::new()
    }
}
