use crate::config::{BotConfig, Credentials, MarginMode};
use crate::exchange::{Exchange, ExchangeError, MarketInfo, RequestSigner, SymbolMap};
use crate::models::{
    Balance, Candle, OpenOrder, OrderSide, PlacedOrder, Position, PositionSide, TriggerOrder,
};
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use governor::{Quota, RateLimiter};
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;

// Bitget mix (futures) API v1
const BITGET_API_BASE: &str = "https://api.bitget.com";
const SUCCESS_CODE: &str = "00000";
const REQUESTS_PER_SECOND: u32 = 10;
const REQUEST_TIMEOUT_SECS: u64 = 30;
const PLAN_HISTORY_DAYS: i64 = 7;
const PLAN_HISTORY_PAGE_SIZE: u32 = 100;

type BitgetRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Bitget side code for a generic order intent
///
/// Opening orders map to `open_*`, reduce-only orders to `close_*` of the
/// position they shrink.
pub fn side_code(side: OrderSide, reduce_only: bool) -> &'static str {
    match (side, reduce_only) {
        (OrderSide::Buy, false) => "open_long",
        (OrderSide::Sell, true) => "close_long",
        (OrderSide::Sell, false) => "open_short",
        (OrderSide::Buy, true) => "close_short",
    }
}

/// Bitget granularity code and bar length for a timeframe such as `1h`
pub fn granularity(timeframe: &str) -> Result<(&'static str, Duration), ExchangeError> {
    let parsed = match timeframe {
        "1m" => ("1m", Duration::minutes(1)),
        "3m" => ("3m", Duration::minutes(3)),
        "5m" => ("5m", Duration::minutes(5)),
        "15m" => ("15m", Duration::minutes(15)),
        "30m" => ("30m", Duration::minutes(30)),
        "1h" => ("1H", Duration::hours(1)),
        "2h" => ("2H", Duration::hours(2)),
        "4h" => ("4H", Duration::hours(4)),
        "6h" => ("6H", Duration::hours(6)),
        "12h" => ("12H", Duration::hours(12)),
        "1d" => ("1D", Duration::days(1)),
        "1w" => ("1W", Duration::weeks(1)),
        other => return Err(ExchangeError::UnsupportedTimeframe(other.to_string())),
    };
    Ok(parsed)
}

fn margin_mode_code(mode: MarginMode) -> &'static str {
    match mode {
        MarginMode::Isolated => "fixed",
        MarginMode::Cross => "crossed",
    }
}

// ============== Response Types ==============

fn number<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    value_f64(&value).ok_or_else(|| serde::de::Error::custom(format!("not a number: {}", value)))
}

fn optional_number<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(value_f64))
}

fn value_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) if !s.is_empty() => s.parse().ok(),
        _ => None,
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContractRaw {
    symbol: String,
    #[serde(deserialize_with = "number")]
    min_trade_num: f64,
    #[serde(deserialize_with = "number")]
    price_place: f64,
    #[serde(default, deserialize_with = "optional_number")]
    price_end_step: Option<f64>,
    #[serde(deserialize_with = "number")]
    volume_place: f64,
}

impl From<ContractRaw> for MarketInfo {
    fn from(raw: ContractRaw) -> Self {
        MarketInfo {
            symbol: raw.symbol,
            min_amount: raw.min_trade_num,
            price_place: raw.price_place as u32,
            price_end_step: raw.price_end_step.unwrap_or(1.0) as i64,
            volume_place: raw.volume_place as u32,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderRaw {
    order_id: String,
    symbol: String,
    side: String,
    #[serde(deserialize_with = "number")]
    size: f64,
    #[serde(default, deserialize_with = "optional_number")]
    price: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlanOrderRaw {
    order_id: String,
    symbol: String,
    side: String,
    #[serde(default)]
    plan_type: String,
    #[serde(default, alias = "planStatus")]
    status: String,
    #[serde(default, deserialize_with = "optional_number")]
    trigger_price: Option<f64>,
    #[serde(default, deserialize_with = "optional_number")]
    size: Option<f64>,
}

impl From<PlanOrderRaw> for TriggerOrder {
    fn from(raw: PlanOrderRaw) -> Self {
        TriggerOrder {
            id: raw.order_id,
            symbol: raw.symbol,
            side_code: raw.side,
            plan_type: raw.plan_type,
            status: raw.status,
            trigger_price: raw.trigger_price.unwrap_or(0.0),
            size: raw.size.unwrap_or(0.0),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PositionRaw {
    symbol: String,
    hold_side: String,
    #[serde(deserialize_with = "number")]
    total: f64,
    #[serde(default, deserialize_with = "optional_number")]
    average_open_price: Option<f64>,
    #[serde(default, deserialize_with = "optional_number")]
    c_time: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountRaw {
    margin_coin: String,
    #[serde(deserialize_with = "number")]
    available: f64,
    #[serde(deserialize_with = "number")]
    equity: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlacedRaw {
    order_id: String,
    #[serde(default)]
    client_oid: Option<String>,
}

fn parse_candle(row: &[Value]) -> Option<Candle> {
    let ms = value_f64(row.first()?)? as i64;
    Some(Candle {
        timestamp: Utc.timestamp_millis_opt(ms).single()?,
        open: value_f64(row.get(1)?)?,
        high: value_f64(row.get(2)?)?,
        low: value_f64(row.get(3)?)?,
        close: value_f64(row.get(4)?)?,
        volume: row.get(5).and_then(value_f64).unwrap_or(0.0),
    })
}

fn millis_to_datetime(ms: Option<f64>) -> DateTime<Utc> {
    ms.and_then(|ms| Utc.timestamp_millis_opt(ms as i64).single())
        .unwrap_or_default()
}

/// Unwrap the `{code, msg, data}` envelope; bare arrays are returned as-is
fn decode<T: DeserializeOwned>(body: &str) -> Result<T, ExchangeError> {
    let value: Value = serde_json::from_str(body)?;
    let data = match value {
        Value::Object(mut obj) => {
            let code = obj.get("code").map(code_string).unwrap_or_default();
            if code != SUCCESS_CODE {
                let msg = obj
                    .get("msg")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error")
                    .to_string();
                return Err(ExchangeError::Api { code, msg });
            }
            obj.remove("data").unwrap_or(Value::Null)
        }
        other => other,
    };
    Ok(serde_json::from_value(data)?)
}

fn code_string(code: &Value) -> String {
    match code {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ============== Implementation ==============

/// Client for Bitget USDT-margined futures
///
/// Public endpoints work without credentials; everything touching the
/// account needs a `RequestSigner`.
#[derive(Clone)]
pub struct BitgetClient {
    client: Client,
    base_url: String,
    signer: Option<RequestSigner>,
    symbols: SymbolMap,
    markets: HashMap<String, MarketInfo>,
    product_type: String,
    margin_coin: String,
    rate_limiter: Arc<BitgetRateLimiter>,
}

impl BitgetClient {
    pub fn new(base_url: &str, credentials: Option<Credentials>) -> Result<Self, ExchangeError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        let quota = Quota::per_second(NonZeroU32::new(REQUESTS_PER_SECOND).unwrap_or(NonZeroU32::MIN));

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            signer: credentials.map(RequestSigner::new),
            symbols: SymbolMap::new(),
            markets: HashMap::new(),
            product_type: "umcbl".to_string(),
            margin_coin: "USDT".to_string(),
            rate_limiter: Arc::new(RateLimiter::direct(quota)),
        })
    }

    /// Build a client for the configured symbol and load contract metadata
    pub async fn connect(config: &BotConfig, credentials: Credentials) -> Result<Self, ExchangeError> {
        let base_url = if config.base_url.is_empty() {
            BITGET_API_BASE
        } else {
            config.base_url.as_str()
        };

        let mut client = Self::new(base_url, Some(credentials))?
            .with_symbol(&config.symbol, &config.exchange_symbol)
            .with_product(&config.product_type, &config.margin_coin);

        let count = client.load_markets().await?;
        tracing::info!("Loaded {} Bitget contracts ({})", count, client.product_type);

        Ok(client)
    }

    pub fn with_symbol(mut self, symbol: &str, native: &str) -> Self {
        self.symbols.insert(symbol, native);
        self
    }

    pub fn with_product(mut self, product_type: &str, margin_coin: &str) -> Self {
        self.product_type = product_type.to_string();
        self.margin_coin = margin_coin.to_string();
        self
    }

    /// Fetch contract metadata for the product type
    pub async fn load_markets(&mut self) -> Result<usize, ExchangeError> {
        let contracts: Vec<ContractRaw> = self
            .get(
                "/api/mix/v1/market/contracts",
                &[("productType", self.product_type.clone())],
                false,
            )
            .await?;

        self.markets = contracts
            .into_iter()
            .map(|raw| (raw.symbol.clone(), MarketInfo::from(raw)))
            .collect();

        Ok(self.markets.len())
    }

    pub fn market(&self, symbol: &str) -> Result<&MarketInfo, ExchangeError> {
        let native = self.symbols.to_native(symbol);
        self.markets
            .get(native)
            .ok_or_else(|| ExchangeError::UnknownMarket(native.to_string()))
    }

    fn native<'a>(&'a self, symbol: &'a str) -> &'a str {
        self.symbols.to_native(symbol)
    }

    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
        signed: bool,
    ) -> Result<T, ExchangeError> {
        let query = query
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&");
        self.send(Method::GET, path, &query, None, signed).await
    }

    async fn post<T: DeserializeOwned>(&self, path: &str, body: Value) -> Result<T, ExchangeError> {
        self.send(Method::POST, path, "", Some(body.to_string()), true)
            .await
    }

    async fn send<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        query: &str,
        body: Option<String>,
        signed: bool,
    ) -> Result<T, ExchangeError> {
        self.rate_limiter.until_ready().await;

        let url = if query.is_empty() {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}{}?{}", self.base_url, path, query)
        };

        let mut request = self.client.request(method.clone(), &url);

        if signed {
            let signer = self.signer.as_ref().ok_or(ExchangeError::Unauthenticated)?;
            let timestamp = Utc::now().timestamp_millis();
            let headers = signer.headers(
                timestamp,
                method.as_str(),
                path,
                query,
                body.as_deref().unwrap_or(""),
            )?;
            request = request.headers(headers);
        }

        if let Some(body) = body {
            request = request.body(body);
        }

        tracing::debug!("{} {}", method, url);

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            // Bitget reports most failures inside the envelope; fall back to the raw body
            return match decode::<Value>(&text) {
                Err(err @ ExchangeError::Api { .. }) => Err(err),
                _ => Err(ExchangeError::Api {
                    code: status.as_u16().to_string(),
                    msg: text,
                }),
            };
        }

        decode(&text)
    }

    async fn fetch_plan_orders(
        &self,
        path: &str,
        mut query: Vec<(&str, String)>,
    ) -> Result<Vec<TriggerOrder>, ExchangeError> {
        query.push(("isPlan", "plan".to_string()));
        let raw: Option<Vec<PlanOrderRaw>> = self.get(path, &query, true).await?;
        Ok(raw
            .unwrap_or_default()
            .into_iter()
            .map(TriggerOrder::from)
            .collect())
    }

    async fn place_plan(
        &self,
        symbol: &str,
        body: Value,
        description: &str,
    ) -> Result<PlacedOrder, ExchangeError> {
        let client_oid = body["clientOid"].as_str().unwrap_or_default().to_string();
        let placed: PlacedRaw = self.post("/api/mix/v1/plan/placePlan", body).await?;

        tracing::info!(
            "Placed {} on {} (order {})",
            description,
            self.native(symbol),
            placed.order_id
        );

        Ok(PlacedOrder {
            order_id: placed.order_id,
            client_oid: placed.client_oid.unwrap_or(client_oid),
        })
    }
}

fn new_client_oid() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

#[async_trait]
impl Exchange for BitgetClient {
    async fn fetch_min_tradable_amount(&self, symbol: &str) -> Result<f64, ExchangeError> {
        Ok(self.market(symbol)?.min_amount)
    }

    async fn fetch_open_orders(&self, symbol: &str) -> Result<Vec<OpenOrder>, ExchangeError> {
        let raw: Option<Vec<OrderRaw>> = self
            .get(
                "/api/mix/v1/order/current",
                &[("symbol", self.native(symbol).to_string())],
                true,
            )
            .await?;

        Ok(raw
            .unwrap_or_default()
            .into_iter()
            .map(|o| OpenOrder {
                id: o.order_id,
                symbol: o.symbol,
                side: o.side,
                size: o.size,
                price: o.price,
            })
            .collect())
    }

    async fn fetch_open_trigger_orders(
        &self,
        symbol: &str,
    ) -> Result<Vec<TriggerOrder>, ExchangeError> {
        self.fetch_plan_orders(
            "/api/mix/v1/plan/currentPlan",
            vec![("symbol", self.native(symbol).to_string())],
        )
        .await
    }

    async fn fetch_closed_trigger_orders(
        &self,
        symbol: &str,
    ) -> Result<Vec<TriggerOrder>, ExchangeError> {
        let end = Utc::now();
        let start = end - Duration::days(PLAN_HISTORY_DAYS);

        let orders = self
            .fetch_plan_orders(
                "/api/mix/v1/plan/historyPlan",
                vec![
                    ("symbol", self.native(symbol).to_string()),
                    ("startTime", start.timestamp_millis().to_string()),
                    ("endTime", end.timestamp_millis().to_string()),
                    ("pageSize", PLAN_HISTORY_PAGE_SIZE.to_string()),
                ],
            )
            .await?;

        Ok(orders
            .into_iter()
            .filter(|o| o.status == "triggered")
            .collect())
    }

    async fn cancel_order(&self, id: &str, symbol: &str) -> Result<(), ExchangeError> {
        let _: Value = self
            .post(
                "/api/mix/v1/order/cancel-order",
                json!({
                    "symbol": self.native(symbol),
                    "marginCoin": self.margin_coin,
                    "orderId": id,
                }),
            )
            .await?;
        Ok(())
    }

    async fn cancel_trigger_order(&self, id: &str, symbol: &str) -> Result<(), ExchangeError> {
        let _: Value = self
            .post(
                "/api/mix/v1/plan/cancelPlan",
                json!({
                    "orderId": id,
                    "symbol": self.native(symbol),
                    "marginCoin": self.margin_coin,
                    "planType": "normal_plan",
                }),
            )
            .await?;
        Ok(())
    }

    async fn fetch_open_positions(&self, symbol: &str) -> Result<Vec<Position>, ExchangeError> {
        let raw: Option<Vec<PositionRaw>> = self
            .get(
                "/api/mix/v1/position/singlePosition-v2",
                &[
                    ("symbol", self.native(symbol).to_string()),
                    ("marginCoin", self.margin_coin.clone()),
                ],
                true,
            )
            .await?;

        Ok(raw
            .unwrap_or_default()
            .into_iter()
            .filter(|p| p.total > 0.0)
            .filter_map(|p| {
                let side = match p.hold_side.as_str() {
                    "long" => PositionSide::Long,
                    "short" => PositionSide::Short,
                    other => {
                        tracing::warn!("Ignoring position with hold side '{}'", other);
                        return None;
                    }
                };
                Some(Position {
                    symbol: p.symbol,
                    side,
                    size: p.total,
                    entry_price: p.average_open_price.unwrap_or(0.0),
                    opened_at: millis_to_datetime(p.c_time),
                })
            })
            .collect())
    }

    async fn place_trigger_limit_order(
        &self,
        symbol: &str,
        side: OrderSide,
        amount: f64,
        trigger_price: f64,
        price: f64,
        reduce_only: bool,
    ) -> Result<PlacedOrder, ExchangeError> {
        let market = self.market(symbol)?;
        let body = json!({
            "symbol": market.symbol,
            "marginCoin": self.margin_coin,
            "size": market.amount_to_precision(amount)?,
            "executePrice": market.price_to_precision(price)?,
            "triggerPrice": market.price_to_precision(trigger_price)?,
            "side": side_code(side, reduce_only),
            "orderType": "limit",
            "triggerType": "market_price",
            "reduceOnly": reduce_only,
            "clientOid": new_client_oid(),
        });

        self.place_plan(symbol, body, "trigger limit order").await
    }

    async fn place_trigger_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        amount: f64,
        trigger_price: f64,
        reduce_only: bool,
    ) -> Result<PlacedOrder, ExchangeError> {
        let market = self.market(symbol)?;
        let body = json!({
            "symbol": market.symbol,
            "marginCoin": self.margin_coin,
            "size": market.amount_to_precision(amount)?,
            "triggerPrice": market.price_to_precision(trigger_price)?,
            "side": side_code(side, reduce_only),
            "orderType": "market",
            "triggerType": "market_price",
            "reduceOnly": reduce_only,
            "clientOid": new_client_oid(),
        });

        self.place_plan(symbol, body, "trigger market order").await
    }

    async fn close_position(
        &self,
        symbol: &str,
        position: &Position,
    ) -> Result<PlacedOrder, ExchangeError> {
        let market = self.market(symbol)?;
        let client_oid = new_client_oid();
        let placed: PlacedRaw = self
            .post(
                "/api/mix/v1/order/placeOrder",
                json!({
                    "symbol": market.symbol,
                    "marginCoin": self.margin_coin,
                    "size": market.amount_to_precision(position.size)?,
                    "side": side_code(position.side.exit_side(), true),
                    "orderType": "market",
                    "reduceOnly": true,
                    "clientOid": client_oid,
                }),
            )
            .await?;

        Ok(PlacedOrder {
            order_id: placed.order_id,
            client_oid: placed.client_oid.unwrap_or(client_oid),
        })
    }

    async fn set_margin_mode(&self, symbol: &str, mode: MarginMode) -> Result<(), ExchangeError> {
        let _: Value = self
            .post(
                "/api/mix/v1/account/setMarginMode",
                json!({
                    "symbol": self.native(symbol),
                    "marginCoin": self.margin_coin,
                    "marginMode": margin_mode_code(mode),
                }),
            )
            .await?;
        Ok(())
    }

    async fn set_leverage(
        &self,
        symbol: &str,
        mode: MarginMode,
        leverage: u32,
    ) -> Result<(), ExchangeError> {
        // Isolated margin keeps a separate leverage per hold side
        let hold_sides: &[Option<&str>] = match mode {
            MarginMode::Isolated => &[Some("long"), Some("short")],
            MarginMode::Cross => &[None],
        };

        for hold_side in hold_sides {
            let mut body = json!({
                "symbol": self.native(symbol),
                "marginCoin": self.margin_coin,
                "leverage": leverage.to_string(),
            });
            if let Some(hold_side) = hold_side {
                body["holdSide"] = json!(hold_side);
            }
            let _: Value = self.post("/api/mix/v1/account/setLeverage", body).await?;
        }
        Ok(())
    }

    async fn fetch_balance(&self, coin: &str) -> Result<Balance, ExchangeError> {
        let accounts: Vec<AccountRaw> = self
            .get(
                "/api/mix/v1/account/accounts",
                &[("productType", self.product_type.clone())],
                true,
            )
            .await?;

        accounts
            .into_iter()
            .find(|a| a.margin_coin.eq_ignore_ascii_case(coin))
            .map(|a| Balance {
                coin: a.margin_coin,
                total: a.equity,
                available: a.available,
            })
            .ok_or_else(|| ExchangeError::Unexpected(format!("No {} margin account", coin)))
    }

    async fn fetch_recent_candles(
        &self,
        symbol: &str,
        timeframe: &str,
        limit: usize,
    ) -> Result<Vec<Candle>, ExchangeError> {
        let (granularity, bar) = granularity(timeframe)?;
        let end = Utc::now();
        let start = end - bar * (limit as i32);

        let rows: Vec<Vec<Value>> = self
            .get(
                "/api/mix/v1/market/candles",
                &[
                    ("symbol", self.native(symbol).to_string()),
                    ("granularity", granularity.to_string()),
                    ("startTime", start.timestamp_millis().to_string()),
                    ("endTime", end.timestamp_millis().to_string()),
                    ("limit", limit.to_string()),
                ],
                false,
            )
            .await?;

        let mut candles: Vec<Candle> = rows.iter().filter_map(|row| parse_candle(row)).collect();
        if candles.len() < rows.len() {
            tracing::warn!(
                "Dropped {} malformed candle rows",
                rows.len() - candles.len()
            );
        }
        candles.sort_by_key(|c| c.timestamp);

        Ok(candles)
    }
}
