//! In-memory exchange for driving full cycles without network access

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use envelope_bot::config::MarginMode;
use envelope_bot::exchange::{Exchange, ExchangeError};
use envelope_bot::models::{
    Balance, Candle, OpenOrder, OrderSide, PlacedOrder, Position, PositionSide, TriggerOrder,
};
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OrderKind {
    TriggerLimit,
    TriggerMarket,
}

/// An order the mock accepted
#[derive(Debug, Clone, PartialEq)]
pub struct PlacedCall {
    pub kind: OrderKind,
    pub side: OrderSide,
    pub amount: f64,
    pub trigger_price: f64,
    pub price: Option<f64>,
    pub reduce_only: bool,
    pub order_id: String,
}

#[derive(Debug, Default)]
pub struct MockState {
    // Market and account as the exchange reports them
    pub candles: Vec<Candle>,
    pub open_orders: Vec<OpenOrder>,
    pub open_triggers: Vec<TriggerOrder>,
    pub closed_triggers: Vec<TriggerOrder>,
    pub positions: Vec<Position>,
    pub balance: f64,
    pub min_amount: f64,

    // Failure injection
    /// 0-based indices of trigger-limit calls that are rejected
    pub failing_entry_calls: Vec<usize>,
    pub fail_close_position: bool,
    pub fail_positions: bool,

    // Recorded calls
    pub entry_calls: usize,
    pub cancelled_orders: Vec<String>,
    pub cancelled_triggers: Vec<String>,
    pub placed: Vec<PlacedCall>,
    pub close_attempts: Vec<Position>,
    pub margin_mode_calls: Vec<MarginMode>,
    pub leverage_calls: Vec<u32>,
    pub next_id: u64,
}

pub struct MockExchange {
    pub state: Mutex<MockState>,
}

impl MockExchange {
    pub fn new(state: MockState) -> Self {
        Self {
            state: Mutex::new(state),
        }
    }

    pub fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    pub fn entries(&self) -> Vec<PlacedCall> {
        self.state()
            .placed
            .iter()
            .filter(|p| p.kind == OrderKind::TriggerLimit)
            .cloned()
            .collect()
    }

    pub fn reduce_only_orders(&self) -> Vec<PlacedCall> {
        self.state()
            .placed
            .iter()
            .filter(|p| p.reduce_only)
            .cloned()
            .collect()
    }

    fn record(&self, mut call: PlacedCall) -> PlacedOrder {
        let mut state = self.state();
        state.next_id += 1;
        call.order_id = format!("order-{}", state.next_id);
        let placed = PlacedOrder {
            order_id: call.order_id.clone(),
            client_oid: format!("client-{}", state.next_id),
        };
        state.placed.push(call);
        placed
    }
}

fn rejected(msg: &str) -> ExchangeError {
    ExchangeError::Api {
        code: "40000".to_string(),
        msg: msg.to_string(),
    }
}

#[async_trait]
impl Exchange for MockExchange {
    async fn fetch_min_tradable_amount(&self, _symbol: &str) -> Result<f64, ExchangeError> {
        Ok(self.state().min_amount)
    }

    async fn fetch_open_orders(&self, _symbol: &str) -> Result<Vec<OpenOrder>, ExchangeError> {
        Ok(self.state().open_orders.clone())
    }

    async fn fetch_open_trigger_orders(
        &self,
        _symbol: &str,
    ) -> Result<Vec<TriggerOrder>, ExchangeError> {
        Ok(self.state().open_triggers.clone())
    }

    async fn fetch_closed_trigger_orders(
        &self,
        _symbol: &str,
    ) -> Result<Vec<TriggerOrder>, ExchangeError> {
        Ok(self.state().closed_triggers.clone())
    }

    async fn cancel_order(&self, id: &str, _symbol: &str) -> Result<(), ExchangeError> {
        let mut state = self.state();
        state.open_orders.retain(|o| o.id != id);
        state.cancelled_orders.push(id.to_string());
        Ok(())
    }

    async fn cancel_trigger_order(&self, id: &str, _symbol: &str) -> Result<(), ExchangeError> {
        let mut state = self.state();
        state.open_triggers.retain(|o| o.id != id);
        state.cancelled_triggers.push(id.to_string());
        Ok(())
    }

    async fn fetch_open_positions(&self, _symbol: &str) -> Result<Vec<Position>, ExchangeError> {
        let state = self.state();
        if state.fail_positions {
            return Err(ExchangeError::Unexpected("positions unavailable".to_string()));
        }
        Ok(state.positions.clone())
    }

    async fn place_trigger_limit_order(
        &self,
        _symbol: &str,
        side: OrderSide,
        amount: f64,
        trigger_price: f64,
        price: f64,
        reduce_only: bool,
    ) -> Result<PlacedOrder, ExchangeError> {
        {
            let mut state = self.state();
            let call = state.entry_calls;
            state.entry_calls += 1;
            if state.failing_entry_calls.contains(&call) {
                return Err(rejected("entry rejected"));
            }
        }

        Ok(self.record(PlacedCall {
            kind: OrderKind::TriggerLimit,
            side,
            amount,
            trigger_price,
            price: Some(price),
            reduce_only,
            order_id: String::new(),
        }))
    }

    async fn place_trigger_market_order(
        &self,
        _symbol: &str,
        side: OrderSide,
        amount: f64,
        trigger_price: f64,
        reduce_only: bool,
    ) -> Result<PlacedOrder, ExchangeError> {
        Ok(self.record(PlacedCall {
            kind: OrderKind::TriggerMarket,
            side,
            amount,
            trigger_price,
            price: None,
            reduce_only,
            order_id: String::new(),
        }))
    }

    async fn close_position(
        &self,
        _symbol: &str,
        position: &Position,
    ) -> Result<PlacedOrder, ExchangeError> {
        let mut state = self.state();
        state.close_attempts.push(position.clone());
        if state.fail_close_position {
            return Err(rejected("close rejected"));
        }
        state.next_id += 1;
        Ok(PlacedOrder {
            order_id: format!("close-{}", state.next_id),
            client_oid: String::new(),
        })
    }

    async fn set_margin_mode(&self, _symbol: &str, mode: MarginMode) -> Result<(), ExchangeError> {
        self.state().margin_mode_calls.push(mode);
        Ok(())
    }

    async fn set_leverage(
        &self,
        _symbol: &str,
        _mode: MarginMode,
        leverage: u32,
    ) -> Result<(), ExchangeError> {
        self.state().leverage_calls.push(leverage);
        Ok(())
    }

    async fn fetch_balance(&self, coin: &str) -> Result<Balance, ExchangeError> {
        let total = self.state().balance;
        Ok(Balance {
            coin: coin.to_string(),
            total,
            available: total,
        })
    }

    async fn fetch_recent_candles(
        &self,
        _symbol: &str,
        _timeframe: &str,
        limit: usize,
    ) -> Result<Vec<Candle>, ExchangeError> {
        let state = self.state();
        let start = state.candles.len().saturating_sub(limit);
        Ok(state.candles[start..].to_vec())
    }
}

/// 100 candles ranging 90-110 (a 100 average) whose completed ones close at
/// `close`, plus a wild still-forming candle at the end
pub fn channel_candles(close: f64) -> Vec<Candle> {
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let mut candles: Vec<Candle> = (0..99)
        .map(|i| Candle {
            timestamp: start + Duration::hours(i),
            open: 100.0,
            high: 110.0,
            low: 90.0,
            close,
            volume: 1_000.0,
        })
        .collect();

    candles.push(Candle {
        timestamp: start + Duration::hours(99),
        open: close,
        high: 500.0,
        low: 10.0,
        close: 400.0,
        volume: 5.0,
    });
    candles
}

pub fn trigger(id: &str, side_code: &str, plan_type: &str, status: &str) -> TriggerOrder {
    TriggerOrder {
        id: id.to_string(),
        symbol: "SOLUSDT_UMCBL".to_string(),
        side_code: side_code.to_string(),
        plan_type: plan_type.to_string(),
        status: status.to_string(),
        trigger_price: 100.0,
        size: 1.0,
    }
}

pub fn position(side: PositionSide, hours_ago: i64) -> Position {
    Position {
        symbol: "SOLUSDT_UMCBL".to_string(),
        side,
        size: 2.0,
        entry_price: 95.0,
        opened_at: Utc.with_ymd_and_hms(2024, 1, 5, 0, 0, 0).unwrap() - Duration::hours(hours_ago),
    }
}

/// Healthy account: 1000 USDT, 0.1 minimum size, price at the average
pub fn default_state() -> MockState {
    MockState {
        candles: channel_candles(100.0),
        balance: 1_000.0,
        min_amount: 0.1,
        ..Default::default()
    }
}
