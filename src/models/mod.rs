use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// OHLCV candlestick data
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Candle {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Generic order side, before translation into exchange side codes
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

/// Direction of a position (and of the orders that open or close it)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PositionSide {
    Long,
    Short,
}

impl PositionSide {
    /// Side of the order that opens a position in this direction
    pub fn entry_side(self) -> OrderSide {
        match self {
            PositionSide::Long => OrderSide::Buy,
            PositionSide::Short => OrderSide::Sell,
        }
    }

    /// Side of the reduce-only order that closes a position in this direction
    pub fn exit_side(self) -> OrderSide {
        match self {
            PositionSide::Long => OrderSide::Sell,
            PositionSide::Short => OrderSide::Buy,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PositionSide::Long => "long",
            PositionSide::Short => "short",
        }
    }
}

impl std::fmt::Display for PositionSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Live position as reported by the exchange (never persisted)
#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    pub symbol: String,
    pub side: PositionSide,
    pub size: f64,
    pub entry_price: f64,
    pub opened_at: DateTime<Utc>,
}

/// Regular (non-conditional) open order
#[derive(Debug, Clone, PartialEq)]
pub struct OpenOrder {
    pub id: String,
    pub symbol: String,
    pub side: String,
    pub size: f64,
    pub price: Option<f64>,
}

/// Conditional order that turns into a live order once its trigger price is hit
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerOrder {
    pub id: String,
    pub symbol: String,
    /// Exchange side code, e.g. `open_long`
    pub side_code: String,
    pub plan_type: String,
    pub status: String,
    pub trigger_price: f64,
    pub size: f64,
}

impl TriggerOrder {
    /// Generic order side implied by the side code
    pub fn side(&self) -> Option<OrderSide> {
        match self.side_code.as_str() {
            "open_long" | "close_short" | "buy" | "buy_single" => Some(OrderSide::Buy),
            "open_short" | "close_long" | "sell" | "sell_single" => Some(OrderSide::Sell),
            _ => None,
        }
    }

    /// Direction of the position this order opens or closes
    pub fn position_side(&self) -> Option<PositionSide> {
        match self.side_code.as_str() {
            "open_long" | "close_long" => Some(PositionSide::Long),
            "open_short" | "close_short" => Some(PositionSide::Short),
            _ => None,
        }
    }

    pub fn is_normal_plan(&self) -> bool {
        self.plan_type == "normal_plan"
    }
}

/// Receipt for an order the exchange accepted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlacedOrder {
    pub order_id: String,
    pub client_oid: String,
}

/// Account balance for a single margin coin
#[derive(Debug, Clone, PartialEq)]
pub struct Balance {
    pub coin: String,
    pub total: f64,
    pub available: f64,
}
