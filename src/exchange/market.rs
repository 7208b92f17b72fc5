use crate::exchange::ExchangeError;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};

/// Contract metadata needed to size and price orders
#[derive(Debug, Clone, PartialEq)]
pub struct MarketInfo {
    pub symbol: String,
    /// Minimum order size, in contracts
    pub min_amount: f64,
    /// Decimal places allowed in a price
    pub price_place: u32,
    /// Price tick, in units of the last price decimal
    pub price_end_step: i64,
    /// Decimal places allowed in an order size
    pub volume_place: u32,
}

impl MarketInfo {
    pub fn tick_size(&self) -> Decimal {
        Decimal::new(self.price_end_step.max(1), self.price_place)
    }

    /// Round a price to the nearest valid tick
    pub fn price_to_precision(&self, price: f64) -> Result<String, ExchangeError> {
        let price = to_decimal(price)?;
        let tick = self.tick_size();
        let rounded = (price / tick).round() * tick;
        Ok(rounded.round_dp(self.price_place).normalize().to_string())
    }

    /// Truncate an order size to the allowed number of decimals
    pub fn amount_to_precision(&self, amount: f64) -> Result<String, ExchangeError> {
        let amount = to_decimal(amount)?;
        let truncated = amount.round_dp_with_strategy(self.volume_place, RoundingStrategy::ToZero);
        Ok(truncated.normalize().to_string())
    }
}

fn to_decimal(value: f64) -> Result<Decimal, ExchangeError> {
    Decimal::from_f64(value)
        .ok_or_else(|| ExchangeError::Unexpected(format!("{} is not a finite number", value)))
}
