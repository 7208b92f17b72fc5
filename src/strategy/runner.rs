use crate::config::{AverageType, BotConfig, ConfigError};
use crate::exchange::{Exchange, ExchangeError};
use crate::indicators::{LatestLevels, MarketSnapshot};
use crate::models::{OrderSide, PlacedOrder, Position, PositionSide};
use crate::persistence::{TrackerState, TrackerStore, TradeStatus};
use crate::strategy::envelope::{
    can_trade_direction, plan_levels, select_position, should_resume, trading_balance, LevelPlan,
};
use anyhow::{anyhow, Context};

/// Orders placed for one envelope level
#[derive(Debug, Clone, PartialEq)]
pub struct PlacedLevel {
    pub direction: PositionSide,
    pub level: usize,
    pub entry_order_id: String,
    pub exit_order_id: Option<String>,
    pub stop_loss_order_id: Option<String>,
}

/// What one cycle did
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    pub cancelled_orders: usize,
    /// Cancelled buy-side trigger orders (`open_long`, `close_short`)
    pub cancelled_long_triggers: usize,
    /// Cancelled sell-side trigger orders (`open_short`, `close_long`)
    pub cancelled_short_triggers: usize,
    pub stop_loss_triggered: bool,
    pub resumed: bool,
    /// Waiting for price to return to the average after a stop-loss
    pub blocked: bool,
    pub position: Option<PositionSide>,
    /// Duplicate positions a close was attempted for
    pub force_closed: usize,
    pub trading_balance: f64,
    pub placed: Vec<PlacedLevel>,
    pub skipped_levels: Vec<(PositionSide, usize)>,
    pub failed_entries: Vec<(PositionSide, usize)>,
    pub tracker: TrackerState,
}

/// Runs one envelope cycle for a single symbol
pub struct EnvelopeRunner<E: Exchange> {
    exchange: E,
    config: BotConfig,
    average_type: AverageType,
    tracker: TrackerStore,
}

impl<E: Exchange> EnvelopeRunner<E> {
    pub fn new(exchange: E, config: BotConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let average_type = config.average_type()?;
        let tracker = TrackerStore::new(config.tracker_path());

        Ok(Self {
            exchange,
            config,
            average_type,
            tracker,
        })
    }

    pub fn exchange(&self) -> &E {
        &self.exchange
    }

    pub fn tracker(&self) -> &TrackerStore {
        &self.tracker
    }

    /// Cancel, reconcile, and re-bracket
    ///
    /// Any error aborts the rest of the cycle. Tracker writes made before the
    /// failure are kept.
    pub async fn run_cycle(&self) -> anyhow::Result<CycleReport> {
        let symbol = self.config.symbol.as_str();
        let mut report = CycleReport::default();
        let mut tracker = self.tracker.load_or_create()?;

        // 1. Clear the previous cycle's orders
        self.cancel_all_orders(&mut report).await?;

        // 2. Market data
        let snapshot = self.fetch_snapshot().await?;
        let latest = snapshot.latest().ok_or_else(|| {
            anyhow!(
                "Not enough candles for a {}-period average ({} available)",
                self.config.average_period,
                snapshot.candles().len()
            )
        })?;
        tracing::info!(
            "OHLCV data processed: close {:.4}, average {:.4}",
            latest.close,
            latest.average
        );

        // 3. Did a stop-loss fire since the last cycle?
        if self.reconcile_stop_losses(&mut tracker).await? {
            report.stop_loss_triggered = true;
            self.tracker.save(&tracker)?;
        }

        // 4. One position at most
        let position = self.reconcile_positions(&mut report).await?;
        report.position = position.as_ref().map(|p| p.side);

        // 5. Eligibility
        if !tracker.is_ok_to_trade() {
            if should_resume(tracker.last_side, latest.close, latest.average) {
                tracker.status = TradeStatus::OkToTrade;
                self.tracker.save(&tracker)?;
                report.resumed = true;
                tracing::info!(
                    "Price back at the average after {} stop-loss, trading resumed",
                    tracker.last_side.map(|s| s.as_str()).unwrap_or("unknown")
                );
            } else {
                tracing::info!(
                    "Stop-loss cooldown: close {:.4} has not returned to average {:.4}, no new entries",
                    latest.close,
                    latest.average
                );
                self.tracker.save(&tracker)?;
                report.blocked = true;
                report.tracker = tracker;
                return Ok(report);
            }
        }

        // 6. Account setup only while flat
        if position.is_none() {
            self.exchange
                .set_margin_mode(symbol, self.config.margin_mode)
                .await
                .context("Failed to set margin mode")?;
            self.exchange
                .set_leverage(symbol, self.config.margin_mode, self.config.leverage)
                .await
                .context("Failed to set leverage")?;
        }

        // 7. Sizing
        let balance = self
            .exchange
            .fetch_balance(&self.config.margin_coin)
            .await
            .context("Failed to fetch balance")?;
        report.trading_balance =
            trading_balance(balance.total, self.config.balance_fraction, self.config.leverage);
        tracing::info!(
            "Trading balance: {:.2} {}",
            report.trading_balance,
            self.config.margin_coin
        );

        // 8. Brackets
        let mut stop_loss_ids = Vec::new();
        for direction in self.enabled_directions() {
            if !can_trade_direction(direction, position.as_ref()) {
                tracing::debug!("Holding the opposite side, no {} entries", direction);
                continue;
            }
            let ids = self
                .place_brackets(direction, &latest, report.trading_balance, &mut report)
                .await?;
            stop_loss_ids.extend(ids);
        }

        // 9. Persist
        let new_state = TrackerState {
            status: TradeStatus::OkToTrade,
            last_side: position.as_ref().map(|p| p.side).or(tracker.last_side),
            stop_loss_ids,
        };
        self.tracker.save(&new_state)?;
        report.tracker = new_state;

        Ok(report)
    }

    fn enabled_directions(&self) -> Vec<PositionSide> {
        let mut directions = Vec::with_capacity(2);
        if self.config.use_longs {
            directions.push(PositionSide::Long);
        }
        if self.config.use_shorts {
            directions.push(PositionSide::Short);
        }
        directions
    }

    async fn cancel_all_orders(&self, report: &mut CycleReport) -> anyhow::Result<()> {
        let symbol = self.config.symbol.as_str();

        let orders = self
            .exchange
            .fetch_open_orders(symbol)
            .await
            .context("Failed to fetch open orders")?;
        for order in &orders {
            self.exchange
                .cancel_order(&order.id, symbol)
                .await
                .with_context(|| format!("Failed to cancel order {}", order.id))?;
            report.cancelled_orders += 1;
        }

        let triggers = self
            .exchange
            .fetch_open_trigger_orders(symbol)
            .await
            .context("Failed to fetch open trigger orders")?;
        for order in triggers.iter().filter(|o| o.is_normal_plan()) {
            self.exchange
                .cancel_trigger_order(&order.id, symbol)
                .await
                .with_context(|| format!("Failed to cancel trigger order {}", order.id))?;
            match order.side() {
                Some(OrderSide::Buy) => report.cancelled_long_triggers += 1,
                Some(OrderSide::Sell) => report.cancelled_short_triggers += 1,
                None => {}
            }
        }

        tracing::info!(
            "Orders cancelled: {} regular, {} buy triggers, {} sell triggers",
            report.cancelled_orders,
            report.cancelled_long_triggers,
            report.cancelled_short_triggers
        );
        Ok(())
    }

    async fn fetch_snapshot(&self) -> anyhow::Result<MarketSnapshot> {
        let mut candles = self
            .exchange
            .fetch_recent_candles(
                &self.config.symbol,
                &self.config.timeframe,
                self.config.candle_limit,
            )
            .await
            .context("Failed to fetch candles")?;

        // The last candle is still forming
        candles.pop();

        Ok(MarketSnapshot::build(
            candles,
            self.average_type,
            self.config.average_period,
            &self.config.envelopes,
        ))
    }

    /// Flag the tracker if one of its stop-losses fired; returns true if so
    async fn reconcile_stop_losses(&self, tracker: &mut TrackerState) -> anyhow::Result<bool> {
        if tracker.stop_loss_ids.is_empty() {
            return Ok(false);
        }

        let closed = self
            .exchange
            .fetch_closed_trigger_orders(&self.config.symbol)
            .await
            .context("Failed to fetch closed trigger orders")?;

        let fired = closed.iter().find(|o| tracker.is_stop_loss(&o.id));
        let Some(fired) = fired else {
            return Ok(false);
        };

        tracker.status = TradeStatus::StopLossTriggered;
        tracker.stop_loss_ids.clear();
        // The fired stop's side wins over a stale last_side
        if let Some(side) = fired.position_side() {
            tracker.last_side = Some(side);
        }

        tracing::warn!(
            "⚠️  Stop loss triggered (order {}, {} side)",
            fired.id,
            tracker.last_side.map(|s| s.as_str()).unwrap_or("unknown")
        );
        Ok(true)
    }

    /// Keep the most recently opened position and close any others
    async fn reconcile_positions(
        &self,
        report: &mut CycleReport,
    ) -> anyhow::Result<Option<Position>> {
        let symbol = self.config.symbol.as_str();
        let positions = self
            .exchange
            .fetch_open_positions(symbol)
            .await
            .context("Failed to fetch open positions")?;

        let (keep, extra) = select_position(positions);

        for position in &extra {
            report.force_closed += 1;
            match self.exchange.close_position(symbol, position).await {
                Ok(order) => tracing::warn!(
                    "Closed extra {} position of {} (order {})",
                    position.side,
                    position.size,
                    order.order_id
                ),
                Err(e) => tracing::error!(
                    "Failed to close extra {} position of {}: {}",
                    position.side,
                    position.size,
                    e
                ),
            }
        }

        if let Some(position) = &keep {
            tracing::info!(
                "Open {} position: {} @ {:.4}",
                position.side,
                position.size,
                position.entry_price
            );
        }

        Ok(keep)
    }

    /// Place entry, exit and stop-loss for every level; returns the stop-loss ids
    async fn place_brackets(
        &self,
        direction: PositionSide,
        latest: &LatestLevels,
        balance: f64,
        report: &mut CycleReport,
    ) -> anyhow::Result<Vec<String>> {
        let symbol = self.config.symbol.as_str();
        let min_amount = self
            .exchange
            .fetch_min_tradable_amount(symbol)
            .await
            .context("Failed to fetch minimum order size")?;

        let plans = plan_levels(
            direction,
            latest,
            balance,
            self.config.trigger_price_delta,
            self.config.stop_loss_pct,
        );

        let mut stop_loss_ids = Vec::new();
        for plan in plans {
            if plan.amount < min_amount {
                tracing::info!(
                    "Skipping {} layer {}: amount {:.4} below minimum {}",
                    direction,
                    plan.level,
                    plan.amount,
                    min_amount
                );
                report.skipped_levels.push((direction, plan.level));
                continue;
            }

            let Some(placed) = self.place_bracket(&plan).await else {
                report.failed_entries.push((direction, plan.level));
                continue;
            };

            if let Some(id) = &placed.stop_loss_order_id {
                stop_loss_ids.push(id.clone());
            }
            report.placed.push(placed);
        }

        Ok(stop_loss_ids)
    }

    /// Exit and stop-loss are only placed once the entry is accepted
    async fn place_bracket(&self, plan: &LevelPlan) -> Option<PlacedLevel> {
        let symbol = self.config.symbol.as_str();
        let direction = plan.direction;

        let entry = self
            .exchange
            .place_trigger_limit_order(
                symbol,
                direction.entry_side(),
                plan.amount,
                plan.trigger_price,
                plan.entry_price,
                false,
            )
            .await;
        let entry = placed_or_log(entry, direction, plan.level, "entry")?;

        let exit = self
            .exchange
            .place_trigger_market_order(
                symbol,
                direction.exit_side(),
                plan.amount,
                plan.exit_price,
                true,
            )
            .await;
        let exit = placed_or_log(exit, direction, plan.level, "exit");

        let stop = self
            .exchange
            .place_trigger_market_order(
                symbol,
                direction.exit_side(),
                plan.amount,
                plan.stop_price,
                true,
            )
            .await;
        let stop = placed_or_log(stop, direction, plan.level, "stop-loss");

        tracing::info!(
            "{} layer {}: entry {:.4} (trigger {:.4}), exit {:.4}, stop {:.4}, size {:.4}",
            direction,
            plan.level,
            plan.entry_price,
            plan.trigger_price,
            plan.exit_price,
            plan.stop_price,
            plan.amount
        );

        Some(PlacedLevel {
            direction,
            level: plan.level,
            entry_order_id: entry.order_id,
            exit_order_id: exit.map(|o| o.order_id),
            stop_loss_order_id: stop.map(|o| o.order_id),
        })
    }
}

fn placed_or_log(
    result: Result<PlacedOrder, ExchangeError>,
    direction: PositionSide,
    level: usize,
    kind: &str,
) -> Option<PlacedOrder> {
    match result {
        Ok(order) => Some(order),
        Err(e) => {
            tracing::error!("Order error ({} layer {} {}): {}", direction, level, kind, e);
            None
        }
    }
}
