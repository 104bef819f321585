use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt::Write as _;

use crate::domain::{Action, MarketSnapshot, Position};
use crate::error::Result;
use crate::risk::SizingPlan;

/// Everything the ensemble sees for one decision
#[derive(Debug, Clone, Serialize)]
pub struct DecisionRequest {
    pub symbol: String,
    pub snapshot: MarketSnapshot,
    pub position: Option<Position>,
    pub balance: Decimal,
    pub equity: Decimal,
    pub daily_pnl: Decimal,
    pub long_plan: Option<SizingPlan>,
    pub short_plan: Option<SizingPlan>,
    pub min_confidence: u8,
}

impl DecisionRequest {
    /// Render the analysis prompt sent to each ensemble member
    pub fn to_prompt(&self) -> Result<String> {
        let mut prompt = String::new();
        let price = self.snapshot.current_price();

        let _ = writeln!(prompt, "## Market: {}", self.symbol);
        let _ = writeln!(prompt, "Last price: {}", price);
        if let Some(spread) = self.snapshot.ticker.spread_percent() {
            let _ = writeln!(prompt, "Spread: {:.3}%", spread);
        }
        if let Some(funding) = &self.snapshot.funding_rate {
            let _ = writeln!(prompt, "Funding rate: {}", funding.rate);
        }
        if let Some(oi) = &self.snapshot.open_interest {
            let _ = writeln!(prompt, "Open interest: {}", oi.amount);
        }
        for (timeframe, ind) in &self.snapshot.indicators {
            let _ = writeln!(
                prompt,
                "[{}] SMA20={} RSI14={} ATR14={} BBwidth={}%",
                timeframe,
                fmt_opt(ind.sma_20),
                fmt_opt(ind.rsi_14),
                fmt_opt(ind.atr_14),
                fmt_opt(ind.bollinger_width_percent),
            );
        }
        if let Some(news) = &self.snapshot.news {
            let _ = writeln!(prompt, "News ({} headlines): {}", news.headline_count, news.summary);
        }
        if let Some(chain) = &self.snapshot.on_chain {
            let _ = writeln!(prompt, "On-chain: {}", chain.summary);
        }

        let _ = writeln!(prompt, "\n## Account");
        let _ = writeln!(
            prompt,
            "Balance: {} | Equity: {} | Daily PnL: {}",
            self.balance, self.equity, self.daily_pnl
        );
        match &self.position {
            Some(pos) if pos.is_open() => {
                let _ = writeln!(
                    prompt,
                    "Open position: {} {} @ {} ({}x), unrealized PnL {}",
                    pos.side, pos.size, pos.entry_price, pos.leverage, pos.unrealized_pnl
                );
            }
            _ => {
                let _ = writeln!(prompt, "No open position");
            }
        }

        let _ = writeln!(prompt, "\n## Sizing limits");
        for plan in [&self.long_plan, &self.short_plan].into_iter().flatten() {
            let _ = writeln!(
                prompt,
                "{}: max size {} at {}x, suggested stop {} target {}",
                plan.side,
                plan.size,
                plan.leverage,
                plan.stop_loss.round_dp(4),
                plan.take_profit.round_dp(4)
            );
        }

        let candles = serde_json::to_string(&self.snapshot.candles)?;
        let _ = writeln!(prompt, "\n## Candles (JSON, oldest first)\n{}", candles);

        let actions: Vec<&str> = Action::ALL.iter().map(|a| a.as_str()).collect();
        let _ = write!(
            prompt,
            r#"
## Instructions

Choose one action from: {}.
Opening a position requires size, stop_loss and take_profit. Confidence below {} will not be traded.

Respond ONLY with JSON:
{{"action": "...", "confidence": 0-100, "size": number, "stop_loss": number, "take_profit": number, "reason": "..."}}"#,
            actions.join(", "),
            self.min_confidence,
        );

        Ok(prompt)
    }
}

fn fmt_opt(value: Option<f64>) -> String {
    value
        .map(|v| format!("{:.2}", v))
        .unwrap_or_else(|| "n/a".to_string())
}
