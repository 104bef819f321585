use rust_decimal::Decimal;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::{
    CycleOutcome, CycleStage, DecisionExecutor, EngineConfig, ExecutionReport, MarketDataCollector,
};
use crate::ai::{DecisionRequest, EnsembleAnalyzer};
use crate::council::ValidatorCouncil;
use crate::domain::{Action, Decision, MarketSnapshot, Position, PositionSide};
use crate::error::{AegisError, Result};
use crate::exchange::Exchange;
use crate::portfolio::Portfolio;
use crate::risk::{CircuitBreaker, DecisionValidator, PositionSizer, RiskConfig, SizingConfig};
use crate::supervisor::{Alert, AlertLevel, Notifier};

/// Collaborators shared by the engines of one process
#[derive(Clone)]
pub struct EngineComponents {
    pub exchange: Arc<dyn Exchange>,
    pub ensemble: Arc<dyn EnsembleAnalyzer>,
    /// `None` disables council review
    pub council: Option<Arc<ValidatorCouncil>>,
    pub portfolio: Arc<dyn Portfolio>,
    pub notifier: Arc<dyn Notifier>,
    pub breaker: Arc<CircuitBreaker>,
}

/// Per-symbol control loop running the risk-gated decision pipeline
pub struct TradingEngine {
    symbol: String,
    config: EngineConfig,
    components: EngineComponents,
    collector: MarketDataCollector,
    validator: DecisionValidator,
    sizer: Arc<PositionSizer>,
    executor: DecisionExecutor,
    running: AtomicBool,
    /// Bumped by every `start`; a loop whose run is no longer current exits
    run_id: AtomicU64,
    shutdown_tx: watch::Sender<bool>,
    cycle_lock: Mutex<()>,
}

impl TradingEngine {
    pub fn new(
        symbol: impl Into<String>,
        config: EngineConfig,
        risk: RiskConfig,
        sizing: SizingConfig,
        components: EngineComponents,
    ) -> Result<Self> {
        let symbol = symbol.into();
        if symbol.trim().is_empty() {
            return Err(AegisError::InvalidConfig("engine symbol is empty".to_string()));
        }
        if config.decision_interval_secs == 0 {
            return Err(AegisError::InvalidConfig(
                "decision_interval_secs must be positive".to_string(),
            ));
        }

        let sizer = Arc::new(PositionSizer::new(sizing));
        let collector = MarketDataCollector::new(
            Arc::clone(&components.exchange),
            config.timeframes.clone(),
            config.candle_limit,
            config.order_book_depth,
        );
        let executor = DecisionExecutor::new(
            Arc::clone(&components.exchange),
            Arc::clone(&sizer),
            config.margin_mode,
        );
        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            symbol,
            config,
            components,
            collector,
            validator: DecisionValidator::new(risk),
            sizer,
            executor,
            running: AtomicBool::new(false),
            run_id: AtomicU64::new(0),
            shutdown_tx,
            cycle_lock: Mutex::new(()),
        })
    }

    /// Replace the market data collector, e.g. to attach news sources
    pub fn with_collector(mut self, collector: MarketDataCollector) -> Self {
        self.collector = collector;
        self
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn circuit_breaker(&self) -> &Arc<CircuitBreaker> {
        &self.components.breaker
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Request cooperative shutdown. An in-flight cycle finishes first.
    pub fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            info!(symbol = %self.symbol, "stop requested");
        }
        self.shutdown_tx.send_replace(true);
    }

    /// Run a cycle now and then every decision interval until `stop`.
    pub async fn start(&self) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(AegisError::Internal(format!(
                "engine for {} is already running",
                self.symbol
            )));
        }
        let run_id = self.run_id.fetch_add(1, Ordering::SeqCst) + 1;
        let is_current = || self.run_id.load(Ordering::SeqCst) == run_id;
        self.shutdown_tx.send_replace(false);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        let mut ticker = interval(Duration::from_secs(self.config.decision_interval_secs));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            symbol = %self.symbol,
            interval_secs = self.config.decision_interval_secs,
            "trading engine started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if !self.is_running() || !is_current() {
                        break;
                    }
                    // Errors are logged and alerted inside
                    let _ = self.execute_trading_cycle().await;
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() || !is_current() {
                        break;
                    }
                }
            }
        }

        if is_current() {
            self.running.store(false, Ordering::SeqCst);
        }
        info!(symbol = %self.symbol, run_id, "trading engine stopped");
        Ok(())
    }

    /// Run one full pipeline pass.
    ///
    /// `Ok` covers both executed cycles and gate skips; `Err` is an abort,
    /// tagged with the stage that failed, and has already been alerted.
    pub async fn execute_trading_cycle(&self) -> Result<CycleOutcome> {
        let _in_flight = self.cycle_lock.lock().await;

        match self.run_pipeline().await {
            Ok(outcome) => {
                match &outcome {
                    CycleOutcome::Skipped { stage, reason } => {
                        info!(symbol = %self.symbol, stage = %stage, reason = %reason, "cycle skipped")
                    }
                    CycleOutcome::Held { decision } => {
                        info!(symbol = %self.symbol, confidence = decision.confidence, reason = %decision.reason, "holding")
                    }
                    CycleOutcome::Executed { decision, report, .. } => info!(
                        symbol = %self.symbol,
                        action = %decision.action,
                        orders = report.orders.len(),
                        note = ?report.note,
                        "cycle executed"
                    ),
                }
                Ok(outcome)
            }
            Err(e) => {
                let stage = e.stage().unwrap_or("unknown");
                error!(symbol = %self.symbol, stage, "cycle aborted: {}", e);
                self.components
                    .notifier
                    .notify(Alert::cycle_error(&self.symbol, stage, &e.root().to_string()))
                    .await;
                Err(e)
            }
        }
    }

    async fn run_pipeline(&self) -> Result<CycleOutcome> {
        let symbol = self.symbol.as_str();

        // 1. circuit breaker
        if self.components.breaker.is_open().await {
            let status = self.components.breaker.status().await;
            let reason = status
                .last_trip_reason
                .map(|r| r.to_string())
                .unwrap_or_else(|| "open".to_string());
            return Ok(CycleOutcome::skipped(CycleStage::CircuitBreaker, reason));
        }

        // 2. market data
        let snapshot = self
            .collector
            .collect(symbol)
            .await
            .map_err(|e| stage_error(CycleStage::MarketData, e))?;

        // 3. market conditions
        if let Err(rejection) = self.validator.validate_market_conditions(&snapshot) {
            return Ok(CycleOutcome::skipped(
                CycleStage::MarketConditions,
                rejection.to_string(),
            ));
        }

        // 4. portfolio
        let account = self
            .read_account()
            .await
            .map_err(|e| stage_error(CycleStage::Portfolio, e))?;

        // 5. drawdown
        if let Err(rejection) = DecisionValidator::check_drawdown(
            account.equity,
            account.peak_equity,
            self.validator.config().max_drawdown_percent,
        ) {
            self.force_breaker_on_drawdown(&account).await;
            return Err(stage_error(
                CycleStage::Drawdown,
                AegisError::DrawdownBreached(rejection.to_string()),
            ));
        }

        // 6. AI ensemble
        let request = self.build_request(&snapshot, &account);
        let prompt = request
            .to_prompt()
            .map_err(|e| stage_error(CycleStage::Ensemble, e))?;
        let ensemble = self
            .components
            .ensemble
            .analyze(&prompt)
            .await
            .map_err(|e| stage_error(CycleStage::Ensemble, e))?;

        // 7. agreement
        if let Err(rejection) = self.validator.validate_ensemble_decision(&ensemble) {
            return Ok(CycleOutcome::skipped(CycleStage::Agreement, rejection.to_string()));
        }
        let Some(decision) = ensemble.consensus else {
            return Ok(CycleOutcome::skipped(CycleStage::Agreement, "no consensus decision"));
        };
        debug!(
            symbol,
            action = %decision.action,
            confidence = decision.confidence,
            "ensemble consensus"
        );

        // 8. decision validation and sanity bounds
        if let Err(rejection) = self.validator.validate_decision(&decision, &snapshot) {
            return Ok(CycleOutcome::skipped(
                CycleStage::RiskValidation,
                rejection.to_string(),
            ));
        }
        if let Err(rejection) = self
            .validator
            .sanity_check(&decision, snapshot.current_price())
        {
            return Ok(CycleOutcome::skipped(CycleStage::SanityCheck, rejection.to_string()));
        }

        // council review for high-stakes actions
        let mut consensus = None;
        if let Some(council) = &self.components.council {
            if council.should_validate(&decision) {
                let result = council
                    .validate_decision(&decision, &snapshot, account.position.as_ref())
                    .await;
                if !result.execution_allowed {
                    return Ok(CycleOutcome::skipped(CycleStage::Council, result.summary));
                }
                consensus = Some(result);
            }
        }

        if decision.action == Action::Hold {
            return Ok(CycleOutcome::Held { decision });
        }

        // 9. execution
        let mut report = ExecutionReport::default();
        if let Err(e) = self
            .executor
            .execute_into(
                symbol,
                &decision,
                account.position.as_ref(),
                account.balance,
                snapshot.current_price(),
                &mut report,
            )
            .await
        {
            // a reversal can fail after its close leg already filled
            self.record_closed(&report, account.balance).await;
            return Err(stage_error(CycleStage::Execution, e));
        }

        // 10. bookkeeping
        self.after_execution(&decision, &report, account.balance).await;

        Ok(CycleOutcome::Executed {
            decision,
            report,
            consensus,
        })
    }

    async fn read_account(&self) -> Result<AccountView> {
        let portfolio = &self.components.portfolio;
        portfolio.update_from_exchange().await?;
        let position = self.components.exchange.fetch_position(&self.symbol).await?;

        Ok(AccountView {
            position,
            balance: portfolio.get_balance().await,
            equity: portfolio.get_equity().await,
            daily_pnl: portfolio.get_daily_pnl().await,
            peak_equity: portfolio.get_peak_equity().await,
        })
    }

    /// Feed the breaker the drawdown as one loss so a breach trips it
    async fn force_breaker_on_drawdown(&self, account: &AccountView) {
        let loss = (account.peak_equity - account.equity).max(Decimal::ONE);
        warn!(
            symbol = %self.symbol,
            equity = %account.equity,
            peak = %account.peak_equity,
            "drawdown breached, recording synthetic loss of {}",
            loss
        );
        if let Err(e) = self
            .components
            .breaker
            .record_trade(-loss, account.balance.max(account.equity))
            .await
        {
            self.components
                .notifier
                .notify(Alert::circuit_breaker_tripped(&self.symbol, &e.to_string()))
                .await;
        }
    }

    fn build_request(&self, snapshot: &MarketSnapshot, account: &AccountView) -> DecisionRequest {
        let price = snapshot.current_price();
        DecisionRequest {
            symbol: self.symbol.clone(),
            snapshot: snapshot.clone(),
            position: account.position.clone(),
            balance: account.balance,
            equity: account.equity,
            daily_pnl: account.daily_pnl,
            long_plan: self
                .sizer
                .calculate(account.balance, price, PositionSide::Long)
                .ok(),
            short_plan: self
                .sizer
                .calculate(account.balance, price, PositionSide::Short)
                .ok(),
            min_confidence: self.validator.config().min_confidence,
        }
    }

    /// Book realized trades with the portfolio and the circuit breaker
    async fn record_closed(&self, report: &ExecutionReport, balance: Decimal) {
        for trade in &report.closed {
            if let Err(e) = self.components.portfolio.record_trade(trade.clone()).await {
                warn!(symbol = %self.symbol, "failed to record trade: {}", e);
            }
            if let Err(e) = self
                .components
                .breaker
                .record_trade(trade.realized_pnl, balance)
                .await
            {
                self.components
                    .notifier
                    .notify(Alert::circuit_breaker_tripped(&self.symbol, &e.to_string()))
                    .await;
            }
        }
    }

    async fn after_execution(&self, decision: &Decision, report: &ExecutionReport, balance: Decimal) {
        let portfolio = &self.components.portfolio;
        let notifier = &self.components.notifier;

        self.record_closed(report, balance).await;

        if !report.is_noop() {
            notifier
                .notify(Alert::trade_executed(
                    &self.symbol,
                    &format!(
                        "{} ({}% confidence, {} orders, realized {})",
                        decision.action,
                        decision.confidence,
                        report.orders.len(),
                        report.realized_pnl()
                    ),
                ))
                .await;
        }

        if let Err(e) = portfolio.update_from_exchange().await {
            warn!(
                symbol = %self.symbol,
                stage = %CycleStage::PostTrade,
                "portfolio refresh failed: {}",
                e
            );
            return;
        }

        let (withdraw, amount) = portfolio.check_profit_withdrawal().await;
        if withdraw {
            notifier
                .notify(Alert::new(
                    AlertLevel::Info,
                    "portfolio",
                    "Profit Withdrawal Available",
                    &format!("{} available above initial capital", amount),
                ))
                .await;
        }
    }
}

struct AccountView {
    position: Option<Position>,
    balance: Decimal,
    equity: Decimal,
    daily_pnl: Decimal,
    peak_equity: Decimal,
}

fn stage_error(stage: CycleStage, error: AegisError) -> AegisError {
    error.at_stage(stage.as_str())
}
