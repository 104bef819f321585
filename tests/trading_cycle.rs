//! End-to-end trading cycle tests against the paper exchange.

use aegis::ai::{EnsembleAnalyzer, ValidationProvider, ValidationRequest, ValidationResponse};
use aegis::council::{CouncilConfig, ValidatorCouncil, ValidatorRole, ValidatorSetup};
use aegis::domain::{Action, Decision, EnsembleDecision, OrderRequest, OrderSide};
use aegis::engine::{CycleOutcome, CycleStage, EngineComponents, EngineConfig, TradingEngine};
use aegis::error::{AegisError, Result};
use aegis::exchange::{Exchange, PaperConfig, PaperExchange, PaperOp};
use aegis::portfolio::{Portfolio, PortfolioConfig, PortfolioTracker, TradeRecord};
use aegis::risk::{CircuitBreaker, CircuitBreakerConfig, RiskConfig, SizingConfig};
use aegis::supervisor::{Alert, AlertLevel, Notifier};
use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

const SYMBOL: &str = "BTC/USDT";

enum Reply {
    Agree(Decision),
    Split(Decision),
    Fail,
}

/// Always gives the same answer
struct ScriptedEnsemble {
    reply: Reply,
    calls: AtomicUsize,
}

impl ScriptedEnsemble {
    fn with_reply(reply: Reply) -> Arc<Self> {
        Arc::new(Self {
            reply,
            calls: AtomicUsize::new(0),
        })
    }

    fn new(decision: Decision) -> Arc<Self> {
        Self::with_reply(Reply::Agree(decision))
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EnsembleAnalyzer for ScriptedEnsemble {
    async fn analyze(&self, _prompt: &str) -> Result<EnsembleDecision> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.reply {
            Reply::Agree(decision) => Ok(EnsembleDecision::unanimous(decision.clone())),
            Reply::Split(decision) => Ok(EnsembleDecision::disagreement(vec![
                decision.clone(),
                Decision::new(Action::Hold, 80, "other"),
            ])),
            Reply::Fail => Err(AegisError::provider("scripted", "every member timed out")),
        }
    }
}

#[derive(Default)]
struct RecordingNotifier {
    alerts: Mutex<Vec<Alert>>,
}

impl RecordingNotifier {
    async fn titles(&self) -> Vec<String> {
        self.alerts
            .lock()
            .await
            .iter()
            .map(|a| a.title.clone())
            .collect()
    }

    async fn count(&self, level: AlertLevel) -> usize {
        self.alerts
            .lock()
            .await
            .iter()
            .filter(|a| a.level == level)
            .count()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, alert: Alert) {
        self.alerts.lock().await.push(alert);
    }
}

/// Account stuck below its peak
struct DrawnDownPortfolio;

#[async_trait]
impl Portfolio for DrawnDownPortfolio {
    async fn get_balance(&self) -> Decimal {
        dec!(7000)
    }

    async fn get_equity(&self) -> Decimal {
        dec!(7000)
    }

    async fn get_daily_pnl(&self) -> Decimal {
        dec!(-3000)
    }

    async fn get_peak_equity(&self) -> Decimal {
        dec!(10000)
    }

    async fn update_from_exchange(&self) -> Result<()> {
        Ok(())
    }

    async fn record_trade(&self, _trade: TradeRecord) -> Result<()> {
        Ok(())
    }

    async fn check_profit_withdrawal(&self) -> (bool, Decimal) {
        (false, Decimal::ZERO)
    }
}

/// Real tracker whose refreshes start failing after the first one
struct FlakyRefresh {
    inner: PortfolioTracker,
    refreshes: AtomicUsize,
}

#[async_trait]
impl Portfolio for FlakyRefresh {
    async fn get_balance(&self) -> Decimal {
        self.inner.get_balance().await
    }

    async fn get_equity(&self) -> Decimal {
        self.inner.get_equity().await
    }

    async fn get_daily_pnl(&self) -> Decimal {
        self.inner.get_daily_pnl().await
    }

    async fn get_peak_equity(&self) -> Decimal {
        self.inner.get_peak_equity().await
    }

    async fn update_from_exchange(&self) -> Result<()> {
        if self.refreshes.fetch_add(1, Ordering::SeqCst) > 0 {
            return Err(AegisError::Exchange("balance endpoint down".to_string()));
        }
        self.inner.update_from_exchange().await
    }

    async fn record_trade(&self, trade: TradeRecord) -> Result<()> {
        self.inner.record_trade(trade).await
    }

    async fn check_profit_withdrawal(&self) -> (bool, Decimal) {
        self.inner.check_profit_withdrawal().await
    }
}

struct FixedVote(&'static str);

#[async_trait]
impl ValidationProvider for FixedVote {
    fn name(&self) -> &str {
        "claude"
    }

    async fn validate_decision(&self, _request: &ValidationRequest) -> Result<ValidationResponse> {
        Ok(ValidationResponse {
            verdict: Some(self.0.to_string()),
            confidence: 90,
            reasoning: format!("{} from test", self.0),
            key_risks: vec!["funding".to_string()],
            ..Default::default()
        })
    }
}

struct Harness {
    exchange: Arc<PaperExchange>,
    ensemble: Arc<ScriptedEnsemble>,
    notifier: Arc<RecordingNotifier>,
    breaker: Arc<CircuitBreaker>,
    tracker: Arc<PortfolioTracker>,
    engine: Arc<TradingEngine>,
}

fn open_long(stop_loss: Decimal) -> Decision {
    Decision::new(Action::OpenLong, 80, "scripted")
        .with_size(dec!(1))
        .with_stops(stop_loss, dec!(106))
        .with_reason("breakout above range")
}

fn harness_with(
    ensemble: Arc<ScriptedEnsemble>,
    council: Option<Arc<ValidatorCouncil>>,
    portfolio: Option<Arc<dyn Portfolio>>,
    interval_secs: u64,
) -> Harness {
    let exchange = Arc::new(PaperExchange::new(PaperConfig::default()));
    harness_on(exchange, ensemble, council, portfolio, interval_secs)
}

fn harness_on(
    exchange: Arc<PaperExchange>,
    ensemble: Arc<ScriptedEnsemble>,
    council: Option<Arc<ValidatorCouncil>>,
    portfolio: Option<Arc<dyn Portfolio>>,
    interval_secs: u64,
) -> Harness {
    let notifier = Arc::new(RecordingNotifier::default());
    let breaker = Arc::new(CircuitBreaker::new(CircuitBreakerConfig::default()));
    let tracker = Arc::new(PortfolioTracker::new(
        exchange.clone(),
        PortfolioConfig::default(),
    ));
    let portfolio: Arc<dyn Portfolio> = match portfolio {
        Some(portfolio) => portfolio,
        None => tracker.clone(),
    };

    let components = EngineComponents {
        exchange: exchange.clone(),
        ensemble: ensemble.clone(),
        council,
        portfolio,
        notifier: notifier.clone(),
        breaker: breaker.clone(),
    };
    let config = EngineConfig {
        symbols: vec![SYMBOL.to_string()],
        decision_interval_secs: interval_secs,
        ..Default::default()
    };
    let engine = TradingEngine::new(
        SYMBOL,
        config,
        RiskConfig::default(),
        SizingConfig::default(),
        components,
    )
    .unwrap();

    Harness {
        exchange,
        ensemble,
        notifier,
        breaker,
        tracker,
        engine: Arc::new(engine),
    }
}

fn harness(decision: Decision) -> Harness {
    harness_with(ScriptedEnsemble::new(decision), None, None, 300)
}

fn council_voting(verdict: &'static str) -> Arc<ValidatorCouncil> {
    let setup = ValidatorSetup::new(ValidatorRole::RiskManager, Arc::new(FixedVote(verdict)), 1.0);
    Arc::new(ValidatorCouncil::new(CouncilConfig::default(), vec![setup]).unwrap())
}

#[tokio::test]
async fn missing_ticker_aborts_at_market_data() {
    let h = harness(open_long(dec!(97)));
    h.exchange.fail(PaperOp::Ticker).await;

    let err = h.engine.execute_trading_cycle().await.unwrap_err();

    assert_eq!(err.stage(), Some("market_data"));
    assert!(matches!(err.root(), AegisError::MarketDataUnavailable(_)));
    assert_eq!(h.ensemble.calls(), 0);
    assert!(h.exchange.orders().await.is_empty());
    assert_eq!(h.notifier.titles().await, vec!["Trading Cycle Failed".to_string()]);
}

#[tokio::test]
async fn valid_open_long_is_executed() {
    let h = harness(open_long(dec!(97)));

    let outcome = h.engine.execute_trading_cycle().await.unwrap();

    match outcome {
        CycleOutcome::Executed {
            decision,
            report,
            consensus,
        } => {
            assert_eq!(decision.action, Action::OpenLong);
            assert_eq!(report.orders.len(), 1);
            assert!(consensus.is_none());
        }
        other => panic!("expected execution, got {:?}", other),
    }

    let position = h.exchange.fetch_position(SYMBOL).await.unwrap().unwrap();
    assert_eq!(position.size, dec!(1));
    assert_eq!(h.exchange.leverage(SYMBOL).await, Some(3));
    assert!(h
        .notifier
        .titles()
        .await
        .contains(&"Trade Executed".to_string()));
}

#[tokio::test]
async fn tight_stop_is_rejected_before_execution() {
    let h = harness(open_long(dec!(99.8)));

    let outcome = h.engine.execute_trading_cycle().await.unwrap();

    assert_eq!(outcome.stage(), Some(CycleStage::RiskValidation));
    assert!(h.exchange.orders().await.is_empty());
}

#[tokio::test]
async fn low_confidence_consensus_is_skipped() {
    let decision = Decision::new(Action::OpenLong, 40, "scripted")
        .with_size(dec!(1))
        .with_stops(dec!(97), dec!(106));
    let h = harness(decision);

    let outcome = h.engine.execute_trading_cycle().await.unwrap();

    assert_eq!(outcome.stage(), Some(CycleStage::Agreement));
    assert!(h.exchange.orders().await.is_empty());
}

#[tokio::test]
async fn hold_places_no_orders() {
    let h = harness(Decision::new(Action::Hold, 90, "scripted").with_reason("chop"));

    let outcome = h.engine.execute_trading_cycle().await.unwrap();

    assert!(matches!(outcome, CycleOutcome::Held { .. }));
    assert!(h.exchange.orders().await.is_empty());
}

#[tokio::test]
async fn drawdown_breach_trips_the_breaker() {
    let h = harness_with(
        ScriptedEnsemble::new(open_long(dec!(97))),
        None,
        Some(Arc::new(DrawnDownPortfolio)),
        300,
    );

    let err = h.engine.execute_trading_cycle().await.unwrap_err();
    assert_eq!(err.stage(), Some("drawdown"));
    assert!(matches!(err.root(), AegisError::DrawdownBreached(_)));
    assert!(h.breaker.is_open().await);
    assert_eq!(h.notifier.count(AlertLevel::Critical).await, 1);
    assert_eq!(h.ensemble.calls(), 0);

    // Following cycles stop at the breaker
    let outcome = h.engine.execute_trading_cycle().await.unwrap();
    assert_eq!(outcome.stage(), Some(CycleStage::CircuitBreaker));
}

#[tokio::test]
async fn open_breaker_skips_everything() {
    let h = harness(open_long(dec!(97)));
    h.breaker.trip("manual halt").await;

    let outcome = h.engine.execute_trading_cycle().await.unwrap();

    assert_eq!(outcome.stage(), Some(CycleStage::CircuitBreaker));
    assert_eq!(h.ensemble.calls(), 0);
    assert!(h.exchange.orders().await.is_empty());
}

#[tokio::test]
async fn council_rejection_blocks_execution() {
    let h = harness_with(
        ScriptedEnsemble::new(open_long(dec!(97))),
        Some(council_voting("REJECT")),
        None,
        300,
    );

    let outcome = h.engine.execute_trading_cycle().await.unwrap();

    match outcome {
        CycleOutcome::Skipped { stage, reason } => {
            assert_eq!(stage, CycleStage::Council);
            assert!(reason.starts_with("Council REJECT"), "{}", reason);
        }
        other => panic!("expected council skip, got {:?}", other),
    }
    assert!(h.exchange.orders().await.is_empty());
}

#[tokio::test]
async fn council_approval_is_attached_to_the_outcome() {
    let h = harness_with(
        ScriptedEnsemble::new(open_long(dec!(97))),
        Some(council_voting("APPROVE")),
        None,
        300,
    );

    let outcome = h.engine.execute_trading_cycle().await.unwrap();

    match outcome {
        CycleOutcome::Executed { consensus, .. } => {
            let consensus = consensus.unwrap();
            assert!(consensus.execution_allowed);
            assert_eq!(consensus.votes.len(), 1);
        }
        other => panic!("expected execution, got {:?}", other),
    }
}

#[tokio::test]
async fn start_runs_immediately_and_stops_on_request() {
    let h = harness_with(
        ScriptedEnsemble::new(Decision::new(Action::Hold, 90, "scripted")),
        None,
        None,
        1,
    );
    let engine = Arc::clone(&h.engine);
    let handle = tokio::spawn(async move { engine.start().await });

    for _ in 0..100 {
        if h.ensemble.calls() > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(h.ensemble.calls() >= 1);
    assert!(h.engine.is_running());
    assert!(h.engine.start().await.is_err(), "second start must be refused");

    h.engine.stop();
    let result = tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("engine did not stop")
        .unwrap();
    assert!(result.is_ok());
    assert!(!h.engine.is_running());
}

#[tokio::test]
async fn missing_order_book_skips_at_market_conditions() {
    let h = harness(open_long(dec!(97)));
    h.exchange.fail(PaperOp::OrderBook).await;

    let outcome = h.engine.execute_trading_cycle().await.unwrap();

    assert_eq!(outcome.stage(), Some(CycleStage::MarketConditions));
    assert_eq!(h.ensemble.calls(), 0);
    assert!(h.exchange.orders().await.is_empty());
}

#[tokio::test]
async fn ensemble_failure_aborts_and_alerts() {
    let h = harness_with(ScriptedEnsemble::with_reply(Reply::Fail), None, None, 300);

    let err = h.engine.execute_trading_cycle().await.unwrap_err();

    assert_eq!(err.stage(), Some("ensemble"));
    assert!(matches!(err.root(), AegisError::Provider { .. }));
    assert!(h.exchange.orders().await.is_empty());
    assert_eq!(h.notifier.titles().await, vec!["Trading Cycle Failed".to_string()]);
}

#[tokio::test]
async fn split_ensemble_is_skipped_at_agreement() {
    let h = harness_with(
        ScriptedEnsemble::with_reply(Reply::Split(open_long(dec!(97)))),
        None,
        None,
        300,
    );

    let outcome = h.engine.execute_trading_cycle().await.unwrap();

    match outcome {
        CycleOutcome::Skipped { stage, reason } => {
            assert_eq!(stage, CycleStage::Agreement);
            assert!(reason.contains("do not agree"), "{}", reason);
        }
        other => panic!("expected agreement skip, got {:?}", other),
    }
    assert!(h.exchange.orders().await.is_empty());
}

#[tokio::test]
async fn implausible_size_is_skipped_at_sanity_check() {
    let decision = Decision::new(Action::OpenLong, 80, "scripted")
        .with_size(dec!(150))
        .with_stops(dec!(97), dec!(106));
    let h = harness(decision);

    let outcome = h.engine.execute_trading_cycle().await.unwrap();

    assert_eq!(outcome.stage(), Some(CycleStage::SanityCheck));
    assert!(h.exchange.orders().await.is_empty());
}

#[tokio::test]
async fn rejected_order_aborts_at_execution() {
    let h = harness(open_long(dec!(97)));
    h.exchange.fail(PaperOp::CreateOrder).await;

    let err = h.engine.execute_trading_cycle().await.unwrap_err();

    assert_eq!(err.stage(), Some("execution"));
    assert!(matches!(err.root(), AegisError::Exchange(_)));
    assert!(h.exchange.orders().await.is_empty());
    assert_eq!(h.notifier.titles().await, vec!["Trading Cycle Failed".to_string()]);
}

#[tokio::test]
async fn failed_refresh_after_trade_does_not_abort_the_cycle() {
    let exchange = Arc::new(PaperExchange::new(PaperConfig::default()));
    let flaky = Arc::new(FlakyRefresh {
        inner: PortfolioTracker::new(exchange.clone(), PortfolioConfig::default()),
        refreshes: AtomicUsize::new(0),
    });
    let h = harness_on(
        exchange,
        ScriptedEnsemble::new(open_long(dec!(97))),
        None,
        Some(flaky.clone()),
        300,
    );

    let outcome = h.engine.execute_trading_cycle().await.unwrap();

    assert!(outcome.is_executed());
    assert_eq!(flaky.refreshes.load(Ordering::SeqCst), 2);
    assert_eq!(h.notifier.titles().await, vec!["Trade Executed".to_string()]);
}

#[tokio::test]
async fn failed_reversal_still_books_the_closed_loss() {
    let exchange = Arc::new(PaperExchange::new(PaperConfig::default()));
    exchange.set_leverage(SYMBOL, 3).await.unwrap();
    exchange
        .create_order(&OrderRequest::market(SYMBOL, OrderSide::Buy, dec!(2)))
        .await
        .unwrap();
    exchange.set_price(SYMBOL, dec!(95)).await;

    let short = Decision::new(Action::OpenShort, 80, "scripted")
        .with_size(dec!(1))
        .with_stops(dec!(98), dec!(89))
        .with_reason("breakdown");
    let h = harness_on(exchange, ScriptedEnsemble::new(short), None, None, 300);
    h.exchange.fail(PaperOp::SetLeverage).await;

    let err = h.engine.execute_trading_cycle().await.unwrap_err();

    assert_eq!(err.stage(), Some("execution"));
    // the long was closed before the short leg failed
    assert!(h.exchange.fetch_position(SYMBOL).await.unwrap().is_none());
    assert_eq!(h.breaker.status().await.consecutive_losses, 1);
    let trades = h.tracker.trades().await;
    assert_eq!(trades.len(), 1);
    assert!(trades[0].realized_pnl < Decimal::ZERO);
}

#[tokio::test]
async fn restart_right_after_stop_leaves_one_loop() {
    let h = harness_with(
        ScriptedEnsemble::new(Decision::new(Action::Hold, 90, "scripted")),
        None,
        None,
        1,
    );
    let engine = Arc::clone(&h.engine);
    let first = tokio::spawn(async move { engine.start().await });
    for _ in 0..100 {
        if h.ensemble.calls() > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    // Restart before the first loop has observed the stop
    h.engine.stop();
    let engine = Arc::clone(&h.engine);
    let mut second = Box::pin(async move { engine.start().await });
    assert!(futures::poll!(&mut second).is_pending());
    let second = tokio::spawn(second);

    let result = tokio::time::timeout(Duration::from_secs(2), first)
        .await
        .expect("superseded loop kept running")
        .unwrap();
    assert!(result.is_ok());
    assert!(h.engine.is_running());

    h.engine.stop();
    tokio::time::timeout(Duration::from_secs(2), second)
        .await
        .expect("engine did not stop")
        .unwrap()
        .unwrap();
    assert!(!h.engine.is_running());
}
