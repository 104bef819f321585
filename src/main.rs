use aegis::ai::{AgentEnsemble, ClaudeCliProvider, DecisionProvider, ValidationProvider};
use aegis::config::{AppConfig, LoggingConfig};
use aegis::council::{PromptTemplates, ValidatorCouncil, ValidatorSetup};
use aegis::engine::{CycleOutcome, EngineComponents, TradingEngine};
use aegis::exchange::build_exchange;
use aegis::portfolio::PortfolioTracker;
use aegis::risk::CircuitBreaker;
use aegis::supervisor::{AlertManager, WebhookNotifier};
use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "aegis", version, about = "Risk-gated AI derivatives trading bot")]
struct Cli {
    /// Configuration directory (default.toml plus $AEGIS_ENV overrides)
    #[arg(long, global = true, default_value = "config", env = "AEGIS_CONFIG_DIR")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run one trading engine per symbol until Ctrl+C
    Run {
        /// Override the configured symbols
        #[arg(long = "symbol")]
        symbols: Vec<String>,
    },
    /// Run a single trading cycle and print the outcome
    Once {
        #[arg(long)]
        symbol: String,
    },
    /// Load and validate the configuration
    CheckConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load_from(&cli.config)
        .with_context(|| format!("failed to load config from {}", cli.config.display()))?;

    match cli.command {
        Commands::CheckConfig => {
            init_logging_simple();
            match config.validate() {
                Ok(()) => {
                    println!("configuration OK");
                    println!("{}", serde_json::to_string_pretty(&config)?);
                }
                Err(errors) => {
                    for e in &errors {
                        println!("  - {}", e);
                    }
                    return Err(anyhow!("{} configuration error(s)", errors.len()));
                }
            }
        }
        Commands::Once { symbol } => {
            init_logging(&config.logging);
            config.engine.symbols = vec![symbol.clone()];
            ensure_valid(&config)?;

            let components = build_components(&config)?;
            let engine = build_engine(&symbol, &config, components)?;
            match engine.execute_trading_cycle().await {
                Ok(CycleOutcome::Skipped { stage, reason }) => {
                    println!("skipped at {}: {}", stage, reason)
                }
                Ok(CycleOutcome::Held { decision }) => {
                    println!("HOLD ({}%): {}", decision.confidence, decision.reason)
                }
                Ok(CycleOutcome::Executed {
                    decision, report, ..
                }) => println!(
                    "{} executed: {} order(s), realized {}",
                    decision.action,
                    report.orders.len(),
                    report.realized_pnl()
                ),
                Err(e) => return Err(anyhow!("cycle failed: {}", e)),
            }
        }
        Commands::Run { symbols } => {
            init_logging(&config.logging);
            if !symbols.is_empty() {
                config.engine.symbols = symbols;
            }
            ensure_valid(&config)?;
            run_engines(&config).await?;
        }
    }

    Ok(())
}

fn ensure_valid(config: &AppConfig) -> anyhow::Result<()> {
    if let Err(errors) = config.validate() {
        for e in &errors {
            error!("config: {}", e);
        }
        return Err(anyhow!("{} configuration error(s)", errors.len()));
    }
    Ok(())
}

async fn run_engines(config: &AppConfig) -> anyhow::Result<()> {
    let components = build_components(config)?;

    let mut engines = Vec::new();
    for symbol in &config.engine.symbols {
        engines.push(Arc::new(build_engine(symbol, config, components.clone())?));
    }

    let handles: Vec<_> = engines
        .iter()
        .map(|engine| {
            let engine = Arc::clone(engine);
            tokio::spawn(async move {
                if let Err(e) = engine.start().await {
                    error!(symbol = %engine.symbol(), "engine failed: {}", e);
                }
            })
        })
        .collect();

    info!(
        engines = engines.len(),
        exchange = %config.exchange.kind,
        "aegis running. Press Ctrl+C to stop."
    );
    shutdown_signal().await;

    info!("shutting down engines");
    for engine in &engines {
        engine.stop();
    }
    for handle in futures::future::join_all(handles).await {
        if let Err(e) = handle {
            warn!("engine task panicked: {}", e);
        }
    }

    components.exchange.close().await?;
    info!("shutdown complete");
    Ok(())
}

fn build_components(config: &AppConfig) -> anyhow::Result<EngineComponents> {
    let exchange = build_exchange(&config.exchange.kind, &config.exchange.paper)?;

    let providers: HashMap<String, Arc<ClaudeCliProvider>> = config
        .ai
        .providers
        .iter()
        .map(|p| (p.name.clone(), Arc::new(ClaudeCliProvider::new(p.clone()))))
        .collect();

    let members = config
        .ai
        .ensemble
        .members
        .iter()
        .map(|name| {
            providers
                .get(name)
                .map(|p| Arc::clone(p) as Arc<dyn DecisionProvider>)
                .ok_or_else(|| anyhow!("unknown ensemble provider '{}'", name))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;
    let ensemble = AgentEnsemble::new(members, config.ai.ensemble.clone())?;

    let council = if config.council.enabled {
        let validators = config
            .council
            .members
            .iter()
            .map(|member| {
                let provider = providers
                    .get(&member.provider)
                    .ok_or_else(|| anyhow!("unknown council provider '{}'", member.provider))?;
                Ok(ValidatorSetup::new(
                    member.resolved_role(),
                    Arc::clone(provider) as Arc<dyn ValidationProvider>,
                    member.weight,
                ))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;
        let council = ValidatorCouncil::new(config.council.clone(), validators)?
            .with_templates(Arc::new(PromptTemplates::with_defaults()));
        info!(members = council.validators().len(), "validator council enabled");
        Some(Arc::new(council))
    } else {
        info!("validator council disabled");
        None
    };

    let mut alerts = AlertManager::new(config.alerts.clone());
    if config.alerts.webhook_url.is_none() {
        if let Some(webhook) = WebhookNotifier::from_env() {
            alerts = alerts.with_webhook(webhook);
        }
    }

    Ok(EngineComponents {
        portfolio: Arc::new(PortfolioTracker::new(
            Arc::clone(&exchange),
            config.portfolio.clone(),
        )),
        exchange,
        ensemble: Arc::new(ensemble),
        council,
        notifier: Arc::new(alerts),
        breaker: Arc::new(CircuitBreaker::new(config.circuit_breaker.clone())),
    })
}

fn build_engine(
    symbol: &str,
    config: &AppConfig,
    components: EngineComponents,
) -> anyhow::Result<TradingEngine> {
    Ok(TradingEngine::new(
        symbol,
        config.engine.clone(),
        config.risk.clone(),
        config.sizing.clone(),
        components,
    )?)
}

fn init_logging(logging: &LoggingConfig) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},aegis=debug", logging.level)));

    // File logging only when AEGIS_LOG_DIR is set
    let file_layer = std::env::var("AEGIS_LOG_DIR").ok().and_then(|log_dir| {
        // rolling::daily panics if the first file cannot be created
        if let Err(e) = std::fs::create_dir_all(&log_dir) {
            eprintln!(
                "Warning: Could not create log directory {} ({}), file logging disabled",
                log_dir, e
            );
            return None;
        }
        let file_appender = tracing_appender::rolling::daily(&log_dir, "aegis.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        // Guard lives for the whole process
        Box::leak(Box::new(guard));
        eprintln!("Logging to: {}/aegis.log", log_dir);
        Some(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(true),
        )
    });

    let (plain, json) = if logging.json {
        (None, Some(tracing_subscriber::fmt::layer().json().with_target(true)))
    } else {
        (
            Some(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            ),
            None,
        )
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(plain)
        .with(json)
        .with(file_layer)
        .init();
}

fn init_logging_simple() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .try_init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => error!("Failed to install SIGTERM handler: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
