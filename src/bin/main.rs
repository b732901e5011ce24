use hedge_cycle_orchestrator::{agent::Orchestrator, config::OrchestratorConfig};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = OrchestratorConfig::from_env()?;

    info!(
        securities = ?config.securities,
        max_retries = config.max_retries,
        "Trading cycle orchestrator starting"
    );

    let orchestrator = Arc::new(Orchestrator::from_config(config)?);

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received - cancelling cycles");
            on_signal.cancel();
        }
    });

    let results = orchestrator.run_configured(&cancel).await;
    let mut failed = 0;

    println!("\n=== TRADING CYCLES ===");
    for result in results {
        match result {
            Ok(snapshot) => {
                println!(
                    "\n{} [{}] {}",
                    snapshot.security,
                    snapshot.state,
                    snapshot.terminal_reason.as_deref().unwrap_or_default()
                );
                println!("Cycle ID: {}", snapshot.id);
                if let Some(intelligence) = &snapshot.intelligence {
                    println!(
                        "Intelligence: {} results, {} failures, composite {:.4}",
                        intelligence.results.len(),
                        intelligence.failures.len(),
                        intelligence.composite_risk_adjustment
                    );
                }
                println!("Transitions:");
                for (i, t) in snapshot.transitions.iter().enumerate() {
                    println!("  {}: {} → {} (attempt {})", i + 1, t.from, t.to, t.attempt + 1);
                }
                if let Some(order) = &snapshot.order {
                    println!("Order: {}", serde_json::to_string_pretty(order)?);
                }
            }
            Err(e) => {
                failed += 1;
                eprintln!("Cycle could not run: {}", e);
            }
        }
    }

    if failed > 0 {
        return Err(format!("{} cycle(s) could not run", failed).into());
    }
    Ok(())
}
