//! ACID ledger demonstration binary
//!
//! ```text
//! acid-demo [--config ledger.toml] <scenario>
//! ```
//!
//! Scenarios: atomic, non-atomic, optimistic, pessimistic, read-uncommitted,
//! read-committed, repeatable-read, serializable, all.

use acid_ledger::{
    config::LogFormat, scenarios, AccountId, Config, IsolationLevel, Ledger, Strategy,
    TransferOutcome, TransferRequest,
};
use anyhow::{bail, Context};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

const SCENARIOS: [&str; 8] = [
    "atomic",
    "non-atomic",
    "optimistic",
    "pessimistic",
    "read-uncommitted",
    "read-committed",
    "repeatable-read",
    "serializable",
];

/// Delay before the competing writer acts during a probe
const MUTATE_AFTER: Duration = Duration::from_millis(1000);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut args = std::env::args().skip(1);
    let mut config_path = None;
    let mut scenario = None;
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" | "-c" => config_path = Some(args.next().context("--config needs a path")?),
            _ => scenario = Some(arg),
        }
    }

    let config = match config_path {
        Some(path) => Config::from_file(&path).with_context(|| format!("loading {}", path))?,
        None => Config::load()?,
    };
    init_tracing(&config);

    tracing::info!(service = %config.service_name, "Starting ACID ledger demo");

    let ledger = Ledger::open(config)?;
    let scenario = scenario.unwrap_or_else(|| "all".to_string());

    let selected: Vec<&str> = match scenario.as_str() {
        "all" => SCENARIOS.to_vec(),
        name if SCENARIOS.contains(&name) => vec![name],
        other => bail!(
            "unknown scenario {:?}; expected one of {} or all",
            other,
            SCENARIOS.join(", ")
        ),
    };

    for name in selected {
        let result = run(&ledger, name).await?;
        println!("{}", serde_json::to_string_pretty(&json!({ "scenario": name, "result": result }))?);
    }

    tracing::info!(metrics = %ledger.metrics().render(), "Demo finished");
    Ok(())
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.as_str()));

    match config.logging.format {
        LogFormat::Json => tracing_subscriber::fmt().json().with_env_filter(filter).init(),
        LogFormat::Pretty => tracing_subscriber::fmt().pretty().with_env_filter(filter).init(),
    }
}

async fn run(ledger: &Ledger, scenario: &str) -> anyhow::Result<Value> {
    ledger.reset()?;
    let a = AccountId::new("ACC001");
    let b = AccountId::new("ACC002");
    let amount = Decimal::new(200, 0);

    let value = match scenario {
        "atomic" | "non-atomic" => {
            let request = if scenario == "atomic" {
                TransferRequest::new(a, b, amount, Strategy::Atomic)
            } else {
                TransferRequest::new(a, b, amount, Strategy::Uncontrolled).with_simulated_error(true)
            };
            let worker = ledger.clone();
            let result = tokio::task::spawn_blocking(move || worker.transfer(&request)).await?;
            json!({
                "outcome": TransferOutcome::from(&result),
                "accounts": ledger.list_accounts(),
                "transactions": ledger.list_transactions(),
                "drift": ledger.conservation_drift(),
            })
        }
        "optimistic" | "pessimistic" => {
            let worker = ledger.clone();
            let optimistic = scenario == "optimistic";
            let report = tokio::task::spawn_blocking(move || {
                if optimistic {
                    scenarios::optimistic_race(&worker, &a, &b, amount)
                } else {
                    scenarios::pessimistic_race(&worker, &a, &b, amount)
                }
            })
            .await?;
            serde_json::to_value(report)?
        }
        level => probe(ledger, level.parse()?, a).await?,
    };

    Ok(value)
}

/// Probe with a competing writer driven from the async side
async fn probe(ledger: &Ledger, level: IsolationLevel, account: AccountId) -> anyhow::Result<Value> {
    let probe_ledger = ledger.clone();
    let probe_account = account.clone();
    let probe = tokio::task::spawn_blocking(move || {
        probe_ledger.observe_isolation(&probe_account, level)
    });

    tokio::time::sleep(MUTATE_AFTER).await;

    let writer_ledger = ledger.clone();
    let writer_account = account.clone();
    let writer = if level == IsolationLevel::ReadUncommitted {
        tokio::task::spawn_blocking(move || {
            writer_ledger.long_running_update(
                &writer_account,
                Decimal::new(-300, 0),
                &acid_ledger::OpContext::background(),
            )
        })
    } else {
        tokio::task::spawn_blocking(move || {
            writer_ledger.mutate_balance(&writer_account, Decimal::new(100, 0))
        })
    };

    // Insert a phantom inside the second probe wait
    let first_wait = Duration::from_millis(ledger.config().probe.first_wait_ms);
    tokio::time::sleep(first_wait.saturating_sub(MUTATE_AFTER) + Duration::from_millis(200)).await;
    let phantom = ledger.open_account("ACC-PHANTOM", Decimal::new(1, 0));

    let observed = probe.await??;
    let written = writer.await?;

    Ok(json!({
        "probe": observed,
        "balance_changed": observed.balance_changed(),
        "phantom_observed": observed.phantom_observed(),
        "concurrent_write": written.map(|acc| acc.balance.to_string()).unwrap_or_else(|e| e.to_string()),
        "phantom_opened": phantom.is_ok(),
    }))
}
