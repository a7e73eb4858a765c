use async_trait::async_trait;
use clap::{Parser, Subcommand};
use rand::Rng;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

use dbguard::audit::{AuditContext, EventType, MemoryAuditLogger};
use dbguard::config::GuardConfig;
use dbguard::governor::{BoxError, ExecutionResult, Governor, OperationExecutor, OperationRequest};
use dbguard::ratelimit::OperationClass;
use dbguard::sanitize::sanitize_string;
use dbguard::timeout::DeadlineScope;

/// Raw failures the simulated executor draws from.
const SIMULATED_FAILURES: &[&str] = &[
    "dial tcp 10.0.4.17:5432: connect: connection refused",
    "pq: duplicate key value violates unique constraint \"users_email_key\"",
    "Error 1045: Access denied for user 'app'@'172.16.0.9' (using password: YES)",
    "server is busy, temporary failure in name resolution",
    "syntax error at or near \"FORM\" in SELECT id FORM users",
    "fatal: out of memory while executing query",
];

#[derive(Parser)]
#[command(name = "dbguard", version, about = "Database operation governance")]
struct Cli {
    /// Configuration file (YAML); DBGUARD_* environment variables override it
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the effective configuration
    ShowConfig,
    /// Print the client-safe form of a raw error message
    Sanitize {
        message: String,
    },
    /// Drive randomized operations through the governor
    Simulate {
        /// Number of operations to issue concurrently
        #[arg(long, default_value_t = 200)]
        ops: usize,

        /// Operation class: query, write or admin
        #[arg(long, default_value_t = OperationClass::Query)]
        class: OperationClass,

        /// Fraction of operations that fail, between 0 and 1
        #[arg(long, default_value_t = 0.1)]
        failure_rate: f64,

        /// Upper bound of the simulated execution latency
        #[arg(long, default_value_t = 50)]
        max_latency_ms: u64,
    },
}

/// Executor that sleeps for a random latency and fails at a fixed rate.
struct SimulatedExecutor {
    failure_rate: f64,
    max_latency: Duration,
}

#[async_trait]
impl OperationExecutor for SimulatedExecutor {
    async fn execute(
        &self,
        _scope: &DeadlineScope,
        _request: &OperationRequest,
    ) -> Result<ExecutionResult, BoxError> {
        let (latency, failure, rows) = {
            let mut rng = rand::thread_rng();
            let max_ms = u64::try_from(self.max_latency.as_millis()).unwrap_or(u64::MAX);
            let latency = Duration::from_millis(rng.gen_range(0..=max_ms));
            let failure = if rng.gen_bool(self.failure_rate) {
                Some(SIMULATED_FAILURES[rng.gen_range(0..SIMULATED_FAILURES.len())])
            } else {
                None
            };
            (latency, failure, rng.gen_range(0..100))
        };

        tokio::time::sleep(latency).await;
        match failure {
            Some(message) => Err(message.into()),
            None => Ok(ExecutionResult {
                rows_affected: rows,
            }),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let config = GuardConfig::load(cli.config.as_deref())?;

    match cli.command {
        Command::ShowConfig => {
            print!("{}", serde_yaml::to_string(&config)?);
        }
        Command::Sanitize { message } => {
            let sanitized = sanitize_string(&message);
            println!(
                "{}",
                serde_json::to_string_pretty(&sanitized.client_response())?
            );
        }
        Command::Simulate {
            ops,
            class,
            failure_rate,
            max_latency_ms,
        } => {
            if !(0.0..=1.0).contains(&failure_rate) {
                anyhow::bail!("failure rate must be between 0 and 1, got {}", failure_rate);
            }
            simulate(&config, ops, class, failure_rate, Duration::from_millis(max_latency_ms))
                .await?;
        }
    }

    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn simulate(
    config: &GuardConfig,
    ops: usize,
    class: OperationClass,
    failure_rate: f64,
    max_latency: Duration,
) -> anyhow::Result<()> {
    info!(ops, class = %class, failure_rate, "Starting simulation");

    let logger = Arc::new(MemoryAuditLogger::new());
    let governor = Governor::new(config, AuditContext::with_logger(logger.clone()));
    let executor = SimulatedExecutor {
        failure_rate,
        max_latency,
    };
    let root = DeadlineScope::background();

    let governor = &governor;
    let executor = &executor;
    let root = &root;
    let results = futures::future::join_all((0..ops).map(|i| async move {
        let request = OperationRequest::new(class)
            .with_user("simulator")
            .with_database("sim")
            .with_ip_address(format!("192.0.2.{}", i % 254 + 1));
        governor.execute(root, &request, executor).await
    }))
    .await;

    let succeeded = results.iter().filter(|r| r.is_ok()).count();
    let rate_limited = results
        .iter()
        .filter(|r| matches!(r, Err(rejection) if rejection.is_rate_limited()))
        .count();
    let failed = results.len() - succeeded - rate_limited;

    println!("operations:   {}", results.len());
    println!("succeeded:    {}", succeeded);
    println!("failed:       {}", failed);
    println!("rate limited: {}", rate_limited);
    println!("limiter:      {}", governor.rate_limiter().metrics());
    println!("audit events: {}", logger.len());
    for event_type in [
        EventType::Query,
        EventType::Write,
        EventType::Admin,
        EventType::Error,
        EventType::Security,
    ] {
        let count = logger.events_of_type(event_type).len();
        if count > 0 {
            println!("  {:<10}{}", event_type.as_str(), count);
        }
    }

    let sample = results
        .iter()
        .find(|r| matches!(r, Err(rejection) if !rejection.is_rate_limited()));
    if let Some(Err(rejection)) = sample {
        println!(
            "sample error: {}",
            serde_json::to_string(&rejection.client_response())?
        );
    }

    Ok(())
}
