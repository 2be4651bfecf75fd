//! sqlm - Main entry point.
//!
//! Opens a pool, runs one SQL statement inside a SERIALIZABLE transaction and
//! prints each resulting record as a JSON line.

use sqlm::config::Config;
use sqlm::models::{Value, redact_connection_string};
use sqlm::{CallContext, DbError, open_with, with_transaction};
use std::io::Write;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
///
/// Logs go to stderr so stdout carries only results.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        subscriber
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}

enum Output {
    Rows(Vec<sqlm::Record>),
    Exec(sqlm::models::ExecResult),
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse configuration from command line and environment
    let config = Config::parse_args();

    // Initialize logging
    init_tracing(&config);

    let driver = config.driver_name()?;
    let params: Vec<Value> = config.parse_params()?;

    info!(
        driver = %driver,
        url = %redact_connection_string(&config.database),
        "Starting sqlm v{}",
        env!("CARGO_PKG_VERSION")
    );

    let pool = open_with(&driver, &config.database, &config.pool_config()).await?;
    let ctx = CallContext::with_timeout(config.timeout_duration());

    // Ctrl-C cancels whatever statement is in flight.
    let canceler = ctx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            canceler.cancel();
        }
    });

    let sql = config.sql.clone();
    let exec = config.exec;
    let result = with_transaction(&ctx, &pool, move |ctx, tx| {
        Box::pin(async move {
            if exec {
                tx.exec(ctx, &sql, &params).await.map(Output::Exec)
            } else {
                let rows = tx.query(ctx, &sql, &params).await?;
                Ok(Output::Rows(rows.collect()))
            }
        })
    })
    .await;

    pool.close().await;

    match result {
        Ok(output) => {
            print_output(output)?;
            Ok(())
        }
        Err(e) => {
            report(&e);
            Err(e.into())
        }
    }
}

fn print_output(output: Output) -> Result<(), Box<dyn std::error::Error>> {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    match output {
        Output::Rows(rows) => {
            for row in rows {
                serde_json::to_writer(&mut out, &row)?;
                writeln!(out)?;
            }
        }
        Output::Exec(result) => {
            serde_json::to_writer(&mut out, &result)?;
            writeln!(out)?;
        }
    }
    Ok(())
}

fn report(err: &DbError) {
    error!(
        error = %err,
        sql_state = ?err.sql_state(),
        retryable = err.is_retryable(),
        "Statement failed"
    );
    if let Some(suggestion) = err.suggestion() {
        eprintln!("hint: {}", suggestion);
    }
}
