//! db-replica-pool - health-check and query tool.
//!
//! Opens a write endpoint and its read replicas the same way a service would,
//! then probes them or runs one statement through the routing facade.

use clap::Parser;
use db_replica_pool::builder::NamedParams;
use db_replica_pool::config::{Cli, Command};
use db_replica_pool::db::{Context, Database};
use db_replica_pool::error::{DbError, DbResult};
use db_replica_pool::mapper::SqlBuilder;
use db_replica_pool::models::{Row, Value};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
fn init_tracing(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    // Logs go to stderr; stdout carries command output.
    if cli.json_logs {
        subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        subscriber
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(&cli);

    info!("Starting db-replica-pool v{}", env!("CARGO_PKG_VERSION"));

    let db = Database::open(cli.pool.into_config()).await?;
    let result = run(&db, cli.command).await;
    let closed = db.manager().shutdown().await;

    if let Err(e) = &result {
        error!(error = %e, "Command failed");
    }
    result?;
    closed?;
    Ok(())
}

async fn run(db: &Database, command: Command) -> DbResult<()> {
    let mut ctx = Context::background();

    match command {
        Command::Ping => {
            let mut failed = 0;
            for (role, outcome) in db.manager().ping_all().await {
                match outcome {
                    Ok(()) => println!("{:<10} ok", role.to_string()),
                    Err(e) => {
                        failed += 1;
                        println!("{:<10} FAILED: {}", role.to_string(), e);
                    }
                }
            }
            if failed > 0 {
                return Err(DbError::connection(
                    format!("{} pool(s) failed the probe", failed),
                    "Check the endpoints reported as FAILED",
                ));
            }
        }
        Command::Query { sql, params } => {
            let params = parse_params(&params)?;
            let rows: Vec<Row> = SqlBuilder::new(db.clone())
                .raw_query(&mut ctx, &sql, &params)
                .await?;
            let json = serde_json::to_string_pretty(&rows)
                .map_err(|e| DbError::internal(format!("Failed to render rows: {}", e)))?;
            println!("{}", json);
        }
        Command::Exec { sql, params } => {
            let params = parse_params(&params)?;
            let result = SqlBuilder::new(db.clone())
                .raw_execute(&mut ctx, &sql, &params)
                .await?;
            println!("rows affected: {}", result.rows_affected);
            if let Some(id) = result.last_insert_id {
                println!("last insert id: {}", id);
            }
        }
    }
    Ok(())
}

/// Parse repeated `name=value` arguments.
fn parse_params(raw: &[String]) -> DbResult<NamedParams> {
    raw.iter().try_fold(NamedParams::new(), |params, pair| {
        let (name, value) = pair.split_once('=').ok_or_else(|| {
            DbError::invalid_input(format!("parameter '{}' must look like name=value", pair))
        })?;
        Ok(params.set(name.trim(), parse_value(value)))
    })
}

/// Best-effort typing of a command line value.
fn parse_value(raw: &str) -> Value {
    if raw.eq_ignore_ascii_case("null") {
        return Value::Null;
    }
    if let Ok(v) = raw.parse::<i64>() {
        return Value::Int(v);
    }
    if let Ok(v) = raw.parse::<f64>() {
        return Value::Float(v);
    }
    match raw {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => Value::String(raw.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use db_replica_pool::builder::named_query;

    #[test]
    fn test_parse_value() {
        assert_eq!(parse_value("42"), Value::Int(42));
        assert_eq!(parse_value("1.5"), Value::Float(1.5));
        assert_eq!(parse_value("NULL"), Value::Null);
        assert_eq!(parse_value("true"), Value::Bool(true));
        assert_eq!(parse_value("bob"), Value::from("bob"));
    }

    #[test]
    fn test_parse_params_feeds_templates() {
        let params = parse_params(&["id=3".to_string()]).unwrap();
        let query = named_query("SELECT * FROM t WHERE id = {{id}}", &params).unwrap();
        assert_eq!(query.sql, "SELECT * FROM t WHERE id = ?");
        assert_eq!(query.args, vec![Value::Int(3)]);
    }

    #[test]
    fn test_parse_params_rejects_missing_equals() {
        assert!(parse_params(&["id".to_string()]).is_err());
    }
}
