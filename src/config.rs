//! Connection configuration for the write endpoint and its read replicas.
//!
//! `Config` is deserialized by whatever loader the host application uses (it maps
//! the `mysql` section of a config file) and is also assembled from CLI arguments
//! for the bundled binary.

use crate::error::{DbError, DbResult};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;
use url::Url;

/// Default connection lifetime applied when `max_lifetime` is 0.
pub const DEFAULT_MAX_LIFETIME_SECS: u64 = 600;

/// Default keepalive interval (3h) applied when `keepalive` is 0.
pub const DEFAULT_KEEPALIVE_SECS: u64 = 3 * 60 * 60;

// Pool configuration defaults
pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;
pub const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 30;

/// Fixed driver options appended to every MySQL DSN.
pub const DSN_OPTIONS: &str = "charset=utf8mb4&parseTime=true&loc=Local&multiStatements=true";

/// Database driver behind every pool of a manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Driver {
    #[default]
    #[value(name = "mysql")]
    MySql,
    /// File-backed SQLite; `Source::host` is the database path.
    Sqlite,
}

impl std::fmt::Display for Driver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MySql => write!(f, "mysql"),
            Self::Sqlite => write!(f, "sqlite"),
        }
    }
}

/// One database endpoint.
#[derive(Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Source {
    /// `ip:port` for MySQL, file path for SQLite.
    pub host: String,
    #[serde(rename = "user", default)]
    pub username: String,
    #[serde(rename = "pass", default)]
    pub password: String,
}

impl Source {
    pub fn new(
        host: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            username: username.into(),
            password: password.into(),
        }
    }
}

// Never print the password.
impl std::fmt::Debug for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Source")
            .field("host", &self.host)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "host:{} user:{}", self.host, self.username)
    }
}

/// Parses `user:pass@host`, `user@host` or a bare host/path.
///
/// The credentials are split at the last `@` so passwords may contain `@`.
impl FromStr for Source {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err("source cannot be empty".to_string());
        }
        let Some((credentials, host)) = s.rsplit_once('@') else {
            return Ok(Source::new(s, "", ""));
        };
        if host.is_empty() {
            return Err(format!("missing host in source '{}'", s));
        }
        let (username, password) = credentials.split_once(':').unwrap_or((credentials, ""));
        Ok(Source::new(host, username, password))
    }
}

/// Pool configuration for one logical database and its replicas.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub driver: Driver,
    #[serde(rename = "wdb")]
    pub write: Source,
    /// Empty means "read from the write endpoint".
    #[serde(rename = "rdbs", default)]
    pub reads: Vec<Source>,
    #[serde(rename = "db_name", default)]
    pub database: String,
    /// 0 = driver default
    #[serde(rename = "max_open_conn", default)]
    pub max_open: u32,
    #[serde(rename = "max_idle_conn", default)]
    pub max_idle: u32,
    /// Seconds; 0 = 600
    #[serde(default)]
    pub max_lifetime: u64,
    /// Seconds; 0 = 3h
    #[serde(default)]
    pub keepalive: u64,
    /// Seconds; 0 = 30
    #[serde(default)]
    pub acquire_timeout: u64,
}

impl Config {
    /// Create a MySQL configuration with a single write endpoint.
    pub fn new(write: Source, database: impl Into<String>) -> Self {
        Self {
            driver: Driver::MySql,
            write,
            reads: Vec::new(),
            database: database.into(),
            max_open: 0,
            max_idle: 0,
            max_lifetime: 0,
            keepalive: 0,
            acquire_timeout: 0,
        }
    }

    pub fn with_driver(mut self, driver: Driver) -> Self {
        self.driver = driver;
        self
    }

    pub fn with_reads(mut self, reads: Vec<Source>) -> Self {
        self.reads = reads;
        self
    }

    pub fn with_pool_size(mut self, max_open: u32, max_idle: u32) -> Self {
        self.max_open = max_open;
        self.max_idle = max_idle;
        self
    }

    pub fn with_max_lifetime(mut self, secs: u64) -> Self {
        self.max_lifetime = secs;
        self
    }

    pub fn with_keepalive(mut self, secs: u64) -> Self {
        self.keepalive = secs;
        self
    }

    /// Apply defaults: lifetime 600s when unset, and the write endpoint as the
    /// only read endpoint when no replicas are configured.
    pub fn normalized(mut self) -> Self {
        if self.max_lifetime == 0 {
            self.max_lifetime = DEFAULT_MAX_LIFETIME_SECS;
        }
        if self.reads.is_empty() {
            self.reads = vec![self.write.clone()];
        }
        self
    }

    /// Validate source fields and pool limits.
    pub fn validate(&self) -> DbResult<()> {
        validate_source("write source", &self.write, self.driver)?;
        for (idx, source) in self.reads.iter().enumerate() {
            validate_source(&format!("read source {}", idx), source, self.driver)?;
        }
        if self.driver == Driver::MySql && self.database.trim().is_empty() {
            return Err(DbError::configuration("db_name cannot be empty"));
        }
        if self.max_open > 0 && self.max_idle > self.max_open {
            return Err(DbError::configuration(format!(
                "max_idle_conn ({}) cannot exceed max_open_conn ({})",
                self.max_idle, self.max_open
            )));
        }
        // An explicit keepalive that never fires before connections are recycled is a
        // misconfiguration. The implicit 3h default is only warned about at open.
        if self.keepalive > 0 && self.keepalive_outlives_lifetime() {
            return Err(DbError::configuration(format!(
                "keepalive ({}s) must be shorter than max_lifetime ({}s)",
                self.keepalive,
                self.max_lifetime_duration().as_secs()
            )));
        }
        Ok(())
    }

    /// Interval between keepalive probes.
    pub fn keepalive_interval(&self) -> Duration {
        keepalive_or_default(Duration::from_secs(self.keepalive))
    }

    pub fn max_lifetime_duration(&self) -> Duration {
        match self.max_lifetime {
            0 => Duration::from_secs(DEFAULT_MAX_LIFETIME_SECS),
            secs => Duration::from_secs(secs),
        }
    }

    pub fn acquire_timeout_duration(&self) -> Duration {
        match self.acquire_timeout {
            0 => Duration::from_secs(DEFAULT_ACQUIRE_TIMEOUT_SECS),
            secs => Duration::from_secs(secs),
        }
    }

    /// Maximum pool size, falling back to the default when unset.
    pub fn max_connections(&self) -> u32 {
        match self.max_open {
            0 => DEFAULT_MAX_CONNECTIONS,
            n => n,
        }
    }

    /// Connections kept open while idle (never more than the pool size).
    pub fn min_connections(&self) -> u32 {
        self.max_idle.min(self.max_connections())
    }

    /// True when pooled connections are recycled before a keepalive probe can fire.
    pub fn keepalive_outlives_lifetime(&self) -> bool {
        self.keepalive_interval() >= self.max_lifetime_duration()
    }

    /// Build the sqlx connection URL for a MySQL source.
    pub fn connect_url(&self, source: &Source) -> DbResult<String> {
        let mut url = Url::parse(&format!("mysql://{}/{}", source.host, self.database))
            .map_err(|e| {
                DbError::configuration(format!("Invalid host '{}': {}", source.host, e))
            })?;
        url.set_username(&source.username)
            .map_err(|_| DbError::configuration("Cannot set username on connection URL"))?;
        if !source.password.is_empty() {
            url.set_password(Some(&source.password))
                .map_err(|_| DbError::configuration("Cannot set password on connection URL"))?;
        }
        Ok(url.to_string())
    }

    /// Render the classic `user:pass@tcp(host)/db?...` DSN for a source.
    pub fn dsn(&self, source: &Source) -> String {
        format!(
            "{}:{}@tcp({})/{}?{}",
            source.username, source.password, source.host, self.database, DSN_OPTIONS
        )
    }

    /// Same as [`Config::dsn`] with the password masked, safe for logs.
    pub fn redacted_dsn(&self, source: &Source) -> String {
        format!(
            "{}:***@tcp({})/{}?{}",
            source.username, source.host, self.database, DSN_OPTIONS
        )
    }
}

impl std::fmt::Display for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{} config:", self.driver)?;
        writeln!(f, "wdb: {}", self.write)?;
        let reads: Vec<String> = self.reads.iter().map(ToString::to_string).collect();
        writeln!(f, "rdbs: [{}]", reads.join(", "))?;
        writeln!(f, "dbname: {}", self.database)?;
        writeln!(f, "max_open_conn: {}", self.max_open)?;
        writeln!(f, "max_idle_conn: {}", self.max_idle)?;
        writeln!(f, "max_lifetime: {}", self.max_lifetime)?;
        writeln!(f, "keepalive: {}", self.keepalive)
    }
}

/// Keepalive interval with the 3h default applied to a zero duration.
pub fn keepalive_or_default(interval: Duration) -> Duration {
    if interval.is_zero() {
        Duration::from_secs(DEFAULT_KEEPALIVE_SECS)
    } else {
        interval
    }
}

fn validate_source(label: &str, source: &Source, driver: Driver) -> DbResult<()> {
    if source.host.trim().is_empty() {
        return Err(DbError::configuration(format!("{}: host cannot be empty", label)));
    }
    if driver == Driver::MySql && source.username.trim().is_empty() {
        return Err(DbError::configuration(format!(
            "{}: user cannot be empty",
            label
        )));
    }
    Ok(())
}

// =============================================================================
// Command line
// =============================================================================

/// Command line interface for the bundled health-check / query tool.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "db-replica-pool",
    about = "Check and query a write endpoint and its read replicas",
    version,
    author
)]
pub struct Cli {
    #[command(flatten)]
    pub pool: PoolArgs,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "DB_LOG_LEVEL", global = true)]
    pub log_level: String,

    /// Enable JSON logging format
    #[arg(long, env = "DB_JSON_LOGS", global = true)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Pool settings accepted on the command line.
#[derive(Debug, Clone, Args)]
pub struct PoolArgs {
    /// Database driver
    #[arg(long, value_enum, default_value = "mysql", env = "DB_DRIVER")]
    pub driver: Driver,

    /// Write endpoint: "user:pass@host:port" (MySQL) or a file path (SQLite)
    #[arg(short = 'w', long = "write", value_name = "SOURCE", env = "DB_WRITE")]
    pub write: Source,

    /// Read endpoints, same format as --write. Repeat or comma-separate.
    #[arg(
        short = 'r',
        long = "read",
        value_name = "SOURCE",
        env = "DB_READS",
        value_delimiter = ','
    )]
    pub reads: Vec<Source>,

    /// Database name
    #[arg(short = 'd', long, default_value = "", env = "DB_NAME")]
    pub database: String,

    #[arg(long, default_value_t = 0, env = "DB_MAX_OPEN")]
    pub max_open: u32,

    #[arg(long, default_value_t = 0, env = "DB_MAX_IDLE")]
    pub max_idle: u32,

    /// Connection lifetime in seconds (0 = 600)
    #[arg(long, default_value_t = 0, env = "DB_MAX_LIFETIME")]
    pub max_lifetime: u64,

    /// Keepalive interval in seconds (0 = 3h)
    #[arg(long, default_value_t = 0, env = "DB_KEEPALIVE")]
    pub keepalive: u64,
}

impl PoolArgs {
    pub fn into_config(self) -> Config {
        Config {
            driver: self.driver,
            write: self.write,
            reads: self.reads,
            database: self.database,
            max_open: self.max_open,
            max_idle: self.max_idle,
            max_lifetime: self.max_lifetime,
            keepalive: self.keepalive,
            acquire_timeout: 0,
        }
    }
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Probe every pool and report its status
    Ping,
    /// Run a read statement and print rows as JSON
    Query {
        /// SQL with {{name}} placeholders
        sql: String,
        /// Named parameter, "name=value". Repeatable.
        #[arg(short, long = "param", value_name = "NAME=VALUE")]
        params: Vec<String>,
    },
    /// Run a write statement and print the affected row count
    Exec {
        sql: String,
        #[arg(short, long = "param", value_name = "NAME=VALUE")]
        params: Vec<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mysql_config() -> Config {
        Config::new(Source::new("10.0.0.1:3306", "app", "secret"), "orders")
    }

    #[test]
    fn test_normalized_duplicates_write_into_reads() {
        let config = mysql_config().normalized();
        assert_eq!(config.reads.len(), 1);
        assert_eq!(config.reads[0], config.write);
        assert_eq!(config.max_lifetime, DEFAULT_MAX_LIFETIME_SECS);
    }

    #[test]
    fn test_normalized_keeps_configured_reads() {
        let reads = vec![
            Source::new("10.0.0.2:3306", "ro", "x"),
            Source::new("10.0.0.3:3306", "ro", "x"),
        ];
        let config = mysql_config()
            .with_reads(reads.clone())
            .with_max_lifetime(120)
            .normalized();
        assert_eq!(config.reads, reads);
        assert_eq!(config.max_lifetime, 120);
    }

    #[test]
    fn test_keepalive_default() {
        let config = mysql_config();
        assert_eq!(
            config.keepalive_interval(),
            Duration::from_secs(DEFAULT_KEEPALIVE_SECS)
        );
        assert_eq!(
            config.with_keepalive(60).keepalive_interval(),
            Duration::from_secs(60)
        );
    }

    #[test]
    fn test_validate_rejects_empty_host() {
        let config = Config::new(Source::new("", "app", "secret"), "orders");
        assert!(matches!(
            config.validate(),
            Err(DbError::Configuration { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_empty_read_host() {
        let config = mysql_config().with_reads(vec![Source::new(" ", "ro", "")]);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("read source 0"), "{}", err);
    }

    #[test]
    fn test_validate_requires_database_for_mysql() {
        let config = Config::new(Source::new("db:3306", "app", ""), "");
        assert!(config.validate().is_err());

        let sqlite = Config::new(Source::new("/tmp/app.db", "", ""), "")
            .with_driver(Driver::Sqlite);
        assert!(sqlite.validate().is_ok());
    }

    #[test]
    fn test_validate_idle_cannot_exceed_open() {
        let config = mysql_config().with_pool_size(5, 10);
        assert!(config.validate().is_err());
        assert!(mysql_config().with_pool_size(10, 5).validate().is_ok());
        // max_open = 0 means unlimited
        assert!(mysql_config().with_pool_size(0, 5).validate().is_ok());
    }

    #[test]
    fn test_explicit_keepalive_must_beat_lifetime() {
        let config = mysql_config().with_max_lifetime(600).with_keepalive(600);
        assert!(config.validate().is_err());

        let config = mysql_config().with_max_lifetime(600).with_keepalive(300);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_keepalive_tension_is_not_an_error() {
        let config = mysql_config();
        assert!(config.keepalive_outlives_lifetime());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_min_connections_capped_by_pool_size() {
        assert_eq!(mysql_config().with_pool_size(4, 8).min_connections(), 4);
        assert_eq!(mysql_config().with_pool_size(0, 3).min_connections(), 3);
        assert_eq!(mysql_config().max_connections(), DEFAULT_MAX_CONNECTIONS);
    }

    #[test]
    fn test_dsn_format() {
        let config = mysql_config();
        assert_eq!(
            config.dsn(&config.write),
            "app:secret@tcp(10.0.0.1:3306)/orders?charset=utf8mb4&parseTime=true&loc=Local&multiStatements=true"
        );
        let redacted = config.redacted_dsn(&config.write);
        assert!(!redacted.contains("secret"));
        assert!(redacted.starts_with("app:***@tcp(10.0.0.1:3306)/orders?"));
    }

    #[test]
    fn test_connect_url_escapes_password() {
        let config = Config::new(Source::new("db.local:3307", "app", "p@ss/word"), "orders");
        let url = config.connect_url(&config.write).unwrap();
        assert!(url.starts_with("mysql://app:"), "{}", url);
        assert!(url.ends_with("@db.local:3307/orders"), "{}", url);
        assert!(!url.contains("p@ss/word"), "{}", url);
    }

    #[test]
    fn test_source_from_str() {
        let source: Source = "app:secret@10.0.0.1:3306".parse().unwrap();
        assert_eq!(source, Source::new("10.0.0.1:3306", "app", "secret"));

        let source: Source = "app:p@ss@db:3306".parse().unwrap();
        assert_eq!(source.password, "p@ss");
        assert_eq!(source.host, "db:3306");

        let source: Source = "/var/lib/app.db".parse().unwrap();
        assert_eq!(source.host, "/var/lib/app.db");
        assert!(source.username.is_empty());

        assert!("".parse::<Source>().is_err());
        assert!("app:secret@".parse::<Source>().is_err());
    }

    #[test]
    fn test_source_debug_hides_password() {
        let source = Source::new("db:3306", "app", "hunter2");
        assert!(!format!("{:?}", source).contains("hunter2"));
        assert!(!source.to_string().contains("hunter2"));
    }

    #[test]
    fn test_deserialize_from_loader_keys() {
        let json = serde_json::json!({
            "wdb": { "host": "10.0.0.1:3306", "user": "app", "pass": "secret" },
            "rdbs": [{ "host": "10.0.0.2:3306", "user": "ro", "pass": "x" }],
            "db_name": "orders",
            "max_open_conn": 20,
            "max_idle_conn": 5,
            "max_lifetime": 300,
            "keepalive": 120
        });
        let config: Config = serde_json::from_value(json).unwrap();
        assert_eq!(config.driver, Driver::MySql);
        assert_eq!(config.write.username, "app");
        assert_eq!(config.reads.len(), 1);
        assert_eq!(config.database, "orders");
        assert_eq!(config.max_open, 20);
        assert_eq!(config.max_idle, 5);
        assert_eq!(config.keepalive_interval(), Duration::from_secs(120));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_cli_parses_repeated_reads() {
        let cli = Cli::try_parse_from([
            "db-replica-pool",
            "--write",
            "app:pw@10.0.0.1:3306",
            "--read",
            "ro:pw@10.0.0.2:3306,ro:pw@10.0.0.3:3306",
            "--database",
            "orders",
            "ping",
        ])
        .unwrap();
        let config = cli.pool.into_config();
        assert_eq!(config.reads.len(), 2);
        assert_eq!(config.reads[1].host, "10.0.0.3:3306");
        assert!(matches!(cli.command, Command::Ping));
    }
}
