use crate::error::AppError;
use dotenvy::dotenv;
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Where conversations, messages and receipts are stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Postgres,
    /// Process-local maps; state is lost on restart.
    Memory,
}

impl FromStr for StorageBackend {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(Self::Postgres),
            "memory" => Ok(Self::Memory),
            other => Err(AppError::Config(format!(
                "STORAGE_BACKEND must be postgres or memory, got {other}"
            ))),
        }
    }
}

/// PostgreSQL pool settings.
#[derive(Clone)]
pub struct DbConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_secs: u64,
    pub idle_timeout_secs: u64,
    pub max_lifetime_secs: u64,
}

impl fmt::Debug for DbConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbConfig")
            .field("database_url", &"[REDACTED]")
            .field("max_connections", &self.max_connections)
            .field("min_connections", &self.min_connections)
            .field("acquire_timeout_secs", &self.acquire_timeout_secs)
            .field("idle_timeout_secs", &self.idle_timeout_secs)
            .field("max_lifetime_secs", &self.max_lifetime_secs)
            .finish()
    }
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            database_url: String::new(),
            max_connections: 10,
            min_connections: 1,
            acquire_timeout_secs: 10,
            idle_timeout_secs: 600,
            max_lifetime_secs: 1800,
        }
    }
}

impl DbConfig {
    pub fn log_config(&self) {
        tracing::info!(
            max_connections = self.max_connections,
            min_connections = self.min_connections,
            acquire_timeout_secs = self.acquire_timeout_secs,
            idle_timeout_secs = self.idle_timeout_secs,
            max_lifetime_secs = self.max_lifetime_secs,
            "database pool configuration"
        );
    }
}

/// Tunables for one live connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Outbound frames buffered before the session counts as slow.
    pub send_queue_capacity: usize,
    pub write_timeout: Duration,
    /// Idle read deadline; any pong resets it.
    pub pong_wait: Duration,
    pub ping_period: Duration,
    pub max_frame_bytes: usize,
    pub snapshot_history: i64,
    pub snapshot_write_timeout: Duration,
    pub dispatch_timeout: Duration,
    /// Inbound envelopes waiting for the dispatch worker.
    pub dispatch_queue_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            send_queue_capacity: 16,
            write_timeout: Duration::from_secs(10),
            pong_wait: Duration::from_secs(60),
            ping_period: Duration::from_secs(54),
            max_frame_bytes: 8 * 1024,
            snapshot_history: 50,
            snapshot_write_timeout: Duration::from_secs(5),
            dispatch_timeout: Duration::from_secs(5),
            dispatch_queue_capacity: 32,
        }
    }
}

impl SessionConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let defaults = Self::default();
        let cfg = Self {
            send_queue_capacity: parse_var(
                "WS_SEND_QUEUE_CAPACITY",
                defaults.send_queue_capacity,
            )?,
            write_timeout: secs_var("WS_WRITE_TIMEOUT_SECS", defaults.write_timeout)?,
            pong_wait: secs_var("WS_PONG_WAIT_SECS", defaults.pong_wait)?,
            ping_period: secs_var("WS_PING_PERIOD_SECS", defaults.ping_period)?,
            max_frame_bytes: parse_var("WS_MAX_FRAME_BYTES", defaults.max_frame_bytes)?,
            snapshot_history: parse_var("WS_SNAPSHOT_HISTORY", defaults.snapshot_history)?,
            snapshot_write_timeout: secs_var(
                "WS_SNAPSHOT_WRITE_TIMEOUT_SECS",
                defaults.snapshot_write_timeout,
            )?,
            dispatch_timeout: secs_var("WS_DISPATCH_TIMEOUT_SECS", defaults.dispatch_timeout)?,
            dispatch_queue_capacity: parse_var(
                "WS_DISPATCH_QUEUE_CAPACITY",
                defaults.dispatch_queue_capacity,
            )?,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.ping_period >= self.pong_wait {
            return Err(AppError::Config(
                "WS_PING_PERIOD_SECS must be shorter than WS_PONG_WAIT_SECS".into(),
            ));
        }
        if self.send_queue_capacity == 0 || self.dispatch_queue_capacity == 0 {
            return Err(AppError::Config("queue capacities must be positive".into()));
        }
        if self.snapshot_history <= 0 {
            return Err(AppError::Config("WS_SNAPSHOT_HISTORY must be positive".into()));
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct Config {
    pub port: u16,
    pub storage: StorageBackend,
    pub db: DbConfig,
    pub jwt_secret: String,
    pub session: SessionConfig,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("port", &self.port)
            .field("storage", &self.storage)
            .field("db", &self.db)
            .field("jwt_secret", &"[REDACTED]")
            .field("session", &self.session)
            .finish()
    }
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        dotenv().ok();

        let port = parse_var("PORT", 8080u16)?;
        let storage = match env::var("STORAGE_BACKEND") {
            Ok(v) => v.parse()?,
            Err(_) => StorageBackend::Postgres,
        };

        let database_url = env::var("DATABASE_URL").unwrap_or_default();
        if storage == StorageBackend::Postgres && database_url.is_empty() {
            return Err(AppError::Config("DATABASE_URL missing".into()));
        }
        let db_defaults = DbConfig::default();
        let db = DbConfig {
            database_url,
            max_connections: parse_var("DB_MAX_CONNECTIONS", db_defaults.max_connections)?,
            min_connections: parse_var("DB_MIN_CONNECTIONS", db_defaults.min_connections)?,
            acquire_timeout_secs: parse_var(
                "DB_ACQUIRE_TIMEOUT_SECS",
                db_defaults.acquire_timeout_secs,
            )?,
            idle_timeout_secs: parse_var("DB_IDLE_TIMEOUT_SECS", db_defaults.idle_timeout_secs)?,
            max_lifetime_secs: parse_var("DB_MAX_LIFETIME_SECS", db_defaults.max_lifetime_secs)?,
        };

        let jwt_secret = env::var("JWT_SECRET")
            .map_err(|_| AppError::Config("JWT_SECRET missing".into()))?;
        if jwt_secret.trim().is_empty() {
            return Err(AppError::Config("JWT_SECRET must not be empty".into()));
        }

        Ok(Self {
            port,
            storage,
            db,
            jwt_secret,
            session: SessionConfig::from_env()?,
        })
    }

    #[cfg(test)]
    pub fn test_defaults() -> Self {
        Self {
            port: 0,
            storage: StorageBackend::Memory,
            db: DbConfig::default(),
            jwt_secret: "test-secret".into(),
            session: SessionConfig::default(),
        }
    }
}

fn parse_var<T: FromStr>(key: &str, default: T) -> Result<T, AppError> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| AppError::Config(format!("{key} has invalid value {raw:?}"))),
        Err(_) => Ok(default),
    }
}

fn secs_var(key: &str, default: Duration) -> Result<Duration, AppError> {
    parse_var(key, default.as_secs()).map(Duration::from_secs)
}
