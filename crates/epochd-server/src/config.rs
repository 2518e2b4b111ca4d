// ABOUTME: Configuration loading and validation for the epochd server.
// ABOUTME: Reads EPOCHD_* environment variables and refuses unsafe network exposure.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use epochd_core::{ClockAllocator, CounterAllocator, EpochAllocator};
use thiserror::Error;

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("EPOCHD_BIND is not a valid socket address: {0}")]
    InvalidBind(String),

    #[error("{name} is not a valid number: {value}")]
    InvalidNumber { name: &'static str, value: String },

    #[error("EPOCHD_ALLOCATOR must be \"clock\" or \"counter\", got {0:?}")]
    InvalidAllocator(String),

    #[error("EPOCHD_BIND {0} is not loopback but EPOCHD_ALLOW_REMOTE is not set")]
    RemoteBindNotAllowed(SocketAddr),

    #[error(
        "EPOCHD_ALLOW_REMOTE is true but EPOCHD_AUTH_TOKEN is not set; refusing to start without authentication"
    )]
    RemoteWithoutToken,
}

/// Which epoch allocator backs snapshot creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocatorKind {
    /// Hybrid logical clock, monotonic across restarts.
    Clock,
    /// Plain counter seeded from recovered high-water marks.
    Counter,
}

impl AllocatorKind {
    pub fn build(self) -> Arc<dyn EpochAllocator> {
        match self {
            AllocatorKind::Clock => Arc::new(ClockAllocator::new()),
            AllocatorKind::Counter => Arc::new(CounterAllocator::new()),
        }
    }
}

impl FromStr for AllocatorKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "clock" | "hlc" => Ok(AllocatorKind::Clock),
            "counter" => Ok(AllocatorKind::Counter),
            _ => Err(ConfigError::InvalidAllocator(s.to_string())),
        }
    }
}

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct EpochdConfig {
    pub home: PathBuf,
    pub bind: SocketAddr,
    pub allow_remote: bool,
    pub auth_token: Option<String>,
    pub op_timeout: Duration,
    pub checkpoint_every: u64,
    pub checkpoints_kept: usize,
    pub allocator: AllocatorKind,
}

fn env_number<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::InvalidNumber { name, value }),
        _ => Ok(default),
    }
}

impl EpochdConfig {
    /// Load configuration from environment variables with sensible defaults.
    ///
    /// Environment variables:
    /// - EPOCHD_HOME: data directory (default: ~/.epochd)
    /// - EPOCHD_BIND: socket address to bind (default: 127.0.0.1:7441)
    /// - EPOCHD_ALLOW_REMOTE: allow non-loopback binds (default: false)
    /// - EPOCHD_AUTH_TOKEN: bearer token for API auth (optional)
    /// - EPOCHD_OP_TIMEOUT_MS: per-operation timeout (default: 10000)
    /// - EPOCHD_CHECKPOINT_EVERY: registry events between checkpoints (default: 256)
    /// - EPOCHD_CHECKPOINTS_KEPT: checkpoints retained per container (default: 2)
    /// - EPOCHD_ALLOCATOR: clock | counter (default: clock)
    pub fn from_env() -> Result<Self, ConfigError> {
        let home = std::env::var("EPOCHD_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                std::env::var("HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| PathBuf::from("/tmp"))
                    .join(".epochd")
            });

        let bind_str =
            std::env::var("EPOCHD_BIND").unwrap_or_else(|_| "127.0.0.1:7441".to_string());
        let bind: SocketAddr = bind_str
            .parse()
            .map_err(|_| ConfigError::InvalidBind(bind_str))?;

        let allow_remote = std::env::var("EPOCHD_ALLOW_REMOTE")
            .map(|v| v == "true" || v == "1" || v == "yes")
            .unwrap_or(false);

        let auth_token = std::env::var("EPOCHD_AUTH_TOKEN")
            .ok()
            .filter(|t| !t.is_empty());

        let op_timeout = Duration::from_millis(env_number("EPOCHD_OP_TIMEOUT_MS", 10_000u64)?);
        let checkpoint_every = env_number("EPOCHD_CHECKPOINT_EVERY", 256u64)?.max(1);
        let checkpoints_kept = env_number("EPOCHD_CHECKPOINTS_KEPT", 2usize)?.max(1);

        let allocator = match std::env::var("EPOCHD_ALLOCATOR") {
            Ok(v) if !v.trim().is_empty() => v.parse()?,
            _ => AllocatorKind::Clock,
        };

        let config = Self {
            home,
            bind,
            allow_remote,
            auth_token,
            op_timeout,
            checkpoint_every,
            checkpoints_kept,
            allocator,
        };
        config.validate()?;
        Ok(config)
    }

    /// Enforce the network exposure rules. Re-run after CLI overrides.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.bind.ip().is_loopback() && !self.allow_remote {
            return Err(ConfigError::RemoteBindNotAllowed(self.bind));
        }
        if self.allow_remote && self.auth_token.is_none() {
            return Err(ConfigError::RemoteWithoutToken);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Environment variables are process-wide; serialize the tests that touch them.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    const VARS: &[&str] = &[
        "EPOCHD_HOME",
        "EPOCHD_BIND",
        "EPOCHD_ALLOW_REMOTE",
        "EPOCHD_AUTH_TOKEN",
        "EPOCHD_OP_TIMEOUT_MS",
        "EPOCHD_CHECKPOINT_EVERY",
        "EPOCHD_CHECKPOINTS_KEPT",
        "EPOCHD_ALLOCATOR",
    ];

    fn clear_env() {
        for var in VARS {
            // SAFETY: callers hold ENV_LOCK
            unsafe { std::env::remove_var(var) };
        }
    }

    #[test]
    fn config_loads_defaults() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();

        let config = EpochdConfig::from_env().unwrap();

        assert_eq!(config.bind, "127.0.0.1:7441".parse::<SocketAddr>().unwrap());
        assert!(!config.allow_remote);
        assert!(config.auth_token.is_none());
        assert_eq!(config.op_timeout, Duration::from_secs(10));
        assert_eq!(config.checkpoint_every, 256);
        assert_eq!(config.checkpoints_kept, 2);
        assert_eq!(config.allocator, AllocatorKind::Clock);
        assert!(config.home.to_string_lossy().contains(".epochd"));
    }

    #[test]
    fn config_reads_overrides() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        // SAFETY: ENV_LOCK held
        unsafe {
            std::env::set_var("EPOCHD_HOME", "/var/lib/epochd");
            std::env::set_var("EPOCHD_OP_TIMEOUT_MS", "250");
            std::env::set_var("EPOCHD_CHECKPOINT_EVERY", "16");
            std::env::set_var("EPOCHD_ALLOCATOR", "counter");
        }

        let config = EpochdConfig::from_env();
        clear_env();
        let config = config.unwrap();

        assert_eq!(config.home, PathBuf::from("/var/lib/epochd"));
        assert_eq!(config.op_timeout, Duration::from_millis(250));
        assert_eq!(config.checkpoint_every, 16);
        assert_eq!(config.allocator, AllocatorKind::Counter);
    }

    #[test]
    fn config_rejects_bad_numbers() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        // SAFETY: ENV_LOCK held
        unsafe { std::env::set_var("EPOCHD_OP_TIMEOUT_MS", "soon") };

        let result = EpochdConfig::from_env();
        clear_env();

        assert!(matches!(
            result,
            Err(ConfigError::InvalidNumber {
                name: "EPOCHD_OP_TIMEOUT_MS",
                ..
            })
        ));
    }

    #[test]
    fn config_rejects_remote_without_token() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        // SAFETY: ENV_LOCK held
        unsafe {
            std::env::set_var("EPOCHD_BIND", "0.0.0.0:7441");
            std::env::set_var("EPOCHD_ALLOW_REMOTE", "true");
        }

        let result = EpochdConfig::from_env();
        clear_env();

        let err = result.unwrap_err();
        assert!(
            err.to_string().contains("EPOCHD_AUTH_TOKEN"),
            "error should mention auth token: {}",
            err
        );
    }

    #[test]
    fn config_rejects_public_bind_without_opt_in() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        // SAFETY: ENV_LOCK held
        unsafe { std::env::set_var("EPOCHD_BIND", "0.0.0.0:7441") };

        let result = EpochdConfig::from_env();
        clear_env();

        assert!(matches!(result, Err(ConfigError::RemoteBindNotAllowed(_))));
    }

    #[test]
    fn allocator_kind_parses() {
        assert_eq!("Clock".parse::<AllocatorKind>().unwrap(), AllocatorKind::Clock);
        assert_eq!("hlc".parse::<AllocatorKind>().unwrap(), AllocatorKind::Clock);
        assert_eq!(
            "counter".parse::<AllocatorKind>().unwrap(),
            AllocatorKind::Counter
        );
        assert!("random".parse::<AllocatorKind>().is_err());
    }
}
