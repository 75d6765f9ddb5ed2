//! Bootstrap configuration types
//!
//! Configuration is resolved once from the process environment. Every
//! resolver takes an injectable lookup so several ranks can be simulated
//! inside one process without touching the real environment.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::info;

use crate::{Error, RankInfo, Result};

/// Overrides how the unique ID is exchanged when no store is supplied
pub const ENV_UNIQUEID_EXCHANGE_METHOD: &str = "TORCHCOMM_XCCL_BOOTSTRAP_UNIQUEID_EXCHANGE_METHOD";

/// Rendezvous host for the TCP store
pub const ENV_MASTER_ADDR: &str = "MASTER_ADDR";

/// Rendezvous port for the TCP store
pub const ENV_MASTER_PORT: &str = "MASTER_PORT";

/// Let the bootstrap pick the exchange method
pub const EXCHANGE_METHOD_AUTO: &str = "auto";

/// Exchange the unique ID through a TCP store
pub const EXCHANGE_METHOD_TCPSTORE: &str = "tcpstore";

/// Default exchange method
pub const EXCHANGE_METHOD_DEFAULT: &str = EXCHANGE_METHOD_AUTO;

/// Environment variable pairs consulted for rank and world size, in order
const RANK_ENV_PAIRS: &[(&str, &str)] = &[
    ("RANK", "WORLD_SIZE"),
    ("OMPI_COMM_WORLD_RANK", "OMPI_COMM_WORLD_SIZE"),
    ("PMI_RANK", "PMI_SIZE"),
];

/// Bootstrap configuration resolved from the environment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootstrapConfig {
    /// Rank and world size of this process
    pub rank_info: RankInfo,

    /// Lower-cased exchange method selector; validated only when used
    pub uniqueid_exchange_method: String,

    /// TCP rendezvous address, present only when both host and port are set
    pub rendezvous: Option<RendezvousAddress>,
}

impl BootstrapConfig {
    /// Create a configuration with the default exchange method and no rendezvous
    pub fn new(rank_info: RankInfo) -> Self {
        Self {
            rank_info,
            uniqueid_exchange_method: EXCHANGE_METHOD_DEFAULT.to_string(),
            rendezvous: None,
        }
    }

    /// Resolve the configuration from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolve the configuration through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let rank_info = resolve_rank_info(&lookup)?;

        let method = match lookup(ENV_UNIQUEID_EXCHANGE_METHOD) {
            Some(method) => method,
            None => {
                info!(
                    "{} not set, defaulting to {}",
                    ENV_UNIQUEID_EXCHANGE_METHOD, EXCHANGE_METHOD_DEFAULT
                );
                EXCHANGE_METHOD_DEFAULT.to_string()
            }
        };

        Ok(Self {
            rank_info,
            uniqueid_exchange_method: method.to_lowercase(),
            rendezvous: RendezvousAddress::from_lookup(&lookup),
        })
    }

    /// Override the exchange method selector
    pub fn with_exchange_method(mut self, method: impl AsRef<str>) -> Self {
        self.uniqueid_exchange_method = method.as_ref().to_lowercase();
        self
    }

    /// Set the TCP rendezvous address
    pub fn with_rendezvous(mut self, rendezvous: RendezvousAddress) -> Self {
        self.rendezvous = Some(rendezvous);
        self
    }
}

/// Resolve rank and world size from the first complete variable pair
fn resolve_rank_info<F>(lookup: &F) -> Result<RankInfo>
where
    F: Fn(&str) -> Option<String>,
{
    for (rank_var, size_var) in RANK_ENV_PAIRS {
        let (Some(rank), Some(size)) = (lookup(rank_var), lookup(size_var)) else {
            continue;
        };

        let rank = rank.trim().parse::<u32>().map_err(|e| Error::InvalidConfig {
            message: format!("{}='{}' is not a valid rank: {}", rank_var, rank, e),
        })?;
        let size = size.trim().parse::<u32>().map_err(|e| Error::InvalidConfig {
            message: format!("{}='{}' is not a valid world size: {}", size_var, size, e),
        })?;

        return RankInfo::new(rank, size);
    }

    Err(Error::InvalidConfig {
        message: "unable to determine rank and world size from the environment".to_string(),
    })
}

/// TCP rendezvous address taken from `MASTER_ADDR` and `MASTER_PORT`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RendezvousAddress {
    /// Host running the store server
    pub host: String,

    /// Port as given; parsed when the store is created
    pub port: String,
}

impl RendezvousAddress {
    /// Create a rendezvous address
    pub fn new(host: impl Into<String>, port: impl ToString) -> Self {
        Self {
            host: host.into(),
            port: port.to_string(),
        }
    }

    /// Read the address, returning `None` unless both variables are present
    pub fn from_lookup<F>(lookup: &F) -> Option<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        match (lookup(ENV_MASTER_ADDR), lookup(ENV_MASTER_PORT)) {
            (Some(host), Some(port)) => Some(Self { host, port }),
            _ => None,
        }
    }

    /// Parsed port number
    pub fn port_number(&self) -> Result<u16> {
        self.port.trim().parse().map_err(|e| Error::InvalidConfig {
            message: format!("{}='{}' is not a valid port: {}", ENV_MASTER_PORT, self.port, e),
        })
    }

    /// `host:port` form suitable for socket resolution
    pub fn to_socket_string(&self) -> Result<String> {
        Ok(format!("{}:{}", self.host, self.port_number()?))
    }
}

/// Coordination store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Timeout for blocking store operations
    #[serde(with = "duration_millis")]
    pub timeout: Duration,

    /// Number of async I/O threads backing a TCP store
    pub io_threads: usize,

    /// Maximum frame size in bytes
    pub max_message_size: usize,

    /// How long to wait for store tasks on shutdown
    #[serde(with = "duration_millis")]
    pub shutdown_timeout: Duration,

    /// Connection retry configuration
    pub retry: RetryConfig,
}

impl StoreConfig {
    /// Default config with a specific operation timeout
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            ..Self::default()
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(300),
            io_threads: 2,
            max_message_size: 16 * 1024 * 1024, // 16MB
            shutdown_timeout: Duration::from_secs(1),
            retry: RetryConfig::default(),
        }
    }
}

/// Retry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Initial delay before first retry
    #[serde(with = "duration_millis")]
    pub initial_delay: Duration,

    /// Maximum delay between retries
    #[serde(with = "duration_millis")]
    pub max_delay: Duration,

    /// Exponential backoff multiplier
    pub backoff_multiplier: f64,

    /// Add jitter to prevent thundering herd
    pub jitter: bool,
}

impl RetryConfig {
    /// Backoff delay before the given retry attempt (0-based), without jitter
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self.backoff_multiplier.max(1.0).powi(attempt.min(32) as i32);
        let millis = (self.initial_delay.as_millis() as f64 * factor)
            .min(self.max_delay.as_millis() as f64);
        Duration::from_millis(millis as u64)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_secs(1),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

/// Duration serialization helper using whole milliseconds
mod duration_millis {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
