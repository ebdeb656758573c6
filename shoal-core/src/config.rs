//! Centralized configuration for Shoal.
//!
//! All tunable parameters live here so the rest of the codebase never
//! hard-codes timeouts or pool sizes.

use std::path::PathBuf;
use std::time::Duration;

/// Central configuration for index and peer components.
#[derive(Debug, Clone, Default)]
pub struct ShoalConfig {
    pub network: NetworkConfig,
    pub storage: StorageConfig,
    pub swarm: SwarmConfig,
}

/// HTTP client and liveness-probe settings.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// General RPC request timeout
    pub request_timeout: Duration,
    /// Deadline for fuzzy search calls
    pub search_timeout: Duration,
    /// Interval between peer health probes
    pub health_interval: Duration,
    /// User agent for HTTP requests
    pub user_agent: &'static str,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            search_timeout: Duration::from_secs(5),
            health_interval: Duration::from_secs(5),
            user_agent: "shoal/0.1.0",
        }
    }
}

/// On-disk layout roots.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Directory under which a peer creates its `downloads_<port>` tree
    pub base_dir: PathBuf,
    /// Where the index keeps descriptor files
    pub index_torrents_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("."),
            index_torrents_dir: PathBuf::from("./torrents"),
        }
    }
}

/// Swarm-shape parameters.
#[derive(Debug, Clone)]
pub struct SwarmConfig {
    /// Contributors instructed to pre-seed each new upload (R)
    pub replication_factor: usize,
    /// Contributor pool cap (5R)
    pub max_contributors: usize,
    /// Download workers per active download (W)
    pub worker_count: usize,
    /// Assembler receive timeout between in-order writes
    pub assembler_poll: Duration,
}

impl Default for SwarmConfig {
    fn default() -> Self {
        let replication_factor = 3;
        Self {
            replication_factor,
            max_contributors: 5 * replication_factor,
            worker_count: 4,
            assembler_poll: Duration::from_millis(10),
        }
    }
}

impl ShoalConfig {
    /// Creates configuration with environment variable overrides.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(timeout) = std::env::var("SHOAL_REQUEST_TIMEOUT")
            && let Ok(seconds) = timeout.parse::<u64>()
        {
            config.network.request_timeout = Duration::from_secs(seconds);
        }

        if let Ok(interval) = std::env::var("SHOAL_HEALTH_INTERVAL")
            && let Ok(seconds) = interval.parse::<u64>()
        {
            config.network.health_interval = Duration::from_secs(seconds);
        }

        if let Ok(workers) = std::env::var("SHOAL_WORKERS")
            && let Ok(count) = workers.parse::<usize>()
        {
            config.swarm.worker_count = count;
        }

        if let Ok(replication) = std::env::var("SHOAL_REPLICATION")
            && let Ok(factor) = replication.parse::<usize>()
        {
            config.swarm.replication_factor = factor;
            config.swarm.max_contributors = 5 * factor;
        }

        config
    }

    /// Configuration tuned for fast, deterministic tests.
    pub fn for_testing() -> Self {
        let mut config = Self::default();
        config.network.request_timeout = Duration::from_secs(2);
        config.network.search_timeout = Duration::from_secs(2);
        config.network.health_interval = Duration::from_millis(100);
        config.swarm.assembler_poll = Duration::from_millis(1);
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let config = ShoalConfig::default();

        assert_eq!(config.swarm.replication_factor, 3);
        assert_eq!(config.swarm.max_contributors, 15);
        assert_eq!(config.swarm.worker_count, 4);
        assert_eq!(config.network.health_interval, Duration::from_secs(5));
        assert_eq!(config.network.search_timeout, Duration::from_secs(5));
        assert_eq!(config.swarm.assembler_poll, Duration::from_millis(10));
    }

    #[test]
    fn env_overrides_apply() {
        unsafe {
            std::env::set_var("SHOAL_WORKERS", "8");
            std::env::set_var("SHOAL_REPLICATION", "2");
        }

        let config = ShoalConfig::from_env();
        assert_eq!(config.swarm.worker_count, 8);
        assert_eq!(config.swarm.replication_factor, 2);
        assert_eq!(config.swarm.max_contributors, 10);

        unsafe {
            std::env::remove_var("SHOAL_WORKERS");
            std::env::remove_var("SHOAL_REPLICATION");
        }
    }
}
