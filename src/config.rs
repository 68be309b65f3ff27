//! Process configuration for the brokering cluster.
//!
//! Flags fall back to environment variables, then to the defaults below,
//! following the source bridge's own `argparse` + env-var fallback style
//! (`original_source/bridge.py`), generalized into a typed, validated
//! struct instead of loose globals.

use std::time::Duration;

use clap::Parser;

#[derive(Debug, Clone, Parser)]
#[command(name = "genbroker-server", about = "Distributed text-generation brokering cluster")]
pub struct Config {
    /// Address the HTTP API binds to.
    #[arg(long, env = "BROKER_BIND_ADDR", default_value = "0.0.0.0:5001")]
    pub bind_addr: String,

    /// Directory snapshot files (`users.json`, `usage.json`, `contributions.json`) are written to.
    #[arg(long, env = "BROKER_DATA_DIR", default_value = ".")]
    pub data_dir: String,

    /// How often the persistence loop rewrites the snapshot files, in seconds.
    #[arg(long, env = "BROKER_SNAPSHOT_INTERVAL_SECS", default_value_t = 10)]
    pub snapshot_interval_secs: u64,

    /// How often the stale-entry sweeper runs over the prompt/generation indices, in seconds.
    #[arg(long, env = "BROKER_SWEEP_INTERVAL_SECS", default_value_t = 30)]
    pub sweep_interval_secs: u64,

    /// Seconds since a worker's last check-in before it is considered stale.
    #[arg(long, env = "BROKER_STALE_WORKER_SECS", default_value_t = 300)]
    pub stale_worker_secs: u64,

    /// Seconds since a prompt's last activity before it is considered stale.
    #[arg(long, env = "BROKER_STALE_PROMPT_SECS", default_value_t = 600)]
    pub stale_prompt_secs: u64,

    /// Maximum number of non-completed prompts a single user may have in flight.
    #[arg(long, env = "BROKER_MAX_PARALLEL_PROMPTS", default_value_t = 3)]
    pub max_parallel_prompts: usize,
}

impl Config {
    pub fn stale_worker(&self) -> Duration {
        Duration::from_secs(self.stale_worker_secs)
    }

    pub fn stale_prompt(&self) -> Duration {
        Duration::from_secs(self.stale_prompt_secs)
    }

    pub fn snapshot_interval(&self) -> Duration {
        Duration::from_secs(self.snapshot_interval_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bind_addr: "0.0.0.0:5001".to_string(),
            data_dir: ".".to_string(),
            snapshot_interval_secs: 10,
            sweep_interval_secs: 30,
            stale_worker_secs: 300,
            stale_prompt_secs: 600,
            max_parallel_prompts: 3,
        }
    }
}
