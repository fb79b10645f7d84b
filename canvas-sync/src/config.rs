use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::energy::DEFAULT_MAX_ITERATIONS;
use crate::error::{Error, Result};
use crate::history::DEFAULT_HISTORY_LIMIT;
use crate::merge::TieBreakPolicy;

pub const ENV_ENDPOINT: &str = "CANVAS_SYNC_ENDPOINT";
pub const ENV_ACK_TIMEOUT_MS: &str = "CANVAS_SYNC_ACK_TIMEOUT_MS";
pub const ENV_CLIENT_ID: &str = "CANVAS_SYNC_CLIENT_ID";

pub const DEFAULT_ACK_TIMEOUT_MS: u64 = 4000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DeliveryConfig {
    /// Base URL of the connection endpoint, e.g. `ws://localhost:8787/sync`.
    pub endpoint: String,
    /// Budget per attempt, measured from the moment the attempt starts.
    pub ack_timeout_ms: u64,
    /// Identifies this process on every connection it opens.
    pub client_id: String,
    /// Inbound frames buffered per connection.
    pub channel_capacity: usize,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            endpoint: "ws://127.0.0.1:8787/sync".to_string(),
            ack_timeout_ms: DEFAULT_ACK_TIMEOUT_MS,
            client_id: Uuid::new_v4().to_string(),
            channel_capacity: 256,
        }
    }
}

impl DeliveryConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        serde_json::from_str(&text).map_err(|e| Error::Config(format!("{}: {e}", path.display())))
    }

    /// Applies `CANVAS_SYNC_*` environment overrides.
    pub fn with_env(self) -> Result<Self> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(endpoint) = lookup(ENV_ENDPOINT) {
            self.endpoint = endpoint;
        }
        if let Some(raw) = lookup(ENV_ACK_TIMEOUT_MS) {
            self.ack_timeout_ms = raw
                .trim()
                .parse()
                .map_err(|_| Error::Config(format!("{ENV_ACK_TIMEOUT_MS}: not a number: {raw}")))?;
        }
        if let Some(client_id) = lookup(ENV_CLIENT_ID) {
            self.client_id = client_id;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.ack_timeout_ms == 0 {
            return Err(Error::Config("ackTimeoutMs must be positive".into()));
        }
        if self.client_id.is_empty() {
            return Err(Error::Config("clientId must not be empty".into()));
        }
        if self.channel_capacity == 0 {
            return Err(Error::Config("channelCapacity must be positive".into()));
        }
        Ok(())
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ReplicaConfig {
    pub history_limit: usize,
    pub max_solver_iterations: usize,
    pub tie_break: TieBreakPolicy,
}

impl Default for ReplicaConfig {
    fn default() -> Self {
        Self {
            history_limit: DEFAULT_HISTORY_LIMIT,
            max_solver_iterations: DEFAULT_MAX_ITERATIONS,
            tie_break: TieBreakPolicy::default(),
        }
    }
}
