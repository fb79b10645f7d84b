use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::state::CanvasState;

/// Full session state as served when a replica joins.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub id: String,
    pub version: u64,
    pub state: CanvasState,
}

/// Where initial session state comes from (an HTTP endpoint, a file, a fixture).
#[async_trait]
pub trait SessionSource: Send + Sync {
    async fn fetch(&self, session_id: &str, credential: Option<&str>) -> Result<SessionSnapshot>;
}

/// Serves snapshots out of memory; unknown sessions come back empty.
#[derive(Debug, Default, Clone)]
pub struct StaticSource {
    snapshots: std::collections::HashMap<String, SessionSnapshot>,
}

impl StaticSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, snapshot: SessionSnapshot) -> Self {
        self.snapshots.insert(snapshot.id.clone(), snapshot);
        self
    }
}

#[async_trait]
impl SessionSource for StaticSource {
    async fn fetch(&self, session_id: &str, _credential: Option<&str>) -> Result<SessionSnapshot> {
        Ok(self.snapshots.get(session_id).cloned().unwrap_or_else(|| SessionSnapshot {
            id: session_id.to_string(),
            ..Default::default()
        }))
    }
}
