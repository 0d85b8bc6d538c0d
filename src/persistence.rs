//! Session persistence: `(channelId, agentName) →
//! {sessionId, globalOffset, localOffset, connectionTime, lastUsed}`,
//! written atomically (write-tmp + rename), read racing writes safely.
//!
//! Storage root defaults to `dirs::data_local_dir()/messaging-agent`,
//! mirroring `receiver::main`'s `dirs::data_local_dir().join("rusty-timer")`
//! pattern; a constructor parameter overrides it for tests, the way the
//! source project's `Journal::open(path)` takes an explicit path.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Snapshots older than this are discarded on read.
pub const SNAPSHOT_TTL_MS: i64 = 24 * 60 * 60 * 1000;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub global_offset: i64,
    pub local_offset: i64,
    pub connection_time: i64,
    pub last_used: i64,
}

impl SessionSnapshot {
    /// A snapshot is self-consistent when both offsets are present (they're
    /// always present in this representation — absence is modeled by the
    /// entry simply not existing in the map) and `last_used >=
    /// connection_time`.
    fn is_consistent(&self) -> bool {
        self.global_offset >= 0 && self.local_offset >= 0 && self.last_used >= self.connection_time
    }

    fn is_expired(&self, now_ms: i64) -> bool {
        now_ms.saturating_sub(self.last_used) > SNAPSHOT_TTL_MS
    }
}

fn store_key(channel_id: &str, agent_name: &str) -> String {
    format!("{channel_id}::{agent_name}")
}

/// File-backed store for session snapshots keyed by `(channelId,
/// agentName)`.
#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    /// `dirs::data_local_dir()/messaging-agent/sessions.json`, falling back
    /// to `./messaging-agent/sessions.json` if the platform data dir is
    /// unavailable.
    pub fn default_path() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("messaging-agent")
            .join("sessions.json")
    }

    pub fn open(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn open_default() -> Self {
        Self::open(Self::default_path())
    }

    /// Load the snapshot for `(channel_id, agent_name)`, discarding and
    /// returning `None` if it's missing, malformed, inconsistent, or past
    /// its TTL relative to `now_ms`.
    pub fn load(&self, channel_id: &str, agent_name: &str, now_ms: i64) -> Option<SessionSnapshot> {
        let all = self.read_all().ok()?;
        let snapshot = all.get(&store_key(channel_id, agent_name))?.clone();
        if snapshot.is_consistent() && !snapshot.is_expired(now_ms) {
            Some(snapshot)
        } else {
            None
        }
    }

    /// Atomically persist `snapshot` for `(channel_id, agent_name)`
    /// (write-tmp + rename).
    pub fn save(
        &self,
        channel_id: &str,
        agent_name: &str,
        snapshot: SessionSnapshot,
    ) -> std::io::Result<()> {
        let mut all = self.read_all().unwrap_or_default();
        all.insert(store_key(channel_id, agent_name), snapshot);
        self.write_all(&all)
    }

    pub fn remove(&self, channel_id: &str, agent_name: &str) -> std::io::Result<()> {
        let mut all = self.read_all().unwrap_or_default();
        all.remove(&store_key(channel_id, agent_name));
        self.write_all(&all)
    }

    fn read_all(&self) -> std::io::Result<HashMap<String, SessionSnapshot>> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) => Ok(serde_json::from_str(&contents).unwrap_or_default()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(e),
        }
    }

    fn write_all(&self, all: &HashMap<String, SessionSnapshot>) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp_path = tmp_path_for(&self.path);
        let serialized = serde_json::to_string_pretty(all)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(&tmp_path, serialized)?;
        std::fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}
