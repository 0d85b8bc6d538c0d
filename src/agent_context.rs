//! `AgentContext` — a small `HashMap<String, String>` builder populating the
//! wire contract's `agentContext` field on `/connect`.

use std::collections::HashMap;

/// Free-form key/value context attached to a `connect` call (e.g. client
/// version, display name, platform). Sent verbatim, never interpreted
/// locally.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentContext(HashMap<String, String>);

impl AgentContext {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn into_map(self) -> HashMap<String, String> {
        self.0
    }

    pub fn as_map(&self) -> &HashMap<String, String> {
        &self.0
    }
}

impl From<HashMap<String, String>> for AgentContext {
    fn from(map: HashMap<String, String>) -> Self {
        Self(map)
    }
}
