/// Flow context passed between node executions
///
/// Carries the business data of one run (which cluster, which file path...)
/// as a string-keyed map of JSON values, together with the run's
/// cancellation signal. One task owns a run, so the map is not locked.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum ContextError {
    #[error("flow context has no value for key {0}")]
    Missing(String),

    #[error("flow context value for key {key} has unexpected shape: {source}")]
    TypeMismatch {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("flow context value for key {key} is not serializable: {source}")]
    Unserializable {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Cancellation token plus the reason recorded by whoever fired it
#[derive(Debug, Clone, Default)]
pub struct CancelSignal {
    token: CancellationToken,
    reason: Arc<Mutex<Option<String>>>,
}

impl CancelSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire the signal. The first reason wins.
    pub fn cancel(&self, reason: &str) {
        if let Ok(mut slot) = self.reason.lock() {
            if slot.is_none() {
                *slot = Some(reason.to_string());
            }
        }
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn reason(&self) -> String {
        self.reason
            .lock()
            .ok()
            .and_then(|slot| slot.clone())
            .unwrap_or_else(|| "canceled".to_string())
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

/// Mutable side channel shared by the nodes of one run
#[derive(Debug, Default)]
pub struct FlowContext {
    data: BTreeMap<String, Value>,
    cancel: CancelSignal,
}

impl FlowContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_signal(cancel: CancelSignal) -> Self {
        Self {
            data: BTreeMap::new(),
            cancel,
        }
    }

    /// Rebuild the mapping from a persisted snapshot
    pub fn from_snapshot(snapshot: &str, cancel: CancelSignal) -> Result<Self, serde_json::Error> {
        let data = serde_json::from_str(snapshot)?;
        Ok(Self { data, cancel })
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    pub fn set(&mut self, key: &str, value: Value) {
        self.data.insert(key.to_string(), value);
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.data.remove(key)
    }

    /// Typed read of a value stored under `key`
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<T, ContextError> {
        let value = self
            .data
            .get(key)
            .ok_or_else(|| ContextError::Missing(key.to_string()))?;
        T::deserialize(value).map_err(|source| ContextError::TypeMismatch {
            key: key.to_string(),
            source,
        })
    }

    /// Typed write; the value is converted to JSON first
    pub fn insert<T: Serialize>(&mut self, key: &str, value: &T) -> Result<(), ContextError> {
        let value = serde_json::to_value(value).map_err(|source| ContextError::Unserializable {
            key: key.to_string(),
            source,
        })?;
        self.set(key, value);
        Ok(())
    }

    pub fn data(&self) -> &BTreeMap<String, Value> {
        &self.data
    }

    /// JSON snapshot of the mapping
    pub fn snapshot(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.data)
    }

    pub fn cancellation(&self) -> &CancellationToken {
        self.cancel.token()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub(crate) fn signal(&self) -> &CancelSignal {
        &self.cancel
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct ExportInfo {
        cluster_id: String,
        file_path: String,
    }

    #[test]
    fn typed_round_trip() {
        let mut ctx = FlowContext::new();
        let info = ExportInfo {
            cluster_id: "cluster-1".into(),
            file_path: "/tmp/export".into(),
        };
        ctx.insert("transport", &info).unwrap();
        assert_eq!(ctx.get_as::<ExportInfo>("transport").unwrap(), info);
    }

    #[test]
    fn typed_read_reports_missing_and_mismatch() {
        let mut ctx = FlowContext::new();
        ctx.set("count", json!("not a number"));

        assert!(matches!(
            ctx.get_as::<u32>("absent"),
            Err(ContextError::Missing(key)) if key == "absent"
        ));
        assert!(matches!(
            ctx.get_as::<u32>("count"),
            Err(ContextError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn snapshot_rehydrates_mapping() {
        let mut ctx = FlowContext::new();
        ctx.set("clusterId", json!("cluster-1"));
        ctx.set("replicas", json!(3));
        let snapshot = ctx.snapshot().unwrap();

        let restored = FlowContext::from_snapshot(&snapshot, CancelSignal::new()).unwrap();
        assert_eq!(restored.get("clusterId"), Some(&json!("cluster-1")));
        assert_eq!(restored.get("replicas"), Some(&json!(3)));
    }

    #[test]
    fn cancel_signal_keeps_first_reason() {
        let signal = CancelSignal::new();
        let ctx = FlowContext::with_signal(signal.clone());
        assert!(!ctx.is_cancelled());

        signal.cancel("operator request");
        signal.cancel("second");
        assert!(ctx.is_cancelled());
        assert_eq!(signal.reason(), "operator request");
    }
}
