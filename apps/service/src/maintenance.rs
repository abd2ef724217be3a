//! Maintenance windows: notification suppression spans managed outside the
//! core and read from the durable store. Malformed entries are dropped with
//! a warning rather than failing the cycle.

use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::store::KvStore;

/// Store key holding the maintenance-window list.
pub const MAINTENANCE_KEY: &str = "maintenance";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaintenanceWindow {
    pub id: Uuid,
    /// Target ids this window applies to. Empty = all targets.
    #[serde(default)]
    pub monitors: Vec<String>,
    /// Epoch seconds.
    pub start: i64,
    /// Absent = open-ended.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<i64>,
}

impl MaintenanceWindow {
    pub fn is_active(&self, now: i64) -> bool {
        self.start <= now && self.end.is_none_or(|end| now <= end)
    }

    pub fn covers(&self, target_id: &str) -> bool {
        self.monitors.is_empty() || self.monitors.iter().any(|id| id == target_id)
    }
}

/// True when any active window covers the target.
pub fn in_maintenance(windows: &[MaintenanceWindow], target_id: &str, now: i64) -> bool {
    windows.iter().any(|w| w.is_active(now) && w.covers(target_id))
}

/// Load the window list from the store. A missing or unreadable key yields
/// an empty list; individually malformed entries are skipped.
pub async fn load_maintenance_windows(store: &dyn KvStore) -> Vec<MaintenanceWindow> {
    let value = match store.get(MAINTENANCE_KEY).await {
        Ok(Some(value)) => value,
        Ok(None) => return Vec::new(),
        Err(e) => {
            warn!("Failed to read maintenance windows, assuming none: {e}");
            return Vec::new();
        }
    };

    let Some(entries) = value.as_array() else {
        warn!("Maintenance window list is not an array, ignoring it");
        return Vec::new();
    };

    entries
        .iter()
        .filter_map(|entry| match serde_json::from_value(entry.clone()) {
            Ok(window) => Some(window),
            Err(e) => {
                warn!("Dropping malformed maintenance window: {e}");
                None
            }
        })
        .collect()
}
