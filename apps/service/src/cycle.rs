//! Cycle orchestrator.
//!
//! One call runs one complete pass over all configured targets: load the
//! persisted state, dispatch every check concurrently, fold each settled
//! result through the incident state engine, decide and deliver
//! notifications, then persist the state behind a write cooldown. Cycles
//! are triggered externally and do not overlap; the orchestrator itself
//! holds no lock.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use futures::future::join_all;
use tracing::{debug, error, info, warn};

use crate::checker::Dispatcher;
use crate::config::Config;
use crate::location::LocationLookup;
use crate::maintenance::load_maintenance_windows;
use crate::notify::{Notifier, TemplateContext, is_suppressed, should_notify};
use crate::state::{
    MonitorState, SslCertificate, StateChange, cleanup_old_incidents, process_check_result,
    update_latency, update_ssl_certificate,
};
use crate::store::KvStore;

/// Store key of the monitor state aggregate.
pub const STATE_KEY: &str = "state";

/// Subtracted from the cooldown so a cycle landing a few seconds early
/// still writes.
pub const COOLDOWN_BUFFER_SECS: i64 = 10;

/// Observer invoked after each per-target fold that changed status.
/// Failures are logged and never abort the cycle.
#[async_trait]
pub trait StatusHook: Send + Sync {
    async fn on_status_change(
        &self,
        target: &crate::config::MonitorTarget,
        change: &StateChange,
        now: i64,
    ) -> Result<()>;
}

/// Summary of one cycle.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct CycleReport {
    pub up: u32,
    pub down: u32,
    pub status_changes: u32,
    pub notifications_attempted: usize,
    pub notifications_failed: usize,
    /// Targets whose certificate sits inside the expiry warning threshold.
    pub ssl_warnings: u32,
    pub persisted: bool,
}

pub struct Orchestrator {
    config: Config,
    store: Arc<dyn KvStore>,
    dispatcher: Dispatcher,
    notifier: Notifier,
    hooks: Vec<Arc<dyn StatusHook>>,
}

impl Orchestrator {
    pub fn new(
        config: Config,
        store: Arc<dyn KvStore>,
        location: Arc<dyn LocationLookup>,
    ) -> Result<Self> {
        let dispatcher = Dispatcher::new(location, config.check_proxy_token.clone())?;
        Ok(Self { config, store, dispatcher, notifier: Notifier::new()?, hooks: Vec::new() })
    }

    pub fn add_hook(&mut self, hook: Arc<dyn StatusHook>) {
        self.hooks.push(hook);
    }

    /// Run one cycle at the current wall-clock time.
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        self.run_cycle_at(chrono::Utc::now().timestamp()).await
    }

    /// Run one cycle at an explicit timestamp. Test seam and single source
    /// of truth for "now" within the cycle.
    pub async fn run_cycle_at(&self, now: i64) -> Result<CycleReport> {
        let mut state = self.load_state().await;
        let previous_update = state.last_update;
        state.overall_up = 0;
        state.overall_down = 0;

        let windows = load_maintenance_windows(self.store.as_ref()).await;

        let checks =
            join_all(self.config.targets.iter().map(|t| self.dispatcher.dispatch(t))).await;

        let mut report = CycleReport::default();
        let mut dirty = false;

        for (target, located) in self.config.targets.iter().zip(checks) {
            debug!(
                monitor = %target.id,
                location = %located.location,
                up = located.result.is_up(),
                "check settled"
            );

            let change = process_check_result(
                &mut state,
                &target.id,
                located.result.is_up(),
                located.result.error(),
                now,
            );

            if change.status_changed {
                dirty = true;
                report.status_changes += 1;
                info!(
                    monitor = %target.id,
                    up = change.is_up,
                    error = change.error.as_deref().unwrap_or(""),
                    "status changed"
                );
            }

            if let Some(latency_ms) = located.result.latency_ms() {
                update_latency(&mut state, &target.id, &located.location, latency_ms, now);
            }

            if let Some(tls) = located.result.tls() {
                let days_until_expiry = (tls.expires_at - now) / 86_400;
                if target.ssl_expiry_check && days_until_expiry <= target.ssl_expiry_threshold_days
                {
                    report.ssl_warnings += 1;
                    warn!(
                        monitor = %target.id,
                        days = days_until_expiry,
                        "certificate approaching expiry"
                    );
                }
                update_ssl_certificate(
                    &mut state,
                    &target.id,
                    SslCertificate {
                        expiry_date: tls.expires_at,
                        days_until_expiry,
                        issuer: tls.issuer.clone(),
                        subject: tls.subject.clone(),
                        last_check: now,
                    },
                );
            }

            if change.status_changed {
                for hook in &self.hooks {
                    if let Err(e) = hook.on_status_change(target, &change, now).await {
                        error!(monitor = %target.id, "Status hook failed: {e:#}");
                    }
                }
            }

            if let Some(notification) = &self.config.notification
                && !is_suppressed(target, &change, notification, &windows, now)
                && should_notify(
                    change.incident_start,
                    now,
                    change.status_changed,
                    change.is_up,
                    notification.grace_period_minutes,
                )
            {
                let ctx = TemplateContext::new(
                    &target.name,
                    change.is_up,
                    change.incident_start,
                    now,
                    change.error.as_deref(),
                    notification.timezone.as_deref(),
                );
                let outcomes =
                    self.notifier.notify_all(notification.webhooks.as_slice(), &ctx).await;
                report.notifications_attempted += outcomes.len();
                report.notifications_failed += outcomes.iter().filter(|o| !o.success).count();
            }
        }

        cleanup_old_incidents(&mut state, now);

        report.up = state.overall_up;
        report.down = state.overall_down;
        report.persisted = self.maybe_persist(&mut state, previous_update, dirty, now).await;

        info!(
            up = report.up,
            down = report.down,
            changes = report.status_changes,
            persisted = report.persisted,
            "cycle completed"
        );
        Ok(report)
    }

    /// Any load or parse failure yields a fresh state; a broken store never
    /// aborts the cycle.
    async fn load_state(&self) -> MonitorState {
        let value = match self.store.get(STATE_KEY).await {
            Ok(Some(value)) => value,
            Ok(None) => return MonitorState::default(),
            Err(e) => {
                warn!("State load failed, starting from an empty state: {e}");
                return MonitorState::default();
            }
        };

        match serde_json::from_value(value) {
            Ok(state) => state,
            Err(e) => {
                warn!("Persisted state is unreadable, starting from an empty state: {e}");
                MonitorState::default()
            }
        }
    }

    /// Write the state only when something changed or the cooldown since
    /// the last persisted cycle elapsed.
    async fn maybe_persist(
        &self,
        state: &mut MonitorState,
        previous_update: i64,
        dirty: bool,
        now: i64,
    ) -> bool {
        let cooldown_secs =
            (self.config.kv_write_cooldown_minutes * 60) as i64 - COOLDOWN_BUFFER_SECS;
        if !dirty && now - previous_update < cooldown_secs {
            debug!("skipping state write, cooldown not elapsed");
            return false;
        }

        state.last_update = now;
        let value = match serde_json::to_value(&*state) {
            Ok(value) => value,
            Err(e) => {
                error!("Failed to serialize monitor state: {e}");
                return false;
            }
        };

        match self.store.put(STATE_KEY, &value).await {
            Ok(()) => true,
            Err(e) => {
                error!("Failed to persist monitor state: {e}");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_support::target;
    use crate::config::{NotificationConfig, WebhookConfig, Webhooks};
    use crate::location::StaticLocation;
    use crate::maintenance::{MAINTENANCE_KEY, MaintenanceWindow};
    use crate::state::ChangeType;
    use crate::store::{KvStore, MemoryStore};
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Stub target endpoint whose status code can be flipped between
    /// cycles.
    struct StubTarget {
        url: String,
        status: Arc<Mutex<&'static str>>,
    }

    async fn stub_target(initial: &'static str) -> StubTarget {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let status = Arc::new(Mutex::new(initial));
        let shared = status.clone();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = [0u8; 4096];
                let _ = socket.read(&mut buf).await;
                let line = *shared.lock().unwrap();
                let response =
                    format!("{line}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n");
                let _ = socket.write_all(response.as_bytes()).await;
            }
        });
        StubTarget { url: format!("http://{addr}"), status }
    }

    async fn stub_webhook(status_line: &'static str) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                let mut buf = vec![0u8; 16384];
                let _ = socket.read(&mut buf).await;
                let response =
                    format!("{status_line}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n");
                let _ = socket.write_all(response.as_bytes()).await;
            }
        });
        (format!("http://{addr}"), hits)
    }

    fn orchestrator(config: Config, store: Arc<dyn KvStore>) -> Orchestrator {
        Orchestrator::new(config, store, Arc::new(StaticLocation("TEST".into()))).unwrap()
    }

    async fn persisted_state(store: &dyn KvStore) -> MonitorState {
        serde_json::from_value(store.get(STATE_KEY).await.unwrap().unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_down_then_recovery_scenario() {
        let stub = stub_target("HTTP/1.1 503 Service Unavailable").await;
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::default());

        let mut config = Config::default();
        config.targets.push(target("web", "GET", &stub.url));
        let orchestrator = orchestrator(config, store.clone());

        let report = orchestrator.run_cycle_at(1000).await.unwrap();
        assert_eq!(report.down, 1);
        assert_eq!(report.status_changes, 1);
        assert!(report.persisted);

        // Same failure again: no transition, one incident, one error label.
        let report = orchestrator.run_cycle_at(2000).await.unwrap();
        assert_eq!(report.status_changes, 0);

        let state = persisted_state(store.as_ref()).await;
        let incidents = &state.incident["web"];
        assert_eq!(incidents.len(), 1);
        assert_eq!(incidents[0].starts, vec![1000]);
        assert_eq!(incidents[0].errors.len(), 1);
        assert!(incidents[0].end.is_none());

        // Recovery closes the incident on that cycle only.
        *stub.status.lock().unwrap() = "HTTP/1.1 200 OK";
        let report = orchestrator.run_cycle_at(2500).await.unwrap();
        assert_eq!(report.up, 1);
        assert_eq!(report.status_changes, 1);

        let state = persisted_state(store.as_ref()).await;
        assert_eq!(state.incident["web"][0].end, Some(2500));
        assert_eq!(state.started_at["web"], 1000);
        assert_eq!(state.latency["web"].recent.len(), 3);
        assert!(state.latency["web"].recent.iter().all(|r| r.location == "TEST"));

        let report = orchestrator.run_cycle_at(3000).await.unwrap();
        assert_eq!(report.status_changes, 0);
    }

    #[tokio::test]
    async fn test_cooldown_skips_quiet_writes() {
        let stub = stub_target("HTTP/1.1 200 OK").await;
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::default());

        let mut config = Config::default();
        config.targets.push(target("web", "GET", &stub.url));
        let orchestrator = orchestrator(config, store.clone());

        // First cycle: the initial state has last_update 0, cooldown long
        // elapsed. The fold also records started_at, but persistence is
        // keyed off transitions and the cooldown alone.
        let report = orchestrator.run_cycle_at(10_000).await.unwrap();
        assert!(report.persisted);

        // Nothing changed and the cooldown (3 min - 10 s) has not elapsed.
        let report = orchestrator.run_cycle_at(10_060).await.unwrap();
        assert!(!report.persisted);
        assert_eq!(persisted_state(store.as_ref()).await.last_update, 10_000);

        // Past the cooldown the quiet state is written anyway.
        let report = orchestrator.run_cycle_at(10_000 + 180).await.unwrap();
        assert!(report.persisted);
    }

    #[tokio::test]
    async fn test_corrupt_state_starts_fresh() {
        let stub = stub_target("HTTP/1.1 200 OK").await;
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::default());
        store.put(STATE_KEY, &serde_json::json!("not a state")).await.unwrap();

        let mut config = Config::default();
        config.targets.push(target("web", "GET", &stub.url));
        let orchestrator = orchestrator(config, store.clone());

        let report = orchestrator.run_cycle_at(5000).await.unwrap();
        assert_eq!(report.up, 1);
        assert!(report.persisted);
        assert_eq!(persisted_state(store.as_ref()).await.started_at["web"], 5000);
    }

    #[tokio::test]
    async fn test_notification_sent_and_suppressed_by_maintenance() {
        let stub = stub_target("HTTP/1.1 500 Internal Server Error").await;
        let (hook_url, hook_hits) = stub_webhook("HTTP/1.1 200 OK").await;
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::default());

        let mut config = Config::default();
        config.targets.push(target("web", "GET", &stub.url));
        config.notification = Some(NotificationConfig {
            webhooks: Webhooks::One(WebhookConfig {
                url: hook_url,
                template: Some("text".to_string()),
                payload: None,
                delivery: Default::default(),
                headers: HashMap::new(),
            }),
            timezone: None,
            grace_period_minutes: None,
            skip_notification_ids: Vec::new(),
        });
        let orchestrator = orchestrator(config, store.clone());

        let report = orchestrator.run_cycle_at(1000).await.unwrap();
        assert_eq!(report.notifications_attempted, 1);
        assert_eq!(report.notifications_failed, 0);
        assert_eq!(hook_hits.load(Ordering::SeqCst), 1);

        // An active catch-all maintenance window silences the next
        // transition entirely.
        let window = MaintenanceWindow {
            id: uuid::Uuid::new_v4(),
            monitors: Vec::new(),
            start: 1500,
            end: None,
        };
        store.put(MAINTENANCE_KEY, &serde_json::json!([window])).await.unwrap();

        *stub.status.lock().unwrap() = "HTTP/1.1 200 OK";
        let report = orchestrator.run_cycle_at(2000).await.unwrap();
        assert_eq!(report.status_changes, 1);
        assert_eq!(report.notifications_attempted, 0);
        assert_eq!(hook_hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_status_hooks_fire_and_cannot_abort() {
        struct RecordingHook {
            seen: Mutex<Vec<(String, ChangeType)>>,
        }

        #[async_trait]
        impl StatusHook for RecordingHook {
            async fn on_status_change(
                &self,
                target: &crate::config::MonitorTarget,
                change: &StateChange,
                _now: i64,
            ) -> Result<()> {
                self.seen.lock().unwrap().push((target.id.clone(), change.change_type));
                anyhow::bail!("hook always fails")
            }
        }

        let stub = stub_target("HTTP/1.1 500 Internal Server Error").await;
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::default());

        let mut config = Config::default();
        config.targets.push(target("web", "GET", &stub.url));
        let mut orchestrator = orchestrator(config, store);
        let hook = Arc::new(RecordingHook { seen: Mutex::new(Vec::new()) });
        orchestrator.add_hook(hook.clone());

        let report = orchestrator.run_cycle_at(1000).await.unwrap();
        assert_eq!(report.status_changes, 1);
        assert_eq!(
            hook.seen.lock().unwrap().clone(),
            vec![("web".to_string(), ChangeType::Down)]
        );
    }

    #[tokio::test]
    async fn test_multiple_targets_settle_independently() {
        let good = stub_target("HTTP/1.1 200 OK").await;
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::default());

        let mut config = Config::default();
        config.targets.push(target("good", "GET", &good.url));
        // Nothing listens here; the check fails without aborting the cycle.
        config.targets.push(target("dead", "GET", "http://127.0.0.1:1/"));
        let orchestrator = orchestrator(config, store.clone());

        let report = orchestrator.run_cycle_at(1000).await.unwrap();
        assert_eq!(report.up, 1);
        assert_eq!(report.down, 1);

        let state = persisted_state(store.as_ref()).await;
        assert!(state.incident["good"].is_empty());
        assert_eq!(state.incident["dead"].len(), 1);
    }
}
