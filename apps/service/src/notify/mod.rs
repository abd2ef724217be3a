//! Notification decision engine: decides whether a cycle's transition for
//! one target is worth a message, honoring the grace period, explicit
//! skip-lists and maintenance windows.

pub mod template;
pub mod webhook;

use crate::config::{MonitorTarget, NotificationConfig};
use crate::maintenance::{MaintenanceWindow, in_maintenance};
use crate::state::{ChangeType, StateChange};

pub use template::{PLACEHOLDER, RenderedMessage, Template, TemplateContext};
pub use webhook::{DELIVERY_TIMEOUT, DeliveryOutcome, Notifier};

/// Jitter absorbed by the grace threshold so a notification is not skipped
/// when a cycle lands a few seconds early.
pub const GRACE_BUFFER_SECS: i64 = 30;

/// Decide whether to notify for one target this cycle.
///
/// Without a grace period any status change notifies immediately. With one,
/// notifications are withheld until the incident is `grace*60 - 30` seconds
/// old; past that threshold a genuine change always notifies, and an
/// unchanged-down state notifies exactly once while the threshold was just
/// crossed (within the buffer window).
pub fn should_notify(
    incident_start: i64,
    now: i64,
    status_changed: bool,
    is_up: bool,
    grace_period_minutes: Option<u32>,
) -> bool {
    let Some(grace_minutes) = grace_period_minutes else {
        return status_changed;
    };

    let threshold = i64::from(grace_minutes) * 60 - GRACE_BUFFER_SECS;
    let elapsed = now - incident_start;

    if status_changed {
        elapsed >= threshold
    } else {
        !is_up && elapsed >= threshold && elapsed < threshold + GRACE_BUFFER_SECS
    }
}

/// Suppression rules, checked before the grace-period evaluation.
pub fn is_suppressed(
    target: &MonitorTarget,
    change: &StateChange,
    config: &NotificationConfig,
    windows: &[MaintenanceWindow],
    now: i64,
) -> bool {
    if config.skip_notification_ids.iter().any(|id| id == &target.id) {
        return true;
    }

    if in_maintenance(windows, &target.id, now) {
        return true;
    }

    // Same-incident error-label changes can be muted per target; up/down
    // transitions still go through.
    if change.change_type == ChangeType::Error && target.suppress_error_change_notification {
        return true;
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_support::target;
    use crate::config::{WebhookConfig, Webhooks};
    use crate::maintenance::MaintenanceWindow;
    use std::collections::HashMap;

    fn notification_config(skip: &[&str]) -> NotificationConfig {
        NotificationConfig {
            webhooks: Webhooks::Many(vec![WebhookConfig {
                url: "https://hooks.example.com".to_string(),
                template: None,
                payload: None,
                delivery: Default::default(),
                headers: HashMap::new(),
            }]),
            timezone: None,
            grace_period_minutes: None,
            skip_notification_ids: skip.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn change(change_type: ChangeType, is_up: bool) -> StateChange {
        StateChange {
            status_changed: change_type != ChangeType::None,
            change_type,
            is_up,
            incident_start: 0,
            error: None,
        }
    }

    #[test]
    fn test_no_grace_notifies_on_any_change() {
        assert!(should_notify(1000, 1001, true, false, None));
        assert!(should_notify(1000, 1001, true, true, None));
        assert!(!should_notify(1000, 1001, false, false, None));
    }

    #[test]
    fn test_grace_withholds_until_threshold() {
        let t0 = 10_000;
        // 5 minutes of grace, threshold at 270s.
        for offset in [0, 60, 200, 269] {
            assert!(
                !should_notify(t0, t0 + offset, true, false, Some(5)),
                "must withhold at +{offset}s"
            );
            assert!(!should_notify(t0, t0 + offset, false, false, Some(5)));
        }

        assert!(should_notify(t0, t0 + 270, true, false, Some(5)));
        assert!(should_notify(t0, t0 + 500, true, false, Some(5)));
    }

    #[test]
    fn test_grace_delayed_confirmation_window() {
        let t0 = 10_000;
        // Unchanged-down fires only while the threshold was just crossed.
        assert!(!should_notify(t0, t0 + 269, false, false, Some(5)));
        assert!(should_notify(t0, t0 + 270, false, false, Some(5)));
        assert!(should_notify(t0, t0 + 280, false, false, Some(5)));
        assert!(should_notify(t0, t0 + 299, false, false, Some(5)));
        assert!(!should_notify(t0, t0 + 300, false, false, Some(5)));
        assert!(!should_notify(t0, t0 + 3000, false, false, Some(5)));
    }

    #[test]
    fn test_grace_recovery_after_threshold_notifies() {
        let t0 = 10_000;
        assert!(should_notify(t0, t0 + 400, true, true, Some(5)));
        // A flap shorter than the grace period stays silent on both edges.
        assert!(!should_notify(t0, t0 + 100, true, true, Some(5)));
    }

    #[test]
    fn test_skip_list_suppression() {
        let t = target("web", "GET", "https://example.com");
        let config = notification_config(&["web"]);
        assert!(is_suppressed(&t, &change(ChangeType::Down, false), &config, &[], 100));

        let config = notification_config(&["other"]);
        assert!(!is_suppressed(&t, &change(ChangeType::Down, false), &config, &[], 100));
    }

    #[test]
    fn test_maintenance_suppression() {
        let t = target("web", "GET", "https://example.com");
        let config = notification_config(&[]);
        let windows = vec![MaintenanceWindow {
            id: uuid::Uuid::new_v4(),
            monitors: Vec::new(),
            start: 50,
            end: Some(500),
        }];

        // A full down -> up -> down sequence within the window stays silent.
        for (change_type, is_up, now) in [
            (ChangeType::Down, false, 100),
            (ChangeType::Up, true, 200),
            (ChangeType::Down, false, 300),
        ] {
            assert!(is_suppressed(&t, &change(change_type, is_up), &config, &windows, now));
        }

        assert!(!is_suppressed(&t, &change(ChangeType::Down, false), &config, &windows, 600));
    }

    #[test]
    fn test_error_change_toggle() {
        let mut t = target("web", "GET", "https://example.com");
        t.suppress_error_change_notification = true;
        let config = notification_config(&[]);

        assert!(is_suppressed(&t, &change(ChangeType::Error, false), &config, &[], 100));
        assert!(!is_suppressed(&t, &change(ChangeType::Down, false), &config, &[], 100));
        assert!(!is_suppressed(&t, &change(ChangeType::Up, true), &config, &[], 100));
    }
}
