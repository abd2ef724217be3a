//! Persisted per-target monitoring state and the fold that updates it.
//!
//! The whole aggregate lives under a single store key and is rewritten as a
//! unit. Incidents keep paired `starts`/`errors` arrays so one outage can
//! carry several labeled error segments without being split into separate
//! incidents.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Closed incidents older than this are pruned from the head of the list.
pub const INCIDENT_RETENTION_SECS: i64 = 90 * 24 * 3600;

/// Latency samples older than this are pruned on every append.
pub const LATENCY_WINDOW_SECS: i64 = 12 * 3600;

/// One downtime span. `starts[i]`/`errors[i]` are paired: the i-th error
/// reason is active from `starts[i]` until the next start (or `end`/now).
/// `end == None` means the target is still down.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Incident {
    pub starts: Vec<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<i64>,
    pub errors: Vec<String>,
}

impl Incident {
    pub fn is_open(&self) -> bool {
        self.end.is_none()
    }

    /// Timestamp of the first failure of this incident.
    pub fn started_at(&self) -> i64 {
        self.starts.first().copied().unwrap_or(0)
    }
}

/// One latency sample, tagged with the probing location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatencyRecord {
    pub location: String,
    pub ping_ms: u64,
    pub time: i64,
}

/// Rolling latency window for one target, ascending by time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatencyHistory {
    pub recent: Vec<LatencyRecord>,
}

/// Last observed TLS certificate for a target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SslCertificate {
    pub expiry_date: i64,
    pub days_until_expiry: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    pub last_check: i64,
}

/// The single persisted aggregate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorState {
    /// Timestamp of the last persisted cycle (0 = never persisted).
    pub last_update: i64,
    /// Up/down counters, recomputed every cycle.
    pub overall_up: u32,
    pub overall_down: u32,
    /// First-ever check timestamp per target, set once.
    pub started_at: HashMap<String, i64>,
    /// Incident history per target, oldest first. At most one open incident
    /// per target, and it is always the last element.
    pub incident: HashMap<String, Vec<Incident>>,
    pub latency: HashMap<String, LatencyHistory>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub ssl_certificates: HashMap<String, SslCertificate>,
}

/// What kind of transition a cycle produced for one target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeType {
    /// No transition, nothing mutated besides the counters.
    None,
    /// Open incident closed.
    Up,
    /// New incident opened.
    Down,
    /// Same incident, new error reason appended.
    Error,
}

/// Outcome of folding one check result into the state.
#[derive(Debug, Clone)]
pub struct StateChange {
    pub status_changed: bool,
    pub change_type: ChangeType,
    pub is_up: bool,
    /// First start of the relevant incident, or `now` when there is none.
    pub incident_start: i64,
    pub error: Option<String>,
}

/// Fold one check verdict into the persisted state.
///
/// Success closes an open incident; failure opens one, or appends a new
/// error segment when the error message of an open incident changed.
/// An unchanged error message mutates nothing.
pub fn process_check_result(
    state: &mut MonitorState,
    target_id: &str,
    is_up: bool,
    error: Option<&str>,
    now: i64,
) -> StateChange {
    state.started_at.entry(target_id.to_string()).or_insert(now);

    let incidents = state.incident.entry(target_id.to_string()).or_default();

    if is_up {
        state.overall_up += 1;

        if let Some(last) = incidents.last_mut()
            && last.is_open()
        {
            last.end = Some(now);
            let incident_start = last.started_at();
            return StateChange {
                status_changed: true,
                change_type: ChangeType::Up,
                is_up: true,
                incident_start,
                error: None,
            };
        }

        return StateChange {
            status_changed: false,
            change_type: ChangeType::None,
            is_up: true,
            incident_start: now,
            error: None,
        };
    }

    state.overall_down += 1;
    let message = error.unwrap_or("Unknown error").to_string();

    match incidents.last_mut() {
        Some(last) if last.is_open() => {
            let incident_start = last.started_at();

            if last.errors.last().map(String::as_str) == Some(message.as_str()) {
                // Same failure as before, keep the incident untouched.
                return StateChange {
                    status_changed: false,
                    change_type: ChangeType::None,
                    is_up: false,
                    incident_start,
                    error: Some(message),
                };
            }

            last.starts.push(now);
            last.errors.push(message.clone());
            StateChange {
                status_changed: true,
                change_type: ChangeType::Error,
                is_up: false,
                incident_start,
                error: Some(message),
            }
        }
        _ => {
            incidents.push(Incident {
                starts: vec![now],
                end: None,
                errors: vec![message.clone()],
            });
            StateChange {
                status_changed: true,
                change_type: ChangeType::Down,
                is_up: false,
                incident_start: now,
                error: Some(message),
            }
        }
    }
}

/// Append one latency sample and prune expired ones from the head.
///
/// Records are time-ordered, so pruning stops at the first sample still
/// inside the window.
pub fn update_latency(
    state: &mut MonitorState,
    target_id: &str,
    location: &str,
    ping_ms: u64,
    now: i64,
) {
    let history = state.latency.entry(target_id.to_string()).or_default();
    history.recent.push(LatencyRecord { location: location.to_string(), ping_ms, time: now });

    let cutoff = now - LATENCY_WINDOW_SECS;
    let keep_from = history.recent.iter().position(|r| r.time >= cutoff).unwrap_or(0);
    if keep_from > 0 {
        history.recent.drain(..keep_from);
    }
}

/// Overwrite the certificate snapshot for a target.
pub fn update_ssl_certificate(state: &mut MonitorState, target_id: &str, cert: SslCertificate) {
    state.ssl_certificates.insert(target_id.to_string(), cert);
}

/// Prune fully closed incidents past the retention horizon from the head of
/// each target's list. The open tail is never touched.
pub fn cleanup_old_incidents(state: &mut MonitorState, now: i64) {
    let cutoff = now - INCIDENT_RETENTION_SECS;
    for incidents in state.incident.values_mut() {
        let keep_from = incidents
            .iter()
            .position(|i| i.is_open() || i.end.is_some_and(|end| end >= cutoff))
            .unwrap_or(incidents.len());
        if keep_from > 0 {
            incidents.drain(..keep_from);
        }
    }
}
