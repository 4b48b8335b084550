//! In-memory audit ring buffer and the durable Kubernetes Event surface
//! (§3 Data Model, §4.6). Every executed action — successful, failed, or
//! dry-run — produces exactly one `AuditEntry` and at least one cluster
//! `Event` (I7).

use std::collections::VecDeque;
use std::sync::Mutex;

use k8s_openapi::api::core::v1::{Event, EventSource, ObjectReference};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{MicroTime, ObjectMeta, Time};
use kube::api::{Api, PostParams};
use kube::Client;
use serde::Serialize;
use tracing::warn;

use crate::config::AUDIT_RING_CAPACITY;

/* ============================= ENTRY ============================= */

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AuditEntry {
    pub timestamp: String,
    pub namespace: String,
    pub name: String,
    pub action_kind: String,
    pub parameters_digest: String,
    pub approved: bool,
    pub dry_run: bool,
    pub result: String,
    pub error: Option<String>,
    pub reasoning_digest: String,
}

/* ============================= RING BUFFER ============================= */

/// Bounded, mutex-protected ring buffer. Readers copy out rather than hold
/// the lock, per the shared-resource policy in spec.md §5.
pub struct AuditRing {
    entries: Mutex<VecDeque<AuditEntry>>,
    capacity: usize,
}

impl Default for AuditRing {
    fn default() -> Self {
        AuditRing::new(AUDIT_RING_CAPACITY)
    }
}

impl AuditRing {
    pub fn new(capacity: usize) -> Self {
        AuditRing {
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    pub fn push(&self, entry: AuditEntry) {
        let mut entries = self.entries.lock().expect("audit ring mutex poisoned");
        if entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    /// Snapshot copy, newest first.
    pub fn snapshot(&self) -> Vec<AuditEntry> {
        let entries = self.entries.lock().expect("audit ring mutex poisoned");
        entries.iter().rev().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("audit ring mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Truncate free text for compact storage in status/audit fields, matching
/// the `MAX_REASONING_CHARS` / digest convention used throughout §3.
pub fn digest(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let truncated: String = text.chars().take(max_chars).collect();
        format!("{truncated}…")
    }
}

/* ============================= CLUSTER EVENT ============================= */

pub const REASON_EXECUTED: &str = "AgentActionExecuted";
pub const REASON_FAILED: &str = "AgentActionFailed";
pub const REASON_REJECTED: &str = "AgentActionRejected";

/// Emit a `Normal` or `Warning` Event against the spec object. Failure to
/// write is logged but never fails the caller's reported result (§4.6).
pub async fn emit_event(
    client: &Client,
    namespace: &str,
    spec_name: &str,
    spec_uid: Option<&str>,
    event_type: &str,
    reason: &str,
    message: &str,
) {
    let events: Api<Event> = Api::namespaced(client.clone(), namespace);
    let now = chrono::Utc::now();

    let event_name = format!("{spec_name}.{}", uuid::Uuid::new_v4().simple());

    let event = Event {
        metadata: ObjectMeta {
            name: Some(event_name),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        involved_object: ObjectReference {
            kind: Some("AutonomousAction".to_string()),
            name: Some(spec_name.to_string()),
            namespace: Some(namespace.to_string()),
            uid: spec_uid.map(|u| u.to_string()),
            api_version: Some("aiops.prophet.io/v1alpha1".to_string()),
            ..Default::default()
        },
        reason: Some(reason.to_string()),
        message: Some(message.to_string()),
        type_: Some(event_type.to_string()),
        first_timestamp: Some(Time(now)),
        last_timestamp: Some(Time(now)),
        event_time: Some(MicroTime(now)),
        source: Some(EventSource {
            component: Some("prophet-remediation-engine".to_string()),
            ..Default::default()
        }),
        count: Some(1),
        ..Default::default()
    };

    if let Err(e) = events.create(&PostParams::default(), &event).await {
        warn!(error = %e, namespace, spec = spec_name, "audit_event_write_failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_entry(n: u32) -> AuditEntry {
        AuditEntry {
            timestamp: format!("t{n}"),
            namespace: "default".to_string(),
            name: "example".to_string(),
            action_kind: "scale".to_string(),
            parameters_digest: "digest".to_string(),
            approved: true,
            dry_run: false,
            result: "success".to_string(),
            error: None,
            reasoning_digest: "reasoning".to_string(),
        }
    }

    #[test]
    fn test_ring_buffer_bounded() {
        let ring = AuditRing::new(3);
        for i in 0..5 {
            ring.push(sample_entry(i));
        }
        assert_eq!(ring.len(), 3);
        let snap = ring.snapshot();
        // newest first
        assert_eq!(snap[0].timestamp, "t4");
        assert_eq!(snap[2].timestamp, "t2");
    }

    #[test]
    fn test_ring_buffer_empty_initially() {
        let ring = AuditRing::default();
        assert!(ring.is_empty());
    }

    #[test]
    fn test_digest_passthrough_under_limit() {
        assert_eq!(digest("short text", 100), "short text");
    }

    #[test]
    fn test_digest_truncates_over_limit() {
        let long = "a".repeat(50);
        let d = digest(&long, 10);
        assert_eq!(d.chars().count(), 11); // 10 chars + ellipsis
        assert!(d.ends_with('…'));
    }

    #[test]
    fn test_reason_constants_match_spec() {
        assert_eq!(REASON_EXECUTED, "AgentActionExecuted");
        assert_eq!(REASON_FAILED, "AgentActionFailed");
    }
}
