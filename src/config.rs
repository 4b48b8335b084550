use std::time::Duration;

/* ============================= TIMING DEFAULTS ============================= */

/// How long a completed/failed spec waits before becoming `Monitoring` again.
pub const REQUEUE_INTERVAL: Duration = Duration::from_secs(30);

/// Back-off requeue after an `llm_error` or `execution_error`.
pub const ERROR_REQUEUE_INTERVAL: Duration = Duration::from_secs(60);

/// Default LLM Adapter per-request timeout.
pub const LLM_TIMEOUT: Duration = Duration::from_secs(60);

/// Default MCP streaming-snapshot cadence.
pub const DEFAULT_SNAPSHOT_CADENCE: Duration = Duration::from_secs(5);

/// Upper bound on a single reconcile cycle's tool-call + LLM budget.
pub const RECONCILE_BUDGET: Duration = Duration::from_secs(300);

/* ============================= SAFETY GATE DEFAULTS ============================= */

/// Fixed-window rate limiter default: N actions per window.
pub const DEFAULT_RATE_LIMIT_WINDOW: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_RATE_LIMIT_MAX: u32 = 10;

/// Cooldown applied when a spec omits `constraints.cooldown_seconds`.
pub const DEFAULT_COOLDOWN_SECONDS: u64 = 300;

/* ============================= BOUNDS ============================= */

/// AuditEntry ring buffer capacity (§3 Data Model).
pub const AUDIT_RING_CAPACITY: usize = 1000;

/// `status.reasoning` is truncated to this many characters before being
/// written back to the spec's status subresource.
pub const MAX_REASONING_CHARS: usize = 2000;

/// Context Gatherer value-count ceiling before stable-priority truncation
/// kicks in (events -> metrics -> diagnostic -> pods -> nodes, dropped in
/// that order).
pub const MAX_CONTEXT_VALUES: usize = 12;

pub const FINALIZER: &str = "aiops.prophet.io/remediation-cleanup";
