//! Dispatches by trigger type and decides whether a spec fires this cycle.
//! Side-effect-free by contract (§4.7) — a real environment plugs in
//! metric-backend queries behind the same signature; the default stub
//! always returns `false`.

use thiserror::Error;

use crate::crd::{TriggerKind, TriggerSpec};

#[derive(Debug, Error)]
pub enum TriggerError {
    #[error("signal source unavailable: {0}")]
    SourceUnavailable(String),
}

/// A single observed signal value, as would be returned by a metrics
/// backend, anomaly detector, forecaster, or event watcher. Kept generic so
/// the evaluator logic is identical across trigger kinds; only the
/// threshold comparison differs.
#[derive(Debug, Clone, Copy, Default)]
pub struct ObservedSignal {
    pub value: f64,
}

/// Side-effect-free: given a trigger spec and an already-observed signal,
/// decide fire/no-fire. Only the threshold matching `trigger.kind` is read
/// (spec.md §9 ambiguous-field note); other threshold fields are ignored.
pub fn evaluate(trigger: &TriggerSpec, signal: Option<ObservedSignal>) -> Result<bool, TriggerError> {
    let Some(signal) = signal else {
        return Ok(false);
    };

    let fire = match trigger.kind {
        TriggerKind::Anomaly => {
            let threshold = trigger.score_threshold.unwrap_or(f64::INFINITY);
            signal.value >= threshold
        }
        TriggerKind::SloViolation => {
            let threshold = trigger.budget_threshold.unwrap_or(f64::INFINITY);
            signal.value >= threshold
        }
        TriggerKind::Forecast => {
            let threshold = trigger.pct_change.unwrap_or(f64::INFINITY);
            signal.value.abs() >= threshold
        }
        TriggerKind::Event => {
            // Event triggers fire on pattern match; signal.value is a 1.0/0.0
            // match indicator produced by the caller's pattern matcher.
            signal.value >= 1.0
        }
    };

    Ok(fire)
}

/// The default stub: no signal source wired in this deployment, never fires.
/// Real environments supply an `Some(ObservedSignal)` from a metrics query.
pub fn default_stub(_trigger: &TriggerSpec) -> Result<bool, TriggerError> {
    Ok(false)
}
