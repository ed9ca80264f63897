//! Instance state management.

use crate::context::{Context, ContextValue};
use crate::definition::{State, TransitionTable};
use crate::error::{DefinitionError, TransitionError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Record of one successful transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: State,
    pub to: State,
    pub event: String,
    pub timestamp: DateTime<Utc>,
}

/// Result of [`Instance::transition`].
pub type TransitionResult = Result<TransitionRecord, TransitionError>;

/// Serializable view of a transition result, for callers that answer with JSON.
///
/// Serializes as `{success: true, from, to, event}` or
/// `{success: false, error, reason}`; the `success` flag is derived from the
/// variant and checked on the way back in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "OutcomeWire", into = "OutcomeWire")]
pub enum TransitionOutcome {
    Applied {
        from: String,
        to: String,
        event: String,
    },
    Rejected {
        error: String,
        reason: String,
    },
}

impl TransitionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, TransitionOutcome::Applied { .. })
    }
}

impl From<&TransitionResult> for TransitionOutcome {
    fn from(result: &TransitionResult) -> Self {
        match result {
            Ok(record) => TransitionOutcome::Applied {
                from: record.from.to_string(),
                to: record.to.to_string(),
                event: record.event.clone(),
            },
            Err(e) => TransitionOutcome::Rejected {
                error: e.error_code().to_string(),
                reason: e.reason(),
            },
        }
    }
}

/// Flat JSON shape of [`TransitionOutcome`].
#[derive(Serialize, Deserialize)]
struct OutcomeWire {
    success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    event: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
}

impl From<TransitionOutcome> for OutcomeWire {
    fn from(outcome: TransitionOutcome) -> Self {
        match outcome {
            TransitionOutcome::Applied { from, to, event } => OutcomeWire {
                success: true,
                from: Some(from),
                to: Some(to),
                event: Some(event),
                error: None,
                reason: None,
            },
            TransitionOutcome::Rejected { error, reason } => OutcomeWire {
                success: false,
                from: None,
                to: None,
                event: None,
                error: Some(error),
                reason: Some(reason),
            },
        }
    }
}

impl TryFrom<OutcomeWire> for TransitionOutcome {
    type Error = String;

    fn try_from(wire: OutcomeWire) -> Result<Self, Self::Error> {
        match wire {
            OutcomeWire {
                success: true,
                from: Some(from),
                to: Some(to),
                event: Some(event),
                error: None,
                reason: None,
            } => Ok(TransitionOutcome::Applied { from, to, event }),
            OutcomeWire {
                success: false,
                from: None,
                to: None,
                event: None,
                error: Some(error),
                reason: Some(reason),
            } => Ok(TransitionOutcome::Rejected { error, reason }),
            OutcomeWire { success: true, .. } => {
                Err("successful outcome needs exactly from, to and event".to_string())
            }
            OutcomeWire { success: false, .. } => {
                Err("rejected outcome needs exactly error and reason".to_string())
            }
        }
    }
}

/// A single entity's live state machine: current state, context and history.
#[derive(Debug, Clone)]
pub struct Instance {
    table: Arc<TransitionTable>,
    current: State,
    context: Context,
    history: Vec<TransitionRecord>,
}

impl Instance {
    /// Creates a new instance in `initial`.
    pub fn new(
        table: Arc<TransitionTable>,
        initial: impl Into<State>,
    ) -> Result<Self, DefinitionError> {
        let initial = initial.into();
        if !table.has_state(initial.as_str()) {
            return Err(DefinitionError::InitialNotDeclared { state: initial.0 });
        }
        Ok(Self::with_valid_initial(table, initial))
    }

    pub(crate) fn with_valid_initial(table: Arc<TransitionTable>, initial: State) -> Self {
        Self {
            table,
            current: initial,
            context: Context::new(),
            history: Vec::new(),
        }
    }

    /// Rebuilds an instance from a snapshot taken with [`Instance::snapshot`].
    ///
    /// The history must be a connected path of declared transitions ending
    /// in the snapshot's state.
    pub fn restore(
        table: Arc<TransitionTable>,
        snapshot: InstanceSnapshot,
    ) -> Result<Self, DefinitionError> {
        let undeclared = std::iter::once(&snapshot.state).chain(
            snapshot
                .history
                .iter()
                .flat_map(|r| [&r.from, &r.to]),
        );
        for state in undeclared {
            if !table.has_state(state.as_str()) {
                return Err(DefinitionError::UndeclaredState {
                    state: state.0.clone(),
                    role: "snapshot",
                });
            }
        }

        for (i, record) in snapshot.history.iter().enumerate() {
            if table.lookup(&record.event, record.from.as_str()) != Some(&record.to) {
                return Err(DefinitionError::InvalidSnapshot {
                    reason: format!(
                        "history entry {} ('{}': {} -> {}) is not a declared transition",
                        i, record.event, record.from, record.to
                    ),
                });
            }
        }

        for (i, pair) in snapshot.history.windows(2).enumerate() {
            if pair[0].to != pair[1].from {
                return Err(DefinitionError::InvalidSnapshot {
                    reason: format!(
                        "history entry {} starts in '{}' but entry {} ended in '{}'",
                        i + 1,
                        pair[1].from,
                        i,
                        pair[0].to
                    ),
                });
            }
        }

        if let Some(last) = snapshot.history.last() {
            if last.to != snapshot.state {
                return Err(DefinitionError::InvalidSnapshot {
                    reason: format!(
                        "state '{}' does not match last transition target '{}'",
                        snapshot.state, last.to
                    ),
                });
            }
        }

        Ok(Self {
            table,
            current: snapshot.state,
            context: snapshot.context,
            history: snapshot.history,
        })
    }

    pub fn table(&self) -> &Arc<TransitionTable> {
        &self.table
    }

    pub fn current_state(&self) -> &State {
        &self.current
    }

    pub fn is(&self, state: &str) -> bool {
        self.current.as_str() == state
    }

    pub fn is_in<S: AsRef<str>>(&self, states: &[S]) -> bool {
        states.iter().any(|s| self.is(s.as_ref()))
    }

    /// Returns true if `event` would succeed from the current state.
    pub fn can(&self, event: &str) -> bool {
        self.table.lookup(event, self.current.as_str()).is_some()
    }

    pub fn available_events(&self) -> BTreeSet<&str> {
        self.table.events_from(self.current.as_str())
    }

    /// Fires `event`. On failure nothing changes.
    pub fn transition(&mut self, event: &str) -> TransitionResult {
        let Some(target) = self.table.lookup(event, self.current.as_str()) else {
            tracing::trace!(
                "Rejected event '{}' in state '{}'",
                event,
                self.current.as_str()
            );
            return Err(TransitionError::InvalidTransition {
                event: event.to_string(),
                state: self.current.0.clone(),
            });
        };

        let record = TransitionRecord {
            from: self.current.clone(),
            to: target.clone(),
            event: event.to_string(),
            timestamp: Utc::now(),
        };

        tracing::debug!(
            "Transition '{}': {} -> {}",
            event,
            record.from.as_str(),
            record.to.as_str()
        );

        self.current = record.to.clone();
        self.history.push(record.clone());
        Ok(record)
    }

    /// Upserts a context value. Independent of transitions.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<ContextValue>) {
        let key = key.into();
        tracing::trace!("Context set '{}'", key);
        self.context.insert(key, value.into());
    }

    pub fn get(&self, key: &str) -> Option<&ContextValue> {
        self.context.get(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<ContextValue> {
        self.context.remove(key)
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Full transition log, oldest first.
    pub fn history(&self) -> &[TransitionRecord] {
        &self.history
    }

    pub fn last_transition(&self) -> Option<&TransitionRecord> {
        self.history.last()
    }

    /// Captures state, context and history for an external store.
    pub fn snapshot(&self) -> InstanceSnapshot {
        InstanceSnapshot {
            state: self.current.clone(),
            context: self.context.clone(),
            history: self.history.clone(),
        }
    }
}

/// Owned copy of an instance's mutable data.
///
/// Context floats go through JSON as numbers; a `ContextValue::Float` built
/// directly from NaN or an infinity serializes as `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceSnapshot {
    pub state: State,

    #[serde(default)]
    pub context: Context,

    #[serde(default)]
    pub history: Vec<TransitionRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::TransitionRule;

    fn order_table() -> Arc<TransitionTable> {
        Arc::new(
            TransitionTable::build(
                ["pending", "confirmed", "processing", "shipped", "delivered"],
                vec![
                    TransitionRule::new("confirm", "pending", "confirmed"),
                    TransitionRule::new("process", "confirmed", "processing"),
                    TransitionRule::new("ship", "processing", "shipped"),
                    TransitionRule::new("deliver", "shipped", "delivered"),
                ],
            )
            .unwrap(),
        )
    }

    fn payment_table() -> Arc<TransitionTable> {
        Arc::new(
            TransitionTable::build(
                ["pending", "authorized", "captured", "failed"],
                vec![
                    TransitionRule::new("authorize", "pending", "authorized"),
                    TransitionRule::new("capture", "authorized", "captured"),
                    TransitionRule::new("fail", ["pending", "authorized"], "failed"),
                ],
            )
            .unwrap(),
        )
    }

    #[test]
    fn test_order_lifecycle() {
        let mut order = Instance::new(order_table(), "pending").unwrap();

        for event in ["confirm", "process", "ship", "deliver"] {
            order.transition(event).unwrap();
        }

        assert_eq!(order.current_state().as_str(), "delivered");
        assert_eq!(order.history().len(), 4);
        assert_eq!(order.last_transition(), order.history().last());
        assert!(order.available_events().is_empty());
    }

    #[test]
    fn test_transition_record() {
        let mut order = Instance::new(order_table(), "pending").unwrap();
        let record = order.transition("confirm").unwrap();

        assert_eq!(record.from.as_str(), "pending");
        assert_eq!(record.to.as_str(), "confirmed");
        assert_eq!(record.event, "confirm");
        assert_eq!(order.last_transition(), Some(&record));
    }

    #[test]
    fn test_invalid_transition_leaves_state_unchanged() {
        let mut order = Instance::new(order_table(), "pending").unwrap();

        let err = order.transition("ship").unwrap_err();
        assert_eq!(err.error_code(), "invalid_transition");
        assert_eq!(err.reason(), "Cannot transition 'ship' from state 'pending'");
        assert!(order.is("pending"));
        assert!(order.history().is_empty());
        assert!(order.last_transition().is_none());

        // Failure is idempotent
        assert!(order.transition("ship").is_err());
        assert!(order.is("pending"));
    }

    #[test]
    fn test_multi_source_fail() {
        let mut from_pending = Instance::new(payment_table(), "pending").unwrap();
        from_pending.transition("fail").unwrap();
        assert!(from_pending.is("failed"));

        let mut from_authorized = Instance::new(payment_table(), "pending").unwrap();
        from_authorized.transition("authorize").unwrap();
        from_authorized.transition("fail").unwrap();
        assert!(from_authorized.is("failed"));
        assert_eq!(from_authorized.history().len(), 2);
    }

    #[test]
    fn test_queries() {
        let payment = Instance::new(payment_table(), "pending").unwrap();

        assert!(payment.is("pending"));
        assert!(!payment.is("failed"));
        assert!(payment.is_in(&["authorized", "pending"]));
        assert!(!payment.is_in(&["captured", "failed"]));
        assert!(payment.can("authorize"));
        assert!(payment.can("fail"));
        assert!(!payment.can("capture"));

        let events: Vec<&str> = payment.available_events().into_iter().collect();
        assert_eq!(events, vec!["authorize", "fail"]);
    }

    #[test]
    fn test_context_independent_of_transitions() {
        let mut order = Instance::new(order_table(), "pending").unwrap();

        assert!(order.get("missing_key").is_none());
        order.set("tracking", "1Z999");
        order.set("items", 3);
        order.transition("confirm").unwrap();
        let _ = order.transition("deliver");

        assert_eq!(order.get("tracking").and_then(|v| v.as_str()), Some("1Z999"));
        assert_eq!(order.get("items"), Some(&ContextValue::Int(3)));
        assert!(order.get("missing_key").is_none());

        order.set("items", 4);
        assert_eq!(order.get("items"), Some(&ContextValue::Int(4)));
        assert_eq!(order.remove("items"), Some(ContextValue::Int(4)));
        assert!(order.get("items").is_none());
    }

    #[test]
    fn test_caller_side_guard() {
        let mut payment = Instance::new(payment_table(), "pending").unwrap();
        payment.set("amount", 250);

        let within_limit = payment
            .get("amount")
            .and_then(|v| v.as_i64())
            .is_some_and(|amount| amount <= 100);
        if within_limit {
            payment.transition("authorize").unwrap();
        } else {
            payment.transition("fail").unwrap();
        }

        assert!(payment.is("failed"));
    }

    #[test]
    fn test_initial_must_be_declared() {
        let result = Instance::new(order_table(), "draft");
        assert!(matches!(
            result,
            Err(DefinitionError::InitialNotDeclared { .. })
        ));
    }

    #[test]
    fn test_outcome_json() {
        let mut order = Instance::new(order_table(), "pending").unwrap();

        let ok = TransitionOutcome::from(&order.transition("confirm"));
        assert!(ok.is_success());
        assert_eq!(
            serde_json::to_value(&ok).unwrap(),
            serde_json::json!({"success": true, "from": "pending", "to": "confirmed", "event": "confirm"})
        );

        let rejected = TransitionOutcome::from(&order.transition("deliver"));
        assert!(!rejected.is_success());
        assert_eq!(
            serde_json::to_value(&rejected).unwrap(),
            serde_json::json!({
                "success": false,
                "error": "invalid_transition",
                "reason": "Cannot transition 'deliver' from state 'confirmed'"
            })
        );
    }

    #[test]
    fn test_snapshot_restore() {
        let mut order = Instance::new(order_table(), "pending").unwrap();
        order.set("customer", "c-42");
        order.transition("confirm").unwrap();

        let snapshot = order.snapshot();
        let json = serde_json::to_string(&snapshot).unwrap();
        let parsed: InstanceSnapshot = serde_json::from_str(&json).unwrap();

        let mut restored = Instance::restore(order_table(), parsed).unwrap();
        assert!(restored.is("confirmed"));
        assert_eq!(restored.history(), order.history());
        assert_eq!(restored.get("customer").and_then(|v| v.as_str()), Some("c-42"));

        restored.transition("process").unwrap();
        assert_eq!(restored.history().len(), 2);
    }

    #[test]
    fn test_restore_rejects_unknown_state() {
        let snapshot = InstanceSnapshot {
            state: State::from("archived"),
            context: Context::new(),
            history: Vec::new(),
        };
        let result = Instance::restore(order_table(), snapshot);
        assert!(matches!(
            result,
            Err(DefinitionError::UndeclaredState { role: "snapshot", .. })
        ));
    }

    fn confirmed_snapshot() -> InstanceSnapshot {
        let mut order = Instance::new(order_table(), "pending").unwrap();
        order.transition("confirm").unwrap();
        order.transition("process").unwrap();
        order.snapshot()
    }

    #[test]
    fn test_restore_rejects_undeclared_history_entry() {
        let mut snapshot = confirmed_snapshot();
        snapshot.state = State::from("shipped");
        snapshot.history[1].event = "teleport".to_string();
        snapshot.history[1].to = State::from("shipped");

        let result = Instance::restore(order_table(), snapshot);
        assert!(matches!(result, Err(DefinitionError::InvalidSnapshot { .. })));
    }

    #[test]
    fn test_restore_rejects_disconnected_history() {
        let mut snapshot = confirmed_snapshot();
        snapshot.history.remove(0);
        snapshot.history.push(TransitionRecord {
            from: State::from("shipped"),
            to: State::from("delivered"),
            event: "deliver".to_string(),
            timestamp: Utc::now(),
        });
        snapshot.state = State::from("delivered");

        let result = Instance::restore(order_table(), snapshot);
        match result {
            Err(DefinitionError::InvalidSnapshot { reason }) => {
                assert!(reason.contains("starts in 'shipped'"), "{}", reason)
            }
            other => panic!("expected invalid snapshot, got {:?}", other),
        }
    }

    #[test]
    fn test_restore_rejects_state_behind_history() {
        let mut snapshot = confirmed_snapshot();
        snapshot.state = State::from("pending");

        let result = Instance::restore(order_table(), snapshot);
        match result {
            Err(DefinitionError::InvalidSnapshot { reason }) => {
                assert!(reason.contains("'processing'"), "{}", reason)
            }
            other => panic!("expected invalid snapshot, got {:?}", other),
        }
    }

    #[test]
    fn test_restore_accepts_consistent_history() {
        let restored = Instance::restore(order_table(), confirmed_snapshot()).unwrap();
        assert!(restored.is("processing"));
        assert_eq!(
            restored.last_transition().map(|r| r.to.as_str()),
            Some("processing")
        );
    }

    #[test]
    fn test_outcome_success_flag_checked() {
        let applied: TransitionOutcome = serde_json::from_value(serde_json::json!({
            "success": true, "from": "pending", "to": "confirmed", "event": "confirm"
        }))
        .unwrap();
        assert!(applied.is_success());

        let rejected: TransitionOutcome = serde_json::from_value(serde_json::json!({
            "success": false, "error": "invalid_transition", "reason": "no"
        }))
        .unwrap();
        assert!(!rejected.is_success());

        let mislabeled = serde_json::from_value::<TransitionOutcome>(serde_json::json!({
            "success": false, "from": "pending", "to": "confirmed", "event": "confirm"
        }));
        assert!(mislabeled.is_err());

        let incomplete = serde_json::from_value::<TransitionOutcome>(serde_json::json!({
            "success": true, "error": "invalid_transition", "reason": "no"
        }));
        assert!(incomplete.is_err());
    }

    #[test]
    fn test_snapshot_json_keeps_non_finite_context() {
        let mut order = Instance::new(order_table(), "pending").unwrap();
        order.set("rate", f64::INFINITY);
        order.set("discount", 0.1);

        let snapshot = order.snapshot();
        let json = serde_json::to_string(&snapshot).unwrap();
        let parsed: InstanceSnapshot = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed, snapshot);
        assert!(order.get("rate").unwrap().is_null());
    }
}
