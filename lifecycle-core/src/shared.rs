//! Lock-protected instance handle for callers that share one entity.
//!
//! Every mutation runs inside a single write-lock critical section, so a
//! `transition` racing with another `transition` on the same entity observes
//! either the state before or after it, never a half-applied one.

use crate::context::ContextValue;
use crate::definition::State;
use crate::instance::{Instance, InstanceSnapshot, TransitionRecord, TransitionResult};
use parking_lot::RwLock;
use std::sync::Arc;

/// Cloneable handle to one instance.
#[derive(Debug, Clone)]
pub struct SharedInstance {
    inner: Arc<RwLock<Instance>>,
}

impl SharedInstance {
    pub fn new(instance: Instance) -> Self {
        Self {
            inner: Arc::new(RwLock::new(instance)),
        }
    }

    pub fn current_state(&self) -> State {
        self.inner.read().current_state().clone()
    }

    pub fn is(&self, state: &str) -> bool {
        self.inner.read().is(state)
    }

    pub fn can(&self, event: &str) -> bool {
        self.inner.read().can(event)
    }

    pub fn available_events(&self) -> Vec<String> {
        self.inner
            .read()
            .available_events()
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    pub fn transition(&self, event: &str) -> TransitionResult {
        self.inner.write().transition(event)
    }

    /// Fires `event` only if the entity is still in `expected`.
    ///
    /// Lets a caller check context, decide, and transition without another
    /// writer moving the entity in between.
    pub fn transition_from(&self, expected: &str, event: &str) -> Option<TransitionResult> {
        let mut instance = self.inner.write();
        if !instance.is(expected) {
            return None;
        }
        Some(instance.transition(event))
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<ContextValue>) {
        self.inner.write().set(key, value);
    }

    pub fn get(&self, key: &str) -> Option<ContextValue> {
        self.inner.read().get(key).cloned()
    }

    pub fn history(&self) -> Vec<TransitionRecord> {
        self.inner.read().history().to_vec()
    }

    pub fn last_transition(&self) -> Option<TransitionRecord> {
        self.inner.read().last_transition().cloned()
    }

    pub fn snapshot(&self) -> InstanceSnapshot {
        self.inner.read().snapshot()
    }

    /// Runs `f` with exclusive access.
    pub fn with<R>(&self, f: impl FnOnce(&mut Instance) -> R) -> R {
        f(&mut self.inner.write())
    }
}

impl From<Instance> for SharedInstance {
    fn from(instance: Instance) -> Self {
        Self::new(instance)
    }
}
