//! Fluent construction of transition tables and instances.

use crate::definition::{Sources, State, TransitionRule, TransitionTable};
use crate::error::DefinitionError;
use crate::instance::Instance;
use std::sync::Arc;

/// Builder for constructing state machines with a fluent API.
///
/// Calls may come in any order; `build()` comes last and runs the same
/// validation as [`TransitionTable::build`].
///
/// ```rust
/// use lifecycle_core::StateMachineBuilder;
///
/// let mut order = StateMachineBuilder::new()
///     .initial("pending")
///     .states_list(["pending", "confirmed", "cancelled"])
///     .transition("confirm", "pending", "confirmed")
///     .transition("cancel", ["pending", "confirmed"], "cancelled")
///     .build()
///     .unwrap();
///
/// assert!(order.transition("confirm").is_ok());
/// assert!(order.is("confirmed"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct StateMachineBuilder {
    initial: Option<State>,
    states: Vec<State>,
    rules: Vec<TransitionRule>,
}

impl StateMachineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the initial state (required for `build`).
    pub fn initial(mut self, state: impl Into<State>) -> Self {
        self.initial = Some(state.into());
        self
    }

    /// Declare states. Repeated calls accumulate.
    pub fn states_list<I>(mut self, states: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<State>,
    {
        self.states.extend(states.into_iter().map(Into::into));
        self
    }

    /// Add a rule; `from` is a single state or a list.
    pub fn transition(
        mut self,
        event: impl Into<String>,
        from: impl Into<Sources>,
        to: impl Into<State>,
    ) -> Self {
        self.rules.push(TransitionRule::new(event, from, to));
        self
    }

    /// Validate and return only the transition table.
    pub fn build_table(self) -> Result<Arc<TransitionTable>, DefinitionError> {
        let table = TransitionTable::build(self.states, self.rules)?;
        Ok(Arc::new(table))
    }

    /// Validate and return an instance in the initial state.
    pub fn build(mut self) -> Result<Instance, DefinitionError> {
        let initial = self.initial.take().ok_or(DefinitionError::MissingInitial)?;
        let table = self.build_table()?;
        Instance::new(table, initial)
    }
}
