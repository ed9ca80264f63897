//! State machine definition types.
//!
//! A machine is a fixed set of declared states plus transition rules. Rules
//! can be built in code or loaded from a JSON/YAML DSL:
//!
//! ```json
//! {
//!   "states": ["pending", "authorized", "captured", "failed"],
//!   "initial": "pending",
//!   "transitions": [
//!     {"from": "pending", "event": "authorize", "to": "authorized"},
//!     {"from": "authorized", "event": "capture", "to": "captured"},
//!     {"from": ["pending", "authorized"], "event": "fail", "to": "failed"}
//!   ],
//!   "meta": {"owner": "billing"}
//! }
//! ```
//!
//! `meta` is optional and free-form. It is kept verbatim in
//! [`MachineDefinition::raw`] and counts toward the checksum, but the engine
//! never reads it.

use crate::error::DefinitionError;
use crate::instance::Instance;
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

/// A state in the machine.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct State(pub String);

impl State {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for State {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for State {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for State {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for State {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&State> for State {
    fn from(s: &State) -> Self {
        s.clone()
    }
}

/// Source states of a rule: one state or a list of them.
#[derive(Debug, Clone, Default)]
pub struct Sources(Vec<State>);

impl Sources {
    pub fn into_set(self) -> BTreeSet<State> {
        self.0.into_iter().collect()
    }
}

impl From<&str> for Sources {
    fn from(s: &str) -> Self {
        Self(vec![State::from(s)])
    }
}

impl From<String> for Sources {
    fn from(s: String) -> Self {
        Self(vec![State::from(s)])
    }
}

impl From<State> for Sources {
    fn from(s: State) -> Self {
        Self(vec![s])
    }
}

impl<T: Into<State>> From<Vec<T>> for Sources {
    fn from(v: Vec<T>) -> Self {
        Self(v.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<State>, const N: usize> From<[T; N]> for Sources {
    fn from(v: [T; N]) -> Self {
        Self(v.into_iter().map(Into::into).collect())
    }
}

impl From<&[&str]> for Sources {
    fn from(v: &[&str]) -> Self {
        Self(v.iter().map(|s| State::from(*s)).collect())
    }
}

/// A declared edge: `event` is valid from any of `sources` and leads to `target`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionRule {
    pub event: String,
    pub sources: BTreeSet<State>,
    pub target: State,
}

impl TransitionRule {
    pub fn new(
        event: impl Into<String>,
        from: impl Into<Sources>,
        to: impl Into<State>,
    ) -> Self {
        Self {
            event: event.into(),
            sources: from.into().into_set(),
            target: to.into(),
        }
    }
}

/// Validated and indexed set of transition rules.
#[derive(Debug, Clone)]
pub struct TransitionTable {
    /// All declared states.
    states: BTreeSet<State>,

    /// Rules in declaration order.
    rules: Vec<TransitionRule>,

    /// event -> (source -> target).
    index: HashMap<String, HashMap<State, State>>,

    /// source -> events with at least one rule leaving it.
    events_by_state: HashMap<State, BTreeSet<String>>,
}

impl TransitionTable {
    /// Validates the rules against the declared states and indexes them.
    ///
    /// Two rules sharing an event may not share a source state.
    pub fn build<S, R>(states: S, rules: R) -> Result<Self, DefinitionError>
    where
        S: IntoIterator,
        S::Item: Into<State>,
        R: IntoIterator<Item = TransitionRule>,
    {
        let states: BTreeSet<State> = states.into_iter().map(Into::into).collect();
        if states.is_empty() {
            return Err(DefinitionError::EmptyStates);
        }

        let mut index: HashMap<String, HashMap<State, State>> = HashMap::new();
        let mut events_by_state: HashMap<State, BTreeSet<String>> = HashMap::new();
        let mut kept = Vec::new();

        for rule in rules {
            if rule.sources.is_empty() {
                return Err(DefinitionError::EmptySources { event: rule.event });
            }

            if !states.contains(&rule.target) {
                return Err(DefinitionError::UndeclaredState {
                    state: rule.target.0,
                    role: "target",
                });
            }

            let by_source = index.entry(rule.event.clone()).or_default();
            for from in &rule.sources {
                if !states.contains(from) {
                    return Err(DefinitionError::UndeclaredState {
                        state: from.0.clone(),
                        role: "source",
                    });
                }

                if by_source.contains_key(from) {
                    return Err(DefinitionError::AmbiguousTransition {
                        event: rule.event.clone(),
                        state: from.0.clone(),
                    });
                }

                by_source.insert(from.clone(), rule.target.clone());
                events_by_state
                    .entry(from.clone())
                    .or_default()
                    .insert(rule.event.clone());
            }

            kept.push(rule);
        }

        Ok(Self {
            states,
            rules: kept,
            index,
            events_by_state,
        })
    }

    /// Looks up the target for `event` fired in `state`.
    pub fn lookup(&self, event: &str, state: &str) -> Option<&State> {
        self.index.get(event)?.get(state)
    }

    /// Returns every event with a rule leaving `state`.
    pub fn events_from(&self, state: &str) -> BTreeSet<&str> {
        self.events_by_state
            .get(state)
            .map(|events| events.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Returns true if the given state is declared.
    pub fn has_state(&self, state: &str) -> bool {
        self.states.contains(state)
    }

    pub fn states(&self) -> &BTreeSet<State> {
        &self.states
    }

    pub fn rules(&self) -> &[TransitionRule] {
        &self.rules
    }

    /// States with no outgoing transitions.
    pub fn terminal_states(&self) -> Vec<&State> {
        self.states
            .iter()
            .filter(|s| !self.events_by_state.contains_key(s.as_str()))
            .collect()
    }
}

/// A rule as written in the DSL. `from` may be a string or a list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleRaw {
    /// Source state(s).
    #[serde(deserialize_with = "deserialize_from_states")]
    pub from: Vec<State>,

    /// Event that triggers this transition.
    pub event: String,

    /// Target state.
    pub to: State,
}

fn deserialize_from_states<'de, D>(deserializer: D) -> Result<Vec<State>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::{self, Visitor};

    struct FromStatesVisitor;

    impl<'de> Visitor<'de> for FromStatesVisitor {
        type Value = Vec<State>;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a state name or a list of state names")
        }

        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(vec![State::from(v)])
        }

        fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
        where
            A: de::SeqAccess<'de>,
        {
            let mut states = Vec::new();
            while let Some(s) = seq.next_element::<String>()? {
                states.push(State(s));
            }
            Ok(states)
        }
    }

    deserializer.deserialize_any(FromStatesVisitor)
}

impl From<RuleRaw> for TransitionRule {
    fn from(raw: RuleRaw) -> Self {
        TransitionRule::new(raw.event, raw.from, raw.to)
    }
}

/// Raw machine definition as written in a definition file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefinitionRaw {
    /// All valid states.
    pub states: Vec<String>,

    /// Initial state for new instances.
    pub initial: String,

    /// Transitions.
    #[serde(default)]
    pub transitions: Vec<RuleRaw>,

    /// Optional caller metadata, carried as-is.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Value>,
}

/// Named, versioned and validated machine definition.
#[derive(Debug, Clone)]
pub struct MachineDefinition {
    pub name: String,

    pub version: u32,

    /// Shared transition table.
    pub table: Arc<TransitionTable>,

    /// Initial state for new instances.
    pub initial: State,

    /// Original raw definition.
    pub raw: DefinitionRaw,

    /// crc32c of the canonical JSON form.
    pub checksum: String,
}

impl MachineDefinition {
    /// Parses and validates a machine definition from JSON.
    pub fn from_json(
        name: impl Into<String>,
        version: u32,
        json: &serde_json::Value,
    ) -> Result<Self, DefinitionError> {
        let raw: DefinitionRaw = serde_json::from_value(json.clone())?;
        Self::from_raw(name, version, raw)
    }

    /// Parses and validates a machine definition from YAML text.
    pub fn from_yaml(
        name: impl Into<String>,
        version: u32,
        yaml: &str,
    ) -> Result<Self, DefinitionError> {
        let raw: DefinitionRaw = serde_yaml::from_str(yaml)?;
        Self::from_raw(name, version, raw)
    }

    /// Creates a machine definition from raw parts.
    pub fn from_raw(
        name: impl Into<String>,
        version: u32,
        raw: DefinitionRaw,
    ) -> Result<Self, DefinitionError> {
        let rules = raw.transitions.iter().cloned().map(TransitionRule::from);
        let table = TransitionTable::build(raw.states.iter().map(String::as_str), rules)?;

        let initial = State::from(raw.initial.as_str());
        if !table.has_state(initial.as_str()) {
            return Err(DefinitionError::InitialNotDeclared { state: initial.0 });
        }

        let json_bytes = serde_json::to_vec(&raw)?;
        let checksum = format!("{:08x}", crc32c::crc32c(&json_bytes));

        Ok(Self {
            name: name.into(),
            version,
            table: Arc::new(table),
            initial,
            raw,
            checksum,
        })
    }

    /// Creates a fresh instance in the initial state.
    pub fn instantiate(&self) -> Instance {
        Instance::with_valid_initial(self.table.clone(), self.initial.clone())
    }

    /// Returns the raw definition as JSON.
    pub fn to_json(&self) -> Result<serde_json::Value, DefinitionError> {
        Ok(serde_json::to_value(&self.raw)?)
    }
}
