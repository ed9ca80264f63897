//! # lifecycle-core
//!
//! Finite-state-machine engine for entity lifecycles (orders, payments,
//! articles).
//!
//! This crate provides:
//! - Transition table construction and validation
//! - Instance state, context and transition history
//! - A fluent builder and a JSON/YAML definition DSL
//! - A lock-protected handle and a definition registry for embedding

pub mod builder;
pub mod context;
pub mod definition;
pub mod error;
pub mod instance;
pub mod registry;
pub mod shared;

pub use builder::StateMachineBuilder;
pub use context::{Context, ContextValue};
pub use definition::{MachineDefinition, Sources, State, TransitionRule, TransitionTable};
pub use error::{DefinitionError, RegistryError, TransitionError};
pub use instance::{
    Instance, InstanceSnapshot, TransitionOutcome, TransitionRecord, TransitionResult,
};
pub use registry::DefinitionRegistry;
pub use shared::SharedInstance;
