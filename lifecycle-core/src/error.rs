//! Core error types.

use thiserror::Error;

/// Errors raised while building a transition table or instance.
///
/// These are fatal to the build attempt: no table or instance is produced.
#[derive(Debug, Error)]
pub enum DefinitionError {
    #[error("invalid machine definition: no states declared")]
    EmptyStates,

    #[error("invalid machine definition: transition '{event}' has no source states")]
    EmptySources { event: String },

    #[error("invalid machine definition: transition {role} '{state}' not in states list")]
    UndeclaredState { state: String, role: &'static str },

    #[error("invalid machine definition: initial state '{state}' not in states list")]
    InitialNotDeclared { state: String },

    #[error("invalid machine definition: no initial state set")]
    MissingInitial,

    #[error("invalid machine definition: duplicate transition from '{state}' on event '{event}'")]
    AmbiguousTransition { event: String, state: String },

    #[error("invalid snapshot: {reason}")]
    InvalidSnapshot { reason: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl DefinitionError {
    /// Returns an error code suitable for API responses.
    pub fn error_code(&self) -> &'static str {
        match self {
            DefinitionError::Json(_) | DefinitionError::Yaml(_) => "bad_request",
            _ => "invalid_definition",
        }
    }
}

/// Runtime transition failure. The instance is left untouched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("Cannot transition '{event}' from state '{state}'")]
    InvalidTransition { event: String, state: String },
}

impl TransitionError {
    /// Returns the error code reported in transition outcomes.
    pub fn error_code(&self) -> &'static str {
        match self {
            TransitionError::InvalidTransition { .. } => "invalid_transition",
        }
    }

    /// Human readable reason, e.g. `Cannot transition 'ship' from state 'pending'`.
    pub fn reason(&self) -> String {
        self.to_string()
    }
}

/// Errors from the definition registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("machine not found: {machine}")]
    MachineNotFound { machine: String },

    #[error("machine version not found: {machine} v{version}")]
    VersionNotFound { machine: String, version: u32 },

    #[error("machine version already exists: {machine} v{version}")]
    VersionExists { machine: String, version: u32 },

    #[error(transparent)]
    Definition(#[from] DefinitionError),
}

impl RegistryError {
    pub fn error_code(&self) -> &'static str {
        match self {
            RegistryError::MachineNotFound { .. } => "machine_not_found",
            RegistryError::VersionNotFound { .. } => "machine_not_found",
            RegistryError::VersionExists { .. } => "machine_version_exists",
            RegistryError::Definition(e) => e.error_code(),
        }
    }
}
