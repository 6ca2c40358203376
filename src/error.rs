//! Error types.
//!
//! Every patch failure names the class and the script involved; the engine
//! never retries and never hands back a partially patched class.

use thiserror::Error;

use crate::classfile::ClassFileError;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatchError {
    #[error("{class}: malformed class file: {source}")]
    MalformedClass {
        class: String,
        #[source]
        source: ClassFileError,
    },

    #[error("{class}: [{script}] no method matches {target}")]
    TargetNotFound { class: String, script: String, target: String },

    #[error("{class}: [{script}] {count} methods match {target}; give the parameter types")]
    AmbiguousTarget { class: String, script: String, target: String, count: usize },

    #[error("{class}: [{script}] {reason}")]
    SignatureMismatch { class: String, script: String, reason: String },

    #[error("{class}: [{script}] {source}")]
    Script {
        class: String,
        script: String,
        #[source]
        source: ClassFileError,
    },

    #[error("{class}: [{script}] bytes handed over for {class} decode as {found}")]
    ClassNameMismatch { class: String, script: String, found: String },

    #[error("{class}: patched class cannot be encoded: {source}")]
    Encode {
        class: String,
        #[source]
        source: ClassFileError,
    },
}

impl PatchError {
    /// Internal name of the class the error concerns.
    pub fn class_name(&self) -> &str {
        match self {
            PatchError::MalformedClass { class, .. }
            | PatchError::TargetNotFound { class, .. }
            | PatchError::AmbiguousTarget { class, .. }
            | PatchError::SignatureMismatch { class, .. }
            | PatchError::Script { class, .. }
            | PatchError::ClassNameMismatch { class, .. }
            | PatchError::Encode { class, .. } => class,
        }
    }

    /// Identity of the failing script, when one is to blame.
    pub fn script(&self) -> Option<&str> {
        match self {
            PatchError::TargetNotFound { script, .. }
            | PatchError::AmbiguousTarget { script, .. }
            | PatchError::SignatureMismatch { script, .. }
            | PatchError::Script { script, .. }
            | PatchError::ClassNameMismatch { script, .. } => Some(script),
            PatchError::MalformedClass { .. } | PatchError::Encode { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("unknown option `{0}`")]
    UnknownKey(String),
    #[error("option `{key}` has invalid value `{value}`")]
    InvalidValue { key: String, value: String },
    #[error("option `{0}` must be written as key=value")]
    MissingValue(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostError {
    #[error(
        "classes {} are already loaded and the host cannot retransform them; restart the application with the agent on the command line",
        .classes.join(", ")
    )]
    RetransformUnsupported { classes: Vec<String> },

    #[error("retransformation of {class} failed: {reason}")]
    RetransformFailed { class: String, reason: String },

    #[error("host rejected the transformer: {0}")]
    Registration(String),
}
