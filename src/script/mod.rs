//! Patch scripts.
//!
//! A [`Script`] is one declarative edit: add a field, wrap the return values
//! of a method, or guard a method with an early exit. Scripts are built once,
//! never change afterwards, and are applied to a decoded [`ClassFile`] by
//! [`Script::apply`], which returns an edited copy and leaves its input alone.

mod add_field;
mod emit;
mod exit_early;
mod wrap_return;

use std::fmt;

pub use add_field::AddField;
pub use exit_early::{EarlyReturn, ExitFromMethodEarly};
pub use wrap_return::WrapReturnValue;

use crate::classfile::{ClassFile, ClassFileError};
use crate::error::PatchError;
use crate::target::{self, MethodTarget, ResolveError};

#[derive(Debug, Clone, PartialEq)]
pub enum Script {
    AddField(AddField),
    WrapReturnValue(WrapReturnValue),
    ExitEarly(ExitFromMethodEarly),
}

impl Script {
    /// Internal names of the classes this script edits, without duplicates.
    pub fn target_classes(&self) -> Vec<&str> {
        let mut classes: Vec<&str> = match self {
            Script::AddField(s) => vec![s.class_name()],
            Script::WrapReturnValue(s) => s.targets().iter().map(MethodTarget::class_name).collect(),
            Script::ExitEarly(s) => s.targets().iter().map(MethodTarget::class_name).collect(),
        };
        let mut seen = Vec::with_capacity(classes.len());
        classes.retain(|c| {
            let fresh = !seen.contains(c);
            seen.push(*c);
            fresh
        });
        classes
    }

    /// `class_name` may be dotted or slashed.
    pub fn applies_to(&self, class_name: &str) -> bool {
        self.target_classes().iter().any(|c| target::same_class(c, class_name))
    }

    /// Applies the script to `class`.
    ///
    /// Returns `Ok(None)` when the script does not concern this class or is
    /// already satisfied by it. Errors leave no trace: the input is never
    /// modified.
    pub fn apply(&self, class: &ClassFile) -> Result<Option<ClassFile>, PatchError> {
        let class_name = class.name().map_err(|source| PatchError::MalformedClass {
            class: String::from("<unknown>"),
            source,
        })?;
        let cx = Context { class: class_name, script: self };
        if !self.applies_to(class_name) {
            return Ok(None);
        }
        match self {
            Script::AddField(s) => s.apply(class, &cx),
            Script::WrapReturnValue(s) => s.apply(class, &cx),
            Script::ExitEarly(s) => s.apply(class, &cx),
        }
    }
}

impl From<AddField> for Script {
    fn from(s: AddField) -> Self {
        Script::AddField(s)
    }
}

impl From<WrapReturnValue> for Script {
    fn from(s: WrapReturnValue) -> Self {
        Script::WrapReturnValue(s)
    }
}

impl From<ExitFromMethodEarly> for Script {
    fn from(s: ExitFromMethodEarly) -> Self {
        Script::ExitEarly(s)
    }
}

impl fmt::Display for Script {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Script::AddField(s) => fmt::Display::fmt(s, f),
            Script::WrapReturnValue(s) => fmt::Display::fmt(s, f),
            Script::ExitEarly(s) => fmt::Display::fmt(s, f),
        }
    }
}

fn display_targets(targets: &[MethodTarget]) -> String {
    targets.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
}

/// The class and script an application step reports errors against.
struct Context<'a> {
    class: &'a str,
    script: &'a Script,
}

impl Context<'_> {
    fn mismatch(&self, reason: String) -> PatchError {
        PatchError::SignatureMismatch { class: self.class.to_owned(), script: self.script.to_string(), reason }
    }

    fn malformed(&self, source: ClassFileError) -> PatchError {
        PatchError::MalformedClass { class: self.class.to_owned(), source }
    }

    fn encode(&self, source: ClassFileError) -> PatchError {
        PatchError::Script { class: self.class.to_owned(), script: self.script.to_string(), source }
    }

    fn resolve(&self, target: &MethodTarget, class: &ClassFile) -> Result<usize, PatchError> {
        target.resolve(class).map_err(|err| match err {
            ResolveError::NotFound => PatchError::TargetNotFound {
                class: self.class.to_owned(),
                script: self.script.to_string(),
                target: target.to_string(),
            },
            ResolveError::Ambiguous { count } => PatchError::AmbiguousTarget {
                class: self.class.to_owned(),
                script: self.script.to_string(),
                target: target.to_string(),
                count,
            },
        })
    }
}
