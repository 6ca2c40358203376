//! Common imports for building patch sets.
//!
//! This prelude is intentionally small. It covers the types most agents use
//! to declare scripts and install them, while avoiding over-broad re-exports.

pub use crate::classfile::{ACC_FINAL, ACC_PRIVATE, ACC_PROTECTED, ACC_PUBLIC, ACC_STATIC, ACC_TRANSIENT, ACC_VOLATILE};
pub use crate::config::{FailurePolicy, PatcherConfig};
pub use crate::error::PatchError;
pub use crate::hook::{Hook, StackRequest};
pub use crate::manager::{ScriptManager, ScriptManagerBuilder};
pub use crate::script::{AddField, EarlyReturn, ExitFromMethodEarly, Script, WrapReturnValue};
pub use crate::target::MethodTarget;
pub use crate::transform::{ClassFileTransformer, ClassPatcher};
