//! # classpatch
//!
//! Declarative patch scripts applied to JVM class files as they are loaded.
//!
//! This crate provides the class-editing core of a Java agent:
//! - A class file decoder and encoder with an editable, label-based code model
//! - Three patch scripts: [`AddField`], [`WrapReturnValue`] and [`ExitFromMethodEarly`]
//! - A frozen [`ScriptManager`] applying every matching script in registration order
//! - The [`ClassFileTransformer`] callback the host invokes per class load
//!
//! ## Features
//!
//! - **Fail closed**: a class is either fully patched or rejected with an error
//!   naming the class and the script; it is never half patched
//! - **Checked hooks**: hook signatures are checked against the call site when
//!   the script is applied, not left to the JVM verifier
//! - **Offsets recomputed**: branches, switch tables, exception ranges, debug
//!   tables and stack map frames follow inserted code
//! - **Thread-safe**: the frozen registry is `Send + Sync` and shared via `Arc`
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use classpatch::prelude::*;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut builder = ScriptManager::builder();
//! builder
//!     .register(AddField::new("org.example.Node", ACC_PUBLIC | ACC_TRANSIENT, "$generated", "Z"))
//!     .register(
//!         WrapReturnValue::new(
//!             MethodTarget::new("org.example.Foo", "bar").returns("int")?.params(Vec::<&str>::new())?,
//!             Hook::new("org.example.Hooks", "fix", "(I)I"),
//!         )
//!         .request(StackRequest::ReturnValue),
//!     );
//!
//! let patcher = ClassPatcher::new(Arc::new(builder.build()));
//!
//! // Classes without scripts pass through without being decoded.
//! assert_eq!(patcher.transform("org/example/Other", b"...")?, None);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                 Host runtime (JVM agent)                 │
//! │     host::Instrumentation, host::install, config         │
//! ├─────────────────────────────────────────────────────────┤
//! │                 Class transform callback                 │
//! │   ClassFileTransformer, ClassPatcher, PolicyTransformer  │
//! ├─────────────────────────────────────────────────────────┤
//! │                      Script registry                     │
//! │        ScriptManagerBuilder -> ScriptManager (frozen)    │
//! ├─────────────────────────────────────────────────────────┤
//! │                       Patch scripts                      │
//! │  Script::{AddField, WrapReturnValue, ExitEarly}          │
//! │  MethodTarget, Hook, StackRequest                        │
//! ├─────────────────────────────────────────────────────────┤
//! │                   Class file model                       │
//! │  ClassFile::decode / encode, ConstantPool, CodeAttribute │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`classfile`] | Class file decoding, editing and encoding |
//! | [`descriptor`] | Java type names and descriptors |
//! | [`target`] | [`MethodTarget`] matching and resolution |
//! | [`hook`] | [`Hook`] call targets and [`StackRequest`]s |
//! | [`script`] | The patch scripts |
//! | [`manager`] | [`ScriptManagerBuilder`] and the frozen [`ScriptManager`] |
//! | [`transform`] | The per-class callback |
//! | [`host`] | Installing the patcher into a host, retransformation |
//! | [`config`] | Agent option parsing |
//! | [`presets`] | Built-in script sets |
//!
//! ## Logging
//!
//! The crate logs through [`tracing`]: per-class decisions at `debug`,
//! insertion details at `trace`, and classes left unpatched by
//! [`FailurePolicy::LeaveUnpatched`] at `error`. No subscriber is installed;
//! that is up to the embedding agent.

pub mod classfile;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod hook;
pub mod host;
pub mod manager;
pub mod prelude;
pub mod presets;
pub mod script;
pub mod target;
pub mod transform;

pub use crate::classfile::{ClassFile, ClassFileError};
pub use crate::config::{FailurePolicy, PatcherConfig, Preset};
pub use crate::error::{ConfigError, HostError, PatchError};
pub use crate::hook::{Hook, StackRequest};
pub use crate::manager::{ScriptManager, ScriptManagerBuilder};
pub use crate::script::{AddField, EarlyReturn, ExitFromMethodEarly, Script, WrapReturnValue};
pub use crate::target::{MethodTarget, ResolveError};
pub use crate::transform::{ClassFileTransformer, ClassPatcher};
