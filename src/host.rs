//! Host integration.
//!
//! The runtime that loads classes is modelled by [`Instrumentation`]. Hosts
//! differ in what they can do; retransforming classes that were loaded before
//! the agent is an optional capability exposed through
//! [`Instrumentation::retransform`] rather than probed for at run time.

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::config::{FailurePolicy, PatcherConfig};
use crate::error::{HostError, PatchError};
use crate::manager::ScriptManager;
use crate::transform::{ClassFileTransformer, ClassPatcher};

/// Re-presents already loaded classes to the registered transformers.
pub trait Retransform {
    fn retransform_class(&self, class_name: &str) -> Result<(), String>;
}

pub trait Instrumentation {
    /// Registers a transformer for every subsequent class load and, when
    /// `can_retransform` is set, for retransformation requests.
    fn add_transformer(&self, transformer: Arc<dyn ClassFileTransformer>, can_retransform: bool) -> Result<(), HostError>;

    /// Internal names of the classes loaded so far.
    fn loaded_classes(&self) -> Vec<String>;

    /// The retransformation capability, if the host has one.
    fn retransform(&self) -> Option<&dyn Retransform> {
        None
    }
}

/// Applies a [`FailurePolicy`] to the errors of the wrapped transformer.
#[derive(Debug, Clone)]
pub struct PolicyTransformer<T> {
    inner: T,
    policy: FailurePolicy,
}

impl<T> PolicyTransformer<T> {
    pub fn new(inner: T, policy: FailurePolicy) -> Self {
        Self { inner, policy }
    }

    pub fn policy(&self) -> FailurePolicy {
        self.policy
    }
}

impl<T: ClassFileTransformer> ClassFileTransformer for PolicyTransformer<T> {
    fn transform(&self, class_name: &str, class_bytes: &[u8]) -> Result<Option<Vec<u8>>, PatchError> {
        match self.inner.transform(class_name, class_bytes) {
            Err(err) if self.policy == FailurePolicy::LeaveUnpatched => {
                error!(class = err.class_name(), script = err.script(), error = %err, "class left unpatched");
                Ok(None)
            }
            result => result,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallReport {
    /// Target classes that were already loaded and have been retransformed.
    pub retransformed: Vec<String>,
    /// Target classes that were already loaded and stay unpatched.
    pub already_loaded: Vec<String>,
}

/// Registers a patcher for `manager` with the host.
///
/// With `config.retransform` set, target classes the host already loaded are
/// retransformed through the new transformer; a host without that capability
/// fails with [`HostError::RetransformUnsupported`] naming them.
pub fn install(
    inst: &dyn Instrumentation,
    manager: Arc<ScriptManager>,
    config: &PatcherConfig,
) -> Result<InstallReport, HostError> {
    let patcher = PolicyTransformer::new(ClassPatcher::new(Arc::clone(&manager)), config.on_error);
    inst.add_transformer(Arc::new(patcher), config.retransform)?;
    info!(scripts = manager.len(), classes = manager.target_classes().len(), "class patcher installed");

    let loaded: Vec<String> = inst.loaded_classes().into_iter().filter(|c| manager.is_target(c)).collect();
    let mut report = InstallReport::default();
    if loaded.is_empty() {
        return Ok(report);
    }

    if !config.retransform {
        warn!(classes = ?loaded, "target classes were loaded before the agent and stay unpatched");
        report.already_loaded = loaded;
        return Ok(report);
    }

    let Some(retransform) = inst.retransform() else {
        return Err(HostError::RetransformUnsupported { classes: loaded });
    };
    for class in loaded {
        retransform
            .retransform_class(&class)
            .map_err(|reason| HostError::RetransformFailed { class: class.clone(), reason })?;
        info!(class = %class, "retransformed");
        report.retransformed.push(class);
    }
    Ok(report)
}
