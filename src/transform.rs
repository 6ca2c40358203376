//! The class-load callback.
//!
//! The host runtime calls [`ClassFileTransformer::transform`] once for every
//! class it loads or redefines, from whichever thread is loading the class.

use std::sync::Arc;

use tracing::debug;

use crate::descriptor;
use crate::error::PatchError;
use crate::manager::ScriptManager;

/// Receives class binaries from the host before they are defined.
///
/// `Ok(None)` leaves the class as it is; `Ok(Some(bytes))` replaces it. An
/// error aborts loading of that class under the host's rules.
pub trait ClassFileTransformer: Send + Sync {
    fn transform(&self, class_name: &str, class_bytes: &[u8]) -> Result<Option<Vec<u8>>, PatchError>;
}

/// Transformer backed by a frozen [`ScriptManager`].
///
/// Classes no script targets pass through untouched. Registered classes are
/// handed to the manager and its errors are returned as they are.
#[derive(Debug, Clone)]
pub struct ClassPatcher {
    manager: Arc<ScriptManager>,
}

impl ClassPatcher {
    pub fn new(manager: Arc<ScriptManager>) -> Self {
        Self { manager }
    }

    pub fn manager(&self) -> &Arc<ScriptManager> {
        &self.manager
    }
}

impl ClassFileTransformer for ClassPatcher {
    fn transform(&self, class_name: &str, class_bytes: &[u8]) -> Result<Option<Vec<u8>>, PatchError> {
        if !self.manager.is_target(class_name) {
            return Ok(None);
        }
        debug!(class = %descriptor::internal_name(class_name), len = class_bytes.len(), "transforming");
        self.manager.apply(class_name, class_bytes)
    }
}

impl<T: ClassFileTransformer + ?Sized> ClassFileTransformer for Arc<T> {
    fn transform(&self, class_name: &str, class_bytes: &[u8]) -> Result<Option<Vec<u8>>, PatchError> {
        (**self).transform(class_name, class_bytes)
    }
}

impl<T: ClassFileTransformer + ?Sized> ClassFileTransformer for Box<T> {
    fn transform(&self, class_name: &str, class_bytes: &[u8]) -> Result<Option<Vec<u8>>, PatchError> {
        (**self).transform(class_name, class_bytes)
    }
}
