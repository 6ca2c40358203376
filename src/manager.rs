//! The script registry.
//!
//! Scripts are registered on a [`ScriptManagerBuilder`] during setup and the
//! builder is then frozen into a [`ScriptManager`]. The frozen manager has no
//! registration API, so every `apply` sees the same scripts in the same order
//! and the manager can be shared across class-loading threads behind an `Arc`.

use std::collections::HashMap;

use tracing::{debug, trace};

use crate::classfile::ClassFile;
use crate::descriptor;
use crate::error::PatchError;
use crate::script::Script;

#[derive(Debug, Clone, Default)]
pub struct ScriptManagerBuilder {
    scripts: Vec<Script>,
}

impl ScriptManagerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a script. Scripts run in registration order, so a later script
    /// sees the class as earlier ones left it.
    pub fn register(&mut self, script: impl Into<Script>) -> &mut Self {
        self.scripts.push(script.into());
        self
    }

    /// By-value form of [`register`](Self::register) for chaining.
    pub fn with(mut self, script: impl Into<Script>) -> Self {
        self.register(script);
        self
    }

    pub fn scripts(&self) -> &[Script] {
        &self.scripts
    }

    pub fn len(&self) -> usize {
        self.scripts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scripts.is_empty()
    }

    /// Freezes the registry.
    pub fn build(self) -> ScriptManager {
        let mut by_class: HashMap<String, Vec<usize>> = HashMap::new();
        for (i, script) in self.scripts.iter().enumerate() {
            for class in script.target_classes() {
                by_class.entry(class.to_owned()).or_default().push(i);
            }
        }
        debug!(scripts = self.scripts.len(), classes = by_class.len(), "script registry frozen");
        ScriptManager { scripts: self.scripts, by_class }
    }
}

impl FromIterator<Script> for ScriptManagerBuilder {
    fn from_iter<I: IntoIterator<Item = Script>>(iter: I) -> Self {
        Self { scripts: iter.into_iter().collect() }
    }
}

/// A frozen, ordered set of scripts.
#[derive(Debug, Clone)]
pub struct ScriptManager {
    scripts: Vec<Script>,
    /// Internal class name to indices into `scripts`, ascending.
    by_class: HashMap<String, Vec<usize>>,
}

impl ScriptManager {
    pub fn builder() -> ScriptManagerBuilder {
        ScriptManagerBuilder::new()
    }

    pub fn scripts(&self) -> &[Script] {
        &self.scripts
    }

    pub fn len(&self) -> usize {
        self.scripts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scripts.is_empty()
    }

    /// Whether any script edits `class_name` (dotted or slashed).
    pub fn is_target(&self, class_name: &str) -> bool {
        self.by_class.contains_key(&descriptor::internal_name(class_name))
    }

    /// Internal names of every class some script edits, sorted.
    pub fn target_classes(&self) -> Vec<&str> {
        let mut classes: Vec<&str> = self.by_class.keys().map(String::as_str).collect();
        classes.sort_unstable();
        classes
    }

    /// Scripts registered for `class_name`, in application order.
    pub fn scripts_for<'a>(&'a self, class_name: &str) -> impl Iterator<Item = &'a Script> + 'a {
        self.by_class
            .get(&descriptor::internal_name(class_name))
            .into_iter()
            .flatten()
            .map(move |&i| &self.scripts[i])
    }

    /// Patches one class binary.
    ///
    /// Returns `Ok(None)` without decoding when no script targets the class,
    /// and after decoding when every matching script was already satisfied.
    /// Otherwise the class is decoded once, every matching script is applied
    /// in registration order and the result is encoded once. Any failure
    /// rejects the whole class.
    pub fn apply(&self, class_name: &str, bytes: &[u8]) -> Result<Option<Vec<u8>>, PatchError> {
        let name = descriptor::internal_name(class_name);
        if !self.by_class.contains_key(&name) {
            trace!(class = %name, "no scripts registered");
            return Ok(None);
        }

        let class = ClassFile::decode(bytes).map_err(|source| PatchError::MalformedClass { class: name.clone(), source })?;
        let Some(patched) = self.apply_class(&name, &class)? else {
            debug!(class = %name, "class already satisfies its scripts");
            return Ok(None);
        };
        let out = patched.encode().map_err(|source| PatchError::Encode { class: name.clone(), source })?;
        debug!(class = %name, before = bytes.len(), after = out.len(), "class patched");
        Ok(Some(out))
    }

    /// Applies the scripts registered for `class_name` to a decoded class;
    /// `Ok(None)` when none of them changed it.
    ///
    /// The class must be the one `class_name` names; bytes of another class
    /// handed over under a registered name are rejected rather than passed
    /// through.
    pub fn apply_class(&self, class_name: &str, class: &ClassFile) -> Result<Option<ClassFile>, PatchError> {
        let requested = descriptor::internal_name(class_name);
        let mut scripts = self.scripts_for(&requested).peekable();
        if let Some(first) = scripts.peek() {
            let found = class
                .name()
                .map_err(|source| PatchError::MalformedClass { class: requested.clone(), source })?;
            if found != requested {
                return Err(PatchError::ClassNameMismatch {
                    class: requested,
                    script: first.to_string(),
                    found: found.to_owned(),
                });
            }
        }

        let mut current: Option<ClassFile> = None;
        for script in scripts {
            let input = current.as_ref().unwrap_or(class);
            if let Some(next) = script.apply(input)? {
                trace!(class = %requested, script = %script, "script applied");
                current = Some(next);
            }
        }
        Ok(current)
    }
}
