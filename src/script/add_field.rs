use std::fmt;

use tracing::debug;

use crate::classfile::{ClassFile, FieldInfo};
use crate::descriptor;
use crate::error::PatchError;

use super::Context;

/// Adds a field to a class unless a field with that name already exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddField {
    class_name: String,
    access_flags: u16,
    name: String,
    descriptor: String,
}

impl AddField {
    /// `descriptor` is a field descriptor such as `Z` or `Ljava/lang/Object;`.
    pub fn new(class_name: &str, access_flags: u16, name: &str, descriptor: &str) -> Self {
        Self {
            class_name: descriptor::internal_name(class_name),
            access_flags,
            name: name.to_owned(),
            descriptor: descriptor.to_owned(),
        }
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn field_name(&self) -> &str {
        &self.name
    }

    pub fn field_descriptor(&self) -> &str {
        &self.descriptor
    }

    pub fn access_flags(&self) -> u16 {
        self.access_flags
    }

    pub(super) fn apply(&self, class: &ClassFile, cx: &Context) -> Result<Option<ClassFile>, PatchError> {
        if !descriptor::is_field_descriptor(&self.descriptor) {
            return Err(cx.mismatch(format!("`{}` is not a field descriptor", self.descriptor)));
        }

        if let Some(existing) = class.find_field(&self.name) {
            let found = existing.descriptor(&class.constant_pool).map_err(|e| cx.malformed(e))?;
            if found == self.descriptor {
                debug!(class = cx.class, field = %self.name, "field already present");
                return Ok(None);
            }
            return Err(cx.mismatch(format!(
                "field {} already exists with descriptor {found}, expected {}",
                self.name, self.descriptor
            )));
        }

        let mut patched = class.clone();
        let cp = &mut patched.constant_pool;
        let name_index = cp.ensure_utf8(&self.name).map_err(|e| cx.encode(e))?;
        let descriptor_index = cp.ensure_utf8(&self.descriptor).map_err(|e| cx.encode(e))?;
        patched.fields.push(FieldInfo {
            access_flags: self.access_flags,
            name_index,
            descriptor_index,
            attributes: Vec::new(),
        });
        debug!(class = cx.class, field = %self.name, descriptor = %self.descriptor, "added field");
        Ok(Some(patched))
    }
}

impl fmt::Display for AddField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "add-field {}.{}:{}", self.class_name, self.name, self.descriptor)
    }
}
