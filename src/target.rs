//! Method targets: which method of which class a script edits.

use std::fmt;

use thiserror::Error;

use crate::classfile::{ClassFile, MethodInfo};
use crate::descriptor::{self, DescriptorError, MethodDescriptor};

/// Identifies a method by class, name and optionally its signature.
///
/// Types are given as Java type names and stored as descriptors. A missing
/// return type or parameter list matches anything; present components are
/// compared literally against the method's descriptor.
///
/// ```
/// use classpatch::MethodTarget;
///
/// let target = MethodTarget::new("org.eclipse.jdt.internal.compiler.parser.Parser", "endParse")
///     .returns("org.eclipse.jdt.internal.compiler.ast.CompilationUnitDeclaration")?
///     .params(["int"])?;
/// assert!(target.applies_to("org/eclipse/jdt/internal/compiler/parser/Parser"));
/// # Ok::<(), classpatch::descriptor::DescriptorError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodTarget {
    class_name: String,
    method_name: String,
    return_type: Option<String>,
    param_types: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("no method matches")]
    NotFound,
    #[error("{count} methods match")]
    Ambiguous { count: usize },
}

impl MethodTarget {
    /// Targets every method called `method_name`; `class_name` may be dotted or slashed.
    pub fn new(class_name: &str, method_name: &str) -> Self {
        Self {
            class_name: descriptor::internal_name(class_name),
            method_name: method_name.to_owned(),
            return_type: None,
            param_types: None,
        }
    }

    pub fn returns(mut self, java_type: &str) -> Result<Self, DescriptorError> {
        self.return_type = Some(descriptor::from_java_type(java_type)?);
        Ok(self)
    }

    /// Sets the exact parameter list. An empty list targets a no-argument method.
    pub fn params<I, S>(mut self, java_types: I) -> Result<Self, DescriptorError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let params = java_types
            .into_iter()
            .map(|t| match descriptor::from_java_type(t.as_ref())? {
                v if v == "V" => Err(DescriptorError(t.as_ref().to_owned())),
                d => Ok(d),
            })
            .collect::<Result<Vec<_>, _>>()?;
        self.param_types = Some(params);
        Ok(self)
    }

    /// Internal (slashed) name of the target class.
    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn method_name(&self) -> &str {
        &self.method_name
    }

    pub fn return_type(&self) -> Option<&str> {
        self.return_type.as_deref()
    }

    pub fn param_types(&self) -> Option<&[String]> {
        self.param_types.as_deref()
    }

    /// Whether this target names `class_name` (dotted or slashed).
    pub fn applies_to(&self, class_name: &str) -> bool {
        same_class(&self.class_name, class_name)
    }

    pub fn matches(&self, class: &ClassFile, method: &MethodInfo) -> bool {
        if !class.name().map_or(false, |name| self.applies_to(name)) {
            return false;
        }
        let cp = &class.constant_pool;
        if method.name(cp).map_or(true, |name| name != self.method_name) {
            return false;
        }
        if self.return_type.is_none() && self.param_types.is_none() {
            return true;
        }
        let Ok(raw) = method.descriptor(cp) else { return false };
        let Ok(desc) = MethodDescriptor::parse(raw) else { return false };

        if let Some(ret) = &self.return_type {
            if desc.ret != ret.as_str() {
                return false;
            }
        }
        if let Some(params) = &self.param_types {
            if desc.params.len() != params.len() || desc.params.iter().zip(params).any(|(a, b)| *a != b.as_str()) {
                return false;
            }
        }
        true
    }

    /// Index into `class.methods` of the one method this target matches.
    pub fn resolve(&self, class: &ClassFile) -> Result<usize, ResolveError> {
        let mut found = class
            .methods
            .iter()
            .enumerate()
            .filter(|(_, m)| self.matches(class, m))
            .map(|(i, _)| i);
        let first = found.next().ok_or(ResolveError::NotFound)?;
        match found.count() {
            0 => Ok(first),
            more => Err(ResolveError::Ambiguous { count: more + 1 }),
        }
    }
}

/// Compares class names ignoring the dotted/slashed spelling difference.
pub(crate) fn same_class(a: &str, b: &str) -> bool {
    a.len() == b.len()
        && a.bytes()
            .zip(b.bytes())
            .all(|(x, y)| x == y || (matches!(x, b'.' | b'/') && matches!(y, b'.' | b'/')))
}

impl fmt::Display for MethodTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.class_name, self.method_name)?;
        match &self.param_types {
            Some(params) => write!(f, "({})", params.concat())?,
            None => f.write_str("(*)")?,
        }
        f.write_str(self.return_type.as_deref().unwrap_or("*"))
    }
}
