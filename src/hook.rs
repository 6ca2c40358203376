//! Hook call targets and the values passed to them.

use std::fmt;

use crate::descriptor::{self, DescriptorError, MethodDescriptor};

/// A static method patched code calls, bound by owner, name and descriptor.
///
/// The hook itself is never loaded by the engine; the descriptor is only
/// checked against the call site when a script is applied.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Hook {
    owner: String,
    name: String,
    descriptor: String,
}

impl Hook {
    /// `owner` may use dots or slashes.
    pub fn new(owner: &str, name: &str, descriptor: &str) -> Self {
        Self { owner: descriptor::internal_name(owner), name: name.to_owned(), descriptor: descriptor.to_owned() }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn descriptor(&self) -> &str {
        &self.descriptor
    }

    pub fn signature(&self) -> Result<MethodDescriptor<'_>, DescriptorError> {
        MethodDescriptor::parse(&self.descriptor)
    }
}

impl fmt::Display for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}{}", self.owner, self.name, self.descriptor)
    }
}

/// A value available at the patched call site. The order of requests is the
/// order of the hook's arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StackRequest {
    This,
    /// The value about to be returned; only meaningful when wrapping returns.
    ReturnValue,
    /// A declared parameter, 1-based.
    Param(u8),
}

impl StackRequest {
    pub const PARAM1: StackRequest = StackRequest::Param(1);
    pub const PARAM2: StackRequest = StackRequest::Param(2);
    pub const PARAM3: StackRequest = StackRequest::Param(3);
}

impl fmt::Display for StackRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StackRequest::This => f.write_str("this"),
            StackRequest::ReturnValue => f.write_str("return value"),
            StackRequest::Param(n) => write!(f, "param {n}"),
        }
    }
}
