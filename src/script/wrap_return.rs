use std::fmt;

use tracing::{debug, trace};

use crate::classfile::{opcodes, ClassFile, Insn};
use crate::descriptor::{self, MethodDescriptor};
use crate::error::PatchError;
use crate::hook::{Hook, StackRequest};
use crate::target::MethodTarget;

use super::emit::{self, Site};
use super::{display_targets, Context};

/// Calls a hook before every return of the target methods.
///
/// A hook returning a value replaces the value being returned, so its return
/// type must be assignable to the method's. A `void` hook only observes and
/// the original value is returned unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrapReturnValue {
    targets: Vec<MethodTarget>,
    hook: Hook,
    requests: Vec<StackRequest>,
}

impl WrapReturnValue {
    pub fn new(target: MethodTarget, hook: Hook) -> Self {
        Self { targets: vec![target], hook, requests: Vec::new() }
    }

    /// Also wraps `target`; it may live in another class.
    pub fn target(mut self, target: MethodTarget) -> Self {
        self.targets.push(target);
        self
    }

    /// Appends a value to pass to the hook.
    pub fn request(mut self, request: StackRequest) -> Self {
        self.requests.push(request);
        self
    }

    pub fn requests<I: IntoIterator<Item = StackRequest>>(mut self, requests: I) -> Self {
        self.requests.extend(requests);
        self
    }

    pub fn targets(&self) -> &[MethodTarget] {
        &self.targets
    }

    pub fn hook(&self) -> &Hook {
        &self.hook
    }

    pub(super) fn apply(&self, class: &ClassFile, cx: &Context) -> Result<Option<ClassFile>, PatchError> {
        let hook = self.hook.signature().map_err(|e| cx.mismatch(format!("hook {}: {e}", self.hook)))?;
        let mut patched: Option<ClassFile> = None;

        for target in self.targets.iter().filter(|t| t.applies_to(cx.class)) {
            let index = cx.resolve(target, class)?;
            let out = patched.get_or_insert_with(|| class.clone());
            let sites = wrap_method(out, index, &self.hook, &hook, &self.requests, cx)?;
            debug!(class = cx.class, target = %target, sites, "wrapped return values");
        }
        Ok(patched)
    }
}

fn wrap_method(
    class: &mut ClassFile,
    index: usize,
    hook_ref: &Hook,
    hook: &MethodDescriptor,
    requests: &[StackRequest],
    cx: &Context,
) -> Result<usize, PatchError> {
    let class_name = class.name().map_err(|e| cx.malformed(e))?.to_owned();
    let method = &class.methods[index];
    let raw = method.descriptor(&class.constant_pool).map_err(|e| cx.malformed(e))?.to_owned();
    let desc = MethodDescriptor::parse(&raw).map_err(|e| cx.mismatch(e.to_string()))?;
    let site = Site { class_name: &class_name, is_static: method.is_static(), descriptor: &desc, has_return_value: true };
    let args = site.arguments(requests, hook).map_err(|reason| cx.mismatch(reason))?;

    let replaces = !hook.is_void();
    if replaces {
        if desc.is_void() {
            return Err(cx.mismatch(format!("hook returns {} but the method returns void", hook.ret)));
        }
        if !descriptor::assignable(hook.ret, desc.ret) {
            return Err(cx.mismatch(format!("hook returns {} which is not assignable to {}", hook.ret, desc.ret)));
        }
    }

    let call = emit::invoke(&mut class.constant_pool, hook_ref).map_err(|e| cx.encode(e))?;
    let method = &mut class.methods[index];
    let code = method
        .code_mut()
        .ok_or_else(|| cx.mismatch("target method has no code (abstract or native)".to_owned()))?;

    let ret = desc.ret;
    let width = descriptor::slot_size(ret);
    let passes_only_return_value = requests == [StackRequest::ReturnValue];
    let spills = !passes_only_return_value && requests.contains(&StackRequest::ReturnValue);
    let return_slot = spills.then_some(code.max_locals);

    let mut sequence = Vec::new();
    if passes_only_return_value {
        // The value on the stack is the hook's only argument.
        if !replaces {
            sequence.push(Insn::Op(emit::dup(ret)));
        }
        sequence.push(Insn::Op(call));
    } else if let Some(slot) = return_slot {
        sequence.push(Insn::Op(emit::store(ret, slot)));
        sequence.extend(emit::load_arguments(&args, Some(slot)));
        sequence.push(Insn::Op(call));
        if !replaces {
            sequence.push(Insn::Op(emit::load(ret, slot)));
        }
    } else {
        if replaces {
            sequence.push(Insn::Op(emit::pop(ret)));
        }
        sequence.extend(emit::load_arguments(&args, None));
        sequence.push(Insn::Op(call));
    }

    let sites: Vec<usize> = code
        .ops()
        .filter(|(_, op)| opcodes::is_return(op.opcode))
        .map(|(i, _)| i)
        .collect();
    for &at in sites.iter().rev() {
        code.insert(at, sequence.iter().cloned());
    }
    trace!(sites = sites.len(), inserted = sequence.len(), "hook calls inserted");

    if let Some(slot) = return_slot {
        code.max_locals = slot.saturating_add(width);
    }
    let extra = emit::stack_size(&args) + descriptor::slot_size(hook.ret).max(width);
    code.max_stack = code.max_stack.saturating_add(extra);
    Ok(sites.len())
}

impl fmt::Display for WrapReturnValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "wrap-return {} -> {}", display_targets(&self.targets), self.hook)
    }
}
