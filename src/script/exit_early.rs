use std::fmt;

use tracing::debug;

use crate::classfile::opcodes::{IFEQ, LDC};
use crate::classfile::{ClassFile, ClassFileError, ConstantPool, FrameKind, Insn, Instruction, StackMapFrame};
use crate::descriptor::{self, MethodDescriptor};
use crate::error::PatchError;
use crate::hook::{Hook, StackRequest};
use crate::target::MethodTarget;

use super::emit::{self, Site};
use super::{display_targets, Context};

/// Value returned when the guard hook asks the method to exit.
#[derive(Debug, Clone, PartialEq)]
pub enum EarlyReturn {
    /// `return` for void methods, otherwise the zero value of the return type.
    Default,
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Boolean(bool),
    Null,
    Str(String),
}

impl EarlyReturn {
    /// Checks that the value can be returned from a method returning `ret`.
    fn check(&self, ret: &str) -> Result<(), String> {
        let fits = match self {
            EarlyReturn::Default => true,
            _ if ret == "V" => false,
            EarlyReturn::Int(v) => match ret {
                "I" => true,
                "S" => i16::try_from(*v).is_ok(),
                "B" => i8::try_from(*v).is_ok(),
                "C" => u16::try_from(*v).is_ok(),
                _ => false,
            },
            EarlyReturn::Long(_) => ret == "J",
            EarlyReturn::Float(_) => ret == "F",
            EarlyReturn::Double(_) => ret == "D",
            EarlyReturn::Boolean(_) => ret == "Z",
            EarlyReturn::Null => descriptor::is_reference(ret),
            EarlyReturn::Str(_) => descriptor::assignable("Ljava/lang/String;", ret),
        };
        if fits {
            Ok(())
        } else {
            Err(format!("early return value {self:?} does not fit return type {ret}"))
        }
    }

    /// Pushes the value; `None` for a plain `return`. Call [`check`](Self::check) first.
    fn push(&self, ret: &str, cp: &mut ConstantPool) -> Result<Option<Instruction>, ClassFileError> {
        Ok(Some(match self {
            EarlyReturn::Default | EarlyReturn::Null => return Ok(emit::push_default(ret)),
            EarlyReturn::Int(v) => emit::push_int(cp, *v)?,
            EarlyReturn::Long(v) => emit::push_long(cp, *v)?,
            EarlyReturn::Float(v) => emit::push_float(cp, *v)?,
            EarlyReturn::Double(v) => emit::push_double(cp, *v)?,
            EarlyReturn::Boolean(v) => emit::push_int(cp, *v as i32)?,
            EarlyReturn::Str(s) => Instruction::constant(LDC, cp.ensure_string(s)?),
        }))
    }
}

/// Calls a boolean hook on entry to the target methods and returns early
/// when it answers `true`.
#[derive(Debug, Clone, PartialEq)]
pub struct ExitFromMethodEarly {
    targets: Vec<MethodTarget>,
    hook: Hook,
    value: EarlyReturn,
    requests: Vec<StackRequest>,
}

impl ExitFromMethodEarly {
    pub fn new(target: MethodTarget, hook: Hook) -> Self {
        Self { targets: vec![target], hook, value: EarlyReturn::Default, requests: Vec::new() }
    }

    /// Also guards `target`; it may live in another class.
    pub fn target(mut self, target: MethodTarget) -> Self {
        self.targets.push(target);
        self
    }

    pub fn returning(mut self, value: EarlyReturn) -> Self {
        self.value = value;
        self
    }

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
        if hook.ret != "Z" {
            return Err(cx.mismatch(format!("guard hook {} must return boolean", self.hook)));
        }

        let mut patched: Option<ClassFile> = None;
        for target in self.targets.iter().filter(|t| t.applies_to(cx.class)) {
            let index = cx.resolve(target, class)?;
            let out = patched.get_or_insert_with(|| class.clone());
            self.guard_method(out, index, &hook, cx)?;
            debug!(class = cx.class, target = %target, "inserted early exit");
        }
        Ok(patched)
    }

    fn guard_method(&self, class: &mut ClassFile, index: usize, hook: &MethodDescriptor, cx: &Context) -> Result<(), PatchError> {
        let class_name = class.name().map_err(|e| cx.malformed(e))?.to_owned();
        let uses_stack_maps = class.uses_stack_maps();
        let method = &class.methods[index];
        if method.name(&class.constant_pool).map_err(|e| cx.malformed(e))? == "<init>" {
            return Err(cx.mismatch("constructors cannot exit early".to_owned()));
        }
        let raw = method.descriptor(&class.constant_pool).map_err(|e| cx.malformed(e))?.to_owned();
        let desc = MethodDescriptor::parse(&raw).map_err(|e| cx.mismatch(e.to_string()))?;
        let site = Site { class_name: &class_name, is_static: method.is_static(), descriptor: &desc, has_return_value: false };
        let args = site.arguments(&self.requests, hook).map_err(|reason| cx.mismatch(reason))?;

        self.value.check(desc.ret).map_err(|reason| cx.mismatch(reason))?;

        let cp = &mut class.constant_pool;
        let value = self.value.push(desc.ret, cp).map_err(|e| cx.encode(e))?;
        let call = emit::invoke(cp, &self.hook).map_err(|e| cx.encode(e))?;
        if uses_stack_maps {
            cp.ensure_utf8("StackMapTable").map_err(|e| cx.encode(e))?;
        }

        let code = class.methods[index]
            .code_mut()
            .ok_or_else(|| cx.mismatch("target method has no code (abstract or native)".to_owned()))?;
        let resume = code.new_label();

        let mut guard = emit::load_arguments(&args, None);
        guard.push(Insn::Op(call));
        guard.push(Insn::Op(Instruction::branch(IFEQ, resume)));
        let pushes = value.is_some();
        guard.extend(value.map(Insn::Op));
        guard.push(Insn::Op(emit::return_op(desc.ret)));
        guard.push(Insn::Label(resume));

        // An existing frame at the old entry point already covers the branch target.
        let entry: Vec<_> = code.entry_labels().collect();
        code.insert(0, guard);
        if uses_stack_maps {
            let frames = code.stack_map.get_or_insert_with(Vec::new);
            if !frames.iter().any(|f| entry.contains(&f.label)) {
                frames.insert(0, StackMapFrame { label: resume, kind: FrameKind::Same });
            }
        }

        let needed = emit::stack_size(&args).max(1).max(if pushes { descriptor::slot_size(desc.ret) } else { 0 });
        code.max_stack = code.max_stack.max(needed);
        Ok(())
    }
}

impl fmt::Display for ExitFromMethodEarly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "exit-early {} -> {}", display_targets(&self.targets), self.hook)
    }
}
