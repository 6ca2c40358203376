//! Instruction sequences shared by the code-editing scripts.

use crate::classfile::opcodes::*;
use crate::classfile::{ClassFileError, ConstantPool, Insn, Instruction, Operand};
use crate::descriptor::{self, MethodDescriptor};
use crate::hook::{Hook, StackRequest};

/// The method a hook call is inserted into.
pub(super) struct Site<'a> {
    pub class_name: &'a str,
    pub is_static: bool,
    pub descriptor: &'a MethodDescriptor<'a>,
    /// Whether the value about to be returned may be requested.
    pub has_return_value: bool,
}

/// Where a requested value comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Source {
    Local(u16),
    ReturnValue,
}

/// A request resolved against a site: its type and where to load it from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct Argument {
    pub descriptor: String,
    pub source: Source,
}

impl Site<'_> {
    /// Resolves `requests` and checks them against the hook's parameters.
    pub fn arguments(&self, requests: &[StackRequest], hook: &MethodDescriptor) -> Result<Vec<Argument>, String> {
        let mut args = Vec::with_capacity(requests.len());
        for request in requests {
            let arg = match *request {
                StackRequest::This if self.is_static => {
                    return Err("`this` requested in a static method".to_owned());
                }
                StackRequest::This => Argument { descriptor: format!("L{};", self.class_name), source: Source::Local(0) },
                StackRequest::ReturnValue if !self.has_return_value || self.descriptor.is_void() => {
                    return Err("return value requested where none exists".to_owned());
                }
                StackRequest::ReturnValue => {
                    Argument { descriptor: self.descriptor.ret.to_owned(), source: Source::ReturnValue }
                }
                StackRequest::Param(n) => {
                    let params = &self.descriptor.params;
                    if n == 0 || n as usize > params.len() {
                        return Err(format!("param {n} requested but the method takes {}", params.len()));
                    }
                    let first = if self.is_static { 0 } else { 1 };
                    let slot = first + params[..n as usize - 1].iter().map(|p| descriptor::slot_size(p)).sum::<u16>();
                    Argument { descriptor: params[n as usize - 1].to_owned(), source: Source::Local(slot) }
                }
            };
            args.push(arg);
        }

        if hook.params.len() != args.len() {
            return Err(format!("hook takes {} arguments but {} values are requested", hook.params.len(), args.len()));
        }
        for (i, (arg, param)) in args.iter().zip(&hook.params).enumerate() {
            if !descriptor::assignable(&arg.descriptor, param) {
                return Err(format!(
                    "{} ({}) is not assignable to hook parameter {} ({})",
                    requests[i],
                    arg.descriptor,
                    i + 1,
                    param
                ));
            }
        }
        Ok(args)
    }
}

pub(super) fn load(descriptor: &str, slot: u16) -> Instruction {
    Instruction::local(typed(descriptor, ILOAD), slot)
}

pub(super) fn store(descriptor: &str, slot: u16) -> Instruction {
    Instruction::local(typed(descriptor, ISTORE), slot)
}

/// The `*return` instruction for a return descriptor.
pub(super) fn return_op(descriptor: &str) -> Instruction {
    if descriptor == "V" {
        Instruction::simple(RETURN)
    } else {
        Instruction::simple(typed(descriptor, IRETURN))
    }
}

/// Offsets an `i*` opcode to its `l`, `f`, `d` or `a` sibling; all four
/// families are laid out in that order.
fn typed(descriptor: &str, int_opcode: u8) -> u8 {
    let offset = match descriptor.as_bytes().first() {
        Some(b'J') => 1,
        Some(b'F') => 2,
        Some(b'D') => 3,
        Some(b'L' | b'[') => 4,
        _ => 0,
    };
    int_opcode + offset
}

/// Pops a value of the given type.
pub(super) fn pop(descriptor: &str) -> Instruction {
    Instruction::simple(if descriptor::slot_size(descriptor) == 2 { POP2 } else { POP })
}

/// Duplicates a value of the given type.
pub(super) fn dup(descriptor: &str) -> Instruction {
    Instruction::simple(if descriptor::slot_size(descriptor) == 2 { DUP2 } else { DUP })
}

pub(super) fn invoke(cp: &mut ConstantPool, hook: &Hook) -> Result<Instruction, ClassFileError> {
    let index = cp.ensure_method_ref(hook.owner(), hook.name(), hook.descriptor())?;
    Ok(Instruction::constant(INVOKESTATIC, index))
}

/// Loads each argument; `return_slot` holds the return value when it was spilled.
pub(super) fn load_arguments(args: &[Argument], return_slot: Option<u16>) -> Vec<Insn> {
    args.iter()
        .filter_map(|arg| match arg.source {
            Source::Local(slot) => Some(load(&arg.descriptor, slot)),
            Source::ReturnValue => return_slot.map(|slot| load(&arg.descriptor, slot)),
        })
        .map(Insn::Op)
        .collect()
}

/// Stack slots the arguments occupy once loaded.
pub(super) fn stack_size(args: &[Argument]) -> u16 {
    args.iter().map(|a| descriptor::slot_size(&a.descriptor)).sum()
}

pub(super) fn push_int(cp: &mut ConstantPool, value: i32) -> Result<Instruction, ClassFileError> {
    Ok(match value {
        -1..=5 => Instruction::simple((ICONST_0 as i32 + value) as u8),
        v if i8::try_from(v).is_ok() => Instruction { opcode: BIPUSH, operand: Operand::Byte(v as i8) },
        v if i16::try_from(v).is_ok() => Instruction { opcode: SIPUSH, operand: Operand::Short(v as i16) },
        v => Instruction::constant(LDC, cp.ensure_integer(v)?),
    })
}

pub(super) fn push_long(cp: &mut ConstantPool, value: i64) -> Result<Instruction, ClassFileError> {
    Ok(match value {
        0 | 1 => Instruction::simple(LCONST_0 + value as u8),
        v => Instruction::constant(LDC2_W, cp.ensure_long(v)?),
    })
}

pub(super) fn push_float(cp: &mut ConstantPool, value: f32) -> Result<Instruction, ClassFileError> {
    let bits = value.to_bits();
    Ok(match [0.0f32, 1.0, 2.0].iter().position(|c| c.to_bits() == bits) {
        Some(i) => Instruction::simple(FCONST_0 + i as u8),
        None => Instruction::constant(LDC, cp.ensure_float(value)?),
    })
}

pub(super) fn push_double(cp: &mut ConstantPool, value: f64) -> Result<Instruction, ClassFileError> {
    let bits = value.to_bits();
    Ok(match [0.0f64, 1.0].iter().position(|c| c.to_bits() == bits) {
        Some(i) => Instruction::simple(DCONST_0 + i as u8),
        None => Instruction::constant(LDC2_W, cp.ensure_double(value)?),
    })
}

/// The zero value of a type: `0`, `0L`, `0.0f`, `0.0`, `false` or `null`.
pub(super) fn push_default(descriptor: &str) -> Option<Instruction> {
    let opcode = match descriptor.as_bytes().first()? {
        b'V' => return None,
        b'J' => LCONST_0,
        b'F' => FCONST_0,
        b'D' => DCONST_0,
        b'L' | b'[' => ACONST_NULL,
        _ => ICONST_0,
    };
    Some(Instruction::simple(opcode))
}
