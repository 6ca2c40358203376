//! Hand-assembled class files and a small bytecode interpreter for tests.

#![allow(dead_code)]

use std::collections::HashMap;

use classpatch::classfile::opcodes::*;
use classpatch::classfile::{ClassFile, CpInfo, Insn, Instruction, Label, Operand};
use classpatch::descriptor::MethodDescriptor;

pub struct CpBuilder {
    entries: Vec<Vec<u8>>,
    utf8s: HashMap<String, u16>,
}

impl CpBuilder {
    pub fn new() -> Self {
        Self { entries: Vec::new(), utf8s: HashMap::new() }
    }

    pub fn push(&mut self, entry: Vec<u8>) -> u16 {
        self.entries.push(entry);
        self.entries.len() as u16
    }

    pub fn utf8(&mut self, s: &str) -> u16 {
        if let Some(&index) = self.utf8s.get(s) {
            return index;
        }
        let mut entry = Vec::new();
        entry.push(1);
        entry.extend_from_slice(&(s.len() as u16).to_be_bytes());
        entry.extend_from_slice(s.as_bytes());
        let index = self.push(entry);
        self.utf8s.insert(s.to_owned(), index);
        index
    }

    pub fn class(&mut self, name: &str) -> u16 {
        let name_index = self.utf8(name);
        let mut entry = Vec::new();
        entry.push(7);
        entry.extend_from_slice(&name_index.to_be_bytes());
        self.push(entry)
    }

    pub fn name_and_type(&mut self, name: &str, descriptor: &str) -> u16 {
        let name_index = self.utf8(name);
        let descriptor_index = self.utf8(descriptor);
        let mut entry = Vec::new();
        entry.push(12);
        entry.extend_from_slice(&name_index.to_be_bytes());
        entry.extend_from_slice(&descriptor_index.to_be_bytes());
        self.push(entry)
    }

    pub fn methodref(&mut self, owner: &str, name: &str, descriptor: &str) -> u16 {
        let class_index = self.class(owner);
        let name_and_type_index = self.name_and_type(name, descriptor);
        let mut entry = Vec::new();
        entry.push(10);
        entry.extend_from_slice(&class_index.to_be_bytes());
        entry.extend_from_slice(&name_and_type_index.to_be_bytes());
        self.push(entry)
    }

    pub fn integer(&mut self, value: i32) -> u16 {
        let mut entry = Vec::new();
        entry.push(3);
        entry.extend_from_slice(&value.to_be_bytes());
        self.push(entry)
    }

    /// Takes two slots; the second is left empty.
    pub fn long(&mut self, value: i64) -> u16 {
        let mut entry = Vec::new();
        entry.push(5);
        entry.extend_from_slice(&value.to_be_bytes());
        let index = self.push(entry);
        self.entries.push(Vec::new());
        index
    }

    pub fn module(&mut self, name: &str) -> u16 {
        let name_index = self.utf8(name);
        let mut entry = Vec::new();
        entry.push(19);
        entry.extend_from_slice(&name_index.to_be_bytes());
        self.push(entry)
    }

    pub fn package(&mut self, name: &str) -> u16 {
        let name_index = self.utf8(name);
        let mut entry = Vec::new();
        entry.push(20);
        entry.extend_from_slice(&name_index.to_be_bytes());
        self.push(entry)
    }

    /// Writes `constant_pool_count` and the entries.
    pub fn write(&self, out: &mut Vec<u8>) {
        u2(out, (self.entries.len() + 1) as u16);
        for entry in &self.entries {
            out.extend_from_slice(entry);
        }
    }
}

pub fn u1(out: &mut Vec<u8>, v: u8) {
    out.push(v);
}

pub fn u2(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_be_bytes());
}

pub fn u4(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_be_bytes());
}

pub fn push_attr(out: &mut Vec<u8>, name_index: u16, info: &[u8]) {
    u2(out, name_index);
    u4(out, info.len() as u32);
    out.extend_from_slice(info);
}

/// A method body to assemble. `frames` is the raw `StackMapTable` payload.
#[derive(Default)]
pub struct Body {
    pub max_stack: u16,
    pub max_locals: u16,
    pub code: Vec<u8>,
    pub exceptions: Vec<[u16; 4]>,
    pub frames: Option<Vec<u8>>,
    pub lines: Vec<(u16, u16)>,
}

impl Body {
    pub fn new(max_stack: u16, max_locals: u16, code: Vec<u8>) -> Self {
        Self { max_stack, max_locals, code, ..Self::default() }
    }

    pub fn frames(mut self, count: u16, entries: &[u8]) -> Self {
        let mut info = Vec::new();
        u2(&mut info, count);
        info.extend_from_slice(entries);
        self.frames = Some(info);
        self
    }

    pub fn exception(mut self, start: u16, end: u16, handler: u16, catch_type: u16) -> Self {
        self.exceptions.push([start, end, handler, catch_type]);
        self
    }

    pub fn line(mut self, pc: u16, line: u16) -> Self {
        self.lines.push((pc, line));
        self
    }
}

pub struct ClassBuilder {
    pub cp: CpBuilder,
    major: u16,
    this_class: u16,
    super_class: u16,
    fields: Vec<u8>,
    field_count: u16,
    methods: Vec<u8>,
    method_count: u16,
}

impl ClassBuilder {
    pub fn new(name: &str, major: u16) -> Self {
        let mut cp = CpBuilder::new();
        let this_class = cp.class(name);
        let super_class = cp.class("java/lang/Object");
        Self {
            cp,
            major,
            this_class,
            super_class,
            fields: Vec::new(),
            field_count: 0,
            methods: Vec::new(),
            method_count: 0,
        }
    }

    pub fn field(&mut self, access: u16, name: &str, descriptor: &str) -> &mut Self {
        let name_index = self.cp.utf8(name);
        let descriptor_index = self.cp.utf8(descriptor);
        u2(&mut self.fields, access);
        u2(&mut self.fields, name_index);
        u2(&mut self.fields, descriptor_index);
        u2(&mut self.fields, 0);
        self.field_count += 1;
        self
    }

    pub fn method(&mut self, access: u16, name: &str, descriptor: &str, body: Body) -> &mut Self {
        let name_index = self.cp.utf8(name);
        let descriptor_index = self.cp.utf8(descriptor);
        let code_name = self.cp.utf8("Code");

        let mut info = Vec::new();
        u2(&mut info, body.max_stack);
        u2(&mut info, body.max_locals);
        u4(&mut info, body.code.len() as u32);
        info.extend_from_slice(&body.code);
        u2(&mut info, body.exceptions.len() as u16);
        for entry in &body.exceptions {
            entry.iter().for_each(|v| u2(&mut info, *v));
        }

        let mut attrs = Vec::new();
        let mut attr_count = 0;
        if !body.lines.is_empty() {
            let lnt = self.cp.utf8("LineNumberTable");
            let mut lnt_info = Vec::new();
            u2(&mut lnt_info, body.lines.len() as u16);
            for (pc, line) in &body.lines {
                u2(&mut lnt_info, *pc);
                u2(&mut lnt_info, *line);
            }
            push_attr(&mut attrs, lnt, &lnt_info);
            attr_count += 1;
        }
        if let Some(frames) = &body.frames {
            let smt = self.cp.utf8("StackMapTable");
            push_attr(&mut attrs, smt, frames);
            attr_count += 1;
        }
        u2(&mut info, attr_count);
        info.extend_from_slice(&attrs);

        u2(&mut self.methods, access);
        u2(&mut self.methods, name_index);
        u2(&mut self.methods, descriptor_index);
        u2(&mut self.methods, 1);
        push_attr(&mut self.methods, code_name, &info);
        self.method_count += 1;
        self
    }

    pub fn abstract_method(&mut self, access: u16, name: &str, descriptor: &str) -> &mut Self {
        let name_index = self.cp.utf8(name);
        let descriptor_index = self.cp.utf8(descriptor);
        u2(&mut self.methods, access | 0x0400);
        u2(&mut self.methods, name_index);
        u2(&mut self.methods, descriptor_index);
        u2(&mut self.methods, 0);
        self.method_count += 1;
        self
    }

    pub fn build(&mut self) -> Vec<u8> {
        let mut bytes = Vec::new();
        u4(&mut bytes, 0xCAFEBABE);
        u2(&mut bytes, 0);
        u2(&mut bytes, self.major);
        self.cp.write(&mut bytes);
        u2(&mut bytes, 0x0021);
        u2(&mut bytes, self.this_class);
        u2(&mut bytes, self.super_class);
        u2(&mut bytes, 0);
        u2(&mut bytes, self.field_count);
        bytes.extend_from_slice(&self.fields);
        u2(&mut bytes, self.method_count);
        bytes.extend_from_slice(&self.methods);
        u2(&mut bytes, 0);
        bytes
    }
}

/// `invokestatic` of a method reference, as raw bytes.
pub fn invokestatic(cp: &mut CpBuilder, owner: &str, name: &str, descriptor: &str) -> Vec<u8> {
    let index = cp.methodref(owner, name, descriptor);
    let mut out = vec![INVOKESTATIC];
    u2(&mut out, index);
    out
}

pub fn method<'a>(class: &'a ClassFile, name: &str, descriptor: &str) -> &'a classpatch::classfile::MethodInfo {
    class
        .methods
        .iter()
        .find(|m| m.name(&class.constant_pool).unwrap() == name && m.descriptor(&class.constant_pool).unwrap() == descriptor)
        .unwrap_or_else(|| panic!("no method {name}{descriptor}"))
}

/// `owner.name` of the method an `invokestatic` calls.
pub fn call_target(class: &ClassFile, op: &Instruction) -> Option<String> {
    let Operand::Constant(index) = op.operand else { return None };
    if op.opcode != INVOKESTATIC {
        return None;
    }
    let (owner, name, _) = method_ref(class, index);
    Some(format!("{owner}.{name}"))
}

fn method_ref(class: &ClassFile, index: u16) -> (String, String, String) {
    let cp = &class.constant_pool;
    let CpInfo::Methodref { class_index, name_and_type_index } = cp.get(index).unwrap() else {
        panic!("#{index} is not a method reference");
    };
    let CpInfo::NameAndType { name_index, descriptor_index } = cp.get(*name_and_type_index).unwrap() else {
        panic!("#{name_and_type_index} is not a name and type");
    };
    (
        cp.class_name(*class_index).unwrap().to_owned(),
        cp.get_utf8(*name_index).unwrap().to_owned(),
        cp.get_utf8(*descriptor_index).unwrap().to_owned(),
    )
}

/// Calls to `owner.name` in a method body.
pub fn count_calls(class: &ClassFile, method: &classpatch::classfile::MethodInfo, target: &str) -> usize {
    method
        .code()
        .unwrap()
        .ops()
        .filter(|(_, op)| call_target(class, op).as_deref() == Some(target))
        .count()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Int(i32),
    Ref(String),
    Null,
}

type HookFn = Box<dyn Fn(&[Value]) -> Option<Value>>;

/// Interprets the int/reference subset of the instruction set, calling Rust
/// closures for every `invokestatic`.
pub struct Machine<'a> {
    class: &'a ClassFile,
    hooks: HashMap<String, HookFn>,
    pub calls: Vec<(String, Vec<Value>)>,
}

impl<'a> Machine<'a> {
    pub fn new(class: &'a ClassFile) -> Self {
        Self { class, hooks: HashMap::new(), calls: Vec::new() }
    }

    pub fn hook(mut self, target: &str, f: impl Fn(&[Value]) -> Option<Value> + 'static) -> Self {
        self.hooks.insert(target.to_owned(), Box::new(f));
        self
    }

    pub fn called(&self) -> Vec<&str> {
        self.calls.iter().map(|(name, _)| name.as_str()).collect()
    }

    /// Runs a method; `locals` starts with `this` for instance methods.
    pub fn run(&mut self, name: &str, descriptor: &str, locals: Vec<Value>) -> Option<Value> {
        let class = self.class;
        let code = method(class, name, descriptor).code().unwrap();
        let insns = code.instructions();
        let labels: HashMap<Label, usize> = insns
            .iter()
            .enumerate()
            .filter_map(|(i, insn)| match insn {
                Insn::Label(l) => Some((*l, i)),
                Insn::Op(_) => None,
            })
            .collect();

        let mut frame = locals;
        frame.resize(code.max_locals as usize, Value::Null);
        let mut stack: Vec<Value> = Vec::new();
        let mut pc = 0;
        let mut steps = 0;

        let int = |v: Value| match v {
            Value::Int(i) => i,
            other => panic!("expected int, got {other:?}"),
        };

        loop {
            steps += 1;
            assert!(steps < 10_000, "runaway execution");
            let op = match &insns[pc] {
                Insn::Label(_) => {
                    pc += 1;
                    continue;
                }
                Insn::Op(op) => op.clone(),
            };
            pc += 1;
            match (op.opcode, &op.operand) {
                (NOP, _) => {}
                (ACONST_NULL, _) => stack.push(Value::Null),
                (ICONST_M1..=ICONST_5, _) => stack.push(Value::Int(op.opcode as i32 - ICONST_0 as i32)),
                (BIPUSH, Operand::Byte(v)) => stack.push(Value::Int(*v as i32)),
                (SIPUSH, Operand::Short(v)) => stack.push(Value::Int(*v as i32)),
                (ILOAD | ALOAD, Operand::Local(i)) => stack.push(frame[*i as usize].clone()),
                (0x1a..=0x1d, _) => stack.push(frame[(op.opcode - 0x1a) as usize].clone()),
                (0x2a..=0x2d, _) => stack.push(frame[(op.opcode - 0x2a) as usize].clone()),
                (ISTORE | ASTORE, Operand::Local(i)) => frame[*i as usize] = stack.pop().unwrap(),
                (0x3b..=0x3e, _) => frame[(op.opcode - 0x3b) as usize] = stack.pop().unwrap(),
                (0x4b..=0x4e, _) => frame[(op.opcode - 0x4b) as usize] = stack.pop().unwrap(),
                (POP, _) => {
                    stack.pop().unwrap();
                }
                (DUP, _) => {
                    let top = stack.last().unwrap().clone();
                    stack.push(top);
                }
                (IADD, _) => {
                    let b = int(stack.pop().unwrap());
                    let a = int(stack.pop().unwrap());
                    stack.push(Value::Int(a.wrapping_add(b)));
                }
                (IINC, Operand::Iinc { index, delta }) => {
                    let v = int(frame[*index as usize].clone());
                    frame[*index as usize] = Value::Int(v + *delta as i32);
                }
                (IFEQ | IFNE, Operand::Branch(target)) => {
                    let v = int(stack.pop().unwrap());
                    if (v == 0) == (op.opcode == IFEQ) {
                        pc = labels[target];
                    }
                }
                (GOTO, Operand::Branch(target)) => pc = labels[target],
                (TABLESWITCH, Operand::TableSwitch { default, low, targets }) => {
                    let v = int(stack.pop().unwrap());
                    let target = usize::try_from(v - low).ok().and_then(|i| targets.get(i)).unwrap_or(default);
                    pc = labels[target];
                }
                (IRETURN | ARETURN, _) => return stack.pop(),
                (RETURN, _) => return None,
                (INVOKESTATIC, Operand::Constant(index)) => {
                    let (owner, name, descriptor) = method_ref(class, *index);
                    let sig = MethodDescriptor::parse(&descriptor).unwrap();
                    let args = stack.split_off(stack.len() - sig.params.len());
                    let key = format!("{owner}.{name}");
                    let hook = self.hooks.get(&key).unwrap_or_else(|| panic!("no hook for {key}"));
                    let result = hook(&args);
                    assert_eq!(result.is_some(), !sig.is_void(), "{key} result does not match its descriptor");
                    self.calls.push((key, args));
                    stack.extend(result);
                }
                (opcode, _) => panic!("unsupported opcode {opcode:#04x}"),
            }
        }
    }
}
