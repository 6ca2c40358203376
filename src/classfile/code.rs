//! Method bodies.
//!
//! A decoded body is a flat list of [`Insn`]s: instructions interleaved with
//! [`Label`] markers. Every byte offset the class file refers to (branch and
//! switch targets, exception ranges, stack map frames, debug tables, the
//! operand of `Uninitialized` verification types) becomes a label placed right
//! before the instruction at that offset. Inserting instructions therefore
//! never invalidates a reference, and [`CodeAttribute::encode`] lays the body
//! out again and recomputes every offset.
//!
//! Labels are numbered in ascending offset order, which makes decoding
//! deterministic: an unedited body decodes to the same value after a round trip.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use super::opcodes::{self, OperandKind};
use super::{write_attribute, write_u1, write_u2, write_u4, AttributeNames, ClassFileError, ConstantPool, Reader};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Label(pub u32);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Insn {
    Label(Label),
    Op(Instruction),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub opcode: u8,
    pub operand: Operand,
}

/// Instruction operands. `wide` prefixes are folded into [`Operand::Local`] and
/// [`Operand::Iinc`]; the encoder puts them back when an operand needs them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand {
    None,
    Byte(i8),
    Short(i16),
    Constant(u16),
    Local(u16),
    Iinc { index: u16, delta: i16 },
    Branch(Label),
    TableSwitch { default: Label, low: i32, targets: Vec<Label> },
    LookupSwitch { default: Label, pairs: Vec<(i32, Label)> },
    InvokeInterface { index: u16, count: u8 },
    InvokeDynamic(u16),
    NewArray(u8),
    MultiANewArray { index: u16, dimensions: u8 },
}

impl Instruction {
    pub fn simple(opcode: u8) -> Self {
        Self { opcode, operand: Operand::None }
    }

    pub fn constant(opcode: u8, index: u16) -> Self {
        Self { opcode, operand: Operand::Constant(index) }
    }

    pub fn local(opcode: u8, index: u16) -> Self {
        Self { opcode, operand: Operand::Local(index) }
    }

    pub fn branch(opcode: u8, target: Label) -> Self {
        Self { opcode, operand: Operand::Branch(target) }
    }

    /// Encoded size when the instruction starts at `offset`.
    fn size(&self, offset: u32) -> usize {
        let padding = || (3 - (offset as usize % 4)) % 4 + 1;
        match &self.operand {
            Operand::None => 1,
            Operand::Byte(_) | Operand::NewArray(_) => 2,
            Operand::Short(_) => 3,
            Operand::Constant(index) => {
                if self.opcode == opcodes::LDC && *index <= u8::MAX as u16 { 2 } else { 3 }
            }
            Operand::Local(index) => {
                if *index <= u8::MAX as u16 { 2 } else { 4 }
            }
            Operand::Iinc { index, delta } => {
                if *index <= u8::MAX as u16 && i8::try_from(*delta).is_ok() { 3 } else { 6 }
            }
            Operand::Branch(_) => {
                if matches!(self.opcode, opcodes::GOTO_W | opcodes::JSR_W) { 5 } else { 3 }
            }
            Operand::TableSwitch { targets, .. } => padding() + 12 + 4 * targets.len(),
            Operand::LookupSwitch { pairs, .. } => padding() + 8 + 8 * pairs.len(),
            Operand::InvokeInterface { .. } | Operand::InvokeDynamic(_) => 5,
            Operand::MultiANewArray { .. } => 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionTableEntry {
    pub start: Label,
    pub end: Label,
    pub handler: Label,
    pub catch_type: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineNumberEntry {
    pub start: Label,
    pub line_number: u16,
}

/// Entry of a `LocalVariableTable` or `LocalVariableTypeTable`; `type_index`
/// is the descriptor or the generic signature respectively.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalVariableEntry {
    pub start: Label,
    pub end: Label,
    pub name_index: u16,
    pub type_index: u16,
    pub index: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackMapFrame {
    pub label: Label,
    pub kind: FrameKind,
}

/// Frame types with the offset delta factored out; the short and extended
/// encodings of `same` and `same_locals_1_stack_item` are chosen on encode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameKind {
    Same,
    SameLocals1StackItem(VerificationTypeInfo),
    Chop(u8),
    Append(Vec<VerificationTypeInfo>),
    Full { locals: Vec<VerificationTypeInfo>, stack: Vec<VerificationTypeInfo> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationTypeInfo {
    Top,
    Integer,
    Float,
    Double,
    Long,
    Null,
    UninitializedThis,
    Object(u16),
    /// Object created by the `new` instruction at the label.
    Uninitialized(Label),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeAttribute {
    pub max_stack: u16,
    pub max_locals: u16,
    instructions: Vec<Insn>,
    pub exception_table: Vec<ExceptionTableEntry>,
    pub stack_map: Option<Vec<StackMapFrame>>,
    pub line_numbers: Option<Vec<LineNumberEntry>>,
    pub local_variables: Option<Vec<LocalVariableEntry>>,
    pub local_variable_types: Option<Vec<LocalVariableEntry>>,
    /// Code attributes the engine does not understand. They may carry
    /// bytecode offsets, so they are dropped once the body is edited.
    pub other_attributes: Vec<(u16, Vec<u8>)>,
    next_label: u32,
    edited: bool,
}

impl CodeAttribute {
    pub fn new(max_stack: u16, max_locals: u16) -> Self {
        Self {
            max_stack,
            max_locals,
            instructions: Vec::new(),
            exception_table: Vec::new(),
            stack_map: None,
            line_numbers: None,
            local_variables: None,
            local_variable_types: None,
            other_attributes: Vec::new(),
            next_label: 0,
            edited: true,
        }
    }

    pub fn instructions(&self) -> &[Insn] {
        &self.instructions
    }

    /// Mutable access to the instruction list; marks the body as edited.
    pub fn instructions_mut(&mut self) -> &mut Vec<Insn> {
        self.edited = true;
        &mut self.instructions
    }

    pub fn is_edited(&self) -> bool {
        self.edited
    }

    pub fn new_label(&mut self) -> Label {
        let label = Label(self.next_label);
        self.next_label += 1;
        label
    }

    /// Inserts `insns` before position `at` of the instruction list.
    pub fn insert(&mut self, at: usize, insns: impl IntoIterator<Item = Insn>) {
        self.edited = true;
        let tail = self.instructions.split_off(at);
        self.instructions.extend(insns);
        self.instructions.extend(tail);
    }

    /// Iterates over `(position, instruction)` pairs, skipping labels.
    pub fn ops(&self) -> impl Iterator<Item = (usize, &Instruction)> {
        self.instructions.iter().enumerate().filter_map(|(i, insn)| match insn {
            Insn::Op(op) => Some((i, op)),
            Insn::Label(_) => None,
        })
    }

    /// Labels placed before the first instruction, i.e. at offset 0.
    pub fn entry_labels(&self) -> impl Iterator<Item = Label> + '_ {
        self.instructions.iter().map_while(|insn| match insn {
            Insn::Label(label) => Some(*label),
            Insn::Op(_) => None,
        })
    }

    pub(crate) fn encode(&self, names: &AttributeNames) -> Result<Vec<u8>, ClassFileError> {
        let (offsets, code_length) = self.layout()?;
        let resolve = |label: Label| offsets.get(&label).copied().ok_or(ClassFileError::UnresolvedLabel(label.0));

        let mut code = Vec::with_capacity(code_length as usize);
        for insn in &self.instructions {
            if let Insn::Op(op) = insn {
                encode_instruction(&mut code, op, &resolve)?;
            }
        }
        debug_assert_eq!(code.len(), code_length as usize);

        let mut out = Vec::with_capacity(code.len() + 64);
        write_u2(&mut out, self.max_stack);
        write_u2(&mut out, self.max_locals);
        write_u4(&mut out, code.len() as u32);
        out.extend_from_slice(&code);

        write_u2(&mut out, self.exception_table.len() as u16);
        for entry in &self.exception_table {
            write_u2(&mut out, resolve(entry.start)? as u16);
            write_u2(&mut out, resolve(entry.end)? as u16);
            write_u2(&mut out, resolve(entry.handler)? as u16);
            write_u2(&mut out, entry.catch_type);
        }

        let mut attrs: Vec<(u16, Vec<u8>)> = Vec::new();

        if let Some(frames) = &self.stack_map {
            let name = AttributeNames::require(names.stack_map_table, "StackMapTable")?;
            attrs.push((name, encode_stack_map(frames, &resolve)?));
        }

        if let Some(entries) = &self.line_numbers {
            let name = AttributeNames::require(names.line_number_table, "LineNumberTable")?;
            // Best effort: entries whose label no longer resolves are dropped.
            let resolved: Vec<(u32, u16)> = entries
                .iter()
                .filter_map(|e| offsets.get(&e.start).map(|&pc| (pc, e.line_number)))
                .filter(|&(pc, _)| pc < code_length)
                .collect();
            let mut info = Vec::with_capacity(2 + resolved.len() * 4);
            write_u2(&mut info, resolved.len() as u16);
            for (pc, line) in resolved {
                write_u2(&mut info, pc as u16);
                write_u2(&mut info, line);
            }
            attrs.push((name, info));
        }

        for (entries, name, attr_name) in [
            (&self.local_variables, names.local_variable_table, "LocalVariableTable"),
            (&self.local_variable_types, names.local_variable_type_table, "LocalVariableTypeTable"),
        ] {
            if let Some(entries) = entries {
                let name = AttributeNames::require(name, attr_name)?;
                attrs.push((name, encode_local_variables(entries, &offsets)));
            }
        }

        if !self.edited {
            attrs.extend(self.other_attributes.iter().cloned());
        }

        write_u2(&mut out, attrs.len() as u16);
        for (name, info) in &attrs {
            write_attribute(&mut out, *name, info);
        }
        Ok(out)
    }

    /// Assigns an offset to every label. Switch padding depends on the
    /// instruction's own offset only, so one forward pass is exact.
    ///
    /// Branch widths are never changed here: a 16-bit branch whose target
    /// moves out of range is reported as `BranchOutOfRange` when the
    /// instruction is written, not rewritten to `goto_w`/`jsr_w`.
    fn layout(&self) -> Result<(HashMap<Label, u32>, u32), ClassFileError> {
        let mut offsets = HashMap::new();
        let mut pc: usize = 0;
        for insn in &self.instructions {
            match insn {
                Insn::Label(label) => {
                    if offsets.insert(*label, pc as u32).is_some() {
                        return Err(ClassFileError::InvalidCode { offset: pc as u32, reason: "label placed twice" });
                    }
                }
                Insn::Op(op) => {
                    pc += op.size(pc as u32);
                    if pc > u16::MAX as usize {
                        return Err(ClassFileError::CodeTooLarge(pc));
                    }
                }
            }
        }
        if pc == 0 {
            return Err(ClassFileError::InvalidCode { offset: 0, reason: "empty code" });
        }
        Ok((offsets, pc as u32))
    }
}

fn encode_instruction(
    out: &mut Vec<u8>,
    op: &Instruction,
    resolve: &dyn Fn(Label) -> Result<u32, ClassFileError>,
) -> Result<(), ClassFileError> {
    let at = out.len() as u32;
    let mismatch = || ClassFileError::InvalidCode { offset: at, reason: "operand does not match opcode" };
    let kind = opcodes::operand_kind(op.opcode).ok_or(ClassFileError::InvalidCode { offset: at, reason: "invalid opcode" })?;
    let relative = |label: Label| -> Result<i64, ClassFileError> { Ok(resolve(label)? as i64 - at as i64) };
    let pad = |out: &mut Vec<u8>| {
        while out.len() % 4 != 0 {
            out.push(0);
        }
    };

    match (&op.operand, kind) {
        (Operand::None, OperandKind::None) => write_u1(out, op.opcode),
        (Operand::Byte(v), OperandKind::Byte) => {
            write_u1(out, op.opcode);
            write_u1(out, *v as u8);
        }
        (Operand::Short(v), OperandKind::Short) => {
            write_u1(out, op.opcode);
            write_u2(out, *v as u16);
        }
        (Operand::Constant(index), OperandKind::ConstantU1) => {
            if *index <= u8::MAX as u16 {
                write_u1(out, op.opcode);
                write_u1(out, *index as u8);
            } else {
                write_u1(out, opcodes::LDC_W);
                write_u2(out, *index);
            }
        }
        (Operand::Constant(index), OperandKind::ConstantU2) => {
            write_u1(out, op.opcode);
            write_u2(out, *index);
        }
        (Operand::Local(index), OperandKind::Local) => {
            if *index <= u8::MAX as u16 {
                write_u1(out, op.opcode);
                write_u1(out, *index as u8);
            } else {
                write_u1(out, opcodes::WIDE);
                write_u1(out, op.opcode);
                write_u2(out, *index);
            }
        }
        (Operand::Iinc { index, delta }, OperandKind::Iinc) => match i8::try_from(*delta) {
            Ok(small) if *index <= u8::MAX as u16 => {
                write_u1(out, op.opcode);
                write_u1(out, *index as u8);
                write_u1(out, small as u8);
            }
            _ => {
                write_u1(out, opcodes::WIDE);
                write_u1(out, op.opcode);
                write_u2(out, *index);
                write_u2(out, *delta as u16);
            }
        },
        (Operand::Branch(target), OperandKind::Branch16) => {
            let delta = i16::try_from(relative(*target)?).map_err(|_| ClassFileError::BranchOutOfRange { offset: at })?;
            write_u1(out, op.opcode);
            write_u2(out, delta as u16);
        }
        (Operand::Branch(target), OperandKind::Branch32) => {
            let delta = i32::try_from(relative(*target)?).map_err(|_| ClassFileError::BranchOutOfRange { offset: at })?;
            write_u1(out, op.opcode);
            write_u4(out, delta as u32);
        }
        (Operand::TableSwitch { default, low, targets }, OperandKind::TableSwitch) => {
            if targets.is_empty() {
                return Err(mismatch());
            }
            write_u1(out, op.opcode);
            pad(out);
            write_u4(out, relative(*default)? as i32 as u32);
            write_u4(out, *low as u32);
            let high = low
                .checked_add(targets.len() as i32 - 1)
                .ok_or(ClassFileError::InvalidCode { offset: at, reason: "tableswitch range overflow" })?;
            write_u4(out, high as u32);
            for target in targets {
                write_u4(out, relative(*target)? as i32 as u32);
            }
        }
        (Operand::LookupSwitch { default, pairs }, OperandKind::LookupSwitch) => {
            write_u1(out, op.opcode);
            pad(out);
            write_u4(out, relative(*default)? as i32 as u32);
            write_u4(out, pairs.len() as u32);
            for (key, target) in pairs {
                write_u4(out, *key as u32);
                write_u4(out, relative(*target)? as i32 as u32);
            }
        }
        (Operand::InvokeInterface { index, count }, OperandKind::InvokeInterface) => {
            write_u1(out, op.opcode);
            write_u2(out, *index);
            write_u1(out, *count);
            write_u1(out, 0);
        }
        (Operand::InvokeDynamic(index), OperandKind::InvokeDynamic) => {
            write_u1(out, op.opcode);
            write_u2(out, *index);
            write_u2(out, 0);
        }
        (Operand::NewArray(atype), OperandKind::NewArray) => {
            write_u1(out, op.opcode);
            write_u1(out, *atype);
        }
        (Operand::MultiANewArray { index, dimensions }, OperandKind::MultiANewArray) => {
            write_u1(out, op.opcode);
            write_u2(out, *index);
            write_u1(out, *dimensions);
        }
        _ => return Err(mismatch()),
    }
    Ok(())
}

fn encode_stack_map(
    frames: &[StackMapFrame],
    resolve: &dyn Fn(Label) -> Result<u32, ClassFileError>,
) -> Result<Vec<u8>, ClassFileError> {
    let mut info = Vec::new();
    write_u2(&mut info, frames.len() as u16);
    let mut previous: Option<u32> = None;
    for frame in frames {
        let offset = resolve(frame.label)?;
        let delta = match previous {
            None => offset,
            Some(prev) if offset > prev => offset - prev - 1,
            Some(_) => {
                return Err(ClassFileError::InvalidCode { offset, reason: "stack map frames out of order" });
            }
        };
        previous = Some(offset);
        let delta = delta as u16;

        match &frame.kind {
            FrameKind::Same if delta <= 63 => write_u1(&mut info, delta as u8),
            FrameKind::Same => {
                write_u1(&mut info, 251);
                write_u2(&mut info, delta);
            }
            FrameKind::SameLocals1StackItem(stack) => {
                if delta <= 63 {
                    write_u1(&mut info, 64 + delta as u8);
                } else {
                    write_u1(&mut info, 247);
                    write_u2(&mut info, delta);
                }
                encode_verification_type(&mut info, stack, resolve)?;
            }
            FrameKind::Chop(k) => {
                write_u1(&mut info, 251 - k);
                write_u2(&mut info, delta);
            }
            FrameKind::Append(locals) => {
                write_u1(&mut info, 251 + locals.len() as u8);
                write_u2(&mut info, delta);
                for local in locals {
                    encode_verification_type(&mut info, local, resolve)?;
                }
            }
            FrameKind::Full { locals, stack } => {
                write_u1(&mut info, 255);
                write_u2(&mut info, delta);
                write_u2(&mut info, locals.len() as u16);
                for local in locals {
                    encode_verification_type(&mut info, local, resolve)?;
                }
                write_u2(&mut info, stack.len() as u16);
                for item in stack {
                    encode_verification_type(&mut info, item, resolve)?;
                }
            }
        }
    }
    Ok(info)
}

fn encode_verification_type(
    out: &mut Vec<u8>,
    info: &VerificationTypeInfo,
    resolve: &dyn Fn(Label) -> Result<u32, ClassFileError>,
) -> Result<(), ClassFileError> {
    match info {
        VerificationTypeInfo::Top => write_u1(out, 0),
        VerificationTypeInfo::Integer => write_u1(out, 1),
        VerificationTypeInfo::Float => write_u1(out, 2),
        VerificationTypeInfo::Double => write_u1(out, 3),
        VerificationTypeInfo::Long => write_u1(out, 4),
        VerificationTypeInfo::Null => write_u1(out, 5),
        VerificationTypeInfo::UninitializedThis => write_u1(out, 6),
        VerificationTypeInfo::Object(index) => {
            write_u1(out, 7);
            write_u2(out, *index);
        }
        VerificationTypeInfo::Uninitialized(label) => {
            write_u1(out, 8);
            write_u2(out, resolve(*label)? as u16);
        }
    }
    Ok(())
}

fn encode_local_variables(entries: &[LocalVariableEntry], offsets: &HashMap<Label, u32>) -> Vec<u8> {
    let resolved: Vec<(u32, u32, &LocalVariableEntry)> = entries
        .iter()
        .filter_map(|e| Some((*offsets.get(&e.start)?, *offsets.get(&e.end)?, e)))
        .filter(|(start, end, _)| start <= end)
        .collect();
    let mut info = Vec::with_capacity(2 + resolved.len() * 10);
    write_u2(&mut info, resolved.len() as u16);
    for (start, end, entry) in resolved {
        write_u2(&mut info, start as u16);
        write_u2(&mut info, (end - start) as u16);
        write_u2(&mut info, entry.name_index);
        write_u2(&mut info, entry.type_index);
        write_u2(&mut info, entry.index);
    }
    info
}

// =========================================================================
// DECODING
// =========================================================================

/// Stack map frame keyed by its absolute offset.
type RawFrame = (u32, RawFrameKind);

enum RawFrameKind {
    Same,
    SameLocals1(RawVerificationType),
    Chop(u8),
    Append(Vec<RawVerificationType>),
    Full(Vec<RawVerificationType>, Vec<RawVerificationType>),
}

enum RawVerificationType {
    Resolved(VerificationTypeInfo),
    Uninitialized(u32),
}

struct Labeler {
    boundaries: BTreeSet<u32>,
    code_length: u32,
    wanted: BTreeSet<u32>,
}

impl Labeler {
    /// Registers a label at `offset`; the end of the code is allowed when `allow_end` is set.
    fn want(&mut self, offset: i64, allow_end: bool) -> Result<u32, ClassFileError> {
        let valid = offset >= 0
            && u32::try_from(offset).map_or(false, |o| {
                self.boundaries.contains(&o) || (allow_end && o == self.code_length)
            });
        if !valid {
            return Err(ClassFileError::InvalidCode {
                offset: offset.clamp(0, u32::MAX as i64) as u32,
                reason: "offset is not an instruction boundary",
            });
        }
        let offset = offset as u32;
        self.wanted.insert(offset);
        Ok(offset)
    }

    fn accepts(&self, offset: u32, allow_end: bool) -> bool {
        self.boundaries.contains(&offset) || (allow_end && offset == self.code_length)
    }
}

pub(crate) fn decode_code_attribute(r: &mut Reader, cp: &ConstantPool) -> Result<CodeAttribute, ClassFileError> {
    let max_stack = r.read_u2()?;
    let max_locals = r.read_u2()?;
    let code_length = r.read_u4()? as usize;
    if code_length == 0 || code_length > u16::MAX as usize {
        return Err(ClassFileError::InvalidAttribute("Code".to_string()));
    }
    let code = r.read_bytes(code_length)?;

    let raw_ops = decode_instructions(code, cp)?;
    let mut labeler = Labeler {
        boundaries: raw_ops.iter().map(|(offset, _)| *offset).collect(),
        code_length: code_length as u32,
        wanted: BTreeSet::new(),
    };

    for (offset, op) in &raw_ops {
        let at = *offset as i64;
        match &op.operand {
            Operand::Branch(target) => {
                labeler.want(at + target.0 as i32 as i64, false)?;
            }
            Operand::TableSwitch { default, targets, .. } => {
                labeler.want(at + default.0 as i32 as i64, false)?;
                for t in targets {
                    labeler.want(at + t.0 as i32 as i64, false)?;
                }
            }
            Operand::LookupSwitch { default, pairs } => {
                labeler.want(at + default.0 as i32 as i64, false)?;
                for (_, t) in pairs {
                    labeler.want(at + t.0 as i32 as i64, false)?;
                }
            }
            _ => {}
        }
    }

    let exception_table_length = r.read_u2()? as usize;
    let mut raw_exceptions = Vec::with_capacity(exception_table_length);
    for _ in 0..exception_table_length {
        let start = labeler.want(r.read_u2()? as i64, false)?;
        let end = labeler.want(r.read_u2()? as i64, true)?;
        let handler = labeler.want(r.read_u2()? as i64, false)?;
        let catch_type = r.read_u2()?;
        if catch_type != 0 {
            cp.class_name(catch_type)?;
        }
        raw_exceptions.push((start, end, handler, catch_type));
    }

    let mut raw_frames: Option<Vec<RawFrame>> = None;
    let mut raw_lines: Option<Vec<(u32, u16)>> = None;
    let mut raw_locals: Option<Vec<(u32, u32, u16, u16, u16)>> = None;
    let mut raw_local_types: Option<Vec<(u32, u32, u16, u16, u16)>> = None;
    let mut other_attributes = Vec::new();

    let attributes_count = r.read_u2()?;
    for _ in 0..attributes_count {
        let name_index = r.read_u2()?;
        let length = r.read_u4()? as usize;
        let name = cp.get_utf8(name_index)?;
        let info = r.read_bytes(length)?;
        let mut sub = Reader::new(info);

        match name {
            "StackMapTable" => {
                let frames = decode_stack_map(&mut sub)?;
                for (offset, kind) in &frames {
                    labeler.want(*offset as i64, false)?;
                    for_each_uninitialized(kind, |o| labeler.want(o as i64, false).map(|_| ()))?;
                }
                raw_frames.get_or_insert_with(Vec::new).extend(frames);
            }
            "LineNumberTable" => {
                let num = sub.read_u2()? as usize;
                let lines = raw_lines.get_or_insert_with(Vec::new);
                for _ in 0..num {
                    let start_pc = sub.read_u2()? as u32;
                    let line_number = sub.read_u2()?;
                    if labeler.accepts(start_pc, false) {
                        labeler.wanted.insert(start_pc);
                        lines.push((start_pc, line_number));
                    }
                }
            }
            "LocalVariableTable" | "LocalVariableTypeTable" => {
                let num = sub.read_u2()? as usize;
                let target = if name == "LocalVariableTable" { &mut raw_locals } else { &mut raw_local_types };
                let entries = target.get_or_insert_with(Vec::new);
                for _ in 0..num {
                    let start_pc = sub.read_u2()? as u32;
                    let length = sub.read_u2()? as u32;
                    let name_index = sub.read_u2()?;
                    let type_index = sub.read_u2()?;
                    let index = sub.read_u2()?;
                    let end_pc = start_pc + length;
                    if labeler.accepts(start_pc, false) && labeler.accepts(end_pc, true) {
                        labeler.wanted.insert(start_pc);
                        labeler.wanted.insert(end_pc);
                        entries.push((start_pc, end_pc, name_index, type_index, index));
                    }
                }
            }
            _ => {
                other_attributes.push((name_index, info.to_vec()));
                continue;
            }
        }

        if sub.remaining() != 0 {
            return Err(ClassFileError::InvalidAttribute(name.to_string()));
        }
    }

    // Labels are numbered in ascending offset order.
    let labels: BTreeMap<u32, Label> = labeler
        .wanted
        .iter()
        .enumerate()
        .map(|(i, &offset)| (offset, Label(i as u32)))
        .collect();
    let label_at = |offset: u32| labels[&offset];

    let mut instructions = Vec::with_capacity(raw_ops.len() + labels.len());
    for (offset, mut op) in raw_ops {
        if let Some(&label) = labels.get(&offset) {
            instructions.push(Insn::Label(label));
        }
        let at = offset as i64;
        let fix = |l: &mut Label| *l = label_at((at + l.0 as i32 as i64) as u32);
        match &mut op.operand {
            Operand::Branch(target) => fix(target),
            Operand::TableSwitch { default, targets, .. } => {
                fix(default);
                targets.iter_mut().for_each(fix);
            }
            Operand::LookupSwitch { default, pairs } => {
                fix(default);
                pairs.iter_mut().for_each(|(_, t)| fix(t));
            }
            _ => {}
        }
        instructions.push(Insn::Op(op));
    }
    if let Some(&label) = labels.get(&(code_length as u32)) {
        instructions.push(Insn::Label(label));
    }

    let exception_table = raw_exceptions
        .into_iter()
        .map(|(start, end, handler, catch_type)| ExceptionTableEntry {
            start: label_at(start),
            end: label_at(end),
            handler: label_at(handler),
            catch_type,
        })
        .collect();

    let resolve_type = |t: RawVerificationType| match t {
        RawVerificationType::Resolved(info) => info,
        RawVerificationType::Uninitialized(offset) => VerificationTypeInfo::Uninitialized(label_at(offset)),
    };
    let stack_map = raw_frames.map(|frames| {
        frames
            .into_iter()
            .map(|(offset, kind)| StackMapFrame {
                label: label_at(offset),
                kind: match kind {
                    RawFrameKind::Same => FrameKind::Same,
                    RawFrameKind::SameLocals1(item) => FrameKind::SameLocals1StackItem(resolve_type(item)),
                    RawFrameKind::Chop(k) => FrameKind::Chop(k),
                    RawFrameKind::Append(locals) => FrameKind::Append(locals.into_iter().map(resolve_type).collect()),
                    RawFrameKind::Full(locals, stack) => FrameKind::Full {
                        locals: locals.into_iter().map(resolve_type).collect(),
                        stack: stack.into_iter().map(resolve_type).collect(),
                    },
                },
            })
            .collect()
    });

    let line_numbers = raw_lines.map(|lines| {
        lines
            .into_iter()
            .map(|(pc, line_number)| LineNumberEntry { start: label_at(pc), line_number })
            .collect()
    });
    let to_locals = |entries: Vec<(u32, u32, u16, u16, u16)>| {
        entries
            .into_iter()
            .map(|(start, end, name_index, type_index, index)| LocalVariableEntry {
                start: label_at(start),
                end: label_at(end),
                name_index,
                type_index,
                index,
            })
            .collect()
    };

    Ok(CodeAttribute {
        max_stack,
        max_locals,
        instructions,
        exception_table,
        stack_map,
        line_numbers,
        local_variables: raw_locals.map(to_locals),
        local_variable_types: raw_local_types.map(to_locals),
        other_attributes,
        next_label: labels.len() as u32,
        edited: false,
    })
}

/// Decodes the bytecode into instructions whose branch operands temporarily
/// hold the signed relative displacement (as `Label(delta as u32)`).
fn decode_instructions(code: &[u8], cp: &ConstantPool) -> Result<Vec<(u32, Instruction)>, ClassFileError> {
    let mut r = Reader::new(code);
    let mut ops = Vec::new();
    let constant = |index: u16, at: u32| -> Result<u16, ClassFileError> {
        cp.get(index).map_err(|_| ClassFileError::InvalidCode { offset: at, reason: "constant pool index out of range" })?;
        Ok(index)
    };

    while r.remaining() > 0 {
        let at = r.pos() as u32;
        let truncated = |_| ClassFileError::InvalidCode { offset: at, reason: "truncated instruction" };
        let opcode = r.read_u1()?;
        let kind = opcodes::operand_kind(opcode).ok_or(ClassFileError::InvalidCode { offset: at, reason: "invalid opcode" })?;
        let delta = |d: i32| Label(d as u32);

        let (opcode, operand) = match kind {
            OperandKind::None => (opcode, Operand::None),
            OperandKind::Byte => (opcode, Operand::Byte(r.read_i1().map_err(truncated)?)),
            OperandKind::Short => (opcode, Operand::Short(r.read_i2().map_err(truncated)?)),
            OperandKind::ConstantU1 => {
                let index = r.read_u1().map_err(truncated)? as u16;
                (opcode, Operand::Constant(constant(index, at)?))
            }
            OperandKind::ConstantU2 => {
                let index = r.read_u2().map_err(truncated)?;
                (opcode, Operand::Constant(constant(index, at)?))
            }
            OperandKind::Local => (opcode, Operand::Local(r.read_u1().map_err(truncated)? as u16)),
            OperandKind::Iinc => {
                let index = r.read_u1().map_err(truncated)? as u16;
                let d = r.read_i1().map_err(truncated)? as i16;
                (opcode, Operand::Iinc { index, delta: d })
            }
            OperandKind::Branch16 => (opcode, Operand::Branch(delta(r.read_i2().map_err(truncated)? as i32))),
            OperandKind::Branch32 => (opcode, Operand::Branch(delta(r.read_i4().map_err(truncated)?))),
            OperandKind::TableSwitch => {
                while r.pos() % 4 != 0 {
                    r.read_u1().map_err(truncated)?;
                }
                let default = r.read_i4().map_err(truncated)?;
                let low = r.read_i4().map_err(truncated)?;
                let high = r.read_i4().map_err(truncated)?;
                if high < low {
                    return Err(ClassFileError::InvalidCode { offset: at, reason: "tableswitch high < low" });
                }
                let count = (high as i64 - low as i64 + 1) as usize;
                if count * 4 > r.remaining() {
                    return Err(ClassFileError::InvalidCode { offset: at, reason: "truncated instruction" });
                }
                let mut targets = Vec::with_capacity(count);
                for _ in 0..count {
                    targets.push(delta(r.read_i4()?));
                }
                (opcode, Operand::TableSwitch { default: delta(default), low, targets })
            }
            OperandKind::LookupSwitch => {
                while r.pos() % 4 != 0 {
                    r.read_u1().map_err(truncated)?;
                }
                let default = r.read_i4().map_err(truncated)?;
                let npairs = r.read_i4().map_err(truncated)?;
                if npairs < 0 || npairs as usize * 8 > r.remaining() {
                    return Err(ClassFileError::InvalidCode { offset: at, reason: "bad lookupswitch pair count" });
                }
                let mut pairs = Vec::with_capacity(npairs as usize);
                for _ in 0..npairs {
                    let key = r.read_i4()?;
                    pairs.push((key, delta(r.read_i4()?)));
                }
                (opcode, Operand::LookupSwitch { default: delta(default), pairs })
            }
            OperandKind::InvokeInterface => {
                let index = constant(r.read_u2().map_err(truncated)?, at)?;
                let count = r.read_u1().map_err(truncated)?;
                r.read_u1().map_err(truncated)?;
                (opcode, Operand::InvokeInterface { index, count })
            }
            OperandKind::InvokeDynamic => {
                let index = constant(r.read_u2().map_err(truncated)?, at)?;
                r.read_u2().map_err(truncated)?;
                (opcode, Operand::InvokeDynamic(index))
            }
            OperandKind::NewArray => (opcode, Operand::NewArray(r.read_u1().map_err(truncated)?)),
            OperandKind::MultiANewArray => {
                let index = constant(r.read_u2().map_err(truncated)?, at)?;
                let dimensions = r.read_u1().map_err(truncated)?;
                (opcode, Operand::MultiANewArray { index, dimensions })
            }
            OperandKind::Wide => {
                let inner = r.read_u1().map_err(truncated)?;
                match opcodes::operand_kind(inner) {
                    Some(OperandKind::Local) => (inner, Operand::Local(r.read_u2().map_err(truncated)?)),
                    Some(OperandKind::Iinc) => {
                        let index = r.read_u2().map_err(truncated)?;
                        let d = r.read_i2().map_err(truncated)?;
                        (inner, Operand::Iinc { index, delta: d })
                    }
                    _ => return Err(ClassFileError::InvalidCode { offset: at, reason: "invalid wide instruction" }),
                }
            }
        };
        ops.push((at, Instruction { opcode, operand }));
    }
    Ok(ops)
}

fn decode_stack_map(r: &mut Reader) -> Result<Vec<RawFrame>, ClassFileError> {
    let num = r.read_u2()? as usize;
    let mut entries = Vec::with_capacity(num);
    let mut previous: Option<u32> = None;
    for _ in 0..num {
        let frame_type = r.read_u1()?;
        let (offset_delta, kind) = match frame_type {
            0..=63 => (frame_type as u16, RawFrameKind::Same),
            64..=127 => {
                let stack = decode_verification_type(r)?;
                ((frame_type - 64) as u16, RawFrameKind::SameLocals1(stack))
            }
            247 => {
                let offset_delta = r.read_u2()?;
                (offset_delta, RawFrameKind::SameLocals1(decode_verification_type(r)?))
            }
            248..=250 => (r.read_u2()?, RawFrameKind::Chop(251u8 - frame_type)),
            251 => (r.read_u2()?, RawFrameKind::Same),
            252..=254 => {
                let offset_delta = r.read_u2()?;
                let count = (frame_type - 251) as usize;
                let mut locals = Vec::with_capacity(count);
                for _ in 0..count {
                    locals.push(decode_verification_type(r)?);
                }
                (offset_delta, RawFrameKind::Append(locals))
            }
            255 => {
                let offset_delta = r.read_u2()?;
                let num_locals = r.read_u2()? as usize;
                let mut locals = Vec::with_capacity(num_locals);
                for _ in 0..num_locals {
                    locals.push(decode_verification_type(r)?);
                }
                let num_stack = r.read_u2()? as usize;
                let mut stack = Vec::with_capacity(num_stack);
                for _ in 0..num_stack {
                    stack.push(decode_verification_type(r)?);
                }
                (offset_delta, RawFrameKind::Full(locals, stack))
            }
            _ => return Err(ClassFileError::InvalidAttribute("StackMapTable".to_string())),
        };
        let offset = match previous {
            None => offset_delta as u32,
            Some(prev) => prev + offset_delta as u32 + 1,
        };
        previous = Some(offset);
        entries.push((offset, kind));
    }
    Ok(entries)
}

fn decode_verification_type(r: &mut Reader) -> Result<RawVerificationType, ClassFileError> {
    let tag = r.read_u1()?;
    let info = match tag {
        0 => VerificationTypeInfo::Top,
        1 => VerificationTypeInfo::Integer,
        2 => VerificationTypeInfo::Float,
        3 => VerificationTypeInfo::Double,
        4 => VerificationTypeInfo::Long,
        5 => VerificationTypeInfo::Null,
        6 => VerificationTypeInfo::UninitializedThis,
        7 => VerificationTypeInfo::Object(r.read_u2()?),
        8 => return Ok(RawVerificationType::Uninitialized(r.read_u2()? as u32)),
        _ => return Err(ClassFileError::InvalidAttribute("StackMapTable".to_string())),
    };
    Ok(RawVerificationType::Resolved(info))
}

fn for_each_uninitialized(
    kind: &RawFrameKind,
    mut f: impl FnMut(u32) -> Result<(), ClassFileError>,
) -> Result<(), ClassFileError> {
    let mut visit = |t: &RawVerificationType| match t {
        RawVerificationType::Uninitialized(offset) => f(*offset),
        RawVerificationType::Resolved(_) => Ok(()),
    };
    match kind {
        RawFrameKind::Same | RawFrameKind::Chop(_) => Ok(()),
        RawFrameKind::SameLocals1(item) => visit(item),
        RawFrameKind::Append(locals) => locals.iter().try_for_each(visit),
        RawFrameKind::Full(locals, stack) => locals.iter().chain(stack).try_for_each(visit),
    }
}
