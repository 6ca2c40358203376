//! Class file decoder and encoder.
//!
//! [`ClassFile::decode`] turns a `.class` binary into an editable model and
//! [`ClassFile::encode`] writes it back. Attributes the patch scripts never
//! touch are carried as raw bytes, which is sound because constant pool
//! indices are stable: edits only ever append to the pool. Method bodies are
//! decoded into [`CodeAttribute`]s whose branch targets, exception ranges and
//! debug tables refer to [`Label`]s rather than byte offsets, so instructions
//! can be inserted freely and every offset is recomputed on encode.

mod code;
pub(crate) mod mutf8;
pub mod opcodes;

pub use code::{
    CodeAttribute, ExceptionTableEntry, FrameKind, Insn, Instruction, Label, LineNumberEntry,
    LocalVariableEntry, Operand, StackMapFrame, VerificationTypeInfo,
};

use thiserror::Error;

pub const ACC_PUBLIC: u16 = 0x0001;
pub const ACC_PRIVATE: u16 = 0x0002;
pub const ACC_PROTECTED: u16 = 0x0004;
pub const ACC_STATIC: u16 = 0x0008;
pub const ACC_FINAL: u16 = 0x0010;
pub const ACC_SYNCHRONIZED: u16 = 0x0020;
pub const ACC_VOLATILE: u16 = 0x0040;
pub const ACC_TRANSIENT: u16 = 0x0080;
pub const ACC_NATIVE: u16 = 0x0100;
pub const ACC_ABSTRACT: u16 = 0x0400;

const MAGIC: u32 = 0xCAFEBABE;
const MIN_MAJOR_VERSION: u16 = 45;
const MAX_MAJOR_VERSION: u16 = 71;

/// First class file version whose verifier consumes `StackMapTable` frames.
pub const STACK_MAP_MAJOR_VERSION: u16 = 50;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassFile {
    pub minor_version: u16,
    pub major_version: u16,
    pub constant_pool: ConstantPool,
    pub access_flags: u16,
    pub this_class: u16,
    pub super_class: u16,
    pub interfaces: Vec<u16>,
    pub fields: Vec<FieldInfo>,
    pub methods: Vec<MethodInfo>,
    pub attributes: Vec<AttributeInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldInfo {
    pub access_flags: u16,
    pub name_index: u16,
    pub descriptor_index: u16,
    pub attributes: Vec<AttributeInfo>,
}

impl FieldInfo {
    pub fn name<'a>(&self, cp: &'a ConstantPool) -> Result<&'a str, ClassFileError> {
        cp.get_utf8(self.name_index)
    }

    pub fn descriptor<'a>(&self, cp: &'a ConstantPool) -> Result<&'a str, ClassFileError> {
        cp.get_utf8(self.descriptor_index)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodInfo {
    pub access_flags: u16,
    pub name_index: u16,
    pub descriptor_index: u16,
    pub attributes: Vec<AttributeInfo>,
}

impl MethodInfo {
    pub fn name<'a>(&self, cp: &'a ConstantPool) -> Result<&'a str, ClassFileError> {
        cp.get_utf8(self.name_index)
    }

    pub fn descriptor<'a>(&self, cp: &'a ConstantPool) -> Result<&'a str, ClassFileError> {
        cp.get_utf8(self.descriptor_index)
    }

    pub fn is_static(&self) -> bool {
        self.access_flags & ACC_STATIC != 0
    }

    /// The method body; `None` for abstract and native methods.
    pub fn code(&self) -> Option<&CodeAttribute> {
        self.attributes.iter().find_map(|a| match a {
            AttributeInfo::Code(code) => Some(code),
            _ => None,
        })
    }

    pub fn code_mut(&mut self) -> Option<&mut CodeAttribute> {
        self.attributes.iter_mut().find_map(|a| match a {
            AttributeInfo::Code(code) => Some(code),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeInfo {
    Code(CodeAttribute),
    /// Any attribute the engine does not edit, kept byte for byte.
    Other { name_index: u16, info: Vec<u8> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstantPool {
    entries: Vec<Option<CpInfo>>,
}

impl Default for ConstantPool {
    fn default() -> Self {
        Self::new()
    }
}

impl ConstantPool {
    pub fn new() -> Self {
        Self { entries: vec![None] }
    }

    /// The `constant_pool_count` value: number of slots including the unused slot 0.
    pub fn count(&self) -> u16 {
        self.entries.len() as u16
    }

    pub fn get(&self, index: u16) -> Result<&CpInfo, ClassFileError> {
        if index == 0 {
            return Err(ClassFileError::InvalidConstantPoolIndex(index));
        }
        self.entries
            .get(index as usize)
            .and_then(|e| e.as_ref())
            .ok_or(ClassFileError::InvalidConstantPoolIndex(index))
    }

    pub fn get_utf8(&self, index: u16) -> Result<&str, ClassFileError> {
        match self.get(index)? {
            CpInfo::Utf8(s) => Ok(s.as_str()),
            _ => Err(ClassFileError::InvalidConstantPoolIndex(index)),
        }
    }

    /// Resolves a `CONSTANT_Class` entry to its internal name.
    pub fn class_name(&self, index: u16) -> Result<&str, ClassFileError> {
        match self.get(index)? {
            CpInfo::Class { name_index } => self.get_utf8(*name_index),
            _ => Err(ClassFileError::InvalidConstantPoolIndex(index)),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (u16, &CpInfo)> {
        self.entries
            .iter()
            .enumerate()
            .filter_map(|(i, e)| e.as_ref().map(|e| (i as u16, e)))
    }

    pub fn find(&self, entry: &CpInfo) -> Option<u16> {
        self.iter().find(|(_, e)| *e == entry).map(|(i, _)| i)
    }

    pub fn find_utf8(&self, value: &str) -> Option<u16> {
        self.iter()
            .find(|(_, e)| matches!(e, CpInfo::Utf8(s) if s == value))
            .map(|(i, _)| i)
    }

    /// Appends `entry` unconditionally. Long and double constants take two slots.
    pub fn push(&mut self, entry: CpInfo) -> Result<u16, ClassFileError> {
        let wide = matches!(entry, CpInfo::Long(_) | CpInfo::Double(_));
        let needed = if wide { 2 } else { 1 };
        if self.entries.len() + needed > u16::MAX as usize {
            return Err(ClassFileError::PoolOverflow);
        }
        let index = self.entries.len() as u16;
        self.entries.push(Some(entry));
        if wide {
            self.entries.push(None);
        }
        Ok(index)
    }

    /// Returns the index of an equal entry, appending one if none exists.
    pub fn ensure(&mut self, entry: CpInfo) -> Result<u16, ClassFileError> {
        match self.find(&entry) {
            Some(index) => Ok(index),
            None => self.push(entry),
        }
    }

    pub fn ensure_utf8(&mut self, value: &str) -> Result<u16, ClassFileError> {
        match self.find_utf8(value) {
            Some(index) => Ok(index),
            None => self.push(CpInfo::Utf8(value.to_owned())),
        }
    }

    pub fn ensure_class(&mut self, internal_name: &str) -> Result<u16, ClassFileError> {
        let name_index = self.ensure_utf8(internal_name)?;
        self.ensure(CpInfo::Class { name_index })
    }

    pub fn ensure_string(&mut self, value: &str) -> Result<u16, ClassFileError> {
        let string_index = self.ensure_utf8(value)?;
        self.ensure(CpInfo::String { string_index })
    }

    pub fn ensure_integer(&mut self, value: i32) -> Result<u16, ClassFileError> {
        self.ensure(CpInfo::Integer(value))
    }

    pub fn ensure_float(&mut self, value: f32) -> Result<u16, ClassFileError> {
        self.ensure(CpInfo::Float(value.to_bits()))
    }

    pub fn ensure_long(&mut self, value: i64) -> Result<u16, ClassFileError> {
        self.ensure(CpInfo::Long(value))
    }

    pub fn ensure_double(&mut self, value: f64) -> Result<u16, ClassFileError> {
        self.ensure(CpInfo::Double(value.to_bits()))
    }

    pub fn ensure_name_and_type(&mut self, name: &str, descriptor: &str) -> Result<u16, ClassFileError> {
        let name_index = self.ensure_utf8(name)?;
        let descriptor_index = self.ensure_utf8(descriptor)?;
        self.ensure(CpInfo::NameAndType { name_index, descriptor_index })
    }

    pub fn ensure_method_ref(&mut self, owner: &str, name: &str, descriptor: &str) -> Result<u16, ClassFileError> {
        let class_index = self.ensure_class(owner)?;
        let name_and_type_index = self.ensure_name_and_type(name, descriptor)?;
        self.ensure(CpInfo::Methodref { class_index, name_and_type_index })
    }

    fn validate(&self) -> Result<(), ClassFileError> {
        let utf8 = |i: u16| self.get_utf8(i).map(|_| ());
        let class = |i: u16| self.class_name(i).map(|_| ());
        let name_and_type = |i: u16| match self.get(i)? {
            CpInfo::NameAndType { .. } => Ok(()),
            _ => Err(ClassFileError::InvalidConstantPoolIndex(i)),
        };

        for (_, entry) in self.iter() {
            match *entry {
                CpInfo::Utf8(_) | CpInfo::Integer(_) | CpInfo::Float(_) | CpInfo::Long(_) | CpInfo::Double(_) => {}
                CpInfo::Class { name_index }
                | CpInfo::Module { name_index }
                | CpInfo::Package { name_index } => utf8(name_index)?,
                CpInfo::String { string_index } => utf8(string_index)?,
                CpInfo::Fieldref { class_index, name_and_type_index }
                | CpInfo::Methodref { class_index, name_and_type_index }
                | CpInfo::InterfaceMethodref { class_index, name_and_type_index } => {
                    class(class_index)?;
                    name_and_type(name_and_type_index)?;
                }
                CpInfo::NameAndType { name_index, descriptor_index } => {
                    utf8(name_index)?;
                    utf8(descriptor_index)?;
                }
                CpInfo::MethodHandle { reference_index, .. } => {
                    self.get(reference_index)?;
                }
                CpInfo::MethodType { descriptor_index } => utf8(descriptor_index)?,
                CpInfo::Dynamic { name_and_type_index, .. }
                | CpInfo::InvokeDynamic { name_and_type_index, .. } => name_and_type(name_and_type_index)?,
            }
        }
        Ok(())
    }
}

/// A constant pool entry. Float and double constants hold their raw IEEE 754
/// bits so that NaN payloads survive a round trip and entries compare exactly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CpInfo {
    Utf8(String),
    Integer(i32),
    Float(u32),
    Long(i64),
    Double(u64),
    Class { name_index: u16 },
    String { string_index: u16 },
    Fieldref { class_index: u16, name_and_type_index: u16 },
    Methodref { class_index: u16, name_and_type_index: u16 },
    InterfaceMethodref { class_index: u16, name_and_type_index: u16 },
    NameAndType { name_index: u16, descriptor_index: u16 },
    MethodHandle { reference_kind: u8, reference_index: u16 },
    MethodType { descriptor_index: u16 },
    Dynamic { bootstrap_method_attr_index: u16, name_and_type_index: u16 },
    InvokeDynamic { bootstrap_method_attr_index: u16, name_and_type_index: u16 },
    Module { name_index: u16 },
    Package { name_index: u16 },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClassFileError {
    #[error("unexpected end of file")]
    UnexpectedEof,
    #[error("invalid magic: {0:#x}")]
    InvalidMagic(u32),
    #[error("unsupported class file version {major}.{minor}")]
    InvalidVersion { major: u16, minor: u16 },
    #[error("invalid constant pool index: {0}")]
    InvalidConstantPoolIndex(u16),
    #[error("invalid constant pool tag: {0}")]
    InvalidConstantPoolTag(u8),
    #[error("invalid modified UTF-8")]
    InvalidUtf8,
    #[error("string constant longer than 65535 bytes")]
    StringTooLong,
    #[error("invalid attribute: {0}")]
    InvalidAttribute(String),
    #[error("invalid code at offset {offset}: {reason}")]
    InvalidCode { offset: u32, reason: &'static str },
    #[error("{0} trailing bytes after class file")]
    TrailingBytes(usize),
    #[error("branch at offset {offset} does not fit its 16-bit displacement")]
    BranchOutOfRange { offset: u32 },
    #[error("code length {0} exceeds 65535 bytes")]
    CodeTooLarge(usize),
    #[error("label {0} is referenced but never placed")]
    UnresolvedLabel(u32),
    #[error("constant pool is full")]
    PoolOverflow,
    #[error("constant pool has no Utf8 entry for attribute name {0}")]
    MissingAttributeName(&'static str),
}

/// Constant pool indices of the attribute names the encoder writes itself.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct AttributeNames {
    pub code: Option<u16>,
    pub stack_map_table: Option<u16>,
    pub line_number_table: Option<u16>,
    pub local_variable_table: Option<u16>,
    pub local_variable_type_table: Option<u16>,
}

impl AttributeNames {
    fn resolve(cp: &ConstantPool) -> Self {
        Self {
            code: cp.find_utf8("Code"),
            stack_map_table: cp.find_utf8("StackMapTable"),
            line_number_table: cp.find_utf8("LineNumberTable"),
            local_variable_table: cp.find_utf8("LocalVariableTable"),
            local_variable_type_table: cp.find_utf8("LocalVariableTypeTable"),
        }
    }

    pub fn require(index: Option<u16>, name: &'static str) -> Result<u16, ClassFileError> {
        index.ok_or(ClassFileError::MissingAttributeName(name))
    }
}

pub(crate) struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    pub fn read_u1(&mut self) -> Result<u8, ClassFileError> {
        if self.remaining() < 1 {
            return Err(ClassFileError::UnexpectedEof);
        }
        let v = self.data[self.pos];
        self.pos += 1;
        Ok(v)
    }

    pub fn read_u2(&mut self) -> Result<u16, ClassFileError> {
        if self.remaining() < 2 {
            return Err(ClassFileError::UnexpectedEof);
        }
        let v = u16::from_be_bytes([self.data[self.pos], self.data[self.pos + 1]]);
        self.pos += 2;
        Ok(v)
    }

    pub fn read_u4(&mut self) -> Result<u32, ClassFileError> {
        if self.remaining() < 4 {
            return Err(ClassFileError::UnexpectedEof);
        }
        let v = u32::from_be_bytes([
            self.data[self.pos],
            self.data[self.pos + 1],
            self.data[self.pos + 2],
            self.data[self.pos + 3],
        ]);
        self.pos += 4;
        Ok(v)
    }

    pub fn read_i1(&mut self) -> Result<i8, ClassFileError> {
        Ok(self.read_u1()? as i8)
    }

    pub fn read_i2(&mut self) -> Result<i16, ClassFileError> {
        Ok(self.read_u2()? as i16)
    }

    pub fn read_i4(&mut self) -> Result<i32, ClassFileError> {
        Ok(self.read_u4()? as i32)
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], ClassFileError> {
        if self.remaining() < len {
            return Err(ClassFileError::UnexpectedEof);
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }
}

pub(crate) fn write_u1(out: &mut Vec<u8>, v: u8) {
    out.push(v);
}

pub(crate) fn write_u2(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_be_bytes());
}

pub(crate) fn write_u4(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_be_bytes());
}

pub(crate) fn write_attribute(out: &mut Vec<u8>, name_index: u16, info: &[u8]) {
    write_u2(out, name_index);
    write_u4(out, info.len() as u32);
    out.extend_from_slice(info);
}

impl ClassFile {
    pub fn decode(bytes: &[u8]) -> Result<Self, ClassFileError> {
        let mut r = Reader::new(bytes);
        let magic = r.read_u4()?;
        if magic != MAGIC {
            return Err(ClassFileError::InvalidMagic(magic));
        }

        let minor_version = r.read_u2()?;
        let major_version = r.read_u2()?;
        if !(MIN_MAJOR_VERSION..=MAX_MAJOR_VERSION).contains(&major_version) {
            return Err(ClassFileError::InvalidVersion { major: major_version, minor: minor_version });
        }

        let constant_pool = decode_constant_pool(&mut r)?;
        constant_pool.validate()?;

        let access_flags = r.read_u2()?;
        let this_class = r.read_u2()?;
        constant_pool.class_name(this_class)?;
        let super_class = r.read_u2()?;
        if super_class != 0 {
            constant_pool.class_name(super_class)?;
        }

        let interfaces_count = r.read_u2()?;
        let mut interfaces = Vec::with_capacity(interfaces_count as usize);
        for _ in 0..interfaces_count {
            let index = r.read_u2()?;
            constant_pool.class_name(index)?;
            interfaces.push(index);
        }

        let fields_count = r.read_u2()?;
        let mut fields = Vec::with_capacity(fields_count as usize);
        for _ in 0..fields_count {
            let (access_flags, name_index, descriptor_index) = decode_member_header(&mut r, &constant_pool)?;
            let attributes = decode_attributes(&mut r, &constant_pool, false)?;
            fields.push(FieldInfo { access_flags, name_index, descriptor_index, attributes });
        }

        let methods_count = r.read_u2()?;
        let mut methods = Vec::with_capacity(methods_count as usize);
        for _ in 0..methods_count {
            let (access_flags, name_index, descriptor_index) = decode_member_header(&mut r, &constant_pool)?;
            let attributes = decode_attributes(&mut r, &constant_pool, true)?;
            methods.push(MethodInfo { access_flags, name_index, descriptor_index, attributes });
        }

        let attributes = decode_attributes(&mut r, &constant_pool, false)?;

        if r.remaining() != 0 {
            return Err(ClassFileError::TrailingBytes(r.remaining()));
        }

        Ok(Self {
            minor_version,
            major_version,
            constant_pool,
            access_flags,
            this_class,
            super_class,
            interfaces,
            fields,
            methods,
            attributes,
        })
    }

    pub fn encode(&self) -> Result<Vec<u8>, ClassFileError> {
        let names = AttributeNames::resolve(&self.constant_pool);
        let mut out = Vec::with_capacity(1024);

        write_u4(&mut out, MAGIC);
        write_u2(&mut out, self.minor_version);
        write_u2(&mut out, self.major_version);
        encode_constant_pool(&mut out, &self.constant_pool)?;

        write_u2(&mut out, self.access_flags);
        write_u2(&mut out, self.this_class);
        write_u2(&mut out, self.super_class);

        write_u2(&mut out, self.interfaces.len() as u16);
        for &index in &self.interfaces {
            write_u2(&mut out, index);
        }

        write_u2(&mut out, self.fields.len() as u16);
        for field in &self.fields {
            write_u2(&mut out, field.access_flags);
            write_u2(&mut out, field.name_index);
            write_u2(&mut out, field.descriptor_index);
            encode_attributes(&mut out, &field.attributes, &names)?;
        }

        write_u2(&mut out, self.methods.len() as u16);
        for method in &self.methods {
            write_u2(&mut out, method.access_flags);
            write_u2(&mut out, method.name_index);
            write_u2(&mut out, method.descriptor_index);
            encode_attributes(&mut out, &method.attributes, &names)?;
        }

        encode_attributes(&mut out, &self.attributes, &names)?;
        Ok(out)
    }

    /// Internal name of this class, e.g. `org/eclipse/jdt/core/dom/ASTNode`.
    pub fn name(&self) -> Result<&str, ClassFileError> {
        self.constant_pool.class_name(self.this_class)
    }

    pub fn super_name(&self) -> Result<Option<&str>, ClassFileError> {
        if self.super_class == 0 {
            return Ok(None);
        }
        self.constant_pool.class_name(self.super_class).map(Some)
    }

    pub fn find_field(&self, name: &str) -> Option<&FieldInfo> {
        self.fields
            .iter()
            .find(|f| f.name(&self.constant_pool).map_or(false, |n| n == name))
    }

    /// Whether the verifier for this class version requires stack map frames.
    pub fn uses_stack_maps(&self) -> bool {
        self.major_version >= STACK_MAP_MAJOR_VERSION
    }
}

fn decode_constant_pool(r: &mut Reader) -> Result<ConstantPool, ClassFileError> {
    let count = r.read_u2()? as usize;
    if count == 0 {
        return Err(ClassFileError::InvalidConstantPoolIndex(0));
    }
    let mut entries: Vec<Option<CpInfo>> = Vec::with_capacity(count);
    entries.push(None); // index 0 is unused

    let mut i = 1;
    while i < count {
        let tag = r.read_u1()?;
        let entry = match tag {
            1 => {
                let len = r.read_u2()? as usize;
                let bytes = r.read_bytes(len)?;
                CpInfo::Utf8(mutf8::decode(bytes)?)
            }
            3 => CpInfo::Integer(r.read_i4()?),
            4 => CpInfo::Float(r.read_u4()?),
            5 | 6 => {
                if i + 1 >= count {
                    return Err(ClassFileError::InvalidConstantPoolIndex(i as u16));
                }
                let high = r.read_u4()? as u64;
                let low = r.read_u4()? as u64;
                let bits = (high << 32) | low;
                let value = if tag == 5 { CpInfo::Long(bits as i64) } else { CpInfo::Double(bits) };
                entries.push(Some(value));
                entries.push(None);
                i += 2;
                continue;
            }
            7 => CpInfo::Class { name_index: r.read_u2()? },
            8 => CpInfo::String { string_index: r.read_u2()? },
            9 => CpInfo::Fieldref { class_index: r.read_u2()?, name_and_type_index: r.read_u2()? },
            10 => CpInfo::Methodref { class_index: r.read_u2()?, name_and_type_index: r.read_u2()? },
            11 => CpInfo::InterfaceMethodref { class_index: r.read_u2()?, name_and_type_index: r.read_u2()? },
            12 => CpInfo::NameAndType { name_index: r.read_u2()?, descriptor_index: r.read_u2()? },
            15 => CpInfo::MethodHandle { reference_kind: r.read_u1()?, reference_index: r.read_u2()? },
            16 => CpInfo::MethodType { descriptor_index: r.read_u2()? },
            17 => CpInfo::Dynamic { bootstrap_method_attr_index: r.read_u2()?, name_and_type_index: r.read_u2()? },
            18 => CpInfo::InvokeDynamic { bootstrap_method_attr_index: r.read_u2()?, name_and_type_index: r.read_u2()? },
            19 => CpInfo::Module { name_index: r.read_u2()? },
            20 => CpInfo::Package { name_index: r.read_u2()? },
            _ => return Err(ClassFileError::InvalidConstantPoolTag(tag)),
        };

        entries.push(Some(entry));
        i += 1;
    }

    Ok(ConstantPool { entries })
}

fn encode_constant_pool(out: &mut Vec<u8>, cp: &ConstantPool) -> Result<(), ClassFileError> {
    write_u2(out, cp.count());
    for entry in cp.entries.iter().flatten() {
        match entry {
            CpInfo::Utf8(s) => {
                let bytes = mutf8::encode(s);
                if bytes.len() > u16::MAX as usize {
                    return Err(ClassFileError::StringTooLong);
                }
                write_u1(out, 1);
                write_u2(out, bytes.len() as u16);
                out.extend_from_slice(&bytes);
            }
            CpInfo::Integer(v) => {
                write_u1(out, 3);
                write_u4(out, *v as u32);
            }
            CpInfo::Float(bits) => {
                write_u1(out, 4);
                write_u4(out, *bits);
            }
            CpInfo::Long(v) => {
                write_u1(out, 5);
                out.extend_from_slice(&v.to_be_bytes());
            }
            CpInfo::Double(bits) => {
                write_u1(out, 6);
                out.extend_from_slice(&bits.to_be_bytes());
            }
            CpInfo::Class { name_index } => {
                write_u1(out, 7);
                write_u2(out, *name_index);
            }
            CpInfo::String { string_index } => {
                write_u1(out, 8);
                write_u2(out, *string_index);
            }
            CpInfo::Fieldref { class_index, name_and_type_index } => {
                write_u1(out, 9);
                write_u2(out, *class_index);
                write_u2(out, *name_and_type_index);
            }
            CpInfo::Methodref { class_index, name_and_type_index } => {
                write_u1(out, 10);
                write_u2(out, *class_index);
                write_u2(out, *name_and_type_index);
            }
            CpInfo::InterfaceMethodref { class_index, name_and_type_index } => {
                write_u1(out, 11);
                write_u2(out, *class_index);
                write_u2(out, *name_and_type_index);
            }
            CpInfo::NameAndType { name_index, descriptor_index } => {
                write_u1(out, 12);
                write_u2(out, *name_index);
                write_u2(out, *descriptor_index);
            }
            CpInfo::MethodHandle { reference_kind, reference_index } => {
                write_u1(out, 15);
                write_u1(out, *reference_kind);
                write_u2(out, *reference_index);
            }
            CpInfo::MethodType { descriptor_index } => {
                write_u1(out, 16);
                write_u2(out, *descriptor_index);
            }
            CpInfo::Dynamic { bootstrap_method_attr_index, name_and_type_index } => {
                write_u1(out, 17);
                write_u2(out, *bootstrap_method_attr_index);
                write_u2(out, *name_and_type_index);
            }
            CpInfo::InvokeDynamic { bootstrap_method_attr_index, name_and_type_index } => {
                write_u1(out, 18);
                write_u2(out, *bootstrap_method_attr_index);
                write_u2(out, *name_and_type_index);
            }
            CpInfo::Module { name_index } => {
                write_u1(out, 19);
                write_u2(out, *name_index);
            }
            CpInfo::Package { name_index } => {
                write_u1(out, 20);
                write_u2(out, *name_index);
            }
        }
    }
    Ok(())
}

fn decode_member_header(r: &mut Reader, cp: &ConstantPool) -> Result<(u16, u16, u16), ClassFileError> {
    let access_flags = r.read_u2()?;
    let name_index = r.read_u2()?;
    let descriptor_index = r.read_u2()?;
    cp.get_utf8(name_index)?;
    cp.get_utf8(descriptor_index)?;
    Ok((access_flags, name_index, descriptor_index))
}

fn decode_attributes(r: &mut Reader, cp: &ConstantPool, in_method: bool) -> Result<Vec<AttributeInfo>, ClassFileError> {
    let count = r.read_u2()? as usize;
    let mut attrs = Vec::with_capacity(count);
    for _ in 0..count {
        let name_index = r.read_u2()?;
        let length = r.read_u4()? as usize;
        let name = cp.get_utf8(name_index)?;
        let info = r.read_bytes(length)?;

        let attr = if in_method && name == "Code" {
            let mut sub = Reader::new(info);
            let code = code::decode_code_attribute(&mut sub, cp)?;
            if sub.remaining() != 0 {
                return Err(ClassFileError::InvalidAttribute(name.to_string()));
            }
            AttributeInfo::Code(code)
        } else {
            AttributeInfo::Other { name_index, info: info.to_vec() }
        };
        attrs.push(attr);
    }
    Ok(attrs)
}

fn encode_attributes(out: &mut Vec<u8>, attrs: &[AttributeInfo], names: &AttributeNames) -> Result<(), ClassFileError> {
    write_u2(out, attrs.len() as u16);
    for attr in attrs {
        match attr {
            AttributeInfo::Code(code) => {
                let name_index = AttributeNames::require(names.code, "Code")?;
                let info = code.encode(names)?;
                write_attribute(out, name_index, &info);
            }
            AttributeInfo::Other { name_index, info } => write_attribute(out, *name_index, info),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_class() -> ClassFile {
        let mut cp = ConstantPool::new();
        let this_class = cp.ensure_class("Test").unwrap();
        let super_class = cp.ensure_class("java/lang/Object").unwrap();
        ClassFile {
            minor_version: 0,
            major_version: 52,
            constant_pool: cp,
            access_flags: ACC_PUBLIC,
            this_class,
            super_class,
            interfaces: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            attributes: Vec::new(),
        }
    }

    #[test]
    fn ensure_deduplicates() {
        let mut cp = ConstantPool::new();
        let a = cp.ensure_method_ref("Hooks", "fix", "(I)I").unwrap();
        let b = cp.ensure_method_ref("Hooks", "fix", "(I)I").unwrap();
        assert_eq!(a, b);
        // Utf8 x3, Class, NameAndType, Methodref
        assert_eq!(cp.count(), 7);
    }

    #[test]
    fn wide_constants_take_two_slots() {
        let mut cp = ConstantPool::new();
        let long = cp.ensure_long(1 << 40).unwrap();
        let next = cp.ensure_utf8("after").unwrap();
        assert_eq!(long, 1);
        assert_eq!(next, 3);
        assert!(cp.get(2).is_err());
    }

    #[test]
    fn minimal_class_round_trips() {
        let class = minimal_class();
        let bytes = class.encode().unwrap();
        let decoded = ClassFile::decode(&bytes).unwrap();
        assert_eq!(decoded, class);
        assert_eq!(decoded.name().unwrap(), "Test");
        assert_eq!(decoded.super_name().unwrap(), Some("java/lang/Object"));
    }

    #[test]
    fn nan_constants_compare_by_bits() {
        let mut class = minimal_class();
        class.constant_pool.ensure_float(f32::NAN).unwrap();
        let decoded = ClassFile::decode(&class.encode().unwrap()).unwrap();
        assert_eq!(decoded, class);
    }

    #[test]
    fn rejects_bad_magic_and_trailing_bytes() {
        let mut bytes = minimal_class().encode().unwrap();
        bytes.push(0);
        assert_eq!(ClassFile::decode(&bytes), Err(ClassFileError::TrailingBytes(1)));
        bytes[0] = 0;
        assert!(matches!(ClassFile::decode(&bytes), Err(ClassFileError::InvalidMagic(_))));
    }

    #[test]
    fn rejects_truncated_input() {
        let bytes = minimal_class().encode().unwrap();
        for len in [4, 9, bytes.len() - 1] {
            assert!(ClassFile::decode(&bytes[..len]).is_err(), "len {len}");
        }
    }

    #[test]
    fn rejects_class_index_pointing_at_utf8() {
        let mut class = minimal_class();
        class.this_class = class.constant_pool.find_utf8("Test").unwrap();
        let bytes = class.encode().unwrap();
        assert!(matches!(
            ClassFile::decode(&bytes),
            Err(ClassFileError::InvalidConstantPoolIndex(_))
        ));
    }
}
