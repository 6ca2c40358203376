//! JVM opcode constants used by the decoder, the encoder and the patch scripts.
//!
//! Only the opcodes the crate refers to by name are listed; the operand layout
//! of every opcode is described by [`operand_kind`].

pub const NOP: u8 = 0x00;
pub const ACONST_NULL: u8 = 0x01;
pub const ICONST_M1: u8 = 0x02;
pub const ICONST_0: u8 = 0x03;
pub const ICONST_5: u8 = 0x08;
pub const LCONST_0: u8 = 0x09;
pub const LCONST_1: u8 = 0x0a;
pub const FCONST_0: u8 = 0x0b;
pub const FCONST_2: u8 = 0x0d;
pub const DCONST_0: u8 = 0x0e;
pub const DCONST_1: u8 = 0x0f;
pub const BIPUSH: u8 = 0x10;
pub const SIPUSH: u8 = 0x11;
pub const LDC: u8 = 0x12;
pub const LDC_W: u8 = 0x13;
pub const LDC2_W: u8 = 0x14;

pub const ILOAD: u8 = 0x15;
pub const LLOAD: u8 = 0x16;
pub const FLOAD: u8 = 0x17;
pub const DLOAD: u8 = 0x18;
pub const ALOAD: u8 = 0x19;
pub const ALOAD_0: u8 = 0x2a;

pub const ISTORE: u8 = 0x36;
pub const LSTORE: u8 = 0x37;
pub const FSTORE: u8 = 0x38;
pub const DSTORE: u8 = 0x39;
pub const ASTORE: u8 = 0x3a;

pub const POP: u8 = 0x57;
pub const POP2: u8 = 0x58;
pub const DUP: u8 = 0x59;
pub const DUP2: u8 = 0x5c;

pub const IADD: u8 = 0x60;
pub const IINC: u8 = 0x84;

pub const IFEQ: u8 = 0x99;
pub const IFNE: u8 = 0x9a;
pub const IF_ACMPNE: u8 = 0xa6;
pub const GOTO: u8 = 0xa7;
pub const JSR: u8 = 0xa8;
pub const RET: u8 = 0xa9;
pub const TABLESWITCH: u8 = 0xaa;
pub const LOOKUPSWITCH: u8 = 0xab;

pub const IRETURN: u8 = 0xac;
pub const LRETURN: u8 = 0xad;
pub const FRETURN: u8 = 0xae;
pub const DRETURN: u8 = 0xaf;
pub const ARETURN: u8 = 0xb0;
pub const RETURN: u8 = 0xb1;

pub const GETSTATIC: u8 = 0xb2;
pub const PUTFIELD: u8 = 0xb5;
pub const INVOKEVIRTUAL: u8 = 0xb6;
pub const INVOKESPECIAL: u8 = 0xb7;
pub const INVOKESTATIC: u8 = 0xb8;
pub const INVOKEINTERFACE: u8 = 0xb9;
pub const INVOKEDYNAMIC: u8 = 0xba;
pub const NEW: u8 = 0xbb;
pub const NEWARRAY: u8 = 0xbc;
pub const ANEWARRAY: u8 = 0xbd;
pub const ATHROW: u8 = 0xbf;
pub const CHECKCAST: u8 = 0xc0;
pub const INSTANCEOF: u8 = 0xc1;
pub const WIDE: u8 = 0xc4;
pub const MULTIANEWARRAY: u8 = 0xc5;
pub const IFNULL: u8 = 0xc6;
pub const IFNONNULL: u8 = 0xc7;
pub const GOTO_W: u8 = 0xc8;
pub const JSR_W: u8 = 0xc9;

/// Operand layout of an opcode as it appears in a `Code` attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandKind {
    None,
    Byte,
    Short,
    /// `ldc`: one-byte constant pool index.
    ConstantU1,
    /// Two-byte constant pool index (field/method refs, `ldc_w`, `new`, ...).
    ConstantU2,
    /// Local variable index; one byte, two under a `wide` prefix.
    Local,
    Iinc,
    Branch16,
    Branch32,
    TableSwitch,
    LookupSwitch,
    InvokeInterface,
    InvokeDynamic,
    NewArray,
    MultiANewArray,
    Wide,
}

/// Returns the operand layout for `opcode`, or `None` for opcodes that may not
/// appear in a class file (`breakpoint`, `impdep1`, `impdep2` and the
/// unassigned range).
pub fn operand_kind(opcode: u8) -> Option<OperandKind> {
    use OperandKind::*;
    let kind = match opcode {
        0x00..=0x0f => None,
        BIPUSH => Byte,
        SIPUSH => Short,
        LDC => ConstantU1,
        LDC_W | LDC2_W => ConstantU2,
        0x15..=0x19 => Local,
        0x1a..=0x35 => None,
        0x36..=0x3a => Local,
        0x3b..=0x83 => None,
        IINC => Iinc,
        0x85..=0x98 => None,
        0x99..=0xa8 => Branch16,
        RET => Local,
        TABLESWITCH => TableSwitch,
        LOOKUPSWITCH => LookupSwitch,
        0xac..=0xb1 => None,
        0xb2..=0xb8 => ConstantU2,
        INVOKEINTERFACE => InvokeInterface,
        INVOKEDYNAMIC => InvokeDynamic,
        NEW => ConstantU2,
        NEWARRAY => NewArray,
        ANEWARRAY => ConstantU2,
        0xbe | 0xbf => None,
        CHECKCAST | INSTANCEOF => ConstantU2,
        0xc2 | 0xc3 => None,
        WIDE => Wide,
        MULTIANEWARRAY => MultiANewArray,
        IFNULL | IFNONNULL => Branch16,
        GOTO_W | JSR_W => Branch32,
        _ => return Option::None,
    };
    Some(kind)
}

/// `ireturn` through `return`.
pub fn is_return(opcode: u8) -> bool {
    (IRETURN..=RETURN).contains(&opcode)
}
