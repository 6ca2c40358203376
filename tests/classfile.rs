mod common;

use classpatch::classfile::opcodes::*;
use classpatch::classfile::{AttributeInfo, ClassFile, ClassFileError, CpInfo, Insn, Instruction, Operand};
use classpatch::prelude::*;

use common::{method, push_attr, u1, u2, u4, Body, ClassBuilder, CpBuilder};

fn attribute_names<'a>(class: &'a ClassFile, attributes: &[AttributeInfo]) -> Vec<&'a str> {
    attributes
        .iter()
        .map(|a| match a {
            AttributeInfo::Code(_) => "Code",
            AttributeInfo::Other { name_index, .. } => class.constant_pool.get_utf8(*name_index).unwrap(),
        })
        .collect()
}

/// A class carrying the attributes a compiler typically emits, plus ones the
/// engine has never heard of.
fn build_test_class() -> Vec<u8> {
    let mut cp = CpBuilder::new();
    let class_test = cp.class("Test");
    let class_object = cp.class("java/lang/Object");
    let utf_count = cp.utf8("count");
    let utf_count_desc = cp.utf8("(I)I");
    let utf_field_name = cp.utf8("LIMIT");
    let utf_long_desc = cp.utf8("J");
    let const_long = cp.long(1 << 40);
    let utf_code = cp.utf8("Code");
    let utf_lnt = cp.utf8("LineNumberTable");
    let utf_lvt = cp.utf8("LocalVariableTable");
    let utf_lvtt = cp.utf8("LocalVariableTypeTable");
    let utf_smt = cp.utf8("StackMapTable");
    let utf_param_name = cp.utf8("n");
    let utf_int_desc = cp.utf8("I");
    let utf_signature_val = cp.utf8("TT;");
    let utf_constant_value = cp.utf8("ConstantValue");
    let utf_exceptions = cp.utf8("Exceptions");
    let utf_method_params = cp.utf8("MethodParameters");
    let utf_source_file = cp.utf8("SourceFile");
    let utf_source_name = cp.utf8("Test.java");
    let utf_signature = cp.utf8("Signature");
    let utf_deprecated = cp.utf8("Deprecated");
    let utf_inner_classes = cp.utf8("InnerClasses");
    let utf_nest_members = cp.utf8("NestMembers");
    let utf_unknown = cp.utf8("UnknownAttr");
    let utf_unknown_code = cp.utf8("UnknownCodeAttr");
    let utf_module_packages = cp.utf8("ModulePackages");
    cp.module("my.module");
    let package_index = cp.package("my/pkg");

    let mut bytes = Vec::new();
    u4(&mut bytes, 0xCAFEBABE);
    u2(&mut bytes, 0);
    u2(&mut bytes, 52);
    cp.write(&mut bytes);

    u2(&mut bytes, 0x0021);
    u2(&mut bytes, class_test);
    u2(&mut bytes, class_object);
    u2(&mut bytes, 0);

    // static final long LIMIT = 1L << 40;
    u2(&mut bytes, 1);
    u2(&mut bytes, ACC_PUBLIC | ACC_STATIC | ACC_FINAL);
    u2(&mut bytes, utf_field_name);
    u2(&mut bytes, utf_long_desc);
    u2(&mut bytes, 1);
    let mut cv_info = Vec::new();
    u2(&mut cv_info, const_long);
    push_attr(&mut bytes, utf_constant_value, &cv_info);

    // static int count(int n) { while (n != 0) n--; return n; }
    u2(&mut bytes, 1);
    u2(&mut bytes, ACC_PUBLIC | ACC_STATIC);
    u2(&mut bytes, utf_count);
    u2(&mut bytes, utf_count_desc);

    let code = [0x1a, IFEQ, 0, 9, IINC, 0, 0xff, GOTO, 0xff, 0xf9, 0x1a, IRETURN];
    let mut code_info = Vec::new();
    u2(&mut code_info, 1);
    u2(&mut code_info, 1);
    u4(&mut code_info, code.len() as u32);
    code_info.extend_from_slice(&code);
    u2(&mut code_info, 0);

    let mut code_sub_attrs = Vec::new();
    let mut lnt_info = Vec::new();
    u2(&mut lnt_info, 2);
    for (pc, line) in [(0, 3), (10, 4)] {
        u2(&mut lnt_info, pc);
        u2(&mut lnt_info, line);
    }
    push_attr(&mut code_sub_attrs, utf_lnt, &lnt_info);

    let mut lvt_info = Vec::new();
    u2(&mut lvt_info, 1);
    u2(&mut lvt_info, 0);
    u2(&mut lvt_info, code.len() as u16);
    u2(&mut lvt_info, utf_param_name);
    u2(&mut lvt_info, utf_int_desc);
    u2(&mut lvt_info, 0);
    push_attr(&mut code_sub_attrs, utf_lvt, &lvt_info);

    let mut lvtt_info = Vec::new();
    u2(&mut lvtt_info, 1);
    u2(&mut lvtt_info, 0);
    u2(&mut lvtt_info, code.len() as u16);
    u2(&mut lvtt_info, utf_param_name);
    u2(&mut lvtt_info, utf_signature_val);
    u2(&mut lvtt_info, 0);
    push_attr(&mut code_sub_attrs, utf_lvtt, &lvtt_info);

    let mut smt_info = Vec::new();
    u2(&mut smt_info, 2);
    u1(&mut smt_info, 0);
    u1(&mut smt_info, 9);
    push_attr(&mut code_sub_attrs, utf_smt, &smt_info);

    push_attr(&mut code_sub_attrs, utf_unknown_code, &[1, 2, 3]);

    u2(&mut code_info, 5);
    code_info.extend_from_slice(&code_sub_attrs);

    let mut method_attrs = Vec::new();
    push_attr(&mut method_attrs, utf_code, &code_info);
    let mut exc_info = Vec::new();
    u2(&mut exc_info, 1);
    u2(&mut exc_info, class_object);
    push_attr(&mut method_attrs, utf_exceptions, &exc_info);
    let mut params_info = Vec::new();
    u1(&mut params_info, 1);
    u2(&mut params_info, utf_param_name);
    u2(&mut params_info, 0);
    push_attr(&mut method_attrs, utf_method_params, &params_info);
    u2(&mut bytes, 3);
    bytes.extend_from_slice(&method_attrs);

    let mut class_attrs = Vec::new();
    let mut sf_info = Vec::new();
    u2(&mut sf_info, utf_source_name);
    push_attr(&mut class_attrs, utf_source_file, &sf_info);
    let mut sig_info = Vec::new();
    u2(&mut sig_info, utf_signature_val);
    push_attr(&mut class_attrs, utf_signature, &sig_info);
    push_attr(&mut class_attrs, utf_deprecated, &[]);
    let mut inner_info = Vec::new();
    u2(&mut inner_info, 1);
    u2(&mut inner_info, class_test);
    u2(&mut inner_info, class_object);
    u2(&mut inner_info, utf_count);
    u2(&mut inner_info, 0x0001);
    push_attr(&mut class_attrs, utf_inner_classes, &inner_info);
    let mut nest_members_info = Vec::new();
    u2(&mut nest_members_info, 1);
    u2(&mut nest_members_info, class_test);
    push_attr(&mut class_attrs, utf_nest_members, &nest_members_info);
    let mut module_packages_info = Vec::new();
    u2(&mut module_packages_info, 1);
    u2(&mut module_packages_info, package_index);
    push_attr(&mut class_attrs, utf_module_packages, &module_packages_info);
    push_attr(&mut class_attrs, utf_unknown, &[0xde, 0xad]);
    u2(&mut bytes, 7);
    bytes.extend_from_slice(&class_attrs);

    bytes
}

#[test]
fn decodes_an_attribute_rich_class() {
    let class = ClassFile::decode(&build_test_class()).unwrap();
    assert_eq!(class.name().unwrap(), "Test");
    assert_eq!(class.super_name().unwrap(), Some("java/lang/Object"));
    assert_eq!(class.major_version, 52);

    let field = class.find_field("LIMIT").unwrap();
    assert_eq!(attribute_names(&class, &field.attributes), ["ConstantValue"]);

    let count = method(&class, "count", "(I)I");
    assert_eq!(attribute_names(&class, &count.attributes), ["Code", "Exceptions", "MethodParameters"]);
    let code = count.code().unwrap();
    assert!(!code.is_edited());
    assert_eq!(code.ops().count(), 6);
    assert_eq!(code.line_numbers.as_ref().unwrap().len(), 2);
    assert_eq!(code.local_variables.as_ref().unwrap().len(), 1);
    assert_eq!(code.local_variable_types.as_ref().unwrap().len(), 1);
    assert_eq!(code.stack_map.as_ref().unwrap().len(), 2);
    assert_eq!(code.other_attributes.len(), 1);

    assert_eq!(
        attribute_names(&class, &class.attributes),
        ["SourceFile", "Signature", "Deprecated", "InnerClasses", "NestMembers", "ModulePackages", "UnknownAttr"]
    );
}

#[test]
fn re_encoding_preserves_the_model() {
    let class = ClassFile::decode(&build_test_class()).unwrap();
    let again = ClassFile::decode(&class.encode().unwrap()).unwrap();
    assert_eq!(again, class);
    assert_eq!(again.encode().unwrap(), class.encode().unwrap());
}

#[test]
fn long_constants_take_two_slots() {
    let class = ClassFile::decode(&build_test_class()).unwrap();
    let index = class.constant_pool.iter().find(|(_, e)| matches!(e, CpInfo::Long(_))).unwrap().0;
    assert_eq!(class.constant_pool.get(index).unwrap(), &CpInfo::Long(1 << 40));
    assert_eq!(class.constant_pool.get(index + 1), Err(ClassFileError::InvalidConstantPoolIndex(index + 1)));
    assert_eq!(class.constant_pool.get_utf8(index + 2).unwrap(), "Code");
}

#[test]
fn edited_code_shifts_tables_and_drops_unknown_attributes() {
    let mut class = ClassFile::decode(&build_test_class()).unwrap();
    let index = class.methods.iter().position(|m| m.code().is_some()).unwrap();
    let code = class.methods[index].code_mut().unwrap();
    code.insert(0, [Insn::Op(Instruction::simple(NOP))]);
    assert!(code.is_edited());

    let patched = ClassFile::decode(&class.encode().unwrap()).unwrap();
    let code = method(&patched, "count", "(I)I").code().unwrap();
    assert!(code.other_attributes.is_empty());

    let insns = code.instructions();
    let first_line = code.line_numbers.as_ref().unwrap()[0].start;
    assert_eq!(insns[0], Insn::Op(Instruction::simple(NOP)));
    assert_eq!(insns.iter().position(|i| *i == Insn::Label(first_line)), Some(1));

    // The backward branch still reaches the loop head, after the inserted nop.
    let goto = code.ops().find(|(_, op)| op.opcode == GOTO).unwrap().1;
    assert_eq!(goto.operand, Operand::Branch(code.stack_map.as_ref().unwrap()[0].label));

    // Unedited methods and class attributes are untouched.
    assert_eq!(patched.attributes, class.attributes);
}

#[test]
fn rejects_malformed_input() {
    let bytes = build_test_class();

    let mut bad_magic = bytes.clone();
    bad_magic[0] = 0;
    assert!(matches!(ClassFile::decode(&bad_magic), Err(ClassFileError::InvalidMagic(_))));

    let mut old = bytes.clone();
    old[7] = 44;
    assert_eq!(ClassFile::decode(&old), Err(ClassFileError::InvalidVersion { major: 44, minor: 0 }));

    assert_eq!(ClassFile::decode(&bytes[..bytes.len() - 3]), Err(ClassFileError::UnexpectedEof));

    let mut trailing = bytes;
    trailing.push(0);
    assert_eq!(ClassFile::decode(&trailing), Err(ClassFileError::TrailingBytes(1)));
}

#[test]
fn rejects_branches_into_an_instruction() {
    let mut class = ClassBuilder::new("Test", 49);
    class.method(ACC_PUBLIC | ACC_STATIC, "spin", "()V", Body::new(0, 0, vec![GOTO, 0, 1, RETURN]));
    assert!(matches!(ClassFile::decode(&class.build()), Err(ClassFileError::InvalidCode { offset: 1, .. })));
}

#[test]
fn rejects_lone_surrogates() {
    let mut class = ClassBuilder::new("Test", 52);
    class.cp.push(vec![1, 0, 3, 0xed, 0xa0, 0x80]);
    assert_eq!(ClassFile::decode(&class.build()), Err(ClassFileError::InvalidUtf8));
}

#[test]
fn large_pools_promote_ldc() {
    let mut class = ClassBuilder::new("Test", 52);
    for i in 0..300 {
        class.cp.integer(i);
    }
    class.method(ACC_PUBLIC, "label", "()Ljava/lang/String;", Body::new(1, 1, vec![ACONST_NULL, ARETURN]));
    let script = ExitFromMethodEarly::new(MethodTarget::new("Test", "label"), Hook::new("Checks", "always", "()Z"))
        .returning(EarlyReturn::Str("patched".into()));

    let decoded = ClassFile::decode(&class.build()).unwrap();
    let patched = Script::from(script).apply(&decoded).unwrap().unwrap();
    let patched = ClassFile::decode(&patched.encode().unwrap()).unwrap();

    let code = method(&patched, "label", "()Ljava/lang/String;").code().unwrap();
    let (_, ldc) = code.ops().find(|(_, op)| matches!(op.opcode, LDC | LDC_W)).unwrap();
    assert_eq!(ldc.opcode, LDC_W);
    let Operand::Constant(index) = ldc.operand else { panic!("ldc without a constant") };
    assert!(index > 255);
    let CpInfo::String { string_index } = patched.constant_pool.get(index).unwrap() else { panic!("not a string") };
    assert_eq!(patched.constant_pool.get_utf8(*string_index).unwrap(), "patched");
}
