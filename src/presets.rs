//! Built-in script sets.

use crate::classfile::{ACC_PUBLIC, ACC_TRANSIENT};
use crate::config::Preset;
use crate::descriptor::DescriptorError;
use crate::hook::{Hook, StackRequest};
use crate::manager::ScriptManagerBuilder;
use crate::script::{AddField, ExitFromMethodEarly, WrapReturnValue};
use crate::target::MethodTarget;

const AST_CONVERTER: &str = "org.eclipse.jdt.core.dom.ASTConverter";
const PARSER: &str = "org.eclipse.jdt.internal.compiler.parser.Parser";
const AST: &str = "org.eclipse.jdt.internal.compiler.ast";
const PATCH_FIXES: &str = "java/lombok/eclipse/PatchFixes";
const CLASS_LOADER_WORKAROUND: &str = "java/lombok/eclipse/ClassLoaderWorkaround";

fn ast(simple_name: &str) -> String {
    format!("{AST}.{simple_name}")
}

/// The builder for a configured preset.
pub fn for_preset(preset: Preset) -> Result<ScriptManagerBuilder, DescriptorError> {
    match preset {
        Preset::Eclipse => eclipse(),
        Preset::None => Ok(ScriptManagerBuilder::new()),
    }
}

/// Scripts that hand Eclipse JDT compiler ASTs to an annotation processor
/// before the IDE uses them.
///
/// Registration order matters: the AST node classes get their extra fields
/// before any script that relies on them.
pub fn eclipse() -> Result<ScriptManagerBuilder, DescriptorError> {
    let transient = ACC_PUBLIC | ACC_TRANSIENT;
    let check_bit24 = Hook::new(PATCH_FIXES, "checkBit24", "(Ljava/lang/Object;)Z");
    let cud = ast("CompilationUnitDeclaration");

    let mut builder = ScriptManagerBuilder::new();
    builder
        .register(
            WrapReturnValue::new(
                MethodTarget::new(AST_CONVERTER, "retrieveStartingCatchPosition"),
                Hook::new(PATCH_FIXES, "fixRetrieveStartingCatchPosition", "(I)I"),
            )
            .request(StackRequest::PARAM1),
        )
        .register(AddField::new(
            &ast("ASTNode"),
            transient,
            "$generatedBy",
            "Lorg/eclipse/jdt/internal/compiler/ast/ASTNode;",
        ))
        .register(AddField::new("org.eclipse.jdt.core.dom.ASTNode", transient, "$isGenerated", "Z"))
        .register(AddField::new(&cud, transient, "$lombokAST", "Ljava/lang/Object;"))
        .register(
            WrapReturnValue::new(
                MethodTarget::new(PARSER, "getMethodBodies").returns("void")?.params([cud.as_str()])?,
                Hook::new(
                    CLASS_LOADER_WORKAROUND,
                    "transformCompilationUnitDeclaration",
                    "(Ljava/lang/Object;Ljava/lang/Object;)V",
                ),
            )
            .requests([StackRequest::This, StackRequest::PARAM1]),
        )
        .register(
            WrapReturnValue::new(
                MethodTarget::new(PARSER, "endParse").returns(&cud)?.params(["int"])?,
                Hook::new(
                    CLASS_LOADER_WORKAROUND,
                    "transformCompilationUnitDeclarationSwapped",
                    "(Ljava/lang/Object;Ljava/lang/Object;)V",
                ),
            )
            .requests([StackRequest::This, StackRequest::ReturnValue]),
        )
        .register(
            ExitFromMethodEarly::new(
                MethodTarget::new(PARSER, "parse").returns("void")?.params([ast("MethodDeclaration"), cud.clone()])?,
                check_bit24.clone(),
            )
            .request(StackRequest::PARAM1),
        )
        .register(
            ExitFromMethodEarly::new(
                MethodTarget::new(PARSER, "parse")
                    .returns("void")?
                    .params([ast("ConstructorDeclaration"), cud.clone(), "boolean".to_owned()])?,
                check_bit24.clone(),
            )
            .request(StackRequest::PARAM1),
        )
        .register(
            ExitFromMethodEarly::new(
                MethodTarget::new(PARSER, "parse")
                    .returns("void")?
                    .params([ast("Initializer"), ast("TypeDeclaration"), cud.clone()])?,
                check_bit24,
            )
            .request(StackRequest::PARAM1),
        );
    Ok(builder)
}
