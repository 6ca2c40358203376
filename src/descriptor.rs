//! Field and method descriptors.
//!
//! Patch scripts name types the way Java source does (`int`,
//! `java.lang.String[]`); the class file stores descriptors (`I`,
//! `[Ljava/lang/String;`). This module converts between the two and answers
//! the few type questions code emission needs: slot sizes and the
//! assignability rule hooks are checked against.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed descriptor `{0}`")]
pub struct DescriptorError(pub String);

/// A parsed method descriptor borrowing its components from the source string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDescriptor<'a> {
    pub params: Vec<&'a str>,
    /// `V` for void methods.
    pub ret: &'a str,
}

impl<'a> MethodDescriptor<'a> {
    pub fn parse(descriptor: &'a str) -> Result<Self, DescriptorError> {
        let malformed = || DescriptorError(descriptor.to_owned());
        let body = descriptor.strip_prefix('(').ok_or_else(malformed)?;
        let close = body.find(')').ok_or_else(malformed)?;
        let (mut params_str, ret) = (&body[..close], &body[close + 1..]);

        let mut params = Vec::new();
        while !params_str.is_empty() {
            let len = field_len(params_str).ok_or_else(malformed)?;
            params.push(&params_str[..len]);
            params_str = &params_str[len..];
        }

        if ret != "V" && field_len(ret) != Some(ret.len()) {
            return Err(malformed());
        }
        Ok(Self { params, ret })
    }

    pub fn is_void(&self) -> bool {
        self.ret == "V"
    }

    /// Local variable slots taken by the parameters, excluding `this`.
    pub fn param_slots(&self) -> u16 {
        self.params.iter().map(|p| slot_size(p)).sum()
    }
}

/// Length of the field descriptor at the start of `s`.
fn field_len(s: &str) -> Option<usize> {
    let bytes = s.as_bytes();
    let mut i = 0;
    while bytes.get(i) == Some(&b'[') {
        i += 1;
    }
    if i > 255 {
        return None;
    }
    match bytes.get(i)? {
        b'B' | b'C' | b'D' | b'F' | b'I' | b'J' | b'S' | b'Z' => Some(i + 1),
        b'L' => {
            let end = s[i..].find(';')? + i;
            // An empty class name or one containing descriptor punctuation is invalid.
            let name = &s[i + 1..end];
            if name.is_empty() || name.contains(['.', '[', '(', ')']) {
                return None;
            }
            Some(end + 1)
        }
        _ => None,
    }
}

/// Whether `s` is exactly one field descriptor.
pub fn is_field_descriptor(s: &str) -> bool {
    field_len(s) == Some(s.len())
}

/// Converts a binary class name (`org.example.Foo`) to internal form (`org/example/Foo`).
pub fn internal_name(name: &str) -> String {
    name.replace('.', "/")
}

/// Converts a Java type name to a descriptor: `int` → `I`, `void` → `V`,
/// `java.lang.String[]` → `[Ljava/lang/String;`.
pub fn from_java_type(name: &str) -> Result<String, DescriptorError> {
    let trimmed = name.trim();
    let mut base = trimmed;
    let mut dims = 0;
    while let Some(inner) = base.strip_suffix("[]") {
        base = inner.trim_end();
        dims += 1;
    }

    let element = match base {
        "boolean" => "Z".to_owned(),
        "byte" => "B".to_owned(),
        "char" => "C".to_owned(),
        "short" => "S".to_owned(),
        "int" => "I".to_owned(),
        "long" => "J".to_owned(),
        "float" => "F".to_owned(),
        "double" => "D".to_owned(),
        "void" if dims == 0 => "V".to_owned(),
        "" | "void" => return Err(DescriptorError(name.to_owned())),
        class => {
            if class.contains(|c: char| c.is_whitespace() || "[];()<>".contains(c)) {
                return Err(DescriptorError(name.to_owned()));
            }
            format!("L{};", internal_name(class))
        }
    };
    Ok("[".repeat(dims) + &element)
}

/// Local variable slots taken by a value of this type.
pub fn slot_size(descriptor: &str) -> u16 {
    match descriptor {
        "V" => 0,
        "J" | "D" => 2,
        _ => 1,
    }
}

pub fn is_reference(descriptor: &str) -> bool {
    descriptor.starts_with('L') || descriptor.starts_with('[')
}

/// Whether a value of type `from` may be passed where `to` is expected without
/// a cast: identical types, any reference to `java.lang.Object`, and the
/// sub-int primitives to `int`.
pub fn assignable(from: &str, to: &str) -> bool {
    if from == to {
        return true;
    }
    if to == "Ljava/lang/Object;" {
        return is_reference(from);
    }
    to == "I" && matches!(from, "Z" | "B" | "C" | "S")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_method_descriptors() {
        let d = MethodDescriptor::parse("(I[JLjava/lang/String;D)V").unwrap();
        assert_eq!(d.params, vec!["I", "[J", "Ljava/lang/String;", "D"]);
        assert!(d.is_void());
        assert_eq!(d.param_slots(), 1 + 1 + 1 + 2);

        let d = MethodDescriptor::parse("()[[Ljava/lang/Object;").unwrap();
        assert!(d.params.is_empty());
        assert_eq!(d.ret, "[[Ljava/lang/Object;");
    }

    #[test]
    fn rejects_malformed_descriptors() {
        for bad in ["", "I", "(I", "(X)V", "(L;)V", "()", "()VV", "(Ljava/lang/String)V", "(Ljava.lang.String;)V"] {
            assert!(MethodDescriptor::parse(bad).is_err(), "{bad}");
        }
    }

    #[test]
    fn converts_java_type_names() {
        assert_eq!(from_java_type("int").unwrap(), "I");
        assert_eq!(from_java_type("void").unwrap(), "V");
        assert_eq!(from_java_type("boolean[]").unwrap(), "[Z");
        assert_eq!(from_java_type("java.lang.String[][]").unwrap(), "[[Ljava/lang/String;");
        assert_eq!(
            from_java_type("org.eclipse.jdt.internal.compiler.ast.CompilationUnitDeclaration").unwrap(),
            "Lorg/eclipse/jdt/internal/compiler/ast/CompilationUnitDeclaration;"
        );
        assert!(from_java_type("void[]").is_err());
        assert!(from_java_type("").is_err());
        assert!(from_java_type("List<String>").is_err());
    }

    #[test]
    fn assignability() {
        assert!(assignable("I", "I"));
        assert!(assignable("Z", "I"));
        assert!(assignable("Lfoo/Bar;", "Ljava/lang/Object;"));
        assert!(assignable("[I", "Ljava/lang/Object;"));
        assert!(!assignable("I", "Ljava/lang/Object;"));
        assert!(!assignable("I", "J"));
        assert!(!assignable("Ljava/lang/Object;", "Lfoo/Bar;"));
    }
}
