use std::borrow::Cow;
use std::fmt;

/// Validated names as they appear in the constant pool
pub trait Name: Sized {
    /// Underlying string, in internal form
    fn as_str(&self) -> &str;

    /// Validate a string and wrap it
    fn from_string(name: String) -> Result<Self, String>;
}

/// Method or field name (no `.`, `;`, `[`, or `/`)
///
/// See <https://docs.oracle.com/javase/specs/jvms/se17/html/jvms-4.html#jvms-4.2.2>
#[derive(Clone, Hash, Eq, PartialEq)]
pub struct UnqualifiedName(Cow<'static, str>);

/// Class or interface name in internal form, eg. `java/lang/Object`
///
/// See <https://docs.oracle.com/javase/specs/jvms/se17/html/jvms-4.html#jvms-4.2.1>
#[derive(Clone, Hash, Eq, PartialEq)]
pub struct BinaryName(Cow<'static, str>);

fn check_segment(kind: &str, name: &str) -> Result<(), String> {
    if name.is_empty() {
        Err(format!("{} '{}' has an empty segment", kind, name))
    } else if let Some(bad) = name.chars().find(|c| matches!(c, '.' | ';' | '[' | '/')) {
        Err(format!("{} '{}' contains '{}'", kind, name, bad))
    } else {
        Ok(())
    }
}

impl Name for UnqualifiedName {
    fn as_str(&self) -> &str {
        &self.0
    }

    fn from_string(name: String) -> Result<Self, String> {
        check_segment("method or field name", &name)?;
        Ok(UnqualifiedName(Cow::Owned(name)))
    }
}

impl Name for BinaryName {
    fn as_str(&self) -> &str {
        &self.0
    }

    fn from_string(name: String) -> Result<Self, String> {
        for segment in name.split('/') {
            check_segment("class name", segment)
                .map_err(|err| format!("in class name '{}': {}", name, err))?;
        }
        Ok(BinaryName(Cow::Owned(name)))
    }
}

impl fmt::Debug for UnqualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for BinaryName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl UnqualifiedName {
    /// Instance initializer
    pub const INIT: Self = UnqualifiedName(Cow::Borrowed("<init>"));
}

impl BinaryName {
    const fn jdk(value: &'static str) -> BinaryName {
        BinaryName(Cow::Borrowed(value))
    }

    pub const CLASS: Self = Self::jdk("java/lang/Class");
    pub const METHODHANDLE: Self = Self::jdk("java/lang/invoke/MethodHandle");
    pub const METHODTYPE: Self = Self::jdk("java/lang/invoke/MethodType");
    pub const OBJECT: Self = Self::jdk("java/lang/Object");
    pub const STRING: Self = Self::jdk("java/lang/String");
    pub const THROWABLE: Self = Self::jdk("java/lang/Throwable");
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn binary_names_are_checked_per_segment() {
        assert!(BinaryName::from_string(String::from("a/b/Foo$Inner")).is_ok());
        assert!(BinaryName::from_string(String::from("a//Foo")).is_err());
        assert!(BinaryName::from_string(String::from("a.b.Foo")).is_err());
        assert!(BinaryName::from_string(String::new()).is_err());
    }

    #[test]
    fn method_names() {
        let helper = UnqualifiedName::from_string(String::from("__CONDITION__METHOD")).unwrap();
        assert_eq!(helper.as_str(), "__CONDITION__METHOD");
        assert_eq!(UnqualifiedName::INIT.as_str(), "<init>");

        let err = UnqualifiedName::from_string(String::from("a/b")).unwrap_err();
        assert!(err.contains("'/'"), "{}", err);
    }
}
