//! Field and method descriptors
//!
//! See <https://docs.oracle.com/javase/specs/jvms/se17/html/jvms-4.html#jvms-4.3>. Descriptors
//! show up in method and field references, in `CONSTANT_Class_info` entries naming array types,
//! and in the local variable tables.

use super::{BinaryName, Name};
use crate::util::Width;
use std::fmt;
use std::iter::Peekable;
use std::str::Chars;

/// Descriptor that could not be parsed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorError(String);

impl fmt::Display for DescriptorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for DescriptorError {}

fn unexpected(found: Option<char>, expected: &str) -> DescriptorError {
    match found {
        Some(c) => DescriptorError(format!("expected {} but found '{}'", expected, c)),
        None => DescriptorError(format!("expected {} but the descriptor ended", expected)),
    }
}

/// Things that can be written out as a descriptor string
pub trait RenderDescriptor {
    fn render(&self) -> String {
        let mut rendered = String::new();
        self.render_to(&mut rendered);
        rendered
    }

    fn render_to(&self, out: &mut String);
}

/// Things that can be read back from a descriptor string
pub trait ParseDescriptor: Sized {
    /// Parse a whole descriptor (trailing characters are an error)
    fn parse(source: &str) -> Result<Self, DescriptorError> {
        let mut chars = source.chars().peekable();
        let parsed = Self::parse_from(&mut chars)?;
        match chars.next() {
            None => Ok(parsed),
            Some(c) => Err(DescriptorError(format!(
                "leftover '{}' after descriptor '{}'",
                c, source
            ))),
        }
    }

    /// Parse a prefix of the input
    fn parse_from(source: &mut Peekable<Chars>) -> Result<Self, DescriptorError>;
}

/// Primitive types
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum BaseType {
    Byte,
    Char,
    Double,
    Float,
    Int,
    Long,
    Short,
    Boolean,
}

impl BaseType {
    const ALL: [(char, BaseType); 8] = [
        ('B', BaseType::Byte),
        ('C', BaseType::Char),
        ('D', BaseType::Double),
        ('F', BaseType::Float),
        ('I', BaseType::Int),
        ('J', BaseType::Long),
        ('S', BaseType::Short),
        ('Z', BaseType::Boolean),
    ];

    fn from_char(c: char) -> Option<BaseType> {
        BaseType::ALL
            .iter()
            .find(|(tag, _)| *tag == c)
            .map(|(_, typ)| *typ)
    }

    fn to_char(self) -> char {
        match BaseType::ALL.iter().find(|(_, typ)| *typ == self) {
            Some((tag, _)) => *tag,
            None => unreachable!("every base type has a tag"),
        }
    }
}

/// `long` and `double` take two local slots (or two stack entries)
impl Width for BaseType {
    fn width(&self) -> usize {
        match self {
            BaseType::Double | BaseType::Long => 2,
            _ => 1,
        }
    }
}

impl RenderDescriptor for BaseType {
    fn render_to(&self, out: &mut String) {
        out.push(self.to_char());
    }
}

impl ParseDescriptor for BaseType {
    fn parse_from(source: &mut Peekable<Chars>) -> Result<Self, DescriptorError> {
        let next = source.next();
        next.and_then(BaseType::from_char)
            .ok_or_else(|| unexpected(next, "a primitive type"))
    }
}

/// Reference types: classes, and arrays of anything
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum RefType<Class> {
    Object(Class),
    ObjectArray(ArrayType<Class>),
    PrimitiveArray(ArrayType<BaseType>),
}

/// Array type, counted from its innermost element
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct ArrayType<T> {
    /// Dimensions beyond the first (`A[]` has 0, `A[][][]` has 2)
    pub additional_dimensions: usize,

    /// Innermost element type (`A` for `A[][]`)
    pub element_type: T,
}

impl<T: RenderDescriptor> RenderDescriptor for ArrayType<T> {
    fn render_to(&self, out: &mut String) {
        out.extend(std::iter::repeat('[').take(self.additional_dimensions + 1));
        self.element_type.render_to(out);
    }
}

impl RenderDescriptor for BinaryName {
    fn render_to(&self, out: &mut String) {
        out.push('L');
        out.push_str(self.as_str());
        out.push(';');
    }
}

impl ParseDescriptor for BinaryName {
    fn parse_from(source: &mut Peekable<Chars>) -> Result<Self, DescriptorError> {
        match source.next() {
            Some('L') => (),
            other => return Err(unexpected(other, "'L'")),
        }
        let mut name = String::new();
        loop {
            match source.next() {
                Some(';') => return BinaryName::from_string(name).map_err(DescriptorError),
                Some(c) => name.push(c),
                None => return Err(unexpected(None, "';' to close the class name")),
            }
        }
    }
}

impl<C: RenderDescriptor> RenderDescriptor for RefType<C> {
    fn render_to(&self, out: &mut String) {
        match self {
            RefType::Object(class) => class.render_to(out),
            RefType::ObjectArray(array) => array.render_to(out),
            RefType::PrimitiveArray(array) => array.render_to(out),
        }
    }
}

impl<C: ParseDescriptor> ParseDescriptor for RefType<C> {
    fn parse_from(source: &mut Peekable<Chars>) -> Result<Self, DescriptorError> {
        let mut dimensions = 0;
        while source.next_if_eq(&'[').is_some() {
            dimensions += 1;
        }
        let ref_type = match (dimensions, source.peek().copied()) {
            (0, Some('L')) => RefType::Object(C::parse_from(source)?),
            (0, other) => return Err(unexpected(other, "a class or array type")),
            (_, Some('L')) => RefType::ObjectArray(ArrayType {
                additional_dimensions: dimensions - 1,
                element_type: C::parse_from(source)?,
            }),
            (_, _) => RefType::PrimitiveArray(ArrayType {
                additional_dimensions: dimensions - 1,
                element_type: BaseType::parse_from(source)?,
            }),
        };
        Ok(ref_type)
    }
}

impl<C> RefType<C> {
    /// Array whose elements have the given type
    pub fn array(element: FieldType<C>) -> RefType<C> {
        match element {
            FieldType::Base(element_type) => RefType::PrimitiveArray(ArrayType {
                additional_dimensions: 0,
                element_type,
            }),
            FieldType::Ref(RefType::Object(element_type)) => RefType::ObjectArray(ArrayType {
                additional_dimensions: 0,
                element_type,
            }),
            FieldType::Ref(RefType::ObjectArray(inner)) => RefType::ObjectArray(ArrayType {
                additional_dimensions: inner.additional_dimensions + 1,
                element_type: inner.element_type,
            }),
            FieldType::Ref(RefType::PrimitiveArray(inner)) => RefType::PrimitiveArray(ArrayType {
                additional_dimensions: inner.additional_dimensions + 1,
                element_type: inner.element_type,
            }),
        }
    }
}

/// Type of a field, parameter, return value, or local variable
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum FieldType<Class> {
    Base(BaseType),
    Ref(RefType<Class>),
}

impl<C> Width for FieldType<C> {
    fn width(&self) -> usize {
        match self {
            FieldType::Base(base_type) => base_type.width(),
            FieldType::Ref(_) => 1,
        }
    }
}

impl<C: RenderDescriptor> RenderDescriptor for FieldType<C> {
    fn render_to(&self, out: &mut String) {
        match self {
            FieldType::Base(base_type) => base_type.render_to(out),
            FieldType::Ref(ref_type) => ref_type.render_to(out),
        }
    }
}

impl<C: ParseDescriptor> ParseDescriptor for FieldType<C> {
    fn parse_from(source: &mut Peekable<Chars>) -> Result<Self, DescriptorError> {
        match source.peek().copied() {
            Some('L' | '[') => RefType::parse_from(source).map(FieldType::Ref),
            _ => BaseType::parse_from(source).map(FieldType::Base),
        }
    }
}

/// Parameter and return types of a method
#[derive(PartialEq, Eq, Hash, Debug, Clone)]
pub struct MethodDescriptor<Class> {
    pub parameters: Vec<FieldType<Class>>,

    /// `None` for `void`
    pub return_type: Option<FieldType<Class>>,
}

impl<C> MethodDescriptor<C> {
    /// Number of local slots taken by the parameters (and `this`, when there is one)
    pub fn parameter_length(&self, has_this_param: bool) -> usize {
        let this_slot = usize::from(has_this_param);
        this_slot + self.parameters.iter().map(Width::width).sum::<usize>()
    }
}

impl<C: RenderDescriptor> RenderDescriptor for MethodDescriptor<C> {
    fn render_to(&self, out: &mut String) {
        out.push('(');
        for parameter in &self.parameters {
            parameter.render_to(out);
        }
        out.push(')');
        match &self.return_type {
            Some(return_type) => return_type.render_to(out),
            None => out.push('V'),
        }
    }
}

impl<C: ParseDescriptor> ParseDescriptor for MethodDescriptor<C> {
    fn parse_from(source: &mut Peekable<Chars>) -> Result<Self, DescriptorError> {
        match source.next() {
            Some('(') => (),
            other => return Err(unexpected(other, "'(' to open the parameters")),
        }

        let mut parameters = vec![];
        while source.next_if_eq(&')').is_none() {
            if source.peek().is_none() {
                return Err(unexpected(None, "')' to close the parameters"));
            }
            parameters.push(FieldType::parse_from(source)?);
        }

        let return_type = match source.next_if_eq(&'V') {
            Some(_) => None,
            None => Some(FieldType::parse_from(source)?),
        };
        Ok(MethodDescriptor {
            parameters,
            return_type,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    type FT = FieldType<BinaryName>;

    #[test]
    fn helper_descriptor() {
        let descriptor = MethodDescriptor::<BinaryName>::parse("(Z)Z").unwrap();
        assert_eq!(descriptor.parameters, vec![FT::Base(BaseType::Boolean)]);
        assert_eq!(descriptor.return_type, Some(FT::Base(BaseType::Boolean)));
        assert_eq!(descriptor.parameter_length(false), 1);
        assert_eq!(descriptor.render(), "(Z)Z");
    }

    #[test]
    fn wide_parameters_take_two_slots() {
        let descriptor =
            MethodDescriptor::<BinaryName>::parse("(J[DLjava/lang/String;D)V").unwrap();
        assert_eq!(descriptor.parameters.len(), 4);
        assert_eq!(descriptor.parameter_length(true), 7);
        assert_eq!(descriptor.return_type, None);
    }

    #[test]
    fn array_types() {
        let parsed = RefType::<BinaryName>::parse("[[Ljava/lang/Object;").unwrap();
        assert_eq!(
            parsed,
            RefType::ObjectArray(ArrayType {
                additional_dimensions: 1,
                element_type: BinaryName::OBJECT,
            })
        );
        assert_eq!(
            RefType::<BinaryName>::array(FT::Ref(RefType::array(FT::Base(BaseType::Int)))).render(),
            "[[I"
        );
    }

    #[test]
    fn malformed_descriptors() {
        for bad in ["", "[", "II", "Ljava/lang/Object", "(I", "(I)", "(Q)V", "()VV"] {
            assert!(FT::parse(bad).is_err() || bad.starts_with('('), "{}", bad);
            assert!(MethodDescriptor::<BinaryName>::parse(bad).is_err(), "{}", bad);
        }
        let err = FT::parse("Q").unwrap_err();
        assert_eq!(err.to_string(), "expected a primitive type but found 'Q'");
    }
}
