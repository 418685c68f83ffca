/* Field and method descriptors in their binary form, e.g. I, [Ljava/lang/String; or (IZ)V */

use crate::class::error::ClassError;
use nom::branch::alt;
use nom::bytes::complete::take_while1;
use nom::character::complete::char;
use nom::combinator::{all_consuming, map, value};
use nom::multi::many0;
use nom::sequence::{delimited, preceded};
use nom::IResult;
use std::fmt;

/// Represents a JVM field type: a primitive, a class instance or an array.
///
/// # Examples
///
/// ```
///  use classpatch::class::FieldType;
///
///  let t = FieldType::from_descriptor("[Ljava/lang/String;").unwrap();
///  assert_eq!(t.java_name(), "java.lang.String[]");
///  assert_eq!(t.descriptor(), "[Ljava/lang/String;");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FieldType {
    Byte,
    Char,
    Double,
    Float,
    Int,
    Long,
    Short,
    Boolean,
    /// A class or interface, by internal name (`java/lang/String`)
    Object(String),
    Array(Box<FieldType>),
}

impl FieldType {
    pub fn from_descriptor(s: &str) -> Result<FieldType, ClassError> {
        match all_consuming(parse_field_type)(s) {
            Ok((_, t)) => Ok(t),
            Err(_) => Err(ClassError::invalid(&format!("invalid field descriptor {s}"))),
        }
    }

    /// Builds the type named by a `CONSTANT_Class` entry, which holds either an internal
    /// name or, for arrays, a full descriptor.
    pub fn from_class_name(name: &str) -> Result<FieldType, ClassError> {
        if name.starts_with('[') {
            FieldType::from_descriptor(name)
        } else {
            Ok(FieldType::Object(name.to_string()))
        }
    }

    pub fn object(internal_name: &str) -> FieldType {
        FieldType::Object(internal_name.to_string())
    }

    pub fn descriptor(&self) -> String {
        match self {
            FieldType::Byte => "B".to_string(),
            FieldType::Char => "C".to_string(),
            FieldType::Double => "D".to_string(),
            FieldType::Float => "F".to_string(),
            FieldType::Int => "I".to_string(),
            FieldType::Long => "J".to_string(),
            FieldType::Short => "S".to_string(),
            FieldType::Boolean => "Z".to_string(),
            FieldType::Object(name) => format!("L{name};"),
            FieldType::Array(component) => format!("[{}", component.descriptor()),
        }
    }

    /// The name to store in a `CONSTANT_Class` entry for this type, if it is a reference type.
    pub fn class_name(&self) -> Option<String> {
        match self {
            FieldType::Object(name) => Some(name.clone()),
            FieldType::Array(_) => Some(self.descriptor()),
            _ => None,
        }
    }

    pub fn java_name(&self) -> String {
        match self {
            FieldType::Byte => "byte".to_string(),
            FieldType::Char => "char".to_string(),
            FieldType::Double => "double".to_string(),
            FieldType::Float => "float".to_string(),
            FieldType::Int => "int".to_string(),
            FieldType::Long => "long".to_string(),
            FieldType::Short => "short".to_string(),
            FieldType::Boolean => "boolean".to_string(),
            FieldType::Object(name) => name.replace('/', "."),
            FieldType::Array(component) => format!("{}[]", component.java_name()),
        }
    }

    /// Number of local variable / operand stack slots a value of this type occupies.
    pub fn slots(&self) -> u16 {
        match self {
            FieldType::Long | FieldType::Double => 2,
            _ => 1,
        }
    }

    pub fn is_reference(&self) -> bool {
        matches!(self, FieldType::Object(_) | FieldType::Array(_))
    }

    /// True for the types the JVM computes with as `int`.
    pub fn is_int_like(&self) -> bool {
        matches!(
            self,
            FieldType::Boolean | FieldType::Byte | FieldType::Char | FieldType::Short | FieldType::Int
        )
    }

    pub fn is_string(&self) -> bool {
        matches!(self, FieldType::Object(name) if name == "java/lang/String")
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.java_name())
    }
}

/// A method descriptor: parameter types and an optional (non-void) return type.
///
/// # Examples
///
/// ```
///  use classpatch::class::{FieldType, MethodDescriptor};
///
///  let m = MethodDescriptor::from_descriptor("(IJ)Ljava/lang/String;").unwrap();
///  assert_eq!(m.params, vec![FieldType::Int, FieldType::Long]);
///  assert_eq!(m.param_slots(), 3);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodDescriptor {
    pub params: Vec<FieldType>,
    pub ret: Option<FieldType>,
}

impl MethodDescriptor {
    pub fn from_descriptor(s: &str) -> Result<MethodDescriptor, ClassError> {
        match all_consuming(parse_method_descriptor)(s) {
            Ok((_, m)) => Ok(m),
            Err(_) => Err(ClassError::invalid(&format!("invalid method descriptor {s}"))),
        }
    }

    pub fn descriptor(&self) -> String {
        let mut s = String::from("(");
        for p in &self.params {
            s.push_str(&p.descriptor());
        }
        s.push(')');
        match &self.ret {
            Some(t) => s.push_str(&t.descriptor()),
            None => s.push('V'),
        }
        s
    }

    pub fn param_slots(&self) -> u16 {
        self.params.iter().map(|p| p.slots()).sum()
    }
}

impl fmt::Display for MethodDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.descriptor())
    }
}

pub(crate) fn parse_field_type(input: &str) -> IResult<&str, FieldType> {
    alt((
        value(FieldType::Byte, char('B')),
        value(FieldType::Char, char('C')),
        value(FieldType::Double, char('D')),
        value(FieldType::Float, char('F')),
        value(FieldType::Int, char('I')),
        value(FieldType::Long, char('J')),
        value(FieldType::Short, char('S')),
        value(FieldType::Boolean, char('Z')),
        map(
            delimited(char('L'), take_while1(|c| c != ';' && c != '.' && c != '['), char(';')),
            |name: &str| FieldType::Object(name.to_string()),
        ),
        map(preceded(char('['), parse_field_type), |t| FieldType::Array(Box::new(t))),
    ))(input)
}

pub(crate) fn parse_method_descriptor(input: &str) -> IResult<&str, MethodDescriptor> {
    let (input, params) = delimited(char('('), many0(parse_field_type), char(')'))(input)?;
    let (input, ret) = alt((value(None, char('V')), map(parse_field_type, Some)))(input)?;
    Ok((input, MethodDescriptor { params, ret }))
}
