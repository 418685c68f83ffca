/* Constant pool structures */

use crate::class::error::{ClassError, ClassErrorKind};
use crate::class::{read_u1, read_u2, read_u4, read_x, write_u1, write_u2, write_u4, write_x};
use cesu8::{from_java_cesu8, to_java_cesu8};

pub const CONSTANT_UTF8: u8 = 1;
pub const CONSTANT_INTEGER: u8 = 3;
pub const CONSTANT_FLOAT: u8 = 4;
pub const CONSTANT_LONG: u8 = 5;
pub const CONSTANT_DOUBLE: u8 = 6;
pub const CONSTANT_CLASS: u8 = 7;
pub const CONSTANT_STRING: u8 = 8;
pub const CONSTANT_FIELDREF: u8 = 9;
pub const CONSTANT_METHODREF: u8 = 10;
pub const CONSTANT_INTERFACE_METHODREF: u8 = 11;
pub const CONSTANT_NAME_AND_TYPE: u8 = 12;
pub const CONSTANT_METHOD_HANDLE: u8 = 15;
pub const CONSTANT_METHOD_TYPE: u8 = 16;
pub const CONSTANT_DYNAMIC: u8 = 17;
pub const CONSTANT_INVOKE_DYNAMIC: u8 = 18;
pub const CONSTANT_MODULE: u8 = 19;
pub const CONSTANT_PACKAGE: u8 = 20;

/// A single constant pool entry.
///
/// Floating point constants keep their raw bits so that every NaN payload round-trips.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Constant {
    /// Index 0 and the slot following a long or double.
    Unusable,
    Utf8(String),
    /// A Utf8 constant whose modified UTF-8 has no `str` form, such as one holding an unpaired
    /// surrogate. The bytes are kept exactly as read.
    Utf8Bytes(Vec<u8>),
    Integer(i32),
    Float(u32),
    Long(i64),
    Double(u64),
    Class { name_index: u16 },
    String { string_index: u16 },
    FieldRef { class_index: u16, name_and_type_index: u16 },
    MethodRef { class_index: u16, name_and_type_index: u16 },
    InterfaceMethodRef { class_index: u16, name_and_type_index: u16 },
    NameAndType { name_index: u16, descriptor_index: u16 },
    MethodHandle { reference_kind: u8, reference_index: u16 },
    MethodType { descriptor_index: u16 },
    Dynamic { bootstrap_method_attr_index: u16, name_and_type_index: u16 },
    InvokeDynamic { bootstrap_method_attr_index: u16, name_and_type_index: u16 },
    Module { name_index: u16 },
    Package { name_index: u16 },
}

impl Constant {
    pub fn tag(&self) -> u8 {
        match self {
            Constant::Unusable => 0,
            Constant::Utf8(_) | Constant::Utf8Bytes(_) => CONSTANT_UTF8,
            Constant::Integer(_) => CONSTANT_INTEGER,
            Constant::Float(_) => CONSTANT_FLOAT,
            Constant::Long(_) => CONSTANT_LONG,
            Constant::Double(_) => CONSTANT_DOUBLE,
            Constant::Class { .. } => CONSTANT_CLASS,
            Constant::String { .. } => CONSTANT_STRING,
            Constant::FieldRef { .. } => CONSTANT_FIELDREF,
            Constant::MethodRef { .. } => CONSTANT_METHODREF,
            Constant::InterfaceMethodRef { .. } => CONSTANT_INTERFACE_METHODREF,
            Constant::NameAndType { .. } => CONSTANT_NAME_AND_TYPE,
            Constant::MethodHandle { .. } => CONSTANT_METHOD_HANDLE,
            Constant::MethodType { .. } => CONSTANT_METHOD_TYPE,
            Constant::Dynamic { .. } => CONSTANT_DYNAMIC,
            Constant::InvokeDynamic { .. } => CONSTANT_INVOKE_DYNAMIC,
            Constant::Module { .. } => CONSTANT_MODULE,
            Constant::Package { .. } => CONSTANT_PACKAGE,
        }
    }

    fn is_wide(&self) -> bool {
        matches!(self, Constant::Long(_) | Constant::Double(_))
    }

    pub fn read(bytes: &[u8], ix: &mut usize) -> Result<Constant, ClassError> {
        let tag = read_u1(bytes, ix)?;
        Ok(match tag {
            CONSTANT_UTF8 => {
                let length = read_u2(bytes, ix)? as usize;
                let raw = read_x(bytes, ix, length)?;
                let text = match from_java_cesu8(&raw) {
                    Ok(s) if *to_java_cesu8(&s) == *raw => Some(s.into_owned()),
                    _ => None,
                };
                match text {
                    Some(s) => Constant::Utf8(s),
                    None => Constant::Utf8Bytes(raw),
                }
            }
            CONSTANT_INTEGER => Constant::Integer(read_u4(bytes, ix)? as i32),
            CONSTANT_FLOAT => Constant::Float(read_u4(bytes, ix)?),
            CONSTANT_LONG => {
                let high = read_u4(bytes, ix)? as u64;
                let low = read_u4(bytes, ix)? as u64;
                Constant::Long(((high << 32) | low) as i64)
            }
            CONSTANT_DOUBLE => {
                let high = read_u4(bytes, ix)? as u64;
                let low = read_u4(bytes, ix)? as u64;
                Constant::Double((high << 32) | low)
            }
            CONSTANT_CLASS => Constant::Class { name_index: read_u2(bytes, ix)? },
            CONSTANT_STRING => Constant::String { string_index: read_u2(bytes, ix)? },
            CONSTANT_FIELDREF => Constant::FieldRef {
                class_index: read_u2(bytes, ix)?,
                name_and_type_index: read_u2(bytes, ix)?,
            },
            CONSTANT_METHODREF => Constant::MethodRef {
                class_index: read_u2(bytes, ix)?,
                name_and_type_index: read_u2(bytes, ix)?,
            },
            CONSTANT_INTERFACE_METHODREF => Constant::InterfaceMethodRef {
                class_index: read_u2(bytes, ix)?,
                name_and_type_index: read_u2(bytes, ix)?,
            },
            CONSTANT_NAME_AND_TYPE => Constant::NameAndType {
                name_index: read_u2(bytes, ix)?,
                descriptor_index: read_u2(bytes, ix)?,
            },
            CONSTANT_METHOD_HANDLE => Constant::MethodHandle {
                reference_kind: read_u1(bytes, ix)?,
                reference_index: read_u2(bytes, ix)?,
            },
            CONSTANT_METHOD_TYPE => Constant::MethodType { descriptor_index: read_u2(bytes, ix)? },
            CONSTANT_DYNAMIC => Constant::Dynamic {
                bootstrap_method_attr_index: read_u2(bytes, ix)?,
                name_and_type_index: read_u2(bytes, ix)?,
            },
            CONSTANT_INVOKE_DYNAMIC => Constant::InvokeDynamic {
                bootstrap_method_attr_index: read_u2(bytes, ix)?,
                name_and_type_index: read_u2(bytes, ix)?,
            },
            CONSTANT_MODULE => Constant::Module { name_index: read_u2(bytes, ix)? },
            CONSTANT_PACKAGE => Constant::Package { name_index: read_u2(bytes, ix)? },
            _ => return Err(ClassError::new(ClassErrorKind::BadConstantTag(tag))),
        })
    }

    pub fn write(&self, bytes: &mut Vec<u8>) -> usize {
        let mut c = 0;
        match self {
            Constant::Unusable => return 0,
            Constant::Utf8(s) => {
                let encoded = to_java_cesu8(s);
                c += write_u1(bytes, CONSTANT_UTF8);
                c += write_u2(bytes, encoded.len() as u16);
                c += write_x(bytes, &encoded);
            }
            Constant::Utf8Bytes(raw) => {
                c += write_u1(bytes, CONSTANT_UTF8);
                c += write_u2(bytes, raw.len() as u16);
                c += write_x(bytes, raw);
            }
            Constant::Integer(i) => {
                c += write_u1(bytes, CONSTANT_INTEGER);
                c += write_u4(bytes, *i as u32);
            }
            Constant::Float(bits) => {
                c += write_u1(bytes, CONSTANT_FLOAT);
                c += write_u4(bytes, *bits);
            }
            Constant::Long(l) => {
                c += write_u1(bytes, CONSTANT_LONG);
                c += write_u4(bytes, ((*l as u64) >> 32) as u32);
                c += write_u4(bytes, *l as u64 as u32);
            }
            Constant::Double(bits) => {
                c += write_u1(bytes, CONSTANT_DOUBLE);
                c += write_u4(bytes, (*bits >> 32) as u32);
                c += write_u4(bytes, *bits as u32);
            }
            Constant::Class { name_index } => {
                c += write_u1(bytes, CONSTANT_CLASS);
                c += write_u2(bytes, *name_index);
            }
            Constant::String { string_index } => {
                c += write_u1(bytes, CONSTANT_STRING);
                c += write_u2(bytes, *string_index);
            }
            Constant::FieldRef { class_index, name_and_type_index }
            | Constant::MethodRef { class_index, name_and_type_index }
            | Constant::InterfaceMethodRef { class_index, name_and_type_index } => {
                c += write_u1(bytes, self.tag());
                c += write_u2(bytes, *class_index);
                c += write_u2(bytes, *name_and_type_index);
            }
            Constant::NameAndType { name_index, descriptor_index } => {
                c += write_u1(bytes, CONSTANT_NAME_AND_TYPE);
                c += write_u2(bytes, *name_index);
                c += write_u2(bytes, *descriptor_index);
            }
            Constant::MethodHandle { reference_kind, reference_index } => {
                c += write_u1(bytes, CONSTANT_METHOD_HANDLE);
                c += write_u1(bytes, *reference_kind);
                c += write_u2(bytes, *reference_index);
            }
            Constant::MethodType { descriptor_index } => {
                c += write_u1(bytes, CONSTANT_METHOD_TYPE);
                c += write_u2(bytes, *descriptor_index);
            }
            Constant::Dynamic { bootstrap_method_attr_index, name_and_type_index }
            | Constant::InvokeDynamic { bootstrap_method_attr_index, name_and_type_index } => {
                c += write_u1(bytes, self.tag());
                c += write_u2(bytes, *bootstrap_method_attr_index);
                c += write_u2(bytes, *name_and_type_index);
            }
            Constant::Module { name_index } | Constant::Package { name_index } => {
                c += write_u1(bytes, self.tag());
                c += write_u2(bytes, *name_index);
            }
        }
        c
    }
}

/// A resolved member reference: owning class, member name and descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberRef<'a> {
    pub class: &'a str,
    pub name: &'a str,
    pub descriptor: &'a str,
    pub interface: bool,
}

/// The class file constant pool.
///
/// Entry 0 is always [`Constant::Unusable`], as is the slot after every long and double, so
/// `entries[i]` is constant pool index `i`. New constants are only ever appended: interning
/// either returns an equal existing entry or pushes a new one at the end, so indices held by
/// existing structures stay valid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstantPool {
    entries: Vec<Constant>,
}

impl Default for ConstantPool {
    fn default() -> Self {
        ConstantPool::new()
    }
}

impl ConstantPool {
    pub fn new() -> Self {
        ConstantPool {
            entries: vec![Constant::Unusable],
        }
    }

    pub fn read(bytes: &[u8], ix: &mut usize) -> Result<ConstantPool, ClassError> {
        let count = read_u2(bytes, ix)?;
        if count == 0 {
            fail!("constant pool count must be at least 1");
        }
        let mut entries = Vec::with_capacity(count as usize);
        entries.push(Constant::Unusable);
        while entries.len() < count as usize {
            let index = entries.len();
            let constant = Constant::read(bytes, ix).map_err(|e| err!(e, "constant #{}", index))?;
            let wide = constant.is_wide();
            entries.push(constant);
            if wide {
                if entries.len() >= count as usize {
                    fail!("wide constant #{} overruns the constant pool", index);
                }
                entries.push(Constant::Unusable);
            }
        }
        let pool = ConstantPool { entries };
        pool.check_references()?;
        Ok(pool)
    }

    pub fn write(&self, bytes: &mut Vec<u8>) -> usize {
        let mut c = write_u2(bytes, self.entries.len() as u16);
        for constant in &self.entries {
            c += constant.write(bytes);
        }
        c
    }

    /// The `constant_pool_count` value: one more than the highest valid index.
    pub fn count(&self) -> u16 {
        self.entries.len() as u16
    }

    pub fn entries(&self) -> &[Constant] {
        &self.entries
    }

    pub fn get(&self, index: u16) -> Result<&Constant, ClassError> {
        match self.entries.get(index as usize) {
            None | Some(Constant::Unusable) => Err(ClassError::bad_index(index)),
            Some(c) => Ok(c),
        }
    }

    pub fn utf8(&self, index: u16) -> Result<&str, ClassError> {
        match self.get(index)? {
            Constant::Utf8(s) => Ok(s.as_str()),
            Constant::Utf8Bytes(_) => Err(ClassError::invalid(&format!(
                "constant #{} is modified UTF-8 with no string form",
                index
            ))),
            other => Err(ClassError::invalid(&format!(
                "constant #{} is tag {}, expected Utf8",
                index,
                other.tag()
            ))),
        }
    }

    pub fn class_name(&self, index: u16) -> Result<&str, ClassError> {
        match self.get(index)? {
            Constant::Class { name_index } => self.utf8(*name_index),
            other => Err(ClassError::invalid(&format!(
                "constant #{} is tag {}, expected Class",
                index,
                other.tag()
            ))),
        }
    }

    pub fn name_and_type(&self, index: u16) -> Result<(&str, &str), ClassError> {
        match self.get(index)? {
            Constant::NameAndType { name_index, descriptor_index } => {
                Ok((self.utf8(*name_index)?, self.utf8(*descriptor_index)?))
            }
            other => Err(ClassError::invalid(&format!(
                "constant #{} is tag {}, expected NameAndType",
                index,
                other.tag()
            ))),
        }
    }

    /// Resolves a field, method or interface method reference.
    pub fn member_ref(&self, index: u16) -> Result<MemberRef<'_>, ClassError> {
        let (class_index, nat_index, interface) = match self.get(index)? {
            Constant::FieldRef { class_index, name_and_type_index }
            | Constant::MethodRef { class_index, name_and_type_index } => (*class_index, *name_and_type_index, false),
            Constant::InterfaceMethodRef { class_index, name_and_type_index } => {
                (*class_index, *name_and_type_index, true)
            }
            other => {
                return Err(ClassError::invalid(&format!(
                    "constant #{} is tag {}, expected a member reference",
                    index,
                    other.tag()
                )))
            }
        };
        let (name, descriptor) = self.name_and_type(nat_index)?;
        Ok(MemberRef {
            class: self.class_name(class_index)?,
            name,
            descriptor,
            interface,
        })
    }

    /// Checks that `index` is a Utf8 constant of either form.
    fn check_utf8(&self, index: u16) -> Result<(), ClassError> {
        match self.get(index)? {
            Constant::Utf8(_) | Constant::Utf8Bytes(_) => Ok(()),
            other => Err(ClassError::invalid(&format!(
                "constant #{} is tag {}, expected Utf8",
                index,
                other.tag()
            ))),
        }
    }

    /// Checks that every index stored inside the pool points at an entry of the right kind.
    fn check_references(&self) -> Result<(), ClassError> {
        for (index, constant) in self.entries.iter().enumerate() {
            let checked = match constant {
                Constant::Class { name_index }
                | Constant::Module { name_index }
                | Constant::Package { name_index } => self.check_utf8(*name_index),
                Constant::String { string_index } => self.check_utf8(*string_index),
                Constant::MethodType { descriptor_index } => self.check_utf8(*descriptor_index),
                Constant::NameAndType { name_index, descriptor_index } => {
                    self.check_utf8(*name_index).and_then(|_| self.check_utf8(*descriptor_index))
                }
                Constant::FieldRef { class_index, name_and_type_index }
                | Constant::MethodRef { class_index, name_and_type_index }
                | Constant::InterfaceMethodRef { class_index, name_and_type_index } => {
                    self.check_tag(*class_index, CONSTANT_CLASS)
                        .and_then(|_| self.check_tag(*name_and_type_index, CONSTANT_NAME_AND_TYPE))
                }
                Constant::Dynamic { name_and_type_index, .. }
                | Constant::InvokeDynamic { name_and_type_index, .. } => {
                    self.check_tag(*name_and_type_index, CONSTANT_NAME_AND_TYPE)
                }
                Constant::MethodHandle { reference_index, .. } => self.get(*reference_index).map(|_| ()),
                _ => Ok(()),
            };
            checked.map_err(|e| err!(e, "constant #{}", index))?;
        }
        Ok(())
    }

    fn check_tag(&self, index: u16, tag: u8) -> Result<(), ClassError> {
        let found = self.get(index)?.tag();
        if found != tag {
            fail!("constant #{} is tag {}, expected tag {}", index, found, tag);
        }
        Ok(())
    }

    fn push(&mut self, constant: Constant) -> Result<u16, ClassError> {
        let index = self.entries.len();
        let needed = if constant.is_wide() { 2 } else { 1 };
        if index + needed > u16::MAX as usize {
            fail!("constant pool overflow");
        }
        let wide = constant.is_wide();
        self.entries.push(constant);
        if wide {
            self.entries.push(Constant::Unusable);
        }
        Ok(index as u16)
    }

    fn find(&self, wanted: &Constant) -> Option<u16> {
        self.entries.iter().position(|c| c == wanted).map(|i| i as u16)
    }

    fn intern(&mut self, constant: Constant) -> Result<u16, ClassError> {
        match self.find(&constant) {
            Some(index) => Ok(index),
            None => self.push(constant),
        }
    }

    pub fn utf8_index(&mut self, value: &str) -> Result<u16, ClassError> {
        let length = to_java_cesu8(value).len();
        if length > u16::MAX as usize {
            fail!("Utf8 constant of {} bytes exceeds the 65535 byte limit", length);
        }
        self.intern(Constant::Utf8(value.to_string()))
    }

    pub fn class_index(&mut self, name: &str) -> Result<u16, ClassError> {
        let name_index = self.utf8_index(name)?;
        self.intern(Constant::Class { name_index })
    }

    pub fn string_index(&mut self, value: &str) -> Result<u16, ClassError> {
        let string_index = self.utf8_index(value)?;
        self.intern(Constant::String { string_index })
    }

    pub fn integer_index(&mut self, value: i32) -> Result<u16, ClassError> {
        self.intern(Constant::Integer(value))
    }

    pub fn long_index(&mut self, value: i64) -> Result<u16, ClassError> {
        self.intern(Constant::Long(value))
    }

    pub fn name_and_type_index(&mut self, name: &str, descriptor: &str) -> Result<u16, ClassError> {
        let name_index = self.utf8_index(name)?;
        let descriptor_index = self.utf8_index(descriptor)?;
        self.intern(Constant::NameAndType { name_index, descriptor_index })
    }

    pub fn field_ref_index(&mut self, owner: &str, name: &str, descriptor: &str) -> Result<u16, ClassError> {
        let class_index = self.class_index(owner)?;
        let name_and_type_index = self.name_and_type_index(name, descriptor)?;
        self.intern(Constant::FieldRef { class_index, name_and_type_index })
    }

    pub fn method_ref_index(
        &mut self,
        owner: &str,
        name: &str,
        descriptor: &str,
        interface: bool,
    ) -> Result<u16, ClassError> {
        let class_index = self.class_index(owner)?;
        let name_and_type_index = self.name_and_type_index(name, descriptor)?;
        if interface {
            self.intern(Constant::InterfaceMethodRef { class_index, name_and_type_index })
        } else {
            self.intern(Constant::MethodRef { class_index, name_and_type_index })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class::ClassErrorKind;

    #[test]
    fn interning_reuses_and_appends() {
        let mut pool = ConstantPool::new();
        let a = pool.class_index("java/lang/Object").unwrap();
        let before = pool.count();
        assert_eq!(pool.class_index("java/lang/Object").unwrap(), a);
        assert_eq!(pool.count(), before);

        let l = pool.long_index(7).unwrap();
        assert_eq!(pool.count(), l + 2);
        let next = pool.utf8_index("after").unwrap();
        assert_eq!(next, l + 2);
    }

    #[test]
    fn pool_roundtrip() {
        let mut pool = ConstantPool::new();
        pool.method_ref_index("java/lang/String", "toUpperCase", "()Ljava/lang/String;", false).unwrap();
        pool.string_index("h\u{e9}llo \u{0}").unwrap();
        pool.long_index(-1).unwrap();
        pool.integer_index(42).unwrap();

        let mut bytes = vec![];
        pool.write(&mut bytes);
        let mut ix = 0;
        let decoded = ConstantPool::read(&bytes, &mut ix).unwrap();
        assert_eq!(ix, bytes.len());
        assert_eq!(decoded, pool);

        let m = decoded.member_ref(6).unwrap();
        assert_eq!(m.class, "java/lang/String");
        assert_eq!(m.name, "toUpperCase");
        assert!(!m.interface);
        assert!(decoded.member_ref(1).is_err());
    }

    #[test]
    fn dangling_reference_rejected() {
        // count = 2, a single Class constant naming index 9
        let bytes = [0x00, 0x02, CONSTANT_CLASS, 0x00, 0x09];
        let mut ix = 0;
        let e = ConstantPool::read(&bytes, &mut ix).unwrap_err();
        assert_eq!(e.kind(), &ClassErrorKind::BadConstantIndex(9));
    }

    #[test]
    fn unpaired_surrogates_are_kept_as_bytes() {
        // "a" then a lone high surrogate, referenced by a String constant
        let bytes = [0x00, 0x03, CONSTANT_UTF8, 0x00, 0x04, b'a', 0xED, 0xA0, 0x80, CONSTANT_STRING, 0x00, 0x01];
        let mut ix = 0;
        let pool = ConstantPool::read(&bytes, &mut ix).unwrap();
        assert_eq!(pool.get(1).unwrap(), &Constant::Utf8Bytes(vec![b'a', 0xED, 0xA0, 0x80]));
        assert_eq!(pool.get(1).unwrap().tag(), CONSTANT_UTF8);
        assert!(pool.utf8(1).is_err());

        let mut out = vec![];
        pool.write(&mut out);
        assert_eq!(out, bytes);
    }

    #[test]
    fn oversized_utf8_rejected() {
        let mut pool = ConstantPool::new();
        let limit = "x".repeat(u16::MAX as usize);
        assert!(pool.string_index(&limit).is_ok());
        let before = pool.count();
        let e = pool.string_index(&format!("{}x", limit)).unwrap_err();
        assert!(e.to_string().contains("65536 bytes"), "{}", e);
        assert_eq!(pool.count(), before);
        // two-byte NULs count towards the limit
        assert!(pool.utf8_index(&"\u{0}".repeat(40_000)).is_err());
    }

    #[test]
    fn unknown_tag_rejected() {
        let bytes = [0x00, 0x02, 2, 0x00];
        let mut ix = 0;
        let e = ConstantPool::read(&bytes, &mut ix).unwrap_err();
        assert_eq!(e.kind(), &ClassErrorKind::BadConstantTag(2));
    }
}
