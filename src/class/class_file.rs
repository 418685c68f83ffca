use crate::class::access::AccessFlags;
use crate::class::constant_pool::ConstantPool;
use crate::class::descriptor::MethodDescriptor;
use crate::class::error::{ClassError, ClassErrorKind};
use crate::class::{count_u2, read_u2, read_u4, read_x, write_u2, write_u4, write_x};
use log::debug;

pub const CLASS_MAGIC: u32 = 0xCAFEBABE;

/// Class files produced from scratch target Java 8, the first version the synthesized
/// StackMapTable frames are mandatory for.
pub const DEFAULT_MAJOR_VERSION: u16 = 52;

/// An entry from the class file `exception_table` of a Code attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionHandler {
    pub start_pc: u16,
    pub end_pc: u16,
    pub handler_pc: u16,
    /// 0 catches everything, otherwise a `CONSTANT_Class` index.
    pub catch_type: u16,
}

/// The decoded form of a `Code` attribute. Its nested attributes (line numbers, local
/// variable tables, stack maps) are kept as raw bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeAttribute {
    pub name_index: u16,
    pub max_stack: u16,
    pub max_locals: u16,
    pub code: Vec<u8>,
    pub exception_table: Vec<ExceptionHandler>,
    pub attributes: Vec<Attribute>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attribute {
    Code(CodeAttribute),
    /// Any attribute this crate does not interpret, kept verbatim.
    Raw { name_index: u16, info: Vec<u8> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldInfo {
    pub access_flags: AccessFlags,
    pub name_index: u16,
    pub descriptor_index: u16,
    pub attributes: Vec<Attribute>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodInfo {
    pub access_flags: AccessFlags,
    pub name_index: u16,
    pub descriptor_index: u16,
    pub attributes: Vec<Attribute>,
}

/// A complete class file.
///
/// Decoding and re-encoding an unmodified class yields the input byte for byte: the constant
/// pool keeps its order, unknown attributes keep their payloads and access flags keep any bits
/// this crate has no name for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassFile {
    pub minor_version: u16,
    pub major_version: u16,
    pub constant_pool: ConstantPool,
    pub access_flags: AccessFlags,
    pub this_class: u16,
    pub super_class: u16,
    pub interfaces: Vec<u16>,
    pub fields: Vec<FieldInfo>,
    pub methods: Vec<MethodInfo>,
    pub attributes: Vec<Attribute>,
}

impl Attribute {
    fn read(bytes: &[u8], ix: &mut usize, pool: &ConstantPool) -> Result<Attribute, ClassError> {
        let name_index = read_u2(bytes, ix)?;
        let length = read_u4(bytes, ix)? as usize;
        let info = read_x(bytes, ix, length)?;
        let name = pool.utf8(name_index).map_err(|e| err!(e, "attribute name"))?;
        if name == "Code" {
            let code = CodeAttribute::read(name_index, &info, pool).map_err(|e| err!(e, "Code attribute"))?;
            Ok(Attribute::Code(code))
        } else {
            Ok(Attribute::Raw { name_index, info })
        }
    }

    fn read_all(bytes: &[u8], ix: &mut usize, pool: &ConstantPool) -> Result<Vec<Attribute>, ClassError> {
        let count = read_u2(bytes, ix)?;
        let mut attributes = Vec::with_capacity(count as usize);
        for _ in 0..count {
            attributes.push(Attribute::read(bytes, ix, pool)?);
        }
        Ok(attributes)
    }

    fn write(&self, bytes: &mut Vec<u8>) -> Result<usize, ClassError> {
        let mut c = 0;
        match self {
            Attribute::Raw { name_index, info } => {
                c += write_u2(bytes, *name_index);
                c += write_u4(bytes, attribute_length(info.len())?);
                c += write_x(bytes, info);
            }
            Attribute::Code(code) => {
                let mut body = vec![];
                code.write_body(&mut body)?;
                c += write_u2(bytes, code.name_index);
                c += write_u4(bytes, attribute_length(body.len())?);
                c += write_x(bytes, &body);
            }
        }
        Ok(c)
    }

    fn write_all(attributes: &[Attribute], bytes: &mut Vec<u8>) -> Result<usize, ClassError> {
        let mut c = write_u2(bytes, count_u2(attributes.len(), "attributes")?);
        for a in attributes {
            c += a.write(bytes)?;
        }
        Ok(c)
    }

    pub fn name<'a>(&self, pool: &'a ConstantPool) -> Result<&'a str, ClassError> {
        match self {
            Attribute::Code(code) => pool.utf8(code.name_index),
            Attribute::Raw { name_index, .. } => pool.utf8(*name_index),
        }
    }
}

fn attribute_length(len: usize) -> Result<u32, ClassError> {
    u32::try_from(len).map_err(|_| ClassError::invalid(&format!("attribute too long: {len}")))
}

impl CodeAttribute {
    fn read(name_index: u16, info: &[u8], pool: &ConstantPool) -> Result<CodeAttribute, ClassError> {
        let mut ix = 0;
        let max_stack = read_u2(info, &mut ix)?;
        let max_locals = read_u2(info, &mut ix)?;
        let code_length = read_u4(info, &mut ix)? as usize;
        let code = read_x(info, &mut ix, code_length)?;
        let handler_count = read_u2(info, &mut ix)?;
        let mut exception_table = Vec::with_capacity(handler_count as usize);
        for _ in 0..handler_count {
            exception_table.push(ExceptionHandler {
                start_pc: read_u2(info, &mut ix)?,
                end_pc: read_u2(info, &mut ix)?,
                handler_pc: read_u2(info, &mut ix)?,
                catch_type: read_u2(info, &mut ix)?,
            });
        }
        let attributes = Attribute::read_all(info, &mut ix, pool)?;
        if ix != info.len() {
            fail!("{} trailing bytes", info.len() - ix);
        }
        Ok(CodeAttribute {
            name_index,
            max_stack,
            max_locals,
            code,
            exception_table,
            attributes,
        })
    }

    fn write_body(&self, bytes: &mut Vec<u8>) -> Result<usize, ClassError> {
        let mut c = 0;
        c += write_u2(bytes, self.max_stack);
        c += write_u2(bytes, self.max_locals);
        c += write_u4(bytes, attribute_length(self.code.len())?);
        c += write_x(bytes, &self.code);
        c += write_u2(bytes, count_u2(self.exception_table.len(), "exception handlers")?);
        for h in &self.exception_table {
            c += write_u2(bytes, h.start_pc);
            c += write_u2(bytes, h.end_pc);
            c += write_u2(bytes, h.handler_pc);
            c += write_u2(bytes, h.catch_type);
        }
        c += Attribute::write_all(&self.attributes, bytes)?;
        Ok(c)
    }
}

impl FieldInfo {
    fn read(bytes: &[u8], ix: &mut usize, pool: &ConstantPool) -> Result<FieldInfo, ClassError> {
        let access_flags = AccessFlags::from_bits_retain(read_u2(bytes, ix)?);
        let name_index = read_u2(bytes, ix)?;
        let descriptor_index = read_u2(bytes, ix)?;
        pool.utf8(name_index)?;
        pool.utf8(descriptor_index)?;
        let attributes = Attribute::read_all(bytes, ix, pool)?;
        Ok(FieldInfo { access_flags, name_index, descriptor_index, attributes })
    }

    fn write(&self, bytes: &mut Vec<u8>) -> Result<usize, ClassError> {
        let mut c = write_u2(bytes, self.access_flags.bits());
        c += write_u2(bytes, self.name_index);
        c += write_u2(bytes, self.descriptor_index);
        c += Attribute::write_all(&self.attributes, bytes)?;
        Ok(c)
    }
}

impl MethodInfo {
    fn read(bytes: &[u8], ix: &mut usize, pool: &ConstantPool) -> Result<MethodInfo, ClassError> {
        let access_flags = AccessFlags::from_bits_retain(read_u2(bytes, ix)?);
        let name_index = read_u2(bytes, ix)?;
        let descriptor_index = read_u2(bytes, ix)?;
        pool.utf8(name_index)?;
        pool.utf8(descriptor_index)?;
        let attributes = Attribute::read_all(bytes, ix, pool)
            .map_err(|e| err!(e, "method {}", pool.utf8(name_index).unwrap_or("?")))?;
        Ok(MethodInfo { access_flags, name_index, descriptor_index, attributes })
    }

    fn write(&self, bytes: &mut Vec<u8>) -> Result<usize, ClassError> {
        let mut c = write_u2(bytes, self.access_flags.bits());
        c += write_u2(bytes, self.name_index);
        c += write_u2(bytes, self.descriptor_index);
        c += Attribute::write_all(&self.attributes, bytes)?;
        Ok(c)
    }

    pub fn code(&self) -> Option<&CodeAttribute> {
        self.attributes.iter().find_map(|a| match a {
            Attribute::Code(code) => Some(code),
            _ => None,
        })
    }
}

impl ClassFile {
    /// Creates an empty class extending `super_name` (or nothing, for `java/lang/Object`).
    pub fn new(name: &str, super_name: Option<&str>, access_flags: AccessFlags) -> Result<ClassFile, ClassError> {
        let mut constant_pool = ConstantPool::new();
        let this_class = constant_pool.class_index(name)?;
        let super_class = match super_name {
            Some(s) => constant_pool.class_index(s)?,
            None => 0,
        };
        Ok(ClassFile {
            minor_version: 0,
            major_version: DEFAULT_MAJOR_VERSION,
            constant_pool,
            access_flags,
            this_class,
            super_class,
            interfaces: vec![],
            fields: vec![],
            methods: vec![],
            attributes: vec![],
        })
    }

    pub fn decode(bytes: &[u8]) -> Result<ClassFile, ClassError> {
        let mut ix = 0;
        let magic = read_u4(bytes, &mut ix)?;
        if magic != CLASS_MAGIC {
            return Err(ClassError::new(ClassErrorKind::BadMagic(magic)));
        }
        let minor_version = read_u2(bytes, &mut ix)?;
        let major_version = read_u2(bytes, &mut ix)?;
        let constant_pool = ConstantPool::read(bytes, &mut ix)?;
        let access_flags = AccessFlags::from_bits_retain(read_u2(bytes, &mut ix)?);
        let this_class = read_u2(bytes, &mut ix)?;
        constant_pool.class_name(this_class).map_err(|e| err!(e, "this_class"))?;
        let super_class = read_u2(bytes, &mut ix)?;
        if super_class != 0 {
            constant_pool.class_name(super_class).map_err(|e| err!(e, "super_class"))?;
        }

        let interface_count = read_u2(bytes, &mut ix)?;
        let mut interfaces = Vec::with_capacity(interface_count as usize);
        for _ in 0..interface_count {
            let index = read_u2(bytes, &mut ix)?;
            constant_pool.class_name(index).map_err(|e| err!(e, "interfaces"))?;
            interfaces.push(index);
        }

        let field_count = read_u2(bytes, &mut ix)?;
        let mut fields = Vec::with_capacity(field_count as usize);
        for n in 0..field_count {
            fields.push(FieldInfo::read(bytes, &mut ix, &constant_pool).map_err(|e| err!(e, "field {}", n))?);
        }

        let method_count = read_u2(bytes, &mut ix)?;
        let mut methods = Vec::with_capacity(method_count as usize);
        for _ in 0..method_count {
            methods.push(MethodInfo::read(bytes, &mut ix, &constant_pool)?);
        }

        let attributes = Attribute::read_all(bytes, &mut ix, &constant_pool)?;
        if ix != bytes.len() {
            fail!("{} trailing bytes after class file", bytes.len() - ix);
        }

        debug!(
            "decoded class {} (version {}.{}, {} constants, {} methods)",
            constant_pool.class_name(this_class)?,
            major_version,
            minor_version,
            constant_pool.count(),
            methods.len()
        );

        Ok(ClassFile {
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

    pub fn encode(&self) -> Result<Vec<u8>, ClassError> {
        let mut bytes = vec![];
        write_u4(&mut bytes, CLASS_MAGIC);
        write_u2(&mut bytes, self.minor_version);
        write_u2(&mut bytes, self.major_version);
        self.constant_pool.write(&mut bytes);
        write_u2(&mut bytes, self.access_flags.bits());
        write_u2(&mut bytes, self.this_class);
        write_u2(&mut bytes, self.super_class);
        write_u2(&mut bytes, count_u2(self.interfaces.len(), "interfaces")?);
        for i in &self.interfaces {
            write_u2(&mut bytes, *i);
        }
        write_u2(&mut bytes, count_u2(self.fields.len(), "fields")?);
        for f in &self.fields {
            f.write(&mut bytes)?;
        }
        write_u2(&mut bytes, count_u2(self.methods.len(), "methods")?);
        for m in &self.methods {
            m.write(&mut bytes)?;
        }
        Attribute::write_all(&self.attributes, &mut bytes)?;
        Ok(bytes)
    }

    /// Internal name of this class, e.g. `io/flutter/view/AccessibilityBridge`.
    pub fn name(&self) -> Result<&str, ClassError> {
        self.constant_pool.class_name(self.this_class)
    }

    pub fn super_name(&self) -> Result<Option<&str>, ClassError> {
        if self.super_class == 0 {
            Ok(None)
        } else {
            self.constant_pool.class_name(self.super_class).map(Some)
        }
    }

    pub fn interface_names(&self) -> Result<Vec<&str>, ClassError> {
        self.interfaces.iter().map(|i| self.constant_pool.class_name(*i)).collect()
    }

    pub fn field_name(&self, field: &FieldInfo) -> Result<&str, ClassError> {
        self.constant_pool.utf8(field.name_index)
    }

    pub fn field_descriptor(&self, field: &FieldInfo) -> Result<&str, ClassError> {
        self.constant_pool.utf8(field.descriptor_index)
    }

    pub fn method_name(&self, method: &MethodInfo) -> Result<&str, ClassError> {
        self.constant_pool.utf8(method.name_index)
    }

    pub fn method_descriptor(&self, method: &MethodInfo) -> Result<&str, ClassError> {
        self.constant_pool.utf8(method.descriptor_index)
    }

    /// Finds the method with exactly this name and descriptor.
    pub fn find_method(&self, name: &str, descriptor: &str) -> Result<Option<usize>, ClassError> {
        for (i, m) in self.methods.iter().enumerate() {
            if self.method_name(m)? == name && self.method_descriptor(m)? == descriptor {
                return Ok(Some(i));
            }
        }
        Ok(None)
    }

    /// Renames a method in place. A fresh Utf8 constant is interned for the new name so
    /// that other constants sharing the old string (call sites, the source file name, ...)
    /// are left untouched.
    pub fn rename_method(&mut self, index: usize, new_name: &str) -> Result<(), ClassError> {
        if index >= self.methods.len() {
            fail!("method index {} out of range", index);
        }
        let name_index = self.constant_pool.utf8_index(new_name)?;
        self.methods[index].name_index = name_index;
        Ok(())
    }

    /// Appends a method, rejecting a second method with the same name and descriptor.
    pub fn add_method(&mut self, method: MethodInfo) -> Result<usize, ClassError> {
        let name = self.method_name(&method)?.to_string();
        let descriptor = self.method_descriptor(&method)?.to_string();
        MethodDescriptor::from_descriptor(&descriptor)?;
        if self.find_method(&name, &descriptor)?.is_some() {
            fail!("method {}{} already exists", name, descriptor);
        }
        self.methods.push(method);
        Ok(self.methods.len() - 1)
    }

    /// Adds a field with no attributes.
    pub fn add_field(&mut self, access_flags: AccessFlags, name: &str, descriptor: &str) -> Result<usize, ClassError> {
        let name_index = self.constant_pool.utf8_index(name)?;
        let descriptor_index = self.constant_pool.utf8_index(descriptor)?;
        self.fields.push(FieldInfo { access_flags, name_index, descriptor_index, attributes: vec![] });
        Ok(self.fields.len() - 1)
    }

    /// Adds a method whose body is built elsewhere; `code` may be `None` for abstract and native methods.
    pub fn add_method_with_code(
        &mut self,
        access_flags: AccessFlags,
        name: &str,
        descriptor: &str,
        code: Option<CodeAttribute>,
    ) -> Result<usize, ClassError> {
        let name_index = self.constant_pool.utf8_index(name)?;
        let descriptor_index = self.constant_pool.utf8_index(descriptor)?;
        let attributes = code.map(Attribute::Code).into_iter().collect();
        self.add_method(MethodInfo { access_flags, name_index, descriptor_index, attributes })
    }
}
