//! The binary class model: decoding, mutating and re-encoding JVM class files.

#[macro_use]
pub mod error;

pub mod access;
pub mod class_file;
pub mod code;
pub mod constant_pool;
pub mod descriptor;
pub mod opcodes;

pub use crate::class::access::AccessFlags;
pub use crate::class::code::{CodeBuilder, InvokeKind, Label};
pub use crate::class::class_file::{Attribute, ClassFile, CodeAttribute, ExceptionHandler, FieldInfo, MethodInfo};
pub use crate::class::constant_pool::{Constant, ConstantPool};
pub use crate::class::descriptor::{FieldType, MethodDescriptor};
pub use crate::class::error::{ClassError, ClassErrorKind};

// Basic big-endian reading and writing
pub(crate) fn read_u1(bytes: &[u8], ix: &mut usize) -> Result<u8, ClassError>
{
    if bytes.len() < *ix + 1
    {
        return Err(ClassError::truncated(*ix));
    }
    let result = bytes[*ix];
    *ix += 1;
    Ok(result)
}

pub(crate) fn read_u2(bytes: &[u8], ix: &mut usize) -> Result<u16, ClassError>
{
    if bytes.len() < *ix + 2
    {
        return Err(ClassError::truncated(*ix));
    }
    let result = ((bytes[*ix] as u16) << 8) | (bytes[*ix + 1] as u16);
    *ix += 2;
    Ok(result)
}

pub(crate) fn read_u4(bytes: &[u8], ix: &mut usize) -> Result<u32, ClassError>
{
    if bytes.len() < *ix + 4
    {
        return Err(ClassError::truncated(*ix));
    }
    let result =
        ((bytes[*ix] as u32) << 24) | ((bytes[*ix + 1] as u32) << 16) | ((bytes[*ix + 2] as u32) << 8) | (bytes[*ix + 3] as u32);
    *ix += 4;
    Ok(result)
}

pub(crate) fn read_x(bytes: &[u8], ix: &mut usize, length: usize) -> Result<Vec<u8>, ClassError>
{
    if bytes.len() < *ix || bytes.len() - *ix < length
    {
        return Err(ClassError::truncated(*ix));
    }
    let v = bytes[*ix..*ix + length].to_vec();
    *ix += length;
    Ok(v)
}

pub(crate) fn write_u1(buffer: &mut Vec<u8>, val: u8) -> usize
{
    buffer.push(val);
    1
}

pub(crate) fn write_u2(buffer: &mut Vec<u8>, val: u16) -> usize
{
    buffer.extend_from_slice(&val.to_be_bytes());
    2
}

pub(crate) fn write_u4(buffer: &mut Vec<u8>, val: u32) -> usize
{
    buffer.extend_from_slice(&val.to_be_bytes());
    4
}

pub(crate) fn write_x(buffer: &mut Vec<u8>, val: &[u8]) -> usize
{
    buffer.extend_from_slice(val);
    val.len()
}

/// Converts a collection length into the `u2` count used throughout the class format.
pub(crate) fn count_u2(len: usize, what: &str) -> Result<u16, ClassError>
{
    u16::try_from(len).map_err(|_| ClassError::invalid(&format!("too many {what}: {len}")))
}
