//! Compiles the source text of a single Java-like method into a class file method.
//!
//! The pipeline is [`lexer`] → [`parser`] → [`binder`] → [`codegen`]. The binder resolves
//! every name through a [`Resolver`] before any bytecode is produced, so the code generator
//! never has to guess at a slot, descriptor or owner.

pub mod ast;
pub mod binder;
pub mod codegen;
pub mod lexer;
pub mod parser;

use crate::class::{Attribute, ClassError, ClassFile, MethodInfo};
use crate::classpath::{ResolveError, Resolver};
use log::debug;
use std::fmt;

#[derive(Debug)]
pub enum SynthError {
    Syntax { line: usize, message: String },
    TypeResolution { line: usize, message: String },
    Unsupported { line: usize, construct: String },
    Resolve(ResolveError),
    Class(ClassError),
}

impl SynthError {
    pub(crate) fn syntax(line: usize, message: &str) -> SynthError {
        SynthError::Syntax { line, message: message.to_string() }
    }

    pub(crate) fn type_error(line: usize, message: &str) -> SynthError {
        SynthError::TypeResolution { line, message: message.to_string() }
    }

    pub(crate) fn unsupported(line: usize, construct: &str) -> SynthError {
        SynthError::Unsupported { line, construct: construct.to_string() }
    }
}

impl fmt::Display for SynthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SynthError::Syntax { line, message } => write!(f, "line {}: syntax error: {}", line, message),
            SynthError::TypeResolution { line, message } => write!(f, "line {}: {}", line, message),
            SynthError::Unsupported { line, construct } => write!(f, "line {}: unsupported construct: {}", line, construct),
            SynthError::Resolve(e) => write!(f, "{}", e),
            SynthError::Class(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for SynthError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SynthError::Resolve(e) => Some(e),
            SynthError::Class(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ResolveError> for SynthError {
    fn from(e: ResolveError) -> Self {
        SynthError::Resolve(e)
    }
}

impl From<ClassError> for SynthError {
    fn from(e: ClassError) -> Self {
        SynthError::Class(e)
    }
}

/// Compiles `source`, a complete method declaration, against the current state of `class`.
///
/// `imports` name classes (`android.os.Build`) or packages (`android.os`, `android.os.*`)
/// whose simple names the source may use. The returned method is not added to `class`, but
/// its name, descriptor and every constant its code refers to are interned in the class's
/// constant pool.
pub fn compile(
    source: &str,
    class: &mut ClassFile,
    resolver: &mut Resolver,
    imports: &[String],
) -> Result<MethodInfo, SynthError> {
    let tokens = lexer::tokenize(source)?;
    let decl = parser::parse_method(tokens)?;
    let this = resolver.define(class)?;
    let method = binder::bind_method(&decl, this, resolver, imports)?;

    let this_name = class.name()?.to_string();
    let code = codegen::generate(&method, &this_name, &mut class.constant_pool, class.major_version)?;
    let descriptor = method.descriptor.descriptor();
    debug!(
        "compiled {}.{}{}: {} bytes of code, max stack {}, max locals {}",
        this_name,
        method.name,
        descriptor,
        code.code.len(),
        code.max_stack,
        code.max_locals
    );

    Ok(MethodInfo {
        access_flags: method.access_flags,
        name_index: class.constant_pool.utf8_index(&method.name)?,
        descriptor_index: class.constant_pool.utf8_index(&descriptor)?,
        attributes: vec![Attribute::Code(code)],
    })
}
