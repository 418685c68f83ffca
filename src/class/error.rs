use std::fmt;

macro_rules! err {
    ($base:expr, $msg:literal) => {
        $crate::class::error::ClassError::with_context($base, $msg.to_string())
    };
    ($base:expr, $fmtstr:literal, $($args:tt)*) => {
        $crate::class::error::ClassError::with_context($base, format!($fmtstr, $($args)*))
    };
}

macro_rules! fail {
    ($msg:literal) => {
        return Err($crate::class::error::ClassError::invalid($msg))
    };
    ($fmtstr:literal, $($args:tt)*) => {
        return Err($crate::class::error::ClassError::invalid(&format!($fmtstr, $($args)*)))
    };
}

/// The distinct ways a class file can fail to decode or encode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassErrorKind {
    /// Input ended before a complete structure could be read.
    Truncated { offset: usize },
    /// The first four bytes were not `0xCAFEBABE`.
    BadMagic(u32),
    /// A constant pool index pointed outside the pool (or at an unusable slot).
    BadConstantIndex(u16),
    /// A constant pool entry carried an unknown tag.
    BadConstantTag(u8),
    /// Structurally invalid content.
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassError
{
    kind: ClassErrorKind,
    contexts: Vec<String>,
}

impl ClassError
{
    pub(crate) fn new(kind: ClassErrorKind) -> Self
    {
        ClassError {
            kind,
            contexts: Vec::new(),
        }
    }

    pub(crate) fn invalid(msg: &str) -> Self
    {
        ClassError::new(ClassErrorKind::Invalid(msg.to_string()))
    }

    pub(crate) fn truncated(offset: usize) -> Self
    {
        ClassError::new(ClassErrorKind::Truncated { offset })
    }

    pub(crate) fn bad_index(index: u16) -> Self
    {
        ClassError::new(ClassErrorKind::BadConstantIndex(index))
    }

    pub(crate) fn with_context(base: ClassError, context: String) -> Self
    {
        let mut contexts = base.contexts;
        contexts.push(context);
        ClassError { kind: base.kind, contexts }
    }

    pub fn kind(&self) -> &ClassErrorKind
    {
        &self.kind
    }
}

impl fmt::Display for ClassErrorKind
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self {
            ClassErrorKind::Truncated { offset } => write!(f, "unexpected end of class data at offset {offset}"),
            ClassErrorKind::BadMagic(magic) => write!(f, "invalid magic 0x{magic:08x}"),
            ClassErrorKind::BadConstantIndex(index) => write!(f, "invalid constant pool index {index}"),
            ClassErrorKind::BadConstantTag(tag) => write!(f, "invalid constant pool tag {tag}"),
            ClassErrorKind::Invalid(msg) => write!(f, "{msg}"),
        }
    }
}

impl fmt::Display for ClassError
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{}", self.kind)?;
        let mut connector = " for ";
        for context in &self.contexts
        {
            write!(f, "{}{}", connector, context)?;
            connector = " of ";
        }
        Ok(())
    }
}

impl std::error::Error for ClassError {}
