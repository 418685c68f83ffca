use crate::archive::ArchiveError;
use crate::class::ClassError;
use crate::classpath::ResolveError;
use crate::synth::SynthError;
use std::fmt;

/// Everything that can stop a patch. The first error ends the run; nothing is written.
#[derive(Debug)]
pub enum PatchError {
    MalformedClass(ClassError),
    SymbolNotFound(String),
    Syntax { line: usize, message: String },
    TypeResolution { line: usize, message: String },
    UnsupportedConstruct { line: usize, construct: String },
    MethodNotFound { class: String, name: String, descriptor: String },
    DuplicateMethod { class: String, name: String, descriptor: String },
    EntryNotFound { entry: String },
    ArchiveIo(ArchiveError),
}

impl fmt::Display for PatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PatchError::MalformedClass(e) => write!(f, "malformed class: {e}"),
            PatchError::SymbolNotFound(name) => write!(f, "symbol not found: {}", name.replace('/', ".")),
            PatchError::Syntax { line, message } => write!(f, "syntax error at line {line}: {message}"),
            PatchError::TypeResolution { line, message } => write!(f, "type error at line {line}: {message}"),
            PatchError::UnsupportedConstruct { line, construct } => {
                write!(f, "unsupported construct at line {line}: {construct}")
            }
            PatchError::MethodNotFound { class, name, descriptor } => {
                write!(f, "method {name}{descriptor} not found in {class}")
            }
            PatchError::DuplicateMethod { class, name, descriptor } => {
                write!(f, "method {name}{descriptor} already exists in {class}")
            }
            PatchError::EntryNotFound { entry } => write!(f, "archive has no entry {entry}"),
            PatchError::ArchiveIo(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for PatchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PatchError::MalformedClass(e) => Some(e),
            PatchError::ArchiveIo(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ClassError> for PatchError {
    fn from(e: ClassError) -> Self {
        PatchError::MalformedClass(e)
    }
}

impl From<ArchiveError> for PatchError {
    fn from(e: ArchiveError) -> Self {
        PatchError::ArchiveIo(e)
    }
}

impl From<ResolveError> for PatchError {
    fn from(e: ResolveError) -> Self {
        match e {
            ResolveError::NotFound(name) => PatchError::SymbolNotFound(name),
            ResolveError::Malformed { source, .. } => PatchError::MalformedClass(source),
            ResolveError::Io(e) => PatchError::ArchiveIo(ArchiveError::Io(e)),
            ResolveError::Archive(e) => PatchError::ArchiveIo(ArchiveError::Zip(e)),
        }
    }
}

impl From<SynthError> for PatchError {
    fn from(e: SynthError) -> Self {
        match e {
            SynthError::Syntax { line, message } => PatchError::Syntax { line, message },
            SynthError::TypeResolution { line, message } => PatchError::TypeResolution { line, message },
            SynthError::Unsupported { line, construct } => PatchError::UnsupportedConstruct { line, construct },
            SynthError::Resolve(e) => e.into(),
            SynthError::Class(e) => PatchError::MalformedClass(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolver_misses_become_missing_symbols() {
        let e: PatchError = SynthError::Resolve(ResolveError::NotFound("android/os/Build".into())).into();
        assert!(matches!(&e, PatchError::SymbolNotFound(n) if n == "android/os/Build"));
        assert_eq!(e.to_string(), "symbol not found: android.os.Build");
    }

    #[test]
    fn synth_errors_keep_their_line() {
        let e: PatchError = SynthError::unsupported(7, "while statement").into();
        assert!(matches!(e, PatchError::UnsupportedConstruct { line: 7, .. }));
    }
}
