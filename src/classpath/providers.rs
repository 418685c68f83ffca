use crate::classpath::ResolveError;
use log::debug;
use std::fs::{self, File};
use std::io::{Cursor, Read, Seek};
use std::path::{Path, PathBuf};
use zip::result::ZipError;
use zip::ZipArchive;

/// A source of class file bytes, keyed by internal class name.
pub trait ClassProvider {
    /// Returns the bytes of `internal_name` (`java/lang/String`), or `None` if this root
    /// does not contain it.
    fn class_bytes(&mut self, internal_name: &str) -> Result<Option<Vec<u8>>, ResolveError>;

    /// Human readable name of the root, for log messages.
    fn describe(&self) -> String;
}

/// Looks classes up as `<name>.class` entries of a zip archive.
pub struct ArchiveProvider<R: Read + Seek> {
    archive: ZipArchive<R>,
    label: String,
}

impl<R: Read + Seek> ArchiveProvider<R> {
    pub fn new(reader: R, label: &str) -> Result<Self, ResolveError> {
        Ok(ArchiveProvider {
            archive: ZipArchive::new(reader)?,
            label: label.to_string(),
        })
    }
}

impl ArchiveProvider<Cursor<Vec<u8>>> {
    pub fn from_bytes(bytes: Vec<u8>, label: &str) -> Result<Self, ResolveError> {
        ArchiveProvider::new(Cursor::new(bytes), label)
    }
}

impl ArchiveProvider<File> {
    pub fn from_file(path: &Path) -> Result<Self, ResolveError> {
        ArchiveProvider::new(File::open(path)?, &path.display().to_string())
    }
}

impl<R: Read + Seek> ClassProvider for ArchiveProvider<R> {
    fn class_bytes(&mut self, internal_name: &str) -> Result<Option<Vec<u8>>, ResolveError> {
        let entry_name = format!("{internal_name}.class");
        let mut file = match self.archive.by_name(&entry_name) {
            Ok(file) => file,
            Err(ZipError::FileNotFound) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let mut bytes = Vec::with_capacity(file.size() as usize);
        file.read_to_end(&mut bytes)?;
        Ok(Some(bytes))
    }

    fn describe(&self) -> String {
        self.label.clone()
    }
}

/// Looks classes up as `<root>/<name>.class` files.
pub struct DirectoryProvider {
    root: PathBuf,
}

impl DirectoryProvider {
    pub fn new(root: &Path) -> Self {
        DirectoryProvider { root: root.to_path_buf() }
    }
}

impl ClassProvider for DirectoryProvider {
    fn class_bytes(&mut self, internal_name: &str) -> Result<Option<Vec<u8>>, ResolveError> {
        let mut path = self.root.clone();
        for part in internal_name.split('/') {
            path.push(part);
        }
        path.set_extension("class");
        if !path.is_file() {
            return Ok(None);
        }
        Ok(Some(fs::read(&path)?))
    }

    fn describe(&self) -> String {
        self.root.display().to_string()
    }
}

/// A classpath root as supplied by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClasspathRoot {
    Archive(PathBuf),
    Directory(PathBuf),
}

impl ClasspathRoot {
    /// Classifies a path: directories are searched as class trees, anything else as an archive.
    pub fn from_path(path: &Path) -> ClasspathRoot {
        if path.is_dir() {
            ClasspathRoot::Directory(path.to_path_buf())
        } else {
            ClasspathRoot::Archive(path.to_path_buf())
        }
    }

    /// Splits a classpath string on the platform separator (`:` on Unix, `;` on Windows).
    pub fn parse_list(classpath: &str) -> Vec<ClasspathRoot> {
        let separator = if cfg!(windows) { ';' } else { ':' };
        classpath
            .split(separator)
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(|entry| ClasspathRoot::from_path(Path::new(entry)))
            .collect()
    }

    pub fn open(&self) -> Result<Box<dyn ClassProvider>, ResolveError> {
        match self {
            ClasspathRoot::Archive(path) => {
                debug!("opening classpath archive {}", path.display());
                Ok(Box::new(ArchiveProvider::from_file(path)?))
            }
            ClasspathRoot::Directory(path) => Ok(Box::new(DirectoryProvider::new(path))),
        }
    }
}
