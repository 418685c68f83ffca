//! Symbol resolution against an ordered classpath.
//!
//! A [`Resolver`] owns a list of [`ClassProvider`] roots and a per-run cache from internal
//! class name to the structural [`ClassDescriptor`] of that class. Misses are cached too, so
//! probing import candidates costs one lookup per root per name.

pub mod providers;

pub use crate::classpath::providers::{ArchiveProvider, ClassProvider, ClasspathRoot, DirectoryProvider};

use crate::class::{AccessFlags, ClassError, ClassFile, FieldType};
use log::debug;
use std::collections::HashMap;
use std::fmt;
use std::io;
use std::rc::Rc;
use zip::result::ZipError;

#[derive(Debug)]
pub enum ResolveError {
    NotFound(String),
    Malformed { class: String, source: ClassError },
    Io(io::Error),
    Archive(ZipError),
}

impl fmt::Display for ResolveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolveError::NotFound(name) => write!(f, "class {} not found on the classpath", name.replace('/', ".")),
            ResolveError::Malformed { class, source } => write!(f, "malformed class {}: {}", class, source),
            ResolveError::Io(e) => write!(f, "classpath I/O error: {}", e),
            ResolveError::Archive(e) => write!(f, "classpath archive error: {}", e),
        }
    }
}

impl std::error::Error for ResolveError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ResolveError::NotFound(_) => None,
            ResolveError::Malformed { source, .. } => Some(source),
            ResolveError::Io(e) => Some(e),
            ResolveError::Archive(e) => Some(e),
        }
    }
}

impl From<io::Error> for ResolveError {
    fn from(e: io::Error) -> Self {
        ResolveError::Io(e)
    }
}

impl From<ZipError> for ResolveError {
    fn from(e: ZipError) -> Self {
        ResolveError::Archive(e)
    }
}

/// A field or method as seen from outside its class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberDescriptor {
    pub name: String,
    pub descriptor: String,
    pub access_flags: AccessFlags,
}

/// The structural view of a class the synthesizer needs: its place in the type hierarchy
/// and the signatures of its members. Method bodies are not kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassDescriptor {
    pub name: String,
    pub super_name: Option<String>,
    pub interfaces: Vec<String>,
    pub access_flags: AccessFlags,
    pub fields: Vec<MemberDescriptor>,
    pub methods: Vec<MemberDescriptor>,
}

impl ClassDescriptor {
    pub fn from_class_file(class: &ClassFile) -> Result<ClassDescriptor, ClassError> {
        let fields = class
            .fields
            .iter()
            .map(|f| {
                Ok(MemberDescriptor {
                    name: class.field_name(f)?.to_string(),
                    descriptor: class.field_descriptor(f)?.to_string(),
                    access_flags: f.access_flags,
                })
            })
            .collect::<Result<Vec<_>, ClassError>>()?;
        let methods = class
            .methods
            .iter()
            .map(|m| {
                Ok(MemberDescriptor {
                    name: class.method_name(m)?.to_string(),
                    descriptor: class.method_descriptor(m)?.to_string(),
                    access_flags: m.access_flags,
                })
            })
            .collect::<Result<Vec<_>, ClassError>>()?;
        Ok(ClassDescriptor {
            name: class.name()?.to_string(),
            super_name: class.super_name()?.map(str::to_string),
            interfaces: class.interface_names()?.into_iter().map(str::to_string).collect(),
            access_flags: class.access_flags,
            fields,
            methods,
        })
    }

    /// Array classes have no class file; they extend Object and implement Cloneable and Serializable.
    fn array(descriptor: &str) -> ClassDescriptor {
        ClassDescriptor {
            name: descriptor.to_string(),
            super_name: Some("java/lang/Object".to_string()),
            interfaces: vec!["java/lang/Cloneable".to_string(), "java/io/Serializable".to_string()],
            access_flags: AccessFlags::PUBLIC | AccessFlags::FINAL,
            fields: vec![],
            methods: vec![],
        }
    }

    pub fn is_interface(&self) -> bool {
        self.access_flags.is_interface()
    }

    /// Package part of the internal name, empty for the default package.
    pub fn package(&self) -> &str {
        match self.name.rfind('/') {
            Some(ix) => &self.name[..ix],
            None => "",
        }
    }
}

/// A method found by [`Resolver::find_methods`], with the class that declares it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedMethod {
    pub owner: Rc<ClassDescriptor>,
    pub method: MemberDescriptor,
}

/// A field found by [`Resolver::find_field`], with the class that declares it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedField {
    pub owner: Rc<ClassDescriptor>,
    pub field: MemberDescriptor,
}

/// Resolves class names against ordered roots, first match wins.
///
/// Holds `Rc` values and non-`Send` providers, so a resolver is confined to the thread
/// running one patch.
pub struct Resolver {
    roots: Vec<Box<dyn ClassProvider>>,
    cache: HashMap<String, Option<Rc<ClassDescriptor>>>,
}

impl Resolver {
    pub fn new(roots: Vec<Box<dyn ClassProvider>>) -> Resolver {
        Resolver { roots, cache: HashMap::new() }
    }

    pub fn from_roots(roots: &[ClasspathRoot]) -> Result<Resolver, ResolveError> {
        let providers = roots.iter().map(ClasspathRoot::open).collect::<Result<Vec<_>, _>>()?;
        Ok(Resolver::new(providers))
    }

    /// Adds a root searched after every existing one.
    pub fn push_root(&mut self, provider: Box<dyn ClassProvider>) {
        self.roots.push(provider);
    }

    /// Registers an in-memory class, replacing whatever the roots would have produced for its name.
    pub fn define(&mut self, class: &ClassFile) -> Result<Rc<ClassDescriptor>, ResolveError> {
        let descriptor = ClassDescriptor::from_class_file(class).map_err(|source| ResolveError::Malformed {
            class: class.name().unwrap_or("?").to_string(),
            source,
        })?;
        let descriptor = Rc::new(descriptor);
        self.cache.insert(descriptor.name.clone(), Some(descriptor.clone()));
        Ok(descriptor)
    }

    /// Looks a class up, returning `None` when no root has it.
    pub fn try_resolve(&mut self, name: &str) -> Result<Option<Rc<ClassDescriptor>>, ResolveError> {
        if let Some(cached) = self.cache.get(name) {
            return Ok(cached.clone());
        }
        let found = if name.starts_with('[') {
            Some(Rc::new(ClassDescriptor::array(name)))
        } else {
            self.load(name)?
        };
        self.cache.insert(name.to_string(), found.clone());
        Ok(found)
    }

    /// Looks a class up; a miss is an error.
    pub fn resolve(&mut self, name: &str) -> Result<Rc<ClassDescriptor>, ResolveError> {
        match self.try_resolve(name)? {
            Some(descriptor) => Ok(descriptor),
            None => Err(ResolveError::NotFound(name.to_string())),
        }
    }

    fn load(&mut self, name: &str) -> Result<Option<Rc<ClassDescriptor>>, ResolveError> {
        for root in self.roots.iter_mut() {
            let bytes = match root.class_bytes(name)? {
                Some(bytes) => bytes,
                None => continue,
            };
            debug!("resolved {} from {}", name, root.describe());
            let malformed = |source| ResolveError::Malformed { class: name.to_string(), source };
            let class = ClassFile::decode(&bytes).map_err(malformed)?;
            let descriptor = ClassDescriptor::from_class_file(&class).map_err(malformed)?;
            if descriptor.name != name {
                return Err(malformed(ClassError::invalid(&format!(
                    "entry for {} declares class {}",
                    name, descriptor.name
                ))));
            }
            return Ok(Some(Rc::new(descriptor)));
        }
        Ok(None)
    }

    /// Supertypes of `name` in lookup order: the class itself, then its interfaces (depth
    /// first), then its superclass chain. Each type appears once. A superclass chain that
    /// comes back to one of its own classes makes the class malformed.
    fn hierarchy(&mut self, name: &str) -> Result<Vec<Rc<ClassDescriptor>>, ResolveError> {
        let mut seen = vec![];
        let mut order = vec![];
        let mut chain: Vec<String> = vec![];
        let mut current = Some(name.to_string());
        while let Some(class_name) = current {
            if chain.contains(&class_name) {
                return Err(ResolveError::Malformed {
                    class: name.to_string(),
                    source: ClassError::invalid(&format!(
                        "cyclic inheritance involving {}",
                        class_name.replace('/', ".")
                    )),
                });
            }
            chain.push(class_name.clone());
            let class = self.resolve(&class_name)?;
            if !seen.contains(&class.name) {
                seen.push(class.name.clone());
                order.push(class.clone());
            }
            let mut pending: Vec<String> = class.interfaces.iter().rev().cloned().collect();
            while let Some(iface) = pending.pop() {
                if seen.contains(&iface) {
                    continue;
                }
                let d = self.resolve(&iface)?;
                seen.push(iface);
                pending.extend(d.interfaces.iter().rev().cloned());
                order.push(d);
            }
            current = class.super_name.clone();
        }
        Ok(order)
    }

    /// Finds a field by name in `class` or any of its supertypes.
    pub fn find_field(&mut self, class: &str, name: &str) -> Result<Option<ResolvedField>, ResolveError> {
        for owner in self.hierarchy(class)? {
            if let Some(field) = owner.fields.iter().find(|f| f.name == name) {
                let field = field.clone();
                return Ok(Some(ResolvedField { owner, field }));
            }
        }
        Ok(None)
    }

    /// All methods called `name` visible on `class`. An override hides the methods with the
    /// same descriptor further up the hierarchy.
    pub fn find_methods(&mut self, class: &str, name: &str) -> Result<Vec<ResolvedMethod>, ResolveError> {
        let mut found: Vec<ResolvedMethod> = vec![];
        for owner in self.hierarchy(class)? {
            for method in owner.methods.iter().filter(|m| m.name == name) {
                if found.iter().all(|f| f.method.descriptor != method.descriptor) {
                    found.push(ResolvedMethod { owner: owner.clone(), method: method.clone() });
                }
            }
        }
        Ok(found)
    }

    /// Whether `sub` is `sup` or one of its subclasses or implementations.
    pub fn is_subclass(&mut self, sub: &str, sup: &str) -> Result<bool, ResolveError> {
        if sub == sup || sup == "java/lang/Object" {
            return Ok(true);
        }
        Ok(self.hierarchy(sub)?.iter().any(|c| c.name == sup))
    }

    /// Whether a value of type `from` can be passed where `to` is expected, by identity,
    /// primitive widening or reference widening.
    pub fn is_assignable(&mut self, from: &FieldType, to: &FieldType) -> Result<bool, ResolveError> {
        if from == to {
            return Ok(true);
        }
        match (from, to) {
            (FieldType::Object(a), FieldType::Object(b)) => self.is_subclass(a, b),
            (FieldType::Array(_), FieldType::Object(b)) => {
                Ok(matches!(b.as_str(), "java/lang/Object" | "java/lang/Cloneable" | "java/io/Serializable"))
            }
            (FieldType::Array(a), FieldType::Array(b)) => {
                if a.is_reference() && b.is_reference() {
                    self.is_assignable(a, b)
                } else {
                    Ok(false)
                }
            }
            (a, b) if !a.is_reference() && !b.is_reference() => Ok(widens(a, b)),
            _ => Ok(false),
        }
    }
}

fn widens(from: &FieldType, to: &FieldType) -> bool {
    use FieldType::*;
    matches!(
        (from, to),
        (Byte, Short | Int | Long | Float | Double)
            | (Short, Int | Long | Float | Double)
            | (Char, Int | Long | Float | Double)
            | (Int, Long | Float | Double)
            | (Long, Float | Double)
            | (Float, Double)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct Counting {
        classes: HashMap<String, Vec<u8>>,
        lookups: Rc<Cell<usize>>,
    }

    impl ClassProvider for Counting {
        fn class_bytes(&mut self, internal_name: &str) -> Result<Option<Vec<u8>>, ResolveError> {
            self.lookups.set(self.lookups.get() + 1);
            Ok(self.classes.get(internal_name).cloned())
        }

        fn describe(&self) -> String {
            "counting".to_string()
        }
    }

    fn class(name: &str, super_name: Option<&str>) -> Vec<u8> {
        ClassFile::new(name, super_name, AccessFlags::PUBLIC).unwrap().encode().unwrap()
    }

    #[test]
    fn misses_are_memoised() {
        let lookups = Rc::new(Cell::new(0));
        let mut classes = HashMap::new();
        classes.insert("java/lang/Object".to_string(), class("java/lang/Object", None));
        let mut resolver = Resolver::new(vec![Box::new(Counting { classes, lookups: lookups.clone() })]);

        assert!(resolver.try_resolve("a/Missing").unwrap().is_none());
        assert!(resolver.try_resolve("a/Missing").unwrap().is_none());
        resolver.resolve("java/lang/Object").unwrap();
        resolver.resolve("java/lang/Object").unwrap();
        assert_eq!(lookups.get(), 2);
        assert!(matches!(resolver.resolve("a/Missing"), Err(ResolveError::NotFound(_))));
    }

    #[test]
    fn widening() {
        let mut resolver = Resolver::new(vec![]);
        assert!(resolver.is_assignable(&FieldType::Int, &FieldType::Long).unwrap());
        assert!(!resolver.is_assignable(&FieldType::Long, &FieldType::Int).unwrap());
        assert!(!resolver.is_assignable(&FieldType::Boolean, &FieldType::Int).unwrap());
        let strings = FieldType::Array(Box::new(FieldType::object("java/lang/String")));
        assert!(resolver.is_assignable(&strings, &FieldType::object("java/lang/Object")).unwrap());
    }
}
