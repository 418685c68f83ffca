use crate::class::{AccessFlags, FieldType};
use crate::classpath::{ArchiveProvider, ClassProvider, ClasspathRoot, ResolveError, Resolver};
use crate::tests::fixtures::*;
use std::fs;

fn shape(method: &str) -> Vec<u8> {
    Stub::class("demo/Shape", "java/lang/Object").method(PUBLIC, method, "()D").bytes()
}

#[test]
fn earlier_roots_win() {
    let dir = scratch_dir("roots");
    let classes_dir = dir.join("classes");
    fs::create_dir_all(classes_dir.join("demo")).unwrap();
    fs::write(classes_dir.join("demo").join("Shape.class"), shape("area")).unwrap();

    let mut classes = jdk_classes();
    classes.push(("demo/Shape".to_string(), shape("perimeter")));
    let jar = dir.join("shapes.jar");
    fs::write(&jar, class_jar(&classes)).unwrap();

    let separator = if cfg!(windows) { ';' } else { ':' };
    let list = format!("{}{}{}{}", classes_dir.display(), separator, separator, jar.display());
    let roots = ClasspathRoot::parse_list(&list);
    assert_eq!(roots, vec![ClasspathRoot::Directory(classes_dir.clone()), ClasspathRoot::Archive(jar.clone())]);

    let mut resolver = Resolver::from_roots(&roots).unwrap();
    let found = resolver.resolve("demo/Shape").unwrap();
    assert_eq!(found.methods[0].name, "area");
    assert_eq!(resolver.find_methods("demo/Shape", "perimeter").unwrap(), vec![]);
    // java/lang/Object only exists in the jar
    assert_eq!(resolver.find_methods("demo/Shape", "hashCode").unwrap().len(), 1);

    let mut reversed = Resolver::from_roots(&[roots[1].clone(), roots[0].clone()]).unwrap();
    assert_eq!(reversed.resolve("demo/Shape").unwrap().methods[0].name, "perimeter");
    fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn overrides_hide_inherited_methods() {
    let mut classes = jdk_classes();
    classes.push(("demo/Shape".to_string(), shape("area")));
    classes.push((
        "demo/Circle".to_string(),
        Stub::class("demo/Circle", "demo/Shape")
            .implements("java/lang/CharSequence")
            .method(PUBLIC, "area", "()D")
            .method(PUBLIC, "toString", "()Ljava/lang/String;")
            .bytes(),
    ));
    let jar: Box<dyn ClassProvider> = Box::new(ArchiveProvider::from_bytes(class_jar(&classes), "shapes").unwrap());
    let mut resolver = Resolver::new(vec![jar]);

    let area = resolver.find_methods("demo/Circle", "area").unwrap();
    assert_eq!(area.len(), 1);
    assert_eq!(area[0].owner.name, "demo/Circle");

    let to_string = resolver.find_methods("demo/Circle", "toString").unwrap();
    assert_eq!(to_string.len(), 1);
    assert_eq!(to_string[0].owner.name, "demo/Circle");

    // interfaces come before the superclass chain
    let length = resolver.find_methods("demo/Circle", "length").unwrap();
    assert_eq!(length[0].owner.name, "java/lang/CharSequence");
    assert!(length[0].owner.is_interface());

    let circle = FieldType::object("demo/Circle");
    assert!(resolver.is_assignable(&circle, &FieldType::object("demo/Shape")).unwrap());
    assert!(resolver.is_assignable(&circle, &FieldType::object("java/lang/CharSequence")).unwrap());
    assert!(!resolver.is_assignable(&FieldType::object("demo/Shape"), &circle).unwrap());
    assert!(resolver.is_subclass("demo/Circle", "java/lang/Object").unwrap());
}

#[test]
fn defined_classes_shadow_the_roots() {
    let mut resolver = stub_resolver();
    let mut string = Stub::class("java/lang/String", "java/lang/Object").build();
    string.add_method_with_code(AccessFlags::PUBLIC, "shout", "()Ljava/lang/String;", None).unwrap();
    resolver.define(&string).unwrap();
    assert_eq!(resolver.find_methods("java/lang/String", "shout").unwrap().len(), 1);
    assert!(resolver.find_methods("java/lang/String", "toUpperCase").unwrap().is_empty());
}

#[test]
fn broken_entries_are_malformed() {
    let mut classes = jdk_classes();
    classes.push(("demo/Broken".to_string(), vec![0xca, 0xfe, 0xba, 0xbe, 0, 0]));
    classes.push(("demo/Misplaced".to_string(), shape("area")));
    let jar: Box<dyn ClassProvider> = Box::new(ArchiveProvider::from_bytes(class_jar(&classes), "broken").unwrap());
    let mut resolver = Resolver::new(vec![jar]);

    assert!(matches!(
        resolver.resolve("demo/Broken"),
        Err(ResolveError::Malformed { ref class, .. }) if class == "demo/Broken"
    ));
    assert!(matches!(resolver.resolve("demo/Misplaced"), Err(ResolveError::Malformed { .. })));
    // a missing superclass stops member lookups
    let mut orphan = Resolver::new(vec![]);
    orphan.define(&Stub::class("demo/Orphan", "demo/Gone").build()).unwrap();
    assert!(matches!(orphan.find_field("demo/Orphan", "x"), Err(ResolveError::NotFound(ref n)) if n == "demo/Gone"));
}

#[test]
fn cyclic_superclasses_are_malformed() {
    let mut resolver = Resolver::new(vec![]);
    resolver.define(&Stub::class("demo/Egg", "demo/Hen").build()).unwrap();
    resolver.define(&Stub::class("demo/Hen", "demo/Egg").build()).unwrap();
    resolver.define(&Stub::class("demo/Chick", "demo/Egg").build()).unwrap();

    match resolver.find_methods("demo/Chick", "hatch") {
        Err(ResolveError::Malformed { class, source }) => {
            assert_eq!(class, "demo/Chick");
            assert!(source.to_string().contains("cyclic inheritance involving demo.Egg"), "{}", source);
        }
        other => panic!("unexpected {:?}", other.map(|m| m.len())),
    }
    assert!(matches!(
        resolver.is_subclass("demo/Hen", "demo/Chick"),
        Err(ResolveError::Malformed { .. })
    ));
}

#[test]
fn unreadable_archive_root() {
    let dir = scratch_dir("bad-root");
    let path = dir.join("not-a.jar");
    fs::write(&path, b"plain text").unwrap();
    assert!(matches!(ClasspathRoot::from_path(&path).open(), Err(ResolveError::Archive(_))));
    assert!(matches!(ClasspathRoot::from_path(&dir.join("missing.jar")).open(), Err(ResolveError::Io(_))));
    fs::remove_dir_all(&dir).unwrap();
}
