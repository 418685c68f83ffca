use crate::class::opcodes::{check_constant_operands, ALOAD, ARETURN, INVOKEINTERFACE, INVOKESTATIC, INVOKEVIRTUAL};
use crate::class::{ClassFile, Constant, ConstantPool};
use crate::classpath::{ArchiveProvider, ClassProvider, Resolver};
use crate::error::PatchError;
use crate::patch::{patch_class, PatchSpec};
use crate::tests::fixtures::*;

fn upper_case_spec() -> PatchSpec {
    PatchSpec {
        archive_prefix: "demo:target".to_string(),
        class_name: "demo/Target".to_string(),
        method_name: "foo".to_string(),
        method_descriptor: "()Ljava/lang/String;".to_string(),
        rename_suffix: "_original".to_string(),
        imports: vec![],
        source: "public String foo() {\n    return foo_original().toUpperCase();\n}\n".to_string(),
    }
}

fn has_string(pool: &ConstantPool, value: &str) -> bool {
    pool.entries().iter().any(|c| match c {
        Constant::String { string_index } => pool.utf8(*string_index).map_or(false, |s| s == value),
        _ => false,
    })
}

fn method_names(class: &ClassFile) -> Vec<String> {
    class.methods.iter().map(|m| class.method_name(m).unwrap().to_string()).collect()
}

#[test]
fn replacement_wraps_the_renamed_original() {
    let original = target_class();
    let bytes = original.encode().unwrap();
    let patched = patch_class(&bytes, &upper_case_spec(), &mut stub_resolver()).unwrap();
    let class = ClassFile::decode(&patched).unwrap();

    assert_eq!(method_names(&class), vec!["foo_original", "foo"]);
    let descriptor = "()Ljava/lang/String;";
    let kept = class.find_method("foo_original", descriptor).unwrap().unwrap();
    assert_eq!(class.methods[kept].code(), original.methods[0].code());

    assert_eq!(
        calls(&class, "foo", descriptor),
        vec![
            (INVOKEVIRTUAL, "demo/Target".to_string(), "foo_original".to_string(), descriptor.to_string()),
            (INVOKEVIRTUAL, "java/lang/String".to_string(), "toUpperCase".to_string(), descriptor.to_string()),
        ]
    );
    let foo = class.find_method("foo", descriptor).unwrap().unwrap();
    let code = class.methods[foo].code().unwrap();
    assert_eq!(code.code.len(), 9);
    assert_eq!(&code.code[..2], &[ALOAD, 0]);
    assert_eq!(code.code[8], ARETURN);
    assert_eq!((code.max_stack, code.max_locals), (1, 1));
    check_constant_operands(&code.code, &class.constant_pool).unwrap();
}

#[test]
fn existing_constants_keep_their_indices() {
    let original = target_class();
    let patched = patch_class(&original.encode().unwrap(), &upper_case_spec(), &mut stub_resolver()).unwrap();
    let class = ClassFile::decode(&patched).unwrap();
    let before = original.constant_pool.entries();
    assert_eq!(&class.constant_pool.entries()[..before.len()], before);
    assert_eq!(class.this_class, original.this_class);
    assert_eq!(class.super_class, original.super_class);
}

#[test]
fn patching_twice_is_rejected() {
    let spec = upper_case_spec();
    let once = patch_class(&target_class().encode().unwrap(), &spec, &mut stub_resolver()).unwrap();
    let again = patch_class(&once, &spec, &mut stub_resolver());
    assert!(matches!(
        again,
        Err(PatchError::DuplicateMethod { ref name, .. }) if name == "foo_original"
    ));
}

#[test]
fn missing_target_method() {
    let mut spec = upper_case_spec();
    spec.method_name = "bar".to_string();
    spec.source = "public String bar() { return bar_original(); }".to_string();
    let result = patch_class(&target_class().encode().unwrap(), &spec, &mut stub_resolver());
    match result {
        Err(PatchError::MethodNotFound { class, name, descriptor }) => {
            assert_eq!(class, "demo/Target");
            assert_eq!(name, "bar");
            assert_eq!(descriptor, "()Ljava/lang/String;");
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn replacement_must_keep_the_signature() {
    let mut spec = upper_case_spec();
    spec.source = "public String foo(int n) {\n    return foo_original();\n}".to_string();
    let result = patch_class(&target_class().encode().unwrap(), &spec, &mut stub_resolver());
    assert!(matches!(result, Err(PatchError::TypeResolution { line: 1, .. })), "{:?}", result);
}

#[test]
fn wrong_class_is_malformed_input() {
    let mut spec = upper_case_spec();
    spec.class_name = "demo/Other".to_string();
    let result = patch_class(&target_class().encode().unwrap(), &spec, &mut stub_resolver());
    assert!(matches!(result, Err(PatchError::MalformedClass(_))));
    let garbage = patch_class(&[0xca, 0xfe], &upper_case_spec(), &mut stub_resolver());
    assert!(matches!(garbage, Err(PatchError::MalformedClass(_))));
}

#[test]
fn compile_errors_carry_their_line() {
    let mut spec = upper_case_spec();
    spec.source = "public String foo() {\n    String s = \"a\";\n    while (true) {}\n}".to_string();
    let result = patch_class(&target_class().encode().unwrap(), &spec, &mut stub_resolver());
    assert!(matches!(result, Err(PatchError::UnsupportedConstruct { line: 3, .. })), "{:?}", result);

    spec.source = "public String foo() {\n    return foo_original().shout();\n}".to_string();
    let result = patch_class(&target_class().encode().unwrap(), &spec, &mut stub_resolver());
    assert!(matches!(result, Err(PatchError::TypeResolution { line: 2, .. })), "{:?}", result);
}

#[test]
fn accessibility_patch() {
    let bridge = accessibility_bridge().encode().unwrap();
    let spec = PatchSpec::flutter_accessibility("RealWear");
    let patched = patch_class(&bridge, &spec, &mut stub_resolver()).unwrap();
    let class = ClassFile::decode(&patched).unwrap();
    assert_eq!(class.encode().unwrap(), patched);

    let bridge_name = "io/flutter/view/AccessibilityBridge";
    let descriptor = "(I)Landroid/view/accessibility/AccessibilityNodeInfo;";
    assert_eq!(method_names(&class), vec!["createAccessibilityNodeInfo_original", "createAccessibilityNodeInfo"]);

    let invoked = calls(&class, "createAccessibilityNodeInfo", descriptor);
    let call = |op: u8, owner: &str, name: &str, desc: &str| (op, owner.to_string(), name.to_string(), desc.to_string());
    assert_eq!(invoked[0], call(INVOKEVIRTUAL, bridge_name, "createAccessibilityNodeInfo_original", descriptor));
    for expected in [
        call(INVOKEVIRTUAL, "java/lang/String", "contains", "(Ljava/lang/CharSequence;)Z"),
        call(INVOKESTATIC, "java/lang/Integer", "valueOf", "(I)Ljava/lang/Integer;"),
        call(INVOKEINTERFACE, "java/util/Map", "containsKey", "(Ljava/lang/Object;)Z"),
        call(INVOKEINTERFACE, "java/util/Map", "get", "(Ljava/lang/Object;)Ljava/lang/Object;"),
        call(INVOKEVIRTUAL, "java/lang/Object", "getClass", "()Ljava/lang/Class;"),
        call(INVOKEVIRTUAL, "java/lang/reflect/Field", "setAccessible", "(Z)V"),
        call(INVOKEINTERFACE, "java/lang/CharSequence", "length", "()I"),
        call(INVOKESTATIC, "android/util/Log", "d", "(Ljava/lang/String;Ljava/lang/String;)I"),
        call(
            INVOKEVIRTUAL,
            "android/view/accessibility/AccessibilityNodeInfo",
            "setContentDescription",
            "(Ljava/lang/CharSequence;)V",
        ),
    ] {
        assert!(invoked.contains(&expected), "missing {:?}", expected);
    }

    let index = class.find_method("createAccessibilityNodeInfo", descriptor).unwrap().unwrap();
    let code = class.methods[index].code().unwrap();
    assert_eq!(code.exception_table.len(), 1);
    assert_eq!(class.constant_pool.class_name(code.exception_table[0].catch_type).unwrap(), "java/lang/Exception");
    let attributes: Vec<&str> = code.attributes.iter().map(|a| a.name(&class.constant_pool).unwrap()).collect();
    assert_eq!(attributes, vec!["StackMapTable"]);
    check_constant_operands(&code.code, &class.constant_pool).unwrap();

    assert!(has_string(&class.constant_pool, "RealWear"));
    assert!(has_string(&class.constant_pool, "value"));
    assert!(has_string(&class.constant_pool, "Semantics value injection: "));
}

#[test]
fn accessibility_patch_needs_the_android_classes() {
    let mut classes = jdk_classes();
    classes.extend(android_classes().into_iter().filter(|(name, _)| name != "android/os/Build"));
    let jar: Box<dyn ClassProvider> = Box::new(ArchiveProvider::from_bytes(class_jar(&classes), "partial.jar").unwrap());
    let mut resolver = Resolver::new(vec![jar]);

    let bridge = accessibility_bridge().encode().unwrap();
    let result = patch_class(&bridge, &PatchSpec::flutter_accessibility("RealWear"), &mut resolver);
    match result {
        Err(e @ PatchError::SymbolNotFound(_)) => assert_eq!(e.to_string(), "symbol not found: android.os.Build"),
        other => panic!("unexpected {:?}", other),
    }
}
